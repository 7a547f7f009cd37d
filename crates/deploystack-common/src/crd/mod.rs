//! Custom Resource Definitions for DeployStack

mod stack;
mod types;

pub use stack::{DeployStack, DeployStackSpec, DeployStackStatus};
pub use types::{CategorySpec, Condition, ConditionStatus, IngressRule, StackPhase};
