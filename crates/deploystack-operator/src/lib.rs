//! DeployStack operator: watches DeployStack resources and converges the
//! Kubernetes objects they declare.

pub mod controller;
pub mod controller_runner;

pub use controller::{Context, KubeStackStore, StackStore, CONTROLLER_NAME};
pub use controller_runner::build_stack_controller;
