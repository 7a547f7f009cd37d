//! Resource synthesis for DeployStack
//!
//! This crate turns a `DeployStackSpec` into concrete Kubernetes objects.
//! It has two halves:
//!
//! - [`config`]: the layered configuration resolver. Config keys follow a
//!   suffix convention (`replicasForDefault`, `replicasForWeb`,
//!   `replicasForOrders`) where more specific tiers shadow less specific
//!   ones. The resolver collapses the layers into one flat view per app.
//! - [`object`] and the synthesizers ([`workload`], [`network`],
//!   [`bundles`]): pure functions from the resolved config to k8s-openapi
//!   objects. Same input, same output; no carried state.

#![deny(missing_docs)]

pub mod bundles;
pub mod config;
pub mod network;
pub mod object;
pub mod workload;

pub use config::{resolve, ParsedKey, ResolvedConfig, Tier};
pub use object::{synthesize, ManagedKind, ManagedObject, SynthInput};
