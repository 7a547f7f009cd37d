//! Common types for the DeployStack operator: CRD, errors, and events

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label key marking every object this operator manages
pub const MANAGED_BY_LABEL_KEY: &str = "app.kubernetes.io/managed-by";

/// Label value identifying this operator on managed objects
pub const MANAGED_BY_LABEL_VALUE: &str = "deploystack-operator";

/// Label selector for managed objects (for Kubernetes API list queries)
pub const MANAGED_BY_SELECTOR: &str = "app.kubernetes.io/managed-by=deploystack-operator";

/// Label key carrying the application name on managed objects
pub const APP_LABEL_KEY: &str = "app";

/// Label key carrying the resolved category on managed objects
pub const CATEGORY_LABEL_KEY: &str = "category";

/// Well-known name of the shared config bundle
pub const GLOBAL_CONFIG_NAME: &str = "global-config";

/// Well-known name of the shared secret bundle
pub const GLOBAL_SECRET_NAME: &str = "global-secret";
