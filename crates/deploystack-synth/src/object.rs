//! Managed object kinds and the synthesis entry point
//!
//! The set of kinds this operator manages is closed: adding a kind means
//! adding a variant here and teaching the synthesizers and the store
//! about it, all checked at compile time.

use std::collections::BTreeMap;

use deploystack_common::crd::DeployStackSpec;
use deploystack_common::{Error, Result};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, ObjectReference, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::config::ResolvedConfig;
use crate::{bundles, network, workload};

/// The kinds of Kubernetes objects this operator manages
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ManagedKind {
    /// apps/v1 Deployment, the stateless workload flavor
    Deployment,
    /// apps/v1 StatefulSet, the stateful workload flavor
    StatefulSet,
    /// ClusterIP Service fronting a workload
    Service,
    /// networking.k8s.io/v1 Ingress for apps with routing rules
    Ingress,
    /// The shared config bundle
    ConfigMap,
    /// The shared secret bundle
    Secret,
}

impl ManagedKind {
    /// Every managed kind, in reconciliation and sweep order
    pub const ALL: [ManagedKind; 6] = [
        ManagedKind::Deployment,
        ManagedKind::StatefulSet,
        ManagedKind::Service,
        ManagedKind::Ingress,
        ManagedKind::ConfigMap,
        ManagedKind::Secret,
    ];

    /// The effective object name for this kind when synthesized for `app`
    pub fn object_name(&self, app: &str) -> String {
        match self {
            ManagedKind::Deployment | ManagedKind::StatefulSet | ManagedKind::Service => {
                app.to_string()
            }
            ManagedKind::Ingress => format!("{app}-ingress"),
            ManagedKind::ConfigMap => deploystack_common::GLOBAL_CONFIG_NAME.to_string(),
            ManagedKind::Secret => deploystack_common::GLOBAL_SECRET_NAME.to_string(),
        }
    }

    /// Kubernetes kind string
    pub fn kind_str(&self) -> &'static str {
        match self {
            ManagedKind::Deployment => "Deployment",
            ManagedKind::StatefulSet => "StatefulSet",
            ManagedKind::Service => "Service",
            ManagedKind::Ingress => "Ingress",
            ManagedKind::ConfigMap => "ConfigMap",
            ManagedKind::Secret => "Secret",
        }
    }

    /// Kubernetes apiVersion string
    pub fn api_version(&self) -> &'static str {
        match self {
            ManagedKind::Deployment | ManagedKind::StatefulSet => "apps/v1",
            ManagedKind::Service | ManagedKind::ConfigMap | ManagedKind::Secret => "v1",
            ManagedKind::Ingress => "networking.k8s.io/v1",
        }
    }
}

impl std::fmt::Display for ManagedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind_str())
    }
}

/// One synthesized Kubernetes object, tagged by kind
#[derive(Clone, Debug, PartialEq)]
pub enum ManagedObject {
    /// A synthesized Deployment
    Deployment(Deployment),
    /// A synthesized StatefulSet
    StatefulSet(StatefulSet),
    /// A synthesized Service
    Service(Service),
    /// A synthesized Ingress
    Ingress(Ingress),
    /// The synthesized config bundle
    ConfigMap(ConfigMap),
    /// The synthesized secret bundle
    Secret(Secret),
}

impl ManagedObject {
    /// The kind of this object
    pub fn kind(&self) -> ManagedKind {
        match self {
            ManagedObject::Deployment(_) => ManagedKind::Deployment,
            ManagedObject::StatefulSet(_) => ManagedKind::StatefulSet,
            ManagedObject::Service(_) => ManagedKind::Service,
            ManagedObject::Ingress(_) => ManagedKind::Ingress,
            ManagedObject::ConfigMap(_) => ManagedKind::ConfigMap,
            ManagedObject::Secret(_) => ManagedKind::Secret,
        }
    }

    /// Borrow the object metadata
    pub fn meta(&self) -> &ObjectMeta {
        match self {
            ManagedObject::Deployment(o) => &o.metadata,
            ManagedObject::StatefulSet(o) => &o.metadata,
            ManagedObject::Service(o) => &o.metadata,
            ManagedObject::Ingress(o) => &o.metadata,
            ManagedObject::ConfigMap(o) => &o.metadata,
            ManagedObject::Secret(o) => &o.metadata,
        }
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ManagedObject::Deployment(o) => &mut o.metadata,
            ManagedObject::StatefulSet(o) => &mut o.metadata,
            ManagedObject::Service(o) => &mut o.metadata,
            ManagedObject::Ingress(o) => &mut o.metadata,
            ManagedObject::ConfigMap(o) => &mut o.metadata,
            ManagedObject::Secret(o) => &mut o.metadata,
        }
    }

    /// The object name
    pub fn name(&self) -> String {
        self.meta().name.clone().unwrap_or_default()
    }

    /// The object resourceVersion, if set
    pub fn resource_version(&self) -> Option<String> {
        self.meta().resource_version.clone()
    }

    /// Copy server-assigned identity from the live object before an update
    ///
    /// Kubernetes rejects replace calls without the current
    /// resourceVersion; the synthesized object never carries one.
    pub fn adopt_identity(&mut self, current: &ManagedObject) -> Result<()> {
        if self.kind() != current.kind() {
            return Err(Error::internal_with_context(
                "reconciler",
                format!(
                    "kind mismatch adopting identity: {} vs {}",
                    self.kind(),
                    current.kind()
                ),
            ));
        }
        let meta = self.meta_mut();
        meta.resource_version = current.meta().resource_version.clone();
        meta.uid = current.meta().uid.clone();
        Ok(())
    }

    /// Build an ObjectReference for event attribution
    pub fn object_ref(&self) -> ObjectReference {
        ObjectReference {
            api_version: Some(self.kind().api_version().to_string()),
            kind: Some(self.kind().kind_str().to_string()),
            name: self.meta().name.clone(),
            namespace: self.meta().namespace.clone(),
            uid: self.meta().uid.clone(),
            ..Default::default()
        }
    }
}

/// Everything a synthesizer needs, borrowed for one app
#[derive(Clone, Copy, Debug)]
pub struct SynthInput<'a> {
    /// App name
    pub app: &'a str,
    /// Image tag declared for the app
    pub tag: &'a str,
    /// Target namespace
    pub namespace: &'a str,
    /// Resolved per-app configuration
    pub config: &'a ResolvedConfig,
    /// The full stack spec, for bundles and ingress rules
    pub spec: &'a DeployStackSpec,
}

/// Synthesize the object of the given kind for one app
///
/// Returns `Ok(None)` when the kind does not apply: the wrong workload
/// flavor for the app's category, or an Ingress for an app with no rule.
pub fn synthesize(kind: ManagedKind, input: &SynthInput<'_>) -> Result<Option<ManagedObject>> {
    match kind {
        ManagedKind::Deployment => {
            if input.config.stateful {
                Ok(None)
            } else {
                workload::deployment(input).map(ManagedObject::Deployment).map(Some)
            }
        }
        ManagedKind::StatefulSet => {
            if input.config.stateful {
                workload::stateful_set(input).map(ManagedObject::StatefulSet).map(Some)
            } else {
                Ok(None)
            }
        }
        ManagedKind::Service => network::service(input).map(ManagedObject::Service).map(Some),
        ManagedKind::Ingress => Ok(network::ingress(input)?.map(ManagedObject::Ingress)),
        ManagedKind::ConfigMap => {
            Ok(Some(ManagedObject::ConfigMap(bundles::config_map(input))))
        }
        ManagedKind::Secret => bundles::secret(input).map(ManagedObject::Secret).map(Some),
    }
}

/// Labels carried by every per-app managed object
pub fn labels(app: &str, category: &str) -> BTreeMap<String, String> {
    let mut labels = selector_labels(app, category);
    labels.insert(
        deploystack_common::MANAGED_BY_LABEL_KEY.to_string(),
        deploystack_common::MANAGED_BY_LABEL_VALUE.to_string(),
    );
    labels
}

/// Pod selector labels: the app/category pair
pub fn selector_labels(app: &str, category: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(deploystack_common::APP_LABEL_KEY.to_string(), app.to_string());
    labels.insert(
        deploystack_common::CATEGORY_LABEL_KEY.to_string(),
        category.to_string(),
    );
    labels
}

/// Labels for the shared bundles, which belong to no single app
pub fn bundle_labels() -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        deploystack_common::MANAGED_BY_LABEL_KEY.to_string(),
        deploystack_common::MANAGED_BY_LABEL_VALUE.to_string(),
    );
    labels
}
