//! DeployStack Custom Resource Definition
//!
//! A DeployStack declares a fleet of applications, their layered
//! configuration, and their HTTP routing. The operator synthesizes one set
//! of Kubernetes objects per app and keeps them converged.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{CategorySpec, Condition, IngressRule, StackPhase};

/// Specification for a DeployStack
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "deploystack.dev",
    version = "v1alpha1",
    kind = "DeployStack",
    plural = "deploystacks",
    shortname = "ds",
    status = "DeployStackStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Apps","type":"integer","jsonPath":".status.reconciledApps"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DeployStackSpec {
    /// Applications to deploy: app name -> image tag
    pub apps: BTreeMap<String, String>,

    /// Target namespace for every managed object
    pub namespace: String,

    /// Config keys applied to every app
    pub default_config_keys: Vec<String>,

    /// Categories grouping apps by workload flavor and override keys
    pub categories: BTreeMap<String, CategorySpec>,

    /// Raw configuration values, addressed by suffixed keys
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, serde_json::Value>,

    /// Payload of the shared config bundle
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub configs: BTreeMap<String, String>,

    /// Payload of the shared secret bundle, values base64-encoded
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<String, String>,

    /// HTTP routing rules, one Ingress object per matching app
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingress: Vec<IngressRule>,
}

impl DeployStackSpec {
    /// Validate the stack specification
    ///
    /// Checks structural requirements only; per-app config resolution has
    /// its own failure modes and is validated during reconciliation.
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.namespace.is_empty() {
            return Err(crate::Error::validation_for_field(
                crate::error::UNKNOWN_CONTEXT,
                "spec.namespace",
                "namespace cannot be empty",
            ));
        }
        if self.default_config_keys.is_empty() {
            return Err(crate::Error::validation_for_field(
                crate::error::UNKNOWN_CONTEXT,
                "spec.defaultConfigKeys",
                "default config key list cannot be empty",
            ));
        }
        if self.categories.is_empty() {
            return Err(crate::Error::validation_for_field(
                crate::error::UNKNOWN_CONTEXT,
                "spec.categories",
                "at least one category must be declared",
            ));
        }
        for app in self.apps.keys() {
            let memberships = self
                .categories
                .values()
                .filter(|c| c.contains(app))
                .count();
            if memberships == 0 {
                return Err(crate::Error::validation_for_field(
                    crate::error::UNKNOWN_CONTEXT,
                    "spec.categories",
                    format!("app {app} is not a member of any category"),
                ));
            }
        }
        Ok(())
    }

    /// Find the ingress rule declared for the given app, if any
    pub fn ingress_rule_for(&self, app: &str) -> Option<&IngressRule> {
        self.ingress.iter().find(|r| r.name == app)
    }
}

/// Status for a DeployStack
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeployStackStatus {
    /// The generation of the spec that was last processed by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Current phase of the stack lifecycle
    #[serde(default)]
    pub phase: StackPhase,

    /// Number of apps reconciled successfully in the last pass
    #[serde(default)]
    pub reconciled_apps: u32,

    /// Apps that failed to reconcile in the last pass
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_apps: Vec<String>,

    /// Human-readable message about current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Conditions representing the stack state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl DeployStackStatus {
    /// Create a new status with the given phase
    pub fn with_phase(phase: StackPhase) -> Self {
        Self {
            phase,
            ..Default::default()
        }
    }

    /// Set the message and return self for chaining
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Add a condition and return self for chaining
    pub fn condition(mut self, condition: Condition) -> Self {
        // Replace an existing condition of the same type
        self.conditions.retain(|c| c.type_ != condition.type_);
        self.conditions.push(condition);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::types::ConditionStatus;

    fn minimal_spec() -> DeployStackSpec {
        let mut apps = BTreeMap::new();
        apps.insert("orders".to_string(), "v1.2.3".to_string());

        let mut members = BTreeMap::new();
        members.insert("orders".to_string(), vec![]);
        let mut categories = BTreeMap::new();
        categories.insert(
            "web".to_string(),
            CategorySpec {
                stateful: false,
                keys: vec![],
                apps: members,
            },
        );

        DeployStackSpec {
            apps,
            namespace: "prod".to_string(),
            default_config_keys: vec!["replicasForDefault".to_string()],
            categories,
            ..Default::default()
        }
    }

    #[test]
    fn test_minimal_spec_validates() {
        assert!(minimal_spec().validate().is_ok());
    }

    #[test]
    fn test_empty_namespace_rejected() {
        let mut spec = minimal_spec();
        spec.namespace = String::new();
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("namespace"));
    }

    #[test]
    fn test_empty_default_keys_rejected() {
        let mut spec = minimal_spec();
        spec.default_config_keys.clear();
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("default config key"));
    }

    #[test]
    fn test_empty_categories_rejected() {
        let mut spec = minimal_spec();
        spec.categories.clear();
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("category"));
    }

    #[test]
    fn test_uncategorized_app_rejected() {
        let mut spec = minimal_spec();
        spec.apps.insert("stray".to_string(), "latest".to_string());
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("stray"));
    }

    #[test]
    fn test_ingress_rule_lookup() {
        let mut spec = minimal_spec();
        spec.ingress.push(IngressRule {
            name: "orders".to_string(),
            host: "orders.example.com".to_string(),
            ..Default::default()
        });
        assert!(spec.ingress_rule_for("orders").is_some());
        assert!(spec.ingress_rule_for("billing").is_none());
    }

    #[test]
    fn test_spec_serde_camel_case() {
        let spec = minimal_spec();
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("defaultConfigKeys"));
        assert!(!json.contains("default_config_keys"));
        let parsed: DeployStackSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, parsed);
    }

    #[test]
    fn test_status_condition_replaces_same_type() {
        let status = DeployStackStatus::with_phase(StackPhase::Ready)
            .condition(Condition::new(
                "Ready",
                ConditionStatus::False,
                "Reconciling",
                "in progress",
            ))
            .condition(Condition::new(
                "Ready",
                ConditionStatus::True,
                "StackReady",
                "done",
            ));
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].status, ConditionStatus::True);
    }

    #[test]
    fn test_status_default_is_pending() {
        let status = DeployStackStatus::default();
        assert_eq!(status.phase, StackPhase::Pending);
        assert_eq!(status.reconciled_apps, 0);
        assert!(status.failed_apps.is_empty());
    }
}
