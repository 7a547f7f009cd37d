//! Shared bundle synthesis: the `global-config` ConfigMap and the
//! `global-secret` Secret
//!
//! Both are stack-level singletons mounted into every workload via
//! `envFrom`. They carry only the ownership label since they belong to
//! no single app.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;

use deploystack_common::{Error, Result, GLOBAL_CONFIG_NAME, GLOBAL_SECRET_NAME};

use crate::object::{bundle_labels, SynthInput};

/// Baseline secret entries, overridden per key by the stack spec
const DEFAULT_SECRET_DATA: [(&str, &str); 3] = [
    ("CONFIG_DB_USERNAME", "cm9vdAo="),
    ("CONFIG_DB_PASSWORD", "MTIzNDU2Cg=="),
    ("CONFIG_REDIS_PASSWORD", "MTIzNDU2Cg=="),
];

/// Synthesize the shared config bundle
pub fn config_map(input: &SynthInput<'_>) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(GLOBAL_CONFIG_NAME.to_string()),
            namespace: Some(input.namespace.to_string()),
            labels: Some(bundle_labels()),
            ..Default::default()
        },
        data: (!input.spec.configs.is_empty()).then(|| input.spec.configs.clone()),
        ..Default::default()
    }
}

/// Synthesize the shared secret bundle
///
/// Declared entries overlay the baseline per key; every value is
/// base64-decoded, and a value that does not decode is a configuration
/// error rather than a silently empty secret.
pub fn secret(input: &SynthInput<'_>) -> Result<Secret> {
    let mut encoded: BTreeMap<String, String> = DEFAULT_SECRET_DATA
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    for (key, value) in &input.spec.secrets {
        encoded.insert(key.clone(), value.clone());
    }

    let mut data = BTreeMap::new();
    for (key, value) in encoded {
        let decoded = BASE64.decode(value.trim()).map_err(|e| {
            Error::config_for_key(
                input.app,
                &key,
                format!("secret value is not valid base64: {e}"),
            )
        })?;
        data.insert(key, ByteString(decoded));
    }

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(GLOBAL_SECRET_NAME.to_string()),
            namespace: Some(input.namespace.to_string()),
            labels: Some(bundle_labels()),
            ..Default::default()
        },
        data: Some(data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    })
}
