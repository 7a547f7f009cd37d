//! Network synthesis: ClusterIP Services and Ingresses

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use deploystack_common::{Error, Result};

use crate::config::coerce_i32;
use crate::object::{labels, selector_labels, ManagedKind, SynthInput};

const INGRESS_CLASS: &str = "nginx";
const TLS_SECRET_NAME: &str = "deploystack-tls";
const DEFAULT_BACKEND_PORT: i32 = 80;

/// Synthesize the ClusterIP Service for an app
///
/// One service port per `port*` key, named like the matching container
/// port.
pub fn service(input: &SynthInput<'_>) -> Result<Service> {
    let ports: Vec<ServicePort> = input
        .config
        .entries_with_attribute("port")
        .into_iter()
        .map(|(protocol, value)| {
            let port = coerce_i32(&input.config.app, &format!("portFor{protocol}"), value)?;
            Ok(ServicePort {
                name: Some(format!("{protocol}-{}", input.app)),
                port,
                ..Default::default()
            })
        })
        .collect::<Result<_>>()?;

    Ok(Service {
        metadata: ObjectMeta {
            name: Some(input.app.to_string()),
            namespace: Some(input.namespace.to_string()),
            labels: Some(labels(input.app, &input.config.category)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector_labels(input.app, &input.config.category)),
            ports: (!ports.is_empty()).then_some(ports),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Synthesize the Ingress for an app, `None` when no rule names it
pub fn ingress(input: &SynthInput<'_>) -> Result<Option<Ingress>> {
    let Some(rule) = input.spec.ingress_rule_for(input.app) else {
        return Ok(None);
    };

    let mut paths = Vec::new();
    for (style, map) in [
        ("ImplementationSpecific", &rule.match_),
        ("Prefix", &rule.prefix),
        ("Exact", &rule.exact),
    ] {
        for (path, backend) in map {
            let (svc, port) = parse_backend(&input.config.app, path, backend)?;
            paths.push(HTTPIngressPath {
                path: Some(path.clone()),
                path_type: style.to_string(),
                backend: IngressBackend {
                    service: Some(IngressServiceBackend {
                        name: svc,
                        port: Some(ServiceBackendPort {
                            number: Some(port),
                            ..Default::default()
                        }),
                    }),
                    ..Default::default()
                },
            });
        }
    }

    let rules = if paths.is_empty() {
        Vec::new()
    } else {
        vec![IngressRule {
            host: Some(rule.host.clone()),
            http: Some(HTTPIngressRuleValue { paths }),
        }]
    };

    let tls = rule.https.then(|| {
        vec![IngressTLS {
            hosts: Some(vec![rule.host.clone()]),
            secret_name: Some(TLS_SECRET_NAME.to_string()),
        }]
    });

    Ok(Some(Ingress {
        metadata: ObjectMeta {
            name: Some(ManagedKind::Ingress.object_name(input.app)),
            namespace: Some(input.namespace.to_string()),
            labels: Some(labels(input.app, &input.config.category)),
            annotations: (!rule.annotations.is_empty()).then(|| rule.annotations.clone()),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: Some(INGRESS_CLASS.to_string()),
            tls,
            rules: (!rules.is_empty()).then_some(rules),
            ..Default::default()
        }),
        ..Default::default()
    }))
}

/// Parse a `"serviceName port"` backend string; the port defaults to 80
fn parse_backend(app: &str, path: &str, backend: &str) -> Result<(String, i32)> {
    let mut fields = backend.split_whitespace();
    let Some(svc) = fields.next() else {
        return Err(Error::config_for_key(
            app,
            path,
            "empty ingress backend",
        ));
    };
    let port = match fields.next() {
        None => DEFAULT_BACKEND_PORT,
        Some(raw) => raw.parse::<i32>().map_err(|_| {
            Error::config_for_key(
                app,
                path,
                format!("invalid backend port {raw:?} in {backend:?}"),
            )
        })?,
    };
    Ok((svc.to_string(), port))
}
