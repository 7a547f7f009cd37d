//! Workload synthesis: Deployments and StatefulSets
//!
//! Both flavors share one pod template; the category's `stateful` flag
//! picks the wrapper. Synthesis is a pure function of the input, so
//! running it twice over the same spec yields identical objects.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment,
    RollingUpdateStatefulSetStrategy, StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy,
};
use k8s_openapi::api::core::v1::{
    Affinity, ConfigMapEnvSource, ConfigMapVolumeSource, Container, ContainerPort, EnvFromSource,
    EnvVar, ExecAction, HTTPGetAction, Lifecycle, LifecycleHandler, LocalObjectReference,
    PodAffinityTerm, PodAntiAffinity, PodSpec, PodTemplateSpec, Probe, ResourceRequirements,
    SecretEnvSource, SecretVolumeSource, TCPSocketAction, Volume, VolumeMount,
    WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use deploystack_common::{Error, Result, GLOBAL_CONFIG_NAME, GLOBAL_SECRET_NAME};

use crate::config::coerce_i32;
use crate::object::{labels, selector_labels, SynthInput};

const DEFAULT_IMAGE_REGISTRY: &str = "registry.cn-hangzhou.aliyuncs.com/unipal";
const DEFAULT_IMAGE_NAMESPACE: &str = "dev";
const DEFAULT_TAG: &str = "latest";
const DEFAULT_PULL_SECRET: &str = "regcred-vpc";
const HTTP_PROBE_PATH: &str = "/ops/alive";
const TERMINATION_GRACE_SECONDS: i64 = 30;

/// Synthesize the Deployment for a stateless app
pub fn deployment(input: &SynthInput<'_>) -> Result<Deployment> {
    let template = pod_template(input)?;
    Ok(Deployment {
        metadata: workload_meta(input),
        spec: Some(DeploymentSpec {
            replicas: input.config.try_attribute_i32("replicas")?,
            selector: LabelSelector {
                match_labels: Some(selector_labels(input.app, &input.config.category)),
                ..Default::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDeployment {
                    max_unavailable: Some(IntOrString::Int(0)),
                    max_surge: Some(IntOrString::Int(1)),
                }),
            }),
            template,
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Synthesize the StatefulSet for a stateful app
///
/// The headless governing service shares the app's name; replicas roll
/// from the highest ordinal down (partition 0).
pub fn stateful_set(input: &SynthInput<'_>) -> Result<StatefulSet> {
    let template = pod_template(input)?;
    Ok(StatefulSet {
        metadata: workload_meta(input),
        spec: Some(StatefulSetSpec {
            service_name: input.app.to_string(),
            replicas: input.config.try_attribute_i32("replicas")?,
            selector: LabelSelector {
                match_labels: Some(selector_labels(input.app, &input.config.category)),
                ..Default::default()
            },
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateStatefulSetStrategy {
                    partition: Some(0),
                    ..Default::default()
                }),
            }),
            template,
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn workload_meta(input: &SynthInput<'_>) -> ObjectMeta {
    ObjectMeta {
        name: Some(input.app.to_string()),
        namespace: Some(input.namespace.to_string()),
        labels: Some(labels(input.app, &input.config.category)),
        ..Default::default()
    }
}

fn pod_template(input: &SynthInput<'_>) -> Result<PodTemplateSpec> {
    let config = input.config;
    let (volumes, volume_mounts) = volumes_and_mounts(input)?;

    let container = Container {
        name: input.app.to_string(),
        image: Some(image(input)?),
        image_pull_policy: Some(pull_policy(input.tag).to_string()),
        ports: Some(container_ports(input)?),
        resources: Some(resource_requirements(input)?),
        env: Some(vec![
            EnvVar {
                name: "CONFIG_ENV".to_string(),
                value: Some(input.namespace.to_string()),
                ..Default::default()
            },
            EnvVar {
                name: "MY_SERVICE_NAME".to_string(),
                value: Some(input.app.to_string()),
                ..Default::default()
            },
        ]),
        env_from: Some(vec![
            EnvFromSource {
                config_map_ref: Some(ConfigMapEnvSource {
                    name: GLOBAL_CONFIG_NAME.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            EnvFromSource {
                secret_ref: Some(SecretEnvSource {
                    name: GLOBAL_SECRET_NAME.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ]),
        volume_mounts: (!volume_mounts.is_empty()).then_some(volume_mounts),
        liveness_probe: probe(input, 30)?,
        readiness_probe: probe(input, 15)?,
        lifecycle: Some(Lifecycle {
            pre_stop: Some(LifecycleHandler {
                exec: Some(ExecAction {
                    command: Some(vec![
                        "/bin/sh".to_string(),
                        "-c".to_string(),
                        "sleep 20".to_string(),
                    ]),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    Ok(PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(selector_labels(input.app, &config.category)),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![container],
            affinity: Some(anti_affinity(input.app)),
            volumes: (!volumes.is_empty()).then_some(volumes),
            termination_grace_period_seconds: Some(TERMINATION_GRACE_SECONDS),
            image_pull_secrets: Some(vec![LocalObjectReference {
                name: pull_secret(input)?.to_string(),
            }]),
            ..Default::default()
        }),
    })
}

/// Compose the image reference: `{registry}/{imageNamespace}_{app}:{tag}`
fn image(input: &SynthInput<'_>) -> Result<String> {
    let registry = input
        .config
        .try_attribute_str("imageRegistry")?
        .unwrap_or(DEFAULT_IMAGE_REGISTRY);
    let image_ns = input
        .config
        .try_attribute_str("imageNamespace")?
        .unwrap_or(DEFAULT_IMAGE_NAMESPACE);
    let tag = if input.tag.is_empty() {
        DEFAULT_TAG
    } else {
        input.tag
    };
    Ok(format!("{registry}/{image_ns}_{}:{tag}", input.app))
}

/// `latest` floats, so it is always re-pulled; pinned tags are cached
fn pull_policy(tag: &str) -> &'static str {
    if tag.is_empty() || tag == DEFAULT_TAG {
        "Always"
    } else {
        "IfNotPresent"
    }
}

fn pull_secret<'a>(input: &'a SynthInput<'_>) -> Result<&'a str> {
    Ok(input
        .config
        .try_attribute_str("imageSecrets")?
        .unwrap_or(DEFAULT_PULL_SECRET))
}

/// Requests and limits from the dash-delimited `resourcesMemory` and
/// `resourcesCpu` attributes ("100Mi-512Mi" = request 100Mi, limit 512Mi)
fn resource_requirements(input: &SynthInput<'_>) -> Result<ResourceRequirements> {
    let (mem_request, mem_limit) = split_request_limit(input, "resourcesMemory")?;
    let (cpu_request, cpu_limit) = split_request_limit(input, "resourcesCpu")?;

    let mut requests = BTreeMap::new();
    requests.insert("memory".to_string(), Quantity(mem_request));
    requests.insert("cpu".to_string(), Quantity(cpu_request));
    let mut limits = BTreeMap::new();
    limits.insert("memory".to_string(), Quantity(mem_limit));
    limits.insert("cpu".to_string(), Quantity(cpu_limit));

    Ok(ResourceRequirements {
        requests: Some(requests),
        limits: Some(limits),
        ..Default::default()
    })
}

fn split_request_limit(input: &SynthInput<'_>, attribute: &str) -> Result<(String, String)> {
    let raw = input.config.attribute_str(attribute)?;
    let parts: Vec<&str> = raw.trim().split('-').collect();
    match parts.as_slice() {
        [request, limit] if !request.is_empty() && !limit.is_empty() => {
            Ok((request.to_string(), limit.to_string()))
        }
        _ => Err(Error::config_for_key(
            &input.config.app,
            attribute,
            format!("expected \"request-limit\", got {raw:?}"),
        )),
    }
}

/// One named container port per `port*` key, `{protocol}-{app}`
fn container_ports(input: &SynthInput<'_>) -> Result<Vec<ContainerPort>> {
    input
        .config
        .entries_with_attribute("port")
        .into_iter()
        .map(|(protocol, value)| {
            let port = coerce_i32(&input.config.app, &format!("portFor{protocol}"), value)?;
            Ok(ContainerPort {
                name: Some(format!("{protocol}-{}", input.app)),
                container_port: port,
                ..Default::default()
            })
        })
        .collect()
}

/// TCP probe on the `probeReadyTcp` port, switched to an HTTP GET by
/// `probeHttpEnable`; no probe when no port is configured
fn probe(input: &SynthInput<'_>, initial_delay: i32) -> Result<Option<Probe>> {
    let Some(port) = input.config.try_attribute_i32("probeReadyTcp")? else {
        return Ok(None);
    };
    let http = input
        .config
        .try_attribute_bool("probeHttpEnable")?
        .unwrap_or(false);

    let mut probe = Probe {
        initial_delay_seconds: Some(initial_delay),
        timeout_seconds: Some(5),
        ..Default::default()
    };
    if http {
        probe.http_get = Some(HTTPGetAction {
            path: Some(HTTP_PROBE_PATH.to_string()),
            port: IntOrString::Int(port),
            ..Default::default()
        });
    } else {
        probe.tcp_socket = Some(TCPSocketAction {
            port: IntOrString::Int(port),
            ..Default::default()
        });
    }
    Ok(Some(probe))
}

/// Prefer spreading replicas of the same app across hostnames
fn anti_affinity(app: &str) -> Affinity {
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                WeightedPodAffinityTerm {
                    weight: 100,
                    pod_affinity_term: PodAffinityTerm {
                        label_selector: Some(LabelSelector {
                            match_expressions: Some(vec![LabelSelectorRequirement {
                                key: "app".to_string(),
                                operator: "In".to_string(),
                                values: Some(vec![app.to_string()]),
                            }]),
                            ..Default::default()
                        }),
                        topology_key: "kubernetes.io/hostname".to_string(),
                        ..Default::default()
                    },
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Volumes and mounts from `volumeCm*` and `volumeSecret*` keys
///
/// The value is the mount path. The default tier mounts under the `conf`
/// suffix; ConfigMap volumes reference a per-app ConfigMap named after
/// the app, Secret volumes a Secret named `{app}-{suffix}`.
fn volumes_and_mounts(input: &SynthInput<'_>) -> Result<(Vec<Volume>, Vec<VolumeMount>)> {
    let mut volumes = Vec::new();
    let mut mounts = Vec::new();

    for (attribute, is_secret) in [("volumeCm", false), ("volumeSecret", true)] {
        for (tier, value) in input.config.entries_with_attribute(attribute) {
            let serde_json::Value::String(path) = value else {
                return Err(Error::config_for_key(
                    &input.config.app,
                    format!("{attribute}For{tier}"),
                    format!("expected a mount path string, got {value}"),
                ));
            };
            let suffix = if tier == "default" { "conf" } else { tier.as_str() };
            let volume_name = format!("{}-{suffix}", input.app);

            let mut volume = Volume {
                name: volume_name.clone(),
                ..Default::default()
            };
            if is_secret {
                volume.secret = Some(SecretVolumeSource {
                    secret_name: Some(volume_name.clone()),
                    ..Default::default()
                });
            } else {
                volume.config_map = Some(ConfigMapVolumeSource {
                    name: input.app.to_string(),
                    ..Default::default()
                });
            }
            volumes.push(volume);
            mounts.push(VolumeMount {
                name: volume_name,
                mount_path: path.clone(),
                ..Default::default()
            });
        }
    }

    Ok((volumes, mounts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::resolve;
    use deploystack_common::crd::{CategorySpec, DeployStackSpec};
    use serde_json::json;

    // =========================================================================
    // Test Fixtures
    // =========================================================================

    fn workload_spec() -> DeployStackSpec {
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

        let mut values = BTreeMap::new();
        values.insert("replicasForDefault".to_string(), json!(2));
        values.insert("resourcesMemoryForDefault".to_string(), json!("100Mi-512Mi"));
        values.insert("resourcesCpuForDefault".to_string(), json!("100m-500m"));
        values.insert("portForHttp".to_string(), json!(8080));
        values.insert("probeReadyTcpForDefault".to_string(), json!(8080));

        DeployStackSpec {
            apps,
            namespace: "prod".to_string(),
            default_config_keys: vec![
                "replicasForDefault".to_string(),
                "resourcesMemoryForDefault".to_string(),
                "resourcesCpuForDefault".to_string(),
                "portForHttp".to_string(),
                "probeReadyTcpForDefault".to_string(),
            ],
            categories,
            values,
            ..Default::default()
        }
    }

    fn build_deployment(spec: &DeployStackSpec) -> Result<Deployment> {
        let config = resolve("orders", spec)?;
        let input = SynthInput {
            app: "orders",
            tag: spec.apps.get("orders").map(String::as_str).unwrap_or(""),
            namespace: &spec.namespace,
            config: &config,
            spec,
        };
        deployment(&input)
    }

    // =========================================================================
    // Deployment synthesis
    // =========================================================================

    #[test]
    fn test_deployment_basics() {
        let spec = workload_spec();
        let deploy = build_deployment(&spec).unwrap();

        assert_eq!(deploy.metadata.name.as_deref(), Some("orders"));
        assert_eq!(deploy.metadata.namespace.as_deref(), Some("prod"));
        let dspec = deploy.spec.unwrap();
        assert_eq!(dspec.replicas, Some(2));

        let rolling = dspec.strategy.unwrap().rolling_update.unwrap();
        assert_eq!(rolling.max_unavailable, Some(IntOrString::Int(0)));
        assert_eq!(rolling.max_surge, Some(IntOrString::Int(1)));
    }

    #[test]
    fn test_image_composition_and_pull_policy() {
        let spec = workload_spec();
        let deploy = build_deployment(&spec).unwrap();
        let container = &deploy.spec.unwrap().template.spec.unwrap().containers[0];
        assert_eq!(
            container.image.as_deref(),
            Some("registry.cn-hangzhou.aliyuncs.com/unipal/dev_orders:v1.2.3")
        );
        // Pinned tag: no forced re-pull
        assert_eq!(container.image_pull_policy.as_deref(), Some("IfNotPresent"));
    }

    #[test]
    fn test_latest_tag_always_pulls() {
        let mut spec = workload_spec();
        spec.apps.insert("orders".to_string(), "latest".to_string());
        let deploy = build_deployment(&spec).unwrap();
        let container = &deploy.spec.unwrap().template.spec.unwrap().containers[0];
        assert_eq!(container.image_pull_policy.as_deref(), Some("Always"));
    }

    #[test]
    fn test_custom_registry_and_pull_secret() {
        let mut spec = workload_spec();
        spec.values
            .insert("imageRegistryForDefault".to_string(), json!("ghcr.io/acme"));
        spec.values
            .insert("imageNamespaceForDefault".to_string(), json!("staging"));
        spec.values
            .insert("imageSecretsForDefault".to_string(), json!("ghcr-pull"));
        spec.default_config_keys.extend([
            "imageRegistryForDefault".to_string(),
            "imageNamespaceForDefault".to_string(),
            "imageSecretsForDefault".to_string(),
        ]);

        let deploy = build_deployment(&spec).unwrap();
        let pod = deploy.spec.unwrap().template.spec.unwrap();
        assert_eq!(
            pod.containers[0].image.as_deref(),
            Some("ghcr.io/acme/staging_orders:v1.2.3")
        );
        assert_eq!(pod.image_pull_secrets.unwrap()[0].name, "ghcr-pull");
    }

    #[test]
    fn test_resources_split() {
        let spec = workload_spec();
        let deploy = build_deployment(&spec).unwrap();
        let resources = deploy.spec.unwrap().template.spec.unwrap().containers[0]
            .resources
            .clone()
            .unwrap();
        assert_eq!(
            resources.requests.unwrap().get("memory"),
            Some(&Quantity("100Mi".to_string()))
        );
        assert_eq!(
            resources.limits.unwrap().get("cpu"),
            Some(&Quantity("500m".to_string()))
        );
    }

    #[test]
    fn test_malformed_resources_rejected() {
        let mut spec = workload_spec();
        spec.values
            .insert("resourcesMemoryForDefault".to_string(), json!("512Mi"));
        let err = build_deployment(&spec).unwrap_err();
        assert!(err.to_string().contains("request-limit"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_tcp_probes_with_delays() {
        let spec = workload_spec();
        let deploy = build_deployment(&spec).unwrap();
        let container = &deploy.spec.unwrap().template.spec.unwrap().containers[0];

        let liveness = container.liveness_probe.clone().unwrap();
        assert_eq!(liveness.initial_delay_seconds, Some(30));
        assert_eq!(liveness.timeout_seconds, Some(5));
        assert_eq!(
            liveness.tcp_socket.unwrap().port,
            IntOrString::Int(8080)
        );

        let readiness = container.readiness_probe.clone().unwrap();
        assert_eq!(readiness.initial_delay_seconds, Some(15));
        assert!(readiness.http_get.is_none());
    }

    #[test]
    fn test_http_probe_switch() {
        let mut spec = workload_spec();
        spec.values.insert("probeHttpEnable".to_string(), json!(true));
        spec.default_config_keys.push("probeHttpEnable".to_string());

        let deploy = build_deployment(&spec).unwrap();
        let container = &deploy.spec.unwrap().template.spec.unwrap().containers[0];
        let liveness = container.liveness_probe.clone().unwrap();
        assert!(liveness.tcp_socket.is_none());
        let http = liveness.http_get.unwrap();
        assert_eq!(http.path.as_deref(), Some("/ops/alive"));
        assert_eq!(http.port, IntOrString::Int(8080));
    }

    #[test]
    fn test_named_ports() {
        let mut spec = workload_spec();
        spec.values.insert("portForGrpc".to_string(), json!(5010));
        spec.default_config_keys.push("portForGrpc".to_string());

        let deploy = build_deployment(&spec).unwrap();
        let ports = deploy.spec.unwrap().template.spec.unwrap().containers[0]
            .ports
            .clone()
            .unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].name.as_deref(), Some("grpc-orders"));
        assert_eq!(ports[0].container_port, 5010);
        assert_eq!(ports[1].name.as_deref(), Some("http-orders"));
    }

    #[test]
    fn test_volumes_default_tier_mounts_as_conf() {
        let mut spec = workload_spec();
        spec.values
            .insert("volumeCmForDefault".to_string(), json!("/etc/orders"));
        spec.values
            .insert("volumeSecretForCerts".to_string(), json!("/etc/certs"));
        spec.default_config_keys.extend([
            "volumeCmForDefault".to_string(),
            "volumeSecretForCerts".to_string(),
        ]);

        let deploy = build_deployment(&spec).unwrap();
        let pod = deploy.spec.unwrap().template.spec.unwrap();
        let volumes = pod.volumes.unwrap();
        let mounts = pod.containers[0].volume_mounts.clone().unwrap();

        let cm = volumes.iter().find(|v| v.name == "orders-conf").unwrap();
        assert_eq!(cm.config_map.as_ref().unwrap().name, "orders");
        let secret = volumes.iter().find(|v| v.name == "orders-certs").unwrap();
        assert_eq!(
            secret.secret.as_ref().unwrap().secret_name.as_deref(),
            Some("orders-certs")
        );

        assert!(mounts
            .iter()
            .any(|m| m.name == "orders-conf" && m.mount_path == "/etc/orders"));
        assert!(mounts
            .iter()
            .any(|m| m.name == "orders-certs" && m.mount_path == "/etc/certs"));
    }

    #[test]
    fn test_env_and_env_from() {
        let spec = workload_spec();
        let deploy = build_deployment(&spec).unwrap();
        let container = &deploy.spec.unwrap().template.spec.unwrap().containers[0];

        let env = container.env.clone().unwrap();
        assert!(env
            .iter()
            .any(|e| e.name == "CONFIG_ENV" && e.value.as_deref() == Some("prod")));
        assert!(env
            .iter()
            .any(|e| e.name == "MY_SERVICE_NAME" && e.value.as_deref() == Some("orders")));

        let env_from = container.env_from.clone().unwrap();
        assert_eq!(env_from.len(), 2);
    }

    #[test]
    fn test_anti_affinity_and_lifecycle() {
        let spec = workload_spec();
        let deploy = build_deployment(&spec).unwrap();
        let pod = deploy.spec.unwrap().template.spec.unwrap();

        let terms = pod
            .affinity
            .unwrap()
            .pod_anti_affinity
            .unwrap()
            .preferred_during_scheduling_ignored_during_execution
            .unwrap();
        assert_eq!(terms[0].weight, 100);
        assert_eq!(terms[0].pod_affinity_term.topology_key, "kubernetes.io/hostname");

        assert_eq!(pod.termination_grace_period_seconds, Some(30));
        let pre_stop = pod.containers[0]
            .lifecycle
            .clone()
            .unwrap()
            .pre_stop
            .unwrap()
            .exec
            .unwrap();
        assert_eq!(pre_stop.command.unwrap()[2], "sleep 20");
    }

    /// Synthesizing twice from the same spec is field-for-field identical
    #[test]
    fn test_synthesis_is_idempotent() {
        let spec = workload_spec();
        let first = build_deployment(&spec).unwrap();
        let second = build_deployment(&spec).unwrap();
        assert_eq!(first, second);
    }

    // =========================================================================
    // StatefulSet synthesis
    // =========================================================================

    #[test]
    fn test_stateful_set_flavor() {
        let mut spec = workload_spec();
        spec.categories.get_mut("web").unwrap().stateful = true;

        let config = resolve("orders", &spec).unwrap();
        let input = SynthInput {
            app: "orders",
            tag: "v1.2.3",
            namespace: "prod",
            config: &config,
            spec: &spec,
        };
        let sts = stateful_set(&input).unwrap();
        let sspec = sts.spec.unwrap();
        assert_eq!(sspec.service_name, "orders");
        assert_eq!(sspec.replicas, Some(2));
        let rolling = sspec.update_strategy.unwrap().rolling_update.unwrap();
        assert_eq!(rolling.partition, Some(0));
    }
}
