//! DeployStack reconciliation
//!
//! One pass over a stack: validate the spec, resolve and converge every
//! app in declaration order, sweep objects nothing declares anymore, then
//! publish status. A misconfigured app never blocks its siblings; only
//! transport-level failures abort the pass.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use deploystack_common::crd::{
    Condition, ConditionStatus, DeployStack, DeployStackSpec, DeployStackStatus, StackPhase,
};
use deploystack_common::events::{actions, reasons};
use deploystack_common::{Error, Result, GLOBAL_CONFIG_NAME, GLOBAL_SECRET_NAME};
use deploystack_synth::{resolve, synthesize, ManagedKind, SynthInput};

use super::Context;

/// Full resync interval on a clean pass
pub const REQUEUE_INTERVAL_SECS: u64 = 300;

/// Retry delay after a retryable failure
pub const ERROR_REQUEUE_SECS: u64 = 30;

/// Reconcile one DeployStack to its declared state
#[instrument(skip(stack, ctx), fields(stack = %stack.name_any()))]
pub async fn reconcile(stack: Arc<DeployStack>, ctx: Arc<Context>) -> Result<Action> {
    let stack_ref = stack_object_ref(&stack);

    if let Err(e) = stack.spec.validate() {
        warn!(error = %e, "stack spec rejected");
        ctx.events
            .publish(
                &stack_ref,
                EventType::Warning,
                reasons::VALIDATION_FAILED,
                actions::RECONCILE,
                Some(e.to_string()),
            )
            .await;
        let mut status = DeployStackStatus::with_phase(StackPhase::Degraded)
            .message(e.to_string())
            .condition(Condition::new(
                "Ready",
                ConditionStatus::False,
                reasons::VALIDATION_FAILED,
                e.to_string(),
            ));
        status.observed_generation = stack.metadata.generation;
        ctx.store.patch_status(&stack, &status).await?;
        return Err(e);
    }

    let namespace = stack.spec.namespace.as_str();
    let mut reconciled: Vec<String> = Vec::new();
    let mut failed: Vec<String> = Vec::new();
    // Workload flavor of every app that resolved, for the sweep
    let mut flavors: BTreeMap<String, bool> = BTreeMap::new();

    for (app, tag) in &stack.spec.apps {
        let config = match resolve(app, &stack.spec) {
            Ok(config) => config,
            Err(e) => {
                warn!(app = %app, error = %e, "config resolution failed");
                ctx.events
                    .publish(
                        &stack_ref,
                        EventType::Warning,
                        reasons::CONFIG_REJECTED,
                        actions::RECONCILE,
                        Some(format!("{app}: {e}")),
                    )
                    .await;
                failed.push(app.clone());
                continue;
            }
        };
        flavors.insert(app.clone(), config.stateful);

        let input = SynthInput {
            app: app.as_str(),
            tag: tag.as_str(),
            namespace,
            config: &config,
            spec: &stack.spec,
        };
        match converge_app(&ctx, namespace, &input).await {
            Ok(()) => reconciled.push(app.clone()),
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => {
                warn!(app = %app, error = %e, "app reconciliation failed");
                ctx.events
                    .publish(
                        &stack_ref,
                        EventType::Warning,
                        reasons::CONFIG_REJECTED,
                        actions::RECONCILE,
                        Some(format!("{app}: {e}")),
                    )
                    .await;
                failed.push(app.clone());
            }
        }
    }

    sweep(&ctx, &stack, &flavors, &failed).await?;

    let message = if failed.is_empty() {
        format!("{} apps reconciled", reconciled.len())
    } else {
        format!(
            "{} apps reconciled, {} failed: {}",
            reconciled.len(),
            failed.len(),
            failed.join(", ")
        )
    };
    let condition = if failed.is_empty() {
        Condition::new(
            "Ready",
            ConditionStatus::True,
            reasons::STACK_READY,
            message.clone(),
        )
    } else {
        Condition::new(
            "Ready",
            ConditionStatus::False,
            reasons::CONFIG_REJECTED,
            message.clone(),
        )
    };
    let status = DeployStackStatus {
        observed_generation: stack.metadata.generation,
        phase: if failed.is_empty() {
            StackPhase::Ready
        } else {
            StackPhase::Degraded
        },
        reconciled_apps: reconciled.len() as u32,
        failed_apps: failed.clone(),
        message: Some(message.clone()),
        conditions: vec![condition],
    };
    ctx.store.patch_status(&stack, &status).await?;

    if failed.is_empty() {
        info!(apps = reconciled.len(), "stack reconciled");
        ctx.events
            .publish(
                &stack_ref,
                EventType::Normal,
                reasons::STACK_READY,
                actions::RECONCILE,
                Some(message),
            )
            .await;
    }

    Ok(Action::requeue(Duration::from_secs(REQUEUE_INTERVAL_SECS)))
}

/// Converge every applicable kind for one app
async fn converge_app(ctx: &Context, namespace: &str, input: &SynthInput<'_>) -> Result<()> {
    for kind in ManagedKind::ALL {
        let Some(mut desired) = synthesize(kind, input)? else {
            continue;
        };
        let name = desired.name();
        match ctx.store.fetch(kind, namespace, &name).await? {
            None => {
                ctx.store.create(namespace, &desired).await?;
                info!(kind = %kind, name = %name, "created managed object");
                ctx.events
                    .publish(
                        &desired.object_ref(),
                        EventType::Normal,
                        reasons::CREATED,
                        actions::RECONCILE,
                        None,
                    )
                    .await;
            }
            Some(current) => {
                desired.adopt_identity(&current)?;
                ctx.store.update(namespace, &desired).await?;
                debug!(kind = %kind, name = %name, "updated managed object");
                ctx.events
                    .publish(
                        &desired.object_ref(),
                        EventType::Normal,
                        reasons::UPDATED,
                        actions::RECONCILE,
                        None,
                    )
                    .await;
            }
        }
    }
    Ok(())
}

/// Delete owned objects the current spec no longer declares
///
/// Failed apps keep their objects: half-reconciled state is left in place
/// rather than torn down over a config mistake.
async fn sweep(
    ctx: &Context,
    stack: &DeployStack,
    flavors: &BTreeMap<String, bool>,
    failed: &[String],
) -> Result<()> {
    let namespace = stack.spec.namespace.as_str();
    for kind in ManagedKind::ALL {
        let expected = expected_names(kind, &stack.spec, flavors, failed);
        for name in ctx.store.list_owned(kind, namespace).await? {
            if expected.contains(&name) {
                continue;
            }
            ctx.store.delete(kind, namespace, &name).await?;
            info!(kind = %kind, name = %name, "swept stale managed object");
            ctx.events
                .publish(
                    &swept_object_ref(kind, namespace, &name),
                    EventType::Normal,
                    reasons::DELETED,
                    actions::SWEEP,
                    Some(format!("{kind} {name}")),
                )
                .await;
        }
    }
    Ok(())
}

/// Reference to a swept object, so its Deleted event lands on the object
/// itself rather than the stack
fn swept_object_ref(kind: ManagedKind, namespace: &str, name: &str) -> ObjectReference {
    ObjectReference {
        api_version: Some(kind.api_version().to_string()),
        kind: Some(kind.kind_str().to_string()),
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

/// The object names the spec currently accounts for, per kind
fn expected_names(
    kind: ManagedKind,
    spec: &DeployStackSpec,
    flavors: &BTreeMap<String, bool>,
    failed: &[String],
) -> BTreeSet<String> {
    match kind {
        // Failed apps appear in both workload sets since their flavor may
        // be unknown
        ManagedKind::Deployment => flavors
            .iter()
            .filter(|(_, stateful)| !**stateful)
            .map(|(app, _)| app.clone())
            .chain(failed.iter().cloned())
            .collect(),
        ManagedKind::StatefulSet => flavors
            .iter()
            .filter(|(_, stateful)| **stateful)
            .map(|(app, _)| app.clone())
            .chain(failed.iter().cloned())
            .collect(),
        ManagedKind::Service => spec.apps.keys().cloned().collect(),
        ManagedKind::Ingress => spec
            .apps
            .keys()
            .filter(|app| spec.ingress_rule_for(app).is_some())
            .map(|app| ManagedKind::Ingress.object_name(app))
            .collect(),
        ManagedKind::ConfigMap => BTreeSet::from([GLOBAL_CONFIG_NAME.to_string()]),
        ManagedKind::Secret => BTreeSet::from([GLOBAL_SECRET_NAME.to_string()]),
    }
}

/// Decide what to do after a failed reconcile
pub fn error_policy(stack: Arc<DeployStack>, err: &Error, _ctx: Arc<Context>) -> Action {
    if err.is_retryable() {
        warn!(stack = %stack.name_any(), error = %err, "reconciliation failed, retrying");
        Action::requeue(Duration::from_secs(ERROR_REQUEUE_SECS))
    } else {
        error!(stack = %stack.name_any(), error = %err, "reconciliation failed, waiting for spec change");
        Action::await_change()
    }
}

fn stack_object_ref(stack: &DeployStack) -> ObjectReference {
    ObjectReference {
        api_version: Some("deploystack.dev/v1alpha1".to_string()),
        kind: Some("DeployStack".to_string()),
        name: stack.metadata.name.clone(),
        namespace: stack.metadata.namespace.clone(),
        uid: stack.metadata.uid.clone(),
        ..Default::default()
    }
}
