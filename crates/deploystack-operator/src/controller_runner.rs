//! Controller runner: builds the DeployStack controller future
//!
//! Construction is pure so the caller composes and awaits the future.
//! Managed objects live in the stack's target namespace rather than the
//! stack's own, so child watches cannot map back through owner
//! references; convergence drift is caught by the periodic resync
//! instead.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use deploystack_common::crd::DeployStack;

use crate::controller::{error_policy, reconcile, Context};

/// Watcher timeout (seconds), kept under the client read timeout (30s) so
/// the API server closes idle watches before the client times out
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Build the DeployStack controller future
pub fn build_stack_controller(client: Client) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let ctx = Arc::new(Context::new(client.clone()));
    let stacks: Api<DeployStack> = Api::all(client);

    tracing::info!("- DeployStack controller");

    Box::pin(
        Controller::new(
            stacks,
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("DeployStack")),
    )
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
