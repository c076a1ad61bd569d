//! # Watch Loop
//!
//! Controller watch loop that monitors `AccessRequest` resources (and the
//! Secrets, Roles and RoleBindings they own) and triggers reconciliation when
//! changes are detected.

use crate::config::ControllerConfig;
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::crd::AccessRequest;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::api::Api;
use kube::Client;
use kube_runtime::{controller, watcher, Controller};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Run the controller watch loop
///
/// Restarts the controller stream after it ends and exits once a shutdown
/// signal has marked the server as not ready.
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    config: ControllerConfig,
) -> Result<(), anyhow::Error> {
    let backoff_duration_ms = Arc::new(AtomicU64::new(config.watch_backoff_start_ms));

    // Mark server as not ready when SIGTERM/SIGINT is received
    let shutdown_server_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown_server_state.set_ready(false);
    });

    loop {
        if !server_state.is_ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let watch_span = tracing::span!(
            tracing::Level::INFO,
            "controller.watch",
            operation = "watch_loop"
        );
        let _watch_guard = watch_span.enter();
        info!("Starting controller watch loop...");

        let backoff = Arc::clone(&backoff_duration_ms);
        let backoff_start_ms = config.watch_backoff_start_ms;
        let backoff_max_ms = config.watch_backoff_max_ms;
        let restart_delay_secs = config.watch_restart_delay_secs;

        Controller::new(
            Api::<AccessRequest>::all(client.clone()),
            watcher::Config::default().any_semantic(),
        )
        .owns(Api::<Secret>::all(client.clone()), watcher::Config::default())
        .owns(Api::<Role>::all(client.clone()), watcher::Config::default())
        .owns(Api::<RoleBinding>::all(client.clone()), watcher::Config::default())
        .with_config(
            controller::Config::default().concurrency(config.max_concurrent_reconciliations),
        )
        .shutdown_on_signal()
        .run(reconcile, handle_reconciliation_error, Arc::clone(&reconciler))
        .filter_map(move |x| {
            let backoff = Arc::clone(&backoff);
            async move {
                match &x {
                    Ok((obj, action)) => {
                        backoff.store(backoff_start_ms, std::sync::atomic::Ordering::Relaxed);
                        debug!(resource.name = %obj.name, action = ?action, "watch.event.reconciled");
                        Some(x)
                    }
                    Err(e) => {
                        let error_string = format!("{e:?}");
                        handle_watch_stream_error(
                            &error_string,
                            &backoff,
                            backoff_max_ms,
                            restart_delay_secs,
                        )
                        .await
                        .map(|()| x)
                    }
                }
            }
        })
        .for_each(|_| futures::future::ready(()))
        .await;

        if !server_state.is_ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let delay = config.watch_restart_delay_after_end_duration();
        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            delay.as_secs()
        );
        tokio::time::sleep(delay.max(Duration::from_millis(100))).await;
    }

    info!("Controller stopped gracefully");
    Ok(())
}
