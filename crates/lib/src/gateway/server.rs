//! Gateway run loop: bootstrap, dispatch, graceful shutdown.

use crate::channels::{InboundMessage, MattermostChannel, ReplySink};
use crate::config::{self, Config};
use crate::dispatch::Dispatcher;
use crate::exec::{Executor, ProcessExecutor};
use crate::gateway::health::{serve_health, HealthState};
use crate::intent::Classifier;
use crate::policy::Policy;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Run the bot until SIGINT or SIGTERM.
///
/// Startup fails on an unusable policy, missing Mattermost settings, an unreachable server,
/// or a failed login. On shutdown the event stream is closed, in-flight commands get the
/// configured grace period, and a final "stopped" notice is posted.
pub async fn run_gateway(config: Config) -> Result<()> {
    let policy = Arc::new(Policy::from_config(&config.policy).context("invalid policy configuration")?);
    let mm = config::resolve_mattermost(&config)?;
    let bot_name = config.general.bot_name.clone();

    let channel = Arc::new(
        MattermostChannel::connect(&mm)
            .await
            .with_context(|| format!("connecting to mattermost at {}", mm.host))?,
    );
    log::info!(
        "monitoring channel {} ({}) with trigger {}",
        mm.channel_name,
        channel.channel_id(),
        policy.trigger_prefix()
    );

    let executor: Arc<dyn Executor> = Arc::new(ProcessExecutor::new(Duration::from_secs(
        config.executor.timeout_secs.max(1),
    )));
    let classifier = Classifier::new(
        channel.bot_user_id(),
        policy,
        executor,
        config.executor.max_reply_chars,
    );
    let sink: Arc<dyn ReplySink> = channel.clone();
    let dispatcher = Dispatcher::new(channel.channel_id(), classifier, sink, config.executor.workers);
    let in_flight = dispatcher.in_flight();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(64);

    let health_task = if config.health.enabled {
        let state = HealthState {
            bot_name: bot_name.clone(),
            in_flight,
        };
        let bind = config.health.bind.clone();
        let port = config.health.port;
        let rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = serve_health(&bind, port, state, rx).await {
                log::warn!("health endpoint: {:#}", e);
            }
        }))
    } else {
        None
    };

    if let Err(e) = channel
        .create_post(&format!("_{} is **running**_", bot_name), None)
        .await
    {
        log::warn!("start-up notice not delivered: {}", e);
    }

    let inbound_task = channel.clone().start_inbound(inbound_tx, shutdown_rx.clone());
    let grace = Duration::from_secs(config.executor.shutdown_grace_secs);
    let dispatch_task = tokio::spawn(dispatcher.run(inbound_rx, shutdown_rx, grace));

    shutdown_signal().await;
    log::info!("shutdown signal received, closing event stream and draining dispatches");
    let _ = shutdown_tx.send(true);

    let _ = inbound_task.await;
    let _ = dispatch_task.await;
    if let Some(h) = health_task {
        let _ = h.await;
    }

    if let Err(e) = channel
        .create_post(&format!("_{} has **stopped** running_", bot_name), None)
        .await
    {
        log::warn!("shutdown notice not delivered: {}", e);
    }
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
