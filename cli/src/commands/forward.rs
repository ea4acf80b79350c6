//! Forward command - run one tunnel until Ctrl-C.

use anyhow::{bail, Result};
use chrono::Local;
use kubetunnel_core::{
    ClusterApi, PortConflictDecision, PortConflictResolver, PortForwardManager, TunnelConfig,
    TunnelState, TunnelStatus,
};
use tokio::sync::broadcast::error::RecvError;

pub async fn run<K, P>(
    manager: &PortForwardManager<K, P>,
    config: TunnelConfig,
    kill_conflicting: bool,
    json: bool,
) -> Result<()>
where
    K: ClusterApi,
    P: PortConflictResolver,
{
    // Subscribed first so the initial transitions are printed too
    let mut updates = manager.subscribe();

    if let Err(e) = manager.start_port_forward(config.clone()).await {
        match e.port_conflict() {
            Some(owner) if kill_conflicting => {
                eprintln!(
                    "Port {} is held by {} (PID {}); killing it",
                    config.local_port, owner.process_name, owner.pid
                );
                let restarted = manager
                    .respond_to_port_conflict(config, PortConflictDecision::KillAndRetry)
                    .await?;
                if restarted.is_none() {
                    bail!("Port forward was not started");
                }
            }
            Some(_) => bail!("{} (use --kill-conflicting to free it)", e),
            None => return Err(e.into()),
        }
    }

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            update = updates.recv() => match update {
                Ok(status) => {
                    print_status(&status, json)?;
                    if status.state == TunnelState::Failed {
                        break Err(anyhow::anyhow!(
                            "Port forward failed: {}",
                            status.error.unwrap_or_default()
                        ));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped = skipped, "status updates dropped");
                }
                Err(RecvError::Closed) => break Ok(()),
            }
        }
    };

    manager.stop_all();
    outcome
}

fn print_status(status: &TunnelStatus, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(status)?);
        return Ok(());
    }

    let mut line = format!(
        "{} {:<13} localhost:{} -> {}/{}:{}",
        Local::now().format("%H:%M:%S"),
        status.state.as_str().to_uppercase(),
        status.config.local_port,
        status.config.namespace,
        status.config.service,
        status.config.service_port,
    );
    if status.retry_count > 0 {
        line.push_str(&format!(" (retry {})", status.retry_count));
    }
    if let Some(at) = status.next_retry_at {
        line.push_str(&format!(
            " next attempt {}",
            at.with_timezone(&Local).format("%H:%M:%S")
        ));
    }
    if let Some(error) = &status.error {
        line.push_str(&format!(" - {}", error));
    }
    println!("{}", line);
    Ok(())
}
