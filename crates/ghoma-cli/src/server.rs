//! Control server runner for the CLI

use anyhow::{Context, Result};
use colored::Colorize;
use ghoma_server::{ControlServer, DeviceEvent, ServerConfig};
use std::sync::Arc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Run the control server until Ctrl+C, printing device events
pub async fn run_server(
    config: ServerConfig,
    events_json: bool,
    shutdown_rx: &mut mpsc::Receiver<()>,
) -> Result<()> {
    config.validate().context("Invalid server configuration")?;

    println!(
        "{} Starting control server on {}",
        "GHOMA".cyan().bold(),
        config.listen_addr()
    );
    println!("  Heartbeat timeout: {}s", config.heartbeat_timeout_secs);
    println!("  Press Ctrl+C to stop");

    let server = Arc::new(ControlServer::new(config));
    let mut events = server.subscribe();

    let runner = server.clone();
    let mut serve = tokio::spawn(async move { runner.start().await });

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => print_event(&event, events_json)?,
                Err(RecvError::Lagged(n)) => warn!("Event printer fell behind, skipped {} events", n),
                Err(RecvError::Closed) => break,
            },
            result = &mut serve => {
                return result
                    .context("Control server task failed")?
                    .context("Control server stopped");
            }
            _ = shutdown_rx.recv() => break,
        }
    }

    info!("Control server shutting down");
    server.shutdown().await;

    // Closed events emitted by the shutdown itself
    loop {
        match events.try_recv() {
            Ok(event) => print_event(&event, events_json)?,
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }

    serve
        .await
        .context("Control server task failed")?
        .context("Control server stopped")?;

    println!("{}", "Server stopped".yellow());
    Ok(())
}

fn print_event(event: &DeviceEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else {
        let (label, detail) = describe_event(event);
        println!("{} {}", label.cyan(), detail);
    }
    Ok(())
}

/// One-line label and description of an event
pub fn describe_event(event: &DeviceEvent) -> (&'static str, String) {
    let device = event.device();
    match event {
        DeviceEvent::New { .. } => (
            "NEW",
            format!(
                "{} firmware {} from {}",
                device.id, device.firmware, device.remote_addr
            ),
        ),
        DeviceEvent::StatusChanged { .. } => (
            "SWITCH",
            format!("{} {} ({})", device.id, device.state, device.triggered),
        ),
        DeviceEvent::Measurement { metric, .. } => {
            let value = device
                .energy(*metric)
                .map(|reading| reading.value.to_string())
                .unwrap_or_else(|| "-".to_string());
            ("MEASURE", format!("{} {} {}", device.id, metric, value))
        }
        DeviceEvent::Heartbeat { .. } => ("HEARTBEAT", device.id.clone()),
        DeviceEvent::Closed { .. } => ("CLOSED", device.id.clone()),
        DeviceEvent::Reregistered { .. } => (
            "REREGISTERED",
            format!("{} (#{})", device.id, device.reregistered_count),
        ),
    }
}
