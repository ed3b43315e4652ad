mod channel;
mod config;
mod error;
mod history;
mod liveness;
mod mqtt;
mod reading;
mod recheck;
mod state;
mod web;

use anyhow::{Context, Result};
use std::env;
use tokio::sync::watch;
use tracing::info;

use state::{shared, Monitor};
use web::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load_from_env(&config_path)?;
    let addr = cfg.web.socket_addr()?;

    info!(
        %addr,
        static_dir = %cfg.web.static_dir,
        server_ip = ?cfg.web.server_ip,
        mqtt = cfg.mqtt.enabled,
        channels = %channel::Channel::valid_names(),
        "kebon hub starting"
    );

    // ── Shared state ────────────────────────────────────────────────
    let monitor = shared(Monitor::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Liveness re-check ───────────────────────────────────────────
    let recheck = tokio::spawn(recheck::run(monitor.clone(), shutdown_rx.clone()));

    // ── Web server ──────────────────────────────────────────────────
    let app = AppState {
        monitor: monitor.clone(),
        server_ip: cfg.web.server_ip.clone(),
        port: cfg.web.port,
    };
    let mut web = tokio::spawn(web::serve(
        app,
        addr,
        cfg.web.static_dir.clone(),
        shutdown_rx.clone(),
    ));

    // ── MQTT (optional) ─────────────────────────────────────────────
    // The client handle is held until shutdown so the subscription stays up.
    let mqtt = if cfg.mqtt.enabled {
        let (client, eventloop) = mqtt::connect(&cfg.mqtt).await?;
        let handle = tokio::spawn(mqtt::run(eventloop, monitor.clone(), shutdown_rx.clone()));
        Some((client, handle))
    } else {
        info!("mqtt disabled; accepting readings over http only");
        None
    };

    // ── Run until ctrl-c or the web server exits ────────────────────
    let web_exited = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for ctrl-c")?;
            info!("shutdown requested");
            None
        }
        res = &mut web => Some(res),
    };

    let _ = shutdown_tx.send(true);
    let web_result = match web_exited {
        Some(res) => res,
        None => web.await,
    };
    recheck.await.context("re-check task failed")?;
    if let Some((client, handle)) = mqtt {
        let _ = client.disconnect().await;
        handle.await.context("mqtt task failed")?;
    }
    web_result.context("web task failed")??;

    info!("kebon hub stopped");
    Ok(())
}
