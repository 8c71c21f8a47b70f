//! Bot Relay - Telemetry sidecar that runs inside each worker container
//!
//! The relay wraps the trading engine process:
//! 1. Generates the engine's configuration files from the environment
//! 2. Launches the engine under a pty and suppresses its startup prompts
//! 3. Republishes engine output as structured logs over the message bus
//! 4. Samples process resources and scrapes the trade ledger on a timer
//! 5. Applies configuration updates pushed while the engine is running

use std::time::Duration;

use messaging::{LifecycleState, LogEvent, MetricEvent, StatusPublisher};
use rumqttc::{AsyncClient, Event, Packet, QoS};
use sysinfo::System;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

mod config;
mod engine;
mod error;
mod ledger;
mod logpump;
mod remote;

use config::RelayConfig;
use ledger::TradeLedger;
use remote::RemoteConfigWriter;

const TELEMETRY_INTERVAL: Duration = Duration::from_secs(10);
const RECONNECT_PAUSE: Duration = Duration::from_secs(5);
/// Grace period after engine exit so queued publishes can drain.
const FLUSH_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cfg = RelayConfig::from_env();
    info!(
        "Starting Bot Relay for worker {} (strategy: {})",
        cfg.worker_id, cfg.strategy_type
    );

    // A failed artifact write is reported but does not abort the relay:
    // the engine may still run on files baked into the image.
    if let Err(e) = cfg.write_artifacts() {
        error!("Failed to write configuration artifacts: {}", e);
    }

    let (client, eventloop) = AsyncClient::new(cfg.mqtt.options(), 64);
    let publisher = StatusPublisher::new(client.clone(), cfg.mqtt.namespace.clone());

    let (update_tx, update_rx) = mpsc::channel::<Vec<u8>>(16);
    tokio::spawn(transport_loop(
        eventloop,
        client,
        publisher.clone(),
        cfg.clone(),
        update_tx,
    ));
    tokio::spawn(update_loop(update_rx, publisher.clone(), cfg.clone()));

    let mut child = match engine::spawn(&cfg) {
        Ok(child) => child,
        Err(e) => {
            error!("Failed to launch engine: {}", e);
            publisher
                .publish_error(&cfg.worker_id, &format!("engine launch failed: {}", e))
                .await;
            tokio::time::sleep(FLUSH_GRACE).await;
            return Err(e.into());
        }
    };

    if let Some(stdin) = child.stdin.take() {
        tokio::spawn(engine::feed_prompts(stdin));
    }
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(logpump::pump(
            stdout,
            publisher.clone(),
            cfg.worker_id.clone(),
        ));
    }

    tokio::spawn(telemetry_loop(publisher.clone(), cfg.clone()));

    let status = child.wait().await?;
    info!("Engine exited with {}", status);
    publisher
        .publish_status(&cfg.worker_id, LifecycleState::Stopped)
        .await;
    tokio::time::sleep(FLUSH_GRACE).await;

    Ok(())
}

/// Drive the transport event loop: announce the worker as running once
/// connected, subscribe to its configuration topic and hand pushed
/// updates to the update loop.
async fn transport_loop(
    mut eventloop: rumqttc::EventLoop,
    client: AsyncClient,
    publisher: StatusPublisher,
    cfg: RelayConfig,
    update_tx: mpsc::Sender<Vec<u8>>,
) {
    let update_topic = messaging::topics::config_update(&cfg.mqtt.namespace, &cfg.worker_id);
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != rumqttc::ConnectReturnCode::Success {
                    warn!("Broker refused connection: {:?}", ack.code);
                    continue;
                }
                info!("Connected to broker, subscribing to {}", update_topic);
                if let Err(e) = client.subscribe(&update_topic, QoS::AtLeastOnce).await {
                    warn!("Subscribe failed: {}", e);
                }
                publisher
                    .publish_status(&cfg.worker_id, LifecycleState::Running)
                    .await;
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if publish.topic == update_topic {
                    if update_tx.send(publish.payload.to_vec()).await.is_err() {
                        return;
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Transport error, retrying: {}", e);
                tokio::time::sleep(RECONNECT_PAUSE).await;
            }
        }
    }
}

/// Apply configuration payloads pushed over the bus, one at a time.
async fn update_loop(
    mut update_rx: mpsc::Receiver<Vec<u8>>,
    publisher: StatusPublisher,
    cfg: RelayConfig,
) {
    let mut writer = RemoteConfigWriter::new(&cfg);
    while let Some(payload) = update_rx.recv().await {
        match writer.apply(&payload) {
            Ok(true) => {
                publisher
                    .publish_log(
                        &cfg.worker_id,
                        &LogEvent::new("info", "Remote configuration updated"),
                    )
                    .await;
            }
            Ok(false) => {}
            Err(e) => {
                error!("Failed to apply configuration update: {}", e);
                publisher
                    .publish_log(
                        &cfg.worker_id,
                        &LogEvent::new("error", format!("config update failed: {}", e)),
                    )
                    .await;
            }
        }
    }
}

/// Periodic resource sampling and trade ledger scraping. The watermark
/// is owned here so each trade is forwarded at most once.
async fn telemetry_loop(publisher: StatusPublisher, cfg: RelayConfig) {
    let mut sys = System::new();
    let mut ledger: Option<TradeLedger> = None;
    let mut watermark: i64 = 0;
    let mut ticker = tokio::time::interval(TELEMETRY_INTERVAL);

    loop {
        ticker.tick().await;

        sys.refresh_cpu();
        sys.refresh_memory();
        let cpu_pct = sys.global_cpu_info().cpu_usage() as f64;
        let mem_pct = if sys.total_memory() > 0 {
            sys.used_memory() as f64 / sys.total_memory() as f64 * 100.0
        } else {
            0.0
        };
        publisher
            .publish_metric(&cfg.worker_id, &MetricEvent::now(cpu_pct, mem_pct))
            .await;

        // The engine creates the ledger lazily on its first fill.
        if ledger.is_none() && cfg.ledger_path.exists() {
            match TradeLedger::open(&cfg.ledger_path).await {
                Ok(l) => ledger = Some(l),
                Err(e) => warn!("Trade ledger not readable yet: {}", e),
            }
        }

        if let Some(l) = &ledger {
            match l.fetch_newer_than(watermark).await {
                Ok(trades) => {
                    for trade in trades {
                        watermark = watermark.max(trade.id);
                        publisher.publish_trade(&cfg.worker_id, &trade).await;
                    }
                }
                Err(e) => warn!("Trade ledger scrape failed: {}", e),
            }
        }
    }
}
