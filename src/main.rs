mod autopilot;
mod config;
mod coordination;
mod error;
mod mission;
mod navigation;
mod safety;
mod telemetry;
mod vision;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use swarm_shared::params;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use autopilot::{log_mode_changes, MavCommandSender, MavLink, MavlinkTelemetry};
use config::{PilotConfig, RadioConfig};
use coordination::{CoordinationChannel, RadioTransceiver, SerialRadio, UdpRadio};
use mission::{MissionController, MissionRunner};
use telemetry::TelemetryMonitor;
use vision::{DetectorFeed, SharedDetector};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = PilotConfig::load()?;
    info!(
        "Pilot {} starting as {:?}",
        config.node.id, config.node.role
    );
    info!("  FC: {}", config.flight_controller.connection.connection_string());

    let link = MavLink::new(config.flight_controller.clone());
    tokio::spawn(log_mode_changes(link.clone()));
    let fc = Arc::new(MavCommandSender::new(link.clone()));
    let source = Arc::new(MavlinkTelemetry::new(link.clone()));

    let radio: Arc<dyn RadioTransceiver> = match &config.radio {
        RadioConfig::Udp { bind, peers } => {
            info!("  Radio: UDP {} -> {:?}", bind, peers);
            Arc::new(UdpRadio::new(
                config.node.id.clone(),
                bind.clone(),
                peers.clone(),
            ))
        }
        RadioConfig::Serial { port, baud } => {
            info!("  Radio: serial {} @ {}", port, baud);
            Arc::new(SerialRadio::new(config.node.id.clone(), port.clone(), *baud))
        }
    };
    let channel = CoordinationChannel::new(radio, params::INBOUND_QUEUE_CAPACITY);

    let detector = SharedDetector::new(Duration::from_millis(config.vision.reading_max_age_ms));
    let feed = DetectorFeed::bind(&config.vision.feed_address, detector.clone())
        .await
        .with_context(|| format!("bind detector feed {}", config.vision.feed_address))?;
    let feed_cancel = CancellationToken::new();
    tokio::spawn(feed.run(feed_cancel.clone()));

    let controller = Arc::new(MissionController::new(
        fc,
        Arc::new(TelemetryMonitor::new()),
        config.timeouts.launch(),
        config.navigation.clone(),
    ));

    let ctrl_c_controller = controller.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("[MAIN] Interrupted, ending mission");
                ctrl_c_controller.end_mission().await;
            }
            Err(e) => error!("[MAIN] Ctrl-C handler failed: {}", e),
        }
    });

    let runner = MissionRunner::new(controller, source, channel, Arc::new(detector), config);
    let result = runner.run().await;

    feed_cancel.cancel();
    link.close();

    let report = result?;
    info!("Pilot done: {:?}", report);
    Ok(())
}
