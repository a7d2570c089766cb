use anyhow::Context;
use braviad::bravia::BraviaClient;
use braviad::bus::RumqttcClient;
use braviad::bus::Topics;
use braviad::supervisor::supervise;
use braviad::Cli;
use braviad::Config;
use braviad::Device;
use braviad::DeviceSettings;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::filter::LevelFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::from(config.logging.level))
        .init();

    tracing::info!("braviad starting");
    tracing::info!(
        "MQTT broker {}:{}, topic root {}",
        config.mqtt.broker,
        config.mqtt.port,
        config.bravia.topic_root
    );

    let node = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "braviad".to_string());

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut supervisors = Vec::new();

    for host in &config.bravia.hosts {
        let device = match create_device(&config, host, &node) {
            Ok(device) => device,
            Err(e) => {
                tracing::error!("[{}] Failed to start: {:#}", host, e);
                continue;
            }
        };

        tracing::info!("[{}] Starting device", host);
        let handle = tokio::spawn(device.run(stop_rx.clone()));
        supervisors.push(tokio::spawn(supervise(host.clone(), handle)));
    }

    if supervisors.is_empty() {
        anyhow::bail!("No device could be started");
    }

    tracing::info!("All devices started, press Ctrl+C to exit");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received shutdown signal");
        }
        Err(e) => {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    }

    // Receivers may already be gone if every device failed
    let _ = stop_tx.send(true);
    for supervisor in supervisors {
        let _ = supervisor.await;
    }

    tracing::info!("braviad shutdown complete");

    Ok(())
}

fn create_device(
    config: &Config,
    host: &str,
    node: &str,
) -> anyhow::Result<Device<BraviaClient, RumqttcClient>> {
    let client = BraviaClient::new(host, &config.bravia.psk, config.bravia.request_timeout)
        .context("Failed to create Bravia client")?;
    let bus = RumqttcClient::new(&config.mqtt, format!("braviad-{}-{}", node, host))
        .context("Failed to create MQTT client")?;
    let topics = Topics::new(&config.bravia.topic_root, host);

    Ok(Device::new(
        host,
        topics,
        client,
        bus,
        DeviceSettings::from(&config.bravia),
    ))
}
