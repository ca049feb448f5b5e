mod telemetry;

use clap::Parser;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::Duration;
use tracing::{error, info, warn};

/// Publishes synthetic typed telemetry for a fleet of fake devices.
#[derive(Parser, Debug)]
#[command(name = "simulator")]
struct Args {
    /// MQTT broker host
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    /// MQTT broker port
    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    /// Messages per second across all devices
    #[arg(long, env = "RATE", default_value_t = 100)]
    rate: u64,

    /// Number of simulated devices
    #[arg(long, env = "DEVICES", default_value_t = 10)]
    devices: u64,

    /// Device id prefix; device ids are <prefix>-0 .. <prefix>-N
    #[arg(long, env = "DEVICE_PREFIX", default_value = "dev")]
    device_prefix: String,
}

const BURST_SIZE: u64 = 50;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Starting telemetry simulator");
    info!(
        "Broker: {}:{}, Rate: {} msg/s, Devices: {}",
        args.broker, args.port, args.rate, args.devices
    );

    // Connect to MQTT broker
    let client_id = format!("simulator-{}", uuid::Uuid::new_v4());
    let mut mqtt_options = MqttOptions::new(&client_id, &args.broker, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 20000);

    // Spawn eventloop handler
    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                error!("MQTT eventloop error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(2)).await;

    info!("Connected to MQTT broker, starting to publish telemetry");

    let mut rng = rand::thread_rng();
    let mut counter = 0u64;
    let burst_interval = Duration::from_millis(BURST_SIZE * 1000 / args.rate.max(1));

    info!(
        "Publishing in bursts of {} messages every {:?}",
        BURST_SIZE, burst_interval
    );

    loop {
        let burst_start = std::time::Instant::now();

        for _ in 0..BURST_SIZE {
            let device_id = format!("{}-{}", args.device_prefix, counter % args.devices.max(1));
            let payload = telemetry::sample(&mut rng, counter);

            let topic = format!("devices/{}/telemetry", device_id);
            let body = match serde_json::to_string(&payload) {
                Ok(b) => b,
                Err(e) => {
                    error!("Failed to serialize payload: {}", e);
                    continue;
                }
            };

            match client.publish(&topic, QoS::AtLeastOnce, false, body).await {
                Ok(_) => {
                    counter += 1;
                }
                Err(e) => {
                    warn!("Failed to publish: {}", e);
                }
            }

            // Occasional liveness report on the status topic
            if counter % 97 == 0 {
                let status_topic = format!("devices/{}/status", device_id);
                if let Err(e) = client
                    .publish(&status_topic, QoS::AtLeastOnce, false, r#"{"status":"ONLINE"}"#)
                    .await
                {
                    warn!("Failed to publish status: {}", e);
                }
            }
        }

        // Log progress periodically
        if counter % 10_000 == 0 {
            info!("Published {} messages", counter);
        }

        let elapsed = burst_start.elapsed();
        if elapsed < burst_interval {
            tokio::time::sleep(burst_interval - elapsed).await;
        } else if elapsed > burst_interval * 2 {
            warn!(
                "Burst took {:?}, target was {:?} - publisher is falling behind",
                elapsed, burst_interval
            );
        }
    }
}
