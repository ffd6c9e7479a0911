use clap::Parser;
use client::{BroadcastClient, ClientEvent, ConnectionConfig};
use log::{info, warn};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::interval;

#[derive(Parser, Debug)]
#[command(author, version, about = "Registers with the broadcasting interface and logs what it sends", long_about = None)]
struct Args {
    /// Host running the simulator
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Broadcasting port from broadcasting.json
    #[arg(short, long, default_value = "9000")]
    port: u16,

    /// Connection password from broadcasting.json
    #[arg(long, default_value = "asd")]
    password: String,

    /// Command password, if any
    #[arg(long, default_value = "")]
    command_password: String,

    /// Name shown for this connection
    #[arg(short = 'n', long, default_value = "ACCRecorder")]
    display_name: String,

    /// Realtime update interval requested from the peer
    #[arg(short = 'i', long, default_value = "250")]
    update_interval_ms: u32,

    /// Seconds between standings dumps
    #[arg(short = 's', long, default_value = "5")]
    standings_every: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ConnectionConfig {
        host: args.host,
        port: args.port,
        display_name: args.display_name,
        connection_password: args.password,
        command_password: args.command_password,
        update_interval_ms: args.update_interval_ms,
        ..ConnectionConfig::default()
    };

    let mut client = BroadcastClient::new(config);
    let mut events = client.subscribe();
    client.connect().await?;

    let mut standings_interval = interval(Duration::from_secs(args.standings_every.max(1)));

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(ClientEvent::SessionUpdate(session)) => {
                        info!(
                            "{} {:?}, {:.0}s left, track {}°C",
                            session.session_type,
                            session.phase,
                            session.remaining_time_ms / 1000.0,
                            session.weather.track_temp
                        );
                    }
                    Ok(ClientEvent::Broadcasting(event)) => {
                        info!("{:?} car {}: {}", event.kind, event.car_index, event.message);
                    }
                    Ok(ClientEvent::PeerSilent { silent_for }) => {
                        warn!("Peer silent for {:?}", silent_for);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => warn!("Skipped {} events", skipped),
                    Err(RecvError::Closed) => break,
                }
            },

            _ = standings_interval.tick() => {
                for car in client.standings().await {
                    let driver = car.driver_names().into_iter().next().unwrap_or_default();
                    info!(
                        "P{:<2} #{:<3} {:<24} laps {:<3} gap {:>7}ms",
                        car.position, car.race_number, driver, car.laps, car.delta_ms
                    );
                }
            },

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    client.disconnect().await;
    Ok(())
}
