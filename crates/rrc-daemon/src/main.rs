use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use rrc_core::network::PROFILE_REMOTE;
use rrc_core::types::{BindingType, ControllerId, ValidationState, ValidationType};
use rrc_core::{Collaborators, Network, NetworkEvent};
use rrc_daemon::sim::{NullVoice, SimDriver};
use rrc_daemon::DaemonConfig;
use rrc_hal::crypto::HmacKeyDerivation;
use rrc_hal::db::Database;
use rrc_hal::driver::DriverEvent;
use rrc_hal::sqlite::SqliteDatabase;
use rrc_wire::frames::{trigger, HeartbeatFrame};

#[derive(Parser)]
#[command(name = "rrc-daemon")]
#[command(about = "RRC control-plane daemon for RF4CE remote controls")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run a simulated remote through pairing, validation, and heartbeats
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = if let Some(path) = &args.config {
        DaemonConfig::load_from_file(path)?
    } else {
        DaemonConfig::load_from_env()
    };

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "rrc_daemon={level},rrc_core={level},rrc_hal={level}",
            level = args.log_level
        ))
        .init();

    info!("starting rrc-daemon");

    let db: Arc<dyn Database> = match &config.daemon.db_path {
        Some(path) => {
            info!(path = %path.display(), "opening sqlite database");
            Arc::new(SqliteDatabase::new(path)?)
        }
        None => {
            warn!("no db_path configured, state will not survive restart");
            Arc::new(SqliteDatabase::new_in_memory()?)
        }
    };

    // The simulated driver delivers confirmations on this channel the way
    // the vendor driver thread would; the pump below is the only place
    // driver events enter the worker.
    let (driver_tx, mut driver_rx) = mpsc::channel::<DriverEvent>(64);
    let driver = Arc::new(SimDriver::new(driver_tx));

    let handle = Network::spawn(
        config.network_config(),
        Collaborators {
            driver: driver.clone(),
            crypto: Arc::new(HmacKeyDerivation),
            db,
            voice: Arc::new(NullVoice),
        },
    )
    .await?;

    let pump_handle = handle.clone();
    tokio::spawn(async move {
        while let Some(event) = driver_rx.recv().await {
            pump_handle.driver_event(event).await;
        }
    });

    let mut events = handle.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                NetworkEvent::Bound { controller_id, ieee_address } => {
                    info!(controller = %controller_id, ieee = %ieee_address, "remote bound");
                }
                NetworkEvent::Unbound { controller_id, ieee_address, reason } => {
                    info!(controller = %controller_id, ieee = %ieee_address, %reason, "remote unbound");
                }
                NetworkEvent::RibUpdated { identifier, index } => {
                    info!(
                        identifier = format_args!("{:#04x}", identifier),
                        index, "shared configuration updated"
                    );
                }
                NetworkEvent::PairingFailure { ieee_address, reason } => {
                    warn!(ieee = %ieee_address, %reason, "pairing failure");
                }
            }
        }
    });

    if args.simulate {
        let sim_handle = handle.clone();
        let sim_driver = driver.clone();
        let interval = Duration::from_millis(config.polling.idle_delay_ms.max(1) * 100);
        tokio::spawn(async move {
            // One simulated XR15 walks through the whole flow, then checks
            // in periodically.
            sim_driver.discover(0x00124B00_CAFE0001, 0x02).await;
            tokio::time::sleep(Duration::from_millis(200)).await;
            if let Err(e) = sim_handle
                .validate(
                    ControllerId(1),
                    BindingType::Interactive,
                    ValidationType::Application,
                    ValidationState::Success,
                    None,
                    None,
                )
                .await
            {
                warn!(error = %e, "simulated validation failed");
                return;
            }
            let boot = Instant::now();
            loop {
                tokio::time::sleep(interval).await;
                let frame = HeartbeatFrame { trigger: trigger::TIME }.encode().to_vec();
                sim_driver
                    .inject_frame(1, PROFILE_REMOTE, frame, boot.elapsed().as_millis() as u64)
                    .await;
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
