use std::sync::Arc;

use anyhow::{Context, Result};
use booking::LabTimezone;
use futures::StreamExt;
use tokio::{net::TcpListener, sync::watch};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use kiosk::{
    SessionManager,
    config::KioskConfig,
    device::DeviceRegistry,
    persist::JsonFile,
    remote::HttpBackend,
    rpc::{self, KioskState},
    session::RemoteCheck,
    subscription::{self, NetworkStatus, ReservationSnapshot},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    info!("Starting kiosk");

    let config = KioskConfig::load().context("invalid configuration")?;
    let timezone = LabTimezone::from_offset_minutes(config.lab_utc_offset_minutes)
        .context("invalid lab UTC offset")?;
    let backend = HttpBackend::new(
        &config.backend_url,
        &config.auth_url,
        config.request_timeout(),
    )?;
    let remote = Arc::new(backend.clone());

    let device = Arc::new(DeviceRegistry::new(
        JsonFile::new(config.device_file()),
        remote.clone(),
        config.backend_url.clone(),
        config.suggested_number,
    ));
    match device.ensure_registered(config.lab_id).await {
        Ok(identity) => {
            device
                .check_bindable(&identity)
                .context("set KIOSK_SUGGESTED_NUMBER for free-mode labs")?;
            info!(
                "Device {} ready in lab {} (number {:?}, free mode {})",
                identity.device_id, config.lab_id, identity.device_number, identity.free_mode
            );
        }
        Err(e) => warn!("Registration deferred, login stays disabled: {}", e),
    }

    let sessions = Arc::new(SessionManager::new(
        JsonFile::new(config.session_file()),
        remote.clone(),
        remote.clone(),
        device.clone(),
    ));
    match sessions.boot().await {
        Ok(booted) => info!("Session state after boot: {:?}", booted.state),
        Err(e) => warn!("Session recovery failed, starting at login: {}", e),
    }

    let (network_tx, network) = watch::channel(NetworkStatus::unknown());
    subscription::publish(
        subscription::network_health(backend, config.network_poll()),
        network_tx,
    );

    let (reservations_tx, reservations) = watch::channel(ReservationSnapshot::empty());
    subscription::publish(
        subscription::reservation_sync(
            remote.clone(),
            config.lab_id,
            timezone,
            config.reservation_poll(),
        ),
        reservations_tx,
    );

    let beats = subscription::heartbeat(sessions.clone(), config.heartbeat_poll());
    tokio::spawn(async move {
        let mut beats = std::pin::pin!(beats);
        while let Some(check) = beats.next().await {
            if check == RemoteCheck::Ended {
                info!("Backend ended the session, back to login");
            }
        }
    });

    let app = rpc::create_router(KioskState {
        sessions,
        device,
        lab_id: config.lab_id,
        network,
        reservations,
    });

    let listener = TcpListener::bind(&config.rpc_addr).await?;
    info!("Kiosk RPC listening on {}", config.rpc_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Could not listen for shutdown signal: {}", e);
            }
        })
        .await?;

    info!("Shutting down kiosk");
    Ok(())
}
