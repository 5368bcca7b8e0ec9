use anyhow::Result;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use zbus::object_server::InterfaceRef;

mod config;
mod dbus_interface;
mod engine;

use config::{BusKind, Config};
use dbus_interface::{CameraService, BUS_NAME, OBJECT_PATH};
use engine::Output;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("ae400d starting");

    let config = Config::load()?;
    let driver = config.build_driver()?;
    tracing::info!(driver = driver.name(), bus = ?config.bus, "driver ready");

    let (engine, outputs, thread) = engine::spawn_engine(driver, &config.camera)?;

    let bus = config.bus;
    let service = CameraService::new(engine.clone());
    let ((_conn, forwarder), thread) = engine::setup_or_stop(&engine, thread, async move {
        let builder = match bus {
            BusKind::System => zbus::connection::Builder::system()?,
            BusKind::Session => zbus::connection::Builder::session()?,
        };
        let conn = builder
            .name(BUS_NAME)?
            .serve_at(OBJECT_PATH, service)?
            .build()
            .await?;
        let iface = conn
            .object_server()
            .interface::<_, CameraService>(OBJECT_PATH)
            .await?;
        let forwarder = tokio::spawn(forward_outputs(outputs, iface));
        Ok::<_, zbus::Error>((conn, forwarder))
    })
    .await?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "ae400d ready");

    let waited = tokio::signal::ctrl_c().await;
    tracing::info!("ae400d shutting down");

    forwarder.abort();
    engine::stop_engine(&engine, thread).await?;
    waited?;

    Ok(())
}

/// Turn engine outputs into D-Bus signals.
async fn forward_outputs(
    mut outputs: broadcast::Receiver<Output>,
    iface: InterfaceRef<CameraService>,
) {
    loop {
        match outputs.recv().await {
            Ok(Output::Bundle(bundle)) => {
                if let Err(e) = CameraService::bundle_published(
                    iface.signal_emitter(),
                    bundle.group.as_str(),
                    bundle.timestamp_ns,
                    bundle.channels.len() as u32,
                )
                .await
                {
                    tracing::warn!(error = %e, "failed to emit BundlePublished");
                }
            }
            Ok(Output::StaticPose { .. }) | Ok(Output::Imu(_)) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "signal forwarder lagging; outputs dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
