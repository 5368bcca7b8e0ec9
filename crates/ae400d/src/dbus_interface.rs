use crate::engine::{EngineError, EngineHandle};
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.ae400.Camera1";
pub const OBJECT_PATH: &str = "/org/ae400/Camera1";

/// D-Bus interface for the AE400 camera daemon.
///
/// Bus name: org.ae400.Camera1
/// Object path: /org/ae400/Camera1
pub struct CameraService {
    engine: EngineHandle,
}

impl CameraService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

fn failed(err: EngineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(err.to_string())
}

#[interface(name = "org.ae400.Camera1")]
impl CameraService {
    /// Device identity, enabled streams and capture counters as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(failed)?;
        let mut json = serde_json::to_value(&status)
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        json["version"] = env!("CARGO_PKG_VERSION").into();
        Ok(json.to_string())
    }

    /// Toggle auto exposure; applied on the next capture cycle.
    async fn set_auto_exposure(&self, enabled: bool) -> zbus::fdo::Result<()> {
        tracing::info!(enabled, "SetAutoExposure requested");
        self.engine.set_auto_exposure(enabled).await.map_err(failed)
    }

    /// Right-to-left infrared transform as JSON `{rotation, translation}`.
    async fn ir_extrinsics(&self) -> zbus::fdo::Result<String> {
        let pose = self
            .engine
            .ir_extrinsics()
            .await
            .map_err(failed)?
            .ok_or_else(|| {
                zbus::fdo::Error::NotSupported("stereo infrared is not enabled".into())
            })?;
        serde_json::to_string(&pose).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Emitted for every published bundle.
    #[zbus(signal)]
    pub async fn bundle_published(
        emitter: &SignalEmitter<'_>,
        group: &str,
        timestamp_ns: i64,
        channels: u32,
    ) -> zbus::Result<()>;
}
