use ae400_core::{ChannelKind, FrameBundle, ImuSample, Pose3};
use ae400_hw::{Camera, CameraConfig, CameraError, Driver, MonotonicClock, Publisher};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, oneshot};

/// How long the loop rests when a cycle produced nothing to wait on.
const IDLE_POLL: Duration = Duration::from_millis(100);
const OUTPUT_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("engine thread panicked")]
    Panicked,
}

/// Everything the camera publishes, fanned out to subscribers.
#[derive(Debug, Clone)]
pub enum Output {
    Bundle(Arc<FrameBundle>),
    StaticPose {
        from: ChannelKind,
        to: ChannelKind,
        pose: Pose3,
    },
    Imu(ImuSample),
}

/// Snapshot of the engine, as reported over D-Bus.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStatus {
    pub serial: String,
    pub name: String,
    pub firmware: String,
    pub profile: String,
    pub streams: String,
    pub auto_exposure: bool,
    pub active: bool,
    pub bundles: u64,
    pub imu_samples: u64,
    pub timeouts: u64,
    pub errors: u64,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    SetAutoExposure {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
    IrExtrinsics {
        reply: oneshot::Sender<Option<Pose3>>,
    },
    Shutdown,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Status { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn set_auto_exposure(&self, enabled: bool) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::SetAutoExposure { enabled, reply })
            .await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Right-to-left infrared transform, `None` if stereo infrared is off.
    pub async fn ir_extrinsics(&self) -> Result<Option<Pose3>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::IrExtrinsics { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Ask the engine to stop the camera and exit.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.send(EngineRequest::Shutdown).await
    }

    async fn send(&self, req: EngineRequest) -> Result<(), EngineError> {
        self.tx
            .send(req)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }
}

/// Publisher that forwards to a broadcast channel and keeps counts.
struct BroadcastSink {
    tx: broadcast::Sender<Output>,
    bundles: u64,
    imu_samples: u64,
}

impl BroadcastSink {
    fn send(&self, output: Output) {
        // No subscribers is not an error.
        let _ = self.tx.send(output);
    }
}

impl Publisher for BroadcastSink {
    fn publish_bundle(&mut self, bundle: FrameBundle) {
        self.bundles += 1;
        self.send(Output::Bundle(Arc::new(bundle)));
    }

    fn publish_static_pose(&mut self, from: ChannelKind, to: ChannelKind, pose: Pose3) {
        tracing::info!(%from, %to, translation = ?pose.translation, "static transform published");
        self.send(Output::StaticPose { from, to, pose });
    }

    fn publish_imu(&mut self, sample: ImuSample) {
        self.imu_samples += 1;
        self.send(Output::Imu(sample));
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Opens the camera synchronously so startup fails fast, then runs the
/// capture loop, servicing requests between cycles.
pub fn spawn_engine(
    mut driver: Box<dyn Driver>,
    config: &CameraConfig,
) -> Result<(EngineHandle, broadcast::Receiver<Output>, JoinHandle<()>), EngineError> {
    let camera = Camera::open(driver.as_mut(), config, Box::new(MonotonicClock))?;
    let descriptor = camera.descriptor();
    tracing::info!(
        serial = %descriptor.serial,
        name = %descriptor.name,
        profile = camera.profile().name(),
        streams = %camera.enabled_streams(),
        "camera opened"
    );

    let (tx, rx) = mpsc::channel::<EngineRequest>(4);
    let (out_tx, out_rx) = broadcast::channel(OUTPUT_CAPACITY);
    let sink = BroadcastSink {
        tx: out_tx,
        bundles: 0,
        imu_samples: 0,
    };

    let thread = std::thread::Builder::new()
        .name("ae400-engine".into())
        .spawn(move || run(camera, sink, rx))?;

    Ok((EngineHandle { tx }, out_rx, thread))
}

/// Ask the engine to exit and wait until its thread has stopped the camera.
pub async fn stop_engine(engine: &EngineHandle, thread: JoinHandle<()>) -> Result<(), EngineError> {
    if let Err(e) = engine.shutdown().await {
        tracing::warn!(error = %e, "engine already gone");
    }
    tokio::task::spawn_blocking(move || thread.join())
        .await
        .map_err(|_| EngineError::Panicked)?
        .map_err(|_| EngineError::Panicked)
}

/// Run `setup` against a live engine. On failure the engine is stopped
/// before the error is returned, so the device is never left streaming.
pub async fn setup_or_stop<T, E>(
    engine: &EngineHandle,
    thread: JoinHandle<()>,
    setup: impl Future<Output = Result<T, E>>,
) -> Result<(T, JoinHandle<()>), E>
where
    E: std::fmt::Display,
{
    match setup.await {
        Ok(value) => Ok((value, thread)),
        Err(e) => {
            tracing::error!(error = %e, "startup failed; stopping engine");
            if let Err(stop_err) = stop_engine(engine, thread).await {
                tracing::warn!(error = %stop_err, "engine did not stop cleanly");
            }
            Err(e)
        }
    }
}

#[derive(Default)]
struct Counters {
    timeouts: u64,
    errors: u64,
}

fn run(mut camera: Camera, mut sink: BroadcastSink, mut rx: mpsc::Receiver<EngineRequest>) {
    tracing::info!("engine thread started");
    let mut counters = Counters::default();
    let idle = camera.enabled_streams().is_empty();

    'outer: loop {
        loop {
            match rx.try_recv() {
                Ok(EngineRequest::Shutdown) => break 'outer,
                Ok(req) => handle(&mut camera, &sink, &counters, req),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'outer,
            }
        }

        match camera.tick(&mut sink) {
            Ok(report) => {
                tracing::trace!(bundles = report.bundles, imu = report.imu, "cycle");
                if idle {
                    std::thread::sleep(IDLE_POLL);
                }
            }
            Err(CameraError::FrameTimeout(_)) => counters.timeouts += 1,
            Err(e) => {
                counters.errors += 1;
                tracing::error!(error = %e, "capture cycle failed");
                std::thread::sleep(IDLE_POLL);
            }
        }
    }

    camera.stop();
    tracing::info!(
        bundles = sink.bundles,
        timeouts = counters.timeouts,
        errors = counters.errors,
        "engine thread exiting"
    );
}

fn handle(camera: &mut Camera, sink: &BroadcastSink, counters: &Counters, req: EngineRequest) {
    match req {
        EngineRequest::Status { reply } => {
            let d = camera.descriptor();
            let _ = reply.send(EngineStatus {
                serial: d.serial.clone(),
                name: d.name.clone(),
                firmware: d.firmware_version.clone(),
                profile: camera.profile().name().to_string(),
                streams: camera.enabled_streams().to_string(),
                auto_exposure: camera.auto_exposure(),
                active: camera.is_active(),
                bundles: sink.bundles,
                imu_samples: sink.imu_samples,
                timeouts: counters.timeouts,
                errors: counters.errors,
            });
        }
        EngineRequest::SetAutoExposure { enabled, reply } => {
            tracing::info!(enabled, "auto exposure change requested");
            camera.set_auto_exposure(enabled);
            let _ = reply.send(());
        }
        EngineRequest::IrExtrinsics { reply } => {
            let _ = reply.send(camera.ir_extrinsics());
        }
        EngineRequest::Shutdown => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ae400_hw::sim::{SimDevice, SimDriver, SimEvent};
    use ae400_hw::StreamSettings;

    fn driver() -> Box<dyn Driver> {
        Box::new(SimDriver::new().with_device(SimDevice::ae400("SN1")))
    }

    fn config(enable_ir_stereo: bool) -> CameraConfig {
        CameraConfig {
            streams: StreamSettings {
                rows: 4,
                cols: 6,
                enable_ir_stereo,
                ..StreamSettings::default()
            },
            ..CameraConfig::default()
        }
    }

    #[test]
    fn test_spawn_fails_fast_without_device() {
        let result = spawn_engine(Box::new(SimDriver::new()), &config(false));
        assert!(matches!(
            result,
            Err(EngineError::Camera(CameraError::DeviceNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_requests_round_trip() {
        let (engine, _out, thread) = spawn_engine(driver(), &config(true)).unwrap();

        let status = engine.status().await.unwrap();
        assert_eq!(status.serial, "SN1");
        assert_eq!(status.profile, "AE400");
        assert!(status.auto_exposure);

        engine.set_auto_exposure(false).await.unwrap();
        assert!(!engine.status().await.unwrap().auto_exposure);

        let pose = engine.ir_extrinsics().await.unwrap().unwrap();
        assert!(pose.translation[0] > 0.0);

        engine.shutdown().await.unwrap();
        tokio::task::spawn_blocking(move || thread.join())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            engine.status().await,
            Err(EngineError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_failed_setup_tears_down_camera() {
        let device = SimDevice::ae400("SN1").realtime(true);
        let log = device.log();
        let driver = Box::new(SimDriver::new().with_device(device));
        let (engine, _out, thread) = spawn_engine(driver, &config(false)).unwrap();

        let result = setup_or_stop(&engine, thread, async {
            Err::<(), _>("system bus unavailable")
        })
        .await;

        assert_eq!(result.err(), Some("system bus unavailable"));
        let events = log.events();
        assert!(events.contains(&SimEvent::StopAttempted));
        assert!(events.contains(&SimEvent::ReleaseAttempted));
        assert!(matches!(
            engine.status().await,
            Err(EngineError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_successful_setup_keeps_engine_running() {
        let (engine, _out, thread) = spawn_engine(driver(), &config(false)).unwrap();

        let (value, thread) = setup_or_stop(&engine, thread, async { Ok::<_, String>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert!(engine.status().await.unwrap().active);

        stop_engine(&engine, thread).await.unwrap();
    }

    #[tokio::test]
    async fn test_outputs_broadcast() {
        // Paced so the receiver never lags behind the channel.
        let paced = SimDriver::new().with_device(SimDevice::ae400("SN1").realtime(true));
        let (engine, mut out, thread) = spawn_engine(Box::new(paced), &config(true)).unwrap();

        let mut saw_pose = false;
        let mut saw_bundle = false;
        while !(saw_pose && saw_bundle) {
            match out.recv().await.unwrap() {
                Output::StaticPose { from, .. } => {
                    assert_eq!(from, ChannelKind::InfraredRight);
                    saw_pose = true;
                }
                Output::Bundle(bundle) => {
                    assert!(!bundle.channels.is_empty());
                    saw_bundle = true;
                }
                Output::Imu(_) => {}
            }
        }

        engine.shutdown().await.unwrap();
        tokio::task::spawn_blocking(move || thread.join())
            .await
            .unwrap()
            .unwrap();
    }
}
