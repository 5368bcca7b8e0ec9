use ae400_core::{ChannelImage, ChannelKind, DepthImage, DepthRange, Pose3, StreamGroup};
use ae400_hw::profiles::list_profiles;
use ae400_hw::sim::{CollectingPublisher, SimDevice, SimDriver};
use ae400_hw::{Camera, CameraConfig, CameraError, MonotonicClock, StreamSettings};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use image::{GrayImage, Luma};
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.ae400.Camera1",
    default_service = "org.ae400.Camera1",
    default_path = "/org/ae400/Camera1"
)]
trait Camera1 {
    async fn status(&self) -> zbus::Result<String>;
    async fn set_auto_exposure(&self, enabled: bool) -> zbus::Result<()>;
    async fn ir_extrinsics(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "ae400", about = "AE400 stereo depth camera CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[derive(Clone, Copy, ValueEnum)]
enum Model {
    Ae400,
    D400,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Switch auto exposure on the running camera
    AutoExposure {
        #[arg(value_enum)]
        state: Toggle,
    },
    /// Print the right-to-left infrared extrinsics
    Extrinsics,
    /// List the embedded device profiles
    Profiles,
    /// Capture from a simulated camera and save the last frames as PNG
    Test {
        #[arg(long, value_enum, default_value = "ae400")]
        model: Model,
        /// Capture cycles to run
        #[arg(short, long, default_value_t = 5)]
        frames: usize,
        /// Also stream the infrared pair
        #[arg(long)]
        ir: bool,
        /// Align depth to the color stream
        #[arg(long)]
        align: bool,
        /// Directory for the PNG files
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status => {
            let proxy = connect(cli.session).await?;
            let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::AutoExposure { state } => {
            let enabled = matches!(state, Toggle::On);
            connect(cli.session).await?.set_auto_exposure(enabled).await?;
            println!("auto exposure {}", if enabled { "on" } else { "off" });
        }
        Commands::Extrinsics => {
            let json = connect(cli.session).await?.ir_extrinsics().await?;
            let pose: Pose3 = serde_json::from_str(&json)?;
            print_pose(&pose);
        }
        Commands::Profiles => {
            for profile in list_profiles() {
                println!(
                    "{:<8} matches {:?}, motion: {}",
                    profile.name(),
                    profile.device.product_match,
                    if profile.supports_motion() { "yes" } else { "no" }
                );
                for group in &profile.groups {
                    let channels: Vec<&str> = group.channels.iter().map(|c| c.as_str()).collect();
                    println!("  {:<16} {}", group.group.as_str(), channels.join(", "));
                }
            }
        }
        Commands::Test {
            model,
            frames,
            ir,
            align,
            out,
        } => run_test(model, frames, ir, align, &out)?,
    }

    Ok(())
}

async fn connect(session: bool) -> Result<Camera1Proxy<'static>> {
    let conn = if session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("connecting to D-Bus")?;
    Ok(Camera1Proxy::new(&conn).await?)
}

fn print_pose(pose: &Pose3) {
    println!("rotation:");
    for row in &pose.rotation {
        println!("  [{:>9.6} {:>9.6} {:>9.6}]", row[0], row[1], row[2]);
    }
    let t = pose.translation;
    println!("translation (m): [{:.6} {:.6} {:.6}]", t[0], t[1], t[2]);
    // Right camera origin seen from the left camera.
    let origin = pose.transform_point([0.0; 3]);
    let baseline = origin.iter().map(|v| v * v).sum::<f32>().sqrt();
    println!("baseline: {:.1} mm", baseline * 1000.0);
}

/// Direct capture against the simulated backend, bypassing the daemon.
fn run_test(model: Model, frames: usize, ir: bool, align: bool, out: &Path) -> Result<()> {
    let device = match model {
        Model::Ae400 => SimDevice::ae400("SIM-TEST"),
        Model::D400 => SimDevice::d400("SIM-TEST"),
    };
    let mut driver = SimDriver::new().with_device(device);
    let config = CameraConfig {
        align_to_color: align,
        streams: StreamSettings {
            enable_ir_stereo: ir,
            ..StreamSettings::default()
        },
        ..CameraConfig::default()
    };

    println!("Running capture diagnostics ({frames} cycles)...");
    let mut camera = Camera::open(&mut driver, &config, Box::new(MonotonicClock))?;
    let d = camera.descriptor();
    println!(
        "device: {} serial {} firmware {} (profile {})",
        d.name,
        d.serial,
        d.firmware_version,
        camera.profile().name()
    );
    println!("streams: {}", camera.enabled_streams());

    let mut sink = CollectingPublisher::default();
    let mut timeouts = 0usize;
    for _ in 0..frames {
        match camera.tick(&mut sink) {
            Ok(_) => {}
            Err(CameraError::FrameTimeout(_)) => timeouts += 1,
            Err(e) => return Err(e.into()),
        }
    }
    camera.stop();

    for bundle in &sink.bundles {
        let kinds: Vec<&str> = bundle.channels.iter().map(|c| c.kind.as_str()).collect();
        println!(
            "{:<16} t={} ns  [{}]",
            bundle.group.as_str(),
            bundle.timestamp_ns,
            kinds.join(", ")
        );
    }
    for (from, to, pose) in &sink.static_poses {
        println!("static transform {from} -> {to}:");
        print_pose(pose);
    }
    if let Some(sample) = sink.imu.last() {
        println!(
            "imu: t={:.3}s accel={:?} gyro={:?} ({} samples)",
            sample.timestamp_s,
            sample.accel,
            sample.gyro,
            sink.imu.len()
        );
    }
    println!("timeouts: {timeouts}");

    std::fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    for group in [StreamGroup::ColorDepth, StreamGroup::StereoInfrared] {
        let Some(bundle) = sink.bundles.iter().rev().find(|b| b.group == group) else {
            continue;
        };
        for channel in &bundle.channels {
            let path = out.join(format!("ae400-{}.png", channel.kind.as_str()));
            match (&channel.image, bundle.depth_range) {
                (ChannelImage::Rgb(img), _) => img.save(&path)?,
                (ChannelImage::Gray(img), _) => img.save(&path)?,
                (ChannelImage::Depth(img), Some(range)) => depth_preview(img, range).save(&path)?,
                (ChannelImage::Depth(_), None) => continue,
            }
            println!("saved {} ({})", path.display(), channel_label(channel.kind));
        }
    }

    Ok(())
}

fn channel_label(kind: ChannelKind) -> &'static str {
    match kind {
        ChannelKind::Color => "rgb8",
        ChannelKind::Depth => "depth preview, near is bright",
        ChannelKind::InfraredLeft | ChannelKind::InfraredRight => "y8",
    }
}

/// Map metres onto 8-bit gray within `range`, near bright and far dark.
/// Zero depth (no data) stays black.
fn depth_preview(depth: &DepthImage, range: DepthRange) -> GrayImage {
    let span = (range.max_meters - range.min_meters).max(f32::EPSILON);
    GrayImage::from_fn(depth.width(), depth.height(), |x, y| {
        let m = depth.get_pixel(x, y).0[0];
        if m <= 0.0 {
            return Luma([0]);
        }
        let t = ((m - range.min_meters) / span).clamp(0.0, 1.0);
        Luma([(255.0 * (1.0 - t)).round() as u8])
    })
}
