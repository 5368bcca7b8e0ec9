//! ae400-hw — Hardware layer for the AE400 family of stereo depth cameras.
//!
//! Opens a device through the driver traits in [`driver`], writes sensor
//! options, negotiates streams against the embedded device profiles, and
//! turns each frame set into per-group bundles stamped on the host clock.

pub mod camera;
pub mod capture;
pub mod clock;
pub mod driver;
pub mod frame;
pub mod options;
pub mod profiles;
pub mod session;
pub mod sim;
pub mod streams;

pub use camera::{Camera, CameraConfig, CameraError};
pub use capture::{CycleReport, Publisher};
pub use clock::{HostClock, ManualClock, MonotonicClock};
pub use driver::{Driver, DriverError};
pub use profiles::DeviceProfile;
pub use session::DeviceDescriptor;
pub use streams::{EnabledStreams, StreamSettings};
