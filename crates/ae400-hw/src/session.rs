//! Device discovery and pre-start configuration.

use crate::camera::CameraError;
use crate::driver::{
    Device, DeviceInfo, Driver, DriverError, OptionKind, Pipeline, Sensor, StreamRequest,
};
use crate::options::{self, flag};

/// Which enumerated device to open.
///
/// A non-empty serial wins over the index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSelector {
    pub index: usize,
    pub serial: Option<String>,
}

impl DeviceSelector {
    pub fn index(index: usize) -> Self {
        Self {
            index,
            serial: None,
        }
    }

    pub fn serial(serial: impl Into<String>) -> Self {
        Self {
            index: 0,
            serial: Some(serial.into()),
        }
    }

    fn serial_filter(&self) -> Option<&str> {
        self.serial.as_deref().filter(|s| !s.is_empty())
    }
}

/// Identity of the opened device, fixed for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Position in the enumeration at open time.
    pub index: usize,
    pub serial: String,
    pub name: String,
    pub product_line: String,
    pub firmware_version: String,
    pub recommended_firmware_version: String,
}

impl DeviceDescriptor {
    pub fn firmware_mismatch(&self) -> bool {
        self.firmware_version != self.recommended_firmware_version
    }
}

/// Controls that must be written before capture starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitialOptions {
    pub frame_queue_size: u32,
    pub auto_exposure_priority: bool,
    pub emitter_enabled: bool,
    /// Milliwatts; only written when the emitter is enabled.
    pub laser_power: u32,
}

/// An opened device. Owns the host-side device handle until [`Session::close`].
pub struct Session {
    descriptor: DeviceDescriptor,
    device: Box<dyn Device>,
    closed: bool,
}

impl Session {
    /// Enumerate devices through `driver` and open the one `selector` names.
    pub fn open(driver: &mut dyn Driver, selector: &DeviceSelector) -> Result<Self, CameraError> {
        let mut devices = driver.query_devices()?;
        if devices.is_empty() {
            return Err(CameraError::DeviceNotFound(
                "no device connected, please connect a camera".into(),
            ));
        }

        let index = match selector.serial_filter() {
            Some(serial) => devices
                .iter()
                .position(|d| d.info().serial == serial)
                .ok_or_else(|| {
                    CameraError::DeviceNotFound(format!(
                        "no device with serial {serial} among {} connected",
                        devices.len()
                    ))
                })?,
            None if selector.index < devices.len() => selector.index,
            None => {
                return Err(CameraError::Configuration(format!(
                    "device index {} out of range, {} device(s) connected",
                    selector.index,
                    devices.len()
                )))
            }
        };

        let device = devices.swap_remove(index);
        let info = device.info();
        let descriptor = DeviceDescriptor {
            index,
            serial: info.serial.clone(),
            name: info.name.clone(),
            product_line: info.product_line.clone(),
            firmware_version: info.firmware_version.clone(),
            recommended_firmware_version: info.recommended_firmware_version.clone(),
        };

        tracing::info!(
            driver = driver.name(),
            index,
            serial = %descriptor.serial,
            name = %descriptor.name,
            firmware = %descriptor.firmware_version,
            "opened device"
        );

        if descriptor.firmware_mismatch() {
            tracing::warn!(
                recommended = %descriptor.recommended_firmware_version,
                current = %descriptor.firmware_version,
                "device firmware differs from the recommended version"
            );
        }

        Ok(Self {
            descriptor,
            device,
            closed: false,
        })
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Identification as the driver reports it.
    pub fn info(&self) -> &DeviceInfo {
        self.device.info()
    }

    pub fn sensors_mut(&mut self) -> &mut [Box<dyn Sensor>] {
        self.device.sensors_mut()
    }

    /// Push the pre-start controls to every sensor.
    ///
    /// Some options only take effect before streaming begins.
    pub fn configure(&mut self, initial: &InitialOptions) {
        for sensor in self.device.sensors_mut() {
            let sensor = sensor.as_mut();
            options::apply(
                sensor,
                OptionKind::FramesQueueSize,
                initial.frame_queue_size as f32,
            );
            options::apply(
                sensor,
                OptionKind::AutoExposurePriority,
                flag(initial.auto_exposure_priority),
            );
            options::apply(
                sensor,
                OptionKind::EmitterEnabled,
                flag(initial.emitter_enabled),
            );
            if initial.emitter_enabled {
                options::apply(sensor, OptionKind::LaserPower, initial.laser_power as f32);
            }
        }
    }

    pub(crate) fn start(
        &mut self,
        streams: &[StreamRequest],
    ) -> Result<Box<dyn Pipeline>, DriverError> {
        self.device.start(streams)
    }

    /// Release the device handle. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        match self.device.release() {
            Ok(()) => tracing::debug!(serial = %self.descriptor.serial, "device released"),
            Err(e) => tracing::warn!(
                serial = %self.descriptor.serial,
                error = %e,
                "device release failed"
            ),
        }
    }
}
