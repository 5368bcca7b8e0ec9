//! Best-effort sensor option application.

use crate::driver::{OptionKind, Sensor};

/// What happened to a requested option write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionOutcome {
    Applied,
    /// The sensor does not expose this option; nothing was sent.
    Unsupported,
    /// The driver refused the value; a warning was logged.
    Rejected,
}

/// Set `option` to `value` on `sensor`, never failing.
///
/// Devices are configured by pushing every option to every sensor, so a
/// sensor lacking an option is normal and silently skipped. A rejected value
/// is logged together with the option's valid range.
pub fn apply(sensor: &mut dyn Sensor, option: OptionKind, value: f32) -> OptionOutcome {
    if !sensor.supports(option) {
        return OptionOutcome::Unsupported;
    }

    let err = match sensor.set_option(option, value) {
        Ok(()) => {
            tracing::debug!(sensor = sensor.name(), %option, value, "sensor option set");
            return OptionOutcome::Applied;
        }
        Err(err) => err,
    };

    match sensor.option_range(option) {
        Ok(range) => tracing::warn!(
            sensor = sensor.name(),
            %option,
            value,
            min = range.min,
            max = range.max,
            default = range.default,
            step = range.step,
            error = %err,
            "failed to set sensor option"
        ),
        Err(range_err) => tracing::warn!(
            sensor = sensor.name(),
            %option,
            value,
            error = %err,
            range_error = %range_err,
            "failed to set sensor option; valid range unavailable"
        ),
    }
    OptionOutcome::Rejected
}

/// Encode a boolean control the way the driver expects it.
pub fn flag(enabled: bool) -> f32 {
    if enabled {
        1.0
    } else {
        0.0
    }
}
