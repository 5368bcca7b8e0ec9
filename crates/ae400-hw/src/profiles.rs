//! Device profile database.
//!
//! Maps a camera variant to the stream groups it exposes and the channels
//! inside each group. Profile files are embedded at compile time from
//! `contrib/hw/*.toml`.

use crate::driver::DeviceInfo;
use ae400_core::{ChannelKind, StreamGroup};
use serde::Deserialize;
use std::sync::OnceLock;
use thiserror::Error;

/// Extended variant: color/depth, stereo infrared and motion.
const PROFILE_AE400: &str = include_str!("../../../contrib/hw/ae400.toml");
/// Plain stereo depth variant.
const PROFILE_D400: &str = include_str!("../../../contrib/hw/d400.toml");

static PROFILE_DB: OnceLock<Vec<DeviceProfile>> = OnceLock::new();

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("bad profile TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("channel {0} listed in more than one group")]
    DuplicateChannel(ChannelKind),
    #[error("group {0} declared twice")]
    DuplicateGroup(StreamGroup),
    #[error("group {0} has no channels")]
    EmptyGroup(StreamGroup),
}

/// Top-level profile file structure (one per `contrib/hw/*.toml`).
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceProfile {
    pub device: ProfileDevice,
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
}

/// Identification fields from the `[device]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileDevice {
    pub name: String,
    /// Substrings matched against the reported product line and name.
    pub product_match: Vec<String>,
    #[serde(default)]
    pub motion: bool,
}

/// One logical stream group and its channels, in timestamp priority order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GroupSpec {
    pub group: StreamGroup,
    pub channels: Vec<ChannelKind>,
}

impl DeviceProfile {
    /// Parse and validate a profile.
    pub fn from_toml(src: &str) -> Result<Self, ProfileError> {
        let profile: Self = toml::from_str(src)?;

        let mut seen_groups = Vec::new();
        let mut seen_channels = Vec::new();
        for spec in &profile.groups {
            if seen_groups.contains(&spec.group) {
                return Err(ProfileError::DuplicateGroup(spec.group));
            }
            seen_groups.push(spec.group);
            if spec.channels.is_empty() {
                return Err(ProfileError::EmptyGroup(spec.group));
            }
            for &channel in &spec.channels {
                if seen_channels.contains(&channel) {
                    return Err(ProfileError::DuplicateChannel(channel));
                }
                seen_channels.push(channel);
            }
        }
        Ok(profile)
    }

    pub fn name(&self) -> &str {
        &self.device.name
    }

    pub fn supports_motion(&self) -> bool {
        self.device.motion
    }

    pub fn group_of(&self, channel: ChannelKind) -> Option<StreamGroup> {
        self.groups
            .iter()
            .find(|g| g.channels.contains(&channel))
            .map(|g| g.group)
    }

    pub fn supports(&self, channel: ChannelKind) -> bool {
        self.group_of(channel).is_some()
    }

    fn matches(&self, info: &DeviceInfo) -> bool {
        self.device
            .product_match
            .iter()
            .any(|m| info.product_line.contains(m.as_str()) || info.name.contains(m.as_str()))
    }
}

fn profile_db() -> &'static Vec<DeviceProfile> {
    PROFILE_DB.get_or_init(|| {
        let mut db = Vec::new();
        for src in [PROFILE_AE400, PROFILE_D400] {
            match DeviceProfile::from_toml(src) {
                Ok(p) => db.push(p),
                Err(e) => tracing::error!(error = %e, "skipping embedded device profile"),
            }
        }
        db
    })
}

/// Find the profile describing `info`.
pub fn lookup_profile(info: &DeviceInfo) -> Option<&'static DeviceProfile> {
    profile_db().iter().find(|p| p.matches(info))
}

/// Profile for `info`, falling back to the first embedded profile (AE400).
pub fn profile_for(info: &DeviceInfo) -> Option<&'static DeviceProfile> {
    if let Some(p) = lookup_profile(info) {
        return Some(p);
    }
    let fallback = profile_db().first()?;
    tracing::warn!(
        name = %info.name,
        product_line = %info.product_line,
        fallback = fallback.name(),
        "no device profile matches; using fallback layout"
    );
    Some(fallback)
}

/// List all known profiles.
pub fn list_profiles() -> &'static [DeviceProfile] {
    profile_db()
}
