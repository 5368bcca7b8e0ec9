//! Device-to-host timestamp translation.
//!
//! The camera stamps frames with its own clock, whose epoch can jump at
//! runtime. Each stream group keeps an offset that maps device time onto the
//! host monotonic clock; the offset is re-anchored to "now" whenever the
//! device clock regresses or leaps forward by more than [`MAX_DELTA_NS`].

use crate::types::StreamGroup;
use std::collections::BTreeMap;

/// Largest forward step between consecutive device stamps that is still
/// treated as continuous time.
pub const MAX_DELTA_NS: i64 = 1_000_000_000;

/// Translation state for one stream group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimestampState {
    /// Last raw device stamp seen; `None` until the first frame.
    last_device_ns: Option<i64>,
    /// Added to raw device stamps to produce host-aligned stamps.
    epoch_offset_ns: i64,
}

impl TimestampState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch_offset_ns(&self) -> i64 {
        self.epoch_offset_ns
    }

    pub fn last_device_ns(&self) -> Option<i64> {
        self.last_device_ns
    }

    /// Translate a raw device stamp into host time.
    ///
    /// Returns the host-aligned stamp and whether the offset was re-anchored.
    pub fn translate(&mut self, raw_device_ns: i64, host_now_ns: i64) -> (i64, bool) {
        // A first frame, a regression, or an overflowing gap all count as an epoch jump.
        let delta = self
            .last_device_ns
            .and_then(|last| raw_device_ns.checked_sub(last));
        self.last_device_ns = Some(raw_device_ns);

        let reanchor = match delta {
            Some(d) => !(0..=MAX_DELTA_NS).contains(&d),
            None => true,
        };
        if reanchor {
            self.epoch_offset_ns = host_now_ns.wrapping_sub(raw_device_ns);
        }

        (raw_device_ns.wrapping_add(self.epoch_offset_ns), reanchor)
    }
}

/// Per-group translation state for a capture session.
#[derive(Debug, Default)]
pub struct TimestampSynchronizer {
    groups: BTreeMap<StreamGroup, TimestampState>,
}

impl TimestampSynchronizer {
    /// Create state for each group the session will service.
    pub fn new(groups: impl IntoIterator<Item = StreamGroup>) -> Self {
        Self {
            groups: groups
                .into_iter()
                .map(|g| (g, TimestampState::new()))
                .collect(),
        }
    }

    /// Translate one representative stamp for `group`.
    ///
    /// Groups not registered at construction get fresh state on first use.
    pub fn translate(&mut self, group: StreamGroup, raw_device_ns: i64, host_now_ns: i64) -> i64 {
        let state = self.groups.entry(group).or_default();
        let (aligned, reanchored) = state.translate(raw_device_ns, host_now_ns);
        if reanchored {
            tracing::debug!(
                %group,
                raw_device_ns,
                offset_ns = state.epoch_offset_ns,
                "re-anchored device clock"
            );
        }
        aligned
    }

    pub fn state(&self, group: StreamGroup) -> Option<&TimestampState> {
        self.groups.get(&group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_call_reanchors_to_host_now() {
        for raw in [i64::MIN, -5, 0, 42, i64::MAX] {
            let mut state = TimestampState::new();
            let (aligned, reanchored) = state.translate(raw, 7_000);
            assert!(reanchored);
            assert_eq!(aligned, 7_000, "raw={raw}");
        }
    }

    #[test]
    fn test_continuous_deltas_are_preserved() {
        let mut state = TimestampState::new();
        let raws = [10_000i64, 10_000, 10_250, 500_010_250, 1_500_010_250];
        let mut host = 1_000_000;
        let mut prev: Option<(i64, i64)> = None;

        for raw in raws {
            host += 3; // host time advances independently
            let (aligned, _) = state.translate(raw, host);
            if let Some((prev_raw, prev_aligned)) = prev {
                assert!(aligned >= prev_aligned);
                assert_eq!(aligned - prev_aligned, raw - prev_raw);
            }
            prev = Some((raw, aligned));
        }
    }

    #[test]
    fn test_delta_exactly_max_does_not_reanchor() {
        let mut state = TimestampState::new();
        state.translate(1_000, 50_000);
        let (aligned, reanchored) = state.translate(1_000 + MAX_DELTA_NS, 99_999_999_999);
        assert!(!reanchored);
        assert_eq!(aligned, 50_000 + MAX_DELTA_NS);
    }

    #[test]
    fn test_delta_max_plus_one_reanchors() {
        let mut state = TimestampState::new();
        state.translate(1_000, 50_000);
        let (aligned, reanchored) = state.translate(1_000 + MAX_DELTA_NS + 1, 77_777);
        assert!(reanchored);
        assert_eq!(aligned, 77_777);
    }

    #[test]
    fn test_negative_delta_reanchors() {
        let mut state = TimestampState::new();
        state.translate(5_000, 100);
        let (aligned, reanchored) = state.translate(4_999, 900);
        assert!(reanchored);
        assert_eq!(aligned, 900);
        assert_eq!(state.epoch_offset_ns(), 900 - 4_999);
    }

    #[test]
    fn test_overflowing_delta_reanchors() {
        let mut state = TimestampState::new();
        state.translate(i64::MIN + 1, 0);
        let (aligned, reanchored) = state.translate(i64::MAX, 123);
        assert!(reanchored);
        assert_eq!(aligned, 123);
    }

    #[test]
    fn test_jump_scenario() {
        let mut state = TimestampState::new();
        let (a, _) = state.translate(1_000, 5_000);
        let (b, _) = state.translate(1_500, 5_100);
        let (c, reanchored) = state.translate(1_000_000_000_000, 6_000);

        assert_eq!(a, 5_000);
        assert_eq!(b - a, 500);
        assert!(reanchored);
        assert_eq!(c, 6_000);
        assert_ne!(c, 1_000_000_000_000 + (5_000 - 1_000));
    }

    #[test]
    fn test_groups_have_independent_offsets() {
        let mut sync =
            TimestampSynchronizer::new([StreamGroup::ColorDepth, StreamGroup::StereoInfrared]);
        sync.translate(StreamGroup::ColorDepth, 1_000, 10_000);
        sync.translate(StreamGroup::StereoInfrared, 2_000_000, 10_050);
        let ir_offset = sync.state(StreamGroup::StereoInfrared).unwrap().epoch_offset_ns();

        // Color/depth clock regresses and re-anchors.
        sync.translate(StreamGroup::ColorDepth, 10, 20_000);
        assert_eq!(
            sync.state(StreamGroup::ColorDepth).unwrap().epoch_offset_ns(),
            20_000 - 10
        );
        assert_eq!(
            sync.state(StreamGroup::StereoInfrared).unwrap().epoch_offset_ns(),
            ir_offset
        );

        // Infrared keeps its own continuous timeline.
        let aligned = sync.translate(StreamGroup::StereoInfrared, 2_000_500, 30_000);
        assert_eq!(aligned, 10_550);
    }

    #[test]
    fn test_unregistered_group_starts_fresh() {
        let mut sync = TimestampSynchronizer::new([StreamGroup::ColorDepth]);
        assert!(sync.state(StreamGroup::StereoInfrared).is_none());
        let aligned = sync.translate(StreamGroup::StereoInfrared, 123_456, 42);
        assert_eq!(aligned, 42);
    }
}
