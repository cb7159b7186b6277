//! Transport and time reporting: the sample-position counter, wall-clock
//! timestamp, and optional time-code fields the guest can ask for.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::backend::TransportState;

/// Bit flags for [`TimeInfo::flags`], mirroring the ASIO `AsioTimeInfo`
/// flags field.
pub mod time_info_flags {
    /// `kSystemTimeValid`
    pub const SYSTEM_TIME_VALID: u32 = 0x1;
    /// `kSamplePositionValid`
    pub const SAMPLE_POSITION_VALID: u32 = 0x2;
    /// `kSampleRateValid`
    pub const SAMPLE_RATE_VALID: u32 = 0x4;
}

/// Bit flags for [`TimeCode::flags`], mirroring `ASIOTimeCode`.
pub mod time_code_flags {
    /// `kTcValid`
    pub const VALID: u32 = 0x1;
    /// `kTcRunning`
    pub const RUNNING: u32 = 0x2;
}

/// The richer per-cycle time record the guest may opt into via
/// `time_info_mode` (spec §4.G).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeInfo {
    /// Frames delivered since the last Start.
    pub sample_position: u64,
    /// Wall-clock nanoseconds at the start of this cycle.
    pub time_stamp: u64,
    /// The backend's current sample rate.
    pub sample_rate: f64,
    /// `time_info_flags` bits indicating which fields above are valid.
    pub flags: u32,
    /// Present only when the guest additionally asked for time-code.
    pub time_code: Option<TimeCode>,
}

/// The transport time-code sub-record, filled only when
/// `time_code_enabled` is set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeCode {
    /// `time_code_flags` bits: always carries `VALID`, plus `RUNNING` iff
    /// the backend transport is rolling.
    pub flags: u32,
}

impl TimeCode {
    fn from_transport(transport: TransportState) -> TimeCode {
        let mut flags = time_code_flags::VALID;
        if transport == TransportState::Rolling {
            flags |= time_code_flags::RUNNING;
        }
        TimeCode { flags }
    }
}

impl TimeInfo {
    /// Builds the time-info record for one cycle.
    ///
    /// `transport` is only consulted (and `time_code` only populated) when
    /// `time_code_enabled` is true — querying it otherwise would cost a
    /// backend round-trip for nothing.
    pub fn build(
        sample_position: u64,
        time_stamp: u64,
        sample_rate: f64,
        time_code_enabled: bool,
        transport: impl FnOnce() -> TransportState,
    ) -> TimeInfo {
        use time_info_flags::*;
        TimeInfo {
            sample_position,
            time_stamp,
            sample_rate,
            flags: SYSTEM_TIME_VALID | SAMPLE_POSITION_VALID | SAMPLE_RATE_VALID,
            time_code: time_code_enabled.then(|| TimeCode::from_transport(transport())),
        }
    }
}

/// Wall-clock nanosecond timestamp for one cycle.
///
/// The legacy implementation this design is based on sources this from a
/// millisecond-resolution clock despite the field being 64-bit nanoseconds;
/// that imprecision is preserved deliberately here (flagged in spec §9,
/// not fixed) rather than silently upgrading resolution and changing
/// observed behavior for guests tuned against it.
pub fn stamp_now() -> u64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    (now.as_millis() as u64).saturating_mul(1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_code_carries_running_only_when_rolling() {
        let stopped = TimeCode::from_transport(TransportState::Stopped);
        let rolling = TimeCode::from_transport(TransportState::Rolling);
        assert_eq!(stopped.flags & time_code_flags::RUNNING, 0);
        assert_ne!(rolling.flags & time_code_flags::RUNNING, 0);
        assert_ne!(stopped.flags & time_code_flags::VALID, 0);
    }

    #[test]
    fn build_skips_transport_query_when_time_code_disabled() {
        let mut queried = false;
        let info = TimeInfo::build(0, 0, 48_000.0, false, || {
            queried = true;
            TransportState::Rolling
        });
        assert!(!queried);
        assert!(info.time_code.is_none());
    }

    #[test]
    fn stamp_now_is_millisecond_granular() {
        let stamp = stamp_now();
        assert_eq!(stamp % 1_000_000, 0);
    }
}
