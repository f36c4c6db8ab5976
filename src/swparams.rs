//! Software parameters: user-tunable transfer policy.
//!
//! Installing software parameters is pure assignment onto the endpoint
//! after validation; it never changes the stream state.

use super::error::{Error, Result};
use super::pcm::Setup;

name_enum!(
    /// When a stream leaves PREPARED for RUNNING.
    StartMode, ALL_START_MODES [2],
    Explicit = "EXPLICIT",
    Data = "DATA",
);

name_enum!(
    /// What happens when the ring pointer crosses its partner.
    XrunMode, ALL_XRUN_MODES [2],
    None = "NONE",
    Stop = "STOP",
);

name_enum!(
    /// Timestamping policy.
    TstampMode, ALL_TSTAMP_MODES [2],
    None = "NONE",
    Mmap = "MMAP",
);

/// Software transfer policy for one endpoint.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SwParams {
    pub start_mode: StartMode,
    pub xrun_mode: XrunMode,
    pub tstamp_mode: TstampMode,
    pub period_step: u32,
    pub sleep_min: u32,
    /// Minimum available frames to report readiness.
    pub avail_min: u64,
    /// Transfer sizes are rounded down to a multiple of this.
    pub xfer_align: u64,
    /// Queued playback frames below which the silence fill kicks in.
    pub silence_threshold: u64,
    /// How many frames ahead of the application pointer get silenced.
    pub silence_size: u64,
    /// Wrap modulus for the frame position counters.
    pub boundary: u64,
}

impl SwParams {
    /// The default policy for a configured endpoint: auto-start on data,
    /// stop on xrun, wake per period, no silence fill.
    pub fn default_for(setup: &Setup) -> SwParams {
        SwParams {
            start_mode: StartMode::Data,
            xrun_mode: XrunMode::Stop,
            tstamp_mode: TstampMode::None,
            period_step: 1,
            sleep_min: 0,
            avail_min: setup.period_size,
            xfer_align: 1,
            silence_threshold: 0,
            silence_size: 0,
            boundary: boundary_for(setup.buffer_size),
        }
    }

    pub(crate) fn validate(&self, setup: &Setup) -> Result<()> {
        if self.avail_min < 1 || self.avail_min > setup.buffer_size {
            return Err(Error::bad_value("avail_min"));
        }
        if self.xfer_align < 1 || setup.period_size % self.xfer_align != 0 {
            return Err(Error::bad_value("xfer_align"));
        }
        if self.silence_threshold.saturating_add(self.silence_size) > setup.buffer_size {
            return Err(Error::bad_value("silence_size"));
        }
        if self.boundary < 2 * setup.buffer_size || self.boundary % setup.buffer_size != 0 {
            return Err(Error::bad_value("boundary"));
        }
        Ok(())
    }
}

/// The smallest power-of-two multiple of `buffer_size` that is at least
/// 2^30 (and at least twice the buffer).
pub(crate) fn boundary_for(buffer_size: u64) -> u64 {
    let mut b = buffer_size.max(1);
    while b < (1u64 << 30) || b < 2 * buffer_size {
        b *= 2;
    }
    b
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::format::{Format, Subformat};
    use crate::pcm::Access;

    fn setup() -> Setup {
        Setup {
            access: Access::RwInterleaved,
            format: Format::S16LE,
            subformat: Subformat::Std,
            channels: 2,
            rate: 48_000,
            rate_num: 48_000,
            rate_den: 1,
            msbits: 16,
            sample_bits: 16,
            frame_bits: 32,
            period_size: 1024,
            buffer_size: 4096,
            period_time: 21_333,
            tick_time: 0,
        }
    }

    #[test]
    fn boundary_wraps_on_buffer_multiples() {
        let b = boundary_for(4096);
        assert!(b >= 1 << 30);
        assert_eq!(b % 4096, 0);
        let big = boundary_for((1 << 30) + 4096);
        assert!(big >= 2 * ((1u64 << 30) + 4096));
    }

    #[test]
    fn defaults_validate() {
        let s = setup();
        let sw = SwParams::default_for(&s);
        sw.validate(&s).unwrap();
        assert_eq!(sw.start_mode, StartMode::Data);
        assert_eq!(sw.xrun_mode, XrunMode::Stop);
        assert_eq!(sw.avail_min, 1024);
    }

    #[test]
    fn validation_rejects_bad_policy() {
        let s = setup();
        let ok = SwParams::default_for(&s);

        let mut sw = ok;
        sw.xfer_align = 0;
        assert_eq!(sw.validate(&s).unwrap_err().kind(), crate::ErrorKind::BadValue);

        let mut sw = ok;
        sw.xfer_align = 3; // does not divide period_size
        assert!(sw.validate(&s).is_err());

        let mut sw = ok;
        sw.avail_min = 4097;
        assert!(sw.validate(&s).is_err());

        let mut sw = ok;
        sw.silence_threshold = 4000;
        sw.silence_size = 1000;
        assert!(sw.validate(&s).is_err());

        let mut sw = ok;
        sw.boundary = 4096;
        assert!(sw.validate(&s).is_err());
    }

    #[test]
    fn mode_names_are_contract() {
        assert_eq!(StartMode::Explicit.name(), "EXPLICIT");
        assert_eq!(XrunMode::Stop.name(), "STOP");
        assert_eq!(TstampMode::Mmap.name(), "MMAP");
    }
}
