//! The shared ring: position cells, boundary arithmetic, mapped channel
//! areas and the playback silence fill.
//!
//! `hw_ptr` and `appl_ptr` are monotone frame counters modulo the
//! boundary, single-writer per side. The application side writes
//! `appl_ptr`, the backend side writes `hw_ptr`; each side reads the
//! other's cell with acquire ordering so sample memory written before a
//! pointer advance is visible after observing it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::area::{self, Area};
use super::error::Result;
use super::pcm::{Access, Setup};
use super::swparams::SwParams;

#[derive(Debug, Default)]
struct Cells {
    hw: AtomicU64,
    appl: AtomicU64,
}

/// Handle on the shared position cells. Clones refer to the same cells.
#[derive(Debug, Clone, Default)]
pub(crate) struct Positions(Arc<Cells>);

impl Positions {
    pub fn new() -> Positions { Positions::default() }

    pub fn hw(&self) -> u64 { self.0.hw.load(Ordering::Acquire) }
    pub fn appl(&self) -> u64 { self.0.appl.load(Ordering::Acquire) }

    pub fn set_hw(&self, v: u64) { self.0.hw.store(v, Ordering::Release) }
    pub fn set_appl(&self, v: u64) { self.0.appl.store(v, Ordering::Release) }

    pub fn add_hw(&self, frames: u64, boundary: u64) {
        self.set_hw((self.hw() + frames) % boundary)
    }
    pub fn add_appl(&self, frames: u64, boundary: u64) {
        self.set_appl((self.appl() + frames) % boundary)
    }
    pub fn sub_appl(&self, frames: u64, boundary: u64) {
        self.set_appl((self.appl() + boundary - frames % boundary) % boundary)
    }

    pub fn reset(&self) {
        self.set_hw(0);
        self.set_appl(0);
    }
}

/// Free frames in a playback ring.
pub(crate) fn playback_avail(hw: u64, appl: u64, buffer_size: u64, boundary: u64) -> i64 {
    let mut avail = hw as i64 + buffer_size as i64 - appl as i64;
    if avail < 0 {
        avail += boundary as i64;
    } else if avail as u64 >= boundary {
        avail -= boundary as i64;
    }
    avail
}

/// Filled frames in a capture ring; also the queued-frame count of a
/// playback ring when called as `capture_avail(appl, hw, ..)`.
pub(crate) fn capture_avail(hw: u64, appl: u64, boundary: u64) -> i64 {
    let mut avail = hw as i64 - appl as i64;
    if avail < 0 {
        avail += boundary as i64;
    }
    avail
}

/// Signed distance `a - b` reduced modulo the boundary and interpreted in
/// `[-boundary/2, boundary/2)`.
pub(crate) fn wrap_diff(a: u64, b: u64, boundary: u64) -> i64 {
    let mut d = a as i64 - b as i64;
    let half = (boundary / 2) as i64;
    if d < -half {
        d += boundary as i64;
    } else if d >= half {
        d -= boundary as i64;
    }
    d
}

/// The mapped ring: owned sample memory plus the channel-area layout the
/// configured access mode prescribes.
#[derive(Debug)]
pub(crate) struct RingMap {
    buf: Vec<u8>,
    setup: Setup,
}

impl RingMap {
    pub fn new(setup: &Setup) -> RingMap {
        let bytes = match setup.access {
            Access::RwNonInterleaved | Access::MmapNonInterleaved => {
                RingMap::plane_bytes(setup) * setup.channels as u64
            }
            _ => (setup.buffer_size * setup.frame_bits as u64 + 7) / 8,
        };
        RingMap { buf: vec![0; bytes as usize], setup: *setup }
    }

    fn plane_bytes(setup: &Setup) -> u64 {
        (setup.buffer_size * setup.sample_bits as u64 + 7) / 8
    }

    pub fn setup(&self) -> &Setup { &self.setup }

    /// The channel areas over the ring. Every area points into the same
    /// mapping, laid out per the access mode.
    pub fn areas(&mut self) -> Vec<Area> {
        let base = self.buf.as_mut_ptr();
        let s = &self.setup;
        match s.access {
            Access::RwNonInterleaved | Access::MmapNonInterleaved => {
                let plane = RingMap::plane_bytes(s) as usize;
                (0..s.channels)
                    .map(|ch| Area {
                        addr: unsafe { base.add(plane * ch as usize) },
                        first: 0,
                        step: s.sample_bits,
                    })
                    .collect()
            }
            _ => area::areas_from_buf(base, s.channels, s.sample_bits, s.frame_bits),
        }
    }

    /// Silence `frames` frames starting at ring offset `offset`, wrapping
    /// at the buffer end.
    pub fn silence_frames(&mut self, offset: u64, frames: u64) -> Result<()> {
        let bs = self.setup.buffer_size;
        let channels = self.setup.channels;
        let format = self.setup.format;
        let off = offset % bs;
        let first = frames.min(bs - off);
        let areas = self.areas();
        unsafe {
            area::areas_silence(&areas, off, channels, first, format)?;
            if frames > first {
                area::areas_silence(&areas, 0, channels, frames - first, format)?;
            }
        }
        Ok(())
    }

}

/// Playback silence fill: when fewer than `silence_threshold` frames are
/// queued, the next `silence_size` frames ahead of the application pointer
/// are muted so a stalled writer plays silence instead of stale samples.
///
/// `silence_start` tracks the already-muted region so frames are not
/// silenced twice.
pub(crate) fn playback_silence(
    map: &mut RingMap,
    pos: &Positions,
    sw: &SwParams,
    silence_start: &mut u64,
) -> Result<()> {
    if sw.silence_threshold == 0 || sw.silence_size == 0 {
        return Ok(());
    }
    let setup = *map.setup();
    let hw = pos.hw();
    let appl = pos.appl();
    let queued = capture_avail(appl, hw, sw.boundary);
    if queued < 0 || queued as u64 >= sw.silence_threshold {
        return Ok(());
    }
    let free = setup.buffer_size - queued as u64;
    let want = sw.silence_size.min(free);
    let target = (appl + want) % sw.boundary;
    // Restart behind the appl pointer if the tracked region was overwritten.
    let start = if wrap_diff(*silence_start, appl, sw.boundary) < 0 { appl } else { *silence_start };
    let n = wrap_diff(target, start, sw.boundary);
    if n <= 0 {
        return Ok(());
    }
    log::trace!("silence fill: {} frames from position {}", n, start);
    map.silence_frames(start % setup.buffer_size, n as u64)?;
    *silence_start = (start + n as u64) % sw.boundary;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::format::{Format, Subformat};

    fn setup(access: Access) -> Setup {
        Setup {
            access,
            format: Format::U16LE,
            subformat: Subformat::Std,
            channels: 2,
            rate: 48_000,
            rate_num: 48_000,
            rate_den: 1,
            msbits: 16,
            sample_bits: 16,
            frame_bits: 32,
            period_size: 4,
            buffer_size: 8,
            period_time: 83,
            tick_time: 0,
        }
    }

    #[test]
    fn avail_formulas_wrap() {
        let boundary = 1u64 << 30;
        assert_eq!(playback_avail(0, 0, 8, boundary), 8);
        assert_eq!(playback_avail(0, 8, 8, boundary), 0);
        assert_eq!(playback_avail(792, 800, 1024, boundary), 1016);
        // appl just wrapped, hw not yet
        assert_eq!(playback_avail(boundary - 4, 4, 8, boundary), 0);
        assert_eq!(capture_avail(4, 0, boundary), 4);
        assert_eq!(capture_avail(2, boundary - 2, boundary), 4);
    }

    #[test]
    fn wrap_diff_is_signed() {
        let b = 1u64 << 30;
        assert_eq!(wrap_diff(1000, 800, b), 200);
        assert_eq!(wrap_diff(800, 1000, b), -200);
        assert_eq!(wrap_diff(4, b - 4, b), 8);
        assert_eq!(wrap_diff(b - 4, 4, b), -8);
    }

    #[test]
    fn positions_advance_modulo_boundary() {
        let p = Positions::new();
        let b = 1u64 << 30;
        p.add_appl(b - 2, b);
        p.add_appl(5, b);
        assert_eq!(p.appl(), 3);
        p.sub_appl(4, b);
        assert_eq!(p.appl(), b - 1);
        p.reset();
        assert_eq!((p.hw(), p.appl()), (0, 0));
    }

    #[test]
    fn interleaved_areas_share_the_mapping() {
        let mut m = RingMap::new(&setup(Access::MmapInterleaved));
        let areas = m.areas();
        assert_eq!(areas.len(), 2);
        assert_eq!(areas[0].addr, areas[1].addr);
        assert_eq!(areas[0].first, 0);
        assert_eq!(areas[1].first, 16);
        assert_eq!(areas[0].step, 32);
    }

    #[test]
    fn noninterleaved_areas_are_planes() {
        let mut m = RingMap::new(&setup(Access::RwNonInterleaved));
        let areas = m.areas();
        assert_ne!(areas[0].addr, areas[1].addr);
        assert_eq!(areas[0].step, 16);
        assert_eq!(areas[1].first, 0);
    }

    #[test]
    fn silence_fill_covers_ahead_of_appl() {
        let s = setup(Access::MmapInterleaved);
        let mut m = RingMap::new(&s);
        let pos = Positions::new();
        let mut sw = SwParams::default_for(&s);
        sw.silence_threshold = 4;
        sw.silence_size = 4;
        // nothing queued: the 4 frames ahead of appl must be muted
        let mut silence_start = 0;
        playback_silence(&mut m, &pos, &sw, &mut silence_start).unwrap();
        assert_eq!(silence_start, 4);
        let areas = m.areas();
        let base = areas[0].addr;
        // U16_LE silence is 0x8000: check first frame, both channels
        let bytes = unsafe { std::slice::from_raw_parts(base, 4) };
        assert_eq!(bytes, &[0x00, 0x80, 0x00, 0x80]);
        // second run is a no-op, the region is already silenced
        playback_silence(&mut m, &pos, &sw, &mut silence_start).unwrap();
        assert_eq!(silence_start, 4);
    }
}
