//! Hardware parameter space.
//!
//! A space is a conjunction of per-parameter constraints: masks for the
//! enumerable parameters, integer ranges for the numeric ones. Refinement
//! intersects spaces and is monotone; `choose` fixes one concrete
//! configuration in a fixed order so resolution is reproducible.

use super::error::{Error, Result};
use super::format::{Format, Subformat};
use super::pcm::{Access, Setup};
use super::ValueOr;

name_enum!(
    /// One parameter of the hardware configuration space.
    Param, ALL_PARAMS [11],
    Access = "access",
    Format = "format",
    Subformat = "subformat",
    Channels = "channels",
    Rate = "rate",
    PeriodTime = "period_time",
    PeriodSize = "period_size",
    Periods = "periods",
    BufferTime = "buffer_time",
    BufferSize = "buffer_size",
    TickTime = "tick_time",
);

/// Bit set over an enumerable parameter's values.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Mask(u64);

impl Mask {
    fn full(count: u32) -> Mask {
        Mask(if count >= 64 { !0 } else { (1u64 << count) - 1 })
    }
    fn is_empty(self) -> bool { self.0 == 0 }
    fn test(self, index: u32) -> bool { self.0 & (1u64 << index) != 0 }
    fn set_only(&mut self, index: u32) { self.0 = 1u64 << index }
    fn intersect(&mut self, other: Mask) -> bool {
        let v = self.0 & other.0;
        let changed = v != self.0;
        self.0 = v;
        changed
    }
    fn first(self) -> Option<u32> {
        if self.0 == 0 { None } else { Some(self.0.trailing_zeros()) }
    }
}

/// Closed integer range. Open endpoints are normalized away at
/// construction; an inverted range is empty.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Interval {
    min: u64,
    max: u64,
}

impl Interval {
    pub fn new(min: u64, max: u64) -> Interval { Interval { min, max } }

    /// Range with open/closed endpoint flags; `(a, b]` becomes `[a+1, b]`.
    pub fn with_flags(min: u64, max: u64, openmin: bool, openmax: bool) -> Interval {
        let min = if openmin { min.saturating_add(1) } else { min };
        let (min, max) = if openmax {
            if max == 0 { (1, 0) } else { (min, max - 1) }
        } else {
            (min, max)
        };
        Interval { min, max }
    }

    fn value(v: u64) -> Interval { Interval { min: v, max: v } }
    fn is_empty(self) -> bool { self.min > self.max }
    fn single(self) -> Option<u64> { if self.min == self.max { Some(self.min) } else { None } }
    fn intersect(&mut self, other: Interval) -> bool {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);
        let changed = min != self.min || max != self.max;
        self.min = min;
        self.max = max;
        changed
    }
}

/// Derived range of `iv * num / den`, rounded outward.
fn scale(iv: Interval, num: u64, den: u64) -> Interval {
    let lo = iv.min.saturating_mul(num) / den;
    let hi = match iv.max.checked_mul(num) {
        Some(p) => p.div_ceil(den),
        None => u64::MAX,
    };
    Interval { min: lo, max: hi }
}

/// Derived range of `a * b`, saturating.
fn mul(a: Interval, b: Interval) -> Interval {
    Interval { min: a.min.saturating_mul(b.min), max: a.max.saturating_mul(b.max) }
}

/// Derived range of `a / b`, rounded outward.
fn div(a: Interval, b: Interval) -> Interval {
    let lo = if b.max == 0 { 0 } else { a.min / b.max };
    let hi = if b.min == 0 { u64::MAX } else { a.max.div_ceil(b.min) };
    Interval { min: lo, max: hi }
}

/// A refinable configuration space.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HwParams {
    access: Mask,
    format: Mask,
    subformat: Mask,
    channels: Interval,
    rate: Interval,
    period_time: Interval,
    period_size: Interval,
    periods: Interval,
    buffer_time: Interval,
    buffer_size: Interval,
    tick_time: Interval,
}

impl HwParams {
    /// The full configuration space.
    pub fn any() -> HwParams {
        HwParams {
            access: Mask::full(Access::all().len() as u32),
            format: Mask::full(Format::all().len() as u32),
            subformat: Mask::full(Subformat::all().len() as u32),
            channels: Interval::new(1, 1024),
            rate: Interval::new(1, 768_000),
            period_time: Interval::new(0, u32::MAX as u64),
            period_size: Interval::new(1, 1 << 20),
            periods: Interval::new(1, 1024),
            buffer_time: Interval::new(0, u32::MAX as u64),
            buffer_size: Interval::new(1, 1 << 22),
            tick_time: Interval::new(0, 1_000_000),
        }
    }

    fn interval(&self, p: Param) -> Option<Interval> {
        match p {
            Param::Channels => Some(self.channels),
            Param::Rate => Some(self.rate),
            Param::PeriodTime => Some(self.period_time),
            Param::PeriodSize => Some(self.period_size),
            Param::Periods => Some(self.periods),
            Param::BufferTime => Some(self.buffer_time),
            Param::BufferSize => Some(self.buffer_size),
            Param::TickTime => Some(self.tick_time),
            _ => None,
        }
    }

    fn interval_mut(&mut self, p: Param) -> Option<&mut Interval> {
        match p {
            Param::Channels => Some(&mut self.channels),
            Param::Rate => Some(&mut self.rate),
            Param::PeriodTime => Some(&mut self.period_time),
            Param::PeriodSize => Some(&mut self.period_size),
            Param::Periods => Some(&mut self.periods),
            Param::BufferTime => Some(&mut self.buffer_time),
            Param::BufferSize => Some(&mut self.buffer_size),
            Param::TickTime => Some(&mut self.tick_time),
            _ => None,
        }
    }

    fn mask_mut(&mut self, p: Param) -> Option<&mut Mask> {
        match p {
            Param::Access => Some(&mut self.access),
            Param::Format => Some(&mut self.format),
            Param::Subformat => Some(&mut self.subformat),
            _ => None,
        }
    }

    /// Intersect with `other`; fails with `Unreachable` keyed to the first
    /// parameter whose constraint set becomes empty. Refinement is
    /// monotone: the result only ever shrinks.
    pub fn refine(&mut self, other: &HwParams) -> Result<()> {
        let mut w = *self;
        w.access.intersect(other.access);
        w.format.intersect(other.format);
        w.subformat.intersect(other.subformat);
        for &p in Param::all() {
            if let Some(iv) = w.interval_mut(p) {
                iv.intersect(other.interval(p).unwrap());
            }
        }
        w.check_and_propagate()?;
        *self = w;
        Ok(())
    }

    fn check(&self) -> Result<()> {
        if self.access.is_empty() { return Err(Error::unreachable(Param::Access.name())); }
        if self.format.is_empty() { return Err(Error::unreachable(Param::Format.name())); }
        if self.subformat.is_empty() { return Err(Error::unreachable(Param::Subformat.name())); }
        for &p in Param::all() {
            if let Some(iv) = self.interval(p) {
                if iv.is_empty() { return Err(Error::unreachable(p.name())); }
            }
        }
        Ok(())
    }

    /// Propagate the dependent-parameter rules to a fixpoint. All derived
    /// ranges are rounded outward, so propagation only removes values no
    /// satisfying configuration can take.
    fn check_and_propagate(&mut self) -> Result<()> {
        self.check()?;
        for _ in 0..8 {
            let mut changed = false;
            changed |= self.buffer_size.intersect(mul(self.period_size, self.periods));
            changed |= self.period_size.intersect(div(self.buffer_size, self.periods));
            changed |= self.periods.intersect(div(self.buffer_size, self.period_size));
            if let Some(r) = self.rate.single() {
                changed |= self.period_time.intersect(scale(self.period_size, 1_000_000, r));
                changed |= self.period_size.intersect(scale(self.period_time, r, 1_000_000));
                changed |= self.buffer_time.intersect(scale(self.buffer_size, 1_000_000, r));
                changed |= self.buffer_size.intersect(scale(self.buffer_time, r, 1_000_000));
            }
            self.check()?;
            if !changed { break; }
        }
        Ok(())
    }

    /// Restrict `p` to exactly `v`. On failure the space is unchanged.
    pub fn set(&mut self, p: Param, v: u64) -> Result<()> {
        let mut w = *self;
        if let Some(m) = w.mask_mut(p) {
            if v >= 64 || !m.test(v as u32) { return Err(Error::unreachable(p.name())); }
            m.set_only(v as u32);
        } else {
            w.interval_mut(p).unwrap().intersect(Interval::value(v));
        }
        w.check_and_propagate()?;
        *self = w;
        Ok(())
    }

    /// Restrict `p` to values `>= v`.
    pub fn set_min(&mut self, p: Param, v: u64) -> Result<()> {
        let mut w = *self;
        match w.interval_mut(p) {
            Some(iv) => { iv.intersect(Interval::new(v, u64::MAX)); }
            None => return Err(Error::bad_value(p.name())),
        }
        w.check_and_propagate()?;
        *self = w;
        Ok(())
    }

    /// Restrict `p` to values `<= v`.
    pub fn set_max(&mut self, p: Param, v: u64) -> Result<()> {
        let mut w = *self;
        match w.interval_mut(p) {
            Some(iv) => { iv.intersect(Interval::new(0, v)); }
            None => return Err(Error::bad_value(p.name())),
        }
        w.check_and_propagate()?;
        *self = w;
        Ok(())
    }

    pub fn get_min(&self, p: Param) -> Result<u64> {
        match self.interval(p) {
            Some(iv) if !iv.is_empty() => Ok(iv.min),
            _ => Err(Error::bad_value(p.name())),
        }
    }

    pub fn get_max(&self, p: Param) -> Result<u64> {
        match self.interval(p) {
            Some(iv) if !iv.is_empty() => Ok(iv.max),
            _ => Err(Error::bad_value(p.name())),
        }
    }

    /// Whether restricting `p` to `v` would leave the space satisfiable.
    pub fn test(&self, p: Param, v: u64) -> bool {
        let mut w = *self;
        w.set(p, v).is_ok()
    }

    /// Restrict the access mask to `allowed`; endpoints use this in
    /// `hw_refine` to advertise what they can do.
    pub fn restrict_access(&mut self, allowed: &[Access]) -> Result<()> {
        let mut m = Mask(0);
        for &a in allowed {
            m.0 |= 1u64 << a as u32;
        }
        let mut w = *self;
        w.access.intersect(m);
        w.check_and_propagate()?;
        *self = w;
        Ok(())
    }

    /// Restrict the format mask to `allowed`.
    pub fn restrict_format(&mut self, allowed: &[Format]) -> Result<()> {
        let mut m = Mask(0);
        for &f in allowed {
            m.0 |= 1u64 << f as u32;
        }
        let mut w = *self;
        w.format.intersect(m);
        w.check_and_propagate()?;
        *self = w;
        Ok(())
    }

    pub fn set_access(&mut self, v: Access) -> Result<()> { self.set(Param::Access, v as u64) }
    pub fn set_format(&mut self, v: Format) -> Result<()> { self.set(Param::Format, v as u64) }
    pub fn set_subformat(&mut self, v: Subformat) -> Result<()> { self.set(Param::Subformat, v as u64) }
    pub fn set_channels(&mut self, v: u32) -> Result<()> { self.set(Param::Channels, v as u64) }

    pub fn set_rate(&mut self, v: u32, dir: ValueOr) -> Result<()> {
        self.set_dir(Param::Rate, v as u64, dir)
    }
    pub fn set_period_size(&mut self, v: u64, dir: ValueOr) -> Result<()> {
        self.set_dir(Param::PeriodSize, v, dir)
    }
    pub fn set_periods(&mut self, v: u32, dir: ValueOr) -> Result<()> {
        self.set_dir(Param::Periods, v as u64, dir)
    }
    pub fn set_buffer_size(&mut self, v: u64) -> Result<()> { self.set(Param::BufferSize, v) }
    pub fn set_period_time(&mut self, v: u32, dir: ValueOr) -> Result<()> {
        self.set_dir(Param::PeriodTime, v as u64, dir)
    }
    pub fn set_tick_time(&mut self, v: u32, dir: ValueOr) -> Result<()> {
        self.set_dir(Param::TickTime, v as u64, dir)
    }

    fn set_dir(&mut self, p: Param, v: u64, dir: ValueOr) -> Result<()> {
        match dir {
            ValueOr::Less => self.set_max(p, v),
            ValueOr::Nearest => self.set(p, v),
            ValueOr::Greater => self.set_min(p, v),
        }
    }

    pub fn get_access(&self) -> Result<Access> {
        self.access.first().map(|i| Access::all()[i as usize]).ok_or_else(|| Error::unreachable("access"))
    }
    pub fn get_format(&self) -> Result<Format> {
        self.format.first().map(|i| Format::all()[i as usize]).ok_or_else(|| Error::unreachable("format"))
    }
    pub fn get_channels(&self) -> Result<u32> { self.get_min(Param::Channels).map(|v| v as u32) }
    pub fn get_rate(&self) -> Result<u32> { self.get_min(Param::Rate).map(|v| v as u32) }
    pub fn get_period_size(&self) -> Result<u64> { self.get_min(Param::PeriodSize) }
    pub fn get_buffer_size(&self) -> Result<u64> { self.get_min(Param::BufferSize) }
    pub fn get_periods(&self) -> Result<u32> { self.get_min(Param::Periods).map(|v| v as u32) }

    /// Fix one concrete configuration.
    ///
    /// The configuration is chosen fixing single parameters in this order:
    /// first access, first format, first subformat, min channels, min rate,
    /// min period time, max buffer size, min tick time. A later step that
    /// finds no satisfying value fails with `Unreachable` keyed to the
    /// offending parameter. The space itself is narrowed to the choice.
    pub fn choose(&mut self) -> Result<Setup> {
        self.check_and_propagate()?;

        let access_idx = self.access.first().ok_or_else(|| Error::unreachable(Param::Access.name()))?;
        self.access.set_only(access_idx);
        let access = Access::all()[access_idx as usize];

        let format_idx = self.format.first().ok_or_else(|| Error::unreachable(Param::Format.name()))?;
        self.format.set_only(format_idx);
        let format = Format::all()[format_idx as usize];
        let sample_bits = format.physical_width().map_err(|_| Error::unreachable(Param::Format.name()))?;
        let msbits = format.width().map_err(|_| Error::unreachable(Param::Format.name()))?;

        let sub_idx = self.subformat.first().ok_or_else(|| Error::unreachable(Param::Subformat.name()))?;
        self.subformat.set_only(sub_idx);
        let subformat = Subformat::all()[sub_idx as usize];

        let channels = self.pin_min(Param::Channels)? as u32;
        let rate = self.pin_min(Param::Rate)? as u32;
        self.pin_min(Param::PeriodTime)?;
        let period_size = self.pin_min(Param::PeriodSize)?;

        // max buffer size, rounded down onto a whole number of periods
        let mut buffer_size = self.get_max(Param::BufferSize)?;
        buffer_size -= buffer_size % period_size;
        if buffer_size == 0 {
            return Err(Error::unreachable(Param::BufferSize.name()));
        }
        self.set(Param::BufferSize, buffer_size)?;
        let tick_time = self.pin_min(Param::TickTime)? as u32;
        let _ = self.set(Param::Periods, buffer_size / period_size);

        let frame_bits = sample_bits.checked_mul(channels)
            .ok_or_else(|| Error::unreachable(Param::Channels.name()))?;
        Ok(Setup {
            access,
            format,
            subformat,
            channels,
            rate,
            rate_num: rate,
            rate_den: 1,
            msbits,
            sample_bits,
            frame_bits,
            period_size,
            buffer_size,
            period_time: (period_size.saturating_mul(1_000_000) / rate as u64) as u32,
            tick_time,
        })
    }

    fn pin_min(&mut self, p: Param) -> Result<u64> {
        let v = self.get_min(p)?;
        self.set(p, v)?;
        Ok(v)
    }
}

impl Default for HwParams {
    fn default() -> HwParams { HwParams::any() }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Direction;

    fn space() -> HwParams {
        let (pcm, _ctl) = crate::mem::open("hwp", Direction::Playback, crate::Mode::empty()).unwrap();
        pcm.hw_params_any().unwrap()
    }

    #[test]
    fn refine_is_commutative() {
        let base = space();

        let mut r1 = HwParams::any();
        r1.set_channels(2).unwrap();
        r1.set_min(Param::Rate, 22_050).unwrap();
        let mut r2 = HwParams::any();
        r2.set_max(Param::Rate, 48_000).unwrap();
        r2.set_buffer_size(4096).unwrap();

        let mut a = base;
        a.refine(&r1).unwrap();
        a.refine(&r2).unwrap();

        let mut combined = r1;
        combined.refine(&r2).unwrap();
        let mut b = base;
        b.refine(&combined).unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn choose_is_reproducible_and_minimal() {
        let mut s = space();
        s.set_access(crate::pcm::Access::RwInterleaved).unwrap();
        s.set_format(Format::S16LE).unwrap();
        s.set_channels(2).unwrap();
        s.set_rate(44_100, ValueOr::Nearest).unwrap();
        s.set_period_size(1024, ValueOr::Nearest).unwrap();
        s.set_buffer_size(4096).unwrap();
        let mut s2 = s;
        let c1 = s.choose().unwrap();
        let c2 = s2.choose().unwrap();
        assert_eq!(c1, c2);
        assert_eq!(c1.channels, 2);
        assert_eq!(c1.rate, 44_100);
        assert_eq!(c1.period_size, 1024);
        assert_eq!(c1.buffer_size, 4096);
        assert_eq!(c1.frame_bits, 32);
        assert_eq!(c1.period_time, 1024 * 1_000_000 / 44_100);
    }

    #[test]
    fn unsatisfiable_refinement_names_the_parameter() {
        let mut s = space();
        s.set_channels(2).unwrap();
        let mut bad = HwParams::any();
        bad.set_min(Param::Channels, 4).unwrap();
        let e = s.refine(&bad).unwrap_err();
        assert_eq!(e.kind(), crate::ErrorKind::Unreachable);
        assert_eq!(e.context(), Some("channels"));
    }

    #[test]
    fn buffer_rounds_down_to_whole_periods() {
        let mut s = space();
        s.set_format(Format::S16LE).unwrap();
        s.set_channels(1).unwrap();
        s.set_rate(48_000, ValueOr::Nearest).unwrap();
        s.set_period_size(100, ValueOr::Nearest).unwrap();
        s.set_max(Param::BufferSize, 1050).unwrap();
        let c = s.choose().unwrap();
        assert_eq!(c.buffer_size % c.period_size, 0);
        assert_eq!(c.buffer_size, 1000);
    }

    #[test]
    fn period_and_buffer_link_through_rate() {
        let mut s = space();
        s.set_rate(8000, ValueOr::Nearest).unwrap();
        s.set_period_time(125_000, ValueOr::Nearest).unwrap();
        // 125 ms at 8 kHz is 1000 frames, modulo outward rounding.
        let lo = s.get_min(Param::PeriodSize).unwrap();
        let hi = s.get_max(Param::PeriodSize).unwrap();
        assert!(lo <= 1000 && 1000 <= hi, "{}..{}", lo, hi);
        assert!(hi - lo <= 2);
    }

    #[test]
    fn test_checks_without_narrowing() {
        let mut s = space();
        s.set_channels(2).unwrap();
        assert!(s.test(Param::Channels, 2));
        assert!(!s.test(Param::Channels, 3));
        assert_eq!(s.get_min(Param::Channels).unwrap(), 2);
    }
}
