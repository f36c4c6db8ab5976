//! In-memory reference endpoint.
//!
//! `MemEndpoint` implements the full endpoint contract over an owned ring
//! mapping, with a [`MemControl`] peer handle standing in for the hardware
//! side: it advances the hardware pointer, injects captured samples, and
//! can disconnect the stream. Backends for real transports are written
//! against the same contract; this one is also the substrate of the test
//! suite.
//!
//! Readiness polling is backed by a `/dev/null` descriptor, which is
//! always ready - the peer decides progress, not the kernel.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::area::{self, Area};
use super::error::{Error, Result};
use super::hwparams::{HwParams, Param};
use super::io::Output;
use super::pcm::{Access, FastOps, Frames, Pcm, Setup, SlowOps, State, Status, Timestamp};
use super::ring::{self, Positions, RingMap};
use super::swparams::{SwParams, TstampMode, XrunMode};
use super::{Direction, Format, Mode};
use std::os::unix::io::RawFd;

#[derive(Debug)]
struct Cfg {
    map: RingMap,
    setup: Setup,
    sw: SwParams,
    silence_start: u64,
}

#[derive(Debug)]
struct Shared {
    stream: Direction,
    state: AtomicU8,
    disconnected: AtomicBool,
    pos: Positions,
    cfg: Mutex<Option<Cfg>>,
    trigger: Mutex<Timestamp>,
    avail_max: AtomicU64,
}

impl Shared {
    fn state(&self) -> State {
        State::all()[self.state.load(Ordering::Acquire) as usize]
    }

    fn set_state(&self, s: State) {
        self.state.store(s as u8, Ordering::Release)
    }

    fn connected(&self, func: &'static str) -> Result<()> {
        if self.disconnected.load(Ordering::Acquire) {
            Err(Error::not_connected(func))
        } else {
            Ok(())
        }
    }

    fn cfg(&self, func: &'static str) -> Result<MutexGuard<'_, Option<Cfg>>> {
        let g = self.cfg.lock().map_err(|_| Error::bad_state(func))?;
        if g.is_none() {
            return Err(Error::bad_state(func));
        }
        Ok(g)
    }

    /// A draining playback stream settles in SETUP once the peer has
    /// consumed the queue. Draining capture stays put: residual frames
    /// are retrieved by reads, and the empty-ring read marks end of
    /// stream.
    fn finish_drain(&self) {
        if self.stream != Direction::Playback || self.state() != State::Draining {
            return;
        }
        if let Ok(g) = self.cfg("drain") {
            let c = g.as_ref().unwrap();
            let queued = ring::capture_avail(self.pos.appl(), self.pos.hw(), c.sw.boundary);
            if queued <= 0 {
                self.set_state(State::Setup);
            }
        }
    }
}

/// The endpoint half; hand it to [`Pcm::open_with`].
#[derive(Debug)]
pub struct MemEndpoint {
    shared: Arc<Shared>,
    fd: RawFd,
}

/// The peer half: what the "hardware" does to the shared ring.
#[derive(Debug, Clone)]
pub struct MemControl {
    shared: Arc<Shared>,
}

impl MemEndpoint {
    pub fn new(stream: Direction) -> Result<(MemEndpoint, MemControl)> {
        let fd = unsafe { libc::open(c"/dev/null".as_ptr(), libc::O_RDWR) };
        if fd < 0 {
            return Err(Error::last_os("open /dev/null"));
        }
        let shared = Arc::new(Shared {
            stream,
            state: AtomicU8::new(State::Open as u8),
            disconnected: AtomicBool::new(false),
            pos: Positions::new(),
            cfg: Mutex::new(None),
            trigger: Mutex::new(Timestamp::default()),
            avail_max: AtomicU64::new(0),
        });
        Ok((MemEndpoint { shared: shared.clone(), fd }, MemControl { shared }))
    }

    /// Free (playback) or filled (capture) frames, without the xrun side
    /// effects of `avail_update`.
    fn raw_avail(&self, c: &Cfg) -> i64 {
        let hw = self.shared.pos.hw();
        let appl = self.shared.pos.appl();
        match self.shared.stream {
            Direction::Playback => ring::playback_avail(hw, appl, c.setup.buffer_size, c.sw.boundary),
            Direction::Capture => ring::capture_avail(hw, appl, c.sw.boundary),
        }
    }
}

impl SlowOps for MemEndpoint {
    fn kind(&self) -> &'static str { "mem" }

    fn nonblock(&mut self, _nonblock: bool) -> Result<()> {
        // The transfer loop honors the mode; nothing to arm here.
        Ok(())
    }

    fn hw_refine(&self, params: &mut HwParams) -> Result<()> {
        self.shared.connected("hw_refine")?;
        params.restrict_access(&[
            Access::MmapInterleaved,
            Access::MmapNonInterleaved,
            Access::RwInterleaved,
            Access::RwNonInterleaved,
        ])?;
        let formats: Vec<Format> =
            Format::all().iter().copied().filter(|f| f.physical_width().is_ok()).collect();
        params.restrict_format(&formats)?;
        params.set_min(Param::Channels, 1)?;
        params.set_max(Param::Channels, 32)?;
        params.set_min(Param::Rate, 4000)?;
        params.set_max(Param::Rate, 192_000)?;
        params.set_max(Param::PeriodSize, 1 << 16)?;
        params.set_min(Param::BufferSize, 2)?;
        params.set_max(Param::BufferSize, 1 << 18)?;
        Ok(())
    }

    fn hw_params(&mut self, setup: &Setup) -> Result<()> {
        self.shared.connected("hw_params")?;
        let mut g = self.shared.cfg.lock().map_err(|_| Error::bad_state("hw_params"))?;
        *g = Some(Cfg {
            map: RingMap::new(setup),
            setup: *setup,
            sw: SwParams::default_for(setup),
            silence_start: 0,
        });
        self.shared.pos.reset();
        self.shared.set_state(State::Setup);
        Ok(())
    }

    fn hw_free(&mut self) -> Result<()> {
        let mut g = self.shared.cfg.lock().map_err(|_| Error::bad_state("hw_free"))?;
        *g = None;
        self.shared.set_state(State::Open);
        Ok(())
    }

    fn sw_params(&mut self, sw: &SwParams) -> Result<()> {
        self.shared.connected("sw_params")?;
        let mut g = self.shared.cfg("sw_params")?;
        g.as_mut().unwrap().sw = *sw;
        Ok(())
    }

    fn dump(&self, out: &mut Output) -> Result<()> {
        use std::fmt::Write;
        writeln!(out, "Memory ring").map_err(|_| Error::bad_value("dump"))
    }

    fn poll_descriptor(&self) -> Result<RawFd> {
        if self.fd < 0 {
            return Err(Error::bad_state("poll_descriptor"));
        }
        Ok(self.fd)
    }

    fn close(&mut self) -> Result<()> {
        if self.fd >= 0 {
            unsafe { libc::close(self.fd) };
            self.fd = -1;
        }
        Ok(())
    }
}

impl FastOps for MemEndpoint {
    fn state(&self) -> State {
        self.shared.finish_drain();
        self.shared.state()
    }

    fn status(&self) -> Result<Status> {
        self.shared.connected("status")?;
        let g = self.shared.cfg("status")?;
        let c = g.as_ref().unwrap();
        let tstamp = match c.sw.tstamp_mode {
            TstampMode::Mmap => Timestamp::now(),
            TstampMode::None => Timestamp::default(),
        };
        Ok(Status {
            state: self.shared.state(),
            trigger_time: *self.shared.trigger.lock().map_err(|_| Error::bad_state("status"))?,
            tstamp,
            delay: self.delay_locked(c),
            avail: self.raw_avail(c).max(0),
            avail_max: self.shared.avail_max.load(Ordering::Relaxed) as Frames,
        })
    }

    fn delay(&self) -> Result<Frames> {
        self.shared.connected("delay")?;
        let g = self.shared.cfg("delay")?;
        Ok(self.delay_locked(g.as_ref().unwrap()))
    }

    fn prepare(&mut self) -> Result<()> {
        self.shared.connected("prepare")?;
        self.shared.cfg("prepare")?;
        match self.shared.state() {
            State::Setup | State::Prepared | State::XRun => {}
            _ => return Err(Error::bad_state("prepare")),
        }
        self.shared.pos.reset();
        if let Ok(mut g) = self.shared.cfg("prepare") {
            g.as_mut().unwrap().silence_start = 0;
        }
        *self.shared.trigger.lock().map_err(|_| Error::bad_state("prepare"))? = Timestamp::default();
        self.shared.avail_max.store(0, Ordering::Relaxed);
        self.shared.set_state(State::Prepared);
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.shared.connected("reset")?;
        self.shared.cfg("reset")?;
        self.shared.pos.set_appl(self.shared.pos.hw());
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.shared.connected("start")?;
        self.shared.cfg("start")?;
        if self.shared.state() != State::Prepared {
            return Err(Error::bad_state("start"));
        }
        *self.shared.trigger.lock().map_err(|_| Error::bad_state("start"))? = Timestamp::now();
        self.shared.set_state(State::Running);
        log::trace!("mem: started {}", self.shared.stream);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.shared.connected("drop")?;
        self.shared.cfg("drop")?;
        if self.shared.state() == State::Open {
            return Err(Error::bad_state("drop"));
        }
        self.shared.set_state(State::Setup);
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        self.shared.connected("drain")?;
        let queued = {
            let g = self.shared.cfg("drain")?;
            let c = g.as_ref().unwrap();
            match self.shared.stream {
                Direction::Playback => {
                    ring::capture_avail(self.shared.pos.appl(), self.shared.pos.hw(), c.sw.boundary)
                }
                Direction::Capture => {
                    ring::capture_avail(self.shared.pos.hw(), self.shared.pos.appl(), c.sw.boundary)
                }
            }
        };
        match self.shared.state() {
            State::Prepared => self.shared.set_state(State::Setup),
            State::Running | State::Draining => {
                if queued > 0 {
                    self.shared.set_state(State::Draining);
                } else {
                    self.shared.set_state(State::Setup);
                }
            }
            _ => return Err(Error::bad_state("drain")),
        }
        Ok(())
    }

    fn pause(&mut self, enable: bool) -> Result<()> {
        self.shared.connected("pause")?;
        self.shared.cfg("pause")?;
        match (self.shared.state(), enable) {
            (State::Running, true) => self.shared.set_state(State::Paused),
            (State::Paused, false) => self.shared.set_state(State::Running),
            _ => return Err(Error::bad_state("pause")),
        }
        Ok(())
    }

    fn rewind(&mut self, frames: u64) -> Result<u64> {
        self.shared.connected("rewind")?;
        let g = self.shared.cfg("rewind")?;
        let c = g.as_ref().unwrap();
        let hw = self.shared.pos.hw();
        let appl = self.shared.pos.appl();
        let max = match self.shared.stream {
            Direction::Playback => ring::capture_avail(appl, hw, c.sw.boundary),
            Direction::Capture => {
                c.setup.buffer_size as i64 - ring::capture_avail(hw, appl, c.sw.boundary)
            }
        };
        let n = frames.min(max.max(0) as u64);
        if n > 0 {
            self.shared.pos.sub_appl(n, c.sw.boundary);
        }
        Ok(n)
    }

    fn avail_update(&mut self) -> Result<u64> {
        self.shared.connected("avail_update")?;
        let mut g = self.shared.cfg("avail_update")?;
        let c = g.as_mut().unwrap();
        let state = self.shared.state();
        if state == State::XRun {
            return Err(Error::xrun("avail_update"));
        }
        let hw = self.shared.pos.hw();
        let appl = self.shared.pos.appl();
        let avail = match self.shared.stream {
            Direction::Playback => {
                let avail = ring::playback_avail(hw, appl, c.setup.buffer_size, c.sw.boundary);
                let empty = avail as u64 >= c.setup.buffer_size;
                if state == State::Draining && empty {
                    self.shared.set_state(State::Setup);
                } else if state == State::Running && empty && c.sw.xrun_mode == XrunMode::Stop {
                    self.shared.set_state(State::XRun);
                    log::warn!("mem: playback underrun");
                    return Err(Error::xrun("avail_update"));
                }
                ring::playback_silence(&mut c.map, &self.shared.pos, &c.sw, &mut c.silence_start)?;
                avail
            }
            Direction::Capture => {
                let avail = ring::capture_avail(hw, appl, c.sw.boundary);
                if state == State::Draining && avail == 0 {
                    self.shared.set_state(State::Setup);
                } else if state == State::Running
                    && avail as u64 > c.setup.buffer_size
                    && c.sw.xrun_mode == XrunMode::Stop
                {
                    self.shared.set_state(State::XRun);
                    log::warn!("mem: capture overrun");
                    return Err(Error::xrun("avail_update"));
                }
                avail
            }
        };
        let avail = avail.max(0) as u64;
        self.shared.avail_max.fetch_max(avail, Ordering::Relaxed);
        Ok(avail)
    }

    fn mmap_forward(&mut self, frames: u64) -> Result<u64> {
        self.shared.connected("mmap_forward")?;
        let g = self.shared.cfg("mmap_forward")?;
        self.shared.pos.add_appl(frames, g.as_ref().unwrap().sw.boundary);
        Ok(frames)
    }

    fn mmap_begin(&mut self) -> Result<(Vec<Area>, u64, u64)> {
        self.shared.connected("mmap_begin")?;
        let mut g = self.shared.cfg("mmap_begin")?;
        let c = g.as_mut().unwrap();
        let avail = self.raw_avail(c).max(0) as u64;
        let bs = c.setup.buffer_size;
        let offset = self.shared.pos.appl() % bs;
        let frames = avail.min(bs).min(bs - offset);
        Ok((c.map.areas(), offset, frames))
    }

    fn write_xfer(&mut self, areas: &[Area], offset: u64, frames: u64) -> Result<u64> {
        self.shared.connected("write_xfer")?;
        let mut g = self.shared.cfg("write_xfer")?;
        let c = g.as_mut().unwrap();
        let setup = c.setup;
        let boundary = c.sw.boundary;
        let appl = self.shared.pos.appl();
        let off = appl % setup.buffer_size;
        let first = frames.min(setup.buffer_size - off);
        let ring_areas = c.map.areas();
        unsafe {
            area::areas_copy(&ring_areas, off, areas, offset, setup.channels, first, setup.format)?;
            if frames > first {
                area::areas_copy(&ring_areas, 0, areas, offset + first, setup.channels, frames - first, setup.format)?;
            }
        }
        self.shared.pos.add_appl(frames, boundary);
        Ok(frames)
    }

    fn read_xfer(&mut self, areas: &[Area], offset: u64, frames: u64) -> Result<u64> {
        self.shared.connected("read_xfer")?;
        let mut g = self.shared.cfg("read_xfer")?;
        let c = g.as_mut().unwrap();
        let setup = c.setup;
        let boundary = c.sw.boundary;
        let appl = self.shared.pos.appl();
        let off = appl % setup.buffer_size;
        let first = frames.min(setup.buffer_size - off);
        let ring_areas = c.map.areas();
        unsafe {
            area::areas_copy(areas, offset, &ring_areas, off, setup.channels, first, setup.format)?;
            if frames > first {
                area::areas_copy(areas, offset + first, &ring_areas, 0, setup.channels, frames - first, setup.format)?;
            }
        }
        self.shared.pos.add_appl(frames, boundary);
        Ok(frames)
    }
}

impl MemEndpoint {
    fn delay_locked(&self, c: &Cfg) -> Frames {
        let hw = self.shared.pos.hw();
        let appl = self.shared.pos.appl();
        match self.shared.stream {
            Direction::Playback => ring::wrap_diff(appl, hw, c.sw.boundary),
            Direction::Capture => ring::wrap_diff(hw, appl, c.sw.boundary),
        }
    }
}

impl Drop for MemEndpoint {
    fn drop(&mut self) {
        let _ = SlowOps::close(self);
    }
}

impl MemControl {
    pub fn state(&self) -> State {
        self.shared.finish_drain();
        self.shared.state()
    }

    /// Hardware-side frame counter, wrapping at the boundary.
    pub fn hw_ptr(&self) -> Frames {
        self.shared.pos.hw() as Frames
    }

    /// Application-side frame counter, wrapping at the boundary.
    pub fn appl_ptr(&self) -> Frames {
        self.shared.pos.appl() as Frames
    }

    /// Advance the hardware pointer: the peer consumed (playback) or
    /// produced (capture) `frames`.
    pub fn advance(&self, frames: Frames) -> Result<()> {
        if frames < 0 {
            return Err(Error::bad_value("advance"));
        }
        let g = self.shared.cfg("advance")?;
        self.shared.pos.add_hw(frames as u64, g.as_ref().unwrap().sw.boundary);
        Ok(())
    }

    /// Copy interleaved sample data into the ring at the hardware pointer
    /// and advance it: the peer captured `frames` frames.
    pub fn produce(&self, buf: &[u8], frames: Frames) -> Result<()> {
        if frames < 0 {
            return Err(Error::bad_value("produce"));
        }
        let mut g = self.shared.cfg("produce")?;
        let c = g.as_mut().unwrap();
        let setup = c.setup;
        let boundary = c.sw.boundary;
        if (buf.len() as u64) < (frames as u64 * setup.frame_bits as u64).div_ceil(8) {
            return Err(Error::bad_value("produce"));
        }
        let src = area::areas_from_buf(buf.as_ptr() as *mut u8, setup.channels, setup.sample_bits, setup.frame_bits);
        let hw = self.shared.pos.hw();
        let off = hw % setup.buffer_size;
        let frames = frames as u64;
        let first = frames.min(setup.buffer_size - off);
        let ring_areas = c.map.areas();
        unsafe {
            area::areas_copy(&ring_areas, off, &src, 0, setup.channels, first, setup.format)?;
            if frames > first {
                area::areas_copy(&ring_areas, 0, &src, first, setup.channels, frames - first, setup.format)?;
            }
        }
        self.shared.pos.add_hw(frames, boundary);
        Ok(())
    }

    /// Drop the backend from underneath the stream; every subsequent
    /// operation except close fails with `NotConnected`.
    pub fn disconnect(&self) {
        self.shared.disconnected.store(true, Ordering::Release);
        self.shared.set_state(State::Disconnected);
    }
}

/// Open an in-memory endpoint; the returned control handle is the peer.
pub fn open(name: &str, stream: Direction, mode: Mode) -> Result<(Pcm, MemControl)> {
    let (ep, ctl) = MemEndpoint::new(stream)?;
    let pcm = Pcm::open_with(name, stream, mode, Box::new(ep))?;
    Ok((pcm, ctl))
}
