//! Audio playback and capture
//!
//! [`Pcm`] is the central object: identity, stream direction, installed
//! configuration and two operation tables over the backend - the slow ops
//! for setup and teardown, the fast ops for everything on the transfer
//! path. The transfer engine in this module implements the common
//! blocking/non-blocking loop every endpoint shares; backends only supply
//! the per-chunk transfer callbacks.

use std::fmt::{self, Write as _};
use std::io as stdio;
use std::os::unix::io::RawFd;

use super::area::{self, Area};
use super::error::{Error, Result};
use super::format::{Format, Subformat};
use super::hwparams::HwParams;
use super::io::Output;
use super::poll::{self, PollDescriptors, PollFlags};
use super::swparams::{StartMode, SwParams};
use super::{Direction, Mode};

/// Signed frame count.
pub type Frames = i64;

name_enum!(
    /// Stream state.
    State, ALL_STATES [8],
    Open = "OPEN",
    Setup = "SETUP",
    Prepared = "PREPARED",
    Running = "RUNNING",
    XRun = "XRUN",
    Draining = "DRAINING",
    Paused = "PAUSED",
    Disconnected = "DISCONNECTED",
);

name_enum!(
    /// How the application addresses sample memory.
    Access, ALL_ACCESSES [5],
    MmapInterleaved = "MMAP_INTERLEAVED",
    MmapNonInterleaved = "MMAP_NONINTERLEAVED",
    MmapComplex = "MMAP_COMPLEX",
    RwInterleaved = "RW_INTERLEAVED",
    RwNonInterleaved = "RW_NONINTERLEAVED",
);

/// Seconds/microseconds pair, as the status dump prints it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub sec: i64,
    pub usec: i64,
}

impl Timestamp {
    pub(crate) fn now() -> Timestamp {
        match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
            Ok(d) => Timestamp { sec: d.as_secs() as i64, usec: d.subsec_micros() as i64 },
            Err(_) => Timestamp::default(),
        }
    }
}

/// One concrete hardware configuration, as installed by `hw_params`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Setup {
    pub access: Access,
    pub format: Format,
    pub subformat: Subformat,
    pub channels: u32,
    pub rate: u32,
    pub rate_num: u32,
    pub rate_den: u32,
    pub msbits: u32,
    /// Physical width of one sample, in bits.
    pub sample_bits: u32,
    /// Width of one frame, in bits.
    pub frame_bits: u32,
    pub period_size: u64,
    pub buffer_size: u64,
    /// Period duration in microseconds.
    pub period_time: u32,
    pub tick_time: u32,
}

/// Runtime snapshot of an endpoint.
#[derive(Debug, Copy, Clone)]
pub struct Status {
    pub state: State,
    pub trigger_time: Timestamp,
    pub tstamp: Timestamp,
    pub delay: Frames,
    pub avail: Frames,
    pub avail_max: Frames,
}

impl Status {
    /// Textual rendering; field order and labels are a stable contract.
    pub fn dump(&self, out: &mut Output) -> Result<()> {
        (|| -> fmt::Result {
            writeln!(out, "state       : {}", self.state)?;
            writeln!(out, "trigger_time: {}.{:06}", self.trigger_time.sec, self.trigger_time.usec)?;
            writeln!(out, "tstamp      : {}.{:06}", self.tstamp.sec, self.tstamp.usec)?;
            writeln!(out, "delay       : {}", self.delay)?;
            writeln!(out, "avail       : {}", self.avail)?;
            writeln!(out, "avail_max   : {}", self.avail_max)
        })()
        .map_err(|_| Error::bad_value("status dump"))
    }
}

/// General (static) information about an endpoint.
#[derive(Debug, Clone)]
pub struct Info {
    pub name: String,
    pub kind: &'static str,
    pub stream: Direction,
}

/// Slow operations: setup, teardown and configuration. Never called on
/// the transfer path.
pub trait SlowOps {
    /// Backend family tag.
    fn kind(&self) -> &'static str;
    fn nonblock(&mut self, nonblock: bool) -> Result<()>;
    fn async_mode(&mut self, _sig: i32, _pid: i32) -> Result<()> {
        Err(Error::unsupported("async"))
    }
    /// Intersect `params` with what this endpoint can actually do.
    fn hw_refine(&self, params: &mut HwParams) -> Result<()>;
    /// Install one concrete configuration.
    fn hw_params(&mut self, setup: &Setup) -> Result<()>;
    /// Drop the installed configuration and release the ring mapping.
    fn hw_free(&mut self) -> Result<()>;
    fn sw_params(&mut self, sw: &SwParams) -> Result<()>;
    /// Write the endpoint's banner (and any slave chain) to `out`.
    fn dump(&self, out: &mut Output) -> Result<()>;
    /// Single OS handle suitable for readiness polling.
    fn poll_descriptor(&self) -> Result<RawFd>;
    /// Handle used to couple start/stop/prepare with another endpoint.
    fn link_descriptor(&self) -> Result<RawFd> {
        Err(Error::unsupported("link"))
    }
    fn link(&mut self, _other: RawFd) -> Result<()> {
        Err(Error::unsupported("link"))
    }
    fn unlink(&mut self) -> Result<()> {
        Err(Error::unsupported("unlink"))
    }
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Fast operations: everything dispatched on the transfer path. A backend
/// may keep the state behind these in a compact representative distinct
/// from its slow-path state; the core never assumes the two differ.
pub trait FastOps {
    fn state(&self) -> State;
    fn status(&self) -> Result<Status>;
    /// Frames in flight. Endpoints without position counters report 0
    /// before the first start.
    fn delay(&self) -> Result<Frames>;
    fn prepare(&mut self) -> Result<()>;
    /// Move the application pointer to the hardware pointer, dropping
    /// queued frames without leaving RUNNING.
    fn reset(&mut self) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    /// Stop immediately, dropping pending frames.
    fn stop(&mut self) -> Result<()>;
    /// Stop preserving pending frames; playback keeps the stream in
    /// DRAINING until the queue empties.
    fn drain(&mut self) -> Result<()>;
    fn pause(&mut self, _enable: bool) -> Result<()> {
        Err(Error::unsupported("pause"))
    }
    /// Move the application pointer backward by up to `frames`, clamped
    /// against the ring window; returns the actual displacement.
    fn rewind(&mut self, frames: u64) -> Result<u64>;
    /// Free (playback) or filled (capture) frames; may do transport work
    /// at lower layers. An xrun surfaces as an error here.
    fn avail_update(&mut self) -> Result<u64>;
    /// Advance the application pointer after the caller filled the ring
    /// in place.
    fn mmap_forward(&mut self, frames: u64) -> Result<u64>;
    /// The mapped channel areas plus the contiguous window at the
    /// application pointer: `(areas, offset, frames)`.
    fn mmap_begin(&mut self) -> Result<(Vec<Area>, u64, u64)> {
        Err(Error::unsupported("mmap"))
    }
    /// Transfer callback: move `frames` frames between the application
    /// areas (at `offset`) and the ring, advancing the application
    /// pointer. Returns the frames moved, which must equal `frames` on
    /// success.
    fn write_xfer(&mut self, areas: &[Area], offset: u64, frames: u64) -> Result<u64>;
    fn read_xfer(&mut self, areas: &[Area], offset: u64, frames: u64) -> Result<u64>;
}

/// The full endpoint contract: both operation tables over one backend
/// object. Implementations that want the fast/slow split keep their
/// hot-path state in a compact inner struct; aliasing both tables over
/// the same state is equally valid.
pub trait Endpoint: SlowOps + FastOps + fmt::Debug {}
impl<T: SlowOps + FastOps + fmt::Debug> Endpoint for T {}

/// A PCM endpoint - start here for audio playback and recording.
#[derive(Debug)]
pub struct Pcm {
    pub(crate) name: String,
    pub(crate) stream: Direction,
    pub(crate) mode: Mode,
    pub(crate) setup: Option<Setup>,
    pub(crate) sw: Option<SwParams>,
    pub(crate) async_sig: i32,
    pub(crate) async_pid: i32,
    pub(crate) io: Box<dyn Endpoint>,
}

impl Pcm {
    /// Wrap an already-resolved endpoint in OPEN state.
    ///
    /// This is the seam compositors use: name-to-factory dispatch happens
    /// outside the core, the core consumes the factory's product.
    pub fn open_with(name: &str, stream: Direction, mode: Mode, mut io: Box<dyn Endpoint>) -> Result<Pcm> {
        if mode.contains(Mode::NONBLOCK) {
            io.nonblock(true)?;
        }
        Ok(Pcm {
            name: name.to_string(),
            stream,
            mode,
            setup: None,
            sw: None,
            async_sig: 0,
            async_pid: 0,
            io,
        })
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn stream(&self) -> Direction { self.stream }
    pub fn mode(&self) -> Mode { self.mode }
    pub fn kind(&self) -> &'static str { self.io.kind() }
    pub fn is_setup(&self) -> bool { self.setup.is_some() }

    pub fn info(&self) -> Info {
        Info { name: self.name.clone(), kind: self.io.kind(), stream: self.stream }
    }

    fn setup_ref(&self, func: &'static str) -> Result<&Setup> {
        self.setup.as_ref().ok_or_else(|| Error::bad_state(func))
    }

    fn sw_ref(&self, func: &'static str) -> Result<&SwParams> {
        self.sw.as_ref().ok_or_else(|| Error::bad_state(func))
    }

    /// The installed configuration.
    pub fn setup(&self) -> Result<&Setup> { self.setup_ref("setup") }

    /// The full configuration space this endpoint offers.
    pub fn hw_params_any(&self) -> Result<HwParams> {
        let mut p = HwParams::any();
        self.io.hw_refine(&mut p)?;
        Ok(p)
    }

    /// Install one configuration chosen from `params` and prepare the
    /// stream.
    ///
    /// The configuration is chosen fixing single parameters in this
    /// order: first access, first format, first subformat, min channels,
    /// min rate, min period time, max buffer size, min tick time.
    pub fn hw_params(&mut self, params: &mut HwParams) -> Result<()> {
        self.io.hw_refine(params)?;
        let setup = params.choose()?;
        self.io.hw_params(&setup)?;
        let sw = SwParams::default_for(&setup);
        if let Err(e) = self.io.sw_params(&sw) {
            let _ = self.io.hw_free();
            return Err(e);
        }
        self.setup = Some(setup);
        self.sw = Some(sw);
        log::debug!(
            "{}: {} {} {}ch {}Hz, period {} buffer {}",
            self.name, setup.access, setup.format, setup.channels, setup.rate,
            setup.period_size, setup.buffer_size
        );
        self.io.prepare()
    }

    /// Remove the installed configuration and free associated resources.
    pub fn hw_free(&mut self) -> Result<()> {
        if self.setup.is_none() {
            return Err(Error::bad_state("hw_free"));
        }
        if self.io.state() > State::Prepared {
            return Err(Error::bad_state("hw_free"));
        }
        let r = self.io.hw_free();
        self.setup = None;
        self.sw = None;
        r
    }

    /// Install software parameters. Never changes the stream state.
    pub fn sw_params(&mut self, sw: &SwParams) -> Result<()> {
        let setup = *self.setup_ref("sw_params")?;
        sw.validate(&setup)?;
        self.io.sw_params(sw)?;
        self.sw = Some(*sw);
        Ok(())
    }

    pub fn sw_params_current(&self) -> Result<SwParams> {
        self.sw_ref("sw_params_current").copied()
    }

    pub fn state(&self) -> State { self.io.state() }

    pub fn prepare(&mut self) -> Result<()> {
        self.setup_ref("prepare")?;
        self.io.prepare()
    }

    /// Reduce the delay to 0 by dropping queued frames.
    pub fn reset(&mut self) -> Result<()> {
        self.setup_ref("reset")?;
        self.io.reset()
    }

    pub fn start(&mut self) -> Result<()> {
        self.setup_ref("start")?;
        self.io.start()
    }

    /// Stop immediately, dropping pending frames.
    pub fn drop(&mut self) -> Result<()> {
        self.setup_ref("drop")?;
        self.io.stop()
    }

    /// Stop preserving pending frames. Playback drains the queue before
    /// settling in SETUP; capture permits residual reads while DRAINING.
    pub fn drain(&mut self) -> Result<()> {
        self.setup_ref("drain")?;
        self.io.drain()
    }

    /// Pause or resume. Fails with `NotSupported` on endpoints that
    /// cannot pause.
    pub fn pause(&mut self, enable: bool) -> Result<()> {
        self.setup_ref("pause")?;
        self.io.pause(enable)
    }

    pub fn status(&self) -> Result<Status> {
        self.setup_ref("status")?;
        self.io.status()
    }

    /// Distance between the application frame position and the endpoint
    /// frame position: positive and below the buffer size in normal
    /// playback, negative on underrun.
    pub fn delay(&self) -> Result<Frames> {
        self.setup_ref("delay")?;
        self.io.delay()
    }

    /// Frames ready to be written (playback) or read (capture).
    pub fn avail_update(&mut self) -> Result<Frames> {
        self.setup_ref("avail_update")?;
        self.io.avail_update().map(|v| v as Frames)
    }

    pub fn avail(&mut self) -> Result<Frames> { self.avail_update() }

    /// Move the application pointer backward by up to `frames`; returns
    /// the actual displacement.
    pub fn rewind(&mut self, frames: Frames) -> Result<Frames> {
        self.setup_ref("rewind")?;
        if frames <= 0 {
            return Ok(0);
        }
        self.io.rewind(frames as u64).map(|v| v as Frames)
    }

    /// Advance the application pointer after filling the mapped ring in
    /// place. `frames` must not exceed the available window.
    pub fn mmap_forward(&mut self, frames: Frames) -> Result<Frames> {
        self.setup_ref("mmap_forward")?;
        if frames <= 0 {
            return Err(Error::bad_value("mmap_forward"));
        }
        let avail = self.io.avail_update()?;
        if frames as u64 > avail {
            return Err(Error::bad_value("mmap_forward"));
        }
        self.io.mmap_forward(frames as u64).map(|v| v as Frames)
    }

    /// The mapped channel areas plus the contiguous `(offset, frames)`
    /// window at the application pointer. The application must not mutate
    /// the ring outside returned windows.
    pub fn mmap_begin(&mut self) -> Result<(Vec<Area>, u64, u64)> {
        self.setup_ref("mmap_begin")?;
        self.io.mmap_begin()
    }

    /// Wait until the endpoint is ready for at least one frame of I/O.
    /// Returns false on timeout.
    pub fn wait(&self, timeout_ms: i32) -> Result<bool> {
        let fd = self.io.poll_descriptor()?;
        let events = match self.stream {
            Direction::Playback => PollFlags::POLLOUT,
            Direction::Capture => PollFlags::POLLIN,
        };
        let mut fds = [libc::pollfd { fd, events: events.bits(), revents: 0 }];
        let n = poll::poll(&mut fds, timeout_ms)?;
        Ok(n > 0)
    }

    /// Couple start/stop/prepare with `other` through the backends' link
    /// operation.
    pub fn link(&mut self, other: &Pcm) -> Result<()> {
        let fd = other.io.link_descriptor()?;
        self.io.link(fd)
    }

    pub fn unlink(&mut self) -> Result<()> { self.io.unlink() }

    pub fn set_nonblock(&mut self, nonblock: bool) -> Result<()> {
        self.io.nonblock(nonblock)?;
        if nonblock {
            self.mode.insert(Mode::NONBLOCK);
        } else {
            self.mode.remove(Mode::NONBLOCK);
        }
        Ok(())
    }

    /// Request a signal per period. `sig <= 0` keeps the default signal,
    /// `pid == 0` the current process.
    pub fn set_async(&mut self, sig: i32, pid: i32) -> Result<()> {
        self.io.async_mode(sig, pid)?;
        self.async_sig = if sig > 0 { sig } else { libc::SIGIO };
        self.async_pid = if pid != 0 { pid } else { unsafe { libc::getpid() } };
        self.mode.insert(Mode::ASYNC);
        Ok(())
    }

    pub fn bytes_to_frames(&self, bytes: isize) -> Result<Frames> {
        let s = self.setup_ref("bytes_to_frames")?;
        Ok(bytes as i64 * 8 / s.frame_bits as i64)
    }

    pub fn frames_to_bytes(&self, frames: Frames) -> Result<isize> {
        let s = self.setup_ref("frames_to_bytes")?;
        Ok((frames * s.frame_bits as i64 / 8) as isize)
    }

    pub fn bytes_to_samples(&self, bytes: isize) -> Result<isize> {
        let s = self.setup_ref("bytes_to_samples")?;
        Ok((bytes as i64 * 8 / s.sample_bits as i64) as isize)
    }

    pub fn samples_to_bytes(&self, samples: isize) -> Result<isize> {
        let s = self.setup_ref("samples_to_bytes")?;
        Ok((samples as i64 * s.sample_bits as i64 / 8) as isize)
    }

    /// Write interleaved frames. `size` frames are taken from `buf`.
    pub fn writei(&mut self, buf: &[u8], size: Frames) -> Result<Frames> {
        let s = *self.setup_ref("writei")?;
        if s.access != Access::RwInterleaved {
            return Err(Error::bad_value("writei"));
        }
        Pcm::check_buf(buf.len(), size, s.frame_bits, "writei")?;
        let areas = area::areas_from_buf(buf.as_ptr() as *mut u8, s.channels, s.sample_bits, s.frame_bits);
        self.write_areas(&areas, 0, size as u64)
    }

    /// Read interleaved frames into `buf`.
    pub fn readi(&mut self, buf: &mut [u8], size: Frames) -> Result<Frames> {
        let s = *self.setup_ref("readi")?;
        if s.access != Access::RwInterleaved {
            return Err(Error::bad_value("readi"));
        }
        Pcm::check_buf(buf.len(), size, s.frame_bits, "readi")?;
        let areas = area::areas_from_buf(buf.as_mut_ptr(), s.channels, s.sample_bits, s.frame_bits);
        self.read_areas(&areas, 0, size as u64)
    }

    /// Write non-interleaved frames, one buffer per channel.
    pub fn writen(&mut self, bufs: &[&[u8]], size: Frames) -> Result<Frames> {
        let s = *self.setup_ref("writen")?;
        if s.access != Access::RwNonInterleaved || bufs.len() != s.channels as usize {
            return Err(Error::bad_value("writen"));
        }
        for b in bufs {
            Pcm::check_buf(b.len(), size, s.sample_bits, "writen")?;
        }
        let ptrs: Vec<*mut u8> = bufs.iter().map(|b| b.as_ptr() as *mut u8).collect();
        let areas = area::areas_from_bufs(&ptrs, s.sample_bits);
        self.write_areas(&areas, 0, size as u64)
    }

    /// Read non-interleaved frames, one buffer per channel.
    pub fn readn(&mut self, bufs: &mut [&mut [u8]], size: Frames) -> Result<Frames> {
        let s = *self.setup_ref("readn")?;
        if s.access != Access::RwNonInterleaved || bufs.len() != s.channels as usize {
            return Err(Error::bad_value("readn"));
        }
        for b in bufs.iter() {
            Pcm::check_buf(b.len(), size, s.sample_bits, "readn")?;
        }
        let ptrs: Vec<*mut u8> = bufs.iter_mut().map(|b| b.as_mut_ptr()).collect();
        let areas = area::areas_from_bufs(&ptrs, s.sample_bits);
        self.read_areas(&areas, 0, size as u64)
    }

    fn check_buf(len: usize, size: Frames, bits_per_frame: u32, func: &'static str) -> Result<()> {
        if size < 0 {
            return Err(Error::bad_value(func));
        }
        let needed = (size as u64 * bits_per_frame as u64).div_ceil(8);
        if (len as u64) < needed {
            return Err(Error::bad_value(func));
        }
        Ok(())
    }

    /// The common write loop: round the request onto the transfer
    /// alignment, wait (or fail with `Again`) while the ring has no room,
    /// feed aligned chunks to the endpoint's transfer callback, and
    /// auto-start a prepared stream once data has been queued.
    ///
    /// Returns the frames transferred, or the first error when nothing
    /// was transferred.
    pub(crate) fn write_areas(&mut self, areas: &[Area], mut offset: u64, mut size: u64) -> Result<Frames> {
        if size == 0 {
            return Ok(0);
        }
        let sw = *self.sw_ref("write")?;
        size -= size % sw.xfer_align;
        if size == 0 {
            return Ok(0);
        }
        let mut state = self.io.state();
        match state {
            State::Prepared | State::Running => {}
            State::XRun => return Err(Error::xrun("write")),
            State::Disconnected => return Err(Error::not_connected("write")),
            _ => return Err(Error::bad_state("write")),
        }
        let mut xfer: u64 = 0;
        let mut err: Option<Error> = None;
        'transfer: while size > 0 {
            let mut avail;
            loop {
                avail = match self.io.avail_update() {
                    Ok(a) => a,
                    Err(e) => {
                        err = Some(e);
                        break 'transfer;
                    }
                };
                if state == State::Prepared {
                    if avail == 0 {
                        // the ring cannot be empty before the stream ran
                        err = Some(Error::xrun("write"));
                        break 'transfer;
                    }
                } else if avail == 0 || (size >= sw.xfer_align && avail < sw.xfer_align) {
                    if self.mode.contains(Mode::NONBLOCK) {
                        err = Some(Error::again("write"));
                        break 'transfer;
                    }
                    if let Err(e) = self.wait(-1) {
                        err = Some(e);
                        break 'transfer;
                    }
                    state = self.io.state();
                    continue;
                }
                break;
            }
            if avail > sw.xfer_align {
                avail -= avail % sw.xfer_align;
            }
            let frames = size.min(avail);
            debug_assert!(frames != 0);
            let r = match self.io.write_xfer(areas, offset, frames) {
                Ok(r) => r,
                Err(e) => {
                    err = Some(e);
                    break;
                }
            };
            debug_assert_eq!(r, frames);
            offset += r;
            size -= r;
            xfer += r;
            if state == State::Prepared && sw.start_mode == StartMode::Data {
                if let Err(e) = self.io.start() {
                    err = Some(e);
                    break;
                }
                state = self.io.state();
            }
        }
        if xfer > 0 {
            Ok(xfer as Frames)
        } else {
            Err(err.unwrap_or_else(|| Error::bad_state("write")))
        }
    }

    /// The common read loop; DRAINING additionally delivers residual
    /// frames, and an empty ring while draining marks end-of-stream with
    /// `Xrun`.
    pub(crate) fn read_areas(&mut self, areas: &[Area], mut offset: u64, mut size: u64) -> Result<Frames> {
        if size == 0 {
            return Ok(0);
        }
        let sw = *self.sw_ref("read")?;
        size -= size % sw.xfer_align;
        if size == 0 {
            return Ok(0);
        }
        let mut state = self.io.state();
        match state {
            State::Prepared => {
                if sw.start_mode == StartMode::Data {
                    self.io.start()?;
                    state = self.io.state();
                }
            }
            State::Running | State::Draining => {}
            State::XRun => return Err(Error::xrun("read")),
            State::Disconnected => return Err(Error::not_connected("read")),
            _ => return Err(Error::bad_state("read")),
        }
        let mut xfer: u64 = 0;
        let mut err: Option<Error> = None;
        'transfer: while size > 0 {
            let mut avail;
            loop {
                avail = match self.io.avail_update() {
                    Ok(a) => a,
                    Err(e) => {
                        err = Some(e);
                        break 'transfer;
                    }
                };
                if state == State::Draining {
                    if avail == 0 {
                        // end of stream: the drained ring has nothing left
                        err = Some(Error::xrun("read"));
                        break 'transfer;
                    }
                } else if avail == 0 || (size >= sw.xfer_align && avail < sw.xfer_align) {
                    if self.mode.contains(Mode::NONBLOCK) {
                        err = Some(Error::again("read"));
                        break 'transfer;
                    }
                    if let Err(e) = self.wait(-1) {
                        err = Some(e);
                        break 'transfer;
                    }
                    state = self.io.state();
                    continue;
                }
                break;
            }
            if avail > sw.xfer_align {
                avail -= avail % sw.xfer_align;
            }
            let frames = size.min(avail);
            debug_assert!(frames != 0);
            let r = match self.io.read_xfer(areas, offset, frames) {
                Ok(r) => r,
                Err(e) => {
                    err = Some(e);
                    break;
                }
            };
            debug_assert_eq!(r, frames);
            offset += r;
            size -= r;
            xfer += r;
        }
        if xfer > 0 {
            Ok(xfer as Frames)
        } else {
            Err(err.unwrap_or_else(|| Error::bad_state("read")))
        }
    }

    /// Dump current hardware setup.
    pub fn dump_hw_setup(&self, out: &mut Output) -> Result<()> {
        let s = self.setup_ref("dump_hw_setup")?;
        (|| -> fmt::Result {
            writeln!(out, "stream       : {}", self.stream)?;
            writeln!(out, "access       : {}", s.access)?;
            writeln!(out, "format       : {}", s.format)?;
            writeln!(out, "subformat    : {}", s.subformat)?;
            writeln!(out, "channels     : {}", s.channels)?;
            writeln!(out, "rate         : {}", s.rate)?;
            writeln!(out, "exact rate   : {} ({}/{})", s.rate_num as f64 / s.rate_den as f64, s.rate_num, s.rate_den)?;
            writeln!(out, "msbits       : {}", s.msbits)?;
            writeln!(out, "buffer_size  : {}", s.buffer_size)?;
            writeln!(out, "period_size  : {}", s.period_size)?;
            writeln!(out, "period_time  : {}", s.period_time)?;
            writeln!(out, "tick_time    : {}", s.tick_time)
        })()
        .map_err(|_| Error::bad_value("dump_hw_setup"))
    }

    /// Dump current software setup.
    pub fn dump_sw_setup(&self, out: &mut Output) -> Result<()> {
        let sw = self.sw_ref("dump_sw_setup")?;
        (|| -> fmt::Result {
            writeln!(out, "start_mode   : {}", sw.start_mode)?;
            writeln!(out, "xrun_mode    : {}", sw.xrun_mode)?;
            writeln!(out, "tstamp_mode  : {}", sw.tstamp_mode)?;
            writeln!(out, "period_step  : {}", sw.period_step)?;
            writeln!(out, "sleep_min    : {}", sw.sleep_min)?;
            writeln!(out, "avail_min    : {}", sw.avail_min)?;
            writeln!(out, "xfer_align   : {}", sw.xfer_align)?;
            writeln!(out, "silence_threshold: {}", sw.silence_threshold)?;
            writeln!(out, "silence_size : {}", sw.silence_size)?;
            writeln!(out, "boundary     : {}", sw.boundary)
        })()
        .map_err(|_| Error::bad_value("dump_sw_setup"))
    }

    /// Dump current setup, hardware then software.
    pub fn dump_setup(&self, out: &mut Output) -> Result<()> {
        self.dump_hw_setup(out)?;
        self.dump_sw_setup(out)
    }

    /// Dump the endpoint: the backend banner, then the setup if one is
    /// installed.
    pub fn dump(&self, out: &mut Output) -> Result<()> {
        self.io.dump(out)?;
        if self.setup.is_some() {
            writeln!(out, "Its setup is:").map_err(|_| Error::bad_value("dump"))?;
            self.dump_setup(out)?;
        }
        Ok(())
    }

    /// `std::io::Read`/`Write` adapter over interleaved transfer.
    pub fn io(&mut self) -> IO<'_> { IO(self) }
}

impl Drop for Pcm {
    fn drop(&mut self) {
        if self.setup.is_some() {
            let r = if self.mode.contains(Mode::NONBLOCK) || self.stream == Direction::Capture {
                self.io.stop()
            } else {
                self.io.drain()
            };
            if let Err(e) = r {
                log::debug!("{}: stop at close: {}", self.name, e);
            }
            if self.io.state() > State::Prepared {
                let _ = self.io.stop();
            }
            if let Err(e) = self.hw_free() {
                log::debug!("{}: hw_free at close: {}", self.name, e);
            }
        }
        if let Err(e) = self.io.close() {
            log::debug!("{}: close: {}", self.name, e);
        }
    }
}

impl PollDescriptors for Pcm {
    fn count(&self) -> usize { 1 }

    fn fill(&self, a: &mut [libc::pollfd]) -> Result<usize> {
        if !a.is_empty() {
            let events = match self.stream {
                Direction::Playback => PollFlags::POLLOUT,
                Direction::Capture => PollFlags::POLLIN,
            };
            a[0] = libc::pollfd { fd: self.io.poll_descriptor()?, events: events.bits(), revents: 0 };
        }
        Ok(1)
    }

    fn revents(&self, a: &[libc::pollfd]) -> Result<PollFlags> {
        Ok(PollFlags::from_bits_truncate(a[0].revents))
    }
}

/// Implements `std::io::Read` and `std::io::Write` for `Pcm`
pub struct IO<'a>(&'a mut Pcm);

impl fmt::Debug for IO<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "IO({})", self.0.name)
    }
}

fn to_io_err(e: Error) -> stdio::Error {
    stdio::Error::other(e)
}

impl stdio::Read for IO<'_> {
    fn read(&mut self, buf: &mut [u8]) -> stdio::Result<usize> {
        let frames = self.0.bytes_to_frames(buf.len() as isize).map_err(to_io_err)?;
        let r = self.0.readi(buf, frames).map_err(to_io_err)?;
        Ok(self.0.frames_to_bytes(r).map_err(to_io_err)? as usize)
    }
}

impl stdio::Write for IO<'_> {
    fn write(&mut self, buf: &[u8]) -> stdio::Result<usize> {
        let frames = self.0.bytes_to_frames(buf.len() as isize).map_err(to_io_err)?;
        let r = self.0.writei(buf, frames).map_err(to_io_err)?;
        Ok(self.0.frames_to_bytes(r).map_err(to_io_err)? as usize)
    }
    fn flush(&mut self) -> stdio::Result<()> { Ok(()) }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mem;

    fn prepared(stream: Direction) -> (Pcm, mem::MemControl) {
        let (mut pcm, ctl) = mem::open("test", stream, Mode::empty()).unwrap();
        let mut hwp = pcm.hw_params_any().unwrap();
        hwp.set_access(Access::RwInterleaved).unwrap();
        hwp.set_format(Format::S16LE).unwrap();
        hwp.set_channels(2).unwrap();
        hwp.set_rate(44_100, crate::ValueOr::Nearest).unwrap();
        hwp.set_period_size(1024, crate::ValueOr::Nearest).unwrap();
        hwp.set_buffer_size(4096).unwrap();
        pcm.hw_params(&mut hwp).unwrap();
        (pcm, ctl)
    }

    #[test]
    fn names_are_contract() {
        assert_eq!(State::XRun.name(), "XRUN");
        assert_eq!(State::Prepared.to_string(), "PREPARED");
        assert_eq!(Access::MmapNonInterleaved.name(), "MMAP_NONINTERLEAVED");
        assert_eq!(Direction::Playback.name(), "PLAYBACK");
        assert_eq!(Format::Iec958SubframeLE.name(), "IEC958_SUBFRAME_LE");
    }

    #[test]
    fn conversions_are_exact() {
        let (pcm, _ctl) = prepared(Direction::Playback);
        assert_eq!(pcm.bytes_to_frames(4096).unwrap(), 1024);
        assert_eq!(pcm.frames_to_bytes(1024).unwrap(), 4096);
        for n in [0i64, 1, 17, 4096] {
            assert_eq!(pcm.bytes_to_frames(pcm.frames_to_bytes(n).unwrap()).unwrap(), n);
        }
        assert_eq!(pcm.bytes_to_samples(4).unwrap(), 2);
        assert_eq!(pcm.samples_to_bytes(2).unwrap(), 4);
    }

    #[test]
    fn ops_without_setup_are_bad_state() {
        let (mut pcm, _ctl) = mem::open("raw", Direction::Playback, Mode::empty()).unwrap();
        assert_eq!(pcm.start().unwrap_err().kind(), crate::ErrorKind::BadState);
        assert_eq!(pcm.prepare().unwrap_err().kind(), crate::ErrorKind::BadState);
        assert_eq!(pcm.delay().unwrap_err().kind(), crate::ErrorKind::BadState);
        assert_eq!(pcm.writei(&[0; 64], 4).unwrap_err().kind(), crate::ErrorKind::BadState);
        assert_eq!(pcm.hw_free().unwrap_err().kind(), crate::ErrorKind::BadState);
        assert_eq!(pcm.state(), State::Open);
    }

    #[test]
    fn dump_labels_are_stable() {
        let (mut pcm, _ctl) = prepared(Direction::Playback);
        let mut out = Output::buffer_open();
        pcm.dump(&mut out).unwrap();
        let text = out.to_string();
        assert!(text.contains("Memory ring\n"));
        assert!(text.contains("Its setup is:\n"));
        assert!(text.contains("stream       : PLAYBACK\n"));
        assert!(text.contains("access       : RW_INTERLEAVED\n"));
        assert!(text.contains("format       : S16_LE\n"));
        assert!(text.contains("subformat    : STD\n"));
        assert!(text.contains("channels     : 2\n"));
        assert!(text.contains("rate         : 44100\n"));
        assert!(text.contains("exact rate   : 44100 (44100/1)\n"));
        assert!(text.contains("msbits       : 16\n"));
        assert!(text.contains("buffer_size  : 4096\n"));
        assert!(text.contains("period_size  : 1024\n"));
        assert!(text.contains("period_time  : 23219\n"));
        assert!(text.contains("tick_time    : 0\n"));
        assert!(text.contains("start_mode   : DATA\n"));
        assert!(text.contains("xrun_mode    : STOP\n"));
        assert!(text.contains("tstamp_mode  : NONE\n"));
        assert!(text.contains("period_step  : 1\n"));
        assert!(text.contains("sleep_min    : 0\n"));
        assert!(text.contains("avail_min    : 1024\n"));
        assert!(text.contains("xfer_align   : 1\n"));
        assert!(text.contains("silence_threshold: 0\n"));
        assert!(text.contains("silence_size : 0\n"));
        assert!(text.contains("boundary     : 1073741824\n"));

        let mut out = Output::buffer_open();
        pcm.status().unwrap().dump(&mut out).unwrap();
        let text = out.to_string();
        assert!(text.contains("state       : PREPARED\n"));
        assert!(text.contains("trigger_time: 0.000000\n"));
        assert!(text.contains("delay       : 0\n"));
        assert!(text.contains("avail       : 4096\n"));
        assert!(text.contains("avail_max   : "));
        let _ = pcm.drop();
    }

    #[test]
    fn poll_descriptor_export() {
        let (pcm, _ctl) = prepared(Direction::Playback);
        let fds = (&pcm as &dyn PollDescriptors).get().unwrap();
        assert_eq!(fds.len(), 1);
        assert_eq!(fds[0].events, PollFlags::POLLOUT.bits());

        let (cap, _cctl) = prepared(Direction::Capture);
        let fds = (&cap as &dyn PollDescriptors).get().unwrap();
        assert_eq!(fds[0].events, PollFlags::POLLIN.bits());
    }

    #[test]
    fn io_adapter_moves_whole_frames() {
        use std::io::Write;
        let (mut pcm, _ctl) = prepared(Direction::Playback);
        let buf = [0u8; 256];
        assert_eq!(pcm.io().write(&buf).unwrap(), 256);
        assert_eq!(pcm.state(), State::Running);
    }

    #[test]
    fn link_is_backend_contract() {
        let (mut a, _ca) = prepared(Direction::Playback);
        let (b, _cb) = prepared(Direction::Capture);
        assert_eq!(a.link(&b).unwrap_err().kind(), crate::ErrorKind::NotSupported);
        assert_eq!(a.unlink().unwrap_err().kind(), crate::ErrorKind::NotSupported);
    }

    #[test]
    fn wait_reports_ready_on_writable_playback() {
        let (pcm, _ctl) = prepared(Direction::Playback);
        assert!(pcm.wait(100).unwrap());
    }
}
