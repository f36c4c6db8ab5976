//! Plugin composition.
//!
//! Pipelines are stacks of endpoints: a wrapper owns its slave, which may
//! itself be a wrapper. [`Plug`] is the generic pass-through shape every
//! transforming plugin builds on - it forwards both operation tables to
//! the slave and owns its lifetime, so closing a wrapper closes its slave
//! exactly once, in reverse construction order.
//!
//! Device-name parsing lives outside the core. A dispatcher translates
//! names like `hw:0,0`, `plug:hw:0,0`, `shm:<socket>,<name>`,
//! `file:<path>,raw` or `null` into a [`Descriptor`] tree whose leaves
//! are already-resolved factories, then hands the tree to [`open`].

use std::fmt;
use std::os::unix::io::RawFd;

use super::area::Area;
use super::error::{Error, Result};
use super::hwparams::HwParams;
use super::io::Output;
use super::pcm::{FastOps, Frames, Pcm, Setup, SlowOps, State, Status};
use super::swparams::SwParams;
use super::{Direction, Mode};

/// Factory for a leaf endpoint. Name resolution and configuration lookup
/// happen outside the core; the compositor only consumes resolved
/// factories.
pub trait EndpointFactory {
    fn open(&self, name: &str, stream: Direction, mode: Mode) -> Result<Pcm>;
}

/// A pipeline description: a resolved leaf, wrapped zero or more times.
pub enum Descriptor<'a> {
    Leaf(&'a dyn EndpointFactory),
    Plug(Box<Descriptor<'a>>),
}

impl fmt::Debug for Descriptor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Descriptor::Leaf(_) => write!(f, "Leaf"),
            Descriptor::Plug(s) => write!(f, "Plug({:?})", s),
        }
    }
}

/// Open a pipeline from a descriptor.
///
/// Construction is slave-first: the slave stack must open successfully
/// before any wrapper state exists, and a wrapper failure closes the
/// already-open slave. Opening never touches device state beyond what is
/// needed to return a usable OPEN endpoint, and the compositor never
/// observes audio data.
pub fn open(desc: &Descriptor, name: &str, stream: Direction, mode: Mode) -> Result<Pcm> {
    match desc {
        Descriptor::Leaf(factory) => factory.open(name, stream, mode),
        Descriptor::Plug(slave) => {
            let slave = open(slave, name, stream, mode)?;
            open_plug(name, slave)
        }
    }
}

/// Wrap an already-open slave in a pass-through plugin.
pub fn open_plug(name: &str, slave: Pcm) -> Result<Pcm> {
    let stream = slave.stream();
    let mode = slave.mode();
    Pcm::open_with(name, stream, mode, Box::new(Plug { slave }))
}

/// Generic pass-through plugin endpoint over an owned slave.
#[derive(Debug)]
pub struct Plug {
    slave: Pcm,
}

impl SlowOps for Plug {
    fn kind(&self) -> &'static str { "plug" }

    fn nonblock(&mut self, nonblock: bool) -> Result<()> {
        self.slave.set_nonblock(nonblock)
    }

    fn hw_refine(&self, params: &mut HwParams) -> Result<()> {
        self.slave.io.hw_refine(params)
    }

    fn hw_params(&mut self, setup: &Setup) -> Result<()> {
        self.slave.io.hw_params(setup)?;
        let sw = SwParams::default_for(setup);
        if let Err(e) = self.slave.io.sw_params(&sw) {
            let _ = self.slave.io.hw_free();
            return Err(e);
        }
        self.slave.setup = Some(*setup);
        self.slave.sw = Some(sw);
        Ok(())
    }

    fn hw_free(&mut self) -> Result<()> {
        let r = self.slave.io.hw_free();
        self.slave.setup = None;
        self.slave.sw = None;
        r
    }

    fn sw_params(&mut self, sw: &SwParams) -> Result<()> {
        self.slave.io.sw_params(sw)?;
        self.slave.sw = Some(*sw);
        Ok(())
    }

    fn dump(&self, out: &mut Output) -> Result<()> {
        use std::fmt::Write;
        writeln!(out, "Plug PCM: {}", self.slave.name()).map_err(|_| Error::bad_value("dump"))?;
        self.slave.dump(out)
    }

    fn poll_descriptor(&self) -> Result<RawFd> {
        self.slave.io.poll_descriptor()
    }

    fn link_descriptor(&self) -> Result<RawFd> {
        self.slave.io.link_descriptor()
    }

    fn link(&mut self, other: RawFd) -> Result<()> {
        self.slave.io.link(other)
    }

    fn unlink(&mut self) -> Result<()> {
        self.slave.io.unlink()
    }

    fn close(&mut self) -> Result<()> {
        // The slave closes through its own drop when this box goes away.
        Ok(())
    }
}

impl FastOps for Plug {
    fn state(&self) -> State { self.slave.io.state() }
    fn status(&self) -> Result<Status> { self.slave.io.status() }
    fn delay(&self) -> Result<Frames> { self.slave.io.delay() }
    fn prepare(&mut self) -> Result<()> { self.slave.io.prepare() }
    fn reset(&mut self) -> Result<()> { self.slave.io.reset() }
    fn start(&mut self) -> Result<()> { self.slave.io.start() }
    fn stop(&mut self) -> Result<()> { self.slave.io.stop() }
    fn drain(&mut self) -> Result<()> { self.slave.io.drain() }
    fn pause(&mut self, enable: bool) -> Result<()> { self.slave.io.pause(enable) }
    fn rewind(&mut self, frames: u64) -> Result<u64> { self.slave.io.rewind(frames) }
    fn avail_update(&mut self) -> Result<u64> { self.slave.io.avail_update() }
    fn mmap_forward(&mut self, frames: u64) -> Result<u64> { self.slave.io.mmap_forward(frames) }
    fn mmap_begin(&mut self) -> Result<(Vec<Area>, u64, u64)> { self.slave.io.mmap_begin() }

    fn write_xfer(&mut self, areas: &[Area], offset: u64, frames: u64) -> Result<u64> {
        self.slave.io.write_xfer(areas, offset, frames)
    }

    fn read_xfer(&mut self, areas: &[Area], offset: u64, frames: u64) -> Result<u64> {
        self.slave.io.read_xfer(areas, offset, frames)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mem::{self, MemControl};
    use crate::pcm::Access;
    use crate::{Format, ValueOr};
    use std::cell::RefCell;

    struct MemFactory {
        ctl: RefCell<Option<MemControl>>,
    }

    impl MemFactory {
        fn new() -> MemFactory {
            MemFactory { ctl: RefCell::new(None) }
        }
    }

    impl EndpointFactory for MemFactory {
        fn open(&self, name: &str, stream: Direction, mode: Mode) -> Result<Pcm> {
            let (pcm, ctl) = mem::open(name, stream, mode)?;
            *self.ctl.borrow_mut() = Some(ctl);
            Ok(pcm)
        }
    }

    struct FailingFactory;

    impl EndpointFactory for FailingFactory {
        fn open(&self, _name: &str, _stream: Direction, _mode: Mode) -> Result<Pcm> {
            Err(Error::bad_value("no such device"))
        }
    }

    fn configure(pcm: &mut Pcm) {
        let mut hwp = pcm.hw_params_any().unwrap();
        hwp.set_access(Access::RwInterleaved).unwrap();
        hwp.set_format(Format::S16LE).unwrap();
        hwp.set_channels(2).unwrap();
        hwp.set_rate(48_000, ValueOr::Nearest).unwrap();
        hwp.set_period_size(8, ValueOr::Nearest).unwrap();
        hwp.set_buffer_size(32).unwrap();
        pcm.hw_params(&mut hwp).unwrap();
    }

    #[test]
    fn plug_stack_transfers_through_the_slave() {
        let factory = MemFactory::new();
        // two wrappers deep: Plug(Plug(Leaf))
        let desc = Descriptor::Plug(Box::new(Descriptor::Plug(Box::new(Descriptor::Leaf(&factory)))));
        let mut pcm = open(&desc, "plug-stack", Direction::Playback, Mode::empty()).unwrap();
        assert_eq!(pcm.kind(), "plug");
        configure(&mut pcm);
        let ctl = factory.ctl.borrow().clone().unwrap();
        assert_eq!(ctl.state(), crate::pcm::State::Prepared);

        pcm.writei(&[1u8; 64], 16).unwrap();
        assert_eq!(pcm.state(), crate::pcm::State::Running);
        assert_eq!(ctl.appl_ptr(), 16);
        assert_eq!(pcm.delay().unwrap(), 16);
        ctl.advance(16).unwrap();
        assert_eq!(pcm.delay().unwrap(), 0);
    }

    #[test]
    fn wrapper_dump_prefixes_the_slave_chain() {
        let factory = MemFactory::new();
        let desc = Descriptor::Plug(Box::new(Descriptor::Leaf(&factory)));
        let mut pcm = open(&desc, "dumped", Direction::Playback, Mode::empty()).unwrap();
        configure(&mut pcm);
        let mut out = crate::Output::buffer_open();
        pcm.dump(&mut out).unwrap();
        let text = out.to_string();
        assert!(text.starts_with("Plug PCM: dumped\n"));
        assert!(text.contains("Memory ring\n"));
        assert!(text.contains("stream       : PLAYBACK\n"));
    }

    #[test]
    fn closing_the_wrapper_closes_the_slave_exactly_once() {
        let factory = MemFactory::new();
        let desc = Descriptor::Plug(Box::new(Descriptor::Leaf(&factory)));
        let mut pcm = open(&desc, "owned", Direction::Playback, Mode::empty()).unwrap();
        configure(&mut pcm);
        let ctl = factory.ctl.borrow().clone().unwrap();
        drop(pcm);
        // the slave went through its teardown: configuration released,
        // stream back in OPEN
        assert_eq!(ctl.state(), crate::pcm::State::Open);
    }

    #[test]
    fn leaf_failure_propagates_before_wrapper_state_exists() {
        let desc = Descriptor::Plug(Box::new(Descriptor::Leaf(&FailingFactory)));
        let e = open(&desc, "broken", Direction::Playback, Mode::empty()).unwrap_err();
        assert_eq!(e.kind(), crate::ErrorKind::BadValue);
    }

    #[test]
    fn nonblock_propagates_down_the_stack() {
        let factory = MemFactory::new();
        let desc = Descriptor::Plug(Box::new(Descriptor::Leaf(&factory)));
        let mut pcm = open(&desc, "nb", Direction::Playback, Mode::NONBLOCK).unwrap();
        configure(&mut pcm);
        assert!(pcm.mode().contains(Mode::NONBLOCK));
        // fill the ring, then the next write must fail with Again
        pcm.writei(&[0u8; 128], 32).unwrap();
        let e = pcm.writei(&[0u8; 128], 32).unwrap_err();
        assert_eq!(e.kind(), crate::ErrorKind::Again);
    }
}
