//! User-space PCM digital audio I/O core.
//!
//! This crate implements the framing engine, transfer loop and plugin
//! composition model that connect an application producing or consuming
//! audio frames to a lower-level endpoint: the stream state machine, the
//! hardware/software parameter negotiation, the channel-area engine with
//! sub-byte precision, and the blocking/non-blocking transfer engine over
//! a shared ring buffer.
//!
//! Start with [`Pcm`] for playback and capture. Concrete device backends
//! (hardware, files, shared memory, converters) live outside this crate;
//! they plug in through the [`pcm::SlowOps`]/[`pcm::FastOps`] endpoint
//! contract. The in-memory reference endpoint in [`mem`] implements that
//! contract in full and is what the test suite runs against.

macro_rules! name_enum {
 ($(#[$attr:meta])+ $name:ident, $static_name:ident [$count:expr], $( $a:ident = $b:expr),* ,) =>
{
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
$(#[$attr])*
pub enum $name {
$(
    $a,
)*
}

static $static_name: [$name; $count] =
  [ $( $name::$a, )* ];

impl $name {
    /// Returns a slice of all possible values; useful for iteration
    pub fn all() -> &'static [$name] { &$static_name[..] }

    /// The external ASCII name; these strings are part of the dump contract.
    pub fn name(self) -> &'static str {
        match self { $( $name::$a => $b, )* }
    }
}

impl ::std::fmt::Display for $name {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        f.write_str(self.name())
    }
}

}
}

/// Stream direction: which way frames flow through an endpoint.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Direction {
    Playback,
    Capture,
}
impl Direction {
    #[inline]
    pub fn input() -> Direction { Direction::Capture }
    #[inline]
    pub fn output() -> Direction { Direction::Playback }

    /// The external ASCII name; part of the dump contract.
    pub fn name(self) -> &'static str {
        match self {
            Direction::Playback => "PLAYBACK",
            Direction::Capture => "CAPTURE",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Used to restrict hw parameters. In case the submitted
/// value is unavailable, in which direction should one search
/// for available values?
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueOr {
    /// The value set is the submitted value, or less
    Less = -1,
    /// The value set is the submitted value, or the nearest
    Nearest = 0,
    /// The value set is the submitted value, or greater
    Greater = 1,
}

bitflags::bitflags! {
    /// Open mode flags for an endpoint.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct Mode: u32 {
        /// Transfer calls return [`ErrorKind::Again`](error::ErrorKind::Again)
        /// instead of blocking.
        const NONBLOCK = 0x1;
        /// Signal-per-period delivery (only honored by endpoints that
        /// implement the async slow op).
        const ASYNC = 0x2;
    }
}

mod error;
pub use error::{Error, ErrorKind, Result};

pub mod format;
pub use format::Format;

pub mod area;
pub use area::Area;

pub mod hwparams;
pub use hwparams::HwParams;

pub mod swparams;
pub use swparams::SwParams;

mod ring;

pub mod pcm;
pub use pcm::Pcm;

pub mod plugin;

pub mod mem;

pub mod poll;
pub use poll::PollDescriptors;

mod io;
pub use io::Output;
