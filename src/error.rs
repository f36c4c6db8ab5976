use std::borrow::Cow;
use std::fmt;

/// Machine-readable failure class. These are the error kinds of the core,
/// not the error codes of any one platform.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation invalid in the endpoint's current state.
    BadState,
    /// Underrun (playback) or overrun (capture); the ring boundary was
    /// crossed. Fully recoverable with `prepare`.
    Xrun,
    /// The backend disappeared underneath the endpoint.
    NotConnected,
    /// Non-blocking mode and the operation would block; partial progress
    /// may accompany this on transfer calls.
    Again,
    /// The operation is absent from the endpoint's contract.
    NotSupported,
    /// Invalid parameter to `hw_params`/`sw_params`.
    BadValue,
    /// The constraint space cannot be satisfied.
    Unreachable,
    /// OS-level failure pass-through (raw errno).
    Io(i32),
}

impl ErrorKind {
    fn describe(&self) -> &'static str {
        match *self {
            ErrorKind::BadState => "operation invalid in current state",
            ErrorKind::Xrun => "underrun/overrun",
            ErrorKind::NotConnected => "backend not connected",
            ErrorKind::Again => "operation would block",
            ErrorKind::NotSupported => "operation not supported",
            ErrorKind::BadValue => "invalid parameter value",
            ErrorKind::Unreachable => "constraint space cannot be satisfied",
            ErrorKind::Io(_) => "I/O error",
        }
    }
}

/// Most core operations can fail. If so, the failure is wrapped into this
/// `Error` struct: an optional static context (the operation or parameter
/// involved) plus the [`ErrorKind`].
#[derive(Debug)]
pub struct Error(Option<Cow<'static, str>>, ErrorKind);

pub type Result<T> = ::std::result::Result<T, Error>;

impl Error {
    pub fn new(func: Option<Cow<'static, str>>, kind: ErrorKind) -> Error { Error(func, kind) }
    pub fn kind(&self) -> ErrorKind { self.1 }
    /// The operation or parameter the error is keyed to, if any.
    pub fn context(&self) -> Option<&str> { self.0.as_deref() }

    pub(crate) fn bad_state(func: &'static str) -> Error { Error(Some(func.into()), ErrorKind::BadState) }
    pub(crate) fn xrun(func: &'static str) -> Error { Error(Some(func.into()), ErrorKind::Xrun) }
    pub(crate) fn not_connected(func: &'static str) -> Error { Error(Some(func.into()), ErrorKind::NotConnected) }
    pub(crate) fn again(func: &'static str) -> Error { Error(Some(func.into()), ErrorKind::Again) }
    pub(crate) fn unsupported(func: &'static str) -> Error { Error(Some(func.into()), ErrorKind::NotSupported) }
    pub(crate) fn bad_value(func: &'static str) -> Error { Error(Some(func.into()), ErrorKind::BadValue) }
    pub(crate) fn unreachable(param: &'static str) -> Error { Error(Some(param.into()), ErrorKind::Unreachable) }

    /// Capture `errno` from the last failed OS call.
    pub(crate) fn last_os(func: &'static str) -> Error {
        let e = ::std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        Error(Some(func.into()), ErrorKind::Io(e))
    }
}

impl ::std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.0 {
            Some(s) => write!(f, "PCM error: {} ({:?}) from '{}'", self.1.describe(), self.1, s),
            None => write!(f, "PCM error: {} ({:?})", self.1.describe(), self.1),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_carries_context() {
        let e = Error::bad_state("start");
        assert_eq!(e.kind(), ErrorKind::BadState);
        assert!(format!("{}", e).contains("'start'"));
    }

    #[test]
    fn io_kind_keeps_errno() {
        let e = Error::new(Some("poll".into()), ErrorKind::Io(4));
        match e.kind() {
            ErrorKind::Io(n) => assert_eq!(n, 4),
            _ => panic!("wrong kind"),
        }
    }
}
