//! Tiny poll wrapper
//!
//! A tiny wrapper around libc's poll system call.

use super::error::*;
use libc::pollfd;

bitflags::bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct PollFlags: ::libc::c_short {
        const POLLIN  = ::libc::POLLIN;
        const POLLPRI = ::libc::POLLPRI;
        const POLLOUT = ::libc::POLLOUT;
        const POLLERR = ::libc::POLLERR;
        const POLLHUP = ::libc::POLLHUP;
        const POLLNVAL = ::libc::POLLNVAL;
    }
}

pub trait PollDescriptors {
    fn count(&self) -> usize;
    fn fill(&self, fds: &mut [pollfd]) -> Result<usize>;
    fn revents(&self, fds: &[pollfd]) -> Result<PollFlags>;

    /// Wrapper around count and fill - returns an array of pollfds
    fn get(&self) -> Result<Vec<pollfd>> {
        let mut v = vec![pollfd { fd: 0, events: 0, revents: 0 }; self.count()];
        if self.fill(&mut v)? != v.len() {
            Err(Error::unsupported("did not fill the poll descriptors array"))
        } else {
            Ok(v)
        }
    }
}

impl PollDescriptors for pollfd {
    fn count(&self) -> usize { 1 }
    fn fill(&self, a: &mut [pollfd]) -> Result<usize> { a[0] = *self; Ok(1) }
    fn revents(&self, a: &[pollfd]) -> Result<PollFlags> { Ok(PollFlags::from_bits_truncate(a[0].revents)) }
}

/// Wrapper around the libc poll call.
pub fn poll(fds: &mut [pollfd], timeout: i32) -> Result<usize> {
    let r = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout as libc::c_int) };
    if r >= 0 { Ok(r as usize) } else { Err(Error::last_os("poll")) }
}

/// Builds a pollfd array, polls it, and returns the poll descriptors which have non-zero revents.
pub fn poll_all<'a>(desc: &[&'a dyn PollDescriptors], timeout: i32) -> Result<Vec<(&'a dyn PollDescriptors, PollFlags)>> {
    let mut pollfds: Vec<pollfd> = vec![];
    let mut indices = vec![];
    for v2 in desc.iter().map(|q| q.get()) {
        let v = v2?;
        indices.push(pollfds.len()..pollfds.len() + v.len());
        pollfds.extend(v);
    }

    poll(&mut pollfds, timeout)?;

    let mut res = vec![];
    for (i, r) in indices.into_iter().enumerate() {
        let z = desc[i].revents(&pollfds[r])?;
        if !z.is_empty() { res.push((desc[i], z)); }
    }
    Ok(res)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pollfd_roundtrip() {
        let p = pollfd { fd: 0, events: PollFlags::POLLOUT.bits(), revents: 0 };
        let v = (&p as &dyn PollDescriptors).get().unwrap();
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].events, PollFlags::POLLOUT.bits());
    }

    #[test]
    fn poll_dev_null_ready() {
        let fd = unsafe { libc::open(c"/dev/null".as_ptr(), libc::O_RDWR) };
        assert!(fd >= 0);
        let mut fds = [pollfd { fd, events: PollFlags::POLLOUT.bits(), revents: 0 }];
        let n = poll(&mut fds, 100).unwrap();
        assert_eq!(n, 1);
        let fl = fds[0].revents(&fds).unwrap();
        assert!(fl.contains(PollFlags::POLLOUT));
        unsafe { libc::close(fd) };
    }
}
