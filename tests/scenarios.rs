//! End-to-end transfer scenarios over the in-memory endpoint.

use anyhow::Result;
use pcmio::mem::{self, MemControl};
use pcmio::pcm::{Access, State};
use pcmio::swparams::StartMode;
use pcmio::{Direction, ErrorKind, Format, Mode, Pcm, ValueOr};

fn open_playback(mode: Mode) -> Result<(Pcm, MemControl)> {
    let _ = env_logger::builder().is_test(true).try_init();
    let (mut pcm, ctl) = mem::open("scenario", Direction::Playback, mode)?;
    let mut hwp = pcm.hw_params_any()?;
    hwp.set_access(Access::RwInterleaved)?;
    hwp.set_format(Format::S16LE)?;
    hwp.set_channels(2)?;
    hwp.set_rate(44_100, ValueOr::Nearest)?;
    hwp.set_period_size(1024, ValueOr::Nearest)?;
    hwp.set_buffer_size(4096)?;
    pcm.hw_params(&mut hwp)?;
    Ok((pcm, ctl))
}

#[test]
fn state_machine_walk() -> Result<()> {
    let (mut pcm, _ctl) = open_playback(Mode::empty())?;
    assert_eq!(pcm.state(), State::Prepared);

    // a zero-frame write is a no-op and must not touch state
    assert_eq!(pcm.writei(&[0u8; 16], 0)?, 0);
    assert_eq!(pcm.state(), State::Prepared);

    // first data write auto-starts the stream in DATA mode
    let period = vec![0u8; 4096];
    assert_eq!(pcm.writei(&period, 1024)?, 1024);
    assert_eq!(pcm.state(), State::Running);

    pcm.drop()?;
    assert_eq!(pcm.state(), State::Setup);
    Ok(())
}

#[test]
fn full_buffer_write_starts_and_completes() -> Result<()> {
    let (mut pcm, _ctl) = open_playback(Mode::empty())?;
    let buf = vec![0u8; 4096 * 4];
    assert_eq!(pcm.writei(&buf, 4096)?, 4096);
    assert_eq!(pcm.state(), State::Running);
    assert_eq!(pcm.delay()?, 4096);
    pcm.drop()?;
    Ok(())
}

#[test]
fn delay_tracks_queued_frames() -> Result<()> {
    let (mut pcm, _ctl) = open_playback(Mode::empty())?;
    let buf = vec![0u8; 4096 * 4];
    pcm.writei(&buf, 1000)?;
    assert_eq!(pcm.state(), State::Running);
    pcm.writei(&buf, 500)?;
    assert_eq!(pcm.delay()?, 1500);
    pcm.drop()?;
    Ok(())
}

#[test]
fn xrun_recovery_via_prepare() -> Result<()> {
    let (mut pcm, ctl) = open_playback(Mode::empty())?;
    let buf = vec![0u8; 4096 * 4];
    pcm.writei(&buf, 1024)?;
    assert_eq!(pcm.state(), State::Running);

    // the consumer drains the whole ring: underrun
    ctl.advance(1024)?;
    assert_eq!(pcm.avail_update().unwrap_err().kind(), ErrorKind::Xrun);
    assert_eq!(pcm.state(), State::XRun);
    assert_eq!(pcm.writei(&buf, 1024).unwrap_err().kind(), ErrorKind::Xrun);

    // a single prepare fully recovers
    pcm.prepare()?;
    assert_eq!(pcm.state(), State::Prepared);
    assert_eq!(pcm.writei(&buf, 1024)?, 1024);
    assert_eq!(pcm.state(), State::Running);
    pcm.drop()?;
    Ok(())
}

#[test]
fn nonblock_full_ring_returns_again() -> Result<()> {
    let (mut pcm, ctl) = open_playback(Mode::NONBLOCK)?;
    let buf = vec![0u8; 4096 * 4];
    assert_eq!(pcm.writei(&buf, 4096)?, 4096);
    assert_eq!(pcm.state(), State::Running);

    let e = pcm.writei(&buf, 10).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Again);

    // one period later there is room again
    ctl.advance(1024)?;
    assert_eq!(pcm.writei(&buf, 1024)?, 1024);
    pcm.drop()?;
    Ok(())
}

#[test]
fn rewind_clamps_against_the_ring_window() -> Result<()> {
    let (mut pcm, ctl) = open_playback(Mode::empty())?;
    let mut sw = pcm.sw_params_current()?;
    sw.start_mode = StartMode::Explicit;
    pcm.sw_params(&sw)?;

    let buf = vec![0u8; 4096 * 4];
    pcm.writei(&buf, 1000)?;
    assert_eq!(pcm.state(), State::Prepared);
    ctl.advance(800)?;

    assert_eq!(pcm.rewind(150)?, 150);
    assert_eq!(pcm.delay()?, 50);
    // a huge rewind is clamped to what is still rewindable
    assert_eq!(pcm.rewind(1_000_000)?, 50);
    assert_eq!(pcm.delay()?, 0);
    pcm.drop()?;
    Ok(())
}

#[test]
fn xfer_align_rounds_the_request() -> Result<()> {
    let (mut pcm, _ctl) = open_playback(Mode::empty())?;
    let mut sw = pcm.sw_params_current()?;
    sw.xfer_align = 512;
    pcm.sw_params(&sw)?;

    let buf = vec![0u8; 4096 * 4];
    // one frame short of the alignment rounds down to nothing
    assert_eq!(pcm.writei(&buf, 511)?, 0);
    assert_eq!(pcm.state(), State::Prepared);
    // exactly one alignment unit goes through whole
    assert_eq!(pcm.writei(&buf, 512)?, 512);
    assert_eq!(pcm.delay()?, 512);
    pcm.drop()?;
    Ok(())
}

#[test]
fn capture_stack_round_trips_samples() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let (mut pcm, ctl) = mem::open("cap", Direction::Capture, Mode::empty())?;
    let mut hwp = pcm.hw_params_any()?;
    hwp.set_access(Access::RwInterleaved)?;
    hwp.set_format(Format::S16LE)?;
    hwp.set_channels(2)?;
    hwp.set_rate(48_000, ValueOr::Nearest)?;
    hwp.set_period_size(16, ValueOr::Nearest)?;
    hwp.set_buffer_size(64)?;
    pcm.hw_params(&mut hwp)?;

    pcm.start()?;
    assert_eq!(pcm.state(), State::Running);
    let data: Vec<u8> = (0..128u32).map(|i| (i * 3) as u8).collect();
    ctl.produce(&data, 32)?;
    assert_eq!(pcm.avail_update()?, 32);

    let mut got = vec![0u8; 128];
    assert_eq!(pcm.readi(&mut got, 32)?, 32);
    assert_eq!(got, data);
    assert_eq!(pcm.delay()?, 0);
    pcm.drop()?;
    Ok(())
}
