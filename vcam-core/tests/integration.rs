//! Integration tests: the capture loop driven end to end against the
//! simulated camera, covering steady streaming, recovery and config
//! hand-off between frames.

use std::thread;
use std::time::{Duration, Instant};

use vcam_core::{
    CaptureConfig, CaptureEndpoints, CaptureLoop, CaptureState, DriverConfig, EventKind, Fault,
    Operation, Resolution, SimHandle, SimulatedCamera, Vc0706,
};

// ── Helpers ──────────────────────────────────────────────────────

fn fast_driver_config() -> DriverConfig {
    DriverConfig {
        read_timeout: Duration::from_millis(20),
        settle: Duration::ZERO,
        packet_len: 984,
    }
}

fn fast_capture_config() -> CaptureConfig {
    CaptureConfig {
        max_retries: 3,
        backoff: Duration::ZERO,
        init_backoff: Duration::ZERO,
    }
}

fn setup() -> (CaptureLoop<SimulatedCamera>, CaptureEndpoints, SimHandle) {
    let cam = SimulatedCamera::new();
    let handle = cam.handle();
    let driver = Vc0706::new(cam, fast_driver_config());
    let (capture, endpoints) = CaptureLoop::new(driver, fast_capture_config());
    (capture, endpoints, handle)
}

/// Step until the loop reaches `target`, failing after `limit` steps.
fn step_until(capture: &mut CaptureLoop<SimulatedCamera>, limit: usize, target: impl Fn(CaptureState) -> bool) {
    for _ in 0..limit {
        if target(capture.step()) {
            return;
        }
    }
    panic!("target state not reached; stuck in {}", capture.state());
}

fn drain_kinds(endpoints: &mut CaptureEndpoints) -> Vec<EventKind> {
    std::iter::from_fn(|| endpoints.events.try_recv().ok())
        .map(|e| e.kind)
        .collect()
}

// ── Steady streaming ─────────────────────────────────────────────

#[test]
fn test_streaming_publishes_a_frame_per_cycle() {
    let (mut capture, endpoints, handle) = setup();

    let mut trace = Vec::new();
    for _ in 0..14 {
        trace.push(capture.step());
    }
    assert_eq!(trace[0], CaptureState::Initializing);
    assert_eq!(trace[1], CaptureState::Capturing);
    for cycle in trace[2..].chunks(3) {
        assert!(matches!(cycle[0], CaptureState::Downloading { .. }));
        assert_eq!(cycle[1], CaptureState::Flushing);
        assert_eq!(cycle[2], CaptureState::Capturing);
    }

    assert_eq!(endpoints.frames.published(), 4);
    assert_eq!(handle.capture_count(), 4);
    assert_eq!(handle.flush_count(), 4);
    let frame = endpoints.frames.try_take_latest_frame().unwrap();
    assert!(frame.is_jpeg());
}

#[test]
fn test_spawned_loop_streams_until_stopped() {
    let (capture, endpoints, handle) = setup();
    let running = capture.spawn().unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut seen = 0;
    while seen < 5 && Instant::now() < deadline {
        if let Some(frame) = endpoints.frames.try_take_latest_frame() {
            assert!(frame.is_jpeg());
            assert_eq!(frame.resolution(), None);
            seen += 1;
        } else {
            thread::sleep(Duration::from_millis(1));
        }
    }
    assert_eq!(seen, 5);

    running.stop_and_join();
    assert!(handle.is_closed());
}

// ── Recovery ─────────────────────────────────────────────────────

#[test]
fn test_single_capture_failure_recovers_once() {
    let (mut capture, mut endpoints, handle) = setup();
    handle.inject(Fault::BadStatus {
        operation: "capture",
        nth: 2,
    });

    // First full cycle.
    step_until(&mut capture, 10, |s| s == CaptureState::Flushing);
    assert!(endpoints.frames.try_take_latest_frame().is_some());
    assert_eq!(capture.step(), CaptureState::Capturing);

    // Second capture fails.
    assert_eq!(capture.step(), CaptureState::Recovering);
    assert_eq!(capture.retries(), 1);
    assert!(endpoints.frames.try_take_latest_frame().is_none());
    assert_eq!(capture.step(), CaptureState::Capturing);

    // Third capture succeeds and publishes exactly one frame.
    assert!(matches!(capture.step(), CaptureState::Downloading { .. }));
    assert!(endpoints.frames.try_take_latest_frame().is_none());
    assert_eq!(capture.step(), CaptureState::Flushing);
    assert_eq!(capture.retries(), 0);
    assert!(endpoints.frames.try_take_latest_frame().is_some());
    assert!(endpoints.frames.try_take_latest_frame().is_none());
    assert_eq!(endpoints.frames.published(), 2);

    let failures = drain_kinds(&mut endpoints)
        .into_iter()
        .filter(|k| *k == EventKind::CycleFailed)
        .count();
    assert_eq!(failures, 1);
}

#[test]
fn test_corrupt_chunk_drops_whole_frame() {
    let (mut capture, endpoints, handle) = setup();
    step_until(&mut capture, 10, |s| matches!(s, CaptureState::Downloading { .. }));
    handle.inject(Fault::CorruptChunk { offset: 984 });

    assert_eq!(capture.step(), CaptureState::Recovering);
    assert_eq!(endpoints.frames.published(), 0);
    assert!(endpoints.frames.try_take_latest_frame().is_none());
}

#[test]
fn test_retry_bound_forces_reinit() {
    let (mut capture, mut endpoints, handle) = setup();
    step_until(&mut capture, 10, |s| s == CaptureState::Capturing);
    let resets = handle.reset_count();
    handle.set_unplugged(true);

    for expected_retries in 1..=3 {
        assert_eq!(capture.step(), CaptureState::Recovering);
        assert_eq!(capture.retries(), expected_retries);
        let next = capture.step();
        if expected_retries < 3 {
            assert_eq!(next, CaptureState::Capturing);
        } else {
            assert_eq!(next, CaptureState::Initializing);
            assert_eq!(capture.retries(), 0);
        }
    }

    handle.set_unplugged(false);
    assert_eq!(capture.step(), CaptureState::Capturing);
    assert_eq!(handle.reset_count(), resets + 1);

    let kinds = drain_kinds(&mut endpoints);
    assert_eq!(kinds.iter().filter(|k| **k == EventKind::CycleFailed).count(), 3);
    assert_eq!(kinds.iter().filter(|k| **k == EventKind::ForcedReinit).count(), 1);
}

#[test]
fn test_unplugged_camera_keeps_retrying_until_stopped() {
    let (capture, mut endpoints, handle) = setup();
    handle.set_unplugged(true);
    let running = capture.spawn().unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut init_failures = 0;
    while init_failures < 5 && Instant::now() < deadline {
        match endpoints.events.try_recv() {
            Ok(ev) if ev.kind == EventKind::InitFailed => init_failures += 1,
            Ok(_) => {}
            Err(_) => thread::sleep(Duration::from_millis(1)),
        }
    }
    assert_eq!(init_failures, 5);
    assert!(!running.is_finished());

    running.stop_and_join();
    assert!(handle.is_closed());
    assert_eq!(endpoints.frames.published(), 0);
}

// ── Config hand-off ──────────────────────────────────────────────

#[test]
fn test_resolution_change_waits_for_flush() {
    let (mut capture, endpoints, handle) = setup();
    step_until(&mut capture, 10, |s| matches!(s, CaptureState::Downloading { .. }));
    let CaptureState::Downloading { len } = capture.state() else {
        unreachable!()
    };

    endpoints.config.request_resolution(Resolution::Qvga);

    // The in-flight download completes at the old size.
    assert_eq!(capture.step(), CaptureState::Flushing);
    assert_eq!(handle.resolution(), Resolution::Vga);
    let frame = endpoints.frames.try_take_latest_frame().unwrap();
    assert_eq!(frame.len(), len as usize);
    assert!(frame.len() >= 6000);

    // Applied at the flush boundary.
    let resets = handle.reset_count();
    assert_eq!(capture.step(), CaptureState::Capturing);
    assert_eq!(handle.resolution(), Resolution::Qvga);
    assert_eq!(handle.reset_count(), resets + 1);

    step_until(&mut capture, 5, |s| s == CaptureState::Flushing);
    let frame = endpoints.frames.try_take_latest_frame().unwrap();
    assert_eq!(frame.resolution(), Some(Resolution::Qvga));
    assert!(frame.len() < 3000);
}

#[test]
fn test_intents_from_many_threads_all_apply() {
    let (mut capture, endpoints, handle) = setup();
    step_until(&mut capture, 10, |s| s == CaptureState::Capturing);

    let senders: Vec<_> = (0..3u8)
        .map(|t| {
            let sink = endpoints.config.clone();
            thread::spawn(move || {
                for i in 0..3u8 {
                    sink.request_compression(0x30 + t * 3 + i);
                }
            })
        })
        .collect();
    for s in senders {
        s.join().unwrap();
    }

    step_until(&mut capture, 5, |s| s == CaptureState::Capturing);
    let applied = handle
        .command_log()
        .into_iter()
        .filter(|op| matches!(op, Operation::SetCompression(_)))
        .count();
    assert_eq!(applied, 9);
    assert_eq!(capture.driver().compression(), Some(handle.compression()));
}
