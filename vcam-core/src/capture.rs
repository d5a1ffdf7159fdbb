//! The capture loop: the only code that talks to the device.
//!
//! One dedicated thread owns the [`Vc0706`] driver and steps a
//! [`CaptureState`] machine forever:
//!
//! 1. **Initializing**: reset the device. Failures back off and retry
//!    without bound, each one reported.
//! 2. **Capturing**: freeze a still and query its length.
//! 3. **Downloading**: fetch the JPEG and publish it to the frame mailbox.
//! 4. **Flushing**: release the device buffer, then apply every config
//!    intent queued so far, in order.
//! 5. **Recovering**: back off after a failure. Below the retry bound the
//!    loop retries the capture directly; at the bound it re-initializes.
//!
//! The stop signal is observed between steps, never inside an exchange,
//! so the device is never left halfway through a command.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info};

use crate::driver::Vc0706;
use crate::error::CameraError;
use crate::events::{CaptureEventReceiver, EventKind, EventReporter};
use crate::mailbox::{
    ConfigIntent, ConfigMailbox, ConfigSink, FrameMailbox, FrameSink, config_channel,
};
use crate::state::{CaptureState, RetryCounter};
use crate::transport::Transport;

// ── CaptureConfig ────────────────────────────────────────────────

/// Retry policy for [`CaptureLoop`].
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Consecutive cycle failures before a full re-init is forced.
    pub max_retries: u32,
    /// Sleep in Recovering.
    pub backoff: Duration,
    /// Sleep between failed initialization attempts.
    pub init_backoff: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_secs(5),
            init_backoff: Duration::from_secs(5),
        }
    }
}

// ── StopHandle ───────────────────────────────────────────────────

#[derive(Debug, Default)]
struct StopSignal {
    stopped: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

/// Cloneable stop signal. Also wakes a loop sleeping in a backoff.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    inner: Arc<StopSignal>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let _guard = self
            .inner
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.wake.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` or until stopped. Returns `true` if stopped.
    pub fn wait(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return self.is_stopped();
        }
        let guard = self
            .inner
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let _ = self
            .inner
            .wake
            .wait_timeout_while(guard, duration, |_| !self.is_stopped())
            .unwrap_or_else(PoisonError::into_inner);
        self.is_stopped()
    }
}

// ── Endpoints ────────────────────────────────────────────────────

/// Everything a consumer needs to talk to a running loop.
#[derive(Debug)]
pub struct CaptureEndpoints {
    pub frames: FrameSink,
    pub config: ConfigSink,
    pub events: CaptureEventReceiver,
    pub stop: StopHandle,
}

/// A capture loop running on its own thread.
#[derive(Debug)]
pub struct CaptureHandle {
    join: JoinHandle<()>,
    stop: StopHandle,
}

impl CaptureHandle {
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signal stop and wait for the thread to close the transport.
    pub fn stop_and_join(self) {
        self.stop.stop();
        if self.join.join().is_err() {
            tracing::error!("capture thread panicked");
        }
    }
}

// ── CaptureLoop ──────────────────────────────────────────────────

/// Owns the driver and both mailboxes' loop-side ends.
pub struct CaptureLoop<T: Transport> {
    driver: Vc0706<T>,
    config: CaptureConfig,
    state: CaptureState,
    retries: RetryCounter,
    frames: FrameMailbox,
    intents: ConfigMailbox,
    reporter: EventReporter,
    stop: StopHandle,
}

impl<T: Transport> CaptureLoop<T> {
    pub fn new(driver: Vc0706<T>, config: CaptureConfig) -> (Self, CaptureEndpoints) {
        Self::with_stop(driver, config, StopHandle::new())
    }

    /// Like [`new`](Self::new), but obeys an existing stop signal.
    pub fn with_stop(
        driver: Vc0706<T>,
        config: CaptureConfig,
        stop: StopHandle,
    ) -> (Self, CaptureEndpoints) {
        let frames = FrameMailbox::new();
        let (config_sink, intents) = config_channel();
        let (reporter, events) = EventReporter::channel();

        let endpoints = CaptureEndpoints {
            frames: frames.sink(),
            config: config_sink,
            events,
            stop: stop.clone(),
        };
        let capture = Self {
            driver,
            retries: RetryCounter::new(config.max_retries),
            config,
            state: CaptureState::Idle,
            frames,
            intents,
            reporter,
            stop,
        };
        (capture, endpoints)
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries.count()
    }

    pub fn driver(&self) -> &Vc0706<T> {
        &self.driver
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Perform one transition and return the new state.
    ///
    /// A pending stop is honoured here, before any device exchange.
    pub fn step(&mut self) -> CaptureState {
        if self.stop.is_stopped() {
            if !self.state.is_stopped() {
                self.shut_down();
            }
            return self.state;
        }

        let current = self.state;
        let next = match current {
            CaptureState::Idle => {
                self.reporter.info(
                    EventKind::Initializing,
                    current,
                    self.retries.count(),
                    "starting capture loop",
                );
                CaptureState::Initializing
            }
            CaptureState::Initializing => self.initialize(),
            CaptureState::Capturing => match self.driver.capture_and_query_size() {
                Ok(len) => CaptureState::Downloading { len },
                Err(e) => self.fail(current, &e),
            },
            CaptureState::Downloading { len } => match self.driver.fetch(len) {
                Ok(frame) => {
                    debug!("publishing {} byte frame", frame.len());
                    self.frames.publish(frame);
                    self.retries.reset();
                    CaptureState::Flushing
                }
                Err(e) => self.fail(current, &e),
            },
            CaptureState::Flushing => match self.driver.flush() {
                Ok(()) => self.apply_intents(),
                Err(e) => self.fail(current, &e),
            },
            CaptureState::Recovering => self.recover(),
            CaptureState::Stopped => CaptureState::Stopped,
        };
        self.state = next;
        next
    }

    /// Step until stopped.
    pub fn run(&mut self) {
        info!("capture loop running");
        while !self.step().is_stopped() {}
    }

    /// Run on a dedicated named thread.
    pub fn spawn(mut self) -> Result<CaptureHandle, CameraError>
    where
        T: Send + 'static,
    {
        let stop = self.stop.clone();
        let join = thread::Builder::new()
            .name("vcam-capture".into())
            .spawn(move || self.run())?;
        Ok(CaptureHandle { join, stop })
    }

    // ── Transitions ──────────────────────────────────────────────

    fn initialize(&mut self) -> CaptureState {
        match self.driver.initialize() {
            Ok(()) => {
                self.retries.reset();
                self.reporter.info(
                    EventKind::Initialized,
                    CaptureState::Initializing,
                    0,
                    "camera ready",
                );
                CaptureState::Capturing
            }
            Err(e) => {
                let retries = self.retries.increment();
                self.reporter
                    .failure(EventKind::InitFailed, CaptureState::Initializing, retries, &e);
                self.stop.wait(self.config.init_backoff);
                CaptureState::Initializing
            }
        }
    }

    /// Record a cycle failure and enter Recovering.
    fn fail(&mut self, during: CaptureState, err: &CameraError) -> CaptureState {
        let retries = self.retries.increment();
        self.reporter
            .failure(EventKind::CycleFailed, during, retries, err);
        CaptureState::Recovering
    }

    fn recover(&mut self) -> CaptureState {
        self.stop.wait(self.config.backoff);
        if self.retries.exhausted() {
            self.retries.reset();
            self.reporter.info(
                EventKind::ForcedReinit,
                CaptureState::Recovering,
                0,
                format!(
                    "{} consecutive failures; re-initializing",
                    self.retries.max()
                ),
            );
            CaptureState::Initializing
        } else {
            CaptureState::Capturing
        }
    }

    /// Apply the intents queued so far. Runs only after a successful flush.
    fn apply_intents(&mut self) -> CaptureState {
        for intent in self.intents.drain() {
            let result = match intent {
                ConfigIntent::SetResolution(res) => self.driver.set_resolution(res),
                ConfigIntent::SetCompression(rate) => self.driver.set_compression(rate),
            };
            match result {
                Ok(()) => self.reporter.info(
                    EventKind::ConfigApplied,
                    CaptureState::Flushing,
                    self.retries.count(),
                    format!("applied {intent}"),
                ),
                Err(e) => self.reporter.failure(
                    EventKind::ConfigFailed,
                    CaptureState::Flushing,
                    self.retries.count(),
                    &e,
                ),
            }
        }

        // A resolution change whose re-init failed leaves the device unready.
        if self.driver.is_ready() {
            return CaptureState::Capturing;
        }
        self.reporter.info(
            EventKind::Initializing,
            CaptureState::Flushing,
            self.retries.count(),
            "device unready after config change; re-initializing",
        );
        CaptureState::Initializing
    }

    fn shut_down(&mut self) {
        if let Err(e) = self.driver.close() {
            tracing::warn!("failed to close transport: {e}");
        }
        self.state = CaptureState::Stopped;
        self.reporter.info(
            EventKind::Stopped,
            CaptureState::Stopped,
            self.retries.count(),
            "capture loop stopped",
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::driver::DriverConfig;
    use crate::sim::{Fault, SimHandle, SimulatedCamera};
    use crate::types::Resolution;

    fn fast_loop() -> (CaptureLoop<SimulatedCamera>, CaptureEndpoints, SimHandle) {
        let cam = SimulatedCamera::new();
        let handle = cam.handle();
        let driver = Vc0706::new(
            cam,
            DriverConfig {
                read_timeout: Duration::from_millis(20),
                settle: Duration::ZERO,
                packet_len: 1024,
            },
        );
        let (capture, endpoints) = CaptureLoop::new(
            driver,
            CaptureConfig {
                max_retries: 3,
                backoff: Duration::ZERO,
                init_backoff: Duration::ZERO,
            },
        );
        (capture, endpoints, handle)
    }

    #[test]
    fn happy_path_transitions() {
        let (mut capture, endpoints, _) = fast_loop();
        assert_eq!(capture.state(), CaptureState::Idle);
        assert_eq!(capture.step(), CaptureState::Initializing);
        assert_eq!(capture.step(), CaptureState::Capturing);
        assert!(matches!(capture.step(), CaptureState::Downloading { .. }));
        assert!(!endpoints.frames.has_new());
        assert_eq!(capture.step(), CaptureState::Flushing);
        assert!(endpoints.frames.has_new());
        assert_eq!(capture.step(), CaptureState::Capturing);
    }

    #[test]
    fn init_failure_stays_initializing_and_reports() {
        let (mut capture, mut endpoints, handle) = fast_loop();
        handle.inject(Fault::BadStatus {
            operation: "reset",
            nth: 1,
        });
        capture.step();
        assert_eq!(capture.step(), CaptureState::Initializing);
        assert_eq!(capture.retries(), 1);
        assert_eq!(capture.step(), CaptureState::Capturing);
        assert_eq!(capture.retries(), 0);

        let kinds: Vec<_> = std::iter::from_fn(|| endpoints.events.try_recv().ok())
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Initializing,
                EventKind::InitFailed,
                EventKind::Initialized
            ]
        );
    }

    #[test]
    fn init_retries_past_the_bound() {
        let (mut capture, _endpoints, handle) = fast_loop();
        handle.set_unplugged(true);
        capture.step();
        for _ in 0..10 {
            assert_eq!(capture.step(), CaptureState::Initializing);
        }
        assert_eq!(capture.retries(), 3);
        handle.set_unplugged(false);
        assert_eq!(capture.step(), CaptureState::Capturing);
    }

    #[test]
    fn failure_below_bound_retries_capture() {
        let (mut capture, _endpoints, handle) = fast_loop();
        capture.step();
        capture.step();
        handle.inject(Fault::Silent {
            operation: "capture",
            nth: 1,
        });
        assert_eq!(capture.step(), CaptureState::Recovering);
        assert_eq!(capture.retries(), 1);
        assert_eq!(capture.step(), CaptureState::Capturing);
    }

    #[test]
    fn flush_then_apply_intents_in_order() {
        let (mut capture, endpoints, handle) = fast_loop();
        for _ in 0..3 {
            capture.step();
        }
        endpoints.config.request_compression(0x20);
        endpoints.config.request_resolution(Resolution::Qqvga);
        assert_eq!(handle.compression(), 0x36);
        capture.step();
        assert_eq!(handle.resolution(), Resolution::Vga);
        assert_eq!(capture.step(), CaptureState::Capturing);
        assert_eq!(handle.compression(), 0x20);
        assert_eq!(handle.resolution(), Resolution::Qqvga);
        assert_eq!(capture.driver().resolution(), Some(Resolution::Qqvga));
    }

    #[test]
    fn failed_intent_does_not_abort() {
        let (mut capture, mut endpoints, handle) = fast_loop();
        for _ in 0..5 {
            capture.step();
        }
        assert_eq!(capture.state(), CaptureState::Capturing);
        while endpoints.events.try_recv().is_ok() {}
        handle.inject(Fault::BadStatus {
            operation: "set-compression",
            nth: 1,
        });
        endpoints.config.request_compression(0x10);
        endpoints.config.request_compression(0x11);
        // Capturing -> Downloading -> Flushing -> Capturing
        capture.step();
        capture.step();
        assert_eq!(capture.step(), CaptureState::Capturing);
        assert_eq!(handle.compression(), 0x11);

        let events: Vec<_> = std::iter::from_fn(|| endpoints.events.try_recv().ok()).collect();
        assert_eq!(events[0].kind, EventKind::ConfigFailed);
        assert_eq!(events[1].kind, EventKind::ConfigApplied);
    }

    #[test]
    fn failed_resolution_reinit_goes_back_to_initializing() {
        let (mut capture, mut endpoints, handle) = fast_loop();
        for _ in 0..4 {
            capture.step();
        }
        assert_eq!(capture.state(), CaptureState::Flushing);
        while endpoints.events.try_recv().is_ok() {}

        handle.inject(Fault::BadStatus {
            operation: "reset",
            nth: 1,
        });
        endpoints.config.request_resolution(Resolution::Qvga);
        assert_eq!(capture.step(), CaptureState::Initializing);
        assert_eq!(capture.step(), CaptureState::Capturing);

        let kinds: Vec<_> = std::iter::from_fn(|| endpoints.events.try_recv().ok())
            .map(|e| (e.kind, e.state))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (EventKind::ConfigFailed, CaptureState::Flushing),
                (EventKind::Initializing, CaptureState::Flushing),
                (EventKind::Initialized, CaptureState::Initializing),
            ]
        );
    }

    #[test]
    fn stop_closes_transport() {
        let (mut capture, endpoints, handle) = fast_loop();
        capture.step();
        endpoints.stop.stop();
        assert_eq!(capture.step(), CaptureState::Stopped);
        assert!(handle.is_closed());
        assert_eq!(capture.step(), CaptureState::Stopped);
    }

    #[test]
    fn stop_interrupts_backoff() {
        let stop = StopHandle::new();
        let remote = stop.clone();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.stop();
        });
        let start = Instant::now();
        assert!(stop.wait(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(5));
        waker.join().unwrap();
    }

    #[test]
    fn wait_without_stop_times_out() {
        let stop = StopHandle::new();
        assert!(!stop.wait(Duration::from_millis(5)));
        assert!(!stop.wait(Duration::ZERO));
    }
}
