//! Streaming service: wires a camera to the capture loop and consumers.
//!
//! The capture loop runs on its own OS thread. Everything else here is a
//! Tokio task that only touches the loop through its mailboxes:
//!
//! 1. A frame poller takes the latest frame every poll interval.
//! 2. A console reads `resolution WxH` / `compression N` lines from stdin
//!    and queues them as config intents.
//! 3. An event printer writes loop events to stdout as JSON lines
//!    (only with `--events-json`).

use std::io::BufRead;
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{info, warn};

use vcam_core::{
    CaptureEventReceiver, CaptureLoop, ConfigIntent, ConfigSink, FrameSink, SimulatedCamera,
    StopHandle, Transport, Vc0706, port,
};

use crate::config::StreamConfig;
use crate::select::ConfiguredPort;

// ── StreamService ────────────────────────────────────────────────

/// The top-level streaming service.
pub struct StreamService {
    config: StreamConfig,
    port: ConfiguredPort,
    simulate: bool,
    events_json: bool,
    console: bool,
    stop: StopHandle,
}

impl StreamService {
    pub fn new(config: StreamConfig, port: ConfiguredPort) -> Self {
        Self {
            config,
            port,
            simulate: false,
            events_json: false,
            console: true,
            stop: StopHandle::new(),
        }
    }

    /// Drive the in-process simulated camera instead of a serial port.
    pub fn simulate(mut self, enabled: bool) -> Self {
        self.simulate = enabled;
        self
    }

    /// Print loop events to stdout as JSON lines.
    pub fn events_json(mut self, enabled: bool) -> Self {
        self.events_json = enabled;
        self
    }

    /// Read config intents from stdin.
    pub fn console(mut self, enabled: bool) -> Self {
        self.console = enabled;
        self
    }

    /// A cloneable handle that stops the service from another task.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Open the configured camera and stream until stopped.
    ///
    /// Returns the number of frames the poller consumed.
    pub async fn run(&self) -> Result<u64, Box<dyn std::error::Error>> {
        let driver_config = self.config.to_driver_config();
        if self.simulate {
            let baud = port::validate_baud(self.port.baud())?;
            let camera = SimulatedCamera::new()
                .with_settle(driver_config.settle)
                .with_baud(baud);
            info!("streaming from simulated camera at {baud} baud");
            return self.run_with(camera).await;
        }

        let mut selector = self.port.clone();
        let transport = port::open_selected(&mut selector, driver_config.read_timeout)?;
        self.run_with(transport).await
    }

    /// Stream from an already-open transport until stopped.
    pub async fn run_with<T>(&self, transport: T) -> Result<u64, Box<dyn std::error::Error>>
    where
        T: Transport + 'static,
    {
        let driver = Vc0706::new(transport, self.config.to_driver_config());
        let (capture, endpoints) = CaptureLoop::with_stop(
            driver,
            self.config.to_capture_config(),
            self.stop.clone(),
        );

        for intent in self.config.initial_intents() {
            info!("queued startup setting: {intent}");
            endpoints.config.request(intent);
        }

        let capture = capture.spawn()?;

        let events = if self.events_json {
            Some(tokio::spawn(print_events(endpoints.events)))
        } else {
            drop(endpoints.events);
            None
        };

        let console = self.console.then(|| {
            let sink = endpoints.config.clone();
            tokio::spawn(async move {
                run_console(stdin_lines(), sink).await;
            })
        });

        let frames = consume_frames(
            endpoints.frames,
            self.config.poll_interval(),
            self.stop.clone(),
        )
        .await;

        if let Some(console) = console {
            console.abort();
        }
        tokio::task::spawn_blocking(move || capture.stop_and_join()).await?;
        if let Some(events) = events {
            let _ = events.await;
        }

        info!("stream stopped after {frames} frames");
        Ok(frames)
    }
}

// ── Tasks ────────────────────────────────────────────────────────

/// Poll for new frames until `stop` fires. Returns the number taken.
pub async fn consume_frames(frames: FrameSink, poll: Duration, stop: StopHandle) -> u64 {
    let mut taken = 0;
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    while !stop.is_stopped() {
        ticker.tick().await;
        let Some(frame) = frames.try_take_latest_frame() else {
            continue;
        };
        taken += 1;
        let resolution = frame
            .resolution()
            .map_or_else(|| "device default".to_string(), |r| r.to_string());
        info!(
            bytes = frame.len(),
            %resolution,
            jpeg = frame.is_jpeg(),
            "frame {taken}"
        );
        if !frame.is_jpeg() {
            warn!("frame {taken} lacks JPEG start/end markers");
        }
    }
    taken
}

/// Parse one console line. Blank lines yield `Ok(None)`.
pub fn parse_console_line(line: &str) -> Result<Option<ConfigIntent>, vcam_core::CameraError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    line.parse().map(Some)
}

/// Forward stdin lines from a detached thread.
///
/// A blocked stdin read must not hold up runtime shutdown, so it lives
/// outside the Tokio blocking pool.
fn stdin_lines() -> UnboundedReceiver<String> {
    let (tx, rx) = unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("vcam-console".into())
        .spawn(move || forward_lines(std::io::stdin().lock(), &tx));
    if let Err(e) = spawned {
        warn!("console unavailable: {e}");
    }
    rx
}

/// Send each line of `reader` until EOF, a read error, or a closed receiver.
fn forward_lines<R: BufRead>(reader: R, tx: &UnboundedSender<String>) -> usize {
    let mut sent = 0;
    for line in reader.lines() {
        match line {
            Ok(line) => {
                if tx.send(line).is_err() {
                    break;
                }
                sent += 1;
            }
            Err(e) => {
                warn!("console read failed: {e}");
                break;
            }
        }
    }
    sent
}

/// Queue intents from console lines until the line source closes.
pub async fn run_console(mut lines: UnboundedReceiver<String>, sink: ConfigSink) -> usize {
    let mut queued = 0;
    while let Some(line) = lines.recv().await {
        match parse_console_line(&line) {
            Ok(Some(intent)) => {
                if sink.request(intent) {
                    info!("queued {intent}");
                    queued += 1;
                }
            }
            Ok(None) => {}
            Err(e) => warn!("{e}"),
        }
    }
    queued
}

async fn print_events(mut events: CaptureEventReceiver) {
    while let Some(event) = events.recv().await {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("failed to encode event: {e}"),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
