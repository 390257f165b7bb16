//! frame_buffer.rs
//! Concurrent frame acquisition for one camera.
//! - Producer thread: rate-limited device reads at max priority; transform
//!   runs outside the ring lock so consumers never wait on I/O.
//! - Reaper thread: periodic eviction of frames over the cleanup threshold.
//! - stop(): running flag plus bounded exit handshakes; a thread that misses
//!   the join timeout is detached rather than waited on forever.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError, bounded};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use spin_sleep::{SpinSleeper, SpinStrategy};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::config::{CameraSpec, CaptureConfig, CropRect};
use crate::error::{BridgeError, Result};
use crate::utils::telemetry::{BridgeEvent, EventRecorder};
use crate::vision::capture::CaptureDevice;
use crate::vision::frame::{Frame, transform_raw};
use crate::vision::ring::FrameRing;

// Upper bound on any single sleep inside the worker loops; keeps stop() prompt
const STOP_POLL: Duration = Duration::from_millis(50);
// How long stop() waits for the device lock before skipping the release
const RELEASE_WAIT: Duration = Duration::from_millis(500);

#[derive(Default)]
struct Counters {
    produced: AtomicU64,
    evicted: AtomicU64,
    failures: AtomicU64,
}

/// Snapshot of the producer-side counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_produced: u64,
    pub frames_evicted: u64,
    pub read_failures: u64,
}

/// Owns one capture device and the ring its frames land in.
///
/// The device sits behind its own mutex so a slow read never blocks
/// `get_latest`; the ring lock is held only for list operations.
pub struct FrameBuffer {
    name: String,
    flipped: bool,
    crop: Option<CropRect>,
    config: CaptureConfig,
    device: Arc<Mutex<Box<dyn CaptureDevice>>>,
    ring: Arc<Mutex<FrameRing>>,
    running: Arc<AtomicBool>,
    healthy: Arc<AtomicBool>,
    counters: Arc<Counters>,
    recorder: Arc<EventRecorder>,
    producer: Option<(JoinHandle<()>, Receiver<()>)>,
    reaper: Option<(JoinHandle<()>, Receiver<()>)>,
}

impl FrameBuffer {
    pub fn new(
        spec: &CameraSpec,
        device: Box<dyn CaptureDevice>,
        config: CaptureConfig,
        recorder: Arc<EventRecorder>,
    ) -> Self {
        Self {
            name: spec.name.clone(),
            flipped: spec.flipped,
            crop: spec.crop,
            config,
            device: Arc::new(Mutex::new(device)),
            ring: Arc::new(Mutex::new(FrameRing::new())),
            running: Arc::new(AtomicBool::new(false)),
            healthy: Arc::new(AtomicBool::new(true)),
            counters: Arc::new(Counters::default()),
            recorder,
            producer: None,
            reaper: None,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opens the device, discards warm-up reads, and spawns the producer and
    /// reaper threads. Calling while started logs a warning and returns Ok.
    pub fn start(&mut self) -> Result<()> {
        if self.producer.is_some() || self.reaper.is_some() {
            warn!("[{}] capture already started, ignoring", self.name);
            return Ok(());
        }

        {
            let mut device = self.device.lock();
            device.open()?;
            // Early reads from a cold sensor are over- or under-exposed
            for _ in 0..self.config.warmup_reads {
                let _ = device.read_frame();
            }
        }

        self.running.store(true, Ordering::Release);
        self.healthy.store(true, Ordering::Release);

        let (reaper_tx, reaper_rx) = bounded::<()>(1);
        let reaper = Reaper {
            name: self.name.clone(),
            threshold: self.config.cleanup_threshold,
            interval: self.config.cleanup_interval(),
            ring: self.ring.clone(),
            running: self.running.clone(),
            counters: self.counters.clone(),
            recorder: self.recorder.clone(),
        };
        let reaper_handle = thread::Builder::new()
            .name(format!("reaper-{}", self.name))
            .spawn(move || {
                reaper.run();
                let _ = reaper_tx.send(());
            })
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                BridgeError::Hardware(format!("failed to spawn reaper thread: {e}"))
            })?;
        self.reaper = Some((reaper_handle, reaper_rx));

        let (producer_tx, producer_rx) = bounded::<()>(1);
        let producer = Producer {
            name: self.name.clone(),
            flipped: self.flipped,
            crop: self.crop,
            config: self.config.clone(),
            device: self.device.clone(),
            ring: self.ring.clone(),
            running: self.running.clone(),
            healthy: self.healthy.clone(),
            counters: self.counters.clone(),
            recorder: self.recorder.clone(),
        };
        let spawned = thread::Builder::new()
            .name(format!("capture-{}", self.name))
            .spawn_with_priority(ThreadPriority::Max, move |_| {
                producer.run();
                let _ = producer_tx.send(());
            });
        match spawned {
            Ok(handle) => self.producer = Some((handle, producer_rx)),
            Err(e) => {
                self.running.store(false, Ordering::Release);
                self.join_workers();
                return Err(BridgeError::Hardware(format!(
                    "failed to spawn capture thread: {e}"
                )));
            }
        }

        info!(
            "[{}] capture started at {} Hz ({}x{})",
            self.name, self.config.sample_rate_hz, self.config.image_width, self.config.image_height
        );
        Ok(())
    }

    /// Signals both threads, waits for their exit handshakes up to the join
    /// timeout, then releases the device best-effort. Safe to call at any
    /// point in the lifecycle, repeatedly.
    pub fn stop(&mut self) {
        let was_started = self.producer.is_some() || self.reaper.is_some();
        self.running.store(false, Ordering::Release);
        self.join_workers();

        match self.device.try_lock_for(RELEASE_WAIT) {
            Some(mut device) => device.release(),
            None => warn!("[{}] device busy during shutdown, release skipped", self.name),
        }

        if was_started {
            info!(
                "[{}] capture stopped ({} frames produced, {} read failures)",
                self.name,
                self.counters.produced.load(Ordering::Relaxed),
                self.counters.failures.load(Ordering::Relaxed)
            );
        }
    }

    fn join_workers(&mut self) {
        let timeout = self.config.join_timeout();
        if let Some((handle, done)) = self.producer.take() {
            join_exit("producer", &self.name, handle, done, timeout);
        }
        if let Some((handle, done)) = self.reaper.take() {
            join_exit("reaper", &self.name, handle, done, timeout);
        }
    }

    /// Synchronous single-shot capture bypassing the ring. Opens the device
    /// lazily, so it also works on a buffer that was never started.
    pub fn capture_one(&self) -> Result<Frame> {
        let raw = {
            let mut device = self.device.lock();
            device.open()?;
            device.read_frame()?
        };
        transform_raw(
            &raw,
            self.flipped,
            self.crop.as_ref(),
            self.config.image_width,
            self.config.image_height,
        )
    }

    /// The most recent `n` frames in chronological order, or empty when fewer
    /// than `n` are buffered. Never blocks on the producer.
    pub fn get_latest(&self, n: usize) -> Vec<Frame> {
        self.ring.lock().latest(n)
    }

    #[inline]
    pub fn buffered(&self) -> usize {
        self.ring.lock().len()
    }

    /// False once the producer has given up after repeated read failures.
    #[inline]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_produced: self.counters.produced.load(Ordering::Relaxed),
            frames_evicted: self.counters.evicted.load(Ordering::Relaxed),
            read_failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn join_exit(
    role: &str,
    camera: &str,
    handle: JoinHandle<()>,
    done: Receiver<()>,
    timeout: Duration,
) {
    match done.recv_timeout(timeout) {
        // A dropped sender also means the thread is gone; join is safe
        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
            let _ = handle.join();
        }
        Err(RecvTimeoutError::Timeout) => {
            warn!("[{camera}] {role} thread still busy after {timeout:?}, detaching");
            drop(handle);
        }
    }
}

struct Producer {
    name: String,
    flipped: bool,
    crop: Option<CropRect>,
    config: CaptureConfig,
    device: Arc<Mutex<Box<dyn CaptureDevice>>>,
    ring: Arc<Mutex<FrameRing>>,
    running: Arc<AtomicBool>,
    healthy: Arc<AtomicBool>,
    counters: Arc<Counters>,
    recorder: Arc<EventRecorder>,
}

impl Producer {
    /// Rate-limited capture loop. Device reads happen under the device lock
    /// only; the transformed frame is pushed under the ring lock only.
    fn run(&self) {
        let interval = self.config.frame_interval();
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);

        let mut last_capture: Option<Instant> = None;
        let mut consecutive_failures: u32 = 0;
        let mut seq: u64 = 1;

        while self.running.load(Ordering::Acquire) {
            if let Some(last) = last_capture {
                let since = last.elapsed();
                if since < interval {
                    // Sliced so a stop request is noticed mid-wait
                    sleeper.sleep((interval - since).min(STOP_POLL));
                    continue;
                }
            }

            let read_start = Instant::now();
            let read = {
                let mut device = self.device.lock();
                device.read_frame()
            };
            last_capture = Some(Instant::now());

            match read {
                Ok(raw) => match transform_raw(
                    &raw,
                    self.flipped,
                    self.crop.as_ref(),
                    self.config.image_width,
                    self.config.image_height,
                ) {
                    Ok(frame) => {
                        consecutive_failures = 0;
                        self.ring.lock().push(frame);
                        self.counters.produced.fetch_add(1, Ordering::Relaxed);
                        self.recorder.record(BridgeEvent::FrameCaptured {
                            camera: self.name.clone(),
                            seq,
                            ts_ns: self.recorder.now_ns(),
                            latency_us: read_start.elapsed().as_micros() as u64,
                        });
                        seq += 1;
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        warn!("[{}] frame transform failed: {e}", self.name);
                        self.note_failure(consecutive_failures);
                        if self.escalated(consecutive_failures) {
                            break;
                        }
                    }
                },
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(
                        "[{}] frame read failed ({consecutive_failures} consecutive): {e}",
                        self.name
                    );
                    self.note_failure(consecutive_failures);
                    if self.escalated(consecutive_failures) {
                        break;
                    }
                }
            }
        }

        debug!("[{}] producer stopped", self.name);
    }

    fn note_failure(&self, consecutive: u32) {
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        self.recorder.record(BridgeEvent::CaptureFault {
            camera: self.name.clone(),
            consecutive,
            ts_ns: self.recorder.now_ns(),
        });
    }

    fn escalated(&self, consecutive: u32) -> bool {
        if consecutive < self.config.max_consecutive_failures {
            return false;
        }
        error!(
            "[{}] {consecutive} consecutive capture failures, producer giving up",
            self.name
        );
        self.recorder.record(BridgeEvent::CaptureEscalated {
            camera: self.name.clone(),
            failures: consecutive,
            ts_ns: self.recorder.now_ns(),
        });
        self.healthy.store(false, Ordering::Release);
        true
    }
}

struct Reaper {
    name: String,
    threshold: usize,
    interval: Duration,
    ring: Arc<Mutex<FrameRing>>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    recorder: Arc<EventRecorder>,
}

impl Reaper {
    fn run(&self) {
        while self.running.load(Ordering::Acquire) {
            let deadline = Instant::now() + self.interval;
            while self.running.load(Ordering::Acquire) {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                thread::sleep((deadline - now).min(STOP_POLL));
            }
            if !self.running.load(Ordering::Acquire) {
                break;
            }

            let (dropped, retained) = {
                let mut ring = self.ring.lock();
                let dropped = ring.evict_over(self.threshold);
                (dropped, ring.len())
            };
            if dropped > 0 {
                self.counters.evicted.fetch_add(dropped as u64, Ordering::Relaxed);
                debug!(
                    "[{}] evicted {dropped} stale frames, {retained} retained",
                    self.name
                );
                self.recorder.record(BridgeEvent::FramesEvicted {
                    camera: self.name.clone(),
                    dropped,
                    retained,
                    ts_ns: self.recorder.now_ns(),
                });
            }
        }
        debug!("[{}] reaper stopped", self.name);
    }
}
