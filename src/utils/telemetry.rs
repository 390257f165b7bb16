//! telemetry.rs
//! Event recording for the capture and control pipeline.
//! - BridgeEvent: capture, eviction, clip, and episode lifecycle events with nanosecond timestamps.
//! - EventRecorder: lock-free queue (16K capacity) with background CSV export.
//!
//! Producers never block: `record()` drops silently when the queue is full.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_queue::ArrayQueue;
use log::{error, warn};
use parking_lot::Mutex;

const EVENT_QUEUE_CAPACITY: usize = 16_384;
const EXPORT_BATCH: usize = 256; // events drained per poll
const EXPORT_POLL_MS: u64 = 10; // exporter sleep when queue empty
const FLUSH_BATCHES: usize = 8; // batches between disk flushes

/// Pipeline lifecycle events. Each variant carries a nanosecond timestamp
/// relative to recorder creation plus component-specific data.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// Producer thread stored one transformed frame.
    FrameCaptured {
        camera: String,
        seq: u64,
        ts_ns: u64,
        latency_us: u64,
    },
    /// Producer read failed; retried on the next scheduled iteration.
    CaptureFault {
        camera: String,
        consecutive: u32,
        ts_ns: u64,
    },
    /// Consecutive read failures crossed the configured cap; producer exited.
    CaptureEscalated {
        camera: String,
        failures: u32,
        ts_ns: u64,
    },
    /// Reaper dropped oldest frames over the cleanup threshold.
    FramesEvicted {
        camera: String,
        dropped: usize,
        retained: usize,
        ts_ns: u64,
    },
    /// An action component was clipped to its joint limits before dispatch.
    ClipAdjusted {
        joint: String,
        requested: f64,
        applied: f64,
        ts_ns: u64,
    },
    EpisodeStarted {
        episode: u32,
        ts_ns: u64,
    },
    StepCompleted {
        episode: u32,
        step: u64,
        ts_ns: u64,
        exec_us: u64,
    },
    EpisodeEnded {
        episode: u32,
        steps: u64,
        ts_ns: u64,
    },
}

impl BridgeEvent {
    /// CSV row format: component,event,ts_ns,subject,field1,field2
    pub fn to_csv_row(&self) -> String {
        match self {
            BridgeEvent::FrameCaptured {
                camera,
                seq,
                ts_ns,
                latency_us,
            } => {
                format!("capture,FrameCaptured,{ts_ns},{camera},{seq},{latency_us}")
            }
            BridgeEvent::CaptureFault {
                camera,
                consecutive,
                ts_ns,
            } => {
                format!("capture,CaptureFault,{ts_ns},{camera},{consecutive},")
            }
            BridgeEvent::CaptureEscalated {
                camera,
                failures,
                ts_ns,
            } => {
                format!("capture,CaptureEscalated,{ts_ns},{camera},{failures},")
            }
            BridgeEvent::FramesEvicted {
                camera,
                dropped,
                retained,
                ts_ns,
            } => {
                format!("capture,FramesEvicted,{ts_ns},{camera},{dropped},{retained}")
            }
            BridgeEvent::ClipAdjusted {
                joint,
                requested,
                applied,
                ts_ns,
            } => {
                format!("motion,ClipAdjusted,{ts_ns},{joint},{requested},{applied}")
            }
            BridgeEvent::EpisodeStarted { episode, ts_ns } => {
                format!("runtime,EpisodeStarted,{ts_ns},{episode},,")
            }
            BridgeEvent::StepCompleted {
                episode,
                step,
                ts_ns,
                exec_us,
            } => {
                format!("runtime,StepCompleted,{ts_ns},{episode},{step},{exec_us}")
            }
            BridgeEvent::EpisodeEnded {
                episode,
                steps,
                ts_ns,
            } => {
                format!("runtime,EpisodeEnded,{ts_ns},{episode},{steps},")
            }
        }
    }
}

/// Non-blocking event recorder with background CSV export.
///
/// Timestamps via `now_ns()` (elapsed nanos from recorder creation).
/// `record()` appends to a lock-free queue and returns immediately.
/// `start_exporter()` spawns a thread draining the queue to a CSV file,
/// one event per line; `stop_exporter()` drains the remainder and joins.
pub struct EventRecorder {
    queue: Arc<ArrayQueue<BridgeEvent>>,
    run_start: Instant,
    exporter_running: Arc<AtomicBool>,
    exporter_handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(EVENT_QUEUE_CAPACITY)),
            run_start: Instant::now(),
            exporter_running: Arc::new(AtomicBool::new(false)),
            exporter_handle: Mutex::new(None),
        }
    }

    /// Appends an event (lock-free). Silently drops if the queue is full.
    #[inline]
    pub fn record(&self, event: BridgeEvent) {
        let _ = self.queue.push(event);
    }

    /// Nanosecond timestamp since recorder creation.
    #[inline]
    pub fn now_ns(&self) -> u64 {
        self.run_start.elapsed().as_nanos() as u64
    }

    /// Events recorded but not yet drained by the exporter.
    #[inline]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Spawns the background exporter thread. A second call while one is
    /// running logs a warning and leaves the first exporter in place.
    pub fn start_exporter(&self, output_csv: PathBuf) {
        {
            let handle = self.exporter_handle.lock();
            if handle.is_some() {
                warn!("event exporter already running, ignoring start");
                return;
            }
        }

        self.exporter_running.store(true, Ordering::Release);
        let queue = self.queue.clone();
        let running = self.exporter_running.clone();

        let handle = thread::spawn(move || {
            let file = match File::create(&output_csv) {
                Ok(f) => f,
                Err(e) => {
                    error!("failed to create event CSV {:?}: {}", output_csv, e);
                    return;
                }
            };
            let mut writer = BufWriter::new(file);
            let _ = writeln!(writer, "component,event,ts_ns,subject,field1,field2");
            let mut flush_counter = 0usize;

            while running.load(Ordering::Acquire) {
                let mut any = false;
                for _ in 0..EXPORT_BATCH {
                    match queue.pop() {
                        Some(event) => {
                            any = true;
                            let _ = writeln!(writer, "{}", event.to_csv_row());
                        }
                        None => break,
                    }
                }
                if any {
                    flush_counter += 1;
                    if flush_counter >= FLUSH_BATCHES {
                        let _ = writer.flush();
                        flush_counter = 0;
                    }
                } else {
                    thread::sleep(Duration::from_millis(EXPORT_POLL_MS));
                }
            }

            // Final drain so late events are not lost
            while let Some(event) = queue.pop() {
                let _ = writeln!(writer, "{}", event.to_csv_row());
            }
            let _ = writer.flush();
        });

        *self.exporter_handle.lock() = Some(handle);
    }

    /// Signals the exporter, which drains remaining events and exits.
    pub fn stop_exporter(&self) {
        self.exporter_running.store(false, Ordering::Release);
        let handle = self.exporter_handle.lock().take();
        if let Some(h) = handle {
            let _ = h.join();
        }
    }
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventRecorder {
    fn drop(&mut self) {
        self.stop_exporter();
    }
}
