//! Continuous capture into a ring buffer.
//!
//! The recorder owns one capture thread per session. The thread performs blocking reads from an
//! [`AudioSource`] and appends each chunk to a [`RingBuffer`] under a single mutex; `snapshot`,
//! `snapshot_last` and `reset` take the same mutex, so a snapshot briefly blocks capture and
//! always observes whole writes.
//!
//! Status changes and capture errors are published as [`RecorderEvent`]s on an optional channel
//! and mirrored in [`RingBufferRecorder::status`].

use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::config::{AudioConfig, DEFAULT_HARD_MAX_BUFFER_BYTES, Settings};
use crate::ring_buffer::RingBuffer;
use crate::source::{AudioSource, SourceError};
use crate::{Error, Result};

/// Bytes requested from the source per read.
pub const DEFAULT_READ_CHUNK_BYTES: usize = 4_096;

const INVALID_STATE_BACKOFF: Duration = Duration::from_millis(10);
const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(1);

/// The buffer may take at most `1 / AVAILABLE_MEMORY_DIVISOR` of the memory the OS reports free.
pub const AVAILABLE_MEMORY_DIVISOR: usize = 4;

/// Limits applied when sizing the ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityPolicy {
    pub hard_max_bytes: usize,
    /// Explicit memory budget. When unset, one is derived from available memory at `start`.
    pub memory_budget_bytes: Option<usize>,
    pub read_chunk_bytes: usize,
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        Self {
            hard_max_bytes: DEFAULT_HARD_MAX_BUFFER_BYTES,
            memory_budget_bytes: None,
            read_chunk_bytes: DEFAULT_READ_CHUNK_BYTES,
        }
    }
}

impl CapacityPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            hard_max_bytes: settings.hard_max_buffer_bytes,
            memory_budget_bytes: settings.memory_budget_bytes,
            ..Self::default()
        }
    }

    /// Capacity for `config` after applying the hard maximum and the memory budget.
    ///
    /// The result is rounded down to a whole number of samples.
    pub fn plan(&self, config: &AudioConfig) -> usize {
        self.plan_with_available(config, None)
    }

    /// Like [`plan`](Self::plan), with `available` bytes of free memory reported by the OS.
    ///
    /// An explicit budget wins over the estimate.
    pub fn plan_with_available(&self, config: &AudioConfig, available: Option<usize>) -> usize {
        let mut capacity = config.requested_capacity_bytes().min(self.hard_max_bytes);
        let budget = self
            .memory_budget_bytes
            .or_else(|| available.map(|bytes| bytes / AVAILABLE_MEMORY_DIVISOR));
        if let Some(budget) = budget {
            capacity = capacity.min(budget);
        }
        align_down(capacity, config.bytes_per_sample())
    }
}

/// Memory currently available to new allocations, if the platform reports it.
pub fn available_memory() -> Option<usize> {
    #[cfg(target_os = "linux")]
    {
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        parse_mem_available(&meminfo)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_mem_available(meminfo: &str) -> Option<usize> {
    let line = meminfo.lines().find(|line| line.starts_with("MemAvailable:"))?;
    let kib: usize = line.split_whitespace().nth(1)?.parse().ok()?;
    kib.checked_mul(1024)
}

/// Observable recorder lifecycle and error notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    Started { capacity: usize },
    /// The configured duration did not fit the hard maximum or memory budget.
    CapacityClamped { requested: usize, granted: usize },
    /// The first allocation failed and a smaller buffer was used instead.
    CapacityDegraded { requested: usize, granted: usize },
    AllocationFailed { requested: usize },
    ReadError(String),
    DeviceStopped(String),
    /// The capture loop exited.
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderStatus {
    Idle,
    Recording,
    /// The buffer could not be allocated; nothing is being captured.
    Disabled,
    /// The source stopped underneath us.
    Failed(String),
}

/// Ring-buffer recorder: start, snapshot at any time, stop.
pub struct RingBufferRecorder {
    policy: CapacityPolicy,
    config: Option<AudioConfig>,
    buffer: Arc<Mutex<RingBuffer>>,
    status: Arc<Mutex<RecorderStatus>>,
    stop: CancelToken,
    worker: Option<JoinHandle<Option<Error>>>,
    events: Option<Sender<RecorderEvent>>,
    memory_estimator: fn() -> Option<usize>,
}

impl Default for RingBufferRecorder {
    fn default() -> Self {
        Self::new(CapacityPolicy::default())
    }
}

impl RingBufferRecorder {
    pub fn new(policy: CapacityPolicy) -> Self {
        Self {
            policy,
            config: None,
            buffer: Arc::new(Mutex::new(RingBuffer::with_capacity(0))),
            status: Arc::new(Mutex::new(RecorderStatus::Idle)),
            stop: CancelToken::new(),
            worker: None,
            events: None,
            memory_estimator: available_memory,
        }
    }

    /// Publish lifecycle and error events on `tx`.
    pub fn with_event_sink(mut self, tx: Sender<RecorderEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Replace the free-memory estimate used when the policy has no explicit budget.
    pub fn with_memory_estimator(mut self, estimator: fn() -> Option<usize>) -> Self {
        self.memory_estimator = estimator;
        self
    }

    /// Open `source`, allocate the buffer and start the capture thread.
    pub fn start<S>(&mut self, config: AudioConfig, mut source: S) -> Result<()>
    where
        S: AudioSource + 'static,
    {
        if self.worker.is_some() {
            return Err(Error::msg("recorder is already running"));
        }
        config.validate()?;

        source.open().map_err(|err| match err {
            Error::PermissionDenied(_) => err,
            other => Error::PermissionDenied(other.to_string()),
        })?;

        let requested = config.requested_capacity_bytes();
        let available = match self.policy.memory_budget_bytes {
            Some(_) => None,
            None => (self.memory_estimator)(),
        };
        let planned = self.policy.plan_with_available(&config, available);
        if planned < requested {
            warn!(
                requested,
                granted = planned,
                available_memory = ?available,
                "capture buffer clamped"
            );
            self.emit(RecorderEvent::CapacityClamped {
                requested,
                granted: planned,
            });
        }

        let storage = match allocate_storage(planned, config.bytes_per_sample(), try_alloc) {
            Allocation::Full(storage) => storage,
            Allocation::Degraded(storage) => {
                warn!(
                    requested = planned,
                    granted = storage.len(),
                    "capture buffer allocation degraded"
                );
                self.emit(RecorderEvent::CapacityDegraded {
                    requested: planned,
                    granted: storage.len(),
                });
                storage
            }
            Allocation::Failed => {
                error!(requested = planned, "capture buffer allocation failed");
                source.release();
                self.buffer = Arc::new(Mutex::new(RingBuffer::with_capacity(0)));
                self.config = Some(config);
                set_status(&self.status, RecorderStatus::Disabled);
                self.emit(RecorderEvent::AllocationFailed { requested: planned });
                return Err(Error::AllocationFailure { requested: planned });
            }
        };

        let capacity = storage.len();
        self.buffer = Arc::new(Mutex::new(RingBuffer::from_storage(storage)));
        self.config = Some(config);
        self.stop = CancelToken::new();
        set_status(&self.status, RecorderStatus::Recording);

        let ctx = CaptureContext {
            buffer: Arc::clone(&self.buffer),
            status: Arc::clone(&self.status),
            stop: self.stop.clone(),
            chunk_bytes: self.policy.read_chunk_bytes.max(1),
            events: self.events.clone(),
        };

        info!(
            capacity,
            sample_rate = config.sample_rate_hz,
            bits = config.bits_per_sample(),
            "capture started"
        );
        self.emit(RecorderEvent::Started { capacity });

        let spawned = thread::Builder::new()
            .name("rewind-capture".into())
            .spawn(move || ctx.run(source));
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                set_status(&self.status, RecorderStatus::Idle);
                self.emit(RecorderEvent::Stopped);
                Err(err.into())
            }
        }
    }

    /// Signal the capture loop, join it and free the buffer.
    ///
    /// Returns the loop's terminal error (e.g. the device stopped) if it had one.
    pub fn stop(&mut self) -> Result<()> {
        self.stop.cancel();
        let outcome = match self.worker.take() {
            Some(handle) => match handle.join() {
                Ok(None) => Ok(()),
                Ok(Some(err)) => Err(err),
                Err(_) => Err(Error::msg("capture thread panicked")),
            },
            None => Ok(()),
        };

        *lock(&self.buffer) = RingBuffer::with_capacity(0);
        {
            let mut status = lock(&self.status);
            if !matches!(*status, RecorderStatus::Failed(_)) {
                *status = RecorderStatus::Idle;
            }
        }
        info!("capture stopped");
        outcome
    }

    /// Everything currently buffered, oldest first.
    pub fn snapshot(&self) -> Vec<u8> {
        lock(&self.buffer).snapshot()
    }

    /// The newest `duration` of buffered audio, oldest first.
    pub fn snapshot_last(&self, duration: Duration) -> Vec<u8> {
        let Some(config) = self.config else {
            return Vec::new();
        };
        let max_bytes = config.bytes_for_ms(duration.as_millis() as u64);
        lock(&self.buffer).snapshot_last(max_bytes)
    }

    /// Drop everything buffered so far without stopping capture.
    pub fn reset(&self) {
        lock(&self.buffer).reset();
        debug!("capture buffer reset");
    }

    pub fn status(&self) -> RecorderStatus {
        lock(&self.status).clone()
    }

    pub fn is_recording(&self) -> bool {
        self.status() == RecorderStatus::Recording
    }

    pub fn capacity(&self) -> usize {
        lock(&self.buffer).capacity()
    }

    pub fn buffered_bytes(&self) -> usize {
        lock(&self.buffer).len()
    }

    /// Audio config of the current (or last) session.
    pub fn config(&self) -> Option<AudioConfig> {
        self.config
    }

    fn emit(&self, event: RecorderEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

impl Drop for RingBufferRecorder {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.stop();
        }
    }
}

/// Everything the capture thread needs, moved into it at spawn.
struct CaptureContext {
    buffer: Arc<Mutex<RingBuffer>>,
    status: Arc<Mutex<RecorderStatus>>,
    stop: CancelToken,
    chunk_bytes: usize,
    events: Option<Sender<RecorderEvent>>,
}

impl CaptureContext {
    fn run<S: AudioSource>(self, mut source: S) -> Option<Error> {
        let mut chunk = vec![0u8; self.chunk_bytes];
        let mut terminal = None;

        while !self.stop.is_cancelled() {
            match source.read(&mut chunk) {
                Ok(0) => thread::sleep(EMPTY_READ_BACKOFF),
                Ok(n) => lock(&self.buffer).write(&chunk[..n]),
                Err(SourceError::Transient(msg)) => {
                    warn!(error = %msg, "transient audio read error");
                    self.emit(RecorderEvent::ReadError(msg));
                }
                Err(SourceError::InvalidState(msg)) => {
                    warn!(error = %msg, "audio source in invalid state");
                    self.emit(RecorderEvent::ReadError(msg));
                    thread::sleep(INVALID_STATE_BACKOFF);
                }
                Err(SourceError::Stopped(msg)) => {
                    error!(error = %msg, "audio source stopped");
                    set_status(&self.status, RecorderStatus::Failed(msg.clone()));
                    self.emit(RecorderEvent::DeviceStopped(msg.clone()));
                    terminal = Some(Error::DeviceStopped(msg));
                    break;
                }
                Err(SourceError::Exhausted) => {
                    debug!("audio source exhausted");
                    set_status(&self.status, RecorderStatus::Idle);
                    break;
                }
            }
        }

        source.release();
        self.emit(RecorderEvent::Stopped);
        terminal
    }

    fn emit(&self, event: RecorderEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

enum Allocation {
    Full(Vec<u8>),
    Degraded(Vec<u8>),
    Failed,
}

/// Allocate `capacity` bytes, halving once on failure. A zero-byte buffer counts as a failure.
fn allocate_storage(
    capacity: usize,
    bytes_per_sample: usize,
    mut alloc: impl FnMut(usize) -> Option<Vec<u8>>,
) -> Allocation {
    if capacity == 0 {
        return Allocation::Failed;
    }
    if let Some(storage) = alloc(capacity) {
        return Allocation::Full(storage);
    }
    let halved = align_down(capacity / 2, bytes_per_sample);
    if halved == 0 {
        return Allocation::Failed;
    }
    match alloc(halved) {
        Some(storage) => Allocation::Degraded(storage),
        None => Allocation::Failed,
    }
}

fn try_alloc(capacity: usize) -> Option<Vec<u8>> {
    let mut storage = Vec::new();
    storage.try_reserve_exact(capacity).ok()?;
    storage.resize(capacity, 0);
    Some(storage)
}

fn align_down(bytes: usize, width: usize) -> usize {
    bytes - bytes % width.max(1)
}

// A panic while holding either lock cannot leave the guarded data half-written (ring buffer
// writes are plain copies), so poisoning is ignored.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn set_status(status: &Mutex<RecorderStatus>, next: RecorderStatus) {
    *lock(status) = next;
}
