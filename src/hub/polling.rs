//! Polling adaptor
//!
//! [`PollingAdaptor`] drives a [`SampleSource`] from a dedicated thread and
//! writes every sample it yields into the adaptor's output ring buffer.
//!
//! # Timing
//!
//! The loop waits on its command channel between reads, so a stop request
//! or an interval change is picked up immediately instead of after the
//! current period. An interval of 0 means the source pushes data itself:
//! `read_sample` is expected to block (or return `None`) and the loop only
//! idles briefly between calls.
//!
//! # Errors
//!
//! A failed read is logged and counted; the sample is dropped and polling
//! continues. Nothing from the hardware ever reaches the pipeline except
//! well-formed records.

use crate::error::{HubError, Result};
use crate::hub::adaptor::{AdaptorCore, DeviceAdaptor};
use crate::hub::arbitration::{DataRangeArbiter, IntervalArbiter};
use crate::pipeline::packet::Payload;
use crate::pipeline::ring_buffer::{AnyBuffer, RingBuffer};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Idle wait between reads in push mode (interval 0).
const PUSH_IDLE: Duration = Duration::from_millis(5);

/// Microseconds since the first call in this process.
pub fn monotonic_us() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_micros() as u64
}

/// Hardware collaborator read by a [`PollingAdaptor`].
///
/// All methods run on the polling thread, except `open` and `close` which
/// run on the thread starting or stopping the adaptor.
pub trait SampleSource: Send + 'static {
    type Sample: Payload;

    /// Acquire the device. Called before the polling thread starts.
    fn open(&mut self) -> Result<()>;

    /// Release the device. Called after the polling thread has exited.
    fn close(&mut self);

    /// Read one sample. `Ok(None)` means nothing was ready.
    fn read_sample(&mut self) -> Result<Option<Self::Sample>>;
}

/// Read statistics for one polling adaptor.
#[derive(Debug, Clone, Default)]
pub struct PollStats {
    /// Samples written to the output buffer
    pub samples: u64,
    /// Reads that returned no sample
    pub empty_reads: u64,
    /// Reads that failed and were dropped
    pub failed_reads: u64,
    /// Last read time in microseconds
    pub last_read_time_us: u64,
    /// Maximum read time observed (microseconds)
    pub max_read_time_us: u64,
}

impl PollStats {
    fn record_read(&mut self, elapsed: Duration) {
        let us = elapsed.as_micros() as u64;
        self.last_read_time_us = us;
        self.max_read_time_us = self.max_read_time_us.max(us);
    }

    /// Fraction of reads that failed, 0.0 when nothing was read yet.
    pub fn failure_rate(&self) -> f64 {
        let total = self.samples + self.empty_reads + self.failed_reads;
        if total == 0 {
            0.0
        } else {
            self.failed_reads as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PollCommand {
    Reschedule,
    Stop,
}

struct PollWorker {
    commands: Sender<PollCommand>,
    handle: JoinHandle<()>,
}

/// Adaptor that polls one [`SampleSource`] into one named output buffer.
pub struct PollingAdaptor<S: SampleSource> {
    core: AdaptorCore,
    output: String,
    buffer: Arc<RingBuffer<S::Sample>>,
    source: Arc<Mutex<S>>,
    interval_ms: Arc<AtomicU32>,
    stats: Arc<Mutex<PollStats>>,
    worker: Mutex<Option<PollWorker>>,
}

impl<S: SampleSource> PollingAdaptor<S> {
    /// Build an adaptor publishing `source`'s samples under `output`.
    pub fn new(
        id: &str,
        output: &str,
        description: &str,
        source: S,
        capacity: usize,
        interval: IntervalArbiter,
        data_ranges: DataRangeArbiter,
    ) -> Self {
        let initial = interval.evaluate().interval_ms;
        let core = AdaptorCore::new(id, interval, data_ranges);
        let buffer = RingBuffer::new(capacity);
        core.add_adapted_sensor(output, description, AnyBuffer::new(Arc::clone(&buffer)));
        Self {
            core,
            output: output.to_string(),
            buffer,
            source: Arc::new(Mutex::new(source)),
            interval_ms: Arc::new(AtomicU32::new(initial)),
            stats: Arc::new(Mutex::new(PollStats::default())),
            worker: Mutex::new(None),
        }
    }

    pub fn output_name(&self) -> &str {
        &self.output
    }

    pub fn output_buffer(&self) -> &Arc<RingBuffer<S::Sample>> {
        &self.buffer
    }

    pub fn poll_interval_ms(&self) -> u32 {
        self.interval_ms.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> PollStats {
        self.stats.lock().clone()
    }

    pub fn is_polling(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Run `f` against the hardware source.
    pub fn with_source<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.source.lock())
    }
}

fn poll_loop<T: Payload, S: SampleSource<Sample = T>>(
    id: String,
    commands: Receiver<PollCommand>,
    source: Arc<Mutex<S>>,
    buffer: Arc<RingBuffer<T>>,
    interval_ms: Arc<AtomicU32>,
    stats: Arc<Mutex<PollStats>>,
) {
    tracing::debug!("Polling thread for '{}' started", id);
    // The next read is due one period after the last one, whatever the
    // period currently is; a reschedule never pushes it further out.
    let mut last_read = Instant::now();
    loop {
        let period = match interval_ms.load(Ordering::Relaxed) {
            0 => PUSH_IDLE,
            ms => Duration::from_millis(u64::from(ms)),
        };
        let wait = (last_read + period).saturating_duration_since(Instant::now());
        match commands.recv_timeout(wait) {
            Ok(PollCommand::Reschedule) => continue,
            Ok(PollCommand::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let started = Instant::now();
        last_read = started;
        let result = source.lock().read_sample();
        let mut stats = stats.lock();
        stats.record_read(started.elapsed());
        match result {
            Ok(Some(sample)) => {
                stats.samples += 1;
                drop(stats);
                tracing::trace!("'{}' sample at {} us", id, sample.timestamp_us());
                buffer.write(std::slice::from_ref(&sample));
            }
            Ok(None) => stats.empty_reads += 1,
            Err(e) => {
                stats.failed_reads += 1;
                tracing::warn!("Read from '{}' failed, sample dropped: {}", id, e);
            }
        }
    }
    tracing::debug!("Polling thread for '{}' exited", id);
}

impl<S: SampleSource> DeviceAdaptor for PollingAdaptor<S> {
    fn core(&self) -> &AdaptorCore {
        &self.core
    }

    fn start_hardware(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        self.source.lock().open()?;

        let (tx, rx) = bounded(4);
        let id = self.core.id().to_string();
        let source = Arc::clone(&self.source);
        let buffer = Arc::clone(&self.buffer);
        let interval_ms = Arc::clone(&self.interval_ms);
        let stats = Arc::clone(&self.stats);
        let handle = std::thread::Builder::new()
            .name(format!("poll-{}", id))
            .spawn(move || poll_loop(id, rx, source, buffer, interval_ms, stats))
            .map_err(|e| {
                self.source.lock().close();
                HubError::Io(e).with_context(format!("Failed to spawn poller for '{}'", self.id()))
            })?;

        *worker = Some(PollWorker {
            commands: tx,
            handle,
        });
        tracing::info!(
            "Polling '{}' every {} ms",
            self.id(),
            self.interval_ms.load(Ordering::Relaxed)
        );
        Ok(())
    }

    fn stop_hardware(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        let _ = worker.commands.send(PollCommand::Stop);
        if worker.handle.join().is_err() {
            tracing::error!("Polling thread for '{}' panicked", self.id());
        }
        self.source.lock().close();
        tracing::info!("Stopped polling '{}'", self.id());
    }

    fn apply_interval(&self, interval_ms: u32) {
        self.interval_ms.store(interval_ms, Ordering::Relaxed);
        if let Some(worker) = self.worker.lock().as_ref() {
            let _ = worker.commands.try_send(PollCommand::Reschedule);
        }
    }
}

impl<S: SampleSource> Drop for PollingAdaptor<S> {
    fn drop(&mut self) {
        self.stop_hardware();
    }
}
