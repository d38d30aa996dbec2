//! Threaded bin: drains a bin's readers on a dedicated thread.
//!
//! While running, every pusher in the bin routes its wakeups to one shared
//! [`Notifier`]. The drain thread waits on it and, for each notification,
//! drains every pusher until nothing is left. Wakeups that arrive mid-drain
//! collapse into a single pending notification, so the thread makes at
//! most one extra pass no matter how many writes happened.

use crate::pipeline::bin::Bin;
use crate::pipeline::reader::Pusher;
use crate::pipeline::wake::{Notifier, Wake};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How long the drain thread sleeps between stop-flag checks when idle.
const IDLE_TIMEOUT: Duration = Duration::from_millis(100);

struct DrainWorker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct ThreadedBin {
    bin: Bin,
    notifier: Arc<Notifier>,
    passes: Arc<AtomicU64>,
    worker: Option<DrainWorker>,
}

impl ThreadedBin {
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_bin(Bin::new(name))
    }

    pub fn from_bin(bin: Bin) -> Self {
        Self {
            bin,
            notifier: Arc::new(Notifier::new()),
            passes: Arc::new(AtomicU64::new(0)),
            worker: None,
        }
    }

    pub fn bin(&self) -> &Bin {
        &self.bin
    }

    /// Mutable access for wiring. Pushers added while running keep
    /// draining inline until the next restart.
    pub fn bin_mut(&mut self) -> &mut Bin {
        &mut self.bin
    }

    /// Number of drain passes the thread has run.
    pub fn drain_passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Start the drain thread. Returns `false` if already running or the
    /// thread could not be spawned.
    pub fn start(&mut self) -> bool {
        if self.worker.is_some() || !self.bin.start() {
            return false;
        }

        let pushers = self.bin.pushers();
        let target: Arc<dyn Wake> = self.notifier.clone();
        for pusher in &pushers {
            pusher.set_wake_target(Some(Arc::clone(&target)));
        }

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let notifier = Arc::clone(&self.notifier);
        let passes = Arc::clone(&self.passes);
        let name = self.bin.name().to_string();

        let spawned = std::thread::Builder::new()
            .name(format!("bin-{}", name))
            .spawn(move || drain_loop(&name, &pushers, &notifier, &thread_running, &passes));

        match spawned {
            Ok(handle) => {
                self.worker = Some(DrainWorker { running, handle });
                // Catch anything written between wake redirection and spawn.
                self.notifier.notify();
                true
            }
            Err(e) => {
                tracing::error!("Bin '{}': failed to spawn drain thread: {}", self.bin.name(), e);
                self.restore_inline_wakeups();
                self.bin.stop();
                false
            }
        }
    }

    /// Stop and join the drain thread. Returns `false` if not running.
    pub fn stop(&mut self) -> bool {
        let Some(worker) = self.worker.take() else {
            return false;
        };
        worker.running.store(false, Ordering::SeqCst);
        self.notifier.notify();
        if worker.handle.join().is_err() {
            tracing::error!("Bin '{}': drain thread panicked", self.bin.name());
        }
        // Writes racing the thread's exit land here once wakeups are inline.
        self.restore_inline_wakeups();
        self.notifier.take();
        let moved: usize = self.bin.pushers().iter().map(|p| p.push_new_data()).sum();
        if moved > 0 {
            tracing::debug!("Bin '{}': drained {} items on stop", self.bin.name(), moved);
        }
        self.bin.stop();
        true
    }

    fn restore_inline_wakeups(&self) {
        for pusher in self.bin.pushers() {
            pusher.set_wake_target(None);
        }
    }
}

fn drain_loop(
    name: &str,
    pushers: &[Arc<dyn Pusher>],
    notifier: &Notifier,
    running: &AtomicBool,
    passes: &AtomicU64,
) {
    tracing::info!("Bin '{}' drain thread started", name);
    while running.load(Ordering::SeqCst) {
        if !notifier.wait_timeout(IDLE_TIMEOUT) {
            continue;
        }
        let mut moved = 0;
        for pusher in pushers {
            moved += pusher.push_new_data();
        }
        passes.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("Bin '{}' drain pass moved {} items", name, moved);
    }
    tracing::info!("Bin '{}' drain thread exiting", name);
}

impl Drop for ThreadedBin {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::packet::TimedUnsigned;
    use crate::pipeline::port::SinkHandle;
    use crate::pipeline::reader::BufferReader;
    use crate::pipeline::ring_buffer::RingBuffer;
    use crossbeam_channel::unbounded;
    use std::time::Instant;

    fn sample(v: u32) -> TimedUnsigned {
        TimedUnsigned {
            timestamp_us: 0,
            value: v,
        }
    }

    #[test]
    fn test_drains_on_own_thread() {
        let input = RingBuffer::<TimedUnsigned>::new(64);
        let reader = BufferReader::<TimedUnsigned>::new(8);
        reader.join_buffer(&input);

        let (tx, rx) = unbounded();
        let sink = SinkHandle::new("sink", move |values: &[TimedUnsigned]| {
            let thread = std::thread::current().name().map(str::to_string);
            for v in values {
                let _ = tx.send((v.value, thread.clone()));
            }
        });
        reader.source().join(&sink);

        let mut threaded = ThreadedBin::new("t");
        threaded
            .bin_mut()
            .add(reader.clone() as Arc<dyn Pusher>, "reader")
            .unwrap();
        assert!(threaded.start());
        assert!(!threaded.start());

        input.write(&(0..20).map(sample).collect::<Vec<_>>());

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut got = Vec::new();
        while got.len() < 20 && Instant::now() < deadline {
            if let Ok(item) = rx.recv_timeout(Duration::from_millis(50)) {
                got.push(item);
            }
        }
        assert_eq!(got.iter().map(|(v, _)| *v).collect::<Vec<_>>(), (0..20).collect::<Vec<_>>());
        assert!(got.iter().all(|(_, t)| t.as_deref() == Some("bin-t")));

        assert!(threaded.stop());
        assert!(!threaded.stop());
        assert!(!threaded.bin().is_running());
    }

    #[test]
    fn test_stop_restores_inline_drain() {
        let input = RingBuffer::<TimedUnsigned>::new(8);
        let reader = BufferReader::<TimedUnsigned>::new(8);
        reader.join_buffer(&input);
        let seen = Arc::new(AtomicU64::new(0));
        let s = Arc::clone(&seen);
        let sink = SinkHandle::new("sink", move |v: &[TimedUnsigned]| {
            s.fetch_add(v.len() as u64, Ordering::SeqCst);
        });
        reader.source().join(&sink);

        let mut threaded = ThreadedBin::new("inline");
        threaded
            .bin_mut()
            .add(reader.clone() as Arc<dyn Pusher>, "reader")
            .unwrap();
        threaded.start();
        threaded.stop();

        input.write(&[sample(1)]);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_writes_racing_stop_are_delivered() {
        for round in 0..50 {
            let input = RingBuffer::<TimedUnsigned>::new(1024);
            let reader = BufferReader::<TimedUnsigned>::new(16);
            reader.join_buffer(&input);
            let seen = Arc::new(AtomicU64::new(0));
            let s = Arc::clone(&seen);
            let sink = SinkHandle::new("sink", move |v: &[TimedUnsigned]| {
                s.fetch_add(v.len() as u64, Ordering::SeqCst);
            });
            reader.source().join(&sink);

            let mut threaded = ThreadedBin::new("race");
            threaded
                .bin_mut()
                .add(reader.clone() as Arc<dyn Pusher>, "reader")
                .unwrap();
            threaded.start();

            let writer_input = Arc::clone(&input);
            let writer = std::thread::spawn(move || {
                for v in 0..200 {
                    writer_input.write(&[sample(v)]);
                }
            });
            std::thread::sleep(Duration::from_micros(50 * (round % 5)));
            threaded.stop();
            writer.join().unwrap();

            // No write follows the writer's last one, so nothing may be pending.
            assert_eq!(seen.load(Ordering::SeqCst), 200, "round {}", round);
        }
    }
}
