/*!
 * Shared harness for the integration tests: a probed stand-in for the shared
 * resource that tallies exclusion violations, plus a runner that plays one
 * "episode" of reader and writer tasks against a gate.
 */

use rwgate::RwGate;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Installs the test logger. Safe to call from every test; only the first
/// call in a binary takes effect.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Polls `cond` until it holds, panicking if `deadline` passes first.
pub fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(
            start.elapsed() < deadline,
            "condition not reached within {:?}",
            deadline
        );
        thread::sleep(Duration::from_millis(2));
    }
}

/// The shared resource the gate is guarding, instrumented instead of real.
///
/// Tasks call the `enter_*`/`exit_*` pairs strictly inside their gate
/// sections, so the counters here are a lower bound on the gate's own
/// occupancy. A writer observing any company, or a reader observing a
/// writer, is a genuine exclusion failure and bumps `violations`.
#[derive(Default)]
pub struct Probe {
    readers_inside: AtomicUsize,
    writers_inside: AtomicUsize,
    peak_readers: AtomicUsize,
    violations: AtomicUsize,
    reads_finished: AtomicUsize,
    writes_finished: AtomicUsize,
}

impl Probe {
    pub fn new() -> Probe {
        Probe::default()
    }

    pub fn enter_read(&self) {
        if self.writers_inside.load(Ordering::SeqCst) > 0 {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        let now = self.readers_inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_readers.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit_read(&self) {
        self.readers_inside.fetch_sub(1, Ordering::SeqCst);
        self.reads_finished.fetch_add(1, Ordering::SeqCst);
    }

    pub fn enter_write(&self) {
        if self.writers_inside.load(Ordering::SeqCst) > 0
            || self.readers_inside.load(Ordering::SeqCst) > 0
        {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        self.writers_inside.fetch_add(1, Ordering::SeqCst);
    }

    pub fn exit_write(&self) {
        self.writers_inside.fetch_sub(1, Ordering::SeqCst);
        self.writes_finished.fetch_add(1, Ordering::SeqCst);
    }

    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    pub fn reads_finished(&self) -> usize {
        self.reads_finished.load(Ordering::SeqCst)
    }

    pub fn writes_finished(&self) -> usize {
        self.writes_finished.load(Ordering::SeqCst)
    }

    pub fn peak_readers(&self) -> usize {
        self.peak_readers.load(Ordering::SeqCst)
    }
}

/// The shape of one episode: a fixed population of tasks, each taking the
/// gate a fixed number of times and pretending to work inside it.
pub struct Episode {
    pub writers: usize,
    pub writer_iterations: usize,
    pub readers: usize,
    pub reader_iterations: usize,
    pub work: Duration,
}

/// Spawns the episode's reader and writer threads against `gate`, reporting
/// every critical section to `probe`, and joins them all before returning.
pub fn run_episode(gate: &Arc<RwGate>, probe: &Arc<Probe>, episode: &Episode) {
    let mut tasks = Vec::new();

    for id in 0..episode.writers {
        let gate = Arc::clone(gate);
        let probe = Arc::clone(probe);
        let iterations = episode.writer_iterations;
        let work = episode.work;
        tasks.push(thread::spawn(move || {
            for round in 0..iterations {
                gate.begin_write();
                probe.enter_write();
                log::debug!("writer {} inside (round {})", id, round);
                thread::sleep(work);
                probe.exit_write();
                gate.end_write().unwrap();
            }
        }));
    }

    for id in 0..episode.readers {
        let gate = Arc::clone(gate);
        let probe = Arc::clone(probe);
        let iterations = episode.reader_iterations;
        let work = episode.work;
        tasks.push(thread::spawn(move || {
            for round in 0..iterations {
                gate.begin_read();
                probe.enter_read();
                log::debug!("reader {} inside (round {})", id, round);
                thread::sleep(work);
                probe.exit_read();
                gate.end_read().unwrap();
            }
        }));
    }

    for task in tasks {
        task.join().unwrap();
    }
}
