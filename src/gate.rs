//! The readers/writer access gate and its support types.
//!
//! See the documentation of the [`RwGate`] struct for more information.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Determines which side an [`RwGate`] favors when readers and writers
/// contend.
///
/// See [`RwGate`] for the full protocol; the two variants differ only in
/// whether a writer that is *waiting* to enter already holds off new readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Pending and active writers are favored over waiting readers.
    ///
    /// A gate with this priority fences off new readers as soon as any writer
    /// is waiting or active, so a writer only ever waits for the readers that
    /// were already inside when it arrived (plus any writer ahead of it). A
    /// steady stream of writers can starve readers.
    Writers,
    /// Readers are favored over waiting writers.
    ///
    /// A gate with this priority admits new readers whenever no writer is
    /// actively inside, even while writers are queued. A steady stream of
    /// overlapping readers can delay a writer indefinitely.
    Readers,
}

/// The collection of errors that can be returned when releasing access to an
/// [`RwGate`].
///
/// Both variants report the same kind of caller bug: an `end` call with no
/// matching `begin` by any task. The gate refuses the release rather than
/// letting its counters drift.
///
/// # Example
///
/// ```
/// use rwgate::{ReleaseError, RwGate};
///
/// let gate = RwGate::writers_first();
/// assert_eq!(gate.end_read(), Err(ReleaseError::NoActiveReaders));
/// assert_eq!(gate.end_write(), Err(ReleaseError::NoActiveWriter));
/// ```
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseError {
    /// Returned by [`RwGate::end_read`] when no reader is inside the gate.
    #[error("end_read was called while no reader was inside the gate")]
    NoActiveReaders,
    /// Returned by [`RwGate::end_write`] when no writer is inside the gate.
    #[error("end_write was called while no writer was inside the gate")]
    NoActiveWriter,
}

/// Occupancy counters, only ever touched with the gate's mutex held.
struct GateState {
    active_readers: usize,
    active_writers: usize,
    waiting_writers: usize,
}

impl GateState {
    /// Whether a reader has to keep waiting under the given priority.
    fn read_blocked(&self, priority: Priority) -> bool {
        self.active_writers > 0
            || (priority == Priority::Writers && self.waiting_writers > 0)
    }

    /// Whether a writer has to keep waiting. Writers need the gate to
    /// themselves under either priority; the policies differ only on the
    /// reader side.
    fn write_blocked(&self) -> bool {
        self.active_writers > 0 || self.active_readers > 0
    }
}

/// A synchronization primitive that arbitrates access to one shared resource
/// among any number of reader and writer threads, with a configurable
/// priority policy.
///
/// An `RwGate` plays the role of a readers/writer lock that does not own the
/// data it protects: threads bracket their critical sections with
/// [`begin_read`]/[`end_read`] or [`begin_write`]/[`end_write`] calls (or
/// hold the scoped passes returned by [`read`] and [`write`]), and the gate
/// guarantees that at most one writer is inside at a time and that readers
/// and writers are never inside together. Any number of readers may share
/// the gate while no writer is active; there is no cap on reader
/// concurrency.
///
/// Which side wins when both are queued is decided by the [`Priority`] given
/// at construction:
///
/// * Under [`Priority::Writers`], a waiting writer already fences off new
///   readers, so the reader population can only drain until the writer gets
///   its turn.
/// * Under [`Priority::Readers`], new readers keep being admitted while a
///   writer waits; the writer enters once every reader that beat it inside
///   has left.
///
/// The gate schedules nothing itself. It does not know which thread is which
/// task, so the begin/end pairing is the caller's contract (a stray `end` is
/// reported as a [`ReleaseError`]), and a thread that calls [`begin_write`]
/// while it already holds access deadlocks waiting for itself, because the
/// gate is not reentrant. When several writers are waiting, which of them
/// enters next is unspecified.
///
/// The priority is fixed while tasks are running; [`set_priority`] takes
/// `&mut self` so a flip is only possible between episodes, once every clone
/// of the handle is gone and all tasks have been joined.
///
/// [`begin_read`]: RwGate::begin_read
/// [`end_read`]: RwGate::end_read
/// [`begin_write`]: RwGate::begin_write
/// [`end_write`]: RwGate::end_write
/// [`read`]: RwGate::read
/// [`write`]: RwGate::write
/// [`set_priority`]: RwGate::set_priority
///
/// # Example
///
/// This example runs one episode of the classic readers/writers exercise:
/// two writer threads and four reader threads, each taking the gate once,
/// with writers favored. No read section ever overlaps a write section, and
/// once every thread is joined the gate is idle again.
///
/// ```
/// use rwgate::RwGate;
/// use std::sync::Arc;
/// use std::thread;
/// use std::time::Duration;
///
/// let gate = Arc::new(RwGate::writers_first());
/// let mut tasks = Vec::new();
///
/// for _ in 0..2 {
///     let gate = Arc::clone(&gate);
///     tasks.push(thread::spawn(move || {
///         gate.begin_write();
///         // exclusive access to the shared resource
///         thread::sleep(Duration::from_millis(10));
///         gate.end_write().unwrap();
///     }));
/// }
///
/// for _ in 0..4 {
///     let gate = Arc::clone(&gate);
///     tasks.push(thread::spawn(move || {
///         gate.begin_read();
///         // shared access to the resource, possibly alongside other readers
///         gate.end_read().unwrap();
///     }));
/// }
///
/// for task in tasks {
///     task.join().unwrap();
/// }
///
/// assert!(gate.is_idle());
/// ```
pub struct RwGate {
    /// Read-only while the gate is shared; [`RwGate::set_priority`] needs
    /// `&mut self`, so no task can observe it mid-flip.
    priority: Priority,
    state: Mutex<GateState>,
    cond: Condvar,
}

impl RwGate {
    /// Creates a new gate with the given priority and no one inside.
    pub fn new(priority: Priority) -> RwGate {
        RwGate {
            priority,
            state: Mutex::new(GateState {
                active_readers: 0,
                active_writers: 0,
                waiting_writers: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// Creates a new gate that favors writers over waiting readers.
    ///
    /// Equivalent to `RwGate::new(Priority::Writers)`.
    pub fn writers_first() -> RwGate {
        RwGate::new(Priority::Writers)
    }

    /// Creates a new gate that favors readers over waiting writers.
    ///
    /// Equivalent to `RwGate::new(Priority::Readers)`.
    pub fn readers_first() -> RwGate {
        RwGate::new(Priority::Readers)
    }

    /// Blocks the current thread until it may read, then enters the gate as
    /// a reader.
    ///
    /// A reader may enter while no writer is active and, under
    /// [`Priority::Writers`], while additionally no writer is waiting.
    /// Multiple readers may be inside at once. Every `begin_read` must be
    /// paired with exactly one [`end_read`]; the [`read`] method wraps the
    /// pair in a scope-based pass.
    ///
    /// [`end_read`]: RwGate::end_read
    /// [`read`]: RwGate::read
    pub fn begin_read(&self) {
        let mut state = self.lock_state();

        while state.read_blocked(self.priority) {
            state = self.wait_on(state);
        }

        state.active_readers += 1;
        debug_assert_eq!(state.active_writers, 0);
    }

    /// Leaves the gate as a reader, waking every waiter so that blocked
    /// writers and readers alike re-evaluate their entry conditions.
    ///
    /// The wake is a broadcast on every call, not only when the last reader
    /// leaves: a single targeted wake could pick a waiter whose condition is
    /// still false and strand the one that became runnable.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::NoActiveReaders`] if no reader is inside the
    /// gate, i.e. the call has no matching [`begin_read`].
    ///
    /// [`begin_read`]: RwGate::begin_read
    pub fn end_read(&self) -> Result<(), ReleaseError> {
        let mut state = self.lock_state();

        if state.active_readers == 0 {
            return Err(ReleaseError::NoActiveReaders);
        }

        state.active_readers -= 1;
        self.cond.notify_all();

        Ok(())
    }

    /// Blocks the current thread until it may write, then enters the gate as
    /// the sole writer.
    ///
    /// A writer waits until no other writer is active *and* all readers have
    /// left; that drain requirement is what keeps read and write sections
    /// from overlapping under either priority. While it waits it is counted
    /// in [`waiting_writers`], which under [`Priority::Writers`] is exactly
    /// what holds new readers back. Every `begin_write` must be paired with
    /// exactly one [`end_write`]; the [`write`] method wraps the pair in a
    /// scope-based pass.
    ///
    /// When several writers are blocked here, which one proceeds after a
    /// wake is unspecified.
    ///
    /// [`waiting_writers`]: RwGate::waiting_writers
    /// [`end_write`]: RwGate::end_write
    /// [`write`]: RwGate::write
    pub fn begin_write(&self) {
        let mut state = self.lock_state();
        state.waiting_writers += 1;

        while state.write_blocked() {
            state = self.wait_on(state);
        }

        state.waiting_writers -= 1;
        state.active_writers += 1;
        debug_assert!(state.active_writers == 1 && state.active_readers == 0);
    }

    /// Leaves the gate as a writer and wakes every waiter.
    ///
    /// Both blocked readers and blocked writers may be eligible once the
    /// writer is gone, so the wake is a broadcast and each waiter re-checks
    /// its own entry condition.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::NoActiveWriter`] if no writer is inside the
    /// gate, i.e. the call has no matching [`begin_write`].
    ///
    /// [`begin_write`]: RwGate::begin_write
    pub fn end_write(&self) -> Result<(), ReleaseError> {
        let mut state = self.lock_state();

        if state.active_writers == 0 {
            return Err(ReleaseError::NoActiveWriter);
        }

        state.active_writers -= 1;
        if state.active_writers == 0 {
            self.cond.notify_all();
        }

        Ok(())
    }

    /// Enters the gate as a reader only if that is possible without waiting.
    ///
    /// Returns whether read access was granted; on `true` the caller owes an
    /// [`end_read`]. A `false` leaves no trace; the attempt does not count
    /// as a waiting task.
    ///
    /// [`end_read`]: RwGate::end_read
    ///
    /// # Example
    ///
    /// ```
    /// let gate = rwgate::RwGate::writers_first();
    ///
    /// assert!(gate.try_begin_write());
    /// // the writer inside keeps a reader from entering
    /// assert!(!gate.try_begin_read());
    /// gate.end_write().unwrap();
    ///
    /// assert!(gate.try_begin_read());
    /// gate.end_read().unwrap();
    /// ```
    pub fn try_begin_read(&self) -> bool {
        let mut state = self.lock_state();

        if state.read_blocked(self.priority) {
            false
        } else {
            state.active_readers += 1;
            true
        }
    }

    /// Enters the gate as the sole writer only if that is possible without
    /// waiting.
    ///
    /// Returns whether write access was granted; on `true` the caller owes
    /// an [`end_write`]. A `false` leaves no trace; the attempt does not
    /// register as a waiting writer and fences nothing.
    ///
    /// [`end_write`]: RwGate::end_write
    pub fn try_begin_write(&self) -> bool {
        let mut state = self.lock_state();

        if state.write_blocked() {
            false
        } else {
            state.active_writers += 1;
            true
        }
    }

    /// Blocks like [`begin_read`], but gives up once `timeout` has elapsed.
    ///
    /// Returns whether read access was granted. This method returns
    /// immediately with `true` when the gate is free, even with a zero
    /// timeout. Due to the platform condition-variable implementation the
    /// wait can overshoot the timeout slightly, but it will not return
    /// `false` before the timeout has elapsed.
    ///
    /// [`begin_read`]: RwGate::begin_read
    pub fn begin_read_timeout(&self, timeout: Duration) -> bool {
        let begin = Instant::now();
        let mut state = self.lock_state();

        while state.read_blocked(self.priority) {
            let elapsed = begin.elapsed();
            if elapsed >= timeout {
                return false;
            }
            state = self.wait_on_timeout(state, timeout - elapsed);
        }

        state.active_readers += 1;
        true
    }

    /// Blocks like [`begin_write`], but gives up once `timeout` has elapsed.
    ///
    /// Returns whether write access was granted. While it waits the caller
    /// counts as a waiting writer, with the same reader fence as
    /// [`begin_write`] under [`Priority::Writers`]; on expiry that
    /// registration is rolled back and all waiters are woken, since removing
    /// the last waiting writer can unfence blocked readers.
    ///
    /// [`begin_write`]: RwGate::begin_write
    ///
    /// # Example
    ///
    /// ```
    /// use rwgate::RwGate;
    /// use std::time::Duration;
    ///
    /// let gate = RwGate::writers_first();
    /// gate.begin_read();
    ///
    /// // a reader is inside, so a bounded wait for write access gives up
    /// assert!(!gate.begin_write_timeout(Duration::from_millis(10)));
    ///
    /// gate.end_read().unwrap();
    /// ```
    pub fn begin_write_timeout(&self, timeout: Duration) -> bool {
        let begin = Instant::now();
        let mut state = self.lock_state();
        state.waiting_writers += 1;

        while state.write_blocked() {
            let elapsed = begin.elapsed();
            if elapsed >= timeout {
                state.waiting_writers -= 1;
                // this may have been the writer fencing readers out
                self.cond.notify_all();
                return false;
            }
            state = self.wait_on_timeout(state, timeout - elapsed);
        }

        state.waiting_writers -= 1;
        state.active_writers += 1;
        debug_assert!(state.active_writers == 1 && state.active_readers == 0);
        true
    }

    /// Enters the gate as a reader and returns a pass that leaves it again
    /// when dropped.
    ///
    /// Blocks under the same conditions as [`begin_read`].
    ///
    /// [`begin_read`]: RwGate::begin_read
    ///
    /// # Example
    ///
    /// ```
    /// let gate = rwgate::RwGate::readers_first();
    /// {
    ///     let _pass = gate.read();
    ///     // shared access while the pass is alive
    /// } // the pass drops here, releasing read access
    /// assert!(gate.is_idle());
    /// ```
    pub fn read(&self) -> ReadPass<'_> {
        self.begin_read();
        ReadPass { gate: self }
    }

    /// Enters the gate as the sole writer and returns a pass that leaves it
    /// again when dropped.
    ///
    /// Blocks under the same conditions as [`begin_write`].
    ///
    /// [`begin_write`]: RwGate::begin_write
    ///
    /// # Example
    ///
    /// ```
    /// let gate = rwgate::RwGate::writers_first();
    /// {
    ///     let _pass = gate.write();
    ///     // exclusive access while the pass is alive
    /// } // the pass drops here, releasing write access
    /// assert!(gate.is_idle());
    /// ```
    pub fn write(&self) -> WritePass<'_> {
        self.begin_write();
        WritePass { gate: self }
    }

    /// Returns the number of readers currently inside the gate.
    ///
    /// Like all the occupancy accessors this is a snapshot; by the time the
    /// caller looks at it, other threads may already have entered or left.
    pub fn active_readers(&self) -> usize {
        self.lock_state().active_readers
    }

    /// Returns the number of writers currently inside the gate (0 or 1).
    pub fn active_writers(&self) -> usize {
        self.lock_state().active_writers
    }

    /// Returns the number of writers currently blocked in
    /// [`begin_write`](RwGate::begin_write) or its timeout variant.
    pub fn waiting_writers(&self) -> usize {
        self.lock_state().waiting_writers
    }

    /// Returns whether no task is inside or waiting to write.
    ///
    /// After every task of an episode has been joined this is guaranteed to
    /// be `true`; anything else means a begin call was never matched by its
    /// end.
    pub fn is_idle(&self) -> bool {
        let state = self.lock_state();
        state.active_readers == 0 && state.active_writers == 0 && state.waiting_writers == 0
    }

    /// Returns the priority the gate was configured with.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Changes the priority for the next episode.
    ///
    /// This function is safe to call because the `&mut self` enforces that
    /// no other references exist: no task can be inside the gate or blocked
    /// on it while the flip happens, so the policy is never observed
    /// mid-change.
    ///
    /// # Example
    ///
    /// ```
    /// use rwgate::{Priority, RwGate};
    ///
    /// let mut gate = RwGate::writers_first();
    /// // ... run an episode to completion ...
    /// gate.set_priority(Priority::Readers);
    /// assert_eq!(gate.priority(), Priority::Readers);
    /// ```
    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    /// Locks the counter state, shrugging off poisoning: a peer that
    /// panicked inside one of these short critical sections cannot leave the
    /// counters half-updated, so the state is still good.
    fn lock_state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits on the gate's condition variable, with the same poisoning
    /// policy as [`RwGate::lock_state`].
    fn wait_on<'a>(&self, guard: MutexGuard<'a, GateState>) -> MutexGuard<'a, GateState> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits on the gate's condition variable for at most `timeout`. Expiry
    /// is detected by the callers' deadline arithmetic, not the returned
    /// flag, so a spurious early return just goes around the loop again.
    fn wait_on_timeout<'a>(
        &self,
        guard: MutexGuard<'a, GateState>,
        timeout: Duration,
    ) -> MutexGuard<'a, GateState> {
        let (guard, _) = self
            .cond
            .wait_timeout(guard, timeout)
            .unwrap_or_else(PoisonError::into_inner);
        guard
    }
}

/// An opaque pass that holds read access to a borrowed [`RwGate`] and
/// releases it on drop.
///
/// See [`RwGate::read`] for more information.
#[must_use = "if unused the gate will immediately release read access"]
pub struct ReadPass<'a> {
    gate: &'a RwGate,
}

/// Upon drop, the pass calls [`RwGate::end_read`]. If that reports a stray
/// release (someone called `end_read` by hand while the pass was alive),
/// the error is silently ignored; there is nothing useful a destructor
/// could do with it.
impl Drop for ReadPass<'_> {
    fn drop(&mut self) {
        self.gate.end_read().ok();
    }
}

/// An opaque pass that holds exclusive write access to a borrowed [`RwGate`]
/// and releases it on drop.
///
/// See [`RwGate::write`] for more information.
#[must_use = "if unused the gate will immediately release write access"]
pub struct WritePass<'a> {
    gate: &'a RwGate,
}

/// Upon drop, the pass calls [`RwGate::end_write`], ignoring a stray-release
/// error the same way [`ReadPass`] does.
impl Drop for WritePass<'_> {
    fn drop(&mut self) {
        self.gate.end_write().ok();
    }
}
