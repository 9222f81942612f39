//! The batch scheduler.
//!
//! Mutations submitted during one batch window are queued and run together in
//! a single flush at the host's next frame boundary. A submission carrying a
//! [`DedupeKey`] evicts the task that currently owns the same slot, so only the
//! last write to each `(target, tag)` pair survives.
//!
//! ## Lifecycle
//!
//! 1. `submit()` queues the wrapped callback and (re-)arms the flush: any
//!    outstanding frame request is cancelled and a new one is made, so a burst
//!    flushes on the frame after its *last* submission.
//! 2. The host fires the frame request; `flush()` takes the queue and the
//!    registry together, leaving both empty, then runs every task in
//!    submission order.
//! 3. Work submitted by a running callback opens the next window.
//!
//! A scheduler also queues one flush as a microtask when it is built, so the
//! first window starts from a known-clean state.
//!
//! ## Usage
//!
//! ```ignore
//! let host = Rc::new(ManualHost::new());
//! let scheduler = Scheduler::builder(host.clone())
//!     .max_deferral(Duration::from_millis(100))
//!     .build();
//!
//! let first = scheduler.submit_keyed(&link, Tag::attribute("href"), move || set_href(&link, "/a"));
//! let second = scheduler.submit_keyed(&link, Tag::attribute("href"), move || set_href(&link, "/b"));
//!
//! host.frame();
//! // Only the second write ran. `first` never settles.
//! ```

use std::cell::RefCell;
use std::error::Error;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use indexmap::IndexMap;

use crate::hash::FastHashBuilder;
use crate::host::{FrameFuture, FrameHost, FrameRequestId};
use crate::registry::{DedupeKey, DedupeRegistry};
use crate::tag::Tag;
use crate::target::Target;
use crate::task::{self, QueuedTask, TaskHandle, TaskId};

/// Counters describing what a scheduler has done so far.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct SchedulerStats {
    /// Tasks accepted by `submit`.
    pub submitted: u64,
    /// Tasks removed from the queue by a newer submission to the same slot.
    pub evicted: u64,
    /// Tasks whose callback ran and returned a value.
    pub succeeded: u64,
    /// Tasks whose callback ran and returned an error or panicked.
    pub failed: u64,
    /// Flushes performed, including empty ones.
    pub flushes: u64,
    /// Times an outstanding flush request was cancelled and made again.
    pub rearms: u64,
}

/// Builder for a [`Scheduler`].
///
/// # Example
///
/// ```ignore
/// // Source behavior: every submission re-arms the flush.
/// let scheduler = Scheduler::builder(host.clone()).build();
///
/// // Bounded: once a window has been open for 50ms, stop deferring it.
/// let scheduler = Scheduler::builder(host.clone())
///     .max_deferral(Duration::from_millis(50))
///     .build();
/// ```
pub struct SchedulerBuilder {
    host: Rc<dyn FrameHost>,
    max_deferral: Option<Duration>,
}

impl SchedulerBuilder {
    /// Bound how long a window may be deferred by re-arming.
    ///
    /// Without a bound, a stream of submissions arriving faster than frames
    /// defers the flush indefinitely. With one, submissions made after the
    /// window has been open for `bound` of host time keep the outstanding
    /// request instead of replacing it.
    ///
    /// Default: unbounded
    pub fn max_deferral(mut self, bound: Duration) -> Self {
        self.max_deferral = Some(bound);
        self
    }

    /// Build the scheduler and queue its initial flush.
    pub fn build(self) -> Scheduler {
        let inner = Rc::new(Inner {
            host: self.host,
            max_deferral: self.max_deferral,
            state: RefCell::new(BatchState::default()),
        });

        let weak = Rc::downgrade(&inner);
        inner
            .host
            .queue_microtask(Box::new(move || flush_weak(&weak, FlushCause::Startup)));

        Scheduler { inner }
    }
}

/// Deduplicating, frame-aligned task scheduler.
///
/// Cloning yields another handle to the same queue. The scheduler is confined
/// to the thread that built it (`!Send`), which is what keeps queue and
/// registry free of locks.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<Inner>,
}

struct Inner {
    host: Rc<dyn FrameHost>,
    max_deferral: Option<Duration>,
    state: RefCell<BatchState>,
}

/// Everything a batch window owns. Queue and registry are only ever emptied
/// together, under a single borrow.
#[derive(Default)]
struct BatchState {
    queue: IndexMap<TaskId, QueuedTask, FastHashBuilder>,
    registry: DedupeRegistry,
    /// Outstanding frame request, if a flush is armed.
    request: Option<FrameRequestId>,
    /// Host time of the first submission in the current window.
    window_opened_at: Option<Duration>,
    next_task: u64,
    stats: SchedulerStats,
}

impl BatchState {
    fn allocate_id(&mut self) -> TaskId {
        self.next_task += 1;
        TaskId::new(self.next_task)
    }
}

impl Scheduler {
    /// A scheduler with default settings on `host`.
    pub fn new<H: FrameHost + 'static>(host: Rc<H>) -> Self {
        Self::builder(host).build()
    }

    /// Configure a scheduler on `host`.
    pub fn builder<H: FrameHost + 'static>(host: Rc<H>) -> SchedulerBuilder {
        SchedulerBuilder {
            host,
            max_deferral: None,
        }
    }

    /// Queue `callback` for the next flush and return its result channel.
    ///
    /// With a `dedupe` key, a task already queued for the same slot is removed
    /// from the queue. The removed task's callback never runs and its handle
    /// never settles, so the new callback must describe the final desired
    /// state on its own rather than build on the one it replaces.
    ///
    /// Never blocks and never runs the callback synchronously.
    pub fn submit<T, E, F>(&self, callback: F, dedupe: Option<DedupeKey>) -> TaskHandle<T>
    where
        F: FnOnce() -> Result<T, E> + 'static,
        E: Into<Box<dyn Error>>,
        T: 'static,
    {
        let (queued, handle) = task::wrap(callback);
        // Dropped only after the borrow ends: their captures may call back in.
        let mut evicted = None;
        let mut surplus = None;
        {
            let mut state = self.inner.state.borrow_mut();
            let id = state.allocate_id();

            if let Some(key) = dedupe {
                let (target, tag, anchor) = key.into_parts();
                if let Some(previous) = state.registry.owner(target, &tag) {
                    evicted = state.queue.shift_remove(&previous);
                    if evicted.is_some() {
                        cov_mark::hit!(queued_task_superseded);
                        state.stats.evicted += 1;
                        tracing::trace!(evicted = %previous, by = %id, tag = %tag, "superseded queued task");
                    }
                }
                surplus = state.registry.record_owner(target, tag, id, anchor);
            }

            state.queue.insert(id, queued);
            state.stats.submitted += 1;
            tracing::trace!(task = %id, queued = state.queue.len(), "task submitted");

            self.arm(&mut state);
        }
        drop(evicted);
        drop(surplus);
        handle
    }

    /// Queue `callback` in the `tag` slot of `target`.
    pub fn submit_keyed<T, E, F>(
        &self,
        target: &impl Target,
        tag: impl Into<Tag>,
        callback: F,
    ) -> TaskHandle<T>
    where
        F: FnOnce() -> Result<T, E> + 'static,
        E: Into<Box<dyn Error>>,
        T: 'static,
    {
        self.submit(callback, Some(DedupeKey::new(target, tag)))
    }

    /// Queue `callback` without a dedupe key. It is never evicted.
    pub fn submit_unkeyed<T, E, F>(&self, callback: F) -> TaskHandle<T>
    where
        F: FnOnce() -> Result<T, E> + 'static,
        E: Into<Box<dyn Error>>,
        T: 'static,
    {
        self.submit(callback, None)
    }

    /// Wait for the host's next frame, independently of the batch queue.
    pub fn next_frame(&self) -> FrameFuture {
        crate::host::next_frame(&*self.inner.host)
    }

    /// Number of tasks waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.inner.state.borrow().queue.len()
    }

    /// True while a flush is armed with the host.
    pub fn is_flush_requested(&self) -> bool {
        self.inner.state.borrow().request.is_some()
    }

    /// Counters since construction.
    pub fn stats(&self) -> SchedulerStats {
        self.inner.state.borrow().stats
    }

    /// Cancel the outstanding request, if any, and request a flush on the next
    /// frame. Keeps the outstanding request once the deferral bound is hit.
    fn arm(&self, state: &mut BatchState) {
        let host = &self.inner.host;
        let now = host.now();
        let opened_at = *state.window_opened_at.get_or_insert(now);

        if let Some(outstanding) = state.request {
            if let Some(bound) = self.inner.max_deferral {
                if now.saturating_sub(opened_at) >= bound {
                    cov_mark::hit!(deferral_bound_keeps_request);
                    tracing::debug!(
                        deferred_ms = now.saturating_sub(opened_at).as_millis() as u64,
                        "deferral bound reached, keeping outstanding flush"
                    );
                    return;
                }
            }
            host.cancel_frame(outstanding);
            state.stats.rearms += 1;
        }

        let weak = Rc::downgrade(&self.inner);
        state.request = Some(host.request_frame(Box::new(move |_| {
            flush_weak(&weak, FlushCause::Frame)
        })));
    }

    /// Run every queued task, in submission order, and close the window.
    fn flush(&self, cause: FlushCause) {
        let (tasks, mut registry, outstanding) = {
            let mut state = self.inner.state.borrow_mut();
            state.window_opened_at = None;
            state.stats.flushes += 1;
            tracing::trace!(
                ?cause,
                targets = state.registry.target_count(),
                slots = state.registry.slot_count(),
                "closing batch window"
            );
            (
                std::mem::take(&mut state.queue),
                std::mem::take(&mut state.registry),
                state.request.take(),
            )
        };
        // Outside the borrow: releasing an anchor may drop its target.
        registry.clear();

        // The startup microtask got here before the armed frame, which now has
        // nothing left to do. A frame flush is that request firing.
        if let (FlushCause::Startup, Some(request)) = (cause, outstanding) {
            cov_mark::hit!(startup_flush_withdraws_frame);
            self.inner.host.cancel_frame(request);
        }

        if tasks.is_empty() {
            tracing::trace!("empty flush");
            return;
        }

        let total = tasks.len();
        let mut failed = 0;
        for (_, task) in tasks {
            if !(task.run)() {
                failed += 1;
            }
        }

        let mut state = self.inner.state.borrow_mut();
        state.stats.succeeded += (total - failed) as u64;
        state.stats.failed += failed as u64;
        tracing::debug!(ran = total, failed, "flushed batch window");
    }
}

/// What triggered a flush.
#[derive(Copy, Clone, Debug)]
enum FlushCause {
    /// The microtask queued by [`SchedulerBuilder::build`].
    Startup,
    /// The armed frame request fired.
    Frame,
}

/// Flush through a weak handle; a dropped scheduler has nothing to flush.
fn flush_weak(inner: &Weak<Inner>, cause: FlushCause) {
    if let Some(inner) = inner.upgrade() {
        Scheduler { inner }.flush(cause);
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Scheduler")
            .field("pending", &state.queue.len())
            .field("flush_requested", &state.request.is_some())
            .field("max_deferral", &self.inner.max_deferral)
            .field("stats", &state.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ManualHost;
    use futures::FutureExt;
    use std::cell::Cell;
    use std::convert::Infallible;

    fn setup() -> (Rc<ManualHost>, Scheduler) {
        let host = Rc::new(ManualHost::new());
        let scheduler = Scheduler::new(Rc::clone(&host));
        (host, scheduler)
    }

    #[test]
    fn build_queues_startup_flush() {
        let (host, scheduler) = setup();

        assert_eq!(host.pending_microtasks(), 1);
        assert_eq!(host.run_microtasks(), 1);
        assert_eq!(scheduler.stats().flushes, 1);
        assert!(!scheduler.is_flush_requested());
    }

    #[test]
    fn submit_is_deferred_until_frame() {
        let (host, scheduler) = setup();
        host.run_microtasks();
        let ran = Rc::new(Cell::new(false));

        let r = Rc::clone(&ran);
        let mut handle = scheduler.submit_unkeyed(move || {
            r.set(true);
            Ok::<_, Infallible>(7)
        });

        assert!(!ran.get());
        assert!(scheduler.is_flush_requested());
        assert_eq!(scheduler.pending_len(), 1);
        assert!((&mut handle).now_or_never().is_none());

        host.frame();

        assert!(ran.get());
        assert_eq!(handle.now_or_never().map(Result::ok), Some(Some(7)));
        assert_eq!(scheduler.pending_len(), 0);
        assert!(!scheduler.is_flush_requested());
    }

    #[test]
    fn burst_keeps_a_single_outstanding_request() {
        let (host, scheduler) = setup();
        host.run_microtasks();

        for _ in 0..10 {
            let _ = scheduler.submit_unkeyed(|| Ok::<_, Infallible>(()));
        }

        assert_eq!(host.pending_frames(), 1);
        assert_eq!(scheduler.stats().rearms, 9);
        assert_eq!(host.frame(), 1);
        assert_eq!(scheduler.stats().succeeded, 10);
    }

    #[test]
    fn startup_flush_runs_work_submitted_before_it() {
        cov_mark::check!(startup_flush_withdraws_frame);
        let (host, scheduler) = setup();

        let handle = scheduler.submit_unkeyed(|| Ok::<_, Infallible>("early"));
        assert_eq!(host.pending_frames(), 1);

        host.run_microtasks();

        assert_eq!(handle.now_or_never().map(Result::ok), Some(Some("early")));
        // The armed frame request was withdrawn along with the queue.
        assert_eq!(host.pending_frames(), 0);
        assert!(!scheduler.is_flush_requested());
    }

    #[test]
    fn deferral_bound_stops_rearming() {
        cov_mark::check!(deferral_bound_keeps_request);
        let host = Rc::new(ManualHost::new());
        let scheduler = Scheduler::builder(Rc::clone(&host))
            .max_deferral(Duration::from_millis(32))
            .build();
        host.run_microtasks();

        let _ = scheduler.submit_unkeyed(|| Ok::<_, Infallible>(()));
        host.advance(Duration::from_millis(16));
        let _ = scheduler.submit_unkeyed(|| Ok::<_, Infallible>(()));
        assert_eq!(scheduler.stats().rearms, 1);

        host.advance(Duration::from_millis(16));
        let _ = scheduler.submit_unkeyed(|| Ok::<_, Infallible>(()));
        let _ = scheduler.submit_unkeyed(|| Ok::<_, Infallible>(()));
        assert_eq!(scheduler.stats().rearms, 1);
        assert_eq!(host.pending_frames(), 1);

        host.frame();
        assert_eq!(scheduler.stats().succeeded, 4);

        // The bound is measured per window.
        let _ = scheduler.submit_unkeyed(|| Ok::<_, Infallible>(()));
        let _ = scheduler.submit_unkeyed(|| Ok::<_, Infallible>(()));
        assert_eq!(scheduler.stats().rearms, 2);
    }

    #[test]
    fn dropped_scheduler_ignores_its_frame() {
        let (host, scheduler) = setup();
        host.run_microtasks();
        let ran = Rc::new(Cell::new(false));

        let r = Rc::clone(&ran);
        let mut handle = scheduler.submit_unkeyed(move || {
            r.set(true);
            Ok::<_, Infallible>(())
        });
        drop(scheduler);

        assert_eq!(host.frame(), 1);
        assert!(!ran.get());
        assert!((&mut handle).now_or_never().is_none());
    }

    #[test]
    fn debug_output_reports_queue() {
        let (_host, scheduler) = setup();
        let _ = scheduler.submit_unkeyed(|| Ok::<_, Infallible>(()));

        let rendered = format!("{scheduler:?}");
        assert!(rendered.contains("pending: 1"));
        assert!(rendered.contains("flush_requested: true"));
    }
}
