//! Host frame facilities.
//!
//! The scheduler needs three things from its host: a way to run a callback at
//! the next rendering boundary (and to cancel that request), a microtask queue
//! for work that must run as soon as the current call stack unwinds, and a
//! monotonic clock. [`FrameHost`] captures that surface.
//!
//! Two hosts ship with the crate:
//!
//! - [`ManualHost`]: frames happen when the embedder says so. Suited to custom
//!   event loops that already know when they paint, and to tests.
//! - [`TimerHost`]: the fallback for environments without a frame signal. A
//!   request becomes due a fixed interval ([`DEFAULT_FRAME_INTERVAL`]) after it
//!   was made.
//!
//! ## Usage
//!
//! ```ignore
//! let host = Rc::new(ManualHost::new());
//! let scheduler = Scheduler::new(host.clone());
//!
//! let handle = scheduler.submit_keyed(&element, Tag::text(), || set_text(&element));
//! host.advance(Duration::from_millis(16));
//! host.frame(); // flush runs here
//! ```

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::channel::oneshot;
use indexmap::IndexMap;

use crate::hash::FastHashBuilder;

/// Default period of the fallback frame timer (~60fps).
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Timestamp a host passes to frame callbacks: host time at the start of the
/// frame, measured from the host's origin.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct FrameTime(Duration);

impl FrameTime {
    /// Wrap a host time.
    pub const fn new(since_origin: Duration) -> Self {
        Self(since_origin)
    }

    /// Time since the host's origin.
    pub const fn since_origin(self) -> Duration {
        self.0
    }

    /// Milliseconds since the host's origin, with sub-millisecond precision.
    pub fn as_millis_f64(self) -> f64 {
        self.0.as_secs_f64() * 1000.0
    }
}

/// Handle of an outstanding frame request.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct FrameRequestId(u64);

/// Callback run at a frame boundary.
pub type FrameCallback = Box<dyn FnOnce(FrameTime)>;

/// Callback run once the current call stack has unwound.
pub type Microtask = Box<dyn FnOnce()>;

/// The host's frame and microtask facilities.
///
/// Implementations must never run a callback from inside the call that
/// registers it; callbacks only run when the host drives its loop.
pub trait FrameHost {
    /// Run `callback` at the next frame boundary.
    fn request_frame(&self, callback: FrameCallback) -> FrameRequestId;

    /// Cancel a request that has not fired yet. Unknown or already fired ids
    /// are ignored.
    fn cancel_frame(&self, id: FrameRequestId);

    /// Run `task` once the current call stack has unwound.
    fn queue_microtask(&self, task: Microtask);

    /// Monotonic host time since the host's origin.
    fn now(&self) -> Duration;
}

/// Wait for the next frame of `host`.
///
/// Resolves with the frame's timestamp. If the host drops the request without
/// firing it, the future stays pending.
pub fn next_frame(host: &dyn FrameHost) -> FrameFuture {
    let (tx, rx) = oneshot::channel();
    host.request_frame(Box::new(move |time| {
        let _ = tx.send(time);
    }));
    FrameFuture { rx, dropped: false }
}

/// Future returned by [`next_frame`].
#[derive(Debug)]
pub struct FrameFuture {
    rx: oneshot::Receiver<FrameTime>,
    dropped: bool,
}

impl Future for FrameFuture {
    type Output = FrameTime;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<FrameTime> {
        if self.dropped {
            return Poll::Pending;
        }
        match self.rx.poll_unpin(cx) {
            Poll::Ready(Ok(time)) => Poll::Ready(time),
            Poll::Ready(Err(oneshot::Canceled)) => {
                self.dropped = true;
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

struct Request {
    due: Duration,
    callback: FrameCallback,
}

/// Outstanding frame requests and microtasks shared by both hosts.
#[derive(Default)]
struct RequestQueue {
    next_id: u64,
    frames: IndexMap<FrameRequestId, Request, FastHashBuilder>,
    microtasks: VecDeque<Microtask>,
}

impl RequestQueue {
    fn insert(&mut self, due: Duration, callback: FrameCallback) -> FrameRequestId {
        self.next_id += 1;
        let id = FrameRequestId(self.next_id);
        self.frames.insert(id, Request { due, callback });
        id
    }

    fn cancel(&mut self, id: FrameRequestId) {
        self.frames.shift_remove(&id);
    }

    /// Requests due at `now`, in request order.
    fn due_ids(&self, now: Duration) -> Vec<FrameRequestId> {
        self.frames
            .iter()
            .filter(|(_, request)| request.due <= now)
            .map(|(id, _)| *id)
            .collect()
    }

    fn next_due(&self) -> Option<Duration> {
        self.frames.values().map(|request| request.due).min()
    }
}

/// Run queued microtasks until none remain, including ones queued meanwhile.
fn drain_microtasks(queue: &RefCell<RequestQueue>) -> usize {
    let mut ran = 0;
    loop {
        // Borrow released before running so the task can queue more work.
        let Some(task) = queue.borrow_mut().microtasks.pop_front() else {
            break ran;
        };
        task();
        ran += 1;
    }
}

/// Fire the given requests with `time`. A request cancelled by an earlier
/// callback in the same frame is skipped; requests made during the frame are
/// not in `ids` and wait for the next one.
fn fire(queue: &RefCell<RequestQueue>, ids: Vec<FrameRequestId>, time: FrameTime) -> usize {
    let mut fired = 0;
    for id in ids {
        let Some(request) = queue.borrow_mut().frames.shift_remove(&id) else {
            continue;
        };
        (request.callback)(time);
        fired += 1;
        drain_microtasks(queue);
    }
    fired
}

/// A host whose clock and frames are driven explicitly by the embedder.
#[derive(Default)]
pub struct ManualHost {
    queue: RefCell<RequestQueue>,
    now: Cell<Duration>,
}

impl ManualHost {
    /// A host at time zero with nothing queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    /// Run pending microtasks. Returns how many ran.
    pub fn run_microtasks(&self) -> usize {
        drain_microtasks(&self.queue)
    }

    /// Run one frame: drain microtasks, then fire every frame request made
    /// before the frame began, stamped with the current time.
    ///
    /// Returns the number of frame callbacks fired.
    pub fn frame(&self) -> usize {
        self.run_microtasks();
        let ids: Vec<FrameRequestId> = self.queue.borrow().frames.keys().copied().collect();
        fire(&self.queue, ids, FrameTime(self.now.get()))
    }

    /// Number of outstanding frame requests.
    pub fn pending_frames(&self) -> usize {
        self.queue.borrow().frames.len()
    }

    /// Number of queued microtasks.
    pub fn pending_microtasks(&self) -> usize {
        self.queue.borrow().microtasks.len()
    }
}

impl FrameHost for ManualHost {
    fn request_frame(&self, callback: FrameCallback) -> FrameRequestId {
        let now = self.now.get();
        self.queue.borrow_mut().insert(now, callback)
    }

    fn cancel_frame(&self, id: FrameRequestId) {
        self.queue.borrow_mut().cancel(id);
    }

    fn queue_microtask(&self, task: Microtask) {
        self.queue.borrow_mut().microtasks.push_back(task);
    }

    fn now(&self) -> Duration {
        self.now.get()
    }
}

impl fmt::Debug for ManualHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualHost")
            .field("now", &self.now.get())
            .field("pending_frames", &self.pending_frames())
            .field("pending_microtasks", &self.pending_microtasks())
            .finish()
    }
}

/// Fallback host for environments without a frame signal.
///
/// Each request fires a fixed interval after it was made, measured on the
/// wall clock. Drive it with [`run_due`](Self::run_due) from an existing loop
/// or hand control to [`run_until_idle`](Self::run_until_idle).
pub struct TimerHost {
    queue: RefCell<RequestQueue>,
    origin: Instant,
    interval: Duration,
}

impl Default for TimerHost {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerHost {
    /// A timer host using [`DEFAULT_FRAME_INTERVAL`].
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_FRAME_INTERVAL)
    }

    /// A timer host firing requests `interval` after they were made.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            queue: RefCell::new(RequestQueue::default()),
            origin: Instant::now(),
            interval,
        }
    }

    /// The configured request delay.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run pending microtasks. Returns how many ran.
    pub fn run_microtasks(&self) -> usize {
        drain_microtasks(&self.queue)
    }

    /// Drain microtasks, then fire every request whose deadline has passed.
    ///
    /// Returns the number of frame callbacks fired.
    pub fn run_due(&self) -> usize {
        self.run_microtasks();
        let now = self.now();
        let ids = self.queue.borrow().due_ids(now);
        fire(&self.queue, ids, FrameTime(now))
    }

    /// Keep running microtasks and due requests, sleeping until the next
    /// deadline, until nothing is left.
    ///
    /// Returns the number of frame callbacks fired.
    pub fn run_until_idle(&self) -> usize {
        let mut fired = 0;
        loop {
            self.run_microtasks();
            let Some(due) = self.queue.borrow().next_due() else {
                break fired;
            };
            let now = self.now();
            if due > now {
                thread::sleep(due - now);
            }
            fired += self.run_due();
        }
    }

    /// Number of outstanding frame requests.
    pub fn pending_frames(&self) -> usize {
        self.queue.borrow().frames.len()
    }
}

impl FrameHost for TimerHost {
    fn request_frame(&self, callback: FrameCallback) -> FrameRequestId {
        let due = self.now() + self.interval;
        self.queue.borrow_mut().insert(due, callback)
    }

    fn cancel_frame(&self, id: FrameRequestId) {
        self.queue.borrow_mut().cancel(id);
    }

    fn queue_microtask(&self, task: Microtask) {
        self.queue.borrow_mut().microtasks.push_back(task);
    }

    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

impl fmt::Debug for TimerHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHost")
            .field("interval", &self.interval)
            .field("pending_frames", &self.pending_frames())
            .finish_non_exhaustive()
    }
}
