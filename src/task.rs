//! Queued tasks and the result channel handed back to submitters.

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::channel::oneshot;

use crate::error::MutationError;

/// Identifier of a queued task, unique within one scheduler.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Type-erased wrapped callback. Returns whether the task succeeded.
pub(crate) type Runnable = Box<dyn FnOnce() -> bool>;

/// A task waiting in the pending queue.
pub(crate) struct QueuedTask {
    pub(crate) run: Runnable,
}

/// Wrap `callback` so its outcome settles a [`TaskHandle`] instead of
/// propagating. Errors and panics are both caught.
pub(crate) fn wrap<T, E, F>(callback: F) -> (QueuedTask, TaskHandle<T>)
where
    F: FnOnce() -> Result<T, E> + 'static,
    E: Into<Box<dyn Error>>,
    T: 'static,
{
    let (tx, rx) = oneshot::channel();
    let run: Runnable = Box::new(move || {
        let outcome = match panic::catch_unwind(AssertUnwindSafe(callback)) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(MutationError::Failed(error.into())),
            Err(payload) => Err(MutationError::from_panic(payload)),
        };
        let succeeded = outcome.is_ok();
        // Receiver gone means the caller stopped waiting; the mutation still ran.
        let _ = tx.send(outcome);
        succeeded
    });
    (QueuedTask { run }, TaskHandle::new(rx))
}

/// Result channel of a submitted task.
///
/// Resolves once, with the callback's value or its [`MutationError`], when the
/// task runs in a flush. A task evicted by a newer submission to the same slot
/// never runs, and its handle stays pending forever: it neither resolves nor
/// rejects. Dropping the handle does not cancel the task.
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T, MutationError>>,
    abandoned: bool,
}

impl<T> TaskHandle<T> {
    fn new(rx: oneshot::Receiver<Result<T, MutationError>>) -> Self {
        Self {
            rx,
            abandoned: false,
        }
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, MutationError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.abandoned {
            return Poll::Pending;
        }
        match self.rx.poll_unpin(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Sender dropped without a value: the task was evicted (or its
            // scheduler torn down). Such handles never settle.
            Poll::Ready(Err(oneshot::Canceled)) => {
                self.abandoned = true;
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("abandoned", &self.abandoned)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[test]
    fn ok_value_settles_handle() {
        let (task, mut handle) = wrap(|| Ok::<_, Infallible>(42));

        assert!((&mut handle).now_or_never().is_none());
        assert!((task.run)());
        assert_eq!(handle.now_or_never().map(Result::ok), Some(Some(42)));
    }

    #[test]
    fn err_value_rejects_handle() {
        let (task, handle) = wrap(|| Err::<(), _>("no parent"));

        assert!(!(task.run)());
        let outcome = handle.now_or_never().expect("settled");
        assert!(matches!(outcome, Err(MutationError::Failed(e)) if e.to_string() == "no parent"));
    }

    #[test]
    fn panic_rejects_handle() {
        let (task, handle) = wrap(|| -> Result<(), Infallible> { panic!("lost element") });

        assert!(!(task.run)());
        let outcome = handle.now_or_never().expect("settled");
        assert!(matches!(outcome, Err(MutationError::Panicked(m)) if m == "lost element"));
    }

    #[test]
    fn dropped_task_leaves_handle_pending() {
        let (task, mut handle) = wrap(|| Ok::<_, Infallible>(()));
        drop(task);

        assert!((&mut handle).now_or_never().is_none());
        // Polling again after the channel closed stays pending.
        assert!((&mut handle).now_or_never().is_none());
        assert!(format!("{handle:?}").contains("abandoned: true"));
    }

    #[test]
    fn task_runs_even_if_handle_dropped() {
        let (task, handle) = wrap(|| Ok::<_, Infallible>("written"));
        drop(handle);

        assert!((task.run)());
    }
}
