#![deny(missing_docs)]

//! Frame-aligned batching of imperative mutations.
//!
//! Code that writes to a UI tree (attributes, styles, text) tends to issue the
//! same write many times per tick. This crate queues those writes and runs them
//! once, at the host's next frame, keeping only the last write to each
//! `(target, operation)` slot.
//!
//! # Quick Start
//!
//! ```ignore
//! use pulse::{ManualHost, Scheduler, Tag};
//!
//! let host = Rc::new(ManualHost::new());
//! let scheduler = Scheduler::new(host.clone());
//!
//! // Three writes to the same slot in one tick...
//! for color in ["red", "green", "blue"] {
//!     let el = el.clone();
//!     scheduler.submit_keyed(&el, Tag::style("color"), move || el.set_style("color", color));
//! }
//!
//! // ...become one write at the next frame.
//! host.frame();
//! ```
//!
//! # Core Types
//!
//! - [`Scheduler`] - Queues tasks, evicts superseded ones, flushes per frame.
//! - [`TaskHandle`] - Result channel of one submission. Evicted tasks' handles
//!   never settle.
//! - [`DedupeKey`] - A `(TargetKey, Tag)` write slot.
//! - [`FrameHost`] - The host's frame, microtask and clock facilities.
//!   [`ManualHost`] is driven by the embedder, [`TimerHost`] is the
//!   fixed-interval fallback.
//! - [`SafetyGate`] - Attribute and URL validation to run before building an
//!   attribute write.
//!
//! # Submitting
//!
//! ```ignore
//! // Keyed: replaces any queued write to the same slot.
//! let handle = scheduler.submit_keyed(&link, Tag::attribute("href"), move || {
//!     gate.validate("href", url)?;
//!     link.set_attribute("href", url)
//! });
//!
//! // Unkeyed: always runs, in submission order.
//! scheduler.submit_unkeyed(move || log.append(entry));
//!
//! // Wait for a frame without queuing work.
//! let time = scheduler.next_frame().await;
//! ```
//!
//! # Errors
//!
//! A failing or panicking callback rejects only its own [`TaskHandle`] with a
//! [`MutationError`]; the rest of the flush proceeds. The safety gate reports
//! [`ValidationError`] synchronously.

mod error;
mod hash;
mod host;
mod registry;
mod safety;
mod scheduler;
mod tag;
mod target;
mod task;

// Core types
pub use registry::DedupeKey;
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerStats};
pub use tag::Tag;
pub use target::{Anchor, Target, TargetKey};
pub use task::TaskHandle;

// Errors
pub use error::{MutationError, ValidationError};

// Host integration
pub use host::{
    DEFAULT_FRAME_INTERVAL, FrameCallback, FrameFuture, FrameHost, FrameRequestId, FrameTime,
    ManualHost, Microtask, TimerHost, next_frame,
};

// Attribute safety
pub use safety::{
    DEFAULT_BASE, DENIED_SCHEMES, SafetyGate, check_attribute, check_url, is_safe_attribute,
    is_safe_url,
};
