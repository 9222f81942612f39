//! Fixed-seed hasher for the scheduler's identity-keyed maps.
//!
//! Target keys are addresses or sequential ids, never attacker-controlled
//! strings, so HashDoS resistance is not needed and a zero-sized builder keeps
//! every per-target map small.

use std::collections::HashMap;
use std::hash::BuildHasher;

use foldhash::fast::{FixedState, FoldHasher};

/// A zero-sized `BuildHasher` backed by foldhash with a constant seed.
#[derive(Clone, Copy, Debug, Default)]
pub struct FastHashBuilder;

impl BuildHasher for FastHashBuilder {
    type Hasher = FoldHasher<'static>;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        FixedState::with_seed(0x517cc1b727220a95).build_hasher()
    }
}

/// `HashMap` using [`FastHashBuilder`].
pub type FastHashMap<K, V> = HashMap<K, V, FastHashBuilder>;
