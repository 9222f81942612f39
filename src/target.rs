//! Identity keys for externally owned mutation targets.
//!
//! The scheduler never inspects or compares targets by value. All it needs is
//! a key that is equal for the same handle and distinct for any two live
//! handles, which is either the handle's address or a correlation id the host
//! attaches to the target at first use. Address keys come with an [`Anchor`]
//! that keeps the address taken for as long as the key is in use.

use std::any::Any;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of correlation ids handed out by [`TargetKey::fresh`].
static NEXT_CORRELATION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a mutation target.
///
/// Two keys are equal only if they were taken from the same allocation or are
/// copies of the same correlation id. Address keys and correlation ids live in
/// separate namespaces and never collide with each other.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct TargetKey(Repr);

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
enum Repr {
    Address(usize),
    Correlation(u64),
}

impl TargetKey {
    /// Key a target by the address it lives at.
    ///
    /// The address is only meaningful while the target is alive. Zero-sized
    /// values may share an address, so key shared handles (`Rc`, `Arc`) rather
    /// than bare zero-sized values.
    pub fn of<T: ?Sized>(target: &T) -> Self {
        let address = (target as *const T).cast::<()>() as usize;
        Self(Repr::Address(address))
    }

    /// Allocate a process-unique correlation id.
    ///
    /// Hosts whose target handles move or get recycled store this key next to
    /// the target instead of relying on its address.
    pub fn fresh() -> Self {
        Self(Repr::Correlation(
            NEXT_CORRELATION_ID.fetch_add(1, Ordering::Relaxed),
        ))
    }
}

/// Type-erased clone of a shared handle that keeps its target allocated.
pub type Anchor = Rc<dyn Any>;

/// A handle that can be used as a dedupe target.
pub trait Target {
    /// The identity key of this handle.
    fn target_key(&self) -> TargetKey;

    /// A clone of the handle that keeps the target allocated.
    ///
    /// Address keys are only unique while the allocation lives. The registry
    /// holds the anchor until its window closes, so a target dropped mid-window
    /// cannot hand its address, and its slots, to a new one. Bare
    /// [`TargetKey`]s have nothing to anchor.
    fn anchor(&self) -> Option<Anchor> {
        None
    }
}

impl Target for TargetKey {
    fn target_key(&self) -> TargetKey {
        *self
    }
}

impl<T: ?Sized + 'static> Target for Rc<T> {
    fn target_key(&self) -> TargetKey {
        TargetKey::of::<T>(self)
    }

    fn anchor(&self) -> Option<Anchor> {
        Some(Rc::new(Rc::clone(self)))
    }
}

impl<T: ?Sized + 'static> Target for Arc<T> {
    fn target_key(&self) -> TargetKey {
        TargetKey::of::<T>(self)
    }

    fn anchor(&self) -> Option<Anchor> {
        Some(Rc::new(Arc::clone(self)))
    }
}

impl<T: Target + ?Sized> Target for &T {
    fn target_key(&self) -> TargetKey {
        (**self).target_key()
    }

    fn anchor(&self) -> Option<Anchor> {
        (**self).anchor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(PartialEq)]
    struct Element {
        tag: &'static str,
    }

    #[test]
    fn clones_of_one_handle_share_a_key() {
        let element = Rc::new(Element { tag: "a" });
        let alias = Rc::clone(&element);

        assert_eq!(element.target_key(), alias.target_key());
    }

    #[test]
    fn structurally_equal_targets_get_distinct_keys() {
        let first = Rc::new(Element { tag: "div" });
        let second = Rc::new(Element { tag: "div" });

        assert!(*first == *second);
        assert_ne!(first.target_key(), second.target_key());
    }

    #[test]
    fn arc_and_reference_keys_agree() {
        let element = Arc::new(Element { tag: "span" });

        assert_eq!(element.target_key(), TargetKey::of::<Element>(&element));
        assert_eq!((&element).target_key(), element.target_key());
        assert_eq!(element.tag, "span");
    }

    #[test]
    fn shared_handles_anchor_their_target() {
        let element = Rc::new(Element { tag: "p" });
        let anchor = (&element).anchor().expect("rc targets anchor");

        assert_eq!(Rc::strong_count(&element), 2);
        drop(anchor);
        assert_eq!(Rc::strong_count(&element), 1);

        let shared = Arc::new(Element { tag: "p" });
        let _anchor = shared.anchor();
        assert_eq!(Arc::strong_count(&shared), 2);
        assert!(TargetKey::fresh().anchor().is_none());
    }

    #[test]
    fn fresh_keys_are_unique() {
        let a = TargetKey::fresh();
        let b = TargetKey::fresh();

        assert_ne!(a, b);
        assert_eq!(a.target_key(), a);
    }
}
