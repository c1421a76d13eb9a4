//! lox-util - Foundation types shared across the Lox VM workspace.
//!
//! The runtime models every heap reference as a typed index into an arena
//! (see `lox-runtime`). This crate provides the index machinery: the [`Idx`]
//! trait, the [`IndexVec`] container the arenas are layered over, and the
//! [`define_idx!`] macro that stamps out newtype index types. Raw `usize`
//! indices are easy to mix up between index spaces (a string id is not an
//! instance id); newtypes make that a compile error at zero runtime cost.

mod index_vec;

pub use index_vec::{Idx, IndexVec};

// Re-export the map hasher so every crate agrees on one implementation.
pub use rustc_hash::FxHashMap;

/// Define a `u32`-backed newtype index implementing [`Idx`].
///
/// # Example
///
/// ```
/// use lox_util::{define_idx, Idx, IndexVec};
///
/// define_idx!(NodeId);
///
/// let mut nodes: IndexVec<NodeId, &str> = IndexVec::new();
/// let id = nodes.push("root");
/// assert_eq!(nodes[id], "root");
/// ```
#[macro_export]
macro_rules! define_idx {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl $crate::Idx for $name {
            fn from_usize(idx: usize) -> Self {
                assert!(idx <= u32::MAX as usize);
                $name(idx as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}
