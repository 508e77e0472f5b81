//! Hashing and map types shared by the registry, dispatcher and bridge.
//!
//! `hashbrown` maps with `ahash` by default; the `std-hash` feature swaps both
//! for the standard library versions.

use core::hash::Hash;
use std::hash::Hasher;

#[cfg(feature = "std-hash")]
mod backend {
    pub use std::collections::hash_map::DefaultHasher as FastHasher;
    pub use std::collections::{HashMap, HashSet};

    #[inline]
    pub fn new_hasher() -> FastHasher {
        FastHasher::new()
    }
}

#[cfg(not(feature = "std-hash"))]
mod backend {
    pub use ahash::AHasher as FastHasher;
    pub use hashbrown::{HashMap, HashSet};

    #[inline]
    pub fn new_hasher() -> FastHasher {
        FastHasher::default()
    }
}

pub use backend::{FastHasher, HashMap, HashSet};

/// Hashes a single value with whichever backend is active.
#[inline]
pub fn hash_one<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = backend::new_hasher();
    value.hash(&mut hasher);
    hasher.finish()
}
