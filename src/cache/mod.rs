//! Cache / Resume Store
//!
//! Maps instance fingerprints to completed work directories so that
//! re-runs replay prior results instead of re-executing commands.

mod store;

pub use store::{CacheEntry, CacheStore};
