//! Channel Module
//!
//! Ordered asynchronous streams connecting task ports, plus the operators
//! and sources that produce them.
//!
//! # Structure
//!
//! - [`item`]: The value model carried on channels (files, values, tuples)
//! - [`stream`]: Channel and subscription primitives
//! - [`operators`]: map, collect and flatten operator threads
//! - [`pairing`]: paired-file grouping source

pub mod item;
pub mod operators;
pub mod pairing;
pub mod stream;

pub use item::Item;
pub use operators::{collect, flatten, map};
pub use pairing::{pair_files, PairingOutcome};
pub use stream::{Channel, Multiplicity, Subscription, TryRecvError};
