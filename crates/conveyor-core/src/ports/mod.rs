//! Ports - abstractions over everything outside the process.
//!
//! The store is the single source of truth and the only synchronization point
//! between workers. Clock and IdGenerator exist so tests can pin time and ids.

pub mod clock;
pub mod id_generator;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::store::{Store, StoreError, Subscription};
