//! Rate limiting logic and state management.

mod clock;
mod decider;
mod identity;
mod policy;
mod store;
mod sweeper;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use decider::{Decision, RateDecider};
pub use identity::ClientIdentity;
pub use policy::{Policy, TimeUnit};
pub use store::{MemoryWindowStore, StorageError, WindowStore};
pub use sweeper::spawn_sweeper;
