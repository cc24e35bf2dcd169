//! Snapshot lifecycle: generation on the sender, staging, and atomic
//! application on the receiver.

mod incoming;
mod outgoing;
mod stage;
mod staging;
mod subsumed;

#[cfg(test)]
mod incoming_test;

pub use incoming::*;
pub use outgoing::*;
pub use stage::*;
pub use staging::*;
