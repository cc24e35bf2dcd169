mod config;
mod constants;
mod errors;
mod keys;
mod metrics;
mod replica;
mod snapshot;
mod storage;
mod store;
mod types;
pub mod utils;

pub use config::*;
pub use constants::*;
pub use errors::*;
pub use keys::*;
pub use metrics::*;
pub use replica::*;
pub use snapshot::*;
pub use storage::*;
pub use store::*;
pub use types::*;
pub use utils::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;

//-----------------------------------------------------------
// Autometrics
/// autometrics: https://docs.autometrics.dev/rust/adding-alerts-and-slos
use autometrics::objectives::Objective;
use autometrics::objectives::ObjectiveLatency;
use autometrics::objectives::ObjectivePercentile;
const API_SLO: Objective = Objective::new("api")
    .success_rate(ObjectivePercentile::P99_9)
    .latency(ObjectiveLatency::Ms10, ObjectivePercentile::P99);

//-----------------------------------------------------------
// Identifiers

/// Identifies a range (a contiguous partition of the key space).
pub type RangeId = u64;
/// Identifies one replica of a range within the range's replica set.
pub type ReplicaId = u64;
pub type StoreId = u32;
pub type NodeId = u32;
