//! Lock ranking for the replica storage layer.
//!
//! Locks are acquired in rank order:
//! `RaftMu → ReadOnlyCmdMu → StoreMu → ReplicaMu`. Several `RaftMu`s may be
//! held together (snapshot application holds the log lock of every
//! subsumed replica); they must be acquired in ascending range id order,
//! which the store enforces.
//!
//! Guards are released in the reverse order of acquisition, with one named
//! exception: [`release_store_mu_first`], used at the end of the replica
//! swap during snapshot application. Nothing reacquires the store lock while
//! holding a replica lock, so releasing the store lock early cannot deadlock.
//!
//! Checks run in debug builds only; a violation panics.

use std::ops::Deref;
use std::ops::DerefMut;

#[cfg(debug_assertions)]
use std::cell::RefCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockRank {
    /// Per-range log lock
    RaftMu = 1,
    /// Blocks new read-only commands on a replica
    ReadOnlyCmdMu = 2,
    /// Store-wide replica directory
    StoreMu = 3,
    /// Per-replica in-memory state
    ReplicaMu = 4,
}

impl LockRank {
    fn allows_peers(&self) -> bool {
        matches!(self, LockRank::RaftMu)
    }
}

#[cfg(debug_assertions)]
thread_local! {
    static HELD: RefCell<Vec<LockRank>> = const { RefCell::new(Vec::new()) };
}

/// Locks ranked as held by the current thread, in acquisition order.
pub fn held_locks() -> Vec<LockRank> {
    #[cfg(debug_assertions)]
    {
        HELD.with(|held| held.borrow().clone())
    }
    #[cfg(not(debug_assertions))]
    {
        Vec::new()
    }
}

#[derive(Debug)]
struct RankToken {
    rank: LockRank,
    out_of_order: bool,
}

impl RankToken {
    fn acquire(rank: LockRank) -> Self {
        #[cfg(debug_assertions)]
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(&top) = held.iter().max() {
                if top > rank || (top == rank && !rank.allows_peers()) {
                    panic!("lock order violation: acquiring {rank:?} while holding {held:?}");
                }
            }
            held.push(rank);
        });
        Self {
            rank,
            out_of_order: false,
        }
    }
}

impl Drop for RankToken {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            let Some(pos) = held.iter().rposition(|r| *r == self.rank) else {
                return;
            };
            let later_ranks_differ = held[pos + 1..].iter().any(|r| *r != self.rank);
            held.remove(pos);
            if later_ranks_differ && !self.out_of_order && !std::thread::panicking() {
                panic!(
                    "lock order violation: releasing {:?} before later locks {:?}",
                    self.rank, held
                );
            }
        });
        #[cfg(not(debug_assertions))]
        let _ = (self.rank, self.out_of_order);
    }
}

/// A lock guard tagged with its rank.
#[derive(Debug)]
pub struct RankedGuard<G> {
    guard: G,
    token: RankToken,
}

impl<G> RankedGuard<G> {
    /// Ranks `guard`. Must be called right after the lock was taken, and
    /// before the guard escapes to callers.
    pub(crate) fn new(
        rank: LockRank,
        acquire: impl FnOnce() -> G,
    ) -> Self {
        let token = RankToken::acquire(rank);
        Self {
            guard: acquire(),
            token,
        }
    }

    pub fn rank(&self) -> LockRank {
        self.token.rank
    }
}

impl<G: Deref> Deref for RankedGuard<G> {
    type Target = G::Target;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<G: DerefMut> DerefMut for RankedGuard<G> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

/// Releases the store lock while keeping the replica lock that was taken
/// after it.
pub fn release_store_mu_first<S, R>(
    mut store_mu: RankedGuard<S>,
    replica_mu: RankedGuard<R>,
) -> RankedGuard<R> {
    debug_assert_eq!(store_mu.rank(), LockRank::StoreMu);
    debug_assert_eq!(replica_mu.rank(), LockRank::ReplicaMu);
    store_mu.token.out_of_order = true;
    drop(store_mu);
    replica_mu
}
