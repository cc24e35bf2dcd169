use std::fmt;

/// Progress of one snapshot application. Stages are passed strictly in
/// declaration order; from `Ingested` on the engine holds the snapshot and
/// any failure is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SnapshotApplyStage {
    Received,
    UnreplicatedStateStaged,
    SubsumedDiskCleared,
    Ingested,
    InMemoryUpdated,
    Asserted,
    Done,
}

impl SnapshotApplyStage {
    pub fn next(self) -> Option<Self> {
        use SnapshotApplyStage::*;
        match self {
            Received => Some(UnreplicatedStateStaged),
            UnreplicatedStateStaged => Some(SubsumedDiskCleared),
            SubsumedDiskCleared => Some(Ingested),
            Ingested => Some(InMemoryUpdated),
            InMemoryUpdated => Some(Asserted),
            Asserted => Some(Done),
            Done => None,
        }
    }

    /// Moves to `next`, which must directly follow the current stage.
    pub fn advance(
        &mut self,
        next: SnapshotApplyStage,
    ) {
        assert_eq!(
            self.next(),
            Some(next),
            "snapshot application cannot move from {self} to {next}"
        );
        *self = next;
    }

    /// True once the snapshot is durable.
    pub fn is_durable(self) -> bool {
        self >= SnapshotApplyStage::Ingested
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotApplyStage::Received => "received",
            SnapshotApplyStage::UnreplicatedStateStaged => "unreplicated state staged",
            SnapshotApplyStage::SubsumedDiskCleared => "subsumed disk data cleared",
            SnapshotApplyStage::Ingested => "ingested",
            SnapshotApplyStage::InMemoryUpdated => "in-memory state updated",
            SnapshotApplyStage::Asserted => "state asserted",
            SnapshotApplyStage::Done => "done",
        }
    }
}

impl fmt::Display for SnapshotApplyStage {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
