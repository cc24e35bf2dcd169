use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

/// A single consensus log entry.
///
/// A sideloaded entry keeps its bulk payload in side storage. On disk it is
/// stored "thin" (empty `data`); readers inline the payload on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub index: u64,
    pub term: u64,
    pub data: Bytes,
    pub sideloaded: bool,
}

impl Entry {
    /// Fixed per-entry accounting overhead (index, term, flag and framing).
    pub const ENCODING_OVERHEAD: u64 = 25;

    pub fn new(
        index: u64,
        term: u64,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            index,
            term,
            data: data.into(),
            sideloaded: false,
        }
    }

    pub fn new_sideloaded(
        index: u64,
        term: u64,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            index,
            term,
            data: data.into(),
            sideloaded: true,
        }
    }

    /// Size accounted against byte budgets (entry cache, `entries()`).
    #[inline]
    pub fn size(&self) -> u64 {
        Self::ENCODING_OVERHEAD + self.data.len() as u64
    }

    /// Sideloaded with the payload still in side storage.
    #[inline]
    pub fn is_thin(&self) -> bool {
        self.sideloaded && self.data.is_empty()
    }

    /// Copy of this entry with the payload removed, as written to the log.
    pub fn to_thin(&self) -> Self {
        Self {
            index: self.index,
            term: self.term,
            data: Bytes::new(),
            sideloaded: self.sideloaded,
        }
    }
}
