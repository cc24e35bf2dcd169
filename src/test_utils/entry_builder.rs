use crate::Entry;

/// Builds consecutive log entries.
pub struct EntryBuilder {
    index: u64,
    term: u64,
}

impl EntryBuilder {
    pub fn new(
        start_index: u64,
        term: u64,
    ) -> Self {
        Self {
            index: start_index,
            term,
        }
    }

    pub fn command(
        mut self,
        data: &[u8],
    ) -> (Self, Entry) {
        let entry = Entry::new(self.index, self.term, data.to_vec());
        self.index += 1;
        (self, entry)
    }

    pub fn sideloaded(
        mut self,
        data: &[u8],
    ) -> (Self, Entry) {
        let entry = Entry::new_sideloaded(self.index, self.term, data.to_vec());
        self.index += 1;
        (self, entry)
    }

    /// Entries `[lo, hi)` with `payload_len` bytes of payload each.
    pub fn batch(
        lo: u64,
        hi: u64,
        term: u64,
        payload_len: usize,
    ) -> Vec<Entry> {
        (lo..hi)
            .map(|i| Entry::new(i, term, vec![(i % 251) as u8; payload_len]))
            .collect()
    }
}
