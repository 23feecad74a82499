//! Replicated log entries and the in-memory log.

use starling_core::{LogIndex, TermId};

use crate::message::Command;

/// A single entry in the replicated log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// The term when this entry was created.
    pub term: TermId,
    /// The log index of this entry.
    pub index: LogIndex,
    /// The client command carried by this entry.
    pub command: Command,
}

impl LogEntry {
    /// Creates a new log entry.
    #[must_use]
    pub const fn new(term: TermId, index: LogIndex, command: Command) -> Self {
        Self { term, index, command }
    }
}

/// In-memory replicated log.
///
/// Entries are contiguous and 1-indexed; `LogIndex(0)` is the sentinel
/// position before the first entry. Terms are non-decreasing along the
/// log, checked on every append.
#[derive(Debug, Default)]
pub struct RaftLog {
    entries: Vec<LogEntry>,
}

impl RaftLog {
    /// Creates a new empty log.
    #[must_use]
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Returns true if the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of entries in the log.
    #[must_use]
    pub fn len(&self) -> u64 {
        // Safe cast: entries.len() is bounded by system memory which is always < u64::MAX.
        #[allow(clippy::cast_possible_truncation)]
        let len = self.entries.len() as u64;
        len
    }

    /// Returns the last log index, or the sentinel 0 if empty.
    #[must_use]
    pub fn last_index(&self) -> LogIndex {
        LogIndex::new(self.len())
    }

    /// Returns the term of the last entry, or 0 if empty.
    #[must_use]
    pub fn last_term(&self) -> TermId {
        self.entries.last().map_or(TermId::new(0), |e| e.term)
    }

    /// Returns `(last_term, last_index)`, the pair compared during
    /// elections. An empty log is `(0, 0)`.
    #[must_use]
    pub fn last_log_info(&self) -> (TermId, LogIndex) {
        (self.last_term(), self.last_index())
    }

    /// Gets an entry by index.
    #[must_use]
    pub fn get(&self, index: LogIndex) -> Option<&LogEntry> {
        if index.get() == 0 {
            return None;
        }
        // Safe cast: index is bounded by entries.len() which fits in usize.
        #[allow(clippy::cast_possible_truncation)]
        let offset = (index.get() - 1) as usize;
        self.entries.get(offset)
    }

    /// Returns the term at a given index, or 0 if not found.
    #[must_use]
    pub fn term_at(&self, index: LogIndex) -> TermId {
        self.get(index).map_or(TermId::new(0), |e| e.term)
    }

    /// Appends an entry to the log.
    ///
    /// # Panics
    /// Panics if the entry index is not sequential or its term regresses.
    pub fn append(&mut self, entry: LogEntry) {
        let expected_index = self.last_index().get() + 1;
        assert_eq!(
            entry.index.get(),
            expected_index,
            "log entry index must be sequential: expected {}, got {}",
            expected_index,
            entry.index.get()
        );
        assert!(
            entry.term >= self.last_term(),
            "log entry term must be non-decreasing: last {}, got {}",
            self.last_term(),
            entry.term
        );

        self.entries.push(entry);
    }

    /// Truncates the log after the given index.
    ///
    /// Keeps entries up to and including `last_to_keep`; `LogIndex(0)`
    /// clears the log.
    pub fn truncate_after(&mut self, last_to_keep: LogIndex) {
        // Safe cast: keep_count is bounded by entries.len() which fits in usize.
        #[allow(clippy::cast_possible_truncation)]
        let keep_count = last_to_keep.get() as usize;
        if keep_count < self.entries.len() {
            self.entries.truncate(keep_count);
        }
    }

    /// Returns clones of the entries from `start_index` to the end.
    #[must_use]
    pub fn entries_from(&self, start_index: LogIndex) -> Vec<LogEntry> {
        if start_index.get() == 0 || start_index.get() > self.last_index().get() {
            return Vec::new();
        }
        // Safe cast: start is bounded by entries.len() which fits in usize.
        #[allow(clippy::cast_possible_truncation)]
        let start = (start_index.get() - 1) as usize;
        self.entries[start..].to_vec()
    }

    /// Checks whether a candidate's last log position is at least as
    /// up-to-date as ours, compared lexicographically by term then index.
    ///
    /// Used in leader election to determine whether to record a lazy vote.
    #[must_use]
    pub fn candidate_up_to_date(&self, other_term: TermId, other_index: LogIndex) -> bool {
        (other_term, other_index) >= self.last_log_info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use starling_core::ClientId;
    use starling_crypto::Signature;

    use crate::client::RequestId;

    fn make_command(tag: u8) -> Command {
        Command {
            entry: Bytes::from(vec![tag]),
            client_id: ClientId::new(1),
            request_id: RequestId::new(ClientId::new(1), u64::from(tag)),
            signature: Signature::from_bytes([tag; 64]),
        }
    }

    fn make_entry(term: u64, index: u64) -> LogEntry {
        // Safe cast: test indices stay tiny.
        #[allow(clippy::cast_possible_truncation)]
        let tag = index as u8;
        LogEntry::new(TermId::new(term), LogIndex::new(index), make_command(tag))
    }

    #[test]
    fn test_empty_log() {
        let log = RaftLog::new();

        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
        assert_eq!(log.last_index().get(), 0);
        assert_eq!(log.last_term().get(), 0);
        assert_eq!(log.last_log_info(), (TermId::new(0), LogIndex::new(0)));
        assert!(log.get(LogIndex::new(1)).is_none());
    }

    #[test]
    fn test_append_and_get() {
        let mut log = RaftLog::new();

        log.append(make_entry(1, 1));
        log.append(make_entry(1, 2));
        log.append(make_entry(2, 3));

        assert_eq!(log.len(), 3);
        assert_eq!(log.last_index().get(), 3);
        assert_eq!(log.last_term().get(), 2);

        assert_eq!(log.get(LogIndex::new(1)).unwrap().term.get(), 1);
        assert_eq!(log.get(LogIndex::new(3)).unwrap().term.get(), 2);
        assert!(log.get(LogIndex::new(4)).is_none());
        assert!(log.get(LogIndex::new(0)).is_none());
    }

    #[test]
    #[should_panic(expected = "log entry index must be sequential")]
    fn test_append_gap_panics() {
        let mut log = RaftLog::new();
        log.append(make_entry(1, 2));
    }

    #[test]
    #[should_panic(expected = "log entry term must be non-decreasing")]
    fn test_append_term_regression_panics() {
        let mut log = RaftLog::new();
        log.append(make_entry(2, 1));
        log.append(make_entry(1, 2));
    }

    #[test]
    fn test_truncate() {
        let mut log = RaftLog::new();

        log.append(make_entry(1, 1));
        log.append(make_entry(1, 2));
        log.append(make_entry(2, 3));

        log.truncate_after(LogIndex::new(1));

        assert_eq!(log.len(), 1);
        assert_eq!(log.last_index().get(), 1);

        log.truncate_after(LogIndex::new(0));
        assert!(log.is_empty());
    }

    #[test]
    fn test_entries_from() {
        let mut log = RaftLog::new();
        log.append(make_entry(1, 1));
        log.append(make_entry(1, 2));
        log.append(make_entry(2, 3));

        let entries = log.entries_from(LogIndex::new(2));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].index.get(), 2);
        assert_eq!(entries[1].index.get(), 3);

        assert!(log.entries_from(LogIndex::new(4)).is_empty());
    }

    #[test]
    fn test_candidate_up_to_date() {
        let mut log = RaftLog::new();
        log.append(make_entry(1, 1));
        log.append(make_entry(2, 2));

        // Our log: term=2, index=2

        // Higher term always wins.
        assert!(log.candidate_up_to_date(TermId::new(3), LogIndex::new(1)));

        // Same term, longer log wins.
        assert!(log.candidate_up_to_date(TermId::new(2), LogIndex::new(3)));

        // Same term and index - ties are acceptable.
        assert!(log.candidate_up_to_date(TermId::new(2), LogIndex::new(2)));

        // Same term, shorter log loses.
        assert!(!log.candidate_up_to_date(TermId::new(2), LogIndex::new(1)));

        // Lower term loses regardless of length.
        assert!(!log.candidate_up_to_date(TermId::new(1), LogIndex::new(5)));
    }
}
