//! Append-only audit log.
//!
//! Every state change of a poll appends one entry. Sequence numbers
//! are strictly monotonic, timestamps never go backwards (a clock
//! step backwards reuses the previous timestamp), and readers only
//! ever see immutable views.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEvent {
    PollCreated,
    VoteCast,
    PollClosed,
    TallyComputed,
}

impl AuditEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEvent::PollCreated => "poll_created",
            AuditEvent::VoteCast => "vote_cast",
            AuditEvent::PollClosed => "poll_closed",
            AuditEvent::TallyComputed => "tally_computed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    pub actor_id: Vec<u8>,
    /// SHA-256 over an event-specific payload; the payload itself is
    /// not retained.
    pub payload_hash: [u8; 32],
}

#[derive(Debug, Default)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(&mut self, event: AuditEvent, actor_id: &[u8], payload: &[u8]) {
        let now = Utc::now();
        let timestamp = match self.entries.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        self.entries.push(AuditEntry {
            seq: self.entries.len() as u64,
            timestamp,
            event,
            actor_id: actor_id.to_vec(),
            payload_hash: Sha256::digest(payload).into(),
        });
    }

    /// Immutable view over the full log.
    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_strictly_monotonic() {
        let mut log = AuditLog::new();
        log.append(AuditEvent::PollCreated, b"authority", b"payload-1");
        log.append(AuditEvent::VoteCast, b"voter-1", b"payload-2");
        log.append(AuditEvent::PollClosed, b"authority", b"payload-3");

        let seqs: Vec<u64> = log.entries().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn timestamps_never_decrease() {
        let mut log = AuditLog::new();
        for i in 0..10u8 {
            log.append(AuditEvent::VoteCast, b"voter", &[i]);
        }
        for pair in log.entries().windows(2) {
            assert!(pair[1].timestamp >= pair[0].timestamp);
        }
    }

    #[test]
    fn payload_hash_distinguishes_payloads() {
        let mut log = AuditLog::new();
        log.append(AuditEvent::VoteCast, b"voter", b"ballot-a");
        log.append(AuditEvent::VoteCast, b"voter", b"ballot-b");
        let entries = log.entries();
        assert_ne!(entries[0].payload_hash, entries[1].payload_hash);
    }

    #[test]
    fn event_names_are_stable() {
        assert_eq!(AuditEvent::PollCreated.as_str(), "poll_created");
        assert_eq!(AuditEvent::VoteCast.as_str(), "vote_cast");
        assert_eq!(AuditEvent::PollClosed.as_str(), "poll_closed");
        assert_eq!(AuditEvent::TallyComputed.as_str(), "tally_computed");
    }
}
