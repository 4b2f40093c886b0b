//! Outcome of every command packet a unit has processed.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CommandStatus {
    Ok = 0,
    FailedToPingDestination = 1,
    CommandError = 2,
}

impl CommandStatus {
    pub fn is_failure(self) -> bool {
        self != CommandStatus::Ok
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub sequence_number: u16,
    pub status: CommandStatus,
    pub details: String,
}

#[derive(Debug, Default)]
pub struct CommandLogger {
    history: Vec<CommandRecord>,
}

impl CommandLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sequence_number: u16, status: CommandStatus, details: impl Into<String>) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        self.history.push(CommandRecord {
            timestamp,
            sequence_number,
            status,
            details: details.into(),
        });
    }

    pub fn latest(&self) -> Option<&CommandRecord> {
        self.history.last()
    }

    /// Record with the highest sequence number; the earliest one on ties.
    pub fn highest_sequence(&self) -> Option<&CommandRecord> {
        self.history
            .iter()
            .rev()
            .max_by_key(|r| r.sequence_number)
    }

    pub fn last_failed(&self) -> Option<&CommandRecord> {
        self.history.iter().rev().find(|r| r.status.is_failure())
    }

    /// Highest sequence number never seen between the lowest and highest
    /// received, i.e. the most recent command lost on the way up.
    pub fn last_sequence_skip(&self) -> Option<u16> {
        let mut seen: Vec<u16> = self.history.iter().map(|r| r.sequence_number).collect();
        seen.sort_unstable();
        seen.dedup();
        seen.windows(2)
            .rev()
            .find(|pair| pair[1] - pair[0] > 1)
            .map(|pair| pair[1] - 1)
    }

    pub fn total(&self) -> usize {
        self.history.len()
    }

    pub fn history(&self) -> &[CommandRecord] {
        &self.history
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_on_empty_log() {
        let log = CommandLogger::new();
        assert!(log.latest().is_none());
        assert!(log.highest_sequence().is_none());
        assert!(log.last_failed().is_none());
        assert!(log.last_sequence_skip().is_none());
        assert_eq!(log.total(), 0);
    }

    #[test]
    fn queries_track_history() {
        let mut log = CommandLogger::new();
        log.add(1, CommandStatus::Ok, "");
        log.add(2, CommandStatus::FailedToPingDestination, "unit 3 did not answer");
        log.add(5, CommandStatus::Ok, "");
        log.add(4, CommandStatus::CommandError, "bad argument");
        log.add(3, CommandStatus::Ok, "");

        assert_eq!(log.latest().unwrap().sequence_number, 3);
        assert_eq!(log.highest_sequence().unwrap().sequence_number, 5);
        let failed = log.last_failed().unwrap();
        assert_eq!(failed.sequence_number, 4);
        assert_eq!(failed.status, CommandStatus::CommandError);
        assert!(log.last_sequence_skip().is_none());
        assert_eq!(log.total(), 5);

        log.add(9, CommandStatus::Ok, "");
        log.add(12, CommandStatus::Ok, "");
        assert_eq!(log.last_sequence_skip(), Some(11));
    }

    #[test]
    fn history_serializes() {
        let mut log = CommandLogger::new();
        log.add(7, CommandStatus::FailedToPingDestination, "x");
        let json = log.to_json().unwrap();
        let back: Vec<CommandRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, log.history());
        assert!(json.contains("failed_to_ping_destination"));
    }
}
