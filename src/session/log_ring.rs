// Log Ring
//
// Fixed-capacity, append-only log buffer addressed by sequence numbers.
// Sequence numbers grow forever, so a reader's cursor stays meaningful after
// eviction: a cursor that points below the oldest retained entry gets a gap
// report instead of silently shifted data.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub timestamp_ms: u64,
    pub line: String,
}

/// Entries the reader missed because they were evicted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogGap {
    pub requested: u64,
    pub resumed_at: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPage {
    pub lines: Vec<LogEntry>,
    pub next_cursor: u64,
    pub has_more: bool,
    pub gap: Option<LogGap>,
}

#[derive(Debug, Clone)]
pub struct LogRing {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    next_seq: u64,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_seq: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sequence number of the oldest retained entry
    pub fn first_seq(&self) -> u64 {
        self.next_seq - self.entries.len() as u64
    }

    /// Cursor value that reads nothing until new lines arrive
    pub fn end_cursor(&self) -> u64 {
        self.next_seq
    }

    /// Append a line, evicting the oldest at capacity. Returns its sequence number.
    pub fn append(&mut self, timestamp_ms: u64, line: String) -> u64 {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        let seq = self.next_seq;
        self.entries.push_back(LogEntry {
            seq,
            timestamp_ms,
            line,
        });
        self.next_seq += 1;
        seq
    }

    /// Read up to `limit` entries starting at `cursor`
    pub fn read(&self, cursor: u64, limit: usize) -> LogPage {
        let first = self.first_seq();
        let (start, gap) = if cursor < first {
            (
                first,
                Some(LogGap {
                    requested: cursor,
                    resumed_at: first,
                    dropped: first - cursor,
                }),
            )
        } else {
            (cursor.min(self.next_seq), None)
        };

        let offset = (start - first) as usize;
        let lines: Vec<LogEntry> = self
            .entries
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        let next_cursor = start + lines.len() as u64;

        LogPage {
            lines,
            next_cursor,
            has_more: next_cursor < self.next_seq,
            gap,
        }
    }

    /// Last `n` lines, oldest first
    pub fn tail(&self, n: usize) -> Vec<String> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).map(|e| e.line.clone()).collect()
    }
}
