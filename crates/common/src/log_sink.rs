use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::wire::log_record_len;
use crate::{truncate_utf8, LogRecord, MAX_LOG_MESSAGE_LEN};

/// Fixed-capacity ring of log records, drained oldest first by every status query.
///
/// Clones share the same buffer. Pushing past capacity evicts the oldest
/// record. Messages longer than [`MAX_LOG_MESSAGE_LEN`] bytes are cut short.
#[derive(Clone, Debug)]
pub struct LogSink {
    records: Arc<Mutex<VecDeque<LogRecord>>>,
    capacity: usize,
}

impl LogSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LogRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, mut record: LogRecord) {
        if self.capacity == 0 {
            return;
        }
        truncate_utf8(&mut record.message, MAX_LOG_MESSAGE_LEN);
        let mut records = self.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Takes the oldest records whose encoded size fits in `budget` bytes.
    /// Whatever does not fit stays for the next call.
    pub fn drain_within(&self, budget: usize) -> Vec<LogRecord> {
        let mut records = self.lock();
        let mut used = 0;
        let mut taken = 0;
        for record in records.iter() {
            let len = log_record_len(record);
            if used + len > budget {
                break;
            }
            used += len;
            taken += 1;
        }
        records.drain(..taken).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Severity;
    use proptest::prelude::*;

    fn record(i: usize) -> LogRecord {
        LogRecord::new(Severity::Info, format!("record {i}"))
    }

    #[test]
    fn drain_empties_the_sink() {
        let sink = LogSink::new(4);
        sink.push(record(0));
        sink.push(record(1));
        assert_eq!(sink.drain_within(usize::MAX), vec![record(0), record(1)]);
        assert!(sink.is_empty());
        assert!(sink.drain_within(usize::MAX).is_empty());
    }

    #[test]
    fn clones_share_one_buffer() {
        let sink = LogSink::new(4);
        let writer = sink.clone();
        std::thread::spawn(move || writer.push(record(7)))
            .join()
            .unwrap();
        assert_eq!(sink.drain_within(usize::MAX), vec![record(7)]);
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let sink = LogSink::new(0);
        sink.push(record(0));
        assert!(sink.is_empty());
    }

    #[test]
    fn long_messages_are_cut() {
        let sink = LogSink::new(2);
        sink.push(LogRecord::new(Severity::Error, "e".repeat(MAX_LOG_MESSAGE_LEN * 3)));
        assert_eq!(sink.drain_within(usize::MAX)[0].message.len(), MAX_LOG_MESSAGE_LEN);
    }

    #[test]
    fn budgeted_drain_leaves_the_rest() {
        let sink = LogSink::new(8);
        for i in 0..5 {
            sink.push(record(i));
        }
        let per_record = log_record_len(&record(0));
        let first = sink.drain_within(per_record * 2 + 1);
        assert_eq!(first, vec![record(0), record(1)]);
        assert_eq!(sink.len(), 3);
        assert_eq!(sink.drain_within(usize::MAX), vec![record(2), record(3), record(4)]);
        assert!(sink.is_empty());
    }

    proptest! {
        #[test]
        fn retains_most_recent_in_push_order(capacity in 1usize..64, extra in 0usize..64) {
            let sink = LogSink::new(capacity);
            let total = capacity + extra;
            for i in 0..total {
                sink.push(record(i));
            }
            prop_assert_eq!(sink.len(), capacity);
            let expected: Vec<_> = (extra..total).map(record).collect();
            prop_assert_eq!(sink.drain_within(usize::MAX), expected);
        }
    }
}
