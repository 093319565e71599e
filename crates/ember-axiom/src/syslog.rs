//! Audit trail
//!
//! A bounded ring of [`SysEvent`]s. Syscalls are recorded as a call/result
//! pair sharing the call's id; the kernel adds lifecycle events it drives
//! on its own. Pid 0 stands for the idle context.

use alloc::collections::VecDeque;
use alloc::string::String;
use serde::{Deserialize, Serialize};

use crate::types::{EventId, ProcessId};

/// Events kept before the oldest are dropped
pub const MAX_SYSLOG_EVENTS: usize = 10_000;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SysEvent {
    pub id: EventId,
    /// Task the event concerns (0 = idle context)
    pub sender: ProcessId,
    /// Nanoseconds since boot
    pub timestamp: u64,
    pub event_type: SysEventType,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SysEventType {
    /// A task trapped with `int 0x80`
    Request {
        syscall_num: u32,
        /// ebx, ecx, edx
        args: [u32; 3],
    },
    /// The value a call returned in eax
    Response {
        /// Id of the matching `Request`
        request_id: EventId,
        result: i64,
    },
    Spawned {
        /// `None` for a task started from the idle context
        parent: Option<ProcessId>,
        terminal: u32,
        name: String,
    },
    Exited {
        /// Status handed to the parent (256 = killed by a signal)
        status: u32,
    },
    /// The scheduler moved the CPU to `to`
    Switched { to: ProcessId },
    /// A handler frame was spliced onto the task's stack
    SignalDelivered { signal: u8 },
    /// A CPU exception, by name
    Fault { name: String },
}

impl SysEventType {
    /// True for the two halves of a syscall record.
    pub fn is_syscall(&self) -> bool {
        matches!(
            self,
            SysEventType::Request { .. } | SysEventType::Response { .. }
        )
    }
}

/// Append-only event ring with monotonic ids.
#[derive(Clone, Debug)]
pub struct SysLog {
    ring: VecDeque<SysEvent>,
    capacity: usize,
    next_id: EventId,
    dropped: u64,
}

impl SysLog {
    pub fn new() -> Self {
        Self::with_capacity(MAX_SYSLOG_EVENTS)
    }

    /// A log that keeps at most `capacity` events (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: VecDeque::new(),
            capacity: capacity.max(1),
            next_id: 0,
            dropped: 0,
        }
    }

    /// Record a syscall entry. The returned id pairs it with its result.
    pub fn record_call(
        &mut self,
        sender: ProcessId,
        syscall_num: u32,
        args: [u32; 3],
        timestamp: u64,
    ) -> EventId {
        self.record(sender, SysEventType::Request { syscall_num, args }, timestamp)
    }

    pub fn record_result(
        &mut self,
        sender: ProcessId,
        request_id: EventId,
        result: i64,
        timestamp: u64,
    ) -> EventId {
        self.record(sender, SysEventType::Response { request_id, result }, timestamp)
    }

    pub fn record(&mut self, sender: ProcessId, event_type: SysEventType, timestamp: u64) -> EventId {
        let id = self.next_id;
        self.next_id += 1;
        if self.ring.len() == self.capacity {
            self.ring.pop_front();
            self.dropped += 1;
        }
        self.ring.push_back(SysEvent {
            id,
            sender,
            timestamp,
            event_type,
        });
        id
    }

    /// Retained events, oldest first.
    pub fn events(&self) -> &VecDeque<SysEvent> {
        &self.ring
    }

    pub fn last(&self) -> Option<&SysEvent> {
        self.ring.back()
    }

    /// Retained events whose sender is `pid`, oldest first.
    pub fn by_sender(&self, pid: ProcessId) -> impl Iterator<Item = &SysEvent> + '_ {
        self.ring.iter().filter(move |e| e.sender == pid)
    }

    /// The result recorded for call `request_id`, if it is still retained.
    pub fn result_of(&self, request_id: EventId) -> Option<i64> {
        self.ring.iter().find_map(|e| match e.event_type {
            SysEventType::Response { request_id: r, result } if r == request_id => Some(result),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Events evicted to stay within capacity.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn next_id(&self) -> EventId {
        self.next_id
    }
}

impl Default for SysLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn test_call_and_result_share_id() {
        let mut log = SysLog::new();
        let call = log.record_call(1, 3, [0, 0x0830_0000, 128], 1000);
        log.record_result(1, call, 6, 1100);

        assert_eq!(call, 0);
        assert_eq!(log.result_of(call), Some(6));
        assert_eq!(log.result_of(7), None);
        assert!(log.events().iter().all(|e| e.event_type.is_syscall()));
    }

    #[test]
    fn test_by_sender_filters_lifecycle() {
        let mut log = SysLog::new();
        log.record(
            1,
            SysEventType::Spawned {
                parent: None,
                terminal: 0,
                name: "shell".into(),
            },
            10,
        );
        log.record(2, SysEventType::Switched { to: 2 }, 20);
        log.record(1, SysEventType::Exited { status: 256 }, 30);

        let mine: Vec<_> = log.by_sender(1).collect();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[1].event_type, SysEventType::Exited { status: 256 });
        assert_eq!(log.last().map(|e| e.id), Some(2));
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let mut log = SysLog::with_capacity(4);
        for i in 0..6 {
            log.record(0, SysEventType::Switched { to: i }, 0);
        }
        assert_eq!(log.len(), 4);
        assert_eq!(log.dropped(), 2);
        assert_eq!(log.events().front().map(|e| e.id), Some(2));
        assert_eq!(log.next_id(), 6);
    }

    #[test]
    fn test_default_capacity() {
        let mut log = SysLog::default();
        for _ in 0..MAX_SYSLOG_EVENTS + 5 {
            log.record(0, SysEventType::Switched { to: 1 }, 0);
        }
        assert_eq!(log.len(), MAX_SYSLOG_EVENTS);
        assert_eq!(log.dropped(), 5);
    }

    #[test]
    fn test_events_round_trip_through_json() {
        let mut log = SysLog::new();
        log.record(
            3,
            SysEventType::Fault {
                name: "page fault".into(),
            },
            42,
        );
        let json = serde_json::to_string(log.events()).unwrap();
        assert!(json.contains("\"Fault\""));
        let back: VecDeque<SysEvent> = serde_json::from_str(&json).unwrap();
        assert_eq!(&back, log.events());
    }
}
