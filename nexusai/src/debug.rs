//! Bounded store of request/response pairs keyed by request id, for the
//! debug panel. FIFO eviction past the capacity; entries merge on repeated
//! inserts for the same id.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value;

pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct DebugEntry {
    pub request: Option<Value>,
    pub response: Option<Value>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, DebugEntry>,
    order: VecDeque<String>,
}

pub struct DebugStore {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl Default for DebugStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DebugStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn record_request(&self, request_id: &str, request: Value) {
        self.merge(request_id, |entry| entry.request = Some(request));
    }

    pub fn record_response(&self, request_id: &str, response: Value) {
        self.merge(request_id, |entry| entry.response = Some(response));
    }

    pub fn get(&self, request_id: &str) -> Option<DebugEntry> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.get(request_id).cloned()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn merge(&self, request_id: &str, update: impl FnOnce(&mut DebugEntry)) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !inner.entries.contains_key(request_id) {
            inner.order.push_back(request_id.to_string());
            inner.entries.insert(request_id.to_string(), DebugEntry::default());
            if inner.order.len() > self.capacity {
                if let Some(oldest) = inner.order.pop_front() {
                    inner.entries.remove(&oldest);
                }
            }
        }
        if let Some(entry) = inner.entries.get_mut(request_id) {
            update(entry);
            entry.timestamp = Some(Utc::now());
        }
    }
}
