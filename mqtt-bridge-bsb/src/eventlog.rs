//! Bounded, filtered in-memory telegram history.

use std::collections::VecDeque;
use std::sync::Arc;

use bsb_common::Telegram;
use parking_lot::Mutex;

use crate::filter::{FilterKind, FilterSpec, TelegramFilter};

/// Ring buffer of telegrams with FIFO eviction.
///
/// `push` and `snapshot` each hold the buffer lock for their whole duration,
/// so a reader never sees a half-applied append.
#[derive(Debug)]
pub struct FilterBuffer {
    items: Mutex<VecDeque<Arc<Telegram>>>,
    capacity: usize,
}

impl FilterBuffer {
    /// Create an empty buffer. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Append a telegram, evicting the oldest entry when full.
    pub fn push(&self, telegram: Arc<Telegram>) {
        let mut items = self.items.lock();
        while items.len() >= self.capacity {
            items.pop_front();
        }
        items.push_back(telegram);
    }

    /// Copy of the current content, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<Telegram>> {
        self.items.lock().iter().cloned().collect()
    }

    /// Number of retained telegrams.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum retained telegrams.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

struct NamedBuffer {
    name: String,
    kind: FilterKind,
    buffer: FilterBuffer,
}

/// Selection of buffers and telegram names for a log query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    /// Buffers to return; `None` selects every buffer.
    pub logs: Option<Vec<String>>,
    /// Only telegrams with one of these names; empty means no restriction.
    pub include: Vec<String>,
    /// Telegrams with these names are left out.
    pub exclude: Vec<String>,
}

impl LogQuery {
    fn selects_buffer(&self, name: &str) -> bool {
        self.logs
            .as_ref()
            .is_none_or(|logs| logs.iter().any(|l| l == name))
    }

    fn selects_telegram(&self, telegram: &Telegram) -> bool {
        (self.include.is_empty() || self.include.contains(&telegram.name))
            && !self.exclude.contains(&telegram.name)
    }
}

/// All event log buffers together with their filters.
pub struct EventLogStore {
    filter: TelegramFilter,
    buffers: Vec<NamedBuffer>,
}

impl EventLogStore {
    /// Create the store from buffer definitions.
    pub fn new(filter: TelegramFilter, specs: &[FilterSpec]) -> Self {
        let buffers = specs
            .iter()
            .map(|spec| NamedBuffer {
                name: spec.name.clone(),
                kind: spec.kind,
                buffer: FilterBuffer::new(spec.capacity),
            })
            .collect();

        Self { filter, buffers }
    }

    /// Offer a telegram to every buffer whose filter accepts it.
    pub fn record(&self, telegram: &Telegram) {
        let mut shared: Option<Arc<Telegram>> = None;

        for named in &self.buffers {
            if self.filter.matches(named.kind, telegram) {
                let telegram = shared
                    .get_or_insert_with(|| Arc::new(telegram.clone()))
                    .clone();
                named.buffer.push(telegram);
            }
        }
    }

    /// Current content of one buffer.
    pub fn snapshot(&self, name: &str) -> Option<Vec<Arc<Telegram>>> {
        self.buffers
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.buffer.snapshot())
    }

    /// Run a log query, rendering each telegram as a text line.
    ///
    /// Requested buffer names that do not exist are skipped.
    pub fn query(&self, query: &LogQuery) -> Vec<(String, Vec<String>)> {
        self.buffers
            .iter()
            .filter(|b| query.selects_buffer(&b.name))
            .map(|b| {
                let lines = b
                    .buffer
                    .snapshot()
                    .iter()
                    .filter(|t| query.selects_telegram(t))
                    .map(|t| t.to_string())
                    .collect();
                (b.name.clone(), lines)
            })
            .collect()
    }
}
