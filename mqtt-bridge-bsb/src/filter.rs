//! Telegram filters feeding the event log buffers.
//!
//! Four kinds compose on each other:
//! - `all`: everything except our own queries
//! - `nol`: `all` minus answers addressed to us
//! - `inf`: info telegrams not on the denylist
//! - `unk`: `inf` minus payloads known to be benign

use std::collections::{HashMap, HashSet};

use bsb_common::{CommandKind, Telegram};
use serde::{Deserialize, Serialize};

/// Filter kind of an event log buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    /// All traffic except the controller's own queries.
    All,
    /// `all` without answers to the controller.
    Nol,
    /// Info telegrams minus the denylist.
    Inf,
    /// Info telegrams with unexpected payloads.
    Unk,
}

/// One event log buffer definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Buffer name used in queries.
    pub name: String,
    /// Predicate kind.
    pub kind: FilterKind,
    /// Maximum retained telegrams.
    pub capacity: usize,
}

impl FilterSpec {
    /// Create a filter definition.
    pub fn new(name: impl Into<String>, kind: FilterKind, capacity: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            capacity,
        }
    }
}

/// Default buffer set.
pub fn default_filters() -> Vec<FilterSpec> {
    vec![
        FilterSpec::new("all", FilterKind::All, 300),
        FilterSpec::new("inf", FilterKind::Inf, 3000),
        FilterSpec::new("unk", FilterKind::Unk, 3000),
        FilterSpec::new("nol", FilterKind::Nol, 3000),
    ]
}

/// Info telegram names too chatty for the `inf` buffer.
pub fn default_info_denylist() -> Vec<String> {
    ["room1_temp_status", "datetime", "hc2_status", "hc3_status"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Payloads seen routinely, per telegram name.
pub fn default_benign_payloads() -> HashMap<String, Vec<Vec<u8>>> {
    let mut benign = HashMap::new();
    benign.insert(
        "status_msg1".to_string(),
        [0x00u8, 0x04, 0x14]
            .iter()
            .map(|&x| vec![x, 0x00, 0x00, 0x59])
            .collect(),
    );
    benign.insert(
        "hot_water_status".to_string(),
        vec![vec![0x00, 0x45], vec![0x00, 0x4d]],
    );
    benign.insert(
        "hc1_status".to_string(),
        vec![vec![0x00, 0x45], vec![0x00, 0x4d]],
    );
    benign
}

/// Compiled predicate set shared by every buffer.
#[derive(Debug, Clone)]
pub struct TelegramFilter {
    own_address: u8,
    denylist: HashSet<String>,
    benign: HashMap<String, HashSet<Vec<u8>>>,
}

impl TelegramFilter {
    /// Compile the predicates.
    pub fn new(
        own_address: u8,
        denylist: &[String],
        benign: &HashMap<String, Vec<Vec<u8>>>,
    ) -> Self {
        Self {
            own_address,
            denylist: denylist.iter().cloned().collect(),
            benign: benign
                .iter()
                .map(|(name, payloads)| (name.clone(), payloads.iter().cloned().collect()))
                .collect(),
        }
    }

    /// Check whether a telegram belongs in a buffer of this kind.
    pub fn matches(&self, kind: FilterKind, telegram: &Telegram) -> bool {
        match kind {
            FilterKind::All => self.is_not_own_query(telegram),
            FilterKind::Nol => self.is_not_own_query(telegram) && !self.is_answer_to_us(telegram),
            FilterKind::Inf => self.is_interesting_info(telegram),
            FilterKind::Unk => self.is_interesting_info(telegram) && !self.is_benign(telegram),
        }
    }

    fn is_not_own_query(&self, telegram: &Telegram) -> bool {
        !(telegram.command == CommandKind::Query && telegram.source == self.own_address)
    }

    fn is_answer_to_us(&self, telegram: &Telegram) -> bool {
        telegram.command == CommandKind::Answer && telegram.destination == self.own_address
    }

    fn is_interesting_info(&self, telegram: &Telegram) -> bool {
        telegram.command == CommandKind::Info && !self.denylist.contains(&telegram.name)
    }

    fn is_benign(&self, telegram: &Telegram) -> bool {
        self.benign
            .get(&telegram.name)
            .is_some_and(|payloads| payloads.contains(&telegram.payload))
    }
}

impl Default for TelegramFilter {
    fn default() -> Self {
        Self::new(0x42, &default_info_denylist(), &default_benign_payloads())
    }
}
