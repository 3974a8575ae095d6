//! The JSON header prefacing a weave stream: format version plus the
//! index of every delta (revision) recorded in the file.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub const HEADER_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Delta {
    pub number: u32,
    pub name: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// RFC-3339-nano, UTC.
    pub time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub deltas: Vec<Delta>,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            version: HEADER_VERSION,
            deltas: Vec::new(),
        }
    }
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<&Delta> {
        self.deltas.last()
    }

    /// The delta before the latest one, if there are at least two.
    pub fn prior(&self) -> Option<&Delta> {
        self.deltas.len().checked_sub(2).and_then(|i| self.deltas.get(i))
    }

    pub fn get(&self, number: u32) -> Option<&Delta> {
        self.deltas.iter().find(|d| d.number == number)
    }

    pub fn next_number(&self) -> u32 {
        self.deltas.last().map_or(1, |d| d.number + 1)
    }

    /// Append a new delta, returning its assigned number. Existing
    /// entries are never reordered or renumbered.
    pub fn push(&mut self, name: String, tags: BTreeMap<String, String>, time: String) -> u32 {
        let number = self.next_number();
        self.deltas.push(Delta { number, name, tags, time });
        number
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_assigns_contiguous_numbers() {
        let mut h = Header::new();
        let n1 = h.push("first".into(), BTreeMap::new(), "2024-01-01T00:00:00Z".into());
        let n2 = h.push("second".into(), BTreeMap::new(), "2024-01-02T00:00:00Z".into());
        assert_eq!(n1, 1);
        assert_eq!(n2, 2);
        assert_eq!(h.latest().unwrap().name, "second");
        assert_eq!(h.prior().unwrap().name, "first");
    }

    #[test]
    fn json_round_trips() {
        let mut h = Header::new();
        h.push("only".into(), BTreeMap::new(), "2024-01-01T00:00:00Z".into());
        let json = h.to_json().unwrap();
        assert_eq!(Header::from_json(&json).unwrap(), h);
    }
}
