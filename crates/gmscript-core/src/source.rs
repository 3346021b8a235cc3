//! Source texts registered for debugging, keyed by the CRC32 of their text.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::SourceId;

/// One registered source.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SourceEntry {
    /// CRC32 of `text`.
    pub id: SourceId,
    /// Display name (file name, or `unknown`).
    pub name: String,
    /// Full text.
    pub text: String,
}

/// Registered sources in registration order. Identical texts register once.
#[derive(Debug, Clone, Default)]
pub struct SourceTable {
    entries: Vec<SourceEntry>,
}

impl SourceTable {
    /// Empty table.
    pub fn new() -> Self { Self::default() }

    /// Id a text would get.
    pub fn source_id(text: &str) -> SourceId { crc32fast::hash(text.as_bytes()) }

    /// Registers `text` and returns its id. A missing name becomes `unknown`.
    pub fn add(&mut self, text: &str, name: Option<&str>) -> SourceId {
        let id = Self::source_id(text);
        if self.get(id).is_none() {
            self.entries.push(SourceEntry {
                id,
                name: name.unwrap_or("unknown").to_owned(),
                text: text.to_owned(),
            });
        }
        id
    }

    /// Looks a source up by id.
    pub fn get(&self, id: SourceId) -> Option<&SourceEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// All sources.
    pub fn iter(&self) -> impl Iterator<Item = &SourceEntry> { self.entries.iter() }

    /// Number of sources.
    pub fn len(&self) -> usize { self.entries.len() }

    /// True when empty.
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}
