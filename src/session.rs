//! Session History
//!
//! Append-only record of what one interactive session has produced. A
//! `Session` is an explicit value owned by whoever handles user actions; it is
//! never shared globally and is dropped when the session ends.

use crate::dataset::{title_case, NdviRecord};
use crate::image_fetch::NdviImage;
use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

/// A matched record plus its optional NDVI map.
#[derive(Debug, Clone, PartialEq)]
pub struct DataEntry {
    pub record: NdviRecord,
    pub image: Option<NdviImage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QaEntry {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryKind {
    Data(DataEntry),
    Qa(QaEntry),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub appended_at: DateTime<Utc>,
    pub kind: EntryKind,
}

impl HistoryEntry {
    pub fn as_data(&self) -> Option<&DataEntry> {
        match &self.kind {
            EntryKind::Data(entry) => Some(entry),
            EntryKind::Qa(_) => None,
        }
    }

    pub fn as_qa(&self) -> Option<&QaEntry> {
        match &self.kind {
            EntryKind::Qa(entry) => Some(entry),
            EntryKind::Data(_) => None,
        }
    }
}

impl fmt::Display for DataEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.record;
        writeln!(f, "### {} - {} {}", title_case(&r.state), title_case(&r.month), r.year)?;
        if let Some(image) = &self.image {
            writeln!(
                f,
                "NDVI map: {} ({}x{} {:?})",
                image.source_url, image.width, image.height, image.format
            )?;
        }
        write!(
            f,
            "NDVI: {}, Temp: {}°C, Rainfall: {}mm, Soil Moisture: {}%",
            r.ndvi_value, r.temperature, r.rainfall, r.soilmoisture
        )
    }
}

impl fmt::Display for QaEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Q: {}", self.question)?;
        write!(f, "A: {}", self.answer)
    }
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EntryKind::Data(entry) => entry.fmt(f),
            EntryKind::Qa(entry) => entry.fmt(f),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    started_at: DateTime<Utc>,
    entries: Vec<HistoryEntry>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn append_data(&mut self, record: NdviRecord, image: Option<NdviImage>) -> &HistoryEntry {
        self.push(EntryKind::Data(DataEntry { record, image }))
    }

    pub fn append_qa(&mut self, question: impl Into<String>, answer: impl Into<String>) -> &HistoryEntry {
        self.push(EntryKind::Qa(QaEntry {
            question: question.into(),
            answer: answer.into(),
        }))
    }

    fn push(&mut self, kind: EntryKind) -> &HistoryEntry {
        self.entries.push(HistoryEntry {
            appended_at: Utc::now(),
            kind,
        });
        &self.entries[self.entries.len() - 1]
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn data_entries(&self) -> impl Iterator<Item = &DataEntry> {
        self.entries.iter().filter_map(HistoryEntry::as_data)
    }

    /// One line per data entry, QA entries skipped. This is the analyzer's
    /// context.
    pub fn context_text(&self) -> String {
        self.data_entries()
            .map(|entry| {
                let r = &entry.record;
                format!(
                    "{} {} {} NDVI={} Temp={} Rain={} Soil={}\n",
                    r.state, r.month, r.year, r.ndvi_value, r.temperature, r.rainfall, r.soilmoisture
                )
            })
            .collect()
    }
}
