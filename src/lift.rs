//! Lift Map: how original sequences were cut into chunks.
//!
//! Each chunk has exactly one [`LiftEntry`] and chunk position `p` maps to
//! parent position `offset + p`. Entries are kept in the order the chunker
//! produced them, which is start-position order within each parent.
//!
//! The text form is the UCSC lift format written by `faSplit -lift` and read
//! by `liftUp`: `offset  chunkName  chunkSize  parentName  parentSize`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufRead, Write};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiftEntry {
    pub chunk_name: String,
    pub parent_name: String,
    pub offset: u64,
    pub chunk_len: u64,
    pub parent_len: u64,
}

impl LiftEntry {
    pub fn end(&self) -> u64 {
        self.offset + self.chunk_len
    }

    /// No successor chunk exists for this parent.
    pub fn is_terminal(&self) -> bool {
        self.end() >= self.parent_len
    }
}

/// Immutable once built. Serialised as a plain list of entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<LiftEntry>", into = "Vec<LiftEntry>")]
pub struct LiftMap {
    entries: IndexMap<String, LiftEntry>,
    /// Chunk-local length each chunk is responsible for, i.e. the distance to
    /// the next chunk of the same parent, or its full length if terminal.
    owned: HashMap<String, u64>,
    /// Parent names in first-appearance order.
    parents: IndexMap<String, u64>,
}

impl LiftMap {
    /// Build from entries in chunker order. Duplicate chunk names are a
    /// bookkeeping defect.
    pub fn from_entries(entries: Vec<LiftEntry>) -> Result<Self> {
        let mut map: IndexMap<String, LiftEntry> = IndexMap::with_capacity(entries.len());
        for entry in entries {
            if map.contains_key(&entry.chunk_name) {
                return Err(PipelineError::Consistency(format!(
                    "chunk '{}' appears twice in lift map",
                    entry.chunk_name
                )));
            }
            map.insert(entry.chunk_name.clone(), entry);
        }
        Ok(Self::index(map))
    }

    fn index(entries: IndexMap<String, LiftEntry>) -> Self {
        let mut by_parent: IndexMap<String, Vec<&LiftEntry>> = IndexMap::new();
        for entry in entries.values() {
            by_parent
                .entry(entry.parent_name.clone())
                .or_default()
                .push(entry);
        }

        let mut owned = HashMap::with_capacity(entries.len());
        let mut parents = IndexMap::with_capacity(by_parent.len());
        for (parent, mut chunks) in by_parent {
            chunks.sort_by_key(|e| e.offset);
            for pair in chunks.windows(2) {
                let owned_len = pair[1].offset.saturating_sub(pair[0].offset);
                owned.insert(pair[0].chunk_name.clone(), owned_len.min(pair[0].chunk_len));
            }
            if let Some(last) = chunks.last() {
                owned.insert(last.chunk_name.clone(), last.chunk_len);
                parents.insert(parent, last.parent_len);
            }
        }

        Self {
            entries,
            owned,
            parents,
        }
    }

    pub fn get(&self, chunk_name: &str) -> Option<&LiftEntry> {
        self.entries.get(chunk_name)
    }

    /// Local length the chunk owns; records starting at or past it belong to
    /// the next chunk of the same parent.
    pub fn owned_len(&self, chunk_name: &str) -> Option<u64> {
        self.owned.get(chunk_name).copied()
    }

    pub fn entries(&self) -> impl Iterator<Item = &LiftEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Position of a parent in input order.
    pub fn parent_rank(&self, parent_name: &str) -> Option<usize> {
        self.parents.get_index_of(parent_name)
    }

    pub fn parent_len(&self, parent_name: &str) -> Option<u64> {
        self.parents.get(parent_name).copied()
    }

    pub fn write_lift<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for e in self.entries.values() {
            writeln!(
                writer,
                "{}\t{}\t{}\t{}\t{}",
                e.offset, e.chunk_name, e.chunk_len, e.parent_name, e.parent_len
            )?;
        }
        Ok(())
    }

    pub fn read_lift<R: BufRead>(reader: R) -> Result<Self> {
        let mut entries = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 5 {
                return Err(PipelineError::Consistency(format!(
                    "lift line {}: expected 5 fields, got {}",
                    lineno + 1,
                    fields.len()
                )));
            }
            let number = |s: &str| -> Result<u64> {
                s.parse().map_err(|_| {
                    PipelineError::Consistency(format!(
                        "lift line {}: '{}' is not a coordinate",
                        lineno + 1,
                        s
                    ))
                })
            };
            entries.push(LiftEntry {
                offset: number(fields[0])?,
                chunk_name: fields[1].to_string(),
                chunk_len: number(fields[2])?,
                parent_name: fields[3].to_string(),
                parent_len: number(fields[4])?,
            });
        }
        Self::from_entries(entries)
    }
}

impl From<Vec<LiftEntry>> for LiftMap {
    fn from(entries: Vec<LiftEntry>) -> Self {
        // Later duplicates overwrite earlier ones; from_entries is the
        // checked path used by the chunker.
        Self::index(
            entries
                .into_iter()
                .map(|e| (e.chunk_name.clone(), e))
                .collect(),
        )
    }
}

impl From<LiftMap> for Vec<LiftEntry> {
    fn from(map: LiftMap) -> Self {
        map.entries.into_values().collect()
    }
}
