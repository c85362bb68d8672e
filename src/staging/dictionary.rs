//! Side table for strings too long to inline in a slot.

use std::collections::HashMap;
use std::sync::Arc;

use super::SlotError;

/// Append-only mapping from long strings to stable indices.
///
/// Owned by the producer thread. The flush worker never sees the live table,
/// only `DictionarySnapshot`s taken at handoff.
#[derive(Debug)]
pub struct StringDictionary {
    indices: HashMap<Arc<str>, u32>,
    strings: Vec<Arc<str>>,
    /// Last snapshot handed out, reused while the table has not grown.
    snapshot: DictionarySnapshot,
}

impl Default for StringDictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl StringDictionary {
    pub fn new() -> Self {
        Self {
            indices: HashMap::new(),
            strings: Vec::new(),
            snapshot: DictionarySnapshot::empty(),
        }
    }

    /// Return the index for `value`, assigning the next free one on first sight.
    pub fn intern(&mut self, value: &str) -> Result<u32, SlotError> {
        if let Some(&index) = self.indices.get(value) {
            return Ok(index);
        }
        let index = u32::try_from(self.strings.len()).map_err(|_| SlotError::DictionaryFull)?;
        let entry: Arc<str> = Arc::from(value);
        self.indices.insert(entry.clone(), index);
        self.strings.push(entry);
        Ok(index)
    }

    pub fn get(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(|s| &**s)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Immutable copy of the table as it stands now.
    pub fn snapshot(&mut self) -> DictionarySnapshot {
        if self.snapshot.len() != self.strings.len() {
            self.snapshot = DictionarySnapshot(self.strings.as_slice().into());
        }
        self.snapshot.clone()
    }
}

/// Read-only view of a `StringDictionary` at one point in time.
#[derive(Debug, Clone)]
pub struct DictionarySnapshot(Arc<[Arc<str>]>);

impl DictionarySnapshot {
    pub fn empty() -> Self {
        Self(Arc::from(Vec::new()))
    }

    pub fn get(&self, index: u32) -> Option<&str> {
        self.0.get(index as usize).map(|s| &**s)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
