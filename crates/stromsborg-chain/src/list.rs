#![forbid(unsafe_code)]

//! The ordered processor list and cursor shared by both chain flavours.

use std::sync::{Arc, Mutex};

use stromsborg_core::{Error, Result};

use crate::order::{self, Placement, Slot};
use crate::processor::{ProcessorDescriptor, ProcessorId};

/// One processor in a chain. Clones share the processor.
pub struct ProcessorEntry<P: ?Sized> {
    pub descriptor: ProcessorDescriptor,
    pub processor: Arc<Mutex<P>>,
}

impl<P: ?Sized> Clone for ProcessorEntry<P> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            processor: Arc::clone(&self.processor),
        }
    }
}

/// Entries in invocation order plus the cursor.
///
/// The cursor is a stack with one frame per processor currently executing
/// (a processor pulling or pushing through the chain opens a nested frame);
/// each frame holds the index of the processor that frame hands over to
/// next. `start` is where a top-level call enters the list.
pub struct ProcessorList<P: ?Sized> {
    entries: Vec<ProcessorEntry<P>>,
    frames: Vec<usize>,
    start: usize,
}

impl<P: ?Sized> Default for ProcessorList<P> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            frames: Vec::new(),
            start: 0,
        }
    }
}

impl<P: ?Sized> ProcessorList<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn descriptors(&self) -> Vec<ProcessorDescriptor> {
        self.entries.iter().map(|e| e.descriptor.clone()).collect()
    }

    /// Entries from `start` on, the part a top-level call can reach.
    pub fn reachable(&self) -> impl Iterator<Item = &ProcessorDescriptor> {
        self.entries[self.start.min(self.entries.len())..]
            .iter()
            .map(|e| &e.descriptor)
    }

    pub fn position(&self, id: ProcessorId) -> Option<usize> {
        self.entries.iter().position(|e| e.descriptor.id == id)
    }

    /// Index of the processor the innermost frame hands over to.
    pub fn next_index(&self) -> usize {
        self.frames.last().copied().unwrap_or(self.start)
    }

    pub fn is_active(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Open a frame for the processor at `index`; returns the processor.
    pub fn enter(&mut self, index: usize) -> Option<Arc<Mutex<P>>> {
        let entry = self.entries.get(index)?;
        let processor = Arc::clone(&entry.processor);
        self.frames.push(index + 1);
        Some(processor)
    }

    pub fn leave(&mut self) {
        self.frames.pop();
    }

    pub fn insert(
        &mut self,
        descriptor: ProcessorDescriptor,
        processor: Arc<Mutex<P>>,
    ) -> Result<ProcessorId> {
        if self.position(descriptor.id).is_some() {
            return Err(Error::InternalFailure(format!(
                "processor {} already in chain",
                descriptor.id
            )));
        }
        let id = descriptor.id;
        let existing = self.descriptors();
        let entry = ProcessorEntry {
            descriptor,
            processor,
        };
        match order::place(&existing, &entry.descriptor)? {
            Placement::At(index) => {
                tracing::debug!(
                    processor = %id,
                    kind = %entry.descriptor.kind,
                    index,
                    "processor inserted"
                );
                self.entries.insert(index, entry);
                self.shift_after_insert(index);
            }
            Placement::Rebuild { range, order } => {
                // An executing processor inside the segment, or a fork entry
                // point within it, would lose its place.
                let executing = self
                    .frames
                    .iter()
                    .any(|&next| next > range.start && next <= range.end)
                    || (self.start > range.start && self.start < range.end);
                if executing {
                    return Err(Error::InternalFailure(format!(
                        "cannot reorder {range:?} around an executing processor"
                    )));
                }
                tracing::debug!(processor = %id, ?range, "phase segment rebuilt");
                let mut entry = Some(entry);
                let rebuilt: Vec<ProcessorEntry<P>> = order
                    .iter()
                    .filter_map(|slot| match slot {
                        Slot::Existing(i) => self.entries.get(*i).cloned(),
                        Slot::New => entry.take(),
                    })
                    .collect();
                let end = range.end;
                self.entries.splice(range, rebuilt);
                for next in self.frames.iter_mut() {
                    if *next > end {
                        *next += 1;
                    }
                }
                if self.start >= end {
                    self.start += 1;
                }
            }
        }
        Ok(id)
    }

    fn shift_after_insert(&mut self, index: usize) {
        for next in self.frames.iter_mut() {
            if index < *next {
                *next += 1;
            }
        }
        if index < self.start {
            self.start += 1;
        }
    }

    /// Remove the processor with `id`; returns whether it was present.
    pub fn remove(&mut self, id: ProcessorId) -> bool {
        let Some(index) = self.position(id) else {
            return false;
        };
        self.entries.remove(index);
        for next in self.frames.iter_mut() {
            if index < *next {
                *next -= 1;
            }
        }
        if index < self.start {
            self.start -= 1;
        }
        tracing::debug!(processor = %id, index, "processor removed");
        true
    }

    /// Snapshot of the entries with the cursor right after `at`.
    pub fn fork(&self, at: ProcessorId) -> Result<Self> {
        let index = self.position(at).ok_or_else(|| {
            Error::InternalFailure(format!("fork point {at} is not in the chain"))
        })?;
        Ok(Self {
            entries: self.entries.clone(),
            frames: Vec::new(),
            start: index + 1,
        })
    }
}
