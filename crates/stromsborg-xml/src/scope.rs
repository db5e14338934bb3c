#![forbid(unsafe_code)]

//! Arena of open elements.
//!
//! Every start element produced by a reader (or linked by a writer) is
//! allocated a slot in a [`ScopeTree`]. A start element refers to its parent
//! only through an [`ElementId`], never by ownership. Slots are released when
//! the matching end element is produced; ids carry a generation so a lookup
//! through a released id yields `None` instead of a recycled element.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::event::StartElement;
use crate::name::{Attribute, Namespace, QName};

/// Handle to an element slot in a [`ScopeTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId {
    index: u32,
    generation: u32,
}

/// The scope-relevant part of a start element, as stored in the arena.
#[derive(Debug, Clone)]
pub struct ElementNode {
    pub name: QName,
    pub namespaces: Vec<Namespace>,
    pub attributes: Vec<Attribute>,
    pub parent: Option<ElementId>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    node: Option<Arc<ElementNode>>,
}

#[derive(Debug, Default)]
struct ScopeArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    high_water: usize,
}

impl ScopeArena {
    fn get(&self, id: ElementId) -> Option<&Arc<ElementNode>> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }
}

/// Shared arena of currently open elements.
///
/// Cloning the tree clones the handle; all clones see the same arena. The
/// tree is shared between the outer document reader and any nested reader
/// parsing decrypted content inside it.
#[derive(Debug, Clone, Default)]
pub struct ScopeTree {
    arena: Arc<RwLock<ScopeArena>>,
}

impl ScopeTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, ScopeArena> {
        self.arena.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ScopeArena> {
        self.arena.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocate a slot for a newly opened element.
    pub fn allocate(&self, node: ElementNode) -> ElementId {
        let mut arena = self.write();
        arena.live += 1;
        arena.high_water = arena.high_water.max(arena.live);
        if let Some(index) = arena.free.pop() {
            let slot = &mut arena.slots[index as usize];
            slot.node = Some(Arc::new(node));
            ElementId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = arena.slots.len() as u32;
            arena.slots.push(Slot {
                generation: 0,
                node: Some(Arc::new(node)),
            });
            ElementId {
                index,
                generation: 0,
            }
        }
    }

    /// Release the slot of a closed element. Returns the node if `id` was live.
    pub fn release(&self, id: ElementId) -> Option<Arc<ElementNode>> {
        let mut arena = self.write();
        let slot = arena.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation || slot.node.is_none() {
            return None;
        }
        let node = slot.node.take();
        slot.generation = slot.generation.wrapping_add(1);
        arena.free.push(id.index);
        arena.live -= 1;
        node
    }

    pub fn get(&self, id: ElementId) -> Option<Arc<ElementNode>> {
        self.read().get(id).cloned()
    }

    pub fn is_live(&self, id: ElementId) -> bool {
        self.read().get(id).is_some()
    }

    /// Number of elements currently open.
    pub fn live_count(&self) -> usize {
        self.read().live
    }

    /// Largest number of simultaneously open elements seen so far.
    pub fn high_water(&self) -> usize {
        self.read().high_water
    }

    /// Live ancestors starting at `from`, nearest first. The walk stops at
    /// the first released slot.
    pub fn ancestors(&self, from: Option<ElementId>) -> Vec<Arc<ElementNode>> {
        let arena = self.read();
        let mut out = Vec::new();
        let mut cursor = from;
        while let Some(id) = cursor {
            match arena.get(id) {
                Some(node) => {
                    cursor = node.parent;
                    out.push(Arc::clone(node));
                }
                None => break,
            }
        }
        out
    }

    /// Namespace declarations visible from `from`, nearest declaration per
    /// prefix winning.
    pub fn namespaces_in_scope(&self, from: Option<ElementId>) -> Vec<Namespace> {
        let mut out: Vec<Namespace> = Vec::new();
        for node in self.ancestors(from) {
            push_unseen_namespaces(&mut out, &node.namespaces);
        }
        out
    }

    /// Attributes visible from `from`, nearest per attribute name winning.
    pub fn attributes_in_scope(&self, from: Option<ElementId>) -> Vec<Attribute> {
        let mut out: Vec<Attribute> = Vec::new();
        for node in self.ancestors(from) {
            push_unseen_attributes(&mut out, &node.attributes);
        }
        out
    }

    /// Resolve `prefix` against the declarations visible from `from`.
    pub fn resolve_prefix(&self, from: Option<ElementId>, prefix: &str) -> Option<String> {
        let arena = self.read();
        let mut cursor = from;
        while let Some(id) = cursor {
            let node = arena.get(id)?;
            if let Some(ns) = node.namespaces.iter().find(|ns| ns.prefix == prefix) {
                return Some(ns.uri.clone());
            }
            cursor = node.parent;
        }
        None
    }
}

pub(crate) fn push_unseen_namespaces(out: &mut Vec<Namespace>, decls: &[Namespace]) {
    for ns in decls {
        if !out.iter().any(|seen| seen.prefix == ns.prefix) {
            out.push(ns.clone());
        }
    }
}

pub(crate) fn push_unseen_attributes(out: &mut Vec<Attribute>, attrs: &[Attribute]) {
    for attr in attrs {
        if !out.iter().any(|seen| seen.name == attr.name) {
            out.push(attr.clone());
        }
    }
}

/// A start element's position in a [`ScopeTree`].
#[derive(Debug, Clone)]
pub struct ScopeLink {
    pub tree: ScopeTree,
    pub id: ElementId,
    pub parent: Option<ElementId>,
}

/// Keeps a [`ScopeTree`] in step with a stream of start/end elements.
///
/// Readers use it for the events they produce; the outbound writer uses it
/// to link application-written events.
#[derive(Debug)]
pub struct ScopeTracker {
    tree: ScopeTree,
    open: Vec<ElementId>,
    base: Option<ElementId>,
}

impl ScopeTracker {
    pub fn new(tree: ScopeTree) -> Self {
        Self {
            tree,
            open: Vec::new(),
            base: None,
        }
    }

    /// A tracker whose top-level elements are children of `base`.
    pub fn nested(tree: ScopeTree, base: Option<ElementId>) -> Self {
        Self {
            tree,
            open: Vec::new(),
            base,
        }
    }

    pub fn tree(&self) -> &ScopeTree {
        &self.tree
    }

    /// The element new children will be linked to.
    pub fn current(&self) -> Option<ElementId> {
        self.open.last().copied().or(self.base)
    }

    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Register `start` as a child of the current element and link it.
    pub fn enter(&mut self, start: &mut StartElement) -> ElementId {
        let parent = self.current();
        let id = self.tree.allocate(ElementNode {
            name: start.name.clone(),
            namespaces: start.namespaces.clone(),
            attributes: start.attributes.clone(),
            parent,
        });
        start.link(ScopeLink {
            tree: self.tree.clone(),
            id,
            parent,
        });
        self.open.push(id);
        id
    }

    /// Close the innermost open element.
    pub fn leave(&mut self) -> Option<ElementId> {
        let id = self.open.pop()?;
        self.tree.release(id);
        Some(id)
    }
}

impl Drop for ScopeTracker {
    fn drop(&mut self) {
        while self.leave().is_some() {}
    }
}
