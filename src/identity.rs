//! The identity/unification graph.
//!
//! Every distinct matched-symbol occurrence in a trace gets an [`Identity`]:
//! an equivalence-class token meaning "all occurrences sharing this token
//! must be generalized to the same variable". Backtracing joins identities
//! that must agree; variablization then assigns one canonical variable per
//! equivalence-class root.
//!
//! The graph is a disjoint-set forest over an arena of reference-counted
//! nodes. Joins repoint every member of the absorbed class directly at the
//! surviving root, so `resolve` is O(1). Per-build state (join structure,
//! assigned variables, clone links, literalization) is transient: every
//! touched node lands on a dirty worklist that [`IdentityGraph::clean_up`]
//! resets at the end of each learning attempt. Reference counts are the
//! persistent lifecycle: they track how many conditions/preferences still
//! point at a node, and releasing the last reference frees it.

use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use crate::error::{ChunkError, SeshatResult};
use crate::symbol::SymbolId;

/// Handle to an identity node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct IdentityId(NonZeroU64);

impl IdentityId {
    fn from_index(index: usize) -> Option<Self> {
        NonZeroU64::new(index as u64 + 1).map(IdentityId)
    }

    fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }

    /// Raw numeric value, for diagnostics.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for IdentityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "id#{}", self.0)
    }
}

/// One node of the identity graph.
#[derive(Debug, Clone)]
struct Identity {
    /// Root pointer; points at itself when this node is a root.
    joined: IdentityId,
    /// Members absorbed into this root (meaningful on roots only).
    merged: Vec<IdentityId>,
    /// Live references from conditions, preferences, and tests.
    refcount: u32,
    /// Canonical variable assigned at variablization time.
    variable: Option<SymbolId>,
    /// The ground symbol recorded alongside the variable, used when the
    /// chunk is reinstantiated.
    matched: Option<SymbolId>,
    /// Fresh identity minted for the chunk instantiation's own conditions.
    clone: Option<IdentityId>,
    /// Collapsed to a literal constant; no longer generalizable.
    literalized: bool,
    /// Index of the ground condition where transitive constraints attach.
    operational_cond: Option<usize>,
    /// The goal that owns this identity, when known.
    owner_goal: Option<SymbolId>,
    /// On the dirty worklist awaiting transient-state reset.
    dirty: bool,
}

/// The identity/unification graph.
#[derive(Debug, Default)]
pub struct IdentityGraph {
    slots: Vec<Option<Identity>>,
    free: Vec<usize>,
    dirty: Vec<IdentityId>,
    joins_performed: u64,
}

impl IdentityGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new identity with refcount 0.
    pub fn create(&mut self, owner_goal: Option<SymbolId>) -> SeshatResult<IdentityId> {
        let index = match self.free.pop() {
            Some(i) => i,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };
        let id = IdentityId::from_index(index)
            .ok_or(ChunkError::InconsistentIdentityMap { identity: 0 })?;
        self.slots[index] = Some(Identity {
            joined: id,
            merged: Vec::new(),
            refcount: 0,
            variable: None,
            matched: None,
            clone: None,
            literalized: false,
            operational_cond: None,
            owner_goal,
            dirty: false,
        });
        Ok(id)
    }

    fn node(&self, id: IdentityId) -> SeshatResult<&Identity> {
        self.slots
            .get(id.index())
            .and_then(|s| s.as_ref())
            .ok_or_else(|| ChunkError::InconsistentIdentityMap { identity: id.get() }.into())
    }

    fn node_mut(&mut self, id: IdentityId) -> SeshatResult<&mut Identity> {
        self.slots
            .get_mut(id.index())
            .and_then(|s| s.as_mut())
            .ok_or_else(|| ChunkError::InconsistentIdentityMap { identity: id.get() }.into())
    }

    /// Whether an identity is still allocated.
    pub fn is_live(&self, id: IdentityId) -> bool {
        self.slots
            .get(id.index())
            .is_some_and(|s| s.is_some())
    }

    /// Number of live identities.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Total joins performed since creation (telemetry).
    pub fn joins_performed(&self) -> u64 {
        self.joins_performed
    }

    fn mark_dirty(&mut self, id: IdentityId) -> SeshatResult<()> {
        let node = self.node_mut(id)?;
        if !node.dirty {
            node.dirty = true;
            self.dirty.push(id);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reference counting
    // -----------------------------------------------------------------------

    /// Take a reference to an identity.
    pub fn add_ref(&mut self, id: IdentityId) -> SeshatResult<()> {
        self.node_mut(id)?.refcount += 1;
        Ok(())
    }

    /// Release one reference. Returns `true` when this release freed the
    /// node. Releasing an already-freed identity is a safe no-op.
    pub fn remove_ref(&mut self, id: IdentityId) -> bool {
        let Some(Some(node)) = self.slots.get_mut(id.index()) else {
            return false;
        };
        node.refcount = node.refcount.saturating_sub(1);
        if node.refcount > 0 {
            return false;
        }

        // Detach from the representative's merge list, then clear the
        // back-pointers of everything merged into this node, then free.
        let joined = node.joined;
        let merged = std::mem::take(&mut node.merged);
        if joined != id {
            if let Some(Some(root)) = self.slots.get_mut(joined.index()) {
                root.merged.retain(|&m| m != id);
            }
        }
        for member in merged {
            if let Some(Some(child)) = self.slots.get_mut(member.index()) {
                child.joined = member;
            }
        }
        self.slots[id.index()] = None;
        self.free.push(id.index());
        true
    }

    // -----------------------------------------------------------------------
    // Union-find
    // -----------------------------------------------------------------------

    /// Resolve an identity to its equivalence-class root.
    ///
    /// Joins repoint all members directly at the surviving root, so this
    /// walk terminates after at most one hop; the loop covers the window
    /// between nested joins.
    pub fn resolve(&self, id: IdentityId) -> SeshatResult<IdentityId> {
        let mut current = id;
        loop {
            let node = self.node(current)?;
            if node.joined == current {
                return Ok(current);
            }
            current = node.joined;
        }
    }

    /// Union two identities. Returns the surviving root.
    ///
    /// The smaller equivalence class is absorbed into the larger one
    /// (merged-list length as the size proxy); every member of the absorbed
    /// class is repointed at the survivor, and the literalized flag
    /// propagates to the survivor if either side carried it.
    pub fn join(&mut self, a: IdentityId, b: IdentityId) -> SeshatResult<IdentityId> {
        let ra = self.resolve(a)?;
        let rb = self.resolve(b)?;
        if ra == rb {
            return Ok(ra);
        }

        let size_a = self.node(ra)?.merged.len();
        let size_b = self.node(rb)?.merged.len();
        let (survivor, absorbed) = if size_a >= size_b { (ra, rb) } else { (rb, ra) };

        let absorbed_node = self.node_mut(absorbed)?;
        absorbed_node.joined = survivor;
        let members = std::mem::take(&mut absorbed_node.merged);
        let literalized = absorbed_node.literalized;
        let variable = absorbed_node.variable.take();
        let matched = absorbed_node.matched.take();
        let operational = absorbed_node.operational_cond.take();

        for &member in &members {
            self.node_mut(member)?.joined = survivor;
        }

        let survivor_node = self.node_mut(survivor)?;
        survivor_node.merged.push(absorbed);
        survivor_node.merged.extend(members);
        survivor_node.literalized |= literalized;
        if survivor_node.variable.is_none() {
            survivor_node.variable = variable;
            survivor_node.matched = matched;
        }
        if survivor_node.operational_cond.is_none() {
            survivor_node.operational_cond = operational;
        }

        self.mark_dirty(survivor)?;
        self.mark_dirty(absorbed)?;
        self.joins_performed += 1;
        tracing::trace!(survivor = %survivor, absorbed = %absorbed, "identity join");
        Ok(survivor)
    }

    // -----------------------------------------------------------------------
    // Literalization and variablization
    // -----------------------------------------------------------------------

    /// Collapse an identity's class to a literal constant.
    pub fn literalize(&mut self, id: IdentityId) -> SeshatResult<()> {
        let root = self.resolve(id)?;
        self.node_mut(root)?.literalized = true;
        self.mark_dirty(root)
    }

    /// Whether an identity's class has been literalized.
    pub fn is_literalized(&self, id: IdentityId) -> SeshatResult<bool> {
        let root = self.resolve(id)?;
        Ok(self.node(root)?.literalized)
    }

    /// Bind the canonical variable for an identity's class, exactly once
    /// per build.
    pub fn store_variablization(
        &mut self,
        id: IdentityId,
        variable: SymbolId,
        matched: SymbolId,
    ) -> SeshatResult<()> {
        let root = self.resolve(id)?;
        let node = self.node_mut(root)?;
        if node.variable.is_some() {
            return Err(ChunkError::DoubleVariablization { identity: root.get() }.into());
        }
        node.variable = Some(variable);
        node.matched = Some(matched);
        self.mark_dirty(root)
    }

    /// The canonical variable for an identity's class, if one was bound.
    pub fn variable_for(&self, id: IdentityId) -> SeshatResult<Option<SymbolId>> {
        let root = self.resolve(id)?;
        Ok(self.node(root)?.variable)
    }

    /// The ground symbol recorded when the class was variablized.
    pub fn matched_for(&self, id: IdentityId) -> SeshatResult<Option<SymbolId>> {
        let root = self.resolve(id)?;
        Ok(self.node(root)?.matched)
    }

    /// The goal that owns this identity, when known.
    pub fn owner_goal(&self, id: IdentityId) -> SeshatResult<Option<SymbolId>> {
        Ok(self.node(id)?.owner_goal)
    }

    /// Record the ground condition index where transitive constraints on
    /// this class attach; first writer wins.
    pub fn set_operational_cond(&mut self, id: IdentityId, cond: usize) -> SeshatResult<()> {
        let root = self.resolve(id)?;
        let node = self.node_mut(root)?;
        if node.operational_cond.is_none() {
            node.operational_cond = Some(cond);
        }
        self.mark_dirty(root)
    }

    /// The recorded attachment condition, if any.
    pub fn operational_cond(&self, id: IdentityId) -> SeshatResult<Option<usize>> {
        let root = self.resolve(id)?;
        Ok(self.node(root)?.operational_cond)
    }

    /// The clone identity minted for the chunk instantiation, creating it
    /// on first request. Clones are referenced once by the graph itself
    /// until their new owner takes over.
    pub fn clone_identity(&mut self, id: IdentityId) -> SeshatResult<IdentityId> {
        let root = self.resolve(id)?;
        if let Some(existing) = self.node(root)?.clone {
            return Ok(existing);
        }
        let owner = self.node(root)?.owner_goal;
        let fresh = self.create(owner)?;
        self.node_mut(root)?.clone = Some(fresh);
        self.mark_dirty(root)?;
        Ok(fresh)
    }

    // -----------------------------------------------------------------------
    // Per-attempt cleanup
    // -----------------------------------------------------------------------

    /// Reset the transient per-build state of every node touched since the
    /// last cleanup: join structure, variables, clone links, literalization,
    /// attachment points. Idempotent; running it twice leaves the same
    /// (empty) transient state.
    pub fn clean_up(&mut self) {
        let dirty = std::mem::take(&mut self.dirty);
        let count = dirty.len();
        for id in dirty {
            if let Some(Some(node)) = self.slots.get_mut(id.index()) {
                node.joined = id;
                node.merged.clear();
                node.variable = None;
                node.matched = None;
                node.clone = None;
                node.literalized = false;
                node.operational_cond = None;
                node.dirty = false;
            }
        }
        if count > 0 {
            tracing::trace!(reset = count, "identity graph cleanup");
        }
    }

    /// Drop every node. Used on agent reinitialization only.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.dirty.clear();
        self.joins_performed = 0;
    }
}
