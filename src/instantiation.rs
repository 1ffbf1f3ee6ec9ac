//! Instantiations: records of individual production firings.
//!
//! An [`Instantiation`] is one firing of a production (or a synthetic
//! architectural firing): the conditions it matched, the preferences it
//! generated, its match goal and level, and the flags backtracing consults.
//! Instantiations referenced by preferences outlive those preferences, so
//! the store never reuses handles.

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::error::{KernelError, SeshatResult};
use crate::memory::PrefId;
use crate::production::ProductionId;
use crate::symbol::{GoalLevel, SymbolId};

/// Handle to an instantiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstId(pub u64);

impl std::fmt::Display for InstId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "inst:{}", self.0)
    }
}

/// One firing of a production.
#[derive(Debug, Clone)]
pub struct Instantiation {
    /// Handle of this instantiation.
    pub id: InstId,
    /// The production that fired. `None` for architectural firings.
    pub production: Option<ProductionId>,
    /// Name used in traces (production name, or a synthetic label).
    pub label: String,
    /// The goal this instantiation matched in.
    pub match_goal: Option<SymbolId>,
    /// Goal level of the match goal.
    pub match_level: GoalLevel,
    /// Instantiated left-hand-side conditions, in match order.
    pub conditions: Vec<Condition>,
    /// Preferences this firing generated.
    pub actions: Vec<PrefId>,
    /// Stamp of the last backtracing pass that visited this instantiation.
    /// Compared against the chunker's per-attempt backtrace number so each
    /// instantiation is traced at most once per attempt.
    pub backtrace_num: u64,
    /// The firing tested quiescence (matched a goal/impasse augmentation
    /// that cannot be grounded).
    pub tested_quiescence: bool,
    /// The firing matched a negation local to the substate.
    pub tested_local_negation: bool,
    /// The firing matched structure recalled opaquely from long-term memory.
    pub tested_ltm_recall: bool,
    /// The firing's RHS performs a deep copy.
    pub creates_deep_copy: bool,
}

impl Instantiation {
    /// Create an empty instantiation shell; the kernel fills conditions and
    /// actions before exposing the handle.
    pub fn new(
        id: InstId,
        production: Option<ProductionId>,
        label: impl Into<String>,
        match_goal: Option<SymbolId>,
        match_level: GoalLevel,
    ) -> Self {
        Self {
            id,
            production,
            label: label.into(),
            match_goal,
            match_level,
            conditions: Vec::new(),
            actions: Vec::new(),
            backtrace_num: 0,
            tested_quiescence: false,
            tested_local_negation: false,
            tested_ltm_recall: false,
            creates_deep_copy: false,
        }
    }
}

/// Arena of instantiations.
#[derive(Debug, Default)]
pub struct InstantiationStore {
    insts: Vec<Instantiation>,
}

impl InstantiationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next instantiation handle.
    pub fn next_id(&self) -> InstId {
        InstId(self.insts.len() as u64)
    }

    /// Add an instantiation; its `id` must equal [`Self::next_id`].
    pub fn add(&mut self, inst: Instantiation) -> InstId {
        let id = inst.id;
        self.insts.push(inst);
        id
    }

    /// Look up an instantiation.
    pub fn get(&self, id: InstId) -> SeshatResult<&Instantiation> {
        self.insts
            .get(id.0 as usize)
            .ok_or_else(|| KernelError::UnknownInstantiation { id: id.0 }.into())
    }

    /// Mutable lookup.
    pub fn get_mut(&mut self, id: InstId) -> SeshatResult<&mut Instantiation> {
        self.insts
            .get_mut(id.0 as usize)
            .ok_or_else(|| KernelError::UnknownInstantiation { id: id.0 }.into())
    }

    /// Number of instantiations ever created.
    pub fn len(&self) -> usize {
        self.insts.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }
}
