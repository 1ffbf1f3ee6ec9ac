//! Kernel facade: the machinery the learner consumes.
//!
//! The [`Kernel`] owns the symbol table, working memory, preference and
//! instantiation stores, the production store, and the match network — the
//! surface the decision cycle would normally maintain. The [`Agent`] pairs
//! a kernel with an [`ExplanationBasedChunker`] and provides the
//! trace-building API ([`InstBuilder`]) used by the demo binary and the
//! test suite: push goals, add input WMEs, fire synthetic instantiations
//! with identity assignment, then learn from them.

use std::collections::HashMap;

use crate::chunk::{ChunkSettings, ChunkStats, ExplanationBasedChunker, LearnResult};
use crate::condition::{Condition, Constraint, ConstraintKind, PositiveCondition, Test, TestTriple};
use crate::error::{KernelError, SeshatError, SeshatResult};
use crate::identity::IdentityId;
use crate::instantiation::{InstId, Instantiation, InstantiationStore};
use crate::memory::{
    IdentityQuad, PrefId, Preference, PreferenceKind, PreferenceStore, WmeId, WorkingMemory,
};
use crate::production::{ProductionId, ProductionStore};
use crate::rete::{AddProductionOutcome, MatchNetwork, SimpleRete};
use crate::symbol::{GoalLevel, SymbolId, SymbolTable};

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

/// The kernel state the learner operates over.
#[derive(Debug, Default)]
pub struct Kernel {
    pub symbols: SymbolTable,
    pub wm: WorkingMemory,
    pub prefs: PreferenceStore,
    pub insts: InstantiationStore,
    pub productions: ProductionStore,
    pub rete: SimpleRete,
    /// Cooperative stop flag, checked at attempt boundaries.
    pub stop_requested: bool,
    goals: Vec<SymbolId>,
}

impl Kernel {
    /// Create an empty kernel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a new goal onto the goal stack and return its identifier.
    /// The first push creates the top goal (level 1).
    pub fn push_goal(&mut self) -> SeshatResult<SymbolId> {
        let level = GoalLevel(self.goals.len() as u32 + 1);
        let goal = self.symbols.make_goal(level)?;
        self.goals.push(goal);
        tracing::debug!(goal = %self.symbols.display(goal), %level, "pushed goal");
        Ok(goal)
    }

    /// The goal at a given level, if the stack is that deep.
    pub fn goal_at(&self, level: GoalLevel) -> Option<SymbolId> {
        self.goals.get(level.0.checked_sub(1)? as usize).copied()
    }

    /// All goals at or above (numerically at most) the given level.
    pub fn goals_at_or_above(&self, level: GoalLevel) -> Vec<SymbolId> {
        self.goals
            .iter()
            .take(level.0 as usize)
            .copied()
            .collect()
    }

    /// The deepest goal, if any.
    pub fn current_goal(&self) -> Option<SymbolId> {
        self.goals.last().copied()
    }

    /// Depth of the goal stack.
    pub fn current_level(&self) -> GoalLevel {
        GoalLevel(self.goals.len().max(1) as u32)
    }

    /// Add an input WME (no creating preference).
    pub fn add_input_wme(
        &mut self,
        id: SymbolId,
        attr: SymbolId,
        value: SymbolId,
    ) -> SeshatResult<WmeId> {
        let level = self.symbols.level_of(id).ok_or_else(|| KernelError::BadConditionId {
            got: self.symbols.display(id),
        })?;
        Ok(self.wm.add(id, attr, value, level, None))
    }

    /// Apply a preference to working memory, recording it as the WME's
    /// creator so backtracing can follow the trace.
    pub fn apply_preference(&mut self, pref: PrefId) -> SeshatResult<WmeId> {
        let Some(p) = self.prefs.get(pref).cloned() else {
            return Err(KernelError::UnknownPreference { id: pref.0 }.into());
        };
        let level = self.symbols.level_of(p.id).unwrap_or(p.level);
        Ok(self.wm.add(p.id, p.attr, p.value, level, Some(pref)))
    }

    /// Submit a stored production to the match network.
    pub fn submit_production(
        &mut self,
        production: ProductionId,
        refracted: &[Condition],
    ) -> AddProductionOutcome {
        let Self {
            productions,
            rete,
            wm,
            symbols,
            ..
        } = self;
        match productions.get(production) {
            Some(prod) => rete.add_production(prod, refracted, wm, symbols),
            None => AddProductionOutcome::DidNotMatch,
        }
    }

    /// Remove a production from both the store and the network.
    pub fn excise_production(&mut self, production: ProductionId) {
        self.productions.excise(production);
        self.rete.excise(production);
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// A kernel plus its learner.
#[derive(Debug)]
pub struct Agent {
    pub kernel: Kernel,
    pub chunker: ExplanationBasedChunker,
}

impl Agent {
    /// Create an agent with the given learning settings.
    pub fn new(settings: ChunkSettings) -> Self {
        tracing::info!(
            enabled = settings.enabled,
            max_chunks = settings.max_chunks,
            "initializing seshat agent"
        );
        Self {
            kernel: Kernel::new(),
            chunker: ExplanationBasedChunker::new(settings),
        }
    }

    /// Push a goal onto the kernel's goal stack.
    pub fn push_goal(&mut self) -> SeshatResult<SymbolId> {
        self.kernel.push_goal()
    }

    /// Add an input WME.
    pub fn input_wme(
        &mut self,
        id: SymbolId,
        attr: SymbolId,
        value: SymbolId,
    ) -> SeshatResult<WmeId> {
        self.kernel.add_input_wme(id, attr, value)
    }

    /// Apply a preference to working memory.
    pub fn apply_preference(&mut self, pref: PrefId) -> SeshatResult<WmeId> {
        self.kernel.apply_preference(pref)
    }

    /// Start building a synthetic instantiation matching in `match_goal`.
    pub fn instantiation(&mut self, label: &str, match_goal: SymbolId) -> InstBuilder<'_> {
        let level = self
            .kernel
            .symbols
            .level_of(match_goal)
            .unwrap_or(GoalLevel::TOP);
        InstBuilder {
            agent: self,
            label: label.to_string(),
            match_goal,
            level,
            conditions: Vec::new(),
            actions: Vec::new(),
            keys: HashMap::new(),
            auto: HashMap::new(),
            error: None,
        }
    }

    /// Learn from an instantiation (and bottom-up from whatever that
    /// produces).
    pub fn learn_from(&mut self, inst: InstId) -> Vec<LearnResult> {
        self.chunker
            .learn_rule_from_instance(&mut self.kernel, inst)
    }

    /// Start a new decision cycle: reset per-cycle learning budgets.
    pub fn begin_cycle(&mut self) {
        self.chunker.begin_cycle();
    }

    /// Learning statistics.
    pub fn chunking_stats(&self) -> &ChunkStats {
        self.chunker.stats()
    }

    /// Render a learned production in `sp { ... }` form.
    pub fn render_production(&self, production: ProductionId) -> Option<String> {
        self.kernel
            .productions
            .get(production)
            .map(|p| p.render(&self.kernel.symbols))
    }
}

// ---------------------------------------------------------------------------
// Instantiation builder
// ---------------------------------------------------------------------------

struct PendingAction {
    kind: PreferenceKind,
    id: SymbolId,
    id_key: Option<String>,
    attr: SymbolId,
    attr_key: Option<String>,
    value: SymbolId,
    value_key: Option<String>,
    referent: Option<(SymbolId, Option<String>)>,
    o_supported: bool,
}

/// Fluent builder for synthetic instantiations.
///
/// Identity assignment mirrors what happens when a production fires: the
/// same named key (a stand-in for a rule variable) maps to one identity
/// within the firing; unkeyed identifier elements share an identity per
/// symbol; unkeyed constants stay literal.
pub struct InstBuilder<'a> {
    agent: &'a mut Agent,
    label: String,
    match_goal: SymbolId,
    level: GoalLevel,
    conditions: Vec<Condition>,
    actions: Vec<PendingAction>,
    keys: HashMap<String, IdentityId>,
    auto: HashMap<SymbolId, IdentityId>,
    error: Option<SeshatError>,
}

impl InstBuilder<'_> {
    fn identity_for(&mut self, sym: SymbolId, key: Option<&str>) -> Option<IdentityId> {
        let goal = self.match_goal;
        let result = match key {
            Some(k) => {
                if let Some(&id) = self.keys.get(k) {
                    Ok(Some(id))
                } else {
                    match self.agent.chunker.identities_mut().create(Some(goal)) {
                        Ok(id) => {
                            self.keys.insert(k.to_string(), id);
                            Ok(Some(id))
                        }
                        Err(e) => Err(e),
                    }
                }
            }
            None if self.agent.kernel.symbols.is_identifier(sym) => {
                if let Some(&id) = self.auto.get(&sym) {
                    Ok(Some(id))
                } else {
                    match self.agent.chunker.identities_mut().create(Some(goal)) {
                        Ok(id) => {
                            self.auto.insert(sym, id);
                            Ok(Some(id))
                        }
                        Err(e) => Err(e),
                    }
                }
            }
            None => Ok(None),
        };
        match result {
            Ok(Some(id)) => {
                if let Err(e) = self.agent.chunker.identities_mut().add_ref(id) {
                    self.error.get_or_insert(e);
                }
                Some(id)
            }
            Ok(None) => None,
            Err(e) => {
                self.error.get_or_insert(e);
                None
            }
        }
    }

    fn test_for(&mut self, sym: SymbolId, key: Option<&str>) -> Test {
        let identity = self.identity_for(sym, key);
        let mut test = Test::equality(sym);
        test.identity = identity;
        if self.agent.kernel.symbols.is_goal(sym) {
            test.goal_test = true;
        }
        if self.agent.kernel.symbols.is_impasse(sym) {
            test.impasse_test = true;
        }
        test
    }

    /// Add a positive condition matching a WME, with no named identity
    /// keys (identifiers still share auto-identities per symbol).
    pub fn cond(self, wme: WmeId) -> Self {
        self.cond_keyed(wme, None, None, None)
    }

    /// Add a positive condition matching a WME, naming identity keys for
    /// any of its three elements.
    pub fn cond_keyed(
        mut self,
        wme: WmeId,
        id_key: Option<&str>,
        attr_key: Option<&str>,
        value_key: Option<&str>,
    ) -> Self {
        let Some(w) = self.agent.kernel.wm.get(wme).cloned() else {
            self.error.get_or_insert_with(|| {
                KernelError::UnknownWme { timetag: wme.0 }.into()
            });
            return self;
        };
        let tests = TestTriple {
            id: self.test_for(w.id, id_key),
            attr: self.test_for(w.attr, attr_key),
            value: self.test_for(w.value, value_key),
        };
        self.conditions.push(Condition::Positive(PositiveCondition {
            tests,
            wme: Some(wme),
            producer: w.creator,
        }));
        self
    }

    /// Add a negative condition over the given triple.
    pub fn neg(mut self, id: SymbolId, attr: SymbolId, value: SymbolId) -> Self {
        let tests = TestTriple {
            id: self.test_for(id, None),
            attr: self.test_for(attr, None),
            value: self.test_for(value, None),
        };
        self.conditions.push(Condition::Negative(tests));
        self
    }

    /// Add a negated conjunction over the given triples.
    pub fn ncc(mut self, triples: &[(SymbolId, SymbolId, SymbolId)]) -> Self {
        let mut inner = Vec::with_capacity(triples.len());
        for &(id, attr, value) in triples {
            let tests = TestTriple {
                id: self.test_for(id, None),
                attr: self.test_for(attr, None),
                value: self.test_for(value, None),
            };
            inner.push(Condition::Positive(PositiveCondition {
                tests,
                wme: None,
                producer: None,
            }));
        }
        self.conditions.push(Condition::NegatedConjunction(inner));
        self
    }

    /// Attach a relational constraint to the value element of the last
    /// condition added.
    pub fn constrain_value(
        self,
        kind: ConstraintKind,
        referent: SymbolId,
    ) -> Self {
        self.constrain_value_keyed(kind, referent, None)
    }

    /// Attach a relational constraint whose referent carries a named
    /// identity key.
    pub fn constrain_value_keyed(
        mut self,
        kind: ConstraintKind,
        referent: SymbolId,
        referent_key: Option<&str>,
    ) -> Self {
        let identity = self.identity_for(referent, referent_key);
        match self.conditions.last_mut().and_then(|c| c.tests_mut()) {
            Some(tests) => tests.value.constraints.push(Constraint::Relational {
                kind,
                referent,
                identity,
            }),
            None => {
                self.error.get_or_insert_with(|| {
                    KernelError::BadConditionId {
                        got: "constraint before any condition".into(),
                    }
                    .into()
                });
            }
        }
        self
    }

    /// Add an action (generated preference) with no named keys.
    pub fn action(
        self,
        kind: PreferenceKind,
        id: SymbolId,
        attr: SymbolId,
        value: SymbolId,
        referent: Option<SymbolId>,
    ) -> Self {
        self.action_keyed(
            kind,
            (id, None),
            (attr, None),
            (value, None),
            referent.map(|r| (r, None)),
        )
    }

    /// Add an action naming identity keys for its elements.
    pub fn action_keyed(
        mut self,
        kind: PreferenceKind,
        id: (SymbolId, Option<&str>),
        attr: (SymbolId, Option<&str>),
        value: (SymbolId, Option<&str>),
        referent: Option<(SymbolId, Option<&str>)>,
    ) -> Self {
        self.actions.push(PendingAction {
            kind,
            id: id.0,
            id_key: id.1.map(str::to_string),
            attr: attr.0,
            attr_key: attr.1.map(str::to_string),
            value: value.0,
            value_key: value.1.map(str::to_string),
            referent: referent.map(|(r, k)| (r, k.map(str::to_string))),
            o_supported: false,
        });
        self
    }

    /// Mark the most recent action as operator-supported.
    pub fn o_support(mut self) -> Self {
        if let Some(action) = self.actions.last_mut() {
            action.o_supported = true;
        }
        self
    }

    /// Create the instantiation and its preferences.
    pub fn fire(mut self) -> SeshatResult<InstId> {
        // Resolve action identities before taking the actions out, so the
        // key map stays consistent with the conditions.
        let pending = std::mem::take(&mut self.actions);
        let mut resolved = Vec::with_capacity(pending.len());
        for action in pending {
            let id_ident = self.identity_for(action.id, action.id_key.as_deref());
            let attr_ident = self.identity_for(action.attr, action.attr_key.as_deref());
            let value_ident = self.identity_for(action.value, action.value_key.as_deref());
            let referent = match &action.referent {
                Some((r, k)) => Some((*r, self.identity_for(*r, k.as_deref()))),
                None => None,
            };
            resolved.push((action, id_ident, attr_ident, value_ident, referent));
        }

        if let Some(error) = self.error.take() {
            return Err(error);
        }

        let inst_id = self.agent.kernel.insts.next_id();
        let mut inst = Instantiation::new(
            inst_id,
            None,
            self.label.clone(),
            Some(self.match_goal),
            self.level,
        );
        inst.conditions = std::mem::take(&mut self.conditions);

        for (action, id_ident, attr_ident, value_ident, referent) in resolved {
            let pref = self.agent.kernel.prefs.add(Preference {
                kind: action.kind,
                id: action.id,
                attr: action.attr,
                value: action.value,
                referent: referent.as_ref().map(|(r, _)| *r),
                identities: IdentityQuad {
                    id: id_ident,
                    attr: attr_ident,
                    value: value_ident,
                    referent: referent.and_then(|(_, i)| i),
                },
                inst: Some(inst_id),
                level: self.level,
                o_supported: action.o_supported,
                clone_of: None,
            });
            inst.actions.push(pref);
        }

        tracing::debug!(
            inst = %inst_id,
            label = %inst.label,
            conditions = inst.conditions.len(),
            actions = inst.actions.len(),
            "fired instantiation"
        );
        Ok(self.agent.kernel.insts.add(inst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goal_stack_levels() {
        let mut kernel = Kernel::new();
        let s1 = kernel.push_goal().unwrap();
        let s2 = kernel.push_goal().unwrap();
        assert_eq!(kernel.symbols.level_of(s1), Some(GoalLevel::TOP));
        assert_eq!(kernel.symbols.level_of(s2), Some(GoalLevel(2)));
        assert_eq!(kernel.goal_at(GoalLevel::TOP), Some(s1));
        assert_eq!(kernel.goal_at(GoalLevel(2)), Some(s2));
        assert_eq!(kernel.goal_at(GoalLevel(3)), None);
        assert_eq!(kernel.goals_at_or_above(GoalLevel(1)), vec![s1]);
        assert_eq!(kernel.goals_at_or_above(GoalLevel(2)), vec![s1, s2]);
        assert_eq!(kernel.current_goal(), Some(s2));
    }

    #[test]
    fn input_wme_requires_identifier() {
        let mut kernel = Kernel::new();
        let s1 = kernel.push_goal().unwrap();
        let attr = kernel.symbols.make_str("a").unwrap();
        let v = kernel.symbols.make_int(1).unwrap();
        assert!(kernel.add_input_wme(s1, attr, v).is_ok());
        assert!(kernel.add_input_wme(v, attr, s1).is_err());
    }

    #[test]
    fn builder_wires_producer_from_wme_creator() {
        let mut agent = Agent::new(ChunkSettings::default());
        let _s1 = agent.push_goal().unwrap();
        let s2 = agent.push_goal().unwrap();
        let attr = agent.kernel.symbols.make_str("a").unwrap();
        let v = agent.kernel.symbols.make_int(1).unwrap();

        let first = agent
            .instantiation("producer", s2)
            .action(PreferenceKind::Acceptable, s2, attr, v, None)
            .fire()
            .unwrap();
        let pref = agent.kernel.insts.get(first).unwrap().actions[0];
        let wme = agent.apply_preference(pref).unwrap();

        let second = agent
            .instantiation("consumer", s2)
            .cond(wme)
            .fire()
            .unwrap();
        let inst = agent.kernel.insts.get(second).unwrap();
        match &inst.conditions[0] {
            Condition::Positive(pc) => {
                assert_eq!(pc.producer, Some(pref));
                assert_eq!(pc.wme, Some(wme));
            }
            other => panic!("expected positive condition, got {other:?}"),
        }
    }

    #[test]
    fn builder_shares_identities_by_key_and_symbol() {
        let mut agent = Agent::new(ChunkSettings::default());
        let s1 = agent.push_goal().unwrap();
        let attr = agent.kernel.symbols.make_str("a").unwrap();
        let v = agent.kernel.symbols.make_int(1).unwrap();
        let w1 = agent.input_wme(s1, attr, v).unwrap();
        let w2 = agent.input_wme(s1, attr, v).unwrap();

        let inst = agent
            .instantiation("share", s1)
            .cond_keyed(w1, None, None, Some("x"))
            .cond_keyed(w2, None, None, Some("x"))
            .fire()
            .unwrap();

        let inst = agent.kernel.insts.get(inst).unwrap();
        let (a, b) = match (&inst.conditions[0], &inst.conditions[1]) {
            (Condition::Positive(a), Condition::Positive(b)) => (a, b),
            other => panic!("expected positives, got {other:?}"),
        };
        // Same key → same identity; same identifier → same auto identity.
        assert_eq!(a.tests.value.identity, b.tests.value.identity);
        assert_eq!(a.tests.id.identity, b.tests.id.identity);
        assert!(a.tests.id.identity.is_some());
        // Goal identifiers get the goal test automatically.
        assert!(a.tests.id.goal_test);
    }

    #[test]
    fn builder_reports_unknown_wme_at_fire() {
        let mut agent = Agent::new(ChunkSettings::default());
        let s1 = agent.push_goal().unwrap();
        let result = agent
            .instantiation("broken", s1)
            .cond(WmeId(999))
            .fire();
        assert!(result.is_err());
    }

    #[test]
    fn constants_stay_literal_without_keys() {
        let mut agent = Agent::new(ChunkSettings::default());
        let s1 = agent.push_goal().unwrap();
        let attr = agent.kernel.symbols.make_str("a").unwrap();
        let v = agent.kernel.symbols.make_int(1).unwrap();
        let wme = agent.input_wme(s1, attr, v).unwrap();

        let inst = agent.instantiation("literal", s1).cond(wme).fire().unwrap();
        let inst = agent.kernel.insts.get(inst).unwrap();
        match &inst.conditions[0] {
            Condition::Positive(pc) => {
                assert!(pc.tests.attr.identity.is_none());
                assert!(pc.tests.value.identity.is_none());
                assert!(pc.tests.id.identity.is_some());
            }
            other => panic!("expected positive condition, got {other:?}"),
        }
    }
}
