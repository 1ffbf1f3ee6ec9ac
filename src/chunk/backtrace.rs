//! Backtracing: the backward dependency walk.
//!
//! Starting from each result preference, the backtracer walks the chain of
//! instantiations that produced it and classifies every condition it
//! encounters:
//!
//! - **grounds** — positive conditions whose identifier is at or above the
//!   grounds level (operational; usable in the new rule),
//! - **locals** — positive conditions local to the substate, traced
//!   further through the preferences that created their WMEs,
//! - **negated** — negative/NCC conditions, deferred and deduplicated by
//!   structural hash, added at the end only if connected to the grounds.
//!
//! Locals without a producing trace become *potentials*: grounded through
//! the closure of the grounds if reachable, otherwise literalized and
//! dropped. Goal/impasse locals are discarded with the quiescence flag.
//! Backtracing never raises a hard error; correctness concerns set flags
//! that later downgrade the rule to a justification.

use crate::condition::{Condition, PositiveCondition, TestTriple};
use crate::error::SeshatResult;
use crate::identity::IdentityGraph;
use crate::instantiation::InstId;
use crate::kernel::Kernel;
use crate::memory::PrefId;

use super::stats::ChunkStats;
use super::{ChunkSettings, ChunkingContext};

/// One backtracing pass over a trace, borrowing the chunker's shared state.
pub(crate) struct Backtracer<'a> {
    pub kernel: &'a mut Kernel,
    pub identities: &'a mut IdentityGraph,
    pub settings: &'a ChunkSettings,
    pub stats: &'a mut ChunkStats,
    pub ctx: &'a mut ChunkingContext,
}

impl Backtracer<'_> {
    /// Backtrace from one result preference.
    pub fn trace_result(&mut self, pref: PrefId) -> SeshatResult<()> {
        self.unify_clone_chain(pref)?;
        let producer = self.kernel.prefs.get(pref).and_then(|p| p.inst);
        match producer {
            Some(inst) => self.trace_instantiation(inst),
            // Architectural preferences have no trace to follow.
            None => Ok(()),
        }
    }

    /// The condition matched a WME a preference created; the condition's
    /// element identities and the preference's must variablize identically.
    fn unify_condition_with_preference(
        &mut self,
        local: &PositiveCondition,
        pref: PrefId,
    ) -> SeshatResult<()> {
        let Some(quad) = self.kernel.prefs.get(pref).map(|p| p.identities) else {
            return Ok(());
        };
        for (a, b) in [
            (local.tests.id.identity, quad.id),
            (local.tests.attr.identity, quad.attr),
            (local.tests.value.identity, quad.value),
        ] {
            if let (Some(a), Some(b)) = (a, b) {
                self.identities.join(a, b)?;
            }
        }
        Ok(())
    }

    /// Two-phase identity propagation: before tracing into the producing
    /// instantiation, unify the preference's identities with those of the
    /// preference it was cloned from, so both sides of the clone boundary
    /// variablize identically.
    fn unify_clone_chain(&mut self, pref: PrefId) -> SeshatResult<()> {
        let mut current = pref;
        while let Some((base, quads)) = self.kernel.prefs.get(current).and_then(|p| {
            let base = p.clone_of?;
            let base_pref = self.kernel.prefs.get(base)?;
            Some((base, (p.identities, base_pref.identities)))
        }) {
            let (ours, theirs) = quads;
            for (a, b) in [
                (ours.id, theirs.id),
                (ours.attr, theirs.attr),
                (ours.value, theirs.value),
                (ours.referent, theirs.referent),
            ] {
                if let (Some(a), Some(b)) = (a, b) {
                    self.identities.join(a, b)?;
                }
            }
            current = base;
        }
        Ok(())
    }

    /// Walk one instantiation's conditions, once per attempt.
    fn trace_instantiation(&mut self, inst_id: InstId) -> SeshatResult<()> {
        let inst = self.kernel.insts.get_mut(inst_id)?;
        if inst.backtrace_num == self.ctx.backtrace_num {
            return Ok(());
        }
        inst.backtrace_num = self.ctx.backtrace_num;

        self.ctx.tested_quiescence |= inst.tested_quiescence;
        self.ctx.tested_local_negation |= inst.tested_local_negation;
        self.ctx.tested_ltm_recall |= inst.tested_ltm_recall;

        tracing::debug!(inst = %inst_id, label = %inst.label, "backtracing instantiation");
        let conditions = inst.conditions.clone();
        for condition in conditions {
            self.classify(condition)?;
        }
        Ok(())
    }

    /// Route a condition to grounds, locals, or the negated set.
    fn classify(&mut self, condition: Condition) -> SeshatResult<()> {
        match condition {
            Condition::Positive(pc) => {
                if self.is_operational(&pc.tests) {
                    self.add_to_grounds(pc)
                } else {
                    self.ctx.locals.push(pc);
                    Ok(())
                }
            }
            Condition::Negative(tests) => {
                self.note_negation_locality(&tests);
                self.defer_negated(Condition::Negative(tests));
                Ok(())
            }
            Condition::NegatedConjunction(conds) => {
                for inner in &conds {
                    if let Some(tests) = inner.tests() {
                        self.note_negation_locality(tests);
                    }
                }
                self.defer_negated(Condition::NegatedConjunction(conds));
                Ok(())
            }
        }
    }

    fn is_operational(&self, tests: &TestTriple) -> bool {
        self.kernel
            .symbols
            .level_of(tests.id.sym)
            .is_some_and(|level| level <= self.ctx.grounds_level)
    }

    fn note_negation_locality(&mut self, tests: &TestTriple) {
        let local = self
            .kernel
            .symbols
            .level_of(tests.id.sym)
            .is_some_and(|level| level > self.ctx.grounds_level);
        if local {
            self.ctx.tested_local_negation = true;
            if !self.settings.allow_local_negations {
                tracing::debug!("local negation with local negations disallowed");
            }
        }
    }

    fn defer_negated(&mut self, condition: Condition) {
        let hash = condition.structural_hash();
        if self.ctx.negated_hashes.insert(hash) {
            self.ctx.negated.push(condition);
        }
    }

    /// Add a positive condition to the grounds, unifying identities when
    /// the same WME (or a declared singleton pattern) was grounded before,
    /// and harvesting its relational constraints into the cache.
    fn add_to_grounds(&mut self, mut pc: PositiveCondition) -> SeshatResult<()> {
        if let Some(wme) = pc.wme {
            if let Some(&prev) = self.ctx.seen_wmes.get(&wme) {
                // Same WME reached through a different path: the two
                // conditions' generalizations must agree, the value
                // elements above all.
                self.unify_ground_pair(prev, &pc)?;
                self.stats.singleton_unifications += 1;
                return Ok(());
            }
        }

        // Declared singleton patterns unify across distinct WMEs too.
        let singleton = self.settings.unify_all
            || self.ctx.singleton_attrs.contains(&pc.tests.attr.sym);
        if singleton {
            let same_slot = self.ctx.grounds.iter().position(|g| {
                g.tests.id.sym == pc.tests.id.sym && g.tests.attr.sym == pc.tests.attr.sym
            });
            if let Some(prev) = same_slot {
                self.unify_ground_pair(prev, &pc)?;
                self.stats.singleton_unifications += 1;
            }
        }

        self.ctx.constraint_cache.collect(&mut pc.tests, self.identities)?;

        let index = self.ctx.grounds.len();
        for test in [&pc.tests.id, &pc.tests.attr, &pc.tests.value] {
            if let Some(identity) = test.identity {
                self.identities.set_operational_cond(identity, index)?;
            }
        }
        if let Some(wme) = pc.wme {
            self.ctx.seen_wmes.insert(wme, index);
        }
        tracing::trace!(index, "condition added to grounds");
        self.ctx.grounds.push(pc);
        Ok(())
    }

    fn unify_ground_pair(&mut self, prev: usize, pc: &PositiveCondition) -> SeshatResult<()> {
        let existing = self.ctx.grounds[prev].tests.clone();
        for (a, b) in [
            (existing.id.identity, pc.tests.id.identity),
            (existing.attr.identity, pc.tests.attr.identity),
            (existing.value.identity, pc.tests.value.identity),
        ] {
            if let (Some(a), Some(b)) = (a, b) {
                self.identities.join(a, b)?;
            }
        }
        Ok(())
    }

    /// Drain the locals worklist, tracing each through the preference that
    /// created its WME, until quiescent; then resolve potentials.
    pub fn trace_locals(&mut self) -> SeshatResult<()> {
        while let Some(local) = self.ctx.locals.pop() {
            let id_sym = local.tests.id.sym;

            if let Some(producer) = local.producer {
                self.unify_condition_with_preference(&local, producer)?;
                self.unify_clone_chain(producer)?;
                match self.kernel.prefs.get(producer).and_then(|p| p.inst) {
                    Some(inst) => {
                        self.trace_instantiation(inst)?;
                        continue;
                    }
                    None => {
                        self.ctx.potentials.push(local);
                        continue;
                    }
                }
            }

            // No recorded trace: look for supporting preferences in the
            // preference store. With OSK enabled every supporting
            // preference is traced; otherwise the first is enough.
            let supports: Vec<PrefId> = self
                .kernel
                .prefs
                .supporting(id_sym, local.tests.attr.sym, local.tests.value.sym)
                .into_iter()
                .filter(|&p| {
                    self.kernel
                        .prefs
                        .get(p)
                        .is_some_and(|pref| pref.inst.is_some())
                })
                .collect();
            if !supports.is_empty() {
                if self.settings.add_osk {
                    for p in supports {
                        self.unify_condition_with_preference(&local, p)?;
                        self.unify_clone_chain(p)?;
                        if let Some(inst) = self.kernel.prefs.get(p).and_then(|x| x.inst) {
                            self.trace_instantiation(inst)?;
                        }
                    }
                } else {
                    let p = supports[0];
                    self.unify_condition_with_preference(&local, p)?;
                    self.unify_clone_chain(p)?;
                    if let Some(inst) = self.kernel.prefs.get(p).and_then(|x| x.inst) {
                        self.trace_instantiation(inst)?;
                    }
                }
                continue;
            }

            // Untraceable local on a goal/impasse augmentation: the
            // substate existed only because of the impasse, so this can
            // never be grounded. Discard, flag.
            if self.kernel.symbols.is_goal(id_sym) || self.kernel.symbols.is_impasse(id_sym) {
                self.ctx.tested_quiescence = true;
                tracing::debug!("discarding goal/impasse local; quiescence tested");
                continue;
            }

            // Structure recalled opaquely from long-term memory has no
            // explainable trace.
            if self.kernel.symbols.is_long_term(id_sym) {
                self.ctx.tested_ltm_recall = true;
                if !self.settings.allow_opaque_recall {
                    tracing::debug!("opaque LTM recall with recall disallowed");
                    continue;
                }
            }

            self.ctx.potentials.push(local);
        }

        self.resolve_potentials()?;

        // Grounding a potential cannot spawn new locals, but tracing an
        // architectural support can; drain again if needed.
        if !self.ctx.locals.is_empty() {
            return self.trace_locals();
        }
        Ok(())
    }

    /// Grounded potentials join the grounds through the closure; the rest
    /// are literalized and dropped.
    fn resolve_potentials(&mut self) -> SeshatResult<()> {
        let mut progress = true;
        while progress {
            progress = false;
            let pending = std::mem::take(&mut self.ctx.potentials);
            for pot in pending {
                if self.reachable_from_grounds(pot.tests.id.sym) {
                    self.stats.grounded_potentials += 1;
                    self.add_to_grounds(pot)?;
                    progress = true;
                } else {
                    self.ctx.potentials.push(pot);
                }
            }
        }

        for pot in std::mem::take(&mut self.ctx.potentials) {
            for test in [&pot.tests.id, &pot.tests.attr, &pot.tests.value] {
                if let Some(identity) = test.identity {
                    self.identities.literalize(identity)?;
                }
            }
            self.stats.ungrounded_potentials += 1;
            tracing::debug!(
                id = %self.kernel.symbols.display(pot.tests.id.sym),
                "dropping ungrounded potential"
            );
        }
        Ok(())
    }

    fn reachable_from_grounds(&self, sym: crate::symbol::SymbolId) -> bool {
        self.ctx
            .grounds
            .iter()
            .any(|g| g.tests.id.sym == sym || g.tests.value.sym == sym)
    }

    /// Resolve the deferred negated conditions: those connected to the
    /// grounds (sharing an identifier with them) survive; the rest are
    /// dropped.
    pub fn connected_negated(&mut self) -> Vec<Condition> {
        let negated = std::mem::take(&mut self.ctx.negated);
        let mut kept = Vec::new();
        for cond in negated {
            let connected = match &cond {
                Condition::Negative(tests) => self.reachable_from_grounds(tests.id.sym),
                Condition::NegatedConjunction(inner) => inner.iter().any(|c| {
                    c.tests()
                        .map(|t| self.reachable_from_grounds(t.id.sym))
                        .unwrap_or(false)
                }),
                Condition::Positive(_) => false,
            };
            if connected {
                kept.push(cond);
            } else {
                tracing::debug!("dropping negated condition not connected to grounds");
            }
        }
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkingContext;
    use crate::chunk::settings::ChunkSettings;
    use crate::kernel::Agent;
    use crate::memory::PreferenceKind;
    use crate::symbol::GoalLevel;

    /// Drive a backtrace directly over a hand-built trace.
    fn run_backtrace(agent: &mut Agent, inst: InstId) -> (ChunkingContext, ChunkStats) {
        let mut ctx = ChunkingContext::new(GoalLevel::TOP, 1);
        let mut stats = ChunkStats::default();
        let settings = ChunkSettings::default();
        let inst_data = agent.kernel.insts.get(inst).unwrap().clone();
        let results =
            crate::chunk::results::collect_results(&agent.kernel, &inst_data);
        ctx.results = results.clone();
        {
            let mut bt = Backtracer {
                kernel: &mut agent.kernel,
                identities: agent.chunker.identities_mut(),
                settings: &settings,
                stats: &mut stats,
                ctx: &mut ctx,
            };
            for r in results {
                bt.trace_result(r).unwrap();
            }
            bt.trace_locals().unwrap();
        }
        (ctx, stats)
    }

    #[test]
    fn operational_condition_becomes_ground() {
        let mut agent = Agent::new(ChunkSettings::default());
        let s1 = agent.push_goal().unwrap();
        let s2 = agent.push_goal().unwrap();
        let target = agent.kernel.symbols.make_str("target").unwrap();
        let result = agent.kernel.symbols.make_str("result").unwrap();
        let v = agent.kernel.symbols.make_int(42).unwrap();
        let wme = agent.input_wme(s1, target, v).unwrap();

        let inst = agent
            .instantiation("copy-down", s2)
            .cond(wme)
            .action(PreferenceKind::Acceptable, s1, result, v, None)
            .fire()
            .unwrap();

        let (ctx, _) = run_backtrace(&mut agent, inst);
        assert_eq!(ctx.grounds.len(), 1);
        assert!(ctx.locals.is_empty());
        assert!(ctx.potentials.is_empty());
        assert!(!ctx.tested_quiescence);
    }

    #[test]
    fn local_condition_is_traced_to_its_producer() {
        let mut agent = Agent::new(ChunkSettings::default());
        let s1 = agent.push_goal().unwrap();
        let s2 = agent.push_goal().unwrap();
        let target = agent.kernel.symbols.make_str("target").unwrap();
        let scratch = agent.kernel.symbols.make_str("scratch").unwrap();
        let result = agent.kernel.symbols.make_str("result").unwrap();
        let v = agent.kernel.symbols.make_int(5).unwrap();
        let input = agent.input_wme(s1, target, v).unwrap();

        // First firing: derive local structure from the input.
        let first = agent
            .instantiation("derive", s2)
            .cond_keyed(input, None, None, Some("v"))
            .action_keyed(
                PreferenceKind::Acceptable,
                (s2, None),
                (scratch, None),
                (v, Some("v")),
                None,
            )
            .fire()
            .unwrap();
        let scratch_pref = agent.kernel.insts.get(first).unwrap().actions[0];
        let scratch_wme = agent.apply_preference(scratch_pref).unwrap();

        // Second firing: return the local structure as a result.
        let second = agent
            .instantiation("return", s2)
            .cond_keyed(scratch_wme, None, None, Some("v"))
            .action_keyed(
                PreferenceKind::Acceptable,
                (s1, None),
                (result, None),
                (v, Some("v")),
                None,
            )
            .fire()
            .unwrap();

        let (ctx, _) = run_backtrace(&mut agent, second);
        // The local (s2 ^scratch v) was traced through `derive`, whose
        // input condition is operational.
        assert_eq!(ctx.grounds.len(), 1);
        assert_eq!(
            ctx.grounds[0].tests.id.sym, s1,
            "the ground is the original input condition"
        );
        assert!(ctx.potentials.is_empty());
    }

    #[test]
    fn same_wme_grounded_twice_joins_value_identities() {
        let mut agent = Agent::new(ChunkSettings::default());
        let s1 = agent.push_goal().unwrap();
        let s2 = agent.push_goal().unwrap();
        let target = agent.kernel.symbols.make_str("target").unwrap();
        let result = agent.kernel.symbols.make_str("result").unwrap();
        let v = agent.kernel.symbols.make_int(3).unwrap();
        let wme = agent.input_wme(s1, target, v).unwrap();

        // Two independent firings match the same WME with distinct
        // identities and both contribute results.
        let inst = agent
            .instantiation("two-paths", s2)
            .cond_keyed(wme, None, None, Some("a"))
            .cond_keyed(wme, None, None, Some("b"))
            .action_keyed(
                PreferenceKind::Acceptable,
                (s1, None),
                (result, None),
                (v, Some("a")),
                None,
            )
            .fire()
            .unwrap();

        let inst_data = agent.kernel.insts.get(inst).unwrap().clone();
        let (a_ident, b_ident) = match (&inst_data.conditions[0], &inst_data.conditions[1]) {
            (Condition::Positive(a), Condition::Positive(b)) => (
                a.tests.value.identity.unwrap(),
                b.tests.value.identity.unwrap(),
            ),
            other => panic!("expected two positive conditions, got {other:?}"),
        };

        let (ctx, stats) = run_backtrace(&mut agent, inst);
        assert_eq!(ctx.grounds.len(), 1, "second match of the WME is unified");
        assert_eq!(stats.singleton_unifications, 1);
        let ids = agent.chunker.identities();
        assert_eq!(
            ids.resolve(a_ident).unwrap(),
            ids.resolve(b_ident).unwrap(),
            "value identities must share a root"
        );
    }

    #[test]
    fn goal_local_sets_quiescence_flag() {
        let mut agent = Agent::new(ChunkSettings::default());
        let s1 = agent.push_goal().unwrap();
        let s2 = agent.push_goal().unwrap();
        let quiescence = agent.kernel.symbols.make_str("quiescence").unwrap();
        let t = agent.kernel.symbols.make_str("t").unwrap();
        let result = agent.kernel.symbols.make_str("result").unwrap();
        let v = agent.kernel.symbols.make_int(1).unwrap();
        // An architectural augmentation of the subgoal itself.
        let arch = agent.kernel.wm.add(s2, quiescence, t, GoalLevel(2), None);

        let inst = agent
            .instantiation("test-quiescence", s2)
            .cond(arch)
            .action(PreferenceKind::Acceptable, s1, result, v, None)
            .fire()
            .unwrap();

        let (ctx, _) = run_backtrace(&mut agent, inst);
        assert!(ctx.tested_quiescence);
        assert!(ctx.grounds.is_empty());
    }

    #[test]
    fn untraceable_local_is_literalized_and_dropped() {
        let mut agent = Agent::new(ChunkSettings::default());
        let s1 = agent.push_goal().unwrap();
        let s2 = agent.push_goal().unwrap();
        let result = agent.kernel.symbols.make_str("result").unwrap();
        let note = agent.kernel.symbols.make_str("note").unwrap();
        let v = agent.kernel.symbols.make_int(1).unwrap();
        // Local structure on a non-goal identifier with no producing
        // preference and no connection to any ground.
        let island = agent
            .kernel
            .symbols
            .make_identifier('X', GoalLevel(2))
            .unwrap();
        let wme = agent.kernel.wm.add(island, note, v, GoalLevel(2), None);

        let inst = agent
            .instantiation("match-island", s2)
            .cond_keyed(wme, None, None, Some("v"))
            .action_keyed(
                PreferenceKind::Acceptable,
                (s1, None),
                (result, None),
                (v, Some("v")),
                None,
            )
            .fire()
            .unwrap();

        let inst_data = agent.kernel.insts.get(inst).unwrap().clone();
        let value_ident = match &inst_data.conditions[0] {
            Condition::Positive(pc) => pc.tests.value.identity.unwrap(),
            other => panic!("expected positive condition, got {other:?}"),
        };

        let (ctx, stats) = run_backtrace(&mut agent, inst);
        assert!(ctx.grounds.is_empty());
        assert_eq!(stats.ungrounded_potentials, 1);
        assert!(
            agent.chunker.identities().is_literalized(value_ident).unwrap(),
            "identities of dropped potentials are literalized"
        );
    }

    #[test]
    fn local_negation_sets_flag() {
        let mut agent = Agent::new(ChunkSettings::default());
        let s1 = agent.push_goal().unwrap();
        let s2 = agent.push_goal().unwrap();
        let target = agent.kernel.symbols.make_str("target").unwrap();
        let blocked = agent.kernel.symbols.make_str("blocked").unwrap();
        let result = agent.kernel.symbols.make_str("result").unwrap();
        let v = agent.kernel.symbols.make_int(1).unwrap();
        let wme = agent.input_wme(s1, target, v).unwrap();

        let inst = agent
            .instantiation("unless-blocked", s2)
            .cond(wme)
            .neg(s2, blocked, v)
            .action(PreferenceKind::Acceptable, s1, result, v, None)
            .fire()
            .unwrap();

        let (ctx, _) = run_backtrace(&mut agent, inst);
        assert!(ctx.tested_local_negation);
        assert_eq!(ctx.negated.len(), 1);
    }

    #[test]
    fn negated_conditions_deduplicate_by_structure() {
        let mut agent = Agent::new(ChunkSettings::default());
        let s1 = agent.push_goal().unwrap();
        let s2 = agent.push_goal().unwrap();
        let target = agent.kernel.symbols.make_str("target").unwrap();
        let blocked = agent.kernel.symbols.make_str("blocked").unwrap();
        let result = agent.kernel.symbols.make_str("result").unwrap();
        let v = agent.kernel.symbols.make_int(1).unwrap();
        let wme = agent.input_wme(s1, target, v).unwrap();

        let inst = agent
            .instantiation("doubly-negated", s2)
            .cond(wme)
            .neg(s1, blocked, v)
            .neg(s1, blocked, v)
            .action(PreferenceKind::Acceptable, s1, result, v, None)
            .fire()
            .unwrap();

        let (mut ctx, _) = run_backtrace(&mut agent, inst);
        assert_eq!(ctx.negated.len(), 1, "structural duplicates collapse");

        // And the surviving negation is connected to the grounds.
        let settings = ChunkSettings::default();
        let mut stats = ChunkStats::default();
        let mut bt = Backtracer {
            kernel: &mut agent.kernel,
            identities: agent.chunker.identities_mut(),
            settings: &settings,
            stats: &mut stats,
            ctx: &mut ctx,
        };
        let kept = bt.connected_negated();
        assert_eq!(kept.len(), 1);
    }
}
