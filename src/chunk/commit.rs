//! Committing a built rule to the kernel and match network.
//!
//! The variablized rule is submitted together with its refracted
//! instantiated condition list (structurally parallel, so the network can
//! verify the rule re-derives its own provenance). On a match, a chunk
//! instantiation is created: it owns remapped clone identities and cloned
//! result preferences, so retracting the base instantiation later cannot
//! retract the learned rule's effects. Duplicates discard the new
//! production and keep the existing one; a justification whose refraction
//! fails is excised on the spot.

use crate::condition::Condition;
use crate::error::SeshatResult;
use crate::identity::IdentityGraph;
use crate::instantiation::{InstId, Instantiation};
use crate::kernel::Kernel;
use crate::memory::{IdentityQuad, PrefId, Preference};
use crate::production::{ProductionId, ProductionType};
use crate::rete::AddProductionOutcome;
use crate::symbol::GoalLevel;

use super::variablize::BuiltRule;

/// What happened when the rule was committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Rule added and matched; a chunk instantiation exists.
    Matched,
    /// An identical production already existed; the new one was discarded.
    Duplicate(ProductionId),
    /// A chunk that failed refraction but is kept anyway.
    ChunkKeptWithoutMatch,
    /// A justification that failed refraction and was excised.
    JustificationExcised,
}

/// Result of a commit.
#[derive(Debug)]
pub(crate) struct CommitOutcome {
    pub production: ProductionId,
    pub disposition: Disposition,
    pub chunk_inst: Option<InstId>,
}

/// Insert the production, submit it to the match network, and on success
/// build the chunk's own instantiation.
pub(crate) fn commit_rule(
    kernel: &mut Kernel,
    identities: &mut IdentityGraph,
    name: String,
    ptype: ProductionType,
    built: BuiltRule,
    results: &[PrefId],
    grounds_level: GoalLevel,
) -> SeshatResult<CommitOutcome> {
    if name.is_empty() {
        return Err(crate::error::ChunkError::MissingProductionName.into());
    }
    let production = kernel.productions.insert(
        name.clone(),
        ptype,
        built.variablized,
        built.actions,
    );

    let outcome = kernel.submit_production(production, &built.instantiated);
    match outcome {
        AddProductionOutcome::Duplicate(existing) => {
            // Discard the new production but keep using the existing one:
            // the instantiation is still created, so bottom-up learning
            // continues through it.
            kernel.excise_production(production);
            let label = kernel
                .productions
                .get(existing)
                .map(|p| p.name.clone())
                .unwrap_or(name.clone());
            let chunk_inst = build_chunk_instantiation(
                kernel,
                identities,
                existing,
                &label,
                built.instantiated,
                results,
                grounds_level,
            )?;
            tracing::info!(name = %name, existing = %existing, "discarded duplicate production");
            Ok(CommitOutcome {
                production: existing,
                disposition: Disposition::Duplicate(existing),
                chunk_inst: Some(chunk_inst),
            })
        }
        AddProductionOutcome::DidNotMatch => {
            if ptype == ProductionType::Justification {
                kernel.excise_production(production);
                Ok(CommitOutcome {
                    production,
                    disposition: Disposition::JustificationExcised,
                    chunk_inst: None,
                })
            } else {
                tracing::warn!(
                    name = %name,
                    "chunk's refracted instantiation did not match; keeping rule"
                );
                Ok(CommitOutcome {
                    production,
                    disposition: Disposition::ChunkKeptWithoutMatch,
                    chunk_inst: None,
                })
            }
        }
        AddProductionOutcome::Matched => {
            let chunk_inst =
                build_chunk_instantiation(kernel, identities, production, &name, built.instantiated, results, grounds_level)?;
            tracing::info!(name = %name, kind = %ptype, inst = %chunk_inst, "learned rule committed");
            Ok(CommitOutcome {
                production,
                disposition: Disposition::Matched,
                chunk_inst: Some(chunk_inst),
            })
        }
    }
}

/// Create the new rule's own instantiation: remapped clone identities and
/// cloned result preferences.
fn build_chunk_instantiation(
    kernel: &mut Kernel,
    identities: &mut IdentityGraph,
    production: ProductionId,
    name: &str,
    mut conditions: Vec<Condition>,
    results: &[PrefId],
    grounds_level: GoalLevel,
) -> SeshatResult<InstId> {
    // Fresh identity space for the new instantiation.
    for cond in &mut conditions {
        remap_condition_identities(cond, identities)?;
    }

    let inst_id = kernel.insts.next_id();
    let match_goal = kernel.goal_at(grounds_level);
    let mut inst = Instantiation::new(
        inst_id,
        Some(production),
        name,
        match_goal,
        grounds_level,
    );
    inst.conditions = conditions;

    for &result in results {
        let Some(original) = kernel.prefs.get(result).cloned() else { continue };
        let identities_quad = IdentityQuad {
            id: remap_identity(original.identities.id, identities)?,
            attr: remap_identity(original.identities.attr, identities)?,
            value: remap_identity(original.identities.value, identities)?,
            referent: remap_identity(original.identities.referent, identities)?,
        };
        let clone = kernel.prefs.add(Preference {
            kind: original.kind,
            id: original.id,
            attr: original.attr,
            value: original.value,
            referent: original.referent,
            identities: identities_quad,
            inst: Some(inst_id),
            level: grounds_level,
            o_supported: original.o_supported,
            clone_of: Some(result),
        });
        inst.actions.push(clone);
    }

    Ok(kernel.insts.add(inst))
}

fn remap_condition_identities(
    cond: &mut Condition,
    identities: &mut IdentityGraph,
) -> SeshatResult<()> {
    match cond {
        Condition::Positive(pc) => {
            for test in [&mut pc.tests.id, &mut pc.tests.attr, &mut pc.tests.value] {
                test.identity = remap_identity(test.identity, identities)?;
            }
        }
        Condition::Negative(tests) => {
            for test in [&mut tests.id, &mut tests.attr, &mut tests.value] {
                test.identity = remap_identity(test.identity, identities)?;
            }
        }
        Condition::NegatedConjunction(inner) => {
            for c in inner {
                remap_condition_identities(c, identities)?;
            }
        }
    }
    Ok(())
}

fn remap_identity(
    identity: Option<crate::identity::IdentityId>,
    identities: &mut IdentityGraph,
) -> SeshatResult<Option<crate::identity::IdentityId>> {
    match identity {
        Some(original) if identities.is_live(original) => {
            let clone = identities.clone_identity(original)?;
            identities.add_ref(clone)?;
            Ok(Some(clone))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkSettings;
    use crate::condition::{PositiveCondition, TestTriple};
    use crate::kernel::Agent;
    use crate::memory::PreferenceKind;
    use crate::production::Action;

    /// Hand-assemble a tiny BuiltRule over one WME.
    fn one_condition_rule(agent: &mut Agent) -> (BuiltRule, Vec<PrefId>) {
        let s1 = agent.push_goal().unwrap();
        let s2 = agent.push_goal().unwrap();
        let target = agent.kernel.symbols.make_str("target").unwrap();
        let result = agent.kernel.symbols.make_str("result").unwrap();
        let v = agent.kernel.symbols.make_int(42).unwrap();
        let wme = agent.input_wme(s1, target, v).unwrap();

        let inst = agent
            .instantiation("producer", s2)
            .cond(wme)
            .action(PreferenceKind::Acceptable, s1, result, v, None)
            .fire()
            .unwrap();
        let results = agent.kernel.insts.get(inst).unwrap().actions.clone();

        let sv = agent.kernel.symbols.make_variable("s1").unwrap();
        let mut var_tests = TestTriple::equality(sv, target, v);
        var_tests.id.goal_test = true;
        let mut inst_tests = TestTriple::equality(s1, target, v);
        inst_tests.id.goal_test = true;
        let built = BuiltRule {
            variablized: vec![Condition::positive(var_tests)],
            instantiated: vec![Condition::Positive(PositiveCondition {
                tests: inst_tests,
                wme: Some(wme),
                producer: None,
            })],
            actions: vec![Action {
                kind: PreferenceKind::Acceptable,
                id: sv,
                attr: result,
                value: v,
                referent: None,
                identities: IdentityQuad::default(),
            }],
        };
        (built, results)
    }

    #[test]
    fn matched_commit_creates_chunk_instantiation() {
        let mut agent = Agent::new(ChunkSettings::default());
        let (built, results) = one_condition_rule(&mut agent);

        let outcome = commit_rule(
            &mut agent.kernel,
            agent.chunker.identities_mut(),
            "chunk-1".into(),
            ProductionType::Chunk,
            built,
            &results,
            GoalLevel::TOP,
        )
        .unwrap();

        assert_eq!(outcome.disposition, Disposition::Matched);
        let inst_id = outcome.chunk_inst.unwrap();
        let inst = agent.kernel.insts.get(inst_id).unwrap();
        assert_eq!(inst.match_level, GoalLevel::TOP);
        assert_eq!(inst.actions.len(), 1);

        // The cloned preference is independently owned.
        let cloned = agent.kernel.prefs.get(inst.actions[0]).unwrap();
        assert_eq!(cloned.clone_of, Some(results[0]));
        assert_eq!(cloned.inst, Some(inst_id));
        assert_eq!(cloned.level, GoalLevel::TOP);
        assert!(agent.kernel.productions.get(outcome.production).is_some());
    }

    #[test]
    fn duplicate_commit_discards_new_production() {
        let mut agent = Agent::new(ChunkSettings::default());
        let (built, results) = one_condition_rule(&mut agent);

        let first = commit_rule(
            &mut agent.kernel,
            agent.chunker.identities_mut(),
            "chunk-1".into(),
            ProductionType::Chunk,
            built,
            &results,
            GoalLevel::TOP,
        )
        .unwrap();
        assert_eq!(first.disposition, Disposition::Matched);

        // Rebuild the same rule under a new name.
        let (built2, results2) = {
            let sv = agent.kernel.symbols.make_variable("s1").unwrap();
            let target = agent.kernel.symbols.make_str("target").unwrap();
            let result = agent.kernel.symbols.make_str("result").unwrap();
            let v = agent.kernel.symbols.make_int(42).unwrap();
            let s1 = agent.kernel.goal_at(GoalLevel::TOP).unwrap();
            let wme = agent.kernel.wm.find(s1, target, v).unwrap();
            let mut var_tests = TestTriple::equality(sv, target, v);
            var_tests.id.goal_test = true;
            let mut inst_tests = TestTriple::equality(s1, target, v);
            inst_tests.id.goal_test = true;
            (
                BuiltRule {
                    variablized: vec![Condition::positive(var_tests)],
                    instantiated: vec![Condition::Positive(PositiveCondition {
                        tests: inst_tests,
                        wme: Some(wme),
                        producer: None,
                    })],
                    actions: vec![Action {
                        kind: PreferenceKind::Acceptable,
                        id: sv,
                        attr: result,
                        value: v,
                        referent: None,
                        identities: IdentityQuad::default(),
                    }],
                },
                results,
            )
        };

        let before = agent.kernel.productions.len();
        let second = commit_rule(
            &mut agent.kernel,
            agent.chunker.identities_mut(),
            "chunk-2".into(),
            ProductionType::Chunk,
            built2,
            &results2,
            GoalLevel::TOP,
        )
        .unwrap();

        assert_eq!(
            second.disposition,
            Disposition::Duplicate(first.production)
        );
        assert_eq!(agent.kernel.productions.len(), before);
        assert!(!agent.kernel.productions.contains_name("chunk-2"));

        // The existing production still gets a fresh instantiation.
        let inst = agent
            .kernel
            .insts
            .get(second.chunk_inst.unwrap())
            .unwrap();
        assert_eq!(inst.production, Some(first.production));
    }

    #[test]
    fn failed_justification_is_excised() {
        let mut agent = Agent::new(ChunkSettings::default());
        let (mut built, results) = one_condition_rule(&mut agent);
        // Make the refraction structurally impossible.
        built.instantiated.clear();

        let outcome = commit_rule(
            &mut agent.kernel,
            agent.chunker.identities_mut(),
            "justification-1".into(),
            ProductionType::Justification,
            built,
            &results,
            GoalLevel::TOP,
        )
        .unwrap();

        assert_eq!(outcome.disposition, Disposition::JustificationExcised);
        assert!(agent.kernel.productions.get(outcome.production).is_none());
    }

    #[test]
    fn failed_chunk_is_kept() {
        let mut agent = Agent::new(ChunkSettings::default());
        let (mut built, results) = one_condition_rule(&mut agent);
        built.instantiated.clear();

        let outcome = commit_rule(
            &mut agent.kernel,
            agent.chunker.identities_mut(),
            "chunk-1".into(),
            ProductionType::Chunk,
            built,
            &results,
            GoalLevel::TOP,
        )
        .unwrap();

        assert_eq!(outcome.disposition, Disposition::ChunkKeptWithoutMatch);
        assert!(agent.kernel.productions.get(outcome.production).is_some());
        assert!(outcome.chunk_inst.is_none());
    }
}
