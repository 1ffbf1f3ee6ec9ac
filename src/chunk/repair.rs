//! Rule validation and repair.
//!
//! A chunk's left-hand side must be grounded in the state: every positive
//! condition's identifier has to connect, through shared identifiers, to a
//! condition testing a goal or impasse. A rule that fails this is
//! "floating" — it could match anywhere — so the validator walks the
//! condition graph and, for disconnected conditions, tries to manufacture
//! connecting conditions from identifier links visible in working memory
//! at or above the grounds level. When no connecting chain exists the
//! build falls back to a justification.
//!
//! States: VALIDATING → VALID | REPAIRED | FAILED.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::graphmap::UnGraphMap;
use petgraph::visit::Dfs;

use crate::condition::{Condition, PositiveCondition, TestTriple};
use crate::error::SeshatResult;
use crate::kernel::Kernel;
use crate::memory::WmeId;
use crate::symbol::{GoalLevel, SymbolId};

/// Outcome of the validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValidationOutcome {
    /// Every condition is connected to a goal/impasse test.
    Valid,
    /// Connectivity was restored by adding conditions.
    Repaired { added: usize },
    /// Disconnected conditions remain; build a justification instead.
    Failed,
}

/// Validate the variablized conditions and repair if necessary, keeping
/// the instantiated twin list parallel.
pub(crate) fn validate_and_repair(
    kernel: &mut Kernel,
    variablized: &mut Vec<Condition>,
    instantiated: &mut Vec<Condition>,
    grounds_level: GoalLevel,
) -> SeshatResult<ValidationOutcome> {
    let disconnected = disconnected_conditions(variablized, kernel);
    if disconnected.is_empty() {
        return Ok(ValidationOutcome::Valid);
    }
    tracing::debug!(
        count = disconnected.len(),
        "rule has disconnected conditions; attempting repair"
    );

    // Ground symbol → canonical variable, from the twin lists.
    let mut sym_to_var: HashMap<SymbolId, SymbolId> = HashMap::new();
    for (v, i) in variablized.iter().zip(instantiated.iter()) {
        let (Some(vt), Some(it)) = (v.tests(), i.tests()) else { continue };
        if kernel.symbols.is_variable(vt.id.sym) {
            sym_to_var.insert(it.id.sym, vt.id.sym);
        }
        if kernel.symbols.is_variable(vt.value.sym) {
            sym_to_var.insert(it.value.sym, vt.value.sym);
        }
    }

    // Anchors: ground identifiers of connected conditions, plus the goal
    // stack at or above the grounds level.
    let disconnected_set: HashSet<usize> = disconnected.iter().copied().collect();
    let mut anchors: Vec<SymbolId> = Vec::new();
    for (index, cond) in instantiated.iter().enumerate() {
        if disconnected_set.contains(&index) {
            continue;
        }
        if let Some(tests) = cond.tests() {
            anchors.push(tests.id.sym);
        }
    }
    anchors.extend(kernel.goals_at_or_above(grounds_level));

    let mut added = 0;
    for index in disconnected {
        let Some(tests) = instantiated[index].tests() else { continue };
        let target = tests.id.sym;
        let Some(path) = link_path(kernel, &anchors, target, grounds_level) else {
            tracing::debug!(
                target = %kernel.symbols.display(target),
                "no connecting chain in working memory; repair failed"
            );
            return Ok(ValidationOutcome::Failed);
        };
        for wme_id in path {
            let Some(wme) = kernel.wm.get(wme_id).cloned() else { continue };
            let id_var = repair_var(kernel, &mut sym_to_var, wme.id)?;
            let value_var = if kernel.symbols.is_identifier(wme.value) {
                repair_var(kernel, &mut sym_to_var, wme.value)?
            } else {
                wme.value
            };
            let mut var_tests = TestTriple::equality(id_var, wme.attr, value_var);
            let mut inst_tests = TestTriple::equality(wme.id, wme.attr, wme.value);
            if kernel.symbols.is_goal(wme.id) {
                var_tests.id.goal_test = true;
                inst_tests.id.goal_test = true;
            }
            if kernel.symbols.is_impasse(wme.id) {
                var_tests.id.impasse_test = true;
                inst_tests.id.impasse_test = true;
            }
            variablized.push(Condition::Positive(PositiveCondition {
                tests: var_tests,
                wme: None,
                producer: None,
            }));
            instantiated.push(Condition::Positive(PositiveCondition {
                tests: inst_tests,
                wme: Some(wme_id),
                producer: wme.creator,
            }));
            added += 1;
        }
    }

    // The added conditions must have restored connectivity.
    if disconnected_conditions(variablized, kernel).is_empty() {
        Ok(ValidationOutcome::Repaired { added })
    } else {
        Ok(ValidationOutcome::Failed)
    }
}

fn repair_var(
    kernel: &mut Kernel,
    sym_to_var: &mut HashMap<SymbolId, SymbolId>,
    ground: SymbolId,
) -> SeshatResult<SymbolId> {
    if let Some(&var) = sym_to_var.get(&ground) {
        return Ok(var);
    }
    let letter = if kernel.symbols.is_goal(ground) {
        's'
    } else {
        kernel
            .symbols
            .letter_of(ground)
            .map(|l| l.to_ascii_lowercase())
            .unwrap_or('c')
    };
    let var = kernel.symbols.fresh_variable(letter)?;
    sym_to_var.insert(ground, var);
    Ok(var)
}

/// Indices of positive conditions whose identifier is not reachable from
/// any goal/impasse-tested condition through shared identifiers.
fn disconnected_conditions(conditions: &[Condition], kernel: &Kernel) -> Vec<usize> {
    let mut graph: UnGraphMap<u64, ()> = UnGraphMap::new();
    let mut roots: Vec<u64> = Vec::new();

    for cond in conditions {
        let Condition::Positive(pc) = cond else { continue };
        let id = pc.tests.id.sym.get();
        graph.add_node(id);
        let value = pc.tests.value.sym;
        if kernel.symbols.is_variable(value) || kernel.symbols.is_identifier(value) {
            graph.add_node(value.get());
            graph.add_edge(id, value.get(), ());
        }
        if pc.tests.id.goal_test || pc.tests.id.impasse_test {
            roots.push(id);
        }
    }

    let mut reachable: HashSet<u64> = HashSet::new();
    for root in roots {
        let mut dfs = Dfs::new(&graph, root);
        while let Some(node) = dfs.next(&graph) {
            reachable.insert(node);
        }
    }

    conditions
        .iter()
        .enumerate()
        .filter_map(|(index, cond)| match cond {
            Condition::Positive(pc) if !reachable.contains(&pc.tests.id.sym.get()) => {
                Some(index)
            }
            _ => None,
        })
        .collect()
}

/// BFS over working-memory identifier links from any anchor to `target`,
/// restricted to WMEs at or above the grounds level. Returns the WME path.
fn link_path(
    kernel: &Kernel,
    anchors: &[SymbolId],
    target: SymbolId,
    grounds_level: GoalLevel,
) -> Option<Vec<WmeId>> {
    let mut queue: VecDeque<SymbolId> = VecDeque::new();
    let mut visited: HashSet<SymbolId> = HashSet::new();
    let mut via: HashMap<SymbolId, (SymbolId, WmeId)> = HashMap::new();

    for &anchor in anchors {
        if visited.insert(anchor) {
            queue.push_back(anchor);
        }
    }

    while let Some(current) = queue.pop_front() {
        if current == target {
            // Reconstruct the WME chain back to the anchor.
            let mut path = Vec::new();
            let mut node = current;
            while let Some(&(parent, wme)) = via.get(&node) {
                path.push(wme);
                node = parent;
            }
            path.reverse();
            return Some(path);
        }
        for &wme_id in kernel.wm.augmentations_of(current) {
            let Some(wme) = kernel.wm.get(wme_id) else { continue };
            if wme.level > grounds_level {
                continue;
            }
            if !kernel.symbols.is_identifier(wme.value) {
                continue;
            }
            if visited.insert(wme.value) {
                via.insert(wme.value, (current, wme_id));
                queue.push_back(wme.value);
            }
        }
    }
    None
}
