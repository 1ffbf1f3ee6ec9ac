//! Boundary to the match network.
//!
//! The learner does not implement a production matcher; it hands finished
//! rules across the [`MatchNetwork`] trait and reacts to one of three
//! outcomes. [`SimpleRete`] is the in-crate network used by the tests and
//! the demo binary: a naive matcher that checks a new rule's refracted
//! instantiation against working memory and detects duplicates by canonical
//! form. A production deployment would implement the trait over a real
//! RETE.

use std::collections::HashMap;

use crate::condition::{Condition, Constraint, Test, TestTriple};
use crate::memory::WorkingMemory;
use crate::production::{Production, ProductionId};
use crate::symbol::{SymbolId, SymbolTable};

/// Result of submitting a production to the match network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddProductionOutcome {
    /// The refracted instantiation matched; the rule is live.
    Matched,
    /// A structurally identical production already exists.
    Duplicate(ProductionId),
    /// The refracted instantiation failed to re-derive its match.
    DidNotMatch,
}

/// The seam between the learner and the matcher.
pub trait MatchNetwork {
    /// Submit a new production together with the instantiated condition
    /// list that should constitute its first (refracted) match.
    fn add_production(
        &mut self,
        production: &Production,
        refracted: &[Condition],
        wm: &WorkingMemory,
        symbols: &SymbolTable,
    ) -> AddProductionOutcome;

    /// Remove a production from the network.
    fn excise(&mut self, production: ProductionId);
}

// ---------------------------------------------------------------------------
// SimpleRete
// ---------------------------------------------------------------------------

/// Naive match network: canonical-form duplicate detection plus a
/// structural refraction check. No alpha/beta memories; nothing here is on
/// the decision-cycle fast path.
#[derive(Debug, Default)]
pub struct SimpleRete {
    canonical: HashMap<String, ProductionId>,
    by_id: HashMap<ProductionId, String>,
}

impl SimpleRete {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered productions.
    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    /// Whether the network is empty.
    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }
}

impl MatchNetwork for SimpleRete {
    fn add_production(
        &mut self,
        production: &Production,
        refracted: &[Condition],
        wm: &WorkingMemory,
        symbols: &SymbolTable,
    ) -> AddProductionOutcome {
        let canonical = production.canonical_form(symbols);
        if let Some(&existing) = self.canonical.get(&canonical) {
            tracing::debug!(name = %production.name, existing = %existing, "duplicate production");
            return AddProductionOutcome::Duplicate(existing);
        }

        if !refraction_matches(&production.conditions, refracted, wm, symbols) {
            tracing::warn!(name = %production.name, "refracted instantiation did not match");
            return AddProductionOutcome::DidNotMatch;
        }

        self.canonical.insert(canonical.clone(), production.id);
        self.by_id.insert(production.id, canonical);
        tracing::debug!(name = %production.name, "production added to network");
        AddProductionOutcome::Matched
    }

    fn excise(&mut self, production: ProductionId) {
        if let Some(canonical) = self.by_id.remove(&production) {
            self.canonical.remove(&canonical);
        }
    }
}

// ---------------------------------------------------------------------------
// Refraction check
// ---------------------------------------------------------------------------

/// Verify that the variablized conditions unify, element for element, with
/// the refracted instantiated conditions, under one consistent variable
/// binding, and that every extra constraint holds on the bound values.
fn refraction_matches(
    variablized: &[Condition],
    refracted: &[Condition],
    wm: &WorkingMemory,
    symbols: &SymbolTable,
) -> bool {
    if variablized.len() != refracted.len() {
        return false;
    }

    // Pass 1: bind equality tests of positive conditions.
    let mut bindings: HashMap<SymbolId, SymbolId> = HashMap::new();
    for (v, r) in variablized.iter().zip(refracted) {
        match (v, r) {
            (Condition::Positive(vp), Condition::Positive(rp)) => {
                if !bind_triple(&vp.tests, &rp.tests, symbols, &mut bindings) {
                    return false;
                }
                // The instantiated condition must point at a live WME with
                // the same triple.
                if let Some(wme) = rp.wme {
                    match wm.get(wme) {
                        Some(w)
                            if w.id == rp.tests.id.sym
                                && w.attr == rp.tests.attr.sym
                                && w.value == rp.tests.value.sym => {}
                        _ => return false,
                    }
                }
            }
            (Condition::Negative(_), Condition::Negative(_)) => {}
            (Condition::NegatedConjunction(_), Condition::NegatedConjunction(_)) => {}
            _ => return false,
        }
    }

    // Pass 2: constraints and negative conditions under the full binding.
    for (v, r) in variablized.iter().zip(refracted) {
        match (v, r) {
            (Condition::Positive(vp), Condition::Positive(rp)) => {
                if !constraints_hold(&vp.tests, &rp.tests, symbols, &bindings) {
                    return false;
                }
            }
            (Condition::Negative(vt), _) => {
                if negative_matches(vt, wm, symbols, &bindings) {
                    return false;
                }
            }
            (Condition::NegatedConjunction(inner), _) => {
                // Approximation adequate for refraction: the conjunction
                // fails if every inner positive pattern is present.
                let all_present = inner.iter().all(|c| match c {
                    Condition::Positive(pc) => {
                        negative_matches(&pc.tests, wm, symbols, &bindings)
                    }
                    Condition::Negative(t) => !negative_matches(t, wm, symbols, &bindings),
                    Condition::NegatedConjunction(_) => false,
                });
                if all_present && !inner.is_empty() {
                    return false;
                }
            }
            _ => {}
        }
    }

    true
}

fn bind_sym(
    pattern: SymbolId,
    ground: SymbolId,
    symbols: &SymbolTable,
    bindings: &mut HashMap<SymbolId, SymbolId>,
) -> bool {
    if symbols.is_variable(pattern) {
        match bindings.get(&pattern) {
            Some(&bound) => bound == ground,
            None => {
                bindings.insert(pattern, ground);
                true
            }
        }
    } else {
        pattern == ground
    }
}

fn bind_triple(
    pattern: &TestTriple,
    ground: &TestTriple,
    symbols: &SymbolTable,
    bindings: &mut HashMap<SymbolId, SymbolId>,
) -> bool {
    bind_sym(pattern.id.sym, ground.id.sym, symbols, bindings)
        && bind_sym(pattern.attr.sym, ground.attr.sym, symbols, bindings)
        && bind_sym(pattern.value.sym, ground.value.sym, symbols, bindings)
}

fn resolve_sym(
    sym: SymbolId,
    symbols: &SymbolTable,
    bindings: &HashMap<SymbolId, SymbolId>,
) -> Option<SymbolId> {
    if symbols.is_variable(sym) {
        bindings.get(&sym).copied()
    } else {
        Some(sym)
    }
}

fn test_constraints_hold(
    test: &Test,
    ground: SymbolId,
    symbols: &SymbolTable,
    bindings: &HashMap<SymbolId, SymbolId>,
) -> bool {
    test.constraints.iter().all(|c| match c {
        Constraint::Relational { kind, referent, .. } => {
            match resolve_sym(*referent, symbols, bindings) {
                Some(referent) => kind.holds(ground, referent, symbols),
                // An unbound referent cannot falsify the match.
                None => true,
            }
        }
        Constraint::Disjunction(syms) => syms.contains(&ground),
    })
}

fn constraints_hold(
    pattern: &TestTriple,
    ground: &TestTriple,
    symbols: &SymbolTable,
    bindings: &HashMap<SymbolId, SymbolId>,
) -> bool {
    test_constraints_hold(&pattern.id, ground.id.sym, symbols, bindings)
        && test_constraints_hold(&pattern.attr, ground.attr.sym, symbols, bindings)
        && test_constraints_hold(&pattern.value, ground.value.sym, symbols, bindings)
}

/// Whether a (possibly partially bound) negative pattern has a match in
/// working memory.
fn negative_matches(
    pattern: &TestTriple,
    wm: &WorkingMemory,
    symbols: &SymbolTable,
    bindings: &HashMap<SymbolId, SymbolId>,
) -> bool {
    let id = resolve_sym(pattern.id.sym, symbols, bindings);
    let attr = resolve_sym(pattern.attr.sym, symbols, bindings);
    let value = resolve_sym(pattern.value.sym, symbols, bindings);
    wm.iter().any(|(_, w)| {
        id.is_none_or(|s| s == w.id)
            && attr.is_none_or(|s| s == w.attr)
            && value.is_none_or(|s| s == w.value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{ConstraintKind, PositiveCondition};
    use crate::memory::{IdentityQuad, PreferenceKind};
    use crate::production::{Action, ProductionStore, ProductionType};
    use crate::symbol::GoalLevel;

    struct Fixture {
        symbols: SymbolTable,
        wm: WorkingMemory,
        store: ProductionStore,
        rete: SimpleRete,
    }

    fn fixture() -> (Fixture, SymbolId, SymbolId, SymbolId) {
        let mut symbols = SymbolTable::new();
        let s = symbols.make_goal(GoalLevel::TOP).unwrap();
        let attr = symbols.make_str("color").unwrap();
        let red = symbols.make_str("red").unwrap();
        let mut wm = WorkingMemory::new();
        wm.add(s, attr, red, GoalLevel::TOP, None);
        (
            Fixture {
                symbols,
                wm,
                store: ProductionStore::new(),
                rete: SimpleRete::new(),
            },
            s,
            attr,
            red,
        )
    }

    fn rule(
        f: &mut Fixture,
        name: &str,
        var_name: &str,
        s: SymbolId,
        attr: SymbolId,
        red: SymbolId,
    ) -> (ProductionId, Vec<Condition>) {
        let v = f.symbols.make_variable(var_name).unwrap();
        let conds = vec![Condition::positive(TestTriple::equality(v, attr, red))];
        let actions = vec![Action {
            kind: PreferenceKind::Acceptable,
            id: v,
            attr,
            value: red,
            referent: None,
            identities: IdentityQuad::default(),
        }];
        let id = f
            .store
            .insert(name.into(), ProductionType::Chunk, conds, actions);
        let refracted = vec![Condition::Positive(PositiveCondition {
            tests: TestTriple::equality(s, attr, red),
            wme: f.wm.find(s, attr, red),
            producer: None,
        })];
        (id, refracted)
    }

    #[test]
    fn matched_then_duplicate() {
        let (mut f, s, attr, red) = fixture();
        let (a, refracted_a) = rule(&mut f, "chunk-1", "s1", s, attr, red);
        let prod_a = f.store.get(a).unwrap().clone();
        assert_eq!(
            f.rete
                .add_production(&prod_a, &refracted_a, &f.wm, &f.symbols),
            AddProductionOutcome::Matched
        );

        // Alpha-renamed copy is a duplicate.
        let (b, refracted_b) = rule(&mut f, "chunk-2", "z7", s, attr, red);
        let prod_b = f.store.get(b).unwrap().clone();
        assert_eq!(
            f.rete
                .add_production(&prod_b, &refracted_b, &f.wm, &f.symbols),
            AddProductionOutcome::Duplicate(a)
        );
    }

    #[test]
    fn inconsistent_binding_does_not_match() {
        let (mut f, s, attr, red) = fixture();
        let v = f.symbols.make_variable("s1").unwrap();
        // Rule requires the same variable in two positions the refracted
        // instantiation fills with different symbols.
        let conds = vec![Condition::positive(TestTriple::equality(v, attr, v))];
        let id = f
            .store
            .insert("bad".into(), ProductionType::Justification, conds, vec![]);
        let refracted = vec![Condition::Positive(PositiveCondition {
            tests: TestTriple::equality(s, attr, red),
            wme: f.wm.find(s, attr, red),
            producer: None,
        })];
        let prod = f.store.get(id).unwrap().clone();
        assert_eq!(
            f.rete.add_production(&prod, &refracted, &f.wm, &f.symbols),
            AddProductionOutcome::DidNotMatch
        );
    }

    #[test]
    fn violated_constraint_does_not_match() {
        let (mut f, s, attr, red) = fixture();
        let v = f.symbols.make_variable("s1").unwrap();
        let mut tests = TestTriple::equality(v, attr, red);
        tests.value.constraints.push(Constraint::Relational {
            kind: ConstraintKind::NotEqual,
            referent: red,
            identity: None,
        });
        let conds = vec![Condition::positive(tests)];
        let id = f
            .store
            .insert("c".into(), ProductionType::Chunk, conds, vec![]);
        let refracted = vec![Condition::Positive(PositiveCondition {
            tests: TestTriple::equality(s, attr, red),
            wme: f.wm.find(s, attr, red),
            producer: None,
        })];
        let prod = f.store.get(id).unwrap().clone();
        assert_eq!(
            f.rete.add_production(&prod, &refracted, &f.wm, &f.symbols),
            AddProductionOutcome::DidNotMatch
        );
    }

    #[test]
    fn present_negative_condition_blocks_match() {
        let (mut f, s, attr, red) = fixture();
        let v = f.symbols.make_variable("s1").unwrap();
        let conds = vec![
            Condition::positive(TestTriple::equality(v, attr, red)),
            Condition::Negative(TestTriple::equality(v, attr, red)),
        ];
        let id = f
            .store
            .insert("n".into(), ProductionType::Chunk, conds, vec![]);
        let refracted = vec![
            Condition::Positive(PositiveCondition {
                tests: TestTriple::equality(s, attr, red),
                wme: f.wm.find(s, attr, red),
                producer: None,
            }),
            Condition::Negative(TestTriple::equality(s, attr, red)),
        ];
        let prod = f.store.get(id).unwrap().clone();
        assert_eq!(
            f.rete.add_production(&prod, &refracted, &f.wm, &f.symbols),
            AddProductionOutcome::DidNotMatch
        );
    }

    #[test]
    fn excise_forgets_canonical_form() {
        let (mut f, s, attr, red) = fixture();
        let (a, refracted) = rule(&mut f, "chunk-1", "s1", s, attr, red);
        let prod = f.store.get(a).unwrap().clone();
        f.rete.add_production(&prod, &refracted, &f.wm, &f.symbols);
        f.rete.excise(a);
        assert!(f.rete.is_empty());

        // Re-adding after excise is no longer a duplicate.
        assert_eq!(
            f.rete.add_production(&prod, &refracted, &f.wm, &f.symbols),
            AddProductionOutcome::Matched
        );
    }
}
