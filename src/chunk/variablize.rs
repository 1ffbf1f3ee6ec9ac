//! Variablization: from ground trace to general rule.
//!
//! Two passes, because equality tests establish the canonical variable for
//! an identity class while every other test kind must look that variable
//! up without minting a new one:
//!
//! - **Pass 1** walks the equality tests of the positive grounds. Each
//!   non-literalized identity gets a variable on first use (named by the
//!   matched symbol's role: `s` for states, `o` for operators, the
//!   identifier's letter otherwise, `c` for constants) and is bound via
//!   `store_variablization`, so every later occurrence of the class reuses
//!   the same variable.
//! - **Pass 2** rewrites constraint referents and negative/NCC conditions
//!   by lookup only. Identifier tests whose identity never grounded are
//!   dropped; constants stay literal.
//!
//! Actions variablize in the same style, with one extra rule: an identity
//! first seen on the RHS gets a fresh unbound variable. With `variablize`
//! off the builder produces a justification: conditions and actions are
//! copied symbol for symbol.

use std::collections::HashMap;

use crate::condition::{Condition, Constraint, PositiveCondition, Test};
use crate::error::{ChunkError, SeshatResult};
use crate::identity::IdentityGraph;
use crate::memory::{IdentityQuad, Preference};
use crate::production::Action;
use crate::symbol::{SymbolId, SymbolTable};

/// Output of a variablization run: parallel rule/instantiation condition
/// lists plus the variablized actions.
#[derive(Debug)]
pub(crate) struct BuiltRule {
    /// Conditions of the new rule (variablized for chunks, ground for
    /// justifications).
    pub variablized: Vec<Condition>,
    /// The structurally parallel instantiated twins, in the same order.
    pub instantiated: Vec<Condition>,
    /// Right-hand-side actions.
    pub actions: Vec<Action>,
}

/// One variablization run over a collected trace.
pub(crate) struct Variablizer<'a> {
    pub symbols: &'a mut SymbolTable,
    pub identities: &'a mut IdentityGraph,
    /// False builds a justification: symbols pass through unchanged.
    pub variablize: bool,
    /// Ground symbol → canonical variable, built during pass 1 and used as
    /// the lookup fallback for negative conditions.
    sym_to_var: HashMap<SymbolId, SymbolId>,
}

impl<'a> Variablizer<'a> {
    pub fn new(
        symbols: &'a mut SymbolTable,
        identities: &'a mut IdentityGraph,
        variablize: bool,
    ) -> Self {
        Self {
            symbols,
            identities,
            variablize,
            sym_to_var: HashMap::new(),
        }
    }

    /// Run both passes over the grounds and the connected negated
    /// conditions, then variablize the result preferences into actions.
    pub fn build(
        &mut self,
        grounds: &[PositiveCondition],
        negated: &[Condition],
        results: &[Preference],
    ) -> SeshatResult<BuiltRule> {
        // Pass 1: equality tests of positive conditions.
        let mut variablized: Vec<Condition> = Vec::with_capacity(grounds.len() + negated.len());
        let mut instantiated: Vec<Condition> = Vec::with_capacity(variablized.capacity());
        for ground in grounds {
            let rewritten = PositiveCondition {
                tests: crate::condition::TestTriple {
                    id: self.pass1_test(&ground.tests.id)?,
                    attr: self.pass1_test(&ground.tests.attr)?,
                    value: self.pass1_test(&ground.tests.value)?,
                },
                wme: None,
                producer: None,
            };
            variablized.push(Condition::Positive(rewritten));
            instantiated.push(Condition::Positive(ground.clone()));
        }

        // Pass 2a: constraint referents on the positives.
        for cond in &mut variablized {
            if let Some(tests) = cond.tests_mut() {
                for test in [&mut tests.id, &mut tests.attr, &mut tests.value] {
                    finish_constraints(test, self.identities, self.variablize)?;
                }
            }
        }

        // Pass 2b: negative and NCC conditions, lookup only.
        for cond in negated {
            if let Some(mapped) = self.pass2_condition(cond)? {
                variablized.push(mapped);
                instantiated.push(cond.clone());
            } else {
                tracing::debug!("dropping negated condition with ungrounded identifier");
            }
        }

        let actions = self.build_actions(results)?;
        Ok(BuiltRule {
            variablized,
            instantiated,
            actions,
        })
    }

    fn letter_for(&self, sym: SymbolId) -> char {
        if self.symbols.is_goal(sym) {
            's'
        } else if self.symbols.letter_of(sym) == Some('O') {
            'o'
        } else if let Some(letter) = self.symbols.letter_of(sym) {
            letter.to_ascii_lowercase()
        } else {
            'c'
        }
    }

    /// Variablize one equality test, minting the canonical variable for
    /// its identity class on first use.
    fn pass1_test(&mut self, test: &Test) -> SeshatResult<Test> {
        let mut out = test.clone();
        if !self.variablize {
            return Ok(out);
        }
        let Some(identity) = test.identity else {
            return Ok(out);
        };
        if self.identities.is_literalized(identity)? {
            return Ok(out);
        }
        let variable = match self.identities.variable_for(identity)? {
            Some(existing) => existing,
            None => {
                let fresh = self.symbols.fresh_variable(self.letter_for(test.sym))?;
                self.identities
                    .store_variablization(identity, fresh, test.sym)?;
                fresh
            }
        };
        self.sym_to_var.entry(test.sym).or_insert(variable);
        out.sym = variable;
        Ok(out)
    }

    /// Map a negative or NCC condition by lookup. Returns `None` when an
    /// identifier element cannot be resolved to a variable, which drops
    /// the condition.
    fn pass2_condition(&mut self, cond: &Condition) -> SeshatResult<Option<Condition>> {
        match cond {
            Condition::Negative(tests) => {
                let id = self.pass2_test(&tests.id)?;
                let attr = self.pass2_test(&tests.attr)?;
                let value = self.pass2_test(&tests.value)?;
                match (id, attr, value) {
                    (Some(mut id), Some(mut attr), Some(mut value)) => {
                        for test in [&mut id, &mut attr, &mut value] {
                            finish_constraints(test, self.identities, self.variablize)?;
                        }
                        Ok(Some(Condition::Negative(crate::condition::TestTriple {
                            id,
                            attr,
                            value,
                        })))
                    }
                    _ => Ok(None),
                }
            }
            Condition::NegatedConjunction(inner) => {
                let mut mapped = Vec::new();
                for c in inner {
                    if let Some(m) = self.pass2_condition(c)? {
                        mapped.push(m);
                    }
                }
                if mapped.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(Condition::NegatedConjunction(mapped)))
                }
            }
            // Positive conditions inside an NCC group.
            Condition::Positive(pc) => {
                let id = self.pass2_test(&pc.tests.id)?;
                let attr = self.pass2_test(&pc.tests.attr)?;
                let value = self.pass2_test(&pc.tests.value)?;
                match (id, attr, value) {
                    (Some(id), Some(attr), Some(value)) => {
                        Ok(Some(Condition::Positive(PositiveCondition {
                            tests: crate::condition::TestTriple { id, attr, value },
                            wme: None,
                            producer: None,
                        })))
                    }
                    _ => Ok(None),
                }
            }
        }
    }

    /// Lookup-only rewrite of one test. `None` drops the enclosing
    /// condition (an unresolvable short-term-identifier test is
    /// meaningless); constants always survive as literals.
    fn pass2_test(&mut self, test: &Test) -> SeshatResult<Option<Test>> {
        let mut out = test.clone();
        if !self.variablize {
            return Ok(Some(out));
        }
        let variable = match test.identity {
            Some(identity) if self.identities.is_live(identity) => {
                if self.identities.is_literalized(identity)? {
                    return Ok(Some(out));
                }
                self.identities.variable_for(identity)?
            }
            _ => None,
        };
        let variable = variable.or_else(|| self.sym_to_var.get(&test.sym).copied());
        match variable {
            Some(v) => {
                out.sym = v;
                Ok(Some(out))
            }
            None if self.symbols.is_identifier(test.sym) => Ok(None),
            None => Ok(Some(out)),
        }
    }

    /// Variablize the result preferences into RHS actions.
    fn build_actions(&mut self, results: &[Preference]) -> SeshatResult<Vec<Action>> {
        let mut actions = Vec::with_capacity(results.len());
        for pref in results {
            if pref.kind.is_binary() && pref.referent.is_none() {
                return Err(ChunkError::MissingReferent {
                    kind: pref.kind.to_string(),
                }
                .into());
            }
            let id = self.action_sym(pref.id, pref.identities.id)?;
            let attr = self.action_sym(pref.attr, pref.identities.attr)?;
            let value = self.action_sym(pref.value, pref.identities.value)?;
            let referent = match pref.referent {
                Some(r) => Some(self.action_sym(r, pref.identities.referent)?),
                None => None,
            };
            actions.push(Action {
                kind: pref.kind,
                id,
                attr,
                value,
                referent,
                identities: IdentityQuad {
                    id: pref.identities.id,
                    attr: pref.identities.attr,
                    value: pref.identities.value,
                    referent: pref.identities.referent,
                },
            });
        }
        Ok(actions)
    }

    /// Variablize one RHS element. An identity with no LHS occurrence gets
    /// a fresh unbound-RHS variable.
    fn action_sym(
        &mut self,
        sym: SymbolId,
        identity: Option<crate::identity::IdentityId>,
    ) -> SeshatResult<SymbolId> {
        if !self.variablize {
            return Ok(sym);
        }
        let Some(identity) = identity else {
            return Ok(match self.sym_to_var.get(&sym) {
                Some(&v) if self.symbols.is_identifier(sym) => v,
                _ => sym,
            });
        };
        if !self.identities.is_live(identity) || self.identities.is_literalized(identity)? {
            return Ok(sym);
        }
        match self.identities.variable_for(identity)? {
            Some(v) => Ok(v),
            None => {
                let fresh = self.symbols.fresh_variable(self.letter_for(sym))?;
                self.identities.store_variablization(identity, fresh, sym)?;
                Ok(fresh)
            }
        }
    }
}

/// Rewrite the referents of the relational constraints still attached to a
/// test: variable when the referent identity grounded, dropped when it has
/// an identity that never grounded, literal otherwise.
fn finish_constraints(
    test: &mut Test,
    identities: &IdentityGraph,
    variablize: bool,
) -> SeshatResult<()> {
    if !variablize {
        return Ok(());
    }
    let mut kept = Vec::with_capacity(test.constraints.len());
    for constraint in test.constraints.drain(..) {
        match constraint {
            Constraint::Relational {
                kind,
                referent,
                identity: Some(ri),
            } if identities.is_live(ri) => match identities.variable_for(ri)? {
                Some(v) => kept.push(Constraint::Relational {
                    kind,
                    referent: v,
                    identity: Some(ri),
                }),
                None if identities.is_literalized(ri)? => kept.push(Constraint::Relational {
                    kind,
                    referent,
                    identity: Some(ri),
                }),
                None => {
                    tracing::trace!("dropping constraint with unresolved referent identity");
                }
            },
            Constraint::Relational {
                kind,
                referent,
                identity: _,
            } => kept.push(Constraint::Relational {
                kind,
                referent,
                identity: None,
            }),
            Constraint::Disjunction(syms) => kept.push(Constraint::Disjunction(syms)),
        }
    }
    test.constraints = kept;
    Ok(())
}
