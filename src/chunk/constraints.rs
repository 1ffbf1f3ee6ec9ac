//! The constraint cache.
//!
//! The match network reports relational tests (inequality, ordering,
//! disjunction, bound-variable comparisons) separately from the equality
//! tests that drive identity propagation. While grounds are collected, the
//! cache records each relational test keyed by the identity of the element
//! it constrains; after variablization it replays them onto the condition
//! where that identity's variable materialized.
//!
//! Two special cases from the match network's "other tests" list:
//!
//! - An `Equal` constraint is identity information in disguise: it is
//!   merged into the element's main test (joining identities) instead of
//!   being kept as a redundant conjunct.
//! - A constraint whose referent identity never grounds is dropped.
//!   Loose constraints are optional refinements, not correctness
//!   requirements.

use crate::condition::{Condition, Constraint, ConstraintKind, Test, TestTriple};
use crate::error::SeshatResult;
use crate::identity::{IdentityGraph, IdentityId};
use crate::symbol::SymbolId;

/// One relational test captured during backtracing.
#[derive(Debug, Clone)]
struct CachedConstraint {
    /// Identity of the element the test constrains.
    source: IdentityId,
    kind: ConstraintKind,
    referent_sym: SymbolId,
    referent_identity: Option<IdentityId>,
}

/// Per-attempt cache of detached relational tests.
#[derive(Debug, Default)]
pub(crate) struct ConstraintCache {
    cached: Vec<CachedConstraint>,
    dropped: u64,
}

impl ConstraintCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of constraints dropped for lack of a grounded referent.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Harvest the relational constraints of a ground condition's tests.
    ///
    /// Equality-carrying constraints are folded into the main test on the
    /// spot; genuine relational constraints on identified elements move
    /// into the cache (to be re-attached after variablization); constraints
    /// on literal elements stay in place.
    pub fn collect(
        &mut self,
        tests: &mut TestTriple,
        identities: &mut IdentityGraph,
    ) -> SeshatResult<()> {
        for test in [&mut tests.id, &mut tests.attr, &mut tests.value] {
            self.collect_test(test, identities)?;
        }
        Ok(())
    }

    fn collect_test(
        &mut self,
        test: &mut Test,
        identities: &mut IdentityGraph,
    ) -> SeshatResult<()> {
        let mut kept = Vec::new();
        for constraint in test.constraints.drain(..) {
            match constraint {
                Constraint::Relational {
                    kind: ConstraintKind::Equal,
                    referent,
                    identity,
                } => {
                    // Identity information for a symbol whose equality test
                    // already exists: merge, don't conjoin.
                    match (test.identity, identity) {
                        (Some(existing), Some(incoming)) => {
                            identities.join(existing, incoming)?;
                        }
                        (None, Some(incoming)) => {
                            test.identity = Some(incoming);
                        }
                        _ => {
                            // No identity on either side: a bare equality
                            // conjunct adds nothing beyond the main test.
                            debug_assert_eq!(referent, test.sym);
                        }
                    }
                }
                Constraint::Relational {
                    kind,
                    referent,
                    identity,
                } => match test.identity {
                    Some(source) => self.cached.push(CachedConstraint {
                        source,
                        kind,
                        referent_sym: referent,
                        referent_identity: identity,
                    }),
                    // Literal element: the constraint survives in place.
                    None => kept.push(Constraint::Relational {
                        kind,
                        referent,
                        identity,
                    }),
                },
                Constraint::Disjunction(syms) => kept.push(Constraint::Disjunction(syms)),
            }
        }
        test.constraints = kept;
        Ok(())
    }

    /// Replay cached constraints onto the finished condition list.
    ///
    /// For each cached constraint, the condition element whose identity
    /// resolves to the same root receives the constraint back, with the
    /// referent rewritten to its canonical variable when one exists. When
    /// `variablize` is false (justification build), referents stay literal.
    /// Constraints whose source element or referent never grounded are
    /// dropped and counted.
    ///
    /// The cache is not consumed: a justification fallback re-runs this
    /// over a freshly built condition list.
    pub fn attach(
        &mut self,
        conditions: &mut [Condition],
        identities: &IdentityGraph,
        variablize: bool,
    ) -> SeshatResult<()> {
        self.dropped = 0;
        let cached = self.cached.clone();
        for constraint in cached {
            if !self.attach_one(&constraint, conditions, identities, variablize)? {
                self.dropped += 1;
                tracing::debug!(
                    kind = ?constraint.kind,
                    "dropped constraint with ungrounded referent"
                );
            }
        }
        Ok(())
    }

    fn attach_one(
        &self,
        constraint: &CachedConstraint,
        conditions: &mut [Condition],
        identities: &IdentityGraph,
        variablize: bool,
    ) -> SeshatResult<bool> {
        if !identities.is_live(constraint.source) {
            return Ok(false);
        }
        let source_root = identities.resolve(constraint.source)?;

        // Resolve the referent: canonical variable if its identity
        // grounded, the matched literal otherwise.
        let referent = if variablize {
            match constraint.referent_identity {
                Some(ri) if identities.is_live(ri) => {
                    match identities.variable_for(ri)? {
                        Some(var) => var,
                        // Identity present but never grounded.
                        None => return Ok(false),
                    }
                }
                Some(_) => return Ok(false),
                None => constraint.referent_sym,
            }
        } else {
            constraint.referent_sym
        };

        for cond in conditions.iter_mut() {
            let Some(tests) = cond.tests_mut() else { continue };
            for test in [&mut tests.id, &mut tests.attr, &mut tests.value] {
                let Some(identity) = test.identity else { continue };
                if !identities.is_live(identity) {
                    continue;
                }
                if identities.resolve(identity)? == source_root {
                    test.constraints.push(Constraint::Relational {
                        kind: constraint.kind,
                        referent,
                        identity: constraint.referent_identity,
                    });
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Forget everything; the per-attempt reset.
    pub fn clear(&mut self) {
        self.cached.clear();
        self.dropped = 0;
    }
}
