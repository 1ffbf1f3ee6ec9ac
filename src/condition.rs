//! Conditions: the left-hand-side clauses of instantiations and rules.
//!
//! A [`Condition`] is positive, negative, or a negated conjunction. Each
//! positive/negative condition carries three [`Test`]s (identifier,
//! attribute, value). A test pairs the matched symbol with an optional
//! identity (its generalization slot in the identity graph) plus any extra
//! relational constraints the match network reported for that element.
//!
//! The same structures describe both instantiated conditions (ground
//! symbols, back-pointers into working memory) and variablized conditions
//! in learned rules (variable symbols, no back-pointers).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::identity::IdentityId;
use crate::memory::{PrefId, WmeId};
use crate::symbol::{SymbolId, SymbolTable};

// ---------------------------------------------------------------------------
// Relational constraints
// ---------------------------------------------------------------------------

/// Kind of a relational test attached to a condition element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// Equality with identity information. Usually folded into the element's
    /// main test rather than kept as a separate conjunct.
    Equal,
    NotEqual,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
    SameType,
}

impl ConstraintKind {
    /// Printed form inside a test conjunction.
    pub fn glyph(self) -> &'static str {
        match self {
            ConstraintKind::Equal => "=",
            ConstraintKind::NotEqual => "<>",
            ConstraintKind::Less => "<",
            ConstraintKind::Greater => ">",
            ConstraintKind::LessOrEqual => "<=",
            ConstraintKind::GreaterOrEqual => ">=",
            ConstraintKind::SameType => "<=>",
        }
    }

    /// Evaluate the relation over two ground symbols.
    pub fn holds(self, a: SymbolId, b: SymbolId, symbols: &SymbolTable) -> bool {
        use crate::symbol::SymbolValue;
        let (va, vb) = (symbols.get(a), symbols.get(b));
        let numeric = |v: &SymbolValue| match v {
            SymbolValue::Int(n) => Some(*n as f64),
            SymbolValue::Float(x) => Some(*x),
            _ => None,
        };
        match self {
            ConstraintKind::Equal => a == b,
            ConstraintKind::NotEqual => a != b,
            ConstraintKind::SameType => {
                std::mem::discriminant(va) == std::mem::discriminant(vb)
            }
            ConstraintKind::Less
            | ConstraintKind::Greater
            | ConstraintKind::LessOrEqual
            | ConstraintKind::GreaterOrEqual => match (numeric(va), numeric(vb)) {
                (Some(x), Some(y)) => match self {
                    ConstraintKind::Less => x < y,
                    ConstraintKind::Greater => x > y,
                    ConstraintKind::LessOrEqual => x <= y,
                    ConstraintKind::GreaterOrEqual => x >= y,
                    _ => unreachable!(),
                },
                _ => false,
            },
        }
    }
}

/// One extra test on a condition element, beyond its main equality test.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// A relational test against a referent symbol. The referent's identity
    /// (when present) links it to the rest of the trace for variablization.
    Relational {
        kind: ConstraintKind,
        referent: SymbolId,
        identity: Option<IdentityId>,
    },
    /// Membership in a fixed set of constants, e.g. `<< red blue >>`.
    Disjunction(Vec<SymbolId>),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// The test for one element (id, attribute, or value) of a condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Test {
    /// The matched symbol (ground in instantiations, possibly a variable in
    /// learned rules).
    pub sym: SymbolId,
    /// Generalization slot in the identity graph, when the element can
    /// participate in variablization.
    pub identity: Option<IdentityId>,
    /// Whether the element additionally tests "is a goal".
    pub goal_test: bool,
    /// Whether the element additionally tests "is an impasse".
    pub impasse_test: bool,
    /// Extra relational tests reported by the match network.
    pub constraints: Vec<Constraint>,
}

impl Test {
    /// A plain equality test on a symbol.
    pub fn equality(sym: SymbolId) -> Self {
        Self {
            sym,
            identity: None,
            goal_test: false,
            impasse_test: false,
            constraints: Vec::new(),
        }
    }

    /// Attach an identity to this test.
    pub fn with_identity(mut self, identity: IdentityId) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Mark this test as also testing goal-ness.
    pub fn with_goal_test(mut self) -> Self {
        self.goal_test = true;
        self
    }
}

/// The three element tests of one condition.
#[derive(Debug, Clone, PartialEq)]
pub struct TestTriple {
    pub id: Test,
    pub attr: Test,
    pub value: Test,
}

impl TestTriple {
    /// Build a triple of plain equality tests.
    pub fn equality(id: SymbolId, attr: SymbolId, value: SymbolId) -> Self {
        Self {
            id: Test::equality(id),
            attr: Test::equality(attr),
            value: Test::equality(value),
        }
    }
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// A positive condition, with backtracing pointers when instantiated.
#[derive(Debug, Clone, PartialEq)]
pub struct PositiveCondition {
    pub tests: TestTriple,
    /// The working-memory element this condition matched.
    pub wme: Option<WmeId>,
    /// The preference whose application created the matched WME
    /// (the trace followed during backtracing). `None` for input and
    /// architecture-created WMEs.
    pub producer: Option<PrefId>,
}

/// One left-hand-side clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Positive(PositiveCondition),
    Negative(TestTriple),
    /// Negated conjunction: matches when the whole group has no match.
    NegatedConjunction(Vec<Condition>),
}

impl Condition {
    /// Build a positive condition from plain equality tests.
    pub fn positive(tests: TestTriple) -> Self {
        Condition::Positive(PositiveCondition {
            tests,
            wme: None,
            producer: None,
        })
    }

    /// The element tests of this condition, when it has exactly one triple.
    pub fn tests(&self) -> Option<&TestTriple> {
        match self {
            Condition::Positive(pc) => Some(&pc.tests),
            Condition::Negative(tests) => Some(tests),
            Condition::NegatedConjunction(_) => None,
        }
    }

    /// Mutable access to the element tests.
    pub fn tests_mut(&mut self) -> Option<&mut TestTriple> {
        match self {
            Condition::Positive(pc) => Some(&mut pc.tests),
            Condition::Negative(tests) => Some(tests),
            Condition::NegatedConjunction(_) => None,
        }
    }

    /// Whether this is a positive condition.
    pub fn is_positive(&self) -> bool {
        matches!(self, Condition::Positive(_))
    }

    /// Structural hash for the negated-condition deduplication set.
    ///
    /// Hashes the matched symbols, polarity, and constraint shapes, but not
    /// identities or backtracing pointers: two negated conditions that test
    /// the same structure are the same entry regardless of which
    /// instantiation contributed them.
    pub fn structural_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        hash_condition(self, &mut hasher);
        hasher.finish()
    }

    /// Render this condition in rule syntax, e.g. `(<s> ^color red)`.
    pub fn render(&self, symbols: &SymbolTable) -> String {
        match self {
            Condition::Positive(pc) => render_triple(&pc.tests, symbols, false),
            Condition::Negative(tests) => render_triple(tests, symbols, true),
            Condition::NegatedConjunction(conds) => {
                let inner: Vec<String> = conds.iter().map(|c| c.render(symbols)).collect();
                format!("-{{{}}}", inner.join(" "))
            }
        }
    }
}

fn hash_condition(cond: &Condition, hasher: &mut DefaultHasher) {
    match cond {
        Condition::Positive(pc) => {
            0u8.hash(hasher);
            hash_triple(&pc.tests, hasher);
        }
        Condition::Negative(tests) => {
            1u8.hash(hasher);
            hash_triple(tests, hasher);
        }
        Condition::NegatedConjunction(conds) => {
            2u8.hash(hasher);
            conds.len().hash(hasher);
            for c in conds {
                hash_condition(c, hasher);
            }
        }
    }
}

fn hash_triple(tests: &TestTriple, hasher: &mut DefaultHasher) {
    for test in [&tests.id, &tests.attr, &tests.value] {
        test.sym.hash(hasher);
        test.goal_test.hash(hasher);
        test.impasse_test.hash(hasher);
        test.constraints.len().hash(hasher);
        for c in &test.constraints {
            match c {
                Constraint::Relational { kind, referent, .. } => {
                    kind.hash(hasher);
                    referent.hash(hasher);
                }
                Constraint::Disjunction(syms) => {
                    255u8.hash(hasher);
                    for s in syms {
                        s.hash(hasher);
                    }
                }
            }
        }
    }
}

fn render_test(test: &Test, symbols: &SymbolTable) -> String {
    let mut parts = Vec::new();
    if test.goal_test {
        parts.push("state".to_string());
    }
    if test.impasse_test {
        parts.push("impasse".to_string());
    }
    parts.push(symbols.display(test.sym));
    for c in &test.constraints {
        match c {
            Constraint::Relational { kind, referent, .. } => {
                parts.push(format!("{} {}", kind.glyph(), symbols.display(*referent)));
            }
            Constraint::Disjunction(syms) => {
                let alts: Vec<String> = syms.iter().map(|s| symbols.display(*s)).collect();
                parts.push(format!("<< {} >>", alts.join(" ")));
            }
        }
    }
    if parts.len() == 1 {
        parts.pop().unwrap_or_default()
    } else {
        format!("{{ {} }}", parts.join(" "))
    }
}

fn render_triple(tests: &TestTriple, symbols: &SymbolTable, negated: bool) -> String {
    let neg = if negated { "-" } else { "" };
    format!(
        "{}({} ^{} {})",
        neg,
        render_test(&tests.id, symbols),
        render_test(&tests.attr, symbols),
        render_test(&tests.value, symbols),
    )
}
