//! Productions: the persistent rules the learner builds.
//!
//! A [`Production`] pairs a variablized condition list with a variablized
//! action list under a generated name. Chunks are general (variablized);
//! justifications are ground-specific. Both render to the usual
//! `sp { ... }` textual form, and the canonical rendering (variables
//! renamed in order of first occurrence) doubles as the duplicate-detection
//! key in the match network.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::condition::{Condition, Constraint, Test, TestTriple};
use crate::memory::{IdentityQuad, PreferenceKind};
use crate::symbol::{SymbolId, SymbolTable};

/// Handle to a stored production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductionId(pub u64);

impl std::fmt::Display for ProductionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "prod:{}", self.0)
    }
}

/// Whether a learned rule is a general chunk or a ground justification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductionType {
    Chunk,
    Justification,
}

impl std::fmt::Display for ProductionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProductionType::Chunk => write!(f, "chunk"),
            ProductionType::Justification => write!(f, "justification"),
        }
    }
}

/// One right-hand-side action: a preference template.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub kind: PreferenceKind,
    pub id: SymbolId,
    pub attr: SymbolId,
    pub value: SymbolId,
    pub referent: Option<SymbolId>,
    /// Identities of each element, kept for reinstantiation.
    pub identities: IdentityQuad,
}

impl Action {
    /// Render this action, e.g. `(<s> ^result <v> +)`.
    pub fn render(&self, symbols: &SymbolTable) -> String {
        let mut out = format!(
            "({} ^{} {} {}",
            symbols.display(self.id),
            symbols.display(self.attr),
            symbols.display(self.value),
            self.kind.glyph(),
        );
        if let Some(referent) = self.referent {
            out.push(' ');
            out.push_str(&symbols.display(referent));
        }
        out.push(')');
        out
    }
}

/// A learned (or hand-built) rule.
#[derive(Debug, Clone)]
pub struct Production {
    pub id: ProductionId,
    pub name: String,
    pub ptype: ProductionType,
    /// Variablized left-hand side.
    pub conditions: Vec<Condition>,
    /// Variablized right-hand side.
    pub actions: Vec<Action>,
}

impl Production {
    /// Render the rule in `sp { ... }` form.
    pub fn render(&self, symbols: &SymbolTable) -> String {
        let mut out = format!("sp {{{}\n", self.name);
        for cond in &self.conditions {
            out.push_str("   ");
            out.push_str(&cond.render(symbols));
            out.push('\n');
        }
        out.push_str("   -->\n");
        for action in &self.actions {
            out.push_str("   ");
            out.push_str(&action.render(symbols));
            out.push('\n');
        }
        out.push('}');
        out
    }

    /// Canonical form: the rendering with every variable renamed to its
    /// order of first occurrence. Two rules with the same canonical form
    /// are duplicates regardless of cosmetic variable names.
    pub fn canonical_form(&self, symbols: &SymbolTable) -> String {
        let mut renames: HashMap<SymbolId, String> = HashMap::new();
        let mut out = String::new();
        for cond in &self.conditions {
            canonicalize_condition(cond, symbols, &mut renames, &mut out);
        }
        out.push_str("-->");
        for action in &self.actions {
            out.push('(');
            for sym in [Some(action.id), Some(action.attr), Some(action.value), action.referent]
                .into_iter()
                .flatten()
            {
                out.push_str(&canonical_sym(sym, symbols, &mut renames));
                out.push(' ');
            }
            out.push_str(action.kind.glyph());
            out.push(')');
        }
        out
    }
}

fn canonical_sym(
    sym: SymbolId,
    symbols: &SymbolTable,
    renames: &mut HashMap<SymbolId, String>,
) -> String {
    if symbols.is_variable(sym) {
        let next = renames.len();
        renames
            .entry(sym)
            .or_insert_with(|| format!("?{next}"))
            .clone()
    } else {
        symbols.display(sym)
    }
}

fn canonicalize_test(
    test: &Test,
    symbols: &SymbolTable,
    renames: &mut HashMap<SymbolId, String>,
    out: &mut String,
) {
    if test.goal_test {
        out.push_str("state:");
    }
    if test.impasse_test {
        out.push_str("impasse:");
    }
    out.push_str(&canonical_sym(test.sym, symbols, renames));
    for c in &test.constraints {
        match c {
            Constraint::Relational { kind, referent, .. } => {
                out.push_str(kind.glyph());
                out.push_str(&canonical_sym(*referent, symbols, renames));
            }
            Constraint::Disjunction(syms) => {
                out.push_str("<<");
                for s in syms {
                    out.push_str(&symbols.display(*s));
                    out.push(' ');
                }
                out.push_str(">>");
            }
        }
    }
}

fn canonicalize_triple(
    tests: &TestTriple,
    symbols: &SymbolTable,
    renames: &mut HashMap<SymbolId, String>,
    out: &mut String,
) {
    for test in [&tests.id, &tests.attr, &tests.value] {
        canonicalize_test(test, symbols, renames, out);
        out.push(' ');
    }
}

fn canonicalize_condition(
    cond: &Condition,
    symbols: &SymbolTable,
    renames: &mut HashMap<SymbolId, String>,
    out: &mut String,
) {
    match cond {
        Condition::Positive(pc) => {
            out.push('(');
            canonicalize_triple(&pc.tests, symbols, renames, out);
            out.push(')');
        }
        Condition::Negative(tests) => {
            out.push_str("-(");
            canonicalize_triple(tests, symbols, renames, out);
            out.push(')');
        }
        Condition::NegatedConjunction(conds) => {
            out.push_str("-{");
            for c in conds {
                canonicalize_condition(c, symbols, renames, out);
            }
            out.push('}');
        }
    }
}

// ---------------------------------------------------------------------------
// Production store
// ---------------------------------------------------------------------------

/// Store of live productions.
#[derive(Debug, Default)]
pub struct ProductionStore {
    productions: HashMap<u64, Production>,
    by_name: HashMap<String, ProductionId>,
    next: u64,
}

impl ProductionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a production, assigning its handle.
    pub fn insert(
        &mut self,
        name: String,
        ptype: ProductionType,
        conditions: Vec<Condition>,
        actions: Vec<Action>,
    ) -> ProductionId {
        self.next += 1;
        let id = ProductionId(self.next);
        self.by_name.insert(name.clone(), id);
        self.productions.insert(
            id.0,
            Production {
                id,
                name,
                ptype,
                conditions,
                actions,
            },
        );
        id
    }

    /// Look up a production by handle.
    pub fn get(&self, id: ProductionId) -> Option<&Production> {
        self.productions.get(&id.0)
    }

    /// Look up a production by name.
    pub fn by_name(&self, name: &str) -> Option<&Production> {
        self.by_name.get(name).and_then(|id| self.get(*id))
    }

    /// Whether a name is taken.
    pub fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Remove a production entirely.
    pub fn excise(&mut self, id: ProductionId) -> Option<Production> {
        let prod = self.productions.remove(&id.0)?;
        self.by_name.remove(&prod.name);
        Some(prod)
    }

    /// Iterate over all live productions.
    pub fn iter(&self) -> impl Iterator<Item = &Production> {
        self.productions.values()
    }

    /// Number of live productions.
    pub fn len(&self) -> usize {
        self.productions.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.productions.is_empty()
    }
}
