//! Core symbol types for the seshat engine.
//!
//! Symbols are the atomic units of the trace language: identifiers (with a
//! goal level and goal/impasse flags), variables, and string/integer/float
//! constants. All symbols are interned in a [`SymbolTable`] and referred to
//! by [`SymbolId`] handles, so equality and hashing are O(1) everywhere in
//! the learning pipeline.

use std::collections::HashMap;
use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use crate::error::{SeshatResult, SymbolError};

/// Unique, niche-optimized identifier for an interned symbol.
///
/// Uses `NonZeroU64` so that `Option<SymbolId>` is the same size as `SymbolId`
/// (the niche optimization lets the compiler use 0 as the `None` discriminant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SymbolId(NonZeroU64);

impl SymbolId {
    /// Create a `SymbolId` from a raw `u64`.
    ///
    /// Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(SymbolId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for SymbolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sym:{}", self.0)
    }
}

/// Depth of a goal in the goal stack. The top goal is level 1; subgoals
/// count upward from there, so "above" means numerically smaller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GoalLevel(pub u32);

impl GoalLevel {
    /// The top goal of the stack.
    pub const TOP: GoalLevel = GoalLevel(1);

    /// The level directly above this one (toward the top goal).
    ///
    /// Returns `None` at the top: there is nothing above the top goal.
    pub fn above(self) -> Option<GoalLevel> {
        (self.0 > 1).then(|| GoalLevel(self.0 - 1))
    }

    /// The level directly below this one (a deeper subgoal).
    pub fn below(self) -> GoalLevel {
        GoalLevel(self.0 + 1)
    }
}

impl std::fmt::Display for GoalLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Payload of an identifier symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifierInfo {
    /// Name letter, e.g. the `S` of `S3`.
    pub letter: char,
    /// Name number, unique per letter.
    pub number: u64,
    /// Goal level of the identifier.
    pub level: GoalLevel,
    /// Whether this identifier is a goal (state).
    pub is_goal: bool,
    /// Whether this identifier is an impasse.
    pub is_impasse: bool,
    /// Whether this identifier names a long-term memory entity.
    pub is_long_term: bool,
}

/// The interned value of a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SymbolValue {
    /// A working-memory identifier such as `S1` or `O4`.
    Identifier(IdentifierInfo),
    /// A rule variable such as `<s1>`. Only appears in learned rules,
    /// never in working memory.
    Variable(String),
    /// A string constant.
    Str(String),
    /// An integer constant.
    Int(i64),
    /// A floating-point constant.
    Float(f64),
}

/// Interning table for all symbols known to the engine.
///
/// Identifiers get fresh letter/number names; constants and variables are
/// deduplicated so that the same value always maps to the same [`SymbolId`].
#[derive(Debug, Default)]
pub struct SymbolTable {
    values: Vec<SymbolValue>,
    strings: HashMap<String, SymbolId>,
    variables: HashMap<String, SymbolId>,
    ints: HashMap<i64, SymbolId>,
    floats: HashMap<u64, SymbolId>,
    id_counters: HashMap<char, u64>,
    var_counter: u64,
}

impl SymbolTable {
    /// Create an empty symbol table.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, value: SymbolValue) -> SeshatResult<SymbolId> {
        let raw = self.values.len() as u64 + 1;
        let id = SymbolId::new(raw).ok_or(SymbolError::AllocatorExhausted)?;
        self.values.push(value);
        Ok(id)
    }

    /// Look up the value of a symbol.
    pub fn get(&self, id: SymbolId) -> &SymbolValue {
        &self.values[(id.get() - 1) as usize]
    }

    fn get_mut(&mut self, id: SymbolId) -> &mut SymbolValue {
        &mut self.values[(id.get() - 1) as usize]
    }

    /// Number of interned symbols.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Create a fresh identifier with the given letter at the given level.
    pub fn make_identifier(&mut self, letter: char, level: GoalLevel) -> SeshatResult<SymbolId> {
        let letter = letter.to_ascii_uppercase();
        let counter = self.id_counters.entry(letter).or_insert(0);
        *counter += 1;
        let number = *counter;
        self.push(SymbolValue::Identifier(IdentifierInfo {
            letter,
            number,
            level,
            is_goal: false,
            is_impasse: false,
            is_long_term: false,
        }))
    }

    /// Create a fresh goal (state) identifier at the given level.
    pub fn make_goal(&mut self, level: GoalLevel) -> SeshatResult<SymbolId> {
        let id = self.make_identifier('S', level)?;
        if let SymbolValue::Identifier(info) = self.get_mut(id) {
            info.is_goal = true;
        }
        Ok(id)
    }

    /// Create a fresh impasse identifier at the given level.
    pub fn make_impasse(&mut self, level: GoalLevel) -> SeshatResult<SymbolId> {
        let id = self.make_identifier('I', level)?;
        if let SymbolValue::Identifier(info) = self.get_mut(id) {
            info.is_impasse = true;
        }
        Ok(id)
    }

    /// Mark an identifier as a long-term memory entity.
    pub fn set_long_term(&mut self, id: SymbolId) -> SeshatResult<()> {
        match self.get_mut(id) {
            SymbolValue::Identifier(info) => {
                info.is_long_term = true;
                Ok(())
            }
            other => Err(SymbolError::NotAnIdentifier {
                found: kind_name(other).to_string(),
            }
            .into()),
        }
    }

    /// Intern a string constant.
    pub fn make_str(&mut self, s: impl Into<String>) -> SeshatResult<SymbolId> {
        let s = s.into();
        if let Some(&id) = self.strings.get(&s) {
            return Ok(id);
        }
        let id = self.push(SymbolValue::Str(s.clone()))?;
        self.strings.insert(s, id);
        Ok(id)
    }

    /// Intern an integer constant.
    pub fn make_int(&mut self, n: i64) -> SeshatResult<SymbolId> {
        if let Some(&id) = self.ints.get(&n) {
            return Ok(id);
        }
        let id = self.push(SymbolValue::Int(n))?;
        self.ints.insert(n, id);
        Ok(id)
    }

    /// Intern a floating-point constant (deduplicated by bit pattern).
    pub fn make_float(&mut self, x: f64) -> SeshatResult<SymbolId> {
        let bits = x.to_bits();
        if let Some(&id) = self.floats.get(&bits) {
            return Ok(id);
        }
        let id = self.push(SymbolValue::Float(x))?;
        self.floats.insert(bits, id);
        Ok(id)
    }

    /// Intern a named variable, e.g. `make_variable("s1")` yields `<s1>`.
    pub fn make_variable(&mut self, name: impl Into<String>) -> SeshatResult<SymbolId> {
        let name = name.into();
        if let Some(&id) = self.variables.get(&name) {
            return Ok(id);
        }
        let id = self.push(SymbolValue::Variable(name.clone()))?;
        self.variables.insert(name, id);
        Ok(id)
    }

    /// Generate a variable guaranteed not to collide with any existing one.
    ///
    /// The prefix letter follows the variablizer's naming heuristic: `s` for
    /// states, `o` for operators, `c` for constants.
    pub fn fresh_variable(&mut self, prefix: char) -> SeshatResult<SymbolId> {
        loop {
            self.var_counter += 1;
            let name = format!("{}{}", prefix.to_ascii_lowercase(), self.var_counter);
            if !self.variables.contains_key(&name) {
                return self.make_variable(name);
            }
        }
    }

    /// Whether a symbol is an identifier.
    pub fn is_identifier(&self, id: SymbolId) -> bool {
        matches!(self.get(id), SymbolValue::Identifier(_))
    }

    /// Whether a symbol is a variable.
    pub fn is_variable(&self, id: SymbolId) -> bool {
        matches!(self.get(id), SymbolValue::Variable(_))
    }

    /// Whether a symbol is a goal identifier.
    pub fn is_goal(&self, id: SymbolId) -> bool {
        matches!(self.get(id), SymbolValue::Identifier(info) if info.is_goal)
    }

    /// Whether a symbol is an impasse identifier.
    pub fn is_impasse(&self, id: SymbolId) -> bool {
        matches!(self.get(id), SymbolValue::Identifier(info) if info.is_impasse)
    }

    /// Whether a symbol is a long-term identifier.
    pub fn is_long_term(&self, id: SymbolId) -> bool {
        matches!(self.get(id), SymbolValue::Identifier(info) if info.is_long_term)
    }

    /// Goal level of an identifier, `None` for non-identifiers.
    pub fn level_of(&self, id: SymbolId) -> Option<GoalLevel> {
        match self.get(id) {
            SymbolValue::Identifier(info) => Some(info.level),
            _ => None,
        }
    }

    /// Identifier letter, `None` for non-identifiers.
    pub fn letter_of(&self, id: SymbolId) -> Option<char> {
        match self.get(id) {
            SymbolValue::Identifier(info) => Some(info.letter),
            _ => None,
        }
    }

    /// Render a symbol the way it would appear in a printed rule:
    /// `S3` for identifiers, `<s1>` for variables, raw text for constants.
    pub fn display(&self, id: SymbolId) -> String {
        match self.get(id) {
            SymbolValue::Identifier(info) => format!("{}{}", info.letter, info.number),
            SymbolValue::Variable(name) => format!("<{name}>"),
            SymbolValue::Str(s) => s.clone(),
            SymbolValue::Int(n) => n.to_string(),
            SymbolValue::Float(x) => format!("{x}"),
        }
    }
}

fn kind_name(value: &SymbolValue) -> &'static str {
    match value {
        SymbolValue::Identifier(_) => "identifier",
        SymbolValue::Variable(_) => "variable",
        SymbolValue::Str(_) => "string",
        SymbolValue::Int(_) => "integer",
        SymbolValue::Float(_) => "float",
    }
}
