//! Working-memory elements and preferences.
//!
//! A [`Wme`] is one `(identifier, attribute, value)` triple in working
//! memory. A [`Preference`] is a candidate working-memory change produced by
//! a rule firing; preferences that are visible above their instantiation's
//! goal level become the *results* the chunker learns from. Both live in
//! flat arenas ([`WorkingMemory`], [`PreferenceStore`]) behind copyable
//! handles, with reverse indexes for the lookups backtracing needs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::identity::IdentityId;
use crate::instantiation::InstId;
use crate::symbol::{GoalLevel, SymbolId};

// ---------------------------------------------------------------------------
// Working-memory elements
// ---------------------------------------------------------------------------

/// Handle to a working-memory element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WmeId(pub u64);

impl std::fmt::Display for WmeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "wme:{}", self.0)
    }
}

/// One element of working memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Wme {
    /// The identifier being augmented.
    pub id: SymbolId,
    /// The attribute.
    pub attr: SymbolId,
    /// The value.
    pub value: SymbolId,
    /// Monotonic timetag, unique per WME.
    pub timetag: u64,
    /// Goal level of the identifier at creation time.
    pub level: GoalLevel,
    /// The preference whose application created this WME, if any.
    /// Input and architecture-created WMEs have none.
    pub creator: Option<PrefId>,
}

/// Arena of live working-memory elements.
#[derive(Debug, Default)]
pub struct WorkingMemory {
    wmes: Vec<Wme>,
    by_id: HashMap<SymbolId, Vec<WmeId>>,
    next_timetag: u64,
}

impl WorkingMemory {
    /// Create an empty working memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a WME and return its handle.
    pub fn add(
        &mut self,
        id: SymbolId,
        attr: SymbolId,
        value: SymbolId,
        level: GoalLevel,
        creator: Option<PrefId>,
    ) -> WmeId {
        self.next_timetag += 1;
        let handle = WmeId(self.wmes.len() as u64);
        self.wmes.push(Wme {
            id,
            attr,
            value,
            timetag: self.next_timetag,
            level,
            creator,
        });
        self.by_id.entry(id).or_default().push(handle);
        handle
    }

    /// Look up a WME by handle.
    pub fn get(&self, wme: WmeId) -> Option<&Wme> {
        self.wmes.get(wme.0 as usize)
    }

    /// All WMEs augmenting the given identifier.
    pub fn augmentations_of(&self, id: SymbolId) -> &[WmeId] {
        self.by_id.get(&id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Find the WME with the exact `(id, attr, value)` triple, if present.
    pub fn find(&self, id: SymbolId, attr: SymbolId, value: SymbolId) -> Option<WmeId> {
        self.augmentations_of(id)
            .iter()
            .copied()
            .find(|&w| {
                let wme = &self.wmes[w.0 as usize];
                wme.attr == attr && wme.value == value
            })
    }

    /// Iterate over all live WMEs.
    pub fn iter(&self) -> impl Iterator<Item = (WmeId, &Wme)> {
        self.wmes
            .iter()
            .enumerate()
            .map(|(i, w)| (WmeId(i as u64), w))
    }

    /// Number of live WMEs.
    pub fn len(&self) -> usize {
        self.wmes.len()
    }

    /// Whether working memory is empty.
    pub fn is_empty(&self) -> bool {
        self.wmes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Preferences
// ---------------------------------------------------------------------------

/// Handle to a preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrefId(pub u64);

impl std::fmt::Display for PrefId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pref:{}", self.0)
    }
}

/// The kind of a preference. Binary kinds compare against a referent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PreferenceKind {
    Acceptable,
    Reject,
    Require,
    Prohibit,
    Better,
    Worse,
    Best,
    Worst,
    UnaryIndifferent,
    BinaryIndifferent,
    NumericIndifferent,
}

impl PreferenceKind {
    /// Whether this kind carries a referent (binary preferences).
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            PreferenceKind::Better
                | PreferenceKind::Worse
                | PreferenceKind::BinaryIndifferent
                | PreferenceKind::NumericIndifferent
        )
    }

    /// Short printed form, as it appears after the value in a rule action.
    pub fn glyph(self) -> &'static str {
        match self {
            PreferenceKind::Acceptable => "+",
            PreferenceKind::Reject => "-",
            PreferenceKind::Require => "!",
            PreferenceKind::Prohibit => "~",
            PreferenceKind::Better => ">",
            PreferenceKind::Worse => "<",
            PreferenceKind::Best => ">",
            PreferenceKind::Worst => "<",
            PreferenceKind::UnaryIndifferent => "=",
            PreferenceKind::BinaryIndifferent => "=",
            PreferenceKind::NumericIndifferent => "=",
        }
    }
}

impl std::fmt::Display for PreferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PreferenceKind::Acceptable => "acceptable",
            PreferenceKind::Reject => "reject",
            PreferenceKind::Require => "require",
            PreferenceKind::Prohibit => "prohibit",
            PreferenceKind::Better => "better",
            PreferenceKind::Worse => "worse",
            PreferenceKind::Best => "best",
            PreferenceKind::Worst => "worst",
            PreferenceKind::UnaryIndifferent => "unary-indifferent",
            PreferenceKind::BinaryIndifferent => "binary-indifferent",
            PreferenceKind::NumericIndifferent => "numeric-indifferent",
        };
        write!(f, "{name}")
    }
}

/// Identities for each element of a preference or condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityQuad {
    pub id: Option<IdentityId>,
    pub attr: Option<IdentityId>,
    pub value: Option<IdentityId>,
    pub referent: Option<IdentityId>,
}

/// A candidate working-memory change produced by a rule firing.
#[derive(Debug, Clone)]
pub struct Preference {
    pub kind: PreferenceKind,
    pub id: SymbolId,
    pub attr: SymbolId,
    pub value: SymbolId,
    /// Comparison value for binary kinds.
    pub referent: Option<SymbolId>,
    /// Identity of each element, shared with the producing conditions.
    pub identities: IdentityQuad,
    /// The instantiation that generated this preference. `None` for
    /// architectural preferences (e.g. the superstate link).
    pub inst: Option<InstId>,
    /// Match goal level of the generating instantiation.
    pub level: GoalLevel,
    /// Whether this preference has operator support.
    pub o_supported: bool,
    /// For preferences cloned into a chunk instantiation, the original.
    pub clone_of: Option<PrefId>,
}

/// Arena of preferences with a reverse index by target identifier.
#[derive(Debug, Default)]
pub struct PreferenceStore {
    prefs: Vec<Preference>,
    by_id: HashMap<SymbolId, Vec<PrefId>>,
}

impl PreferenceStore {
    /// Create an empty preference store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a preference and return its handle.
    pub fn add(&mut self, pref: Preference) -> PrefId {
        let handle = PrefId(self.prefs.len() as u64);
        self.by_id.entry(pref.id).or_default().push(handle);
        self.prefs.push(pref);
        handle
    }

    /// Look up a preference by handle.
    pub fn get(&self, pref: PrefId) -> Option<&Preference> {
        self.prefs.get(pref.0 as usize)
    }

    /// All preferences whose target identifier is `id`.
    pub fn for_id(&self, id: SymbolId) -> &[PrefId] {
        self.by_id.get(&id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// All preferences asserting the exact `(id, attr, value)` triple.
    pub fn supporting(&self, id: SymbolId, attr: SymbolId, value: SymbolId) -> Vec<PrefId> {
        self.for_id(id)
            .iter()
            .copied()
            .filter(|&p| {
                let pref = &self.prefs[p.0 as usize];
                pref.attr == attr && pref.value == value
            })
            .collect()
    }

    /// Number of preferences ever created.
    pub fn len(&self) -> usize {
        self.prefs.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.prefs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolTable;

    #[test]
    fn wme_lookup_by_identifier() {
        let mut tab = SymbolTable::new();
        let s1 = tab.make_goal(GoalLevel::TOP).unwrap();
        let color = tab.make_str("color").unwrap();
        let red = tab.make_str("red").unwrap();
        let blue = tab.make_str("blue").unwrap();

        let mut wm = WorkingMemory::new();
        let a = wm.add(s1, color, red, GoalLevel::TOP, None);
        let b = wm.add(s1, color, blue, GoalLevel::TOP, None);

        assert_eq!(wm.augmentations_of(s1), &[a, b]);
        assert_eq!(wm.find(s1, color, blue), Some(b));
        assert_eq!(wm.find(s1, color, s1), None);
        assert!(wm.get(a).unwrap().timetag < wm.get(b).unwrap().timetag);
    }

    #[test]
    fn preference_reverse_index() {
        let mut tab = SymbolTable::new();
        let s1 = tab.make_goal(GoalLevel::TOP).unwrap();
        let attr = tab.make_str("result").unwrap();
        let v = tab.make_int(7).unwrap();

        let mut prefs = PreferenceStore::new();
        let p = prefs.add(Preference {
            kind: PreferenceKind::Acceptable,
            id: s1,
            attr,
            value: v,
            referent: None,
            identities: IdentityQuad::default(),
            inst: None,
            level: GoalLevel::TOP,
            o_supported: false,
            clone_of: None,
        });

        assert_eq!(prefs.for_id(s1), &[p]);
        assert_eq!(prefs.supporting(s1, attr, v), vec![p]);
        assert!(prefs.supporting(s1, attr, s1).is_empty());
    }

    #[test]
    fn binary_kinds_require_referents() {
        assert!(PreferenceKind::Better.is_binary());
        assert!(PreferenceKind::Worse.is_binary());
        assert!(PreferenceKind::BinaryIndifferent.is_binary());
        assert!(!PreferenceKind::Acceptable.is_binary());
        assert!(!PreferenceKind::Best.is_binary());
    }
}
