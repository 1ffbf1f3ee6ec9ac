//! Learning configuration.
//!
//! Every flag is consulted at one specific decision point in the pipeline;
//! none is parsed or validated here beyond TOML well-formedness. Settings
//! can be loaded from a TOML file with [`ChunkSettings::load`]; unknown
//! fields are rejected to catch typos.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SeshatResult, SettingsError};

/// How learned chunks are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NameFormat {
    /// `chunk-7`
    Numbered,
    /// `chunk*apply-op*t7`, derived from the source rule's name.
    RuleBased,
}

/// Configuration surface of the learner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChunkSettings {
    /// Master switch; checked at the start of every attempt (default: true).
    pub enabled: bool,
    /// Chunk naming scheme (default: numbered).
    pub naming: NameFormat,
    /// Whether rules may be built over negations local to the substate.
    /// When false, such traces downgrade to justifications (default: true).
    pub allow_local_negations: bool,
    /// Whether rules may be built over structure recalled opaquely from
    /// long-term memory. When false, such traces downgrade (default: false).
    pub allow_opaque_recall: bool,
    /// Also backtrace operator-selection knowledge when tracing operator
    /// slots (default: false).
    pub add_osk: bool,
    /// Treat every working-memory element as a singleton, forcing identity
    /// unification across all conditions that match the same element
    /// pattern (default: false).
    pub unify_all: bool,
    /// Raise the cooperative stop flag after each successful chunk
    /// (default: false).
    pub interrupt_on_learn: bool,
    /// Maximum chunks learned per decision cycle; 0 disables learning for
    /// the cycle outright (default: 50).
    pub max_chunks: u64,
    /// Maximum duplicate productions tolerated per source production per
    /// cycle before further attempts from it are skipped (default: 3).
    pub max_duplicates: u64,
    /// Run the condition merger. Purely a match-cost optimization; safe to
    /// disable (default: true).
    pub merge_conditions: bool,
}

impl Default for ChunkSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            naming: NameFormat::Numbered,
            allow_local_negations: true,
            allow_opaque_recall: false,
            add_osk: false,
            unify_all: false,
            interrupt_on_learn: false,
            max_chunks: 50,
            max_duplicates: 3,
            merge_conditions: true,
        }
    }
}

impl ChunkSettings {
    /// Load settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> SeshatResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let settings = toml::from_str(&text).map_err(|e| SettingsError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(settings)
    }

    /// Serialize to a TOML document.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documentation() {
        let s = ChunkSettings::default();
        assert!(s.enabled);
        assert_eq!(s.naming, NameFormat::Numbered);
        assert!(s.allow_local_negations);
        assert!(!s.allow_opaque_recall);
        assert!(!s.unify_all);
        assert_eq!(s.max_chunks, 50);
        assert_eq!(s.max_duplicates, 3);
        assert!(s.merge_conditions);
    }

    #[test]
    fn toml_roundtrip() {
        let mut s = ChunkSettings::default();
        s.naming = NameFormat::RuleBased;
        s.max_chunks = 7;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("chunking.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(s.to_toml().as_bytes()).unwrap();

        let loaded = ChunkSettings::load(&path).unwrap();
        assert_eq!(loaded.naming, NameFormat::RuleBased);
        assert_eq!(loaded.max_chunks, 7);
        assert!(loaded.enabled);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("chunking.toml");
        std::fs::write(&path, "max_chunks = 1\n").unwrap();
        let loaded = ChunkSettings::load(&path).unwrap();
        assert_eq!(loaded.max_chunks, 1);
        assert!(loaded.allow_local_negations);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("chunking.toml");
        std::fs::write(&path, "max_chunk = 1\n").unwrap();
        assert!(ChunkSettings::load(&path).is_err());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(ChunkSettings::load("/nonexistent/chunking.toml").is_err());
    }
}
