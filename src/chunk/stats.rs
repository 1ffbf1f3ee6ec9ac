//! Learning statistics.
//!
//! Counters updated throughout the pipeline and surfaced by the CLI and by
//! `Agent::chunking_stats`. Serializable so telemetry can export them
//! as JSON.

use serde::{Deserialize, Serialize};

/// Counters for the explanation subsystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkStats {
    /// Learning attempts that reached backtracing.
    pub attempts: u64,
    /// Chunks successfully added to the match network.
    pub chunks: u64,
    /// Justifications successfully added.
    pub justifications: u64,
    /// Candidate rules discarded as duplicates of existing productions.
    pub duplicates: u64,
    /// Attempts that downgraded from chunk to justification (correctness
    /// flags or failed validation).
    pub reverted_to_justification: u64,
    /// Rules whose condition lists were repaired for connectivity.
    pub repaired: u64,
    /// Attempts aborted by internal errors.
    pub abandoned: u64,
    /// Instantiations with nothing to learn (no qualifying results).
    pub no_result_skips: u64,
    /// Attempts refused because the per-cycle chunk budget was exhausted.
    pub max_chunks_aborts: u64,
    /// Attempts refused because a source production exceeded its duplicate
    /// budget for the cycle.
    pub max_duplicate_skips: u64,
    /// Potential conditions dropped as ungrounded (identities literalized).
    pub ungrounded_potentials: u64,
    /// Potential conditions grounded through the closure of the grounds.
    pub grounded_potentials: u64,
    /// Conditions eliminated by the merger.
    pub merged_conditions: u64,
    /// Identity joins triggered by repeated matches of one WME.
    pub singleton_unifications: u64,
    /// Constraints dropped because their referent never grounded.
    pub constraints_dropped: u64,
    /// Justifications excised after their refracted instantiation failed.
    pub justifications_excised: u64,
    /// Chunks kept despite a failed refraction match.
    pub chunks_kept_without_match: u64,
}

impl ChunkStats {
    /// Serialize as pretty-printed JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Total productions successfully learned.
    pub fn learned(&self) -> u64 {
        self.chunks + self.justifications
    }
}

impl std::fmt::Display for ChunkStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "attempts:        {}", self.attempts)?;
        writeln!(f, "chunks:          {}", self.chunks)?;
        writeln!(f, "justifications:  {}", self.justifications)?;
        writeln!(f, "duplicates:      {}", self.duplicates)?;
        writeln!(f, "reverted:        {}", self.reverted_to_justification)?;
        writeln!(f, "repaired:        {}", self.repaired)?;
        write!(f, "abandoned:       {}", self.abandoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_export_contains_counters() {
        let stats = ChunkStats {
            attempts: 3,
            chunks: 2,
            ..Default::default()
        };
        let json = stats.to_json();
        assert!(json.contains("\"attempts\": 3"));
        assert!(json.contains("\"chunks\": 2"));

        let back: ChunkStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stats);
    }

    #[test]
    fn learned_sums_both_rule_types() {
        let stats = ChunkStats {
            chunks: 2,
            justifications: 5,
            ..Default::default()
        };
        assert_eq!(stats.learned(), 7);
    }
}
