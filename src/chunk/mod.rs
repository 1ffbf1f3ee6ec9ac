//! Explanation-based chunking: learning rules from traces.
//!
//! The [`ExplanationBasedChunker`] turns one instantiation's trace into a
//! new production. The pipeline per attempt:
//!
//! 1. collect the result preferences ([`results`]),
//! 2. backtrace them into grounds / locals / negated sets
//!    ([`backtrace`]), joining identities as it goes,
//! 3. variablize conditions and actions ([`variablize`]), re-attaching
//!    cached constraints ([`constraints`]),
//! 4. merge duplicate conditions ([`merge`]),
//! 5. validate connectivity, repairing or downgrading to a justification
//!    ([`repair`]),
//! 6. commit to the match network and build the chunk's own
//!    instantiation ([`commit`]),
//! 7. recurse bottom-up while the new instantiation is below the top
//!    goal.
//!
//! Every exit path runs the per-attempt cleanup: transient identity state
//! is reset and the working sets are dropped, so no attempt can leak into
//! the next. Learning never raises an error past this module; internal
//! errors abort the attempt and surface as [`LearnResult::Abandoned`].

pub mod settings;
pub mod stats;

pub(crate) mod backtrace;
pub(crate) mod commit;
pub(crate) mod constraints;
pub(crate) mod merge;
pub(crate) mod repair;
pub(crate) mod results;
pub(crate) mod variablize;

use std::collections::{HashMap, HashSet};

use crate::condition::{Condition, PositiveCondition};
use crate::error::{ChunkError, SeshatResult};
use crate::identity::IdentityGraph;
use crate::instantiation::InstId;
use crate::kernel::Kernel;
use crate::memory::{PrefId, Preference, WmeId};
use crate::production::{ProductionId, ProductionType};
use crate::symbol::{GoalLevel, SymbolId};

use backtrace::Backtracer;
use commit::Disposition;
use constraints::ConstraintCache;
use repair::ValidationOutcome;
use variablize::Variablizer;

pub use settings::{ChunkSettings, NameFormat};
pub use stats::ChunkStats;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why an attempt was skipped before backtracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Learning is switched off.
    LearningDisabled,
    /// The cooperative stop flag is raised.
    StopRequested,
    /// The instantiation produced no qualifying results.
    NoResults,
    /// The per-cycle chunk budget is exhausted.
    MaxChunksReached,
    /// The source production exceeded its duplicate budget this cycle.
    MaxDuplicatesReached,
}

/// The outcome of one learning attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LearnResult {
    /// A general chunk was learned.
    Chunk { production: ProductionId },
    /// A ground justification was learned.
    Justification { production: ProductionId },
    /// The built rule duplicated an existing production.
    Duplicate { existing: ProductionId },
    /// Nothing was attempted.
    Skipped { reason: SkipReason },
    /// An internal error aborted the attempt; the kernel is unaffected.
    Abandoned { error: String },
}

// ---------------------------------------------------------------------------
// Per-attempt context
// ---------------------------------------------------------------------------

/// All transient state of one chunk-build attempt. Constructed fresh per
/// attempt (and per bottom-up recursion level) and dropped at its end.
#[derive(Debug)]
pub(crate) struct ChunkingContext {
    /// Conditions proven operational, in discovery order.
    pub grounds: Vec<PositiveCondition>,
    /// Sub-state conditions awaiting further tracing (LIFO).
    pub locals: Vec<PositiveCondition>,
    /// Locals without a trace, pending ground/drop resolution.
    pub potentials: Vec<PositiveCondition>,
    /// Deferred negated conditions, deduplicated by structural hash.
    pub negated: Vec<Condition>,
    pub negated_hashes: HashSet<u64>,
    /// WME → index of the ground that first matched it.
    pub seen_wmes: HashMap<WmeId, usize>,
    /// The result preferences this attempt is explaining.
    pub results: Vec<PrefId>,
    /// Conditions at or above this level are operational.
    pub grounds_level: GoalLevel,
    /// Stamp for marking visited instantiations.
    pub backtrace_num: u64,
    pub tested_quiescence: bool,
    pub tested_local_negation: bool,
    pub tested_ltm_recall: bool,
    /// Relational tests captured for later re-attachment.
    pub constraint_cache: ConstraintCache,
    /// Attributes declared as singletons for this attempt.
    pub singleton_attrs: HashSet<SymbolId>,
}

impl ChunkingContext {
    pub fn new(grounds_level: GoalLevel, backtrace_num: u64) -> Self {
        Self {
            grounds: Vec::new(),
            locals: Vec::new(),
            potentials: Vec::new(),
            negated: Vec::new(),
            negated_hashes: HashSet::new(),
            seen_wmes: HashMap::new(),
            results: Vec::new(),
            grounds_level,
            backtrace_num,
            tested_quiescence: false,
            tested_local_negation: false,
            tested_ltm_recall: false,
            constraint_cache: ConstraintCache::new(),
            singleton_attrs: HashSet::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// The chunker
// ---------------------------------------------------------------------------

/// The explanation-based learning engine for one agent.
///
/// Owns the identity graph and all per-attempt state; the kernel is
/// borrowed per call. One instance exists per agent and is never shared
/// across threads.
#[derive(Debug)]
pub struct ExplanationBasedChunker {
    settings: ChunkSettings,
    stats: ChunkStats,
    identities: IdentityGraph,
    singletons: HashSet<SymbolId>,
    rule_counter: u64,
    chunks_this_cycle: u64,
    backtrace_counter: u64,
    duplicates_per_source: HashMap<u64, u64>,
}

impl ExplanationBasedChunker {
    /// Create a chunker with the given settings.
    pub fn new(settings: ChunkSettings) -> Self {
        Self {
            settings,
            stats: ChunkStats::default(),
            identities: IdentityGraph::new(),
            singletons: HashSet::new(),
            rule_counter: 0,
            chunks_this_cycle: 0,
            backtrace_counter: 0,
            duplicates_per_source: HashMap::new(),
        }
    }

    /// Current settings.
    pub fn settings(&self) -> &ChunkSettings {
        &self.settings
    }

    /// Mutable settings access.
    pub fn settings_mut(&mut self) -> &mut ChunkSettings {
        &mut self.settings
    }

    /// Learning statistics so far.
    pub fn stats(&self) -> &ChunkStats {
        &self.stats
    }

    /// The identity graph (shared with instantiation construction).
    pub fn identities(&self) -> &IdentityGraph {
        &self.identities
    }

    /// Mutable identity graph access.
    pub fn identities_mut(&mut self) -> &mut IdentityGraph {
        &mut self.identities
    }

    /// Declare an attribute as a singleton: all conditions matching a WME
    /// with this attribute unify their identities.
    pub fn add_singleton(&mut self, attr: SymbolId) {
        self.singletons.insert(attr);
    }

    /// Reset the per-decision-cycle budgets.
    pub fn begin_cycle(&mut self) {
        self.chunks_this_cycle = 0;
        self.duplicates_per_source.clear();
    }

    /// Learn from an instantiation, recursing bottom-up through any chunk
    /// instantiations it produces. Returns one result per attempt, the
    /// original instantiation's first.
    pub fn learn_rule_from_instance(
        &mut self,
        kernel: &mut Kernel,
        inst: InstId,
    ) -> Vec<LearnResult> {
        let mut out = Vec::new();
        self.learn_recursive(kernel, inst, &mut out);
        out
    }

    fn learn_recursive(&mut self, kernel: &mut Kernel, inst_id: InstId, out: &mut Vec<LearnResult>) {
        if !self.settings.enabled {
            out.push(LearnResult::Skipped {
                reason: SkipReason::LearningDisabled,
            });
            return;
        }
        if kernel.stop_requested {
            out.push(LearnResult::Skipped {
                reason: SkipReason::StopRequested,
            });
            return;
        }
        if self.chunks_this_cycle >= self.settings.max_chunks {
            self.stats.max_chunks_aborts += 1;
            out.push(LearnResult::Skipped {
                reason: SkipReason::MaxChunksReached,
            });
            return;
        }
        if let Ok(inst) = kernel.insts.get(inst_id) {
            if let Some(source) = inst.production {
                let seen = self
                    .duplicates_per_source
                    .get(&source.0)
                    .copied()
                    .unwrap_or(0);
                if seen >= self.settings.max_duplicates {
                    self.stats.max_duplicate_skips += 1;
                    out.push(LearnResult::Skipped {
                        reason: SkipReason::MaxDuplicatesReached,
                    });
                    return;
                }
            }
        }

        let attempt = self.attempt(kernel, inst_id);
        // Per-attempt cleanup runs on every exit path, success or failure.
        self.identities.clean_up();

        match attempt {
            Ok((result, chunk_inst)) => {
                out.push(result);
                if let Some(new_inst) = chunk_inst {
                    let level = kernel
                        .insts
                        .get(new_inst)
                        .map(|i| i.match_level)
                        .unwrap_or(GoalLevel::TOP);
                    if level > GoalLevel::TOP {
                        tracing::debug!(
                            inst = %new_inst,
                            %level,
                            "bottom-up: learning from the new chunk instantiation"
                        );
                        self.learn_recursive(kernel, new_inst, out);
                    }
                }
            }
            Err(error) => {
                self.stats.abandoned += 1;
                tracing::warn!(%error, "learning attempt abandoned");
                out.push(LearnResult::Abandoned {
                    error: error.to_string(),
                });
            }
        }
    }

    /// One build attempt: collect, backtrace, variablize, merge, validate,
    /// commit. Early returns for the expected nothing-to-learn cases.
    fn attempt(
        &mut self,
        kernel: &mut Kernel,
        inst_id: InstId,
    ) -> SeshatResult<(LearnResult, Option<InstId>)> {
        let inst = kernel.insts.get(inst_id)?.clone();
        let results = results::collect_results(kernel, &inst);
        if results.is_empty() {
            self.stats.no_result_skips += 1;
            return Ok((
                LearnResult::Skipped {
                    reason: SkipReason::NoResults,
                },
                None,
            ));
        }
        let Some(grounds_level) = inst.match_level.above() else {
            self.stats.no_result_skips += 1;
            return Ok((
                LearnResult::Skipped {
                    reason: SkipReason::NoResults,
                },
                None,
            ));
        };

        self.stats.attempts += 1;
        self.backtrace_counter += 1;
        let mut ctx = ChunkingContext::new(grounds_level, self.backtrace_counter);
        ctx.singleton_attrs = self.singletons.clone();
        ctx.results = results.clone();

        tracing::debug!(
            inst = %inst_id,
            label = %inst.label,
            results = results.len(),
            %grounds_level,
            "learning from instantiation"
        );

        let connected_negated = {
            let mut bt = Backtracer {
                kernel,
                identities: &mut self.identities,
                settings: &self.settings,
                stats: &mut self.stats,
                ctx: &mut ctx,
            };
            for &r in &results {
                bt.trace_result(r)?;
            }
            bt.trace_locals()?;
            bt.connected_negated()
        };

        let correctness_issue = (ctx.tested_local_negation
            && !self.settings.allow_local_negations)
            || ctx.tested_quiescence
            || (ctx.tested_ltm_recall && !self.settings.allow_opaque_recall);
        let mut variablize = !correctness_issue;
        if correctness_issue {
            self.stats.reverted_to_justification += 1;
            tracing::info!(
                quiescence = ctx.tested_quiescence,
                local_negation = ctx.tested_local_negation,
                ltm_recall = ctx.tested_ltm_recall,
                "correctness issue possible; building a justification"
            );
        }

        let result_prefs: Vec<Preference> = results
            .iter()
            .filter_map(|&r| kernel.prefs.get(r).cloned())
            .collect();

        // At most two iterations: chunk, then justification fallback.
        loop {
            let mut built = {
                let mut vz =
                    Variablizer::new(&mut kernel.symbols, &mut self.identities, variablize);
                vz.build(&ctx.grounds, &connected_negated, &result_prefs)?
            };
            ctx.constraint_cache
                .attach(&mut built.variablized, &self.identities, variablize)?;

            if variablize && self.settings.merge_conditions {
                merge::merge_conditions(
                    &mut built.variablized,
                    &mut built.instantiated,
                    &mut self.stats,
                );
            }

            if variablize {
                match repair::validate_and_repair(
                    kernel,
                    &mut built.variablized,
                    &mut built.instantiated,
                    grounds_level,
                )? {
                    ValidationOutcome::Valid => {}
                    ValidationOutcome::Repaired { added } => {
                        self.stats.repaired += 1;
                        tracing::debug!(added, "repaired rule connectivity");
                    }
                    ValidationOutcome::Failed => {
                        self.stats.reverted_to_justification += 1;
                        tracing::info!("validation failed; rebuilding as a justification");
                        variablize = false;
                        continue;
                    }
                }
            }

            let ptype = if variablize {
                ProductionType::Chunk
            } else {
                ProductionType::Justification
            };
            let name = self.generate_name(kernel, &inst.label, ptype)?;
            let outcome = commit::commit_rule(
                kernel,
                &mut self.identities,
                name.clone(),
                ptype,
                built,
                &results,
                grounds_level,
            )?;
            self.stats.constraints_dropped += ctx.constraint_cache.dropped();

            return match outcome.disposition {
                Disposition::Matched => {
                    let result = if ptype == ProductionType::Chunk {
                        self.stats.chunks += 1;
                        self.chunks_this_cycle += 1;
                        if self.settings.interrupt_on_learn {
                            kernel.stop_requested = true;
                            tracing::info!("interrupt requested after learning");
                        }
                        LearnResult::Chunk {
                            production: outcome.production,
                        }
                    } else {
                        self.stats.justifications += 1;
                        LearnResult::Justification {
                            production: outcome.production,
                        }
                    };
                    Ok((result, outcome.chunk_inst))
                }
                Disposition::Duplicate(existing) => {
                    self.stats.duplicates += 1;
                    if let Some(source) = inst.production {
                        *self.duplicates_per_source.entry(source.0).or_insert(0) += 1;
                    }
                    // The existing production's instantiation still feeds
                    // bottom-up learning.
                    Ok((LearnResult::Duplicate { existing }, outcome.chunk_inst))
                }
                Disposition::ChunkKeptWithoutMatch => {
                    self.stats.chunks += 1;
                    self.stats.chunks_kept_without_match += 1;
                    self.chunks_this_cycle += 1;
                    Ok((
                        LearnResult::Chunk {
                            production: outcome.production,
                        },
                        None,
                    ))
                }
                Disposition::JustificationExcised => {
                    self.stats.justifications_excised += 1;
                    Err(ChunkError::RefractionFailed { name }.into())
                }
            };
        }
    }

    /// Generate a fresh production name per the configured format,
    /// suffixing `*dN` until unique.
    fn generate_name(
        &mut self,
        kernel: &Kernel,
        source_label: &str,
        ptype: ProductionType,
    ) -> SeshatResult<String> {
        self.rule_counter += 1;
        let base = match (ptype, self.settings.naming) {
            (ProductionType::Justification, _) => {
                format!("justification-{}", self.rule_counter)
            }
            (ProductionType::Chunk, NameFormat::Numbered) => {
                format!("chunk-{}", self.rule_counter)
            }
            (ProductionType::Chunk, NameFormat::RuleBased) => {
                let source = if source_label.trim().is_empty() {
                    "architecture"
                } else {
                    source_label.trim()
                };
                format!("chunk*{source}*t{}", self.rule_counter)
            }
        };
        let mut name = base.clone();
        let mut n = 1;
        while kernel.productions.contains_name(&name) {
            n += 1;
            name = format!("{base}*d{n}");
        }
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Agent;

    #[test]
    fn name_formats() {
        let mut agent = Agent::new(ChunkSettings::default());
        let name = agent
            .chunker
            .generate_name(&agent.kernel, "apply-op", ProductionType::Chunk)
            .unwrap();
        assert_eq!(name, "chunk-1");

        agent.chunker.settings_mut().naming = NameFormat::RuleBased;
        let name = agent
            .chunker
            .generate_name(&agent.kernel, "apply-op", ProductionType::Chunk)
            .unwrap();
        assert_eq!(name, "chunk*apply-op*t2");

        let name = agent
            .chunker
            .generate_name(&agent.kernel, "", ProductionType::Chunk)
            .unwrap();
        assert_eq!(name, "chunk*architecture*t3");

        let name = agent
            .chunker
            .generate_name(&agent.kernel, "x", ProductionType::Justification)
            .unwrap();
        assert_eq!(name, "justification-4");
    }

    #[test]
    fn name_collisions_get_suffixes() {
        let mut agent = Agent::new(ChunkSettings::default());
        agent
            .kernel
            .productions
            .insert("chunk-1".into(), ProductionType::Chunk, vec![], vec![]);
        let name = agent
            .chunker
            .generate_name(&agent.kernel, "x", ProductionType::Chunk)
            .unwrap();
        assert_eq!(name, "chunk-1*d2");
    }

    #[test]
    fn disabled_learning_skips_immediately() {
        let mut settings = ChunkSettings::default();
        settings.enabled = false;
        let mut agent = Agent::new(settings);
        let s1 = agent.push_goal().unwrap();
        let inst = agent.instantiation("noop", s1).fire().unwrap();
        let results = agent.learn_from(inst);
        assert_eq!(
            results,
            vec![LearnResult::Skipped {
                reason: SkipReason::LearningDisabled
            }]
        );
        assert_eq!(agent.chunker.stats().attempts, 0);
    }

    #[test]
    fn begin_cycle_resets_budgets() {
        let mut agent = Agent::new(ChunkSettings::default());
        agent.chunker.chunks_this_cycle = 5;
        agent.chunker.duplicates_per_source.insert(1, 3);
        agent.chunker.begin_cycle();
        assert_eq!(agent.chunker.chunks_this_cycle, 0);
        assert!(agent.chunker.duplicates_per_source.is_empty());
    }
}
