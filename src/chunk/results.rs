//! Result collection: which preferences does a firing export?
//!
//! A preference is a *result* of an instantiation when its target
//! identifier lives strictly above the instantiation's match goal level —
//! the substate produced something visible to its parent. The closure then
//! follows value and referent links: if a result's value is an identifier,
//! every preference augmenting that identifier is promoted too (the whole
//! returned substructure counts), cycle-safe via a visited set.
//!
//! An empty collection means there is nothing to learn from this firing;
//! the caller skips the attempt silently.

use std::collections::HashSet;

use crate::instantiation::Instantiation;
use crate::kernel::Kernel;
use crate::memory::PrefId;
use crate::symbol::SymbolId;

/// Collect the transitive closure of result preferences for `inst`.
pub(crate) fn collect_results(kernel: &Kernel, inst: &Instantiation) -> Vec<PrefId> {
    let match_level = inst.match_level;
    let mut results: Vec<PrefId> = Vec::new();
    let mut taken: HashSet<PrefId> = HashSet::new();
    let mut visited_ids: HashSet<SymbolId> = HashSet::new();

    // Direct results: preferences on identifiers above the match level.
    let mut queue: Vec<PrefId> = Vec::new();
    for &p in &inst.actions {
        let Some(pref) = kernel.prefs.get(p) else { continue };
        let above = kernel
            .symbols
            .level_of(pref.id)
            .is_some_and(|level| level < match_level);
        if above && taken.insert(p) {
            queue.push(p);
        }
    }

    while let Some(p) = queue.pop() {
        results.push(p);
        let Some(pref) = kernel.prefs.get(p) else { continue };

        // Follow value/referent links into returned substructure.
        for link in [Some(pref.value), pref.referent].into_iter().flatten() {
            if !kernel.symbols.is_identifier(link) {
                continue;
            }
            // Only substate-local structure is promoted by being linked;
            // identifiers already above the match level have their own
            // support.
            let local = kernel
                .symbols
                .level_of(link)
                .is_some_and(|level| level >= match_level);
            if !local || !visited_ids.insert(link) {
                continue;
            }
            for &q in kernel.prefs.for_id(link) {
                if taken.insert(q) {
                    queue.push(q);
                }
            }
        }
    }

    tracing::debug!(
        inst = %inst.id,
        count = results.len(),
        "collected results"
    );
    results
}
