//! Condition merging: match-cost reduction.
//!
//! Two positive conditions that test the same identifier, attribute, and
//! value equality differ only in their extra constraints; keeping both
//! costs a join in the match network for no additional selectivity. The
//! merger folds their constraints into one condition and drops the other
//! (subsumed conditions disappear as the degenerate case of an empty
//! fold). Identical negative conditions collapse the same way.
//!
//! Skipping this pass never changes what a rule matches, only what it
//! costs, which is why it sits behind a settings flag.

use crate::condition::{Condition, Test};

use super::stats::ChunkStats;

/// Merge duplicate positive conditions and identical negatives in place,
/// keeping the instantiated twin list structurally parallel.
pub(crate) fn merge_conditions(
    variablized: &mut Vec<Condition>,
    instantiated: &mut Vec<Condition>,
    stats: &mut ChunkStats,
) {
    debug_assert_eq!(variablized.len(), instantiated.len());

    let mut keep: Vec<bool> = vec![true; variablized.len()];
    for i in 0..variablized.len() {
        if !keep[i] {
            continue;
        }
        for j in (i + 1)..variablized.len() {
            if !keep[j] {
                continue;
            }
            if mergeable(&variablized[i], &variablized[j]) {
                let (head, tail) = variablized.split_at_mut(j);
                merge_into(&mut head[i], &tail[0]);
                keep[j] = false;
                stats.merged_conditions += 1;
            }
        }
    }

    let mut keep_iter = keep.iter();
    variablized.retain(|_| *keep_iter.next().unwrap_or(&true));
    let mut keep_iter = keep.iter();
    instantiated.retain(|_| *keep_iter.next().unwrap_or(&true));
}

/// Conditions merge when they share polarity and the same three equality
/// symbols.
fn mergeable(a: &Condition, b: &Condition) -> bool {
    match (a, b) {
        (Condition::Positive(pa), Condition::Positive(pb)) => {
            pa.tests.id.sym == pb.tests.id.sym
                && pa.tests.attr.sym == pb.tests.attr.sym
                && pa.tests.value.sym == pb.tests.value.sym
        }
        (Condition::Negative(ta), Condition::Negative(tb)) => {
            ta.id.sym == tb.id.sym
                && ta.attr.sym == tb.attr.sym
                && ta.value.sym == tb.value.sym
        }
        _ => false,
    }
}

fn merge_into(target: &mut Condition, source: &Condition) {
    let (Some(dst), Some(src)) = (target.tests_mut(), source.tests()) else {
        return;
    };
    merge_test(&mut dst.id, &src.id);
    merge_test(&mut dst.attr, &src.attr);
    merge_test(&mut dst.value, &src.value);
}

/// Fold `source`'s extra tests into `target`, skipping exact duplicates.
fn merge_test(target: &mut Test, source: &Test) {
    target.goal_test |= source.goal_test;
    target.impasse_test |= source.impasse_test;
    for constraint in &source.constraints {
        if !target.constraints.contains(constraint) {
            target.constraints.push(constraint.clone());
        }
    }
    // Prefer keeping an identity over none, so constraint attachment still
    // finds the element after the merge.
    if target.identity.is_none() {
        target.identity = source.identity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Constraint, ConstraintKind, PositiveCondition, TestTriple};
    use crate::symbol::SymbolTable;

    fn cond(tests: TestTriple) -> Condition {
        Condition::Positive(PositiveCondition {
            tests,
            wme: None,
            producer: None,
        })
    }

    #[test]
    fn duplicate_positives_fold_constraints() {
        let mut tab = SymbolTable::new();
        let s = tab.make_variable("s1").unwrap();
        let attr = tab.make_str("count").unwrap();
        let v = tab.make_variable("c1").unwrap();
        let zero = tab.make_int(0).unwrap();
        let ten = tab.make_int(10).unwrap();

        let mut a = TestTriple::equality(s, attr, v);
        a.value.constraints.push(Constraint::Relational {
            kind: ConstraintKind::Greater,
            referent: zero,
            identity: None,
        });
        let mut b = TestTriple::equality(s, attr, v);
        b.value.constraints.push(Constraint::Relational {
            kind: ConstraintKind::Less,
            referent: ten,
            identity: None,
        });

        let mut variablized = vec![cond(a.clone()), cond(b)];
        let mut instantiated = vec![cond(a.clone()), cond(a)];
        let mut stats = ChunkStats::default();
        merge_conditions(&mut variablized, &mut instantiated, &mut stats);

        assert_eq!(variablized.len(), 1);
        assert_eq!(instantiated.len(), 1);
        assert_eq!(stats.merged_conditions, 1);
        let tests = variablized[0].tests().unwrap();
        assert_eq!(tests.value.constraints.len(), 2, "both bounds survive");
    }

    #[test]
    fn subsumed_condition_disappears() {
        let mut tab = SymbolTable::new();
        let s = tab.make_variable("s1").unwrap();
        let attr = tab.make_str("a").unwrap();
        let v = tab.make_variable("v1").unwrap();

        let plain = TestTriple::equality(s, attr, v);
        let mut variablized = vec![cond(plain.clone()), cond(plain.clone())];
        let mut instantiated = vec![cond(plain.clone()), cond(plain)];
        let mut stats = ChunkStats::default();
        merge_conditions(&mut variablized, &mut instantiated, &mut stats);
        assert_eq!(variablized.len(), 1);
    }

    #[test]
    fn different_values_do_not_merge() {
        let mut tab = SymbolTable::new();
        let s = tab.make_variable("s1").unwrap();
        let attr = tab.make_str("a").unwrap();
        let v = tab.make_variable("v1").unwrap();
        let w = tab.make_variable("w1").unwrap();

        let mut variablized = vec![
            cond(TestTriple::equality(s, attr, v)),
            cond(TestTriple::equality(s, attr, w)),
        ];
        let mut instantiated = variablized.clone();
        let mut stats = ChunkStats::default();
        merge_conditions(&mut variablized, &mut instantiated, &mut stats);
        assert_eq!(variablized.len(), 2);
        assert_eq!(stats.merged_conditions, 0);
    }

    #[test]
    fn negatives_only_merge_with_negatives() {
        let mut tab = SymbolTable::new();
        let s = tab.make_variable("s1").unwrap();
        let attr = tab.make_str("a").unwrap();
        let v = tab.make_int(1).unwrap();

        let mut variablized = vec![
            cond(TestTriple::equality(s, attr, v)),
            Condition::Negative(TestTriple::equality(s, attr, v)),
            Condition::Negative(TestTriple::equality(s, attr, v)),
        ];
        let mut instantiated = variablized.clone();
        let mut stats = ChunkStats::default();
        merge_conditions(&mut variablized, &mut instantiated, &mut stats);
        assert_eq!(variablized.len(), 2, "positive and one negative remain");
    }
}
