//! Built-in demonstration traces.
//!
//! Small synthetic problem-solving traces used by the CLI (`seshat demo`)
//! and the integration tests: each returns an instantiation ready to be
//! passed to `Agent::learn_from`.

use crate::error::SeshatResult;
use crate::instantiation::InstId;
use crate::kernel::Agent;
use crate::memory::PreferenceKind;

/// One-level result pass-through.
///
/// A subgoal firing matches an input element on the top state and returns
/// a transformed copy of it as a result. Learning from it yields a
/// single-condition chunk.
pub fn passthrough(agent: &mut Agent) -> SeshatResult<InstId> {
    let s1 = agent.push_goal()?;
    let s2 = agent.push_goal()?;
    let target = agent.kernel.symbols.make_str("target")?;
    let result = agent.kernel.symbols.make_str("result")?;
    let value = agent.kernel.symbols.make_int(42)?;
    let input = agent.input_wme(s1, target, value)?;

    agent
        .instantiation("pass-through", s2)
        .cond_keyed(input, None, None, Some("v"))
        .action_keyed(
            PreferenceKind::Acceptable,
            (s1, None),
            (result, None),
            (value, Some("v")),
            None,
        )
        .fire()
}

/// A tower of subgoals exercising bottom-up chunking.
///
/// The goal stack is `depth` levels deep; the deepest firing matches an
/// input element on the top state and returns a result to it. Learning
/// cascades: the chunk built one level up immediately becomes a learnable
/// instantiation itself, until the top goal is reached.
pub fn tower(agent: &mut Agent, depth: u32) -> SeshatResult<InstId> {
    let s1 = agent.push_goal()?;
    let mut deepest = s1;
    for _ in 1..depth.max(1) {
        deepest = agent.push_goal()?;
    }
    let input_attr = agent.kernel.symbols.make_str("in")?;
    let output_attr = agent.kernel.symbols.make_str("out")?;
    let value = agent.kernel.symbols.make_str("payload")?;
    let input = agent.input_wme(s1, input_attr, value)?;

    agent
        .instantiation("solve-at-bottom", deepest)
        .cond_keyed(input, None, None, Some("v"))
        .action_keyed(
            PreferenceKind::Acceptable,
            (s1, None),
            (output_attr, None),
            (value, Some("v")),
            None,
        )
        .fire()
}
