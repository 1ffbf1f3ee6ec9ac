//! # seshat
//!
//! An explanation-based rule learning engine for cognitive agents: given a
//! trace of subgoal problem-solving (instantiations, preferences, and
//! working-memory elements), seshat backtraces the dependencies of each
//! result, unifies the identities that must generalize together, and
//! builds a new production — a general *chunk* when generalization is
//! safe, a ground *justification* otherwise.
//!
//! ## Architecture
//!
//! - **Kernel surface** (`symbol`, `memory`, `condition`, `instantiation`,
//!   `production`, `kernel`): the interned symbols, WMEs, preferences, and
//!   firing records the learner consumes, behind an `Agent` facade with a
//!   trace-building API.
//! - **Identity graph** (`identity`): reference-counted union-find over
//!   generalization slots; joined classes share one rule variable.
//! - **Learning pipeline** (`chunk`): result collection → backtracing →
//!   constraint caching → two-pass variablization → condition merging →
//!   validation/repair → commit, with bottom-up recursion across goal
//!   levels.
//! - **Match network boundary** (`rete`): the `MatchNetwork` trait plus a
//!   naive in-crate implementation for tests and demos.
//!
//! ## Library usage
//!
//! ```no_run
//! use seshat::chunk::ChunkSettings;
//! use seshat::kernel::Agent;
//! use seshat::memory::PreferenceKind;
//!
//! let mut agent = Agent::new(ChunkSettings::default());
//! let top = agent.push_goal().unwrap();
//! let sub = agent.push_goal().unwrap();
//! let target = agent.kernel.symbols.make_str("target").unwrap();
//! let result = agent.kernel.symbols.make_str("result").unwrap();
//! let value = agent.kernel.symbols.make_int(42).unwrap();
//! let input = agent.input_wme(top, target, value).unwrap();
//!
//! let inst = agent
//!     .instantiation("solve", sub)
//!     .cond_keyed(input, None, None, Some("v"))
//!     .action_keyed(
//!         PreferenceKind::Acceptable,
//!         (top, None),
//!         (result, None),
//!         (value, Some("v")),
//!         None,
//!     )
//!     .fire()
//!     .unwrap();
//! let learned = agent.learn_from(inst);
//! println!("{learned:?}");
//! ```

pub mod chunk;
pub mod condition;
pub mod demo;
pub mod error;
pub mod identity;
pub mod instantiation;
pub mod kernel;
pub mod memory;
pub mod production;
pub mod rete;
pub mod symbol;
