//! Rich diagnostic error types for the seshat engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]`
//! derives, providing error codes, help text, and source chains. Learning
//! is deliberately non-fatal: every `ChunkError` aborts at most the current
//! learning attempt, never the agent.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the seshat engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full
/// diagnostic chain (error codes, help text) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum SeshatError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Symbol(#[from] SymbolError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Settings(#[from] SettingsError),
}

// ---------------------------------------------------------------------------
// Symbol errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SymbolError {
    #[error("symbol allocator exhausted: cannot allocate more than u64::MAX symbols")]
    #[diagnostic(
        code(seshat::symbol::exhausted),
        help(
            "The symbol ID space is exhausted. This is extremely unlikely \
             in practice (requires 2^64 allocations). If you see this error, \
             check for symbol allocation loops."
        )
    )]
    AllocatorExhausted,

    #[error("expected an identifier symbol, found a {found}")]
    #[diagnostic(
        code(seshat::symbol::not_an_identifier),
        help(
            "Only identifier symbols carry goal levels and goal/impasse/long-term \
             flags. Constants and variables do not."
        )
    )]
    NotAnIdentifier { found: String },
}

// ---------------------------------------------------------------------------
// Kernel errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum KernelError {
    #[error("unknown instantiation id {id}")]
    #[diagnostic(
        code(seshat::kernel::unknown_instantiation),
        help("The instantiation was never created or has been retracted.")
    )]
    UnknownInstantiation { id: u64 },

    #[error("condition references WME {timetag} which is not in working memory")]
    #[diagnostic(
        code(seshat::kernel::unknown_wme),
        help(
            "A trace condition must point at a live working-memory element. \
             Add the WME before building the instantiation that matches it."
        )
    )]
    UnknownWme { timetag: u64 },

    #[error("unknown preference id {id}")]
    #[diagnostic(
        code(seshat::kernel::unknown_preference),
        help("The preference was never created. Fire the producing instantiation first.")
    )]
    UnknownPreference { id: u64 },

    #[error("goal stack is empty: push a top goal before building traces")]
    #[diagnostic(
        code(seshat::kernel::no_goal),
        help("Call `Agent::push_goal` at least once before firing instantiations.")
    )]
    NoGoal,

    #[error("instantiation condition id element must be an identifier, got {got}")]
    #[diagnostic(
        code(seshat::kernel::bad_condition_id),
        help("The first element of a condition always tests a working-memory identifier.")
    )]
    BadConditionId { got: String },
}

// ---------------------------------------------------------------------------
// Chunking errors
// ---------------------------------------------------------------------------

/// Internal errors of the learning pipeline.
///
/// These correspond to broken upstream invariants. They abort the current
/// learning attempt (after per-attempt cleanup) and leave the kernel in a
/// consistent state; the surrounding decision cycle keeps running.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum ChunkError {
    #[error("candidate rule has no name")]
    #[diagnostic(
        code(seshat::chunk::missing_name),
        help(
            "Production name generation returned an empty string. This indicates \
             a bug in the configured naming format, not in the trace being learned."
        )
    )]
    MissingProductionName,

    #[error("identity map lookup is inconsistent: identity {identity} is not live")]
    #[diagnostic(
        code(seshat::chunk::inconsistent_identity),
        help(
            "An identity referenced by a condition or preference was already \
             released. The owning instantiation must outlive every identity \
             reference it hands out."
        )
    )]
    InconsistentIdentityMap { identity: u64 },

    #[error("identity {identity} was variablized twice")]
    #[diagnostic(
        code(seshat::chunk::double_variablization),
        help(
            "A canonical variable may be bound to an identity root exactly once \
             per build. A second binding means two variablization passes ran \
             without an intervening cleanup."
        )
    )]
    DoubleVariablization { identity: u64 },

    #[error("binary preference ({kind}) is missing its referent")]
    #[diagnostic(
        code(seshat::chunk::missing_referent),
        help(
            "Better/worse and binary-indifferent preferences compare against a \
             referent value; a trace preference of those kinds without one is \
             malformed."
        )
    )]
    MissingReferent { kind: String },

    #[error("refracted instantiation for justification {name} failed to match")]
    #[diagnostic(
        code(seshat::chunk::refraction_failed),
        help(
            "The rebuilt instantiated condition list did not re-derive the \
             original results. The justification has been excised; the trace it \
             was built from is still intact."
        )
    )]
    RefractionFailed { name: String },
}

// ---------------------------------------------------------------------------
// Settings errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SettingsError {
    #[error("cannot read settings file {path}: {source}")]
    #[diagnostic(
        code(seshat::settings::io),
        help("Check that the path exists and is readable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("settings file {path} is not valid TOML: {message}")]
    #[diagnostic(
        code(seshat::settings::parse),
        help(
            "The file must be a TOML document with the fields of ChunkSettings. \
             Unknown fields are rejected to catch typos."
        )
    )]
    Parse { path: String, message: String },
}

/// Convenience alias for functions returning seshat results.
pub type SeshatResult<T> = std::result::Result<T, SeshatError>;
