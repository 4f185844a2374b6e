//! Error taxonomy for sequence construction and compilation.
//!
//! Every fallible boundary in the crate (registration, variable binding,
//! alignment, DAG solving) returns `Result<T, CompileError>`. A failed
//! compile leaves the `Sequence` in its not-compiled state; callers repair
//! inputs and retry.

use crate::instruction::TriggerIndex;
use thiserror::Error;

/// Errors surfaced while building or compiling a [`crate::sequence::Sequence`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    /// A zipped variable group was given members of differing length.
    #[error("zipped variables must share the same length (got sizes {sizes:?})")]
    VariableSizeMismatch { sizes: Vec<usize> },

    /// Two variables in the same sequence were registered under one name.
    #[error("variable name '{name}' is already in use")]
    DuplicateVariable { name: String },

    /// `update_variables` referenced a name that was never bound to an
    /// instruction in this sequence.
    #[error("unknown variable '{name}'")]
    UnknownVariable { name: String },

    /// An alignment mode outside {left, middle, right} was used on a trigger
    /// edge, or outside {sequential, left} for a scoped `align()` block.
    #[error("unknown alignment mode '{mode}'")]
    UnknownAlignMode { mode: String },

    /// The trigger graph built from per-port traces was not a DAG. Should be
    /// unreachable given sequential per-port construction, but reported
    /// rather than panicking if it ever occurs.
    #[error("cycle detected in trigger graph involving triggers {nodes:?}")]
    CycleDetected { nodes: Vec<TriggerIndex> },

    /// `Step`'s `edge` parameter exceeded its `duration`.
    #[error("Step edge ({edge} ns) must not exceed duration ({duration} ns)")]
    InvalidStepEdge { edge: f64, duration: f64 },

    /// A `compile()` was requested with no registered ports.
    #[error("sequence has no ports to compile")]
    EmptySequence,

    /// Deserializing a dumped setting referenced an instruction kind that is
    /// not in the catalog.
    #[error("unknown instruction kind '{kind}' while loading setting")]
    UnknownInstructionKind { kind: String },

    /// Deserializing a dumped setting was missing a required parameter.
    #[error("missing parameter '{param}' for instruction '{kind}'")]
    MissingParameter { kind: String, param: String },

    /// JSON (de)serialization of a dumped setting failed.
    #[error("setting (de)serialization failed: {0}")]
    Serde(String),
}

impl From<serde_json::Error> for CompileError {
    fn from(err: serde_json::Error) -> Self {
        CompileError::Serde(err.to_string())
    }
}
