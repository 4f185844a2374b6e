//! # Pulseforge: Multi-Port Pulse-Sequence Compiler
//!
//! `pulseforge` compiles a declarative instruction tree — pulses, delays,
//! phase/detuning updates, acquisition windows, and cross-port triggers —
//! into per-port complex baseband waveforms for time-domain quantum-control
//! experiments.
//!
//! ## Pipeline
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │  Instructions                              │  Pulse, Delay, VirtualZ,
//! │  - Flat tagged-enum instruction tree       │  SetDetuning, Acquire,
//! │  - Param<f64>: literal or swept Variable   │  Trigger, Union, Adjoint
//! ├───────────────────────────────────────────┤
//! │  Ports                                     │  Per-channel timing state:
//! │  - Position/phase/detuning tracking        │  alignment stack, detuning
//! │  - Trigger-edge extraction                 │  spans, trigger edges
//! ├───────────────────────────────────────────┤
//! │  Sequence::compile                         │  Global synchronization:
//! │  - Weighted longest-path trigger solve     │  DAG solve, skew, render
//! │  - Per-port skew + waveform rendering      │
//! └───────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pulseforge::prelude::*;
//!
//! let mut seq = Sequence::new();
//! let q0 = Port::new("q0", PortConfig::default());
//!
//! seq.add(
//!     Instruction::Pulse(Pulse::new(PulseKind::Square {
//!         amplitude: Param::literal(0.8),
//!         duration: Param::literal(40.0),
//!     })),
//!     q0.clone(),
//! ).unwrap();
//!
//! seq.compile().unwrap();
//! let waveform = seq.port("q0").unwrap().waveform();
//! ```
//!
//! ## Key Concepts
//!
//! - **Tagged-enum instructions**: no class hierarchy, each [`instruction::Instruction`]
//!   variant owns exactly the state its own execute/write/acquire pass needs.
//! - **Single-step binding**: a [`instruction::Param`] is either a literal or a bound
//!   [`variable::Variable`] snapshot; resolving reads a [`variable::VariableTable`] directly.
//! - **Scoped alignment and detuning**: [`sequence::Sequence::align`] and
//!   [`sequence::Sequence::detune`] take the scoped body as a closure, pushing and
//!   popping [`port::Port`] frames around it.
//! - **Global trigger synchronization**: every port's trigger spacing is merged into
//!   one weighted DAG and solved by longest path ([`dag::longest_path`]) so all ports'
//!   triggers land at the same absolute time.
//!
//! ## Module Documentation
//!
//! - [`instruction`] - The instruction tree and pulse-parameter binding
//! - [`shape`] - Pulse envelope catalog (Square, Gaussian, RaisedCos, ...)
//! - [`port`] - Per-channel compiler state and waveform rendering
//! - [`iq_port`] - Optional IQ-mixer compensation
//! - [`config`] - Per-port compiler defaults
//! - [`variable`] - Named sweep values and variable tables
//! - [`dag`] - Weighted longest-path trigger solver
//! - [`sequence`] - Top-level compile pipeline
//! - [`serialize`] - Portable JSON persistence of a sequence
//! - [`error`] - Compile-time error taxonomy

pub mod config;
pub mod dag;
pub mod error;
pub mod instruction;
pub mod iq_port;
pub mod port;
pub mod sequence;
pub mod serialize;
pub mod shape;
pub mod variable;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{AlignMode, PortConfig};
    pub use crate::dag::longest_path;
    pub use crate::error::CompileError;
    pub use crate::instruction::{
        Acquire, Container, Instruction, Param, Pulse, PulseKind, Trigger, TriggerIndex,
    };
    pub use crate::iq_port::IqCalibration;
    pub use crate::port::Port;
    pub use crate::sequence::{Sequence, WaveformInfo};
    pub use crate::serialize::{EntryDef, PortDef, SequenceDef, TargetDef};
    pub use crate::shape::{
        AdjointShape, Derivative, FlatTop, Gaussian, HyperbolicSecant, ProductShape, PulseShape,
        RaisedCos, ShapeParams, Square, Step, UnionShape,
    };
    pub use crate::variable::{UpdateCommand, Variable, VariableId, VariableTable};
}

// Re-export key types at crate root for convenience.
pub use prelude::*;
