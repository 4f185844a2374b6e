//! Persisted, portable form of a [`crate::sequence::Sequence`].
//!
//! Grounded on `sequence_parser/instruction/instruction_parser.py`'s
//! `parse`/`compose` pair, which walks an instruction tree into a
//! `{name, params, insts}` dict and back. [`Instruction`] and its children
//! already derive `Serialize`/`Deserialize` as a tagged enum, so this module
//! only needs to wrap the pieces `Sequence` keeps private: the port registry
//! and which port(s) each instruction targets (by name, for portability
//! across ports constructed independently on load).

use serde::{Deserialize, Serialize};

use crate::config::PortConfig;
use crate::error::CompileError;
use crate::instruction::Instruction;

/// A port's name and construction-time configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortDef {
    pub name: String,
    pub config: PortConfig,
}

/// Which port(s) a dumped instruction entry targets, by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TargetDef {
    Port(String),
    Multi(Vec<String>),
}

/// One dumped instruction-list entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryDef {
    pub instruction: Instruction,
    pub target: TargetDef,
}

/// The full persisted state of a [`crate::sequence::Sequence`]'s
/// instruction list, independent of any variable bindings currently applied
/// (a [`crate::variable::Variable`] travels with the `Instruction` that
/// binds it, so sweep definitions round-trip for free).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceDef {
    pub ports: Vec<PortDef>,
    pub entries: Vec<EntryDef>,
}

impl SequenceDef {
    pub fn to_json(&self) -> Result<String, CompileError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, CompileError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Param, Pulse, PulseKind};

    #[test]
    fn round_trips_through_json() {
        let def = SequenceDef {
            ports: vec![PortDef {
                name: "q0".to_string(),
                config: PortConfig::default(),
            }],
            entries: vec![EntryDef {
                instruction: Instruction::Pulse(Pulse::new(PulseKind::Square {
                    amplitude: Param::literal(1.0),
                    duration: Param::literal(100.0),
                })),
                target: TargetDef::Port("q0".to_string()),
            }],
        };
        let json = def.to_json().unwrap();
        let restored = SequenceDef::from_json(&json).unwrap();
        assert_eq!(restored.ports.len(), 1);
        assert_eq!(restored.entries.len(), 1);
    }
}
