//! The top-level compiler entry point: accumulate instructions against
//! named ports, then `compile` them into per-port waveforms.
//!
//! Grounded on `sequence_parser/sequence.py::Sequence`. The Python
//! original's scoped `align`/`detune` context managers become closures here
//! (`Sequence::align`/`Sequence::detune` take the scoped body as an
//! `FnOnce`) since a `with`-style guard holding `&mut Sequence` for its
//! lifetime would make the sequence unusable inside its own scope.

use std::collections::HashMap;

use crate::config::PortConfig;
use crate::dag;
use crate::error::CompileError;
use crate::instruction::{Instruction, Param, Trigger, TriggerIndex};
use crate::port::Port;
use crate::serialize::{EntryDef, PortDef, SequenceDef, TargetDef};
use crate::variable::{UpdateCommand, VariableTable};

/// Which port(s) an entry in the instruction list targets. Ordinary
/// instructions target exactly one port; a `Trigger` targets every port it
/// synchronizes.
#[derive(Debug, Clone)]
enum Target {
    Port(usize),
    Multi(Vec<usize>),
}

/// Per-port waveform output, shaped for handoff to external measurement
/// tooling.
#[derive(Debug, Clone)]
pub struct WaveformInfo {
    pub daq_length: f64,
    pub measurement_windows: Vec<(f64, f64)>,
    pub waveform: Vec<f64>,
    /// Always `false`; carried for parity with the downstream driver's
    /// output contract.
    pub waveform_updated: bool,
}

/// A pulse sequence: an ordered list of instructions targeting named ports,
/// plus the variable table those instructions may bind to.
#[derive(Debug)]
pub struct Sequence {
    ports: Vec<Port>,
    instruction_list: Vec<(Instruction, Target)>,
    variables: VariableTable,
    compiled: bool,
    trigger_position_list: Option<Vec<f64>>,
    max_waveform_length: Option<f64>,
    max_skew: f64,
}

impl Default for Sequence {
    fn default() -> Self {
        Self {
            ports: Vec::new(),
            instruction_list: Vec::new(),
            variables: VariableTable::new(),
            compiled: false,
            trigger_position_list: None,
            max_waveform_length: None,
            max_skew: 0.0,
        }
    }
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn port(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.name() == name)
    }

    pub fn variables(&self) -> &VariableTable {
        &self.variables
    }

    pub fn trigger_position_list(&self) -> Option<&[f64]> {
        self.trigger_position_list.as_deref()
    }

    pub fn max_skew(&self) -> f64 {
        self.max_skew
    }

    pub fn max_waveform_length(&self) -> Option<f64> {
        self.max_waveform_length
    }

    /// Register `port` by name (first occurrence wins its config), and
    /// return its index.
    fn verify_port(&mut self, mut port: Port) -> usize {
        if let Some(idx) = self.ports.iter().position(|p| p.name() == port.name()) {
            idx
        } else {
            port.reset();
            self.ports.push(port);
            self.ports.len() - 1
        }
    }

    fn register_instruction_variables(&mut self, instruction: &Instruction) -> Result<(), CompileError> {
        let mut vars = Vec::new();
        instruction.collect_variables(&mut vars);
        for variable in vars {
            if self.variables.get(variable.name()).is_none() {
                self.variables.register(variable)?;
            }
        }
        Ok(())
    }

    /// Append `instruction`, targeting `port` (registered if new).
    pub fn add(&mut self, instruction: Instruction, port: Port) -> Result<(), CompileError> {
        let idx = self.verify_port(port);
        self.register_instruction_variables(&instruction)?;
        self.instruction_list.push((instruction, Target::Port(idx)));
        Ok(())
    }

    /// Append a synchronization point across `ports`.
    pub fn trigger(&mut self, ports: Vec<Port>, align: impl Into<String>) {
        let idxs: Vec<usize> = ports.into_iter().map(|p| self.verify_port(p)).collect();
        self.instruction_list
            .push((Instruction::Trigger(Trigger::new(align.into())), Target::Multi(idxs)));
    }

    /// Run `body` with an alignment frame of `mode` pushed on `port`,
    /// popping it on return.
    pub fn align<F, R>(&mut self, port: Port, mode: impl Into<String>, body: F) -> Result<R, CompileError>
    where
        F: FnOnce(&mut Self) -> R,
    {
        self.add(Instruction::AddAlign(mode.into()), port.clone())?;
        let result = body(self);
        self.add(Instruction::DelAlign, port)?;
        Ok(result)
    }

    /// Run `body` with a detuning span of `detuning` pushed on `port`,
    /// popping it on return.
    pub fn detune<F, R>(&mut self, port: Port, detuning: Param<f64>, body: F) -> Result<R, CompileError>
    where
        F: FnOnce(&mut Self) -> R,
    {
        self.add(Instruction::AddDetuning(detuning), port.clone())?;
        let result = body(self);
        self.add(Instruction::DelDetuning, port)?;
        Ok(result)
    }

    /// Combine `other`'s instruction list into this sequence, preserving
    /// target ports and trigger alignments.
    pub fn call(&mut self, other: &Sequence) -> Result<(), CompileError> {
        for (instruction, target) in &other.instruction_list {
            match target {
                Target::Port(idx) => {
                    self.add(instruction.clone(), other.ports[*idx].clone())?;
                }
                Target::Multi(idxs) => {
                    if let Instruction::Trigger(trigger) = instruction {
                        let ports = idxs.iter().map(|&i| other.ports[i].clone()).collect();
                        self.trigger(ports, trigger.align.clone());
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply one resolved sweep point and mark the sequence for recompile.
    pub fn update_variables(&mut self, command: &UpdateCommand) -> Result<(), CompileError> {
        self.variables.apply(command)?;
        self.compiled = false;
        Ok(())
    }

    /// Drop all state a previous `compile` produced, without touching the
    /// instruction list or variable bindings.
    pub fn reset_compile(&mut self) {
        self.trigger_position_list = None;
        self.max_waveform_length = None;
        for port in &mut self.ports {
            port.reset();
        }
        self.compiled = false;
    }

    /// Compile the instruction list into per-port waveforms:
    /// distribute instructions to ports, solve the global trigger graph,
    /// synchronize trigger positions and skew, then execute and render.
    pub fn compile(&mut self) -> Result<(), CompileError> {
        if self.ports.is_empty() {
            return Err(CompileError::EmptySequence);
        }
        self.reset_compile();

        let all_ports: Vec<usize> = (0..self.ports.len()).collect();
        let mut compiled_list: Vec<(Instruction, Target)> = Vec::with_capacity(self.instruction_list.len() + 2);
        compiled_list.push((Instruction::Trigger(Trigger::new("left")), Target::Multi(all_ports.clone())));
        compiled_list.extend(self.instruction_list.iter().cloned());
        compiled_list.push((Instruction::Trigger(Trigger::new("left")), Target::Multi(all_ports)));

        let mut trigger_index: TriggerIndex = 0;
        for (instruction, target) in compiled_list {
            match (instruction, target) {
                (Instruction::Trigger(mut trigger), Target::Multi(idxs)) => {
                    trigger.trigger_index = Some(trigger_index);
                    trigger_index += 1;
                    for idx in idxs {
                        self.ports[idx].add(Instruction::Trigger(trigger.clone()));
                    }
                }
                (instruction, Target::Port(idx)) => {
                    self.ports[idx].add(instruction);
                }
                (instruction, Target::Multi(idxs)) => {
                    for idx in idxs {
                        self.ports[idx].add(instruction.clone());
                    }
                }
            }
        }

        let mut edge_map: HashMap<(TriggerIndex, TriggerIndex), f64> = HashMap::new();
        for port in &mut self.ports {
            for (fnode, bnode, weight) in port.get_trigger_edge_list(&self.variables)? {
                edge_map
                    .entry((fnode, bnode))
                    .and_modify(|w| *w = w.max(weight))
                    .or_insert(weight);
            }
        }
        let edges: Vec<(TriggerIndex, TriggerIndex, f64)> =
            edge_map.into_iter().map(|((f, b), w)| (f, b, w)).collect();
        let trigger_position = dag::longest_path(trigger_index, &edges)?;

        for port in &mut self.ports {
            port.sync_trigger_position(&trigger_position)?;
        }

        let max_skew = self
            .ports
            .iter()
            .map(|p| p.config().skew)
            .fold(f64::MIN, f64::max);
        for port in &mut self.ports {
            let skew = port.config().skew;
            port.sync_skew(max_skew - skew);
        }

        let mut waveform_length = 0.0_f64;
        for port in &mut self.ports {
            port.execute_instructions(&self.variables)?;
            waveform_length = waveform_length.max(port.position());
        }

        for port in &mut self.ports {
            port.write_waveform(max_skew + waveform_length, &self.variables);
        }

        self.trigger_position_list = Some(trigger_position);
        self.max_waveform_length = Some(waveform_length);
        self.max_skew = max_skew;
        self.compiled = true;
        Ok(())
    }

    /// Compile if needed, collect per-port waveform data for external
    /// measurement tooling, then reset compiled state.
    pub fn get_waveform_information(&mut self) -> Result<HashMap<String, WaveformInfo>, CompileError> {
        if !self.compiled {
            self.compile()?;
        }

        let mut info = HashMap::new();
        for port in &self.ports {
            info.insert(
                port.name().to_string(),
                WaveformInfo {
                    daq_length: port.waveform().len() as f64 * port.config().dac_step,
                    measurement_windows: port.measurement_windows().to_vec(),
                    waveform: port.waveform().iter().map(|c| c.re).collect(),
                    waveform_updated: false,
                },
            );
        }

        self.reset_compile();
        Ok(info)
    }

    /// Snapshot the instruction list and port registry as a portable,
    /// JSON-serializable [`SequenceDef`].
    pub fn dump_setting(&self) -> SequenceDef {
        let ports = self
            .ports
            .iter()
            .map(|p| PortDef {
                name: p.name().to_string(),
                config: *p.config(),
            })
            .collect();

        let entries = self
            .instruction_list
            .iter()
            .map(|(instruction, target)| {
                let target = match target {
                    Target::Port(idx) => TargetDef::Port(self.ports[*idx].name().to_string()),
                    Target::Multi(idxs) => {
                        TargetDef::Multi(idxs.iter().map(|&i| self.ports[i].name().to_string()).collect())
                    }
                };
                EntryDef {
                    instruction: instruction.clone(),
                    target,
                }
            })
            .collect();

        SequenceDef { ports, entries }
    }

    /// Rebuild a sequence from a [`SequenceDef`] produced by `dump_setting`.
    pub fn load_setting(setting: &SequenceDef) -> Result<Self, CompileError> {
        let port_for = |name: &str| {
            setting
                .ports
                .iter()
                .find(|p| p.name == name)
                .map(|p| Port::new(p.name.clone(), p.config))
                .unwrap_or_else(|| Port::new(name, PortConfig::default()))
        };

        let mut seq = Sequence::new();
        for entry in &setting.entries {
            match &entry.target {
                TargetDef::Port(name) => {
                    seq.add(entry.instruction.clone(), port_for(name))?;
                }
                TargetDef::Multi(names) => {
                    if let Instruction::Trigger(trigger) = &entry.instruction {
                        let ports = names.iter().map(|n| port_for(n)).collect();
                        seq.trigger(ports, trigger.align.clone());
                    }
                }
            }
        }
        Ok(seq)
    }
}

#[allow(dead_code)]
fn default_port(name: &str) -> Port {
    Port::new(name, PortConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::PulseKind;

    fn pulse(duration: f64) -> Instruction {
        Instruction::Pulse(crate::instruction::Pulse::new(PulseKind::Square {
            amplitude: Param::literal(1.0),
            duration: Param::literal(duration),
        }))
    }

    #[test]
    fn single_port_compile_produces_waveform() {
        let mut seq = Sequence::new();
        seq.add(pulse(100.0), default_port("q0")).unwrap();
        seq.compile().unwrap();
        assert!(seq.is_compiled());
        assert_eq!(seq.port("q0").unwrap().waveform().len(), 100);
    }

    #[test]
    fn trigger_synchronizes_two_ports_of_different_length() {
        let mut seq = Sequence::new();
        seq.add(pulse(50.0), default_port("q0")).unwrap();
        seq.add(pulse(150.0), default_port("q1")).unwrap();
        seq.trigger(vec![default_port("q0"), default_port("q1")], "left");
        seq.add(pulse(20.0), default_port("q0")).unwrap();
        seq.add(pulse(20.0), default_port("q1")).unwrap();
        seq.compile().unwrap();

        // q0's first pulse (50 ns) must be padded up to q1's (150 ns) before
        // the trigger, so both ports end at the same position afterward.
        let q0_len = seq.port("q0").unwrap().waveform().len();
        let q1_len = seq.port("q1").unwrap().waveform().len();
        assert_eq!(q0_len, q1_len);
    }

    #[test]
    fn align_scope_overlays_instructions_added_inside_it() {
        let mut seq = Sequence::new();
        seq.align(default_port("q0"), "left", |seq| {
            seq.add(pulse(100.0), default_port("q0")).unwrap();
            seq.add(pulse(40.0), default_port("q0")).unwrap();
        })
        .unwrap();
        seq.compile().unwrap();
        assert_eq!(seq.port("q0").unwrap().waveform().len(), 100);
    }

    #[test]
    fn update_variables_marks_sequence_uncompiled() {
        use crate::variable::Variable;

        let mut seq = Sequence::new();
        let variable = Variable::new("amp", vec![0.5, 1.0], "V");
        seq.add(
            Instruction::Pulse(crate::instruction::Pulse::new(PulseKind::Square {
                amplitude: Param::bound(variable),
                duration: Param::literal(10.0),
            })),
            default_port("q0"),
        )
        .unwrap();
        seq.compile().unwrap();
        assert!(seq.is_compiled());

        let mut command = UpdateCommand::new();
        command.insert("amp".to_string(), 1);
        seq.update_variables(&command).unwrap();
        assert!(!seq.is_compiled());
    }

    #[test]
    fn empty_sequence_refuses_to_compile() {
        let mut seq = Sequence::new();
        assert!(matches!(seq.compile(), Err(CompileError::EmptySequence)));
    }
}
