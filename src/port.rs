//! Per-channel compiler state: position/phase/detuning tracking, the
//! alignment and detuning-span stacks, trigger-edge extraction, and
//! waveform rendering.
//!
//! Grounded on `sequence_parser/port.py`. The teacher's `port.rs`
//! (`GraphModule`/`PortSpec`/`SignalKind`) models real-time audio signal
//! routing between DSP nodes — a different problem — so only its broad
//! shape (a per-channel struct owning mutable runtime state with explicit
//! reset/tick-like methods) carries over; the fields and algorithms here are
//! this crate's own.

use std::collections::HashMap;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::config::{AlignMode, PortConfig};
use crate::error::CompileError;
use crate::instruction::{Instruction, Param, TriggerIndex};
use crate::iq_port::IqCalibration;
use crate::variable::VariableTable;

/// Alignment-stack frame: the active mode and the durations accumulated
/// under it, collapsed into the parent frame when popped.
#[derive(Debug, Clone)]
struct AlignFrame {
    mode: AlignMode,
    durations: Vec<f64>,
}

/// One control channel's full compiler state across a `Sequence::compile`
/// run: the instructions targeting it, its running position/phase/detuning,
/// and — post-compile — its rendered waveform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    name: String,
    config: PortConfig,

    #[serde(skip)]
    instruction_list: Vec<Instruction>,
    #[serde(skip)]
    synchronized_instruction_list: Vec<Instruction>,

    #[serde(skip)]
    position: f64,
    #[serde(skip)]
    phase: f64,
    #[serde(skip)]
    detuning: f64,
    #[serde(skip)]
    align_stack: Vec<AlignFrame>,
    #[serde(skip)]
    detuning_stack: Vec<(f64, f64)>,

    #[serde(skip)]
    trigger_node_list: Vec<(TriggerIndex, f64)>,
    #[serde(skip)]
    trigger_edge_list: Vec<(TriggerIndex, TriggerIndex, f64)>,
    #[serde(skip)]
    skew_delay: f64,

    #[serde(skip)]
    measurement_windows: Vec<(f64, f64)>,
    #[serde(skip)]
    time: Vec<f64>,
    #[serde(skip)]
    waveform: Vec<Complex64>,

    #[serde(skip)]
    iq: Option<IqCalibration>,
}

impl std::fmt::Debug for IqCalibration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IqCalibration")
    }
}

impl Clone for IqCalibration {
    fn clone(&self) -> Self {
        IqCalibration::default()
    }
}

impl Port {
    pub fn new(name: impl Into<String>, config: PortConfig) -> Self {
        let mut port = Self {
            name: name.into(),
            config,
            instruction_list: Vec::new(),
            synchronized_instruction_list: Vec::new(),
            position: 0.0,
            phase: 0.0,
            detuning: 0.0,
            align_stack: Vec::new(),
            detuning_stack: Vec::new(),
            trigger_node_list: Vec::new(),
            trigger_edge_list: Vec::new(),
            skew_delay: 0.0,
            measurement_windows: Vec::new(),
            time: Vec::new(),
            waveform: Vec::new(),
            iq: None,
        };
        port.reset();
        port
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    /// Enable IQ-mixer compensation on this port (see [`crate::iq_port`]).
    pub fn enable_iq_compensation(&mut self) -> &mut IqCalibration {
        self.iq.get_or_insert_with(IqCalibration::default)
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn detuning(&self) -> f64 {
        self.detuning
    }

    pub fn set_position(&mut self, position: f64) {
        self.position = position;
    }

    pub fn set_phase(&mut self, phase: f64) {
        self.phase = phase;
    }

    pub fn set_detuning(&mut self, detuning: f64) {
        self.detuning = detuning;
    }

    pub fn if_freq(&self) -> f64 {
        self.config.sideband_freq
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn waveform(&self) -> &[Complex64] {
        &self.waveform
    }

    pub fn measurement_windows(&self) -> &[(f64, f64)] {
        &self.measurement_windows
    }

    pub fn measurement_windows_mut(&mut self) -> &mut Vec<(f64, f64)> {
        &mut self.measurement_windows
    }

    pub fn trigger_node_list(&self) -> &[(TriggerIndex, f64)] {
        &self.trigger_node_list
    }

    /// Drop all compiled state (instruction list, waveform, measurement
    /// windows) and return to a fresh, unregistered port.
    pub fn reset(&mut self) {
        self.instruction_list.clear();
        self.synchronized_instruction_list.clear();
        self.measurement_windows.clear();
        self.time.clear();
        self.waveform.clear();
        self.execute_reset();
    }

    /// Reset only the runtime fields a fresh `execute` pass rebuilds.
    fn execute_reset(&mut self) {
        self.position = 0.0;
        self.phase = 0.0;
        self.detuning = 0.0;
        self.align_stack = vec![AlignFrame {
            mode: self.config.default_align,
            durations: Vec::new(),
        }];
        self.detuning_stack.clear();
    }

    pub fn add(&mut self, instruction: Instruction) {
        self.instruction_list.push(instruction);
    }

    /// Advance position under the active alignment frame: a `sequential`
    /// frame advances immediately, a `left` frame records the duration for
    /// its parent to fold in on pop but leaves position untouched (parallel
    /// overlay within the frame).
    pub fn time_step(&mut self, duration: f64) {
        let frame = self.align_stack.last_mut().expect("base align frame");
        frame.durations.push(duration);
        if frame.mode == AlignMode::Sequential {
            self.position += duration;
        }
    }

    /// Advance position directly, bypassing alignment-stack bookkeeping.
    /// Used by `Delay` and `Acquire`, which are not subject to parallel
    /// overlay collapsing.
    pub fn advance(&mut self, duration: f64) {
        self.position += duration;
    }

    pub fn push_align(&mut self, mode: String) {
        let mode = AlignMode::parse(&mode).unwrap_or(AlignMode::Sequential);
        self.align_stack.push(AlignFrame {
            mode,
            durations: Vec::new(),
        });
    }

    pub fn pop_align(&mut self) {
        let frame = self.align_stack.pop().expect("align stack underflow");
        let parent = self.align_stack.last_mut().expect("base align frame");
        match (parent.mode, frame.mode) {
            (AlignMode::Sequential, AlignMode::Sequential) => {
                let total: f64 = frame.durations.iter().sum();
                parent.durations.push(total);
            }
            (AlignMode::Sequential, AlignMode::Left) => {
                let longest = frame.durations.iter().cloned().fold(0.0, f64::max);
                self.position += longest;
                parent.durations.push(longest);
            }
            (AlignMode::Left, AlignMode::Sequential) => {
                let total: f64 = frame.durations.iter().sum();
                self.position -= total;
                parent.durations.push(total);
            }
            (AlignMode::Left, AlignMode::Left) => {
                let longest = frame.durations.iter().cloned().fold(0.0, f64::max);
                parent.durations.push(longest);
            }
            _ => {}
        }
    }

    pub fn push_detuning_span(&mut self, detuning: f64) {
        let previous = self.detuning;
        let start = self.position;
        self.detuning_stack.push((previous, start));
        self.phase -= 2.0 * std::f64::consts::PI * detuning * start;
        self.detuning = detuning;
    }

    pub fn pop_detuning_span(&mut self) {
        let (previous, _start) = self
            .detuning_stack
            .pop()
            .expect("detuning span stack underflow");
        let end = self.position;
        self.phase += 2.0 * std::f64::consts::PI * self.detuning * end;
        self.detuning = previous;
    }

    /// Dry-run every instruction in insertion order to recover the minimum
    /// spacing between each pair of neighboring triggers on this port.
    pub fn get_trigger_edge_list(
        &mut self,
        table: &VariableTable,
    ) -> Result<Vec<(TriggerIndex, TriggerIndex, f64)>, CompileError> {
        self.execute_reset();
        self.trigger_node_list.clear();

        let mut instructions = std::mem::take(&mut self.instruction_list);
        let mut result = Ok(());
        for instruction in instructions.iter_mut() {
            if let Err(err) = instruction.execute(self, table) {
                result = Err(err);
                break;
            }
            if let Some(trigger) = instruction.as_trigger() {
                let index = trigger
                    .trigger_index
                    .expect("trigger index assigned before edge extraction");
                self.trigger_node_list.push((index, self.position));
            }
        }
        self.instruction_list = instructions;
        result?;

        let edges: Vec<_> = self
            .trigger_node_list
            .windows(2)
            .map(|pair| {
                let (i1, p1) = pair[0];
                let (i2, p2) = pair[1];
                (i1, i2, p2 - p1)
            })
            .collect();
        self.trigger_edge_list = edges.clone();
        Ok(edges)
    }

    /// Build the synchronized instruction list: the original instructions,
    /// with `Delay`s inserted around each internal trigger so every port's
    /// triggers land on `trigger_position`, placed per the trigger's
    /// declared alignment (left/middle/right).
    pub fn sync_trigger_position(&mut self, trigger_position: &[f64]) -> Result<(), CompileError> {
        let mut edge_delay: HashMap<TriggerIndex, f64> = HashMap::new();
        for &(fnode, bnode, weight) in &self.trigger_edge_list {
            edge_delay.insert(bnode, (trigger_position[bnode] - trigger_position[fnode]) - weight);
        }

        let mut synchronized = Vec::new();
        let mut segment: Vec<Instruction> = Vec::new();
        let mut last_align = "left".to_string();

        for instruction in self.instruction_list.drain(..) {
            if let Instruction::Trigger(trigger) = &instruction {
                let index = trigger.trigger_index.expect("trigger index assigned before sync");
                if index == 0 {
                    synchronized.push(instruction);
                    last_align = "left".to_string();
                    continue;
                }
                let delay = edge_delay.get(&index).copied().unwrap_or(0.0);
                match last_align.as_str() {
                    "left" => segment.push(Instruction::Delay(Param::literal(delay))),
                    "middle" => {
                        segment.insert(0, Instruction::Delay(Param::literal(0.5 * delay)));
                        segment.push(Instruction::Delay(Param::literal(0.5 * delay)));
                    }
                    "right" => segment.insert(0, Instruction::Delay(Param::literal(delay))),
                    other => {
                        return Err(CompileError::UnknownAlignMode {
                            mode: other.to_string(),
                        })
                    }
                }
                let align = trigger.align.clone();
                synchronized.append(&mut segment);
                synchronized.push(instruction);
                last_align = align;
            } else {
                segment.push(instruction);
            }
        }
        synchronized.append(&mut segment);

        self.synchronized_instruction_list = synchronized;
        Ok(())
    }

    /// Prepend a fixed `Delay` compensating for this port's skew relative
    /// to the slowest port in the sequence.
    pub fn sync_skew(&mut self, delay: f64) {
        self.skew_delay = delay;
        self.synchronized_instruction_list
            .insert(0, Instruction::Delay(Param::literal(delay)));
    }

    /// Execute the synchronized instruction list, establishing the final
    /// position/phase/detuning each `Pulse`/`Acquire` captures for render.
    pub fn execute_instructions(&mut self, table: &VariableTable) -> Result<(), CompileError> {
        self.execute_reset();
        let mut instructions = std::mem::take(&mut self.synchronized_instruction_list);
        let mut result = Ok(());
        for instruction in instructions.iter_mut() {
            if let Err(err) = instruction.execute(self, table) {
                result = Err(err);
                break;
            }
        }
        self.synchronized_instruction_list = instructions;
        result
    }

    /// Allocate the sample grid and render every pulse/acquire window into
    /// the waveform buffer. Warns (does not error) if the rendered
    /// amplitude exceeds the unit-magnitude convention.
    pub fn write_waveform(&mut self, waveform_length: f64, table: &VariableTable) {
        let dac_step = self.config.dac_step;
        let n = if waveform_length <= 0.0 {
            0
        } else {
            (waveform_length / dac_step).ceil() as usize
        };
        self.time = (0..n).map(|i| i as f64 * dac_step).collect();

        let instructions = std::mem::take(&mut self.synchronized_instruction_list);

        let waveform = if let Some(iq) = self.iq.take() {
            let if_freq = self.if_freq() + self.detuning;
            let i_factor = (iq.i_factor)(if_freq);
            let q_factor = (iq.q_factor)(if_freq);
            let i_delay = (iq.i_delay)(if_freq);
            let q_delay = (iq.q_delay)(if_freq);

            let mut i_waveform = vec![Complex64::new(0.0, 0.0); n];
            let mut q_waveform = vec![Complex64::new(0.0, 0.0); n];
            for instruction in &instructions {
                // Bump only the envelope position for each channel's delay so the
                // carrier stays evaluated at the port's true time; `write`'s own
                // `delay` parameter shifts the carrier too and isn't what IQ
                // delay compensation means.
                instruction
                    .shift_position(i_delay)
                    .write(self, table, &mut i_waveform, 0.0, i_factor);
                instruction
                    .shift_position(q_delay)
                    .write(self, table, &mut q_waveform, 0.0, q_factor);
            }
            self.iq = Some(iq);
            i_waveform
                .iter()
                .zip(q_waveform.iter())
                .map(|(i, q)| Complex64::new(i.re, q.im))
                .collect()
        } else {
            let mut waveform = vec![Complex64::new(0.0, 0.0); n];
            for instruction in &instructions {
                instruction.write(self, table, &mut waveform, 0.0, 1.0);
            }
            waveform
        };

        for instruction in &instructions {
            instruction.acquire(self);
        }
        self.synchronized_instruction_list = instructions;

        let max_abs = waveform
            .iter()
            .map(|c: &Complex64| c.norm())
            .fold(0.0_f64, f64::max);
        if max_abs > 1.001 {
            log::warn!("sequence amplitude should be below 1 (port: {})", self.name);
        }
        self.waveform = waveform;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Pulse, PulseKind};

    fn table() -> VariableTable {
        VariableTable::new()
    }

    #[test]
    fn sequential_time_step_advances_position() {
        let mut port = Port::new("q0", PortConfig::default());
        port.time_step(50.0);
        assert_eq!(port.position(), 50.0);
    }

    #[test]
    fn left_align_overlays_without_advancing() {
        let mut port = Port::new("q0", PortConfig::default());
        port.push_align("left".to_string());
        port.time_step(100.0);
        port.time_step(50.0);
        assert_eq!(port.position(), 0.0);
        port.pop_align();
        assert_eq!(port.position(), 100.0);
    }

    #[test]
    fn detuning_span_restores_previous_value_on_exit() {
        let mut port = Port::new("q0", PortConfig::default());
        port.set_detuning(0.01);
        port.push_detuning_span(0.05);
        assert_eq!(port.detuning(), 0.05);
        port.advance(10.0);
        port.pop_detuning_span();
        assert_eq!(port.detuning(), 0.01);
    }

    #[test]
    fn single_trigger_pair_has_no_internal_edges() {
        let mut port = Port::new("q0", PortConfig::default());
        let mut trig0 = crate::instruction::Trigger::new("left");
        trig0.trigger_index = Some(0);
        let mut trig1 = crate::instruction::Trigger::new("left");
        trig1.trigger_index = Some(1);
        port.add(Instruction::Trigger(trig0));
        port.add(Instruction::Pulse(Pulse::new(PulseKind::Square {
            amplitude: Param::literal(1.0),
            duration: Param::literal(100.0),
        })));
        port.add(Instruction::Trigger(trig1));

        let edges = port.get_trigger_edge_list(&table()).unwrap();
        assert_eq!(edges, vec![(0, 1, 100.0)]);
    }

    #[test]
    fn write_waveform_allocates_one_sample_per_dac_step() {
        let mut port = Port::new("q0", PortConfig::default());
        port.add(Instruction::Pulse(Pulse::new(PulseKind::Square {
            amplitude: Param::literal(1.0),
            duration: Param::literal(100.0),
        })));
        port.synchronized_instruction_list = std::mem::take(&mut port.instruction_list);
        port.execute_instructions(&table()).unwrap();
        port.write_waveform(100.0, &table());
        assert_eq!(port.waveform().len(), 100);
        assert_eq!(port.time().len(), 100);
    }
}
