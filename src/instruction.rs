//! The instruction tree: pulses, timing commands, acquisition windows,
//! triggers, and the functional combinators (`Union`, `Adjoint`, `Container`)
//! that compose them.
//!
//! Modeled as an explicit tagged enum rather than a class hierarchy — each
//! variant carries exactly the state its own `execute`/`write`/`acquire`
//! need. Parameters that may be swept are `Param<f64>`; everything else is a
//! plain field.
//!
//! Binding is a single step here rather than the two-phase
//! `_get_variable`/`_fix_variable` walk this is grounded on: a `Param` holds
//! either a literal or a full [`Variable`] snapshot, and `Param::resolve`
//! reads the table directly. Nothing needs caching between passes because a
//! [`crate::variable::VariableTable`] never changes mid-`compile`.

use std::f64::consts::PI;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::CompileError;
use crate::port::Port;
use crate::shape::{
    AdjointShape, Derivative, FlatTop, Gaussian, HyperbolicSecant, ProductShape, PulseShape,
    RaisedCos, ShapeParams, Square, Step, UnionShape,
};

use crate::variable::{Variable, VariableTable};

/// Index of a [`Trigger`] within a compiled sequence's global trigger graph.
pub type TriggerIndex = usize;

/// A parameter that is either a fixed literal or bound to a named, swept
/// [`Variable`]. The variable's full definition travels with the `Bound`
/// value so the owning instruction can register it with a
/// [`VariableTable`] the first time it is added to a sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Param<T> {
    Literal(T),
    Bound(Variable),
}

impl<T> Param<T> {
    pub fn literal(value: T) -> Self {
        Param::Literal(value)
    }

    pub fn bound(variable: Variable) -> Self {
        Param::Bound(variable)
    }

    /// Append the backing [`Variable`] to `out` if this param is bound.
    pub fn collect_variable(&self, out: &mut Vec<Variable>) {
        if let Param::Bound(variable) = self {
            out.push(variable.clone());
        }
    }
}

impl Param<f64> {
    /// Resolve against `table` if bound (falling back to the param's own
    /// snapshot value if the name was never registered), or return the
    /// literal directly.
    pub fn resolve(&self, table: &VariableTable) -> f64 {
        match self {
            Param::Literal(value) => *value,
            Param::Bound(variable) => table
                .get(variable.name())
                .map(Variable::value)
                .unwrap_or_else(|| variable.value()),
        }
    }
}

/// The recursive pulse-shape description a [`Pulse`] carries before binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PulseKind {
    Square {
        amplitude: Param<f64>,
        duration: Param<f64>,
    },
    Step {
        amplitude: Param<f64>,
        edge: Param<f64>,
        duration: Param<f64>,
    },
    Gaussian {
        amplitude: Param<f64>,
        fwhm: Param<f64>,
        duration: Param<f64>,
        zero_end: bool,
    },
    RaisedCos {
        amplitude: Param<f64>,
        duration: Param<f64>,
    },
    HyperbolicSecant {
        amplitude: Param<f64>,
        fwhm: Param<f64>,
        duration: Param<f64>,
        zero_end: bool,
    },
    FlatTop {
        child: Box<Pulse>,
        top_duration: Param<f64>,
    },
    Derivative {
        child: Box<Pulse>,
    },
    Product {
        amplitude_child: Box<Pulse>,
        phase_child: Box<Pulse>,
    },
    /// Pointwise sum of children over a shared time grid (parallel overlay
    /// within a single pulse's shape, as distinct from `Instruction::Union`'s
    /// independent-timing composition of whole instructions).
    Union { children: Vec<Pulse> },
    /// Horizontal concatenation of children, each centred in its own
    /// sub-interval, as distinct from `Instruction::Adjoint`'s sequential
    /// composition of whole instructions.
    Adjoint { children: Vec<Pulse> },
}

/// A pulse: a [`PulseKind`] description plus the runtime state captured at
/// `execute` time and consumed later by `write`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pulse {
    pub kind: PulseKind,
    #[serde(skip)]
    position: f64,
    #[serde(skip)]
    phase: f64,
    #[serde(skip)]
    detuning: f64,
    #[serde(skip)]
    duration: f64,
}

impl Pulse {
    pub fn new(kind: PulseKind) -> Self {
        Self {
            kind,
            position: 0.0,
            phase: 0.0,
            detuning: 0.0,
            duration: 0.0,
        }
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    fn compute_duration(&self, table: &VariableTable) -> f64 {
        match &self.kind {
            PulseKind::Square { duration, .. }
            | PulseKind::Step { duration, .. }
            | PulseKind::Gaussian { duration, .. }
            | PulseKind::RaisedCos { duration, .. }
            | PulseKind::HyperbolicSecant { duration, .. } => duration.resolve(table),
            PulseKind::FlatTop { child, top_duration } => {
                top_duration.resolve(table) + child.compute_duration(table)
            }
            PulseKind::Derivative { child } => child.compute_duration(table),
            PulseKind::Product {
                amplitude_child,
                phase_child,
            } => amplitude_child
                .compute_duration(table)
                .max(phase_child.compute_duration(table)),
            PulseKind::Union { children } => children
                .iter()
                .map(|c| c.compute_duration(table))
                .fold(0.0, f64::max),
            PulseKind::Adjoint { children } => {
                children.iter().map(|c| c.compute_duration(table)).sum()
            }
        }
    }

    fn build_shape(&self, table: &VariableTable) -> Box<dyn PulseShape> {
        match &self.kind {
            PulseKind::Square { amplitude, duration } => {
                let mut shape = Square::default();
                shape.set_params(&ShapeParams {
                    amplitude: amplitude.resolve(table),
                    duration: duration.resolve(table),
                    ..Default::default()
                });
                Box::new(shape)
            }
            PulseKind::Step {
                amplitude,
                edge,
                duration,
            } => {
                let mut shape = Step::default();
                shape.set_params(&ShapeParams {
                    amplitude: amplitude.resolve(table),
                    edge: edge.resolve(table),
                    duration: duration.resolve(table),
                    ..Default::default()
                });
                Box::new(shape)
            }
            PulseKind::Gaussian {
                amplitude,
                fwhm,
                duration,
                zero_end,
            } => {
                let mut shape = Gaussian::default();
                shape.set_params(&ShapeParams {
                    amplitude: amplitude.resolve(table),
                    fwhm: fwhm.resolve(table),
                    duration: duration.resolve(table),
                    zero_end: *zero_end,
                    ..Default::default()
                });
                Box::new(shape)
            }
            PulseKind::RaisedCos { amplitude, duration } => {
                let mut shape = RaisedCos::default();
                shape.set_params(&ShapeParams {
                    amplitude: amplitude.resolve(table),
                    duration: duration.resolve(table),
                    ..Default::default()
                });
                Box::new(shape)
            }
            PulseKind::HyperbolicSecant {
                amplitude,
                fwhm,
                duration,
                zero_end,
            } => {
                let mut shape = HyperbolicSecant::default();
                shape.set_params(&ShapeParams {
                    amplitude: amplitude.resolve(table),
                    fwhm: fwhm.resolve(table),
                    duration: duration.resolve(table),
                    zero_end: *zero_end,
                    ..Default::default()
                });
                Box::new(shape)
            }
            PulseKind::FlatTop { child, top_duration } => {
                let child_shape = child.build_shape(table);
                let mut shape = FlatTop::default();
                shape.set_params(&ShapeParams {
                    top_duration: top_duration.resolve(table),
                    children: vec![child_shape],
                    ..Default::default()
                });
                Box::new(shape)
            }
            PulseKind::Derivative { child } => {
                let child_shape = child.build_shape(table);
                let mut shape = Derivative::default();
                shape.set_params(&ShapeParams {
                    children: vec![child_shape],
                    ..Default::default()
                });
                Box::new(shape)
            }
            PulseKind::Product {
                amplitude_child,
                phase_child,
            } => {
                let a_shape = amplitude_child.build_shape(table);
                let p_shape = phase_child.build_shape(table);
                let mut shape = ProductShape::default();
                shape.set_params(&ShapeParams {
                    children: vec![a_shape, p_shape],
                    ..Default::default()
                });
                Box::new(shape)
            }
            PulseKind::Union { children } => {
                let child_shapes = children.iter().map(|c| c.build_shape(table)).collect();
                let mut shape = UnionShape::default();
                shape.set_params(&ShapeParams {
                    children: child_shapes,
                    ..Default::default()
                });
                Box::new(shape)
            }
            PulseKind::Adjoint { children } => {
                let pairs = children
                    .iter()
                    .map(|c| (c.build_shape(table), c.compute_duration(table)))
                    .collect();
                let mut shape = AdjointShape::default();
                shape.set_children(pairs);
                Box::new(shape)
            }
        }
    }

    fn collect_variables(&self, out: &mut Vec<Variable>) {
        match &self.kind {
            PulseKind::Square { amplitude, duration } => {
                amplitude.collect_variable(out);
                duration.collect_variable(out);
            }
            PulseKind::Step {
                amplitude,
                edge,
                duration,
            } => {
                amplitude.collect_variable(out);
                edge.collect_variable(out);
                duration.collect_variable(out);
            }
            PulseKind::Gaussian {
                amplitude,
                fwhm,
                duration,
                ..
            }
            | PulseKind::HyperbolicSecant {
                amplitude,
                fwhm,
                duration,
                ..
            } => {
                amplitude.collect_variable(out);
                fwhm.collect_variable(out);
                duration.collect_variable(out);
            }
            PulseKind::RaisedCos { amplitude, duration } => {
                amplitude.collect_variable(out);
                duration.collect_variable(out);
            }
            PulseKind::FlatTop { child, top_duration } => {
                top_duration.collect_variable(out);
                child.collect_variables(out);
            }
            PulseKind::Derivative { child } => child.collect_variables(out),
            PulseKind::Product {
                amplitude_child,
                phase_child,
            } => {
                amplitude_child.collect_variables(out);
                phase_child.collect_variables(out);
            }
            PulseKind::Union { children } | PulseKind::Adjoint { children } => {
                for child in children {
                    child.collect_variables(out);
                }
            }
        }
    }

    /// Resolve duration, snapshot the port's current position/phase/detuning,
    /// and advance the port past this pulse.
    pub fn execute(&mut self, port: &mut Port, table: &VariableTable) -> Result<(), CompileError> {
        if let PulseKind::Step { edge, duration, .. } = &self.kind {
            let edge = edge.resolve(table);
            let duration = duration.resolve(table);
            if edge > duration {
                return Err(CompileError::InvalidStepEdge { edge, duration });
            }
        }
        self.duration = self.compute_duration(table);
        self.position = port.position();
        self.phase = port.phase();
        self.detuning = port.detuning();
        port.time_step(self.duration);
        Ok(())
    }

    /// Clone this pulse with its captured position shifted by `delta`. Used
    /// for per-channel delay compensation, where only the envelope window
    /// should move and the carrier must stay evaluated at the port's true
    /// time.
    fn shift_position(&self, delta: f64) -> Self {
        let mut shifted = self.clone();
        shifted.position += delta;
        shifted
    }

    /// Render this pulse's contribution into `out`, an IF-modulated complex
    /// waveform buffer sampled at `port.time() - delay`.
    pub fn write(&self, port: &Port, table: &VariableTable, out: &mut [Complex64], delay: f64, factor: f64) {
        let half = self.duration / 2.0;
        let mut indices = Vec::new();
        let mut relative = Vec::new();
        for (i, &t) in port.time().iter().enumerate() {
            let shifted = t - delay;
            let rel = shifted - (self.position + half);
            if rel >= -half && rel < half {
                indices.push(i);
                relative.push(rel);
            }
        }
        if indices.is_empty() {
            return;
        }
        let shape = self.build_shape(table);
        let envelope = shape.model_func(&relative);
        let if_freq = port.if_freq() + self.detuning;
        for (k, &i) in indices.iter().enumerate() {
            let t = port.time()[i] - delay;
            let phase_factor = Complex64::new(0.0, -(2.0 * PI * if_freq * t + self.phase)).exp();
            out[i] += factor * envelope[k] * phase_factor;
        }
    }
}

/// A fixed-duration measurement window opened on a port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Acquire {
    pub duration: Param<f64>,
    #[serde(skip)]
    window: (f64, f64),
}

impl Acquire {
    pub fn new(duration: Param<f64>) -> Self {
        Self {
            duration,
            window: (0.0, 0.0),
        }
    }

    pub fn execute(&mut self, port: &mut Port, table: &VariableTable) {
        let duration = self.duration.resolve(table);
        let start = port.position();
        self.window = (start, start + duration);
        port.advance(duration);
    }

    pub fn acquire(&self, port: &mut Port) {
        port.measurement_windows_mut().push(self.window);
    }

    fn collect_variables(&self, out: &mut Vec<Variable>) {
        self.duration.collect_variable(out);
    }
}

/// A global synchronization point across a set of ports.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Trigger {
    pub align: String,
    pub trigger_index: Option<TriggerIndex>,
}

impl Trigger {
    pub fn new(align: impl Into<String>) -> Self {
        Self {
            align: align.into(),
            trigger_index: None,
        }
    }
}

/// The instruction tree. Flat by design: each variant owns exactly the
/// fields its own execute/write/acquire pass needs, instead of inheriting
/// shared state from a common base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Instruction {
    Pulse(Pulse),
    Delay(Param<f64>),
    VirtualZ(Param<f64>),
    SetDetuning(Param<f64>),
    ResetPhase(Param<f64>),
    Acquire(Acquire),
    Trigger(Trigger),
    Union(Vec<Instruction>),
    Adjoint(Vec<Instruction>),
    Container(Container),
    /// Scoped alignment-mode frame markers, emitted in pairs by
    /// `Sequence::align`. Not constructed directly by callers.
    AddAlign(String),
    DelAlign,
    /// Scoped detuning-span frame markers, emitted in pairs by
    /// `Sequence::detune`. Not constructed directly by callers.
    AddDetuning(Param<f64>),
    DelDetuning,
}

/// Selects one of several candidate instructions by a swept (or fixed)
/// index — the instruction-tree analog of a bound scalar parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub options: Vec<Instruction>,
    pub selector: Param<f64>,
}

impl Container {
    pub fn new(options: Vec<Instruction>, selector: Param<f64>) -> Self {
        Self { options, selector }
    }

    fn selected<'a>(&'a self, table: &VariableTable) -> &'a Instruction {
        let index = self.selector.resolve(table).round() as usize;
        &self.options[index.min(self.options.len().saturating_sub(1))]
    }
}

impl Instruction {
    /// Collect every [`Variable`] this instruction (and its children)
    /// reference, for registration with a [`VariableTable`].
    pub fn collect_variables(&self, out: &mut Vec<Variable>) {
        match self {
            Instruction::Pulse(pulse) => pulse.collect_variables(out),
            Instruction::Delay(p)
            | Instruction::VirtualZ(p)
            | Instruction::SetDetuning(p)
            | Instruction::ResetPhase(p)
            | Instruction::AddDetuning(p) => p.collect_variable(out),
            Instruction::Acquire(acquire) => acquire.collect_variables(out),
            Instruction::Trigger(_) | Instruction::AddAlign(_) | Instruction::DelAlign | Instruction::DelDetuning => {}
            Instruction::Union(children) | Instruction::Adjoint(children) => {
                for child in children {
                    child.collect_variables(out);
                }
            }
            Instruction::Container(container) => container.selector.collect_variable(out),
        }
    }

    /// Advance `port`'s timing state past this instruction.
    pub fn execute(&mut self, port: &mut Port, table: &VariableTable) -> Result<(), CompileError> {
        match self {
            Instruction::Pulse(pulse) => pulse.execute(port, table)?,
            Instruction::Delay(duration) => port.advance(duration.resolve(table)),
            Instruction::VirtualZ(phase) => port.set_phase(port.phase() - phase.resolve(table)),
            Instruction::SetDetuning(detuning) => port.set_detuning(detuning.resolve(table)),
            Instruction::ResetPhase(phase) => {
                let base = phase.resolve(table) - 2.0 * PI * port.if_freq() * port.position();
                port.set_phase(base);
            }
            Instruction::Acquire(acquire) => acquire.execute(port, table),
            Instruction::Trigger(_) => {}
            Instruction::Union(children) => {
                let start = port.position();
                let mut longest = 0.0_f64;
                for child in children {
                    child.execute(port, table)?;
                    longest = longest.max(port.position() - start);
                    port.set_position(start);
                }
                port.set_position(start + longest);
            }
            Instruction::Adjoint(children) => {
                for child in children {
                    child.execute(port, table)?;
                }
            }
            Instruction::Container(container) => {
                let index = container.selector.resolve(table).round() as usize;
                let bounded = index.min(container.options.len().saturating_sub(1));
                container.options[bounded].execute(port, table)?;
            }
            Instruction::AddAlign(mode) => port.push_align(mode.clone()),
            Instruction::DelAlign => port.pop_align(),
            Instruction::AddDetuning(detuning) => port.push_detuning_span(detuning.resolve(table)),
            Instruction::DelDetuning => port.pop_detuning_span(),
        }
        Ok(())
    }

    /// Render waveform contributions into `out`. Only `Pulse` and the
    /// functional combinators participate.
    pub fn write(&self, port: &Port, table: &VariableTable, out: &mut [Complex64], delay: f64, factor: f64) {
        match self {
            Instruction::Pulse(pulse) => pulse.write(port, table, out, delay, factor),
            Instruction::Union(children) => {
                for child in children {
                    if matches!(child, Instruction::Pulse(_) | Instruction::Union(_) | Instruction::Adjoint(_)) {
                        child.write(port, table, out, delay, factor);
                    }
                }
            }
            Instruction::Adjoint(children) => {
                for child in children {
                    if matches!(child, Instruction::Pulse(_)) {
                        child.write(port, table, out, delay, factor);
                    }
                }
            }
            Instruction::Container(container) => container.selected(table).write(port, table, out, delay, factor),
            _ => {}
        }
    }

    /// Commit measurement windows opened by `Acquire` into `port`. Only
    /// `Acquire` and the functional combinators participate.
    pub fn acquire(&self, port: &mut Port) {
        match self {
            Instruction::Acquire(acquire) => acquire.acquire(port),
            Instruction::Union(children) => {
                for child in children {
                    if matches!(child, Instruction::Acquire(_) | Instruction::Union(_) | Instruction::Adjoint(_)) {
                        child.acquire(port);
                    }
                }
            }
            Instruction::Adjoint(children) => {
                for child in children {
                    if matches!(child, Instruction::Acquire(_)) {
                        child.acquire(port);
                    }
                }
            }
            _ => {}
        }
    }

    /// Clone this instruction tree with every pulse's captured position
    /// shifted by `delta`, leaving the carrier phase term untouched. Used by
    /// IQ-mixer delay compensation instead of `write`'s `delay` parameter,
    /// which also shifts the carrier.
    pub(crate) fn shift_position(&self, delta: f64) -> Instruction {
        match self {
            Instruction::Pulse(pulse) => Instruction::Pulse(pulse.shift_position(delta)),
            Instruction::Union(children) => {
                Instruction::Union(children.iter().map(|c| c.shift_position(delta)).collect())
            }
            Instruction::Adjoint(children) => {
                Instruction::Adjoint(children.iter().map(|c| c.shift_position(delta)).collect())
            }
            Instruction::Container(container) => Instruction::Container(Container {
                options: container.options.iter().map(|o| o.shift_position(delta)).collect(),
                selector: container.selector.clone(),
            }),
            other => other.clone(),
        }
    }

    pub fn as_trigger(&self) -> Option<&Trigger> {
        match self {
            Instruction::Trigger(trigger) => Some(trigger),
            _ => None,
        }
    }

    pub fn as_trigger_mut(&mut self) -> Option<&mut Trigger> {
        match self {
            Instruction::Trigger(trigger) => Some(trigger),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortConfig;

    fn table() -> VariableTable {
        VariableTable::new()
    }

    #[test]
    fn square_pulse_advances_position_by_duration() {
        let mut port = Port::new("q0", PortConfig::default());
        let mut pulse = Pulse::new(PulseKind::Square {
            amplitude: Param::literal(1.0),
            duration: Param::literal(100.0),
        });
        let t = table();
        pulse.execute(&mut port, &t).unwrap();
        assert_eq!(port.position(), 100.0);
        assert_eq!(pulse.duration(), 100.0);
    }

    #[test]
    fn delay_bypasses_align_stack_tracking() {
        let mut port = Port::new("q0", PortConfig::default());
        port.push_align("left".to_string());
        let mut instruction = Instruction::Delay(Param::literal(50.0));
        instruction.execute(&mut port, &table()).unwrap();
        assert_eq!(port.position(), 50.0);
    }

    #[test]
    fn union_overlay_advances_by_longest_child() {
        let mut port = Port::new("q0", PortConfig::default());
        let mut instruction = Instruction::Union(vec![
            Instruction::Pulse(Pulse::new(PulseKind::Square {
                amplitude: Param::literal(1.0),
                duration: Param::literal(100.0),
            })),
            Instruction::Pulse(Pulse::new(PulseKind::Square {
                amplitude: Param::literal(1.0),
                duration: Param::literal(50.0),
            })),
        ]);
        instruction.execute(&mut port, &table()).unwrap();
        assert_eq!(port.position(), 100.0);
    }

    #[test]
    fn virtual_z_subtracts_phase() {
        let mut port = Port::new("q0", PortConfig::default());
        let mut instruction = Instruction::VirtualZ(Param::literal(PI));
        instruction.execute(&mut port, &table()).unwrap();
        assert_eq!(port.phase(), -PI);
    }

    #[test]
    fn acquire_records_measurement_window() {
        let mut port = Port::new("q0", PortConfig::default());
        let mut acquire = Acquire::new(Param::literal(200.0));
        acquire.execute(&mut port, &table());
        acquire.acquire(&mut port);
        assert_eq!(port.measurement_windows(), &[(0.0, 200.0)]);
    }

    #[test]
    fn step_edge_exceeding_duration_is_rejected() {
        let mut port = Port::new("q0", PortConfig::default());
        let mut pulse = Pulse::new(PulseKind::Step {
            amplitude: Param::literal(1.0),
            edge: Param::literal(150.0),
            duration: Param::literal(100.0),
        });
        let err = pulse.execute(&mut port, &table()).unwrap_err();
        assert!(matches!(err, CompileError::InvalidStepEdge { .. }));
    }

    #[test]
    fn pulse_union_duration_is_longest_child() {
        let mut pulse = Pulse::new(PulseKind::Union {
            children: vec![
                Pulse::new(PulseKind::Square {
                    amplitude: Param::literal(1.0),
                    duration: Param::literal(100.0),
                }),
                Pulse::new(PulseKind::Square {
                    amplitude: Param::literal(1.0),
                    duration: Param::literal(40.0),
                }),
            ],
        });
        let mut port = Port::new("q0", PortConfig::default());
        pulse.execute(&mut port, &table()).unwrap();
        assert_eq!(pulse.duration(), 100.0);
    }

    #[test]
    fn pulse_adjoint_duration_is_sum_of_children() {
        let mut pulse = Pulse::new(PulseKind::Adjoint {
            children: vec![
                Pulse::new(PulseKind::Square {
                    amplitude: Param::literal(1.0),
                    duration: Param::literal(30.0),
                }),
                Pulse::new(PulseKind::Square {
                    amplitude: Param::literal(1.0),
                    duration: Param::literal(70.0),
                }),
            ],
        });
        let mut port = Port::new("q0", PortConfig::default());
        pulse.execute(&mut port, &table()).unwrap();
        assert_eq!(pulse.duration(), 100.0);
    }

    #[test]
    fn bound_param_resolves_from_table() {
        let mut vt = VariableTable::new();
        vt.register(Variable::new("amp", vec![0.1, 0.2, 0.3], "V")).unwrap();
        let param = Param::bound(Variable::new("amp", vec![0.1, 0.2, 0.3], "V"));
        assert_eq!(param.resolve(&vt), 0.1);
        vt.apply(&[("amp".to_string(), 2)].into_iter().collect()).unwrap();
        assert_eq!(param.resolve(&vt), 0.3);
    }
}
