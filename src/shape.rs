//! Pulse shape catalog: pure functions `t -> complex` evaluated over a
//! relative-time grid, centred on `t = 0` with support `|t| <= duration / 2`.
//!
//! Each shape implements [`PulseShape`]: `set_params` latches its
//! parameters from the owning [`crate::instruction::Pulse`] after variable
//! binding (taking deep copies of any nested child shapes, per spec ---
//! this matters for `FlatTop`/`Derivative`/`Product`, whose child pulse may
//! otherwise have its parameters mutated out from under a frozen snapshot),
//! and `model_func` is the pure waveform evaluator.

use std::f64::consts::PI;

use num_complex::Complex64;

/// A family of complex-valued envelope/carrier functions.
///
/// `set_params` is called once per `Pulse::_execute`, after that pulse's
/// (and its children's) parameters have been fixed from variables; it must
/// take ownership of everything `model_func` needs, since the originating
/// `Pulse` may be re-executed with different bindings afterward.
pub trait PulseShape: std::fmt::Debug {
    /// Latch parameters from the owning pulse's fixed parameter snapshot.
    /// `duration` is the pulse's already-resolved duration.
    fn set_params(&mut self, params: &ShapeParams);

    /// Evaluate the envelope at each relative-time sample. `time` values are
    /// `port_time - (position + duration / 2)`, restricted to the pulse's
    /// support region by the caller.
    fn model_func(&self, time: &[f64]) -> Vec<Complex64>;

    /// Deep-clone this shape (used when a composite shape needs to freeze a
    /// snapshot of a child's shape at bind time).
    fn clone_box(&self) -> Box<dyn PulseShape>;

    /// Peak amplitude, used by [`crate::iq_port::IqPort`] to scale a cloned
    /// pulse for I/Q compensation. Shapes without a single scalar amplitude
    /// (composites) return `1.0` and rely on their own amplitude parameter.
    fn amplitude(&self) -> f64 {
        1.0
    }

    /// Scale the shape's amplitude in place (used by `IqPort`).
    fn scale_amplitude(&mut self, _factor: f64) {}
}

impl Clone for Box<dyn PulseShape> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Parameter bag a [`crate::instruction::Pulse`] hands to its shape's
/// `set_params`. Fields unused by a given shape are simply ignored.
#[derive(Debug, Clone, Default)]
pub struct ShapeParams {
    pub amplitude: f64,
    pub duration: f64,
    pub edge: f64,
    pub fwhm: f64,
    pub zero_end: bool,
    pub top_duration: f64,
    /// For composite shapes: the already-`set_params`'d child shape(s).
    pub children: Vec<Box<dyn PulseShape>>,
}

fn support_mask(time: &[f64], half_width: f64) -> (Vec<usize>, Vec<usize>, Vec<usize>) {
    let mut front = Vec::new();
    let mut mid = Vec::new();
    let mut back = Vec::new();
    for (i, &t) in time.iter().enumerate() {
        if t <= -half_width {
            front.push(i);
        } else if t >= half_width {
            back.push(i);
        } else {
            mid.push(i);
        }
    }
    (front, mid, back)
}

// ---------------------------------------------------------------------
// Square
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Square {
    amplitude: f64,
}

impl PulseShape for Square {
    fn set_params(&mut self, params: &ShapeParams) {
        self.amplitude = params.amplitude;
    }

    fn model_func(&self, time: &[f64]) -> Vec<Complex64> {
        vec![Complex64::new(self.amplitude, 0.0); time.len()]
    }

    fn clone_box(&self) -> Box<dyn PulseShape> {
        Box::new(self.clone())
    }

    fn amplitude(&self) -> f64 {
        self.amplitude
    }

    fn scale_amplitude(&mut self, factor: f64) {
        self.amplitude *= factor;
    }
}

// ---------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Step {
    amplitude: f64,
    edge: f64,
}

impl PulseShape for Step {
    fn set_params(&mut self, params: &ShapeParams) {
        self.amplitude = params.amplitude;
        self.edge = params.edge;
    }

    fn model_func(&self, time: &[f64]) -> Vec<Complex64> {
        let (front, mid, back) = support_mask(time, 0.5 * self.edge);
        let mut waveform = vec![Complex64::new(0.0, 0.0); time.len()];
        for i in back {
            waveform[i] = Complex64::new(self.amplitude, 0.0);
        }
        let mid_len = mid.len();
        for (rank, i) in mid.into_iter().enumerate() {
            let frac = if mid_len <= 1 {
                0.0
            } else {
                rank as f64 / (mid_len - 1) as f64
            };
            waveform[i] = Complex64::new(self.amplitude * frac, 0.0);
        }
        for i in front {
            waveform[i] = Complex64::new(0.0, 0.0);
        }
        waveform
    }

    fn clone_box(&self) -> Box<dyn PulseShape> {
        Box::new(self.clone())
    }

    fn amplitude(&self) -> f64 {
        self.amplitude
    }

    fn scale_amplitude(&mut self, factor: f64) {
        self.amplitude *= factor;
    }
}

// ---------------------------------------------------------------------
// Gaussian
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Gaussian {
    amplitude: f64,
    fwhm: f64,
    duration: f64,
    zero_end: bool,
}

impl PulseShape for Gaussian {
    fn set_params(&mut self, params: &ShapeParams) {
        self.amplitude = params.amplitude;
        self.fwhm = params.fwhm;
        self.duration = params.duration;
        self.zero_end = params.zero_end;
    }

    fn model_func(&self, time: &[f64]) -> Vec<Complex64> {
        let raw = |t: f64| self.amplitude * (-4.0 * (2f64.ln()) * (t / self.fwhm).powi(2)).exp();
        if self.zero_end {
            let edge = raw(0.5 * self.duration);
            let denom = self.amplitude - edge;
            time.iter()
                .map(|&t| {
                    let v = if denom.abs() < f64::EPSILON {
                        0.0
                    } else {
                        self.amplitude * (raw(t) - edge) / denom
                    };
                    Complex64::new(v, 0.0)
                })
                .collect()
        } else {
            time.iter().map(|&t| Complex64::new(raw(t), 0.0)).collect()
        }
    }

    fn clone_box(&self) -> Box<dyn PulseShape> {
        Box::new(self.clone())
    }

    fn amplitude(&self) -> f64 {
        self.amplitude
    }

    fn scale_amplitude(&mut self, factor: f64) {
        self.amplitude *= factor;
    }
}

// ---------------------------------------------------------------------
// RaisedCos
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RaisedCos {
    amplitude: f64,
    duration: f64,
}

impl PulseShape for RaisedCos {
    fn set_params(&mut self, params: &ShapeParams) {
        self.amplitude = params.amplitude;
        self.duration = params.duration;
    }

    fn model_func(&self, time: &[f64]) -> Vec<Complex64> {
        time.iter()
            .map(|&t| {
                let phase = PI * t / (0.5 * self.duration);
                Complex64::new(0.5 * self.amplitude * (1.0 + phase.cos()), 0.0)
            })
            .collect()
    }

    fn clone_box(&self) -> Box<dyn PulseShape> {
        Box::new(self.clone())
    }

    fn amplitude(&self) -> f64 {
        self.amplitude
    }

    fn scale_amplitude(&mut self, factor: f64) {
        self.amplitude *= factor;
    }
}

// ---------------------------------------------------------------------
// HyperbolicSecant
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct HyperbolicSecant {
    amplitude: f64,
    fwhm: f64,
    duration: f64,
    zero_end: bool,
}

impl HyperbolicSecant {
    fn beta(&self) -> f64 {
        2.0 * (2.0 + 3f64.sqrt()).ln() / self.fwhm
    }
}

impl PulseShape for HyperbolicSecant {
    fn set_params(&mut self, params: &ShapeParams) {
        self.amplitude = params.amplitude;
        self.fwhm = params.fwhm;
        self.duration = params.duration;
        self.zero_end = params.zero_end;
    }

    fn model_func(&self, time: &[f64]) -> Vec<Complex64> {
        if self.amplitude == 0.0 {
            return vec![Complex64::new(0.0, 0.0); time.len()];
        }
        let beta = self.beta();
        let raw = |t: f64| self.amplitude / (beta * t).cosh();
        if self.zero_end {
            let edge = raw(0.5 * self.duration);
            let denom = self.amplitude - edge;
            time.iter()
                .map(|&t| {
                    let v = if denom.abs() < f64::EPSILON {
                        0.0
                    } else {
                        self.amplitude * (raw(t) - edge) / denom
                    };
                    Complex64::new(v, 0.0)
                })
                .collect()
        } else {
            time.iter().map(|&t| Complex64::new(raw(t), 0.0)).collect()
        }
    }

    fn clone_box(&self) -> Box<dyn PulseShape> {
        Box::new(self.clone())
    }

    fn amplitude(&self) -> f64 {
        self.amplitude
    }

    fn scale_amplitude(&mut self, factor: f64) {
        self.amplitude *= factor;
    }
}

// ---------------------------------------------------------------------
// FlatTop
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct FlatTop {
    child: Option<Box<dyn PulseShape>>,
    top_duration: f64,
    peak: f64,
}

impl PulseShape for FlatTop {
    fn set_params(&mut self, params: &ShapeParams) {
        self.top_duration = params.top_duration;
        self.child = params.children.first().map(|c| c.clone_box());
        self.peak = self.child.as_ref().map(|c| c.amplitude()).unwrap_or(0.0);
    }

    fn model_func(&self, time: &[f64]) -> Vec<Complex64> {
        let Some(child) = &self.child else {
            return vec![Complex64::new(0.0, 0.0); time.len()];
        };
        let half = 0.5 * self.top_duration;
        let (front, mid, back) = support_mask(time, half);

        let front_time: Vec<f64> = front.iter().map(|&i| time[i] + half).collect();
        let back_time: Vec<f64> = back.iter().map(|&i| time[i] - half).collect();
        let front_wave = child.model_func(&front_time);
        let back_wave = child.model_func(&back_time);

        let mut out = vec![Complex64::new(0.0, 0.0); time.len()];
        for (i, v) in front.into_iter().zip(front_wave) {
            out[i] = v;
        }
        for &i in &mid {
            out[i] = Complex64::new(self.peak, 0.0);
        }
        for (i, v) in back.into_iter().zip(back_wave) {
            out[i] = v;
        }
        out
    }

    fn clone_box(&self) -> Box<dyn PulseShape> {
        Box::new(self.clone())
    }
}

// ---------------------------------------------------------------------
// Derivative
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Derivative {
    child: Option<Box<dyn PulseShape>>,
}

impl PulseShape for Derivative {
    fn set_params(&mut self, params: &ShapeParams) {
        self.child = params.children.first().map(|c| c.clone_box());
    }

    fn model_func(&self, time: &[f64]) -> Vec<Complex64> {
        let Some(child) = &self.child else {
            return vec![Complex64::new(0.0, 0.0); time.len()];
        };
        let waveform = child.model_func(time);
        gradient(&waveform, time)
    }

    fn clone_box(&self) -> Box<dyn PulseShape> {
        Box::new(self.clone())
    }
}

/// Numerical gradient via centred differences, matching `numpy.gradient`'s
/// one-sided endpoints.
fn gradient(values: &[Complex64], time: &[f64]) -> Vec<Complex64> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![Complex64::new(0.0, 0.0)];
    }
    let mut out = vec![Complex64::new(0.0, 0.0); n];
    out[0] = (values[1] - values[0]) / (time[1] - time[0]);
    out[n - 1] = (values[n - 1] - values[n - 2]) / (time[n - 1] - time[n - 2]);
    for i in 1..n - 1 {
        out[i] = (values[i + 1] - values[i - 1]) / (time[i + 1] - time[i - 1]);
    }
    out
}

// ---------------------------------------------------------------------
// Union (pointwise sum over the same grid)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct UnionShape {
    children: Vec<Box<dyn PulseShape>>,
}

impl PulseShape for UnionShape {
    fn set_params(&mut self, params: &ShapeParams) {
        self.children = params.children.iter().map(|c| c.clone_box()).collect();
    }

    fn model_func(&self, time: &[f64]) -> Vec<Complex64> {
        let mut out = vec![Complex64::new(0.0, 0.0); time.len()];
        for child in &self.children {
            for (o, v) in out.iter_mut().zip(child.model_func(time)) {
                *o += v;
            }
        }
        out
    }

    fn clone_box(&self) -> Box<dyn PulseShape> {
        Box::new(self.clone())
    }
}

// ---------------------------------------------------------------------
// Adjoint (horizontal concatenation, each child centred in its own span)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct AdjointShape {
    /// (child shape, child duration) pairs, in order.
    children: Vec<(Box<dyn PulseShape>, f64)>,
}

impl AdjointShape {
    pub fn set_children(&mut self, children: Vec<(Box<dyn PulseShape>, f64)>) {
        self.children = children;
    }
}

impl PulseShape for AdjointShape {
    fn set_params(&mut self, _params: &ShapeParams) {
        // Populated directly via `set_children`, since each child needs its
        // own duration (not carried by `ShapeParams`).
    }

    fn model_func(&self, time: &[f64]) -> Vec<Complex64> {
        let total: f64 = self.children.iter().map(|(_, d)| d).sum();
        let mut out = vec![Complex64::new(0.0, 0.0); time.len()];
        let mut start = -0.5 * total;
        for (shape, duration) in &self.children {
            let centre = start + 0.5 * duration;
            let end = start + duration;
            let local_time: Vec<f64> = time.iter().map(|&t| t - centre).collect();
            let wave = shape.model_func(&local_time);
            for (i, &t) in time.iter().enumerate() {
                if t >= start && t < end {
                    out[i] = wave[i];
                }
            }
            start = end;
        }
        out
    }

    fn clone_box(&self) -> Box<dyn PulseShape> {
        Box::new(self.clone())
    }
}

// ---------------------------------------------------------------------
// Product (amplitude child * exp(i*pi*phase child))
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ProductShape {
    amplitude_child: Option<Box<dyn PulseShape>>,
    phase_child: Option<Box<dyn PulseShape>>,
}

impl PulseShape for ProductShape {
    fn set_params(&mut self, params: &ShapeParams) {
        self.amplitude_child = params.children.first().map(|c| c.clone_box());
        self.phase_child = params.children.get(1).map(|c| c.clone_box());
    }

    fn model_func(&self, time: &[f64]) -> Vec<Complex64> {
        let (Some(a), Some(p)) = (&self.amplitude_child, &self.phase_child) else {
            return vec![Complex64::new(0.0, 0.0); time.len()];
        };
        let wa = a.model_func(time);
        let wp = p.model_func(time);
        wa.into_iter()
            .zip(wp)
            .map(|(av, pv)| av * Complex64::new(0.0, PI * pv.re).exp())
            .collect()
    }

    fn clone_box(&self) -> Box<dyn PulseShape> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn square_is_constant() {
        let mut shape = Square::default();
        shape.set_params(&ShapeParams {
            amplitude: 1.0,
            ..Default::default()
        });
        let time: Vec<f64> = (-5..5).map(|i| i as f64).collect();
        let wave = shape.model_func(&time);
        assert!(wave.iter().all(|v| (v.re - 1.0).abs() < 1e-12 && v.im == 0.0));
    }

    #[test]
    fn raised_cos_peaks_at_center() {
        let mut shape = RaisedCos::default();
        shape.set_params(&ShapeParams {
            amplitude: 2.0,
            duration: 100.0,
            ..Default::default()
        });
        let wave = shape.model_func(&[0.0]);
        assert_relative_eq!(wave[0].re, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn gaussian_zero_end_reaches_zero_at_edges() {
        let mut shape = Gaussian::default();
        shape.set_params(&ShapeParams {
            amplitude: 1.0,
            fwhm: 30.0,
            duration: 100.0,
            zero_end: true,
            ..Default::default()
        });
        let wave = shape.model_func(&[-50.0, 50.0]);
        assert_relative_eq!(wave[0].re, 0.0, epsilon = 1e-9);
        assert_relative_eq!(wave[1].re, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn hyperbolic_secant_zero_amplitude_is_flat_zero() {
        let mut shape = HyperbolicSecant::default();
        shape.set_params(&ShapeParams {
            amplitude: 0.0,
            fwhm: 30.0,
            duration: 100.0,
            zero_end: false,
            ..Default::default()
        });
        let wave = shape.model_func(&[0.0, 10.0, -10.0]);
        assert!(wave.iter().all(|v| v.re == 0.0 && v.im == 0.0));
    }

    #[test]
    fn union_sums_children_pointwise() {
        let mut a = Square::default();
        a.set_params(&ShapeParams {
            amplitude: 1.0,
            ..Default::default()
        });
        let mut b = Square::default();
        b.set_params(&ShapeParams {
            amplitude: 2.0,
            ..Default::default()
        });
        let mut union = UnionShape::default();
        union.set_params(&ShapeParams {
            children: vec![Box::new(a), Box::new(b)],
            ..Default::default()
        });
        let wave = union.model_func(&[0.0, 1.0]);
        assert_relative_eq!(wave[0].re, 3.0, epsilon = 1e-9);
    }

    #[test]
    fn derivative_of_constant_is_zero() {
        let mut a = Square::default();
        a.set_params(&ShapeParams {
            amplitude: 1.0,
            ..Default::default()
        });
        let mut deriv = Derivative::default();
        deriv.set_params(&ShapeParams {
            children: vec![Box::new(a)],
            ..Default::default()
        });
        let time = vec![-2.0, -1.0, 0.0, 1.0, 2.0];
        let wave = deriv.model_func(&time);
        assert!(wave.iter().all(|v| v.re.abs() < 1e-9));
    }

    #[test]
    fn product_combines_amplitude_and_phase() {
        let mut amp = Square::default();
        amp.set_params(&ShapeParams {
            amplitude: 1.0,
            ..Default::default()
        });
        let mut phase = Square::default();
        phase.set_params(&ShapeParams {
            amplitude: 1.0, // phase child scaled by pi -> exp(i*pi)
            ..Default::default()
        });
        let mut product = ProductShape::default();
        product.set_params(&ShapeParams {
            children: vec![Box::new(amp), Box::new(phase)],
            ..Default::default()
        });
        let wave = product.model_func(&[0.0]);
        assert_relative_eq!(wave[0].re, -1.0, epsilon = 1e-9);
        assert_relative_eq!(wave[0].im, 0.0, epsilon = 1e-9);
    }
}
