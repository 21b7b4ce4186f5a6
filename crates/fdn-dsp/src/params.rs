//! Parameter schema for offline renders.
//!
//! One `RenderParams` struct shared by the CLI and library callers.
//! Presets are sparse JSON: missing keys fall back to defaults, numeric
//! fields accept both `8` and `8.0`, and `normalize()` reconciles
//! per-channel array lengths with the network size.

use serde::{Deserialize, Deserializer, Serialize};

use crate::matrix::FeedbackMatrixType;

/// Accept both `8` and `8.0` from JSON, truncate to usize.
fn as_usize<'de, D: Deserializer<'de>>(d: D) -> Result<usize, D::Error> {
    let v: serde_json::Value = Deserialize::deserialize(d)?;
    match &v {
        serde_json::Value::Number(n) => n
            .as_u64()
            .map(|i| i as usize)
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as usize))
            .ok_or_else(|| serde::de::Error::custom(format!("cannot convert {n} to usize"))),
        _ => Err(serde::de::Error::custom(format!("expected number, got {v}"))),
    }
}

/// Accept both `42` and `42.0` from JSON, truncate to u64.
fn as_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let v: serde_json::Value = Deserialize::deserialize(d)?;
    match &v {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .ok_or_else(|| serde::de::Error::custom(format!("cannot convert {n} to u64"))),
        _ => Err(serde::de::Error::custom(format!("expected number, got {v}"))),
    }
}

/// How the network is excited at sample zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Excitation {
    Impulse,
    NoiseBurst,
}

/// Which network the render drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FdnVariant {
    Plain,
    TimeModulated,
    Snared,
    Coupled,
    Easy,
}

/// Delay read interpolation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interpolation {
    None,
    Linear,
    Cubic,
}

/// Feedback-path filter family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterKind {
    Ema,
    Svf,
}

/// All offline render parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderParams {
    // --- Network ---
    #[serde(deserialize_with = "as_usize")]
    pub size: usize,
    pub sample_rate: f64,
    pub max_delay_seconds: f64,
    pub matrix_type: FeedbackMatrixType,
    #[serde(deserialize_with = "as_u64")]
    pub seed: u64,
    pub feedback: f64,
    pub interpolation: Interpolation,
    pub filter: FilterKind,

    // --- Per-channel arrays (size entries after normalize) ---
    pub delay_times_samples: Vec<f64>,
    pub lowpass_cutoffs: Vec<f64>,
    pub lowpass_q: Vec<f64>,
    pub highpass_cutoffs: Vec<f64>,
    pub highpass_q: Vec<f64>,

    // --- Excitation ---
    pub excitation: Excitation,
    pub noise_decay_seconds: f64,
    pub diffusion_times_samples: Vec<f64>,
    pub diffusion_gain: f64,

    // --- Variant ---
    pub variant: FdnVariant,
    pub time_modulation: f64,
    pub time_rate_limit: f64,
    pub impact_position: f64,
    pub pulse_threshold: f64,
    pub pulse_loss: f64,
    pub pulse_decay_seconds: f64,
    pub coupling_gain: f64,
    /// Blend between the two colliding networks of the easy variant.
    /// 0 renders a single network with no collision pair.
    pub fdn_mix: f64,
    pub collision_distance: f64,

    // --- Output ---
    pub duration_seconds: f64,
    pub output_gain: f64,
    pub stereo: bool,
    pub trim_leading_silence: bool,

    // --- Metadata (ignored for DSP, present in presets) ---
    #[serde(rename = "_meta", default, skip_serializing)]
    pub meta: Option<serde_json::Value>,
}

impl Default for RenderParams {
    fn default() -> Self {
        // Coprime-ish millisecond spread at the default sample rate.
        let delay_ms = [7.3, 11.9, 13.7, 17.1, 19.3, 23.9, 29.3, 31.7];
        let sample_rate = 48000.0;

        Self {
            size: 8,
            sample_rate,
            max_delay_seconds: 1.0,
            matrix_type: FeedbackMatrixType::SpecialOrthogonal,
            seed: 0,
            feedback: 0.96,
            interpolation: Interpolation::None,
            filter: FilterKind::Ema,

            delay_times_samples: delay_ms
                .iter()
                .map(|ms| ms / 1000.0 * sample_rate)
                .collect(),
            lowpass_cutoffs: vec![0.2; 8],
            lowpass_q: vec![std::f64::consts::FRAC_1_SQRT_2; 8],
            highpass_cutoffs: vec![20.0 / sample_rate; 8],
            highpass_q: vec![std::f64::consts::FRAC_1_SQRT_2; 8],

            excitation: Excitation::Impulse,
            noise_decay_seconds: 0.01,
            diffusion_times_samples: Vec::new(),
            diffusion_gain: 0.7,

            variant: FdnVariant::Plain,
            time_modulation: 0.0,
            time_rate_limit: 0.5,
            impact_position: 0.0,
            pulse_threshold: 0.05,
            pulse_loss: 0.5,
            pulse_decay_seconds: 0.01,
            coupling_gain: 2.0,
            fdn_mix: 0.0,
            collision_distance: 0.1,

            duration_seconds: 1.0,
            output_gain: 1.0,
            stereo: false,
            trim_leading_silence: false,

            meta: None,
        }
    }
}

impl RenderParams {
    /// Parse from JSON string. Missing fields get default values.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Reconcile per-channel array lengths with `size` and clamp the
    /// handful of values the engine cannot absorb on its own.
    pub fn normalize(&mut self) {
        self.size = self.size.max(1);
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            self.sample_rate = 48000.0;
        }
        if !(self.max_delay_seconds.is_finite() && self.max_delay_seconds > 0.0) {
            self.max_delay_seconds = 1.0;
        }
        if !self.duration_seconds.is_finite() || self.duration_seconds < 0.0 {
            self.duration_seconds = 0.0;
        }
        // Over-unity loop gain turns the ungoverned network into a NaN
        // source within a few thousand samples.
        if self.feedback.is_finite() {
            self.feedback = self.feedback.clamp(-1.0, 1.0);
        } else {
            self.feedback = 0.0;
        }

        let n = self.size;
        let dt_fill = self.delay_times_samples.first().copied().unwrap_or(350.0);
        pad_or_truncate(&mut self.delay_times_samples, n, dt_fill);
        pad_or_truncate(&mut self.lowpass_cutoffs, n, 0.2);
        pad_or_truncate(&mut self.lowpass_q, n, std::f64::consts::FRAC_1_SQRT_2);
        pad_or_truncate(&mut self.highpass_cutoffs, n, 20.0 / self.sample_rate);
        pad_or_truncate(&mut self.highpass_q, n, std::f64::consts::FRAC_1_SQRT_2);
    }
}

fn pad_or_truncate(v: &mut Vec<f64>, n: usize, fill: f64) {
    v.truncate(n);
    while v.len() < n {
        v.push(fill);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_are_consistent() {
        let mut p = RenderParams::default();
        p.normalize();
        assert_eq!(p.delay_times_samples.len(), p.size);
        assert_eq!(p.lowpass_cutoffs.len(), p.size);
        assert_eq!(p.matrix_type, FeedbackMatrixType::SpecialOrthogonal);
        assert_eq!(p.variant, FdnVariant::Plain);
    }

    #[test]
    fn sparse_json_load() {
        let json = r#"{"feedback": 0.9, "size": 4}"#;
        let mut p = RenderParams::from_json(json).unwrap();
        p.normalize();
        assert_eq!(p.feedback, 0.9);
        assert_eq!(p.size, 4);
        assert_eq!(p.delay_times_samples.len(), 4);
    }

    #[test]
    fn float_to_int_coercion() {
        let json = r#"{"size": 4.0, "seed": 42.0}"#;
        let p = RenderParams::from_json(json).unwrap();
        assert_eq!(p.size, 4);
        assert_eq!(p.seed, 42);
    }

    #[test]
    fn enum_fields_parse_by_name() {
        let json = r#"{
            "matrix_type": "Hadamard",
            "variant": "Snared",
            "interpolation": "Cubic",
            "filter": "Svf",
            "excitation": "NoiseBurst"
        }"#;
        let p = RenderParams::from_json(json).unwrap();
        assert_eq!(p.matrix_type, FeedbackMatrixType::Hadamard);
        assert_eq!(p.variant, FdnVariant::Snared);
        assert_eq!(p.interpolation, Interpolation::Cubic);
        assert_eq!(p.filter, FilterKind::Svf);
        assert_eq!(p.excitation, Excitation::NoiseBurst);
    }

    #[test]
    fn unknown_matrix_type_is_rejected() {
        let json = r#"{"matrix_type": "Banana"}"#;
        assert!(RenderParams::from_json(json).is_err());
    }

    #[test]
    fn normalize_pads_with_first_delay_time() {
        let mut p = RenderParams::default();
        p.delay_times_samples = vec![1000.0, 2000.0];
        p.normalize();
        assert_eq!(p.delay_times_samples.len(), 8);
        assert_eq!(p.delay_times_samples[2], 1000.0);
    }

    #[test]
    fn normalize_repairs_degenerate_globals() {
        let mut p = RenderParams::default();
        p.size = 0;
        p.sample_rate = f64::NAN;
        p.duration_seconds = -3.0;
        p.normalize();
        assert_eq!(p.size, 1);
        assert_eq!(p.sample_rate, 48000.0);
        assert_eq!(p.duration_seconds, 0.0);
    }

    #[test]
    fn normalize_clamps_feedback_to_unity() {
        let mut p = RenderParams::default();
        p.feedback = 4.0;
        p.normalize();
        assert_eq!(p.feedback, 1.0);
        p.feedback = -3.0;
        p.normalize();
        assert_eq!(p.feedback, -1.0);
        p.feedback = f64::NAN;
        p.normalize();
        assert_eq!(p.feedback, 0.0);
    }

    #[test]
    fn preset_with_meta() {
        let json = r#"{
            "feedback": 0.9,
            "_meta": {"category": "drum", "description": "test"}
        }"#;
        let p = RenderParams::from_json(json).unwrap();
        assert_eq!(p.feedback, 0.9);
        assert!(p.meta.is_some());
    }
}
