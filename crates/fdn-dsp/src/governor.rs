//! Runaway protection for recirculating networks.
//!
//! Non-orthogonal matrices and nonlinear modulation can push a loop past
//! unity gain. The governor trades fidelity for stability: it crushes the
//! loop gain fast when an energy proxy exceeds its threshold, then creeps
//! back to the base gain once the loop settles.

/// Scalar gain with exponential fall and additive rise.
///
/// `process` is called once per sample with an energy proxy (sum of the
/// state vector, windowed RMS, anything monotone in loop energy). The
/// returned gain never reaches exactly zero, so a governed loop can
/// always recover.
#[derive(Clone, Debug)]
pub struct SafetyGovernor {
    base: f64,
    gain: f64,
    threshold: f64,
    fall: f64,
    rise: f64,
}

impl SafetyGovernor {
    /// `hold_samples` sets the fall rate: on sustained overshoot the gain
    /// decays to `f64::EPSILON` in roughly that many samples.
    pub fn new(base: f64, threshold: f64, hold_samples: f64, rise: f64) -> Self {
        assert!(
            base.is_finite() && base > 0.0,
            "safety governor: base gain must be positive, got {base}"
        );
        assert!(
            threshold.is_finite() && threshold > 0.0,
            "safety governor: threshold must be positive, got {threshold}"
        );
        let fall = if hold_samples < 1.0 {
            0.0
        } else {
            f64::EPSILON.powf(1.0 / hold_samples)
        };
        Self { base, gain: base, threshold, fall, rise: rise.max(0.0) }
    }

    pub fn reset(&mut self) {
        self.gain = self.base;
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    #[inline]
    pub fn process(&mut self, energy_proxy: f64) -> f64 {
        if energy_proxy.abs() > self.threshold {
            self.gain = (self.gain * self.fall).max(f64::EPSILON);
        } else {
            self.gain = (self.gain + self.rise).min(self.base);
        }
        self.gain
    }
}

/// Leaky accumulator of absolute signal energy.
///
/// Exchanging amplitude through this keeps `|x_a| + |x_b|` from growing,
/// which is what keeps a collision coupling from pumping energy into the
/// loop.
#[derive(Clone, Debug)]
pub struct EnergyStore {
    sum: f64,
    decay: f64,
    gain: f64,
}

impl EnergyStore {
    pub fn new(decay_samples: f64) -> Self {
        assert!(
            decay_samples.is_finite() && decay_samples >= 1.0,
            "energy store: decay must be at least 1 sample, got {decay_samples}"
        );
        let decay = -f64::EPSILON.ln() / decay_samples;
        Self { sum: 0.0, decay, gain: (-decay).exp() }
    }

    pub fn reset(&mut self) {
        self.sum = 0.0;
    }

    #[inline]
    pub fn process(&mut self, value: f64) -> f64 {
        let absed = value.abs();
        if absed > f64::EPSILON {
            self.sum = (self.sum + absed) * self.decay;
        }
        self.sum *= self.gain;
        self.sum
    }
}

/// Windowed RMS and peak over rendered output. Feeds the render status
/// decision (a track whose peak never leaves the noise floor is reported
/// silent).
pub struct RenderProbe {
    window: Vec<f64>,
    pos: usize,
    filled: bool,
    peak: f64,
    sum_sq: f64,
}

impl RenderProbe {
    pub fn new(window_size: usize) -> Self {
        assert!(window_size >= 1, "render probe: window must be non-empty");
        Self {
            window: vec![0.0; window_size],
            pos: 0,
            filled: false,
            peak: 0.0,
            sum_sq: 0.0,
        }
    }

    #[inline]
    pub fn push(&mut self, sample: f64) {
        let old = self.window[self.pos];
        self.window[self.pos] = sample;
        self.sum_sq += sample * sample - old * old;
        if self.sum_sq < 0.0 {
            self.sum_sq = 0.0;
        }

        let abs = sample.abs();
        if abs > self.peak {
            self.peak = abs;
        }

        self.pos += 1;
        if self.pos >= self.window.len() {
            self.pos = 0;
            self.filled = true;
        }
    }

    pub fn rms(&self) -> f64 {
        let n = if self.filled {
            self.window.len()
        } else {
            self.pos.max(1)
        };
        (self.sum_sq / n as f64).sqrt()
    }

    pub fn peak(&self) -> f64 {
        self.peak
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn governor_falls_under_sustained_overshoot() {
        let mut gov = SafetyGovernor::new(1.0, 10.0, 1000.0, 0.01);
        for _ in 0..200 {
            gov.process(100.0);
        }
        assert!(gov.gain() < 0.5, "gain={}", gov.gain());
        assert!(gov.gain() > 0.0);
    }

    #[test]
    fn governor_recovers_to_base() {
        let mut gov = SafetyGovernor::new(0.8, 10.0, 100.0, 0.01);
        for _ in 0..500 {
            gov.process(100.0);
        }
        for _ in 0..200 {
            gov.process(0.0);
        }
        assert!((gov.gain() - 0.8).abs() < 1e-12, "gain={}", gov.gain());
    }

    #[test]
    fn governor_never_reaches_zero() {
        let mut gov = SafetyGovernor::new(1.0, 1.0, 2.0, 0.0);
        for _ in 0..1_000_000 {
            gov.process(f64::MAX);
        }
        assert!(gov.gain() >= f64::EPSILON);
    }

    #[test]
    fn energy_store_conserves_under_exchange() {
        let mut store = EnergyStore::new(1000.0);
        let mut peak = 0.0f64;
        for _ in 0..10_000 {
            peak = peak.max(store.process(1.0));
        }
        // Leaky accumulation converges instead of growing without bound.
        let settled = store.process(1.0);
        assert!(settled.is_finite());
        assert!(settled <= peak * (1.0 + 1e-9));
    }

    #[test]
    fn energy_store_drains_when_idle() {
        let mut store = EnergyStore::new(100.0);
        for _ in 0..100 {
            store.process(1.0);
        }
        let mut last = f64::INFINITY;
        for _ in 0..10_000 {
            let now = store.process(0.0);
            assert!(now <= last);
            last = now;
        }
        assert!(last < 1e-6, "store did not drain: {last}");
    }

    #[test]
    fn probe_tracks_rms_and_peak() {
        let mut probe = RenderProbe::new(100);
        for _ in 0..100 {
            probe.push(0.5);
        }
        assert!((probe.rms() - 0.5).abs() < 1e-12);
        assert_eq!(probe.peak(), 0.5);
        probe.push(-2.0);
        assert_eq!(probe.peak(), 2.0);
    }
}
