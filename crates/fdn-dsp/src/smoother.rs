//! One-pole smoothers and slew limiting.
//!
//! The EMA filters here are the default feedback-path filters of the FDN:
//! `DoubleEmaFilter` as lowpass, `EmaHighpass` as highpass. `RateLimiter`
//! bounds per-sample delay-time changes in the modulated variants.

use crate::fdn::ChannelFilter;

/// One-pole coefficient for a normalized cutoff in [0, 0.5].
///
/// Solves for the feedback coefficient whose -3 dB point lands on `cutoff`.
pub fn normalized_cutoff_to_one_pole_kp(cutoff: f64) -> f64 {
    let y = 1.0 - (2.0 * std::f64::consts::PI * cutoff).cos();
    ((y + 2.0) * y).sqrt() - y
}

/// One-pole coefficient from a time constant in samples.
pub fn time_to_one_pole_kp(samples: f64) -> f64 {
    if samples < f64::EPSILON {
        return 1.0;
    }
    normalized_cutoff_to_one_pole_kp(1.0 / samples)
}

/// Exponential moving average lowpass.
#[derive(Clone)]
pub struct EmaFilter {
    kp: f64,
    value: f64,
}

impl Default for EmaFilter {
    fn default() -> Self {
        Self { kp: 1.0, value: 0.0 }
    }
}

impl EmaFilter {
    pub fn set_cutoff(&mut self, cutoff: f64) {
        self.kp = normalized_cutoff_to_one_pole_kp(cutoff);
    }

    pub fn set_cutoff_from_time(&mut self, samples: f64) {
        self.kp = time_to_one_pole_kp(samples);
    }

    pub fn reset(&mut self, value: f64) {
        self.value = value;
    }

    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        self.value += self.kp * (input - self.value);
        self.value
    }
}

/// Two cascaded EMA stages. 12 dB/oct rolloff with no resonance,
/// which is why it is the stock FDN feedback lowpass.
#[derive(Clone)]
pub struct DoubleEmaFilter {
    kp: f64,
    v1: f64,
    v2: f64,
}

impl Default for DoubleEmaFilter {
    fn default() -> Self {
        Self { kp: 1.0, v1: 0.0, v2: 0.0 }
    }
}

impl DoubleEmaFilter {
    #[inline]
    pub fn process_ema(&mut self, input: f64) -> f64 {
        self.v1 += self.kp * (input - self.v1);
        self.v2 += self.kp * (self.v1 - self.v2);
        self.v2
    }
}

impl ChannelFilter for DoubleEmaFilter {
    fn reset(&mut self) {
        self.v1 = 0.0;
        self.v2 = 0.0;
    }

    fn set_cutoff(&mut self, cutoff: f64, _q: f64) {
        self.kp = normalized_cutoff_to_one_pole_kp(cutoff);
    }

    #[inline]
    fn process(&mut self, input: f64) -> f64 {
        self.process_ema(input)
    }
}

/// EMA-subtraction highpass. Removes the DC buildup that otherwise
/// accumulates in a recirculating network.
#[derive(Clone)]
pub struct EmaHighpass {
    kp: f64,
    v1: f64,
}

impl Default for EmaHighpass {
    fn default() -> Self {
        Self { kp: 1.0, v1: 0.0 }
    }
}

impl ChannelFilter for EmaHighpass {
    fn reset(&mut self) {
        self.v1 = 0.0;
    }

    fn set_cutoff(&mut self, cutoff: f64, _q: f64) {
        self.kp = normalized_cutoff_to_one_pole_kp(cutoff);
    }

    #[inline]
    fn process(&mut self, input: f64) -> f64 {
        self.v1 += self.kp * (input - self.v1);
        input - self.v1
    }
}

/// Slew limiter: moves toward the target by at most `rate` per sample.
#[derive(Clone)]
pub struct RateLimiter {
    rate: f64,
    value: f64,
}

impl RateLimiter {
    pub fn new(rate: f64, initial_value: f64) -> Self {
        Self { rate, value: initial_value }
    }

    pub fn reset(&mut self, value: f64) {
        self.value = value;
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    #[inline]
    pub fn process(&mut self, target: f64) -> f64 {
        let diff = target - self.value;
        if diff > self.rate {
            self.value += self.rate;
        } else if diff < -self.rate {
            self.value -= self.rate;
        } else {
            self.value = target;
        }
        self.value
    }
}
