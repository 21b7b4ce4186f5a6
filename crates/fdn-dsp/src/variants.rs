//! Specialized networks built by composition over the core.
//!
//! Each variant owns a [`FeedbackDelayNetwork`] (or two) and supplies its
//! own per-channel step through `process_with`, instead of reimplementing
//! the mix/update loop.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::delay::{DelayLine, IntDelay};
use crate::fdn::{ChannelFilter, FeedbackDelayNetwork};
use crate::governor::SafetyGovernor;
use crate::matrix::householder_from_vector;
use crate::smoother::{DoubleEmaFilter, EmaHighpass, RateLimiter};
use crate::svf::Svf;

/// Stochastic rattle generator.
///
/// Fires when the tracked gain falls behind the driving signal by more
/// than `threshold`, with a randomized decay time per trigger. The loss
/// factor shrinks on every trigger so the rattle dies out instead of
/// re-exciting itself forever.
#[derive(Clone)]
pub struct RandomPulse {
    gain: f64,
    decay: f64,
    threshold: f64,
    loss: f64,
    decay_time_in_samples: f64,
}

impl RandomPulse {
    pub fn new(threshold: f64, loss: f64, decay_time_in_samples: f64) -> Self {
        let mut pulse = Self {
            gain: 0.0,
            decay: 0.0,
            threshold,
            loss,
            decay_time_in_samples,
        };
        pulse.set_decay(decay_time_in_samples);
        pulse
    }

    pub fn reset(&mut self) {
        self.gain = 0.0;
    }

    fn set_decay(&mut self, time_in_samples: f64) {
        self.decay = if time_in_samples < 1.0 {
            0.0
        } else {
            f64::EPSILON.powf(1.0 / time_in_samples)
        };
    }

    #[inline]
    pub fn process(&mut self, rng: &mut ChaCha8Rng, signal: f64) -> f64 {
        let diff = self.gain - signal;
        if diff >= self.threshold {
            let jitter = 0.8 + 0.45 * rng.random::<f64>();
            self.set_decay(self.decay_time_in_samples * jitter);
            self.gain = self.loss * diff;
            self.loss *= 0.99;
        } else {
            self.gain *= self.decay;
        }
        self.gain
    }
}

/// Network whose delay times shrink with signal amplitude, for the
/// pitch-bend-on-impact behavior of struck membranes.
pub struct TimeModulatedFdn<D, L = DoubleEmaFilter, H = EmaHighpass>
where
    D: DelayLine,
    L: ChannelFilter,
    H: ChannelFilter,
{
    pub fdn: FeedbackDelayNetwork<D, L, H>,
    delay_time: Vec<RateLimiter>,
    neutral_time: Vec<f64>,
    time_modulation: f64,
}

impl<D, L, H> TimeModulatedFdn<D, L, H>
where
    D: DelayLine,
    L: ChannelFilter,
    H: ChannelFilter,
{
    /// `impact_position` in [-1, 1] tilts the input gains linearly across
    /// channels; 0 drives all channels equally.
    pub fn new(
        size: usize,
        sample_rate: f64,
        max_seconds: f64,
        time_modulation: f64,
        rate_limit: f64,
        impact_position: f64,
    ) -> Self {
        let mut fdn: FeedbackDelayNetwork<D, L, H> =
            FeedbackDelayNetwork::new(size, sample_rate, max_seconds);

        let start = 1.0 + impact_position;
        let slope = if size > 1 {
            -2.0 * impact_position / (size - 1) as f64
        } else {
            0.0
        };
        for (i, gain) in fdn.input_gain.iter_mut().enumerate() {
            *gain = start + i as f64 * slope;
        }

        Self {
            fdn,
            delay_time: vec![RateLimiter::new(rate_limit, 0.0); size],
            neutral_time: vec![0.0; size],
            time_modulation,
        }
    }

    pub fn set_time_at(&mut self, index: usize, time_in_samples: f64) {
        self.neutral_time[index] = time_in_samples;
        self.delay_time[index].reset(time_in_samples);
    }

    pub fn reset(&mut self) {
        self.fdn.reset();
        for (limiter, &time) in self.delay_time.iter_mut().zip(&self.neutral_time) {
            limiter.reset(time);
        }
    }

    #[inline]
    pub fn process(&mut self, input: f64, feedback: f64) -> f64 {
        let Self { fdn, delay_time, neutral_time, time_modulation } = self;
        fdn.process_with(|i, mixed, gain, delay, lowpass, highpass| {
            let sig = gain * input + feedback * mixed;

            let time_mod = 1.0 - *time_modulation * sig.abs();
            let target = neutral_time[i] * time_mod.max(0.1);
            delay.set_time(delay_time[i].process(target));

            highpass.process(lowpass.process(delay.process(sig)))
        })
    }
}

/// Time-modulated network with a [`RandomPulse`] injected into each
/// feedback path: the snare-wire buzz of a drum model.
pub struct SnaredFdn<D, L = DoubleEmaFilter, H = EmaHighpass>
where
    D: DelayLine,
    L: ChannelFilter,
    H: ChannelFilter,
{
    pub fdn: FeedbackDelayNetwork<D, L, H>,
    delay_time: Vec<RateLimiter>,
    neutral_time: Vec<f64>,
    pulsar: Vec<RandomPulse>,
    time_modulation: f64,
}

impl<D, L, H> SnaredFdn<D, L, H>
where
    D: DelayLine,
    L: ChannelFilter,
    H: ChannelFilter,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        size: usize,
        sample_rate: f64,
        max_seconds: f64,
        time_modulation: f64,
        rate_limit: f64,
        pulse_threshold: f64,
        pulse_loss: f64,
        pulse_decay_in_samples: f64,
    ) -> Self {
        Self {
            fdn: FeedbackDelayNetwork::new(size, sample_rate, max_seconds),
            delay_time: vec![RateLimiter::new(rate_limit, 0.0); size],
            neutral_time: vec![0.0; size],
            pulsar: vec![
                RandomPulse::new(pulse_threshold, pulse_loss, pulse_decay_in_samples);
                size
            ],
            time_modulation,
        }
    }

    pub fn set_time_at(&mut self, index: usize, time_in_samples: f64) {
        self.neutral_time[index] = time_in_samples;
        self.delay_time[index].reset(time_in_samples);
    }

    pub fn reset(&mut self) {
        self.fdn.reset();
        for (limiter, &time) in self.delay_time.iter_mut().zip(&self.neutral_time) {
            limiter.reset(time);
        }
        for pulse in &mut self.pulsar {
            pulse.reset();
        }
    }

    #[inline]
    pub fn process(&mut self, input: f64, feedback: f64, rng: &mut ChaCha8Rng) -> f64 {
        let Self {
            fdn,
            delay_time,
            neutral_time,
            pulsar,
            time_modulation,
        } = self;
        fdn.process_with(|i, mixed, gain, delay, lowpass, highpass| {
            let fb = feedback * mixed;
            let sig = gain * input + fb + pulsar[i].process(rng, fb);

            let time_mod = 1.0 - *time_modulation * sig.abs();
            let target = neutral_time[i] * time_mod.max(0.1);
            delay.set_time(delay_time[i].process(target));

            highpass.process(lowpass.process(delay.process(sig)))
        })
    }
}

/// Two networks exchanging mixed state through an energy-preserving
/// rotation, with a governor throttling the coupling when the combined
/// output runs away.
pub struct CoupledFdn<D, L = DoubleEmaFilter, H = EmaHighpass>
where
    D: DelayLine,
    L: ChannelFilter,
    H: ChannelFilter,
{
    pub primary: FeedbackDelayNetwork<D, L, H>,
    pub secondary: FeedbackDelayNetwork<D, L, H>,
    coupling_gain: f64,
    governor: SafetyGovernor,
    scratch: Vec<f64>,
}

impl<D, L, H> CoupledFdn<D, L, H>
where
    D: DelayLine,
    L: ChannelFilter,
    H: ChannelFilter,
{
    /// Larger `coupling_gain` means *less* coupling: the rotation gains
    /// are `g1 = a/√(a²+1)` toward self and `g2 = 1/√(a²+1)` toward the
    /// partner.
    pub fn new(
        size: usize,
        sample_rate: f64,
        max_seconds: f64,
        coupling_gain: f64,
        governor: SafetyGovernor,
    ) -> Self {
        Self {
            primary: FeedbackDelayNetwork::new(size, sample_rate, max_seconds),
            secondary: FeedbackDelayNetwork::new(size, sample_rate, max_seconds),
            coupling_gain,
            governor,
            scratch: vec![0.0; size],
        }
    }

    pub fn reset(&mut self) {
        self.primary.reset();
        self.secondary.reset();
        self.governor.reset();
        self.scratch.fill(0.0);
    }

    /// Drives the primary network with `input`; the secondary rings only
    /// through the coupling.
    #[inline]
    pub fn process(&mut self, input: f64, feedback: f64) -> f64 {
        self.primary.pre_process();
        self.secondary.pre_process();

        // The governor scales the cross term toward zero, leaving each
        // network's own state untouched.
        let a = self.coupling_gain;
        let g2 = self.governor.gain() / (a * a + 1.0).sqrt();
        let g1 = (1.0 - g2 * g2).sqrt();

        self.scratch.copy_from_slice(self.primary.front());
        let mut sig = self
            .primary
            .post_process(input, feedback, g1, g2, self.secondary.front());
        sig += self
            .secondary
            .post_process(0.0, feedback, g1, -g2, &self.scratch);

        self.governor.process(sig);
        sig
    }
}

/// Bandpassed delay with slewed time modulation, the per-channel unit of
/// [`EasyFdn`].
pub struct FilteredDelay {
    delay_samples: f64,
    bp_cut: f64,
    bp_q: f64,
    time_mod_amount: f64,
    time_slew: RateLimiter,
    delay: IntDelay,
    bandpass: Svf,
}

impl FilteredDelay {
    pub fn new(
        sample_rate: f64,
        delay_samples: f64,
        time_mod_amount: f64,
        bandpass_cut: f64,
        bandpass_q: f64,
    ) -> Self {
        Self {
            delay_samples,
            bp_cut: bandpass_cut,
            bp_q: bandpass_q,
            time_mod_amount,
            time_slew: RateLimiter::new(0.5, 0.0),
            delay: IntDelay::new(sample_rate, 2.0 * delay_samples / sample_rate),
            bandpass: Svf::new(bandpass_cut, bandpass_q),
        }
    }

    pub fn reset(&mut self) {
        self.time_slew.reset(0.0);
        self.delay.reset();
        self.bandpass.reset();
    }

    /// `modulation` shifts the bandpass cutoff up and the delay time down
    /// by the same exponential factor.
    #[inline]
    pub fn process(&mut self, input: f64, modulation: f64) -> f64 {
        let mod_scaled = modulation.exp();
        self.bandpass.set_cutoff(self.bp_cut * mod_scaled, self.bp_q);
        let sig = self.bandpass.bp(input);
        self.time_slew.process((self.time_mod_amount * input).abs());
        self.delay
            .process_mod(sig, (self.delay_samples - self.time_slew.value()) / mod_scaled)
    }
}

/// Self-governing network over [`FilteredDelay`] channels.
///
/// The matrix is a Householder reflection built from the crossfeed
/// vector, and the cross gain decays at two rates: slowly whenever the
/// output exceeds the channel count, hard when it blows past 100.
pub struct EasyFdn {
    cross_gain_base: f64,
    cross_gain: f64,
    cross_gain_rate: f64,
    cross_decay: f64,
    threshold: f64,
    matrix: crate::matrix::FeedbackMatrix,
    buf: [Vec<f64>; 2],
    buf_index: usize,
    pub delay: Vec<FilteredDelay>,
}

impl EasyFdn {
    pub fn new(sample_rate: f64, cross_gain: f64, crossfeeds: &[f64], delays: Vec<FilteredDelay>) -> Self {
        assert!(
            crossfeeds.len() == delays.len(),
            "easy fdn: {} crossfeeds for {} delays",
            crossfeeds.len(),
            delays.len()
        );
        let size = delays.len();
        let peak_hold_samples = (128.0 / 48000.0) * sample_rate;
        Self {
            cross_gain_base: cross_gain,
            cross_gain,
            cross_gain_rate: 0.85,
            cross_decay: f64::EPSILON.powf(1.0 / (1024.0 * peak_hold_samples)),
            threshold: size as f64,
            matrix: householder_from_vector(crossfeeds, true),
            buf: [vec![0.0; size], vec![0.0; size]],
            buf_index: 0,
            delay: delays,
        }
    }

    pub fn reset(&mut self) {
        self.cross_gain = self.cross_gain_base;
        for row in &mut self.buf {
            row.fill(0.0);
        }
        for delay in &mut self.delay {
            delay.reset();
        }
    }

    #[inline]
    pub fn process(&mut self, input: f64, modulation: f64) -> f64 {
        self.buf_index ^= 1;
        let (lo, hi) = self.buf.split_at_mut(1);
        let (front, back) = if self.buf_index == 0 {
            (&mut lo[0][..], &hi[0][..])
        } else {
            (&mut hi[0][..], &lo[0][..])
        };
        self.matrix.mul_vec(back, front);

        let input = input / self.delay.len() as f64;
        let mut sum = 0.0;
        for (value, delay) in front.iter_mut().zip(self.delay.iter_mut()) {
            *value = delay.process(input + self.cross_gain * *value, modulation);
            sum += *value;
        }

        if sum > self.threshold {
            self.cross_gain *= if sum > 100.0 {
                self.cross_gain_rate
            } else {
                self.cross_decay
            };
        }
        sum
    }
}
