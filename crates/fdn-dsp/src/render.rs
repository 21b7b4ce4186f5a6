//! Offline render entry point.
//!
//! Takes a normalized [`RenderParams`], drives the selected network with
//! the selected excitation, and returns whole channels of `f64` samples.
//! Rendering never fails for in-range parameters: degenerate output is
//! reported through [`RenderStatus`], and the soft-clip output stage
//! keeps every sample finite.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::delay::{CubicDelay, DelayLine, IntDelay, LinearDelay, LongAllpass};
use crate::fdn::{ChannelFilter, FeedbackDelayNetwork};
use crate::governor::{EnergyStore, RenderProbe, SafetyGovernor};
use crate::params::{Excitation, FdnVariant, FilterKind, Interpolation, RenderParams};
use crate::smoother::{DoubleEmaFilter, EmaHighpass};
use crate::svf::{SvfHp, SvfLp};
use crate::variants::{CoupledFdn, EasyFdn, FilteredDelay, SnaredFdn, TimeModulatedFdn};

/// Anything below this peak counts as silence.
const SILENCE_FLOOR: f64 = 1e-8;

/// Decorrelation stride between stereo channel seeds.
const CHANNEL_SEED_STRIDE: u64 = 65537;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderStatus {
    Ok,
    /// Every sample of every channel stayed below the silence floor.
    Silent,
}

pub struct RenderOutput {
    pub channels: Vec<Vec<f64>>,
    pub sample_rate: f64,
    pub status: RenderStatus,
}

/// Render a preset. Mono unless `params.stereo`; stereo channels use
/// decorrelated seeds and are otherwise identical networks.
pub fn render(params: &RenderParams) -> RenderOutput {
    let mut params = params.clone();
    params.normalize();

    let channel_count = if params.stereo { 2 } else { 1 };
    let mut channels: Vec<Vec<f64>> = (0..channel_count)
        .map(|ch| {
            let seed = params.seed.wrapping_add(ch as u64 * CHANNEL_SEED_STRIDE);
            render_channel_dispatch(&params, seed)
        })
        .collect();

    let mut probe = RenderProbe::new(1024);
    for channel in &channels {
        for &sample in channel {
            probe.push(sample);
        }
    }

    if probe.peak() <= SILENCE_FLOOR {
        return RenderOutput {
            channels,
            sample_rate: params.sample_rate,
            status: RenderStatus::Silent,
        };
    }

    if params.trim_leading_silence {
        let onset = channels
            .iter()
            .map(|ch| {
                ch.iter()
                    .position(|s| s.abs() > SILENCE_FLOOR)
                    .unwrap_or(ch.len())
            })
            .min()
            .unwrap_or(0);
        for channel in &mut channels {
            channel.drain(..onset.min(channel.len()));
        }
    }

    RenderOutput {
        channels,
        sample_rate: params.sample_rate,
        status: RenderStatus::Ok,
    }
}

fn render_channel_dispatch(params: &RenderParams, seed: u64) -> Vec<f64> {
    // The easy network carries its own fixed delay/filter units, so the
    // interpolation and filter selections do not apply to it.
    if params.variant == FdnVariant::Easy {
        return render_easy(params, seed);
    }

    match (params.interpolation, params.filter) {
        (Interpolation::None, FilterKind::Ema) => {
            render_channel::<IntDelay, DoubleEmaFilter, EmaHighpass>(params, seed)
        }
        (Interpolation::Linear, FilterKind::Ema) => {
            render_channel::<LinearDelay, DoubleEmaFilter, EmaHighpass>(params, seed)
        }
        (Interpolation::Cubic, FilterKind::Ema) => {
            render_channel::<CubicDelay, DoubleEmaFilter, EmaHighpass>(params, seed)
        }
        (Interpolation::None, FilterKind::Svf) => {
            render_channel::<IntDelay, SvfLp, SvfHp>(params, seed)
        }
        (Interpolation::Linear, FilterKind::Svf) => {
            render_channel::<LinearDelay, SvfLp, SvfHp>(params, seed)
        }
        (Interpolation::Cubic, FilterKind::Svf) => {
            render_channel::<CubicDelay, SvfLp, SvfHp>(params, seed)
        }
    }
}

/// Excitation source with optional allpass diffusion.
struct Exciter {
    kind: Excitation,
    noise_gain: f64,
    noise_decay: f64,
    diffusion: Vec<LongAllpass<IntDelay>>,
}

impl Exciter {
    fn new(params: &RenderParams) -> Self {
        let decay_samples = params.noise_decay_seconds * params.sample_rate;
        let noise_decay = if decay_samples < 1.0 {
            0.0
        } else {
            f64::EPSILON.powf(1.0 / decay_samples)
        };

        let diffusion = params
            .diffusion_times_samples
            .iter()
            .map(|&time| {
                let mut ap: LongAllpass<IntDelay> = LongAllpass::new(
                    params.sample_rate,
                    params.max_delay_seconds,
                );
                ap.prepare(time, params.diffusion_gain);
                ap
            })
            .collect();

        Self {
            kind: params.excitation,
            noise_gain: 1.0,
            noise_decay,
            diffusion,
        }
    }

    #[inline]
    fn process(&mut self, index: usize, rng: &mut ChaCha8Rng) -> f64 {
        let mut sig = match self.kind {
            Excitation::Impulse => {
                if index == 0 {
                    1.0
                } else {
                    0.0
                }
            }
            Excitation::NoiseBurst => {
                let noise = self.noise_gain * (2.0 * rng.random::<f64>() - 1.0);
                self.noise_gain *= self.noise_decay;
                noise
            }
        };
        for ap in &mut self.diffusion {
            sig = ap.process(sig);
        }
        sig
    }
}

#[inline]
fn soft_clip(sample: f64, drive: f64) -> f64 {
    // tanh passes NaN through, so a diverged loop must be flushed here.
    let clipped = (drive * sample).tanh();
    if clipped.is_finite() {
        clipped
    } else {
        0.0
    }
}

fn total_samples(params: &RenderParams) -> usize {
    (params.duration_seconds * params.sample_rate).ceil() as usize
}

fn render_channel<D, L, H>(params: &RenderParams, seed: u64) -> Vec<f64>
where
    D: DelayLine,
    L: ChannelFilter,
    H: ChannelFilter,
{
    let total = total_samples(params);
    let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(1));
    let mut exciter = Exciter::new(params);
    let mut out = Vec::with_capacity(total);

    match params.variant {
        FdnVariant::Plain => {
            let mut fdn: FeedbackDelayNetwork<D, L, H> =
                FeedbackDelayNetwork::new(params.size, params.sample_rate, params.max_delay_seconds);
            fdn.randomize_matrix(params.matrix_type, seed);
            configure_channels(&mut fdn, params);

            for n in 0..total {
                let x = exciter.process(n, &mut rng);
                out.push(soft_clip(fdn.process(x, params.feedback), params.output_gain));
            }
        }
        FdnVariant::TimeModulated => {
            let mut fdn: TimeModulatedFdn<D, L, H> = TimeModulatedFdn::new(
                params.size,
                params.sample_rate,
                params.max_delay_seconds,
                params.time_modulation,
                params.time_rate_limit,
                params.impact_position,
            );
            fdn.fdn.randomize_matrix(params.matrix_type, seed);
            configure_channels(&mut fdn.fdn, params);
            for (i, &time) in params.delay_times_samples.iter().enumerate() {
                fdn.set_time_at(i, time);
            }

            for n in 0..total {
                let x = exciter.process(n, &mut rng);
                out.push(soft_clip(fdn.process(x, params.feedback), params.output_gain));
            }
        }
        FdnVariant::Snared => {
            let mut fdn: SnaredFdn<D, L, H> = SnaredFdn::new(
                params.size,
                params.sample_rate,
                params.max_delay_seconds,
                params.time_modulation,
                params.time_rate_limit,
                params.pulse_threshold,
                params.pulse_loss,
                params.pulse_decay_seconds * params.sample_rate,
            );
            fdn.fdn.randomize_matrix(params.matrix_type, seed);
            configure_channels(&mut fdn.fdn, params);
            for (i, &time) in params.delay_times_samples.iter().enumerate() {
                fdn.set_time_at(i, time);
            }

            for n in 0..total {
                let x = exciter.process(n, &mut rng);
                out.push(soft_clip(
                    fdn.process(x, params.feedback, &mut rng),
                    params.output_gain,
                ));
            }
        }
        FdnVariant::Coupled => {
            let governor = SafetyGovernor::new(
                1.0,
                4.0 * params.size as f64,
                (0.01 * params.sample_rate).max(1.0),
                0.001,
            );
            let mut pair: CoupledFdn<D, L, H> = CoupledFdn::new(
                params.size,
                params.sample_rate,
                params.max_delay_seconds,
                params.coupling_gain,
                governor,
            );
            pair.primary.randomize_matrix(params.matrix_type, seed);
            pair.secondary
                .randomize_matrix(params.matrix_type, seed.wrapping_add(1));
            configure_channels(&mut pair.primary, params);
            configure_channels(&mut pair.secondary, params);
            // Detune the partner so the pair beats instead of doubling.
            for (i, &time) in params.delay_times_samples.iter().enumerate() {
                pair.secondary.set_time_at(i, 1.37 * time);
            }

            for n in 0..total {
                let x = exciter.process(n, &mut rng);
                out.push(soft_clip(pair.process(x, params.feedback), params.output_gain));
            }
        }
        FdnVariant::Easy => unreachable!("easy variant is dispatched separately"),
    }

    out
}

fn configure_channels<D, L, H>(fdn: &mut FeedbackDelayNetwork<D, L, H>, params: &RenderParams)
where
    D: DelayLine,
    L: ChannelFilter,
    H: ChannelFilter,
{
    for i in 0..params.size {
        fdn.set_time_at(i, params.delay_times_samples[i]);
        fdn.lowpass[i].set_cutoff(params.lowpass_cutoffs[i], params.lowpass_q[i]);
        fdn.highpass[i].set_cutoff(params.highpass_cutoffs[i], params.highpass_q[i]);
    }
}

fn build_easy(params: &RenderParams, rng: &mut ChaCha8Rng, detune: f64) -> EasyFdn {
    let delays: Vec<FilteredDelay> = (0..params.size)
        .map(|i| {
            FilteredDelay::new(
                params.sample_rate,
                detune * params.delay_times_samples[i],
                params.time_modulation,
                params.lowpass_cutoffs[i],
                params.lowpass_q[i],
            )
        })
        .collect();
    let crossfeeds: Vec<f64> = (0..params.size)
        .map(|_| 2.0 * rng.random::<f64>() - 1.0)
        .collect();
    EasyFdn::new(params.sample_rate, params.feedback, &crossfeeds, delays)
}

fn render_easy(params: &RenderParams, seed: u64) -> Vec<f64> {
    let total = total_samples(params);
    let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(1));
    let mut exciter = Exciter::new(params);
    let mut out = Vec::with_capacity(total);

    if params.fdn_mix <= f64::EPSILON {
        let mut fdn = build_easy(params, &mut rng, 1.0);
        for n in 0..total {
            let x = exciter.process(n, &mut rng);
            out.push(soft_clip(fdn.process(x, 0.0), params.output_gain));
        }
        return out;
    }

    // Pair of detuned networks whose outputs collide: when the position
    // difference closes below the collision distance, amplitude moves
    // between them in proportion to the opposing velocities, and the
    // exchanged amount recirculates through a leaky energy store.
    let mut fdn = [
        build_easy(params, &mut rng, 1.0),
        build_easy(params, &mut rng, 1.37),
    ];
    let decay_samples = (0.001 * params.sample_rate).max(1.0);
    let mut store = [
        EnergyStore::new(decay_samples),
        EnergyStore::new(decay_samples),
    ];
    let mut position = [0.0f64; 2];
    let mut velocity = [0.0f64; 2];

    for n in 0..total {
        let x = exciter.process(n, &mut rng);

        let dist = position[0] - position[1];
        if dist < params.collision_distance {
            let energy = position[0].abs() + position[1].abs();
            let v0 = velocity[0].abs();
            let v1 = velocity[1].abs();
            let denom = if v0 + v1 >= f64::EPSILON { v0 + v1 } else { 1.0 };
            position[0] += energy * v1 / denom;
            position[1] -= energy * v0 / denom;
        }

        for idx in 0..2 {
            let collision = store[idx].process(position[idx]);
            let p0 = fdn[idx].process(x + collision, 0.0);
            velocity[idx] = p0 - position[idx];
            position[idx] = p0;
        }

        let mix = position[0] + params.fdn_mix * (position[1] - position[0]);
        out.push(soft_clip(mix, params.output_gain));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::FeedbackMatrixType;

    fn short_params() -> RenderParams {
        let mut p = RenderParams::default();
        p.size = 4;
        p.seed = 1;
        p.matrix_type = FeedbackMatrixType::SpecialOrthogonal;
        p.delay_times_samples = vec![100.0, 150.0, 200.0, 250.0];
        p.feedback = 0.5;
        p.duration_seconds = 0.25;
        p.normalize();
        p
    }

    #[test]
    fn impulse_render_is_bounded_and_decays() {
        let out = render(&short_params());
        assert_eq!(out.status, RenderStatus::Ok);
        assert_eq!(out.channels.len(), 1);

        let samples = &out.channels[0];
        assert_eq!(samples.len(), 12000);
        let mut early = 0.0;
        let mut late = 0.0;
        for (n, &y) in samples.iter().enumerate() {
            assert!(y.is_finite() && y.abs() < 2.0, "y={y} at n={n}");
            if n < 3000 {
                early += y * y;
            } else if n >= 9000 {
                late += y * y;
            }
        }
        assert!(late < early, "no decay: early={early} late={late}");
    }

    #[test]
    fn over_unity_feedback_preset_renders_finite() {
        // Short loops plus feedback far above unity would otherwise
        // saturate to infinity and smear NaN through the matrix mix.
        let json = r#"{
            "size": 4,
            "feedback": 4.0,
            "delay_times_samples": [10, 11, 12, 13],
            "duration_seconds": 1.0
        }"#;
        let params = RenderParams::from_json(json).unwrap();
        let out = render(&params);
        for (n, &y) in out.channels[0].iter().enumerate() {
            assert!(y.is_finite(), "non-finite output at n={n}");
            assert!(y.abs() <= 1.0, "clip stage escaped at n={n}: {y}");
        }
    }

    #[test]
    fn clip_stage_flushes_non_finite_input() {
        assert_eq!(soft_clip(f64::NAN, 1.0), 0.0);
        assert_eq!(soft_clip(f64::INFINITY, 1.0), 1.0);
        assert_eq!(soft_clip(1.0, f64::NAN), 0.0);
    }

    #[test]
    fn render_is_deterministic() {
        let p = short_params();
        let a = render(&p);
        let b = render(&p);
        assert_eq!(a.channels, b.channels);
    }

    #[test]
    fn stereo_channels_are_decorrelated() {
        let mut p = short_params();
        p.stereo = true;
        let out = render(&p);
        assert_eq!(out.channels.len(), 2);
        assert_ne!(out.channels[0], out.channels[1]);
    }

    #[test]
    fn zero_duration_render_is_silent() {
        let mut p = short_params();
        p.duration_seconds = 0.0;
        let out = render(&p);
        assert_eq!(out.status, RenderStatus::Silent);
        assert!(out.channels[0].is_empty());
    }

    #[test]
    fn silent_render_is_flagged_not_looped() {
        let mut p = short_params();
        // A zero-drive clip stage flattens everything.
        p.output_gain = 0.0;
        p.trim_leading_silence = true;
        let out = render(&p);
        assert_eq!(out.status, RenderStatus::Silent);
        assert_eq!(out.channels[0].len(), 12000);
    }

    #[test]
    fn leading_silence_is_trimmed() {
        let mut p = short_params();
        p.trim_leading_silence = true;
        let full = render(&short_params());
        let trimmed = render(&p);
        // The impulse reaches the output after the shortest delay time.
        assert!(trimmed.channels[0].len() < full.channels[0].len());
        assert!(trimmed.channels[0][0].abs() > SILENCE_FLOOR);
    }

    #[test]
    fn every_variant_renders_finite_output() {
        for variant in [
            FdnVariant::Plain,
            FdnVariant::TimeModulated,
            FdnVariant::Snared,
            FdnVariant::Coupled,
            FdnVariant::Easy,
        ] {
            let mut p = short_params();
            p.variant = variant;
            p.time_modulation = 0.2;
            p.excitation = Excitation::NoiseBurst;
            let out = render(&p);
            for &y in &out.channels[0] {
                assert!(y.is_finite(), "{variant:?} produced non-finite output");
                assert!(y.abs() <= 1.0, "{variant:?} escaped the clip stage: {y}");
            }
        }
    }

    #[test]
    fn colliding_pair_differs_from_single_network() {
        let mut single = short_params();
        single.variant = FdnVariant::Easy;
        single.fdn_mix = 0.0;

        let mut pair = single.clone();
        pair.fdn_mix = 0.5;
        pair.collision_distance = 0.01;

        let a = render(&single);
        let b = render(&pair);
        assert_eq!(a.status, RenderStatus::Ok);
        assert_eq!(b.status, RenderStatus::Ok);
        for (n, &y) in b.channels[0].iter().enumerate() {
            assert!(y.is_finite(), "non-finite output at n={n}");
            assert!(y.abs() <= 1.0, "clip stage escaped at n={n}: {y}");
        }
        // The detuned partner and the collision exchange must be audible.
        assert_ne!(a.channels[0], b.channels[0]);
    }

    #[test]
    fn interpolation_and_filter_grid_renders() {
        for interpolation in [Interpolation::None, Interpolation::Linear, Interpolation::Cubic] {
            for filter in [FilterKind::Ema, FilterKind::Svf] {
                let mut p = short_params();
                p.interpolation = interpolation;
                p.filter = filter;
                let out = render(&p);
                assert_eq!(out.status, RenderStatus::Ok, "{interpolation:?}/{filter:?}");
            }
        }
    }
}
