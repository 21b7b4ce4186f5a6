//! Feedback delay network core.
//!
//! Size-N recirculating network: a matrix mix of the previous sample's
//! state vector, per-channel input injection, then delay -> lowpass ->
//! highpass per channel. The two-row ping-pong buffer guarantees the mix
//! reads the complete previous state before any channel is updated.

use crate::delay::DelayLine;
use crate::matrix::{FeedbackMatrix, FeedbackMatrixType};
use crate::smoother::{DoubleEmaFilter, EmaHighpass};

/// Per-channel feedback-path filter interface.
///
/// Implementations are `Default`-constructible so a network can be built
/// before cutoffs are assigned; call `set_cutoff` before relying on the
/// response. `q` is ignored by one-pole implementations.
pub trait ChannelFilter: Default {
    fn reset(&mut self);
    fn set_cutoff(&mut self, cutoff: f64, q: f64);
    fn process(&mut self, input: f64) -> f64;
}

/// No-op filter, for slots a preset disables.
#[derive(Clone, Default)]
pub struct Bypass;

impl ChannelFilter for Bypass {
    fn reset(&mut self) {}

    fn set_cutoff(&mut self, _cutoff: f64, _q: f64) {}

    #[inline]
    fn process(&mut self, input: f64) -> f64 {
        input
    }
}

/// The network core, generic over delay interpolation and the two
/// feedback-path filters.
pub struct FeedbackDelayNetwork<D, L = DoubleEmaFilter, H = EmaHighpass>
where
    D: DelayLine,
    L: ChannelFilter,
    H: ChannelFilter,
{
    matrix: FeedbackMatrix,
    buf: [Vec<f64>; 2],
    buf_index: usize,
    pub delay: Vec<D>,
    pub lowpass: Vec<L>,
    pub highpass: Vec<H>,
    pub input_gain: Vec<f64>,
    pub mix_gain: Vec<f64>,
}

impl<D, L, H> FeedbackDelayNetwork<D, L, H>
where
    D: DelayLine,
    L: ChannelFilter,
    H: ChannelFilter,
{
    /// The matrix starts all-zero: until [`Self::randomize_matrix`] (or
    /// [`Self::set_matrix`]) is called the network does not recirculate.
    pub fn new(size: usize, sample_rate: f64, max_seconds: f64) -> Self {
        assert!(size >= 1, "feedback delay network: size must be >= 1, got {size}");
        Self {
            matrix: FeedbackMatrix::zero(size),
            buf: [vec![0.0; size], vec![0.0; size]],
            buf_index: 0,
            delay: (0..size).map(|_| D::new(sample_rate, max_seconds)).collect(),
            lowpass: (0..size).map(|_| L::default()).collect(),
            highpass: (0..size).map(|_| H::default()).collect(),
            input_gain: vec![1.0; size],
            mix_gain: vec![1.0; size],
        }
    }

    pub fn size(&self) -> usize {
        self.matrix.size()
    }

    pub fn randomize_matrix(&mut self, ty: FeedbackMatrixType, seed: u64) {
        self.matrix = FeedbackMatrix::generate(ty, self.size(), seed);
    }

    /// Orthogonal matrix blended toward identity; `identity_amount` near
    /// 0 keeps cross-coupling weak.
    pub fn randomize_orthogonal(&mut self, seed: u64, identity_amount: f64) {
        self.matrix =
            crate::matrix::random_orthogonal_blend(self.size(), seed, false, identity_amount);
    }

    pub fn set_matrix(&mut self, matrix: FeedbackMatrix) {
        assert!(
            matrix.size() == self.size(),
            "feedback delay network: matrix size {} != network size {}",
            matrix.size(),
            self.size()
        );
        self.matrix = matrix;
    }

    pub fn set_time_at(&mut self, index: usize, time_in_samples: f64) {
        self.delay[index].set_time(time_in_samples);
    }

    pub fn reset(&mut self) {
        for row in &mut self.buf {
            row.fill(0.0);
        }
        for delay in &mut self.delay {
            delay.reset();
        }
        for lowpass in &mut self.lowpass {
            lowpass.reset();
        }
        for highpass in &mut self.highpass {
            highpass.reset();
        }
    }

    /// One sample through the full network.
    #[inline]
    pub fn process(&mut self, input: f64, feedback: f64) -> f64 {
        self.process_with(|_i, mixed, gain, delay, lowpass, highpass| {
            let sig = gain * input + feedback * mixed;
            highpass.process(lowpass.process(delay.process(sig)))
        })
    }

    /// One sample where the caller supplies the per-channel step.
    ///
    /// The closure receives the channel index, the matrix-mixed value for
    /// that channel (previous state through the matrix, no feedback gain
    /// applied yet), the channel's input gain, and the channel's delay
    /// and filters. Its return value becomes the new state, and the
    /// mix-gain-weighted sum of all returns is the network output. The
    /// specialized networks build their modulation schemes on this.
    #[inline]
    pub fn process_with<F>(&mut self, mut step: F) -> f64
    where
        F: FnMut(usize, f64, f64, &mut D, &mut L, &mut H) -> f64,
    {
        self.buf_index ^= 1;
        let Self {
            matrix,
            buf,
            buf_index,
            delay,
            lowpass,
            highpass,
            input_gain,
            mix_gain,
        } = self;
        let (lo, hi) = buf.split_at_mut(1);
        let (front, back) = if *buf_index == 0 {
            (&mut lo[0][..], &hi[0][..])
        } else {
            (&mut hi[0][..], &lo[0][..])
        };

        matrix.mul_vec(back, front);

        let mut sum = 0.0;
        for (i, value) in front.iter_mut().enumerate() {
            *value = step(
                i,
                *value,
                input_gain[i],
                &mut delay[i],
                &mut lowpass[i],
                &mut highpass[i],
            );
            sum += mix_gain[i] * *value;
        }
        sum
    }

    /// Matrix-mix half of one sample. Used by coupled pairs that must
    /// both finish mixing before either updates its delays.
    pub fn pre_process(&mut self) {
        self.buf_index ^= 1;
        let Self { matrix, buf, buf_index, .. } = self;
        let (lo, hi) = buf.split_at_mut(1);
        let (front, back) = if *buf_index == 0 {
            (&mut lo[0][..], &hi[0][..])
        } else {
            (&mut hi[0][..], &lo[0][..])
        };
        matrix.mul_vec(back, front);
    }

    /// The mixed state vector. Valid between `pre_process` and
    /// `post_process`.
    pub fn front(&self) -> &[f64] {
        &self.buf[self.buf_index]
    }

    /// Delay/filter half of one sample, blending this network's mixed
    /// state with another network's through the rotation gains
    /// `g1 = a/√(a²+1)`, `g2 = 1/√(a²+1)`. Call only after
    /// [`Self::pre_process`] on both networks.
    pub fn post_process(
        &mut self,
        input: f64,
        feedback: f64,
        g1: f64,
        g2: f64,
        coupling: &[f64],
    ) -> f64 {
        let Self {
            buf,
            buf_index,
            delay,
            lowpass,
            highpass,
            input_gain,
            mix_gain,
            ..
        } = self;
        let front = &mut buf[*buf_index];
        debug_assert_eq!(coupling.len(), front.len());

        let mut sum = 0.0;
        for (i, value) in front.iter_mut().enumerate() {
            let fb = g1 * *value + g2 * coupling[i];
            let sig = delay[i].process(input_gain[i] * input + feedback * fb);
            *value = highpass[i].process(lowpass[i].process(sig));
            sum += mix_gain[i] * *value;
        }
        sum
    }
}
