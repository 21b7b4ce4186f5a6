//! State variable and one-pole filters.
//!
//! The SVF is the trapezoidal-integration topology from the Faust filter
//! library. All response types share the same two-state update, so read
//! only one output per `tick` unless you mean to reuse the same state.

use crate::fdn::ChannelFilter;

pub const MIN_CUTOFF: f64 = 0.00001;
pub const NYQUIST: f64 = 0.49998;

fn clamp_cutoff(cutoff: f64) -> f64 {
    if cutoff.is_finite() {
        cutoff.clamp(MIN_CUTOFF, NYQUIST)
    } else {
        MIN_CUTOFF
    }
}

/// Two-pole state variable filter. Unconditionally stable for any Q > 0
/// with cutoff inside the clamped range.
#[derive(Clone)]
pub struct Svf {
    ic1eq: f64,
    ic2eq: f64,
    g: f64,
    k: f64,
}

impl Default for Svf {
    fn default() -> Self {
        Self::new(0.25, std::f64::consts::FRAC_1_SQRT_2)
    }
}

impl Svf {
    /// `cutoff` is normalized frequency, `cutoff_hz / sample_rate`.
    pub fn new(cutoff: f64, q: f64) -> Self {
        let mut svf = Self { ic1eq: 0.0, ic2eq: 0.0, g: 0.0, k: 0.0 };
        svf.set_cutoff(cutoff, q);
        svf
    }

    pub fn set_cutoff(&mut self, cutoff: f64, q: f64) {
        self.g = (clamp_cutoff(cutoff) * std::f64::consts::PI).tan();
        self.k = 1.0 / q;
    }

    pub fn reset(&mut self) {
        self.ic1eq = 0.0;
        self.ic2eq = 0.0;
    }

    /// Advance the filter state, returning `(v1, v2)` (band-pass and
    /// low-pass states).
    #[inline]
    pub fn tick(&mut self, v0: f64) -> (f64, f64) {
        let v1 = (self.ic1eq + self.g * (v0 - self.ic2eq))
            / (1.0 + self.g * (self.g + self.k));
        let v2 = self.ic2eq + self.g * v1;

        self.ic1eq = 2.0 * v1 - self.ic1eq;
        self.ic2eq = 2.0 * v2 - self.ic2eq;

        (v1, v2)
    }

    #[inline]
    pub fn lp(&mut self, v0: f64) -> f64 {
        let (_, v2) = self.tick(v0);
        v2
    }

    #[inline]
    pub fn bp(&mut self, v0: f64) -> f64 {
        let (v1, _) = self.tick(v0);
        v1
    }

    #[inline]
    pub fn hp(&mut self, v0: f64) -> f64 {
        let (v1, v2) = self.tick(v0);
        v0 - self.k * v1 - v2
    }

    #[inline]
    pub fn notch(&mut self, v0: f64) -> f64 {
        let (v1, _) = self.tick(v0);
        v0 - self.k * v1
    }

    #[inline]
    pub fn peak(&mut self, v0: f64) -> f64 {
        let (v1, v2) = self.tick(v0);
        v0 - self.k * v1 - 2.0 * v2
    }

    #[inline]
    pub fn ap(&mut self, v0: f64) -> f64 {
        let (v1, _) = self.tick(v0);
        v0 - 2.0 * self.k * v1
    }
}

/// SVF reading only the lowpass output.
#[derive(Clone, Default)]
pub struct SvfLp(pub Svf);

impl ChannelFilter for SvfLp {
    fn reset(&mut self) {
        self.0.reset();
    }

    fn set_cutoff(&mut self, cutoff: f64, q: f64) {
        self.0.set_cutoff(cutoff, q);
    }

    #[inline]
    fn process(&mut self, input: f64) -> f64 {
        self.0.lp(input)
    }
}

/// SVF reading only the highpass output.
#[derive(Clone, Default)]
pub struct SvfHp(pub Svf);

impl ChannelFilter for SvfHp {
    fn reset(&mut self) {
        self.0.reset();
    }

    fn set_cutoff(&mut self, cutoff: f64, q: f64) {
        self.0.set_cutoff(cutoff, q);
    }

    #[inline]
    fn process(&mut self, input: f64) -> f64 {
        self.0.hp(input)
    }
}

/// Low shelf from the same two-state update. `gain_amp` is linear amplitude.
#[derive(Clone)]
pub struct SvfLowShelf {
    ic1eq: f64,
    ic2eq: f64,
    g: f64,
    k: f64,
    a: f64,
}

impl SvfLowShelf {
    pub fn new(cutoff: f64, q: f64, gain_amp: f64) -> Self {
        let mut f = Self { ic1eq: 0.0, ic2eq: 0.0, g: 0.0, k: 0.0, a: 1.0 };
        f.set_cutoff(cutoff, q, gain_amp);
        f
    }

    pub fn set_cutoff(&mut self, cutoff: f64, q: f64, gain_amp: f64) {
        self.a = gain_amp.sqrt();
        self.g = (clamp_cutoff(cutoff) * std::f64::consts::PI).tan() / self.a.sqrt();
        self.k = 1.0 / q;
    }

    pub fn reset(&mut self) {
        self.ic1eq = 0.0;
        self.ic2eq = 0.0;
    }

    #[inline]
    pub fn process(&mut self, v0: f64) -> f64 {
        let v1 = (self.ic1eq + self.g * (v0 - self.ic2eq))
            / (1.0 + self.g * (self.g + self.k));
        let v2 = self.ic2eq + self.g * v1;

        self.ic1eq = 2.0 * v1 - self.ic1eq;
        self.ic2eq = 2.0 * v2 - self.ic2eq;

        v0 + (self.a - 1.0) * self.k * v1 + (self.a * self.a - 1.0) * v2
    }
}

/// High shelf counterpart of [`SvfLowShelf`].
#[derive(Clone)]
pub struct SvfHighShelf {
    ic1eq: f64,
    ic2eq: f64,
    g: f64,
    k: f64,
    a: f64,
}

impl SvfHighShelf {
    pub fn new(cutoff: f64, q: f64, gain_amp: f64) -> Self {
        let mut f = Self { ic1eq: 0.0, ic2eq: 0.0, g: 0.0, k: 0.0, a: 1.0 };
        f.set_cutoff(cutoff, q, gain_amp);
        f
    }

    pub fn set_cutoff(&mut self, cutoff: f64, q: f64, gain_amp: f64) {
        self.a = gain_amp.sqrt();
        self.g = (clamp_cutoff(cutoff) * std::f64::consts::PI).tan() * self.a.sqrt();
        self.k = 1.0 / q;
    }

    pub fn reset(&mut self) {
        self.ic1eq = 0.0;
        self.ic2eq = 0.0;
    }

    #[inline]
    pub fn process(&mut self, v0: f64) -> f64 {
        let v1 = (self.ic1eq + self.g * (v0 - self.ic2eq))
            / (1.0 + self.g * (self.g + self.k));
        let v2 = self.ic2eq + self.g * v1;

        self.ic1eq = 2.0 * v1 - self.ic1eq;
        self.ic2eq = 2.0 * v2 - self.ic2eq;

        let hp = v0 - self.k * v1 - v2;
        self.a * self.a * hp + self.a * self.k * v1 + v2
    }
}

/// Bilinear one-pole lowpass.
#[derive(Clone)]
pub struct Lp1 {
    bn: f64,
    a1: f64, // Negated.
    x1: f64,
    y1: f64,
}

impl Default for Lp1 {
    fn default() -> Self {
        let mut f = Self { bn: 1.0, a1: -1.0, x1: 0.0, y1: 0.0 };
        <Self as ChannelFilter>::set_cutoff(&mut f, 0.25, 0.0);
        f
    }
}

impl ChannelFilter for Lp1 {
    fn reset(&mut self) {
        self.x1 = 0.0;
        self.y1 = 0.0;
    }

    fn set_cutoff(&mut self, cutoff: f64, _q: f64) {
        let k = 1.0 / (std::f64::consts::PI * clamp_cutoff(cutoff)).tan();
        let a0 = 1.0 + k;
        self.bn = 1.0 / a0;
        self.a1 = (k - 1.0) / a0;
    }

    #[inline]
    fn process(&mut self, x0: f64) -> f64 {
        self.y1 = self.bn * (x0 + self.x1) + self.a1 * self.y1;
        self.x1 = x0;
        self.y1
    }
}

/// Bilinear one-pole highpass.
#[derive(Clone)]
pub struct Hp1 {
    b0: f64,
    a1: f64,
    x1: f64,
    y1: f64,
}

impl Default for Hp1 {
    fn default() -> Self {
        let mut f = Self { b0: 1.0, a1: 1.0, x1: 0.0, y1: 0.0 };
        <Self as ChannelFilter>::set_cutoff(&mut f, 0.25, 0.0);
        f
    }
}

impl ChannelFilter for Hp1 {
    fn reset(&mut self) {
        self.x1 = 0.0;
        self.y1 = 0.0;
    }

    fn set_cutoff(&mut self, cutoff: f64, _q: f64) {
        let k = 1.0 / (std::f64::consts::PI * clamp_cutoff(cutoff)).tan();
        let a0 = 1.0 + k;
        self.b0 = k / a0;
        self.a1 = (1.0 - k) / a0;
    }

    #[inline]
    fn process(&mut self, x0: f64) -> f64 {
        self.y1 = self.b0 * (x0 - self.x1) - self.a1 * self.y1;
        self.x1 = x0;
        self.y1
    }
}

/// First order allpass. Unity gain at all frequencies, phase only.
#[derive(Clone)]
pub struct Ap1 {
    a: f64,
    x1: f64,
    y1: f64,
}

impl Default for Ap1 {
    fn default() -> Self {
        let mut f = Self { a: 0.0, x1: 0.0, y1: 0.0 };
        <Self as ChannelFilter>::set_cutoff(&mut f, 0.25, 0.0);
        f
    }
}

impl ChannelFilter for Ap1 {
    fn reset(&mut self) {
        self.x1 = 0.0;
        self.y1 = 0.0;
    }

    fn set_cutoff(&mut self, cutoff: f64, _q: f64) {
        let k = (std::f64::consts::PI * cutoff.min(NYQUIST)).tan();
        self.a = (k - 1.0) / (k + 1.0);
    }

    #[inline]
    fn process(&mut self, x0: f64) -> f64 {
        self.y1 = self.a * (x0 - self.y1) + self.x1;
        self.x1 = x0;
        self.y1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn lowpass_passes_dc() {
        let mut svf = Svf::new(0.1, 0.7071);
        let mut y = 0.0;
        for _ in 0..10000 {
            y = svf.lp(1.0);
        }
        assert!((y - 1.0).abs() < 1e-6, "y={y}");
    }

    #[test]
    fn highpass_blocks_dc() {
        let mut svf = Svf::new(0.1, 0.7071);
        let mut y = 1.0;
        for _ in 0..10000 {
            y = svf.hp(1.0);
        }
        assert!(y.abs() < 1e-6, "y={y}");
    }

    #[test]
    fn bounded_output_under_noise_drive() {
        // BIBO check over a grid of cutoff/Q pairs.
        for &cutoff in &[MIN_CUTOFF, 0.001, 0.1, 0.25, NYQUIST] {
            for &q in &[0.1, 0.7071, 10.0] {
                let mut svf = Svf::new(cutoff, q);
                let mut rng = ChaCha8Rng::seed_from_u64(7);
                for _ in 0..100_000 {
                    let x = 2.0 * rng.random::<f64>() - 1.0;
                    let y = svf.lp(x);
                    assert!(
                        y.abs() < 10.0,
                        "unbounded at cutoff={cutoff} q={q}: y={y}"
                    );
                }
            }
        }
    }

    #[test]
    fn cutoff_is_clamped_not_rejected() {
        let mut svf = Svf::new(0.0, 1.0);
        assert!(svf.lp(1.0).is_finite());
        let mut svf = Svf::new(f64::NAN, 1.0);
        assert!(svf.lp(1.0).is_finite());
        let mut svf = Svf::new(10.0, 1.0);
        assert!(svf.lp(1.0).is_finite());
    }

    #[test]
    fn one_pole_pair_splits_dc() {
        let mut lp = Lp1::default();
        let mut hp = Hp1::default();
        ChannelFilter::set_cutoff(&mut lp, 0.05, 0.0);
        ChannelFilter::set_cutoff(&mut hp, 0.05, 0.0);
        let mut y_lp = 0.0;
        let mut y_hp = 1.0;
        for _ in 0..20000 {
            y_lp = lp.process(1.0);
            y_hp = hp.process(1.0);
        }
        assert!((y_lp - 1.0).abs() < 1e-9, "lp={y_lp}");
        assert!(y_hp.abs() < 1e-9, "hp={y_hp}");
    }

    #[test]
    fn allpass_preserves_energy_of_sine() {
        let mut ap = Ap1::default();
        ChannelFilter::set_cutoff(&mut ap, 0.1, 0.0);
        let freq = 0.05;
        let mut in_energy = 0.0;
        let mut out_energy = 0.0;
        // Skip the transient before accumulating.
        for i in 0..20000 {
            let x = (2.0 * std::f64::consts::PI * freq * i as f64).sin();
            let y = ap.process(x);
            if i >= 1000 {
                in_energy += x * x;
                out_energy += y * y;
            }
        }
        let ratio = out_energy / in_energy;
        assert!((ratio - 1.0).abs() < 0.01, "ratio={ratio}");
    }

    #[test]
    fn shelf_gain_at_dc() {
        let mut shelf = SvfLowShelf::new(0.1, 0.7071, 4.0);
        let mut y = 0.0;
        for _ in 0..20000 {
            y = shelf.process(1.0);
        }
        assert!((y - 4.0).abs() < 0.05, "y={y}");
    }
}
