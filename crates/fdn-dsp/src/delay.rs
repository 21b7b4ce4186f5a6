//! Fixed-capacity delay lines with selectable read interpolation.
//!
//! Each line is a circular buffer; the write always lands before the read
//! for the same sample, so a zero-sample delay returns the current input
//! and every longer time is causal. Out-of-range and non-finite times are
//! clamped, never rejected: an offline render must always complete.

/// Delay line interface the network is generic over.
///
/// `set_time` may be called every sample; `process_mod` is the
/// set-then-read shorthand used by all time-modulated variants.
pub trait DelayLine {
    fn new(sample_rate: f64, max_seconds: f64) -> Self;
    fn reset(&mut self);
    fn set_time(&mut self, time_in_samples: f64);
    fn process(&mut self, input: f64) -> f64;

    #[inline]
    fn process_mod(&mut self, input: f64, time_in_samples: f64) -> f64 {
        self.set_time(time_in_samples);
        self.process(input)
    }
}

fn buffer_size(sample_rate: f64, max_seconds: f64, guard: usize) -> usize {
    assert!(
        sample_rate.is_finite() && sample_rate > 0.0,
        "delay line: sample rate must be positive, got {sample_rate}"
    );
    assert!(
        max_seconds.is_finite() && max_seconds >= 0.0,
        "delay line: max delay must be non-negative, got {max_seconds}"
    );
    ((sample_rate * max_seconds).ceil() as usize + guard).max(4)
}

fn sanitize_time(time_in_samples: f64) -> f64 {
    if time_in_samples.is_finite() {
        time_in_samples.max(0.0)
    } else {
        0.0
    }
}

/// Integer-sample delay. The fractional part of the requested time is
/// dropped.
pub struct IntDelay {
    buf: Vec<f64>,
    wptr: usize,
    time_int: usize,
}

impl DelayLine for IntDelay {
    fn new(sample_rate: f64, max_seconds: f64) -> Self {
        Self {
            buf: vec![0.0; buffer_size(sample_rate, max_seconds, 2)],
            wptr: 0,
            time_int: 0,
        }
    }

    fn reset(&mut self) {
        self.buf.fill(0.0);
    }

    fn set_time(&mut self, time_in_samples: f64) {
        let max = (self.buf.len() - 2) as f64;
        self.time_int = sanitize_time(time_in_samples).min(max) as usize;
    }

    fn process(&mut self, input: f64) -> f64 {
        self.buf[self.wptr] = input;
        let rptr = (self.wptr + self.buf.len() - self.time_int) % self.buf.len();
        self.wptr += 1;
        if self.wptr >= self.buf.len() {
            self.wptr = 0;
        }
        self.buf[rptr]
    }
}

/// Fractional delay with linear interpolation between adjacent samples.
pub struct LinearDelay {
    buf: Vec<f64>,
    wptr: usize,
    time_int: usize,
    fraction: f64,
}

impl DelayLine for LinearDelay {
    fn new(sample_rate: f64, max_seconds: f64) -> Self {
        Self {
            buf: vec![0.0; buffer_size(sample_rate, max_seconds, 2)],
            wptr: 0,
            time_int: 0,
            fraction: 0.0,
        }
    }

    fn reset(&mut self) {
        self.buf.fill(0.0);
    }

    fn set_time(&mut self, time_in_samples: f64) {
        let clamped = sanitize_time(time_in_samples).min((self.buf.len() - 2) as f64);
        self.time_int = clamped as usize;
        self.fraction = clamped - self.time_int as f64;
    }

    fn process(&mut self, input: f64) -> f64 {
        self.buf[self.wptr] = input;
        let len = self.buf.len();
        let rptr0 = (self.wptr + len - self.time_int) % len;
        let rptr1 = (rptr0 + len - 1) % len;
        self.wptr += 1;
        if self.wptr >= len {
            self.wptr = 0;
        }
        let s0 = self.buf[rptr0];
        let s1 = self.buf[rptr1];
        s0 + self.fraction * (s1 - s0)
    }
}

/// Fractional delay with third-order Lagrange interpolation over four
/// neighbors. Minimum effective delay is 1 sample.
pub struct CubicDelay {
    buf: Vec<f64>,
    wptr: usize,
    time_int: usize,
    fraction: f64,
}

impl DelayLine for CubicDelay {
    fn new(sample_rate: f64, max_seconds: f64) -> Self {
        Self {
            buf: vec![0.0; buffer_size(sample_rate, max_seconds, 4)],
            wptr: 0,
            time_int: 0,
            fraction: 0.0,
        }
    }

    fn reset(&mut self) {
        self.buf.fill(0.0);
    }

    fn set_time(&mut self, time_in_samples: f64) {
        let clamped =
            (sanitize_time(time_in_samples) - 1.0).clamp(0.0, (self.buf.len() - 4) as f64);
        self.time_int = clamped as usize;
        self.fraction = clamped - self.time_int as f64;
    }

    fn process(&mut self, input: f64) -> f64 {
        self.buf[self.wptr] = input;
        let len = self.buf.len();
        let rptr0 = (self.wptr + len - self.time_int) % len;
        let rptr1 = (rptr0 + len - 1) % len;
        let rptr2 = (rptr0 + len - 2) % len;
        let rptr3 = (rptr0 + len - 3) % len;
        self.wptr += 1;
        if self.wptr >= len {
            self.wptr = 0;
        }

        // 4-point, 3rd-order Lagrange between rptr1 and rptr2.
        let ym1 = self.buf[rptr0];
        let y0 = self.buf[rptr1];
        let y1 = self.buf[rptr2];
        let y2 = self.buf[rptr3];
        let u = self.fraction;

        let c0 = y0;
        let c1 = y1 - ym1 / 3.0 - y0 / 2.0 - y2 / 6.0;
        let c2 = (ym1 + y1) / 2.0 - y0;
        let c3 = (y2 - ym1) / 6.0 + (y0 - y1) / 2.0;
        ((c3 * u + c2) * u + c1) * u + c0
    }
}

/// Schroeder allpass built on an arbitrary-length delay.
///
/// Used as the input diffusion stage ahead of the network.
pub struct LongAllpass<D: DelayLine> {
    buffer: f64,
    gain: f64,
    delay: D,
}

impl<D: DelayLine> LongAllpass<D> {
    pub fn new(sample_rate: f64, max_seconds: f64) -> Self {
        Self {
            buffer: 0.0,
            gain: 0.0,
            delay: D::new(sample_rate, max_seconds),
        }
    }

    pub fn reset(&mut self) {
        self.buffer = 0.0;
        self.delay.reset();
    }

    /// `gain` in [0, 1].
    pub fn prepare(&mut self, time_in_samples: f64, gain: f64) {
        self.delay.set_time(time_in_samples);
        self.gain = gain;
    }

    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        let input = input - self.gain * self.buffer;
        let output = self.buffer + self.gain * input;
        self.buffer = self.delay.process(input);
        output
    }
}
