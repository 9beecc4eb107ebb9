/// IIR low-pass filtering
///
/// Butterworth low-pass built from cascaded second-order sections (bilinear
/// transform with frequency pre-warping), plus a zero-phase forward-backward
/// pass with odd-extension edge padding and steady-state initial conditions.

use std::f64::consts::PI;

/// Second-order section in transposed direct form II
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Biquad {
    /// Low-pass section with quality factor `q`
    pub fn lowpass(cutoff_hz: f64, sample_rate: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * cutoff_hz / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);

        let a0 = 1.0 + alpha;
        let b1 = (1.0 - cos_w0) / a0;

        Self {
            b0: b1 / 2.0,
            b1,
            b2: b1 / 2.0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// Gain at 0 Hz
    pub fn dc_gain(&self) -> f64 {
        (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2)
    }

    /// State reached after an infinitely long constant input of `x0`
    fn steady_state(&self, x0: f64) -> [f64; 2] {
        let y = self.dc_gain() * x0;
        let z2 = self.b2 * x0 - self.a2 * y;
        let z1 = self.b1 * x0 - self.a1 * y + z2;
        [z1, z2]
    }

    fn run(&self, signal: &mut [f64], mut state: [f64; 2]) {
        for x in signal.iter_mut() {
            let input = *x;
            let y = self.b0 * input + state[0];
            state[0] = self.b1 * input - self.a1 * y + state[1];
            state[1] = self.b2 * input - self.a2 * y;
            *x = y;
        }
    }
}

/// Even-order Butterworth low-pass as a cascade of biquads
#[derive(Debug, Clone, PartialEq)]
pub struct ButterworthLowpass {
    sections: Vec<Biquad>,
}

impl ButterworthLowpass {
    /// `order` is rounded up to the next even number. The cutoff is clamped
    /// just below Nyquist.
    pub fn new(order: usize, cutoff_hz: f64, sample_rate: u32) -> Self {
        let sample_rate = sample_rate as f64;
        let cutoff = cutoff_hz.clamp(1.0, 0.499 * sample_rate);
        let pairs = order.max(2).div_ceil(2);
        let n = (pairs * 2) as f64;

        let sections = (0..pairs)
            .map(|k| {
                let theta = (2 * k + 1) as f64 * PI / (2.0 * n);
                let q = 1.0 / (2.0 * theta.cos());
                Biquad::lowpass(cutoff, sample_rate, q)
            })
            .collect();

        Self { sections }
    }

    pub fn order(&self) -> usize {
        self.sections.len() * 2
    }

    /// Causal single pass from rest
    pub fn filter(&self, samples: &[f32]) -> Vec<f32> {
        let mut signal: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
        for section in &self.sections {
            section.run(&mut signal, [0.0, 0.0]);
        }
        signal.into_iter().map(|s| s as f32).collect()
    }

    /// Zero-phase forward-backward filtering
    pub fn filtfilt(&self, samples: &[f32]) -> Vec<f32> {
        let n = samples.len();
        if n < 2 {
            return samples.to_vec();
        }

        let pad = (3 * (self.order() + 1)).min(n - 1);
        let first = samples[0] as f64;
        let last = samples[n - 1] as f64;

        let mut signal = Vec::with_capacity(n + 2 * pad);
        signal.extend((1..=pad).rev().map(|i| 2.0 * first - samples[i] as f64));
        signal.extend(samples.iter().map(|&s| s as f64));
        signal.extend((1..=pad).map(|i| 2.0 * last - samples[n - 1 - i] as f64));

        self.run_with_steady_state(&mut signal);
        signal.reverse();
        self.run_with_steady_state(&mut signal);
        signal.reverse();

        signal[pad..pad + n].iter().map(|&s| s as f32).collect()
    }

    fn run_with_steady_state(&self, signal: &mut [f64]) {
        let mut x0 = signal.first().copied().unwrap_or(0.0);
        for section in &self.sections {
            section.run(signal, section.steady_state(x0));
            x0 *= section.dc_gain();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_unity_dc_gain() {
        let filter = ButterworthLowpass::new(4, 2000.0, 16000);
        assert_eq!(filter.order(), 4);
        for section in &filter.sections {
            assert_relative_eq!(section.dc_gain(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_constant_signal_passes_unchanged() {
        let filter = ButterworthLowpass::new(4, 3000.0, 16000);
        let out = filter.filtfilt(&vec![0.5; 400]);
        for s in out {
            assert_relative_eq!(s, 0.5, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_passband_and_stopband() {
        let filter = ButterworthLowpass::new(4, 2000.0, 16000);

        let low = filter.filtfilt(&sine(300.0, 16000, 4000));
        let high = filter.filtfilt(&sine(6000.0, 16000, 4000));

        assert!(rms(&low) > 0.65);
        assert!(rms(&high[200..3800]) < 1e-3);
    }

    #[test]
    fn test_stopband_edges_stay_bounded() {
        let filter = ButterworthLowpass::new(4, 2000.0, 16000);
        let input = sine(6000.0, 16000, 4000);
        let high = filter.filtfilt(&input);

        // odd extension anchors the output to the edge samples
        assert_relative_eq!(high[3999], input[3999], epsilon = 1e-3);
        assert!(high.iter().all(|s| s.abs() <= 1.0));
        assert!(rms(&high[..200]) < 0.05);
    }

    #[test]
    fn test_filtfilt_preserves_length() {
        let filter = ButterworthLowpass::new(4, 2000.0, 16000);
        assert_eq!(filter.filtfilt(&[0.1, 0.2, 0.3]).len(), 3);
        assert_eq!(filter.filtfilt(&[0.1]), vec![0.1]);
        assert!(filter.filtfilt(&[]).is_empty());
        assert_eq!(filter.filter(&[0.0; 10]).len(), 10);
    }
}
