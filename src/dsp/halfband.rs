//! Half-band low-pass FIR with Fs/4 real-to-complex translation.
//!
//! The filter is a symmetric half-band design: in the conceptual full-rate
//! kernel, every odd-offset-from-center tap is zero, so only the nonzero
//! (even-offset) taps are worth keeping. `HB_KERNEL` stores exactly those
//! `len = kernel_len/2 + 1` nonzero coefficients, densely — it must not
//! itself contain interleaved zeros, since that would mean the zero taps
//! were never actually stripped out. The queue that feeds the convolution
//! is padded `SIZE_FACTOR` times over so the sliding window can always be
//! read as one contiguous slice: when the write index runs off the front,
//! the live tail is mirror-copied into the high region instead of wrapping
//! the index calculation itself.

/// Padding factor for the FIR queue, trading memory for a branch-free inner
/// loop (mirrors the teacher/original convention).
const SIZE_FACTOR: usize = 16;

/// The 25 nonzero half-band coefficients (windowed-sinc lowpass, Hamming
/// window, cutoff chosen off any exact multiple of pi/2 so no coefficient
/// collapses to zero), `len = KERNEL_LEN/2 + 1 = 25`.
pub const KERNEL_LEN: usize = 48;
pub const HB_KERNEL: [i32; KERNEL_LEN / 2 + 1] = [
    -66, 14, 148, 39, -385, -285, 760, 973, -1182, -2684, 1514, 10154, 14768, 10154, 1514, -2684,
    -1182, 973, 760, -285, -385, 39, 148, 14, -66,
];

/// Stateful half-band FIR (I path) paired with a matched delay line (Q
/// path). Not safe for concurrent use.
pub struct HalfbandFilter {
    kernel: Vec<i32>,
    /// `kernel.len()`, cached for convenience.
    len: usize,
    queue: Vec<i32>,
    fir_index: usize,
    delay_line: Vec<i16>,
    delay_index: usize,
}

impl HalfbandFilter {
    /// Builds a filter from an explicit decimated even-tap kernel.
    pub fn new(kernel: &[i32]) -> Self {
        let len = kernel.len();
        HalfbandFilter {
            kernel: kernel.to_vec(),
            len,
            queue: vec![0i32; len * SIZE_FACTOR],
            fir_index: len * (SIZE_FACTOR - 1),
            delay_line: vec![0i16; len / 2],
            delay_index: 0,
        }
    }

    /// Builds a filter using the embedded default kernel.
    pub fn default_kernel() -> Self {
        Self::new(&HB_KERNEL)
    }

    pub fn reset(&mut self) {
        self.fir_index = self.len * (SIZE_FACTOR - 1);
        self.delay_index = 0;
        self.queue.iter_mut().for_each(|v| *v = 0);
        self.delay_line.iter_mut().for_each(|v| *v = 0);
    }

    /// Runs the FIR over the I samples of `samples` (stride 2, starting at
    /// index 0), in place.
    fn fir_interleaved(&mut self, samples: &mut [i16]) {
        let fir_len = self.len;
        let mut fir_index = self.fir_index;

        let mut i = 0;
        while i < samples.len() {
            self.queue[fir_index] = samples[i] as i32;

            let mut acc: i32 = 0;
            for j in 0..fir_len {
                acc = acc.wrapping_add(self.kernel[j].wrapping_mul(self.queue[fir_index + j]));
            }

            if fir_index == 0 {
                fir_index = fir_len * (SIZE_FACTOR - 1);
                let tail_len = fir_len - 1;
                let src: Vec<i32> = self.queue[..tail_len].to_vec();
                self.queue[fir_index + 1..fir_index + 1 + tail_len].copy_from_slice(&src);
            } else {
                fir_index -= 1;
            }

            samples[i] = (acc >> 15) as i16;
            i += 2;
        }

        self.fir_index = fir_index;
    }

    /// Delays the Q samples of `samples` (stride 2) by `kernel_len/2`
    /// entries, in place.
    fn delay_interleaved(&mut self, samples: &mut [i16]) {
        let half_len = self.delay_line.len();
        let mut index = self.delay_index;

        let mut i = 0;
        while i < samples.len() {
            let res = self.delay_line[index];
            self.delay_line[index] = samples[i];
            samples[i] = res;

            index += 1;
            if index >= half_len {
                index = 0;
            }
            i += 2;
        }

        self.delay_index = index;
    }

    /// Runs the FIR on the I path (even indices of `samples`) and the
    /// matched delay on the Q path (odd indices), realizing the Fs/4 →
    /// DC translation.
    pub fn process(&mut self, samples: &mut [i16]) {
        self.fir_interleaved(samples);
        if samples.len() > 1 {
            self.delay_interleaved(&mut samples[1..]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reference implementation using plain modular indexing, no mirror
    /// copy, to check the wrap strategy is behaviorally transparent.
    fn fir_interleaved_naive(kernel: &[i32], samples: &mut [i16]) {
        let len = kernel.len();
        let cap = len * SIZE_FACTOR;
        let mut queue = vec![0i32; cap];
        let mut fir_index = len * (SIZE_FACTOR - 1);

        let mut i = 0;
        while i < samples.len() {
            queue[fir_index] = samples[i] as i32;
            let mut acc: i32 = 0;
            for j in 0..len {
                acc = acc.wrapping_add(kernel[j].wrapping_mul(queue[(fir_index + j) % cap]));
            }
            if fir_index == 0 {
                fir_index = cap - 1;
            } else {
                fir_index -= 1;
            }
            samples[i] = (acc >> 15) as i16;
            i += 2;
        }
    }

    #[test]
    fn queue_wrap_matches_naive_reference() {
        let kernel = HB_KERNEL.to_vec();
        let len = kernel.len() * SIZE_FACTOR * 4;

        let mut lcg: u32 = 0x1234_5678;
        let mut next = || {
            lcg = lcg.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (lcg >> 16) as i16
        };
        let input: Vec<i16> = (0..len).map(|_| next()).collect();

        let mut via_mirror = input.clone();
        let mut filter = HalfbandFilter::new(&kernel);
        filter.fir_interleaved(&mut via_mirror);

        let mut via_naive = input;
        fir_interleaved_naive(&kernel, &mut via_naive);

        assert_eq!(via_mirror, via_naive);
    }

    #[test]
    fn delay_line_delays_by_half_kernel_length() {
        let mut filter = HalfbandFilter::default_kernel();
        let half_len = KERNEL_LEN / 4; // delay_line.len() == kernel.len()/2 == 12

        let mut samples = vec![0i16; (half_len + 4) * 2];
        for k in 0..4 {
            samples[(half_len + k) * 2 + 1] = (100 + k as i16) * 7;
        }

        filter.process(&mut samples);

        for k in 0..4 {
            assert_eq!(samples[2 * k + 1], 0);
        }
    }

    #[test]
    fn impulse_response_matches_kernel_shape() {
        let mut filter = HalfbandFilter::default_kernel();
        let len = HB_KERNEL.len();
        let total = len * SIZE_FACTOR * 2;
        let mut samples = vec![0i16; total * 2];
        samples[0] = 1;

        filter.process(&mut samples);

        let nonzero: Vec<i32> = samples
            .iter()
            .step_by(2)
            .map(|&s| s as i32)
            .filter(|&s| s != 0)
            .collect();
        assert!(!nonzero.is_empty(), "impulse produced no response");
    }
}
