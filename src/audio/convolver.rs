//! Streaming convolution reverb.
//!
//! Uniformly partitioned overlap-save convolution: the kernel is cut into
//! blocks of `block` frames, each transformed once up front. Every time a
//! block of input has been collected its spectrum is pushed onto a frequency
//! domain delay line and multiplied against all kernel partitions. Latency is
//! one block.
//!
//! Kernel channel routing follows the usual convolver convention:
//! - 1 channel: the same kernel on left and right
//! - 2 channels: left through kernel 0, right through kernel 1
//! - 4 channels: true stereo, `L = inL*k0 + inR*k2`, `R = inL*k1 + inR*k3`

use std::fmt;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::types::ImpulseResponse;

/// Default partition size in frames.
pub const DEFAULT_BLOCK: usize = 1024;

/// Loudness calibration applied to normalized kernels (-58 dB).
const GAIN_CALIBRATION: f32 = 0.00125;
const GAIN_CALIBRATION_SAMPLE_RATE: f32 = 44100.0;
/// Floor for the kernel RMS so near-silent kernels don't explode.
const MIN_POWER: f32 = 0.000125;

const CHANNELS: usize = 2;

/// One input→output route through a transformed kernel channel.
struct Route {
    input: usize,
    output: usize,
    partitions: Vec<Vec<Complex<f32>>>,
}

pub struct Convolver {
    block: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    routes: Vec<Route>,
    num_partitions: usize,
    /// Last two input blocks per channel, oldest first.
    window: [Vec<f32>; CHANNELS],
    /// Input spectra per channel; `head` is the newest.
    delay_line: [Vec<Vec<Complex<f32>>>; CHANNELS],
    head: usize,
    /// Wet output for the block currently being collected.
    output: [Vec<f32>; CHANNELS],
    pos: usize,
    spectrum: Vec<Complex<f32>>,
    accum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl Convolver {
    /// Prepare `ir` for streaming. This allocates and runs FFTs, so call it
    /// off the audio thread.
    pub fn new(ir: &ImpulseResponse, block: usize, normalize: bool) -> Self {
        let block = block.max(1);
        let fft_len = block * 2;

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_len);
        let ifft = planner.plan_fft_inverse(fft_len);
        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(ifft.get_inplace_scratch_len());
        let mut scratch = vec![Complex::new(0.0, 0.0); scratch_len];

        // Fold the inverse FFT's missing 1/N into the kernel.
        let mut scale = 1.0 / fft_len as f32;
        if normalize {
            scale *= normalization_scale(ir);
        }

        let num_partitions = ir.len().div_ceil(block);
        let transform = |kernel: &[f32], scratch: &mut [Complex<f32>]| -> Vec<Vec<Complex<f32>>> {
            kernel
                .chunks(block)
                .map(|chunk| {
                    let mut buf = vec![Complex::new(0.0, 0.0); fft_len];
                    for (dst, &s) in buf.iter_mut().zip(chunk) {
                        *dst = Complex::new(s * scale, 0.0);
                    }
                    fft.process_with_scratch(&mut buf, scratch);
                    buf
                })
                .collect()
        };

        let layout: Vec<(usize, usize, usize)> = match ir.num_channels() {
            0 => Vec::new(),
            1 => vec![(0, 0, 0), (1, 1, 0)],
            4 => vec![(0, 0, 0), (0, 1, 1), (1, 0, 2), (1, 1, 3)],
            _ => vec![(0, 0, 0), (1, 1, 1)],
        };

        let routes = if num_partitions == 0 {
            Vec::new()
        } else {
            layout
                .into_iter()
                .map(|(input, output, kernel)| Route {
                    input,
                    output,
                    partitions: transform(&ir.channels[kernel], &mut scratch[..]),
                })
                .collect()
        };

        let zero = Complex::new(0.0, 0.0);
        Self {
            block,
            fft,
            ifft,
            routes,
            num_partitions,
            window: [vec![0.0; fft_len], vec![0.0; fft_len]],
            delay_line: [
                vec![vec![zero; fft_len]; num_partitions],
                vec![vec![zero; fft_len]; num_partitions],
            ],
            head: 0,
            output: [vec![0.0; block], vec![0.0; block]],
            pos: 0,
            spectrum: vec![zero; fft_len],
            accum: vec![zero; fft_len],
            scratch,
        }
    }

    /// Delay between input and wet output, in frames.
    pub fn latency(&self) -> usize {
        self.block
    }

    pub fn kernel_partitions(&self) -> usize {
        self.num_partitions
    }

    /// Frames of output still owed after the input stops: the kernel plus
    /// the latency block.
    pub fn tail_len(&self) -> usize {
        if self.routes.is_empty() {
            0
        } else {
            (self.num_partitions + 1) * self.block
        }
    }

    /// Forget all buffered input so no tail rings on.
    pub fn reset(&mut self) {
        let zero = Complex::new(0.0, 0.0);
        for c in 0..CHANNELS {
            self.window[c].fill(0.0);
            self.output[c].fill(0.0);
            for slot in &mut self.delay_line[c] {
                slot.fill(zero);
            }
        }
        self.head = 0;
        self.pos = 0;
    }

    /// Convolve interleaved stereo `input` into `output` (same length).
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        if self.routes.is_empty() {
            output.fill(0.0);
            return;
        }

        for (frame_in, frame_out) in input.chunks_exact(CHANNELS).zip(output.chunks_exact_mut(CHANNELS)) {
            for c in 0..CHANNELS {
                self.window[c][self.block + self.pos] = frame_in[c];
                frame_out[c] = self.output[c][self.pos];
            }
            self.pos += 1;
            if self.pos == self.block {
                self.process_block();
                self.pos = 0;
            }
        }
    }

    fn process_block(&mut self) {
        let zero = Complex::new(0.0, 0.0);
        let block = self.block;
        let parts = self.num_partitions;

        self.head = (self.head + parts - 1) % parts;
        for c in 0..CHANNELS {
            let slot = &mut self.delay_line[c][self.head];
            for (dst, &s) in slot.iter_mut().zip(&self.window[c]) {
                *dst = Complex::new(s, 0.0);
            }
            self.fft.process_with_scratch(slot, &mut self.scratch);
            self.window[c].copy_within(block.., 0);
        }

        for out in 0..CHANNELS {
            self.accum.fill(zero);
            let mut routed = false;
            for route in self.routes.iter().filter(|r| r.output == out) {
                routed = true;
                for (p, kernel) in route.partitions.iter().enumerate() {
                    let x = &self.delay_line[route.input][(self.head + p) % parts];
                    for ((acc, a), b) in self.accum.iter_mut().zip(x).zip(kernel) {
                        *acc += a * b;
                    }
                }
            }

            if !routed {
                self.output[out].fill(0.0);
                continue;
            }

            self.spectrum.copy_from_slice(&self.accum);
            self.ifft.process_with_scratch(&mut self.spectrum, &mut self.scratch);
            for (dst, src) in self.output[out].iter_mut().zip(&self.spectrum[block..]) {
                *dst = src.re;
            }
        }
    }
}

impl fmt::Debug for Convolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Convolver")
            .field("block", &self.block)
            .field("routes", &self.routes.len())
            .field("partitions", &self.num_partitions)
            .finish()
    }
}

/// Gain that brings a kernel to a loudness comparable to the dry signal.
pub fn normalization_scale(ir: &ImpulseResponse) -> f32 {
    let channels = ir.num_channels();
    let len = ir.len();
    if channels == 0 || len == 0 {
        return 1.0;
    }

    let sum: f32 = ir
        .channels
        .iter()
        .flat_map(|c| c.iter())
        .map(|s| s * s)
        .sum();
    let mut power = (sum / (channels * len) as f32).sqrt();
    if !power.is_finite() || power < MIN_POWER {
        power = MIN_POWER;
    }

    let mut scale = GAIN_CALIBRATION / power;
    if ir.sample_rate > 0 {
        scale *= GAIN_CALIBRATION_SAMPLE_RATE / ir.sample_rate as f32;
    }
    if channels == 4 {
        scale *= 0.5;
    }
    scale
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ir(channels: Vec<Vec<f32>>) -> ImpulseResponse {
        ImpulseResponse {
            channels,
            sample_rate: 44_100,
        }
    }

    fn stereo_ramp(frames: usize) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| {
                let s = (i % 97) as f32 / 97.0;
                [s, -s]
            })
            .collect()
    }

    #[test]
    fn test_unit_impulse_delays_by_one_block() {
        let mut conv = Convolver::new(&ir(vec![vec![1.0]]), 64, false);
        let input = stereo_ramp(400);
        let mut output = vec![0.0f32; input.len()];

        conv.process(&input, &mut output);

        let latency = conv.latency();
        for i in 0..400 {
            let (l, r) = (output[2 * i], output[2 * i + 1]);
            let (el, er) = if i < latency {
                (0.0, 0.0)
            } else {
                (input[2 * (i - latency)], input[2 * (i - latency) + 1])
            };
            assert!((l - el).abs() < 1e-4, "frame {i}: {l} vs {el}");
            assert!((r - er).abs() < 1e-4, "frame {i}: {r} vs {er}");
        }
    }

    #[test]
    fn test_long_kernel_spans_partitions() {
        // Single tap 150 frames in, three partitions of 64.
        let mut kernel = vec![0.0f32; 150];
        kernel[149] = 0.5;
        let mut conv = Convolver::new(&ir(vec![kernel]), 64, false);
        assert_eq!(conv.kernel_partitions(), 3);

        let mut input = vec![0.0f32; 2 * 512];
        input[0] = 1.0;
        input[1] = -1.0;
        let mut output = vec![0.0f32; input.len()];
        conv.process(&input, &mut output);

        let expected = 64 + 149;
        for i in 0..512 {
            let (el, er) = if i == expected { (0.5, -0.5) } else { (0.0, 0.0) };
            assert!((output[2 * i] - el).abs() < 1e-4, "frame {i}");
            assert!((output[2 * i + 1] - er).abs() < 1e-4, "frame {i}");
        }
    }

    #[test]
    fn test_quad_kernel_is_true_stereo() {
        // Only the left → right route is non-zero.
        let kernel = ir(vec![vec![0.0], vec![0.5], vec![0.0], vec![0.0]]);
        let mut conv = Convolver::new(&kernel, 32, false);
        let input: Vec<f32> = (0..128).flat_map(|_| [1.0, 0.25]).collect();
        let mut output = vec![0.0f32; input.len()];

        conv.process(&input, &mut output);

        for i in 32..128 {
            assert!(output[2 * i].abs() < 1e-4);
            assert!((output[2 * i + 1] - 0.5).abs() < 1e-4);
        }
    }

    #[test]
    fn test_stereo_kernel_keeps_sides_apart() {
        let kernel = ir(vec![vec![1.0], vec![0.0]]);
        let mut conv = Convolver::new(&kernel, 16, false);
        let input: Vec<f32> = (0..64).flat_map(|_| [0.5, 0.5]).collect();
        let mut output = vec![0.0f32; input.len()];

        conv.process(&input, &mut output);

        assert!((output[2 * 40] - 0.5).abs() < 1e-4);
        assert!(output[2 * 40 + 1].abs() < 1e-4);
    }

    #[test]
    fn test_reset_silences_tail() {
        let mut conv = Convolver::new(&ir(vec![vec![1.0; 200]]), 32, false);
        let input = vec![0.5f32; 2 * 128];
        let mut output = vec![0.0f32; input.len()];
        conv.process(&input, &mut output);

        conv.reset();
        let silence = vec![0.0f32; 2 * 256];
        let mut tail = vec![1.0f32; silence.len()];
        conv.process(&silence, &mut tail);
        assert!(tail.iter().all(|s| s.abs() < 1e-6));
    }

    #[test]
    fn test_tail_len_covers_ring_out() {
        let mut conv = Convolver::new(&ir(vec![vec![0.25; 150]]), 64, false);
        assert_eq!(conv.tail_len(), 256);

        let input = vec![1.0f32; 2 * 64];
        let mut output = vec![0.0f32; input.len()];
        conv.process(&input, &mut output);

        let tail = conv.tail_len();
        let silence = vec![0.0f32; 2 * (tail + 128)];
        let mut ring = vec![0.0f32; silence.len()];
        conv.process(&silence, &mut ring);

        assert!(ring[..2 * tail].iter().any(|s| s.abs() > 1e-3));
        assert!(ring[2 * tail..].iter().all(|s| s.abs() < 1e-4));
    }

    #[test]
    fn test_empty_kernel_outputs_silence() {
        let mut conv = Convolver::new(&ir(vec![Vec::new(), Vec::new()]), 32, true);
        assert_eq!(conv.tail_len(), 0);
        let input = vec![0.5f32; 2 * 64];
        let mut output = vec![1.0f32; input.len()];
        conv.process(&input, &mut output);
        assert!(output.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_normalization_scale() {
        let unit = ir(vec![vec![1.0]]);
        assert!((normalization_scale(&unit) - 0.00125).abs() < 1e-7);

        let quad = ir(vec![vec![1.0]; 4]);
        assert!((normalization_scale(&quad) - 0.000625).abs() < 1e-7);

        let silent = ir(vec![vec![0.0; 10]]);
        assert!((normalization_scale(&silent) - 0.00125 / MIN_POWER).abs() < 1e-3);

        let mut fast = unit.clone();
        fast.sample_rate = 88_200;
        assert!((normalization_scale(&fast) - 0.000625).abs() < 1e-7);
    }
}
