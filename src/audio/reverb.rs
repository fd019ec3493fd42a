//! Synthetic reverb kernels.
//!
//! A kernel is uniform noise shaped by the envelope `(1 - i/len)^decay`,
//! which approximates the tail of a diffuse room.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::types::{AudioData, ImpulseResponse};
use crate::error::{AudioError, AudioResult};

/// Supported kernel layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum KernelChannels {
    Mono,
    /// Two channels carrying the same noise.
    Stereo,
    /// Four independent channels, routed as true stereo by the convolver.
    Quad,
}

impl KernelChannels {
    pub const ALL: [KernelChannels; 3] = [Self::Mono, Self::Stereo, Self::Quad];

    pub fn count(self) -> usize {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
            Self::Quad => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Mono => "Mono",
            Self::Stereo => "Stereo",
            Self::Quad => "Quad",
        }
    }
}

impl TryFrom<u32> for KernelChannels {
    type Error = AudioError;

    fn try_from(count: u32) -> Result<Self, Self::Error> {
        match count {
            1 => Ok(Self::Mono),
            2 => Ok(Self::Stereo),
            4 => Ok(Self::Quad),
            n => Err(AudioError::InvalidParameter(format!(
                "kernel channel count must be 1, 2 or 4, got {n}"
            ))),
        }
    }
}

impl From<KernelChannels> for u32 {
    fn from(channels: KernelChannels) -> u32 {
        channels.count() as u32
    }
}

/// Shape of a generated kernel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelParams {
    pub duration_secs: f64,
    /// Exponent of the decay envelope. Larger values die away faster.
    pub decay: f64,
    pub channels: KernelChannels,
}

impl Default for KernelParams {
    fn default() -> Self {
        Self {
            duration_secs: 3.0,
            decay: 2.0,
            channels: KernelChannels::Stereo,
        }
    }
}

/// Generate a kernel from a raw channel count. Anything but 1, 2 or 4 is rejected.
pub fn generate_kernel_with_count<R: Rng>(
    duration_secs: f64,
    decay: f64,
    channel_count: u32,
    sample_rate: u32,
    rng: &mut R,
) -> AudioResult<ImpulseResponse> {
    let params = KernelParams {
        duration_secs,
        decay,
        channels: KernelChannels::try_from(channel_count)?,
    };
    generate_kernel(&params, sample_rate, rng)
}

/// Generate a kernel with a fixed seed, or from entropy when `seed` is `None`.
pub fn generate_seeded(
    params: &KernelParams,
    sample_rate: u32,
    seed: Option<u64>,
) -> AudioResult<ImpulseResponse> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    generate_kernel(params, sample_rate, &mut rng)
}

pub fn generate_kernel<R: Rng>(
    params: &KernelParams,
    sample_rate: u32,
    rng: &mut R,
) -> AudioResult<ImpulseResponse> {
    if sample_rate == 0 {
        return Err(AudioError::InvalidParameter("sample rate must be positive".into()));
    }
    if !params.duration_secs.is_finite() || params.duration_secs < 0.0 {
        return Err(AudioError::InvalidParameter(format!(
            "kernel duration must be a non-negative number of seconds, got {}",
            params.duration_secs
        )));
    }
    if !params.decay.is_finite() || params.decay < 0.0 {
        return Err(AudioError::InvalidParameter(format!(
            "decay exponent must be non-negative, got {}",
            params.decay
        )));
    }

    let len = (sample_rate as f64 * params.duration_secs).round() as usize;
    let envelope = |i: usize| (1.0 - i as f64 / len as f64).powf(params.decay);
    let mut draw = |i: usize| (rng.gen_range(-1.0f64..1.0) * envelope(i)) as f32;

    let channels: Vec<Vec<f32>> = match params.channels {
        KernelChannels::Mono => vec![(0..len).map(&mut draw).collect()],
        KernelChannels::Stereo => {
            let shared: Vec<f32> = (0..len).map(&mut draw).collect();
            vec![shared.clone(), shared]
        }
        KernelChannels::Quad => (0..4)
            .map(|_| (0..len).map(&mut draw).collect::<Vec<f32>>())
            .collect(),
    };

    log::info!(
        "Generated {} kernel: {:.2}s, decay {:.2}, {} frames",
        params.channels.label(),
        params.duration_secs,
        params.decay,
        len
    );

    Ok(ImpulseResponse {
        channels,
        sample_rate,
    })
}

/// Use a decoded recording as a kernel. 1, 2 and 4 channel files keep their
/// layout; anything else is folded to stereo.
pub fn impulse_response_from_audio(data: AudioData) -> ImpulseResponse {
    let data = match data.num_channels() {
        1 | 2 | 4 => data,
        _ => data.into_stereo(),
    };
    ImpulseResponse {
        channels: data.channels,
        sample_rate: data.sample_rate,
    }
}
