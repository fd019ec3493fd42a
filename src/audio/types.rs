use std::sync::Arc;

use super::convolver::Convolver;
use super::graph::Routing;

/// Decoded audio data stored entirely in memory, one sample vector per channel.
#[derive(Clone, Debug)]
pub struct AudioData {
    /// Planar samples normalized to [-1.0, 1.0]. All channels have the same length.
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
    /// Duration in seconds.
    pub duration: f64,
}

impl AudioData {
    /// Split interleaved samples into planar channels.
    pub fn from_interleaved(samples: &[f32], channels: usize, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        let num_frames = samples.len() / channels;
        let mut planar = vec![Vec::with_capacity(num_frames); channels];
        for frame in samples.chunks_exact(channels) {
            for (c, &s) in frame.iter().enumerate() {
                planar[c].push(s);
            }
        }
        Self::from_channels(planar, sample_rate)
    }

    pub fn from_channels(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        let num_frames = channels.first().map_or(0, Vec::len);
        let duration = if sample_rate > 0 {
            num_frames as f64 / sample_rate as f64
        } else {
            0.0
        };
        Self {
            channels,
            sample_rate,
            duration,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Total number of frames (samples per channel).
    pub fn num_frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// Fold to exactly two channels for playback. Mono is duplicated,
    /// anything wider keeps its first two channels.
    pub fn into_stereo(mut self) -> Self {
        match self.channels.len() {
            0 => {
                self.channels = vec![Vec::new(), Vec::new()];
            }
            1 => {
                let mono = self.channels[0].clone();
                self.channels.push(mono);
            }
            2 => {}
            _ => self.channels.truncate(2),
        }
        self
    }
}

/// A convolution kernel: 1, 2 or 4 planar channels of equal length.
#[derive(Clone, Debug)]
pub struct ImpulseResponse {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl ImpulseResponse {
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Kernel length in frames.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Commands sent from the UI thread to the audio thread.
#[derive(Debug)]
pub enum AudioCommand {
    /// Start a new session. Any previous session is torn down first.
    LoadAudio(Arc<AudioData>),
    Play,
    Pause,
    Stop,
    /// Jump to a percentage (0..=100) of the track.
    SeekPercent(f64),
    SetTempo(f32),
    SetPitch(f32),
    SetVolume(f32),
    SetWetGain(f32),
    /// Replace the reverb kernel. The convolver is fully prepared off the audio thread.
    SetConvolver(Box<Convolver>),
    SetRouting(Routing),
}

/// Events sent from the audio thread to the UI thread.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    /// Elapsed source time in seconds.
    PositionChanged(f64),
    PlaybackFinished,
    Error(String),
}

/// Current playback status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackStatus {
    Stopped,
    Playing,
    Paused,
}
