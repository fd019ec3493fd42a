//! Player configuration, loaded from YAML.
//!
//! Missing or invalid files fall back to defaults; the player never refuses
//! to start because of its config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audio::convolver::DEFAULT_BLOCK;
use crate::audio::extractor::BUFFER_SIZE;
use crate::audio::reverb::{KernelChannels, KernelParams};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbConfig {
    pub duration_secs: f64,
    pub decay: f64,
    pub channels: KernelChannels,
    /// Scale kernels to a loudness comparable to the dry signal.
    pub normalize: bool,
    /// Fixed seed for kernel noise. `None` draws a fresh kernel every time.
    pub seed: Option<u64>,
}

impl Default for ReverbConfig {
    fn default() -> Self {
        let params = KernelParams::default();
        Self {
            duration_secs: params.duration_secs,
            decay: params.decay,
            channels: params.channels,
            normalize: true,
            seed: None,
        }
    }
}

impl ReverbConfig {
    pub fn kernel_params(&self) -> KernelParams {
        KernelParams {
            duration_secs: self.duration_secs,
            decay: self.decay,
            channels: self.channels,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Source frames pulled per extraction.
    pub block_frames: usize,
    /// Partition size of the reverb convolver.
    pub convolution_block: usize,
    pub tempo: f32,
    pub pitch: f32,
    pub volume: f32,
    pub wet_gain: f32,
    pub reverb: ReverbConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            block_frames: BUFFER_SIZE,
            convolution_block: DEFAULT_BLOCK,
            tempo: 1.0,
            pitch: 1.0,
            volume: 0.5,
            wet_gain: 0.6,
            reverb: ReverbConfig::default(),
        }
    }
}

/// `<config dir>/stretchverb/config.yaml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("stretchverb").join("config.yaml"))
}

/// Load the config at `path`, or defaults if it is missing or unreadable.
pub fn load_config(path: &Path) -> PlayerConfig {
    if !path.exists() {
        log::info!("No config at {:?}, using defaults", path);
        return PlayerConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => parse_config(&contents).unwrap_or_else(|e| {
            log::warn!("Failed to parse config {:?}: {}, using defaults", path, e);
            PlayerConfig::default()
        }),
        Err(e) => {
            log::warn!("Failed to read config {:?}: {}, using defaults", path, e);
            PlayerConfig::default()
        }
    }
}

pub fn parse_config(contents: &str) -> Result<PlayerConfig, serde_yaml::Error> {
    serde_yaml::from_str(contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlayerConfig::default();
        assert_eq!(config.block_frames, 8192);
        assert_eq!(config.volume, 0.5);
        assert_eq!(config.wet_gain, 0.6);
        assert_eq!(config.reverb.channels, KernelChannels::Stereo);
        assert!(config.reverb.normalize);
        assert_eq!(config.reverb.seed, None);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = parse_config("tempo: 1.5\nreverb:\n  channels: 4\n  seed: 9\n").unwrap();
        assert_eq!(config.tempo, 1.5);
        assert_eq!(config.pitch, 1.0);
        assert_eq!(config.reverb.channels, KernelChannels::Quad);
        assert_eq!(config.reverb.seed, Some(9));
        assert_eq!(config.reverb.decay, 2.0);
    }

    #[test]
    fn test_reverb_section_becomes_kernel_params() {
        let config = parse_config("reverb:\n  duration_secs: 1.5\n  decay: 4.0\n  channels: 1\n").unwrap();
        assert_eq!(
            config.reverb.kernel_params(),
            KernelParams {
                duration_secs: 1.5,
                decay: 4.0,
                channels: KernelChannels::Mono,
            }
        );
    }

    #[test]
    fn test_bad_channel_count_is_rejected() {
        assert!(parse_config("reverb:\n  channels: 3\n").is_err());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = load_config(Path::new("/nonexistent/stretchverb.yaml"));
        assert_eq!(config, PlayerConfig::default());
    }
}
