//! Streaming sample extraction from a decoded buffer.
//!
//! The extractor owns the playback cursor. Each call to [`StreamingExtractor::extract`]
//! copies the next frames as interleaved stereo into a caller-owned block,
//! reports the elapsed time and advances the cursor by what it produced.

use std::sync::Arc;

use crossbeam_channel::Sender;

use super::types::{AudioData, AudioEvent};

/// Frames requested from the source per extraction.
pub const BUFFER_SIZE: usize = 8192;

pub struct StreamingExtractor {
    audio: Arc<AudioData>,
    /// Index of the next frame to read. Always within `0..=total_frames`.
    cursor: usize,
    events: Option<Sender<AudioEvent>>,
}

impl StreamingExtractor {
    pub fn new(audio: Arc<AudioData>) -> Self {
        Self {
            audio,
            cursor: 0,
            events: None,
        }
    }

    /// Report position changes on `events`.
    pub fn with_events(mut self, events: Sender<AudioEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn audio(&self) -> &Arc<AudioData> {
        &self.audio
    }

    pub fn total_frames(&self) -> usize {
        self.audio.num_frames()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Elapsed source time at the cursor, in seconds.
    pub fn position_secs(&self) -> f64 {
        if self.audio.sample_rate == 0 {
            return 0.0;
        }
        self.cursor as f64 / self.audio.sample_rate as f64
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.total_frames()
    }

    /// Copy up to `requested` frames into `target` as L0,R0,L1,R1,...
    ///
    /// Returns the number of frames written; `0` means end of stream.
    /// The position notification carries the cursor as it was before the copy.
    pub fn extract(&mut self, target: &mut [f32], requested: usize) -> usize {
        let total = self.total_frames();
        let start = self.cursor.min(total);
        self.notify(start);

        let frames = requested.min(total - start).min(target.len() / 2);
        if frames == 0 {
            return 0;
        }

        let left = &self.audio.channel(0)[start..start + frames];
        let right_index = if self.audio.num_channels() > 1 { 1 } else { 0 };
        let right = &self.audio.channel(right_index)[start..start + frames];

        for ((frame, &l), &r) in target.chunks_exact_mut(2).zip(left).zip(right) {
            frame[0] = l;
            frame[1] = r;
        }

        self.cursor = start + frames;
        frames
    }

    /// Move the cursor to `percent` of the track (0..=100).
    ///
    /// Out-of-range and non-finite values are clamped into the track.
    pub fn seek_percent(&mut self, percent: f64) {
        let percent = if percent.is_finite() {
            percent.clamp(0.0, 100.0)
        } else {
            0.0
        };
        let total = self.total_frames();
        let frame = (percent / 100.0 * total as f64).round() as usize;
        self.cursor = frame.min(total);
    }

    /// Move the cursor to an absolute frame, clamped to the track length.
    pub fn seek_frame(&mut self, frame: usize) {
        self.cursor = frame.min(self.total_frames());
    }

    fn notify(&self, cursor: usize) {
        let Some(tx) = &self.events else {
            return;
        };
        if self.audio.sample_rate == 0 {
            return;
        }
        let secs = cursor as f64 / self.audio.sample_rate as f64;
        // Never block the audio thread on a slow UI.
        let _ = tx.try_send(AudioEvent::PositionChanged(secs));
    }
}
