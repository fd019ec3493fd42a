use soundtouch::SoundTouch;

use super::extractor::StreamingExtractor;

/// Wrapper around SoundTouch for independent tempo and pitch changes.
pub struct Stretcher {
    st: SoundTouch,
    channels: u16,
    tempo: f32,
    pitch: f32,
}

impl Stretcher {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        let mut st = SoundTouch::new();
        st.set_sample_rate(sample_rate);
        st.set_channels(channels as u32);
        st.set_tempo(1.0);
        st.set_pitch(1.0);
        Stretcher {
            st,
            channels,
            tempo: 1.0,
            pitch: 1.0,
        }
    }

    pub fn tempo(&self) -> f32 {
        self.tempo
    }

    pub fn set_tempo(&mut self, tempo: f32) {
        self.tempo = tempo;
        self.st.set_tempo(tempo as f64);
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    pub fn set_pitch(&mut self, pitch: f32) {
        self.pitch = pitch;
        self.st.set_pitch(pitch as f64);
    }

    /// Playback rate change applied on top of tempo and pitch. Used to
    /// compensate a source sample rate that differs from the device rate.
    pub fn set_rate(&mut self, rate: f64) {
        self.st.set_rate(rate);
    }

    /// Feed interleaved input samples into SoundTouch.
    pub fn put_samples(&mut self, samples: &[f32]) {
        self.st
            .put_samples(samples, samples.len() / self.channels as usize);
    }

    /// Receive processed samples from SoundTouch.
    /// Returns the number of samples written (total, not per channel).
    pub fn receive_samples(&mut self, output: &mut [f32]) -> usize {
        let max_frames = output.len() / self.channels as usize;
        let received_frames = self.st.receive_samples(output, max_frames);
        received_frames * self.channels as usize
    }

    /// Flush remaining samples through the processor.
    pub fn flush(&mut self) {
        self.st.flush();
    }

    /// Clear all buffered data (use when seeking).
    pub fn clear(&mut self) {
        self.st.clear();
    }
}

/// Stretch stage that pulls source frames from a [`StreamingExtractor`] at
/// whatever pace the current tempo, pitch and rate demand.
pub struct StretchFilter {
    stretcher: Stretcher,
    extractor: StreamingExtractor,
    /// Interleaved stereo scratch block, allocated once per session.
    block: Vec<f32>,
    block_frames: usize,
    /// Set once the source is exhausted and the stretcher tail has been flushed.
    flushed: bool,
}

impl StretchFilter {
    /// `output_sample_rate` is the rate the produced frames are played at.
    pub fn new(extractor: StreamingExtractor, output_sample_rate: u32, block_frames: usize) -> Self {
        let source_rate = extractor.audio().sample_rate;
        let mut stretcher = Stretcher::new(source_rate, 2);
        if output_sample_rate > 0 && source_rate != output_sample_rate {
            stretcher.set_rate(source_rate as f64 / output_sample_rate as f64);
        }
        let block_frames = block_frames.max(1);
        Self {
            stretcher,
            extractor,
            block: vec![0.0; block_frames * 2],
            block_frames,
            flushed: false,
        }
    }

    pub fn extractor(&self) -> &StreamingExtractor {
        &self.extractor
    }

    pub fn tempo(&self) -> f32 {
        self.stretcher.tempo()
    }

    pub fn set_tempo(&mut self, tempo: f32) {
        self.stretcher.set_tempo(tempo);
    }

    pub fn pitch(&self) -> f32 {
        self.stretcher.pitch()
    }

    pub fn set_pitch(&mut self, pitch: f32) {
        self.stretcher.set_pitch(pitch);
    }

    /// Jump to `percent` of the source and drop everything buffered.
    pub fn seek_percent(&mut self, percent: f64) {
        self.extractor.seek_percent(percent);
        self.restart();
    }

    /// Back to the first frame with an empty pipeline.
    pub fn rewind(&mut self) {
        self.extractor.seek_frame(0);
        self.restart();
    }

    fn restart(&mut self) {
        self.stretcher.clear();
        self.flushed = false;
    }

    /// Fill `target` with up to `frames` processed interleaved stereo frames.
    ///
    /// Returns the number of frames written; `0` means end of stream.
    pub fn extract(&mut self, target: &mut [f32], frames: usize) -> usize {
        let frames = frames.min(target.len() / 2);
        let mut produced = 0;

        while produced < frames {
            let got = self
                .stretcher
                .receive_samples(&mut target[produced * 2..frames * 2])
                / 2;
            if got > 0 {
                produced += got;
                continue;
            }

            if self.flushed {
                break;
            }

            let read = self.extractor.extract(&mut self.block, self.block_frames);
            if read == 0 {
                self.stretcher.flush();
                self.flushed = true;
                continue;
            }
            self.stretcher.put_samples(&self.block[..read * 2]);
        }

        produced
    }
}
