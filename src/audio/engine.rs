use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

use super::convolver::Convolver;
use super::extractor::StreamingExtractor;
use super::graph::OutputGraph;
use super::stretcher::StretchFilter;
use super::types::{AudioCommand, AudioEvent};
use crate::config::PlayerConfig;
use crate::error::{AudioError, AudioResult};

/// Stereo frames the mix scratch is sized for before it has to grow.
const MAX_CALLBACK_FRAMES: usize = 4096;
/// Retired buffers the UI may fall behind on before the audio thread frees
/// them itself.
const RETIRED_CAPACITY: usize = 16;

/// Buffers the audio thread has let go of. They are handed back over a
/// channel so the UI thread does the freeing.
pub enum Retired {
    Session(StretchFilter),
    Convolver(Box<Convolver>),
}

/// Channels and device info handed back to the UI.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    pub commands: Sender<AudioCommand>,
    pub events: Receiver<AudioEvent>,
    /// Drain and drop these off the audio thread.
    pub retired: Receiver<Retired>,
    /// Output device rate; kernels are generated at this rate.
    pub sample_rate: u32,
}

struct EngineState {
    /// The current playback session, if a file is loaded.
    session: Option<StretchFilter>,
    graph: OutputGraph,
    playing: bool,
    tempo: f32,
    pitch: f32,
    output_sample_rate: u32,
    block_frames: usize,
    events: Sender<AudioEvent>,
    retired: Sender<Retired>,
    /// Interleaved stereo mix buffer.
    mix: Vec<f32>,
    /// Frames of reverb tail still to render after the stream ended.
    ringing: usize,
}

impl EngineState {
    fn new(
        output_sample_rate: u32,
        config: &PlayerConfig,
        events: Sender<AudioEvent>,
        retired: Sender<Retired>,
    ) -> Self {
        Self {
            session: None,
            graph: OutputGraph::new(config.volume, config.wet_gain, MAX_CALLBACK_FRAMES * 2),
            playing: false,
            tempo: config.tempo,
            pitch: config.pitch,
            output_sample_rate,
            block_frames: config.block_frames,
            events,
            retired,
            mix: vec![0.0; MAX_CALLBACK_FRAMES * 2],
            ringing: 0,
        }
    }

    fn notify(&self, event: AudioEvent) {
        let _ = self.events.try_send(event);
    }

    /// Hand `item` to the UI thread. If the queue is full it is freed here.
    fn retire(&self, item: Retired) {
        let _ = self.retired.try_send(item);
    }

    fn stop_ringing(&mut self) {
        self.ringing = 0;
        self.graph.reset();
    }

    fn handle_command(&mut self, cmd: AudioCommand) {
        match cmd {
            AudioCommand::LoadAudio(data) => {
                // Tear the old session down completely before the new one exists.
                self.playing = false;
                if let Some(old) = self.session.take() {
                    self.retire(Retired::Session(old));
                }
                self.stop_ringing();

                let extractor = StreamingExtractor::new(data).with_events(self.events.clone());
                let mut filter =
                    StretchFilter::new(extractor, self.output_sample_rate, self.block_frames);
                filter.set_tempo(self.tempo);
                filter.set_pitch(self.pitch);
                self.session = Some(filter);
                self.notify(AudioEvent::PositionChanged(0.0));
            }
            AudioCommand::Play => {
                if self.session.is_some() && !self.playing {
                    if self.ringing > 0 {
                        self.stop_ringing();
                    }
                    self.playing = true;
                }
            }
            AudioCommand::Pause => {
                self.playing = false;
            }
            AudioCommand::Stop => {
                self.playing = false;
                if let Some(s) = &mut self.session {
                    s.rewind();
                }
                self.stop_ringing();
                self.notify(AudioEvent::PositionChanged(0.0));
            }
            AudioCommand::SeekPercent(percent) => {
                if let Some(s) = &mut self.session {
                    s.seek_percent(percent);
                    let pos_secs = s.extractor().position_secs();
                    self.notify(AudioEvent::PositionChanged(pos_secs));
                }
            }
            AudioCommand::SetTempo(tempo) => {
                self.tempo = tempo;
                if let Some(s) = &mut self.session {
                    s.set_tempo(tempo);
                }
            }
            AudioCommand::SetPitch(pitch) => {
                self.pitch = pitch;
                if let Some(s) = &mut self.session {
                    s.set_pitch(pitch);
                }
            }
            AudioCommand::SetVolume(volume) => self.graph.set_volume(volume),
            AudioCommand::SetWetGain(gain) => self.graph.set_wet_gain(gain),
            AudioCommand::SetConvolver(convolver) => {
                if let Some(old) = self.graph.set_convolver(convolver) {
                    self.retire(Retired::Convolver(old));
                }
            }
            AudioCommand::SetRouting(routing) => self.graph.apply_routing(routing),
        }
    }

    /// Fill the output buffer with processed audio. After the stream ends
    /// the graph keeps running on silence until the reverb has rung out.
    fn fill_buffer(&mut self, output: &mut [f32], channels: u16) {
        let out_channels = channels.max(1) as usize;
        let out_frames = output.len() / out_channels;

        if self.mix.len() < out_frames * 2 {
            self.mix.resize(out_frames * 2, 0.0);
        }
        let mix = &mut self.mix[..out_frames * 2];

        let got_frames = match &mut self.session {
            Some(s) if self.playing => s.extract(mix, out_frames),
            _ if self.ringing > 0 => 0,
            _ => {
                output.fill(0.0);
                return;
            }
        };
        mix[got_frames * 2..].fill(0.0);
        self.graph.render(mix);

        for (f, frame) in output.chunks_exact_mut(out_channels).enumerate() {
            for (c, sample) in frame.iter_mut().enumerate() {
                *sample = mix[f * 2 + c % 2];
            }
        }

        if !self.playing {
            self.ringing = self.ringing.saturating_sub(out_frames);
            if self.ringing == 0 {
                // Realign the convolver so the next pass starts like a fresh one.
                self.graph.reset();
            }
        } else if got_frames < out_frames {
            // Playback finished
            self.playing = false;
            if let Some(s) = &mut self.session {
                s.rewind();
            }
            self.ringing = self.graph.tail_len();
            self.notify(AudioEvent::PlaybackFinished);
        }
    }
}

/// Spawn the audio engine thread and return its command/event channels.
pub fn spawn_engine(config: PlayerConfig) -> AudioResult<EngineHandle> {
    let (cmd_tx, cmd_rx) = crossbeam_channel::bounded::<AudioCommand>(64);
    let (event_tx, event_rx) = crossbeam_channel::bounded::<AudioEvent>(256);
    let (retired_tx, retired_rx) = crossbeam_channel::bounded::<Retired>(RETIRED_CAPACITY);

    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(AudioError::NoDevice)?;

    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::Stream(format!("Failed to get output config: {e}")))?;

    let sample_rate = supported.sample_rate();
    let channels = supported.channels();
    let sample_format = supported.sample_format();

    log::info!(
        "Opening output: {} Hz, {} channel(s), {:?}",
        sample_rate,
        channels,
        sample_format
    );

    let mut state = EngineState::new(sample_rate, &config, event_tx.clone(), retired_tx);
    let err_tx = event_tx;

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device
            .build_output_stream(
                &supported.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // Apply every pending command before rendering so the block
                    // sees a consistent set of parameters.
                    while let Ok(cmd) = cmd_rx.try_recv() {
                        state.handle_command(cmd);
                    }
                    state.fill_buffer(data, channels);
                },
                move |err| {
                    log::error!("Audio stream error: {err}");
                    let _ = err_tx.try_send(AudioEvent::Error(err.to_string()));
                },
                None,
            )
            .map_err(|e| AudioError::Stream(format!("Failed to build output stream: {e}")))?,
        other => return Err(AudioError::UnsupportedFormat(format!("{other:?}"))),
    };

    stream
        .play()
        .map_err(|e| AudioError::Stream(format!("Failed to start stream: {e}")))?;

    // Keep stream alive by moving it into a thread
    std::thread::Builder::new()
        .name("audio-keepalive".into())
        .spawn(move || {
            let _stream = stream;
            loop {
                std::thread::park();
            }
        })?;

    Ok(EngineHandle {
        commands: cmd_tx,
        events: event_rx,
        retired: retired_rx,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::audio::graph::Routing;
    use crate::audio::types::{AudioData, ImpulseResponse};

    fn state_with_retired() -> (EngineState, Receiver<AudioEvent>, Receiver<Retired>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (retired_tx, retired_rx) = crossbeam_channel::unbounded();
        let config = PlayerConfig {
            block_frames: 2048,
            ..PlayerConfig::default()
        };
        (EngineState::new(44_100, &config, tx, retired_tx), rx, retired_rx)
    }

    fn state() -> (EngineState, Receiver<AudioEvent>) {
        let (state, rx, _) = state_with_retired();
        (state, rx)
    }

    /// A short decaying kernel, so the ring-out fits in a few callbacks.
    fn room() -> Box<Convolver> {
        let kernel: Vec<f32> = (0..300).map(|i| 0.5 * (1.0 - i as f32 / 300.0)).collect();
        let ir = ImpulseResponse {
            channels: vec![kernel.clone(), kernel],
            sample_rate: 44_100,
        };
        Box::new(Convolver::new(&ir, 128, false))
    }

    /// Render callbacks until `PlaybackFinished` shows up.
    fn play_to_end(state: &mut EngineState, rx: &Receiver<AudioEvent>) -> bool {
        let mut out = vec![0.0f32; 2 * 512];
        for _ in 0..200 {
            state.fill_buffer(&mut out, 2);
            if rx.try_iter().any(|e| e == AudioEvent::PlaybackFinished) {
                return true;
            }
        }
        false
    }

    fn tone(frames: usize) -> Arc<AudioData> {
        let left: Vec<f32> = (0..frames).map(|i| ((i % 100) as f32 / 100.0) - 0.5).collect();
        Arc::new(AudioData::from_channels(vec![left.clone(), left], 44_100))
    }

    #[test]
    fn test_silent_until_played() {
        let (mut state, _rx) = state();
        state.handle_command(AudioCommand::LoadAudio(tone(44_100)));

        let mut out = vec![1.0f32; 2 * 512];
        state.fill_buffer(&mut out, 2);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_seek_reports_position() {
        let (mut state, rx) = state();
        state.handle_command(AudioCommand::LoadAudio(tone(44_100)));
        while rx.try_recv().is_ok() {}

        state.handle_command(AudioCommand::SeekPercent(50.0));

        match rx.try_recv() {
            Ok(AudioEvent::PositionChanged(t)) => assert!((t - 0.5).abs() < 1e-6),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_plays_to_end_and_stops() {
        let (mut state, rx) = state();
        state.handle_command(AudioCommand::LoadAudio(tone(8_000)));
        state.handle_command(AudioCommand::SetRouting(Routing::Dry));
        state.handle_command(AudioCommand::Play);

        assert!(play_to_end(&mut state, &rx));
        assert!(!state.playing);
        assert_eq!(state.ringing, 0);
        let cursor = state.session.as_ref().map(|s| s.extractor().cursor());
        assert_eq!(cursor, Some(0));
    }

    #[test]
    fn test_reverb_rings_out_after_end() {
        let (mut state, rx) = state();
        state.handle_command(AudioCommand::SetConvolver(room()));
        state.handle_command(AudioCommand::LoadAudio(tone(8_000)));
        state.handle_command(AudioCommand::Play);

        assert!(play_to_end(&mut state, &rx));
        assert!(state.ringing > 0);

        let mut out = vec![0.0f32; 2 * 128];
        state.fill_buffer(&mut out, 2);
        assert!(out.iter().any(|s| s.abs() > 1e-4));

        let mut rest = vec![0.0f32; 2 * 1024];
        state.fill_buffer(&mut rest, 2);
        assert_eq!(state.ringing, 0);
        state.fill_buffer(&mut out, 2);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_replay_starts_without_stale_tail() {
        let start = |state: &mut EngineState| {
            state.handle_command(AudioCommand::SetConvolver(room()));
            state.handle_command(AudioCommand::SetRouting(Routing::WetOnly));
            state.handle_command(AudioCommand::LoadAudio(tone(8_000)));
            state.handle_command(AudioCommand::Play);
        };

        let (mut fresh, _fresh_rx) = state();
        start(&mut fresh);

        let (mut replayed, rx) = state();
        start(&mut replayed);
        assert!(play_to_end(&mut replayed, &rx));
        // Play again while the tail is still sounding.
        replayed.handle_command(AudioCommand::Play);
        assert_eq!(replayed.ringing, 0);

        // With only the reverb audible, a clean convolver is silent for its
        // first latency block, just like a fresh one.
        let mut expected = vec![1.0f32; 2 * 128];
        let mut got = vec![1.0f32; 2 * 128];
        fresh.fill_buffer(&mut expected, 2);
        replayed.fill_buffer(&mut got, 2);
        assert_eq!(got, expected);
        assert!(got.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_old_buffers_are_handed_back() {
        let (mut state, _rx, retired) = state_with_retired();
        state.handle_command(AudioCommand::SetConvolver(room()));
        assert!(retired.try_recv().is_err());
        state.handle_command(AudioCommand::SetConvolver(room()));
        assert!(matches!(retired.try_recv(), Ok(Retired::Convolver(_))));

        let first = tone(44_100);
        state.handle_command(AudioCommand::LoadAudio(first.clone()));
        state.handle_command(AudioCommand::LoadAudio(tone(22_050)));
        match retired.try_recv() {
            Ok(Retired::Session(old)) => {
                assert_eq!(old.extractor().total_frames(), 44_100);
                drop(old);
                assert_eq!(Arc::strong_count(&first), 1);
            }
            _ => panic!("old session was not handed back"),
        }
    }

    #[test]
    fn test_new_session_replaces_old() {
        let (mut state, _rx) = state();
        state.handle_command(AudioCommand::LoadAudio(tone(44_100)));
        state.handle_command(AudioCommand::Play);
        state.handle_command(AudioCommand::SetTempo(1.5));

        state.handle_command(AudioCommand::LoadAudio(tone(22_050)));

        assert!(!state.playing);
        let session = state.session.as_ref().unwrap();
        assert_eq!(session.extractor().total_frames(), 22_050);
        assert_eq!(session.tempo(), 1.5);
    }

    #[test]
    fn test_pause_keeps_position() {
        let (mut state, _rx) = state();
        state.handle_command(AudioCommand::LoadAudio(tone(44_100)));
        state.handle_command(AudioCommand::Play);

        let mut out = vec![0.0f32; 256];
        state.fill_buffer(&mut out, 1);
        assert!(state.playing);

        state.handle_command(AudioCommand::Pause);
        let cursor = state.session.as_ref().unwrap().extractor().cursor();
        assert!(cursor > 0);
        state.fill_buffer(&mut out, 1);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(state.session.as_ref().unwrap().extractor().cursor(), cursor);
    }
}
