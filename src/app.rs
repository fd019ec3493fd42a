use std::path::PathBuf;
use std::sync::Arc;

use iced::keyboard;
use iced::widget::{center, column, container, text};
use iced::{Element, Length, Subscription, Task, Theme};

use crate::audio::convolver::Convolver;
use crate::audio::engine::{self, EngineHandle};
use crate::audio::graph::Routing;
use crate::audio::reverb::{self, KernelParams};
use crate::audio::decoder;
use crate::audio::types::*;
use crate::config::{self, PlayerConfig};
use crate::error::{AudioError, AudioResult};
use crate::ui::controls::{self, ControlMessage, ControlValues};

/// Reverb mix ceiling for generated kernels and for recorded ones.
const WET_MAX_GENERATED: f32 = 6.0;
const WET_MAX_RECORDED: f32 = 2.0;
/// Mix applied when a recorded impulse response is loaded.
const WET_GAIN_RECORDED: f32 = 0.5;
/// Arrow keys seek by this many percent.
const SEEK_STEP_PERCENT: f64 = 5.0;

/// Where a new reverb kernel comes from.
#[derive(Debug, Clone)]
enum KernelSource {
    Generated(KernelParams),
    Recorded(PathBuf),
}

/// What was installed in the engine.
#[derive(Debug, Clone)]
pub enum KernelKind {
    Generated,
    Recorded(String),
}

/// UI-side session state. Everything the engine needs is sent as a command.
pub struct App {
    config: PlayerConfig,
    engine: Option<EngineHandle>,

    status: PlaybackStatus,
    position: f64,
    duration: f64,
    tempo: f32,
    pitch: f32,
    wet_gain: f32,
    wet_max: f32,
    reverb: KernelParams,
    routing: Routing,
    impulse_name: Option<String>,
    filename: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Message {
    EngineReady(Result<EngineHandle, String>),
    FileDialogResult(Option<PathBuf>),
    FileLoaded(Result<(AudioData, String), String>),
    ImpulseDialogResult(Option<PathBuf>),
    KernelReady(Result<KernelKind, String>),
    Control(ControlMessage),
    Tick,
    KeyEvent(keyboard::Event),
}

impl App {
    fn send(&self, cmd: AudioCommand) {
        if let Some(engine) = &self.engine {
            if engine.commands.try_send(cmd).is_err() {
                log::warn!("Audio engine command queue full, dropping command");
            }
        }
    }

    fn seek_fraction(&self) -> f64 {
        if self.duration > 0.0 {
            (self.position / self.duration).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    fn seek_percent(&mut self, percent: f64) {
        let percent = percent.clamp(0.0, 100.0);
        self.position = percent / 100.0 * self.duration;
        self.send(AudioCommand::SeekPercent(percent));
    }

    /// Build a kernel off the UI and audio threads and hand the prepared
    /// convolver straight to the engine.
    fn load_kernel(&self, source: KernelSource) -> Task<Message> {
        let Some(engine) = &self.engine else {
            return Task::none();
        };
        let commands = engine.commands.clone();
        let sample_rate = engine.sample_rate;
        let reverb_config = self.config.reverb.clone();
        let block = self.config.convolution_block;

        Task::perform(
            async move {
                tokio::task::spawn_blocking(move || -> AudioResult<KernelKind> {
                    let (ir, kind) = match source {
                        KernelSource::Generated(params) => (
                            reverb::generate_seeded(&params, sample_rate, reverb_config.seed)?,
                            KernelKind::Generated,
                        ),
                        KernelSource::Recorded(path) => {
                            let name = path
                                .file_name()
                                .map(|n| n.to_string_lossy().to_string())
                                .unwrap_or_default();
                            let data = decoder::decode_file(&path)?;
                            if data.sample_rate != sample_rate {
                                log::warn!(
                                    "Impulse response is {} Hz, output is {} Hz",
                                    data.sample_rate,
                                    sample_rate
                                );
                            }
                            (reverb::impulse_response_from_audio(data), KernelKind::Recorded(name))
                        }
                    };
                    let convolver = Convolver::new(&ir, block, reverb_config.normalize);
                    commands
                        .send(AudioCommand::SetConvolver(Box::new(convolver)))
                        .map_err(|_| AudioError::Stream("audio engine has stopped".into()))?;
                    Ok(kind)
                })
                .await
                .unwrap_or_else(|e| Err(AudioError::Stream(e.to_string())))
                .map_err(|e| e.to_string())
            },
            Message::KernelReady,
        )
    }

    fn regenerate_kernel(&self) -> Task<Message> {
        self.load_kernel(KernelSource::Generated(self.reverb))
    }

    fn control_values(&self) -> ControlValues {
        ControlValues {
            status: self.status,
            position: self.position,
            duration: self.duration,
            seek: self.seek_fraction(),
            tempo: self.tempo,
            pitch: self.pitch,
            wet_gain: self.wet_gain,
            wet_max: self.wet_max,
            reverb_duration: self.reverb.duration_secs,
            reverb_decay: self.reverb.decay,
            channels: self.reverb.channels,
            routing: self.routing,
        }
    }
}

fn boot() -> (App, Task<Message>) {
    let config = config::default_config_path()
        .map(|path| config::load_config(&path))
        .unwrap_or_default();

    let app = App {
        engine: None,
        status: PlaybackStatus::Stopped,
        position: 0.0,
        duration: 0.0,
        tempo: config.tempo,
        pitch: config.pitch,
        wet_gain: config.wet_gain,
        wet_max: WET_MAX_GENERATED,
        reverb: config.reverb.kernel_params(),
        routing: Routing::default(),
        impulse_name: None,
        filename: None,
        error: None,
        config: config.clone(),
    };

    let task = Task::perform(
        async move {
            tokio::task::spawn_blocking(move || {
                engine::spawn_engine(config).map_err(|e| e.to_string())
            })
            .await
            .unwrap_or_else(|e| Err(format!("Audio engine task failed: {e}")))
        },
        Message::EngineReady,
    );

    (app, task)
}

fn title(app: &App) -> String {
    match &app.filename {
        Some(name) => format!("Stretchverb - {name}"),
        None => "Stretchverb".to_string(),
    }
}

fn update(app: &mut App, message: Message) -> Task<Message> {
    match message {
        Message::EngineReady(result) => match result {
            Ok(handle) => {
                log::info!("Audio engine ready at {} Hz", handle.sample_rate);
                app.engine = Some(handle);
                // Start with a generated room so the reverb is audible right away.
                app.regenerate_kernel()
            }
            Err(e) => {
                log::error!("Audio engine error: {e}");
                app.error = Some(format!("Audio engine error: {e}"));
                Task::none()
            }
        },
        Message::Control(ctrl) => match ctrl {
            ControlMessage::OpenFile => Task::perform(
                async {
                    let handle = rfd::AsyncFileDialog::new()
                        .add_filter("Audio", &["mp3", "wav", "flac", "ogg", "aac"])
                        .pick_file()
                        .await;
                    handle.map(|h| h.path().to_path_buf())
                },
                Message::FileDialogResult,
            ),
            ControlMessage::OpenImpulse => Task::perform(
                async {
                    let handle = rfd::AsyncFileDialog::new()
                        .add_filter("Impulse response", &["wav", "flac", "mp3", "ogg", "aac"])
                        .pick_file()
                        .await;
                    handle.map(|h| h.path().to_path_buf())
                },
                Message::ImpulseDialogResult,
            ),
            ControlMessage::PlayPause => {
                if app.engine.is_some() && app.filename.is_some() {
                    match app.status {
                        PlaybackStatus::Playing => {
                            app.send(AudioCommand::Pause);
                            app.status = PlaybackStatus::Paused;
                        }
                        _ => {
                            app.send(AudioCommand::Play);
                            app.status = PlaybackStatus::Playing;
                        }
                    }
                }
                Task::none()
            }
            ControlMessage::Stop => {
                app.send(AudioCommand::Stop);
                app.status = PlaybackStatus::Stopped;
                app.position = 0.0;
                Task::none()
            }
            ControlMessage::TempoChanged(t) => {
                app.tempo = t;
                app.send(AudioCommand::SetTempo(t));
                Task::none()
            }
            ControlMessage::PitchChanged(p) => {
                app.pitch = p;
                app.send(AudioCommand::SetPitch(p));
                Task::none()
            }
            ControlMessage::ReverbMixChanged(gain) => {
                app.wet_gain = gain;
                app.send(AudioCommand::SetWetGain(gain));
                Task::none()
            }
            ControlMessage::ReverbDurationChanged(secs) => {
                app.reverb.duration_secs = secs;
                Task::none()
            }
            ControlMessage::ReverbDecayChanged(decay) => {
                app.reverb.decay = decay;
                Task::none()
            }
            ControlMessage::ChannelsSelected(channels) => {
                app.reverb.channels = channels;
                app.regenerate_kernel()
            }
            ControlMessage::ReverbShapeCommitted | ControlMessage::GenerateReverb => {
                app.regenerate_kernel()
            }
            ControlMessage::ToggleReverb => {
                app.routing = app.routing.toggled();
                app.send(AudioCommand::SetRouting(app.routing));
                Task::none()
            }
            ControlMessage::SeekChanged(fraction) => {
                app.seek_percent(fraction * 100.0);
                Task::none()
            }
        },
        Message::FileDialogResult(path) => {
            if let Some(path) = path {
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                Task::perform(
                    async move {
                        tokio::task::spawn_blocking(move || {
                            decoder::decode_file(&path)
                                .map(|data| (data.into_stereo(), filename))
                                .map_err(|e| e.to_string())
                        })
                        .await
                        .unwrap_or_else(|e| Err(format!("Decode task failed: {e}")))
                    },
                    Message::FileLoaded,
                )
            } else {
                Task::none()
            }
        }
        Message::FileLoaded(result) => match result {
            Ok((data, filename)) => {
                log::info!("Loaded {filename} ({:.1}s)", data.duration);
                app.duration = data.duration;
                app.filename = Some(filename);
                app.position = 0.0;
                app.error = None;

                // The engine drops the previous session before starting this one.
                app.send(AudioCommand::LoadAudio(Arc::new(data)));
                app.send(AudioCommand::Play);
                app.status = PlaybackStatus::Playing;

                Task::none()
            }
            Err(e) => {
                log::error!("Failed to load file: {e}");
                app.error = Some(e);
                Task::none()
            }
        },
        Message::ImpulseDialogResult(path) => match path {
            Some(path) => app.load_kernel(KernelSource::Recorded(path)),
            None => Task::none(),
        },
        Message::KernelReady(result) => {
            match result {
                Ok(KernelKind::Generated) => {
                    app.impulse_name = None;
                    app.wet_max = WET_MAX_GENERATED;
                }
                Ok(KernelKind::Recorded(name)) => {
                    app.impulse_name = Some(name);
                    app.wet_max = WET_MAX_RECORDED;
                    app.wet_gain = WET_GAIN_RECORDED;
                    app.send(AudioCommand::SetWetGain(WET_GAIN_RECORDED));
                }
                Err(e) => {
                    log::error!("Failed to build reverb: {e}");
                    app.error = Some(format!("Reverb error: {e}"));
                }
            }
            app.wet_gain = app.wet_gain.min(app.wet_max);
            Task::none()
        }
        Message::Tick => {
            let events: Vec<AudioEvent> = match &app.engine {
                Some(engine) => {
                    // Old sessions and kernels are freed here, not in the callback.
                    engine.retired.try_iter().for_each(drop);
                    engine.events.try_iter().collect()
                }
                None => Vec::new(),
            };
            for event in events {
                match event {
                    AudioEvent::PositionChanged(pos) => {
                        app.position = pos;
                    }
                    AudioEvent::PlaybackFinished => {
                        app.status = PlaybackStatus::Stopped;
                        app.position = 0.0;
                    }
                    AudioEvent::Error(e) => {
                        app.error = Some(e);
                    }
                }
            }
            Task::none()
        }
        Message::KeyEvent(key_event) => match key_event {
            keyboard::Event::KeyPressed {
                key, modifiers: _, ..
            } => match key.as_ref() {
                keyboard::Key::Named(keyboard::key::Named::Space) => {
                    update(app, Message::Control(ControlMessage::PlayPause))
                }
                keyboard::Key::Named(keyboard::key::Named::ArrowLeft) => {
                    let percent = app.seek_fraction() * 100.0 - SEEK_STEP_PERCENT;
                    app.seek_percent(percent);
                    Task::none()
                }
                keyboard::Key::Named(keyboard::key::Named::ArrowRight) => {
                    let percent = app.seek_fraction() * 100.0 + SEEK_STEP_PERCENT;
                    app.seek_percent(percent);
                    Task::none()
                }
                _ => Task::none(),
            },
            _ => Task::none(),
        },
    }
}

fn view(app: &App) -> Element<'_, Message> {
    let controls = controls::view_controls(&app.control_values()).map(Message::Control);

    let info: Element<Message> = match (&app.filename, &app.impulse_name) {
        (None, _) => center(text("Open an audio file to begin").size(18))
            .width(Length::Fill)
            .height(Length::Fixed(60.0))
            .into(),
        (Some(name), impulse) => {
            let kernel = match impulse {
                Some(ir) => format!("Impulse: {ir}"),
                None => format!("Impulse: generated ({})", app.reverb.channels.label()),
            };
            container(text(format!("{name}  ·  {kernel}")).size(14))
                .padding(10)
                .into()
        }
    };

    let mut content = column![controls, info].spacing(5);

    if let Some(err) = &app.error {
        content = content.push(
            container(text(format!("Error: {err}")).color(iced::Color::from_rgb(1.0, 0.3, 0.3)))
                .padding(10),
        );
    }

    container(content)
        .width(Length::Fill)
        .height(Length::Fill)
        .into()
}

fn subscription(_app: &App) -> Subscription<Message> {
    let tick =
        iced::time::every(std::time::Duration::from_millis(16)).map(|_| Message::Tick);

    let keys = keyboard::listen().map(Message::KeyEvent);

    Subscription::batch([tick, keys])
}

fn theme(_app: &App) -> Theme {
    Theme::Dark
}

pub fn run() -> iced::Result {
    iced::application(boot, update, view)
        .title(title)
        .subscription(subscription)
        .theme(theme)
        .window_size((1000.0, 420.0))
        .run()
}
