use iced::widget::{button, column, container, radio, row, slider, text, Row};
use iced::{Alignment, Element, Length};

use crate::audio::graph::Routing;
use crate::audio::reverb::KernelChannels;
use crate::audio::types::PlaybackStatus;

#[derive(Debug, Clone)]
pub enum ControlMessage {
    OpenFile,
    OpenImpulse,
    PlayPause,
    Stop,
    TempoChanged(f32),
    PitchChanged(f32),
    ReverbMixChanged(f32),
    ReverbDurationChanged(f64),
    ReverbDecayChanged(f64),
    /// A reverb shape slider was released.
    ReverbShapeCommitted,
    ChannelsSelected(KernelChannels),
    GenerateReverb,
    ToggleReverb,
    /// Seek slider moved, as a fraction of the track.
    SeekChanged(f64),
}

/// Everything the control panel displays.
pub struct ControlValues {
    pub status: PlaybackStatus,
    pub position: f64,
    pub duration: f64,
    pub seek: f64,
    pub tempo: f32,
    pub pitch: f32,
    pub wet_gain: f32,
    pub wet_max: f32,
    pub reverb_duration: f64,
    pub reverb_decay: f64,
    pub channels: KernelChannels,
    pub routing: Routing,
}

/// Format seconds as M:SS.
pub fn format_time(seconds: f64) -> String {
    let total_secs = seconds.max(0.0) as u64;
    let mins = total_secs / 60;
    let secs = total_secs % 60;
    format!("{mins}:{secs:02}")
}

fn labeled<'a>(
    label: String,
    control: impl Into<Element<'a, ControlMessage>>,
) -> Element<'a, ControlMessage> {
    row![text(label).size(14).width(Length::Fixed(150.0)), control.into()]
        .spacing(10)
        .align_y(Alignment::Center)
        .width(Length::Fixed(420.0))
        .into()
}

/// Build the transport and effect controls.
pub fn view_controls<'a>(values: &ControlValues) -> Element<'a, ControlMessage> {
    let play_label = match values.status {
        PlaybackStatus::Playing => "Pause",
        _ => "Play",
    };
    let reverb_label = match values.routing {
        Routing::Wet => "Reverb: On",
        Routing::WetOnly => "Reverb: Only",
        Routing::Dry => "Reverb: Off",
    };

    let transport = Row::new()
        .spacing(10)
        .align_y(Alignment::Center)
        .push(button(text("Open File")).on_press(ControlMessage::OpenFile))
        .push(button(text(play_label)).on_press(ControlMessage::PlayPause))
        .push(button(text("Stop")).on_press(ControlMessage::Stop))
        .push(
            text(format!(
                "{} / {}",
                format_time(values.position),
                format_time(values.duration)
            ))
            .size(16),
        );

    let seek = slider(0.0..=1.0, values.seek, ControlMessage::SeekChanged).step(0.001);

    let stretch = column![
        labeled(
            format!("Tempo: {:.0}%", values.tempo * 100.0),
            slider(0.25..=2.0, values.tempo, ControlMessage::TempoChanged).step(0.05),
        ),
        labeled(
            format!("Pitch: {:.0}%", values.pitch * 100.0),
            slider(0.5..=2.0, values.pitch, ControlMessage::PitchChanged).step(0.05),
        ),
    ]
    .spacing(5);

    let channels = KernelChannels::ALL
        .iter()
        .fold(Row::new().spacing(10), |r, &ch| {
            r.push(radio(
                ch.label(),
                ch,
                Some(values.channels),
                ControlMessage::ChannelsSelected,
            ))
        });

    let reverb = column![
        row![
            button(text(reverb_label)).on_press(ControlMessage::ToggleReverb),
            button(text("Generate Reverb")).on_press(ControlMessage::GenerateReverb),
            button(text("Load Impulse")).on_press(ControlMessage::OpenImpulse),
        ]
        .spacing(10),
        labeled(
            format!("Reverb mix: {:.2}", values.wet_gain),
            slider(0.0..=values.wet_max, values.wet_gain, ControlMessage::ReverbMixChanged)
                .step(0.05),
        ),
        labeled(
            format!("Length: {:.1}s", values.reverb_duration),
            slider(
                0.1..=10.0,
                values.reverb_duration,
                ControlMessage::ReverbDurationChanged,
            )
            .step(0.1)
            .on_release(ControlMessage::ReverbShapeCommitted),
        ),
        labeled(
            format!("Decay: {:.1}", values.reverb_decay),
            slider(0.0..=10.0, values.reverb_decay, ControlMessage::ReverbDecayChanged)
                .step(0.1)
                .on_release(ControlMessage::ReverbShapeCommitted),
        ),
        channels,
    ]
    .spacing(5);

    container(
        column![transport, seek, row![stretch, reverb].spacing(30)]
            .spacing(10),
    )
    .padding(10)
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "0:00");
        assert_eq!(format_time(61.9), "1:01");
        assert_eq!(format_time(600.0), "10:00");
        assert_eq!(format_time(-3.0), "0:00");
    }
}
