use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::types::AudioData;
use crate::error::{AudioError, AudioResult};

/// Decode an audio file into planar `AudioData` with all samples in memory.
/// The channel layout of the file is preserved.
pub fn decode_file(path: &Path) -> AudioResult<AudioData> {
    let file = File::open(path)?;
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    log::info!("Decoding {:?}", path);
    decode_source(Box::new(file), hint)
}

/// Decode an in-memory encoded file.
pub fn decode_bytes(bytes: Vec<u8>) -> AudioResult<AudioData> {
    decode_source(Box::new(Cursor::new(bytes)), Hint::new())
}

fn decode_source(source: Box<dyn MediaSource>, hint: Hint) -> AudioResult<AudioData> {
    let mss = MediaSourceStream::new(source, Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AudioError::Decode(format!("Failed to probe format: {e}")))?;

    let mut format = probed.format;

    let track = format.default_track().ok_or(AudioError::NoTrack)?.clone();

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| AudioError::Decode("No sample rate in track".into()))?;
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(2);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioError::Decode(format!("Failed to create decoder: {e}")))?;

    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(AudioError::Decode(format!("Error reading packet: {e}"))),
        };

        if packet.track_id() != track.id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(symphonia::core::errors::Error::DecodeError(e)) => {
                log::warn!("Skipping undecodable packet: {e}");
                continue;
            }
            Err(e) => return Err(AudioError::Decode(e.to_string())),
        };

        let spec = *decoded.spec();
        channels = spec.channels.count();

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    if samples.is_empty() {
        return Err(AudioError::NoTrack);
    }

    let data = AudioData::from_interleaved(&samples, channels, sample_rate);
    log::info!(
        "Decoded {} frames, {} channel(s) at {} Hz ({:.2}s)",
        data.num_frames(),
        data.num_channels(),
        data.sample_rate,
        data.duration
    );
    Ok(data)
}
