//! crates/feeled_core/src/audio.rs
//!
//! Wraps the raw PCM returned by the speech synthesizer into a
//! self-contained WAV container so the result is playable anywhere.

/// Sample rate of the PCM stream the TTS provider returns.
pub const TTS_SAMPLE_RATE: u32 = 24_000;

/// Wraps 16-bit mono little-endian PCM in a WAV envelope.
pub fn pcm16_to_wav(pcm_data: &[u8], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let mut cursor = std::io::Cursor::new(Vec::new());

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::new(&mut cursor, spec)?;

    // Convert byte array to i16 samples; a trailing odd byte is dropped.
    for chunk in pcm_data.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        writer.write_sample(sample)?;
    }

    writer.finalize()?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_envelope_carries_every_sample() {
        // 1 kHz of silence plus a couple of non-zero samples.
        let mut pcm = vec![0u8; 2000];
        pcm[0] = 0x34;
        pcm[1] = 0x12;

        let wav = pcm16_to_wav(&pcm, TTS_SAMPLE_RATE).unwrap();

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");

        let reader = hound::WavReader::new(std::io::Cursor::new(&wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, TTS_SAMPLE_RATE);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.len(), 1000);

        let first = reader
            .into_samples::<i16>()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(first, 0x1234);
    }

    #[test]
    fn odd_trailing_byte_is_ignored() {
        let wav = pcm16_to_wav(&[0, 0, 7], TTS_SAMPLE_RATE).unwrap();
        let reader = hound::WavReader::new(std::io::Cursor::new(&wav)).unwrap();
        assert_eq!(reader.len(), 1);
    }
}
