//! Data types flowing between pipeline stages.

use serde::Serialize;

/// A fixed-duration block of 16-bit mono PCM, stamped at capture.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// PCM samples (16-bit signed integers).
    pub samples: Vec<i16>,
    /// Capture time of the first sample, relative to the start of the run.
    pub timestamp_ms: u64,
    /// The speaking gate was closed when this frame was captured.
    pub gated: bool,
}

impl Frame {
    /// Creates a new frame.
    pub fn new(samples: Vec<i16>, timestamp_ms: u64) -> Self {
        Self {
            samples,
            timestamp_ms,
            gated: false,
        }
    }

    /// Marks the frame as captured while the synthesizer was speaking.
    pub fn with_gated(mut self, gated: bool) -> Self {
        self.gated = gated;
        self
    }
}

/// One segmented utterance, handed whole to transcription.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Timestamp of the first speech frame.
    pub start_ms: u64,
    /// Timestamp of the last buffered frame.
    pub end_ms: u64,
    /// Buffered PCM, including intra-utterance and trailing silence.
    pub pcm: Vec<i16>,
    /// Language hint passed to the transcription engine.
    pub source_lang: String,
    /// Sample rate of `pcm`.
    pub sample_rate: u32,
    /// Total duration of the frames classified as speech.
    pub voiced_ms: u64,
}

impl AudioChunk {
    /// Duration of the buffered audio in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.pcm.len() as u64 * 1000) / self.sample_rate as u64
    }

    /// Samples normalized to [-1.0, 1.0], as transcription engines expect.
    pub fn to_f32(&self) -> Vec<f32> {
        self.pcm.iter().map(|&s| s as f32 / 32768.0).collect()
    }
}

/// Which stage produced an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RawTranscript,
    FinalTranscript,
    FinalTranslation,
}

/// A transcript or translation travelling downstream, keyed by sequence number.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub seq: u64,
    pub source_lang: String,
    pub target_lang: String,
    pub text: String,
    pub is_final: bool,
    pub start_ms: u64,
    pub end_ms: u64,
    /// The untranslated text, carried on translations for display.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
}

impl Event {
    /// A final transcript for `chunk`.
    pub fn final_transcript(
        seq: u64,
        chunk: &AudioChunk,
        source_lang: &str,
        target_lang: &str,
        text: String,
    ) -> Self {
        Self {
            kind: EventKind::FinalTranscript,
            seq,
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            text,
            is_final: true,
            start_ms: chunk.start_ms,
            end_ms: chunk.end_ms,
            source_text: None,
        }
    }

    /// The translation of this transcript, keeping its sequence number and timing.
    pub fn translated(&self, text: String, target_lang: &str) -> Self {
        Self {
            kind: EventKind::FinalTranslation,
            seq: self.seq,
            source_lang: self.source_lang.clone(),
            target_lang: target_lang.to_string(),
            text,
            is_final: true,
            start_ms: self.start_ms,
            end_ms: self.end_ms,
            source_text: Some(self.text.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(len: usize) -> AudioChunk {
        AudioChunk {
            start_ms: 300,
            end_ms: 1920,
            pcm: vec![16384; len],
            source_lang: "en".to_string(),
            sample_rate: 16000,
            voiced_ms: 1200,
        }
    }

    #[test]
    fn test_chunk_duration_from_sample_count() {
        assert_eq!(chunk(16000).duration_ms(), 1000);
        assert_eq!(chunk(480).duration_ms(), 30);
    }

    #[test]
    fn test_chunk_duration_zero_rate_is_zero() {
        let mut c = chunk(480);
        c.sample_rate = 0;
        assert_eq!(c.duration_ms(), 0);
    }

    #[test]
    fn test_chunk_to_f32_normalizes() {
        let samples = chunk(4).to_f32();
        assert_eq!(samples, vec![0.5; 4]);
    }

    #[test]
    fn test_translated_keeps_seq_and_timing() {
        let transcript = Event::final_transcript(5, &chunk(10), "en", "de", "Hello.".to_string());
        let translation = transcript.translated("Hallo.".to_string(), "de");

        assert_eq!(translation.kind, EventKind::FinalTranslation);
        assert_eq!(translation.seq, 5);
        assert_eq!(translation.start_ms, 300);
        assert_eq!(translation.end_ms, 1920);
        assert_eq!(translation.source_text.as_deref(), Some("Hello."));
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = Event::final_transcript(1, &chunk(10), "en", "de", "Hi.".to_string());
        let json = serde_json::to_string(&event).unwrap();

        assert!(json.contains(r#""type":"final_transcript""#), "got: {json}");
        assert!(!json.contains("source_text"), "None fields are skipped: {json}");
    }
}
