//! Transcriber station: audio chunks in, numbered final transcripts out.

use crate::pipeline::error::StationError;
use crate::pipeline::station::Station;
use crate::pipeline::types::{AudioChunk, Event};
use crate::stt::engine::TranscriptionEngine;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Strips non-speech annotations such as `[BLANK_AUDIO]`, `(music)` or `*cough*`.
///
/// `[...]` spans are always removed. Parentheses and asterisks only count
/// when they wrap a single word, so `(on Monday)` or `5 * 3` survive. Runs of
/// spaces collapse to one.
fn strip_annotations(text: &str) -> String {
    strip_bracketed(text)
        .split_whitespace()
        .filter(|token| !is_word_annotation(token))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Removes `[...]` spans. An unmatched `[` and everything after it is kept.
fn strip_bracketed(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let Some(close) = after.find(']') else {
            break;
        };
        result.push_str(&rest[..open]);
        result.push(' ');
        rest = &after[close + 1..];
    }

    result.push_str(rest);
    result
}

/// `(laughs)` or `*cough*`, optionally followed by punctuation.
fn is_word_annotation(token: &str) -> bool {
    let core = token.trim_end_matches([',', '.', '!', '?', ';', ':']);
    let wrapped = |open: char, close: char| {
        core.len() > 2
            && core.starts_with(open)
            && core.ends_with(close)
            && core[1..core.len() - 1]
                .chars()
                .all(|c| c.is_alphabetic() || matches!(c, '_' | '-' | '\''))
    };
    wrapped('(', ')') || wrapped('*', '*')
}

/// Appends a period unless the text already ends a sentence.
fn ensure_terminal_punctuation(text: &str) -> String {
    if text.ends_with(['.', '!', '?']) {
        text.to_string()
    } else {
        format!("{text}.")
    }
}

/// Station that transcribes chunks and assigns sequence numbers.
///
/// The sequence counter advances only when a transcript is emitted, so
/// dropped chunks (engine errors, empty text) leave no gaps.
pub struct TranscriberStation {
    engine: Arc<dyn TranscriptionEngine>,
    language_hint: Option<String>,
    target_lang: String,
    next_seq: u64,
    warned_slow: bool,
}

impl TranscriberStation {
    /// `source_lang` of `"auto"` lets the engine detect the language.
    pub fn new(engine: Arc<dyn TranscriptionEngine>, source_lang: &str, target_lang: &str) -> Self {
        let language_hint =
            (source_lang != crate::defaults::AUTO_LANGUAGE).then(|| source_lang.to_string());
        Self {
            engine,
            language_hint,
            target_lang: target_lang.to_string(),
            next_seq: 0,
            warned_slow: false,
        }
    }

    /// Sequence number the next emitted transcript will carry.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }
}

impl Station for TranscriberStation {
    type Input = AudioChunk;
    type Output = Event;

    fn name(&self) -> &'static str {
        "transcriber"
    }

    fn process(&mut self, chunk: AudioChunk) -> Result<Option<Event>, StationError> {
        let started = Instant::now();
        let audio_ms = chunk.duration_ms();

        let result = self
            .engine
            .transcribe(&chunk.to_f32(), self.language_hint.as_deref())
            .map_err(|e| StationError::Recoverable(format!("transcription failed: {e}")))?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(audio_ms, elapsed_ms, "transcribed chunk");
        if !self.warned_slow && elapsed_ms > audio_ms {
            self.warned_slow = true;
            warn!(
                audio_ms,
                elapsed_ms,
                engine = self.engine.name(),
                "transcription is slower than real time; consider a smaller model or --compute gpu"
            );
        }

        let text = strip_annotations(&result.text);
        if text.is_empty() {
            debug!(start_ms = chunk.start_ms, "empty transcript skipped");
            return Ok(None);
        }

        let source_lang = if result.language.is_empty() {
            self.language_hint.as_deref().unwrap_or(&chunk.source_lang)
        } else {
            &result.language
        };

        let seq = self.next_seq;
        self.next_seq += 1;

        Ok(Some(Event::final_transcript(
            seq,
            &chunk,
            source_lang,
            &self.target_lang,
            ensure_terminal_punctuation(&text),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::EventKind;
    use crate::stt::engine::MockTranscriber;

    fn chunk(start_ms: u64) -> AudioChunk {
        AudioChunk {
            start_ms,
            end_ms: start_ms + 900,
            pcm: vec![1000; 14400],
            source_lang: "en".to_string(),
            sample_rate: 16000,
            voiced_ms: 600,
        }
    }

    fn station(engine: MockTranscriber) -> TranscriberStation {
        TranscriberStation::new(Arc::new(engine), "en", "de")
    }

    #[test]
    fn test_emits_final_transcript_with_punctuation() {
        let mut station = station(MockTranscriber::new("mock").with_response("Hello world"));

        let event = station.process(chunk(300)).unwrap().expect("event");

        assert_eq!(event.kind, EventKind::FinalTranscript);
        assert_eq!(event.text, "Hello world.");
        assert_eq!(event.seq, 0);
        assert_eq!(event.start_ms, 300);
        assert_eq!(event.end_ms, 1200);
        assert_eq!(event.source_lang, "en");
        assert_eq!(event.target_lang, "de");
        assert!(event.is_final);
    }

    #[test]
    fn test_existing_terminal_punctuation_is_kept() {
        for text in ["Really?", "Stop!", "Done."] {
            let mut station = station(MockTranscriber::new("mock").with_response(text));
            let event = station.process(chunk(0)).unwrap().unwrap();
            assert_eq!(event.text, text);
        }
    }

    #[test]
    fn test_whitespace_only_result_is_skipped() {
        let mut station = station(MockTranscriber::new("mock").with_response("   "));
        assert!(station.process(chunk(0)).unwrap().is_none());
        assert_eq!(station.next_seq(), 0);
    }

    #[test]
    fn test_annotation_only_result_is_skipped() {
        let mut station = station(MockTranscriber::new("mock").with_response(" [BLANK_AUDIO] "));
        assert!(station.process(chunk(0)).unwrap().is_none());
    }

    #[test]
    fn test_engine_error_is_recoverable() {
        let mut station = station(MockTranscriber::new("mock").with_failure());
        assert!(matches!(
            station.process(chunk(0)),
            Err(StationError::Recoverable(_))
        ));
    }

    #[test]
    fn test_sequence_strictly_increases_across_failures() {
        let engine = MockTranscriber::new("mock").with_script([
            Some("one"),
            None,
            Some(""),
            Some("two"),
            None,
            Some("three"),
        ]);
        let mut station = station(engine);

        let seqs: Vec<u64> = (0..6)
            .filter_map(|i| station.process(chunk(i * 1000)).ok().flatten())
            .map(|event| event.seq)
            .collect();

        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn test_auto_language_sends_no_hint() {
        let engine = Arc::new(MockTranscriber::new("mock").with_language("fr"));
        let mut station = TranscriberStation::new(engine.clone(), "auto", "en");

        let event = station.process(chunk(0)).unwrap().unwrap();

        assert_eq!(engine.calls(), vec![None]);
        assert_eq!(event.source_lang, "fr", "detected language is reported");
    }

    #[test]
    fn test_language_hint_is_forwarded() {
        let engine = Arc::new(MockTranscriber::new("mock"));
        let mut station = TranscriberStation::new(engine.clone(), "es", "en");
        station.process(chunk(0)).unwrap();
        assert_eq!(engine.calls(), vec![Some("es".to_string())]);
    }

    #[test]
    fn test_strip_annotations() {
        assert_eq!(strip_annotations("[Music] Hello"), "Hello");
        assert_eq!(strip_annotations("Hello (laughs) world"), "Hello world");
        assert_eq!(strip_annotations("*cough* Yes"), "Yes");
        assert_eq!(strip_annotations("plain  text "), "plain text");
        assert_eq!(strip_annotations("open [bracket"), "open [bracket");
        assert_eq!(strip_annotations("[ Silence ]"), "");
        assert_eq!(strip_annotations("Right (sighs), okay"), "Right okay");
    }

    #[test]
    fn test_strip_annotations_keeps_spoken_parentheses_and_arithmetic() {
        assert_eq!(
            strip_annotations("We met (on Monday) and paid 5 * 3 * 2 dollars"),
            "We met (on Monday) and paid 5 * 3 * 2 dollars"
        );
        assert_eq!(strip_annotations("Option (1) wins"), "Option (1) wins");
    }
}
