//! Translator station: final transcripts in, final translations out.

use crate::mt::engine::TranslationEngine;
use crate::pipeline::error::StationError;
use crate::pipeline::station::Station;
use crate::pipeline::types::{Event, EventKind};
use std::collections::{HashSet, VecDeque};
use std::time::Instant;
use tracing::{debug, warn};

/// Context and de-duplication limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslatorConfig {
    /// Most recent source texts kept as context.
    pub context_utterances: usize,
    /// Only the last this-many characters of the joined context are used.
    pub context_chars: usize,
    /// Sequence numbers remembered for de-duplication.
    pub dedup_capacity: usize,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            context_utterances: crate::defaults::CONTEXT_UTTERANCES,
            context_chars: crate::defaults::CONTEXT_CHARS,
            dedup_capacity: crate::defaults::DEDUP_CAPACITY,
        }
    }
}

/// Last `max_chars` characters of `text`, on a char boundary.
fn tail_chars(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    match text.char_indices().nth(count - max_chars) {
        Some((index, _)) => &text[index..],
        None => text,
    }
}

/// Station that translates transcripts with a short sliding context.
///
/// Each sequence number is translated at most once; a repeated delivery is
/// ignored. Engine failures pass the source text through.
pub struct TranslatorStation {
    engine: Box<dyn TranslationEngine>,
    config: TranslatorConfig,
    context: VecDeque<String>,
    seen: HashSet<u64>,
    seen_order: VecDeque<u64>,
}

impl TranslatorStation {
    pub fn new(engine: Box<dyn TranslationEngine>, config: TranslatorConfig) -> Self {
        Self {
            engine,
            config,
            context: VecDeque::with_capacity(config.context_utterances),
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
        }
    }

    /// Input handed to the engine: recent context, then the new text.
    fn engine_input(&self, text: &str) -> String {
        if !self.engine.uses_context() || self.context.is_empty() {
            return text.to_string();
        }
        let joined = self.context.iter().map(String::as_str).collect::<Vec<_>>().join(" ");
        let context = tail_chars(&joined, self.config.context_chars).trim();
        if context.is_empty() {
            text.to_string()
        } else {
            format!("{context} {text}")
        }
    }

    /// Returns false if `seq` was already translated.
    fn remember(&mut self, seq: u64) -> bool {
        if !self.seen.insert(seq) {
            return false;
        }
        self.seen_order.push_back(seq);
        while self.seen_order.len() > self.config.dedup_capacity {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    fn push_context(&mut self, text: &str) {
        if self.config.context_utterances == 0 {
            return;
        }
        while self.context.len() >= self.config.context_utterances {
            self.context.pop_front();
        }
        self.context.push_back(text.to_string());
    }
}

impl Station for TranslatorStation {
    type Input = Event;
    type Output = Event;

    fn name(&self) -> &'static str {
        "translator"
    }

    fn process(&mut self, event: Event) -> Result<Option<Event>, StationError> {
        if event.kind != EventKind::FinalTranscript || event.text.trim().is_empty() {
            return Ok(None);
        }
        if !self.remember(event.seq) {
            debug!(seq = event.seq, "duplicate transcript ignored");
            return Ok(None);
        }

        let started = Instant::now();
        let input = self.engine_input(&event.text);
        let translated = match self.engine.translate(&input) {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!(seq = event.seq, "empty translation, passing source text through");
                event.text.clone()
            }
            Err(e) => {
                warn!(seq = event.seq, "translation failed, passing source text through: {e}");
                event.text.clone()
            }
        };
        self.push_context(&event.text);

        debug!(
            seq = event.seq,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "translated"
        );

        Ok(Some(event.translated(
            translated,
            self.engine.target_language(),
        )))
    }
}
