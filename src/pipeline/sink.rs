use crate::error::Result;
use crate::pipeline::error::StationError;
use crate::pipeline::station::Station;
use crate::pipeline::types::{Event, EventKind};
use owo_colors::OwoColorize;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Terminal consumer of pipeline events.
pub trait CaptionSink: Send + 'static {
    /// Handle one event that reached the end of the pipeline.
    fn handle(&mut self, event: &Event) -> Result<()>;

    /// Called on pipeline shutdown.
    fn finish(&mut self) {}

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "sink"
    }
}

/// Renders a translation as a single caption line.
pub fn format_caption(event: &Event, color: bool) -> String {
    let source = event.source_text.as_deref().unwrap_or("");
    let tag = format!("[{} → {}]", event.source_lang, event.target_lang);
    if color {
        format!("{} {} {} {}", tag.dimmed(), source, "→".dimmed(), event.text.green())
    } else {
        format!("{tag} {source} → {}", event.text)
    }
}

/// Writes captions to stdout, as text or as one JSON object per line.
pub struct StdoutSink {
    json: bool,
    color: bool,
}

impl StdoutSink {
    pub fn new(json: bool) -> Self {
        use std::io::IsTerminal;
        Self {
            json,
            color: !json && std::io::stdout().is_terminal(),
        }
    }

    fn render(&self, event: &Event) -> Result<String> {
        if self.json {
            serde_json::to_string(event).map_err(|e| crate::error::VoxrelayError::Other(e.to_string()))
        } else {
            Ok(format_caption(event, self.color))
        }
    }
}

impl CaptionSink for StdoutSink {
    fn handle(&mut self, event: &Event) -> Result<()> {
        let line = self.render(event)?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}")?;
        stdout.flush()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdout"
    }
}

/// Collects events in memory for tests and library use.
#[derive(Debug, Clone, Default)]
pub struct CollectorSink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to everything collected so far.
    pub fn events(&self) -> Arc<Mutex<Vec<Event>>> {
        Arc::clone(&self.events)
    }
}

impl CaptionSink for CollectorSink {
    fn handle(&mut self, event: &Event) -> Result<()> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}

/// Station wrapper for any [`CaptionSink`]. Terminal, so it never produces output.
pub(crate) struct SinkStation {
    sink: Box<dyn CaptionSink>,
    delivered: u64,
}

impl SinkStation {
    pub(crate) fn new(sink: Box<dyn CaptionSink>) -> Self {
        Self { sink, delivered: 0 }
    }
}

impl Station for SinkStation {
    type Input = Event;
    type Output = ();

    fn name(&self) -> &'static str {
        self.sink.name()
    }

    fn process(&mut self, event: Event) -> std::result::Result<Option<()>, StationError> {
        if event.kind != EventKind::FinalTranslation || event.text.trim().is_empty() {
            return Ok(None);
        }
        match self.sink.handle(&event) {
            Ok(()) => self.delivered += 1,
            Err(e) => warn!(sink = self.sink.name(), seq = event.seq, "caption output failed: {e}"),
        }
        Ok(None)
    }

    fn shutdown(&mut self) {
        tracing::debug!(delivered = self.delivered, "sink finished");
        self.sink.finish();
    }
}
