//! Shared fixtures for phasegraph tests: scripted and failing text
//! generators plus event collection helpers.

use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};

use phasegraph_core::error::{PhaseGraphError, Result};
use phasegraph_core::event::{EventSink, EventStream};
use phasegraph_core::traits::TextGenerator;
use phasegraph_core::types::{DisplayEvent, GenerationDelta, GenerationRequest};

/// A generator that replays pre-recorded responses, one per `generate` call.
///
/// When the script runs out it answers with an empty response.
#[derive(Default)]
pub struct ScriptedGenerator {
    scripts: Mutex<VecDeque<Vec<std::result::Result<GenerationDelta, String>>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response.
    pub fn with_response(self, deltas: Vec<GenerationDelta>) -> Self {
        self.push(deltas);
        self
    }

    pub fn push(&self, deltas: Vec<GenerationDelta>) {
        self.lock_scripts().push_back(deltas.into_iter().map(Ok).collect());
    }

    /// Queue a response that streams `partial` and then fails.
    pub fn push_failure(&self, partial: &str, message: &str) {
        self.lock_scripts().push_back(vec![
            Ok(GenerationDelta::Text(partial.to_string())),
            Err(message.to_string()),
        ]);
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Responses not yet consumed.
    pub fn remaining(&self) -> usize {
        self.lock_scripts().len()
    }

    fn lock_scripts(
        &self,
    ) -> std::sync::MutexGuard<'_, VecDeque<Vec<std::result::Result<GenerationDelta, String>>>> {
        self.scripts.lock().unwrap()
    }
}

impl TextGenerator for ScriptedGenerator {
    fn generate(
        &self,
        request: GenerationRequest,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<GenerationDelta>>>> {
        self.requests.lock().unwrap().push(request);
        let script = self.lock_scripts().pop_front().unwrap_or_default();
        Box::pin(async move {
            let items = script
                .into_iter()
                .map(|step| step.map_err(PhaseGraphError::Generation))
                .chain(std::iter::once(Ok(GenerationDelta::Done)));
            Ok(stream::iter(items).boxed())
        })
    }
}

/// A generator whose every request fails before streaming anything.
pub struct FailingGenerator {
    pub message: String,
}

impl FailingGenerator {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl TextGenerator for FailingGenerator {
    fn generate(
        &self,
        _request: GenerationRequest,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<GenerationDelta>>>> {
        let message = self.message.clone();
        Box::pin(async move { Err(PhaseGraphError::Generation(message)) })
    }
}

pub fn text(s: &str) -> GenerationDelta {
    GenerationDelta::Text(s.to_string())
}

pub fn command(name: &str, input: serde_json::Value) -> GenerationDelta {
    GenerationDelta::Command {
        name: name.to_string(),
        input,
    }
}

/// Close the sink and drain every event it produced.
pub async fn collect_events(sink: EventSink, stream: EventStream) -> Vec<DisplayEvent> {
    drop(sink);
    stream.collect().await
}

/// Wire type of each event, in order.
pub fn event_types(events: &[DisplayEvent]) -> Vec<String> {
    events.iter().map(DisplayEvent::event_type).collect()
}

pub fn count_type(events: &[DisplayEvent], event_type: &str) -> usize {
    events.iter().filter(|e| e.event_type() == event_type).count()
}

/// Concatenated `agent.speaking` text.
pub fn spoken_text(events: &[DisplayEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            DisplayEvent::Speaking { delta } => Some(delta.as_str()),
            _ => None,
        })
        .collect()
}
