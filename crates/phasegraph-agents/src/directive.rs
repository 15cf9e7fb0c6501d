use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::debug;

use phasegraph_core::error::Result;
use phasegraph_core::traits::TextGenerator;
use phasegraph_core::types::{GenerationDelta, GenerationRequest};

/// An offline generator for running agents without a language model.
///
/// It restates the first line of the phase prompt as its spoken text and
/// turns every line of the user's message that starts with `/` into a
/// command:
///
/// ```text
/// /set_preferences {"pace": "relaxed"}
/// /confirm_plan
/// ```
///
/// Input that is not valid JSON is passed through as a string so the
/// engine reports it as a malformed command.
#[derive(Debug, Clone, Default)]
pub struct DirectiveGenerator {
    quiet: bool,
}

impl DirectiveGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit commands only, no text.
    pub fn quiet() -> Self {
        Self { quiet: true }
    }

    fn deltas(&self, request: &GenerationRequest) -> Vec<GenerationDelta> {
        let mut deltas = Vec::new();

        if !self.quiet {
            if let Some(line) = request.prompt.lines().find(|l| !l.trim().is_empty()) {
                deltas.push(GenerationDelta::Text(format!("{}\n", line.trim())));
            }
        }

        if let Some(message) = &request.user_message {
            deltas.extend(message.lines().filter_map(parse_directive));
        }

        deltas.push(GenerationDelta::Done);
        deltas
    }
}

/// Parse `/name [json]` into a command delta.
pub fn parse_directive(line: &str) -> Option<GenerationDelta> {
    let rest = line.trim().strip_prefix('/')?;
    let (name, input) = match rest.split_once(char::is_whitespace) {
        Some((name, input)) => (name, input.trim()),
        None => (rest, ""),
    };
    if name.is_empty() {
        return None;
    }

    let input = if input.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(input).unwrap_or_else(|_| serde_json::Value::String(input.to_string()))
    };
    Some(GenerationDelta::Command {
        name: name.to_string(),
        input,
    })
}

impl TextGenerator for DirectiveGenerator {
    fn generate(
        &self,
        request: GenerationRequest,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<GenerationDelta>>>> {
        Box::pin(async move {
            let deltas = self.deltas(&request);
            debug!(deltas = deltas.len(), "Directive generation");
            Ok(stream::iter(deltas.into_iter().map(Ok)).boxed())
        })
    }
}
