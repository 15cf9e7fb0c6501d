use futures::StreamExt;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use phasegraph_core::error::Result;
use phasegraph_core::traits::TextGenerator;
use phasegraph_core::types::{DisplayEvent, GenerationDelta, GenerationRequest};

use crate::agent::{Agent, TurnContext};
use crate::command::{decode_command, rejection_event, ApplyCommand};
use crate::phase::Phase;

/// What a generation pass produced, after streaming and command application.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOutput {
    /// Full text streamed to the user.
    pub text: String,
    pub thinking: String,
    /// Names of the commands that were applied, in order.
    pub applied: Vec<String>,
    /// `(command, reason)` for every refused command.
    pub rejected: Vec<(String, String)>,
}

impl GenerationOutput {
    pub fn applied(&self, name: &str) -> bool {
        self.applied.iter().any(|n| n == name)
    }
}

impl<'t, A: Agent + ?Sized> TurnContext<'t, A> {
    /// Stream a generation into the turn.
    ///
    /// Text deltas become `agent.speaking` events as they arrive. Commands
    /// are decoded into `C` and applied to the context in arrival order;
    /// a command that is not allowed for this request, cannot be decoded, or
    /// is refused by its own apply step produces a `data.command_rejected`
    /// event instead. Stream errors end the phase with that error.
    pub async fn generate<C>(
        &mut self,
        generator: &dyn TextGenerator,
        request: GenerationRequest,
    ) -> Result<GenerationOutput>
    where
        C: DeserializeOwned + ApplyCommand<A::State>,
    {
        let allowed = request.allowed_commands.clone();
        let mut stream = generator.generate(request).await?;
        let mut output = GenerationOutput::default();

        while let Some(delta) = stream.next().await {
            match delta? {
                GenerationDelta::Text(text) => {
                    self.emit(DisplayEvent::speaking(text.clone()));
                    output.text.push_str(&text);
                }
                GenerationDelta::Thinking(text) => {
                    self.emit(DisplayEvent::thinking(text.clone()));
                    output.thinking.push_str(&text);
                }
                GenerationDelta::Command { name, input } => {
                    if !allowed.is_empty() && !allowed.iter().any(|a| a == &name) {
                        let reason = format!("'{}' is not available in this phase", name);
                        self.reject(&mut output, name, reason);
                        continue;
                    }
                    let command = match decode_command::<C>(&name, &input) {
                        Ok(command) => command,
                        Err(e) => {
                            self.reject(&mut output, name, e.to_string());
                            continue;
                        }
                    };
                    let outcome = command.apply(&mut *self.context);
                    for event in outcome.events {
                        self.emit(event);
                    }
                    match outcome.rejection {
                        Some(reason) => self.reject(&mut output, name, reason),
                        None => {
                            debug!(phase = self.phase.name(), command = %name, "Applied command");
                            output.applied.push(name);
                        }
                    }
                }
                GenerationDelta::Done => break,
            }
        }

        Ok(output)
    }

    fn reject(&self, output: &mut GenerationOutput, name: String, reason: String) {
        warn!(phase = self.phase.name(), command = %name, %reason, "Command rejected");
        self.emit(rejection_event(&name, &reason));
        output.rejected.push((name, reason));
    }
}
