//! Source step that pushes a system prompt into the chat step at startup.

use crate::error::Result;
use crate::message::Message;
use crate::step::{Outputs, Step, StepError};

/// Attribute marking a message as a system-prompt update for the chat step.
pub const ATTR_PROMPT_UPDATE: &str = "system_prompt_update";

const DEFAULT_PROMPT: &str = "You are a helpful, concise voice assistant.";

/// A step with no input queue: it only produces, emitting the configured
/// prompt once during `init` (after wiring is resolved, before traffic).
pub struct PromptSourceStep {
    name: String,
    template: String,
}

impl PromptSourceStep {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        let template = template.into();
        Self {
            name: name.into(),
            template: if template.is_empty() {
                DEFAULT_PROMPT.to_string()
            } else {
                template
            },
        }
    }
}

impl Step for PromptSourceStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_input(&self) -> bool {
        false
    }

    fn init(&mut self, outputs: &Outputs) -> Result<()> {
        let message = Message::text(self.template.clone())
            .with_attr(ATTR_PROMPT_UPDATE, true)
            .with_attr("source", self.name.clone());
        outputs.emit(message);
        tracing::info!(step = %self.name, "system prompt emitted");
        Ok(())
    }

    fn handle(&mut self, _message: Message, _outputs: &Outputs) -> std::result::Result<(), StepError> {
        // Never called: this step has no input queue.
        Ok(())
    }
}
