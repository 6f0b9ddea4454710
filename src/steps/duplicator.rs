//! Step that duplicates incoming messages to every fan-out destination.

use crate::error::Result;
use crate::message::Message;
use crate::step::{Outputs, Step, StepError};

/// Forwards each input to all registered fan-out branches, creating parallel
/// processing paths (e.g. chat response → TTS and transcript display).
///
/// Branch tagging and per-copy attribute isolation are handled by
/// [`Outputs::emit`]; this step contributes the graph position and stats.
pub struct DuplicatorStep {
    name: String,
    duplicated: u64,
}

impl DuplicatorStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            duplicated: 0,
        }
    }

    /// Number of messages duplicated so far.
    pub fn duplicated(&self) -> u64 {
        self.duplicated
    }
}

impl Step for DuplicatorStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, outputs: &Outputs) -> Result<()> {
        if outputs.fanout_len() == 0 {
            tracing::warn!(step = %self.name, "duplicator has no fan-out destinations wired");
        } else {
            tracing::info!(step = %self.name, branches = outputs.fanout_len(), "duplicator ready");
        }
        Ok(())
    }

    fn handle(&mut self, message: Message, outputs: &Outputs) -> std::result::Result<(), StepError> {
        outputs.emit(message);
        self.duplicated += 1;
        Ok(())
    }

    fn cleanup(&mut self) {
        self.duplicated = 0;
    }
}
