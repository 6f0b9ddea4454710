//! Step that reassembles streamed text fragments into whole sentences.
//!
//! LLM tokens and partial transcripts arrive as arbitrary fragments; TTS
//! engines want complete sentences. This step accumulates fragments and emits
//! on true sentence boundaries, flushing the remainder on end-of-stream.

use crate::message::{ControlSignal, Message, MessageKind};
use crate::step::{Outputs, Step, StepError};

/// Accumulates text chunks and emits complete sentences downstream.
///
/// The accumulation buffer is step-local state: it is only touched inside
/// `handle`, so per-queue in-order dispatch keeps it consistent without locks.
pub struct SentenceAssemblerStep {
    name: String,
    buffer: String,
    emitted: u64,
}

impl SentenceAssemblerStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            buffer: String::new(),
            emitted: 0,
        }
    }

    /// Appends a fragment and returns any complete sentences now available.
    fn push_chunk(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut sentences = Vec::new();

        loop {
            match find_sentence_end(&self.buffer) {
                Some(end) => {
                    let sentence: String = self.buffer[..end].trim().to_string();
                    self.buffer.drain(..end);
                    if !sentence.is_empty() {
                        sentences.push(sentence);
                    }
                }
                None => break,
            }
        }
        sentences
    }

    /// Takes whatever is buffered as a final partial sentence.
    fn take_remainder(&mut self) -> Option<String> {
        let remainder = self.buffer.trim().to_string();
        self.buffer.clear();
        (!remainder.is_empty()).then_some(remainder)
    }

    fn emit_sentence(&mut self, sentence: String, source: &Message, outputs: &Outputs) {
        let mut out = Message::text(sentence);
        // Forwarded attributes (session id in particular) propagate unchanged
        out.attributes = source.attributes.clone();
        outputs.emit(out);
        self.emitted += 1;
    }
}

/// Byte offset one past a true sentence boundary, if the buffer contains one.
///
/// A terminator counts only when followed by whitespace (or more terminators)
/// and, for '.', when it is not a decimal point or a single-letter initial:
/// "3.5 volts" and "J. Dupont" stay unbroken.
fn find_sentence_end(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if !matches!(b, b'.' | b'!' | b'?') {
            continue;
        }
        // Must be followed by whitespace; a terminator at the very end of the
        // buffer may still be mid-stream ("3." awaiting "5"), so wait.
        let Some(&next) = bytes.get(i + 1) else {
            continue;
        };
        if !next.is_ascii_whitespace() {
            continue;
        }
        if b == b'.' {
            let prev = i.checked_sub(1).map(|p| bytes[p]);
            let next_relevant = bytes[i + 1..]
                .iter()
                .copied()
                .find(|c| !c.is_ascii_whitespace());
            // Decimal point split across chunks: "3." then "5"
            if prev.is_some_and(|p| p.is_ascii_digit())
                && next_relevant.is_some_and(|c| c.is_ascii_digit())
            {
                continue;
            }
            // Single-letter initial: "J. Dupont"
            if is_initial(text, i) {
                continue;
            }
        }
        return Some(i + 1);
    }
    None
}

fn is_initial(text: &str, dot: usize) -> bool {
    let before = &text[..dot];
    match before.chars().next_back() {
        Some(c) if c.is_ascii_uppercase() => {
            // Uppercase letter preceded by start-of-text or whitespace
            before
                .chars()
                .rev()
                .nth(1)
                .is_none_or(|prev| prev.is_whitespace())
        }
        _ => false,
    }
}

impl Step for SentenceAssemblerStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&mut self, message: Message, outputs: &Outputs) -> std::result::Result<(), StepError> {
        match message.kind {
            MessageKind::Data => {
                let Some(chunk) = message.as_text().map(str::to_string) else {
                    // Non-text payloads pass through untouched
                    outputs.emit(message);
                    return Ok(());
                };
                for sentence in self.push_chunk(&chunk) {
                    self.emit_sentence(sentence, &message, outputs);
                }
                Ok(())
            }
            MessageKind::Control => {
                match message.control_signal() {
                    Some(ControlSignal::EndOfStream) => {
                        if let Some(remainder) = self.take_remainder() {
                            self.emit_sentence(remainder, &message, outputs);
                        }
                    }
                    Some(ControlSignal::Reset) => {
                        self.buffer.clear();
                    }
                    None => {}
                }
                // Control signals propagate so downstream steps can react
                outputs.emit(message);
                Ok(())
            }
            MessageKind::Error => {
                outputs.emit(message);
                Ok(())
            }
        }
    }

    fn cleanup(&mut self) {
        self.buffer.clear();
        self.emitted = 0;
    }
}
