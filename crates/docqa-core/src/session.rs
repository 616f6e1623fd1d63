//! Conversation session: ordered turns plus the transcript fed to prompts.
//!
//! A [`Session`] is owned by the caller and borrowed mutably for each
//! exchange. History only grows through [`Session::record`] and only
//! shrinks through [`Session::reset`].

use crate::models::ConversationTurn;

/// Ordered conversation history.
#[derive(Debug, Clone, Default)]
pub struct Session {
    turns: Vec<ConversationTurn>,
    transcript: String,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a transcript produced elsewhere (e.g. a previous process).
    ///
    /// The transcript is used verbatim; no turns are reconstructed from it.
    pub fn with_transcript(transcript: impl Into<String>) -> Self {
        Self {
            turns: Vec::new(),
            transcript: transcript.into(),
        }
    }

    /// Append a finished exchange and extend the transcript with
    /// `"User: {question}\nAssistant: {answer}\n"`.
    pub fn record(&mut self, turn: ConversationTurn) {
        self.transcript.push_str("User: ");
        self.transcript.push_str(&turn.question);
        self.transcript.push_str("\nAssistant: ");
        self.transcript.push_str(&turn.answer);
        self.transcript.push('\n');
        self.turns.push(turn);
    }

    /// Forget everything.
    pub fn reset(&mut self) {
        self.turns.clear();
        self.transcript.clear();
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Flattened history text for the prompt's history slot.
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty() && self.transcript.is_empty()
    }
}
