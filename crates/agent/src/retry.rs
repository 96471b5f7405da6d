//! Repeated-action detection.
//!
//! Each dispatched action is reduced to an [`ActionSignature`]. When the
//! same signature shows up on consecutive steps, the tracker produces a note
//! that is prepended to the next user turn so the model knows it is stuck.

use droidpilot_core::action::{Action, Point, StructuredAction};
use serde::{Deserialize, Serialize};

use crate::i18n::Lang;

/// Display cap for typed text in a signature target.
const TEXT_TARGET_MAX: usize = 50;

/// Normalized fingerprint of an action, used only for repetition checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSignature {
    pub kind: String,
    pub target: String,
}

impl ActionSignature {
    pub fn new(kind: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            target: target.into(),
        }
    }
}

/// Compute the signature of a dispatched action.
pub fn signature_of(action: &StructuredAction) -> ActionSignature {
    let target = match action {
        StructuredAction::Finish { message } => message.clone(),
        StructuredAction::Do(inner) => match inner {
            Action::Launch { app } => app.clone(),
            Action::Tap { element, .. }
            | Action::DoubleTap { element }
            | Action::LongPress { element } => element.map(|p| p.to_string()).unwrap_or_default(),
            Action::Swipe { start, end } => swipe_target(*start, *end),
            Action::Type { text } | Action::TypeName { text } => {
                format!("text='{}'", truncate(text, TEXT_TARGET_MAX))
            }
            Action::Wait { duration } => duration.clone(),
            Action::Back | Action::Home => "navigation".to_string(),
            Action::TakeOver { message } => message.clone(),
            Action::Interact
            | Action::Note { .. }
            | Action::CallApi { .. }
            | Action::Unrecognized { .. } => String::new(),
        },
    };
    ActionSignature::new(action.kind_name(), target)
}

fn swipe_target(start: Option<Point>, end: Option<Point>) -> String {
    match (start, end) {
        (Some(start), Some(end)) => format!("{start} -> {end}"),
        _ => String::new(),
    }
}

/// Cut `text` to at most `max` characters, ending in `...` when cut.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// The last classified action and how many times in a row it was seen.
///
/// `count` is 0 only before any action with a kind has been recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    pub last_kind: Option<String>,
    pub last_target: Option<String>,
    pub count: u32,
}

/// Tracks consecutive repeats of the same action signature.
#[derive(Debug, Clone)]
pub struct RetryTracker {
    state: RetryState,
    /// Count at which the escalation clause is appended; 0 disables it.
    threshold: u32,
    lang: Lang,
}

impl RetryTracker {
    pub fn new(threshold: u32, lang: Lang) -> Self {
        Self {
            state: RetryState::default(),
            threshold,
            lang,
        }
    }

    pub fn state(&self) -> &RetryState {
        &self.state
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Record the signature of the action just dispatched.
    pub fn update(&mut self, signature: &ActionSignature) -> &RetryState {
        let kind = (!signature.kind.is_empty()).then(|| signature.kind.clone());

        let repeat = kind.is_some()
            && self.state.last_kind == kind
            && self.state.last_target.as_deref() == Some(signature.target.as_str());

        if repeat {
            self.state.count += 1;
        } else {
            self.state.count = u32::from(kind.is_some());
            self.state.last_kind = kind;
            self.state.last_target = Some(signature.target.clone());
        }

        tracing::trace!(
            kind = %signature.kind,
            target = %signature.target,
            count = self.state.count,
            "Retry state updated"
        );
        &self.state
    }

    /// The advisory note for the next user turn, if any.
    pub fn note(&self) -> Option<String> {
        let kind = self.state.last_kind.as_deref()?;
        if self.state.count == 0 {
            return None;
        }

        let target = self.state.last_target.as_deref().unwrap_or_default();
        let mut note = self.lang.retry_note(kind, target, self.state.count);
        if self.threshold > 0 && self.state.count >= self.threshold {
            note.push_str(self.lang.escalation());
        }
        Some(note)
    }

    /// Prepend the current note, if any, to `text`.
    pub fn compose(&self, text: &str) -> String {
        match self.note() {
            Some(note) => format!("{note}\n\n{text}"),
            None => text.to_string(),
        }
    }

    pub fn reset(&mut self) {
        self.state = RetryState::default();
    }
}
