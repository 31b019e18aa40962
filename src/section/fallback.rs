//! Fallback selection
//!
//! Maps a failed [`SectionLoadState`] to the panel shown in place of the
//! section. Some sections carry bespoke copy; the rest get a generic panel.

use serde::Serialize;

use crate::error::FailureKind;
use crate::section::{LoadStatus, SectionId, SectionLoadState};

// == Actions ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackAction {
    /// Call the guard's `retry()`
    Retry,
    /// Reload the whole page
    Reload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionButton {
    pub label: String,
    pub action: FallbackAction,
}

impl ActionButton {
    fn new(label: impl Into<String>, action: FallbackAction) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }

    fn refresh_page() -> Self {
        Self::new("Refresh Page", FallbackAction::Reload)
    }
}

// == Fallback ==
/// A panel rendered instead of a section's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fallback {
    pub section: SectionId,
    pub title: String,
    pub message: String,
    pub actions: Vec<ActionButton>,
    /// Technical detail, rendered collapsed
    pub detail: Option<String>,
    /// Whether the copy is specific to this section
    pub bespoke: bool,
}

/// What to render for a section right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Presentation {
    Loading { section: SectionId },
    Ready { section: SectionId },
    Fallback(Fallback),
}

impl Presentation {
    pub fn fallback(&self) -> Option<&Fallback> {
        match self {
            Presentation::Fallback(fallback) => Some(fallback),
            _ => None,
        }
    }
}

// == Selection ==
/// Picks the fallback for a failed state; `None` while loading or ready.
pub fn select_fallback(state: &SectionLoadState) -> Option<Fallback> {
    match state.status {
        LoadStatus::TimedOut => Some(
            bespoke_timeout(&state.section).unwrap_or_else(|| generic_timeout(&state.section)),
        ),
        LoadStatus::Errored => Some(errored(state)),
        _ => None,
    }
}

fn bespoke_timeout(section: &SectionId) -> Option<Fallback> {
    let (title, message, retry_label) = match section.as_str() {
        "dashboard" => (
            "Dashboard is taking longer than usual",
            "Your overview is still being assembled. You can reload just the dashboard or refresh the page.",
            "Reload Dashboard",
        ),
        "insights" | "analytics" => (
            "Insights are still crunching",
            "Analysing your history takes a while on large accounts.",
            "Reload Insights",
        ),
        "ai-coach" => (
            "Coach is unavailable right now",
            "Suggestions could not be prepared in time.",
            "Ask Again",
        ),
        _ => return None,
    };
    Some(Fallback {
        section: section.clone(),
        title: title.to_string(),
        message: message.to_string(),
        actions: vec![
            ActionButton::new(retry_label, FallbackAction::Retry),
            ActionButton::refresh_page(),
        ],
        detail: None,
        bespoke: true,
    })
}

fn generic_timeout(section: &SectionId) -> Fallback {
    Fallback {
        section: section.clone(),
        title: format!("{} timed out", section.title()),
        message: "This section did not load in time.".to_string(),
        actions: vec![
            ActionButton::new("Try Again", FallbackAction::Retry),
            ActionButton::refresh_page(),
        ],
        detail: None,
        bespoke: false,
    }
}

fn errored(state: &SectionLoadState) -> Fallback {
    let report = state.last_error.as_ref();
    let kind = report.map_or(FailureKind::Generic, |r| r.kind);
    let detail = report.and_then(|r| r.detail.clone().or_else(|| Some(r.message.clone())));

    let message = match kind {
        FailureKind::CircuitOpen => {
            "This section failed several times in a row and is paused briefly.".to_string()
        }
        FailureKind::Timeout => "This section is responding slowly.".to_string(),
        FailureKind::Generic => report
            .map(|r| r.message.clone())
            .unwrap_or_else(|| "Something went wrong.".to_string()),
    };

    Fallback {
        section: state.section.clone(),
        title: format!("{} could not be loaded", state.section.title()),
        message,
        actions: vec![
            ActionButton::new("Try Again", FallbackAction::Retry),
            ActionButton::refresh_page(),
        ],
        detail,
        bespoke: false,
    }
}
