use std::collections::VecDeque;

use crate::geo::{format_distance, Position};
use crate::places::Place;
use crate::search::NearbyNote;

pub const MSG_SEARCH_THROTTLED: &str = "Please wait before searching again.";
pub const MSG_NO_RESULTS: &str = "No results";
pub const MSG_SEARCH_FAILED: &str = "Search failed";
pub const MSG_SAVE_FAILED: &str = "Failed to save note";
pub const MSG_DELETE_FAILED: &str = "Failed to delete note";
pub const MSG_NO_SELECTION: &str = "Please select a location first";
pub const MSG_TITLE_REQUIRED: &str = "Title is required";
pub const MSG_LOCATE_FAILED: &str = "Unable to retrieve your location";
pub const MSG_LOAD_FAILED: &str = "Failed to load notes";

/// Where the place-search flow currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchPhase {
    #[default]
    Idle,
    Searching,
    Found,
    Empty,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// Blank query; nothing happened.
    Ignored,
    /// Arrived inside the rate-limit window; no request was sent.
    Throttled,
    Found(Place),
    Empty,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved { id: i64 },
    Rejected,
    Failed,
}

/// Everything a front end renders: two status lines, the nearby list, whether
/// the note form is open and pending one-shot alerts.
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    pub search_text: String,
    pub location_text: String,
    pub form_open: bool,
    pub nearby: Vec<NearbyNote>,
    alerts: VecDeque<String>,
}

impl ViewState {
    pub fn alert(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(%message, "alert raised");
        self.alerts.push_back(message);
    }

    pub fn take_alerts(&mut self) -> Vec<String> {
        self.alerts.drain(..).collect()
    }

    pub fn pending_alerts(&self) -> impl Iterator<Item = &str> {
        self.alerts.iter().map(String::as_str)
    }

    pub fn show_position(&mut self, position: &Position) {
        self.location_text = describe_position(position);
    }

    pub fn nearby_lines(&self) -> Vec<String> {
        self.nearby
            .iter()
            .map(|entry| {
                format!(
                    "#{}  {}  ({})",
                    entry.note.id,
                    entry.note.title,
                    format_distance(entry.distance_m)
                )
            })
            .collect()
    }
}

pub fn describe_position(position: &Position) -> String {
    let mut text = format!(
        "Lat: {:.6}, Lon: {:.6}",
        position.latitude, position.longitude
    );
    if let Some(accuracy) = position.accuracy {
        text.push_str(&format!(" (±{accuracy:.0} m)"));
    }
    text
}
