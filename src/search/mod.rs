use std::cmp::Ordering;

use crate::config::DEFAULT_FILTER_RADIUS_M;
use crate::error::AppResult;
use crate::geo::{haversine_distance, Position};
use crate::storage::{NoteRecord, NoteStore};

/// Predicates for [`search_notes`]. All supplied predicates must hold; an
/// omitted one always passes. The radius applies only when both coordinates
/// are present.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteFilter {
    pub text: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius: f64,
}

impl Default for NoteFilter {
    fn default() -> Self {
        Self {
            text: None,
            latitude: None,
            longitude: None,
            radius: DEFAULT_FILTER_RADIUS_M,
        }
    }
}

impl NoteFilter {
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn near(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn within(mut self, radius: f64) -> Self {
        self.radius = radius;
        self
    }

    pub fn center(&self) -> Option<Position> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(Position::new(lat, lon)),
            _ => None,
        }
    }

    /// Lowercased search term, or `None` when no (or an empty) term was given.
    pub fn term(&self) -> Option<String> {
        self.text
            .as_deref()
            .filter(|text| !text.is_empty())
            .map(str::to_lowercase)
    }
}

fn matches_text(note: &NoteRecord, lowered_term: &str) -> bool {
    note.title.to_lowercase().contains(lowered_term)
        || note.body.to_lowercase().contains(lowered_term)
}

fn within_radius(note: &NoteRecord, center: &Position, radius: f64) -> bool {
    haversine_distance(center.latitude, center.longitude, note.latitude, note.longitude) <= radius
}

pub fn filter_notes(notes: Vec<NoteRecord>, filter: &NoteFilter) -> Vec<NoteRecord> {
    let term = filter.term();
    let center = filter.center();
    notes
        .into_iter()
        .filter(|note| {
            term.as_deref().map_or(true, |t| matches_text(note, t))
                && center
                    .as_ref()
                    .map_or(true, |c| within_radius(note, c, filter.radius))
        })
        .collect()
}

pub async fn search_notes(store: &dyn NoteStore, filter: &NoteFilter) -> AppResult<Vec<NoteRecord>> {
    let notes = store.get_all_notes().await?;
    let total = notes.len();
    let matched = filter_notes(notes, filter);
    tracing::debug!(total, matched = matched.len(), "filtered notes");
    Ok(matched)
}

/// Notes whose distance from (`latitude`, `longitude`) is at most `radius` meters.
pub async fn notes_by_radius(
    store: &dyn NoteStore,
    latitude: f64,
    longitude: f64,
    radius: f64,
) -> AppResult<Vec<NoteRecord>> {
    let filter = NoteFilter::default().near(latitude, longitude).within(radius);
    search_notes(store, &filter).await
}

#[derive(Debug, Clone, PartialEq)]
pub struct NearbyNote {
    pub note: NoteRecord,
    pub distance_m: f64,
}

/// Notes within `radius` of `center`, closest first; equal distances list the
/// newer note first.
pub async fn nearby_notes(
    store: &dyn NoteStore,
    center: &Position,
    radius: f64,
) -> AppResult<Vec<NearbyNote>> {
    let notes = store.get_all_notes().await?;
    Ok(rank_by_distance(notes, center, radius))
}

pub fn rank_by_distance(notes: Vec<NoteRecord>, center: &Position, radius: f64) -> Vec<NearbyNote> {
    let mut nearby: Vec<NearbyNote> = notes
        .into_iter()
        .filter_map(|note| {
            let distance_m = center.distance_to(&note.position());
            (distance_m <= radius).then_some(NearbyNote { note, distance_m })
        })
        .collect();
    nearby.sort_by(|a, b| {
        match a
            .distance_m
            .partial_cmp(&b.distance_m)
            .unwrap_or(Ordering::Equal)
        {
            Ordering::Equal => b.note.id.cmp(&a.note.id),
            other => other,
        }
    });
    nearby
}
