use std::sync::Arc;

use time::format_description::well_known::Rfc3339;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::geo::Position;
use crate::geolocate::Geolocator;
use crate::location::LocationStore;
use crate::places::PlaceSearch;
use crate::search::{self, NoteFilter};
use crate::storage::{NoteRecord, NoteStore};

mod rate_limit;
pub mod state;

pub use rate_limit::{Clock, RateLimiter, SystemClock};
pub use state::{SaveOutcome, SearchOutcome, SearchPhase, ViewState};

use state::{
    MSG_DELETE_FAILED, MSG_LOAD_FAILED, MSG_LOCATE_FAILED, MSG_NO_RESULTS, MSG_NO_SELECTION,
    MSG_SAVE_FAILED, MSG_SEARCH_FAILED, MSG_SEARCH_THROTTLED, MSG_TITLE_REQUIRED,
};

#[derive(Debug, Clone, Copy)]
pub struct ControllerOptions {
    pub min_search_interval_ms: u64,
    pub nearby_radius_m: f64,
}

impl From<&AppConfig> for ControllerOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            min_search_interval_ms: config.search.min_interval_ms,
            nearby_radius_m: config.location.nearby_radius_m,
        }
    }
}

/// Services the front end talks to.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn NoteStore>,
    pub geolocator: Arc<dyn Geolocator>,
    pub places: Arc<dyn PlaceSearch>,
    pub clock: Arc<dyn Clock>,
}

/// Drives the capture-a-place, write-a-note flow. Handlers take `&mut self`,
/// so two of them never interleave; every failure is turned into an alert or
/// status text here and goes no further.
pub struct Controller {
    services: Services,
    options: ControllerOptions,
    location: LocationStore,
    limiter: RateLimiter,
    view: ViewState,
    phase: SearchPhase,
    last_note_id: i64,
}

impl Controller {
    pub fn new(services: Services, options: ControllerOptions) -> Self {
        Self {
            services,
            options,
            location: LocationStore::default(),
            limiter: RateLimiter::new(options.min_search_interval_ms),
            view: ViewState::default(),
            phase: SearchPhase::Idle,
            last_note_id: 0,
        }
    }

    pub fn with_location(mut self, location: LocationStore) -> Self {
        self.location = location;
        self
    }

    pub fn location(&self) -> &LocationStore {
        &self.location
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn phase(&self) -> SearchPhase {
        self.phase
    }

    pub fn take_alerts(&mut self) -> Vec<String> {
        self.view.take_alerts()
    }

    pub fn set_nearby_radius(&mut self, radius_m: f64) {
        self.options.nearby_radius_m = radius_m;
    }

    /// Asks the device for a fix; on success both position slots move to it.
    pub async fn locate(&mut self) -> Option<Position> {
        match self.services.geolocator.current_position().await {
            Ok(position) => {
                tracing::info!(
                    lat = position.latitude,
                    lon = position.longitude,
                    "device position updated"
                );
                self.location.apply_device_fix(position);
                self.view.show_position(&position);
                self.refresh_nearby().await;
                Some(position)
            }
            Err(err) => {
                tracing::warn!(%err, "device position unavailable");
                self.view.alert(MSG_LOCATE_FAILED);
                None
            }
        }
    }

    pub async fn submit_search(&mut self, query: &str) -> SearchOutcome {
        let query = query.trim();
        if query.is_empty() {
            self.phase = SearchPhase::Idle;
            return SearchOutcome::Ignored;
        }
        if !self.limiter.try_acquire(self.services.clock.now_ms()) {
            tracing::debug!(query, "place search throttled");
            self.view.alert(MSG_SEARCH_THROTTLED);
            return SearchOutcome::Throttled;
        }

        self.phase = SearchPhase::Searching;
        tracing::info!(query, "searching for place");
        let first = match self.services.places.search(query).await {
            Ok(places) => places.into_iter().next(),
            Err(err) => {
                tracing::warn!(%err, query, "place search failed");
                self.view.search_text = MSG_SEARCH_FAILED.to_string();
                self.phase = SearchPhase::Failed;
                return SearchOutcome::Failed;
            }
        };

        let Some(place) = first else {
            self.view.search_text = MSG_NO_RESULTS.to_string();
            self.phase = SearchPhase::Empty;
            return SearchOutcome::Empty;
        };

        // Open first: a device fix taken while opening would otherwise
        // overwrite the place the user just picked.
        self.open_note_form().await;
        self.location.apply_search_result(place.position());
        self.view.search_text = place.display_name.clone();
        self.phase = SearchPhase::Found;
        SearchOutcome::Found(place)
    }

    pub async fn open_note_form(&mut self) {
        self.view.form_open = true;
        if self.location.current().is_none() {
            self.locate().await;
        }
    }

    pub async fn toggle_note_form(&mut self) {
        if self.view.form_open {
            self.cancel_note_form();
        } else {
            self.open_note_form().await;
        }
    }

    /// Hides the form and clears search feedback; the selected position stays.
    pub fn cancel_note_form(&mut self) {
        self.view.form_open = false;
        self.view.search_text.clear();
    }

    pub async fn save_note(&mut self, title: &str, body: &str) -> SaveOutcome {
        let note = match self.build_note(title, body) {
            Ok(note) => note,
            Err(err) => {
                tracing::debug!(%err, "note rejected");
                let message = match err {
                    AppError::Validation(message) => message,
                    other => other.to_string(),
                };
                self.view.alert(message);
                return SaveOutcome::Rejected;
            }
        };

        let outcome = match self.services.store.add_note(&note).await {
            Ok(()) => {
                tracing::info!(id = note.id, title = %note.title, "note saved");
                self.view.form_open = false;
                self.refresh_nearby().await;
                SaveOutcome::Saved { id: note.id }
            }
            Err(err) => {
                tracing::error!(%err, id = note.id, "saving note failed");
                self.view.alert(MSG_SAVE_FAILED);
                SaveOutcome::Failed
            }
        };
        self.view.search_text.clear();
        outcome
    }

    fn build_note(&mut self, title: &str, body: &str) -> Result<NoteRecord, AppError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::Validation(MSG_TITLE_REQUIRED.to_string()));
        }
        let Some(selected) = self.location.selected().copied() else {
            return Err(AppError::Validation(MSG_NO_SELECTION.to_string()));
        };
        let now = self.services.clock.now();
        let created_at = now
            .format(&Rfc3339)
            .unwrap_or_else(|_| now.unix_timestamp().to_string());
        Ok(NoteRecord {
            id: self.next_note_id(),
            title: title.to_string(),
            body: body.to_string(),
            latitude: selected.latitude,
            longitude: selected.longitude,
            created_at,
        })
    }

    /// Creation time in milliseconds, bumped when two notes land on the same tick.
    fn next_note_id(&mut self) -> i64 {
        let id = self
            .services
            .clock
            .now_ms()
            .max(self.last_note_id.saturating_add(1));
        self.last_note_id = id;
        id
    }

    pub async fn delete_note(&mut self, id: i64) -> bool {
        match self.services.store.delete_note(id).await {
            Ok(()) => {
                tracing::info!(id, "note deleted");
                self.refresh_nearby().await;
                true
            }
            Err(err) => {
                tracing::error!(%err, id, "deleting note failed");
                self.view.alert(MSG_DELETE_FAILED);
                false
            }
        }
    }

    /// Rebuilds the nearby list around the current position. Without a
    /// current position there is nothing to measure from and the list is left alone.
    pub async fn refresh_nearby(&mut self) {
        let Some(current) = self.location.current().copied() else {
            tracing::debug!("no current position, skipping nearby refresh");
            return;
        };
        match search::nearby_notes(
            self.services.store.as_ref(),
            &current,
            self.options.nearby_radius_m,
        )
        .await
        {
            Ok(nearby) => self.view.nearby = nearby,
            Err(err) => {
                tracing::error!(%err, "loading nearby notes failed");
                self.view.alert(MSG_LOAD_FAILED);
            }
        }
    }

    pub async fn find_notes(&mut self, filter: &NoteFilter) -> Vec<NoteRecord> {
        match search::search_notes(self.services.store.as_ref(), filter).await {
            Ok(notes) => notes,
            Err(err) => {
                tracing::error!(%err, "note search failed");
                self.view.alert(MSG_LOAD_FAILED);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use assert_matches::assert_matches;

    use super::*;
    use crate::places::Place;
    use crate::testing::{note_at, ManualClock, MemoryStore, MockGeolocator, MockPlaces};

    struct Harness {
        store: Arc<MemoryStore>,
        places: Arc<MockPlaces>,
        geo: Arc<MockGeolocator>,
        clock: Arc<ManualClock>,
        controller: Controller,
    }

    fn harness(places: MockPlaces, geo: MockGeolocator) -> Harness {
        let store = Arc::new(MemoryStore::default());
        let places = Arc::new(places);
        let geo = Arc::new(geo);
        let clock = Arc::new(ManualClock::at(1_700_000_000_000));
        let services = Services {
            store: store.clone(),
            geolocator: geo.clone(),
            places: places.clone(),
            clock: clock.clone(),
        };
        let controller = Controller::new(
            services,
            ControllerOptions {
                min_search_interval_ms: 1000,
                nearby_radius_m: 1000.0,
            },
        );
        Harness {
            store,
            places,
            geo,
            clock,
            controller,
        }
    }

    fn foo() -> Place {
        Place {
            latitude: 1.0,
            longitude: 2.0,
            display_name: "Foo".into(),
        }
    }

    #[tokio::test]
    async fn search_hit_selects_place_and_opens_form() {
        let mut h = harness(MockPlaces::returning(vec![foo()]), MockGeolocator::unavailable());

        let outcome = h.controller.submit_search("foo").await;

        assert_eq!(outcome, SearchOutcome::Found(foo()));
        assert_eq!(h.controller.phase(), SearchPhase::Found);
        assert_eq!(
            h.controller.location().selected(),
            Some(&Position::new(1.0, 2.0))
        );
        assert_eq!(h.controller.view().search_text, "Foo");
        assert!(h.controller.view().form_open);
        assert_eq!(h.places.queries.lock().unwrap().as_slice(), ["foo"]);
    }

    #[tokio::test]
    async fn search_result_wins_over_device_fix_taken_while_opening() {
        let mut h = harness(MockPlaces::returning(vec![foo()]), MockGeolocator::at(50.0, 8.0));

        h.controller.submit_search("foo").await;

        assert_eq!(h.geo.call_count(), 1);
        assert_eq!(
            h.controller.location().current(),
            Some(&Position::new(50.0, 8.0))
        );
        assert_eq!(
            h.controller.location().selected(),
            Some(&Position::new(1.0, 2.0))
        );
    }

    #[tokio::test]
    async fn saving_after_search_stores_selected_coordinates() {
        let mut h = harness(MockPlaces::returning(vec![foo()]), MockGeolocator::unavailable());
        h.controller.submit_search("foo").await;

        let outcome = h.controller.save_note("Lunch", "great noodles").await;

        let id = assert_matches!(outcome, SaveOutcome::Saved { id } => id);
        let stored = h.store.snapshot();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, id);
        assert_eq!((stored[0].latitude, stored[0].longitude), (1.0, 2.0));
        assert_eq!(stored[0].created_at, "2023-11-14T22:13:20Z");
        assert_eq!(h.controller.view().search_text, "");
        assert!(!h.controller.view().form_open);
    }

    #[tokio::test]
    async fn second_search_without_time_gap_is_throttled() {
        let mut h = harness(MockPlaces::returning(vec![foo()]), MockGeolocator::unavailable());
        h.controller.submit_search("foo").await;
        h.controller.take_alerts();

        let outcome = h.controller.submit_search("bar").await;

        assert_eq!(outcome, SearchOutcome::Throttled);
        assert_eq!(h.places.call_count(), 1);
        assert_eq!(
            h.controller.take_alerts(),
            vec!["Please wait before searching again.".to_string()]
        );
        assert_eq!(h.controller.phase(), SearchPhase::Found);
    }

    #[tokio::test]
    async fn search_is_accepted_again_after_interval() {
        let mut h = harness(MockPlaces::returning(vec![foo()]), MockGeolocator::unavailable());
        h.controller.submit_search("foo").await;
        h.clock.advance(1000);

        h.controller.submit_search("foo again").await;
        assert_eq!(h.places.call_count(), 2);
    }

    #[tokio::test]
    async fn empty_result_keeps_previous_selection() {
        let mut h = harness(MockPlaces::returning(vec![foo()]), MockGeolocator::unavailable());
        h.controller.submit_search("foo").await;
        h.places.respond_with(Ok(Vec::new()));
        h.clock.advance(5_000);

        let outcome = h.controller.submit_search("nowhere").await;

        assert_eq!(outcome, SearchOutcome::Empty);
        assert_eq!(h.controller.view().search_text, "No results");
        assert_eq!(
            h.controller.location().selected(),
            Some(&Position::new(1.0, 2.0))
        );
    }

    #[tokio::test]
    async fn failed_lookup_reports_and_keeps_selection() {
        let mut h = harness(MockPlaces::failing("offline"), MockGeolocator::at(3.0, 4.0));
        h.controller.locate().await;

        let outcome = h.controller.submit_search("foo").await;

        assert_eq!(outcome, SearchOutcome::Failed);
        assert_eq!(h.controller.phase(), SearchPhase::Failed);
        assert_eq!(h.controller.view().search_text, "Search failed");
        assert_eq!(
            h.controller.location().selected(),
            Some(&Position::new(3.0, 4.0))
        );
    }

    #[tokio::test]
    async fn blank_query_is_a_no_op() {
        let mut h = harness(MockPlaces::returning(vec![foo()]), MockGeolocator::unavailable());
        assert_eq!(h.controller.submit_search("   ").await, SearchOutcome::Ignored);
        assert_eq!(h.controller.phase(), SearchPhase::Idle);
        assert_eq!(h.places.call_count(), 0);

        // an ignored submission does not consume the rate-limit window
        assert_matches!(h.controller.submit_search("foo").await, SearchOutcome::Found(_));
    }

    #[tokio::test]
    async fn failed_write_alerts_and_clears_search_text() {
        let mut h = harness(MockPlaces::returning(vec![foo()]), MockGeolocator::unavailable());
        h.controller.submit_search("foo").await;
        h.store.fail_writes.store(true, Ordering::SeqCst);

        let outcome = h.controller.save_note("Lunch", "").await;

        assert_eq!(outcome, SaveOutcome::Failed);
        assert_eq!(h.controller.view().search_text, "");
        assert!(h
            .controller
            .take_alerts()
            .contains(&"Failed to save note".to_string()));
        assert!(h.store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn save_without_selection_is_rejected() {
        let mut h = harness(MockPlaces::returning(vec![]), MockGeolocator::unavailable());

        let outcome = h.controller.save_note("Somewhere", "").await;

        assert_eq!(outcome, SaveOutcome::Rejected);
        assert_eq!(
            h.controller.take_alerts(),
            vec!["Please select a location first".to_string()]
        );
        assert!(h.store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn save_requires_a_title() {
        let mut h = harness(MockPlaces::returning(vec![]), MockGeolocator::at(1.0, 1.0));
        h.controller.locate().await;

        assert_eq!(h.controller.save_note("  ", "body").await, SaveOutcome::Rejected);
        assert_eq!(h.controller.take_alerts(), vec!["Title is required".to_string()]);
    }

    #[tokio::test]
    async fn opening_form_locates_only_when_current_is_unknown() {
        let mut h = harness(MockPlaces::returning(vec![]), MockGeolocator::at(10.0, 20.0));

        h.controller.toggle_note_form().await;
        assert!(h.controller.view().form_open);
        assert_eq!(h.geo.call_count(), 1);
        assert_eq!(
            h.controller.view().location_text,
            "Lat: 10.000000, Lon: 20.000000"
        );

        h.controller.toggle_note_form().await;
        h.controller.toggle_note_form().await;
        assert_eq!(h.geo.call_count(), 1);
    }

    #[tokio::test]
    async fn closing_form_clears_feedback_but_not_selection() {
        let mut h = harness(MockPlaces::returning(vec![foo()]), MockGeolocator::unavailable());
        h.controller.submit_search("foo").await;

        h.controller.cancel_note_form();

        assert!(!h.controller.view().form_open);
        assert_eq!(h.controller.view().search_text, "");
        assert_eq!(
            h.controller.location().selected(),
            Some(&Position::new(1.0, 2.0))
        );
    }

    #[tokio::test]
    async fn toggling_an_open_form_clears_feedback_but_not_selection() {
        let mut h = harness(MockPlaces::returning(vec![foo()]), MockGeolocator::unavailable());
        h.controller.submit_search("foo").await;
        assert!(h.controller.view().form_open);
        assert_ne!(h.controller.view().search_text, "");

        h.controller.toggle_note_form().await;

        assert!(!h.controller.view().form_open);
        assert_eq!(h.controller.view().search_text, "");
        assert_eq!(
            h.controller.location().selected(),
            Some(&Position::new(1.0, 2.0))
        );
    }

    #[tokio::test]
    async fn locate_failure_raises_alert() {
        let mut h = harness(MockPlaces::returning(vec![]), MockGeolocator::unavailable());
        assert!(h.controller.locate().await.is_none());
        assert!(h.controller.location().current().is_none());
        assert_eq!(
            h.controller.take_alerts(),
            vec!["Unable to retrieve your location".to_string()]
        );
    }

    #[tokio::test]
    async fn nearby_list_refreshes_after_save_and_delete() {
        let mut h = harness(MockPlaces::returning(vec![]), MockGeolocator::at(0.0, 0.0));
        h.store
            .add_note(&note_at(1, "Far", "", 5.0, 5.0))
            .await
            .unwrap();
        h.controller.locate().await;
        assert!(h.controller.view().nearby.is_empty());

        let id = assert_matches!(
            h.controller.save_note("Here", "").await,
            SaveOutcome::Saved { id } => id
        );
        assert_eq!(h.controller.view().nearby_lines(), vec![format!("#{id}  Here  (0 m)")]);

        assert!(h.controller.delete_note(id).await);
        assert!(h.controller.view().nearby.is_empty());
    }

    #[tokio::test]
    async fn note_ids_stay_unique_within_one_tick() {
        let mut h = harness(MockPlaces::returning(vec![]), MockGeolocator::at(0.0, 0.0));
        h.controller.locate().await;

        let first = h.controller.save_note("A", "").await;
        let second = h.controller.save_note("B", "").await;

        assert_eq!(first, SaveOutcome::Saved { id: 1_700_000_000_000 });
        assert_eq!(second, SaveOutcome::Saved { id: 1_700_000_000_001 });
        assert_eq!(h.store.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn find_notes_reports_read_failures() {
        let mut h = harness(MockPlaces::returning(vec![]), MockGeolocator::unavailable());
        h.store.fail_reads.store(true, Ordering::SeqCst);

        let found = h.controller.find_notes(&NoteFilter::default().text("x")).await;

        assert!(found.is_empty());
        assert_eq!(h.controller.take_alerts(), vec!["Failed to load notes".to_string()]);
    }
}
