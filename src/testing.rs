//! In-memory doubles for the async seams, shared by the unit tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::app::Clock;
use crate::error::{AppError, AppResult};
use crate::geo::Position;
use crate::geolocate::Geolocator;
use crate::places::{Place, PlaceSearch};
use crate::storage::{NoteRecord, NoteStore};

pub fn note_at(id: i64, title: &str, body: &str, latitude: f64, longitude: f64) -> NoteRecord {
    NoteRecord {
        id,
        title: title.to_string(),
        body: body.to_string(),
        latitude,
        longitude,
        created_at: "2024-05-01T10:00:00Z".to_string(),
    }
}

#[derive(Default)]
pub struct MemoryStore {
    notes: Mutex<BTreeMap<i64, NoteRecord>>,
    pub fail_writes: AtomicBool,
    pub fail_reads: AtomicBool,
}

impl MemoryStore {
    pub fn with_notes(notes: Vec<NoteRecord>) -> Self {
        let store = Self::default();
        {
            let mut map = store.notes.lock().unwrap();
            for note in notes {
                map.insert(note.id, note);
            }
        }
        store
    }

    pub fn snapshot(&self) -> Vec<NoteRecord> {
        self.notes.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl NoteStore for MemoryStore {
    async fn add_note(&self, note: &NoteRecord) -> AppResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Storage("transaction aborted".into()));
        }
        self.notes.lock().unwrap().insert(note.id, note.clone());
        Ok(())
    }

    async fn get_all_notes(&self) -> AppResult<Vec<NoteRecord>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AppError::Storage("read failed".into()));
        }
        Ok(self.snapshot())
    }

    async fn delete_note(&self, id: i64) -> AppResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Storage("transaction aborted".into()));
        }
        self.notes.lock().unwrap().remove(&id);
        Ok(())
    }
}

/// Replays a fixed response and counts calls.
pub struct MockPlaces {
    response: Mutex<AppResult<Vec<Place>>>,
    pub calls: AtomicUsize,
    pub queries: Mutex<Vec<String>>,
}

impl MockPlaces {
    pub fn returning(places: Vec<Place>) -> Self {
        Self {
            response: Mutex::new(Ok(places)),
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            response: Mutex::new(Err(AppError::Search(message.to_string()))),
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn respond_with(&self, response: AppResult<Vec<Place>>) {
        *self.response.lock().unwrap() = response;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaceSearch for MockPlaces {
    async fn search(&self, query: &str) -> AppResult<Vec<Place>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.to_string());
        self.response.lock().unwrap().clone()
    }
}

pub struct MockGeolocator {
    fix: Option<Position>,
    pub calls: AtomicUsize,
}

impl MockGeolocator {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            fix: Some(Position::new(latitude, longitude)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            fix: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Geolocator for MockGeolocator {
    async fn current_position(&self) -> AppResult<Position> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.fix
            .ok_or_else(|| AppError::Geolocation("permission denied".into()))
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn at(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn advance(&self, ms: i64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn now(&self) -> OffsetDateTime {
        let nanos = i128::from(self.now_ms()) * 1_000_000;
        OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }
}
