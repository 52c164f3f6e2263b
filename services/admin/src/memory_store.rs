//! In-memory `EntityStore` used by unit tests.

use crate::models::Record;
use crate::store::{Ack, EntityStore, Filter, StoreError};
use async_trait::async_trait;
use mongodb::bson::{self, Bson, Document};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<&'static str, Vec<Document>>>,
    round_trips: AtomicUsize,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed rows without counting a round trip
    pub fn seed<T: Record>(&self, rows: &[T]) {
        let mut collections = self.collections.lock().unwrap();
        let docs = collections.entry(T::COLLECTION).or_default();
        for row in rows {
            docs.push(bson::to_document(row).unwrap());
        }
    }

    /// Store a raw document, bypassing typed validation
    pub fn seed_raw(&self, collection: &'static str, doc: Document) {
        self.collections
            .lock()
            .unwrap()
            .entry(collection)
            .or_default()
            .push(doc);
    }

    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::SeqCst)
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn round_trip(&self) -> Result<(), StoreError> {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }

    fn rows(&self, collection: &'static str) -> Vec<Document> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

fn matches(filter: &Filter, doc: &Document) -> bool {
    match filter {
        Filter::All => true,
        Filter::In { field, values } => doc
            .get_str(field)
            .map_or(false, |v| values.iter().any(|candidate| candidate == v)),
    }
}

fn decode<T: Record>(doc: Document) -> Result<T, StoreError> {
    bson::from_document(doc).map_err(|e| StoreError::Decode {
        collection: T::COLLECTION,
        message: e.to_string(),
    })
}

fn encode<T: Record>(row: &T) -> Result<Document, StoreError> {
    bson::to_document(row).map_err(|e| StoreError::Encode {
        collection: T::COLLECTION,
        message: e.to_string(),
    })
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn find<T: Record>(&self, filter: Filter) -> Result<Vec<T>, StoreError> {
        self.round_trip()?;
        self.rows(T::COLLECTION)
            .into_iter()
            .filter(|doc| matches(&filter, doc))
            .map(decode::<T>)
            .collect()
    }

    async fn find_one<T: Record>(&self, id: &str) -> Result<Option<T>, StoreError> {
        self.round_trip()?;
        self.rows(T::COLLECTION)
            .into_iter()
            .find(|doc| doc.get_str("_id").map_or(false, |v| v == id))
            .map(decode::<T>)
            .transpose()
    }

    async fn insert<T: Record>(&self, row: &T) -> Result<Ack, StoreError> {
        self.round_trip()?;
        let doc = encode(row)?;
        self.collections
            .lock()
            .unwrap()
            .entry(T::COLLECTION)
            .or_default()
            .push(doc);
        Ok(Ack { affected: 1 })
    }

    async fn replace<T: Record>(&self, id: &str, row: &T) -> Result<Ack, StoreError> {
        self.round_trip()?;
        if row.id() != id {
            return Err(StoreError::IdMismatch {
                expected: id.to_string(),
                found: row.id().to_string(),
            });
        }
        let doc = encode(row)?;
        let mut collections = self.collections.lock().unwrap();
        let docs = collections.entry(T::COLLECTION).or_default();
        match docs
            .iter_mut()
            .find(|d| d.get_str("_id").map_or(false, |v| v == id))
        {
            Some(existing) => {
                *existing = doc;
                Ok(Ack { affected: 1 })
            }
            None => Ok(Ack { affected: 0 }),
        }
    }

    async fn delete<T: Record>(&self, id: &str) -> Result<Ack, StoreError> {
        self.round_trip()?;
        let mut collections = self.collections.lock().unwrap();
        let docs = collections.entry(T::COLLECTION).or_default();
        let before = docs.len();
        docs.retain(|d| d.get_str("_id").map_or(true, |v| v != id));
        Ok(Ack {
            affected: (before - docs.len()) as u64,
        })
    }

    async fn aggregate_group_count<T: Record>(
        &self,
        filter_field: &str,
        ids: &[String],
        group_field: &str,
    ) -> Result<HashMap<String, u64>, StoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.round_trip()?;

        let filter = Filter::any_of(filter_field, ids.to_vec());
        let mut counts = HashMap::new();
        for doc in self.rows(T::COLLECTION) {
            if !matches(&filter, &doc) {
                continue;
            }
            if let Some(Bson::String(key)) = doc.get(group_field) {
                *counts.entry(key.clone()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.round_trip()
    }
}
