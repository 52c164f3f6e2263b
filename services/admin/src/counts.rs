//! Per-entity media counts.
//!
//! Counting K entities costs one grouped aggregation, never K queries.
//! Entities without media are absent from the aggregation result and read as
//! zero.

use crate::models::{Carrier, Picture, Record, RelationField, TransitHub, TransitHubMedia, Vehicle};
use crate::store::{EntityStore, Filter, StoreError};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Entity kinds that have media counted against them
pub trait HasMedia: Record {
    const FIELD: RelationField;
}

impl HasMedia for Carrier {
    const FIELD: RelationField = RelationField::Carrier;
}

impl HasMedia for Vehicle {
    const FIELD: RelationField = RelationField::Vehicle;
}

impl HasMedia for TransitHub {
    const FIELD: RelationField = RelationField::TransitHub;
}

/// A record paired with its media count
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WithCount<T> {
    #[serde(flatten)]
    pub record: T,
    pub count: u64,
}

/// Count for `id`, zero when the aggregation had no rows for it
pub fn count_for(counts: &HashMap<String, u64>, id: &str) -> u64 {
    counts.get(id).copied().unwrap_or(0)
}

pub struct CountAggregator<S> {
    store: Arc<S>,
}

impl<S: EntityStore> CountAggregator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Media counts keyed by entity id.
    ///
    /// Ids with no media are missing from the map; see [`count_for`].
    #[instrument(skip(self, ids), fields(id_count = ids.len()))]
    pub async fn get_counts(
        &self,
        ids: &[String],
        field: RelationField,
    ) -> Result<HashMap<String, u64>, StoreError> {
        let mut seen = HashSet::with_capacity(ids.len());
        let ids: Vec<String> = ids
            .iter()
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect();

        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let column = field.as_str();
        let counts = match field {
            RelationField::Carrier | RelationField::Vehicle => {
                self.store
                    .aggregate_group_count::<Picture>(column, &ids, column)
                    .await?
            }
            RelationField::TransitHub => {
                self.store
                    .aggregate_group_count::<TransitHubMedia>(column, &ids, column)
                    .await?
            }
        };

        debug!(groups = counts.len(), "Counts computed");
        Ok(counts)
    }

    /// Every entity of kind `T` with its media count, zero included
    #[instrument(skip(self), fields(collection = T::COLLECTION))]
    pub async fn list_with_counts<T: HasMedia>(&self) -> Result<Vec<WithCount<T>>, StoreError> {
        let records: Vec<T> = self.store.find(Filter::All).await?;
        let ids: Vec<String> = records.iter().map(|r| r.id().to_string()).collect();
        let counts = self.get_counts(&ids, T::FIELD).await?;

        Ok(records
            .into_iter()
            .map(|record| {
                let count = count_for(&counts, record.id());
                WithCount { record, count }
            })
            .collect())
    }
}
