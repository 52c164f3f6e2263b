//! Derived count tables built from several relations at once.
//!
//! Both tables are sparse: only combinations with at least one picture
//! appear. Each source relation is scanned once and the reduction happens
//! in memory.

use crate::integrity::{dangling_pictures, DanglingPolicy, EntityIds};
use crate::models::{Picture, VehicleSeries};
use crate::store::{EntityStore, Filter, StoreError};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Error, Debug)]
pub enum AggregationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{count} pictures reference missing carriers or vehicles")]
    DanglingReferences { count: usize },
}

/// Pictures of one vehicle flown by one carrier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairCount {
    pub carrier: String,
    pub vehicle: String,
    pub count: u64,
}

/// Pictures of any vehicle in one series flown by one carrier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CarrierSeriesCount {
    pub carrier: String,
    pub series: String,
    pub count: u64,
}

/// Group pictures by (carrier, vehicle)
pub fn pair_counts(pictures: &[Picture]) -> Vec<PairCount> {
    let mut counts: BTreeMap<(&str, &str), u64> = BTreeMap::new();
    for picture in pictures {
        *counts
            .entry((picture.carrier.as_str(), picture.vehicle.as_str()))
            .or_insert(0) += 1;
    }

    counts
        .into_iter()
        .map(|((carrier, vehicle), count)| PairCount {
            carrier: carrier.to_string(),
            vehicle: vehicle.to_string(),
            count,
        })
        .collect()
}

/// Series names per vehicle. A series listed twice for the same vehicle
/// appears once.
pub fn series_by_vehicle(rows: &[VehicleSeries]) -> HashMap<&str, Vec<&str>> {
    let mut index: HashMap<&str, Vec<&str>> = HashMap::new();
    for row in rows {
        let series = index.entry(row.vehicle.as_str()).or_default();
        if !series.contains(&row.series.as_str()) {
            series.push(row.series.as_str());
        }
    }
    index
}

/// Count pictures per (carrier, series) through the vehicle→series relation.
///
/// A picture of a vehicle in two series counts towards both; a picture of a
/// vehicle in no series counts towards none.
pub fn carrier_series_counts(
    series_rows: &[VehicleSeries],
    pictures: &[Picture],
) -> Vec<CarrierSeriesCount> {
    let index = series_by_vehicle(series_rows);
    let mut counts: BTreeMap<(&str, &str), u64> = BTreeMap::new();

    for picture in pictures {
        let Some(series) = index.get(picture.vehicle.as_str()) else {
            continue;
        };
        for name in series {
            *counts.entry((picture.carrier.as_str(), *name)).or_insert(0) += 1;
        }
    }

    counts
        .into_iter()
        .map(|((carrier, series), count)| CarrierSeriesCount {
            carrier: carrier.to_string(),
            series: series.to_string(),
            count,
        })
        .collect()
}

pub struct CrossRelationAggregator<S> {
    store: Arc<S>,
    policy: DanglingPolicy,
}

impl<S: EntityStore> CrossRelationAggregator<S> {
    pub fn new(store: Arc<S>, policy: DanglingPolicy) -> Self {
        Self { store, policy }
    }

    /// Picture counts per observed (carrier, vehicle) pair
    #[instrument(skip(self))]
    pub async fn pair_table(&self) -> Result<Vec<PairCount>, AggregationError> {
        let pictures: Vec<Picture> = self.store.find(Filter::All).await?;
        self.check_pictures(&pictures).await?;

        let table = pair_counts(&pictures);
        debug!(pictures = pictures.len(), rows = table.len(), "Pair table built");
        Ok(table)
    }

    /// Picture counts per observed (carrier, series) pair
    #[instrument(skip(self))]
    pub async fn carrier_series_table(&self) -> Result<Vec<CarrierSeriesCount>, AggregationError> {
        let (series, pictures) = tokio::try_join!(
            self.store.find::<VehicleSeries>(Filter::All),
            self.store.find::<Picture>(Filter::All),
        )?;
        self.check_pictures(&pictures).await?;

        let table = carrier_series_counts(&series, &pictures);
        debug!(
            series_rows = series.len(),
            pictures = pictures.len(),
            rows = table.len(),
            "Carrier series table built"
        );
        Ok(table)
    }

    async fn check_pictures(&self, pictures: &[Picture]) -> Result<(), AggregationError> {
        if self.policy == DanglingPolicy::Ignore {
            return Ok(());
        }

        let ids = EntityIds::load_picture_targets(self.store.as_ref()).await?;
        let dangling = dangling_pictures(pictures, &ids);
        let count = dangling
            .iter()
            .map(|d| d.row_id.as_str())
            .collect::<HashSet<_>>()
            .len();
        if count == 0 {
            return Ok(());
        }

        metrics::counter!("admin.integrity.dangling_pictures").increment(count as u64);
        match self.policy {
            DanglingPolicy::Fail => Err(AggregationError::DanglingReferences { count }),
            _ => {
                warn!(
                    count = count,
                    first = ?dangling.first(),
                    "Pictures reference missing carriers or vehicles"
                );
                Ok(())
            }
        }
    }
}
