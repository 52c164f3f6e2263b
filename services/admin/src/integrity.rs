//! Dangling reference detection.
//!
//! Relation rows reference entities by free-text id and nothing enforces
//! that the target exists. Aggregations tolerate such rows; this module
//! finds them so operators can decide what to do.

use crate::models::{
    Carrier, Picture, Record, Region, RegionTransitHub, TransitHub, TransitHubMedia, Vehicle,
    VehicleSeries,
};
use crate::store::{EntityStore, Filter, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, instrument};

/// Handling of pictures whose carrier or vehicle does not exist
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DanglingPolicy {
    /// Aggregate without checking
    #[default]
    Ignore,
    /// Aggregate, then log the dangling rows
    Warn,
    /// Refuse to aggregate while dangling rows exist
    Fail,
}

/// A relation row pointing at an entity that does not exist
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DanglingReference {
    pub collection: &'static str,
    pub row_id: String,
    pub field: &'static str,
    pub target: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub checked_rows: usize,
    pub dangling: Vec<DanglingReference>,
    pub generated_at: DateTime<Utc>,
}

/// Ids of every stored entity, by kind
#[derive(Debug, Clone, Default)]
pub struct EntityIds {
    pub carriers: HashSet<String>,
    pub vehicles: HashSet<String>,
    pub transit_hubs: HashSet<String>,
    pub regions: HashSet<String>,
}

async fn ids_of<T: Record, S: EntityStore>(store: &S) -> Result<HashSet<String>, StoreError> {
    let rows: Vec<T> = store.find(Filter::All).await?;
    Ok(rows.into_iter().map(|r| r.id().to_string()).collect())
}

impl EntityIds {
    /// Load carrier and vehicle ids, the targets of picture rows
    pub async fn load_picture_targets<S: EntityStore>(store: &S) -> Result<Self, StoreError> {
        let (carriers, vehicles) =
            tokio::try_join!(ids_of::<Carrier, S>(store), ids_of::<Vehicle, S>(store))?;

        Ok(Self {
            carriers,
            vehicles,
            ..Default::default()
        })
    }

    pub async fn load<S: EntityStore>(store: &S) -> Result<Self, StoreError> {
        let (carriers, vehicles, transit_hubs, regions) = tokio::try_join!(
            ids_of::<Carrier, S>(store),
            ids_of::<Vehicle, S>(store),
            ids_of::<TransitHub, S>(store),
            ids_of::<Region, S>(store),
        )?;

        Ok(Self {
            carriers,
            vehicles,
            transit_hubs,
            regions,
        })
    }
}

fn check(
    out: &mut Vec<DanglingReference>,
    collection: &'static str,
    row_id: &str,
    field: &'static str,
    target: &str,
    known: &HashSet<String>,
) {
    if !known.contains(target) {
        out.push(DanglingReference {
            collection,
            row_id: row_id.to_string(),
            field,
            target: target.to_string(),
        });
    }
}

pub fn dangling_pictures(pictures: &[Picture], ids: &EntityIds) -> Vec<DanglingReference> {
    let mut out = Vec::new();
    for p in pictures {
        check(&mut out, Picture::COLLECTION, &p.id, "carrier", &p.carrier, &ids.carriers);
        check(&mut out, Picture::COLLECTION, &p.id, "vehicle", &p.vehicle, &ids.vehicles);
    }
    out
}

pub fn dangling_series(rows: &[VehicleSeries], ids: &EntityIds) -> Vec<DanglingReference> {
    let mut out = Vec::new();
    for row in rows {
        check(&mut out, VehicleSeries::COLLECTION, &row.id, "vehicle", &row.vehicle, &ids.vehicles);
    }
    out
}

pub fn dangling_region_hubs(rows: &[RegionTransitHub], ids: &EntityIds) -> Vec<DanglingReference> {
    let mut out = Vec::new();
    for row in rows {
        check(&mut out, RegionTransitHub::COLLECTION, &row.id, "region", &row.region, &ids.regions);
        check(
            &mut out,
            RegionTransitHub::COLLECTION,
            &row.id,
            "transit_hub",
            &row.transit_hub,
            &ids.transit_hubs,
        );
    }
    out
}

pub fn dangling_hub_media(rows: &[TransitHubMedia], ids: &EntityIds) -> Vec<DanglingReference> {
    let mut out = Vec::new();
    for row in rows {
        check(
            &mut out,
            TransitHubMedia::COLLECTION,
            &row.id,
            "transit_hub",
            &row.transit_hub,
            &ids.transit_hubs,
        );
    }
    out
}

/// Scan every relation collection for references to missing entities
#[instrument(skip(store))]
pub async fn find_dangling<S: EntityStore>(store: &S) -> Result<IntegrityReport, StoreError> {
    let (ids, pictures, series, region_hubs, hub_media) = tokio::try_join!(
        EntityIds::load(store),
        store.find::<Picture>(Filter::All),
        store.find::<VehicleSeries>(Filter::All),
        store.find::<RegionTransitHub>(Filter::All),
        store.find::<TransitHubMedia>(Filter::All),
    )?;

    let mut dangling = dangling_pictures(&pictures, &ids);
    dangling.extend(dangling_series(&series, &ids));
    dangling.extend(dangling_region_hubs(&region_hubs, &ids));
    dangling.extend(dangling_hub_media(&hub_media, &ids));

    let checked_rows = pictures.len() + series.len() + region_hubs.len() + hub_media.len();
    metrics::gauge!("admin.integrity.dangling").set(dangling.len() as f64);
    info!(
        checked_rows = checked_rows,
        dangling = dangling.len(),
        "Integrity check completed"
    );

    Ok(IntegrityReport {
        checked_rows,
        dangling,
        generated_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;

    fn id_set(values: &[&str]) -> HashSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_policy_parses_lowercase() {
        let policy: DanglingPolicy = serde_json::from_str(r#""warn""#).unwrap();
        assert_eq!(policy, DanglingPolicy::Warn);
        assert_eq!(DanglingPolicy::default(), DanglingPolicy::Ignore);
    }

    #[test]
    fn test_dangling_pictures_reports_each_field() {
        let ids = EntityIds {
            carriers: id_set(&["A"]),
            vehicles: id_set(&["V1"]),
            ..Default::default()
        };
        let pictures = vec![
            Picture {
                id: "p1".to_string(),
                carrier: "A".to_string(),
                vehicle: "V1".to_string(),
                url: "a.jpg".to_string(),
            },
            Picture {
                id: "p2".to_string(),
                carrier: "gone".to_string(),
                vehicle: "V9".to_string(),
                url: "b.jpg".to_string(),
            },
        ];

        let dangling = dangling_pictures(&pictures, &ids);

        assert_eq!(dangling.len(), 2);
        assert_eq!(dangling[0].row_id, "p2");
        assert_eq!(dangling[0].field, "carrier");
        assert_eq!(dangling[1].field, "vehicle");
        assert_eq!(dangling[1].target, "V9");
    }

    #[tokio::test]
    async fn test_find_dangling_scans_all_relations() {
        let store = MemoryStore::new();
        store.seed(&[Region {
            id: "r1".to_string(),
            name: "Nordics".to_string(),
            description: String::new(),
        }]);
        store.seed(&[RegionTransitHub {
            id: "rh1".to_string(),
            region: "r1".to_string(),
            transit_hub: "missing-hub".to_string(),
        }]);
        store.seed(&[VehicleSeries {
            id: "s1".to_string(),
            vehicle: "missing-vehicle".to_string(),
            series: "A320 family".to_string(),
        }]);

        let report = find_dangling(&store).await.unwrap();

        assert_eq!(report.checked_rows, 2);
        let targets: Vec<&str> = report.dangling.iter().map(|d| d.target.as_str()).collect();
        assert_eq!(targets, vec!["missing-vehicle", "missing-hub"]);
    }
}
