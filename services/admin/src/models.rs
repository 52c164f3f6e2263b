//! Typed records for every collection the service reads and writes.
//!
//! Documents are decoded strictly: a stored document carrying a field the
//! record does not declare fails to decode instead of being passed through.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A document stored in one collection, keyed by a string `_id`
pub trait Record: Serialize + DeserializeOwned + Unpin + Send + Sync + 'static {
    /// Collection holding records of this kind
    const COLLECTION: &'static str;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);

    /// Coordinates used to derive a time zone on write, if the record has any
    fn coordinates(&self) -> Option<(f64, f64)> {
        None
    }

    fn set_timezone(&mut self, _timezone: String) {}
}

macro_rules! record {
    ($ty:ty, $collection:literal) => {
        impl Record for $ty {
            const COLLECTION: &'static str = $collection;

            fn id(&self) -> &str {
                &self.id
            }

            fn set_id(&mut self, id: String) {
                self.id = id;
            }
        }
    };
}

/// An airline or other operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Carrier {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub iata: String,
    #[serde(default)]
    pub icao: String,
    #[serde(default)]
    pub country: String,
    pub alliance: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub low_cost: bool,
    #[serde(default)]
    pub regional: bool,
    /// Id of the parent carrier
    pub parent: Option<String>,
}

record!(Carrier, "carriers");

/// An aircraft type (or any other vehicle model)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Vehicle {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(rename = "icaoCode", default)]
    pub icao: String,
    #[serde(rename = "iataCode", default)]
    pub iata: String,
    pub title: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub mode: String,
}

record!(Vehicle, "vehicles");

/// An airport, station or other transit hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitHub {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub iata: String,
    #[serde(default)]
    pub icao: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
    /// IANA time zone, derived from the coordinates on every write
    pub timezone: Option<String>,
}

impl Record for TransitHub {
    const COLLECTION: &'static str = "transit_hubs";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.latitude, self.longitude))
    }

    fn set_timezone(&mut self, timezone: String) {
        self.timezone = Some(timezone);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Region {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

record!(Region, "regions");

/// Evidence that a carrier operated a vehicle, in the form of an image.
///
/// The (carrier, vehicle) pair is not unique; every picture counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Picture {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub carrier: String,
    pub vehicle: String,
    pub url: String,
}

record!(Picture, "pictures");

/// Membership of a vehicle in a named series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VehicleSeries {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub vehicle: String,
    pub series: String,
}

record!(VehicleSeries, "vehicle_series");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegionTransitHub {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub region: String,
    pub transit_hub: String,
}

record!(RegionTransitHub, "region_transit_hubs");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitHubMedia {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub transit_hub: String,
    pub url: String,
}

record!(TransitHubMedia, "transit_hub_media");

/// Reference field on a media collection that media counts are grouped by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationField {
    Carrier,
    Vehicle,
    TransitHub,
}

impl RelationField {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationField::Carrier => "carrier",
            RelationField::Vehicle => "vehicle",
            RelationField::TransitHub => "transit_hub",
        }
    }

    /// Collection whose rows are counted for this field
    pub fn media_collection(&self) -> &'static str {
        match self {
            RelationField::Carrier | RelationField::Vehicle => Picture::COLLECTION,
            RelationField::TransitHub => TransitHubMedia::COLLECTION,
        }
    }
}

impl std::str::FromStr for RelationField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "carrier" => Ok(RelationField::Carrier),
            "vehicle" => Ok(RelationField::Vehicle),
            "transit_hub" | "transit-hub" => Ok(RelationField::TransitHub),
            other => Err(format!("unknown relation field: {other}")),
        }
    }
}
