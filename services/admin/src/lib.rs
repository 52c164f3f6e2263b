//! Flights Admin Service
//!
//! Administrative data service for carriers, vehicles, transit hubs, regions
//! and the media attached to them. Records live in MongoDB; uploaded images
//! live in S3.
//!
//! ## Features
//!
//! - **Catalog**: create, read, replace and delete for every record kind, with
//!   ids assigned on creation and time zones derived for transit hubs
//! - **Media Counts**: per-entity picture counts from one grouped aggregation
//! - **Cross-Relation Tables**: carrier×series and carrier×vehicle picture
//!   counts built from full scans of the relation collections
//! - **Reconciliation**: media keys uploaded to S3 that no record links to
//! - **Integrity Report**: relation rows that reference missing entities
//!
//! ## Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │ Admin API    │
//!                      │ (axum)       │
//!                      └──────────────┘
//!          ┌──────────┬───────┴───────┬───────────────┐
//!          ▼          ▼               ▼               ▼
//! ┌──────────────┐ ┌──────────┐ ┌──────────────┐ ┌──────────────┐
//! │ Catalog      │ │ Count    │ │ Cross        │ │ Reconciler   │
//! │              │ │ Aggr.    │ │ Relation     │ │              │
//! └──────────────┘ └──────────┘ └──────────────┘ └──────────────┘
//!     │      │          │               │            │        │
//!     ▼      │          ▼               ▼            │        ▼
//! ┌────────┐ │   ┌─────────────────────────────┐     │ ┌──────────────┐
//! │ Time   │ └──▶│ Entity Store (MongoDB)      │◀────┘ │ Media Lister │
//! │ Zones  │     └─────────────────────────────┘       │ (S3 pages)   │
//! └────────┘                                           └──────────────┘
//! ```

pub mod api;
pub mod catalog;
pub mod config;
pub mod counts;
pub mod cross_relation;
pub mod integrity;
pub mod listing;
pub mod models;
pub mod reconcile;
pub mod store;
pub mod timezone;

#[cfg(test)]
mod memory_store;

pub use api::{start_api_server, AppState};
pub use catalog::{Catalog, CatalogError};
pub use config::Config;
pub use counts::{CountAggregator, HasMedia, WithCount};
pub use cross_relation::{AggregationError, CarrierSeriesCount, CrossRelationAggregator, PairCount};
pub use integrity::{find_dangling, DanglingPolicy, DanglingReference, IntegrityReport};
pub use listing::{ListingError, MediaLister, ObjectPage, ObjectPageSource, S3PageSource};
pub use models::{Record, RelationField};
pub use reconcile::{MediaDomain, ReconciliationError, Reconciler, UnlinkedReport};
pub use store::{EntityStore, Filter, MongoStore, StoreError};
pub use timezone::{HttpTimezoneLookup, TimezoneError, TimezoneLookup};
