//! Create, read, replace and delete for every record kind.
//!
//! Ids are assigned here on creation. Records with coordinates get their
//! time zone derived on every write. Deleting a carrier or vehicle leaves
//! its pictures in place.

use crate::models::Record;
use crate::store::{EntityStore, Filter, StoreError};
use crate::timezone::{TimezoneError, TimezoneLookup};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Timezone(#[from] TimezoneError),

    #[error("No {collection} record with id {id:?}")]
    NotFound { collection: &'static str, id: String },
}

pub struct Catalog<S, Z> {
    store: Arc<S>,
    timezones: Arc<Z>,
}

impl<S: EntityStore, Z: TimezoneLookup> Catalog<S, Z> {
    pub fn new(store: Arc<S>, timezones: Arc<Z>) -> Self {
        Self { store, timezones }
    }

    pub async fn list<T: Record>(&self) -> Result<Vec<T>, CatalogError> {
        Ok(self.store.find(Filter::All).await?)
    }

    pub async fn get<T: Record>(&self, id: &str) -> Result<T, CatalogError> {
        self.store
            .find_one::<T>(id)
            .await?
            .ok_or_else(|| CatalogError::NotFound {
                collection: T::COLLECTION,
                id: id.to_string(),
            })
    }

    /// Insert `row` under a freshly generated id
    #[instrument(skip(self, row), fields(collection = T::COLLECTION))]
    pub async fn create<T: Record>(&self, mut row: T) -> Result<T, CatalogError> {
        row.set_id(Uuid::new_v4().to_string());
        self.derive_timezone(&mut row).await?;
        self.store.insert(&row).await?;

        info!(id = %row.id(), "Record created");
        Ok(row)
    }

    /// Replace the record stored under `id`. A row without an id takes the
    /// key; a row with a different id is rejected.
    #[instrument(skip(self, row), fields(collection = T::COLLECTION))]
    pub async fn replace<T: Record>(&self, id: &str, mut row: T) -> Result<T, CatalogError> {
        if row.id().is_empty() {
            row.set_id(id.to_string());
        }
        self.derive_timezone(&mut row).await?;

        let ack = self.store.replace(id, &row).await?;
        if ack.affected == 0 {
            return Err(CatalogError::NotFound {
                collection: T::COLLECTION,
                id: id.to_string(),
            });
        }
        Ok(row)
    }

    #[instrument(skip(self), fields(collection = T::COLLECTION))]
    pub async fn delete<T: Record>(&self, id: &str) -> Result<(), CatalogError> {
        let ack = self.store.delete::<T>(id).await?;
        if ack.affected == 0 {
            return Err(CatalogError::NotFound {
                collection: T::COLLECTION,
                id: id.to_string(),
            });
        }
        info!("Record deleted");
        Ok(())
    }

    async fn derive_timezone<T: Record>(&self, row: &mut T) -> Result<(), TimezoneError> {
        if let Some((latitude, longitude)) = row.coordinates() {
            let timezone = self.timezones.lookup(latitude, longitude).await?;
            row.set_timezone(timezone);
        }
        Ok(())
    }
}
