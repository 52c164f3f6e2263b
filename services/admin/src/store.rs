use crate::config::DatabaseConfig;
use crate::models::Record;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Errors raised by the entity store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Query on {collection} failed: {message}")]
    Query {
        collection: &'static str,
        message: String,
    },

    #[error("Failed to decode {collection} document: {message}")]
    Decode {
        collection: &'static str,
        message: String,
    },

    #[error("Failed to encode {collection} document: {message}")]
    Encode {
        collection: &'static str,
        message: String,
    },

    #[error("Record id {found:?} does not match key {expected:?}")]
    IdMismatch { expected: String, found: String },
}

/// Row selection for `find`
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Filter {
    #[default]
    All,
    /// Field is one of the values
    In { field: String, values: Vec<String> },
}

impl Filter {
    pub fn any_of(field: impl Into<String>, values: Vec<String>) -> Self {
        Filter::In {
            field: field.into(),
            values,
        }
    }

    /// Render the filter as a query document
    pub fn to_document(&self) -> Document {
        let mut query = Document::new();
        match self {
            Filter::All => {}
            Filter::In { field, values } => {
                query.insert(field.as_str(), doc! { "$in": values.clone() });
            }
        }
        query
    }
}

/// Write acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Rows inserted, matched or deleted; zero means the id was not found
    pub affected: u64,
}

/// Typed access to the document store.
///
/// Every method is a single round trip. Read-only callers may share one
/// store between concurrent requests.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn find<T: Record>(&self, filter: Filter) -> Result<Vec<T>, StoreError>;

    async fn find_one<T: Record>(&self, id: &str) -> Result<Option<T>, StoreError>;

    async fn insert<T: Record>(&self, row: &T) -> Result<Ack, StoreError>;

    /// Replace the whole record stored under `id`
    async fn replace<T: Record>(&self, id: &str, row: &T) -> Result<Ack, StoreError>;

    async fn delete<T: Record>(&self, id: &str) -> Result<Ack, StoreError>;

    /// Count rows of `T` whose `filter_field` is one of `ids`, grouped by
    /// `group_field`. Groups with no rows are absent from the result and an
    /// empty `ids` returns an empty map without touching the store.
    async fn aggregate_group_count<T: Record>(
        &self,
        filter_field: &str,
        ids: &[String],
        group_field: &str,
    ) -> Result<HashMap<String, u64>, StoreError>;

    /// Check connectivity
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Pipeline for `aggregate_group_count`: one `$match` on the id set and one
/// `$group` counting rows per key.
pub fn group_count_pipeline(filter_field: &str, ids: &[String], group_field: &str) -> Vec<Document> {
    let matcher = Filter::any_of(filter_field, ids.to_vec()).to_document();

    vec![
        doc! { "$match": matcher },
        doc! {
            "$group": {
                "_id": format!("${group_field}"),
                "count": { "$sum": 1 },
            }
        },
    ]
}

/// Read one `{ _id, count }` group row
fn read_group_row(
    collection: &'static str,
    row: &Document,
) -> Result<Option<(String, u64)>, StoreError> {
    let key = match row.get("_id") {
        Some(Bson::String(key)) => key.clone(),
        // rows missing the group field collapse into a null group
        Some(Bson::Null) | None => return Ok(None),
        Some(other) => {
            return Err(StoreError::Decode {
                collection,
                message: format!("group key is not a string: {other}"),
            })
        }
    };

    let count = match row.get("count") {
        Some(Bson::Int32(n)) if *n >= 0 => *n as u64,
        Some(Bson::Int64(n)) if *n >= 0 => *n as u64,
        other => {
            return Err(StoreError::Decode {
                collection,
                message: format!("invalid group count: {other:?}"),
            })
        }
    };

    Ok(Some((key, count)))
}

fn classify(collection: &'static str, err: MongoError) -> StoreError {
    match err.kind.as_ref() {
        ErrorKind::ServerSelection { .. }
        | ErrorKind::Io(_)
        | ErrorKind::ConnectionPoolCleared { .. } => StoreError::Unavailable(err.to_string()),
        ErrorKind::BsonDeserialization(e) => StoreError::Decode {
            collection,
            message: e.to_string(),
        },
        ErrorKind::BsonSerialization(e) => StoreError::Encode {
            collection,
            message: e.to_string(),
        },
        _ => StoreError::Query {
            collection,
            message: err.to_string(),
        },
    }
}

/// MongoDB-backed entity store.
///
/// Cloning is cheap: the driver client is a shared connection pool.
#[derive(Clone)]
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    /// Connect to MongoDB and verify the server answers
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let mut options = ClientOptions::parse(&config.url)
            .await
            .context("Failed to parse MongoDB connection string")?;
        options.app_name = Some(config.app_name.clone());
        options.max_pool_size = Some(config.max_pool_size);
        options.min_pool_size = Some(config.min_pool_size);
        options.connect_timeout = Some(Duration::from_secs(config.connect_timeout_secs));
        options.server_selection_timeout =
            Some(Duration::from_secs(config.server_selection_timeout_secs));

        let client = Client::with_options(options).context("Failed to create MongoDB client")?;
        let store = Self {
            db: client.database(&config.name),
        };

        store
            .ping()
            .await
            .context("Failed to connect to MongoDB")?;

        info!(database = %config.name, "Connected to MongoDB");

        Ok(store)
    }

    fn collection<T: Record>(&self) -> Collection<T> {
        self.db.collection::<T>(T::COLLECTION)
    }
}

#[async_trait]
impl EntityStore for MongoStore {
    #[instrument(skip(self), fields(collection = T::COLLECTION))]
    async fn find<T: Record>(&self, filter: Filter) -> Result<Vec<T>, StoreError> {
        let cursor = self
            .collection::<T>()
            .find(filter.to_document(), None)
            .await
            .map_err(|e| classify(T::COLLECTION, e))?;

        let rows: Vec<T> = cursor
            .try_collect()
            .await
            .map_err(|e| classify(T::COLLECTION, e))?;

        debug!(rows = rows.len(), "Find completed");
        Ok(rows)
    }

    async fn find_one<T: Record>(&self, id: &str) -> Result<Option<T>, StoreError> {
        self.collection::<T>()
            .find_one(doc! { "_id": id }, None)
            .await
            .map_err(|e| classify(T::COLLECTION, e))
    }

    #[instrument(skip(self, row), fields(collection = T::COLLECTION, id = %row.id()))]
    async fn insert<T: Record>(&self, row: &T) -> Result<Ack, StoreError> {
        self.collection::<T>()
            .insert_one(row, None)
            .await
            .map_err(|e| classify(T::COLLECTION, e))?;

        Ok(Ack { affected: 1 })
    }

    #[instrument(skip(self, row), fields(collection = T::COLLECTION))]
    async fn replace<T: Record>(&self, id: &str, row: &T) -> Result<Ack, StoreError> {
        if row.id() != id {
            return Err(StoreError::IdMismatch {
                expected: id.to_string(),
                found: row.id().to_string(),
            });
        }

        let result = self
            .collection::<T>()
            .replace_one(doc! { "_id": id }, row, None)
            .await
            .map_err(|e| classify(T::COLLECTION, e))?;

        Ok(Ack {
            affected: result.matched_count,
        })
    }

    #[instrument(skip(self), fields(collection = T::COLLECTION))]
    async fn delete<T: Record>(&self, id: &str) -> Result<Ack, StoreError> {
        let result = self
            .collection::<T>()
            .delete_one(doc! { "_id": id }, None)
            .await
            .map_err(|e| classify(T::COLLECTION, e))?;

        Ok(Ack {
            affected: result.deleted_count,
        })
    }

    #[instrument(skip(self, ids), fields(collection = T::COLLECTION, id_count = ids.len()))]
    async fn aggregate_group_count<T: Record>(
        &self,
        filter_field: &str,
        ids: &[String],
        group_field: &str,
    ) -> Result<HashMap<String, u64>, StoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let pipeline = group_count_pipeline(filter_field, ids, group_field);
        let cursor = self
            .db
            .collection::<Document>(T::COLLECTION)
            .aggregate(pipeline, None)
            .await
            .map_err(|e| classify(T::COLLECTION, e))?;

        let rows: Vec<Document> = cursor
            .try_collect()
            .await
            .map_err(|e| classify(T::COLLECTION, e))?;

        let mut counts = HashMap::with_capacity(rows.len());
        for row in &rows {
            if let Some((key, count)) = read_group_row(T::COLLECTION, row)? {
                counts.insert(key, count);
            }
        }

        metrics::counter!("admin.store.aggregations").increment(1);
        debug!(groups = counts.len(), "Group count completed");

        Ok(counts)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.db
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}
