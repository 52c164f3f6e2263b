use crate::catalog::{Catalog, CatalogError};
use crate::config::{ApiConfig, Config};
use crate::counts::{count_for, CountAggregator, HasMedia, WithCount};
use crate::cross_relation::{
    AggregationError, CarrierSeriesCount, CrossRelationAggregator, PairCount,
};
use crate::integrity::{find_dangling, IntegrityReport};
use crate::listing::{ListingError, MediaLister, S3PageSource};
use crate::models::{
    Carrier, Picture, Record, Region, RegionTransitHub, RelationField, TransitHub,
    TransitHubMedia, Vehicle, VehicleSeries,
};
use crate::reconcile::{MediaDomain, ReconciliationError, Reconciler, UnlinkedReport};
use crate::store::{EntityStore, MongoStore, StoreError};
use crate::timezone::{HttpTimezoneLookup, TimezoneError};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MongoStore>,
    pub catalog: Arc<Catalog<MongoStore, HttpTimezoneLookup>>,
    pub counts: Arc<CountAggregator<MongoStore>>,
    pub tables: Arc<CrossRelationAggregator<MongoStore>>,
    pub reconciler: Arc<Reconciler<MongoStore, S3PageSource>>,
    /// Cancelled on shutdown; each reconciliation runs on a child token
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        store: Arc<MongoStore>,
        timezones: HttpTimezoneLookup,
        pages: S3PageSource,
        config: &Config,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            catalog: Arc::new(Catalog::new(store.clone(), Arc::new(timezones))),
            counts: Arc::new(CountAggregator::new(store.clone())),
            tables: Arc::new(CrossRelationAggregator::new(
                store.clone(),
                config.integrity.dangling_references,
            )),
            reconciler: Arc::new(Reconciler::new(
                store.clone(),
                MediaLister::new(pages),
                config.media.clone(),
            )),
            store,
            shutdown,
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::Unavailable(_) => {
            error!(error = %e, "Store unavailable");
            api_error(StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE", e.to_string())
        }
        StoreError::IdMismatch { .. } => {
            api_error(StatusCode::BAD_REQUEST, "BAD_REQUEST", e.to_string())
        }
        _ => {
            error!(error = %e, "Store query failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", e.to_string())
        }
    }
}

fn catalog_error(e: CatalogError) -> ApiError {
    match e {
        CatalogError::Store(e) => store_error(e),
        CatalogError::NotFound { .. } => {
            api_error(StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string())
        }
        CatalogError::Timezone(e @ TimezoneError::InvalidCoordinates { .. }) => {
            api_error(StatusCode::BAD_REQUEST, "BAD_REQUEST", e.to_string())
        }
        CatalogError::Timezone(e) => {
            warn!(error = %e, "Time zone lookup failed");
            api_error(StatusCode::BAD_GATEWAY, "TIMEZONE_ERROR", e.to_string())
        }
    }
}

fn aggregation_error(e: AggregationError) -> ApiError {
    match e {
        AggregationError::Store(e) => store_error(e),
        AggregationError::DanglingReferences { .. } => {
            api_error(StatusCode::CONFLICT, "INTEGRITY_ERROR", e.to_string())
        }
    }
}

fn reconciliation_error(e: ReconciliationError) -> ApiError {
    match e {
        ReconciliationError::Store(e) => store_error(e),
        ReconciliationError::Listing(e @ ListingError::Cancelled { .. }) => {
            api_error(StatusCode::SERVICE_UNAVAILABLE, "CANCELLED", e.to_string())
        }
        ReconciliationError::Listing(e) => {
            error!(error = %e, "Object listing failed");
            api_error(StatusCode::BAD_GATEWAY, "LISTING_ERROR", e.to_string())
        }
    }
}

/// Query parameters for media counts
#[derive(Debug, Deserialize)]
pub struct CountsQuery {
    /// carrier, vehicle or transit_hub
    pub field: String,
    /// Comma separated entity ids
    #[serde(default)]
    pub ids: String,
}

/// Media counts response
#[derive(Debug, Serialize)]
pub struct CountsResponse {
    pub field: RelationField,
    pub counts: BTreeMap<String, u64>,
}

/// Split a comma separated id list, dropping blanks
pub fn parse_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .collect()
}

/// CRUD routes for one record kind
fn record_routes<T: Record>() -> Router<AppState> {
    Router::new()
        .route("/", get(list_records::<T>).post(create_record::<T>))
        .route(
            "/:id",
            get(get_record::<T>)
                .put(replace_record::<T>)
                .delete(delete_record::<T>),
        )
}

/// CRUD routes plus `/with-counts` for kinds that have media
fn media_owner_routes<T: HasMedia>() -> Router<AppState> {
    record_routes::<T>().route("/with-counts", get(list_with_counts::<T>))
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .nest("/api/v1/carriers", media_owner_routes::<Carrier>())
        .nest("/api/v1/vehicles", media_owner_routes::<Vehicle>())
        .nest("/api/v1/transit-hubs", media_owner_routes::<TransitHub>())
        .nest("/api/v1/regions", record_routes::<Region>())
        .nest("/api/v1/pictures", record_routes::<Picture>())
        .nest("/api/v1/vehicle-series", record_routes::<VehicleSeries>())
        .nest("/api/v1/region-transit-hubs", record_routes::<RegionTransitHub>())
        .nest("/api/v1/transit-hub-media", record_routes::<TransitHubMedia>())
        .route("/api/v1/counts", get(get_counts))
        .route("/api/v1/tables/pairs", get(get_pair_table))
        .route("/api/v1/tables/carrier-series", get(get_carrier_series_table))
        .route("/api/v1/unlinked/:domain", get(get_unlinked))
        .route("/api/v1/integrity", get(get_integrity_report))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "admin-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

async fn list_records<T: Record>(State(state): State<AppState>) -> Result<Json<Vec<T>>, ApiError> {
    let rows = state.catalog.list::<T>().await.map_err(catalog_error)?;
    Ok(Json(rows))
}

async fn get_record<T: Record>(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<T>, ApiError> {
    let row = state.catalog.get::<T>(&id).await.map_err(catalog_error)?;
    Ok(Json(row))
}

async fn create_record<T: Record>(
    State(state): State<AppState>,
    Json(row): Json<T>,
) -> Result<(StatusCode, Json<T>), ApiError> {
    let row = state.catalog.create(row).await.map_err(catalog_error)?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn replace_record<T: Record>(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(row): Json<T>,
) -> Result<Json<T>, ApiError> {
    let row = state.catalog.replace(&id, row).await.map_err(catalog_error)?;
    Ok(Json(row))
}

async fn delete_record<T: Record>(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.catalog.delete::<T>(&id).await.map_err(catalog_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_with_counts<T: HasMedia>(
    State(state): State<AppState>,
) -> Result<Json<Vec<WithCount<T>>>, ApiError> {
    let rows = state
        .counts
        .list_with_counts::<T>()
        .await
        .map_err(store_error)?;
    Ok(Json(rows))
}

/// Media counts for the requested ids, zero for ids without media
#[instrument(skip(state))]
async fn get_counts(
    State(state): State<AppState>,
    Query(params): Query<CountsQuery>,
) -> Result<Json<CountsResponse>, ApiError> {
    let field: RelationField = params
        .field
        .parse()
        .map_err(|e: String| api_error(StatusCode::BAD_REQUEST, "BAD_REQUEST", e))?;
    let ids = parse_ids(&params.ids);

    let found = state
        .counts
        .get_counts(&ids, field)
        .await
        .map_err(store_error)?;

    let counts = ids
        .iter()
        .map(|id| (id.clone(), count_for(&found, id)))
        .collect();

    Ok(Json(CountsResponse { field, counts }))
}

async fn get_pair_table(State(state): State<AppState>) -> Result<Json<Vec<PairCount>>, ApiError> {
    let table = state.tables.pair_table().await.map_err(aggregation_error)?;
    Ok(Json(table))
}

async fn get_carrier_series_table(
    State(state): State<AppState>,
) -> Result<Json<Vec<CarrierSeriesCount>>, ApiError> {
    let table = state
        .tables
        .carrier_series_table()
        .await
        .map_err(aggregation_error)?;
    Ok(Json(table))
}

/// Media keys under a domain's prefix with no linking record
#[instrument(skip(state))]
async fn get_unlinked(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> Result<Json<UnlinkedReport>, ApiError> {
    let domain: MediaDomain = domain
        .parse()
        .map_err(|e: String| api_error(StatusCode::BAD_REQUEST, "BAD_REQUEST", e))?;

    let cancel = state.shutdown.child_token();
    let report = state
        .reconciler
        .report(domain, &cancel)
        .await
        .map_err(reconciliation_error)?;

    Ok(Json(report))
}

async fn get_integrity_report(
    State(state): State<AppState>,
) -> Result<Json<IntegrityReport>, ApiError> {
    let report = find_dangling(state.store.as_ref())
        .await
        .map_err(store_error)?;
    Ok(Json(report))
}

/// Serve the admin API until `shutdown` is cancelled
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting admin API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ids() {
        assert_eq!(parse_ids("a, b,,c "), vec!["a", "b", "c"]);
        assert!(parse_ids("").is_empty());
        assert!(parse_ids(" , ").is_empty());
    }

    #[test]
    fn test_counts_query_defaults_ids() {
        let params: CountsQuery = serde_json::from_str(r#"{"field": "carrier"}"#).unwrap();
        assert_eq!(params.field, "carrier");
        assert!(params.ids.is_empty());
    }

    #[test]
    fn test_store_error_mapping() {
        let (status, Json(body)) = store_error(StoreError::Unavailable("down".to_string()));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.code, "STORE_UNAVAILABLE");

        let (status, Json(body)) = store_error(StoreError::Query {
            collection: "pictures",
            message: "bad pipeline".to_string(),
        });
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.code, "STORE_ERROR");
    }

    #[test]
    fn test_catalog_error_mapping() {
        let (status, Json(body)) = catalog_error(CatalogError::NotFound {
            collection: "carriers",
            id: "c1".to_string(),
        });
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.code, "NOT_FOUND");

        let (status, _) = catalog_error(CatalogError::Timezone(
            TimezoneError::InvalidCoordinates {
                latitude: 91.0,
                longitude: 0.0,
            },
        ));
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, Json(body)) =
            catalog_error(CatalogError::Timezone(TimezoneError::Request("timeout".to_string())));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.code, "TIMEZONE_ERROR");
    }

    #[test]
    fn test_aggregation_and_reconciliation_error_mapping() {
        let (status, Json(body)) =
            aggregation_error(AggregationError::DanglingReferences { count: 2 });
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.code, "INTEGRITY_ERROR");

        let (status, Json(body)) = reconciliation_error(ReconciliationError::Listing(
            ListingError::Cancelled { pages: 3 },
        ));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.code, "CANCELLED");

        let (status, Json(body)) = reconciliation_error(ReconciliationError::Listing(
            ListingError::MissingContinuation {
                bucket: "media".to_string(),
                prefix: "pictures/".to_string(),
            },
        ));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.code, "LISTING_ERROR");

        let (status, _) = reconciliation_error(ReconciliationError::Store(
            StoreError::Unavailable("down".to_string()),
        ));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
