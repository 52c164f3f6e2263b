//! Discovery of uploaded media that no record links to.

use crate::config::{MediaConfig, MediaLocation};
use crate::listing::{ListingError, MediaLister, ObjectPageSource};
use crate::models::{Picture, TransitHubMedia};
use crate::store::{EntityStore, Filter, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

#[derive(Error, Debug)]
pub enum ReconciliationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Listing(#[from] ListingError),
}

/// A media collection paired with the object store location it is uploaded to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MediaDomain {
    VehiclePictures,
    TransitHubPictures,
}

impl MediaDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaDomain::VehiclePictures => "vehicle-pictures",
            MediaDomain::TransitHubPictures => "transit-hub-pictures",
        }
    }

    fn location<'a>(&self, media: &'a MediaConfig) -> &'a MediaLocation {
        match self {
            MediaDomain::VehiclePictures => &media.vehicle_pictures,
            MediaDomain::TransitHubPictures => &media.transit_hub_pictures,
        }
    }
}

impl std::str::FromStr for MediaDomain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vehicle-pictures" => Ok(MediaDomain::VehiclePictures),
            "transit-hub-pictures" => Ok(MediaDomain::TransitHubPictures),
            other => Err(format!("unknown media domain: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UnlinkedReport {
    pub domain: MediaDomain,
    pub bucket: String,
    pub prefix: String,
    pub listed: usize,
    pub linked: usize,
    pub unlinked: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

/// Listed keys missing from `linked`, in listing order
pub fn unlinked_keys(listed: Vec<String>, linked: &HashSet<String>) -> Vec<String> {
    listed
        .into_iter()
        .filter(|key| !linked.contains(key))
        .collect()
}

pub struct Reconciler<S, P> {
    store: Arc<S>,
    lister: MediaLister<P>,
    media: MediaConfig,
}

impl<S: EntityStore, P: ObjectPageSource> Reconciler<S, P> {
    pub fn new(store: Arc<S>, lister: MediaLister<P>, media: MediaConfig) -> Self {
        Self {
            store,
            lister,
            media,
        }
    }

    async fn linked_urls(&self, domain: MediaDomain) -> Result<HashSet<String>, StoreError> {
        let urls = match domain {
            MediaDomain::VehiclePictures => self
                .store
                .find::<Picture>(Filter::All)
                .await?
                .into_iter()
                .map(|p| p.url)
                .collect(),
            MediaDomain::TransitHubPictures => self
                .store
                .find::<TransitHubMedia>(Filter::All)
                .await?
                .into_iter()
                .map(|m| m.url)
                .collect(),
        };
        Ok(urls)
    }

    /// Keys under the domain's prefix that no record links to
    pub async fn get_unlinked(
        &self,
        domain: MediaDomain,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, ReconciliationError> {
        Ok(self.report(domain, cancel).await?.unlinked)
    }

    /// Unlinked keys along with the totals they were derived from.
    ///
    /// The linked scan and the listing run concurrently; if either fails no
    /// keys are returned.
    #[instrument(skip(self, cancel), fields(domain = domain.as_str()))]
    pub async fn report(
        &self,
        domain: MediaDomain,
        cancel: &CancellationToken,
    ) -> Result<UnlinkedReport, ReconciliationError> {
        let location = domain.location(&self.media);

        let (linked, listed) = tokio::try_join!(
            async { Ok::<_, ReconciliationError>(self.linked_urls(domain).await?) },
            async {
                Ok::<_, ReconciliationError>(
                    self.lister
                        .list_media_keys(&location.bucket, &location.prefix, cancel)
                        .await?,
                )
            },
        )?;

        let listed_count = listed.len();
        let unlinked = unlinked_keys(listed, &linked);

        metrics::gauge!("admin.reconcile.unlinked", "domain" => domain.as_str())
            .set(unlinked.len() as f64);
        info!(
            bucket = %location.bucket,
            prefix = %location.prefix,
            listed = listed_count,
            linked = linked.len(),
            unlinked = unlinked.len(),
            "Reconciliation completed"
        );

        Ok(UnlinkedReport {
            domain,
            bucket: location.bucket.clone(),
            prefix: location.prefix.clone(),
            listed: listed_count,
            linked: linked.len(),
            unlinked,
            generated_at: Utc::now(),
        })
    }
}
