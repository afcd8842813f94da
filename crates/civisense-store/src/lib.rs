//! CiviSense Store
//!
//! The sole MongoDB-backed implementation of
//! [`civisense_core::traits::DocumentStore`], [`civisense_core::geo::SensitiveLocationLookup`],
//! and [`civisense_core::cluster::NearbyComplaintCounter`]. Connection
//! lifecycle (replica-set detection, standalone URI fallback), geo-index
//! probing with linear-scan degradation, and the change-stream/reconciler
//! sweep queries all live here so the rest of the workspace depends only on
//! the trait seams in `civisense-core`.

mod cluster_lookup;
mod connection;
mod geo_lookup;
mod store;

pub use cluster_lookup::MongoNearbyComplaintCounter;
pub use connection::Connection;
pub use geo_lookup::MongoSensitiveLocationLookup;
pub use store::MongoDocumentStore;

use civisense_core::{Result, Settings};

/// The three collection-backed adapters, built once from a single
/// connection and handed out to the engine's components.
pub struct MongoBackend {
    /// The document store: claim lifecycle, write-back, reconciler sweeps.
    pub document_store: MongoDocumentStore,
    /// The geo multiplier's sensitive-location lookup.
    pub sensitive_locations: MongoSensitiveLocationLookup,
    /// The cluster detector's nearby-complaint counter.
    pub nearby_complaints: MongoNearbyComplaintCounter,
    /// Whether the connected deployment is a replica set.
    pub replica_set_enabled: bool,
}

impl MongoBackend {
    /// Connects to MongoDB and builds all three adapters from the shared
    /// connection's collection handles.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection (with standalone fallback, if
    /// configured) fails.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let connection = Connection::connect(settings).await?;
        let replica_set_enabled = connection.replica_set_enabled();

        let sensitive_locations = MongoSensitiveLocationLookup::new(connection.sensitive_locations.clone());
        let nearby_complaints = MongoNearbyComplaintCounter::new(connection.complaints.clone());
        let document_store = MongoDocumentStore::new(connection);

        Ok(Self {
            document_store,
            sensitive_locations,
            nearby_complaints,
            replica_set_enabled,
        })
    }
}
