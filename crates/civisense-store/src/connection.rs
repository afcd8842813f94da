//! Connection lifecycle: connect with standalone fallback, replica-set
//! detection, and collection handles (C3).

use std::time::Duration;

use bson::doc;
use civisense_core::{Error, Result, Settings};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database};
use url::Url;

const COMPLAINTS_COLLECTION: &str = "complaints";
const SENSITIVE_LOCATIONS_COLLECTION: &str = "sensitive_locations";
const AI_BLACKLIST_COLLECTION: &str = "ai_blacklist";

/// An established connection to the backing database, with typed handles to
/// the three collections the engine reads and writes.
pub struct Connection {
    pub(crate) client: Client,
    pub(crate) database: Database,
    pub(crate) complaints: Collection<bson::Document>,
    pub(crate) sensitive_locations: Collection<bson::Document>,
    pub(crate) ai_blacklist: Collection<bson::Document>,
    pub(crate) replica_set_enabled: bool,
}

impl Connection {
    /// Connects to MongoDB per `settings.mongo_uri`.
    ///
    /// If the URI names a `replicaSet` and the initial `ping` fails with a
    /// server-selection timeout, and
    /// `settings.mongo_allow_standalone_fallback` is set, retries once
    /// against a rewritten standalone URI (`replicaSet` query param
    /// stripped, `directConnection=true` added) -- mirroring a common
    /// degraded-topology recovery path for single-node deployments still
    /// configured with a replica set name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreConnect`] if both the primary and (if
    /// attempted) fallback connection fail.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let primary = Self::build_client(&settings.mongo_uri, settings).await?;

        let (client, active_uri) = match primary.database("admin").run_command(doc! {"ping": 1}).await {
            Ok(_) => (primary, settings.mongo_uri.clone()),
            Err(err) if is_server_selection_timeout(&err) => {
                if !settings.mongo_allow_standalone_fallback || !has_replica_set_param(&settings.mongo_uri) {
                    return Err(Error::StoreConnect(err.to_string()));
                }

                let fallback_uri = to_standalone_uri(&settings.mongo_uri);
                tracing::warn!(
                    error = %err,
                    fallback_uri = %fallback_uri,
                    "replica set URI failed to connect; falling back to standalone URI for startup"
                );

                let fallback = Self::build_client(&fallback_uri, settings).await?;
                fallback
                    .database("admin")
                    .run_command(doc! {"ping": 1})
                    .await
                    .map_err(|err| Error::StoreConnect(err.to_string()))?;
                (fallback, fallback_uri)
            }
            Err(err) => return Err(Error::StoreConnect(err.to_string())),
        };

        let hello = client
            .database("admin")
            .run_command(doc! {"hello": 1})
            .await
            .map_err(|err| Error::StoreConnect(err.to_string()))?;
        let replica_set_enabled = hello.get_str("setName").is_ok();

        if !replica_set_enabled {
            tracing::warn!(
                "MongoDB replica set not detected; change streams will be disabled, retry reconciler will continue"
            );
        }

        let database = client.database(&settings.mongo_database);
        let complaints = database.collection(COMPLAINTS_COLLECTION);
        let sensitive_locations = database.collection(SENSITIVE_LOCATIONS_COLLECTION);
        let ai_blacklist: Collection<bson::Document> = database.collection(AI_BLACKLIST_COLLECTION);

        ai_blacklist
            .create_index(
                mongodb::IndexModel::builder()
                    .keys(doc! {"userId": 1})
                    .options(
                        mongodb::options::IndexOptions::builder()
                            .unique(true)
                            .name("userId_unique".to_string())
                            .build(),
                    )
                    .build(),
            )
            .await
            .map_err(|err| Error::StoreConnect(err.to_string()))?;

        tracing::info!(
            database = %settings.mongo_database,
            replica_set = replica_set_enabled,
            uri = %active_uri,
            "connected to MongoDB"
        );

        Ok(Self {
            client,
            database,
            complaints,
            sensitive_locations,
            ai_blacklist,
            replica_set_enabled,
        })
    }

    async fn build_client(uri: &str, settings: &Settings) -> Result<Client> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|err| Error::StoreConnect(err.to_string()))?;
        options.server_selection_timeout = Some(Duration::from_millis(
            settings.mongo_server_selection_timeout_ms,
        ));
        options.connect_timeout = Some(Duration::from_millis(settings.mongo_connect_timeout_ms));
        options.retry_writes = Some(true);
        options.app_name = Some("civisense-engine".to_string());

        Client::with_options(options).map_err(|err| Error::StoreConnect(err.to_string()))
    }

    /// Whether the connected deployment was detected to be a replica set.
    #[must_use]
    pub fn replica_set_enabled(&self) -> bool {
        self.replica_set_enabled
    }
}

fn is_server_selection_timeout(err: &mongodb::error::Error) -> bool {
    matches!(
        *err.kind,
        mongodb::error::ErrorKind::ServerSelection { .. }
    )
}

fn has_replica_set_param(uri: &str) -> bool {
    let Ok(parsed) = Url::parse(uri) else {
        return false;
    };
    parsed
        .query_pairs()
        .any(|(key, _)| key.eq_ignore_ascii_case("replicaset"))
}

fn to_standalone_uri(uri: &str) -> String {
    let Ok(mut parsed) = Url::parse(uri) else {
        return uri.to_string();
    };

    let filtered: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !key.eq_ignore_ascii_case("replicaset"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let has_direct_connection = filtered
        .iter()
        .any(|(key, _)| key.eq_ignore_ascii_case("directconnection"));

    {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in &filtered {
            serializer.append_pair(key, value);
        }
        if !has_direct_connection {
            serializer.append_pair("directConnection", "true");
        }
        let query = serializer.finish();
        parsed.set_query(if query.is_empty() { None } else { Some(&query) });
    }

    parsed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_replica_set_param_detects_case_insensitively() {
        assert!(has_replica_set_param(
            "mongodb://localhost:27017/db?replicaSet=rs0"
        ));
        assert!(!has_replica_set_param("mongodb://localhost:27017/db"));
    }

    #[test]
    fn to_standalone_uri_strips_replica_set_and_adds_direct_connection() {
        let rewritten = to_standalone_uri("mongodb://localhost:27017/db?replicaSet=rs0&retryWrites=true");
        assert!(!rewritten.to_lowercase().contains("replicaset"));
        assert!(rewritten.contains("directConnection=true"));
        assert!(rewritten.contains("retryWrites=true"));
    }

    #[test]
    fn to_standalone_uri_does_not_duplicate_direct_connection() {
        let rewritten = to_standalone_uri(
            "mongodb://localhost:27017/db?replicaSet=rs0&directConnection=true",
        );
        let occurrences = rewritten.matches("directConnection").count();
        assert_eq!(occurrences, 1);
    }
}
