//! Store selection: Firestore, or a JSON snapshot in the memory store.

use std::path::PathBuf;
use std::sync::Arc;

use miette::Result;
use raithamitra_store::{
    DocumentStore, FirestoreClient, FirestoreConfig, MemoryStore, PhoneAuthClient,
    PhoneAuthConfig,
};
use tracing::info;

use crate::{AuthArgs, StoreArgs};

pub enum Backend {
    Snapshot {
        store: Arc<MemoryStore>,
        path: PathBuf,
    },
    Firestore(Arc<FirestoreClient>),
}

impl Backend {
    pub async fn open(args: &StoreArgs) -> Result<Self> {
        if let Some(path) = &args.store_file {
            let store = if path.exists() {
                MemoryStore::load(path)
                    .await
                    .map_err(|e| miette::miette!("failed to load {}: {}", path.display(), e))?
            } else {
                info!(path = %path.display(), "snapshot not found, starting empty");
                MemoryStore::new()
            };
            return Ok(Backend::Snapshot {
                store: Arc::new(store),
                path: path.clone(),
            });
        }

        let project_id = args.project_id.as_deref().ok_or_else(|| {
            miette::miette!("set --project-id (RAITHAMITRA_PROJECT_ID) or --store-file")
        })?;

        let mut config = FirestoreConfig::new(project_id);
        if let Some(url) = &args.firestore_url {
            config = config.with_base_url(url);
        }
        let client = FirestoreClient::new(config).map_err(|e| miette::miette!("{}", e))?;
        if let Some(token) = &args.access_token {
            client.set_token(token).await;
        }

        Ok(Backend::Firestore(Arc::new(client)))
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        match self {
            Backend::Snapshot { store, .. } => Arc::clone(store) as Arc<dyn DocumentStore>,
            Backend::Firestore(client) => Arc::clone(client) as Arc<dyn DocumentStore>,
        }
    }

    /// Write a snapshot back to its file; Firestore writes are already durable.
    pub async fn persist(&self) -> Result<()> {
        if let Backend::Snapshot { store, path } = self {
            store
                .save(path)
                .await
                .map_err(|e| miette::miette!("failed to save {}: {}", path.display(), e))?;
            info!(path = %path.display(), "snapshot saved");
        }
        Ok(())
    }
}

pub fn identity_provider(args: &AuthArgs) -> Result<PhoneAuthClient> {
    let mut config = PhoneAuthConfig::new(&args.api_key);
    if let Some(url) = &args.identity_url {
        config = config.with_base_url(url);
    }
    if let Some(token) = &args.recaptcha_token {
        config = config.with_recaptcha_token(token);
    }
    PhoneAuthClient::new(config).map_err(|e| miette::miette!("{}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use raithamitra_store::{DocRef, Role};
    use serde_json::json;

    fn args(store_file: Option<PathBuf>) -> StoreArgs {
        StoreArgs {
            store_file,
            project_id: None,
            firestore_url: None,
            access_token: None,
        }
    }

    #[tokio::test]
    async fn test_missing_snapshot_starts_empty_and_is_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let backend = Backend::open(&args(Some(path.clone()))).await.unwrap();
        let store = backend.store();
        store
            .set(
                &DocRef::new("users", "U1"),
                json!({"role": Role::Farmer.as_str()})
                    .as_object()
                    .cloned()
                    .unwrap(),
                raithamitra_store::WriteMode::Overwrite,
                raithamitra_store::Precondition::Missing,
            )
            .await
            .unwrap();
        backend.persist().await.unwrap();

        let reopened = Backend::open(&args(Some(path))).await.unwrap();
        let doc = reopened
            .store()
            .get(&DocRef::new("users", "U1"))
            .await
            .unwrap();
        assert_eq!(doc.unwrap().str_field("role"), Some("Farmer"));
    }

    #[tokio::test]
    async fn test_firestore_requires_project() {
        let result = Backend::open(&args(None)).await;
        assert!(result.is_err());
    }
}
