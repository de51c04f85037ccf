//! Lookup of captured requests.
//!
//! Persistence belongs to the ingestion side; replay only needs to fetch a
//! record by id. [`InMemoryRequestStore`] backs the binary and the tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::error::Error;
use crate::request::CapturedRequest;

/// Source of captured requests.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Fetch a captured request by id. `Ok(None)` if there is no such record.
    async fn get(&self, id: Uuid) -> Result<Option<Arc<CapturedRequest>>, Error>;
}

/// Captured requests held in memory.
#[derive(Debug, Default)]
pub struct InMemoryRequestStore {
    requests: RwLock<HashMap<Uuid, Arc<CapturedRequest>>>,
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of captured requests.
    pub fn from_json_file(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Store(format!("cannot read {}: {e}", path.display())))?;
        let requests: Vec<CapturedRequest> = serde_json::from_str(&content)
            .map_err(|e| Error::Store(format!("cannot parse {}: {e}", path.display())))?;

        let store = Self::new();
        let count = requests.len();
        for request in requests {
            store.insert(request)?;
        }
        info!(path = %path.display(), count, "loaded captured requests");
        Ok(store)
    }

    pub fn insert(&self, request: CapturedRequest) -> Result<(), Error> {
        let mut requests = self
            .requests
            .write()
            .map_err(|_| Error::Store("request store lock poisoned".into()))?;
        requests.insert(request.id, Arc::new(request));
        Ok(())
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn get(&self, id: Uuid) -> Result<Option<Arc<CapturedRequest>>, Error> {
        let requests = self
            .requests
            .read()
            .map_err(|_| Error::Store("request store lock poisoned".into()))?;
        Ok(requests.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ReplayMethod;
    use std::io::Write;

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = InMemoryRequestStore::new();
        let req = CapturedRequest::new("user-1", ReplayMethod::Get);
        let id = req.id;
        store.insert(req).unwrap();

        assert_eq!(store.get(id).await.unwrap().unwrap().owner_id, "user-1");
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id": "6f1c2a43-9a0e-4d67-8f55-2b1f8a8c9e01", "ownerId": "u", "method": "DELETE"}}]"#
        )
        .unwrap();

        let store = InMemoryRequestStore::from_json_file(file.path()).unwrap();
        let id: Uuid = "6f1c2a43-9a0e-4d67-8f55-2b1f8a8c9e01".parse().unwrap();
        let req = store.get(id).await.unwrap().unwrap();
        assert_eq!(req.method, ReplayMethod::Delete);
    }

    #[test]
    fn test_from_json_file_errors() {
        let missing = InMemoryRequestStore::from_json_file(Path::new("/nonexistent/requests.json"));
        assert!(matches!(missing, Err(Error::Store(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(InMemoryRequestStore::from_json_file(file.path()).is_err());
    }
}
