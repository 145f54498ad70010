use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::VeloError;
use crate::events::{EventEmitter, VeloEvent};
use crate::settings::Settings;

/// One ticket row mirrored from the remote backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRecord {
    pub id: i64,
    #[serde(default)]
    pub summary: String,
}

/// Read-only access to the remote ticket table.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    async fn fetch_tickets(&self) -> Result<Vec<TicketRecord>, VeloError>;
}

/// Local cache of tickets. Not authoritative.
pub trait TicketStore: Send + Sync {
    fn insert(&self, record: TicketRecord) -> Result<(), VeloError>;
    fn tickets(&self) -> Vec<TicketRecord>;

    /// Insert `records` in order, stopping at the first failure.
    ///
    /// Stores that persist can override this to write once per batch.
    fn insert_all(&self, records: Vec<TicketRecord>) -> Result<usize, VeloError> {
        let mut inserted = 0;
        for record in records {
            self.insert(record)?;
            inserted += 1;
        }
        Ok(inserted)
    }
}

const TICKETS_TABLE: &str = "tickets";
const TICKET_COLUMNS: &str = "id,summary";

/// PostgREST-style backend (`/rest/v1/<table>`), authenticated with an
/// anonymous API key.
pub struct SupabaseBackend {
    client: reqwest::Client,
    base_url: url::Url,
    anon_key: String,
}

impl SupabaseBackend {
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self, VeloError> {
        let base_url = url::Url::parse(base_url.trim())
            .map_err(|e| VeloError::Config(format!("invalid backend URL {base_url:?}: {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(VeloError::Config(format!(
                "unsupported backend URL scheme: {}",
                base_url.scheme()
            )));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            anon_key: anon_key.to_string(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, VeloError> {
        let url = settings
            .backend_url
            .as_deref()
            .ok_or_else(|| VeloError::Config("backend URL not configured".into()))?;
        let key = settings.backend_anon_key.as_deref().unwrap_or_default();
        Self::new(url, key)
    }

    fn tickets_endpoint(&self) -> String {
        format!(
            "{}/rest/v1/{}?select={}",
            self.base_url.as_str().trim_end_matches('/'),
            TICKETS_TABLE,
            urlencoding::encode(TICKET_COLUMNS)
        )
    }
}

#[async_trait]
impl RemoteBackend for SupabaseBackend {
    async fn fetch_tickets(&self) -> Result<Vec<TicketRecord>, VeloError> {
        let endpoint = self.tickets_endpoint();
        tracing::debug!("fetching tickets from {}", endpoint);

        let resp = self
            .client
            .get(&endpoint)
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .send()
            .await
            .map_err(|e| VeloError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(VeloError::Http(format!(
                "backend returned status {}",
                resp.status()
            )));
        }

        resp.json::<Vec<TicketRecord>>()
            .await
            .map_err(|e| VeloError::Decode(format!("invalid ticket payload: {e}")))
    }
}

/// In-memory store. Without `unique_ids` every insert appends.
#[derive(Default)]
pub struct MemoryTicketStore {
    records: Mutex<Vec<TicketRecord>>,
    unique_ids: bool,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that replaces the row sharing an id instead of appending.
    pub fn with_unique_ids() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            unique_ids: true,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TicketRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TicketStore for MemoryTicketStore {
    fn insert(&self, record: TicketRecord) -> Result<(), VeloError> {
        let mut records = self.lock();
        if self.unique_ids {
            if let Some(existing) = records.iter_mut().find(|r| r.id == record.id) {
                *existing = record;
                return Ok(());
            }
        }
        records.push(record);
        Ok(())
    }

    fn tickets(&self) -> Vec<TicketRecord> {
        self.lock().clone()
    }
}

/// File-backed store in `<data_dir>/tickets.json`, keyed by ticket id.
///
/// The in-memory map only changes after the file write succeeds, so the
/// cache never holds rows the file lacks.
pub struct JsonTicketStore {
    records: Mutex<HashMap<i64, TicketRecord>>,
    file_path: PathBuf,
}

impl JsonTicketStore {
    pub fn new(data_dir: &str) -> Result<Self, VeloError> {
        let file_path = PathBuf::from(data_dir).join("tickets.json");
        let records = Self::load(&file_path)?;
        Ok(Self {
            records: Mutex::new(records),
            file_path,
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i64, TicketRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load(path: &Path) -> Result<HashMap<i64, TicketRecord>, VeloError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(VeloError::Store(e.to_string())),
        };
        let list: Vec<TicketRecord> = serde_json::from_str(&contents).map_err(|e| {
            VeloError::Store(format!("corrupt ticket cache {}: {e}", path.display()))
        })?;
        Ok(list.into_iter().map(|r| (r.id, r)).collect())
    }

    fn save(&self, records: &HashMap<i64, TicketRecord>) -> Result<(), VeloError> {
        let mut list: Vec<_> = records.values().cloned().collect();
        list.sort_by_key(|r| r.id);
        let json =
            serde_json::to_string_pretty(&list).map_err(|e| VeloError::Store(e.to_string()))?;
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| VeloError::Store(e.to_string()))?;
        }
        std::fs::write(&self.file_path, json).map_err(|e| VeloError::Store(e.to_string()))
    }
}

impl TicketStore for JsonTicketStore {
    fn insert(&self, record: TicketRecord) -> Result<(), VeloError> {
        self.insert_all(vec![record]).map(|_| ())
    }

    /// One file write for the whole batch. A failed write keeps none of it.
    fn insert_all(&self, records: Vec<TicketRecord>) -> Result<usize, VeloError> {
        let mut current = self.lock();
        let mut staged = current.clone();
        let count = records.len();
        for record in records {
            staged.insert(record.id, record);
        }
        self.save(&staged)?;
        *current = staged;
        Ok(count)
    }

    fn tickets(&self) -> Vec<TicketRecord> {
        let mut list: Vec<_> = self.lock().values().cloned().collect();
        list.sort_by_key(|r| r.id);
        list
    }
}

/// One-way mirror of remote tickets into a local store.
pub struct TicketSync {
    backend: Arc<dyn RemoteBackend>,
    emitter: EventEmitter,
}

impl TicketSync {
    pub fn new(backend: Arc<dyn RemoteBackend>, emitter: EventEmitter) -> Self {
        Self { backend, emitter }
    }

    /// Fetch every remote ticket and hand them to `store` as one batch.
    ///
    /// Append-only: nothing is updated or deleted, so repeated runs duplicate
    /// rows unless the store dedups by id. On failure the run stops; what was
    /// already committed stays, which for a row-at-a-time store means the
    /// records before the failing one.
    pub async fn sync(&self, store: &dyn TicketStore) -> Result<usize, VeloError> {
        match self.run(store).await {
            Ok(inserted) => {
                tracing::info!(inserted, "ticket sync complete");
                self.emitter.emit(VeloEvent::TicketsSynced { inserted });
                Ok(inserted)
            }
            Err(e) => {
                tracing::error!("ticket sync failed: {e}");
                self.emitter.emit(VeloEvent::SyncFailed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn run(&self, store: &dyn TicketStore) -> Result<usize, VeloError> {
        let records = self.backend.fetch_tickets().await?;
        tracing::debug!(count = records.len(), "fetched remote tickets");
        store.insert_all(records)
    }
}
