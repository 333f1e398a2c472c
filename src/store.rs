//! Candidate archive.
//!
//! Every candidate that ever entered a cycle is kept here, including retired
//! ones, so lineage and match history stay queryable. Writes enforce that a
//! candidate's identity (text, parent, cycle) never changes, that match lists
//! only grow, and that parents come from strictly earlier cycles.

use async_trait::async_trait;
use fs2::FileExt;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::candidate::{validate_lineage, Candidate, CandidateId, LineageError, MatchRecord};

/// A candidate plus its archive status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCandidate {
    pub candidate: Candidate,
    /// Cycle at whose end the candidate was retired.
    pub retired_cycle: Option<u32>,
}

impl StoredCandidate {
    pub fn is_active(&self) -> bool {
        self.retired_cycle.is_none()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("task join error: {0}")]
    Join(String),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("lineage error: {0}")]
    Lineage(#[from] LineageError),
    #[error("candidate {id} cannot change {field} once stored")]
    Immutable { id: CandidateId, field: &'static str },
    #[error("candidate {0} not found")]
    NotFound(CandidateId),
}

#[async_trait]
pub trait CandidateStore: Send + Sync {
    /// Insert or update a candidate.
    async fn put(&self, candidate: &Candidate) -> Result<(), StoreError>;
    async fn get(&self, id: &CandidateId) -> Result<Option<StoredCandidate>, StoreError>;
    /// Mark candidates as retired at the end of `cycle`. Returns how many
    /// were newly retired; already-retired ids keep their original cycle.
    async fn retire(&self, ids: &[CandidateId], cycle: u32) -> Result<usize, StoreError>;
    /// The candidate followed by its ancestors, newest first.
    async fn lineage(&self, id: &CandidateId) -> Result<Vec<Candidate>, StoreError>;
    /// Every stored candidate in insertion order.
    async fn all(&self) -> Result<Vec<StoredCandidate>, StoreError>;
}

// =============================================================================
// Write rules
// =============================================================================

fn is_prefix(old: &[MatchRecord], new: &[MatchRecord]) -> bool {
    new.len() >= old.len() && new[..old.len()] == *old
}

/// Checks an update against the stored version.
fn check_update(existing: &Candidate, next: &Candidate) -> Result<(), StoreError> {
    let immutable = |field| {
        Err(StoreError::Immutable {
            id: next.id.clone(),
            field,
        })
    };
    if existing.text != next.text {
        return immutable("text");
    }
    if existing.parent != next.parent {
        return immutable("parent");
    }
    if existing.cycle != next.cycle {
        return immutable("cycle");
    }
    if !is_prefix(&existing.wins, &next.wins) {
        return immutable("recorded wins");
    }
    if !is_prefix(&existing.losses, &next.losses) {
        return immutable("recorded losses");
    }
    Ok(())
}

/// Ancestor walk shared by both backends.
fn walk_lineage<F>(id: &CandidateId, mut lookup: F) -> Result<Vec<Candidate>, StoreError>
where
    F: FnMut(&CandidateId) -> Result<Option<Candidate>, StoreError>,
{
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut next = Some(id.clone());
    while let Some(current) = next.take() {
        if !seen.insert(current.clone()) {
            break;
        }
        match lookup(&current)? {
            Some(c) => {
                next = c.parent.clone();
                chain.push(c);
            }
            None if chain.is_empty() => return Err(StoreError::NotFound(current)),
            None => break,
        }
    }
    Ok(chain)
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Default)]
struct MemoryInner {
    order: Vec<CandidateId>,
    rows: HashMap<CandidateId, StoredCandidate>,
}

/// Process-local store, used by tests and one-shot CLI runs without `--store`.
#[derive(Default, Clone)]
pub struct InMemoryCandidateStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl InMemoryCandidateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CandidateStore for InMemoryCandidateStore {
    async fn put(&self, candidate: &Candidate) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        let inner = &mut *guard;
        if let Some(row) = inner.rows.get_mut(&candidate.id) {
            check_update(&row.candidate, candidate)?;
            row.candidate = candidate.clone();
            return Ok(());
        }

        validate_lineage(candidate, |p| inner.rows.get(p).map(|s| &s.candidate))?;
        inner.order.push(candidate.id.clone());
        inner.rows.insert(
            candidate.id.clone(),
            StoredCandidate {
                candidate: candidate.clone(),
                retired_cycle: None,
            },
        );
        Ok(())
    }

    async fn get(&self, id: &CandidateId) -> Result<Option<StoredCandidate>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.rows.get(id).cloned())
    }

    async fn retire(&self, ids: &[CandidateId], cycle: u32) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        let mut retired = 0;
        for id in ids {
            let row = inner
                .rows
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            if row.retired_cycle.is_none() {
                row.retired_cycle = Some(cycle);
                retired += 1;
            }
        }
        Ok(retired)
    }

    async fn lineage(&self, id: &CandidateId) -> Result<Vec<Candidate>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        walk_lineage(id, |c| Ok(inner.rows.get(c).map(|s| s.candidate.clone())))
    }

    async fn all(&self) -> Result<Vec<StoredCandidate>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.rows.get(id).cloned())
            .collect())
    }
}

// =============================================================================
// SQLite
// =============================================================================

#[derive(Clone)]
pub struct SqliteCandidateStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCandidateStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             CREATE TABLE IF NOT EXISTS candidates (\
               seq INTEGER PRIMARY KEY AUTOINCREMENT,\
               id TEXT NOT NULL UNIQUE,\
               cycle INTEGER NOT NULL,\
               parent_id TEXT,\
               rating REAL,\
               retired_cycle INTEGER,\
               text_hash TEXT NOT NULL,\
               body TEXT NOT NULL,\
               created_at INTEGER NOT NULL,\
               updated_at INTEGER NOT NULL\
             );\
             CREATE INDEX IF NOT EXISTS candidates_parent ON candidates(parent_id);",
        )?;

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("ARENA_STORE_PATH") {
            return PathBuf::from(path);
        }
        PathBuf::from(".arena_candidates.sqlite")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_exclusive(&self) -> Result<StoreLock, StoreError> {
        StoreLock::new(&self.path)
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError>,
    {
        let guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&guard)
    }

    async fn blocking<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.with_conn(f))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Write every stored candidate as one JSON object per line.
    pub async fn export_jsonl(&self, path: impl AsRef<Path>) -> Result<usize, StoreError> {
        let path = path.as_ref().to_path_buf();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT body, retired_cycle, created_at, updated_at FROM candidates ORDER BY seq",
            )?;
            let mut rows = stmt.query([])?;
            let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
            let mut written = 0;
            while let Some(row) = rows.next()? {
                let record = StoreExportRow {
                    candidate: decode(&row.get::<_, String>(0)?)?,
                    retired_cycle: row.get::<_, Option<i64>>(1)?.map(|v| v as u32),
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                };
                let line =
                    serde_json::to_string(&record).map_err(|e| StoreError::Serde(e.to_string()))?;
                writeln!(file, "{line}")?;
                written += 1;
            }
            file.flush()?;
            Ok(written)
        })
        .await
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreExportRow {
    pub candidate: Candidate,
    pub retired_cycle: Option<u32>,
    pub created_at: i64,
    pub updated_at: i64,
}

fn decode(body: &str) -> Result<Candidate, StoreError> {
    serde_json::from_str(body).map_err(|e| StoreError::Serde(e.to_string()))
}

fn load(conn: &Connection, id: &CandidateId) -> Result<Option<StoredCandidate>, StoreError> {
    let row = conn
        .query_row(
            "SELECT body, retired_cycle FROM candidates WHERE id = ?1",
            params![id.as_str()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(1)?)),
        )
        .optional()?;
    row.map(|(body, retired)| {
        Ok(StoredCandidate {
            candidate: decode(&body)?,
            retired_cycle: retired.map(|v| v as u32),
        })
    })
    .transpose()
}

#[async_trait]
impl CandidateStore for SqliteCandidateStore {
    async fn put(&self, candidate: &Candidate) -> Result<(), StoreError> {
        let candidate = candidate.clone();
        self.blocking(move |conn| {
            match load(conn, &candidate.id)? {
                Some(existing) => check_update(&existing.candidate, &candidate)?,
                None => {
                    let parent = match &candidate.parent {
                        Some(p) => load(conn, p)?.map(|s| s.candidate),
                        None => None,
                    };
                    validate_lineage(&candidate, |_| parent.as_ref())?;
                }
            }

            let body =
                serde_json::to_string(&candidate).map_err(|e| StoreError::Serde(e.to_string()))?;
            let now = now_epoch();
            conn.execute(
                "INSERT INTO candidates (\
                    id, cycle, parent_id, rating, retired_cycle, text_hash, body, created_at, updated_at\
                 ) VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6, ?7, ?8)\
                 ON CONFLICT(id) DO UPDATE SET\
                    rating = excluded.rating,\
                    body = excluded.body,\
                    updated_at = excluded.updated_at",
                params![
                    candidate.id.as_str(),
                    candidate.cycle as i64,
                    candidate.parent.as_ref().map(|p| p.as_str()),
                    candidate.rating,
                    blake3::hash(candidate.text.as_bytes()).to_hex().to_string(),
                    body,
                    now,
                    now,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get(&self, id: &CandidateId) -> Result<Option<StoredCandidate>, StoreError> {
        let id = id.clone();
        self.blocking(move |conn| load(conn, &id)).await
    }

    async fn retire(&self, ids: &[CandidateId], cycle: u32) -> Result<usize, StoreError> {
        let ids = ids.to_vec();
        self.blocking(move |conn| {
            let now = now_epoch();
            let mut retired = 0;
            for id in &ids {
                if load(conn, id)?.is_none() {
                    return Err(StoreError::NotFound(id.clone()));
                }
                retired += conn.execute(
                    "UPDATE candidates SET retired_cycle = ?1, updated_at = ?2\
                     WHERE id = ?3 AND retired_cycle IS NULL",
                    params![cycle as i64, now, id.as_str()],
                )?;
            }
            Ok(retired)
        })
        .await
    }

    async fn lineage(&self, id: &CandidateId) -> Result<Vec<Candidate>, StoreError> {
        let id = id.clone();
        self.blocking(move |conn| {
            walk_lineage(&id, |c| Ok(load(conn, c)?.map(|s| s.candidate)))
        })
        .await
    }

    async fn all(&self) -> Result<Vec<StoredCandidate>, StoreError> {
        self.blocking(|conn| {
            let mut stmt =
                conn.prepare("SELECT body, retired_cycle FROM candidates ORDER BY seq")?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(StoredCandidate {
                    candidate: decode(&row.get::<_, String>(0)?)?,
                    retired_cycle: row.get::<_, Option<i64>>(1)?.map(|v| v as u32),
                });
            }
            Ok(out)
        })
        .await
    }
}

/// Exclusive advisory lock on `<db>.lock`, held until dropped.
#[derive(Debug)]
pub struct StoreLock {
    _file: std::fs::File,
}

impl StoreLock {
    fn new(db_path: &Path) -> Result<Self, StoreError> {
        let mut lock_path = db_path.to_path_buf();
        lock_path.set_extension("lock");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { _file: file })
    }
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_rejects_identity_changes() {
        let store = InMemoryCandidateStore::new();
        let c = Candidate::new("a", "text");
        store.put(&c).await.unwrap();

        let mut rated = c.clone();
        rated.rating = Some(1216.0);
        store.put(&rated).await.unwrap();

        let mut edited = rated.clone();
        edited.text = "rewritten".into();
        assert!(matches!(
            store.put(&edited).await,
            Err(StoreError::Immutable { field: "text", .. })
        ));
    }

    #[tokio::test]
    async fn memory_store_lineage_and_retire() {
        let store = InMemoryCandidateStore::new();
        store.put(&Candidate::new("root", "r").in_cycle(0)).await.unwrap();
        store
            .put(&Candidate::new("mid", "m").in_cycle(1).with_parent("root"))
            .await
            .unwrap();
        store
            .put(&Candidate::new("leaf", "l").in_cycle(2).with_parent("mid"))
            .await
            .unwrap();

        let chain: Vec<_> = store
            .lineage(&"leaf".into())
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id.to_string())
            .collect();
        assert_eq!(chain, vec!["leaf", "mid", "root"]);

        assert_eq!(store.retire(&["root".into()], 1).await.unwrap(), 1);
        assert_eq!(store.retire(&["root".into()], 2).await.unwrap(), 0);
        let root = store.get(&"root".into()).await.unwrap().unwrap();
        assert_eq!(root.retired_cycle, Some(1));
    }

    #[tokio::test]
    async fn same_cycle_parent_rejected() {
        let store = InMemoryCandidateStore::new();
        store.put(&Candidate::new("p", "p").in_cycle(1)).await.unwrap();
        let err = store
            .put(&Candidate::new("c", "c").in_cycle(1).with_parent("p"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Lineage(LineageError::NotEarlier { .. })));
    }
}
