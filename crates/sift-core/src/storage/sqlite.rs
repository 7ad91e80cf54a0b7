//! SQLite content hash store
//!
//! Separate reader/writer connections behind mutexes so the store is
//! `Send + Sync` and shared as `Arc<SqliteContentHashStore>`. Every
//! statement runs on the blocking pool, never on a runtime worker.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use directories::ProjectDirs;
use rusqlite::{params, params_from_iter, Connection, ErrorCode};

use super::{ContentHashRecord, ContentHashStore, Result, StorageError};

/// Hashes bound per lookup statement, at most
pub const LOOKUP_CHUNK_SIZE: usize = 500;

/// Dedup index stored in SQLite
pub struct SqliteContentHashStore {
    writer: Arc<Mutex<Connection>>,
    reader: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteContentHashStore {
    /// Apply PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -16000;
             PRAGMA temp_store = MEMORY;
             PRAGMA busy_timeout = 5000;
             PRAGMA journal_size_limit = 67108864;",
        )?;
        Ok(())
    }

    /// Default database location in the platform data directory
    pub fn default_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "sift", "sift").ok_or_else(|| {
            StorageError::Init("Could not determine project directories".to_string())
        })?;
        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            let _ = std::fs::set_permissions(data_dir, perms);
        }
        Ok(data_dir.join("dedup.db"))
    }

    /// Open (creating and migrating if needed) the store
    pub fn new(db_path: Option<PathBuf>) -> Result<Self> {
        let path = match db_path {
            Some(p) => {
                if let Some(parent) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                p
            }
            None => Self::default_path()?,
        };

        let writer_conn = Connection::open(&path)?;
        #[cfg(unix)]
        if path.exists() {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&path, perms);
        }
        Self::configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        tracing::debug!(path = %path.display(), "dedup index opened");
        Ok(Self {
            writer: Arc::new(Mutex::new(writer_conn)),
            reader: Arc::new(Mutex::new(reader_conn)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_reader<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        run_blocking(Arc::clone(&self.reader), "Reader", f).await
    }

    async fn with_writer<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        run_blocking(Arc::clone(&self.writer), "Writer", f).await
    }

    fn lookup_chunk(
        conn: &Connection,
        workspace_id: &str,
        hashes: &[String],
        exclude_source_id: Option<&str>,
        found: &mut HashSet<String>,
    ) -> Result<()> {
        let placeholders = vec!["?"; hashes.len()].join(", ");
        let mut sql = format!(
            "SELECT content_hash FROM content_hashes
             WHERE workspace_id = ? AND content_hash IN ({placeholders})"
        );
        if exclude_source_id.is_some() {
            sql.push_str(" AND source_id <> ?");
        }

        let mut values: Vec<&str> = Vec::with_capacity(hashes.len() + 2);
        values.push(workspace_id);
        values.extend(hashes.iter().map(String::as_str));
        if let Some(source) = exclude_source_id {
            values.push(source);
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| row.get::<_, String>(0))?;
        for hash in rows {
            found.insert(hash?);
        }
        Ok(())
    }
}

/// Lock `conn` and run `f` on tokio's blocking pool
async fn run_blocking<T, F>(conn: Arc<Mutex<Connection>>, role: &'static str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.lock().map_err(|_| StorageError::LockPoisoned(role))?;
        f(&mut guard)
    })
    .await
    .map_err(|e| StorageError::Task(format!("{role} task join failed: {e}")))?
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl ContentHashStore for SqliteContentHashStore {
    async fn existing_hashes(
        &self,
        workspace_id: &str,
        hashes: &[String],
        exclude_source_id: Option<&str>,
    ) -> Result<HashSet<String>> {
        if hashes.is_empty() {
            return Ok(HashSet::new());
        }
        let workspace_id = workspace_id.to_string();
        let hashes = hashes.to_vec();
        let exclude = exclude_source_id.map(str::to_string);
        self.with_reader(move |conn| {
            let mut found = HashSet::new();
            for chunk in hashes.chunks(LOOKUP_CHUNK_SIZE) {
                Self::lookup_chunk(conn, &workspace_id, chunk, exclude.as_deref(), &mut found)?;
            }
            Ok(found)
        })
        .await
    }

    async fn upsert(&self, records: &[ContentHashRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let records = records.to_vec();
        self.with_writer(move |conn| {
            let tx = conn.transaction()?;
            let mut written = 0;
            {
                // a hash owned by another source is left alone
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO content_hashes
                        (workspace_id, content_hash, source_id, chunk_index, fingerprint, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(workspace_id, content_hash) DO UPDATE SET
                        chunk_index = excluded.chunk_index,
                        fingerprint = excluded.fingerprint
                     WHERE content_hashes.source_id = excluded.source_id",
                )?;
                for record in &records {
                    let outcome = stmt.execute(params![
                        record.workspace_id,
                        record.content_hash,
                        record.source_id,
                        record.chunk_index,
                        record.fingerprint,
                        record.created_at.to_rfc3339(),
                    ]);
                    match outcome {
                        Ok(n) => written += n,
                        Err(e) if is_constraint_violation(&e) => {
                            tracing::debug!(
                                workspace_id = %record.workspace_id,
                                source_id = %record.source_id,
                                "duplicate content hash race ignored"
                            );
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            tx.commit()?;
            Ok(written)
        })
        .await
    }

    async fn delete_source(&self, workspace_id: &str, source_id: &str) -> Result<usize> {
        let (workspace_id, source_id) = (workspace_id.to_string(), source_id.to_string());
        self.with_writer(move |conn| {
            Ok(conn.execute(
                "DELETE FROM content_hashes WHERE workspace_id = ?1 AND source_id = ?2",
                params![workspace_id, source_id],
            )?)
        })
        .await
    }

    async fn delete_workspace(&self, workspace_id: &str) -> Result<usize> {
        let workspace_id = workspace_id.to_string();
        self.with_writer(move |conn| {
            Ok(conn.execute(
                "DELETE FROM content_hashes WHERE workspace_id = ?1",
                params![workspace_id],
            )?)
        })
        .await
    }

    async fn count(&self, workspace_id: &str) -> Result<usize> {
        let workspace_id = workspace_id.to_string();
        self.with_reader(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM content_hashes WHERE workspace_id = ?1",
                params![workspace_id],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as usize)
        })
        .await
    }
}

impl std::fmt::Debug for SqliteContentHashStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteContentHashStore")
            .field("path", &self.path)
            .finish()
    }
}
