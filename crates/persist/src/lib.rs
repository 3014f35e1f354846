//! glk persistence: reconciler state, deferred events and last-applied spec
//! history in a small SQLite file. Loaded once before an event is
//! dispatched, saved once after.

#![forbid(unsafe_code)]

use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use glk_core::{Deferred, ReconcilerState, Status};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Number of applied specs kept per application.
pub const LAST_APPLIED_KEEP: usize = 3;

/// Everything the reconciler needs to resume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub state: ReconcilerState,
    pub status: Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastApplied {
    pub app: String,
    pub generation: u64,
    pub ts: i64,
    /// Spec YAML, zstd-compressed when the feature is on.
    pub spec_zstd: Vec<u8>,
}

pub trait Store {
    /// `None` when nothing was ever saved for `app`; callers treat that as the zero state.
    fn load_snapshot(&self, app: &str) -> Result<Option<Snapshot>>;
    fn load_deferred(&self, app: &str) -> Result<Vec<Deferred>>;
    /// Replace snapshot and deferred queue in one transaction.
    fn save(&self, app: &str, snapshot: &Snapshot, deferred: &[Deferred]) -> Result<()>;
    fn put_last(&self, la: LastApplied) -> Result<()>;
    fn get_last(&self, app: &str, limit: Option<usize>) -> Result<Vec<LastApplied>>;
}

/// SQLite-backed store. Synchronous; one hook invocation at a time.
pub struct SqliteStore {
    db: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("GLK_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = std::time::Instant::now();
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS reconciler_state (
                app  TEXT PRIMARY KEY,
                doc  TEXT NOT NULL,
                ts   INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS deferred (
                app        TEXT NOT NULL,
                seq        INTEGER NOT NULL,
                event      TEXT NOT NULL,
                generation INTEGER NOT NULL,
                PRIMARY KEY (app, seq)
            );
            CREATE TABLE IF NOT EXISTS last_applied (
                app        TEXT NOT NULL,
                generation INTEGER NOT NULL,
                ts         INTEGER NOT NULL,
                spec       BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_last_applied_app_ts ON last_applied(app, ts DESC);",
        )
        .context("creating glk tables")?;
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, rusqlite::Connection>> {
        self.db.lock().map_err(|_| anyhow!("sqlite connection lock poisoned"))
    }
}

impl Store for SqliteStore {
    fn load_snapshot(&self, app: &str) -> Result<Option<Snapshot>> {
        let started = std::time::Instant::now();
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT doc FROM reconciler_state WHERE app = ?1")?;
        let mut rows = stmt.query([app])?;
        let out = match rows.next()? {
            Some(row) => {
                let doc: String = row.get(0)?;
                Some(serde_json::from_str(&doc).context("decoding persisted reconciler state")?)
            }
            None => None,
        };
        histogram!("persist_load_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }

    fn load_deferred(&self, app: &str) -> Result<Vec<Deferred>> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT event, generation FROM deferred WHERE app = ?1 ORDER BY seq ASC")?;
        let mut rows = stmt.query([app])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let event: String = row.get(0)?;
            let generation: i64 = row.get(1)?;
            out.push(Deferred {
                event: serde_json::from_str(&event).context("decoding deferred event")?,
                generation: u64::try_from(generation).unwrap_or_default(),
            });
        }
        Ok(out)
    }

    fn save(&self, app: &str, snapshot: &Snapshot, deferred: &[Deferred]) -> Result<()> {
        let started = std::time::Instant::now();
        let doc = serde_json::to_string(snapshot).context("encoding reconciler state")?;
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO reconciler_state(app, doc, ts) VALUES (?1, ?2, ?3)
             ON CONFLICT(app) DO UPDATE SET doc = excluded.doc, ts = excluded.ts",
            (app, &doc, now_ts()),
        )?;
        tx.execute("DELETE FROM deferred WHERE app = ?1", [app])?;
        for (seq, d) in deferred.iter().enumerate() {
            let event = serde_json::to_string(&d.event).context("encoding deferred event")?;
            tx.execute(
                "INSERT INTO deferred(app, seq, event, generation) VALUES (?1, ?2, ?3, ?4)",
                (app, seq as i64, &event, i64::try_from(d.generation).unwrap_or(i64::MAX)),
            )?;
        }
        tx.commit()?;
        debug!(app, deferred = deferred.len(), "state saved");
        histogram!("persist_save_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_save_total", 1u64);
        Ok(())
    }

    fn put_last(&self, la: LastApplied) -> Result<()> {
        let started = std::time::Instant::now();
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO last_applied(app, generation, ts, spec) VALUES (?1, ?2, ?3, ?4)",
            (&la.app, i64::try_from(la.generation).unwrap_or(i64::MAX), la.ts, &la.spec_zstd),
        )?;
        // Keep the newest few per app (delete older rows by rowid)
        tx.execute(
            "DELETE FROM last_applied
             WHERE app = ?1
               AND rowid NOT IN (
                   SELECT rowid FROM last_applied WHERE app = ?1 ORDER BY ts DESC, rowid DESC LIMIT ?2
               )",
            (&la.app, LAST_APPLIED_KEEP as i64),
        )?;
        tx.commit()?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        Ok(())
    }

    fn get_last(&self, app: &str, limit: Option<usize>) -> Result<Vec<LastApplied>> {
        let cap = limit.unwrap_or(LAST_APPLIED_KEEP);
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT generation, ts, spec FROM last_applied WHERE app = ?1 ORDER BY ts DESC, rowid DESC LIMIT ?2",
        )?;
        let mut rows = stmt.query((app, cap as i64))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let generation: i64 = row.get(0)?;
            out.push(LastApplied {
                app: app.to_string(),
                generation: u64::try_from(generation).unwrap_or_default(),
                ts: row.get(1)?,
                spec_zstd: row.get(2)?,
            });
        }
        Ok(out)
    }
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".glk");
        let _ = std::fs::create_dir_all(&p);
        p.push("glk.db");
        return p.to_string_lossy().to_string();
    }
    "glk.db".to_string()
}

/// Seconds since epoch.
pub fn now_ts() -> i64 { chrono::Utc::now().timestamp() }

#[cfg(feature = "zstd")]
pub fn maybe_compress(yaml: &str) -> Vec<u8> {
    let lvl: i32 = std::env::var("GLK_ZSTD_LEVEL").ok().and_then(|s| s.parse().ok()).unwrap_or(3);
    zstd::encode_all(yaml.as_bytes(), lvl).unwrap_or_else(|_| yaml.as_bytes().to_vec())
}

#[cfg(not(feature = "zstd"))]
pub fn maybe_compress(yaml: &str) -> Vec<u8> { yaml.as_bytes().to_vec() }

pub fn maybe_decompress(blob: &[u8]) -> String {
    #[cfg(feature = "zstd")]
    {
        if let Ok(de) = zstd::decode_all(std::io::Cursor::new(blob)) {
            return String::from_utf8_lossy(&de).to_string();
        }
    }
    String::from_utf8_lossy(blob).to_string()
}
