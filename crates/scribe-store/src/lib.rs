use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, params};
use scribe_core::{EventEnvelope, EventKind, runtime_dir};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY,
            session_id TEXT NOT NULL,
            seq_no INTEGER NOT NULL,
            at TEXT NOT NULL,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL
         );",
    ),
    (
        2,
        "CREATE TABLE IF NOT EXISTS mutations (
            id INTEGER PRIMARY KEY,
            session_id TEXT NOT NULL,
            seq_no INTEGER NOT NULL,
            path TEXT NOT NULL,
            kind TEXT NOT NULL,
            status TEXT NOT NULL,
            version_id TEXT,
            archived_version_id TEXT,
            reason TEXT,
            recorded_at TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_mutations_path_time ON mutations(path, recorded_at);",
    ),
];

/// One row of the mutation journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub session_id: Uuid,
    pub seq_no: u64,
    pub path: String,
    pub kind: String,
    pub status: String,
    pub version_id: Option<Uuid>,
    pub archived_version_id: Option<Uuid>,
    pub reason: Option<String>,
    pub recorded_at: String,
}

pub struct Store {
    pub root: PathBuf,
    db_path: PathBuf,
    events_path: PathBuf,
}

impl Store {
    pub fn new(workspace: &Path) -> Result<Self> {
        let root = runtime_dir(workspace);
        fs::create_dir_all(&root)?;
        let db_path = root.join("store.sqlite");
        let events_path = root.join("events.jsonl");
        let store = Self {
            root,
            db_path,
            events_path,
        };
        store.init_db()?;
        Ok(store)
    }

    pub fn db(&self) -> Result<Connection> {
        Ok(Connection::open(&self.db_path)?)
    }

    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    pub fn next_seq_no(&self, session_id: Uuid) -> Result<u64> {
        let conn = self.db()?;
        let mut stmt =
            conn.prepare("SELECT COALESCE(MAX(seq_no), 0) FROM events WHERE session_id = ?1")?;
        let current: i64 = stmt.query_row([session_id.to_string()], |r| r.get(0))?;
        Ok((current as u64) + 1)
    }

    pub fn append_event(&self, event: &EventEnvelope) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)?;
        writeln!(file, "{}", serde_json::to_string(event)?)?;

        let conn = self.db()?;
        conn.execute(
            "INSERT INTO events (session_id, seq_no, at, kind, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.session_id.to_string(),
                event.seq_no as i64,
                event.at.to_rfc3339(),
                event_kind_name(&event.kind),
                serde_json::to_string(&event.kind)?,
            ],
        )?;
        self.project_event(&conn, event)?;
        Ok(())
    }

    /// Newest first. `path` filters to one target.
    pub fn list_mutations(&self, path: Option<&str>, limit: usize) -> Result<Vec<MutationRecord>> {
        let conn = self.db()?;
        let mut stmt = conn.prepare(
            "SELECT session_id, seq_no, path, kind, status, version_id, archived_version_id, reason, recorded_at
             FROM mutations
             WHERE (?1 IS NULL OR path = ?1)
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![path, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (session_id, seq_no, path, kind, status, version_id, archived, reason, at) = row?;
            out.push(MutationRecord {
                session_id: Uuid::parse_str(&session_id)?,
                seq_no: seq_no as u64,
                path,
                kind,
                status,
                version_id: version_id.map(|v| Uuid::parse_str(&v)).transpose()?,
                archived_version_id: archived.map(|v| Uuid::parse_str(&v)).transpose()?,
                reason,
                recorded_at: at,
            });
        }
        Ok(out)
    }

    /// Replays `events.jsonl` for one path, independent of the sqlite tables.
    pub fn rebuild_history(&self, path: &str) -> Result<HistoryProjection> {
        if !self.events_path.exists() {
            return Ok(HistoryProjection::default());
        }
        let file = OpenOptions::new().read(true).open(&self.events_path)?;
        let reader = BufReader::new(file);

        let mut projection = HistoryProjection::default();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: EventEnvelope = serde_json::from_str(&line)?;
            if event.kind.path() != Some(path) {
                continue;
            }
            apply_projection(&mut projection, &event);
        }
        Ok(projection)
    }

    fn init_db(&self) -> Result<()> {
        let conn = self.db()?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
             );",
        )?;

        for (version, sql) in MIGRATIONS {
            let already: i64 = conn.query_row(
                "SELECT COUNT(1) FROM schema_migrations WHERE version = ?1",
                [*version],
                |r| r.get(0),
            )?;
            if already == 0 {
                conn.execute_batch(sql)?;
                conn.execute(
                    "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                    params![version, Utc::now().to_rfc3339()],
                )?;
            }
        }
        Ok(())
    }

    fn project_event(&self, conn: &Connection, event: &EventEnvelope) -> Result<()> {
        let row = match &event.kind {
            EventKind::MutationCommittedV1 {
                path,
                kind,
                version_id,
                archived_version_id,
            } => (path, kind.as_str(), "committed", Some(*version_id), *archived_version_id, None),
            EventKind::MutationRejectedV1 { path, kind, reason } => {
                (path, kind.as_str(), "rejected", None, None, Some(reason.as_str()))
            }
            EventKind::MutationDeniedV1 { path, kind } => {
                (path, kind.as_str(), "denied", None, None, None)
            }
            EventKind::MutationCancelledV1 { path, kind } => {
                (path, kind.as_str(), "cancelled", None, None, None)
            }
            EventKind::VersionRestoredV1 {
                path,
                from_version_id,
                version_id,
            } => (path, "restore", "committed", Some(*version_id), Some(*from_version_id), None),
            _ => return Ok(()),
        };
        let (path, kind, status, version_id, archived_version_id, reason) = row;
        conn.execute(
            "INSERT INTO mutations
             (session_id, seq_no, path, kind, status, version_id, archived_version_id, reason, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.session_id.to_string(),
                event.seq_no as i64,
                path,
                kind,
                status,
                version_id.map(|id| id.to_string()),
                archived_version_id.map(|id| id.to_string()),
                reason,
                event.at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HistoryProjection {
    pub committed: Vec<Uuid>,
    pub archived: Vec<Uuid>,
    pub rejected: Vec<String>,
    pub denied: usize,
    pub cancelled: usize,
    pub restored_from: Vec<Uuid>,
    pub pruned: Vec<Uuid>,
}

fn apply_projection(proj: &mut HistoryProjection, event: &EventEnvelope) {
    match &event.kind {
        EventKind::MutationCommittedV1 {
            version_id,
            archived_version_id,
            ..
        } => {
            proj.committed.push(*version_id);
            proj.archived.extend(archived_version_id);
        }
        EventKind::MutationRejectedV1 { reason, .. } => proj.rejected.push(reason.clone()),
        EventKind::MutationDeniedV1 { .. } => proj.denied = proj.denied.saturating_add(1),
        EventKind::MutationCancelledV1 { .. } => {
            proj.cancelled = proj.cancelled.saturating_add(1)
        }
        EventKind::VersionRestoredV1 {
            from_version_id,
            version_id,
            ..
        } => {
            proj.committed.push(*version_id);
            proj.restored_from.push(*from_version_id);
        }
        EventKind::VersionsPrunedV1 { removed, .. } => proj.pruned.extend(removed),
        EventKind::ToolProposedV1 { .. } | EventKind::ToolResultV1 { .. } => {}
    }
}

fn event_kind_name(kind: &EventKind) -> &'static str {
    match kind {
        EventKind::ToolProposedV1 { .. } => "ToolProposed@v1",
        EventKind::ToolResultV1 { .. } => "ToolResult@v1",
        EventKind::MutationCommittedV1 { .. } => "MutationCommitted@v1",
        EventKind::MutationRejectedV1 { .. } => "MutationRejected@v1",
        EventKind::MutationDeniedV1 { .. } => "MutationDenied@v1",
        EventKind::MutationCancelledV1 { .. } => "MutationCancelled@v1",
        EventKind::VersionRestoredV1 { .. } => "VersionRestored@v1",
        EventKind::VersionsPrunedV1 { .. } => "VersionsPruned@v1",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> Store {
        let workspace =
            std::env::temp_dir().join(format!("scribe-store-test-{}", Uuid::now_v7()));
        fs::create_dir_all(&workspace).expect("temp workspace");
        Store::new(&workspace).expect("store")
    }

    fn envelope(store: &Store, session_id: Uuid, kind: EventKind) -> EventEnvelope {
        EventEnvelope {
            seq_no: store.next_seq_no(session_id).expect("seq"),
            at: Utc::now(),
            session_id,
            kind,
        }
    }

    #[test]
    fn seq_numbers_advance_per_session() {
        let store = temp_store();
        let session = Uuid::now_v7();
        assert_eq!(store.next_seq_no(session).expect("seq"), 1);
        let ev = envelope(
            &store,
            session,
            EventKind::MutationDeniedV1 {
                path: "a.txt".to_string(),
                kind: "update".to_string(),
            },
        );
        store.append_event(&ev).expect("append");
        assert_eq!(store.next_seq_no(session).expect("seq"), 2);
        assert_eq!(store.next_seq_no(Uuid::now_v7()).expect("seq"), 1);
    }

    #[test]
    fn mutation_events_are_projected_into_journal() {
        let store = temp_store();
        let session = Uuid::now_v7();
        let (v1, v0) = (Uuid::now_v7(), Uuid::now_v7());
        for kind in [
            EventKind::MutationCommittedV1 {
                path: "a.txt".to_string(),
                kind: "update".to_string(),
                version_id: v1,
                archived_version_id: Some(v0),
            },
            EventKind::MutationRejectedV1 {
                path: "a.txt".to_string(),
                kind: "update".to_string(),
                reason: "HASH_MISMATCH".to_string(),
            },
            EventKind::MutationCancelledV1 {
                path: "b.txt".to_string(),
                kind: "delete".to_string(),
            },
            EventKind::VersionsPrunedV1 {
                path: "a.txt".to_string(),
                removed: vec![v0],
            },
        ] {
            let ev = envelope(&store, session, kind);
            store.append_event(&ev).expect("append");
        }

        let all = store.list_mutations(None, 10).expect("list");
        assert_eq!(all.len(), 3);

        let a = store.list_mutations(Some("a.txt"), 10).expect("list a");
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].status, "rejected");
        assert_eq!(a[0].reason.as_deref(), Some("HASH_MISMATCH"));
        assert_eq!(a[1].status, "committed");
        assert_eq!(a[1].version_id, Some(v1));
        assert_eq!(a[1].archived_version_id, Some(v0));

        assert_eq!(store.list_mutations(None, 1).expect("limit").len(), 1);
    }

    #[test]
    fn rebuild_history_replays_jsonl_for_one_path() {
        let store = temp_store();
        let session = Uuid::now_v7();
        let (v1, v2, v0) = (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7());
        for kind in [
            EventKind::MutationCommittedV1 {
                path: "a.txt".to_string(),
                kind: "update".to_string(),
                version_id: v1,
                archived_version_id: Some(v0),
            },
            EventKind::VersionRestoredV1 {
                path: "a.txt".to_string(),
                from_version_id: v0,
                version_id: v2,
            },
            EventKind::MutationDeniedV1 {
                path: "other.txt".to_string(),
                kind: "create".to_string(),
            },
        ] {
            let ev = envelope(&store, session, kind);
            store.append_event(&ev).expect("append");
        }

        let first = store.rebuild_history("a.txt").expect("rebuild");
        let second = store.rebuild_history("a.txt").expect("rebuild again");
        assert_eq!(first, second);
        assert_eq!(first.committed, vec![v1, v2]);
        assert_eq!(first.archived, vec![v0]);
        assert_eq!(first.restored_from, vec![v0]);
        assert_eq!(first.denied, 0);
    }

    #[test]
    fn reopening_store_keeps_migrations_idempotent() {
        let store = temp_store();
        let workspace = store.root.parent().expect("workspace").to_path_buf();
        drop(store);
        let reopened = Store::new(&workspace).expect("reopen");
        let applied: i64 = reopened
            .db()
            .expect("db")
            .query_row("SELECT COUNT(1) FROM schema_migrations", [], |r| r.get(0))
            .expect("count");
        assert_eq!(applied, MIGRATIONS.len() as i64);
    }
}
