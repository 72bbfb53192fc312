use chrono::{DateTime, Utc};
use cms_core::events::{event_kind_tag, Event};
use cms_core::types::{ContentId, WorkflowId};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::state_machine::LifecycleState;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("sqlite error: {source}")]
    Sql {
        #[from]
        source: rusqlite::Error,
    },
    #[error("json serialization error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("timestamp parse error for value '{value}': {source}")]
    TimestampParse {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("failed to create state directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("workflow id {workflow_id} is already in use")]
    WorkflowIdTaken { workflow_id: WorkflowId },
    #[error("sqlite connection lock poisoned")]
    Poisoned,
}

/// Result of recording a directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryRecord {
    Created,
    /// Another process already owns the content id.
    Existing(WorkflowId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub content_id: ContentId,
    pub workflow_id: WorkflowId,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| PersistenceError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
        self.conn.lock().map_err(|_| PersistenceError::Poisoned)
    }

    pub fn migrate(&self) -> Result<(), PersistenceError> {
        self.conn()?.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS processes (
    workflow_id TEXT PRIMARY KEY,
    content_id TEXT NOT NULL,
    stage_tag TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_processes_content ON processes(content_id);
CREATE INDEX IF NOT EXISTS idx_processes_stage ON processes(stage_tag);

CREATE TABLE IF NOT EXISTS events (
    event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    workflow_id TEXT NOT NULL,
    at TEXT NOT NULL,
    kind_tag TEXT NOT NULL,
    payload_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_workflow_at ON events(workflow_id, at);

CREATE TABLE IF NOT EXISTS directory (
    content_id TEXT PRIMARY KEY,
    workflow_id TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);
"#,
        )?;
        Ok(())
    }

    /// Inserts a brand-new process together with its directory entry and
    /// opening events in one transaction. When the content id is already
    /// mapped nothing is written and the owning process is returned.
    pub fn insert_new_process(
        &self,
        state: &LifecycleState,
        events: &[Event],
    ) -> Result<DirectoryRecord, PersistenceError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let owner: Option<String> = tx
            .query_row(
                "SELECT workflow_id FROM directory WHERE content_id = ?1",
                params![state.input.content_id.0],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(owner) = owner {
            return Ok(DirectoryRecord::Existing(WorkflowId(owner)));
        }

        let taken: Option<String> = tx
            .query_row(
                "SELECT workflow_id FROM processes WHERE workflow_id = ?1",
                params![state.workflow_id.0],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(PersistenceError::WorkflowIdTaken {
                workflow_id: state.workflow_id.clone(),
            });
        }

        upsert_process(&tx, state)?;
        tx.execute(
            "INSERT INTO directory (content_id, workflow_id, recorded_at) VALUES (?1, ?2, ?3)",
            params![
                state.input.content_id.0,
                state.workflow_id.0,
                state.created_at.to_rfc3339(),
            ],
        )?;
        for event in events {
            insert_event(&tx, event)?;
        }
        tx.commit()?;
        Ok(DirectoryRecord::Created)
    }

    /// Writes the snapshot (when given) and appends `events`, all or nothing.
    pub fn save_process_with_events(
        &self,
        state: Option<&LifecycleState>,
        events: &[Event],
    ) -> Result<(), PersistenceError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if let Some(state) = state {
            upsert_process(&tx, state)?;
        }
        for event in events {
            insert_event(&tx, event)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_process(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<LifecycleState>, PersistenceError> {
        let payload: Option<String> = self
            .conn()?
            .query_row(
                "SELECT payload_json FROM processes WHERE workflow_id = ?1",
                params![workflow_id.0],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|value| serde_json::from_str::<LifecycleState>(&value))
            .transpose()
            .map_err(PersistenceError::from)
    }

    /// Every process that has not reached `completed`, oldest first.
    pub fn list_unfinished_processes(&self) -> Result<Vec<LifecycleState>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT payload_json FROM processes WHERE stage_tag != 'completed' ORDER BY created_at ASC, workflow_id ASC",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut states = Vec::new();
        for row in rows {
            let payload = row?;
            states.push(serde_json::from_str::<LifecycleState>(&payload)?);
        }
        Ok(states)
    }

    pub fn list_events(&self, workflow_id: &WorkflowId) -> Result<Vec<Event>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT payload_json FROM events WHERE workflow_id = ?1 ORDER BY event_id ASC",
        )?;
        let rows = stmt.query_map(params![workflow_id.0], |row| row.get::<_, String>(0))?;
        let mut events = Vec::new();
        for row in rows {
            let payload = row?;
            events.push(serde_json::from_str::<Event>(&payload)?);
        }
        Ok(events)
    }

    pub fn lookup_directory(
        &self,
        content_id: &ContentId,
    ) -> Result<Option<DirectoryEntry>, PersistenceError> {
        let row: Option<(String, String)> = self
            .conn()?
            .query_row(
                "SELECT workflow_id, recorded_at FROM directory WHERE content_id = ?1",
                params![content_id.0],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(workflow_id, recorded_at)| {
            Ok::<_, PersistenceError>(DirectoryEntry {
                content_id: content_id.clone(),
                workflow_id: WorkflowId(workflow_id),
                recorded_at: parse_timestamp(&recorded_at)?,
            })
        })
        .transpose()
    }
}

fn upsert_process(conn: &Connection, state: &LifecycleState) -> Result<(), PersistenceError> {
    let payload = serde_json::to_string(state)?;
    conn.execute(
        r#"
INSERT INTO processes (workflow_id, content_id, stage_tag, payload_json, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT(workflow_id) DO UPDATE SET
  stage_tag = excluded.stage_tag,
  payload_json = excluded.payload_json,
  updated_at = excluded.updated_at
"#,
        params![
            state.workflow_id.0,
            state.input.content_id.0,
            state.stage.as_str(),
            payload,
            state.created_at.to_rfc3339(),
            state.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn insert_event(conn: &Connection, event: &Event) -> Result<(), PersistenceError> {
    let payload = serde_json::to_string(event)?;
    conn.execute(
        r#"
INSERT INTO events (workflow_id, at, kind_tag, payload_json)
VALUES (?1, ?2, ?3, ?4)
"#,
        params![
            event.workflow_id.0,
            event.at.to_rfc3339(),
            event_kind_tag(&event.kind),
            payload,
        ],
    )?;
    Ok(())
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(value)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|source| PersistenceError::TimestampParse {
            value: value.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use cms_core::events::EventKind;
    use cms_core::state::Stage;
    use cms_core::types::{LifecycleInput, RunId};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()
    }

    fn mk_state(content_id: &str, workflow_id: &str) -> LifecycleState {
        LifecycleState::new(
            WorkflowId::new(workflow_id),
            RunId::new(format!("run-{workflow_id}")),
            LifecycleInput::new(
                ContentId::new(content_id),
                "drupal",
                vec!["en".to_string(), "fr".to_string()],
            ),
            now(),
        )
    }

    fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().expect("open store");
        store.migrate().expect("migrate");
        store
    }

    #[test]
    fn migrate_is_idempotent() {
        let store = store();
        store.migrate().expect("second migrate");
    }

    #[test]
    fn new_process_and_directory_entry_are_written_together() {
        let store = store();
        let state = mk_state("42", "content-42-a");
        assert_eq!(
            store.insert_new_process(&state, &[]).unwrap(),
            DirectoryRecord::Created
        );

        assert_eq!(
            store.load_process(&state.workflow_id).unwrap(),
            Some(state.clone())
        );
        let entry = store
            .lookup_directory(&ContentId::new("42"))
            .unwrap()
            .expect("directory entry");
        assert_eq!(entry.workflow_id, state.workflow_id);
        assert_eq!(entry.recorded_at, now());
    }

    #[test]
    fn second_process_for_same_content_writes_nothing() {
        let store = store();
        let first = mk_state("42", "content-42-a");
        store.insert_new_process(&first, &[]).unwrap();

        let second = mk_state("42", "content-42-b");
        assert_eq!(
            store.insert_new_process(&second, &[]).unwrap(),
            DirectoryRecord::Existing(first.workflow_id.clone())
        );
        assert_eq!(store.load_process(&second.workflow_id).unwrap(), None);
    }

    #[test]
    fn reused_workflow_id_is_rejected_without_directory_entry() {
        let store = store();
        store
            .insert_new_process(&mk_state("42", "shared-id"), &[])
            .unwrap();
        let err = store
            .insert_new_process(&mk_state("43", "shared-id"), &[])
            .unwrap_err();
        assert!(matches!(err, PersistenceError::WorkflowIdTaken { workflow_id } if workflow_id.0 == "shared-id"));
        assert_eq!(store.lookup_directory(&ContentId::new("43")).unwrap(), None);
    }

    fn started(workflow_id: &str) -> Event {
        Event::new(
            WorkflowId::new(workflow_id),
            now(),
            EventKind::StageEntered {
                from: None,
                to: Stage::Translation,
            },
        )
    }

    fn drop_events_table(store: &SqliteStore) {
        store
            .conn()
            .unwrap()
            .execute_batch("DROP TABLE events")
            .unwrap();
    }

    #[test]
    fn failed_event_insert_leaves_no_process_or_mapping() {
        let store = store();
        drop_events_table(&store);
        let state = mk_state("42", "content-42-a");

        assert!(store
            .insert_new_process(&state, &[started("content-42-a")])
            .is_err());
        assert_eq!(store.load_process(&state.workflow_id).unwrap(), None);
        assert_eq!(store.lookup_directory(&ContentId::new("42")).unwrap(), None);
    }

    #[test]
    fn snapshot_and_events_commit_together() {
        let store = store();
        let mut state = mk_state("42", "content-42-a");
        store
            .insert_new_process(&state, &[started("content-42-a")])
            .unwrap();
        assert_eq!(store.list_events(&state.workflow_id).unwrap().len(), 1);

        state.advance(Stage::Compliance, now()).unwrap();
        let entered = Event::new(
            state.workflow_id.clone(),
            now(),
            EventKind::StageEntered {
                from: Some(Stage::Translation),
                to: Stage::Compliance,
            },
        );
        store
            .save_process_with_events(Some(&state), std::slice::from_ref(&entered))
            .unwrap();
        assert_eq!(
            store.load_process(&state.workflow_id).unwrap().unwrap().stage,
            Stage::Compliance
        );
        assert_eq!(
            store.list_events(&state.workflow_id).unwrap().last(),
            Some(&entered)
        );

        drop_events_table(&store);
        state.advance(Stage::AwaitingApproval, now()).unwrap();
        assert!(store
            .save_process_with_events(Some(&state), &[entered])
            .is_err());
        assert_eq!(
            store.load_process(&state.workflow_id).unwrap().unwrap().stage,
            Stage::Compliance
        );
    }

    #[test]
    fn save_process_updates_stage_and_unfinished_listing() {
        let store = store();
        let mut a = mk_state("1", "wf-a");
        let b = mk_state("2", "wf-b");
        store.insert_new_process(&a, &[]).unwrap();
        store.insert_new_process(&b, &[]).unwrap();

        for stage in &Stage::ALL[1..] {
            a.advance(*stage, now()).unwrap();
        }
        store.save_process_with_events(Some(&a), &[]).unwrap();

        let unfinished = store.list_unfinished_processes().unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].workflow_id, b.workflow_id);
        assert_eq!(
            store.load_process(&a.workflow_id).unwrap().unwrap().stage,
            Stage::Completed
        );
    }

    #[test]
    fn events_are_listed_in_append_order() {
        let store = store();
        let workflow_id = WorkflowId::new("wf-a");
        let first = Event::new(
            workflow_id.clone(),
            now(),
            EventKind::StageEntered {
                from: None,
                to: Stage::Translation,
            },
        );
        let second = Event::new(workflow_id.clone(), now(), EventKind::ProcessCompleted);
        store
            .save_process_with_events(None, &[first.clone(), second.clone()])
            .unwrap();
        store
            .save_process_with_events(
                None,
                &[Event::new(
                    WorkflowId::new("wf-other"),
                    now(),
                    EventKind::ProcessCompleted,
                )],
            )
            .unwrap();

        assert_eq!(store.list_events(&workflow_id).unwrap(), vec![first, second]);
    }

    #[test]
    fn open_creates_parent_directory_and_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("state.sqlite");
        let state = mk_state("42", "content-42-a");
        {
            let store = SqliteStore::open(&path).expect("open");
            store.migrate().unwrap();
            store.insert_new_process(&state, &[]).unwrap();
        }
        let reopened = SqliteStore::open(&path).expect("reopen");
        reopened.migrate().unwrap();
        assert_eq!(reopened.load_process(&state.workflow_id).unwrap(), Some(state));
    }
}
