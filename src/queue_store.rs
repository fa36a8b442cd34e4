//! SQLite-backed harmonisation queue.
//!
//! One row per study plus a single `last_run` row. The store assumes a single
//! writer; it adds no locking on top of SQLite's own.

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde::Serialize;

use crate::domain::{HarmonisationType, Priority, QueueRecord, QueueState, StudyAccession};
use crate::error::SyncError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS studies (
    study_id TEXT NOT NULL UNIQUE,
    harmonisation_type TEXT NOT NULL,
    is_harmonised INTEGER NOT NULL,
    in_progress INTEGER NOT NULL,
    priority INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS last_run (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    date TEXT NOT NULL
);
"#;

const UPSERT_SQL: &str = "INSERT INTO studies (study_id, harmonisation_type, is_harmonised, in_progress, priority) \
     VALUES (?1, ?2, ?3, ?4, ?5) \
     ON CONFLICT(study_id) DO UPDATE SET \
     harmonisation_type = excluded.harmonisation_type, \
     is_harmonised = excluded.is_harmonised, \
     in_progress = excluded.in_progress, \
     priority = excluded.priority";

const SELECT_COLUMNS: &str =
    "SELECT study_id, harmonisation_type, is_harmonised, in_progress, priority FROM studies";

/// One optional condition of a [`QueueFilter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    StudyIn(Vec<StudyAccession>),
    Harmonised(bool),
    TypeIn(Vec<HarmonisationType>),
    InProgress(bool),
    PriorityAtMost(Priority),
}

impl Predicate {
    fn clause(&self) -> (String, Vec<Value>) {
        match self {
            Predicate::StudyIn(ids) => in_clause(
                "study_id",
                ids.iter()
                    .map(|id| Value::Text(id.as_str().to_string()))
                    .collect(),
            ),
            Predicate::Harmonised(flag) => {
                ("is_harmonised = ?".to_string(), vec![Value::Integer(*flag as i64)])
            }
            Predicate::TypeIn(types) => in_clause(
                "harmonisation_type",
                types
                    .iter()
                    .map(|kind| Value::Text(kind.as_str().to_string()))
                    .collect(),
            ),
            Predicate::InProgress(flag) => {
                ("in_progress = ?".to_string(), vec![Value::Integer(*flag as i64)])
            }
            Predicate::PriorityAtMost(priority) => {
                ("priority <= ?".to_string(), vec![Value::Integer(priority.rank())])
            }
        }
    }
}

fn in_clause(column: &str, values: Vec<Value>) -> (String, Vec<Value>) {
    if values.is_empty() {
        // An explicit empty list matches nothing.
        return ("0".to_string(), values);
    }
    let placeholders = vec!["?"; values.len()].join(", ");
    (format!("{column} IN ({placeholders})"), values)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SelectOrder {
    /// Order in which studies were first recorded.
    #[default]
    Storage,
    /// Highest priority first, then storage order.
    Priority,
}

/// Unset fields are left out of the query entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueFilter {
    pub study_ids: Option<Vec<StudyAccession>>,
    pub harmonised: Option<bool>,
    pub harmonisation_types: Option<Vec<HarmonisationType>>,
    pub in_progress: Option<bool>,
    pub max_priority: Option<Priority>,
    pub limit: Option<usize>,
    pub order: SelectOrder,
}

impl QueueFilter {
    /// Studies waiting to be handed to the harmonisation pipeline.
    pub fn pending() -> Self {
        Self {
            harmonised: Some(false),
            in_progress: Some(false),
            harmonisation_types: Some(vec![HarmonisationType::V1, HarmonisationType::V0]),
            order: SelectOrder::Priority,
            ..Self::default()
        }
    }

    pub fn predicates(&self) -> Vec<Predicate> {
        let mut predicates = Vec::new();
        if let Some(ids) = &self.study_ids {
            predicates.push(Predicate::StudyIn(ids.clone()));
        }
        if let Some(flag) = self.harmonised {
            predicates.push(Predicate::Harmonised(flag));
        }
        if let Some(types) = &self.harmonisation_types {
            predicates.push(Predicate::TypeIn(types.clone()));
        }
        if let Some(flag) = self.in_progress {
            predicates.push(Predicate::InProgress(flag));
        }
        if let Some(priority) = self.max_priority {
            predicates.push(Predicate::PriorityAtMost(priority));
        }
        predicates
    }

    /// SQL text and bound values for this filter.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut sql = String::from(SELECT_COLUMNS);
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        for predicate in self.predicates() {
            let (clause, bound) = predicate.clause();
            clauses.push(clause);
            values.extend(bound);
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        match self.order {
            SelectOrder::Storage => sql.push_str(" ORDER BY rowid"),
            SelectOrder::Priority => sql.push_str(" ORDER BY priority, rowid"),
        }
        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        }
        (sql, values)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub total: usize,
    pub queued: usize,
    pub in_progress: usize,
    pub harmonised: usize,
    pub skipped: usize,
    pub last_run: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct QueueStore {
    conn: Connection,
}

impl QueueStore {
    /// Opens (or creates) the store. A corrupt file is rejected up front.
    pub fn open(path: &Utf8Path) -> Result<Self, SyncError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent.as_std_path())
                .map_err(|err| SyncError::Store(format!("create {parent}: {err}")))?;
        }
        let conn = Connection::open(path.as_std_path())
            .map_err(|err| SyncError::Store(format!("open {path}: {err}")))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, SyncError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, SyncError> {
        let check: String = conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .map_err(|err| SyncError::Store(format!("integrity check failed: {err}")))?;
        if check != "ok" {
            return Err(SyncError::Store(format!("integrity check failed: {check}")));
        }
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn upsert(&self, record: &QueueRecord) -> Result<(), SyncError> {
        self.conn.execute(UPSERT_SQL, record_params(record))?;
        Ok(())
    }

    pub fn upsert_many(&mut self, records: &[QueueRecord]) -> Result<(), SyncError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(UPSERT_SQL)?;
            for record in records {
                stmt.execute(record_params(record))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get(&self, study_id: &StudyAccession) -> Result<Option<QueueRecord>, SyncError> {
        let sql = format!("{SELECT_COLUMNS} WHERE study_id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![study_id.as_str()], read_row)
            .optional()?;
        row.transpose()
    }

    /// No-op when the study has no record.
    pub fn set_harmonised(&self, study_id: &StudyAccession, value: bool) -> Result<(), SyncError> {
        self.update_flag("is_harmonised", study_id, value)
    }

    /// No-op when the study has no record.
    pub fn set_in_progress(&self, study_id: &StudyAccession, value: bool) -> Result<(), SyncError> {
        self.update_flag("in_progress", study_id, value)
    }

    fn update_flag(
        &self,
        column: &'static str,
        study_id: &StudyAccession,
        value: bool,
    ) -> Result<(), SyncError> {
        let sql = format!("UPDATE studies SET {column} = ?1 WHERE study_id = ?2");
        let changed = self
            .conn
            .execute(&sql, params![value, study_id.as_str()])?;
        if changed == 0 {
            tracing::debug!(study = %study_id, column, "no queue record to update");
        }
        Ok(())
    }

    pub fn select_by(&self, filter: &QueueFilter) -> Result<Vec<QueueRecord>, SyncError> {
        let (sql, values) = filter.to_sql();
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values.iter()))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(read_row(row)??);
        }
        Ok(records)
    }

    pub fn last_run(&self) -> Result<Option<DateTime<Utc>>, SyncError> {
        let raw: Option<String> = self
            .conn
            .query_row("SELECT date FROM last_run WHERE id = 1", [], |row| row.get(0))
            .optional()?;
        raw.map(|value| {
            DateTime::parse_from_rfc3339(&value)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|err| SyncError::Store(format!("corrupt last_run value {value}: {err}")))
        })
        .transpose()
    }

    /// Stores `timestamp` unless a strictly later run is already recorded.
    /// Re-recording the stored instant is a no-op.
    pub fn record_run(&self, timestamp: DateTime<Utc>) -> Result<(), SyncError> {
        if let Some(previous) = self.last_run()? {
            if previous > timestamp {
                tracing::warn!(%previous, %timestamp, "ignoring last_run older than the stored one");
                return Ok(());
            }
        }
        self.conn.execute(
            "INSERT INTO last_run (id, date) VALUES (1, ?1) \
             ON CONFLICT(id) DO UPDATE SET date = excluded.date",
            params![timestamp.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn summary(&self) -> Result<QueueSummary, SyncError> {
        let mut summary = QueueSummary {
            last_run: self.last_run()?,
            ..QueueSummary::default()
        };
        for record in self.select_by(&QueueFilter::default())? {
            summary.total += 1;
            match record.state() {
                QueueState::Queued => summary.queued += 1,
                QueueState::InProgress => summary.in_progress += 1,
                QueueState::Harmonised => summary.harmonised += 1,
                QueueState::Skipped => summary.skipped += 1,
            }
        }
        Ok(summary)
    }
}

fn record_params(record: &QueueRecord) -> [Value; 5] {
    [
        Value::Text(record.study_id.as_str().to_string()),
        Value::Text(record.harmonisation_type.as_str().to_string()),
        Value::Integer(record.is_harmonised as i64),
        Value::Integer(record.in_progress as i64),
        Value::Integer(record.priority.rank()),
    ]
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<Result<QueueRecord, SyncError>> {
    let study_id: String = row.get(0)?;
    let harmonisation_type: String = row.get(1)?;
    let is_harmonised: bool = row.get(2)?;
    let in_progress: bool = row.get(3)?;
    let priority: i64 = row.get(4)?;
    Ok(decode_record(
        &study_id,
        &harmonisation_type,
        is_harmonised,
        in_progress,
        priority,
    ))
}

fn decode_record(
    study_id: &str,
    harmonisation_type: &str,
    is_harmonised: bool,
    in_progress: bool,
    priority: i64,
) -> Result<QueueRecord, SyncError> {
    let corrupt = |err: SyncError| SyncError::Store(format!("corrupt row for {study_id}: {err}"));
    Ok(QueueRecord {
        study_id: study_id.parse().map_err(corrupt)?,
        harmonisation_type: harmonisation_type.parse().map_err(corrupt)?,
        is_harmonised,
        in_progress,
        priority: Priority::from_rank(priority).map_err(corrupt)?,
    })
}
