//! SQLite persistence layer.
//!
//! RULE: Only store.rs talks to the database.
//! The runner calls store methods; nothing else executes SQL.

use crate::{
    dataset::{Dataset, DatasetRow},
    error::PipelineResult,
    event::EventLogEntry,
    training::TrainingReport,
};
use rusqlite::{params, Connection, OptionalExtension};

pub struct RunStore {
    conn: Connection,
}

impl RunStore {
    /// Open (or create) the run database at `path`.
    pub fn open(path: &str) -> PipelineResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode: better concurrent read performance. Not available for :memory:.
        if path != ":memory:" {
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        }
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> PipelineResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> PipelineResult<()> {
        self.conn.execute_batch(include_str!("../../migrations/001_foundation.sql"))?;
        self.conn.execute_batch(include_str!("../../migrations/002_dataset.sql"))?;
        Ok(())
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(&self, run_id: &str, seed: u64, version: &str) -> PipelineResult<()> {
        let started_at = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        self.conn.execute(
            "INSERT INTO run (run_id, seed, version, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, seed as i64, version, started_at],
        )?;
        Ok(())
    }

    pub fn run_seed(&self, run_id: &str) -> PipelineResult<Option<u64>> {
        let seed = self
            .conn
            .query_row("SELECT seed FROM run WHERE run_id = ?1", params![run_id], |row| {
                row.get::<_, i64>(0)
            })
            .optional()?;
        Ok(seed.map(|s| s as u64))
    }

    // ── Dataset ────────────────────────────────────────────────

    /// Insert every row in one transaction, keeping generation order.
    pub fn insert_dataset(&self, run_id: &str, dataset: &Dataset) -> PipelineResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO dataset_row (
                    run_id, row_index, user_id, archetype, timestamp, hour, day_of_week,
                    day_of_month, category, amount, avg_user_spend, is_late_night,
                    is_end_of_month, is_weekend, spending_velocity, transaction_gap_minutes,
                    category_switch_count, mood_proxy_score, impulse_label
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            )?;
            for (i, r) in dataset.rows.iter().enumerate() {
                stmt.execute(params![
                    run_id,
                    i as i64,
                    r.user_id,
                    r.archetype,
                    r.timestamp,
                    r.hour,
                    r.day_of_week,
                    r.day_of_month,
                    r.category,
                    r.amount,
                    r.avg_user_spend,
                    r.is_late_night,
                    r.is_end_of_month,
                    r.is_weekend,
                    r.spending_velocity,
                    r.transaction_gap_minutes,
                    r.category_switch_count,
                    r.mood_proxy_score,
                    r.impulse_label,
                ])?;
            }
        }
        tx.commit()?;
        log::debug!("store: {} dataset rows for {run_id}", dataset.len());
        Ok(())
    }

    pub fn dataset_row_count(&self, run_id: &str) -> PipelineResult<usize> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM dataset_row WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    pub fn load_dataset(&self, run_id: &str) -> PipelineResult<Dataset> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, archetype, timestamp, hour, day_of_week, day_of_month, category,
                    amount, avg_user_spend, is_late_night, is_end_of_month, is_weekend,
                    spending_velocity, transaction_gap_minutes, category_switch_count,
                    mood_proxy_score, impulse_label
             FROM dataset_row WHERE run_id = ?1
             ORDER BY row_index ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok(DatasetRow {
                    user_id:                 row.get(0)?,
                    archetype:               row.get(1)?,
                    timestamp:               row.get(2)?,
                    hour:                    row.get(3)?,
                    day_of_week:             row.get(4)?,
                    day_of_month:            row.get(5)?,
                    category:                row.get(6)?,
                    amount:                  row.get(7)?,
                    avg_user_spend:          row.get(8)?,
                    is_late_night:           row.get(9)?,
                    is_end_of_month:         row.get(10)?,
                    is_weekend:              row.get(11)?,
                    spending_velocity:       row.get(12)?,
                    transaction_gap_minutes: row.get(13)?,
                    category_switch_count:   row.get(14)?,
                    mood_proxy_score:        row.get(15)?,
                    impulse_label:           row.get(16)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Dataset { rows })
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, stage, event_type, payload) VALUES (?1, ?2, ?3, ?4)",
            params![entry.run_id, entry.stage, entry.event_type, entry.payload],
        )?;
        Ok(())
    }

    pub fn events_for_run(&self, run_id: &str) -> PipelineResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, stage, event_type, payload
             FROM event_log WHERE run_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], |row| {
                Ok(EventLogEntry {
                    id:         Some(row.get(0)?),
                    run_id:     row.get(1)?,
                    stage:      row.get(2)?,
                    event_type: row.get(3)?,
                    payload:    row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // ── Training report ────────────────────────────────────────

    pub fn save_training_report(&self, run_id: &str, report: &TrainingReport) -> PipelineResult<()> {
        let json = serde_json::to_string(report)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO training_report (run_id, precision, recall, f1, roc_auc, report_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run_id,
                report.classifier.precision,
                report.classifier.recall,
                report.classifier.f1,
                report.classifier.roc_auc,
                json,
            ],
        )?;
        Ok(())
    }

    pub fn training_report(&self, run_id: &str) -> PipelineResult<Option<TrainingReport>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT report_json FROM training_report WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(j) => Ok(Some(serde_json::from_str(&j)?)),
            None => Ok(None),
        }
    }
}
