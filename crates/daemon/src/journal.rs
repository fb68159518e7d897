//! Commission journal
//!
//! Durable record of which commissioning steps completed for an address, so
//! an interrupted or partially failed run can be repaired later.

use crate::commission::Step;
use leafmesh_common::{now_epoch_secs, Database, Error, NodeId, Result};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub address: String,
    pub node_id: NodeId,
    /// Token the operator supplied for the leaf
    #[serde(skip_serializing, default)]
    pub caller_token: String,
    pub completed: Vec<Step>,
    pub last_error: Option<String>,
    pub updated_at: i64,
}

impl JournalEntry {
    /// First step not yet completed, `None` when the run finished
    pub fn next_step(&self) -> Option<Step> {
        Step::ALL.into_iter().find(|s| !self.completed.contains(s))
    }
}

#[derive(Clone)]
pub struct CommissionJournal {
    db: Database,
}

impl CommissionJournal {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Start (or restart) tracking a run; previously completed steps survive
    pub fn begin(&self, address: &str, node_id: NodeId, caller_token: &str) -> Result<JournalEntry> {
        {
            let conn = self.db.connection();
            let conn = conn.lock();
            conn.execute(
                "INSERT INTO commission_journal (address, node_id, caller_token, completed_steps, updated_at)
                 VALUES (?1, ?2, ?3, '[]', ?4)
                 ON CONFLICT(address) DO UPDATE SET
                    node_id = excluded.node_id,
                    caller_token = excluded.caller_token,
                    updated_at = excluded.updated_at",
                params![address, node_id.to_string(), caller_token, now_epoch_secs()],
            )?;
        }
        self.load(address)?
            .ok_or_else(|| Error::Internal(format!("journal for {} vanished", address)))
    }

    /// Forget progress for `address` so the next run starts from scratch
    pub fn reset(&self, address: &str) -> Result<()> {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute(
            "UPDATE commission_journal SET completed_steps = '[]', last_error = NULL, updated_at = ?2
             WHERE address = ?1",
            params![address, now_epoch_secs()],
        )?;
        Ok(())
    }

    pub fn record_step(&self, address: &str, step: Step) -> Result<()> {
        let Some(mut entry) = self.load(address)? else {
            return Err(Error::not_found("journal", address));
        };
        if !entry.completed.contains(&step) {
            entry.completed.push(step);
        }

        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute(
            "UPDATE commission_journal SET completed_steps = ?2, last_error = NULL, updated_at = ?3
             WHERE address = ?1",
            params![address, serde_json::to_string(&entry.completed)?, now_epoch_secs()],
        )?;
        Ok(())
    }

    pub fn record_error(&self, address: &str, error: &str) -> Result<()> {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute(
            "UPDATE commission_journal SET last_error = ?2, updated_at = ?3 WHERE address = ?1",
            params![address, error, now_epoch_secs()],
        )?;
        Ok(())
    }

    pub fn load(&self, address: &str) -> Result<Option<JournalEntry>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let raw = conn
            .query_row(
                "SELECT address, node_id, caller_token, completed_steps, last_error, updated_at
                 FROM commission_journal WHERE address = ?1",
                params![address],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;

        raw.map(decode).transpose()
    }

    /// Runs that stopped before completing every step
    pub fn list(&self) -> Result<Vec<JournalEntry>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let mut stmt = conn.prepare(
            "SELECT address, node_id, caller_token, completed_steps, last_error, updated_at
             FROM commission_journal ORDER BY updated_at",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(decode(row?)?);
        }
        Ok(entries)
    }

    pub fn clear(&self, address: &str) -> Result<()> {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute("DELETE FROM commission_journal WHERE address = ?1", params![address])?;
        Ok(())
    }
}

type RawEntry = (String, String, String, String, Option<String>, i64);

fn decode(raw: RawEntry) -> Result<JournalEntry> {
    let (address, node_id, caller_token, completed, last_error, updated_at) = raw;
    Ok(JournalEntry {
        address,
        node_id: node_id.parse().map_err(Error::Internal)?,
        caller_token,
        completed: serde_json::from_str(&completed)?,
        last_error,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_survives_restart_of_run() {
        let journal = CommissionJournal::new(Database::open_memory().unwrap());
        let node = NodeId::new();

        let entry = journal.begin("10.0.0.5", node, "tok").unwrap();
        assert_eq!(entry.next_step(), Some(Step::Validate));

        journal.record_step("10.0.0.5", Step::Validate).unwrap();
        journal.record_step("10.0.0.5", Step::VerifyRemote).unwrap();
        journal.record_step("10.0.0.5", Step::VerifyRemote).unwrap();
        journal.record_error("10.0.0.5", "boom").unwrap();

        let entry = journal.begin("10.0.0.5", node, "tok-2").unwrap();
        assert_eq!(entry.completed, vec![Step::Validate, Step::VerifyRemote]);
        assert_eq!(entry.next_step(), Some(Step::ProvisionToken));
        assert_eq!(entry.caller_token, "tok-2");
        assert_eq!(entry.last_error.as_deref(), Some("boom"));
        assert_eq!(journal.list().unwrap().len(), 1);

        journal.reset("10.0.0.5").unwrap();
        assert!(journal.load("10.0.0.5").unwrap().unwrap().completed.is_empty());

        journal.clear("10.0.0.5").unwrap();
        assert!(journal.load("10.0.0.5").unwrap().is_none());
    }

    #[test]
    fn test_record_step_without_run() {
        let journal = CommissionJournal::new(Database::open_memory().unwrap());
        assert!(matches!(
            journal.record_step("10.0.0.9", Step::Validate),
            Err(Error::NotFound { .. })
        ));
    }
}
