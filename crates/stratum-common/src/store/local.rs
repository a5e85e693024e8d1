//! Per-host embedded changelog store (SQLite via `rusqlite`).
//!
//! Always authoritative for phases executed on this node while the
//! cluster store is unreachable (§4.1, §4.6). Single-writer: SQLite's
//! file lock plus an in-process `tokio::sync::Mutex` keep concurrent
//! async callers from interleaving writes.

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Mutex;

use crate::changelog::ChangeLogEntry;
use crate::ids::{ClusterName, OperationId};
use crate::operation::OperationRecord;
use crate::plan::Plan;
use crate::{OpeError, OpeResult};

use super::PlanStore;

pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    /// Opens (creating if needed) the SQLite database at `path`,
    /// running migrations idempotently.
    pub fn open(path: &std::path::Path) -> OpeResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::migrate(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory store, used by tests and by short-lived CLI
    /// invocations that don't need persistence across runs.
    pub fn open_in_memory() -> OpeResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::migrate(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn migrate(conn: &Connection) -> OpeResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS plans (
                cluster TEXT NOT NULL,
                op_id TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (cluster, op_id)
            );
            CREATE TABLE IF NOT EXISTS changelog (
                change_id TEXT PRIMARY KEY,
                cluster TEXT NOT NULL,
                op_id TEXT NOT NULL,
                body TEXT NOT NULL,
                created_ts TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS changelog_scope ON changelog (cluster, op_id);
            CREATE TABLE IF NOT EXISTS operations (
                cluster TEXT NOT NULL,
                op_id TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_ts TEXT NOT NULL,
                PRIMARY KEY (cluster, op_id)
            );",
        )?;
        Ok(())
    }
}

#[async_trait]
impl PlanStore for LocalStore {
    async fn create_operation_plan(&self, plan: &Plan) -> OpeResult<()> {
        let body = serde_json::to_string(plan).map_err(|e| OpeError::Other(e.into()))?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO plans (cluster, op_id, body) VALUES (?1, ?2, ?3)",
            params![plan.cluster.as_str(), plan.op_id.as_uuid().to_string(), body],
        )?;
        Ok(())
    }

    async fn get_operation_plan(&self, cluster: &ClusterName, op_id: OperationId) -> OpeResult<Plan> {
        let conn = self.conn.lock().await;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM plans WHERE cluster = ?1 AND op_id = ?2",
                params![cluster.as_str(), op_id.as_uuid().to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match body {
            Some(b) => serde_json::from_str(&b).map_err(|e| OpeError::Other(e.into())),
            None => Err(OpeError::PlanNotFound { op_id }),
        }
    }

    async fn get_operation_plan_changelog(
        &self,
        cluster: &ClusterName,
        op_id: OperationId,
    ) -> OpeResult<Vec<ChangeLogEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT body FROM changelog WHERE cluster = ?1 AND op_id = ?2 ORDER BY created_ts ASC",
        )?;
        let rows = stmt.query_map(params![cluster.as_str(), op_id.as_uuid().to_string()], |row| {
            let body: String = row.get(0)?;
            Ok(body)
        })?;
        let mut out = Vec::new();
        for row in rows {
            let body = row?;
            out.push(serde_json::from_str(&body).map_err(|e| OpeError::Other(e.into()))?);
        }
        Ok(out)
    }

    async fn create_operation_plan_change(&self, entry: &ChangeLogEntry) -> OpeResult<()> {
        let body = serde_json::to_string(entry).map_err(|e| OpeError::Other(e.into()))?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO changelog (change_id, cluster, op_id, body, created_ts) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.change_id.as_uuid().to_string(),
                entry.cluster.as_str(),
                entry.op_id.as_uuid().to_string(),
                body,
                entry.created_ts.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn update_operation(&self, record: &OperationRecord) -> OpeResult<()> {
        let body = serde_json::to_string(record).map_err(|e| OpeError::Other(e.into()))?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO operations (cluster, op_id, body, updated_ts) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(cluster, op_id) DO UPDATE SET body = excluded.body, updated_ts = excluded.updated_ts",
            params![
                record.cluster.as_str(),
                record.id.as_uuid().to_string(),
                body,
                record.updated_ts.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn get_last_operation(
        &self,
        cluster: &ClusterName,
        op_id: Option<OperationId>,
    ) -> OpeResult<Option<OperationRecord>> {
        let conn = self.conn.lock().await;
        let body: Option<String> = if let Some(op_id) = op_id {
            conn.query_row(
                "SELECT body FROM operations WHERE cluster = ?1 AND op_id = ?2",
                params![cluster.as_str(), op_id.as_uuid().to_string()],
                |row| row.get(0),
            )
            .optional()?
        } else {
            conn.query_row(
                "SELECT body FROM operations WHERE cluster = ?1 ORDER BY updated_ts DESC LIMIT 1",
                params![cluster.as_str()],
                |row| row.get(0),
            )
            .optional()?
        };
        body.map(|b| serde_json::from_str(&b).map_err(|e| OpeError::Other(e.into())))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ChangeId;
    use crate::operation::OperationState;
    use crate::plan::{DnsConfig, OperationType, PackageLocator, Phase, PhaseId, PhaseState};
    use chrono::Utc;

    fn sample_plan(cluster: &str) -> Plan {
        Plan {
            op_id: OperationId::new(),
            cluster: ClusterName::new(cluster),
            account_id: "acct".into(),
            operation_type: OperationType::Install,
            created_ts: Utc::now(),
            roots: vec![Phase::leaf(PhaseId::new("/checks"), "checks", "checks", 0, vec![])],
            dns_config: DnsConfig::default(),
            servers: vec![],
            runtime_package: PackageLocator { name: "runtime".into(), version: "1.0.0".into() },
        }
    }

    #[tokio::test]
    async fn create_and_get_plan_round_trips() {
        let store = LocalStore::open_in_memory().unwrap();
        let plan = sample_plan("c1");
        store.create_operation_plan(&plan).await.unwrap();
        let fetched = store.get_operation_plan(&plan.cluster, plan.op_id).await.unwrap();
        assert_eq!(fetched.op_id, plan.op_id);
    }

    #[tokio::test]
    async fn get_operation_plan_missing_is_not_found() {
        let store = LocalStore::open_in_memory().unwrap();
        let err = store
            .get_operation_plan(&ClusterName::new("none"), OperationId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OpeError::PlanNotFound { .. }));
    }

    #[tokio::test]
    async fn duplicate_change_id_is_idempotent() {
        let store = LocalStore::open_in_memory().unwrap();
        let plan = sample_plan("c1");
        store.create_operation_plan(&plan).await.unwrap();
        let change = ChangeLogEntry {
            change_id: ChangeId::new(),
            cluster: plan.cluster.clone(),
            op_id: plan.op_id,
            phase_id: PhaseId::new("/checks"),
            new_state: PhaseState::Completed,
            created_ts: Utc::now(),
            error: None,
        };
        store.create_operation_plan_change(&change).await.unwrap();
        store.create_operation_plan_change(&change).await.unwrap();
        let log = store.get_operation_plan_changelog(&plan.cluster, plan.op_id).await.unwrap();
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn update_operation_and_get_last_operation() {
        let store = LocalStore::open_in_memory().unwrap();
        let cluster = ClusterName::new("c1");
        let mut record = OperationRecord::new(OperationId::new(), cluster.clone(), "acct", OperationType::Install);
        store.update_operation(&record).await.unwrap();
        record.state = OperationState::Ready;
        record.updated_ts = Utc::now();
        store.update_operation(&record).await.unwrap();

        let last = store.get_last_operation(&cluster, None).await.unwrap().unwrap();
        assert_eq!(last.state, OperationState::Ready);
    }
}
