use std::{
    collections::HashSet,
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, SecondsFormat, Utc};
use fs2::FileExt;
use log::debug;
use rusqlite::{
    params, params_from_iter, types::Value, Connection, ErrorCode, OptionalExtension, Row,
    TransactionBehavior,
};

use crate::error::{ConflictReason, NodeError, PortRole, Result};
use crate::registry::record::{ConfigEntry, FieldUpdate, Method, NodeRecord, PortPair};

pub const SCHEMA_VERSION_KEY: &str = "schema_version";
const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS nodes (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    name          TEXT    NOT NULL UNIQUE,
    service_port  INTEGER NOT NULL,
    xray_api_port INTEGER NOT NULL,
    method        TEXT    NOT NULL,
    install_dir   TEXT    NOT NULL,
    data_dir      TEXT    NOT NULL,
    cert_file     TEXT    NOT NULL,
    inbounds      TEXT    NOT NULL DEFAULT '[]',
    status        TEXT    NOT NULL DEFAULT '',
    created_at    TEXT    NOT NULL,
    updated_at    TEXT    NOT NULL,
    CHECK (service_port <> xray_api_port)
);
CREATE INDEX IF NOT EXISTS idx_nodes_name ON nodes(name);
CREATE INDEX IF NOT EXISTS idx_nodes_service_port ON nodes(service_port);
CREATE INDEX IF NOT EXISTS idx_nodes_xray_api_port ON nodes(xray_api_port);
CREATE TABLE IF NOT EXISTS config (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

const NODE_COLUMNS: &str = "name, service_port, xray_api_port, method, install_dir, data_dir, \
                            cert_file, inbounds, status, created_at, updated_at";

/// Durable node registry backed by SQLite.
///
/// Holds an exclusive advisory lock on `<registry>.lock` for its lifetime so
/// only one `nodectl` process mutates the registry at a time.
pub struct RegistryStore {
    conn: Connection,
    path: Option<PathBuf>,
    lock_file: Option<File>,
}

impl RegistryStore {
    /// Open (or create) the registry file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                NodeError::Storage(format!(
                    "Failed to create registry directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let mut lock_path = path.as_os_str().to_owned();
        lock_path.push(".lock");
        let lock_file = acquire_lock(Path::new(&lock_path))?;

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        debug!("Opened registry at {}", path.display());

        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
            lock_file: Some(lock_file),
        })
    }

    /// Open an in-memory registry, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn,
            path: None,
            lock_file: None,
        })
    }

    /// Drop the process lock while keeping the connection open.
    ///
    /// For commands that only read and then hand over to a long-running
    /// attached process; nothing should write through this store afterwards.
    pub fn release_lock(&mut self) {
        if self.lock_file.take().is_some() {
            debug!("Released registry lock");
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Create tables and indexes if absent. Safe to call on every start.
    pub fn ensure_initialized(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO config (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![SCHEMA_VERSION_KEY, SCHEMA_VERSION.to_string(), timestamp(&Utc::now())],
        )?;
        Ok(())
    }

    /// Insert a new record. Name and port checks run in the same transaction as the insert.
    pub fn create(&mut self, record: &NodeRecord) -> Result<()> {
        let PortPair { service, xray_api } = record.ports;
        if service == 0 || xray_api == 0 {
            let (role, port) = if service == 0 {
                (PortRole::Service, service)
            } else {
                (PortRole::XrayApi, xray_api)
            };
            return Err(NodeError::port_conflict(
                role,
                port as u32,
                ConflictReason::OutOfRange,
            ));
        }
        if service == xray_api {
            return Err(NodeError::port_conflict(
                PortRole::XrayApi,
                xray_api as u32,
                ConflictReason::Equal,
            ));
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM nodes WHERE name = ?1)",
            params![record.name],
            |row| row.get(0),
        )?;
        if exists {
            return Err(NodeError::AlreadyExists(record.name.clone()));
        }

        for (role, port) in [(PortRole::Service, service), (PortRole::XrayApi, xray_api)] {
            if let Some(owner) = owner_of(&tx, port, None)? {
                return Err(NodeError::port_conflict(
                    role,
                    port as u32,
                    ConflictReason::AllocatedToNode(owner),
                ));
            }
        }

        let inbounds = encode_inbounds(&record.inbounds)?;
        tx.execute(
            &format!(
                "INSERT INTO nodes ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                NODE_COLUMNS
            ),
            params![
                record.name,
                service,
                xray_api,
                record.method.as_str(),
                path_text(&record.install_dir),
                path_text(&record.data_dir),
                path_text(&record.cert_file),
                inbounds,
                record.status,
                timestamp(&record.created_at),
                timestamp(&record.updated_at),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == ErrorCode::ConstraintViolation
                    && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                NodeError::AlreadyExists(record.name.clone())
            }
            other => other.into(),
        })?;

        tx.commit()?;
        debug!("Registered node '{}' on ports {}", record.name, record.ports);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<NodeRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM nodes WHERE name = ?1", NODE_COLUMNS),
                params![name],
                row_to_record,
            )
            .optional()?
            .ok_or_else(|| NodeError::NotFound(name.to_string()))
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM nodes WHERE name = ?1)",
            params![name],
            |row| row.get(0),
        )?)
    }

    /// All records in creation order.
    pub fn list(&self) -> Result<Vec<NodeRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM nodes ORDER BY created_at ASC, id ASC",
            NODE_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Apply a set of field updates and bump `updated_at` in one statement.
    pub fn update(&mut self, name: &str, updates: &[FieldUpdate]) -> Result<()> {
        if updates.is_empty() {
            return Err(NodeError::InvalidInput("no fields to update".to_string()));
        }

        let mut seen = HashSet::new();
        let mut assignments = Vec::with_capacity(updates.len() + 1);
        let mut values: Vec<Value> = Vec::with_capacity(updates.len() + 2);
        for update in updates {
            let field = update.field();
            if !seen.insert(field) {
                return Err(NodeError::InvalidInput(format!(
                    "field '{}' given more than once",
                    field.column()
                )));
            }
            values.push(update_value(update)?);
            assignments.push(format!("{} = ?{}", field.column(), values.len()));
        }
        values.push(Value::Text(timestamp(&Utc::now())));
        assignments.push(format!("updated_at = ?{}", values.len()));
        values.push(Value::Text(name.to_string()));
        let sql = format!(
            "UPDATE nodes SET {} WHERE name = ?{}",
            assignments.join(", "),
            values.len()
        );

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = tx
            .query_row(
                &format!("SELECT {} FROM nodes WHERE name = ?1", NODE_COLUMNS),
                params![name],
                row_to_record,
            )
            .optional()?
            .ok_or_else(|| NodeError::NotFound(name.to_string()))?;

        let mut ports = current.ports;
        for update in updates {
            match update {
                FieldUpdate::ServicePort(p) => ports.service = *p,
                FieldUpdate::XrayApiPort(p) => ports.xray_api = *p,
                _ => {}
            }
        }
        if ports != current.ports {
            if ports.service == ports.xray_api {
                return Err(NodeError::port_conflict(
                    PortRole::XrayApi,
                    ports.xray_api as u32,
                    ConflictReason::Equal,
                ));
            }
            for (role, port) in [
                (PortRole::Service, ports.service),
                (PortRole::XrayApi, ports.xray_api),
            ] {
                if let Some(owner) = owner_of(&tx, port, Some(name))? {
                    return Err(NodeError::port_conflict(
                        role,
                        port as u32,
                        ConflictReason::AllocatedToNode(owner),
                    ));
                }
            }
        }

        tx.execute(&sql, params_from_iter(values))?;
        tx.commit()?;
        debug!("Updated node '{}' ({} fields)", name, updates.len());
        Ok(())
    }

    /// Update a single field addressed by its column name.
    pub fn update_field(&mut self, name: &str, field: &str, value: &str) -> Result<()> {
        let update = FieldUpdate::parse(field, value)?;
        self.update(name, &[update])
    }

    /// Remove a record. Removing an absent name is not an error.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        let removed = self
            .conn
            .execute("DELETE FROM nodes WHERE name = ?1", params![name])?;
        debug!("Deleted node '{}' ({} rows)", name, removed);
        Ok(())
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Name of the node holding `port`, if any.
    pub fn port_owner(&self, port: u16) -> Result<Option<String>> {
        owner_of(&self.conn, port, None)
    }

    pub fn port_in_use(&self, port: u16, excluding: Option<&str>) -> Result<bool> {
        Ok(owner_of(&self.conn, port, excluding)?.is_some())
    }

    /// Highest service port among records other than `excluding`.
    pub fn max_service_port(&self, excluding: Option<&str>) -> Result<Option<u16>> {
        let max: Option<u16> = self.conn.query_row(
            "SELECT MAX(service_port) FROM nodes WHERE (?1 IS NULL OR name <> ?1)",
            params![excluding],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    pub fn get_config(&self, key: &str) -> Result<Option<ConfigEntry>> {
        Ok(self
            .conn
            .query_row(
                "SELECT key, value, updated_at FROM config WHERE key = ?1",
                params![key],
                row_to_config,
            )
            .optional()?)
    }

    pub fn set_config(&mut self, key: &str, value: &str) -> Result<()> {
        if key == SCHEMA_VERSION_KEY {
            return Err(NodeError::InvalidField(key.to_string()));
        }
        if key.trim().is_empty() {
            return Err(NodeError::InvalidInput("config key cannot be empty".to_string()));
        }
        self.conn.execute(
            "INSERT INTO config (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, timestamp(&Utc::now())],
        )?;
        Ok(())
    }

    pub fn list_config(&self) -> Result<Vec<ConfigEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value, updated_at FROM config ORDER BY key")?;
        let rows = stmt.query_map([], row_to_config)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

/// Take the registry lock, writing our PID into it for diagnostics.
fn acquire_lock(lock_path: &Path) -> Result<File> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .map_err(|e| {
            NodeError::Storage(format!(
                "Failed to open lock file {}: {}",
                lock_path.display(),
                e
            ))
        })?;

    if let Err(e) = file.try_lock_exclusive() {
        let holder = fs::read_to_string(lock_path)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        return Err(NodeError::Storage(format!(
            "Registry is locked by another nodectl process{}: {}",
            if holder.is_empty() {
                String::new()
            } else {
                format!(" (PID {})", holder)
            },
            e
        )));
    }

    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    debug!("Acquired registry lock {}", lock_path.display());
    Ok(file)
}

fn owner_of(conn: &Connection, port: u16, excluding: Option<&str>) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT name FROM nodes
             WHERE (service_port = ?1 OR xray_api_port = ?1) AND (?2 IS NULL OR name <> ?2)
             ORDER BY id LIMIT 1",
            params![port, excluding],
            |row| row.get(0),
        )
        .optional()?)
}

fn update_value(update: &FieldUpdate) -> Result<Value> {
    Ok(match update {
        FieldUpdate::ServicePort(p) | FieldUpdate::XrayApiPort(p) => {
            if *p == 0 {
                return Err(NodeError::port_conflict(
                    if matches!(update, FieldUpdate::ServicePort(_)) {
                        PortRole::Service
                    } else {
                        PortRole::XrayApi
                    },
                    0,
                    ConflictReason::OutOfRange,
                ));
            }
            Value::Integer(*p as i64)
        }
        FieldUpdate::InstallDir(p) | FieldUpdate::DataDir(p) | FieldUpdate::CertFile(p) => {
            Value::Text(path_text(p))
        }
        FieldUpdate::Status(s) => Value::Text(s.clone()),
        FieldUpdate::Inbounds(tags) => Value::Text(encode_inbounds(tags)?),
    })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<NodeRecord> {
    let method: String = row.get(3)?;
    let inbounds: String = row.get(7)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;

    Ok(NodeRecord {
        name: row.get(0)?,
        ports: PortPair::new(row.get(1)?, row.get(2)?),
        method: method
            .parse::<Method>()
            .map_err(|e| conversion_error(3, e))?,
        install_dir: PathBuf::from(row.get::<_, String>(4)?),
        data_dir: PathBuf::from(row.get::<_, String>(5)?),
        cert_file: PathBuf::from(row.get::<_, String>(6)?),
        inbounds: serde_json::from_str(&inbounds).map_err(|e| conversion_error(7, e))?,
        status: row.get(8)?,
        created_at: parse_timestamp(9, &created_at)?,
        updated_at: parse_timestamp(10, &updated_at)?,
    })
}

fn row_to_config(row: &Row<'_>) -> rusqlite::Result<ConfigEntry> {
    let updated_at: String = row.get(2)?;
    Ok(ConfigEntry {
        key: row.get(0)?,
        value: row.get(1)?,
        updated_at: parse_timestamp(2, &updated_at)?,
    })
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn encode_inbounds(tags: &[String]) -> Result<String> {
    serde_json::to_string(tags).map_err(|e| NodeError::Storage(e.to_string()))
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RegistryStore {
        let store = RegistryStore::open_in_memory().unwrap();
        store.ensure_initialized().unwrap();
        store
    }

    fn record(name: &str, service: u16, xray: u16) -> NodeRecord {
        NodeRecord::new(
            name,
            PortPair::new(service, xray),
            Method::Container,
            PathBuf::from(format!("/opt/nodectl/{}", name)),
            PathBuf::from(format!("/var/lib/nodectl/nodes/{}", name)),
            PathBuf::from(format!(
                "/var/lib/nodectl/nodes/{}/ssl_client_cert.pem",
                name
            )),
            vec!["VLESS TCP".to_string()],
        )
    }

    #[test]
    fn test_ensure_initialized_is_idempotent() {
        let store = store();
        store.ensure_initialized().unwrap();
        let version = store.get_config(SCHEMA_VERSION_KEY).unwrap().unwrap();
        assert_eq!(version.value, "1");
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_create_then_get_round_trip() {
        let mut store = store();
        let rec = record("alpha", 62050, 62051);
        store.create(&rec).unwrap();

        let got = store.get("alpha").unwrap();
        assert_eq!(got.name, rec.name);
        assert_eq!(got.ports, rec.ports);
        assert_eq!(got.method, rec.method);
        assert_eq!(got.install_dir, rec.install_dir);
        assert_eq!(got.data_dir, rec.data_dir);
        assert_eq!(got.cert_file, rec.cert_file);
        assert_eq!(got.inbounds, rec.inbounds);
        assert_eq!(got.status, rec.status);
    }

    #[test]
    fn test_create_duplicate_name() {
        let mut store = store();
        store.create(&record("alpha", 62050, 62051)).unwrap();
        let err = store.create(&record("alpha", 62060, 62061)).unwrap_err();
        assert!(matches!(err, NodeError::AlreadyExists(n) if n == "alpha"));
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get("alpha").unwrap().ports, PortPair::new(62050, 62051));
    }

    #[test]
    fn test_create_rejects_claimed_or_equal_ports() {
        let mut store = store();
        store.create(&record("alpha", 62050, 62051)).unwrap();

        let err = store.create(&record("beta", 62051, 62060)).unwrap_err();
        assert!(matches!(
            err,
            NodeError::PortConflict {
                role: PortRole::Service,
                port: 62051,
                reason: ConflictReason::AllocatedToNode(ref owner),
            } if owner == "alpha"
        ));

        let err = store.create(&record("beta", 62070, 62070)).unwrap_err();
        assert!(matches!(
            err,
            NodeError::PortConflict {
                reason: ConflictReason::Equal,
                ..
            }
        ));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_get_missing() {
        let store = store();
        assert!(matches!(store.get("ghost"), Err(NodeError::NotFound(_))));
        assert!(!store.exists("ghost").unwrap());
    }

    #[test]
    fn test_list_in_creation_order() {
        let mut store = store();
        for (i, name) in ["zeta", "alpha", "mid"].iter().enumerate() {
            let base = 62050 + (i as u16) * 10;
            store.create(&record(name, base, base + 1)).unwrap();
        }
        let names: Vec<String> = store.list().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_update_fields() {
        let mut store = store();
        store.create(&record("alpha", 62050, 62051)).unwrap();
        let before = store.get("alpha").unwrap();

        store
            .update(
                "alpha",
                &[
                    FieldUpdate::ServicePort(62100),
                    FieldUpdate::XrayApiPort(62101),
                    FieldUpdate::Inbounds(vec![]),
                    FieldUpdate::Status("running".to_string()),
                ],
            )
            .unwrap();

        let after = store.get("alpha").unwrap();
        assert_eq!(after.ports, PortPair::new(62100, 62101));
        assert!(after.inbounds.is_empty());
        assert_eq!(after.status, "running");
        assert_eq!(after.method, before.method);
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at >= before.updated_at);
    }

    #[test]
    fn test_update_rejects_method_field() {
        let mut store = store();
        store.create(&record("alpha", 62050, 62051)).unwrap();
        let before = store.get("alpha").unwrap();

        let err = store.update_field("alpha", "method", "process").unwrap_err();
        assert!(matches!(err, NodeError::InvalidField(f) if f == "method"));
        assert_eq!(store.get("alpha").unwrap(), before);
    }

    #[test]
    fn test_update_checks_ports() {
        let mut store = store();
        store.create(&record("alpha", 62050, 62051)).unwrap();
        store.create(&record("beta", 62060, 62061)).unwrap();

        let err = store
            .update("beta", &[FieldUpdate::XrayApiPort(62050)])
            .unwrap_err();
        assert!(matches!(
            err,
            NodeError::PortConflict {
                reason: ConflictReason::AllocatedToNode(ref owner),
                ..
            } if owner == "alpha"
        ));

        let err = store
            .update("beta", &[FieldUpdate::XrayApiPort(62060)])
            .unwrap_err();
        assert!(matches!(
            err,
            NodeError::PortConflict {
                reason: ConflictReason::Equal,
                ..
            }
        ));

        // swapping its own ports is fine
        store
            .update(
                "beta",
                &[FieldUpdate::ServicePort(62061), FieldUpdate::XrayApiPort(62060)],
            )
            .unwrap();
        assert_eq!(store.get("beta").unwrap().ports, PortPair::new(62061, 62060));
    }

    #[test]
    fn test_update_missing_and_empty() {
        let mut store = store();
        assert!(matches!(
            store.update("ghost", &[FieldUpdate::Status("x".into())]),
            Err(NodeError::NotFound(_))
        ));
        assert!(matches!(
            store.update("ghost", &[]),
            Err(NodeError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mut store = store();
        store.create(&record("alpha", 62050, 62051)).unwrap();
        store.delete("alpha").unwrap();
        store.delete("alpha").unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_port_queries() {
        let mut store = store();
        store.create(&record("alpha", 62050, 62051)).unwrap();
        store.create(&record("beta", 62060, 62061)).unwrap();

        assert_eq!(store.port_owner(62051).unwrap().as_deref(), Some("alpha"));
        assert_eq!(store.port_owner(62052).unwrap(), None);
        assert!(store.port_in_use(62060, None).unwrap());
        assert!(!store.port_in_use(62060, Some("beta")).unwrap());
        assert!(store.port_in_use(62060, Some("alpha")).unwrap());
        assert_eq!(store.max_service_port(None).unwrap(), Some(62060));
        assert_eq!(store.max_service_port(Some("beta")).unwrap(), Some(62050));
    }

    #[test]
    fn test_config_entries() {
        let mut store = store();
        store.set_config("feature.auto_update", "true").unwrap();
        store.set_config("feature.auto_update", "false").unwrap();
        assert_eq!(
            store.get_config("feature.auto_update").unwrap().unwrap().value,
            "false"
        );
        assert!(store.get_config("missing").unwrap().is_none());
        assert!(matches!(
            store.set_config(SCHEMA_VERSION_KEY, "2"),
            Err(NodeError::InvalidField(_))
        ));
        let keys: Vec<String> = store
            .list_config()
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec!["feature.auto_update", SCHEMA_VERSION_KEY]);
    }

    #[test]
    fn test_file_store_and_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("registry.db");
        {
            let mut store = RegistryStore::open(&path).unwrap();
            store.ensure_initialized().unwrap();
            store.create(&record("alpha", 62050, 62051)).unwrap();

            assert!(matches!(
                RegistryStore::open(&path),
                Err(NodeError::Storage(_))
            ));
        }

        let store = RegistryStore::open(&path).unwrap();
        store.ensure_initialized().unwrap();
        assert_eq!(store.get("alpha").unwrap().ports, PortPair::new(62050, 62051));
    }

    #[test]
    fn test_release_lock_lets_others_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.db");
        let mut reader = RegistryStore::open(&path).unwrap();
        reader.ensure_initialized().unwrap();
        reader.release_lock();

        let mut writer = RegistryStore::open(&path).unwrap();
        writer.create(&record("alpha", 62050, 62051)).unwrap();

        // the released store still reads
        assert!(reader.exists("alpha").unwrap());
    }
}
