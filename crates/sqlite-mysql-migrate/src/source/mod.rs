//! SQLite source database operations.
//!
//! The source file is always opened read-only. Introspection reads the
//! catalogue through the `pragma_*` table-valued functions; data is streamed
//! from a blocking thread into a bounded channel so the async writer side
//! gets backpressure.

mod store;
mod types;

pub use store::UploadDirectory;
pub use types::*;

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::{Batch, Row, SqlValue};
use crate::error::{MigrateError, Result};

/// Quote an identifier for SQLite.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Read-only handle on a SQLite database file.
///
/// Holds only the path; every operation opens its own connection, so the
/// handle is cheap to clone and send across blocking tasks.
#[derive(Debug, Clone)]
pub struct SqliteSource {
    path: PathBuf,
}

impl SqliteSource {
    /// Open a source file and verify it is a readable SQLite database.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = Self {
            path: path.as_ref().to_path_buf(),
        };
        let conn = source.connect()?;
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|e| source.unreadable(e))?;
        Ok(source)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unreadable(&self, err: impl std::fmt::Display) -> MigrateError {
        MigrateError::SourceUnreadable(format!("{}: {}", self.path.display(), err))
    }

    fn connect(&self) -> Result<Connection> {
        if !self.path.is_file() {
            return Err(self.unreadable("file not found"));
        }
        Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| self.unreadable(e))
    }

    /// User table names in catalogue order.
    fn table_names(&self, conn: &Connection) -> Result<Vec<String>> {
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
            )
            .map_err(|e| self.unreadable(e))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Take a fresh structural snapshot of every user table.
    pub fn introspect(&self) -> Result<SourceSchema> {
        let conn = self.connect()?;
        let names = self.table_names(&conn)?;
        let mut tables = Vec::with_capacity(names.len());

        for name in names {
            let columns = load_columns(&conn, &name)?;
            let record_count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", quote_ident(&name)),
                [],
                |row| row.get(0),
            )?;
            let indexes = load_indexes(&conn, &name)?;
            let foreign_keys = load_foreign_keys(&conn, &name)?;

            debug!(
                "Introspected {}: {} columns, {} rows, {} indexes, {} foreign keys",
                name,
                columns.len(),
                record_count,
                indexes.len(),
                foreign_keys.len()
            );

            tables.push(TableDescriptor {
                name,
                columns,
                record_count: record_count.max(0) as u64,
                indexes,
                foreign_keys,
            });
        }

        info!(
            "Introspected {} tables from {}",
            tables.len(),
            self.path.display()
        );
        Ok(SourceSchema::new(tables))
    }

    /// Page through a table's rows as JSON objects.
    ///
    /// A page shorter than `limit` marks the end of the data.
    pub fn preview(
        &self,
        table: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<serde_json::Map<String, serde_json::Value>>> {
        let conn = self.connect()?;
        if !self.table_names(&conn)?.iter().any(|t| t == table) {
            return Err(self.unreadable(format!("table '{}' not found", table)));
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} LIMIT ?1 OFFSET ?2",
            quote_ident(table)
        ))?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let mut rows = stmt.query(rusqlite::params![limit as i64, offset as i64])?;
        let mut page = Vec::new();
        while let Some(row) = rows.next()? {
            let mut object = serde_json::Map::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                object.insert(name.clone(), SqlValue::from_sqlite(row.get_ref(i)?).to_json());
            }
            page.push(object);
        }
        Ok(page)
    }

    /// Read every row of `table` in source order, handing batches of
    /// `batch_size` rows to `f`. Stops early when `f` returns `false`.
    pub fn for_each_batch<F>(&self, table: &TableDescriptor, batch_size: usize, mut f: F) -> Result<u64>
    where
        F: FnMut(Batch) -> Result<bool>,
    {
        let conn = self.connect()?;
        let cols = table
            .columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {}",
            cols,
            quote_ident(&table.name)
        ))?;
        let width = table.columns.len();
        let batch_size = batch_size.max(1);

        let mut rows = stmt.query([])?;
        let mut buffer: Vec<Row> = Vec::with_capacity(batch_size);
        let mut offset = 0u64;
        let mut total = 0u64;

        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(SqlValue::from_sqlite(row.get_ref(i)?));
            }
            buffer.push(values);
            total += 1;

            if buffer.len() >= batch_size {
                let rows = std::mem::replace(&mut buffer, Vec::with_capacity(batch_size));
                let len = rows.len() as u64;
                if !f(Batch::new(rows, offset))? {
                    return Ok(total);
                }
                offset += len;
            }
        }

        if !buffer.is_empty() {
            f(Batch::new(buffer, offset))?;
        }
        Ok(total)
    }

    /// Like [`for_each_batch`](Self::for_each_batch), sending batches into a
    /// channel. Stops early when the receiver is dropped.
    pub fn read_batches(
        &self,
        table: &TableDescriptor,
        batch_size: usize,
        tx: &mpsc::Sender<Result<Batch>>,
    ) -> Result<u64> {
        self.for_each_batch(table, batch_size, |batch| {
            if tx.blocking_send(Ok(batch)).is_err() {
                debug!("{}: reader stopped, receiver dropped", table.name);
                return Ok(false);
            }
            Ok(true)
        })
    }

    /// Stream a table's rows on a blocking thread.
    ///
    /// At most `read_ahead` batches are buffered ahead of the consumer.
    pub fn spawn_reader(
        &self,
        table: TableDescriptor,
        batch_size: usize,
        read_ahead: usize,
    ) -> mpsc::Receiver<Result<Batch>> {
        let (tx, rx) = mpsc::channel(read_ahead.max(1));
        let source = self.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = source.read_batches(&table, batch_size.max(1), &tx) {
                warn!("{}: source read failed: {}", table.name, e);
                let _ = tx.blocking_send(Err(e));
            }
        });
        rx
    }
}

fn load_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnDescriptor>> {
    let mut stmt = conn.prepare(
        "SELECT cid, name, type, \"notnull\", dflt_value, pk \
         FROM pragma_table_info(?1) ORDER BY cid",
    )?;
    let columns = stmt
        .query_map([table], |row| {
            let pk: i64 = row.get(5)?;
            Ok(ColumnDescriptor {
                ordinal_position: row.get::<_, i64>(0)?.max(0) as usize,
                name: row.get(1)?,
                declared_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                nullable: row.get::<_, i64>(3)? == 0,
                default_value: row.get(4)?,
                is_primary_key: pk > 0,
                pk_position: pk.max(0) as u32,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns)
}

fn load_indexes(conn: &Connection, table: &str) -> Result<Vec<IndexDescriptor>> {
    let mut list = conn.prepare(
        "SELECT name, \"unique\", origin FROM pragma_index_list(?1)",
    )?;
    let entries = list
        .query_map([table], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)? != 0,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut info =
        conn.prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
    let mut indexes = Vec::new();

    for (name, unique, origin) in entries {
        if origin == "pk" {
            continue;
        }
        let columns = info
            .query_map([&name], |row| row.get::<_, Option<String>>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if columns.is_empty() || columns.iter().any(|c| c.is_none()) {
            debug!("{}: skipping expression index {}", table, name);
            continue;
        }
        let columns: Vec<String> = columns.into_iter().flatten().collect();

        let name = if name.starts_with("sqlite_autoindex_") {
            format!("{}_{}_key", table, columns.join("_"))
        } else {
            name
        };
        indexes.push(IndexDescriptor {
            name,
            columns,
            unique,
        });
    }
    Ok(indexes)
}

fn load_foreign_keys(conn: &Connection, table: &str) -> Result<Vec<ForeignKeyDescriptor>> {
    let mut stmt = conn.prepare(
        "SELECT id, \"table\", \"from\", \"to\", on_update, on_delete \
         FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
    )?;
    let mut rows = stmt.query([table])?;
    let mut fks: Vec<ForeignKeyDescriptor> = Vec::new();

    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let from: String = row.get(2)?;
        let to: Option<String> = row.get(3)?;

        match fks.last_mut().filter(|fk| fk.id == id) {
            Some(fk) => {
                fk.columns.push(from);
                if let Some(to) = to {
                    fk.ref_columns.push(to);
                }
            }
            None => fks.push(ForeignKeyDescriptor {
                id,
                columns: vec![from],
                ref_table: row.get(1)?,
                ref_columns: to.into_iter().collect(),
                on_update: row.get(4)?,
                on_delete: row.get(5)?,
            }),
        }
    }
    Ok(fks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("source.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE org (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE);
             CREATE TABLE user (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 org_id INTEGER REFERENCES org(id) ON DELETE CASCADE,
                 login VARCHAR(190) NOT NULL,
                 created DATETIME DEFAULT CURRENT_TIMESTAMP,
                 avatar BLOB
             );
             CREATE INDEX idx_user_login ON user(login);
             CREATE TABLE member (user_id INTEGER, team_id INTEGER, PRIMARY KEY (team_id, user_id));
             INSERT INTO org (name) VALUES ('main'), ('other');
             INSERT INTO user (org_id, login, avatar) VALUES (1, 'admin', x'cafe'), (2, 'bob', NULL), (1, 'eve', NULL);",
        )
        .unwrap();
        (dir, path)
    }

    #[test]
    fn test_open_rejects_missing_and_garbage_files() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.db");
        assert!(matches!(
            SqliteSource::open(&missing),
            Err(MigrateError::SourceUnreadable(_))
        ));

        let garbage = dir.path().join("garbage.db");
        std::fs::write(&garbage, vec![b'x'; 4096]).unwrap();
        assert!(matches!(
            SqliteSource::open(&garbage),
            Err(MigrateError::SourceUnreadable(_))
        ));
    }

    #[test]
    fn test_introspect_tables_columns_counts() {
        let (_dir, path) = fixture();
        let schema = SqliteSource::open(&path).unwrap().introspect().unwrap();

        let names: Vec<&str> = schema.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["org", "user", "member"]);

        let user = schema.table("user").unwrap();
        assert_eq!(user.record_count, 3);
        let cols: Vec<&str> = user.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(cols, vec!["id", "org_id", "login", "created", "avatar"]);
        assert!(user.columns[0].is_primary_key);
        assert!(!user.columns[2].nullable);
        assert_eq!(user.columns[2].declared_type, "VARCHAR(190)");
        assert_eq!(
            user.columns[3].default_value.as_deref(),
            Some("CURRENT_TIMESTAMP")
        );
    }

    #[test]
    fn test_introspect_indexes_and_foreign_keys() {
        let (_dir, path) = fixture();
        let schema = SqliteSource::open(&path).unwrap().introspect().unwrap();

        let org = schema.table("org").unwrap();
        assert_eq!(org.indexes.len(), 1);
        assert_eq!(org.indexes[0].name, "org_name_key");
        assert!(org.indexes[0].unique);

        let user = schema.table("user").unwrap();
        assert_eq!(user.indexes[0].name, "idx_user_login");
        assert_eq!(user.foreign_keys.len(), 1);
        assert_eq!(user.foreign_keys[0].ref_table, "org");
        assert_eq!(user.foreign_keys[0].columns, vec!["org_id"]);
        assert_eq!(user.foreign_keys[0].on_delete, "CASCADE");

        let member = schema.table("member").unwrap();
        let pk: Vec<&str> = member.primary_key().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(pk, vec!["team_id", "user_id"]);
        assert!(member.indexes.is_empty());
    }

    #[test]
    fn test_preview_pages() {
        let (_dir, path) = fixture();
        let source = SqliteSource::open(&path).unwrap();

        let page = source.preview("user", 2, 0).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0]["login"], serde_json::json!("admin"));
        assert_eq!(page[0]["avatar"], serde_json::json!("cafe"));

        let tail = source.preview("user", 2, 2).unwrap();
        assert_eq!(tail.len(), 1);

        assert!(matches!(
            source.preview("missing", 10, 0),
            Err(MigrateError::SourceUnreadable(_))
        ));
    }

    #[tokio::test]
    async fn test_spawn_reader_batches() {
        let (_dir, path) = fixture();
        let source = SqliteSource::open(&path).unwrap();
        let schema = source.introspect().unwrap();
        let user = schema.table("user").unwrap().clone();

        let mut rx = source.spawn_reader(user, 2, 1);
        let mut sizes = Vec::new();
        let mut offsets = Vec::new();
        while let Some(batch) = rx.recv().await {
            let batch = batch.unwrap();
            sizes.push(batch.len());
            offsets.push(batch.offset);
        }
        assert_eq!(sizes, vec![2, 1]);
        assert_eq!(offsets, vec![0, 2]);
    }
}
