//! Store backed by a MySQL-protocol server.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, OptsBuilder, Pool, Row};

use super::{Statement, Store, StoreError, StoreErrorKind, TableSnapshot, Transaction, Value};

/// Server error codes and how they are classified.
const ALREADY_EXISTS: &[u16] = &[1007, 1050, 1060, 1061];
/// 1049 also comes from a replica connecting before it replayed `CREATE DATABASE`.
const MISSING_OBJECT: &[u16] = &[1008, 1049, 1051, 1054, 1091, 1146, 1176];
/// TiDB's "schema changed / outdated" family.
const SCHEMA_CONFLICT: &[u16] = &[8027, 8028];
const DUPLICATE_KEY: &[u16] = &[1062, 1586];

fn classify(code: u16) -> StoreErrorKind {
    if ALREADY_EXISTS.contains(&code) {
        StoreErrorKind::AlreadyExists
    } else if MISSING_OBJECT.contains(&code) {
        StoreErrorKind::MissingObject
    } else if SCHEMA_CONFLICT.contains(&code) {
        StoreErrorKind::SchemaConflict
    } else if DUPLICATE_KEY.contains(&code) {
        StoreErrorKind::DuplicateKey
    } else {
        StoreErrorKind::Other
    }
}

impl From<mysql_async::Error> for StoreError {
    fn from(error: mysql_async::Error) -> Self {
        match &error {
            mysql_async::Error::Server(server) => {
                Self::new(classify(server.code), Some(server.code), server.message.clone())
            }
            mysql_async::Error::Io(mysql_async::IoError::Io(io))
                if io.kind() == std::io::ErrorKind::ConnectionRefused =>
            {
                Self::connection_refused(io.to_string())
            }
            _ => Self::other(error.to_string()),
        }
    }
}

fn convert_value(value: &mysql_async::Value) -> Value {
    match value {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Int(v) => Value::Int(*v),
        mysql_async::Value::UInt(v) => {
            i64::try_from(*v).map_or_else(|_| Value::Text(v.to_string()), Value::Int)
        }
        mysql_async::Value::Float(v) => Value::Float(f64::from(*v)),
        mysql_async::Value::Double(v) => Value::Float(*v),
        mysql_async::Value::Bytes(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        mysql_async::Value::Date(y, m, d, hh, mm, ss, us) => Value::Text(format!(
            "{y:04}-{m:02}-{d:02} {hh:02}:{mm:02}:{ss:02}.{us:06}"
        )),
        mysql_async::Value::Time(negative, days, hh, mm, ss, us) => Value::Text(format!(
            "{}{days}d {hh:02}:{mm:02}:{ss:02}.{us:06}",
            if *negative { "-" } else { "" }
        )),
    }
}

/// A store talking to a MySQL-compatible server.
///
/// Database-level statements run on a pool without a default database,
/// everything else on a pool bound to the database named in the DSN. The
/// latter is rebuilt after the database is recreated.
pub struct MysqlStore {
    admin: Pool,
    database: Option<String>,
    opts: Opts,
    pool: RwLock<Pool>,
}

impl MysqlStore {
    /// Set up connection pools for `dsn`. No connection is made yet.
    ///
    /// # Errors
    ///
    /// Returns an error if `dsn` is not a valid `mysql://` URL.
    pub fn connect(dsn: &str) -> Result<Self, StoreError> {
        let opts = Opts::from_url(dsn).map_err(|e| StoreError::other(format!("{dsn}: {e}")))?;
        let database = opts.db_name().map(ToString::to_string);
        let admin = Pool::new(Opts::from(
            OptsBuilder::from_opts(opts.clone()).db_name(None::<String>),
        ));
        let pool = Pool::new(opts.clone());
        Ok(Self {
            admin,
            database,
            opts,
            pool: RwLock::new(pool),
        })
    }

    fn pool(&self) -> Pool {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn rebuild_pool(&self) {
        let fresh = Pool::new(self.opts.clone());
        let old = std::mem::replace(
            &mut *self.pool.write().unwrap_or_else(PoisonError::into_inner),
            fresh,
        );
        tokio::spawn(async move {
            if let Err(e) = old.disconnect().await {
                tracing::debug!("disconnecting stale pool: {e}");
            }
        });
    }

    async fn conn(&self) -> Result<Conn, StoreError> {
        Ok(self.pool().get_conn().await?)
    }
}

#[async_trait]
impl Store for MysqlStore {
    async fn execute(&self, statement: &Statement) -> Result<(), StoreError> {
        let sql = statement.to_string();
        tracing::debug!(%sql, "execute");
        match statement {
            Statement::DropDatabase { .. } => {
                self.admin.get_conn().await?.query_drop(sql).await?;
            }
            Statement::CreateDatabase { .. } => {
                self.admin.get_conn().await?.query_drop(sql).await?;
                self.rebuild_pool();
            }
            _ => self.conn().await?.query_drop(sql).await?,
        }
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let mut conn = self.conn().await?;
        conn.query_drop(super::BEGIN).await?;
        Ok(Box::new(MysqlTransaction { conn }))
    }

    async fn fetch_rows(&self, table: &str) -> Result<TableSnapshot, StoreError> {
        let rows: Vec<Row> = self
            .conn()
            .await?
            .query(format!("SELECT * FROM {table}"))
            .await?;
        let columns = rows
            .first()
            .map(|row| {
                row.columns_ref()
                    .iter()
                    .map(|c| c.name_str().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        let rows = rows
            .iter()
            .map(|row| {
                (0..row.len())
                    .map(|i| row.as_ref(i).map_or(Value::Null, convert_value))
                    .collect()
            })
            .collect();
        Ok(TableSnapshot { columns, rows })
    }

    async fn check_table(&self, table: &str) -> Result<(), StoreError> {
        self.conn()
            .await?
            .query_drop(format!("ADMIN CHECK TABLE {table}"))
            .await?;
        Ok(())
    }

    async fn has_marker(&self, table: &str, marker: i64) -> Result<bool, StoreError> {
        let count: Option<i64> = self
            .conn()
            .await?
            .query_first(format!("SELECT COUNT(*) FROM {table} WHERE id = {marker}"))
            .await?;
        Ok(count.unwrap_or(0) > 0)
    }
}

impl std::fmt::Debug for MysqlStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MysqlStore")
            .field("host", &self.opts.ip_or_hostname())
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

/// A transaction pinned to one pooled connection.
struct MysqlTransaction {
    conn: Conn,
}

#[async_trait]
impl Transaction for MysqlTransaction {
    async fn execute(&mut self, statement: &Statement) -> Result<(), StoreError> {
        self.conn.query_drop(statement.to_string()).await?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.conn.query_drop(super::COMMIT).await?;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.conn.query_drop(super::ROLLBACK).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_classified() {
        assert_eq!(classify(1061), StoreErrorKind::AlreadyExists);
        assert_eq!(classify(1091), StoreErrorKind::MissingObject);
        assert_eq!(classify(1049), StoreErrorKind::MissingObject);
        assert_eq!(classify(8028), StoreErrorKind::SchemaConflict);
        assert_eq!(classify(1062), StoreErrorKind::DuplicateKey);
        assert_eq!(classify(1105), StoreErrorKind::Other);
    }

    #[test]
    fn test_values_converted() {
        assert_eq!(convert_value(&mysql_async::Value::NULL), Value::Null);
        assert_eq!(
            convert_value(&mysql_async::Value::Bytes(b"abc".to_vec())),
            Value::Text("abc".to_string())
        );
        assert_eq!(
            convert_value(&mysql_async::Value::UInt(u64::MAX)),
            Value::Text(u64::MAX.to_string())
        );
    }

    #[test]
    fn test_invalid_dsn_rejected() {
        assert!(MysqlStore::connect("not a url").is_err());
    }

    #[tokio::test]
    async fn test_connect_is_lazy() {
        let store = MysqlStore::connect("mysql://root@127.0.0.1:4000/test").unwrap();
        assert_eq!(store.database.as_deref(), Some("test"));
    }
}
