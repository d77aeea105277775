//! PostgreSQL connection implementation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::BytesMut;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio::sync::Mutex;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Row as PgRow};

use dsqlink_core::{
    ConnectParams, Connection, Error, QueryResult, Result, Row, Transaction, Value,
};

/// Map a tokio-postgres error into the connector error type.
///
/// Server-reported errors keep their SQLSTATE so commit-conflict
/// classification can prefer the structured code over message matching.
fn map_pg_error(error: tokio_postgres::Error) -> Error {
    match error.as_db_error() {
        Some(db_error) => {
            let code = db_error.code().code();
            let mut message = db_error.message().to_string();
            if let Some(detail) = db_error.detail() {
                if !detail.trim().is_empty() {
                    message.push_str(&format!(" (detail: {})", detail));
                }
            }
            Error::Query {
                message: format!("{} (code: {})", message, code),
                sqlstate: Some(code.to_string()),
            }
        }
        None => Error::Connection(error.to_string()),
    }
}

/// A connection to Aurora DSQL over the PostgreSQL wire protocol.
///
/// The client sits behind an async mutex so the transaction wrapper can
/// serialize its statements against regular operations on the same handle.
/// `close` drops the client, which terminates the background connection task.
pub struct PostgresConnection {
    client: Arc<Mutex<Option<Client>>>,
    closed: AtomicBool,
}

impl PostgresConnection {
    /// Establish a connection.
    ///
    /// TLS is always on with certificate and hostname verification; Aurora
    /// DSQL rejects plaintext connections. tokio-postgres only models
    /// `SslMode::Require`, so verify-full semantics come from the native-tls
    /// connector, which verifies the chain and hostname by default.
    pub async fn connect(params: &ConnectParams) -> Result<Self> {
        tracing::info!(
            host = %params.host,
            port = params.port,
            database = %params.database,
            user = %params.user,
            "connecting to Aurora DSQL"
        );

        let mut config = tokio_postgres::Config::new();
        config
            .host(&params.host)
            .port(params.port)
            .user(&params.user)
            .dbname(&params.database)
            .password(&params.password)
            .application_name(&params.application_name)
            .ssl_mode(tokio_postgres::config::SslMode::Require);

        let connector = TlsConnector::builder()
            .build()
            .map_err(|e| Error::Connection(format!("failed to build TLS connector: {}", e)))?;
        let tls = MakeTlsConnector::new(connector);

        let (client, connection) = config.connect(tls).await.map_err(map_pg_error)?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "postgres connection task ended with error");
            }
        });

        tracing::info!(host = %params.host, "connection established");
        Ok(Self {
            client: Arc::new(Mutex::new(Some(client))),
            closed: AtomicBool::new(false),
        })
    }

    fn closed_error() -> Error {
        Error::Connection("connection is closed".into())
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or_else(Self::closed_error)?;
        let pg_params = to_pg_params(params);
        let refs = param_refs(&pg_params);
        client.execute(sql, &refs).await.map_err(map_pg_error)
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or_else(Self::closed_error)?;
        let pg_params = to_pg_params(params);
        let refs = param_refs(&pg_params);
        let pg_rows = client.query(sql, &refs).await.map_err(map_pg_error)?;
        rows_to_result(&pg_rows)
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        {
            let guard = self.client.lock().await;
            let client = guard.as_ref().ok_or_else(Self::closed_error)?;
            client.execute("BEGIN", &[]).await.map_err(map_pg_error)?;
        }
        Ok(Box::new(PostgresTransaction {
            client: Arc::clone(&self.client),
            finished: false,
        }))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Dropping the client ends the background connection task and closes
        // the socket.
        let mut guard = self.client.lock().await;
        guard.take();
        tracing::debug!("postgres connection closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Transaction over a `PostgresConnection`.
///
/// Statements run through the same shared client; the pool hands each
/// connection to a single caller at a time, so no other statements can
/// interleave inside the transaction window.
pub struct PostgresTransaction {
    client: Arc<Mutex<Option<Client>>>,
    finished: bool,
}

impl PostgresTransaction {
    async fn run(&self, sql: &str) -> Result<()> {
        let guard = self.client.lock().await;
        let client = guard
            .as_ref()
            .ok_or_else(PostgresConnection::closed_error)?;
        client.execute(sql, &[]).await.map_err(map_pg_error)?;
        Ok(())
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if !self.finished {
            // The server aborts the open transaction when the next statement
            // arrives or the connection drops; nothing async can run here.
            tracing::warn!("transaction dropped without commit or rollback");
        }
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let guard = self.client.lock().await;
        let client = guard
            .as_ref()
            .ok_or_else(PostgresConnection::closed_error)?;
        let pg_params = to_pg_params(params);
        let refs = param_refs(&pg_params);
        client.execute(sql, &refs).await.map_err(map_pg_error)
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let guard = self.client.lock().await;
        let client = guard
            .as_ref()
            .ok_or_else(PostgresConnection::closed_error)?;
        let pg_params = to_pg_params(params);
        let refs = param_refs(&pg_params);
        let pg_rows = client.query(sql, &refs).await.map_err(map_pg_error)?;
        rows_to_result(&pg_rows)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.run("COMMIT").await?;
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.run("ROLLBACK").await?;
        self.finished = true;
        Ok(())
    }
}

/// Owned parameter wrapper implementing `ToSql`.
///
/// tokio-postgres wants `&[&(dyn ToSql + Sync)]`; this bridges the dyn-safe
/// `Value` slice into owned values with the right encodings.
#[derive(Debug)]
enum PgValue {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    Json(serde_json::Value),
    DateTimeUtc(chrono::DateTime<chrono::Utc>),
}

impl From<&Value> for PgValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => PgValue::Null,
            Value::Bool(v) => PgValue::Bool(*v),
            Value::Int16(v) => PgValue::Int16(*v),
            Value::Int32(v) => PgValue::Int32(*v),
            Value::Int64(v) => PgValue::Int64(*v),
            Value::Float32(v) => PgValue::Float32(*v),
            Value::Float64(v) => PgValue::Float64(*v),
            Value::String(v) => PgValue::String(v.clone()),
            Value::Bytes(v) => PgValue::Bytes(v.clone()),
            Value::Uuid(v) => PgValue::Uuid(*v),
            Value::Json(v) => PgValue::Json(v.clone()),
            Value::DateTimeUtc(v) => PgValue::DateTimeUtc(*v),
        }
    }
}

impl ToSql for PgValue {
    fn to_sql(
        &self,
        ty: &tokio_postgres::types::Type,
        out: &mut BytesMut,
    ) -> std::result::Result<postgres_types::IsNull, Box<dyn std::error::Error + Sync + Send>>
    {
        match self {
            PgValue::Null => Ok(postgres_types::IsNull::Yes),
            PgValue::Bool(v) => v.to_sql(ty, out),
            PgValue::Int16(v) => v.to_sql(ty, out),
            PgValue::Int32(v) => v.to_sql(ty, out),
            PgValue::Int64(v) => v.to_sql(ty, out),
            PgValue::Float32(v) => v.to_sql(ty, out),
            PgValue::Float64(v) => v.to_sql(ty, out),
            PgValue::String(v) => v.to_sql(ty, out),
            PgValue::Bytes(v) => v.to_sql(ty, out),
            PgValue::Uuid(v) => v.to_sql(ty, out),
            PgValue::Json(v) => v.to_sql(ty, out),
            PgValue::DateTimeUtc(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_: &tokio_postgres::types::Type) -> bool {
        true
    }

    postgres_types::to_sql_checked!();
}

fn to_pg_params(params: &[Value]) -> Vec<PgValue> {
    params.iter().map(PgValue::from).collect()
}

fn param_refs(pg_params: &[PgValue]) -> Vec<&(dyn ToSql + Sync)> {
    pg_params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

fn rows_to_result(pg_rows: &[PgRow]) -> Result<QueryResult> {
    let columns: Vec<String> = pg_rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let mut rows = Vec::with_capacity(pg_rows.len());
    for pg_row in pg_rows {
        let mut values = Vec::with_capacity(pg_row.columns().len());
        for idx in 0..pg_row.columns().len() {
            values.push(postgres_to_value(pg_row, idx));
        }
        rows.push(Row::new(columns.clone(), values));
    }

    Ok(QueryResult { columns, rows })
}

fn postgres_to_value(row: &PgRow, idx: usize) -> Value {
    let type_name = row.columns()[idx].type_().name();

    match type_name {
        "bool" => row
            .try_get::<_, Option<bool>>(idx)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        "int2" => row
            .try_get::<_, Option<i16>>(idx)
            .ok()
            .flatten()
            .map(Value::Int16)
            .unwrap_or(Value::Null),
        "int4" => row
            .try_get::<_, Option<i32>>(idx)
            .ok()
            .flatten()
            .map(Value::Int32)
            .unwrap_or(Value::Null),
        "int8" => row
            .try_get::<_, Option<i64>>(idx)
            .ok()
            .flatten()
            .map(Value::Int64)
            .unwrap_or(Value::Null),
        "float4" => row
            .try_get::<_, Option<f32>>(idx)
            .ok()
            .flatten()
            .map(Value::Float32)
            .unwrap_or(Value::Null),
        "float8" => row
            .try_get::<_, Option<f64>>(idx)
            .ok()
            .flatten()
            .map(Value::Float64)
            .unwrap_or(Value::Null),
        "bytea" => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null),
        "uuid" => row
            .try_get::<_, Option<uuid::Uuid>>(idx)
            .ok()
            .flatten()
            .map(Value::Uuid)
            .unwrap_or(Value::Null),
        "json" | "jsonb" => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .ok()
            .flatten()
            .map(Value::Json)
            .unwrap_or(Value::Null),
        "timestamptz" => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
            .ok()
            .flatten()
            .map(Value::DateTimeUtc)
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<_, Option<String>>(idx)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}
