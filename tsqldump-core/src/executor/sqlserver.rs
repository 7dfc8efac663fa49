//! SQL Server query executor over Tiberius.
//!
//! A fresh TDS connection is opened for every statement; nothing is pooled.
//! Each call, connection included, is bounded by the configured query
//! timeout.

use super::{QueryExecutor, TextRow};
use crate::config::ConnectionSettings;
use crate::error::DumpError;
use crate::Result;
use async_trait::async_trait;
use std::fmt::Write as _;
use std::path::Path;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, Row};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, trace};

/// Executes T-SQL text against a SQL Server instance.
pub struct SqlServerExecutor {
    settings: ConnectionSettings,
}

impl SqlServerExecutor {
    /// Creates an executor; no connection is made until the first call.
    ///
    /// # Errors
    /// Returns a configuration error if the settings do not validate
    pub fn new(settings: ConnectionSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    fn tiberius_config(&self, database: &str) -> Config {
        let mut config = Config::new();
        config.host(&self.settings.host);
        config.port(self.settings.effective_port());
        config.database(database);
        config.authentication(AuthMethod::sql_server(
            self.settings.credentials.username(),
            self.settings.credentials.password(),
        ));

        if self.settings.encrypt {
            if self.settings.trust_server_certificate {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }
        config
    }

    async fn connect(&self, database: &str) -> Result<Client<Compat<TcpStream>>> {
        let config = self.tiberius_config(database);

        let tcp = tokio::time::timeout(
            self.settings.connect_timeout,
            TcpStream::connect(config.get_addr()),
        )
        .await
        .map_err(|_| DumpError::QueryTimeout(self.settings.connect_timeout))?
        .map_err(|e| DumpError::connectivity(format!("TCP connect to {}", self.settings), e))?;

        tcp.set_nodelay(true)
            .map_err(|e| DumpError::connectivity("Setting TCP_NODELAY", e))?;

        Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| DumpError::connectivity(format!("Login to {}", self.settings), e))
    }

    async fn run(&self, database: &str, sql: &str) -> Result<Vec<Row>> {
        trace!(database, sql, "Executing statement");
        let timeout = self.settings.query_timeout;

        tokio::time::timeout(timeout, async {
            let mut client = self.connect(database).await?;
            let stream = client
                .simple_query(sql)
                .await
                .map_err(|e| DumpError::query_failed(e.to_string()))?;
            let rows = stream
                .into_first_result()
                .await
                .map_err(|e| DumpError::query_failed(e.to_string()))?;
            // Close errors after a successful read are not interesting.
            let _ = client.close().await;
            Ok::<_, DumpError>(rows)
        })
        .await
        .map_err(|_| DumpError::QueryTimeout(timeout))?
    }
}

#[async_trait]
impl QueryExecutor for SqlServerExecutor {
    async fn test_connection(&self) -> Result<()> {
        let database = self.settings.database.clone();
        match self.run(&database, "SELECT 1").await {
            Ok(_) => Ok(()),
            Err(e @ DumpError::Connectivity { .. }) => Err(e),
            Err(e) => Err(DumpError::connectivity(
                format!("Health check against {}", self.settings),
                e,
            )),
        }
    }

    async fn execute_query(&self, database: &str, sql: &str) -> Result<Vec<TextRow>> {
        let rows = self.run(database, sql).await?;
        debug!(database, rows = rows.len(), "Statement returned rows");
        rows.into_iter().map(row_to_text).collect()
    }

    async fn execute_query_to_file(&self, database: &str, sql: &str, path: &Path) -> Result<()> {
        let rows = self.execute_query(database, sql).await?;

        let file = tokio::fs::File::create(path)
            .await
            .map_err(|e| DumpError::io(format!("Failed to create {}", path.display()), e))?;
        let mut writer = tokio::io::BufWriter::new(file);

        for row in rows {
            let line: String = row.into_iter().flatten().collect();
            writer
                .write_all(line.as_bytes())
                .await
                .map_err(|e| DumpError::io(format!("Failed to write {}", path.display()), e))?;
            writer
                .write_all(b"\n")
                .await
                .map_err(|e| DumpError::io(format!("Failed to write {}", path.display()), e))?;
        }

        writer
            .flush()
            .await
            .map_err(|e| DumpError::io(format!("Failed to flush {}", path.display()), e))
    }

    fn database(&self) -> &str {
        &self.settings.database
    }

    fn safe_description(&self) -> String {
        self.settings.to_string()
    }
}

fn row_to_text(row: Row) -> Result<TextRow> {
    row.into_iter().map(column_to_text).collect()
}

/// Converts one Tiberius cell to text.
///
/// Every query the engine issues casts temporal and XML values to NVARCHAR
/// on the server, so only scalar wire types are handled here.
fn column_to_text(data: ColumnData<'static>) -> Result<Option<String>> {
    let text = match data {
        ColumnData::String(v) => v.map(|s| s.into_owned()),
        ColumnData::U8(v) => v.map(|n| n.to_string()),
        ColumnData::I16(v) => v.map(|n| n.to_string()),
        ColumnData::I32(v) => v.map(|n| n.to_string()),
        ColumnData::I64(v) => v.map(|n| n.to_string()),
        ColumnData::F32(v) => v.map(|n| n.to_string()),
        ColumnData::F64(v) => v.map(|n| n.to_string()),
        ColumnData::Bit(v) => v.map(|b| if b { "1" } else { "0" }.to_string()),
        ColumnData::Guid(v) => v.map(|g| g.to_string().to_uppercase()),
        ColumnData::Numeric(v) => v.map(|n| n.to_string()),
        ColumnData::Binary(v) => v.map(|bytes| hex_literal(&bytes)),
        _ => {
            return Err(DumpError::query_failed(
                "Result column has a type that is not read as text; cast it to NVARCHAR",
            ));
        }
    };
    Ok(text)
}

/// `0x`-prefixed upper-case hex of `bytes`.
pub fn hex_literal(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().saturating_mul(2).saturating_add(2));
    out.push_str("0x");
    for b in bytes {
        let _ = write!(out, "{:02X}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use std::borrow::Cow;

    fn settings() -> ConnectionSettings {
        ConnectionSettings::new(
            "localhost",
            "Shop",
            Credentials::new("sa".to_string(), Some("secret".to_string())),
        )
    }

    #[test]
    fn test_new_validates_settings() {
        assert!(SqlServerExecutor::new(settings()).is_ok());

        let mut bad = settings();
        bad.database = String::new();
        assert!(SqlServerExecutor::new(bad).is_err());
    }

    #[test]
    fn test_safe_description_has_no_credentials() {
        let executor = SqlServerExecutor::new(settings()).unwrap();
        let description = executor.safe_description();
        assert!(description.contains("localhost"));
        assert!(!description.contains("secret"));
        assert_eq!(executor.database(), "Shop");
    }

    #[test]
    fn test_hex_literal() {
        assert_eq!(hex_literal(&[]), "0x");
        assert_eq!(hex_literal(&[0x00, 0xAB, 0x10]), "0x00AB10");
    }

    #[test]
    fn test_column_to_text() {
        assert_eq!(
            column_to_text(ColumnData::String(Some(Cow::Borrowed("x")))).unwrap(),
            Some("x".to_string())
        );
        assert_eq!(column_to_text(ColumnData::String(None)).unwrap(), None);
        assert_eq!(
            column_to_text(ColumnData::I32(Some(42))).unwrap(),
            Some("42".to_string())
        );
        assert_eq!(
            column_to_text(ColumnData::Bit(Some(true))).unwrap(),
            Some("1".to_string())
        );
        assert_eq!(
            column_to_text(ColumnData::Binary(Some(Cow::Owned(vec![0xDE, 0xAD])))).unwrap(),
            Some("0xDEAD".to_string())
        );
    }
}
