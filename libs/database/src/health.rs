//! `testConnection` (spec §6.3): opens a short-lived, single-connection probe against
//! the external database, pings it, and closes it. Connections are never pooled across
//! reconciles — health checks are cheap and bounded.

use crate::crd::DatabaseType;
use crate::error::{Error, Result};

use std::time::Duration;

use sqlx::Connection;
use sqlx::mysql::MySqlConnectOptions;
use sqlx::postgres::PgConnectOptions;
use sqlx::sqlite::SqliteConnectOptions;
use tiberius::{Client as TiberiusClient, Config as TiberiusConfig};
use tokio::net::TcpStream;
use tokio_util::compat::TokioAsyncWriteCompatExt;
use tracing::debug;

/// Hard deadline for the whole probe: connect + ping + close.
pub const PING_DEADLINE: Duration = Duration::from_secs(10);

/// Open a driver-specific connection, ping it once, and close it. `dsn` must be the
/// full (credentialed) connection string from [`crate::dsn::build`].
pub async fn test_connection(type_: DatabaseType, dsn: &str) -> Result<()> {
    match tokio::time::timeout(PING_DEADLINE, probe(type_, dsn)).await {
        Ok(result) => result,
        Err(_) => Err(Error::PingTimeout(PING_DEADLINE)),
    }
}

async fn probe(type_: DatabaseType, dsn: &str) -> Result<()> {
    match type_ {
        DatabaseType::Postgres => probe_sqlx_postgres(dsn).await,
        DatabaseType::Mysql | DatabaseType::Mariadb => probe_sqlx_mysql(dsn).await,
        DatabaseType::Sqlite => probe_sqlx_sqlite(dsn).await,
        DatabaseType::Sqlserver => probe_sqlserver(dsn).await,
    }
}

async fn probe_sqlx_postgres(dsn: &str) -> Result<()> {
    let options: PgConnectOptions = dsn
        .parse()
        .map_err(|e| Error::DriverOpenError(format!("{e}")))?;
    let mut conn = options
        .connect()
        .await
        .map_err(connect_error)?;
    conn.ping().await.map_err(connect_error)?;
    conn.close().await.map_err(connect_error)?;
    Ok(())
}

async fn probe_sqlx_mysql(dsn: &str) -> Result<()> {
    // mysql/mariadb DSNs use the `<user>:<pass>@tcp(<host>:<port>)/<db>` shape, not a
    // URL sqlx's parser accepts directly; translate it into `MySqlConnectOptions`.
    let options = mysql_options_from_dsn(dsn)?;
    let mut conn = options
        .connect()
        .await
        .map_err(connect_error)?;
    conn.ping().await.map_err(connect_error)?;
    conn.close().await.map_err(connect_error)?;
    Ok(())
}

async fn probe_sqlx_sqlite(path: &str) -> Result<()> {
    let options = SqliteConnectOptions::new().filename(path).create_if_missing(false);
    let mut conn = options
        .connect()
        .await
        .map_err(connect_error)?;
    conn.ping().await.map_err(connect_error)?;
    conn.close().await.map_err(connect_error)?;
    Ok(())
}

async fn probe_sqlserver(dsn: &str) -> Result<()> {
    let parsed = SqlServerDsn::parse(dsn)?;
    let tcp = TcpStream::connect((parsed.host.as_str(), parsed.port))
        .await
        .map_err(|e| Error::PingRefused(e.to_string()))?;
    tcp.set_nodelay(true)
        .map_err(|e| Error::DriverOpenError(e.to_string()))?;
    let config = TiberiusConfig::from_ado_string(&parsed.to_ado_string())
        .map_err(|e| Error::DriverOpenError(e.to_string()))?;
    let mut client = TiberiusClient::connect(config, tcp.compat_write())
        .await
        .map_err(|e| Error::DriverOpenError(e.to_string()))?;
    client
        .simple_query("SELECT 1")
        .await
        .map_err(|e| Error::PingRefused(e.to_string()))?;
    debug!("sqlserver ping succeeded");
    Ok(())
}

/// Parsed form of the `sqlserver://<u>:<p>@<h>:<port>?database=<db>&connection+timeout=<cto>`
/// DSN (spec §6.2), translated into the ado.net connection string tiberius expects.
struct SqlServerDsn {
    host: String,
    port: u16,
    database: String,
    user: String,
    password: String,
}

impl SqlServerDsn {
    fn parse(dsn: &str) -> Result<Self> {
        let malformed = || Error::DriverOpenError("malformed sqlserver DSN".to_string());
        let rest = dsn.strip_prefix("sqlserver://").ok_or_else(malformed)?;
        let (user_pass, rest) = rest.split_once('@').ok_or_else(malformed)?;
        let (user, password) = user_pass.split_once(':').ok_or_else(malformed)?;
        let (host_port, query) = rest.split_once('?').unwrap_or((rest, ""));
        let (host, port) = host_port.split_once(':').ok_or_else(malformed)?;

        let mut database = String::new();
        for kv in query.split('&') {
            if let Some(value) = kv.strip_prefix("database=") {
                database = value.to_string();
            }
        }

        Ok(Self {
            host: host.to_string(),
            port: port.parse().map_err(|_| malformed())?,
            database,
            user: percent_encoding::percent_decode_str(user)
                .decode_utf8_lossy()
                .into_owned(),
            password: percent_encoding::percent_decode_str(password)
                .decode_utf8_lossy()
                .into_owned(),
        })
    }

    fn to_ado_string(&self) -> String {
        format!(
            "server=tcp:{},{};database={};user id={};password={};TrustServerCertificate=true;",
            self.host, self.port, self.database, self.user, self.password
        )
    }
}

fn connect_error(e: sqlx::Error) -> Error {
    match &e {
        sqlx::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
            Error::PingRefused(e.to_string())
        }
        _ => Error::DriverOpenError(e.to_string()),
    }
}

fn mysql_options_from_dsn(dsn: &str) -> Result<MySqlConnectOptions> {
    // `<user>:<pass>@tcp(<host>:<port>)/<db>?tls=<bool>&timeout=<n>s`
    let (user_pass, rest) = dsn
        .split_once('@')
        .ok_or_else(|| Error::DriverOpenError("malformed mysql DSN".to_string()))?;
    let (user, pass) = user_pass
        .split_once(':')
        .ok_or_else(|| Error::DriverOpenError("malformed mysql DSN".to_string()))?;
    let rest = rest
        .strip_prefix("tcp(")
        .ok_or_else(|| Error::DriverOpenError("malformed mysql DSN".to_string()))?;
    let (host_port, rest) = rest
        .split_once(')')
        .ok_or_else(|| Error::DriverOpenError("malformed mysql DSN".to_string()))?;
    let (host, port) = host_port
        .split_once(':')
        .ok_or_else(|| Error::DriverOpenError("malformed mysql DSN".to_string()))?;
    let rest = rest.strip_prefix('/').unwrap_or(rest);
    let (database, query) = rest.split_once('?').unwrap_or((rest, ""));

    let tls_enabled = query
        .split('&')
        .find_map(|kv| kv.strip_prefix("tls="))
        .map(|v| v == "true")
        .unwrap_or(false);

    let mut options = MySqlConnectOptions::new()
        .host(host)
        .port(
            port.parse()
                .map_err(|_| Error::DriverOpenError("malformed mysql DSN port".to_string()))?,
        )
        .username(percent_encoding::percent_decode_str(user).decode_utf8_lossy().as_ref())
        .password(percent_encoding::percent_decode_str(pass).decode_utf8_lossy().as_ref())
        .database(database);
    if tls_enabled {
        options = options.ssl_mode(sqlx::mysql::MySqlSslMode::Required);
    } else {
        options = options.ssl_mode(sqlx::mysql::MySqlSslMode::Disabled);
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mysql_dsn_shape() {
        let options = mysql_options_from_dsn("u:p@tcp(10.0.0.1:3306)/appdb?tls=true&timeout=5s");
        assert!(options.is_ok());
    }

    #[test]
    fn parses_sqlserver_dsn_into_ado_string() {
        let parsed =
            SqlServerDsn::parse("sqlserver://u:p@10.0.0.1:1433?database=appdb&connection+timeout=5")
                .unwrap();
        assert_eq!(parsed.host, "10.0.0.1");
        assert_eq!(parsed.port, 1433);
        assert_eq!(parsed.database, "appdb");
        assert!(parsed.to_ado_string().contains("server=tcp:10.0.0.1,1433"));
    }
}
