//! Crawled Database Connections
//!
//! Builds the connection pool for the database being crawled and checks that
//! it answers. TLS is used when the connection settings ask for it.

use crate::config::DatabaseConfig;
use crate::error::AppError;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use std::time::Instant;
use tokio_postgres::NoTls;
use tracing::{debug, info};

/// Create a pool for the crawled database. No connection is opened yet.
pub fn create_pool(db: &DatabaseConfig) -> Result<Pool, AppError> {
    let mut cfg = Config::new();
    cfg.host = Some(db.host.clone());
    cfg.port = Some(db.port);
    cfg.user = Some(db.user.clone());
    cfg.password = Some(db.password.clone());
    cfg.dbname = Some(db.database.clone());
    cfg.pool = Some(PoolConfig::new(db.max_pool_size));
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let pool = if db.require_tls {
        let certs = rustls_native_certs::load_native_certs();
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs.certs {
            root_store.add(cert).ok();
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

        cfg.create_pool(Some(Runtime::Tokio1), tls)
            .map_err(|e| AppError::Config(format!("Failed to create TLS pool: {}", e)))?
    } else {
        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| AppError::Config(format!("Failed to create pool: {}", e)))?
    };

    debug!(
        "Created pool for {}@{}:{}/{} (TLS: {})",
        db.user, db.host, db.port, db.database, db.require_tls
    );
    Ok(pool)
}

/// Result of a round trip to the crawled database
#[derive(Debug)]
pub struct ConnectionCheck {
    pub latency_ms: u64,
    pub server_version: String,
}

/// Run a trivial query to prove the data source is reachable
pub async fn check_connection(pool: &Pool) -> Result<ConnectionCheck, AppError> {
    let started = Instant::now();
    let client = pool
        .get()
        .await
        .map_err(|e| AppError::DataSourceUnavailable(format!("Failed to connect: {}", e)))?;

    let row = client
        .query_one("SELECT version()", &[])
        .await
        .map_err(|e| AppError::DataSourceUnavailable(format!("Connection test failed: {}", e)))?;

    let check = ConnectionCheck {
        latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        server_version: row.get(0),
    };
    info!("Database connection successful ({} ms)", check.latency_ms);
    Ok(check)
}
