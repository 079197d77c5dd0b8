//! PostgreSQL administrative connection

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Connection, PgConnection, PgPool};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use super::connection::AdministrativeConnection;
use super::errors::{BrokerError, BrokerResult};
use super::identifier::SafeIdentifier;
use super::statement::{AdminStatement, RenderedStatement, StatementScope};

const DATABASE_EXISTS_SQL: &str = "SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)";

const LOGIN_EXISTS_SQL: &str = "SELECT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = $1)";

// Explicit CONNECT grants only; PUBLIC access is revoked when the database is created.
const USER_EXISTS_SQL: &str = "SELECT EXISTS ( \
    SELECT 1 FROM pg_database d \
    CROSS JOIN LATERAL aclexplode(d.datacl) acl \
    JOIN pg_roles r ON r.oid = acl.grantee \
    WHERE d.datname = $2 AND r.rolname = $1 AND acl.privilege_type = 'CONNECT')";

const LOGIN_IN_USE_SQL: &str = "SELECT EXISTS ( \
    SELECT 1 FROM pg_database d \
    CROSS JOIN LATERAL aclexplode(d.datacl) acl \
    JOIN pg_roles r ON r.oid = acl.grantee \
    WHERE r.rolname = $1 AND acl.privilege_type = 'CONNECT')";

const LOGIN_PRIVILEGED_SQL: &str = "SELECT EXISTS ( \
    SELECT 1 FROM pg_roles WHERE rolname = $1 \
    AND (rolsuper OR rolcreaterole OR rolcreatedb OR rolreplication OR rolbypassrls))";

/// Configuration for the administrative connection pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_secs: 30,
        }
    }
}

/// Administrative connection backed by a PostgreSQL role with CREATEDB and CREATEROLE
pub struct PostgresConnection {
    pool: PgPool,
    options: PgConnectOptions,
}

impl PostgresConnection {
    /// Connect with default pool configuration
    pub async fn connect(database_url: &str) -> BrokerResult<Self> {
        Self::with_pool_config(database_url, PoolConfig::default()).await
    }

    /// Connect with a custom pool configuration
    pub async fn with_pool_config(database_url: &str, config: PoolConfig) -> BrokerResult<Self> {
        if config.min_connections == 0 {
            return Err(BrokerError::ConfigError {
                message: "min_connections must be > 0".to_string(),
            });
        }
        if config.max_connections < config.min_connections {
            return Err(BrokerError::ConfigError {
                message: "max_connections must be >= min_connections".to_string(),
            });
        }

        let options = PgConnectOptions::from_str(database_url).map_err(|e| BrokerError::ConfigError {
            message: format!("invalid postgres url: {}", e),
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_with(options.clone())
            .await?;

        Ok(Self { pool, options })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn run(&self, statement: &AdminStatement, rendered: &RenderedStatement) -> BrokerResult<()> {
        let result = match &rendered.scope {
            StatementScope::Server => sqlx::raw_sql(&rendered.sql).execute(&self.pool).await.map(|_| ()),
            StatementScope::Database(database) => {
                let options = self.options.clone().database(database.as_str());
                let mut conn = PgConnection::connect_with(&options).await?;
                let result = sqlx::Executor::execute(&mut conn, sqlx::raw_sql(&rendered.sql)).await.map(|_| ());
                if let Err(e) = conn.close().await {
                    warn!(database = %database, error = %e, "failed to close database-scoped session");
                }
                result
            }
        };

        result.map_err(|e| match BrokerError::from(e) {
            BrokerError::AdministrativeStatementFailure { statement: code, reason } => {
                BrokerError::AdministrativeStatementFailure {
                    statement: statement.kind().to_string(),
                    reason: if code.is_empty() {
                        reason
                    } else {
                        format!("{} (SQLSTATE {})", reason, code)
                    },
                }
            }
            other => other,
        })
    }
}

#[async_trait]
impl AdministrativeConnection for PostgresConnection {
    #[instrument(skip_all, fields(statement = %statement))]
    async fn execute(&self, statement: &AdminStatement) -> BrokerResult<()> {
        let start = Instant::now();
        for rendered in statement.render_postgres() {
            self.run(statement, &rendered).await?;
        }

        let elapsed = start.elapsed();
        debug!(duration_ms = elapsed.as_millis() as u64, "statement executed");
        if elapsed.as_millis() > 1000 {
            warn!(
                duration_ms = elapsed.as_millis() as u64,
                "Slow administrative statement detected"
            );
        }
        Ok(())
    }

    #[instrument(skip_all, fields(database = %database))]
    async fn database_exists(&self, database: &SafeIdentifier) -> BrokerResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(DATABASE_EXISTS_SQL)
            .bind(database.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    #[instrument(skip_all, fields(user = %user, database = %database))]
    async fn user_exists(&self, user: &SafeIdentifier, database: &SafeIdentifier) -> BrokerResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(USER_EXISTS_SQL)
            .bind(user.as_str())
            .bind(database.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    #[instrument(skip_all, fields(login = %login))]
    async fn login_exists(&self, login: &SafeIdentifier) -> BrokerResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(LOGIN_EXISTS_SQL)
            .bind(login.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    #[instrument(skip_all, fields(login = %login))]
    async fn login_in_use(&self, login: &SafeIdentifier) -> BrokerResult<bool> {
        let in_use = sqlx::query_scalar::<_, bool>(LOGIN_IN_USE_SQL)
            .bind(login.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(in_use)
    }

    #[instrument(skip_all, fields(login = %login))]
    async fn login_privileged(&self, login: &SafeIdentifier) -> BrokerResult<bool> {
        let privileged = sqlx::query_scalar::<_, bool>(LOGIN_PRIVILEGED_SQL)
            .bind(login.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(privileged)
    }
}
