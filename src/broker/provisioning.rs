//! # Provisioning Operations
//!
//! Creates and removes tenant databases and the users bound to them.
//!
//! Every mutating operation checks the server catalog before acting, so calling it
//! again after a timeout or crash converges on the same end state. There is
//! no application-level locking: two requests for the same instance race at
//! the server's catalog lock, and the loser surfaces the server's error.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::connection::AdministrativeConnection;
use super::credentials::{CredentialPolicy, Credentials};
use super::errors::{BrokerError, BrokerResult};
use super::identifier::{IdentifierPolicy, SafeIdentifier};
use super::instance::{BindingParameters, InstanceParameters, InstanceState, ServiceInstance};
use super::statement::{AdminStatement, Password};

/// Provisioning state engine
#[derive(Clone)]
pub struct ProvisioningService {
    /// Administrative connection
    connection: Arc<dyn AdministrativeConnection>,
    /// Naming rules
    identifiers: IdentifierPolicy,
    /// Password rules
    credentials: CredentialPolicy,
}

impl ProvisioningService {
    /// Create a new provisioning service with default policies
    pub fn new(connection: Arc<dyn AdministrativeConnection>) -> Self {
        Self {
            connection,
            identifiers: IdentifierPolicy::default(),
            credentials: CredentialPolicy::default(),
        }
    }

    /// Create with custom policies
    pub fn with_policies(
        connection: Arc<dyn AdministrativeConnection>,
        identifiers: IdentifierPolicy,
        credentials: CredentialPolicy,
    ) -> Self {
        Self {
            connection,
            identifiers,
            credentials,
        }
    }

    /// Get the naming rules
    pub fn identifier_policy(&self) -> &IdentifierPolicy {
        &self.identifiers
    }

    fn database(&self, raw: &str) -> BrokerResult<SafeIdentifier> {
        self.identifiers.sanitize("database", raw)
    }

    fn username(&self, raw: &str) -> BrokerResult<SafeIdentifier> {
        self.identifiers.sanitize("username", raw)
    }

    /// Create the database for a service instance.
    ///
    /// Uses the `database` parameter when given, otherwise a name generated
    /// from the instance id. Returns the name. An existing database is kept,
    /// but PUBLIC access is revoked on every call so a create interrupted
    /// between the two statements is completed by the retry.
    pub async fn create_database(&self, instance: &ServiceInstance) -> BrokerResult<SafeIdentifier> {
        let database = match &instance.parameters.database {
            Some(raw) => self.database(raw)?,
            None => self
                .identifiers
                .database_for_instance(&instance.service_instance_id)?,
        };

        if self.connection.database_exists(&database).await? {
            info!(
                instance = %instance.service_instance_id,
                database = %database,
                state = %InstanceState::Present,
                "database already exists"
            );
        } else {
            info!(
                instance = %instance.service_instance_id,
                database = %database,
                state = %InstanceState::Creating,
                "creating database"
            );
            self.connection
                .execute(&AdminStatement::CreateDatabase {
                    database: database.clone(),
                })
                .await?;
        }

        self.connection
            .execute(&AdminStatement::RestrictDatabaseAccess {
                database: database.clone(),
            })
            .await?;

        info!(database = %database, state = %InstanceState::Present, "database ready");
        Ok(database)
    }

    /// Drop a database. Absent databases are a no-op.
    pub async fn delete_database(&self, name: &str) -> BrokerResult<()> {
        let database = self.database(name)?;

        if !self.connection.database_exists(&database).await? {
            info!(database = %database, state = %InstanceState::Absent, "database already absent");
            return Ok(());
        }

        info!(database = %database, state = %InstanceState::Deleting, "dropping database");
        self.connection
            .execute(&AdminStatement::DropDatabase {
                database: database.clone(),
            })
            .await?;

        info!(database = %database, state = %InstanceState::Absent, "database dropped");
        Ok(())
    }

    /// Create a login and a least-privilege user on the instance database.
    ///
    /// `instance_parameters.database` must name the database. The username
    /// and password come from `binding_parameters` when supplied and are
    /// generated otherwise. The returned password is always the one the
    /// server holds: an existing login has its password reset, whether it is
    /// already mapped into this database, into another one, or into none.
    pub async fn create_user_creds(
        &self,
        instance_parameters: &InstanceParameters,
        binding_parameters: Option<&BindingParameters>,
    ) -> BrokerResult<Credentials> {
        let database = match &instance_parameters.database {
            Some(raw) => self.database(raw)?,
            None => return Err(BrokerError::invalid_identifier("database", "")),
        };

        let supplied_username = binding_parameters.and_then(|p| p.username.as_deref());
        let username = match supplied_username {
            Some(raw) => self.username(raw)?,
            None => self.identifiers.random_username()?,
        };

        let supplied_password = binding_parameters.and_then(|p| p.password.as_deref());
        let password = self.credentials.resolve_password(supplied_password)?;

        if self.connection.login_privileged(&username).await? {
            return Err(BrokerError::InvalidParameters {
                message: format!("username '{}' names a privileged role", username),
            });
        }

        let reset_password = AdminStatement::AlterLoginPassword {
            login: username.clone(),
            password: Password::new(password.clone()),
        };

        if self.connection.user_exists(&username, &database).await? {
            info!(user = %username, database = %database, "user already exists; resetting password");
            self.connection.execute(&reset_password).await?;
            return Ok(Credentials::new(username, password, database, &self.credentials));
        }

        if !self.connection.database_exists(&database).await? {
            return Err(BrokerError::statement_failure(
                "create_user",
                format!("database '{}' does not exist", database),
            ));
        }

        let mut statements = Vec::with_capacity(3);
        if self.connection.login_exists(&username).await? {
            if self.connection.login_in_use(&username).await? {
                info!(user = %username, "login is mapped into another database; reusing it");
            } else {
                warn!(user = %username, "reusing orphaned login");
            }
            statements.push(reset_password);
        } else {
            statements.push(AdminStatement::CreateLogin {
                login: username.clone(),
                password: Password::new(password.clone()),
            });
        }

        info!(user = %username, database = %database, "creating user");
        statements.extend([
            AdminStatement::CreateUser {
                user: username.clone(),
                database: database.clone(),
            },
            AdminStatement::GrantPrivileges {
                user: username.clone(),
                database: database.clone(),
            },
        ]);
        for statement in &statements {
            debug!(statement = %statement, "executing");
            self.connection.execute(statement).await?;
        }

        info!(user = %username, database = %database, "user created");
        Ok(Credentials::new(username, password, database, &self.credentials))
    }

    /// Revoke, drop the database user, then drop the login unless it is
    /// still mapped into another database.
    ///
    /// Objects the user created stay in the database under the
    /// administrative role. A user that does not exist in the database is a
    /// no-op.
    pub async fn delete_user_creds(&self, username: &str, database_name: &str) -> BrokerResult<()> {
        let username = self.username(username)?;
        let database = self.database(database_name)?;

        if !self.connection.user_exists(&username, &database).await? {
            info!(user = %username, database = %database, "user already absent");
            return Ok(());
        }

        info!(user = %username, database = %database, "deleting user");
        let statements = [
            AdminStatement::RevokePrivileges {
                user: username.clone(),
                database: database.clone(),
            },
            AdminStatement::DropUser {
                user: username.clone(),
                database: database.clone(),
            },
        ];
        for statement in &statements {
            debug!(statement = %statement, "executing");
            self.connection.execute(statement).await?;
        }

        if self.connection.login_in_use(&username).await? {
            info!(user = %username, "login is mapped into another database; keeping it");
        } else {
            self.connection
                .execute(&AdminStatement::DropLogin {
                    login: username.clone(),
                })
                .await?;
        }

        info!(user = %username, database = %database, "user deleted");
        Ok(())
    }

    /// Whether the database exists
    pub async fn check_database_exists(&self, name: &str) -> BrokerResult<bool> {
        let database = self.database(name)?;
        self.connection.database_exists(&database).await
    }

    /// Whether the user exists within the database
    pub async fn check_user_exists(&self, username: &str, database_name: &str) -> BrokerResult<bool> {
        let username = self.username(username)?;
        let database = self.database(database_name)?;
        self.connection.user_exists(&username, &database).await
    }

    /// Observed state of a database: `Present` or `Absent`
    pub async fn instance_state(&self, name: &str) -> BrokerResult<InstanceState> {
        if self.check_database_exists(name).await? {
            Ok(InstanceState::Present)
        } else {
            Ok(InstanceState::Absent)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::connection::{InMemoryConnection, IN_MEMORY_ADMIN};
    use crate::broker::credentials::{DATABASE, PASSWORD, USERNAME};

    const SI_ID: &str = "deleteme";
    const USER_ID: &str = "aUser";

    fn service() -> (Arc<InMemoryConnection>, ProvisioningService) {
        let conn = Arc::new(InMemoryConnection::new());
        let service = ProvisioningService::new(conn.clone());
        (conn, service)
    }

    fn custom_instance() -> ServiceInstance {
        ServiceInstance::new(SI_ID, "SQLServer", "oneNodeCluster")
            .with_parameters(InstanceParameters::with_database(SI_ID))
    }

    #[tokio::test]
    async fn test_custom_lifecycle() {
        let (_conn, service) = service();

        assert!(!service.check_database_exists(SI_ID).await.unwrap());

        let db = service.create_database(&custom_instance()).await.unwrap();
        assert_eq!(db.as_str(), SI_ID);
        assert!(service.check_database_exists(SI_ID).await.unwrap());

        assert!(!service.check_user_exists(USER_ID, SI_ID).await.unwrap());

        let creds = service
            .create_user_creds(
                &InstanceParameters::with_database(SI_ID),
                Some(&BindingParameters::with_username(USER_ID)),
            )
            .await
            .unwrap();
        assert_eq!(creds.username.as_str(), USER_ID);
        assert!(service.check_user_exists(USER_ID, SI_ID).await.unwrap());

        service.delete_user_creds(USER_ID, SI_ID).await.unwrap();
        assert!(!service.check_user_exists(USER_ID, SI_ID).await.unwrap());

        service.delete_database(SI_ID).await.unwrap();
        assert!(!service.check_database_exists(SI_ID).await.unwrap());
    }

    #[tokio::test]
    async fn test_default_lifecycle() {
        let (_conn, service) = service();
        let si = ServiceInstance::new(SI_ID, "SQLServer", "oneNodeCluster");

        let db = service.create_database(&si).await.unwrap();
        assert!(service.check_database_exists(db.as_str()).await.unwrap());
        assert!(!service.check_user_exists(USER_ID, db.as_str()).await.unwrap());

        let creds = service
            .create_user_creds(&InstanceParameters::with_database(db.as_str()), None)
            .await
            .unwrap();
        let map = creds.to_map();
        let user = map[USERNAME].clone();
        assert!(!user.is_empty());
        assert!(!map[PASSWORD].is_empty());
        assert_eq!(map[DATABASE], db.as_str());
        assert!(service.check_user_exists(&user, db.as_str()).await.unwrap());

        service.delete_user_creds(&user, db.as_str()).await.unwrap();
        assert!(!service.check_user_exists(&user, db.as_str()).await.unwrap());

        service.delete_database(db.as_str()).await.unwrap();
        assert!(!service.check_database_exists(db.as_str()).await.unwrap());
        assert!(!service.check_database_exists(SI_ID).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_database_twice() {
        let (conn, service) = service();

        service.create_database(&custom_instance()).await.unwrap();
        service.create_database(&custom_instance()).await.unwrap();

        assert_eq!(conn.database_count(), 1);
        assert_eq!(
            conn.executed(),
            vec![
                "create_database deleteme",
                "restrict_database_access deleteme",
                "restrict_database_access deleteme",
            ]
        );
        assert!(!conn.public_can_connect(SI_ID));
    }

    #[tokio::test]
    async fn test_delete_absent_targets() {
        let (conn, service) = service();

        service.delete_database(SI_ID).await.unwrap();
        service.delete_user_creds(USER_ID, SI_ID).await.unwrap();

        assert!(!service.check_database_exists(SI_ID).await.unwrap());
        assert!(!service.check_user_exists(USER_ID, SI_ID).await.unwrap());
        assert!(conn.executed().is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_create_is_restricted_on_retry() {
        let (conn, service) = service();
        conn.go_offline_after(1);

        let err = service.create_database(&custom_instance()).await.unwrap_err();
        assert!(err.is_transient());
        conn.set_online(true);
        assert!(conn.public_can_connect(SI_ID));

        service.create_database(&custom_instance()).await.unwrap();
        assert!(!conn.public_can_connect(SI_ID));
        assert_eq!(conn.database_count(), 1);
    }

    #[tokio::test]
    async fn test_create_user_twice_returns_server_password() {
        let (conn, service) = service();
        service.create_database(&custom_instance()).await.unwrap();

        let params = InstanceParameters::with_database(SI_ID);
        let binding = BindingParameters::with_username(USER_ID);
        let first = service.create_user_creds(&params, Some(&binding)).await.unwrap();
        assert_eq!(conn.login_password(USER_ID), Some(first.password.clone()));

        let retry = service.create_user_creds(&params, Some(&binding)).await.unwrap();
        assert_eq!(conn.login_password(USER_ID), Some(retry.password.clone()));
        assert!(conn.executed().contains(&"alter_login_password aUser".to_string()));
        assert_eq!(
            conn.executed()
                .iter()
                .filter(|s| s.starts_with("create_login"))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_same_user_in_two_databases() {
        let (conn, service) = service();
        for db in ["dba", "dbb"] {
            service
                .create_database(
                    &ServiceInstance::new(db, "SQLServer", "oneNodeCluster")
                        .with_parameters(InstanceParameters::with_database(db)),
                )
                .await
                .unwrap();
        }
        let binding = BindingParameters::with_username(USER_ID);

        service
            .create_user_creds(&InstanceParameters::with_database("dba"), Some(&binding))
            .await
            .unwrap();
        let second = service
            .create_user_creds(&InstanceParameters::with_database("dbb"), Some(&binding))
            .await
            .unwrap();

        assert!(service.check_user_exists(USER_ID, "dba").await.unwrap());
        assert!(service.check_user_exists(USER_ID, "dbb").await.unwrap());
        assert!(conn.has_grant(USER_ID, "dbb"));
        assert_eq!(conn.login_password(USER_ID), Some(second.password.clone()));

        // the login survives while it is still mapped elsewhere
        service.delete_user_creds(USER_ID, "dba").await.unwrap();
        assert!(conn.login_password(USER_ID).is_some());
        assert!(service.check_user_exists(USER_ID, "dbb").await.unwrap());

        service.delete_user_creds(USER_ID, "dbb").await.unwrap();
        assert!(conn.login_password(USER_ID).is_none());
    }

    #[tokio::test]
    async fn test_unbind_keeps_tenant_tables() {
        let (conn, service) = service();
        service.create_database(&custom_instance()).await.unwrap();
        let params = InstanceParameters::with_database(SI_ID);
        let binding = BindingParameters::with_username(USER_ID);

        service.create_user_creds(&params, Some(&binding)).await.unwrap();
        assert!(conn.create_table(SI_ID, USER_ID, "orders"));

        service.delete_user_creds(USER_ID, SI_ID).await.unwrap();
        assert!(service.check_database_exists(SI_ID).await.unwrap());
        assert_eq!(conn.table_owner(SI_ID, "orders").as_deref(), Some(IN_MEMORY_ADMIN));

        // rebinding the same name works after the login was dropped
        service.create_user_creds(&params, Some(&binding)).await.unwrap();
        assert!(conn.has_grant(USER_ID, SI_ID));
        assert!(conn.table_owner(SI_ID, "orders").is_some());
    }

    #[tokio::test]
    async fn test_privileged_login_is_never_reused() {
        let (conn, service) = service();
        service.create_database(&custom_instance()).await.unwrap();
        conn.add_privileged_login("postgres", "Bootstrap-Password-1");

        let err = service
            .create_user_creds(
                &InstanceParameters::with_database(SI_ID),
                Some(&BindingParameters::with_username("postgres")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::InvalidParameters { .. }));
        assert_eq!(
            conn.login_password("postgres").as_deref(),
            Some("Bootstrap-Password-1")
        );
    }

    #[tokio::test]
    async fn test_user_gets_grants_on_its_database_only() {
        let (conn, service) = service();
        service.create_database(&custom_instance()).await.unwrap();
        service
            .create_database(&ServiceInstance::new("other", "SQLServer", "oneNodeCluster"))
            .await
            .unwrap();

        service
            .create_user_creds(
                &InstanceParameters::with_database(SI_ID),
                Some(&BindingParameters::with_username(USER_ID)),
            )
            .await
            .unwrap();

        assert!(conn.has_grant(USER_ID, SI_ID));
        assert!(!conn.has_grant(USER_ID, "dbother"));
        assert!(!service.check_user_exists(USER_ID, "dbother").await.unwrap());
    }

    #[tokio::test]
    async fn test_supplied_password_is_used() {
        let (conn, service) = service();
        service.create_database(&custom_instance()).await.unwrap();

        let binding = BindingParameters {
            username: Some(USER_ID.to_string()),
            password: Some("Supplied-Password-123456".to_string()),
            database: None,
        };
        let creds = service
            .create_user_creds(&InstanceParameters::with_database(SI_ID), Some(&binding))
            .await
            .unwrap();

        assert_eq!(creds.password, "Supplied-Password-123456");
        assert_eq!(
            conn.login_password(USER_ID).as_deref(),
            Some("Supplied-Password-123456")
        );
    }

    #[tokio::test]
    async fn test_orphaned_login_is_reused() {
        let (conn, service) = service();
        service.create_database(&custom_instance()).await.unwrap();

        let login = SafeIdentifier::parse("username", USER_ID, 63).unwrap();
        conn.execute(&AdminStatement::CreateLogin {
            login,
            password: Password::new("Stale-Password-1234"),
        })
        .await
        .unwrap();

        let creds = service
            .create_user_creds(
                &InstanceParameters::with_database(SI_ID),
                Some(&BindingParameters::with_username(USER_ID)),
            )
            .await
            .unwrap();

        assert_eq!(conn.login_password(USER_ID), Some(creds.password.clone()));
        assert!(service.check_user_exists(USER_ID, SI_ID).await.unwrap());
        assert!(!conn.executed().iter().any(|s| s.starts_with("drop_login")));
    }

    #[tokio::test]
    async fn test_user_on_missing_database_fails() {
        let (_conn, service) = service();
        let err = service
            .create_user_creds(&InstanceParameters::with_database(SI_ID), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::AdministrativeStatementFailure { .. }));
    }

    #[tokio::test]
    async fn test_empty_identifiers_are_rejected_before_any_statement() {
        let (conn, service) = service();

        let si = ServiceInstance::new(SI_ID, "SQLServer", "oneNodeCluster")
            .with_parameters(InstanceParameters::with_database("%$#;"));
        let err = service.create_database(&si).await.unwrap_err();
        assert!(matches!(err, BrokerError::InvalidIdentifier { .. }));

        let err = service
            .create_user_creds(&InstanceParameters::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::InvalidIdentifier { .. }));

        assert!(service.delete_user_creds("", SI_ID).await.is_err());
        assert!(service.check_database_exists("  ").await.is_err());
        assert!(conn.executed().is_empty());
    }

    #[tokio::test]
    async fn test_hostile_names_are_sanitized() {
        let (conn, service) = service();
        let si = ServiceInstance::new(SI_ID, "SQLServer", "oneNodeCluster")
            .with_parameters(InstanceParameters::with_database("tenant\"; DROP DATABASE postgres; --"));

        let db = service.create_database(&si).await.unwrap();
        assert_eq!(db.as_str(), "tenantDROPDATABASEpostgres");
        assert_eq!(
            conn.executed(),
            vec![
                "create_database tenantDROPDATABASEpostgres",
                "restrict_database_access tenantDROPDATABASEpostgres",
            ]
        );
    }

    #[tokio::test]
    async fn test_connection_failure_propagates() {
        let (conn, service) = service();
        conn.set_online(false);

        let err = service.create_database(&custom_instance()).await.unwrap_err();
        assert!(matches!(err, BrokerError::ConnectionFailure { .. }));

        let err = service.delete_database(SI_ID).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_instance_state() {
        let (_conn, service) = service();
        assert_eq!(service.instance_state(SI_ID).await.unwrap(), InstanceState::Absent);
        service.create_database(&custom_instance()).await.unwrap();
        assert_eq!(service.instance_state(SI_ID).await.unwrap(), InstanceState::Present);
    }
}
