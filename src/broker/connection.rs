//! # Administrative Connection
//!
//! The broker's only view of the database server. Implementations execute
//! the fixed [`AdminStatement`] set and answer catalog lookups.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use super::errors::{BrokerError, BrokerResult};
use super::identifier::SafeIdentifier;
use super::statement::AdminStatement;

/// Privileged connection to the database server
#[async_trait]
pub trait AdministrativeConnection: Send + Sync {
    /// Execute one administrative statement
    async fn execute(&self, statement: &AdminStatement) -> BrokerResult<()>;

    /// Whether the database is present in the server catalog
    async fn database_exists(&self, database: &SafeIdentifier) -> BrokerResult<bool>;

    /// Whether `user` is mapped into `database`.
    ///
    /// `false` when either side is missing.
    async fn user_exists(&self, user: &SafeIdentifier, database: &SafeIdentifier) -> BrokerResult<bool>;

    /// Whether a server-level login exists
    async fn login_exists(&self, login: &SafeIdentifier) -> BrokerResult<bool>;

    /// Whether the login is mapped into any database
    async fn login_in_use(&self, login: &SafeIdentifier) -> BrokerResult<bool>;

    /// Whether the login carries server-wide rights (superuser, role or
    /// database creation, replication). Such logins are never reused for a
    /// binding.
    async fn login_privileged(&self, login: &SafeIdentifier) -> BrokerResult<bool>;
}

/// Role that takes over a user's objects when the user is dropped
pub const IN_MEMORY_ADMIN: &str = "postgres";

/// Sentinel for "no scheduled outage"
const NO_OUTAGE: usize = usize::MAX;

#[derive(Debug, Default)]
struct Catalog {
    databases: HashSet<String>,
    /// login -> password
    logins: HashMap<String, String>,
    /// (database, user)
    users: HashSet<(String, String)>,
    /// (database, user)
    grants: HashSet<(String, String)>,
    /// Databases any role may connect to
    public_access: HashSet<String>,
    /// Logins with server-wide rights
    privileged: HashSet<String>,
    /// (database, table) -> owner
    tables: HashMap<(String, String), String>,
}

/// In-memory server catalog (for testing).
///
/// Rejects redundant statements the way a real server does, so callers that
/// skip their existence checks fail here too.
#[derive(Debug)]
pub struct InMemoryConnection {
    catalog: RwLock<Catalog>,
    online: AtomicBool,
    /// Statements left before the connection drops
    outage_after: AtomicUsize,
    executed: RwLock<Vec<String>>,
}

impl InMemoryConnection {
    pub fn new() -> Self {
        Self {
            catalog: RwLock::new(Catalog::default()),
            online: AtomicBool::new(true),
            outage_after: AtomicUsize::new(NO_OUTAGE),
            executed: RwLock::new(Vec::new()),
        }
    }

    /// Simulate the server becoming unreachable or reachable again
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Drop the connection after `statements` more successful statements
    pub fn go_offline_after(&self, statements: usize) {
        self.outage_after.store(statements, Ordering::SeqCst);
    }

    /// Statements executed so far, rendered with `Display`
    pub fn executed(&self) -> Vec<String> {
        self.executed.read().unwrap().clone()
    }

    /// Whether `user` currently holds the working privileges on `database`
    pub fn has_grant(&self, user: &str, database: &str) -> bool {
        let catalog = self.catalog.read().unwrap();
        catalog
            .grants
            .contains(&(database.to_string(), user.to_string()))
    }

    /// Password recorded for a login
    pub fn login_password(&self, login: &str) -> Option<String> {
        let catalog = self.catalog.read().unwrap();
        catalog.logins.get(login).cloned()
    }

    /// Whether roles without a grant may connect to `database`
    pub fn public_can_connect(&self, database: &str) -> bool {
        self.catalog.read().unwrap().public_access.contains(database)
    }

    /// Register a login with server-wide rights, such as the bootstrap superuser
    pub fn add_privileged_login(&self, login: &str, password: &str) {
        let mut catalog = self.catalog.write().unwrap();
        catalog.logins.insert(login.to_string(), password.to_string());
        catalog.privileged.insert(login.to_string());
    }

    /// Create a table as `owner`, the way a bound application would.
    ///
    /// Returns `false` when `owner` holds no grant on `database`.
    pub fn create_table(&self, database: &str, owner: &str, table: &str) -> bool {
        let mut catalog = self.catalog.write().unwrap();
        if !catalog.grants.contains(&(database.to_string(), owner.to_string())) {
            return false;
        }
        catalog
            .tables
            .insert((database.to_string(), table.to_string()), owner.to_string());
        true
    }

    /// Owner of a table, if the table exists
    pub fn table_owner(&self, database: &str, table: &str) -> Option<String> {
        let catalog = self.catalog.read().unwrap();
        catalog
            .tables
            .get(&(database.to_string(), table.to_string()))
            .cloned()
    }

    /// Number of databases in the catalog
    pub fn database_count(&self) -> usize {
        self.catalog.read().unwrap().databases.len()
    }

    fn ensure_online(&self) -> BrokerResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::connection("server unreachable"))
        }
    }

    fn apply(catalog: &mut Catalog, statement: &AdminStatement) -> Result<(), String> {
        match statement {
            AdminStatement::CreateDatabase { database } => {
                if !catalog.databases.insert(database.to_string()) {
                    return Err(format!("database '{}' already exists", database));
                }
                catalog.public_access.insert(database.to_string());
                Ok(())
            }
            AdminStatement::RestrictDatabaseAccess { database } => {
                if !catalog.databases.contains(database.as_str()) {
                    return Err(format!("database '{}' does not exist", database));
                }
                catalog.public_access.remove(database.as_str());
                Ok(())
            }
            AdminStatement::DropDatabase { database } => {
                let name = database.as_str();
                if !catalog.databases.remove(name) {
                    return Err(format!("database '{}' does not exist", database));
                }
                catalog.users.retain(|(db, _)| db != name);
                catalog.grants.retain(|(db, _)| db != name);
                catalog.public_access.remove(name);
                catalog.tables.retain(|(db, _), _| db != name);
                Ok(())
            }
            AdminStatement::CreateLogin { login, password } => {
                if catalog.logins.contains_key(login.as_str()) {
                    return Err(format!("role '{}' already exists", login));
                }
                catalog
                    .logins
                    .insert(login.to_string(), password.expose().to_string());
                Ok(())
            }
            AdminStatement::AlterLoginPassword { login, password } => {
                match catalog.logins.get_mut(login.as_str()) {
                    Some(current) => {
                        *current = password.expose().to_string();
                        Ok(())
                    }
                    None => Err(format!("role '{}' does not exist", login)),
                }
            }
            AdminStatement::CreateUser { user, database } => {
                if !catalog.databases.contains(database.as_str()) {
                    return Err(format!("database '{}' does not exist", database));
                }
                if !catalog.logins.contains_key(user.as_str()) {
                    return Err(format!("role '{}' does not exist", user));
                }
                if !catalog.users.insert((database.to_string(), user.to_string())) {
                    return Err(format!("user '{}' already exists in '{}'", user, database));
                }
                Ok(())
            }
            AdminStatement::GrantPrivileges { user, database } => {
                let key = (database.to_string(), user.to_string());
                if !catalog.users.contains(&key) {
                    return Err(format!("user '{}' does not exist in '{}'", user, database));
                }
                catalog.grants.insert(key);
                Ok(())
            }
            AdminStatement::RevokePrivileges { user, database } => {
                let key = (database.to_string(), user.to_string());
                if !catalog.users.contains(&key) {
                    return Err(format!("user '{}' does not exist in '{}'", user, database));
                }
                catalog.grants.remove(&key);
                Ok(())
            }
            AdminStatement::DropUser { user, database } => {
                let key = (database.to_string(), user.to_string());
                if !catalog.users.remove(&key) {
                    return Err(format!("user '{}' does not exist in '{}'", user, database));
                }
                catalog.grants.remove(&key);
                for ((db, _), owner) in catalog.tables.iter_mut() {
                    if db.as_str() == database.as_str() && owner.as_str() == user.as_str() {
                        *owner = IN_MEMORY_ADMIN.to_string();
                    }
                }
                Ok(())
            }
            AdminStatement::DropLogin { login } => {
                if catalog.users.iter().any(|(_, u)| u == login.as_str())
                    || catalog.tables.values().any(|owner| owner == login.as_str())
                {
                    return Err(format!(
                        "role '{}' cannot be dropped because some objects depend on it",
                        login
                    ));
                }
                if catalog.logins.remove(login.as_str()).is_none() {
                    return Err(format!("role '{}' does not exist", login));
                }
                Ok(())
            }
        }
    }
}

impl Default for InMemoryConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AdministrativeConnection for InMemoryConnection {
    async fn execute(&self, statement: &AdminStatement) -> BrokerResult<()> {
        self.ensure_online()?;
        let mut catalog = self.catalog.write().unwrap();
        Self::apply(&mut catalog, statement)
            .map_err(|reason| BrokerError::statement_failure(statement.kind(), reason))?;
        self.executed.write().unwrap().push(statement.to_string());

        let remaining = self.outage_after.load(Ordering::SeqCst);
        if remaining != NO_OUTAGE {
            if remaining <= 1 {
                self.outage_after.store(NO_OUTAGE, Ordering::SeqCst);
                self.set_online(false);
            } else {
                self.outage_after.store(remaining - 1, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    async fn database_exists(&self, database: &SafeIdentifier) -> BrokerResult<bool> {
        self.ensure_online()?;
        let catalog = self.catalog.read().unwrap();
        Ok(catalog.databases.contains(database.as_str()))
    }

    async fn user_exists(&self, user: &SafeIdentifier, database: &SafeIdentifier) -> BrokerResult<bool> {
        self.ensure_online()?;
        let catalog = self.catalog.read().unwrap();
        Ok(catalog.databases.contains(database.as_str())
            && catalog
                .users
                .contains(&(database.to_string(), user.to_string())))
    }

    async fn login_exists(&self, login: &SafeIdentifier) -> BrokerResult<bool> {
        self.ensure_online()?;
        let catalog = self.catalog.read().unwrap();
        Ok(catalog.logins.contains_key(login.as_str()))
    }

    async fn login_in_use(&self, login: &SafeIdentifier) -> BrokerResult<bool> {
        self.ensure_online()?;
        let catalog = self.catalog.read().unwrap();
        Ok(catalog.users.iter().any(|(_, u)| u == login.as_str()))
    }

    async fn login_privileged(&self, login: &SafeIdentifier) -> BrokerResult<bool> {
        self.ensure_online()?;
        let catalog = self.catalog.read().unwrap();
        Ok(catalog.privileged.contains(login.as_str()))
    }
}
