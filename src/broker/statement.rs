//! # Administrative Statements
//!
//! The complete set of catalog-mutating statements the broker issues.
//! Identifiers arrive as [`SafeIdentifier`] and are emitted double-quoted.
//! The password is the only free-form value; it is emitted as a single-quoted
//! literal with embedded quotes doubled.

use std::fmt;

use super::identifier::SafeIdentifier;

/// Login password. Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

/// Administrative statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminStatement {
    /// Create a database
    CreateDatabase { database: SafeIdentifier },
    /// Close a database to every role without an explicit grant
    RestrictDatabaseAccess { database: SafeIdentifier },
    /// Drop a database
    DropDatabase { database: SafeIdentifier },
    /// Create a server-level login
    CreateLogin {
        login: SafeIdentifier,
        password: Password,
    },
    /// Replace the password of an existing login
    AlterLoginPassword {
        login: SafeIdentifier,
        password: Password,
    },
    /// Map a login into one database
    CreateUser {
        user: SafeIdentifier,
        database: SafeIdentifier,
    },
    /// Grant the working privileges inside one database
    GrantPrivileges {
        user: SafeIdentifier,
        database: SafeIdentifier,
    },
    /// Revoke what `GrantPrivileges` granted
    RevokePrivileges {
        user: SafeIdentifier,
        database: SafeIdentifier,
    },
    /// Hand the user's objects to the administrative role, then remove the
    /// login's mapping into one database
    DropUser {
        user: SafeIdentifier,
        database: SafeIdentifier,
    },
    /// Drop a server-level login
    DropLogin { login: SafeIdentifier },
}

impl AdminStatement {
    /// Short name for logs and errors
    pub fn kind(&self) -> &'static str {
        match self {
            AdminStatement::CreateDatabase { .. } => "create_database",
            AdminStatement::RestrictDatabaseAccess { .. } => "restrict_database_access",
            AdminStatement::DropDatabase { .. } => "drop_database",
            AdminStatement::CreateLogin { .. } => "create_login",
            AdminStatement::AlterLoginPassword { .. } => "alter_login_password",
            AdminStatement::CreateUser { .. } => "create_user",
            AdminStatement::GrantPrivileges { .. } => "grant_privileges",
            AdminStatement::RevokePrivileges { .. } => "revoke_privileges",
            AdminStatement::DropUser { .. } => "drop_user",
            AdminStatement::DropLogin { .. } => "drop_login",
        }
    }

    /// Render as PostgreSQL commands, in execution order
    pub fn render_postgres(&self) -> Vec<RenderedStatement> {
        match self {
            AdminStatement::CreateDatabase { database } => vec![RenderedStatement::server(format!(
                "CREATE DATABASE {}",
                database.quoted()
            ))],
            AdminStatement::RestrictDatabaseAccess { database } => {
                vec![RenderedStatement::server(format!(
                    "REVOKE CONNECT, TEMPORARY ON DATABASE {} FROM PUBLIC",
                    database.quoted()
                ))]
            }
            AdminStatement::DropDatabase { database } => vec![RenderedStatement::server(format!(
                "DROP DATABASE IF EXISTS {} WITH (FORCE)",
                database.quoted()
            ))],
            AdminStatement::CreateLogin { login, password } => {
                vec![RenderedStatement::server(format!(
                    "CREATE ROLE {} WITH LOGIN NOSUPERUSER NOCREATEDB NOCREATEROLE NOINHERIT PASSWORD {}",
                    login.quoted(),
                    quote_literal(password.expose())
                ))]
            }
            AdminStatement::AlterLoginPassword { login, password } => {
                vec![RenderedStatement::server(format!(
                    "ALTER ROLE {} WITH PASSWORD {}",
                    login.quoted(),
                    quote_literal(password.expose())
                ))]
            }
            AdminStatement::CreateUser { user, database } => vec![RenderedStatement::server(format!(
                "GRANT CONNECT ON DATABASE {} TO {}",
                database.quoted(),
                user.quoted()
            ))],
            AdminStatement::GrantPrivileges { user, database } => {
                let user = user.quoted();
                vec![
                    RenderedStatement::in_database(
                        database,
                        format!("GRANT USAGE, CREATE ON SCHEMA public TO {}", user),
                    ),
                    RenderedStatement::in_database(
                        database,
                        format!(
                            "GRANT SELECT, INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA public TO {}",
                            user
                        ),
                    ),
                    RenderedStatement::in_database(
                        database,
                        format!("GRANT USAGE, SELECT ON ALL SEQUENCES IN SCHEMA public TO {}", user),
                    ),
                ]
            }
            AdminStatement::RevokePrivileges { user, database } => {
                let user = user.quoted();
                vec![
                    RenderedStatement::in_database(
                        database,
                        format!("REVOKE ALL ON ALL SEQUENCES IN SCHEMA public FROM {}", user),
                    ),
                    RenderedStatement::in_database(
                        database,
                        format!("REVOKE ALL ON ALL TABLES IN SCHEMA public FROM {}", user),
                    ),
                    RenderedStatement::in_database(
                        database,
                        format!("REVOKE ALL ON SCHEMA public FROM {}", user),
                    ),
                ]
            }
            AdminStatement::DropUser { user, database } => vec![
                RenderedStatement::in_database(
                    database,
                    format!("REASSIGN OWNED BY {} TO CURRENT_USER", user.quoted()),
                ),
                RenderedStatement::in_database(database, format!("DROP OWNED BY {}", user.quoted())),
                RenderedStatement::server(format!(
                    "REVOKE ALL ON DATABASE {} FROM {}",
                    database.quoted(),
                    user.quoted()
                )),
            ],
            AdminStatement::DropLogin { login } => vec![RenderedStatement::server(format!(
                "DROP ROLE IF EXISTS {}",
                login.quoted()
            ))],
        }
    }
}

impl fmt::Display for AdminStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminStatement::CreateDatabase { database }
            | AdminStatement::RestrictDatabaseAccess { database }
            | AdminStatement::DropDatabase { database } => {
                write!(f, "{} {}", self.kind(), database)
            }
            AdminStatement::CreateLogin { login, .. }
            | AdminStatement::AlterLoginPassword { login, .. }
            | AdminStatement::DropLogin { login } => {
                write!(f, "{} {}", self.kind(), login)
            }
            AdminStatement::CreateUser { user, database }
            | AdminStatement::GrantPrivileges { user, database }
            | AdminStatement::RevokePrivileges { user, database }
            | AdminStatement::DropUser { user, database } => {
                write!(f, "{} {} on {}", self.kind(), user, database)
            }
        }
    }
}

/// Where a rendered command must run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementScope {
    /// Any administrative session
    Server,
    /// A session connected to the named database
    Database(SafeIdentifier),
}

/// One command ready to send to the server
#[derive(Clone, PartialEq, Eq)]
pub struct RenderedStatement {
    pub scope: StatementScope,
    pub sql: String,
}

impl RenderedStatement {
    fn server(sql: String) -> Self {
        Self {
            scope: StatementScope::Server,
            sql,
        }
    }

    fn in_database(database: &SafeIdentifier, sql: String) -> Self {
        Self {
            scope: StatementScope::Database(database.clone()),
            sql,
        }
    }
}

impl fmt::Debug for RenderedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sql = match self.sql.find(" PASSWORD ") {
            Some(idx) => format!("{} PASSWORD <redacted>", &self.sql[..idx]),
            None => self.sql.clone(),
        };
        f.debug_struct("RenderedStatement")
            .field("scope", &self.scope)
            .field("sql", &sql)
            .finish()
    }
}

/// Single-quoted SQL literal with embedded quotes doubled
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
