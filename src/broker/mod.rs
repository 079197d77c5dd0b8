//! # Broker Module
//!
//! Provisions tenant databases and per-binding credentials on a shared
//! database server.
//!
//! ## Components
//!
//! - `identifier`: Identifier sanitizing and generated names
//! - `credentials`: Password generation and credential maps
//! - `instance`: Service instance and binding models, broker requests
//! - `statement`: Administrative statement set and its PostgreSQL rendering
//! - `connection`: Administrative connection trait and in-memory catalog
//! - `postgres`: PostgreSQL administrative connection
//! - `provisioning`: Idempotent create/delete state engine
//! - `lifecycle`: Broker requests mapped onto the engine
//! - `errors`: Broker errors
//!
//! ## Guarantees
//!
//! 1. Every identifier reaching a statement has passed the sanitizer
//! 2. Create and delete operations converge when repeated
//! 3. A bound user holds privileges on its own database only

pub mod connection;
pub mod credentials;
pub mod errors;
pub mod identifier;
pub mod instance;
pub mod lifecycle;
pub mod postgres;
pub mod provisioning;
pub mod statement;

pub use connection::*;
pub use credentials::{CredentialPolicy, Credentials};
pub use errors::*;
pub use identifier::{clean, IdentifierPolicy, SafeIdentifier};
pub use instance::*;
pub use lifecycle::ServiceBroker;
pub use postgres::{PoolConfig, PostgresConnection};
pub use provisioning::ProvisioningService;
pub use statement::{AdminStatement, Password};
