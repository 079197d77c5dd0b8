//! dbbroker - database-per-tenant service broker
//!
//! Provisions databases and least-privilege credentials on a shared
//! PostgreSQL server for service instances and bindings.

pub mod broker;
pub mod cli;
pub mod config;
