//! CLI command implementations
//!
//! Every command produces one JSON document. The binary writes it to stdout,
//! and failures to stderr as an [`ErrorResponse`].
//!
//! [`ErrorResponse`]: crate::broker::errors::ErrorResponse

use serde_json::{json, Value};
use std::sync::Arc;

use crate::broker::errors::{BrokerError, BrokerResult};
use crate::broker::identifier::clean;
use crate::broker::instance::{
    BindingParameters, CreateServiceInstanceBindingRequest, CreateServiceInstanceRequest,
    DeleteServiceInstanceBindingRequest, DeleteServiceInstanceRequest, InstanceParameters,
    ServiceBinding,
};
use crate::broker::lifecycle::ServiceBroker;
use crate::broker::postgres::PostgresConnection;
use crate::config::BrokerConfig;

use super::args::{Cli, Command};

/// Main CLI entry point. Returns the response document.
pub async fn run() -> BrokerResult<Value> {
    let cli = Cli::parse_args();
    let config = match &cli.config {
        Some(path) => BrokerConfig::load(path)?,
        None => BrokerConfig::default(),
    };

    if cli.command.needs_connection() {
        let connection =
            PostgresConnection::with_pool_config(&config.postgres.url, config.pool_config()).await?;
        let broker = ServiceBroker::from_config(Arc::new(connection), &config);
        run_command(cli.command, &broker).await
    } else {
        run_command_offline(cli.command)
    }
}

/// Commands that need no server
pub fn run_command_offline(cmd: Command) -> BrokerResult<Value> {
    match cmd {
        Command::Clean { value } => Ok(json!({ "value": clean(Some(&value)) })),
        other => Err(BrokerError::ConfigError {
            message: format!("{} requires a database connection", other.name()),
        }),
    }
}

/// Run a command against a broker
pub async fn run_command(cmd: Command, broker: &ServiceBroker) -> BrokerResult<Value> {
    match cmd {
        Command::CreateInstance {
            instance_id,
            service_id,
            plan_id,
            database,
        } => {
            let (service_definition_id, plan_id) = catalog_ids(broker, service_id, plan_id);
            let request = CreateServiceInstanceRequest {
                service_instance_id: instance_id,
                service_definition_id,
                plan_id,
                parameters: InstanceParameters { database },
            };
            let response = broker.create_instance(&request).await?;
            Ok(json!({
                "service_instance_id": response.service_instance_id,
                "database": response.database,
            }))
        }

        Command::DeleteInstance { instance_id, database } => {
            let request = DeleteServiceInstanceRequest {
                service_instance_id: instance_id.clone(),
                service_definition_id: None,
                plan_id: None,
                parameters: InstanceParameters { database },
            };
            broker.delete_instance(&request).await?;
            Ok(json!({ "service_instance_id": instance_id, "deleted": true }))
        }

        Command::Bind {
            instance_id,
            binding_id,
            service_id,
            plan_id,
            username,
            password,
            database,
        } => {
            let (service_definition_id, plan_id) = catalog_ids(broker, service_id, plan_id);
            let request = CreateServiceInstanceBindingRequest {
                binding_id,
                service_instance_id: instance_id,
                service_definition_id,
                plan_id,
                parameters: BindingParameters {
                    username,
                    password,
                    database,
                },
            };
            let response = broker.create_binding(&request).await?;
            Ok(json!({
                "binding_id": response.binding_id,
                "credentials": response.credentials,
            }))
        }

        Command::Unbind {
            instance_id,
            binding_id,
            username,
            database,
        } => {
            let request = DeleteServiceInstanceBindingRequest {
                binding_id: binding_id.clone(),
                service_instance_id: instance_id,
                parameters: BindingParameters {
                    username,
                    password: None,
                    database,
                },
            };
            broker.delete_binding(&request).await?;
            Ok(json!({ "binding_id": binding_id, "deleted": true }))
        }

        Command::Exists {
            instance_id,
            binding_id,
            username,
            database,
        } => {
            let instance = broker
                .instance_exists(
                    &instance_id,
                    &InstanceParameters {
                        database: database.clone(),
                    },
                )
                .await?;

            let mut response = json!({
                "service_instance_id": instance_id,
                "instance_exists": instance,
            });
            if let Some(binding_id) = binding_id {
                let binding = ServiceBinding {
                    binding_id: binding_id.clone(),
                    service_instance_id: instance_id,
                    parameters: BindingParameters {
                        username,
                        password: None,
                        database,
                    },
                };
                response["binding_id"] = json!(binding_id);
                response["binding_exists"] = json!(broker.binding_exists(&binding).await?);
            }
            Ok(response)
        }

        Command::Clean { value } => Ok(json!({ "value": clean(Some(&value)) })),
    }
}

fn catalog_ids(
    broker: &ServiceBroker,
    service_id: Option<String>,
    plan_id: Option<String>,
) -> (String, String) {
    let catalog = broker.catalog();
    let service_id = service_id.unwrap_or_else(|| catalog.service_id.clone());
    let plan_id = plan_id
        .or_else(|| catalog.plans.first().map(|p| p.id.clone()))
        .unwrap_or_default();
    (service_id, plan_id)
}
