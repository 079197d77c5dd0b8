//! Service broker lifecycle
//!
//! Maps broker requests onto the provisioning engine. Requests are checked
//! against the configured catalog before anything touches the server.
//! Every operation completes before it returns, so the last operation on an
//! instance is always finished.

use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::connection::AdministrativeConnection;
use super::errors::{BrokerError, BrokerResult};
use super::identifier::SafeIdentifier;
use super::instance::{
    CreateServiceInstanceBindingRequest, CreateServiceInstanceBindingResponse,
    CreateServiceInstanceRequest, CreateServiceInstanceResponse, DeleteServiceInstanceBindingRequest,
    DeleteServiceInstanceRequest, GetLastServiceOperationRequest, GetLastServiceOperationResponse,
    GetServiceInstanceBindingRequest, GetServiceInstanceBindingResponse, GetServiceInstanceRequest,
    GetServiceInstanceResponse, InstanceParameters, OperationState, ServiceBinding,
    ServiceInstance, UpdateServiceInstanceRequest, UpdateServiceInstanceResponse,
};
use super::provisioning::ProvisioningService;
use crate::config::{BrokerConfig, CatalogConfig};

/// Broker front end over the provisioning engine
#[derive(Clone)]
pub struct ServiceBroker {
    provisioning: ProvisioningService,
    catalog: CatalogConfig,
}

impl ServiceBroker {
    pub fn new(provisioning: ProvisioningService, catalog: CatalogConfig) -> Self {
        Self { provisioning, catalog }
    }

    /// Build a broker with the policies and catalog from `config`
    pub fn from_config(connection: Arc<dyn AdministrativeConnection>, config: &BrokerConfig) -> Self {
        let provisioning = ProvisioningService::with_policies(
            connection,
            config.identifier_policy(),
            config.credential_policy(),
        );
        Self::new(provisioning, config.catalog.clone())
    }

    pub fn provisioning(&self) -> &ProvisioningService {
        &self.provisioning
    }

    pub fn catalog(&self) -> &CatalogConfig {
        &self.catalog
    }

    fn check_catalog(&self, service_id: &str, plan_id: &str) -> BrokerResult<()> {
        if service_id != self.catalog.service_id {
            return Err(BrokerError::UnknownServiceDefinition {
                service_id: service_id.to_string(),
            });
        }
        if self.catalog.plan(plan_id).is_none() {
            return Err(BrokerError::UnknownPlan {
                plan_id: plan_id.to_string(),
            });
        }
        Ok(())
    }

    fn database_name(&self, instance_id: &str, parameters: &InstanceParameters) -> BrokerResult<String> {
        match &parameters.database {
            Some(database) => Ok(database.clone()),
            None => Ok(self
                .provisioning
                .identifier_policy()
                .database_for_instance(instance_id)?
                .into_string()),
        }
    }

    /// Provision a service instance
    #[instrument(skip_all, fields(instance = %request.service_instance_id))]
    pub async fn create_instance(
        &self,
        request: &CreateServiceInstanceRequest,
    ) -> BrokerResult<CreateServiceInstanceResponse> {
        self.check_catalog(&request.service_definition_id, &request.plan_id)?;

        let instance = ServiceInstance::from(request);
        let database = self.provisioning.create_database(&instance).await?;

        info!(database = %database, "service instance provisioned");
        Ok(CreateServiceInstanceResponse {
            service_instance_id: instance.service_instance_id,
            database: database.into_string(),
        })
    }

    /// Deprovision a service instance
    #[instrument(skip_all, fields(instance = %request.service_instance_id))]
    pub async fn delete_instance(&self, request: &DeleteServiceInstanceRequest) -> BrokerResult<()> {
        if let (Some(service_id), Some(plan_id)) = (&request.service_definition_id, &request.plan_id) {
            self.check_catalog(service_id, plan_id)?;
        }

        let database = self.database_name(&request.service_instance_id, &request.parameters)?;
        if request.parameters.database.is_none()
            && !self.provisioning.check_database_exists(&database).await?
        {
            warn!(
                database = %database,
                "no database under the generated name; an instance created with a database parameter needs it on delete"
            );
        }
        self.provisioning.delete_database(&database).await?;

        info!("service instance deprovisioned");
        Ok(())
    }

    /// Read the resolved database and its observed state
    #[instrument(skip_all, fields(instance = %request.service_instance_id))]
    pub async fn get_instance(
        &self,
        request: &GetServiceInstanceRequest,
    ) -> BrokerResult<GetServiceInstanceResponse> {
        let database = self.database_name(&request.service_instance_id, &request.parameters)?;
        let state = self.provisioning.instance_state(&database).await?;
        Ok(GetServiceInstanceResponse {
            service_instance_id: request.service_instance_id.clone(),
            database,
            state,
        })
    }

    /// Change the plan of an existing instance.
    ///
    /// All plans live on the same server, so only the catalog check applies.
    /// A `database` parameter must name the instance's existing database;
    /// databases are never renamed.
    #[instrument(skip_all, fields(instance = %request.service_instance_id))]
    pub async fn update_instance(
        &self,
        request: &UpdateServiceInstanceRequest,
    ) -> BrokerResult<UpdateServiceInstanceResponse> {
        self.check_catalog(&request.service_definition_id, &request.plan_id)?;

        let database = self.database_name(&request.service_instance_id, &request.parameters)?;
        if !self.provisioning.check_database_exists(&database).await? {
            return Err(match request.parameters.database {
                Some(_) => BrokerError::InvalidParameters {
                    message: format!("database '{}' does not exist; databases cannot be renamed", database),
                },
                None => BrokerError::InstanceNotFound {
                    service_instance_id: request.service_instance_id.clone(),
                },
            });
        }

        info!(plan = %request.plan_id, "service instance updated");
        Ok(UpdateServiceInstanceResponse {
            service_instance_id: request.service_instance_id.clone(),
            database,
        })
    }

    /// Report the last operation on an instance
    pub async fn last_operation(
        &self,
        request: &GetLastServiceOperationRequest,
    ) -> BrokerResult<GetLastServiceOperationResponse> {
        let database = self.database_name(&request.service_instance_id, &InstanceParameters::default())?;
        let state = self.provisioning.instance_state(&database).await?;
        let operation = request.operation.as_deref().unwrap_or("last operation");
        Ok(GetLastServiceOperationResponse {
            state: OperationState::Succeeded,
            description: format!("{} completed; database {}", operation, state),
        })
    }

    /// Create credentials on an existing service instance
    #[instrument(skip_all, fields(instance = %request.service_instance_id, binding = %request.binding_id))]
    pub async fn create_binding(
        &self,
        request: &CreateServiceInstanceBindingRequest,
    ) -> BrokerResult<CreateServiceInstanceBindingResponse> {
        self.check_catalog(&request.service_definition_id, &request.plan_id)?;

        let binding = ServiceBinding::from(request);
        let policy = self.provisioning.identifier_policy();
        let instance_parameters = binding.instance_parameters(policy)?;
        let binding_parameters = binding.resolved_parameters(policy)?;

        let database = instance_parameters.database.as_deref().unwrap_or_default();
        if !self.provisioning.check_database_exists(database).await? {
            return Err(BrokerError::InstanceNotFound {
                service_instance_id: request.service_instance_id.clone(),
            });
        }

        let credentials = self
            .provisioning
            .create_user_creds(&instance_parameters, Some(&binding_parameters))
            .await?;

        info!(user = %credentials.username, "binding created");
        Ok(CreateServiceInstanceBindingResponse {
            binding_id: binding.binding_id,
            credentials: credentials.to_map(),
        })
    }

    /// Remove the credentials of a binding
    #[instrument(skip_all, fields(instance = %request.service_instance_id, binding = %request.binding_id))]
    pub async fn delete_binding(&self, request: &DeleteServiceInstanceBindingRequest) -> BrokerResult<()> {
        let binding = ServiceBinding::from(request);
        let (username, database) = self.binding_target(&binding)?;

        if request.parameters.username.is_none()
            && !self
                .provisioning
                .check_user_exists(username.as_str(), database.as_str())
                .await?
        {
            warn!(
                user = %username,
                database = %database,
                "no user under the generated name; a binding created with a username parameter needs it on delete"
            );
        }
        self.provisioning
            .delete_user_creds(username.as_str(), database.as_str())
            .await?;

        info!("binding deleted");
        Ok(())
    }

    /// Read the username and database of a binding
    #[instrument(skip_all, fields(instance = %request.service_instance_id, binding = %request.binding_id))]
    pub async fn get_binding(
        &self,
        request: &GetServiceInstanceBindingRequest,
    ) -> BrokerResult<GetServiceInstanceBindingResponse> {
        let binding = ServiceBinding {
            binding_id: request.binding_id.clone(),
            service_instance_id: request.service_instance_id.clone(),
            parameters: request.parameters.clone(),
        };
        let (username, database) = self.binding_target(&binding)?;

        if !self
            .provisioning
            .check_user_exists(username.as_str(), database.as_str())
            .await?
        {
            return Err(BrokerError::BindingNotFound {
                binding_id: request.binding_id.clone(),
            });
        }

        Ok(GetServiceInstanceBindingResponse {
            binding_id: request.binding_id.clone(),
            username: username.into_string(),
            database: database.into_string(),
        })
    }

    /// Whether the instance's database exists
    pub async fn instance_exists(
        &self,
        service_instance_id: &str,
        parameters: &InstanceParameters,
    ) -> BrokerResult<bool> {
        let database = self.database_name(service_instance_id, parameters)?;
        self.provisioning.check_database_exists(&database).await
    }

    /// Whether the binding's user exists within the instance's database
    pub async fn binding_exists(&self, binding: &ServiceBinding) -> BrokerResult<bool> {
        let (username, database) = self.binding_target(binding)?;
        self.provisioning
            .check_user_exists(username.as_str(), database.as_str())
            .await
    }

    fn binding_target(&self, binding: &ServiceBinding) -> BrokerResult<(SafeIdentifier, SafeIdentifier)> {
        let policy = self.provisioning.identifier_policy();
        let database = binding.instance_parameters(policy)?.database.unwrap_or_default();
        let username = binding.resolved_parameters(policy)?.username.unwrap_or_default();
        Ok((
            policy.sanitize("username", &username)?,
            policy.sanitize("database", &database)?,
        ))
    }
}
