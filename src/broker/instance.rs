//! # Instance and Binding Model
//!
//! Typed views of lifecycle requests. Only the recognized parameter keys
//! (`database`, `username`, `password`) are read; anything else a caller
//! sends is ignored.

use serde::{Deserialize, Serialize};

use super::errors::{BrokerError, BrokerResult};
use super::identifier::IdentifierPolicy;

/// Lifecycle of one service instance database.
///
/// Only `Absent` and `Present` can be observed on the server; the other two
/// exist while an operation is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Absent,
    Creating,
    Present,
    Deleting,
}

impl InstanceState {
    /// Returns string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Absent => "absent",
            InstanceState::Creating => "creating",
            InstanceState::Present => "present",
            InstanceState::Deleting => "deleting",
        }
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters recognized on an instance request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceParameters {
    /// Database name override. Generated from the instance id when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

impl InstanceParameters {
    /// Parameters naming an explicit database
    pub fn with_database(database: impl Into<String>) -> Self {
        Self {
            database: Some(database.into()),
        }
    }

    /// Read from a raw request parameter map
    pub fn from_json(value: serde_json::Value) -> BrokerResult<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value).map_err(|e| BrokerError::InvalidParameters {
            message: e.to_string(),
        })
    }
}

/// Parameters recognized on a binding request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingParameters {
    /// Desired username. Generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Desired password. Generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Database of the bound instance, when it was created under an override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

impl BindingParameters {
    /// Parameters naming an explicit username
    pub fn with_username(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Default::default()
        }
    }

    /// Read from a raw request parameter map
    pub fn from_json(value: serde_json::Value) -> BrokerResult<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value).map_err(|e| BrokerError::InvalidParameters {
            message: e.to_string(),
        })
    }
}

/// One logical tenant database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub service_instance_id: String,
    pub service_definition_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub parameters: InstanceParameters,
}

impl ServiceInstance {
    /// Create an instance with no parameters
    pub fn new(
        service_instance_id: impl Into<String>,
        service_definition_id: impl Into<String>,
        plan_id: impl Into<String>,
    ) -> Self {
        Self {
            service_instance_id: service_instance_id.into(),
            service_definition_id: service_definition_id.into(),
            plan_id: plan_id.into(),
            parameters: InstanceParameters::default(),
        }
    }

    /// Set instance parameters
    pub fn with_parameters(mut self, parameters: InstanceParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Parameters with the database name filled in.
    ///
    /// The returned name is raw; it is sanitized where it is used.
    pub fn resolved_parameters(&self, policy: &IdentifierPolicy) -> BrokerResult<InstanceParameters> {
        match &self.parameters.database {
            Some(_) => Ok(self.parameters.clone()),
            None => {
                let database = policy.database_for_instance(&self.service_instance_id)?;
                Ok(InstanceParameters::with_database(database.into_string()))
            }
        }
    }
}

impl From<&CreateServiceInstanceRequest> for ServiceInstance {
    fn from(request: &CreateServiceInstanceRequest) -> Self {
        Self {
            service_instance_id: request.service_instance_id.clone(),
            service_definition_id: request.service_definition_id.clone(),
            plan_id: request.plan_id.clone(),
            parameters: request.parameters.clone(),
        }
    }
}

/// One set of credentials on a service instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBinding {
    pub binding_id: String,
    pub service_instance_id: String,
    #[serde(default)]
    pub parameters: BindingParameters,
}

impl ServiceBinding {
    /// Binding parameters with the username filled in from the binding id
    pub fn resolved_parameters(&self, policy: &IdentifierPolicy) -> BrokerResult<BindingParameters> {
        let mut parameters = self.parameters.clone();
        if parameters.username.is_none() {
            let username = policy.username_for_binding(&self.binding_id)?;
            parameters.username = Some(username.into_string());
        }
        Ok(parameters)
    }

    /// Instance parameters this binding targets
    pub fn instance_parameters(&self, policy: &IdentifierPolicy) -> BrokerResult<InstanceParameters> {
        match &self.parameters.database {
            Some(database) => Ok(InstanceParameters::with_database(database.clone())),
            None => {
                let database = policy.database_for_instance(&self.service_instance_id)?;
                Ok(InstanceParameters::with_database(database.into_string()))
            }
        }
    }
}

impl From<&CreateServiceInstanceBindingRequest> for ServiceBinding {
    fn from(request: &CreateServiceInstanceBindingRequest) -> Self {
        Self {
            binding_id: request.binding_id.clone(),
            service_instance_id: request.service_instance_id.clone(),
            parameters: request.parameters.clone(),
        }
    }
}

/// Request to provision a service instance
#[derive(Debug, Clone, Deserialize)]
pub struct CreateServiceInstanceRequest {
    pub service_instance_id: String,
    pub service_definition_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub parameters: InstanceParameters,
}

/// Response after provisioning a service instance
#[derive(Debug, Clone, Serialize)]
pub struct CreateServiceInstanceResponse {
    pub service_instance_id: String,
    pub database: String,
}

/// Request to de-provision a service instance
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteServiceInstanceRequest {
    pub service_instance_id: String,
    #[serde(default)]
    pub service_definition_id: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub parameters: InstanceParameters,
}

/// Request to bind credentials to a service instance
#[derive(Debug, Clone, Deserialize)]
pub struct CreateServiceInstanceBindingRequest {
    pub binding_id: String,
    pub service_instance_id: String,
    pub service_definition_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub parameters: BindingParameters,
}

/// Response after binding
#[derive(Debug, Clone, Serialize)]
pub struct CreateServiceInstanceBindingResponse {
    pub binding_id: String,
    pub credentials: std::collections::BTreeMap<String, String>,
}

/// Request to remove a binding
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteServiceInstanceBindingRequest {
    pub binding_id: String,
    pub service_instance_id: String,
    #[serde(default)]
    pub parameters: BindingParameters,
}

impl From<&DeleteServiceInstanceBindingRequest> for ServiceBinding {
    fn from(request: &DeleteServiceInstanceBindingRequest) -> Self {
        Self {
            binding_id: request.binding_id.clone(),
            service_instance_id: request.service_instance_id.clone(),
            parameters: request.parameters.clone(),
        }
    }
}

/// Request to read a service instance
#[derive(Debug, Clone, Deserialize)]
pub struct GetServiceInstanceRequest {
    pub service_instance_id: String,
    #[serde(default)]
    pub parameters: InstanceParameters,
}

/// Observed service instance
#[derive(Debug, Clone, Serialize)]
pub struct GetServiceInstanceResponse {
    pub service_instance_id: String,
    pub database: String,
    pub state: InstanceState,
}

/// Request to change the plan or parameters of a service instance
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateServiceInstanceRequest {
    pub service_instance_id: String,
    pub service_definition_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub parameters: InstanceParameters,
}

/// Response after updating a service instance
#[derive(Debug, Clone, Serialize)]
pub struct UpdateServiceInstanceResponse {
    pub service_instance_id: String,
    pub database: String,
}

/// Request to read a binding
#[derive(Debug, Clone, Deserialize)]
pub struct GetServiceInstanceBindingRequest {
    pub binding_id: String,
    pub service_instance_id: String,
    #[serde(default)]
    pub parameters: BindingParameters,
}

/// Observed binding. The password is never read back.
#[derive(Debug, Clone, Serialize)]
pub struct GetServiceInstanceBindingResponse {
    pub binding_id: String,
    pub username: String,
    pub database: String,
}

/// State of the last asynchronous operation on an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationState {
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "succeeded")]
    Succeeded,
    #[serde(rename = "failed")]
    Failed,
}

/// Request to poll the last operation on an instance
#[derive(Debug, Clone, Deserialize)]
pub struct GetLastServiceOperationRequest {
    pub service_instance_id: String,
    #[serde(default)]
    pub operation: Option<String>,
}

/// Last operation result
#[derive(Debug, Clone, Serialize)]
pub struct GetLastServiceOperationResponse {
    pub state: OperationState,
    pub description: String,
}
