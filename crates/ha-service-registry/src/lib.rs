//! Service registry with async handlers
//!
//! Services are how users and automations command entities
//! (`light.turn_on`, `cover.close_cover`) and integrations
//! (`rflink.send_command`). A service may carry a JSON schema; call data is
//! validated against it before the handler runs, so a malformed call is
//! rejected without any side effect.

use dashmap::DashMap;
use ha_core::{Context, ServiceCall};
use jsonschema::JSONSchema;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Result type for service calls
pub type ServiceResult = Result<(), ServiceError>;

/// Future type for async service handlers
pub type ServiceFuture = Pin<Box<dyn Future<Output = ServiceResult> + Send>>;

/// Service handler function type
pub type ServiceHandler = Arc<dyn Fn(ServiceCall) -> ServiceFuture + Send + Sync>;

/// Errors that can occur when working with services
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("service not found: {domain}.{service}")]
    NotFound { domain: String, service: String },

    #[error("service call failed: {0}")]
    CallFailed(String),

    #[error("invalid service data: {0}")]
    InvalidData(String),

    #[error("invalid schema for {service}: {reason}")]
    InvalidSchema { service: String, reason: String },
}

/// Information about a registered service
#[derive(Debug, Clone)]
pub struct ServiceDescription {
    pub domain: String,
    pub service: String,
    pub description: Option<String>,
    /// JSON schema the call data must satisfy
    pub schema: Option<serde_json::Value>,
}

struct RegisteredService {
    handler: ServiceHandler,
    validator: Option<Arc<JSONSchema>>,
    description: ServiceDescription,
}

/// The service registry manages all registered services
pub struct ServiceRegistry {
    /// Services indexed by "domain.service" key
    services: DashMap<String, RegisteredService>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
        }
    }

    /// Register a service, replacing any previous handler under the same name
    ///
    /// Fails only when the supplied schema does not compile.
    #[instrument(skip(self, description, handler), fields(domain = %description.domain, service = %description.service))]
    pub fn register<F, Fut>(
        &self,
        description: ServiceDescription,
        handler: F,
    ) -> Result<(), ServiceError>
    where
        F: Fn(ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        let key = format!("{}.{}", description.domain, description.service);

        let validator = match &description.schema {
            Some(schema) => Some(Arc::new(JSONSchema::compile(schema).map_err(|e| {
                ServiceError::InvalidSchema {
                    service: key.clone(),
                    reason: e.to_string(),
                }
            })?)),
            None => None,
        };

        debug!("Registering service");

        let handler: ServiceHandler =
            Arc::new(move |call| Box::pin(handler(call)) as ServiceFuture);

        self.services.insert(
            key,
            RegisteredService {
                handler,
                validator,
                description,
            },
        );
        Ok(())
    }

    /// Call a service
    ///
    /// Validates `service_data` against the registered schema, then awaits the
    /// handler. Handler errors are returned to the caller unchanged.
    #[instrument(skip(self, service_data, context))]
    pub async fn call(
        &self,
        domain: &str,
        service: &str,
        service_data: serde_json::Value,
        context: Context,
    ) -> ServiceResult {
        let key = format!("{}.{}", domain, service);

        let (handler, validator) = {
            let registered = self.services.get(&key).ok_or_else(|| {
                warn!("Service not found");
                ServiceError::NotFound {
                    domain: domain.to_string(),
                    service: service.to_string(),
                }
            })?;
            (registered.handler.clone(), registered.validator.clone())
        };

        if let Some(validator) = validator {
            if let Err(errors) = validator.validate(&service_data) {
                let reasons: Vec<String> = errors.map(|e| e.to_string()).collect();
                return Err(ServiceError::InvalidData(reasons.join("; ")));
            }
        }

        debug!("Calling service");
        handler(ServiceCall::new(domain, service, service_data, context)).await
    }

    pub fn has_service(&self, domain: &str, service: &str) -> bool {
        self.services.contains_key(&format!("{}.{}", domain, service))
    }

    /// All registered services grouped by domain
    pub fn all_services(&self) -> HashMap<String, Vec<ServiceDescription>> {
        let mut result: HashMap<String, Vec<ServiceDescription>> = HashMap::new();
        for entry in self.services.iter() {
            result
                .entry(entry.description.domain.clone())
                .or_default()
                .push(entry.description.clone());
        }
        result
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe wrapper for ServiceRegistry
pub type SharedServiceRegistry = Arc<ServiceRegistry>;
