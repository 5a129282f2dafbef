//! Module and service registry.
//!
//! A module is a named bag of services; a service is an async function
//! from a JSON argument list to a JSON result. The registry is assembled
//! during boot and shared read-only behind an `Arc` afterwards, exactly
//! like the path tree.

use crate::channel::RpcChannel;
use crate::error::RpcError;
use arbor_http::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// One registered service implementation.
pub type ServiceFn =
	Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;

/// Pin down the closure signature for a [`ServiceFn`].
pub fn service_fn<F>(f: F) -> ServiceFn
where
	F: Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync + 'static,
{
	Arc::new(f)
}

struct Service {
	call: ServiceFn,
	/// Declared argument count, used when synthesizing a wire schema.
	arity: usize,
}

/// A named module and its services.
pub struct ModuleDescriptor {
	name: String,
	services: HashMap<String, Service>,
}

impl ModuleDescriptor {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			services: HashMap::new(),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Add a service taking `arity` positional arguments.
	pub fn service(mut self, name: impl Into<String>, arity: usize, call: ServiceFn) -> Self {
		self.services.insert(name.into(), Service { call, arity });
		self
	}

	/// Registered services and their declared arities.
	pub fn services(&self) -> impl Iterator<Item = (&str, usize)> {
		self.services.iter().map(|(name, s)| (name.as_str(), s.arity))
	}
}

/// All modules known to this process.
#[derive(Default)]
pub struct ModuleRegistry {
	modules: HashMap<String, ModuleDescriptor>,
}

impl ModuleRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, module: ModuleDescriptor) -> &mut Self {
		self.modules.insert(module.name.clone(), module);
		self
	}

	pub fn exists(&self, module: &str) -> bool {
		self.modules.contains_key(module)
	}

	pub fn module(&self, name: &str) -> Option<&ModuleDescriptor> {
		self.modules.get(name)
	}

	pub fn modules(&self) -> impl Iterator<Item = &ModuleDescriptor> {
		self.modules.values()
	}

	/// Invoke a local service.
	pub async fn service_call(
		&self,
		module: &str,
		service: &str,
		args: Vec<Value>,
	) -> Result<Value, RpcError> {
		let descriptor = self
			.modules
			.get(module)
			.ok_or_else(|| RpcError::ModuleNotFound(module.to_string()))?;
		let found = descriptor
			.services
			.get(service)
			.ok_or_else(|| RpcError::ServiceNotFound {
				module: module.to_string(),
				service: service.to_string(),
			})?;

		(found.call)(args).await.map_err(|err| {
			tracing::error!(module, service, error = %err, "service call failed");
			err
		})
	}
}

/// Dispatches `module.service(args)` locally when possible, remotely via
/// the configured channel otherwise.
#[derive(Clone)]
pub struct ServiceCaller {
	registry: Arc<ModuleRegistry>,
	channel: Option<Arc<dyn RpcChannel>>,
}

impl ServiceCaller {
	pub fn new(registry: Arc<ModuleRegistry>, channel: Option<Arc<dyn RpcChannel>>) -> Self {
		Self { registry, channel }
	}

	pub fn registry(&self) -> &Arc<ModuleRegistry> {
		&self.registry
	}

	pub async fn call(
		&self,
		module: &str,
		service: &str,
		args: Vec<Value>,
	) -> Result<Value, RpcError> {
		if self.registry.exists(module) {
			return self.registry.service_call(module, service, args).await;
		}

		match &self.channel {
			Some(channel) => channel.send(module, service, &args).await,
			None => Err(RpcError::NotConfigured(format!("{module}, {service}"))),
		}
	}
}
