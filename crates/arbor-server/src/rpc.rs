//! Signed RPC endpoint wiring.
//!
//! Installs `{prefix}/rpc/module:(.+)/service:(.+)` on a router: a POST
//! interceptor rejects calls to modules this process does not host, and
//! the POST handler verifies the timestamped signature before dispatching
//! into the registry. JSON results ride the standard envelope; binary
//! results go out as `application/octet-stream`.

use arbor_http::{Error, Outcome, Result};
use arbor_routing::{handler, interceptor, Router};
use arbor_rpc::{as_binary, ModuleRegistry, SignedChannel};
use hyper::{Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;

/// Expose the registry's services over the signed channel.
pub fn register_rpc(
	router: &mut Router,
	registry: Arc<ModuleRegistry>,
	channel: Arc<SignedChannel>,
	prefix: Option<&str>,
) -> Result<()> {
	let path = format!(
		"{}/rpc/module:(.+)/service:(.+)",
		prefix.unwrap_or_default()
	);
	router.make_end(&path)?;

	let known = registry.clone();
	router.intercept(
		&path,
		&[Method::POST],
		interceptor(move |ctx| {
			let known = known.clone();
			let module = first_param(ctx, "module");
			Box::pin(async move {
				if !known.exists(&module) {
					return Ok(Some(format!("service call, {module} not exists")));
				}
				Ok(None)
			})
		}),
	)?;

	router.post(
		&path,
		handler(move |ctx| {
			let registry = registry.clone();
			let channel = channel.clone();
			Box::pin(async move {
				let module = first_param(ctx, "module");
				let service = first_param(ctx, "service");
				if module.is_empty() || service.is_empty() {
					return Err(Error::handler("module and service is required"));
				}

				let timestamp: i64 = header(ctx, "x-timestamp")
					.parse()
					.map_err(Error::handler)?;
				let sign = header(ctx, "x-sign");

				let body = ctx.read_body().await?;
				let args: Vec<Value> = if body.is_empty() {
					Vec::new()
				} else {
					serde_json::from_slice(&body).map_err(Error::handler)?
				};

				let result = channel
					.receive(&registry, &module, &service, args, timestamp, &sign)
					.await?;

				if let Some(bytes) = as_binary(&result) {
					return Ok(Outcome::Raw {
						status: StatusCode::OK,
						reason: "OK".to_string(),
						body: bytes,
						content_type: Some("application/octet-stream".to_string()),
					});
				}
				Ok(Outcome::Json(result))
			})
		}),
	)?;

	Ok(())
}

fn first_param(ctx: &arbor_http::Context, name: &str) -> String {
	ctx.params
		.get(name)
		.and_then(|p| p.first())
		.cloned()
		.unwrap_or_default()
}

fn header(ctx: &arbor_http::Context, name: &str) -> String {
	ctx.headers
		.get(name)
		.and_then(|v| v.to_str().ok())
		.unwrap_or_default()
		.to_string()
}
