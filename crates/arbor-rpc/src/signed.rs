//! Signed HTTP channel.
//!
//! Every call carries an `x-timestamp` and an `x-sign` header; the sign
//! is the hex SHA-256 digest of `module ‖ service ‖ timestamp ‖ key`.
//! The receiving side recomputes the digest and rejects calls whose
//! timestamp falls outside the replay window, so a captured request
//! cannot be replayed later.

use crate::channel::RpcChannel;
use crate::error::RpcError;
use crate::registry::ModuleRegistry;
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Maximum accepted clock skew between signer and verifier.
pub const REPLAY_WINDOW_MS: i64 = 30_000;

/// Calls slower than this are logged.
const SLOW_CALL_MS: u128 = 1_000;

/// Connection settings of the signed channel, as handed in by the
/// bootstrap configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SignedConfig {
	/// Base url of the remote peer, without the `/rpc` suffix.
	pub url: String,
	/// Optional `host` header override for peers behind a shared gateway.
	pub host: Option<String>,
	/// Shared signing secret.
	pub key: String,
}

/// Hex SHA-256 digest of `module ‖ service ‖ timestamp ‖ key`.
pub fn sign(module: &str, service: &str, timestamp: i64, key: &str) -> String {
	let mut hasher = Sha256::new();
	hasher.update(module.as_bytes());
	hasher.update(service.as_bytes());
	hasher.update(timestamp.to_string().as_bytes());
	hasher.update(key.as_bytes());
	hex::encode(hasher.finalize())
}

/// Milliseconds since the unix epoch.
pub fn now_millis() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis() as i64)
		.unwrap_or(0)
}

pub struct SignedChannel {
	config: SignedConfig,
	client: reqwest::Client,
}

impl SignedChannel {
	pub fn new(config: SignedConfig) -> Self {
		Self {
			config,
			client: reqwest::Client::new(),
		}
	}

	/// Verify an inbound call and run it against the local registry.
	pub async fn receive(
		&self,
		registry: &ModuleRegistry,
		module: &str,
		service: &str,
		args: Vec<Value>,
		timestamp: i64,
		sign_header: &str,
	) -> Result<Value, RpcError> {
		let expected = sign(module, service, timestamp, &self.config.key);
		if expected != sign_header || (now_millis() - timestamp).abs() > REPLAY_WINDOW_MS {
			return Err(RpcError::InvalidSignature);
		}

		registry.service_call(module, service, args).await
	}
}

#[async_trait]
impl RpcChannel for SignedChannel {
	async fn send(&self, module: &str, service: &str, args: &[Value]) -> Result<Value, RpcError> {
		if self.config.key.is_empty() {
			return Err(RpcError::NotConfigured(format!("{module}, {service}")));
		}

		let now = now_millis();
		let sign = sign(module, service, now, &self.config.key);
		let url = format!(
			"{}/rpc/{}/{}",
			self.config.url,
			utf8_percent_encode(module, NON_ALPHANUMERIC),
			utf8_percent_encode(service, NON_ALPHANUMERIC),
		);

		let mut request = self
			.client
			.post(&url)
			.header("x-timestamp", now.to_string())
			.header("x-sign", sign)
			.json(args);
		if let Some(host) = &self.config.host {
			request = request.header(reqwest::header::HOST, host);
		}

		let started = Instant::now();
		let response = request.send().await?;
		let elapsed = started.elapsed().as_millis();
		if elapsed > SLOW_CALL_MS {
			tracing::warn!(module, service, elapsed_ms = %elapsed, "rpc spend too much time");
		}

		let binary = response
			.headers()
			.get(reqwest::header::CONTENT_TYPE)
			.and_then(|v| v.to_str().ok())
			.map(|v| v.starts_with("application/octet-stream"))
			.unwrap_or(false);
		if binary {
			let body = response.bytes().await?;
			return Ok(crate::channel::binary_value(&body));
		}

		let mut envelope: Value = response.json().await?;
		let code = envelope
			.get("code")
			.and_then(Value::as_i64)
			.ok_or_else(|| RpcError::Codec("missing envelope code".to_string()))?;
		if code != 0 {
			let msg = envelope
				.get("msg")
				.and_then(Value::as_str)
				.unwrap_or("-")
				.to_string();
			return Err(RpcError::Remote(msg));
		}

		Ok(envelope
			.get_mut("result")
			.map(Value::take)
			.unwrap_or(Value::Null))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::registry::{service_fn, ModuleDescriptor};
	use serde_json::json;

	fn channel(key: &str) -> SignedChannel {
		SignedChannel::new(SignedConfig {
			url: "http://127.0.0.1:0".to_string(),
			host: None,
			key: key.to_string(),
		})
	}

	fn registry() -> ModuleRegistry {
		let mut registry = ModuleRegistry::new();
		registry.register(ModuleDescriptor::new("shop").service(
			"total",
			1,
			service_fn(|args| {
				Box::pin(async move {
					let n = args.first().and_then(Value::as_i64).unwrap_or(0);
					Ok(json!(n * 2))
				})
			}),
		));
		registry
	}

	#[test]
	fn sign_is_stable_and_key_sensitive() {
		let a = sign("shop", "total", 1_700_000_000_000, "secret");
		let b = sign("shop", "total", 1_700_000_000_000, "secret");
		let c = sign("shop", "total", 1_700_000_000_000, "other");
		assert_eq!(a, b);
		assert_ne!(a, c);
		assert_eq!(a.len(), 64);
	}

	#[tokio::test]
	async fn receive_accepts_a_fresh_signed_call() {
		let channel = channel("secret");
		let registry = registry();

		let ts = now_millis() - 29_000;
		let sig = sign("shop", "total", ts, "secret");
		let out = channel
			.receive(&registry, "shop", "total", vec![json!(21)], ts, &sig)
			.await
			.unwrap();
		assert_eq!(out, json!(42));
	}

	#[tokio::test]
	async fn receive_rejects_a_stale_timestamp() {
		let channel = channel("secret");
		let registry = registry();

		let ts = now_millis() - 31_000;
		let sig = sign("shop", "total", ts, "secret");
		assert!(matches!(
			channel
				.receive(&registry, "shop", "total", vec![json!(21)], ts, &sig)
				.await,
			Err(RpcError::InvalidSignature)
		));
	}

	#[tokio::test]
	async fn receive_rejects_a_forged_sign() {
		let channel = channel("secret");
		let registry = registry();

		let ts = now_millis();
		let sig = sign("shop", "total", ts, "wrong-key");
		assert!(matches!(
			channel
				.receive(&registry, "shop", "total", vec![json!(21)], ts, &sig)
				.await,
			Err(RpcError::InvalidSignature)
		));
	}

	#[tokio::test]
	async fn send_without_key_is_refused() {
		let channel = channel("");
		assert!(matches!(
			channel.send("shop", "total", &[]).await,
			Err(RpcError::NotConfigured(_))
		));
	}
}
