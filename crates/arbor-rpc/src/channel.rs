//! Transport abstraction for remote service calls.

use crate::error::RpcError;
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use serde_json::{json, Value};

/// A way to reach a module that lives in another process.
#[async_trait]
pub trait RpcChannel: Send + Sync {
	/// Call `module.service(args)` remotely and return its result.
	async fn send(&self, module: &str, service: &str, args: &[Value]) -> Result<Value, RpcError>;
}

const BINARY_KEY: &str = "$binary";

/// Wrap raw bytes so they survive the JSON wire as a tagged value.
pub fn binary_value(bytes: &[u8]) -> Value {
	json!({ BINARY_KEY: base64::engine::general_purpose::STANDARD.encode(bytes) })
}

/// Unwrap a [`binary_value`], if `value` is one.
pub fn as_binary(value: &Value) -> Option<Bytes> {
	let encoded = value.get(BINARY_KEY)?.as_str()?;
	base64::engine::general_purpose::STANDARD
		.decode(encoded)
		.ok()
		.map(Bytes::from)
}
