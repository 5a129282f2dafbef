//! RPC error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
	/// Signature mismatch or a timestamp outside the replay window.
	#[error("invalid sign or timestamp")]
	InvalidSignature,

	/// The named module is not registered in this process.
	#[error("module not found: {0}")]
	ModuleNotFound(String),

	/// The module exists but exposes no such service.
	#[error("service call, {module}.{service} not exists")]
	ServiceNotFound { module: String, service: String },

	/// The remote side answered with a non-zero envelope code.
	#[error("remote call failed: {0}")]
	Remote(String),

	/// The transport itself failed.
	#[error("rpc transport failure: {0}")]
	Transport(String),

	/// A request or response body could not be encoded or decoded.
	#[error("rpc codec failure: {0}")]
	Codec(String),

	/// A remote call was attempted without a configured channel.
	#[error("no rpc config, {0}")]
	NotConfigured(String),

	/// The called service itself failed.
	#[error("service failed: {0}")]
	Service(String),
}

impl From<reqwest::Error> for RpcError {
	fn from(err: reqwest::Error) -> Self {
		RpcError::Transport(err.to_string())
	}
}

impl From<serde_json::Error> for RpcError {
	fn from(err: serde_json::Error) -> Self {
		RpcError::Codec(err.to_string())
	}
}

impl From<RpcError> for arbor_http::Error {
	fn from(err: RpcError) -> Self {
		match err {
			RpcError::ModuleNotFound(module) => arbor_http::Error::ModuleNotFound(module),
			other => arbor_http::Error::Rpc(other.to_string()),
		}
	}
}
