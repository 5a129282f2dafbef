//! Shared error type for the arbor runtime.
//!
//! Structural errors (duplicate paths, unknown link targets, non-terminal
//! handler bindings) are raised at registration time and are fatal to
//! startup. Request-time failures (interception, normalization, handler
//! errors) flow to the router's per-request error hook instead of crashing
//! the process.

use thiserror::Error;

/// Result alias used across all arbor crates.
pub type Result<T> = std::result::Result<T, Error>;

/// Runtime error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
	/// The exact path already exists in the tree.
	#[error("path already exists: {0}")]
	DuplicatePath(String),

	/// A path (or alias target) does not exist.
	#[error("path does not exist: {0}")]
	UnknownPath(String),

	/// An empty path string was given where a path is required.
	#[error("path can not be empty")]
	EmptyPath,

	/// A `name:pattern` segment carries a pattern that does not compile.
	#[error("invalid segment pattern `{pattern}`: {message}")]
	InvalidPattern { pattern: String, message: String },

	/// The node cannot host the incoming subtree (terminal or alias rules).
	#[error("{child} can not mount to {parent}")]
	MountRefused { child: String, parent: String },

	/// A handler was bound to a node that is not a terminal endpoint.
	#[error("path is not a terminal endpoint: {0}")]
	NotTerminal(String),

	/// A handler returned a shape that cannot be normalized.
	#[error("handler result can not be normalized")]
	Normalization,

	/// An interceptor stopped the request; carries the supplied reason.
	#[error("request intercepted: {0}")]
	Intercepted(String),

	/// The redirect loop exceeded the bounded hop counter.
	#[error("redirect hop limit exceeded while resolving {0}")]
	RedirectLimit(String),

	/// A cross-module call named a module the registry does not know.
	#[error("module not found: {0}")]
	ModuleNotFound(String),

	/// RPC transport failure (signature, replay window, remote status).
	#[error("rpc failure: {0}")]
	Rpc(String),

	/// Application handler failure, routed to the per-request error hook.
	#[error("handler error: {0}")]
	Handler(String),
}

impl Error {
	/// Wrap an application-level failure.
	pub fn handler(err: impl std::fmt::Display) -> Self {
		Error::Handler(err.to_string())
	}
}
