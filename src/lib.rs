//! Module-based request-dispatch runtime.
//!
//! Routes live in a path tree of literal and pattern segments; every
//! request runs a staged pipeline (convert, redirect, intercept,
//! interfere) down its matched chain before the terminal handler fires.
//! Modules expose services to each other through a registry, with a
//! signed HTTP channel and a keyed-schema channel for the ones living in
//! other processes.
//!
//! ```no_run
//! use arbor::{handler, Context, HttpServer, Outcome, Router};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//! 	let mut router = Router::new();
//! 	router
//! 		.get(
//! 			"/shop/index",
//! 			handler(|_ctx| Box::pin(async { Ok(Outcome::Text("hello".to_string())) })),
//! 		)
//! 		.expect("route");
//!
//! 	HttpServer::new(Arc::new(router))
//! 		.listen(([127, 0, 0, 1], 8080).into())
//! 		.await
//! }
//! ```

pub use arbor_http::{
	envelope, hook_fn, Context, ContextStatus, Error, HookEvent, HookFn, Normalized, Outcome,
	ResponseParts, Result,
};
pub use arbor_routing::{
	converter, error_hook, handler, interceptor, interferer, redirector, Converter, ErrorHook,
	HandlerFn, Interceptor, Interferer, NodeKind, PathTree, Redirect, Redirector, Router,
	MAX_REDIRECT_HOPS, SUPPORTED_METHODS,
};
pub use arbor_rpc::{
	as_binary, binary_value, service_fn, sign, ModuleDescriptor, ModuleRegistry, RpcChannel,
	RpcError, SchemaChannel, ServiceCaller, SignedChannel, SignedConfig, WireSchema,
	REPLAY_WINDOW_MS,
};
pub use arbor_server::{register_rpc, HttpServer};
