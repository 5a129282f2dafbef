//! Request dispatch over a [`PathTree`].
//!
//! The router owns the tree and the registration surface. Dispatch
//! resolves the context's pathname to a terminal endpoint (appending an
//! implicit `index` segment when the path stops at a branch), walks the
//! pipeline, and re-enters resolution on redirect steps with a bounded
//! hop counter. Unresolvable paths fall back to the owning app's `404`
//! page, then to `/common/404`, then to a plain `404` status.

use crate::stage::{Converter, HandlerFn, Interceptor, Interferer, Redirector};
use crate::tree::{PathTree, Step};
use arbor_http::{envelope, BoxFuture, Context, Error, Outcome, Result};
use futures::StreamExt;
use hyper::{Method, StatusCode};
use serde_json::json;
use std::sync::Arc;

/// Upper bound on redirect / fallback re-entries for one request.
pub const MAX_REDIRECT_HOPS: usize = 32;

/// Methods a route can be registered for.
pub const SUPPORTED_METHODS: [Method; 5] = [
	Method::GET,
	Method::POST,
	Method::PUT,
	Method::DELETE,
	Method::OPTIONS,
];

/// Per-router error hook; replaces the default 500 envelope response.
pub type ErrorHook =
	Arc<dyn for<'a> Fn(&'a mut Context, Error) -> BoxFuture<'a, Result<()>> + Send + Sync>;

/// Pin down the higher-ranked closure signature for an [`ErrorHook`].
pub fn error_hook<F>(f: F) -> ErrorHook
where
	F: for<'a> Fn(&'a mut Context, Error) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
	Arc::new(f)
}

pub struct Router {
	tree: PathTree,
	on_error: Option<ErrorHook>,
}

impl Default for Router {
	fn default() -> Self {
		Self::new()
	}
}

impl Router {
	pub fn new() -> Self {
		Self {
			tree: PathTree::new(),
			on_error: None,
		}
	}

	/// The underlying tree, mostly for dumping.
	pub fn tree(&self) -> &PathTree {
		&self.tree
	}

	fn ensure_branch(&mut self, path: &str) -> Result<()> {
		if !self.tree.exists(path) {
			self.tree.make_middle(path)?;
		}
		Ok(())
	}

	fn methods_or(methods: &[Method], default: &[Method]) -> Vec<Method> {
		if methods.is_empty() {
			default.to_vec()
		} else {
			methods.to_vec()
		}
	}

	/// Register a converter at `path`. An empty `methods` slice means
	/// every supported method.
	pub fn convert(&mut self, path: &str, methods: &[Method], stage: Converter) -> Result<&mut Self> {
		self.ensure_branch(path)?;
		for method in Self::methods_or(methods, &SUPPORTED_METHODS) {
			self.tree
				.add_converter_by_path(path, method, stage.clone())?;
		}
		Ok(self)
	}

	/// Register a redirector at `path`. An empty `methods` slice means
	/// every supported method.
	pub fn redirect(&mut self, path: &str, methods: &[Method], stage: Redirector) -> Result<&mut Self> {
		self.ensure_branch(path)?;
		for method in Self::methods_or(methods, &SUPPORTED_METHODS) {
			self.tree
				.add_redirector_by_path(path, method, stage.clone())?;
		}
		Ok(self)
	}

	/// Register an interceptor at `path`. An empty `methods` slice means
	/// every supported method except `OPTIONS`, which stays answerable
	/// for capability probes.
	pub fn intercept(&mut self, path: &str, methods: &[Method], stage: Interceptor) -> Result<&mut Self> {
		self.ensure_branch(path)?;
		let default: Vec<Method> = SUPPORTED_METHODS
			.iter()
			.filter(|m| **m != Method::OPTIONS)
			.cloned()
			.collect();
		for method in Self::methods_or(methods, &default) {
			self.tree
				.add_interceptor_by_path(path, method, stage.clone())?;
		}
		Ok(self)
	}

	/// Register an interferer at `path`. An empty `methods` slice means
	/// every supported method.
	pub fn interfere(&mut self, path: &str, methods: &[Method], stage: Interferer) -> Result<&mut Self> {
		self.ensure_branch(path)?;
		for method in Self::methods_or(methods, &SUPPORTED_METHODS) {
			self.tree
				.add_interferer_by_path(path, method, stage.clone())?;
		}
		Ok(self)
	}

	fn bind(&mut self, method: Method, path: &str, route: HandlerFn) -> Result<&mut Self> {
		if !self.tree.exists(path) {
			self.tree.make_end(path)?;
		}
		self.tree.add_handler_by_path(path, method, route)?;
		Ok(self)
	}

	pub fn get(&mut self, path: &str, route: HandlerFn) -> Result<&mut Self> {
		self.bind(Method::GET, path, route)
	}

	pub fn post(&mut self, path: &str, route: HandlerFn) -> Result<&mut Self> {
		self.bind(Method::POST, path, route)
	}

	pub fn put(&mut self, path: &str, route: HandlerFn) -> Result<&mut Self> {
		self.bind(Method::PUT, path, route)
	}

	pub fn delete(&mut self, path: &str, route: HandlerFn) -> Result<&mut Self> {
		self.bind(Method::DELETE, path, route)
	}

	/// Bind `route` for every supported method at `path`.
	pub fn all(&mut self, path: &str, route: HandlerFn) -> Result<&mut Self> {
		for method in SUPPORTED_METHODS {
			self.bind(method, path, route.clone())?;
		}
		Ok(self)
	}

	/// Alias `path` to the existing `target_path` subtree.
	pub fn link(&mut self, path: &str, target_path: &str) -> Result<&mut Self> {
		self.tree.make_link(path, target_path)?;
		Ok(self)
	}

	/// Create a terminal endpoint without binding a handler yet. Idempotent.
	pub fn make_end(&mut self, path: &str) -> Result<&mut Self> {
		if !self.tree.exists(path) {
			self.tree.make_end(path)?;
		}
		Ok(self)
	}

	pub fn make_middle(&mut self, path: &str) -> Result<&mut Self> {
		self.tree.make_middle(path)?;
		Ok(self)
	}

	/// Graft `child`'s whole tree beneath `path` of this router.
	pub fn mount(&mut self, child: &Router, path: &str) -> Result<&mut Self> {
		let at = self
			.tree
			.node_by_path(path)
			.ok_or_else(|| Error::UnknownPath(path.to_string()))?;
		self.tree.graft(&child.tree, at)?;
		Ok(self)
	}

	/// Install a per-request error hook replacing the default 500 reply.
	pub fn on_error(&mut self, hook: ErrorHook) -> &mut Self {
		self.on_error = Some(hook);
		self
	}

	/// Drive one request through the pipeline to a finished context.
	pub async fn process(&self, ctx: &mut Context) -> Result<()> {
		ctx.start().await?;

		match self.dispatch(ctx).await {
			Ok(outcome) => self.emit(ctx, outcome).await,
			Err(err) => self.handle_error(ctx, err).await,
		}
	}

	async fn dispatch(&self, ctx: &mut Context) -> Result<Outcome> {
		let method = ctx.method.clone();
		let mut skip: Option<String> = None;
		let mut hops = 0usize;

		loop {
			let mut path = ctx.pathname.clone();

			if !self.tree.search_end(&path)? {
				// a branch path implicitly means its index page
				path.push_str(if path.ends_with('/') { "index" } else { "/index" });
			}

			if !self.tree.search_end(&path)? {
				let app = ctx
					.pathname
					.split('/')
					.find(|s| !s.is_empty())
					.unwrap_or("common")
					.to_string();
				let fallback = format!("/{app}/404");

				let target = if self.tree.search_end(&fallback)? {
					Some(fallback)
				} else if app != "common" && self.tree.search_end("/common/404")? {
					Some("/common/404".to_string())
				} else {
					None
				};

				match target {
					Some(url) => {
						hops += 1;
						if hops > MAX_REDIRECT_HOPS {
							return Err(Error::RedirectLimit(ctx.origin_url.clone()));
						}
						tracing::debug!(from = %ctx.pathname, to = %url, "not found, falling back");
						ctx.set_url(&url);
						skip = None;
						continue;
					}
					None => return Ok(Outcome::Status(StatusCode::NOT_FOUND)),
				}
			}

			match self.tree.process(&path, &method, ctx, skip.as_deref()).await? {
				Step::Redirect { path, skip: next_skip } => {
					hops += 1;
					if hops > MAX_REDIRECT_HOPS {
						return Err(Error::RedirectLimit(ctx.origin_url.clone()));
					}
					tracing::debug!(to = %path, skip = %next_skip, "pipeline redirect");
					ctx.set_url(&path);
					skip = Some(next_skip);
				}
				Step::Intercept(reason) => return Err(Error::Intercepted(reason)),
				Step::Done(outcome) => return Ok(outcome),
				Step::Continue => return Ok(Outcome::Status(StatusCode::NOT_FOUND)),
			}
		}
	}

	async fn emit(&self, ctx: &mut Context, outcome: Outcome) -> Result<()> {
		match outcome {
			Outcome::Done => Ok(()),
			Outcome::Stream(mut stream) => {
				while let Some(chunk) = stream.next().await {
					let chunk = chunk.map_err(Error::handler)?;
					ctx.write(&chunk);
				}
				ctx.end(None).await
			}
			other => {
				if ctx.finished() {
					return Ok(());
				}
				let normalized = other.normalize()?;
				if let Some(content_type) = &normalized.content_type {
					ctx.set_header("content-type", content_type, true);
				}
				ctx.set_status(normalized.status);
				ctx.set_reason(normalized.reason);
				ctx.end(Some(normalized.body)).await
			}
		}
	}

	async fn handle_error(&self, ctx: &mut Context, err: Error) -> Result<()> {
		tracing::error!(error = %err, url = %ctx.origin_url, "request pipeline failed");

		if let Some(hook) = self.on_error.clone() {
			return hook(ctx, err).await;
		}

		if ctx.finished() {
			return Ok(());
		}
		ctx.set_status(StatusCode::INTERNAL_SERVER_ERROR);
		ctx.set_header("content-type", "application/json", true);
		ctx.end(Some(envelope(1, &err.to_string(), json!({})))).await
	}
}

impl std::fmt::Display for Router {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		std::fmt::Display::fmt(&self.tree, f)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::stage::{handler, interceptor, redirector, Redirect};
	use bytes::Bytes;
	use serde_json::Value;

	fn text(tag: &'static str) -> HandlerFn {
		handler(move |_ctx| Box::pin(async move { Ok(Outcome::Text(tag.to_string())) }))
	}

	async fn run(router: &Router, method: Method, url: &str) -> (StatusCode, Value) {
		let mut ctx = Context::new(method, url);
		router.process(&mut ctx).await.unwrap();
		assert!(ctx.finished());
		let parts = ctx.take_response();
		let body: Value = serde_json::from_slice(&parts.body).unwrap_or(Value::Null);
		(parts.status, body)
	}

	#[tokio::test]
	async fn branch_path_serves_implicit_index() {
		let mut router = Router::new();
		router.get("/shop/index", text("shop index")).unwrap();

		let (status, body) = run(&router, Method::GET, "/shop").await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["result"], "shop index");

		let (status, body) = run(&router, Method::GET, "/shop/").await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["result"], "shop index");
	}

	#[tokio::test]
	async fn unknown_path_falls_back_to_app_404_then_common() {
		let mut router = Router::new();
		router.get("/shop/404", text("shop lost")).unwrap();
		router.get("/common/404", text("common lost")).unwrap();
		router.get("/bare/index", text("bare")).unwrap();

		let (_, body) = run(&router, Method::GET, "/shop/missing").await;
		assert_eq!(body["result"], "shop lost");

		// no /bare/404, so the shared one answers
		let (_, body) = run(&router, Method::GET, "/bare/missing").await;
		assert_eq!(body["result"], "common lost");
	}

	#[tokio::test]
	async fn unknown_path_without_fallbacks_is_plain_404() {
		let mut router = Router::new();
		router.get("/only/index", text("only")).unwrap();

		let mut ctx = Context::new(Method::GET, "/nowhere");
		router.process(&mut ctx).await.unwrap();
		let parts = ctx.take_response();
		assert_eq!(parts.status, StatusCode::NOT_FOUND);
		assert_eq!(parts.body, Bytes::from("Not Found"));
	}

	#[tokio::test]
	async fn redirector_reroutes_and_skips_its_own_branch() {
		let mut router = Router::new();
		router
			.redirect(
				"/legacy",
				&[],
				redirector(|_ctx| Box::pin(async { Ok(Some(Redirect::to("/fresh/page"))) })),
			)
			.unwrap();
		router.get("/legacy/page", text("legacy")).unwrap();
		router.get("/fresh/page", text("fresh")).unwrap();

		let (_, body) = run(&router, Method::GET, "/legacy/page").await;
		assert_eq!(body["result"], "fresh");
	}

	#[tokio::test]
	async fn redirect_loop_is_bounded() {
		let mut router = Router::new();
		// the /a redirector re-fires on every hop because its skip chain
		// resolves to nothing
		router
			.redirect(
				"/a",
				&[],
				redirector(|_ctx| {
					Box::pin(async { Ok(Some(Redirect::to("/a/page").with_skip("/none"))) })
				}),
			)
			.unwrap();
		router.get("/a/page", text("page")).unwrap();

		let mut ctx = Context::new(Method::GET, "/a/page");
		router.process(&mut ctx).await.unwrap();

		let parts = ctx.take_response();
		assert_eq!(parts.status, StatusCode::INTERNAL_SERVER_ERROR);
		let body: Value = serde_json::from_slice(&parts.body).unwrap();
		assert_eq!(body["code"], 1);
	}

	#[tokio::test]
	async fn interception_produces_the_error_envelope() {
		let mut router = Router::new();
		router
			.intercept(
				"/admin",
				&[],
				interceptor(|_ctx| Box::pin(async { Ok(Some("not signed in".to_string())) })),
			)
			.unwrap();
		router.get("/admin/panel", text("panel")).unwrap();

		let mut ctx = Context::new(Method::GET, "/admin/panel");
		router.process(&mut ctx).await.unwrap();

		let parts = ctx.take_response();
		assert_eq!(parts.status, StatusCode::INTERNAL_SERVER_ERROR);
		let body: Value = serde_json::from_slice(&parts.body).unwrap();
		assert_eq!(body["code"], 1);
		assert!(body["msg"].as_str().unwrap().contains("not signed in"));
	}

	#[tokio::test]
	async fn options_bypasses_default_interceptor_scope() {
		let mut router = Router::new();
		router
			.intercept(
				"/admin",
				&[],
				interceptor(|_ctx| Box::pin(async { Ok(Some("blocked".to_string())) })),
			)
			.unwrap();
		router.get("/admin/panel", text("panel")).unwrap();

		let mut ctx = Context::new(Method::OPTIONS, "/admin/panel");
		router.process(&mut ctx).await.unwrap();
		let parts = ctx.take_response();
		assert_eq!(parts.status, StatusCode::OK);
		assert_eq!(parts.body, Bytes::from("GET"));
	}

	#[tokio::test]
	async fn error_hook_replaces_default_reply() {
		let mut router = Router::new();
		router
			.intercept(
				"/x",
				&[],
				interceptor(|_ctx| Box::pin(async { Ok(Some("nope".to_string())) })),
			)
			.unwrap();
		router.get("/x/page", text("page")).unwrap();
		router.on_error(error_hook(|ctx, _err| {
			Box::pin(async move {
				ctx.set_status(StatusCode::FORBIDDEN);
				ctx.end(Some(Bytes::from("custom"))).await
			})
		}));

		let mut ctx = Context::new(Method::GET, "/x/page");
		router.process(&mut ctx).await.unwrap();
		let parts = ctx.take_response();
		assert_eq!(parts.status, StatusCode::FORBIDDEN);
		assert_eq!(parts.body, Bytes::from("custom"));
	}

	#[tokio::test]
	async fn mounted_router_answers_under_its_prefix() {
		let mut app = Router::new();
		app.get("/goods/list", text("goods")).unwrap();

		let mut root = Router::new();
		root.make_middle("/shop").unwrap();
		root.mount(&app, "/shop").unwrap();

		let (_, body) = run(&root, Method::GET, "/shop/goods/list").await;
		assert_eq!(body["result"], "goods");
	}

	#[tokio::test]
	async fn handler_that_ends_itself_is_left_alone() {
		let mut router = Router::new();
		router
			.get(
				"/raw/index",
				handler(|ctx| {
					Box::pin(async move {
						ctx.set_status(StatusCode::CREATED);
						ctx.end(Some(Bytes::from("raw body"))).await?;
						Ok(Outcome::Done)
					})
				}),
			)
			.unwrap();

		let mut ctx = Context::new(Method::GET, "/raw");
		router.process(&mut ctx).await.unwrap();
		let parts = ctx.take_response();
		assert_eq!(parts.status, StatusCode::CREATED);
		assert_eq!(parts.body, Bytes::from("raw body"));
	}
}
