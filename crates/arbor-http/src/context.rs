//! Per-request state machine wrapping the transport request/response pair.
//!
//! A [`Context`] is created for each inbound request, transitions
//! `Initialized -> Servicing` on [`Context::start`] (url parsed, path
//! segments populated) and `Servicing -> Finished` on [`Context::end`].
//! The finished state is terminal: header mutation and body writes become
//! no-ops, and a second `end` resolves without effect.

use crate::hooks::{HookEvent, HookFn, HookRegistry};
use crate::{BodyStream, Result};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Method, StatusCode, Version};
use percent_encoding::percent_decode_str;
use std::collections::HashMap;

/// Monotonic request lifecycle status. Never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContextStatus {
	Initialized,
	Servicing,
	Finished,
}

/// Buffered response side of the context.
struct ResponseState {
	status: StatusCode,
	reason: Option<String>,
	headers: HeaderMap,
	body: BytesMut,
}

impl Default for ResponseState {
	fn default() -> Self {
		Self {
			status: StatusCode::OK,
			reason: None,
			headers: HeaderMap::new(),
			body: BytesMut::new(),
		}
	}
}

/// Finished response parts handed back to the transport layer.
pub struct ResponseParts {
	pub status: StatusCode,
	pub reason: Option<String>,
	pub headers: HeaderMap,
	pub body: Bytes,
}

/// Per-request mutable state machine.
pub struct Context {
	/// Request method, copied from the transport request.
	pub method: Method,
	/// HTTP version of the transport request.
	pub http_version: Version,
	/// Request headers, copied from the transport request.
	pub headers: HeaderMap,

	/// Current url; redirection rewrites this.
	pub url: String,
	/// The url the request originally arrived with.
	pub origin_url: String,
	/// Path component of the current url.
	pub pathname: String,
	/// Decoded query parameters of the current url.
	pub query: HashMap<String, String>,
	/// Raw search string including the leading `?`, or empty.
	pub search: String,
	/// Captured pattern groups per node name (full match first).
	pub params: HashMap<String, Vec<String>>,
	/// Unconsumed path segments, consumed left-to-right by the pipeline.
	pub paths: Vec<String>,

	raw_url: String,
	status: ContextStatus,
	hooks: HookRegistry,
	body: Option<BodyStream>,
	body_ended: bool,
	response: ResponseState,
}

impl Context {
	/// Create a context for a request target such as `/user/1?x=y`.
	///
	/// # Examples
	///
	/// ```
	/// use arbor_http::Context;
	/// use hyper::Method;
	///
	/// let ctx = Context::new(Method::GET, "/user/1?x=y");
	/// assert_eq!(ctx.method, Method::GET);
	/// ```
	pub fn new(method: Method, url: impl Into<String>) -> Self {
		Self {
			method,
			http_version: Version::HTTP_11,
			headers: HeaderMap::new(),
			url: String::new(),
			origin_url: String::new(),
			pathname: String::new(),
			query: HashMap::new(),
			search: String::new(),
			params: HashMap::new(),
			paths: Vec::new(),
			raw_url: url.into(),
			status: ContextStatus::Initialized,
			hooks: HookRegistry::default(),
			body: None,
			body_ended: false,
			response: ResponseState::default(),
		}
	}

	pub fn with_http_version(mut self, version: Version) -> Self {
		self.http_version = version;
		self
	}

	pub fn with_headers(mut self, headers: HeaderMap) -> Self {
		self.headers = headers;
		self
	}

	/// Attach a pull-based request body stream.
	pub fn with_body(mut self, body: BodyStream) -> Self {
		self.body = Some(body);
		self
	}

	/// Attach a single-chunk request body, mostly useful in tests.
	pub fn with_body_bytes(mut self, body: impl Into<Bytes>) -> Self {
		let chunk = body.into();
		self.body = Some(Box::pin(futures::stream::iter([Ok(chunk)])));
		self
	}

	/// Current lifecycle status.
	pub fn status(&self) -> ContextStatus {
		self.status
	}

	/// True once the response has been finalized.
	pub fn finished(&self) -> bool {
		self.status == ContextStatus::Finished
	}

	/// Transition to servicing: fire `pre-start`, parse the url, populate
	/// path segments, fire `post-start`. Idempotent after the first call.
	pub async fn start(&mut self) -> Result<()> {
		if self.status != ContextStatus::Initialized {
			return Ok(());
		}

		self.emit_hook(HookEvent::PreStart, None).await?;

		self.status = ContextStatus::Servicing;
		let url = self.raw_url.clone();
		self.set_url(&url);

		self.emit_hook(HookEvent::PostStart, None).await?;
		Ok(())
	}

	/// Decompose `url` into pathname/query/search and reset the segment
	/// cursor. Redirection calls this to re-enter resolution.
	pub fn set_url(&mut self, url: &str) {
		self.url = url.to_string();
		if self.origin_url.is_empty() {
			self.origin_url = self.url.clone();
		}

		let (pathname, search) = match url.split_once('?') {
			Some((p, q)) => (p.to_string(), format!("?{}", q)),
			None => (url.to_string(), String::new()),
		};

		self.query = Self::parse_query(search.strip_prefix('?').unwrap_or(""));
		self.pathname = pathname;
		self.search = search;
		self.params = HashMap::new();

		self.paths = std::iter::once("/".to_string())
			.chain(
				self.pathname
					.split('/')
					.filter(|s| !s.is_empty())
					.map(str::to_string),
			)
			.collect();
	}

	fn parse_query(raw: &str) -> HashMap<String, String> {
		if raw.is_empty() {
			return HashMap::new();
		}
		raw.split('&')
			.filter_map(|pair| {
				// Split on the first '=' only, to preserve '=' in values.
				let mut parts = pair.splitn(2, '=');
				let key = parts.next()?;
				let value = parts.next().unwrap_or("");
				Some((
					percent_decode_str(key).decode_utf8_lossy().to_string(),
					percent_decode_str(value).decode_utf8_lossy().to_string(),
				))
			})
			.collect()
	}

	/// Register a lifecycle hook; observers fire in registration order.
	pub fn hook(&mut self, event: HookEvent, hook: HookFn) -> &mut Self {
		self.hooks.add(event, hook);
		self
	}

	/// Fire all observers of `event` sequentially. A suspended observer
	/// completes before the next one starts.
	pub async fn emit_hook(&mut self, event: HookEvent, chunk: Option<Bytes>) -> Result<()> {
		let observers = self.hooks.observers(event);
		if !observers.is_empty() {
			tracing::debug!(event = %event, count = observers.len(), "firing hooks");
		}
		for observer in observers {
			observer(self, chunk.clone()).await?;
		}
		Ok(())
	}

	/// Pull the next request body chunk, firing `req-read` per chunk and
	/// `req-end` once at end-of-stream. Bodiless methods end immediately.
	pub async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
		if matches!(self.method, Method::GET | Method::HEAD | Method::OPTIONS) {
			self.finish_body().await?;
			return Ok(None);
		}

		let mut stream = match self.body.take() {
			Some(stream) => stream,
			None => {
				self.finish_body().await?;
				return Ok(None);
			}
		};

		match stream.next().await {
			Some(Ok(chunk)) => {
				self.body = Some(stream);
				self.emit_hook(HookEvent::ReqRead, Some(chunk.clone())).await?;
				Ok(Some(chunk))
			}
			Some(Err(err)) => Err(crate::Error::handler(err)),
			None => {
				self.finish_body().await?;
				Ok(None)
			}
		}
	}

	/// Drain the request body into a single buffer.
	pub async fn read_body(&mut self) -> Result<Bytes> {
		let mut buf = BytesMut::new();
		while let Some(chunk) = self.read_chunk().await? {
			buf.extend_from_slice(&chunk);
		}
		Ok(buf.freeze())
	}

	async fn finish_body(&mut self) -> Result<()> {
		if self.body_ended {
			return Ok(());
		}
		self.body_ended = true;
		self.emit_hook(HookEvent::ReqEnd, None).await
	}

	/// Response status code.
	pub fn status_code(&self) -> StatusCode {
		self.response.status
	}

	pub fn set_status(&mut self, status: StatusCode) {
		if self.finished() {
			return;
		}
		self.response.status = status;
	}

	/// Response reason phrase, when it deviates from the canonical one.
	pub fn reason(&self) -> Option<&str> {
		self.response.reason.as_deref()
	}

	pub fn set_reason(&mut self, reason: impl Into<String>) {
		if self.finished() {
			return;
		}
		self.response.reason = Some(reason.into());
	}

	/// Response headers written so far.
	pub fn response_headers(&self) -> &HeaderMap {
		&self.response.headers
	}

	/// Set a response header. With `cover` the value replaces existing
	/// ones; otherwise it is appended as an additional value. No-op once
	/// the context is finished or when the name/value is malformed.
	pub fn set_header(&mut self, name: &str, value: &str, cover: bool) {
		if self.finished() {
			return;
		}
		let (Ok(name), Ok(value)) = (
			HeaderName::from_bytes(name.as_bytes()),
			HeaderValue::from_str(value),
		) else {
			return;
		};
		if cover {
			self.response.headers.insert(name, value);
		} else {
			self.response.headers.append(name, value);
		}
	}

	/// Append a response body chunk. No-op once finished.
	pub fn write(&mut self, chunk: &[u8]) {
		if self.finished() {
			return;
		}
		self.response.body.extend_from_slice(chunk);
	}

	/// Finalize the response. Fires `pre-res-end`, appends the final body
	/// chunk, fires `post-res-end`. Only the first call has effect.
	pub async fn end(&mut self, body: Option<Bytes>) -> Result<()> {
		if self.finished() {
			return Ok(());
		}
		self.status = ContextStatus::Finished;

		self.emit_hook(HookEvent::PreResEnd, body.clone()).await?;
		if let Some(chunk) = body {
			self.response.body.extend_from_slice(&chunk);
		}
		self.emit_hook(HookEvent::PostResEnd, None).await?;
		Ok(())
	}

	/// Emit a redirect response (302 unless a status is given) and end.
	pub async fn redirect(&mut self, status: Option<StatusCode>, url: &str) -> Result<()> {
		self.set_status(status.unwrap_or(StatusCode::FOUND));
		self.set_header("location", url, true);
		self.set_header("content-type", "text/plain", true);
		self.end(None).await
	}

	/// Emit an HTML response and end.
	pub async fn html(&mut self, body: impl Into<Bytes>) -> Result<()> {
		self.set_header("content-type", "text/html; charset=UTF-8", true);
		self.end(Some(body.into())).await
	}

	/// Forced finalization for an early-closed connection: synthetic 499.
	pub async fn force_close(&mut self) -> Result<()> {
		if self.finished() {
			return Ok(());
		}
		if let Ok(status) = StatusCode::from_u16(499) {
			self.set_status(status);
		}
		self.set_reason("Connection Closed");
		self.end(None).await
	}

	/// Hand the finished response parts to the transport layer.
	pub fn take_response(&mut self) -> ResponseParts {
		ResponseParts {
			status: self.response.status,
			reason: self.response.reason.take(),
			headers: std::mem::take(&mut self.response.headers),
			body: std::mem::take(&mut self.response.body).freeze(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::hooks::hook_fn;
	use std::sync::{Arc, Mutex};

	#[tokio::test]
	async fn start_parses_url_and_populates_segments() {
		let mut ctx = Context::new(Method::GET, "/user/1?name=John%20Doe&flag");
		ctx.start().await.unwrap();

		assert_eq!(ctx.status(), ContextStatus::Servicing);
		assert_eq!(ctx.pathname, "/user/1");
		assert_eq!(ctx.search, "?name=John%20Doe&flag");
		assert_eq!(ctx.query.get("name"), Some(&"John Doe".to_string()));
		assert_eq!(ctx.query.get("flag"), Some(&"".to_string()));
		assert_eq!(ctx.paths, vec!["/", "user", "1"]);
		assert_eq!(ctx.origin_url, "/user/1?name=John%20Doe&flag");
	}

	#[rstest::rstest]
	#[case("/p?name=John%20Doe", "name", "John Doe")]
	#[case("/p?a=b=c", "a", "b=c")]
	#[case("/p?flag", "flag", "")]
	fn query_values_decode(#[case] url: &str, #[case] key: &str, #[case] expected: &str) {
		let mut ctx = Context::new(Method::GET, url);
		ctx.set_url(url);
		assert_eq!(ctx.query.get(key), Some(&expected.to_string()));
	}

	#[tokio::test]
	async fn start_is_idempotent() {
		let mut ctx = Context::new(Method::GET, "/a");
		let counter = Arc::new(Mutex::new(0));
		let c = counter.clone();
		ctx.hook(
			HookEvent::PreStart,
			hook_fn(move |_ctx, _| {
				let c = c.clone();
				Box::pin(async move {
					*c.lock().unwrap() += 1;
					Ok(())
				})
			}),
		);

		ctx.start().await.unwrap();
		ctx.start().await.unwrap();
		assert_eq!(*counter.lock().unwrap(), 1);
	}

	#[tokio::test]
	async fn set_url_resets_params_and_keeps_origin() {
		let mut ctx = Context::new(Method::GET, "/shop/unknown");
		ctx.start().await.unwrap();
		ctx.params.insert("shop".into(), vec!["shop".into()]);

		ctx.set_url("/common/404");
		assert_eq!(ctx.pathname, "/common/404");
		assert!(ctx.params.is_empty());
		assert_eq!(ctx.paths, vec!["/", "common", "404"]);
		assert_eq!(ctx.origin_url, "/shop/unknown");
	}

	#[tokio::test]
	async fn end_is_idempotent_and_freezes_headers() {
		let mut ctx = Context::new(Method::GET, "/a");
		ctx.start().await.unwrap();

		ctx.set_header("x-early", "1", true);
		ctx.end(Some(Bytes::from("done"))).await.unwrap();
		assert!(ctx.finished());

		// Neither of these may have any effect, nor error.
		ctx.set_header("x-late", "1", true);
		ctx.set_status(StatusCode::IM_A_TEAPOT);
		ctx.write(b"more");
		ctx.end(Some(Bytes::from("again"))).await.unwrap();

		let parts = ctx.take_response();
		assert_eq!(parts.status, StatusCode::OK);
		assert!(parts.headers.get("x-late").is_none());
		assert!(parts.headers.get("x-early").is_some());
		assert_eq!(parts.body, Bytes::from("done"));
	}

	#[tokio::test]
	async fn header_append_vs_cover() {
		let mut ctx = Context::new(Method::GET, "/a");
		ctx.start().await.unwrap();

		ctx.set_header("x-multi", "one", false);
		ctx.set_header("x-multi", "two", false);
		assert_eq!(ctx.response_headers().get_all("x-multi").iter().count(), 2);

		ctx.set_header("x-multi", "three", true);
		assert_eq!(ctx.response_headers().get_all("x-multi").iter().count(), 1);
	}

	#[tokio::test]
	async fn hooks_run_sequentially_in_registration_order() {
		let mut ctx = Context::new(Method::GET, "/a");
		let log = Arc::new(Mutex::new(Vec::new()));

		let l1 = log.clone();
		ctx.hook(
			HookEvent::PreResEnd,
			hook_fn(move |_ctx, _| {
				let l1 = l1.clone();
				Box::pin(async move {
					// Suspend: the second hook must still run after us.
					tokio::time::sleep(std::time::Duration::from_millis(20)).await;
					l1.lock().unwrap().push("first");
					Ok(())
				})
			}),
		);
		let l2 = log.clone();
		ctx.hook(
			HookEvent::PreResEnd,
			hook_fn(move |_ctx, _| {
				let l2 = l2.clone();
				Box::pin(async move {
					l2.lock().unwrap().push("second");
					Ok(())
				})
			}),
		);

		ctx.start().await.unwrap();
		ctx.end(None).await.unwrap();
		assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
	}

	#[tokio::test]
	async fn body_read_fires_read_and_end_hooks() {
		let log = Arc::new(Mutex::new(Vec::new()));
		let mut ctx = Context::new(Method::POST, "/a").with_body_bytes("payload");

		let l1 = log.clone();
		ctx.hook(
			HookEvent::ReqRead,
			hook_fn(move |_ctx, chunk| {
				let l1 = l1.clone();
				Box::pin(async move {
					l1.lock().unwrap().push(format!(
						"read:{}",
						chunk.map(|c| c.len()).unwrap_or(0)
					));
					Ok(())
				})
			}),
		);
		let l2 = log.clone();
		ctx.hook(
			HookEvent::ReqEnd,
			hook_fn(move |_ctx, _| {
				let l2 = l2.clone();
				Box::pin(async move {
					l2.lock().unwrap().push("end".to_string());
					Ok(())
				})
			}),
		);

		ctx.start().await.unwrap();
		let body = ctx.read_body().await.unwrap();
		assert_eq!(body, Bytes::from("payload"));
		assert_eq!(*log.lock().unwrap(), vec!["read:7", "end"]);

		// A second drain must not fire req-end again.
		let rest = ctx.read_body().await.unwrap();
		assert!(rest.is_empty());
		assert_eq!(log.lock().unwrap().len(), 2);
	}

	#[tokio::test]
	async fn bodiless_method_ends_body_immediately() {
		let mut ctx = Context::new(Method::GET, "/a");
		ctx.start().await.unwrap();
		assert_eq!(ctx.read_chunk().await.unwrap(), None);
	}

	#[tokio::test]
	async fn force_close_emits_synthetic_499() {
		let mut ctx = Context::new(Method::GET, "/a");
		ctx.start().await.unwrap();
		ctx.force_close().await.unwrap();

		assert!(ctx.finished());
		assert_eq!(ctx.status_code().as_u16(), 499);
		assert_eq!(ctx.reason(), Some("Connection Closed"));

		// Already finished: a later close is a no-op.
		ctx.force_close().await.unwrap();
	}
}
