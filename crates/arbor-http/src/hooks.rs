//! Lifecycle hooks fired by the request context.
//!
//! The event set is a closed enum with one typed observer list per event.
//! Observers of the same event run sequentially: a suspended hook completes
//! before the next one starts.

use crate::context::Context;
use crate::{BoxFuture, Result};
use bytes::Bytes;
use std::sync::Arc;

/// Fixed set of per-request lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
	/// Before the context transitions to servicing.
	PreStart,
	/// After the url has been parsed and path segments populated.
	PostStart,
	/// A request body chunk was read; the chunk is passed to the hook.
	ReqRead,
	/// The request body reached end-of-stream.
	ReqEnd,
	/// Before the response body is written.
	PreResEnd,
	/// After the response has been written; fires exactly once.
	PostResEnd,
}

impl HookEvent {
	/// Stable name, used for logging.
	pub fn as_str(&self) -> &'static str {
		match self {
			HookEvent::PreStart => "pre-start",
			HookEvent::PostStart => "post-start",
			HookEvent::ReqRead => "req-read",
			HookEvent::ReqEnd => "req-end",
			HookEvent::PreResEnd => "pre-res-end",
			HookEvent::PostResEnd => "post-res-end",
		}
	}
}

impl std::fmt::Display for HookEvent {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Hook observer. Receives the context and, for body events, the chunk.
pub type HookFn = Arc<
	dyn for<'a> Fn(&'a mut Context, Option<Bytes>) -> BoxFuture<'a, Result<()>> + Send + Sync,
>;

/// Helper that pins down the higher-ranked closure signature for [`HookFn`].
pub fn hook_fn<F>(f: F) -> HookFn
where
	F: for<'a> Fn(&'a mut Context, Option<Bytes>) -> BoxFuture<'a, Result<()>>
		+ Send
		+ Sync
		+ 'static,
{
	Arc::new(f)
}

/// Ordered observer lists, one per event.
#[derive(Default)]
pub(crate) struct HookRegistry {
	pre_start: Vec<HookFn>,
	post_start: Vec<HookFn>,
	req_read: Vec<HookFn>,
	req_end: Vec<HookFn>,
	pre_res_end: Vec<HookFn>,
	post_res_end: Vec<HookFn>,
}

impl HookRegistry {
	pub(crate) fn add(&mut self, event: HookEvent, hook: HookFn) {
		self.list_mut(event).push(hook);
	}

	/// Snapshot of the observers for one event, in registration order.
	pub(crate) fn observers(&self, event: HookEvent) -> Vec<HookFn> {
		self.list(event).to_vec()
	}

	fn list(&self, event: HookEvent) -> &[HookFn] {
		match event {
			HookEvent::PreStart => &self.pre_start,
			HookEvent::PostStart => &self.post_start,
			HookEvent::ReqRead => &self.req_read,
			HookEvent::ReqEnd => &self.req_end,
			HookEvent::PreResEnd => &self.pre_res_end,
			HookEvent::PostResEnd => &self.post_res_end,
		}
	}

	fn list_mut(&mut self, event: HookEvent) -> &mut Vec<HookFn> {
		match event {
			HookEvent::PreStart => &mut self.pre_start,
			HookEvent::PostStart => &mut self.post_start,
			HookEvent::ReqRead => &mut self.req_read,
			HookEvent::ReqEnd => &mut self.req_end,
			HookEvent::PreResEnd => &mut self.pre_res_end,
			HookEvent::PostResEnd => &mut self.post_res_end,
		}
	}
}
