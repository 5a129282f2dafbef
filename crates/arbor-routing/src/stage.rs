//! Pipeline stage function types.
//!
//! Converters and handlers run sequentially and may mutate the context;
//! redirectors, interceptors and interferers take a shared borrow so a
//! node's set can be polled concurrently while the aggregate selection
//! stays deterministic (first non-empty / first `Some` in registration
//! order).

use arbor_http::{BoxFuture, Context, Outcome, Result};
use hyper::Method;
use std::collections::HashMap;
use std::sync::Arc;

/// Pre-processing stage; may mutate the context (e.g. parse a body).
pub type Converter =
	Arc<dyn for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<()>> + Send + Sync>;

/// Path-rewrite stage; the first non-empty result wins.
pub type Redirector =
	Arc<dyn for<'a> Fn(&'a Context) -> BoxFuture<'a, Result<Option<Redirect>>> + Send + Sync>;

/// Short-circuit stage; the first `Some(reason)` stops the request.
pub type Interceptor =
	Arc<dyn for<'a> Fn(&'a Context) -> BoxFuture<'a, Result<Option<String>>> + Send + Sync>;

/// Side-effect stage; failures are logged and never affect control flow.
pub type Interferer =
	Arc<dyn for<'a> Fn(&'a Context) -> BoxFuture<'a, Result<()>> + Send + Sync>;

/// Terminal request handler bound to one HTTP method.
pub type HandlerFn =
	Arc<dyn for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<Outcome>> + Send + Sync>;

/// A redirector's verdict: the new path, and optionally the subtree to
/// exclude on the next resolution pass (defaults to the path's parent).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
	pub path: String,
	pub skip: Option<String>,
}

impl Redirect {
	pub fn to(path: impl Into<String>) -> Self {
		Redirect {
			path: path.into(),
			skip: None,
		}
	}

	pub fn with_skip(mut self, skip: impl Into<String>) -> Self {
		self.skip = Some(skip.into());
		self
	}
}

impl From<&str> for Redirect {
	fn from(path: &str) -> Self {
		Redirect::to(path)
	}
}

impl From<String> for Redirect {
	fn from(path: String) -> Self {
		Redirect::to(path)
	}
}

/// Per-method stage registrations of one tree node.
///
/// Stages run in registration order. Merging two nodes appends the other
/// node's registrations after the existing ones.
#[derive(Default, Clone)]
pub struct StageSet {
	converters: HashMap<Method, Vec<Converter>>,
	redirectors: HashMap<Method, Vec<Redirector>>,
	interceptors: HashMap<Method, Vec<Interceptor>>,
	interferers: HashMap<Method, Vec<Interferer>>,
}

impl StageSet {
	pub fn add_converter(&mut self, method: Method, stage: Converter) {
		self.converters.entry(method).or_default().push(stage);
	}

	pub fn add_redirector(&mut self, method: Method, stage: Redirector) {
		self.redirectors.entry(method).or_default().push(stage);
	}

	pub fn add_interceptor(&mut self, method: Method, stage: Interceptor) {
		self.interceptors.entry(method).or_default().push(stage);
	}

	pub fn add_interferer(&mut self, method: Method, stage: Interferer) {
		self.interferers.entry(method).or_default().push(stage);
	}

	pub fn converters(&self, method: &Method) -> &[Converter] {
		self.converters.get(method).map(Vec::as_slice).unwrap_or(&[])
	}

	pub fn redirectors(&self, method: &Method) -> &[Redirector] {
		self.redirectors.get(method).map(Vec::as_slice).unwrap_or(&[])
	}

	pub fn interceptors(&self, method: &Method) -> &[Interceptor] {
		self.interceptors.get(method).map(Vec::as_slice).unwrap_or(&[])
	}

	pub fn interferers(&self, method: &Method) -> &[Interferer] {
		self.interferers.get(method).map(Vec::as_slice).unwrap_or(&[])
	}

	/// Append every registration of `other` after this set's own.
	pub fn absorb(&mut self, other: &StageSet) {
		for (method, stages) in &other.converters {
			self.converters
				.entry(method.clone())
				.or_default()
				.extend(stages.iter().cloned());
		}
		for (method, stages) in &other.redirectors {
			self.redirectors
				.entry(method.clone())
				.or_default()
				.extend(stages.iter().cloned());
		}
		for (method, stages) in &other.interceptors {
			self.interceptors
				.entry(method.clone())
				.or_default()
				.extend(stages.iter().cloned());
		}
		for (method, stages) in &other.interferers {
			self.interferers
				.entry(method.clone())
				.or_default()
				.extend(stages.iter().cloned());
		}
	}
}

/// Pin down the higher-ranked closure signature for a [`Converter`].
pub fn converter<F>(f: F) -> Converter
where
	F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
	Arc::new(f)
}

/// Pin down the higher-ranked closure signature for a [`Redirector`].
pub fn redirector<F>(f: F) -> Redirector
where
	F: for<'a> Fn(&'a Context) -> BoxFuture<'a, Result<Option<Redirect>>> + Send + Sync + 'static,
{
	Arc::new(f)
}

/// Pin down the higher-ranked closure signature for an [`Interceptor`].
pub fn interceptor<F>(f: F) -> Interceptor
where
	F: for<'a> Fn(&'a Context) -> BoxFuture<'a, Result<Option<String>>> + Send + Sync + 'static,
{
	Arc::new(f)
}

/// Pin down the higher-ranked closure signature for an [`Interferer`].
pub fn interferer<F>(f: F) -> Interferer
where
	F: for<'a> Fn(&'a Context) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
	Arc::new(f)
}

/// Pin down the higher-ranked closure signature for a [`HandlerFn`].
pub fn handler<F>(f: F) -> HandlerFn
where
	F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<Outcome>> + Send + Sync + 'static,
{
	Arc::new(f)
}
