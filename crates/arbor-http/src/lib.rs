//! Request context, lifecycle hooks and result normalization.
//!
//! This crate carries the per-request state machine ([`Context`]), the fixed
//! set of lifecycle events ([`HookEvent`]) and the closed handler outcome
//! type ([`Outcome`]) that the router normalizes into a wire response.

pub mod context;
pub mod error;
pub mod hooks;
pub mod outcome;

pub use context::{Context, ContextStatus, ResponseParts};
pub use error::{Error, Result};
pub use hooks::{hook_fn, HookEvent, HookFn};
pub use outcome::{envelope, Normalized, Outcome};

use bytes::Bytes;
use futures::stream::Stream;
use std::pin::Pin;

/// Boxed future used by stage functions, hooks and handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Pull-based body stream: chunks become available as the transport reads.
pub type BodyStream =
	Pin<Box<dyn Stream<Item = std::result::Result<Bytes, Box<dyn std::error::Error + Send + Sync>>> + Send>>;
