//! Closed handler outcome type and result normalization.
//!
//! Handlers construct an explicit [`Outcome`] variant instead of returning
//! loosely-typed values; normalization turns an outcome into the concrete
//! `(status, reason, body, content-type)` tuple written to the wire:
//!
//! - `Status(n)` becomes `n` with the standard reason phrase as a
//!   `text/plain` body.
//! - `Empty` / `Text` / `Json` become a `200 application/json` envelope
//!   `{"code": 0, "msg": "ok", "result": <value>}`.
//! - `Raw` passes through verbatim.
//! - `Bytes` becomes `200 application/octet-stream`.
//! - `Stream` and `Done` never reach normalization; the router pipes or
//!   skips them.

use crate::{BodyStream, Error, Result};
use bytes::Bytes;
use hyper::StatusCode;
use serde_json::{json, Value};

/// What a terminal handler produced.
pub enum Outcome {
	/// The handler already finished the context itself.
	Done,
	/// Nothing to say; becomes the empty-result envelope.
	Empty,
	/// A bare string result.
	Text(String),
	/// A JSON result, wrapped into the response envelope.
	Json(Value),
	/// A bare HTTP status code.
	Status(StatusCode),
	/// A binary body.
	Bytes(Bytes),
	/// An explicit `(code, reason, body, content-type)` tuple.
	Raw {
		status: StatusCode,
		reason: String,
		body: Bytes,
		content_type: Option<String>,
	},
	/// A readable stream piped directly to the response.
	Stream(BodyStream),
}

impl std::fmt::Debug for Outcome {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Outcome::Done => write!(f, "Done"),
			Outcome::Empty => write!(f, "Empty"),
			Outcome::Text(s) => write!(f, "Text({s:?})"),
			Outcome::Json(v) => write!(f, "Json({v})"),
			Outcome::Status(s) => write!(f, "Status({s})"),
			Outcome::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
			Outcome::Raw { status, .. } => write!(f, "Raw({status})"),
			Outcome::Stream(_) => write!(f, "Stream"),
		}
	}
}

/// Concrete wire response produced by normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
	pub status: StatusCode,
	pub reason: String,
	pub body: Bytes,
	pub content_type: Option<String>,
}

/// Build the standard `{code, msg, result}` JSON envelope.
pub fn envelope(code: i64, msg: &str, result: Value) -> Bytes {
	let doc = json!({
		"code": code,
		"msg": msg,
		"result": result,
	});
	Bytes::from(doc.to_string())
}

impl Outcome {
	/// Normalize into the concrete response tuple.
	///
	/// # Errors
	///
	/// `Stream` and `Done` cannot be flattened into a buffered response
	/// and yield [`Error::Normalization`]; the router must handle them
	/// before calling this.
	pub fn normalize(self) -> Result<Normalized> {
		match self {
			Outcome::Status(status) => {
				let reason = status
					.canonical_reason()
					.unwrap_or("Unknown")
					.to_string();
				Ok(Normalized {
					status,
					body: Bytes::from(reason.clone()),
					reason,
					content_type: Some("text/plain".to_string()),
				})
			}
			Outcome::Empty => Ok(Self::enveloped(json!({}))),
			Outcome::Text(s) => Ok(Self::enveloped(Value::String(s))),
			Outcome::Json(v) => Ok(Self::enveloped(v)),
			Outcome::Bytes(body) => Ok(Normalized {
				status: StatusCode::OK,
				reason: "OK".to_string(),
				body,
				content_type: Some("application/octet-stream".to_string()),
			}),
			Outcome::Raw {
				status,
				reason,
				body,
				content_type,
			} => Ok(Normalized {
				status,
				reason,
				body,
				content_type,
			}),
			Outcome::Done | Outcome::Stream(_) => Err(Error::Normalization),
		}
	}

	fn enveloped(result: Value) -> Normalized {
		Normalized {
			status: StatusCode::OK,
			reason: "OK".to_string(),
			body: envelope(0, "ok", result),
			content_type: Some("application/json".to_string()),
		}
	}
}

impl From<&str> for Outcome {
	fn from(s: &str) -> Self {
		Outcome::Text(s.to_string())
	}
}

impl From<String> for Outcome {
	fn from(s: String) -> Self {
		Outcome::Text(s)
	}
}

impl From<Value> for Outcome {
	fn from(v: Value) -> Self {
		Outcome::Json(v)
	}
}

impl From<StatusCode> for Outcome {
	fn from(s: StatusCode) -> Self {
		Outcome::Status(s)
	}
}

impl From<Bytes> for Outcome {
	fn from(b: Bytes) -> Self {
		Outcome::Bytes(b)
	}
}
