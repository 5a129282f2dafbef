//! Schema channel: keyed field documents over HTTP.
//!
//! Positional service arguments travel as a flat JSON document whose keys
//! carry the field tag and name, `{"1:args0": .., "2:args1": ..}`; the
//! result comes back under the single `1:output` key. The wire schema for
//! every local module is synthesized from the registry at boot, both for
//! dispatch and as a renderable description of what the process serves.

use crate::channel::RpcChannel;
use crate::error::RpcError;
use crate::registry::{ModuleDescriptor, ModuleRegistry};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::net::TcpListener;

/// One tagged field of a wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireField {
	pub tag: u32,
	pub name: String,
}

/// One service: its input fields and single output field.
#[derive(Debug, Clone)]
pub struct WireService {
	pub name: String,
	pub input: Vec<WireField>,
	pub output: WireField,
}

/// Wire description of one module.
#[derive(Debug, Clone)]
pub struct WireSchema {
	pub namespace: String,
	pub module: String,
	pub services: Vec<WireService>,
}

/// Wire names reject `-`; module names may carry it.
pub fn normalize_name(name: &str) -> String {
	name.replace('-', "")
}

/// Flatten positional arguments into a keyed document. Null arguments
/// are left out; their tag gap is restored on decode.
pub fn encode_args(args: &[Value]) -> Map<String, Value> {
	let mut doc = Map::new();
	for (index, value) in args.iter().enumerate() {
		if value.is_null() {
			continue;
		}
		doc.insert(format!("{}:args{}", index + 1, index), value.clone());
	}
	doc
}

/// Widest argument list a keyed document may describe. Tags are
/// remote-controlled and size the decoded list, so they must be bounded
/// before any allocation happens.
pub const MAX_FIELD_TAG: usize = 64;

/// Rebuild the positional argument list from a keyed document, filling
/// tag gaps with null. Keys without a numeric tag prefix are ignored;
/// a tag beyond [`MAX_FIELD_TAG`] is a codec error.
pub fn decode_args(doc: &Map<String, Value>) -> Result<Vec<Value>, RpcError> {
	let mut args: Vec<Value> = Vec::new();
	for (key, value) in doc {
		let Some(tag) = key.split(':').next().and_then(|t| t.parse::<usize>().ok()) else {
			continue;
		};
		if tag == 0 {
			continue;
		}
		if tag > MAX_FIELD_TAG {
			return Err(RpcError::Codec(format!("field tag {tag} out of range")));
		}
		if args.len() < tag {
			args.resize(tag, Value::Null);
		}
		args[tag - 1] = value.clone();
	}
	Ok(args)
}

impl WireSchema {
	/// Build the schema of a module from its registered services.
	pub fn synthesize(namespace: &str, module: &ModuleDescriptor) -> Self {
		let mut services: Vec<WireService> = module
			.services()
			.map(|(name, arity)| WireService {
				name: name.to_string(),
				input: (0..arity)
					.map(|i| WireField {
						tag: (i + 1) as u32,
						name: format!("args{i}"),
					})
					.collect(),
				output: WireField {
					tag: 1,
					name: "output".to_string(),
				},
			})
			.collect();
		services.sort_by(|a, b| a.name.cmp(&b.name));

		Self {
			namespace: normalize_name(namespace),
			module: normalize_name(module.name()),
			services,
		}
	}

	/// Human-readable dump of the schema.
	pub fn render(&self) -> String {
		let mut out = String::new();
		let _ = writeln!(out, "package {}.{};", self.namespace, self.module);
		for service in &self.services {
			let inputs: Vec<String> = service
				.input
				.iter()
				.map(|f| format!("{}:{}", f.tag, f.name))
				.collect();
			let _ = writeln!(
				out,
				"service {}({}) -> {}:{};",
				service.name,
				inputs.join(", "),
				service.output.tag,
				service.output.name,
			);
		}
		out
	}
}

/// Keyed-document RPC over HTTP, serving the local registry and calling
/// remote peers that speak the same convention.
pub struct SchemaChannel {
	namespace: String,
	/// Base url of the remote peer, for outbound calls.
	peer_url: String,
	registry: Arc<ModuleRegistry>,
	schemas: HashMap<String, WireSchema>,
	client: reqwest::Client,
}

impl SchemaChannel {
	pub fn new(namespace: &str, peer_url: impl Into<String>, registry: Arc<ModuleRegistry>) -> Self {
		let schemas = registry
			.modules()
			.map(|module| {
				let schema = WireSchema::synthesize(namespace, module);
				(schema.module.clone(), schema)
			})
			.collect();
		Self {
			namespace: normalize_name(namespace),
			peer_url: peer_url.into(),
			registry,
			schemas,
			client: reqwest::Client::new(),
		}
	}

	pub fn schema(&self, module: &str) -> Option<&WireSchema> {
		self.schemas.get(&normalize_name(module))
	}

	/// Answer one inbound keyed-document call.
	pub async fn dispatch(
		&self,
		module: &str,
		service: &str,
		doc: &Map<String, Value>,
	) -> Result<Map<String, Value>, RpcError> {
		let module = normalize_name(module);
		let schema = self
			.schemas
			.get(&module)
			.ok_or_else(|| RpcError::ModuleNotFound(module.clone()))?;

		// registry keys keep the raw module name; schemas the normalized one
		let raw_name = self
			.registry
			.modules()
			.find(|m| normalize_name(m.name()) == module)
			.map(|m| m.name().to_string())
			.ok_or_else(|| RpcError::ModuleNotFound(module.clone()))?;

		if !schema.services.iter().any(|s| s.name == service) {
			return Err(RpcError::ServiceNotFound {
				module,
				service: service.to_string(),
			});
		}

		let args = decode_args(doc)?;
		let output = self.registry.service_call(&raw_name, service, args).await?;

		let mut reply = Map::new();
		reply.insert("1:output".to_string(), output);
		Ok(reply)
	}

	async fn handle(self: Arc<Self>, req: Request<Incoming>) -> Response<Full<Bytes>> {
		match self.try_handle(req).await {
			Ok(reply) => {
				let body = Value::Object(reply).to_string();
				Response::builder()
					.status(StatusCode::OK)
					.header("content-type", "application/json")
					.body(Full::new(Bytes::from(body)))
					.unwrap_or_default()
			}
			Err(err) => {
				tracing::error!(error = %err, "schema dispatch failed");
				Response::builder()
					.status(StatusCode::INTERNAL_SERVER_ERROR)
					.header("content-type", "text/plain")
					.body(Full::new(Bytes::from(err.to_string())))
					.unwrap_or_default()
			}
		}
	}

	async fn try_handle(&self, req: Request<Incoming>) -> Result<Map<String, Value>, RpcError> {
		if req.method() != Method::POST {
			return Err(RpcError::Transport("schema calls are POST only".to_string()));
		}

		let path = req.uri().path().to_string();
		let mut segments = path.split('/').filter(|s| !s.is_empty());
		let (Some(namespace), Some(module), Some(service)) =
			(segments.next(), segments.next(), segments.next())
		else {
			return Err(RpcError::Transport(format!("malformed schema path: {path}")));
		};
		if namespace != self.namespace {
			return Err(RpcError::Transport(format!("unknown namespace: {namespace}")));
		}
		let module = module.to_string();
		let service = service.to_string();

		let body = req
			.into_body()
			.collect()
			.await
			.map_err(|err| RpcError::Transport(err.to_string()))?
			.to_bytes();
		let doc: Map<String, Value> = if body.is_empty() {
			Map::new()
		} else {
			serde_json::from_slice(&body)?
		};

		self.dispatch(&module, &service, &doc).await
	}

	/// Serve inbound schema calls on `listener` until the task is dropped.
	pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
		loop {
			let (stream, peer) = listener.accept().await?;
			let channel = self.clone();
			tokio::spawn(async move {
				let io = TokioIo::new(stream);
				let service = service_fn(move |req| {
					let channel = channel.clone();
					async move { Ok::<_, std::convert::Infallible>(channel.handle(req).await) }
				});
				if let Err(err) = ConnBuilder::new(TokioExecutor::new())
					.serve_connection(io, service)
					.await
				{
					tracing::debug!(peer = %peer, error = %err, "schema connection closed");
				}
			});
		}
	}
}

#[async_trait]
impl RpcChannel for SchemaChannel {
	async fn send(&self, module: &str, service: &str, args: &[Value]) -> Result<Value, RpcError> {
		let module = normalize_name(module);
		let url = format!("{}/{}/{}/{}", self.peer_url, self.namespace, module, service);
		let doc = encode_args(args);

		let response = self.client.post(&url).json(&doc).send().await?;
		if !response.status().is_success() {
			let msg = response.text().await.unwrap_or_default();
			return Err(RpcError::Remote(msg));
		}

		let mut reply: Map<String, Value> = response.json().await?;
		Ok(reply.remove("1:output").unwrap_or(Value::Null))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::registry::service_fn as svc;
	use rstest::rstest;
	use serde_json::json;

	fn registry() -> ModuleRegistry {
		let mut registry = ModuleRegistry::new();
		registry.register(
			ModuleDescriptor::new("user-center")
				.service(
					"find",
					2,
					svc(|args| Box::pin(async move { Ok(json!({ "args": args })) })),
				)
				.service("ping", 0, svc(|_| Box::pin(async { Ok(json!("pong")) }))),
		);
		registry
	}

	#[test]
	fn encode_skips_nulls_and_decode_restores_gaps() {
		let args = vec![json!("a"), Value::Null, json!(3)];
		let doc = encode_args(&args);

		assert_eq!(doc.len(), 2);
		assert_eq!(doc["1:args0"], json!("a"));
		assert_eq!(doc["3:args2"], json!(3));

		assert_eq!(decode_args(&doc).unwrap(), args);
	}

	#[test]
	fn oversized_field_tag_is_a_codec_error() {
		let mut doc = Map::new();
		doc.insert("18446744073709551615:x".to_string(), json!(1));
		assert!(matches!(decode_args(&doc), Err(RpcError::Codec(_))));

		// large enough to allocate gigabytes if it ever reached resize
		let mut doc = Map::new();
		doc.insert("8589934592:y".to_string(), json!(1));
		assert!(matches!(decode_args(&doc), Err(RpcError::Codec(_))));

		let mut doc = Map::new();
		doc.insert(format!("{}:z", MAX_FIELD_TAG), json!("edge"));
		let args = decode_args(&doc).unwrap();
		assert_eq!(args.len(), MAX_FIELD_TAG);
		assert_eq!(args[MAX_FIELD_TAG - 1], json!("edge"));
	}

	#[tokio::test]
	async fn dispatch_refuses_oversized_tags_without_panicking() {
		let channel = SchemaChannel::new("acme", "http://127.0.0.1:0", Arc::new(registry()));

		let mut doc = Map::new();
		doc.insert("18446744073709551615:x".to_string(), json!(1));
		assert!(matches!(
			channel.dispatch("user-center", "find", &doc).await,
			Err(RpcError::Codec(_))
		));
	}

	#[rstest]
	#[case("user-center", "usercenter")]
	#[case("shop", "shop")]
	#[case("a-b-c", "abc")]
	fn wire_names_drop_dashes(#[case] raw: &str, #[case] expected: &str) {
		assert_eq!(normalize_name(raw), expected);
	}

	#[test]
	fn synthesized_schema_lists_tagged_fields() {
		let registry = registry();
		let module = registry.module("user-center").unwrap();
		let schema = WireSchema::synthesize("acme", module);

		assert_eq!(schema.module, "usercenter");
		let find = schema.services.iter().find(|s| s.name == "find").unwrap();
		assert_eq!(find.input.len(), 2);
		assert_eq!(find.input[0].tag, 1);
		assert_eq!(find.input[0].name, "args0");
		assert_eq!(find.output.name, "output");

		let rendered = schema.render();
		assert!(rendered.contains("package acme.usercenter;"));
		assert!(rendered.contains("service find(1:args0, 2:args1) -> 1:output;"));
	}

	#[tokio::test]
	async fn dispatch_decodes_calls_and_wraps_output() {
		let channel = SchemaChannel::new("acme", "http://127.0.0.1:0", Arc::new(registry()));

		let doc = encode_args(&[json!(7), json!("x")]);
		let reply = channel.dispatch("user-center", "find", &doc).await.unwrap();
		assert_eq!(reply["1:output"], json!({ "args": [7, "x"] }));

		// normalized module name reaches the same service
		let reply = channel.dispatch("usercenter", "ping", &Map::new()).await.unwrap();
		assert_eq!(reply["1:output"], json!("pong"));
	}

	#[tokio::test]
	async fn dispatch_rejects_unknown_module_and_service() {
		let channel = SchemaChannel::new("acme", "http://127.0.0.1:0", Arc::new(registry()));

		assert!(matches!(
			channel.dispatch("ghost", "find", &Map::new()).await,
			Err(RpcError::ModuleNotFound(_))
		));
		assert!(matches!(
			channel.dispatch("user-center", "missing", &Map::new()).await,
			Err(RpcError::ServiceNotFound { .. })
		));
	}
}
