//! Cross-module service calls and the RPC transports behind them.
//!
//! Every module registers its services in a [`ModuleRegistry`]. A
//! [`ServiceCaller`] answers `module.service(args)` calls locally when the
//! module lives in this process and falls through to an [`RpcChannel`]
//! otherwise. Two channels exist: the signed HTTP channel
//! ([`SignedChannel`]) with timestamped digest headers, and the schema
//! channel ([`SchemaChannel`]) speaking keyed field documents derived from
//! a synthesized wire schema.

pub mod channel;
pub mod error;
pub mod registry;
pub mod schema;
pub mod signed;

pub use channel::{as_binary, binary_value, RpcChannel};
pub use error::RpcError;
pub use registry::{service_fn, ModuleDescriptor, ModuleRegistry, ServiceCaller, ServiceFn};
pub use schema::{
	decode_args, encode_args, normalize_name, SchemaChannel, WireField, WireSchema, WireService,
	MAX_FIELD_TAG,
};
pub use signed::{now_millis, sign, SignedChannel, SignedConfig, REPLAY_WINDOW_MS};
