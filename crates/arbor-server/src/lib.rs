//! Transport glue: the hyper accept loop feeding contexts into a router,
//! and the wiring that exposes the signed RPC endpoint on one.

pub mod http;
pub mod rpc;

pub use http::HttpServer;
pub use rpc::register_rpc;
