//! Path-tree router and staged middleware pipeline.
//!
//! Requests resolve against a trie-like tree of literal and pattern
//! segments. The matched node's full ancestor chain is executed as a
//! pipeline: each node passes a path segment, then runs its converter,
//! redirector, interceptor and interferer stages, and a terminal node
//! finally invokes the bound handler for the request method.
//!
//! The tree is built during a single-threaded boot phase (`&mut`
//! registration) and is read-only at request time; wrapping the
//! [`Router`] in an `Arc` after boot freezes it without locks.

pub mod node;
pub mod router;
pub mod segment;
pub mod stage;
pub mod tree;

pub use node::{Node, NodeId, NodeKind};
pub use router::{error_hook, ErrorHook, Router, MAX_REDIRECT_HOPS, SUPPORTED_METHODS};
pub use segment::{dirname, Segment};
pub use stage::{
	converter, handler, interceptor, interferer, redirector, Converter, HandlerFn, Interceptor,
	Interferer, Redirect, Redirector, StageSet,
};
pub use tree::{PathTree, Step};
