//! Tree nodes and the closed node-kind taxonomy.
//!
//! Every node carries a segment (literal name, optional anchored pattern)
//! and a per-method stage set. A node's role lives in [`NodeKind`]: plain
//! branch, tree root, terminal endpoint or alias. Capability questions are
//! answered by the kind.

use crate::stage::{HandlerFn, StageSet};
use hyper::Method;
use regex::Regex;
use std::collections::HashMap;

/// Arena index of a node inside its [`crate::PathTree`].
pub type NodeId = usize;

/// The closed set of node roles.
pub enum NodeKind {
	/// Interior branch node; hosts children, never handlers.
	Plain,
	/// The single `/` node at the top of a tree.
	Root,
	/// Endpoint leaf with its per-method handler bindings.
	Terminal { handlers: HashMap<Method, HandlerFn> },
	/// Delegates children, stages and handlers to another node.
	Alias { target: NodeId },
}

impl NodeKind {
	/// May further segments be grafted beneath this node?
	///
	/// Asked of the alias-resolved endpoint; an alias itself is never the
	/// endpoint of anything.
	pub fn hosts_children(&self) -> bool {
		matches!(self, NodeKind::Plain | NodeKind::Root)
	}

	/// May a handler be bound here?
	pub fn binds_handlers(&self) -> bool {
		matches!(self, NodeKind::Terminal { .. })
	}

	/// Can an equally-named incoming node be merged into this one?
	/// Aliases never merge; the other kinds merge with their own kind.
	pub fn merges_with(&self, other: &NodeKind) -> bool {
		match (self, other) {
			(NodeKind::Plain, NodeKind::Plain) => true,
			(NodeKind::Root, NodeKind::Root) => true,
			(NodeKind::Terminal { .. }, NodeKind::Terminal { .. }) => true,
			_ => false,
		}
	}
}

/// One node of the path tree.
pub struct Node {
	pub id: NodeId,
	pub parent: Option<NodeId>,
	/// Pattern-stripped segment name; unique among siblings.
	pub name: String,
	/// Anchored match pattern for `name:pattern` segments.
	pub pattern: Option<Regex>,
	pub children: Vec<NodeId>,
	pub stages: StageSet,
	pub kind: NodeKind,
}

impl Node {
	pub(crate) fn new(
		id: NodeId,
		parent: Option<NodeId>,
		name: String,
		pattern: Option<Regex>,
		kind: NodeKind,
	) -> Self {
		Self {
			id,
			parent,
			name,
			pattern,
			children: Vec::new(),
			stages: StageSet::default(),
			kind,
		}
	}

	/// Does `fragment` match this node? Pattern nodes match by regex,
	/// literal nodes by name equality.
	pub fn is_match(&self, fragment: &str) -> bool {
		match &self.pattern {
			Some(pattern) => pattern.is_match(fragment),
			None => self.name == fragment,
		}
	}

	/// Disambiguation weight of one matched segment. A literal segment
	/// outweighs a pattern segment, so `/user/list` beats `/user/id:(.+)`
	/// on cumulative weight.
	pub fn match_weight(&self) -> u32 {
		if self.pattern.is_some() {
			9
		} else {
			10
		}
	}

	/// Captured groups for a pattern node, full match first. Literal nodes
	/// capture nothing.
	pub fn extract_params(&self, fragment: &str) -> Option<Vec<String>> {
		let pattern = self.pattern.as_ref()?;
		let captures = pattern.captures(fragment)?;
		Some(
			captures
				.iter()
				.map(|c| c.map(|m| m.as_str().to_string()).unwrap_or_default())
				.collect(),
		)
	}

	/// Bind `handler` for `method`. The binding replaces an existing one.
	pub(crate) fn bind_handler(&mut self, method: Method, handler: HandlerFn) -> bool {
		match &mut self.kind {
			NodeKind::Terminal { handlers } => {
				handlers.insert(method, handler);
				true
			}
			_ => false,
		}
	}

	/// Bound handler for `method`, if this is a terminal node.
	pub fn handler(&self, method: &Method) -> Option<HandlerFn> {
		match &self.kind {
			NodeKind::Terminal { handlers } => handlers.get(method).cloned(),
			_ => None,
		}
	}

	/// Sorted method names bound on a terminal node, for `OPTIONS` and the
	/// tree dump.
	pub fn bound_methods(&self) -> Vec<String> {
		match &self.kind {
			NodeKind::Terminal { handlers } => {
				let mut methods: Vec<String> =
					handlers.keys().map(|m| m.as_str().to_string()).collect();
				methods.sort();
				methods
			}
			_ => Vec::new(),
		}
	}
}
