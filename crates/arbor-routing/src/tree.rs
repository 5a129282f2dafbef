//! Arena-backed path tree.
//!
//! Nodes live in a flat `Vec` and reference each other by index, so the
//! whole tree is `Send + Sync` without interior locking: it is mutated
//! only during boot and shared read-only behind an `Arc` afterwards.
//!
//! Resolution is two-phased. Registration-time lookups
//! ([`PathTree::node_by_path`], [`PathTree::exists`]) walk literal segment
//! names. Request-time lookups ([`PathTree::search_node_list`]) walk every
//! matching branch, literal and pattern alike, and settle ambiguity by
//! cumulative match weight, so a literal route always beats a pattern
//! route of the same depth.

use crate::node::{Node, NodeId, NodeKind};
use crate::segment::{dirname, names_of, schemas_of, Segment};
use crate::stage::{Converter, HandlerFn, Interceptor, Interferer, Redirector};
use arbor_http::{Context, Error, Outcome, Result};
use bytes::Bytes;
use hyper::{Method, StatusCode};
use std::collections::HashMap;
use std::fmt;

const ROOT: NodeId = 0;

/// Verdict of one pipeline node; anything but `Continue` stops the walk.
#[derive(Debug)]
pub enum Step {
	Continue,
	Redirect { path: String, skip: String },
	Intercept(String),
	Done(Outcome),
}

/// Alias placement deferred until the whole foreign structure is grafted,
/// so its target id can be remapped into this arena.
struct PendingAlias {
	name: String,
	pattern: Option<regex::Regex>,
	/// Alias-resolved target id in the source arena.
	target: NodeId,
	/// Parent id in this arena.
	parent: NodeId,
}

pub struct PathTree {
	nodes: Vec<Node>,
}

impl Default for PathTree {
	fn default() -> Self {
		Self::new()
	}
}

impl PathTree {
	pub fn new() -> Self {
		Self {
			nodes: vec![Node::new(ROOT, None, "/".to_string(), None, NodeKind::Root)],
		}
	}

	pub fn root(&self) -> NodeId {
		ROOT
	}

	pub fn node(&self, id: NodeId) -> &Node {
		&self.nodes[id]
	}

	/// Follow alias links to the node that actually owns children, stages
	/// and handlers.
	pub fn endpoint(&self, id: NodeId) -> NodeId {
		let mut cursor = id;
		while let NodeKind::Alias { target } = self.nodes[cursor].kind {
			cursor = target;
		}
		cursor
	}

	/// Create an interior node at `path`, creating missing ancestors.
	pub fn make_middle(&mut self, path: &str) -> Result<NodeId> {
		self.make(path, NodeKind::Plain)
	}

	/// Create a terminal endpoint at `path`, creating missing ancestors.
	pub fn make_end(&mut self, path: &str) -> Result<NodeId> {
		self.make(
			path,
			NodeKind::Terminal {
				handlers: HashMap::new(),
			},
		)
	}

	fn make(&mut self, path: &str, kind: NodeKind) -> Result<NodeId> {
		if path.is_empty() {
			return Err(Error::EmptyPath);
		}
		if self.exists(path) {
			return Err(Error::DuplicatePath(path.to_string()));
		}

		let schemas = schemas_of(path);
		let Some((last, ancestors)) = schemas.split_last() else {
			// only "/" resolves to no segments, and "/" always exists
			return Err(Error::DuplicatePath(path.to_string()));
		};

		let parent = self.ensure_branch(ancestors)?;
		let segment = Segment::parse(last)?;
		self.attach(parent, segment, kind)
	}

	/// Create an alias at `path` delegating to the node at `target_path`.
	pub fn make_link(&mut self, path: &str, target_path: &str) -> Result<NodeId> {
		if path.is_empty() {
			return Err(Error::EmptyPath);
		}
		if self.exists(path) {
			return Err(Error::DuplicatePath(path.to_string()));
		}
		let target = self
			.node_by_path(target_path)
			.ok_or_else(|| Error::UnknownPath(target_path.to_string()))?;

		let schemas = schemas_of(path);
		let Some((last, ancestors)) = schemas.split_last() else {
			return Err(Error::DuplicatePath(path.to_string()));
		};

		let parent = self.ensure_branch(ancestors)?;
		let segment = Segment::parse(last)?;
		self.attach(parent, segment, NodeKind::Alias { target })
	}

	/// Walk `schemas` from the root, creating interior nodes where the
	/// branch is missing.
	fn ensure_branch(&mut self, schemas: &[&str]) -> Result<NodeId> {
		let mut cursor = ROOT;
		for schema in schemas {
			let segment = Segment::parse(schema)?;
			let endpoint = self.endpoint(cursor);
			cursor = match self.child_by_name(endpoint, &segment.name) {
				Some(child) => child,
				None => self.attach(endpoint, segment, NodeKind::Plain)?,
			};
		}
		Ok(cursor)
	}

	fn attach(&mut self, parent: NodeId, segment: Segment, kind: NodeKind) -> Result<NodeId> {
		let endpoint = self.endpoint(parent);
		if !self.nodes[endpoint].kind.hosts_children() {
			return Err(Error::MountRefused {
				child: segment.name,
				parent: self.path_of(endpoint),
			});
		}
		if self.child_by_name(endpoint, &segment.name).is_some() {
			return Err(Error::DuplicatePath(segment.name));
		}
		Ok(self.push_child(endpoint, segment.name, segment.pattern, kind))
	}

	fn push_child(
		&mut self,
		parent: NodeId,
		name: String,
		pattern: Option<regex::Regex>,
		kind: NodeKind,
	) -> NodeId {
		let id = self.nodes.len();
		self.nodes
			.push(Node::new(id, Some(parent), name, pattern, kind));
		self.nodes[parent].children.push(id);
		id
	}

	fn child_by_name(&self, parent: NodeId, name: &str) -> Option<NodeId> {
		self.nodes[parent]
			.children
			.iter()
			.copied()
			.find(|&c| self.nodes[c].name == name)
	}

	/// Registration-time lookup by literal segment names.
	pub fn node_by_path(&self, path: &str) -> Option<NodeId> {
		if path.is_empty() {
			return None;
		}
		let mut cursor = ROOT;
		for name in names_of(path) {
			let endpoint = self.endpoint(cursor);
			cursor = self.child_by_name(endpoint, &name)?;
		}
		Some(cursor)
	}

	pub fn exists(&self, path: &str) -> bool {
		self.node_by_path(path).is_some()
	}

	/// Request-time resolution: the single best chain of nodes (root
	/// included) matching `path`, or empty when no branch consumes every
	/// segment. Nodes on the `skip` chain are filtered out of the result.
	pub fn search_node_list(&self, path: &str, skip: Option<&str>) -> Result<Vec<NodeId>> {
		if path.is_empty() {
			return Err(Error::EmptyPath);
		}

		let mut chains: Vec<(Vec<NodeId>, u32)> = vec![(vec![ROOT], 0)];
		for name in names_of(path) {
			let mut extended = Vec::new();
			for (chain, weight) in &chains {
				let tail = self.endpoint(*chain.last().unwrap_or(&ROOT));
				for &child in &self.nodes[tail].children {
					let node = &self.nodes[child];
					if node.is_match(&name) {
						let mut next = chain.clone();
						next.push(child);
						extended.push((next, weight + node.match_weight()));
					}
				}
			}
			if extended.is_empty() {
				return Ok(Vec::new());
			}
			chains = extended;
		}

		// max cumulative weight; ties settle toward the latest branch
		let mut best: Option<(Vec<NodeId>, u32)> = None;
		for (chain, weight) in chains {
			if best.as_ref().map(|(_, w)| weight >= *w).unwrap_or(true) {
				best = Some((chain, weight));
			}
		}
		let chain = best.map(|(c, _)| c).unwrap_or_default();

		let skipped = self.skip_chain(skip)?;
		Ok(chain.into_iter().filter(|id| !skipped.contains(id)).collect())
	}

	fn skip_chain(&self, skip: Option<&str>) -> Result<Vec<NodeId>> {
		match skip {
			Some(path) => self.search_node_list(path, None),
			None => Ok(Vec::new()),
		}
	}

	/// The full pipeline node list for `path`: the best chain, aliases
	/// resolved to their targets, each target expanded with its own
	/// ancestors so alias-crossed middleware still runs. Skipped nodes
	/// cut the expansion.
	pub fn search_full_node_list(&self, path: &str, skip: Option<&str>) -> Result<Vec<NodeId>> {
		let chain = self.search_node_list(path, skip)?;
		let skipped = self.skip_chain(skip)?;

		let mut list: Vec<NodeId> = Vec::new();
		for id in chain {
			let endpoint = self.endpoint(id);
			if list.contains(&endpoint) {
				continue;
			}
			let mut expand = vec![endpoint];
			let mut cursor = endpoint;
			while let Some(parent) = self.nodes[cursor].parent {
				if list.contains(&parent) || skipped.contains(&parent) {
					break;
				}
				expand.insert(0, parent);
				cursor = parent;
			}
			list.extend(expand);
		}
		Ok(list)
	}

	/// Does `path` resolve to a terminal endpoint at request time?
	pub fn search_end(&self, path: &str) -> Result<bool> {
		let chain = self.search_node_list(path, None)?;
		Ok(chain
			.last()
			.map(|&id| self.nodes[self.endpoint(id)].kind.binds_handlers())
			.unwrap_or(false))
	}

	fn require_endpoint(&self, path: &str) -> Result<NodeId> {
		self.node_by_path(path)
			.map(|id| self.endpoint(id))
			.ok_or_else(|| Error::UnknownPath(path.to_string()))
	}

	pub fn add_converter_by_path(&mut self, path: &str, method: Method, stage: Converter) -> Result<()> {
		let id = self.require_endpoint(path)?;
		self.nodes[id].stages.add_converter(method, stage);
		Ok(())
	}

	pub fn add_redirector_by_path(&mut self, path: &str, method: Method, stage: Redirector) -> Result<()> {
		let id = self.require_endpoint(path)?;
		self.nodes[id].stages.add_redirector(method, stage);
		Ok(())
	}

	pub fn add_interceptor_by_path(&mut self, path: &str, method: Method, stage: Interceptor) -> Result<()> {
		let id = self.require_endpoint(path)?;
		self.nodes[id].stages.add_interceptor(method, stage);
		Ok(())
	}

	pub fn add_interferer_by_path(&mut self, path: &str, method: Method, stage: Interferer) -> Result<()> {
		let id = self.require_endpoint(path)?;
		self.nodes[id].stages.add_interferer(method, stage);
		Ok(())
	}

	pub fn add_handler_by_path(&mut self, path: &str, method: Method, handler: HandlerFn) -> Result<()> {
		let id = self.require_endpoint(path)?;
		if !self.nodes[id].bind_handler(method, handler) {
			return Err(Error::NotTerminal(path.to_string()));
		}
		Ok(())
	}

	/// Run the pipeline for `path` and `method` over `ctx`.
	pub async fn process(
		&self,
		path: &str,
		method: &Method,
		ctx: &mut Context,
		skip: Option<&str>,
	) -> Result<Step> {
		let list = self.search_full_node_list(path, skip)?;
		for id in list {
			let step = self.process_node(id, method, ctx).await?;
			if !matches!(step, Step::Continue) {
				return Ok(step);
			}
		}
		Ok(Step::Continue)
	}

	async fn process_node(&self, id: NodeId, method: &Method, ctx: &mut Context) -> Result<Step> {
		let node = &self.nodes[id];
		tracing::debug!(node = %node.name, "pipeline enter");

		// pass: consume the first unclaimed segment this node matches and
		// capture its pattern groups
		if let Some(index) = ctx.paths.iter().position(|seg| node.is_match(seg)) {
			let fragment = ctx.paths.remove(index);
			if let Some(params) = node.extract_params(&fragment) {
				ctx.params.insert(node.name.clone(), params);
			}
		}

		for stage in node.stages.converters(method) {
			stage(ctx).await?;
		}

		let redirectors = node.stages.redirectors(method);
		if !redirectors.is_empty() {
			let verdicts =
				futures::future::join_all(redirectors.iter().map(|stage| stage(&*ctx))).await;
			for verdict in verdicts {
				if let Some(redirect) = verdict? {
					let skip = redirect
						.skip
						.unwrap_or_else(|| dirname(&redirect.path));
					return Ok(Step::Redirect {
						path: redirect.path,
						skip,
					});
				}
			}
		}

		let interceptors = node.stages.interceptors(method);
		if !interceptors.is_empty() {
			let verdicts =
				futures::future::join_all(interceptors.iter().map(|stage| stage(&*ctx))).await;
			for verdict in verdicts {
				if let Some(reason) = verdict? {
					return Ok(Step::Intercept(reason));
				}
			}
		}

		for stage in node.stages.interferers(method) {
			if let Err(err) = stage(&*ctx).await {
				tracing::warn!(node = %node.name, error = %err, "interferer failed");
			}
		}

		if node.kind.binds_handlers() {
			return match node.handler(method) {
				Some(handler) => Ok(Step::Done(handler(ctx).await?)),
				None if *method == Method::OPTIONS => {
					let allowed = node.bound_methods().join(", ");
					ctx.end(Some(Bytes::from(allowed))).await?;
					Ok(Step::Done(Outcome::Done))
				}
				None => Ok(Step::Done(Outcome::Status(StatusCode::METHOD_NOT_ALLOWED))),
			};
		}

		Ok(Step::Continue)
	}

	/// Graft every branch of `other` beneath the node `at`. Equally-named
	/// nodes merge: stages append, terminal handlers fill only missing
	/// methods. The foreign root's own stages land on the mount point.
	pub fn graft(&mut self, other: &PathTree, at: NodeId) -> Result<()> {
		let dst = self.endpoint(at);
		if !self.nodes[dst].kind.hosts_children() {
			return Err(Error::MountRefused {
				child: "/".to_string(),
				parent: self.path_of(dst),
			});
		}

		let mut map: HashMap<NodeId, NodeId> = HashMap::new();
		map.insert(other.root(), dst);
		let mut aliases: Vec<PendingAlias> = Vec::new();

		let children: Vec<NodeId> = other.nodes[other.root()].children.clone();
		for child in children {
			self.graft_node(other, child, dst, &mut map, &mut aliases)?;
		}

		let root_stages = other.nodes[other.root()].stages.clone();
		self.nodes[dst].stages.absorb(&root_stages);

		for pending in aliases {
			let target = map
				.get(&pending.target)
				.copied()
				.ok_or_else(|| Error::UnknownPath(other.path_of(pending.target)))?;
			if self.child_by_name(pending.parent, &pending.name).is_some() {
				return Err(Error::DuplicatePath(pending.name));
			}
			self.push_child(
				pending.parent,
				pending.name,
				pending.pattern,
				NodeKind::Alias { target },
			);
		}
		Ok(())
	}

	fn graft_node(
		&mut self,
		other: &PathTree,
		src: NodeId,
		dst_parent: NodeId,
		map: &mut HashMap<NodeId, NodeId>,
		aliases: &mut Vec<PendingAlias>,
	) -> Result<()> {
		let node = &other.nodes[src];

		if let NodeKind::Alias { target } = node.kind {
			aliases.push(PendingAlias {
				name: node.name.clone(),
				pattern: node.pattern.clone(),
				target: other.endpoint(target),
				parent: dst_parent,
			});
			return Ok(());
		}

		let dst = match self.child_by_name(dst_parent, &node.name) {
			Some(existing) => {
				if !self.nodes[existing].kind.merges_with(&node.kind) {
					return Err(Error::MountRefused {
						child: node.name.clone(),
						parent: self.path_of(dst_parent),
					});
				}
				self.nodes[existing].stages.absorb(&node.stages);
				if let (
					NodeKind::Terminal { handlers },
					NodeKind::Terminal { handlers: incoming },
				) = (&mut self.nodes[existing].kind, &node.kind)
				{
					for (method, handler) in incoming {
						handlers
							.entry(method.clone())
							.or_insert_with(|| handler.clone());
					}
				}
				existing
			}
			None => {
				if !self.nodes[dst_parent].kind.hosts_children() {
					return Err(Error::MountRefused {
						child: node.name.clone(),
						parent: self.path_of(dst_parent),
					});
				}
				let kind = match &node.kind {
					NodeKind::Terminal { handlers } => NodeKind::Terminal {
						handlers: handlers.clone(),
					},
					_ => NodeKind::Plain,
				};
				let id = self.push_child(dst_parent, node.name.clone(), node.pattern.clone(), kind);
				self.nodes[id].stages = node.stages.clone();
				id
			}
		};

		map.insert(src, dst);
		for &child in &node.children {
			self.graft_node(other, child, dst, map, aliases)?;
		}
		Ok(())
	}

	/// Literal path of a node, for diagnostics.
	pub fn path_of(&self, id: NodeId) -> String {
		if id == ROOT {
			return "/".to_string();
		}
		let mut parts = Vec::new();
		let mut cursor = Some(id);
		while let Some(c) = cursor {
			if c == ROOT {
				break;
			}
			parts.push(self.nodes[c].name.clone());
			cursor = self.nodes[c].parent;
		}
		parts.reverse();
		format!("/{}", parts.join("/"))
	}

	fn label(&self, id: NodeId) -> String {
		let node = &self.nodes[id];
		match &node.kind {
			NodeKind::Alias { target } => {
				format!("{} -> {}", node.name, self.path_of(self.endpoint(*target)))
			}
			NodeKind::Terminal { .. } => {
				let methods = node.bound_methods().join(", ");
				match &node.pattern {
					Some(p) => format!("{}:({}): {}", node.name, p, methods),
					None => format!("{}: {}", node.name, methods),
				}
			}
			_ => match &node.pattern {
				Some(p) => format!("{}:({})", node.name, p),
				None => node.name.clone(),
			},
		}
	}

	fn fmt_node(&self, f: &mut fmt::Formatter<'_>, id: NodeId, prefix: &str) -> fmt::Result {
		let children = &self.nodes[id].children;
		for (i, &child) in children.iter().enumerate() {
			let last = i + 1 == children.len();
			let branch = if last { "└── " } else { "├── " };
			writeln!(f, "{}{}{}", prefix, branch, self.label(child))?;
			if !matches!(self.nodes[child].kind, NodeKind::Alias { .. }) {
				let deeper = format!("{}{}", prefix, if last { "    " } else { "│   " });
				self.fmt_node(f, child, &deeper)?;
			}
		}
		Ok(())
	}
}

impl fmt::Display for PathTree {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "/")?;
		self.fmt_node(f, ROOT, "")
	}
}
