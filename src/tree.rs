//! UI element model shared by every backend
//!
//! Backends hand the engine a list of [`UiSurface`]s, one per visible window
//! or document. Each surface is an arena of nodes with parent links so the
//! query layer can walk upward to an actionable ancestor without asking the
//! backend again.

use serde::{Deserialize, Serialize};
use tracing::{debug, enabled, trace, Level};

/// Nested element description as produced by a backend or a recorded fixture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiElement {
	/// Platform class or tag name, e.g. `android.widget.Button` or `button`
	pub class_name: String,
	pub text: Option<String>,
	/// Accessible description / aria-label
	pub description: Option<String>,
	pub actionable: bool,
	/// Marks text inputs, which are never treated as matches
	pub editable: bool,
	/// Backend locator used to invoke the element later
	pub handle: Option<String>,
	pub children: Vec<UiElement>,
}

impl UiElement {
	pub fn new(class_name: impl Into<String>) -> Self {
		Self {
			class_name: class_name.into(),
			..Default::default()
		}
	}

	pub fn with_text(mut self, text: impl Into<String>) -> Self {
		self.text = Some(text.into());
		self
	}

	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.description = Some(description.into());
		self
	}

	pub fn actionable(mut self) -> Self {
		self.actionable = true;
		self
	}

	pub fn editable(mut self) -> Self {
		self.editable = true;
		self
	}

	pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
		self.handle = Some(handle.into());
		self
	}

	pub fn with_child(mut self, child: UiElement) -> Self {
		self.children.push(child);
		self
	}
}

/// Index of a node inside one [`UiSurface`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
	pub fn index(self) -> usize {
		self.0
	}
}

/// Flattened node with its relationships resolved
#[derive(Debug, Clone)]
pub struct UiNode {
	pub class_name: String,
	pub text: String,
	pub description: String,
	pub actionable: bool,
	pub editable: bool,
	pub handle: Option<String>,
	pub parent: Option<NodeId>,
	pub children: Vec<NodeId>,
	pub depth: usize,
}

impl UiNode {
	pub fn is_text_input(&self) -> bool {
		self.editable || self.class_name.contains("EditText")
	}

	/// Text and description joined the way exclusion checks see them
	pub fn combined_label(&self) -> String {
		format!("{} {}", self.text, self.description)
	}
}

/// One visible window/document, stored in pre-order.
#[derive(Debug, Clone)]
pub struct UiSurface {
	pub id: usize,
	nodes: Vec<UiNode>,
	/// Lowercase (text, description) per node, parallel to `nodes`
	labels: Vec<(String, String)>,
}

impl UiSurface {
	pub fn from_root(id: usize, root: &UiElement) -> Self {
		let mut nodes = Vec::new();
		flatten(root, None, 0, &mut nodes);
		let labels = nodes
			.iter()
			.map(|n| (n.text.to_lowercase(), n.description.to_lowercase()))
			.collect();
		Self { id, nodes, labels }
	}

	pub fn from_roots<'a>(roots: impl IntoIterator<Item = &'a UiElement>) -> Vec<Self> {
		roots
			.into_iter()
			.enumerate()
			.map(|(id, root)| Self::from_root(id, root))
			.collect()
	}

	pub fn root(&self) -> NodeId {
		NodeId(0)
	}

	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	pub fn node(&self, id: NodeId) -> &UiNode {
		&self.nodes[id.0]
	}

	pub fn get(&self, id: NodeId) -> Option<&UiNode> {
		self.nodes.get(id.0)
	}

	/// Iterate nodes in pre-order (document order)
	pub fn iter(&self) -> impl Iterator<Item = (NodeId, &UiNode)> {
		self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
	}

	pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
		Ancestors {
			surface: self,
			next: self.node(id).parent,
		}
	}

	/// Indexed lookup over the cached lowercase labels: nodes whose text or
	/// description contains `needle`, ignoring case, in document order.
	pub fn find_by_text(&self, needle: &str) -> Vec<NodeId> {
		if needle.is_empty() {
			return Vec::new();
		}
		let needle = needle.to_lowercase();
		self.labels
			.iter()
			.enumerate()
			.filter(|(_, (text, description))| text.contains(&needle) || description.contains(&needle))
			.map(|(i, _)| NodeId(i))
			.collect()
	}
}

pub struct Ancestors<'a> {
	surface: &'a UiSurface,
	next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
	type Item = NodeId;

	fn next(&mut self) -> Option<NodeId> {
		let current = self.next?;
		self.next = self.surface.node(current).parent;
		Some(current)
	}
}

fn flatten(element: &UiElement, parent: Option<NodeId>, depth: usize, out: &mut Vec<UiNode>) -> NodeId {
	let id = NodeId(out.len());
	out.push(UiNode {
		class_name: element.class_name.clone(),
		text: element.text.clone().unwrap_or_default(),
		description: element.description.clone().unwrap_or_default(),
		actionable: element.actionable,
		editable: element.editable,
		handle: element.handle.clone(),
		parent,
		children: Vec::with_capacity(element.children.len()),
		depth,
	});
	for child in &element.children {
		let child_id = flatten(child, Some(id), depth + 1, out);
		out[id.0].children.push(child_id);
	}
	id
}

/// Render one surface the way diagnostic dumps print it. Only nodes that carry
/// text, a description or an action are listed.
pub fn render_surface(surface: &UiSurface) -> Vec<String> {
	surface
		.iter()
		.filter(|(_, n)| !n.text.is_empty() || !n.description.is_empty() || n.actionable)
		.map(|(_, n)| {
			format!(
				"{}[{}] text='{}' desc='{}' click={}",
				"  ".repeat(n.depth),
				n.class_name,
				n.text,
				n.description,
				n.actionable
			)
		})
		.collect()
}

/// Write every surface to the debug log for offline diagnosis.
pub fn dump_surfaces(surfaces: &[UiSurface], reason: &str) {
	if !enabled!(Level::DEBUG) {
		return;
	}
	if surfaces.is_empty() {
		debug!("DUMP ({reason}): no surfaces available");
		return;
	}
	for surface in surfaces {
		debug!("DUMP ({reason}): ===== surface {} =====", surface.id);
		for line in render_surface(surface) {
			debug!("DUMP: {line}");
		}
	}
	debug!("DUMP ({reason}): ===== end =====");
}

/// Same as [`dump_surfaces`] at trace level; used after every page load.
pub fn trace_surfaces(surfaces: &[UiSurface]) {
	if !enabled!(Level::TRACE) {
		return;
	}
	for surface in surfaces {
		for line in render_surface(surface) {
			trace!("TREE[{}]: {line}", surface.id);
		}
	}
}
