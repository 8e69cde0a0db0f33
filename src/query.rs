//! Element search across every visible surface, and invocation of the match
//!
//! The search runs in two passes. The first uses the surfaces' indexed text
//! lookup, one text candidate at a time in priority order, across all
//! surfaces. If that finds nothing, a recursive pre-order walk of every
//! surface matches text candidates against node text and description
//! candidates against node descriptions. Both passes skip text inputs and
//! reject any node whose text+description contains an exclude candidate.
//!
//! A match carries an [`Invocation`] tag telling the caller which node will
//! receive the action and how much the platform vouched for it.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::driver::UiDriver;
use crate::error::DriverResult;
use crate::tree::{NodeId, UiNode, UiSurface};

/// Candidate label sets for one logical control.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementQuery {
	/// Visible text candidates, highest priority first
	pub text: Vec<String>,
	/// Accessible description candidates, used by the traversal pass
	pub description: Vec<String>,
	/// Substrings that disqualify a node (case-insensitive)
	pub exclude: Vec<String>,
}

impl ElementQuery {
	pub fn new<I, S>(text: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			text: text.into_iter().map(Into::into).collect(),
			..Default::default()
		}
	}

	pub fn with_descriptions<I, S>(mut self, description: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.description = description.into_iter().map(Into::into).collect();
		self
	}

	pub fn excluding<I, S>(mut self, exclude: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.exclude = exclude.into_iter().map(Into::into).collect();
		self
	}

	/// The relationship-control ("Following") button on a profile page
	pub fn relationship_control() -> Self {
		Self::new(["팔로잉", "팔로", "Following", "following"])
			.with_descriptions(["아래쪽 V자형 아이콘"])
			.excluding(["팔로워", "followers", "팔로우 취소", "Unfollow"])
	}

	/// The confirmation ("Unfollow") entry in the menu or dialog
	pub fn confirmation() -> Self {
		Self::new(["팔로우 취소", "Unfollow", "언팔로우", "unfollow"])
	}

	/// Run both passes and return the first match.
	pub fn find(&self, surfaces: &[UiSurface]) -> Option<ElementMatch> {
		self.find_indexed(surfaces)
			.or_else(|| {
				debug!("query: indexed pass found nothing, falling back to traversal");
				self.find_by_traversal(surfaces)
			})
	}

	fn find_indexed(&self, surfaces: &[UiSurface]) -> Option<ElementMatch> {
		for candidate in &self.text {
			for surface in surfaces {
				let hits = surface.find_by_text(candidate);
				trace!(
					"query: text '{candidate}' found {} nodes on surface {}",
					hits.len(),
					surface.id
				);
				for id in hits {
					let node = surface.node(id);
					if node.is_text_input() || self.is_excluded(node) {
						continue;
					}
					return Some(ElementMatch::resolve(surface, id));
				}
			}
		}
		None
	}

	fn find_by_traversal(&self, surfaces: &[UiSurface]) -> Option<ElementMatch> {
		surfaces.iter().find_map(|surface| {
			surface
				.iter()
				.find(|(_, node)| self.matches(node))
				.map(|(id, _)| ElementMatch::resolve(surface, id))
		})
	}

	fn matches(&self, node: &UiNode) -> bool {
		if node.is_text_input() {
			return false;
		}
		let text_hit = contains_any(&node.text, &self.text);
		let desc_hit = contains_any(&node.description, &self.description);
		(text_hit || desc_hit) && !self.is_excluded(node)
	}

	fn is_excluded(&self, node: &UiNode) -> bool {
		contains_any(&node.combined_label(), &self.exclude)
	}
}

/// Queries for the two controls the engine presses on every target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
	pub relationship_control: ElementQuery,
	pub confirmation: ElementQuery,
}

impl Default for LabelConfig {
	fn default() -> Self {
		Self {
			relationship_control: ElementQuery::relationship_control(),
			confirmation: ElementQuery::confirmation(),
		}
	}
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
	if haystack.is_empty() {
		return false;
	}
	let haystack = haystack.to_lowercase();
	needles
		.iter()
		.filter(|n| !n.is_empty())
		.any(|n| haystack.contains(&n.to_lowercase()))
}

/// How a matched element will be acted upon.
///
/// Web content often reports wrong actionability metadata, so a text or
/// description match alone is enough to attempt the action. `ForcedOnly`
/// accepts a small risk of acting on the wrong node in exchange for working
/// on pages whose metadata cannot be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
	/// The matched node itself is actionable
	Actionable(NodeId),
	/// The nearest actionable ancestor receives the action
	ActionableViaAncestor(NodeId),
	/// Nothing on the path is actionable; act on the matched node anyway
	ForcedOnly(NodeId),
}

impl Invocation {
	pub fn target(&self) -> NodeId {
		match *self {
			Invocation::Actionable(id)
			| Invocation::ActionableViaAncestor(id)
			| Invocation::ForcedOnly(id) => id,
		}
	}

	pub fn is_forced(&self) -> bool {
		matches!(self, Invocation::ForcedOnly(_))
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementMatch {
	/// `UiSurface::id` of the surface the match came from
	pub surface: usize,
	pub matched: NodeId,
	pub invocation: Invocation,
}

impl ElementMatch {
	fn resolve(surface: &UiSurface, matched: NodeId) -> Self {
		let node = surface.node(matched);
		let invocation = if node.actionable {
			Invocation::Actionable(matched)
		} else if let Some(ancestor) = surface
			.ancestors(matched)
			.find(|&a| surface.node(a).actionable)
		{
			Invocation::ActionableViaAncestor(ancestor)
		} else {
			Invocation::ForcedOnly(matched)
		};
		debug!(
			"query: match class={} text='{}' desc='{}' -> {:?}",
			node.class_name, node.text, node.description, invocation
		);
		Self {
			surface: surface.id,
			matched,
			invocation,
		}
	}
}

/// Find `query` on `surfaces` and invoke the match through `driver`.
///
/// Returns `Ok(false)` when nothing matched or the platform refused an
/// action it claimed to support. A forced invocation counts as success
/// whatever the platform answers.
pub async fn find_and_invoke(
	driver: &dyn UiDriver,
	surfaces: &[UiSurface],
	query: &ElementQuery,
) -> DriverResult<bool> {
	let Some(found) = query.find(surfaces) else {
		return Ok(false);
	};
	let Some(surface) = surfaces.iter().find(|s| s.id == found.surface) else {
		return Ok(false);
	};
	let target = found.invocation.target();
	let acknowledged = driver.perform_action(surface, target).await?;
	if found.invocation.is_forced() {
		if !acknowledged {
			debug!("query: forced invocation not acknowledged, treating as performed");
		}
		return Ok(true);
	}
	Ok(acknowledged)
}
