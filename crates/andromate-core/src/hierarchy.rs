//! Parsing and querying uiautomator hierarchy dumps.
//!
//! A dump is an XML document rooted at `<hierarchy>` whose elements are all
//! named `<node>`. [`Hierarchy::parse`] turns it into a tree of
//! [`ViewNode`]s; [`find_node`] is the single predicate-driven search used by
//! every "find by" and "tap by" operation in the crate.
//!
//! # Example
//!
//! ```
//! use andromate_core::hierarchy::{Hierarchy, Selector, center_of};
//!
//! let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
//! <hierarchy rotation="0">
//!   <node resource-id="com.example:id/login" text="Log in" bounds="[0,0][100,50]"/>
//! </hierarchy>"#;
//!
//! let hierarchy = Hierarchy::parse(xml).unwrap();
//! let login = hierarchy.find(Selector::ResourceId, "id/login");
//! assert_eq!(center_of(login).unwrap().map(|p| (p.x, p.y)), Some((50, 25)));
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::element::{Attributes, BoundsError, Point, ViewNode, CONTENT_DESC, RESOURCE_ID, TEXT};

const ROOT_TAG: &str = "hierarchy";
const NODE_TAG: &str = "node";

/// Errors produced while turning dump text into a [`Hierarchy`].
#[derive(Error, Debug)]
pub enum HierarchyError {
    /// The text is not well-formed XML.
    #[error("XML parse error: {0}")]
    Xml(#[from] roxmltree::Error),

    /// The document root is not `<hierarchy>`.
    #[error("unexpected root element '{0}', expected <hierarchy>")]
    UnexpectedRoot(String),
}

/// The attribute a query matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Selector {
    /// `resource-id`, e.g. `com.example:id/login_button`.
    ResourceId,
    /// `content-desc`, the accessibility description.
    ContentDesc,
    /// `text`, the visible text.
    Text,
}

impl Selector {
    /// The dump attribute name this selector matches.
    pub fn key(&self) -> &'static str {
        match self {
            Selector::ResourceId => RESOURCE_ID,
            Selector::ContentDesc => CONTENT_DESC,
            Selector::Text => TEXT,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Selector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" | "resource-id" => Ok(Selector::ResourceId),
            "desc" | "content-desc" => Ok(Selector::ContentDesc),
            "text" => Ok(Selector::Text),
            other => Err(format!(
                "unknown selector '{}', expected one of: id, desc, text",
                other
            )),
        }
    }
}

/// A parsed view hierarchy dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hierarchy {
    /// Attributes of the `<hierarchy>` root itself (e.g. `rotation`).
    pub attributes: Attributes,
    /// Top-level elements in document order.
    pub nodes: Vec<ViewNode>,
}

impl Hierarchy {
    /// Parses the XML text of a uiautomator dump.
    ///
    /// Only `<node>` elements are taken as part of the tree; any other
    /// element or text content is ignored.
    ///
    /// # Errors
    ///
    /// - [`HierarchyError::Xml`] if the text is not well-formed XML
    /// - [`HierarchyError::UnexpectedRoot`] if the root is not `<hierarchy>`
    pub fn parse(xml: &str) -> Result<Self, HierarchyError> {
        let doc = roxmltree::Document::parse(xml.trim())?;
        let root = doc.root_element();
        if !root.has_tag_name(ROOT_TAG) {
            return Err(HierarchyError::UnexpectedRoot(
                root.tag_name().name().to_string(),
            ));
        }

        Ok(Hierarchy {
            attributes: element_attributes(root),
            nodes: child_nodes(root),
        })
    }

    /// Returns the first node whose `selector` attribute contains `value`.
    pub fn find(&self, selector: Selector, value: &str) -> Option<&ViewNode> {
        find_node(&self.nodes, selector.key(), value)
    }

    /// Flattened list of nodes that carry a non-empty id, description or text.
    pub fn identifiable(&self) -> Vec<&ViewNode> {
        flatten_identifiable(&self.nodes)
    }
}

fn element_attributes(element: roxmltree::Node<'_, '_>) -> Attributes {
    element
        .attributes()
        .map(|a| (a.name().to_string(), a.value().to_string()))
        .collect()
}

fn child_nodes(element: roxmltree::Node<'_, '_>) -> Vec<ViewNode> {
    element
        .children()
        .filter(|c| c.is_element() && c.has_tag_name(NODE_TAG))
        .map(|c| ViewNode::new(element_attributes(c), child_nodes(c)))
        .collect()
}

/// Depth-first, pre-order search for the first node whose `key` attribute
/// contains `value` (case-sensitive substring).
///
/// A matching node is returned without looking at its descendants, so an
/// ancestor always wins over a matching descendant. An empty slice, or a
/// tree with no match, yields `None`.
pub fn find_node<'a>(nodes: &'a [ViewNode], key: &str, value: &str) -> Option<&'a ViewNode> {
    nodes.iter().find_map(|node| find_in_node(node, key, value))
}

fn find_in_node<'a>(node: &'a ViewNode, key: &str, value: &str) -> Option<&'a ViewNode> {
    if node.attr(key).is_some_and(|v| v.contains(value)) {
        return Some(node);
    }
    find_node(node.children(), key, value)
}

/// Resolves the tap point of a node: the center of its `bounds`.
///
/// Returns `Ok(None)` when there is no node or it has no `bounds`
/// attribute. A `bounds` value that does not match `[x1,y1][x2,y2]` is an
/// error, since it points at a corrupt dump rather than a missing view.
pub fn center_of(node: Option<&ViewNode>) -> Result<Option<Point>, BoundsError> {
    match node {
        None => Ok(None),
        Some(node) => Ok(node.bounds()?.map(|b| b.center())),
    }
}

fn flatten_identifiable(nodes: &[ViewNode]) -> Vec<&ViewNode> {
    let mut result = Vec::new();
    collect_identifiable(nodes, &mut result);
    result
}

fn collect_identifiable<'a>(nodes: &'a [ViewNode], result: &mut Vec<&'a ViewNode>) {
    for node in nodes {
        let has_identity = [RESOURCE_ID, CONTENT_DESC, TEXT]
            .iter()
            .any(|key| node.attr(key).is_some_and(|v| !v.is_empty()));
        if has_identity {
            result.push(node);
        }
        collect_identifiable(node.children(), result);
    }
}
