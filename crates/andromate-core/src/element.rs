//! View hierarchy types for uiautomator-based automation.
//!
//! A hierarchy dump is a tree of elements, each carrying a flat set of string
//! attributes (`resource-id`, `content-desc`, `text`, `bounds`, ...). This
//! module models one element as a [`ViewNode`], a tagged union of leaf and
//! internal nodes, together with the geometry types used to act on it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Attribute name of the element's resource identifier.
pub const RESOURCE_ID: &str = "resource-id";
/// Attribute name of the element's content description.
pub const CONTENT_DESC: &str = "content-desc";
/// Attribute name of the element's visible text.
pub const TEXT: &str = "text";
/// Attribute name of the element's bounding rectangle.
pub const BOUNDS: &str = "bounds";

/// Attribute name to value, as found on a dumped element.
pub type Attributes = BTreeMap<String, String>;

/// A single element from a view hierarchy dump.
///
/// Nodes are produced fresh on every fetch and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewNode {
    /// An element with no nested elements.
    Leaf {
        /// The element's attributes.
        attributes: Attributes,
    },
    /// An element with one or more nested elements, in document order.
    Internal {
        /// The element's attributes.
        attributes: Attributes,
        /// Nested elements.
        children: Vec<ViewNode>,
    },
}

impl ViewNode {
    /// Builds a node, choosing [`ViewNode::Leaf`] when there are no children.
    pub fn new(attributes: Attributes, children: Vec<ViewNode>) -> Self {
        if children.is_empty() {
            ViewNode::Leaf { attributes }
        } else {
            ViewNode::Internal { attributes, children }
        }
    }

    /// Convenience constructor for a leaf from `(name, value)` pairs.
    pub fn leaf<'a>(attrs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        ViewNode::Leaf {
            attributes: collect_attributes(attrs),
        }
    }

    /// Convenience constructor for a node with children from `(name, value)` pairs.
    pub fn with_children<'a>(
        attrs: impl IntoIterator<Item = (&'a str, &'a str)>,
        children: Vec<ViewNode>,
    ) -> Self {
        ViewNode::new(collect_attributes(attrs), children)
    }

    pub fn attributes(&self) -> &Attributes {
        match self {
            ViewNode::Leaf { attributes } | ViewNode::Internal { attributes, .. } => attributes,
        }
    }

    /// Nested elements; empty for a leaf.
    pub fn children(&self) -> &[ViewNode] {
        match self {
            ViewNode::Leaf { .. } => &[],
            ViewNode::Internal { children, .. } => children,
        }
    }

    /// Returns the value of an attribute, if present.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes().get(key).map(String::as_str)
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.attr(RESOURCE_ID)
    }

    pub fn content_desc(&self) -> Option<&str> {
        self.attr(CONTENT_DESC)
    }

    pub fn text(&self) -> Option<&str> {
        self.attr(TEXT)
    }

    /// Parses the `bounds` attribute.
    ///
    /// Returns `Ok(None)` when the attribute is absent and an error when it is
    /// present but malformed.
    pub fn bounds(&self) -> Result<Option<Bounds>, BoundsError> {
        self.attr(BOUNDS).map(str::parse).transpose()
    }
}

fn collect_attributes<'a>(attrs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Attributes {
    attrs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// A screen coordinate in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Error for a `bounds` attribute that is present but not `[x1,y1][x2,y2]`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed bounds '{0}', expected [x1,y1][x2,y2]")]
pub struct BoundsError(pub String);

/// An element's bounding rectangle in screen pixels.
///
/// `x2 >= x1` and `y2 >= y1` are assumed from the source data, not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Bounds {
    /// Midpoint of the rectangle, using integer division.
    pub fn center(&self) -> Point {
        Point {
            x: self.x1 + (self.x2 - self.x1) / 2,
            y: self.y1 + (self.y2 - self.y1) / 2,
        }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }
}

fn bounds_regex() -> &'static Regex {
    static BOUNDS_RE: OnceLock<Regex> = OnceLock::new();
    BOUNDS_RE.get_or_init(|| {
        Regex::new(r"^\s*\[(-?\d+),(-?\d+)\]\[(-?\d+),(-?\d+)\]\s*$").expect("bounds regex is valid")
    })
}

impl FromStr for Bounds {
    type Err = BoundsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = bounds_regex()
            .captures(s)
            .ok_or_else(|| BoundsError(s.to_string()))?;
        let num = |i: usize| {
            caps[i]
                .parse::<i32>()
                .map_err(|_| BoundsError(s.to_string()))
        };
        Ok(Bounds {
            x1: num(1)?,
            y1: num(2)?,
            x2: num(3)?,
            y2: num(4)?,
        })
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}][{},{}]", self.x1, self.y1, self.x2, self.y2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_picks_leaf_without_children() {
        let node = ViewNode::new(Attributes::new(), vec![]);
        assert!(matches!(node, ViewNode::Leaf { .. }));
        assert!(node.children().is_empty());
    }

    #[test]
    fn test_new_picks_internal_with_children() {
        let node = ViewNode::with_children([("text", "parent")], vec![ViewNode::leaf([("text", "child")])]);
        assert!(matches!(node, ViewNode::Internal { .. }));
        assert_eq!(node.children().len(), 1);
        assert_eq!(node.children()[0].text(), Some("child"));
    }

    #[test]
    fn test_named_attribute_accessors() {
        let node = ViewNode::leaf([
            ("resource-id", "com.example:id/login"),
            ("content-desc", "Log in"),
            ("text", "LOGIN"),
        ]);
        assert_eq!(node.resource_id(), Some("com.example:id/login"));
        assert_eq!(node.content_desc(), Some("Log in"));
        assert_eq!(node.text(), Some("LOGIN"));
        assert_eq!(node.attr("checkable"), None);
    }

    #[test]
    fn test_bounds_parse_and_center() {
        let bounds: Bounds = "[10,20][30,60]".parse().unwrap();
        assert_eq!(bounds, Bounds { x1: 10, y1: 20, x2: 30, y2: 60 });
        assert_eq!(bounds.center(), Point::new(20, 40));
        assert_eq!(bounds.width(), 20);
        assert_eq!(bounds.height(), 40);
    }

    #[test]
    fn test_bounds_center_truncates() {
        let bounds: Bounds = "[0,0][1,1]".parse().unwrap();
        assert_eq!(bounds.center(), Point::new(0, 0));

        let bounds: Bounds = "[0,0][1079,2339]".parse().unwrap();
        assert_eq!(bounds.center(), Point::new(539, 1169));
    }

    #[test]
    fn test_bounds_rejects_malformed_text() {
        for bad in ["", "[10,20]", "10,20,30,60", "[a,b][c,d]", "[10,20][30,60"] {
            let err = bad.parse::<Bounds>().unwrap_err();
            assert_eq!(err, BoundsError(bad.to_string()));
        }
    }

    #[test]
    fn test_node_bounds_absent_vs_malformed() {
        let absent = ViewNode::leaf([("text", "x")]);
        assert_eq!(absent.bounds(), Ok(None));

        let malformed = ViewNode::leaf([("bounds", "[1,2]")]);
        assert!(malformed.bounds().is_err());

        let good = ViewNode::leaf([("bounds", "[0,0][100,50]")]);
        assert_eq!(good.bounds().unwrap().map(|b| b.center()), Some(Point::new(50, 25)));
    }

    #[test]
    fn test_bounds_display_roundtrips_source_format() {
        let bounds = Bounds { x1: 0, y1: 63, x2: 1080, y2: 210 };
        assert_eq!(bounds.to_string(), "[0,63][1080,210]");
    }

    #[test]
    fn test_view_node_serializes_with_kind_tag() {
        let node = ViewNode::leaf([("text", "OK")]);
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["kind"], "leaf");
        assert_eq!(json["attributes"]["text"], "OK");
    }
}
