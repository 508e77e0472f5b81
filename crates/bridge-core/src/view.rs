use std::fmt;

use serde::{Deserialize, Serialize};

use crate::message::Props;

/// Identifier of a mirrored native view. Never reused within a process.
///
/// Ids order by their numeric suffix, so `view_9` sorts before `view_10`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewId(String);

impl ViewId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn sort_key(&self) -> (&str, Option<u64>, &str) {
        match self.0.rsplit_once('_') {
            Some((prefix, counter)) => match counter.parse() {
                Ok(counter) => (prefix, Some(counter), &self.0),
                Err(_) => (&self.0, None, &self.0),
            },
            None => (&self.0, None, &self.0),
        }
    }
}

impl Ord for ViewId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for ViewId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ViewId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Kind of native view backing a node. Interpretation of props per kind is
/// left entirely to the native side.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ViewType {
    View,
    Text,
    Image,
    Button,
    TextInput,
    ScrollView,
    List,
    Custom(String),
}

impl ViewType {
    pub fn as_str(&self) -> &str {
        match self {
            ViewType::View => "View",
            ViewType::Text => "Text",
            ViewType::Image => "Image",
            ViewType::Button => "Button",
            ViewType::TextInput => "TextInput",
            ViewType::ScrollView => "ScrollView",
            ViewType::List => "List",
            ViewType::Custom(name) => name,
        }
    }
}

impl From<String> for ViewType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "View" => ViewType::View,
            "Text" => ViewType::Text,
            "Image" => ViewType::Image,
            "Button" => ViewType::Button,
            "TextInput" => ViewType::TextInput,
            "ScrollView" => ViewType::ScrollView,
            "List" => ViewType::List,
            _ => ViewType::Custom(name),
        }
    }
}

impl From<&str> for ViewType {
    fn from(name: &str) -> Self {
        ViewType::from(name.to_string())
    }
}

impl From<ViewType> for String {
    fn from(view_type: ViewType) -> Self {
        match view_type {
            ViewType::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for ViewType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local mirror of one remote view.
#[derive(Clone, Debug, PartialEq)]
pub struct ViewNode {
    pub id: ViewId,
    pub view_type: ViewType,
    pub props: Props,
    pub children: Vec<ViewId>,
    pub parent: Option<ViewId>,
}

impl ViewNode {
    pub fn new(id: ViewId, view_type: ViewType, props: Props) -> Self {
        Self {
            id,
            view_type,
            props,
            children: Vec::new(),
            parent: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Frame of a view as measured by the native side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}
