//! Template tree and compile-time side-channel data model.
//!
//! The tree is produced once per compilation unit by the parser, mutated in
//! place by the structural transforms, and read by both the serializer and
//! the code generator. All of it is serde-serializable so the bundler side of
//! the toolchain can inspect compilation results as JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::report::SourceLocation;

// ═══════════════════════════════════════════════════════════════════════════════
// NODE TREE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Node {
    Element(Element),
    Text(TextNode),
}

impl Node {
    pub fn element(el: Element) -> Node {
        Node::Element(el)
    }

    pub fn text(value: impl Into<String>, location: SourceLocation) -> Node {
        Node::Text(TextNode {
            value: value.into(),
            location,
        })
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub tag: String,
    /// Source-ordered attribute list; the serializer reproduces this order.
    pub attrs: Vec<Attribute>,
    pub children: Vec<Node>,
    #[serde(default)]
    pub location: SourceLocation,
    /// Registered in `usingComponents`/`globalComponents`.
    pub is_component: bool,
    /// Built-in or unrecognized platform tag (the complement of
    /// `is_component` after classification).
    pub is_native: bool,
    #[serde(default)]
    pub has_scoped: bool,
    /// `generic:*` bindings declared on a component use site.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generics: Option<BTreeMap<String, String>>,
    /// Self-closing in source; the serializer emits the same form.
    #[serde(default)]
    pub unary: bool,
    /// Parsed conditional directive, derived from `attrs`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub if_info: Option<IfInfo>,
    /// Parsed repeat directive, derived from `attrs`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub for_info: Option<ForInfo>,
}

impl Element {
    pub fn new(tag: impl Into<String>, location: SourceLocation) -> Element {
        Element {
            tag: tag.into(),
            attrs: Vec::new(),
            children: Vec::new(),
            location,
            is_component: false,
            is_native: false,
            has_scoped: false,
            generics: None,
            unary: false,
            if_info: None,
            for_info: None,
        }
    }

    /// Raw text of an attribute value, whichever variant holds it.
    pub fn attr_raw(&self, name: &str) -> Option<&str> {
        self.attrs.iter().find(|a| a.name == name).and_then(|a| {
            a.value.as_ref().map(|v| match v {
                AttrValue::Static(s) => s.as_str(),
                AttrValue::Dynamic { raw } => raw.as_str(),
            })
        })
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|a| a.name == name)
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<Attribute> {
        let idx = self.attrs.iter().position(|a| a.name == name)?;
        Some(self.attrs.remove(idx))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    pub name: String,
    /// `None` for bare boolean attributes (`<video controls>`).
    pub value: Option<AttrValue>,
}

/// A literal value or a mustache-bearing expression value. Untagged so the
/// JSON form is a plain string for literals and an object for expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Static(String),
    Dynamic { raw: String },
}

impl AttrValue {
    /// Classifies raw attribute text: anything containing a mustache pair is
    /// dynamic, everything else is a literal.
    pub fn from_raw(raw: &str) -> AttrValue {
        if raw.contains("{{") && raw.contains("}}") {
            AttrValue::Dynamic {
                raw: raw.to_string(),
            }
        } else {
            AttrValue::Static(raw.to_string())
        }
    }

    pub fn raw(&self) -> &str {
        match self {
            AttrValue::Static(s) => s,
            AttrValue::Dynamic { raw } => raw,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, AttrValue::Dynamic { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IfKind {
    If,
    Elif,
    Else,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IfInfo {
    pub kind: IfKind,
    /// Expression text with mustaches stripped; `None` for `else`.
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForInfo {
    /// Expression text of the repeat source, mustaches stripped.
    pub source: String,
    pub item: String,
    pub index: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextNode {
    pub value: String,
    #[serde(default)]
    pub location: SourceLocation,
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILE META
// ═══════════════════════════════════════════════════════════════════════════════

/// Side-channel accumulator for one compilation unit. Filled during parse,
/// drained by code emission, then discarded. Maps are ordered so assembled
/// output is byte-stable across runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileMeta {
    /// wxs module name → source path (`src` form).
    pub wxs_module_map: BTreeMap<String, String>,
    /// wxs module name → inline module body.
    pub wxs_content_map: BTreeMap<String, String>,
    /// Computed-property source snippets collected from the template.
    pub computed: Vec<String>,
    pub refs: Vec<RefDescriptor>,
    /// Extra option fragments injected into the component definition.
    pub options: BTreeMap<String, serde_json::Value>,
}

impl CompileMeta {
    pub fn is_empty(&self) -> bool {
        self.wxs_module_map.is_empty()
            && self.wxs_content_map.is_empty()
            && self.computed.is_empty()
            && self.refs.is_empty()
            && self.options.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefDescriptor {
    pub key: String,
    pub selector: String,
    #[serde(rename = "type")]
    pub ref_type: RefType,
    /// Set when the ref sits inside a repeat scope and resolves to a list.
    pub all: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefType {
    Node,
    Component,
}
