//! Canonical template text from a node tree.
//!
//! Used verbatim as the compilation output for native passthrough targets,
//! and as the diagnostic fallback when render-code generation fails. The
//! serializer is a pure function of the tree: attribute order is source
//! order, mustache text is reproduced byte for byte, and the self-closing
//! form survives so `parse(serialize(parse(s)))` reaches a fixpoint.

use crate::node::{AttrValue, Element, Node};

pub fn serialize(root: &Node) -> String {
    let mut out = String::new();
    // A bare <block> root with zero or several children is the synthetic
    // wrapper for multi-root templates; its children serialize at top level.
    // A single-child bare block only arises from a literal <block> in the
    // source, so it keeps its tag.
    if let Node::Element(el) = root {
        if el.tag == "block" && el.attrs.is_empty() && el.children.len() != 1 {
            for child in &el.children {
                write_node(child, &mut out);
            }
            return out;
        }
    }
    write_node(root, &mut out);
    out
}

fn write_node(node: &Node, out: &mut String) {
    match node {
        Node::Text(text) => out.push_str(&text.value),
        Node::Element(el) => write_element(el, out),
    }
}

fn write_element(el: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&el.tag);
    for attr in &el.attrs {
        out.push(' ');
        out.push_str(&attr.name);
        if let Some(value) = &attr.value {
            let raw = value.raw();
            out.push('=');
            if raw.contains('"') {
                out.push('\'');
                out.push_str(raw);
                out.push('\'');
            } else {
                out.push('"');
                out.push_str(raw);
                out.push('"');
            }
        }
    }
    if el.children.is_empty() && el.unary {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in &el.children {
        write_node(child, out);
    }
    out.push_str("</");
    out.push_str(&el.tag);
    out.push('>');
}
