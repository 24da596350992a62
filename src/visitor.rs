//! Tree traversal helpers.
//!
//! Pre-order walks over the template tree, shared by the structural
//! transforms and the code generator so traversal order stays fixed in one
//! place.

use crate::node::{Element, Node};

pub fn walk_nodes<'a, F>(node: &'a Node, f: &mut F)
where
    F: FnMut(&'a Node),
{
    f(node);
    if let Node::Element(el) = node {
        for child in &el.children {
            walk_nodes(child, f);
        }
    }
}

pub fn walk_elements<'a, F>(node: &'a Node, f: &mut F)
where
    F: FnMut(&'a Element),
{
    if let Node::Element(el) = node {
        f(el);
        for child in &el.children {
            walk_elements(child, f);
        }
    }
}

pub fn walk_elements_mut<F>(node: &mut Node, f: &mut F)
where
    F: FnMut(&mut Element),
{
    if let Node::Element(el) = node {
        f(el);
        for child in &mut el.children {
            walk_elements_mut(child, f);
        }
    }
}
