//! Render-code generation.
//!
//! Lowers the parsed node tree into a render fragment over the four runtime
//! helpers: `_i` iterates a source with the instance's iteration semantics,
//! `_c` creates an element or component node, `_sc` resolves ref lookups and
//! `_r` signals render finish. The fragment is plain JS text; the
//! scope-binding transformer rewrites its data reads afterwards, and
//! `assemble_inject_source` wraps the bound result into the injection module
//! the runtime consumes.

use std::collections::HashSet;

use oxc_allocator::Allocator;
use oxc_parser::Parser;
use oxc_span::SourceType;

use crate::bind::{self, BindConfig};
use crate::node::{AttrValue, CompileMeta, Element, IfInfo, IfKind, Node};
use crate::parse::{find_balanced_mustache_end, utf8_len};
use crate::platform::Mode;

/// Injection point the generated module assigns into. The runtime reads it
/// back immediately after evaluating the module.
pub const INJECT_GLOBAL: &str = "global.__strataInject";

// ═══════════════════════════════════════════════════════════════════════════════
// FRAGMENT GENERATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Generates the render expression for a whole tree. The result is a single
/// JS expression; callers append `;` to form the render-function body.
pub fn gen_node(root: &Node, mode: Mode) -> String {
    gen_single(root, mode)
}

/// One node with its own control directives applied. Sibling if-chains are
/// resolved in [`gen_children`]; at the root there are no siblings to chain
/// with, so a bare `elif`/`else` degrades to its guarded form.
fn gen_single(node: &Node, mode: Mode) -> String {
    match node {
        Node::Text(t) => interpolate(&t.value),
        Node::Element(el) => {
            if el.for_info.is_some() {
                gen_for(el, mode)
            } else {
                match &el.if_info {
                    Some(IfInfo {
                        condition: Some(cond),
                        ..
                    }) => format!("({} ? {} : \"\")", cond, gen_element_core(el, mode)),
                    _ => gen_element_core(el, mode),
                }
            }
        }
    }
}

/// `block` is a structural grouping tag: it contributes its children without
/// creating a node of its own.
fn gen_element_core(el: &Element, mode: Mode) -> String {
    let children = gen_children(&el.children, mode);
    if el.tag == "block" {
        return children;
    }
    format!(
        "_c(\"{}\", {}, {})",
        escape_js_string(&el.tag),
        gen_attrs(el, mode),
        children
    )
}

fn gen_for(el: &Element, mode: Mode) -> String {
    let for_info = match &el.for_info {
        Some(f) => f,
        None => return gen_element_core(el, mode),
    };
    let source = iteration_source(&for_info.source);
    // A condition on the repeating node is evaluated per item.
    let body = match &el.if_info {
        Some(IfInfo {
            condition: Some(cond),
            ..
        }) => format!("({} ? {} : \"\")", cond, gen_element_core(el, mode)),
        _ => gen_element_core(el, mode),
    };
    format!(
        "_i({}, function ({}, {}) {{ return {}; }})",
        source, for_info.item, for_info.index, body
    )
}

/// Upper bound for compile-time expansion of integer repeat counts. The
/// runtime helper iterates integers with the same value/index pairing, so
/// larger counts delegate instead of materializing the array in the
/// generated source.
const REPEAT_EXPANSION_LIMIT: u64 = 64;

/// An integer-literal repeat count up to [`REPEAT_EXPANSION_LIMIT`] expands
/// to the literal ascending array so the item/index pairs are fixed at
/// compile time; larger counts and every other source pass through for the
/// runtime helper to iterate.
fn iteration_source(source: &str) -> String {
    let trimmed = source.trim();
    match trimmed.parse::<u64>() {
        Ok(n) if n <= REPEAT_EXPANSION_LIMIT => {
            let values: Vec<String> = (1..=n).map(|v| v.to_string()).collect();
            format!("[{}]", values.join(", "))
        }
        _ => trimmed.to_string(),
    }
}

fn gen_children(children: &[Node], mode: Mode) -> String {
    let mut parts = Vec::new();
    let mut i = 0;
    while i < children.len() {
        if let Some(chain_end) = chain_extent(children, i) {
            let mut arms: Vec<(Option<String>, String)> = Vec::new();
            for node in &children[i..chain_end] {
                if let Node::Element(el) = node {
                    let cond = el.if_info.as_ref().and_then(|info| info.condition.clone());
                    arms.push((cond, gen_element_core(el, mode)));
                }
            }
            parts.push(fold_ternary(&arms));
            i = chain_end;
            continue;
        }
        parts.push(gen_single(&children[i], mode));
        i += 1;
    }
    format!("[{}]", parts.join(", "))
}

/// When `children[start]` opens an if-chain, returns the exclusive end index
/// of the chain. Repeating nodes never participate: their condition binds
/// inside the iteration.
fn chain_extent(children: &[Node], start: usize) -> Option<usize> {
    let first = children[start].as_element()?;
    if first.for_info.is_some() {
        return None;
    }
    match &first.if_info {
        Some(IfInfo {
            kind: IfKind::If, ..
        }) => {}
        _ => return None,
    }
    let mut end = start + 1;
    while end < children.len() {
        let el = match children[end].as_element() {
            Some(el) if el.for_info.is_none() => el,
            _ => break,
        };
        match &el.if_info {
            Some(IfInfo {
                kind: IfKind::Elif, ..
            }) => end += 1,
            Some(IfInfo {
                kind: IfKind::Else, ..
            }) => {
                end += 1;
                break;
            }
            _ => break,
        }
    }
    Some(end)
}

fn fold_ternary(arms: &[(Option<String>, String)]) -> String {
    let mut acc = "\"\"".to_string();
    for (cond, code) in arms.iter().rev() {
        acc = match cond {
            Some(c) => format!("({} ? {} : {})", c, code, acc),
            None => code.clone(),
        };
    }
    acc
}

fn gen_attrs(el: &Element, mode: Mode) -> String {
    let prefix = mode.directive_prefix();
    let props: Vec<String> = el
        .attrs
        .iter()
        .filter(|attr| !is_directive_attr(&attr.name, prefix))
        .map(|attr| {
            let value = match &attr.value {
                None => "true".to_string(),
                Some(AttrValue::Static(s)) => format!("\"{}\"", escape_js_string(s)),
                Some(AttrValue::Dynamic { raw }) => interpolate(raw),
            };
            format!("\"{}\": {}", escape_js_string(&attr.name), value)
        })
        .collect();
    format!("{{{}}}", props.join(", "))
}

/// Control directives were absorbed into `if_info`/`for_info`; generics are
/// declaration wiring resolved before the render function runs. Neither
/// reaches the attrs object.
fn is_directive_attr(name: &str, prefix: &str) -> bool {
    if name.starts_with("generic:") {
        return true;
    }
    match name.strip_prefix(prefix) {
        Some(rest) => matches!(
            rest,
            "if" | "elif" | "else" | "for" | "for-item" | "for-index" | "key"
        ),
        None => false,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INTERPOLATION
// ═══════════════════════════════════════════════════════════════════════════════

enum Segment {
    Lit(String),
    Expr(String),
}

fn split_interpolation(raw: &str) -> Vec<Segment> {
    let bytes = raw.as_bytes();
    let mut segments = Vec::new();
    let mut lit = String::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            if let Some(end) = find_balanced_mustache_end(bytes, i) {
                if !lit.is_empty() {
                    segments.push(Segment::Lit(std::mem::take(&mut lit)));
                }
                segments.push(Segment::Expr(raw[i + 2..end - 2].trim().to_string()));
                i = end;
                continue;
            }
        }
        let len = utf8_len(bytes[i]);
        lit.push_str(&raw[i..i + len]);
        i += len;
    }
    if !lit.is_empty() {
        segments.push(Segment::Lit(lit));
    }
    segments
}

/// Mustache-bearing text to a JS expression: literal runs become string
/// literals, expressions splice in parenthesized, mixed content concatenates.
fn interpolate(raw: &str) -> String {
    let segments = split_interpolation(raw);
    if segments.is_empty() {
        return "\"\"".to_string();
    }
    segments
        .iter()
        .map(|seg| match seg {
            Segment::Lit(s) => format!("\"{}\"", escape_js_string(s)),
            Segment::Expr(e) => format!("({})", e),
        })
        .collect::<Vec<_>>()
        .join(" + ")
}

fn escape_js_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "")
}

// ═══════════════════════════════════════════════════════════════════════════════
// FRAGMENT VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// A generated fragment must parse as JS before binding runs over it. The
/// error text feeds the codegen-failure diagnostic.
pub fn validate_fragment(fragment: &str) -> Result<(), String> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, fragment, SourceType::default()).parse();
    if ret.errors.is_empty() {
        Ok(())
    } else {
        Err(ret
            .errors
            .iter()
            .map(|e| format!("{:?}", e))
            .collect::<Vec<_>>()
            .join("; "))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MODULE ASSEMBLY
// ═══════════════════════════════════════════════════════════════════════════════

pub struct AssembleInput<'a> {
    pub module_id: &'a str,
    /// Bound render-function body, statement form.
    pub render_body: &'a str,
    /// Simplified binding mode finishes with `_r(true)`.
    pub simplified: bool,
    pub prop_keys: Option<&'a [String]>,
    /// Targets whose runtime consumes the collected keys.
    pub emit_prop_keys: bool,
    pub meta: &'a CompileMeta,
    pub resource_path: &'a str,
    /// Names the computed-injection binding must leave alone.
    pub ignore_map: &'a HashSet<String>,
}

/// Assembles the injection module: wxs requires, the inject object, the
/// render function and the optional computed/refs/options sections.
pub fn assemble_inject_source(input: &AssembleInput) -> String {
    let meta = input.meta;
    let mut out = String::new();

    for (module, src) in &meta.wxs_module_map {
        out.push_str(&format!("var {} = require({});\n", module, js_string(src)));
    }
    // Inline wxs modules are addressed back through the owning resource.
    for module in meta.wxs_content_map.keys() {
        let request = format!("{}?wxsModule={}", input.resource_path, module);
        out.push_str(&format!(
            "var {} = require({});\n",
            module,
            js_string(&request)
        ));
    }

    out.push_str(&format!(
        "{} = {{\n  moduleId: {}\n}};\n",
        INJECT_GLOBAL,
        js_string(input.module_id)
    ));

    out.push_str(&format!(
        "{}.render = function (_i, _c, _r, _sc) {{\n",
        INJECT_GLOBAL
    ));
    out.push_str(input.render_body);
    if !input.render_body.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(if input.simplified { "_r(true);\n" } else { "_r();\n" });
    out.push_str("};\n");

    if input.emit_prop_keys {
        if let Some(keys) = input.prop_keys {
            let json = serde_json::to_string(keys).unwrap_or_else(|_| "[]".to_string());
            out.push_str(&format!("{}.propKeys = {};\n", INJECT_GLOBAL, json));
        }
    }

    if !meta.computed.is_empty() {
        let object = format!("{{\n  {}\n}}", meta.computed.join(",\n  "));
        let statement = format!("{}.injectComputed = {};", INJECT_GLOBAL, object);
        let bound = bind::transform(
            &statement,
            &BindConfig {
                ignore_map: input.ignore_map.clone(),
                need_collect: false,
                render_reduce: false,
            },
        );
        out.push_str(&bound.code);
        out.push('\n');
    }

    if !meta.refs.is_empty() {
        let json = serde_json::to_string(&meta.refs).unwrap_or_else(|_| "[]".to_string());
        out.push_str(&format!(
            "{}.getRefsData = function () {{\n  return {};\n}};\n",
            INJECT_GLOBAL, json
        ));
    }

    if !meta.options.is_empty() {
        let json = serde_json::to_string(&meta.options).unwrap_or_else(|_| "{}".to_string());
        out.push_str(&format!("{}.injectOptions = {};\n", INJECT_GLOBAL, json));
    }

    out
}

pub(crate) fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", escape_js_string(s)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
