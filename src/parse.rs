//! Template parser: source text → annotated node tree + compile meta.
//!
//! The scanner is hand-rolled. Mustache segments are replaced with opaque
//! placeholders before any structural scanning so `<`, `>`, quotes and
//! braces inside expressions can never derail tag matching; placeholders are
//! restored verbatim when attribute values and text nodes are materialized.
//! Malformed markup is reported through the [`Reporter`] and recovery keeps
//! going, so one broken template never aborts a sibling unit.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::node::{
    AttrValue, Attribute, CompileMeta, Element, ForInfo, IfInfo, IfKind, Node, RefDescriptor,
    RefType,
};
use crate::platform::{is_builtin_tag, Mode};
use crate::registry::path_hash;
use crate::report::{Reporter, SourceLocation, PARSE_ERROR, UNKNOWN_COMPONENT};

// ═══════════════════════════════════════════════════════════════════════════════
// OPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Closed per-unit option record. Every recognized field is enumerated here;
/// the struct is the boundary that rejects anything else.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParseOptions {
    pub using_components: Vec<String>,
    pub component_placeholder: Vec<String>,
    pub global_components: Vec<String>,
    pub mode: Mode,
    pub src_mode: Mode,
    pub env: String,
    pub defs: BTreeMap<String, serde_json::Value>,
    pub i18n: bool,
    pub external_classes: Vec<String>,
    pub has_scoped: bool,
    pub module_id: String,
    pub decode_html_text: bool,
    pub check_using_components: bool,
    pub force_proxy_event: bool,
    pub has_virtual_host: bool,
    pub is_native: bool,
    pub is_component: bool,
    pub file_path: String,
}

impl ParseOptions {
    fn is_registered_component(&self, tag: &str) -> bool {
        self.using_components.iter().any(|c| c == tag)
            || self.global_components.iter().any(|c| c == tag)
            || self.component_placeholder.iter().any(|c| c == tag)
    }
}

#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub root: Node,
    pub meta: CompileMeta,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCANNING TABLES
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    static ref ATTR_RE: Regex =
        Regex::new(r#"([^\s"'<>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
            .expect("attribute regex");
    static ref PLACEHOLDER_RE: Regex =
        Regex::new(r"__STRATA_EXPR_(\d+)__").expect("placeholder regex");
    static ref HANDLER_RE: Regex =
        Regex::new(r"^([A-Za-z_$][A-Za-z0-9_$]*)\s*(?:\((.*)\))?$").expect("handler regex");
    static ref ENTITY_RE: Regex =
        Regex::new(r"&(?:#x[0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").expect("entity regex");
}

/// Proxy handler name substituted for event bindings that carry inline
/// arguments (or whenever event proxying is forced).
pub const EVENT_PROXY_HANDLER: &str = "__invoke";
/// Attribute accumulating `[event, handler, args]` tuples for the proxy.
pub const EVENT_CONFIG_ATTR: &str = "data-eventconfigs";

// ═══════════════════════════════════════════════════════════════════════════════
// ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

/// Parses template source into a tree plus side-channel meta. Never panics;
/// structural problems are reported and the best-effort tree is returned.
pub fn parse(source: &str, options: &ParseOptions, reporter: &mut Reporter) -> ParseOutcome {
    let substituted = apply_defs(source, &options.defs);
    let (protected, expressions) = protect_mustaches(&substituted);

    let line_starts = compute_line_starts(&protected);
    let mut parser = TemplateParser {
        source: protected,
        expressions,
        options,
        line_starts,
        pos: 0,
        stack: Vec::new(),
        roots: Vec::new(),
        meta: CompileMeta::default(),
    };
    parser.run(reporter);

    if options.i18n {
        parser
            .meta
            .options
            .insert("i18n".to_string(), serde_json::Value::Bool(true));
    }
    // Virtual-host and external-class declarations are component constructor
    // options; a page unit has no consumer for them.
    if options.is_component {
        if options.has_virtual_host {
            parser
                .meta
                .options
                .insert("virtualHost".to_string(), serde_json::Value::Bool(true));
        }
        if !options.external_classes.is_empty() {
            parser.meta.options.insert(
                "externalClasses".to_string(),
                serde_json::json!(options.external_classes),
            );
        }
    }

    let root = parser.build_root();
    ParseOutcome {
        root,
        meta: parser.meta,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRE-PASSES
// ═══════════════════════════════════════════════════════════════════════════════

/// Compile-time constant substitution. String values are spliced in their
/// quoted JSON form so `{{ __ENV__ === 'prod' }}` stays a valid expression.
fn apply_defs(source: &str, defs: &BTreeMap<String, serde_json::Value>) -> String {
    if defs.is_empty() {
        return source.to_string();
    }
    let mut out = source.to_string();
    for (key, value) in defs {
        let pattern = format!(r"\b{}\b", regex::escape(key));
        if let Ok(re) = Regex::new(&pattern) {
            // NoExpand: defs values are literal text, never `$n` templates.
            let replacement = value.to_string();
            out = re
                .replace_all(&out, regex::NoExpand(replacement.as_str()))
                .into_owned();
        }
    }
    out
}

/// Replaces every balanced `{{ … }}` segment with `__STRATA_EXPR_n__` and
/// returns the payloads (braces included) for later restoration.
fn protect_mustaches(source: &str) -> (String, Vec<String>) {
    let bytes = source.as_bytes();
    let mut out = String::with_capacity(source.len());
    let mut expressions = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            if let Some(end) = find_balanced_mustache_end(bytes, i) {
                out.push_str(&format!("__STRATA_EXPR_{}__", expressions.len()));
                expressions.push(source[i..end].to_string());
                i = end;
                continue;
            }
        }
        let ch_len = utf8_len(bytes[i]);
        out.push_str(&source[i..i + ch_len]);
        i += ch_len;
    }
    (out, expressions)
}

/// Byte index one past the closing `}}` of the mustache starting at `start`,
/// brace-depth and string aware. `None` when the segment never closes.
pub(crate) fn find_balanced_mustache_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = start;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
            }
        } else {
            match b {
                b'\'' | b'"' | b'`' => quote = Some(b),
                b'{' => depth += 1,
                b'}' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        // A real mustache closes on a `}}` pair.
                        if i >= 1 && bytes[i - 1] == b'}' {
                            return Some(i + 1);
                        }
                        return None;
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

fn restore_expressions(text: &str, expressions: &[String]) -> String {
    PLACEHOLDER_RE
        .replace_all(text, |caps: &Captures| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|idx| expressions.get(idx))
                .cloned()
                .unwrap_or_default()
        })
        .into_owned()
}

pub(crate) fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        b if b < 0x80 => 1,
        b if b >> 5 == 0b110 => 2,
        b if b >> 4 == 0b1110 => 3,
        _ => 4,
    }
}

fn compute_line_starts(source: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, b) in source.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

fn location_at(line_starts: &[usize], offset: usize) -> SourceLocation {
    let line_idx = match line_starts.binary_search(&offset) {
        Ok(i) => i,
        Err(i) => i.saturating_sub(1),
    };
    let column = offset - line_starts[line_idx] + 1;
    SourceLocation::new(line_idx as u32 + 1, column as u32)
}

fn decode_entities(text: &str) -> String {
    ENTITY_RE
        .replace_all(text, |caps: &Captures| {
            let entity = &caps[0];
            match entity {
                "&lt;" => "<".to_string(),
                "&gt;" => ">".to_string(),
                "&amp;" => "&".to_string(),
                "&quot;" => "\"".to_string(),
                "&apos;" => "'".to_string(),
                "&nbsp;" => " ".to_string(),
                _ => {
                    let inner = &entity[1..entity.len() - 1];
                    let code = if let Some(hex) = inner.strip_prefix("#x") {
                        u32::from_str_radix(hex, 16).ok()
                    } else if let Some(dec) = inner.strip_prefix('#') {
                        dec.parse::<u32>().ok()
                    } else {
                        None
                    };
                    code.and_then(char::from_u32)
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| entity.to_string())
                }
            }
        })
        .into_owned()
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSER
// ═══════════════════════════════════════════════════════════════════════════════

struct TemplateParser<'a> {
    source: String,
    expressions: Vec<String>,
    options: &'a ParseOptions,
    line_starts: Vec<usize>,
    pos: usize,
    stack: Vec<Element>,
    roots: Vec<Node>,
    meta: CompileMeta,
}

enum OpenTag {
    Element { element: Element, unary: bool },
    Pruned { unary: bool },
}

impl<'a> TemplateParser<'a> {
    fn run(&mut self, reporter: &mut Reporter) {
        let len = self.source.len();
        while self.pos < len {
            let rest = &self.source[self.pos..];
            if rest.starts_with("<!--") {
                self.pos = match self.source[self.pos..].find("-->") {
                    Some(rel) => self.pos + rel + 3,
                    None => len,
                };
            } else if rest.starts_with("</") {
                self.scan_close_tag(reporter);
            } else if rest.starts_with('<') && starts_tag_name(rest.as_bytes().get(1).copied()) {
                self.scan_open_tag(reporter);
            } else {
                self.scan_text();
            }
        }
        while let Some(el) = self.stack.pop() {
            reporter.error_at(
                PARSE_ERROR,
                format!("unclosed tag <{}>", el.tag),
                el.location,
            );
            self.attach(Node::Element(el));
        }
    }

    fn build_root(&mut self) -> Node {
        let mut roots = std::mem::take(&mut self.roots);
        if roots.len() == 1 && matches!(roots[0], Node::Element(_)) {
            return roots.remove(0);
        }
        let mut block = Element::new("block", SourceLocation::new(1, 1));
        block.is_native = true;
        block.children = roots;
        Node::Element(block)
    }

    // ── text ──────────────────────────────────────────────────────────────

    fn scan_text(&mut self) {
        let start = self.pos;
        let bytes = self.source.as_bytes();
        let mut i = self.pos + 1;
        while i < bytes.len() {
            if bytes[i] == b'<' {
                let next = bytes.get(i + 1).copied();
                if next == Some(b'/') || next == Some(b'!') || starts_tag_name(next) {
                    break;
                }
            }
            i += 1;
        }
        let raw = self.source[start..i].to_string();
        self.pos = i;

        let mut text = restore_expressions(&raw, &self.expressions);
        if self.options.decode_html_text {
            text = decode_entities(&text);
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        let location = location_at(&self.line_starts, start_of_content(&raw, start));
        let node = Node::text(trimmed, location);
        self.attach(node);
    }

    // ── close tags ───────────────────────────────────────────────────────

    fn scan_close_tag(&mut self, reporter: &mut Reporter) {
        let start = self.pos;
        let end = match self.source[start..].find('>') {
            Some(rel) => start + rel,
            None => {
                reporter.error_at(
                    PARSE_ERROR,
                    "unterminated close tag",
                    location_at(&self.line_starts, start),
                );
                self.pos = self.source.len();
                return;
            }
        };
        let name = self.source[start + 2..end].trim().to_string();
        self.pos = end + 1;

        if self.stack.last().map(|el| el.tag == name).unwrap_or(false) {
            if let Some(el) = self.stack.pop() {
                self.finish_element(el);
            }
            return;
        }
        match self.stack.iter().rposition(|el| el.tag == name) {
            Some(idx) => {
                while self.stack.len() > idx + 1 {
                    if let Some(el) = self.stack.pop() {
                        reporter.error_at(
                            PARSE_ERROR,
                            format!("unclosed tag <{}>", el.tag),
                            el.location,
                        );
                        self.finish_element(el);
                    }
                }
                if let Some(el) = self.stack.pop() {
                    self.finish_element(el);
                }
            }
            None => {
                reporter.error_at(
                    PARSE_ERROR,
                    format!("stray close tag </{}>", name),
                    location_at(&self.line_starts, start),
                );
            }
        }
    }

    // ── open tags ────────────────────────────────────────────────────────

    fn scan_open_tag(&mut self, reporter: &mut Reporter) {
        let start = self.pos;
        let end = match find_tag_end(self.source.as_bytes(), start) {
            Some(e) => e,
            None => {
                reporter.error_at(
                    PARSE_ERROR,
                    "unterminated tag",
                    location_at(&self.line_starts, start),
                );
                self.pos = self.source.len();
                return;
            }
        };
        let mut segment = self.source[start + 1..end].trim().to_string();
        self.pos = end + 1;
        let mut unary = false;
        if segment.ends_with('/') {
            unary = true;
            segment.truncate(segment.len() - 1);
        }
        let (tag, attr_segment) = match segment.find(char::is_whitespace) {
            Some(split) => (
                segment[..split].to_string(),
                segment[split..].trim().to_string(),
            ),
            None => (segment.trim().to_string(), String::new()),
        };
        if tag.is_empty() {
            reporter.error_at(
                PARSE_ERROR,
                "empty tag name",
                location_at(&self.line_starts, start),
            );
            return;
        }
        let location = location_at(&self.line_starts, start);

        match self.build_open_tag(&tag, &attr_segment, unary, location, reporter) {
            OpenTag::Pruned { unary: false } => self.skip_subtree(),
            OpenTag::Pruned { unary: true } => {}
            OpenTag::Element { element, unary } => {
                if element.tag == "wxs" {
                    self.handle_wxs(element, unary, reporter);
                } else if unary {
                    let mut el = element;
                    el.unary = true;
                    self.finish_element(el);
                } else {
                    self.stack.push(element);
                }
            }
        }
    }

    fn build_open_tag(
        &mut self,
        tag: &str,
        attr_segment: &str,
        unary: bool,
        location: SourceLocation,
        reporter: &mut Reporter,
    ) -> OpenTag {
        let mut element = Element::new(tag, location);
        element.has_scoped = self.options.has_scoped;

        // Raw attribute extraction, values restored to their mustache form.
        let mut raw_attrs = Vec::new();
        for caps in ATTR_RE.captures_iter(attr_segment) {
            let name = caps[1].to_string();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| restore_expressions(m.as_str(), &self.expressions));
            raw_attrs.push((name, value));
        }

        // Conditional-compilation qualifiers run before anything else sees
        // the attributes. Element-level markers are collected first; the
        // element survives when any one of them matches and is pruned only
        // when every marker fails.
        let mut kept = Vec::new();
        let mut gates: Vec<String> = Vec::new();
        for (name, value) in raw_attrs {
            if let Some(qualifier) = name.strip_prefix('@') {
                gates.push(qualifier.to_string());
                continue;
            }
            match name.rfind('@') {
                Some(at) => {
                    let (base, qualifier) = (name[..at].to_string(), name[at + 1..].to_string());
                    if self.qualifier_matches(&qualifier) {
                        kept.push((base, value));
                    }
                }
                None => kept.push((name, value)),
            }
        }
        if !gates.is_empty() && !gates.iter().any(|q| self.qualifier_matches(q)) {
            return OpenTag::Pruned { unary };
        }

        for (name, value) in kept {
            element.attrs.push(Attribute {
                name,
                value: value.map(|v| AttrValue::from_raw(&v)),
            });
        }

        self.classify(&mut element, reporter);
        self.parse_directives(&mut element);
        self.collect_generics(&mut element);
        self.process_ref(&mut element);
        // Native templates wire events against the platform runtime itself;
        // the proxy handler has no consumer there, so bindings stay verbatim.
        if !self.options.is_native {
            self.process_events(&mut element);
        }
        OpenTag::Element { element, unary }
    }

    /// `modes` or `modes:envs` qualifier match against the build target.
    /// Empty sides match anything, so `@:prod` gates on env alone.
    fn qualifier_matches(&self, qualifier: &str) -> bool {
        let (modes, envs) = match qualifier.split_once(':') {
            Some((m, e)) => (m, Some(e)),
            None => (qualifier, None),
        };
        let mode_ok = modes.is_empty()
            || modes
                .split('|')
                .any(|m| m == self.options.mode.as_str() || m == "_");
        let env_ok = match envs {
            None => true,
            Some(e) => e.is_empty() || e.split('|').any(|x| x == self.options.env || x == "_"),
        };
        mode_ok && env_ok
    }

    fn classify(&mut self, element: &mut Element, reporter: &mut Reporter) {
        if self.options.is_registered_component(&element.tag) {
            element.is_component = true;
        } else {
            element.is_native = true;
            if self.options.check_using_components && !is_builtin_tag(&element.tag) {
                reporter.warn_at(
                    UNKNOWN_COMPONENT,
                    format!(
                        "<{}> is not registered in usingComponents and is not a built-in tag",
                        element.tag
                    ),
                    element.location,
                );
            }
        }
    }

    fn parse_directives(&mut self, element: &mut Element) {
        let prefix = self.options.src_mode.directive_prefix();
        let if_name = format!("{}if", prefix);
        let elif_name = format!("{}elif", prefix);
        let else_name = format!("{}else", prefix);
        let for_name = format!("{}for", prefix);
        let for_item = format!("{}for-item", prefix);
        let for_index = format!("{}for-index", prefix);
        let key_name = format!("{}key", prefix);

        if let Some(raw) = element.attr_raw(&if_name) {
            element.if_info = Some(IfInfo {
                kind: IfKind::If,
                condition: Some(strip_mustache(raw)),
            });
        } else if let Some(raw) = element.attr_raw(&elif_name) {
            element.if_info = Some(IfInfo {
                kind: IfKind::Elif,
                condition: Some(strip_mustache(raw)),
            });
        } else if element.has_attr(&else_name) {
            element.if_info = Some(IfInfo {
                kind: IfKind::Else,
                condition: None,
            });
        }

        if let Some(raw) = element.attr_raw(&for_name) {
            let source = strip_mustache(raw);
            let item = element
                .attr_raw(&for_item)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "item".to_string());
            let index = element
                .attr_raw(&for_index)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "index".to_string());
            let key = element.attr_raw(&key_name).map(|s| s.trim().to_string());
            element.for_info = Some(ForInfo {
                source,
                item,
                index,
                key,
            });
        }
    }

    fn collect_generics(&mut self, element: &mut Element) {
        let mut generics = BTreeMap::new();
        for attr in &element.attrs {
            if let Some(name) = attr.name.strip_prefix("generic:") {
                if let Some(value) = &attr.value {
                    generics.insert(name.to_string(), value.raw().to_string());
                }
            }
        }
        if !generics.is_empty() {
            element.generics = Some(generics);
        }
    }

    /// Scope id for marker classes: the explicit module id, else one derived
    /// from the file path the same way the pipeline derives module ids.
    fn scope_id(&self) -> Option<String> {
        if !self.options.module_id.is_empty() {
            return Some(self.options.module_id.clone());
        }
        if !self.options.file_path.is_empty() {
            return Some(format!("_{}", path_hash(&self.options.file_path)));
        }
        None
    }

    /// `wx:ref="name"` compiles to a marker class the runtime can query; the
    /// directive itself never reaches the output.
    fn process_ref(&mut self, element: &mut Element) {
        let ref_name = format!("{}ref", self.options.src_mode.directive_prefix());
        let attr = match element.remove_attr(&ref_name) {
            Some(a) => a,
            None => return,
        };
        let key = attr
            .value
            .as_ref()
            .map(|v| v.raw().trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("ref{}", self.meta.refs.len()));

        let marker = match self.scope_id() {
            Some(id) if element.has_scoped => format!("ref-{}-{}", key, id),
            _ => format!("ref-{}", key),
        };
        append_class(element, &marker);

        let in_for = element.for_info.is_some()
            || self
                .stack
                .iter()
                .any(|ancestor| ancestor.for_info.is_some());
        self.meta.refs.push(RefDescriptor {
            key,
            selector: format!(".{}", marker),
            ref_type: if element.is_component {
                RefType::Component
            } else {
                RefType::Node
            },
            all: in_for,
        });
    }

    /// Normalizes event bindings. Handlers with inline arguments (and every
    /// handler under `forceProxyEvent`) are routed through the proxy handler
    /// with their config accumulated on the element.
    fn process_events(&mut self, element: &mut Element) {
        let prefixes = self.options.src_mode.event_prefixes();
        let mut configs: Vec<String> = Vec::new();

        for attr in element.attrs.iter_mut() {
            let event = match prefixes
                .iter()
                .find_map(|p| attr.name.strip_prefix(p).filter(|rest| !rest.is_empty()))
            {
                // Ali camel-cases the event after its prefix (`onTap`); the
                // proxy config entry is lowercase in every dialect.
                Some(e) if self.options.src_mode == Mode::Ali => {
                    e.trim_start_matches(':').to_ascii_lowercase()
                }
                Some(e) => e.trim_start_matches(':').to_string(),
                None => continue,
            };
            let value = match &attr.value {
                Some(AttrValue::Static(v)) => v.trim().to_string(),
                _ => continue,
            };
            if value == EVENT_PROXY_HANDLER {
                continue;
            }
            let caps = match HANDLER_RE.captures(&value) {
                Some(c) => c,
                None => continue, // not confidently a handler reference
            };
            let handler = caps[1].to_string();
            let args = caps.get(2).map(|m| m.as_str().trim().to_string());
            let needs_proxy = self.options.force_proxy_event || args.is_some();
            if !needs_proxy {
                continue;
            }
            let entry = match args.filter(|a| !a.is_empty()) {
                Some(a) => format!("['{}','{}',[{}]]", event, handler, a),
                None => format!("['{}','{}']", event, handler),
            };
            configs.push(entry);
            attr.value = Some(AttrValue::Static(EVENT_PROXY_HANDLER.to_string()));
        }

        if !configs.is_empty() {
            element.attrs.push(Attribute {
                name: EVENT_CONFIG_ATTR.to_string(),
                value: Some(AttrValue::Dynamic {
                    raw: format!("{{{{[{}]}}}}", configs.join(",")),
                }),
            });
        }
    }

    // ── wxs extraction ───────────────────────────────────────────────────

    fn handle_wxs(&mut self, element: Element, unary: bool, reporter: &mut Reporter) {
        let module = element
            .attr_raw("module")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let src = element
            .attr_raw("src")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let body = if unary {
            String::new()
        } else {
            match self.source[self.pos..].find("</wxs>") {
                Some(rel) => {
                    let raw = self.source[self.pos..self.pos + rel].to_string();
                    self.pos += rel + "</wxs>".len();
                    restore_expressions(&raw, &self.expressions)
                }
                None => {
                    reporter.error_at(PARSE_ERROR, "unclosed <wxs> tag", element.location);
                    self.pos = self.source.len();
                    String::new()
                }
            }
        };

        let module = match module {
            Some(m) => m,
            None => {
                reporter.error_at(
                    PARSE_ERROR,
                    "<wxs> requires a module attribute",
                    element.location,
                );
                return;
            }
        };
        match src {
            Some(path) => {
                self.meta.wxs_module_map.insert(module, path);
            }
            None => {
                let trimmed = body.trim().to_string();
                if trimmed.is_empty() {
                    reporter.error_at(
                        PARSE_ERROR,
                        format!("<wxs module=\"{}\"> has neither src nor body", module),
                        element.location,
                    );
                } else {
                    self.meta.wxs_content_map.insert(module, trimmed);
                }
            }
        }
    }

    // ── pruned subtrees ──────────────────────────────────────────────────

    /// Skips tokens until the conditional-pruned element's subtree closes.
    /// Depth counting is tag-agnostic; a malformed pruned region degrades to
    /// skipping the remainder, which recovery already tolerates.
    fn skip_subtree(&mut self) {
        let mut depth = 1usize;
        let len = self.source.len();
        while self.pos < len && depth > 0 {
            let rest = &self.source[self.pos..];
            if rest.starts_with("<!--") {
                self.pos = match self.source[self.pos..].find("-->") {
                    Some(rel) => self.pos + rel + 3,
                    None => len,
                };
            } else if rest.starts_with("</") {
                self.pos = match self.source[self.pos..].find('>') {
                    Some(rel) => self.pos + rel + 1,
                    None => len,
                };
                depth -= 1;
            } else if rest.starts_with('<') && starts_tag_name(rest.as_bytes().get(1).copied()) {
                match find_tag_end(self.source.as_bytes(), self.pos) {
                    Some(end) => {
                        let segment = self.source[self.pos + 1..end].trim_end();
                        if !segment.ends_with('/') {
                            depth += 1;
                        }
                        self.pos = end + 1;
                    }
                    None => self.pos = len,
                }
            } else {
                self.pos += utf8_len(self.source.as_bytes()[self.pos]);
            }
        }
    }

    // ── tree assembly ────────────────────────────────────────────────────

    fn finish_element(&mut self, element: Element) {
        self.attach(Node::Element(element));
    }

    fn attach(&mut self, node: Node) {
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => self.roots.push(node),
        }
    }
}

fn starts_tag_name(byte: Option<u8>) -> bool {
    matches!(byte, Some(b) if b.is_ascii_alphabetic() || b == b'_')
}

/// Offset of the first non-whitespace byte of a text run, for locations.
fn start_of_content(raw: &str, start: usize) -> usize {
    let skipped = raw.len() - raw.trim_start().len();
    start + skipped
}

/// Byte index of the `>` ending the tag that starts at `start`, skipping
/// quoted attribute values.
fn find_tag_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'>' => return Some(i),
                _ => {}
            },
        }
        i += 1;
    }
    None
}

fn strip_mustache(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(inner) = trimmed.strip_prefix("{{").and_then(|s| s.strip_suffix("}}")) {
        inner.trim().to_string()
    } else {
        trimmed.to_string()
    }
}

fn append_class(element: &mut Element, marker: &str) {
    if let Some(attr) = element.attrs.iter_mut().find(|a| a.name == "class") {
        let raw = attr
            .value
            .as_ref()
            .map(|v| v.raw().to_string())
            .unwrap_or_default();
        if raw.split_whitespace().any(|c| c == marker) {
            return;
        }
        let joined = if raw.trim().is_empty() {
            marker.to_string()
        } else {
            format!("{} {}", raw, marker)
        };
        attr.value = Some(AttrValue::from_raw(&joined));
        return;
    }
    element.attrs.push(Attribute {
        name: "class".to_string(),
        value: Some(AttrValue::Static(marker.to_string())),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    fn opts() -> ParseOptions {
        ParseOptions {
            using_components: vec!["my-card".to_string()],
            module_id: "_a1b2c3d".to_string(),
            ..ParseOptions::default()
        }
    }

    fn parse_ok(source: &str, options: &ParseOptions) -> ParseOutcome {
        let mut reporter = Reporter::new("test.stml");
        let outcome = parse(source, options, &mut reporter);
        assert!(
            !reporter.has_errors(),
            "unexpected errors: {:?}",
            reporter.diagnostics()
        );
        outcome
    }

    fn root_el(outcome: &ParseOutcome) -> &Element {
        outcome.root.as_element().expect("element root")
    }

    #[test]
    fn test_basic_tree() {
        let outcome = parse_ok(
            "<view class=\"box\"><text>hi {{name}}</text></view>",
            &opts(),
        );
        let root = root_el(&outcome);
        assert_eq!(root.tag, "view");
        assert_eq!(root.attr_raw("class"), Some("box"));
        let text_el = root.children[0].as_element().unwrap();
        assert_eq!(text_el.tag, "text");
        match &text_el.children[0] {
            Node::Text(t) => assert_eq!(t.value, "hi {{name}}"),
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn test_mustache_shields_angle_brackets() {
        let outcome = parse_ok("<view hidden=\"{{a < b && c > d}}\">x</view>", &opts());
        let root = root_el(&outcome);
        assert_eq!(root.attr_raw("hidden"), Some("{{a < b && c > d}}"));
    }

    #[test]
    fn test_nested_braces_in_mustache() {
        let outcome = parse_ok("<view data-x=\"{{ {a: {b: 1}} }}\"/>", &opts());
        let root = root_el(&outcome);
        assert_eq!(root.attr_raw("data-x"), Some("{{ {a: {b: 1}} }}"));
    }

    #[test]
    fn test_if_chain_and_for_directives() {
        let outcome = parse_ok(
            concat!(
                "<block>",
                "<view wx:if=\"{{a}}\">1</view>",
                "<view wx:elif=\"{{b}}\">2</view>",
                "<view wx:else>3</view>",
                "<view wx:for=\"{{list}}\" wx:for-item=\"row\" wx:for-index=\"i\" wx:key=\"id\"/>",
                "</block>"
            ),
            &opts(),
        );
        let root = root_el(&outcome);
        let kinds: Vec<_> = root
            .children
            .iter()
            .filter_map(|c| c.as_element())
            .filter_map(|e| e.if_info.as_ref().map(|i| i.kind))
            .collect();
        assert_eq!(kinds, vec![IfKind::If, IfKind::Elif, IfKind::Else]);
        let for_el = root.children[3].as_element().unwrap();
        let info = for_el.for_info.as_ref().unwrap();
        assert_eq!(info.source, "list");
        assert_eq!(info.item, "row");
        assert_eq!(info.index, "i");
        assert_eq!(info.key.as_deref(), Some("id"));
    }

    #[test]
    fn test_component_classification() {
        let mut options = opts();
        options.check_using_components = true;
        let mut reporter = Reporter::new("test.stml");
        let outcome = parse(
            "<view><my-card/><lost-widget/></view>",
            &options,
            &mut reporter,
        );
        let root = root_el(&outcome);
        let card = root.children[0].as_element().unwrap();
        assert!(card.is_component);
        assert!(!card.is_native);
        let lost = root.children[1].as_element().unwrap();
        assert!(lost.is_native);
        let warnings: Vec<_> = reporter
            .diagnostics()
            .iter()
            .filter(|d| d.code == UNKNOWN_COMPONENT)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("lost-widget"));
    }

    #[test]
    fn test_attr_qualifier_kept_and_dropped() {
        let mut options = opts();
        options.mode = Mode::Ali;
        let outcome = parse_ok(
            "<view size@ali=\"large\" color@wx|swan=\"red\">x</view>",
            &options,
        );
        let root = root_el(&outcome);
        assert_eq!(root.attr_raw("size"), Some("large"));
        assert!(!root.has_attr("color"));
        assert!(!root.has_attr("color@wx|swan"));
    }

    #[test]
    fn test_env_qualifier() {
        let mut options = opts();
        options.env = "prod".to_string();
        let outcome = parse_ok("<view debug@:dev=\"1\" tag@:prod=\"2\"/>", &options);
        let root = root_el(&outcome);
        assert!(!root.has_attr("debug"));
        assert_eq!(root.attr_raw("tag"), Some("2"));
    }

    #[test]
    fn test_element_level_conditional_prunes_subtree() {
        let mut options = opts();
        options.mode = Mode::Swan;
        let outcome = parse_ok(
            "<view><text @wx>wx only <text>nested</text></text><text @swan>kept</text></view>",
            &options,
        );
        let root = root_el(&outcome);
        assert_eq!(root.children.len(), 1);
        let kept = root.children[0].as_element().unwrap();
        assert!(!kept.has_attr("@swan"));
        match &kept.children[0] {
            Node::Text(t) => assert_eq!(t.value, "kept"),
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn test_any_matching_element_marker_retains() {
        let mut options = opts();
        options.mode = Mode::Swan;
        let outcome = parse_ok(
            "<view><text @wx @swan>kept</text><text @ali @tt>gone</text></view>",
            &options,
        );
        let root = root_el(&outcome);
        // The first marker fails but the second matches, so the element stays.
        assert_eq!(root.children.len(), 1);
        let kept = root.children[0].as_element().unwrap();
        assert!(kept.attrs.is_empty());
        match &kept.children[0] {
            Node::Text(t) => assert_eq!(t.value, "kept"),
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn test_defs_substitution() {
        let mut options = opts();
        options.defs.insert(
            "__ENV__".to_string(),
            serde_json::Value::String("prod".to_string()),
        );
        options
            .defs
            .insert("__DEBUG__".to_string(), serde_json::Value::Bool(false));
        let outcome = parse_ok(
            "<view wx:if=\"{{__ENV__ === 'prod' && !__DEBUG__}}\">x</view>",
            &options,
        );
        let root = root_el(&outcome);
        let cond = root.if_info.as_ref().unwrap().condition.as_ref().unwrap();
        assert_eq!(cond, "\"prod\" === 'prod' && !false");
    }

    #[test]
    fn test_defs_value_with_dollar_is_literal() {
        let mut options = opts();
        options.defs.insert(
            "__PRICE__".to_string(),
            serde_json::Value::String("$1.50".to_string()),
        );
        let outcome = parse_ok("<text money=\"{{__PRICE__}}\">x</text>", &options);
        let root = root_el(&outcome);
        // `$1` must not be read as a capture-group reference.
        assert_eq!(root.attr_raw("money"), Some("\"$1.50\""));
    }

    #[test]
    fn test_wxs_extraction() {
        let outcome = parse_ok(
            concat!(
                "<wxs module=\"fmt\" src=\"./fmt.wxs\"/>",
                "<wxs module=\"util\">module.exports = { double: function (x) { return x * 2 } }</wxs>",
                "<view>{{util.double(2)}}</view>"
            ),
            &opts(),
        );
        assert_eq!(
            outcome.meta.wxs_module_map.get("fmt").map(String::as_str),
            Some("./fmt.wxs")
        );
        assert!(outcome
            .meta
            .wxs_content_map
            .get("util")
            .map(|s| s.contains("x * 2"))
            .unwrap_or(false));
        let root = root_el(&outcome);
        assert_eq!(root.tag, "view");
    }

    #[test]
    fn test_wxs_without_module_reports() {
        let mut reporter = Reporter::new("test.stml");
        parse("<wxs src=\"./a.wxs\"/><view/>", &opts(), &mut reporter);
        assert!(reporter.has_errors());
    }

    #[test]
    fn test_ref_becomes_marker_class() {
        let mut options = opts();
        options.has_scoped = true;
        let outcome = parse_ok(
            "<view wx:for=\"{{list}}\"><my-card wx:ref=\"card\" class=\"base\"/></view>",
            &options,
        );
        let root = root_el(&outcome);
        let card = root.children[0].as_element().unwrap();
        assert!(!card.has_attr("wx:ref"));
        assert_eq!(card.attr_raw("class"), Some("base ref-card-_a1b2c3d"));
        let descriptor = &outcome.meta.refs[0];
        assert_eq!(descriptor.key, "card");
        assert_eq!(descriptor.selector, ".ref-card-_a1b2c3d");
        assert_eq!(descriptor.ref_type, RefType::Component);
        assert!(descriptor.all);
    }

    #[test]
    fn test_ref_scope_falls_back_to_file_path() {
        let mut options = opts();
        options.has_scoped = true;
        options.module_id = String::new();
        options.file_path = "src/pages/detail.stml".to_string();
        let outcome = parse_ok("<my-card wx:ref=\"card\"/>", &options);
        let expected = format!("ref-card-_{}", path_hash("src/pages/detail.stml"));
        let root = root_el(&outcome);
        assert_eq!(root.attr_raw("class"), Some(expected.as_str()));
        assert_eq!(outcome.meta.refs[0].selector, format!(".{}", expected));
    }

    #[test]
    fn test_event_proxy_with_inline_args() {
        let outcome = parse_ok("<view bindtap=\"onTap(1, $event)\">x</view>", &opts());
        let root = root_el(&outcome);
        assert_eq!(root.attr_raw("bindtap"), Some(EVENT_PROXY_HANDLER));
        let config = root.attr_raw(EVENT_CONFIG_ATTR).unwrap();
        assert_eq!(config, "{{[['tap','onTap',[1, $event]]]}}");
    }

    #[test]
    fn test_force_proxy_event() {
        let mut options = opts();
        options.force_proxy_event = true;
        let outcome = parse_ok(
            "<view bindtap=\"onTap\" catchtouchmove=\"onMove\"/>",
            &options,
        );
        let root = root_el(&outcome);
        assert_eq!(root.attr_raw("bindtap"), Some(EVENT_PROXY_HANDLER));
        assert_eq!(root.attr_raw("catchtouchmove"), Some(EVENT_PROXY_HANDLER));
        let config = root.attr_raw(EVENT_CONFIG_ATTR).unwrap();
        assert!(config.contains("['tap','onTap']"));
        assert!(config.contains("['touchmove','onMove']"));
    }

    #[test]
    fn test_plain_event_binding_left_alone() {
        let outcome = parse_ok("<view bindtap=\"onTap\"/>", &opts());
        let root = root_el(&outcome);
        assert_eq!(root.attr_raw("bindtap"), Some("onTap"));
        assert!(!root.has_attr(EVENT_CONFIG_ATTR));
    }

    #[test]
    fn test_native_template_keeps_event_bindings() {
        let mut options = opts();
        options.is_native = true;
        options.force_proxy_event = true;
        let outcome = parse_ok("<view bindtap=\"onTap(1, $event)\"/>", &options);
        let root = root_el(&outcome);
        // The platform runtime dispatches these itself; no proxy rewrite.
        assert_eq!(root.attr_raw("bindtap"), Some("onTap(1, $event)"));
        assert!(!root.has_attr(EVENT_CONFIG_ATTR));
    }

    #[test]
    fn test_ali_dialect_directives() {
        let mut options = opts();
        options.src_mode = Mode::Ali;
        options.mode = Mode::Ali;
        let outcome = parse_ok(
            "<view a:if=\"{{ok}}\" onTap=\"go(1)\"><text a:for=\"{{xs}}\">i</text></view>",
            &options,
        );
        let root = root_el(&outcome);
        assert!(root.if_info.is_some());
        assert_eq!(root.attr_raw("onTap"), Some(EVENT_PROXY_HANDLER));
        let inner = root.children[0].as_element().unwrap();
        assert_eq!(inner.for_info.as_ref().map(|f| f.source.as_str()), Some("xs"));
    }

    #[test]
    fn test_ali_event_names_lowercase_in_config() {
        let mut options = opts();
        options.src_mode = Mode::Ali;
        options.mode = Mode::Ali;
        let outcome = parse_ok(
            "<view onTap=\"go(1)\" catchTouchStart=\"hold($event)\"/>",
            &options,
        );
        let root = root_el(&outcome);
        let config = root.attr_raw(EVENT_CONFIG_ATTR).unwrap();
        // Same config vocabulary as the wx prefixes produce.
        assert!(config.contains("['tap','go',[1]]"));
        assert!(config.contains("['touchstart','hold',[$event]]"));
    }

    #[test]
    fn test_unclosed_tag_recovers() {
        let mut reporter = Reporter::new("test.stml");
        let outcome = parse("<view><text>hello</view>", &opts(), &mut reporter);
        assert!(reporter.has_errors());
        let root = root_el(&outcome);
        assert_eq!(root.tag, "view");
        assert_eq!(root.children.len(), 1);
    }

    #[test]
    fn test_stray_close_tag_reported() {
        let mut reporter = Reporter::new("test.stml");
        let outcome = parse("<view/></text>", &opts(), &mut reporter);
        assert!(reporter.has_errors());
        assert_eq!(root_el(&outcome).tag, "view");
    }

    #[test]
    fn test_multiple_roots_get_block_wrapper() {
        let outcome = parse_ok("<view>a</view><view>b</view>", &opts());
        let root = root_el(&outcome);
        assert_eq!(root.tag, "block");
        assert_eq!(root.children.len(), 2);
    }

    #[test]
    fn test_comments_are_dropped() {
        let outcome = parse_ok("<view><!-- note --><text>x</text></view>", &opts());
        let root = root_el(&outcome);
        assert_eq!(root.children.len(), 1);
    }

    #[test]
    fn test_entity_decoding_is_opt_in() {
        let mut options = opts();
        let outcome = parse_ok("<text>a &amp; b</text>", &options);
        match &root_el(&outcome).children[0] {
            Node::Text(t) => assert_eq!(t.value, "a &amp; b"),
            other => panic!("expected text, got {:?}", other),
        }
        options.decode_html_text = true;
        let outcome = parse_ok("<text>a &amp; b &#64;</text>", &options);
        match &root_el(&outcome).children[0] {
            Node::Text(t) => assert_eq!(t.value, "a & b @"),
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn test_generics_collected() {
        let outcome = parse_ok("<my-card generic:selectable=\"custom-row\"/>", &opts());
        let root = root_el(&outcome);
        let generics = root.generics.as_ref().unwrap();
        assert_eq!(
            generics.get("selectable").map(String::as_str),
            Some("custom-row")
        );
    }

    #[test]
    fn test_source_locations() {
        let outcome = parse_ok("<view>\n  <text>x</text>\n</view>", &opts());
        let root = root_el(&outcome);
        assert_eq!(root.location, SourceLocation::new(1, 1));
        let text_el = root.children[0].as_element().unwrap();
        assert_eq!(text_el.location.line, 2);
        assert_eq!(text_el.location.column, 3);
    }
}
