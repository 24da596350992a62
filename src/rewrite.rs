//! Cross-platform script rewriting.
//!
//! When a module authored against one dialect's global API is compiled for a
//! different target, its call sites are statically rewritten: API calls gain a
//! trailing string argument naming the source dialect so the runtime can
//! translate arguments and results, and the bare dialect global is swapped
//! for the unified accessor with a single `require` prelude. Sites that
//! cannot be classified with confidence are left untouched rather than
//! guessed at. The rewrite collects dependencies against the original byte
//! offsets and splices them in descending position order, so untouched code
//! survives byte for byte.

use lazy_static::lazy_static;
use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_ast_visit::walk::{
    walk_call_expression, walk_object_property, walk_program,
};
use oxc_ast_visit::Visit;
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType};
use oxc_syntax::scope::ScopeFlags;
use regex::Regex;
use std::collections::HashSet;

use crate::bind::{apply_replacements, ScopeTracker};
use crate::codegen::js_string;
use crate::platform::Mode;
use crate::registry::ResourceRegistry;

/// Dialect-neutral API object every rewritten module calls into.
pub const UNIFIED_ACCESSOR: &str = "strata";
/// Module request backing the unified accessor.
pub const CORE_MODULE_REQUEST: &str = "@strata/core";

/// Registry bucket consulted for `?resolve` requests.
const RESOLVE_RESOURCE_TYPE: &str = "staticResources";

lazy_static! {
    /// Factory and lifecycle members that construct dialect-agnostic objects.
    /// Their signatures are fixed across dialects, so they never take the
    /// source-dialect argument.
    static ref FACTORY_MEMBERS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("createApp");
        s.insert("createPage");
        s.insert("createComponent");
        s.insert("createStore");
        s.insert("createStoreWithThis");
        s.insert("mixin");
        s.insert("injectMixins");
        s.insert("observable");
        s.insert("watch");
        s.insert("use");
        s.insert("set");
        s.insert("delete");
        s.insert("implement");
        s.insert("toPureObject");
        s.insert("getMixin");
        s
    };

    /// Matches an existing accessor binding, either CommonJS or an ES import.
    static ref ACCESSOR_IMPORT_RE: Regex = Regex::new(
        r#"(?:\brequire\(\s*["']@strata/core["']\s*\)|\bfrom\s+["']@strata/core["'])"#
    )
    .unwrap();
}

/// One pending edit against the original script source.
#[derive(Debug, Clone, PartialEq)]
pub enum RewriteDependency {
    /// Replace a span with the registry output path of a resource, resolved
    /// when the edits are applied. Falls back to the request path itself when
    /// the resource was never promoted.
    Resolve {
        start: u32,
        end: u32,
        package_root: Option<String>,
        resource_path: String,
    },
    /// Insert literal text at a position.
    Inject { position: u32, content: String },
    /// Replace a span with literal text.
    Replace {
        start: u32,
        end: u32,
        content: String,
    },
    /// A module-scoped `var x = require(...)` prelude, injected at most once.
    CommonJsVariable { name: String, request: String },
}

/// Parses the script and collects every edit the dialect rewrite calls for.
/// Unparsable input yields no edits.
pub fn collect_rewrites(
    source: &str,
    src_mode: Mode,
    package_root: Option<&str>,
) -> Vec<RewriteDependency> {
    let allocator = Allocator::default();
    // Module grammar first for ES sources, plain script as the CommonJS
    // fallback.
    let module_type = SourceType::default().with_module(true);
    let parsed = Parser::new(&allocator, source, module_type).parse();
    let program = if parsed.errors.is_empty() {
        parsed.program
    } else {
        let script = Parser::new(&allocator, source, SourceType::default()).parse();
        if !script.errors.is_empty() {
            return Vec::new();
        }
        script.program
    };

    let mut collector = RewriteCollector {
        global_name: src_mode.global_api_ident(),
        mode_literal: src_mode.as_str(),
        package_root,
        scopes: ScopeTracker::stacked(),
        dependencies: Vec::new(),
        needs_accessor: false,
    };
    collector.visit_program(&program);

    if collector.needs_accessor && !ACCESSOR_IMPORT_RE.is_match(source) {
        collector.dependencies.push(RewriteDependency::CommonJsVariable {
            name: UNIFIED_ACCESSOR.to_string(),
            request: CORE_MODULE_REQUEST.to_string(),
        });
    }
    collector.dependencies
}

/// Applies collected edits to the source. `Resolve` entries consult the
/// registry here, after every unit has had a chance to record its outputs.
pub fn apply_rewrites(
    source: &str,
    dependencies: Vec<RewriteDependency>,
    registry: &ResourceRegistry,
) -> String {
    let mut splices: Vec<(u32, u32, String)> = Vec::new();
    let mut injected: HashSet<String> = HashSet::new();
    for dep in dependencies {
        match dep {
            RewriteDependency::Resolve {
                start,
                end,
                package_root,
                resource_path,
            } => {
                let resolved = registry
                    .output_path(
                        RESOLVE_RESOURCE_TYPE,
                        package_root.as_deref(),
                        &resource_path,
                    )
                    .unwrap_or(resource_path);
                splices.push((start, end, js_string(&resolved)));
            }
            RewriteDependency::Inject { position, content } => {
                splices.push((position, position, content));
            }
            RewriteDependency::Replace {
                start,
                end,
                content,
            } => {
                splices.push((start, end, content));
            }
            RewriteDependency::CommonJsVariable { name, request } => {
                if injected.insert(name.clone()) {
                    let line = format!("var {} = require({});\n", name, js_string(&request));
                    splices.push((0, 0, line));
                }
            }
        }
    }
    apply_replacements(source, splices)
}

/// Collect-and-apply convenience for a whole script.
pub fn rewrite_script(
    source: &str,
    src_mode: Mode,
    package_root: Option<&str>,
    registry: &ResourceRegistry,
) -> String {
    let dependencies = collect_rewrites(source, src_mode, package_root);
    if dependencies.is_empty() {
        return source.to_string();
    }
    apply_rewrites(source, dependencies, registry)
}

struct RewriteCollector<'s> {
    global_name: &'static str,
    mode_literal: &'static str,
    package_root: Option<&'s str>,
    scopes: ScopeTracker,
    dependencies: Vec<RewriteDependency>,
    needs_accessor: bool,
}

impl<'s> RewriteCollector<'s> {
    fn global_in_scope(&self, name: &str) -> bool {
        (name == self.global_name || name == UNIFIED_ACCESSOR) && !self.scopes.is_bound(name)
    }

    /// `require("<path>?resolve")` collapses to the emitted output path.
    fn resolve_request(&self, call: &CallExpression<'_>) -> Option<RewriteDependency> {
        if let Expression::Identifier(callee) = &call.callee {
            if callee.name != "require" || self.scopes.is_bound("require") {
                return None;
            }
            if call.arguments.len() != 1 {
                return None;
            }
            if let Argument::StringLiteral(request) = &call.arguments[0] {
                if let Some((path, query)) = request.value.as_str().split_once('?') {
                    if query.split('&').any(|seg| seg == "resolve") {
                        return Some(RewriteDependency::Resolve {
                            start: call.span.start,
                            end: call.span.end,
                            package_root: self.package_root.map(|p| p.to_string()),
                            resource_path: path.to_string(),
                        });
                    }
                }
            }
        }
        None
    }

    /// A previously rewritten call already carries its dialect argument.
    fn has_mode_argument(&self, call: &CallExpression<'_>) -> bool {
        if let Some(Argument::StringLiteral(lit)) = call.arguments.last() {
            return lit.value == self.mode_literal;
        }
        false
    }
}

impl<'s, 'a> Visit<'a> for RewriteCollector<'s> {
    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        if let Some(dep) = self.resolve_request(call) {
            self.dependencies.push(dep);
            return;
        }
        if let Expression::StaticMemberExpression(member) = &call.callee {
            if let Expression::Identifier(object) = &member.object {
                if self.global_in_scope(object.name.as_str())
                    && !FACTORY_MEMBERS.contains(member.property.name.as_str())
                    && !self.has_mode_argument(call)
                {
                    let (position, content) = match call.arguments.last() {
                        Some(last) => (
                            last.span().end,
                            format!(", \"{}\"", self.mode_literal),
                        ),
                        None => (call.span.end - 1, format!("\"{}\"", self.mode_literal)),
                    };
                    self.dependencies
                        .push(RewriteDependency::Inject { position, content });
                }
            }
        }
        // Computed members and non-identifier objects fall through with no
        // argument injected; the walk below still rewrites the object
        // reference itself.
        walk_call_expression(self, call);
    }

    fn visit_identifier_reference(&mut self, ident: &IdentifierReference<'a>) {
        if ident.name == self.global_name && !self.scopes.is_bound(self.global_name) {
            self.dependencies.push(RewriteDependency::Replace {
                start: ident.span.start,
                end: ident.span.end,
                content: UNIFIED_ACCESSOR.to_string(),
            });
            self.needs_accessor = true;
        }
    }

    fn visit_object_property(&mut self, prop: &ObjectProperty<'a>) {
        // Shorthand keeps its key: `{wx}` becomes `{wx: strata}`.
        if prop.shorthand {
            if let Expression::Identifier(id) = &prop.value {
                if id.name == self.global_name && !self.scopes.is_bound(self.global_name) {
                    self.dependencies.push(RewriteDependency::Replace {
                        start: prop.span.start,
                        end: prop.span.end,
                        content: format!("{}: {}", self.global_name, UNIFIED_ACCESSOR),
                    });
                    self.needs_accessor = true;
                }
                return;
            }
        }
        walk_object_property(self, prop);
    }

    fn visit_program(&mut self, program: &Program<'a>) {
        self.scopes.hoist_statements(&program.body);
        walk_program(self, program);
    }

    fn visit_block_statement(&mut self, block: &BlockStatement<'a>) {
        self.scopes.push();
        self.scopes.hoist_statements(&block.body);
        for stmt in &block.body {
            self.visit_statement(stmt);
        }
        self.scopes.pop();
    }

    fn visit_variable_declaration(&mut self, decl: &VariableDeclaration<'a>) {
        for d in &decl.declarations {
            self.scopes.collect_binding_names(&d.id);
            if let Some(init) = &d.init {
                self.visit_expression(init);
            }
        }
    }

    fn visit_function(&mut self, func: &Function<'a>, _flags: ScopeFlags) {
        if let Some(id) = &func.id {
            self.scopes.add(id.name.to_string());
        }
        self.scopes.push();
        self.scopes.collect_params(&func.params);
        if let Some(body) = &func.body {
            self.scopes.hoist_statements(&body.statements);
            for stmt in &body.statements {
                self.visit_statement(stmt);
            }
        }
        self.scopes.pop();
    }

    fn visit_arrow_function_expression(&mut self, arrow: &ArrowFunctionExpression<'a>) {
        self.scopes.push();
        self.scopes.collect_params(&arrow.params);
        self.scopes.hoist_statements(&arrow.body.statements);
        for stmt in &arrow.body.statements {
            self.visit_statement(stmt);
        }
        self.scopes.pop();
    }

    fn visit_catch_clause(&mut self, clause: &CatchClause<'a>) {
        self.scopes.push();
        if let Some(param) = &clause.param {
            self.scopes.collect_binding_names(&param.pattern);
        }
        for stmt in &clause.body.body {
            self.visit_statement(stmt);
        }
        self.scopes.pop();
    }

    fn visit_for_statement(&mut self, stmt: &ForStatement<'a>) {
        self.scopes.push();
        if let Some(init) = &stmt.init {
            if let ForStatementInit::VariableDeclaration(decl) = init {
                self.visit_variable_declaration(decl);
            } else if let Some(expr) = init.as_expression() {
                self.visit_expression(expr);
            }
        }
        if let Some(test) = &stmt.test {
            self.visit_expression(test);
        }
        if let Some(update) = &stmt.update {
            self.visit_expression(update);
        }
        self.visit_statement(&stmt.body);
        self.scopes.pop();
    }

    fn visit_for_of_statement(&mut self, stmt: &ForOfStatement<'a>) {
        self.scopes.push();
        if let ForStatementLeft::VariableDeclaration(decl) = &stmt.left {
            for d in &decl.declarations {
                self.scopes.collect_binding_names(&d.id);
            }
        }
        self.visit_expression(&stmt.right);
        self.visit_statement(&stmt.body);
        self.scopes.pop();
    }

    fn visit_for_in_statement(&mut self, stmt: &ForInStatement<'a>) {
        self.scopes.push();
        if let ForStatementLeft::VariableDeclaration(decl) = &stmt.left {
            for d in &decl.declarations {
                self.scopes.collect_binding_names(&d.id);
            }
        }
        self.visit_expression(&stmt.right);
        self.visit_statement(&stmt.body);
        self.scopes.pop();
    }
}
