//! Scope-binding transformer for generated render code.
//!
//! Rewrites bare free identifiers into member accesses on the implicit
//! runtime-data object (`count` becomes `this.count`) so the render function
//! reads live instance data. Runtime helpers, wxs module names and JS globals
//! stay untouched. The rewrite splices spans of the original text rather than
//! reprinting the AST, so everything outside the substituted identifiers is
//! preserved byte for byte.

use lazy_static::lazy_static;
use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_ast_visit::walk::{walk_expression, walk_object_property, walk_program};
use oxc_ast_visit::Visit;
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType};
use oxc_syntax::scope::ScopeFlags;
use std::collections::HashSet;

lazy_static! {
    static ref JS_GLOBALS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("Math");
        s.insert("console");
        s.insert("JSON");
        s.insert("Date");
        s.insert("String");
        s.insert("Number");
        s.insert("Boolean");
        s.insert("Array");
        s.insert("Object");
        s.insert("Promise");
        s.insert("Map");
        s.insert("Set");
        s.insert("RegExp");
        s.insert("Error");
        s.insert("isNaN");
        s.insert("isFinite");
        s.insert("parseInt");
        s.insert("parseFloat");
        s.insert("encodeURIComponent");
        s.insert("decodeURIComponent");
        s.insert("encodeURI");
        s.insert("decodeURI");
        s.insert("undefined");
        s.insert("NaN");
        s.insert("Infinity");
        s.insert("arguments");
        s.insert("require");
        s.insert("global");
        s.insert("globalThis");
        // Event placeholder in proxied handler argument lists.
        s.insert("$event");
        s
    };
}

/// Options for the full analysis.
#[derive(Debug, Default, Clone)]
pub struct BindConfig {
    /// Names never rewritten: runtime helpers plus wxs module names.
    pub ignore_map: HashSet<String>,
    /// Collect the data keys the render code reads.
    pub need_collect: bool,
    /// Fold conditional branches whose test is a compile-time constant.
    pub render_reduce: bool,
}

/// Result of a binding pass.
#[derive(Debug, Clone, PartialEq)]
pub struct BindResult {
    pub code: String,
    /// Top-level data keys read by the code, in first-use order.
    /// Only produced by the full analysis.
    pub prop_keys: Option<Vec<String>>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCOPE TRACKING
// Shared by the binder and the cross-platform rewrite collector
// ═══════════════════════════════════════════════════════════════════════════════

/// Lexical binding tracker. The stacked form resolves shadowing; the flat
/// form treats every binding name in the fragment as bound everywhere.
pub(crate) struct ScopeTracker {
    stack: Vec<HashSet<String>>,
    flat: Option<HashSet<String>>,
}

impl ScopeTracker {
    pub(crate) fn stacked() -> Self {
        Self {
            stack: vec![HashSet::new()],
            flat: None,
        }
    }

    pub(crate) fn flat(bindings: HashSet<String>) -> Self {
        Self {
            stack: Vec::new(),
            flat: Some(bindings),
        }
    }

    pub(crate) fn push(&mut self) {
        if self.flat.is_none() {
            self.stack.push(HashSet::new());
        }
    }

    pub(crate) fn pop(&mut self) {
        if self.flat.is_none() {
            self.stack.pop();
        }
    }

    pub(crate) fn add(&mut self, name: String) {
        if let Some(scope) = self.stack.last_mut() {
            scope.insert(name);
        }
    }

    pub(crate) fn is_bound(&self, name: &str) -> bool {
        if let Some(flat) = &self.flat {
            return flat.contains(name);
        }
        self.stack.iter().rev().any(|s| s.contains(name))
    }

    pub(crate) fn collect_binding_names(&mut self, pattern: &BindingPattern<'_>) {
        match pattern {
            BindingPattern::BindingIdentifier(id) => {
                self.add(id.name.to_string());
            }
            BindingPattern::ObjectPattern(obj) => {
                for prop in &obj.properties {
                    self.collect_binding_names(&prop.value);
                }
                if let Some(rest) = &obj.rest {
                    self.collect_binding_names(&rest.argument);
                }
            }
            BindingPattern::ArrayPattern(arr) => {
                for elem in &arr.elements {
                    if let Some(p) = elem {
                        self.collect_binding_names(p);
                    }
                }
                if let Some(rest) = &arr.rest {
                    self.collect_binding_names(&rest.argument);
                }
            }
            _ => {}
        }
    }

    pub(crate) fn collect_params(&mut self, params: &FormalParameters<'_>) {
        for param in &params.items {
            self.collect_binding_names(&param.pattern);
        }
        if let Some(rest) = &params.rest {
            self.collect_binding_names(&rest.rest.argument);
        }
    }

    /// Function declarations, `var`s and import specifiers bind before their
    /// statement runs.
    pub(crate) fn hoist_statements(&mut self, statements: &[Statement<'_>]) {
        for stmt in statements {
            match stmt {
                Statement::FunctionDeclaration(func) => {
                    if let Some(id) = &func.id {
                        self.add(id.name.to_string());
                    }
                }
                Statement::VariableDeclaration(decl) => {
                    for d in &decl.declarations {
                        self.collect_binding_names(&d.id);
                    }
                }
                Statement::ImportDeclaration(import) => {
                    if let Some(specifiers) = &import.specifiers {
                        for spec in specifiers {
                            match spec {
                                ImportDeclarationSpecifier::ImportSpecifier(s) => {
                                    self.add(s.local.name.to_string());
                                }
                                ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                                    self.add(s.local.name.to_string());
                                }
                                ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                                    self.add(s.local.name.to_string());
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

pub(crate) fn apply_replacements(code: &str, mut replacements: Vec<(u32, u32, String)>) -> String {
    // On equal starts the wider span goes first, so a zero-width insertion
    // at the same offset ends up ahead of the text it abuts.
    replacements.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
    let mut result = code.to_string();
    for (start, end, replacement) in replacements {
        result.replace_range((start as usize)..(end as usize), &replacement);
    }
    result
}

// ═══════════════════════════════════════════════════════════════════════════════
// FULL ANALYSIS
// ═══════════════════════════════════════════════════════════════════════════════

/// Rewrites free identifiers with full scope resolution: declarations,
/// function params, catch params and destructuring patterns shadow the
/// instance data and are left alone.
pub fn transform(code: &str, config: &BindConfig) -> BindResult {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, code, SourceType::default()).parse();
    if !ret.errors.is_empty() {
        // Callers validate the fragment before binding; an unparsable input
        // passes through unchanged.
        return BindResult {
            code: code.to_string(),
            prop_keys: config.need_collect.then(Vec::new),
        };
    }

    let mut binder = Binder {
        scopes: ScopeTracker::stacked(),
        ignore_map: &config.ignore_map,
        render_reduce: config.render_reduce,
        replacements: Vec::new(),
        prop_keys: Vec::new(),
        seen_keys: HashSet::new(),
    };
    binder.visit_program(&ret.program);

    let prop_keys = config.need_collect.then(|| binder.prop_keys.clone());
    BindResult {
        code: apply_replacements(code, binder.replacements),
        prop_keys,
    }
}

/// Simplified mode: the same rewrite without scope tracking. Every binding
/// name anywhere in the fragment is excluded everywhere, with no shadowing
/// resolution.
pub fn transform_simple(code: &str, ignore_map: &HashSet<String>) -> BindResult {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, code, SourceType::default()).parse();
    if !ret.errors.is_empty() {
        return BindResult {
            code: code.to_string(),
            prop_keys: None,
        };
    }

    let mut bindings = HashSet::new();
    let mut collector = FlatBindingCollector {
        symbols: &mut bindings,
    };
    collector.visit_program(&ret.program);

    let mut binder = Binder {
        scopes: ScopeTracker::flat(bindings),
        ignore_map,
        render_reduce: false,
        replacements: Vec::new(),
        prop_keys: Vec::new(),
        seen_keys: HashSet::new(),
    };
    binder.visit_program(&ret.program);

    BindResult {
        code: apply_replacements(code, binder.replacements),
        prop_keys: None,
    }
}

/// Collects every binding identifier in the fragment, flat, ignoring scope
/// structure.
struct FlatBindingCollector<'s> {
    symbols: &'s mut HashSet<String>,
}

impl<'s, 'a> Visit<'a> for FlatBindingCollector<'s> {
    fn visit_binding_identifier(&mut self, ident: &BindingIdentifier<'a>) {
        self.symbols.insert(ident.name.to_string());
    }

    fn visit_function(&mut self, func: &Function<'a>, flags: ScopeFlags) {
        if let Some(id) = &func.id {
            self.symbols.insert(id.name.to_string());
        }
        oxc_ast_visit::walk::walk_function(self, func, flags);
    }
}

struct Binder<'s> {
    scopes: ScopeTracker,
    ignore_map: &'s HashSet<String>,
    render_reduce: bool,
    replacements: Vec<(u32, u32, String)>,
    prop_keys: Vec<String>,
    seen_keys: HashSet<String>,
}

impl<'s> Binder<'s> {
    fn should_bind(&self, name: &str) -> bool {
        !self.ignore_map.contains(name)
            && !JS_GLOBALS.contains(name)
            && !self.scopes.is_bound(name)
    }

    fn record(&mut self, start: u32, end: u32, replacement: String) {
        self.replacements.push((start, end, replacement));
    }

    fn collect_key(&mut self, name: &str) {
        if self.seen_keys.insert(name.to_string()) {
            self.prop_keys.push(name.to_string());
        }
    }
}

impl<'s, 'a> Visit<'a> for Binder<'s> {
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

    fn visit_object_property(&mut self, prop: &ObjectProperty<'a>) {
        // Shorthand rewrites the whole property so `{a}` becomes
        // `{a: this.a}` instead of the invalid `{this.a}`.
        if prop.shorthand {
            if let Expression::Identifier(id) = &prop.value {
                let name = id.name.to_string();
                if self.should_bind(&name) {
                    self.record(
                        prop.span.start,
                        prop.span.end,
                        format!("{}: this.{}", name, name),
                    );
                    self.collect_key(&name);
                }
                return;
            }
        }
        walk_object_property(self, prop);
    }

    fn visit_expression(&mut self, expr: &Expression<'a>) {
        if self.render_reduce {
            if let Expression::ConditionalExpression(cond) = expr {
                if let Some(truthy) = eval_condition(&cond.test) {
                    let chosen = if truthy { &cond.consequent } else { &cond.alternate };
                    let chosen_span = chosen.span();
                    // Drop the test and the dead branch, keep the live arm
                    // in place so its own rewrites still apply.
                    self.record(cond.span.start, chosen_span.start, String::new());
                    self.record(chosen_span.end, cond.span.end, String::new());
                    self.visit_expression(chosen);
                    return;
                }
            }
        }
        walk_expression(self, expr);
    }

    fn visit_identifier_reference(&mut self, ident: &IdentifierReference<'a>) {
        let name = ident.name.to_string();
        if self.should_bind(&name) {
            self.record(ident.span.start, ident.span.end, format!("this.{}", name));
            self.collect_key(&name);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANT FOLDING
// Truthiness of compile-time literal tests, for render reduction
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Bool(bool),
    Num(f64),
    Str(String),
    Null,
    Undefined,
}

fn literal_truthy(lit: &Literal) -> bool {
    match lit {
        Literal::Bool(b) => *b,
        Literal::Num(n) => *n != 0.0 && !n.is_nan(),
        Literal::Str(s) => !s.is_empty(),
        Literal::Null | Literal::Undefined => false,
    }
}

fn literal_value(expr: &Expression<'_>) -> Option<Literal> {
    match expr {
        Expression::BooleanLiteral(lit) => Some(Literal::Bool(lit.value)),
        Expression::NumericLiteral(lit) => Some(Literal::Num(lit.value)),
        Expression::StringLiteral(lit) => Some(Literal::Str(lit.value.to_string())),
        Expression::NullLiteral(_) => Some(Literal::Null),
        Expression::Identifier(id) if id.name == "undefined" => Some(Literal::Undefined),
        Expression::Identifier(id) if id.name == "NaN" => Some(Literal::Num(f64::NAN)),
        Expression::ParenthesizedExpression(p) => literal_value(&p.expression),
        _ => None,
    }
}

/// Truthiness of the test when it is built entirely from literals.
/// Anything touching live data yields `None` and the branch is kept.
fn eval_condition(expr: &Expression<'_>) -> Option<bool> {
    if let Some(lit) = literal_value(expr) {
        return Some(literal_truthy(&lit));
    }
    match expr {
        Expression::ParenthesizedExpression(p) => eval_condition(&p.expression),
        Expression::UnaryExpression(u) if u.operator == UnaryOperator::LogicalNot => {
            eval_condition(&u.argument).map(|v| !v)
        }
        Expression::LogicalExpression(l) => {
            let left = eval_condition(&l.left)?;
            match l.operator {
                LogicalOperator::And => {
                    if !left {
                        Some(false)
                    } else {
                        eval_condition(&l.right)
                    }
                }
                LogicalOperator::Or => {
                    if left {
                        Some(true)
                    } else {
                        eval_condition(&l.right)
                    }
                }
                LogicalOperator::Coalesce => None,
            }
        }
        Expression::BinaryExpression(b) => {
            let left = literal_value(&b.left)?;
            let right = literal_value(&b.right)?;
            let equal = match (&left, &right) {
                (Literal::Num(a), Literal::Num(bv)) => a == bv,
                (Literal::Str(a), Literal::Str(bv)) => a == bv,
                (Literal::Bool(a), Literal::Bool(bv)) => a == bv,
                (Literal::Null, Literal::Null) => true,
                (Literal::Undefined, Literal::Undefined) => true,
                // Cross-type comparisons are left to the runtime.
                _ => return None,
            };
            match b.operator {
                BinaryOperator::StrictEquality | BinaryOperator::Equality => Some(equal),
                BinaryOperator::StrictInequality | BinaryOperator::Inequality => Some(!equal),
                _ => None,
            }
        }
        _ => None,
    }
}
