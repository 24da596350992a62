//! Per-unit compilation pipeline and the parallel build driver.
//!
//! A unit is one template resource compiled with one option set. The stages
//! run in a fixed order: parse, structural transforms, serialize, then either
//! native passthrough or render-code generation, binding and module assembly.
//! Units never see each other; the only shared state is the [`BuildContext`]
//! with its registry, content cache, merged inline-wxs sources and the
//! aggregated diagnostics list.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use crate::bind::{self, BindConfig};
use crate::codegen::{assemble_inject_source, gen_node, validate_fragment, AssembleInput};
use crate::parse::{parse, ParseOptions};
use crate::platform::Mode;
use crate::registry::{
    lock_recovering, path_hash, ContentCache, RecordOptions, ResourceRegistry, MAIN_PACKAGE,
};
use crate::report::{Diagnostic, Reporter, CODEGEN_FAILURE};
use crate::rewrite;
use crate::serialize::serialize;
use crate::structural::{compress_component_names, escape_using_components, escape_web_tags};

/// Runtime helper names the binder must never rewrite.
const RENDER_HELPERS: [&str; 4] = ["_i", "_c", "_r", "_sc"];

// ═══════════════════════════════════════════════════════════════════════════════
// BUILD CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// Process-wide build state, passed explicitly into every entry point.
#[derive(Default)]
pub struct BuildContext {
    pub registry: ResourceRegistry,
    pub content_cache: ContentCache,
    /// Inline wxs sources, keyed `"<resourcePath>~<module>"`.
    wxs_contents: Mutex<BTreeMap<String, String>>,
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl BuildContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inline wxs source for a `path?wxsModule=name` request, as emitted by
    /// the assembled module's require prelude.
    pub fn wxs_source(&self, request: &str) -> Option<String> {
        let (path, query) = parse_request(request);
        let module = query.wxs_module?;
        let key = format!("{}~{}", path, module);
        lock_recovering(&self.wxs_contents).get(&key).cloned()
    }

    /// Everything every unit reported so far, in completion order.
    pub fn drain_diagnostics(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *lock_recovering(&self.diagnostics))
    }

    fn merge_wxs(&self, resource_path: &str, contents: &BTreeMap<String, String>) {
        if contents.is_empty() {
            return;
        }
        let mut map = lock_recovering(&self.wxs_contents);
        for (module, body) in contents {
            map.insert(format!("{}~{}", resource_path, module), body.clone());
        }
    }

    pub(crate) fn absorb(&self, diagnostics: &[Diagnostic]) {
        if diagnostics.is_empty() {
            return;
        }
        lock_recovering(&self.diagnostics).extend(diagnostics.iter().cloned());
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOURCE QUERIES
// ═══════════════════════════════════════════════════════════════════════════════

/// Decoded `path?key=value&flag` resource query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestQuery {
    pub mode: Option<Mode>,
    pub package_root: Option<String>,
    pub is_native: Option<bool>,
    pub using_components: Vec<String>,
    pub wxs_module: Option<String>,
}

/// Splits a request into its clean path and the recognized query fields.
/// Unknown keys are ignored; a valueless flag reads as `true`.
pub fn parse_request(request: &str) -> (String, RequestQuery) {
    let (path, query) = match request.split_once('?') {
        Some((p, q)) => (p, q),
        None => (request, ""),
    };
    let mut parsed = RequestQuery::default();
    for segment in query.split('&').filter(|s| !s.is_empty()) {
        let (key, value) = match segment.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (segment, None),
        };
        match key {
            "mode" => parsed.mode = value.and_then(Mode::parse),
            "packageRoot" => parsed.package_root = value.map(|v| v.to_string()),
            "isNative" => {
                parsed.is_native = Some(!matches!(value, Some("false") | Some("0")));
            }
            "usingComponents" => {
                if let Some(v) = value {
                    parsed.using_components = v
                        .split(',')
                        .filter(|s| !s.is_empty())
                        .map(|s| s.to_string())
                        .collect();
                }
            }
            "wxsModule" => parsed.wxs_module = value.map(|v| v.to_string()),
            _ => {}
        }
    }
    (path.to_string(), parsed)
}

// ═══════════════════════════════════════════════════════════════════════════════
// UNIT OPTIONS AND OUTPUT
// ═══════════════════════════════════════════════════════════════════════════════

/// Options for one compilation unit. The resource path may carry a query;
/// query fields override the corresponding option fields for this unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UnitOptions {
    pub resource_path: String,
    pub mode: Mode,
    pub src_mode: Mode,
    pub env: String,
    pub using_components: Vec<String>,
    pub component_placeholder: Vec<String>,
    pub global_components: Vec<String>,
    pub defs: BTreeMap<String, serde_json::Value>,
    pub i18n: bool,
    pub external_classes: Vec<String>,
    pub has_scoped: bool,
    /// Derived from the resource path when absent.
    pub module_id: Option<String>,
    pub decode_html_text: bool,
    pub check_using_components: bool,
    pub force_proxy_event: bool,
    pub has_virtual_host: bool,
    pub is_native: bool,
    pub is_component: bool,
    pub package_root: Option<String>,
    pub production: bool,
    pub optimize_size: bool,
    /// 0 full bind, 1 full bind + render reduction, 2 simplified bind.
    pub optimize_render_level: u8,
    /// When present the unit records itself into the resource registry.
    pub output_path: Option<String>,
}

/// One template plus its options, for the parallel driver.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompileUnit {
    pub source: String,
    pub options: UnitOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnitOutput {
    pub resource_path: String,
    pub module_id: String,
    /// Serialized template text; the complete output for native passthrough
    /// and the fallback when code generation fails.
    pub template: String,
    /// Assembled injection module; absent on the passthrough path.
    pub inject: Option<String>,
    /// Component registration list after web escaping.
    pub using_components: Vec<String>,
    /// Original tag → compressed alias, empty unless compression ran.
    pub component_aliases: BTreeMap<String, String>,
    pub diagnostics: Vec<Diagnostic>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// UNIT COMPILATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Compiles one template unit. Infallible by contract: problems surface as
/// diagnostics on the output and the best-effort result is returned.
pub fn compile_unit(source: &str, options: &UnitOptions, context: &BuildContext) -> UnitOutput {
    let (resource_path, query) = parse_request(&options.resource_path);
    let mode = options.mode;
    let src_mode = query.mode.unwrap_or(options.src_mode);
    let is_native = query.is_native.unwrap_or(options.is_native);
    let package_root = query.package_root.clone().or_else(|| options.package_root.clone());
    let mut using = if query.using_components.is_empty() {
        options.using_components.clone()
    } else {
        query.using_components.clone()
    };

    // Identical content under an identical option set reuses the previous
    // result, diagnostics included. The key carries an option fingerprint:
    // the output depends on target, query flags and optimization profile,
    // so a later unit with the same source but different options must never
    // see this unit's entry.
    let cache_key = unit_cache_key(&resource_path, options);
    if let Some(cached) = context.content_cache.get(&cache_key, source) {
        if let Ok(output) = serde_json::from_str::<UnitOutput>(&cached) {
            context.absorb(&output.diagnostics);
            return output;
        }
    }

    let module_id = options
        .module_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("_{}", path_hash(&resource_path)));

    let mut reporter = Reporter::new(&resource_path);
    let parse_options = ParseOptions {
        using_components: using.clone(),
        component_placeholder: options.component_placeholder.clone(),
        global_components: options.global_components.clone(),
        mode,
        src_mode,
        env: options.env.clone(),
        defs: options.defs.clone(),
        i18n: options.i18n,
        external_classes: options.external_classes.clone(),
        has_scoped: options.has_scoped,
        module_id: module_id.clone(),
        decode_html_text: options.decode_html_text,
        check_using_components: options.check_using_components,
        force_proxy_event: options.force_proxy_event,
        has_virtual_host: options.has_virtual_host,
        is_native,
        is_component: options.is_component,
        file_path: resource_path.clone(),
    };
    let mut outcome = parse(source, &parse_options, &mut reporter);

    let mut component_aliases = BTreeMap::new();
    if mode == Mode::Web {
        // The registration list is escaped first; the tree pass only rewrites
        // tags whose escaped name is registered.
        using = escape_using_components(&using);
        escape_web_tags(&mut outcome.root, &using);
    } else if options.optimize_size && options.production {
        component_aliases = compress_component_names(&mut outcome.root, &resource_path, &using);
    }

    context.merge_wxs(&resource_path, &outcome.meta.wxs_content_map);

    if let Some(output_path) = &options.output_path {
        let record = RecordOptions {
            resource_path: resource_path.clone(),
            resource_type: if options.is_component {
                "components".to_string()
            } else {
                "pages".to_string()
            },
            output_path: Some(output_path.clone()),
            package_root: package_root.clone(),
            record_only: false,
        };
        context.registry.record(&record, &mut reporter);
    }

    let template = serialize(&outcome.root);

    if is_native && mode.is_native_target() {
        return finish(
            context,
            &cache_key,
            source,
            UnitOutput {
                resource_path,
                module_id,
                template,
                inject: None,
                using_components: using,
                component_aliases,
                diagnostics: reporter.into_diagnostics(),
            },
        );
    }

    // Directive attributes kept on the tree follow the source dialect's
    // vocabulary, so generation filters with the source mode.
    let fragment = format!("{};", gen_node(&outcome.root, src_mode));
    if let Err(message) = validate_fragment(&fragment) {
        reporter.error(
            CODEGEN_FAILURE,
            format!(
                "render fragment does not parse: {}; template: {}; fragment: {}",
                message, template, fragment
            ),
        );
        return finish(
            context,
            &cache_key,
            source,
            UnitOutput {
                resource_path,
                module_id,
                template,
                inject: None,
                using_components: using,
                component_aliases,
                diagnostics: reporter.into_diagnostics(),
            },
        );
    }

    let mut ignore_map: HashSet<String> =
        RENDER_HELPERS.iter().map(|s| s.to_string()).collect();
    ignore_map.extend(outcome.meta.wxs_module_map.keys().cloned());
    ignore_map.extend(outcome.meta.wxs_content_map.keys().cloned());

    let need_collect = mode.needs_prop_keys();
    let (bound, simplified) = match options.optimize_render_level {
        0 => (
            bind::transform(
                &fragment,
                &BindConfig {
                    ignore_map: ignore_map.clone(),
                    need_collect,
                    render_reduce: false,
                },
            ),
            false,
        ),
        1 => (
            bind::transform(
                &fragment,
                &BindConfig {
                    ignore_map: ignore_map.clone(),
                    need_collect,
                    render_reduce: true,
                },
            ),
            false,
        ),
        _ => (bind::transform_simple(&fragment, &ignore_map), true),
    };

    let inject = assemble_inject_source(&AssembleInput {
        module_id: &module_id,
        render_body: &bound.code,
        simplified,
        prop_keys: bound.prop_keys.as_deref(),
        emit_prop_keys: need_collect,
        meta: &outcome.meta,
        resource_path: &resource_path,
        ignore_map: &ignore_map,
    });

    finish(
        context,
        &cache_key,
        source,
        UnitOutput {
            resource_path,
            module_id,
            template,
            inject: Some(inject),
            using_components: using,
            component_aliases,
            diagnostics: reporter.into_diagnostics(),
        },
    )
}

/// Unit cache key: the clean path plus a digest of the whole option record,
/// query included, so no two option sets ever share an entry.
fn unit_cache_key(resource_path: &str, options: &UnitOptions) -> String {
    let fingerprint = serde_json::to_string(options).unwrap_or_default();
    format!(
        "{}#{}",
        resource_path,
        ContentCache::compute_hash(&fingerprint)
    )
}

fn finish(
    context: &BuildContext,
    cache_key: &str,
    source: &str,
    output: UnitOutput,
) -> UnitOutput {
    context.absorb(&output.diagnostics);
    if let Ok(json) = serde_json::to_string(&output) {
        context.content_cache.set(cache_key, source, json);
    }
    output
}

/// Compiles a batch of units across the rayon pool. Output order matches
/// input order; diagnostics also aggregate into the context as units finish.
pub fn compile_units_parallel(units: &[CompileUnit], context: &BuildContext) -> Vec<UnitOutput> {
    units
        .par_iter()
        .map(|unit| compile_unit(&unit.source, &unit.options, context))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCRIPT UNITS
// ═══════════════════════════════════════════════════════════════════════════════

/// Runs the cross-platform rewrite over a script when its effective source
/// dialect differs from the build target. The request's `?mode=` query
/// overrides the build-wide source dialect for this file.
pub fn compile_script(
    source: &str,
    request: &str,
    mode: Mode,
    src_mode: Mode,
    context: &BuildContext,
) -> String {
    let (path, query) = parse_request(request);
    let effective = query.mode.unwrap_or(src_mode);
    if effective == mode {
        return source.to_string();
    }
    let package_root = query.package_root.as_deref();
    // The rewrite depends on the effective dialect and the package scope, so
    // both are part of the key; a `?mode=` override never shares an entry
    // with the plain request.
    let cache_key = format!(
        "{}#{}#{}",
        path,
        effective.as_str(),
        package_root.unwrap_or(MAIN_PACKAGE)
    );
    if let Some(cached) = context.content_cache.get(&cache_key, source) {
        return cached;
    }
    let rewritten = rewrite::rewrite_script(source, effective, package_root, &context.registry);
    context.content_cache.set(&cache_key, source, rewritten.clone());
    rewritten
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::INJECT_GLOBAL;

    fn unit(resource_path: &str, overrides: impl FnOnce(&mut UnitOptions)) -> UnitOptions {
        let mut options = UnitOptions {
            resource_path: resource_path.to_string(),
            ..UnitOptions::default()
        };
        overrides(&mut options);
        options
    }

    #[test]
    fn test_parse_request_decodes_query() {
        let (path, query) =
            parse_request("src/comp.stml?mode=ali&packageRoot=sub&isNative&usingComponents=a,b");
        assert_eq!(path, "src/comp.stml");
        assert_eq!(query.mode, Some(Mode::Ali));
        assert_eq!(query.package_root.as_deref(), Some("sub"));
        assert_eq!(query.is_native, Some(true));
        assert_eq!(query.using_components, vec!["a", "b"]);
        assert_eq!(query.wxs_module, None);

        let (_, query) = parse_request("a.stml?isNative=false&wxsModule=fmt");
        assert_eq!(query.is_native, Some(false));
        assert_eq!(query.wxs_module.as_deref(), Some("fmt"));
    }

    #[test]
    fn test_parse_request_without_query() {
        let (path, query) = parse_request("src/pages/index.stml");
        assert_eq!(path, "src/pages/index.stml");
        assert_eq!(query, RequestQuery::default());
    }

    #[test]
    fn test_compile_unit_produces_inject_source() {
        let context = BuildContext::new();
        let options = unit("src/pages/index.stml", |_| {});
        let output = compile_unit("<view>{{msg}}</view>", &options, &context);

        assert_eq!(output.module_id, format!("_{}", path_hash("src/pages/index.stml")));
        let inject = output.inject.as_deref().unwrap();
        assert!(inject.contains(&format!("{} = {{", INJECT_GLOBAL)));
        assert!(inject.contains(".render = function (_i, _c, _r, _sc) {"));
        assert!(inject.contains("this.msg"));
        assert!(inject.contains("_r();"));
        assert!(output.template.contains("<view>"));
        assert!(output.diagnostics.is_empty());
    }

    #[test]
    fn test_native_passthrough_skips_codegen() {
        let context = BuildContext::new();
        let options = unit("src/components/raw.stml", |o| o.is_native = true);
        let output = compile_unit("<view a=\"1\" bindtap=\"go(1)\">x</view>", &options, &context);

        assert_eq!(output.inject, None);
        assert!(output.template.contains("a=\"1\""));
        // Native templates keep their own event wiring verbatim.
        assert!(output.template.contains("bindtap=\"go(1)\""));
    }

    #[test]
    fn test_query_overrides_native_flag() {
        let context = BuildContext::new();
        let options = unit("src/components/raw.stml?isNative", |_| {});
        let output = compile_unit("<view/>", &options, &context);
        assert_eq!(output.inject, None);
        assert_eq!(output.resource_path, "src/components/raw.stml");
    }

    #[test]
    fn test_codegen_failure_falls_back_to_template() {
        let context = BuildContext::new();
        let options = unit("src/pages/bad.stml", |_| {});
        let output = compile_unit("<view>{{ ] }}</view>", &options, &context);

        assert_eq!(output.inject, None);
        assert!(output.template.contains("<view>"));
        let failure = output
            .diagnostics
            .iter()
            .find(|d| d.code == CODEGEN_FAILURE)
            .unwrap();
        // The report carries both the template and the offending fragment.
        assert!(failure.message.contains("template:"));
        assert!(failure.message.contains("fragment:"));
    }

    #[test]
    fn test_web_mode_escapes_colliding_components() {
        let context = BuildContext::new();
        let options = unit("src/pages/home.stml", |o| {
            o.mode = Mode::Web;
            o.using_components = vec!["view".to_string()];
        });
        let output = compile_unit("<view>hi</view>", &options, &context);

        assert!(output
            .using_components
            .contains(&"strata-com-view".to_string()));
        let inject = output.inject.as_deref().unwrap();
        assert!(inject.contains("_c(\"strata-com-view\""));
    }

    #[test]
    fn test_compression_runs_in_production_profile() {
        let context = BuildContext::new();
        let options = unit("src/pages/list.stml", |o| {
            o.using_components = vec!["my-widget".to_string()];
            o.optimize_size = true;
            o.production = true;
        });
        let output = compile_unit("<my-widget/><my-widget/>", &options, &context);

        let alias = output.component_aliases.get("my-widget").unwrap();
        assert!(alias.starts_with('c'));
        assert_eq!(output.template.matches(alias.as_str()).count(), 2);
        assert!(!output.template.contains("my-widget"));
    }

    #[test]
    fn test_optimize_render_level_two_is_simplified() {
        let context = BuildContext::new();
        let options = unit("src/pages/simple.stml", |o| o.optimize_render_level = 2);
        let output = compile_unit("<view>{{msg}}</view>", &options, &context);
        let inject = output.inject.as_deref().unwrap();
        assert!(inject.contains("_r(true);"));
        assert!(inject.contains("this.msg"));
    }

    #[test]
    fn test_prop_keys_emitted_for_collecting_targets() {
        let context = BuildContext::new();
        let options = unit("src/pages/tt.stml", |o| o.mode = Mode::Tt);
        let output = compile_unit("<view>{{msg}}</view>", &options, &context);
        let inject = output.inject.as_deref().unwrap();
        assert!(inject.contains(&format!("{}.propKeys = [\"msg\"];", INJECT_GLOBAL)));

        let options = unit("src/pages/wx.stml", |_| {});
        let output = compile_unit("<view>{{msg}}</view>", &options, &context);
        assert!(!output.inject.unwrap().contains("propKeys"));
    }

    #[test]
    fn test_inline_wxs_is_shared_and_addressable() {
        let context = BuildContext::new();
        let options = unit("src/pages/fmt.stml", |_| {});
        let source = "<wxs module=\"fmt\">var pad = 2;</wxs><view>{{fmt.pad(n)}}</view>";
        let output = compile_unit(source, &options, &context);

        let inject = output.inject.as_deref().unwrap();
        assert!(inject.contains("var fmt = require(\"src/pages/fmt.stml?wxsModule=fmt\");"));
        // The wxs module name is excluded from binding.
        assert!(inject.contains("fmt.pad(this.n)"));

        assert_eq!(
            context.wxs_source("src/pages/fmt.stml?wxsModule=fmt"),
            Some("var pad = 2;".to_string())
        );
        assert_eq!(context.wxs_source("src/pages/fmt.stml?wxsModule=nope"), None);
    }

    #[test]
    fn test_units_record_and_compile_in_parallel() {
        let context = BuildContext::new();
        let units: Vec<CompileUnit> = (0..8)
            .map(|i| CompileUnit {
                source: format!("<view>{{{{v{}}}}}</view>", i),
                options: unit(&format!("src/pages/p{}.stml", i), |o| {
                    o.output_path = Some(format!("pages/p{}", i));
                }),
            })
            .collect();

        let outputs = compile_units_parallel(&units, &context);
        assert_eq!(outputs.len(), 8);
        for (i, output) in outputs.iter().enumerate() {
            assert_eq!(output.resource_path, format!("src/pages/p{}.stml", i));
            assert!(output.inject.as_deref().unwrap().contains(&format!("this.v{}", i)));
            assert_eq!(
                context
                    .registry
                    .output_path("pages", None, &output.resource_path),
                Some(format!("pages/p{}", i))
            );
        }
    }

    #[test]
    fn test_content_cache_reuses_identical_units() {
        let context = BuildContext::new();
        let options = unit("src/pages/cached.stml", |_| {});
        let first = compile_unit("<view>{{msg}}</view>", &options, &context);
        let second = compile_unit("<view>{{msg}}</view>", &options, &context);
        assert_eq!(first, second);

        let changed = compile_unit("<view>{{other}}</view>", &options, &context);
        assert!(changed.inject.unwrap().contains("this.other"));
    }

    #[test]
    fn test_cache_distinguishes_target_modes() {
        let context = BuildContext::new();
        let source = "<view>{{msg}}</view>";
        let wx = compile_unit(source, &unit("src/pages/shared.stml", |_| {}), &context);
        assert!(!wx.inject.as_deref().unwrap().contains("propKeys"));

        let options = unit("src/pages/shared.stml", |o| o.mode = Mode::Tt);
        let tt = compile_unit(source, &options, &context);
        assert!(
            tt.inject
                .as_deref()
                .unwrap()
                .contains(&format!("{}.propKeys = [\"msg\"];", INJECT_GLOBAL)),
            "same path and source under a tt target must compile fresh, not \
             reuse the wx entry"
        );
    }

    #[test]
    fn test_cache_distinguishes_native_requests() {
        let context = BuildContext::new();
        let source = "<view>{{msg}}</view>";
        let compiled = compile_unit(source, &unit("src/components/dual.stml", |_| {}), &context);
        assert!(compiled.inject.is_some());

        let options = unit("src/components/dual.stml?isNative", |_| {});
        let native = compile_unit(source, &options, &context);
        assert_eq!(
            native.inject, None,
            "a passthrough request must not reuse the compiled entry"
        );
    }

    #[test]
    fn test_script_cache_distinguishes_dialect_overrides() {
        let context = BuildContext::new();
        let src = "wx.request({});";

        // The ali-dialect override finds no ali global to rewrite.
        let ali = compile_script(src, "src/api.js?mode=ali", Mode::Wx, Mode::Wx, &context);
        assert_eq!(ali, src);

        // The same content without the override is wx dialect and rewrites.
        let wx = compile_script(src, "src/api.js", Mode::Ali, Mode::Wx, &context);
        assert!(
            wx.contains("strata.request({}, \"wx\")"),
            "wx-dialect rewrite must not reuse the ali-dialect entry, got: {}",
            wx
        );
    }

    #[test]
    fn test_script_rewrite_gated_by_effective_mode() {
        let context = BuildContext::new();
        let src = "wx.request({ url: url });";

        // Same dialect as the target: untouched.
        assert_eq!(
            compile_script(src, "src/app.js", Mode::Wx, Mode::Wx, &context),
            src
        );

        // Cross-dialect: rewritten against the wx source dialect.
        let out = compile_script(src, "src/app.js", Mode::Ali, Mode::Wx, &context);
        assert!(out.contains("strata.request({ url: url }, \"wx\")"));

        // Per-file query override wins over the build-wide source dialect.
        let out = compile_script(
            "my.showToast({});",
            "src/vendor.js?mode=ali",
            Mode::Wx,
            Mode::Wx,
            &context,
        );
        assert!(out.contains("strata.showToast({}, \"ali\")"));
    }

    #[test]
    fn test_aggregated_diagnostics_drain() {
        let context = BuildContext::new();
        let options = unit("src/pages/broken.stml", |_| {});
        compile_unit("<view>{{ ] }}</view>", &options, &context);

        let drained = context.drain_diagnostics();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].resource_path, "src/pages/broken.stml");
        assert!(context.drain_diagnostics().is_empty());
    }
}
