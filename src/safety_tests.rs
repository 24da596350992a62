//! Safety Gate Tests for Strata Compiler Invariants
//!
//! End-to-end checks for the structural guarantees the pipeline must hold:
//! - serialize(parse(s)) parses back to the same tree and is a fixpoint
//! - every assembled injection module parses as real JavaScript
//! - runtime helpers and loop locals never leak into data binding
//! - output-path claims stay unique under parallel registration
//! - the dialect rewrite converges after one pass
//! - malformed input degrades to the serialized template, never a panic

#[cfg(test)]
mod tests {
    use rayon::prelude::*;
    use std::collections::HashSet;

    use crate::codegen::{validate_fragment, INJECT_GLOBAL};
    use crate::node::Node;
    use crate::parse::{parse, ParseOptions};
    use crate::pipeline::{compile_unit, BuildContext, UnitOptions, UnitOutput};
    use crate::platform::Mode;
    use crate::registry::{path_hash, RecordOptions, ResourceRegistry};
    use crate::report::{Reporter, Severity, CODEGEN_FAILURE};
    use crate::rewrite::{rewrite_script, CORE_MODULE_REQUEST};
    use crate::serialize::serialize;

    /// Well-formed wx-dialect templates exercising text, directives,
    /// self-closing forms, multi-root sources and a literal block root.
    const WELL_FORMED: &[&str] = &[
        "<view class=\"box\"><text>hi {{name}}</text></view>",
        "<view wx:for=\"{{list}}\" wx:for-item=\"row\" wx:key=\"id\">\
         <text wx:if=\"{{row.ok}}\">{{row.name}}</text><text wx:else>-</text></view>",
        "<view><image src=\"{{url}}\"/><video controls/></view>",
        "<view>a</view><view>b</view>",
        "<block><view>lone</view></block>",
        "<scroll-view scroll-y=\"{{enabled}}\">{{a}} or {{b > 1 ? 'x' : 'y'}}</scroll-view>",
    ];

    const ALL_TARGETS: &[Mode] = &[
        Mode::Wx,
        Mode::Ali,
        Mode::Swan,
        Mode::Qq,
        Mode::Tt,
        Mode::Dd,
        Mode::Web,
    ];

    fn compile(source: &str, configure: impl FnOnce(&mut UnitOptions)) -> UnitOutput {
        let context = BuildContext::new();
        let mut options = UnitOptions {
            resource_path: "src/gate/unit.stml".to_string(),
            ..UnitOptions::default()
        };
        configure(&mut options);
        compile_unit(source, &options, &context)
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // ROUND TRIP: parse → serialize → parse must converge
    // ═══════════════════════════════════════════════════════════════════════════════

    fn trees_equal(a: &Node, b: &Node) -> bool {
        match (a, b) {
            (Node::Text(x), Node::Text(y)) => x.value == y.value,
            (Node::Element(x), Node::Element(y)) => {
                x.tag == y.tag
                    && x.attrs == y.attrs
                    && x.children.len() == y.children.len()
                    && x.children
                        .iter()
                        .zip(&y.children)
                        .all(|(c, d)| trees_equal(c, d))
            }
            _ => false,
        }
    }

    #[test]
    fn test_serialize_parse_reaches_a_fixpoint() {
        let options = ParseOptions::default();
        for source in WELL_FORMED {
            let mut reporter = Reporter::new("gate.stml");
            let first = parse(source, &options, &mut reporter).root;
            assert!(
                !reporter.has_errors(),
                "corpus entry failed to parse: {}",
                source
            );

            let serialized = serialize(&first);
            let mut reporter = Reporter::new("gate.stml");
            let second = parse(&serialized, &options, &mut reporter).root;
            assert!(
                !reporter.has_errors(),
                "serialized form failed to parse: {}",
                serialized
            );

            assert!(
                trees_equal(&first, &second),
                "reparse diverged for: {}",
                serialized
            );
            assert_eq!(
                serialized,
                serialize(&second),
                "second serialization moved for: {}",
                source
            );
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // EMITTED MODULES: every target, every corpus entry, must parse as JS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_every_target_emits_a_parsable_module() {
        for mode in ALL_TARGETS {
            for (i, source) in WELL_FORMED.iter().enumerate() {
                let context = BuildContext::new();
                let options = UnitOptions {
                    resource_path: format!("src/gate/{}_{}.stml", mode, i),
                    mode: *mode,
                    ..UnitOptions::default()
                };
                let output = compile_unit(source, &options, &context);
                let inject = output.inject.as_deref().unwrap_or_else(|| {
                    panic!(
                        "{} target dropped codegen for corpus entry {}: {:?}",
                        mode, i, output.diagnostics
                    )
                });
                assert!(
                    validate_fragment(inject).is_ok(),
                    "{} target emitted an unparsable module for entry {}: {}",
                    mode,
                    i,
                    inject
                );
                assert!(inject.contains(INJECT_GLOBAL));
                assert!(inject.contains("moduleId"));
            }
        }
    }

    #[test]
    fn test_simplified_binding_also_emits_valid_modules() {
        for (i, source) in WELL_FORMED.iter().enumerate() {
            let context = BuildContext::new();
            let options = UnitOptions {
                resource_path: format!("src/gate/simple_{}.stml", i),
                optimize_render_level: 2,
                ..UnitOptions::default()
            };
            let output = compile_unit(source, &options, &context);
            let inject = output.inject.as_deref().unwrap();
            assert!(
                validate_fragment(inject).is_ok(),
                "simplified module for entry {} does not parse: {}",
                i,
                inject
            );
            assert!(
                inject.contains("_r(true);"),
                "simplified render must finish with _r(true): {}",
                inject
            );
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // SCOPE PROTECTION: helpers and loop locals stay out of data binding
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_loop_locals_shadow_instance_data() {
        let source =
            "<text>{{item}}</text><view wx:for=\"{{list}}\"><text>{{item}}</text></view>";
        let output = compile(source, |_| {});
        let inject = output.inject.unwrap();

        // Outside the repeat `item` is instance data; inside it is the loop
        // local, same spelling.
        assert!(
            inject.contains("[(this.item)]"),
            "top-level item must read instance data, got: {}",
            inject
        );
        assert!(
            inject.contains("_i(this.list, function (item, index)"),
            "iteration source binds, loop params do not, got: {}",
            inject
        );
        assert!(
            inject.contains("[(item)]"),
            "loop-scoped item must stay bare, got: {}",
            inject
        );

        // The runtime helpers are parameters of the render function and must
        // never be treated as data reads.
        for helper in ["this._i", "this._c", "this._r", "this._sc"] {
            assert!(
                !inject.contains(helper),
                "render helper leaked into binding: {}",
                inject
            );
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // OUTPUT PATH OWNERSHIP: parallel claims on one path stay unique
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_contended_output_claims_stay_unique() {
        let registry = ResourceRegistry::new();
        let results: Vec<(String, String)> = (0..16)
            .into_par_iter()
            .map(|i| {
                let resource = format!("src/assets/icon{}.png", i);
                let mut reporter = Reporter::new(&resource);
                let outcome = registry.record(
                    &RecordOptions {
                        resource_path: resource.clone(),
                        resource_type: "static".to_string(),
                        output_path: Some("dist/static/icon.png".to_string()),
                        package_root: None,
                        record_only: false,
                    },
                    &mut reporter,
                );
                (resource, outcome.output_path.unwrap())
            })
            .collect();

        let distinct: HashSet<&String> = results.iter().map(|(_, path)| path).collect();
        assert_eq!(
            distinct.len(),
            results.len(),
            "two resources were handed the same output path: {:?}",
            results
        );
        assert_eq!(
            results
                .iter()
                .filter(|(_, path)| path == "dist/static/icon.png")
                .count(),
            1,
            "exactly one claimant keeps the plain path"
        );

        for (resource, path) in &results {
            if path != "dist/static/icon.png" {
                assert!(
                    path.starts_with("dist/static/icon.") && path.ends_with(".png"),
                    "rename must stay hash-before-extension: {}",
                    path
                );
                assert!(
                    path.contains(&path_hash(resource)),
                    "rename must derive from the claimant's path: {}",
                    path
                );
            }
            // The registry view agrees with what each caller was told.
            assert_eq!(
                registry.output_path("static", None, resource).as_deref(),
                Some(path.as_str())
            );
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // DIALECT REWRITE: one pass converges for every source dialect
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_dialect_rewrite_converges_for_every_dialect() {
        let registry = ResourceRegistry::new();
        for mode in [Mode::Wx, Mode::Ali, Mode::Swan, Mode::Qq, Mode::Tt, Mode::Dd] {
            let global = mode.global_api_ident();
            let source = format!(
                "{}.request({{ url: url }});\nvar info = {}.getSystemInfoSync();",
                global, global
            );

            let once = rewrite_script(&source, mode, None, &registry);
            let twice = rewrite_script(&once, mode, None, &registry);
            let thrice = rewrite_script(&twice, mode, None, &registry);

            assert_ne!(once, source, "{} source must be rewritten", global);
            assert_eq!(once, twice, "second pass must be a fixpoint for {}", global);
            assert_eq!(twice, thrice, "third pass must be a fixpoint for {}", global);
            assert_eq!(
                once.matches(CORE_MODULE_REQUEST).count(),
                1,
                "exactly one accessor prelude for {}: {}",
                global,
                once
            );
            assert!(
                once.contains(&format!(", \"{}\")", mode.as_str())),
                "calls must carry the {} dialect argument: {}",
                mode.as_str(),
                once
            );
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // HOSTILE INPUT: degrade with diagnostics, never panic
    // ═══════════════════════════════════════════════════════════════════════════════

    const HOSTILE: &[&str] = &[
        "",
        "<",
        "<view",
        "</view>",
        "<view><text>unclosed",
        "<view>{{ ] }}</view>",
        "{{",
        "<view a=>",
        "<!-- only a comment -->",
        "<view wx:for=\"{{}}\"/>",
    ];

    #[test]
    fn test_hostile_input_degrades_with_diagnostics() {
        let context = BuildContext::new();
        for (i, source) in HOSTILE.iter().enumerate() {
            let options = UnitOptions {
                resource_path: format!("src/gate/hostile_{}.stml", i),
                ..UnitOptions::default()
            };
            let output = compile_unit(source, &options, &context);
            if let Some(inject) = &output.inject {
                assert!(
                    validate_fragment(inject).is_ok(),
                    "hostile entry {} produced an unparsable module: {}",
                    i,
                    inject
                );
            } else {
                assert!(
                    output
                        .diagnostics
                        .iter()
                        .any(|d| d.severity == Severity::Error),
                    "hostile entry {} dropped codegen without saying why",
                    i
                );
            }
        }

        // At least one entry must have taken the template fallback.
        let drained = context.drain_diagnostics();
        assert!(
            drained.iter().any(|d| d.code == CODEGEN_FAILURE),
            "expected a codegen-failure fallback in the hostile sweep: {:?}",
            drained
        );
    }
}
