//! N-API surface for the JS build orchestrator.
//!
//! Every export follows the same shape: JSON strings in, JSON strings out,
//! decoded with serde on both sides. The bindings layer owns the one
//! process-wide [`BuildContext`]; the library API underneath stays explicit
//! about its context.

use lazy_static::lazy_static;
use napi_derive::napi;

use crate::pipeline::{self, BuildContext, CompileUnit, UnitOptions};
use crate::platform::Mode;
use crate::registry::RecordOptions;
use crate::report::Reporter;

lazy_static! {
    static ref CONTEXT: BuildContext = BuildContext::new();
}

fn bad_input(what: &str, err: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(format!("{} parse error: {}", what, err))
}

fn parse_mode(name: &str) -> napi::Result<Mode> {
    Mode::parse(name)
        .ok_or_else(|| napi::Error::from_reason(format!("unknown mode: {}", name)))
}

/// Compiles one template unit; returns the serialized `UnitOutput`.
#[napi]
pub fn compile_template_native(source: String, options_json: String) -> napi::Result<String> {
    let options: UnitOptions =
        serde_json::from_str(&options_json).map_err(|e| bad_input("Options", e))?;
    let output = pipeline::compile_unit(&source, &options, &CONTEXT);
    serde_json::to_string(&output).map_err(|e| napi::Error::from_reason(e.to_string()))
}

/// Compiles a batch of units across the rayon pool; returns the outputs in
/// input order.
#[napi]
pub fn compile_units_native(units_json: String) -> napi::Result<String> {
    let units: Vec<CompileUnit> =
        serde_json::from_str(&units_json).map_err(|e| bad_input("Units", e))?;
    let outputs = pipeline::compile_units_parallel(&units, &CONTEXT);
    serde_json::to_string(&outputs).map_err(|e| napi::Error::from_reason(e.to_string()))
}

/// Cross-platform rewrite for a script resource.
#[napi]
pub fn compile_script_native(
    source: String,
    request: String,
    mode: String,
    src_mode: String,
) -> napi::Result<String> {
    let mode = parse_mode(&mode)?;
    let src_mode = parse_mode(&src_mode)?;
    Ok(pipeline::compile_script(
        &source, &request, mode, src_mode, &CONTEXT,
    ))
}

/// Records a resource into the registry; returns the serialized
/// `RecordOutcome`. Collision warnings land in the aggregated diagnostics.
#[napi]
pub fn record_resource_native(options_json: String) -> napi::Result<String> {
    let options: RecordOptions =
        serde_json::from_str(&options_json).map_err(|e| bad_input("Record options", e))?;
    let mut reporter = Reporter::new(&options.resource_path);
    let outcome = CONTEXT.registry.record(&options, &mut reporter);
    CONTEXT.absorb(reporter.diagnostics());
    serde_json::to_string(&outcome).map_err(|e| napi::Error::from_reason(e.to_string()))
}

/// Per-package resource map for one resource type, as JSON.
#[napi]
pub fn resource_map_native(resource_type: String) -> napi::Result<String> {
    let map = CONTEXT.registry.resource_map(&resource_type);
    serde_json::to_string(&map).map_err(|e| napi::Error::from_reason(e.to_string()))
}

/// Inline wxs source for a `path?wxsModule=name` request.
#[napi]
pub fn wxs_source_native(request: String) -> Option<String> {
    CONTEXT.wxs_source(&request)
}

/// Drains and returns the aggregated diagnostics list as JSON.
#[napi]
pub fn drain_diagnostics_native() -> napi::Result<String> {
    let diagnostics = CONTEXT.drain_diagnostics();
    serde_json::to_string(&diagnostics).map_err(|e| napi::Error::from_reason(e.to_string()))
}
