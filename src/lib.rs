//! # Strata Template Compiler (Native Core)
//!
//! ## Pipeline Invariants
//!
//! 1. **One tree, fixed pass order**: parse → structural rewrites → serialize /
//!    render codegen. Structural passes mutate the tree in place; the code
//!    generator only reads it.
//!
//! 2. **Mode is data, not state**: the authoring dialect (`srcMode`) and the
//!    output target (`mode`) are chosen once per unit and threaded immutably.
//!    No pass flips modes midway.
//!
//! 3. **Scripts are spliced, never reprinted**: every script transform records
//!    `(start, end, replacement)` edits against the original text and applies
//!    them back to front. Formatting outside the edited ranges survives byte
//!    for byte.
//!
//! 4. **Generated fragments are revalidated**: render expressions built from
//!    templates are parsed as real JavaScript before assembly. A fragment that
//!    does not parse downgrades the unit to its serialized template plus a
//!    `codegen-failure` diagnostic. The pipeline reports, it never panics.
//!
//! 5. **Output paths are claims**: the resource registry hands out one owner
//!    per `(resource type, package, output path)`. Collisions rename
//!    deterministically (content hash before the extension); real conflicts
//!    are errors that leave registry state untouched.
//!
//! 6. **Injection is read-after-eval**: each assembled module assigns its
//!    render metadata to `global.__strataInject` and the runtime reads it back
//!    immediately after evaluating the module, so units may compile in any
//!    order, and in parallel, without observing each other.

#[cfg(feature = "napi")]
use napi_derive::napi;

mod bind;
mod codegen;
mod node;
mod parse;
mod pipeline;
mod platform;
mod registry;
mod report;
mod rewrite;
mod serialize;
mod structural;
mod visitor;

#[cfg(test)]
mod safety_tests;

#[cfg(feature = "napi")]
mod bindings;

// The N-API wrappers only exist when the feature is on, so their re-export
// is gated the same way.
#[cfg(feature = "napi")]
pub use bindings::*;

// Rust-to-Rust API for build drivers that embed the compiler directly.
pub use pipeline::{
    compile_script, compile_unit, compile_units_parallel, parse_request, BuildContext,
    CompileUnit, RequestQuery, UnitOptions, UnitOutput,
};

pub use bind::{transform, transform_simple, BindConfig, BindResult};
pub use codegen::{
    assemble_inject_source, gen_node, validate_fragment, AssembleInput, INJECT_GLOBAL,
};
pub use node::{
    AttrValue, Attribute, CompileMeta, Element, ForInfo, IfInfo, IfKind, Node, RefDescriptor,
    RefType, TextNode,
};
pub use parse::{parse, ParseOptions, ParseOutcome, EVENT_CONFIG_ATTR, EVENT_PROXY_HANDLER};
pub use platform::{is_builtin_tag, is_html_tag, Mode};
pub use registry::{
    path_hash, ContentCache, RecordOptions, RecordOutcome, ResourceRegistry, MAIN_PACKAGE,
};
pub use report::{Diagnostic, Reporter, Severity, SourceLocation};
pub use rewrite::{
    apply_rewrites, collect_rewrites, rewrite_script, RewriteDependency, CORE_MODULE_REQUEST,
    UNIFIED_ACCESSOR,
};
pub use serialize::serialize;
pub use structural::{
    compress_component_names, escape_using_components, escape_web_tags, escaped_component_name,
    generate_component_alias, WEB_ESCAPE_PREFIX,
};
pub use visitor::{walk_elements, walk_elements_mut, walk_nodes};

#[cfg(feature = "napi")]
#[napi]
pub fn compile_bridge() -> String {
    "Strata Native Bridge Connected".to_string()
}
