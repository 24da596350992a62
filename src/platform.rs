//! Platform and dialect model for the Strata compiler.
//!
//! Every stage of the pipeline receives one immutable [`Mode`] pair
//! (target `mode` + source `src_mode`) and pattern-matches on it instead of
//! comparing ad-hoc strings. Dialect vocabulary (directive prefixes, event
//! prefixes, the global API identifier) is derived from the *source* dialect;
//! target-only decisions (web tag escaping, passthrough) key off the target.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════════════
// MODE
// ═══════════════════════════════════════════════════════════════════════════════

/// A runtime platform. Used both as compile target (`mode`) and as the
/// dialect a source file is authored in (`src_mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Wx,
    Ali,
    Swan,
    Qq,
    Tt,
    Dd,
    Web,
}

impl Mode {
    /// Parses the lowercase wire name; unknown names map to `None` so the
    /// caller can report instead of defaulting silently.
    pub fn parse(s: &str) -> Option<Mode> {
        match s {
            "wx" => Some(Mode::Wx),
            "ali" => Some(Mode::Ali),
            "swan" => Some(Mode::Swan),
            "qq" => Some(Mode::Qq),
            "tt" => Some(Mode::Tt),
            "dd" => Some(Mode::Dd),
            "web" => Some(Mode::Web),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Wx => "wx",
            Mode::Ali => "ali",
            Mode::Swan => "swan",
            Mode::Qq => "qq",
            Mode::Tt => "tt",
            Mode::Dd => "dd",
            Mode::Web => "web",
        }
    }

    /// Directive prefix of the dialect, e.g. `wx:if` / `a:if` / `s-if`.
    /// Web sources are authored in the wx dialect.
    pub fn directive_prefix(&self) -> &'static str {
        match self {
            Mode::Wx | Mode::Web => "wx:",
            Mode::Ali => "a:",
            Mode::Swan => "s-",
            Mode::Qq => "qq:",
            Mode::Tt => "tt:",
            Mode::Dd => "dd:",
        }
    }

    /// Event-binding attribute prefixes of the dialect, longest first so a
    /// prefix scan never matches `bind` inside `capture-bind`.
    pub fn event_prefixes(&self) -> &'static [&'static str] {
        match self {
            Mode::Ali => &["catch", "on"],
            _ => &["capture-bind", "capture-catch", "bind", "catch"],
        }
    }

    /// The global API object a script authored in this dialect calls into.
    pub fn global_api_ident(&self) -> &'static str {
        match self {
            Mode::Wx | Mode::Web => "wx",
            Mode::Ali => "my",
            Mode::Swan => "swan",
            Mode::Qq => "qq",
            Mode::Tt => "tt",
            Mode::Dd => "dd",
        }
    }

    /// Targets that consume the template dialect natively; for them the
    /// serialized tree is the final output and no render code is generated.
    pub fn is_native_target(&self) -> bool {
        !matches!(self, Mode::Web)
    }

    /// Targets that require a declared prop list ahead of execution.
    pub fn needs_prop_keys(&self) -> bool {
        matches!(self, Mode::Tt | Mode::Swan)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TAG TABLES
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    /// Built-in component tags of the mini-program dialect. Anything not
    /// here and not registered in `usingComponents` is a native tag as far
    /// as classification is concerned.
    pub static ref BUILTIN_TAGS: HashSet<&'static str> = {
        [
            "block", "template", "import", "include", "wxs", "slot",
            "view", "scroll-view", "swiper", "swiper-item", "movable-area",
            "movable-view", "cover-view", "cover-image", "icon", "text",
            "rich-text", "progress", "button", "checkbox", "checkbox-group",
            "form", "input", "label", "picker", "picker-view",
            "picker-view-column", "radio", "radio-group", "slider", "switch",
            "textarea", "navigator", "audio", "camera", "image", "video",
            "live-player", "live-pusher", "map", "canvas", "ad", "web-view",
            "open-data", "official-account",
        ]
        .iter()
        .copied()
        .collect()
    };

    /// Reserved HTML element names. A custom component carrying one of these
    /// names would shadow the real element on the web target.
    pub static ref HTML_TAGS: HashSet<&'static str> = {
        [
            "html", "head", "body", "meta", "link", "title", "style",
            "script", "div", "span", "p", "a", "img", "ul", "ol", "li",
            "dl", "dt", "dd", "table", "thead", "tbody", "tr", "td", "th",
            "form", "input", "button", "select", "option", "textarea",
            "label", "fieldset", "legend", "h1", "h2", "h3", "h4", "h5",
            "h6", "header", "footer", "nav", "main", "section", "article",
            "aside", "figure", "figcaption", "audio", "video", "source",
            "track", "canvas", "iframe", "embed", "object", "picture",
            "b", "i", "u", "s", "em", "strong", "small", "mark", "sub",
            "sup", "code", "pre", "blockquote", "cite", "q", "abbr",
            "address", "br", "hr", "wbr", "template", "slot", "details",
            "summary", "dialog", "progress", "meter", "output",
        ]
        .iter()
        .copied()
        .collect()
    };
}

/// True when `tag` is part of the template dialect's built-in vocabulary.
pub fn is_builtin_tag(tag: &str) -> bool {
    BUILTIN_TAGS.contains(tag)
}

/// True when `tag` is a reserved HTML element name.
pub fn is_html_tag(tag: &str) -> bool {
    HTML_TAGS.contains(tag)
}
