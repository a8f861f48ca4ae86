//! Magic-variable resolution for path and filename templates.
//!
//! Templates are plain strings containing `{{name}}` placeholders. The
//! resolver knows a fixed set of document-derived variables plus whatever
//! the caller merges in; unknown placeholders pass through untouched so a
//! template never fails to render.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use chrono::Local;
use regex::{Captures, Regex};
use tracing::warn;
use uuid::Uuid;

// Placeholder names are identifiers: letter first, then letters, digits,
// underscores.
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([A-Za-z][A-Za-z0-9_]*)\}\}").expect("placeholder regex"));

/// Named variables available for substitution into templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    vars: HashMap<String, String>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the standard variable set for a document.
    ///
    /// `filename` is the document's base name without extension, `title`
    /// defaults to `filename` (callers with a real title override it via
    /// [`insert`](Self::insert)), `workspace` is the vault name, `date` and
    /// `time` are the current local date (`YYYY-MM-DD`) and time (`HHMMSS`),
    /// and `random` is a fresh 8-character lowercase token on every call.
    ///
    /// A document path without a usable stem is reported and yields a
    /// partial context without `filename`/`title`; building never fails.
    pub fn for_document(md_path: &str, workspace: &str) -> Self {
        let mut ctx = TemplateContext::new();
        match Path::new(md_path).file_stem().and_then(|s| s.to_str()) {
            Some(stem) => {
                ctx.insert("filename", stem);
                ctx.insert("title", stem);
            }
            None => warn!(md_path, "document path has no file stem; filename/title unavailable"),
        }
        ctx.insert("workspace", workspace);
        let now = Local::now();
        ctx.insert("date", now.format("%Y-%m-%d").to_string());
        ctx.insert("time", now.format("%H%M%S").to_string());
        ctx.insert("random", random_token());
        ctx
    }

    /// Adds or overrides a variable (e.g. a frontmatter `title`).
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

/// Replaces every `{{name}}` in `template` whose name is a defined context
/// key. Unknown names are left as literal text; a template without
/// placeholders comes back unchanged.
pub fn substitute(template: &str, ctx: &TemplateContext) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| match ctx.get(&caps[1]) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// 8 lowercase alphanumeric characters, fresh on every call.
pub(crate) fn random_token() -> String {
    let mut token = Uuid::new_v4().simple().to_string();
    token.truncate(8);
    token
}
