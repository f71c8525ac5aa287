//! Prompt template resolution.
//!
//! Templates contain `{{variable}}` placeholders. Resolution is
//! all-or-nothing: if any referenced key is absent the call fails with
//! `Error::MissingVariable` and produces no partially-substituted output.

use crate::error::{Error, Result};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

fn placeholder_regex() -> &'static Regex {
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.-]+)\s*\}\}").expect("placeholder regex is valid")
    })
}

/// List every placeholder key referenced by a template, in order of
/// first appearance.
pub fn referenced_keys(template: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for cap in placeholder_regex().captures_iter(template) {
        let key = cap[1].to_string();
        if !seen.contains(&key) {
            seen.push(key);
        }
    }
    seen
}

/// Substitute every `{{key}}` occurrence with `variables[key]`.
///
/// Fails with the first missing key before producing any output.
pub fn resolve(template: &str, variables: &HashMap<String, String>) -> Result<String> {
    for key in referenced_keys(template) {
        if !variables.contains_key(&key) {
            return Err(Error::MissingVariable(key));
        }
    }

    let resolved = placeholder_regex().replace_all(template, |cap: &regex::Captures<'_>| {
        // Presence was checked above; absent keys are unreachable here.
        variables.get(&cap[1]).cloned().unwrap_or_default()
    });
    Ok(resolved.into_owned())
}
