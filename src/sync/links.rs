//! Link-object resolution.
//!
//! A remote key matching the configured pattern is a pointer: its body
//! names a sibling path that replaces the matched portion. A small link
//! object can therefore redirect an entire prefix, and a listed link object
//! mirrors to a local symlink.

use regex::Regex;

use crate::error::Result;

use super::source::ObjectStore;

/// Resolves link objects against a configured key pattern.
#[derive(Debug, Clone, Default)]
pub struct LinkResolver {
    pattern: Option<Regex>,
}

impl LinkResolver {
    /// `None` disables link handling entirely.
    pub fn new(pattern: Option<Regex>) -> Self {
        Self { pattern }
    }

    /// Whether `key` names a link object.
    pub fn matches(&self, key: &str) -> bool {
        self.pattern.as_ref().is_some_and(|p| p.is_match(key))
    }

    /// Read a link object's target, trimming any trailing CR/LF.
    pub async fn read_target(
        &self,
        store: &dyn ObjectStore,
        bucket: &str,
        key: &str,
    ) -> Result<String> {
        let body = store.read(bucket, key).await?;
        let text = String::from_utf8_lossy(&body);
        Ok(text.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Dereference link components inside `prefix`, left to right.
    ///
    /// Each original component is appended to an accumulator which is then
    /// checked against the pattern; on a match the accumulator is replaced
    /// by its dirname joined with the link body. One dereference per
    /// component, so resolution always terminates.
    pub async fn resolve_prefix(
        &self,
        store: &dyn ObjectStore,
        bucket: &str,
        prefix: &str,
    ) -> Result<String> {
        if self.pattern.is_none() {
            return Ok(prefix.to_string());
        }

        let mut resolved = String::new();
        for component in prefix.split('/').filter(|c| !c.is_empty()) {
            if !resolved.is_empty() {
                resolved.push('/');
            }
            resolved.push_str(component);
            if self.matches(&resolved) {
                let target = self.read_target(store, bucket, &resolved).await?;
                resolved = match resolved.rsplit_once('/') {
                    Some((dir, _)) => format!("{dir}/{target}"),
                    None => target,
                };
            }
        }
        if prefix.ends_with('/') && !resolved.ends_with('/') {
            resolved.push('/');
        }
        Ok(resolved)
    }
}
