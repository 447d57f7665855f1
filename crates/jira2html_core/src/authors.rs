use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::{Captures, Regex};
use serde::Deserialize;

static AUTHOR_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[~([a-zA-Z]+)\]").expect("author tag pattern"));

#[derive(Debug, Deserialize)]
struct AuthorRecord {
    nick_name: Option<String>,
    long_name: Option<String>,
}

/// Short handle to display name, keyed by lower-cased handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorMap {
    names: HashMap<String, String>,
}

impl AuthorMap {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            names: pairs
                .into_iter()
                .map(|(handle, name)| (handle.as_ref().to_lowercase(), name.into()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn display_name(&self, handle: &str) -> Option<&str> {
        self.names.get(&handle.to_lowercase()).map(String::as_str)
    }

    /// Prefix known `[~handle]` tags with the author's display name.
    pub fn annotate(&self, text: &str) -> String {
        if self.names.is_empty() {
            return text.to_string();
        }
        AUTHOR_TAG
            .replace_all(text, |captures: &Captures<'_>| {
                let handle = captures[1].to_lowercase();
                match self.names.get(&handle) {
                    Some(name) => format!("{name}[~{handle}]"),
                    None => captures[0].to_string(),
                }
            })
            .into_owned()
    }
}

/// Load the author mapping file, a JSON array of
/// `{"nick_name": ..., "long_name": ...}` records. A missing file is an empty
/// mapping; records lacking either field are ignored.
pub fn load_author_map(path: &Path) -> Result<AuthorMap> {
    if !path.exists() {
        return Ok(AuthorMap::default());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let records: Vec<serde_json::Value> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    let pairs = records
        .into_iter()
        .filter_map(|value| serde_json::from_value::<AuthorRecord>(value).ok())
        .filter_map(|record| match (record.nick_name, record.long_name) {
            (Some(handle), Some(name)) if !handle.trim().is_empty() => {
                Some((handle.trim().to_string(), name))
            }
            _ => None,
        });
    Ok(AuthorMap::from_pairs(pairs))
}
