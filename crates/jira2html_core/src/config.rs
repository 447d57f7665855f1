use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::resolver::DEFAULT_REDIRECT_HOPS;
use crate::site::{DEFAULT_FONT_SIZE, DEFAULT_SITE_TITLE, SiteOptions};

pub const DOCS_BASE_URL_ENV: &str = "JIRA2HTML_DOCS_BASE_URL";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default)]
    pub docs: DocsSection,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub site: SiteSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct DocsSection {
    pub base_url: Option<String>,
    #[serde(default)]
    pub roots: Vec<PathBuf>,
    pub redirect_hops: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PathsSection {
    pub issues_dir: Option<PathBuf>,
    pub attachment_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub order_csv: Option<PathBuf>,
    pub author_map: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SiteSection {
    pub title: Option<String>,
    pub font_size: Option<String>,
}

impl AppConfig {
    /// Resolve the documentation base URL: env JIRA2HTML_DOCS_BASE_URL > config > None.
    pub fn docs_base_url(&self) -> Option<String> {
        self.docs_base_url_with_lookup(|key| env::var(key).ok())
    }

    pub fn docs_base_url_with_lookup<F>(&self, lookup_env: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup_env(DOCS_BASE_URL_ENV) {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return Some(trimmed);
            }
        }
        self.docs
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
    }

    pub fn redirect_hops(&self) -> usize {
        self.docs.redirect_hops.unwrap_or(DEFAULT_REDIRECT_HOPS)
    }

    pub fn site_title(&self) -> &str {
        self.site
            .title
            .as_deref()
            .filter(|title| !title.trim().is_empty())
            .unwrap_or(DEFAULT_SITE_TITLE)
    }

    pub fn font_size(&self) -> &str {
        self.site.font_size.as_deref().unwrap_or(DEFAULT_FONT_SIZE)
    }

    pub fn site_options(&self) -> SiteOptions {
        SiteOptions {
            title: self.site_title().to_string(),
            font_size: self.font_size().to_string(),
        }
    }
}

/// Load and parse an AppConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<AppConfig> {
    if !config_path.exists() {
        return Ok(AppConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: AppConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}
