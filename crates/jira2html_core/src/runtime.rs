use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::config::{AppConfig, load_config};

pub const STATE_DIR_NAME: &str = ".jira2html";
pub const PROJECT_ROOT_ENV: &str = "JIRA2HTML_PROJECT_ROOT";
pub const CONFIG_ENV: &str = "JIRA2HTML_CONFIG";
pub const OUTPUT_DIR_ENV: &str = "JIRA2HTML_OUTPUT_DIR";

const DEFAULT_ISSUES_DIR: &str = "issues";
const DEFAULT_ATTACHMENT_DIR: &str = "attachment";
const DEFAULT_OUTPUT_DIR: &str = "offline_site";
const DEFAULT_ORDER_CSV: &str = "issues.csv";
const DEFAULT_AUTHOR_MAP: &str = "jira2html_name_mapping.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub docs_roots: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub executable_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let executable_dir = env::current_exe()
            .ok()
            .and_then(|path| path.parent().map(Path::to_path_buf));
        Ok(Self {
            cwd,
            executable_dir,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub issues_dir: PathBuf,
    pub attachment_dir: PathBuf,
    pub output_dir: PathBuf,
    pub order_csv: PathBuf,
    pub author_map: PathBuf,
    pub docs_roots: Vec<PathBuf>,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
    pub output_source: ValueSource,
    pub docs_source: ValueSource,
}

/// Resolved layout plus the loaded configuration it was resolved against.
#[derive(Debug, Clone)]
pub struct Runtime {
    pub paths: ResolvedPaths,
    pub config: AppConfig,
    pub docs_base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub project_root_exists: bool,
    pub issues_dir_exists: bool,
    pub issue_files: usize,
    pub attachment_dir_exists: bool,
    pub output_dir_exists: bool,
    pub order_csv_exists: bool,
    pub author_map_exists: bool,
    pub config_exists: bool,
    pub docs_roots_found: usize,
    pub warnings: Vec<String>,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        let docs_roots = if self.docs_roots.is_empty() {
            "<none>".to_string()
        } else {
            self.docs_roots
                .iter()
                .map(|root| normalize_for_display(root))
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "project_root={} ({})\nstate_dir={}\nconfig_path={} ({})\nissues_dir={}\nattachment_dir={}\noutput_dir={} ({})\norder_csv={}\nauthor_map={}\ndocs_roots={} ({})",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            normalize_for_display(&self.issues_dir),
            normalize_for_display(&self.attachment_dir),
            normalize_for_display(&self.output_dir),
            self.output_source.as_str(),
            normalize_for_display(&self.order_csv),
            normalize_for_display(&self.author_map),
            docs_roots,
            self.docs_source.as_str(),
        )
    }
}

impl Runtime {
    pub fn diagnostics(&self) -> String {
        format!(
            "{}\ndocs_base_url={}\nredirect_hops={}",
            self.paths.diagnostics(),
            self.docs_base_url.as_deref().unwrap_or("<unset>"),
            self.config.redirect_hops()
        )
    }
}

pub fn inspect_runtime(runtime: &Runtime) -> Result<RuntimeStatus> {
    let paths = &runtime.paths;
    let project_root_exists = paths.project_root.exists();
    let issues_dir_exists = paths.issues_dir.is_dir();
    let issue_files = if issues_dir_exists {
        count_issue_files(&paths.issues_dir)?
    } else {
        0
    };
    let attachment_dir_exists = paths.attachment_dir.is_dir();
    let output_dir_exists = paths.output_dir.is_dir();
    let order_csv_exists = paths.order_csv.is_file();
    let author_map_exists = paths.author_map.is_file();
    let config_exists = paths.config_path.exists();
    let docs_roots_found = paths.docs_roots.iter().filter(|root| root.is_dir()).count();

    let mut warnings = Vec::new();
    if !issues_dir_exists {
        warnings.push(format!(
            "{} is missing; export issues there before `jira2html generate`",
            normalize_for_display(&paths.issues_dir)
        ));
    }
    if !attachment_dir_exists {
        warnings.push("attachment directory is missing; attachments will be listed as missing".to_string());
    }
    if paths.docs_roots.is_empty() {
        warnings.push(
            "no documentation roots configured; documentation links will be left unchanged"
                .to_string(),
        );
    }
    for root in paths.docs_roots.iter().filter(|root| !root.is_dir()) {
        warnings.push(format!(
            "documentation root not found: {}",
            normalize_for_display(root)
        ));
    }
    if runtime.docs_base_url.is_none() {
        warnings.push(
            "docs.base_url is not set; documentation links will be left unchanged".to_string(),
        );
    }
    if !order_csv_exists {
        warnings.push("issues.csv ordering file is missing; home page is sorted by key".to_string());
    }

    Ok(RuntimeStatus {
        project_root_exists,
        issues_dir_exists,
        issue_files,
        attachment_dir_exists,
        output_dir_exists,
        order_csv_exists,
        author_map_exists,
        config_exists,
        docs_roots_found,
        warnings,
    })
}

fn count_issue_files(issues_dir: &Path) -> Result<usize> {
    let mut count = 0usize;
    for entry in walkdir::WalkDir::new(issues_dir).follow_links(false) {
        let entry = entry.with_context(|| format!("failed to walk {}", issues_dir.display()))?;
        let is_json = entry.file_type().is_file()
            && entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            count += 1;
        }
    }
    Ok(count)
}

pub fn ensure_runtime_ready_for_generate(paths: &ResolvedPaths, status: &RuntimeStatus) -> Result<()> {
    if !status.issues_dir_exists {
        bail!(
            "Issue export not found.\nMissing required path:\n  - {} (missing)\nRun: jira2html init --project-root {} and export issues as JSON into the issues directory",
            normalize_for_display(&paths.issues_dir),
            normalize_for_display(&paths.project_root)
        );
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub materialize_config: bool,
    pub force: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            materialize_config: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

pub fn resolve_runtime(context: &ResolutionContext, overrides: &PathOverrides) -> Result<Runtime> {
    resolve_runtime_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_runtime_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<Runtime>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup_env = |key: &str| {
        lookup_env(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };
    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup_env);
    let state_dir = project_root.join(STATE_DIR_NAME);

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (
            absolutize_from_project(path, &project_root),
            ValueSource::Flag,
        )
    } else if let Some(value) = lookup_env(CONFIG_ENV) {
        (
            absolutize_from_project(Path::new(&value), &project_root),
            ValueSource::Env,
        )
    } else {
        (state_dir.join("config.toml"), ValueSource::Default)
    };
    let config = load_config(&config_path).context("failed to load configuration")?;

    let from_config = |configured: Option<&Path>, default: &str| match configured {
        Some(path) => absolutize_from_project(path, &project_root),
        None => project_root.join(default),
    };
    let issues_dir = from_config(config.paths.issues_dir.as_deref(), DEFAULT_ISSUES_DIR);
    let attachment_dir =
        from_config(config.paths.attachment_dir.as_deref(), DEFAULT_ATTACHMENT_DIR);
    let order_csv = from_config(config.paths.order_csv.as_deref(), DEFAULT_ORDER_CSV);
    let author_map = from_config(config.paths.author_map.as_deref(), DEFAULT_AUTHOR_MAP);

    let (output_dir, output_source) = if let Some(path) = overrides.output_dir.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = lookup_env(OUTPUT_DIR_ENV) {
        (
            absolutize_from_project(Path::new(&value), &project_root),
            ValueSource::Env,
        )
    } else if let Some(path) = config.paths.output_dir.as_deref() {
        (
            absolutize_from_project(path, &project_root),
            ValueSource::Config,
        )
    } else {
        (project_root.join(DEFAULT_OUTPUT_DIR), ValueSource::Default)
    };

    let (docs_roots, docs_source) = if !overrides.docs_roots.is_empty() {
        (
            overrides
                .docs_roots
                .iter()
                .map(|root| absolutize(root, &context.cwd))
                .collect(),
            ValueSource::Flag,
        )
    } else if !config.docs.roots.is_empty() {
        (
            config
                .docs
                .roots
                .iter()
                .map(|root| absolutize_from_project(root, &project_root))
                .collect(),
            ValueSource::Config,
        )
    } else {
        (Vec::new(), ValueSource::Default)
    };

    let docs_base_url = config.docs_base_url_with_lookup(&lookup_env);

    Ok(Runtime {
        paths: ResolvedPaths {
            project_root,
            state_dir,
            config_path,
            issues_dir,
            attachment_dir,
            output_dir,
            order_csv,
            author_map,
            docs_roots,
            root_source,
            config_source,
            output_source,
            docs_source,
        },
        config,
        docs_base_url,
    })
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let mut created_dirs = Vec::new();

    let required_dirs = [
        paths.state_dir.clone(),
        paths.issues_dir.clone(),
        paths.attachment_dir.clone(),
        paths.output_dir.clone(),
    ];
    for dir in &required_dirs {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            created_dirs.push(dir.clone());
        }
    }

    let wrote_config = if options.materialize_config {
        write_text_file(
            &paths.config_path,
            &render_materialized_config(paths),
            options.force,
        )?
    } else {
        false
    };

    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

pub fn render_materialized_config(paths: &ResolvedPaths) -> String {
    let issues_dir = normalize_for_display(&paths.issues_dir);
    let attachment_dir = normalize_for_display(&paths.attachment_dir);
    let output_dir = normalize_for_display(&paths.output_dir);
    let order_csv = normalize_for_display(&paths.order_csv);
    let author_map = normalize_for_display(&paths.author_map);
    let roots = paths
        .docs_roots
        .iter()
        .map(|root| format!("\"{}\"", normalize_for_display(root)))
        .collect::<Vec<_>>()
        .join(", ");
    let roots_line = if roots.is_empty() {
        "# roots = [\"/data/confluence_export\"]".to_string()
    } else {
        format!("roots = [{roots}]")
    };

    format!(
        "# jira2html configuration (materialized by `jira2html init`)\n\n[docs]\n# Host whose /display/ and viewpage.action links are rewritten to local pages.\n# base_url = \"https://docs.example.com\"\n{roots_line}\nredirect_hops = 1\n\n[paths]\nissues_dir = \"{issues_dir}\"\nattachment_dir = \"{attachment_dir}\"\noutput_dir = \"{output_dir}\"\norder_csv = \"{order_csv}\"\nauthor_map = \"{author_map}\"\n\n[site]\ntitle = \"Issue Archive\"\nfont_size = \"9pt\"\n",
    )
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }

    if let Some(value) = lookup_env(PROJECT_ROOT_ENV) {
        return (absolutize(Path::new(&value), &context.cwd), ValueSource::Env);
    }

    let root = detect_project_root_heuristic(&context.cwd, context.executable_dir.as_deref());
    (root, ValueSource::Heuristic)
}

fn detect_project_root_heuristic(cwd: &Path, executable_dir: Option<&Path>) -> PathBuf {
    let mut seen = HashSet::new();
    for candidate in candidate_roots(cwd, executable_dir) {
        let key = normalize_for_display(&candidate);
        if !seen.insert(key) {
            continue;
        }
        if candidate.join(DEFAULT_ISSUES_DIR).is_dir() || candidate.join(STATE_DIR_NAME).is_dir() {
            return candidate;
        }
    }
    cwd.to_path_buf()
}

fn candidate_roots(cwd: &Path, executable_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut out = ancestors(cwd);
    if let Some(exe_dir) = executable_dir {
        out.extend(ancestors(exe_dir));
    }
    out
}

fn ancestors(path: &Path) -> Vec<PathBuf> {
    path.ancestors().map(Path::to_path_buf).collect()
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn absolutize_from_project(path: &Path, project_root: &Path) -> PathBuf {
    absolutize(path, project_root)
}

fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }

    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
