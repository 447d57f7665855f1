use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use walkdir::WalkDir;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Issue {
    pub key: String,
    pub summary: String,
    pub description: String,
    pub status: String,
    pub assignee: String,
    pub created: String,
    pub attachments: Vec<Attachment>,
    pub subtasks: Vec<Subtask>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_url: String,
    pub size: Option<u64>,
    pub mime_type: Option<String>,
    pub author: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subtask {
    pub key: String,
    pub summary: String,
    pub status: String,
}

#[derive(Debug, Clone, Default)]
pub struct IssueSet {
    pub issues: Vec<Issue>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    fields: Option<RawFields>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFields {
    summary: Option<String>,
    description: Option<String>,
    status: Option<RawNamed>,
    assignee: Option<RawPerson>,
    created: Option<String>,
    attachment: Option<Vec<RawAttachment>>,
    subtasks: Option<Vec<RawSubtask>>,
}

#[derive(Debug, Deserialize)]
struct RawNamed {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPerson {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAttachment {
    filename: Option<String>,
    content: Option<String>,
    size: Option<u64>,
    mime_type: Option<String>,
    author: Option<RawPerson>,
}

#[derive(Debug, Deserialize)]
struct RawSubtask {
    key: Option<String>,
    fields: Option<RawSubtaskFields>,
}

#[derive(Debug, Deserialize)]
struct RawSubtaskFields {
    summary: Option<String>,
    status: Option<RawNamed>,
}

fn status_name(status: Option<RawNamed>) -> String {
    status.and_then(|status| status.name).unwrap_or_default()
}

fn display_name(person: Option<RawPerson>) -> String {
    person.and_then(|person| person.display_name).unwrap_or_default()
}

/// Parse one exported issue record. Missing or `null` fields become empty
/// values.
pub fn parse_issue(json: &str) -> Result<Issue> {
    let raw: RawIssue = serde_json::from_str(json).context("failed to parse issue JSON")?;
    let fields = raw.fields.unwrap_or_default();

    let attachments = fields
        .attachment
        .unwrap_or_default()
        .into_iter()
        .map(|attachment| Attachment {
            filename: attachment.filename.unwrap_or_default(),
            content_url: attachment.content.unwrap_or_default(),
            size: attachment.size,
            mime_type: attachment.mime_type,
            author: display_name(attachment.author),
        })
        .collect();
    let subtasks = fields
        .subtasks
        .unwrap_or_default()
        .into_iter()
        .map(|subtask| {
            let (summary, status) = match subtask.fields {
                Some(fields) => (fields.summary.unwrap_or_default(), status_name(fields.status)),
                None => (String::new(), String::new()),
            };
            Subtask {
                key: subtask.key.unwrap_or_default(),
                summary,
                status,
            }
        })
        .collect();

    Ok(Issue {
        key: raw.key.unwrap_or_default().trim().to_string(),
        summary: fields.summary.unwrap_or_default(),
        description: fields.description.unwrap_or_default(),
        status: status_name(fields.status),
        assignee: display_name(fields.assignee),
        created: fields.created.unwrap_or_default(),
        attachments,
        subtasks,
    })
}

pub fn load_issue(path: &Path) -> Result<Issue> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_issue(&content).with_context(|| format!("failed to load issue {}", path.display()))
}

/// Load every `*.json` record under `issues_dir`. Records that fail to parse,
/// or have no key, are reported as warnings and skipped.
pub fn load_issues(issues_dir: &Path) -> Result<IssueSet> {
    if !issues_dir.is_dir() {
        bail!("issues directory not found: {}", issues_dir.display());
    }

    let mut set = IssueSet::default();
    for entry in WalkDir::new(issues_dir).follow_links(false).sort_by_file_name() {
        let entry =
            entry.with_context(|| format!("failed to walk {}", issues_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if !is_json {
            continue;
        }
        match load_issue(path) {
            Ok(issue) if issue.key.is_empty() => set
                .warnings
                .push(format!("skipped {}: issue has no key", path.display())),
            Ok(issue) => set.issues.push(issue),
            Err(error) => set.warnings.push(format!("{error:#}")),
        }
    }
    Ok(set)
}

/// Read home-page ordering from the 4th comma-separated column of each line.
/// Lines with fewer columns are skipped; a missing file yields no ordering.
pub fn load_issue_order(csv_path: &Path) -> Result<Vec<String>> {
    if !csv_path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(csv_path)
        .with_context(|| format!("failed to read {}", csv_path.display()))?;
    Ok(parse_issue_order(&content))
}

pub fn parse_issue_order(content: &str) -> Vec<String> {
    content
        .trim_start_matches('\u{feff}')
        .lines()
        .filter_map(|line| {
            let column = line.trim().split(',').nth(3)?;
            let key = column.trim().to_uppercase();
            (!key.is_empty()).then_some(key)
        })
        .collect()
}

/// Sort issues for the home page: keys listed in `order` first, in order of
/// first appearance, then the rest by key with numeric suffix comparison.
pub fn order_issues(issues: &mut [Issue], order: &[String]) {
    let mut positions: HashMap<&str, usize> = HashMap::new();
    for (position, key) in order.iter().enumerate() {
        positions.entry(key.as_str()).or_insert(position);
    }
    issues.sort_by(|left, right| {
        let left_position = positions.get(left.key.to_uppercase().as_str()).copied();
        let right_position = positions.get(right.key.to_uppercase().as_str()).copied();
        match (left_position, right_position) {
            (Some(left_position), Some(right_position)) => left_position.cmp(&right_position),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => compare_issue_keys(&left.key, &right.key),
        }
    });
}

/// Compare `PROJ-12` style keys by project, then by numeric suffix.
pub fn compare_issue_keys(left: &str, right: &str) -> Ordering {
    match (split_issue_key(left), split_issue_key(right)) {
        (Some((left_project, left_number)), Some((right_project, right_number))) => left_project
            .cmp(right_project)
            .then(left_number.cmp(&right_number)),
        _ => left.cmp(right),
    }
}

fn split_issue_key(key: &str) -> Option<(&str, u64)> {
    let (project, number) = key.rsplit_once('-')?;
    Some((project, number.parse().ok()?))
}
