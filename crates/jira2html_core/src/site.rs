use std::collections::HashSet;
use std::path::Path;

use crate::issues::{Attachment, Issue};
use crate::links::{attachment_path, local_file_reference};
use crate::render::escape_html;

pub const DEFAULT_SITE_TITLE: &str = "Issue Archive";
pub const DEFAULT_FONT_SIZE: &str = "9pt";
pub const INDEX_PAGE: &str = "index.html";

const FONT_SIZE_UNITS: &[&str] = &["pt", "px", "em", "rem", "%"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteOptions {
    pub title: String,
    pub font_size: String,
}

impl Default for SiteOptions {
    fn default() -> Self {
        Self {
            title: DEFAULT_SITE_TITLE.to_string(),
            font_size: DEFAULT_FONT_SIZE.to_string(),
        }
    }
}

impl SiteOptions {
    /// Font size for the stylesheet; anything but `<number><unit>` falls back
    /// to the default.
    pub fn css_font_size(&self) -> &str {
        let value = self.font_size.trim();
        let valid = FONT_SIZE_UNITS.iter().any(|unit| {
            value.strip_suffix(unit).is_some_and(|number| {
                !number.is_empty()
                    && number.chars().all(|ch| ch.is_ascii_digit() || ch == '.')
                    && number.chars().any(|ch| ch.is_ascii_digit())
            })
        });
        if valid { value } else { DEFAULT_FONT_SIZE }
    }
}

/// One row of an issue page's attachment list. The remote URL is never kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentEntry {
    Local {
        filename: String,
        link: String,
        size: Option<u64>,
    },
    Missing {
        filename: String,
    },
}

impl AttachmentEntry {
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local { .. })
    }
}

pub fn attachment_entries(attachments: &[Attachment], attachment_root: &Path) -> Vec<AttachmentEntry> {
    attachments
        .iter()
        .map(|attachment| {
            let reference = attachment_path(&attachment.content_url, attachment_root);
            let filename = match (&reference, attachment.filename.trim()) {
                (Some(reference), "") => reference.filename.clone(),
                (_, name) => name.to_string(),
            };
            match reference {
                Some(reference) if reference.local_path.is_file() => AttachmentEntry::Local {
                    filename,
                    link: local_file_reference(&reference.local_path),
                    size: attachment.size,
                },
                _ => AttachmentEntry::Missing { filename },
            }
        })
        .collect()
}

/// File name of an issue's page. Characters outside `[A-Za-z0-9._-]` are
/// replaced so keys cannot escape the output directory.
pub fn issue_page_name(key: &str) -> String {
    let safe: String = key
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.html", safe.trim_start_matches('.'))
}

pub fn stylesheet(options: &SiteOptions) -> String {
    format!(
        "body {{ font-family: -apple-system, \"Segoe UI\", \"Microsoft YaHei\", sans-serif; font-size: {size}; margin: 2em auto; max-width: 960px; padding: 0 1em; color: #222; }}
a {{ color: #0b5394; }}
h1.issue-title {{ border-bottom: 1px solid #ccc; padding-bottom: 0.3em; }}
table {{ border-collapse: collapse; margin: 0.5em 0; }}
th, td {{ border: 1px solid #ccc; padding: 0.3em 0.6em; text-align: left; vertical-align: top; }}
th {{ background: #f3f3f3; }}
pre {{ background: #f6f8fa; padding: 0.6em; overflow-x: auto; }}
code {{ font-family: Consolas, Menlo, monospace; }}
blockquote {{ border-left: 3px solid #ccc; margin-left: 0; padding-left: 1em; color: #555; }}
img {{ max-width: 600px; }}
nav.toc {{ background: #fafafa; border: 1px solid #e0e0e0; padding: 0.3em 1em; margin-bottom: 1em; }}
nav.toc li.toc-level-2 {{ margin-left: 1em; }}
nav.toc li.toc-level-3, nav.toc li.toc-level-4, nav.toc li.toc-level-5, nav.toc li.toc-level-6 {{ margin-left: 2em; }}
.missing, .empty {{ color: #999; }}
.status {{ font-weight: bold; }}
",
        size = options.css_font_size()
    )
}

fn page_shell(title: &str, body: &str, options: &SiteOptions) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>\n{}</style>\n</head>\n<body>\n{body}</body>\n</html>\n",
        escape_html(title),
        stylesheet(options)
    )
}

fn issue_heading(issue: &Issue) -> String {
    if issue.summary.trim().is_empty() {
        issue.key.clone()
    } else {
        format!("{}: {}", issue.key, issue.summary)
    }
}

fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    if bytes >= MIB {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Render one issue page. `description_html` is already rendered and is
/// inserted as-is; every other field is escaped.
pub fn render_issue_page(
    issue: &Issue,
    description_html: &str,
    attachments: &[AttachmentEntry],
    known_keys: &HashSet<String>,
    options: &SiteOptions,
) -> String {
    let heading = issue_heading(issue);
    let mut body = String::new();
    body.push_str(&format!(
        "<p class=\"nav\"><a href=\"{INDEX_PAGE}\">{}</a></p>\n",
        escape_html(&options.title)
    ));
    body.push_str(&format!(
        "<h1 class=\"issue-title\">{}</h1>\n",
        escape_html(&heading)
    ));

    body.push_str("<table class=\"fields\">\n");
    for (label, value) in [
        ("Status", &issue.status),
        ("Assignee", &issue.assignee),
        ("Created", &issue.created),
    ] {
        body.push_str(&format!(
            "<tr><th>{label}</th><td>{}</td></tr>\n",
            escape_html(value)
        ));
    }
    body.push_str("</table>\n");

    body.push_str("<h2>Description</h2>\n<div class=\"description\">\n");
    if description_html.trim().is_empty() {
        body.push_str("<p class=\"empty\">No description</p>\n");
    } else {
        body.push_str(description_html);
        if !description_html.ends_with('\n') {
            body.push('\n');
        }
    }
    body.push_str("</div>\n");

    body.push_str("<h2>Attachments</h2>\n");
    if attachments.is_empty() {
        body.push_str("<p class=\"empty\">None</p>\n");
    } else {
        body.push_str("<ul class=\"attachments\">\n");
        for entry in attachments {
            match entry {
                AttachmentEntry::Local {
                    filename,
                    link,
                    size,
                } => {
                    let size = size
                        .map(|bytes| format!(" ({})", format_size(bytes)))
                        .unwrap_or_default();
                    body.push_str(&format!(
                        "<li><a href=\"{}\">{}</a>{size}</li>\n",
                        escape_html(link),
                        escape_html(filename)
                    ));
                }
                AttachmentEntry::Missing { filename } => {
                    body.push_str(&format!(
                        "<li>{} <span class=\"missing\">(missing)</span></li>\n",
                        escape_html(filename)
                    ));
                }
            }
        }
        body.push_str("</ul>\n");
    }

    if !issue.subtasks.is_empty() {
        body.push_str("<h2>Subtasks</h2>\n<ul class=\"subtasks\">\n");
        for subtask in &issue.subtasks {
            let key = if known_keys.contains(&subtask.key) {
                format!(
                    "<a href=\"{}\">{}</a>",
                    escape_html(&issue_page_name(&subtask.key)),
                    escape_html(&subtask.key)
                )
            } else {
                escape_html(&subtask.key)
            };
            let status = if subtask.status.is_empty() {
                String::new()
            } else {
                format!(" <span class=\"status\">{}</span>", escape_html(&subtask.status))
            };
            body.push_str(&format!(
                "<li>{key} {}{status}</li>\n",
                escape_html(&subtask.summary)
            ));
        }
        body.push_str("</ul>\n");
    }

    page_shell(&heading, &body, options)
}

/// Render the home page listing `issues` in the order given.
pub fn render_index_page(issues: &[Issue], options: &SiteOptions) -> String {
    let mut body = String::new();
    body.push_str(&format!("<h1>{}</h1>\n", escape_html(&options.title)));
    body.push_str(&format!("<p>{} issues</p>\n", issues.len()));
    body.push_str(
        "<table class=\"issues\">\n<tr><th>Key</th><th>Summary</th><th>Status</th><th>Assignee</th></tr>\n",
    );
    for issue in issues {
        body.push_str(&format!(
            "<tr><td><a href=\"{}\">{}</a></td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape_html(&issue_page_name(&issue.key)),
            escape_html(&issue.key),
            escape_html(&issue.summary),
            escape_html(&issue.status),
            escape_html(&issue.assignee)
        ));
    }
    body.push_str("</table>\n");
    page_shell(&options.title, &body, options)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::{
        AttachmentEntry, SiteOptions, attachment_entries, issue_page_name, render_index_page,
        render_issue_page, stylesheet,
    };
    use crate::issues::{Attachment, Issue, Subtask};

    fn write_file(path: &Path, content: &str) {
        let parent = path.parent().expect("parent");
        fs::create_dir_all(parent).expect("create parent");
        fs::write(path, content).expect("write file");
    }

    fn sample_issue() -> Issue {
        Issue {
            key: "OPS-7".to_string(),
            summary: "VPN <outage>".to_string(),
            status: "Open".to_string(),
            assignee: "Mary & John".to_string(),
            created: "2024-03-01".to_string(),
            subtasks: vec![
                Subtask {
                    key: "OPS-8".to_string(),
                    summary: "Rotate keys".to_string(),
                    status: "Done".to_string(),
                },
                Subtask {
                    key: "OPS-9".to_string(),
                    summary: "Elsewhere".to_string(),
                    status: String::new(),
                },
            ],
            ..Issue::default()
        }
    }

    #[test]
    fn issue_page_escapes_fields_and_links_known_subtasks() {
        let issue = sample_issue();
        let known = HashSet::from(["OPS-7".to_string(), "OPS-8".to_string()]);
        let html = render_issue_page(&issue, "<p>body</p>", &[], &known, &SiteOptions::default());

        assert!(html.contains("<title>OPS-7: VPN &lt;outage&gt;</title>"));
        assert!(html.contains("<td>Mary &amp; John</td>"));
        assert!(html.contains("<p>body</p>"));
        assert!(html.contains(r#"<a href="OPS-8.html">OPS-8</a> Rotate keys"#));
        assert!(html.contains("<li>OPS-9 Elsewhere</li>"));
        assert!(html.contains("<p class=\"empty\">None</p>"));
    }

    #[test]
    fn empty_description_is_marked() {
        let html = render_issue_page(
            &Issue::default(),
            "",
            &[],
            &HashSet::new(),
            &SiteOptions::default(),
        );
        assert!(html.contains("No description"));
        assert!(!html.contains("Subtasks"));
    }

    #[test]
    fn attachment_entries_never_expose_remote_urls() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("attachment");
        write_file(&root.join("42").join("trace log.txt"), "trace");

        let attachments = vec![
            Attachment {
                filename: "trace log.txt".to_string(),
                content_url: "https://jira.example.com/secure/attachment/42/trace%20log.txt"
                    .to_string(),
                size: Some(2048),
                ..Attachment::default()
            },
            Attachment {
                filename: "gone.zip".to_string(),
                content_url: "https://jira.example.com/secure/attachment/43/gone.zip".to_string(),
                ..Attachment::default()
            },
        ];
        let entries = attachment_entries(&attachments, &root);
        assert!(entries[0].is_local());
        assert_eq!(
            entries[1],
            AttachmentEntry::Missing {
                filename: "gone.zip".to_string()
            }
        );

        let html = render_issue_page(
            &Issue::default(),
            "",
            &entries,
            &HashSet::new(),
            &SiteOptions::default(),
        );
        assert!(!html.contains("jira.example.com"));
        assert!(html.contains(">trace log.txt</a> (2.0 KB)"));
        assert!(html.contains("gone.zip <span class=\"missing\">(missing)</span>"));
    }

    #[test]
    fn index_page_lists_issues_in_given_order() {
        let mut second = sample_issue();
        second.key = "OPS-2".to_string();
        let issues = vec![sample_issue(), second];
        let html = render_index_page(&issues, &SiteOptions::default());

        let first_at = html.find("OPS-7.html").expect("first row");
        let second_at = html.find("OPS-2.html").expect("second row");
        assert!(first_at < second_at);
        assert!(html.contains("<p>2 issues</p>"));
    }

    #[test]
    fn font_size_is_validated() {
        let custom = SiteOptions {
            font_size: "11px".to_string(),
            ..SiteOptions::default()
        };
        assert!(stylesheet(&custom).contains("font-size: 11px;"));

        let hostile = SiteOptions {
            font_size: "9pt; } body { display:none".to_string(),
            ..SiteOptions::default()
        };
        assert_eq!(hostile.css_font_size(), "9pt");
        assert!(stylesheet(&SiteOptions::default()).contains("font-size: 9pt;"));
    }

    #[test]
    fn issue_page_name_is_filesystem_safe() {
        assert_eq!(issue_page_name("OPS-7"), "OPS-7.html");
        assert_eq!(issue_page_name("../etc/passwd"), "_etc_passwd.html");
    }
}
