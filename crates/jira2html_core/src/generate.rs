use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::authors::{AuthorMap, load_author_map};
use crate::doc_index::{DocumentIndex, IndexStats};
use crate::issues::{load_issue_order, load_issues, order_issues};
use crate::links::{LinkPatterns, LinkRewriter, RewriteStats};
use crate::markup::JiraWikiConverter;
use crate::render::{DescriptionRenderer, image_attachments};
use crate::resolver::ReferenceResolver;
use crate::runtime::{Runtime, normalize_for_display};
use crate::site::{INDEX_PAGE, attachment_entries, issue_page_name, render_index_page, render_issue_page};

#[derive(Debug, Clone, Default)]
pub struct GenerateReport {
    pub output_dir: PathBuf,
    pub index_page: PathBuf,
    pub index_stats: IndexStats,
    pub authors_loaded: usize,
    pub issues_loaded: usize,
    pub issues_written: usize,
    pub ordered_keys: usize,
    pub attachments_found: usize,
    pub attachments_missing: usize,
    pub references: RewriteStats,
    pub conversion_fallbacks: usize,
    pub warnings: Vec<String>,
}

/// Build the offline site: index the documentation corpus, load authors,
/// issues and ordering, then write one page per issue plus the home page.
/// Problems with optional inputs are collected as warnings.
pub fn generate_site(runtime: &Runtime) -> Result<GenerateReport> {
    let paths = &runtime.paths;
    let mut report = GenerateReport {
        output_dir: paths.output_dir.clone(),
        index_page: paths.output_dir.join(INDEX_PAGE),
        ..GenerateReport::default()
    };

    let index = DocumentIndex::build(&paths.docs_roots);
    report.index_stats = index.stats();
    if paths.docs_roots.is_empty() {
        report
            .warnings
            .push("no documentation roots configured".to_string());
    }
    for root in &report.index_stats.roots_skipped {
        report.warnings.push(format!(
            "documentation root not found: {}",
            normalize_for_display(root)
        ));
    }

    let patterns = match runtime.docs_base_url.as_deref() {
        Some(base_url) => Some(LinkPatterns::for_base_url(base_url)?),
        None => {
            report.warnings.push(
                "docs.base_url is not set; documentation links are left unchanged".to_string(),
            );
            None
        }
    };

    let authors = match load_author_map(&paths.author_map) {
        Ok(authors) => authors,
        Err(error) => {
            report.warnings.push(format!("{error:#}"));
            AuthorMap::default()
        }
    };
    report.authors_loaded = authors.len();

    let issue_set = load_issues(&paths.issues_dir)?;
    report.warnings.extend(issue_set.warnings);
    let mut issues = issue_set.issues;
    report.issues_loaded = issues.len();

    let order = match load_issue_order(&paths.order_csv) {
        Ok(order) => order,
        Err(error) => {
            report.warnings.push(format!("{error:#}"));
            Vec::new()
        }
    };
    report.ordered_keys = order.len();
    order_issues(&mut issues, &order);

    fs::create_dir_all(&paths.output_dir)
        .with_context(|| format!("failed to create {}", paths.output_dir.display()))?;

    let resolver = ReferenceResolver::new(&index).with_redirect_hops(runtime.config.redirect_hops());
    let converter = JiraWikiConverter;
    let mut renderer = DescriptionRenderer::new(&authors, &converter, &paths.attachment_dir);
    if let Some(patterns) = &patterns {
        renderer = renderer.with_rewriter(LinkRewriter::new(patterns, resolver));
    }

    let options = runtime.config.site_options();
    let known_keys: HashSet<String> = issues.iter().map(|issue| issue.key.clone()).collect();
    for issue in &issues {
        let images = image_attachments(&issue.attachments, &paths.attachment_dir);
        let entries = attachment_entries(&issue.attachments, &paths.attachment_dir);
        let local = entries.iter().filter(|entry| entry.is_local()).count();
        report.attachments_found += local;
        report.attachments_missing += entries.len() - local;

        let description = renderer.format_description(&issue.description, &images);
        report.references.merge(description.links);
        if description.fell_back {
            report.conversion_fallbacks += 1;
            report.warnings.push(format!(
                "{}: description markup could not be converted; rendered as plain Markdown",
                issue.key
            ));
        }

        let page = render_issue_page(issue, &description.html, &entries, &known_keys, &options);
        let page_path = paths.output_dir.join(issue_page_name(&issue.key));
        fs::write(&page_path, page)
            .with_context(|| format!("failed to write {}", page_path.display()))?;
        report.issues_written += 1;
    }

    fs::write(&report.index_page, render_index_page(&issues, &options))
        .with_context(|| format!("failed to write {}", report.index_page.display()))?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::generate_site;
    use crate::config::AppConfig;
    use crate::runtime::{ResolvedPaths, Runtime, ValueSource};

    fn write_file(path: &Path, content: &str) {
        let parent = path.parent().expect("parent");
        fs::create_dir_all(parent).expect("create parent");
        fs::write(path, content).expect("write file");
    }

    fn runtime_at(root: &Path, base_url: Option<&str>) -> Runtime {
        Runtime {
            paths: ResolvedPaths {
                project_root: root.to_path_buf(),
                state_dir: root.join(".jira2html"),
                config_path: root.join(".jira2html").join("config.toml"),
                issues_dir: root.join("issues"),
                attachment_dir: root.join("attachment"),
                output_dir: root.join("offline_site"),
                order_csv: root.join("issues.csv"),
                author_map: root.join("jira2html_name_mapping.json"),
                docs_roots: vec![root.join("docs")],
                root_source: ValueSource::Flag,
                config_source: ValueSource::Default,
                output_source: ValueSource::Default,
                docs_source: ValueSource::Config,
            },
            config: AppConfig::default(),
            docs_base_url: base_url.map(str::to_string),
        }
    }

    #[test]
    fn generate_site_writes_pages_and_index() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        write_file(&root.join("docs").join("OPS").join("Runbook.html"), "<p>runbook</p>");
        write_file(&root.join("attachment").join("42").join("trace.log"), "trace");
        write_file(
            &root.join("issues").join("OPS-1.json"),
            r#"{"key": "OPS-1", "fields": {"summary": "First", "status": {"name": "Open"},
                "description": "See https://docs.example.com/display/OPS/Runbook and [~jhon]",
                "attachment": [
                    {"filename": "trace.log", "content": "https://jira.example.com/secure/attachment/42/trace.log"},
                    {"filename": "lost.zip", "content": "https://jira.example.com/secure/attachment/43/lost.zip"}
                ],
                "subtasks": [{"key": "OPS-2", "fields": {"summary": "Second", "status": {"name": "Done"}}}]}}"#,
        );
        write_file(
            &root.join("issues").join("OPS-2.json"),
            r#"{"key": "OPS-2", "fields": {"summary": "Second", "description": "{code}\nunterminated"}}"#,
        );
        write_file(&root.join("issues").join("broken.json"), "{");
        write_file(&root.join("issues.csv"), "Summary,Type,Status,Issue key\nSecond,Task,Done,OPS-2\n");
        write_file(
            &root.join("jira2html_name_mapping.json"),
            r#"[{"nick_name": "jhon", "long_name": "John Smith"}]"#,
        );

        let report = generate_site(&runtime_at(root, Some("https://docs.example.com")))
            .expect("generate");
        assert_eq!(report.issues_loaded, 2);
        assert_eq!(report.issues_written, 2);
        assert_eq!(report.authors_loaded, 1);
        assert_eq!(report.attachments_found, 1);
        assert_eq!(report.attachments_missing, 1);
        assert_eq!(report.references.resolved, 1);
        assert_eq!(report.conversion_fallbacks, 1);
        assert!(report.warnings.iter().any(|warning| warning.contains("broken.json")));

        let first = fs::read_to_string(root.join("offline_site").join("OPS-1.html"))
            .expect("read page");
        assert!(first.contains("John Smith[~jhon]"));
        assert!(first.contains("Runbook.html"));
        assert!(!first.contains("docs.example.com"));
        assert!(first.contains(r#"<a href="OPS-2.html">OPS-2</a>"#));

        let index = fs::read_to_string(&report.index_page).expect("read index");
        let second_at = index.find("OPS-2.html").expect("OPS-2 row");
        let first_at = index.find("OPS-1.html").expect("OPS-1 row");
        assert!(second_at < first_at);
    }

    #[test]
    fn generate_site_without_base_url_warns_and_keeps_links() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        write_file(
            &root.join("issues").join("OPS-1.json"),
            r#"{"key": "OPS-1", "fields": {"description": "https://docs.example.com/display/OPS/Runbook"}}"#,
        );

        let report = generate_site(&runtime_at(root, None)).expect("generate");
        assert_eq!(report.issues_written, 1);
        assert_eq!(report.references.resolved, 0);
        assert!(report.warnings.iter().any(|warning| warning.contains("docs.base_url")));
        assert!(
            report
                .warnings
                .iter()
                .any(|warning| warning.contains("documentation root not found"))
        );

        let page = fs::read_to_string(root.join("offline_site").join("OPS-1.html"))
            .expect("read page");
        assert!(page.contains("https://docs.example.com/display/OPS/Runbook"));
    }

    #[test]
    fn generate_site_requires_issue_export() {
        let temp = tempdir().expect("tempdir");
        let error = generate_site(&runtime_at(temp.path(), None)).expect_err("must fail");
        assert!(error.to_string().contains("issues directory not found"));
    }
}
