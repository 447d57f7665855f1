use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use pulldown_cmark::{CowStr, Event, HeadingLevel, Options, Parser, Tag, TagEnd, html};
use regex::{Captures, Regex};

use crate::authors::AuthorMap;
use crate::issues::Attachment;
use crate::links::{
    LOCAL_FILE_SCHEME, LOCAL_LINK, LinkRewriter, RewriteStats, attachment_path,
    file_url_to_display_path, local_file_reference, rewrite_attachment_links,
};
use crate::markup::MarkupConverter;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif"];

static IMAGE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)!\s*([^!\n|]+?\.(?:png|jpg|jpeg|gif))\s*(?:\|[^!\n]*)?!")
        .expect("image reference pattern")
});

static HTML_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<a\b[^>]*>.*?</a>|<[^>]*>").expect("html segment pattern"));

static ANCHOR_PARTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^(<a\b[^>]*>)(.*)(</a>)$").expect("anchor parts pattern")
});

static HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bhref\s*=\s*"([^"]*)""#).expect("href pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    Converted(String),
    Fallback(String),
}

impl ConversionOutcome {
    pub fn markdown(&self) -> &str {
        match self {
            Self::Converted(markdown) | Self::Fallback(markdown) => markdown,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

pub fn convert_markup(converter: &dyn MarkupConverter, text: &str) -> ConversionOutcome {
    match converter.convert(text) {
        Ok(markdown) => ConversionOutcome::Converted(markdown),
        Err(_) => ConversionOutcome::Fallback(text.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeadingEntry {
    level: u8,
    id: String,
    text: String,
}

/// Render Markdown to HTML with tables, strikethrough and heading attributes.
/// Line breaks inside paragraphs are kept, headings get slug ids, and a table
/// of contents is prepended when there are at least two headings.
pub fn render_markdown(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_HEADING_ATTRIBUTES);

    let mut events: Vec<Event<'_>> = Parser::new_ext(markdown, options)
        .map(|event| match event {
            Event::SoftBreak => Event::HardBreak,
            other => other,
        })
        .collect();
    let headings = assign_heading_ids(&mut events);

    let mut body = String::with_capacity(markdown.len() * 2);
    html::push_html(&mut body, events.into_iter());
    if headings.len() < 2 {
        return body;
    }
    let mut out = table_of_contents(&headings);
    out.push_str(&body);
    out
}

fn heading_level(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

fn assign_heading_ids(events: &mut [Event<'_>]) -> Vec<HeadingEntry> {
    let mut entries = Vec::new();
    let mut used: HashMap<String, usize> = HashMap::new();
    let mut index = 0usize;
    while index < events.len() {
        let Event::Start(Tag::Heading { level, .. }) = &events[index] else {
            index += 1;
            continue;
        };
        let level = heading_level(*level);

        let mut text = String::new();
        let mut end = index + 1;
        while end < events.len() {
            match &events[end] {
                Event::End(TagEnd::Heading(_)) => break,
                Event::Text(fragment) | Event::Code(fragment) => text.push_str(fragment),
                _ => {}
            }
            end += 1;
        }

        if let Event::Start(Tag::Heading { id, .. }) = &mut events[index] {
            let slug = match id.as_ref() {
                Some(existing) => existing.to_string(),
                None => unique_slug(&text, &mut used),
            };
            *id = Some(CowStr::from(slug.clone()));
            entries.push(HeadingEntry {
                level,
                id: slug,
                text: text.trim().to_string(),
            });
        }
        index = end + 1;
    }
    entries
}

fn unique_slug(text: &str, used: &mut HashMap<String, usize>) -> String {
    let base = slugify(text);
    let count = used.entry(base.clone()).or_insert(0);
    *count += 1;
    if *count == 1 {
        base
    } else {
        format!("{base}-{}", *count - 1)
    }
}

pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "section".to_string()
    } else {
        slug
    }
}

fn table_of_contents(headings: &[HeadingEntry]) -> String {
    let mut toc = String::from("<nav class=\"toc\"><ul>\n");
    for heading in headings {
        toc.push_str(&format!(
            "<li class=\"toc-level-{}\"><a href=\"#{}\">{}</a></li>\n",
            heading.level,
            escape_html(&heading.id),
            escape_html(&heading.text)
        ));
    }
    toc.push_str("</ul></nav>\n");
    toc
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Turn bare `file:///` URLs in rendered HTML into anchors labelled with the
/// platform path. Anchors whose text is their own local URL are relabelled;
/// other tags and anchors are left alone.
pub fn linkify_local_files(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0usize;
    for segment in HTML_SEGMENT.find_iter(html) {
        out.push_str(&link_bare_urls(&html[cursor..segment.start()]));
        out.push_str(&relabel_anchor(segment.as_str()));
        cursor = segment.end();
    }
    out.push_str(&link_bare_urls(&html[cursor..]));
    out
}

fn link_bare_urls(text: &str) -> String {
    LOCAL_LINK
        .replace_all(text, |captures: &Captures<'_>| {
            let url = &captures[0];
            format!(r#"<a href="{url}">{}</a>"#, display_label(url))
        })
        .into_owned()
}

fn relabel_anchor(segment: &str) -> String {
    let Some(parts) = ANCHOR_PARTS.captures(segment) else {
        return segment.to_string();
    };
    let Some(href) = HREF.captures(&parts[1]) else {
        return segment.to_string();
    };
    let href = &href[1];
    if href.starts_with(LOCAL_FILE_SCHEME) && parts[2].trim() == href {
        format!("{}{}{}", &parts[1], display_label(href), &parts[3])
    } else {
        segment.to_string()
    }
}

fn display_label(url: &str) -> String {
    match file_url_to_display_path(url) {
        Some(path) => escape_html(&path.display().to_string()),
        None => escape_html(url),
    }
}

pub fn is_image_filename(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

pub fn image_attachments(
    attachments: &[Attachment],
    attachment_root: &Path,
) -> HashMap<String, PathBuf> {
    attachments
        .iter()
        .filter(|attachment| is_image_filename(&attachment.filename))
        .filter_map(|attachment| attachment_path(&attachment.content_url, attachment_root))
        .filter(|reference| reference.local_path.is_file())
        .map(|reference| (reference.filename.to_lowercase(), reference.local_path))
        .collect()
}

/// Point `!name.png!` references at the issue's local image copies. Names
/// with no local copy become a visible "not found" marker; references that
/// are already URLs are left for the markup converter.
pub fn resolve_image_references(text: &str, images: &HashMap<String, PathBuf>) -> String {
    IMAGE_REFERENCE
        .replace_all(text, |captures: &Captures<'_>| {
            let name = captures[1].trim();
            if name.contains("://") {
                return captures[0].to_string();
            }
            match images.get(&name.to_lowercase()) {
                Some(path) => format!("!{}!", local_file_reference(path)),
                None => format!("[image not found: {name}]"),
            }
        })
        .into_owned()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedDescription {
    pub html: String,
    pub links: RewriteStats,
    pub fell_back: bool,
}

pub struct DescriptionRenderer<'a> {
    rewriter: Option<LinkRewriter<'a>>,
    authors: &'a AuthorMap,
    converter: &'a dyn MarkupConverter,
    attachment_root: &'a Path,
}

impl<'a> DescriptionRenderer<'a> {
    pub fn new(
        authors: &'a AuthorMap,
        converter: &'a dyn MarkupConverter,
        attachment_root: &'a Path,
    ) -> Self {
        Self {
            rewriter: None,
            authors,
            converter,
            attachment_root,
        }
    }

    pub fn with_rewriter(mut self, rewriter: LinkRewriter<'a>) -> Self {
        self.rewriter = Some(rewriter);
        self
    }

    pub fn format_description(
        &self,
        text: &str,
        images: &HashMap<String, PathBuf>,
    ) -> RenderedDescription {
        if text.trim().is_empty() {
            return RenderedDescription::default();
        }

        let mut links = RewriteStats::default();
        let mut text = text.to_string();
        if let Some(rewriter) = &self.rewriter {
            let rewritten = rewriter.rewrite(&text);
            links.merge(rewritten.stats);
            text = rewritten.text;
        }
        let attachments = rewrite_attachment_links(&text, self.attachment_root);
        links.merge(attachments.stats);

        let annotated = self.authors.annotate(&attachments.text);
        let with_images = resolve_image_references(&annotated, images);
        let outcome = convert_markup(self.converter, &with_images);
        RenderedDescription {
            html: linkify_local_files(&render_markdown(outcome.markdown())),
            links,
            fell_back: outcome.is_fallback(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;

    use anyhow::{Result, bail};
    use tempfile::tempdir;

    use super::{
        ConversionOutcome, DescriptionRenderer, convert_markup, escape_html, image_attachments,
        linkify_local_files, render_markdown, resolve_image_references, slugify,
    };
    use crate::authors::AuthorMap;
    use crate::doc_index::DocumentIndex;
    use crate::issues::Attachment;
    use crate::links::{LinkPatterns, LinkRewriter, local_file_reference};
    use crate::markup::{JiraWikiConverter, MarkupConverter};
    use crate::resolver::ReferenceResolver;

    fn write_file(path: &Path, content: &str) {
        let parent = path.parent().expect("parent");
        fs::create_dir_all(parent).expect("create parent");
        fs::write(path, content).expect("write file");
    }

    struct FailingConverter;

    impl MarkupConverter for FailingConverter {
        fn convert(&self, _text: &str) -> Result<String> {
            bail!("unsupported markup")
        }
    }

    #[test]
    fn conversion_failure_falls_back_to_original() {
        let outcome = convert_markup(&FailingConverter, "h1. Title");
        assert_eq!(outcome, ConversionOutcome::Fallback("h1. Title".to_string()));
        assert!(outcome.is_fallback());
        assert_eq!(
            convert_markup(&JiraWikiConverter, "h1. Title").markdown(),
            "# Title"
        );
    }

    #[test]
    fn render_markdown_keeps_line_breaks_and_code_language() {
        let html = render_markdown("first\nsecond\n\n```rust\nlet x = 1;\n```");
        assert!(html.contains("first<br />"));
        assert!(html.contains(r#"<code class="language-rust">"#));
        assert!(!html.contains("class=\"toc\""));
    }

    #[test]
    fn render_markdown_adds_ids_and_toc_for_multiple_headings() {
        let html = render_markdown("# Intro\n\ntext\n\n## Next Steps\n\n## Next Steps");
        assert!(html.starts_with("<nav class=\"toc\">"));
        assert!(html.contains(r##"<a href="#next-steps">Next Steps</a>"##));
        assert!(html.contains(r#"<h1 id="intro">Intro</h1>"#));
        assert!(html.contains(r#"<h2 id="next-steps-1">"#));
    }

    #[test]
    fn render_markdown_supports_tables_and_strikethrough() {
        let html = render_markdown("| a | b |\n| --- | --- |\n| 1 | ~~2~~ |");
        assert!(html.contains("<table>"));
        assert!(html.contains("<del>2</del>"));
    }

    #[test]
    fn slugify_keeps_letters_of_any_script() {
        assert_eq!(slugify("Deploy Guide (v2)"), "deploy-guide-v2");
        assert_eq!(slugify("部署 说明"), "部署-说明");
        assert_eq!(slugify("***"), "section");
    }

    #[test]
    fn escape_html_escapes_markup_characters() {
        assert_eq!(escape_html(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }

    #[cfg(unix)]
    #[test]
    fn linkify_labels_local_links_with_paths() {
        let html = linkify_local_files(
            r#"<p>see file:///srv/docs/My%20Page.html and <a href="file:///srv/a.html">file:///srv/a.html</a> <img src="file:///srv/i.png" /></p>"#,
        );
        assert!(html.contains(r#"<a href="file:///srv/docs/My%20Page.html">/srv/docs/My Page.html</a>"#));
        assert!(html.contains(r#"<a href="file:///srv/a.html">/srv/a.html</a>"#));
        assert!(html.contains(r#"<img src="file:///srv/i.png" />"#));
    }

    #[cfg(unix)]
    #[test]
    fn linkify_stops_before_sentence_period() {
        let html = linkify_local_files("<p>Read file:///srv/Runbook.html. Then stop</p>");
        assert_eq!(
            html,
            r#"<p>Read <a href="file:///srv/Runbook.html">/srv/Runbook.html</a>. Then stop</p>"#
        );
    }

    #[test]
    fn linkify_leaves_labelled_anchors_alone() {
        let html = r#"<a href="file:///srv/a.html">the guide</a>"#;
        assert_eq!(linkify_local_files(html), html);
    }

    #[test]
    fn image_references_point_at_local_copies() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("attachment");
        let shot = root.join("42").join("Shot.PNG");
        write_file(&shot, "png");

        let attachments = vec![
            Attachment {
                filename: "Shot.PNG".to_string(),
                content_url: "https://jira.example.com/secure/attachment/42/Shot.PNG".to_string(),
                ..Attachment::default()
            },
            Attachment {
                filename: "notes.txt".to_string(),
                content_url: "https://jira.example.com/secure/attachment/43/notes.txt".to_string(),
                ..Attachment::default()
            },
        ];
        let images = image_attachments(&attachments, &root);
        assert_eq!(images.len(), 1);

        let text = resolve_image_references("before !shot.png|width=300! after !lost.gif!", &images);
        assert_eq!(
            text,
            format!(
                "before !{}! after [image not found: lost.gif]",
                local_file_reference(&shot)
            )
        );
        assert_eq!(
            resolve_image_references("!https://x.example/pic.png!", &HashMap::new()),
            "!https://x.example/pic.png!"
        );
    }

    #[test]
    fn format_description_runs_full_pipeline() {
        let temp = tempdir().expect("tempdir");
        let docs = temp.path().join("docs");
        let page = docs.join("VPN Setup.html");
        write_file(&page, "<p>vpn</p>");

        let index = DocumentIndex::build(&[&docs]);
        let patterns = LinkPatterns::for_base_url("https://docs.example.com").expect("patterns");
        let rewriter = LinkRewriter::new(&patterns, ReferenceResolver::new(&index));
        let authors = AuthorMap::from_pairs([("jhon", "John Smith")]);
        let attachment_root = temp.path().join("attachment");
        let renderer = DescriptionRenderer::new(&authors, &JiraWikiConverter, &attachment_root)
            .with_rewriter(rewriter);

        let rendered = renderer.format_description(
            "h2. Setup\n*Read* https://docs.example.com/display/OPS/VPN+Setup first, [~jhon]\nand https://docs.example.com/display/OPS/Missing",
            &HashMap::new(),
        );
        assert!(!rendered.fell_back);
        assert_eq!(rendered.links.resolved, 1);
        assert_eq!(rendered.links.unresolved, 1);
        assert!(rendered.html.contains("<strong>Read</strong>"));
        assert!(rendered.html.contains(&format!(
            r#"<a href="{}">"#,
            local_file_reference(&page)
        )));
        assert!(rendered.html.contains("John Smith[~jhon]"));
        assert!(rendered.html.contains("https://docs.example.com/display/OPS/Missing"));
    }

    #[test]
    fn format_description_of_empty_text_is_empty() {
        let authors = AuthorMap::default();
        let renderer = DescriptionRenderer::new(&authors, &JiraWikiConverter, Path::new("."));
        let rendered = renderer.format_description("  ", &HashMap::new());
        assert!(rendered.html.is_empty());
        assert!(!rendered.fell_back);
    }

    #[test]
    fn broken_markup_still_renders() {
        let authors = AuthorMap::default();
        let renderer = DescriptionRenderer::new(&authors, &JiraWikiConverter, Path::new("."));
        let rendered = renderer.format_description("{code}\nunterminated", &HashMap::new());
        assert!(rendered.fell_back);
        assert!(rendered.html.contains("unterminated"));
    }
}
