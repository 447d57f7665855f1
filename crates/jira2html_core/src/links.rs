use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use regex::{Captures, Regex};

use crate::keys::{decode_component, has_html_extension};
use crate::resolver::ReferenceResolver;

pub const LOCAL_FILE_SCHEME: &str = "file:///";

const LOCAL_PATH_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Closing punctuation stripped when it directly follows a local link.
const CLOSING_PUNCTUATION: &[char] = &[']', ')', '\u{FF0C}', '\u{3002}', '>', '\u{3011}'];

const SENTENCE_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?'];

pub(crate) static LOCAL_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"file:///[A-Za-z0-9%/._~-]*[A-Za-z0-9%/_~-]").expect("local link pattern"));

static ATTACHMENT_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/attachment/(\d+)/(.+)$").expect("attachment url pattern")
});

static ATTACHMENT_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://[^\s\]|)]+/attachment/(\d+)/([^\s\]|)!]+)").expect("attachment link pattern")
});

pub fn local_file_reference(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let normalized = absolute.to_string_lossy().replace('\\', "/");
    let trimmed = normalized.trim_start_matches('/');
    format!(
        "{LOCAL_FILE_SCHEME}{}",
        utf8_percent_encode(trimmed, LOCAL_PATH_ENCODE)
    )
}

/// Inverse of [`local_file_reference`]: turn a `file:///` link back into a
/// platform path for display. Returns `None` for anything else.
pub fn file_url_to_display_path(url: &str) -> Option<PathBuf> {
    let rest = url.strip_prefix(LOCAL_FILE_SCHEME)?;
    let decoded = decode_component(rest);
    if cfg!(windows) {
        Some(PathBuf::from(decoded.replace('/', "\\")))
    } else {
        Some(PathBuf::from(format!("/{decoded}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub id: String,
    pub filename: String,
    pub local_path: PathBuf,
}

/// Map an attachment content URL (`.../attachment/<id>/<filename>`) to
/// `<attachment_root>/<id>/<filename>`. No index lookup is involved and the
/// file is not required to exist.
pub fn attachment_path(content_url: &str, attachment_root: &Path) -> Option<AttachmentRef> {
    let captures = ATTACHMENT_URL.captures(content_url)?;
    let id = captures[1].to_string();
    let filename = decode_component(&captures[2]);
    let local_path = attachment_root.join(&id).join(&filename);
    Some(AttachmentRef {
        id,
        filename,
        local_path,
    })
}

#[derive(Debug, Clone)]
pub struct LinkPatterns {
    titled: Regex,
    numeric: Regex,
}

impl LinkPatterns {
    /// Build the titled (`/display/<SPACE>/<title>`) and numeric
    /// (`/pages/viewpage.action?pageId=<id>`) patterns for `base_url`. The
    /// scheme of `base_url` is ignored; both http and https match.
    pub fn for_base_url(base_url: &str) -> Result<Self> {
        let trimmed = base_url.trim().trim_end_matches('/');
        let host = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .unwrap_or(trimmed);
        if host.is_empty() {
            bail!("documentation base url is empty");
        }
        let host = regex::escape(host);

        let titled = Regex::new(&format!(
            r"https?://{host}/display/[A-Za-z0-9]+/([^\]\s\)]+(?: [^\]\s\)]+)*)"
        ))
        .with_context(|| format!("failed to build titled link pattern for {base_url}"))?;
        let numeric = Regex::new(&format!(
            r"https?://{host}/pages/viewpage\.action\?pageId=(\d+)"
        ))
        .with_context(|| format!("failed to build page id pattern for {base_url}"))?;

        Ok(Self { titled, numeric })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteStats {
    pub resolved: usize,
    pub unresolved: usize,
}

impl RewriteStats {
    pub fn merge(&mut self, other: RewriteStats) {
        self.resolved += other.resolved;
        self.unresolved += other.unresolved;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    pub text: String,
    pub stats: RewriteStats,
}

// `consumed` counts bytes from the start of the match.
enum Resolution {
    Substitute { link: String, consumed: usize },
    Keep { consumed: usize },
}

#[derive(Debug, Clone)]
pub struct LinkRewriter<'a> {
    patterns: &'a LinkPatterns,
    resolver: ReferenceResolver<'a>,
}

impl<'a> LinkRewriter<'a> {
    pub fn new(patterns: &'a LinkPatterns, resolver: ReferenceResolver<'a>) -> Self {
        Self { patterns, resolver }
    }

    pub fn rewrite(&self, text: &str) -> Rewritten {
        let mut stats = RewriteStats::default();
        let titled = splice_matches(
            text,
            &self.patterns.titled,
            |captures| self.resolve_titled(captures),
            &mut stats,
        );
        let numeric = splice_matches(
            &titled,
            &self.patterns.numeric,
            |captures| self.resolve_page_id(captures),
            &mut stats,
        );
        Rewritten {
            text: strip_trailing_punctuation(&numeric),
            stats,
        }
    }

    // The segment may run into the rest of the sentence; the longest word
    // prefix that resolves wins.
    fn resolve_titled(&self, captures: &Captures<'_>) -> Resolution {
        let (Some(whole), Some(segment)) = (captures.get(0), captures.get(1)) else {
            return Resolution::Keep { consumed: 0 };
        };
        let prefix_len = segment.start() - whole.start();
        let segment = segment.as_str();

        let mut word_ends: Vec<usize> = segment.match_indices(' ').map(|(at, _)| at).collect();
        word_ends.push(segment.len());

        for &end in word_ends.iter().rev() {
            let (title, consumed) = trim_title(&segment[..end]);
            let title = decode_component(title).replace('+', " ").trim().to_string();
            if title.is_empty() {
                continue;
            }
            let reference = if has_html_extension(&title) {
                title
            } else {
                format!("{title}.html")
            };
            if let Some(path) = self.resolver.resolve(&reference) {
                return Resolution::Substitute {
                    link: local_file_reference(&path),
                    consumed: prefix_len + consumed,
                };
            }
        }
        Resolution::Keep {
            consumed: prefix_len + word_ends[0],
        }
    }

    fn resolve_page_id(&self, captures: &Captures<'_>) -> Resolution {
        let consumed = captures.get(0).map_or(0, |whole| whole.len());
        match self.resolver.resolve(&format!("{}.html", &captures[1])) {
            Some(path) => Resolution::Substitute {
                link: local_file_reference(&path),
                consumed,
            },
            None => Resolution::Keep { consumed },
        }
    }
}

pub fn rewrite_attachment_links(text: &str, attachment_root: &Path) -> Rewritten {
    let mut stats = RewriteStats::default();
    let text = splice_matches(
        text,
        &ATTACHMENT_LINK,
        |captures| {
            let consumed = captures.get(0).map_or(0, |whole| whole.len());
            let filename = decode_component(&captures[2]);
            let local_path = attachment_root.join(&captures[1]).join(filename);
            if local_path.is_file() {
                Resolution::Substitute {
                    link: local_file_reference(&local_path),
                    consumed,
                }
            } else {
                Resolution::Keep { consumed }
            }
        },
        &mut stats,
    );
    Rewritten { text, stats }
}

fn splice_matches<F>(text: &str, pattern: &Regex, resolve: F, stats: &mut RewriteStats) -> String
where
    F: Fn(&Captures<'_>) -> Resolution,
{
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    while let Some(captures) = pattern.captures_at(text, cursor) {
        let Some(whole) = captures.get(0) else {
            break;
        };
        out.push_str(&text[cursor..whole.start()]);
        let clamp = |consumed: usize| whole.start() + consumed.clamp(1, whole.len().max(1));
        match resolve(&captures) {
            Resolution::Substitute { link, consumed } => {
                out.push_str(&link);
                cursor = clamp(consumed);
                stats.resolved += 1;
            }
            Resolution::Keep { consumed } => {
                let end = clamp(consumed);
                out.push_str(&text[whole.start()..end]);
                cursor = end;
                stats.unresolved += 1;
            }
        }
    }
    out.push_str(&text[cursor..]);
    out
}

fn trim_title(candidate: &str) -> (&str, usize) {
    let cut = candidate.find(['#', '?']).unwrap_or(candidate.len());
    let title = candidate[..cut]
        .trim_end_matches(|ch: char| CLOSING_PUNCTUATION.contains(&ch) || SENTENCE_PUNCTUATION.contains(&ch));
    (title, title.len())
}

// A `]` or `)` that closes a bracket opened earlier on the line is kept.
fn strip_trailing_punctuation(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    for found in LOCAL_LINK.find_iter(text) {
        if found.start() < cursor {
            continue;
        }
        out.push_str(&text[cursor..found.end()]);
        cursor = found.end();

        let line_start = text[..found.start()].rfind('\n').map_or(0, |at| at + 1);
        let line_prefix = &text[line_start..found.start()];
        let mut open_brackets = unmatched(line_prefix, '[', ']');
        let mut open_parens = unmatched(line_prefix, '(', ')');

        for ch in text[cursor..].chars() {
            if !CLOSING_PUNCTUATION.contains(&ch) {
                break;
            }
            let keep = match ch {
                ']' if open_brackets > 0 => {
                    open_brackets -= 1;
                    true
                }
                ')' if open_parens > 0 => {
                    open_parens -= 1;
                    true
                }
                _ => false,
            };
            if keep {
                break;
            }
            cursor += ch.len_utf8();
        }
    }
    out.push_str(&text[cursor..]);
    out
}

fn unmatched(text: &str, open: char, close: char) -> usize {
    let mut depth = 0usize;
    for ch in text.chars() {
        if ch == open {
            depth += 1;
        } else if ch == close {
            depth = depth.saturating_sub(1);
        }
    }
    depth
}
