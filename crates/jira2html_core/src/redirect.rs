use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::keys::decode_component;

static META_REFRESH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta\s[^>]*http-equiv\s*=\s*["']?refresh["']?[^>]*?url\s*=\s*['"]?([^"'>]+)"#)
        .expect("meta refresh pattern")
});

static HTML_ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*"([^"]+\.html)(?:#[^"]*)?"[^>]*>(.*?)</a>"#)
        .expect("anchor pattern")
});

static ANY_ANCHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<a\s").expect("any anchor pattern"));

/// Whole-word forwarding phrases; "port forwarding" or "redirection rules" do
/// not count.
static PLACEHOLDER_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:redirect(?:s|ed|ing)?|forward(?:s|ed)?|forwarding\s+to|moved\s+to|has\s+moved)\b")
        .expect("placeholder marker pattern")
});

/// Bytes of text before the link that are searched for a placeholder marker.
const MARKER_WINDOW: usize = 160;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectOutcome {
    NotRedirect,
    Forwarded(PathBuf),
    MissingTarget(PathBuf),
    Unreadable,
}

/// A `<meta http-equiv="refresh" ... url=...>` directive takes priority over a
/// placeholder link ("Redirecting to <a href=...>"). A placeholder page holds
/// exactly one link. The target is URL-decoded and resolved relative to the
/// page's own directory.
pub fn detect_redirect(path: &Path) -> RedirectOutcome {
    let Ok(bytes) = fs::read(path) else {
        return RedirectOutcome::Unreadable;
    };
    let content = String::from_utf8_lossy(&bytes);
    let Some(target) = parse_forward_target(&content) else {
        return RedirectOutcome::NotRedirect;
    };

    let base = path.parent().unwrap_or_else(|| Path::new(""));
    let resolved = base.join(decode_component(&target));
    if resolved.is_file() {
        RedirectOutcome::Forwarded(resolved)
    } else {
        RedirectOutcome::MissingTarget(resolved)
    }
}

pub fn resolve_redirect(path: &Path) -> PathBuf {
    match detect_redirect(path) {
        RedirectOutcome::Forwarded(target) => target,
        _ => path.to_path_buf(),
    }
}

/// Follow up to `max_hops` forwarding hops, stopping at the first page that is
/// not a placeholder, a missing target, or a page already visited.
pub fn resolve_redirect_chain(path: &Path, max_hops: usize) -> PathBuf {
    let mut current = path.to_path_buf();
    let mut visited = HashSet::from([current.clone()]);
    for _ in 0..max_hops {
        let RedirectOutcome::Forwarded(next) = detect_redirect(&current) else {
            break;
        };
        if !visited.insert(next.clone()) {
            break;
        }
        current = next;
    }
    current
}

fn parse_forward_target(content: &str) -> Option<String> {
    if let Some(captures) = META_REFRESH.captures(content) {
        let target = strip_fragment(&captures[1]).trim();
        if !target.is_empty() {
            return Some(target.to_string());
        }
    }

    if ANY_ANCHOR.find_iter(content).count() != 1 {
        return None;
    }
    let captures = HTML_ANCHOR.captures(content)?;
    let whole = captures.get(0)?;
    let mut window_start = whole.start().saturating_sub(MARKER_WINDOW);
    while !content.is_char_boundary(window_start) {
        window_start -= 1;
    }
    let preceding = &content[window_start..whole.start()];
    if PLACEHOLDER_MARKER.is_match(&captures[2]) || PLACEHOLDER_MARKER.is_match(preceding) {
        Some(captures[1].trim().to_string())
    } else {
        None
    }
}

fn strip_fragment(target: &str) -> &str {
    target.find('#').map_or(target, |at| &target[..at])
}
