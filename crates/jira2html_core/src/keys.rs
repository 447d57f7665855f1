use percent_encoding::percent_decode_str;

const HTML_EXTENSION: &str = ".html";

pub fn decode_component(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

pub fn strip_html_extension(value: &str) -> &str {
    if has_html_extension(value) {
        &value[..value.len() - HTML_EXTENSION.len()]
    } else {
        value
    }
}

pub fn has_html_extension(value: &str) -> bool {
    value.len() >= HTML_EXTENSION.len()
        && value.is_char_boundary(value.len() - HTML_EXTENSION.len())
        && value[value.len() - HTML_EXTENSION.len()..].eq_ignore_ascii_case(HTML_EXTENSION)
}

/// Reduce a filename or page title to its comparison key.
///
/// Steps run in this order: percent-decode, lower-case, drop the `.html`
/// suffix, then remove whitespace, `+`, `-`, `%`, ASCII and full-width
/// parentheses, `_` and `/`. The suffix is checked again after character
/// removal so that `normalize_key(normalize_key(x)) == normalize_key(x)`.
pub fn normalize_key(name: &str) -> String {
    let lowered = decode_component(name).to_lowercase();
    let stripped: String = strip_html_suffixes(&lowered)
        .chars()
        .filter(|ch| !is_ignored_key_char(*ch))
        .collect();
    strip_html_suffixes(&stripped).to_string()
}

fn strip_html_suffixes(value: &str) -> &str {
    let mut current = value;
    while has_html_extension(current) {
        current = strip_html_extension(current);
    }
    current
}

fn is_ignored_key_char(ch: char) -> bool {
    ch.is_whitespace() || matches!(ch, '+' | '-' | '%' | '(' | ')' | '（' | '）' | '_' | '/')
}
