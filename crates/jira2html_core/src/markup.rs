use std::sync::LazyLock;

use anyhow::{Result, bail};
use regex::{Captures, Match, Regex};

use crate::keys::decode_component;

/// Converts issue markup into Markdown.
pub trait MarkupConverter {
    fn convert(&self, text: &str) -> Result<String>;
}

/// Jira wiki markup to CommonMark (with GFM tables and raw inline HTML for
/// formatting Markdown has no syntax for).
#[derive(Debug, Clone, Copy, Default)]
pub struct JiraWikiConverter;

impl MarkupConverter for JiraWikiConverter {
    fn convert(&self, text: &str) -> Result<String> {
        let normalized = text
            .replace("\r\n", "\n")
            .replace('\r', "\n")
            .replace([MASK_OPEN, MASK_CLOSE], "");
        let lines: Vec<&str> = normalized.lines().collect();
        let mut out = Emitter::default();
        convert_lines(&lines, &mut out)?;
        Ok(out.finish())
    }
}

const MASK_OPEN: char = '\u{E000}';
const MASK_CLOSE: char = '\u{E001}';

/// ASCII punctuation that can start Markdown syntax; escaped in plain text.
const MARKDOWN_SPECIAL: &[char] = &[
    '\\', '`', '*', '_', '{', '}', '[', ']', '<', '>', '(', ')', '#', '+', '-', '.', '!', '|',
    '~', '&', '=',
];

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^h([1-6])\.\s*(.*)$").expect("heading pattern"));

static LIST_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([*#]+|-)\s+(.*)$").expect("list item pattern"));

static RULE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-{4,}$").expect("rule pattern"));

static BLOCK_QUOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^bq\.\s+(.*)$").expect("bq pattern"));

static CODE_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{code(?::([^}]*))?\}(.*)$").expect("code pattern"));

static NOFORMAT_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{noformat(?::[^}]*)?\}(.*)$").expect("noformat pattern"));

static QUOTE_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{quote\}(.*)$").expect("quote pattern"));

static INLINE_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\{\{(?P<mono>.+?)\}\}",
        r"|\{color:(?P<color>[^}]*)\}(?P<colored>.*?)\{color\}",
        r"|(?P<stray>\{color(?::[^}]*)?\})",
        r"|\[(?P<label>[^\[\]|]*)\|(?P<target>[^\[\]]+?)\]",
        r"|\[(?P<bare>[^\[\]|]+)\]",
        r"|!(?P<image>[^!\s|]+\.[A-Za-z0-9]+)(?:\|[^!]*)?!",
        r#"|(?P<url>file:///[A-Za-z0-9%/._~-]*[A-Za-z0-9%/_~-]|(?:https?|ftp)://[^\s\[\]|<>"]+)"#,
    ))
    .expect("inline span pattern")
});

static CSS_COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#?[A-Za-z0-9]{1,32}$").expect("color pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Paragraph,
    List,
    Table,
    Block,
}

/// Collects Markdown lines, separating unlike blocks with a blank line.
#[derive(Debug, Default)]
struct Emitter {
    lines: Vec<String>,
    last: Option<Kind>,
    list_depth: usize,
}

impl Emitter {
    fn push(&mut self, kind: Kind, line: String) {
        if let Some(last) = self.last
            && (last != kind || kind == Kind::Block)
        {
            self.lines.push(String::new());
        }
        if kind != Kind::List {
            self.list_depth = 0;
        }
        self.lines.push(line);
        self.last = Some(kind);
    }

    fn push_block<I>(&mut self, kind: Kind, lines: I)
    where
        I: IntoIterator<Item = String>,
    {
        if self.last.is_some() {
            self.lines.push(String::new());
        }
        self.lines.extend(lines);
        self.last = Some(kind);
        self.list_depth = 0;
    }

    fn break_paragraph(&mut self) {
        if self.last.is_some() {
            self.lines.push(String::new());
        }
        self.last = None;
        self.list_depth = 0;
    }

    fn finish(mut self) -> String {
        while self.lines.last().is_some_and(String::is_empty) {
            self.lines.pop();
        }
        self.lines.join("\n")
    }
}

struct Delimited<'a> {
    body: Vec<&'a str>,
    trailing: &'a str,
    next: usize,
}

/// Collect the lines of a `{tag}...{tag}` block whose opening tag sits on
/// `lines[start]` and is followed by `first`.
fn take_delimited<'a>(
    lines: &[&'a str],
    start: usize,
    first: &'a str,
    close: &str,
) -> Result<Delimited<'a>> {
    if let Some(at) = first.find(close) {
        return Ok(Delimited {
            body: vec![&first[..at]],
            trailing: &first[at + close.len()..],
            next: start + 1,
        });
    }
    let mut body = Vec::new();
    if !first.trim().is_empty() {
        body.push(first);
    }
    for (offset, line) in lines[start + 1..].iter().enumerate() {
        if let Some(at) = line.find(close) {
            if !line[..at].trim().is_empty() {
                body.push(&line[..at]);
            }
            return Ok(Delimited {
                body,
                trailing: &line[at + close.len()..],
                next: start + offset + 2,
            });
        }
        body.push(line);
    }
    bail!("unterminated {close} block starting at line {}", start + 1)
}

fn convert_lines(lines: &[&str], out: &mut Emitter) -> Result<()> {
    let mut index = 0usize;
    while index < lines.len() {
        let line = lines[index].trim();

        if line.is_empty() {
            out.break_paragraph();
            index += 1;
            continue;
        }

        if let Some(captures) = CODE_OPEN.captures(line) {
            let language = captures.get(1).and_then(|params| code_language(params.as_str()));
            let first = captures.get(2).map_or("", |rest| rest.as_str());
            let block = take_delimited(lines, index, first, "{code}")?;
            out.push_block(Kind::Block, fenced(language.as_deref(), &block.body));
            convert_trailing(block.trailing, out)?;
            index = block.next;
            continue;
        }

        if let Some(captures) = NOFORMAT_OPEN.captures(line) {
            let first = captures.get(1).map_or("", |rest| rest.as_str());
            let block = take_delimited(lines, index, first, "{noformat}")?;
            out.push_block(Kind::Block, fenced(None, &block.body));
            convert_trailing(block.trailing, out)?;
            index = block.next;
            continue;
        }

        if let Some(captures) = QUOTE_OPEN.captures(line) {
            let first = captures.get(1).map_or("", |rest| rest.as_str());
            let block = take_delimited(lines, index, first, "{quote}")?;
            let mut inner = Emitter::default();
            convert_lines(&block.body, &mut inner)?;
            out.push_block(Kind::Block, quoted(&inner.finish()));
            convert_trailing(block.trailing, out)?;
            index = block.next;
            continue;
        }

        if let Some(captures) = HEADING.captures(line) {
            let level = captures[1].parse::<usize>().unwrap_or(1);
            out.push(
                Kind::Block,
                format!("{} {}", "#".repeat(level), convert_inline(&captures[2])),
            );
            index += 1;
            continue;
        }

        if let Some(captures) = BLOCK_QUOTE.captures(line) {
            out.push(Kind::Block, format!("> {}", convert_inline(&captures[1])));
            index += 1;
            continue;
        }

        if RULE.is_match(line) {
            out.push(Kind::Block, "---".to_string());
            index += 1;
            continue;
        }

        if let Some(captures) = LIST_ITEM.captures(line) {
            let markers = &captures[1];
            let previous = if out.last == Some(Kind::List) {
                out.list_depth
            } else {
                0
            };
            let depth = markers.chars().count().min(previous + 1);
            let bullet = if markers.ends_with('#') { "1." } else { "-" };
            let item = format!(
                "{}{bullet} {}",
                "    ".repeat(depth - 1),
                convert_inline(&captures[2])
            );
            out.push(Kind::List, item);
            out.list_depth = depth;
            index += 1;
            continue;
        }

        if line.starts_with('|') {
            let mut rows = Vec::new();
            while index < lines.len() && lines[index].trim().starts_with('|') {
                rows.push(lines[index].trim());
                index += 1;
            }
            out.push_block(Kind::Table, render_table(&rows));
            continue;
        }

        out.push(Kind::Paragraph, convert_inline(line));
        index += 1;
    }
    Ok(())
}

fn convert_trailing(trailing: &str, out: &mut Emitter) -> Result<()> {
    if trailing.trim().is_empty() {
        return Ok(());
    }
    convert_lines(&[trailing], out)
}

/// `{code:java}` and `{code:language=java|title=x}` both name a language;
/// `{code:title=x}` does not.
fn code_language(params: &str) -> Option<String> {
    params.split('|').find_map(|param| {
        let value = match param.split_once('=') {
            Some((name, value)) if name.trim().eq_ignore_ascii_case("language") => value,
            Some(_) => return None,
            None => param,
        };
        let language: String = value
            .trim()
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '+' | '#' | '-'))
            .collect();
        (!language.is_empty()).then_some(language)
    })
}

fn fenced(language: Option<&str>, body: &[&str]) -> Vec<String> {
    let longest = body
        .iter()
        .map(|line| longest_run(line, '`'))
        .max()
        .unwrap_or(0);
    let fence = "`".repeat(longest.max(2) + 1);
    let mut lines = Vec::with_capacity(body.len() + 2);
    lines.push(format!("{fence}{}", language.unwrap_or("")));
    lines.extend(body.iter().map(|line| line.to_string()));
    lines.push(fence);
    lines
}

fn quoted(markdown: &str) -> Vec<String> {
    if markdown.is_empty() {
        return vec![">".to_string()];
    }
    markdown
        .lines()
        .map(|line| {
            if line.is_empty() {
                ">".to_string()
            } else {
                format!("> {line}")
            }
        })
        .collect()
}

fn longest_run(text: &str, target: char) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for ch in text.chars() {
        if ch == target {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

fn render_table(rows: &[&str]) -> Vec<String> {
    let parsed: Vec<(bool, Vec<String>)> = rows
        .iter()
        .map(|row| (row.starts_with("||"), split_cells(row)))
        .collect();
    let columns = parsed
        .iter()
        .map(|(_, cells)| cells.len())
        .max()
        .unwrap_or(0)
        .max(1);

    let (header, body) = match parsed.split_first() {
        Some(((true, cells), rest)) => (cells.as_slice(), rest),
        _ => (&[] as &[String], parsed.as_slice()),
    };
    let mut lines = Vec::with_capacity(body.len() + 2);
    lines.push(table_row(header, columns));
    lines.push(format!("|{}", " --- |".repeat(columns)));
    lines.extend(body.iter().map(|(_, cells)| table_row(cells, columns)));
    lines
}

fn table_row(cells: &[String], columns: usize) -> String {
    let mut row = String::from("|");
    for column in 0..columns {
        let cell = cells
            .get(column)
            .map(|cell| escape_cell_pipes(&convert_inline(cell)))
            .unwrap_or_default();
        row.push(' ');
        row.push_str(&cell);
        row.push_str(" |");
    }
    row
}

/// Split a table row on `|` / `||` separators outside `[...]` and `{...}`.
fn split_cells(row: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut chars = row.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '[' | '{' => {
                depth += 1;
                current.push(ch);
            }
            ']' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            '|' if depth == 0 => {
                if chars.peek() == Some(&'|') {
                    chars.next();
                }
                cells.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    cells.push(current);
    if cells.first().is_some_and(|cell| cell.trim().is_empty()) {
        cells.remove(0);
    }
    if cells.last().is_some_and(|cell| cell.trim().is_empty()) {
        cells.pop();
    }
    cells.into_iter().map(|cell| cell.trim().to_string()).collect()
}

fn escape_cell_pipes(cell: &str) -> String {
    let mut escaped = String::with_capacity(cell.len());
    let mut previous = None;
    for ch in cell.chars() {
        if ch == '|' && previous != Some('\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
        previous = Some(ch);
    }
    escaped
}

/// Convert one line of inline markup. Links, images, monospace and color
/// spans are rendered first and masked so emphasis never reaches into them.
pub fn convert_inline(text: &str) -> String {
    let mut protected: Vec<String> = Vec::new();
    let mut masked = String::with_capacity(text.len());
    let mut cursor = 0usize;
    while let Some(captures) = INLINE_SPAN.captures_at(text, cursor) {
        let Some(whole) = captures.get(0) else {
            break;
        };
        masked.push_str(&text[cursor..whole.start()]);
        let (rendered, end) = render_span(&captures, whole);
        if let Some(rendered) = rendered {
            masked.push(MASK_OPEN);
            masked.push_str(&protected.len().to_string());
            masked.push(MASK_CLOSE);
            protected.push(rendered);
        }
        cursor = end;
    }
    masked.push_str(&text[cursor..]);

    let chars: Vec<char> = masked.chars().collect();
    let mut formatted = String::with_capacity(masked.len());
    format_range(&chars, &mut formatted);
    unmask(&formatted, &protected)
}

fn render_span(captures: &Captures<'_>, whole: Match<'_>) -> (Option<String>, usize) {
    if let Some(mono) = captures.name("mono") {
        return (Some(code_span(mono.as_str())), whole.end());
    }
    if let Some(color) = captures.name("color") {
        let inner = convert_inline(captures.name("colored").map_or("", |m| m.as_str()));
        let color = color.as_str().trim();
        let rendered = if CSS_COLOR.is_match(color) {
            format!(r#"<span style="color:{color}">{inner}</span>"#)
        } else {
            inner
        };
        return (Some(rendered), whole.end());
    }
    if captures.name("stray").is_some() {
        return (None, whole.end());
    }
    if let Some(target) = captures.name("target") {
        let target = target.as_str().trim();
        let label = captures.name("label").map_or("", |m| m.as_str().trim());
        let text = if label.is_empty() {
            escape_markdown(target)
        } else {
            convert_inline(label)
        };
        let rendered = if is_url_like(target) {
            format!("[{text}]({})", link_destination(target))
        } else {
            text
        };
        return (Some(rendered), whole.end());
    }
    if let Some(bare) = captures.name("bare") {
        let bare = bare.as_str().trim();
        let rendered = if is_url_like(bare) && !bare.contains(char::is_whitespace) {
            format!("<{bare}>")
        } else {
            escape_markdown(whole.as_str())
        };
        return (Some(rendered), whole.end());
    }
    if let Some(image) = captures.name("image") {
        let source = image.as_str();
        let name = source.rsplit('/').next().unwrap_or(source);
        let alt = escape_markdown(&decode_component(name));
        return (
            Some(format!("![{alt}]({})", link_destination(source))),
            whole.end(),
        );
    }
    if let Some(url) = captures.name("url") {
        let trimmed = url
            .as_str()
            .trim_end_matches(['.', ',', ';', ':', '!', '?']);
        return (
            Some(format!("<{trimmed}>")),
            url.start() + trimmed.len(),
        );
    }
    (Some(escape_markdown(whole.as_str())), whole.end())
}

fn is_url_like(target: &str) -> bool {
    target.contains("://") || target.starts_with("mailto:") || target.starts_with('#')
}

fn link_destination(target: &str) -> String {
    if target.contains(|ch: char| ch.is_whitespace() || matches!(ch, '(' | ')' | '<' | '>')) {
        format!("<{}>", target.replace(['<', '>'], ""))
    } else {
        target.to_string()
    }
}

fn code_span(content: &str) -> String {
    let fence = "`".repeat(longest_run(content, '`') + 1);
    format!("{fence} {content} {fence}")
}

fn format_tag(delimiter: char) -> Option<&'static str> {
    match delimiter {
        '*' => Some("strong"),
        '_' => Some("em"),
        '-' => Some("del"),
        '+' => Some("ins"),
        _ => None,
    }
}

fn format_range(chars: &[char], out: &mut String) {
    let mut index = 0usize;
    while index < chars.len() {
        let ch = chars[index];
        if let Some(tag) = format_tag(ch)
            && opens_at(chars, index)
            && let Some(close) = find_close(chars, index)
        {
            out.push_str(&format!("<{tag}>"));
            format_range(&chars[index + 1..close], out);
            out.push_str(&format!("</{tag}>"));
            index = close + 1;
            continue;
        }
        if MARKDOWN_SPECIAL.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
        index += 1;
    }
}

fn opens_at(chars: &[char], index: usize) -> bool {
    let delimiter = chars[index];
    let after_boundary = index == 0 || !chars[index - 1].is_alphanumeric();
    after_boundary
        && chars
            .get(index + 1)
            .is_some_and(|next| !next.is_whitespace() && *next != delimiter)
}

fn find_close(chars: &[char], open: usize) -> Option<usize> {
    let delimiter = chars[open];
    (open + 2..chars.len()).find(|&at| {
        chars[at] == delimiter
            && !chars[at - 1].is_whitespace()
            && chars.get(at + 1).is_none_or(|next| !next.is_alphanumeric())
    })
}

fn unmask(text: &str, protected: &[String]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != MASK_OPEN {
            out.push(ch);
            continue;
        }
        let digits: String = chars.by_ref().take_while(|ch| *ch != MASK_CLOSE).collect();
        if let Some(rendered) = digits.parse::<usize>().ok().and_then(|at| protected.get(at)) {
            out.push_str(rendered);
        }
    }
    out
}

pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if MARKDOWN_SPECIAL.contains(&ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::{JiraWikiConverter, MarkupConverter, convert_inline, escape_markdown};

    fn convert(text: &str) -> String {
        JiraWikiConverter.convert(text).expect("convert")
    }

    #[test]
    fn headings_become_atx_headings() {
        assert_eq!(convert("h1. Overview\nh3. Details"), "# Overview\n\n### Details");
    }

    #[test]
    fn inline_formatting_uses_html_tags() {
        assert_eq!(
            convert_inline("*bold* _it_ -gone- +new+"),
            "<strong>bold</strong> <em>it</em> <del>gone</del> <ins>new</ins>"
        );
        assert_eq!(convert_inline("*_both_*"), "<strong><em>both</em></strong>");
    }

    #[test]
    fn intraword_delimiters_are_literal() {
        assert_eq!(convert_inline("snake_case_name"), r"snake\_case\_name");
        assert_eq!(convert_inline("2024-03-01"), r"2024\-03\-01");
        assert_eq!(convert_inline("a * b * c"), r"a \* b \* c");
    }

    #[test]
    fn urls_are_protected_from_formatting() {
        assert_eq!(
            convert_inline("see file:///srv/docs/my_page_v2.html now"),
            r"see <file:///srv/docs/my_page_v2.html> now"
        );
        assert_eq!(
            convert_inline("go to https://example.com/a_b_c."),
            r"go to <https://example.com/a_b_c>\."
        );
    }

    #[test]
    fn links_with_labels_render_as_markdown_links() {
        assert_eq!(
            convert_inline("[VPN list|file:///srv/docs/VPN%20List.html] ok"),
            "[VPN list](file:///srv/docs/VPN%20List.html) ok"
        );
        assert_eq!(
            convert_inline("[https://example.com]"),
            "<https://example.com>"
        );
        assert_eq!(
            convert_inline("John Smith[~jhon]"),
            r"John Smith\[\~jhon\]"
        );
    }

    #[test]
    fn monospace_and_images() {
        assert_eq!(convert_inline("run {{make *all*}}"), "run ` make *all* `");
        assert_eq!(
            convert_inline("!file:///srv/att/42/shot.png|thumbnail!"),
            "![shot\\.png](file:///srv/att/42/shot.png)"
        );
    }

    #[test]
    fn color_spans_are_kept_and_invalid_colors_dropped() {
        assert_eq!(
            convert_inline("{color:#FF0000}alert{color}"),
            r#"<span style="color:#FF0000">alert</span>"#
        );
        assert_eq!(convert_inline("{color:red;x:y}text{color}"), "text");
        assert_eq!(convert_inline("{color:red}open"), "open");
    }

    #[test]
    fn code_blocks_become_fences_with_language() {
        let markdown = convert("Before\n{code:language=rust|title=x}\nfn main() {}\n{code}\nAfter");
        assert_eq!(markdown, "Before\n\n```rust\nfn main() {}\n```\n\nAfter");
        assert_eq!(convert("{noformat}a *b*{noformat}"), "```\na *b*\n```");
    }

    #[test]
    fn unterminated_blocks_are_errors() {
        assert!(JiraWikiConverter.convert("{code}\nlet x = 1;").is_err());
        assert!(JiraWikiConverter.convert("{quote}\nsaid").is_err());
    }

    #[test]
    fn quotes_and_rules() {
        assert_eq!(convert("{quote}\nh2. Said\nthis\n{quote}"), "> ## Said\n>\n> this");
        assert_eq!(convert("bq. short"), "> short");
        assert_eq!(convert("above\n----\nbelow"), "above\n\n---\n\nbelow");
    }

    #[test]
    fn nested_lists_indent_by_depth() {
        assert_eq!(
            convert("intro\n* one\n** one.a\n# numbered\ntext"),
            "intro\n\n- one\n    - one.a\n1. numbered\n\ntext"
        );
        assert_eq!(convert("*** orphan"), "- orphan");
    }

    #[test]
    fn tables_get_a_header_row() {
        assert_eq!(
            convert("||Name||Link||\n|VPN|[list|https://x.example/a]|"),
            "| Name | Link |\n| --- | --- |\n| VPN | [list](https://x.example/a) |"
        );
        assert_eq!(convert("|a|b|"), "|  |  |\n| --- | --- |\n| a | b |");
    }

    #[test]
    fn escape_markdown_escapes_syntax_characters() {
        assert_eq!(escape_markdown("# <b> & [x]"), r"\# \<b\> \& \[x\]");
    }
}
