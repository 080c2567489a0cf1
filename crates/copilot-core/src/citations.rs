//! Citation rendering for search answers.
//!
//! The backend marks sources inline as `<cite>SOURCE</cite>`. Each distinct
//! source gets a number in order of first appearance; markers are replaced by
//! that number and the sources are listed once, in number order, after the
//! answer. Numbering is local to a single call.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

const OPEN_TAG: &str = "<cite>";

static CITE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?cite>").expect("citation pattern compiles"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotated {
    pub markup: String,
    /// Sources in display order; entry `i` is cited as `i + 1`.
    pub references: Vec<String>,
}

#[derive(Debug, Default)]
struct CitationMap {
    indices: HashMap<String, usize>,
    order: Vec<String>,
}

impl CitationMap {
    fn index_of(&mut self, source: &str) -> usize {
        if let Some(&index) = self.indices.get(source) {
            return index;
        }
        self.order.push(source.to_string());
        let index = self.order.len();
        self.indices.insert(source.to_string(), index);
        index
    }
}

/// Each `</cite>` closes the nearest `<cite>` before it. An opener that is
/// followed by another opener, or by nothing, never closes and stays as text.
fn number_citations(answer: &str, marker: impl Fn(usize) -> String) -> (String, Vec<String>) {
    let mut map = CitationMap::default();
    let mut body = String::with_capacity(answer.len());
    let mut copied = 0;
    let mut open = None;

    for tag in CITE_TAG.find_iter(answer) {
        if tag.as_str() == OPEN_TAG {
            open = Some(tag.start());
            continue;
        }
        // A stray `</cite>` with nothing open is left alone
        if let Some(start) = open.take() {
            body.push_str(&answer[copied..start]);
            let source = &answer[start + OPEN_TAG.len()..tag.start()];
            body.push_str(&marker(map.index_of(source)));
            copied = tag.end();
        }
    }
    body.push_str(&answer[copied..]);

    (body, map.order)
}

/// Render an answer as HTML markup with numbered citation spans and a
/// references list.
///
/// The `<ol class="references">` block is always emitted, empty when the
/// answer cites nothing. Unterminated `<cite>` tags stay as literal text.
pub fn annotate(answer: &str) -> Annotated {
    let (body, references) =
        number_citations(answer, |index| format!(r#"<span class="citation">{}</span>"#, index));

    let mut markup = body;
    markup.push_str(r#"<br><br><ol class="references">"#);
    for source in &references {
        markup.push_str("<li>");
        markup.push_str(&escape_html(source));
        markup.push_str("</li>");
    }
    markup.push_str("</ol>");

    Annotated { markup, references }
}

/// Terminal rendering with the same numbering as [`annotate`]: `[n]` markers
/// and a `References:` list.
pub fn annotate_plain(answer: &str) -> String {
    let (mut text, references) = number_citations(answer, |index| format!("[{}]", index));

    text.push_str("\n\nReferences:\n");
    if references.is_empty() {
        text.push_str("  (none)\n");
    }
    for (i, source) in references.iter().enumerate() {
        text.push_str(&format!("  {}. {}\n", i + 1, source));
    }
    text
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
