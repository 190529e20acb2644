//! Raw extracted text → trimmed, non-empty lines.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

/// A run of text with its vertical position on the page, as produced by
/// positional text extractors (e.g. a browser-side PDF reader).
#[derive(Debug, Clone, Deserialize)]
pub struct TextFragment {
    #[serde(alias = "str")]
    pub text: String,
    pub y: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FragmentPage {
    #[serde(default)]
    pub fragments: Vec<TextFragment>,
}

fn page_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-{2,}\s*Page\s+\d+\s*-{2,}$").unwrap())
}

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// Split text into trimmed, whitespace-collapsed, non-empty lines.
/// Page separators (form feeds, `--- Page N ---` markers) are dropped.
pub fn normalize_lines(raw: &str) -> Vec<String> {
    raw.split(|c| c == '\n' || c == '\r' || c == '\u{000C}')
        .map(|line| whitespace().replace_all(line.trim(), " ").into_owned())
        .filter(|line| !line.is_empty() && !page_marker().is_match(line))
        .collect()
}

/// Rebuild lines from positioned fragments: a new line starts wherever the
/// vertical offset jumps by more than `threshold` between consecutive
/// fragments. Each page starts a new line.
pub fn lines_from_fragments(pages: &[FragmentPage], threshold: f32) -> Vec<String> {
    let mut text = String::new();

    for page in pages {
        let mut last_y: Option<f32> = None;
        for fragment in &page.fragments {
            if let Some(prev) = last_y {
                if (fragment.y - prev).abs() > threshold {
                    text.push('\n');
                } else if !text.ends_with(char::is_whitespace)
                    && !fragment.text.starts_with(char::is_whitespace)
                {
                    text.push(' ');
                }
            }
            text.push_str(&fragment.text);
            last_y = Some(fragment.y);
        }
        text.push('\u{000C}');
    }

    normalize_lines(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(text: &str, y: f32) -> TextFragment {
        TextFragment {
            text: text.to_string(),
            y,
        }
    }

    #[test]
    fn test_normalize_drops_blank_and_markers() {
        let raw = "  1.  What   is X?  \n\n--- Page 2 ---\r\n a) A \u{000C}b) B\n";
        assert_eq!(
            normalize_lines(raw),
            vec!["1. What is X?", "a) A", "b) B"]
        );
    }

    #[test]
    fn test_fragments_break_on_vertical_jump() {
        let pages = vec![
            FragmentPage {
                fragments: vec![
                    frag("1. Who wrote", 700.0),
                    frag("Gitanjali?", 700.5),
                    frag("a) Tagore", 680.0),
                    frag("b) Premchand", 665.0),
                ],
            },
            FragmentPage {
                fragments: vec![frag("c) Nirala", 700.0)],
            },
        ];
        assert_eq!(
            lines_from_fragments(&pages, 5.0),
            vec![
                "1. Who wrote Gitanjali?",
                "a) Tagore",
                "b) Premchand",
                "c) Nirala"
            ]
        );
    }

    #[test]
    fn test_fragment_accepts_str_alias() {
        let page: FragmentPage =
            serde_json::from_str(r#"{"fragments":[{"str":"Q1.","y":10.0}]}"#).unwrap();
        assert_eq!(page.fragments[0].text, "Q1.");
    }
}
