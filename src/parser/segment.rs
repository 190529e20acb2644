//! Split normalized lines into per-question content spans.
//!
//! Three strategies run in priority order; the first one that yields at
//! least one span (after dropping spans shorter than the configured minimum)
//! wins.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    NumericPrefix,
    QPrefix,
    StrictSequential,
}

impl Strategy {
    pub const ORDER: [Strategy; 3] = [
        Strategy::NumericPrefix,
        Strategy::QPrefix,
        Strategy::StrictSequential,
    ];

    fn run(self, lines: &[String]) -> Vec<ContentSpan> {
        match self {
            Strategy::NumericPrefix => numeric_prefix(lines),
            Strategy::QPrefix => q_prefix(lines),
            Strategy::StrictSequential => strict_sequential(lines),
        }
    }
}

/// Lines belonging to one detected question. The first line is whatever
/// followed the question marker.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentSpan {
    pub number: u32,
    pub lines: Vec<String>,
}

impl ContentSpan {
    fn new(number: u32, first: &str) -> Self {
        let lines = if first.trim().is_empty() {
            Vec::new()
        } else {
            vec![first.trim().to_string()]
        };
        Self { number, lines }
    }

    pub fn char_len(&self) -> usize {
        self.lines.iter().map(|l| l.chars().count()).sum()
    }
}

fn numeric_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "12." / "12)" but not "2.5 million"
    RE.get_or_init(|| Regex::new(r"^(\d+)\s*[.)]\s*(\D.*)?$").unwrap())
}

fn q_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:(?i:q(?:uestion)?)|प्रश्न)\s*\.?\s*(\d+)\s*[.):]?\s*(.*)$").unwrap()
    })
}

fn loose_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:(?:(?i:q(?:uestion)?)|प्रश्न)\s*\.?\s*)?(\d+)\s*[.):]?\s*(\D.*)$").unwrap()
    })
}

/// Generic marker split: every matching line opens a new span.
fn split_on(lines: &[String], marker: &Regex) -> Vec<ContentSpan> {
    let mut spans = Vec::new();
    let mut current: Option<ContentSpan> = None;

    for line in lines {
        let opened = marker.captures(line).and_then(|cap| {
            let number: u32 = cap.get(1)?.as_str().parse().ok()?;
            let rest = cap.get(2).map(|m| m.as_str()).unwrap_or("");
            Some(ContentSpan::new(number, rest))
        });

        if let Some(span) = opened {
            if let Some(done) = current.replace(span) {
                spans.push(done);
            }
        } else if let Some(span) = current.as_mut() {
            span.lines.push(line.clone());
        }
    }

    spans.extend(current);
    spans
}

/// Strategy 1: `<digits>.` or `<digits>)` at the start of a line.
pub fn numeric_prefix(lines: &[String]) -> Vec<ContentSpan> {
    split_on(lines, numeric_marker())
}

/// Strategy 2: `Q1`, `Q.1`, `Question 1`, `प्रश्न 1`.
pub fn q_prefix(lines: &[String]) -> Vec<ContentSpan> {
    split_on(lines, q_marker())
}

/// Strategy 3: a numbered line opens a question only when its number is
/// exactly one more than the previously accepted question, so years and
/// counts at the start of body lines stay in the body. The first numbered
/// line sets the starting number, which lets page extracts begin at 51.
pub fn strict_sequential(lines: &[String]) -> Vec<ContentSpan> {
    let mut spans = Vec::new();
    let mut current: Option<ContentSpan> = None;
    let mut expected: Option<u32> = None;

    for line in lines {
        let accepted = loose_marker().captures(line).and_then(|cap| {
            let number: u32 = cap.get(1)?.as_str().parse().ok()?;
            expected
                .map_or(true, |e| number == e)
                .then(|| ContentSpan::new(number, &cap[2]))
        });

        match accepted {
            Some(span) => {
                expected = Some(span.number + 1);
                if let Some(done) = current.replace(span) {
                    spans.push(done);
                }
            }
            None => {
                if let Some(span) = current.as_mut() {
                    span.lines.push(line.clone());
                }
            }
        }
    }

    spans.extend(current);
    spans
}

/// Run the strategy chain. Returns `None` when every strategy comes up empty.
pub fn segment(lines: &[String], min_span_chars: usize) -> Option<(Strategy, Vec<ContentSpan>)> {
    for strategy in Strategy::ORDER {
        let raw = strategy.run(lines);
        let found = raw.len();
        let spans: Vec<ContentSpan> = raw
            .into_iter()
            .filter(|s| s.char_len() >= min_span_chars)
            .collect();

        debug!(
            "Segmenter {:?}: {} candidate spans, {} kept",
            strategy,
            found,
            spans.len()
        );

        if !spans.is_empty() {
            return Some((strategy, spans));
        }
    }
    None
}
