//! Link and inclusion-directive extraction
//!
//! Recognized syntax (bit-exact):
//! - markdown link: `[text](target)`, optionally with a `"title"`
//! - inclusion: `{{include:relative/path}}`
//! - anchored inclusion: `{{include:relative/path#Section Title}}`
//!
//! Image embeds (`![alt](src)`) are not links.

use std::ops::Range;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::FencedLines;

/// A markdown link `[text](target)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRef {
    pub text: String,
    pub target: String,
    /// 1-based line number
    pub line_number: usize,
}

/// An inclusion directive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransclusionRef {
    pub target: String,
    /// Section title for anchored includes
    pub anchor: Option<String>,
    /// 1-based line number
    pub line_number: usize,
}

/// A directive together with the exact bytes it occupies in the content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveSpan {
    pub span: Range<usize>,
    pub reference: TransclusionRef,
}

/// Extracts links and inclusion directives from document text
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    link_re: Regex,
    include_re: Regex,
}

const LINK_PATTERN: &str = r#"\[([^\]\n]*)\]\(\s*<?([^)\s>]+)>?(?:\s+"[^"\n]*")?\s*\)"#;
const INCLUDE_PATTERN: &str = r"\{\{include:([^}#\n]+)(?:#([^}\n]+))?\}\}";

impl Default for LinkExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkExtractor {
    /// Compile the extractor's patterns
    pub fn new() -> Self {
        Self {
            link_re: Regex::new(LINK_PATTERN).expect("link pattern is valid"),
            include_re: Regex::new(INCLUDE_PATTERN).expect("include pattern is valid"),
        }
    }

    /// All markdown links outside fenced code blocks, in document order
    pub fn parse_links(&self, content: &str) -> Vec<LinkRef> {
        let mut links = Vec::new();

        for line in FencedLines::new(content).filter(|l| !l.in_code) {
            for caps in self.link_re.captures_iter(line.text) {
                let whole = match caps.get(0) {
                    Some(m) => m,
                    None => continue,
                };
                if line.text[..whole.start()].ends_with('!') {
                    continue;
                }
                links.push(LinkRef {
                    text: caps[1].to_string(),
                    target: caps[2].to_string(),
                    line_number: line.number,
                });
            }
        }

        links
    }

    /// All inclusion directives outside fenced code blocks, in document order
    pub fn parse_transclusions(&self, content: &str) -> Vec<TransclusionRef> {
        self.directive_spans(content)
            .into_iter()
            .map(|d| d.reference)
            .collect()
    }

    /// Directives with their byte ranges, for in-place substitution
    pub fn directive_spans(&self, content: &str) -> Vec<DirectiveSpan> {
        let mut spans = Vec::new();

        for line in FencedLines::new(content).filter(|l| !l.in_code) {
            for caps in self.include_re.captures_iter(line.text) {
                let whole = match caps.get(0) {
                    Some(m) => m,
                    None => continue,
                };
                let target = caps[1].trim();
                if target.is_empty() {
                    continue;
                }
                let anchor = caps
                    .get(2)
                    .map(|a| a.as_str().trim().to_string())
                    .filter(|a| !a.is_empty());

                spans.push(DirectiveSpan {
                    span: (line.offset + whole.start())..(line.offset + whole.end()),
                    reference: TransclusionRef {
                        target: target.to_string(),
                        anchor,
                        line_number: line.number,
                    },
                });
            }
        }

        spans
    }
}
