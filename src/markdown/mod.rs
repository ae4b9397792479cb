//! Markdown structure extraction
//!
//! Single linear scans over document text:
//! - links `[text](target)` and inclusion directives `{{include:target}}`
//!   / `{{include:target#Section Title}}` (`links`)
//! - heading-delimited sections (`sections`)
//!
//! Fenced code blocks are opaque to every scan, so a directive quoted in a
//! code sample is never expanded and never creates a graph edge.

mod links;
mod sections;

pub use links::{DirectiveSpan, LinkExtractor, LinkRef, TransclusionRef};
pub use sections::{find_section, parse_sections, section_text, Section};

/// Iterates lines with 1-based numbers and byte offsets, flagging lines
/// that sit inside (or open/close) a fenced code block.
pub(crate) struct FencedLines<'a> {
    content: &'a str,
    offset: usize,
    line_number: usize,
    fence: Option<(char, usize)>,
}

/// One line yielded by `FencedLines`
pub(crate) struct ScannedLine<'a> {
    pub text: &'a str,
    pub number: usize,
    pub offset: usize,
    pub in_code: bool,
}

impl<'a> FencedLines<'a> {
    pub(crate) fn new(content: &'a str) -> Self {
        Self {
            content,
            offset: 0,
            line_number: 0,
            fence: None,
        }
    }
}

fn fence_marker(line: &str) -> Option<(char, usize)> {
    let trimmed = line.trim_start();
    if line.len() - trimmed.len() > 3 {
        return None;
    }
    let marker = trimmed.chars().next()?;
    if marker != '`' && marker != '~' {
        return None;
    }
    let run = trimmed.chars().take_while(|c| *c == marker).count();
    if run >= 3 {
        Some((marker, run))
    } else {
        None
    }
}

impl<'a> Iterator for FencedLines<'a> {
    type Item = ScannedLine<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.content.len() {
            return None;
        }

        let rest = &self.content[self.offset..];
        let (raw, advance) = match rest.find('\n') {
            Some(pos) => (&rest[..pos], pos + 1),
            None => (rest, rest.len()),
        };
        let text = raw.strip_suffix('\r').unwrap_or(raw);

        self.line_number += 1;
        let offset = self.offset;
        self.offset += advance;

        let in_code = match (self.fence, fence_marker(text)) {
            (None, Some(opening)) => {
                self.fence = Some(opening);
                true
            }
            (Some((marker, len)), Some((m, l))) if m == marker && l >= len => {
                self.fence = None;
                true
            }
            (Some(_), _) => true,
            (None, None) => false,
        };

        Some(ScannedLine {
            text,
            number: self.line_number,
            offset,
            in_code,
        })
    }
}

/// Token estimate used for budget bookkeeping: one token per four chars
pub fn estimate_tokens(content: &str) -> u64 {
    let chars = content.chars().count() as u64;
    (chars + 3) / 4
}

/// Resolve a reference target found in `source` to a project-relative
/// document name.
///
/// - `/path` is relative to the managed root
/// - anything else is relative to the directory of `source`
/// - `#fragment` suffixes are dropped
/// - external targets (`scheme://`, `mailto:`) and pure anchors yield `None`
/// - targets that climb above the root yield `None`
pub fn resolve_target(source: &str, target: &str) -> Option<String> {
    let target = target.trim();
    let without_fragment = match target.find('#') {
        Some(pos) => &target[..pos],
        None => target,
    };

    if without_fragment.is_empty()
        || without_fragment.contains("://")
        || without_fragment.starts_with("mailto:")
    {
        return None;
    }

    let joined = match without_fragment.strip_prefix('/') {
        Some(root_relative) => root_relative.to_string(),
        None => match source.rfind('/') {
            Some(pos) => format!("{}/{}", &source[..pos], without_fragment),
            None => without_fragment.to_string(),
        },
    };

    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
