//! Heading-delimited sections
//!
//! A section starts at an ATX heading (`#` to `######`) and ends right
//! before the next heading of equal or shallower level, or at end of file.
//! Line numbers are 1-based; `end_line` is exclusive.

use serde::{Deserialize, Serialize};

use super::FencedLines;

/// One heading-delimited section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    /// Heading level, 1-6
    pub level: u8,
    /// Line of the heading itself
    pub start_line: usize,
    /// First line after the section
    pub end_line: usize,
}

fn parse_heading(line: &str) -> Option<(u8, String)> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let level = rest.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }

    let after = &rest[level..];
    if !after.is_empty() && !after.starts_with(' ') && !after.starts_with('\t') {
        return None;
    }

    let mut title = after.trim();
    // Optional closing sequence: "## Title ##"
    let stripped = title.trim_end_matches('#');
    if stripped.len() != title.len() && (stripped.is_empty() || stripped.ends_with(' ')) {
        title = stripped.trim_end();
    }

    Some((level as u8, title.to_string()))
}

/// Single linear scan for headings; returns sections in document order
pub fn parse_sections(content: &str) -> Vec<Section> {
    let mut headings: Vec<(u8, String, usize)> = Vec::new();
    let mut total_lines = 0;

    for line in FencedLines::new(content) {
        total_lines = line.number;
        if line.in_code {
            continue;
        }
        if let Some((level, title)) = parse_heading(line.text) {
            headings.push((level, title, line.number));
        }
    }

    let mut sections = Vec::with_capacity(headings.len());
    for (i, (level, title, start_line)) in headings.iter().enumerate() {
        let end_line = headings[i + 1..]
            .iter()
            .find(|(next_level, _, _)| next_level <= level)
            .map(|(_, _, line)| *line)
            .unwrap_or(total_lines + 1);

        sections.push(Section {
            title: title.clone(),
            level: *level,
            start_line: *start_line,
            end_line,
        });
    }

    sections
}

/// Find a section by title: exact match first, then ASCII case-insensitive
pub fn find_section<'a>(sections: &'a [Section], title: &str) -> Option<&'a Section> {
    let wanted = title.trim();
    sections
        .iter()
        .find(|s| s.title == wanted)
        .or_else(|| sections.iter().find(|s| s.title.eq_ignore_ascii_case(wanted)))
}

/// The text of `section` within `content`, heading line included
pub fn section_text<'a>(content: &'a str, section: &Section) -> &'a str {
    let mut start = None;
    let mut end = content.len();

    for line in FencedLines::new(content) {
        if line.number == section.start_line {
            start = Some(line.offset);
        }
        if line.number == section.end_line {
            end = line.offset;
            break;
        }
    }

    match start {
        Some(start) if start <= end => &content[start..end],
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "# Brief\nintro\n## Goals\ng1\n### Detail\nd1\n## Risks\nr1\n# Appendix\nx\n";

    #[test]
    fn test_parse_sections_nesting() {
        let sections = parse_sections(DOC);
        let summary: Vec<(&str, u8, usize, usize)> = sections
            .iter()
            .map(|s| (s.title.as_str(), s.level, s.start_line, s.end_line))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("Brief", 1, 1, 9),
                ("Goals", 2, 3, 7),
                ("Detail", 3, 5, 7),
                ("Risks", 2, 7, 9),
                ("Appendix", 1, 9, 11),
            ]
        );
    }

    #[test]
    fn test_heading_rules() {
        assert_eq!(parse_heading("## Title ##"), Some((2, "Title".into())));
        assert_eq!(parse_heading("#hashtag"), None);
        assert_eq!(parse_heading("####### seven"), None);
        assert_eq!(parse_heading("    # indented code"), None);
        assert_eq!(parse_heading("# C#"), Some((1, "C#".into())));
        assert_eq!(parse_heading("#"), Some((1, String::new())));
    }

    #[test]
    fn test_headings_in_code_fences_ignored() {
        let sections = parse_sections("# Real\n```\n# not a heading\n```\n");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].end_line, 5);
    }

    #[test]
    fn test_section_text() {
        let sections = parse_sections(DOC);
        let goals = find_section(&sections, "Goals").unwrap();
        assert_eq!(section_text(DOC, goals), "## Goals\ng1\n### Detail\nd1\n");

        let appendix = find_section(&sections, "appendix").unwrap();
        assert_eq!(section_text(DOC, appendix), "# Appendix\nx\n");
    }

    #[test]
    fn test_find_section_prefers_exact_match() {
        let content = "# notes\na\n# Notes\nb\n";
        let sections = parse_sections(content);
        assert_eq!(find_section(&sections, "Notes").unwrap().start_line, 3);
        assert_eq!(find_section(&sections, "NOTES").unwrap().start_line, 1);
        assert!(find_section(&sections, "Missing").is_none());
    }

    #[test]
    fn test_no_trailing_newline() {
        let content = "# A\nbody";
        let sections = parse_sections(content);
        assert_eq!(sections[0].end_line, 3);
        assert_eq!(section_text(content, &sections[0]), "# A\nbody");
    }
}
