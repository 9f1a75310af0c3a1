//! Script section location and extraction
//!
//! MATLAB scripts delimit sections with lines whose trimmed form starts
//! with `%%`. `locate` splits source text into contiguous, ordered,
//! closed line ranges; a file with no markers is one section titled
//! "Main". Pure functions, no filesystem access.

use crate::models::SectionInfo;

/// Two-character section marker opening a new section
const SECTION_MARKER: &str = "%%";

/// Fallback title for unmarked leading content and marker-free files
const DEFAULT_TITLE: &str = "Main";

/// Split source text into ordered sections.
///
/// Any input, including empty, yields at least one section; empty input
/// yields a single zero-length section spanning line 0.
pub fn locate(source: &str) -> Vec<SectionInfo> {
    let lines: Vec<&str> = source.lines().collect();

    if lines.is_empty() {
        return vec![SectionInfo {
            title: DEFAULT_TITLE.to_string(),
            start_line: 0,
            end_line: 0,
            preview: String::new(),
        }];
    }

    let mut ranges: Vec<(usize, usize, String)> = Vec::new();
    let mut current_start = 0usize;
    let mut current_title = DEFAULT_TITLE.to_string();

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with(SECTION_MARKER) {
            if current_start < i {
                ranges.push((current_start, i - 1, current_title.clone()));
            }
            current_start = i;
            current_title = trimmed[SECTION_MARKER.len()..].trim().to_string();
        }
    }
    ranges.push((current_start, lines.len() - 1, current_title));

    ranges
        .into_iter()
        .map(|(start, end, title)| SectionInfo {
            preview: preview_line(&lines[start..=end]),
            title,
            start_line: start,
            end_line: end,
        })
        .collect()
}

/// First non-comment, non-blank line of a section
fn preview_line(lines: &[&str]) -> String {
    lines
        .iter()
        .map(|line| line.trim())
        .find(|trimmed| !trimmed.is_empty() && !trimmed.starts_with('%'))
        .unwrap_or("")
        .to_string()
}

/// Extract the closed line range `[start_line, end_line]` from source
/// text. When `maintain_workspace` is false, a workspace-clear directive
/// is prepended so the section runs from a clean slate. Out-of-range
/// bounds are clamped.
pub fn extract(
    source: &str,
    start_line: usize,
    end_line: usize,
    maintain_workspace: bool,
) -> String {
    let lines: Vec<&str> = source.lines().collect();

    let mut code = String::new();
    if !maintain_workspace {
        code.push_str("clear;\n");
    }

    if start_line < lines.len() {
        let end = end_line.min(lines.len() - 1);
        for line in &lines[start_line..=end] {
            code.push_str(line);
            code.push('\n');
        }
    }

    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_no_markers_single_main_section() {
        let source = "x = 1;\ny = 2;\nplot(x, y)\n";
        let sections = locate(source);

        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].title, "Main");
        assert_eq!(sections[0].start_line, 0);
        assert_eq!(sections[0].end_line, 2);
        assert_eq!(sections[0].preview, "x = 1;");
    }

    #[test]
    fn test_empty_source_single_zero_length_section() {
        let sections = locate("");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].title, "Main");
        assert_eq!(sections[0].start_line, 0);
        assert_eq!(sections[0].end_line, 0);
        assert_eq!(sections[0].preview, "");
    }

    #[test]
    fn test_marked_sections_with_leading_main() {
        let source = "a = 1;\n%% Load data\ndata = load('x.mat');\n%% Plot\nplot(data)\n";
        let sections = locate(source);

        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].title, "Main");
        assert_eq!((sections[0].start_line, sections[0].end_line), (0, 0));
        assert_eq!(sections[1].title, "Load data");
        assert_eq!((sections[1].start_line, sections[1].end_line), (1, 2));
        assert_eq!(sections[1].preview, "data = load('x.mat');");
        assert_eq!(sections[2].title, "Plot");
        assert_eq!((sections[2].start_line, sections[2].end_line), (3, 4));
    }

    #[test]
    fn test_marker_on_first_line_has_no_main_section() {
        let source = "%% Setup\nx = 1;\n";
        let sections = locate(source);

        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].title, "Setup");
        assert_eq!(sections[0].start_line, 0);
    }

    #[test]
    fn test_indented_marker_recognized() {
        let source = "x = 1;\n  %% Indented\ny = 2;\n";
        let sections = locate(source);

        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].title, "Indented");
    }

    #[test]
    fn test_consecutive_markers_yield_single_line_sections() {
        let source = "%% One\n%% Two\nx = 1;\n";
        let sections = locate(source);

        assert_eq!(sections.len(), 2);
        assert_eq!((sections[0].start_line, sections[0].end_line), (0, 0));
        assert_eq!(sections[0].preview, "");
        assert_eq!((sections[1].start_line, sections[1].end_line), (1, 2));
    }

    #[test]
    fn test_preview_skips_comments_and_blanks() {
        let source = "%% Analysis\n% comment line\n\nresult = compute();\n";
        let sections = locate(source);
        assert_eq!(sections[0].preview, "result = compute();");
    }

    #[test]
    fn test_extract_closed_range() {
        let source = "a\nb\nc\nd\n";
        assert_eq!(extract(source, 1, 2, true), "b\nc\n");
    }

    #[test]
    fn test_extract_prepends_clear_when_not_maintaining() {
        let source = "x = 1;\ny = 2;\n";
        let code = extract(source, 0, 1, false);
        assert!(code.starts_with("clear;\n"));
        assert!(code.ends_with("y = 2;\n"));
    }

    #[test]
    fn test_extract_clamps_out_of_range() {
        let source = "a\nb\n";
        assert_eq!(extract(source, 1, 99, true), "b\n");
        assert_eq!(extract(source, 5, 9, true), "");
    }

    #[test]
    fn test_located_section_roundtrips_preview() {
        let source = "before = 0;\n%% Stage one\n% setup comment\nx = rand(10);\n%% Stage two\ny = x';\n";
        for section in locate(source) {
            let code = extract(source, section.start_line, section.end_line, true);
            let relocated = locate(&code);
            assert_eq!(relocated.len(), 1);
            assert_eq!(relocated[0].preview, section.preview);
        }
    }

    proptest! {
        #[test]
        fn prop_markerless_text_is_one_main_section(
            lines in proptest::collection::vec("[a-z0-9 =;]{0,20}", 1..40)
        ) {
            let source = lines.join("\n");
            let sections = locate(&source);

            prop_assert_eq!(sections.len(), 1);
            prop_assert_eq!(&sections[0].title, "Main");
            prop_assert_eq!(sections[0].start_line, 0);
            prop_assert_eq!(sections[0].end_line, source.lines().count().max(1) - 1);
        }

        #[test]
        fn prop_marked_text_is_contiguous_and_covering(
            leading in proptest::collection::vec("[a-z0-9 =;]{0,16}", 0..4),
            blocks in proptest::collection::vec(
                ("[A-Za-z ]{1,12}", proptest::collection::vec("[a-z0-9 =;]{0,16}", 0..5)),
                1..8
            )
        ) {
            let mut lines: Vec<String> = leading.clone();
            for (title, body) in &blocks {
                lines.push(format!("%% {title}"));
                lines.extend(body.iter().cloned());
            }
            let source = lines.join("\n");
            let sections = locate(&source);

            let expected = blocks.len() + usize::from(!leading.is_empty());
            prop_assert_eq!(sections.len(), expected);

            prop_assert_eq!(sections[0].start_line, 0);
            for pair in sections.windows(2) {
                prop_assert_eq!(pair[1].start_line, pair[0].end_line + 1);
            }
            prop_assert_eq!(
                sections.last().unwrap().end_line,
                source.lines().count() - 1
            );
        }
    }
}
