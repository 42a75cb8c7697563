//! Trims captured pane output down to the latest turn and strips trailing
//! tool noise before it is fingerprinted or sent for enrichment.

/// Line prefixes that mark a user turn in agent TUIs.
const PROMPT_MARKERS: &[&str] = &[">", "❯"];

/// Noise that agents keep printing after the real answer. Matched
/// case-insensitively; everything from the first hit onward is dropped.
const NOISE_MARKERS: &[&str] = &[
    "<system-reminder>",
    "[tool completed]",
    "background task completed",
    "⏺ task completed",
];

/// Full normalization: cut to the current turn, then strip noise.
pub fn normalize_output(raw: &str) -> String {
    strip_noise(&since_last_turn(raw)).to_string()
}

/// Everything from the second-to-last prompt line onward.
///
/// The last prompt is usually the empty one the agent is now idling on, so the
/// one before it is the command that produced this output. With fewer than two
/// prompt lines there is no earlier boundary and the input comes back as-is.
pub fn since_last_turn(raw: &str) -> String {
    let lines: Vec<&str> = raw.split('\n').collect();
    let prompt_lines: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| is_prompt_line(line))
        .map(|(idx, _)| idx)
        .collect();

    if prompt_lines.len() < 2 {
        return raw.to_string();
    }

    let start = prompt_lines[prompt_lines.len() - 2];
    lines[start..].join("\n")
}

/// Text preceding the first noise marker, or the input unchanged.
pub fn strip_noise(text: &str) -> &str {
    // ASCII lowering keeps byte offsets aligned with the original.
    let lowered = text.to_ascii_lowercase();
    let cut = NOISE_MARKERS
        .iter()
        .filter_map(|marker| lowered.find(&marker.to_ascii_lowercase()))
        .min();

    match cut {
        Some(idx) => &text[..idx],
        None => text,
    }
}

fn is_prompt_line(line: &str) -> bool {
    let trimmed = line.trim();
    PROMPT_MARKERS
        .iter()
        .any(|marker| trimmed.starts_with(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_output_since_second_to_last_prompt() {
        let raw = "> old\nold out\n> new\nnew out\n> ";
        assert_eq!(normalize_output(raw), "> new\nnew out\n> ");
    }

    #[test]
    fn single_prompt_is_unchanged() {
        let raw = "starting up\n> fix bug\nDone.";
        assert_eq!(since_last_turn(raw), raw);
    }

    #[test]
    fn empty_input_gives_empty_output() {
        assert_eq!(normalize_output(""), "");
    }

    #[test]
    fn indented_prompt_lines_count_as_markers() {
        let raw = "  ❯ first\nout\n  ❯ second\nmore\n❯";
        assert_eq!(since_last_turn(raw), "  ❯ second\nmore\n❯");
    }

    #[test]
    fn strips_noise_case_insensitively() {
        let text = "> run tests\nall green\n<System-Reminder>\nremember the todo list";
        assert_eq!(strip_noise(text), "> run tests\nall green\n");
    }

    #[test]
    fn cuts_at_earliest_noise_marker() {
        let text = "answer\n[Tool Completed]\nmore\n<system-reminder>";
        assert_eq!(strip_noise(text), "answer\n");
    }

    #[test]
    fn text_without_noise_is_unchanged() {
        assert_eq!(strip_noise("just output"), "just output");
    }

    #[test]
    fn noise_search_respects_multibyte_text() {
        let text = "résumé ✓\nBackground task completed: lint";
        assert_eq!(strip_noise(text), "résumé ✓\n");
    }
}
