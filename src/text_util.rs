/// Maximum number of characters in a source snippet before truncation.
pub const DEFAULT_SNIPPET_MAX_CHARS: usize = 350;

/// One-line preview of a chunk for display.
///
/// Runs of whitespace (newlines included) collapse to a single space. Text
/// longer than `max_chars` characters is cut on a character boundary and
/// gets a trailing `...`.
pub fn snippet(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            let mut out = collapsed[..cut].trim_end().to_string();
            out.push_str("...");
            out
        }
        None => collapsed,
    }
}

/// Indent every line of `text` by `width` spaces.
pub fn indent(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    text.lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{pad}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
