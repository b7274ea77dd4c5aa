//! Quote- and delimiter-aware line splitting.

/// Split `line` on any character of `delimiters`, except inside spans opened by `quote`.
///
/// Rules:
///
/// - Empty tokens between consecutive delimiters are kept so field positions stay stable.
/// - Quote characters are kept in the token; an unterminated quote runs to end of line.
/// - A trailing `\r` is dropped.
///
/// The line is scanned once and tokens borrow from it.
pub fn tokenize<'a>(line: &'a str, delimiters: &str, quote: Option<char>) -> Vec<&'a str> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let mut tokens = Vec::new();
    let mut start = 0usize;
    let mut quoted = false;

    for (idx, ch) in line.char_indices() {
        if Some(ch) == quote {
            quoted = !quoted;
        } else if !quoted && delimiters.contains(ch) {
            tokens.push(&line[start..idx]);
            start = idx + ch.len_utf8();
        }
    }
    tokens.push(&line[start..]);
    tokens
}
