//! Portable filename sanitization.

/// Longest filename produced, in characters.
pub const MAX_FILENAME_CHARS: usize = 100;

const REPLACEMENT: char = '!';

const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const WINDOWS_RESERVED: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Sanitizes a playlist filename so it is valid on Linux, macOS and Windows.
///
/// - Replaces reserved characters and control characters with `!`
/// - Collapses consecutive replacements
/// - Trims surrounding whitespace and trailing dots
/// - Suffixes Windows device names (`CON`, `NUL`, ...) with `!`
/// - Truncates to [`MAX_FILENAME_CHARS`] while keeping the extension
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_replacement = false;

    for c in name.chars() {
        if c.is_control() || RESERVED_CHARS.contains(&c) {
            if !prev_replacement {
                out.push(REPLACEMENT);
            }
            prev_replacement = true;
        } else {
            out.push(c);
            prev_replacement = false;
        }
    }

    let trimmed = out.trim().trim_end_matches('.');
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        return REPLACEMENT.to_string();
    }

    let mut result = trimmed.to_string();
    let stem = result.split('.').next().unwrap_or_default().to_ascii_lowercase();
    if WINDOWS_RESERVED.contains(&stem.as_str()) {
        result.push(REPLACEMENT);
    }

    truncate_keeping_extension(&result, MAX_FILENAME_CHARS)
}

fn truncate_keeping_extension(name: &str, max_chars: usize) -> String {
    if name.chars().count() <= max_chars {
        return name.to_string();
    }

    // Only treat short suffixes as an extension
    let extension = name
        .rfind('.')
        .map(|pos| &name[pos..])
        .filter(|ext| ext.chars().count() < max_chars / 2)
        .unwrap_or("");
    let stem_len = name.len() - extension.len();
    let keep = max_chars - extension.chars().count();

    let stem: String = name[..stem_len].chars().take(keep).collect();
    format!("{}{}", stem.trim_end(), extension)
}
