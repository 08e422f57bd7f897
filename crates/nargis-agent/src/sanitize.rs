//! Normalisation for user- and model-provided text before it enters history

use std::sync::LazyLock;

use regex::Regex;

/// Default cap on sanitised text, in characters
pub const DEFAULT_MAX_CHARS: usize = 20_000;

/// Appended when text is cut at the cap
pub const TRUNCATION_MARKER: &str = "\n\n[output truncated]";

/// Tab, form feed, vertical tab and no-break space runs
static SPACING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\t\x0B\x0C\u{00A0}]+").unwrap());

static SPACE_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" {2,}").unwrap());

/// Heuristic for model output that is really a serialized object
static JSON_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)[{\[\]"]|\bchoices\b|\bmessage\b|\bcontent\b"#).unwrap());

/// Options for [`sanitize_text`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SanitizeOptions {
    /// Maximum characters kept before the truncation marker
    pub max_chars: usize,
    /// Remove `"`, `{`, `}`, `[` and `]`
    pub strip_json: bool,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
            strip_json: false,
        }
    }
}

impl SanitizeOptions {
    /// Defaults plus JSON punctuation stripping
    pub fn strip_json() -> Self {
        Self {
            strip_json: true,
            ..Self::default()
        }
    }
}

/// Strip control characters, collapse odd whitespace, and cap the length.
///
/// Tab, LF and CR survive the control filter; tabs are then folded into
/// single spaces along with other horizontal whitespace.
pub fn sanitize_text(input: &str, options: SanitizeOptions) -> String {
    let filtered: String = input
        .chars()
        .filter(|&c| matches!(c, '\t' | '\n' | '\r') || (c >= ' ' && c != '\u{7f}'))
        .collect();

    let spaced = SPACING.replace_all(&filtered, " ");
    let collapsed = SPACE_RUNS.replace_all(&spaced, " ");

    let mut text = match collapsed.char_indices().nth(options.max_chars) {
        Some((cut, _)) => format!("{}{}", &collapsed[..cut], TRUNCATION_MARKER),
        None => collapsed.into_owned(),
    };

    if options.strip_json {
        text.retain(|c| !matches!(c, '"' | '{' | '}' | '[' | ']'));
    }
    text
}

/// [`sanitize_text`] with default options
pub fn sanitize(input: &str) -> String {
    sanitize_text(input, SanitizeOptions::default())
}

/// Sanitise assistant text, stripping JSON punctuation when the result still
/// looks like a dumped object.
pub fn normalize_assistant_text(input: &str) -> String {
    let text = sanitize(input);
    if JSON_LIKE.is_match(&text) {
        sanitize_text(&text, SanitizeOptions::strip_json())
    } else {
        text
    }
}
