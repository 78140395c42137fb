use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// Pattern matching ANSI escape sequences:
/// - CSI sequences: ESC [ ... (params) final_byte  (colors, cursor movement)
/// - OSC sequences: ESC ] ... ST  (hyperlinks, window titles)
/// - Character set designators: ESC ( B, ESC ) 0, etc.
/// - Simple two-byte escapes: ESC =, ESC >, ESC M, etc.
static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\x1b\[[0-9;?]*[ -/]*[@-~]",          // CSI sequences
        r"|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)", // OSC sequences (ST = BEL or ESC \)
        r"|\x1b[()][A-Z0-9]",                  // Character set designators
        r"|\x1b[^\[\]()0-9]",                  // Simple two-byte escapes
    ))
    .expect("ANSI regex must compile")
});

/// A regex deleted from every raw line before it reaches higher layers.
///
/// Prefiltering is a pure per-line transformation: it never changes line
/// numbering, only the bytes a line appears to contain.
#[derive(Debug, Clone)]
pub struct Prefilter {
    pattern: Regex,
}

impl Prefilter {
    pub fn new(pattern: Regex) -> Self {
        Self { pattern }
    }

    /// The stock prefilter installed by `hide_ansi_color_sequences`.
    pub fn ansi() -> Self {
        Self {
            pattern: ANSI_RE.clone(),
        }
    }

    pub fn apply<'a>(&self, line: &'a str) -> Cow<'a, str> {
        self.pattern.replace_all(line, "")
    }
}
