//! Label normalization for matching a handler's preferred label to edge labels.

use std::sync::LazyLock;

use regex::Regex;

static ACCELERATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\[.\]\s*|.\)\s*|.\s*-\s*)").expect("accelerator pattern is valid")
});

/// Lowercase, trim, and strip one leading accelerator marker such as `[Y] `,
/// `Y) `, or `Y - `.
pub fn normalize_label(label: &str) -> String {
    let lowered = label.trim().to_lowercase();
    ACCELERATOR.replace(&lowered, "").trim().to_string()
}
