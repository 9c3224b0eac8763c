//! Unified-diff helpers shared by agent adapters and the runner.

/// Extracts a git-style unified diff from free-form agent output.
///
/// Takes everything from the first `diff --git` line to the end of the text.
/// Returns an empty string when no diff is present.
pub fn extract_patch(output: &str) -> String {
    let mut patch_lines: Vec<&str> = Vec::new();
    let mut in_patch = false;

    for line in output.lines() {
        if line.starts_with("diff --git") {
            in_patch = true;
        }
        if in_patch {
            patch_lines.push(line);
        }
    }

    if patch_lines.is_empty() {
        String::new()
    } else {
        patch_lines.join("\n")
    }
}

/// Whether a string plausibly is a git patch.
pub fn looks_like_patch(patch: &str) -> bool {
    let trimmed = patch.trim();
    if trimmed.is_empty() {
        return false;
    }
    trimmed.contains("diff --git") || trimmed.starts_with("---")
}
