//! Collaborators used by the task executor: an object store that returns the
//! image bytes for a bucket/key pair, and an inference provider that turns an
//! image plus instruction prompt into a short text answer.

mod inference;
mod sigv4;
mod storage;

pub use inference::*;
pub use storage::*;

/// Instruction sent with every image.
pub const ANSWER_PROMPT: &str =
    "identify the multiple-choice answer(s) depicted and respond with only the choice(s).";

/// Empty values and the sample values shipped in `.env` templates count as unset.
pub fn is_placeholder_value(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("x")
        || trimmed.eq_ignore_ascii_case("placeholder")
        || trimmed.starts_with("YOUR_")
        || trimmed.ends_with("_HERE")
        || trimmed == "YourSuperSecretValueHere123!@#"
}

pub(crate) fn truncate_for_error(input: &str, max_len: usize) -> String {
    if input.len() <= max_len {
        return input.to_string();
    }
    let mut end = max_len;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &input[..end])
}
