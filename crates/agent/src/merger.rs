//! Folding follow-up instructions into a task description.

pub const MERGE_HEADER: &str = "ADDITIONAL INSTRUCTIONS:";

/// Combine the current task with pending and new instruction fragments, in
/// the order they were received. Blank fragments are dropped.
///
/// Without an original task the merged text is just the fragments.
pub fn merge(original: Option<&str>, pending: &[String], new_instruction: &str) -> String {
    let fragments: Vec<&str> = pending
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(new_instruction))
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect();

    let original = original.map(str::trim).filter(|t| !t.is_empty());

    match (original, fragments.is_empty()) {
        (Some(task), true) => task.to_string(),
        (Some(task), false) => format!("{}\n\n{}\n{}", task, MERGE_HEADER, fragments.join("\n")),
        (None, _) => fragments.join("\n"),
    }
}
