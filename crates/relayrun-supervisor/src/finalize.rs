//! Final textual result of a run.

use relayrun_worker_sdk::{ActionOutcome, RunHistory};

/// The text carried by the terminal event of a successful run.
///
/// The latest non-empty `done` outcome wins. Without one, every extracted
/// fragment of the history is joined in order, one per line.
pub fn final_result(history: &RunHistory) -> String {
    done_result(history)
        .map(str::to_string)
        .unwrap_or_else(|| joined_fragments(history))
}

fn done_result(history: &RunHistory) -> Option<&str> {
    history.items.iter().rev().find_map(|item| {
        item.results.iter().find_map(|outcome| match outcome {
            ActionOutcome::Done {
                extracted_content: Some(content),
            } if !content.is_empty() => Some(content.as_str()),
            _ => None,
        })
    })
}

fn joined_fragments(history: &RunHistory) -> String {
    history
        .items
        .iter()
        .flat_map(|item| item.results.iter())
        .filter_map(ActionOutcome::extracted_content)
        .filter(|content| !content.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
