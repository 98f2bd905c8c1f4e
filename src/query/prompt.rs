use crate::window::types::ScoredWindow;
use std::fmt::Write;

pub const NO_DATA_LINE: &str = "No relevant stream data found.";

/// Compose the generation prompt: instructions, the retrieved window
/// summaries best first, then the user's question.
pub fn build_rag_prompt(question: &str, windows: &[ScoredWindow]) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are an AI assistant specialized in analyzing streaming event data. ");
    prompt.push_str("Use the provided data from the event streams to answer the user's question. ");
    prompt.push_str(
        "If the answer is not in the provided data, state that you don't have enough information. ",
    );
    prompt.push_str("Do NOT make up information.\n\n");

    prompt.push_str("--- RELEVANT STREAM DATA ---\n");
    if windows.is_empty() {
        prompt.push_str(NO_DATA_LINE);
        prompt.push('\n');
    } else {
        for (i, hit) in windows.iter().enumerate() {
            let _ = writeln!(
                prompt,
                "--- Window {} (Stream: {}, ID: {}) ---",
                i + 1,
                hit.window.stream_key,
                hit.window.window_id
            );
            prompt.push_str(&hit.window.context_text);
            prompt.push_str("\n\n");
        }
    }
    prompt.push_str("--------------------------\n\n");

    let _ = writeln!(prompt, "USER QUESTION: {}", question);
    prompt
}
