use common::storage::types::message::{format_history, Message};

use crate::RetrievedChunk;

/// Assembles the generation prompt.
///
/// Section order is fixed: persona preamble, conversation history, retrieved
/// context (rank order, blank-line separated), the question, then the answer
/// cue. Reordering sections changes answer quality and is a breaking change.
pub fn build_prompt(
    system_context: &str,
    history: &[Message],
    context: &[RetrievedChunk],
    question: &str,
) -> String {
    let context_block = context
        .iter()
        .map(|chunk| chunk.text.as_str())
        .collect::<Vec<&str>>()
        .join("\n\n");

    format!(
        "{system_context}\n\
         Conversation history:\n\
         {history}\n\
         \n\
         External information:\n\
         {context_block}\n\
         \n\
         Question: {question}\n\
         Answer:",
        history = format_history(history),
    )
}
