use curio_core::provider::ChatMessage;
use curio_core::search::{ScrapedSource, SearchResult};
use curio_core::summary::truncate_chars;
use curio_core::turns::{ConversationTurn, TurnRole};
use curio_core::validate::ContextReference;

/// Characters of scraped page text included per source.
pub const SCRAPED_CONTENT_CHARS: usize = 1500;
/// Token budget for prior turns included verbatim in the request.
pub const HISTORY_TOKEN_BUDGET: usize = 1200;

pub const SYSTEM_PROMPT: &str = "\
You are a research assistant. Answer the user's latest message directly and \
concisely, grounded in the conversation and the web sources provided below.
When a statement comes from a web source, cite it inline with the source's \
domain in square brackets, like [example.com]. Cite only domains that appear \
in the sources. If the sources do not cover the question, say what is \
missing instead of guessing.";

/// Rough token count. Close enough for budgeting prompt sections.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4 + 1
}

/// Numbered source block for the request. Scraped page text is preferred
/// over the search snippet, truncated per source.
pub fn web_context_block(results: &[SearchResult], scraped: &[ScrapedSource]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            let (title, body) = match scraped.iter().find(|s| s.url == result.url) {
                Some(source) => (
                    source.title.as_str(),
                    truncate_chars(&source.content, SCRAPED_CONTENT_CHARS),
                ),
                None => (result.title.as_str(), result.snippet.clone()),
            };
            format!("{}. {} - {} (Link: {})", i + 1, title, body, result.url)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Everything the answer request is assembled from.
pub struct PromptInputs<'a> {
    pub context_summary: &'a str,
    pub results: &'a [SearchResult],
    pub scraped: &'a [ScrapedSource],
    pub history: &'a [ConversationTurn],
    pub latest_message: &'a str,
    pub references: &'a [ContextReference],
    pub active_query: Option<&'a str>,
}

/// Build the chat messages for the answer request.
///
/// The system message carries the instructions, the context summary, and the
/// web sources. Prior turns follow under a token budget (oldest dropped
/// first), and the latest message always goes in whole as the final user
/// message.
pub fn build_messages(inputs: &PromptInputs<'_>) -> Vec<ChatMessage> {
    let mut system = String::from(SYSTEM_PROMPT);

    if let Some(query) = inputs.active_query {
        system.push_str(&format!("\n\nThe web was searched for: \"{query}\"."));
    }
    if !inputs.context_summary.is_empty() {
        system.push_str(&format!(
            "\n\nConversation summary:\n{}",
            inputs.context_summary
        ));
    }
    if !inputs.references.is_empty() {
        let lines = inputs
            .references
            .iter()
            .map(|r| format!("- {} ({})", r.title, r.url))
            .collect::<Vec<_>>()
            .join("\n");
        system.push_str(&format!("\n\nThe user attached these references:\n{lines}"));
    }
    if !inputs.results.is_empty() {
        system.push_str(&format!(
            "\n\nWeb sources:\n{}",
            web_context_block(inputs.results, inputs.scraped)
        ));
    }

    let mut messages = vec![ChatMessage::system(system)];
    for turn in bounded_history(inputs.history, HISTORY_TOKEN_BUDGET) {
        messages.push(match turn.role {
            TurnRole::User => ChatMessage::user(turn.text.as_str()),
            TurnRole::Assistant => ChatMessage::assistant(turn.text.as_str()),
        });
    }
    messages.push(ChatMessage::user(inputs.latest_message));
    messages
}

/// Newest turns that fit the budget, returned oldest first.
fn bounded_history(history: &[ConversationTurn], budget: usize) -> Vec<&ConversationTurn> {
    let mut kept: Vec<&ConversationTurn> = Vec::new();
    let mut spent = 0usize;
    for turn in history.iter().rev() {
        let cost = estimate_tokens(&turn.text);
        if spent + cost > budget {
            break;
        }
        kept.push(turn);
        spent += cost;
    }
    kept.reverse();
    kept
}
