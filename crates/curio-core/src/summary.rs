use std::collections::HashSet;

use crate::turns::{ConversationTurn, TurnRole};

/// Character budgets for the context summary. Totals are characters, not
/// bytes, so truncation can never split a multi-byte sequence.
#[derive(Clone, Debug)]
pub struct SummaryBudget {
    pub total: usize,
    pub prior_summary: usize,
    pub recent_user: usize,
    pub recent_assistant: usize,
    pub older_line: usize,
}

impl Default for SummaryBudget {
    fn default() -> Self {
        Self {
            total: 1600,
            prior_summary: 800,
            recent_user: 380,
            recent_assistant: 380,
            older_line: 220,
        }
    }
}

/// Truncate to at most `max` characters.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

/// Condense a conversation into a bounded plain-text summary.
///
/// Layout, top to bottom: the prior summary (if any), older turns as
/// role-prefixed one-liners oldest to newest, then the recent window (last
/// two user turns and the last assistant turn) verbatim under their own
/// budgets. Duplicate texts are skipped. Pure: no I/O, no clock.
pub fn summarize(
    turns: &[ConversationTurn],
    prior_summary: Option<&str>,
    budget: &SummaryBudget,
) -> String {
    let kept: Vec<&ConversationTurn> =
        turns.iter().filter(|t| !t.text.trim().is_empty()).collect();

    // Recent window: indices of the last two user turns and last assistant turn.
    let mut recent: HashSet<usize> = HashSet::new();
    let mut users_found = 0;
    let mut assistant_found = false;
    for (i, t) in kept.iter().enumerate().rev() {
        match t.role {
            TurnRole::User if users_found < 2 => {
                recent.insert(i);
                users_found += 1;
            }
            TurnRole::Assistant if !assistant_found => {
                recent.insert(i);
                assistant_found = true;
            }
            _ => {}
        }
    }

    let mut seen: HashSet<String> = HashSet::new();
    let include = |text: &str, seen: &mut HashSet<String>| -> bool {
        let key = text.trim().to_string();
        if seen.contains(&key) {
            return false;
        }
        seen.insert(key);
        true
    };

    let mut recent_lines: Vec<String> = Vec::new();
    for (i, t) in kept.iter().enumerate() {
        if !recent.contains(&i) {
            continue;
        }
        if !include(&t.text, &mut seen) {
            continue;
        }
        let cap = match t.role {
            TurnRole::User => budget.recent_user,
            TurnRole::Assistant => budget.recent_assistant,
        };
        recent_lines.push(format!("{}: {}", t.role, truncate_chars(t.text.trim(), cap)));
    }

    let prior = prior_summary
        .map(|s| truncate_chars(s.trim(), budget.prior_summary))
        .filter(|s| !s.is_empty());

    // Spend what remains of the total budget on older turns. Newer older
    // turns win when space runs out, but output stays oldest to newest.
    let used: usize = prior.as_deref().map(|s| s.chars().count() + 1).unwrap_or(0)
        + recent_lines.iter().map(|l| l.chars().count() + 1).sum::<usize>();
    let mut remaining = budget.total.saturating_sub(used);

    let mut older_lines: Vec<String> = Vec::new();
    for (i, t) in kept.iter().enumerate().rev() {
        if recent.contains(&i) {
            continue;
        }
        if !include(&t.text, &mut seen) {
            continue;
        }
        let line = truncate_chars(&format!("{}: {}", t.role, t.text.trim()), budget.older_line);
        let cost = line.chars().count() + 1;
        if cost > remaining {
            break;
        }
        remaining -= cost;
        older_lines.push(line);
    }
    older_lines.reverse();

    let mut sections: Vec<String> = Vec::new();
    if let Some(p) = prior {
        sections.push(p);
    }
    sections.extend(older_lines);
    sections.extend(recent_lines);

    truncate_chars(sections.join("\n").trim_end(), budget.total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(text: &str) -> ConversationTurn {
        ConversationTurn::user(text, Utc::now())
    }

    fn assistant(text: &str) -> ConversationTurn {
        ConversationTurn::assistant(text, Utc::now())
    }

    #[test]
    fn empty_input_yields_empty_summary() {
        assert_eq!(summarize(&[], None, &SummaryBudget::default()), "");
    }

    #[test]
    fn whitespace_turns_skipped() {
        let turns = vec![user("   "), user("\n\t")];
        assert_eq!(summarize(&turns, None, &SummaryBudget::default()), "");
    }

    #[test]
    fn prior_summary_alone() {
        let out = summarize(&[], Some("Earlier: discussed Rust."), &SummaryBudget::default());
        assert_eq!(out, "Earlier: discussed Rust.");
    }

    #[test]
    fn recent_turns_are_role_prefixed() {
        let turns = vec![user("first question"), assistant("an answer"), user("second question")];
        let out = summarize(&turns, None, &SummaryBudget::default());
        assert!(out.contains("user: first question"));
        assert!(out.contains("assistant: an answer"));
        assert!(out.contains("user: second question"));
    }

    #[test]
    fn older_turns_become_one_liners_in_order() {
        let turns = vec![
            user("oldest question"),
            assistant("oldest answer"),
            user("middle question"),
            assistant("recent answer"),
            user("newest question"),
        ];
        let out = summarize(&turns, None, &SummaryBudget::default());
        // Last two user turns + last assistant are recent; the rest are older.
        let oldest_q = out.find("oldest question").unwrap();
        let oldest_a = out.find("oldest answer").unwrap();
        let newest = out.find("newest question").unwrap();
        assert!(oldest_q < oldest_a);
        assert!(oldest_a < newest);
    }

    #[test]
    fn duplicate_texts_skipped() {
        let turns = vec![user("same thing"), assistant("reply"), user("same thing")];
        let out = summarize(&turns, None, &SummaryBudget::default());
        assert_eq!(out.matches("same thing").count(), 1);
    }

    #[test]
    fn prior_summary_truncated_to_its_budget() {
        let long = "p".repeat(2000);
        let out = summarize(&[], Some(&long), &SummaryBudget::default());
        assert_eq!(out.chars().count(), 800);
    }

    #[test]
    fn recent_user_turn_truncated() {
        let long = format!("question {}", "x".repeat(1000));
        let turns = vec![user(&long)];
        let out = summarize(&turns, None, &SummaryBudget::default());
        // "user: " prefix plus a 380-char body
        assert_eq!(out.chars().count(), "user: ".len() + 380);
    }

    #[test]
    fn total_budget_is_hard_cap() {
        let turns: Vec<ConversationTurn> = (0..60)
            .map(|i| user(&format!("question number {i} with some padding text around it")))
            .collect();
        let out = summarize(&turns, Some(&"s".repeat(800)), &SummaryBudget::default());
        assert!(out.chars().count() <= 1600, "got {}", out.chars().count());
    }

    #[test]
    fn budget_cut_prefers_newer_older_turns() {
        let mut turns: Vec<ConversationTurn> = (0..40)
            .map(|i| user(&format!("older message {i} {}", "pad ".repeat(30))))
            .collect();
        turns.push(assistant("the last answer"));
        turns.push(user("the last question"));
        let out = summarize(&turns, None, &SummaryBudget::default());
        // The newest older turn that fits should be present rather than the oldest.
        assert!(out.contains("older message 38"), "newer older turns should win: {out}");
        assert!(!out.contains("older message 0 "), "oldest should be dropped first");
    }

    #[test]
    fn multibyte_text_truncates_cleanly() {
        let long = "日本語テキスト".repeat(100);
        let turns = vec![user(&long)];
        let out = summarize(&turns, None, &SummaryBudget::default());
        // Must be valid UTF-8 of bounded char length; would panic above if split.
        assert!(out.chars().count() <= "user: ".len() + 380);
    }

    #[test]
    fn only_assistant_turns() {
        let turns = vec![assistant("a1"), assistant("a2")];
        let out = summarize(&turns, None, &SummaryBudget::default());
        // Last assistant is recent; the other is an older line.
        assert!(out.contains("assistant: a1"));
        assert!(out.contains("assistant: a2"));
    }
}
