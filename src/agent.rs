//! The primary decision-making agent.
//!
//! Stateless: the orchestrator assembles all needed context from the
//! managers each turn and the agent returns a single game command. The
//! response protocol is free-form reasoning followed by a line starting
//! with `ACTION:`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::llm::{ChatMessage, ChatRequest, Completion, LlmClient};
use crate::world::{CallMetric, Item, MapSummary, Puzzle, Room, Suggestion};

const GAME_AGENT_PROMPT: &str = "You are an expert text adventure player. Analyse the game \
state, reason briefly about the best next move, and end your response with a single line of \
the form ACTION: <command>. The command must be a plain game command such as 'north', \
'take lamp', or 'unlock door with key'. If the move is dangerous or you are unsure it is \
safe, say so in your reasoning.";

const REMINDER: &str = "Your previous response did not contain an ACTION: line. Reply again, \
ending with exactly one line of the form ACTION: <command>.";

/// Reasoning keywords that flag a decision as worth a precautionary save.
const RISK_KEYWORDS: &[&str] = &["risky", "dangerous", "uncertain", "might die", "could kill"];

/// Everything the game agent sees for one decision.
#[derive(Debug, Default)]
pub struct DecisionContext {
    pub game_output: String,
    pub room: Option<Room>,
    pub inventory: Vec<Item>,
    pub room_items: Vec<Item>,
    pub map_summary: Option<MapSummary>,
    pub open_puzzles: Vec<Puzzle>,
    pub suggestions: Vec<Suggestion>,
    /// Recent (command, outcome) pairs, oldest first.
    pub recent_actions: Vec<(String, String)>,
    pub special_instructions: String,
    /// Puzzle location -> path of direction commands.
    pub navigation_hints: HashMap<String, Vec<String>>,
    /// Nearest room with unexplored exits and the path to it.
    pub nearest_unexplored: Option<(String, Vec<String>)>,
}

/// A parsed decision.
#[derive(Debug, Clone)]
pub struct Decision {
    pub command: String,
    pub reasoning: String,
    /// The agent's own reasoning suggests the move may be fatal.
    pub risky: bool,
}

/// Primary decision-making agent for gameplay.
pub struct GameAgent {
    llm: Arc<dyn LlmClient>,
    llm_timeout: Duration,
    last_metric: Option<CallMetric>,
}

impl GameAgent {
    pub fn new(llm: Arc<dyn LlmClient>, llm_timeout: Duration) -> Self {
        Self {
            llm,
            llm_timeout,
            last_metric: None,
        }
    }

    /// Decide the next command.
    ///
    /// Returns None when the model times out or fails to produce an
    /// `ACTION:` line even after one reminder; the orchestrator then falls
    /// back to the top puzzle suggestion, or `look`.
    pub async fn decide(&mut self, context: &DecisionContext, turn: u32) -> Option<Decision> {
        let message = build_context_message(context);
        let mut request = ChatRequest::new(GAME_AGENT_PROMPT)
            .with_message(ChatMessage::user(message))
            .with_temperature(0.7)
            .with_max_tokens(1024);

        for attempt in 0..2 {
            let completion = match timeout(self.llm_timeout, self.llm.complete(request.clone())).await
            {
                Ok(Ok(completion)) => completion,
                Ok(Err(err)) => {
                    tracing::warn!(%err, "game agent call failed");
                    return None;
                }
                Err(_) => {
                    tracing::warn!("game agent call timed out");
                    return None;
                }
            };
            self.record_metric(&completion, turn);

            if let Some((command, reasoning)) = parse_action(&completion.text) {
                let lowered = reasoning.to_lowercase();
                let risky = RISK_KEYWORDS.iter().any(|k| lowered.contains(k));
                tracing::info!(%command, risky, "game agent decided");
                return Some(Decision {
                    command,
                    reasoning,
                    risky,
                });
            }

            tracing::warn!(attempt, "game agent response missing ACTION: line");
            request = request
                .with_message(ChatMessage::assistant(completion.text))
                .with_message(ChatMessage::user(REMINDER));
        }
        None
    }

    fn record_metric(&mut self, completion: &Completion, turn: u32) {
        self.last_metric = Some(CallMetric {
            game_id: 0,
            turn_number: turn,
            agent_name: "game_agent".to_string(),
            provider: self.llm.provider_name().to_string(),
            model: self.llm.model().to_string(),
            input_tokens: completion.usage.input_tokens,
            output_tokens: completion.usage.output_tokens,
            cached_tokens: completion.usage.cached_tokens,
            cost_estimate: completion.cost_estimate,
            latency_ms: completion.latency_ms,
        });
    }

    /// Metrics from the most recent call, if any.
    pub fn take_last_metric(&mut self) -> Option<CallMetric> {
        self.last_metric.take()
    }
}

/// Split a response into (command, reasoning) at the last `ACTION:` marker
/// (case-insensitive).
fn parse_action(response: &str) -> Option<(String, String)> {
    const MARKER: &str = "ACTION:";
    let mut index = None;
    for i in 0..=response.len().saturating_sub(MARKER.len()) {
        if let Some(window) = response.get(i..i + MARKER.len()) {
            if window.eq_ignore_ascii_case(MARKER) {
                index = Some(i);
            }
        }
    }
    let index = index?;
    let command = response[index + MARKER.len()..]
        .lines()
        .next()
        .unwrap_or("")
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .to_string();
    if command.is_empty() {
        return None;
    }
    let reasoning = response[..index].trim().to_string();
    Some((command, reasoning))
}

/// Format the context into the structured text message the agent reads.
fn build_context_message(context: &DecisionContext) -> String {
    let mut parts = Vec::new();

    if !context.special_instructions.is_empty() {
        parts.push(format!("== IMPORTANT ==\n{}\n", context.special_instructions));
    }

    parts.push(format!("== LATEST GAME OUTPUT ==\n{}\n", context.game_output));

    if let Some(room) = &context.room {
        let mut section = format!("== CURRENT ROOM ==\nName: {}\n", room.name);
        if !room.description.is_empty() {
            section.push_str(&format!("Description: {}\n", room.description));
        }
        if !room.exits.is_empty() {
            let exits: Vec<String> = room
                .exits
                .iter()
                .map(|(dir, dest)| format!("{} -> {}", dir, dest.as_deref().unwrap_or("???")))
                .collect();
            section.push_str(&format!("Exits: {}\n", exits.join(", ")));
        }
        if room.is_dark {
            section.push_str("WARNING: This room is dark!\n");
        }
        section.push_str(&format!("Visits: {}\n", room.visit_count));
        parts.push(section);
    }

    if context.inventory.is_empty() {
        parts.push("== INVENTORY ==\nEmpty\n".to_string());
    } else {
        let names: Vec<&str> = context.inventory.iter().map(|i| i.name.as_str()).collect();
        parts.push(format!(
            "== INVENTORY ({} items) ==\n{}\n",
            names.len(),
            names.join(", ")
        ));
    }

    if !context.room_items.is_empty() {
        let names: Vec<&str> = context.room_items.iter().map(|i| i.name.as_str()).collect();
        parts.push(format!("== ITEMS HERE ==\n{}\n", names.join(", ")));
    }

    if let Some(summary) = &context.map_summary {
        parts.push(format!(
            "== MAP ==\nRooms explored: {} / {}\nUnexplored exits: {}\n",
            summary.rooms_visited, summary.rooms_total, summary.unexplored_count
        ));
    }

    if !context.open_puzzles.is_empty() {
        let lines: Vec<String> = context
            .open_puzzles
            .iter()
            .map(|p| {
                let mut line = format!("- [{}] {} (at {})", p.status, p.description, p.location);
                if !p.attempts.is_empty() {
                    line.push_str(&format!(" [{} attempts]", p.attempts.len()));
                }
                line
            })
            .collect();
        parts.push(format!(
            "== OPEN PUZZLES ({}) ==\n{}\n",
            context.open_puzzles.len(),
            lines.join("\n")
        ));
    }

    if !context.suggestions.is_empty() {
        let mut lines = Vec::new();
        for suggestion in &context.suggestions {
            lines.push(format!(
                "- [{:?}] {}: {}",
                suggestion.confidence, suggestion.description, suggestion.proposed_action
            ));
            if !suggestion.items_to_use.is_empty() {
                lines.push(format!("  Items: {}", suggestion.items_to_use.join(", ")));
            }
            if !suggestion.navigation.is_empty() {
                lines.push(format!("  Route: {}", suggestion.navigation.join(", ")));
            }
        }
        parts.push(format!("== PUZZLE SUGGESTIONS ==\n{}\n", lines.join("\n")));
    }

    if !context.navigation_hints.is_empty() {
        let lines: Vec<String> = context
            .navigation_hints
            .iter()
            .map(|(dest, path)| format!("- {}: {}", dest, path.join(", ")))
            .collect();
        parts.push(format!("== ROUTES TO PUZZLES ==\n{}\n", lines.join("\n")));
    }

    if let Some((room, path)) = &context.nearest_unexplored {
        if path.is_empty() {
            parts.push(format!("== NEAREST UNEXPLORED ==\n{room} (here)\n"));
        } else {
            parts.push(format!(
                "== NEAREST UNEXPLORED ==\n{} via {}\n",
                room,
                path.join(", ")
            ));
        }
    }

    if !context.recent_actions.is_empty() {
        let lines: Vec<String> = context
            .recent_actions
            .iter()
            .rev()
            .take(10)
            .rev()
            .map(|(cmd, result)| {
                let short: String = result.chars().take(100).collect();
                format!("> {cmd}\n  {short}")
            })
            .collect();
        parts.push(format!("== RECENT ACTIONS ==\n{}\n", lines.join("\n")));
    }

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action_basic() {
        let (command, reasoning) = parse_action(
            "The troll blocks the way and I have a sword.\nACTION: attack troll with sword",
        )
        .unwrap();
        assert_eq!(command, "attack troll with sword");
        assert!(reasoning.contains("troll"));
    }

    #[test]
    fn test_parse_action_case_insensitive_and_quoted() {
        let (command, _) = parse_action("I'll look first.\naction: \"look\"").unwrap();
        assert_eq!(command, "look");
    }

    #[test]
    fn test_parse_action_missing() {
        assert!(parse_action("I think I should go north.").is_none());
        assert!(parse_action("ACTION:").is_none());
    }

    #[test]
    fn test_parse_action_uses_last_marker() {
        let (command, _) =
            parse_action("Maybe ACTION: north? No, on reflection:\nACTION: south").unwrap();
        assert_eq!(command, "south");
    }
}
