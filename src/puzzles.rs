//! Puzzle tracking and stuck detection.
//!
//! Keeps the open-puzzle list, runs a throttled cross-reference evaluation
//! against inventory through the puzzle agent, and detects stuck behaviour
//! every turn without any model call.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::timeout;

use crate::error::JournalResult;
use crate::journal::Journal;
use crate::llm::{ChatMessage, ChatRequest, Completion, LlmClient};
use crate::world::{
    normalize_id, CallMetric, Confidence, Item, MapSummary, Puzzle, PuzzleAttempt, PuzzleStatus,
    Room, Suggestion,
};

const PUZZLE_AGENT_PROMPT: &str = "You analyse text adventure state for puzzles: locked doors, \
blocked paths, cryptic inscriptions, NPC demands, conditional refusals. Cross-reference open \
puzzles against the inventory and known items and suggest concrete actions, rating each \
suggestion high, medium, or low confidence. Also report which open puzzles the latest output \
shows to be solved. Never invent puzzles the text does not support.";

/// Keywords that mark an output fingerprint as a failure response.
const FAILURE_KEYWORDS: &[&str] = &[
    "can't",
    "cannot",
    "won't",
    "doesn't",
    "nothing happens",
    "not possible",
];

/// Result of one evaluation pass.
#[derive(Debug, Default)]
pub struct Evaluation {
    pub new_puzzles: Vec<Puzzle>,
    pub suggestions: Vec<Suggestion>,
    pub solved_ids: Vec<i64>,
}

/// Tracks puzzles for a game session.
pub struct PuzzleTracker {
    llm: Arc<dyn LlmClient>,
    llm_timeout: Duration,
    eval_interval: u32,
    attempt_threshold: usize,

    puzzles: BTreeMap<i64, Puzzle>,
    next_id: i64,

    // Evaluation triggers, cleared when an evaluation runs.
    new_room: bool,
    inventory_changed: bool,
    failed_action: bool,

    /// Last stuck signature emitted, for idempotency.
    last_stuck_signature: Option<String>,
    /// Turn of the most recent new-item or new-puzzle event.
    last_progress_turn: u32,

    dirty: HashSet<i64>,
    last_metric: Option<CallMetric>,
}

impl PuzzleTracker {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        llm_timeout: Duration,
        eval_interval: u32,
        attempt_threshold: usize,
    ) -> Self {
        Self {
            llm,
            llm_timeout,
            eval_interval: eval_interval.max(1),
            attempt_threshold,
            puzzles: BTreeMap::new(),
            next_id: 1,
            new_room: false,
            inventory_changed: false,
            failed_action: false,
            last_stuck_signature: None,
            last_progress_turn: 0,
            dirty: HashSet::new(),
            last_metric: None,
        }
    }

    // ------------------------------------------------------------------
    // Triggers & throttling
    // ------------------------------------------------------------------

    pub fn note_new_room(&mut self) {
        self.new_room = true;
    }

    pub fn note_inventory_changed(&mut self) {
        self.inventory_changed = true;
    }

    pub fn note_failed_action(&mut self) {
        self.failed_action = true;
    }

    /// Record forward progress (new item or new puzzle) for the
    /// room-cycling stuck check.
    pub fn note_progress(&mut self, turn: u32) {
        self.last_progress_turn = self.last_progress_turn.max(turn);
    }

    /// Whether the full cross-reference evaluation should run this turn.
    pub fn should_evaluate(&self, turn: u32) -> bool {
        turn % self.eval_interval == 0 || self.new_room || self.inventory_changed || self.failed_action
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Run the puzzle agent over the latest state: detect new puzzles,
    /// generate suggestions for open ones, and notice solved ones.
    ///
    /// Agent failures and timeouts degrade to an empty evaluation.
    #[allow(clippy::too_many_arguments)]
    pub async fn evaluate(
        &mut self,
        game_output: &str,
        current_room: Option<&Room>,
        inventory: &[&Item],
        all_items: &[&Item],
        map_summary: &MapSummary,
        recent_actions: &[(String, String)],
        turn: u32,
    ) -> Evaluation {
        let message = self.build_evaluation_message(
            game_output,
            current_room,
            inventory,
            all_items,
            map_summary,
            recent_actions,
        );
        let schema = json!({
            "type": "object",
            "properties": {
                "new_puzzles": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "description": {"type": "string"},
                            "location": {"type": "string"},
                            "related_items": {"type": "array", "items": {"type": "string"}}
                        },
                        "required": ["description", "location"]
                    }
                },
                "suggestions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "puzzle_id": {"type": "integer"},
                            "description": {"type": "string"},
                            "proposed_action": {"type": "string"},
                            "items_to_use": {"type": "array", "items": {"type": "string"}},
                            "confidence": {"type": "string", "enum": ["high", "medium", "low"]}
                        },
                        "required": ["puzzle_id", "description", "proposed_action", "confidence"]
                    }
                },
                "solved_puzzle_ids": {
                    "type": "array",
                    "items": {"type": "integer"}
                }
            },
            "required": ["new_puzzles", "suggestions", "solved_puzzle_ids"]
        });
        let request = ChatRequest::new(PUZZLE_AGENT_PROMPT)
            .with_message(ChatMessage::user(message))
            .with_temperature(0.5)
            .with_max_tokens(1024);

        // Flags are consumed by this evaluation whatever its outcome.
        self.new_room = false;
        self.inventory_changed = false;
        self.failed_action = false;

        let parsed = match timeout(self.llm_timeout, self.llm.complete_json(request, &schema)).await
        {
            Ok(Ok((value, completion))) => {
                self.record_metric(&completion, turn);
                value
            }
            Ok(Err(err)) => {
                tracing::warn!(%err, "puzzle agent call failed, skipping evaluation");
                return Evaluation::default();
            }
            Err(_) => {
                tracing::warn!("puzzle agent call timed out, skipping evaluation");
                return Evaluation::default();
            }
        };

        let mut evaluation = Evaluation::default();
        let room_id = current_room.map(|r| r.room_id.as_str()).unwrap_or("unknown");

        if let Some(new_puzzles) = parsed.get("new_puzzles").and_then(Value::as_array) {
            for entry in new_puzzles {
                let Some(description) = entry.get("description").and_then(Value::as_str) else {
                    continue;
                };
                let location = entry
                    .get("location")
                    .and_then(Value::as_str)
                    .unwrap_or(room_id);
                let related: Vec<String> = entry
                    .get("related_items")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(Value::as_str)
                            .map(normalize_id)
                            .collect()
                    })
                    .unwrap_or_default();
                let puzzle = self.open_puzzle(description, location, related, turn);
                tracing::info!(puzzle_id = puzzle.puzzle_id, description, "new puzzle detected");
                evaluation.new_puzzles.push(puzzle);
            }
        }

        if let Some(suggestions) = parsed.get("suggestions").and_then(Value::as_array) {
            for entry in suggestions {
                let Some(puzzle_id) = entry.get("puzzle_id").and_then(Value::as_i64) else {
                    continue;
                };
                // Suggestions must reference puzzles that exist.
                let Some(puzzle) = self.puzzles.get(&puzzle_id) else {
                    continue;
                };
                let confidence = match entry.get("confidence").and_then(Value::as_str) {
                    Some("high") => Confidence::High,
                    Some("low") => Confidence::Low,
                    _ => Confidence::Medium,
                };
                evaluation.suggestions.push(Suggestion {
                    puzzle_id,
                    description: entry
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    proposed_action: entry
                        .get("proposed_action")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    items_to_use: entry
                        .get("items_to_use")
                        .and_then(Value::as_array)
                        .map(|a| a.iter().filter_map(Value::as_str).map(normalize_id).collect())
                        .unwrap_or_default(),
                    confidence,
                    navigation: Vec::new(),
                    deprioritized: puzzle.attempts.len() > self.attempt_threshold,
                });
            }
        }
        // High confidence first; stale puzzles last.
        evaluation
            .suggestions
            .sort_by_key(|s| (s.deprioritized, s.confidence));

        if let Some(solved) = parsed.get("solved_puzzle_ids").and_then(Value::as_array) {
            for id in solved.iter().filter_map(Value::as_i64) {
                if self.mark_solved(id, turn) {
                    evaluation.solved_ids.push(id);
                }
            }
        }

        if !evaluation.new_puzzles.is_empty() {
            self.note_progress(turn);
        }
        evaluation
    }

    fn build_evaluation_message(
        &self,
        game_output: &str,
        current_room: Option<&Room>,
        inventory: &[&Item],
        all_items: &[&Item],
        map_summary: &MapSummary,
        recent_actions: &[(String, String)],
    ) -> String {
        let mut parts = Vec::new();
        parts.push(format!("== LATEST GAME OUTPUT ==\n{game_output}\n"));

        if let Some(room) = current_room {
            parts.push(format!(
                "== CURRENT ROOM ==\nID: {}\nName: {}\nDescription: {}\n",
                room.room_id, room.name, room.description
            ));
        }

        if inventory.is_empty() {
            parts.push("== INVENTORY ==\nEmpty\n".to_string());
        } else {
            let lines: Vec<String> = inventory
                .iter()
                .map(|i| format!("- {} ({})", i.name, i.item_id))
                .collect();
            parts.push(format!("== INVENTORY ==\n{}\n", lines.join("\n")));
        }

        let elsewhere: Vec<String> = all_items
            .iter()
            .filter(|i| i.location != crate::world::ItemLocation::Inventory)
            .take(30)
            .map(|i| format!("- {} ({}) at {}", i.name, i.item_id, i.location))
            .collect();
        if !elsewhere.is_empty() {
            parts.push(format!("== KNOWN ITEMS ==\n{}\n", elsewhere.join("\n")));
        }

        let open = self.open_puzzles();
        if open.is_empty() {
            parts.push("== OPEN PUZZLES ==\nNone\n".to_string());
        } else {
            let mut lines = Vec::new();
            for puzzle in &open {
                let mut line = format!(
                    "- [ID:{}] {} (at {})",
                    puzzle.puzzle_id, puzzle.description, puzzle.location
                );
                if !puzzle.attempts.is_empty() {
                    let attempts: Vec<String> = puzzle
                        .attempts
                        .iter()
                        .rev()
                        .take(3)
                        .map(|a| format!("{} -> {}", a.action, a.result))
                        .collect();
                    line.push_str(&format!("\n  Recent attempts: {}", attempts.join("; ")));
                }
                if !puzzle.related_items.is_empty() {
                    line.push_str(&format!(
                        "\n  Related items: {}",
                        puzzle.related_items.join(", ")
                    ));
                }
                lines.push(line);
            }
            parts.push(format!(
                "== OPEN PUZZLES ({}) ==\n{}\n",
                open.len(),
                lines.join("\n")
            ));
        }

        parts.push(format!(
            "== MAP ==\nRooms: {} visited / {} total\nUnexplored exits: {}\n",
            map_summary.rooms_visited, map_summary.rooms_total, map_summary.unexplored_count
        ));

        if !recent_actions.is_empty() {
            let lines: Vec<String> = recent_actions
                .iter()
                .rev()
                .take(8)
                .rev()
                .map(|(cmd, result)| {
                    let short: String = result.chars().take(80).collect();
                    format!("> {cmd}\n  {short}")
                })
                .collect();
            parts.push(format!("== RECENT ACTIONS ==\n{}\n", lines.join("\n")));
        }

        parts.join("\n")
    }

    // ------------------------------------------------------------------
    // Puzzle lifecycle
    // ------------------------------------------------------------------

    /// Create a new open puzzle and return a copy of it.
    pub fn open_puzzle(
        &mut self,
        description: &str,
        location: &str,
        related_items: Vec<String>,
        turn: u32,
    ) -> Puzzle {
        let id = self.next_id;
        self.next_id += 1;
        let mut puzzle = Puzzle::new(id, description, location, turn);
        puzzle.related_items = related_items;
        self.puzzles.insert(id, puzzle.clone());
        self.dirty.insert(id);
        puzzle
    }

    /// Record a failed attempt; the puzzle moves to in-progress.
    pub fn record_attempt(&mut self, puzzle_id: i64, action: &str, result: &str, turn: u32) {
        if let Some(puzzle) = self.puzzles.get_mut(&puzzle_id) {
            puzzle.attempts.push(PuzzleAttempt {
                action: action.to_string(),
                result: result.to_string(),
                turn,
            });
            if puzzle.status == PuzzleStatus::Open {
                puzzle.status = PuzzleStatus::InProgress;
            }
            self.dirty.insert(puzzle_id);
        } else {
            tracing::warn!(puzzle_id, "attempt recorded against unknown puzzle");
        }
    }

    /// Mark a puzzle solved. Returns false for unknown or already-solved
    /// puzzles.
    pub fn mark_solved(&mut self, puzzle_id: i64, turn: u32) -> bool {
        match self.puzzles.get_mut(&puzzle_id) {
            Some(puzzle) if puzzle.status.is_open() => {
                puzzle.status = PuzzleStatus::Solved;
                puzzle.solved_turn = Some(turn.max(puzzle.created_turn));
                self.dirty.insert(puzzle_id);
                tracing::info!(puzzle_id, turn, "puzzle solved");
                true
            }
            Some(_) => false,
            None => {
                tracing::warn!(puzzle_id, "cannot solve unknown puzzle");
                false
            }
        }
    }

    /// Abandon a puzzle.
    pub fn abandon(&mut self, puzzle_id: i64) {
        if let Some(puzzle) = self.puzzles.get_mut(&puzzle_id) {
            puzzle.status = PuzzleStatus::Abandoned;
            self.dirty.insert(puzzle_id);
        }
    }

    pub fn get_puzzle(&self, puzzle_id: i64) -> Option<&Puzzle> {
        self.puzzles.get(&puzzle_id)
    }

    /// Open and in-progress puzzles, freshest-effort first: puzzles past
    /// the attempt threshold sort last.
    pub fn open_puzzles(&self) -> Vec<&Puzzle> {
        let mut open: Vec<&Puzzle> = self
            .puzzles
            .values()
            .filter(|p| p.status.is_open())
            .collect();
        open.sort_by_key(|p| (p.attempts.len() > self.attempt_threshold, p.puzzle_id));
        open
    }

    /// Item ids related to any open puzzle, for maze marker exclusion.
    pub fn open_related_items(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .puzzles
            .values()
            .filter(|p| p.status.is_open())
            .flat_map(|p| p.related_items.iter().cloned())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    // ------------------------------------------------------------------
    // Stuck detection (no model call)
    // ------------------------------------------------------------------

    /// Algorithmic stuck detection, run every turn.
    ///
    /// Emits at most one suggestion per distinct stuck pattern: repeating
    /// the same signature returns None until the pattern changes.
    pub fn detect_stuck(
        &mut self,
        recent_actions: &[(String, String)],
        recent_rooms: &[String],
        turn: u32,
    ) -> Option<String> {
        if recent_actions.is_empty() {
            return None;
        }
        let (signature, message) = self.find_stuck_pattern(recent_actions, recent_rooms, turn)?;
        if self.last_stuck_signature.as_deref() == Some(signature.as_str()) {
            return None;
        }
        tracing::warn!(%signature, "stuck behaviour detected");
        self.last_stuck_signature = Some(signature);
        Some(message)
    }

    fn find_stuck_pattern(
        &self,
        recent_actions: &[(String, String)],
        recent_rooms: &[String],
        turn: u32,
    ) -> Option<(String, String)> {
        // Check 1: the same command issued 3+ times in the last 10 turns.
        let window: Vec<&(String, String)> = recent_actions.iter().rev().take(10).collect();
        let mut command_counts: HashMap<&str, usize> = HashMap::new();
        for (cmd, _) in window.iter() {
            *command_counts.entry(cmd.as_str()).or_default() += 1;
        }
        for (cmd, count) in &command_counts {
            if *count >= 3 {
                return Some((
                    format!("repeat-command:{cmd}"),
                    format!(
                        "You have been repeating the command '{cmd}' frequently. \
                         Try a completely different approach or explore a new area."
                    ),
                ));
            }
        }

        // Check 2: cycling through 3 or fewer rooms for 15+ turns without
        // new items or puzzles turning up.
        if recent_rooms.len() >= 15 && turn.saturating_sub(self.last_progress_turn) >= 15 {
            let last_15: HashSet<&String> = recent_rooms.iter().rev().take(15).collect();
            if last_15.len() <= 3 {
                let mut rooms: Vec<&str> = last_15.iter().map(|s| s.as_str()).collect();
                rooms.sort();
                return Some((
                    format!("room-cycle:{}", rooms.join(",")),
                    format!(
                        "You have been cycling through the same {} rooms for many turns. \
                         Consider exploring unexplored exits or trying items on puzzles \
                         in different areas.",
                        last_15.len()
                    ),
                ));
            }
        }

        // Check 3: the same failure response 3+ times against variations of
        // the same verb.
        let mut failures: HashMap<String, (usize, HashSet<&str>)> = HashMap::new();
        for (cmd, output) in window.iter() {
            // Lowercased, whitespace-collapsed prefix as the response
            // fingerprint.
            let fingerprint: String = output
                .to_lowercase()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .chars()
                .take(50)
                .collect();
            if FAILURE_KEYWORDS.iter().any(|k| fingerprint.contains(k)) {
                let verb = cmd.split_whitespace().next().unwrap_or("");
                let entry = failures.entry(fingerprint).or_default();
                entry.0 += 1;
                entry.1.insert(verb);
            }
        }
        for (fingerprint, (count, verbs)) in &failures {
            if *count >= 3 && verbs.len() == 1 {
                return Some((
                    format!("repeat-failure:{fingerprint}"),
                    "You keep getting the same failure response. This approach is not \
                     working. Try a different item, verb, or target, or consider whether \
                     you need something from another part of the map."
                        .to_string(),
                ));
            }
        }

        None
    }

    // ------------------------------------------------------------------
    // Persistence plumbing
    // ------------------------------------------------------------------

    fn record_metric(&mut self, completion: &Completion, turn: u32) {
        self.last_metric = Some(CallMetric {
            game_id: 0,
            turn_number: turn,
            agent_name: "puzzle_agent".to_string(),
            provider: self.llm.provider_name().to_string(),
            model: self.llm.model().to_string(),
            input_tokens: completion.usage.input_tokens,
            output_tokens: completion.usage.output_tokens,
            cached_tokens: completion.usage.cached_tokens,
            cost_estimate: completion.cost_estimate,
            latency_ms: completion.latency_ms,
        });
    }

    /// Metrics from the most recent agent call, if any.
    pub fn take_last_metric(&mut self) -> Option<CallMetric> {
        self.last_metric.take()
    }

    /// Drain puzzles touched since the last drain, for batch commit.
    pub fn take_dirty(&mut self) -> Vec<Puzzle> {
        self.dirty
            .drain()
            .filter_map(|id| self.puzzles.get(&id).cloned())
            .collect()
    }

    /// Rebuild tracker state from the journal during crash resume.
    pub fn load_from_journal(&mut self, journal: &Journal, game_id: i64) -> JournalResult<()> {
        for puzzle in journal.get_puzzles(game_id, None)? {
            self.next_id = self.next_id.max(puzzle.puzzle_id + 1);
            self.puzzles.insert(puzzle.puzzle_id, puzzle);
        }
        tracing::info!(puzzles = self.puzzles.len(), "puzzle state loaded from journal");
        Ok(())
    }
}
