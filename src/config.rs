//! Orchestrator configuration.

use std::time::Duration;

/// Configuration for the turn orchestrator and its subsystems.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Stop the game as abandoned after this many turns.
    pub max_turns: u32,

    /// Restore from the latest save on death instead of ending the game.
    pub save_on_death: bool,

    /// Autosave every N turns.
    pub autosave_every: u32,

    /// Number of rotating save slots.
    pub save_slots: u32,

    /// Save before executing an action the agent flagged as risky.
    pub save_before_risky: bool,

    /// Full puzzle cross-reference evaluation every N turns (unless
    /// triggered earlier by room/inventory/failure events).
    pub puzzle_eval_interval: u32,

    /// De-prioritise a puzzle after this many failed attempts.
    pub puzzle_attempt_threshold: usize,

    /// Minimum distinct portable inventory items required before maze
    /// resolution starts.
    pub min_maze_markers: usize,

    /// Description similarity at or above which rooms count as maze
    /// duplicates.
    pub maze_similarity_threshold: f64,

    /// Timeout for each language-model call.
    pub llm_timeout: Duration,

    /// Timeout for each interpreter command. Exceeding it is fatal.
    pub interpreter_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_turns: 1000,
            save_on_death: true,
            autosave_every: 25,
            save_slots: 3,
            save_before_risky: true,
            puzzle_eval_interval: 3,
            puzzle_attempt_threshold: 5,
            min_maze_markers: 8,
            maze_similarity_threshold: 0.95,
            llm_timeout: Duration::from_secs(30),
            interpreter_timeout: Duration::from_secs(10),
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the turn limit.
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Enable or disable death recovery.
    pub fn with_save_on_death(mut self, enabled: bool) -> Self {
        self.save_on_death = enabled;
        self
    }

    /// Set the autosave cadence.
    pub fn with_autosave_every(mut self, turns: u32) -> Self {
        self.autosave_every = turns;
        self
    }

    /// Set the number of rotating save slots.
    pub fn with_save_slots(mut self, slots: u32) -> Self {
        self.save_slots = slots.max(1);
        self
    }

    /// Set the puzzle evaluation throttle.
    pub fn with_puzzle_eval_interval(mut self, turns: u32) -> Self {
        self.puzzle_eval_interval = turns.max(1);
        self
    }

    /// Set the minimum marker count for maze resolution.
    pub fn with_min_maze_markers(mut self, count: usize) -> Self {
        self.min_maze_markers = count;
        self
    }

    /// Set the maze description similarity threshold.
    pub fn with_maze_similarity_threshold(mut self, threshold: f64) -> Self {
        self.maze_similarity_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Set the per-call LLM timeout.
    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    /// Set the interpreter command timeout.
    pub fn with_interpreter_timeout(mut self, timeout: Duration) -> Self {
        self.interpreter_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chain() {
        let config = OrchestratorConfig::new()
            .with_max_turns(50)
            .with_save_on_death(false)
            .with_min_maze_markers(4);
        assert_eq!(config.max_turns, 50);
        assert!(!config.save_on_death);
        assert_eq!(config.min_maze_markers, 4);
        assert_eq!(config.save_slots, 3);
    }
}
