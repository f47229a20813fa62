//! The turn orchestrator.
//!
//! Central state machine that drives each turn through
//! Parse -> Evaluate -> Decide -> Execute -> Persist -> Notify, mediates
//! the NORMAL/MAZE mode switch, and handles death recovery, periodic
//! autosaves, and crash resume. The orchestrator is the only caller of
//! the language-model and interpreter collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::time::timeout;

use crate::agent::{DecisionContext, GameAgent};
use crate::config::OrchestratorConfig;
use crate::error::{GameError, GameResult, InterpreterError};
use crate::hooks::{Hook, HookEvent};
use crate::interpreter::{classify_output, Interpreter, OutputClass};
use crate::items::ItemRegistry;
use crate::journal::Journal;
use crate::llm::LlmClient;
use crate::map::MapGraph;
use crate::maze::{MazeSolver, MazeStep};
use crate::puzzles::PuzzleTracker;
use crate::world::{
    now_timestamp, CallMetric, GameStatus, Item, ItemChange, Suggestion, TurnRecord,
};

/// Output phrasings that mark a command as having failed.
const FAILURE_INDICATORS: &[&str] = &[
    "you can't",
    "you cannot",
    "that's not something",
    "i don't understand",
    "i don't know",
    "nothing happens",
    "that doesn't work",
    "you don't see",
    "there is no",
    "you're not holding",
    "you can't see",
    "that's hardly",
    "you don't have",
    "i beg your pardon",
];

fn is_failure_output(output: &str) -> bool {
    let lowered = output.to_lowercase();
    FAILURE_INDICATORS.iter().any(|p| lowered.contains(p))
}

/// The four independently configured language-model clients the core
/// consumes.
#[derive(Clone)]
pub struct AgentClients {
    pub game_agent: Arc<dyn LlmClient>,
    pub puzzle_agent: Arc<dyn LlmClient>,
    pub map_parser: Arc<dyn LlmClient>,
    pub item_parser: Arc<dyn LlmClient>,
}

/// Orchestrator mode. Exactly two; the decision phase dispatches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    Maze,
}

/// Central game loop coordinator.
pub struct Orchestrator {
    config: OrchestratorConfig,
    clients: AgentClients,
    journal: Journal,
    interpreter: Box<dyn Interpreter>,
    game_agent: GameAgent,
    map: MapGraph,
    items: ItemRegistry,
    puzzles: PuzzleTracker,
    hooks: Vec<Box<dyn Hook>>,

    game_id: i64,
    game_file: String,
    resuming: bool,

    mode: Mode,
    maze_solver: Option<MazeSolver>,
    maze_paused: bool,

    turn_number: u32,
    recent_actions: VecDeque<(String, String)>,
    recent_rooms: VecDeque<String>,
    special_instructions: String,
    last_command: String,
    last_action_failed: bool,
    previous_inventory_count: usize,
    last_save_slot: u32,
    last_save_turn: u32,

    pending_events: Vec<HookEvent>,
    pending_metrics: Vec<CallMetric>,
}

impl Orchestrator {
    /// Build an orchestrator for a game file.
    ///
    /// If the journal holds an active session for the same file, the world
    /// state is rehydrated from it and the run will resume after restoring
    /// the interpreter from a save; otherwise a new session is created.
    pub fn new(
        config: OrchestratorConfig,
        journal: Journal,
        interpreter: Box<dyn Interpreter>,
        clients: AgentClients,
        game_file: impl Into<String>,
    ) -> GameResult<Self> {
        let game_file = game_file.into();
        let mut orchestrator = Self {
            game_agent: GameAgent::new(clients.game_agent.clone(), config.llm_timeout),
            map: MapGraph::new(
                clients.map_parser.clone(),
                config.llm_timeout,
                config.maze_similarity_threshold,
            ),
            items: ItemRegistry::new(clients.item_parser.clone(), config.llm_timeout),
            puzzles: PuzzleTracker::new(
                clients.puzzle_agent.clone(),
                config.llm_timeout,
                config.puzzle_eval_interval,
                config.puzzle_attempt_threshold,
            ),
            config,
            clients,
            journal,
            interpreter,
            hooks: Vec::new(),
            game_id: 0,
            game_file,
            resuming: false,
            mode: Mode::Normal,
            maze_solver: None,
            maze_paused: false,
            turn_number: 0,
            recent_actions: VecDeque::new(),
            recent_rooms: VecDeque::new(),
            special_instructions: String::new(),
            last_command: "look".to_string(),
            last_action_failed: false,
            previous_inventory_count: 0,
            last_save_slot: 0,
            last_save_turn: 0,
            pending_events: Vec::new(),
            pending_metrics: Vec::new(),
        };
        orchestrator.try_resume()?;
        if !orchestrator.resuming {
            orchestrator.game_id = orchestrator.journal.create_game(&orchestrator.game_file)?;
        }
        tracing::info!(
            game_id = orchestrator.game_id,
            resuming = orchestrator.resuming,
            "orchestrator initialized"
        );
        Ok(orchestrator)
    }

    /// Register a hook to receive game events.
    pub fn register_hook(&mut self, hook: Box<dyn Hook>) {
        self.hooks.push(hook);
    }

    pub fn game_id(&self) -> i64 {
        self.game_id
    }

    pub fn turn_number(&self) -> u32 {
        self.turn_number
    }

    pub fn is_resuming(&self) -> bool {
        self.resuming
    }

    pub fn map(&self) -> &MapGraph {
        &self.map
    }

    pub fn items(&self) -> &ItemRegistry {
        &self.items
    }

    pub fn puzzles(&self) -> &PuzzleTracker {
        &self.puzzles
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    // ------------------------------------------------------------------
    // Main loop
    // ------------------------------------------------------------------

    /// Run the game to completion and return its final status.
    ///
    /// Interpreter failures end the game as abandoned; journal failures
    /// propagate with the session left marked as playing so the next start
    /// replays the turn idempotently.
    pub async fn run(&mut self) -> GameResult<GameStatus> {
        self.fire_event_now(&HookEvent::GameStart {
            game_id: self.game_id,
            game_file: self.game_file.clone(),
        });

        let mut game_output = self.bootstrap().await?;

        while self.turn_number < self.config.max_turns {
            let result = self.step(&game_output).await;
            game_output = match result {
                Ok(output) => output,
                Err(GameError::Interpreter(err)) => {
                    tracing::error!(%err, "interpreter failed, abandoning game");
                    self.end_game(GameStatus::Abandoned)?;
                    return Ok(GameStatus::Abandoned);
                }
                Err(err) => {
                    tracing::error!(%err, "fatal error, leaving session for replay");
                    return Err(err);
                }
            };

            match classify_output(&game_output) {
                OutputClass::Death => {
                    if self.config.save_on_death {
                        match self.handle_death().await {
                            Some(output) => {
                                game_output = output;
                                continue;
                            }
                            None => {
                                tracing::error!("all save slots failed, cannot recover");
                                self.end_game(GameStatus::Lost)?;
                                return Ok(GameStatus::Lost);
                            }
                        }
                    } else {
                        self.end_game(GameStatus::Lost)?;
                        return Ok(GameStatus::Lost);
                    }
                }
                OutputClass::Victory => {
                    self.end_game(GameStatus::Won)?;
                    return Ok(GameStatus::Won);
                }
                OutputClass::Normal => {}
            }

            if self.config.autosave_every > 0
                && self.turn_number - self.last_save_turn >= self.config.autosave_every
            {
                self.autosave().await;
            }
        }

        tracing::warn!(max_turns = self.config.max_turns, "turn limit reached");
        self.end_game(GameStatus::Abandoned)?;
        Ok(GameStatus::Abandoned)
    }

    /// Obtain the first pending game output: restore the interpreter from
    /// a save when resuming (falling back to a fresh session when no slot
    /// works), then look around.
    pub async fn bootstrap(&mut self) -> GameResult<String> {
        if self.resuming {
            if let Some(output) = self.restore_latest_save().await {
                return Ok(output);
            }
            self.reject_resume()?;
        }
        self.exec_command("look").await
    }

    /// Advance exactly one turn with the given pending game output and
    /// return the new output. `run` drives this in a loop; harnesses may
    /// call it directly.
    pub async fn step(&mut self, game_output: &str) -> GameResult<String> {
        self.turn_number += 1;

        // A paused maze resumes once enough markers are on hand.
        if self.maze_paused && self.map.is_maze_active() {
            let exclude = self.puzzles.open_related_items();
            if self.items.get_droppable_items(&exclude).len() >= self.config.min_maze_markers {
                tracing::info!("markers replenished, re-entering maze mode");
                self.maze_paused = false;
                self.mode = Mode::Maze;
            }
        }

        match self.mode {
            Mode::Normal => self.normal_turn(game_output).await,
            Mode::Maze => self.maze_turn(game_output).await,
        }
    }

    // ------------------------------------------------------------------
    // Normal turn
    // ------------------------------------------------------------------

    async fn normal_turn(&mut self, game_output: &str) -> GameResult<String> {
        let turn = self.turn_number;
        let mut current_room_id = self
            .map
            .current_room_id()
            .unwrap_or("unknown")
            .to_string();
        self.pending_events.push(HookEvent::TurnStart {
            turn_number: turn,
            room_id: current_room_id.clone(),
        });

        // Phase 1: parse the map.
        let room_update = self
            .map
            .update_from_game_output(game_output, &self.last_command, turn)
            .await;
        let metric = self.map.take_last_metric();
        self.collect_metric(metric);

        if let Some(room_id) = &room_update.room_id {
            current_room_id = room_id.clone();
        }
        if room_update.room_changed {
            if let Some(room_id) = &room_update.room_id {
                self.recent_rooms.push_back(room_id.clone());
                while self.recent_rooms.len() > 50 {
                    self.recent_rooms.pop_front();
                }
                if room_update.new_room {
                    self.puzzles.note_new_room();
                }
                self.pending_events.push(HookEvent::RoomEnter {
                    room_id: room_id.clone(),
                    room_name: room_update.room_name.clone().unwrap_or_default(),
                    description: room_update.description.clone().unwrap_or_default(),
                    is_new: room_update.new_room,
                });
            }
        }

        // Phase 2: parse items.
        let item_updates = self
            .items
            .update_from_game_output(game_output, &current_room_id, &self.last_command, turn)
            .await;
        let metric = self.items.take_last_metric();
        self.collect_metric(metric);

        let inventory_count = self.items.inventory_count();
        if inventory_count != self.previous_inventory_count {
            self.puzzles.note_inventory_changed();
        }
        self.previous_inventory_count = inventory_count;

        for update in &item_updates {
            match update.change_type {
                ItemChange::New => {
                    self.puzzles.note_progress(turn);
                    self.pending_events.push(HookEvent::ItemFound {
                        item_id: update.item_id.clone(),
                        item_name: update.name.clone(),
                        room_id: current_room_id.clone(),
                    });
                }
                ItemChange::Taken => {
                    self.map.clear_maze_marker(&update.item_id);
                    self.pending_events.push(HookEvent::ItemTaken {
                        item_id: update.item_id.clone(),
                        item_name: update.name.clone(),
                    });
                }
                _ => {}
            }
        }

        // Phase 3: maze check. The current turn still completes normally;
        // the next turn's decision is algorithmic.
        if room_update.room_changed {
            if let (Some(room_id), Some(description)) =
                (&room_update.room_id, &room_update.description)
            {
                if self.map.check_maze_condition(room_id, description, turn) {
                    current_room_id = self
                        .map
                        .current_room_id()
                        .unwrap_or("unknown")
                        .to_string();
                    self.relocate_renamed_room_items();
                    if let Some(maze) = self.map.get_active_maze() {
                        self.pending_events.push(HookEvent::MazeDetected {
                            maze_group_id: maze.group_id.clone(),
                            entry_room_id: maze.entry_room_id.clone(),
                            suspected_room_count: maze.room_ids.len(),
                        });
                        self.maze_solver = Some(MazeSolver::new(
                            maze.group_id.clone(),
                            self.config.min_maze_markers,
                        ));
                        self.mode = Mode::Maze;
                        self.maze_paused = false;
                    }
                }
            }
        }

        // Stuck detection runs every turn, no model call.
        let recent_actions: Vec<(String, String)> = self.recent_actions.iter().cloned().collect();
        let recent_rooms: Vec<String> = self.recent_rooms.iter().cloned().collect();
        if let Some(suggestion) = self.puzzles.detect_stuck(&recent_actions, &recent_rooms, turn) {
            if !self.special_instructions.is_empty() {
                self.special_instructions.push('\n');
            }
            self.special_instructions.push_str(&suggestion);
        }

        // Phase 4: throttled puzzle evaluation.
        if self.last_action_failed {
            self.puzzles.note_failed_action();
        }
        let mut suggestions: Vec<Suggestion> = Vec::new();
        if self.puzzles.should_evaluate(turn) {
            let map_summary = self.map.get_map_summary();
            let current_room = self.map.get_current_room().cloned();
            let inventory = self.items.get_inventory();
            let all_items = self.items.get_all_items();
            let evaluation = self
                .puzzles
                .evaluate(
                    game_output,
                    current_room.as_ref(),
                    &inventory,
                    &all_items,
                    &map_summary,
                    &recent_actions,
                    turn,
                )
                .await;
            let metric = self.puzzles.take_last_metric();
            self.collect_metric(metric);

            for puzzle in &evaluation.new_puzzles {
                self.pending_events.push(HookEvent::PuzzleFound {
                    puzzle_id: puzzle.puzzle_id,
                    description: puzzle.description.clone(),
                });
            }
            for id in &evaluation.solved_ids {
                let description = self
                    .puzzles
                    .get_puzzle(*id)
                    .map(|p| p.description.clone())
                    .unwrap_or_else(|| format!("Puzzle #{id}"));
                self.pending_events.push(HookEvent::PuzzleSolved {
                    puzzle_id: *id,
                    description,
                });
            }
            suggestions = evaluation.suggestions;
            for suggestion in suggestions.iter_mut() {
                if let Some(puzzle) = self.puzzles.get_puzzle(suggestion.puzzle_id) {
                    if !puzzle.location.is_empty() && puzzle.location != current_room_id {
                        suggestion.navigation =
                            self.map.get_path(&current_room_id, &puzzle.location);
                    }
                }
            }
        }

        // Phase 5: assemble the decision context.
        let context = self.assemble_context(game_output, suggestions.clone(), &current_room_id);

        // Phase 6: decide. Fallback chain: top suggestion, then `look`.
        let decision = self.game_agent.decide(&context, turn).await;
        let metric = self.game_agent.take_last_metric();
        self.collect_metric(metric);
        let (command, reasoning, risky) = match decision {
            Some(decision) => (decision.command, decision.reasoning, decision.risky),
            None => match suggestions.iter().find(|s| !s.proposed_action.is_empty()) {
                Some(suggestion) => (
                    suggestion.proposed_action.clone(),
                    format!(
                        "Decision fallback: top suggestion for puzzle {}",
                        suggestion.puzzle_id
                    ),
                    false,
                ),
                None => (
                    "look".to_string(),
                    "Decision fallback: no usable agent response".to_string(),
                    false,
                ),
            },
        };

        if risky && self.config.save_before_risky {
            tracing::info!(%command, "risky action flagged, saving first");
            self.autosave().await;
        }

        // Phase 7: execute.
        let new_output = self.exec_command(&command).await?;
        self.last_command = command.clone();
        self.last_action_failed = is_failure_output(&new_output);
        self.push_recent_action(&command, &new_output);
        self.special_instructions.clear();

        // A failed suggestion-derived action counts against its puzzle.
        if self.last_action_failed {
            if let Some(suggestion) = suggestions.iter().find(|s| s.proposed_action == command) {
                self.puzzles
                    .record_attempt(suggestion.puzzle_id, &command, &new_output, turn);
            }
        }

        // Phase 8: persist, then Phase 9: notify.
        self.persist_turn(turn, &command, &new_output, &current_room_id, &reasoning)?;
        self.pending_events.push(HookEvent::TurnEnd {
            turn_number: turn,
            command: command.clone(),
            output: new_output.clone(),
            room_id: current_room_id.clone(),
        });
        self.fire_pending_events();

        tracing::info!(turn, %command, room = %current_room_id, "turn complete");
        Ok(new_output)
    }

    // ------------------------------------------------------------------
    // Maze turn
    // ------------------------------------------------------------------

    /// A turn in MAZE mode: parsing and persistence run as normal, but the
    /// decision comes from the algorithmic solver. No game-agent call.
    async fn maze_turn(&mut self, game_output: &str) -> GameResult<String> {
        let turn = self.turn_number;
        let mut current_room_id = self
            .map
            .current_room_id()
            .unwrap_or("unknown")
            .to_string();
        self.pending_events.push(HookEvent::TurnStart {
            turn_number: turn,
            room_id: current_room_id.clone(),
        });

        // Phases 1-2: parse as usual.
        let room_update = self
            .map
            .update_from_game_output(game_output, &self.last_command, turn)
            .await;
        let metric = self.map.take_last_metric();
        self.collect_metric(metric);
        if let Some(room_id) = &room_update.room_id {
            current_room_id = room_id.clone();
            if room_update.room_changed {
                self.recent_rooms.push_back(room_id.clone());
                while self.recent_rooms.len() > 50 {
                    self.recent_rooms.pop_front();
                }
            }
        }
        let item_updates = self
            .items
            .update_from_game_output(game_output, &current_room_id, &self.last_command, turn)
            .await;
        let metric = self.items.take_last_metric();
        self.collect_metric(metric);
        self.previous_inventory_count = self.items.inventory_count();
        for update in &item_updates {
            if update.change_type == ItemChange::Taken {
                self.map.clear_maze_marker(&update.item_id);
            }
        }

        // Decision: ask the solver for the next primitive command.
        let Some(solver) = self.maze_solver.as_mut() else {
            tracing::error!("maze mode without a solver, reverting to normal");
            self.mode = Mode::Normal;
            return self.normal_turn(game_output).await;
        };
        let was_active = self.map.is_maze_active();
        let group_id = solver.group_id().to_string();
        let puzzle_items = self.puzzles.open_related_items();
        let step = solver.next_step(&mut self.map, &self.items, &puzzle_items, game_output, turn);

        if was_active && !self.map.is_maze_active() {
            if let Some(maze) = self.map.get_maze_group(&group_id) {
                self.pending_events.push(HookEvent::MazeCompleted {
                    maze_group_id: group_id.clone(),
                    total_rooms: maze.room_ids.len(),
                    total_exits: maze.exit_room_ids.len(),
                });
            }
        }

        let (command, reasoning) = match step {
            MazeStep::Command(command) => (command, "Maze mode: exploring".to_string()),
            MazeStep::DropMarker {
                room_id,
                item_id,
                replacement,
                command,
            } => {
                self.pending_events.push(HookEvent::MazeRoomMarked {
                    maze_group_id: group_id.clone(),
                    room_id: room_id.clone(),
                    marker_item_id: item_id.clone(),
                });
                if replacement {
                    let puzzle = self.puzzles.open_puzzle(
                        "wandering thief stealing maze markers",
                        &room_id,
                        vec![item_id],
                        turn,
                    );
                    self.pending_events.push(HookEvent::PuzzleFound {
                        puzzle_id: puzzle.puzzle_id,
                        description: puzzle.description,
                    });
                }
                (command, "Maze mode: dropping marker".to_string())
            }
            MazeStep::TakeMarker { command, .. } => {
                (command, "Maze mode: retrieving marker".to_string())
            }
            MazeStep::NeedMarkers { have, need } => {
                self.special_instructions = format!(
                    "A maze needs mapping but you carry only {have} droppable items of the \
                     {need} required. Collect more portable items, then return to the maze."
                );
                self.maze_paused = true;
                self.mode = Mode::Normal;
                (
                    "look".to_string(),
                    "Maze mode paused: collecting more markers".to_string(),
                )
            }
            MazeStep::Darkness => {
                let puzzle =
                    self.puzzles
                        .open_puzzle("need light in maze", &current_room_id, vec![], turn);
                self.pending_events.push(HookEvent::PuzzleFound {
                    puzzle_id: puzzle.puzzle_id,
                    description: puzzle.description,
                });
                self.special_instructions =
                    "The maze is dark. Find a light source before returning.".to_string();
                self.maze_paused = true;
                self.mode = Mode::Normal;
                (
                    "look".to_string(),
                    "Maze mode paused: darkness".to_string(),
                )
            }
            MazeStep::Finished => {
                self.mode = Mode::Normal;
                self.maze_solver = None;
                (
                    "look".to_string(),
                    "Maze resolved and markers retrieved".to_string(),
                )
            }
        };

        // Execute, persist, notify.
        let new_output = self.exec_command(&command).await?;
        self.last_command = command.clone();
        self.last_action_failed = is_failure_output(&new_output);
        self.push_recent_action(&command, &new_output);

        self.persist_turn(turn, &command, &new_output, &current_room_id, &reasoning)?;
        self.pending_events.push(HookEvent::TurnEnd {
            turn_number: turn,
            command: command.clone(),
            output: new_output.clone(),
            room_id: current_room_id.clone(),
        });
        self.fire_pending_events();

        tracing::info!(turn, %command, room = %current_room_id, "maze turn complete");
        Ok(new_output)
    }

    // ------------------------------------------------------------------
    // Phase helpers
    // ------------------------------------------------------------------

    fn assemble_context(
        &self,
        game_output: &str,
        suggestions: Vec<Suggestion>,
        current_room_id: &str,
    ) -> DecisionContext {
        let room = self.map.get_current_room().cloned();
        let inventory: Vec<Item> = self.items.get_inventory().into_iter().cloned().collect();
        let room_items: Vec<Item> = self
            .items
            .get_items_in_room(current_room_id)
            .into_iter()
            .cloned()
            .collect();
        let open_puzzles = self
            .puzzles
            .open_puzzles()
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();

        let mut navigation_hints = HashMap::new();
        for puzzle in &open_puzzles {
            if !puzzle.location.is_empty() && puzzle.location != current_room_id {
                let path = self.map.get_path(current_room_id, &puzzle.location);
                if !path.is_empty() {
                    navigation_hints.insert(puzzle.location.clone(), path);
                }
            }
        }

        DecisionContext {
            game_output: game_output.to_string(),
            room,
            inventory,
            room_items,
            map_summary: Some(self.map.get_map_summary()),
            open_puzzles,
            suggestions,
            recent_actions: self.recent_actions.iter().cloned().collect(),
            special_instructions: self.special_instructions.clone(),
            navigation_hints,
            nearest_unexplored: self.map.get_nearest_unexplored(current_room_id),
        }
    }

    /// Send a command through the interpreter under the configured timeout.
    async fn exec_command(&mut self, command: &str) -> Result<String, GameError> {
        match timeout(
            self.config.interpreter_timeout,
            self.interpreter.do_command(command),
        )
        .await
        {
            Ok(Ok((_room_name, output))) => Ok(output),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(InterpreterError::Timeout {
                duration: self.config.interpreter_timeout,
            }
            .into()),
        }
    }

    fn push_recent_action(&mut self, command: &str, output: &str) {
        self.recent_actions
            .push_back((command.to_string(), output.to_string()));
        while self.recent_actions.len() > 20 {
            self.recent_actions.pop_front();
        }
    }

    /// Items sitting in rooms that were just reassigned to maze ids follow
    /// their room to its new id.
    fn relocate_renamed_room_items(&mut self) {
        for (old_id, new_id) in self.map.take_renames() {
            let stranded: Vec<String> = self
                .items
                .get_items_in_room(&old_id)
                .iter()
                .map(|i| i.item_id.clone())
                .collect();
            for item_id in stranded {
                self.items.relocate(&item_id, &new_id);
            }
        }
    }

    /// Phase 8: write the turn and everything it touched in one batch.
    fn persist_turn(
        &mut self,
        turn: u32,
        command: &str,
        output: &str,
        room_id: &str,
        reasoning: &str,
    ) -> GameResult<()> {
        let inventory_snapshot: Vec<String> = self
            .items
            .get_inventory()
            .iter()
            .map(|i| i.item_id.clone())
            .collect();
        let record = TurnRecord {
            game_id: self.game_id,
            turn_number: turn,
            timestamp: now_timestamp(),
            command_sent: command.to_string(),
            game_output: output.to_string(),
            room_id: room_id.to_string(),
            inventory_snapshot,
            agent_reasoning: reasoning.to_string(),
        };
        let (rooms, connections, maze_groups, removed_rooms) = self.map.take_dirty();
        let items = self.items.take_dirty();
        let puzzles = self.puzzles.take_dirty();
        let mut metrics = std::mem::take(&mut self.pending_metrics);
        for metric in metrics.iter_mut() {
            metric.game_id = self.game_id;
        }
        self.journal.commit_turn(
            &record,
            &rooms,
            &connections,
            &items,
            &puzzles,
            &maze_groups,
            &removed_rooms,
            &metrics,
        )?;
        Ok(())
    }

    fn collect_metric(&mut self, metric: Option<CallMetric>) {
        if let Some(mut metric) = metric {
            metric.game_id = self.game_id;
            self.pending_metrics.push(metric);
        }
    }

    /// Phase 9: deliver queued events, in order, to every hook. Hook
    /// errors are logged and never propagated.
    fn fire_pending_events(&mut self) {
        let events = std::mem::take(&mut self.pending_events);
        for event in &events {
            self.fire_event_now(event);
        }
    }

    fn fire_event_now(&mut self, event: &HookEvent) {
        for hook in self.hooks.iter_mut() {
            if let Err(err) = event.deliver(hook.as_mut()) {
                tracing::error!(%err, "hook failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Saves, death, endings
    // ------------------------------------------------------------------

    /// Save into the next rotating slot. Failures are logged, not fatal.
    async fn autosave(&mut self) {
        let slot = (self.last_save_slot + 1) % self.config.save_slots;
        match timeout(self.config.interpreter_timeout, self.interpreter.save(slot)).await {
            Ok(Ok(())) => {
                self.last_save_slot = slot;
                self.last_save_turn = self.turn_number;
                tracing::info!(slot, turn = self.turn_number, "game saved");
            }
            _ => tracing::warn!(slot, "save failed (non-fatal)"),
        }
    }

    /// Restore from the newest usable slot after a death. Returns the
    /// post-restore output, or None when every slot fails.
    async fn handle_death(&mut self) -> Option<String> {
        tracing::warn!(turn = self.turn_number, "player died, attempting restore");
        for i in 0..self.config.save_slots {
            let slot =
                (self.last_save_slot + self.config.save_slots - i) % self.config.save_slots;
            let restored = matches!(
                timeout(self.config.interpreter_timeout, self.interpreter.restore(slot)).await,
                Ok(Ok(()))
            );
            if !restored {
                continue;
            }
            let output = self.exec_command("look").await.ok()?;
            let turns_lost = self.turn_number.saturating_sub(self.last_save_turn);
            let last_command = self
                .recent_actions
                .back()
                .map(|(c, _)| c.clone())
                .unwrap_or_else(|| "unknown action".to_string());
            self.special_instructions = format!(
                "WARNING: You died attempting '{last_command}'. The game was restored to \
                 {turns_lost} turns ago. Do NOT repeat the approach that led to death; \
                 try a completely different strategy."
            );
            tracing::info!(slot, turns_lost, "restored after death");
            return Some(output);
        }
        None
    }

    fn end_game(&mut self, status: GameStatus) -> GameResult<()> {
        self.journal
            .end_game(self.game_id, status, self.turn_number)?;
        self.fire_event_now(&HookEvent::GameEnd {
            game_id: self.game_id,
            status: status.as_str().to_string(),
            total_turns: self.turn_number,
        });
        tracing::info!(game_id = self.game_id, %status, turns = self.turn_number, "game over");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Crash resume
    // ------------------------------------------------------------------

    /// Rehydrate world state if the journal holds an active session for
    /// this game file.
    fn try_resume(&mut self) -> GameResult<()> {
        let Some((game_id, active_file)) = self.journal.get_active_game()? else {
            return Ok(());
        };
        if active_file != self.game_file {
            tracing::info!(
                game_id,
                %active_file,
                "active session is for a different file, starting fresh"
            );
            return Ok(());
        }
        self.game_id = game_id;
        self.resuming = true;
        self.map.load_from_journal(&self.journal, game_id)?;
        self.items.load_from_journal(&self.journal, game_id)?;
        self.puzzles.load_from_journal(&self.journal, game_id)?;

        if let Some(latest) = self.journal.get_latest_turn(game_id)? {
            self.turn_number = latest.turn_number;
            self.map.set_current_room(&latest.room_id);
            self.previous_inventory_count = latest.inventory_snapshot.len();
        }
        let turns = self.journal.get_turns(game_id)?;
        for turn in turns.iter().rev().take(10).rev() {
            self.recent_actions
                .push_back((turn.command_sent.clone(), turn.game_output.clone()));
            self.recent_rooms.push_back(turn.room_id.clone());
        }
        if let Some(maze) = self.map.get_active_maze() {
            self.maze_solver = Some(MazeSolver::resume(maze, self.config.min_maze_markers));
            self.mode = Mode::Maze;
        }
        tracing::info!(game_id, turn = self.turn_number, "resuming game session");
        Ok(())
    }

    /// Try each save slot until the interpreter restores; then look around.
    async fn restore_latest_save(&mut self) -> Option<String> {
        for slot in 0..self.config.save_slots {
            let restored = matches!(
                timeout(self.config.interpreter_timeout, self.interpreter.restore(slot)).await,
                Ok(Ok(()))
            );
            if restored {
                tracing::info!(slot, "interpreter state restored");
                return self.exec_command("look").await.ok();
            }
        }
        None
    }

    /// No usable save: the stale session cannot continue. Mark it
    /// abandoned and start a new game from the beginning.
    fn reject_resume(&mut self) -> GameResult<()> {
        tracing::warn!("no usable save to resume from, starting a new game");
        self.journal
            .end_game(self.game_id, GameStatus::Abandoned, self.turn_number)?;
        self.game_id = self.journal.create_game(&self.game_file)?;
        self.resuming = false;
        self.turn_number = 0;
        self.mode = Mode::Normal;
        self.maze_solver = None;
        self.maze_paused = false;
        self.recent_actions.clear();
        self.recent_rooms.clear();
        self.special_instructions.clear();
        self.previous_inventory_count = 0;
        self.map = MapGraph::new(
            self.clients.map_parser.clone(),
            self.config.llm_timeout,
            self.config.maze_similarity_threshold,
        );
        self.items = ItemRegistry::new(self.clients.item_parser.clone(), self.config.llm_timeout);
        self.puzzles = PuzzleTracker::new(
            self.clients.puzzle_agent.clone(),
            self.config.llm_timeout,
            self.config.puzzle_eval_interval,
            self.config.puzzle_attempt_threshold,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_failure_output() {
        assert!(is_failure_output("You can't go that way."));
        assert!(is_failure_output("I don't understand that word."));
        assert!(!is_failure_output("Taken."));
    }
}
