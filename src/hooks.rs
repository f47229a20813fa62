//! Observer hooks for game events.
//!
//! All methods default to no-ops. The orchestrator fires hooks in
//! registration order after the turn is journaled; any error a hook
//! returns is logged and never propagated.

/// Error type hooks may return; the orchestrator only logs it.
pub type HookResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Observer interface for game events.
#[allow(unused_variables)]
pub trait Hook: Send {
    /// Called when a new game session begins.
    fn on_game_start(&mut self, game_id: i64, game_file: &str) -> HookResult {
        Ok(())
    }

    /// Called at the beginning of each turn, before any processing.
    fn on_turn_start(&mut self, turn_number: u32, room_id: &str) -> HookResult {
        Ok(())
    }

    /// Called at the end of each turn, after all processing and journaling.
    fn on_turn_end(
        &mut self,
        turn_number: u32,
        command: &str,
        output: &str,
        room_id: &str,
    ) -> HookResult {
        Ok(())
    }

    /// Called when the player enters a room. `is_new` is true on first visit.
    fn on_room_enter(
        &mut self,
        room_id: &str,
        room_name: &str,
        description: &str,
        is_new: bool,
    ) -> HookResult {
        Ok(())
    }

    /// Called when a new item is discovered for the first time.
    fn on_item_found(&mut self, item_id: &str, item_name: &str, room_id: &str) -> HookResult {
        Ok(())
    }

    /// Called when an item is picked up into inventory.
    fn on_item_taken(&mut self, item_id: &str, item_name: &str) -> HookResult {
        Ok(())
    }

    /// Called when the puzzle tracker detects a new puzzle.
    fn on_puzzle_found(&mut self, puzzle_id: i64, description: &str) -> HookResult {
        Ok(())
    }

    /// Called when a puzzle is marked as solved.
    fn on_puzzle_solved(&mut self, puzzle_id: i64, description: &str) -> HookResult {
        Ok(())
    }

    /// Called when the map manager detects a maze condition.
    fn on_maze_detected(
        &mut self,
        maze_group_id: &str,
        entry_room_id: &str,
        suspected_room_count: usize,
    ) -> HookResult {
        Ok(())
    }

    /// Called when a marker item is dropped in a maze room.
    fn on_maze_room_marked(
        &mut self,
        maze_group_id: &str,
        room_id: &str,
        marker_item_id: &str,
    ) -> HookResult {
        Ok(())
    }

    /// Called when a maze has been fully mapped.
    fn on_maze_completed(
        &mut self,
        maze_group_id: &str,
        total_rooms: usize,
        total_exits: usize,
    ) -> HookResult {
        Ok(())
    }

    /// Called when the game session ends (won, lost, or abandoned).
    fn on_game_end(&mut self, game_id: i64, status: &str, total_turns: u32) -> HookResult {
        Ok(())
    }
}

/// A game event queued during a turn and delivered to hooks after the
/// turn's journal commit, preserving the journal-before-hooks ordering.
#[derive(Debug, Clone)]
pub enum HookEvent {
    GameStart {
        game_id: i64,
        game_file: String,
    },
    TurnStart {
        turn_number: u32,
        room_id: String,
    },
    TurnEnd {
        turn_number: u32,
        command: String,
        output: String,
        room_id: String,
    },
    RoomEnter {
        room_id: String,
        room_name: String,
        description: String,
        is_new: bool,
    },
    ItemFound {
        item_id: String,
        item_name: String,
        room_id: String,
    },
    ItemTaken {
        item_id: String,
        item_name: String,
    },
    PuzzleFound {
        puzzle_id: i64,
        description: String,
    },
    PuzzleSolved {
        puzzle_id: i64,
        description: String,
    },
    MazeDetected {
        maze_group_id: String,
        entry_room_id: String,
        suspected_room_count: usize,
    },
    MazeRoomMarked {
        maze_group_id: String,
        room_id: String,
        marker_item_id: String,
    },
    MazeCompleted {
        maze_group_id: String,
        total_rooms: usize,
        total_exits: usize,
    },
    GameEnd {
        game_id: i64,
        status: String,
        total_turns: u32,
    },
}

impl HookEvent {
    /// Dispatch this event to a single hook.
    pub fn deliver(&self, hook: &mut dyn Hook) -> HookResult {
        match self {
            HookEvent::GameStart { game_id, game_file } => hook.on_game_start(*game_id, game_file),
            HookEvent::TurnStart {
                turn_number,
                room_id,
            } => hook.on_turn_start(*turn_number, room_id),
            HookEvent::TurnEnd {
                turn_number,
                command,
                output,
                room_id,
            } => hook.on_turn_end(*turn_number, command, output, room_id),
            HookEvent::RoomEnter {
                room_id,
                room_name,
                description,
                is_new,
            } => hook.on_room_enter(room_id, room_name, description, *is_new),
            HookEvent::ItemFound {
                item_id,
                item_name,
                room_id,
            } => hook.on_item_found(item_id, item_name, room_id),
            HookEvent::ItemTaken { item_id, item_name } => hook.on_item_taken(item_id, item_name),
            HookEvent::PuzzleFound {
                puzzle_id,
                description,
            } => hook.on_puzzle_found(*puzzle_id, description),
            HookEvent::PuzzleSolved {
                puzzle_id,
                description,
            } => hook.on_puzzle_solved(*puzzle_id, description),
            HookEvent::MazeDetected {
                maze_group_id,
                entry_room_id,
                suspected_room_count,
            } => hook.on_maze_detected(maze_group_id, entry_room_id, *suspected_room_count),
            HookEvent::MazeRoomMarked {
                maze_group_id,
                room_id,
                marker_item_id,
            } => hook.on_maze_room_marked(maze_group_id, room_id, marker_item_id),
            HookEvent::MazeCompleted {
                maze_group_id,
                total_rooms,
                total_exits,
            } => hook.on_maze_completed(maze_group_id, *total_rooms, *total_exits),
            HookEvent::GameEnd {
                game_id,
                status,
                total_turns,
            } => hook.on_game_end(*game_id, status, *total_turns),
        }
    }
}
