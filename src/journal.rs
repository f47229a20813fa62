//! Durable turn journal backed by SQLite.
//!
//! Append-only record of games, turns, rooms, connections, items, puzzles,
//! maze groups, and per-call metrics. Runs in WAL mode so dashboard
//! readers never block a live turn. Every save operation upserts on its
//! natural key, which makes replaying a turn after a crash idempotent.

use crate::error::JournalResult;
use crate::world::{
    now_timestamp, CallMetric, Connection, GameSession, GameStatus, Item, MazeGroup, Portability,
    Puzzle, PuzzleStatus, Room, TurnRecord,
};
use rusqlite::params;
use std::path::Path;

/// SQLite-backed journal. A single process-wide handle; writers serialize
/// through it, concurrent readers observe committed state only.
pub struct Journal {
    conn: rusqlite::Connection,
}

impl Journal {
    /// Open (or create) a journal database at the given path.
    pub fn open(path: impl AsRef<Path>) -> JournalResult<Self> {
        let conn = rusqlite::Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let journal = Self { conn };
        journal.create_schema()?;
        Ok(journal)
    }

    /// Open an in-memory journal, for tests.
    pub fn in_memory() -> JournalResult<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        let journal = Self { conn };
        journal.create_schema()?;
        Ok(journal)
    }

    fn create_schema(&self) -> JournalResult<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS games (
                game_id INTEGER PRIMARY KEY AUTOINCREMENT,
                game_file TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT,
                status TEXT NOT NULL DEFAULT 'playing',
                total_turns INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS turns (
                game_id INTEGER NOT NULL,
                turn_number INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                command_sent TEXT NOT NULL,
                game_output TEXT NOT NULL,
                room_id TEXT NOT NULL,
                inventory_snapshot TEXT NOT NULL,
                agent_reasoning TEXT,
                PRIMARY KEY (game_id, turn_number),
                FOREIGN KEY (game_id) REFERENCES games(game_id)
            );
            CREATE TABLE IF NOT EXISTS rooms (
                game_id INTEGER NOT NULL,
                room_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                visited INTEGER NOT NULL DEFAULT 0,
                visit_count INTEGER NOT NULL DEFAULT 0,
                is_dark INTEGER NOT NULL DEFAULT 0,
                maze_group TEXT,
                maze_marker_item TEXT,
                first_visited_turn INTEGER,
                last_visited_turn INTEGER,
                exits TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (game_id, room_id),
                FOREIGN KEY (game_id) REFERENCES games(game_id)
            );
            CREATE TABLE IF NOT EXISTS connections (
                game_id INTEGER NOT NULL,
                from_room_id TEXT NOT NULL,
                to_room_id TEXT NOT NULL,
                direction TEXT NOT NULL,
                bidirectional INTEGER NOT NULL DEFAULT 1,
                blocked INTEGER NOT NULL DEFAULT 0,
                block_reason TEXT,
                teleport INTEGER NOT NULL DEFAULT 0,
                random INTEGER NOT NULL DEFAULT 0,
                observed_destinations TEXT NOT NULL DEFAULT '[]',
                PRIMARY KEY (game_id, from_room_id, direction),
                FOREIGN KEY (game_id) REFERENCES games(game_id)
            );
            CREATE TABLE IF NOT EXISTS items (
                game_id INTEGER NOT NULL,
                item_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                location TEXT NOT NULL DEFAULT 'unknown',
                portable INTEGER,
                properties TEXT NOT NULL DEFAULT '{}',
                first_seen_turn INTEGER NOT NULL DEFAULT 0,
                last_seen_turn INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (game_id, item_id),
                FOREIGN KEY (game_id) REFERENCES games(game_id)
            );
            CREATE TABLE IF NOT EXISTS puzzles (
                game_id INTEGER NOT NULL,
                puzzle_id INTEGER NOT NULL,
                description TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'open',
                location TEXT NOT NULL,
                related_items TEXT NOT NULL DEFAULT '[]',
                attempts TEXT NOT NULL DEFAULT '[]',
                created_turn INTEGER NOT NULL,
                solved_turn INTEGER,
                PRIMARY KEY (game_id, puzzle_id),
                FOREIGN KEY (game_id) REFERENCES games(game_id)
            );
            CREATE TABLE IF NOT EXISTS maze_groups (
                game_id INTEGER NOT NULL,
                group_id TEXT NOT NULL,
                entry_room_id TEXT NOT NULL,
                room_ids TEXT NOT NULL DEFAULT '[]',
                exit_room_ids TEXT NOT NULL DEFAULT '[]',
                markers TEXT NOT NULL DEFAULT '{}',
                fully_mapped INTEGER NOT NULL DEFAULT 0,
                created_turn INTEGER NOT NULL,
                completed_turn INTEGER,
                PRIMARY KEY (game_id, group_id),
                FOREIGN KEY (game_id) REFERENCES games(game_id)
            );
            CREATE TABLE IF NOT EXISTS metrics (
                metric_id INTEGER PRIMARY KEY AUTOINCREMENT,
                game_id INTEGER NOT NULL,
                turn_number INTEGER NOT NULL,
                agent_name TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                cached_tokens INTEGER NOT NULL DEFAULT 0,
                cost_estimate REAL NOT NULL DEFAULT 0.0,
                latency_ms REAL NOT NULL DEFAULT 0.0,
                FOREIGN KEY (game_id) REFERENCES games(game_id)
            );
            CREATE INDEX IF NOT EXISTS idx_turns_game_turn ON turns(game_id, turn_number);
            CREATE INDEX IF NOT EXISTS idx_rooms_game ON rooms(game_id);
            CREATE INDEX IF NOT EXISTS idx_items_game ON items(game_id);
            CREATE INDEX IF NOT EXISTS idx_puzzles_game ON puzzles(game_id);
            CREATE INDEX IF NOT EXISTS idx_metrics_game ON metrics(game_id);",
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Games
    // ------------------------------------------------------------------

    /// Create a new game session and return its id.
    pub fn create_game(&self, game_file: &str) -> JournalResult<i64> {
        self.conn.execute(
            "INSERT INTO games (game_file, start_time, status, total_turns)
             VALUES (?1, ?2, 'playing', 0)",
            params![game_file, now_timestamp()],
        )?;
        let game_id = self.conn.last_insert_rowid();
        tracing::info!(game_id, game_file, "created game session");
        Ok(game_id)
    }

    /// Mark a game session as ended.
    pub fn end_game(&self, game_id: i64, status: GameStatus, total_turns: u32) -> JournalResult<()> {
        self.conn.execute(
            "UPDATE games SET end_time = ?1, status = ?2, total_turns = ?3 WHERE game_id = ?4",
            params![now_timestamp(), status.as_str(), total_turns, game_id],
        )?;
        tracing::info!(game_id, %status, total_turns, "game ended");
        Ok(())
    }

    /// The most recent game still marked as playing, for crash recovery.
    pub fn get_active_game(&self) -> JournalResult<Option<(i64, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT game_id, game_file FROM games
             WHERE status = 'playing' ORDER BY start_time DESC LIMIT 1",
        )?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Ok(Some((row.get(0)?, row.get(1)?))),
            None => Ok(None),
        }
    }

    /// Metadata for one game session.
    pub fn get_game(&self, game_id: i64) -> JournalResult<Option<GameSession>> {
        let mut stmt = self.conn.prepare("SELECT * FROM games WHERE game_id = ?1")?;
        let mut rows = stmt.query(params![game_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_game(row)?)),
            None => Ok(None),
        }
    }

    /// All game sessions, newest first.
    pub fn get_all_games(&self) -> JournalResult<Vec<GameSession>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM games ORDER BY start_time DESC")?;
        let mut rows = stmt.query([])?;
        let mut games = Vec::new();
        while let Some(row) = rows.next()? {
            games.push(row_to_game(row)?);
        }
        Ok(games)
    }

    // ------------------------------------------------------------------
    // Turns
    // ------------------------------------------------------------------

    /// Save a turn record. Upserts on `(game_id, turn_number)` so a crash
    /// replay of the same turn is harmless.
    pub fn save_turn(&self, turn: &TurnRecord) -> JournalResult<()> {
        save_turn_tx(&self.conn, turn)
    }

    /// All turns for a game, ordered by turn number.
    pub fn get_turns(&self, game_id: i64) -> JournalResult<Vec<TurnRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM turns WHERE game_id = ?1 ORDER BY turn_number",
        )?;
        let mut rows = stmt.query(params![game_id])?;
        let mut turns = Vec::new();
        while let Some(row) = rows.next()? {
            turns.push(row_to_turn(row)?);
        }
        Ok(turns)
    }

    /// A specific turn, if journaled.
    pub fn get_turn(&self, game_id: i64, turn_number: u32) -> JournalResult<Option<TurnRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM turns WHERE game_id = ?1 AND turn_number = ?2",
        )?;
        let mut rows = stmt.query(params![game_id, turn_number])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_turn(row)?)),
            None => Ok(None),
        }
    }

    /// The most recent journaled turn for a game.
    pub fn get_latest_turn(&self, game_id: i64) -> JournalResult<Option<TurnRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM turns WHERE game_id = ?1 ORDER BY turn_number DESC LIMIT 1",
        )?;
        let mut rows = stmt.query(params![game_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_turn(row)?)),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // World state
    // ------------------------------------------------------------------

    /// Save or update a room.
    pub fn save_room(&self, game_id: i64, room: &Room) -> JournalResult<()> {
        save_room_tx(&self.conn, game_id, room)
    }

    /// All rooms for a game.
    pub fn get_rooms(&self, game_id: i64) -> JournalResult<Vec<Room>> {
        let mut stmt = self.conn.prepare("SELECT * FROM rooms WHERE game_id = ?1")?;
        let mut rows = stmt.query(params![game_id])?;
        let mut rooms = Vec::new();
        while let Some(row) = rows.next()? {
            rooms.push(row_to_room(row)?);
        }
        Ok(rooms)
    }

    /// Save or update a connection.
    pub fn save_connection(&self, game_id: i64, connection: &Connection) -> JournalResult<()> {
        save_connection_tx(&self.conn, game_id, connection)
    }

    /// All connections for a game.
    pub fn get_connections(&self, game_id: i64) -> JournalResult<Vec<Connection>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM connections WHERE game_id = ?1")?;
        let mut rows = stmt.query(params![game_id])?;
        let mut connections = Vec::new();
        while let Some(row) = rows.next()? {
            connections.push(row_to_connection(row)?);
        }
        Ok(connections)
    }

    /// Save or update an item.
    pub fn save_item(&self, game_id: i64, item: &Item) -> JournalResult<()> {
        save_item_tx(&self.conn, game_id, item)
    }

    /// All items for a game.
    pub fn get_items(&self, game_id: i64) -> JournalResult<Vec<Item>> {
        let mut stmt = self.conn.prepare("SELECT * FROM items WHERE game_id = ?1")?;
        let mut rows = stmt.query(params![game_id])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(row_to_item(row)?);
        }
        Ok(items)
    }

    /// Save or update a puzzle.
    pub fn save_puzzle(&self, game_id: i64, puzzle: &Puzzle) -> JournalResult<()> {
        save_puzzle_tx(&self.conn, game_id, puzzle)
    }

    /// Puzzles for a game, optionally filtered by status.
    pub fn get_puzzles(
        &self,
        game_id: i64,
        status: Option<PuzzleStatus>,
    ) -> JournalResult<Vec<Puzzle>> {
        let mut puzzles = Vec::new();
        match status {
            Some(status) => {
                let mut stmt = self.conn.prepare(
                    "SELECT * FROM puzzles WHERE game_id = ?1 AND status = ?2 ORDER BY puzzle_id",
                )?;
                let mut rows = stmt.query(params![game_id, status.as_str()])?;
                while let Some(row) = rows.next()? {
                    puzzles.push(row_to_puzzle(row)?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT * FROM puzzles WHERE game_id = ?1 ORDER BY puzzle_id",
                )?;
                let mut rows = stmt.query(params![game_id])?;
                while let Some(row) = rows.next()? {
                    puzzles.push(row_to_puzzle(row)?);
                }
            }
        }
        Ok(puzzles)
    }

    /// Save or update a maze group.
    pub fn save_maze_group(&self, game_id: i64, maze: &MazeGroup) -> JournalResult<()> {
        save_maze_group_tx(&self.conn, game_id, maze)
    }

    /// All maze groups for a game.
    pub fn get_maze_groups(&self, game_id: i64) -> JournalResult<Vec<MazeGroup>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM maze_groups WHERE game_id = ?1")?;
        let mut rows = stmt.query(params![game_id])?;
        let mut groups = Vec::new();
        while let Some(row) = rows.next()? {
            groups.push(row_to_maze_group(row)?);
        }
        Ok(groups)
    }

    /// Record one language-model call's usage.
    pub fn save_metric(&self, metric: &CallMetric) -> JournalResult<()> {
        save_metric_tx(&self.conn, metric)
    }

    /// All metrics for a game, ordered by turn.
    pub fn get_metrics(&self, game_id: i64) -> JournalResult<Vec<CallMetric>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM metrics WHERE game_id = ?1 ORDER BY turn_number",
        )?;
        let mut rows = stmt.query(params![game_id])?;
        let mut metrics = Vec::new();
        while let Some(row) = rows.next()? {
            metrics.push(CallMetric {
                game_id: row.get("game_id")?,
                turn_number: row.get("turn_number")?,
                agent_name: row.get("agent_name")?,
                provider: row.get("provider")?,
                model: row.get("model")?,
                input_tokens: row.get("input_tokens")?,
                output_tokens: row.get("output_tokens")?,
                cached_tokens: row.get("cached_tokens")?,
                cost_estimate: row.get("cost_estimate")?,
                latency_ms: row.get("latency_ms")?,
            });
        }
        Ok(metrics)
    }

    // ------------------------------------------------------------------
    // Batch commit
    // ------------------------------------------------------------------

    /// Write one turn's full state — the turn record plus every room,
    /// connection, item, puzzle, maze group, and metric touched this turn —
    /// in a single transaction. `removed_rooms` are ids retired by maze
    /// reassignment, deleted in the same transaction that inserts their
    /// replacements.
    #[allow(clippy::too_many_arguments)]
    pub fn commit_turn(
        &mut self,
        turn: &TurnRecord,
        rooms: &[Room],
        connections: &[Connection],
        items: &[Item],
        puzzles: &[Puzzle],
        maze_groups: &[MazeGroup],
        removed_rooms: &[String],
        metrics: &[CallMetric],
    ) -> JournalResult<()> {
        let game_id = turn.game_id;
        let tx = self.conn.transaction()?;
        save_turn_tx(&tx, turn)?;
        for room_id in removed_rooms {
            tx.execute(
                "DELETE FROM rooms WHERE game_id = ?1 AND room_id = ?2",
                params![game_id, room_id],
            )?;
            tx.execute(
                "DELETE FROM connections WHERE game_id = ?1 AND (from_room_id = ?2 OR to_room_id = ?2)",
                params![game_id, room_id],
            )?;
        }
        for room in rooms {
            save_room_tx(&tx, game_id, room)?;
        }
        for connection in connections {
            save_connection_tx(&tx, game_id, connection)?;
        }
        for item in items {
            save_item_tx(&tx, game_id, item)?;
        }
        for puzzle in puzzles {
            save_puzzle_tx(&tx, game_id, puzzle)?;
        }
        for maze in maze_groups {
            save_maze_group_tx(&tx, game_id, maze)?;
        }
        for metric in metrics {
            save_metric_tx(&tx, metric)?;
        }
        tx.commit()?;
        tracing::debug!(
            game_id,
            turn = turn.turn_number,
            rooms = rooms.len(),
            items = items.len(),
            puzzles = puzzles.len(),
            "committed turn"
        );
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Row mapping & shared statements (usable inside a transaction)
// ----------------------------------------------------------------------

fn save_turn_tx(conn: &rusqlite::Connection, turn: &TurnRecord) -> JournalResult<()> {
    conn.execute(
        "INSERT INTO turns (
            game_id, turn_number, timestamp, command_sent, game_output,
            room_id, inventory_snapshot, agent_reasoning
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(game_id, turn_number) DO UPDATE SET
            timestamp = excluded.timestamp,
            command_sent = excluded.command_sent,
            game_output = excluded.game_output,
            room_id = excluded.room_id,
            inventory_snapshot = excluded.inventory_snapshot,
            agent_reasoning = excluded.agent_reasoning",
        params![
            turn.game_id,
            turn.turn_number,
            turn.timestamp,
            turn.command_sent,
            turn.game_output,
            turn.room_id,
            serde_json::to_string(&turn.inventory_snapshot)?,
            turn.agent_reasoning,
        ],
    )?;
    Ok(())
}

fn save_room_tx(conn: &rusqlite::Connection, game_id: i64, room: &Room) -> JournalResult<()> {
    conn.execute(
        "INSERT INTO rooms (
            game_id, room_id, name, description, visited, visit_count,
            is_dark, maze_group, maze_marker_item, first_visited_turn,
            last_visited_turn, exits
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(game_id, room_id) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            visited = excluded.visited,
            visit_count = excluded.visit_count,
            is_dark = excluded.is_dark,
            maze_group = excluded.maze_group,
            maze_marker_item = excluded.maze_marker_item,
            last_visited_turn = excluded.last_visited_turn,
            exits = excluded.exits",
        params![
            game_id,
            room.room_id,
            room.name,
            room.description,
            room.visited,
            room.visit_count,
            room.is_dark,
            room.maze_group,
            room.maze_marker_item,
            room.first_visited_turn,
            room.last_visited_turn,
            serde_json::to_string(&room.exits)?,
        ],
    )?;
    Ok(())
}

fn save_connection_tx(
    conn: &rusqlite::Connection,
    game_id: i64,
    connection: &Connection,
) -> JournalResult<()> {
    conn.execute(
        "INSERT INTO connections (
            game_id, from_room_id, to_room_id, direction, bidirectional,
            blocked, block_reason, teleport, random, observed_destinations
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(game_id, from_room_id, direction) DO UPDATE SET
            to_room_id = excluded.to_room_id,
            bidirectional = excluded.bidirectional,
            blocked = excluded.blocked,
            block_reason = excluded.block_reason,
            teleport = excluded.teleport,
            random = excluded.random,
            observed_destinations = excluded.observed_destinations",
        params![
            game_id,
            connection.from_room,
            connection.to_room,
            connection.direction,
            connection.bidirectional,
            connection.blocked,
            connection.block_reason,
            connection.teleport,
            connection.random,
            serde_json::to_string(&connection.observed_destinations)?,
        ],
    )?;
    Ok(())
}

fn save_item_tx(conn: &rusqlite::Connection, game_id: i64, item: &Item) -> JournalResult<()> {
    conn.execute(
        "INSERT INTO items (
            game_id, item_id, name, description, location, portable,
            properties, first_seen_turn, last_seen_turn
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(game_id, item_id) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            location = excluded.location,
            portable = excluded.portable,
            properties = excluded.properties,
            last_seen_turn = excluded.last_seen_turn",
        params![
            game_id,
            item.item_id,
            item.name,
            item.description,
            item.location.to_string(),
            item.portable.as_db(),
            serde_json::to_string(&item.properties)?,
            item.first_seen_turn,
            item.last_seen_turn,
        ],
    )?;
    Ok(())
}

fn save_puzzle_tx(conn: &rusqlite::Connection, game_id: i64, puzzle: &Puzzle) -> JournalResult<()> {
    conn.execute(
        "INSERT INTO puzzles (
            game_id, puzzle_id, description, status, location,
            related_items, attempts, created_turn, solved_turn
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(game_id, puzzle_id) DO UPDATE SET
            description = excluded.description,
            status = excluded.status,
            location = excluded.location,
            related_items = excluded.related_items,
            attempts = excluded.attempts,
            solved_turn = excluded.solved_turn",
        params![
            game_id,
            puzzle.puzzle_id,
            puzzle.description,
            puzzle.status.as_str(),
            puzzle.location,
            serde_json::to_string(&puzzle.related_items)?,
            serde_json::to_string(&puzzle.attempts)?,
            puzzle.created_turn,
            puzzle.solved_turn,
        ],
    )?;
    Ok(())
}

fn save_maze_group_tx(
    conn: &rusqlite::Connection,
    game_id: i64,
    maze: &MazeGroup,
) -> JournalResult<()> {
    conn.execute(
        "INSERT INTO maze_groups (
            game_id, group_id, entry_room_id, room_ids, exit_room_ids,
            markers, fully_mapped, created_turn, completed_turn
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(game_id, group_id) DO UPDATE SET
            entry_room_id = excluded.entry_room_id,
            room_ids = excluded.room_ids,
            exit_room_ids = excluded.exit_room_ids,
            markers = excluded.markers,
            fully_mapped = excluded.fully_mapped,
            completed_turn = excluded.completed_turn",
        params![
            game_id,
            maze.group_id,
            maze.entry_room_id,
            serde_json::to_string(&maze.room_ids)?,
            serde_json::to_string(&maze.exit_room_ids)?,
            serde_json::to_string(&maze.markers)?,
            maze.fully_mapped,
            maze.created_turn,
            maze.completed_turn,
        ],
    )?;
    Ok(())
}

fn save_metric_tx(conn: &rusqlite::Connection, metric: &CallMetric) -> JournalResult<()> {
    conn.execute(
        "INSERT INTO metrics (
            game_id, turn_number, agent_name, provider, model,
            input_tokens, output_tokens, cached_tokens, cost_estimate, latency_ms
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            metric.game_id,
            metric.turn_number,
            metric.agent_name,
            metric.provider,
            metric.model,
            metric.input_tokens,
            metric.output_tokens,
            metric.cached_tokens,
            metric.cost_estimate,
            metric.latency_ms,
        ],
    )?;
    Ok(())
}

fn row_to_game(row: &rusqlite::Row<'_>) -> JournalResult<GameSession> {
    let status: String = row.get("status")?;
    Ok(GameSession {
        game_id: row.get("game_id")?,
        game_file: row.get("game_file")?,
        start_time: row.get("start_time")?,
        end_time: row.get("end_time")?,
        status: GameStatus::parse(&status).unwrap_or(GameStatus::Abandoned),
        total_turns: row.get("total_turns")?,
    })
}

fn row_to_turn(row: &rusqlite::Row<'_>) -> JournalResult<TurnRecord> {
    let snapshot: String = row.get("inventory_snapshot")?;
    Ok(TurnRecord {
        game_id: row.get("game_id")?,
        turn_number: row.get("turn_number")?,
        timestamp: row.get("timestamp")?,
        command_sent: row.get("command_sent")?,
        game_output: row.get("game_output")?,
        room_id: row.get("room_id")?,
        inventory_snapshot: serde_json::from_str(&snapshot)?,
        agent_reasoning: row.get::<_, Option<String>>("agent_reasoning")?.unwrap_or_default(),
    })
}

fn row_to_room(row: &rusqlite::Row<'_>) -> JournalResult<Room> {
    let exits: String = row.get("exits")?;
    Ok(Room {
        room_id: row.get("room_id")?,
        name: row.get("name")?,
        description: row.get::<_, Option<String>>("description")?.unwrap_or_default(),
        visited: row.get("visited")?,
        visit_count: row.get("visit_count")?,
        is_dark: row.get("is_dark")?,
        maze_group: row.get("maze_group")?,
        maze_marker_item: row.get("maze_marker_item")?,
        first_visited_turn: row.get("first_visited_turn")?,
        last_visited_turn: row.get("last_visited_turn")?,
        exits: serde_json::from_str(&exits)?,
    })
}

fn row_to_connection(row: &rusqlite::Row<'_>) -> JournalResult<Connection> {
    let observed: String = row.get("observed_destinations")?;
    Ok(Connection {
        from_room: row.get("from_room_id")?,
        to_room: row.get("to_room_id")?,
        direction: row.get("direction")?,
        bidirectional: row.get("bidirectional")?,
        blocked: row.get("blocked")?,
        block_reason: row.get("block_reason")?,
        teleport: row.get("teleport")?,
        random: row.get("random")?,
        observed_destinations: serde_json::from_str(&observed)?,
    })
}

fn row_to_item(row: &rusqlite::Row<'_>) -> JournalResult<Item> {
    let location: String = row.get("location")?;
    let properties: String = row.get("properties")?;
    Ok(Item {
        item_id: row.get("item_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        location: location.into(),
        portable: Portability::from_db(row.get("portable")?),
        properties: serde_json::from_str(&properties)?,
        first_seen_turn: row.get("first_seen_turn")?,
        last_seen_turn: row.get("last_seen_turn")?,
    })
}

fn row_to_puzzle(row: &rusqlite::Row<'_>) -> JournalResult<Puzzle> {
    let status: String = row.get("status")?;
    let related: String = row.get("related_items")?;
    let attempts: String = row.get("attempts")?;
    Ok(Puzzle {
        puzzle_id: row.get("puzzle_id")?,
        description: row.get("description")?,
        status: PuzzleStatus::parse(&status).unwrap_or(PuzzleStatus::Open),
        location: row.get("location")?,
        related_items: serde_json::from_str(&related)?,
        attempts: serde_json::from_str(&attempts)?,
        created_turn: row.get("created_turn")?,
        solved_turn: row.get("solved_turn")?,
    })
}

fn row_to_maze_group(row: &rusqlite::Row<'_>) -> JournalResult<MazeGroup> {
    let room_ids: String = row.get("room_ids")?;
    let exit_room_ids: String = row.get("exit_room_ids")?;
    let markers: String = row.get("markers")?;
    Ok(MazeGroup {
        group_id: row.get("group_id")?,
        entry_room_id: row.get("entry_room_id")?,
        room_ids: serde_json::from_str(&room_ids)?,
        exit_room_ids: serde_json::from_str(&exit_room_ids)?,
        markers: serde_json::from_str(&markers)?,
        fully_mapped: row.get("fully_mapped")?,
        created_turn: row.get("created_turn")?,
        completed_turn: row.get("completed_turn")?,
    })
}
