//! Graph-based map manager.
//!
//! Maintains a directed graph of rooms and labelled connections, provides
//! pathfinding, tracks unexplored exits and blocked paths, and owns maze
//! detection and maze-group records. The DFS solver that resolves a maze
//! lives in [`crate::maze`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::timeout;

use crate::error::JournalResult;
use crate::journal::Journal;
use crate::llm::{ChatMessage, ChatRequest, Completion, LlmClient};
use crate::world::{
    normalize_id, normalize_text, CallMetric, Connection, MapSummary, MazeGroup, Room, RoomUpdate,
};

/// How many recent room descriptions to keep for maze detection.
const DESCRIPTION_BUFFER: usize = 30;

/// Consecutive non-reciprocal transitions that trigger maze detection.
const NONRECIPROCAL_TRIGGER: u32 = 4;

/// Besides the current room, how many similar rooms trigger maze detection.
const SIMILAR_ROOMS_TRIGGER: usize = 2;

const MAP_PARSER_PROMPT: &str = "You parse text adventure game output. Extract the room state: \
whether the player is in a different room than before, the room name, its full description, \
the exits mentioned, whether it is dark, and any items visible. Return nulls rather than \
guessing; never invent rooms or exits that the text does not mention.";

/// Get the compass reverse of a direction, if it has one.
pub(crate) fn reverse_direction(direction: &str) -> Option<&'static str> {
    match direction {
        "north" => Some("south"),
        "south" => Some("north"),
        "east" => Some("west"),
        "west" => Some("east"),
        "northeast" => Some("southwest"),
        "northwest" => Some("southeast"),
        "southeast" => Some("northwest"),
        "southwest" => Some("northeast"),
        "up" => Some("down"),
        "down" => Some("up"),
        "in" => Some("out"),
        "out" => Some("in"),
        _ => None,
    }
}

fn expand_abbreviation(token: &str) -> &str {
    match token {
        "n" => "north",
        "s" => "south",
        "e" => "east",
        "w" => "west",
        "ne" => "northeast",
        "nw" => "northwest",
        "se" => "southeast",
        "sw" => "southwest",
        "u" => "up",
        "d" => "down",
        other => other,
    }
}

const DIRECTIONS: &[&str] = &[
    "north",
    "south",
    "east",
    "west",
    "northeast",
    "northwest",
    "southeast",
    "southwest",
    "up",
    "down",
    "in",
    "out",
];

/// Extract the movement direction from a command, if it is one.
///
/// Handles bare directions, one-letter abbreviations, and "go <dir>".
/// Commands like "enter building" are passed through whole so the edge
/// keeps the token that actually worked.
pub(crate) fn extract_direction(command: &str) -> Option<String> {
    let lowered = command.trim().to_lowercase();
    let expanded = expand_abbreviation(&lowered);
    if DIRECTIONS.contains(&expanded) {
        return Some(expanded.to_string());
    }
    if let Some(rest) = lowered.strip_prefix("go ") {
        let expanded = expand_abbreviation(rest.trim());
        if DIRECTIONS.contains(&expanded) {
            return Some(expanded.to_string());
        }
    }
    if lowered.starts_with("enter ") || lowered.starts_with("exit ") || lowered.starts_with("climb ")
    {
        return Some(lowered);
    }
    for word in lowered.split_whitespace() {
        let expanded = expand_abbreviation(word);
        if DIRECTIONS.contains(&expanded) {
            return Some(expanded.to_string());
        }
    }
    None
}

/// Directed graph of rooms and connections, plus maze bookkeeping.
pub struct MapGraph {
    llm: Arc<dyn LlmClient>,
    llm_timeout: Duration,
    similarity_threshold: f64,

    rooms: HashMap<String, Room>,
    /// from-room -> direction -> edge; the key mirrors the journal's
    /// natural key for connections.
    connections: HashMap<String, HashMap<String, Connection>>,
    current_room_id: Option<String>,

    /// Sliding buffer of (room_id, description) for maze detection.
    recent_descriptions: VecDeque<(String, String)>,
    maze_groups: HashMap<String, MazeGroup>,
    active_maze: Option<String>,
    maze_seq: HashMap<String, u32>,
    /// Last observed movement (from, direction, to).
    last_transition: Option<(String, String, String)>,
    nonreciprocal_streak: u32,

    dirty_rooms: HashSet<String>,
    dirty_connections: HashSet<(String, String)>,
    dirty_mazes: HashSet<String>,
    /// (old, new) id pairs from maze reassignment, for item relocation.
    renames: Vec<(String, String)>,
    /// Room ids retired by maze reassignment, pending journal cleanup.
    removed_rooms: Vec<String>,

    last_metric: Option<CallMetric>,
}

impl MapGraph {
    pub fn new(llm: Arc<dyn LlmClient>, llm_timeout: Duration, similarity_threshold: f64) -> Self {
        Self {
            llm,
            llm_timeout,
            similarity_threshold,
            rooms: HashMap::new(),
            connections: HashMap::new(),
            current_room_id: None,
            recent_descriptions: VecDeque::new(),
            maze_groups: HashMap::new(),
            active_maze: None,
            maze_seq: HashMap::new(),
            last_transition: None,
            nonreciprocal_streak: 0,
            dirty_rooms: HashSet::new(),
            dirty_connections: HashSet::new(),
            dirty_mazes: HashSet::new(),
            renames: Vec::new(),
            removed_rooms: Vec::new(),
            last_metric: None,
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn current_room_id(&self) -> Option<&str> {
        self.current_room_id.as_deref()
    }

    pub fn get_room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn get_current_room(&self) -> Option<&Room> {
        self.current_room_id.as_deref().and_then(|id| self.rooms.get(id))
    }

    pub fn get_all_rooms(&self) -> Vec<&Room> {
        self.rooms.values().collect()
    }

    pub fn get_connection(&self, from_room: &str, direction: &str) -> Option<&Connection> {
        self.connections.get(from_room).and_then(|e| e.get(direction))
    }

    /// Compact map statistics for agent context.
    pub fn get_map_summary(&self) -> MapSummary {
        MapSummary {
            rooms_visited: self.rooms.values().filter(|r| r.visited).count(),
            rooms_total: self.rooms.len(),
            unexplored_count: self.get_unexplored_exits(None).len(),
            current_room: self
                .current_room_id
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
        }
    }

    // ------------------------------------------------------------------
    // Parsing & graph mutation
    // ------------------------------------------------------------------

    /// Parse game output with the map-parser agent and fold the result
    /// into the graph.
    ///
    /// Parser timeouts and schema failures are non-fatal: the turn
    /// proceeds with a no-change delta and a warning.
    pub async fn update_from_game_output(
        &mut self,
        output_text: &str,
        command: &str,
        turn: u32,
    ) -> RoomUpdate {
        let schema = json!({
            "type": "object",
            "properties": {
                "room_changed": {"type": "boolean"},
                "room_name": {"type": ["string", "null"]},
                "description": {"type": ["string", "null"]},
                "exits": {"type": "array", "items": {"type": "string"}},
                "is_dark": {"type": "boolean"},
                "items_seen": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["room_changed", "room_name", "description", "exits", "is_dark"]
        });
        let request = ChatRequest::new(MAP_PARSER_PROMPT)
            .with_message(ChatMessage::user(format!(
                "Command: {command}\nOutput:\n{output_text}"
            )))
            .with_temperature(0.1)
            .with_max_tokens(512);

        let parsed = match timeout(self.llm_timeout, self.llm.complete_json(request, &schema)).await
        {
            Ok(Ok((value, completion))) => {
                self.record_metric(&completion, turn);
                value
            }
            Ok(Err(err)) => {
                tracing::warn!(%err, "map parser call failed, proceeding with empty delta");
                return RoomUpdate::no_change(self.current_room_id.as_deref());
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.llm_timeout.as_millis() as u64,
                    "map parser call timed out, proceeding with empty delta"
                );
                return RoomUpdate::no_change(self.current_room_id.as_deref());
            }
        };

        let room_changed = parsed
            .get("room_changed")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let room_name = parsed
            .get("room_name")
            .and_then(Value::as_str)
            .map(str::to_string);
        let description = parsed
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        let exits: Vec<String> = parsed
            .get("exits")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.trim().to_lowercase())
                    .collect()
            })
            .unwrap_or_default();
        let is_dark = parsed.get("is_dark").and_then(Value::as_bool).unwrap_or(false);
        let items_seen: Vec<String> = parsed
            .get("items_seen")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        // Inside a maze only movement changes rooms; a `look` that appears
        // to land in a "different" identical room is the same room.
        let look_in_maze = self
            .current_room_id
            .as_ref()
            .and_then(|id| self.rooms.get(id))
            .map(|r| r.maze_group.is_some())
            .unwrap_or(false)
            && matches!(command.trim().to_lowercase().as_str(), "look" | "l");

        if !room_changed || room_name.is_none() || look_in_maze {
            // Same room: refresh the description and visit stamp only.
            if let Some(current) = self.current_room_id.clone() {
                if let Some(room) = self.rooms.get_mut(&current) {
                    room.last_visited_turn = Some(turn);
                    if let Some(desc) = &description {
                        if !desc.is_empty() && *desc != room.description {
                            room.description = desc.clone();
                        }
                    }
                    room.is_dark = is_dark;
                    self.dirty_rooms.insert(current);
                }
            }
            return RoomUpdate {
                room_changed: false,
                room_id: self.current_room_id.clone(),
                room_name,
                description,
                exits,
                is_dark,
                new_room: false,
                items_seen,
            };
        }
        let room_name = room_name.unwrap_or_default();
        let description = description.unwrap_or_default();

        // Resolve the room's identity. In maze territory (active, or
        // moving out of a mapped maze room) identity goes by marker items
        // and known edges rather than the (identical) name.
        let previous_room = self.current_room_id.clone();
        let maze_context = self.active_maze.clone().or_else(|| {
            previous_room
                .as_deref()
                .and_then(|id| self.rooms.get(id))
                .and_then(|r| r.maze_group.clone())
        });
        let (room_id, new_room) = match maze_context {
            Some(group_id) if self.arrival_matches_maze(&group_id, &description) => {
                self.resolve_maze_room(&group_id, &items_seen, previous_room.as_deref(), command)
            }
            _ => {
                let id = normalize_id(&room_name);
                let new = !self.rooms.contains_key(&id);
                (id, new)
            }
        };

        if new_room {
            let mut room = Room::new(room_id.clone(), room_name.clone());
            room.description = description.clone();
            room.visited = true;
            room.visit_count = 1;
            room.is_dark = is_dark;
            room.first_visited_turn = Some(turn);
            room.last_visited_turn = Some(turn);
            if let Some(group_id) = &self.active_maze {
                if self
                    .maze_groups
                    .get(group_id)
                    .map(|g| g.room_ids.contains(&room_id))
                    .unwrap_or(false)
                {
                    room.maze_group = Some(group_id.clone());
                }
            }
            for exit in &exits {
                room.exits.entry(exit.clone()).or_insert(None);
            }
            self.rooms.insert(room_id.clone(), room);
            tracing::debug!(room_id = %room_id, name = %room_name, "new room");
        } else if let Some(room) = self.rooms.get_mut(&room_id) {
            room.visited = true;
            room.visit_count += 1;
            room.last_visited_turn = Some(turn);
            room.is_dark = is_dark;
            if !description.is_empty() {
                room.description = description.clone();
            }
            for exit in &exits {
                room.exits.entry(exit.clone()).or_insert(None);
            }
        }
        self.dirty_rooms.insert(room_id.clone());

        // Record the traversal edge from wherever we came from.
        if let Some(prev) = previous_room {
            if prev != room_id {
                self.record_movement(&prev, command, &room_id);
                if let Some(group_id) = self.active_maze.clone() {
                    // Leaving the maze through an untracked exit.
                    let from_maze = self
                        .rooms
                        .get(&prev)
                        .map(|r| r.maze_group.as_deref() == Some(group_id.as_str()))
                        .unwrap_or(false);
                    let to_maze = self
                        .rooms
                        .get(&room_id)
                        .map(|r| r.maze_group.is_some())
                        .unwrap_or(false);
                    if from_maze && !to_maze {
                        if let Some(group) = self.maze_groups.get_mut(&group_id) {
                            if !group.exit_room_ids.contains(&room_id) {
                                group.exit_room_ids.push(room_id.clone());
                                self.dirty_mazes.insert(group_id.clone());
                            }
                        }
                    }
                }
            }
        }

        self.current_room_id = Some(room_id.clone());
        if !description.is_empty() {
            self.recent_descriptions
                .push_back((room_id.clone(), description.clone()));
            while self.recent_descriptions.len() > DESCRIPTION_BUFFER {
                self.recent_descriptions.pop_front();
            }
        }

        RoomUpdate {
            room_changed: true,
            room_id: Some(room_id),
            room_name: Some(room_name),
            description: Some(description),
            exits,
            is_dark,
            new_room,
            items_seen,
        }
    }

    /// Create or reconcile the edge for a movement `from --command--> to`.
    fn record_movement(&mut self, from: &str, command: &str, to: &str) {
        // A look cannot move the player; seeing a different room after one
        // (post-restore, darkness lifting) carries no edge evidence.
        if matches!(command.trim().to_lowercase().as_str(), "look" | "l") {
            self.last_transition = None;
            return;
        }
        let direction = match extract_direction(command) {
            Some(dir) => dir,
            None => {
                // Room changed without a movement command: an involuntary
                // or magical transition. Record it one-way.
                let mut edge = Connection::new(from, to, command.trim().to_lowercase());
                edge.bidirectional = false;
                edge.teleport = true;
                self.insert_edge(edge);
                self.last_transition = None;
                return;
            }
        };

        let in_maze = self
            .rooms
            .get(from)
            .map(|r| r.maze_group.is_some())
            .unwrap_or(false);

        let existing = self
            .connections
            .get(from)
            .and_then(|e| e.get(&direction))
            .cloned();
        match existing {
            None => {
                let mut edge = Connection::new(from, to, direction.clone());
                // Maze connections are recorded one-way; reciprocity in a
                // maze is evidence, not an assumption.
                edge.bidirectional = !in_maze;
                self.insert_edge(edge.clone());
                if edge.bidirectional {
                    self.insert_implicit_reverse(&edge);
                }
            }
            Some(edge) if edge.to_room == to => {}
            Some(mut edge) => {
                if in_maze {
                    // A previously mapped maze transition arrived somewhere
                    // else: the connection is randomized.
                    if !edge.random {
                        edge.random = true;
                        if !edge.observed_destinations.contains(&edge.to_room) {
                            edge.observed_destinations.push(edge.to_room.clone());
                        }
                    }
                    if !edge.observed_destinations.contains(&to.to_string()) {
                        edge.observed_destinations.push(to.to_string());
                    }
                    tracing::info!(
                        from,
                        %direction,
                        destinations = edge.observed_destinations.len(),
                        "maze connection marked random"
                    );
                    self.insert_edge(edge);
                } else {
                    // Reciprocity demotion: the stale edge was an implicit
                    // reverse that the world contradicted. Re-point it; the
                    // forward edge that produced it is untouched.
                    tracing::debug!(
                        from,
                        %direction,
                        was = %edge.to_room,
                        now = to,
                        "demoting implicit reverse edge"
                    );
                    let mut replacement = Connection::new(from, to, direction.clone());
                    replacement.bidirectional = true;
                    self.insert_edge(replacement.clone());
                    self.insert_implicit_reverse(&replacement);
                }
            }
        }

        // Track non-reciprocal movement for the secondary maze trigger.
        if let Some((prev_from, prev_dir, prev_to)) = self.last_transition.clone() {
            if prev_to == from && reverse_direction(&prev_dir) == Some(direction.as_str()) {
                if to == prev_from {
                    self.nonreciprocal_streak = 0;
                } else {
                    self.nonreciprocal_streak += 1;
                }
            }
        }
        self.last_transition = Some((from.to_string(), direction, to.to_string()));
    }

    fn insert_edge(&mut self, edge: Connection) {
        if let Some(room) = self.rooms.get_mut(&edge.from_room) {
            room.exits
                .insert(edge.direction.clone(), Some(edge.to_room.clone()));
            self.dirty_rooms.insert(edge.from_room.clone());
        }
        self.dirty_connections
            .insert((edge.from_room.clone(), edge.direction.clone()));
        self.connections
            .entry(edge.from_room.clone())
            .or_default()
            .insert(edge.direction.clone(), edge);
    }

    /// Add the reverse edge implied by a bidirectional connection, unless
    /// an observed edge already occupies that slot or the direction has no
    /// compass reverse.
    fn insert_implicit_reverse(&mut self, edge: &Connection) {
        let Some(reverse) = reverse_direction(&edge.direction) else {
            return;
        };
        let occupied = self
            .connections
            .get(&edge.to_room)
            .map(|e| e.contains_key(reverse))
            .unwrap_or(false);
        if occupied {
            return;
        }
        let mut back = Connection::new(edge.to_room.clone(), edge.from_room.clone(), reverse);
        back.bidirectional = true;
        self.insert_edge(back);
    }

    // ------------------------------------------------------------------
    // Pathfinding & exploration
    // ------------------------------------------------------------------

    /// Shortest path between rooms as a list of direction commands.
    /// Blocked edges are excluded. Empty if no path exists.
    pub fn get_path(&self, from_room: &str, to_room: &str) -> Vec<String> {
        if !self.rooms.contains_key(from_room) || !self.rooms.contains_key(to_room) {
            return Vec::new();
        }
        let mut visited: HashSet<&str> = HashSet::from([from_room]);
        let mut queue: VecDeque<(&str, Vec<String>)> = VecDeque::from([(from_room, Vec::new())]);
        while let Some((room, path)) = queue.pop_front() {
            if room == to_room {
                return path;
            }
            if let Some(edges) = self.connections.get(room) {
                for edge in edges.values() {
                    if edge.blocked || visited.contains(edge.to_room.as_str()) {
                        continue;
                    }
                    visited.insert(edge.to_room.as_str());
                    let mut next = path.clone();
                    next.push(edge.direction.clone());
                    queue.push_back((edge.to_room.as_str(), next));
                }
            }
        }
        Vec::new()
    }

    /// First step toward a destination, if reachable.
    pub fn get_next_step(&self, from_room: &str, to_room: &str) -> Option<String> {
        self.get_path(from_room, to_room).into_iter().next()
    }

    /// Exits mentioned in room descriptions that have never been traversed.
    pub fn get_unexplored_exits(&self, room_id: Option<&str>) -> Vec<(String, String)> {
        let mut unexplored = Vec::new();
        let rooms: Vec<&Room> = match room_id {
            Some(id) => self.rooms.get(id).into_iter().collect(),
            None => self.rooms.values().collect(),
        };
        for room in rooms {
            for (direction, destination) in &room.exits {
                if destination.is_none() {
                    unexplored.push((room.room_id.clone(), direction.clone()));
                }
            }
        }
        unexplored.sort();
        unexplored
    }

    /// The nearest room with unexplored exits and the path to it.
    pub fn get_nearest_unexplored(&self, from_room: &str) -> Option<(String, Vec<String>)> {
        if !self.rooms.contains_key(from_room) {
            return None;
        }
        let mut visited: HashSet<&str> = HashSet::from([from_room]);
        let mut queue: VecDeque<(&str, Vec<String>)> = VecDeque::from([(from_room, Vec::new())]);
        while let Some((room, path)) = queue.pop_front() {
            if !self.get_unexplored_exits(Some(room)).is_empty() {
                return Some((room.to_string(), path));
            }
            if let Some(edges) = self.connections.get(room) {
                for edge in edges.values() {
                    if edge.blocked || visited.contains(edge.to_room.as_str()) {
                        continue;
                    }
                    visited.insert(edge.to_room.as_str());
                    let mut next = path.clone();
                    next.push(edge.direction.clone());
                    queue.push_back((edge.to_room.as_str(), next));
                }
            }
        }
        None
    }

    /// Mark a path as blocked (locked door, guarded passage).
    pub fn mark_blocked(&mut self, from_room: &str, direction: &str, reason: &str) {
        if let Some(edge) = self
            .connections
            .get_mut(from_room)
            .and_then(|e| e.get_mut(direction))
        {
            edge.blocked = true;
            edge.block_reason = Some(reason.to_string());
            self.dirty_connections
                .insert((from_room.to_string(), direction.to_string()));
            tracing::info!(from_room, direction, reason, "path blocked");
        }
    }

    /// Unblock a previously blocked path.
    pub fn unblock(&mut self, from_room: &str, direction: &str) {
        if let Some(edge) = self
            .connections
            .get_mut(from_room)
            .and_then(|e| e.get_mut(direction))
        {
            edge.blocked = false;
            edge.block_reason = None;
            self.dirty_connections
                .insert((from_room.to_string(), direction.to_string()));
            tracing::info!(from_room, direction, "path unblocked");
        }
    }

    // ------------------------------------------------------------------
    // Maze detection & bookkeeping
    // ------------------------------------------------------------------

    fn descriptions_similar(&self, a: &str, b: &str) -> bool {
        strsim::normalized_levenshtein(&normalize_text(a), &normalize_text(b))
            >= self.similarity_threshold
    }

    fn arrival_matches_maze(&self, group_id: &str, description: &str) -> bool {
        let Some(group) = self.maze_groups.get(group_id) else {
            return false;
        };
        group
            .room_ids
            .first()
            .and_then(|id| self.rooms.get(id))
            .map(|room| self.descriptions_similar(description, &room.description))
            .unwrap_or(false)
    }

    /// Identify which maze room the player arrived in.
    ///
    /// Markers are authoritative. Failing a marker sighting, a
    /// previously-mapped non-random edge predicts the destination, as long
    /// as the predicted room has no marker that should have been visible.
    /// Otherwise this is a new maze room.
    fn resolve_maze_room(
        &mut self,
        group_id: &str,
        items_seen: &[String],
        previous_room: Option<&str>,
        command: &str,
    ) -> (String, bool) {
        if let Some(group) = self.maze_groups.get(group_id) {
            for item_name in items_seen {
                let item_id = normalize_id(item_name);
                if let Some((room_id, _)) =
                    group.markers.iter().find(|(_, marker)| **marker == item_id)
                {
                    return (room_id.clone(), false);
                }
            }
            if let (Some(prev), Some(direction)) = (previous_room, extract_direction(command)) {
                if let Some(edge) = self.connections.get(prev).and_then(|e| e.get(&direction)) {
                    let predicted = edge.to_room.clone();
                    // An unseen marker in the predicted room means the edge
                    // betrayed us, unless the maze is done and the markers
                    // have been picked back up.
                    let predicted_marked = group.markers.contains_key(&predicted);
                    let trustworthy = !predicted_marked || group.fully_mapped;
                    if !edge.random && trustworthy && group.room_ids.contains(&predicted) {
                        return (predicted, false);
                    }
                }
            }
            // A fully mapped maze never grows new rooms; hold position
            // rather than invent one.
            if group.fully_mapped {
                if let Some(prev) = previous_room {
                    tracing::warn!(
                        group_id,
                        prev,
                        "unresolvable arrival in completed maze, holding position"
                    );
                    return (prev.to_string(), false);
                }
            }
        }
        let seq = self.maze_seq.entry(group_id.to_string()).or_insert(0);
        let room_id = format!("maze_{}_{}", group_id, seq);
        *seq += 1;
        if let Some(group) = self.maze_groups.get_mut(group_id) {
            group.room_ids.push(room_id.clone());
            self.dirty_mazes.insert(group_id.to_string());
        }
        (room_id, true)
    }

    /// Check whether the rooms seen recently look like a maze, and if so
    /// open a maze group and reassign the involved room ids.
    ///
    /// Returns true when a maze was just detected. While a maze is already
    /// active this never triggers; rooms discovered during resolution join
    /// the active group instead.
    pub fn check_maze_condition(&mut self, room_id: &str, description: &str, turn: u32) -> bool {
        if self.active_maze.is_some() {
            return false;
        }

        // Latest description per distinct room, excluding the current one.
        let mut latest: HashMap<&str, &str> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();
        for (id, desc) in &self.recent_descriptions {
            if id == room_id {
                continue;
            }
            if !latest.contains_key(id.as_str()) {
                order.push(id.as_str());
            }
            latest.insert(id.as_str(), desc.as_str());
        }
        let similar: Vec<String> = order
            .iter()
            .filter(|id| self.descriptions_similar(latest[*id], description))
            .map(|id| id.to_string())
            .collect();

        let by_similarity = similar.len() >= SIMILAR_ROOMS_TRIGGER;
        let by_streak = self.nonreciprocal_streak >= NONRECIPROCAL_TRIGGER;
        if !by_similarity && !by_streak {
            return false;
        }
        tracing::warn!(
            similar = similar.len() + 1,
            streak = self.nonreciprocal_streak,
            "maze condition detected"
        );

        let group_id = format!("g{}", self.maze_groups.len());

        // Entry room: the last room seen whose description does not match.
        let entry_room = self
            .recent_descriptions
            .iter()
            .rev()
            .find(|(_, desc)| !self.descriptions_similar(desc, description))
            .map(|(id, _)| id.clone())
            .unwrap_or_else(|| "unknown".to_string());

        let mut group = MazeGroup::new(group_id.clone(), entry_room, turn);

        // Reassign the involved rooms to synthetic maze ids, current room
        // last so the sequence numbers follow discovery order.
        let mut involved = similar;
        involved.push(room_id.to_string());
        for old_id in involved {
            let seq = self.maze_seq.entry(group_id.clone()).or_insert(0);
            let new_id = format!("maze_{}_{}", group_id, seq);
            *seq += 1;
            self.rename_room(&old_id, &new_id);
            if let Some(room) = self.rooms.get_mut(&new_id) {
                room.maze_group = Some(group_id.clone());
            }
            self.dirty_rooms.insert(new_id.clone());
            group.room_ids.push(new_id);
        }

        self.nonreciprocal_streak = 0;
        self.dirty_mazes.insert(group_id.clone());
        self.maze_groups.insert(group_id.clone(), group);
        self.active_maze = Some(group_id);
        true
    }

    /// Rename a room in place, rewriting every reference to it.
    fn rename_room(&mut self, old_id: &str, new_id: &str) {
        if old_id == new_id || !self.rooms.contains_key(old_id) {
            return;
        }
        if let Some(mut room) = self.rooms.remove(old_id) {
            room.room_id = new_id.to_string();
            self.rooms.insert(new_id.to_string(), room);
        }
        if let Some(outgoing) = self.connections.remove(old_id) {
            let rewritten: HashMap<String, Connection> = outgoing
                .into_iter()
                .map(|(dir, mut edge)| {
                    edge.from_room = new_id.to_string();
                    (dir, edge)
                })
                .collect();
            for dir in rewritten.keys() {
                self.dirty_connections
                    .insert((new_id.to_string(), dir.clone()));
            }
            self.connections.insert(new_id.to_string(), rewritten);
        }
        for (from, edges) in self.connections.iter_mut() {
            for (dir, edge) in edges.iter_mut() {
                if edge.to_room == old_id {
                    edge.to_room = new_id.to_string();
                    self.dirty_connections.insert((from.clone(), dir.clone()));
                }
                for dest in edge.observed_destinations.iter_mut() {
                    if dest == old_id {
                        *dest = new_id.to_string();
                    }
                }
            }
        }
        for room in self.rooms.values_mut() {
            for dest in room.exits.values_mut() {
                if dest.as_deref() == Some(old_id) {
                    *dest = Some(new_id.to_string());
                }
            }
        }
        for (id, _) in self.recent_descriptions.iter_mut() {
            if id == old_id {
                *id = new_id.to_string();
            }
        }
        if let Some((from, _, to)) = self.last_transition.as_mut() {
            if from == old_id {
                *from = new_id.to_string();
            }
            if to == old_id {
                *to = new_id.to_string();
            }
        }
        if self.current_room_id.as_deref() == Some(old_id) {
            self.current_room_id = Some(new_id.to_string());
        }
        self.dirty_rooms.remove(old_id);
        self.dirty_rooms.insert(new_id.to_string());
        self.renames.push((old_id.to_string(), new_id.to_string()));
        self.removed_rooms.push(old_id.to_string());
        tracing::debug!(old_id, new_id, "room reassigned to maze id");
    }

    pub fn is_maze_active(&self) -> bool {
        self.active_maze.is_some()
    }

    pub fn get_active_maze(&self) -> Option<&MazeGroup> {
        self.active_maze.as_ref().and_then(|g| self.maze_groups.get(g))
    }

    pub fn get_maze_group(&self, group_id: &str) -> Option<&MazeGroup> {
        self.maze_groups.get(group_id)
    }

    /// Record which marker item was dropped in a maze room.
    pub fn assign_maze_marker(&mut self, room_id: &str, item_id: &str) {
        let Some(group_id) = self.active_maze.clone() else {
            tracing::warn!(room_id, "cannot assign marker: no active maze");
            return;
        };
        if let Some(group) = self.maze_groups.get_mut(&group_id) {
            group
                .markers
                .insert(room_id.to_string(), item_id.to_string());
            self.dirty_mazes.insert(group_id);
        }
        if let Some(room) = self.rooms.get_mut(room_id) {
            room.maze_marker_item = Some(item_id.to_string());
            self.dirty_rooms.insert(room_id.to_string());
        }
    }

    /// Forget a marker once it has been picked back up, so stale marker
    /// records do not distort room identification.
    pub fn clear_maze_marker(&mut self, item_id: &str) {
        for (group_id, group) in self.maze_groups.iter_mut() {
            if let Some(room_id) = group
                .markers
                .iter()
                .find(|(_, marker)| marker.as_str() == item_id)
                .map(|(room, _)| room.clone())
            {
                group.markers.remove(&room_id);
                self.dirty_mazes.insert(group_id.clone());
                if let Some(room) = self.rooms.get_mut(&room_id) {
                    room.maze_marker_item = None;
                    self.dirty_rooms.insert(room_id);
                }
                return;
            }
        }
    }

    /// Which maze room holds the given marker item.
    pub fn identify_room_by_marker(&self, item_id: &str) -> Option<&str> {
        let group = self.get_active_maze()?;
        group
            .markers
            .iter()
            .find(|(_, marker)| marker.as_str() == item_id)
            .map(|(room, _)| room.as_str())
    }

    /// Mark a maze as fully mapped and leave maze-detection armed again.
    pub fn complete_maze(&mut self, group_id: &str, turn: u32) {
        let Some(group) = self.maze_groups.get_mut(group_id) else {
            tracing::warn!(group_id, "cannot complete unknown maze");
            return;
        };
        group.fully_mapped = true;
        group.completed_turn = Some(turn);
        self.dirty_mazes.insert(group_id.to_string());
        if self.active_maze.as_deref() == Some(group_id) {
            self.active_maze = None;
        }
        tracing::info!(group_id, rooms = group.room_ids.len(), "maze fully mapped");
    }

    // ------------------------------------------------------------------
    // Persistence plumbing
    // ------------------------------------------------------------------

    fn record_metric(&mut self, completion: &Completion, turn: u32) {
        self.last_metric = Some(CallMetric {
            game_id: 0,
            turn_number: turn,
            agent_name: "map_parser".to_string(),
            provider: self.llm.provider_name().to_string(),
            model: self.llm.model().to_string(),
            input_tokens: completion.usage.input_tokens,
            output_tokens: completion.usage.output_tokens,
            cached_tokens: completion.usage.cached_tokens,
            cost_estimate: completion.cost_estimate,
            latency_ms: completion.latency_ms,
        });
    }

    /// Metrics from the most recent parser call, if any.
    pub fn take_last_metric(&mut self) -> Option<CallMetric> {
        self.last_metric.take()
    }

    /// Drain (old, new) room id pairs from maze reassignment, so callers
    /// can relocate items that referenced the old ids.
    pub fn take_renames(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.renames)
    }

    /// Drain everything touched since the last drain, for batch commit.
    pub fn take_dirty(&mut self) -> (Vec<Room>, Vec<Connection>, Vec<MazeGroup>, Vec<String>) {
        let rooms = self
            .dirty_rooms
            .drain()
            .filter_map(|id| self.rooms.get(&id).cloned())
            .collect();
        let connections = self
            .dirty_connections
            .drain()
            .filter_map(|(from, dir)| {
                self.connections
                    .get(&from)
                    .and_then(|e| e.get(&dir))
                    .cloned()
            })
            .collect();
        let mazes = self
            .dirty_mazes
            .drain()
            .filter_map(|id| self.maze_groups.get(&id).cloned())
            .collect();
        let removed = std::mem::take(&mut self.removed_rooms);
        (rooms, connections, mazes, removed)
    }

    /// Rebuild graph state from the journal during crash resume.
    pub fn load_from_journal(&mut self, journal: &Journal, game_id: i64) -> JournalResult<()> {
        for room in journal.get_rooms(game_id)? {
            self.rooms.insert(room.room_id.clone(), room);
        }
        for connection in journal.get_connections(game_id)? {
            self.connections
                .entry(connection.from_room.clone())
                .or_default()
                .insert(connection.direction.clone(), connection);
        }
        for group in journal.get_maze_groups(game_id)? {
            if !group.fully_mapped {
                self.active_maze = Some(group.group_id.clone());
            }
            self.maze_seq
                .insert(group.group_id.clone(), group.room_ids.len() as u32);
            self.maze_groups.insert(group.group_id.clone(), group);
        }
        tracing::info!(
            rooms = self.rooms.len(),
            mazes = self.maze_groups.len(),
            "map state loaded from journal"
        );
        Ok(())
    }

    /// Set the current room, used when resuming from the latest turn.
    pub fn set_current_room(&mut self, room_id: &str) {
        self.current_room_id = Some(room_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_direction() {
        assert_eq!(reverse_direction("north"), Some("south"));
        assert_eq!(reverse_direction("up"), Some("down"));
        assert_eq!(reverse_direction("out"), Some("in"));
        assert_eq!(reverse_direction("enter building"), None);
    }

    #[test]
    fn test_extract_direction() {
        assert_eq!(extract_direction("north"), Some("north".to_string()));
        assert_eq!(extract_direction("N"), Some("north".to_string()));
        assert_eq!(extract_direction("go sw"), Some("southwest".to_string()));
        assert_eq!(
            extract_direction("enter building"),
            Some("enter building".to_string())
        );
        assert_eq!(extract_direction("take lamp"), None);
    }
}
