//! World-model types shared across the crate.
//!
//! Contains all types for representing game state: rooms, connections,
//! items, puzzles, maze groups, turn records, and the structured deltas
//! produced by the parser agents.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Normalize a display name into a stable identifier.
///
/// Lowercases, strips leading articles, collapses whitespace, replaces
/// spaces with underscores, and drops everything that is not alphanumeric
/// or an underscore. Used for both room ids and item ids so that "the
/// Brass Lantern" and "brass lantern" resolve to the same entry.
pub fn normalize_id(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut words: Vec<&str> = lowered.split_whitespace().collect();
    if let Some(first) = words.first() {
        if matches!(*first, "the" | "a" | "an") {
            words.remove(0);
        }
    }
    let joined = words.join("_");
    let mut id = String::with_capacity(joined.len());
    let mut last_underscore = false;
    for ch in joined.chars() {
        if ch.is_ascii_alphanumeric() {
            id.push(ch);
            last_underscore = false;
        } else if (ch == '_' || ch == ' ') && !last_underscore && !id.is_empty() {
            id.push('_');
            last_underscore = true;
        }
    }
    while id.ends_with('_') {
        id.pop();
    }
    id
}

/// Normalize free text for similarity comparison: lowercase, collapse
/// whitespace, strip punctuation.
pub fn normalize_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Current UTC time as an RFC 3339 string, the format used for all
/// persisted timestamps.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ============================================================================
// Items
// ============================================================================

/// Where an item currently is. Exactly one of: a room, the player's
/// inventory, or nowhere known (stolen, consumed, destroyed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ItemLocation {
    Inventory,
    Unknown,
    Room(String),
}

impl From<String> for ItemLocation {
    fn from(s: String) -> Self {
        match s.as_str() {
            "inventory" => ItemLocation::Inventory,
            "unknown" | "" => ItemLocation::Unknown,
            _ => ItemLocation::Room(s),
        }
    }
}

impl From<ItemLocation> for String {
    fn from(loc: ItemLocation) -> Self {
        loc.to_string()
    }
}

impl fmt::Display for ItemLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemLocation::Inventory => write!(f, "inventory"),
            ItemLocation::Unknown => write!(f, "unknown"),
            ItemLocation::Room(id) => write!(f, "{}", id),
        }
    }
}

/// Whether an item can be carried. Starts unknown; a successful take is
/// evidence for portable, an explicit refusal is evidence for fixed.
/// Definite states are never downgraded back to unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Portability {
    Portable,
    Fixed,
    Unknown,
}

impl Portability {
    pub fn is_portable(&self) -> bool {
        matches!(self, Portability::Portable)
    }

    /// Database encoding: 1 / 0 / NULL.
    pub fn as_db(&self) -> Option<bool> {
        match self {
            Portability::Portable => Some(true),
            Portability::Fixed => Some(false),
            Portability::Unknown => None,
        }
    }

    pub fn from_db(value: Option<bool>) -> Self {
        match value {
            Some(true) => Portability::Portable,
            Some(false) => Portability::Fixed,
            None => Portability::Unknown,
        }
    }
}

/// A value in an item's open property bag (`lit`, `open`, `locked`, ...).
/// Untagged so the JSON stored in the journal holds the values verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

/// An object in the game world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub item_id: String,
    pub name: String,
    pub description: Option<String>,
    pub location: ItemLocation,
    pub portable: Portability,
    pub properties: HashMap<String, PropertyValue>,
    pub first_seen_turn: u32,
    pub last_seen_turn: u32,
}

impl Item {
    pub fn new(item_id: impl Into<String>, name: impl Into<String>, turn: u32) -> Self {
        Self {
            item_id: item_id.into(),
            name: name.into(),
            description: None,
            location: ItemLocation::Unknown,
            portable: Portability::Unknown,
            properties: HashMap::new(),
            first_seen_turn: turn,
            last_seen_turn: turn,
        }
    }
}

// ============================================================================
// Rooms & connections
// ============================================================================

/// A location in the game world.
///
/// Items present in a room are never stored on the room itself; they are a
/// live query against the item registry keyed by location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub room_id: String,
    pub name: String,
    pub description: String,
    pub visited: bool,
    pub visit_count: u32,
    pub is_dark: bool,
    pub maze_group: Option<String>,
    pub maze_marker_item: Option<String>,
    pub first_visited_turn: Option<u32>,
    pub last_visited_turn: Option<u32>,
    /// Mentioned exits: direction -> resolved destination, or None while
    /// the exit has never been traversed.
    pub exits: HashMap<String, Option<String>>,
}

impl Room {
    pub fn new(room_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            name: name.into(),
            description: String::new(),
            visited: false,
            visit_count: 0,
            is_dark: false,
            maze_group: None,
            maze_marker_item: None,
            first_visited_turn: None,
            last_visited_turn: None,
            exits: HashMap::new(),
        }
    }
}

/// A directed, labelled edge between two rooms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub from_room: String,
    pub to_room: String,
    pub direction: String,
    pub bidirectional: bool,
    pub blocked: bool,
    pub block_reason: Option<String>,
    pub teleport: bool,
    pub random: bool,
    pub observed_destinations: Vec<String>,
}

impl Connection {
    pub fn new(
        from_room: impl Into<String>,
        to_room: impl Into<String>,
        direction: impl Into<String>,
    ) -> Self {
        Self {
            from_room: from_room.into(),
            to_room: to_room.into(),
            direction: direction.into(),
            bidirectional: true,
            blocked: false,
            block_reason: None,
            teleport: false,
            random: false,
            observed_destinations: Vec::new(),
        }
    }
}

// ============================================================================
// Puzzles
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PuzzleStatus {
    Open,
    InProgress,
    Solved,
    Abandoned,
}

impl PuzzleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PuzzleStatus::Open => "open",
            PuzzleStatus::InProgress => "in_progress",
            PuzzleStatus::Solved => "solved",
            PuzzleStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(PuzzleStatus::Open),
            "in_progress" => Some(PuzzleStatus::InProgress),
            "solved" => Some(PuzzleStatus::Solved),
            "abandoned" => Some(PuzzleStatus::Abandoned),
            _ => None,
        }
    }

    /// Open and in-progress puzzles both count as unsolved work.
    pub fn is_open(&self) -> bool {
        matches!(self, PuzzleStatus::Open | PuzzleStatus::InProgress)
    }
}

impl fmt::Display for PuzzleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One recorded attempt at solving a puzzle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PuzzleAttempt {
    pub action: String,
    pub result: String,
    pub turn: u32,
}

/// A puzzle or obstacle in the game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Puzzle {
    pub puzzle_id: i64,
    pub description: String,
    pub status: PuzzleStatus,
    pub location: String,
    pub related_items: Vec<String>,
    pub attempts: Vec<PuzzleAttempt>,
    pub created_turn: u32,
    pub solved_turn: Option<u32>,
}

impl Puzzle {
    pub fn new(puzzle_id: i64, description: impl Into<String>, location: impl Into<String>, turn: u32) -> Self {
        Self {
            puzzle_id,
            description: description.into(),
            status: PuzzleStatus::Open,
            location: location.into(),
            related_items: Vec::new(),
            attempts: Vec::new(),
            created_turn: turn,
            solved_turn: None,
        }
    }
}

// ============================================================================
// Mazes
// ============================================================================

/// A detected maze: a set of rooms with near-identical descriptions tracked
/// together until every exit has a concrete destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MazeGroup {
    pub group_id: String,
    /// The last unique-description room visited before the duplicates.
    pub entry_room_id: String,
    pub room_ids: Vec<String>,
    pub exit_room_ids: Vec<String>,
    /// room_id -> marker item id. Ordered so marker retrieval is
    /// deterministic.
    pub markers: BTreeMap<String, String>,
    pub fully_mapped: bool,
    pub created_turn: u32,
    pub completed_turn: Option<u32>,
}

impl MazeGroup {
    pub fn new(group_id: impl Into<String>, entry_room_id: impl Into<String>, turn: u32) -> Self {
        Self {
            group_id: group_id.into(),
            entry_room_id: entry_room_id.into(),
            room_ids: Vec::new(),
            exit_room_ids: Vec::new(),
            markers: BTreeMap::new(),
            fully_mapped: false,
            created_turn: turn,
            completed_turn: None,
        }
    }
}

// ============================================================================
// Turns, games, metrics
// ============================================================================

/// A single game turn. The journal row for a turn is the sole source of
/// truth for resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub game_id: i64,
    pub turn_number: u32,
    pub timestamp: String,
    pub command_sent: String,
    pub game_output: String,
    pub room_id: String,
    pub inventory_snapshot: Vec<String>,
    pub agent_reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Playing,
    Won,
    Lost,
    Abandoned,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Playing => "playing",
            GameStatus::Won => "won",
            GameStatus::Lost => "lost",
            GameStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "playing" => Some(GameStatus::Playing),
            "won" => Some(GameStatus::Won),
            "lost" => Some(GameStatus::Lost),
            "abandoned" => Some(GameStatus::Abandoned),
            _ => None,
        }
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metadata for a complete game session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSession {
    pub game_id: i64,
    pub game_file: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub status: GameStatus,
    pub total_turns: u32,
}

/// Usage metrics from a single language-model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallMetric {
    pub game_id: i64,
    pub turn_number: u32,
    pub agent_name: String,
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub cost_estimate: f64,
    pub latency_ms: f64,
}

// ============================================================================
// Parser deltas
// ============================================================================

/// Parsed room state change from one batch of game output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomUpdate {
    pub room_changed: bool,
    pub room_id: Option<String>,
    pub room_name: Option<String>,
    pub description: Option<String>,
    pub exits: Vec<String>,
    pub is_dark: bool,
    pub new_room: bool,
    pub items_seen: Vec<String>,
}

impl RoomUpdate {
    /// The delta produced when parsing failed or nothing moved.
    pub fn no_change(current_room: Option<&str>) -> Self {
        Self {
            room_id: current_room.map(str::to_string),
            ..Self::default()
        }
    }
}

/// The kind of change an item parser delta describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemChange {
    New,
    Taken,
    Dropped,
    StateChange,
    Moved,
    Gone,
}

/// Parsed item state change from game output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemUpdate {
    pub item_id: String,
    pub name: String,
    pub change_type: ItemChange,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub properties: Option<HashMap<String, PropertyValue>>,
}

/// Puzzle tracker confidence in a suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// A structured recommendation from the puzzle tracker: a target puzzle,
/// proposed action, supporting items, and a navigation path to the
/// puzzle's location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub puzzle_id: i64,
    pub description: String,
    pub proposed_action: String,
    #[serde(default)]
    pub items_to_use: Vec<String>,
    pub confidence: Confidence,
    #[serde(default)]
    pub navigation: Vec<String>,
    /// Set when the target puzzle has exhausted its attempt budget.
    #[serde(default)]
    pub deprioritized: bool,
}

/// Compact map statistics for agent context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapSummary {
    pub rooms_visited: usize,
    pub rooms_total: usize,
    pub unexplored_count: usize,
    pub current_room: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_id_strips_articles_and_punctuation() {
        assert_eq!(normalize_id("The Brass Lantern"), "brass_lantern");
        assert_eq!(normalize_id("a small  leaflet!"), "small_leaflet");
        assert_eq!(normalize_id("West of House"), "west_of_house");
        assert_eq!(normalize_id("Maze"), "maze");
    }

    #[test]
    fn test_normalize_text_collapses() {
        assert_eq!(
            normalize_text("You are in a maze of twisty little passages, all alike."),
            "you are in a maze of twisty little passages all alike"
        );
    }

    #[test]
    fn test_item_location_round_trip() {
        let inv: ItemLocation = "inventory".to_string().into();
        assert_eq!(inv, ItemLocation::Inventory);
        let room: ItemLocation = "west_of_house".to_string().into();
        assert_eq!(room, ItemLocation::Room("west_of_house".to_string()));
        assert_eq!(room.to_string(), "west_of_house");
        assert_eq!(ItemLocation::Unknown.to_string(), "unknown");
    }

    #[test]
    fn test_portability_db_encoding() {
        assert_eq!(Portability::Portable.as_db(), Some(true));
        assert_eq!(Portability::Fixed.as_db(), Some(false));
        assert_eq!(Portability::Unknown.as_db(), None);
        assert_eq!(Portability::from_db(Some(true)), Portability::Portable);
        assert_eq!(Portability::from_db(None), Portability::Unknown);
    }

    #[test]
    fn test_property_value_json_verbatim() {
        let mut props = HashMap::new();
        props.insert("lit".to_string(), PropertyValue::Bool(true));
        props.insert("weight".to_string(), PropertyValue::Number(3.0));
        let json = serde_json::to_value(&props).unwrap();
        assert_eq!(json["lit"], serde_json::json!(true));
        let back: HashMap<String, PropertyValue> = serde_json::from_value(json).unwrap();
        assert_eq!(back["lit"], PropertyValue::Bool(true));
    }
}
