//! Journal behaviour: schema round-trips, upsert idempotency, active-game
//! tracking, and the single-transaction turn commit.

use std::collections::{BTreeMap, HashMap};

use autofrotz::journal::Journal;
use autofrotz::world::{
    now_timestamp, CallMetric, Connection, GameStatus, Item, ItemLocation, MazeGroup, Portability,
    PropertyValue, Puzzle, PuzzleAttempt, PuzzleStatus, Room, TurnRecord,
};

fn turn(game_id: i64, turn_number: u32, command: &str) -> TurnRecord {
    TurnRecord {
        game_id,
        turn_number,
        timestamp: now_timestamp(),
        command_sent: command.to_string(),
        game_output: format!("output of {command}"),
        room_id: "west_of_house".to_string(),
        inventory_snapshot: vec!["leaflet".to_string()],
        agent_reasoning: "testing".to_string(),
    }
}

#[test]
fn game_lifecycle_and_active_game() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::open(dir.path().join("game.db")).unwrap();

    assert!(journal.get_active_game().unwrap().is_none());
    let game_id = journal.create_game("zork1.z5").unwrap();
    assert_eq!(
        journal.get_active_game().unwrap(),
        Some((game_id, "zork1.z5".to_string()))
    );

    journal.end_game(game_id, GameStatus::Won, 42).unwrap();
    assert!(journal.get_active_game().unwrap().is_none());

    let session = journal.get_game(game_id).unwrap().unwrap();
    assert_eq!(session.status, GameStatus::Won);
    assert_eq!(session.total_turns, 42);
    assert!(session.end_time.is_some());
    assert_eq!(journal.get_all_games().unwrap().len(), 1);
}

#[test]
fn save_turn_is_idempotent_on_turn_number() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::open(dir.path().join("game.db")).unwrap();
    let game_id = journal.create_game("zork1.z5").unwrap();

    journal.save_turn(&turn(game_id, 1, "north")).unwrap();
    // Crash replay of the same turn with a corrected command.
    journal.save_turn(&turn(game_id, 1, "go north")).unwrap();

    let turns = journal.get_turns(game_id).unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].command_sent, "go north");

    journal.save_turn(&turn(game_id, 2, "south")).unwrap();
    let latest = journal.get_latest_turn(game_id).unwrap().unwrap();
    assert_eq!(latest.turn_number, 2);
    assert_eq!(
        journal.get_turn(game_id, 1).unwrap().unwrap().command_sent,
        "go north"
    );
}

#[test]
fn room_and_connection_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::open(dir.path().join("game.db")).unwrap();
    let game_id = journal.create_game("zork1.z5").unwrap();

    let mut room = Room::new("west_of_house", "West of House");
    room.description = "You are standing in an open field.".to_string();
    room.visited = true;
    room.visit_count = 3;
    room.exits.insert("north".to_string(), Some("north_of_house".to_string()));
    room.exits.insert("east".to_string(), None);
    journal.save_room(game_id, &room).unwrap();

    let rooms = journal.get_rooms(game_id).unwrap();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].visit_count, 3);
    assert_eq!(
        rooms[0].exits.get("north"),
        Some(&Some("north_of_house".to_string()))
    );
    assert_eq!(rooms[0].exits.get("east"), Some(&None));

    let mut edge = Connection::new("west_of_house", "north_of_house", "north");
    journal.save_connection(game_id, &edge).unwrap();
    // Upsert on (game, from, direction): re-pointing replaces.
    edge.to_room = "forest".to_string();
    edge.random = true;
    edge.observed_destinations =
        vec!["north_of_house".to_string(), "forest".to_string()];
    journal.save_connection(game_id, &edge).unwrap();

    let connections = journal.get_connections(game_id).unwrap();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].to_room, "forest");
    assert!(connections[0].random);
    assert_eq!(connections[0].observed_destinations.len(), 2);
}

#[test]
fn item_round_trip_preserves_tri_state_and_properties() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::open(dir.path().join("game.db")).unwrap();
    let game_id = journal.create_game("zork1.z5").unwrap();

    let mut lantern = Item::new("brass_lantern", "brass lantern", 2);
    lantern.location = ItemLocation::Inventory;
    lantern.portable = Portability::Portable;
    lantern.properties.insert("lit".to_string(), PropertyValue::Bool(true));
    journal.save_item(game_id, &lantern).unwrap();

    let mut house = Item::new("house", "white house", 1);
    house.location = ItemLocation::Room("west_of_house".to_string());
    house.portable = Portability::Fixed;
    journal.save_item(game_id, &house).unwrap();

    let ghost = Item::new("grue", "lurking grue", 3);
    journal.save_item(game_id, &ghost).unwrap();

    let mut items: HashMap<String, Item> = journal
        .get_items(game_id)
        .unwrap()
        .into_iter()
        .map(|i| (i.item_id.clone(), i))
        .collect();
    assert_eq!(items.len(), 3);
    let lantern = items.remove("brass_lantern").unwrap();
    assert_eq!(lantern.location, ItemLocation::Inventory);
    assert_eq!(lantern.portable, Portability::Portable);
    assert_eq!(lantern.properties.get("lit"), Some(&PropertyValue::Bool(true)));
    assert_eq!(items.remove("house").unwrap().portable, Portability::Fixed);
    let grue = items.remove("grue").unwrap();
    assert_eq!(grue.portable, Portability::Unknown);
    assert_eq!(grue.location, ItemLocation::Unknown);
}

#[test]
fn puzzle_and_maze_group_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::open(dir.path().join("game.db")).unwrap();
    let game_id = journal.create_game("zork1.z5").unwrap();

    let mut puzzle = Puzzle::new(1, "The grating is locked.", "clearing", 4);
    puzzle.related_items = vec!["skeleton_key".to_string()];
    puzzle.attempts.push(PuzzleAttempt {
        action: "open grating".to_string(),
        result: "It is locked.".to_string(),
        turn: 5,
    });
    journal.save_puzzle(game_id, &puzzle).unwrap();

    puzzle.status = PuzzleStatus::Solved;
    puzzle.solved_turn = Some(9);
    journal.save_puzzle(game_id, &puzzle).unwrap();

    let open = journal.get_puzzles(game_id, Some(PuzzleStatus::Open)).unwrap();
    assert!(open.is_empty());
    let all = journal.get_puzzles(game_id, None).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].status, PuzzleStatus::Solved);
    assert_eq!(all[0].attempts.len(), 1);
    assert!(all[0].solved_turn.unwrap() >= all[0].created_turn);

    let mut maze = MazeGroup::new("g0", "clearing", 10);
    maze.room_ids = vec!["maze_g0_0".to_string(), "maze_g0_1".to_string()];
    maze.markers = BTreeMap::from([("maze_g0_0".to_string(), "leaflet".to_string())]);
    journal.save_maze_group(game_id, &maze).unwrap();

    let groups = journal.get_maze_groups(game_id).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].markers.get("maze_g0_0"), Some(&"leaflet".to_string()));
    assert!(!groups[0].fully_mapped);
}

#[test]
fn commit_turn_writes_everything_in_one_batch() {
    let dir = tempfile::tempdir().unwrap();
    let mut journal = Journal::open(dir.path().join("game.db")).unwrap();
    let game_id = journal.create_game("zork1.z5").unwrap();

    // A room that will be retired by maze reassignment.
    let stale = Room::new("twisty_passage", "Twisty Passage");
    journal.save_room(game_id, &stale).unwrap();

    let mut room = Room::new("maze_g0_0", "Twisty Passage");
    room.maze_group = Some("g0".to_string());
    let edge = Connection::new("maze_g0_0", "maze_g0_1", "east");
    let item = Item::new("leaflet", "leaflet", 1);
    let puzzle = Puzzle::new(1, "maze", "maze_g0_0", 1);
    let maze = MazeGroup::new("g0", "clearing", 1);
    let metric = CallMetric {
        game_id,
        turn_number: 1,
        agent_name: "map_parser".to_string(),
        provider: "mock".to_string(),
        model: "mock-model".to_string(),
        input_tokens: 100,
        output_tokens: 50,
        cached_tokens: 0,
        cost_estimate: 0.001,
        latency_ms: 5.0,
    };

    journal
        .commit_turn(
            &turn(game_id, 1, "north"),
            &[room],
            &[edge],
            &[item],
            &[puzzle],
            &[maze],
            &["twisty_passage".to_string()],
            &[metric],
        )
        .unwrap();

    assert_eq!(journal.get_turns(game_id).unwrap().len(), 1);
    let room_ids: Vec<String> = journal
        .get_rooms(game_id)
        .unwrap()
        .into_iter()
        .map(|r| r.room_id)
        .collect();
    assert_eq!(room_ids, vec!["maze_g0_0".to_string()]);
    assert_eq!(journal.get_connections(game_id).unwrap().len(), 1);
    assert_eq!(journal.get_items(game_id).unwrap().len(), 1);
    assert_eq!(journal.get_puzzles(game_id, None).unwrap().len(), 1);
    assert_eq!(journal.get_maze_groups(game_id).unwrap().len(), 1);
    assert_eq!(journal.get_metrics(game_id).unwrap().len(), 1);
}
