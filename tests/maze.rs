//! Maze detection and the marker-drop DFS resolution, end to end against
//! a simulated cyclic maze.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use autofrotz::items::ItemRegistry;
use autofrotz::map::MapGraph;
use autofrotz::maze::{MazeSolver, MazeStep};
use autofrotz::testing::MockLlm;
use autofrotz::world::ItemLocation;

const ALIKE: &str = "You are in a maze of twisty little passages, all alike.";

fn room_json(name: &str, description: &str, exits: &[&str], items_seen: &[&str]) -> Value {
    json!({
        "room_changed": true,
        "room_name": name,
        "description": description,
        "exits": exits,
        "is_dark": false,
        "items_seen": items_seen
    })
}

fn new_map(llm: &Arc<MockLlm>) -> MapGraph {
    MapGraph::new(llm.clone(), Duration::from_secs(1), 0.95)
}

/// Walk the player through an entry room and three identically-described
/// passages, triggering detection on the third.
async fn enter_maze(llm: &Arc<MockLlm>, map: &mut MapGraph) {
    llm.queue_json(room_json("Clearing", "A forest clearing with a grating.", &["east"], &[]));
    map.update_from_game_output("clearing", "look", 1).await;

    for (turn, name) in [(2, "Twisty Passage"), (3, "Winding Passage"), (4, "Narrow Passage")] {
        llm.queue_json(room_json(name, ALIKE, &["east"], &[]));
        let update = map.update_from_game_output(ALIKE, "east", turn).await;
        let room_id = update.room_id.clone().unwrap();
        let detected = map.check_maze_condition(&room_id, ALIKE, turn);
        assert_eq!(detected, turn == 4, "detection fired at turn {turn}");
    }
}

#[tokio::test]
async fn three_similar_rooms_open_a_maze_group() {
    let llm = Arc::new(MockLlm::new());
    let mut map = new_map(&llm);
    enter_maze(&llm, &mut map).await;

    assert!(map.is_maze_active());
    let maze = map.get_active_maze().unwrap();
    assert_eq!(maze.group_id, "g0");
    assert_eq!(maze.entry_room_id, "clearing");
    assert_eq!(
        maze.room_ids,
        vec!["maze_g0_0".to_string(), "maze_g0_1".to_string(), "maze_g0_2".to_string()]
    );

    // The involved rooms were reassigned; the old name-based ids are gone.
    assert!(map.get_room("twisty_passage").is_none());
    assert!(map.get_room("maze_g0_0").is_some());
    assert_eq!(map.current_room_id(), Some("maze_g0_2"));

    // Pre-detection traversal edges follow their rooms.
    assert_eq!(
        map.get_connection("maze_g0_0", "east").unwrap().to_room,
        "maze_g0_1"
    );
    assert_eq!(
        map.get_connection("clearing", "east").unwrap().to_room,
        "maze_g0_0"
    );
}

#[tokio::test]
async fn contradicted_maze_edge_goes_random() {
    let llm = Arc::new(MockLlm::new());
    let mut map = new_map(&llm);
    enter_maze(&llm, &mut map).await;

    map.assign_maze_marker("maze_g0_1", "rock");
    map.assign_maze_marker("maze_g0_2", "sword");
    map.set_current_room("maze_g0_0");

    // The map believes east from maze_g0_0 leads to maze_g0_1, but the
    // sword marker shows we arrived in maze_g0_2 instead.
    llm.queue_json(room_json("Maze", ALIKE, &["east"], &["sword"]));
    let update = map.update_from_game_output(ALIKE, "east", 5).await;
    assert_eq!(update.room_id.as_deref(), Some("maze_g0_2"));

    let edge = map.get_connection("maze_g0_0", "east").unwrap();
    assert!(edge.random);
    assert!(edge.observed_destinations.len() >= 2);
    assert!(edge.observed_destinations.contains(&"maze_g0_1".to_string()));
    assert!(edge.observed_destinations.contains(&"maze_g0_2".to_string()));
}

/// The five-room cyclic maze of the resolution scenario: going east from
/// any room reaches the next, wrapping around; west runs backward. Rooms
/// 0-2 are known before detection, 3-4 are discovered by the solver.
struct CyclicMaze {
    position: usize,
    /// position -> marker item id currently on the floor there.
    floor: HashMap<usize, String>,
}

impl CyclicMaze {
    fn new() -> Self {
        Self {
            position: 2,
            floor: HashMap::new(),
        }
    }

    fn room_id(position: usize) -> String {
        format!("maze_g0_{position}")
    }

    fn step(&mut self, direction: &str) {
        match direction {
            "east" => self.position = (self.position + 1) % 5,
            "west" => self.position = (self.position + 4) % 5,
            other => panic!("maze has no exit {other}"),
        }
    }

    fn items_here(&self) -> Vec<String> {
        self.floor.get(&self.position).cloned().into_iter().collect()
    }
}

#[tokio::test]
async fn marker_dfs_maps_the_maze_and_retrieves_markers() {
    let map_llm = Arc::new(MockLlm::new());
    let item_llm = Arc::new(MockLlm::new());
    let mut map = new_map(&map_llm);
    let mut items = ItemRegistry::new(item_llm.clone(), Duration::from_secs(1));

    enter_maze(&map_llm, &mut map).await;

    // Eight droppable items in inventory.
    let names = ["leaflet", "garlic", "lunch", "bottle", "rope", "knife", "sword", "rock"];
    let deltas: Vec<Value> = names
        .iter()
        .map(|n| json!({"item_id": n, "name": n, "change_type": "taken"}))
        .collect();
    item_llm.queue_json(json!({ "updates": deltas }));
    items.update_from_game_output("Taken.", "clearing", "take all", 4).await;
    assert_eq!(items.inventory_count(), 8);

    let mut world = CyclicMaze::new();
    let mut solver = MazeSolver::new("g0", 8);
    let mut commands_until_mapped = 0u32;
    let mut first_retrieval_command: Option<String> = None;
    let mut turn = 5u32;
    let mut last_output = ALIKE.to_string();

    for _ in 0..60 {
        let step = solver.next_step(&mut map, &items, &[], &last_output, turn);
        if map.get_maze_group("g0").map(|g| g.fully_mapped) != Some(true) {
            commands_until_mapped += 1;
        }
        match step {
            MazeStep::Command(command) => {
                if map.get_maze_group("g0").unwrap().fully_mapped
                    && first_retrieval_command.is_none()
                    && command != "look"
                {
                    first_retrieval_command = Some(command.clone());
                }
                if command == "look" {
                    let seen: Vec<&str> = world.floor.get(&world.position).map(|s| s.as_str()).into_iter().collect();
                    map_llm.queue_json(room_json("Maze", ALIKE, &["east"], &seen));
                    map.update_from_game_output(ALIKE, "look", turn).await;
                } else {
                    world.step(&command);
                    let seen = world.items_here();
                    let seen_refs: Vec<&str> = seen.iter().map(|s| s.as_str()).collect();
                    map_llm.queue_json(room_json("Maze", ALIKE, &["east"], &seen_refs));
                    map.update_from_game_output(ALIKE, &command, turn).await;
                }
            }
            MazeStep::DropMarker { room_id, item_id, command, .. } => {
                assert!(command.starts_with("drop "));
                world.floor.insert(world.position, item_id.clone());
                items.drop_item(&item_id, &room_id);
            }
            MazeStep::TakeMarker { item_id, command } => {
                if first_retrieval_command.is_none() {
                    first_retrieval_command = Some(command.clone());
                }
                world.floor.remove(&world.position);
                items.take_item(&item_id);
                map.clear_maze_marker(&item_id);
            }
            MazeStep::Finished => break,
            other => panic!("unexpected step {other:?}"),
        }
        last_output = ALIKE.to_string();
        turn += 1;
    }

    // Fully mapped within the command budget.
    let group = map.get_maze_group("g0").unwrap();
    assert!(group.fully_mapped);
    assert!(
        commands_until_mapped <= 20,
        "took {commands_until_mapped} commands to map the maze"
    );
    assert_eq!(group.room_ids.len(), 5);

    // The first post-mapping command retrieves a marker.
    assert!(
        first_retrieval_command.unwrap().starts_with("take "),
        "expected retrieval to start with a take"
    );

    // All markers are back in inventory and the solver is done.
    assert_eq!(
        items
            .get_all_items()
            .iter()
            .filter(|i| i.location == ItemLocation::Inventory)
            .count(),
        8
    );
    assert!(world.floor.is_empty());
}

#[tokio::test]
async fn solver_pauses_when_markers_are_short() {
    let map_llm = Arc::new(MockLlm::new());
    let item_llm = Arc::new(MockLlm::new());
    let mut map = new_map(&map_llm);
    let items = ItemRegistry::new(item_llm.clone(), Duration::from_secs(1));

    enter_maze(&map_llm, &mut map).await;

    let mut solver = MazeSolver::new("g0", 8);
    let step = solver.next_step(&mut map, &items, &[], ALIKE, 5);
    assert_eq!(step, MazeStep::NeedMarkers { have: 0, need: 8 });
}

#[tokio::test]
async fn darkness_aborts_resolution() {
    let map_llm = Arc::new(MockLlm::new());
    let item_llm = Arc::new(MockLlm::new());
    let mut map = new_map(&map_llm);
    let items = ItemRegistry::new(item_llm.clone(), Duration::from_secs(1));

    enter_maze(&map_llm, &mut map).await;

    let mut solver = MazeSolver::new("g0", 8);
    let step = solver.next_step(
        &mut map,
        &items,
        &[],
        "It is pitch black. You are likely to be eaten by a grue.",
        5,
    );
    assert_eq!(step, MazeStep::Darkness);
}
