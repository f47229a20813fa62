//! Algorithmic maze resolution.
//!
//! Once the map manager detects a maze, the orchestrator routes the
//! decision phase here instead of the game agent. The solver drives a
//! marker-drop DFS: drop a distinct portable item in each room, explore
//! every mentioned exit, recognize revisits by the marker on the floor,
//! and finish by walking the now-transparent subgraph to collect the
//! markers back.

use std::collections::HashSet;

use crate::items::ItemRegistry;
use crate::map::{reverse_direction, MapGraph};
use crate::world::ItemLocation;

/// Output phrases that mean the room cannot be seen at all.
const DARKNESS_PHRASES: &[&str] = &["pitch black", "pitch dark", "too dark to see"];

/// What the solver wants the orchestrator to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MazeStep {
    /// Issue a plain command (a direction, or `look`).
    Command(String),
    /// Drop a marker item in the current room.
    DropMarker {
        room_id: String,
        item_id: String,
        /// Replacing a marker that went missing (wandering thief).
        replacement: bool,
        command: String,
    },
    /// Pick a marker back up during retrieval.
    TakeMarker { item_id: String, command: String },
    /// Not enough droppable items to mark the maze; pause and collect more.
    NeedMarkers { have: usize, need: usize },
    /// A maze room is dark; abort until a light source is secured.
    Darkness,
    /// Every marker is retrieved (or unreachable); maze mode is over.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Exploring,
    Retrieving,
}

/// DFS state for resolving one maze group.
pub struct MazeSolver {
    group_id: String,
    min_markers: usize,
    phase: Phase,
    visited: HashSet<String>,
    /// Marker item ids already committed to rooms.
    used_markers: HashSet<String>,
    /// The preparation gate (enough markers on hand) has passed.
    prepared: bool,
    /// Pending `look` after a movement command.
    awaiting_look: bool,
    last_maze_room: Option<String>,
    last_move_direction: Option<String>,
}

impl MazeSolver {
    pub fn new(group_id: impl Into<String>, min_markers: usize) -> Self {
        Self {
            group_id: group_id.into(),
            min_markers,
            phase: Phase::Exploring,
            visited: HashSet::new(),
            used_markers: HashSet::new(),
            prepared: false,
            awaiting_look: false,
            last_maze_room: None,
            last_move_direction: None,
        }
    }

    /// Rebuild solver state from a persisted maze group on crash resume.
    /// Rooms that already have markers count as visited.
    pub fn resume(group: &crate::world::MazeGroup, min_markers: usize) -> Self {
        let mut solver = Self::new(group.group_id.clone(), min_markers);
        solver.visited = group.markers.keys().cloned().collect();
        solver.used_markers = group.markers.values().cloned().collect();
        solver.prepared = !group.markers.is_empty();
        solver
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// True once the solver has moved on to collecting markers back.
    pub fn is_retrieving(&self) -> bool {
        self.phase == Phase::Retrieving
    }

    /// Decide the next primitive command.
    ///
    /// `puzzle_items` are item ids tied to open puzzles; they are spent as
    /// markers only when nothing safer is left.
    pub fn next_step(
        &mut self,
        map: &mut MapGraph,
        items: &ItemRegistry,
        puzzle_items: &[String],
        last_output: &str,
        turn: u32,
    ) -> MazeStep {
        let lowered = last_output.to_lowercase();
        if self.phase == Phase::Exploring && DARKNESS_PHRASES.iter().any(|p| lowered.contains(p)) {
            tracing::warn!(group_id = %self.group_id, "darkness in maze, aborting resolution");
            return MazeStep::Darkness;
        }

        if self.awaiting_look {
            self.awaiting_look = false;
            return MazeStep::Command("look".to_string());
        }

        let Some(current) = map.current_room_id().map(str::to_string) else {
            return MazeStep::Command("look".to_string());
        };

        match self.phase {
            Phase::Exploring => self.explore_step(map, items, puzzle_items, &current, turn),
            Phase::Retrieving => self.retrieve_step(map, items, &current),
        }
    }

    fn explore_step(
        &mut self,
        map: &mut MapGraph,
        items: &ItemRegistry,
        puzzle_items: &[String],
        current: &str,
        turn: u32,
    ) -> MazeStep {
        // Preparation gate: enough distinct droppable items to tell the
        // maze rooms apart.
        if !self.prepared {
            let have = items.get_droppable_items(puzzle_items).len();
            if have < self.min_markers {
                return MazeStep::NeedMarkers {
                    have,
                    need: self.min_markers,
                };
            }
            self.prepared = true;
        }

        let in_maze = map
            .get_room(current)
            .map(|r| r.maze_group.as_deref() == Some(self.group_id.as_str()))
            .unwrap_or(false);

        // Stepped out of the maze through a real exit. The map already
        // recorded the exit room; head back in and keep exploring.
        if !in_maze {
            if let Some(back) = self.step_back_into_maze(map, current) {
                self.awaiting_look = true;
                return MazeStep::Command(back);
            }
            return MazeStep::Command("look".to_string());
        }
        self.last_maze_room = Some(current.to_string());

        // First visit: commit a marker to this room.
        if !self.visited.contains(current) {
            self.visited.insert(current.to_string());
        }
        let marker = map
            .get_maze_group(&self.group_id)
            .and_then(|g| g.markers.get(current).cloned());
        match marker {
            None => {
                let Some(item) = self.pick_marker(items, puzzle_items) else {
                    let have = items.get_droppable_items(puzzle_items).len();
                    tracing::warn!(
                        have,
                        need = self.min_markers,
                        "not enough droppable items to mark the maze"
                    );
                    return MazeStep::NeedMarkers {
                        have,
                        need: self.min_markers,
                    };
                };
                let (item_id, item_name) = item;
                self.used_markers.insert(item_id.clone());
                map.assign_maze_marker(current, &item_id);
                return MazeStep::DropMarker {
                    room_id: current.to_string(),
                    item_id,
                    replacement: false,
                    command: format!("drop {item_name}"),
                };
            }
            Some(marker_id) => match items.get_item(&marker_id).map(|i| i.location.clone()) {
                Some(ItemLocation::Room(room)) if room == *current => {}
                Some(ItemLocation::Inventory) => {
                    // Still carried: the drop has not registered; reissue it.
                    let name = items
                        .get_item(&marker_id)
                        .map(|i| i.name.clone())
                        .unwrap_or_else(|| marker_id.clone());
                    return MazeStep::DropMarker {
                        room_id: current.to_string(),
                        item_id: marker_id,
                        replacement: false,
                        command: format!("drop {name}"),
                    };
                }
                _ => {
                    // The marker should be lying here but is not; something
                    // is stealing them.
                    if let Some((item_id, item_name)) = self.pick_marker(items, puzzle_items) {
                        tracing::warn!(
                            room = current,
                            lost = %marker_id,
                            "maze marker missing, dropping replacement"
                        );
                        self.used_markers.insert(item_id.clone());
                        map.assign_maze_marker(current, &item_id);
                        return MazeStep::DropMarker {
                            room_id: current.to_string(),
                            item_id,
                            replacement: true,
                            command: format!("drop {item_name}"),
                        };
                    }
                }
            },
        }

        // Mark every already-known maze room before opening new territory;
        // an unmarked room cannot be recognized on a later arrival.
        if let Some(direction) = self.toward_unmarked(map, current) {
            self.last_move_direction = Some(direction.clone());
            return MazeStep::Command(direction);
        }

        // Try this room's own unexplored exits. New territory warrants a
        // follow-up look to surface whatever is lying there.
        let unexplored = map.get_unexplored_exits(Some(current));
        if let Some((_, direction)) = unexplored.into_iter().next() {
            self.awaiting_look = true;
            self.last_move_direction = Some(direction.clone());
            return MazeStep::Command(direction);
        }

        // Otherwise walk known edges to the nearest room that still has one.
        if let Some(direction) = self.toward_unexplored(map, current) {
            self.last_move_direction = Some(direction.clone());
            return MazeStep::Command(direction);
        }

        // Every mentioned exit of every maze room has a destination.
        map.complete_maze(&self.group_id, turn);
        self.phase = Phase::Retrieving;
        MazeStep::Command("look".to_string())
    }

    fn retrieve_step(
        &mut self,
        map: &MapGraph,
        items: &ItemRegistry,
        current: &str,
    ) -> MazeStep {
        let Some(group) = map.get_maze_group(&self.group_id) else {
            return MazeStep::Finished;
        };

        // Pick up any of our markers lying in this room.
        for item in items.get_items_in_room(current) {
            if group.markers.values().any(|m| *m == item.item_id) {
                return MazeStep::TakeMarker {
                    item_id: item.item_id.clone(),
                    command: format!("take {}", item.name),
                };
            }
        }

        // Walk to the next room still holding one of our markers.
        for (room_id, marker_id) in &group.markers {
            let still_there = matches!(
                items.get_item(marker_id).map(|i| &i.location),
                Some(ItemLocation::Room(room)) if room == room_id
            );
            if !still_there {
                continue;
            }
            let path = map.get_path(current, room_id);
            if let Some(step) = path.into_iter().next() {
                return MazeStep::Command(step);
            }
            tracing::warn!(room_id = %room_id, marker = %marker_id, "marker unreachable, leaving it");
        }

        MazeStep::Finished
    }

    /// Choose the next unused droppable item for a marker.
    fn pick_marker(&self, items: &ItemRegistry, puzzle_items: &[String]) -> Option<(String, String)> {
        items
            .get_droppable_items(puzzle_items)
            .into_iter()
            .find(|i| !self.used_markers.contains(&i.item_id))
            .map(|i| (i.item_id.clone(), i.name.clone()))
    }

    /// Direction of the first step back toward the maze after stepping out.
    fn step_back_into_maze(&self, map: &MapGraph, current: &str) -> Option<String> {
        if let Some(last) = &self.last_maze_room {
            let path = map.get_path(current, last);
            if let Some(step) = path.into_iter().next() {
                return Some(step);
            }
        }
        self.last_move_direction
            .as_deref()
            .and_then(reverse_direction)
            .map(str::to_string)
    }

    /// First step toward the nearest maze room with unexplored exits.
    fn toward_unexplored(&self, map: &MapGraph, current: &str) -> Option<String> {
        self.toward(map, current, |map, room_id| {
            !map.get_unexplored_exits(Some(room_id)).is_empty()
        })
    }

    /// First step toward the nearest known maze room without a marker.
    fn toward_unmarked(&self, map: &MapGraph, current: &str) -> Option<String> {
        let group = map.get_maze_group(&self.group_id)?;
        let unmarked: HashSet<String> = group
            .room_ids
            .iter()
            .filter(|id| !group.markers.contains_key(*id))
            .cloned()
            .collect();
        if unmarked.is_empty() {
            return None;
        }
        self.toward(map, current, |_, room_id| unmarked.contains(room_id))
    }

    /// First step along the shortest path to the nearest maze room for
    /// which `wanted` holds.
    fn toward(
        &self,
        map: &MapGraph,
        current: &str,
        wanted: impl Fn(&MapGraph, &str) -> bool,
    ) -> Option<String> {
        let group = map.get_maze_group(&self.group_id)?;
        let mut best: Option<Vec<String>> = None;
        for room_id in &group.room_ids {
            if room_id == current || !wanted(map, room_id) {
                continue;
            }
            let path = map.get_path(current, room_id);
            if path.is_empty() {
                continue;
            }
            if best.as_ref().map(|b| path.len() < b.len()).unwrap_or(true) {
                best = Some(path);
            }
        }
        best.and_then(|p| p.into_iter().next())
    }
}
