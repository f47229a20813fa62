//! Orchestrator behaviour: the turn pipeline, hook ordering, decision
//! fallbacks, death recovery, fatal interpreter errors, and crash resume.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use autofrotz::hooks::{Hook, HookResult};
use autofrotz::journal::Journal;
use autofrotz::orchestrator::{AgentClients, Orchestrator};
use autofrotz::testing::{MockLlm, ScriptedInterpreter};
use autofrotz::world::{GameStatus, ItemLocation};
use autofrotz::{GameError, OrchestratorConfig};

struct Mocks {
    game: Arc<MockLlm>,
    puzzle: Arc<MockLlm>,
    map: Arc<MockLlm>,
    item: Arc<MockLlm>,
}

impl Mocks {
    fn new() -> Self {
        Self {
            game: Arc::new(MockLlm::new()),
            puzzle: Arc::new(MockLlm::new()),
            map: Arc::new(MockLlm::new()),
            item: Arc::new(MockLlm::new()),
        }
    }

    fn clients(&self) -> AgentClients {
        AgentClients {
            game_agent: self.game.clone(),
            puzzle_agent: self.puzzle.clone(),
            map_parser: self.map.clone(),
            item_parser: self.item.clone(),
        }
    }
}

fn room_json(name: &str, description: &str, exits: &[&str]) -> Value {
    json!({
        "room_changed": true,
        "room_name": name,
        "description": description,
        "exits": exits,
        "is_dark": false,
        "items_seen": []
    })
}

fn config(max_turns: u32) -> OrchestratorConfig {
    OrchestratorConfig::new()
        .with_max_turns(max_turns)
        .with_llm_timeout(Duration::from_secs(1))
        .with_interpreter_timeout(Duration::from_secs(1))
}

#[derive(Clone, Default)]
struct RecordingHook {
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingHook {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl Hook for RecordingHook {
    fn on_game_start(&mut self, _game_id: i64, _game_file: &str) -> HookResult {
        self.push("game_start".to_string());
        Ok(())
    }

    fn on_turn_start(&mut self, turn_number: u32, _room_id: &str) -> HookResult {
        self.push(format!("turn_start:{turn_number}"));
        Ok(())
    }

    fn on_turn_end(
        &mut self,
        turn_number: u32,
        command: &str,
        _output: &str,
        _room_id: &str,
    ) -> HookResult {
        self.push(format!("turn_end:{turn_number}:{command}"));
        Ok(())
    }

    fn on_room_enter(
        &mut self,
        room_id: &str,
        _room_name: &str,
        _description: &str,
        is_new: bool,
    ) -> HookResult {
        self.push(format!("room_enter:{room_id}:{is_new}"));
        Ok(())
    }

    fn on_game_end(&mut self, _game_id: i64, status: &str, _total_turns: u32) -> HookResult {
        self.push(format!("game_end:{status}"));
        Ok(())
    }
}

/// A hook that always errors, to prove errors never propagate.
struct FaultyHook;

impl Hook for FaultyHook {
    fn on_turn_end(
        &mut self,
        _turn_number: u32,
        _command: &str,
        _output: &str,
        _room_id: &str,
    ) -> HookResult {
        Err("deliberately broken".into())
    }
}

#[tokio::test]
async fn pipeline_journals_every_executed_turn() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::open(dir.path().join("game.db")).unwrap();
    let mocks = Mocks::new();
    let interpreter = ScriptedInterpreter::new();
    let handle = interpreter.handle();

    handle.queue_response(
        "West of House",
        "You are standing in an open field west of a white house.",
    );
    handle.stub("north", "North of House", "You are facing the north side of the house.");
    handle.set_default("West of House", "Nothing happens.");

    mocks.map.queue_json(room_json(
        "West of House",
        "You are standing in an open field west of a white house.",
        &["north"],
    ));
    mocks.map.queue_json(room_json(
        "North of House",
        "You are facing the north side of the house.",
        &["south", "east"],
    ));
    mocks.game.queue_text("The only exit is north.\nACTION: north");

    let recorder = RecordingHook::default();
    let mut orchestrator = Orchestrator::new(
        config(2),
        journal,
        Box::new(interpreter),
        mocks.clients(),
        "zork1.z5",
    )
    .unwrap();
    orchestrator.register_hook(Box::new(recorder.clone()));
    orchestrator.register_hook(Box::new(FaultyHook));

    let status = orchestrator.run().await.unwrap();
    assert_eq!(status, GameStatus::Abandoned);

    // Every executed command has a journaled turn, and nothing else.
    assert_eq!(handle.commands(), vec!["look", "north", "look"]);
    let journal = Journal::open(dir.path().join("game.db")).unwrap();
    let game_id = orchestrator.game_id();
    let turns = journal.get_turns(game_id).unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].command_sent, "north");
    assert_eq!(turns[1].command_sent, "look");
    assert_eq!(
        journal.get_game(game_id).unwrap().unwrap().status,
        GameStatus::Abandoned
    );
    // Metrics were recorded for the parser and agent calls.
    assert!(!journal.get_metrics(game_id).unwrap().is_empty());

    // Map state was built along the way.
    assert_eq!(
        orchestrator
            .map()
            .get_connection("west_of_house", "north")
            .unwrap()
            .to_room,
        "north_of_house"
    );

    // Hooks fired in order, after the turn was journaled, and the broken
    // hook never disturbed the run.
    assert_eq!(
        recorder.events(),
        vec![
            "game_start".to_string(),
            "turn_start:1".to_string(),
            "room_enter:west_of_house:true".to_string(),
            "turn_end:1:north".to_string(),
            "turn_start:2".to_string(),
            "room_enter:north_of_house:true".to_string(),
            "turn_end:2:look".to_string(),
            "game_end:abandoned".to_string(),
        ]
    );
}

#[tokio::test]
async fn missing_action_marker_falls_back_to_look() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::open(dir.path().join("game.db")).unwrap();
    let mocks = Mocks::new();
    mocks.game.set_default_text("I am pondering my next move.");
    let interpreter = ScriptedInterpreter::new();
    let handle = interpreter.handle();
    handle.set_default("West of House", "You are standing in an open field.");

    let mut orchestrator = Orchestrator::new(
        config(1),
        journal,
        Box::new(interpreter),
        mocks.clients(),
        "zork1.z5",
    )
    .unwrap();
    orchestrator.run().await.unwrap();

    // Bootstrap look, then the fallback look for turn 1.
    assert_eq!(handle.commands(), vec!["look", "look"]);
    let journal = Journal::open(dir.path().join("game.db")).unwrap();
    let turns = journal.get_turns(orchestrator.game_id()).unwrap();
    assert_eq!(turns[0].command_sent, "look");
    assert!(turns[0].agent_reasoning.contains("fallback"));
}

#[tokio::test]
async fn death_restores_and_continues() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::open(dir.path().join("game.db")).unwrap();
    let mocks = Mocks::new();
    let interpreter = ScriptedInterpreter::new();
    let handle = interpreter.handle();

    handle.queue_response("West of House", "An open field.");
    handle.stub(
        "east",
        "Canyon Bottom",
        "You tumble down the cliff.\n   ****  You have died  ****",
    );
    handle.set_default("West of House", "An open field.");
    mocks.game.queue_text("The canyon looks passable.\nACTION: east");

    let mut orchestrator = Orchestrator::new(
        config(2),
        journal,
        Box::new(interpreter),
        mocks.clients(),
        "zork1.z5",
    )
    .unwrap();
    let status = orchestrator.run().await.unwrap();

    // Death was not terminal: a restore happened and play continued.
    assert_eq!(status, GameStatus::Abandoned);
    assert_eq!(handle.restores(), vec![0]);
    let journal = Journal::open(dir.path().join("game.db")).unwrap();
    let turns = journal.get_turns(orchestrator.game_id()).unwrap();
    assert_eq!(turns.len(), 2);
    assert!(turns[0].game_output.contains("died"));
}

#[tokio::test]
async fn death_without_recovery_loses_the_game() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::open(dir.path().join("game.db")).unwrap();
    let mocks = Mocks::new();
    let interpreter = ScriptedInterpreter::new();
    let handle = interpreter.handle();
    handle.queue_response("West of House", "An open field.");
    handle.set_default("Canyon Bottom", "   ****  You have died  ****");

    let mut orchestrator = Orchestrator::new(
        config(5).with_save_on_death(false),
        journal,
        Box::new(interpreter),
        mocks.clients(),
        "zork1.z5",
    )
    .unwrap();
    let status = orchestrator.run().await.unwrap();
    assert_eq!(status, GameStatus::Lost);
    assert!(handle.restores().is_empty());
    let journal = Journal::open(dir.path().join("game.db")).unwrap();
    assert_eq!(
        journal.get_game(orchestrator.game_id()).unwrap().unwrap().status,
        GameStatus::Lost
    );
}

#[tokio::test]
async fn victory_ends_the_game_as_won() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::open(dir.path().join("game.db")).unwrap();
    let mocks = Mocks::new();
    let interpreter = ScriptedInterpreter::new();
    let handle = interpreter.handle();
    handle.queue_response("West of House", "An open field.");
    handle.set_default(
        "Treasure Room",
        "Congratulations! You have won the game with all 350 points.",
    );

    let mut orchestrator = Orchestrator::new(
        config(10),
        journal,
        Box::new(interpreter),
        mocks.clients(),
        "zork1.z5",
    )
    .unwrap();
    let status = orchestrator.run().await.unwrap();
    assert_eq!(status, GameStatus::Won);
}

#[tokio::test]
async fn interpreter_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::open(dir.path().join("game.db")).unwrap();
    let mocks = Mocks::new();
    let interpreter = ScriptedInterpreter::new();
    interpreter.handle().set_fail_commands(true);

    let mut orchestrator = Orchestrator::new(
        config(5),
        journal,
        Box::new(interpreter),
        mocks.clients(),
        "zork1.z5",
    )
    .unwrap();
    let err = orchestrator.run().await.unwrap_err();
    assert!(matches!(err, GameError::Interpreter(_)));
}

#[tokio::test]
async fn crash_resume_continues_from_the_next_turn() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("game.db");

    // --- First process: play two turns, then crash (drop without ending).
    let mocks = Mocks::new();
    let interpreter = ScriptedInterpreter::new();
    let handle = interpreter.handle();
    handle.queue_response(
        "West of House",
        "You are standing in an open field. There is a leaflet here.",
    );
    handle.stub("take", "West of House", "Taken.");
    handle.stub("north", "North of House", "You are facing the north side of the house.");

    mocks.map.queue_json(room_json(
        "West of House",
        "You are standing in an open field.",
        &["north"],
    ));
    mocks.item.queue_json(json!({"updates": [
        {"item_id": "leaflet", "name": "leaflet", "change_type": "new", "location": "west_of_house"}
    ]}));
    mocks.game.queue_text("Grab the leaflet first.\nACTION: take leaflet");
    mocks.item.queue_json(json!({"updates": [
        {"item_id": "leaflet", "name": "leaflet", "change_type": "taken"}
    ]}));
    mocks.game.queue_text("Now explore.\nACTION: north");

    let journal = Journal::open(&db_path).unwrap();
    let mut first = Orchestrator::new(
        config(100),
        journal,
        Box::new(interpreter),
        mocks.clients(),
        "zork1.z5",
    )
    .unwrap();
    assert!(!first.is_resuming());
    let game_id = first.game_id();

    let out0 = first.bootstrap().await.unwrap();
    let out1 = first.step(&out0).await.unwrap();
    assert_eq!(out1, "Taken.");
    let _out2 = first.step(&out1).await.unwrap();
    assert_eq!(first.turn_number(), 2);
    let rooms_before_crash: Vec<String> = {
        let mut ids: Vec<String> = first
            .map()
            .get_all_rooms()
            .iter()
            .map(|r| r.room_id.clone())
            .collect();
        ids.sort();
        ids
    };
    drop(first); // crash: the games row stays 'playing'

    // --- Second process: resume from the journal.
    let mocks = Mocks::new();
    let interpreter = ScriptedInterpreter::new();
    let handle = interpreter.handle();
    handle.set_default("West of House", "You are standing in an open field.");
    mocks.map.queue_json(room_json(
        "West of House",
        "You are standing in an open field.",
        &["north"],
    ));

    let journal = Journal::open(&db_path).unwrap();
    let mut resumed = Orchestrator::new(
        config(100),
        journal,
        Box::new(interpreter),
        mocks.clients(),
        "zork1.z5",
    )
    .unwrap();
    assert!(resumed.is_resuming());
    assert_eq!(resumed.game_id(), game_id);
    assert_eq!(resumed.turn_number(), 2);

    // The room graph and inventory match the state at commit of turn 2.
    let mut rooms_after_resume: Vec<String> = resumed
        .map()
        .get_all_rooms()
        .iter()
        .map(|r| r.room_id.clone())
        .collect();
    rooms_after_resume.sort();
    assert_eq!(rooms_after_resume, rooms_before_crash);
    assert_eq!(
        resumed.items().get_item("leaflet").unwrap().location,
        ItemLocation::Inventory
    );

    // Resumption restores a save and executes the next turn number.
    let output = resumed.bootstrap().await.unwrap();
    assert_eq!(handle.restores(), vec![0]);
    resumed.step(&output).await.unwrap();
    assert_eq!(resumed.turn_number(), 3);

    let journal = Journal::open(&db_path).unwrap();
    let turn3 = journal.get_turn(game_id, 3).unwrap().unwrap();
    assert!(turn3
        .inventory_snapshot
        .contains(&"leaflet".to_string()));
}
