//! Autonomous text-adventure agent core.
//!
//! AutoFrotz plays classic Z-Machine games (Zork, Planetfall) through an
//! interpreter collaborator, using language-model agents for parsing and
//! decision-making. This crate provides:
//! - The turn orchestrator: a Parse -> Evaluate -> Decide -> Execute ->
//!   Persist -> Notify state machine with NORMAL and MAZE modes
//! - A persistent room graph with pathfinding and maze detection
//! - An item registry with portability evidence and carry-limit discovery
//! - A puzzle tracker with throttled cross-referencing and algorithmic
//!   stuck detection
//! - A durable SQLite turn journal that makes crash recovery deterministic
//!
//! The language-model providers and the interpreter process itself are
//! external collaborators behind the [`llm::LlmClient`] and
//! [`interpreter::Interpreter`] traits.
//!
//! # Quick Start
//!
//! ```ignore
//! use autofrotz::{AgentClients, Journal, Orchestrator, OrchestratorConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let journal = Journal::open("autofrotz.db")?;
//!     let clients = AgentClients {
//!         game_agent: game_llm,
//!         puzzle_agent: puzzle_llm,
//!         map_parser: parser_llm.clone(),
//!         item_parser: parser_llm,
//!     };
//!     let mut orchestrator = Orchestrator::new(
//!         OrchestratorConfig::default(),
//!         journal,
//!         Box::new(frotz_wrapper),
//!         clients,
//!         "zork1.z5",
//!     )?;
//!     let status = orchestrator.run().await?;
//!     println!("game over: {status}");
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod hooks;
pub mod interpreter;
pub mod items;
pub mod journal;
pub mod llm;
pub mod map;
pub mod maze;
pub mod orchestrator;
pub mod puzzles;
pub mod testing;
pub mod world;

// Primary public API
pub use config::OrchestratorConfig;
pub use error::{GameError, GameResult, InterpreterError, JournalError, LlmError};
pub use hooks::{Hook, HookResult};
pub use interpreter::{classify_output, Interpreter, OutputClass};
pub use items::ItemRegistry;
pub use journal::Journal;
pub use llm::{ChatMessage, ChatRequest, Completion, LlmClient, TokenUsage};
pub use map::MapGraph;
pub use maze::{MazeSolver, MazeStep};
pub use orchestrator::{AgentClients, Orchestrator};
pub use puzzles::PuzzleTracker;
pub use world::{GameStatus, Item, MazeGroup, Puzzle, Room, TurnRecord};
