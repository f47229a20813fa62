//! Z-Machine interpreter collaborator interface.
//!
//! The orchestrator talks to the game exclusively through [`Interpreter`].
//! The terminal wrapper that actually spawns frotz lives outside this
//! crate; tests use [`crate::testing::ScriptedInterpreter`].

use crate::error::InterpreterError;
use async_trait::async_trait;

/// Phrases indicating player death. Matched against lowercased output.
const DEATH_PHRASES: &[&str] = &[
    "you have died",
    "you are dead",
    "you have been killed",
    "you are killed",
    "you died",
    "your adventure is over",
    "you are swallowed",
    "you have perished",
];

/// Phrases indicating victory. Matched against lowercased output.
const VICTORY_PHRASES: &[&str] = &["you have won", "*** the end ***", "you have finished"];

/// Classification of one batch of game output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputClass {
    Normal,
    Death,
    Victory,
}

/// Check game output for death or victory conditions.
pub fn classify_output(text: &str) -> OutputClass {
    if text.is_empty() {
        return OutputClass::Normal;
    }
    let lowered = text.to_lowercase();

    // Death first; dying is far more common than winning.
    if DEATH_PHRASES.iter().any(|p| lowered.contains(p))
        || (lowered.contains("last command") && lowered.contains("fatal"))
    {
        return OutputClass::Death;
    }
    if VICTORY_PHRASES.iter().any(|p| lowered.contains(p))
        || (lowered.contains("congratulations") && lowered.contains("won"))
    {
        return OutputClass::Victory;
    }
    OutputClass::Normal
}

/// The interpreter running the game file.
///
/// `do_command` may block on process I/O; the orchestrator wraps every call
/// in its configured timeout and treats interpreter failure as fatal.
#[async_trait]
pub trait Interpreter: Send {
    /// Send a command and return `(room_name, output_text)`.
    async fn do_command(&mut self, command: &str) -> Result<(String, String), InterpreterError>;

    /// Save the game state to a numbered slot.
    async fn save(&mut self, slot: u32) -> Result<(), InterpreterError>;

    /// Restore the game state from a numbered slot.
    async fn restore(&mut self, slot: u32) -> Result<(), InterpreterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_death() {
        assert_eq!(
            classify_output("   ****  You have died  ****\nYour score is 30 points."),
            OutputClass::Death
        );
        assert_eq!(
            classify_output("It appears that last command was fatal."),
            OutputClass::Death
        );
    }

    #[test]
    fn test_classify_victory() {
        assert_eq!(
            classify_output("Congratulations! You have won the game."),
            OutputClass::Victory
        );
        assert_eq!(classify_output("*** The End ***"), OutputClass::Victory);
    }

    #[test]
    fn test_classify_normal() {
        assert_eq!(
            classify_output("You are standing in an open field west of a white house."),
            OutputClass::Normal
        );
        // "the end" without the banner asterisks is just prose.
        assert_eq!(
            classify_output("You reach the end of the rope."),
            OutputClass::Normal
        );
        assert_eq!(classify_output(""), OutputClass::Normal);
    }
}
