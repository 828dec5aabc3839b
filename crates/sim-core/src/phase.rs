//! Game phases of the authoritative state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of the game timeline. Drives timing and trade eligibility.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// Session created, no round started yet.
    #[default]
    Idle,
    /// Trading days are running.
    Round,
    /// Settlement results are displayed.
    Result,
    /// Item selection window before the next round.
    Prep,
    /// Game over.
    Finished,
}

impl GamePhase {
    /// Trades are only accepted while a round is running.
    pub fn allows_trading(self) -> bool {
        matches!(self, GamePhase::Round)
    }

    /// Phases that count down a duration.
    pub fn is_running(self) -> bool {
        matches!(self, GamePhase::Round | GamePhase::Result | GamePhase::Prep)
    }
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GamePhase::Idle => "idle",
            GamePhase::Round => "round",
            GamePhase::Result => "result",
            GamePhase::Prep => "prep",
            GamePhase::Finished => "finished",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_round_allows_trading() {
        assert!(GamePhase::Round.allows_trading());
        for p in [
            GamePhase::Idle,
            GamePhase::Result,
            GamePhase::Prep,
            GamePhase::Finished,
        ] {
            assert!(!p.allows_trading(), "{p} should not allow trading");
        }
        assert!(GamePhase::Prep.is_running());
        assert!(!GamePhase::Finished.is_running());
    }
}
