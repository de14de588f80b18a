//! Phase classification over a page snapshot.

use std::fmt;

use crate::page::PageSnapshot;

/// The game phases the bridge distinguishes.
///
/// Exactly one phase is active at any instant from the bridge's point of
/// view. `Unknown` is a valid transient classification during screen
/// transitions; it is never silently replaced by a stale previous phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GamePhase {
    /// Waiting room before and between games.
    Lobby,
    /// A prompt is on screen and a free-text answer is expected.
    PromptEntry,
    /// Canned answer candidates are offered for selection.
    AnswerSelection,
    /// Vote targets are on screen.
    Voting,
    /// Round results banner.
    Results,
    /// Interstitial between phases (including waiting on other players).
    RoundTransition,
    /// No phase marker matched.
    Unknown,
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GamePhase::Lobby => "lobby",
            GamePhase::PromptEntry => "prompt-entry",
            GamePhase::AnswerSelection => "answer-selection",
            GamePhase::Voting => "voting",
            GamePhase::Results => "results",
            GamePhase::RoundTransition => "round-transition",
            GamePhase::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Classify the current phase from a page snapshot.
///
/// Predicates are evaluated in a fixed priority order — explicit end states
/// before more general states — so a screen that momentarily satisfies two
/// markers cannot double-match. The previous classification is deliberately
/// not consulted: when no marker matches the result is an explicit
/// `Unknown`, which guards against acting on a phase whose markers have
/// already disappeared.
pub fn detect(snapshot: &PageSnapshot) -> GamePhase {
    if snapshot.results {
        return GamePhase::Results;
    }
    if snapshot.round_banner {
        return GamePhase::RoundTransition;
    }
    if snapshot.voting_active {
        // The vote container doubles as the waiting interstitial.
        if snapshot.waiting || snapshot.vote_options.is_empty() {
            return GamePhase::RoundTransition;
        }
        return GamePhase::Voting;
    }
    if snapshot.selection_active && !snapshot.selection_options.is_empty() {
        return GamePhase::AnswerSelection;
    }
    if snapshot.prompt_active {
        return GamePhase::PromptEntry;
    }
    if snapshot.lobby {
        return GamePhase::Lobby;
    }
    GamePhase::Unknown
}
