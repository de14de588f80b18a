//! The action catalog: which abstract actions are valid in each phase,
//! their parameter schemas, and parameter validation.
//!
//! The catalog is the one mapping the rest of the bridge trusts. The phase
//! loop registers exactly the actions this module returns for the current
//! phase, and the executor only ever receives parameters that passed
//! [`Catalog::parse_params`].

use schemars::schema_for;
use serde::Deserialize;
use serde_json::Value;

use crate::config::GameConfig;
use crate::page::PageSnapshot;
use crate::phase::GamePhase;

/// The abstract actions the bridge can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Pick the player name before joining. Startup-only, never re-registered
    /// during play.
    SetName,
    /// Write a free-text answer to the current prompt.
    SubmitAnswer,
    /// Pick one of the offered canned answers.
    ChooseAnswer,
    /// Vote for one of the displayed answers.
    CastVote,
}

impl ActionKind {
    /// Wire name used in registration and incoming decisions.
    pub fn name(self) -> &'static str {
        match self {
            ActionKind::SetName => "set_name",
            ActionKind::SubmitAnswer => "submit_answer",
            ActionKind::ChooseAnswer => "choose_answer",
            ActionKind::CastVote => "cast_vote",
        }
    }

    /// Reverse lookup from a wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "set_name" => Some(ActionKind::SetName),
            "submit_answer" => Some(ActionKind::SubmitAnswer),
            "choose_answer" => Some(ActionKind::ChooseAnswer),
            "cast_vote" => Some(ActionKind::CastVote),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct SetNameParams {
    #[schemars(description = "The name you want to play under")]
    name: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct SubmitAnswerParams {
    #[schemars(description = "Your answer to the prompt")]
    answer: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ChooseAnswerParams {
    #[schemars(description = "Number of the answer to pick, starting at 1")]
    choice: u32,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct CastVoteParams {
    #[schemars(description = "Number of the answer to vote for, starting at 1")]
    vote: u32,
}

/// One registrable action: wire name, agent-facing description, and JSON
/// schema for its parameters.
#[derive(Debug, Clone)]
pub struct AbstractAction {
    pub kind: ActionKind,
    pub description: String,
    pub schema: Value,
}

impl AbstractAction {
    fn new(kind: ActionKind, description: String, schema: Value) -> Self {
        Self {
            kind,
            description,
            schema,
        }
    }
}

/// Validated, executor-ready parameters. Indices are zero-based here; the
/// agent-facing protocol is one-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionParams {
    SetName { name: String },
    SubmitAnswer { answer: String },
    ChooseAnswer { index: usize },
    CastVote { index: usize },
}

/// Builds per-phase action sets and validates incoming parameters.
#[derive(Debug, Clone)]
pub struct Catalog {
    game: GameConfig,
}

impl Catalog {
    pub fn new(game: GameConfig) -> Self {
        Self { game }
    }

    /// The startup-only name action, registered before joining the room.
    pub fn set_name_action(&self) -> AbstractAction {
        AbstractAction::new(
            ActionKind::SetName,
            format!(
                "Set the name you will play under. At most {} characters.",
                self.game.max_name_length
            ),
            schema_value(schema_for!(SetNameParams)),
        )
    }

    /// The actions valid for `phase`, with descriptions built from what is
    /// actually on screen. Phases with nothing for the player to do return
    /// an empty set.
    pub fn actions_for(&self, phase: GamePhase, snapshot: &PageSnapshot) -> Vec<AbstractAction> {
        match phase {
            GamePhase::PromptEntry => vec![AbstractAction::new(
                ActionKind::SubmitAnswer,
                format!(
                    "Write your answer to the prompt: {}\nAt most {} characters.",
                    snapshot.prompt_text, self.game.max_answer_length
                ),
                schema_value(schema_for!(SubmitAnswerParams)),
            )],
            GamePhase::AnswerSelection => vec![AbstractAction::new(
                ActionKind::ChooseAnswer,
                format!(
                    "Pick one of the offered answers by number.\n{}",
                    numbered(&snapshot.selection_options)
                ),
                schema_value(schema_for!(ChooseAnswerParams)),
            )],
            GamePhase::Voting => vec![AbstractAction::new(
                ActionKind::CastVote,
                format!(
                    "Vote for your favorite answer by number.\n{}",
                    numbered(&snapshot.vote_options)
                ),
                schema_value(schema_for!(CastVoteParams)),
            )],
            GamePhase::Lobby
            | GamePhase::Results
            | GamePhase::RoundTransition
            | GamePhase::Unknown => Vec::new(),
        }
    }

    /// Validate raw decision parameters against the current snapshot.
    ///
    /// `Err` carries the message reported back to the agent in the failed
    /// action result; the page is never touched on a validation failure.
    pub fn parse_params(
        &self,
        kind: ActionKind,
        data: &Value,
        snapshot: &PageSnapshot,
    ) -> std::result::Result<ActionParams, String> {
        match kind {
            ActionKind::SetName => {
                let params: SetNameParams = decode(data)?;
                let name = params.name.trim().to_string();
                if name.is_empty() {
                    return Err("Name must not be empty.".into());
                }
                if name.chars().count() > self.game.max_name_length {
                    return Err(format!(
                        "Name too long: at most {} characters.",
                        self.game.max_name_length
                    ));
                }
                Ok(ActionParams::SetName { name })
            }
            ActionKind::SubmitAnswer => {
                let params: SubmitAnswerParams = decode(data)?;
                let answer = params.answer.trim().to_string();
                if answer.is_empty() {
                    return Err("Answer must not be empty.".into());
                }
                if answer.chars().count() > self.game.max_answer_length {
                    return Err(format!(
                        "Answer too long: at most {} characters.",
                        self.game.max_answer_length
                    ));
                }
                Ok(ActionParams::SubmitAnswer { answer })
            }
            ActionKind::ChooseAnswer => {
                let params: ChooseAnswerParams = decode(data)?;
                let index = one_based(params.choice, snapshot.selection_options.len(), "choice")?;
                Ok(ActionParams::ChooseAnswer { index })
            }
            ActionKind::CastVote => {
                let params: CastVoteParams = decode(data)?;
                let index = one_based(params.vote, snapshot.vote_options.len(), "vote")?;
                Ok(ActionParams::CastVote { index })
            }
        }
    }
}

fn decode<'de, T: Deserialize<'de>>(data: &'de Value) -> std::result::Result<T, String> {
    T::deserialize(data).map_err(|e| format!("Invalid parameters: {e}"))
}

fn one_based(value: u32, len: usize, field: &str) -> std::result::Result<usize, String> {
    if value == 0 || value as usize > len {
        return Err(format!(
            "Invalid {field}: must be between 1 and {len}."
        ));
    }
    Ok(value as usize - 1)
}

/// Render options as a one-based numbered list, the way the agent sees them.
pub(crate) fn numbered(options: &[String]) -> String {
    options
        .iter()
        .enumerate()
        .map(|(i, text)| format!("{}. {}", i + 1, text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn schema_value(schema: schemars::Schema) -> Value {
    schema.to_value()
}
