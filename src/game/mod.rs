pub mod cards;
pub mod deck;
pub mod engine;
pub mod powerup;
pub mod stack;
pub mod state;
mod turn;

pub use cards::{Card, CardId, CardRef, Rank, Suit};
pub use engine::{ApplyOutcome, GameEngine, Intent};
pub use powerup::{PowerUpAction, PowerUpSelection, PowerUpStage, PowerUpState};
pub use stack::{pick_stack_winner, ClaimOutcome, StackClaim, StackRace, STACK_WINDOW_MS};
pub use state::{GameError, GamePhase, GameState, Player, PlayerScore, TurnPhase, UiAnimation};
