pub mod game;
pub mod protocol;
pub mod shared;
pub mod timer;

pub use game::engine::{ApplyOutcome, GameEngine, Intent};
pub use game::state::{GamePhase, GameState, Player, TurnPhase};
pub use protocol::{PeerSession, SessionConfig};
pub use shared::{PeerId, ProtocolError};
