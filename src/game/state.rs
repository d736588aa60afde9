use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cards::{Card, CardId, CardRef};
use super::powerup::PowerUpState;
use super::stack::StackRace;
use crate::shared::PeerId;

/// Coarse lifecycle phase of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    Waiting,
    ViewingCards,
    Playing,
    FinalRound,
    GameOver,
}

/// Sub-phase of the acting player's turn. Only meaningful while the phase
/// is `Playing` or `FinalRound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Draw,
    Decide,
    PowerUp,
    Stacking,
}

/// Rule violations raised by the state machines. These never cross the
/// engine boundary as failures; `apply_intent` turns them into logged
/// no-ops.
#[derive(Debug, Clone, Error)]
pub enum GameError {
    #[error("not this player's turn")]
    NotYourTurn,

    #[error("unknown player: {0}")]
    UnknownPlayer(PeerId),

    #[error("action not legal in phase {0:?}")]
    WrongPhase(GamePhase),

    #[error("action not legal in turn phase {0:?}")]
    WrongTurnPhase(TurnPhase),

    #[error("card index {0} out of range")]
    CardIndexOutOfRange(usize),

    #[error("no drawn card held")]
    NoDrawnCard,

    #[error("discard pile is empty")]
    EmptyDiscard,

    #[error("deck exhausted and discard pile too small to reshuffle")]
    DeckExhausted,

    #[error("no power-up is armed")]
    NoPowerUp,

    #[error("invalid power-up selection")]
    InvalidSelection,

    #[error("no stack race in progress")]
    NoStackRace,

    #[error("stacking is blocked until a new card is discarded")]
    StackBlocked,

    #[error("reds has already been called")]
    RedsAlreadyCalled,

    #[error("not awaiting a card give")]
    NotAwaitingGive,

    #[error("only the host may do this")]
    NotHost,

    #[error("at least two players are required")]
    NotEnoughPlayers,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: PeerId,
    pub name: String,
    pub cards: Vec<Card>,
    pub is_host: bool,
    pub is_ready: bool,
    pub is_connected: bool,
    pub has_seen_bottom_cards: bool,
    pub has_called_reds: bool,
}

impl Player {
    pub fn new(id: impl Into<PeerId>, name: impl Into<String>, is_host: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            cards: Vec::new(),
            is_host,
            is_ready: false,
            is_connected: true,
            has_seen_bottom_cards: false,
            has_called_reds: false,
        }
    }

    /// The two hand slots a player may preview during the viewing phase.
    pub fn bottom_cards(&self) -> &[Card] {
        &self.cards[..self.cards.len().min(2)]
    }

    pub fn hand_score(&self) -> i32 {
        self.cards.iter().map(|c| c.score_value()).sum()
    }
}

/// Transient UI-sync data. Lives inside the replicated state so every peer
/// converges on the same highlight/animation cues; an explicit discriminant
/// keeps illegal field combinations unrepresentable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UiAnimation {
    InspectingCard { viewer_id: PeerId, target: CardRef },
    SwapAnimation { first: CardRef, second: CardRef },
    StackRaceAnimation { claimant_id: PeerId, matched: bool },
    CardMoveAnimation { player_id: PeerId, from_discard: bool },
}

/// One row of the final scoreboard, ascending by score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerScore {
    pub player_id: PeerId,
    pub name: String,
    pub score: i32,
}

/// The root aggregate: the single source of truth for one table.
///
/// Mutated exclusively through the turn state machine, the power-up
/// sub-machine and the stack race arbitrator; everything else reads
/// snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameState {
    pub game_code: String,
    pub phase: GamePhase,
    pub turn_phase: TurnPhase,
    pub current_player_index: usize,
    pub players: Vec<Player>,
    /// Face-down stock; cards are drawn from the back.
    pub deck: Vec<Card>,
    /// Ordered, index 0 = top.
    pub discard_pile: Vec<Card>,
    /// At most one, held by the acting player between draw and decide.
    pub drawn_card: Option<Card>,
    pub current_power_up: Option<PowerUpState>,
    pub pending_stack_race: Option<StackRace>,
    /// Blocks stacking on a discard top that was itself placed by a stack,
    /// until a normal draw/discard cycle replaces it.
    pub last_discard_was_stack: bool,
    pub reds_caller_id: Option<PeerId>,
    pub final_round_turns_remaining: usize,
    pub winner: Option<PeerId>,
    /// Strictly increases on every committed mutation; replicas use it to
    /// drop stale updates.
    pub state_version: u64,
    pub last_action: String,
    pub animation: Option<UiAnimation>,
}

/// Human-readable room code, e.g. "merry-otter".
pub fn generate_game_code() -> String {
    petname::Petnames::default().generate_one(2, "-")
}

impl GameState {
    pub fn new(game_code: impl Into<String>) -> Self {
        Self {
            game_code: game_code.into(),
            phase: GamePhase::Waiting,
            turn_phase: TurnPhase::Draw,
            current_player_index: 0,
            players: Vec::new(),
            deck: Vec::new(),
            discard_pile: Vec::new(),
            drawn_card: None,
            current_power_up: None,
            pending_stack_race: None,
            last_discard_was_stack: false,
            reds_caller_id: None,
            final_round_turns_remaining: 0,
            winner: None,
            state_version: 0,
            last_action: String::new(),
            animation: None,
        }
    }

    pub fn player(&self, id: &PeerId) -> Option<&Player> {
        self.players.iter().find(|p| &p.id == id)
    }

    pub fn player_mut(&mut self, id: &PeerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| &p.id == id)
    }

    pub fn player_index(&self, id: &PeerId) -> Option<usize> {
        self.players.iter().position(|p| &p.id == id)
    }

    pub fn current_player(&self) -> Option<&Player> {
        self.players.get(self.current_player_index)
    }

    pub fn top_discard(&self) -> Option<&Card> {
        self.discard_pile.first()
    }

    pub fn is_current(&self, id: &PeerId) -> bool {
        self.current_player().map(|p| &p.id == id).unwrap_or(false)
    }

    pub(crate) fn ensure_playing(&self) -> Result<(), GameError> {
        match self.phase {
            GamePhase::Playing | GamePhase::FinalRound => Ok(()),
            phase => Err(GameError::WrongPhase(phase)),
        }
    }

    pub(crate) fn ensure_current(&self, id: &PeerId) -> Result<(), GameError> {
        if self.player(id).is_none() {
            return Err(GameError::UnknownPlayer(id.clone()));
        }
        if !self.is_current(id) {
            return Err(GameError::NotYourTurn);
        }
        Ok(())
    }

    pub(crate) fn log_action(&mut self, action: impl Into<String>) {
        self.last_action = action.into();
    }

    /// Places a card face up on top of the discard pile, re-opening the
    /// stack window for it.
    pub(crate) fn place_on_discard(&mut self, mut card: Card) {
        card.face_up = true;
        self.discard_pile.insert(0, card);
        self.last_discard_was_stack = false;
    }

    /// Exchanges two cards in place between two different players' hands,
    /// preserving both indices.
    pub(crate) fn swap_cards_between(&mut self, a: &CardRef, b: &CardRef) -> Result<(), GameError> {
        let ai = self
            .player_index(&a.player_id)
            .ok_or_else(|| GameError::UnknownPlayer(a.player_id.clone()))?;
        let bi = self
            .player_index(&b.player_id)
            .ok_or_else(|| GameError::UnknownPlayer(b.player_id.clone()))?;
        if ai == bi {
            return Err(GameError::InvalidSelection);
        }
        if a.card_index >= self.players[ai].cards.len() {
            return Err(GameError::CardIndexOutOfRange(a.card_index));
        }
        if b.card_index >= self.players[bi].cards.len() {
            return Err(GameError::CardIndexOutOfRange(b.card_index));
        }

        let (lo, hi) = if ai < bi { (ai, bi) } else { (bi, ai) };
        let (lo_idx, hi_idx) = if ai < bi {
            (a.card_index, b.card_index)
        } else {
            (b.card_index, a.card_index)
        };
        let (left, right) = self.players.split_at_mut(hi);
        std::mem::swap(
            &mut left[lo].cards[lo_idx],
            &mut right[0].cards[hi_idx],
        );
        Ok(())
    }

    /// Sorted multiset of every card id across deck, discard, hands and the
    /// drawn-card slot. Constant for the lifetime of a game.
    pub fn card_census(&self) -> Vec<CardId> {
        let mut ids: Vec<CardId> = self
            .deck
            .iter()
            .chain(self.discard_pile.iter())
            .chain(self.players.iter().flat_map(|p| p.cards.iter()))
            .chain(self.drawn_card.iter())
            .map(|c| c.id)
            .collect();
        ids.sort();
        ids
    }

    /// Final standings, ascending by score (lowest wins).
    pub fn scoreboard(&self) -> Vec<PlayerScore> {
        let mut scores: Vec<PlayerScore> = self
            .players
            .iter()
            .map(|p| PlayerScore {
                player_id: p.id.clone(),
                name: p.name.clone(),
                score: p.hand_score(),
            })
            .collect();
        scores.sort_by_key(|s| s.score);
        scores
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::cards::{Rank, Suit};

    fn two_player_state() -> GameState {
        let mut state = GameState::new("test-room");
        state.players.push(Player::new("p1", "Alice", true));
        state.players.push(Player::new("p2", "Bob", false));
        state
    }

    #[test]
    fn test_player_lookup() {
        let state = two_player_state();
        assert_eq!(state.player(&"p1".to_string()).unwrap().name, "Alice");
        assert_eq!(state.player_index(&"p2".to_string()), Some(1));
        assert!(state.player(&"nope".to_string()).is_none());
    }

    #[test]
    fn test_swap_cards_between_preserves_indices() {
        let mut state = two_player_state();
        let alice_card = Card::new(Rank::Three, Suit::Hearts);
        let bob_card = Card::new(Rank::King, Suit::Spades);
        let alice_id = alice_card.id;
        let bob_id = bob_card.id;
        state.players[0].cards = vec![Card::new(Rank::Ace, Suit::Clubs), alice_card];
        state.players[1].cards = vec![bob_card];

        state
            .swap_cards_between(&CardRef::new("p1", 1), &CardRef::new("p2", 0))
            .unwrap();

        assert_eq!(state.players[0].cards[1].id, bob_id);
        assert_eq!(state.players[1].cards[0].id, alice_id);
    }

    #[test]
    fn test_swap_cards_between_rejects_self_and_bad_index() {
        let mut state = two_player_state();
        state.players[0].cards = vec![Card::new(Rank::Ace, Suit::Clubs)];
        state.players[1].cards = vec![Card::new(Rank::Two, Suit::Clubs)];

        let same = state.swap_cards_between(&CardRef::new("p1", 0), &CardRef::new("p1", 0));
        assert!(matches!(same.unwrap_err(), GameError::InvalidSelection));

        let oob = state.swap_cards_between(&CardRef::new("p1", 3), &CardRef::new("p2", 0));
        assert!(matches!(oob.unwrap_err(), GameError::CardIndexOutOfRange(3)));
    }

    #[test]
    fn test_scoreboard_ascending() {
        let mut state = two_player_state();
        state.players[0].cards = vec![Card::new(Rank::King, Suit::Spades)]; // 13
        state.players[1].cards = vec![Card::new(Rank::King, Suit::Hearts)]; // -2
        let board = state.scoreboard();
        assert_eq!(board[0].player_id, "p2");
        assert_eq!(board[0].score, -2);
        assert_eq!(board[1].score, 13);
    }

    #[test]
    fn test_card_census_covers_every_container() {
        let mut state = two_player_state();
        let in_hand = Card::new(Rank::Two, Suit::Clubs);
        let in_deck = Card::new(Rank::Three, Suit::Clubs);
        let in_discard = Card::new(Rank::Four, Suit::Clubs);
        let drawn = Card::new(Rank::Five, Suit::Clubs);
        let mut expected = vec![in_hand.id, in_deck.id, in_discard.id, drawn.id];
        expected.sort();

        state.players[0].cards.push(in_hand);
        state.deck.push(in_deck);
        state.discard_pile.push(in_discard);
        state.drawn_card = Some(drawn);

        assert_eq!(state.card_census(), expected);
    }

    #[test]
    fn test_animation_serializes_with_discriminant() {
        let anim = UiAnimation::InspectingCard {
            viewer_id: "p1".to_string(),
            target: CardRef::new("p2", 0),
        };
        let json = serde_json::to_value(&anim).unwrap();
        assert_eq!(json["kind"], "inspecting_card");
    }
}
