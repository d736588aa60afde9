use rand::seq::SliceRandom;
use tracing::{debug, warn};

use super::cards::Card;
use super::deck::{create_shuffled_deck, deck_count_for_players, HAND_SIZE};
use super::state::{GameError, GamePhase, GameState, TurnPhase, UiAnimation};
use crate::shared::PeerId;

impl GameState {
    /// Host-only: deal hands, seed the discard pile and open the
    /// bottom-card preview phase.
    pub fn start_game(&mut self, actor: &PeerId) -> Result<(), GameError> {
        if self.phase != GamePhase::Waiting {
            return Err(GameError::WrongPhase(self.phase));
        }
        let player = self
            .player(actor)
            .ok_or_else(|| GameError::UnknownPlayer(actor.clone()))?;
        if !player.is_host {
            return Err(GameError::NotHost);
        }
        if self.players.len() < 2 {
            return Err(GameError::NotEnoughPlayers);
        }

        let mut deck = create_shuffled_deck(deck_count_for_players(self.players.len()));
        for player in &mut self.players {
            player.cards = deck.drain(0..HAND_SIZE).collect();
            player.has_seen_bottom_cards = false;
        }
        if let Some(mut seed) = deck.pop() {
            seed.face_up = true;
            self.discard_pile = vec![seed];
        }
        self.deck = deck;
        self.phase = GamePhase::ViewingCards;
        self.last_discard_was_stack = false;
        self.log_action("Game started - peek at your bottom cards");
        Ok(())
    }

    /// In the lobby this flags readiness; during the preview phase it
    /// records that the player has seen their bottom cards. Play begins
    /// once every player has flagged.
    pub fn mark_ready(&mut self, actor: &PeerId) -> Result<(), GameError> {
        let phase = self.phase;
        let player = self
            .player_mut(actor)
            .ok_or_else(|| GameError::UnknownPlayer(actor.clone()))?;
        match phase {
            GamePhase::Waiting => {
                player.is_ready = true;
                let name = player.name.clone();
                self.log_action(format!("{} is ready", name));
                Ok(())
            }
            GamePhase::ViewingCards => {
                player.is_ready = true;
                player.has_seen_bottom_cards = true;
                let name = player.name.clone();
                if self.players.iter().all(|p| p.has_seen_bottom_cards) {
                    self.phase = GamePhase::Playing;
                    self.turn_phase = TurnPhase::Draw;
                    self.current_player_index = 0;
                    self.log_action("All players ready - play begins");
                } else {
                    self.log_action(format!("{} has seen their cards", name));
                }
                Ok(())
            }
            phase => Err(GameError::WrongPhase(phase)),
        }
    }

    /// Current player draws from the stock or the discard pile into the
    /// drawn-card slot.
    pub fn draw_card(&mut self, actor: &PeerId, from_discard: bool) -> Result<(), GameError> {
        self.ensure_playing()?;
        self.ensure_current(actor)?;
        if self.turn_phase != TurnPhase::Draw {
            return Err(GameError::WrongTurnPhase(self.turn_phase));
        }

        let mut card = if from_discard {
            if self.discard_pile.is_empty() {
                return Err(GameError::EmptyDiscard);
            }
            self.discard_pile.remove(0)
        } else {
            self.draw_from_deck()?
        };
        card.face_up = true;
        self.drawn_card = Some(card);
        self.turn_phase = TurnPhase::Decide;
        self.animation = Some(UiAnimation::CardMoveAnimation {
            player_id: actor.clone(),
            from_discard,
        });
        let name = self.name_of(actor);
        self.log_action(format!(
            "{} drew from the {}",
            name,
            if from_discard { "discard pile" } else { "deck" }
        ));
        Ok(())
    }

    /// Pops the next stock card, reshuffling the discard pile (minus its
    /// top card) back into the deck when the stock runs dry.
    pub(crate) fn draw_from_deck(&mut self) -> Result<Card, GameError> {
        if self.deck.is_empty() {
            self.reshuffle_discard_into_deck()?;
        }
        self.deck.pop().ok_or(GameError::DeckExhausted)
    }

    fn reshuffle_discard_into_deck(&mut self) -> Result<(), GameError> {
        if self.discard_pile.len() < 2 {
            return Err(GameError::DeckExhausted);
        }
        let top = self.discard_pile.remove(0);
        let mut rest = std::mem::take(&mut self.discard_pile);
        for card in &mut rest {
            card.face_up = false;
        }
        rest.shuffle(&mut rand::rng());
        debug!(cards = rest.len(), "Reshuffled discard pile into deck");
        self.deck = rest;
        self.discard_pile = vec![top];
        Ok(())
    }

    /// Swap the drawn card into a hand slot; the displaced card lands on
    /// the discard pile and may arm a power-up.
    pub fn swap_card(&mut self, actor: &PeerId, hand_index: usize) -> Result<(), GameError> {
        self.ensure_playing()?;
        self.ensure_current(actor)?;
        if self.turn_phase != TurnPhase::Decide {
            return Err(GameError::WrongTurnPhase(self.turn_phase));
        }
        if self.drawn_card.is_none() {
            return Err(GameError::NoDrawnCard);
        }
        let player_idx = self
            .player_index(actor)
            .ok_or_else(|| GameError::UnknownPlayer(actor.clone()))?;
        if hand_index >= self.players[player_idx].cards.len() {
            return Err(GameError::CardIndexOutOfRange(hand_index));
        }

        let mut incoming = self.drawn_card.take().ok_or(GameError::NoDrawnCard)?;
        incoming.face_up = false;
        let outgoing = std::mem::replace(&mut self.players[player_idx].cards[hand_index], incoming);
        let outgoing_rank = outgoing.rank;
        self.place_on_discard(outgoing);
        let name = self.name_of(actor);
        self.log_action(format!("{} swapped a card into their hand", name));
        self.finish_discard(actor, outgoing_rank);
        Ok(())
    }

    /// Discard the drawn card directly; it may arm a power-up.
    pub fn discard_card(&mut self, actor: &PeerId) -> Result<(), GameError> {
        self.ensure_playing()?;
        self.ensure_current(actor)?;
        if self.turn_phase != TurnPhase::Decide {
            return Err(GameError::WrongTurnPhase(self.turn_phase));
        }
        let card = self.drawn_card.take().ok_or(GameError::NoDrawnCard)?;
        let rank = card.rank;
        self.place_on_discard(card);
        let name = self.name_of(actor);
        self.log_action(format!("{} discarded a card", name));
        self.finish_discard(actor, rank);
        Ok(())
    }

    /// A card just landed on the discard pile: arm a rank-triggered
    /// ability or advance the turn.
    fn finish_discard(&mut self, actor: &PeerId, rank: super::cards::Rank) {
        if self.arm_power_up_for_discard(actor, rank) {
            self.turn_phase = TurnPhase::PowerUp;
        } else {
            self.advance_turn();
        }
    }

    /// Declare Reds: ends the caller's turn and gives every other player
    /// exactly one more turn.
    pub fn call_reds(&mut self, actor: &PeerId) -> Result<(), GameError> {
        if self.phase != GamePhase::Playing {
            return Err(GameError::WrongPhase(self.phase));
        }
        self.ensure_current(actor)?;
        if self.turn_phase != TurnPhase::Draw {
            return Err(GameError::WrongTurnPhase(self.turn_phase));
        }
        if self.reds_caller_id.is_some() {
            return Err(GameError::RedsAlreadyCalled);
        }

        self.reds_caller_id = Some(actor.clone());
        if let Some(player) = self.player_mut(actor) {
            player.has_called_reds = true;
        }
        self.phase = GamePhase::FinalRound;
        self.final_round_turns_remaining = self.players.len().saturating_sub(1);
        let name = self.name_of(actor);
        self.log_action(format!("{} called Reds! Final round begins", name));
        self.advance_turn();
        Ok(())
    }

    /// Ends the current turn: clears any resolved power-up, counts down
    /// the final round and moves ownership to the next seat (skipping the
    /// Reds caller).
    pub(crate) fn advance_turn(&mut self) {
        self.current_power_up = None;
        self.turn_phase = TurnPhase::Draw;

        if self.phase == GamePhase::FinalRound {
            let finishing_is_caller = self
                .current_player()
                .map(|p| Some(&p.id) == self.reds_caller_id.as_ref())
                .unwrap_or(false);
            if !finishing_is_caller {
                self.final_round_turns_remaining =
                    self.final_round_turns_remaining.saturating_sub(1);
            }
            if self.final_round_turns_remaining == 0 {
                self.finish_game();
                return;
            }
        }

        let count = self.players.len();
        if count == 0 {
            return;
        }
        for _ in 0..count {
            self.current_player_index = (self.current_player_index + 1) % count;
            let is_caller = self
                .current_player()
                .map(|p| Some(&p.id) == self.reds_caller_id.as_ref())
                .unwrap_or(false);
            if !is_caller {
                break;
            }
        }
    }

    fn finish_game(&mut self) {
        self.phase = GamePhase::GameOver;
        for player in &mut self.players {
            for card in &mut player.cards {
                card.face_up = true;
            }
        }
        if self.drawn_card.is_some() {
            warn!("Game ended with a card still in the drawn slot");
        }

        let board = self.scoreboard();
        if let Some(best) = board.first() {
            let lowest = best.score;
            // Ties break against the Reds caller, then by seat order.
            let winner = board
                .iter()
                .filter(|s| s.score == lowest)
                .min_by_key(|s| {
                    let is_caller = Some(&s.player_id) == self.reds_caller_id.as_ref();
                    let seat = self.player_index(&s.player_id).unwrap_or(usize::MAX);
                    (is_caller, seat)
                })
                .map(|s| s.player_id.clone());
            self.winner = winner.clone();
            let name = winner
                .and_then(|id| self.player(&id).map(|p| p.name.clone()))
                .unwrap_or_default();
            self.log_action(format!("Game over - {} wins with {} points", name, lowest));
        } else {
            self.log_action("Game over");
        }
    }

    pub(crate) fn name_of(&self, id: &PeerId) -> String {
        self.player(id).map(|p| p.name.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::cards::{Rank, Suit};
    use crate::game::state::Player;

    fn seat(id: &str, name: &str, cards: Vec<Card>) -> Player {
        let mut player = Player::new(id, name, id == "p1");
        player.cards = cards;
        player
    }

    fn card(rank: Rank, suit: Suit) -> Card {
        Card::new(rank, suit)
    }

    /// Three seats mid-game: p1 to act, a stocked deck and a seeded
    /// discard pile. Ranks avoid 7-10 unless a test wants a power-up.
    fn playing_state() -> GameState {
        let mut state = GameState::new("test-room");
        state.players = vec![
            seat(
                "p1",
                "Alice",
                vec![
                    card(Rank::Two, Suit::Hearts),
                    card(Rank::Three, Suit::Clubs),
                    card(Rank::Four, Suit::Spades),
                    card(Rank::Five, Suit::Diamonds),
                ],
            ),
            seat(
                "p2",
                "Bob",
                vec![
                    card(Rank::Six, Suit::Hearts),
                    card(Rank::Two, Suit::Clubs),
                    card(Rank::Three, Suit::Spades),
                    card(Rank::Four, Suit::Diamonds),
                ],
            ),
            seat(
                "p3",
                "Cara",
                vec![
                    card(Rank::Five, Suit::Hearts),
                    card(Rank::Six, Suit::Clubs),
                    card(Rank::Ace, Suit::Spades),
                    card(Rank::Two, Suit::Diamonds),
                ],
            ),
        ];
        state.deck = vec![
            card(Rank::Jack, Suit::Hearts),
            card(Rank::Queen, Suit::Clubs),
            card(Rank::King, Suit::Spades),
        ];
        let mut top = card(Rank::Ace, Suit::Hearts);
        top.face_up = true;
        state.discard_pile = vec![top];
        state.phase = GamePhase::Playing;
        state.turn_phase = TurnPhase::Draw;
        state.current_player_index = 0;
        state
    }

    fn p(id: &str) -> PeerId {
        id.to_string()
    }

    #[test]
    fn test_start_game_deals_and_enters_viewing() {
        let mut state = GameState::new("room");
        state.players.push(Player::new("p1", "Alice", true));
        state.players.push(Player::new("p2", "Bob", false));

        state.start_game(&p("p1")).unwrap();

        assert_eq!(state.phase, GamePhase::ViewingCards);
        assert!(state.players.iter().all(|pl| pl.cards.len() == HAND_SIZE));
        // The previewable bottom cards are the first two hand slots
        let alice = &state.players[0];
        assert_eq!(alice.bottom_cards().len(), 2);
        assert_eq!(alice.bottom_cards()[0].id, alice.cards[0].id);
        assert_eq!(alice.bottom_cards()[1].id, alice.cards[1].id);
        assert_eq!(state.discard_pile.len(), 1);
        assert!(state.discard_pile[0].face_up);
        assert_eq!(
            state.deck.len(),
            crate::game::deck::CARDS_PER_DECK - 2 * HAND_SIZE - 1
        );
    }

    #[test]
    fn test_start_game_requires_host() {
        let mut state = GameState::new("room");
        state.players.push(Player::new("p1", "Alice", true));
        state.players.push(Player::new("p2", "Bob", false));
        let result = state.start_game(&p("p2"));
        assert!(matches!(result.unwrap_err(), GameError::NotHost));
    }

    #[test]
    fn test_viewing_gates_on_every_player() {
        let mut state = GameState::new("room");
        state.players.push(Player::new("p1", "Alice", true));
        state.players.push(Player::new("p2", "Bob", false));
        state.start_game(&p("p1")).unwrap();

        state.mark_ready(&p("p1")).unwrap();
        assert_eq!(state.phase, GamePhase::ViewingCards);
        state.mark_ready(&p("p2")).unwrap();
        assert_eq!(state.phase, GamePhase::Playing);
        assert_eq!(state.turn_phase, TurnPhase::Draw);
        assert_eq!(state.current_player_index, 0);
    }

    #[test]
    fn test_draw_from_deck() {
        let mut state = playing_state();
        let deck_before = state.deck.len();

        state.draw_card(&p("p1"), false).unwrap();

        assert_eq!(state.turn_phase, TurnPhase::Decide);
        assert!(state.drawn_card.is_some());
        assert_eq!(state.deck.len(), deck_before - 1);
    }

    #[test]
    fn test_draw_from_discard() {
        let mut state = playing_state();
        let top_id = state.discard_pile[0].id;

        state.draw_card(&p("p1"), true).unwrap();

        assert_eq!(state.drawn_card.as_ref().unwrap().id, top_id);
        assert!(state.discard_pile.is_empty());
    }

    #[test]
    fn test_draw_out_of_turn_rejected() {
        let mut state = playing_state();
        let result = state.draw_card(&p("p2"), false);
        assert!(matches!(result.unwrap_err(), GameError::NotYourTurn));
    }

    #[test]
    fn test_draw_in_decide_phase_rejected() {
        let mut state = playing_state();
        state.draw_card(&p("p1"), false).unwrap();
        let result = state.draw_card(&p("p1"), false);
        assert!(matches!(result.unwrap_err(), GameError::WrongTurnPhase(TurnPhase::Decide)));
    }

    #[test]
    fn test_empty_deck_reshuffles_keeping_top() {
        let mut state = playing_state();
        state.deck.clear();
        state.discard_pile = vec![
            card(Rank::Ace, Suit::Hearts),
            card(Rank::Two, Suit::Spades),
            card(Rank::Three, Suit::Spades),
        ];
        let top_id = state.discard_pile[0].id;

        state.draw_card(&p("p1"), false).unwrap();

        assert_eq!(state.discard_pile.len(), 1);
        assert_eq!(state.discard_pile[0].id, top_id);
        // Two cards reshuffled, one of them drawn
        assert_eq!(state.deck.len(), 1);
        assert!(state.deck.iter().all(|c| !c.face_up));
    }

    #[test]
    fn test_empty_deck_and_thin_discard_is_rejected() {
        let mut state = playing_state();
        state.deck.clear();
        state.discard_pile = vec![card(Rank::Ace, Suit::Hearts)];

        let result = state.draw_card(&p("p1"), false);
        assert!(matches!(result.unwrap_err(), GameError::DeckExhausted));
        // Nothing moved
        assert_eq!(state.discard_pile.len(), 1);
        assert_eq!(state.turn_phase, TurnPhase::Draw);
    }

    #[test]
    fn test_swap_places_outgoing_on_discard_and_advances() {
        let mut state = playing_state();
        state.draw_card(&p("p1"), false).unwrap();
        let drawn_id = state.drawn_card.as_ref().unwrap().id;
        let outgoing_id = state.players[0].cards[2].id;

        state.swap_card(&p("p1"), 2).unwrap();

        assert_eq!(state.players[0].cards[2].id, drawn_id);
        assert!(!state.players[0].cards[2].face_up);
        assert_eq!(state.discard_pile[0].id, outgoing_id);
        assert!(state.discard_pile[0].face_up);
        assert!(state.drawn_card.is_none());
        // Rank 4 has no ability, so the turn advanced
        assert_eq!(state.current_player_index, 1);
        assert_eq!(state.turn_phase, TurnPhase::Draw);
        assert!(!state.last_discard_was_stack);
    }

    #[test]
    fn test_discard_without_ability_advances() {
        let mut state = playing_state();
        state.draw_card(&p("p1"), false).unwrap();
        let drawn_id = state.drawn_card.as_ref().unwrap().id;

        // Top of the test deck is a king: no ability
        state.discard_card(&p("p1")).unwrap();

        assert_eq!(state.discard_pile[0].id, drawn_id);
        assert_eq!(state.current_player_index, 1);
        assert_eq!(state.turn_phase, TurnPhase::Draw);
    }

    #[test]
    fn test_discard_with_ability_arms_power_up() {
        let mut state = playing_state();
        state.deck.push(card(Rank::Seven, Suit::Clubs));
        state.draw_card(&p("p1"), false).unwrap();

        state.discard_card(&p("p1")).unwrap();

        assert_eq!(state.turn_phase, TurnPhase::PowerUp);
        assert!(state.current_power_up.is_some());
        // Turn has not advanced yet
        assert_eq!(state.current_player_index, 0);
    }

    #[test]
    fn test_card_conservation_across_turns() {
        let mut state = playing_state();
        let census = state.card_census();

        state.draw_card(&p("p1"), false).unwrap();
        assert_eq!(state.card_census(), census);
        state.swap_card(&p("p1"), 0).unwrap();
        assert_eq!(state.card_census(), census);

        state.draw_card(&p("p2"), true).unwrap();
        assert_eq!(state.card_census(), census);
        state.discard_card(&p("p2")).unwrap();
        assert_eq!(state.card_census(), census);
    }

    #[test]
    fn test_call_reds_starts_final_round() {
        let mut state = playing_state();

        state.call_reds(&p("p1")).unwrap();

        assert_eq!(state.phase, GamePhase::FinalRound);
        assert_eq!(state.reds_caller_id, Some(p("p1")));
        assert_eq!(state.final_round_turns_remaining, 2);
        assert!(state.players[0].has_called_reds);
        assert_eq!(state.current_player_index, 1);
    }

    #[test]
    fn test_call_reds_twice_rejected() {
        let mut state = playing_state();
        state.call_reds(&p("p1")).unwrap();
        let result = state.call_reds(&p("p2"));
        assert!(matches!(result.unwrap_err(), GameError::WrongPhase(GamePhase::FinalRound)));
    }

    #[test]
    fn test_final_round_gives_each_other_player_one_turn() {
        let mut state = playing_state();
        state.call_reds(&p("p1")).unwrap();

        // Bob's final turn
        state.draw_card(&p("p2"), false).unwrap();
        state.discard_card(&p("p2")).unwrap();
        assert_eq!(state.phase, GamePhase::FinalRound);
        assert_eq!(state.final_round_turns_remaining, 1);
        // Caller's seat is skipped
        assert_eq!(state.current_player_index, 2);

        // Cara's final turn ends the game
        state.draw_card(&p("p3"), false).unwrap();
        state.discard_card(&p("p3")).unwrap();
        assert_eq!(state.phase, GamePhase::GameOver);
    }

    #[test]
    fn test_game_over_flips_hands_and_scores_lowest_winner() {
        let mut state = playing_state();
        // Alice (caller) holds 2+3+4+5 = 14; give Cara the clear lowest hand
        state.players[2].cards = vec![card(Rank::Ace, Suit::Clubs), card(Rank::Two, Suit::Hearts)];

        state.call_reds(&p("p1")).unwrap();
        state.draw_card(&p("p2"), false).unwrap();
        state.discard_card(&p("p2")).unwrap();
        state.draw_card(&p("p3"), false).unwrap();
        state.swap_card(&p("p3"), 0).unwrap();

        assert_eq!(state.phase, GamePhase::GameOver);
        assert!(state
            .players
            .iter()
            .all(|pl| pl.cards.iter().all(|c| c.face_up)));
        assert!(state.winner.is_some());
        let board = state.scoreboard();
        assert!(board.windows(2).all(|w| w[0].score <= w[1].score));
    }

    #[test]
    fn test_caller_with_higher_score_does_not_win() {
        // Caller ends on 5 points while an opponent reveals 3
        let mut state = GameState::new("room");
        state.players = vec![
            seat(
                "p1",
                "Caller",
                vec![card(Rank::Two, Suit::Hearts), card(Rank::Three, Suit::Clubs)],
            ),
            seat(
                "p2",
                "Opp",
                vec![card(Rank::Ace, Suit::Clubs), card(Rank::Two, Suit::Spades)],
            ),
            seat("p3", "Other", vec![card(Rank::King, Suit::Spades)]),
        ];
        state.deck = vec![
            card(Rank::Queen, Suit::Hearts),
            card(Rank::Queen, Suit::Clubs),
            card(Rank::Queen, Suit::Spades),
        ];
        let mut top = card(Rank::Ace, Suit::Hearts);
        top.face_up = true;
        state.discard_pile = vec![top];
        state.phase = GamePhase::Playing;
        state.turn_phase = TurnPhase::Draw;
        state.current_player_index = 0;

        state.call_reds(&p("p1")).unwrap();
        // p2 discards the queen they draw, keeping their 3-point hand
        state.draw_card(&p("p2"), false).unwrap();
        state.discard_card(&p("p2")).unwrap();
        state.draw_card(&p("p3"), false).unwrap();
        state.discard_card(&p("p3")).unwrap();

        assert_eq!(state.phase, GamePhase::GameOver);
        assert_eq!(state.winner, Some(p("p2")));
    }

    #[test]
    fn test_score_tie_breaks_against_caller() {
        let mut state = GameState::new("room");
        state.players = vec![
            seat("p1", "Caller", vec![card(Rank::Five, Suit::Hearts)]),
            seat("p2", "Opp", vec![card(Rank::Five, Suit::Clubs)]),
        ];
        state.reds_caller_id = Some(p("p1"));
        state.phase = GamePhase::FinalRound;
        state.final_round_turns_remaining = 1;
        state.current_player_index = 1;
        state.turn_phase = TurnPhase::Draw;
        state.deck = vec![card(Rank::King, Suit::Spades)];
        let mut top = card(Rank::Ace, Suit::Hearts);
        top.face_up = true;
        state.discard_pile = vec![top];

        state.draw_card(&p("p2"), false).unwrap();
        state.discard_card(&p("p2")).unwrap();

        assert_eq!(state.phase, GamePhase::GameOver);
        assert_eq!(state.winner, Some(p("p2")));
    }
}
