use rand::seq::SliceRandom;
use strum::IntoEnumIterator;

use super::cards::{Card, Rank, Suit};

/// 52 standard cards plus two jokers.
pub const CARDS_PER_DECK: usize = 54;

/// Cards dealt to each player at game start. The first two hand slots are
/// the "bottom cards" a player may preview once before play begins.
pub const HAND_SIZE: usize = 4;

/// Classic Fisher-Yates shuffle over `deck_count` combined decks.
pub fn create_shuffled_deck(deck_count: usize) -> Vec<Card> {
    let mut cards = Vec::with_capacity(deck_count * CARDS_PER_DECK);
    for _ in 0..deck_count {
        for suit in Suit::iter().filter(|s| *s != Suit::Joker) {
            for rank in Rank::iter().filter(|r| *r != Rank::Joker) {
                cards.push(Card::new(rank, suit));
            }
        }
        cards.push(Card::new(Rank::Joker, Suit::Joker));
        cards.push(Card::new(Rank::Joker, Suit::Joker));
    }
    cards.shuffle(&mut rand::rng());
    cards
}

/// One deck covers up to six players; larger tables get a second deck so
/// the stock cannot starve mid-game.
pub fn deck_count_for_players(player_count: usize) -> usize {
    if player_count >= 7 {
        2
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_single_deck_composition() {
        let deck = create_shuffled_deck(1);
        assert_eq!(deck.len(), CARDS_PER_DECK);

        let ids: HashSet<_> = deck.iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), CARDS_PER_DECK, "card ids must be unique");

        let jokers = deck.iter().filter(|c| c.rank == Rank::Joker).count();
        assert_eq!(jokers, 2);

        // All cards start face down
        assert!(deck.iter().all(|c| !c.face_up));
    }

    #[test]
    fn test_double_deck_composition() {
        let deck = create_shuffled_deck(2);
        assert_eq!(deck.len(), 2 * CARDS_PER_DECK);
        let jokers = deck.iter().filter(|c| c.rank == Rank::Joker).count();
        assert_eq!(jokers, 4);
    }

    #[test]
    fn test_deck_count_scales_with_players() {
        assert_eq!(deck_count_for_players(2), 1);
        assert_eq!(deck_count_for_players(6), 1);
        assert_eq!(deck_count_for_players(7), 2);
        assert_eq!(deck_count_for_players(10), 2);
    }
}
