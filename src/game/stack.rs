use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::cards::{CardRef, Rank};
use super::state::{GameError, GameState, TurnPhase, UiAnimation};
use crate::shared::PeerId;

/// How long a race stays open collecting concurrent claims before the
/// arbitrator picks a winner.
pub const STACK_WINDOW_MS: i64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOutcome {
    Pending,
    Winner,
    /// Correct rank, but someone else was faster. Not penalized.
    Loser,
    /// Misstack: the claimed card did not match. Penalized.
    Invalid,
}

/// One stack claim. The claimed card's rank is captured at submission so
/// arbitration is a pure function of the claim set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackClaim {
    pub claimant_id: PeerId,
    pub target: CardRef,
    pub claimed_rank: Rank,
    /// Origin timestamp on the claimant's clock, not arrival time.
    pub timestamp_ms: i64,
    pub outcome: ClaimOutcome,
}

/// Post-win sub-state: a player who stacked an opponent's card owes that
/// opponent one of their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwaitingCardGive {
    pub winner_id: PeerId,
    pub opponent_id: PeerId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackRace {
    pub claims: Vec<StackClaim>,
    pub opened_at_ms: i64,
    pub deadline_ms: i64,
    /// Turn phase suspended when the race opened; restored on completion.
    pub resumed_turn_phase: TurnPhase,
    pub awaiting_give: Option<AwaitingCardGive>,
}

impl StackRace {
    fn open(first_claim: StackClaim, resumed_turn_phase: TurnPhase) -> Self {
        let opened_at_ms = first_claim.timestamp_ms;
        Self {
            claims: vec![first_claim],
            opened_at_ms,
            deadline_ms: opened_at_ms + STACK_WINDOW_MS,
            resumed_turn_phase,
            awaiting_give: None,
        }
    }

    /// Whether the race is still collecting claims.
    pub fn is_collecting(&self) -> bool {
        self.awaiting_give.is_none()
            && self.claims.iter().all(|c| c.outcome == ClaimOutcome::Pending)
    }
}

/// Deterministic winner pick: claims ordered by origin timestamp (claimant
/// id breaking exact ties), first matching rank wins. Returns an index
/// into `claims`. Pure in the claim set, independent of arrival order.
pub fn pick_stack_winner(claims: &[StackClaim], top_rank: Rank) -> Option<usize> {
    let mut order: Vec<usize> = (0..claims.len()).collect();
    order.sort_by(|&x, &y| {
        claims[x]
            .timestamp_ms
            .cmp(&claims[y].timestamp_ms)
            .then_with(|| claims[x].claimant_id.cmp(&claims[y].claimant_id))
    });
    order
        .into_iter()
        .find(|&i| claims[i].claimed_rank == top_rank)
}

impl GameState {
    /// A claim that some card matches the discard top. The first claim
    /// opens a race and suspends turn ownership; later claims join the
    /// same race rather than being rejected.
    pub fn attempt_stack(
        &mut self,
        claimant: &PeerId,
        target: CardRef,
        timestamp_ms: i64,
    ) -> Result<(), GameError> {
        self.ensure_playing()?;
        if self.player(claimant).is_none() {
            return Err(GameError::UnknownPlayer(claimant.clone()));
        }
        if self.current_power_up.is_some() {
            return Err(GameError::StackBlocked);
        }
        if self.discard_pile.is_empty() {
            return Err(GameError::EmptyDiscard);
        }
        let owner = self
            .player(&target.player_id)
            .ok_or_else(|| GameError::UnknownPlayer(target.player_id.clone()))?;
        let claimed_rank = owner
            .cards
            .get(target.card_index)
            .map(|c| c.rank)
            .ok_or(GameError::CardIndexOutOfRange(target.card_index))?;

        let claim = StackClaim {
            claimant_id: claimant.clone(),
            target,
            claimed_rank,
            timestamp_ms,
            outcome: ClaimOutcome::Pending,
        };

        match self.pending_stack_race.as_mut() {
            Some(race) => {
                if !race.is_collecting() {
                    return Err(GameError::StackBlocked);
                }
                debug!(claimant = %claimant, "Joined open stack race");
                race.claims.push(claim);
            }
            None => {
                if self.last_discard_was_stack {
                    return Err(GameError::StackBlocked);
                }
                debug!(claimant = %claimant, "Opened stack race");
                let race = StackRace::open(claim, self.turn_phase);
                self.pending_stack_race = Some(race);
                self.turn_phase = TurnPhase::Stacking;
            }
        }
        let name = self.name_of(claimant);
        self.log_action(format!("{} is stacking!", name));
        Ok(())
    }

    /// Window close: sort, judge every claim, move the winning card,
    /// penalize misstacks. Ends the race unless the winner owes a card.
    pub fn resolve_stack_race(&mut self) -> Result<(), GameError> {
        let mut race = self.pending_stack_race.take().ok_or(GameError::NoStackRace)?;
        if race.awaiting_give.is_some() {
            self.pending_stack_race = Some(race);
            return Err(GameError::NoStackRace);
        }
        let top_rank = self.top_discard().map(|c| c.rank).ok_or(GameError::EmptyDiscard)?;

        let winner_idx = pick_stack_winner(&race.claims, top_rank);
        for (i, claim) in race.claims.iter_mut().enumerate() {
            claim.outcome = if Some(i) == winner_idx {
                ClaimOutcome::Winner
            } else if claim.claimed_rank == top_rank {
                ClaimOutcome::Loser
            } else {
                ClaimOutcome::Invalid
            };
        }
        self.penalize_misstacks(&race.claims);

        let Some(winner_idx) = winner_idx else {
            let claimant = race.claims.first().map(|c| c.claimant_id.clone());
            if let Some(claimant_id) = claimant {
                self.animation = Some(UiAnimation::StackRaceAnimation {
                    claimant_id,
                    matched: false,
                });
            }
            self.turn_phase = race.resumed_turn_phase;
            self.log_action("Nobody stacked correctly");
            return Ok(());
        };

        let winning = race.claims[winner_idx].clone();
        let owner_idx = self
            .player_index(&winning.target.player_id)
            .ok_or_else(|| GameError::UnknownPlayer(winning.target.player_id.clone()))?;
        if winning.target.card_index >= self.players[owner_idx].cards.len() {
            // Hands are frozen during a race; this would mean a bug upstream
            warn!(claimant = %winning.claimant_id, "Winning claim no longer valid");
            self.turn_phase = race.resumed_turn_phase;
            return Ok(());
        }
        let mut card = self.players[owner_idx].cards.remove(winning.target.card_index);
        card.face_up = true;
        self.discard_pile.insert(0, card);
        self.last_discard_was_stack = true;
        self.animation = Some(UiAnimation::StackRaceAnimation {
            claimant_id: winning.claimant_id.clone(),
            matched: true,
        });

        let stacked_own_card = winning.target.player_id == winning.claimant_id;
        let winner_has_cards = self
            .player(&winning.claimant_id)
            .map(|p| !p.cards.is_empty())
            .unwrap_or(false);
        let winner_name = self.name_of(&winning.claimant_id);
        if !stacked_own_card && winner_has_cards {
            race.awaiting_give = Some(AwaitingCardGive {
                winner_id: winning.claimant_id.clone(),
                opponent_id: winning.target.player_id.clone(),
            });
            self.pending_stack_race = Some(race);
            self.log_action(format!("{} stacked an opponent's card - choose one to give", winner_name));
        } else {
            self.turn_phase = race.resumed_turn_phase;
            self.log_action(format!("{} stacked successfully", winner_name));
        }
        Ok(())
    }

    /// The stack-it-for-someone-else cost: the winner hands the opponent
    /// one of their own cards, face down, completing the race.
    pub fn give_card(&mut self, actor: &PeerId, card_index: usize) -> Result<(), GameError> {
        let race = self.pending_stack_race.as_ref().ok_or(GameError::NoStackRace)?;
        let give = race.awaiting_give.clone().ok_or(GameError::NotAwaitingGive)?;
        if &give.winner_id != actor {
            return Err(GameError::NotAwaitingGive);
        }
        let winner_idx = self
            .player_index(actor)
            .ok_or_else(|| GameError::UnknownPlayer(actor.clone()))?;
        if card_index >= self.players[winner_idx].cards.len() {
            return Err(GameError::CardIndexOutOfRange(card_index));
        }

        let mut card = self.players[winner_idx].cards.remove(card_index);
        card.face_up = false;
        if let Some(opponent) = self.player_mut(&give.opponent_id) {
            opponent.cards.push(card);
        }
        let race = self.pending_stack_race.take().ok_or(GameError::NoStackRace)?;
        self.turn_phase = race.resumed_turn_phase;
        let name = self.name_of(actor);
        self.log_action(format!("{} handed over a card", name));
        Ok(())
    }

    /// Every misstacking claimant draws one face-down penalty card.
    fn penalize_misstacks(&mut self, claims: &[StackClaim]) {
        let mut penalized: Vec<&PeerId> = Vec::new();
        for claim in claims {
            if claim.outcome != ClaimOutcome::Invalid || penalized.contains(&&claim.claimant_id) {
                continue;
            }
            match self.draw_from_deck() {
                Ok(mut card) => {
                    card.face_up = false;
                    if let Some(player) = self.player_mut(&claim.claimant_id) {
                        player.cards.push(card);
                    }
                }
                Err(e) => {
                    warn!(claimant = %claim.claimant_id, error = %e, "Penalty draw skipped");
                }
            }
            penalized.push(&claim.claimant_id);
        }
    }
}
