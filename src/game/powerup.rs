use serde::{Deserialize, Serialize};
use tracing::debug;

use super::cards::{CardRef, Rank};
use super::state::{GameError, GameState, UiAnimation};
use crate::shared::PeerId;

/// The six ability variants. Which one a rank arms depends on the acting
/// player's hand size: a player with no cards of their own gets the
/// "others" redirections (or a no-op) instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerUpAction {
    InspectOwn,
    InspectOther,
    BlindSwap,
    InspectSwap,
    BlindSwapOthers,
    InspectSwapOthers,
}

impl PowerUpAction {
    /// Picks the variant for a discarded rank, or `None` when the ability
    /// degenerates to a no-op for this actor.
    pub fn for_rank(rank: Rank, actor_hand_size: usize, other_players: usize) -> Option<Self> {
        match rank {
            Rank::Seven => {
                if actor_hand_size == 0 {
                    None
                } else {
                    Some(PowerUpAction::InspectOwn)
                }
            }
            Rank::Eight => Some(PowerUpAction::InspectOther),
            Rank::Nine => {
                if actor_hand_size == 0 {
                    if other_players >= 2 {
                        Some(PowerUpAction::BlindSwapOthers)
                    } else {
                        None
                    }
                } else {
                    Some(PowerUpAction::BlindSwap)
                }
            }
            Rank::Ten => {
                if actor_hand_size == 0 {
                    if other_players >= 2 {
                        Some(PowerUpAction::InspectSwapOthers)
                    } else {
                        Some(PowerUpAction::InspectOther)
                    }
                } else {
                    Some(PowerUpAction::InspectSwap)
                }
            }
            _ => None,
        }
    }

    /// Swap variants need two selections; inspections need one.
    pub fn needs_two_selections(&self) -> bool {
        matches!(
            self,
            PowerUpAction::BlindSwap
                | PowerUpAction::InspectSwap
                | PowerUpAction::BlindSwapOthers
                | PowerUpAction::InspectSwapOthers
        )
    }

    /// Whether the actor gets a look-then-decide step before committing.
    pub fn previews_before_commit(&self) -> bool {
        matches!(
            self,
            PowerUpAction::InspectSwap | PowerUpAction::InspectSwapOthers
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerUpStage {
    Armed,
    Selecting,
    Confirmed,
    Resolved,
}

/// One armed ability and its selection-negotiation progress. Partial
/// selections replicate with the rest of the state so every peer can
/// highlight them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerUpState {
    pub action: PowerUpAction,
    pub actor_id: PeerId,
    pub stage: PowerUpStage,
    pub first_selection: Option<CardRef>,
    pub second_selection: Option<CardRef>,
    /// Transient pointer to the card currently being shown to the actor.
    pub inspecting: Option<CardRef>,
}

impl PowerUpState {
    fn new(action: PowerUpAction, actor_id: PeerId) -> Self {
        Self {
            action,
            actor_id,
            stage: PowerUpStage::Armed,
            first_selection: None,
            second_selection: None,
            inspecting: None,
        }
    }
}

/// Selection arguments for `complete_power_up`, mirrored from the UI call.
/// Swap variants accept the two picks in either order across calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerUpSelection {
    pub target_player_id: Option<PeerId>,
    pub target_card_index: Option<usize>,
    pub source_card_index: Option<usize>,
    pub second_target_player_id: Option<PeerId>,
    pub second_target_card_index: Option<usize>,
}

impl GameState {
    /// Called when a rank lands on the discard pile. Arms the matching
    /// ability and returns true, or returns false when the rank carries no
    /// ability (or it degenerates to a no-op for this actor).
    pub(crate) fn arm_power_up_for_discard(&mut self, actor: &PeerId, rank: Rank) -> bool {
        let hand_size = self.player(actor).map(|p| p.cards.len()).unwrap_or(0);
        let others = self.players.iter().filter(|p| &p.id != actor).count();
        match PowerUpAction::for_rank(rank, hand_size, others) {
            Some(action) => {
                debug!(actor = %actor, ?action, "Power-up armed");
                self.current_power_up = Some(PowerUpState::new(action, actor.clone()));
                true
            }
            None => false,
        }
    }

    /// Actor acknowledges the armed ability and begins selecting.
    pub fn start_power_up(&mut self, actor: &PeerId, action: PowerUpAction) -> Result<(), GameError> {
        let power_up = self.current_power_up.as_mut().ok_or(GameError::NoPowerUp)?;
        if &power_up.actor_id != actor || power_up.action != action {
            return Err(GameError::InvalidSelection);
        }
        if power_up.stage != PowerUpStage::Armed {
            return Err(GameError::InvalidSelection);
        }
        power_up.stage = PowerUpStage::Selecting;
        let name = self.name_of(actor);
        self.log_action(format!("{} is using a power-up", name));
        Ok(())
    }

    /// Feeds selections into the armed ability. May be called repeatedly
    /// with partial picks; each call replicates the progress. Once the
    /// required selections are present the ability either commits (blind
    /// swaps, inspections) or moves to the confirm step (inspect-swaps),
    /// where a further call commits the exchange.
    pub fn complete_power_up(
        &mut self,
        actor: &PeerId,
        selection: &PowerUpSelection,
    ) -> Result<(), GameError> {
        let power_up = self.current_power_up.clone().ok_or(GameError::NoPowerUp)?;
        if &power_up.actor_id != actor {
            return Err(GameError::InvalidSelection);
        }
        match power_up.stage {
            PowerUpStage::Resolved => return Err(GameError::NoPowerUp),
            PowerUpStage::Confirmed => return self.commit_inspect_swap(actor),
            PowerUpStage::Armed | PowerUpStage::Selecting => {}
        }

        match power_up.action {
            PowerUpAction::InspectOwn => {
                let index = selection
                    .source_card_index
                    .or(selection.target_card_index)
                    .ok_or(GameError::InvalidSelection)?;
                let target = CardRef::new(actor.clone(), index);
                self.validate_ref(&target)?;
                self.reveal_and_resolve(actor, target)
            }
            PowerUpAction::InspectOther => {
                let target = self.other_target(actor, selection)?;
                self.reveal_and_resolve(actor, target)
            }
            PowerUpAction::BlindSwap | PowerUpAction::InspectSwap => {
                let own = selection
                    .source_card_index
                    .map(|i| CardRef::new(actor.clone(), i));
                let other = match (&selection.target_player_id, selection.target_card_index) {
                    (Some(pid), Some(idx)) => Some(CardRef::new(pid.clone(), idx)),
                    _ => None,
                };
                if let Some(other_ref) = &other {
                    if &other_ref.player_id == actor {
                        return Err(GameError::InvalidSelection);
                    }
                }
                self.record_selections(actor, own, other)
            }
            PowerUpAction::BlindSwapOthers | PowerUpAction::InspectSwapOthers => {
                let first = match (&selection.target_player_id, selection.target_card_index) {
                    (Some(pid), Some(idx)) => Some(CardRef::new(pid.clone(), idx)),
                    _ => None,
                };
                let second = match (
                    &selection.second_target_player_id,
                    selection.second_target_card_index,
                ) {
                    (Some(pid), Some(idx)) => Some(CardRef::new(pid.clone(), idx)),
                    _ => None,
                };
                for picked in first.iter().chain(second.iter()) {
                    if &picked.player_id == actor {
                        return Err(GameError::InvalidSelection);
                    }
                }
                self.record_selections(actor, first, second)
            }
        }
    }

    /// Skip or abandon the armed ability. Deterministically clears it and
    /// advances the turn; for an inspect-swap in its confirm step this is
    /// the "keep" choice. Idempotent: a second call finds nothing armed.
    pub fn cancel_power_up(&mut self, actor: &PeerId) -> Result<(), GameError> {
        let power_up = self.current_power_up.as_ref().ok_or(GameError::NoPowerUp)?;
        if &power_up.actor_id != actor {
            return Err(GameError::InvalidSelection);
        }
        if power_up.stage == PowerUpStage::Resolved {
            return Err(GameError::NoPowerUp);
        }
        let name = self.name_of(actor);
        self.log_action(format!("{} skipped their power-up", name));
        self.advance_turn();
        Ok(())
    }

    fn other_target(
        &self,
        actor: &PeerId,
        selection: &PowerUpSelection,
    ) -> Result<CardRef, GameError> {
        let pid = selection
            .target_player_id
            .clone()
            .ok_or(GameError::InvalidSelection)?;
        let idx = selection
            .target_card_index
            .ok_or(GameError::InvalidSelection)?;
        if &pid == actor {
            return Err(GameError::InvalidSelection);
        }
        let target = CardRef::new(pid, idx);
        self.validate_ref(&target)?;
        Ok(target)
    }

    fn validate_ref(&self, target: &CardRef) -> Result<(), GameError> {
        let player = self
            .player(&target.player_id)
            .ok_or_else(|| GameError::UnknownPlayer(target.player_id.clone()))?;
        if target.card_index >= player.cards.len() {
            return Err(GameError::CardIndexOutOfRange(target.card_index));
        }
        Ok(())
    }

    /// Single-target inspection: reveal to the requester (via the
    /// replicated inspecting pointer), resolve and advance.
    fn reveal_and_resolve(&mut self, actor: &PeerId, target: CardRef) -> Result<(), GameError> {
        if let Some(power_up) = self.current_power_up.as_mut() {
            power_up.inspecting = Some(target.clone());
            power_up.stage = PowerUpStage::Resolved;
        }
        self.animation = Some(UiAnimation::InspectingCard {
            viewer_id: actor.clone(),
            target,
        });
        let name = self.name_of(actor);
        self.log_action(format!("{} inspected a card", name));
        self.advance_turn();
        Ok(())
    }

    /// Folds newly provided picks into the selection state; commits or
    /// moves to the confirm step when both are present.
    fn record_selections(
        &mut self,
        actor: &PeerId,
        first: Option<CardRef>,
        second: Option<CardRef>,
    ) -> Result<(), GameError> {
        for picked in first.iter().chain(second.iter()) {
            self.validate_ref(picked)?;
        }
        let power_up = self.current_power_up.as_mut().ok_or(GameError::NoPowerUp)?;
        if let Some(picked) = first {
            power_up.first_selection = Some(picked);
        }
        if let Some(picked) = second {
            power_up.second_selection = Some(picked);
        }
        power_up.stage = PowerUpStage::Selecting;

        let (Some(a), Some(b)) = (
            power_up.first_selection.clone(),
            power_up.second_selection.clone(),
        ) else {
            // Partial pick: replicate the highlight, wait for the rest
            let name = self.name_of(actor);
            self.log_action(format!("{} is choosing cards", name));
            return Ok(());
        };
        if a.player_id == b.player_id {
            return Err(GameError::InvalidSelection);
        }

        let action = power_up.action;
        if action.previews_before_commit() {
            power_up.stage = PowerUpStage::Confirmed;
            // The actor is shown the counterpart card before deciding
            let shown = if a.player_id == *actor { b } else { a };
            power_up.inspecting = Some(shown.clone());
            self.animation = Some(UiAnimation::InspectingCard {
                viewer_id: actor.clone(),
                target: shown,
            });
            let name = self.name_of(actor);
            self.log_action(format!("{} is deciding whether to swap", name));
            Ok(())
        } else {
            self.commit_swap(actor, a, b)
        }
    }

    /// Confirm step of an inspect-swap: commit the staged exchange.
    fn commit_inspect_swap(&mut self, actor: &PeerId) -> Result<(), GameError> {
        let power_up = self.current_power_up.clone().ok_or(GameError::NoPowerUp)?;
        let (Some(a), Some(b)) = (power_up.first_selection, power_up.second_selection) else {
            return Err(GameError::InvalidSelection);
        };
        self.commit_swap(actor, a, b)
    }

    fn commit_swap(&mut self, actor: &PeerId, a: CardRef, b: CardRef) -> Result<(), GameError> {
        self.swap_cards_between(&a, &b)?;
        if let Some(power_up) = self.current_power_up.as_mut() {
            power_up.stage = PowerUpStage::Resolved;
            power_up.inspecting = None;
        }
        self.animation = Some(UiAnimation::SwapAnimation {
            first: a,
            second: b,
        });
        let name = self.name_of(actor);
        self.log_action(format!("{} swapped two cards", name));
        self.advance_turn();
        Ok(())
    }
}
