use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::cards::CardRef;
use super::powerup::{PowerUpAction, PowerUpSelection};
use super::state::{GameError, GameState, Player};
use crate::shared::PeerId;
use crate::timer::{TimerKey, TimerQueue};

/// Every operation a player (local or remote) can ask of the engine. This
/// is the single trust boundary: a hardened build could validate senders
/// here without touching the state machines underneath.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Intent {
    MarkReady,
    StartGame,
    DrawCard {
        from_discard: bool,
    },
    SwapCard {
        hand_index: usize,
    },
    DiscardCard,
    StartPowerUp {
        action: PowerUpAction,
    },
    CompletePowerUp {
        selection: PowerUpSelection,
    },
    CancelPowerUp,
    AttemptStack {
        player_card_index: Option<usize>,
        target_player_id: Option<PeerId>,
        target_card_index: Option<usize>,
    },
    GiveCard {
        card_index: usize,
    },
    CallReds,
}

/// Invalid input is a safe, idempotent "this call had no effect" - never
/// an error that crosses the engine boundary.
#[derive(Debug)]
pub enum ApplyOutcome {
    Applied,
    Ignored(GameError),
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied)
    }
}

/// Owns one authoritative `GameState` replica plus the timers that drive
/// deferred transitions (the stack-race window). All mutation funnels
/// through `apply_intent`/`fire_due`/`replace_state`, each of which
/// commits at most one version bump.
pub struct GameEngine {
    state: GameState,
    timers: TimerQueue,
}

impl GameEngine {
    pub fn new(state: GameState) -> Self {
        let mut engine = Self {
            state,
            timers: TimerQueue::new(),
        };
        engine.sync_race_timer();
        engine
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.timers.next_deadline()
    }

    /// Applies one player intent as a single atomic step. Precondition
    /// violations are logged no-ops; applied mutations bump the version.
    pub fn apply_intent(&mut self, actor: &PeerId, intent: Intent, now: DateTime<Utc>) -> ApplyOutcome {
        let result = match &intent {
            Intent::MarkReady => self.state.mark_ready(actor),
            Intent::StartGame => self.state.start_game(actor),
            Intent::DrawCard { from_discard } => self.state.draw_card(actor, *from_discard),
            Intent::SwapCard { hand_index } => self.state.swap_card(actor, *hand_index),
            Intent::DiscardCard => self.state.discard_card(actor),
            Intent::StartPowerUp { action } => self.state.start_power_up(actor, *action),
            Intent::CompletePowerUp { selection } => self.state.complete_power_up(actor, selection),
            Intent::CancelPowerUp => self.state.cancel_power_up(actor),
            Intent::AttemptStack {
                player_card_index,
                target_player_id,
                target_card_index,
            } => match (player_card_index, target_player_id, target_card_index) {
                (_, Some(pid), Some(idx)) => {
                    let target = CardRef::new(pid.clone(), *idx);
                    self.state.attempt_stack(actor, target, now.timestamp_millis())
                }
                (Some(idx), _, _) => {
                    let target = CardRef::new(actor.clone(), *idx);
                    self.state.attempt_stack(actor, target, now.timestamp_millis())
                }
                _ => Err(GameError::InvalidSelection),
            },
            Intent::GiveCard { card_index } => self.state.give_card(actor, *card_index),
            Intent::CallReds => self.state.call_reds(actor),
        };

        match result {
            Ok(()) => {
                self.commit();
                debug!(
                    actor = %actor,
                    version = self.state.state_version,
                    action = %self.state.last_action,
                    "Intent applied"
                );
                ApplyOutcome::Applied
            }
            Err(e) => {
                debug!(actor = %actor, intent = ?intent, error = %e, "Intent ignored");
                ApplyOutcome::Ignored(e)
            }
        }
    }

    /// Fires any due timers; returns true if the state mutated (and so
    /// needs rebroadcasting).
    pub fn fire_due(&mut self, now: DateTime<Utc>) -> bool {
        let mut mutated = false;
        for key in self.timers.fire_due(now) {
            match key {
                TimerKey::StackWindow => match self.state.resolve_stack_race() {
                    Ok(()) => {
                        self.commit();
                        mutated = true;
                    }
                    Err(e) => debug!(error = %e, "Stack window fired with nothing to resolve"),
                },
            }
        }
        mutated
    }

    /// Replaces the local replica with a received snapshot, iff it is
    /// strictly newer. Stale or duplicate snapshots are dropped whole,
    /// never merged, with one exception: claims from a concurrently open
    /// stack race are unioned in either direction, so simultaneous
    /// broadcasts that collide on the same version cannot lose claims.
    pub fn replace_state(&mut self, mut incoming: GameState) -> bool {
        if incoming.state_version <= self.state.state_version {
            if self.absorb_concurrent_claims(&incoming) {
                debug!(
                    incoming = incoming.state_version,
                    "Folded concurrent stack claims from a tied sync"
                );
            } else {
                debug!(
                    incoming = incoming.state_version,
                    local = self.state.state_version,
                    "Dropped stale state sync"
                );
            }
            return false;
        }
        self.carry_local_claims_into(&mut incoming);
        self.state = incoming;
        self.sync_race_timer();
        true
    }

    /// Tie/stale path: fold claims this replica has not seen into its own
    /// open race. Returns whether anything new was absorbed.
    fn absorb_concurrent_claims(&mut self, incoming: &GameState) -> bool {
        if !races_mergeable(&self.state, incoming) {
            return false;
        }
        let Some(theirs) = incoming.pending_stack_race.as_ref() else {
            return false;
        };
        let claims = theirs.claims.clone();
        let Some(ours) = self.state.pending_stack_race.as_mut() else {
            return false;
        };
        let mut absorbed = false;
        for claim in claims {
            let seen = ours
                .claims
                .iter()
                .any(|c| c.claimant_id == claim.claimant_id && c.timestamp_ms == claim.timestamp_ms);
            if !seen {
                ours.claims.push(claim);
                absorbed = true;
            }
        }
        absorbed
    }

    /// Replacement path: a strictly newer snapshot may still predate a
    /// claim this replica already holds, so carry those over.
    fn carry_local_claims_into(&self, incoming: &mut GameState) {
        if !races_mergeable(&self.state, incoming) {
            return;
        }
        let Some(ours) = self.state.pending_stack_race.as_ref() else {
            return;
        };
        let Some(theirs) = incoming.pending_stack_race.as_mut() else {
            return;
        };
        for claim in &ours.claims {
            let seen = theirs
                .claims
                .iter()
                .any(|c| c.claimant_id == claim.claimant_id && c.timestamp_ms == claim.timestamp_ms);
            if !seen {
                theirs.claims.push(claim.clone());
            }
        }
    }

    /// Host-side: seat a new player, or reconnect a returning one.
    pub fn add_player(&mut self, player: Player) -> bool {
        if let Some(existing) = self.state.player_mut(&player.id) {
            existing.is_connected = true;
            let name = existing.name.clone();
            self.state.log_action(format!("{} reconnected", name));
            self.commit();
            return true;
        }
        info!(player = %player.id, name = %player.name, "Player joined");
        let name = player.name.clone();
        self.state.players.push(player);
        self.state.log_action(format!("{} joined the game", name));
        self.commit();
        true
    }

    /// A transport-level disconnect: the seat and hand persist so the
    /// player can rejoin and resync.
    pub fn mark_player_left(&mut self, peer_id: &PeerId) -> bool {
        match self.state.player_mut(peer_id) {
            Some(player) if player.is_connected => {
                player.is_connected = false;
                let name = player.name.clone();
                self.state.log_action(format!("{} disconnected", name));
                self.commit();
                true
            }
            _ => false,
        }
    }

    fn commit(&mut self) {
        self.state.state_version += 1;
        self.sync_race_timer();
    }

    /// Keeps the window timer aligned with the replicated race state, so
    /// a replica that receives a mid-race snapshot knows its deadline.
    fn sync_race_timer(&mut self) {
        let open_deadline = self
            .state
            .pending_stack_race
            .as_ref()
            .filter(|race| race.is_collecting())
            .and_then(|race| DateTime::from_timestamp_millis(race.deadline_ms));
        match open_deadline {
            Some(deadline) => self.timers.schedule(TimerKey::StackWindow, deadline),
            None => self.timers.cancel(TimerKey::StackWindow),
        }
    }
}

/// Two snapshots hold the same race when both are still collecting claims
/// against the same discard-top card.
fn races_mergeable(local: &GameState, incoming: &GameState) -> bool {
    let (Some(ours), Some(theirs)) = (
        local.pending_stack_race.as_ref(),
        incoming.pending_stack_race.as_ref(),
    ) else {
        return false;
    };
    if !ours.is_collecting() || !theirs.is_collecting() {
        return false;
    }
    match (local.top_discard(), incoming.top_discard()) {
        (Some(a), Some(b)) => a.id == b.id,
        _ => false,
    }
}
