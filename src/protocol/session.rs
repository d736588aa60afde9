use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::messages::{
    Envelope, GameStartPayload, JoinRequestPayload, JoinResponsePayload, MessageType,
    PlayerJoinedPayload, PlayerLeftPayload, PlayerReadyPayload, StateSyncPayload,
};
use super::transport::Transport;
use crate::game::engine::{ApplyOutcome, GameEngine, Intent};
use crate::game::powerup::{PowerUpAction, PowerUpSelection};
use crate::game::state::{generate_game_code, GameState, Player};
use crate::shared::{PeerId, ProtocolError};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bounded wait for a join to be acknowledged before surfacing a
    /// connectivity error.
    pub join_wait: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            join_wait: Duration::from_secs(10),
        }
    }
}

/// One peer's seat at the table: a local `GameEngine` replica plus the
/// transport used to keep everyone else's replica converged.
///
/// Local intents are applied speculatively and the resulting state is
/// broadcast; inbound envelopes are folded in via `handle_message`. The
/// caller owns the receive loop and the clock (`poll_timers`).
pub struct PeerSession<T: Transport> {
    peer_id: PeerId,
    engine: GameEngine,
    transport: T,
    config: SessionConfig,
}

impl<T: Transport> PeerSession<T> {
    /// Opens a new table with this peer as host.
    pub fn host(peer_id: PeerId, name: &str, transport: T) -> Self {
        Self::host_with_config(peer_id, name, transport, SessionConfig::default())
    }

    pub fn host_with_config(
        peer_id: PeerId,
        name: &str,
        transport: T,
        config: SessionConfig,
    ) -> Self {
        let mut state = GameState::new(generate_game_code());
        state.players.push(Player::new(peer_id.clone(), name, true));
        info!(peer = %peer_id, code = %state.game_code, "Hosting game");
        Self {
            peer_id,
            engine: GameEngine::new(state),
            transport,
            config,
        }
    }

    /// Joins an existing table: sends a join request and waits (bounded)
    /// for the host's snapshot.
    pub async fn join(
        peer_id: PeerId,
        name: &str,
        transport: T,
        inbox: &mut mpsc::UnboundedReceiver<Envelope>,
        config: SessionConfig,
    ) -> Result<Self, ProtocolError> {
        transport
            .send_to_all(Envelope::join_request(name.to_string(), peer_id.clone()))
            .await?;
        let deadline = tokio::time::Instant::now() + config.join_wait;

        loop {
            let envelope = match tokio::time::timeout_at(deadline, inbox.recv()).await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => return Err(ProtocolError::TransportClosed),
                Err(_) => return Err(ProtocolError::JoinTimeout(config.join_wait)),
            };
            match envelope.message_type {
                MessageType::JoinResponse => {
                    let payload: JoinResponsePayload = parse_payload(envelope.payload)?;
                    if payload.target_id != peer_id {
                        continue;
                    }
                    if !payload.success {
                        return Err(ProtocolError::JoinRejected);
                    }
                    let game = payload.game.ok_or_else(|| {
                        ProtocolError::MalformedPayload("join response without game".to_string())
                    })?;
                    info!(peer = %peer_id, code = %game.game_code, "Joined game");
                    return Ok(Self {
                        peer_id,
                        engine: GameEngine::new(game),
                        transport,
                        config,
                    });
                }
                // A state sync that already carries our seat works too
                MessageType::StateSync => {
                    let payload: StateSyncPayload = parse_payload(envelope.payload)?;
                    if payload.game.player(&peer_id).is_some() {
                        info!(peer = %peer_id, code = %payload.game.game_code, "Joined via state sync");
                        return Ok(Self {
                            peer_id,
                            engine: GameEngine::new(payload.game),
                            transport,
                            config,
                        });
                    }
                }
                _ => {}
            }
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn state(&self) -> &GameState {
        self.engine.state()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_host(&self) -> bool {
        self.engine
            .state()
            .player(&self.peer_id)
            .map(|p| p.is_host)
            .unwrap_or(false)
    }

    /// Next point in time `poll_timers` has work to do.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.engine.next_deadline()
    }

    // ------------------------------------------------------------------
    // Local intents (the UI-facing surface)
    // ------------------------------------------------------------------

    pub async fn draw_card(&mut self, from_discard: bool) -> Result<ApplyOutcome, ProtocolError> {
        self.submit(Intent::DrawCard { from_discard }).await
    }

    pub async fn swap_card(&mut self, hand_index: usize) -> Result<ApplyOutcome, ProtocolError> {
        self.submit(Intent::SwapCard { hand_index }).await
    }

    pub async fn discard_card(&mut self) -> Result<ApplyOutcome, ProtocolError> {
        self.submit(Intent::DiscardCard).await
    }

    pub async fn start_power_up(
        &mut self,
        action: PowerUpAction,
    ) -> Result<ApplyOutcome, ProtocolError> {
        self.submit(Intent::StartPowerUp { action }).await
    }

    pub async fn complete_power_up(
        &mut self,
        selection: PowerUpSelection,
    ) -> Result<ApplyOutcome, ProtocolError> {
        self.submit(Intent::CompletePowerUp { selection }).await
    }

    pub async fn cancel_power_up(&mut self) -> Result<ApplyOutcome, ProtocolError> {
        self.submit(Intent::CancelPowerUp).await
    }

    pub async fn attempt_stack(
        &mut self,
        player_card_index: Option<usize>,
        target_player_id: Option<PeerId>,
        target_card_index: Option<usize>,
    ) -> Result<ApplyOutcome, ProtocolError> {
        self.submit(Intent::AttemptStack {
            player_card_index,
            target_player_id,
            target_card_index,
        })
        .await
    }

    pub async fn give_card(&mut self, card_index: usize) -> Result<ApplyOutcome, ProtocolError> {
        self.submit(Intent::GiveCard { card_index }).await
    }

    pub async fn call_reds(&mut self) -> Result<ApplyOutcome, ProtocolError> {
        self.submit(Intent::CallReds).await
    }

    /// Readiness rides its own message so the host can fold it into the
    /// broadcast state; everything else replicates as a full snapshot.
    pub async fn mark_ready(&mut self) -> Result<ApplyOutcome, ProtocolError> {
        let actor = self.peer_id.clone();
        let outcome = self.engine.apply_intent(&actor, Intent::MarkReady, Utc::now());
        if outcome.is_applied() {
            if self.is_host() {
                self.broadcast_state().await?;
            } else {
                self.transport
                    .send_to_all(Envelope::player_ready(actor.clone(), actor))
                    .await?;
            }
        }
        Ok(outcome)
    }

    /// Host deals and announces the fully dealt initial state.
    pub async fn start_game(&mut self) -> Result<ApplyOutcome, ProtocolError> {
        let actor = self.peer_id.clone();
        let outcome = self.engine.apply_intent(&actor, Intent::StartGame, Utc::now());
        if outcome.is_applied() {
            let envelope = Envelope::game_start(self.engine.state().clone(), actor);
            self.transport.send_to_all(envelope).await?;
        }
        Ok(outcome)
    }

    /// Announce departure; the seat and hand persist for a rejoin.
    pub async fn leave(&self) -> Result<(), ProtocolError> {
        self.transport
            .send_to_all(Envelope::player_left(self.peer_id.clone(), self.peer_id.clone()))
            .await
    }

    pub async fn submit(&mut self, intent: Intent) -> Result<ApplyOutcome, ProtocolError> {
        self.submit_at(intent, Utc::now()).await
    }

    /// Applies a local intent at an explicit timestamp (stack-claim
    /// ordering uses it) and replicates the result if it stuck.
    pub async fn submit_at(
        &mut self,
        intent: Intent,
        now: DateTime<Utc>,
    ) -> Result<ApplyOutcome, ProtocolError> {
        let actor = self.peer_id.clone();
        let outcome = self.engine.apply_intent(&actor, intent, now);
        if outcome.is_applied() {
            self.broadcast_state().await?;
        }
        Ok(outcome)
    }

    /// Fires any due deferred transitions (stack-window close) and
    /// replicates the outcome. Returns true if state changed.
    ///
    /// Only the host arbitrates: other replicas keep collecting claims
    /// until the host's strictly-newer rebroadcast lands, so one judge
    /// sees the full claim set and one RNG performs any penalty draws.
    pub async fn poll_timers(&mut self, now: DateTime<Utc>) -> Result<bool, ProtocolError> {
        if !self.is_host() {
            return Ok(false);
        }
        if self.engine.fire_due(now) {
            self.broadcast_state().await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    // ------------------------------------------------------------------
    // Inbound replication
    // ------------------------------------------------------------------

    /// Folds one received envelope into the local replica. Malformed
    /// payloads are logged and dropped; only transport failures bubble.
    pub async fn handle_message(&mut self, envelope: Envelope) -> Result<(), ProtocolError> {
        match envelope.message_type {
            MessageType::JoinRequest => self.handle_join_request(envelope).await,
            MessageType::PlayerJoined => {
                if let Some(payload) = parse_or_warn::<PlayerJoinedPayload>(envelope.payload) {
                    if self.engine.state().player(&payload.player.id).is_none() {
                        self.engine.add_player(payload.player);
                    }
                }
                Ok(())
            }
            MessageType::PlayerLeft => {
                if let Some(payload) = parse_or_warn::<PlayerLeftPayload>(envelope.payload) {
                    let changed = self.engine.mark_player_left(&payload.player_id);
                    // The host republishes so late joiners see it too
                    if changed && self.is_host() {
                        self.broadcast_state().await?;
                    }
                }
                Ok(())
            }
            MessageType::PlayerReady => {
                // Only the host folds readiness into broadcast state
                if !self.is_host() {
                    return Ok(());
                }
                if let Some(payload) = parse_or_warn::<PlayerReadyPayload>(envelope.payload) {
                    let outcome =
                        self.engine
                            .apply_intent(&payload.player_id, Intent::MarkReady, Utc::now());
                    if outcome.is_applied() {
                        self.broadcast_state().await?;
                    }
                }
                Ok(())
            }
            MessageType::GameStart => {
                if let Some(payload) = parse_or_warn::<GameStartPayload>(envelope.payload) {
                    self.engine.replace_state(payload.game);
                }
                Ok(())
            }
            MessageType::StateSync => {
                if let Some(payload) = parse_or_warn::<StateSyncPayload>(envelope.payload) {
                    self.engine.replace_state(payload.game);
                }
                Ok(())
            }
            MessageType::JoinResponse => {
                // Only meaningful inside `join`; a live session ignores it
                debug!(sender = %envelope.sender_id, "Ignoring stray join response");
                Ok(())
            }
        }
    }

    async fn handle_join_request(&mut self, envelope: Envelope) -> Result<(), ProtocolError> {
        if !self.is_host() {
            return Ok(());
        }
        let Some(payload) = parse_or_warn::<JoinRequestPayload>(envelope.payload) else {
            return Ok(());
        };

        let returning = self.engine.state().player(&payload.peer_id).is_some();
        let accepting = returning || self.engine.state().phase == crate::game::state::GamePhase::Waiting;
        if !accepting {
            warn!(peer = %payload.peer_id, "Rejecting join: game already running");
            let response =
                Envelope::join_response(false, None, payload.peer_id.clone(), self.peer_id.clone());
            return self.transport.send_to_peer(&payload.peer_id, response).await;
        }

        let player = Player::new(payload.peer_id.clone(), payload.name, false);
        self.engine.add_player(player.clone());

        let response = Envelope::join_response(
            true,
            Some(self.engine.state().clone()),
            payload.peer_id.clone(),
            self.peer_id.clone(),
        );
        self.transport.send_to_peer(&payload.peer_id, response).await?;
        if !returning {
            self.transport
                .send_to_all(Envelope::player_joined(player, self.peer_id.clone()))
                .await?;
        }
        self.broadcast_state().await
    }

    async fn broadcast_state(&self) -> Result<(), ProtocolError> {
        let envelope = Envelope::state_sync(self.engine.state().clone(), self.peer_id.clone());
        self.transport.send_to_all(envelope).await
    }
}

fn parse_payload<P: DeserializeOwned>(value: serde_json::Value) -> Result<P, ProtocolError> {
    serde_json::from_value(value).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
}

fn parse_or_warn<P: DeserializeOwned>(value: serde_json::Value) -> Option<P> {
    match parse_payload(value) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(error = %e, "Dropping malformed message");
            None
        }
    }
}
