use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use reds::game::cards::{Card, Rank, Suit};
use reds::game::state::{GamePhase, GameState, Player, TurnPhase};
use reds::protocol::messages::Envelope;
use reds::protocol::transport::{HubEndpoint, HubTransport};
use reds::{PeerSession, SessionConfig};

pub struct TestPeer {
    pub id: String,
    pub session: PeerSession<HubEndpoint>,
    pub inbox: mpsc::UnboundedReceiver<Envelope>,
}

/// A hub-connected table of peers with in-test message pumping. Peer 0
/// is always the host.
pub struct TestTable {
    pub hub: HubTransport,
    pub peers: Vec<TestPeer>,
}

pub struct TableBuilder {
    peer_count: usize,
    config: SessionConfig,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self {
            peer_count: 2,
            config: SessionConfig::default(),
        }
    }

    pub fn with_peers(mut self, peer_count: usize) -> Self {
        self.peer_count = peer_count;
        self
    }

    #[allow(dead_code)]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn build(self) -> TestTable {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let hub = HubTransport::new();
        let (endpoint, inbox) = hub.attach("peer-0".to_string()).await;
        let host = PeerSession::host_with_config(
            "peer-0".to_string(),
            "Player 0",
            endpoint,
            self.config.clone(),
        );
        let mut table = TestTable {
            hub,
            peers: vec![TestPeer {
                id: "peer-0".to_string(),
                session: host,
                inbox,
            }],
        };
        for i in 1..self.peer_count {
            table
                .join_peer(&format!("peer-{i}"), &format!("Player {i}"), self.config.clone())
                .await
                .expect("join accepted");
        }
        table.settle().await;
        table
    }
}

impl TestTable {
    /// Runs the real join handshake: the joiner awaits the host's
    /// response while the host services exactly the one request.
    pub async fn join_peer(
        &mut self,
        id: &str,
        name: &str,
        config: SessionConfig,
    ) -> Result<(), reds::ProtocolError> {
        let (endpoint, mut inbox) = self.hub.attach(id.to_string()).await;
        let host = &mut self.peers[0];
        let host_session = &mut host.session;
        let host_inbox = &mut host.inbox;
        let (joined, ()) = tokio::join!(
            PeerSession::join(id.to_string(), name, endpoint, &mut inbox, config),
            async {
                let envelope = host_inbox.recv().await.expect("hub open");
                host_session
                    .handle_message(envelope)
                    .await
                    .expect("host handles join");
            }
        );
        self.peers.push(TestPeer {
            id: id.to_string(),
            session: joined?,
            inbox,
        });
        Ok(())
    }

    /// Drains and handles every queued envelope, round after round,
    /// until no peer has anything left.
    pub async fn settle(&mut self) {
        loop {
            let mut handled = 0;
            for peer in &mut self.peers {
                while let Ok(envelope) = peer.inbox.try_recv() {
                    peer.session
                        .handle_message(envelope)
                        .await
                        .expect("message handled");
                    handled += 1;
                }
            }
            if handled == 0 {
                return;
            }
        }
    }

    pub async fn all_ready(&mut self) {
        for peer in &mut self.peers {
            peer.session.mark_ready().await.expect("ready sent");
        }
        self.settle().await;
    }

    /// Full pre-game flow: lobby readiness, host deal, bottom-card
    /// viewing. Leaves every replica in Playing / Draw.
    pub async fn start_playing(&mut self) {
        self.all_ready().await;
        self.peers[0].session.start_game().await.expect("host starts");
        self.settle().await;
        self.all_ready().await;
    }

    pub fn states(&self) -> Vec<&GameState> {
        self.peers.iter().map(|p| p.session.state()).collect()
    }

    /// Every replica must agree on version, phase, and card layout.
    pub fn assert_converged(&self) {
        let reference = self.peers[0].session.state();
        for peer in &self.peers[1..] {
            let state = peer.session.state();
            assert_eq!(state.state_version, reference.state_version, "version diverged at {}", peer.id);
            assert_eq!(state.phase, reference.phase, "phase diverged at {}", peer.id);
            assert_eq!(state.turn_phase, reference.turn_phase, "turn diverged at {}", peer.id);
            assert_eq!(
                state.current_player_index, reference.current_player_index,
                "turn holder diverged at {}",
                peer.id
            );
            assert_eq!(state.card_census(), reference.card_census(), "cards diverged at {}", peer.id);
        }
    }

    /// Polls every session's timers and settles the fallout. Only the
    /// host actually closes windows; the rest converge on its sync.
    pub async fn poll_all_timers(&mut self, now: DateTime<Utc>) {
        for peer in &mut self.peers {
            peer.session.poll_timers(now).await.expect("timers polled");
        }
        self.settle().await;
    }
}

/// A mid-game snapshot with fixed hands, used to drive replicas into a
/// known position through the ordinary sync path.
pub fn scripted_playing_state(
    game_code: &str,
    hands: &[(&str, Vec<Card>)],
    discard_top: Card,
    state_version: u64,
) -> GameState {
    let mut state = GameState::new(game_code);
    for (i, (id, cards)) in hands.iter().enumerate() {
        let mut player = Player::new(id.to_string(), format!("Player {i}"), i == 0);
        player.is_ready = true;
        player.has_seen_bottom_cards = true;
        player.cards = cards.clone();
        state.players.push(player);
    }
    let mut top = discard_top;
    top.face_up = true;
    state.discard_pile.push(top);
    state.deck = vec![
        Card::new(Rank::Two, Suit::Hearts),
        Card::new(Rank::Queen, Suit::Spades),
        Card::new(Rank::Nine, Suit::Diamonds),
        Card::new(Rank::Four, Suit::Clubs),
    ];
    state.phase = GamePhase::Playing;
    state.turn_phase = TurnPhase::Draw;
    state.state_version = state_version;
    state
}
