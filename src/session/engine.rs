//! Session engine: the room state machine.
//!
//! One engine task owns every room. All transitions run as reactions
//! to commands or timer events consumed from a single serialized
//! queue, so no two transitions on the same room ever interleave and
//! no locking is needed. Gateways are async and best-effort: a failed
//! snapshot is logged and reported to the requester, never rolled
//! back into room state.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::discussion::{DiscussionController, TimerEvent};
use crate::error::{RoomError, RoomResult};
use crate::gateway::persistence::{PersistError, PersistenceGateway};
use crate::gateway::transport::{ServerEvent, TransportGateway};
use crate::resolver::{resolve, Decision, DEFAULT_PAUSE_TOKEN};
use crate::room::registry::RoomRegistry;
use crate::room::types::{Participant, ResolutionPolicy, Room, RoomConfig, RoomPhase};
use crate::session::command::{ClientCommand, Command};

/// Engine tunables. Defaults follow the classic rules: a two-minute
/// debate window and a two-second settle delay between rounds.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub discussion_window: Duration,
    pub round_delay: Duration,
    pub pause_token: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            discussion_window: Duration::from_secs(120),
            round_delay: Duration::from_secs(2),
            pause_token: DEFAULT_PAUSE_TOKEN.to_string(),
        }
    }
}

/// The session state machine. See the module docs for the ownership
/// and concurrency rules.
pub struct SessionEngine {
    registry: RoomRegistry,
    discussion: DiscussionController,
    transport: Arc<dyn TransportGateway>,
    store: Arc<dyn PersistenceGateway>,
    config: EngineConfig,
    timer_tx: mpsc::UnboundedSender<TimerEvent>,
    timer_rx: Option<mpsc::UnboundedReceiver<TimerEvent>>,
}

impl SessionEngine {
    pub fn new(
        transport: Arc<dyn TransportGateway>,
        store: Arc<dyn PersistenceGateway>,
        config: EngineConfig,
    ) -> Self {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        Self {
            registry: RoomRegistry::new(),
            discussion: DiscussionController::new(config.discussion_window, timer_tx.clone()),
            transport,
            store,
            config,
            timer_tx,
            timer_rx: Some(timer_rx),
        }
    }

    /// Read access for adapters and tests.
    pub fn room(&self, room_id: &str) -> RoomResult<&Room> {
        self.registry.get(room_id)
    }

    pub fn room_count(&self) -> usize {
        self.registry.len()
    }

    /// Consume commands and timer events until the command channel
    /// closes. This is the single serialized event queue.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ClientCommand>) {
        let mut timers = self.timer_rx.take().expect("run() called twice");
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(ClientCommand { client, command }) => {
                        self.handle_command(&client, command).await
                    }
                    None => break,
                },
                ev = timers.recv() => match ev {
                    Some(ev) => self.handle_timer(ev).await,
                    None => break,
                },
            }
        }
        info!("session engine stopped");
    }

    /// Dispatch one command. Failures are unicast to the issuer only;
    /// the room involved stays usable.
    pub async fn handle_command(&mut self, client: &str, command: Command) {
        let result = match command {
            Command::CreateRoom {
                room_id,
                capacity,
                display_name,
                policy,
                backlog,
            } => {
                self.create_room(client, room_id, capacity, display_name, policy, backlog)
                    .await
            }
            Command::JoinRoom {
                room_id,
                display_name,
            } => self.join_room(client, &room_id, display_name).await,
            Command::Vote { room_id, value } => self.vote(client, &room_id, value).await,
            Command::SendMessage { room_id, text } => {
                self.send_message(client, &room_id, text).await
            }
            Command::ForceEndDiscussion { room_id } => {
                self.force_end_discussion(client, &room_id).await
            }
            Command::LoadGame {
                room_id,
                display_name,
            } => self.load_game(client, &room_id, display_name).await,
            Command::ListRooms => {
                let rooms = self.registry.list();
                self.transport
                    .unicast(client, ServerEvent::AvailableRooms { rooms })
                    .await;
                Ok(())
            }
            Command::Disconnect => {
                self.disconnect(client).await;
                Ok(())
            }
        };

        if let Err(err) = result {
            warn!(client, "command rejected: {}", err);
            self.transport
                .unicast(
                    client,
                    ServerEvent::Error {
                        code: err.code().to_string(),
                        message: err.to_string(),
                    },
                )
                .await;
        }
    }

    /// React to a scheduled callback. Stale firings (room changed,
    /// removed, or re-keyed since scheduling) no-op safely.
    pub async fn handle_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::DiscussionExpired { room_id, epoch } => {
                let ended = match self.registry.get_mut(&room_id) {
                    Ok(room)
                        if room.phase == RoomPhase::Discussion && room.round_epoch == epoch =>
                    {
                        self.discussion.end(room).is_ok()
                    }
                    _ => {
                        debug!(room_id, epoch, "stale discussion timeout ignored");
                        false
                    }
                };
                if ended {
                    let _ = self.broadcast_revote(&room_id, "debate over, revote").await;
                }
            }
            TimerEvent::AdvanceRound { room_id, epoch } => {
                let feature = match self.registry.get(&room_id) {
                    Ok(room)
                        if room.phase == RoomPhase::Voting
                            && room.round_epoch == epoch
                            && !room.paused =>
                    {
                        room.current_feature().cloned()
                    }
                    _ => {
                        debug!(room_id, epoch, "stale round-advance ignored");
                        None
                    }
                };
                if let Some(feature) = feature {
                    self.transport
                        .broadcast(&room_id, ServerEvent::StartVoting { feature })
                        .await;
                }
            }
        }
    }

    async fn create_room(
        &mut self,
        client: &str,
        room_id: String,
        capacity: usize,
        display_name: String,
        policy: ResolutionPolicy,
        backlog: Vec<String>,
    ) -> RoomResult<()> {
        if backlog.is_empty() {
            return Err(RoomError::Precondition(
                "the backlog must contain at least one feature".to_string(),
            ));
        }
        let room = Room::new(
            RoomConfig {
                room_id,
                capacity,
                policy,
                backlog,
            },
            client.to_string(),
            display_name,
        );
        let room = self.registry.create(room)?;
        let (room_id, names, full) = (room.room_id.clone(), room.player_names(), room.is_full());
        info!(room_id, capacity, %policy, "room created");

        self.transport
            .unicast(
                client,
                ServerEvent::RoomCreated {
                    room_id: room_id.clone(),
                },
            )
            .await;
        self.transport
            .broadcast(&room_id, ServerEvent::UpdatePlayers { names })
            .await;
        self.broadcast_room_list().await;
        if full {
            self.open_round(&room_id).await?;
        }
        Ok(())
    }

    async fn join_room(
        &mut self,
        client: &str,
        room_id: &str,
        display_name: String,
    ) -> RoomResult<()> {
        let (names, start) = {
            let room = self.registry.get_mut(room_id)?;
            room.add_participant(client.to_string(), display_name)?;
            (
                room.player_names(),
                room.is_full() && room.phase == RoomPhase::Waiting,
            )
        };
        debug!(client, room_id, "participant joined");

        self.transport
            .unicast(
                client,
                ServerEvent::RoomJoined {
                    room_id: room_id.to_string(),
                },
            )
            .await;
        self.transport
            .broadcast(room_id, ServerEvent::UpdatePlayers { names })
            .await;
        self.broadcast_room_list().await;
        if start {
            self.open_round(room_id).await?;
        }
        Ok(())
    }

    async fn vote(&mut self, client: &str, room_id: &str, value: String) -> RoomResult<()> {
        let round_complete = {
            let room = self.registry.get_mut(room_id)?;
            room.cast_vote(client, value)?;
            room.all_voted()
        };
        if round_complete {
            self.resolve_round(room_id, Some(client)).await?;
        }
        Ok(())
    }

    /// Close the round: run the resolver and apply its decision.
    async fn resolve_round(&mut self, room_id: &str, requester: Option<&str>) -> RoomResult<()> {
        let decision = {
            let room = self.registry.get(room_id)?;
            resolve(&room.votes, room.policy, &self.config.pause_token)
        };
        debug!(room_id, ?decision, "round resolved");

        match decision {
            Decision::Value { value } => self.apply_estimate(room_id, value).await,
            Decision::NeedsRevote { reason } => {
                let feature = {
                    let room = self.registry.get_mut(room_id)?;
                    room.clear_votes();
                    room.current_feature().cloned()
                };
                if let Some(feature) = feature {
                    self.transport
                        .broadcast(
                            room_id,
                            ServerEvent::Revote {
                                feature,
                                message: format!("{}, please revote", reason),
                            },
                        )
                        .await;
                }
                Ok(())
            }
            Decision::Paused => {
                let snapshot = {
                    let room = self.registry.get_mut(room_id)?;
                    room.paused = true;
                    room.clone()
                };
                if let Err(err) = self.store.save_room(&snapshot).await {
                    warn!(room_id, "pause snapshot failed: {}", err);
                    if let Some(requester) = requester {
                        self.transport
                            .unicast(
                                requester,
                                ServerEvent::Error {
                                    code: "persistence".to_string(),
                                    message: err.to_string(),
                                },
                            )
                            .await;
                    }
                }
                self.transport
                    .broadcast(
                        room_id,
                        ServerEvent::GamePaused {
                            message: "every player chose the pause card; the session was saved"
                                .to_string(),
                        },
                    )
                    .await;
                Ok(())
            }
            Decision::NeedsDiscussion {
                lowest,
                highest,
                lowest_value,
                highest_value,
            } => {
                let (deadline, creator_id) = {
                    let room = self.registry.get_mut(room_id)?;
                    let deadline = self.discussion.begin(room, &lowest, &highest)?;
                    (deadline, room.creator_id.clone())
                };
                debug!(room_id, %deadline, "debate window opened");

                for (extreme, own_value) in [(&lowest, lowest_value), (&highest, highest_value)] {
                    self.transport
                        .unicast(
                            extreme,
                            ServerEvent::StartDiscussion {
                                message: format!(
                                    "you are one of the extremes ({}); please make your case",
                                    crate::resolver::format_estimate(own_value)
                                ),
                                lowest_value,
                                highest_value,
                            },
                        )
                        .await;
                }
                self.transport
                    .broadcast(
                        room_id,
                        ServerEvent::DiscussionStarted {
                            message: format!(
                                "a debate is needed between the two extremes ({} and {})",
                                crate::resolver::format_estimate(lowest_value),
                                crate::resolver::format_estimate(highest_value)
                            ),
                            lowest_value,
                            highest_value,
                            creator_id,
                        },
                    )
                    .await;
                Ok(())
            }
        }
    }

    /// Record an estimate on the current feature and advance the
    /// cursor, finishing the session when the backlog is exhausted.
    async fn apply_estimate(&mut self, room_id: &str, value: String) -> RoomResult<()> {
        let (feature, finished_backlog, epoch) = {
            let room = self.registry.get_mut(room_id)?;
            let index = room.current_feature_index;
            let feature = room.backlog.get_mut(index).ok_or_else(|| {
                RoomError::Precondition("no feature is open for estimation".to_string())
            })?;
            feature.estimate = Some(value.clone());
            let feature = feature.clone();
            room.current_feature_index += 1;
            if room.current_feature_index == room.backlog.len() {
                room.transition(RoomPhase::Finished)?;
                (feature, Some(room.backlog.clone()), 0)
            } else {
                room.clear_votes();
                (feature, None, room.round_epoch)
            }
        };

        self.transport
            .broadcast(
                room_id,
                ServerEvent::FeatureEstimated {
                    feature,
                    value: value.clone(),
                },
            )
            .await;

        match finished_backlog {
            Some(backlog) => {
                info!(room_id, "all features estimated; session finished");
                self.transport
                    .broadcast(
                        room_id,
                        ServerEvent::GameFinished {
                            backlog: backlog.clone(),
                        },
                    )
                    .await;
                if let Err(err) = self.store.save_results(room_id, &backlog).await {
                    warn!(room_id, "saving final results failed: {}", err);
                }
            }
            None => {
                // Let clients settle before prompting the next item.
                let tx = self.timer_tx.clone();
                let room_id = room_id.to_string();
                let delay = self.config.round_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(TimerEvent::AdvanceRound { room_id, epoch });
                });
            }
        }
        Ok(())
    }

    async fn send_message(&mut self, client: &str, room_id: &str, text: String) -> RoomResult<()> {
        let sender = {
            let room = self.registry.get(room_id)?;
            let participant = room
                .participants
                .get(client)
                .ok_or_else(|| RoomError::ParticipantNotFound(client.to_string()))?;
            if !DiscussionController::may_chat(room, client) {
                return Err(RoomError::Permission(
                    "only the two extreme voters may chat during the discussion".to_string(),
                ));
            }
            participant.display_name.clone()
        };
        self.transport
            .broadcast(room_id, ServerEvent::ReceiveMessage { sender, text })
            .await;
        Ok(())
    }

    async fn force_end_discussion(&mut self, client: &str, room_id: &str) -> RoomResult<()> {
        {
            let room = self.registry.get_mut(room_id)?;
            if room.creator_id != client {
                return Err(RoomError::Permission(
                    "only the room creator can end the discussion".to_string(),
                ));
            }
            if room.phase != RoomPhase::Discussion {
                return Err(RoomError::Precondition(
                    "no discussion in progress".to_string(),
                ));
            }
            self.discussion.end(room)?;
        }
        info!(room_id, "discussion ended early by creator");
        self.broadcast_revote(room_id, "debate over, revote").await
    }

    async fn load_game(
        &mut self,
        client: &str,
        room_id: &str,
        display_name: String,
    ) -> RoomResult<()> {
        if self.registry.get(room_id).is_ok() {
            return Err(RoomError::DuplicateRoom(room_id.to_string()));
        }
        let mut room = self.store.load_room(room_id).await.map_err(map_persist)?;
        if room.current_feature().is_none() {
            return Err(RoomError::MalformedSnapshot {
                room_id: room_id.to_string(),
                detail: "snapshot has no feature left to estimate".to_string(),
            });
        }

        // Restore rebuilds membership from scratch: the loader becomes
        // creator and sole participant, and the room re-enters waiting
        // so the rest of the team can re-join.
        room.participants.clear();
        room.participants.insert(
            client.to_string(),
            Participant {
                display_name,
                has_voted: false,
            },
        );
        room.creator_id = client.to_string();
        room.votes.clear();
        room.discussion_extremes.clear();
        room.discussion_deadline = None;
        room.paused = false;
        room.phase = RoomPhase::Waiting;
        room.round_epoch += 1;

        let snapshot = room.clone();
        let full = room.is_full();
        self.registry.insert(room);
        info!(room_id, "room restored from snapshot");

        self.transport
            .unicast(
                client,
                ServerEvent::GameLoaded {
                    room: Box::new(snapshot),
                },
            )
            .await;
        self.broadcast_room_list().await;
        if full {
            self.open_round(room_id).await?;
        }
        Ok(())
    }

    async fn disconnect(&mut self, client: &str) {
        for room_id in self.registry.rooms_of(client) {
            let mut names = None;
            let mut removed = false;
            let mut debate_cut_short = false;
            let mut round_complete = false;
            {
                let Ok(room) = self.registry.get_mut(&room_id) else {
                    continue;
                };
                let was_extreme = room.discussion_extremes.iter().any(|id| id == client);
                room.remove_participant(client);
                if room.is_empty() {
                    removed = true;
                } else {
                    names = Some(room.player_names());
                    if was_extreme && room.phase == RoomPhase::Discussion {
                        debate_cut_short = self.discussion.end(room).is_ok();
                    } else if room.phase == RoomPhase::Voting && !room.paused && room.all_voted()
                    {
                        round_complete = true;
                    }
                }
            }

            if removed {
                self.discussion.cancel(&room_id);
                self.registry.remove(&room_id);
                info!(room_id, "room removed after last participant left");
            } else if let Some(names) = names {
                self.transport
                    .broadcast(&room_id, ServerEvent::UpdatePlayers { names })
                    .await;
            }
            self.broadcast_room_list().await;

            if debate_cut_short {
                let _ = self.broadcast_revote(&room_id, "debate over, revote").await;
            }
            if round_complete {
                // The leaver's pending vote no longer gates the round.
                let _ = self.resolve_round(&room_id, None).await;
            }
        }
        debug!(client, "client disconnected");
    }

    /// Open the first voting round of a room that just filled up.
    async fn open_round(&mut self, room_id: &str) -> RoomResult<()> {
        let feature = {
            let room = self.registry.get_mut(room_id)?;
            room.transition(RoomPhase::Voting)?;
            room.current_feature().cloned()
        };
        if let Some(feature) = feature {
            info!(room_id, "voting started");
            self.transport
                .broadcast(room_id, ServerEvent::StartVoting { feature })
                .await;
        }
        Ok(())
    }

    async fn broadcast_revote(&mut self, room_id: &str, message: &str) -> RoomResult<()> {
        let feature = self.registry.get(room_id)?.current_feature().cloned();
        if let Some(feature) = feature {
            self.transport
                .broadcast(
                    room_id,
                    ServerEvent::Revote {
                        feature,
                        message: message.to_string(),
                    },
                )
                .await;
        }
        Ok(())
    }

    async fn broadcast_room_list(&mut self) {
        self.transport
            .broadcast_all(ServerEvent::AvailableRooms {
                rooms: self.registry.list(),
            })
            .await;
    }
}

fn map_persist(err: PersistError) -> RoomError {
    match err {
        PersistError::NotFound(room_id) => RoomError::RoomNotFound(room_id),
        PersistError::Malformed { room_id, detail } => {
            RoomError::MalformedSnapshot { room_id, detail }
        }
        PersistError::Io(err) => RoomError::Persistence(err.to_string()),
    }
}
