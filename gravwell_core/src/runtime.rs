//! Runtime - binds peer and authority sessions to an environment.
//!
//! The sessions are pure state machines. The runtimes drain the transport,
//! decode, dispatch, and ship whatever the sessions queue, reading time from
//! the [`GameContext`] so the same code runs against the tokio clock or the
//! simulator's virtual one.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              PeerRuntime<Ctx, Net>           │
//! │   Net::try_recv ─▶ decode ─▶ PeerSession     │
//! │   Ctx::now_millis ─▶ render / input / fire   │
//! │   outgoing ─▶ encode ─▶ Net::send(authority) │
//! └──────────────────────────────────────────────┘
//! ```

use crate::authority::{Authority, Recipient};
use crate::protocol::{decode, encode, ClientMessage, ServerMessage, ShootInfo};
use crate::registry::EntityId;
use crate::session::{Frame, PeerSession};
use crate::state::{Change, ChangeEvent, TrajectoryState};
use gravwell_env::{EnvError, GameContext, NodeId, PacketEnvelope, Transport};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// A peer bound to its environment.
pub struct PeerRuntime<Ctx, Net>
where
    Ctx: GameContext,
    Net: Transport,
{
    context: Arc<Ctx>,
    network: Arc<Net>,
    authority: NodeId,
    session: PeerSession,
    sequence: u64,
}

impl<Ctx, Net> PeerRuntime<Ctx, Net>
where
    Ctx: GameContext,
    Net: Transport,
{
    pub fn new(context: Arc<Ctx>, network: Arc<Net>, authority: NodeId, session: PeerSession) -> Self {
        Self {
            context,
            network,
            authority,
            session,
            sequence: 0,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.network.local_id()
    }

    pub fn context(&self) -> &Arc<Ctx> {
        &self.context
    }

    pub fn session(&self) -> &PeerSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut PeerSession {
        &mut self.session
    }

    /// Handles every envelope that has already arrived. Returns how many
    /// messages were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Some((from, envelope)) = self.network.try_recv() {
            if from != self.authority {
                debug!("Peer {} ignoring packet from {}", self.node_id(), from);
                continue;
            }
            match decode::<ServerMessage>(&envelope.payload) {
                Ok(message) => {
                    self.session.handle(message, self.context.now_millis());
                    applied += 1;
                }
                Err(e) => warn!("Peer {} dropped undecodable packet: {}", self.node_id(), e),
            }
        }
        applied
    }

    /// One render tick: pump, advance, sample, ship.
    pub async fn frame(&mut self) -> Result<Frame, EnvError> {
        self.pump();
        let frame = self.session.render(self.context.now_millis());
        for message in &frame.outgoing {
            self.send(message).await?;
        }
        Ok(frame)
    }

    pub async fn input(&mut self, change: Change) -> Result<Option<ChangeEvent>, EnvError> {
        let event = self.session.input(change, self.context.now_millis());
        self.flush().await?;
        Ok(event)
    }

    pub async fn fire(&mut self) -> Result<Option<ShootInfo>, EnvError> {
        let shot = self.session.fire(self.context.now_millis());
        self.flush().await?;
        Ok(shot)
    }

    /// Sends whatever the session has queued.
    pub async fn flush(&mut self) -> Result<usize, EnvError> {
        let outgoing = self.session.take_outgoing();
        for message in &outgoing {
            self.send(message).await?;
        }
        Ok(outgoing.len())
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<(), EnvError> {
        let payload = encode(message).map_err(EnvError::serialization)?;
        self.sequence += 1;
        let envelope = PacketEnvelope::new(payload, self.context.now_millis()).with_sequence(self.sequence);
        self.network.send(self.authority, envelope).await
    }
}

/// The authority bound to its environment.
pub struct AuthorityRuntime<Ctx, Net>
where
    Ctx: GameContext,
    Net: Transport,
{
    context: Arc<Ctx>,
    network: Arc<Net>,
    authority: Authority,
    entities: BTreeMap<NodeId, EntityId>,
    nodes: BTreeMap<EntityId, NodeId>,
    sequence: u64,
    send_failures: u64,
}

impl<Ctx, Net> AuthorityRuntime<Ctx, Net>
where
    Ctx: GameContext,
    Net: Transport,
{
    pub fn new(context: Arc<Ctx>, network: Arc<Net>, authority: Authority) -> Self {
        Self {
            context,
            network,
            authority,
            entities: BTreeMap::new(),
            nodes: BTreeMap::new(),
            sequence: 0,
            send_failures: 0,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.network.local_id()
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn authority_mut(&mut self) -> &mut Authority {
        &mut self.authority
    }

    pub fn entity_of(&self, node: &NodeId) -> Option<EntityId> {
        self.entities.get(node).copied()
    }

    /// Packets that could not be handed to the transport.
    pub fn send_failures(&self) -> u64 {
        self.send_failures
    }

    /// Registers a node under the entity id derived from its private token.
    pub async fn admit(&mut self, node: NodeId, token: &Uuid) -> (EntityId, TrajectoryState) {
        let id = EntityId::from_token(token);
        self.entities.insert(node, id);
        self.nodes.insert(id, node);
        let state = self.authority.join(id, self.context.now_millis());
        self.flush().await;
        (id, state)
    }

    pub async fn remove(&mut self, node: &NodeId) {
        if let Some(id) = self.entities.remove(node) {
            self.nodes.remove(&id);
            self.authority.leave(id);
            self.flush().await;
        }
    }

    /// Handles every waiting packet, advances the world and ships replies.
    pub async fn step(&mut self) -> usize {
        let mut handled = 0;
        while let Some((from, envelope)) = self.network.try_recv() {
            let Some(id) = self.entities.get(&from).copied() else {
                debug!("Authority ignoring packet from unknown node {}", from);
                continue;
            };
            match decode::<ClientMessage>(&envelope.payload) {
                Ok(message) => {
                    self.authority.handle(id, message, self.context.now_millis());
                    handled += 1;
                }
                Err(e) => warn!("Authority dropped undecodable packet from {}: {}", from, e),
            }
        }
        self.authority.tick(self.context.now_millis());
        self.flush().await;
        handled
    }

    /// Ships queued outbound messages. Send failures are counted, not fatal.
    pub async fn flush(&mut self) -> usize {
        let mut sent = 0;
        for outbound in self.authority.take_outbound() {
            let payload = match encode(&outbound.message) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Could not encode {}: {}", outbound.message.kind(), e);
                    continue;
                }
            };
            let targets: Vec<NodeId> = match outbound.to {
                Recipient::All => self.nodes.values().copied().collect(),
                Recipient::Only(id) => self.nodes.get(&id).copied().into_iter().collect(),
            };
            for target in targets {
                self.sequence += 1;
                let envelope =
                    PacketEnvelope::new(payload.clone(), self.context.now_millis()).with_sequence(self.sequence);
                match self.network.send(target, envelope).await {
                    Ok(()) => sent += 1,
                    Err(e) => {
                        self.send_failures += 1;
                        debug!("Send to {} failed: {}", target, e);
                    }
                }
            }
        }
        sent
    }
}
