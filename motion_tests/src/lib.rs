//! Loopback harness.
//!
//! Wires one [`ServerAuthority`] and any number of [`ClientPredictor`]s
//! through simulated links, all driven by one explicit clock. Messages are
//! encoded to bytes on send and decoded on delivery, exactly as a transport
//! would carry them.
//!
//! Inputs travel on a reliable, ordered link. States travel on a lossy one:
//! each state is a full snapshot, so a dropped one is superseded by the next.

use std::collections::VecDeque;

use anyhow::Context;
use bytes::Bytes;
use motion_client::{
    input::{InputSampler, InputState},
    ClientPredictor,
};
use motion_server::ServerAuthority;
use motion_shared::{
    config::MotionConfig,
    ecs::{EntityId, TransformSink, World},
    event::EventBus,
    math::{Quat, Vec3, Vec3i},
    net::{decode_from_bytes, encode_to_bytes, ClientId, NetMsg},
    physics::voxel::{Block, VoxelWorld},
    state::PhysicalState,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info, warn};

/// Delay and loss on one direction of a link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkConfig {
    pub latency_ms: i64,
    /// Extra random delay in `0..=jitter_ms`. Delivery stays in order.
    pub jitter_ms: i64,
    /// Probability that a message is dropped, `0.0..=1.0`.
    pub loss: f64,
}

impl LinkConfig {
    pub const fn perfect() -> Self {
        Self {
            latency_ms: 0,
            jitter_ms: 0,
            loss: 0.0,
        }
    }

    pub const fn delayed(latency_ms: i64) -> Self {
        Self {
            latency_ms,
            jitter_ms: 0,
            loss: 0.0,
        }
    }
}

/// One direction of a simulated connection.
#[derive(Debug)]
pub struct Link {
    config: LinkConfig,
    rng: StdRng,
    in_flight: VecDeque<(i64, Bytes)>,
    sent: u64,
    dropped: u64,
}

impl Link {
    pub fn new(config: LinkConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            in_flight: VecDeque::new(),
            sent: 0,
            dropped: 0,
        }
    }

    pub fn send(&mut self, now: i64, msg: &NetMsg) -> anyhow::Result<()> {
        let payload = encode_to_bytes(msg)?;
        self.sent += 1;
        if self.config.loss > 0.0 && self.rng.gen_bool(self.config.loss.min(1.0)) {
            self.dropped += 1;
            return Ok(());
        }
        let jitter = if self.config.jitter_ms > 0 {
            self.rng.gen_range(0..=self.config.jitter_ms)
        } else {
            0
        };
        // Never overtake what is already in flight.
        let floor = self.in_flight.back().map_or(i64::MIN, |(at, _)| *at);
        let deliver_at = (now + self.config.latency_ms + jitter).max(floor);
        self.in_flight.push_back((deliver_at, payload));
        Ok(())
    }

    /// Everything due by `now`, in send order.
    pub fn deliver(&mut self, now: i64) -> anyhow::Result<Vec<NetMsg>> {
        let mut out = Vec::new();
        while self.in_flight.front().is_some_and(|(at, _)| *at <= now) {
            if let Some((_, payload)) = self.in_flight.pop_front() {
                out.push(decode_from_bytes(&payload).context("link payload")?);
            }
        }
        Ok(out)
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Scenario settings.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    pub motion: MotionConfig,
    pub tick_ms: u32,
    pub uplink: LinkConfig,
    pub downlink: LinkConfig,
    pub seed: u64,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            motion: MotionConfig::default(),
            tick_ms: 16,
            uplink: LinkConfig::delayed(40),
            downlink: LinkConfig {
                latency_ms: 40,
                jitter_ms: 10,
                loss: 0.1,
            },
            seed: 7,
        }
    }
}

/// A connected client and its view of the world.
pub struct LoopbackClient {
    pub id: ClientId,
    pub entity: EntityId,
    pub predictor: ClientPredictor,
    pub world: World,
    pub events: EventBus,
    sampler: InputSampler,
    uplink: Link,
    downlink: Link,
    /// Whether this client sends input at all.
    pub connected: bool,
    /// Duration stamped on each input instead of the real tick length.
    pub claimed_delta_ms: Option<u32>,
}

impl LoopbackClient {
    pub fn predicted(&self) -> anyhow::Result<PhysicalState> {
        Ok(*self.predictor.predicted()?)
    }

    pub fn pose_of(&self, entity: EntityId) -> Option<Vec3> {
        self.world.read_pose(entity).map(|(p, _)| p)
    }

    pub fn uplink(&self) -> &Link {
        &self.uplink
    }

    pub fn downlink(&self) -> &Link {
        &self.downlink
    }
}

pub struct Loopback {
    pub now: i64,
    pub config: LoopbackConfig,
    pub voxels: VoxelWorld,
    pub server: ServerAuthority,
    pub server_world: World,
    pub server_events: EventBus,
    pub clients: Vec<LoopbackClient>,
    next_seed: u64,
}

/// Flat ground around the origin, top face at y = 0.5.
pub fn arena() -> VoxelWorld {
    let mut voxels = VoxelWorld::new();
    voxels.fill(Vec3i::new(-64, 0, -64), Vec3i::new(64, 0, 64), Block::Solid);
    voxels
}

impl Loopback {
    pub fn new(config: LoopbackConfig, voxels: VoxelWorld) -> Self {
        let server = ServerAuthority::new(config.motion.clone());
        let next_seed = config.seed;
        Self {
            now: 0,
            config,
            voxels,
            server,
            server_world: World::default(),
            server_events: EventBus::default(),
            clients: Vec::new(),
            next_seed,
        }
    }

    fn seed(&mut self) -> u64 {
        self.next_seed = self.next_seed.wrapping_add(1);
        self.next_seed
    }

    /// Spawns a player character at `position` and connects a client to it.
    /// Returns the client's index.
    pub fn connect(&mut self, position: Vec3) -> anyhow::Result<usize> {
        let id = ClientId(self.clients.len() as u32 + 1);
        let entity = self.server_world.spawn();
        self.server_world.push_pose(entity, position, Quat::IDENTITY);
        self.server
            .add_character(entity, Some(id), self.config.motion.character, self.now, &self.server_world)
            .context("add character")?;
        self.server.mark_collider_ready(entity)?;

        let mut world = World::default();
        world.push_pose(entity, position, Quat::IDENTITY);
        let mut predictor = ClientPredictor::new(&self.config.motion);
        predictor.activate(entity, self.now, &world)?;

        let uplink = Link::new(self.config.uplink, self.seed());
        let downlink = Link::new(self.config.downlink, self.seed());
        self.clients.push(LoopbackClient {
            id,
            entity,
            predictor,
            world,
            events: EventBus::default(),
            sampler: InputSampler::new(),
            uplink,
            downlink,
            connected: true,
            claimed_delta_ms: None,
        });
        info!(client = ?id, entity = ?entity, "client connected");
        Ok(self.clients.len() - 1)
    }

    /// Advances the clock one tick. `inputs[i]` drives client `i`; missing
    /// entries mean idle.
    pub fn tick(&mut self, inputs: &[InputState]) -> anyhow::Result<()> {
        let tick_ms = self.config.tick_ms;
        self.now += i64::from(tick_ms);
        let now = self.now;

        for (i, client) in self.clients.iter_mut().enumerate() {
            if !client.connected {
                continue;
            }
            let input = inputs.get(i).copied().unwrap_or_default();
            let delta = client.claimed_delta_ms.unwrap_or(tick_ms);
            let sample = client.sampler.sample(input, delta);
            client
                .predictor
                .on_local_input(sample.clone(), &self.voxels, &mut client.world, &mut client.events)?;
            client.uplink.send(
                now,
                &NetMsg::Input {
                    entity: client.entity,
                    sample,
                },
            )?;
        }

        for client in &mut self.clients {
            for msg in client.uplink.deliver(now)? {
                match msg {
                    NetMsg::Input { entity, sample } if entity == client.entity => {
                        if let Err(err) = self.server.on_client_input(
                            entity,
                            sample,
                            now,
                            &self.voxels,
                            &mut self.server_world,
                            &mut self.server_events,
                        ) {
                            debug!(client = ?client.id, error = %err, "input refused");
                        }
                    }
                    other => warn!(client = ?client.id, msg = ?other, "unexpected message from client"),
                }
            }
        }

        let replications = self
            .server
            .update(now, &self.voxels, &mut self.server_world, &mut self.server_events);
        for rep in &replications {
            let msg = NetMsg::State {
                entity: rep.entity,
                state: rep.state,
            };
            for client in &mut self.clients {
                if rep.skip_owner && rep.owner == Some(client.id) {
                    continue;
                }
                client.downlink.send(now, &msg)?;
            }
        }

        for client in &mut self.clients {
            for msg in client.downlink.deliver(now)? {
                match msg {
                    NetMsg::State { entity, state } if entity == client.entity => {
                        client
                            .predictor
                            .on_authoritative_state(state, &self.voxels, &mut client.world)?;
                    }
                    NetMsg::State { entity, state } => {
                        if let Err(err) = client.predictor.on_remote_authoritative_state(entity, state) {
                            debug!(client = ?client.id, error = %err, "remote state refused");
                        }
                    }
                    other => warn!(client = ?client.id, msg = ?other, "unexpected message from server"),
                }
            }
            client.predictor.render_remote(now, &mut client.world);
        }

        self.server.render(now, None, &mut self.server_world);
        Ok(())
    }

    /// Runs `ticks` ticks with the same inputs every tick.
    pub fn run(&mut self, ticks: usize, inputs: &[InputState]) -> anyhow::Result<()> {
        for _ in 0..ticks {
            self.tick(inputs)?;
        }
        Ok(())
    }

    pub fn client(&self, index: usize) -> anyhow::Result<&LoopbackClient> {
        self.clients.get(index).context("no such client")
    }

    /// Distance between a client's prediction and the server's last state.
    pub fn divergence(&self, index: usize) -> anyhow::Result<f32> {
        let client = self.client(index)?;
        let server = self.server.last_state(client.entity)?;
        Ok((client.predicted()?.position - server.position).len())
    }
}
