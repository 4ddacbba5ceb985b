use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::Transport;
use crate::config::TransportConfig;
use crate::types::{AgentId, Message, TilePos};

type Occlusion = Box<dyn Fn(TilePos, TilePos) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
}

/// Range-limited, lossy broadcast medium shared by all simulated agents.
pub struct InMemoryBroadcast {
    range: f32,
    loss_probability: f64,
    rng: StdRng,
    occlusion: Option<Occlusion>,
    pending: Vec<Message>,
    deliverable: Vec<Message>,
    stats: TransportStats,
}

impl InMemoryBroadcast {
    pub fn new(range: f32, loss_probability: f64, seed: u64) -> Self {
        Self {
            range,
            loss_probability: loss_probability.clamp(0.0, 1.0),
            rng: StdRng::seed_from_u64(seed),
            occlusion: None,
            pending: Vec::new(),
            deliverable: Vec::new(),
            stats: TransportStats::default(),
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.range, config.loss_probability, config.seed)
    }

    /// Lossless and unlimited in range; still one tick of latency.
    pub fn reliable() -> Self {
        Self::new(f32::INFINITY, 0.0, 0)
    }

    /// `blocked(from, to)` returns true when the line between the two tiles is obstructed.
    pub fn with_occlusion(
        mut self,
        blocked: impl Fn(TilePos, TilePos) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.occlusion = Some(Box::new(blocked));
        self
    }

    pub fn stats(&self) -> TransportStats {
        self.stats
    }

    fn reaches(&mut self, message: &Message, position: TilePos) -> bool {
        if message.position.distance_to(&position) > self.range {
            return false;
        }
        if let Some(blocked) = &self.occlusion {
            if blocked(message.position, position) {
                return false;
            }
        }
        !(self.loss_probability > 0.0 && self.rng.random_bool(self.loss_probability))
    }
}

impl Transport for InMemoryBroadcast {
    fn broadcast(&mut self, message: Message) {
        self.stats.sent += 1;
        self.pending.push(message);
    }

    fn receive(&mut self, agent: AgentId, position: TilePos) -> Vec<Message> {
        let candidates: Vec<Message> = self
            .deliverable
            .iter()
            .filter(|m| m.sender != agent)
            .cloned()
            .collect();

        let mut received = Vec::with_capacity(candidates.len());
        for message in candidates {
            if self.reaches(&message, position) {
                self.stats.delivered += 1;
                received.push(message);
            } else {
                self.stats.dropped += 1;
            }
        }
        received
    }

    fn advance(&mut self) {
        self.deliverable = std::mem::take(&mut self.pending);
    }
}
