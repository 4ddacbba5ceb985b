use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use super::{AgentId, LogicTick, PartitionId, TilePos};

/// A broadcast as seen by a receiver: payload plus who sent it and from where.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub sender: AgentId,
    pub position: TilePos,
    pub payload: Payload,
}

impl Message {
    pub fn new(sender: AgentId, position: TilePos, payload: Payload) -> Self {
        Self {
            sender,
            position,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Stigmergy(StigmergyMessage),
    Bootstrap(BootstrapMessage),
    Heartbeat(Heartbeat),
    TargetClaim(TargetClaim),
    Collision(CollisionReport),
}

impl Payload {
    pub fn kind(&self) -> &str {
        match self {
            Payload::Stigmergy(_) => "stigmergy",
            Payload::Bootstrap(_) => "bootstrap",
            Payload::Heartbeat(_) => "heartbeat",
            Payload::TargetClaim(_) => "target_claim",
            Payload::Collision(_) => "collision",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StigmergyOp {
    Put,
    Get,
}

/// Wire form of a stigmergy entry. Values travel as JSON so every receiver
/// decodes its own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StigmergyMessage {
    pub channel: String,
    pub op: StigmergyOp,
    pub key: String,
    pub value: Option<Value>,
    pub timestamp: u64,
    pub owner: AgentId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BootstrapMessage {
    Announce {
        agent: AgentId,
    },
    Outcome {
        value: Value,
        discovered: BTreeSet<AgentId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub agent: AgentId,
    pub tick: LogicTick,
    pub partition: PartitionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetClaim {
    pub target: TilePos,
    pub distance: f32,
    pub agent: AgentId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollisionReport {
    pub agent: AgentId,
    pub partition: PartitionId,
    pub target: Option<TilePos>,
    pub visited: Vec<(TilePos, LogicTick)>,
}

/// Broadcasts queued by one agent during one tick.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    payloads: Vec<Payload>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broadcast(&mut self, payload: Payload) {
        self.payloads.push(payload);
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Payload> {
        self.payloads.iter()
    }

    pub fn into_payloads(self) -> Vec<Payload> {
        self.payloads
    }
}
