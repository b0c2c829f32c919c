//! Real-Time Notifier
//!
//! Maps live WebSocket connections to user identities and stream
//! subscriptions, and fans state-change events out per user or per stream.
//! Delivery is best-effort: a send into a closed channel prunes the
//! connection and is logged, never propagated.
//!
//! The handle is constructed once at startup and passed explicitly to
//! anything that broadcasts; there is no global singleton.

use crate::models::Currency;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Events pushed to connected clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsEvent {
    RoundOpened {
        round_id: String,
        stream_id: String,
        name: String,
    },
    RoundLocked {
        round_id: String,
        stream_id: String,
    },
    RoundSettled {
        round_id: String,
        stream_id: String,
        winning_variable_id: String,
    },
    RoundCancelled {
        round_id: String,
        stream_id: String,
    },
    BalanceUpdated {
        user_id: String,
        currency: Currency,
        balance: f64,
    },
    BetResult {
        user_id: String,
        round_id: String,
        result: String, // "won" | "lost" | "void"
        currency: Currency,
        amount: f64,
    },
    ViewerCount {
        stream_id: String,
        count: usize,
    },
}

pub type ConnId = u64;

struct ConnEntry {
    user_id: String,
    stream_id: String,
    tx: mpsc::UnboundedSender<WsEvent>,
}

#[derive(Default)]
struct Registry {
    conns: HashMap<ConnId, ConnEntry>,
    by_user: HashMap<String, HashSet<ConnId>>,
    by_stream: HashMap<String, HashSet<ConnId>>,
}

impl Registry {
    fn remove(&mut self, conn_id: ConnId) -> Option<ConnEntry> {
        let entry = self.conns.remove(&conn_id)?;
        if let Some(set) = self.by_user.get_mut(&entry.user_id) {
            set.remove(&conn_id);
            if set.is_empty() {
                self.by_user.remove(&entry.user_id);
            }
        }
        if let Some(set) = self.by_stream.get_mut(&entry.stream_id) {
            set.remove(&conn_id);
            if set.is_empty() {
                self.by_stream.remove(&entry.stream_id);
            }
        }
        Some(entry)
    }
}

#[derive(Clone)]
pub struct Notifier {
    registry: Arc<RwLock<Registry>>,
    next_id: Arc<AtomicU64>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a live connection. The returned id must be passed back to
    /// [`unregister`](Self::unregister) when the socket closes.
    pub fn register(
        &self,
        user_id: &str,
        stream_id: &str,
        tx: mpsc::UnboundedSender<WsEvent>,
    ) -> ConnId {
        let conn_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut reg = self.registry.write();
        reg.conns.insert(
            conn_id,
            ConnEntry {
                user_id: user_id.to_string(),
                stream_id: stream_id.to_string(),
                tx,
            },
        );
        reg.by_user
            .entry(user_id.to_string())
            .or_default()
            .insert(conn_id);
        reg.by_stream
            .entry(stream_id.to_string())
            .or_default()
            .insert(conn_id);
        debug!(conn_id, user_id, stream_id, "🔌 Connection registered");
        conn_id
    }

    pub fn unregister(&self, conn_id: ConnId) {
        if self.registry.write().remove(conn_id).is_some() {
            debug!(conn_id, "Connection removed");
        }
    }

    /// Deliver an event to every active connection of one user. Returns how
    /// many connections received it; dead senders are pruned.
    pub fn send_to_user(&self, user_id: &str, event: &WsEvent) -> usize {
        let targets: Vec<ConnId> = {
            let reg = self.registry.read();
            reg.by_user
                .get(user_id)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default()
        };
        self.deliver(&targets, event)
    }

    /// Deliver an event to every viewer of a stream.
    pub fn broadcast_to_stream(&self, stream_id: &str, event: &WsEvent) -> usize {
        let targets: Vec<ConnId> = {
            let reg = self.registry.read();
            reg.by_stream
                .get(stream_id)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default()
        };
        self.deliver(&targets, event)
    }

    /// Force-close every connection of a user (policy enforcement). Dropping
    /// the senders ends the per-socket forward tasks, which closes the
    /// sockets. Returns the number of connections dropped.
    pub fn disconnect_user(&self, user_id: &str) -> usize {
        let mut reg = self.registry.write();
        let targets: Vec<ConnId> = reg
            .by_user
            .get(user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for conn_id in &targets {
            reg.remove(*conn_id);
        }
        if !targets.is_empty() {
            info!(user_id, dropped = targets.len(), "⛔ User connections force-closed");
        }
        targets.len()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.read().conns.len()
    }

    fn deliver(&self, targets: &[ConnId], event: &WsEvent) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let reg = self.registry.read();
            for conn_id in targets {
                if let Some(entry) = reg.conns.get(conn_id) {
                    if entry.tx.send(event.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        dead.push(*conn_id);
                    }
                }
            }
        }
        if !dead.is_empty() {
            let mut reg = self.registry.write();
            for conn_id in dead {
                reg.remove(conn_id);
                debug!(conn_id, "Pruned dead connection");
            }
        }
        delivered
    }
}
