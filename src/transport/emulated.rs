use crate::membership::NodeAddress;
use crate::transport::Transport;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct NetworkStats {
    pub sent: u64,
    pub dropped: u64,
    pub delivered: u64,
}

/// EmulatedNetwork is an in-process network shared by every node in a simulation. Each address
/// has a FIFO inbox. Cloning gives another handle to the same network.
#[derive(Clone)]
pub struct EmulatedNetwork {
    state: Arc<Mutex<NetworkState>>,
}

struct NetworkState {
    inboxes: HashMap<NodeAddress, VecDeque<Bytes>>,
    disconnected: HashSet<NodeAddress>,
    drop_probability: f64,
    rng: StdRng,
    stats: NetworkStats,
}

impl EmulatedNetwork {
    /// A network that delivers everything.
    pub fn new() -> Self {
        Self::lossy(0.0, 0)
    }

    /// A network that drops each message independently with `drop_probability`.
    pub fn lossy(drop_probability: f64, seed: u64) -> Self {
        EmulatedNetwork {
            state: Arc::new(Mutex::new(NetworkState {
                inboxes: HashMap::new(),
                disconnected: HashSet::new(),
                drop_probability: drop_probability.max(0.0).min(1.0),
                rng: StdRng::seed_from_u64(seed),
                stats: NetworkStats::default(),
            })),
        }
    }

    /// Cut `address` off: everything sent to or from it is dropped, and anything already queued
    /// for it is discarded.
    pub fn disconnect(&self, address: NodeAddress) {
        let mut state = self.lock();
        state.disconnected.insert(address);
        if let Some(inbox) = state.inboxes.remove(&address) {
            state.stats.dropped += inbox.len() as u64;
        }
    }

    pub fn set_drop_probability(&self, drop_probability: f64) {
        self.lock().drop_probability = drop_probability.max(0.0).min(1.0);
    }

    pub fn reconnect(&self, address: NodeAddress) {
        self.lock().disconnected.remove(&address);
    }

    pub fn stats(&self) -> NetworkStats {
        self.lock().stats
    }

    /// Number of messages queued for `address`.
    pub fn pending_for(&self, address: NodeAddress) -> usize {
        self.lock().inboxes.get(&address).map_or(0, VecDeque::len)
    }

    // A panic while holding the lock can't leave the state half-updated, so poison is ignored.
    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EmulatedNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for EmulatedNetwork {
    fn send(&self, from: NodeAddress, to: NodeAddress, payload: Bytes) {
        let mut state = self.lock();
        state.stats.sent += 1;

        if state.disconnected.contains(&from) || state.disconnected.contains(&to) {
            state.stats.dropped += 1;
            return;
        }
        let drop_probability = state.drop_probability;
        if drop_probability > 0.0 && state.rng.gen_bool(drop_probability) {
            state.stats.dropped += 1;
            return;
        }

        state.inboxes.entry(to).or_default().push_back(payload);
    }

    fn receive(&self, me: NodeAddress) -> Vec<Bytes> {
        let mut state = self.lock();
        if state.disconnected.contains(&me) {
            return Vec::new();
        }

        let messages: Vec<Bytes> = match state.inboxes.get_mut(&me) {
            Some(inbox) => inbox.drain(..).collect(),
            None => Vec::new(),
        };
        state.stats.delivered += messages.len() as u64;
        messages
    }
}
