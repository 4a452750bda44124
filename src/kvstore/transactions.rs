use crate::clock::Timestamp;
use crate::kvstore::replicated_store::ClientOpError;
use crate::membership::NodeAddress;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// TransactionId names one client operation on its coordinator. Every replica message sent for
/// that operation carries the same id, and so does every reply.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct TransactionId(i64);

impl TransactionId {
    pub fn new(id: i64) -> Self {
        TransactionId(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum OperationKind {
    Create,
    Read,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Read => write!(f, "read"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

/// Strict majority of `num_replicas`.
pub(crate) fn majority(num_replicas: usize) -> usize {
    num_replicas / 2 + 1
}

#[derive(Debug, Eq, PartialEq)]
pub(crate) enum Decision {
    Pending,
    Succeeded(Option<String>),
    Failed(ClientOpError),
}

/// Transaction is the coordinator's record of one in-flight client operation.
#[derive(Debug)]
pub(crate) struct Transaction {
    id: TransactionId,
    kind: OperationKind,
    key: String,
    // Value sent with create/update.
    value: Option<String>,
    created_at: Timestamp,
    expected_replies: usize,
    quorum: usize,
    responders: HashSet<NodeAddress>,
    successes: usize,
    // Successful read replies, one per responder.
    read_values: Vec<String>,
}

impl Transaction {
    pub(crate) fn new(
        id: TransactionId,
        kind: OperationKind,
        key: String,
        value: Option<String>,
        expected_replies: usize,
        quorum: usize,
        created_at: Timestamp,
    ) -> Self {
        Transaction {
            id,
            kind,
            key,
            value,
            created_at,
            expected_replies,
            quorum,
            responders: HashSet::with_capacity(expected_replies),
            successes: 0,
            read_values: Vec::new(),
        }
    }

    pub(crate) fn id(&self) -> TransactionId {
        self.id
    }

    pub(crate) fn kind(&self) -> OperationKind {
        self.kind
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Record one replica's answer. `value` is only meaningful for reads.
    ///
    /// CAS: Return true if we successfully mutated state. A second reply from the same replica
    /// is not counted.
    pub(crate) fn record_reply(&mut self, from: NodeAddress, success: bool, value: Option<String>) -> bool {
        if !self.responders.insert(from) {
            return false;
        }

        if success {
            self.successes += 1;
            if let Some(value) = value {
                self.read_values.push(value);
            }
        }
        true
    }

    pub(crate) fn decide(&self) -> Decision {
        match self.kind {
            OperationKind::Read => self.decide_read(),
            _ => self.decide_mutation(),
        }
    }

    fn outstanding(&self) -> usize {
        self.expected_replies.saturating_sub(self.responders.len())
    }

    fn decide_mutation(&self) -> Decision {
        if self.successes >= self.quorum {
            return Decision::Succeeded(None);
        }
        if self.successes + self.outstanding() < self.quorum {
            return Decision::Failed(self.local_failure());
        }

        Decision::Pending
    }

    fn decide_read(&self) -> Decision {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for value in &self.read_values {
            *counts.entry(value.as_str()).or_insert(0) += 1;
        }

        let best = counts.into_iter().max_by_key(|(_, count)| *count);
        if let Some((value, count)) = best {
            if count >= self.quorum {
                return Decision::Succeeded(Some(value.to_string()));
            }
        }

        let best_count = best.map(|(_, count)| count).unwrap_or(0);
        if best_count + self.outstanding() >= self.quorum {
            return Decision::Pending;
        }

        // Can't reach quorum anymore. Tell apart "not enough copies" from "copies disagree".
        if self.read_values.len() + self.outstanding() < self.quorum {
            Decision::Failed(self.local_failure())
        } else {
            Decision::Failed(ClientOpError::QuorumFailed(self.key.clone()))
        }
    }

    // What replicas say when they refuse the request.
    fn local_failure(&self) -> ClientOpError {
        match self.kind {
            OperationKind::Create => ClientOpError::KeyConflict(self.key.clone()),
            _ => ClientOpError::KeyNotFound(self.key.clone()),
        }
    }

    pub(crate) fn is_expired(&self, now: Timestamp, timeout: i64) -> bool {
        now.ticks_since(self.created_at) > timeout
    }
}

/// TransactionTable holds every undecided transaction a coordinator owns.
#[derive(Debug)]
pub(crate) struct TransactionTable {
    last_id: i64,
    in_flight: HashMap<TransactionId, Transaction>,
}

impl TransactionTable {
    pub(crate) fn new() -> Self {
        TransactionTable {
            last_id: 0,
            in_flight: HashMap::new(),
        }
    }

    /// Ids start at 1 and only go up.
    pub(crate) fn next_id(&mut self) -> TransactionId {
        self.last_id += 1;
        TransactionId(self.last_id)
    }

    pub(crate) fn insert(&mut self, transaction: Transaction) {
        self.in_flight.insert(transaction.id, transaction);
    }

    pub(crate) fn get_mut(&mut self, id: TransactionId) -> Option<&mut Transaction> {
        self.in_flight.get_mut(&id)
    }

    pub(crate) fn remove(&mut self, id: TransactionId) -> Option<Transaction> {
        self.in_flight.remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.in_flight.len()
    }

    /// Remove and return every transaction older than `timeout`, oldest id first.
    pub(crate) fn remove_expired(&mut self, now: Timestamp, timeout: i64) -> Vec<Transaction> {
        let mut expired_ids: Vec<TransactionId> = self
            .in_flight
            .values()
            .filter(|txn| txn.is_expired(now, timeout))
            .map(|txn| txn.id)
            .collect();
        expired_ids.sort();

        expired_ids
            .into_iter()
            .filter_map(|id| self.in_flight.remove(&id))
            .collect()
    }

    /// Remove and return everything, oldest id first.
    pub(crate) fn remove_all(&mut self) -> Vec<Transaction> {
        let mut all: Vec<Transaction> = self.in_flight.drain().map(|(_, txn)| txn).collect();
        all.sort_by_key(|txn| txn.id);
        all
    }
}
