use crate::api::{EventPublisher, NodeEvent, OperationEvent, Perspective};
use crate::clock::Timestamp;
use crate::kvstore::local_store::{LocalStore, StoreError, StoredEntry};
use crate::kvstore::stabilization::{self, PendingPushes};
use crate::kvstore::transactions::{majority, Decision, OperationKind, Transaction, TransactionId, TransactionTable};
use crate::membership::NodeAddress;
use crate::ring::{HashRing, InsufficientReplicas, ReplicaRole, REPLICATION_FACTOR};
use crate::wire::{KeyRequest, KeyValueRequest, Message, Outbox, ReadReply, ReplicateAck, ReplicatePush, Reply};

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ClientOpError {
    #[error(transparent)]
    InsufficientReplicas(#[from] InsufficientReplicas),
    #[error("Key {0:?} already exists")]
    KeyConflict(String),
    #[error("Key {0:?} not found")]
    KeyNotFound(String),
    #[error("Replicas didn't reach quorum before the transaction timed out")]
    QuorumTimeout,
    #[error("Replicas disagree on the value of key {0:?}")]
    QuorumFailed(String),
    #[error("Node has failed")]
    NodeFailed,
    #[error("Node actor has exited")]
    ActorExited,
}

/// How many replicas a read consults.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReadPolicy {
    /// Ask the PRIMARY only. One reply decides.
    Primary,
    /// Ask all replicas. Two matching values decide.
    Quorum,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        ReadPolicy::Primary
    }
}

/// The decided result of one client operation, as seen by its coordinator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OperationOutcome {
    pub transaction_id: TransactionId,
    pub kind: OperationKind,
    pub key: String,
    /// Reads carry the value. Mutations carry None.
    pub result: Result<Option<String>, ClientOpError>,
}

pub(crate) struct ReplicatedStoreConfig {
    pub(crate) logger: slog::Logger,
    pub(crate) self_address: NodeAddress,
    pub(crate) transaction_timeout: i64,
    pub(crate) read_policy: ReadPolicy,
    pub(crate) replicate_retry_interval: i64,
    pub(crate) events: EventPublisher,
}

/// ReplicatedStore plays both sides of every key-value operation: coordinator (routing client
/// requests to replicas and aggregating their replies) and replica (applying requests to the
/// local store).
pub(crate) struct ReplicatedStore<S: LocalStore> {
    logger: slog::Logger,
    self_address: NodeAddress,
    local: S,
    transactions: TransactionTable,
    transaction_timeout: i64,
    read_policy: ReadPolicy,
    pushes: PendingPushes,
    replicate_retry_interval: i64,
    events: EventPublisher,
    completed: Vec<OperationOutcome>,
}

impl<S: LocalStore> ReplicatedStore<S> {
    pub(crate) fn new(config: ReplicatedStoreConfig, local: S) -> Self {
        ReplicatedStore {
            logger: config.logger,
            self_address: config.self_address,
            local,
            transactions: TransactionTable::new(),
            transaction_timeout: config.transaction_timeout,
            read_policy: config.read_policy,
            pushes: PendingPushes::new(),
            replicate_retry_interval: config.replicate_retry_interval,
            events: config.events,
            completed: Vec::new(),
        }
    }

    pub(crate) fn local(&self) -> &S {
        &self.local
    }

    pub(crate) fn pending_transactions(&self) -> usize {
        self.transactions.len()
    }

    /// Stabilization pushes not yet acknowledged by their holder.
    pub(crate) fn pending_replications(&self) -> usize {
        self.pushes.len()
    }

    pub(crate) fn take_outcomes(&mut self) -> Vec<OperationOutcome> {
        std::mem::take(&mut self.completed)
    }

    // ------- Coordinator side --------

    pub(crate) fn client_create(
        &mut self,
        ring: &HashRing,
        key: String,
        value: String,
        now: Timestamp,
        outbox: &mut Outbox,
    ) -> Result<TransactionId, ClientOpError> {
        self.start_mutation(OperationKind::Create, ring, key, Some(value), now, outbox)
    }

    pub(crate) fn client_update(
        &mut self,
        ring: &HashRing,
        key: String,
        value: String,
        now: Timestamp,
        outbox: &mut Outbox,
    ) -> Result<TransactionId, ClientOpError> {
        self.start_mutation(OperationKind::Update, ring, key, Some(value), now, outbox)
    }

    pub(crate) fn client_delete(
        &mut self,
        ring: &HashRing,
        key: String,
        now: Timestamp,
        outbox: &mut Outbox,
    ) -> Result<TransactionId, ClientOpError> {
        self.start_mutation(OperationKind::Delete, ring, key, None, now, outbox)
    }

    pub(crate) fn client_read(
        &mut self,
        ring: &HashRing,
        key: String,
        now: Timestamp,
        outbox: &mut Outbox,
    ) -> Result<TransactionId, ClientOpError> {
        let replicas = ring.replicas_for(&key)?;
        let targets: Vec<NodeAddress> = match self.read_policy {
            ReadPolicy::Primary => vec![replicas.primary()],
            ReadPolicy::Quorum => replicas.addresses().to_vec(),
        };

        let id = self.transactions.next_id();
        for target in &targets {
            outbox.push(
                *target,
                Message::Read(KeyRequest {
                    transaction_id: id,
                    source: self.self_address,
                    key: key.clone(),
                    timestamp: now,
                }),
            );
        }

        slog::debug!(self.logger, "Started {:?}: read {:?} from {:?}", id, key, targets);
        self.transactions.insert(Transaction::new(
            id,
            OperationKind::Read,
            key,
            None,
            targets.len(),
            majority(targets.len()),
            now,
        ));
        Ok(id)
    }

    fn start_mutation(
        &mut self,
        kind: OperationKind,
        ring: &HashRing,
        key: String,
        value: Option<String>,
        now: Timestamp,
        outbox: &mut Outbox,
    ) -> Result<TransactionId, ClientOpError> {
        let replicas = ring.replicas_for(&key)?;
        let id = self.transactions.next_id();

        for (role, target) in replicas.with_roles() {
            let message = match (kind, &value) {
                (OperationKind::Create, Some(value)) => {
                    Message::Create(self.key_value_request(id, &key, value, role, now))
                }
                (OperationKind::Update, Some(value)) => {
                    Message::Update(self.key_value_request(id, &key, value, role, now))
                }
                _ => Message::Delete(KeyRequest {
                    transaction_id: id,
                    source: self.self_address,
                    key: key.clone(),
                    timestamp: now,
                }),
            };
            outbox.push(target, message);
        }

        slog::debug!(
            self.logger,
            "Started {:?}: {} {:?} on {:?}",
            id,
            kind,
            key,
            replicas.addresses()
        );
        self.transactions.insert(Transaction::new(
            id,
            kind,
            key,
            value,
            REPLICATION_FACTOR,
            majority(REPLICATION_FACTOR),
            now,
        ));
        Ok(id)
    }

    fn key_value_request(
        &self,
        id: TransactionId,
        key: &str,
        value: &str,
        role: ReplicaRole,
        now: Timestamp,
    ) -> KeyValueRequest {
        KeyValueRequest {
            transaction_id: id,
            source: self.self_address,
            key: key.to_string(),
            value: value.to_string(),
            role,
            timestamp: now,
        }
    }

    pub(crate) fn handle_reply(&mut self, reply: Reply) {
        self.record_reply(reply.transaction_id, reply.source, reply.success, None);
    }

    pub(crate) fn handle_read_reply(&mut self, reply: ReadReply) {
        let success = reply.value.is_some();
        self.record_reply(reply.transaction_id, reply.source, success, reply.value);
    }

    fn record_reply(&mut self, id: TransactionId, from: NodeAddress, success: bool, value: Option<String>) {
        let txn = match self.transactions.get_mut(id) {
            Some(txn) => txn,
            None => {
                // Already decided or timed out.
                slog::trace!(self.logger, "Discarding reply from {} for unknown {:?}", from, id);
                return;
            }
        };

        if !txn.record_reply(from, success, value) {
            slog::debug!(self.logger, "Duplicate reply from {} for {:?}", from, id);
            return;
        }
        slog::debug!(self.logger, "Reply from {} for {:?}: success={}", from, id, success);

        let result = match txn.decide() {
            Decision::Pending => return,
            Decision::Succeeded(value) => Ok(value),
            Decision::Failed(e) => Err(e),
        };
        if let Some(txn) = self.transactions.remove(id) {
            self.complete(txn, result);
        }
    }

    /// Fail every transaction that outlived `transaction_timeout`.
    pub(crate) fn expire_transactions(&mut self, now: Timestamp) {
        for txn in self.transactions.remove_expired(now, self.transaction_timeout) {
            self.complete(txn, Err(ClientOpError::QuorumTimeout));
        }
    }

    /// Fail everything still in flight. Used when the node is marked failed.
    pub(crate) fn abandon_transactions(&mut self) {
        for txn in self.transactions.remove_all() {
            self.complete(txn, Err(ClientOpError::NodeFailed));
        }
    }

    fn complete(&mut self, txn: Transaction, result: Result<Option<String>, ClientOpError>) {
        match &result {
            Ok(_) => slog::info!(
                self.logger,
                "Coordinator: {} {:?} succeeded ({:?})",
                txn.kind(),
                txn.key(),
                txn.id()
            ),
            Err(e) => slog::info!(
                self.logger,
                "Coordinator: {} {:?} failed ({:?}): {}",
                txn.kind(),
                txn.key(),
                txn.id(),
                e
            ),
        }

        let value = match (&result, txn.kind()) {
            (Ok(Some(read)), OperationKind::Read) => Some(read.clone()),
            _ => txn.value().map(str::to_string),
        };
        self.events.publish(NodeEvent::Operation(OperationEvent {
            observer: self.self_address,
            perspective: Perspective::Coordinator,
            kind: txn.kind(),
            transaction_id: txn.id(),
            key: txn.key().to_string(),
            value,
            success: result.is_ok(),
        }));

        self.completed.push(OperationOutcome {
            transaction_id: txn.id(),
            kind: txn.kind(),
            key: txn.key().to_string(),
            result,
        });
    }

    // ------- Replica side --------

    pub(crate) fn handle_create(&mut self, request: KeyValueRequest, outbox: &mut Outbox) {
        let success = self.create_key_value(&request.key, &request.value, request.role, request.timestamp);
        self.log_replica_outcome(OperationKind::Create, &request.key, Some(request.value.as_str()), request.transaction_id, success);
        self.reply(request.source, request.transaction_id, success, outbox);
    }

    pub(crate) fn handle_update(&mut self, request: KeyValueRequest, outbox: &mut Outbox) {
        let success = self.update_key_value(&request.key, &request.value, request.role, request.timestamp);
        self.log_replica_outcome(OperationKind::Update, &request.key, Some(request.value.as_str()), request.transaction_id, success);
        self.reply(request.source, request.transaction_id, success, outbox);
    }

    pub(crate) fn handle_delete(&mut self, request: KeyRequest, outbox: &mut Outbox) {
        let success = self.delete_key(&request.key, request.timestamp);
        self.log_replica_outcome(OperationKind::Delete, &request.key, None, request.transaction_id, success);
        self.reply(request.source, request.transaction_id, success, outbox);
    }

    pub(crate) fn handle_read(&mut self, request: KeyRequest, outbox: &mut Outbox) {
        let value = self.read_key(&request.key);
        self.log_replica_outcome(
            OperationKind::Read,
            &request.key,
            value.as_deref(),
            request.transaction_id,
            value.is_some(),
        );
        outbox.push(
            request.source,
            Message::ReadReply(ReadReply {
                transaction_id: request.transaction_id,
                source: self.self_address,
                value,
            }),
        );
    }

    /// Store a pushed copy if it is newer than ours, then acknowledge with the stamp we now hold.
    pub(crate) fn handle_replicate(&mut self, push: ReplicatePush, outbox: &mut Outbox) {
        if stabilization::apply_replica_push(&mut self.local, &push) {
            slog::debug!(self.logger, "Stored {:?} pushed by {} as {}", push.key, push.source, push.role);
        }

        let held = self
            .local
            .get(&push.key)
            .map_or(push.write_timestamp, |entry| entry.write_timestamp);
        outbox.push(
            push.source,
            Message::ReplicateAck(ReplicateAck {
                source: self.self_address,
                key: push.key,
                write_timestamp: held,
            }),
        );
    }

    /// Returns false if the key already exists.
    pub(crate) fn create_key_value(&mut self, key: &str, value: &str, role: ReplicaRole, issued_at: Timestamp) -> bool {
        let entry = StoredEntry::new(value.to_string(), self.write_stamp(key, issued_at), role);
        let result = self.local.create(key.to_string(), entry);
        self.log_store_result(result)
    }

    pub(crate) fn read_key(&self, key: &str) -> Option<String> {
        self.local.read(key).ok().and_then(|entry| entry.value.clone())
    }

    /// Returns false if the key doesn't exist.
    pub(crate) fn update_key_value(&mut self, key: &str, value: &str, role: ReplicaRole, issued_at: Timestamp) -> bool {
        let entry = StoredEntry::new(value.to_string(), self.write_stamp(key, issued_at), role);
        let result = self.local.update(key, entry);
        self.log_store_result(result)
    }

    /// Returns false if the key doesn't exist. Leaves a delete marker behind.
    pub(crate) fn delete_key(&mut self, key: &str, issued_at: Timestamp) -> bool {
        let stamp = self.write_stamp(key, issued_at);
        let result = self.local.delete(key, stamp).map(|_| ());
        self.log_store_result(result)
    }

    // Writes are stamped with the coordinator's clock. Stamps of one key never go backwards on a
    // replica, even when coordinators' clocks disagree.
    fn write_stamp(&self, key: &str, issued_at: Timestamp) -> Timestamp {
        match self.local.get(key) {
            Some(existing) if existing.write_timestamp >= issued_at => existing.write_timestamp.plus(1),
            _ => issued_at,
        }
    }

    fn log_store_result(&self, result: Result<(), StoreError>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                slog::debug!(self.logger, "Local store refused request: {}", e);
                false
            }
        }
    }

    fn reply(&self, to: NodeAddress, transaction_id: TransactionId, success: bool, outbox: &mut Outbox) {
        outbox.push(
            to,
            Message::Reply(Reply {
                transaction_id,
                source: self.self_address,
                success,
            }),
        );
    }

    fn log_replica_outcome(
        &self,
        kind: OperationKind,
        key: &str,
        value: Option<&str>,
        transaction_id: TransactionId,
        success: bool,
    ) {
        slog::info!(
            self.logger,
            "Replica: {} {:?} {} ({:?})",
            kind,
            key,
            if success { "succeeded" } else { "failed" },
            transaction_id
        );
        self.events.publish(NodeEvent::Operation(OperationEvent {
            observer: self.self_address,
            perspective: Perspective::Replica,
            kind,
            transaction_id,
            key: key.to_string(),
            value: value.map(str::to_string),
            success,
        }));
    }

    // ------- Ring changes --------

    pub(crate) fn stabilize(&mut self, old_ring: &HashRing, new_ring: &HashRing, now: Timestamp, outbox: &mut Outbox) {
        let report = stabilization::stabilize(
            self.self_address,
            &mut self.local,
            old_ring,
            new_ring,
            &mut self.pushes,
            now,
            outbox,
        );
        if report.pushed > 0 || report.roles_refreshed > 0 {
            slog::info!(
                self.logger,
                "Stabilized {} key(s): pushed {} cop(ies), refreshed {} role(s)",
                self.local.len(),
                report.pushed,
                report.roles_refreshed
            );
        }
    }

    pub(crate) fn handle_replicate_ack(&mut self, ack: ReplicateAck) {
        if self.pushes.acknowledge(&self.local, &ack) {
            slog::debug!(self.logger, "{} acknowledged {:?}", ack.source, ack.key);
        }
    }

    /// Re-send stabilization pushes that are still unacknowledged.
    pub(crate) fn retry_pushes(&mut self, now: Timestamp, outbox: &mut Outbox) {
        let resent = self
            .pushes
            .resend_due(self.self_address, &self.local, now, self.replicate_retry_interval, outbox);
        if resent > 0 {
            slog::debug!(
                self.logger,
                "Re-sent {} unacknowledged push(es), {} pending",
                resent,
                self.pushes.len()
            );
        }
    }
}
