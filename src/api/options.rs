use crate::kvstore::ReadPolicy;
use crate::membership::NodeAddress;
use std::convert::TryFrom;

/// Upper bound on every duration option, in ticks.
pub const MAX_TICKS: i64 = 1 << 40;

/// Tunables for one node. Every field is optional; unset fields take the defaults below. All
/// durations are in logical ticks.
#[derive(Clone, Debug, Default)]
pub struct NodeOptions {
    /// Ticks between membership rounds. Default 1.
    pub round_interval: Option<i64>,
    /// Members silent for longer than this are not gossiped to. Default 5.
    pub suspect_threshold: Option<i64>,
    /// Members silent for longer than this are evicted. Default 20.
    pub fail_remove_threshold: Option<i64>,
    /// Number of slots on the hash ring. Default 512.
    pub ring_size: Option<u64>,
    /// Coordinator gives up on a transaction after this many ticks. Default 10.
    pub transaction_timeout: Option<i64>,
    /// Ticks between re-sends of an unacknowledged REPLICATE push. Default 3.
    pub replicate_retry_interval: Option<i64>,
    /// Gossip targets per round. Default scales with cluster size.
    pub gossip_fanout: Option<usize>,
    pub read_policy: Option<ReadPolicy>,
    /// The introducer. Default 1.0.0.0:0.
    pub join_address: Option<NodeAddress>,
    /// Seed for gossip target selection. Default is derived from the node's address.
    pub rng_seed: Option<u64>,
}

#[derive(Clone, Debug)]
pub(crate) struct NodeOptionsValidated {
    pub round_interval: i64,
    pub suspect_threshold: i64,
    pub fail_remove_threshold: i64,
    pub ring_size: u64,
    pub transaction_timeout: i64,
    pub replicate_retry_interval: i64,
    pub gossip_fanout: Option<usize>,
    pub read_policy: ReadPolicy,
    pub join_address: NodeAddress,
    pub rng_seed: Option<u64>,
}

impl NodeOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.round_interval <= 0 {
            return Err("Round interval must be positive");
        }
        if self.suspect_threshold <= 0 {
            return Err("Suspect threshold must be positive");
        }
        if self.suspect_threshold >= self.fail_remove_threshold {
            return Err("Suspect threshold must be less than the fail-remove threshold");
        }
        if self.fail_remove_threshold > MAX_TICKS
            || self.transaction_timeout > MAX_TICKS
            || self.round_interval > MAX_TICKS
            || self.replicate_retry_interval > MAX_TICKS
        {
            return Err("Durations must not exceed MAX_TICKS");
        }
        if self.ring_size < 3 {
            return Err("Ring size must leave room for 3 replicas");
        }
        if self.transaction_timeout <= 0 {
            return Err("Transaction timeout must be positive");
        }
        if self.replicate_retry_interval <= 0 {
            return Err("Replicate retry interval must be positive");
        }
        if self.gossip_fanout == Some(0) {
            return Err("Gossip fanout must be at least 1");
        }
        if self.join_address.is_null() {
            return Err("Join address can't be the null address");
        }

        Ok(())
    }
}

impl TryFrom<NodeOptions> for NodeOptionsValidated {
    type Error = &'static str;

    fn try_from(options: NodeOptions) -> Result<Self, Self::Error> {
        let values = NodeOptionsValidated {
            round_interval: options.round_interval.unwrap_or(1),
            suspect_threshold: options.suspect_threshold.unwrap_or(5),
            fail_remove_threshold: options.fail_remove_threshold.unwrap_or(20),
            ring_size: options.ring_size.unwrap_or(512),
            transaction_timeout: options.transaction_timeout.unwrap_or(10),
            replicate_retry_interval: options.replicate_retry_interval.unwrap_or(3),
            gossip_fanout: options.gossip_fanout,
            read_policy: options.read_policy.unwrap_or_default(),
            join_address: options.join_address.unwrap_or_else(|| NodeAddress::new(1, 0)),
            rng_seed: options.rng_seed,
        };

        values.validate()?;
        Ok(values)
    }
}
