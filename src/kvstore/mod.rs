mod local_store;
mod replicated_store;
mod stabilization;
mod transactions;

pub use local_store::InMemoryStore;
pub use local_store::LocalStore;
pub use local_store::StoreError;
pub use local_store::StoredEntry;
pub use replicated_store::ClientOpError;
pub use replicated_store::OperationOutcome;
pub use replicated_store::ReadPolicy;
pub use transactions::OperationKind;
pub use transactions::TransactionId;

pub(crate) use replicated_store::ReplicatedStore;
pub(crate) use replicated_store::ReplicatedStoreConfig;
