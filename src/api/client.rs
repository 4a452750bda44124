use crate::kvstore::ClientOpError;

/// KeyValueClient is the async face of one node's coordinator. Each future resolves once the
/// operation's quorum outcome is decided (or it times out).
#[async_trait::async_trait]
pub trait KeyValueClient {
    async fn create(&self, key: String, value: String) -> Result<(), ClientOpError>;

    async fn read(&self, key: String) -> Result<String, ClientOpError>;

    async fn update(&self, key: String, value: String) -> Result<(), ClientOpError>;

    async fn delete(&self, key: String) -> Result<(), ClientOpError>;
}
