mod address;
mod member_list;
mod protocol;

pub use address::MemberId;
pub use address::NodeAddress;
pub use member_list::MemberEntry;
pub use member_list::MembershipStore;
pub use protocol::MembershipState;

pub(crate) use protocol::MembershipConfig;
pub(crate) use protocol::MembershipProtocol;
