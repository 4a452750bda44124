use std::fmt;

pub type MemberId = i32;

/// NodeAddress is a node's network endpoint: an IP-equivalent id plus a port. Ordering is by id,
/// then port, which keeps ring placement deterministic when hash codes collide.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct NodeAddress {
    id: MemberId,
    port: i16,
}

impl NodeAddress {
    /// The all-zero address. A node that ends up with it has failed to acquire an address.
    pub const NULL: NodeAddress = NodeAddress { id: 0, port: 0 };

    pub fn new(id: MemberId, port: i16) -> Self {
        NodeAddress { id, port }
    }

    pub fn id(&self) -> MemberId {
        self.id
    }

    pub fn port(&self) -> i16 {
        self.port
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.id.to_le_bytes();
        write!(f, "{}.{}.{}.{}:{}", b[0], b[1], b[2], b[3], self.port)
    }
}

impl fmt::Debug for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_dotted_id_bytes() {
        assert_eq!(NodeAddress::new(1, 0).to_string(), "1.0.0.0:0");
        assert_eq!(NodeAddress::new(258, 7).to_string(), "2.1.0.0:7");
    }

    #[test]
    fn ordering_is_id_then_port() {
        let mut addresses = vec![
            NodeAddress::new(2, 0),
            NodeAddress::new(1, 9),
            NodeAddress::new(1, 3),
        ];
        addresses.sort();
        assert_eq!(
            addresses,
            vec![NodeAddress::new(1, 3), NodeAddress::new(1, 9), NodeAddress::new(2, 0)]
        );
        assert!(NodeAddress::NULL.is_null());
        assert!(!NodeAddress::new(1, 0).is_null());
    }
}
