//! Opcode routing for the gateway.
//!
//! Backend services claim inclusive opcode ranges; the gateway resolves
//! each incoming message's opcode to the owning service. A small set of
//! opcodes is reserved for the gateway itself and can never be claimed.

use cgs_foundation::error::{CgsError, CgsResult};

/// Client handshake, handled by the gateway before any routing.
pub const OP_AUTH_HANDSHAKE: u16 = 0x0001;
/// Keepalive ping.
pub const OP_HEARTBEAT: u16 = 0x0010;
/// Server-to-client gateway notice.
pub const OP_GATEWAY_NOTICE: u16 = 0x00FE;
/// Orderly disconnect.
pub const OP_DISCONNECT: u16 = 0x00FF;

const RESERVED_OPCODES: [u16; 4] = [
    OP_AUTH_HANDSHAKE,
    OP_HEARTBEAT,
    OP_GATEWAY_NOTICE,
    OP_DISCONNECT,
];

#[derive(Debug, Clone)]
struct Route {
    service: String,
    start: u16,
    end: u16,
}

/// Maps opcode ranges to backend service names.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// True for opcodes the gateway handles itself.
    pub fn is_reserved(opcode: u16) -> bool {
        RESERVED_OPCODES.contains(&opcode)
    }

    /// Claims the inclusive range `start..=end` for a service.
    ///
    /// # Errors
    /// [`CgsError::InvalidArgument`] for inverted ranges or ranges covering
    /// a reserved opcode; [`CgsError::AlreadyExists`] when the range
    /// overlaps an existing claim.
    pub fn register(&mut self, service: &str, start: u16, end: u16) -> CgsResult<()> {
        if start > end {
            return Err(CgsError::InvalidArgument(format!(
                "inverted opcode range {start:#06x}..{end:#06x}"
            )));
        }
        if let Some(&op) = RESERVED_OPCODES.iter().find(|&&op| start <= op && op <= end) {
            return Err(CgsError::InvalidArgument(format!(
                "range {start:#06x}..{end:#06x} covers reserved opcode {op:#06x}"
            )));
        }
        if let Some(existing) = self
            .routes
            .iter()
            .find(|r| start <= r.end && r.start <= end)
        {
            return Err(CgsError::AlreadyExists(format!(
                "range {start:#06x}..{end:#06x} overlaps '{}' ({:#06x}..{:#06x})",
                existing.service, existing.start, existing.end
            )));
        }
        self.routes.push(Route {
            service: service.to_string(),
            start,
            end,
        });
        Ok(())
    }

    /// Resolves an opcode to its owning service, if any. Reserved opcodes
    /// never resolve.
    pub fn resolve(&self, opcode: u16) -> Option<&str> {
        if Self::is_reserved(opcode) {
            return None;
        }
        self.routes
            .iter()
            .find(|r| r.start <= opcode && opcode <= r.end)
            .map(|r| r.service.as_str())
    }

    /// Releases every range claimed by a service. Returns how many ranges
    /// were removed.
    pub fn unregister(&mut self, service: &str) -> usize {
        let before = self.routes.len();
        self.routes.retain(|r| r.service != service);
        before - self.routes.len()
    }

    /// All claimed ranges as `(service, start, end)`.
    pub fn routes(&self) -> Vec<(String, u16, u16)> {
        self.routes
            .iter()
            .map(|r| (r.service.clone(), r.start, r.end))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_resolve() {
        let mut table = RouteTable::new();
        table.register("lobby", 0x1000, 0x1FFF).unwrap();
        table.register("world", 0x2000, 0x2FFF).unwrap();

        assert_eq!(table.resolve(0x1000), Some("lobby"));
        assert_eq!(table.resolve(0x1FFF), Some("lobby"));
        assert_eq!(table.resolve(0x2500), Some("world"));
        assert_eq!(table.resolve(0x3000), None);
    }

    #[test]
    fn overlap_is_rejected() {
        let mut table = RouteTable::new();
        table.register("lobby", 0x1000, 0x1FFF).unwrap();
        assert!(matches!(
            table.register("world", 0x1800, 0x2800),
            Err(CgsError::AlreadyExists(_))
        ));
        assert!(matches!(
            table.register("world", 0x0800, 0x1000),
            Err(CgsError::AlreadyExists(_))
        ));
        // Adjacent but disjoint is fine.
        table.register("world", 0x2000, 0x2FFF).unwrap();
    }

    #[test]
    fn reserved_opcodes_cannot_be_claimed() {
        let mut table = RouteTable::new();
        assert!(matches!(
            table.register("greedy", 0x0000, 0x00FF),
            Err(CgsError::InvalidArgument(_))
        ));
        assert!(matches!(
            table.register("greedy", OP_HEARTBEAT, OP_HEARTBEAT),
            Err(CgsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn reserved_opcodes_never_resolve() {
        let mut table = RouteTable::new();
        table.register("world", 0x0100, 0x1FFF).unwrap();
        assert!(RouteTable::is_reserved(OP_DISCONNECT));
        assert_eq!(table.resolve(OP_GATEWAY_NOTICE), None);
    }

    #[test]
    fn inverted_range_rejected() {
        let mut table = RouteTable::new();
        assert!(matches!(
            table.register("broken", 0x2000, 0x1000),
            Err(CgsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn unregister_releases_ranges() {
        let mut table = RouteTable::new();
        table.register("lobby", 0x1000, 0x1FFF).unwrap();
        table.register("lobby", 0x3000, 0x3FFF).unwrap();
        assert_eq!(table.unregister("lobby"), 2);
        assert_eq!(table.resolve(0x1000), None);
        // Range is claimable again.
        table.register("lobby2", 0x1000, 0x1FFF).unwrap();
    }
}
