//! Connection tuple extraction.
//!
//! # Responsibilities
//! - Read the session's local/remote endpoints as delivered by the transport
//! - Decide which endpoint is "source" for the chunk's direction
//! - Convert wire byte order to host values exactly once
//!
//! # Direction
//! ```text
//! client ──(from_upstream = false)──▶ proxy      src = remote, dst = local
//! client ◀──(from_upstream = true)─── proxy      src = local,  dst = remote
//! ```
//! Endpoints always belong to the client-facing connection; only the
//! assignment flips. Getting this backwards silently swaps client and
//! server identity for every flow in one direction.

use std::net::{Ipv4Addr, SocketAddr};

use crate::inspect::error::{EndpointSide, InspectError};

/// An endpoint as the transport layer reports it: network byte order,
/// 4-byte IPv4 address followed by a 2-byte port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireEndpoint {
    pub addr: [u8; 4],
    pub port: [u8; 2],
}

impl WireEndpoint {
    /// Encode a socket address in wire order. IPv6 has no 32-bit form.
    pub fn from_socket_addr(addr: SocketAddr) -> Option<Self> {
        match addr {
            SocketAddr::V4(v4) => Some(Self {
                addr: v4.ip().octets(),
                port: v4.port().to_be_bytes(),
            }),
            SocketAddr::V6(v6) => v6.ip().to_ipv4_mapped().map(|ip| Self {
                addr: ip.octets(),
                port: v6.port().to_be_bytes(),
            }),
        }
    }

    fn host_addr(&self) -> u32 {
        u32::from_be_bytes(self.addr)
    }

    fn host_port(&self) -> u16 {
        u16::from_be_bytes(self.port)
    }
}

/// Transport kind of a proxied connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Stream,
    Datagram,
}

/// Protocol tag handed to modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

impl From<Transport> for Protocol {
    fn from(transport: Transport) -> Self {
        match transport {
            Transport::Datagram => Protocol::Udp,
            Transport::Stream => Protocol::Tcp,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a chunk relative to the upstream peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client toward upstream.
    Downstream,
    /// Upstream back toward the client.
    FromUpstream,
}

impl Direction {
    pub fn from_upstream(flag: bool) -> Self {
        if flag {
            Direction::FromUpstream
        } else {
            Direction::Downstream
        }
    }

    pub fn is_from_upstream(&self) -> bool {
        matches!(self, Direction::FromUpstream)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Downstream => "downstream",
            Direction::FromUpstream => "upstream",
        }
    }
}

/// Source/destination 4-tuple of one chunk, host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointTuple {
    pub src_addr: u32,
    pub dst_addr: u32,
    pub src_port: u16,
    pub dst_port: u16,
}

impl EndpointTuple {
    pub fn src_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.src_addr)
    }

    pub fn dst_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.dst_addr)
    }
}

/// What the session runtime exposes about a proxied connection.
pub trait ConnectionInfo {
    /// The proxy-side endpoint of the client-facing connection.
    fn local_endpoint(&self) -> Option<WireEndpoint>;

    /// The client's endpoint.
    fn remote_endpoint(&self) -> Option<WireEndpoint>;

    fn transport(&self) -> Transport;
}

/// Derive the tuple and protocol for one chunk.
pub fn extract<C>(conn: &C, direction: Direction) -> Result<(EndpointTuple, Protocol), InspectError>
where
    C: ConnectionInfo + ?Sized,
{
    let local = conn.local_endpoint().ok_or(InspectError::EndpointUnavailable {
        side: EndpointSide::Local,
    })?;
    let remote = conn.remote_endpoint().ok_or(InspectError::EndpointUnavailable {
        side: EndpointSide::Remote,
    })?;

    let (src, dst) = if direction.is_from_upstream() {
        (local, remote)
    } else {
        (remote, local)
    };

    let tuple = EndpointTuple {
        src_addr: src.host_addr(),
        dst_addr: dst.host_addr(),
        src_port: src.host_port(),
        dst_port: dst.host_port(),
    };

    Ok((tuple, Protocol::from(conn.transport())))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedConn {
        local: Option<WireEndpoint>,
        remote: Option<WireEndpoint>,
        transport: Transport,
    }

    impl ConnectionInfo for FixedConn {
        fn local_endpoint(&self) -> Option<WireEndpoint> {
            self.local
        }
        fn remote_endpoint(&self) -> Option<WireEndpoint> {
            self.remote
        }
        fn transport(&self) -> Transport {
            self.transport
        }
    }

    fn endpoint(s: &str) -> Option<WireEndpoint> {
        WireEndpoint::from_socket_addr(s.parse().unwrap())
    }

    fn conn(transport: Transport) -> FixedConn {
        FixedConn {
            local: endpoint("10.0.0.1:443"),
            remote: endpoint("203.0.113.5:51000"),
            transport,
        }
    }

    #[test]
    fn test_client_to_upstream() {
        let (tuple, proto) = extract(&conn(Transport::Datagram), Direction::Downstream).unwrap();
        assert_eq!(tuple.src_ip(), Ipv4Addr::new(203, 0, 113, 5));
        assert_eq!(tuple.src_port, 51000);
        assert_eq!(tuple.dst_ip(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(tuple.dst_port, 443);
        assert_eq!(proto, Protocol::Udp);
    }

    #[test]
    fn test_from_upstream() {
        let (tuple, proto) = extract(&conn(Transport::Stream), Direction::FromUpstream).unwrap();
        assert_eq!(tuple.src_ip(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(tuple.src_port, 443);
        assert_eq!(tuple.dst_ip(), Ipv4Addr::new(203, 0, 113, 5));
        assert_eq!(tuple.dst_port, 51000);
        assert_eq!(proto, Protocol::Tcp);
    }

    #[test]
    fn test_direction_swap_is_involution() {
        let c = conn(Transport::Stream);
        let (up, _) = extract(&c, Direction::FromUpstream).unwrap();
        let (down, _) = extract(&c, Direction::Downstream).unwrap();
        assert_eq!(up.dst_addr, down.src_addr);
        assert_eq!(up.dst_port, down.src_port);
        assert_eq!(up.src_addr, down.dst_addr);
        assert_eq!(up.src_port, down.dst_port);
    }

    #[test]
    fn test_port_byte_order() {
        let wire = WireEndpoint { addr: [127, 0, 0, 1], port: [0x1f, 0x90] };
        assert_eq!(wire.host_port(), 8080);
        assert_eq!(wire.host_addr(), 0x7f00_0001);
    }

    #[test]
    fn test_missing_endpoint() {
        let mut c = conn(Transport::Stream);
        c.remote = None;
        assert_eq!(
            extract(&c, Direction::Downstream),
            Err(InspectError::EndpointUnavailable { side: EndpointSide::Remote })
        );

        let mut c = conn(Transport::Stream);
        c.local = None;
        assert_eq!(
            extract(&c, Direction::FromUpstream),
            Err(InspectError::EndpointUnavailable { side: EndpointSide::Local })
        );
    }

    #[test]
    fn test_ipv6_has_no_wire_form() {
        assert!(endpoint("[2001:db8::1]:443").is_none());
        assert_eq!(
            endpoint("[::ffff:192.0.2.7]:80"),
            Some(WireEndpoint { addr: [192, 0, 2, 7], port: [0, 80] })
        );
    }
}
