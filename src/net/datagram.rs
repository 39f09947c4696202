//! UDP listen socket that reports where each datagram was addressed.
//!
//! # Responsibilities
//! - Bind a UDP scope's listen address
//! - Report the destination address of every received datagram
//!
//! # Design Decisions
//! - A socket bound to a specific address reports that address
//! - A wildcard socket asks the kernel for packet info (`IP_PKTINFO`,
//!   `IPV6_RECVPKTINFO`) and reads the destination per datagram
//! - Wildcard binds are refused where packet info is not implemented

use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

/// One datagram read from a `DatagramSocket`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub len: usize,
    /// Sender of the datagram.
    pub peer: SocketAddr,
    /// Address and port the datagram was sent to.
    pub local: SocketAddr,
}

#[derive(Debug)]
pub struct DatagramSocket {
    inner: UdpSocket,
    local: SocketAddr,
    wildcard: bool,
}

impl DatagramSocket {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(addr).await?;
        Self::from_socket(inner)
    }

    /// Wrap an already bound socket.
    pub fn from_socket(inner: UdpSocket) -> io::Result<Self> {
        let local = inner.local_addr()?;
        let wildcard = local.ip().is_unspecified();
        if wildcard {
            platform::enable_destination(&inner, local)?;
        }

        tracing::info!(address = %local, wildcard, "UDP socket bound");
        Ok(Self {
            inner,
            local,
            wildcard,
        })
    }

    /// The bound address. May be a wildcard; see `Received::local`.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<Received> {
        if self.wildcard {
            return platform::recv_from(&self.inner, self.local, buf).await;
        }

        let (len, peer) = self.inner.recv_from(buf).await?;
        Ok(Received {
            len,
            peer,
            local: self.local,
        })
    }

    pub async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.inner.send_to(buf, target).await
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use std::io::{self, ErrorKind};
    use std::mem;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
    use std::os::fd::AsRawFd;

    use tokio::io::Interest;
    use tokio::net::UdpSocket;

    use super::Received;

    /// Control buffer in 8-byte words, room for one IPv4 and one IPv6
    /// packet-info message.
    const CONTROL_WORDS: usize = 16;

    pub(super) fn enable_destination(socket: &UdpSocket, local: SocketAddr) -> io::Result<()> {
        let (level, name) = match local {
            SocketAddr::V4(_) => (libc::IPPROTO_IP, libc::IP_PKTINFO),
            SocketAddr::V6(_) => (libc::IPPROTO_IPV6, libc::IPV6_RECVPKTINFO),
        };
        let on: libc::c_int = 1;

        let rc = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                level,
                name,
                (&on as *const libc::c_int).cast(),
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(super) async fn recv_from(socket: &UdpSocket, local: SocketAddr, buf: &mut [u8]) -> io::Result<Received> {
        loop {
            socket.readable().await?;
            match socket.try_io(Interest::READABLE, || recv_once(socket, local, &mut *buf)) {
                Ok(received) => return Ok(received),
                Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn recv_once(socket: &UdpSocket, local: SocketAddr, buf: &mut [u8]) -> io::Result<Received> {
        let mut name: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut control = [0u64; CONTROL_WORDS];
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr().cast(),
            iov_len: buf.len(),
        };

        // Zeroed first: the field set of `msghdr` differs between libcs.
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_name = (&mut name as *mut libc::sockaddr_storage).cast();
        msg.msg_namelen = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr().cast();
        msg.msg_controllen = mem::size_of_val(&control) as _;

        let received = unsafe { libc::recvmsg(socket.as_raw_fd(), &mut msg, libc::MSG_DONTWAIT) };
        if received < 0 {
            return Err(io::Error::last_os_error());
        }

        let peer = peer_addr(&name)?;
        let ip = unsafe { destination(&msg) }.unwrap_or(local.ip());
        Ok(Received {
            len: received as usize,
            peer,
            local: SocketAddr::new(ip, local.port()),
        })
    }

    fn peer_addr(name: &libc::sockaddr_storage) -> io::Result<SocketAddr> {
        match name.ss_family as libc::c_int {
            libc::AF_INET => {
                let sin = unsafe { &*(name as *const libc::sockaddr_storage).cast::<libc::sockaddr_in>() };
                let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
                Ok(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
            }
            libc::AF_INET6 => {
                let sin6 = unsafe { &*(name as *const libc::sockaddr_storage).cast::<libc::sockaddr_in6>() };
                Ok(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                    u16::from_be(sin6.sin6_port),
                    sin6.sin6_flowinfo,
                    sin6.sin6_scope_id,
                )))
            }
            family => Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("datagram from unsupported address family {family}"),
            )),
        }
    }

    /// Destination address carried by a packet-info control message.
    ///
    /// # Safety
    /// `msg` must describe a control buffer filled in by `recvmsg`.
    unsafe fn destination(msg: &libc::msghdr) -> Option<IpAddr> {
        let mut cmsg = libc::CMSG_FIRSTHDR(msg);
        while !cmsg.is_null() {
            let data = libc::CMSG_DATA(cmsg);
            match ((*cmsg).cmsg_level, (*cmsg).cmsg_type) {
                (libc::IPPROTO_IP, libc::IP_PKTINFO) => {
                    let info = std::ptr::read_unaligned(data.cast::<libc::in_pktinfo>());
                    return Some(Ipv4Addr::from(u32::from_be(info.ipi_addr.s_addr)).into());
                }
                (libc::IPPROTO_IPV6, libc::IPV6_PKTINFO) => {
                    let info = std::ptr::read_unaligned(data.cast::<libc::in6_pktinfo>());
                    return Some(Ipv6Addr::from(info.ipi6_addr.s6_addr).into());
                }
                _ => {}
            }
            cmsg = libc::CMSG_NXTHDR(msg, cmsg);
        }
        None
    }
}

#[cfg(not(target_os = "linux"))]
mod platform {
    use std::io::{self, ErrorKind};
    use std::net::SocketAddr;

    use tokio::net::UdpSocket;

    use super::Received;

    pub(super) fn enable_destination(_socket: &UdpSocket, local: SocketAddr) -> io::Result<()> {
        Err(io::Error::new(
            ErrorKind::Unsupported,
            format!("wildcard UDP listen address {local} is only supported on Linux"),
        ))
    }

    pub(super) async fn recv_from(socket: &UdpSocket, local: SocketAddr, buf: &mut [u8]) -> io::Result<Received> {
        let (len, peer) = socket.recv_from(buf).await?;
        Ok(Received { len, peer, local })
    }
}
