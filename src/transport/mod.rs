// UDP transport.
//
// Synchronous sends, poll-driven receives. Sockets are identified by a
// connection id: conn 0 is the default outbound socket, higher ids are the
// extra sockets a responder listens on; a response always goes back over
// the socket its request arrived on.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::os::fd::AsFd;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use socket2::{Domain, Protocol, Socket, Type};

use crate::error::GtpLoadTestError;

pub type ConnId = usize;

/// Largest control-plane datagram we expect to see.
const RECV_BUF_LEN: usize = 4096;

/// One received datagram, tagged with the socket it arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub conn_id: ConnId,
    pub peer: SocketAddr,
    pub payload: Vec<u8>,
}

/// Transport seam between the engine and the network. The mock used by
/// tests implements the same trait.
pub trait Transport {
    /// Synchronous send of one datagram. The caller keeps ownership of
    /// `payload`; an error is fatal for the sending session only.
    fn send(&mut self, conn_id: ConnId, dst: SocketAddr, payload: &[u8])
        -> Result<(), GtpLoadTestError>;

    /// Block for at most `wait_ms`, then return whatever arrived: at most
    /// one datagram per readable socket per call.
    fn poll(&mut self, wait_ms: u64) -> Result<Vec<Datagram>, GtpLoadTestError>;
}

pub struct UdpTransport {
    sockets: Vec<UdpSocket>,
}

impl UdpTransport {
    /// Bind `count` nonblocking UDP sockets starting at `base_port`
    /// (sequential ports; port 0 lets the OS pick each time). Socket `i`
    /// answers to conn id `i`.
    pub fn bind(base_addr: IpAddr, base_port: u16, count: u16) -> Result<Self, GtpLoadTestError> {
        if count == 0 {
            return Err(GtpLoadTestError::ConfigError(
                "socket count must be at least 1".to_string(),
            ));
        }

        let mut sockets = Vec::with_capacity(count as usize);
        for i in 0..count {
            let port = if base_port == 0 { 0 } else { base_port + i };
            let addr = SocketAddr::new(base_addr, port);

            let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
            socket.set_reuse_address(true)?;
            socket.set_nonblocking(true)?;
            socket.bind(&addr.into())?;
            sockets.push(socket.into());
        }

        Ok(Self { sockets })
    }

    pub fn local_addr(&self, conn_id: ConnId) -> Option<SocketAddr> {
        self.sockets.get(conn_id).and_then(|s| s.local_addr().ok())
    }

    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }
}

impl Transport for UdpTransport {
    fn send(
        &mut self,
        conn_id: ConnId,
        dst: SocketAddr,
        payload: &[u8],
    ) -> Result<(), GtpLoadTestError> {
        let socket = self
            .sockets
            .get(conn_id)
            .ok_or(GtpLoadTestError::UnknownConn(conn_id))?;
        socket.send_to(payload, dst)?;
        Ok(())
    }

    fn poll(&mut self, wait_ms: u64) -> Result<Vec<Datagram>, GtpLoadTestError> {
        let timeout = PollTimeout::from(wait_ms.min(1000) as u16);

        let ready = {
            let mut fds: Vec<PollFd> = self
                .sockets
                .iter()
                .map(|s| PollFd::new(s.as_fd(), PollFlags::POLLIN))
                .collect();

            match poll(&mut fds, timeout) {
                Ok(0) => return Ok(Vec::new()),
                Ok(_) => fds
                    .iter()
                    .enumerate()
                    .filter(|(_, fd)| {
                        fd.revents().is_some_and(|r| r.contains(PollFlags::POLLIN))
                    })
                    .map(|(i, _)| i)
                    .collect::<Vec<_>>(),
                Err(nix::errno::Errno::EINTR) => return Ok(Vec::new()),
                Err(errno) => return Err(std::io::Error::from(errno).into()),
            }
        };

        let mut buf = [0u8; RECV_BUF_LEN];
        let mut datagrams = Vec::with_capacity(ready.len());
        for conn_id in ready {
            match self.sockets[conn_id].recv_from(&mut buf) {
                Ok((len, peer)) => datagrams.push(Datagram {
                    conn_id,
                    peer,
                    payload: buf[..len].to_vec(),
                }),
                // raced away between poll and recv
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(datagrams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    // --- bind ---

    #[test]
    fn bind_single_socket() {
        let transport = UdpTransport::bind(localhost(), 0, 1).expect("bind one socket");
        assert_eq!(transport.socket_count(), 1);
        assert!(transport.local_addr(0).is_some());
        assert!(transport.local_addr(1).is_none());
    }

    #[test]
    fn bind_zero_count_returns_error() {
        assert!(UdpTransport::bind(localhost(), 0, 0).is_err());
    }

    #[test]
    fn bind_multiple_sockets() {
        let transport = UdpTransport::bind(localhost(), 0, 3).expect("bind three sockets");
        assert_eq!(transport.socket_count(), 3);
    }

    // --- send/poll ---

    #[test]
    fn send_and_poll_roundtrip() {
        let mut sender = UdpTransport::bind(localhost(), 0, 1).expect("sender bind");
        let mut receiver = UdpTransport::bind(localhost(), 0, 1).expect("receiver bind");
        let dst = receiver.local_addr(0).unwrap();

        let payload = [0x48u8, 32, 0, 8, 0, 0, 0, 0, 0, 0, 0, 0];
        sender.send(0, dst, &payload).expect("send");

        let datagrams = receiver.poll(500).expect("poll");
        assert_eq!(datagrams.len(), 1);
        assert_eq!(datagrams[0].conn_id, 0);
        assert_eq!(datagrams[0].payload, payload);
        assert_eq!(datagrams[0].peer.ip(), localhost());
    }

    #[test]
    fn poll_times_out_empty() {
        let mut transport = UdpTransport::bind(localhost(), 0, 1).expect("bind");
        let datagrams = transport.poll(10).expect("poll");
        assert!(datagrams.is_empty());
    }

    #[test]
    fn send_on_unknown_conn_fails() {
        let mut transport = UdpTransport::bind(localhost(), 0, 1).expect("bind");
        let dst = transport.local_addr(0).unwrap();
        let err = transport.send(9, dst, b"x").unwrap_err();
        assert!(matches!(err, GtpLoadTestError::UnknownConn(9)));
    }

    #[test]
    fn datagram_carries_receiving_conn_id() {
        let mut sender = UdpTransport::bind(localhost(), 0, 1).expect("sender");
        let mut receiver = UdpTransport::bind(localhost(), 0, 2).expect("receiver");
        let dst1 = receiver.local_addr(1).unwrap();

        sender.send(0, dst1, b"to-conn-1").expect("send");

        let datagrams = receiver.poll(500).expect("poll");
        assert_eq!(datagrams.len(), 1);
        assert_eq!(datagrams[0].conn_id, 1);
    }

    #[test]
    fn one_datagram_per_socket_per_poll() {
        let mut sender = UdpTransport::bind(localhost(), 0, 1).expect("sender");
        let mut receiver = UdpTransport::bind(localhost(), 0, 1).expect("receiver");
        let dst = receiver.local_addr(0).unwrap();

        sender.send(0, dst, b"first").expect("send");
        sender.send(0, dst, b"second").expect("send");

        // give the kernel a moment to queue both
        std::thread::sleep(std::time::Duration::from_millis(50));

        let first = receiver.poll(500).expect("poll");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].payload, b"first");

        let second = receiver.poll(500).expect("poll");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].payload, b"second");
    }
}
