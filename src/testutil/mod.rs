// Shared test support.
//
// `MockTransport` stands in for the UDP layer: it records everything the
// engine sends, serves queued datagrams from `poll`, and can be told to
// fail sends to exercise the fatal-error paths.

use std::collections::VecDeque;
use std::net::SocketAddr;

use crate::error::GtpLoadTestError;
use crate::transport::{ConnId, Datagram, Transport};

#[derive(Debug, Default)]
pub struct MockTransport {
    pub sent: Vec<(Vec<u8>, SocketAddr)>,
    pub send_count: usize,
    should_fail: bool,
    inbound: VecDeque<Datagram>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_should_fail(&mut self, fail: bool) {
        self.should_fail = fail;
    }

    /// Number of successfully sent datagrams.
    pub fn sent_count(&self) -> usize {
        self.sent.len()
    }

    pub fn sent_at(&self, idx: usize) -> (Vec<u8>, SocketAddr) {
        self.sent[idx].clone()
    }

    pub fn last_sent(&self) -> Option<(Vec<u8>, SocketAddr)> {
        self.sent.last().cloned()
    }

    /// Queue a datagram for the next `poll` call.
    pub fn queue_inbound(&mut self, datagram: Datagram) {
        self.inbound.push_back(datagram);
    }
}

impl Transport for MockTransport {
    fn send(
        &mut self,
        _conn_id: ConnId,
        dst: SocketAddr,
        payload: &[u8],
    ) -> Result<(), GtpLoadTestError> {
        self.send_count += 1;
        if self.should_fail {
            return Err(GtpLoadTestError::NetworkError(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "mock failure",
            )));
        }
        self.sent.push((payload.to_vec(), dst));
        Ok(())
    }

    fn poll(&mut self, _wait_ms: u64) -> Result<Vec<Datagram>, GtpLoadTestError> {
        Ok(self.inbound.drain(..).collect())
    }
}
