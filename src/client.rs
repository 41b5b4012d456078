//! Client library for the coordinator protocol
//!
//! Sends one request at a time to a coordinator and waits for the reply with
//! the same id. Lost datagrams are retried with exponential backoff. A retried
//! PUT may be applied twice, which only bumps the version again.

use crate::common::{retry_with_backoff, Error, Result};
use crate::protocol::{ClientRequest, ClientResponse, Key, MAX_RESPONSE_BYTES};
use bytes::Bytes;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;

const DEFAULT_RETRIES: usize = 3;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const BACKOFF: Duration = Duration::from_millis(100);

pub struct KvClient {
    socket: UdpSocket,
    coordinator: SocketAddr,
    retries: usize,
    timeout: Duration,
}

impl KvClient {
    pub async fn connect(coordinator: SocketAddr) -> Result<Self> {
        let bind: SocketAddr = if coordinator.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        Ok(Self {
            socket: UdpSocket::bind(bind).await?,
            coordinator,
            retries: DEFAULT_RETRIES,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Total attempts per request (at least one)
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries.max(1);
        self
    }

    /// Time to wait for a reply on each attempt
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn coordinator(&self) -> SocketAddr {
        self.coordinator
    }

    pub async fn put(&self, key: Key, value: impl Into<Bytes>) -> Result<ClientResponse> {
        self.request(ClientRequest::put(key, value.into())).await
    }

    pub async fn get(&self, key: Key) -> Result<ClientResponse> {
        self.request(ClientRequest::get(key)).await
    }

    pub async fn remove(&self, key: Key) -> Result<ClientResponse> {
        self.request(ClientRequest::remove(key)).await
    }

    pub async fn shutdown(&self) -> Result<ClientResponse> {
        self.request(ClientRequest::shutdown()).await
    }

    /// Send a prepared request, retrying on timeout.
    pub async fn request(&self, request: ClientRequest) -> Result<ClientResponse> {
        let encoded = request.encode();
        retry_with_backoff(
            || self.attempt(&encoded, &request),
            self.retries,
            BACKOFF,
        )
        .await
    }

    async fn attempt(&self, encoded: &[u8], request: &ClientRequest) -> Result<ClientResponse> {
        self.socket.send_to(encoded, self.coordinator).await?;

        let deadline = Instant::now() + self.timeout;
        let mut buf = vec![0u8; MAX_RESPONSE_BYTES];
        loop {
            let (n, src) = tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buf))
                .await
                .map_err(|_| {
                    Error::Timeout(format!("no reply from {} within {:?}", self.coordinator, self.timeout))
                })??;

            let response = match ClientResponse::decode(&buf[..n]) {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!("Ignoring reply from {}: {}", src, e);
                    continue;
                }
            };
            if response.id != request.id {
                tracing::debug!("Ignoring stale reply {} from {}", response.id, src);
                continue;
            }
            return Ok(response);
        }
    }
}
