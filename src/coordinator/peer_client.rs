//! Retrying request/response client for node-to-node RPC over UDP
//!
//! Every outbound request is registered in a correlation table under
//! `(peer ip, peer port, request id)` and then driven by a single timer task:
//! transmission `i` is due `retry_base * 2^i` after issue (the first one
//! immediately) and one expiry is due `timeout` after issue. A receive task
//! matches incoming datagrams against the same table.
//!
//! Whichever of "response arrived" and "deadline passed" removes the entry
//! from the table first completes the call. The other path finds nothing and
//! does nothing, so a call resolves exactly once and a late response is
//! dropped.

use crate::common::{Error, Result, RpcConfig, RpcMetrics};
use crate::protocol::{RequestId, MAX_RESPONSE_BYTES};
use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// Identifies which in-flight request a datagram belongs to
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    ip: IpAddr,
    port: u16,
    id: RequestId,
}

impl CorrelationKey {
    pub fn new(peer: SocketAddr, id: RequestId) -> Self {
        Self {
            ip: peer.ip(),
            port: peer.port(),
            id,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.ip, self.port, self.id)
    }
}

impl fmt::Debug for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// In-flight request awaiting its response
struct PendingPeerRequest {
    request: Bytes,
    reply: oneshot::Sender<Result<Bytes>>,
    issued: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerAction {
    Transmit { attempt: u32 },
    Expire,
}

#[derive(Debug)]
struct TimerEntry {
    deadline: Instant,
    seq: u64,
    key: CorrelationKey,
    action: TimerAction,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    // Reversed so the max-heap pops the earliest deadline first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner {
    socket: Arc<UdpSocket>,
    pending: Mutex<HashMap<CorrelationKey, PendingPeerRequest>>,
    timer: mpsc::UnboundedSender<TimerEntry>,
    next_seq: Mutex<u64>,
    policy: RpcConfig,
    metrics: RpcMetrics,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, HashMap<CorrelationKey, PendingPeerRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically take ownership of a pending request
    fn claim(&self, key: &CorrelationKey) -> Option<PendingPeerRequest> {
        self.pending().remove(key)
    }

    fn schedule(&self, key: CorrelationKey, deadline: Instant, action: TimerAction) {
        let seq = {
            let mut next = self.next_seq.lock().unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            *next
        };
        let entry = TimerEntry {
            deadline,
            seq,
            key,
            action,
        };
        if self.timer.send(entry).is_err() {
            tracing::warn!(%key, "Timer stopped, request will not be retried");
        }
    }

    fn fire(&self, entry: TimerEntry) {
        let key = entry.key;
        match entry.action {
            TimerAction::Transmit { attempt } => {
                let request = self.pending().get(&key).map(|p| p.request.clone());
                let Some(request) = request else {
                    return;
                };
                self.metrics.transmissions.inc();
                if attempt > 0 {
                    tracing::debug!(%key, attempt, "Retransmitting");
                }
                let socket = self.socket.clone();
                tokio::spawn(async move {
                    if let Err(e) = socket.send_to(&request, key.peer()).await {
                        tracing::warn!(%key, "Send failed: {}", e);
                    }
                });
            }
            TimerAction::Expire => {
                if let Some(pending) = self.claim(&key) {
                    self.metrics.timeouts.inc();
                    tracing::debug!(%key, "Request timed out after {:?}", pending.issued.elapsed());
                    let _ = pending.reply.send(Err(Error::PeerTimeout {
                        peer: key.peer(),
                        attempts: self.policy.attempts,
                    }));
                }
            }
        }
    }

    fn deliver(&self, src: SocketAddr, datagram: &[u8]) {
        let Some(id) = RequestId::from_datagram(datagram) else {
            tracing::debug!("Ignoring {}-byte datagram from {}", datagram.len(), src);
            return;
        };
        let key = CorrelationKey::new(src, id);
        match self.claim(&key) {
            Some(pending) => {
                self.metrics.responses.inc();
                let _ = pending.reply.send(Ok(Bytes::copy_from_slice(datagram)));
            }
            None => {
                self.metrics.discarded.inc();
                tracing::trace!(%key, "Discarding late or unknown response");
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner).drain(..) {
            task.abort();
        }
    }
}

/// Client side of the peer protocol
#[derive(Clone)]
pub struct PeerClient {
    inner: Arc<Inner>,
}

impl PeerClient {
    /// Bind an ephemeral socket on `bind` and start the timer and receive tasks.
    pub async fn bind(bind: SocketAddr, policy: RpcConfig) -> Result<Self> {
        let socket = Arc::new(UdpSocket::bind(bind).await?);
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            socket: socket.clone(),
            pending: Mutex::new(HashMap::new()),
            timer: timer_tx,
            next_seq: Mutex::new(0),
            policy,
            metrics: RpcMetrics::default(),
            tasks: Mutex::new(Vec::new()),
        });

        let timer = tokio::spawn(run_timer(Arc::downgrade(&inner), timer_rx));
        let receiver = tokio::spawn(run_receiver(socket, Arc::downgrade(&inner)));
        inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([timer.abort_handle(), receiver.abort_handle()]);

        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.socket.local_addr()?)
    }

    pub fn metrics(&self) -> &RpcMetrics {
        &self.inner.metrics
    }

    pub fn policy(&self) -> &RpcConfig {
        &self.inner.policy
    }

    /// Number of requests still awaiting a response or a timeout
    pub fn in_flight(&self) -> usize {
        self.inner.pending().len()
    }

    /// Issue `request` to `peer` and wait for the matching response.
    ///
    /// The request must start with its 16-byte id. Resolves with the raw
    /// response datagram, or `PeerTimeout` once the deadline passes.
    pub async fn call(&self, peer: SocketAddr, request: Bytes) -> Result<Bytes> {
        let id = RequestId::from_datagram(&request)
            .ok_or_else(|| Error::Malformed("request has no id".into()))?;
        let key = CorrelationKey::new(peer, id);
        let (tx, rx) = oneshot::channel();
        let issued = Instant::now();

        {
            let mut pending = self.inner.pending();
            if pending.contains_key(&key) {
                return Err(Error::Other(format!("request {} already in flight", key)));
            }
            pending.insert(
                key,
                PendingPeerRequest {
                    request,
                    reply: tx,
                    issued,
                },
            );
        }
        self.inner.metrics.requests.inc();

        let policy = self.inner.policy;
        for attempt in 0..policy.attempts {
            self.inner.schedule(
                key,
                issued + policy.retry_delay(attempt),
                TimerAction::Transmit { attempt },
            );
        }
        self.inner
            .schedule(key, issued + policy.timeout(), TimerAction::Expire);

        rx.await.map_err(|_| Error::ClientClosed)?
    }

    /// Continuation form of [`call`](Self::call): exactly one of the two
    /// closures runs, `on_failure` receiving the original request.
    pub fn send<S, F>(&self, peer: SocketAddr, request: Bytes, on_success: S, on_failure: F)
    where
        S: FnOnce(Bytes) + Send + 'static,
        F: FnOnce(Bytes) + Send + 'static,
    {
        let client = self.clone();
        tokio::spawn(async move {
            match client.call(peer, request.clone()).await {
                Ok(response) => on_success(response),
                Err(e) => {
                    tracing::debug!("Request to {} failed: {}", peer, e);
                    on_failure(request)
                }
            }
        });
    }
}

/// Sequential timer stream: fires transmissions and expiries in deadline order
async fn run_timer(inner: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<TimerEntry>) {
    let mut queue: BinaryHeap<TimerEntry> = BinaryHeap::new();

    loop {
        let next = queue.peek().map(|entry| entry.deadline);
        let wake = next.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            entry = rx.recv() => match entry {
                Some(entry) => queue.push(entry),
                None => break,
            },
            _ = tokio::time::sleep_until(wake), if next.is_some() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let now = Instant::now();
                while queue.peek().is_some_and(|entry| entry.deadline <= now) {
                    if let Some(entry) = queue.pop() {
                        inner.fire(entry);
                    }
                }
            }
        }
    }
}

async fn run_receiver(socket: Arc<UdpSocket>, inner: Weak<Inner>) {
    let mut buf = vec![0u8; MAX_RESPONSE_BYTES];
    loop {
        let (n, src) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                tracing::warn!("Peer client receive error: {}", e);
                continue;
            }
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.deliver(src, &buf[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ResponseType, StoreRequest, StoreResponse};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn fast_policy() -> RpcConfig {
        RpcConfig {
            attempts: 3,
            timeout_ms: 300,
            retry_base_ms: 50,
        }
    }

    async fn client() -> PeerClient {
        PeerClient::bind("127.0.0.1:0".parse().unwrap(), fast_policy())
            .await
            .unwrap()
    }

    /// Fake store answering every request `replies` times after `delay`
    async fn responder(replies: usize, delay: Duration) -> (SocketAddr, Arc<AtomicUsize>) {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();
        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            loop {
                let (n, src) = socket.recv_from(&mut buf).await.unwrap();
                counter.fetch_add(1, AtomicOrdering::SeqCst);
                let id = RequestId::from_datagram(&buf[..n]).unwrap();
                let response = StoreResponse::new(id, ResponseType::HeartbeatAck).encode();
                let socket = socket.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    for _ in 0..replies {
                        socket.send_to(&response, src).await.unwrap();
                    }
                });
            }
        });
        (addr, received)
    }

    #[tokio::test]
    async fn test_response_completes_call_and_stops_retries() {
        let client = client().await;
        let (peer, received) = responder(1, Duration::ZERO).await;

        let request = StoreRequest::heartbeat();
        let raw = client.call(peer, request.encode()).await.unwrap();
        let response = StoreResponse::decode(&raw).unwrap();
        assert_eq!(response.id, request.id);
        assert_eq!(response.kind, ResponseType::HeartbeatAck);

        // Past every scheduled retransmission and the deadline
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(received.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(client.metrics().transmissions.get(), 1);
        assert_eq!(client.metrics().timeouts.get(), 0);
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_slow_store_applies_retransmitted_put_once() {
        use crate::protocol::Key;
        use crate::store::StoreEngine;

        // Real engine behind a link slower than every retransmission
        let engine = Arc::new(StoreEngine::new());
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let peer = socket.local_addr().unwrap();
        let store = engine.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            loop {
                let (n, src) = socket.recv_from(&mut buf).await.unwrap();
                let Some(reply) = store.handle(&buf[..n]) else { continue };
                let socket = socket.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    let _ = socket.send_to(&reply, src).await;
                });
            }
        });

        let client = client().await;
        let request = StoreRequest::put(Key::from("k"), Bytes::from_static(b"v1"), 0);
        let raw = client.call(peer, request.encode()).await.unwrap();
        assert_eq!(StoreResponse::decode(&raw).unwrap().kind, ResponseType::Successful);
        assert!(client.metrics().transmissions.get() >= 2);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(engine.get(&Key::from("k")).version, 1);
    }

    #[tokio::test]
    async fn test_silent_peer_times_out_after_all_attempts() {
        let client = client().await;
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer = silent.local_addr().unwrap();

        let started = Instant::now();
        let result = client.call(peer, StoreRequest::heartbeat().encode()).await;
        assert!(matches!(result, Err(Error::PeerTimeout { attempts: 3, .. })));
        assert!(started.elapsed() >= Duration::from_millis(300));

        // All three transmissions (0ms, 100ms, 200ms) went out before the deadline
        let mut buf = [0u8; 128];
        for _ in 0..3 {
            tokio::time::timeout(Duration::from_millis(100), silent.recv_from(&mut buf))
                .await
                .expect("missing transmission")
                .unwrap();
        }
        assert_eq!(client.metrics().transmissions.get(), 3);
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_late_response_is_discarded() {
        let client = client().await;
        let (peer, _) = responder(1, Duration::from_millis(450)).await;

        let successes = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));
        let request = StoreRequest::heartbeat().encode();
        {
            let successes = successes.clone();
            let failures = failures.clone();
            let expected = request.clone();
            client.send(
                peer,
                request,
                move |_| {
                    successes.fetch_add(1, AtomicOrdering::SeqCst);
                },
                move |original| {
                    assert_eq!(original, expected);
                    failures.fetch_add(1, AtomicOrdering::SeqCst);
                },
            );
        }

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(successes.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(failures.load(AtomicOrdering::SeqCst), 1);
        assert!(client.metrics().discarded.get() >= 1);
    }

    #[tokio::test]
    async fn test_duplicate_responses_fire_once() {
        let client = client().await;
        let (peer, _) = responder(3, Duration::ZERO).await;

        let successes = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));
        let (s, f) = (successes.clone(), failures.clone());
        client.send(
            peer,
            StoreRequest::heartbeat().encode(),
            move |_| {
                s.fetch_add(1, AtomicOrdering::SeqCst);
            },
            move |_| {
                f.fetch_add(1, AtomicOrdering::SeqCst);
            },
        );

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(successes.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(failures.load(AtomicOrdering::SeqCst), 0);
        assert!(client.metrics().discarded.get() >= 2);
    }

    #[tokio::test]
    async fn test_response_from_wrong_port_is_ignored() {
        let client = client().await;
        let target = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let impostor = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let request = StoreRequest::heartbeat();
        let encoded = request.encode();

        let call = tokio::spawn({
            let client = client.clone();
            let peer = target.local_addr().unwrap();
            async move { client.call(peer, encoded).await }
        });

        let mut buf = [0u8; 128];
        let (_, src) = target.recv_from(&mut buf).await.unwrap();
        let response = StoreResponse::new(request.id, ResponseType::HeartbeatAck).encode();
        impostor.send_to(&response, src).await.unwrap();

        let result = call.await.unwrap();
        assert!(matches!(result, Err(Error::PeerTimeout { .. })));
    }

    #[tokio::test]
    async fn test_request_without_id_is_rejected() {
        let client = client().await;
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let result = client.call(peer, Bytes::from_static(b"short")).await;
        assert!(matches!(result, Err(Error::Malformed(_))));
    }

    #[test]
    fn test_timer_order() {
        let key = CorrelationKey::new("127.0.0.1:1".parse().unwrap(), RequestId::random());
        let now = Instant::now();
        let mut heap = BinaryHeap::new();
        for (i, ms) in [30u64, 10, 20, 10].iter().enumerate() {
            heap.push(TimerEntry {
                deadline: now + Duration::from_millis(*ms),
                seq: i as u64,
                key,
                action: TimerAction::Expire,
            });
        }
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.seq)).collect();
        assert_eq!(order, vec![1, 3, 2, 0]);
    }
}
