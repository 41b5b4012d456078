//! Coordinator server
//!
//! Client-facing UDP endpoint. Each request is resolved to its replica set,
//! fanned out through the [`PeerClient`] and decided by a per-request
//! [`Ballot`]. Exactly one reply goes back to the client.

use crate::common::{ClusterConfig, CoordinatorMetrics, Error, Result};
use crate::coordinator::monitor::record_outcome;
use crate::coordinator::peer_client::PeerClient;
use crate::coordinator::placement::{NodeDescriptor, ReplicaDirectory};
use crate::coordinator::quorum::{
    dominant_rejection, highest_version, write_outcome, Ballot, Tally, Vote,
};
use crate::protocol::{
    ClientRequest, ClientResponse, Command, Key, RequestId, ResponseType, Status, StoreRequest,
    StoreResponse, MAX_REQUEST_BYTES,
};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Notify;

fn client_status(kind: ResponseType) -> Status {
    match kind {
        ResponseType::Successful => Status::Successful,
        ResponseType::NonExistentKey => Status::NonExistentKey,
        ResponseType::OutOfSpace => Status::OutOfSpace,
        ResponseType::HeartbeatAck | ResponseType::UnrecognizedCommand => Status::InternalFailure,
    }
}

/// Where the reply for one client request goes
#[derive(Clone)]
struct ReplyTo {
    socket: Arc<UdpSocket>,
    addr: SocketAddr,
    id: RequestId,
}

impl ReplyTo {
    async fn send(&self, response: ClientResponse) {
        if let Err(e) = self.socket.send_to(&response.encode(), self.addr).await {
            tracing::warn!("Reply to {} failed: {}", self.addr, e);
        }
    }

    async fn status(&self, status: Status) {
        self.send(ClientResponse::new(self.id, status)).await
    }
}

struct Shared {
    directory: Arc<ReplicaDirectory>,
    client: PeerClient,
    replication_factor: usize,
    write_quorum: usize,
    read_quorum: usize,
    metrics: Arc<CoordinatorMetrics>,
    shutdown: Notify,
}

pub struct Coordinator {
    socket: Arc<UdpSocket>,
    shared: Arc<Shared>,
}

impl Coordinator {
    pub async fn bind(
        addr: SocketAddr,
        config: &ClusterConfig,
        directory: Arc<ReplicaDirectory>,
        client: PeerClient,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
            shared: Arc::new(Shared {
                directory,
                client,
                replication_factor: config.replication_factor,
                write_quorum: config.write_quorum(),
                read_quorum: config.read_quorum(),
                metrics: Arc::new(CoordinatorMetrics::default()),
                shutdown: Notify::new(),
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Counters shared with the serving task
    pub fn metrics(&self) -> Arc<CoordinatorMetrics> {
        self.shared.metrics.clone()
    }

    /// Receive loop. Returns once a SHUTDOWN command has been answered.
    pub async fn serve(self) -> Result<()> {
        tracing::info!("Coordinator serving on {}", self.local_addr()?);
        tracing::info!(
            "  N={} W={} R={}",
            self.shared.replication_factor,
            self.shared.write_quorum,
            self.shared.read_quorum
        );

        let mut buf = vec![0u8; MAX_REQUEST_BYTES];
        loop {
            let (n, src) = tokio::select! {
                _ = self.shared.shutdown.notified() => {
                    tracing::info!("Coordinator on {} shutting down", self.local_addr()?);
                    return Ok(());
                }
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        tracing::warn!("Coordinator receive error: {}", e);
                        continue;
                    }
                },
            };

            let datagram = Bytes::copy_from_slice(&buf[..n]);
            let shared = self.shared.clone();
            let socket = self.socket.clone();
            tokio::spawn(async move { shared.dispatch(socket, src, datagram).await });
        }
    }
}

impl Shared {
    async fn dispatch(self: Arc<Self>, socket: Arc<UdpSocket>, src: SocketAddr, datagram: Bytes) {
        let request = match ClientRequest::decode(&datagram) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!("Rejecting datagram from {}: {}", src, e);
                if let Some(id) = RequestId::from_datagram(&datagram) {
                    self.metrics.unrecognized.inc();
                    let reply = ReplyTo { socket, addr: src, id };
                    reply.status(Status::UnrecognizedCommand).await;
                }
                return;
            }
        };

        let reply = ReplyTo {
            socket,
            addr: src,
            id: request.id,
        };
        tracing::debug!(id = ?request.id, command = ?request.command, key = %request.key, "Client request from {}", src);

        match request.command {
            Command::Put => {
                self.metrics.puts.inc();
                self.write(reply, request.key, request.value).await;
            }
            Command::Remove => {
                self.metrics.removes.inc();
                self.write(reply, request.key, Bytes::new()).await;
            }
            Command::Get => {
                self.metrics.gets.inc();
                self.read(reply, request.key).await;
            }
            Command::Shutdown => {
                tracing::info!("Shutdown requested by {}", src);
                reply.status(Status::Successful).await;
                self.shutdown.notify_one();
            }
            Command::Unknown(b) => {
                tracing::debug!("Unknown command 0x{:02x} from {}", b, src);
                self.metrics.unrecognized.inc();
                reply.status(Status::UnrecognizedCommand).await;
            }
        }
    }

    /// Replica set for `key`, falling back to every available node when fewer
    /// than N are up but `quorum` still is.
    fn resolve(&self, key: &Key, quorum: usize) -> Result<Vec<Arc<NodeDescriptor>>> {
        match self.directory.successors(key, self.replication_factor) {
            Err(Error::InsufficientReplicas { available, .. }) if available >= quorum => {
                tracing::debug!(
                    "Only {} nodes available, widening replica set for {}",
                    available,
                    key
                );
                self.directory.successors(key, available)
            }
            other => other,
        }
    }

    fn replicas_or_fail(&self, key: &Key, quorum: usize) -> Option<Vec<Arc<NodeDescriptor>>> {
        match self.resolve(key, quorum) {
            Ok(replicas) => Some(replicas),
            Err(e) => {
                self.metrics.placement_failures.inc();
                tracing::warn!(key = %key, "Cannot place request: {}", e);
                None
            }
        }
    }

    /// PUT and REMOVE: succeed once `W` replicas stored the value. A REMOVE
    /// also counts replicas that never had the key.
    async fn write(self: &Arc<Self>, reply: ReplyTo, key: Key, value: Bytes) {
        let Some(replicas) = self.replicas_or_fail(&key, self.write_quorum) else {
            reply.status(Status::InternalFailure).await;
            return;
        };

        let ballot = Arc::new(if value.is_empty() {
            Ballot::for_remove(self.write_quorum, replicas.len())
        } else {
            Ballot::for_put(self.write_quorum, replicas.len())
        });
        let request = StoreRequest::put(key, value, 0).encode();

        for node in replicas {
            let shared = self.clone();
            let ballot = ballot.clone();
            let reply = reply.clone();
            let request = request.clone();
            tokio::spawn(async move {
                let tally = match shared.ask(&node, request).await {
                    Some(response) => ballot.record(Vote {
                        node,
                        kind: response.kind,
                        version: response.version,
                        value: response.value,
                    }),
                    None => ballot.record_failure(),
                };
                match tally {
                    Tally::Reached(votes) => {
                        reply.status(client_status(write_outcome(&votes))).await;
                    }
                    Tally::Unreachable { failed, rejected } => {
                        shared.quorum_lost(&reply, failed, &rejected, &ballot).await
                    }
                    Tally::Pending | Tally::Late(_) => {}
                }
            });
        }
    }

    /// GET: answer with the highest version among the first `R` replies, then
    /// repair every replica seen with an older version.
    async fn read(self: &Arc<Self>, reply: ReplyTo, key: Key) {
        let Some(replicas) = self.replicas_or_fail(&key, self.read_quorum) else {
            reply.status(Status::InternalFailure).await;
            return;
        };

        let request = StoreRequest::get(key).encode();
        let ballot = Arc::new(Ballot::for_get(self.read_quorum, replicas.len()));

        for node in replicas {
            let shared = self.clone();
            let ballot = ballot.clone();
            let reply = reply.clone();
            let request = request.clone();
            tokio::spawn(async move {
                let Some(response) = shared.ask(&node, request).await else {
                    if let Tally::Unreachable { failed, rejected } = ballot.record_failure() {
                        shared.quorum_lost(&reply, failed, &rejected, &ballot).await;
                    }
                    return;
                };

                let vote = Vote {
                    node,
                    kind: response.kind,
                    version: response.version,
                    value: response.value,
                };
                match ballot.record(vote.clone()) {
                    Tally::Reached(votes) => {
                        let Some(winner) = highest_version(&votes) else {
                            return;
                        };
                        let response = if winner.value.is_empty() {
                            ClientResponse::with_value(
                                reply.id,
                                Status::NonExistentKey,
                                winner.version,
                                Bytes::new(),
                            )
                        } else {
                            ClientResponse::with_value(
                                reply.id,
                                Status::Successful,
                                winner.version,
                                winner.value.clone(),
                            )
                        };
                        reply.send(response).await;

                        for stale in votes.iter().filter(|v| v.version < winner.version) {
                            shared.repair(&key, &stale.node, winner);
                        }
                    }
                    Tally::Late(Some(winner)) if vote.version < winner.version => {
                        shared.repair(&key, &vote.node, &winner);
                    }
                    Tally::Unreachable { failed, rejected } => {
                        shared.quorum_lost(&reply, failed, &rejected, &ballot).await
                    }
                    Tally::Pending | Tally::Late(_) => {}
                }
            });
        }
    }

    /// One peer round trip. Updates the node's availability either way.
    async fn ask(&self, node: &NodeDescriptor, request: Bytes) -> Option<StoreResponse> {
        let result = self
            .client
            .call(node.store_addr(), request)
            .await
            .and_then(|raw| StoreResponse::decode(&raw));
        match result {
            Ok(response) => {
                record_outcome(node, true);
                Some(response)
            }
            Err(e) => {
                tracing::debug!("Node {} failed: {}", node.index, e);
                record_outcome(node, false);
                None
            }
        }
    }

    /// Reply once the threshold is out of reach: with the replicas' own
    /// refusal when most of them agree on one, else INTERNAL_FAILURE.
    async fn quorum_lost(
        &self,
        reply: &ReplyTo,
        failed: usize,
        rejected: &[Vote],
        ballot: &Ballot,
    ) {
        let refusal = dominant_rejection(rejected, failed).map(client_status);
        if let Some(status) = refusal.filter(|s| *s != Status::InternalFailure) {
            tracing::debug!(id = ?reply.id, "Replicas refused request: {:?}", status);
            reply.status(status).await;
            return;
        }

        self.metrics.quorum_failures.inc();
        let err = Error::QuorumUnreachable {
            needed: ballot.threshold(),
            failed: failed + rejected.len(),
            targets: ballot.targets(),
        };
        tracing::warn!(id = ?reply.id, "{}", err);
        reply.status(Status::InternalFailure).await;
    }

    /// Background versioned write bringing a stale replica up to `winner`.
    fn repair(&self, key: &Key, node: &Arc<NodeDescriptor>, winner: &Vote) {
        self.metrics.read_repairs.inc();
        tracing::debug!(
            key = %key,
            "Repairing node {} to version {}",
            node.index,
            winner.version
        );
        let request = StoreRequest::put(*key, winner.value.clone(), winner.version).encode();
        let (ok, failed) = (node.clone(), node.clone());
        self.client.send(
            node.store_addr(),
            request,
            move |_| record_outcome(&ok, true),
            move |_| record_outcome(&failed, false),
        );
    }
}
