//! Store server: the UDP front of a [`StoreEngine`]

use crate::common::Result;
use crate::protocol::MAX_REQUEST_BYTES;
use crate::store::engine::StoreEngine;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

pub struct StoreServer {
    socket: Arc<UdpSocket>,
    engine: Arc<StoreEngine>,
}

impl StoreServer {
    pub async fn bind(addr: SocketAddr, engine: Arc<StoreEngine>) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
            engine,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn engine(&self) -> Arc<StoreEngine> {
        self.engine.clone()
    }

    /// Receive loop. Every datagram is answered on its own task.
    pub async fn serve(self) -> Result<()> {
        tracing::info!("Store serving on {}", self.local_addr()?);

        let mut buf = vec![0u8; MAX_REQUEST_BYTES];
        loop {
            let (n, src) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    tracing::warn!("Store receive error: {}", e);
                    continue;
                }
            };
            let datagram = Bytes::copy_from_slice(&buf[..n]);
            let socket = self.socket.clone();
            let engine = self.engine.clone();

            tokio::spawn(async move {
                let Some(response) = engine.handle(&datagram) else {
                    tracing::debug!("Dropping {}-byte datagram from {}", n, src);
                    return;
                };
                if let Err(e) = socket.send_to(&response, src).await {
                    tracing::warn!("Store reply to {} failed: {}", src, e);
                }
            });
        }
    }
}
