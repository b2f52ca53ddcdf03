use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::ProbeConfiguration;
use crate::error::Q2QueryError;
use crate::logger::{default_logger, Logger};
use crate::packet::{OobCommand, MAX_DATAGRAM};

/// Port Quake II servers listen on by default.
pub const PORT_SERVER: u16 = 27910;

/// Finds servers on the local network by broadcasting a `status` query.
pub struct LanBroadcastClient {
    enabled: bool,
    target: SocketAddrV4,
    window: Duration,
    logger: Arc<dyn Logger>,
}

impl LanBroadcastClient {
    /// How long replies are collected after the broadcast goes out.
    pub const COLLECTION_WINDOW: Duration = Duration::from_secs(3);

    pub fn new(config: &ProbeConfiguration) -> Self {
        LanBroadcastClient {
            enabled: config.enable_lan_broadcast(),
            target: SocketAddrV4::new(Ipv4Addr::BROADCAST, PORT_SERVER),
            window: Self::COLLECTION_WINDOW,
            logger: default_logger(),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Send the query somewhere other than the broadcast address.
    pub fn with_target(mut self, target: SocketAddrV4) -> Self {
        self.target = target;
        self
    }

    pub fn with_collection_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Every distinct endpoint that answered within the window.
    ///
    /// Reply contents are not looked at; the prober asks each server again.
    pub async fn discover_servers(&self, cancel: &CancellationToken) -> Vec<SocketAddrV4> {
        if !self.enabled {
            return Vec::new();
        }

        self.logger.info("Starting LAN broadcast discovery...", None);
        match self.discover(cancel).await {
            Ok(servers) => {
                self.logger.info(
                    &format!("LAN broadcast discovered {} server(s)", servers.len()),
                    None,
                );
                servers
            }
            Err(e) => {
                self.logger
                    .error("Error during LAN broadcast", Some(&e.to_string()));
                Vec::new()
            }
        }
    }

    async fn discover(&self, cancel: &CancellationToken) -> Result<Vec<SocketAddrV4>, Q2QueryError> {
        let sock: UdpSocket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(Q2QueryError::FailedPortBind)?;
        sock.set_broadcast(true)
            .map_err(Q2QueryError::FailedPortBind)?;

        self.logger
            .debug(&format!("Sending broadcast to {}", self.target), None);
        sock.send_to(&OobCommand::Status.pack(), self.target)
            .await
            .map_err(Q2QueryError::SendError)?;

        let deadline = Instant::now() + self.window;
        let mut seen: HashSet<String> = HashSet::new();
        let mut servers: Vec<SocketAddrV4> = Vec::new();
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep_until(deadline) => break,
                res = sock.recv_from(&mut buf) => {
                    let from = match res {
                        Ok((_, SocketAddr::V4(from))) => from,
                        Ok((_, from)) => {
                            self.logger.debug(&format!("Ignoring reply from {from}"), None);
                            continue;
                        }
                        Err(e) => {
                            self.logger.warning(
                                "Socket error during LAN discovery",
                                Some(&Q2QueryError::ReceiveError(e).to_string()),
                            );
                            break;
                        }
                    };

                    if seen.insert(from.to_string()) {
                        self.logger.debug(&format!("Discovered LAN server: {from}"), None);
                        servers.push(from);
                    }
                }
            }
        }

        Ok(servers)
    }
}
