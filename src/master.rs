use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::ProbeConfiguration;
use crate::error::Q2QueryError;
use crate::logger::{default_logger, Logger};
use crate::packet::{has_oob_header, remove_oob_header, OobCommand, MAX_DATAGRAM};
use crate::parse::{parse_address_records, ADDRESS_RECORD_LEN};

/// Payload byte the master puts in its final packet.
const END_OF_LIST: u8 = 0x04;

/// Asks a UDP master server for every game server it knows about.
pub struct MasterServerClient {
    address: String,
    port: u16,
    response_window: Duration,
    logger: Arc<dyn Logger>,
}

impl MasterServerClient {
    /// How long the master has to finish its reply, measured from the request.
    pub const RESPONSE_WINDOW: Duration = Duration::from_secs(5);

    pub fn new(config: &ProbeConfiguration) -> Self {
        MasterServerClient {
            address: config.master_server_address().to_owned(),
            port: config.master_server_port(),
            response_window: Self::RESPONSE_WINDOW,
            logger: default_logger(),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_response_window(mut self, window: Duration) -> Self {
        self.response_window = window;
        self
    }

    /// Send `getservers` and decode every address the master returns.
    ///
    /// Network trouble is logged and yields whatever was collected so far,
    /// usually nothing.
    pub async fn query_servers(&self, cancel: &CancellationToken) -> Vec<SocketAddrV4> {
        self.logger.info(
            &format!("Querying UDP master server: {}:{}", self.address, self.port),
            None,
        );

        let servers = match self.query(cancel).await {
            Ok(servers) => servers,
            Err(e) => {
                self.logger
                    .error("Error querying master server", Some(&e.to_string()));
                Vec::new()
            }
        };

        self.logger.info(
            &format!("Master server query complete. Found {} server(s)", servers.len()),
            None,
        );
        servers
    }

    async fn query(&self, cancel: &CancellationToken) -> Result<Vec<SocketAddrV4>, Q2QueryError> {
        let master = self.resolve().await?;
        self.logger
            .debug(&format!("Resolved {} to {master}", self.address), None);

        // just arbitrarily bind any port, doesn't matter really
        let sock: UdpSocket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(Q2QueryError::FailedPortBind)?;

        let packet = OobCommand::GetServers.pack();
        let deadline = Instant::now() + self.response_window;
        sock.send_to(&packet, master)
            .await
            .map_err(Q2QueryError::SendError)?;
        self.logger
            .debug(&format!("Query packet sent ({} bytes)", packet.len()), None);

        let received = self.receive_list(&sock, deadline, cancel).await;

        let servers = parse_address_records(&received, 0, ADDRESS_RECORD_LEN);
        self.logger.info(
            &format!(
                "Parsed {} server address(es) from {} bytes",
                servers.len(),
                received.len()
            ),
            None,
        );
        Ok(servers)
    }

    async fn resolve(&self) -> Result<SocketAddr, Q2QueryError> {
        let mut addrs = lookup_host((self.address.as_str(), self.port))
            .await
            .map_err(|source| Q2QueryError::ResolveError {
                host: self.address.clone(),
                source,
            })?;

        addrs
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| Q2QueryError::NoIpv4Address(self.address.clone()))
    }

    /// Accumulate framed payloads until the end marker, the deadline or cancellation.
    async fn receive_list(&self, sock: &UdpSocket, deadline: Instant, cancel: &CancellationToken) -> Vec<u8> {
        let mut received: Vec<u8> = Vec::new();
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut packet_count: usize = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.logger.info("Master server query cancelled", None);
                    break;
                }
                _ = sleep_until(deadline) => {
                    self.logger.warning("Timeout waiting for master server response", None);
                    break;
                }
                res = sock.recv_from(&mut buf) => {
                    let (len, from) = match res {
                        Ok(r) => r,
                        Err(e) => {
                            self.logger.warning(
                                "Socket error while receiving",
                                Some(&Q2QueryError::ReceiveError(e).to_string()),
                            );
                            break;
                        }
                    };
                    packet_count += 1;
                    let data = &buf[..len];
                    self.logger.debug(&format!("Received packet #{packet_count} ({len} bytes) from {from}"), None);

                    if !has_oob_header(data) {
                        self.logger.warning("Received packet without OOB header, ignoring", None);
                        continue;
                    }

                    let payload = remove_oob_header(data);
                    if payload.first().map_or(true, |b| *b == END_OF_LIST) {
                        self.logger.debug("Received end marker, stopping reception", None);
                        break;
                    }

                    received.extend_from_slice(&payload);
                }
            }
        }

        self.logger.info(
            &format!("Received {packet_count} packet(s), total data: {} bytes", received.len()),
            None,
        );
        received
    }
}
