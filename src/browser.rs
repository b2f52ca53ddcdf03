//! One refresh cycle: ask the configured directories, merge what they return, probe it all.

use std::collections::HashSet;
use std::net::SocketAddrV4;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::ProbeConfiguration;
use crate::error::Q2QueryError;
use crate::http::HttpMasterClient;
use crate::info::ServerEntry;
use crate::lan::LanBroadcastClient;
use crate::logger::{default_logger, Logger};
use crate::master::MasterServerClient;
use crate::probe::{ResultSink, ServerProbe};

pub struct ServerBrowser {
    use_http: bool,
    http: HttpMasterClient,
    master: MasterServerClient,
    lan: LanBroadcastClient,
    probe: ServerProbe,
    logger: Arc<dyn Logger>,
}

impl ServerBrowser {
    pub fn new(config: &ProbeConfiguration) -> Self {
        Self::with_logger(config, default_logger())
    }

    pub fn with_logger(config: &ProbeConfiguration, logger: Arc<dyn Logger>) -> Self {
        ServerBrowser {
            use_http: config.use_http_master_server(),
            http: HttpMasterClient::new(config).with_logger(logger.clone()),
            master: MasterServerClient::new(config).with_logger(logger.clone()),
            lan: LanBroadcastClient::new(config).with_logger(logger.clone()),
            probe: ServerProbe::new(config).with_logger(logger.clone()),
            logger,
        }
    }

    /// Replace the LAN client, e.g. to aim it at a specific address.
    pub fn with_lan_client(mut self, lan: LanBroadcastClient) -> Self {
        self.lan = lan.with_logger(self.logger.clone());
        self
    }

    pub fn probe(&self) -> &ServerProbe {
        &self.probe
    }

    /// Candidate endpoints from the HTTP or UDP master plus the LAN, duplicates removed.
    ///
    /// With HTTP selected the UDP master is never asked, even when no URL is set.
    pub async fn discover(&self, cancel: &CancellationToken) -> Vec<SocketAddrV4> {
        let mut endpoints: Vec<SocketAddrV4> = Vec::new();

        if self.use_http {
            let found = self.http.query_servers(cancel).await;
            self.logger.info(
                &format!("HTTP master server returned {} server(s)", found.len()),
                None,
            );
            endpoints.extend(found);
        } else {
            let found = self.master.query_servers(cancel).await;
            self.logger.info(
                &format!("UDP master server returned {} server(s)", found.len()),
                None,
            );
            endpoints.extend(found);
        }

        endpoints.extend(self.lan.discover_servers(cancel).await);
        dedup_endpoints(endpoints)
    }

    /// Discover, then probe everything found, streaming entries to `sink`.
    pub async fn refresh<S>(&self, sink: &S, cancel: &CancellationToken) -> Result<Vec<ServerEntry>, Q2QueryError>
    where
        S: ResultSink + ?Sized,
    {
        self.logger.info("Starting server refresh", None);
        let endpoints = self.discover(cancel).await;
        self.logger.info(
            &format!("Found {} servers. Probing...", endpoints.len()),
            None,
        );
        self.probe.probe_many(&endpoints, sink, cancel).await
    }

    pub fn close(&self) {
        self.probe.close();
    }
}

/// Keep the first occurrence of every `address:port`.
pub fn dedup_endpoints(endpoints: Vec<SocketAddrV4>) -> Vec<SocketAddrV4> {
    let mut seen: HashSet<SocketAddrV4> = HashSet::with_capacity(endpoints.len());
    endpoints.into_iter().filter(|e| seen.insert(*e)).collect()
}
