use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::ProbeConfiguration;
use crate::error::Q2QueryError;
use crate::info::{ascii_lossy, ServerEntry, StatusResponse};
use crate::logger::{default_logger, Logger};
use crate::packet::{has_oob_header, remove_oob_header, OobCommand, MAX_DATAGRAM};

const PROGRESS_EVERY: usize = 10;

/// Receives entries from [ServerProbe::probe_many] as soon as each probe finishes.
///
/// Called from concurrently completing probes, in no particular order.
pub trait ResultSink: Send + Sync {
    fn report(&self, entry: ServerEntry);
}

impl<F> ResultSink for F
where
    F: Fn(ServerEntry) + Send + Sync,
{
    fn report(&self, entry: ServerEntry) {
        self(entry)
    }
}

/// How a single probe ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Responded(ServerEntry),
    TimedOut,
    Cancelled,
    /// Transport failure or a reply that was not a framed status packet.
    NoResponse,
}

impl ProbeOutcome {
    pub fn into_entry(self) -> Option<ServerEntry> {
        match self {
            ProbeOutcome::Responded(entry) => Some(entry),
            _ => None,
        }
    }
}

/// Sends `status` to game servers, at most `max_concurrent_probes` at a time.
pub struct ServerProbe {
    permits: Semaphore,
    max_permits: usize,
    timeout: Duration,
    closed: AtomicBool,
    logger: Arc<dyn Logger>,
}

impl ServerProbe {
    pub fn new(config: &ProbeConfiguration) -> Self {
        let max_permits = config.max_concurrent_probes();
        ServerProbe {
            permits: Semaphore::new(max_permits),
            max_permits,
            timeout: config.probe_timeout(),
            closed: AtomicBool::new(false),
            logger: default_logger(),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Permits not held by an in-flight probe.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn max_concurrent_probes(&self) -> usize {
        self.max_permits
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reject any further probes. Probes still waiting for a permit give up.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.permits.close();
        }
    }

    /// Query one server, waiting for a free permit first.
    ///
    /// Only fails once the prober is closed; everything else is a [ProbeOutcome].
    pub async fn probe_one(&self, endpoint: SocketAddrV4, cancel: &CancellationToken) -> Result<ProbeOutcome, Q2QueryError> {
        if self.is_closed() {
            return Err(Q2QueryError::ProbeClosed);
        }

        // held until this function returns, whichever way that happens
        let _permit = tokio::select! {
            _ = cancel.cancelled() => {
                self.logger.debug(&format!("Probe for server {endpoint} was cancelled"), None);
                return Ok(ProbeOutcome::Cancelled);
            }
            permit = self.permits.acquire() => permit.map_err(|_| Q2QueryError::ProbeClosed)?,
        };

        match self.send_recv(endpoint, cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.logger
                    .debug(&format!("Server {endpoint} did not respond"), Some(&e.to_string()));
                Ok(ProbeOutcome::NoResponse)
            }
        }
    }

    async fn send_recv(&self, endpoint: SocketAddrV4, cancel: &CancellationToken) -> Result<ProbeOutcome, Q2QueryError> {
        // just arbitrarily bind any port, doesn't matter really
        let sock: UdpSocket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(Q2QueryError::FailedPortBind)?;
        sock.connect(endpoint)
            .await
            .map_err(Q2QueryError::UnreachableHost)?;

        let started = Instant::now();
        sock.send(&OobCommand::Status.pack())
            .await
            .map_err(Q2QueryError::SendError)?;
        self.logger.debug(&format!("Probing server {endpoint}"), None);

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let len = tokio::select! {
            _ = cancel.cancelled() => {
                self.logger.debug(&format!("Probe for server {endpoint} was cancelled"), None);
                return Ok(ProbeOutcome::Cancelled);
            }
            _ = sleep(self.timeout) => {
                self.logger.debug(
                    &format!("Probe for server {endpoint} timed out after {}ms", self.timeout.as_millis()),
                    None,
                );
                return Ok(ProbeOutcome::TimedOut);
            }
            res = sock.recv(&mut buf) => res.map_err(Q2QueryError::ReceiveError)?,
        };
        let elapsed = u32::try_from(started.elapsed().as_millis()).unwrap_or(u32::MAX);

        let data = &buf[..len];
        if !has_oob_header(data) {
            self.logger
                .warning(&format!("Server {endpoint} responded without OOB header"), None);
            return Ok(ProbeOutcome::NoResponse);
        }

        let payload = remove_oob_header(data);
        let response = ascii_lossy(&payload);
        self.logger.debug(
            &format!("Server {endpoint} responded in {elapsed}ms ({} bytes)", payload.len()),
            None,
        );

        let entry = StatusResponse::parse(&response).into_entry(endpoint, Some(elapsed));
        if entry.cvars.is_empty() {
            self.logger
                .warning(&format!("No cvars parsed from {endpoint}"), Some(&response));
        }
        self.logger.debug(
            &format!(
                "Parsed server {endpoint}: {} ({}/{} players)",
                entry.hostname(),
                entry.current_players(),
                entry.max_clients()
            ),
            None,
        );

        Ok(ProbeOutcome::Responded(entry))
    }

    /// Probe every endpoint at once, bounded only by the permit pool.
    ///
    /// Each responding server goes to `sink` when its probe completes and is also
    /// part of the returned list. Silent servers are left out.
    pub async fn probe_many<S>(
        &self,
        endpoints: &[SocketAddrV4],
        sink: &S,
        cancel: &CancellationToken,
    ) -> Result<Vec<ServerEntry>, Q2QueryError>
    where
        S: ResultSink + ?Sized,
    {
        if self.is_closed() {
            return Err(Q2QueryError::ProbeClosed);
        }

        let total = endpoints.len();
        self.logger.info(
            &format!(
                "Starting to probe {total} server(s) (max concurrent: {})",
                self.max_permits
            ),
            None,
        );

        let mut pending: FuturesUnordered<_> = endpoints
            .iter()
            .map(|endpoint| self.probe_one(*endpoint, cancel))
            .collect();

        let mut completed: usize = 0;
        let mut results: Vec<ServerEntry> = Vec::new();
        while let Some(outcome) = pending.next().await {
            completed += 1;

            match outcome {
                Ok(ProbeOutcome::Responded(entry)) => {
                    sink.report(entry.clone());
                    results.push(entry);
                }
                Ok(_) => {}
                Err(e) => self.logger.debug("Probe skipped", Some(&e.to_string())),
            }

            if completed % PROGRESS_EVERY == 0 || completed == total {
                self.logger.info(
                    &format!(
                        "Probing progress: {completed}/{total} completed, {} successful",
                        results.len()
                    ),
                    None,
                );
            }
        }

        self.logger.info(
            &format!("Probing complete: {}/{total} servers responded", results.len()),
            None,
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NullLogger;
    use std::net::SocketAddr;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    const STATUS_REPLY: &[u8] = b"\xFF\xFF\xFF\xFFprint\n\\hostname\\Test Box\\mapname\\q2dm1\\maxclients\\8\n10 20 \"Alice\"\n3 45 \"Bob\"\n";

    fn probe_with(max: usize, timeout_ms: u64) -> ServerProbe {
        let mut config = ProbeConfiguration::default();
        config.set_max_concurrent_probes(max).unwrap();
        config.set_probe_timeout_ms(timeout_ms).unwrap();
        ServerProbe::new(&config).with_logger(Arc::new(NullLogger))
    }

    async fn game_server() -> (Arc<UdpSocket>, SocketAddrV4) {
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = match sock.local_addr().unwrap() {
            SocketAddr::V4(a) => a,
            SocketAddr::V6(_) => unreachable!(),
        };
        (Arc::new(sock), addr)
    }

    /// Replies to each status request after `delay`, tracking how many were outstanding at once.
    fn answer_with_delay(sock: Arc<UdpSocket>, reply: &'static [u8], delay: Duration) -> Arc<AtomicUsize> {
        let peak = Arc::new(AtomicUsize::new(0));
        let outstanding = Arc::new(AtomicUsize::new(0));
        let peak_out = peak.clone();

        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            loop {
                let (len, client) = match sock.recv_from(&mut buf).await {
                    Ok(r) => r,
                    Err(_) => return,
                };
                assert_eq!(&buf[..len], OobCommand::Status.pack().as_slice());

                let now = outstanding.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);

                let sock = sock.clone();
                let outstanding = outstanding.clone();
                tokio::spawn(async move {
                    sleep(delay).await;
                    outstanding.fetch_sub(1, Ordering::SeqCst);
                    let _ = sock.send_to(reply, client).await;
                });
            }
        });

        peak_out
    }

    #[tokio::test]
    async fn probe_parses_status_reply() {
        let (sock, addr) = game_server().await;
        answer_with_delay(sock, STATUS_REPLY, Duration::ZERO);

        let probe = probe_with(4, 2000);
        let entry = probe
            .probe_one(addr, &CancellationToken::new())
            .await
            .unwrap()
            .into_entry()
            .unwrap();

        assert_eq!(entry.endpoint(), addr);
        assert_eq!(entry.hostname(), "Test Box");
        assert_eq!(entry.map(), "q2dm1");
        assert_eq!(entry.max_clients(), 8);
        assert_eq!(entry.current_players(), 2);
        assert_eq!(entry.players[1].name, "Bob");
        assert!(entry.ping.is_some());
        assert_eq!(probe.available_permits(), 4);
    }

    #[tokio::test]
    async fn status_reply_larger_than_4k_is_read_whole() {
        let (sock, addr) = game_server().await;
        let mut reply = b"\xFF\xFF\xFF\xFFprint\n\\hostname\\Crowded\\maxclients\\300\n".to_vec();
        for i in 0..300 {
            reply.extend_from_slice(format!("{i} 50 \"player_number_{i:03}\"\n").as_bytes());
        }
        assert!(reply.len() > 4096);
        answer_with_delay(sock, Box::leak(reply.into_boxed_slice()), Duration::ZERO);

        let entry = probe_with(1, 2000)
            .probe_one(addr, &CancellationToken::new())
            .await
            .unwrap()
            .into_entry()
            .unwrap();

        assert_eq!(entry.hostname(), "Crowded");
        assert_eq!(entry.current_players(), 300);
        assert_eq!(entry.players[299].name, "player_number_299");
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let (_sock, addr) = game_server().await;

        let probe = probe_with(2, 100);
        let outcome = probe.probe_one(addr, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, ProbeOutcome::TimedOut);
        assert_eq!(probe.available_permits(), 2);
    }

    #[tokio::test]
    async fn reply_without_header_is_discarded() {
        let (sock, addr) = game_server().await;
        answer_with_delay(sock, b"print\n\\hostname\\x\n", Duration::ZERO);

        let probe = probe_with(2, 2000);
        let outcome = probe.probe_one(addr, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, ProbeOutcome::NoResponse);
    }

    #[tokio::test]
    async fn cancelled_probe_is_distinct_from_timeout() {
        let (_sock, addr) = game_server().await;
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let probe = probe_with(1, 10_000);
        let outcome = probe.probe_one(addr, &cancel).await.unwrap();
        assert_eq!(outcome, ProbeOutcome::Cancelled);
        assert_eq!(probe.available_permits(), 1);
    }

    #[tokio::test]
    async fn closed_probe_rejects_calls() {
        let (_sock, addr) = game_server().await;
        let probe = probe_with(2, 100);
        probe.close();
        probe.close();

        let cancel = CancellationToken::new();
        assert!(matches!(
            probe.probe_one(addr, &cancel).await,
            Err(Q2QueryError::ProbeClosed)
        ));
        assert!(matches!(
            probe.probe_many(&[addr], &|_: ServerEntry| {}, &cancel).await,
            Err(Q2QueryError::ProbeClosed)
        ));
    }

    #[tokio::test]
    async fn in_flight_probes_never_exceed_cap() {
        let (sock, addr) = game_server().await;
        let peak = answer_with_delay(sock, STATUS_REPLY, Duration::from_millis(40));

        let probe = probe_with(3, 5000);
        let endpoints = vec![addr; 20];
        let reported = Mutex::new(Vec::new());
        let sink = |entry: ServerEntry| reported.lock().unwrap().push(entry);

        let results = probe
            .probe_many(&endpoints, &sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 20);
        assert_eq!(reported.lock().unwrap().len(), 20);
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 3, "peak in-flight was {peak}");
        assert_eq!(probe.available_permits(), 3);
    }

    #[tokio::test]
    async fn unresponsive_endpoints_are_omitted() {
        let (sock, live) = game_server().await;
        answer_with_delay(sock, STATUS_REPLY, Duration::ZERO);
        let (_silent, dead) = game_server().await;

        let probe = probe_with(4, 200);
        let results = probe
            .probe_many(&[dead, live, dead], &|_: ServerEntry| {}, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].endpoint(), live);
    }

    #[tokio::test]
    async fn cancelled_batch_returns_all_permits() {
        let (_sock, addr) = game_server().await;
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let probe = probe_with(2, 30_000);
        let started = Instant::now();
        let results = probe
            .probe_many(&vec![addr; 10], &|_: ServerEntry| {}, &cancel)
            .await
            .unwrap();

        assert!(results.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(probe.available_permits(), 2);
    }
}
