use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use tokio_util::sync::CancellationToken;

use crate::config::ProbeConfiguration;
use crate::error::Q2QueryError;
use crate::logger::{default_logger, Logger};
use crate::packet::{has_oob_header, OOB_HEADER};
use crate::parse::{parse_address_records, ADDRESS_RECORD_LEN};

/// Absolute URL with an `http` or `https` scheme.
pub fn is_valid_http_url(url: &str) -> bool {
    if url.trim().is_empty() {
        return false;
    }
    match Url::parse(url) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https") && parsed.has_host(),
        Err(_) => false,
    }
}

/// Wire layouts an HTTP master may answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFormat {
    /// `+<digits>` or `-<digits>` giving the record stride, then records.
    Prefixed,
    /// OOB marker followed by 6 byte records.
    OutOfBand,
    /// Bare 6 byte records.
    Raw,
}

impl ListFormat {
    pub fn detect(data: &[u8]) -> ListFormat {
        match data.first() {
            Some(b'+') | Some(b'-') => ListFormat::Prefixed,
            _ if has_oob_header(data) => ListFormat::OutOfBand,
            _ => ListFormat::Raw,
        }
    }
}

/// Decode an HTTP master body that already passed the error page checks.
pub fn decode_server_list(data: &[u8]) -> Vec<SocketAddrV4> {
    match ListFormat::detect(data) {
        ListFormat::Prefixed => decode_prefixed(data),
        ListFormat::OutOfBand => parse_address_records(&data[OOB_HEADER.len()..], 0, ADDRESS_RECORD_LEN),
        ListFormat::Raw => parse_address_records(data, 0, ADDRESS_RECORD_LEN),
    }
}

fn decode_prefixed(data: &[u8]) -> Vec<SocketAddrV4> {
    if data.len() <= 2 {
        return Vec::new();
    }

    let digits = data[1..].iter().take_while(|b| b.is_ascii_digit()).count();
    let stride = std::str::from_utf8(&data[1..1 + digits])
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|stride| *stride > 0 && *stride <= data.len());

    // an unusable size still skips the whole prefix and falls back to the usual record
    parse_address_records(data, 1 + digits, stride.unwrap_or(ADDRESS_RECORD_LEN))
}

fn looks_like_html(data: &[u8]) -> bool {
    let starts_with = |prefix: &[u8]| {
        data.len() >= prefix.len() && data[..prefix.len()].eq_ignore_ascii_case(prefix)
    };
    starts_with(b"<html") || starts_with(b"<!doctype")
}

fn is_textual_content_type(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    !ct.is_empty()
        && !ct.contains("octet-stream")
        && !ct.contains("application/")
        && (ct.contains("text/") || ct.contains("html"))
}

/// Fetches the server list from an HTTP mirror of the master directory.
pub struct HttpMasterClient {
    url: Option<String>,
    logger: Arc<dyn Logger>,
}

impl HttpMasterClient {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(config: &ProbeConfiguration) -> Self {
        HttpMasterClient {
            url: config.http_master_server_url().map(str::to_owned),
            logger: default_logger(),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// GET the configured URL and decode the address records in the body.
    ///
    /// Never fails: a missing URL, transport error, error page or cancellation all
    /// come back as an empty list.
    pub async fn query_servers(&self, cancel: &CancellationToken) -> Vec<SocketAddrV4> {
        let url = match self.url.as_deref() {
            Some(url) if is_valid_http_url(url) => url,
            Some(url) => {
                self.logger
                    .error(&Q2QueryError::InvalidUrl(url.to_owned()).to_string(), None);
                return Vec::new();
            }
            None => {
                self.logger
                    .warning("HTTP master server URL is not configured", None);
                return Vec::new();
            }
        };

        self.logger
            .info(&format!("Fetching server list from HTTP master: {url}"), None);

        let fetched = tokio::select! {
            _ = cancel.cancelled() => {
                self.logger.info("HTTP master server query cancelled", None);
                return Vec::new();
            }
            res = self.fetch(url) => res,
        };

        let (content_type, body) = match fetched {
            Ok(r) => r,
            Err(Q2QueryError::Http(e)) if e.is_timeout() => {
                self.logger
                    .warning("HTTP master server request timed out", None);
                return Vec::new();
            }
            Err(e) => {
                self.logger
                    .error("Error fetching HTTP master server", Some(&e.to_string()));
                return Vec::new();
            }
        };

        self.logger.info(
            &format!("Received {} bytes from HTTP master server", body.len()),
            Some(&format!("Content-Type: {content_type}")),
        );

        if body.is_empty() {
            self.logger
                .warning("HTTP master server returned empty response", None);
            return Vec::new();
        }
        if looks_like_html(&body) {
            self.logger.error(
                "HTTP master server returned HTML response (likely an error page). Check the URL.",
                None,
            );
            return Vec::new();
        }
        if is_textual_content_type(&content_type) {
            self.logger.error(
                &format!("HTTP master server returned unexpected content type: {content_type}. Expected binary data."),
                None,
            );
            return Vec::new();
        }

        let layout = ListFormat::detect(&body);
        let servers = decode_server_list(&body);
        self.logger.info(
            &format!("Parsed {} server(s) from HTTP master server", servers.len()),
            Some(&format!("{layout:?} format")),
        );
        servers
    }

    async fn fetch(&self, url: &str) -> Result<(String, Vec<u8>), Q2QueryError> {
        let client = Client::builder().timeout(Self::REQUEST_TIMEOUT).build()?;
        let response = client.get(url).send().await?.error_for_status()?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        let body = response.bytes().await?;

        Ok((content_type, body.to_vec()))
    }
}
