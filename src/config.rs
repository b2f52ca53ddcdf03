use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigurationError;
use crate::http::is_valid_http_url;

/// Settings read by the discovery clients and the prober.
///
/// Every setter validates its value, so a constructed configuration is always usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfiguration {
    master_server_address: String,
    master_server_port: u16,
    http_master_server_url: Option<String>,
    use_http_master_server: bool,
    enable_lan_broadcast: bool,
    max_concurrent_probes: usize,
    probe_timeout_ms: u64,
}

impl Default for ProbeConfiguration {
    fn default() -> Self {
        Self {
            master_server_address: "master.quake2.com".to_owned(),
            master_server_port: 27900,
            http_master_server_url: Some("http://q2servers.com/?raw=2".to_owned()),
            use_http_master_server: true,
            enable_lan_broadcast: true,
            max_concurrent_probes: 75,
            probe_timeout_ms: 3000,
        }
    }
}

impl ProbeConfiguration {
    pub const MAX_CONCURRENT_PROBES_LIMIT: usize = 200;
    pub const PROBE_TIMEOUT_LIMIT_MS: u64 = 60_000;

    /// Defaults overridden by any `Q2_*` variables present in the environment.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let mut config = Self::default();

        if let Ok(address) = env::var("Q2_MASTER_ADDRESS") {
            config.set_master_server_address(address)?;
        }
        if let Some(port) = env_parse::<u16>("Q2_MASTER_PORT")? {
            config.set_master_server_port(port)?;
        }
        if let Ok(url) = env::var("Q2_HTTP_MASTER_URL") {
            let url = if url.trim().is_empty() { None } else { Some(url) };
            config.set_http_master_server_url(url)?;
        }
        if let Some(flag) = env_parse::<bool>("Q2_USE_HTTP_MASTER")? {
            config.set_use_http_master_server(flag);
        }
        if let Some(flag) = env_parse::<bool>("Q2_LAN_BROADCAST")? {
            config.set_enable_lan_broadcast(flag);
        }
        if let Some(count) = env_parse::<usize>("Q2_MAX_CONCURRENT_PROBES")? {
            config.set_max_concurrent_probes(count)?;
        }
        if let Some(ms) = env_parse::<u64>("Q2_PROBE_TIMEOUT_MS")? {
            config.set_probe_timeout_ms(ms)?;
        }

        Ok(config)
    }

    pub fn master_server_address(&self) -> &str {
        &self.master_server_address
    }

    pub fn set_master_server_address(&mut self, address: impl Into<String>) -> Result<(), ConfigurationError> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err(ConfigurationError::EmptyMasterAddress);
        }
        self.master_server_address = address;
        Ok(())
    }

    pub fn master_server_port(&self) -> u16 {
        self.master_server_port
    }

    pub fn set_master_server_port(&mut self, port: u16) -> Result<(), ConfigurationError> {
        if port == 0 {
            return Err(ConfigurationError::InvalidPort);
        }
        self.master_server_port = port;
        Ok(())
    }

    pub fn http_master_server_url(&self) -> Option<&str> {
        self.http_master_server_url.as_deref()
    }

    /// `None` clears the URL; anything else must be an absolute http(s) URL.
    pub fn set_http_master_server_url(&mut self, url: Option<String>) -> Result<(), ConfigurationError> {
        if let Some(u) = &url {
            if !is_valid_http_url(u) {
                return Err(ConfigurationError::InvalidUrl(u.clone()));
            }
        }
        self.http_master_server_url = url;
        Ok(())
    }

    pub fn use_http_master_server(&self) -> bool {
        self.use_http_master_server
    }

    pub fn set_use_http_master_server(&mut self, flag: bool) {
        self.use_http_master_server = flag;
    }

    pub fn enable_lan_broadcast(&self) -> bool {
        self.enable_lan_broadcast
    }

    pub fn set_enable_lan_broadcast(&mut self, flag: bool) {
        self.enable_lan_broadcast = flag;
    }

    pub fn max_concurrent_probes(&self) -> usize {
        self.max_concurrent_probes
    }

    pub fn set_max_concurrent_probes(&mut self, count: usize) -> Result<(), ConfigurationError> {
        if !(1..=Self::MAX_CONCURRENT_PROBES_LIMIT).contains(&count) {
            return Err(ConfigurationError::InvalidMaxConcurrentProbes(count));
        }
        self.max_concurrent_probes = count;
        Ok(())
    }

    pub fn probe_timeout_ms(&self) -> u64 {
        self.probe_timeout_ms
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn set_probe_timeout_ms(&mut self, ms: u64) -> Result<(), ConfigurationError> {
        if !(1..=Self::PROBE_TIMEOUT_LIMIT_MS).contains(&ms) {
            return Err(ConfigurationError::InvalidProbeTimeout(ms));
        }
        self.probe_timeout_ms = ms;
        Ok(())
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>, ConfigurationError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigurationError::InvalidEnvValue {
                name: name.to_owned(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ProbeConfiguration::default();
        assert_eq!(config.master_server_address(), "master.quake2.com");
        assert_eq!(config.master_server_port(), 27900);
        assert_eq!(config.http_master_server_url(), Some("http://q2servers.com/?raw=2"));
        assert!(config.use_http_master_server());
        assert!(config.enable_lan_broadcast());
        assert_eq!(config.max_concurrent_probes(), 75);
        assert_eq!(config.probe_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut config = ProbeConfiguration::default();

        assert_eq!(config.set_master_server_port(0), Err(ConfigurationError::InvalidPort));
        assert_eq!(
            config.set_max_concurrent_probes(0),
            Err(ConfigurationError::InvalidMaxConcurrentProbes(0))
        );
        assert_eq!(
            config.set_max_concurrent_probes(201),
            Err(ConfigurationError::InvalidMaxConcurrentProbes(201))
        );
        assert_eq!(
            config.set_probe_timeout_ms(60_001),
            Err(ConfigurationError::InvalidProbeTimeout(60_001))
        );
        assert_eq!(
            config.set_master_server_address("  "),
            Err(ConfigurationError::EmptyMasterAddress)
        );

        // rejected values leave the previous ones in place
        assert_eq!(config, ProbeConfiguration::default());
    }

    #[test]
    fn accepts_boundaries() {
        let mut config = ProbeConfiguration::default();
        config.set_master_server_port(65535).unwrap();
        config.set_max_concurrent_probes(1).unwrap();
        config.set_max_concurrent_probes(200).unwrap();
        config.set_probe_timeout_ms(1).unwrap();
        config.set_probe_timeout_ms(60_000).unwrap();
        assert_eq!(config.max_concurrent_probes(), 200);
    }

    #[test]
    fn validates_http_url() {
        let mut config = ProbeConfiguration::default();
        assert!(matches!(
            config.set_http_master_server_url(Some("ftp://example.com/list".to_owned())),
            Err(ConfigurationError::InvalidUrl(_))
        ));
        assert!(config
            .set_http_master_server_url(Some("not a url".to_owned()))
            .is_err());

        config
            .set_http_master_server_url(Some("https://example.com/servers".to_owned()))
            .unwrap();
        assert_eq!(config.http_master_server_url(), Some("https://example.com/servers"));

        config.set_http_master_server_url(None).unwrap();
        assert_eq!(config.http_master_server_url(), None);
    }
}
