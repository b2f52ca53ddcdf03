use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref CVAR_PAIR: Regex = Regex::new(r"\\([^\\]+)\\([^\\]*)").unwrap();
    static ref PLAYER_LINE: Regex = Regex::new(r#"^(\d+)\s+(\d+)\s+"([^"]*)""#).unwrap();
}

const PRINT_PREFIX: &str = "print\n";

/// One row of a status reply's player list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerInfo {
    pub score: i32,
    pub ping: i32,
    /// Name as sent by the server, color escapes included.
    pub name: String,
}

/// A probed game server.
///
/// Hostname, map and friends are read from `cvars` on demand rather than stored twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEntry {
    pub address: Ipv4Addr,
    pub port: u16,
    /// Round trip of the status probe in milliseconds
    pub ping: Option<u32>,
    pub cvars: HashMap<String, String>,
    /// In the order the server listed them
    pub players: Vec<PlayerInfo>,
    /// Owned by whoever keeps the favorites list, never set here.
    pub is_favorite: bool,
    pub country_code: Option<String>,
}

impl ServerEntry {
    pub fn new(endpoint: SocketAddrV4) -> Self {
        ServerEntry {
            address: *endpoint.ip(),
            port: endpoint.port(),
            ping: None,
            cvars: HashMap::new(),
            players: Vec::new(),
            is_favorite: false,
            country_code: None,
        }
    }

    pub fn endpoint(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.address, self.port)
    }

    /// `address:port`, the key used to tell servers apart.
    pub fn full_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn hostname(&self) -> &str {
        self.cvar_or("hostname", "Unknown Server")
    }

    pub fn map(&self) -> &str {
        self.cvar_or("mapname", "Unknown")
    }

    pub fn game_mod(&self) -> &str {
        self.cvar_or("game", "baseq2")
    }

    /// `maxclients` as the server reported it, 0 when absent or not a number.
    pub fn max_clients(&self) -> i32 {
        self.cvars
            .get("maxclients")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn current_players(&self) -> usize {
        self.players.len()
    }

    fn cvar_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.cvars.get(key).map(String::as_str).unwrap_or(default)
    }
}

/// Decoded body of a `status` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusResponse {
    pub cvars: HashMap<String, String>,
    pub players: Vec<PlayerInfo>,
}

impl StatusResponse {
    /// Parse the text of a status reply with its OOB marker already removed.
    ///
    /// Layout is `print\n\key\value...\n<score> <ping> "<name>"\n...`. Malformed
    /// parts are skipped, so this never fails.
    pub fn parse(response: &str) -> StatusResponse {
        let remaining = match response.get(..PRINT_PREFIX.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(PRINT_PREFIX) => &response[PRINT_PREFIX.len()..],
            _ => response,
        };

        let (infostring, players_section) = match remaining.find('\n') {
            Some(idx) => (&remaining[..idx], &remaining[idx + 1..]),
            None => (remaining, ""),
        };

        let mut cvars = parse_infostring(infostring);
        if cvars.is_empty() && !infostring.is_empty() {
            log::debug!("no cvar pairs matched, splitting infostring manually: {infostring}");
            cvars = split_infostring(infostring);
        }

        let players = players_section
            .split('\n')
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(parse_player_line)
            .collect();

        StatusResponse { cvars, players }
    }

    /// Move the parsed data into an entry for `endpoint`.
    pub fn into_entry(self, endpoint: SocketAddrV4, ping: Option<u32>) -> ServerEntry {
        let mut entry = ServerEntry::new(endpoint);
        entry.ping = ping;
        entry.cvars = self.cvars;
        entry.players = self.players;
        entry
    }
}

fn parse_infostring(infostring: &str) -> HashMap<String, String> {
    let mut cvars: HashMap<String, String> = HashMap::new();
    for pair in CVAR_PAIR.captures_iter(infostring) {
        let key = &pair[1];
        if !key.is_empty() {
            cvars.insert(key.to_owned(), pair[2].to_owned());
        }
    }
    cvars
}

// Used when the infostring lacks the leading backslash the pair pattern needs.
fn split_infostring(infostring: &str) -> HashMap<String, String> {
    let parts: Vec<&str> = infostring.split('\\').filter(|p| !p.is_empty()).collect();
    parts
        .chunks(2)
        .map(|pair| {
            let value = pair.get(1).copied().unwrap_or_default();
            (pair[0].to_owned(), value.to_owned())
        })
        .collect()
}

fn parse_player_line(line: &str) -> Option<PlayerInfo> {
    if let Some(caps) = PLAYER_LINE.captures(line) {
        return Some(PlayerInfo {
            score: caps[1].parse().ok()?,
            ping: caps[2].parse().ok()?,
            name: caps[3].to_owned(),
        });
    }

    // some servers leave the name unquoted
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 3 {
        return None;
    }

    Some(PlayerInfo {
        score: parts[0].parse().ok()?,
        ping: parts[1].parse().ok()?,
        name: parts[2..].join(" ").trim_matches('"').to_owned(),
    })
}

/// Decode bytes as ASCII, anything above 0x7F becomes `?`.
pub fn ascii_lossy(data: &[u8]) -> String {
    data.iter()
        .map(|&b| if b.is_ascii() { b as char } else { '?' })
        .collect()
}
