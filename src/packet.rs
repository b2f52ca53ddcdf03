use std::borrow::Cow;

/// Every connectionless Quake II packet starts with these 4 bytes, in both directions.
pub const OOB_HEADER: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

/// Receive buffer size, large enough for any UDP datagram.
pub const MAX_DATAGRAM: usize = 65_536;

/// Does `data` start with the out-of-band marker?
pub fn has_oob_header(data: &[u8]) -> bool {
    data.len() >= OOB_HEADER.len() && data[..OOB_HEADER.len()] == OOB_HEADER
}

/// Returns a new buffer holding the marker followed by `data`.
pub fn prepend_oob_header(data: &[u8]) -> Vec<u8> {
    let mut packet: Vec<u8> = Vec::with_capacity(OOB_HEADER.len() + data.len());
    packet.extend_from_slice(&OOB_HEADER);
    packet.extend_from_slice(data);
    packet
}

/// Strips the marker if it is present.
///
/// Without a marker the input slice itself is handed back, no copy is made.
pub fn remove_oob_header(data: &[u8]) -> Cow<'_, [u8]> {
    if has_oob_header(data) {
        Cow::Owned(data[OOB_HEADER.len()..].to_vec())
    } else {
        Cow::Borrowed(data)
    }
}

/// Out-of-band commands this crate sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OobCommand {
    /// Master server list request.
    GetServers,
    /// Game server status request, also used for LAN broadcast.
    Status,
}

impl OobCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            OobCommand::GetServers => "getservers quake2 34",
            OobCommand::Status => "status",
        }
    }

    /// Serializes the command into a framed packet.
    pub fn pack(&self) -> Vec<u8> {
        prepend_oob_header(self.as_str().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn detects_header() {
        assert!(has_oob_header(&[0xFF, 0xFF, 0xFF, 0xFF]));
        assert!(has_oob_header(&[0xFF, 0xFF, 0xFF, 0xFF, b'p']));
        assert!(!has_oob_header(&[0xFF, 0xFF, 0xFF]));
        assert!(!has_oob_header(&[]));
        assert!(!has_oob_header(&[0xFF, 0xFF, 0xFE, 0xFF, 0x00]));
    }

    #[test]
    fn remove_without_header_borrows_input() {
        let data = [b's', b't', b'a'];
        match remove_oob_header(&data) {
            Cow::Borrowed(slice) => assert!(std::ptr::eq(slice, &data[..])),
            Cow::Owned(_) => panic!("expected the input slice back"),
        }
    }

    #[test]
    fn remove_bare_header_is_empty() {
        assert!(remove_oob_header(&OOB_HEADER).is_empty());
    }

    #[test]
    fn commands_are_framed() {
        assert_eq!(OobCommand::Status.pack(), b"\xFF\xFF\xFF\xFFstatus".to_vec());
        assert_eq!(
            OobCommand::GetServers.pack(),
            b"\xFF\xFF\xFF\xFFgetservers quake2 34".to_vec()
        );
    }

    proptest! {
        #[test]
        fn prepend_then_remove_is_identity(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let framed = prepend_oob_header(&data);
            prop_assert!(has_oob_header(&framed));
            let stripped = remove_oob_header(&framed);
            prop_assert_eq!(stripped.as_ref(), data.as_slice());
        }
    }
}
