use std::net::{Ipv4Addr, SocketAddrV4};

use byteorder::{BigEndian, ByteOrder};

use crate::error::Q2QueryError;

/// Size of one address record: 4 address bytes followed by a 2 byte port.
pub const ADDRESS_RECORD_LEN: usize = 6;

/// Get 2 bytes (as a big-endian [u16]) at index `offset` from `data`.
pub fn read_u16_be(data: &[u8], offset: usize) -> Result<u16, Q2QueryError> {
    let end = offset
        .checked_add(2)
        .filter(|end| *end <= data.len())
        .ok_or(Q2QueryError::OffsetOutOfBounds {
            offset,
            len: data.len(),
        })?;

    Ok(BigEndian::read_u16(&data[offset..end]))
}

/// Decode the address record starting at `offset`.
///
/// Returns `None` when fewer than 6 bytes remain, which is what a scan over a
/// flat buffer hits at its tail. The 4 address bytes are already in dotted-quad order.
pub fn parse_server_address(data: &[u8], offset: usize) -> Option<SocketAddrV4> {
    let remaining = data.len().checked_sub(offset)?;
    if remaining < ADDRESS_RECORD_LEN {
        return None;
    }

    let ip = Ipv4Addr::new(
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    );
    let port = read_u16_be(data, offset + 4).ok()?;

    Some(SocketAddrV4::new(ip, port))
}

/// Decode consecutive records from `offset`, stepping `stride` bytes each time.
///
/// Stops once a full record no longer fits; trailing bytes are dropped.
pub fn parse_address_records(data: &[u8], mut offset: usize, stride: usize) -> Vec<SocketAddrV4> {
    let stride = if stride == 0 { ADDRESS_RECORD_LEN } else { stride };
    let mut servers: Vec<SocketAddrV4> = Vec::with_capacity(data.len() / stride);

    while offset.checked_add(stride).map_or(false, |end| end <= data.len()) {
        if let Some(addr) = parse_server_address(data, offset) {
            servers.push(addr);
        }
        offset += stride;
    }

    servers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian() {
        assert_eq!(read_u16_be(&[0x12, 0x34], 0).unwrap(), 0x1234);
        assert_eq!(read_u16_be(&[0x00, 0x00, 0xAB, 0xCD], 2).unwrap(), 0xABCD);
        assert_eq!(read_u16_be(&[0xFF, 0xFF], 0).unwrap(), u16::MAX);
    }

    #[test]
    fn read_past_end_fails() {
        let err = read_u16_be(&[0x01, 0x02], 1).unwrap_err();
        assert!(matches!(
            err,
            Q2QueryError::OffsetOutOfBounds { offset: 1, len: 2 }
        ));
        assert!(read_u16_be(&[], 0).is_err());
        assert!(read_u16_be(&[0x01, 0x02], usize::MAX).is_err());
    }

    #[test]
    fn parses_address_record() {
        let addr = parse_server_address(&[192, 168, 1, 1, 0x6C, 0xFC], 0).unwrap();
        assert_eq!(*addr.ip(), Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(addr.port(), 27900);

        let addr = parse_server_address(&[0x00, 0x00, 10, 0, 0, 1, 0x07, 0x0A], 2).unwrap();
        assert_eq!(addr, "10.0.0.1:1802".parse().unwrap());
    }

    #[test]
    fn short_record_is_none() {
        assert_eq!(parse_server_address(&[192, 168, 1], 0), None);
        assert_eq!(parse_server_address(&[192, 168, 1, 1, 0x6C, 0xFC], 1), None);
        assert_eq!(parse_server_address(&[192, 168, 1, 1, 0x6C, 0xFC], 7), None);
    }

    #[test]
    fn records_drop_trailing_partial() {
        let data = [
            127, 0, 0, 1, 0x6D, 0x06, // 127.0.0.1:27910
            10, 0, 0, 2, 0x6D, 0x07, // 10.0.0.2:27911
            1, 2, 3,
        ];
        let servers = parse_address_records(&data, 0, ADDRESS_RECORD_LEN);
        assert_eq!(
            servers,
            vec![
                "127.0.0.1:27910".parse().unwrap(),
                "10.0.0.2:27911".parse().unwrap()
            ]
        );
    }

    #[test]
    fn huge_stride_stops_without_wrapping() {
        let data = [127, 0, 0, 1, 0x6D, 0x06, 10, 0, 0, 2, 0x6D, 0x07];
        assert!(parse_address_records(&data, 2, usize::MAX).is_empty());
        assert!(parse_address_records(&data, usize::MAX, ADDRESS_RECORD_LEN).is_empty());
    }
}
