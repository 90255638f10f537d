//! Tagged UDP address codec.
//!
//! Addresses appear in two forms on the wire:
//!
//! * **compact**: family byte, then 4 or 16 ip bytes, then a u16 port. Used
//!   in packets where space matters (relay updates, SDK packets).
//! * **fixed**: always [`ADDRESS_BYTES_FIXED`] bytes: family byte, 16 ip
//!   bytes (v4 occupies the first four), u16 port. Used inside tokens, where
//!   every hop record must have the same size.

use crate::error::{CodecError, CodecResult};
use crate::stream::{ReadStream, WriteStream};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

pub const ADDRESS_NONE: u8 = 0;
pub const ADDRESS_IPV4: u8 = 1;
pub const ADDRESS_IPV6: u8 = 2;

/// Size of the fixed-form address: family + 16 ip bytes + port.
pub const ADDRESS_BYTES_FIXED: usize = 1 + 16 + 2;

/// Compact form: family byte, ip bytes sized by family, port.
pub fn write_address(stream: &mut WriteStream<'_>, addr: Option<SocketAddr>) -> CodecResult<()> {
    match addr {
        None => stream.write_u8("address family", ADDRESS_NONE),
        Some(SocketAddr::V4(v4)) => {
            stream.write_u8("address family", ADDRESS_IPV4)?;
            stream.write_bytes("address ip", &v4.ip().octets())?;
            stream.write_u16("address port", v4.port())
        }
        Some(SocketAddr::V6(v6)) => {
            stream.write_u8("address family", ADDRESS_IPV6)?;
            stream.write_bytes("address ip", &v6.ip().octets())?;
            stream.write_u16("address port", v6.port())
        }
    }
}

pub fn read_address(stream: &mut ReadStream<'_>) -> CodecResult<Option<SocketAddr>> {
    let family = stream.read_u8("address family")?;
    match family {
        ADDRESS_NONE => Ok(None),
        ADDRESS_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_bytes("address ip", &mut octets)?;
            let port = stream.read_u16("address port")?;
            Ok(Some(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::from(octets)),
                port,
            )))
        }
        ADDRESS_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_bytes("address ip", &mut octets)?;
            let port = stream.read_u16("address port")?;
            Ok(Some(SocketAddr::new(
                IpAddr::V6(Ipv6Addr::from(octets)),
                port,
            )))
        }
        other => Err(CodecError::InvalidValue {
            field: "address family",
            value: other as u64,
        }),
    }
}

/// Fixed form: always [`ADDRESS_BYTES_FIXED`] bytes regardless of family.
pub fn write_address_fixed(
    stream: &mut WriteStream<'_>,
    addr: Option<SocketAddr>,
) -> CodecResult<()> {
    let mut ip = [0u8; 16];
    let (family, port) = match addr {
        None => (ADDRESS_NONE, 0),
        Some(SocketAddr::V4(v4)) => {
            ip[..4].copy_from_slice(&v4.ip().octets());
            (ADDRESS_IPV4, v4.port())
        }
        Some(SocketAddr::V6(v6)) => {
            ip.copy_from_slice(&v6.ip().octets());
            (ADDRESS_IPV6, v6.port())
        }
    };
    stream.write_u8("address family", family)?;
    stream.write_bytes("address ip", &ip)?;
    stream.write_u16("address port", port)
}

pub fn read_address_fixed(stream: &mut ReadStream<'_>) -> CodecResult<Option<SocketAddr>> {
    let family = stream.read_u8("address family")?;
    let mut ip = [0u8; 16];
    stream.read_bytes("address ip", &mut ip)?;
    let port = stream.read_u16("address port")?;
    match family {
        ADDRESS_NONE => Ok(None),
        ADDRESS_IPV4 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&ip[..4]);
            Ok(Some(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::from(octets)),
                port,
            )))
        }
        ADDRESS_IPV6 => Ok(Some(SocketAddr::new(
            IpAddr::V6(Ipv6Addr::from(ip)),
            port,
        ))),
        other => Err(CodecError::InvalidValue {
            field: "address family",
            value: other as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip_compact(addr: Option<SocketAddr>) {
        let mut buf = [0u8; 32];
        let mut writer = WriteStream::new(&mut buf);
        write_address(&mut writer, addr).unwrap();
        let written = writer.bytes_processed();
        let mut reader = ReadStream::new(&buf[..written]);
        assert_eq!(read_address(&mut reader).unwrap(), addr);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn compact_round_trips() {
        round_trip_compact(None);
        round_trip_compact(Some("10.2.3.4:40000".parse().unwrap()));
        round_trip_compact(Some("[2001:db8::1]:51000".parse().unwrap()));
    }

    #[test]
    fn fixed_form_is_fixed_size() {
        for addr in [
            None,
            Some("10.2.3.4:40000".parse().unwrap()),
            Some("[2001:db8::1]:51000".parse().unwrap()),
        ] {
            let mut buf = [0u8; 32];
            let mut writer = WriteStream::new(&mut buf);
            write_address_fixed(&mut writer, addr).unwrap();
            assert_eq!(writer.bytes_processed(), ADDRESS_BYTES_FIXED);
            let mut reader = ReadStream::new(&buf[..ADDRESS_BYTES_FIXED]);
            assert_eq!(read_address_fixed(&mut reader).unwrap(), addr);
        }
    }

    #[test]
    fn unknown_family_rejected() {
        let buf = [9u8; ADDRESS_BYTES_FIXED];
        let mut reader = ReadStream::new(&buf);
        assert!(matches!(
            read_address_fixed(&mut reader).unwrap_err(),
            CodecError::InvalidValue { value: 9, .. }
        ));
    }
}
