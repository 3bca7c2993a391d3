//! Peer-address and server-name helpers.

use crate::host::Host;
use crate::logging::StreamLogger;
use thiserror::Error;

/// Ports decoded from the 8-byte property must fit the signed 32-bit
/// range.
const MAX_PORT_VALUE: u64 = i32::MAX as u64;

/// Address decoding errors.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AddressError {
    /// The port property held fewer than 8 bytes.
    #[error("port property holds {0} bytes, expected at least 8")]
    ShortPortBytes(usize),

    /// The decoded port does not fit the signed 32-bit range.
    #[error("port value {0} exceeds the signed 32-bit range")]
    PortOutOfRange(u64),
}

/// Extract the virtual host from an `:authority` value.
///
/// Bracketed IPv6 literals lose their brackets and port; a plain
/// `host:port` loses the port; anything else is returned unchanged.
/// Idempotent: applying it twice changes nothing further.
pub fn parse_server_name(authority: &str) -> &str {
    if let Some(rest) = authority.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
        return authority;
    }
    match authority.split_once(':') {
        Some((host, port)) if !port.contains(':') => host,
        _ => authority,
    }
}

/// Split an `ip:port` address as the proxy reports it, bracketed IPv6
/// included.
fn split_host_port(address: &str) -> Option<(&str, &str)> {
    if let Some(rest) = address.strip_prefix('[') {
        let end = rest.find(']')?;
        let port = rest[end + 1..].strip_prefix(':')?;
        return Some((&rest[..end], port));
    }
    let (host, port) = address.split_once(':')?;
    if port.contains(':') {
        return None;
    }
    Some((host, port))
}

/// Decode the proxy's port property: an unsigned little-endian integer of
/// at least 8 bytes.
pub fn parse_port(bytes: &[u8]) -> Result<u32, AddressError> {
    if bytes.len() < 8 {
        return Err(AddressError::ShortPortBytes(bytes.len()));
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    let value = u64::from_le_bytes(raw);
    if value > MAX_PORT_VALUE {
        return Err(AddressError::PortOutOfRange(value));
    }
    Ok(value as u32)
}

/// Resolve the `<target>.address` and `<target>.port` properties for
/// `source` or `destination`. Failures are debug-logged and degrade to an
/// empty address or port 0; the engine is always called with whatever was
/// obtained.
pub fn peer_address(host: &impl Host, logger: &StreamLogger, target: &str) -> (String, u32) {
    let mut ip = String::new();
    let mut port_text: Option<String> = None;

    match host.get_property(&[target, "address"]) {
        Some(raw) => match String::from_utf8(raw) {
            Ok(address) => match split_host_port(&address) {
                Some((address_ip, address_port)) => {
                    ip = address_ip.to_string();
                    port_text = Some(address_port.to_string());
                }
                None => logger.debug(&format!(
                    "failed to parse {} address {:?}",
                    target, address
                )),
            },
            Err(_) => logger.debug(&format!("{} address is not valid utf-8", target)),
        },
        None => logger.debug(&format!("failed to get {} address", target)),
    }

    let port = match host.get_property(&[target, "port"]) {
        Some(raw) => match parse_port(&raw) {
            Ok(port) => port,
            Err(err) => {
                logger.debug(&format!("failed to parse {} port: {}", target, err));
                0
            }
        },
        // The port property is the reliable path on Envoy; other hosts
        // only give us the address string.
        None => match port_text {
            Some(text) => match text.parse() {
                Ok(port) => port,
                Err(_) => {
                    logger.debug(&format!("failed to parse {} port from address", target));
                    0
                }
            },
            None => 0,
        },
    };

    (ip, port)
}
