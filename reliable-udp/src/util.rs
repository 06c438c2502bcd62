//! Small helpers shared by the connection and transfer layers.

use std::net::{IpAddr, SocketAddr};

/// Render an address and port the way they appear in logs (`[v6]:port` for IPv6).
pub fn format_endpoint(addr: IpAddr, port: u16) -> String {
    SocketAddr::new(addr, port).to_string()
}

/// Interpret the `source_address` text carried on a SYN.
///
/// Returns `None` for missing, unparsable or unspecified (`0.0.0.0`, `::`)
/// addresses; the caller should then fall back to the datagram's origin.
pub fn parse_source_address(text: Option<&str>) -> Option<IpAddr> {
    text.and_then(|t| t.trim().parse::<IpAddr>().ok())
        .filter(|ip| !ip.is_unspecified())
}

/// Split `host:port` (or `[v6]:port`) into its parts.
pub fn split_host_port(text: &str) -> Option<(&str, u16)> {
    let (host, port) = text.rsplit_once(':')?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return None;
    }
    Some((host, port.parse().ok()?))
}

/// Cut `data` into consecutive chunks of at most `size` bytes.
///
/// An empty input yields no chunks.  `size` must be non-zero.
pub fn split_chunks(data: &[u8], size: usize) -> Vec<Vec<u8>> {
    debug_assert!(size > 0, "chunk size must be non-zero");
    data.chunks(size.max(1)).map(<[u8]>::to_vec).collect()
}

/// Concatenate chunks back into one buffer.
pub fn join_chunks<I>(chunks: I) -> Vec<u8>
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    chunks.into_iter().fold(Vec::new(), |mut out, chunk| {
        out.extend_from_slice(chunk.as_ref());
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn split_uneven_tail() {
        let chunks = split_chunks(b"ABCDEFGH", 3);
        assert_eq!(chunks, vec![b"ABC".to_vec(), b"DEF".to_vec(), b"GH".to_vec()]);
    }

    #[test]
    fn split_empty_is_empty() {
        assert!(split_chunks(b"", 4).is_empty());
    }

    #[test]
    fn join_reverses_split() {
        let data: Vec<u8> = (0..=255).collect();
        assert_eq!(join_chunks(split_chunks(&data, 7)), data);
    }

    #[test]
    fn endpoint_formatting_brackets_v6() {
        assert_eq!(format_endpoint(IpAddr::V4(Ipv4Addr::LOCALHOST), 80), "127.0.0.1:80");
        assert_eq!(format_endpoint(IpAddr::V6(Ipv6Addr::LOCALHOST), 80), "[::1]:80");
    }

    #[test]
    fn host_port_splitting() {
        assert_eq!(split_host_port("127.0.0.1:9000"), Some(("127.0.0.1", 9000)));
        assert_eq!(split_host_port("example.com:53"), Some(("example.com", 53)));
        assert_eq!(split_host_port("[::1]:80"), Some(("::1", 80)));
        assert_eq!(split_host_port("no-port"), None);
        assert_eq!(split_host_port(":80"), None);
        assert_eq!(split_host_port("host:99999"), None);
    }

    #[test]
    fn source_address_parsing() {
        assert_eq!(
            parse_source_address(Some("10.1.2.3")),
            Some(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)))
        );
        assert_eq!(parse_source_address(Some("0.0.0.0")), None);
        assert_eq!(parse_source_address(Some("not-an-ip")), None);
        assert_eq!(parse_source_address(None), None);
    }
}
