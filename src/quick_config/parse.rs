//! Decoding of `wg-quick` configuration text
//!
//! Line-oriented: a leading `# ` is stripped before anything else so that
//! comment-carried metadata takes part in parsing. Keys that `wg-quick`
//! would not recognise in `[Interface]` or `[Peer]` are routed into the
//! extras bucket under their section's name.

use std::path::Path;

use crate::tunnel::{InterfaceDescriptor, PeerDescriptor, Table};

use super::{CodecError, QuickConfig, INTERFACE_KEYS, PEER_KEYS};

/// Decode configuration text
///
/// # Errors
///
/// Returns `CodecError::InvalidConfig` for a line that is neither blank,
/// a `;` comment, a section header, nor a `key = value` pair.
pub fn decode(text: &str) -> Result<QuickConfig, CodecError> {
    let mut cfg = QuickConfig::default();
    // None until the first section header; top-level pairs land in the
    // extras bucket under an empty section name.
    let mut section: Option<String> = None;

    for raw in text.lines() {
        let line = raw.strip_prefix("# ").unwrap_or(raw).trim();

        if line.is_empty() || line.starts_with(';') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = Some(name.trim().to_string());
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(CodecError::InvalidConfig(raw.to_string()));
        };
        let (key, value) = (key.trim(), value.trim());

        match section.as_deref() {
            Some("Interface") if INTERFACE_KEYS.contains(&key) => {
                cfg.interface.push((key.to_string(), value.to_string()));
            }
            Some("Peer") if PEER_KEYS.contains(&key) => {
                cfg.peer.push((key.to_string(), value.to_string()));
            }
            Some(name) => cfg.push_extra(name, key, value),
            None => cfg.push_extra("", key, value),
        }
    }

    Ok(cfg)
}

/// Decode a configuration file
///
/// # Errors
///
/// Returns `CodecError::FileNotFound` when the path does not exist and
/// `CodecError::EmptyFile` when it holds nothing but whitespace.
pub fn decode_file(path: impl AsRef<Path>) -> Result<QuickConfig, CodecError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(CodecError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let text = std::fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Err(CodecError::EmptyFile);
    }

    decode(&text)
}

/// Reconstruct the local interface descriptor from a decoded config
///
/// `Address`, `ListenPort` and `PrivateKey` come from the `[Interface]`
/// pairs; `ID` and `PublicKey` from the `Interface` extras (they are not
/// canonical `wg-quick` keys, so decoding routed them there).
///
/// # Errors
///
/// Returns `CodecError::MissingRequiredKeys` naming every absent field,
/// or a field-specific error for malformed values.
pub fn decode_interface(cfg: &QuickConfig) -> Result<InterfaceDescriptor, CodecError> {
    let address = cfg.interface_value("Address");
    let listen_port = cfg.interface_value("ListenPort");
    let private_key = cfg.interface_value("PrivateKey");
    let id = cfg.first_in_extra("Interface", "ID");
    let public_key = cfg.first_in_extra("Interface", "PublicKey");

    let (address, listen_port, private_key, id, public_key) =
        match (address, listen_port, private_key, id, public_key) {
            (Some(a), Some(lp), Some(pk), Some(id), Some(pb)) => (a, lp, pk, id, pb),
            fields => {
                return Err(CodecError::MissingRequiredKeys(missing_keys(
                    &["Address", "ListenPort", "PrivateKey", "ID", "PublicKey"],
                    &[fields.0, fields.1, fields.2, fields.3, fields.4],
                )))
            }
        };

    let ip_address = address
        .split('/')
        .next()
        .unwrap_or(address)
        .parse()
        .map_err(|_| CodecError::Decode(format!("invalid interface address: {address}")))?;

    let table = match cfg.interface_value("Table") {
        Some(v) => v
            .parse::<Table>()
            .map_err(CodecError::Decode)?,
        None => Table::default(),
    };

    Ok(InterfaceDescriptor {
        id: id.to_string(),
        ip_address,
        port: parse_u16("ListenPort", listen_port)?,
        private_key: private_key.to_string(),
        public_key: public_key.to_string(),
        table,
    })
}

/// Reconstruct the peer descriptor from a decoded config
///
/// # Errors
///
/// Returns `CodecError::MissingRequiredKeys`,
/// `CodecError::InvalidAllowedIpsFormat` when `AllowedIPs` is not a single
/// `/32`, or `CodecError::InvalidEndpointFormat` when `Endpoint` is not
/// `host:port`.
pub fn decode_peer(cfg: &QuickConfig) -> Result<PeerDescriptor, CodecError> {
    let allowed_ips = cfg.peer_value("AllowedIPs");
    let public_key = cfg.peer_value("PublicKey");
    let endpoint = cfg.peer_value("Endpoint");
    let keepalive = cfg.peer_value("PersistentKeepalive");

    let (allowed_ips, public_key, endpoint, keepalive) =
        match (allowed_ips, public_key, endpoint, keepalive) {
            (Some(ips), Some(pk), Some(ep), Some(ka)) => (ips, pk, ep, ka),
            fields => {
                return Err(CodecError::MissingRequiredKeys(missing_keys(
                    &["AllowedIPs", "PublicKey", "Endpoint", "PersistentKeepalive"],
                    &[fields.0, fields.1, fields.2, fields.3],
                )))
            }
        };

    let ip_address = allowed_ips
        .strip_suffix("/32")
        .and_then(|ip| ip.parse().ok())
        .ok_or_else(|| CodecError::InvalidAllowedIpsFormat(allowed_ips.to_string()))?;

    let (host, port) = endpoint
        .rsplit_once(':')
        .and_then(|(host, port)| Some((host, port.parse::<u16>().ok()?)))
        .filter(|(host, _)| !host.is_empty())
        .ok_or_else(|| CodecError::InvalidEndpointFormat(endpoint.to_string()))?;

    Ok(PeerDescriptor {
        ip_address,
        endpoint: host.to_string(),
        port,
        public_key: public_key.to_string(),
        persistent_keepalive: parse_u16("PersistentKeepalive", keepalive)?,
    })
}

/// Names of the keys whose values are absent, in declaration order
fn missing_keys(names: &[&str], values: &[Option<&str>]) -> Vec<String> {
    names
        .iter()
        .zip(values)
        .filter(|(_, v)| v.is_none())
        .map(|(k, _)| (*k).to_string())
        .collect()
}

fn parse_u16(key: &str, value: &str) -> Result<u16, CodecError> {
    value.parse().map_err(|_| CodecError::InvalidInteger {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[Interface]
Address = 10.0.0.1
ListenPort = 8080
PrivateKey = 2PSyTqm+3rXzUK+T8jBhgZp9UHjFkgVZv4bXncWMyXY=
# ID = peridio-56X4U4Q
# PublicKey = Pu7ymHtDqF4X9VNjVj9mYFBh/z7LGxY6VQJAGiSEgTM=

[Peer]
AllowedIPs = 10.0.0.3/32
PublicKey = h2W8fjxUwZH+G8/Qp/H7kzn4SQz/EJIhOVFMh6mmtX4=
Endpoint = 10.0.0.2:8081
PersistentKeepalive = 25

# [Peridio]
# TunnelID = prn:1:f8a3bd07-583c-4e09-a3e4-4adb4d16d44c
# A = B
# A = C
";

    #[test]
    fn test_decode_sections_and_extras() {
        let cfg = decode(SAMPLE).unwrap();

        assert_eq!(cfg.interface.len(), 3);
        assert_eq!(cfg.interface_value("Address"), Some("10.0.0.1"));
        assert_eq!(cfg.interface_value("ListenPort"), Some("8080"));

        assert_eq!(cfg.peer.len(), 4);
        assert_eq!(cfg.peer_value("Endpoint"), Some("10.0.0.2:8081"));

        // The commented keys inside [Interface] moved to the extras bucket.
        assert_eq!(cfg.first_in_extra("Interface", "ID"), Some("peridio-56X4U4Q"));
        assert_eq!(
            cfg.first_in_extra("Interface", "PublicKey"),
            Some("Pu7ymHtDqF4X9VNjVj9mYFBh/z7LGxY6VQJAGiSEgTM=")
        );

        assert_eq!(
            cfg.tunnel_id(),
            Some("prn:1:f8a3bd07-583c-4e09-a3e4-4adb4d16d44c")
        );
        assert_eq!(cfg.get_in_extra("Peridio", "A"), vec![("A", "B"), ("A", "C")]);
    }

    #[test]
    fn test_decode_drops_semicolon_comments_and_blanks() {
        let cfg = decode("; header comment\n\n[Interface]\n; noise\nAddress = 10.0.0.1\n").unwrap();
        assert_eq!(cfg.interface, vec![("Address".to_string(), "10.0.0.1".to_string())]);
    }

    #[test]
    fn test_decode_rejects_malformed_line() {
        let err = decode("[Interface]\nthis is not a pair\n").unwrap_err();
        assert!(matches!(err, CodecError::InvalidConfig(_)));
    }

    #[test]
    fn test_decode_duplicate_canonical_keys_keep_order() {
        let cfg = decode(
            "[Interface]\nPreUp = echo one\nPreUp = echo two\nAddress = 10.0.0.1\n",
        )
        .unwrap();
        assert_eq!(
            cfg.interface,
            vec![
                ("PreUp".to_string(), "echo one".to_string()),
                ("PreUp".to_string(), "echo two".to_string()),
                ("Address".to_string(), "10.0.0.1".to_string()),
            ]
        );
    }

    #[test]
    fn test_decode_top_level_pair() {
        let cfg = decode("Orphan = value\n[Interface]\nAddress = 10.0.0.1\n").unwrap();
        assert_eq!(cfg.first_in_extra("", "Orphan"), Some("value"));
    }

    #[test]
    fn test_decode_file_missing_and_empty() {
        let err = decode_file("/nonexistent/path/peridio-XXX.conf").unwrap_err();
        assert!(matches!(err, CodecError::FileNotFound { .. }));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.conf");
        std::fs::write(&path, "\n  \n").unwrap();
        let err = decode_file(&path).unwrap_err();
        assert!(matches!(err, CodecError::EmptyFile));
    }

    #[test]
    fn test_decode_interface_descriptor() {
        let cfg = decode(SAMPLE).unwrap();
        let iface = decode_interface(&cfg).unwrap();
        assert_eq!(iface.id, "peridio-56X4U4Q");
        assert_eq!(iface.ip_address.to_string(), "10.0.0.1");
        assert_eq!(iface.port, 8080);
        assert_eq!(iface.table, Table::Auto);
    }

    #[test]
    fn test_decode_interface_missing_keys() {
        let cfg = decode("[Interface]\nAddress = 10.0.0.1\n").unwrap();
        let err = decode_interface(&cfg).unwrap_err();
        match err {
            CodecError::MissingRequiredKeys(keys) => {
                assert_eq!(keys, vec!["ListenPort", "PrivateKey", "ID", "PublicKey"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_decode_interface_invalid_port() {
        let cfg = decode(
            "[Interface]\nAddress = 10.0.0.1\nListenPort = lots\nPrivateKey = k\n# ID = peridio-A\n# PublicKey = p\n",
        )
        .unwrap();
        let err = decode_interface(&cfg).unwrap_err();
        assert!(matches!(err, CodecError::InvalidInteger { ref key, .. } if key == "ListenPort"));
    }

    #[test]
    fn test_decode_peer_descriptor() {
        let cfg = decode(SAMPLE).unwrap();
        let peer = decode_peer(&cfg).unwrap();
        assert_eq!(peer.ip_address.to_string(), "10.0.0.3");
        assert_eq!(peer.endpoint, "10.0.0.2");
        assert_eq!(peer.port, 8081);
        assert_eq!(peer.persistent_keepalive, 25);
    }

    #[test]
    fn test_decode_peer_bad_allowed_ips() {
        let cfg = decode(
            "[Peer]\nAllowedIPs = 10.0.0.0/24\nPublicKey = k\nEndpoint = h:1\nPersistentKeepalive = 25\n",
        )
        .unwrap();
        let err = decode_peer(&cfg).unwrap_err();
        assert!(matches!(err, CodecError::InvalidAllowedIpsFormat(_)));
    }

    #[test]
    fn test_decode_peer_bad_endpoint() {
        for endpoint in ["noport", "host:notanumber", ":8081"] {
            let cfg = decode(&format!(
                "[Peer]\nAllowedIPs = 10.0.0.3/32\nPublicKey = k\nEndpoint = {endpoint}\nPersistentKeepalive = 25\n"
            ))
            .unwrap();
            let err = decode_peer(&cfg).unwrap_err();
            assert!(
                matches!(err, CodecError::InvalidEndpointFormat(_)),
                "endpoint {endpoint:?} gave {err}"
            );
        }
    }
}
