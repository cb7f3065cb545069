//! Encoding of `wg-quick` configuration text
//!
//! Canonical keys print bare; everything else prints behind `# ` so that
//! `wg-quick` ignores it and [`super::parse`] recovers it. Sections are
//! separated by one blank line in the order Interface, Peer, extras.

use crate::tunnel::{InterfaceDescriptor, PeerDescriptor, Table, TunnelOptions};

use super::{QuickConfig, INTERFACE_KEYS, PEER_KEYS};

/// Encode a config to `.conf` text
#[must_use]
pub fn encode(cfg: &QuickConfig) -> String {
    let mut sections: Vec<(&str, &[(String, String)])> = Vec::new();
    if !cfg.interface.is_empty() {
        sections.push(("Interface", &cfg.interface));
    }
    if !cfg.peer.is_empty() {
        sections.push(("Peer", &cfg.peer));
    }
    for (name, pairs) in &cfg.extra {
        sections.push((name, pairs));
    }

    let mut out = String::new();
    for (i, (name, pairs)) in sections.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        match *name {
            "Interface" | "Peer" => out.push_str(&format!("[{name}]\n")),
            // Top-level pairs carry no header at all.
            "" => {}
            _ => out.push_str(&format!("# [{name}]\n")),
        }

        let canonical: &[&str] = match *name {
            "Interface" => INTERFACE_KEYS,
            "Peer" => PEER_KEYS,
            _ => &[],
        };
        for (key, value) in *pairs {
            if canonical.contains(&key.as_str()) {
                out.push_str(&format!("{key} = {value}\n"));
            } else {
                out.push_str(&format!("# {key} = {value}\n"));
            }
        }
    }
    out
}

impl QuickConfig {
    /// Assemble the config for one tunnel
    ///
    /// The interface pairs carry `Address`, `ListenPort`, `PrivateKey` and
    /// then the non-canonical `ID` and `PublicKey` (which the emitter
    /// comment-prefixes), followed by any `[Interface]` hooks from the
    /// options. `Table` is written only when it differs from the default.
    /// The options' extra sections are appended verbatim.
    #[must_use]
    pub fn from_parts(
        interface: &InterfaceDescriptor,
        peer: &PeerDescriptor,
        opts: &TunnelOptions,
    ) -> Self {
        let mut interface_pairs = vec![
            ("Address".to_string(), interface.ip_address.to_string()),
            ("ListenPort".to_string(), interface.port.to_string()),
        ];
        if interface.table != Table::Auto {
            interface_pairs.push(("Table".to_string(), interface.table.to_string()));
        }
        interface_pairs.push(("PrivateKey".to_string(), interface.private_key.clone()));
        interface_pairs.push(("ID".to_string(), interface.id.clone()));
        interface_pairs.push(("PublicKey".to_string(), interface.public_key.clone()));
        interface_pairs.extend(opts.hooks.iter().cloned());

        let peer_pairs = vec![
            ("AllowedIPs".to_string(), format!("{}/32", peer.ip_address)),
            ("PublicKey".to_string(), peer.public_key.clone()),
            ("Endpoint".to_string(), peer.endpoint_addr()),
            (
                "PersistentKeepalive".to_string(),
                peer.persistent_keepalive.to_string(),
            ),
        ];

        Self {
            interface: interface_pairs,
            peer: peer_pairs,
            extra: opts.extra.clone(),
        }
    }
}
