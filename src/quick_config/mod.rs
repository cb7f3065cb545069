//! `wg-quick` configuration codec
//!
//! Round-trips `wg-quick` `.conf` files extended with application metadata.
//! Keys outside the standard `wg-quick` schema survive in the file as
//! `# `-prefixed lines: the comment marker is stripped before parsing and
//! re-applied on emit, so standard tooling ignores the metadata while this
//! codec preserves it.
//!
//! # Representation
//!
//! Sections are ordered sequences of `(key, value)` pairs — never maps.
//! Duplicate keys are meaningful (`PreUp` may repeat) and their order is
//! preserved through a decode/encode cycle.
//!
//! # Submodules
//!
//! - [`parse`]: text and file decoding, typed descriptor decoding
//! - [`emit`]: text encoding, typed descriptor encoding

mod emit;
mod parse;

pub use emit::encode;
pub use parse::{decode, decode_file, decode_interface, decode_peer};

/// Section name of the tunnel-identity extra section
pub const TUNNEL_SECTION: &str = "Peridio";

/// Key of the tunnel identifier inside [`TUNNEL_SECTION`]
pub const TUNNEL_ID_KEY: &str = "TunnelID";

/// Keys `wg-quick` itself understands in `[Interface]`
pub const INTERFACE_KEYS: &[&str] = &[
    "Address",
    "DNS",
    "MTU",
    "Table",
    "ListenPort",
    "PrivateKey",
    "PreUp",
    "PreDown",
    "PostUp",
    "PostDown",
    "SaveConfig",
];

/// Keys `wg-quick` itself understands in `[Peer]`
pub const PEER_KEYS: &[&str] = &[
    "AllowedIPs",
    "PublicKey",
    "Endpoint",
    "PersistentKeepalive",
    "PresharedKey",
];

/// Error types for configuration decoding
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Configuration file does not exist
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Configuration file exists but holds nothing
    #[error("Configuration file is empty")]
    EmptyFile,

    /// A line is neither a section header, a pair, nor a comment
    #[error("Invalid configuration line: {0}")]
    InvalidConfig(String),

    /// Required keys absent from the decoded config
    #[error("Missing required keys: {0:?}")]
    MissingRequiredKeys(Vec<String>),

    /// A numeric field failed to parse
    #[error("Invalid integer for {key}: {value}")]
    InvalidInteger { key: String, value: String },

    /// `Endpoint` is not `host:port`
    #[error("Invalid endpoint format: {0}")]
    InvalidEndpointFormat(String),

    /// `AllowedIPs` is not a single `/32` address
    #[error("Invalid AllowedIPs format: {0}")]
    InvalidAllowedIpsFormat(String),

    /// Any other decoding failure
    #[error("Failed to decode configuration: {0}")]
    Decode(String),

    /// I/O failure reading a configuration file
    #[error("I/O error reading configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// In-memory form of a `.conf` file
///
/// `interface` and `peer` hold the canonical pairs of their sections;
/// everything else — unknown keys found in those sections, and whole
/// non-standard sections — lives in `extra`, keyed by section name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuickConfig {
    /// Ordered `[Interface]` pairs
    pub interface: Vec<(String, String)>,
    /// Ordered `[Peer]` pairs
    pub peer: Vec<(String, String)>,
    /// Extra sections, in insertion order
    pub extra: Vec<(String, Vec<(String, String)>)>,
}

impl QuickConfig {
    /// All `(key, value)` pairs under `section`/`key` in the extras, in
    /// order; empty when either level is absent
    ///
    /// # Example
    ///
    /// ```
    /// use wg_fleet::quick_config::QuickConfig;
    ///
    /// let mut cfg = QuickConfig::default();
    /// cfg.extra.push((
    ///     "Peridio".into(),
    ///     vec![("A".into(), "B".into()), ("A".into(), "C".into())],
    /// ));
    /// let pairs = cfg.get_in_extra("Peridio", "A");
    /// assert_eq!(pairs, vec![("A", "B"), ("A", "C")]);
    /// ```
    #[must_use]
    pub fn get_in_extra(&self, section: &str, key: &str) -> Vec<(&str, &str)> {
        self.extra
            .iter()
            .filter(|(name, _)| name == section)
            .flat_map(|(_, pairs)| pairs.iter())
            .filter(|(k, _)| k == key)
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    /// First value under `section`/`key` in the extras
    #[must_use]
    pub fn first_in_extra(&self, section: &str, key: &str) -> Option<&str> {
        self.get_in_extra(section, key).first().map(|(_, v)| *v)
    }

    /// The tunnel identifier this config was written for, if present
    #[must_use]
    pub fn tunnel_id(&self) -> Option<&str> {
        self.first_in_extra(TUNNEL_SECTION, TUNNEL_ID_KEY)
    }

    /// First value for `key` among the `[Interface]` pairs
    #[must_use]
    pub fn interface_value(&self, key: &str) -> Option<&str> {
        first_value(&self.interface, key)
    }

    /// First value for `key` among the `[Peer]` pairs
    #[must_use]
    pub fn peer_value(&self, key: &str) -> Option<&str> {
        first_value(&self.peer, key)
    }

    /// Append a pair to an extra section, creating the section if needed
    pub fn push_extra(&mut self, section: &str, key: impl Into<String>, value: impl Into<String>) {
        let pair = (key.into(), value.into());
        match self.extra.iter_mut().find(|(name, _)| name == section) {
            Some((_, pairs)) => pairs.push(pair),
            None => self.extra.push((section.to_string(), vec![pair])),
        }
    }
}

fn first_value<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}
