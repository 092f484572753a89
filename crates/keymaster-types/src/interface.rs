//! Interface and Peer value types.

use crate::{Endpoint, IpPrefix, ParseError, PresharedKey, PrivateKey, PublicKey};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Maximum length of a Linux network device name (IFNAMSIZ - 1).
const MAX_IFNAME_LEN: usize = 15;

/// One remote endpoint reachable through an [`Interface`].
///
/// Identity is the public key; every other field is updatable in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPeer", into = "RawPeer")]
pub struct Peer {
    pub public_key: PublicKey,
    /// Absent for peers that only connect inbound.
    pub endpoint: Option<Endpoint>,
    pub allowed_ips: BTreeSet<IpPrefix>,
    /// Seconds between keepalives; `None` disables them.
    pub persistent_keepalive: Option<u16>,
    pub preshared_key: Option<PresharedKey>,
}

impl Peer {
    /// Creates a peer with no endpoint, keepalive or preshared key.
    pub fn new(public_key: PublicKey, allowed_ips: impl IntoIterator<Item = IpPrefix>) -> Self {
        Self {
            public_key,
            endpoint: None,
            allowed_ips: allowed_ips.into_iter().collect(),
            persistent_keepalive: None,
            preshared_key: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: Option<Endpoint>) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Sets the keepalive interval; `Some(0)` is stored as `None`.
    pub fn with_keepalive(mut self, seconds: Option<u16>) -> Self {
        self.persistent_keepalive = seconds.filter(|s| *s != 0);
        self
    }

    pub fn with_preshared_key(mut self, key: Option<PresharedKey>) -> Self {
        self.preshared_key = key;
        self
    }
}

#[derive(Serialize, Deserialize)]
struct RawPeer {
    public_key: PublicKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    endpoint: Option<Endpoint>,
    #[serde(default)]
    allowed_ips: Vec<IpPrefix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    persistent_keepalive: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    preshared_key: Option<PresharedKey>,
}

impl TryFrom<RawPeer> for Peer {
    type Error = ParseError;

    fn try_from(raw: RawPeer) -> Result<Self, Self::Error> {
        if raw.allowed_ips.is_empty() {
            return Err(ParseError::InvalidPeer {
                peer: raw.public_key.to_string(),
                message: "allowed_ips must not be empty".to_string(),
            });
        }
        Ok(Peer::new(raw.public_key, raw.allowed_ips)
            .with_endpoint(raw.endpoint)
            .with_keepalive(raw.persistent_keepalive)
            .with_preshared_key(raw.preshared_key))
    }
}

impl From<Peer> for RawPeer {
    fn from(peer: Peer) -> Self {
        Self {
            public_key: peer.public_key,
            endpoint: peer.endpoint,
            allowed_ips: peer.allowed_ips.into_iter().collect(),
            persistent_keepalive: peer.persistent_keepalive,
            preshared_key: peer.preshared_key,
        }
    }
}

/// One WireGuard tunnel interface, desired or actual.
///
/// Peers are a set keyed by public key, so peer order never matters.
/// `source_id` and `advertised_public_key` are supplier bookkeeping and take
/// no part in convergence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawInterface", into = "RawInterface")]
pub struct Interface {
    pub name: String,
    pub private_key: Option<PrivateKey>,
    /// `None` lets the kernel pick a port.
    pub listen_port: Option<u16>,
    pub fw_mark: Option<u32>,
    pub addresses: BTreeSet<IpPrefix>,
    peers: BTreeMap<PublicKey, Peer>,
    /// Identifier of the record this interface came from, if the supplier has one.
    pub source_id: Option<String>,
    /// Public key the supplier currently holds for this interface.
    pub advertised_public_key: Option<PublicKey>,
}

impl Interface {
    /// Creates an empty interface.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a legal network device name.
    pub fn new(name: impl Into<String>) -> Result<Self, ParseError> {
        let name = name.into();
        validate_interface_name(&name)?;
        Ok(Self {
            name,
            private_key: None,
            listen_port: None,
            fw_mark: None,
            addresses: BTreeSet::new(),
            peers: BTreeMap::new(),
            source_id: None,
            advertised_public_key: None,
        })
    }

    pub fn with_address(mut self, address: IpPrefix) -> Self {
        self.addresses.insert(address);
        self
    }

    pub fn with_private_key(mut self, key: Option<PrivateKey>) -> Self {
        self.private_key = key;
        self
    }

    pub fn with_listen_port(mut self, port: Option<u16>) -> Self {
        self.listen_port = port;
        self
    }

    /// Sets the firewall mark; `Some(0)` is stored as `None`.
    pub fn with_fw_mark(mut self, mark: Option<u32>) -> Self {
        self.fw_mark = mark.filter(|m| *m != 0);
        self
    }

    /// Adds a peer, replacing any peer with the same public key.
    pub fn with_peer(mut self, peer: Peer) -> Self {
        self.insert_peer(peer);
        self
    }

    pub fn with_source(mut self, id: Option<String>, advertised: Option<PublicKey>) -> Self {
        self.source_id = id;
        self.advertised_public_key = advertised;
        self
    }

    /// Inserts a peer keyed by its public key, returning the one it replaced.
    pub fn insert_peer(&mut self, peer: Peer) -> Option<Peer> {
        self.peers.insert(peer.public_key, peer)
    }

    pub fn remove_peer(&mut self, public_key: &PublicKey) -> Option<Peer> {
        self.peers.remove(public_key)
    }

    pub fn peer(&self, public_key: &PublicKey) -> Option<&Peer> {
        self.peers.get(public_key)
    }

    /// Iterates peers in public-key order.
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Returns a copy without supplier bookkeeping or secrets, suitable for logging.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.private_key = None;
        for peer in copy.peers.values_mut() {
            peer.preshared_key = None;
        }
        copy
    }
}

/// Checks that `name` is usable as a Linux network device name.
pub(crate) fn validate_interface_name(name: &str) -> Result<(), ParseError> {
    let invalid = |why: &str| ParseError::InvalidInterfaceName(format!("'{}': {}", name, why));

    if name.is_empty() {
        return Err(invalid("empty"));
    }
    if name.len() > MAX_IFNAME_LEN {
        return Err(invalid("longer than 15 bytes"));
    }
    if name == "." || name == ".." {
        return Err(invalid("reserved name"));
    }
    if name
        .chars()
        .any(|c| c == '/' || c == ':' || c.is_whitespace() || c.is_control())
    {
        return Err(invalid("contains '/', ':' or whitespace"));
    }
    Ok(())
}

#[derive(Serialize, Deserialize)]
struct RawInterface {
    name: String,
    #[serde(default)]
    addresses: Vec<IpPrefix>,
    #[serde(
        default,
        deserialize_with = "lenient_key",
        skip_serializing_if = "Option::is_none"
    )]
    private_key: Option<PrivateKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    listen_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fw_mark: Option<u32>,
    #[serde(default)]
    peers: Vec<Peer>,
    #[serde(
        rename = "id",
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    source_id: Option<String>,
    #[serde(
        rename = "public_key",
        default,
        deserialize_with = "lenient_key",
        skip_serializing_if = "Option::is_none"
    )]
    advertised_public_key: Option<PublicKey>,
}

impl TryFrom<RawInterface> for Interface {
    type Error = ParseError;

    fn try_from(raw: RawInterface) -> Result<Self, Self::Error> {
        let invalid = |message: String| ParseError::InvalidInterface {
            interface: raw.name.clone(),
            message,
        };

        if raw.addresses.is_empty() {
            return Err(invalid("at least one address is required".to_string()));
        }

        let mut iface = Interface::new(raw.name.clone())?
            .with_private_key(raw.private_key)
            .with_listen_port(raw.listen_port)
            .with_fw_mark(raw.fw_mark)
            .with_source(raw.source_id.clone(), raw.advertised_public_key);
        iface.addresses = raw.addresses.iter().copied().collect();

        for peer in raw.peers.iter().cloned() {
            let key = peer.public_key;
            if iface.insert_peer(peer).is_some() {
                return Err(invalid(format!("duplicate peer public key {}", key)));
            }
        }

        Ok(iface)
    }
}

impl From<Interface> for RawInterface {
    fn from(iface: Interface) -> Self {
        Self {
            name: iface.name,
            addresses: iface.addresses.into_iter().collect(),
            private_key: iface.private_key,
            listen_port: iface.listen_port,
            fw_mark: iface.fw_mark,
            peers: iface.peers.into_values().collect(),
            source_id: iface.source_id,
            advertised_public_key: iface.advertised_public_key,
        }
    }
}

/// Accepts a key, `null`, or an empty string (servers send `""` before a
/// key has ever been uploaded).
fn lenient_key<'de, D, K>(deserializer: D) -> Result<Option<K>, D::Error>
where
    D: Deserializer<'de>,
    K: std::str::FromStr<Err = ParseError>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }

    Ok(Option::<Id>::deserialize(deserializer)?.map(|id| match id {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    }))
}
