//! WireGuard configuration file format (the `wg-quick` dialect).
//!
//! The `wg` applier persists every managed interface in this format and
//! reads it back on the next pass. Keys are case-insensitive, `#` starts a
//! comment, list values are comma separated.

use keymaster_types::{Endpoint, Interface, IpPrefix, ParseError, Peer, PresharedKey, PublicKey};

/// Renders an interface, secrets included.
pub fn render(iface: &Interface) -> String {
    let mut out = String::from("[Interface]\n");
    if let Some(key) = &iface.private_key {
        out.push_str(&format!("PrivateKey = {}\n", key));
    }
    if let Some(port) = iface.listen_port {
        out.push_str(&format!("ListenPort = {}\n", port));
    }
    if let Some(mark) = iface.fw_mark {
        out.push_str(&format!("FwMark = 0x{:x}\n", mark));
    }
    if !iface.addresses.is_empty() {
        out.push_str(&format!("Address = {}\n", join(&iface.addresses)));
    }

    for peer in iface.peers() {
        out.push_str("\n[Peer]\n");
        out.push_str(&format!("PublicKey = {}\n", peer.public_key));
        if let Some(psk) = &peer.preshared_key {
            out.push_str(&format!("PresharedKey = {}\n", psk));
        }
        out.push_str(&format!("AllowedIPs = {}\n", join(&peer.allowed_ips)));
        if let Some(endpoint) = &peer.endpoint {
            out.push_str(&format!("Endpoint = {}\n", endpoint));
        }
        if let Some(keepalive) = peer.persistent_keepalive {
            out.push_str(&format!("PersistentKeepalive = {}\n", keepalive));
        }
    }

    out
}

fn join<'a, T: std::fmt::Display + 'a>(items: impl IntoIterator<Item = &'a T>) -> String {
    items
        .into_iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Clone, Copy)]
enum Section {
    None,
    Interface,
    Peer,
}

#[derive(Default)]
struct PeerFields {
    public_key: Option<String>,
    preshared_key: Option<String>,
    allowed_ips: Vec<String>,
    endpoint: Option<String>,
    keepalive: Option<String>,
}

/// Parses a configuration file for the interface called `name`.
pub fn parse(name: &str, text: &str) -> Result<Interface, ParseError> {
    let invalid = |message: String| ParseError::InvalidInterface {
        interface: name.to_string(),
        message,
    };

    let mut iface = Interface::new(name)?;
    let mut section = Section::None;
    let mut pending: Option<PeerFields> = None;

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('[') {
            if let Some(fields) = pending.take() {
                iface.insert_peer(finish_peer(name, fields)?);
            }
            section = match line.to_ascii_lowercase().as_str() {
                "[interface]" => Section::Interface,
                "[peer]" => {
                    pending = Some(PeerFields::default());
                    Section::Peer
                }
                other => return Err(invalid(format!("unknown section {}", other))),
            };
            continue;
        }

        let (key, value) = line
            .split_once('=')
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim()))
            .ok_or_else(|| invalid(format!("line {}: expected 'Key = Value'", lineno + 1)))?;

        match (section, pending.as_mut()) {
            (Section::Interface, _) => match key.as_str() {
                "privatekey" => iface.private_key = Some(value.parse()?),
                "listenport" => {
                    iface.listen_port = Some(value.parse().map_err(|_| {
                        invalid(format!("line {}: bad ListenPort '{}'", lineno + 1, value))
                    })?)
                }
                "fwmark" => {
                    let mark = parse_fwmark(value).ok_or_else(|| {
                        invalid(format!("line {}: bad FwMark '{}'", lineno + 1, value))
                    })?;
                    iface.fw_mark = Some(mark).filter(|m| *m != 0);
                }
                "address" => {
                    for item in split_list(value) {
                        iface.addresses.insert(item.parse()?);
                    }
                }
                // other wg-quick keys (DNS, MTU, hooks) are not ours
                _ => {}
            },
            (Section::Peer, Some(fields)) => match key.as_str() {
                "publickey" => fields.public_key = Some(value.to_string()),
                "presharedkey" => fields.preshared_key = Some(value.to_string()),
                "allowedips" => fields
                    .allowed_ips
                    .extend(split_list(value).map(str::to_string)),
                "endpoint" => fields.endpoint = Some(value.to_string()),
                "persistentkeepalive" => fields.keepalive = Some(value.to_string()),
                _ => {}
            },
            _ => return Err(invalid(format!("line {}: key outside a section", lineno + 1))),
        }
    }

    if let Some(fields) = pending.take() {
        iface.insert_peer(finish_peer(name, fields)?);
    }

    Ok(iface)
}

fn finish_peer(name: &str, fields: PeerFields) -> Result<Peer, ParseError> {
    let public_key = fields
        .public_key
        .ok_or_else(|| ParseError::InvalidInterface {
            interface: name.to_string(),
            message: "[Peer] without PublicKey".to_string(),
        })?
        .parse::<PublicKey>()?;

    let allowed_ips = fields
        .allowed_ips
        .iter()
        .map(|s| s.parse::<IpPrefix>())
        .collect::<Result<Vec<_>, _>>()?;

    let keepalive = match fields.keepalive.as_deref() {
        None | Some("off") => None,
        Some(s) => Some(s.parse::<u16>().map_err(|_| ParseError::InvalidPeer {
            peer: public_key.to_string(),
            message: format!("bad PersistentKeepalive '{}'", s),
        })?),
    };

    Ok(Peer::new(public_key, allowed_ips)
        .with_endpoint(fields.endpoint.map(|e| e.parse::<Endpoint>()).transpose()?)
        .with_keepalive(keepalive)
        .with_preshared_key(
            fields
                .preshared_key
                .map(|k| k.parse::<PresharedKey>())
                .transpose()?,
        ))
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_fwmark(value: &str) -> Option<u32> {
    if value == "off" {
        return Some(0);
    }
    match value.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PRIV: &str = "dwdtCnMYpX08FsFyUbJmRd9ML4frwJkqsXf7pR25LCo=";
    const PEER_A: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";
    const PEER_B: &str = "TrMvSoP4jYQlY6RIzBgbssQqY3vxI2Pi+y71lOWWXX0=";

    fn sample() -> Interface {
        Interface::new("wg0")
            .unwrap()
            .with_private_key(Some(PRIV.parse().unwrap()))
            .with_listen_port(Some(51820))
            .with_fw_mark(Some(0x51820))
            .with_address("10.0.0.1/24".parse().unwrap())
            .with_address("fd00::1/64".parse().unwrap())
            .with_peer(
                Peer::new(PEER_A.parse().unwrap(), ["10.0.0.2/32".parse().unwrap()])
                    .with_endpoint(Some("vpn.example.com:51820".parse().unwrap()))
                    .with_keepalive(Some(25)),
            )
            .with_peer(
                Peer::new(
                    PEER_B.parse().unwrap(),
                    [
                        "10.0.0.3/32".parse().unwrap(),
                        "192.168.7.0/24".parse().unwrap(),
                    ],
                )
                .with_preshared_key(Some(PEER_A.parse().unwrap())),
            )
    }

    #[test]
    fn test_render_then_parse() {
        let iface = sample();
        let text = render(&iface);
        assert!(text.starts_with("[Interface]\nPrivateKey = "));
        assert!(text.contains("FwMark = 0x51820"));
        assert_eq!(parse("wg0", &text).unwrap(), iface);
    }

    #[test]
    fn test_parse_handwritten() {
        let text = format!(
            "# managed by hand\n\
             [interface]\n\
             privatekey={PRIV}\n\
             ListenPort = 51820\n\
             DNS = 1.1.1.1\n\
             \n\
             [Peer]\n\
             PublicKey = {PEER_A}  # laptop\n\
             AllowedIPs = 10.0.0.2/32,\t10.0.0.4/32\n\
             PersistentKeepalive = 0\n"
        );
        let iface = parse("wg0", &text).unwrap();
        assert_eq!(iface.listen_port, Some(51820));
        let peer = iface.peer(&PEER_A.parse().unwrap()).unwrap();
        assert_eq!(peer.allowed_ips.len(), 2);
        assert_eq!(peer.persistent_keepalive, None);
        assert_eq!(peer.endpoint, None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("wg0", "ListenPort = 1\n").is_err());
        assert!(parse("wg0", "[Interface]\nListenPort = many\n").is_err());
        assert!(parse("wg0", "[Peer]\nAllowedIPs = 10.0.0.2/32\n").is_err());
        assert!(parse("wg0", "[Bogus]\n").is_err());
    }
}
