//! OpenWrt UCI applier.
//!
//! WireGuard interfaces live in the `network` package as sections with
//! `proto 'wireguard'`; their peers are sections of type
//! `wireguard_<interface>`. An interface is always rewritten as a whole
//! through one `uci batch` script, then committed and brought up with
//! `ifup`. Every operation holds one lock because all of them edit the same
//! package.
//!
//! Only interfaces carrying `option keymaster '1'` are read back or removed;
//! WireGuard interfaces configured by hand are left alone unless desired
//! state names them.

use std::collections::BTreeMap;

use keymaster_common::{KeymasterError, KeymasterResult};
use keymaster_types::{
    Endpoint, Interface, InterfaceDelta, IpPrefix, ParseError, Peer, PresharedKey, PrivateKey,
    PublicKey,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::host::HostShell;
use crate::commands::*;

/// Port netifd uses when a peer has `endpoint_host` but no `endpoint_port`.
const DEFAULT_ENDPOINT_PORT: u16 = 51820;

/// Option marking an interface section as written by this daemon.
const MANAGED_OPTION: &str = "keymaster";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Section {
    kind: String,
    options: BTreeMap<String, Vec<String>>,
}

impl Section {
    fn get(&self, option: &str) -> Option<&str> {
        self.options
            .get(option)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    fn list(&self, option: &str) -> &[String] {
        self.options.get(option).map(Vec::as_slice).unwrap_or(&[])
    }

    fn is_managed_wireguard(&self) -> bool {
        self.kind == "interface"
            && self.get("proto") == Some("wireguard")
            && self.get(MANAGED_OPTION) == Some("1")
    }
}

/// Parsed `uci show network`, keyed by section name.
type Sections = BTreeMap<String, Section>;

pub struct UciApplier {
    lock: Mutex<()>,
    shell: HostShell,
}

impl Default for UciApplier {
    fn default() -> Self {
        Self::new()
    }
}

impl UciApplier {
    pub fn new() -> Self {
        info!("UciApplier initialized");
        Self {
            lock: Mutex::new(()),
            shell: HostShell::new(),
        }
    }

    #[cfg(test)]
    fn new_mock() -> Self {
        Self {
            lock: Mutex::new(()),
            shell: HostShell::new_mock(),
        }
    }

    pub fn name(&self) -> &str {
        "uci"
    }

    async fn show(&self) -> KeymasterResult<Sections> {
        let output = self.shell.run(&build_uci_show_cmd()).await?;
        Ok(parse_show(&output))
    }

    pub async fn read_current(&self) -> KeymasterResult<Vec<Interface>> {
        let _guard = self.lock.lock().await;
        let sections = self.show().await?;
        Ok(interfaces_from(&sections))
    }

    pub async fn apply(&self, desired: &Interface) -> KeymasterResult<()> {
        validate_section_name(&desired.name)?;
        let private_key = desired
            .private_key
            .ok_or_else(|| KeymasterError::missing_private_key(&desired.name))?;

        let _guard = self.lock.lock().await;
        let sections = self.show().await?;

        let current = interfaces_from(&sections)
            .into_iter()
            .find(|i| i.name == desired.name);
        if let Some(actual) = &current {
            if actual.private_key == Some(private_key)
                && InterfaceDelta::between(desired, actual).is_empty()
            {
                return Ok(());
            }
        }

        info!(
            interface = %desired.name,
            existing = current.is_some(),
            "Writing UCI interface"
        );
        let script = build_write_script(desired, &sections);
        self.shell
            .run_with_input(&build_uci_batch_cmd(), &script)
            .await?;
        self.shell.run(&build_uci_commit_cmd()).await?;
        self.shell.run(&build_ifup_cmd(&desired.name)).await?;
        Ok(())
    }

    pub async fn remove(&self, name: &str) -> KeymasterResult<()> {
        let _guard = self.lock.lock().await;
        let sections = self.show().await?;
        if !sections.get(name).is_some_and(Section::is_managed_wireguard) {
            return Ok(());
        }

        info!(interface = %name, "Deleting UCI interface");
        let down = self.shell.try_run(&build_ifdown_cmd(name)).await?;
        if !down.success() {
            warn!(interface = %name, output = %down.combined_output(), "ifdown failed");
        }

        let mut script = String::new();
        for section in owned_sections(name, &sections) {
            script.push_str(&format!("delete network.{}\n", section));
        }
        self.shell
            .run_with_input(&build_uci_batch_cmd(), &script)
            .await?;
        self.shell.run(&build_uci_commit_cmd()).await?;
        Ok(())
    }
}

fn validate_section_name(name: &str) -> KeymasterResult<()> {
    if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(ParseError::InvalidInterfaceName(format!(
            "'{}': UCI section names allow only letters, digits and '_'",
            name
        ))
        .into())
    }
}

/// The interface section and its peer sections.
fn owned_sections<'a>(name: &'a str, sections: &'a Sections) -> Vec<&'a str> {
    let peer_kind = format!("wireguard_{}", name);
    let mut owned: Vec<&str> = sections
        .iter()
        .filter(|(_, s)| s.kind == peer_kind)
        .map(|(n, _)| n.as_str())
        .collect();
    if sections.contains_key(name) {
        owned.insert(0, name);
    }
    owned
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn build_write_script(iface: &Interface, sections: &Sections) -> String {
    let name = &iface.name;
    let mut lines = Vec::new();

    for section in owned_sections(name, sections) {
        lines.push(format!("delete network.{}", section));
    }

    lines.push(format!("set network.{}=interface", name));
    lines.push(format!("set network.{}.proto='wireguard'", name));
    lines.push(format!("set network.{}.{}='1'", name, MANAGED_OPTION));
    if let Some(key) = &iface.private_key {
        lines.push(format!("set network.{}.private_key={}", name, quote(&key.to_base64())));
    }
    if let Some(port) = iface.listen_port {
        lines.push(format!("set network.{}.listen_port='{}'", name, port));
    }
    if let Some(mark) = iface.fw_mark {
        lines.push(format!("set network.{}.fwmark='0x{:x}'", name, mark));
    }
    for address in &iface.addresses {
        lines.push(format!("add_list network.{}.addresses='{}'", name, address));
    }

    for (i, peer) in iface.peers().enumerate() {
        let section = format!("{}_peer{}", name, i);
        lines.push(format!("set network.{}=wireguard_{}", section, name));
        lines.push(format!(
            "set network.{}.public_key={}",
            section,
            quote(&peer.public_key.to_base64())
        ));
        for allowed in &peer.allowed_ips {
            lines.push(format!("add_list network.{}.allowed_ips='{}'", section, allowed));
        }
        if let Some(endpoint) = &peer.endpoint {
            lines.push(format!(
                "set network.{}.endpoint_host={}",
                section,
                quote(endpoint.host())
            ));
            lines.push(format!(
                "set network.{}.endpoint_port='{}'",
                section,
                endpoint.port()
            ));
        }
        if let Some(keepalive) = peer.persistent_keepalive {
            lines.push(format!(
                "set network.{}.persistent_keepalive='{}'",
                section, keepalive
            ));
        }
        if let Some(psk) = &peer.preshared_key {
            lines.push(format!(
                "set network.{}.preshared_key={}",
                section,
                quote(&psk.to_base64())
            ));
        }
    }

    let mut script = lines.join("\n");
    script.push('\n');
    script
}

/// Parses `uci show network` output.
fn parse_show(output: &str) -> Sections {
    let mut sections = Sections::new();

    for line in output.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let mut parts = key.splitn(3, '.');
        let (Some("network"), Some(section)) = (parts.next(), parts.next()) else {
            continue;
        };
        if section.starts_with('@') {
            // anonymous sections are never ours
            continue;
        }

        let entry = sections.entry(section.to_string()).or_default();
        match parts.next() {
            None => entry.kind = value.trim().to_string(),
            Some(option) => {
                entry
                    .options
                    .insert(option.to_string(), split_values(value));
            }
        }
    }

    sections
}

/// Splits a `uci show` value into its list items (`'a' 'b'` => [a, b]).
fn split_values(value: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;
    let mut chars = value.trim().chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                quoted = !quoted;
                in_token = true;
            }
            '\\' if !quoted => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    in_token = true;
                }
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    values.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        values.push(current);
    }
    values
}

fn interfaces_from(sections: &Sections) -> Vec<Interface> {
    sections
        .iter()
        .filter(|(_, s)| s.is_managed_wireguard())
        .filter_map(|(name, section)| match interface_from(name, section, sections) {
            Ok(iface) => Some(iface),
            Err(e) => {
                warn!(interface = %name, error = %e, "Skipping unreadable UCI interface");
                None
            }
        })
        .collect()
}

fn interface_from(name: &str, section: &Section, sections: &Sections) -> Result<Interface, ParseError> {
    let invalid = |message: String| ParseError::InvalidInterface {
        interface: name.to_string(),
        message,
    };

    let mut iface = Interface::new(name)?;
    iface.private_key = section
        .get("private_key")
        .map(str::parse::<PrivateKey>)
        .transpose()?;
    iface.listen_port = section
        .get("listen_port")
        .map(|p| p.parse::<u16>().map_err(|_| invalid(format!("bad listen_port '{}'", p))))
        .transpose()?;
    if let Some(mark) = section.get("fwmark") {
        let parsed = match mark.strip_prefix("0x") {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => mark.parse(),
        }
        .map_err(|_| invalid(format!("bad fwmark '{}'", mark)))?;
        iface = iface.with_fw_mark(Some(parsed));
    }
    for address in section.list("addresses") {
        iface.addresses.insert(address.parse::<IpPrefix>()?);
    }

    let peer_kind = format!("wireguard_{}", name);
    for (peer_name, peer_section) in sections.iter().filter(|(_, s)| s.kind == peer_kind) {
        match peer_from(peer_name, peer_section) {
            Ok(peer) => {
                iface.insert_peer(peer);
            }
            Err(e) => {
                warn!(interface = %name, section = %peer_name, error = %e, "Skipping unreadable UCI peer");
            }
        }
    }

    Ok(iface)
}

fn peer_from(name: &str, section: &Section) -> Result<Peer, ParseError> {
    let invalid = |message: String| ParseError::InvalidPeer {
        peer: name.to_string(),
        message,
    };
    let public_key = section
        .get("public_key")
        .ok_or_else(|| invalid("missing public_key".to_string()))?
        .parse::<PublicKey>()?;

    let allowed_ips = section
        .list("allowed_ips")
        .iter()
        .map(|a| a.parse::<IpPrefix>())
        .collect::<Result<Vec<_>, _>>()?;

    let endpoint = match section.get("endpoint_host") {
        Some(host) => {
            let port = match section.get("endpoint_port") {
                Some(p) => p
                    .parse::<u16>()
                    .map_err(|_| ParseError::InvalidEndpoint(format!("{}:{}", host, p)))?,
                None => DEFAULT_ENDPOINT_PORT,
            };
            Some(Endpoint::new(host, port)?)
        }
        None => None,
    };

    let keepalive = section
        .get("persistent_keepalive")
        .map(|k| {
            k.parse::<u16>()
                .map_err(|_| invalid(format!("bad persistent_keepalive '{}'", k)))
        })
        .transpose()?;

    Ok(Peer::new(public_key, allowed_ips)
        .with_endpoint(endpoint)
        .with_keepalive(keepalive)
        .with_preshared_key(
            section
                .get("preshared_key")
                .map(str::parse::<PresharedKey>)
                .transpose()?,
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PRIV: &str = "dwdtCnMYpX08FsFyUbJmRd9ML4frwJkqsXf7pR25LCo=";
    const P1: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";

    fn show_output() -> String {
        format!(
            "network.loopback=interface\n\
             network.loopback.proto='static'\n\
             network.loopback.ipaddr='127.0.0.1'\n\
             network.@rule[0]=rule\n\
             network.wg0=interface\n\
             network.wg0.proto='wireguard'\n\
             network.wg0.keymaster='1'\n\
             network.wg0.private_key='{PRIV}'\n\
             network.wg0.listen_port='51820'\n\
             network.wg0.addresses='10.0.0.1/24' 'fd00::1/64'\n\
             network.wg0_peer0=wireguard_wg0\n\
             network.wg0_peer0.public_key='{P1}'\n\
             network.wg0_peer0.allowed_ips='10.0.0.2/32'\n\
             network.wg0_peer0.endpoint_host='198.51.100.7'\n\
             network.wg0_peer0.persistent_keepalive='25'\n\
             network.home=interface\n\
             network.home.proto='wireguard'\n\
             network.home.private_key='{PRIV}'\n\
             network.home.addresses='10.9.0.1/24'\n\
             network.home_peer=wireguard_home\n\
             network.home_peer.public_key='{P1}'\n"
        )
    }

    fn wg0() -> Interface {
        Interface::new("wg0")
            .unwrap()
            .with_private_key(Some(PRIV.parse().unwrap()))
            .with_listen_port(Some(51820))
            .with_address("10.0.0.1/24".parse().unwrap())
            .with_address("fd00::1/64".parse().unwrap())
            .with_peer(
                Peer::new(P1.parse().unwrap(), ["10.0.0.2/32".parse().unwrap()])
                    .with_endpoint(Some(Endpoint::new("198.51.100.7", 51820).unwrap()))
                    .with_keepalive(Some(25)),
            )
    }

    #[test]
    fn test_split_values() {
        assert_eq!(split_values("'a'"), vec!["a"]);
        assert_eq!(split_values("'a' 'b c'"), vec!["a", "b c"]);
        assert_eq!(split_values(r"'it'\''s'"), vec!["it's"]);
        assert!(split_values("").is_empty());
    }

    #[test]
    fn test_parse_show() {
        let sections = parse_show(&show_output());
        assert_eq!(sections["wg0"].kind, "interface");
        assert_eq!(sections["wg0"].list("addresses").len(), 2);
        assert_eq!(sections["wg0_peer0"].kind, "wireguard_wg0");
        assert!(!sections.keys().any(|k| k.starts_with('@')));
    }

    #[test]
    fn test_interfaces_from_show() {
        let interfaces = interfaces_from(&parse_show(&show_output()));
        assert_eq!(interfaces, vec![wg0()]);
    }

    #[test]
    fn test_write_script_replaces_whole_interface() {
        let sections = parse_show(&show_output());
        let script = build_write_script(&wg0(), &sections);
        let lines: Vec<&str> = script.lines().collect();
        assert_eq!(lines[0], "delete network.wg0");
        assert_eq!(lines[1], "delete network.wg0_peer0");
        assert!(lines.contains(&"set network.wg0.proto='wireguard'"));
        assert!(lines.contains(&"set network.wg0.keymaster='1'"));
        assert!(script.lines().all(|l| !l.contains("home")));
        assert!(lines.contains(&"add_list network.wg0.addresses='fd00::1/64'"));
        assert!(lines.contains(&"set network.wg0_peer0=wireguard_wg0"));
        assert!(lines.contains(&"set network.wg0_peer0.endpoint_port='51820'"));
    }

    #[test]
    fn test_script_round_trips_through_show() {
        // a batch script's set/add_list lines read back like `uci show` output
        let script = build_write_script(&wg0(), &Sections::new());
        let mut show = String::new();
        for line in script.lines() {
            let rest = line
                .strip_prefix("set ")
                .or_else(|| line.strip_prefix("add_list "))
                .unwrap();
            show.push_str(rest);
            show.push('\n');
        }
        let mut sections = Sections::new();
        for line in show.lines() {
            let (key, value) = line.split_once('=').unwrap();
            let mut parts = key.splitn(3, '.');
            parts.next();
            let section = parts.next().unwrap().to_string();
            let entry = sections.entry(section).or_default();
            match parts.next() {
                None => entry.kind = value.to_string(),
                Some(option) => entry
                    .options
                    .entry(option.to_string())
                    .or_default()
                    .extend(split_values(value)),
            }
        }
        assert_eq!(interfaces_from(&sections), vec![wg0()]);
    }

    #[tokio::test]
    async fn test_apply_unchanged_is_noop() {
        let applier = UciApplier::new_mock();
        applier.shell.respond("show network", 0, &show_output());
        applier.apply(&wg0()).await.unwrap();
        assert_eq!(applier.shell.captured().len(), 1);
    }

    #[tokio::test]
    async fn test_apply_changed_rewrites_and_commits() {
        let applier = UciApplier::new_mock();
        applier.shell.respond("show network", 0, &show_output());
        let desired = wg0().with_listen_port(Some(51821));
        applier.apply(&desired).await.unwrap();

        let cmds = applier.shell.captured();
        assert_eq!(cmds.len(), 4);
        assert!(cmds[1].ends_with("uci batch"));
        assert!(cmds[2].ends_with("uci commit network"));
        assert!(cmds[3].ends_with("ifup \"wg0\""));

        // the key goes through stdin, never argv
        let inputs = applier.shell.inputs();
        let script = inputs[1].as_ref().unwrap();
        assert!(script.contains("listen_port='51821'"));
        assert!(script.contains(PRIV));
        assert!(cmds.iter().all(|c| !c.contains(PRIV)));
    }

    #[tokio::test]
    async fn test_apply_missing_key_on_host_rewrites() {
        let applier = UciApplier::new_mock();
        let without_key: String = show_output()
            .lines()
            .filter(|l| !l.contains("private_key"))
            .map(|l| format!("{}\n", l))
            .collect();
        applier.shell.respond("show network", 0, &without_key);
        applier.apply(&wg0()).await.unwrap();
        assert_eq!(applier.shell.captured().len(), 4);
    }

    #[tokio::test]
    async fn test_remove() {
        let applier = UciApplier::new_mock();
        applier.shell.respond("show network", 0, &show_output());
        applier.remove("wg0").await.unwrap();

        let cmds = applier.shell.captured();
        assert!(cmds[1].ends_with("ifdown \"wg0\""));
        let inputs = applier.shell.inputs();
        assert_eq!(
            inputs[2].as_deref(),
            Some("delete network.wg0\ndelete network.wg0_peer0\n")
        );

        applier.shell.clear_captured();
        applier.remove("wg9").await.unwrap();
        assert_eq!(applier.shell.captured().len(), 1);
    }

    #[tokio::test]
    async fn test_hand_made_interface_left_alone() {
        let applier = UciApplier::new_mock();
        applier.shell.respond("show network", 0, &show_output());

        let names: Vec<String> = applier
            .read_current()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["wg0".to_string()]);

        applier.shell.clear_captured();
        applier.remove("home").await.unwrap();
        assert_eq!(applier.shell.captured().len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_non_uci_names() {
        let applier = UciApplier::new_mock();
        let desired = Interface::new("wg-0")
            .unwrap()
            .with_private_key(Some(PRIV.parse().unwrap()));
        assert!(applier.apply(&desired).await.is_err());
        assert!(applier.shell.captured().is_empty());
    }
}
