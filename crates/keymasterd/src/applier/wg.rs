//! WireGuard applier driven by `ip` and `wg`.
//!
//! An interface is managed when `{config_dir}/{name}.conf` exists. The file
//! is rewritten after every converge and is where keys, peers and the
//! listen port are read back from; link presence and addresses are read
//! live from `ip -j address show`.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use keymaster_common::{KeymasterError, KeymasterResult};
use keymaster_types::{Interface, InterfaceDelta, IpPrefix, Peer};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::host::HostShell;
use crate::commands::*;
use crate::wg_conf;

const CONF_EXT: &str = "conf";

/// Live state of a link as reported by `ip`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LinkState {
    up: bool,
    addresses: BTreeSet<IpPrefix>,
}

#[derive(Deserialize)]
struct IpLink {
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    addr_info: Vec<IpAddrInfo>,
}

#[derive(Deserialize)]
struct IpAddrInfo {
    local: Option<IpAddr>,
    prefixlen: Option<u8>,
}

pub struct WgApplier {
    config_dir: PathBuf,
    shell: HostShell,
}

impl WgApplier {
    pub fn new(config_dir: PathBuf) -> Self {
        info!(config_dir = %config_dir.display(), "WgApplier initialized");
        Self {
            config_dir,
            shell: HostShell::new(),
        }
    }

    #[cfg(test)]
    fn new_mock(config_dir: PathBuf) -> Self {
        Self {
            config_dir,
            shell: HostShell::new_mock(),
        }
    }

    pub fn name(&self) -> &str {
        "wg"
    }

    fn conf_path(&self, name: &str) -> PathBuf {
        self.config_dir.join(format!("{}.{}", name, CONF_EXT))
    }

    /// Names with a configuration file in `config_dir`.
    async fn managed_names(&self) -> KeymasterResult<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.config_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(KeymasterError::io(&self.config_dir, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| KeymasterError::io(&self.config_dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CONF_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if Interface::new(stem).is_ok() {
                    names.push(stem.to_string());
                } else {
                    warn!(path = %path.display(), "Ignoring file that does not name an interface");
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn link_state(&self, name: &str) -> KeymasterResult<Option<LinkState>> {
        let cmd = build_show_addresses_cmd(name);
        let result = self.shell.try_run(&cmd).await?;

        if !result.success() {
            if result.stderr.contains("does not exist") {
                return Ok(None);
            }
            return Err(KeymasterError::ShellCommandFailed {
                command: cmd,
                exit_code: result.exit_code,
                output: result.combined_output(),
            });
        }

        parse_link_state(&result.stdout)
            .map(Some)
            .map_err(|message| KeymasterError::ShellCommandFailed {
                command: cmd,
                exit_code: 0,
                output: message,
            })
    }

    async fn read_conf(&self, name: &str) -> KeymasterResult<Option<Interface>> {
        let path = self.conf_path(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(wg_conf::parse(name, &text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(KeymasterError::io(path, e)),
        }
    }

    /// Reads one managed interface, overlaying live addresses on the file.
    async fn read_one(&self, name: &str) -> KeymasterResult<Option<(Interface, Option<LinkState>)>> {
        let Some(mut iface) = self.read_conf(name).await? else {
            return Ok(None);
        };

        let link = self.link_state(name).await?;
        match &link {
            Some(state) => iface.addresses = state.addresses.clone(),
            None => {
                debug!(interface = %name, "Managed interface has no link");
                iface = Interface::new(name)?
                    .with_private_key(iface.private_key)
                    .with_listen_port(iface.listen_port)
                    .with_fw_mark(iface.fw_mark);
            }
        }

        Ok(Some((iface, link)))
    }

    pub async fn read_current(&self) -> KeymasterResult<Vec<Interface>> {
        let mut interfaces = Vec::new();
        for name in self.managed_names().await? {
            if let Some((iface, _)) = self.read_one(&name).await? {
                interfaces.push(iface);
            }
        }
        Ok(interfaces)
    }

    pub async fn apply(&self, desired: &Interface) -> KeymasterResult<()> {
        let name = desired.name.as_str();
        let private_key = desired
            .private_key
            .ok_or_else(|| KeymasterError::missing_private_key(name))?;

        let current = self.read_one(name).await?;
        let link = match &current {
            Some((_, link)) => link.clone(),
            // not managed yet; an existing link of that name is adopted
            None => self.link_state(name).await?,
        };

        if link.is_none() {
            info!(interface = %name, "Creating WireGuard link");
            self.shell.run(&build_add_link_cmd(name)).await?;
        }

        let (delta, key_known) = match (&current, &link) {
            (Some((actual, _)), Some(_)) => (
                InterfaceDelta::between(desired, actual),
                actual.private_key.is_some(),
            ),
            (None, Some(state)) => {
                let mut adopted = Interface::new(name)?;
                adopted.addresses = state.addresses.clone();
                (InterfaceDelta::between(desired, &adopted), false)
            }
            (_, None) => (InterfaceDelta::from_scratch(desired), false),
        };

        if !delta.is_empty() {
            debug!(interface = %name, changes = %delta, "Converging interface");
        }

        if delta.private_key_changed || !key_known {
            self.shell
                .run_with_input(&build_set_private_key_cmd(name), &private_key.to_base64())
                .await?;
        }
        if let Some(port) = delta.listen_port {
            self.shell.run(&build_set_listen_port_cmd(name, port)).await?;
        }
        if let Some(mark) = delta.fw_mark {
            self.shell.run(&build_set_fwmark_cmd(name, mark)).await?;
        }

        for key in &delta.peers_to_remove {
            self.shell.run(&build_remove_peer_cmd(name, key)).await?;
        }
        // A cleared endpoint stays in the kernel until the peer roams; the
        // conf file records none.
        for peer in delta.peers_to_update.iter().chain(&delta.peers_to_add) {
            self.set_peer(name, peer).await?;
        }

        for address in &delta.addresses_to_remove {
            self.shell.run(&build_del_address_cmd(name, address)).await?;
        }
        for address in &delta.addresses_to_add {
            self.shell.run(&build_add_address_cmd(name, address)).await?;
        }

        if !link.as_ref().is_some_and(|l| l.up) {
            self.shell.run(&build_set_link_up_cmd(name)).await?;
        }

        let mut persisted = desired.clone();
        persisted.source_id = None;
        persisted.advertised_public_key = None;
        self.persist(&persisted).await
    }

    async fn set_peer(&self, name: &str, peer: &Peer) -> KeymasterResult<()> {
        let cmd = build_set_peer_cmd(name, peer);
        match &peer.preshared_key {
            Some(psk) => self.shell.run_with_input(&cmd, &psk.to_base64()).await?,
            None => self.shell.run(&cmd).await?,
        };
        Ok(())
    }

    /// Writes the configuration file if its content changed.
    async fn persist(&self, iface: &Interface) -> KeymasterResult<()> {
        let path = self.conf_path(&iface.name);
        let content = wg_conf::render(iface);

        match tokio::fs::read_to_string(&path).await {
            Ok(existing) if existing == content => return Ok(()),
            _ => {}
        }

        ensure_private_dir(&self.config_dir).await?;
        write_private_file(&path, &content).await
    }

    pub async fn remove(&self, name: &str) -> KeymasterResult<()> {
        if self.link_state(name).await?.is_some() {
            info!(interface = %name, "Deleting WireGuard link");
            self.shell.run(&build_del_link_cmd(name)).await?;
        }

        let path = self.conf_path(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KeymasterError::io(path, e)),
        }
    }
}

fn parse_link_state(json: &str) -> Result<LinkState, String> {
    let links: Vec<IpLink> =
        serde_json::from_str(json).map_err(|e| format!("unexpected `ip -j` output: {}", e))?;
    let link = links
        .into_iter()
        .next()
        .ok_or_else(|| "`ip -j` returned no link".to_string())?;

    let addresses = link
        .addr_info
        .iter()
        .filter_map(|a| match (a.local, a.prefixlen) {
            (Some(addr), Some(len)) => IpPrefix::new(addr, len).ok(),
            _ => None,
        })
        .collect();

    Ok(LinkState {
        up: link.flags.iter().any(|f| f == "UP"),
        addresses,
    })
}

async fn ensure_private_dir(dir: &Path) -> KeymasterResult<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true).mode(0o700);
    builder
        .create(dir)
        .await
        .map_err(|e| KeymasterError::io(dir, e))
}

/// Writes `content` with mode 0600 through a temporary file and a rename.
async fn write_private_file(path: &Path, content: &str) -> KeymasterResult<()> {
    let tmp = path.with_extension(format!("{}.tmp", CONF_EXT));

    let io_err = |e: std::io::Error| KeymasterError::io(&tmp, e);

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&tmp)
        .await
        .map_err(io_err)?;
    // `mode` only applies on creation; a leftover temp file keeps its own
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
        .await
        .map_err(io_err)?;
    file.write_all(content.as_bytes()).await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;
    drop(file);

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| KeymasterError::io(path, e))
}
