//! uDPU API.
//!
//! The API describes one star network from the point of view of its server:
//! `{"interface": {...}, "peers": [{...}, ...]}` where every peer entry is a
//! full interface record of a client. Clients that have not uploaded a
//! public key yet are skipped.

use std::time::Duration;

use keymaster_common::{KeymasterError, KeymasterResult};
use keymaster_types::{Interface, PublicKey};
use reqwest::header::HeaderMap;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::http;

#[derive(Debug, Deserialize)]
struct ServerConfig {
    interface: ServerInterface,
    #[serde(default)]
    peers: Vec<PeerRecord>,
}

#[derive(Debug, Deserialize)]
struct ServerInterface {
    #[serde(rename = "_id", default)]
    id: Value,
    name: String,
    #[serde(default)]
    addresses: Vec<String>,
    #[serde(default)]
    listen_port: Option<u16>,
    #[serde(default)]
    public_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PeerRecord {
    #[serde(default)]
    public_key: Option<String>,
    #[serde(default)]
    allowed_ips: Vec<String>,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    persistent_keepalive: Option<u16>,
}

impl ServerConfig {
    /// Reshapes the response into the interface document every supplier
    /// shares, so decoding applies the same validation.
    fn into_interface(self, source_name: &str) -> KeymasterResult<Interface> {
        let peers: Vec<Value> = self
            .peers
            .into_iter()
            .filter(|p| p.public_key.as_deref().is_some_and(|k| !k.is_empty()))
            .map(|p| {
                json!({
                    "public_key": p.public_key,
                    "allowed_ips": p.allowed_ips,
                    "endpoint": p.endpoint,
                    "persistent_keepalive": p.persistent_keepalive,
                })
            })
            .collect();

        let doc = json!({
            "id": self.interface.id,
            "public_key": self.interface.public_key,
            "name": self.interface.name,
            "addresses": self.interface.addresses,
            "listen_port": self.interface.listen_port,
            "peers": peers,
        });

        serde_json::from_value(doc)
            .map_err(|e| KeymasterError::invalid_response(source_name, e.to_string()))
    }
}

pub struct UdpuSupplier {
    base_url: Url,
    network_name: String,
    client: reqwest::Client,
}

impl UdpuSupplier {
    pub fn new(base_url: Url, network_name: String, timeout: Duration) -> KeymasterResult<Self> {
        Ok(Self {
            base_url,
            network_name,
            client: http::build_client(timeout, HeaderMap::new())?,
        })
    }

    pub fn name(&self) -> &str {
        "udpu"
    }

    pub async fn fetch(&self) -> KeymasterResult<Vec<Interface>> {
        let url = http::endpoint(
            &self.base_url,
            &["v1", "wireguard", "config", "server", &self.network_name],
        )?;
        debug!(url = %url, network = %self.network_name, "Fetching server config");

        let response = http::send(
            &format!("GET /v1/wireguard/config/server/{}", self.network_name),
            self.client.get(url),
        )
        .await?;
        let config: ServerConfig = http::json(self.name(), response).await?;

        Ok(vec![config.into_interface(self.name())?])
    }

    pub async fn report_public_key(
        &self,
        interface: &Interface,
        public_key: &PublicKey,
    ) -> KeymasterResult<()> {
        let id = interface.source_id.as_deref().ok_or_else(|| {
            KeymasterError::internal(format!("interface {} has no server id", interface.name))
        })?;

        let url = http::endpoint(&self.base_url, &["v1", "interfaces", "server", id])?;
        let body = json!({ "public_key": public_key.to_base64() });

        http::send(
            &format!("PATCH /v1/interfaces/server/{}", id),
            self.client.patch(url).json(&body),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SERVER_PUB: &str = "hSDwCYkwp1R0i33ctD73Wg2/Og0mOBr066SpjqqbTmo=";
    const CLIENT_PUB: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";

    #[test]
    fn test_reshape_skips_keyless_peers() {
        let raw = json!({
            "interface": {
                "_id": "5f1c",
                "name": "wg0",
                "addresses": ["10.10.0.1/24"],
                "listen_port": 51820,
                "public_key": SERVER_PUB,
                "network_name": "office"
            },
            "peers": [
                {"_id": "a", "name": "wg0", "public_key": CLIENT_PUB,
                 "allowed_ips": ["10.10.0.2/32"], "endpoint": null},
                {"_id": "b", "name": "wg0", "public_key": null,
                 "allowed_ips": ["10.10.0.3/32"]},
                {"_id": "c", "name": "wg0", "public_key": "",
                 "allowed_ips": ["10.10.0.4/32"]}
            ]
        });

        let config: ServerConfig = serde_json::from_value(raw).unwrap();
        let iface = config.into_interface("udpu").unwrap();
        assert_eq!(iface.name, "wg0");
        assert_eq!(iface.source_id.as_deref(), Some("5f1c"));
        assert_eq!(iface.advertised_public_key, Some(SERVER_PUB.parse().unwrap()));
        assert_eq!(iface.peer_count(), 1);
        assert!(iface.peer(&CLIENT_PUB.parse().unwrap()).is_some());
    }

    #[test]
    fn test_reshape_rejects_bad_peer() {
        let raw = json!({
            "interface": {"_id": 1, "name": "wg0", "addresses": ["10.10.0.1/24"]},
            "peers": [{"public_key": CLIENT_PUB, "allowed_ips": []}]
        });
        let config: ServerConfig = serde_json::from_value(raw).unwrap();
        let err = config.into_interface("udpu").unwrap_err();
        assert!(matches!(err, KeymasterError::InvalidResponse { .. }));
    }
}
