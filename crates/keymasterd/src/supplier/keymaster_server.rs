//! keymaster-server REST API.
//!
//! `GET /api/configs/` returns every interface this host should run, each
//! carrying the server-side `id` and the `public_key` the server currently
//! holds. `PATCH /api/interfaces/{id}/` uploads a new public key.

use std::time::Duration;

use keymaster_common::{KeymasterError, KeymasterResult};
use keymaster_types::{Interface, PublicKey};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Url;
use serde_json::json;
use tracing::debug;

use super::http;

pub struct KeymasterServerSupplier {
    base_url: Url,
    client: reqwest::Client,
}

impl KeymasterServerSupplier {
    pub fn new(base_url: Url, token: &str, timeout: Duration) -> KeymasterResult<Self> {
        let mut auth = HeaderValue::from_str(&format!("Token {}", token)).map_err(|_| {
            KeymasterError::invalid_config("supplier.keymaster_server.token", "not a valid header value")
        })?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        Ok(Self {
            base_url,
            client: http::build_client(timeout, headers)?,
        })
    }

    pub fn name(&self) -> &str {
        "keymaster-server"
    }

    pub async fn fetch(&self) -> KeymasterResult<Vec<Interface>> {
        let url = http::endpoint(&self.base_url, &["api", "configs", ""])?;
        debug!(url = %url, "Fetching interface configs");

        let response = http::send("GET /api/configs/", self.client.get(url)).await?;
        http::json(self.name(), response).await
    }

    pub async fn report_public_key(
        &self,
        interface: &Interface,
        public_key: &PublicKey,
    ) -> KeymasterResult<()> {
        let id = interface.source_id.as_deref().ok_or_else(|| {
            KeymasterError::internal(format!("interface {} has no server id", interface.name))
        })?;

        let url = http::endpoint(&self.base_url, &["api", "interfaces", id, ""])?;
        let body = json!({ "public_key": public_key.to_base64() });

        http::send(
            &format!("PATCH /api/interfaces/{}/", id),
            self.client.patch(url).json(&body),
        )
        .await?;
        Ok(())
    }
}
