//! Local JSON file supplier.
//!
//! The file holds a JSON list of interface documents, the same shape
//! keymaster-server returns. It is re-read on every pass.

use std::path::PathBuf;

use keymaster_common::{KeymasterError, KeymasterResult};
use keymaster_types::{Interface, PublicKey};
use tracing::info;

pub struct FileSupplier {
    path: PathBuf,
}

impl FileSupplier {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn name(&self) -> &str {
        "file"
    }

    pub async fn fetch(&self) -> KeymasterResult<Vec<Interface>> {
        let content = tokio::fs::read(&self.path)
            .await
            .map_err(|e| KeymasterError::io(&self.path, e))?;
        serde_json::from_slice(&content).map_err(|e| {
            KeymasterError::invalid_response(self.path.display().to_string(), e.to_string())
        })
    }

    /// There is nowhere to publish the key, so it is logged for the operator.
    pub async fn report_public_key(
        &self,
        interface: &Interface,
        public_key: &PublicKey,
    ) -> KeymasterResult<()> {
        info!(
            interface = %interface.name,
            public_key = %public_key,
            "Interface public key"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_fetch_reads_list() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"name": "wg0", "addresses": ["10.0.0.1/24"], "listen_port": 51820,
                  "peers": [{{"public_key": "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=",
                              "allowed_ips": ["10.0.0.2/32"]}}]}},
                {{"name": "wg1", "addresses": ["10.1.0.1/24"]}}
            ]"#
        )
        .unwrap();

        let supplier = FileSupplier::new(file.path().to_path_buf());
        let interfaces = supplier.fetch().await.unwrap();
        assert_eq!(interfaces.len(), 2);
        assert_eq!(interfaces[0].peer_count(), 1);
        assert_eq!(interfaces[1].name, "wg1");
    }

    #[tokio::test]
    async fn test_fetch_empty_list_is_valid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[]").unwrap();
        let supplier = FileSupplier::new(file.path().to_path_buf());
        assert!(supplier.fetch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_errors() {
        let supplier = FileSupplier::new(PathBuf::from("/nonexistent/interfaces.json"));
        let err = supplier.fetch().await.unwrap_err();
        assert!(err.is_retryable());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"not\": \"a list\"}}").unwrap();
        let supplier = FileSupplier::new(file.path().to_path_buf());
        let err = supplier.fetch().await.unwrap_err();
        assert!(matches!(err, KeymasterError::InvalidResponse { .. }));
    }
}
