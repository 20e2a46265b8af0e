//! Ephemeral credential material.
//!
//! Transports cannot consume stored secrets directly: SSH keys are decoded
//! from a key file and kubectl reads a kubeconfig path. [`EphemeralMaterial`]
//! stages a secret into a permission-restricted temp file that lives exactly
//! as long as one connect attempt. Adapters call [`EphemeralMaterial::remove`]
//! on every exit path; `Drop` is only a backstop for panics.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use secrecy::ExposeSecret;
use tokio::io::AsyncWriteExt;

use crate::error::ConnectError;
use crate::types::{CredentialDescriptor, CredentialKind};

static NEXT_MATERIAL_ID: AtomicU64 = AtomicU64::new(1);

/// A staged, transport-usable form of a stored secret.
#[derive(Debug)]
pub struct EphemeralMaterial {
    path: PathBuf,
    removed: bool,
}

impl EphemeralMaterial {
    /// Write the credential's secret to a fresh owner-only file and return a
    /// handle to it. SSH keys get a `.pem` suffix, kubeconfigs `.yaml`.
    pub async fn stage(credential: &CredentialDescriptor) -> Result<Self, ConnectError> {
        let suffix = match credential.kind {
            CredentialKind::SshKey => "pem",
            CredentialKind::Kubeconfig => "yaml",
        };
        let name = format!(
            "bridge-cred-{}-{}.{suffix}",
            std::process::id(),
            NEXT_MATERIAL_ID.fetch_add(1, Ordering::Relaxed),
        );
        let path = std::env::temp_dir().join(name);

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(&path)
            .await
            .map_err(|e| ConnectError::material(format!("failed to create temp file: {e}")))?;
        let staged = async {
            file.write_all(credential.secret.expose_secret().as_bytes())
                .await?;
            file.flush().await
        }
        .await;

        if let Err(e) = staged {
            // Half-written secrets must not linger either.
            drop(file);
            if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                tracing::warn!(
                    path = %path.display(),
                    error = %cleanup,
                    "failed to remove partially staged credential material"
                );
            }
            return Err(ConnectError::material(format!(
                "failed to write temp file: {e}"
            )));
        }

        tracing::debug!(path = %path.display(), kind = %credential.kind, "staged credential material");
        Ok(Self {
            path,
            removed: false,
        })
    }

    /// Path of the staged artifact.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the artifact. Consumes the handle; removal failures are logged,
    /// not surfaced, so teardown paths stay infallible.
    pub async fn remove(mut self) {
        self.removed = true;
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to remove credential material"
            );
        } else {
            tracing::debug!(path = %self.path.display(), "removed credential material");
        }
    }
}

impl Drop for EphemeralMaterial {
    fn drop(&mut self) {
        if !self.removed {
            // Reached only when a connect attempt unwound without the
            // explicit remove() call.
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to remove credential material on drop"
                );
            } else {
                tracing::warn!(
                    path = %self.path.display(),
                    "credential material removed by drop backstop"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CredentialDescriptor;

    #[tokio::test]
    async fn stages_ssh_key_with_owner_only_permissions() {
        let credential = CredentialDescriptor::ssh_key(1, "ops", "-----BEGIN TEST KEY-----\n");
        let material = EphemeralMaterial::stage(&credential).await.unwrap();
        let path = material.path().to_path_buf();

        assert!(path.extension().is_some_and(|ext| ext == "pem"));
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, "-----BEGIN TEST KEY-----\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        material.remove().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn stages_kubeconfig_with_yaml_suffix() {
        let credential = CredentialDescriptor::kubeconfig(2, "apiVersion: v1\n");
        let material = EphemeralMaterial::stage(&credential).await.unwrap();

        assert!(material.path().extension().is_some_and(|ext| ext == "yaml"));
        material.remove().await;
    }

    #[tokio::test]
    async fn drop_backstop_removes_artifact() {
        let credential = CredentialDescriptor::kubeconfig(3, "apiVersion: v1\n");
        let material = EphemeralMaterial::stage(&credential).await.unwrap();
        let path = material.path().to_path_buf();

        assert!(path.exists());
        drop(material);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn staged_paths_are_unique() {
        let credential = CredentialDescriptor::ssh_key(4, "ops", "key");
        let first = EphemeralMaterial::stage(&credential).await.unwrap();
        let second = EphemeralMaterial::stage(&credential).await.unwrap();

        assert_ne!(first.path(), second.path());
        first.remove().await;
        second.remove().await;
    }
}
