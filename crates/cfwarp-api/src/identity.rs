//! Identity lifecycle: key generation, registration, and the two-file
//! on-disk form.
//!
//! Secrets (`reg.json`) and the non-secret remainder (`conf.json`) are
//! stored separately so the config can be inspected without exposing the
//! private key. Both files are written with mode `0600`.

use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand_core::OsRng;
use tracing::{debug, info, warn};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::client::WarpApi;
use crate::error::{ApiError, Result};
use crate::model::{ConfFile, Identity, RegFile};

const IDENTITY_VERSION: &str = "v2";

/// A freshly generated WireGuard keypair, base64-encoded.
pub struct WgKeyPair {
    pub private_key: String,
    pub public_key: String,
}

/// Generate a WireGuard (X25519) keypair from the OS CSPRNG.
#[must_use]
pub fn generate_keypair() -> WgKeyPair {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);

    let mut secret_bytes = secret.to_bytes();
    let private_key = BASE64.encode(&secret_bytes);
    secret_bytes.zeroize();

    WgKeyPair {
        private_key,
        public_key: BASE64.encode(public.as_bytes()),
    }
}

fn reg_path(data_dir: &Path) -> PathBuf {
    data_dir.join("reg.json")
}

fn conf_path(data_dir: &Path) -> PathBuf {
    data_dir.join("conf.json")
}

fn write_private_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(path)?;
    file.write_all(data)
}

/// Load an identity from `reg.json` + `conf.json` in the data directory.
///
/// # Errors
///
/// Returns an error when either file is missing or unreadable, or when the
/// identity carries no peers.
pub fn load_identity(data_dir: &Path) -> Result<Identity> {
    let reg_bytes = std::fs::read(reg_path(data_dir))?;
    let conf_bytes = std::fs::read(conf_path(data_dir))?;

    let reg: RegFile = serde_json::from_slice(&reg_bytes)?;
    let conf: ConfFile = serde_json::from_slice(&conf_bytes)?;

    let identity = Identity {
        id: reg.registration_id,
        token: reg.token,
        private_key: reg.private_key,
        account: conf.account,
        config: conf.config,
        version: IDENTITY_VERSION.to_string(),
        ..Default::default()
    };

    if identity.config.peers.is_empty() {
        return Err(ApiError::identity("identity contains 0 peers"));
    }

    Ok(identity)
}

/// Persist an identity as `reg.json` + `conf.json`, both mode `0600`.
///
/// # Errors
///
/// Returns an error when either file cannot be written.
pub fn save_identity(data_dir: &Path, identity: &Identity) -> Result<()> {
    let reg = RegFile {
        registration_id: identity.id.clone(),
        token: identity.token.clone(),
        private_key: identity.private_key.clone(),
    };
    write_private_file(&reg_path(data_dir), &serde_json::to_vec_pretty(&reg)?)?;

    let conf = ConfFile {
        account: identity.account.clone(),
        config: identity.config.clone(),
    };
    write_private_file(&conf_path(data_dir), &serde_json::to_vec_pretty(&conf)?)?;

    Ok(())
}

/// Register a new identity, optionally applying a license key.
///
/// # Errors
///
/// Returns an error when registration or the license update fails.
pub async fn create_identity(api: &WarpApi, license: &str) -> Result<Identity> {
    let keys = generate_keypair();

    let mut identity = api.register(&keys.public_key).await?;

    if !license.is_empty() {
        info!("Attempting to update WARP account license key...");
        api.update_account(&identity.token, &identity.id, license)
            .await?;
        identity.account = api.get_account(&identity.token, &identity.id).await?;
    }

    identity.private_key = keys.private_key;
    identity.version = IDENTITY_VERSION.to_string();

    Ok(identity)
}

/// Load the stored identity, creating a new registration when none exists;
/// update the license when a different one is supplied.
///
/// # Errors
///
/// Returns an error when registration or the license update fails.
pub async fn create_or_update_identity(
    api: &WarpApi,
    data_dir: &Path,
    license: &str,
) -> Result<Identity> {
    let mut identity = match load_identity(data_dir) {
        Ok(identity) => identity,
        Err(err) => {
            warn!(error = %err, "Failed to load existing WARP identity; attempting to create a new one");
            info!("Initiating creation of a new WARP identity...");
            return create_identity(api, license).await;
        }
    };

    if !license.is_empty() && identity.account.license != license {
        info!("Attempting to update WARP account license key...");
        api.update_account(&identity.token, &identity.id, license)
            .await?;
        identity.account = api.get_account(&identity.token, &identity.id).await?;
    }

    Ok(identity)
}

/// Load or create an identity and persist the result.
///
/// # Errors
///
/// Returns an error when registration or persistence fails.
pub async fn load_or_create_identity(api: &WarpApi, data_dir: &Path) -> Result<Identity> {
    let identity = create_or_update_identity(api, data_dir, "").await?;
    save_identity(data_dir, &identity)?;
    debug!("Successfully loaded WARP identity.");
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IdentityConfigPeer, IdentityConfigPeerEndpoint};

    fn identity_with_peer() -> Identity {
        Identity {
            id: "reg-1".into(),
            token: "tok-1".into(),
            private_key: BASE64.encode([7u8; 32]),
            config: crate::model::IdentityConfig {
                peers: vec![IdentityConfigPeer {
                    public_key: BASE64.encode([9u8; 32]),
                    endpoint: IdentityConfigPeerEndpoint {
                        host: "engage.cloudflareclient.com:2408".into(),
                        ..Default::default()
                    },
                }],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn keypair_is_valid_base64_x25519() {
        let keys = generate_keypair();
        let private = BASE64.decode(&keys.private_key).unwrap();
        let public = BASE64.decode(&keys.public_key).unwrap();
        assert_eq!(private.len(), 32);
        assert_eq!(public.len(), 32);

        // Public key must match scalar-base-mult of the private key.
        let mut secret_bytes = [0u8; 32];
        secret_bytes.copy_from_slice(&private);
        let derived = PublicKey::from(&StaticSecret::from(secret_bytes));
        assert_eq!(derived.as_bytes()[..], public[..]);
    }

    #[test]
    fn save_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let identity = identity_with_peer();

        save_identity(tmp.path(), &identity).unwrap();
        let loaded = load_identity(tmp.path()).unwrap();

        assert_eq!(loaded.id, identity.id);
        assert_eq!(loaded.token, identity.token);
        assert_eq!(loaded.private_key, identity.private_key);
        assert_eq!(
            loaded.config.peers[0].public_key,
            identity.config.peers[0].public_key
        );
        assert_eq!(loaded.version, "v2");
    }

    #[cfg(unix)]
    #[test]
    fn identity_files_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        save_identity(tmp.path(), &identity_with_peer()).unwrap();

        for name in ["reg.json", "conf.json"] {
            let mode = std::fs::metadata(tmp.path().join(name))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600, "{name} must be mode 0600");
        }
    }

    #[test]
    fn load_rejects_zero_peers() {
        let tmp = tempfile::tempdir().unwrap();
        let mut identity = identity_with_peer();
        identity.config.peers.clear();
        save_identity(tmp.path(), &identity).unwrap();

        let err = load_identity(tmp.path()).unwrap_err();
        assert!(matches!(err, ApiError::Identity(_)));
    }

    #[test]
    fn load_missing_files_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load_identity(tmp.path()).is_err());
    }
}
