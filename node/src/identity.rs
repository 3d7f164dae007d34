// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Node key files.
//!
//! ```text
//! <dir>/node_private.key   hex secret key
//! <dir>/node_public.key    hex public key
//! <dir>/node_id.txt        NODE-XXXXXX
//! ```
//!
//! The node only ever reads these. `write_new` is for key generation.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use timevault_kernel::{KernelError, NodeIdentity};

pub const PRIVATE_KEY_FILE: &str = "node_private.key";
pub const PUBLIC_KEY_FILE: &str = "node_public.key";
pub const NODE_ID_FILE: &str = "node_id.txt";

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("cannot access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Key(#[from] KernelError),

    #[error("{file} does not match the private key (found {found}, expected {expected})")]
    Mismatch {
        file: &'static str,
        found: String,
        expected: String,
    },

    #[error("refusing to overwrite existing key file {0:?}")]
    AlreadyExists(PathBuf),
}

fn read_trimmed(path: &Path) -> Result<String, IdentityError> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|source| IdentityError::Io { path: path.to_path_buf(), source })
}

/// Load the identity in `dir`, cross-checking the public key and node id files.
pub fn load(dir: impl AsRef<Path>) -> Result<NodeIdentity, IdentityError> {
    let dir = dir.as_ref();
    let secret = read_trimmed(&dir.join(PRIVATE_KEY_FILE))?;
    let identity = NodeIdentity::from_secret_hex(&secret)?;

    let public = read_trimmed(&dir.join(PUBLIC_KEY_FILE))?;
    if !public.eq_ignore_ascii_case(&identity.public_key()) {
        return Err(IdentityError::Mismatch {
            file: PUBLIC_KEY_FILE,
            found: public,
            expected: identity.public_key(),
        });
    }

    let node_id = read_trimmed(&dir.join(NODE_ID_FILE))?;
    if node_id != identity.node_id() {
        return Err(IdentityError::Mismatch {
            file: NODE_ID_FILE,
            found: node_id,
            expected: identity.node_id().to_string(),
        });
    }

    tracing::info!("Loaded node identity {}", identity.node_id());
    Ok(identity)
}

/// Generate a keypair and write the three key files into `dir`.
pub fn write_new(dir: impl AsRef<Path>) -> Result<NodeIdentity, IdentityError> {
    let dir = dir.as_ref();
    let files = [PRIVATE_KEY_FILE, PUBLIC_KEY_FILE, NODE_ID_FILE].map(|name| dir.join(name));
    if let Some(existing) = files.iter().find(|p| p.exists()) {
        return Err(IdentityError::AlreadyExists(existing.clone()));
    }
    fs::create_dir_all(dir).map_err(|source| IdentityError::Io { path: dir.to_path_buf(), source })?;

    let identity = NodeIdentity::generate();
    let [private_path, public_path, id_path] = files;

    write_file(&private_path, &identity.secret_hex())?;
    restrict_permissions(&private_path)?;
    write_file(&public_path, &identity.public_key())?;
    write_file(&id_path, identity.node_id())?;

    Ok(identity)
}

fn write_file(path: &Path, contents: &str) -> Result<(), IdentityError> {
    fs::write(path, contents).map_err(|source| IdentityError::Io { path: path.to_path_buf(), source })
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), IdentityError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|source| IdentityError::Io { path: path.to_path_buf(), source })
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), IdentityError> {
    Ok(())
}
