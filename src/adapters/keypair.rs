//! Keypair Loader - Signing Identities from Keypair Files
//!
//! Keypair files hold a JSON array of 64 bytes: the ed25519 secret seed
//! followed by the public key. The path to each file comes from an
//! environment variable (ADMIN_KEYPAIR, PAYER_KEYPAIR, USER_KEYPAIR by
//! default), so secrets never live in `config.toml`.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::Keypair;

/// Read a keypair file.
pub fn load_keypair_file(path: &Path) -> Result<Keypair> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read keypair file: {}", path.display()))?;
    let bytes: Vec<u8> = serde_json::from_str(&content)
        .with_context(|| format!("Keypair file is not a JSON byte array: {}", path.display()))?;
    Keypair::from_bytes(&bytes)
        .with_context(|| format!("Invalid keypair in {}", path.display()))
}

/// Read the keypair whose file path is in environment variable `var`.
pub fn load_keypair_from_env(var: &str) -> Result<Keypair> {
    let path = std::env::var(var).with_context(|| format!("{var} not set"))?;
    let keypair = load_keypair_file(Path::new(&path))?;
    info!(var, identity = %keypair.identity(), "Loaded signer");
    Ok(keypair)
}

/// Like [`load_keypair_from_env`], but falls back to a fresh ephemeral
/// keypair when the variable is unset. Dry runs only.
pub fn load_or_ephemeral(var: &str) -> Result<Keypair> {
    if std::env::var_os(var).is_some() {
        return load_keypair_from_env(var);
    }
    let keypair = ephemeral_keypair();
    warn!(var, identity = %keypair.identity(), "Signer not configured, using ephemeral keypair");
    Ok(keypair)
}

/// A keypair from a random seed.
pub fn ephemeral_keypair() -> Keypair {
    let mut seed = [0u8; 32];
    seed[..16].copy_from_slice(Uuid::new_v4().as_bytes());
    seed[16..].copy_from_slice(Uuid::new_v4().as_bytes());
    Keypair::from_seed(&seed)
}
