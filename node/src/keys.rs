//! Key-management collaborator boundary (spec.md §1 Non-goals, §6
//! "Collaborator contracts"). Filesystem key-pair generation and
//! passphrase-protected storage are explicitly out of scope; this module
//! only reads whatever PEM text already sits on disk at the paths the
//! caller supplies.

use std::path::Path;

/// Reads a PKCS#1 PEM private key and a SubjectPublicKeyInfo PEM public
/// key from the given paths, unencrypted. A real deployment would sit a
/// passphrase-protected keystore (`original_source/signature.py`'s
/// `generate_key_pair`/`KEY_PATH` convention) behind this same pair of
/// reads; that layer is the excluded external collaborator.
pub fn load_keypair(private_key_path: &Path, public_key_path: &Path) -> anyhow::Result<(String, String)> {
    let private_key = std::fs::read_to_string(private_key_path)
        .map_err(|e| anyhow::anyhow!("reading private key {}: {e}", private_key_path.display()))?;
    let public_key = std::fs::read_to_string(public_key_path)
        .map_err(|e| anyhow::anyhow!("reading public key {}: {e}", public_key_path.display()))?;
    Ok((private_key, public_key))
}

pub fn load_public_key(public_key_path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(public_key_path)
        .map_err(|e| anyhow::anyhow!("reading public key {}: {e}", public_key_path.display()))
}
