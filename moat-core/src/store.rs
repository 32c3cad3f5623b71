//! Encrypted, profile-isolated, per-provider credential storage.
//!
//! Layout mirrors spec'd external interfaces: legacy root at
//! `~/.moat/credentials/`, named profiles at
//! `~/.moat/credentials/profiles/<profile>/`. Each provider gets its own
//! `<provider>.enc` file (AES-256-GCM, random 96-bit nonce prepended to the
//! ciphertext). The SSH host-key table is a separate, unencrypted
//! `ssh.json` file since it never holds secret material itself.

use crate::credential::{Credential, SshHostKey};
use crate::error::{MoatError, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use fs2::FileExt;
use rand::RngCore;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

const NONCE_LEN: usize = 12;

/// A 32-byte AEAD key, zeroized on drop. Obtained once per process and
/// never persisted plaintext beside the ciphertext it protects.
#[derive(Clone)]
pub struct StoreKey(Zeroizing<[u8; 32]>);

impl StoreKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Self::from_bytes(bytes)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0[..]))
    }
}

/// A validated credential-profile name. Empty means the legacy root.
/// Validation rejects path traversal: must be empty, or start with an
/// alphanumeric character and contain only `[A-Za-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile(String);

impl Profile {
    pub fn legacy() -> Self {
        Self(String::new())
    }

    pub fn named(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Ok(Self(name));
        }
        let mut chars = name.chars();
        let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
        let rest_ok = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        let contains_dot = name.contains('.');
        let contains_sep = name.contains('/') || name.contains('\\');
        let contains_nul = name.contains('\0');
        if !first_ok || !rest_ok || contains_dot || contains_sep || contains_nul {
            return Err(MoatError::config(format!("invalid profile name: {name:?}")));
        }
        Ok(Self(name))
    }

    pub fn is_legacy(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Credential store for a single profile root.
pub struct CredentialStore {
    root: PathBuf,
    key: StoreKey,
}

impl CredentialStore {
    pub fn default_home() -> PathBuf {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".moat").join("credentials")
    }

    pub fn open(home: &Path, profile: &Profile, key: StoreKey) -> Self {
        let root = if profile.is_legacy() {
            home.to_path_buf()
        } else {
            home.join("profiles").join(profile.as_str())
        };
        Self { root, key }
    }

    fn lock_path(&self) -> PathBuf {
        self.root.join(".store.lock")
    }

    fn with_exclusive_lock<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        fs::create_dir_all(&self.root)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&self.root, fs::Permissions::from_mode(0o700));
        }
        let lock_file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(self.lock_path())?;
        lock_file.lock_exclusive()?;
        let out = f();
        let _ = lock_file.unlock();
        out
    }

    fn provider_path(&self, provider: &str) -> PathBuf {
        self.root.join(format!("{provider}.enc"))
    }

    fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self.key.cipher().encrypt(nonce, plaintext)
            .expect("AES-GCM encryption of a bounded buffer does not fail");
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        out
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(MoatError::Corruption("ciphertext shorter than nonce".into()));
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.key.cipher().decrypt(nonce, ciphertext)
            .map_err(|_| MoatError::Corruption("decryption failed: wrong key or corrupt file".into()))
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8], mode: u32) -> Result<()> {
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(mode))?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Save (overwrite) a provider's credential.
    pub fn save(&self, credential: &Credential) -> Result<()> {
        self.with_exclusive_lock(|| {
            let plaintext = serde_json::to_vec(credential)?;
            let ciphertext = self.encrypt(&plaintext);
            self.write_atomic(&self.provider_path(&credential.provider), &ciphertext, 0o600)
        })
    }

    /// Load a provider's credential. Distinguishes not-found from
    /// decryption/corruption failure; never silently recovers the latter.
    pub fn get(&self, provider: &str) -> Result<Credential> {
        self.with_exclusive_lock(|| {
            let path = self.provider_path(provider);
            if !path.exists() {
                return Err(MoatError::not_found(format!("no credential for provider {provider}")));
            }
            let data = fs::read(&path)?;
            let plaintext = self.decrypt(&data)?;
            serde_json::from_slice(&plaintext)
                .map_err(|e| MoatError::Corruption(format!("corrupt credential for {provider}: {e}")))
        })
    }

    pub fn delete(&self, provider: &str) -> Result<()> {
        self.with_exclusive_lock(|| {
            let path = self.provider_path(provider);
            if path.exists() {
                fs::remove_file(&path)?;
            }
            Ok(())
        })
    }

    /// List provider names with a stored credential in this profile.
    pub fn list(&self) -> Result<Vec<String>> {
        self.with_exclusive_lock(|| {
            let mut names = Vec::new();
            if !self.root.exists() {
                return Ok(names);
            }
            for entry in fs::read_dir(&self.root)? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("enc") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        names.push(stem.to_string());
                    }
                }
            }
            names.sort();
            Ok(names)
        })
    }

    fn ssh_path(&self) -> PathBuf {
        self.root.join("ssh.json")
    }

    /// Look up SSH host keys for any of the given hosts.
    pub fn ssh_keys_for_hosts(&self, hosts: &[String]) -> Result<Vec<SshHostKey>> {
        let all = self.ssh_keys_all()?;
        Ok(all.into_iter().filter(|k| hosts.iter().any(|h| h == &k.host)).collect())
    }

    pub fn ssh_keys_all(&self) -> Result<Vec<SshHostKey>> {
        self.with_exclusive_lock(|| {
            let path = self.ssh_path();
            if !path.exists() {
                return Ok(Vec::new());
            }
            let content = fs::read_to_string(&path)?;
            let file: SshFile = serde_json::from_str(&content)?;
            Ok(file.mappings)
        })
    }

    /// Upsert (by host) an SSH host-key entry.
    pub fn ssh_upsert(&self, entry: SshHostKey) -> Result<()> {
        self.with_exclusive_lock(|| {
            let mut all: Vec<SshHostKey> = {
                let path = self.ssh_path();
                if path.exists() {
                    let file: SshFile = serde_json::from_str(&fs::read_to_string(&path)?)?;
                    file.mappings
                } else {
                    Vec::new()
                }
            };
            if let Some(existing) = all.iter_mut().find(|k| k.host == entry.host) {
                *existing = entry;
            } else {
                all.push(entry);
            }
            let json = serde_json::to_vec_pretty(&SshFile { mappings: all })?;
            self.write_atomic(&self.ssh_path(), &json, 0o644)
        })
    }
}

/// On-disk shape of `ssh.json`: a `mappings` array, not a bare list, so the
/// file matches what the external SSH collaborator expects to parse.
#[derive(serde::Serialize, serde::Deserialize)]
struct SshFile {
    mappings: Vec<SshHostKey>,
}
