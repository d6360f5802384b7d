//! SSH keys module: installs OpenSSH public keys into a user's
//! `authorized_keys`.

use std::collections::BTreeSet;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ModuleError;
use crate::imds::ImdsError;
use crate::modules::{ModuleAction, ModuleContext};
use crate::util::{lookup_uid_gid, user_exists};

const OPENSSH_KEY_ENDPOINT: &str = "meta-data/public-keys/0/openssh-key";
const DEFAULT_USER: &str = "ec2-user";

// First local user created by the image build; used when directory lookup
// has not caught up on first boot.
const DEFAULT_USER_UID: u32 = 501;
const DEFAULT_USER_GID: u32 = 20;

/// Configuration of an SSH keys module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshKeysModule {
    /// De-duplicate against keys already present in `authorized_keys`.
    #[serde(rename = "DedupKeys", default)]
    pub dedup_keys: bool,
    /// Fetch the launch key pair's public half from the metadata service.
    #[serde(rename = "GetIMDSOpenSSHKey", default)]
    pub get_imds_open_ssh_key: bool,
    /// Additional keys installed verbatim.
    #[serde(rename = "StaticOpenSSHKeys", default)]
    pub static_open_ssh_keys: Vec<String>,
    /// Replace the file instead of appending.
    #[serde(rename = "OverwriteAuthorizedKeys", default)]
    pub overwrite_authorized_keys: bool,
    /// Target user; empty defaults to `ec2-user`.
    #[serde(rename = "User", default)]
    pub user: String,
}

impl SshKeysModule {
    fn user(&self) -> &str {
        if self.user.is_empty() {
            DEFAULT_USER
        } else {
            &self.user
        }
    }
}

#[async_trait]
impl ModuleAction for SshKeysModule {
    async fn run(&self, ctx: &ModuleContext) -> Result<String, ModuleError> {
        if !self.get_imds_open_ssh_key && self.static_open_ssh_keys.is_empty() {
            return Ok("nothing to do".into());
        }

        let user = self.user();
        if !user_exists(user).await? {
            return Err(ModuleError::UnknownUser { name: user.into() });
        }

        let ssh_dir = PathBuf::from("/Users").join(user).join(".ssh");
        let authorized_keys = ssh_dir.join("authorized_keys");
        if !ssh_dir.is_dir() {
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(&ssh_dir)
                .map_err(|source| ModuleError::Io {
                    path: ssh_dir.clone(),
                    source,
                })?;
        }

        let mut keys: BTreeSet<String> = BTreeSet::new();
        if self.get_imds_open_ssh_key {
            let (key, status) = ctx.imds.get_property(OPENSSH_KEY_ENDPOINT).await?;
            match status {
                // 200 = key present; 404 = launch without a key pair.
                200 => {
                    keys.insert(key.trim().to_string());
                }
                404 => {}
                status => {
                    return Err(ModuleError::Imds(ImdsError::UnexpectedStatus {
                        endpoint: OPENSSH_KEY_ENDPOINT.into(),
                        status,
                    }));
                }
            }
        }
        for key in &self.static_open_ssh_keys {
            keys.insert(key.trim().to_string());
        }
        keys.remove("");

        // With dedup requested, fold existing keys into the set and rewrite
        // the whole file so duplicates collapse.
        let mut overwrite = self.overwrite_authorized_keys;
        if self.dedup_keys && authorized_keys.is_file() {
            let existing = std::fs::read_to_string(&authorized_keys).map_err(|source| {
                ModuleError::Io {
                    path: authorized_keys.clone(),
                    source,
                }
            })?;
            for line in existing.lines() {
                let line = line.trim();
                if !line.is_empty() {
                    keys.insert(line.to_string());
                }
            }
            overwrite = true;
        }

        let installed = keys.len();
        let mut contents = keys.into_iter().collect::<Vec<_>>().join("\n");
        contents.push('\n');

        let mut options = std::fs::OpenOptions::new();
        options.create(true).write(true).mode(0o600);
        if overwrite {
            options.truncate(true);
        } else {
            options.append(true);
        }
        {
            use std::io::Write;
            let mut f = options
                .open(&authorized_keys)
                .map_err(|source| ModuleError::Io {
                    path: authorized_keys.clone(),
                    source,
                })?;
            f.write_all(contents.as_bytes())
                .map_err(|source| ModuleError::Io {
                    path: authorized_keys.clone(),
                    source,
                })?;
        }

        let (uid, gid) = match lookup_uid_gid(user).await {
            Ok(ids) => ids,
            Err(_) if user == DEFAULT_USER => (DEFAULT_USER_UID, DEFAULT_USER_GID),
            Err(e) => return Err(e),
        };
        for path in [&ssh_dir, &authorized_keys] {
            nix::unistd::chown(
                path,
                Some(nix::unistd::Uid::from_raw(uid)),
                Some(nix::unistd::Gid::from_raw(gid)),
            )
            .map_err(|e| ModuleError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::from(e),
            })?;
        }

        Ok(format!(
            "successfully added {installed} keys to authorized_keys"
        ))
    }
}
