use std::fs::{Metadata, Permissions};
use std::io::Write;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use devbox_domain::{AccountIds, Fingerprint, GroupEntry, PasswdEntry};
use fs_err as fs;
use fs_err::os::unix::fs::OpenOptionsExt;

use super::process::{
    exec_command, run_command, run_command_passthrough, Invocation, RunOutput,
};
use super::session::Session;
use crate::config::GitCredential;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    /// Sockets, fifos and devices.
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryMeta {
    pub kind: EntryKind,
    /// Permission bits only (`& 0o7777`).
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub len: u64,
}

impl EntryMeta {
    #[must_use]
    pub fn ids(&self) -> AccountIds {
        AccountIds::new(self.uid, self.gid)
    }
}

pub trait FileSystem: Send + Sync {
    /// Metadata of the path itself; `None` when nothing exists there.
    fn symlink_metadata(&self, path: &Path) -> Result<Option<EntryMeta>>;
    /// Metadata after following symlinks; `None` when the target is missing.
    fn metadata(&self, path: &Path) -> Result<Option<EntryMeta>>;
    fn read_link(&self, path: &Path) -> Result<PathBuf>;
    /// Child paths, sorted.
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;
    fn read_to_string(&self, path: &Path) -> Result<String>;
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
    /// Creates a new file readable by its owner only; fails if it exists.
    fn write_private(&self, path: &Path, contents: &[u8]) -> Result<()>;
    /// Creates an empty file when absent, leaving existing content alone.
    fn touch(&self, path: &Path) -> Result<()>;
    fn create_dir_all(&self, path: &Path) -> Result<()>;
    /// Removes a file or a symlink (never its target).
    fn remove_file(&self, path: &Path) -> Result<()>;
    fn remove_dir_all(&self, path: &Path) -> Result<()>;
    fn symlink(&self, target: &Path, link: &Path) -> Result<()>;
    fn chown(&self, path: &Path, ids: AccountIds) -> Result<()>;
    /// Changes ownership of a symlink itself.
    fn lchown(&self, path: &Path, ids: AccountIds) -> Result<()>;
    fn set_mode(&self, path: &Path, mode: u32) -> Result<()>;
}

/// True when anything, including a dangling symlink, exists at `path`.
pub fn path_exists(fs: &dyn FileSystem, path: &Path) -> bool {
    matches!(fs.symlink_metadata(path), Ok(Some(_)))
}

pub trait AccountDirectory: Send + Sync {
    fn users(&self) -> Result<Vec<PasswdEntry>>;
    fn groups(&self) -> Result<Vec<GroupEntry>>;
    fn create_group(&self, name: &str, gid: u32) -> Result<()>;
    fn set_group_gid(&self, name: &str, gid: u32) -> Result<()>;
    fn set_user_uid(&self, name: &str, uid: u32) -> Result<()>;
    fn set_user_gid(&self, name: &str, gid: u32) -> Result<()>;
}

pub trait KeyManager: Send + Sync {
    fn restart_agent(&self, session: &Session) -> Result<()>;
    /// Colon-delimited secret key listing with fingerprints.
    fn list_secret_keys(&self, session: &Session) -> Result<String>;
    fn generate_key(&self, session: &Session, batch_file: &Path) -> Result<()>;
}

pub trait SecretStore: Send + Sync {
    fn init(&self, session: &Session, fingerprint: &Fingerprint) -> Result<()>;
    fn insert(&self, session: &Session, entry: &str, value: &str) -> Result<()>;
    /// `None` when the entry cannot be read.
    fn show(&self, session: &Session, entry: &str) -> Result<Option<String>>;
    fn remove(&self, session: &Session, entry: &str) -> Result<()>;
}

pub trait GitClient: Send + Sync {
    fn credential_helper(&self, session: &Session) -> Result<Option<String>>;
    fn approve_credential(&self, session: &Session, credential: &GitCredential) -> Result<()>;
}

pub trait Host: Send + Sync {
    fn effective_uid(&self) -> u32;
    fn find_program(&self, name: &str) -> Option<PathBuf>;
    fn run(&self, invocation: &Invocation) -> Result<RunOutput>;
    fn run_passthrough(&self, invocation: &Invocation) -> Result<i32>;
    /// Replaces the process; an `Ok` return only happens in test doubles.
    fn exec(&self, invocation: &Invocation) -> Result<()>;
    fn sleep(&self, duration: Duration);
}

pub trait Effects: Send + Sync {
    fn fs(&self) -> &dyn FileSystem;
    fn accounts(&self) -> &dyn AccountDirectory;
    fn keys(&self) -> &dyn KeyManager;
    fn secrets(&self) -> &dyn SecretStore;
    fn git(&self) -> &dyn GitClient;
    fn host(&self) -> &dyn Host;
}

pub struct SystemEffects {
    fs: Arc<SystemFileSystem>,
    accounts: Arc<SystemAccounts>,
    keys: Arc<SystemGpg>,
    secrets: Arc<SystemPass>,
    git: Arc<SystemGit>,
    host: Arc<SystemHost>,
}

impl SystemEffects {
    #[must_use]
    pub fn new() -> Self {
        Self {
            fs: Arc::new(SystemFileSystem),
            accounts: Arc::new(SystemAccounts::default()),
            keys: Arc::new(SystemGpg),
            secrets: Arc::new(SystemPass),
            git: Arc::new(SystemGit),
            host: Arc::new(SystemHost),
        }
    }
}

impl Default for SystemEffects {
    fn default() -> Self {
        Self::new()
    }
}

impl Effects for SystemEffects {
    fn fs(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    fn accounts(&self) -> &dyn AccountDirectory {
        self.accounts.as_ref()
    }

    fn keys(&self) -> &dyn KeyManager {
        self.keys.as_ref()
    }

    fn secrets(&self) -> &dyn SecretStore {
        self.secrets.as_ref()
    }

    fn git(&self) -> &dyn GitClient {
        self.git.as_ref()
    }

    fn host(&self) -> &dyn Host {
        self.host.as_ref()
    }
}

fn run_checked(invocation: &Invocation) -> Result<RunOutput> {
    let output = run_command(invocation)?;
    if !output.success() {
        bail!(
            "`{}` exited with {}: {}",
            invocation.display(),
            output.code,
            output.stderr.trim()
        );
    }
    Ok(output)
}

pub(crate) struct SystemFileSystem;

fn entry_meta(meta: &Metadata) -> EntryMeta {
    let file_type = meta.file_type();
    let kind = if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_dir() {
        EntryKind::Dir
    } else if file_type.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    };
    EntryMeta {
        kind,
        mode: meta.mode() & 0o7777,
        uid: meta.uid(),
        gid: meta.gid(),
        len: meta.len(),
    }
}

fn optional_meta(result: std::io::Result<Metadata>) -> Result<Option<EntryMeta>> {
    match result {
        Ok(meta) => Ok(Some(entry_meta(&meta))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

impl FileSystem for SystemFileSystem {
    fn symlink_metadata(&self, path: &Path) -> Result<Option<EntryMeta>> {
        optional_meta(fs::symlink_metadata(path))
    }

    fn metadata(&self, path: &Path) -> Result<Option<EntryMeta>> {
        optional_meta(fs::metadata(path))
    }

    fn read_link(&self, path: &Path) -> Result<PathBuf> {
        Ok(fs::read_link(path)?)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(path)?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort();
        Ok(entries)
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        Ok(fs::read_to_string(path)?)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        Ok(fs::write(path, contents)?)
    }

    fn write_private(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)?;
        Ok(file.write_all(contents)?)
    }

    fn touch(&self, path: &Path) -> Result<()> {
        fs::OpenOptions::new().create(true).append(true).open(path)?;
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        Ok(fs::create_dir_all(path)?)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        Ok(fs::remove_file(path)?)
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        Ok(fs::remove_dir_all(path)?)
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        Ok(fs::os::unix::fs::symlink(target, link)?)
    }

    fn chown(&self, path: &Path, ids: AccountIds) -> Result<()> {
        std::os::unix::fs::chown(path, Some(ids.uid), Some(ids.gid))
            .with_context(|| format!("chown {ids} {}", path.display()))
    }

    fn lchown(&self, path: &Path, ids: AccountIds) -> Result<()> {
        std::os::unix::fs::lchown(path, Some(ids.uid), Some(ids.gid))
            .with_context(|| format!("lchown {ids} {}", path.display()))
    }

    fn set_mode(&self, path: &Path, mode: u32) -> Result<()> {
        Ok(fs::set_permissions(path, Permissions::from_mode(mode))?)
    }
}

pub(crate) struct SystemAccounts {
    passwd: PathBuf,
    group: PathBuf,
}

impl Default for SystemAccounts {
    fn default() -> Self {
        Self {
            passwd: PathBuf::from("/etc/passwd"),
            group: PathBuf::from("/etc/group"),
        }
    }
}

impl AccountDirectory for SystemAccounts {
    fn users(&self) -> Result<Vec<PasswdEntry>> {
        let contents = fs::read_to_string(&self.passwd)?;
        PasswdEntry::parse_all(&contents)
            .with_context(|| format!("parsing {}", self.passwd.display()))
    }

    fn groups(&self) -> Result<Vec<GroupEntry>> {
        let contents = fs::read_to_string(&self.group)?;
        GroupEntry::parse_all(&contents)
            .with_context(|| format!("parsing {}", self.group.display()))
    }

    fn create_group(&self, name: &str, gid: u32) -> Result<()> {
        let gid = gid.to_string();
        run_checked(&Invocation::new("groupadd").args(["-g", gid.as_str(), name]))?;
        Ok(())
    }

    fn set_group_gid(&self, name: &str, gid: u32) -> Result<()> {
        let gid = gid.to_string();
        run_checked(&Invocation::new("groupmod").args(["-g", gid.as_str(), name]))?;
        Ok(())
    }

    fn set_user_uid(&self, name: &str, uid: u32) -> Result<()> {
        let uid = uid.to_string();
        run_checked(&Invocation::new("usermod").args(["-u", uid.as_str(), name]))?;
        Ok(())
    }

    fn set_user_gid(&self, name: &str, gid: u32) -> Result<()> {
        let gid = gid.to_string();
        run_checked(&Invocation::new("usermod").args(["-g", gid.as_str(), name]))?;
        Ok(())
    }
}

struct SystemGpg;

impl KeyManager for SystemGpg {
    fn restart_agent(&self, session: &Session) -> Result<()> {
        run_checked(&session.command("gpgconf", ["--kill", "gpg-agent"]))?;
        run_checked(&session.command("gpgconf", ["--launch", "gpg-agent"]))?;
        Ok(())
    }

    fn list_secret_keys(&self, session: &Session) -> Result<String> {
        let output = run_checked(&session.command(
            "gpg",
            [
                "--batch",
                "--list-secret-keys",
                "--with-colons",
                "--with-fingerprint",
            ],
        ))?;
        Ok(output.stdout)
    }

    fn generate_key(&self, session: &Session, batch_file: &Path) -> Result<()> {
        let batch = batch_file.display().to_string();
        run_checked(&session.command(
            "gpg",
            [
                "--batch",
                "--pinentry-mode",
                "loopback",
                "--generate-key",
                batch.as_str(),
            ],
        ))
        .map(|_| ())
    }
}

struct SystemPass;

impl SecretStore for SystemPass {
    fn init(&self, session: &Session, fingerprint: &Fingerprint) -> Result<()> {
        run_checked(&session.command("pass", ["init", fingerprint.as_str()])).map(|_| ())
    }

    fn insert(&self, session: &Session, entry: &str, value: &str) -> Result<()> {
        let invocation = session
            .command("pass", ["insert", "--multiline", "--force", entry])
            .stdin(value);
        run_checked(&invocation).map(|_| ())
    }

    fn show(&self, session: &Session, entry: &str) -> Result<Option<String>> {
        let output = run_command(&session.command("pass", ["show", entry]))?;
        Ok(output.success().then_some(output.stdout))
    }

    fn remove(&self, session: &Session, entry: &str) -> Result<()> {
        run_checked(&session.command("pass", ["rm", "--force", entry])).map(|_| ())
    }
}

struct SystemGit;

impl GitClient for SystemGit {
    fn credential_helper(&self, session: &Session) -> Result<Option<String>> {
        // every scope counts; the image sets the helper system-wide
        let invocation = session.command("git", ["config", "--get", "credential.helper"]);
        let output = run_command(&invocation)?;
        match output.code {
            0 => Ok(Some(output.stdout.trim().to_string()).filter(|helper| !helper.is_empty())),
            // git config exits 1 when the key is unset.
            1 => Ok(None),
            code => bail!(
                "`{}` exited with {code}: {}",
                invocation.display(),
                output.stderr.trim()
            ),
        }
    }

    fn approve_credential(&self, session: &Session, credential: &GitCredential) -> Result<()> {
        let invocation = session
            .command("git", ["credential", "approve"])
            .stdin(credential.to_protocol_input());
        run_checked(&invocation).map(|_| ())
    }
}

struct SystemHost;

impl Host for SystemHost {
    fn effective_uid(&self) -> u32 {
        nix::unistd::geteuid().as_raw()
    }

    fn find_program(&self, name: &str) -> Option<PathBuf> {
        which::which(name).ok()
    }

    fn run(&self, invocation: &Invocation) -> Result<RunOutput> {
        run_command(invocation)
    }

    fn run_passthrough(&self, invocation: &Invocation) -> Result<i32> {
        run_command_passthrough(invocation)
    }

    fn exec(&self, invocation: &Invocation) -> Result<()> {
        exec_command(invocation)
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

pub type SharedEffects = Arc<dyn Effects>;
