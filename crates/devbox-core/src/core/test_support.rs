//! In-memory effect adapters for exercising handlers without a container.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use devbox_domain::{AccountIds, Fingerprint, GroupEntry, PasswdEntry};

use crate::config::{EnvSnapshot, GitCredential, GlobalOptions};
use crate::context::CommandContext;
use crate::effects::{
    AccountDirectory, Effects, EntryKind, EntryMeta, FileSystem, GitClient, Host, KeyManager,
    SecretStore, SharedEffects,
};
use crate::process::{Invocation, RunOutput};
use crate::session::Session;

pub(crate) static GLOBAL: GlobalOptions = GlobalOptions {
    quiet: false,
    verbose: 0,
    trace: false,
    json: false,
};

pub(crate) const READY_MARKER: &str = "/persist/state/devbox_ready";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum NodeKind {
    File(Vec<u8>),
    Dir,
    Symlink(PathBuf),
    Socket,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) mode: u32,
    pub(crate) uid: u32,
    pub(crate) gid: u32,
}

impl Node {
    fn new(kind: NodeKind, mode: u32) -> Self {
        Self {
            kind,
            mode,
            uid: 0,
            gid: 0,
        }
    }

    fn meta(&self) -> EntryMeta {
        let (kind, len) = match &self.kind {
            NodeKind::File(bytes) => (EntryKind::File, bytes.len() as u64),
            NodeKind::Dir => (EntryKind::Dir, 0),
            NodeKind::Symlink(target) => (EntryKind::Symlink, target.as_os_str().len() as u64),
            NodeKind::Socket => (EntryKind::Other, 0),
        };
        EntryMeta {
            kind,
            mode: self.mode,
            uid: self.uid,
            gid: self.gid,
            len,
        }
    }
}

/// A single-root file tree with symlink resolution.
#[derive(Default)]
pub(crate) struct MemFs {
    nodes: Mutex<BTreeMap<PathBuf, Node>>,
    frozen_owners: Mutex<BTreeSet<PathBuf>>,
}

type Nodes = BTreeMap<PathBuf, Node>;

fn resolve(nodes: &Nodes, path: &Path, follow_last: bool) -> PathBuf {
    let components: Vec<Component<'_>> = path.components().collect();
    let mut resolved = PathBuf::from("/");
    for (idx, component) in components.iter().enumerate() {
        match component {
            Component::RootDir => resolved = PathBuf::from("/"),
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                let candidate = resolved.join(name);
                let last = idx + 1 == components.len();
                resolved = if last && !follow_last {
                    candidate
                } else {
                    follow(nodes, candidate)
                };
            }
            Component::CurDir | Component::Prefix(_) => {}
        }
    }
    resolved
}

fn follow(nodes: &Nodes, path: PathBuf) -> PathBuf {
    match nodes.get(&path).map(|node| &node.kind) {
        Some(NodeKind::Symlink(target)) => {
            let absolute = match path.parent() {
                Some(parent) if target.is_relative() => parent.join(target),
                _ => target.clone(),
            };
            resolve(nodes, &absolute, true)
        }
        _ => path,
    }
}

impl MemFs {
    pub(crate) fn new() -> Self {
        let fs = Self::default();
        lock(&fs.nodes).insert(PathBuf::from("/"), Node::new(NodeKind::Dir, 0o755));
        fs
    }

    pub(crate) fn add_dir(&self, path: impl AsRef<Path>) {
        self.create_dir_all(path.as_ref()).expect("mem dir");
    }

    pub(crate) fn add_file(&self, path: impl AsRef<Path>, contents: &str) {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            self.add_dir(parent);
        }
        self.write(path, contents.as_bytes()).expect("mem file");
    }

    pub(crate) fn add_link(&self, link: impl AsRef<Path>, target: impl AsRef<Path>) {
        let link = link.as_ref();
        if let Some(parent) = link.parent() {
            self.add_dir(parent);
        }
        self.symlink(target.as_ref(), link).expect("mem link");
    }

    pub(crate) fn add_socket(&self, path: impl AsRef<Path>) {
        let mut nodes = lock(&self.nodes);
        let resolved = resolve(&nodes, path.as_ref(), false);
        nodes.insert(resolved, Node::new(NodeKind::Socket, 0o700));
    }

    /// The node stored at `path` itself, without following a final link.
    pub(crate) fn node(&self, path: impl AsRef<Path>) -> Option<Node> {
        let nodes = lock(&self.nodes);
        let resolved = resolve(&nodes, path.as_ref(), false);
        nodes.get(&resolved).cloned()
    }

    pub(crate) fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.node(path).is_some()
    }

    /// Where `path` ends up after following every link.
    pub(crate) fn canonical(&self, path: impl AsRef<Path>) -> PathBuf {
        resolve(&lock(&self.nodes), path.as_ref(), true)
    }

    pub(crate) fn read(&self, path: impl AsRef<Path>) -> Option<String> {
        self.read_to_string(path.as_ref()).ok()
    }

    /// Paths at or below `root`, following nothing.
    pub(crate) fn tree(&self, root: impl AsRef<Path>) -> Vec<(PathBuf, Node)> {
        let nodes = lock(&self.nodes);
        let root = resolve(&nodes, root.as_ref(), true);
        nodes
            .iter()
            .filter(|(path, _)| path.starts_with(&root))
            .map(|(path, node)| (path.clone(), node.clone()))
            .collect()
    }

    pub(crate) fn set_owner(&self, path: impl AsRef<Path>, ids: AccountIds) {
        let mut nodes = lock(&self.nodes);
        let resolved = resolve(&nodes, path.as_ref(), true);
        if let Some(node) = nodes.get_mut(&resolved) {
            node.uid = ids.uid;
            node.gid = ids.gid;
        }
    }

    pub(crate) fn set_mode_of(&self, path: impl AsRef<Path>, mode: u32) {
        self.set_mode(path.as_ref(), mode).expect("mem mode");
    }

    /// Makes ownership changes below `path` fail, like an externally managed mount.
    pub(crate) fn freeze_owners(&self, path: impl Into<PathBuf>) {
        lock(&self.frozen_owners).insert(path.into());
    }

    fn owners_frozen(&self, path: &Path) -> bool {
        lock(&self.frozen_owners)
            .iter()
            .any(|frozen| path.starts_with(frozen))
    }

    fn insert_new(&self, path: &Path, node: Node, follow_last: bool) -> Result<()> {
        let mut nodes = lock(&self.nodes);
        let resolved = resolve(&nodes, path, follow_last);
        let parent = resolved
            .parent()
            .ok_or_else(|| anyhow!("cannot create the root"))?;
        match nodes.get(parent).map(|node| &node.kind) {
            Some(NodeKind::Dir) => {}
            _ => bail!("parent of {} is not a directory", path.display()),
        }
        if nodes.contains_key(&resolved) {
            bail!("{} already exists", path.display());
        }
        nodes.insert(resolved, node);
        Ok(())
    }
}

impl FileSystem for MemFs {
    fn symlink_metadata(&self, path: &Path) -> Result<Option<EntryMeta>> {
        let nodes = lock(&self.nodes);
        Ok(nodes.get(&resolve(&nodes, path, false)).map(Node::meta))
    }

    fn metadata(&self, path: &Path) -> Result<Option<EntryMeta>> {
        let nodes = lock(&self.nodes);
        Ok(nodes.get(&resolve(&nodes, path, true)).map(Node::meta))
    }

    fn read_link(&self, path: &Path) -> Result<PathBuf> {
        let nodes = lock(&self.nodes);
        match nodes.get(&resolve(&nodes, path, false)).map(|node| &node.kind) {
            Some(NodeKind::Symlink(target)) => Ok(target.clone()),
            _ => bail!("{} is not a symlink", path.display()),
        }
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let nodes = lock(&self.nodes);
        let resolved = resolve(&nodes, path, true);
        match nodes.get(&resolved).map(|node| &node.kind) {
            Some(NodeKind::Dir) => {}
            _ => bail!("{} is not a directory", path.display()),
        }
        Ok(nodes
            .keys()
            .filter(|candidate| candidate.parent() == Some(resolved.as_path()))
            .map(|child| path.join(child.file_name().unwrap_or_default()))
            .collect())
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        let nodes = lock(&self.nodes);
        match nodes.get(&resolve(&nodes, path, true)).map(|node| &node.kind) {
            Some(NodeKind::File(bytes)) => Ok(String::from_utf8_lossy(bytes).into_owned()),
            _ => bail!("{} is not a readable file", path.display()),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        {
            let mut nodes = lock(&self.nodes);
            let resolved = resolve(&nodes, path, true);
            if let Some(node) = nodes.get_mut(&resolved) {
                let NodeKind::File(bytes) = &mut node.kind else {
                    bail!("{} is not a file", path.display());
                };
                *bytes = contents.to_vec();
                return Ok(());
            }
        }
        self.insert_new(path, Node::new(NodeKind::File(contents.to_vec()), 0o644), true)
    }

    fn write_private(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.insert_new(path, Node::new(NodeKind::File(contents.to_vec()), 0o600), true)
    }

    fn touch(&self, path: &Path) -> Result<()> {
        match self.metadata(path)? {
            Some(meta) if meta.kind == EntryKind::File => Ok(()),
            Some(_) => bail!("{} is not a file", path.display()),
            None => self.insert_new(path, Node::new(NodeKind::File(Vec::new()), 0o644), true),
        }
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut current = PathBuf::from("/");
        for component in path.components() {
            let Component::Normal(name) = component else {
                continue;
            };
            current.push(name);
            match self.metadata(&current)? {
                Some(meta) if meta.kind == EntryKind::Dir => {}
                Some(_) => bail!("{} exists and is not a directory", current.display()),
                None => self.insert_new(&current, Node::new(NodeKind::Dir, 0o755), true)?,
            }
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let mut nodes = lock(&self.nodes);
        let resolved = resolve(&nodes, path, false);
        match nodes.get(&resolved).map(|node| &node.kind) {
            Some(NodeKind::Dir) => bail!("{} is a directory", path.display()),
            Some(_) => {
                nodes.remove(&resolved);
                Ok(())
            }
            None => bail!("{} does not exist", path.display()),
        }
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        let mut nodes = lock(&self.nodes);
        let resolved = resolve(&nodes, path, false);
        match nodes.get(&resolved).map(|node| &node.kind) {
            Some(NodeKind::Dir) => {
                nodes.retain(|candidate, _| !candidate.starts_with(&resolved));
                Ok(())
            }
            _ => bail!("{} is not a directory", path.display()),
        }
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        self.insert_new(
            link,
            Node::new(NodeKind::Symlink(target.to_path_buf()), 0o777),
            false,
        )
    }

    fn chown(&self, path: &Path, ids: AccountIds) -> Result<()> {
        let mut nodes = lock(&self.nodes);
        let resolved = resolve(&nodes, path, true);
        if self.owners_frozen(&resolved) {
            bail!("chown {}: operation not permitted", path.display());
        }
        let node = nodes
            .get_mut(&resolved)
            .ok_or_else(|| anyhow!("{} does not exist", path.display()))?;
        node.uid = ids.uid;
        node.gid = ids.gid;
        Ok(())
    }

    fn lchown(&self, path: &Path, ids: AccountIds) -> Result<()> {
        let mut nodes = lock(&self.nodes);
        let resolved = resolve(&nodes, path, false);
        if self.owners_frozen(&resolved) {
            bail!("lchown {}: operation not permitted", path.display());
        }
        let node = nodes
            .get_mut(&resolved)
            .ok_or_else(|| anyhow!("{} does not exist", path.display()))?;
        node.uid = ids.uid;
        node.gid = ids.gid;
        Ok(())
    }

    fn set_mode(&self, path: &Path, mode: u32) -> Result<()> {
        let mut nodes = lock(&self.nodes);
        let resolved = resolve(&nodes, path, true);
        let node = nodes
            .get_mut(&resolved)
            .ok_or_else(|| anyhow!("{} does not exist", path.display()))?;
        node.mode = mode & 0o7777;
        Ok(())
    }
}

/// Records which effects ran and whether the readiness marker existed at the time.
pub(crate) struct Journal {
    fs: Arc<MemFs>,
    events: Mutex<Vec<(String, bool)>>,
}

impl Journal {
    fn record(&self, event: impl Into<String>) {
        let ready = self.fs.exists(READY_MARKER);
        lock(&self.events).push((event.into(), ready));
    }

    pub(crate) fn events(&self) -> Vec<(String, bool)> {
        lock(&self.events).clone()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.events().into_iter().map(|(name, _)| name).collect()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.names()
            .iter()
            .filter(|name| name.starts_with(prefix))
            .count()
    }
}

#[derive(Default)]
pub(crate) struct AccountFailures {
    pub(crate) group: bool,
    pub(crate) relocation: bool,
}

pub(crate) struct FakeAccounts {
    journal: Arc<Journal>,
    users: Mutex<Vec<PasswdEntry>>,
    groups: Mutex<Vec<GroupEntry>>,
    pub(crate) failures: Mutex<AccountFailures>,
}

impl FakeAccounts {
    pub(crate) fn add_user(&self, name: &str, uid: u32, gid: u32) {
        lock(&self.users).push(PasswdEntry {
            name: name.to_string(),
            uid,
            gid,
            home: PathBuf::from(format!("/home/{name}")),
            shell: "/bin/sh".to_string(),
        });
    }

    pub(crate) fn add_group(&self, name: &str, gid: u32) {
        lock(&self.groups).push(GroupEntry {
            name: name.to_string(),
            gid,
            members: Vec::new(),
        });
    }

    pub(crate) fn remove_group(&self, name: &str) {
        lock(&self.groups).retain(|group| group.name != name);
    }

    pub(crate) fn remove_user(&self, name: &str) {
        lock(&self.users).retain(|user| user.name != name);
    }

    pub(crate) fn user(&self, name: &str) -> Option<PasswdEntry> {
        lock(&self.users).iter().find(|user| user.name == name).cloned()
    }

    pub(crate) fn holders_of_uid(&self, uid: u32) -> Vec<String> {
        lock(&self.users)
            .iter()
            .filter(|user| user.uid == uid)
            .map(|user| user.name.clone())
            .collect()
    }

    fn set_shell(&self, name: &str, shell: &str) {
        if let Some(user) = lock(&self.users).iter_mut().find(|user| user.name == name) {
            user.shell = shell.to_string();
        }
    }
}

impl AccountDirectory for FakeAccounts {
    fn users(&self) -> Result<Vec<PasswdEntry>> {
        Ok(lock(&self.users).clone())
    }

    fn groups(&self) -> Result<Vec<GroupEntry>> {
        Ok(lock(&self.groups).clone())
    }

    fn create_group(&self, name: &str, gid: u32) -> Result<()> {
        self.journal.record(format!("groupadd {name} {gid}"));
        if lock(&self.failures).group {
            bail!("groupadd: cannot lock /etc/group");
        }
        let mut groups = lock(&self.groups);
        if groups.iter().any(|group| group.gid == gid || group.name == name) {
            bail!("groupadd: group '{name}' or GID {gid} already exists");
        }
        groups.push(GroupEntry {
            name: name.to_string(),
            gid,
            members: Vec::new(),
        });
        Ok(())
    }

    fn set_group_gid(&self, name: &str, gid: u32) -> Result<()> {
        self.journal.record(format!("groupmod {name} {gid}"));
        if lock(&self.failures).group {
            bail!("groupmod: cannot lock /etc/group");
        }
        let mut groups = lock(&self.groups);
        if groups.iter().any(|group| group.gid == gid && group.name != name) {
            bail!("groupmod: GID '{gid}' already exists");
        }
        let group = groups
            .iter_mut()
            .find(|group| group.name == name)
            .ok_or_else(|| anyhow!("groupmod: group '{name}' does not exist"))?;
        group.gid = gid;
        Ok(())
    }

    fn set_user_uid(&self, name: &str, uid: u32) -> Result<()> {
        self.journal.record(format!("usermod -u {name} {uid}"));
        if name != "dev" && lock(&self.failures).relocation {
            bail!("usermod: user {name} is currently used by process 1");
        }
        let mut users = lock(&self.users);
        if users.iter().any(|user| user.uid == uid && user.name != name) {
            bail!("usermod: UID '{uid}' already exists");
        }
        let user = users
            .iter_mut()
            .find(|user| user.name == name)
            .ok_or_else(|| anyhow!("usermod: user '{name}' does not exist"))?;
        user.uid = uid;
        Ok(())
    }

    fn set_user_gid(&self, name: &str, gid: u32) -> Result<()> {
        self.journal.record(format!("usermod -g {name} {gid}"));
        if !lock(&self.groups).iter().any(|group| group.gid == gid) {
            bail!("usermod: group '{gid}' does not exist");
        }
        let mut users = lock(&self.users);
        let user = users
            .iter_mut()
            .find(|user| user.name == name)
            .ok_or_else(|| anyhow!("usermod: user '{name}' does not exist"))?;
        user.gid = gid;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub(crate) struct FakeKey {
    pub(crate) fingerprint: Fingerprint,
    pub(crate) email: String,
}

#[derive(Default)]
pub(crate) struct KeyBehavior {
    pub(crate) restart_fails: bool,
    /// Generation "succeeds" without producing a key.
    pub(crate) generate_silently_fails: bool,
    pub(crate) listing_fails: bool,
}

pub(crate) struct FakeKeys {
    journal: Arc<Journal>,
    fs: Arc<MemFs>,
    keys: Mutex<Vec<FakeKey>>,
    pub(crate) behavior: Mutex<KeyBehavior>,
    pub(crate) batches: Mutex<Vec<(PathBuf, u32, String)>>,
}

impl FakeKeys {
    pub(crate) fn keys(&self) -> Vec<FakeKey> {
        lock(&self.keys).clone()
    }

    /// Adds a key as if a previous container had generated it.
    pub(crate) fn preload(&self, fingerprint: &str, email: &str) {
        lock(&self.keys).push(FakeKey {
            fingerprint: fingerprint.parse().expect("fingerprint"),
            email: email.to_string(),
        });
    }

    fn render_listing(&self) -> String {
        let mut listing = String::new();
        for key in lock(&self.keys).iter() {
            let fpr = key.fingerprint.as_str();
            let key_id = &fpr[fpr.len() - 16..];
            listing.push_str(&format!(
                "sec:u:4096:1:{key_id}:1700000000:::u:::scESC:::+:::23::0:\n\
                 fpr:::::::::{fpr}:\n\
                 uid:u::::1700000000::HASH::Devbox User <{}>::::::::::0:\n",
                key.email
            ));
        }
        listing
    }
}

impl KeyManager for FakeKeys {
    fn restart_agent(&self, _session: &Session) -> Result<()> {
        self.journal.record("gpgconf restart");
        if lock(&self.behavior).restart_fails {
            bail!("gpgconf: no gpg-agent running");
        }
        Ok(())
    }

    fn list_secret_keys(&self, _session: &Session) -> Result<String> {
        self.journal.record("gpg list");
        if lock(&self.behavior).listing_fails {
            bail!("gpg: keybox locked");
        }
        Ok(self.render_listing())
    }

    fn generate_key(&self, session: &Session, batch_file: &Path) -> Result<()> {
        self.journal.record("gpg generate");
        let meta = self
            .fs
            .symlink_metadata(batch_file)?
            .ok_or_else(|| anyhow!("gpg: can't open '{}'", batch_file.display()))?;
        let contents = self.fs.read_to_string(batch_file)?;
        lock(&self.batches).push((batch_file.to_path_buf(), meta.mode, contents.clone()));
        if lock(&self.behavior).generate_silently_fails {
            return Ok(());
        }
        let email = contents
            .lines()
            .find_map(|line| line.strip_prefix("Name-Email: "))
            .unwrap_or("unknown@localhost")
            .to_string();
        let index = lock(&self.keys).len() + 1;
        let fingerprint: Fingerprint = format!("{index:08X}{}", "C0FFEE00".repeat(4)).parse()?;

        let gnupg = PathBuf::from(session.var("GNUPGHOME").unwrap_or("/home/dev/.gnupg"));
        let keys_dir = gnupg.join("private-keys-v1.d");
        self.fs.create_dir_all(&keys_dir)?;
        let key_file = keys_dir.join(format!("{fingerprint}.key"));
        self.fs.write(&key_file, b"(private-key)")?;
        if let Some(run_as) = session.run_as() {
            let ids = AccountIds::new(run_as.uid, run_as.gid);
            self.fs.chown(&keys_dir, ids)?;
            self.fs.chown(&key_file, ids)?;
        }
        self.fs.set_mode(&keys_dir, 0o700)?;
        self.fs.set_mode(&key_file, 0o600)?;
        lock(&self.keys).push(FakeKey { fingerprint, email });
        Ok(())
    }
}

const READ: u32 = 0o4;
const WRITE: u32 = 0o2;
const STORE_ROOT: &str = "/persist/password-store";

/// Owner and other permission bits as the kernel checks them for `caller`.
fn permits(fs: &MemFs, path: &Path, caller: AccountIds, access: u32) -> bool {
    if caller.uid == 0 {
        return true;
    }
    match fs.metadata(path) {
        Ok(Some(meta)) if meta.uid == caller.uid => meta.mode & (access << 6) != 0,
        Ok(Some(meta)) => meta.mode & access != 0,
        _ => false,
    }
}

/// A `pass` double that keeps entries as owner-only files on the volume,
/// created by whoever the session runs as.
#[derive(Default)]
pub(crate) struct FakeSecrets {
    journal: Option<Arc<Journal>>,
    fs: Option<Arc<MemFs>>,
    euid: Arc<Mutex<u32>>,
    pub(crate) init_fails: Mutex<bool>,
    /// Entries that survive `remove`, simulating a broken store.
    pub(crate) sticky: Mutex<bool>,
    pub(crate) remove_fails: Mutex<bool>,
}

impl FakeSecrets {
    fn store_dir(session: &Session) -> PathBuf {
        PathBuf::from(session.var("PASSWORD_STORE_DIR").unwrap_or(STORE_ROOT))
    }

    fn entry_file(session: &Session, entry: &str) -> PathBuf {
        Self::store_dir(session).join(format!("{entry}.gpg"))
    }

    fn record(&self, event: &str) {
        if let Some(journal) = &self.journal {
            journal.record(event);
        }
    }

    fn fs(&self) -> Result<&MemFs> {
        self.fs
            .as_deref()
            .ok_or_else(|| anyhow!("secret store has no file system"))
    }

    fn caller(&self, session: &Session) -> AccountIds {
        match session.run_as() {
            Some(run_as) => AccountIds::new(run_as.uid, run_as.gid),
            None => {
                let uid = *lock(&self.euid);
                AccountIds::new(uid, uid)
            }
        }
    }

    /// Creates missing directories and the file the way `pass` does under umask 077.
    fn write_owned(fs: &MemFs, path: &Path, contents: &[u8], caller: AccountIds) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow!("{} has no parent", path.display()))?;
        let mut missing = Vec::new();
        let mut dir = parent;
        while !fs.exists(dir) {
            missing.push(dir.to_path_buf());
            dir = dir
                .parent()
                .ok_or_else(|| anyhow!("{} has no parent", path.display()))?;
        }
        if !permits(fs, dir, caller, WRITE) {
            bail!("mkdir: cannot create directory '{}': Permission denied", parent.display());
        }
        for dir in missing.iter().rev() {
            fs.create_dir_all(dir)?;
            fs.chown(dir, caller)?;
            fs.set_mode(dir, 0o700)?;
        }
        let writable = if fs.exists(path) {
            permits(fs, path, caller, WRITE)
        } else {
            permits(fs, parent, caller, WRITE)
        };
        if !writable {
            bail!("{}: Permission denied", path.display());
        }
        fs.write(path, contents)?;
        fs.chown(path, caller)?;
        fs.set_mode(path, 0o600)
    }

    /// Entry names under the default store, as `pass ls` would print them.
    pub(crate) fn entry_names(&self) -> Vec<String> {
        let Some(fs) = self.fs.as_deref() else {
            return Vec::new();
        };
        fs.tree(STORE_ROOT)
            .into_iter()
            .filter(|(_, node)| matches!(node.kind, NodeKind::File(_)))
            .filter_map(|(path, _)| {
                let relative = path.strip_prefix(STORE_ROOT).ok()?.to_str()?;
                relative.strip_suffix(".gpg").map(ToString::to_string)
            })
            .collect()
    }
}

impl SecretStore for FakeSecrets {
    fn init(&self, session: &Session, fingerprint: &Fingerprint) -> Result<()> {
        self.record("pass init");
        if *lock(&self.init_fails) {
            bail!("gpg: {fingerprint}: skipped: No public key");
        }
        let fs = self.fs()?;
        let marker = Self::store_dir(session).join(".gpg-id");
        let contents = format!("{fingerprint}\n");
        Self::write_owned(fs, &marker, contents.as_bytes(), self.caller(session))
    }

    fn insert(&self, session: &Session, entry: &str, value: &str) -> Result<()> {
        self.record("pass insert");
        let fs = self.fs()?;
        let caller = self.caller(session);
        let marker = Self::store_dir(session).join(".gpg-id");
        if !fs.exists(&marker) {
            bail!("Error: You must run:\n    pass init your-gpg-id");
        }
        if !permits(fs, &marker, caller, READ) {
            bail!("{}: Permission denied", marker.display());
        }
        Self::write_owned(fs, &Self::entry_file(session, entry), value.as_bytes(), caller)
    }

    fn show(&self, session: &Session, entry: &str) -> Result<Option<String>> {
        self.record("pass show");
        let fs = self.fs()?;
        let file = Self::entry_file(session, entry);
        if !fs.exists(&file) || !permits(fs, &file, self.caller(session), READ) {
            return Ok(None);
        }
        fs.read_to_string(&file).map(Some)
    }

    fn remove(&self, session: &Session, entry: &str) -> Result<()> {
        self.record("pass rm");
        if *lock(&self.remove_fails) {
            bail!("rm: cannot remove '{entry}.gpg': Read-only file system");
        }
        if *lock(&self.sticky) {
            return Ok(());
        }
        let fs = self.fs()?;
        let store = Self::store_dir(session);
        let file = Self::entry_file(session, entry);
        let parent_writable = file
            .parent()
            .is_some_and(|parent| permits(fs, parent, self.caller(session), WRITE));
        if !parent_writable {
            bail!("rm: cannot remove '{}': Permission denied", file.display());
        }
        fs.remove_file(&file)?;
        // like `rmdir -p`, drop directories the entry leaves empty
        let mut dir = file.parent().map(Path::to_path_buf);
        while let Some(current) = dir {
            if current == store || !fs.read_dir(&current)?.is_empty() {
                break;
            }
            fs.remove_dir_all(&current)?;
            dir = current.parent().map(Path::to_path_buf);
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeGit {
    journal: Option<Arc<Journal>>,
    pub(crate) helper: Mutex<Option<String>>,
    pub(crate) approve_fails: Mutex<bool>,
    pub(crate) approved: Mutex<Vec<(GitCredential, Option<u32>)>>,
}

impl GitClient for FakeGit {
    fn credential_helper(&self, _session: &Session) -> Result<Option<String>> {
        Ok(lock(&self.helper).clone())
    }

    fn approve_credential(&self, session: &Session, credential: &GitCredential) -> Result<()> {
        if let Some(journal) = &self.journal {
            journal.record("git credential approve");
        }
        if *lock(&self.approve_fails) {
            bail!("git: credential helper exited with 1");
        }
        lock(&self.approved).push((credential.clone(), session.run_as().map(|ids| ids.uid)));
        Ok(())
    }
}

pub(crate) struct FakeHost {
    pub(crate) euid: Arc<Mutex<u32>>,
    pub(crate) programs: Mutex<BTreeSet<String>>,
    pub(crate) runs: Mutex<Vec<Invocation>>,
    pub(crate) scripted: Mutex<VecDeque<RunOutput>>,
    pub(crate) passthrough: Mutex<Vec<Invocation>>,
    pub(crate) passthrough_codes: Mutex<VecDeque<i32>>,
    pub(crate) execs: Mutex<Vec<Invocation>>,
    pub(crate) sleeps: Mutex<Vec<Duration>>,
}

impl FakeHost {
    fn new(euid: u32, programs: &[&str]) -> Self {
        Self {
            euid: Arc::new(Mutex::new(euid)),
            programs: Mutex::new(programs.iter().map(ToString::to_string).collect()),
            runs: Mutex::default(),
            scripted: Mutex::default(),
            passthrough: Mutex::default(),
            passthrough_codes: Mutex::default(),
            execs: Mutex::default(),
            sleeps: Mutex::default(),
        }
    }

    pub(crate) fn script(&self, code: i32) {
        lock(&self.scripted).push_back(RunOutput {
            code,
            stdout: String::new(),
            stderr: String::new(),
        });
    }

    pub(crate) fn remove_program(&self, name: &str) {
        lock(&self.programs).remove(name);
    }
}

impl Host for FakeHost {
    fn effective_uid(&self) -> u32 {
        *lock(&self.euid)
    }

    fn find_program(&self, name: &str) -> Option<PathBuf> {
        lock(&self.programs)
            .contains(name)
            .then(|| PathBuf::from("/usr/bin").join(name))
    }

    fn run(&self, invocation: &Invocation) -> Result<RunOutput> {
        lock(&self.runs).push(invocation.clone());
        Ok(lock(&self.scripted).pop_front().unwrap_or(RunOutput {
            code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }))
    }

    fn run_passthrough(&self, invocation: &Invocation) -> Result<i32> {
        lock(&self.passthrough).push(invocation.clone());
        Ok(lock(&self.passthrough_codes).pop_front().unwrap_or(0))
    }

    fn exec(&self, invocation: &Invocation) -> Result<()> {
        lock(&self.execs).push(invocation.clone());
        Ok(())
    }

    fn sleep(&self, duration: Duration) {
        lock(&self.sleeps).push(duration);
    }
}

pub(crate) const CONTAINER_PROGRAMS: [&str; 7] =
    ["gpg", "gpgconf", "pass", "git", "usermod", "groupmod", "groupadd"];

pub(crate) struct FakeEffects {
    pub(crate) fs: Arc<MemFs>,
    pub(crate) journal: Arc<Journal>,
    pub(crate) accounts: FakeAccounts,
    pub(crate) keys: FakeKeys,
    pub(crate) secrets: FakeSecrets,
    pub(crate) git: FakeGit,
    pub(crate) host: FakeHost,
}

impl FakeEffects {
    /// A freshly started image: `dev` at 1000/1000, an empty `/persist` volume,
    /// running as root with every required tool installed.
    pub(crate) fn container() -> Self {
        let fs = Arc::new(MemFs::new());
        fs.add_dir("/home/dev");
        fs.set_owner("/home/dev", AccountIds::new(1000, 1000));
        fs.add_dir("/persist");
        let journal = Arc::new(Journal {
            fs: fs.clone(),
            events: Mutex::default(),
        });
        let accounts = FakeAccounts {
            journal: journal.clone(),
            users: Mutex::default(),
            groups: Mutex::default(),
            failures: Mutex::default(),
        };
        accounts.add_user("root", 0, 0);
        accounts.add_group("root", 0);
        accounts.add_user("dev", 1000, 1000);
        accounts.set_shell("dev", "/bin/zsh");
        accounts.add_group("dev", 1000);
        let keys = FakeKeys {
            journal: journal.clone(),
            fs: fs.clone(),
            keys: Mutex::default(),
            behavior: Mutex::default(),
            batches: Mutex::default(),
        };
        let host = FakeHost::new(0, &CONTAINER_PROGRAMS);
        let secrets = FakeSecrets {
            journal: Some(journal.clone()),
            fs: Some(fs.clone()),
            euid: host.euid.clone(),
            ..FakeSecrets::default()
        };
        let git = FakeGit {
            journal: Some(journal.clone()),
            ..FakeGit::default()
        };
        Self {
            fs,
            journal,
            accounts,
            keys,
            secrets,
            git,
            host,
        }
    }

    /// A host machine without any container tooling, running as a normal user.
    pub(crate) fn workstation(programs: &[&str]) -> Self {
        let effects = Self::container();
        *lock(&effects.host.euid) = 1000;
        *lock(&effects.host.programs) = programs.iter().map(ToString::to_string).collect();
        effects
    }
}

impl Effects for FakeEffects {
    fn fs(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    fn accounts(&self) -> &dyn AccountDirectory {
        &self.accounts
    }

    fn keys(&self) -> &dyn KeyManager {
        &self.keys
    }

    fn secrets(&self) -> &dyn SecretStore {
        &self.secrets
    }

    fn git(&self) -> &dyn GitClient {
        &self.git
    }

    fn host(&self) -> &dyn Host {
        &self.host
    }
}

pub(crate) fn fake_container() -> Arc<FakeEffects> {
    Arc::new(FakeEffects::container())
}

pub(crate) fn context(
    effects: &Arc<FakeEffects>,
    env: &[(&str, &str)],
) -> CommandContext<'static> {
    let shared: SharedEffects = effects.clone();
    CommandContext::from_snapshot(&GLOBAL, &EnvSnapshot::testing(env), shared).expect("context")
}

pub(crate) fn lock_for_test<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    lock(mutex)
}

#[test]
fn mem_fs_follows_links_through_parents() -> Result<()> {
    let fs = MemFs::new();
    fs.add_dir("/persist/gnupg");
    fs.add_link("/home/dev/.gnupg", "/persist/gnupg");
    fs.write(Path::new("/home/dev/.gnupg/pubring.kbx"), b"ring")?;
    assert_eq!(fs.read("/persist/gnupg/pubring.kbx").as_deref(), Some("ring"));
    assert_eq!(
        fs.canonical("/home/dev/.gnupg/pubring.kbx"),
        PathBuf::from("/persist/gnupg/pubring.kbx")
    );
    assert_eq!(
        fs.symlink_metadata(Path::new("/home/dev/.gnupg"))?
            .map(|meta| meta.kind),
        Some(EntryKind::Symlink)
    );
    assert_eq!(
        fs.read_dir(Path::new("/home/dev/.gnupg"))?,
        vec![PathBuf::from("/home/dev/.gnupg/pubring.kbx")]
    );
    fs.remove_file(Path::new("/home/dev/.gnupg"))?;
    assert!(fs.exists("/persist/gnupg/pubring.kbx"));
    Ok(())
}
