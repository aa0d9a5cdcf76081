//! Process-wide state the plugin mutates, owned by the harness.
//!
//! [`PolicyContext`] is handed to the plugin by exclusive reference for the
//! whole open/check/close sequence and reset afterwards, so that every
//! iteration starts from the same zeroed baseline.

use crate::capabilities::Capabilities;
use std::collections::HashMap;
use std::ffi::CString;
use std::rc::Rc;
use tracing::trace;

/// A password-database entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Passwd {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub dir: String,
    pub shell: String,
}

/// A group-database entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Group {
    pub name: String,
    pub gid: u32,
}

/// Supplementary group ids resolved for one user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GidList {
    pub gids: Vec<u32>,
}

/// Reference-counted identity entries shared between the cache and the user state.
///
/// Handles given out by the cache must be released back before the user
/// state is zeroed; [`IdentityCache::outstanding`] counts the ones that were not.
#[derive(Debug, Default)]
pub struct IdentityCache {
    users: HashMap<(String, u32, u32), Rc<Passwd>>,
    groups: HashMap<(String, u32), Rc<Group>>,
    gid_lists: HashMap<(String, Vec<u32>), Rc<GidList>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up (or synthesizes) a password entry and returns a new handle to it.
    pub fn passwd(&mut self, name: &str, uid: u32, gid: u32) -> Rc<Passwd> {
        let entry = self
            .users
            .entry((name.to_string(), uid, gid))
            .or_insert_with(|| {
                Rc::new(Passwd {
                    name: name.to_string(),
                    uid,
                    gid,
                    dir: if uid == 0 {
                        "/root".to_string()
                    } else {
                        format!("/home/{name}")
                    },
                    shell: "/bin/sh".to_string(),
                })
            });
        Rc::clone(entry)
    }

    pub fn group(&mut self, name: &str, gid: u32) -> Rc<Group> {
        let entry = self
            .groups
            .entry((name.to_string(), gid))
            .or_insert_with(|| {
                Rc::new(Group {
                    name: name.to_string(),
                    gid,
                })
            });
        Rc::clone(entry)
    }

    pub fn gid_list(&mut self, name: &str, gids: &[u32]) -> Rc<GidList> {
        let entry = self
            .gid_lists
            .entry((name.to_string(), gids.to_vec()))
            .or_insert_with(|| {
                Rc::new(GidList {
                    gids: gids.to_vec(),
                })
            });
        Rc::clone(entry)
    }

    /// Handles currently held outside the cache.
    pub fn outstanding(&self) -> usize {
        self.users
            .values()
            .map(|e| Rc::strong_count(e) - 1)
            .chain(self.groups.values().map(|e| Rc::strong_count(e) - 1))
            .chain(self.gid_lists.values().map(|e| Rc::strong_count(e) - 1))
            .sum()
    }

    /// Drops entries nobody holds a handle to. Returns how many were dropped.
    pub fn purge_unreferenced(&mut self) -> usize {
        let before = self.len();
        self.users.retain(|_, e| Rc::strong_count(e) > 1);
        self.groups.retain(|_, e| Rc::strong_count(e) > 1);
        self.gid_lists.retain(|_, e| Rc::strong_count(e) > 1);
        before - self.len()
    }

    pub fn len(&self) -> usize {
        self.users.len() + self.groups.len() + self.gid_lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Metadata recorded for the resolved command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandStat {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

/// The invoking user's identity and session, as filled in by the plugin.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserState {
    pub pw: Option<Rc<Passwd>>,
    pub gid_list: Option<Rc<GidList>>,
    pub runas_pw: Option<Rc<Passwd>>,
    pub runas_gr: Option<Rc<Group>>,

    pub name: Option<String>,
    pub cwd: Option<String>,
    pub tty: Option<String>,
    pub ttypath: Option<String>,
    pub host: Option<String>,
    pub shost: Option<String>,
    pub runhost: Option<String>,
    pub srunhost: Option<String>,
    pub cmnd: Option<String>,
    pub cmnd_args: Option<String>,
    pub cmnd_safe: Option<String>,
    pub cmnd_stat: Option<CommandStat>,
    pub iolog_file: Option<String>,
    pub iolog_path: Option<String>,
    pub gids: Vec<u32>,

    pub uid: u32,
    pub gid: u32,
    pub sid: i32,
    pub lines: i32,
    pub cols: i32,
    pub umask: u32,
}

impl UserState {
    /// Releases the password, group-list, run-as user and run-as group handles.
    pub fn release_handles(&mut self) -> usize {
        let released = [
            self.pw.take().is_some(),
            self.gid_list.take().is_some(),
            self.runas_pw.take().is_some(),
            self.runas_gr.take().is_some(),
        ];
        released.into_iter().filter(|&r| r).count()
    }

    /// Frees every owned string and the group-id vector.
    pub fn free_strings(&mut self) -> usize {
        let fields = [
            &mut self.name,
            &mut self.cwd,
            &mut self.tty,
            &mut self.ttypath,
            &mut self.host,
            &mut self.shost,
            &mut self.runhost,
            &mut self.srunhost,
            &mut self.cmnd,
            &mut self.cmnd_args,
            &mut self.cmnd_safe,
            &mut self.iolog_file,
            &mut self.iolog_path,
        ];
        let mut freed = 0;
        for field in fields {
            if field.take().is_some() {
                freed += 1;
            }
        }
        if self.cmnd_stat.take().is_some() {
            freed += 1;
        }
        if !self.gids.is_empty() {
            self.gids = Vec::new();
            freed += 1;
        }
        freed
    }

    pub fn zero(&mut self) {
        *self = Self::default();
    }

    pub fn is_zeroed(&self) -> bool {
        *self == Self::default()
    }
}

/// The plugin's copy of the environment, as `NAME=value` entries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvSnapshot {
    entries: Vec<String>,
}

impl EnvSnapshot {
    /// Replaces the snapshot with `envp`, or empties it when `envp` is `None`.
    pub fn init(&mut self, envp: Option<&[CString]>) {
        self.entries = envp
            .unwrap_or_default()
            .iter()
            .map(|entry| entry.to_string_lossy().into_owned())
            .collect();
    }

    /// Sets `name`, replacing any existing definition.
    pub fn set(&mut self, name: &str, value: &str) {
        let prefix = format!("{name}=");
        self.entries.retain(|entry| !entry.starts_with(&prefix));
        self.entries.push(format!("{prefix}{value}"));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.iter().find_map(|entry| {
            entry
                .strip_prefix(name)
                .and_then(|rest| rest.strip_prefix('='))
        })
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What a [`PolicyContext::reset`] released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResetReport {
    pub handles_released: usize,
    pub strings_freed: usize,
    pub cache_entries_purged: usize,
    pub env_entries_cleared: usize,
    pub outputs_dropped: usize,
    pub arrays_released: usize,
}

/// Everything the plugin may touch during one iteration.
#[derive(Debug, Default)]
pub struct PolicyContext {
    pub user: UserState,
    pub env: EnvSnapshot,
    pub identities: IdentityCache,
    pub capabilities: Capabilities,
}

impl PolicyContext {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            ..Self::default()
        }
    }

    /// Returns the user state and environment snapshot to their zeroed baseline.
    ///
    /// Handles go back to the identity cache before the record is zeroed;
    /// zeroing first would leave the cache believing they are still in use.
    pub fn reset(&mut self) -> ResetReport {
        let handles_released = self.user.release_handles();
        let cache_entries_purged = self.identities.purge_unreferenced();
        let strings_freed = self.user.free_strings();
        self.user.zero();

        let env_entries_cleared = self.env.len();
        self.env.init(None);

        trace!(
            handles_released,
            strings_freed, cache_entries_purged, env_entries_cleared, "policy context reset"
        );
        ResetReport {
            handles_released,
            strings_freed,
            cache_entries_purged,
            env_entries_cleared,
            ..ResetReport::default()
        }
    }

    /// Whether the context is indistinguishable from a freshly created one.
    pub fn is_clean(&self) -> bool {
        self.user.is_zeroed() && self.env.is_empty() && self.identities.outstanding() == 0
    }
}
