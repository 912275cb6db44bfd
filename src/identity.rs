//! uid/gid to name resolution.
//!
//! Lookup order: per-resolver cache, the local `passwd`/`group` tables, then
//! a directory service (the C library's NSS lookups, which reach LDAP on
//! hosts configured for it). When everything fails the numeric id is
//! returned as a string. Resolution never fails.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::config::{DirectoryMode, IdentityConfig};

/// Remote account lookup, consulted after the local tables.
pub trait DirectoryService: Send + Sync {
    fn lookup_user(&self, uid: u32) -> Option<String>;
    fn lookup_group(&self, gid: u32) -> Option<String>;
}

/// In-process NSS lookups (`getpwuid_r`/`getgrgid_r`), so LDAP-backed
/// accounts resolve on hosts configured for it.
pub struct Nss;

#[cfg(unix)]
impl DirectoryService for Nss {
    fn lookup_user(&self, uid: u32) -> Option<String> {
        use nix::unistd::{Uid, User};
        match User::from_uid(Uid::from_raw(uid)) {
            Ok(user) => user.map(|u| u.name),
            Err(e) => {
                debug!(uid, error = %e, "user lookup failed");
                None
            }
        }
    }

    fn lookup_group(&self, gid: u32) -> Option<String> {
        use nix::unistd::{Gid, Group};
        match Group::from_gid(Gid::from_raw(gid)) {
            Ok(group) => group.map(|g| g.name),
            Err(e) => {
                debug!(gid, error = %e, "group lookup failed");
                None
            }
        }
    }
}

#[cfg(not(unix))]
impl DirectoryService for Nss {
    fn lookup_user(&self, _uid: u32) -> Option<String> {
        None
    }

    fn lookup_group(&self, _gid: u32) -> Option<String> {
        None
    }
}

/// Parse `name:x:id:...` tables (`/etc/passwd`, `/etc/group`) into id → name.
pub fn parse_id_table(content: &str) -> HashMap<u32, String> {
    let mut table = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split(':');
        let (Some(name), Some(_), Some(id)) = (fields.next(), fields.next(), fields.next()) else {
            continue;
        };
        if let Ok(id) = id.parse::<u32>() {
            table.entry(id).or_insert_with(|| name.to_string());
        }
    }
    table
}

fn load_table(path: &Path) -> HashMap<u32, String> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_id_table(&content),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read identity table");
            HashMap::new()
        }
    }
}

pub struct IdentityResolver {
    user_cache: HashMap<u32, String>,
    group_cache: HashMap<u32, String>,
    local_users: HashMap<u32, String>,
    local_groups: HashMap<u32, String>,
    directory: Option<Box<dyn DirectoryService>>,
}

impl IdentityResolver {
    pub fn new(
        local_users: HashMap<u32, String>,
        local_groups: HashMap<u32, String>,
        directory: Option<Box<dyn DirectoryService>>,
    ) -> Self {
        Self {
            user_cache: HashMap::new(),
            group_cache: HashMap::new(),
            local_users,
            local_groups,
            directory,
        }
    }

    pub fn from_config(config: &IdentityConfig) -> Self {
        let directory: Option<Box<dyn DirectoryService>> = match config.directory {
            DirectoryMode::Nss => Some(Box::new(Nss)),
            DirectoryMode::None => None,
        };
        Self::new(
            load_table(&config.passwd_file),
            load_table(&config.group_file),
            directory,
        )
    }

    pub fn resolve_user(&mut self, uid: u32) -> String {
        if let Some(name) = self.user_cache.get(&uid) {
            return name.clone();
        }
        let name = self
            .local_users
            .get(&uid)
            .cloned()
            .or_else(|| self.directory.as_ref().and_then(|d| d.lookup_user(uid)))
            .unwrap_or_else(|| {
                debug!(uid, "unresolved uid");
                uid.to_string()
            });
        self.user_cache.insert(uid, name.clone());
        name
    }

    pub fn resolve_group(&mut self, gid: u32) -> String {
        if let Some(name) = self.group_cache.get(&gid) {
            return name.clone();
        }
        let name = self
            .local_groups
            .get(&gid)
            .cloned()
            .or_else(|| self.directory.as_ref().and_then(|d| d.lookup_group(gid)))
            .unwrap_or_else(|| {
                debug!(gid, "unresolved gid");
                gid.to_string()
            });
        self.group_cache.insert(gid, name.clone());
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingDirectory {
        calls: Arc<AtomicUsize>,
    }

    impl DirectoryService for CountingDirectory {
        fn lookup_user(&self, uid: u32) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (uid == 7001).then(|| "ldapuser".to_string())
        }

        fn lookup_group(&self, _gid: u32) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            None
        }
    }

    #[test]
    fn test_parse_passwd_and_group() {
        let users = parse_id_table("root:x:0:0:root:/root:/bin/bash\n# comment\nbadc:x:1000:1000::/home/badc:/bin/sh\n");
        assert_eq!(users.get(&0).map(String::as_str), Some("root"));
        assert_eq!(users.get(&1000).map(String::as_str), Some("badc"));
        let groups = parse_id_table("wheel:x:10:root,badc\nbroken line\n");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups.get(&10).map(String::as_str), Some("wheel"));
    }

    #[test]
    fn test_resolution_order_and_caching() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut resolver = IdentityResolver::new(
            parse_id_table("badc:x:1000:1000::/:/bin/sh\n"),
            parse_id_table("byacl:x:26030:\n"),
            Some(Box::new(CountingDirectory {
                calls: calls.clone(),
            })),
        );

        assert_eq!(resolver.resolve_user(1000), "badc");
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(resolver.resolve_user(7001), "ldapuser");
        assert_eq!(resolver.resolve_user(7001), "ldapuser");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(resolver.resolve_group(26030), "byacl");
        assert_eq!(resolver.resolve_group(999), "999");
        assert_eq!(resolver.resolve_group(999), "999");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_no_directory_falls_back_to_numeric() {
        let mut resolver = IdentityResolver::new(HashMap::new(), HashMap::new(), None);
        assert_eq!(resolver.resolve_user(4242), "4242");
    }

    #[cfg(unix)]
    #[test]
    fn test_nss_resolves_root() {
        let mut resolver = IdentityResolver::new(HashMap::new(), HashMap::new(), Some(Box::new(Nss)));
        assert_eq!(resolver.resolve_user(0), "root");
        assert_eq!(Nss.lookup_user(u32::MAX - 1), None);
    }
}
