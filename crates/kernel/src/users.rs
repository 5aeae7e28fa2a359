use std::collections::{BTreeMap, BTreeSet};

use types::{Gid, Uid};

use crate::config::KernelConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub gid: Gid,
    pub members: BTreeSet<Uid>,
}

/// Users and groups known to one kernel instance.
#[derive(Debug, Clone, Default)]
pub struct UserRegistry {
    users: BTreeMap<Uid, String>,
    groups: BTreeMap<Gid, Group>,
}

impl UserRegistry {
    pub fn from_config(config: &KernelConfig) -> Self {
        let mut registry = Self::default();
        for user in &config.users {
            registry.add_user(&user.name, user.uid);
        }
        for group in &config.groups {
            registry.add_group(&group.name, group.gid);
            for &uid in &group.members {
                registry.assign(uid, group.gid);
            }
        }
        registry
    }

    pub fn add_user(&mut self, name: &str, uid: Uid) {
        self.users.insert(uid, name.to_string());
    }

    pub fn add_group(&mut self, name: &str, gid: Gid) {
        self.groups.entry(gid).or_insert_with(|| Group {
            name: name.to_string(),
            gid,
            members: BTreeSet::new(),
        });
    }

    pub fn uid_for_name(&self, name: &str) -> Option<Uid> {
        self.users
            .iter()
            .find(|(_, user)| user.as_str() == name)
            .map(|(uid, _)| *uid)
    }

    pub fn name_for_uid(&self, uid: Uid) -> Option<&str> {
        self.users.get(&uid).map(String::as_str)
    }

    pub fn contains_uid(&self, uid: Uid) -> bool {
        self.users.contains_key(&uid)
    }

    pub fn group_by_name(&self, name: &str) -> Option<&Group> {
        self.groups.values().find(|group| group.name == name)
    }

    pub fn uid_belongs_to_gid(&self, uid: Uid, gid: Gid) -> bool {
        self.groups
            .get(&gid)
            .is_some_and(|group| group.members.contains(&uid))
    }

    /// Add `uid` to group `gid`. Returns false if the group does not exist.
    pub fn assign(&mut self, uid: Uid, gid: Gid) -> bool {
        match self.groups.get_mut(&gid) {
            Some(group) => {
                group.members.insert(uid);
                true
            }
            None => false,
        }
    }

    pub fn groups_of(&self, uid: Uid) -> impl Iterator<Item = &Group> {
        self.groups
            .values()
            .filter(move |group| group.members.contains(&uid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_seeds_root_and_wheel() {
        let registry = UserRegistry::from_config(&KernelConfig::default());
        assert_eq!(registry.uid_for_name("root"), Some(0));
        assert_eq!(registry.name_for_uid(0), Some("root"));
        assert!(registry.uid_belongs_to_gid(0, 0));
        assert!(!registry.uid_belongs_to_gid(0, 7));
        assert_eq!(registry.uid_for_name("nobody"), None);
    }

    #[test]
    fn assign_requires_an_existing_group() {
        let mut registry = UserRegistry::default();
        registry.add_user("alice", 501);
        registry.add_group("staff", 20);
        assert!(registry.assign(501, 20));
        assert!(!registry.assign(501, 21));
        assert!(registry.uid_belongs_to_gid(501, 20));
        let names: Vec<&str> = registry.groups_of(501).map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["staff"]);
    }
}
