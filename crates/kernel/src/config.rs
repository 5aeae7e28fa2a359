use dyld::LoaderConfig;
use types::{Gid, Uid};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub name: String,
    pub uid: Uid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub gid: Gid,
    pub members: Vec<Uid>,
}

/// Settings for one kernel instance.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// The only path `execve` resolves.
    pub shell_path: String,
    pub loader: LoaderConfig,
    /// Log every executed instruction at `trace` level.
    pub trace_instructions: bool,
    pub users: Vec<UserEntry>,
    pub groups: Vec<GroupEntry>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            shell_path: "/bin/sh".to_string(),
            loader: LoaderConfig::default(),
            trace_instructions: false,
            users: vec![UserEntry {
                name: "root".to_string(),
                uid: 0,
            }],
            groups: vec![GroupEntry {
                name: "wheel".to_string(),
                gid: 0,
                members: vec![0],
            }],
        }
    }
}
