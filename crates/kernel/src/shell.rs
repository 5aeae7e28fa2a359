use std::fmt::Debug;
use std::sync::{Arc, RwLock};

use types::Uid;
use vm::SystemProcessException;

use crate::error::poisoned;
use crate::users::UserRegistry;

/// Standard I/O as the shell sees it.
pub trait Terminal {
    /// Block until the next chunk of input arrives.
    fn read_chunk(&self) -> Result<Vec<u8>, SystemProcessException>;
    fn write(&self, bytes: &[u8]) -> Result<(), SystemProcessException>;
}

/// Who is running the shell and what it may touch.
#[derive(Debug, Clone)]
pub struct ShellSession {
    pub uid: Uid,
    pub users: Arc<RwLock<UserRegistry>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Done { status: i32, output: String },
    NotFound,
}

impl CommandOutcome {
    fn ok(output: impl Into<String>) -> Self {
        CommandOutcome::Done {
            status: 0,
            output: output.into(),
        }
    }

    fn fail(output: impl Into<String>) -> Self {
        CommandOutcome::Done {
            status: 1,
            output: output.into(),
        }
    }
}

/// Runs every command the shell does not handle itself.
pub trait CommandHandler: Send + Sync + Debug {
    fn run(
        &self,
        session: &ShellSession,
        command: &str,
        args: &[&str],
    ) -> Result<CommandOutcome, SystemProcessException>;
}

const NOT_FOUND_STATUS: i32 = 127;

/// Line-oriented command interpreter. `exit [code]` is built in; anything
/// else goes to the handler.
#[derive(Debug, Clone)]
pub struct Shell {
    handler: Arc<dyn CommandHandler>,
}

impl Shell {
    pub fn new(handler: Arc<dyn CommandHandler>) -> Self {
        Self { handler }
    }

    pub fn prompt(session: &ShellSession) -> &'static str {
        if session.uid == 0 { "# " } else { "$ " }
    }

    /// Run until `exit`. Returns the exit status.
    pub fn run(&self, terminal: &dyn Terminal, session: &ShellSession) -> Result<i32, SystemProcessException> {
        let mut status = 0;
        loop {
            terminal.write(Self::prompt(session).as_bytes())?;
            let input = terminal.read_chunk()?;
            let input = String::from_utf8_lossy(&input);
            for line in input.lines() {
                let words: Vec<&str> = line.split_whitespace().collect();
                let Some((&command, args)) = words.split_first() else {
                    continue;
                };
                if command == "exit" {
                    let code = match args.first().map(|arg| (arg, arg.parse::<i32>())) {
                        None => status,
                        Some((_, Ok(code))) => code,
                        Some((arg, Err(_))) => {
                            terminal.write(format!("sh: exit: {}: numeric argument required\n", arg).as_bytes())?;
                            status = 2;
                            continue;
                        }
                    };
                    log::debug!("sh: exit {}", code);
                    return Ok(code);
                }
                match self.handler.run(session, command, args)? {
                    CommandOutcome::Done { status: code, output } => {
                        terminal.write(output.as_bytes())?;
                        status = code;
                    }
                    CommandOutcome::NotFound => {
                        terminal.write(format!("sh: {}: command not found\n", command).as_bytes())?;
                        status = NOT_FOUND_STATUS;
                    }
                }
            }
        }
    }
}

/// `whoami`, `id`, `echo`, `groups` and `assign <user> <group>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicCommands;

impl CommandHandler for BasicCommands {
    fn run(
        &self,
        session: &ShellSession,
        command: &str,
        args: &[&str],
    ) -> Result<CommandOutcome, SystemProcessException> {
        if command == "echo" {
            return Ok(CommandOutcome::ok(format!("{}\n", args.join(" "))));
        }
        if command == "assign" {
            return assign(session, args);
        }

        let users = session.users.read().map_err(|_| poisoned("user registry"))?;
        let user = users
            .name_for_uid(session.uid)
            .map(str::to_string)
            .unwrap_or_else(|| session.uid.to_string());
        let outcome = match command {
            "whoami" => CommandOutcome::ok(format!("{}\n", user)),
            "groups" => {
                let names: Vec<&str> = users.groups_of(session.uid).map(|g| g.name.as_str()).collect();
                CommandOutcome::ok(format!("{}\n", names.join(" ")))
            }
            "id" => {
                let groups: Vec<String> = users
                    .groups_of(session.uid)
                    .map(|g| format!("{}({})", g.gid, g.name))
                    .collect();
                CommandOutcome::ok(format!("uid={}({}) groups={}\n", session.uid, user, groups.join(",")))
            }
            _ => CommandOutcome::NotFound,
        };
        Ok(outcome)
    }
}

fn assign(session: &ShellSession, args: &[&str]) -> Result<CommandOutcome, SystemProcessException> {
    let [user, group] = args else {
        return Ok(CommandOutcome::fail("usage: assign <user> <group>\n"));
    };
    if session.uid != 0 {
        return Ok(CommandOutcome::fail("assign: permission denied\n"));
    }
    let mut users = session.users.write().map_err(|_| poisoned("user registry"))?;
    let Some(uid) = users.uid_for_name(user) else {
        return Ok(CommandOutcome::fail(format!("assign: {}: no such user\n", user)));
    };
    let Some(gid) = users.group_by_name(group).map(|g| g.gid) else {
        return Ok(CommandOutcome::fail(format!("assign: {}: no such group\n", group)));
    };
    users.assign(uid, gid);
    log::info!("assigned {} ({}) to {} ({})", user, uid, group, gid);
    Ok(CommandOutcome::ok(""))
}
