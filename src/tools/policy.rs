// Command policy for the command execution tool
//
// Checked against the program name, and the arguments of programs that can
// launch other programs, before anything is spawned.

use serde::{Deserialize, Serialize};

/// Outcome of a policy check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny(String),
}

/// Allow/deny lists of program names
///
/// The deny list always wins. A non-empty allow list restricts execution to
/// its entries; an empty one permits anything not denied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPolicy {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default = "default_deny_list")]
    pub deny: Vec<String>,
}

/// Programs denied unless configuration says otherwise
pub fn default_deny_list() -> Vec<String> {
    [
        "sh", "bash", "zsh", "fish", "dash", "ksh", "csh", "tcsh", "python", "python3", "perl",
        "ruby", "node", "lua", "php", "tclsh", "expect", "awk", "gawk", "mawk", "nawk", "sudo",
        "su", "doas", "pkexec", "runuser", "passwd", "shutdown", "reboot", "halt", "poweroff",
        "mkfs", "dd", "vi", "vim", "nano", "emacs", "tmux", "screen",
        // Run another program, or detach from the process group
        "env", "nice", "ionice", "nohup", "timeout", "xargs", "setsid", "stdbuf", "busybox",
        "chroot", "unshare", "nsenter", "taskset", "chrt", "flock", "script", "watch", "time",
        "strace", "ltrace", "gdb", "parallel", "daemonize", "start-stop-daemon", "systemd-run",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self {
            allow: Vec::new(),
            deny: default_deny_list(),
        }
    }
}

impl CommandPolicy {
    pub fn new(allow: Vec<String>, deny: Vec<String>) -> Self {
        Self { allow, deny }
    }

    /// Policy with empty lists; argument checks still apply
    pub fn permissive() -> Self {
        Self {
            allow: Vec::new(),
            deny: Vec::new(),
        }
    }

    /// Check a program against the lists
    ///
    /// Matching uses the file name, so `/bin/sh` is treated as `sh`.
    pub fn check(&self, program: &str) -> PolicyDecision {
        let name = program_name(program);

        if name.is_empty() {
            return PolicyDecision::Deny("empty program name".to_string());
        }

        if self.deny.iter().any(|denied| denied == name) {
            return PolicyDecision::Deny(format!("'{}' is on the deny list", name));
        }

        if !self.allow.is_empty() && !self.allow.iter().any(|allowed| allowed == name) {
            return PolicyDecision::Deny(format!("'{}' is not on the allow list", name));
        }

        PolicyDecision::Allow
    }

    /// Check a whole invocation
    ///
    /// Programs that execute commands named in their arguments are denied
    /// when those arguments are present (`find -exec`, `git -c`).
    pub fn check_invocation(&self, program: &str, args: &[String]) -> PolicyDecision {
        let decision = self.check(program);
        if decision != PolicyDecision::Allow {
            return decision;
        }

        let name = program_name(program);
        let Some((_, flags)) = ARGUMENT_LAUNCHERS.iter().find(|(launcher, _)| *launcher == name) else {
            return PolicyDecision::Allow;
        };

        match flags.iter().find(|flag| args.iter().any(|arg| is_flag(arg, flag))) {
            Some(flag) => PolicyDecision::Deny(format!("'{} {}' can run arbitrary programs", name, flag)),
            None => PolicyDecision::Allow,
        }
    }
}

/// Arguments that make an otherwise harmless program launch other programs
const ARGUMENT_LAUNCHERS: &[(&str, &[&str])] = &[
    ("find", &["-exec", "-execdir", "-ok", "-okdir"]),
    ("git", &["-c", "--exec-path", "--upload-pack", "--receive-pack"]),
    ("tar", &["--to-command", "--use-compress-program", "-I", "--checkpoint-action"]),
    ("rsync", &["-e", "--rsh", "--rsync-path"]),
];

fn is_flag(arg: &str, flag: &str) -> bool {
    arg == flag || arg.strip_prefix(flag).is_some_and(|rest| rest.starts_with('='))
}

fn program_name(program: &str) -> &str {
    program.rsplit('/').next().unwrap_or(program).trim()
}
