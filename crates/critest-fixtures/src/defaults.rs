//! Canonical commands run inside test containers.
//!
//! The table is chosen once per process from the host operating system; the
//! containers run the same OS as the host.

use std::sync::LazyLock;

/// Command vectors understood by the default test image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commands {
    /// Long-running sleep.
    pub sleep: &'static [&'static str],
    /// Shell prefix; append a script as the last argument.
    pub shell: &'static [&'static str],
    /// Prints `hello` with no trailing newline on Linux.
    pub echo_hello: &'static [&'static str],
    /// What `echo_hello` writes to stdout.
    pub echo_hello_output: &'static str,
    /// Keeps a container running until it is stopped.
    pub pause_loop: &'static [&'static str],
    /// Prints the resolver configuration.
    pub get_dns: &'static [&'static str],
    /// Prints the hostname.
    pub hostname: &'static [&'static str],
    /// Prefix that succeeds only if the path given after it exists.
    pub check_path: &'static [&'static str],
    /// Echo command; the message is appended.
    pub echo: &'static [&'static str],
}

const LINUX: Commands = Commands {
    sleep: &["sleep", "4321"],
    shell: &["/bin/sh", "-c"],
    echo_hello: &["echo", "-n", "hello"],
    echo_hello_output: "hello",
    pause_loop: &["sh", "-c", "top"],
    get_dns: &["cat", "/etc/resolv.conf"],
    hostname: &["hostname"],
    check_path: &["ls"],
    echo: &["echo"],
};

const WINDOWS: Commands = Commands {
    sleep: &["powershell", "-c", "sleep", "4321"],
    shell: &["cmd", "/c"],
    echo_hello: &["powershell", "-c", "echo hello"],
    echo_hello_output: "hello\r\n",
    pause_loop: &["powershell", "-c", "ping -t localhost"],
    get_dns: &["powershell", "-c", "ipconfig /all"],
    hostname: &["hostname"],
    check_path: &["powershell", "-c", "ls"],
    echo: &["cmd", "/c", "echo"],
};

static SELECTED: LazyLock<&'static Commands> =
    LazyLock::new(|| commands_for(std::env::consts::OS));

/// The table for `os`, as named by `std::env::consts::OS`.
#[must_use]
pub fn commands_for(os: &str) -> &'static Commands {
    match os {
        "windows" => &WINDOWS,
        _ => &LINUX,
    }
}

/// The table for the host.
#[must_use]
pub fn commands() -> &'static Commands {
    *SELECTED
}

fn owned(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_string()).collect()
}

impl Commands {
    /// A script run through the shell.
    #[must_use]
    pub fn script(&self, script: &str) -> Vec<String> {
        let mut cmd = owned(self.shell);
        cmd.push(script.to_string());
        cmd
    }

    /// Prints `message` once per second forever.
    #[must_use]
    pub fn log_loop(&self, message: &str) -> Vec<String> {
        if self.shell.first() == Some(&"cmd") {
            return owned(&[
                "powershell",
                "-c",
                &format!("while ($true) {{ echo '{message}'; sleep 1 }}"),
            ]);
        }
        self.script(&format!("while true; do echo '{message}'; sleep 1; done"))
    }

    /// Succeeds only if `path` exists.
    #[must_use]
    pub fn check(&self, path: &str) -> Vec<String> {
        let mut cmd = owned(self.check_path);
        cmd.push(path.to_string());
        cmd
    }

    /// Echoes `message`.
    #[must_use]
    pub fn echo_message(&self, message: &str) -> Vec<String> {
        let mut cmd = owned(self.echo);
        cmd.push(message.to_string());
        cmd
    }

    /// Owned copy of one of the fixed vectors.
    #[must_use]
    pub fn to_vec(parts: &[&str]) -> Vec<String> {
        owned(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linux_is_the_default() {
        assert_eq!(commands_for("linux"), &LINUX);
        assert_eq!(commands_for("freebsd"), &LINUX);
        assert_eq!(commands_for("windows").shell, &["cmd", "/c"]);
    }

    #[test]
    fn script_appends_to_the_shell() {
        assert_eq!(
            LINUX.script("exit 3"),
            vec!["/bin/sh", "-c", "exit 3"]
        );
    }

    #[test]
    fn log_loop_repeats_the_message() {
        let cmd = LINUX.log_loop("hello World");
        assert_eq!(cmd[..2], ["/bin/sh", "-c"]);
        assert!(cmd[2].contains("echo 'hello World'"));
        assert!(WINDOWS.log_loop("x")[0].starts_with("powershell"));
    }

    #[test]
    fn check_and_echo_append_their_argument() {
        assert_eq!(LINUX.check("/bin/sleep"), vec!["ls", "/bin/sleep"]);
        assert_eq!(LINUX.echo_message("hi"), vec!["echo", "hi"]);
        assert_eq!(Commands::to_vec(LINUX.hostname), vec!["hostname"]);
    }
}
