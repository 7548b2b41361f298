//! Platform capability table
//!
//! Every OS-dependent decision (shell binary, install search paths, how to
//! kill a process tree) is a lookup in one of the static tables below.
//! Call sites ask `Platform::current()` once per operation and never branch
//! on the OS themselves.

use std::path::PathBuf;

/// How a process tree is torn down on this platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillStrategy {
    /// Children run in their own process group; signal the whole group
    ProcessGroup,
    /// Delegate to `taskkill`, which walks the tree itself
    TaskKill,
}

/// How arguments are quoted for the platform shell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStyle {
    /// Single quotes, embedded quotes closed and escaped
    Posix,
    /// Double quotes, as understood by `cmd.exe`
    Cmd,
}

/// A well-known installation directory, resolved lazily
#[derive(Debug, Clone, Copy)]
pub enum InstallDir {
    /// Fixed absolute path
    Absolute(&'static str),
    /// Path relative to the user's home directory
    Home(&'static str),
    /// Path relative to the directory named by an environment variable
    Env(&'static str, &'static str),
}

impl InstallDir {
    /// Resolve to a concrete path, if the base is known on this machine
    pub fn resolve(&self) -> Option<PathBuf> {
        match self {
            InstallDir::Absolute(path) => Some(PathBuf::from(path)),
            InstallDir::Home(rel) => dirs::home_dir().map(|home| home.join(rel)),
            InstallDir::Env(var, rel) => std::env::var_os(var)
                .filter(|v| !v.is_empty())
                .map(|base| PathBuf::from(base).join(rel)),
        }
    }
}

/// Capabilities of one host platform
#[derive(Debug)]
pub struct Platform {
    /// Short platform name
    pub name: &'static str,
    /// Shell used to run a single command non-interactively
    pub shell: &'static str,
    /// Arguments placed before the command text
    pub shell_args: &'static [&'static str],
    /// Shell to try when `shell` is missing
    pub fallback_shell: Option<&'static str>,
    /// Quoting convention of `shell`
    pub quote: QuoteStyle,
    /// Suffix appended to executable names
    pub exe_suffix: &'static str,
    /// Ordered list of directories where the model service is commonly installed
    pub service_dirs: &'static [InstallDir],
    /// Process tree termination strategy
    pub kill: KillStrategy,
    /// Interpreter used to run the backend script
    pub python: &'static str,
}

static LINUX: Platform = Platform {
    name: "linux",
    shell: "/bin/bash",
    shell_args: &["-c"],
    fallback_shell: Some("/bin/sh"),
    quote: QuoteStyle::Posix,
    exe_suffix: "",
    service_dirs: &[
        InstallDir::Absolute("/usr/local/bin"),
        InstallDir::Absolute("/usr/bin"),
        InstallDir::Home(".local/bin"),
        InstallDir::Absolute("/opt/ollama/bin"),
        InstallDir::Absolute("/snap/bin"),
    ],
    kill: KillStrategy::ProcessGroup,
    python: "python3",
};

static MACOS: Platform = Platform {
    name: "macos",
    shell: "/bin/zsh",
    shell_args: &["-c"],
    fallback_shell: Some("/bin/sh"),
    quote: QuoteStyle::Posix,
    exe_suffix: "",
    service_dirs: &[
        InstallDir::Absolute("/usr/local/bin"),
        InstallDir::Absolute("/opt/homebrew/bin"),
        InstallDir::Absolute("/Applications/Ollama.app/Contents/Resources"),
        InstallDir::Home(".local/bin"),
    ],
    kill: KillStrategy::ProcessGroup,
    python: "python3",
};

static WINDOWS: Platform = Platform {
    name: "windows",
    shell: "cmd.exe",
    shell_args: &["/C"],
    fallback_shell: None,
    quote: QuoteStyle::Cmd,
    exe_suffix: ".exe",
    service_dirs: &[
        InstallDir::Env("LOCALAPPDATA", "Programs\\Ollama"),
        InstallDir::Env("ProgramFiles", "Ollama"),
        InstallDir::Env("ProgramFiles(x86)", "Ollama"),
    ],
    kill: KillStrategy::TaskKill,
    python: "python",
};

/// Other Unix flavours get the Linux conventions with a POSIX shell
static GENERIC_UNIX: Platform = Platform {
    name: "unix",
    shell: "/bin/sh",
    shell_args: &["-c"],
    fallback_shell: None,
    quote: QuoteStyle::Posix,
    exe_suffix: "",
    service_dirs: &[
        InstallDir::Absolute("/usr/local/bin"),
        InstallDir::Absolute("/usr/bin"),
        InstallDir::Home(".local/bin"),
    ],
    kill: KillStrategy::ProcessGroup,
    python: "python3",
};

impl Platform {
    /// Table entry for the host the binary was built for
    pub fn current() -> &'static Platform {
        Self::for_os(std::env::consts::OS)
    }

    /// Table entry for an OS name as reported by `std::env::consts::OS`
    pub fn for_os(os: &str) -> &'static Platform {
        match os {
            "linux" => &LINUX,
            "macos" => &MACOS,
            "windows" => &WINDOWS,
            _ => &GENERIC_UNIX,
        }
    }

    /// Program and arguments that run `command` through the shell
    pub fn shell_invocation(&self, command: &str) -> (String, Vec<String>) {
        let program = match self.fallback_shell {
            Some(fallback) if !std::path::Path::new(self.shell).exists() => fallback,
            _ => self.shell,
        };
        let mut args: Vec<String> = self.shell_args.iter().map(|a| a.to_string()).collect();
        args.push(command.to_string());
        (program.to_string(), args)
    }

    /// Quote one argument so the shell passes it through verbatim
    ///
    /// Arguments made only of characters no shell treats specially are left
    /// bare, which also keeps `cmd.exe` away from its quote-stripping rules.
    pub fn quote_arg(&self, arg: &str) -> String {
        let safe = match self.quote {
            QuoteStyle::Posix => "_-./:=@%+,",
            QuoteStyle::Cmd => "_-./:=@+,\\",
        };
        let plain = !arg.is_empty()
            && arg.chars().all(|c| c.is_ascii_alphanumeric() || safe.contains(c));
        if plain {
            return arg.to_string();
        }

        match self.quote {
            QuoteStyle::Posix => format!("'{}'", arg.replace('\'', "'\\''")),
            QuoteStyle::Cmd => format!("\"{}\"", arg.replace('"', "\"\"")),
        }
    }

    /// Join a program and its arguments into one shell command line
    pub fn command_line(&self, program: &str, args: &[String]) -> String {
        std::iter::once(program)
            .chain(args.iter().map(String::as_str))
            .map(|part| self.quote_arg(part))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// File name of an executable on this platform
    pub fn executable_name(&self, base: &str) -> String {
        if self.exe_suffix.is_empty() || base.ends_with(self.exe_suffix) {
            base.to_string()
        } else {
            format!("{}{}", base, self.exe_suffix)
        }
    }

    /// Resolved install directories, skipping ones whose base is unknown
    pub fn service_search_dirs(&self) -> Vec<PathBuf> {
        self.service_dirs.iter().filter_map(InstallDir::resolve).collect()
    }

    /// Command that kills every process whose name matches `name`
    pub fn kill_by_name_invocation(&self, name: &str) -> (String, Vec<String>) {
        match self.kill {
            KillStrategy::ProcessGroup => ("pkill".to_string(), vec!["-x".to_string(), name.to_string()]),
            KillStrategy::TaskKill => (
                "taskkill".to_string(),
                vec!["/F".to_string(), "/IM".to_string(), self.executable_name(name)],
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_table() {
        let windows = Platform::for_os("windows");
        assert_eq!(windows.shell, "cmd.exe");
        assert_eq!(windows.shell_args, &["/C"]);
        assert_eq!(windows.kill, KillStrategy::TaskKill);

        let linux = Platform::for_os("linux");
        assert_eq!(linux.shell_args, &["-c"]);
        assert_eq!(linux.kill, KillStrategy::ProcessGroup);

        assert_eq!(Platform::for_os("freebsd").name, "unix");
    }

    #[test]
    fn test_shell_invocation_appends_command() {
        let (program, args) = Platform::for_os("windows").shell_invocation("dir");
        assert_eq!(program, "cmd.exe");
        assert_eq!(args, vec!["/C".to_string(), "dir".to_string()]);
    }

    #[test]
    fn test_executable_name() {
        assert_eq!(Platform::for_os("windows").executable_name("ollama"), "ollama.exe");
        assert_eq!(Platform::for_os("windows").executable_name("ollama.exe"), "ollama.exe");
        assert_eq!(Platform::for_os("linux").executable_name("ollama"), "ollama");
    }

    #[test]
    fn test_quote_arg() {
        let posix = Platform::for_os("linux");
        assert_eq!(posix.quote_arg("/opt/my app/ollama"), "'/opt/my app/ollama'");
        assert_eq!(posix.quote_arg("it's"), "'it'\\''s'");
        assert_eq!(posix.quote_arg("serve"), "serve");
        assert_eq!(posix.quote_arg(""), "''");

        let cmd = Platform::for_os("windows");
        assert_eq!(cmd.quote_arg("C:\\Program Files\\x.exe"), "\"C:\\Program Files\\x.exe\"");
        assert_eq!(
            cmd.command_line("ollama", &["--version".to_string()]),
            "ollama --version"
        );
    }

    #[test]
    fn test_kill_by_name() {
        let (program, args) = Platform::for_os("linux").kill_by_name_invocation("ollama");
        assert_eq!(program, "pkill");
        assert_eq!(args, vec!["-x", "ollama"]);

        let (program, args) = Platform::for_os("windows").kill_by_name_invocation("ollama");
        assert_eq!(program, "taskkill");
        assert_eq!(args, vec!["/F", "/IM", "ollama.exe"]);
    }
}
