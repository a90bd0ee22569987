use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command as ProcessCommand;

use crate::error::{ConsolidateError, Result};

pub(crate) fn env_optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

pub(crate) fn env_u64(name: &str, default: u64) -> Result<u64> {
    match env_optional(name) {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map_err(|_| ConsolidateError::Config(format!("Invalid {name}: '{value}'"))),
        None => Ok(default),
    }
}

pub(crate) fn env_u32(name: &str, default: u32) -> Result<u32> {
    let value = env_u64(name, u64::from(default))?;
    u32::try_from(value).map_err(|_| ConsolidateError::Config(format!("Invalid {name}: '{value}'")))
}

pub(crate) fn env_i32(name: &str, default: i32) -> Result<i32> {
    match env_optional(name) {
        Some(value) => value
            .trim()
            .parse::<i32>()
            .map_err(|_| ConsolidateError::Config(format!("Invalid {name}: '{value}'"))),
        None => Ok(default),
    }
}

/// Splits a shell-style command line; `None` when quoting is unbalanced or it is empty.
pub(crate) fn split_command_line(raw: &str) -> Option<Vec<String>> {
    shlex::split(raw).filter(|parts| !parts.is_empty())
}

pub(crate) fn build_external_command<I, S>(
    wrapper: Option<&[String]>,
    program: &str,
    args: I,
) -> ProcessCommand
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    match wrapper {
        Some([head, rest @ ..]) => {
            let mut c = ProcessCommand::new(head);
            c.args(rest).arg(program).args(args);
            c
        }
        _ => {
            let mut c = ProcessCommand::new(program);
            c.args(args);
            c
        }
    }
}

/// Human-readable exit status; names the signal when the process was killed.
pub(crate) fn exit_status_text(status: &std::process::ExitStatus) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(code) = status.code() {
            format!("status {code}")
        } else if let Some(sig) = status.signal() {
            format!("signal {sig}")
        } else {
            "unknown status".to_string()
        }
    }
    #[cfg(not(unix))]
    {
        match status.code() {
            Some(code) => format!("status {code}"),
            None => "unknown status".to_string(),
        }
    }
}

pub(crate) fn find_on_path(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|full| full.is_file())
}

/// Path with `suffix` appended to its file name (`a.ndjson` + `.xz` -> `a.ndjson.xz`).
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
