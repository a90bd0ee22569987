//! Subprocess-backed implementations of the capability traits: `xz`, the
//! validation script, `gh`, `ia` and `git`.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output, Stdio};

use tracing::debug;

use crate::capabilities::{
    Backends, CmdResult, CompressionService, LongTermStore, ReleaseStore, ValidationService, VersionControl,
};
use crate::config::Settings;
use crate::error::{CommandError, ConsolidateError, Result};
use crate::types::COMPRESSED_EXT;
use crate::util::{build_external_command, exit_status_text, find_on_path, with_suffix};

/// Runs external programs from a fixed working directory, optionally behind a wrapper.
#[derive(Debug, Clone)]
pub(crate) struct Shell {
    work_dir: PathBuf,
    wrapper: Option<Vec<String>>,
}

impl Shell {
    pub(crate) fn new(work_dir: impl Into<PathBuf>, wrapper: Option<Vec<String>>) -> Self {
        Self {
            work_dir: work_dir.into(),
            wrapper,
        }
    }

    fn in_dir(&self, dir: &Path) -> Self {
        Self {
            work_dir: dir.to_path_buf(),
            wrapper: self.wrapper.clone(),
        }
    }

    fn command<S: AsRef<OsStr>>(&self, program: &str, args: &[S]) -> std::process::Command {
        // Only the subcommand is logged: some invocations carry credentials.
        let sub = args.first().map(|a| a.as_ref().to_string_lossy().into_owned());
        debug!(program, subcommand = sub.as_deref().unwrap_or(""), "exec");
        let mut cmd = build_external_command(self.wrapper.as_deref(), program, args);
        cmd.current_dir(&self.work_dir);
        cmd
    }

    /// Captures output without treating a non-zero exit as an error.
    fn probe<S: AsRef<OsStr>>(&self, program: &str, args: &[S]) -> CmdResult<Output> {
        self.command(program, args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| spawn_error(program, source))
    }

    /// Runs to completion and returns stdout; a non-zero exit is an error.
    fn run<S: AsRef<OsStr>>(&self, program: &str, args: &[S]) -> CmdResult<String> {
        let output = self.probe(program, args)?;
        check(program, &output)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Runs with the operator's terminal attached.
    fn run_inherit<S: AsRef<OsStr>>(&self, program: &str, args: &[S]) -> CmdResult<ExitStatus> {
        self.command(program, args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|source| spawn_error(program, source))
    }

    /// Runs with stdout redirected into `out`; `out` is removed on failure.
    fn run_to_file<S: AsRef<OsStr>>(&self, program: &str, args: &[S], out: &Path) -> CmdResult<()> {
        let file = File::create(out)?;
        let result = self
            .command(program, args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(file))
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| spawn_error(program, source))
            .and_then(|output| check(program, &output));
        if result.is_err() {
            let _ = fs::remove_file(out);
        }
        result
    }
}

fn spawn_error(program: &str, source: io::Error) -> CommandError {
    CommandError::Spawn {
        program: program.to_string(),
        source,
    }
}

fn check(program: &str, output: &Output) -> CmdResult<()> {
    if output.status.success() {
        return Ok(());
    }
    Err(CommandError::Failed {
        program: program.to_string(),
        status: exit_status_text(&output.status),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

// ── xz ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) struct XzCompressor {
    shell: Shell,
}

impl XzCompressor {
    pub(crate) fn new(shell: Shell) -> Self {
        Self { shell }
    }
}

impl CompressionService for XzCompressor {
    fn compress(&self, path: &Path) -> CmdResult<PathBuf> {
        let out = with_suffix(path, ".xz");
        self.shell
            .run_to_file("xz", &[OsStr::new("-9e"), OsStr::new("-c"), path.as_os_str()], &out)?;
        Ok(out)
    }

    fn decompress(&self, compressed: &Path) -> CmdResult<PathBuf> {
        if compressed.extension() != Some(OsStr::new("xz")) {
            return Err(CommandError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{}' is not an .xz file", compressed.display()),
            )));
        }
        let out = compressed.with_extension("");
        self.shell.run_to_file(
            "xz",
            &[OsStr::new("-d"), OsStr::new("-c"), compressed.as_os_str()],
            &out,
        )?;
        Ok(out)
    }
}

// ── validation script ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) struct CommandValidator {
    shell: Shell,
    command: Vec<String>,
}

impl CommandValidator {
    pub(crate) fn new(shell: Shell, command: Vec<String>) -> Self {
        Self { shell, command }
    }
}

impl ValidationService for CommandValidator {
    fn validate(&self, merged: &Path) -> CmdResult<bool> {
        let Some((program, rest)) = self.command.split_first() else {
            return Err(CommandError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "validation command is empty",
            )));
        };
        let mut args: Vec<&OsStr> = rest.iter().map(OsStr::new).collect();
        args.push(merged.as_os_str());
        let status = self.shell.run_inherit(program, &args)?;
        Ok(status.success())
    }
}

// ── gh ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) struct GhReleaseStore {
    shell: Shell,
}

impl GhReleaseStore {
    pub(crate) fn new(shell: Shell) -> Self {
        Self { shell }
    }
}

impl ReleaseStore for GhReleaseStore {
    fn exists(&self, name: &str) -> CmdResult<bool> {
        let output = self.shell.probe("gh", &["release", "view", name])?;
        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).to_ascii_lowercase();
        if stderr.contains("not found") {
            return Ok(false);
        }
        check("gh", &output).map(|_| false)
    }

    fn create(&self, name: &str, file: &Path, title: &str, notes: &str) -> CmdResult<()> {
        let args: [&OsStr; 8] = [
            "release".as_ref(),
            "create".as_ref(),
            name.as_ref(),
            file.as_os_str(),
            "--title".as_ref(),
            title.as_ref(),
            "--notes".as_ref(),
            notes.as_ref(),
        ];
        self.shell.run("gh", &args).map(drop)
    }

    fn download(&self, name: &str, dest_dir: &Path) -> CmdResult<PathBuf> {
        let asset = format!("{name}.{COMPRESSED_EXT}");
        let args: [&OsStr; 8] = [
            "release".as_ref(),
            "download".as_ref(),
            name.as_ref(),
            "--pattern".as_ref(),
            asset.as_ref(),
            "--dir".as_ref(),
            dest_dir.as_os_str(),
            "--clobber".as_ref(),
        ];
        self.shell.run("gh", &args)?;
        let path = dest_dir.join(&asset);
        if !path.is_file() {
            return Err(CommandError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("release '{name}' has no asset '{asset}'"),
            )));
        }
        Ok(path)
    }

    fn delete(&self, name: &str) -> CmdResult<()> {
        self.shell.run("gh", &["release", "delete", name, "-y"]).map(drop)
    }
}

// ── ia ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) struct IaStore {
    shell: Shell,
}

impl IaStore {
    pub(crate) fn new(shell: Shell) -> Self {
        Self { shell }
    }
}

impl LongTermStore for IaStore {
    fn is_authenticated(&self) -> CmdResult<bool> {
        let output = self.shell.probe("ia", &["configure", "--whoami"])?;
        Ok(output.status.success())
    }

    fn authenticate(&self, identity: &str, secret: &str) -> CmdResult<()> {
        self.shell
            .run("ia", &["configure", "--username", identity, "--password", secret])
            .map(drop)
    }

    fn list_objects(&self, item_id: &str) -> CmdResult<BTreeSet<String>> {
        let stdout = self.shell.run("ia", &["list", item_id])?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn upload(&self, item_id: &str, file: &Path) -> CmdResult<()> {
        // `ia` names the object after the path it is given, so upload by bare file name.
        let (Some(dir), Some(name)) = (file.parent(), file.file_name()) else {
            return Err(CommandError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{}' has no file name", file.display()),
            )));
        };
        let shell = if dir.as_os_str().is_empty() {
            self.shell.clone()
        } else {
            self.shell.in_dir(dir)
        };
        let args: [&OsStr; 3] = ["upload".as_ref(), item_id.as_ref(), name];
        shell.run("ia", &args).map(drop)
    }
}

// ── git ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) struct GitRepo {
    shell: Shell,
    remote: String,
}

impl GitRepo {
    pub(crate) fn new(shell: Shell, remote: impl Into<String>) -> Self {
        Self {
            shell,
            remote: remote.into(),
        }
    }
}

impl VersionControl for GitRepo {
    fn has_commit_message(&self, message: &str) -> CmdResult<bool> {
        let log = self.shell.run("git", &["log", "--format=%s"])?;
        Ok(log.lines().any(|subject| subject == message))
    }

    fn commit(&self, paths: &[&Path], message: &str) -> CmdResult<()> {
        let mut add: Vec<&OsStr> = vec!["add".as_ref(), "--".as_ref()];
        add.extend(paths.iter().map(|p| p.as_os_str()));
        self.shell.run("git", &add)?;
        self.shell.run("git", &["commit", "-m", message]).map(drop)
    }

    fn push(&self) -> CmdResult<()> {
        self.shell.run("git", &["push"]).map(drop)
    }

    fn tag_exists(&self, tag: &str) -> CmdResult<bool> {
        let reference = format!("refs/tags/{tag}");
        let output = self
            .shell
            .probe("git", &["rev-parse", "--quiet", "--verify", reference.as_str()])?;
        Ok(output.status.success())
    }

    fn tag(&self, name: &str) -> CmdResult<()> {
        self.shell.run("git", &["tag", name]).map(drop)
    }

    fn push_tag(&self, name: &str) -> CmdResult<()> {
        self.shell.run("git", &["push", self.remote.as_str(), name]).map(drop)
    }

    fn delete_remote_tag(&self, name: &str) -> CmdResult<()> {
        self.shell
            .run("git", &["push", "--delete", self.remote.as_str(), name])
            .map(drop)
    }

    fn delete_local_tag(&self, name: &str) -> CmdResult<()> {
        self.shell.run("git", &["tag", "-d", name]).map(drop)
    }
}

// ── wiring ──────────────────────────────────────────────────────────────

pub(crate) type ShellBackends = Backends<XzCompressor, CommandValidator, GhReleaseStore, IaStore, GitRepo>;

pub(crate) fn shell_backends(settings: &Settings) -> ShellBackends {
    let shell = Shell::new(&settings.work_dir, settings.command_wrapper.clone());
    Backends {
        compression: XzCompressor::new(shell.clone()),
        validation: CommandValidator::new(shell.clone(), settings.validate_command.clone()),
        releases: GhReleaseStore::new(shell.clone()),
        long_term: IaStore::new(shell.clone()),
        vcs: GitRepo::new(shell, settings.git_remote.clone()),
    }
}

/// Fails with the first program that cannot be found. With a command wrapper
/// configured only the wrapper itself is checked, since the tools live behind it.
pub(crate) fn require_tools(settings: &Settings) -> Result<()> {
    let programs: Vec<&str> = match settings.command_wrapper.as_deref() {
        Some([wrapper, ..]) => vec![wrapper.as_str()],
        _ => {
            let mut programs = vec!["xz", "gh", "git", "ia"];
            programs.extend(settings.validate_command.first().map(String::as_str));
            programs
        }
    };
    for program in programs {
        if find_on_path(program).is_none() {
            return Err(ConsolidateError::ToolMissing(program.to_string()));
        }
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn run_reports_exit_status_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let shell = Shell::new(dir.path(), None);
        let err = shell.run("sh", &["-c", "echo boom >&2; exit 3"]).unwrap_err();
        match err {
            CommandError::Failed { program, status, stderr } => {
                assert_eq!(program, "sh");
                assert_eq!(status, "status 3");
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn run_missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let shell = Shell::new(dir.path(), None);
        let err = shell.run("definitely-not-a-real-tool-42", &["x"]).unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }

    #[test]
    fn run_to_file_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let shell = Shell::new(dir.path(), None);
        let out = dir.path().join("out.txt");
        assert!(shell.run_to_file("sh", &["-c", "echo partial; exit 1"], &out).is_err());
        assert!(!out.exists());

        shell.run_to_file("sh", &["-c", "echo whole"], &out).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "whole\n");
    }

    #[test]
    fn validator_appends_merged_path() {
        let dir = tempfile::tempdir().unwrap();
        let shell = Shell::new(dir.path(), None);
        let merged = dir.path().join("merged.ndjson");
        fs::write(&merged, "{}\n").unwrap();

        let accept = CommandValidator::new(shell.clone(), vec!["test".into(), "-s".into()]);
        assert!(accept.validate(&merged).unwrap());

        let empty = dir.path().join("empty.ndjson");
        fs::write(&empty, "").unwrap();
        assert!(!accept.validate(&empty).unwrap());
    }

    #[test]
    fn decompress_requires_xz_extension() {
        let dir = tempfile::tempdir().unwrap();
        let xz = XzCompressor::new(Shell::new(dir.path(), None));
        let err = xz.decompress(&dir.path().join("a.ndjson")).unwrap_err();
        assert!(matches!(err, CommandError::Io(_)));
    }

    #[test]
    fn require_tools_checks_wrapper_only_when_set() {
        let wrapped = Settings {
            command_wrapper: Some(vec!["sh".into(), "-c".into()]),
            ..Settings::default()
        };
        assert!(require_tools(&wrapped).is_ok());

        let missing = Settings {
            command_wrapper: Some(vec!["definitely-not-a-real-tool-42".into()]),
            ..Settings::default()
        };
        assert!(matches!(
            require_tools(&missing),
            Err(ConsolidateError::ToolMissing(program)) if program == "definitely-not-a-real-tool-42"
        ));
    }
}
