//! Playbook execution
//!
//! A [`PlaybookRun`] describes one `ansible-playbook` invocation. The
//! [`AnsibleExecutor`] materializes its inventory and extra-vars into a
//! [`RunContext`], runs the process while streaming stdout, classifies the
//! exit status and removes every temporary artifact afterwards.

use std::ffi::OsString;
use std::fmt::{self, Write as _};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use keel_common::KeelConfig;
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::inventory::Inventory;
use crate::playbook::{Playbook, PlaybookSet};
use crate::vars::KubesprayVars;
use crate::{Error, Result};

/// Separator between the run prefix and each output line
pub const PREFIX_SEPARATOR: &str = "──";

/// User privileges are escalated to
pub const BECOME_USER: &str = "root";

/// Classified `ansible-playbook` exit status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitCode {
    /// 1
    GeneralError,
    /// 2
    HostFailed,
    /// 3
    HostUnreachable,
    /// 4
    ParserError,
    /// 5
    BadOrIncompleteOptions,
    /// 99
    UserInterrupted,
    /// 250
    Unexpected,
    /// Anything else; -1 when the process was killed by a signal
    Other(i32),
}

impl ExitCode {
    /// Classify a raw exit code
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ExitCode::GeneralError,
            2 => ExitCode::HostFailed,
            3 => ExitCode::HostUnreachable,
            4 => ExitCode::ParserError,
            5 => ExitCode::BadOrIncompleteOptions,
            99 => ExitCode::UserInterrupted,
            250 => ExitCode::Unexpected,
            other => ExitCode::Other(other),
        }
    }

    /// Classify a process exit status
    pub fn from_status(status: ExitStatus) -> Self {
        status.code().map_or(ExitCode::Other(-1), Self::from_code)
    }

    /// Raw exit code
    pub fn code(self) -> i32 {
        match self {
            ExitCode::GeneralError => 1,
            ExitCode::HostFailed => 2,
            ExitCode::HostUnreachable => 3,
            ExitCode::ParserError => 4,
            ExitCode::BadOrIncompleteOptions => 5,
            ExitCode::UserInterrupted => 99,
            ExitCode::Unexpected => 250,
            ExitCode::Other(code) => code,
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitCode::GeneralError => write!(f, "general error"),
            ExitCode::HostFailed => write!(f, "one or more host failed"),
            ExitCode::HostUnreachable => write!(f, "one or more host unreachable"),
            ExitCode::ParserError => write!(f, "parser error"),
            ExitCode::BadOrIncompleteOptions => write!(f, "bad or incomplete options"),
            ExitCode::UserInterrupted => write!(f, "user interrupted execution"),
            ExitCode::Unexpected => write!(f, "unexpected error"),
            ExitCode::Other(-1) => write!(f, "terminated by signal"),
            ExitCode::Other(code) => write!(f, "exit code {code}"),
        }
    }
}

/// Everything needed for one playbook invocation
#[derive(Debug)]
pub struct PlaybookRun {
    action: String,
    playbook_set: PlaybookSet,
    playbook: Playbook,
    inventory: Inventory,
    vars: KubesprayVars,
    limit: Vec<String>,
    debug: bool,
}

impl PlaybookRun {
    /// Describe a run of `playbook` from `playbook_set`
    pub fn new(
        action: impl Into<String>,
        playbook_set: PlaybookSet,
        playbook: Playbook,
        inventory: Inventory,
        vars: KubesprayVars,
    ) -> Self {
        Self {
            action: action.into(),
            playbook_set,
            playbook,
            inventory,
            vars,
            limit: Vec::new(),
            debug: false,
        }
    }

    /// Enable `-vvv`
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Restrict the run to `names`
    ///
    /// With `check`, every name must be an inventory host. Group names are
    /// passed unchecked.
    pub fn add_limit<I, S>(&mut self, check: bool, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if check {
            if let Some(missing) = names.iter().find(|n| !self.inventory.contains(n)) {
                return Err(Error::validation_for_host(
                    missing.as_str(),
                    format!("inventory not include host {missing}"),
                ));
            }
        }
        self.limit.extend(names);
        Ok(())
    }

    /// Action label, used for log prefixes and temp file names
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Playbook to run
    pub fn playbook(&self) -> Playbook {
        self.playbook
    }

    /// Playbook set the playbook is taken from
    pub fn playbook_set(&self) -> &PlaybookSet {
        &self.playbook_set
    }

    /// Full path to the playbook
    pub fn playbook_path(&self) -> PathBuf {
        self.playbook_set.playbook_path(self.playbook)
    }

    /// Inventory for the run
    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Extra-vars for the run
    pub fn vars(&self) -> &KubesprayVars {
        &self.vars
    }

    /// Host or group allow-list
    pub fn limit(&self) -> &[String] {
        &self.limit
    }

    /// Whether `-vvv` is passed
    pub fn debug(&self) -> bool {
        self.debug
    }
}

/// Temporary artifacts owned by one invocation
///
/// Removes the inventory file, the extra-vars file and every host key file
/// on [`RunContext::cleanup`], or on drop if cleanup was never reached.
#[derive(Debug)]
pub struct RunContext {
    inventory: Inventory,
    inventory_file: Option<NamedTempFile>,
    vars_file: Option<NamedTempFile>,
    cleaned: bool,
}

impl RunContext {
    /// Render and write the inventory and extra-vars files
    pub fn materialize(action: &str, inventory: Inventory, vars: &KubesprayVars) -> Result<Self> {
        let mut ctx = Self {
            inventory,
            inventory_file: None,
            vars_file: None,
            cleaned: false,
        };

        let content = ctx.inventory.render()?;
        ctx.inventory_file = Some(write_temp(action, "", &content)?);
        ctx.vars_file = Some(write_temp("keel-vars-", ".json", &vars.to_json_pretty()?)?);
        Ok(ctx)
    }

    /// Path of the rendered inventory
    pub fn inventory_path(&self) -> Option<&Path> {
        self.inventory_file.as_ref().map(NamedTempFile::path)
    }

    /// Path of the extra-vars JSON
    pub fn vars_path(&self) -> Option<&Path> {
        self.vars_file.as_ref().map(NamedTempFile::path)
    }

    /// Remove every artifact, collecting all failures
    pub fn cleanup(&mut self) -> Result<()> {
        self.cleaned = true;
        let mut errors = Vec::new();

        for host in self.inventory.hosts_mut() {
            if let Err(e) = host.clear() {
                errors.push(format!("clear host {}: {e}", host.hostname()));
            }
        }
        for (kind, file) in [
            ("inventory", self.inventory_file.take()),
            ("extra vars", self.vars_file.take()),
        ] {
            let Some(file) = file else { continue };
            let path = file.path().to_path_buf();
            if let Err(e) = file.close() {
                if e.kind() != std::io::ErrorKind::NotFound {
                    errors.push(format!("remove {kind} file {}: {e}", path.display()));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Cleanup { errors })
        }
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        if !self.cleaned {
            if let Err(e) = self.cleanup() {
                warn!(error = %e, "best-effort run cleanup failed");
            }
        }
    }
}

fn write_temp(prefix: &str, suffix: &str, content: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile()
        .map_err(|e| Error::io("create temporary file", e))?;
    file.write_all(content.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|e| Error::io(format!("write {}", file.path().display()), e))?;
    Ok(file)
}

/// Captured output of a finished run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunOutput {
    /// Every stdout line, prefixed
    pub output: String,
    /// Wall-clock duration of the process
    pub elapsed: Duration,
}

/// Runs playbooks
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PlaybookRunner: Send + Sync {
    /// Run to completion and return the captured output
    async fn run(&self, run: PlaybookRun) -> Result<RunOutput>;
}

/// [`PlaybookRunner`] backed by the `ansible-playbook` binary
#[derive(Clone, Debug)]
pub struct AnsibleExecutor {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl AnsibleExecutor {
    /// Use `program` as the playbook binary
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    /// Build from global configuration
    pub fn from_config(config: &KeelConfig) -> Self {
        Self::new(&config.ansible_playbook_bin).with_timeout(config.playbook_timeout())
    }

    /// Kill runs exceeding `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    async fn execute(
        &self,
        action: &str,
        playbook_set: &PlaybookSet,
        args: Vec<OsString>,
    ) -> Result<RunOutput> {
        let prefix = format!("keel ansible for {action}");
        info!(
            prefix = %prefix,
            program = %self.program.display(),
            args = ?args,
            "executing playbook"
        );

        let started = Instant::now();
        let mut child = Command::new(&self.program)
            .args(&args)
            .env("ANSIBLE_CONFIG", playbook_set.config_path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| Error::OutputStream {
            message: "stdout not captured".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| Error::OutputStream {
            message: "stderr not captured".to_string(),
        })?;
        let stdout_task = tokio::spawn(stream_lines(prefix.clone(), stdout));
        let stderr_task = tokio::spawn(collect(stderr));

        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    warn!(prefix = %prefix, secs = limit.as_secs(), "playbook timed out, killing");
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "failed to kill ansible-playbook");
                    }
                    stdout_task.abort();
                    stderr_task.abort();
                    return Err(Error::Timeout {
                        action: action.to_string(),
                        secs: limit.as_secs(),
                    });
                }
            },
            None => child.wait().await,
        };
        let status = waited.map_err(|e| Error::io("wait for ansible-playbook", e))?;

        let output = join_reader(stdout_task).await?;
        let stderr = join_reader(stderr_task).await?;
        let elapsed = started.elapsed();

        if !status.success() {
            let code = ExitCode::from_status(status);
            warn!(prefix = %prefix, code = code.code(), error = %code, "playbook failed");
            return Err(Error::Playbook { code, stderr });
        }

        info!(prefix = %prefix, elapsed_secs = elapsed.as_secs(), "playbook finished");
        Ok(RunOutput { output, elapsed })
    }
}

#[async_trait]
impl PlaybookRunner for AnsibleExecutor {
    async fn run(&self, run: PlaybookRun) -> Result<RunOutput> {
        let playbook_path = run.playbook_path();
        if !playbook_path.exists() {
            return Err(Error::PlaybookNotFound {
                path: playbook_path,
            });
        }

        let PlaybookRun {
            action,
            playbook_set,
            inventory,
            vars,
            limit,
            debug,
            ..
        } = run;

        let mut ctx = RunContext::materialize(&action, inventory, &vars)?;
        let args = command_args(&playbook_path, &ctx, &limit, debug)?;
        let result = self.execute(&action, &playbook_set, args).await;

        match (result, ctx.cleanup()) {
            (Err(e), Err(cleanup)) => {
                warn!(action = %action, error = %cleanup, "cleanup failed after playbook error");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(_), Err(cleanup)) => {
                warn!(action = %action, error = %cleanup, "cleanup failed");
                Err(cleanup)
            }
            (Ok(output), Ok(())) => Ok(output),
        }
    }
}

/// Command line for one invocation
fn command_args(
    playbook: &Path,
    ctx: &RunContext,
    limit: &[String],
    debug: bool,
) -> Result<Vec<OsString>> {
    let missing = || Error::OutputStream {
        message: "run artifacts already cleaned up".to_string(),
    };
    let inventory = ctx.inventory_path().ok_or_else(missing)?;
    let vars = ctx.vars_path().ok_or_else(missing)?;

    let mut extra_vars = OsString::from("@");
    extra_vars.push(vars);

    let mut args: Vec<OsString> = vec![
        playbook.into(),
        "-i".into(),
        inventory.into(),
        "--extra-vars".into(),
        extra_vars,
        "--become".into(),
        "--become-user".into(),
        BECOME_USER.into(),
    ];
    if !limit.is_empty() {
        args.push("--limit".into());
        args.push(limit.join(",").into());
    }
    if debug {
        args.push("-vvv".into());
    }
    Ok(args)
}

/// Log and buffer every line of `reader`
///
/// Bytes that are not valid UTF-8 are replaced, never fatal. On a read
/// error the rest of the stream is drained so the child never blocks on a
/// full pipe, then the error is returned.
async fn stream_lines<R>(prefix: String, reader: R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut raw = Vec::new();
    let mut buffer = String::new();
    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => return Ok(buffer),
            Ok(_) => {
                let text = String::from_utf8_lossy(&raw);
                let line = text.trim_end_matches(['\n', '\r']);
                info!("{prefix} {PREFIX_SEPARATOR} {line}");
                let _ = writeln!(buffer, "{prefix} {PREFIX_SEPARATOR} {line}");
            }
            Err(e) => {
                let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                return Err(Error::OutputStream {
                    message: format!("AnsibleRunner for {prefix} results: {e}"),
                });
            }
        }
    }
}

async fn collect<R>(mut reader: R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .await
        .map_err(|e| Error::OutputStream {
            message: format!("read stderr: {e}"),
        })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

async fn join_reader(task: tokio::task::JoinHandle<Result<String>>) -> Result<String> {
    let result = task.await.map_err(|e| Error::OutputStream {
        message: format!("output reader task failed: {e}"),
    })?;
    if let Err(e) = &result {
        debug!(error = %e, "output reader failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::test_keys::ED25519;
    use crate::host::{Host, Role};
    use crate::inventory::GroupNaming;
    use rstest::rstest;

    fn inventory() -> Inventory {
        Inventory::new(
            vec![
                Host::new("node1", "10.0.0.1", "root", Some("pw".into()), [Role::Master, Role::Etcd])
                    .expect("host"),
                Host::new("node2", "10.0.0.2", "root", Some("pw".into()), [Role::Worker])
                    .expect("host"),
            ],
            GroupNaming::Legacy,
        )
        .expect("inventory")
    }

    // ==========================================================================
    // Exit code taxonomy
    // ==========================================================================

    #[rstest]
    #[case(1, ExitCode::GeneralError, "general error")]
    #[case(2, ExitCode::HostFailed, "one or more host failed")]
    #[case(3, ExitCode::HostUnreachable, "one or more host unreachable")]
    #[case(4, ExitCode::ParserError, "parser error")]
    #[case(5, ExitCode::BadOrIncompleteOptions, "bad or incomplete options")]
    #[case(99, ExitCode::UserInterrupted, "user interrupted execution")]
    #[case(250, ExitCode::Unexpected, "unexpected error")]
    #[case(42, ExitCode::Other(42), "exit code 42")]
    fn exit_codes_classify(#[case] raw: i32, #[case] code: ExitCode, #[case] message: &str) {
        assert_eq!(ExitCode::from_code(raw), code);
        assert_eq!(code.code(), raw);
        assert_eq!(code.to_string(), message);
    }

    // ==========================================================================
    // Limits
    // ==========================================================================

    #[test]
    fn checked_limit_rejects_unknown_hosts() {
        let mut run = PlaybookRun::new(
            "scale",
            PlaybookSet::new("/nonexistent", "kubespray"),
            Playbook::Scale,
            inventory(),
            KubesprayVars::default(),
        );
        run.add_limit(true, ["node2"]).expect("known host");
        let err = run.add_limit(true, ["node9"]).unwrap_err();
        assert!(err.to_string().contains("node9"));
        assert_eq!(run.limit(), ["node2".to_string()]);
    }

    #[test]
    fn unchecked_limit_accepts_group_names() {
        let mut run = PlaybookRun::new(
            "scale",
            PlaybookSet::new("/nonexistent", "kubespray"),
            Playbook::Cluster,
            inventory(),
            KubesprayVars::default(),
        );
        run.add_limit(false, ["etcd", "kube-master"]).expect("groups");
        assert_eq!(run.limit(), ["etcd".to_string(), "kube-master".to_string()]);
    }

    // ==========================================================================
    // Run context
    // ==========================================================================

    mod run_context {
        use super::*;

        #[test]
        fn materialize_writes_inventory_and_vars() {
            let vars = KubesprayVars {
                kube_version: "v1.20.0".into(),
                ..Default::default()
            };
            let mut ctx = RunContext::materialize("create", inventory(), &vars).expect("materialize");
            let inv_path = ctx.inventory_path().expect("inventory path").to_path_buf();
            let vars_path = ctx.vars_path().expect("vars path").to_path_buf();

            assert!(std::fs::read_to_string(&inv_path)
                .expect("read inventory")
                .starts_with("[all]\nnode1\t"));
            assert!(vars_path.to_string_lossy().ends_with(".json"));
            let json: serde_json::Value =
                serde_json::from_str(&std::fs::read_to_string(&vars_path).expect("read vars"))
                    .expect("vars are json");
            assert_eq!(json["kube_version"], "v1.20.0");

            ctx.cleanup().expect("cleanup");
            assert!(!inv_path.exists());
            assert!(!vars_path.exists());
        }

        #[test]
        fn cleanup_clears_host_keys_and_tolerates_missing_files() {
            let mut hosts = inventory().into_hosts();
            hosts[0].set_private_key(ED25519.as_bytes()).expect("key");
            let key_path = hosts[0].private_key_file().expect("key file").to_path_buf();
            let inv = Inventory::new(hosts, GroupNaming::Legacy).expect("inventory");

            let mut ctx =
                RunContext::materialize("create", inv, &KubesprayVars::default()).expect("materialize");
            std::fs::remove_file(ctx.inventory_path().expect("path")).expect("remove early");

            ctx.cleanup().expect("cleanup");
            assert!(!key_path.exists());
        }

        #[test]
        fn failed_render_still_removes_key_files() {
            let mut host = Host::new("node1", "10.0.0.1", "root", None, [Role::Worker]).expect("host");
            host.set_private_key(ED25519.as_bytes()).expect("key");
            let key_path = host.private_key_file().expect("key file").to_path_buf();
            let inv = Inventory::new(vec![host], GroupNaming::Legacy).expect("inventory");

            let err = RunContext::materialize("create", inv, &KubesprayVars::default()).unwrap_err();
            assert!(err.to_string().contains("etcd nodes is empty"));
            assert!(!key_path.exists());
        }

        #[test]
        fn drop_without_cleanup_removes_files() {
            let ctx = RunContext::materialize("create", inventory(), &KubesprayVars::default())
                .expect("materialize");
            let inv_path = ctx.inventory_path().expect("path").to_path_buf();
            drop(ctx);
            assert!(!inv_path.exists());
        }
    }

    #[test]
    fn command_line_carries_inventory_vars_become_and_limit() {
        let ctx = RunContext::materialize("scale", inventory(), &KubesprayVars::default())
            .expect("materialize");
        let args = command_args(
            Path::new("/opt/ansible/kubespray/scale.yml"),
            &ctx,
            &["node2".to_string(), "node3".to_string()],
            true,
        )
        .expect("args");
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(args[0], "/opt/ansible/kubespray/scale.yml");
        assert_eq!(args[1], "-i");
        assert_eq!(args[3], "--extra-vars");
        assert!(args[4].starts_with('@'));
        assert_eq!(&args[5..8], ["--become", "--become-user", "root"]);
        assert_eq!(&args[8..10], ["--limit", "node2,node3"]);
        assert_eq!(args[10], "-vvv");
    }

    // ==========================================================================
    // Process execution
    // ==========================================================================

    /// A fake `ansible-playbook` that sources its first argument as shell.
    /// Each test writes its behavior into the "playbook" file, so the
    /// executable itself is written exactly once.
    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::sync::OnceLock;
        use tempfile::TempDir;

        fn fake_ansible() -> &'static Path {
            static FAKE: OnceLock<(TempDir, PathBuf)> = OnceLock::new();
            let (_, path) = FAKE.get_or_init(|| {
                let dir = TempDir::new().expect("tempdir");
                let path = dir.path().join("ansible-playbook");
                std::fs::write(&path, "#!/bin/sh\n. \"$1\"\n").expect("write fake");
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                    .expect("chmod fake");
                (dir, path)
            });
            path
        }

        struct Fixture {
            root: TempDir,
        }

        impl Fixture {
            fn with_playbook(script: &str) -> Self {
                let root = TempDir::new().expect("tempdir");
                let set_dir = root.path().join("kubespray");
                std::fs::create_dir_all(&set_dir).expect("mkdir");
                std::fs::write(set_dir.join("cluster.yml"), script).expect("write playbook");
                Self { root }
            }

            fn run(&self, inventory: Inventory) -> PlaybookRun {
                PlaybookRun::new(
                    "create",
                    PlaybookSet::new(self.root.path(), "kubespray"),
                    Playbook::Cluster,
                    inventory,
                    KubesprayVars {
                        kube_version: "v1.17.0".into(),
                        ..Default::default()
                    },
                )
            }
        }

        #[tokio::test]
        async fn streams_prefixed_stdout_and_passes_config_path() {
            let fixture = Fixture::with_playbook(
                "echo 'PLAY [all]'\necho \"config=$ANSIBLE_CONFIG\"\necho \"args=$*\"\nexit 0\n",
            );
            let mut run = fixture.run(inventory());
            run.add_limit(true, ["node2"]).expect("limit");

            let out = AnsibleExecutor::new(fake_ansible())
                .run(run)
                .await
                .expect("run should succeed");

            assert!(out
                .output
                .contains("keel ansible for create ── PLAY [all]\n"));
            let expected_cfg = fixture.root.path().join("kubespray").join("ansible.cfg");
            assert!(out
                .output
                .contains(&format!("config={}", expected_cfg.display())));
            assert!(out.output.contains("--become --become-user root --limit node2"));
        }

        #[tokio::test]
        async fn artifacts_exist_during_run_and_are_removed_after() {
            let fixture = Fixture::with_playbook(
                "echo \"inv=$3\"\ngrep -q '^\\[etcd\\]' \"$3\" || exit 4\nvars=\"${5#@}\"\ngrep -q kube_version \"$vars\" || exit 4\necho \"vars=$vars\"\n",
            );
            let mut hosts = inventory().into_hosts();
            hosts[1].set_private_key(ED25519.as_bytes()).expect("key");
            let key_path = hosts[1].private_key_file().expect("key").to_path_buf();
            let inv = Inventory::new(hosts, GroupNaming::Legacy).expect("inventory");

            let out = AnsibleExecutor::new(fake_ansible())
                .run(fixture.run(inv))
                .await
                .expect("run should succeed");

            let path_after = |tag: &str| {
                out.output
                    .lines()
                    .find_map(|l| l.split_once(tag).map(|(_, p)| PathBuf::from(p)))
                    .expect("path echoed")
            };
            assert!(!path_after("inv=").exists());
            assert!(!path_after("vars=").exists());
            assert!(!key_path.exists());
        }

        #[tokio::test]
        async fn nonzero_exit_is_classified_with_stderr() {
            let fixture = Fixture::with_playbook(
                "echo 'fatal: [node2]: UNREACHABLE!' >&2\nexit 3\n",
            );
            let err = AnsibleExecutor::new(fake_ansible())
                .run(fixture.run(inventory()))
                .await
                .unwrap_err();
            assert_eq!(err.exit_code(), Some(ExitCode::HostUnreachable));
            assert!(err.to_string().contains("UNREACHABLE"));
        }

        #[tokio::test]
        async fn latin1_output_is_replaced_not_fatal() {
            let fixture = Fixture::with_playbook("printf 'caf\\351\\n'\necho done\nexit 0\n");
            let out = AnsibleExecutor::new(fake_ansible())
                .run(fixture.run(inventory()))
                .await
                .expect("run should succeed");
            assert!(out.output.contains("── caf\u{FFFD}\n"));
            assert!(out.output.contains("── done\n"));
        }

        #[tokio::test]
        async fn latin1_output_keeps_exit_classification() {
            let fixture = Fixture::with_playbook("printf 'caf\\351\\n'\nexit 3\n");
            let err = AnsibleExecutor::new(fake_ansible())
                .run(fixture.run(inventory()))
                .await
                .unwrap_err();
            assert_eq!(err.exit_code(), Some(ExitCode::HostUnreachable));
        }

        #[tokio::test]
        async fn missing_playbook_fails_before_spawn() {
            let root = TempDir::new().expect("tempdir");
            let run = PlaybookRun::new(
                "create",
                PlaybookSet::new(root.path(), "kubespray"),
                Playbook::Cluster,
                inventory(),
                KubesprayVars::default(),
            );
            let err = AnsibleExecutor::new("/definitely/not/ansible-playbook")
                .run(run)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::PlaybookNotFound { .. }));
        }

        #[tokio::test]
        async fn missing_binary_is_a_spawn_error() {
            let fixture = Fixture::with_playbook("exit 0\n");
            let err = AnsibleExecutor::new("/definitely/not/ansible-playbook")
                .run(fixture.run(inventory()))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Spawn { .. }));
        }

        #[tokio::test]
        async fn slow_runs_are_killed_on_timeout() {
            let fixture = Fixture::with_playbook("echo started\nexec sleep 30\n");
            let err = AnsibleExecutor::new(fake_ansible())
                .with_timeout(Some(Duration::from_millis(300)))
                .run(fixture.run(inventory()))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Timeout { .. }));
        }

        #[tokio::test]
        async fn large_output_does_not_deadlock() {
            let fixture = Fixture::with_playbook(
                "i=0\nwhile [ $i -lt 5000 ]; do echo \"ok: [node$i] => line with some padding text\"; i=$((i+1)); done\nexit 0\n",
            );
            let out = AnsibleExecutor::new(fake_ansible())
                .run(fixture.run(inventory()))
                .await
                .expect("run should succeed");
            assert_eq!(out.output.lines().count(), 5000);
        }
    }
}
