//! [`ContainerBackend`] that shells out to the `docker` CLI.

use std::{
    io::Write,
    process::{Command, Stdio},
    sync::LazyLock,
    time::Duration,
};

use {
    chrono::DateTime,
    regex::Regex,
    serde::Deserialize,
    tempfile::NamedTempFile,
    tracing::{debug, info},
};

use crate::{
    backend::{
        BackendError, ContainerBackend, ContainerCreateConfig, ContainerInspect, ContainerSummary,
        ListOptions, RegistryAuth, RemoveOptions,
    },
    types::Labels,
};

#[allow(clippy::expect_used)]
static CONFLICT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"Conflict\. .+ is already in use by container \\?"?([0-9a-z]+)"#)
        .expect("conflict pattern is valid")
});

const NOT_FOUND_MARKERS: &[&str] = &["No such container", "No such object"];

pub struct DockerCli {
    cli: String,
    host: Option<String>,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker", None)
    }
}

impl DockerCli {
    pub fn new(cli: impl Into<String>, host: Option<String>) -> Self {
        Self {
            cli: cli.into(),
            host,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.cli);
        if let Some(host) = &self.host {
            cmd.args(["-H", host.as_str()]);
        }
        cmd
    }

    /// Run `args` and return trimmed stdout. `subject` is the container id or
    /// name the command acts on, used to classify failures.
    fn run(&self, args: &[String], subject: &str) -> Result<String, BackendError> {
        let rendered = format!("{} {}", self.cli, args.join(" "));
        debug!(command = %rendered, "running container cli");
        let output = self.command().args(args).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&rendered, stderr.trim(), subject));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn login(&self, auth: &RegistryAuth) -> Result<(), BackendError> {
        let mut cmd = self.command();
        cmd.args([
            "login",
            "--username",
            auth.username.as_str(),
            "--password-stdin",
        ]);
        if !auth.server.is_empty() {
            cmd.arg(&auth.server);
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(auth.password.as_bytes())?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(BackendError::Command {
                command: format!("{} login", self.cli),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    fn inspect_many(&self, ids: &[String]) -> Result<Vec<RawInspect>, BackendError> {
        let mut args = vec!["inspect".to_string(), "--type".into(), "container".into()];
        args.extend(ids.iter().cloned());
        let subject = ids.first().map(String::as_str).unwrap_or_default();
        let stdout = self.run(&args, subject)?;
        Ok(serde_json::from_str(&stdout)?)
    }
}

impl ContainerBackend for DockerCli {
    fn api_version(&self) -> Result<String, BackendError> {
        self.run(
            &[
                "version".into(),
                "--format".into(),
                "{{.Server.APIVersion}}".into(),
            ],
            "",
        )
    }

    fn pull_image(&self, image: &str, auth: Option<&RegistryAuth>) -> Result<(), BackendError> {
        if let Some(auth) = auth {
            self.login(auth)?;
        }
        info!(image, "pulling image");
        self.run(&["pull".into(), image.into()], image)?;
        Ok(())
    }

    fn create_container(&self, config: &ContainerCreateConfig) -> Result<String, BackendError> {
        // The profile files must outlive the CLI call; dropping them deletes them.
        let (security_opts, _profile_files) =
            materialize_seccomp_profiles(&config.host_config.security_opt)?;
        let id = self.run(&create_args(config, &security_opts), &config.name)?;
        if id.is_empty() {
            return Err(BackendError::Message(
                "container cli returned an empty container id".into(),
            ));
        }
        Ok(id)
    }

    fn start_container(&self, id: &str) -> Result<(), BackendError> {
        self.run(&["start".into(), id.into()], id).map(drop)
    }

    fn stop_container(&self, id: &str, grace: Duration) -> Result<(), BackendError> {
        self.run(
            &[
                "stop".into(),
                format!("--time={}", grace.as_secs()),
                id.into(),
            ],
            id,
        )
        .map(drop)
    }

    fn remove_container(&self, id: &str, options: RemoveOptions) -> Result<(), BackendError> {
        let mut args = vec!["rm".to_string()];
        if options.remove_volumes {
            args.push("--volumes".into());
        }
        if options.force {
            args.push("--force".into());
        }
        args.push(id.into());
        self.run(&args, id).map(drop)
    }

    fn inspect_container(&self, id: &str) -> Result<ContainerInspect, BackendError> {
        self.inspect_many(&[id.to_string()])?
            .into_iter()
            .next()
            .map(RawInspect::into_inspect)
            .ok_or_else(|| BackendError::not_found(id))
    }

    fn list_containers(&self, options: &ListOptions) -> Result<Vec<ContainerSummary>, BackendError> {
        let stdout = self.run(&ps_args(options), "")?;
        let ids: Vec<String> = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let summaries: Vec<ContainerSummary> = match self.inspect_many(&ids) {
            Ok(raw) => raw.into_iter().map(RawInspect::into_summary).collect(),
            // A container removed between `ps` and `inspect` fails the batch;
            // fall back to inspecting one by one and skipping the missing.
            Err(e) if e.is_not_found() => {
                let mut summaries = Vec::new();
                for id in &ids {
                    match self.inspect_many(std::slice::from_ref(id)) {
                        Ok(raw) => summaries.extend(raw.into_iter().map(RawInspect::into_summary)),
                        Err(e) if e.is_not_found() => continue,
                        Err(e) => return Err(e),
                    }
                }
                summaries
            },
            Err(e) => return Err(e),
        };
        Ok(summaries
            .into_iter()
            .filter(|s: &ContainerSummary| options.id.as_ref().is_none_or(|id| &s.id == id))
            .collect())
    }
}

fn classify_failure(command: &str, stderr: &str, subject: &str) -> BackendError {
    if NOT_FOUND_MARKERS.iter().any(|m| stderr.contains(m)) {
        return BackendError::not_found(subject);
    }
    if let Some(caps) = CONFLICT_REGEX.captures(stderr) {
        return BackendError::Conflict {
            name: subject.to_string(),
            existing_id: caps[1].to_string(),
        };
    }
    BackendError::Command {
        command: command.to_string(),
        stderr: stderr.to_string(),
    }
}

/// Inline seccomp profiles (JSON) must be handed to the CLI as files.
///
/// The returned temp files are removed when dropped.
fn materialize_seccomp_profiles(
    security_opt: &[String],
) -> Result<(Vec<String>, Vec<NamedTempFile>), BackendError> {
    let mut opts = Vec::with_capacity(security_opt.len());
    let mut files = Vec::new();
    for opt in security_opt {
        let inline = ["seccomp=", "seccomp:"]
            .iter()
            .find_map(|prefix| opt.strip_prefix(prefix))
            .filter(|value| value.starts_with('{'));
        match inline {
            Some(profile) => {
                let mut file = tempfile::Builder::new()
                    .prefix("podshim-seccomp-")
                    .suffix(".json")
                    .tempfile()?;
                file.write_all(profile.as_bytes())?;
                file.flush()?;
                opts.push(format!("seccomp={}", file.path().display()));
                files.push(file);
            },
            None => opts.push(opt.clone()),
        }
    }
    Ok((opts, files))
}

fn create_args(config: &ContainerCreateConfig, security_opts: &[String]) -> Vec<String> {
    let hc = &config.host_config;
    let mut args = vec!["create".to_string(), format!("--name={}", config.name)];
    if !config.hostname.is_empty() {
        args.push(format!("--hostname={}", config.hostname));
    }
    for (k, v) in &config.labels {
        args.push(format!("--label={k}={v}"));
    }
    if let Some(mode) = &hc.network_mode {
        args.push(format!("--network={mode}"));
    }
    if let Some(mode) = &hc.pid_mode {
        args.push(format!("--pid={mode}"));
    }
    if let Some(mode) = &hc.ipc_mode {
        args.push(format!("--ipc={mode}"));
    }
    if let Some(shares) = hc.cpu_shares {
        args.push(format!("--cpu-shares={shares}"));
    }
    if let Some(swap) = hc.memory_swap {
        args.push(format!("--memory-swap={swap}"));
    }
    if let Some(adj) = hc.oom_score_adj {
        args.push(format!("--oom-score-adj={adj}"));
    }
    if let Some(parent) = &hc.cgroup_parent {
        args.push(format!("--cgroup-parent={parent}"));
    }
    if hc.privileged {
        args.push("--privileged".into());
    }
    if hc.readonly_rootfs {
        args.push("--read-only".into());
    }
    for opt in security_opts {
        args.push(format!("--security-opt={opt}"));
    }
    for (k, v) in &hc.sysctls {
        args.push(format!("--sysctl={k}={v}"));
    }
    args.extend(hc.dns.iter().map(|s| format!("--dns={s}")));
    args.extend(hc.dns_search.iter().map(|s| format!("--dns-search={s}")));
    args.extend(hc.dns_options.iter().map(|s| format!("--dns-option={s}")));
    args.extend(config.exposed_ports.iter().map(|p| format!("--expose={p}")));
    for (port, bindings) in &hc.port_bindings {
        for binding in bindings {
            if binding.host_ip.is_empty() {
                args.push(format!("--publish={}:{port}", binding.host_port));
            } else {
                args.push(format!(
                    "--publish={}:{}:{port}",
                    binding.host_ip, binding.host_port
                ));
            }
        }
    }
    args.push(config.image.clone());
    args
}

fn ps_args(options: &ListOptions) -> Vec<String> {
    let mut args = vec!["ps".to_string(), "--quiet".into(), "--no-trunc".into()];
    if options.all {
        args.push("--all".into());
    }
    if let Some(id) = &options.id {
        args.push(format!("--filter=id={id}"));
    }
    for (k, v) in &options.labels {
        args.push(format!("--filter=label={k}={v}"));
    }
    args
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawInspect {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    created: String,
    #[serde(default)]
    state: RawState,
    #[serde(default)]
    config: RawConfig,
    #[serde(default)]
    host_config: RawHostConfig,
    #[serde(default)]
    network_settings: RawNetworkSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawState {
    #[serde(default)]
    running: bool,
    #[serde(default)]
    pid: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawConfig {
    #[serde(default)]
    labels: Option<Labels>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawHostConfig {
    #[serde(default)]
    network_mode: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawNetworkSettings {
    #[serde(default, rename = "IPAddress")]
    ip_address: String,
    #[serde(default, rename = "GlobalIPv6Address")]
    global_ipv6_address: String,
}

impl RawInspect {
    fn into_inspect(self) -> ContainerInspect {
        ContainerInspect {
            id: self.id,
            name: self.name,
            created: self.created,
            running: self.state.running,
            pid: self.state.pid,
            labels: self.config.labels.unwrap_or_default(),
            network_mode: self.host_config.network_mode,
            ip_address: self.network_settings.ip_address,
            global_ipv6_address: self.network_settings.global_ipv6_address,
        }
    }

    fn into_summary(self) -> ContainerSummary {
        let created = DateTime::parse_from_rfc3339(&self.created)
            .map(|t| t.timestamp())
            .unwrap_or_default();
        ContainerSummary {
            id: self.id,
            names: vec![self.name],
            labels: self.config.labels.unwrap_or_default(),
            running: self.state.running,
            created,
        }
    }
}
