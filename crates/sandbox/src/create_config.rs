//! Translation of a [`SandboxConfig`] into backend creation parameters.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Component, Path},
};

use tracing::{debug, warn};

use crate::{
    backend::{ContainerCreateConfig, HostConfig, PortBinding, parse_api_version},
    error::{Error, Result},
    labels::{
        CONTAINER_NAME_LABEL_KEY, CONTAINER_TYPE_LABEL_KEY, CONTAINER_TYPE_LABEL_SANDBOX,
        make_labels,
    },
    naming::{SANDBOX_CONTAINER_NAME, make_sandbox_name},
    types::{Labels, PortMapping, Protocol, SandboxConfig},
};

/// Minimal CPU weight; the sandbox only holds namespaces.
pub const SANDBOX_CPU_SHARES: i64 = 2;
pub const SANDBOX_MEMORY_SWAP: i64 = 0;
/// Lower than any workload container so the OOM killer picks workloads first.
pub const SANDBOX_OOM_SCORE_ADJ: i32 = -998;

pub const NAMESPACE_MODE_HOST: &str = "host";

pub const SYSCTLS_ANNOTATION: &str = "security.alpha.kubernetes.io/sysctls";
pub const UNSAFE_SYSCTLS_ANNOTATION: &str = "security.alpha.kubernetes.io/unsafe-sysctls";

pub const SECCOMP_POD_ANNOTATION: &str = "seccomp.security.alpha.kubernetes.io/pod";
pub const SECCOMP_CONTAINER_ANNOTATION_PREFIX: &str = "container.seccomp.security.alpha.kubernetes.io/";
pub const SECCOMP_UNCONFINED: &str = "unconfined";
pub const SECCOMP_DOCKER_DEFAULT: &str = "docker/default";

pub const APPARMOR_RUNTIME_DEFAULT: &str = "runtime/default";
pub const APPARMOR_UNCONFINED: &str = "unconfined";

pub const LOCALHOST_PROFILE_PREFIX: &str = "localhost/";

/// Engine API versions before 1.23 only accept `:` in `--security-opt`.
#[must_use]
pub fn security_opt_separator(api_version: &str) -> char {
    match parse_api_version(api_version) {
        Some(version) if version < (1, 23) => ':',
        _ => '=',
    }
}

/// Context that does not come from the sandbox config itself.
#[derive(Debug, Clone, Copy)]
pub struct CreateParams<'a> {
    pub image: &'a str,
    pub network_plugin: &'a str,
    pub security_opt_separator: char,
    pub seccomp_profile_root: &'a Path,
}

pub fn make_sandbox_create_config(
    config: &SandboxConfig,
    params: CreateParams<'_>,
) -> Result<ContainerCreateConfig> {
    let mut labels = make_labels(&config.labels, &config.annotations);
    labels.insert(
        CONTAINER_TYPE_LABEL_KEY.to_string(),
        CONTAINER_TYPE_LABEL_SANDBOX.to_string(),
    );
    labels.insert(
        CONTAINER_NAME_LABEL_KEY.to_string(),
        SANDBOX_CONTAINER_NAME.to_string(),
    );

    let security = &config.linux.security_context;
    let namespaces = &security.namespace_options;

    let mut host_config = HostConfig {
        network_mode: Some(network_mode(namespaces.host_network, params.network_plugin).into()),
        pid_mode: namespaces.host_pid.then(|| NAMESPACE_MODE_HOST.to_string()),
        ipc_mode: namespaces.host_ipc.then(|| NAMESPACE_MODE_HOST.to_string()),
        cpu_shares: Some(SANDBOX_CPU_SHARES),
        memory_swap: Some(SANDBOX_MEMORY_SWAP),
        oom_score_adj: Some(SANDBOX_OOM_SCORE_ADJ),
        cgroup_parent: config.linux.cgroup_parent.clone().filter(|p| !p.is_empty()),
        privileged: security.privileged,
        readonly_rootfs: security.readonly_rootfs,
        sysctls: sysctls_from_annotations(&config.annotations)?,
        ..HostConfig::default()
    };

    if let Some(dns) = &config.dns_config {
        host_config.dns = dns.servers.clone();
        host_config.dns_search = dns.searches.clone();
        host_config.dns_options = dns.options.clone();
    }

    let (exposed_ports, port_bindings) = make_ports_and_bindings(&config.port_mappings);
    host_config.port_bindings = port_bindings;

    let sep = params.security_opt_separator;
    let mut security_opt = seccomp_options(
        &config.annotations,
        SANDBOX_CONTAINER_NAME,
        params.seccomp_profile_root,
    )?;
    security_opt.extend(apparmor_options(security.apparmor_profile.as_deref())?);
    host_config.security_opt = security_opt
        .into_iter()
        .map(|(key, value)| format!("{key}{sep}{value}"))
        .collect();

    Ok(ContainerCreateConfig {
        name: make_sandbox_name(&config.metadata),
        hostname: config.hostname.clone(),
        image: params.image.to_string(),
        labels,
        exposed_ports,
        host_config,
    })
}

/// Host network wins; CNI-style plugins get an empty namespace to populate.
#[must_use]
pub fn network_mode(host_network: bool, plugin: &str) -> &'static str {
    if host_network {
        return NAMESPACE_MODE_HOST;
    }
    match plugin {
        "cni" | "kubenet" => "none",
        _ => "default",
    }
}

/// Parse `k=v,k=v` sysctl annotations, safe then unsafe.
pub fn sysctls_from_annotations(annotations: &Labels) -> Result<BTreeMap<String, String>> {
    let mut sysctls = BTreeMap::new();
    for key in [SYSCTLS_ANNOTATION, UNSAFE_SYSCTLS_ANNOTATION] {
        let Some(raw) = annotations.get(key) else {
            continue;
        };
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((name, value)) = entry.split_once('=') else {
                return Err(Error::InvalidConfig(format!(
                    "sysctl {entry:?} in {key} is not of the form name=value"
                )));
            };
            if name.is_empty() || value.contains('=') {
                return Err(Error::InvalidConfig(format!(
                    "sysctl {entry:?} in {key} is not of the form name=value"
                )));
            }
            sysctls.insert(name.to_string(), value.to_string());
        }
    }
    Ok(sysctls)
}

/// Exposed ports and host bindings. Mappings without a host port are not
/// published; one container port may be bound to several host ports.
#[must_use]
pub fn make_ports_and_bindings(
    mappings: &[PortMapping],
) -> (BTreeSet<String>, BTreeMap<String, Vec<PortBinding>>) {
    let mut exposed = BTreeSet::new();
    let mut bindings: BTreeMap<String, Vec<PortBinding>> = BTreeMap::new();
    for pm in mappings {
        if pm.host_port == 0 {
            continue;
        }
        let proto = match pm.protocol {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            other => {
                warn!(protocol = %other, port = pm.container_port, "unsupported port protocol, defaulting to tcp");
                "tcp"
            },
        };
        let port = format!("{}/{proto}", pm.container_port);
        exposed.insert(port.clone());
        bindings.entry(port).or_default().push(PortBinding {
            host_ip: pm.host_ip.clone(),
            host_port: pm.host_port,
        });
    }
    (exposed, bindings)
}

/// Resolve the seccomp profile for `container_name` into `(key, value)`
/// security options. The container-specific annotation wins over the pod one.
pub fn seccomp_options(
    annotations: &Labels,
    container_name: &str,
    profile_root: &Path,
) -> Result<Vec<(String, String)>> {
    let profile = annotations
        .get(&format!("{SECCOMP_CONTAINER_ANNOTATION_PREFIX}{container_name}"))
        .or_else(|| annotations.get(SECCOMP_POD_ANNOTATION))
        .map(String::as_str)
        .unwrap_or_default();

    if profile.is_empty() || profile == SECCOMP_UNCONFINED {
        return Ok(vec![("seccomp".into(), SECCOMP_UNCONFINED.into())]);
    }
    if profile == SECCOMP_DOCKER_DEFAULT {
        return Ok(Vec::new());
    }
    let Some(name) = profile.strip_prefix(LOCALHOST_PROFILE_PREFIX) else {
        return Err(Error::InvalidConfig(format!(
            "unknown seccomp profile {profile:?}"
        )));
    };
    let relative = Path::new(name);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(Error::InvalidConfig(format!(
            "seccomp profile {name:?} must be a relative path below the profile root"
        )));
    }
    let path = profile_root.join(relative);
    let raw = std::fs::read(&path).map_err(|e| {
        Error::InvalidConfig(format!(
            "cannot read seccomp profile {}: {e}",
            path.display()
        ))
    })?;
    let value: serde_json::Value = serde_json::from_slice(&raw).map_err(|e| {
        Error::InvalidConfig(format!(
            "seccomp profile {} is not valid JSON: {e}",
            path.display()
        ))
    })?;
    debug!(profile = name, "using localhost seccomp profile");
    Ok(vec![("seccomp".into(), value.to_string())])
}

pub fn apparmor_options(profile: Option<&str>) -> Result<Vec<(String, String)>> {
    match profile.unwrap_or_default() {
        "" | APPARMOR_RUNTIME_DEFAULT => Ok(Vec::new()),
        APPARMOR_UNCONFINED => Ok(vec![("apparmor".into(), APPARMOR_UNCONFINED.into())]),
        other => match other.strip_prefix(LOCALHOST_PROFILE_PREFIX) {
            Some(name) if !name.is_empty() => Ok(vec![("apparmor".into(), name.into())]),
            _ => Err(Error::InvalidConfig(format!(
                "unknown apparmor profile {other:?}"
            ))),
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::types::{DnsConfig, NamespaceOptions, SandboxMetadata},
        rstest::rstest,
        tempfile::TempDir,
    };

    fn annotations(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn params(root: &Path) -> CreateParams<'_> {
        CreateParams {
            image: "pause:3.0",
            network_plugin: "cni",
            security_opt_separator: '=',
            seccomp_profile_root: root,
        }
    }

    fn port(protocol: Protocol, container_port: i32, host_port: i32) -> PortMapping {
        PortMapping {
            protocol,
            container_port,
            host_port,
            host_ip: String::new(),
        }
    }

    #[rstest]
    #[case("1.22", ':')]
    #[case("1.23", '=')]
    #[case("1.41", '=')]
    #[case("garbage", '=')]
    fn separator_depends_on_version(#[case] version: &str, #[case] expected: char) {
        assert_eq!(security_opt_separator(version), expected);
    }

    #[rstest]
    #[case(true, "cni", "host")]
    #[case(false, "cni", "none")]
    #[case(false, "kubenet", "none")]
    #[case(false, "kubernetes.io/no-op", "default")]
    fn picks_network_mode(#[case] host: bool, #[case] plugin: &str, #[case] expected: &str) {
        assert_eq!(network_mode(host, plugin), expected);
    }

    #[test]
    fn builds_full_create_config() {
        let root = TempDir::new().unwrap();
        let config = SandboxConfig {
            metadata: SandboxMetadata::new("web", "default", "u1", 1),
            hostname: "web-host".into(),
            dns_config: Some(DnsConfig {
                servers: vec!["10.0.0.10".into()],
                searches: vec!["svc.cluster.local".into()],
                options: vec!["ndots:5".into()],
            }),
            port_mappings: vec![port(Protocol::Tcp, 80, 8080)],
            labels: annotations(&[("app", "web")]),
            annotations: annotations(&[(SYSCTLS_ANNOTATION, "net.core.somaxconn=1024")]),
            linux: crate::types::LinuxSandboxConfig {
                cgroup_parent: Some("/kubepods/pod-u1".into()),
                security_context: crate::types::LinuxSandboxSecurityContext {
                    namespace_options: NamespaceOptions {
                        host_network: false,
                        host_pid: true,
                        host_ipc: false,
                    },
                    ..Default::default()
                },
            },
        };

        let created = make_sandbox_create_config(&config, params(root.path())).unwrap();
        assert_eq!(created.name, "k8s_POD_web_default_u1_1");
        assert_eq!(created.image, "pause:3.0");
        assert_eq!(created.hostname, "web-host");
        assert_eq!(created.labels.get("app").map(String::as_str), Some("web"));
        assert_eq!(
            created.labels.get(CONTAINER_TYPE_LABEL_KEY).map(String::as_str),
            Some(CONTAINER_TYPE_LABEL_SANDBOX)
        );
        assert!(
            created
                .labels
                .contains_key(&format!("annotation.{SYSCTLS_ANNOTATION}"))
        );

        let hc = &created.host_config;
        assert_eq!(hc.network_mode.as_deref(), Some("none"));
        assert_eq!(hc.pid_mode.as_deref(), Some("host"));
        assert_eq!(hc.ipc_mode, None);
        assert_eq!(hc.cpu_shares, Some(2));
        assert_eq!(hc.memory_swap, Some(0));
        assert_eq!(hc.oom_score_adj, Some(-998));
        assert_eq!(hc.cgroup_parent.as_deref(), Some("/kubepods/pod-u1"));
        assert_eq!(hc.dns, vec!["10.0.0.10"]);
        assert_eq!(hc.dns_search, vec!["svc.cluster.local"]);
        assert_eq!(hc.dns_options, vec!["ndots:5"]);
        assert_eq!(
            hc.sysctls.get("net.core.somaxconn").map(String::as_str),
            Some("1024")
        );
        assert_eq!(hc.security_opt, vec!["seccomp=unconfined"]);
        assert!(created.exposed_ports.contains("80/tcp"));
    }

    #[test]
    fn old_engines_get_colon_separator() {
        let root = TempDir::new().unwrap();
        let config = SandboxConfig {
            metadata: SandboxMetadata::new("web", "default", "u1", 0),
            ..Default::default()
        };
        let mut p = params(root.path());
        p.security_opt_separator = ':';
        let created = make_sandbox_create_config(&config, p).unwrap();
        assert_eq!(created.host_config.security_opt, vec!["seccomp:unconfined"]);
    }

    #[test]
    fn ports_skip_unbound_and_allow_multiple_bindings() {
        let (exposed, bindings) = make_ports_and_bindings(&[
            port(Protocol::Tcp, 80, 8080),
            port(Protocol::Tcp, 80, 8081),
            port(Protocol::Udp, 53, 5353),
            port(Protocol::Tcp, 9090, 0),
            port(Protocol::Sctp, 7000, 7000),
        ]);
        assert_eq!(
            exposed.into_iter().collect::<Vec<_>>(),
            vec!["53/udp", "7000/tcp", "80/tcp"]
        );
        let http: Vec<i32> = bindings["80/tcp"].iter().map(|b| b.host_port).collect();
        assert_eq!(http, vec![8080, 8081]);
        assert!(!bindings.contains_key("9090/tcp"));
    }

    #[test]
    fn sysctls_merge_safe_and_unsafe() {
        let got = sysctls_from_annotations(&annotations(&[
            (SYSCTLS_ANNOTATION, "kernel.shm_rmid_forced=1, net.ipv4.ip_local_port_range=1024 65000"),
            (UNSAFE_SYSCTLS_ANNOTATION, "kernel.msgmax=65536"),
        ]))
        .unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(got["net.ipv4.ip_local_port_range"], "1024 65000");
        assert_eq!(got["kernel.msgmax"], "65536");
    }

    #[rstest]
    #[case("kernel.msgmax")]
    #[case("=1")]
    #[case("a=b=c")]
    fn sysctls_reject_malformed(#[case] raw: &str) {
        assert!(sysctls_from_annotations(&annotations(&[(SYSCTLS_ANNOTATION, raw)])).is_err());
    }

    #[rstest]
    #[case(&[], Some("unconfined"))]
    #[case(&[(SECCOMP_POD_ANNOTATION, "unconfined")], Some("unconfined"))]
    #[case(&[(SECCOMP_POD_ANNOTATION, "docker/default")], None)]
    #[case(
        &[(SECCOMP_POD_ANNOTATION, "unconfined"), ("container.seccomp.security.alpha.kubernetes.io/POD", "docker/default")],
        None
    )]
    fn seccomp_builtin_profiles(#[case] pairs: &[(&str, &str)], #[case] expected: Option<&str>) {
        let root = TempDir::new().unwrap();
        let opts = seccomp_options(&annotations(pairs), "POD", root.path()).unwrap();
        assert_eq!(
            opts.first().map(|(_, v)| v.as_str()),
            expected
        );
    }

    #[test]
    fn seccomp_localhost_profile_is_compacted() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("profiles")).unwrap();
        std::fs::write(
            root.path().join("profiles/audit.json"),
            "{\n  \"defaultAction\": \"SCMP_ACT_LOG\"\n}\n",
        )
        .unwrap();
        let opts = seccomp_options(
            &annotations(&[(SECCOMP_POD_ANNOTATION, "localhost/profiles/audit.json")]),
            "POD",
            root.path(),
        )
        .unwrap();
        assert_eq!(opts, vec![(
            "seccomp".to_string(),
            r#"{"defaultAction":"SCMP_ACT_LOG"}"#.to_string()
        )]);
    }

    #[rstest]
    #[case("runtime/default-ish")]
    #[case("localhost/missing.json")]
    #[case("localhost/../escape.json")]
    fn seccomp_rejects_bad_profiles(#[case] profile: &str) {
        let root = TempDir::new().unwrap();
        assert!(
            seccomp_options(
                &annotations(&[(SECCOMP_POD_ANNOTATION, profile)]),
                "POD",
                root.path()
            )
            .is_err()
        );
    }

    #[rstest]
    #[case(None, None)]
    #[case(Some("runtime/default"), None)]
    #[case(Some("unconfined"), Some("unconfined"))]
    #[case(Some("localhost/k8s-nginx"), Some("k8s-nginx"))]
    fn apparmor_profiles(#[case] profile: Option<&str>, #[case] expected: Option<&str>) {
        let opts = apparmor_options(profile).unwrap();
        assert_eq!(opts.first().map(|(_, v)| v.as_str()), expected);
    }

    #[test]
    fn apparmor_rejects_unknown() {
        assert!(apparmor_options(Some("enforce-all")).is_err());
        assert!(apparmor_options(Some("localhost/")).is_err());
    }
}
