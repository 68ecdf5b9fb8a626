//! Encoding of sandbox identity into backend container names.
//!
//! Current format: `k8s_POD_<name>_<namespace>_<uid>_<attempt>`, optionally
//! followed by a random `_<hex>` suffix appended during conflict recovery.
//!
//! Legacy format: `k8s_POD.<hash>_<name>_<namespace>_<uid>_<random>`, with the
//! attempt stored in the restart-count label.

use crate::{
    error::{Error, Result},
    labels::{
        ANNOTATION_PREFIX, CONTAINER_TYPE_LABEL_CONTAINER, CONTAINER_TYPE_LABEL_KEY,
        CONTAINER_TYPE_LABEL_SANDBOX, LEGACY_CONTAINER_ATTEMPT_LABEL, LEGACY_ONLY_LABELS,
    },
    types::{Labels, SandboxMetadata},
};

pub const KUBE_PREFIX: &str = "k8s";
pub const SANDBOX_CONTAINER_NAME: &str = "POD";
pub const NAME_DELIMITER: char = '_';

const LEGACY_HASH_DELIMITER: char = '.';

#[must_use]
pub fn make_sandbox_name(metadata: &SandboxMetadata) -> String {
    [
        KUBE_PREFIX,
        SANDBOX_CONTAINER_NAME,
        &metadata.name,
        &metadata.namespace,
        &metadata.uid,
        &metadata.attempt.to_string(),
    ]
    .join("_")
}

/// Decode a current-format sandbox name.
///
/// Fails with [`Error::InvalidName`] for anything else, including legacy names.
pub fn parse_sandbox_name(name: &str) -> Result<SandboxMetadata> {
    let trimmed = name.strip_prefix('/').unwrap_or(name);
    let parts: Vec<&str> = trimmed.split(NAME_DELIMITER).collect();
    if parts.len() != 6 && parts.len() != 7 {
        return Err(Error::invalid_name(
            name,
            format!("expected 6 or 7 fields, found {}", parts.len()),
        ));
    }
    if parts[0] != KUBE_PREFIX {
        return Err(Error::invalid_name(name, "not a managed container"));
    }
    let attempt = parts[5]
        .parse::<u32>()
        .map_err(|e| Error::invalid_name(name, format!("bad attempt {:?}: {e}", parts[5])))?;
    Ok(SandboxMetadata {
        name: parts[2].to_string(),
        namespace: parts[3].to_string(),
        uid: parts[4].to_string(),
        attempt,
    })
}

/// Append a random suffix so a retried create cannot collide again.
#[must_use]
pub fn randomize_name(name: &str) -> String {
    format!("{name}{NAME_DELIMITER}{:08x}", rand::random::<u32>())
}

/// Fields of a name written by the previous shim generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyName {
    /// Container name with the `.<hash>` suffix removed.
    pub container_name: String,
    pub pod_name: String,
    pub namespace: String,
    pub uid: String,
}

pub fn parse_legacy_name(name: &str) -> Result<LegacyName> {
    let trimmed = name.strip_prefix('/').unwrap_or(name);
    let parts: Vec<&str> = trimmed.split(NAME_DELIMITER).collect();
    if parts.len() < 6 || parts[0] != KUBE_PREFIX {
        return Err(Error::invalid_name(name, "not a legacy managed name"));
    }
    let container_name = parts[1]
        .split_once(LEGACY_HASH_DELIMITER)
        .map_or(parts[1], |(container, _hash)| container);
    if container_name.is_empty() || parts[2].is_empty() || parts[3].is_empty() {
        return Err(Error::invalid_name(name, "empty legacy name field"));
    }
    Ok(LegacyName {
        container_name: container_name.to_string(),
        pod_name: parts[2].to_string(),
        namespace: parts[3].to_string(),
        uid: parts[4].to_string(),
    })
}

/// Rewrite a legacy record's names and labels into the current form.
///
/// Legacy-only labels move under the annotation prefix and the type label
/// is stamped on. A missing restart count is treated as attempt `0`.
pub fn convert_legacy_name_and_labels(
    names: &[String],
    labels: &Labels,
) -> Result<(Vec<String>, Labels)> {
    let first = names
        .first()
        .ok_or_else(|| Error::invalid_name("", "record has no name"))?;
    let legacy = parse_legacy_name(first)?;
    let attempt = labels
        .get(LEGACY_CONTAINER_ATTEMPT_LABEL)
        .map(String::as_str)
        .unwrap_or("0");

    let new_name = [
        KUBE_PREFIX,
        &legacy.container_name,
        &legacy.pod_name,
        &legacy.namespace,
        &legacy.uid,
        attempt,
    ]
    .join("_");

    let mut new_labels = Labels::new();
    for (k, v) in labels {
        if LEGACY_ONLY_LABELS.contains(&k.as_str()) {
            new_labels.insert(format!("{ANNOTATION_PREFIX}{k}"), v.clone());
        } else {
            new_labels.insert(k.clone(), v.clone());
        }
    }
    let kind = if legacy.container_name == SANDBOX_CONTAINER_NAME {
        CONTAINER_TYPE_LABEL_SANDBOX
    } else {
        CONTAINER_TYPE_LABEL_CONTAINER
    };
    new_labels.insert(CONTAINER_TYPE_LABEL_KEY.to_string(), kind.to_string());

    Ok((vec![new_name], new_labels))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(SandboxMetadata::new("web", "default", "8d9f-1a2b", 0))]
    #[case(SandboxMetadata::new("db-0", "kube-system", "x", 3))]
    #[case(SandboxMetadata::new("a.b", "ns", "uid", u32::MAX))]
    fn name_round_trips(#[case] metadata: SandboxMetadata) {
        let name = make_sandbox_name(&metadata);
        assert_eq!(parse_sandbox_name(&name).unwrap(), metadata);
        assert_eq!(parse_sandbox_name(&format!("/{name}")).unwrap(), metadata);
    }

    #[test]
    fn encodes_fields_in_order() {
        let name = make_sandbox_name(&SandboxMetadata::new("web", "default", "u1", 2));
        assert_eq!(name, "k8s_POD_web_default_u1_2");
    }

    #[test]
    fn tolerates_random_suffix() {
        let metadata = SandboxMetadata::new("web", "default", "u1", 1);
        let name = randomize_name(&make_sandbox_name(&metadata));
        assert_eq!(name.split('_').count(), 7);
        assert_eq!(parse_sandbox_name(&name).unwrap(), metadata);
    }

    #[rstest]
    #[case("k8s_POD_web_default_u1")]
    #[case("docker_POD_web_default_u1_0")]
    #[case("k8s_POD_web_default_u1_x")]
    #[case("k8s_POD.1a2b_web_default_u1_abcd1234")]
    #[case("")]
    fn rejects_malformed(#[case] name: &str) {
        assert!(matches!(
            parse_sandbox_name(name),
            Err(Error::InvalidName { .. })
        ));
    }

    #[test]
    fn parses_legacy_name() {
        let legacy = parse_legacy_name("/k8s_POD.1a2b3c_web_default_u1_5e6f7a8b").unwrap();
        assert_eq!(legacy.container_name, "POD");
        assert_eq!(legacy.pod_name, "web");
        assert_eq!(legacy.namespace, "default");
        assert_eq!(legacy.uid, "u1");

        let unhashed = parse_legacy_name("k8s_POD_web_default_u1_5e6f7a8b").unwrap();
        assert_eq!(unhashed, legacy);
    }

    #[test]
    fn converts_legacy_sandbox() {
        let labels: Labels = [
            (LEGACY_CONTAINER_ATTEMPT_LABEL, "4"),
            ("io.kubernetes.container.hash", "1a2b3c"),
            ("io.kubernetes.pod.name", "web"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let (names, new_labels) = convert_legacy_name_and_labels(
            &["/k8s_POD.1a2b3c_web_default_u1_5e6f7a8b".to_string()],
            &labels,
        )
        .unwrap();

        assert_eq!(names, vec!["k8s_POD_web_default_u1_4".to_string()]);
        assert_eq!(
            parse_sandbox_name(&names[0]).unwrap(),
            SandboxMetadata::new("web", "default", "u1", 4)
        );
        assert_eq!(
            new_labels.get(CONTAINER_TYPE_LABEL_KEY).map(String::as_str),
            Some(CONTAINER_TYPE_LABEL_SANDBOX)
        );
        assert!(new_labels.contains_key("annotation.io.kubernetes.container.hash"));
        assert!(!new_labels.contains_key("io.kubernetes.container.hash"));
        assert_eq!(
            new_labels.get("io.kubernetes.pod.name").map(String::as_str),
            Some("web")
        );
    }

    #[test]
    fn legacy_workload_container_is_typed_container() {
        let (names, labels) = convert_legacy_name_and_labels(
            &["k8s_nginx.aa11_web_default_u1_5e6f7a8b".to_string()],
            &Labels::new(),
        )
        .unwrap();
        assert_eq!(names[0], "k8s_nginx_web_default_u1_0");
        assert_eq!(
            labels.get(CONTAINER_TYPE_LABEL_KEY).map(String::as_str),
            Some(CONTAINER_TYPE_LABEL_CONTAINER)
        );
    }

    #[test]
    fn legacy_conversion_needs_a_name() {
        assert!(convert_legacy_name_and_labels(&[], &Labels::new()).is_err());
        assert!(
            convert_legacy_name_and_labels(&["random-container".into()], &Labels::new()).is_err()
        );
    }
}
