//! Label keys and the label/annotation folding used on backend records.
//!
//! The backend only knows labels, so annotations are stored as labels under
//! [`ANNOTATION_PREFIX`] and split back out on the way in.

use crate::types::Labels;

/// Marks a backend record as sandbox or container. Records without it were
/// created by the previous shim generation.
pub const CONTAINER_TYPE_LABEL_KEY: &str = "io.kubernetes.docker.type";
pub const CONTAINER_TYPE_LABEL_SANDBOX: &str = "podsandbox";
pub const CONTAINER_TYPE_LABEL_CONTAINER: &str = "container";
pub const CONTAINER_LOG_PATH_LABEL_KEY: &str = "io.kubernetes.container.logpath";
pub const SANDBOX_ID_LABEL_KEY: &str = "io.kubernetes.sandbox.id";
pub const CONTAINER_NAME_LABEL_KEY: &str = "io.kubernetes.container.name";

pub const ANNOTATION_PREFIX: &str = "annotation.";

/// Labels the previous shim generation wrote that are annotations today.
pub const LEGACY_CONTAINER_HASH_LABEL: &str = "io.kubernetes.container.hash";
pub const LEGACY_CONTAINER_ATTEMPT_LABEL: &str = "io.kubernetes.container.restartCount";
pub const LEGACY_ONLY_LABELS: &[&str] = &[
    LEGACY_CONTAINER_HASH_LABEL,
    LEGACY_CONTAINER_ATTEMPT_LABEL,
    "io.kubernetes.container.terminationMessagePath",
    "io.kubernetes.container.preStopHandler",
    "io.kubernetes.container.ports",
];

const INTERNAL_LABEL_KEYS: &[&str] = &[
    CONTAINER_TYPE_LABEL_KEY,
    CONTAINER_LOG_PATH_LABEL_KEY,
    SANDBOX_ID_LABEL_KEY,
];

/// Merge caller labels and annotations into one backend label map.
///
/// Annotations are prefixed, so a label and an annotation with the same key
/// never collide.
#[must_use]
pub fn make_labels(labels: &Labels, annotations: &Labels) -> Labels {
    let mut merged = labels.clone();
    for (k, v) in annotations {
        merged.insert(format!("{ANNOTATION_PREFIX}{k}"), v.clone());
    }
    merged
}

/// Split backend labels back into `(labels, annotations)`, dropping the keys
/// this crate stamps on for its own bookkeeping.
#[must_use]
pub fn extract_labels(all: &Labels) -> (Labels, Labels) {
    let mut labels = Labels::new();
    let mut annotations = Labels::new();
    for (k, v) in all {
        if INTERNAL_LABEL_KEYS.contains(&k.as_str()) {
            continue;
        }
        match k.strip_prefix(ANNOTATION_PREFIX) {
            Some(key) => {
                annotations.insert(key.to_string(), v.clone());
            },
            None => {
                labels.insert(k.clone(), v.clone());
            },
        }
    }
    (labels, annotations)
}

/// Same as [`extract_labels`], also dropping the container-name label that
/// every sandbox record carries.
#[must_use]
pub fn extract_sandbox_labels(all: &Labels) -> (Labels, Labels) {
    let (mut labels, annotations) = extract_labels(all);
    labels.remove(CONTAINER_NAME_LABEL_KEY);
    (labels, annotations)
}

/// A record without the type label predates structured labelling.
#[must_use]
pub fn is_legacy(labels: &Labels) -> bool {
    !labels.contains_key(CONTAINER_TYPE_LABEL_KEY)
}

#[must_use]
pub fn is_sandbox(labels: &Labels) -> bool {
    labels.get(CONTAINER_TYPE_LABEL_KEY).map(String::as_str) == Some(CONTAINER_TYPE_LABEL_SANDBOX)
}

/// Conjunctive exact match of `selector` against `labels`.
#[must_use]
pub fn matches_selector(labels: &Labels, selector: &Labels) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}
