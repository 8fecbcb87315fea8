//! Input validation utilities

use once_cell::sync::Lazy;
use regex::Regex;

/// Kubernetes object names (RFC 1123 subdomain)
static OBJECT_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap()
});

/// Label keys, with optional prefix
static LABEL_KEY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*/)?[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$").unwrap()
});

/// Validate a task name
pub fn validate_task_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= 253 && OBJECT_NAME_REGEX.is_match(name)
}

/// Validate a node (host) name
pub fn validate_node_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= 253 && OBJECT_NAME_REGEX.is_match(name)
}

/// Validate a label key
pub fn validate_label_key(key: &str) -> bool {
    !key.is_empty() && key.len() <= 317 && LABEL_KEY_REGEX.is_match(key)
}

/// Validate a device reference from a cleanup request.
///
/// Accepts a short name (`sdb`), a full path (`/dev/sdb`) or a symlink
/// (`/dev/disk/by-path/...`).
pub fn validate_device_name(device: &str) -> bool {
    if device.is_empty() || device.len() > 4096 {
        return false;
    }
    if device.chars().any(|c| c.is_whitespace()) {
        return false;
    }
    let stripped = device.strip_prefix('/').unwrap_or(device);
    stripped.split('/').all(|part| !part.is_empty() && part != "..")
}
