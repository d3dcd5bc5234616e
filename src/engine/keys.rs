//! Store key layout.
//!
//! Everything the engine persists lives under one root directory so a
//! peer (or an operator with an etcd browser) sees a single tree.

pub const ROOT: &str = "/lain/deployd";

pub fn depends_spec_dir() -> String {
    format!("{ROOT}/dependency/spec")
}

pub fn depends_spec(name: &str) -> String {
    format!("{ROOT}/dependency/spec/{name}")
}

pub fn depends_pods(name: &str) -> String {
    format!("{ROOT}/dependency/pod/{name}")
}

pub fn pod_group_dir() -> String {
    format!("{ROOT}/podgroup")
}

pub fn pod_group_namespace(namespace: &str) -> String {
    format!("{ROOT}/podgroup/{namespace}")
}

pub fn pod_group(namespace: &str, name: &str) -> String {
    format!("{ROOT}/podgroup/{namespace}/{name}")
}

pub fn constraint_dir() -> String {
    format!("{ROOT}/constraint")
}

pub fn constraint(constraint_type: &str) -> String {
    format!("{ROOT}/constraint/{constraint_type}")
}

pub fn notify_dir() -> String {
    format!("{ROOT}/notify")
}

pub fn notify(callback: &str) -> String {
    format!("{ROOT}/notify/{}", sanitize(callback))
}

pub fn pod_history(pg_name: &str, instance: usize) -> String {
    format!("{ROOT}/history/{pg_name}/{instance}")
}

pub fn pod_history_dir(pg_name: &str) -> String {
    format!("{ROOT}/history/{pg_name}")
}

pub fn port(port: u16) -> String {
    format!("{ROOT}/ports/{port}")
}

pub fn guard() -> String {
    format!("{ROOT}/guard")
}

pub fn engine_config() -> String {
    format!("{ROOT}/config")
}

/// Callbacks are URLs; collapse anything that would nest in the key tree.
fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_key_is_flat() {
        let key = notify("http://alerts.example.com/hook");
        assert!(!key[ROOT.len() + "/notify/".len()..].contains('/'));
    }

    #[test]
    fn test_pod_group_key_shape() {
        assert_eq!(pod_group("prod", "web"), "/lain/deployd/podgroup/prod/web");
    }
}
