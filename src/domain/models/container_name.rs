//! Container-name formats, parseable both ways.
//!
//! Two forms appear on the wire:
//! - `<pgname>.<namespace>.<instance>.<suffix>` on containers the engine
//!   creates; die events are routed by parsing this form.
//! - `<podname>-<instance>`, the alternate form seen on health events.

/// Render the canonical dotted container name for a pod-group instance.
pub fn render_container_name(pg_name: &str, namespace: &str, instance: usize, suffix: &str) -> String {
    format!("{pg_name}.{namespace}.{instance}.{suffix}")
}

/// Parse `<pgname>.<namespace>.<instance>.<suffix>`.
///
/// Returns `(pg_name, namespace, instance, suffix)`, or `None` for
/// anything that does not match; unknown names are the caller's warning,
/// never an error.
pub fn parse_container_name(name: &str) -> Option<(String, String, usize, String)> {
    let name = name.trim_start_matches('/');
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() != 4 {
        return None;
    }
    let instance: usize = parts[2].parse().ok()?;
    if instance == 0 || parts[0].is_empty() || parts[1].is_empty() {
        return None;
    }
    Some((
        parts[0].to_string(),
        parts[1].to_string(),
        instance,
        parts[3].to_string(),
    ))
}

/// Render the alternate `<podname>-<instance>` form.
pub fn render_name_instance(pod_name: &str, instance: usize) -> String {
    format!("{pod_name}-{instance}")
}

/// Parse `<podname>-<instance>`. The pod name itself may contain dashes;
/// the instance number is everything after the last one.
pub fn parse_name_instance(name: &str) -> Option<(String, usize)> {
    let name = name.trim_start_matches('/');
    let idx = name.rfind('-')?;
    let (pod_name, rest) = name.split_at(idx);
    let instance: usize = rest[1..].parse().ok()?;
    if instance == 0 || pod_name.is_empty() {
        return None;
    }
    Some((pod_name.to_string(), instance))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dotted_name() {
        let (pg, ns, instance, suffix) = parse_container_name("web.prod.1.abc").unwrap();
        assert_eq!(pg, "web");
        assert_eq!(ns, "prod");
        assert_eq!(instance, 1);
        assert_eq!(suffix, "abc");
    }

    #[test]
    fn test_parse_dotted_name_strips_leading_slash() {
        assert!(parse_container_name("/web.prod.2.xyz").is_some());
    }

    #[test]
    fn test_parse_dotted_name_rejects_malformed() {
        assert!(parse_container_name("web.prod.1").is_none());
        assert!(parse_container_name("web.prod.zero.abc").is_none());
        assert!(parse_container_name("web.prod.0.abc").is_none());
        assert!(parse_container_name("plain-name").is_none());
    }

    #[test]
    fn test_name_instance_round_trip() {
        let name = render_name_instance("hello-world", 3);
        assert_eq!(parse_name_instance(&name).unwrap(), ("hello-world".to_string(), 3));
    }

    #[test]
    fn test_name_instance_rejects_malformed() {
        assert!(parse_name_instance("noinstance").is_none());
        assert!(parse_name_instance("web-").is_none());
        assert!(parse_name_instance("-1").is_none());
    }
}
