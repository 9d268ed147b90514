//! Utility functions for txgate

/// `host:port`, with IPv6 hosts in brackets.
pub fn make_address(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Host part of a `host:port` replication address.
pub fn host_part(address: &str) -> &str {
    if let Some(rest) = address.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match address.rsplit_once(':') {
        Some((host, _)) => host,
        None => address,
    }
}

/// Replication addresses of all nodes preceding `node` in `nodes`.
///
/// With node="n2" and nodes=["n1", "n2", "n3"] this is ["n1:8081"].
pub fn preceding_addresses(node: &str, nodes: &[String], port: u16) -> Vec<String> {
    match nodes.iter().position(|name| name == node) {
        Some(i) => nodes[..i]
            .iter()
            .map(|name| make_address(name, port))
            .collect(),
        None => Vec::new(),
    }
}

/// Replication addresses of all nodes other than `node`.
pub fn other_addresses(node: &str, nodes: &[String], port: u16) -> Vec<String> {
    nodes
        .iter()
        .filter(|name| name.as_str() != node)
        .map(|name| make_address(name, port))
        .collect()
}

/// Parse duration string (e.g., "200ms", "30s", "5m", "1h")
pub fn parse_duration(s: &str) -> crate::Result<std::time::Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(crate::Error::InvalidConfig("empty duration".into()));
    }

    let (num_str, unit) = if let Some(num) = s.strip_suffix("ms") {
        (num, "ms")
    } else {
        let split = s.len() - s.chars().last().map(char::len_utf8).unwrap_or(0);
        (&s[..split], &s[split..])
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| crate::Error::InvalidConfig(format!("invalid duration: {}", s)))?;

    let duration = match unit {
        "ms" => std::time::Duration::from_millis(num),
        "s" => std::time::Duration::from_secs(num),
        "m" => std::time::Duration::from_secs(num * 60),
        "h" => std::time::Duration::from_secs(num * 3600),
        _ => {
            return Err(crate::Error::InvalidConfig(format!(
                "unknown duration unit: {}",
                unit
            )))
        }
    };

    Ok(duration)
}
