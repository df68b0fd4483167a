//! Local-address handling for tunnel command lines.
//!
//! Registry records and tunnel command lines spell the same local service
//! differently (`http://localhost:3000/`, `localhost:3000`, `LOCALHOST:3000`).
//! Everything compares on the normalized `host:port` form.

/// Flag carrying the local address on a tunnel command line.
const URL_FLAG: &str = "--url";

/// Reduce an address to lowercase `host:port`.
///
/// Strips a `scheme://` prefix and anything from the first `/` after it.
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    let without_scheme = match trimmed.find("://") {
        Some(idx) => &trimmed[idx + 3..],
        None => trimmed,
    };
    let host_port = without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme);
    host_port.to_lowercase()
}

/// Port component of an address, if any.
pub fn port_of(address: &str) -> Option<u16> {
    let normalized = normalize_address(address);
    let (_, port) = normalized.rsplit_once(':')?;
    port.parse().ok()
}

/// Value of `flag` on a command line, as `--flag VALUE` or `--flag=VALUE`.
pub fn flag_value<'a>(command: &'a str, flag: &str) -> Option<&'a str> {
    let mut words = command.split_whitespace();
    while let Some(word) = words.next() {
        if word == flag {
            return words.next();
        }
        if let Some(value) = word.strip_prefix(flag).and_then(|w| w.strip_prefix('=')) {
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

/// The value passed to `--url` on a tunnel command line.
pub fn extract_local_address(command: &str) -> Option<String> {
    flag_value(command, URL_FLAG).map(str::to_string)
}

/// Whether the tunnel on `command` exposes exactly `address`.
///
/// Substring containment alone is not enough: `localhost:3000` is a
/// substring of `localhost:30001`.
pub fn exposes_address(command: &str, address: &str) -> bool {
    let wanted = normalize_address(address);
    if wanted.is_empty() || !command.to_lowercase().contains(&wanted) {
        return false;
    }
    extract_local_address(command)
        .map(|found| normalize_address(&found) == wanted)
        .unwrap_or(false)
}
