/// Origin policy: browsers may only call the proxy from LAN hosts.

use std::net::Ipv4Addr;

/// Returns true for origins whose host is `localhost` or a private IPv4
/// address (127/8, 10/8, 172.16/12, 192.168/16).
pub fn is_allowed_origin(origin: &str) -> bool {
    let Some((_, rest)) = origin.split_once("://") else {
        return false;
    };
    let authority = rest.split('/').next().unwrap_or_default();
    let host = match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => authority,
    };

    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }

    match host.parse::<Ipv4Addr>() {
        Ok(ip) => ip.is_loopback() || ip.is_private(),
        Err(_) => false,
    }
}
