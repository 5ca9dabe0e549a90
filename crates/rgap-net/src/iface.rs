//! Interface-spec resolution: `@iface` suffixes on bind/destination specs
//! resolve either to an exact interface name or to the unique interface
//! whose address falls inside a given CIDR prefix.

use std::net::IpAddr;

use anyhow::{anyhow, bail, Result};

/// One interface's name and address, as reported by the OS.
#[derive(Debug, Clone)]
pub struct InterfaceAddr {
    pub name: String,
    pub address: IpAddr,
    pub index: u32,
}

/// Resolve an interface spec (name or CIDR) to one of the host's interface
/// addresses. Errors if nothing matches, or if a CIDR matches more than one
/// interface.
pub fn resolve(spec: &str) -> Result<InterfaceAddr> {
    let all = list_interfaces()?;

    if let Some(addr) = all.iter().find(|i| i.name == spec) {
        return Ok(addr.clone());
    }

    if let Ok((network, prefix_len)) = parse_cidr(spec) {
        let matches: Vec<&InterfaceAddr> = all
            .iter()
            .filter(|i| address_in_prefix(i.address, network, prefix_len))
            .collect();
        return match matches.as_slice() {
            [single] => Ok((*single).clone()),
            [] => Err(anyhow!("no interface address falls inside {spec}")),
            _ => Err(anyhow!("{spec} matches more than one interface address")),
        };
    }

    Err(anyhow!("'{spec}' is neither a known interface name nor a CIDR prefix"))
}

/// Get the OS interface index for a named interface.
pub fn if_index(name: &str) -> Result<u32> {
    let name_cstr = std::ffi::CString::new(name).map_err(|_| anyhow!("interface name contains a null byte"))?;
    let index = unsafe { libc::if_nametoindex(name_cstr.as_ptr()) };
    if index == 0 {
        bail!("interface '{name}' not found");
    }
    Ok(index)
}

fn parse_cidr(spec: &str) -> Result<(IpAddr, u8)> {
    let (addr, len) = spec.split_once('/').ok_or_else(|| anyhow!("not a CIDR"))?;
    let network: IpAddr = addr.parse()?;
    let prefix_len: u8 = len.parse()?;
    Ok((network, prefix_len))
}

fn address_in_prefix(addr: IpAddr, network: IpAddr, prefix_len: u8) -> bool {
    match (addr, network) {
        (IpAddr::V4(a), IpAddr::V4(n)) => {
            let mask = if prefix_len == 0 { 0 } else { u32::MAX << (32 - prefix_len) };
            (u32::from(a) & mask) == (u32::from(n) & mask)
        }
        (IpAddr::V6(a), IpAddr::V6(n)) => {
            let mask: u128 = if prefix_len == 0 { 0 } else { u128::MAX << (128 - prefix_len) };
            (u128::from(a) & mask) == (u128::from(n) & mask)
        }
        _ => false,
    }
}

/// Enumerate every interface address on the host via `getifaddrs(3)`.
fn list_interfaces() -> Result<Vec<InterfaceAddr>> {
    let mut head: *mut libc::ifaddrs = std::ptr::null_mut();
    if unsafe { libc::getifaddrs(&mut head) } != 0 {
        bail!("getifaddrs() failed: {}", std::io::Error::last_os_error());
    }

    let mut out = Vec::new();
    let mut cursor = head;
    while !cursor.is_null() {
        let entry = unsafe { &*cursor };
        if !entry.ifa_addr.is_null() {
            if let Some(addr) = unsafe { sockaddr_to_ip(entry.ifa_addr) } {
                let name = unsafe { std::ffi::CStr::from_ptr(entry.ifa_name) }
                    .to_string_lossy()
                    .into_owned();
                let index = if_index(&name).unwrap_or(0);
                out.push(InterfaceAddr { name, address: addr, index });
            }
        }
        cursor = entry.ifa_next;
    }

    unsafe { libc::freeifaddrs(head) };
    Ok(out)
}

unsafe fn sockaddr_to_ip(sa: *const libc::sockaddr) -> Option<IpAddr> {
    match (*sa).sa_family as i32 {
        libc::AF_INET => {
            let sin = &*(sa as *const libc::sockaddr_in);
            Some(IpAddr::V4(std::net::Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr))))
        }
        libc::AF_INET6 => {
            let sin6 = &*(sa as *const libc::sockaddr_in6);
            Some(IpAddr::V6(std::net::Ipv6Addr::from(sin6.sin6_addr.s6_addr)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cidr_v4_match() {
        let a: IpAddr = "192.0.2.17".parse().unwrap();
        let n: IpAddr = "192.0.2.0".parse().unwrap();
        assert!(address_in_prefix(a, n, 24));
        let outside: IpAddr = "192.0.3.17".parse().unwrap();
        assert!(!address_in_prefix(outside, n, 24));
    }

    #[test]
    fn cidr_v6_match() {
        let a: IpAddr = "2001:db8::1".parse().unwrap();
        let n: IpAddr = "2001:db8::".parse().unwrap();
        assert!(address_in_prefix(a, n, 32));
    }

    #[test]
    fn loopback_is_resolvable_by_name_on_linux() {
        // `lo` is present in virtually every Linux network namespace.
        if let Ok(resolved) = resolve("lo") {
            assert_eq!(resolved.name, "lo");
        }
    }
}
