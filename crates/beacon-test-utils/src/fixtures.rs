//! Test fixtures: interfaces, addresses, records and hosts files.

use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use beacon_core::record::DEFAULT_TTL_HOST_NAME;
use beacon_core::{InterfaceSpec, Protocol, Record};
use tempfile::NamedTempFile;

/// IPv4 interface `eth<index>`.
pub fn eth(index: u32) -> InterfaceSpec {
    InterfaceSpec::new(index, format!("eth{index}"), Protocol::Inet)
}

/// IPv6 interface `eth<index>`.
pub fn eth6(index: u32) -> InterfaceSpec {
    InterfaceSpec::new(index, format!("eth{index}"), Protocol::Inet6)
}

/// `192.168.1.<n>`
pub fn v4(n: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(192, 168, 1, n))
}

/// `fd00::<n>`
pub fn v6(n: u16) -> IpAddr {
    IpAddr::V6(Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, n))
}

/// An A record for `name` pointing at `192.168.1.<n>`.
pub fn host_record(name: &str, n: u8) -> Record {
    Record::address(name, v4(n), DEFAULT_TTL_HOST_NAME)
}

/// A temporary hosts file with the given contents.
pub fn hosts_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}
