//! Plain-text config loading: one interface or route per line,
//! whitespace-separated fields. Hand-rolled rather than `serde`-backed,
//! matching the original `sr` framework's own file formats (not a
//! structured serialization format to begin with).

use crate::error::{RouterError, RouterResult};
use crate::rtable::{RouteEntry, RoutingTable};
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct Interface {
    pub name: String,
    pub ip: u32,
    pub mac: [u8; 6],
}

#[derive(Debug, Default)]
pub struct Interfaces {
    list: Vec<Interface>,
}

impl Interfaces {
    pub fn by_name(&self, name: &str) -> Option<&Interface> {
        self.list.iter().find(|i| i.name == name)
    }

    pub fn by_ip(&self, ip: u32) -> Option<&Interface> {
        self.list.iter().find(|i| i.ip == ip)
    }

    pub fn contains_ip(&self, ip: u32) -> bool {
        self.by_ip(ip).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.list.iter()
    }
}

fn parse_ipv4(field: &str, line_no: usize, line: &str) -> RouterResult<u32> {
    field
        .parse::<Ipv4Addr>()
        .map(|a| u32::from_be_bytes(a.octets()))
        .map_err(|_| RouterError::BadConfigLine(line_no, line.to_string()))
}

fn parse_mac(field: &str, line_no: usize, line: &str) -> RouterResult<[u8; 6]> {
    let mut mac = [0u8; 6];
    let parts: Vec<&str> = field.split(':').collect();
    if parts.len() != 6 {
        return Err(RouterError::BadConfigLine(line_no, line.to_string()));
    }
    for (i, part) in parts.iter().enumerate() {
        mac[i] = u8::from_str_radix(part, 16)
            .map_err(|_| RouterError::BadConfigLine(line_no, line.to_string()))?;
    }
    Ok(mac)
}

/// Each line: `<name> <ip> <mac>`, e.g. `eth0 10.0.1.1 00:00:00:00:00:01`.
pub fn load_interfaces(path: impl AsRef<Path>) -> RouterResult<Interfaces> {
    let text = fs::read_to_string(path)?;
    let mut list = Vec::new();
    for (idx, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 {
            return Err(RouterError::BadConfigLine(idx + 1, line.to_string()));
        }
        list.push(Interface {
            name: fields[0].to_string(),
            ip: parse_ipv4(fields[1], idx + 1, line)?,
            mac: parse_mac(fields[2], idx + 1, line)?,
        });
    }
    Ok(Interfaces { list })
}

/// Each line: `<dest> <gateway> <mask> <iface>`, e.g.
/// `192.168.2.2 0.0.0.0 255.255.255.255 eth1`.
pub fn load_routing_table(path: impl AsRef<Path>) -> RouterResult<RoutingTable> {
    let text = fs::read_to_string(path)?;
    let mut table = RoutingTable::new();
    for (idx, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 4 {
            return Err(RouterError::BadConfigLine(idx + 1, line.to_string()));
        }
        table.push(RouteEntry {
            dest: parse_ipv4(fields[0], idx + 1, line)?,
            gateway: parse_ipv4(fields[1], idx + 1, line)?,
            mask: parse_ipv4(fields[2], idx + 1, line)?,
            interface: fields[3].to_string(),
        });
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_interfaces_file() {
        let file = write_temp("eth0 10.0.1.1 00:00:00:00:00:01\n# comment\neth1 10.0.2.1 00:00:00:00:00:02\n");
        let interfaces = load_interfaces(file.path()).unwrap();
        assert!(interfaces.by_name("eth0").is_some());
        assert!(interfaces.by_name("eth1").is_some());
        assert!(interfaces.by_name("eth2").is_none());
    }

    #[test]
    fn parses_routing_table_file() {
        let file = write_temp("192.168.2.2 0.0.0.0 255.255.255.255 eth1\n");
        let table = load_routing_table(file.path()).unwrap();
        let dst = u32::from_be_bytes("192.168.2.2".parse::<Ipv4Addr>().unwrap().octets());
        assert!(table.lookup(dst).is_some());
    }

    #[test]
    fn rejects_malformed_line() {
        let file = write_temp("not enough fields\n");
        assert!(load_interfaces(file.path()).is_err());
    }
}
