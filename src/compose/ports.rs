//! Port publish string parsing
//!
//! Accepts `[ip:][host:]container[/proto]`, where host and container may be
//! ranges (`8000-8002:80-82`). Container ranges expand to one mapping per
//! port.

use crate::container::{PortBinding, Protocol};
use crate::error::{CorralError, Result};
use regex::Regex;
use std::sync::OnceLock;

/// One container port and how it is published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    /// Port inside the container
    pub container_port: u16,
    /// Transport protocol
    pub protocol: Protocol,
    /// Host side of the binding
    pub binding: PortBinding,
}

impl PortMapping {
    /// Runtime key, e.g. `80/tcp`
    pub fn key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

fn port_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?:(?P<ip>\[[0-9A-Fa-f:.]+\]|\d{1,3}(?:\.\d{1,3}){3}):)?(?:(?P<host>\d*(?:-\d+)?):)?(?P<container>\d+(?:-\d+)?)(?:/(?P<proto>[A-Za-z]+))?$",
        )
        .expect("port pattern is valid")
    })
}

fn parse_error(spec: &str, reason: impl Into<String>) -> CorralError {
    CorralError::PortParse {
        spec: spec.to_string(),
        reason: reason.into(),
    }
}

fn parse_port(spec: &str, value: &str) -> Result<u16> {
    let port: u32 = value
        .parse()
        .map_err(|_| parse_error(spec, format!("invalid port '{}'", value)))?;
    if port == 0 || port > u16::MAX as u32 {
        return Err(parse_error(spec, format!("port {} out of range", port)));
    }
    Ok(port as u16)
}

fn parse_range(spec: &str, value: &str) -> Result<(u16, u16)> {
    match value.split_once('-') {
        Some((start, end)) => {
            let start = parse_port(spec, start)?;
            let end = parse_port(spec, end)?;
            if end < start {
                return Err(parse_error(spec, format!("invalid range '{}'", value)));
            }
            Ok((start, end))
        }
        None => {
            let port = parse_port(spec, value)?;
            Ok((port, port))
        }
    }
}

fn parse_protocol(spec: &str, value: Option<&str>) -> Result<Protocol> {
    match value.map(|p| p.to_ascii_lowercase()).as_deref() {
        None | Some("tcp") => Ok(Protocol::Tcp),
        Some("udp") => Ok(Protocol::Udp),
        Some("sctp") => Ok(Protocol::Sctp),
        Some(other) => Err(parse_error(spec, format!("unknown protocol '{}'", other))),
    }
}

/// Parse one publish string into its port mappings
pub fn parse_port_spec(spec: &str) -> Result<Vec<PortMapping>> {
    let caps = port_pattern()
        .captures(spec.trim())
        .ok_or_else(|| parse_error(spec, "expected [ip:][host:]container[/proto]"))?;

    let protocol = parse_protocol(spec, caps.name("proto").map(|m| m.as_str()))?;
    let host_ip = caps
        .name("ip")
        .map(|m| m.as_str().trim_matches(|c| c == '[' || c == ']').to_string());
    let (start, end) = parse_range(spec, &caps["container"])?;
    let host = caps
        .name("host")
        .map(|m| m.as_str())
        .filter(|h| !h.is_empty())
        .map(|h| parse_range(spec, h))
        .transpose()?;

    let container_count = (end - start) as usize + 1;
    let mut mappings = Vec::with_capacity(container_count);

    for (offset, container_port) in (start..=end).enumerate() {
        let host_port = match host {
            None => None,
            Some((host_start, host_end)) if container_count == 1 => {
                if host_start == host_end {
                    Some(host_start.to_string())
                } else {
                    Some(format!("{}-{}", host_start, host_end))
                }
            }
            Some((host_start, host_end)) => {
                let host_count = (host_end - host_start) as usize + 1;
                if host_count != container_count {
                    return Err(parse_error(
                        spec,
                        "host and container port ranges differ in size",
                    ));
                }
                Some((host_start as usize + offset).to_string())
            }
        };

        mappings.push(PortMapping {
            container_port,
            protocol,
            binding: PortBinding {
                host_ip: host_ip.clone(),
                host_port,
            },
        });
    }

    Ok(mappings)
}
