//! Port string parsing
//!
//! Accepts `8080`, `8080/tcp` and `53/UDP`; the protocol defaults to TCP.
//! Ports are named `<number>-<protocol>` in lowercase.

use k8s_openapi::api::core::v1::ContainerPort;

use crate::error::DevError;

/// Parse one port string
pub fn parse_port(spec: &str) -> Result<ContainerPort, DevError> {
    let mut parts = spec.trim().split('/');
    let number = parts.next().unwrap_or_default();
    let protocol = parts.next();
    if parts.next().is_some() {
        return Err(DevError::Invalid(format!("unable to parse the port string {}", spec)));
    }

    let number: i32 = number
        .parse()
        .map_err(|e| DevError::Invalid(format!("invalid port number {}: {}", number, e)))?;
    if !(1..=65535).contains(&number) {
        return Err(DevError::Invalid(format!("port {} out of range", number)));
    }

    let protocol = match protocol.map(str::to_ascii_uppercase).as_deref() {
        None | Some("TCP") => "TCP",
        Some("UDP") => "UDP",
        Some(other) => return Err(DevError::Invalid(format!("invalid port protocol {}", other))),
    };

    Ok(ContainerPort {
        name: Some(format!("{}-{}", number, protocol.to_ascii_lowercase())),
        container_port: number,
        protocol: Some(protocol.to_string()),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_parse_port_defaults() {
        let port = parse_port("8080").unwrap();
        assert_eq!(port.container_port, 8080);
        assert_eq!(port.protocol.as_deref(), Some("TCP"));
        assert_eq!(port.name.as_deref(), Some("8080-tcp"));
    }

    #[test]
    fn test_parse_port_protocol_is_case_insensitive() {
        let port = parse_port("53/udp").unwrap();
        assert_eq!(port.protocol.as_deref(), Some("UDP"));
        assert_eq!(port.name.as_deref(), Some("53-udp"));
    }

    #[test]
    fn test_parse_port_rejects_garbage() {
        for bad in ["", "http", "8080/sctp", "8080/tcp/x", "0", "70000"] {
            assert_eq!(parse_port(bad).unwrap_err().kind(), ErrorKind::Invalid, "{}", bad);
        }
    }
}
