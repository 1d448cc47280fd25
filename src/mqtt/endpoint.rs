use crate::error::{BridgeError, Result};

pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Plain-TCP broker address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
}

/// Parse MQTT endpoint from address string.
///
/// Supports formats:
/// - `host` (port 1883)
/// - `host:port`
/// - `mqtt://host:port` or `tcp://host:port`
/// - `[ipv6]:port` (IPv6 with brackets)
///
/// TLS schemes are rejected; the bridge only speaks plain TCP.
pub fn parse_mqtt_endpoint(addr: &str) -> Result<MqttEndpoint> {
    let mut remainder = addr.trim();
    if remainder.is_empty() {
        return Err(BridgeError::config("MQTT broker address is empty"));
    }

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => {
                return Err(BridgeError::config(format!(
                    "TLS MQTT is not supported: {}",
                    addr
                )))
            }
            other => {
                return Err(BridgeError::config(format!(
                    "unsupported MQTT scheme: {}",
                    other
                )))
            }
        }
        remainder = rest.trim_end_matches('/');
    }

    let (host, port) = split_host_port(remainder)?;
    if host.is_empty() {
        return Err(BridgeError::config(format!("missing MQTT host in {}", addr)));
    }
    Ok(MqttEndpoint { host, port })
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    // Handle IPv6 addresses in brackets: [::1]:1883
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| BridgeError::config(format!("invalid MQTT address: {}", addr)))?;
        let port = match rest.strip_prefix(':') {
            Some(port) => parse_port(port, addr)?,
            None => DEFAULT_MQTT_PORT,
        };
        return Ok((host.to_string(), port));
    }

    match addr.rsplit_once(':') {
        Some((host, port)) => Ok((host.to_string(), parse_port(port, addr)?)),
        None => Ok((addr.to_string(), DEFAULT_MQTT_PORT)),
    }
}

fn parse_port(port: &str, addr: &str) -> Result<u16> {
    port.parse()
        .map_err(|_| BridgeError::config(format!("invalid MQTT port in {}", addr)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_forms() {
        let ep = parse_mqtt_endpoint("mqtt://broker.local:1884").unwrap();
        assert_eq!((ep.host.as_str(), ep.port), ("broker.local", 1884));

        let ep = parse_mqtt_endpoint("192.168.1.10").unwrap();
        assert_eq!((ep.host.as_str(), ep.port), ("192.168.1.10", 1883));

        let ep = parse_mqtt_endpoint("[::1]:1883").unwrap();
        assert_eq!((ep.host.as_str(), ep.port), ("::1", 1883));
    }

    #[test]
    fn rejects_tls_and_bad_ports() {
        assert!(matches!(
            parse_mqtt_endpoint("mqtts://broker:8883"),
            Err(BridgeError::Configuration(_))
        ));
        assert!(parse_mqtt_endpoint("broker:notaport").is_err());
        assert!(parse_mqtt_endpoint("ws://broker:80").is_err());
        assert!(parse_mqtt_endpoint("  ").is_err());
        assert!(parse_mqtt_endpoint(":1883").is_err());
    }
}
