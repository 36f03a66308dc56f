/*!
 * Client Configuration
 */

use std::time::Duration;

/// Default server address, matching the target server's default port
pub const DEFAULT_ADDR: &str = "127.0.0.1:6380";

/// Connection settings for [`crate::client::Client`]
///
/// Timeouts of `None` mean block indefinitely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// `host:port` to connect to; resolved at connect time
    pub addr: String,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            connect_timeout: Some(Duration::from_secs(2)),
            read_timeout: Some(Duration::from_secs(5)),
            write_timeout: Some(Duration::from_secs(5)),
        }
    }
}

impl ClientConfig {
    /// Default settings pointed at `addr`
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Self::default()
        }
    }

    /// Build `host:port`, bracketing bare IPv6 hosts
    pub fn from_host_port(host: &str, port: u16) -> Self {
        if host.contains(':') && !host.starts_with('[') {
            Self::new(format!("[{}]:{}", host, port))
        } else {
            Self::new(format!("{}:{}", host, port))
        }
    }

    pub fn connect_timeout(mut self, t: Option<Duration>) -> Self {
        self.connect_timeout = t;
        self
    }

    pub fn read_timeout(mut self, t: Option<Duration>) -> Self {
        self.read_timeout = t;
        self
    }

    pub fn write_timeout(mut self, t: Option<Duration>) -> Self {
        self.write_timeout = t;
        self
    }

    /// Apply the same timeout to reads and writes
    pub fn io_timeout(self, t: Option<Duration>) -> Self {
        self.read_timeout(t).write_timeout(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_server() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.addr, "127.0.0.1:6380");
        assert_eq!(cfg.read_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn host_port_formatting() {
        assert_eq!(ClientConfig::from_host_port("localhost", 7000).addr, "localhost:7000");
        assert_eq!(ClientConfig::from_host_port("::1", 6380).addr, "[::1]:6380");
        assert_eq!(ClientConfig::from_host_port("[::1]", 6380).addr, "[::1]:6380");
    }

    #[test]
    fn io_timeout_sets_both() {
        let cfg = ClientConfig::new("x:1").io_timeout(None);
        assert_eq!(cfg.read_timeout, None);
        assert_eq!(cfg.write_timeout, None);
        assert_eq!(cfg.connect_timeout, Some(Duration::from_secs(2)));
    }
}
