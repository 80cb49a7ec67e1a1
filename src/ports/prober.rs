use std::{collections::HashSet, fs, io, net::TcpListener, path::PathBuf};

use log::{debug, trace};

use crate::error::Result;

const TCP_LISTEN: u8 = 0x0A;

/// Reports whether a port is currently bound by any process on the host.
pub trait PortProber {
    fn is_bound(&self, port: u16) -> Result<bool>;
}

/// Host prober reading the kernel socket tables.
#[derive(Debug, Clone)]
pub struct SystemProber {
    proc_net: PathBuf,
}

impl Default for SystemProber {
    fn default() -> Self {
        Self {
            proc_net: PathBuf::from("/proc/net"),
        }
    }
}

impl SystemProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prober over an alternative `/proc/net`-like directory.
    pub fn with_proc_net<P: Into<PathBuf>>(proc_net: P) -> Self {
        Self {
            proc_net: proc_net.into(),
        }
    }

    /// Every port listed in the socket tables, or `None` if no table was readable.
    pub fn bound_ports(&self) -> Option<HashSet<u16>> {
        let mut ports = HashSet::new();
        let mut readable = false;

        for (table, tcp) in [("tcp", true), ("tcp6", true), ("udp", false), ("udp6", false)] {
            match fs::read_to_string(self.proc_net.join(table)) {
                Ok(contents) => {
                    readable = true;
                    ports.extend(parse_socket_table(&contents, tcp));
                }
                Err(e) => trace!("Cannot read {}/{}: {}", self.proc_net.display(), table, e),
            }
        }

        readable.then_some(ports)
    }
}

impl PortProber for SystemProber {
    fn is_bound(&self, port: u16) -> Result<bool> {
        if let Some(ports) = self.bound_ports() {
            return Ok(ports.contains(&port));
        }

        debug!("Socket tables unavailable, probing port {} by binding", port);
        match TcpListener::bind(("0.0.0.0", port)) {
            Ok(_) => Ok(false),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => Ok(true),
            // anything else (e.g. privileged port) is treated as unusable
            Err(_) => Ok(true),
        }
    }
}

/// Extract local ports from a `/proc/net/{tcp,udp}[6]` table.
///
/// For TCP only sockets in LISTEN state count; every UDP entry is a bound socket.
pub fn parse_socket_table(contents: &str, tcp: bool) -> Vec<u16> {
    contents
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let local = fields.nth(1)?;
            let state = fields.nth(1)?;
            if tcp && u8::from_str_radix(state, 16).ok()? != TCP_LISTEN {
                return None;
            }
            let (_, port) = local.rsplit_once(':')?;
            u16::from_str_radix(port, 16).ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TCP_TABLE: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000:F262 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 21504 1 0000000000000000 100 0 0 10 0
   1: 0100007F:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 21505 1 0000000000000000 100 0 0 10 0
   2: 0A00000F:D2F4 5DB8D822:01BB 01 00000000:00000000 00:00000000 00000000  1000        0 33001 1 0000000000000000 20 4 30 10 -1
";

    const UDP_TABLE: &str = "   sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode ref pointer drops
  312: 00000000:0044 00000000:0000 07 00000000:00000000 00:00000000 00000000     0        0 18311 2 0000000000000000 0
";

    #[test]
    fn test_parse_tcp_only_listening() {
        let ports = parse_socket_table(TCP_TABLE, true);
        assert_eq!(ports, vec![62050, 8080]);
    }

    #[test]
    fn test_parse_udp_any_state() {
        assert_eq!(parse_socket_table(UDP_TABLE, false), vec![68]);
    }

    #[test]
    fn test_prober_over_fake_proc() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("tcp"), TCP_TABLE).unwrap();
        fs::write(dir.path().join("udp"), UDP_TABLE).unwrap();

        let prober = SystemProber::with_proc_net(dir.path());
        assert!(prober.is_bound(62050).unwrap());
        assert!(prober.is_bound(68).unwrap());
        // established outbound connection's local port is not a listener
        assert!(!prober.is_bound(54004).unwrap());
        assert!(!prober.is_bound(62051).unwrap());
    }
}
