//! UDP socket buffer negotiation.
//!
//! The gateway asks the kernel for large socket buffers so bursts survive
//! scheduling hiccups on high-RTT paths. The kernel is free to grant less
//! than requested; this module applies the request, reads back what was
//! actually granted, and classifies the outcome so operators can see the
//! shortfall and raise the system ceilings.

use socket2::SockRef;
use std::fmt;
use std::net::UdpSocket;
use tracing::{info, warn};

/// Recommended socket buffer size (8 MiB), used both as the tuner's request
/// and as the doctor's kernel-ceiling threshold.
pub const RECOMMENDED_BUFFER_BYTES: usize = 8 * 1024 * 1024;

/// Reads the buffer sizes a socket currently has granted.
///
/// This is the one seam that differs per operating system; everything else
/// in the tuner is platform-neutral. Returns 0 when the size cannot be read.
pub trait SocketBufferInspector {
    fn recv_buffer_bytes(&self, socket: &UdpSocket) -> usize;
    fn send_buffer_bytes(&self, socket: &UdpSocket) -> usize;
}

/// Inspector backed by the running OS.
pub struct OsSocketInspector;

#[cfg(unix)]
impl SocketBufferInspector for OsSocketInspector {
    fn recv_buffer_bytes(&self, socket: &UdpSocket) -> usize {
        getsockopt_int(socket, libc::SO_RCVBUF)
    }

    fn send_buffer_bytes(&self, socket: &UdpSocket) -> usize {
        getsockopt_int(socket, libc::SO_SNDBUF)
    }
}

#[cfg(unix)]
fn getsockopt_int(socket: &UdpSocket, opt: libc::c_int) -> usize {
    use std::os::unix::io::AsRawFd;

    let mut value: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            opt,
            &mut value as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    };
    if rc != 0 || value < 0 {
        return 0;
    }
    value as usize
}

#[cfg(not(unix))]
impl SocketBufferInspector for OsSocketInspector {
    fn recv_buffer_bytes(&self, socket: &UdpSocket) -> usize {
        SockRef::from(socket).recv_buffer_size().unwrap_or(0)
    }

    fn send_buffer_bytes(&self, socket: &UdpSocket) -> usize {
        SockRef::from(socket).send_buffer_size().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Read => "read",
            Direction::Write => "write",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Outcome of one request/grant cycle with the kernel.
///
/// A granted value only exists when the set call succeeded; a failed set is
/// its own variant, not a zero-byte grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Negotiation {
    Optimal { requested: usize, granted: usize },
    Shortfall { requested: usize, granted: usize },
    SetFailed { requested: usize, error: String },
}

impl Negotiation {
    pub fn granted_bytes(&self) -> Option<usize> {
        match self {
            Negotiation::Optimal { granted, .. } | Negotiation::Shortfall { granted, .. } => {
                Some(*granted)
            }
            Negotiation::SetFailed { .. } => None,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            Negotiation::Optimal { requested, granted } => format!(
                "requested {} bytes ({}), granted {} bytes ({}); optimal",
                requested,
                format_bytes(*requested),
                granted,
                format_bytes(*granted)
            ),
            Negotiation::Shortfall { requested, granted } => format!(
                "requested {} bytes ({}), granted {} bytes ({}); raise net.core.rmem_max/wmem_max to unlock full throughput",
                requested,
                format_bytes(*requested),
                granted,
                format_bytes(*granted)
            ),
            Negotiation::SetFailed { requested, error } => format!(
                "failed to set buffer to {} bytes ({}): {}",
                requested,
                format_bytes(*requested),
                error
            ),
        }
    }

    fn log(&self, direction: Direction) {
        match self {
            Negotiation::Optimal { requested, granted } => info!(
                direction = direction.as_str(),
                requested_bytes = *requested,
                granted_bytes = *granted,
                "udp {} buffer: {}",
                direction,
                self.summary()
            ),
            Negotiation::Shortfall { requested, granted } => warn!(
                direction = direction.as_str(),
                requested_bytes = *requested,
                granted_bytes = *granted,
                "udp {} buffer: {}",
                direction,
                self.summary()
            ),
            Negotiation::SetFailed { requested, .. } => warn!(
                direction = direction.as_str(),
                requested_bytes = *requested,
                "udp {} buffer: {}",
                direction,
                self.summary()
            ),
        }
    }
}

/// Negotiation outcome for both directions of one socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferNegotiation {
    pub read: Negotiation,
    pub write: Negotiation,
}

impl BufferNegotiation {
    /// Emits one log line per direction: info when optimal, warn otherwise.
    pub fn report(&self) {
        self.read.log(Direction::Read);
        self.write.log(Direction::Write);
    }
}

/// Requests the given buffer sizes on `socket` and reads back the grants.
///
/// Fire-and-forget: never retries, never fails the caller, never closes the
/// socket. The two setsockopt calls are the only syscalls besides the
/// inspector's read-backs.
pub fn tune_udp_buffers(
    socket: &UdpSocket,
    inspector: &dyn SocketBufferInspector,
    read_bytes: usize,
    write_bytes: usize,
) -> BufferNegotiation {
    let sock = SockRef::from(socket);

    let read = match sock.set_recv_buffer_size(read_bytes) {
        Ok(()) => classify(read_bytes, inspector.recv_buffer_bytes(socket)),
        Err(e) => Negotiation::SetFailed {
            requested: read_bytes,
            error: e.to_string(),
        },
    };

    let write = match sock.set_send_buffer_size(write_bytes) {
        Ok(()) => classify(write_bytes, inspector.send_buffer_bytes(socket)),
        Err(e) => Negotiation::SetFailed {
            requested: write_bytes,
            error: e.to_string(),
        },
    };

    BufferNegotiation { read, write }
}

fn classify(requested: usize, granted: usize) -> Negotiation {
    if granted >= requested {
        Negotiation::Optimal { requested, granted }
    } else {
        Negotiation::Shortfall { requested, granted }
    }
}

pub fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = 1024 * KB;
    if bytes >= MB {
        format!("{}MB", bytes / MB)
    } else if bytes >= KB {
        format!("{}KB", bytes / KB)
    } else {
        format!("{}B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedInspector {
        recv: usize,
        send: usize,
    }

    impl SocketBufferInspector for FixedInspector {
        fn recv_buffer_bytes(&self, _socket: &UdpSocket) -> usize {
            self.recv
        }

        fn send_buffer_bytes(&self, _socket: &UdpSocket) -> usize {
            self.send
        }
    }

    fn local_socket() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").expect("bind")
    }

    #[test]
    fn shortfall_reproduces_requested_and_granted() {
        let socket = local_socket();
        let inspector = FixedInspector {
            recv: 212_992,
            send: 212_992,
        };
        let negotiation = tune_udp_buffers(
            &socket,
            &inspector,
            RECOMMENDED_BUFFER_BYTES,
            RECOMMENDED_BUFFER_BYTES,
        );

        assert_eq!(
            negotiation.read,
            Negotiation::Shortfall {
                requested: 8_388_608,
                granted: 212_992,
            }
        );
        let summary = negotiation.read.summary();
        assert!(summary.contains("8388608"));
        assert!(summary.contains("212992"));
        assert!(summary.contains("rmem_max"));
    }

    #[test]
    fn grant_at_or_above_request_is_optimal() {
        let socket = local_socket();
        let inspector = FixedInspector {
            recv: 262_144,
            send: 524_288,
        };
        let negotiation = tune_udp_buffers(&socket, &inspector, 65_536, 524_288);

        assert!(matches!(negotiation.read, Negotiation::Optimal { .. }));
        assert!(matches!(negotiation.write, Negotiation::Optimal { .. }));
        let summary = negotiation.write.summary();
        assert!(summary.contains("optimal"));
        assert!(!summary.contains("unlock full throughput"));
    }

    #[test]
    fn set_failure_keeps_error_and_has_no_grant() {
        let outcome = Negotiation::SetFailed {
            requested: 8_388_608,
            error: "operation not permitted".to_string(),
        };
        assert_eq!(outcome.granted_bytes(), None);
        let summary = outcome.summary();
        assert!(summary.contains("failed to set buffer"));
        assert!(summary.contains("operation not permitted"));
    }

    #[cfg(unix)]
    #[test]
    fn os_inspector_reads_back_a_real_grant() {
        let socket = local_socket();
        let negotiation =
            tune_udp_buffers(&socket, &OsSocketInspector, 65_536, 65_536);
        // The kernel may round the grant, but a successful set must read
        // back as a nonzero size.
        assert!(negotiation.read.granted_bytes().unwrap_or(0) > 0);
        assert!(negotiation.write.granted_bytes().unwrap_or(0) > 0);
    }

    #[test]
    fn format_bytes_picks_the_largest_unit() {
        assert_eq!(format_bytes(8_388_608), "8MB");
        assert_eq!(format_bytes(212_992), "208KB");
        assert_eq!(format_bytes(512), "512B");
    }
}
