//! The WARP probe: a partial WireGuard `Noise_IK` handshake used as an
//! RTT ping.
//!
//! A probe crafts a bit-exact WireGuard handshake initiation, optionally
//! preceded by a stream of obfuscation datagrams, sends it to every known
//! data-plane port of one address, and validates the handshake response.
//! The first port to answer wins; the elapsed time between the initiation
//! write and the response read is the endpoint's RTT.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use blake2::digest::{consts::U16, FixedOutput, KeyInit, Update};
use blake2::{Blake2s256, Blake2sMac, Digest};
use snow::{Builder, HandshakeState};
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ProbeError;
use crate::types::{IpInfo, ScannerOptions};

const NOISE_PARAMS: &str = "Noise_IKpsk2_25519_ChaChaPoly_BLAKE2s";
const WG_PROLOGUE: &[u8] = b"WireGuard v1 zx2c4 Jason@zx2c4.com";
const MAC1_LABEL: &[u8] = b"mac1----";

/// Fixed local session index echoed back in valid responses.
const SENDER_INDEX: u32 = 28;

/// Offset of the TAI epoch from the Unix epoch, per the TAI64 spec.
const TAI64_EPOCH_OFFSET: u64 = 4_611_686_018_427_387_914;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Cap on concurrent sockets per probed address; first success still wins.
const MAX_CONCURRENT_PROBES: usize = 8;

const OBFUSCATION_HEADER_LEN: usize = 18;
const MIN_RANDOM_PACKETS: u64 = 20;
const MAX_RANDOM_PACKETS: u64 = 50;
// Payload bounds are relative to the header size.
const MIN_RANDOM_PACKET_SIZE: u64 = 10;
const MAX_RANDOM_PACKET_SIZE: u64 = 120;
const MIN_RANDOM_PACKET_DELAY_MS: u64 = 80;
const MAX_RANDOM_PACKET_DELAY_MS: u64 = 150;

/// Key material for the probe handshake, base64-encoded as stored in the
/// identity.
#[derive(Clone, Default)]
pub struct WarpKeys {
    pub private_key: String,
    pub peer_public_key: String,
    pub preshared_key: String,
}

/// Uniform random integer in `[min, max]` from the OS CSPRNG.
fn random_int(min: u64, max: u64) -> Result<u64, ProbeError> {
    if min >= max {
        return Ok(min);
    }
    let mut buf = [0u8; 8];
    getrandom::getrandom(&mut buf)?;
    let span = max - min + 1;
    Ok(min + u64::from_le_bytes(buf) % span)
}

/// TAI64N timestamp for the initiation payload: 8 bytes of TAI seconds
/// followed by 4 bytes of nanoseconds, both big-endian.
fn tai64n_now() -> [u8; 12] {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let mut stamp = [0u8; 12];
    stamp[..8].copy_from_slice(&(TAI64_EPOCH_OFFSET + now.as_secs()).to_be_bytes());
    stamp[8..].copy_from_slice(&now.subsec_nanos().to_be_bytes());
    stamp
}

/// Build a WireGuard handshake initiation packet.
///
/// Layout: message type `01 00 00 00`, little-endian sender index, the
/// `Noise_IK` first message carrying a TAI64N timestamp, then mac1 (keyed
/// BLAKE2s-128 over everything preceding it) and an all-zero mac2.
/// Returns the packet together with the handshake state needed to read
/// the response.
pub(crate) fn build_initiation(keys: &WarpKeys) -> Result<(HandshakeState, Vec<u8>), ProbeError> {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;

    let private_key = BASE64.decode(&keys.private_key)?;
    let peer_public_key = BASE64.decode(&keys.peer_public_key)?;
    let preshared_key = if keys.preshared_key.is_empty() {
        vec![0u8; 32]
    } else {
        BASE64.decode(&keys.preshared_key)?
    };

    let params = NOISE_PARAMS
        .parse()
        .map_err(|_| ProbeError::crypto("invalid noise parameters"))?;
    let mut handshake = Builder::new(params)
        .local_private_key(&private_key)
        .remote_public_key(&peer_public_key)
        .prologue(WG_PROLOGUE)
        .psk(2, &preshared_key)
        .build_initiator()?;

    let mut noise_msg = [0u8; 148];
    let noise_len = handshake.write_message(&tai64n_now(), &mut noise_msg)?;

    let mut packet = Vec::with_capacity(148);
    packet.extend_from_slice(&[0x01, 0x00, 0x00, 0x00]);
    packet.extend_from_slice(&SENDER_INDEX.to_le_bytes());
    packet.extend_from_slice(&noise_msg[..noise_len]);

    let mac1_key = Blake2s256::new_with_prefix(MAC1_LABEL)
        .chain_update(&peer_public_key)
        .finalize();
    let mut mac1 = Blake2sMac::<U16>::new_from_slice(mac1_key.as_slice())
        .map_err(|_| ProbeError::crypto("invalid mac1 key length"))?;
    mac1.update(&packet);
    let mac1_tag = mac1.finalize_fixed();
    packet.extend_from_slice(mac1_tag.as_slice());
    packet.extend_from_slice(&[0u8; 16]);

    Ok((handshake, packet))
}

/// Validate a handshake response against the initiation state.
///
/// Requires at least 60 bytes, message type 2, our sender index echoed at
/// offset 8, and a Noise payload that decrypts to nothing.
pub(crate) fn validate_response(
    handshake: &mut HandshakeState,
    response: &[u8],
) -> Result<(), ProbeError> {
    if response.len() < 60 {
        return Err(ProbeError::malformed("response shorter than 60 bytes"));
    }
    if response[0] != 0x02 {
        return Err(ProbeError::malformed("invalid response type"));
    }

    let mut index = [0u8; 4];
    index.copy_from_slice(&response[8..12]);
    if u32::from_le_bytes(index) != SENDER_INDEX {
        return Err(ProbeError::malformed("invalid sender index in response"));
    }

    let mut payload = [0u8; 92];
    let payload_len = handshake.read_message(&response[12..60], &mut payload)?;
    if payload_len != 0 {
        return Err(ProbeError::crypto("unexpected payload in response"));
    }

    Ok(())
}

/// The 18-byte obfuscation datagram header: a magic first byte, fixed
/// framing, 8 random bytes, and a fixed trailer.
pub(crate) fn obfuscation_header() -> Result<[u8; OBFUSCATION_HEADER_LEN], ProbeError> {
    const FIRST_BYTES: [u8; 8] = [0xDC, 0xDE, 0xD3, 0xD9, 0xD0, 0xEC, 0xEE, 0xE3];

    let first = FIRST_BYTES[random_int(0, FIRST_BYTES.len() as u64 - 1)? as usize];
    let mut header = [0u8; OBFUSCATION_HEADER_LEN];
    header[0] = first;
    header[1..6].copy_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x08]);
    getrandom::getrandom(&mut header[6..14])?;
    header[14..18].copy_from_slice(&[0x00, 0x00, 0x44, 0xD0]);
    Ok(header)
}

/// Send 20-50 random datagrams before the real initiation so the
/// handshake does not lead the flow. Cancellation is honoured between
/// packets; a failed delay draw is non-fatal and sleeps zero.
async fn send_random_packets(
    token: &CancellationToken,
    socket: &UdpSocket,
) -> Result<(), ProbeError> {
    let header = obfuscation_header()?;
    let packet_count = random_int(MIN_RANDOM_PACKETS, MAX_RANDOM_PACKETS)?;

    let max_packet_size = OBFUSCATION_HEADER_LEN as u64 + MAX_RANDOM_PACKET_SIZE;
    let mut packet = vec![0u8; max_packet_size as usize];
    packet[..OBFUSCATION_HEADER_LEN].copy_from_slice(&header);

    for _ in 0..packet_count {
        if token.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }

        let packet_size = random_int(
            OBFUSCATION_HEADER_LEN as u64 + MIN_RANDOM_PACKET_SIZE,
            max_packet_size,
        )? as usize;
        getrandom::getrandom(&mut packet[OBFUSCATION_HEADER_LEN..packet_size])?;

        socket
            .send(&packet[..packet_size])
            .await
            .map_err(ProbeError::Write)?;

        match random_int(MIN_RANDOM_PACKET_DELAY_MS, MAX_RANDOM_PACKET_DELAY_MS) {
            Ok(delay_ms) => {
                tokio::select! {
                    () = token.cancelled() => return Err(ProbeError::Cancelled),
                    () = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                }
            }
            Err(err) => warn!(error = %err, "Failed to generate random delay"),
        }
    }

    Ok(())
}

/// Bind an unconnected UDP socket matching the peer's address family.
fn bind_probe_socket(peer: &SocketAddr) -> Result<UdpSocket, ProbeError> {
    let domain = if peer.is_ipv4() {
        socket2::Domain::IPV4
    } else {
        socket2::Domain::IPV6
    };
    let socket = socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))
        .map_err(ProbeError::Dial)?;
    socket.set_nonblocking(true).map_err(ProbeError::Dial)?;

    let bind_addr: SocketAddr = if peer.is_ipv4() {
        (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    socket.bind(&bind_addr.into()).map_err(ProbeError::Dial)?;

    UdpSocket::from_std(socket.into()).map_err(ProbeError::Dial)
}

/// Run one full handshake against a single endpoint and measure its RTT.
///
/// Obfuscation datagrams are sent before the timing window opens; the
/// clock starts immediately before the initiation write and stops when
/// the response read returns.
async fn handshake_rtt(
    token: &CancellationToken,
    addr: SocketAddr,
    keys: &WarpKeys,
    obfuscate: bool,
) -> Result<Duration, ProbeError> {
    let (mut handshake, initiation) = build_initiation(keys)?;

    let socket = bind_probe_socket(&addr)?;
    socket.connect(addr).await.map_err(ProbeError::Dial)?;

    if obfuscate {
        send_random_packets(token, &socket).await?;
    }

    let t0 = Instant::now();
    socket.send(&initiation).await.map_err(ProbeError::Write)?;

    let mut response = [0u8; 92];
    let read = tokio::time::timeout(READ_TIMEOUT, socket.recv(&mut response));
    let n = tokio::select! {
        () = token.cancelled() => return Err(ProbeError::Cancelled),
        result = read => match result {
            Ok(Ok(n)) => n,
            Ok(Err(err)) => return Err(ProbeError::Read(err)),
            Err(_) => return Err(ProbeError::ReadTimeout),
        },
    };
    let rtt = t0.elapsed();

    validate_response(&mut handshake, &response[..n])?;

    Ok(rtt)
}

/// Probes one IP address across the WARP port set.
#[derive(Clone)]
pub struct WarpProbe {
    keys: Arc<WarpKeys>,
    ports: Arc<Vec<u16>>,
    obfuscate: bool,
}

impl WarpProbe {
    /// Build a probe from scanner options; obfuscation is always on for
    /// scans.
    #[must_use]
    pub fn from_options(options: &ScannerOptions) -> Self {
        Self::new(
            WarpKeys {
                private_key: options.warp_private_key.clone(),
                peer_public_key: options.warp_peer_public_key.clone(),
                preshared_key: options.warp_preshared_key.clone(),
            },
            true,
        )
    }

    /// Build a probe over the default WARP port set.
    #[must_use]
    pub fn new(keys: WarpKeys, obfuscate: bool) -> Self {
        Self {
            keys: Arc::new(keys),
            ports: Arc::new(cfwarp_api::network::SCANNER_PORTS.to_vec()),
            obfuscate,
        }
    }

    /// Override the probed port set.
    #[must_use]
    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = Arc::new(ports);
        self
    }

    /// Probe every port of `ip` concurrently; the first successful
    /// handshake wins and the rest are torn down. When no port answers,
    /// the last error is returned.
    pub async fn probe(
        &self,
        token: &CancellationToken,
        ip: std::net::IpAddr,
    ) -> Result<IpInfo, ProbeError> {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_PROBES));
        let mut tasks = JoinSet::new();

        for &port in self.ports.iter() {
            let addr = SocketAddr::new(ip, port);
            let keys = self.keys.clone();
            let obfuscate = self.obfuscate;
            let task_token = token.child_token();
            let semaphore = semaphore.clone();

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| ProbeError::Cancelled)?;
                debug!(%addr, "Attempting to ping WARP endpoint");
                handshake_rtt(&task_token, addr, &keys, obfuscate)
                    .await
                    .map(|rtt| (addr, rtt))
            });
        }

        let mut last_err = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((addr_port, rtt))) => {
                    debug!(%addr_port, ?rtt, "Successfully pinged WARP endpoint");
                    return Ok(IpInfo {
                        addr_port,
                        rtt,
                        created_at: Instant::now(),
                    });
                }
                Ok(Err(err)) => {
                    debug!(%ip, error = %err, "Failed to ping WARP endpoint");
                    last_err = Some(err);
                }
                Err(_) => {}
            }
        }

        Err(last_err.unwrap_or(ProbeError::Cancelled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;

    fn test_keys() -> WarpKeys {
        let params = NOISE_PARAMS.parse().unwrap();
        let local = Builder::new(params).generate_keypair().unwrap();
        let params = NOISE_PARAMS.parse().unwrap();
        let peer = Builder::new(params).generate_keypair().unwrap();
        WarpKeys {
            private_key: BASE64.encode(&local.private),
            peer_public_key: BASE64.encode(&peer.public),
            preshared_key: String::new(),
        }
    }

    #[test]
    fn initiation_packet_shape() {
        let keys = test_keys();
        let (_handshake, packet) = build_initiation(&keys).unwrap();

        assert_eq!(packet.len(), 148);
        // Message type 1, little-endian, then sender index 28.
        assert_eq!(&packet[..8], &[0x01, 0, 0, 0, 0x1C, 0, 0, 0]);
        // mac2 is all zeros.
        assert_eq!(&packet[132..148], &[0u8; 16]);

        // mac1 is BLAKE2s-128 over everything before it, keyed with
        // BLAKE2s-256("mac1----" || peer_public_key).
        let peer_public = BASE64.decode(&keys.peer_public_key).unwrap();
        let mac1_key = Blake2s256::new_with_prefix(MAC1_LABEL)
            .chain_update(&peer_public)
            .finalize();
        let mut mac1 = Blake2sMac::<U16>::new_from_slice(mac1_key.as_slice()).unwrap();
        mac1.update(&packet[..116]);
        assert_eq!(&packet[116..132], mac1.finalize_fixed().as_slice());
    }

    #[test]
    fn initiation_packets_differ_per_handshake() {
        let keys = test_keys();
        let (_, first) = build_initiation(&keys).unwrap();
        let (_, second) = build_initiation(&keys).unwrap();
        // Fresh ephemerals mean fresh packets.
        assert_ne!(first, second);
    }

    #[test]
    fn response_rejection_triad() {
        let keys = test_keys();

        let (mut handshake, _) = build_initiation(&keys).unwrap();
        let short = [0u8; 59];
        assert!(matches!(
            validate_response(&mut handshake, &short),
            Err(ProbeError::MalformedResponse(_))
        ));

        let (mut handshake, _) = build_initiation(&keys).unwrap();
        let mut wrong_type = [0u8; 92];
        wrong_type[0] = 0x01;
        wrong_type[8..12].copy_from_slice(&28u32.to_le_bytes());
        assert!(matches!(
            validate_response(&mut handshake, &wrong_type),
            Err(ProbeError::MalformedResponse(_))
        ));

        let (mut handshake, _) = build_initiation(&keys).unwrap();
        let mut wrong_index = [0u8; 92];
        wrong_index[0] = 0x02;
        wrong_index[8..12].copy_from_slice(&29u32.to_le_bytes());
        assert!(matches!(
            validate_response(&mut handshake, &wrong_index),
            Err(ProbeError::MalformedResponse(_))
        ));
    }

    #[test]
    fn garbage_noise_payload_is_crypto_error() {
        let keys = test_keys();
        let (mut handshake, _) = build_initiation(&keys).unwrap();

        let mut garbage = [0xAAu8; 92];
        garbage[0] = 0x02;
        garbage[8..12].copy_from_slice(&28u32.to_le_bytes());
        assert!(matches!(
            validate_response(&mut handshake, &garbage),
            Err(ProbeError::Crypto(_))
        ));
    }

    #[test]
    fn obfuscation_header_format() {
        const FIRST_BYTES: [u8; 8] = [0xDC, 0xDE, 0xD3, 0xD9, 0xD0, 0xEC, 0xEE, 0xE3];
        for _ in 0..64 {
            let header = obfuscation_header().unwrap();
            assert!(FIRST_BYTES.contains(&header[0]));
            assert_eq!(&header[1..6], &[0x00, 0x00, 0x00, 0x01, 0x08]);
            assert_eq!(&header[14..18], &[0x00, 0x00, 0x44, 0xD0]);
        }
    }

    #[test]
    fn random_int_bounds() {
        for _ in 0..256 {
            let n = random_int(20, 50).unwrap();
            assert!((20..=50).contains(&n));
        }
        assert_eq!(random_int(7, 7).unwrap(), 7);
    }

    #[test]
    fn tai64n_is_after_epoch_offset() {
        let stamp = tai64n_now();
        let mut secs = [0u8; 8];
        secs.copy_from_slice(&stamp[..8]);
        assert!(u64::from_be_bytes(secs) > TAI64_EPOCH_OFFSET);
    }

    #[test]
    fn invalid_key_material_is_crypto_error() {
        let keys = WarpKeys {
            private_key: "not base64!!".into(),
            peer_public_key: "also not".into(),
            preshared_key: String::new(),
        };
        assert!(matches!(
            build_initiation(&keys),
            Err(ProbeError::Crypto(_))
        ));
    }
}
