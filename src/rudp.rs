//! 신뢰형 UDP 백엔드 (rudp)
//!
//! UDP 위에 최소한의 신뢰성만 얹은 stop-and-wait 채널:
//! - Init/InitAck 핸드셰이크로 피어 고정
//! - 데이터는 시퀀스 번호 + CRC32가 붙은 청크로 분할
//! - 청크마다 ACK, ACK 미수신 시 제한 횟수 내 재전송
//! - 손상 청크는 버린다 (ACK이 안 나가므로 송신측이 재전송)
//! - 중복 청크는 ACK만 다시 보내고 버린다
//!
//! 혼잡 제어는 없다. 처리량이 RTT에 묶이는 소박한 백엔드로,
//! TCP 백엔드와의 비교 기준선 역할을 한다.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, trace};

use crate::config::BenchConfig;
use crate::error::{Error, Result};
use crate::worker::Endpoint;
use crate::MAGIC_NUMBER;

/// Init 재전송 간격 (밀리초)
const INIT_RETRY_MS: u64 = 200;

/// 수신 데이터그램 버퍼 크기
const DATAGRAM_MAX: usize = 65_536;

/// 프레임 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    /// 연결 개시 (송신측 → 수신측)
    Init,

    /// 연결 개시 응답
    InitAck,

    /// 데이터 청크
    Data,

    /// 청크 수신 확인
    Ack,
}

/// 프레임 헤더
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameHeader {
    /// 매직 넘버
    pub magic: u32,

    /// 프레임 종류
    pub kind: FrameKind,

    /// 시퀀스 번호 (Data/Ack), 제어 프레임은 0
    pub seq: u64,

    /// 페이로드 길이
    pub data_len: u16,

    /// 페이로드 CRC32
    pub crc32: u32,
}

/// 프레임 직렬화: [u16 헤더 길이][bincode 헤더][페이로드]
pub fn encode_frame(kind: FrameKind, seq: u64, data: &[u8]) -> Result<Vec<u8>> {
    let header = FrameHeader {
        magic: MAGIC_NUMBER,
        kind,
        seq,
        data_len: data.len() as u16,
        crc32: crc32fast::hash(data),
    };
    let header_bytes = bincode::serialize(&header)?;

    let mut buf = Vec::with_capacity(2 + header_bytes.len() + data.len());
    buf.extend_from_slice(&(header_bytes.len() as u16).to_le_bytes());
    buf.extend_from_slice(&header_bytes);
    buf.extend_from_slice(data);
    Ok(buf)
}

/// 프레임 역직렬화. 형식이 깨진 데이터그램은 None
pub fn decode_frame(bytes: &[u8]) -> Option<(FrameHeader, &[u8])> {
    if bytes.len() < 2 {
        return None;
    }

    let header_len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
    if bytes.len() < 2 + header_len {
        return None;
    }

    let header: FrameHeader = bincode::deserialize(&bytes[2..2 + header_len]).ok()?;
    let payload = &bytes[2 + header_len..];
    Some((header, payload))
}

/// 신뢰형 UDP 연결 (전송 1회 수명)
#[derive(Debug)]
pub struct RudpConnection {
    socket: UdpSocket,
    chunk_size: usize,
    io_timeout: Duration,
    max_retries: u32,
    send_seq: u64,
    recv_seq: u64,
}

impl RudpConnection {
    /// 송신측: Init을 보내고 InitAck을 기다린다
    ///
    /// 수신측이 아직 바인드 전이면 데드라인 안에서 Init을 재전송한다.
    pub async fn connect(endpoint: &Endpoint, config: &BenchConfig) -> Result<Self> {
        let bind_addr: SocketAddr = if endpoint.addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        let peer = SocketAddr::new(endpoint.addr, endpoint.port);
        socket.connect(peer).await?;

        let deadline = Instant::now() + Duration::from_millis(config.handshake_timeout_ms);
        let init = encode_frame(FrameKind::Init, 0, &[])?;
        let mut raw = vec![0u8; DATAGRAM_MAX];

        loop {
            if Instant::now() >= deadline {
                return Err(Error::ConnectTimeout {
                    addr: peer.to_string(),
                    timeout_ms: config.handshake_timeout_ms,
                });
            }

            // 수신측 포트가 아직 안 열려 있으면 ICMP unreachable이
            // ConnectionRefused로 돌아온다. 데드라인 안에서 재시도
            if let Err(e) = socket.send(&init).await {
                if e.kind() == std::io::ErrorKind::ConnectionRefused {
                    sleep(Duration::from_millis(INIT_RETRY_MS / 4)).await;
                    continue;
                }
                return Err(e.into());
            }

            let wait = Duration::from_millis(INIT_RETRY_MS)
                .min(deadline.saturating_duration_since(Instant::now()));
            if wait.is_zero() {
                return Err(Error::ConnectTimeout {
                    addr: peer.to_string(),
                    timeout_ms: config.handshake_timeout_ms,
                });
            }

            match timeout(wait, socket.recv(&mut raw)).await {
                Ok(Ok(len)) => {
                    if let Some((header, _)) = decode_frame(&raw[..len]) {
                        if header.magic == MAGIC_NUMBER && header.kind == FrameKind::InitAck {
                            debug!("rudp connected to {}", peer);
                            break;
                        }
                    }
                    trace!("InitAck 아닌 데이터그램 무시");
                }
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    sleep(Duration::from_millis(INIT_RETRY_MS / 4)).await;
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    trace!("InitAck 대기 초과, Init 재전송");
                }
            }
        }

        Ok(Self {
            socket,
            chunk_size: config.rudp_chunk_size,
            io_timeout: Duration::from_millis(config.io_timeout_ms),
            max_retries: config.rudp_max_retries,
            send_seq: 0,
            recv_seq: 0,
        })
    }

    /// 수신측: 포트에 바인드하고 Init을 기다렸다가 InitAck으로 응답
    pub async fn accept(port: u16, config: &BenchConfig) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
        let deadline = Instant::now() + Duration::from_millis(config.handshake_timeout_ms);
        let mut raw = vec![0u8; DATAGRAM_MAX];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::AcceptTimeout {
                    port,
                    timeout_ms: config.handshake_timeout_ms,
                });
            }

            match timeout(remaining, socket.recv_from(&mut raw)).await {
                Ok(Ok((len, peer))) => {
                    if let Some((header, _)) = decode_frame(&raw[..len]) {
                        if header.magic == MAGIC_NUMBER && header.kind == FrameKind::Init {
                            socket.connect(peer).await?;
                            let ack = encode_frame(FrameKind::InitAck, 0, &[])?;
                            socket.send(&ack).await?;
                            debug!("rudp accepted from {}", peer);
                            return Ok(Self {
                                socket,
                                chunk_size: config.rudp_chunk_size,
                                io_timeout: Duration::from_millis(config.io_timeout_ms),
                                max_retries: config.rudp_max_retries,
                                send_seq: 0,
                                recv_seq: 0,
                            });
                        }
                    }
                    trace!("Init 아닌 데이터그램 무시");
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    return Err(Error::AcceptTimeout {
                        port,
                        timeout_ms: config.handshake_timeout_ms,
                    });
                }
            }
        }
    }

    /// 슬라이스 전체를 청크 단위 stop-and-wait로 송신
    pub async fn send_all(&mut self, buf: &[u8]) -> Result<()> {
        let mut raw = vec![0u8; DATAGRAM_MAX];

        for chunk in buf.chunks(self.chunk_size) {
            let seq = self.send_seq;
            let frame = encode_frame(FrameKind::Data, seq, chunk)?;

            let mut attempts = 0u32;
            loop {
                self.socket.send(&frame).await?;
                if self.wait_ack(seq, &mut raw).await? {
                    break;
                }
                attempts += 1;
                if attempts > self.max_retries {
                    return Err(Error::AckTimeout { seq, attempts });
                }
                trace!("seq {} ACK 미수신, 재전송 {}회", seq, attempts);
            }

            self.send_seq += 1;
        }
        Ok(())
    }

    /// seq에 대한 ACK 대기. 제한 시간 내 도착하면 true
    async fn wait_ack(&self, seq: u64, raw: &mut [u8]) -> Result<bool> {
        let deadline = Instant::now() + self.io_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }

            match timeout(remaining, self.socket.recv(raw)).await {
                Ok(Ok(len)) => {
                    if let Some((header, _)) = decode_frame(&raw[..len]) {
                        if header.magic == MAGIC_NUMBER
                            && header.kind == FrameKind::Ack
                            && header.seq == seq
                        {
                            return Ok(true);
                        }
                    }
                    // 지난 ACK, 깨진 데이터그램 등은 무시
                }
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    // 핸드셰이크 전에 쌓인 ICMP 에러 잔재. 무시
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Ok(false),
            }
        }
    }

    /// 슬라이스 길이만큼 정확히 수신
    pub async fn recv_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut raw = vec![0u8; DATAGRAM_MAX];
        let mut cursor = 0usize;
        let init_ack = encode_frame(FrameKind::InitAck, 0, &[])?;

        while cursor < buf.len() {
            let len = match timeout(self.io_timeout, self.socket.recv(&mut raw)).await {
                Ok(Ok(len)) => len,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    return Err(Error::RecvTimeout {
                        expected_seq: self.recv_seq,
                        timeout_ms: self.io_timeout.as_millis() as u64,
                    });
                }
            };

            let Some((header, payload)) = decode_frame(&raw[..len]) else {
                trace!("파싱 불가 데이터그램 버림");
                continue;
            };
            if header.magic != MAGIC_NUMBER {
                continue;
            }

            match header.kind {
                FrameKind::Init => {
                    // InitAck 유실 시 송신측이 Init을 재전송한다
                    self.socket.send(&init_ack).await?;
                }
                FrameKind::Data => {
                    let crc = crc32fast::hash(payload);
                    if crc != header.crc32 {
                        debug!(
                            "손상 청크 버림: seq={}, CRC {:08X} != {:08X}",
                            header.seq, crc, header.crc32
                        );
                        continue;
                    }

                    if header.seq < self.recv_seq {
                        // ACK 유실로 인한 중복 수신. ACK만 다시 보냄
                        let ack = encode_frame(FrameKind::Ack, header.seq, &[])?;
                        self.socket.send(&ack).await?;
                        continue;
                    }
                    if header.seq > self.recv_seq {
                        // stop-and-wait에서 앞선 시퀀스는 나올 수 없음
                        return Err(Error::FrameGap {
                            expected: self.recv_seq,
                            got: header.seq,
                        });
                    }
                    if cursor + payload.len() > buf.len() {
                        return Err(Error::Protocol {
                            context: "수신 슬라이스 범위 초과",
                        });
                    }

                    buf[cursor..cursor + payload.len()].copy_from_slice(payload);
                    cursor += payload.len();

                    let ack = encode_frame(FrameKind::Ack, header.seq, &[])?;
                    self.socket.send(&ack).await?;
                    self.recv_seq += 1;
                }
                FrameKind::InitAck | FrameKind::Ack => {}
            }
        }
        Ok(())
    }

    /// 연결 종료. 모든 청크가 ACK된 뒤라 소켓만 닫으면 된다
    pub async fn close(self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::Role;

    #[test]
    fn test_frame_codec_roundtrip() {
        let data = vec![7u8; 100];
        let frame = encode_frame(FrameKind::Data, 42, &data).unwrap();
        let (header, payload) = decode_frame(&frame).unwrap();

        assert_eq!(header.magic, MAGIC_NUMBER);
        assert_eq!(header.kind, FrameKind::Data);
        assert_eq!(header.seq, 42);
        assert_eq!(header.data_len, 100);
        assert_eq!(header.crc32, crc32fast::hash(&data));
        assert_eq!(payload, &data[..]);
    }

    #[test]
    fn test_decode_rejects_short_input() {
        assert!(decode_frame(&[]).is_none());
        assert!(decode_frame(&[1]).is_none());
        assert!(decode_frame(&[200, 0, 1, 2]).is_none());
    }

    #[test]
    fn test_crc_detects_tampering() {
        let data = vec![1u8, 2, 3, 4, 5];
        let mut frame = encode_frame(FrameKind::Data, 0, &data).unwrap();

        let last = frame.len() - 1;
        frame[last] ^= 0xFF;

        let (header, payload) = decode_frame(&frame).unwrap();
        assert_ne!(crc32fast::hash(payload), header.crc32);
    }

    #[tokio::test]
    async fn test_loopback_transfer() {
        let config = BenchConfig {
            handshake_timeout_ms: 3_000,
            io_timeout_ms: 1_000,
            rudp_chunk_size: 512,
            ..BenchConfig::default()
        };
        let port = 46910;

        let recv_config = config.clone();
        let recv_task = tokio::spawn(async move {
            let mut conn = RudpConnection::accept(port, &recv_config).await.unwrap();
            let mut buf = vec![0u8; 5000];
            conn.recv_exact(&mut buf).await.unwrap();
            buf
        });

        let endpoint = Endpoint {
            addr: "127.0.0.1".parse().unwrap(),
            port,
            role: Role::Sender,
        };
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let mut conn = RudpConnection::connect(&endpoint, &config).await.unwrap();
        conn.send_all(&data).await.unwrap();
        conn.close().await.unwrap();

        let got = recv_task.await.unwrap();
        assert_eq!(got, data);
    }

    #[tokio::test]
    async fn test_accept_times_out_without_peer() {
        let config = BenchConfig {
            handshake_timeout_ms: 200,
            ..BenchConfig::default()
        };
        let err = RudpConnection::accept(46920, &config).await.unwrap_err();
        assert!(matches!(err, Error::AcceptTimeout { port: 46920, .. }));
    }
}
