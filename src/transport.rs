//! 전송 백엔드 추상화
//!
//! 워커와 오케스트레이터는 이 모듈의 능력 집합(connect/accept,
//! send_all/recv_exact, close)만 보고 작성된다. 백엔드는 생성 시점에
//! 태그된 variant로 선택되며, 런타임 문자열 이름으로도 해석할 수 있다.
//! 연결은 전송 1회마다 새로 만들고 끝나면 닫는다. 재사용은 없다.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, trace};

use crate::config::BenchConfig;
use crate::error::{Error, Result};
use crate::rudp::RudpConnection;
use crate::worker::Endpoint;

/// connect 재시도 간격 (밀리초, 핸드셰이크 데드라인 안에서만)
const CONNECT_RETRY_MS: u64 = 10;

/// 전송 백엔드 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// 커널 TCP 소켓
    Tcp,

    /// 신뢰형 UDP (stop-and-wait, 청크 단위 ACK)
    Rudp,
}

impl TransportKind {
    /// 런타임 이름으로 백엔드 선택
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "rudp" | "udt" => Ok(Self::Rudp),
            _ => Err(Error::UnknownTransport {
                name: name.to_string(),
            }),
        }
    }

    /// 결과 기록용 라벨
    pub fn label(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Rudp => "rudp",
        }
    }
}

/// 연결 1개 (전송 1회 수명)
pub enum Connection {
    Tcp(TcpStream),
    Rudp(RudpConnection),
}

impl Connection {
    /// 송신측 연결 수립 (핸드셰이크 데드라인 내 거절 재시도 포함)
    pub async fn connect(
        kind: TransportKind,
        endpoint: &Endpoint,
        config: &BenchConfig,
    ) -> Result<Self> {
        match kind {
            TransportKind::Tcp => {
                let stream = tcp_connect(endpoint, config).await?;
                Ok(Self::Tcp(stream))
            }
            TransportKind::Rudp => {
                let conn = RudpConnection::connect(endpoint, config).await?;
                Ok(Self::Rudp(conn))
            }
        }
    }

    /// 수신측 바인드 + 수락 (데드라인 초과 시 타입 에러)
    pub async fn accept(
        kind: TransportKind,
        port: u16,
        config: &BenchConfig,
    ) -> Result<Self> {
        match kind {
            TransportKind::Tcp => {
                let stream = tcp_accept(port, config).await?;
                Ok(Self::Tcp(stream))
            }
            TransportKind::Rudp => {
                let conn = RudpConnection::accept(port, config).await?;
                Ok(Self::Rudp(conn))
            }
        }
    }

    /// 슬라이스 전체 송신 + 플러시
    pub async fn send_all(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            Self::Tcp(stream) => {
                stream.write_all(buf).await?;
                stream.flush().await?;
                Ok(())
            }
            Self::Rudp(conn) => conn.send_all(buf).await,
        }
    }

    /// 슬라이스 길이만큼 정확히 수신
    pub async fn recv_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match self {
            Self::Tcp(stream) => match stream.read_exact(buf).await {
                Ok(_) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    Err(Error::PeerClosed {
                        context: "recv 도중 EOF",
                    })
                }
                Err(e) => Err(e.into()),
            },
            Self::Rudp(conn) => conn.recv_exact(buf).await,
        }
    }

    /// 연결 종료
    pub async fn close(self) -> Result<()> {
        match self {
            Self::Tcp(mut stream) => {
                stream.shutdown().await?;
                Ok(())
            }
            Self::Rudp(conn) => conn.close().await,
        }
    }
}

/// TCP connect: 데드라인까지 거절을 재시도, 초과하면 ConnectTimeout
///
/// 전송 단계의 실패는 어디서도 재시도하지 않는다. 재시도는 핸드셰이크
/// 데드라인 안으로 한정된다 (상대 리스너가 아직 안 떠 있는 구간 흡수).
async fn tcp_connect(endpoint: &Endpoint, config: &BenchConfig) -> Result<TcpStream> {
    let addr = SocketAddr::new(endpoint.addr, endpoint.port);
    let deadline = Instant::now() + Duration::from_millis(config.handshake_timeout_ms);

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::ConnectTimeout {
                addr: addr.to_string(),
                timeout_ms: config.handshake_timeout_ms,
            });
        }

        match timeout(remaining, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                debug!("connected to {}", addr);
                return Ok(stream);
            }
            Ok(Err(e)) => {
                trace!("connect {} 실패 ({}), 재시도", addr, e);
                sleep(Duration::from_millis(CONNECT_RETRY_MS)).await;
            }
            Err(_) => {
                return Err(Error::ConnectTimeout {
                    addr: addr.to_string(),
                    timeout_ms: config.handshake_timeout_ms,
                });
            }
        }
    }
}

/// TCP accept: 데드라인까지 바인드/수락, 초과하면 AcceptTimeout
async fn tcp_accept(port: u16, config: &BenchConfig) -> Result<TcpStream> {
    let bind_addr = SocketAddr::from(([0, 0, 0, 0], port));
    let deadline = Instant::now() + Duration::from_millis(config.handshake_timeout_ms);

    // 직전 시나리오의 리스너가 닫히는 중일 수 있으므로 바인드도 데드라인 안에서 재시도
    let listener = loop {
        match TcpListener::bind(bind_addr).await {
            Ok(l) => break l,
            Err(e) => {
                if Instant::now() >= deadline {
                    return Err(e.into());
                }
                trace!("bind {} 실패 ({}), 재시도", bind_addr, e);
                sleep(Duration::from_millis(CONNECT_RETRY_MS)).await;
            }
        }
    };

    let remaining = deadline.saturating_duration_since(Instant::now());
    match timeout(remaining, listener.accept()).await {
        Ok(Ok((stream, peer))) => {
            stream.set_nodelay(true)?;
            debug!("accepted connection from {}", peer);
            Ok(stream)
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(Error::AcceptTimeout {
            port,
            timeout_ms: config.handshake_timeout_ms,
        }),
    }
}
