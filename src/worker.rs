//! 전송 워커
//!
//! 연결 하나의 송신 또는 수신 전체를 수행하고 소요 시간을 보고한다.
//! 핸드셰이크(connect/accept)가 끝난 뒤에 타이머를 시작하므로 연결
//! 수립 지연은 측정치에 들어가지 않는다.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::warn;

use crate::config::BenchConfig;
use crate::error::{Error, Result};
use crate::transport::{Connection, TransportKind};

/// 전송 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    /// CLI 플래그에서 역할 결정. 둘 다이거나 둘 다 아니면 설정 오류
    pub fn from_flags(sender: bool, receiver: bool) -> Result<Self> {
        match (sender, receiver) {
            (true, false) => Ok(Self::Sender),
            (false, true) => Ok(Self::Receiver),
            _ => Err(Error::RoleFlags),
        }
    }

    /// 결과 파일 이름 등에 쓰는 라벨
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sender => "sender",
            Self::Receiver => "receiver",
        }
    }
}

/// 연결 한쪽 끝 식별자
#[derive(Debug, Clone, Copy)]
pub struct Endpoint {
    /// 상대 피어 주소 (수신측에서는 기록용)
    pub addr: IpAddr,

    /// 이 연결의 포트
    pub port: u16,

    /// 역할
    pub role: Role,
}

/// 워커가 소유하는 버퍼 조각
///
/// 송신측은 읽기 전용 슬라이스, 수신측은 소유권 분리된 쓰기 조각.
/// 조각끼리는 바이트 범위가 겹치지 않으므로 워커 간 동기화가 없다.
pub enum WorkerBuf {
    Send(Bytes),
    Recv(BytesMut),
}

impl WorkerBuf {
    /// 조각 바이트 길이
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Send(b) => b.len(),
            Self::Recv(b) => b.len(),
        }
    }
}

/// 연결 1개의 전송 결과
#[derive(Debug, Clone, Copy)]
pub struct TransferResult {
    /// 소요 시간 (핸드셰이크 제외, 항상 0 이상)
    pub duration: Duration,

    /// 전송한 바이트 수
    pub bytes: usize,

    /// 타이머 역행이 감지되어 0으로 보정했는지
    pub timer_anomaly: bool,
}

/// 워커 실행 결과 (파티션 인덱스 + 수신 버퍼 반환)
#[derive(Debug)]
pub struct WorkerOutcome {
    /// 파티션 인덱스 (재조립 순서)
    pub index: usize,

    /// 측정 결과
    pub result: TransferResult,

    /// 수신측이었으면 채워진 버퍼 조각
    pub recv_buf: Option<BytesMut>,
}

/// 연결 하나를 끝까지 구동한다
///
/// - Sender: connect → 타이머 시작 → 슬라이스 전체 송신/플러시 → 정지
/// - Receiver: bind/accept → 타이머 시작 → 슬라이스 길이만큼 수신 → 정지
///
/// 연결은 정확히 하나 열고 닫는다. 실패는 재시도 없이 호출자에게 올라간다.
pub async fn run(
    index: usize,
    endpoint: Endpoint,
    buf: WorkerBuf,
    kind: TransportKind,
    config: &BenchConfig,
) -> Result<WorkerOutcome> {
    let mut conn = match endpoint.role {
        Role::Sender => Connection::connect(kind, &endpoint, config).await?,
        Role::Receiver => Connection::accept(kind, endpoint.port, config).await?,
    };

    let bytes = buf.byte_len();
    let tic = Instant::now();

    let (toc, recv_buf) = match buf {
        WorkerBuf::Send(data) => {
            conn.send_all(&data).await?;
            let toc = Instant::now();
            conn.close().await?;
            (toc, None)
        }
        WorkerBuf::Recv(mut piece) => {
            conn.recv_exact(&mut piece[..]).await?;
            let toc = Instant::now();
            conn.close().await?;
            (toc, Some(piece))
        }
    };

    // 시계 이상으로 정지 시각이 시작보다 앞서면 0으로 보정하고 경고만 남긴다.
    // 측정 결함이지 전송 결함이 아니다
    let (duration, timer_anomaly) = match toc.checked_duration_since(tic) {
        Some(d) => (d, false),
        None => {
            warn!(
                "타이머 역행 감지: connection {} (port {}), 0으로 보정",
                index, endpoint.port
            );
            (Duration::ZERO, true)
        }
    };

    Ok(WorkerOutcome {
        index,
        result: TransferResult {
            duration,
            bytes,
            timer_anomaly,
        },
        recv_buf,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_flags() {
        assert_eq!(Role::from_flags(true, false).unwrap(), Role::Sender);
        assert_eq!(Role::from_flags(false, true).unwrap(), Role::Receiver);
        assert!(matches!(
            Role::from_flags(true, true),
            Err(Error::RoleFlags)
        ));
        assert!(matches!(
            Role::from_flags(false, false),
            Err(Error::RoleFlags)
        ));
    }

    #[test]
    fn test_role_labels() {
        assert_eq!(Role::Sender.label(), "sender");
        assert_eq!(Role::Receiver.label(), "receiver");
    }

    #[tokio::test]
    async fn test_sender_connect_timeout_is_typed() {
        let config = BenchConfig {
            handshake_timeout_ms: 200,
            ..BenchConfig::default()
        };
        let endpoint = Endpoint {
            addr: "127.0.0.1".parse().unwrap(),
            // 아무도 리슨하지 않는 포트
            port: 46930,
            role: Role::Sender,
        };
        let err = run(
            0,
            endpoint,
            WorkerBuf::Send(Bytes::from_static(b"x")),
            TransportKind::Tcp,
            &config,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::ConnectTimeout { .. }));
    }

    #[tokio::test]
    async fn test_receiver_accept_timeout_is_typed() {
        let config = BenchConfig {
            handshake_timeout_ms: 200,
            ..BenchConfig::default()
        };
        let endpoint = Endpoint {
            addr: "127.0.0.1".parse().unwrap(),
            port: 46931,
            role: Role::Receiver,
        };
        let err = run(
            0,
            endpoint,
            WorkerBuf::Recv(BytesMut::zeroed(8)),
            TransportKind::Tcp,
            &config,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::AcceptTimeout { port: 46931, .. }));
    }

    #[tokio::test]
    async fn test_single_connection_loopback() {
        let config = BenchConfig {
            handshake_timeout_ms: 3_000,
            ..BenchConfig::default()
        };
        let port = 46932;

        let recv_config = config.clone();
        let recv_task = tokio::spawn(async move {
            let endpoint = Endpoint {
                addr: "127.0.0.1".parse().unwrap(),
                port,
                role: Role::Receiver,
            };
            run(
                0,
                endpoint,
                WorkerBuf::Recv(BytesMut::zeroed(4096)),
                TransportKind::Tcp,
                &recv_config,
            )
            .await
            .unwrap()
        });

        let endpoint = Endpoint {
            addr: "127.0.0.1".parse().unwrap(),
            port,
            role: Role::Sender,
        };
        let data = Bytes::from(vec![0xABu8; 4096]);
        let sent = run(0, endpoint, WorkerBuf::Send(data), TransportKind::Tcp, &config)
            .await
            .unwrap();
        assert_eq!(sent.result.bytes, 4096);
        assert!(!sent.result.timer_anomaly);

        let received = recv_task.await.unwrap();
        assert_eq!(received.result.bytes, 4096);
        let piece = received.recv_buf.unwrap();
        assert!(piece.iter().all(|&b| b == 0xAB));
    }
}
