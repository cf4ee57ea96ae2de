//! 에러 타입 정의

use thiserror::Error;

/// PTB 벤치마크 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("분할 계획 결함: total_bytes={total_bytes}, element_size={element_size}, bdp={bdp} ({reason})")]
    Planning {
        total_bytes: usize,
        element_size: usize,
        bdp: usize,
        reason: &'static str,
    },

    #[error("연결 타임아웃: {addr} ({timeout_ms}ms 초과)")]
    ConnectTimeout { addr: String, timeout_ms: u64 },

    #[error("수락 타임아웃: port {port} ({timeout_ms}ms 초과)")]
    AcceptTimeout { port: u16, timeout_ms: u64 },

    #[error("ACK 타임아웃: seq={seq}, {attempts}회 재전송 후 포기")]
    AckTimeout { seq: u64, attempts: u32 },

    #[error("수신 타임아웃: seq={expected_seq} 대기 중 {timeout_ms}ms 초과")]
    RecvTimeout { expected_seq: u64, timeout_ms: u64 },

    #[error("시퀀스 갭: expected {expected}, got {got}")]
    FrameGap { expected: u64, got: u64 },

    #[error("프로토콜 위반: {context}")]
    Protocol { context: &'static str },

    #[error("상대측 연결 종료: {context}")]
    PeerClosed { context: &'static str },

    #[error("무결성 실패: offset {offset}, 값 {value} (기대값 {expected})")]
    Integrity {
        offset: usize,
        value: f64,
        expected: f64,
    },

    #[error("역할 플래그 오류: --sender 와 --receiver 중 정확히 하나만 지정해야 함")]
    RoleFlags,

    #[error("알 수 없는 전송 백엔드: {name}")]
    UnknownTransport { name: String },

    #[error("워커 태스크 join 실패: {0}")]
    TaskJoin(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
