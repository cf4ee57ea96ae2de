//! 결과 기록
//!
//! 시나리오 하나당 한 줄. 필드 순서와 끝의 구분자는 실행 간 불변이라
//! 결과 파일을 diff하거나 파서로 읽을 수 있다.
//!
//! 포맷: `<backend>,<scenario>,<duration>,us,<bytes>,B,`

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use parking_lot::Mutex;

use crate::error::Result;
use crate::worker::Role;

/// 시나리오 1회의 결과 레코드
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    /// 백엔드 라벨 (tcp / rudp)
    pub backend: String,

    /// 시나리오 라벨 (single / multi)
    pub scenario: String,

    /// 합산 소요 시간 (마이크로초)
    pub duration_us: u128,

    /// 전송 바이트 수
    pub bytes: usize,
}

impl RunRecord {
    pub fn new(
        backend: &str,
        scenario: &str,
        duration: std::time::Duration,
        bytes: usize,
    ) -> Self {
        Self {
            backend: backend.to_string(),
            scenario: scenario.to_string(),
            duration_us: duration.as_micros(),
            bytes,
        }
    }

    /// 고정 포맷 한 줄 (개행 제외)
    pub fn format_line(&self) -> String {
        format!(
            "{},{},{},us,{},B,",
            self.backend, self.scenario, self.duration_us, self.bytes
        )
    }
}

/// 결과 레코더
///
/// 여러 워커/시나리오가 공유할 수 있도록 쓰기는 락 뒤에 둔다.
pub struct Recorder {
    out: Mutex<Box<dyn Write + Send>>,
}

impl Recorder {
    /// 파일에 이어 쓰는 레코더 생성
    pub fn to_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::from_writer(Box::new(BufWriter::new(file))))
    }

    /// 임의 writer를 쓰는 레코더 생성
    pub fn from_writer(out: Box<dyn Write + Send>) -> Self {
        Self { out: Mutex::new(out) }
    }

    /// 아무 데도 기록하지 않는 레코더 (테스트, 기록 비활성)
    pub fn sink() -> Self {
        Self::from_writer(Box::new(std::io::sink()))
    }

    /// 역할별 결과 파일 이름
    pub fn result_file_name(role: Role) -> String {
        format!("results-{}.result", role.label())
    }

    /// 레코드 한 줄 기록 + 플러시
    pub fn record(&self, record: &RunRecord) -> Result<()> {
        let mut out = self.out.lock();
        writeln!(out, "{}", record.format_line())?;
        out.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder").finish_non_exhaustive()
    }
}
