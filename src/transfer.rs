//! 전송 오케스트레이터
//!
//! 분할 계획대로 워커를 동시에 띄우고, 단일 join 배리어에서 전원 완료를
//! 기다린 뒤 타이밍을 집계한다. 워커 하나라도 실패하면 전체 실행이
//! 실패다 (부분 성공 없음).

use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::BenchConfig;
use crate::error::{Error, Result};
use crate::payload::Payload;
use crate::plan::{self, TransferPlan};
use crate::record::{Recorder, RunRecord};
use crate::transport::TransportKind;
use crate::worker::{self, Endpoint, Role, WorkerBuf, WorkerOutcome};
use crate::ELEMENT_SIZE;

/// 연결 전략
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// 연결 1개가 페이로드 전체 담당 (base_port 사용)
    Single,

    /// BDP 기준으로 나눈 병렬 연결 (base_port + 1 + i 사용)
    Multi,
}

impl Strategy {
    /// 결과 기록용 라벨
    pub fn label(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Multi => "multi",
        }
    }
}

/// 벤치마크 시나리오 (백엔드 × 전략 × 페이로드 크기)
#[derive(Debug, Clone, Copy)]
pub struct Scenario {
    /// 전송 백엔드
    pub kind: TransportKind,

    /// 연결 전략
    pub strategy: Strategy,

    /// 페이로드 원소 수
    pub elements: usize,
}

impl Scenario {
    /// 로그용 이름
    pub fn name(&self) -> String {
        format!(
            "{}/{} {} elements",
            self.kind.label(),
            self.strategy.label(),
            self.elements
        )
    }
}

/// 전체 연결 집계 결과
#[derive(Debug)]
pub struct AggregateResult {
    /// 백엔드 라벨
    pub backend: &'static str,

    /// 시나리오 라벨
    pub scenario: &'static str,

    /// 연결별 소요 시간의 합
    ///
    /// 병렬 실행의 실제 경과 시간이 아니라 합산치다. 결과 포맷
    /// 호환을 위해 유지한다. 실제 경과 시간은 `wall` 참조
    pub duration: Duration,

    /// 병렬 구간 전체의 실제 경과 시간 (스폰부터 join 배리어까지)
    pub wall: Duration,

    /// 전송 바이트 합
    pub total_bytes: usize,

    /// 수신측이면 재조립 완료된 페이로드
    pub payload: Option<Payload>,
}

impl AggregateResult {
    /// 실제 경과 시간 기준 처리량 (MB/s)
    pub fn throughput_mbps(&self) -> f64 {
        let secs = self.wall.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / secs / 1_000_000.0
    }
}

/// 전송 오케스트레이터
pub struct Orchestrator {
    config: BenchConfig,
}

impl Orchestrator {
    pub fn new(config: BenchConfig) -> Self {
        Self { config }
    }

    /// 시나리오 1회 실행
    ///
    /// 파티션마다 워커를 스폰하고 전원 join한 뒤 결과 레코드를
    /// 한 줄 기록한다. 수신측이면 조각들을 파티션 순서로 재조립해
    /// 돌려준다.
    pub async fn execute(
        &self,
        scenario: &Scenario,
        payload: Payload,
        role: Role,
        recorder: &Recorder,
    ) -> Result<AggregateResult> {
        let total_bytes = payload.byte_len();
        let plan = self.plan_for(scenario.strategy, total_bytes)?;

        debug!(
            "{}: {} connections, {} bytes",
            scenario.name(),
            plan.connections(),
            total_bytes
        );

        let ports: Vec<u16> = match scenario.strategy {
            Strategy::Single => vec![self.config.base_port],
            Strategy::Multi => (0..plan.connections())
                .map(|i| self.config.port_for(i))
                .collect(),
        };

        let bufs: Vec<WorkerBuf> = match role {
            Role::Sender => {
                let frozen = payload.freeze();
                plan.partitions
                    .iter()
                    .map(|p| {
                        let start = p.offset * ELEMENT_SIZE;
                        WorkerBuf::Send(frozen.slice(start..start + p.byte_len()))
                    })
                    .collect()
            }
            Role::Receiver => payload
                .split_pieces(&plan)
                .into_iter()
                .map(WorkerBuf::Recv)
                .collect(),
        };

        let kind = scenario.kind;
        let wall_start = Instant::now();
        let mut set = JoinSet::new();
        for (part, (buf, port)) in plan.partitions.iter().zip(bufs.into_iter().zip(ports)) {
            let endpoint = Endpoint {
                addr: self.config.peer_addr,
                port,
                role,
            };
            let config = self.config.clone();
            let index = part.index;
            set.spawn(async move { worker::run(index, endpoint, buf, kind, &config).await });
        }

        // join 배리어: 모든 워커가 끝나기 전에는 어떤 결과도 내지 않는다.
        // 실패한 워커가 있어도 나머지를 전부 join한 뒤에 실패를 돌려준다
        let mut outcomes: Vec<WorkerOutcome> = Vec::with_capacity(plan.connections());
        let mut first_err: Option<Error> = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(e)) => {
                    warn!("워커 실패: {}", e);
                    first_err.get_or_insert(e);
                }
                Err(e) => {
                    warn!("워커 태스크 join 실패: {}", e);
                    first_err.get_or_insert(Error::TaskJoin(e.to_string()));
                }
            }
        }
        let wall = wall_start.elapsed();

        if let Some(e) = first_err {
            return Err(e);
        }

        outcomes.sort_by_key(|o| o.index);
        let duration: Duration = outcomes.iter().map(|o| o.result.duration).sum();
        let transferred: usize = outcomes.iter().map(|o| o.result.bytes).sum();

        let payload = match role {
            Role::Receiver => {
                let pieces = outcomes.into_iter().filter_map(|o| o.recv_buf).collect();
                Some(Payload::rejoin(pieces))
            }
            Role::Sender => None,
        };

        let record = RunRecord::new(kind.label(), scenario.strategy.label(), duration, transferred);
        recorder.record(&record)?;

        let result = AggregateResult {
            backend: kind.label(),
            scenario: scenario.strategy.label(),
            duration,
            wall,
            total_bytes: transferred,
            payload,
        };
        info!(
            "{} transfer took {}us (wall {}us, {:.2} MB/s)",
            scenario.name(),
            result.duration.as_micros(),
            result.wall.as_micros(),
            result.throughput_mbps()
        );
        Ok(result)
    }

    /// 전략에 맞는 분할 계획
    fn plan_for(&self, strategy: Strategy, total_bytes: usize) -> Result<TransferPlan> {
        match strategy {
            Strategy::Multi => plan::plan(total_bytes, ELEMENT_SIZE, self.config.bdp),
            // 단일 연결: 페이로드 전체를 덮는 파티션 하나
            Strategy::Single => {
                plan::plan(total_bytes, ELEMENT_SIZE, total_bytes.max(ELEMENT_SIZE))
            }
        }
    }
}
