//! 벤치마크 시나리오 실행기
//!
//! 페이로드 크기 4단계 × (백엔드 × 전략) 조합을 순서대로 돌린다.
//! 양쪽 피어가 같은 순서로 돌므로 시나리오마다 포트가 맞물린다.
//! 수신측은 시나리오가 끝날 때마다 버퍼 전체를 검증한다.

use tracing::{error, info};

use crate::config::BenchConfig;
use crate::error::{Error, Result};
use crate::payload::Payload;
use crate::record::Recorder;
use crate::transfer::{Orchestrator, Scenario, Strategy};
use crate::transport::TransportKind;
use crate::worker::Role;
use crate::PATTERN_VALUE;

/// 한 페이로드 크기에 대한 시나리오 조합 (순서 고정)
pub fn scenario_matrix(elements: usize) -> Vec<Scenario> {
    vec![
        Scenario {
            kind: TransportKind::Tcp,
            strategy: Strategy::Multi,
            elements,
        },
        Scenario {
            kind: TransportKind::Tcp,
            strategy: Strategy::Single,
            elements,
        },
        Scenario {
            kind: TransportKind::Rudp,
            strategy: Strategy::Multi,
            elements,
        },
        Scenario {
            kind: TransportKind::Rudp,
            strategy: Strategy::Single,
            elements,
        },
    ]
}

/// 시나리오 1개 실행 + 수신측 무결성 검증
///
/// 무결성 실패는 해당 시나리오에 치명적이다. 남은 시나리오를 계속할지는
/// `halt_on_corruption` 설정을 따른다.
pub async fn run_scenario(
    orchestrator: &Orchestrator,
    config: &BenchConfig,
    scenario: &Scenario,
    role: Role,
    recorder: &Recorder,
) -> Result<()> {
    let payload = match role {
        Role::Sender => Payload::pattern(scenario.elements, PATTERN_VALUE),
        Role::Receiver => Payload::zeroed(scenario.elements),
    };

    let aggregate = orchestrator
        .execute(scenario, payload, role, recorder)
        .await?;

    if let Some(received) = &aggregate.payload {
        if let Some(mismatch) = received.verify(PATTERN_VALUE) {
            let err = Error::Integrity {
                offset: mismatch.offset,
                value: mismatch.value,
                expected: PATTERN_VALUE,
            };
            error!("{}: {}", scenario.name(), err);
            if config.halt_on_corruption {
                return Err(err);
            }
        }
    }
    Ok(())
}

/// 전체 벤치마크 실행 (크기 단계 × 시나리오 조합)
pub async fn run_all(config: &BenchConfig, role: Role, recorder: &Recorder) -> Result<()> {
    config.validate()?;
    let orchestrator = Orchestrator::new(config.clone());

    for step in 1..=config.transfer_steps {
        let elements = config.transfer_min * step;
        info!("transfer step {}: {} elements", step, elements);

        for scenario in scenario_matrix(elements) {
            run_scenario(&orchestrator, config, &scenario, role, recorder).await?;
        }
    }

    info!("모든 시나리오 완료");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_shape_and_order() {
        let matrix = scenario_matrix(1000);
        assert_eq!(matrix.len(), 4);
        assert!(matrix.iter().all(|s| s.elements == 1000));

        let labels: Vec<(&str, &str)> = matrix
            .iter()
            .map(|s| (s.kind.label(), s.strategy.label()))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("tcp", "multi"),
                ("tcp", "single"),
                ("rudp", "multi"),
                ("rudp", "single"),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_all_loopback() {
        let config = BenchConfig {
            base_port: 45700,
            bdp: 2048,
            rudp_chunk_size: 512,
            transfer_min: 512,
            transfer_steps: 2,
            handshake_timeout_ms: 5_000,
            io_timeout_ms: 2_000,
            ..BenchConfig::default()
        };

        let recv_config = config.clone();
        let recv_task = tokio::spawn(async move {
            let recorder = Recorder::sink();
            run_all(&recv_config, Role::Receiver, &recorder).await
        });

        let recorder = Recorder::sink();
        run_all(&config, Role::Sender, &recorder).await.unwrap();
        recv_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_all_rejects_invalid_config() {
        let config = BenchConfig {
            bdp: 3,
            ..BenchConfig::default()
        };
        let recorder = Recorder::sink();
        let err = run_all(&config, Role::Sender, &recorder).await.unwrap_err();
        assert!(matches!(err, Error::Planning { .. }));
    }
}
