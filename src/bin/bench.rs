//! PTB 벤치마크 실행기 - Parallel Transfer Bench
//!
//! 두 호스트 간 전송 처리량을 백엔드 × 연결 전략 조합별로 측정
//! - 한쪽은 --receiver, 다른 쪽은 --sender 로 실행
//! - 시나리오별 결과는 results-<role>.result 에 한 줄씩 기록
//!
//! 사용법:
//!   cargo run --release --bin ptb-bench -- [OPTIONS]
//!
//! 예시:
//!   # 수신측 (먼저 실행)
//!   cargo run --release --bin ptb-bench -- --receiver
//!
//!   # 송신측
//!   cargo run --release --bin ptb-bench -- --sender --address 192.168.1.100

use std::net::IpAddr;

use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use ptb::record::Recorder;
use ptb::runner;
use ptb::worker::Role;
use ptb::BenchConfig;

/// CLI 인자
struct CliArgs {
    sender: bool,
    receiver: bool,
    show_version: bool,
    config: BenchConfig,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            sender: false,
            receiver: false,
            show_version: false,
            config: BenchConfig::default(),
        }
    }
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--sender" | "-s" => {
                cli.sender = true;
            }
            "--receiver" | "-r" => {
                cli.receiver = true;
            }
            "--address" | "-a" => {
                if i + 1 < args.len() {
                    let addr: IpAddr = args[i + 1].parse().expect("유효한 주소 필요");
                    cli.config.peer_addr = addr;
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    cli.config.base_port = args[i + 1].parse().expect("유효한 포트 필요");
                    i += 1;
                }
            }
            "--bdp" => {
                if i + 1 < args.len() {
                    cli.config.bdp = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--version" => {
                cli.show_version = true;
            }
            "--help" | "-h" => {
                println!(
                    r#"PTB Bench - Parallel Transfer Bench {}

두 호스트 간 점대점 전송 처리량 벤치마크
- BDP 기준 병렬 연결 수 자동 결정, 시나리오별 무결성 검증
- 백엔드(tcp/rudp) × 전략(single/multi) × 페이로드 4단계

사용법:
  cargo run --release --bin ptb-bench -- [OPTIONS]

옵션:
  -s, --sender           송신측으로 실행
  -r, --receiver         수신측으로 실행
  -a, --address <ADDR>   상대 피어 주소 (기본: 127.0.0.1)
  -p, --port <PORT>      베이스 포트 (기본: 8181)
      --bdp <BYTES>      대역폭-지연 곱 (기본: 125000)
      --version          버전 출력
  -h, --help             이 도움말 출력

포트 계약:
  단일 연결은 베이스 포트, 병렬 연결 i는 베이스 + 1 + i 를 쓴다.
  양쪽이 같은 베이스 포트로 실행해야 한다.

예시:
  # 수신측 (먼저 실행)
  cargo run --release --bin ptb-bench -- --receiver

  # 송신측
  cargo run --release --bin ptb-bench -- --sender -a 192.168.1.100 -p 8181
"#,
                    env!("CARGO_PKG_VERSION")
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    cli
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = parse_args();

    if cli.show_version {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // 역할 확인은 어떤 소켓도 열기 전에 한다
    let role = match Role::from_flags(cli.sender, cli.receiver) {
        Ok(role) => role,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    info!("PTB Bench starting... (role: {})", role.label());
    if role == Role::Sender {
        info!("sending to ip {}", cli.config.peer_addr);
    }

    // 결과 파일을 못 열어도 벤치마크는 돌린다 (기록만 버려짐)
    let result_file = Recorder::result_file_name(role);
    let recorder = match Recorder::to_file(&result_file) {
        Ok(recorder) => {
            info!("results file: {}", result_file);
            recorder
        }
        Err(e) => {
            error!("결과 파일 초기화 실패: {}", e);
            Recorder::sink()
        }
    };

    if let Err(e) = runner::run_all(&cli.config, role, &recorder).await {
        error!("벤치마크 실패: {}", e);
    }

    Ok(())
}
