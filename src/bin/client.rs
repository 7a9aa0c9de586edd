//! limestream 송신자 - 물리 메모리를 원격 리스너로 스트리밍
//!
//! /proc/iomem 의 System RAM 범위를 열거하고, /dev/mem 에서 읽은 내용을
//! (선택적으로 LiME 범위 헤더와 함께) TCP로 전송한다.
//!
//! 사용법:
//!   cargo run --release --bin limestream-send -- -i <IP> [OPTIONS]
//!
//! 예시:
//!   # 기본 경로, LiME 헤더 포함
//!   limestream-send -i 192.168.1.10
//!
//!   # 원시 덤프, 두 개의 로컬 주소를 순서대로 시도
//!   limestream-send -i 192.168.1.10 --no-header --path 10.0.0.5 --path 192.168.1.20
//!
//!   # 메모리 이미지 파일을 단일 범위로 재전송
//!   limestream-send -i 127.0.0.1 --image dump.raw --image-base 0x100000

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use limestream::{
    CancelToken, Config, DeviceMemory, Error, ExtentSource, ImageMemory, IomemExtentSource,
    MemoryExtent, MemoryReader, PathList, RunReport, RunStatus, SessionController,
    StaticExtentSource, TcpConnector,
};

#[derive(Parser)]
#[command(name = "limestream-send")]
#[command(about = "Stream physical memory to a remote listener over TCP")]
struct Cli {
    /// 원격 리스너 IP
    #[arg(short, long)]
    ip: String,

    /// 원격 리스너 포트
    #[arg(short, long, default_value = "42424")]
    port: String,

    /// LiME 범위 헤더 생략 (원시 덤프)
    #[arg(long)]
    no_header: bool,

    /// 연결 타임아웃 (밀리초)
    #[arg(long, default_value_t = limestream::DEFAULT_CONNECT_TIMEOUT_MS)]
    timeout: u64,

    /// 시도할 로컬 주소 (순서대로, 반복 가능). 없으면 기본 라우팅
    #[arg(long = "path")]
    paths: Vec<IpAddr>,

    /// 메모리 맵 파일
    #[arg(long, default_value = IomemExtentSource::DEFAULT_PATH)]
    iomem: PathBuf,

    /// System RAM 이외 범위도 포함
    #[arg(long)]
    all_ranges: bool,

    /// 물리 메모리 장치
    #[arg(long, default_value = DeviceMemory::DEFAULT_PATH)]
    mem: PathBuf,

    /// 장치 대신 이미지 파일을 단일 범위로 전송
    #[arg(long, conflicts_with_all = ["iomem", "all_ranges", "mem"])]
    image: Option<PathBuf>,

    /// 이미지의 시작 물리 주소 (0x 접두 허용)
    #[arg(long, default_value = "0", value_parser = parse_address, requires = "image")]
    image_base: u64,
}

fn parse_address(value: &str) -> std::result::Result<u64, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("잘못된 주소 {}: {}", value, e))
}

fn build_config(cli: &Cli) -> limestream::Result<Config> {
    let mut config = Config::new()
        .header_enabled(!cli.no_header)
        .connect_timeout(Duration::from_millis(cli.timeout));
    config.set_remote_addr_str(&cli.ip)?;
    config.set_remote_port_str(&cli.port)?;
    config.validate()?;
    Ok(config)
}

async fn run<S, M>(config: Config, paths: PathList, source: &S, memory: &M) -> RunReport
where
    S: ExtentSource + ?Sized,
    M: MemoryReader + ?Sized,
{
    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("중단 요청 수신, 전송을 멈춥니다");
            on_signal.cancel();
        }
    });

    SessionController::new(config, TcpConnector::new(), paths)
        .run(source, memory, &cancel)
        .await
}

fn exit_with(status: RunStatus) -> ExitCode {
    ExitCode::from(status.exit_code() as u8)
}

#[tokio::main]
async fn main() -> ExitCode {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("로거 초기화 실패: {}", e);
    }

    let cli = Cli::parse();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return exit_with(RunStatus::from(&e));
        }
    };

    let paths = if cli.paths.is_empty() {
        PathList::default_route()
    } else {
        PathList::from_local_addrs(cli.paths.iter().copied())
    };

    info!("limestream-send starting...");
    info!("Target: {}", config.remote_socket_addr());
    info!("Header: {}", if config.header_enabled { "LiME" } else { "raw" });
    info!("Paths: {}", paths.len());

    let report = match &cli.image {
        Some(image) => {
            let memory = match ImageMemory::open(image, cli.image_base) {
                Ok(memory) => memory,
                Err(e) => {
                    error!("이미지 열기 실패 {}: {}", image.display(), e);
                    return exit_with(RunStatus::AccessDenied);
                }
            };
            if memory.is_empty() {
                error!("빈 이미지: {}", image.display());
                return exit_with(RunStatus::InvalidParameter);
            }
            let extent = match MemoryExtent::new(memory.base(), memory.len() as u64) {
                Ok(extent) => extent,
                Err(e) => {
                    error!("{}: {}", image.display(), e);
                    return exit_with(RunStatus::InvalidParameter);
                }
            };
            run(config, paths, &StaticExtentSource::new(vec![extent]), &memory).await
        }
        None => {
            let memory = match DeviceMemory::open(&cli.mem) {
                Ok(memory) => memory,
                Err(e) => {
                    let err = Error::AccessDenied(format!("{}: {}", cli.mem.display(), e));
                    error!("{}", err);
                    return exit_with(RunStatus::from(&err));
                }
            };
            let source = IomemExtentSource::new(&cli.iomem);
            let source = if cli.all_ranges { source.include_all() } else { source };
            run(config, paths, &source, &memory).await
        }
    };

    exit_with(report.status)
}
