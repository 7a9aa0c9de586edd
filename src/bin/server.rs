//! limestream 수신자 - 메모리 덤프 리스너
//!
//! 연결마다 memory.bin, memory1.bin, ... 파일로 저장한다.
//! `--split` 으로 LiME 헤더가 있는 덤프의 범위 목록을 출력할 수 있다.
//!
//! 사용법:
//!   cargo run --release --bin limestream-recv -- [OPTIONS]
//!
//! 예시:
//!   # 기본 포트(42424)에서 대기
//!   limestream-recv --output-dir ./dumps
//!
//!   # 수신한 LiME 덤프 검사
//!   limestream-recv --split ./dumps/memory.bin

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use limestream::receiver::ReceiverConfig;
use limestream::{CancelToken, LimeReader, Receiver};

#[derive(Parser)]
#[command(name = "limestream-recv")]
#[command(about = "Receive memory dumps streamed by limestream-send")]
struct Cli {
    /// 바인드 주소
    #[arg(short, long, default_value = "0.0.0.0:42424")]
    bind: SocketAddr,

    /// 덤프 저장 디렉토리
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// 읽기 유휴 타임아웃 (밀리초)
    #[arg(long, default_value_t = 1000)]
    idle_timeout: u64,

    /// 수신 대신 LiME 덤프의 범위 목록 출력
    #[arg(long, value_name = "DUMP")]
    split: Option<PathBuf>,
}

/// LiME 덤프의 범위 목록 출력
fn split(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let reader = LimeReader::new(BufReader::new(File::open(path)?));
    let mut total = 0u64;
    let mut count = 0usize;

    for record in reader {
        let record = record?;
        println!(
            "{:#014x}-{:#014x} {:>14} bytes @ offset {}",
            record.header.start_address,
            record.header.end_address,
            record.data_len(),
            record.data_offset
        );
        total += record.data_len();
        count += 1;
    }

    info!("{}: {} ranges, {} bytes", path.display(), count, total);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    if let Some(dump) = &cli.split {
        return split(dump).map_err(|e| {
            error!("{}: {}", dump.display(), e);
            e
        });
    }

    std::fs::create_dir_all(&cli.output_dir)?;

    info!("limestream-recv starting...");
    let mut receiver = Receiver::bind(ReceiverConfig {
        bind_addr: cli.bind,
        output_dir: cli.output_dir.clone(),
        idle_timeout: Duration::from_millis(cli.idle_timeout),
        ..ReceiverConfig::default()
    })
    .await?;

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("종료 요청 수신");
            on_signal.cancel();
        }
    });

    let dumps = receiver.run(&cancel).await?;
    let total: u64 = dumps.iter().map(|d| d.bytes).sum();
    info!("{} dumps, {} bytes total", dumps.len(), total);

    Ok(())
}
