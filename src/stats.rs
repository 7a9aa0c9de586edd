//! 전송 통계

use std::time::{Duration, Instant};

/// 경로별 통계
#[derive(Debug, Clone)]
pub struct PathStats {
    /// 경로 ID
    pub path_id: usize,

    /// 연결 성립 여부 (Active 도달)
    pub connected: bool,

    /// 연결에 걸린 시간
    pub connect_time: Option<Duration>,

    /// 전송 완료된 범위 수
    pub extents_sent: u64,

    /// 송신 호출(배치) 수
    pub batches_sent: u64,

    /// 송신 바이트
    pub bytes_sent: u64,

    /// 실패 사유
    pub failure: Option<String>,
}

impl PathStats {
    pub fn new(path_id: usize) -> Self {
        Self {
            path_id,
            connected: false,
            connect_time: None,
            extents_sent: 0,
            batches_sent: 0,
            bytes_sent: 0,
            failure: None,
        }
    }

    /// 연결 성립 기록
    pub fn record_connected(&mut self, elapsed: Duration) {
        self.connected = true;
        self.connect_time = Some(elapsed);
    }

    /// 배치 송신 기록
    pub fn record_batch(&mut self, bytes: u64) {
        self.batches_sent += 1;
        self.bytes_sent += bytes;
    }

    /// 범위 완료 기록
    pub fn record_extent(&mut self) {
        self.extents_sent += 1;
    }

    pub fn record_failure(&mut self, reason: impl Into<String>) {
        self.failure = Some(reason.into());
    }
}

/// 전체 전송 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 열거된 범위 수
    pub total_extents: u64,

    /// 열거된 범위의 총 바이트 (헤더 제외)
    pub total_extent_bytes: u64,

    /// 경로별 통계 (시도 순서)
    pub paths: Vec<PathStats>,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_extents: 0,
            total_extent_bytes: 0,
            paths: Vec::new(),
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 새 경로 시도 시작
    pub fn begin_path(&mut self, path_id: usize) -> &mut PathStats {
        self.paths.push(PathStats::new(path_id));
        let last = self.paths.len() - 1;
        &mut self.paths[last]
    }

    /// 시도한 경로 수
    pub fn paths_attempted(&self) -> usize {
        self.paths.len()
    }

    /// 모든 경로에서 송신한 총 바이트 (실패 경로 포함)
    pub fn total_bytes(&self) -> u64 {
        self.paths.iter().map(|p| p.bytes_sent).sum()
    }

    pub fn total_batches(&self) -> u64 {
        self.paths.iter().map(|p| p.batches_sent).sum()
    }

    /// 전체 처리율 (bytes/sec)
    pub fn overall_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.total_bytes() as f64 / elapsed
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        let failed = self.paths.iter().filter(|p| p.failure.is_some()).count();
        format!(
            "Elapsed: {:.2}s | Extents: {} ({} bytes) | Sent: {} bytes in {} batches | Throughput: {:.2} MB/s | Paths: {} tried, {} failed",
            self.elapsed().as_secs_f64(),
            self.total_extents,
            self.total_extent_bytes,
            self.total_bytes(),
            self.total_batches(),
            self.overall_throughput() / 1_000_000.0,
            self.paths_attempted(),
            failed,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_accounting() {
        let mut stats = TransferStats::new();
        {
            let first = stats.begin_path(0);
            first.record_batch(100);
            first.record_failure("connection reset");
        }
        {
            let second = stats.begin_path(1);
            second.record_connected(Duration::from_millis(3));
            second.record_batch(4096);
            second.record_batch(32);
            second.record_extent();
        }

        assert_eq!(stats.paths_attempted(), 2);
        assert_eq!(stats.total_bytes(), 100 + 4096 + 32);
        assert_eq!(stats.total_batches(), 3);
        assert!(stats.paths[1].connected);
        assert!(stats.summary().contains("2 tried, 1 failed"));
    }
}
