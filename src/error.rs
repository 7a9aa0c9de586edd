//! 에러 타입 정의

use thiserror::Error;

/// limestream 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    /// 잘못된 조각 (길이 > 0 인데 널 버퍼, 빈 배치 등)
    #[error("유효하지 않은 인자: {0}")]
    InvalidArgument(String),

    /// 헤더/가드/조각 테이블 할당 실패
    #[error("메모리 부족: {0}")]
    OutOfMemory(String),

    /// 전송 계층이 보고한 configure/connect/send 실패
    #[error("전송 실패: {0}")]
    Transport(String),

    /// 로컬 주소가 아직 할당되지 않음 (재설정 대상)
    #[error("로컬 주소 할당 대기 중: {0}")]
    AddressPending(String),

    /// 연결 단계 타임아웃
    #[error("연결 타임아웃: {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// 사용자 취소
    #[error("사용자에 의해 중단됨")]
    Aborted,

    /// 잘못된 설정 (주소, 포트, 플래그)
    #[error("유효하지 않은 파라미터: {0}")]
    InvalidParameter(String),

    /// 사용 가능한 네트워크 경로 없음
    #[error("사용 가능한 네트워크 경로 없음")]
    NotFound,

    /// 메모리 맵 열거 실패
    #[error("메모리 맵 접근 실패: {0}")]
    AccessDenied(String),

    #[error("유효하지 않은 매직 넘버: expected {expected:08X}, got {got:08X}")]
    InvalidMagicNumber { expected: u32, got: u32 },

    #[error("유효하지 않은 헤더 버전: expected {expected}, got {got}")]
    InvalidVersion { expected: u32, got: u32 },

    /// 모든 경로가 전송 사유로 실패
    #[error("모든 경로 실패 ({attempted}개 시도)")]
    AllPathsFailed { attempted: usize },
}

impl Error {
    /// 취소 여부. 취소는 페일오버로 흡수되지 않는다.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Aborted)
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;

/// 실행 결과 분류 (호출자에게 노출)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Aborted,
    NotFound,
    InvalidParameter,
    AccessDenied,
    Failed,
}

impl RunStatus {
    /// 프로세스 종료 코드
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Failed => 1,
            RunStatus::InvalidParameter => 2,
            RunStatus::AccessDenied => 3,
            RunStatus::NotFound => 4,
            RunStatus::Aborted => 130,
        }
    }

    pub fn is_success(self) -> bool {
        self == RunStatus::Success
    }
}

impl From<&Error> for RunStatus {
    fn from(err: &Error) -> Self {
        match err {
            Error::Aborted => RunStatus::Aborted,
            Error::NotFound => RunStatus::NotFound,
            Error::InvalidParameter(_) => RunStatus::InvalidParameter,
            Error::AccessDenied(_) => RunStatus::AccessDenied,
            _ => RunStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_mapping() {
        assert_eq!(RunStatus::from(&Error::Aborted), RunStatus::Aborted);
        assert_eq!(RunStatus::from(&Error::NotFound), RunStatus::NotFound);
        assert_eq!(
            RunStatus::from(&Error::AccessDenied("iomem".into())),
            RunStatus::AccessDenied
        );
        assert_eq!(
            RunStatus::from(&Error::AllPathsFailed { attempted: 2 }),
            RunStatus::Failed
        );
        assert_eq!(
            RunStatus::from(&Error::Timeout { timeout_ms: 1000 }),
            RunStatus::Failed
        );
    }

    #[test]
    fn test_exit_codes_distinct() {
        let all = [
            RunStatus::Success,
            RunStatus::Aborted,
            RunStatus::NotFound,
            RunStatus::InvalidParameter,
            RunStatus::AccessDenied,
            RunStatus::Failed,
        ];
        let mut codes: Vec<i32> = all.iter().map(|s| s.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
        assert_eq!(RunStatus::Success.exit_code(), 0);
    }
}
