//! 송신 엔진
//!
//! 한 범위의 조각 목록을 32비트 한도 안의 배치로 묶어 순서대로 송신한다.

use tracing::debug;

use crate::cancel::CancelToken;
use crate::fragment::{Fragment, FragmentList};
use crate::memory::MemoryReader;
use crate::transport::Connection;
use crate::{Error, Result, MAX_FRAGMENT};

/// 한 번의 송신 호출로 보내는 조각 묶음 (합계 ≤ 배치 한도, 비어 있지 않음)
#[derive(Debug, Clone)]
pub struct TransmitBatch<'a> {
    fragments: Vec<&'a Fragment>,
    length: u32,
}

impl<'a> TransmitBatch<'a> {
    pub fn fragments(&self) -> &[&'a Fragment] {
        &self.fragments
    }

    /// 배치 총 길이
    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// 조각 목록 → 배치 순회자
///
/// 길이 0 조각은 건너뛰고, 널 버퍼 조각이나 빈 배치를 만나면
/// `InvalidArgument` 하나를 내고 끝난다.
pub struct Batches<'a> {
    fragments: &'a [Fragment],
    position: usize,
    max_batch: u64,
    failed: bool,
}

impl<'a> Batches<'a> {
    pub fn new(list: &'a FragmentList, max_batch: u32) -> Self {
        Self {
            fragments: list.fragments(),
            position: 0,
            max_batch: max_batch as u64,
            failed: false,
        }
    }

    fn fail(&mut self, reason: String) -> Option<Result<TransmitBatch<'a>>> {
        self.failed = true;
        Some(Err(Error::InvalidArgument(reason)))
    }
}

impl<'a> Iterator for Batches<'a> {
    type Item = Result<TransmitBatch<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.position >= self.fragments.len() {
            return None;
        }

        let mut batch = Vec::new();
        let mut length = 0u64;

        while let Some(fragment) = self.fragments.get(self.position) {
            if fragment.length() == 0 {
                self.position += 1;
                continue;
            }
            if fragment.is_null_buffer() {
                return self.fail(format!(
                    "조각 {}: 널 버퍼 (길이 {})",
                    self.position,
                    fragment.length()
                ));
            }
            // 넘치면 이 조각 없이 배치를 닫는다
            if length + fragment.length() as u64 > self.max_batch {
                break;
            }

            length += fragment.length() as u64;
            batch.push(fragment);
            self.position += 1;
        }

        if batch.is_empty() {
            return self.fail(format!("조각 {}: 빈 배치", self.position));
        }

        Some(Ok(TransmitBatch {
            fragments: batch,
            length: length as u32,
        }))
    }
}

/// 한 범위 송신 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtentReport {
    pub batches: u64,
    pub bytes: u64,
}

/// 송신 엔진
#[derive(Debug, Clone, Copy)]
pub struct TransmitEngine {
    max_batch: u32,
}

impl TransmitEngine {
    pub fn new() -> Self {
        Self {
            max_batch: MAX_FRAGMENT,
        }
    }

    /// 배치 한도 변경 (1 이상)
    pub fn with_max_batch(mut self, max_batch: u32) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    pub fn max_batch(&self) -> u32 {
        self.max_batch
    }

    /// 조각 목록의 배치 계획 (I/O 없음)
    pub fn batches<'a>(&self, list: &'a FragmentList) -> Batches<'a> {
        Batches::new(list, self.max_batch)
    }

    /// 한 범위 송신
    ///
    /// 조각 목록(헤더, 널 가드 포함)은 이 호출이 소유하며 어떤 경로로
    /// 반환하든 해제된다. `on_batch`는 완료된 배치마다 길이와 함께 호출된다.
    pub async fn transmit<C, M>(
        &self,
        conn: &mut C,
        list: FragmentList,
        memory: &M,
        cancel: &CancelToken,
        mut on_batch: impl FnMut(u32),
    ) -> Result<ExtentReport>
    where
        C: Connection,
        M: MemoryReader + ?Sized,
    {
        if list.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "범위 {}: 조각 없음",
                list.extent()
            )));
        }

        let mut report = ExtentReport::default();

        for batch in self.batches(&list) {
            cancel.check()?;
            let batch = batch?;

            let result = conn.transmit(&batch, memory, cancel).await;

            // 송신 중 취소가 관찰되면 전송 계층 결과와 무관하게 중단
            if cancel.is_cancelled() {
                return Err(Error::Aborted);
            }
            result?;

            debug!(
                "범위 {} 배치 {}: {} 조각, {} bytes",
                list.extent(),
                report.batches,
                batch.len(),
                batch.length()
            );
            report.batches += 1;
            report.bytes += batch.length() as u64;
            on_batch(batch.length());
        }

        Ok(report)
    }
}

impl Default for TransmitEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extent::MemoryExtent;
    use crate::fragment::{FragmentBuilder, FragmentData};
    use crate::header::RangeHeader;
    use crate::memory::ImageMemory;

    /// 배치 길이만 기록하고 바이트는 읽지 않는 연결
    #[derive(Default)]
    struct RecordingConnection {
        batches: Vec<Vec<u32>>,
        fail_at: Option<usize>,
        cancel_during: Option<(usize, CancelToken)>,
    }

    impl Connection for RecordingConnection {
        async fn transmit<M: MemoryReader + ?Sized>(
            &mut self,
            batch: &TransmitBatch<'_>,
            _memory: &M,
            _cancel: &CancelToken,
        ) -> Result<()> {
            let index = self.batches.len();
            self.batches
                .push(batch.fragments().iter().map(|f| f.length()).collect());
            if let Some((at, token)) = &self.cancel_during {
                if *at == index {
                    token.cancel();
                }
            }
            if self.fail_at == Some(index) {
                return Err(Error::Transport("connection reset".into()));
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn extent(base: u64, len: u64) -> MemoryExtent {
        MemoryExtent::new(base, len).unwrap()
    }

    fn empty_memory() -> ImageMemory {
        ImageMemory::new(0, Vec::new())
    }

    #[test]
    fn test_large_extent_batching() {
        let list = FragmentBuilder::new(true)
            .build(&extent(0x1_0000_0000, (1u64 << 32) + 10))
            .unwrap();
        let batches: Vec<_> = TransmitEngine::new()
            .batches(&list)
            .collect::<Result<_>>()
            .unwrap();

        // 헤더 + (2^32 - 1) 은 한도를 넘으므로 헤더가 단독 배치가 된다
        let lengths: Vec<u32> = batches.iter().map(|b| b.length()).collect();
        assert_eq!(lengths, vec![RangeHeader::SIZE as u32, u32::MAX, 11]);
        assert!(batches.iter().all(|b| !b.is_empty()));
    }

    #[test]
    fn test_small_fragments_coalesce() {
        let fragments = (0..10)
            .map(|i| Fragment::memory(0x1000 + i * 100, 100))
            .collect();
        let list = FragmentList::from_fragments(extent(0x1000, 1000), fragments);

        let lengths: Vec<u32> = TransmitEngine::new()
            .with_max_batch(350)
            .batches(&list)
            .map(|b| b.unwrap().length())
            .collect();
        assert_eq!(lengths, vec![300, 300, 300, 100]);
    }

    #[test]
    fn test_zero_length_skipped_null_buffer_fatal() {
        let list = FragmentList::from_fragments(
            extent(0x1000, 8),
            vec![
                Fragment::memory(0x1000, 4),
                Fragment::memory(0, 0),
                Fragment::memory(0x1004, 4),
            ],
        );
        let batches: Vec<_> = TransmitEngine::new()
            .batches(&list)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[0].length(), 8);

        let list = FragmentList::from_fragments(
            extent(0, 8),
            vec![Fragment::memory(0, 8)],
        );
        let mut iter = TransmitEngine::new().batches(&list);
        assert!(matches!(iter.next(), Some(Err(Error::InvalidArgument(_)))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_all_zero_fragments_is_error() {
        let list = FragmentList::from_fragments(
            extent(0x1000, 1),
            vec![Fragment::memory(0x1000, 0), Fragment::memory(0x1000, 0)],
        );
        let mut iter = TransmitEngine::new().batches(&list);
        assert!(matches!(iter.next(), Some(Err(Error::InvalidArgument(_)))));
    }

    #[test]
    fn test_oversized_fragment_for_bound_is_error() {
        let list = FragmentList::from_fragments(
            extent(0x1000, 500),
            vec![Fragment::memory(0x1000, 500)],
        );
        let mut iter = TransmitEngine::new().with_max_batch(100).batches(&list);
        assert!(matches!(iter.next(), Some(Err(Error::InvalidArgument(_)))));
    }

    #[tokio::test]
    async fn test_transmit_reports_batches() {
        let list = FragmentBuilder::new(true)
            .build(&extent(0x1_0000_0000, (1u64 << 32) + 10))
            .unwrap();
        let mut conn = RecordingConnection::default();
        let mut seen = Vec::new();

        let report = TransmitEngine::new()
            .transmit(&mut conn, list, &empty_memory(), &CancelToken::new(), |n| {
                seen.push(n)
            })
            .await
            .unwrap();

        assert_eq!(report.batches, 3);
        assert_eq!(report.bytes, RangeHeader::SIZE as u64 + (1u64 << 32) + 10);
        assert_eq!(conn.batches.len(), 3);
        assert_eq!(seen, vec![RangeHeader::SIZE as u32, u32::MAX, 11]);
    }

    #[tokio::test]
    async fn test_transmit_stops_on_first_error() {
        let list = FragmentBuilder::new(false)
            .with_max_fragment(10)
            .build(&extent(0x1000, 50))
            .unwrap();
        let mut conn = RecordingConnection {
            fail_at: Some(1),
            ..Default::default()
        };

        let err = TransmitEngine::new()
            .with_max_batch(20)
            .transmit(&mut conn, list, &empty_memory(), &CancelToken::new(), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(conn.batches.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_overrides_transport_success() {
        let list = FragmentBuilder::new(false)
            .with_max_fragment(10)
            .build(&extent(0x1000, 50))
            .unwrap();
        let cancel = CancelToken::new();
        let mut conn = RecordingConnection {
            cancel_during: Some((0, cancel.clone())),
            ..Default::default()
        };

        let err = TransmitEngine::new()
            .with_max_batch(20)
            .transmit(&mut conn, list, &empty_memory(), &cancel, |_| {})
            .await
            .unwrap_err();

        assert!(err.is_aborted());
        assert_eq!(conn.batches.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_list_is_invalid() {
        let list = FragmentList::from_fragments(extent(0x1000, 1), Vec::new());
        let mut conn = RecordingConnection::default();
        let err = TransmitEngine::new()
            .transmit(&mut conn, list, &empty_memory(), &CancelToken::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(conn.batches.is_empty());
    }

    #[test]
    fn test_null_guard_is_not_null_buffer() {
        let list = FragmentBuilder::new(false).build(&extent(0, 4096)).unwrap();
        let batches: Vec<_> = TransmitEngine::new()
            .batches(&list)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(batches.len(), 1);
        assert!(matches!(
            batches[0].fragments()[0].data(),
            FragmentData::NullGuard(_)
        ));
        assert_eq!(batches[0].length(), 4096);
    }
}
