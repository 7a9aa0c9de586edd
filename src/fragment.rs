//! 조각(Fragment) 정의 및 범위 → 조각 목록 변환
//!
//! - Fragment: 한 번의 scatter-gather 항목 (버퍼, 길이 ≤ MAX_FRAGMENT)
//! - FragmentList: 한 범위의 조각들 (헤더 → 널 가드 → 데이터 순)

use bytes::Bytes;

use crate::extent::MemoryExtent;
use crate::header::RangeHeader;
use crate::{Error, Result, MAX_FRAGMENT};

/// 조각이 가리키는 버퍼
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentData {
    /// 범위 헤더 바이트 (조각 목록이 소유)
    Header(Bytes),
    /// 0번지 대신 보내는 1바이트 가드 (조각 목록이 소유)
    NullGuard(Bytes),
    /// 물리 메모리 `address`부터의 구간
    Memory { address: u64 },
}

/// 송신 조각
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    data: FragmentData,
    length: u32,
}

impl Fragment {
    pub fn header(bytes: Bytes) -> Self {
        let length = bytes.len() as u32;
        Self {
            data: FragmentData::Header(bytes),
            length,
        }
    }

    pub fn null_guard(bytes: Bytes) -> Self {
        let length = bytes.len() as u32;
        Self {
            data: FragmentData::NullGuard(bytes),
            length,
        }
    }

    /// 메모리 구간 조각. 검증하지 않는다 (송신 엔진이 검사).
    pub fn memory(address: u64, length: u32) -> Self {
        Self {
            data: FragmentData::Memory { address },
            length,
        }
    }

    pub fn data(&self) -> &FragmentData {
        &self.data
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    /// 조각이 대표하는 물리 주소 (헤더는 없음, 널 가드는 0번지)
    pub fn address(&self) -> Option<u64> {
        match self.data {
            FragmentData::Header(_) => None,
            FragmentData::NullGuard(_) => Some(0),
            FragmentData::Memory { address } => Some(address),
        }
    }

    /// 널(0번지) 버퍼를 직접 가리키는 조각인지
    pub fn is_null_buffer(&self) -> bool {
        matches!(self.data, FragmentData::Memory { address: 0 })
    }
}

/// 한 범위에 대한 조각 목록
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentList {
    extent: MemoryExtent,
    fragments: Vec<Fragment>,
}

impl FragmentList {
    /// 임의 조각으로 목록 구성 (송신 엔진 검증용)
    pub fn from_fragments(extent: MemoryExtent, fragments: Vec<Fragment>) -> Self {
        Self { extent, fragments }
    }

    pub fn extent(&self) -> &MemoryExtent {
        &self.extent
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Fragment> {
        self.fragments.iter()
    }

    /// 모든 조각 길이 합
    pub fn total_length(&self) -> u64 {
        self.fragments.iter().map(|f| f.length as u64).sum()
    }

    /// 헤더 조각 바이트 (있으면)
    pub fn header_bytes(&self) -> Option<&[u8]> {
        self.fragments.first().and_then(|f| match &f.data {
            FragmentData::Header(bytes) => Some(bytes.as_ref()),
            _ => None,
        })
    }
}

impl<'a> IntoIterator for &'a FragmentList {
    type Item = &'a Fragment;
    type IntoIter = std::slice::Iter<'a, Fragment>;

    fn into_iter(self) -> Self::IntoIter {
        self.fragments.iter()
    }
}

/// 범위 → 조각 목록 변환기 (I/O 없음)
#[derive(Debug, Clone, Copy)]
pub struct FragmentBuilder {
    include_header: bool,
    max_fragment: u32,
}

impl FragmentBuilder {
    pub fn new(include_header: bool) -> Self {
        Self {
            include_header,
            max_fragment: MAX_FRAGMENT,
        }
    }

    /// 조각 최대 길이 변경 (1 이상)
    pub fn with_max_fragment(mut self, max_fragment: u32) -> Self {
        self.max_fragment = max_fragment.max(1);
        self
    }

    /// 한 범위를 조각 목록으로 변환
    ///
    /// 순서: [헤더] → [널 가드] → 데이터 조각 (오름차순, 빈틈/겹침 없음).
    /// 할당 실패 시 `OutOfMemory`; 만들던 버퍼는 반환 전에 해제된다.
    pub fn build(&self, extent: &MemoryExtent) -> Result<FragmentList> {
        let base = extent.base_address();
        let length = extent.length_bytes();
        let max = self.max_fragment as u64;
        let null_start = base == 0;

        // 0번지는 포인터로 표현할 수 없으므로 1번지부터 시작
        let (data_start, data_len) = if null_start {
            (1, length - 1)
        } else {
            (base, length)
        };

        let data_count = data_len.div_ceil(max);
        let prefix = usize::from(self.include_header) + usize::from(null_start);
        let total = usize::try_from(data_count)
            .ok()
            .and_then(|n| n.checked_add(prefix))
            .ok_or_else(|| Error::OutOfMemory(format!("조각 테이블: {} 조각", data_count)))?;

        let mut fragments = Vec::new();
        fragments
            .try_reserve_exact(total)
            .map_err(|e| Error::OutOfMemory(format!("조각 테이블: {}", e)))?;

        if self.include_header {
            let header = RangeHeader::for_range(base, length);
            let mut buf = Vec::new();
            buf.try_reserve_exact(RangeHeader::SIZE)
                .map_err(|e| Error::OutOfMemory(format!("범위 헤더: {}", e)))?;
            bincode::serialize_into(&mut buf, &header)?;
            fragments.push(Fragment::header(Bytes::from(buf)));
        }

        if null_start {
            let mut guard = Vec::new();
            guard
                .try_reserve_exact(1)
                .map_err(|e| Error::OutOfMemory(format!("널 가드: {}", e)))?;
            guard.push(0u8);
            fragments.push(Fragment::null_guard(Bytes::from(guard)));
        }

        for index in 0..data_count {
            let address = data_start + max * index;
            let remaining = data_len - max * index;
            let len = remaining.min(max) as u32;
            fragments.push(Fragment::memory(address, len));
        }

        Ok(FragmentList {
            extent: *extent,
            fragments,
        })
    }
}

impl Default for FragmentBuilder {
    fn default() -> Self {
        Self::new(true)
    }
}
