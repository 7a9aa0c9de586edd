//! 물리 메모리 범위 (extent) 와 범위 공급자
//!
//! - MemoryDescriptor: 페이지 단위 메모리 맵 레코드
//! - MemoryExtent: 바이트 단위로 변환된 전송 대상 범위

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{Error, Result, PAGE_SIZE};

/// 메모리 맵 영역 종류 (로그 용도, 전송 여부에는 영향 없음)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryType {
    Conventional,
    Reserved,
    LoaderCode,
    LoaderData,
    BootServices,
    RuntimeServices,
    AcpiReclaim,
    AcpiNvs,
    Mmio,
    Persistent,
    Unusable,
    Other,
}

impl MemoryType {
    /// /proc/iomem 항목 이름으로부터 분류
    pub fn from_iomem_name(name: &str) -> Self {
        match name {
            "System RAM" => MemoryType::Conventional,
            "Reserved" | "reserved" => MemoryType::Reserved,
            "ACPI Tables" => MemoryType::AcpiReclaim,
            "ACPI Non-volatile Storage" => MemoryType::AcpiNvs,
            "Persistent Memory" | "Persistent Memory (legacy)" => MemoryType::Persistent,
            "Unusable memory" => MemoryType::Unusable,
            n if n.starts_with("PCI") => MemoryType::Mmio,
            _ => MemoryType::Other,
        }
    }
}

/// 페이지 단위 메모리 맵 레코드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryDescriptor {
    pub physical_start: u64,
    pub number_of_pages: u64,
    pub kind: MemoryType,
}

impl MemoryDescriptor {
    pub fn new(physical_start: u64, number_of_pages: u64, kind: MemoryType) -> Self {
        Self {
            physical_start,
            number_of_pages,
            kind,
        }
    }

    /// 바이트 단위 범위로 변환. 0 페이지 레코드는 `None`.
    pub fn to_extent(&self) -> Result<Option<MemoryExtent>> {
        if self.number_of_pages == 0 {
            return Ok(None);
        }
        let length = self
            .number_of_pages
            .checked_mul(PAGE_SIZE)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "페이지 수 오버플로우: {} pages @ {:#x}",
                    self.number_of_pages, self.physical_start
                ))
            })?;
        MemoryExtent::new(self.physical_start, length).map(Some)
    }
}

/// 전송 대상 물리 메모리 범위. `length_bytes > 0` 이 항상 성립한다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryExtent {
    base_address: u64,
    length_bytes: u64,
}

impl MemoryExtent {
    pub fn new(base_address: u64, length_bytes: u64) -> Result<Self> {
        if length_bytes == 0 {
            return Err(Error::InvalidArgument(format!(
                "길이 0인 범위 @ {:#x}",
                base_address
            )));
        }
        if base_address.checked_add(length_bytes - 1).is_none() {
            return Err(Error::InvalidArgument(format!(
                "주소 공간을 넘는 범위: {:#x} + {:#x}",
                base_address, length_bytes
            )));
        }
        Ok(Self {
            base_address,
            length_bytes,
        })
    }

    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    pub fn length_bytes(&self) -> u64 {
        self.length_bytes
    }

    /// 포함(inclusive) 끝 주소
    pub fn end_address(&self) -> u64 {
        self.base_address + (self.length_bytes - 1)
    }
}

impl fmt::Display for MemoryExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#014x}-{:#014x}", self.base_address, self.end_address())
    }
}

/// 범위 공급자. 전송 시작 전에 한 번 열거된다.
pub trait ExtentSource {
    fn extents(&self) -> Result<Vec<MemoryExtent>>;
}

/// 고정 범위 목록
#[derive(Debug, Clone, Default)]
pub struct StaticExtentSource {
    extents: Vec<MemoryExtent>,
}

impl StaticExtentSource {
    pub fn new(extents: Vec<MemoryExtent>) -> Self {
        Self { extents }
    }

    /// 페이지 단위 메모리 맵으로부터 생성 (0 페이지 레코드는 제외)
    pub fn from_descriptors(descriptors: &[MemoryDescriptor]) -> Result<Self> {
        let mut extents = Vec::with_capacity(descriptors.len());
        for desc in descriptors {
            match desc.to_extent()? {
                Some(extent) => {
                    debug!("메모리 맵: {} {:?}", extent, desc.kind);
                    extents.push(extent);
                }
                None => warn!(
                    "0 페이지 디스크립터 무시: {:#x} {:?}",
                    desc.physical_start, desc.kind
                ),
            }
        }
        Ok(Self { extents })
    }
}

impl ExtentSource for StaticExtentSource {
    fn extents(&self) -> Result<Vec<MemoryExtent>> {
        Ok(self.extents.clone())
    }
}

/// Linux `/proc/iomem` 기반 범위 공급자
#[derive(Debug, Clone)]
pub struct IomemExtentSource {
    path: PathBuf,
    ram_only: bool,
}

impl IomemExtentSource {
    pub const DEFAULT_PATH: &'static str = "/proc/iomem";

    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ram_only: true,
        }
    }

    /// "System RAM" 외 최상위 항목도 포함
    pub fn include_all(mut self) -> Self {
        self.ram_only = false;
        self
    }

    /// iomem 텍스트 파싱. 들여쓰기 된 하위 항목은 부모에 포함되므로 건너뛴다.
    pub fn parse(text: &str, ram_only: bool) -> Result<Vec<MemoryExtent>> {
        let mut extents = Vec::new();
        let mut saw_entries = false;

        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() || line.starts_with(char::is_whitespace) {
                continue;
            }

            let (range, name) = line.split_once(" : ").ok_or_else(|| {
                Error::AccessDenied(format!("iomem {}행 형식 오류: {:?}", lineno + 1, line))
            })?;
            let (start, end) = range.split_once('-').ok_or_else(|| {
                Error::AccessDenied(format!("iomem {}행 범위 오류: {:?}", lineno + 1, range))
            })?;
            let start = u64::from_str_radix(start.trim(), 16)
                .map_err(|e| Error::AccessDenied(format!("iomem {}행: {}", lineno + 1, e)))?;
            let end = u64::from_str_radix(end.trim(), 16)
                .map_err(|e| Error::AccessDenied(format!("iomem {}행: {}", lineno + 1, e)))?;

            saw_entries = true;
            let kind = MemoryType::from_iomem_name(name.trim());
            if ram_only && kind != MemoryType::Conventional {
                continue;
            }
            if end < start || (start == 0 && end == 0) {
                continue;
            }

            let len = (end - start).checked_add(1).ok_or_else(|| {
                Error::AccessDenied(format!("iomem {}행: 범위 길이 초과 {:?}", lineno + 1, range))
            })?;
            extents.push(MemoryExtent::new(start, len)?);
        }

        // 권한이 없으면 커널이 모든 주소를 0으로 가린다
        if saw_entries && extents.is_empty() {
            return Err(Error::AccessDenied(
                "iomem에 읽을 수 있는 범위가 없음 (root 권한 필요)".into(),
            ));
        }
        Ok(extents)
    }
}

impl Default for IomemExtentSource {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PATH)
    }
}

impl ExtentSource for IomemExtentSource {
    fn extents(&self) -> Result<Vec<MemoryExtent>> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::AccessDenied(format!("{}: {}", self.path.display(), e))
        })?;
        Self::parse(&text, self.ram_only)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IOMEM: &str = "\
00000000-00000fff : Reserved
00001000-0009fbff : System RAM
0009fc00-0009ffff : Reserved
000a0000-000bffff : PCI Bus 0000:00
00100000-bffdffff : System RAM
  01000000-01e0280e : Kernel code
  01e0280f-0264fc3f : Kernel data
bffe0000-bfffffff : Reserved
100000000-23fffffff : System RAM
";

    #[test]
    fn test_extent_invariants() {
        assert!(matches!(MemoryExtent::new(0x1000, 0), Err(Error::InvalidArgument(_))));
        assert!(MemoryExtent::new(u64::MAX, 1).is_ok());
        assert!(MemoryExtent::new(u64::MAX, 2).is_err());

        let extent = MemoryExtent::new(0x1000, 0x1000).unwrap();
        assert_eq!(extent.end_address(), 0x1FFF);
    }

    #[test]
    fn test_descriptor_ingestion() {
        let descriptors = [
            MemoryDescriptor::new(0, 160, MemoryType::Conventional),
            MemoryDescriptor::new(0xA0000, 0, MemoryType::Reserved),
            MemoryDescriptor::new(0x100000, 0x10000, MemoryType::BootServices),
        ];
        let source = StaticExtentSource::from_descriptors(&descriptors).unwrap();
        let extents = source.extents().unwrap();

        assert_eq!(extents.len(), 2);
        assert_eq!(extents[0].length_bytes(), 160 * 4096);
        assert_eq!(extents[1].base_address(), 0x100000);
        assert_eq!(extents[1].length_bytes(), 0x10000 * 4096);
    }

    #[test]
    fn test_iomem_ram_only() {
        let extents = IomemExtentSource::parse(IOMEM, true).unwrap();
        assert_eq!(extents.len(), 3);
        assert_eq!(extents[0].base_address(), 0x1000);
        assert_eq!(extents[0].length_bytes(), 0x9ec00);
        assert_eq!(extents[1].end_address(), 0xbffdffff);
        assert_eq!(extents[2].base_address(), 0x1_0000_0000);
        assert_eq!(extents[2].length_bytes(), 0x1_4000_0000);
    }

    #[test]
    fn test_iomem_all_top_level() {
        let extents = IomemExtentSource::parse(IOMEM, false).unwrap();
        assert_eq!(extents.len(), 7);
        assert_eq!(extents[0].base_address(), 0);
        assert_eq!(extents[0].length_bytes(), 0x1000);
    }

    #[test]
    fn test_iomem_full_address_space_entry() {
        let text = "0000000000000000-ffffffffffffffff : PCI mem\n";
        assert!(matches!(
            IomemExtentSource::parse(text, false),
            Err(Error::AccessDenied(_))
        ));
        // RAM만 볼 때는 걸러진다
        assert!(matches!(
            IomemExtentSource::parse(text, true),
            Err(Error::AccessDenied(_))
        ));
    }

    #[test]
    fn test_iomem_masked_addresses() {
        let masked = "\
00000000-00000000 : Reserved
00000000-00000000 : System RAM
";
        assert!(matches!(
            IomemExtentSource::parse(masked, true),
            Err(Error::AccessDenied(_))
        ));
        assert!(matches!(
            IomemExtentSource::parse("garbage line", true),
            Err(Error::AccessDenied(_))
        ));
    }

    #[test]
    fn test_missing_iomem_file() {
        let source = IomemExtentSource::new("/nonexistent/iomem");
        assert!(matches!(source.extents(), Err(Error::AccessDenied(_))));
    }
}
