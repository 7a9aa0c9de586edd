//! 물리 메모리 읽기
//!
//! 조각은 주소만 가리키고, 실제 바이트는 송신 시점에 `MemoryReader`로 읽는다.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Bytes;
use parking_lot::Mutex;

/// 물리 주소 공간 읽기 인터페이스
pub trait MemoryReader {
    /// `address`부터 `buf.len()` 바이트를 읽는다. 일부만 읽히면 에러.
    fn read_at(&self, address: u64, buf: &mut [u8]) -> io::Result<()>;
}

impl<M: MemoryReader + ?Sized> MemoryReader for &M {
    fn read_at(&self, address: u64, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_at(address, buf)
    }
}

/// 특정 기준 주소에 놓인 메모리 이미지
#[derive(Debug, Clone)]
pub struct ImageMemory {
    base: u64,
    data: Bytes,
}

impl ImageMemory {
    pub fn new(base: u64, data: impl Into<Bytes>) -> Self {
        Self {
            base,
            data: data.into(),
        }
    }

    /// 파일 전체를 읽어 `base`에 배치
    pub fn open(path: impl AsRef<Path>, base: u64) -> io::Result<Self> {
        let data = std::fs::read(path)?;
        Ok(Self::new(base, data))
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl MemoryReader for ImageMemory {
    fn read_at(&self, address: u64, buf: &mut [u8]) -> io::Result<()> {
        let out_of_range = || {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "이미지 범위 밖 읽기: {:#x}+{:#x} (이미지 {:#x}+{:#x})",
                    address,
                    buf.len(),
                    self.base,
                    self.data.len()
                ),
            )
        };

        let offset = address.checked_sub(self.base).ok_or_else(out_of_range)?;
        let offset = usize::try_from(offset).map_err(|_| out_of_range())?;
        let end = offset.checked_add(buf.len()).ok_or_else(out_of_range)?;
        if end > self.data.len() {
            return Err(out_of_range());
        }

        buf.copy_from_slice(&self.data[offset..end]);
        Ok(())
    }
}

/// 장치 파일(`/dev/mem` 등)의 물리 주소 = 파일 오프셋 읽기
#[derive(Debug)]
pub struct DeviceMemory {
    file: Mutex<File>,
}

impl DeviceMemory {
    pub const DEFAULT_PATH: &'static str = "/dev/mem";

    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            file: Mutex::new(File::open(path)?),
        })
    }
}

impl MemoryReader for DeviceMemory {
    fn read_at(&self, address: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(address))?;
        file.read_exact(buf)
    }
}
