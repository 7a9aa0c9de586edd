//! LiME 범위 헤더 (Version 1)
//!
//! ```text
//! +--------+---------+----------------+----------------+------------+
//! | magic  | version | start_address  | end_address    | reserved   |
//! | u32 LE | u32 LE  | u64 LE         | u64 LE (incl.) | 8 x 0x00   |
//! +--------+---------+----------------+----------------+------------+
//!   0        4         8                16               24        32
//! ```

use std::io::{self, Read, Seek, SeekFrom};

use serde::{Deserialize, Serialize};

use crate::{Error, Result, LIME_MAGIC, LIME_VERSION};

/// LiME 범위 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeHeader {
    pub magic: u32,
    pub version: u32,
    pub start_address: u64,
    /// 포함(inclusive) 끝 주소
    pub end_address: u64,
    pub reserved: [u8; 8],
}

impl RangeHeader {
    /// 직렬화 크기 (바이트)
    pub const SIZE: usize = 32;

    /// `[start, start + length)` 범위의 헤더. `length`는 0보다 커야 한다.
    pub fn for_range(start_address: u64, length: u64) -> Self {
        Self {
            magic: LIME_MAGIC,
            version: LIME_VERSION,
            start_address,
            end_address: start_address.wrapping_add(length).wrapping_sub(1),
            reserved: [0; 8],
        }
    }

    /// 범위 길이 (바이트)
    pub fn range_len(&self) -> u64 {
        self.end_address
            .wrapping_sub(self.start_address)
            .wrapping_add(1)
    }

    /// 헤더를 바이트로 직렬화 (bincode 기본 설정 = 고정폭 little-endian)
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// 바이트에서 헤더 역직렬화 및 검증
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Error::InvalidArgument(format!(
                "헤더 길이 부족: {} < {}",
                bytes.len(),
                Self::SIZE
            )));
        }
        let header: RangeHeader = bincode::deserialize(&bytes[..Self::SIZE])?;
        header.validate()?;
        Ok(header)
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != LIME_MAGIC {
            return Err(Error::InvalidMagicNumber {
                expected: LIME_MAGIC,
                got: self.magic,
            });
        }
        if self.version != LIME_VERSION {
            return Err(Error::InvalidVersion {
                expected: LIME_VERSION,
                got: self.version,
            });
        }
        if self.end_address < self.start_address {
            return Err(Error::InvalidArgument(format!(
                "끝 주소 < 시작 주소: {:#x} < {:#x}",
                self.end_address, self.start_address
            )));
        }
        // 전체 주소 공간은 u64 길이로 표현할 수 없다
        if self.end_address - self.start_address == u64::MAX {
            return Err(Error::InvalidArgument(format!(
                "범위 길이 초과: {:#x}-{:#x}",
                self.start_address, self.end_address
            )));
        }
        Ok(())
    }
}

/// LiME 스트림 내 범위 레코드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimeRecord {
    pub header: RangeHeader,
    /// 스트림 내 데이터 시작 오프셋
    pub data_offset: u64,
}

impl LimeRecord {
    pub fn data_len(&self) -> u64 {
        self.header.range_len()
    }
}

/// 수신된 LiME 스트림을 범위 단위로 순회
pub struct LimeReader<R> {
    inner: R,
    position: u64,
    failed: bool,
}

impl<R: Read + Seek> LimeReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            position: 0,
            failed: false,
        }
    }

    fn next_record(&mut self) -> Result<Option<LimeRecord>> {
        let mut buf = [0u8; RangeHeader::SIZE];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.inner.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        if filled < buf.len() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("오프셋 {}에서 잘린 헤더", self.position),
            )));
        }

        let header = RangeHeader::from_bytes(&buf)?;
        let data_offset = self.position + RangeHeader::SIZE as u64;
        let data_len = header.range_len();

        // 데이터 영역 건너뛰기, 스트림 끝을 넘으면 잘린 스트림
        let data_end = data_offset.checked_add(data_len).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "범위 {:#x}-{:#x}: 오프셋 {}에서 길이 초과",
                header.start_address, header.end_address, data_offset
            ))
        })?;
        let end = self.inner.seek(SeekFrom::End(0))?;
        if data_end > end {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "범위 {:#x}-{:#x} 데이터가 잘림 ({} / {} bytes)",
                    header.start_address,
                    header.end_address,
                    end.saturating_sub(data_offset),
                    data_len
                ),
            )));
        }
        self.position = self.inner.seek(SeekFrom::Start(data_end))?;

        Ok(Some(LimeRecord {
            header,
            data_offset,
        }))
    }
}

impl<R: Read + Seek> Iterator for LimeReader<R> {
    type Item = Result<LimeRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_wire_layout() {
        let header = RangeHeader::for_range(0x1000, 0x2000);
        let bytes = header.to_bytes().unwrap();

        assert_eq!(bytes.len(), RangeHeader::SIZE);
        assert_eq!(&bytes[0..4], b"EMiL"); // 0x4C694D45 LE
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(&bytes[8..16], &0x1000u64.to_le_bytes());
        assert_eq!(&bytes[16..24], &0x2FFFu64.to_le_bytes());
        assert_eq!(&bytes[24..32], &[0u8; 8]);
    }

    #[test]
    fn test_header_parse_and_validate() {
        let header = RangeHeader::for_range(0, 4096);
        let bytes = header.to_bytes().unwrap();
        let parsed = RangeHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.range_len(), 4096);

        let mut bad = bytes.clone();
        bad[0] = 0;
        assert!(matches!(
            RangeHeader::from_bytes(&bad),
            Err(Error::InvalidMagicNumber { .. })
        ));

        let mut bad = bytes;
        bad[4] = 2;
        assert!(matches!(
            RangeHeader::from_bytes(&bad),
            Err(Error::InvalidVersion { expected: 1, got: 2 })
        ));

        assert!(RangeHeader::from_bytes(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_lime_reader_walks_ranges() {
        let mut stream = Vec::new();
        stream.extend(RangeHeader::for_range(0x1000, 16).to_bytes().unwrap());
        stream.extend([0xAA; 16]);
        stream.extend(RangeHeader::for_range(0x8000, 4).to_bytes().unwrap());
        stream.extend([0xBB; 4]);

        let records: Vec<LimeRecord> = LimeReader::new(Cursor::new(stream))
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].header.start_address, 0x1000);
        assert_eq!(records[0].data_offset, 32);
        assert_eq!(records[0].data_len(), 16);
        assert_eq!(records[1].header.end_address, 0x8003);
        assert_eq!(records[1].data_offset, 32 + 16 + 32);
    }

    #[test]
    fn test_lime_reader_truncated_stream() {
        let mut stream = RangeHeader::for_range(0x1000, 16).to_bytes().unwrap();
        stream.extend([0u8; 8]);

        let mut reader = LimeReader::new(Cursor::new(stream));
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }

    fn raw_header(start_address: u64, end_address: u64) -> Vec<u8> {
        let header = RangeHeader {
            start_address,
            end_address,
            ..RangeHeader::for_range(0, 1)
        };
        bincode::serialize(&header).unwrap()
    }

    #[test]
    fn test_lime_reader_oversized_range() {
        // 데이터 오프셋 + 길이가 u64를 넘는 헤더
        let mut stream = raw_header(0x10, u64::MAX);
        stream.extend([0u8; 16]);

        let mut reader = LimeReader::new(Cursor::new(stream));
        assert!(matches!(reader.next(), Some(Err(Error::InvalidArgument(_)))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_header_rejects_full_address_space() {
        let bytes = raw_header(0, u64::MAX);
        assert!(matches!(
            RangeHeader::from_bytes(&bytes),
            Err(Error::InvalidArgument(_))
        ));

        let mut reader = LimeReader::new(Cursor::new(bytes));
        assert!(matches!(reader.next(), Some(Err(Error::InvalidArgument(_)))));
    }
}
