//! File checksum algorithms from the SANA checksum identifier registry.
//!
//! The CRC variants need the file data in order. The modular checksum is a sum of big-endian
//! 32 bit words aligned to the start of the file, so [ModularChecksum::update_at] can be fed
//! with segments in any order and still yields the checksum of the whole file.
use crc::{Crc, Digest, CRC_32_ISCSI, CRC_32_ISO_HDLC};

use crate::pdu::ChecksumType;

/// [crc::Crc] instance using [crc::CRC_32_ISO_HDLC].
///
/// SANA registry entry: <https://sanaregistry.org/r/checksum_identifiers/records/4>,
/// Entry in CRC catalogue: <https://reveng.sourceforge.io/crc-catalogue/all.htm#crc.cat.crc-32>
pub static CRC_32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);
/// [crc::Crc] instance using [crc::CRC_32_ISCSI].
///
/// SANA registry entry: <https://sanaregistry.org/r/checksum_identifiers/records/3>,
/// Entry in CRC catalogue: <https://reveng.sourceforge.io/crc-catalogue/all.htm#crc.cat.crc-32-iscsi>
pub static CRC_32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Offset-aware accumulator for the modular checksum.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ModularChecksum {
    value: u32,
}

impl ModularChecksum {
    pub const fn new() -> Self {
        Self { value: 0 }
    }

    /// Adds the data which is located at the given absolute file offset.
    pub fn update_at(&mut self, offset: u64, data: &[u8]) {
        for (idx, byte) in data.iter().enumerate() {
            let position = offset.wrapping_add(idx as u64);
            let shift = 24 - 8 * (position % 4) as u32;
            self.value = self.value.wrapping_add((*byte as u32) << shift);
        }
    }

    pub fn value(&self) -> u32 {
        self.value
    }
}

/// Sequential checksum calculator for all supported checksum types.
pub enum ChecksumCalculator {
    Modular { checksum: ModularChecksum, offset: u64 },
    Crc(Digest<'static, u32>),
    Null,
}

impl ChecksumCalculator {
    /// Returns [None] for checksum types which are not supported, which currently is only the
    /// Proximity-1 CRC.
    pub fn new(checksum_type: ChecksumType) -> Option<Self> {
        match checksum_type {
            ChecksumType::Modular => Some(Self::Modular {
                checksum: ModularChecksum::new(),
                offset: 0,
            }),
            ChecksumType::Crc32 => Some(Self::Crc(CRC_32.digest())),
            ChecksumType::Crc32C => Some(Self::Crc(CRC_32C.digest())),
            ChecksumType::NullChecksum => Some(Self::Null),
            ChecksumType::Crc32Proximity1 => None,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            ChecksumCalculator::Modular { checksum, offset } => {
                checksum.update_at(*offset, data);
                *offset += data.len() as u64;
            }
            ChecksumCalculator::Crc(digest) => digest.update(data),
            ChecksumCalculator::Null => (),
        }
    }

    pub fn finalize(self) -> u32 {
        match self {
            ChecksumCalculator::Modular { checksum, .. } => checksum.value(),
            ChecksumCalculator::Crc(digest) => digest.finalize(),
            ChecksumCalculator::Null => 0,
        }
    }
}

impl core::fmt::Debug for ChecksumCalculator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Modular { checksum, offset } => f
                .debug_struct("Modular")
                .field("checksum", checksum)
                .field("offset", offset)
                .finish(),
            Self::Crc(_) => f.write_str("Crc"),
            Self::Null => f.write_str("Null"),
        }
    }
}

/// Calculates the checksum of a buffer which starts at file offset 0.
pub fn calculate_checksum(checksum_type: ChecksumType, data: &[u8]) -> Option<u32> {
    let mut calculator = ChecksumCalculator::new(checksum_type)?;
    calculator.update(data);
    Some(calculator.finalize())
}
