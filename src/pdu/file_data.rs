use num_enum::{IntoPrimitive, TryFromPrimitive};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::pdu::{
    add_pdu_crc, checked_datafield_len, fss_field_len, read_fss_field, write_fss_field, CfdpPdu,
    CrcFlag, Direction, FileDirectiveType, LargeFileFlag, PduError, PduHeader, PduType,
    SegmentMetadataFlag, WritablePduPacket,
};
use crate::util::ByteConversionError;

pub const MAX_SEGMENT_METADATA_LEN: usize = 63;

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum RecordContinuationState {
    NoStartNoEnd = 0b00,
    StartWithoutEnd = 0b01,
    EndWithoutStart = 0b10,
    StartAndEnd = 0b11,
}

/// Segment metadata which can optionally be attached to a file data PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SegmentMetadata {
    record_continuation_state: RecordContinuationState,
    metadata: Vec<u8>,
}

impl SegmentMetadata {
    pub fn new(
        record_continuation_state: RecordContinuationState,
        metadata: &[u8],
    ) -> Result<Self, PduError> {
        if metadata.len() > MAX_SEGMENT_METADATA_LEN {
            return Err(PduError::SegmentMetadataTooLarge(metadata.len()));
        }
        Ok(Self {
            record_continuation_state,
            metadata: metadata.to_vec(),
        })
    }

    pub fn record_continuation_state(&self) -> RecordContinuationState {
        self.record_continuation_state
    }

    pub fn metadata(&self) -> &[u8] {
        &self.metadata
    }

    pub fn len_written(&self) -> usize {
        1 + self.metadata.len()
    }

    pub(crate) fn write_to_bytes(&self, buf: &mut [u8]) -> Result<usize, ByteConversionError> {
        if buf.len() < self.len_written() {
            return Err(ByteConversionError::ToSliceTooSmall {
                found: buf.len(),
                expected: self.len_written(),
            });
        }
        buf[0] = ((self.record_continuation_state as u8) << 6) | self.metadata.len() as u8;
        buf[1..1 + self.metadata.len()].copy_from_slice(&self.metadata);
        Ok(self.len_written())
    }

    pub(crate) fn from_bytes(buf: &[u8]) -> Result<Self, ByteConversionError> {
        if buf.is_empty() {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: 0,
                expected: 1,
            });
        }
        // Unwrap is okay: all two bit values map to a variant.
        let record_continuation_state = RecordContinuationState::try_from((buf[0] >> 6) & 0b11)
            .unwrap();
        let seg_metadata_len = (buf[0] & 0b111111) as usize;
        if buf.len() < 1 + seg_metadata_len {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: buf.len(),
                expected: 1 + seg_metadata_len,
            });
        }
        Ok(Self {
            record_continuation_state,
            metadata: buf[1..1 + seg_metadata_len].to_vec(),
        })
    }
}

/// File Data PDU abstraction.
///
/// For more information, refer to CFDP chapter 5.3. The file data is borrowed from the buffer
/// it was created or parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDataPdu<'data> {
    pdu_header: PduHeader,
    segment_metadata: Option<SegmentMetadata>,
    offset: u64,
    file_data: &'data [u8],
}

impl<'data> FileDataPdu<'data> {
    pub fn new_with_seg_metadata(
        pdu_header: PduHeader,
        segment_metadata: SegmentMetadata,
        offset: u64,
        file_data: &'data [u8],
    ) -> Result<Self, PduError> {
        Self::new_generic(pdu_header, Some(segment_metadata), offset, file_data)
    }

    pub fn new_no_seg_metadata(
        pdu_header: PduHeader,
        offset: u64,
        file_data: &'data [u8],
    ) -> Result<Self, PduError> {
        Self::new_generic(pdu_header, None, offset, file_data)
    }

    pub fn new_generic(
        mut pdu_header: PduHeader,
        segment_metadata: Option<SegmentMetadata>,
        offset: u64,
        file_data: &'data [u8],
    ) -> Result<Self, PduError> {
        pdu_header.set_pdu_type(PduType::FileData);
        pdu_header.set_direction(Direction::TowardsReceiver);
        check_segment_end(
            pdu_header.common_pdu_conf().file_flag,
            offset,
            file_data.len(),
        )?;
        if segment_metadata.is_some() {
            pdu_header.seg_metadata_flag = SegmentMetadataFlag::Present;
        } else {
            pdu_header.seg_metadata_flag = SegmentMetadataFlag::NotPresent;
        }
        let mut pdu = Self {
            pdu_header,
            segment_metadata,
            offset,
            file_data,
        };
        let datafield_len = checked_datafield_len(pdu.calc_pdu_datafield_len())?;
        pdu.pdu_header.set_datafield_len(datafield_len);
        Ok(pdu)
    }

    fn calc_pdu_datafield_len(&self) -> usize {
        let mut len = fss_field_len(self.file_flag());
        if let Some(segment_metadata) = &self.segment_metadata {
            len += segment_metadata.len_written();
        }
        len += self.file_data.len();
        if self.crc_flag() == CrcFlag::WithCrc {
            len += 2;
        }
        len
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn file_data(&self) -> &'data [u8] {
        self.file_data
    }

    pub fn segment_metadata(&self) -> Option<&SegmentMetadata> {
        self.segment_metadata.as_ref()
    }

    pub fn record_continuation_state(&self) -> Option<RecordContinuationState> {
        self.segment_metadata
            .as_ref()
            .map(|seg_meta| seg_meta.record_continuation_state())
    }

    pub fn from_bytes(buf: &'data [u8]) -> Result<Self, PduError> {
        let (pdu_header, mut current_idx) = PduHeader::from_bytes(buf)?;
        let full_len_without_crc = pdu_header.verify_length_and_checksum(buf)?;
        if pdu_header.pdu_type() != PduType::FileData {
            return Err(PduError::Format("file directive PDU passed to file data decoder"));
        }
        let file_flag = pdu_header.common_pdu_conf().file_flag;
        let min_expected_len = current_idx + fss_field_len(file_flag);
        if full_len_without_crc < min_expected_len {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: full_len_without_crc,
                expected: min_expected_len,
            }
            .into());
        }
        let mut segment_metadata = None;
        if pdu_header.seg_metadata_flag() == SegmentMetadataFlag::Present {
            let seg_metadata =
                SegmentMetadata::from_bytes(&buf[current_idx..full_len_without_crc])?;
            current_idx += seg_metadata.len_written();
            segment_metadata = Some(seg_metadata);
        }
        let (fss_len, offset) = read_fss_field(file_flag, &buf[current_idx..full_len_without_crc])?;
        current_idx += fss_len;
        check_segment_end(file_flag, offset, full_len_without_crc - current_idx)?;
        Ok(Self {
            pdu_header,
            segment_metadata,
            offset,
            file_data: &buf[current_idx..full_len_without_crc],
        })
    }
}

impl CfdpPdu for FileDataPdu<'_> {
    fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        None
    }
}

impl WritablePduPacket for FileDataPdu<'_> {
    fn write_to_bytes(&self, buf: &mut [u8]) -> Result<usize, PduError> {
        if buf.len() < self.len_written() {
            return Err(ByteConversionError::ToSliceTooSmall {
                found: buf.len(),
                expected: self.len_written(),
            }
            .into());
        }
        let mut current_idx = self.pdu_header.write_to_bytes(buf)?;
        if let Some(segment_metadata) = &self.segment_metadata {
            current_idx += segment_metadata.write_to_bytes(&mut buf[current_idx..])?;
        }
        current_idx += write_fss_field(self.file_flag(), self.offset, &mut buf[current_idx..])?;
        buf[current_idx..current_idx + self.file_data.len()].copy_from_slice(self.file_data);
        current_idx += self.file_data.len();
        if self.crc_flag() == CrcFlag::WithCrc {
            current_idx = add_pdu_crc(buf, current_idx);
        }
        Ok(current_idx)
    }

    fn len_written(&self) -> usize {
        self.pdu_header.header_len() + self.calc_pdu_datafield_len()
    }
}

/// The end of a segment must be addressable with the width selected by the large file flag.
fn check_segment_end(file_flag: LargeFileFlag, offset: u64, len: usize) -> Result<(), PduError> {
    let max_end = match file_flag {
        LargeFileFlag::Normal => u32::MAX as u64,
        LargeFileFlag::Large => u64::MAX,
    };
    match offset.checked_add(len as u64) {
        Some(end) if end <= max_end => Ok(()),
        _ => Err(PduError::InvalidOffset { offset, file_flag }),
    }
}

/// This function can be used to calculate the maximum allowed file segment size for
/// a given maximum packet length and the segment metadata if there is any.
pub fn calculate_max_file_seg_len_for_max_packet_len_and_pdu_header(
    pdu_header: &PduHeader,
    max_packet_len: usize,
    segment_metadata: Option<&SegmentMetadata>,
) -> usize {
    let mut subtract = pdu_header.header_len();
    if let Some(segment_metadata) = segment_metadata {
        subtract += segment_metadata.len_written();
    }
    subtract += fss_field_len(pdu_header.common_pdu_conf().file_flag);
    if pdu_header.common_pdu_conf().crc_flag == CrcFlag::WithCrc {
        subtract += 2;
    }
    max_packet_len.saturating_sub(subtract)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::tests::{common_pdu_conf, verify_raw_header};
    use crate::pdu::{Pdu, SegmentationControl};

    fn file_data_header(crc_flag: CrcFlag, fss: LargeFileFlag) -> PduHeader {
        PduHeader::new_for_file_data(
            common_pdu_conf(crc_flag, fss),
            0,
            SegmentMetadataFlag::NotPresent,
            SegmentationControl::NoRecordBoundaryPreservation,
        )
    }

    #[test]
    fn test_basic() {
        let file_data: [u8; 4] = [1, 2, 3, 4];
        let fd_pdu = FileDataPdu::new_no_seg_metadata(
            file_data_header(CrcFlag::NoCrc, LargeFileFlag::Normal),
            10,
            &file_data,
        )
        .unwrap();
        assert_eq!(fd_pdu.file_data(), &file_data);
        assert_eq!(fd_pdu.offset(), 10);
        assert!(fd_pdu.segment_metadata().is_none());
        assert_eq!(fd_pdu.record_continuation_state(), None);
        assert_eq!(fd_pdu.file_directive_type(), None);
        assert_eq!(
            fd_pdu.len_written(),
            fd_pdu.pdu_header().header_len() + 4 + 4
        );
    }

    #[test]
    fn test_serialization() {
        let file_data: [u8; 4] = [1, 2, 3, 4];
        let fd_pdu = FileDataPdu::new_no_seg_metadata(
            file_data_header(CrcFlag::NoCrc, LargeFileFlag::Normal),
            10,
            &file_data,
        )
        .unwrap();
        let raw = fd_pdu.to_vec().unwrap();
        verify_raw_header(fd_pdu.pdu_header(), &raw);
        let idx = fd_pdu.pdu_header().header_len();
        assert_eq!(&raw[idx..idx + 4], &10_u32.to_be_bytes());
        assert_eq!(&raw[idx + 4..], &file_data);
        let read_back = FileDataPdu::from_bytes(&raw).unwrap();
        assert_eq!(read_back, fd_pdu);
        assert_eq!(Pdu::from_bytes(&raw).unwrap(), Pdu::FileData(fd_pdu));
    }

    #[test]
    fn test_with_seg_metadata_and_crc() {
        let file_data: [u8; 3] = [1, 2, 3];
        let seg_metadata =
            SegmentMetadata::new(RecordContinuationState::StartAndEnd, &[4, 5]).unwrap();
        let fd_pdu = FileDataPdu::new_with_seg_metadata(
            file_data_header(CrcFlag::WithCrc, LargeFileFlag::Large),
            seg_metadata,
            u32::MAX as u64 + 1,
            &file_data,
        )
        .unwrap();
        assert_eq!(
            fd_pdu.pdu_header().seg_metadata_flag(),
            SegmentMetadataFlag::Present
        );
        let raw = fd_pdu.to_vec().unwrap();
        let idx = fd_pdu.pdu_header().header_len();
        assert_eq!(raw[idx], (0b11 << 6) | 2);
        assert_eq!(&raw[idx + 1..idx + 3], &[4, 5]);
        let read_back = FileDataPdu::from_bytes(&raw).unwrap();
        assert_eq!(read_back, fd_pdu);
        assert_eq!(
            read_back.record_continuation_state(),
            Some(RecordContinuationState::StartAndEnd)
        );
    }

    #[test]
    fn test_empty_file_data() {
        let fd_pdu = FileDataPdu::new_no_seg_metadata(
            file_data_header(CrcFlag::NoCrc, LargeFileFlag::Normal),
            0,
            &[],
        )
        .unwrap();
        let raw = fd_pdu.to_vec().unwrap();
        let read_back = FileDataPdu::from_bytes(&raw).unwrap();
        assert!(read_back.file_data().is_empty());
    }

    #[test]
    fn test_invalid_offset() {
        let error = FileDataPdu::new_no_seg_metadata(
            file_data_header(CrcFlag::NoCrc, LargeFileFlag::Normal),
            u32::MAX as u64 + 1,
            &[1, 2],
        )
        .unwrap_err();
        assert_eq!(
            error,
            PduError::InvalidOffset {
                offset: u32::MAX as u64 + 1,
                file_flag: LargeFileFlag::Normal
            }
        );
    }

    #[test]
    fn test_segment_end_beyond_normal_width() {
        let error = FileDataPdu::new_no_seg_metadata(
            file_data_header(CrcFlag::NoCrc, LargeFileFlag::Normal),
            u32::MAX as u64 - 1,
            &[1, 2, 3],
        )
        .unwrap_err();
        assert_eq!(
            error,
            PduError::InvalidOffset {
                offset: u32::MAX as u64 - 1,
                file_flag: LargeFileFlag::Normal
            }
        );
    }

    #[test]
    fn test_segment_end_overflows_large_width() {
        let error = FileDataPdu::new_no_seg_metadata(
            file_data_header(CrcFlag::NoCrc, LargeFileFlag::Large),
            u64::MAX - 2,
            &[0; 10],
        )
        .unwrap_err();
        assert_eq!(
            error,
            PduError::InvalidOffset {
                offset: u64::MAX - 2,
                file_flag: LargeFileFlag::Large
            }
        );
    }

    #[test]
    fn test_decode_rejects_overflowing_segment() {
        let fd_pdu = FileDataPdu::new_no_seg_metadata(
            file_data_header(CrcFlag::NoCrc, LargeFileFlag::Large),
            0,
            &[0; 10],
        )
        .unwrap();
        let mut raw = fd_pdu.to_vec().unwrap();
        let idx = fd_pdu.pdu_header().header_len();
        raw[idx..idx + 8].copy_from_slice(&(u64::MAX - 2).to_be_bytes());
        assert_eq!(
            FileDataPdu::from_bytes(&raw).unwrap_err(),
            PduError::InvalidOffset {
                offset: u64::MAX - 2,
                file_flag: LargeFileFlag::Large
            }
        );
    }

    #[test]
    fn test_seg_metadata_too_large() {
        let metadata = [0; 64];
        assert_eq!(
            SegmentMetadata::new(RecordContinuationState::NoStartNoEnd, &metadata).unwrap_err(),
            PduError::SegmentMetadataTooLarge(64)
        );
    }

    #[test]
    fn test_max_file_seg_calculation() {
        let pdu_header = file_data_header(CrcFlag::NoCrc, LargeFileFlag::Normal);
        assert_eq!(
            calculate_max_file_seg_len_for_max_packet_len_and_pdu_header(&pdu_header, 64, None),
            64 - 9 - 4
        );
        let seg_metadata =
            SegmentMetadata::new(RecordContinuationState::StartWithoutEnd, &[1, 2]).unwrap();
        assert_eq!(
            calculate_max_file_seg_len_for_max_packet_len_and_pdu_header(
                &pdu_header,
                64,
                Some(&seg_metadata)
            ),
            64 - 9 - 3 - 4
        );
        assert_eq!(
            calculate_max_file_seg_len_for_max_packet_len_and_pdu_header(&pdu_header, 5, None),
            0
        );
    }

    #[test]
    fn test_truncated() {
        let fd_pdu = FileDataPdu::new_no_seg_metadata(
            file_data_header(CrcFlag::NoCrc, LargeFileFlag::Normal),
            0,
            &[1, 2, 3],
        )
        .unwrap();
        let raw = fd_pdu.to_vec().unwrap();
        assert!(matches!(
            FileDataPdu::from_bytes(&raw[..raw.len() - 1]).unwrap_err(),
            PduError::InconsistentLength { .. }
        ));
    }
}
