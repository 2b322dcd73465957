use crate::pdu::{
    add_pdu_crc, fss_field_len, parse_directive_prefix, read_fss_field, write_fss_field, CfdpPdu,
    CrcFlag, Direction, FileDirectiveType, LargeFileFlag, PduError, PduHeader, PduType,
    WritablePduPacket,
};
use crate::util::ByteConversionError;

/// Keep Alive PDU abstraction.
///
/// For more information, refer to CFDP chapter 5.2.8. The progress is the number of file data
/// octets received by the receiving entity so far.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct KeepAlivePdu {
    pdu_header: PduHeader,
    progress: u64,
}

impl KeepAlivePdu {
    pub fn new(mut pdu_header: PduHeader, progress: u64) -> Result<Self, PduError> {
        pdu_header.set_pdu_type(PduType::FileDirective);
        pdu_header.set_direction(Direction::TowardsSender);
        let file_flag = pdu_header.common_pdu_conf().file_flag;
        if file_flag == LargeFileFlag::Normal && progress > u32::MAX as u64 {
            return Err(PduError::InvalidOffset {
                offset: progress,
                file_flag,
            });
        }
        let mut datafield_len = 1 + fss_field_len(file_flag);
        if pdu_header.common_pdu_conf().crc_flag == CrcFlag::WithCrc {
            datafield_len += 2;
        }
        pdu_header.set_datafield_len(datafield_len as u16);
        Ok(Self {
            pdu_header,
            progress,
        })
    }

    pub fn progress(&self) -> u64 {
        self.progress
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, PduError> {
        let (pdu_header, _) = PduHeader::from_bytes(buf)?;
        let file_flag = pdu_header.common_pdu_conf().file_flag;
        let fss_len = fss_field_len(file_flag);
        let (pdu_header, current_idx, full_len_without_crc) =
            parse_directive_prefix(buf, FileDirectiveType::KeepAlivePdu, fss_len)?;
        if full_len_without_crc != current_idx + fss_len {
            return Err(PduError::TrailingBytes(
                full_len_without_crc - current_idx - fss_len,
            ));
        }
        let (_, progress) = read_fss_field(file_flag, &buf[current_idx..])?;
        Ok(Self {
            pdu_header,
            progress,
        })
    }
}

impl CfdpPdu for KeepAlivePdu {
    fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        Some(FileDirectiveType::KeepAlivePdu)
    }
}

impl WritablePduPacket for KeepAlivePdu {
    fn write_to_bytes(&self, buf: &mut [u8]) -> Result<usize, PduError> {
        let expected_len = self.len_written();
        if buf.len() < expected_len {
            return Err(ByteConversionError::ToSliceTooSmall {
                found: buf.len(),
                expected: expected_len,
            }
            .into());
        }
        let mut current_idx = self.pdu_header.write_to_bytes(buf)?;
        buf[current_idx] = FileDirectiveType::KeepAlivePdu as u8;
        current_idx += 1;
        current_idx += write_fss_field(self.file_flag(), self.progress, &mut buf[current_idx..])?;
        if self.crc_flag() == CrcFlag::WithCrc {
            current_idx = add_pdu_crc(buf, current_idx);
        }
        Ok(current_idx)
    }

    fn len_written(&self) -> usize {
        self.pdu_header.pdu_len()
    }
}
