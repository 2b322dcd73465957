use crate::pdu::tlv::{EntityIdTlv, WritableTlv};
use crate::pdu::{
    add_pdu_crc, checked_datafield_len, fss_field_len, parse_directive_prefix, read_fss_field,
    write_fss_field, CfdpPdu, ConditionCode, CrcFlag, Direction, FileDirectiveType, PduError,
    PduHeader, PduType, WritablePduPacket,
};
use crate::util::ByteConversionError;

/// End-of-file PDU abstraction.
///
/// For more information, refer to CFDP chapter 5.2.2. The fault location is only written for
/// condition codes other than [ConditionCode::NoError].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EofPdu {
    pdu_header: PduHeader,
    condition_code: ConditionCode,
    file_checksum: u32,
    file_size: u64,
    fault_location: Option<EntityIdTlv>,
}

impl EofPdu {
    pub fn new(
        mut pdu_header: PduHeader,
        condition_code: ConditionCode,
        file_checksum: u32,
        file_size: u64,
        fault_location: Option<EntityIdTlv>,
    ) -> Result<Self, PduError> {
        // Enforce correct type and direction bit.
        pdu_header.set_pdu_type(PduType::FileDirective);
        pdu_header.set_direction(Direction::TowardsReceiver);
        if condition_code != ConditionCode::NoError && fault_location.is_none() {
            return Err(PduError::Format("EOF with error condition needs a fault location"));
        }
        let fault_location = if condition_code == ConditionCode::NoError {
            None
        } else {
            fault_location
        };
        let mut eof_pdu = Self {
            pdu_header,
            condition_code,
            file_checksum,
            file_size,
            fault_location,
        };
        if eof_pdu.pdu_header.common_pdu_conf().file_flag == crate::pdu::LargeFileFlag::Normal
            && file_size > u32::MAX as u64
        {
            return Err(PduError::FileSizeTooLarge(file_size));
        }
        let datafield_len = checked_datafield_len(eof_pdu.calc_pdu_datafield_len())?;
        eof_pdu.pdu_header.set_datafield_len(datafield_len);
        Ok(eof_pdu)
    }

    pub fn new_no_error(
        pdu_header: PduHeader,
        file_checksum: u32,
        file_size: u64,
    ) -> Result<Self, PduError> {
        Self::new(
            pdu_header,
            ConditionCode::NoError,
            file_checksum,
            file_size,
            None,
        )
    }

    pub fn condition_code(&self) -> ConditionCode {
        self.condition_code
    }

    pub fn file_checksum(&self) -> u32 {
        self.file_checksum
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn fault_location(&self) -> Option<EntityIdTlv> {
        self.fault_location
    }

    fn calc_pdu_datafield_len(&self) -> usize {
        // One directive type octet, one condition code octet, 4 byte checksum.
        let mut len = 2 + 4 + fss_field_len(self.file_flag());
        if let Some(fault_location) = self.fault_location {
            len += fault_location.len_full();
        }
        if self.crc_flag() == CrcFlag::WithCrc {
            len += 2;
        }
        len
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, PduError> {
        let (pdu_header, _) = PduHeader::from_bytes(buf)?;
        let fss_len = fss_field_len(pdu_header.common_pdu_conf().file_flag);
        let (pdu_header, mut current_idx, full_len_without_crc) =
            parse_directive_prefix(buf, FileDirectiveType::EofPdu, 1 + 4 + fss_len)?;
        let raw_cc = (buf[current_idx] >> 4) & 0b1111;
        let condition_code =
            ConditionCode::try_from(raw_cc).map_err(|_| PduError::InvalidConditionCode(raw_cc))?;
        current_idx += 1;
        let file_checksum = u32::from_be_bytes([
            buf[current_idx],
            buf[current_idx + 1],
            buf[current_idx + 2],
            buf[current_idx + 3],
        ]);
        current_idx += 4;
        let (fss_len, file_size) =
            read_fss_field(pdu_header.common_pdu_conf().file_flag, &buf[current_idx..])?;
        current_idx += fss_len;
        let mut fault_location = None;
        if current_idx < full_len_without_crc {
            let entity_id = EntityIdTlv::from_bytes(&buf[current_idx..full_len_without_crc])?;
            current_idx += entity_id.len_full();
            if current_idx != full_len_without_crc {
                return Err(PduError::FaultLocationNotLast);
            }
            fault_location = Some(entity_id);
        }
        match (condition_code == ConditionCode::NoError, fault_location.is_some()) {
            (true, true) => {
                return Err(PduError::Format("EOF without error carries a fault location"))
            }
            (false, false) => {
                return Err(PduError::Format("EOF with error condition needs a fault location"))
            }
            _ => (),
        }
        Ok(Self {
            pdu_header,
            condition_code,
            file_checksum,
            file_size,
            fault_location,
        })
    }
}

impl CfdpPdu for EofPdu {
    fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        Some(FileDirectiveType::EofPdu)
    }
}

impl WritablePduPacket for EofPdu {
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
        buf[current_idx] = FileDirectiveType::EofPdu as u8;
        current_idx += 1;
        buf[current_idx] = (self.condition_code as u8) << 4;
        current_idx += 1;
        buf[current_idx..current_idx + 4].copy_from_slice(&self.file_checksum.to_be_bytes());
        current_idx += 4;
        current_idx += write_fss_field(self.file_flag(), self.file_size, &mut buf[current_idx..])?;
        if let Some(fault_location) = self.fault_location {
            current_idx += fault_location.write_to_bytes(&mut buf[current_idx..])?;
        }
        if self.crc_flag() == CrcFlag::WithCrc {
            current_idx = add_pdu_crc(buf, current_idx);
        }
        Ok(current_idx)
    }

    fn len_written(&self) -> usize {
        self.pdu_header.header_len() + self.calc_pdu_datafield_len()
    }
}
