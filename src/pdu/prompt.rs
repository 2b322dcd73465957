use num_enum::{IntoPrimitive, TryFromPrimitive};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::pdu::{
    add_pdu_crc, parse_directive_prefix, CfdpPdu, CrcFlag, Direction, FileDirectiveType, PduError,
    PduHeader, PduType, WritablePduPacket,
};
use crate::util::ByteConversionError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum PromptResponseRequired {
    Nak = 0,
    KeepAlive = 1,
}

/// Prompt PDU abstraction.
///
/// For more information, refer to CFDP chapter 5.2.7.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PromptPdu {
    pdu_header: PduHeader,
    response_required: PromptResponseRequired,
}

impl PromptPdu {
    pub fn new(mut pdu_header: PduHeader, response_required: PromptResponseRequired) -> Self {
        pdu_header.set_pdu_type(PduType::FileDirective);
        pdu_header.set_direction(Direction::TowardsReceiver);
        let datafield_len = if pdu_header.common_pdu_conf().crc_flag == CrcFlag::WithCrc {
            4
        } else {
            2
        };
        pdu_header.set_datafield_len(datafield_len);
        Self {
            pdu_header,
            response_required,
        }
    }

    pub fn new_nak(pdu_header: PduHeader) -> Self {
        Self::new(pdu_header, PromptResponseRequired::Nak)
    }

    pub fn new_keep_alive(pdu_header: PduHeader) -> Self {
        Self::new(pdu_header, PromptResponseRequired::KeepAlive)
    }

    pub fn response_required(&self) -> PromptResponseRequired {
        self.response_required
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, PduError> {
        let (pdu_header, current_idx, full_len_without_crc) =
            parse_directive_prefix(buf, FileDirectiveType::PromptPdu, 1)?;
        if full_len_without_crc != current_idx + 1 {
            return Err(PduError::TrailingBytes(full_len_without_crc - current_idx - 1));
        }
        // Unwrap is okay: a single bit always maps to a variant.
        let response_required = PromptResponseRequired::try_from((buf[current_idx] >> 7) & 0b1)
            .unwrap();
        Ok(Self {
            pdu_header,
            response_required,
        })
    }
}

impl CfdpPdu for PromptPdu {
    fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        Some(FileDirectiveType::PromptPdu)
    }
}

impl WritablePduPacket for PromptPdu {
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
        buf[current_idx] = FileDirectiveType::PromptPdu as u8;
        current_idx += 1;
        buf[current_idx] = (self.response_required as u8) << 7;
        current_idx += 1;
        if self.crc_flag() == CrcFlag::WithCrc {
            current_idx = add_pdu_crc(buf, current_idx);
        }
        Ok(current_idx)
    }

    fn len_written(&self) -> usize {
        self.pdu_header.pdu_len()
    }
}
