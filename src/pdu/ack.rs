use crate::pdu::{
    add_pdu_crc, parse_directive_prefix, CfdpPdu, ConditionCode, CrcFlag, Direction,
    FileDirectiveType, PduError, PduHeader, PduType, TransactionStatus, WritablePduPacket,
};
use crate::util::ByteConversionError;

/// ACK PDU abstraction.
///
/// For more information, refer to CFDP chapter 5.2.4. Only EOF and Finished PDUs can be
/// acknowledged.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AckPdu {
    pdu_header: PduHeader,
    directive_code_of_acked_pdu: FileDirectiveType,
    condition_code: ConditionCode,
    transaction_status: TransactionStatus,
}

impl AckPdu {
    pub fn new(
        mut pdu_header: PduHeader,
        directive_code_of_acked_pdu: FileDirectiveType,
        condition_code: ConditionCode,
        transaction_status: TransactionStatus,
    ) -> Result<Self, PduError> {
        if directive_code_of_acked_pdu == FileDirectiveType::EofPdu {
            pdu_header.set_direction(Direction::TowardsSender);
        } else if directive_code_of_acked_pdu == FileDirectiveType::FinishedPdu {
            pdu_header.set_direction(Direction::TowardsReceiver);
        } else {
            return Err(PduError::InvalidDirectiveType {
                found: directive_code_of_acked_pdu as u8,
                expected: None,
            });
        }
        // Force correct PDU type.
        pdu_header.set_pdu_type(PduType::FileDirective);
        let mut ack_pdu = Self {
            pdu_header,
            directive_code_of_acked_pdu,
            condition_code,
            transaction_status,
        };
        let datafield_len = ack_pdu.calc_pdu_datafield_len() as u16;
        ack_pdu.pdu_header.set_datafield_len(datafield_len);
        Ok(ack_pdu)
    }

    pub fn new_for_eof_pdu(
        pdu_header: PduHeader,
        condition_code: ConditionCode,
        transaction_status: TransactionStatus,
    ) -> Self {
        Self::build(
            pdu_header,
            FileDirectiveType::EofPdu,
            condition_code,
            transaction_status,
        )
    }

    pub fn new_for_finished_pdu(
        pdu_header: PduHeader,
        condition_code: ConditionCode,
        transaction_status: TransactionStatus,
    ) -> Self {
        Self::build(
            pdu_header,
            FileDirectiveType::FinishedPdu,
            condition_code,
            transaction_status,
        )
    }

    fn build(
        mut pdu_header: PduHeader,
        directive_code_of_acked_pdu: FileDirectiveType,
        condition_code: ConditionCode,
        transaction_status: TransactionStatus,
    ) -> Self {
        pdu_header.set_pdu_type(PduType::FileDirective);
        pdu_header.set_direction(
            if directive_code_of_acked_pdu == FileDirectiveType::EofPdu {
                Direction::TowardsSender
            } else {
                Direction::TowardsReceiver
            },
        );
        let mut ack_pdu = Self {
            pdu_header,
            directive_code_of_acked_pdu,
            condition_code,
            transaction_status,
        };
        let datafield_len = ack_pdu.calc_pdu_datafield_len() as u16;
        ack_pdu.pdu_header.set_datafield_len(datafield_len);
        ack_pdu
    }

    pub fn directive_code_of_acked_pdu(&self) -> FileDirectiveType {
        self.directive_code_of_acked_pdu
    }

    pub fn condition_code(&self) -> ConditionCode {
        self.condition_code
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    fn directive_subtype_code(&self) -> u8 {
        if self.directive_code_of_acked_pdu == FileDirectiveType::FinishedPdu {
            return 0b0001;
        }
        0b0000
    }

    fn calc_pdu_datafield_len(&self) -> usize {
        if self.crc_flag() == CrcFlag::WithCrc {
            return 5;
        }
        3
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, PduError> {
        let (pdu_header, mut current_idx, _) =
            parse_directive_prefix(buf, FileDirectiveType::AckPdu, 2)?;
        let raw_acked = (buf[current_idx] >> 4) & 0b1111;
        let directive_code_of_acked_pdu = FileDirectiveType::try_from(raw_acked)
            .ok()
            .filter(|directive| {
                *directive == FileDirectiveType::EofPdu
                    || *directive == FileDirectiveType::FinishedPdu
            })
            .ok_or(PduError::InvalidDirectiveType {
                found: raw_acked,
                expected: None,
            })?;
        current_idx += 1;
        let raw_cc = (buf[current_idx] >> 4) & 0b1111;
        let condition_code =
            ConditionCode::try_from(raw_cc).map_err(|_| PduError::InvalidConditionCode(raw_cc))?;
        // Unwrap is okay: all two bit values map to a transaction status.
        let transaction_status = TransactionStatus::try_from(buf[current_idx] & 0b11).unwrap();
        Ok(Self {
            pdu_header,
            directive_code_of_acked_pdu,
            condition_code,
            transaction_status,
        })
    }
}

impl CfdpPdu for AckPdu {
    fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        Some(FileDirectiveType::AckPdu)
    }
}

impl WritablePduPacket for AckPdu {
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
        buf[current_idx] = FileDirectiveType::AckPdu as u8;
        current_idx += 1;
        buf[current_idx] =
            ((self.directive_code_of_acked_pdu as u8) << 4) | self.directive_subtype_code();
        current_idx += 1;
        buf[current_idx] = ((self.condition_code as u8) << 4) | (self.transaction_status as u8);
        current_idx += 1;
        if self.crc_flag() == CrcFlag::WithCrc {
            current_idx = add_pdu_crc(buf, current_idx);
        }
        Ok(current_idx)
    }

    fn len_written(&self) -> usize {
        self.pdu_header.header_len() + self.calc_pdu_datafield_len()
    }
}
