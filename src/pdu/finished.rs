use num_enum::{IntoPrimitive, TryFromPrimitive};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::pdu::tlv::{
    EntityIdTlv, FilestoreResponseTlv, Tlv, TlvLvError, TlvType, WritableTlv,
};
use crate::pdu::{
    add_pdu_crc, checked_datafield_len, parse_directive_prefix, CfdpPdu, ConditionCode, CrcFlag,
    Direction, FileDirectiveType, PduError, PduHeader, PduType, WritablePduPacket,
};
use crate::util::ByteConversionError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum DeliveryCode {
    Complete = 0,
    Incomplete = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum FileStatus {
    DiscardDeliberately = 0b00,
    DiscardedFsRejection = 0b01,
    Retained = 0b10,
    Unreported = 0b11,
}

/// Finished PDU abstraction.
///
/// For more information, refer to CFDP chapter 5.2.3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedPdu {
    pdu_header: PduHeader,
    condition_code: ConditionCode,
    delivery_code: DeliveryCode,
    file_status: FileStatus,
    fs_responses: Vec<FilestoreResponseTlv>,
    fault_location: Option<EntityIdTlv>,
}

impl FinishedPdu {
    /// Default finished PDU: No error (no fault location field) and no filestore responses.
    pub fn new_no_error(
        pdu_header: PduHeader,
        delivery_code: DeliveryCode,
        file_status: FileStatus,
    ) -> Result<Self, PduError> {
        Self::new(
            pdu_header,
            ConditionCode::NoError,
            delivery_code,
            file_status,
            Vec::new(),
            None,
        )
    }

    pub fn new_with_error(
        pdu_header: PduHeader,
        condition_code: ConditionCode,
        delivery_code: DeliveryCode,
        file_status: FileStatus,
        fault_location: EntityIdTlv,
    ) -> Result<Self, PduError> {
        Self::new(
            pdu_header,
            condition_code,
            delivery_code,
            file_status,
            Vec::new(),
            Some(fault_location),
        )
    }

    pub fn new(
        mut pdu_header: PduHeader,
        condition_code: ConditionCode,
        delivery_code: DeliveryCode,
        file_status: FileStatus,
        fs_responses: Vec<FilestoreResponseTlv>,
        fault_location: Option<EntityIdTlv>,
    ) -> Result<Self, PduError> {
        pdu_header.set_pdu_type(PduType::FileDirective);
        // Enforce correct direction bit.
        pdu_header.set_direction(Direction::TowardsSender);
        if fault_location.is_none() && Self::fault_location_required(condition_code) {
            return Err(PduError::Format(
                "Finished PDU with error condition needs a fault location",
            ));
        }
        let fault_location = if condition_code == ConditionCode::NoError {
            None
        } else {
            fault_location
        };
        let mut finished_pdu = Self {
            pdu_header,
            condition_code,
            delivery_code,
            file_status,
            fs_responses,
            fault_location,
        };
        let datafield_len = checked_datafield_len(finished_pdu.calc_pdu_datafield_len())?;
        finished_pdu.pdu_header.set_datafield_len(datafield_len);
        Ok(finished_pdu)
    }

    fn fault_location_required(condition_code: ConditionCode) -> bool {
        condition_code != ConditionCode::NoError
            && condition_code != ConditionCode::UnsupportedChecksumType
    }

    pub fn condition_code(&self) -> ConditionCode {
        self.condition_code
    }

    pub fn delivery_code(&self) -> DeliveryCode {
        self.delivery_code
    }

    pub fn file_status(&self) -> FileStatus {
        self.file_status
    }

    // If there are no filestore responses, an empty slice will be returned.
    pub fn filestore_responses(&self) -> &[FilestoreResponseTlv] {
        &self.fs_responses
    }

    pub fn fault_location(&self) -> Option<EntityIdTlv> {
        self.fault_location
    }

    fn calc_pdu_datafield_len(&self) -> usize {
        let mut datafield_len = 2;
        for fs_response in &self.fs_responses {
            datafield_len += fs_response.len_full();
        }
        if let Some(fault_location) = self.fault_location {
            datafield_len += fault_location.len_full();
        }
        if self.crc_flag() == CrcFlag::WithCrc {
            datafield_len += 2;
        }
        datafield_len
    }

    /// Generates [Self] from a raw bytestream.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, PduError> {
        let (pdu_header, mut current_idx, full_len_without_crc) =
            parse_directive_prefix(buf, FileDirectiveType::FinishedPdu, 1)?;
        let raw_cc = (buf[current_idx] >> 4) & 0b1111;
        let condition_code =
            ConditionCode::try_from(raw_cc).map_err(|_| PduError::InvalidConditionCode(raw_cc))?;
        // Unwrap is okay here for both of the following operations which can not fail.
        let delivery_code = DeliveryCode::try_from((buf[current_idx] >> 2) & 0b1).unwrap();
        let file_status = FileStatus::try_from(buf[current_idx] & 0b11).unwrap();
        current_idx += 1;
        let (fs_responses, fault_location) =
            Self::parse_tlv_fields(current_idx, full_len_without_crc, buf)?;
        if fault_location.is_none() && Self::fault_location_required(condition_code) {
            return Err(PduError::Format(
                "Finished PDU with error condition needs a fault location",
            ));
        }
        Ok(Self {
            pdu_header,
            condition_code,
            delivery_code,
            file_status,
            fs_responses,
            fault_location,
        })
    }

    fn parse_tlv_fields(
        mut current_idx: usize,
        full_len_without_crc: usize,
        buf: &[u8],
    ) -> Result<(Vec<FilestoreResponseTlv>, Option<EntityIdTlv>), PduError> {
        let mut fs_responses = Vec::new();
        let mut fault_location = None;
        while current_idx < full_len_without_crc {
            let (tlv, consumed) = Tlv::decode(&buf[current_idx..full_len_without_crc])?;
            current_idx += consumed;
            match tlv {
                Tlv::FilestoreResponse(response) => fs_responses.push(response),
                Tlv::EntityId(entity_id) => {
                    // The fault location has to be the last TLV.
                    if current_idx != full_len_without_crc {
                        return Err(PduError::FaultLocationNotLast);
                    }
                    fault_location = Some(entity_id);
                }
                other => {
                    return Err(TlvLvError::InvalidTlvTypeField {
                        found: other.tlv_type_field().into(),
                        expected: Some(TlvType::FilestoreResponse.into()),
                    }
                    .into());
                }
            }
        }
        Ok((fs_responses, fault_location))
    }
}

impl CfdpPdu for FinishedPdu {
    fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        Some(FileDirectiveType::FinishedPdu)
    }
}

impl WritablePduPacket for FinishedPdu {
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
        buf[current_idx] = FileDirectiveType::FinishedPdu as u8;
        current_idx += 1;
        buf[current_idx] = ((self.condition_code as u8) << 4)
            | ((self.delivery_code as u8) << 2)
            | self.file_status as u8;
        current_idx += 1;
        for fs_response in &self.fs_responses {
            current_idx += fs_response.write_to_bytes(&mut buf[current_idx..])?;
        }
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
