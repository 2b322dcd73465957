//! Generic CFDP type-length-value (TLV) abstraction as specified in CFDP 5.1.9.
//!
//! All typed TLVs own their value so decoded PDUs can outlive the buffer they were read from.
//! [Tlv] is the tagged union over all TLV kinds, and TLV types unknown to this implementation are
//! kept as [Tlv::Unknown] so they can be passed through unchanged.
use num_enum::{IntoPrimitive, TryFromPrimitive};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::pdu::lv::{read_lv_string, Lv};
use crate::pdu::{ConditionCode, FaultHandlerCode};
use crate::util::{ByteConversionError, UnsignedByteField};

pub const MIN_TLV_LEN: usize = 2;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TlvLvError {
    #[error("data with size {0} larger than allowed 255 bytes")]
    DataTooLarge(usize),
    #[error("byte conversion error: {0}")]
    ByteConversion(#[from] ByteConversionError),
    /// First value: Found value. Second value: Expected value if there is one.
    #[error("invalid TLV type field, found {found}, expected {expected:?}")]
    InvalidTlvTypeField { found: u8, expected: Option<u8> },
    #[error("invalid value length {0}")]
    InvalidValueLength(usize),
    #[error("invalid filestore action code {0}")]
    InvalidFilestoreActionCode(u8),
    #[error("invalid condition code {0}")]
    InvalidConditionCode(u8),
    #[error("invalid fault handler code {0}")]
    InvalidFaultHandlerCode(u8),
    /// A sub-structure of the value does not match the declared value length.
    #[error("TLV value structure needs {needed} bytes but declared length is {declared}")]
    Malformed { declared: usize, needed: usize },
    #[error("name field is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum TlvType {
    FilestoreRequest = 0x00,
    FilestoreResponse = 0x01,
    MsgToUser = 0x02,
    FaultHandler = 0x04,
    FlowLabel = 0x05,
    EntityId = 0x06,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TlvTypeField {
    Standard(TlvType),
    Custom(u8),
}

impl From<u8> for TlvTypeField {
    fn from(value: u8) -> Self {
        match TlvType::try_from(value) {
            Ok(tlv_type) => TlvTypeField::Standard(tlv_type),
            Err(_) => TlvTypeField::Custom(value),
        }
    }
}

impl From<TlvTypeField> for u8 {
    fn from(value: TlvTypeField) -> Self {
        match value {
            TlvTypeField::Standard(std) => std as u8,
            TlvTypeField::Custom(custom) => custom,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum FilestoreActionCode {
    CreateFile = 0b0000,
    DeleteFile = 0b0001,
    RenameFile = 0b0010,
    /// This operation appends one file to another. The first specified name will form the first
    /// part of the new file and the name of the new file. This function can be used to get
    /// similar functionality to the UNIX cat utility (albeit for only two files).
    AppendFile = 0b0011,
    /// This operation replaces the content of the first specified file with the content of
    /// the secondly specified file.
    ReplaceFile = 0b0100,
    CreateDirectory = 0b0101,
    RemoveDirectory = 0b0110,
    DenyFile = 0b0111,
    DenyDirectory = 0b1000,
}

impl FilestoreActionCode {
    /// Whether the action needs a second file name.
    pub fn has_second_filename(&self) -> bool {
        matches!(
            self,
            FilestoreActionCode::RenameFile
                | FilestoreActionCode::AppendFile
                | FilestoreActionCode::ReplaceFile
        )
    }
}

/// Serialization shared by all TLV types.
pub trait WritableTlv {
    fn tlv_type_field(&self) -> TlvTypeField;

    fn len_value(&self) -> usize;

    /// Writes only the value field.
    fn write_value(&self, buf: &mut [u8]) -> Result<usize, TlvLvError>;

    fn len_full(&self) -> usize {
        MIN_TLV_LEN + self.len_value()
    }

    fn write_to_bytes(&self, buf: &mut [u8]) -> Result<usize, TlvLvError> {
        let len_value = self.len_value();
        if len_value > u8::MAX as usize {
            return Err(TlvLvError::DataTooLarge(len_value));
        }
        if buf.len() < self.len_full() {
            return Err(ByteConversionError::ToSliceTooSmall {
                found: buf.len(),
                expected: self.len_full(),
            }
            .into());
        }
        buf[0] = self.tlv_type_field().into();
        buf[1] = len_value as u8;
        let written = self.write_value(&mut buf[MIN_TLV_LEN..MIN_TLV_LEN + len_value])?;
        Ok(MIN_TLV_LEN + written)
    }

    fn to_vec(&self) -> Result<Vec<u8>, TlvLvError> {
        let mut buf = vec![0; self.len_full()];
        self.write_to_bytes(&mut buf)?;
        Ok(buf)
    }
}

/// Splits a raw TLV into its type field and value slice. Fails if the buffer is shorter than
/// the declared length.
fn split_raw_tlv(buf: &[u8]) -> Result<(u8, &[u8]), TlvLvError> {
    if buf.len() < MIN_TLV_LEN {
        return Err(ByteConversionError::FromSliceTooSmall {
            found: buf.len(),
            expected: MIN_TLV_LEN,
        }
        .into());
    }
    let value_len = buf[1] as usize;
    if buf.len() < MIN_TLV_LEN + value_len {
        return Err(ByteConversionError::FromSliceTooSmall {
            found: buf.len(),
            expected: MIN_TLV_LEN + value_len,
        }
        .into());
    }
    Ok((buf[0], &buf[MIN_TLV_LEN..MIN_TLV_LEN + value_len]))
}

fn expect_tlv_type(found: u8, expected: TlvType) -> Result<(), TlvLvError> {
    if found != expected as u8 {
        return Err(TlvLvError::InvalidTlvTypeField {
            found,
            expected: Some(expected.into()),
        });
    }
    Ok(())
}

/// Reads an LV string inside a TLV value. Overflowing the value counts as a malformed TLV.
fn read_nested_lv(value: &[u8], current_idx: usize) -> Result<(String, usize), TlvLvError> {
    if current_idx >= value.len() {
        return Err(TlvLvError::Malformed {
            declared: value.len(),
            needed: current_idx + 1,
        });
    }
    read_lv_string(&value[current_idx..]).map_err(|e| match e {
        TlvLvError::ByteConversion(ByteConversionError::FromSliceTooSmall { expected, .. }) => {
            TlvLvError::Malformed {
                declared: value.len(),
                needed: current_idx + expected,
            }
        }
        other => other,
    })
}

fn write_nested_lv(name: &str, buf: &mut [u8]) -> Result<usize, TlvLvError> {
    Lv::new_from_str(name)?.write_to_bytes(buf)
}

fn check_fully_consumed(value: &[u8], consumed: usize) -> Result<(), TlvLvError> {
    if consumed != value.len() {
        return Err(TlvLvError::Malformed {
            declared: value.len(),
            needed: consumed,
        });
    }
    Ok(())
}

/// Entity ID TLV. Also used as the fault location field of the EOF and Finished PDU.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EntityIdTlv {
    entity_id: UnsignedByteField,
}

impl EntityIdTlv {
    pub fn new(entity_id: UnsignedByteField) -> Self {
        Self { entity_id }
    }

    pub fn entity_id(&self) -> &UnsignedByteField {
        &self.entity_id
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, TlvLvError> {
        let (tlv_type, value) = split_raw_tlv(buf)?;
        expect_tlv_type(tlv_type, TlvType::EntityId)?;
        Self::from_value(value)
    }

    fn from_value(value: &[u8]) -> Result<Self, TlvLvError> {
        if value.len() > 8 {
            return Err(TlvLvError::InvalidValueLength(value.len()));
        }
        Ok(Self {
            entity_id: UnsignedByteField::new_from_be_bytes(value.len(), value)?,
        })
    }
}

impl WritableTlv for EntityIdTlv {
    fn tlv_type_field(&self) -> TlvTypeField {
        TlvTypeField::Standard(TlvType::EntityId)
    }

    fn len_value(&self) -> usize {
        self.entity_id.size()
    }

    fn write_value(&self, buf: &mut [u8]) -> Result<usize, TlvLvError> {
        if self.entity_id.size() > 8 {
            return Err(TlvLvError::InvalidValueLength(self.entity_id.size()));
        }
        Ok(self.entity_id.write_to_be_bytes(buf)?)
    }
}

/// Fault location field of the EOF and Finished PDU.
pub type FaultLocation = EntityIdTlv;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FilestoreRequestTlv {
    action_code: FilestoreActionCode,
    first_name: String,
    second_name: Option<String>,
}

impl FilestoreRequestTlv {
    /// The second name is only written for actions which need one.
    pub fn new(
        action_code: FilestoreActionCode,
        first_name: impl Into<String>,
        second_name: Option<String>,
    ) -> Result<Self, TlvLvError> {
        let first_name = first_name.into();
        if action_code.has_second_filename() && second_name.is_none() {
            return Err(TlvLvError::Malformed {
                declared: 1 + 1 + first_name.len(),
                needed: 1 + 1 + first_name.len() + 1,
            });
        }
        let second_name = if action_code.has_second_filename() {
            second_name
        } else {
            None
        };
        let request = Self {
            action_code,
            first_name,
            second_name,
        };
        if request.len_value() > u8::MAX as usize {
            return Err(TlvLvError::DataTooLarge(request.len_value()));
        }
        Ok(request)
    }

    pub fn new_create_file(file_name: impl Into<String>) -> Result<Self, TlvLvError> {
        Self::new(FilestoreActionCode::CreateFile, file_name, None)
    }

    pub fn new_delete_file(file_name: impl Into<String>) -> Result<Self, TlvLvError> {
        Self::new(FilestoreActionCode::DeleteFile, file_name, None)
    }

    pub fn new_rename_file(
        source_name: impl Into<String>,
        target_name: impl Into<String>,
    ) -> Result<Self, TlvLvError> {
        Self::new(
            FilestoreActionCode::RenameFile,
            source_name,
            Some(target_name.into()),
        )
    }

    pub fn new_create_directory(dir_name: impl Into<String>) -> Result<Self, TlvLvError> {
        Self::new(FilestoreActionCode::CreateDirectory, dir_name, None)
    }

    pub fn new_remove_directory(dir_name: impl Into<String>) -> Result<Self, TlvLvError> {
        Self::new(FilestoreActionCode::RemoveDirectory, dir_name, None)
    }

    pub fn action_code(&self) -> FilestoreActionCode {
        self.action_code
    }

    pub fn first_name(&self) -> &str {
        &self.first_name
    }

    pub fn second_name(&self) -> Option<&str> {
        self.second_name.as_deref()
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, TlvLvError> {
        let (tlv_type, value) = split_raw_tlv(buf)?;
        expect_tlv_type(tlv_type, TlvType::FilestoreRequest)?;
        Self::from_value(value)
    }

    fn from_value(value: &[u8]) -> Result<Self, TlvLvError> {
        if value.is_empty() {
            return Err(TlvLvError::Malformed {
                declared: 0,
                needed: 1,
            });
        }
        let action_code = FilestoreActionCode::try_from((value[0] >> 4) & 0b1111)
            .map_err(|_| TlvLvError::InvalidFilestoreActionCode((value[0] >> 4) & 0b1111))?;
        let mut current_idx = 1;
        let (first_name, len) = read_nested_lv(value, current_idx)?;
        current_idx += len;
        let mut second_name = None;
        if action_code.has_second_filename() {
            let (name, len) = read_nested_lv(value, current_idx)?;
            current_idx += len;
            second_name = Some(name);
        }
        check_fully_consumed(value, current_idx)?;
        Ok(Self {
            action_code,
            first_name,
            second_name,
        })
    }
}

impl WritableTlv for FilestoreRequestTlv {
    fn tlv_type_field(&self) -> TlvTypeField {
        TlvTypeField::Standard(TlvType::FilestoreRequest)
    }

    fn len_value(&self) -> usize {
        1 + 1
            + self.first_name.len()
            + self.second_name.as_ref().map_or(0, |name| 1 + name.len())
    }

    fn write_value(&self, buf: &mut [u8]) -> Result<usize, TlvLvError> {
        buf[0] = (self.action_code as u8) << 4;
        let mut current_idx = 1;
        current_idx += write_nested_lv(&self.first_name, &mut buf[current_idx..])?;
        if let Some(second_name) = &self.second_name {
            current_idx += write_nested_lv(second_name, &mut buf[current_idx..])?;
        }
        Ok(current_idx)
    }
}

/// Filestore response TLV, carried by the Finished PDU.
///
/// The status code is the 4 bit status from table 5-18 of the CFDP standard, 0 denotes success.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FilestoreResponseTlv {
    action_code: FilestoreActionCode,
    status_code: u8,
    first_name: String,
    second_name: Option<String>,
    filestore_msg: Vec<u8>,
}

impl FilestoreResponseTlv {
    pub fn new(
        action_code: FilestoreActionCode,
        status_code: u8,
        first_name: impl Into<String>,
        second_name: Option<String>,
        filestore_msg: Vec<u8>,
    ) -> Result<Self, TlvLvError> {
        let second_name = if action_code.has_second_filename() {
            Some(second_name.unwrap_or_default())
        } else {
            None
        };
        let response = Self {
            action_code,
            status_code: status_code & 0b1111,
            first_name: first_name.into(),
            second_name,
            filestore_msg,
        };
        if response.len_value() > u8::MAX as usize {
            return Err(TlvLvError::DataTooLarge(response.len_value()));
        }
        Ok(response)
    }

    pub fn new_no_filestore_message(
        action_code: FilestoreActionCode,
        status_code: u8,
        first_name: impl Into<String>,
        second_name: Option<String>,
    ) -> Result<Self, TlvLvError> {
        Self::new(action_code, status_code, first_name, second_name, Vec::new())
    }

    pub fn action_code(&self) -> FilestoreActionCode {
        self.action_code
    }

    pub fn status_code(&self) -> u8 {
        self.status_code
    }

    pub fn first_name(&self) -> &str {
        &self.first_name
    }

    pub fn second_name(&self) -> Option<&str> {
        self.second_name.as_deref()
    }

    pub fn filestore_message(&self) -> &[u8] {
        &self.filestore_msg
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, TlvLvError> {
        let (tlv_type, value) = split_raw_tlv(buf)?;
        expect_tlv_type(tlv_type, TlvType::FilestoreResponse)?;
        Self::from_value(value)
    }

    fn from_value(value: &[u8]) -> Result<Self, TlvLvError> {
        if value.is_empty() {
            return Err(TlvLvError::Malformed {
                declared: 0,
                needed: 1,
            });
        }
        let action_code = FilestoreActionCode::try_from((value[0] >> 4) & 0b1111)
            .map_err(|_| TlvLvError::InvalidFilestoreActionCode((value[0] >> 4) & 0b1111))?;
        let status_code = value[0] & 0b1111;
        let mut current_idx = 1;
        let (first_name, len) = read_nested_lv(value, current_idx)?;
        current_idx += len;
        let mut second_name = None;
        if action_code.has_second_filename() {
            let (name, len) = read_nested_lv(value, current_idx)?;
            current_idx += len;
            second_name = Some(name);
        }
        let mut filestore_msg = Vec::new();
        if current_idx < value.len() {
            let msg_len = value[current_idx] as usize;
            if current_idx + 1 + msg_len > value.len() {
                return Err(TlvLvError::Malformed {
                    declared: value.len(),
                    needed: current_idx + 1 + msg_len,
                });
            }
            filestore_msg.extend_from_slice(&value[current_idx + 1..current_idx + 1 + msg_len]);
            current_idx += 1 + msg_len;
        }
        check_fully_consumed(value, current_idx)?;
        Ok(Self {
            action_code,
            status_code,
            first_name,
            second_name,
            filestore_msg,
        })
    }
}

impl WritableTlv for FilestoreResponseTlv {
    fn tlv_type_field(&self) -> TlvTypeField {
        TlvTypeField::Standard(TlvType::FilestoreResponse)
    }

    fn len_value(&self) -> usize {
        1 + 1
            + self.first_name.len()
            + self.second_name.as_ref().map_or(0, |name| 1 + name.len())
            + 1
            + self.filestore_msg.len()
    }

    fn write_value(&self, buf: &mut [u8]) -> Result<usize, TlvLvError> {
        buf[0] = ((self.action_code as u8) << 4) | self.status_code;
        let mut current_idx = 1;
        current_idx += write_nested_lv(&self.first_name, &mut buf[current_idx..])?;
        if let Some(second_name) = &self.second_name {
            current_idx += write_nested_lv(second_name, &mut buf[current_idx..])?;
        }
        current_idx += Lv::new(&self.filestore_msg)?.write_to_bytes(&mut buf[current_idx..])?;
        Ok(current_idx)
    }
}

/// Message to user TLV. The content is opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MsgToUserTlv {
    value: Vec<u8>,
}

impl MsgToUserTlv {
    pub fn new(value: &[u8]) -> Result<Self, TlvLvError> {
        if value.len() > u8::MAX as usize {
            return Err(TlvLvError::DataTooLarge(value.len()));
        }
        Ok(Self {
            value: value.to_vec(),
        })
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, TlvLvError> {
        let (tlv_type, value) = split_raw_tlv(buf)?;
        expect_tlv_type(tlv_type, TlvType::MsgToUser)?;
        Self::new(value)
    }
}

impl WritableTlv for MsgToUserTlv {
    fn tlv_type_field(&self) -> TlvTypeField {
        TlvTypeField::Standard(TlvType::MsgToUser)
    }

    fn len_value(&self) -> usize {
        self.value.len()
    }

    fn write_value(&self, buf: &mut [u8]) -> Result<usize, TlvLvError> {
        buf[..self.value.len()].copy_from_slice(&self.value);
        Ok(self.value.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FlowLabelTlv {
    value: Vec<u8>,
}

impl FlowLabelTlv {
    pub fn new(value: &[u8]) -> Result<Self, TlvLvError> {
        if value.len() > u8::MAX as usize {
            return Err(TlvLvError::DataTooLarge(value.len()));
        }
        Ok(Self {
            value: value.to_vec(),
        })
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

impl WritableTlv for FlowLabelTlv {
    fn tlv_type_field(&self) -> TlvTypeField {
        TlvTypeField::Standard(TlvType::FlowLabel)
    }

    fn len_value(&self) -> usize {
        self.value.len()
    }

    fn write_value(&self, buf: &mut [u8]) -> Result<usize, TlvLvError> {
        buf[..self.value.len()].copy_from_slice(&self.value);
        Ok(self.value.len())
    }
}

/// Overrides the fault handler of one condition code for a single transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FaultHandlerOverrideTlv {
    condition_code: ConditionCode,
    handler_code: FaultHandlerCode,
}

impl FaultHandlerOverrideTlv {
    pub fn new(condition_code: ConditionCode, handler_code: FaultHandlerCode) -> Self {
        Self {
            condition_code,
            handler_code,
        }
    }

    pub fn condition_code(&self) -> ConditionCode {
        self.condition_code
    }

    pub fn handler_code(&self) -> FaultHandlerCode {
        self.handler_code
    }

    fn from_value(value: &[u8]) -> Result<Self, TlvLvError> {
        if value.len() != 1 {
            return Err(TlvLvError::InvalidValueLength(value.len()));
        }
        let condition_code = ConditionCode::try_from((value[0] >> 4) & 0b1111)
            .map_err(|_| TlvLvError::InvalidConditionCode((value[0] >> 4) & 0b1111))?;
        let handler_code = FaultHandlerCode::try_from(value[0] & 0b1111)
            .map_err(|_| TlvLvError::InvalidFaultHandlerCode(value[0] & 0b1111))?;
        Ok(Self {
            condition_code,
            handler_code,
        })
    }
}

impl WritableTlv for FaultHandlerOverrideTlv {
    fn tlv_type_field(&self) -> TlvTypeField {
        TlvTypeField::Standard(TlvType::FaultHandler)
    }

    fn len_value(&self) -> usize {
        1
    }

    fn write_value(&self, buf: &mut [u8]) -> Result<usize, TlvLvError> {
        buf[0] = ((self.condition_code as u8) << 4) | self.handler_code as u8;
        Ok(1)
    }
}

/// TLV with a type code unknown to this implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RawTlv {
    pub tlv_type: u8,
    pub value: Vec<u8>,
}

impl WritableTlv for RawTlv {
    fn tlv_type_field(&self) -> TlvTypeField {
        TlvTypeField::from(self.tlv_type)
    }

    fn len_value(&self) -> usize {
        self.value.len()
    }

    fn write_value(&self, buf: &mut [u8]) -> Result<usize, TlvLvError> {
        buf[..self.value.len()].copy_from_slice(&self.value);
        Ok(self.value.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Tlv {
    EntityId(EntityIdTlv),
    FilestoreRequest(FilestoreRequestTlv),
    FilestoreResponse(FilestoreResponseTlv),
    MsgToUser(MsgToUserTlv),
    FaultHandlerOverride(FaultHandlerOverrideTlv),
    FlowLabel(FlowLabelTlv),
    Unknown(RawTlv),
}

impl Tlv {
    /// Decodes the TLV at the start of the buffer and returns it with the number of consumed
    /// octets.
    pub fn decode(buf: &[u8]) -> Result<(Tlv, usize), TlvLvError> {
        let (raw_type, value) = split_raw_tlv(buf)?;
        let consumed = MIN_TLV_LEN + value.len();
        let tlv = match TlvTypeField::from(raw_type) {
            TlvTypeField::Standard(tlv_type) => match tlv_type {
                TlvType::EntityId => Tlv::EntityId(EntityIdTlv::from_value(value)?),
                TlvType::FilestoreRequest => {
                    Tlv::FilestoreRequest(FilestoreRequestTlv::from_value(value)?)
                }
                TlvType::FilestoreResponse => {
                    Tlv::FilestoreResponse(FilestoreResponseTlv::from_value(value)?)
                }
                TlvType::MsgToUser => Tlv::MsgToUser(MsgToUserTlv::new(value)?),
                TlvType::FaultHandler => {
                    Tlv::FaultHandlerOverride(FaultHandlerOverrideTlv::from_value(value)?)
                }
                TlvType::FlowLabel => Tlv::FlowLabel(FlowLabelTlv::new(value)?),
            },
            TlvTypeField::Custom(tlv_type) => Tlv::Unknown(RawTlv {
                tlv_type,
                value: value.to_vec(),
            }),
        };
        Ok((tlv, consumed))
    }

    fn as_writable(&self) -> &dyn WritableTlv {
        match self {
            Tlv::EntityId(tlv) => tlv,
            Tlv::FilestoreRequest(tlv) => tlv,
            Tlv::FilestoreResponse(tlv) => tlv,
            Tlv::MsgToUser(tlv) => tlv,
            Tlv::FaultHandlerOverride(tlv) => tlv,
            Tlv::FlowLabel(tlv) => tlv,
            Tlv::Unknown(tlv) => tlv,
        }
    }
}

impl WritableTlv for Tlv {
    fn tlv_type_field(&self) -> TlvTypeField {
        self.as_writable().tlv_type_field()
    }

    fn len_value(&self) -> usize {
        self.as_writable().len_value()
    }

    fn write_value(&self, buf: &mut [u8]) -> Result<usize, TlvLvError> {
        self.as_writable().write_value(buf)
    }
}
