//! CFDP packet data unit (PDU) codec.
//!
//! Every PDU consists of the [PduHeader] followed by a data field. File directive PDUs start
//! their data field with a [FileDirectiveType] octet, file data PDUs carry the file offset and
//! the raw segment data. Each directive has a dedicated module containing a type which can be
//! built from semantic fields and serialized with [WritablePduPacket], and which can be parsed
//! from a raw byte stream with a `from_bytes` constructor.
//!
//! Decoding is strict: the data field length of the header must match the length of the passed
//! buffer exactly. Use [PduHeader::from_bytes] and [PduHeader::pdu_len] to split a stream of
//! concatenated PDUs.
use crc::{Crc, CRC_16_IBM_3740};
use num_enum::{IntoPrimitive, TryFromPrimitive};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::util::{ByteConversionError, UnsignedByteField};

pub mod ack;
pub mod eof;
pub mod file_data;
pub mod finished;
pub mod keep_alive;
pub mod lv;
pub mod metadata;
pub mod nak;
pub mod prompt;
pub mod tlv;

use ack::AckPdu;
use eof::EofPdu;
use file_data::FileDataPdu;
use finished::FinishedPdu;
use keep_alive::KeepAlivePdu;
use metadata::MetadataPdu;
use nak::NakPdu;
use prompt::PromptPdu;
pub use tlv::TlvLvError;

/// Version field value for CCSDS 727.0-B-5.
pub const CFDP_VERSION_2: u8 = 0b001;

/// CRC-16/CCITT-FALSE, used for the optional PDU checksum.
pub const CRC_CCITT_FALSE: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum PduType {
    FileDirective = 0,
    FileData = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum Direction {
    TowardsReceiver = 0,
    TowardsSender = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum TransmissionMode {
    /// Class 2.
    Acknowledged = 0,
    /// Class 1.
    Unacknowledged = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum CrcFlag {
    NoCrc = 0,
    WithCrc = 1,
}

impl From<bool> for CrcFlag {
    fn from(value: bool) -> Self {
        if value {
            return CrcFlag::WithCrc;
        }
        CrcFlag::NoCrc
    }
}

impl From<CrcFlag> for bool {
    fn from(value: CrcFlag) -> Self {
        value == CrcFlag::WithCrc
    }
}

/// Determines whether file sizes and offsets are 32 bit (normal) or 64 bit (large) wide.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum LargeFileFlag {
    Normal = 0,
    Large = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum SegmentationControl {
    NoRecordBoundaryPreservation = 0,
    WithRecordBoundaryPreservation = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum SegmentMetadataFlag {
    NotPresent = 0,
    Present = 1,
}

/// Condition codes as specified in chapter 5.2.2 of the CFDP standard.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum ConditionCode {
    NoError = 0b0000,
    PositiveAckLimitReached = 0b0001,
    KeepAliveLimitReached = 0b0010,
    InvalidTransmissionMode = 0b0011,
    FilestoreRejection = 0b0100,
    FileChecksumFailure = 0b0101,
    FileSizeError = 0b0110,
    NakLimitReached = 0b0111,
    InactivityDetected = 0b1000,
    InvalidFileStructure = 0b1001,
    CheckLimitReached = 0b1010,
    UnsupportedChecksumType = 0b1011,
    SuspendRequestReceived = 0b1110,
    CancelRequestReceived = 0b1111,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum FaultHandlerCode {
    NoticeOfCancellation = 0b0001,
    NoticeOfSuspension = 0b0010,
    IgnoreError = 0b0011,
    AbandonTransaction = 0b0100,
}

/// Checksum types from the SANA checksum identifier registry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum ChecksumType {
    /// Modular legacy checksum
    Modular = 0,
    Crc32Proximity1 = 1,
    Crc32C = 2,
    /// Polynomial: 0x4C11DB7. Preferred checksum for now.
    Crc32 = 3,
    #[default]
    NullChecksum = 15,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum TransactionStatus {
    /// Transaction is not currently active and the CFDP implementation does not retain a
    /// transaction history.
    Undefined = 0b00,
    Active = 0b01,
    /// Transaction was active in the past and was terminated.
    Terminated = 0b10,
    /// The CFDP implementation does retain a transaction history, and the transaction is not and
    /// never was active at this entity.
    Unrecognized = 0b11,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum FileDirectiveType {
    EofPdu = 0x04,
    FinishedPdu = 0x05,
    AckPdu = 0x06,
    MetadataPdu = 0x07,
    NakPdu = 0x08,
    PromptPdu = 0x09,
    KeepAlivePdu = 0x0c,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum PduError {
    #[error("byte conversion error: {0}")]
    ByteConversion(#[from] ByteConversionError),
    #[error("unsupported CFDP version {0}")]
    UnsupportedVersion(u8),
    /// The data field length of the header does not match the length of the passed buffer.
    #[error("declared PDU length {declared} does not match buffer length {actual}")]
    InconsistentLength { declared: usize, actual: usize },
    /// Invalid length for the entity ID detected. Only the values 1 to 8 are allowed.
    #[error("invalid PDU entity ID length {0}")]
    InvalidEntityIdLength(usize),
    #[error("invalid transaction sequence number length {0}")]
    InvalidSeqNumLength(usize),
    #[error("wrong directive type, found {found:?}, expected {expected:?}")]
    WrongDirectiveType {
        found: FileDirectiveType,
        expected: FileDirectiveType,
    },
    #[error("invalid directive type, found {found:?}, expected {expected:?}")]
    InvalidDirectiveType {
        found: u8,
        expected: Option<FileDirectiveType>,
    },
    #[error("invalid condition code {0}")]
    InvalidConditionCode(u8),
    #[error("invalid checksum type {0}")]
    InvalidChecksumType(u8),
    #[error("invalid transaction status {0}")]
    InvalidTransactionStatus(u8),
    #[error("malformed TLV or LV field: {0}")]
    MalformedTlv(#[from] TlvLvError),
    /// The file offset does not fit the width determined by the large file flag.
    #[error("offset {offset} invalid for large file flag {file_flag:?}")]
    InvalidOffset {
        offset: u64,
        file_flag: LargeFileFlag,
    },
    #[error("file size {0} too large for normal file flag")]
    FileSizeTooLarge(u64),
    /// The PDU CRC check failed. Contains the received checksum.
    #[error("PDU checksum error, received checksum {0:#06x}")]
    Checksum(u16),
    #[error("{0} trailing bytes after PDU fields")]
    TrailingBytes(usize),
    #[error("fault location is not the last TLV")]
    FaultLocationNotLast,
    #[error("segment metadata length {0} exceeds maximum of 63")]
    SegmentMetadataTooLarge(usize),
    #[error("invalid PDU format: {0}")]
    Format(&'static str),
}

/// Common configuration fields for a PDU.
///
/// Please note that this structure has a custom implementation of [PartialEq] which only
/// compares the numerical value of the entity IDs and the sequence number.
#[derive(Debug, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CommonPduConfig {
    source_entity_id: UnsignedByteField,
    dest_entity_id: UnsignedByteField,
    pub transaction_seq_num: UnsignedByteField,
    pub trans_mode: TransmissionMode,
    pub file_flag: LargeFileFlag,
    pub crc_flag: CrcFlag,
    pub direction: Direction,
}

impl CommonPduConfig {
    /// The source and destination ID are extended to the same width if their widths differ.
    pub fn new(
        source_id: impl Into<UnsignedByteField>,
        dest_id: impl Into<UnsignedByteField>,
        transaction_seq_num: impl Into<UnsignedByteField>,
        trans_mode: TransmissionMode,
        file_flag: LargeFileFlag,
        crc_flag: CrcFlag,
        direction: Direction,
    ) -> Result<Self, PduError> {
        let transaction_seq_num = transaction_seq_num.into();
        if transaction_seq_num.size() == 0 || transaction_seq_num.size() > 8 {
            return Err(PduError::InvalidSeqNumLength(transaction_seq_num.size()));
        }
        let (source_entity_id, dest_entity_id) =
            Self::source_dest_id_check(source_id.into(), dest_id.into())?;
        Ok(Self {
            source_entity_id,
            dest_entity_id,
            transaction_seq_num,
            trans_mode,
            file_flag,
            crc_flag,
            direction,
        })
    }

    /// Same as [Self::new] but picks the smallest widths which can hold the passed values.
    pub fn new_with_minimal_widths(
        source_id: u64,
        dest_id: u64,
        transaction_seq_num: u64,
        trans_mode: TransmissionMode,
    ) -> Result<Self, PduError> {
        Self::new(
            UnsignedByteField::new_minimal(source_id),
            UnsignedByteField::new_minimal(dest_id),
            UnsignedByteField::new_minimal(transaction_seq_num),
            trans_mode,
            LargeFileFlag::Normal,
            CrcFlag::NoCrc,
            Direction::TowardsReceiver,
        )
    }

    fn source_dest_id_check(
        source_id: UnsignedByteField,
        dest_id: UnsignedByteField,
    ) -> Result<(UnsignedByteField, UnsignedByteField), PduError> {
        for id in [source_id, dest_id] {
            if id.size() == 0 || id.size() > 8 {
                return Err(PduError::InvalidEntityIdLength(id.size()));
            }
        }
        let width = source_id.size().max(dest_id.size());
        Ok((
            UnsignedByteField::new(width, source_id.value()),
            UnsignedByteField::new(width, dest_id.value()),
        ))
    }

    pub fn set_source_and_dest_id(
        &mut self,
        source_id: impl Into<UnsignedByteField>,
        dest_id: impl Into<UnsignedByteField>,
    ) -> Result<(), PduError> {
        let (source_id, dest_id) = Self::source_dest_id_check(source_id.into(), dest_id.into())?;
        self.source_entity_id = source_id;
        self.dest_entity_id = dest_id;
        Ok(())
    }

    pub fn source_id(&self) -> UnsignedByteField {
        self.source_entity_id
    }

    pub fn dest_id(&self) -> UnsignedByteField {
        self.dest_entity_id
    }
}

impl Default for CommonPduConfig {
    fn default() -> Self {
        Self {
            source_entity_id: UnsignedByteField::new(1, 0),
            dest_entity_id: UnsignedByteField::new(1, 0),
            transaction_seq_num: UnsignedByteField::new(1, 0),
            trans_mode: TransmissionMode::Acknowledged,
            file_flag: LargeFileFlag::Normal,
            crc_flag: CrcFlag::NoCrc,
            direction: Direction::TowardsReceiver,
        }
    }
}

impl PartialEq for CommonPduConfig {
    fn eq(&self, other: &Self) -> bool {
        self.source_entity_id.value() == other.source_entity_id.value()
            && self.dest_entity_id.value() == other.dest_entity_id.value()
            && self.transaction_seq_num.value() == other.transaction_seq_num.value()
            && self.trans_mode == other.trans_mode
            && self.file_flag == other.file_flag
            && self.crc_flag == other.crc_flag
            && self.direction == other.direction
    }
}

impl Eq for CommonPduConfig {}

pub const FIXED_HEADER_LEN: usize = 4;

/// Abstraction for the PDU header common to all CFDP PDUs.
///
/// For detailed information, refer to chapter 5.1 of the CFDP standard.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PduHeader {
    pdu_type: PduType,
    pdu_conf: CommonPduConfig,
    seg_metadata_flag: SegmentMetadataFlag,
    seg_ctrl: SegmentationControl,
    pdu_datafield_len: u16,
}

impl PduHeader {
    pub fn new_for_file_data(
        pdu_conf: CommonPduConfig,
        pdu_datafield_len: u16,
        seg_metadata_flag: SegmentMetadataFlag,
        seg_ctrl: SegmentationControl,
    ) -> Self {
        Self::new_generic(
            PduType::FileData,
            pdu_conf,
            pdu_datafield_len,
            seg_metadata_flag,
            seg_ctrl,
        )
    }

    pub fn new_for_file_directive(pdu_conf: CommonPduConfig, pdu_datafield_len: u16) -> Self {
        Self::new_generic(
            PduType::FileDirective,
            pdu_conf,
            pdu_datafield_len,
            SegmentMetadataFlag::NotPresent,
            SegmentationControl::NoRecordBoundaryPreservation,
        )
    }

    pub fn new_generic(
        pdu_type: PduType,
        pdu_conf: CommonPduConfig,
        pdu_datafield_len: u16,
        seg_metadata_flag: SegmentMetadataFlag,
        seg_ctrl: SegmentationControl,
    ) -> Self {
        Self {
            pdu_type,
            pdu_conf,
            seg_metadata_flag,
            seg_ctrl,
            pdu_datafield_len,
        }
    }

    /// Returns only the length of the PDU header when written to a raw buffer.
    pub fn header_len(&self) -> usize {
        FIXED_HEADER_LEN
            + self.pdu_conf.source_entity_id.size()
            + self.pdu_conf.transaction_seq_num.size()
            + self.pdu_conf.dest_entity_id.size()
    }

    pub fn pdu_datafield_len(&self) -> usize {
        self.pdu_datafield_len as usize
    }

    /// Returns the full length of the PDU when written to a raw buffer, which is the header length
    /// plus the PDU datafield length.
    pub fn pdu_len(&self) -> usize {
        self.header_len() + self.pdu_datafield_len as usize
    }

    pub fn pdu_type(&self) -> PduType {
        self.pdu_type
    }

    pub fn common_pdu_conf(&self) -> &CommonPduConfig {
        &self.pdu_conf
    }

    pub fn seg_metadata_flag(&self) -> SegmentMetadataFlag {
        self.seg_metadata_flag
    }

    pub fn seg_ctrl(&self) -> SegmentationControl {
        self.seg_ctrl
    }

    pub(crate) fn set_pdu_type(&mut self, pdu_type: PduType) {
        self.pdu_type = pdu_type;
    }

    pub(crate) fn set_direction(&mut self, direction: Direction) {
        self.pdu_conf.direction = direction;
    }

    pub(crate) fn set_datafield_len(&mut self, datafield_len: u16) {
        self.pdu_datafield_len = datafield_len;
    }

    pub fn write_to_bytes(&self, buf: &mut [u8]) -> Result<usize, ByteConversionError> {
        if buf.len() < self.header_len() {
            return Err(ByteConversionError::ToSliceTooSmall {
                found: buf.len(),
                expected: self.header_len(),
            });
        }
        let mut current_idx = 0;
        buf[current_idx] = (CFDP_VERSION_2 << 5)
            | ((self.pdu_type as u8) << 4)
            | ((self.pdu_conf.direction as u8) << 3)
            | ((self.pdu_conf.trans_mode as u8) << 2)
            | ((self.pdu_conf.crc_flag as u8) << 1)
            | (self.pdu_conf.file_flag as u8);
        current_idx += 1;
        buf[current_idx..current_idx + 2].copy_from_slice(&self.pdu_datafield_len.to_be_bytes());
        current_idx += 2;
        buf[current_idx] = ((self.seg_ctrl as u8) << 7)
            | (((self.pdu_conf.source_entity_id.size() - 1) as u8) << 4)
            | ((self.seg_metadata_flag as u8) << 3)
            | ((self.pdu_conf.transaction_seq_num.size() - 1) as u8);
        current_idx += 1;
        current_idx += self
            .pdu_conf
            .source_entity_id
            .write_to_be_bytes(&mut buf[current_idx..])?;
        current_idx += self
            .pdu_conf
            .transaction_seq_num
            .write_to_be_bytes(&mut buf[current_idx..])?;
        current_idx += self
            .pdu_conf
            .dest_entity_id
            .write_to_be_bytes(&mut buf[current_idx..])?;
        Ok(current_idx)
    }

    /// Parses the header and returns it together with the number of consumed header octets.
    ///
    /// This only checks the header itself. Use [Self::verify_length_and_checksum] to check the
    /// declared length and the optional CRC against the full PDU.
    pub fn from_bytes(buf: &[u8]) -> Result<(Self, usize), PduError> {
        if buf.len() < FIXED_HEADER_LEN {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: buf.len(),
                expected: FIXED_HEADER_LEN,
            }
            .into());
        }
        let version = (buf[0] >> 5) & 0b111;
        if version != CFDP_VERSION_2 {
            return Err(PduError::UnsupportedVersion(version));
        }
        // Unwraps are okay here: all possible bit values map to a variant.
        let pdu_type = PduType::try_from((buf[0] >> 4) & 0b1).unwrap();
        let direction = Direction::try_from((buf[0] >> 3) & 0b1).unwrap();
        let trans_mode = TransmissionMode::try_from((buf[0] >> 2) & 0b1).unwrap();
        let crc_flag = CrcFlag::try_from((buf[0] >> 1) & 0b1).unwrap();
        let file_flag = LargeFileFlag::try_from(buf[0] & 0b1).unwrap();
        let pdu_datafield_len = u16::from_be_bytes([buf[1], buf[2]]);
        let seg_ctrl = SegmentationControl::try_from((buf[3] >> 7) & 0b1).unwrap();
        let entity_id_len = (((buf[3] >> 4) & 0b111) + 1) as usize;
        let seg_metadata_flag = SegmentMetadataFlag::try_from((buf[3] >> 3) & 0b1).unwrap();
        let seq_num_len = ((buf[3] & 0b111) + 1) as usize;
        let header_len = FIXED_HEADER_LEN + 2 * entity_id_len + seq_num_len;
        if buf.len() < header_len {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: buf.len(),
                expected: header_len,
            }
            .into());
        }
        let mut current_idx = FIXED_HEADER_LEN;
        let source_entity_id =
            UnsignedByteField::new_from_be_bytes(entity_id_len, &buf[current_idx..])?;
        current_idx += entity_id_len;
        let transaction_seq_num =
            UnsignedByteField::new_from_be_bytes(seq_num_len, &buf[current_idx..])?;
        current_idx += seq_num_len;
        let dest_entity_id =
            UnsignedByteField::new_from_be_bytes(entity_id_len, &buf[current_idx..])?;
        current_idx += entity_id_len;
        let pdu_conf = CommonPduConfig::new(
            source_entity_id,
            dest_entity_id,
            transaction_seq_num,
            trans_mode,
            file_flag,
            crc_flag,
            direction,
        )?;
        Ok((
            Self {
                pdu_type,
                pdu_conf,
                seg_metadata_flag,
                seg_ctrl,
                pdu_datafield_len,
            },
            current_idx,
        ))
    }

    /// Verifies that the buffer length matches the declared PDU length and checks the CRC if
    /// the CRC flag is set. Returns the PDU length without the CRC.
    pub fn verify_length_and_checksum(&self, buf: &[u8]) -> Result<usize, PduError> {
        if buf.len() != self.pdu_len() {
            return Err(PduError::InconsistentLength {
                declared: self.pdu_len(),
                actual: buf.len(),
            });
        }
        if self.pdu_conf.crc_flag == CrcFlag::WithCrc {
            if self.pdu_datafield_len < 2 {
                return Err(PduError::Format("data field too short for PDU CRC"));
            }
            let mut digest = CRC_CCITT_FALSE.digest();
            digest.update(buf);
            if digest.finalize() != 0 {
                let len = buf.len();
                return Err(PduError::Checksum(u16::from_be_bytes([
                    buf[len - 2],
                    buf[len - 1],
                ])));
            }
            return Ok(self.pdu_len() - 2);
        }
        Ok(self.pdu_len())
    }
}

pub(crate) fn checked_datafield_len(datafield_len: usize) -> Result<u16, PduError> {
    u16::try_from(datafield_len).map_err(|_| PduError::Format("PDU data field length exceeds 65535"))
}

/// Appends the CRC-16 over `buf[0..current_idx]` and returns the new index.
pub(crate) fn add_pdu_crc(buf: &mut [u8], mut current_idx: usize) -> usize {
    let mut digest = CRC_CCITT_FALSE.digest();
    digest.update(&buf[..current_idx]);
    buf[current_idx..current_idx + 2].copy_from_slice(&digest.finalize().to_be_bytes());
    current_idx += 2;
    current_idx
}

/// Length of the file size sensitive fields depending on the large file flag.
pub(crate) fn fss_field_len(file_flag: LargeFileFlag) -> usize {
    match file_flag {
        LargeFileFlag::Normal => 4,
        LargeFileFlag::Large => 8,
    }
}

pub(crate) fn write_fss_field(
    file_flag: LargeFileFlag,
    value: u64,
    buf: &mut [u8],
) -> Result<usize, PduError> {
    match file_flag {
        LargeFileFlag::Normal => {
            let value = u32::try_from(value).map_err(|_| PduError::FileSizeTooLarge(value))?;
            buf[0..4].copy_from_slice(&value.to_be_bytes());
            Ok(4)
        }
        LargeFileFlag::Large => {
            buf[0..8].copy_from_slice(&value.to_be_bytes());
            Ok(8)
        }
    }
}

pub(crate) fn read_fss_field(file_flag: LargeFileFlag, buf: &[u8]) -> Result<(usize, u64), PduError> {
    let width = fss_field_len(file_flag);
    if buf.len() < width {
        return Err(ByteConversionError::FromSliceTooSmall {
            found: buf.len(),
            expected: width,
        }
        .into());
    }
    let value = UnsignedByteField::new_from_be_bytes(width, buf)?.value();
    Ok((width, value))
}

/// Parses the header and the directive octet of a file directive PDU.
///
/// Returns the header, the index of the first directive parameter octet and the PDU length
/// without the CRC.
pub(crate) fn parse_directive_prefix(
    buf: &[u8],
    expected: FileDirectiveType,
    min_param_len: usize,
) -> Result<(PduHeader, usize, usize), PduError> {
    let (pdu_header, mut current_idx) = PduHeader::from_bytes(buf)?;
    let full_len_without_crc = pdu_header.verify_length_and_checksum(buf)?;
    let min_expected_len = current_idx + 1 + min_param_len;
    if full_len_without_crc < min_expected_len {
        return Err(ByteConversionError::FromSliceTooSmall {
            found: full_len_without_crc,
            expected: min_expected_len,
        }
        .into());
    }
    if pdu_header.pdu_type() != PduType::FileDirective {
        return Err(PduError::Format("file data PDU passed to directive decoder"));
    }
    let directive_type = FileDirectiveType::try_from(buf[current_idx]).map_err(|_| {
        PduError::InvalidDirectiveType {
            found: buf[current_idx],
            expected: Some(expected),
        }
    })?;
    if directive_type != expected {
        return Err(PduError::WrongDirectiveType {
            found: directive_type,
            expected,
        });
    }
    current_idx += 1;
    Ok((pdu_header, current_idx, full_len_without_crc))
}

/// Common accessors for all PDUs.
pub trait CfdpPdu {
    fn pdu_header(&self) -> &PduHeader;

    fn source_id(&self) -> UnsignedByteField {
        self.pdu_header().common_pdu_conf().source_id()
    }

    fn dest_id(&self) -> UnsignedByteField {
        self.pdu_header().common_pdu_conf().dest_id()
    }

    fn transaction_seq_num(&self) -> UnsignedByteField {
        self.pdu_header().common_pdu_conf().transaction_seq_num
    }

    fn transmission_mode(&self) -> TransmissionMode {
        self.pdu_header().common_pdu_conf().trans_mode
    }

    fn direction(&self) -> Direction {
        self.pdu_header().common_pdu_conf().direction
    }

    fn crc_flag(&self) -> CrcFlag {
        self.pdu_header().common_pdu_conf().crc_flag
    }

    fn file_flag(&self) -> LargeFileFlag {
        self.pdu_header().common_pdu_conf().file_flag
    }

    fn pdu_type(&self) -> PduType {
        self.pdu_header().pdu_type()
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType>;
}

pub trait WritablePduPacket {
    fn len_written(&self) -> usize;

    fn write_to_bytes(&self, buf: &mut [u8]) -> Result<usize, PduError>;

    fn to_vec(&self) -> Result<Vec<u8>, PduError> {
        let mut vec = vec![0; self.len_written()];
        self.write_to_bytes(&mut vec)?;
        Ok(vec)
    }
}

/// Any decoded PDU.
///
/// Directive codes which are not known to this implementation are returned as
/// [Pdu::Unrecognized] so the caller can decide how to handle them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu<'raw> {
    FileData(FileDataPdu<'raw>),
    Eof(EofPdu),
    Finished(FinishedPdu),
    Ack(AckPdu),
    Metadata(MetadataPdu),
    Nak(NakPdu),
    Prompt(PromptPdu),
    KeepAlive(KeepAlivePdu),
    Unrecognized {
        pdu_header: PduHeader,
        directive_code: u8,
    },
}

impl<'raw> Pdu<'raw> {
    pub fn from_bytes(buf: &'raw [u8]) -> Result<Self, PduError> {
        let (pdu_header, header_len) = PduHeader::from_bytes(buf)?;
        if pdu_header.pdu_type() == PduType::FileData {
            return Ok(Pdu::FileData(FileDataPdu::from_bytes(buf)?));
        }
        if buf.len() <= header_len {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: buf.len(),
                expected: header_len + 1,
            }
            .into());
        }
        let directive_code = buf[header_len];
        let directive = match FileDirectiveType::try_from(directive_code) {
            Ok(directive) => directive,
            Err(_) => {
                pdu_header.verify_length_and_checksum(buf)?;
                return Ok(Pdu::Unrecognized {
                    pdu_header,
                    directive_code,
                });
            }
        };
        Ok(match directive {
            FileDirectiveType::EofPdu => Pdu::Eof(EofPdu::from_bytes(buf)?),
            FileDirectiveType::FinishedPdu => Pdu::Finished(FinishedPdu::from_bytes(buf)?),
            FileDirectiveType::AckPdu => Pdu::Ack(AckPdu::from_bytes(buf)?),
            FileDirectiveType::MetadataPdu => Pdu::Metadata(MetadataPdu::from_bytes(buf)?),
            FileDirectiveType::NakPdu => Pdu::Nak(NakPdu::from_bytes(buf)?),
            FileDirectiveType::PromptPdu => Pdu::Prompt(PromptPdu::from_bytes(buf)?),
            FileDirectiveType::KeepAlivePdu => Pdu::KeepAlive(KeepAlivePdu::from_bytes(buf)?),
        })
    }

    pub fn pdu_header(&self) -> &PduHeader {
        match self {
            Pdu::FileData(pdu) => pdu.pdu_header(),
            Pdu::Eof(pdu) => pdu.pdu_header(),
            Pdu::Finished(pdu) => pdu.pdu_header(),
            Pdu::Ack(pdu) => pdu.pdu_header(),
            Pdu::Metadata(pdu) => pdu.pdu_header(),
            Pdu::Nak(pdu) => pdu.pdu_header(),
            Pdu::Prompt(pdu) => pdu.pdu_header(),
            Pdu::KeepAlive(pdu) => pdu.pdu_header(),
            Pdu::Unrecognized { pdu_header, .. } => pdu_header,
        }
    }

    pub fn file_directive_type(&self) -> Option<FileDirectiveType> {
        match self {
            Pdu::FileData(_) | Pdu::Unrecognized { .. } => None,
            Pdu::Eof(_) => Some(FileDirectiveType::EofPdu),
            Pdu::Finished(_) => Some(FileDirectiveType::FinishedPdu),
            Pdu::Ack(_) => Some(FileDirectiveType::AckPdu),
            Pdu::Metadata(_) => Some(FileDirectiveType::MetadataPdu),
            Pdu::Nak(_) => Some(FileDirectiveType::NakPdu),
            Pdu::Prompt(_) => Some(FileDirectiveType::PromptPdu),
            Pdu::KeepAlive(_) => Some(FileDirectiveType::KeepAlivePdu),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::util::{UnsignedByteFieldU16, UnsignedByteFieldU8};

    pub(crate) const TEST_SRC_ID: UnsignedByteFieldU16 = UnsignedByteFieldU16::new(1);
    pub(crate) const TEST_DEST_ID: UnsignedByteFieldU16 = UnsignedByteFieldU16::new(2);
    pub(crate) const TEST_SEQ_NUM: UnsignedByteFieldU8 = UnsignedByteFieldU8::new(3);

    pub(crate) fn common_pdu_conf(crc_flag: CrcFlag, fss: LargeFileFlag) -> CommonPduConfig {
        CommonPduConfig::new(
            TEST_SRC_ID,
            TEST_DEST_ID,
            TEST_SEQ_NUM,
            TransmissionMode::Acknowledged,
            fss,
            crc_flag,
            Direction::TowardsReceiver,
        )
        .unwrap()
    }

    pub(crate) fn verify_raw_header(pdu_header: &PduHeader, buf: &[u8]) {
        let (read_back, header_len) = PduHeader::from_bytes(buf).unwrap();
        assert_eq!(header_len, pdu_header.header_len());
        assert_eq!(&read_back, pdu_header);
        assert_eq!((buf[0] >> 5) & 0b111, CFDP_VERSION_2);
        assert_eq!((buf[0] >> 4) & 0b1, pdu_header.pdu_type() as u8);
    }

    #[test]
    fn test_basic_header_layout() {
        let pdu_conf = common_pdu_conf(CrcFlag::NoCrc, LargeFileFlag::Normal);
        let header = PduHeader::new_for_file_directive(pdu_conf, 5);
        let mut buf = [0; 16];
        let written = header.write_to_bytes(&mut buf).unwrap();
        assert_eq!(written, 4 + 2 + 1 + 2);
        assert_eq!(header.header_len(), written);
        assert_eq!(buf[0], 0b0010_0000);
        assert_eq!(u16::from_be_bytes([buf[1], buf[2]]), 5);
        // Entity ID length 2 -> 1, sequence number length 1 -> 0.
        assert_eq!(buf[3], 0b0001_0000);
        assert_eq!(&buf[4..9], &[0, 1, 3, 0, 2]);
    }

    #[test]
    fn test_header_flags() {
        let mut pdu_conf = common_pdu_conf(CrcFlag::WithCrc, LargeFileFlag::Large);
        pdu_conf.trans_mode = TransmissionMode::Unacknowledged;
        pdu_conf.direction = Direction::TowardsSender;
        let header = PduHeader::new_for_file_data(
            pdu_conf,
            12,
            SegmentMetadataFlag::Present,
            SegmentationControl::WithRecordBoundaryPreservation,
        );
        let mut buf = [0; 16];
        header.write_to_bytes(&mut buf).unwrap();
        assert_eq!(buf[0], 0b0011_1111);
        assert_eq!(buf[3], 0b1001_1000);
        let (read_back, len) = PduHeader::from_bytes(&buf).unwrap();
        assert_eq!(len, 9);
        assert_eq!(read_back, header);
        assert_eq!(read_back.seg_metadata_flag(), SegmentMetadataFlag::Present);
    }

    #[test]
    fn test_one_and_eight_octet_widths() {
        for width in [1, 8] {
            let pdu_conf = CommonPduConfig::new(
                UnsignedByteField::new(width, 5),
                UnsignedByteField::new(width, 6),
                UnsignedByteField::new(width, 7),
                TransmissionMode::Acknowledged,
                LargeFileFlag::Normal,
                CrcFlag::NoCrc,
                Direction::TowardsReceiver,
            )
            .unwrap();
            let header = PduHeader::new_for_file_directive(pdu_conf, 0);
            let mut buf = [0; 32];
            let written = header.write_to_bytes(&mut buf).unwrap();
            assert_eq!(written, 4 + 3 * width);
            let (read_back, len) = PduHeader::from_bytes(&buf[..written]).unwrap();
            assert_eq!(len, written);
            assert_eq!(read_back.common_pdu_conf().source_id().size(), width);
            assert_eq!(read_back.common_pdu_conf().dest_id().value(), 6);
            assert_eq!(read_back.common_pdu_conf().transaction_seq_num.value(), 7);
        }
    }

    #[test]
    fn test_id_width_extension() {
        let pdu_conf = CommonPduConfig::new(
            UnsignedByteFieldU8::new(1),
            UnsignedByteFieldU16::new(300),
            UnsignedByteFieldU8::new(0),
            TransmissionMode::Acknowledged,
            LargeFileFlag::Normal,
            CrcFlag::NoCrc,
            Direction::TowardsReceiver,
        )
        .unwrap();
        assert_eq!(pdu_conf.source_id().size(), 2);
        assert_eq!(pdu_conf.source_id().value(), 1);
    }

    #[test]
    fn test_invalid_entity_id_length() {
        let result = CommonPduConfig::new(
            UnsignedByteField::new(0, 0),
            TEST_DEST_ID,
            TEST_SEQ_NUM,
            TransmissionMode::Acknowledged,
            LargeFileFlag::Normal,
            CrcFlag::NoCrc,
            Direction::TowardsReceiver,
        );
        assert_eq!(result.unwrap_err(), PduError::InvalidEntityIdLength(0));
    }

    #[test]
    fn test_unsupported_version() {
        let header = PduHeader::new_for_file_directive(
            common_pdu_conf(CrcFlag::NoCrc, LargeFileFlag::Normal),
            0,
        );
        let mut buf = [0; 16];
        header.write_to_bytes(&mut buf).unwrap();
        buf[0] = (buf[0] & 0b0001_1111) | (0b010 << 5);
        assert_eq!(
            PduHeader::from_bytes(&buf).unwrap_err(),
            PduError::UnsupportedVersion(0b010)
        );
    }

    #[test]
    fn test_truncated_header() {
        let header = PduHeader::new_for_file_directive(
            common_pdu_conf(CrcFlag::NoCrc, LargeFileFlag::Normal),
            0,
        );
        let mut buf = [0; 16];
        let written = header.write_to_bytes(&mut buf).unwrap();
        assert_eq!(
            PduHeader::from_bytes(&buf[0..3]).unwrap_err(),
            PduError::ByteConversion(ByteConversionError::FromSliceTooSmall {
                found: 3,
                expected: 4
            })
        );
        assert_eq!(
            PduHeader::from_bytes(&buf[0..written - 1]).unwrap_err(),
            PduError::ByteConversion(ByteConversionError::FromSliceTooSmall {
                found: written - 1,
                expected: written
            })
        );
    }

    #[test]
    fn test_inconsistent_length() {
        let header = PduHeader::new_for_file_directive(
            common_pdu_conf(CrcFlag::NoCrc, LargeFileFlag::Normal),
            3,
        );
        let mut buf = [0; 16];
        let written = header.write_to_bytes(&mut buf).unwrap();
        assert_eq!(
            header.verify_length_and_checksum(&buf[..written + 2]),
            Err(PduError::InconsistentLength {
                declared: written + 3,
                actual: written + 2
            })
        );
        assert_eq!(
            header.verify_length_and_checksum(&buf[..written + 3]),
            Ok(written + 3)
        );
    }

    #[test]
    fn test_pdu_dispatch_unrecognized_directive() {
        let header = PduHeader::new_for_file_directive(
            common_pdu_conf(CrcFlag::NoCrc, LargeFileFlag::Normal),
            1,
        );
        let mut buf = [0; 16];
        let written = header.write_to_bytes(&mut buf).unwrap();
        buf[written] = 0x0b;
        let pdu = Pdu::from_bytes(&buf[..written + 1]).unwrap();
        assert_eq!(
            pdu,
            Pdu::Unrecognized {
                pdu_header: header,
                directive_code: 0x0b
            }
        );
        assert_eq!(pdu.file_directive_type(), None);
    }

    #[test]
    fn test_crc_flag_conversion() {
        assert_eq!(CrcFlag::from(true), CrcFlag::WithCrc);
        assert!(!bool::from(CrcFlag::NoCrc));
    }
}
