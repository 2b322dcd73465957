#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::pdu::lv::{read_lv_string, Lv};
use crate::pdu::tlv::{
    FaultHandlerOverrideTlv, FilestoreRequestTlv, FlowLabelTlv, MsgToUserTlv, Tlv, WritableTlv,
};
use crate::pdu::{
    add_pdu_crc, checked_datafield_len, fss_field_len, parse_directive_prefix, read_fss_field,
    write_fss_field, ChecksumType, CfdpPdu, CrcFlag, Direction, FileDirectiveType, LargeFileFlag,
    PduError, PduHeader, PduType, WritablePduPacket,
};
use crate::util::ByteConversionError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MetadataGenericParams {
    pub closure_requested: bool,
    pub checksum_type: ChecksumType,
    pub file_size: u64,
}

impl MetadataGenericParams {
    pub fn new(closure_requested: bool, checksum_type: ChecksumType, file_size: u64) -> Self {
        Self {
            closure_requested,
            checksum_type,
            file_size,
        }
    }
}

/// Metadata PDU abstraction.
///
/// For more information, refer to CFDP chapter 5.2.5. Empty file name LVs are represented as
/// [None]. A transaction without file names only transfers its options, for example messages
/// to the user or filestore requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataPdu {
    pdu_header: PduHeader,
    metadata_params: MetadataGenericParams,
    src_file_name: Option<String>,
    dest_file_name: Option<String>,
    options: Vec<Tlv>,
    unknown_checksum_type: Option<u8>,
}

impl MetadataPdu {
    pub fn new_no_opts(
        pdu_header: PduHeader,
        metadata_params: MetadataGenericParams,
        src_file_name: Option<String>,
        dest_file_name: Option<String>,
    ) -> Result<Self, PduError> {
        Self::new(
            pdu_header,
            metadata_params,
            src_file_name,
            dest_file_name,
            Vec::new(),
        )
    }

    pub fn new(
        mut pdu_header: PduHeader,
        metadata_params: MetadataGenericParams,
        src_file_name: Option<String>,
        dest_file_name: Option<String>,
        options: Vec<Tlv>,
    ) -> Result<Self, PduError> {
        pdu_header.set_pdu_type(PduType::FileDirective);
        pdu_header.set_direction(Direction::TowardsReceiver);
        if pdu_header.common_pdu_conf().file_flag == LargeFileFlag::Normal
            && metadata_params.file_size > u32::MAX as u64
        {
            return Err(PduError::FileSizeTooLarge(metadata_params.file_size));
        }
        // Validates the name lengths.
        for name in [&src_file_name, &dest_file_name].into_iter().flatten() {
            Lv::new_from_str(name)?;
        }
        let mut metadata_pdu = Self {
            pdu_header,
            metadata_params,
            src_file_name: src_file_name.filter(|name| !name.is_empty()),
            dest_file_name: dest_file_name.filter(|name| !name.is_empty()),
            options,
            unknown_checksum_type: None,
        };
        let datafield_len = checked_datafield_len(metadata_pdu.calc_pdu_datafield_len())?;
        metadata_pdu.pdu_header.set_datafield_len(datafield_len);
        Ok(metadata_pdu)
    }

    pub fn metadata_params(&self) -> &MetadataGenericParams {
        &self.metadata_params
    }

    pub fn closure_requested(&self) -> bool {
        self.metadata_params.closure_requested
    }

    /// A checksum type outside of [ChecksumType] is retained when decoding and returned as
    /// [PduError::InvalidChecksumType]. The generic parameters then hold
    /// [ChecksumType::NullChecksum] as a placeholder.
    pub fn checksum_type(&self) -> Result<ChecksumType, PduError> {
        match self.unknown_checksum_type {
            Some(raw) => Err(PduError::InvalidChecksumType(raw)),
            None => Ok(self.metadata_params.checksum_type),
        }
    }

    pub fn file_size(&self) -> u64 {
        self.metadata_params.file_size
    }

    pub fn src_file_name(&self) -> Option<&str> {
        self.src_file_name.as_deref()
    }

    pub fn dest_file_name(&self) -> Option<&str> {
        self.dest_file_name.as_deref()
    }

    pub fn options(&self) -> &[Tlv] {
        &self.options
    }

    pub fn fs_requests(&self) -> impl Iterator<Item = &FilestoreRequestTlv> {
        self.options.iter().filter_map(|tlv| match tlv {
            Tlv::FilestoreRequest(request) => Some(request),
            _ => None,
        })
    }

    pub fn msgs_to_user(&self) -> impl Iterator<Item = &MsgToUserTlv> {
        self.options.iter().filter_map(|tlv| match tlv {
            Tlv::MsgToUser(msg) => Some(msg),
            _ => None,
        })
    }

    pub fn fault_handler_overrides(&self) -> impl Iterator<Item = &FaultHandlerOverrideTlv> {
        self.options.iter().filter_map(|tlv| match tlv {
            Tlv::FaultHandlerOverride(fh_override) => Some(fh_override),
            _ => None,
        })
    }

    pub fn flow_label(&self) -> Option<&FlowLabelTlv> {
        self.options.iter().find_map(|tlv| match tlv {
            Tlv::FlowLabel(flow_label) => Some(flow_label),
            _ => None,
        })
    }

    fn calc_pdu_datafield_len(&self) -> usize {
        // One directive type octet and one byte of the metadata params.
        let mut len = 2 + fss_field_len(self.file_flag());
        len += 1 + self.src_file_name.as_ref().map_or(0, |name| name.len());
        len += 1 + self.dest_file_name.as_ref().map_or(0, |name| name.len());
        len += self.options.iter().map(|opt| opt.len_full()).sum::<usize>();
        if self.crc_flag() == CrcFlag::WithCrc {
            len += 2;
        }
        len
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, PduError> {
        let (pdu_header, _) = PduHeader::from_bytes(buf)?;
        let file_flag = pdu_header.common_pdu_conf().file_flag;
        let fss_len = fss_field_len(file_flag);
        // Params octet, file size and two (possibly empty) LVs.
        let (pdu_header, mut current_idx, full_len_without_crc) =
            parse_directive_prefix(buf, FileDirectiveType::MetadataPdu, 1 + fss_len + 2)?;
        let raw_checksum_type = buf[current_idx] & 0b1111;
        let unknown_checksum_type = ChecksumType::try_from(raw_checksum_type)
            .is_err()
            .then_some(raw_checksum_type);
        let checksum_type =
            ChecksumType::try_from(raw_checksum_type).unwrap_or(ChecksumType::NullChecksum);
        let closure_requested = ((buf[current_idx] >> 6) & 0b1) != 0;
        current_idx += 1;
        let (_, file_size) = read_fss_field(file_flag, &buf[current_idx..])?;
        current_idx += fss_len;
        let (src_file_name, consumed) =
            read_lv_string(&buf[current_idx..full_len_without_crc])?;
        current_idx += consumed;
        let (dest_file_name, consumed) =
            read_lv_string(&buf[current_idx..full_len_without_crc])?;
        current_idx += consumed;
        let mut options = Vec::new();
        while current_idx < full_len_without_crc {
            let (tlv, consumed) = Tlv::decode(&buf[current_idx..full_len_without_crc])?;
            options.push(tlv);
            current_idx += consumed;
        }
        Ok(Self {
            pdu_header,
            metadata_params: MetadataGenericParams {
                closure_requested,
                checksum_type,
                file_size,
            },
            src_file_name: Some(src_file_name).filter(|name| !name.is_empty()),
            dest_file_name: Some(dest_file_name).filter(|name| !name.is_empty()),
            options,
            unknown_checksum_type,
        })
    }
}

impl CfdpPdu for MetadataPdu {
    fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        Some(FileDirectiveType::MetadataPdu)
    }
}

impl WritablePduPacket for MetadataPdu {
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
        buf[current_idx] = FileDirectiveType::MetadataPdu as u8;
        current_idx += 1;
        let raw_checksum_type = self
            .unknown_checksum_type
            .unwrap_or(self.metadata_params.checksum_type as u8);
        buf[current_idx] =
            ((self.metadata_params.closure_requested as u8) << 6) | (raw_checksum_type & 0b1111);
        current_idx += 1;
        current_idx += write_fss_field(
            self.file_flag(),
            self.metadata_params.file_size,
            &mut buf[current_idx..],
        )?;
        for name in [&self.src_file_name, &self.dest_file_name] {
            let lv = match name {
                Some(name) => Lv::new_from_str(name)?,
                None => Lv::new_empty(),
            };
            current_idx += lv.write_to_bytes(&mut buf[current_idx..])?;
        }
        for option in &self.options {
            current_idx += option.write_to_bytes(&mut buf[current_idx..])?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::tests::{common_pdu_conf, verify_raw_header};
    use crate::pdu::tlv::{RawTlv, TlvLvError};
    use crate::pdu::{ConditionCode, FaultHandlerCode};

    const SRC_FILENAME: &str = "hello-world.txt";
    const DEST_FILENAME: &str = "hello-world2.txt";

    fn generic_metadata_pdu(
        crc_flag: CrcFlag,
        fss: LargeFileFlag,
        options: Vec<Tlv>,
    ) -> MetadataPdu {
        let pdu_header = PduHeader::new_for_file_directive(common_pdu_conf(crc_flag, fss), 0);
        let metadata_params = MetadataGenericParams::new(false, ChecksumType::Crc32, 0x1010);
        MetadataPdu::new(
            pdu_header,
            metadata_params,
            Some(SRC_FILENAME.to_string()),
            Some(DEST_FILENAME.to_string()),
            options,
        )
        .unwrap()
    }

    #[test]
    fn test_basic() {
        let metadata_pdu = generic_metadata_pdu(CrcFlag::NoCrc, LargeFileFlag::Normal, vec![]);
        assert_eq!(metadata_pdu.src_file_name(), Some(SRC_FILENAME));
        assert_eq!(metadata_pdu.dest_file_name(), Some(DEST_FILENAME));
        assert_eq!(metadata_pdu.file_size(), 0x1010);
        assert_eq!(metadata_pdu.checksum_type(), Ok(ChecksumType::Crc32));
        assert!(!metadata_pdu.closure_requested());
        assert!(metadata_pdu.options().is_empty());
        assert_eq!(
            metadata_pdu.len_written(),
            metadata_pdu.pdu_header().header_len()
                + 1
                + 1
                + 4
                + 1
                + SRC_FILENAME.len()
                + 1
                + DEST_FILENAME.len()
        );
    }

    #[test]
    fn test_serialization() {
        let metadata_pdu = generic_metadata_pdu(CrcFlag::NoCrc, LargeFileFlag::Normal, vec![]);
        let raw = metadata_pdu.to_vec().unwrap();
        verify_raw_header(metadata_pdu.pdu_header(), &raw);
        let idx = metadata_pdu.pdu_header().header_len();
        assert_eq!(raw[idx], FileDirectiveType::MetadataPdu as u8);
        assert_eq!(raw[idx + 1], ChecksumType::Crc32 as u8);
        assert_eq!(&raw[idx + 2..idx + 6], &0x1010_u32.to_be_bytes());
        assert_eq!(raw[idx + 6] as usize, SRC_FILENAME.len());
        assert_eq!(MetadataPdu::from_bytes(&raw).unwrap(), metadata_pdu);
    }

    #[test]
    fn test_closure_requested_bit() {
        let pdu_header = PduHeader::new_for_file_directive(
            common_pdu_conf(CrcFlag::NoCrc, LargeFileFlag::Normal),
            0,
        );
        let metadata_pdu = MetadataPdu::new_no_opts(
            pdu_header,
            MetadataGenericParams::new(true, ChecksumType::Modular, 5),
            None,
            None,
        )
        .unwrap();
        let raw = metadata_pdu.to_vec().unwrap();
        let idx = metadata_pdu.pdu_header().header_len();
        assert_eq!(raw[idx + 1], 0b0100_0000);
        let read_back = MetadataPdu::from_bytes(&raw).unwrap();
        assert!(read_back.closure_requested());
        assert_eq!(read_back.src_file_name(), None);
        assert_eq!(read_back.dest_file_name(), None);
    }

    #[test]
    fn test_with_options_and_crc() {
        let options = vec![
            Tlv::MsgToUser(MsgToUserTlv::new(&[1, 2, 3]).unwrap()),
            Tlv::FilestoreRequest(FilestoreRequestTlv::new_delete_file("old.bin").unwrap()),
            Tlv::FaultHandlerOverride(FaultHandlerOverrideTlv::new(
                ConditionCode::FileChecksumFailure,
                FaultHandlerCode::NoticeOfCancellation,
            )),
            Tlv::FlowLabel(FlowLabelTlv::new(&[7]).unwrap()),
        ];
        let metadata_pdu = generic_metadata_pdu(CrcFlag::WithCrc, LargeFileFlag::Large, options);
        let read_back = MetadataPdu::from_bytes(&metadata_pdu.to_vec().unwrap()).unwrap();
        assert_eq!(read_back, metadata_pdu);
        assert_eq!(read_back.msgs_to_user().count(), 1);
        assert_eq!(
            read_back.fs_requests().next().unwrap().first_name(),
            "old.bin"
        );
        let fh_override = read_back.fault_handler_overrides().next().unwrap();
        assert_eq!(
            fh_override.handler_code(),
            FaultHandlerCode::NoticeOfCancellation
        );
        assert_eq!(read_back.flow_label().unwrap().value(), &[7]);
    }

    #[test]
    fn test_unknown_option_is_retained() {
        let unknown = Tlv::Unknown(RawTlv {
            tlv_type: 0x42,
            value: vec![0xaa, 0xbb],
        });
        let metadata_pdu =
            generic_metadata_pdu(CrcFlag::NoCrc, LargeFileFlag::Normal, vec![unknown.clone()]);
        let read_back = MetadataPdu::from_bytes(&metadata_pdu.to_vec().unwrap()).unwrap();
        assert_eq!(read_back.options(), &[unknown]);
    }

    #[test]
    fn test_file_size_too_large() {
        let pdu_header = PduHeader::new_for_file_directive(
            common_pdu_conf(CrcFlag::NoCrc, LargeFileFlag::Normal),
            0,
        );
        let error = MetadataPdu::new_no_opts(
            pdu_header,
            MetadataGenericParams::new(false, ChecksumType::Crc32, u32::MAX as u64 + 1),
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(error, PduError::FileSizeTooLarge(u32::MAX as u64 + 1));
    }

    #[test]
    fn test_unknown_checksum_type_is_retained() {
        let metadata_pdu = generic_metadata_pdu(CrcFlag::NoCrc, LargeFileFlag::Normal, vec![]);
        let mut raw = metadata_pdu.to_vec().unwrap();
        let idx = metadata_pdu.pdu_header().header_len();
        raw[idx + 1] = 7;
        let read_back = MetadataPdu::from_bytes(&raw).unwrap();
        assert_eq!(
            read_back.checksum_type(),
            Err(PduError::InvalidChecksumType(7))
        );
        assert_eq!(read_back.src_file_name(), Some(SRC_FILENAME));
        assert_eq!(read_back.file_size(), 0x1010);
        assert_eq!(read_back.to_vec().unwrap(), raw);
    }

    #[test]
    fn test_truncated_option() {
        let options = vec![Tlv::MsgToUser(MsgToUserTlv::new(&[1, 2, 3]).unwrap())];
        let metadata_pdu = generic_metadata_pdu(CrcFlag::NoCrc, LargeFileFlag::Normal, options);
        let mut raw = metadata_pdu.to_vec().unwrap();
        raw.pop();
        let datafield_len = u16::from_be_bytes([raw[1], raw[2]]) - 1;
        raw[1..3].copy_from_slice(&datafield_len.to_be_bytes());
        assert!(matches!(
            MetadataPdu::from_bytes(&raw).unwrap_err(),
            PduError::MalformedTlv(TlvLvError::ByteConversion(_))
        ));
    }

    #[test]
    fn test_wrong_directive() {
        let metadata_pdu = generic_metadata_pdu(CrcFlag::NoCrc, LargeFileFlag::Normal, vec![]);
        let mut raw = metadata_pdu.to_vec().unwrap();
        let idx = metadata_pdu.pdu_header().header_len();
        raw[idx] = FileDirectiveType::EofPdu as u8;
        assert_eq!(
            MetadataPdu::from_bytes(&raw).unwrap_err(),
            PduError::WrongDirectiveType {
                found: FileDirectiveType::EofPdu,
                expected: FileDirectiveType::MetadataPdu
            }
        );
    }
}
