use crate::pdu::{
    add_pdu_crc, checked_datafield_len, fss_field_len, parse_directive_prefix, read_fss_field,
    write_fss_field, CfdpPdu, CrcFlag, Direction, FileDirectiveType, LargeFileFlag, PduError,
    PduHeader, PduType, WritablePduPacket,
};
use crate::util::ByteConversionError;

/// A segment request as a (start offset, end offset) pair. The end offset is exclusive.
pub type SegmentRequest = (u64, u64);

/// NAK PDU abstraction.
///
/// For more information, refer to CFDP chapter 5.2.6. The segment requests are kept in the
/// order in which they were passed or received. A request of (0, 0) asks for the retransmission
/// of the metadata PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NakPdu {
    pdu_header: PduHeader,
    start_of_scope: u64,
    end_of_scope: u64,
    segment_requests: Vec<SegmentRequest>,
}

impl NakPdu {
    pub fn new(
        mut pdu_header: PduHeader,
        start_of_scope: u64,
        end_of_scope: u64,
        segment_requests: Vec<SegmentRequest>,
    ) -> Result<Self, PduError> {
        pdu_header.set_pdu_type(PduType::FileDirective);
        pdu_header.set_direction(Direction::TowardsSender);
        if pdu_header.common_pdu_conf().file_flag == LargeFileFlag::Normal {
            let too_large = core::iter::once(start_of_scope)
                .chain(core::iter::once(end_of_scope))
                .chain(segment_requests.iter().flat_map(|(start, end)| [*start, *end]))
                .find(|value| *value > u32::MAX as u64);
            if let Some(offset) = too_large {
                return Err(PduError::InvalidOffset {
                    offset,
                    file_flag: LargeFileFlag::Normal,
                });
            }
        }
        let mut nak_pdu = Self {
            pdu_header,
            start_of_scope,
            end_of_scope,
            segment_requests,
        };
        let datafield_len = checked_datafield_len(nak_pdu.calc_pdu_datafield_len())?;
        nak_pdu.pdu_header.set_datafield_len(datafield_len);
        Ok(nak_pdu)
    }

    pub fn start_of_scope(&self) -> u64 {
        self.start_of_scope
    }

    pub fn end_of_scope(&self) -> u64 {
        self.end_of_scope
    }

    pub fn segment_requests(&self) -> &[SegmentRequest] {
        &self.segment_requests
    }

    pub fn num_segment_requests(&self) -> usize {
        self.segment_requests.len()
    }

    fn calc_pdu_datafield_len(&self) -> usize {
        let fss_len = fss_field_len(self.file_flag());
        let mut datafield_len = 1 + 2 * fss_len + self.segment_requests.len() * 2 * fss_len;
        if self.crc_flag() == CrcFlag::WithCrc {
            datafield_len += 2;
        }
        datafield_len
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, PduError> {
        let (pdu_header, _) = PduHeader::from_bytes(buf)?;
        let file_flag = pdu_header.common_pdu_conf().file_flag;
        let fss_len = fss_field_len(file_flag);
        let (pdu_header, mut current_idx, full_len_without_crc) =
            parse_directive_prefix(buf, FileDirectiveType::NakPdu, 2 * fss_len)?;
        let (_, start_of_scope) = read_fss_field(file_flag, &buf[current_idx..])?;
        current_idx += fss_len;
        let (_, end_of_scope) = read_fss_field(file_flag, &buf[current_idx..])?;
        current_idx += fss_len;
        let remaining = full_len_without_crc - current_idx;
        if remaining % (2 * fss_len) != 0 {
            return Err(PduError::TrailingBytes(remaining % (2 * fss_len)));
        }
        let mut segment_requests = Vec::with_capacity(remaining / (2 * fss_len));
        while current_idx < full_len_without_crc {
            let (_, start) = read_fss_field(file_flag, &buf[current_idx..])?;
            current_idx += fss_len;
            let (_, end) = read_fss_field(file_flag, &buf[current_idx..])?;
            current_idx += fss_len;
            segment_requests.push((start, end));
        }
        Ok(Self {
            pdu_header,
            start_of_scope,
            end_of_scope,
            segment_requests,
        })
    }
}

/// Calculates the maximum number of segment requests which fit into a NAK PDU without exceeding
/// the passed maximum packet length.
pub fn calculate_max_segment_requests(
    max_packet_len: usize,
    pdu_header: &PduHeader,
) -> Result<usize, PduError> {
    let fss_len = fss_field_len(pdu_header.common_pdu_conf().file_flag);
    let mut fixed_len = pdu_header.header_len() + 1 + 2 * fss_len;
    if pdu_header.common_pdu_conf().crc_flag == CrcFlag::WithCrc {
        fixed_len += 2;
    }
    if max_packet_len < fixed_len {
        return Err(ByteConversionError::ToSliceTooSmall {
            found: max_packet_len,
            expected: fixed_len,
        }
        .into());
    }
    Ok((max_packet_len - fixed_len) / (2 * fss_len))
}

impl CfdpPdu for NakPdu {
    fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        Some(FileDirectiveType::NakPdu)
    }
}

impl WritablePduPacket for NakPdu {
    fn write_to_bytes(&self, buf: &mut [u8]) -> Result<usize, PduError> {
        let expected_len = self.len_written();
        if buf.len() < expected_len {
            return Err(ByteConversionError::ToSliceTooSmall {
                found: buf.len(),
                expected: expected_len,
            }
            .into());
        }
        let file_flag = self.file_flag();
        let mut current_idx = self.pdu_header.write_to_bytes(buf)?;
        buf[current_idx] = FileDirectiveType::NakPdu as u8;
        current_idx += 1;
        current_idx += write_fss_field(file_flag, self.start_of_scope, &mut buf[current_idx..])?;
        current_idx += write_fss_field(file_flag, self.end_of_scope, &mut buf[current_idx..])?;
        for (start, end) in &self.segment_requests {
            current_idx += write_fss_field(file_flag, *start, &mut buf[current_idx..])?;
            current_idx += write_fss_field(file_flag, *end, &mut buf[current_idx..])?;
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
