//! CFDP user indications.
//!
//! The [CfdpUser] trait is passed into the state machine calls of the source and destination
//! handlers and receives all indications as specified in chapter 3.4 of the CFDP standard.
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    pdu::{
        file_data::SegmentMetadata,
        finished::{DeliveryCode, FileStatus},
        tlv::MsgToUserTlv,
        ConditionCode,
    },
    util::UnsignedByteField,
    TransactionId,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TransactionFinishedParams {
    pub id: TransactionId,
    pub condition_code: ConditionCode,
    pub delivery_code: DeliveryCode,
    pub file_status: FileStatus,
}

#[derive(Debug)]
pub struct MetadataReceivedParams<'names, 'msgs> {
    pub id: TransactionId,
    pub source_id: UnsignedByteField,
    pub file_size: u64,
    pub src_file_name: Option<&'names str>,
    pub dest_file_name: Option<&'names str>,
    pub msgs_to_user: &'msgs [MsgToUserTlv],
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OwnedMetadataRecvdParams {
    pub id: TransactionId,
    pub source_id: UnsignedByteField,
    pub file_size: u64,
    pub src_file_name: Option<String>,
    pub dest_file_name: Option<String>,
    pub msgs_to_user: Vec<Vec<u8>>,
}

impl From<MetadataReceivedParams<'_, '_>> for OwnedMetadataRecvdParams {
    fn from(value: MetadataReceivedParams) -> Self {
        Self::from(&value)
    }
}

impl From<&MetadataReceivedParams<'_, '_>> for OwnedMetadataRecvdParams {
    fn from(value: &MetadataReceivedParams) -> Self {
        Self {
            id: value.id,
            source_id: value.source_id,
            file_size: value.file_size,
            src_file_name: value.src_file_name.map(String::from),
            dest_file_name: value.dest_file_name.map(String::from),
            msgs_to_user: value
                .msgs_to_user
                .iter()
                .map(|msg| msg.value().to_vec())
                .collect(),
        }
    }
}

#[derive(Debug)]
pub struct FileSegmentRecvdParams<'seg_meta> {
    pub id: TransactionId,
    pub offset: u64,
    pub length: usize,
    pub segment_metadata: Option<&'seg_meta SegmentMetadata>,
}

pub trait CfdpUser {
    fn transaction_indication(&mut self, id: &TransactionId);

    fn eof_sent_indication(&mut self, id: &TransactionId);

    fn transaction_finished_indication(&mut self, finished_params: &TransactionFinishedParams);

    fn metadata_recvd_indication(&mut self, md_recvd_params: &MetadataReceivedParams);

    fn file_segment_recvd_indication(&mut self, segment_recvd_params: &FileSegmentRecvdParams);

    fn report_indication(&mut self, id: &TransactionId);

    fn suspended_indication(&mut self, id: &TransactionId, condition_code: ConditionCode);

    fn resumed_indication(&mut self, id: &TransactionId, progress: u64);

    fn fault_indication(
        &mut self,
        id: &TransactionId,
        condition_code: ConditionCode,
        progress: u64,
    );

    fn abandoned_indication(
        &mut self,
        id: &TransactionId,
        condition_code: ConditionCode,
        progress: u64,
    );

    fn eof_recvd_indication(&mut self, id: &TransactionId);
}
