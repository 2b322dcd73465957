//! # CFDP Destination Entity Module
//!
//! The [DestinationHandler] is the receiving counterpart of the [crate::source::SourceHandler].
//! It consumes the Metadata, File Data and EOF PDUs of one transaction, writes the file data
//! into a [VirtualFilestore] and generates all PDUs which are sent back to the sender:
//!
//! 1. ACK PDUs for received EOF PDUs in acknowledged mode.
//! 2. NAK PDUs for missing file data or missing metadata in acknowledged mode. If the immediate
//!    NAK mode of the remote entity is enabled, gaps are requested as soon as they are detected.
//!    After the EOF PDU was received, the complete gap list is re-issued whenever the NAK timer
//!    expires, until the NAK limit is reached.
//! 3. Keep Alive PDUs in acknowledged mode, periodically and on request of a Prompt PDU.
//! 4. A Finished PDU once the file was received completely and its checksum was verified, for
//!    acknowledged transfers and for unacknowledged transfers with requested closure. In
//!    acknowledged mode, the Finished PDU is re-sent until it is acknowledged.
//!
//! File data which arrives before the Metadata PDU is buffered in memory up to a configurable
//! limit and flushed once the destination file is known.
use core::cell::{Cell, RefCell};

use crate::{
    filestore::{execute_filestore_requests, FilestoreError, VirtualFilestore},
    lost_segments::{LostSegmentError, LostSegmentStore},
    pdu::{
        ack::AckPdu,
        eof::EofPdu,
        file_data::FileDataPdu,
        finished::{DeliveryCode, FileStatus, FinishedPdu},
        keep_alive::KeepAlivePdu,
        metadata::MetadataPdu,
        nak::{calculate_max_segment_requests, NakPdu, SegmentRequest},
        prompt::{PromptPdu, PromptResponseRequired},
        tlv::{
            EntityIdTlv, FaultHandlerOverrideTlv, FilestoreRequestTlv, FilestoreResponseTlv,
            MsgToUserTlv, TlvLvError,
        },
        CfdpPdu, ChecksumType, CommonPduConfig, ConditionCode, Direction, FaultHandlerCode,
        FileDirectiveType, PduError, PduHeader, PduType, TransactionStatus, TransmissionMode,
        WritablePduPacket,
    },
    time::Countdown,
    user::{CfdpUser, FileSegmentRecvdParams, MetadataReceivedParams, TransactionFinishedParams},
    util::UnsignedByteField,
    DummyPduProvider, EntityType, EofFaultPrecedence, FaultInfo, GenericSendError,
    LocalEntityConfig, PacketTarget, PduProvider, PduSender, PositiveAckParams, RemoteConfigStore,
    RemoteEntityConfig, State, TimerContext, TimerCreator, TransactionId, TransactionOutcome,
    UserFaultHook,
};

/// Default limit for file data which is buffered before the Metadata PDU arrives.
pub const DEFAULT_MAX_BUFFERED_FILE_DATA: usize = 65536;

/// This enumeration models the different transaction steps of the destination entity handler.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransactionStep {
    Idle = 0,
    /// Transaction was started by a File Data or EOF PDU, the Metadata PDU is still missing.
    WaitingForMetadata = 1,
    ReceivingFileDataPdus = 2,
    /// Unacknowledged transfer where the EOF PDU arrived before all file data.
    ReceivingFileDataPdusWithCheckLimitHandling = 3,
    /// Acknowledged transfer where the EOF PDU arrived before all file data.
    WaitingForMissingData = 4,
    WaitingForFinishedAck = 5,
}

#[derive(Debug, Clone)]
struct MetadataParams {
    closure_requested: bool,
    /// [None] for a checksum type this entity does not know.
    checksum_type: Option<ChecksumType>,
    file_size: u64,
    dest_file_name: Option<String>,
    fs_requests: Vec<FilestoreRequestTlv>,
    fault_handler_overrides: Vec<FaultHandlerOverrideTlv>,
}

#[derive(Debug, Copy, Clone)]
struct EofParams {
    file_checksum: u32,
    file_size: u64,
}

#[derive(Debug, Clone)]
struct FinishedParams {
    condition_code: ConditionCode,
    delivery_code: DeliveryCode,
    file_status: FileStatus,
    fault_location: Option<EntityIdTlv>,
    fs_responses: Vec<FilestoreResponseTlv>,
}

impl Default for FinishedParams {
    fn default() -> Self {
        Self {
            condition_code: ConditionCode::NoError,
            delivery_code: DeliveryCode::Incomplete,
            file_status: FileStatus::Unreported,
            fault_location: None,
            fs_responses: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DestError {
    #[error("can not process packet type {pdu_type:?} with directive type {directive_type:?}")]
    CantProcessPacketType {
        pdu_type: PduType,
        directive_type: Option<FileDirectiveType>,
    },
    #[error("no remote entity configuration found for {0:?}")]
    NoRemoteCfgFound(UnsignedByteField),
    #[error("no transaction active")]
    NoActiveTransaction,
    #[error("filestore error: {0}")]
    FilestoreError(#[from] FilestoreError),
    #[error("error related to PDU creation: {0}")]
    Pdu(#[from] PduError),
    #[error("error building filestore response: {0}")]
    TlvLv(#[from] TlvLvError),
    #[error("lost segment tracking: {0}")]
    LostSegment(#[from] LostSegmentError),
    #[error("issue sending PDU: {0}")]
    SendError(#[from] GenericSendError),
}

/// Decoded inbound PDU. PDUs are decoded completely before they touch the transaction state.
enum InboundPdu<'raw> {
    Metadata(MetadataPdu),
    FileData(FileDataPdu<'raw>),
    Eof(EofPdu),
    Ack(AckPdu),
    Prompt(PromptPdu),
}

impl<'raw> InboundPdu<'raw> {
    fn decode(packet: &'raw impl PduProvider) -> Result<Self, DestError> {
        let raw = packet.raw_pdu();
        Ok(match (packet.pdu_type(), packet.file_directive_type()) {
            (PduType::FileData, _) => Self::FileData(FileDataPdu::from_bytes(raw)?),
            (_, Some(FileDirectiveType::MetadataPdu)) => Self::Metadata(MetadataPdu::from_bytes(raw)?),
            (_, Some(FileDirectiveType::EofPdu)) => Self::Eof(EofPdu::from_bytes(raw)?),
            (_, Some(FileDirectiveType::AckPdu)) => Self::Ack(AckPdu::from_bytes(raw)?),
            (_, Some(FileDirectiveType::PromptPdu)) => Self::Prompt(PromptPdu::from_bytes(raw)?),
            (pdu_type, directive_type) => {
                return Err(DestError::CantProcessPacketType {
                    pdu_type,
                    directive_type,
                })
            }
        })
    }

    fn starts_transaction(&self) -> bool {
        matches!(self, Self::Metadata(_) | Self::FileData(_) | Self::Eof(_))
    }

    fn pdu_header(&self) -> &PduHeader {
        match self {
            Self::Metadata(pdu) => pdu.pdu_header(),
            Self::FileData(pdu) => pdu.pdu_header(),
            Self::Eof(pdu) => pdu.pdu_header(),
            Self::Ack(pdu) => pdu.pdu_header(),
            Self::Prompt(pdu) => pdu.pdu_header(),
        }
    }
}

struct StateHelper {
    step: Cell<TransactionStep>,
    state: Cell<State>,
}

impl Default for StateHelper {
    fn default() -> Self {
        Self {
            state: Cell::new(State::Idle),
            step: Cell::new(TransactionStep::Idle),
        }
    }
}

#[derive(Debug)]
struct TransactionParams<CountdownInstance: Countdown> {
    transaction_id: Option<TransactionId>,
    // Configuration used for all PDUs sent back to the sender.
    pdu_conf: CommonPduConfig,
    remote_cfg: Option<RemoteEntityConfig>,
    metadata: Option<MetadataParams>,
    dest_path: Option<String>,
    file_created: bool,
    /// End of the received file data with the highest offset.
    progress: u64,
    buffered_file_data: Vec<(u64, Vec<u8>)>,
    buffered_len: usize,
    metadata_nak_sent: bool,
    eof: Option<EofParams>,
    /// Set once the transaction is cancelled.
    cond_code: Option<ConditionCode>,
    finished_params: Option<FinishedParams>,
    checksum_failures: u32,
    check_timer: Option<CountdownInstance>,
    check_counter: u32,
    nak_timer: Option<CountdownInstance>,
    nak_counter: u32,
    ack_timer: Option<CountdownInstance>,
    positive_ack_params: Option<PositiveAckParams>,
    inactivity_timer: Option<CountdownInstance>,
    keep_alive_timer: Option<CountdownInstance>,
}

impl<CountdownInstance: Countdown> Default for TransactionParams<CountdownInstance> {
    fn default() -> Self {
        Self {
            transaction_id: None,
            pdu_conf: Default::default(),
            remote_cfg: None,
            metadata: None,
            dest_path: None,
            file_created: false,
            progress: 0,
            buffered_file_data: Vec::new(),
            buffered_len: 0,
            metadata_nak_sent: false,
            eof: None,
            cond_code: None,
            finished_params: None,
            checksum_failures: 0,
            check_timer: None,
            check_counter: 0,
            nak_timer: None,
            nak_counter: 0,
            ack_timer: None,
            positive_ack_params: None,
            inactivity_timer: None,
            keep_alive_timer: None,
        }
    }
}

/// This is the primary CFDP destination handler. It models the CFDP destination entity, which is
/// primarily responsible for receiving files sent from another CFDP entity.
///
/// Packets are inserted with [Self::state_machine], which also drives all timers of an active
/// transaction and therefore should be called periodically as well. A new transaction is started
/// when a Metadata, File Data or EOF PDU is inserted while the handler is idle. Like the source
/// handler, the destination handler processes one transaction at a time.
///
/// After a transaction has finished, the handler still recognizes PDUs of that transaction. A
/// re-sent EOF PDU of an acknowledged transfer is acknowledged again, all other PDUs are
/// dropped.
pub struct DestinationHandler<
    PduSenderInstance: PduSender,
    UserFaultHookInstance: UserFaultHook,
    Vfs: VirtualFilestore,
    RemoteConfigStoreInstance: RemoteConfigStore,
    TimerCreatorInstance: TimerCreator<Countdown = CountdownInstance>,
    CountdownInstance: Countdown,
    LostSegmentTracker: LostSegmentStore,
> {
    local_cfg: LocalEntityConfig<UserFaultHookInstance>,
    pdu_sender: PduSenderInstance,
    pdu_and_cksum_buffer: RefCell<Vec<u8>>,
    remote_cfg_table: RemoteConfigStoreInstance,
    vfs: Vfs,
    state_helper: StateHelper,
    tparams: TransactionParams<CountdownInstance>,
    timer_creator: TimerCreatorInstance,
    lost_segment_tracker: LostSegmentTracker,
    max_buffered_file_data: usize,
    outcome: Option<TransactionOutcome>,
    last_transaction: Option<(TransactionId, CommonPduConfig)>,
}

impl<
        PduSenderInstance: PduSender,
        UserFaultHookInstance: UserFaultHook,
        Vfs: VirtualFilestore,
        RemoteConfigStoreInstance: RemoteConfigStore,
        TimerCreatorInstance: TimerCreator<Countdown = CountdownInstance>,
        CountdownInstance: Countdown,
        LostSegmentTracker: LostSegmentStore,
    >
    DestinationHandler<
        PduSenderInstance,
        UserFaultHookInstance,
        Vfs,
        RemoteConfigStoreInstance,
        TimerCreatorInstance,
        CountdownInstance,
        LostSegmentTracker,
    >
{
    /// Constructs a new destination handler.
    ///
    /// # Arguments
    ///
    /// * `local_cfg` - The local CFDP entity configuration.
    /// * `pdu_and_cksum_buf_size` - Size of the buffer used to generate PDUs and to read the
    ///   file for the checksum verification.
    /// * `pdu_sender` - [PduSender] used to send generated PDU packets.
    /// * `vfs` - [VirtualFilestore] implementation used by the handler.
    /// * `remote_cfg_table` - Remote entity configurations. A transaction can only be started
    ///   if a configuration for the sending entity exists.
    /// * `timer_creator` - [TimerCreator] used to create all protocol timers.
    /// * `lost_segment_tracker` - [LostSegmentStore] used to track file data gaps.
    pub fn new(
        local_cfg: LocalEntityConfig<UserFaultHookInstance>,
        pdu_and_cksum_buf_size: usize,
        pdu_sender: PduSenderInstance,
        vfs: Vfs,
        remote_cfg_table: RemoteConfigStoreInstance,
        timer_creator: TimerCreatorInstance,
        lost_segment_tracker: LostSegmentTracker,
    ) -> Self {
        Self {
            local_cfg,
            pdu_sender,
            pdu_and_cksum_buffer: RefCell::new(vec![0; pdu_and_cksum_buf_size]),
            remote_cfg_table,
            vfs,
            state_helper: Default::default(),
            tparams: Default::default(),
            timer_creator,
            lost_segment_tracker,
            max_buffered_file_data: DEFAULT_MAX_BUFFERED_FILE_DATA,
            outcome: None,
            last_transaction: None,
        }
    }

    /// Limits how many octets of file data are kept in memory while the Metadata PDU is
    /// missing. File data exceeding the limit is dropped and requested again later.
    pub fn with_max_buffered_file_data(mut self, max_buffered_file_data: usize) -> Self {
        self.max_buffered_file_data = max_buffered_file_data;
        self
    }

    /// Calls [Self::state_machine], without inserting a packet.
    pub fn state_machine_no_packet(
        &mut self,
        cfdp_user: &mut impl CfdpUser,
    ) -> Result<u32, DestError> {
        self.state_machine(cfdp_user, None::<&DummyPduProvider>)
    }

    /// This is the core function to drive the destination handler. It is also used to insert
    /// packets into the destination handler.
    ///
    /// The function returns the number of sent PDU packets on success.
    pub fn state_machine(
        &mut self,
        cfdp_user: &mut impl CfdpUser,
        packet_to_insert: Option<&impl PduProvider>,
    ) -> Result<u32, DestError> {
        let mut sent_packets = 0;
        if let Some(packet) = packet_to_insert {
            sent_packets += self.insert_packet(cfdp_user, packet)?;
        }
        if self.state() == State::Busy {
            sent_packets += self.fsm_busy(cfdp_user)?;
        }
        Ok(sent_packets)
    }

    #[inline]
    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.tparams.transaction_id
    }

    #[inline]
    pub fn transmission_mode(&self) -> Option<TransmissionMode> {
        self.tparams
            .transaction_id
            .map(|_| self.tparams.pdu_conf.trans_mode)
    }

    #[inline]
    pub fn step(&self) -> TransactionStep {
        self.state_helper.step.get()
    }

    #[inline]
    pub fn state(&self) -> State {
        self.state_helper.state.get()
    }

    #[inline]
    pub fn local_cfg(&self) -> &LocalEntityConfig<UserFaultHookInstance> {
        &self.local_cfg
    }

    /// End offset of the received file data with the highest offset.
    #[inline]
    pub fn progress(&self) -> u64 {
        self.tparams.progress
    }

    /// Currently missing file data segments.
    #[inline]
    pub fn lost_segments(&self) -> &LostSegmentTracker {
        &self.lost_segment_tracker
    }

    /// Outcome of the last transaction. It is kept until the next transaction starts.
    #[inline]
    pub fn outcome(&self) -> Option<TransactionOutcome> {
        self.outcome
    }

    /// Path of the file which is written by the active transaction.
    pub fn dest_file_path(&self) -> Option<&str> {
        self.tparams.dest_path.as_deref()
    }

    /// Models the Cancel.request CFDP primitive. Returns [true] if the transaction is being
    /// cancelled, which includes a transaction that was cancelled before.
    pub fn cancel_request(
        &mut self,
        user: &mut impl CfdpUser,
        transaction_id: &TransactionId,
    ) -> Result<bool, DestError> {
        if !self.is_active_transaction(transaction_id) {
            return Ok(false);
        }
        if self.tparams.cond_code.is_some() {
            log::debug!("transaction {}: already cancelled", transaction_id);
            return Ok(true);
        }
        let fault_location = EntityIdTlv::new(self.tparams.pdu_conf.dest_id());
        self.notice_of_cancellation(user, ConditionCode::CancelRequestReceived, fault_location)?;
        Ok(true)
    }

    pub fn suspend_request(
        &mut self,
        user: &mut impl CfdpUser,
        transaction_id: &TransactionId,
    ) -> bool {
        if !self.is_active_transaction(transaction_id) || self.state() != State::Busy {
            return false;
        }
        self.notice_of_suspension(user, ConditionCode::SuspendRequestReceived);
        true
    }

    pub fn resume_request(
        &mut self,
        user: &mut impl CfdpUser,
        transaction_id: &TransactionId,
    ) -> bool {
        if !self.is_active_transaction(transaction_id) || self.state() != State::Suspended {
            return false;
        }
        for timer in [
            self.tparams.check_timer.as_mut(),
            self.tparams.nak_timer.as_mut(),
            self.tparams.ack_timer.as_mut(),
            self.tparams.inactivity_timer.as_mut(),
            self.tparams.keep_alive_timer.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            timer.reset();
        }
        self.state_helper.state.set(State::Busy);
        log::info!("transaction {}: resumed", transaction_id);
        if self.local_cfg.indication_cfg.resumed {
            user.resumed_indication(transaction_id, self.progress());
        }
        true
    }

    pub fn report_request(&self, user: &mut impl CfdpUser, transaction_id: &TransactionId) -> bool {
        if !self.is_active_transaction(transaction_id) {
            return false;
        }
        user.report_indication(transaction_id);
        true
    }

    /// Resets the handler and drops the active transaction without notifying the sender.
    pub fn reset(&mut self) {
        if let Some(id) = self.tparams.transaction_id {
            self.last_transaction = Some((id, self.tparams.pdu_conf));
        }
        self.lost_segment_tracker.reset();
        self.state_helper = Default::default();
        self.tparams = Default::default();
    }

    fn is_active_transaction(&self, transaction_id: &TransactionId) -> bool {
        self.state() != State::Idle && self.transaction_id() == Some(*transaction_id)
    }

    fn active_id(&self) -> Result<TransactionId, DestError> {
        self.tparams
            .transaction_id
            .ok_or(DestError::NoActiveTransaction)
    }

    fn remote_cfg(&self) -> Result<RemoteEntityConfig, DestError> {
        self.tparams.remote_cfg.ok_or(DestError::NoActiveTransaction)
    }

    #[inline]
    fn acknowledged_mode(&self) -> bool {
        self.tparams.pdu_conf.trans_mode == TransmissionMode::Acknowledged
    }

    #[inline]
    fn closure_requested(&self) -> bool {
        self.tparams
            .metadata
            .as_ref()
            .is_some_and(|md| md.closure_requested)
    }

    #[inline]
    fn set_step(&self, step: TransactionStep) {
        self.state_helper.step.set(step);
    }

    /// A fault declaration might have cancelled, suspended or reset the transaction.
    fn transaction_continues(&self) -> bool {
        self.state() == State::Busy && self.tparams.cond_code.is_none()
    }

    fn insert_packet(
        &mut self,
        cfdp_user: &mut impl CfdpUser,
        packet_to_insert: &impl PduProvider,
    ) -> Result<u32, DestError> {
        if packet_to_insert.packet_target()? != PacketTarget::DestEntity {
            return Err(DestError::CantProcessPacketType {
                pdu_type: packet_to_insert.pdu_type(),
                directive_type: packet_to_insert.file_directive_type(),
            });
        }
        let pdu = InboundPdu::decode(packet_to_insert)?;
        let pdu_conf = pdu.pdu_header().common_pdu_conf();
        let packet_id = TransactionId::new(pdu_conf.source_id(), pdu_conf.transaction_seq_num);
        if self.state() == State::Idle {
            if matches!(self.last_transaction, Some((last_id, _)) if last_id == packet_id) {
                return self.handle_pdu_for_finished_transaction(packet_id, &pdu);
            }
            if !pdu.starts_transaction() {
                log::debug!(
                    "dropping {:?} PDU for unknown transaction {}",
                    packet_to_insert.file_directive_type(),
                    packet_id
                );
                return Ok(0);
            }
            self.start_transaction(*pdu.pdu_header())?;
        } else if Some(packet_id) != self.transaction_id() {
            log::warn!(
                "dropping PDU for transaction {}, active transaction is {:?}",
                packet_id,
                self.transaction_id()
            );
            return Ok(0);
        }
        if let Some(timer) = self.tparams.inactivity_timer.as_mut() {
            timer.reset();
        }
        match pdu {
            InboundPdu::Metadata(metadata_pdu) => self.handle_metadata_pdu(cfdp_user, &metadata_pdu),
            InboundPdu::FileData(file_data_pdu) => {
                self.handle_file_data_pdu(cfdp_user, &file_data_pdu)
            }
            InboundPdu::Eof(eof_pdu) => self.handle_eof_pdu(cfdp_user, &eof_pdu),
            InboundPdu::Ack(ack_pdu) => self.handle_ack_pdu(cfdp_user, &ack_pdu),
            InboundPdu::Prompt(prompt_pdu) => self.handle_prompt_pdu(&prompt_pdu),
        }
    }

    fn handle_pdu_for_finished_transaction(
        &mut self,
        packet_id: TransactionId,
        pdu: &InboundPdu,
    ) -> Result<u32, DestError> {
        if let (InboundPdu::Eof(eof_pdu), Some((_, pdu_conf))) = (pdu, self.last_transaction) {
            if pdu_conf.trans_mode == TransmissionMode::Acknowledged {
                log::debug!("transaction {}: re-acknowledging duplicate EOF PDU", packet_id);
                let ack_pdu = AckPdu::new_for_eof_pdu(
                    PduHeader::new_for_file_directive(pdu_conf, 0),
                    eof_pdu.condition_code(),
                    TransactionStatus::Terminated,
                );
                self.pdu_send_helper(&ack_pdu)?;
                return Ok(1);
            }
        }
        log::debug!("transaction {}: absorbed PDU after completion", packet_id);
        Ok(0)
    }

    fn start_transaction(&mut self, pdu_header: PduHeader) -> Result<(), DestError> {
        let source_id = pdu_header.common_pdu_conf().source_id();
        let remote_cfg = *self
            .remote_cfg_table
            .get(source_id.value())
            .ok_or(DestError::NoRemoteCfgFound(source_id))?;
        let id = TransactionId::new(
            source_id,
            pdu_header.common_pdu_conf().transaction_seq_num,
        );
        let mut pdu_conf = *pdu_header.common_pdu_conf();
        pdu_conf.direction = Direction::TowardsSender;
        self.tparams = TransactionParams {
            transaction_id: Some(id),
            pdu_conf,
            remote_cfg: Some(remote_cfg),
            inactivity_timer: Some(self.timer_creator.create_countdown(
                TimerContext::Inactivity {
                    expiry_time: remote_cfg.inactivity_timeout,
                },
            )),
            ..Default::default()
        };
        if pdu_conf.trans_mode == TransmissionMode::Acknowledged {
            self.tparams.keep_alive_timer =
                Some(self.timer_creator.create_countdown(TimerContext::KeepAlive {
                    expiry_time: remote_cfg.keep_alive_interval,
                }));
        }
        self.lost_segment_tracker.reset();
        self.outcome = None;
        self.state_helper.state.set(State::Busy);
        self.set_step(TransactionStep::WaitingForMetadata);
        log::info!(
            "transaction {} from entity {} started ({:?})",
            id,
            source_id.value(),
            pdu_conf.trans_mode
        );
        Ok(())
    }

    fn handle_metadata_pdu(
        &mut self,
        user: &mut impl CfdpUser,
        metadata_pdu: &MetadataPdu,
    ) -> Result<u32, DestError> {
        if self.tparams.metadata.is_some() {
            log::debug!("ignoring duplicate metadata PDU");
            return Ok(0);
        }
        let id = self.active_id()?;
        let dest_path = match metadata_pdu.dest_file_name() {
            Some(dest_file_name) => {
                Some(self.resolve_dest_path(dest_file_name, metadata_pdu.src_file_name()))
            }
            None => None,
        };
        let msgs_to_user: Vec<MsgToUserTlv> = metadata_pdu.msgs_to_user().cloned().collect();
        let checksum_type = match metadata_pdu.checksum_type() {
            Ok(checksum_type) => Some(checksum_type),
            Err(e) => {
                log::warn!("transaction {}: {}, file checksum can not be verified", id, e);
                None
            }
        };
        let metadata = MetadataParams {
            closure_requested: metadata_pdu.closure_requested(),
            checksum_type,
            file_size: metadata_pdu.file_size(),
            dest_file_name: metadata_pdu.dest_file_name().map(String::from),
            fs_requests: metadata_pdu.fs_requests().cloned().collect(),
            fault_handler_overrides: metadata_pdu.fault_handler_overrides().copied().collect(),
        };
        log::debug!(
            "transaction {}: metadata received, file size {}, destination {:?}",
            id,
            metadata.file_size,
            dest_path
        );
        self.tparams.metadata = Some(metadata);
        self.tparams.dest_path = dest_path.clone();
        if self.step() == TransactionStep::WaitingForMetadata {
            self.set_step(TransactionStep::ReceivingFileDataPdus);
        }
        user.metadata_recvd_indication(&MetadataReceivedParams {
            id,
            source_id: *id.source_id(),
            file_size: metadata_pdu.file_size(),
            src_file_name: metadata_pdu.src_file_name(),
            dest_file_name: metadata_pdu.dest_file_name(),
            msgs_to_user: &msgs_to_user,
        });

        if let Some(dest_path) = dest_path {
            if let Err(e) = self.create_or_truncate(&dest_path) {
                log::error!("creating destination file {} failed: {}", dest_path, e);
                return self.declare_fault(user, ConditionCode::FilestoreRejection);
            }
            self.tparams.file_created = true;
            let buffered = core::mem::take(&mut self.tparams.buffered_file_data);
            self.tparams.buffered_len = 0;
            for (offset, data) in buffered {
                if let Err(e) = self.vfs.write_data(&dest_path, offset, &data) {
                    log::error!("writing buffered file data failed: {}", e);
                    return self.declare_fault(user, ConditionCode::FilestoreRejection);
                }
            }
        } else if !self.acknowledged_mode() && !self.closure_requested() {
            // No EOF PDU is sent for this kind of transaction.
            return self.transfer_completion(user, DeliveryCode::Complete);
        }
        if self.tparams.eof.is_some() && self.reception_complete() {
            return self.finalize_reception(user);
        }
        Ok(0)
    }

    fn handle_file_data_pdu(
        &mut self,
        user: &mut impl CfdpUser,
        file_data_pdu: &FileDataPdu,
    ) -> Result<u32, DestError> {
        if self.tparams.cond_code.is_some()
            || self.step() == TransactionStep::WaitingForFinishedAck
        {
            log::debug!("ignoring file data PDU in step {:?}", self.step());
            return Ok(0);
        }
        let id = self.active_id()?;
        let offset = file_data_pdu.offset();
        let data = file_data_pdu.file_data();
        if data.is_empty() {
            return Ok(0);
        }
        let Some(end) = offset.checked_add(data.len() as u64) else {
            log::warn!(
                "file data segment at offset {} with {} octets exceeds the addressable range",
                offset,
                data.len()
            );
            return self.declare_fault(user, ConditionCode::FileSizeError);
        };
        if let Some(eof) = self.tparams.eof {
            if end > eof.file_size {
                log::warn!(
                    "file data segment ({}, {}) exceeds file size {}",
                    offset,
                    end,
                    eof.file_size
                );
                return self.declare_fault(user, ConditionCode::FileSizeError);
            }
        }
        if self.tparams.metadata.is_none() {
            if self.tparams.buffered_len + data.len() > self.max_buffered_file_data {
                log::warn!(
                    "transaction {}: buffer for file data before metadata is full, dropping segment at offset {}",
                    id,
                    offset
                );
                return self.request_missing_metadata();
            }
            self.tparams.buffered_file_data.push((offset, data.to_vec()));
            self.tparams.buffered_len += data.len();
        } else if let Some(dest_path) = self.tparams.dest_path.clone() {
            if let Err(e) = self.vfs.write_data(&dest_path, offset, data) {
                log::error!("writing file segment to {} failed: {}", dest_path, e);
                return self.declare_fault(user, ConditionCode::FilestoreRejection);
            }
        } else {
            log::warn!("transaction {}: dropping file data of metadata only transaction", id);
            return Ok(0);
        }
        if self.local_cfg.indication_cfg.file_segment_recv {
            user.file_segment_recvd_indication(&FileSegmentRecvdParams {
                id,
                offset,
                length: data.len(),
                segment_metadata: file_data_pdu.segment_metadata(),
            });
        }
        let new_gap = self.update_gap_tracking(offset, end)?;
        let mut sent_packets = 0;
        if self.acknowledged_mode() && self.remote_cfg()?.immediate_nak_mode {
            let mut segment_requests = Vec::new();
            if self.tparams.metadata.is_none() && !self.tparams.metadata_nak_sent {
                self.tparams.metadata_nak_sent = true;
                segment_requests.push((0, 0));
            }
            segment_requests.extend(new_gap);
            if !segment_requests.is_empty() {
                sent_packets += self.send_nak_pdus(segment_requests)?;
            }
        }
        if self.tparams.eof.is_some() && self.reception_complete() {
            sent_packets += self.finalize_reception(user)?;
        }
        Ok(sent_packets)
    }

    fn request_missing_metadata(&mut self) -> Result<u32, DestError> {
        if !self.acknowledged_mode() || self.tparams.metadata_nak_sent {
            return Ok(0);
        }
        self.tparams.metadata_nak_sent = true;
        self.send_nak_pdus(vec![(0, 0)])
    }

    /// Returns a newly detected gap.
    fn update_gap_tracking(
        &mut self,
        offset: u64,
        end: u64,
    ) -> Result<Option<SegmentRequest>, DestError> {
        let progress = self.tparams.progress;
        let mut new_gap = None;
        if offset > progress {
            log::debug!("file data gap ({}, {}) detected", progress, offset);
            self.lost_segment_tracker
                .add_lost_segment((progress, offset))?;
            new_gap = Some((progress, offset));
        }
        if self
            .lost_segment_tracker
            .remove_lost_segment((offset, end))?
        {
            log::trace!("lost segment data ({}, {}) received", offset, end);
            // Missing data arrived, the NAK procedure starts over.
            self.tparams.nak_counter = 0;
            if let Some(timer) = self.tparams.nak_timer.as_mut() {
                timer.reset();
            }
        }
        self.tparams.progress = progress.max(end);
        Ok(new_gap)
    }

    fn handle_eof_pdu(
        &mut self,
        user: &mut impl CfdpUser,
        eof_pdu: &EofPdu,
    ) -> Result<u32, DestError> {
        if self.tparams.eof.is_some() || self.tparams.cond_code.is_some() {
            // The ACK PDU might have been lost.
            if self.acknowledged_mode() {
                self.send_eof_ack(eof_pdu.condition_code())?;
                return Ok(1);
            }
            return Ok(0);
        }
        let id = self.active_id()?;
        if self.local_cfg.indication_cfg.eof_recv {
            user.eof_recvd_indication(&id);
        }
        let mut sent_packets = 0;
        if self.acknowledged_mode() {
            self.send_eof_ack(eof_pdu.condition_code())?;
            sent_packets += 1;
        }
        if eof_pdu.condition_code() != ConditionCode::NoError {
            log::info!(
                "transaction {}: cancelled by sender with {:?}",
                id,
                eof_pdu.condition_code()
            );
            let fault_location = eof_pdu
                .fault_location()
                .unwrap_or_else(|| EntityIdTlv::new(*id.source_id()));
            sent_packets +=
                self.notice_of_cancellation(user, eof_pdu.condition_code(), fault_location)?;
            return Ok(sent_packets);
        }
        let eof = EofParams {
            file_checksum: eof_pdu.file_checksum(),
            file_size: eof_pdu.file_size(),
        };
        log::debug!(
            "transaction {}: EOF received, file size {}, checksum {:#010x}",
            id,
            eof.file_size,
            eof.file_checksum
        );
        self.tparams.eof = Some(eof);
        if eof.file_size > self.tparams.progress {
            self.lost_segment_tracker
                .add_lost_segment((self.tparams.progress, eof.file_size))?;
        } else if self.tparams.progress > eof.file_size {
            let condition_code = self.eof_size_fault_code(eof);
            log::warn!(
                "transaction {}: received {} octets, EOF file size is {}",
                id,
                self.tparams.progress,
                eof.file_size
            );
            sent_packets += self.declare_fault(user, condition_code)?;
            if !self.transaction_continues() {
                return Ok(sent_packets);
            }
        }
        if self.reception_complete() {
            sent_packets += self.finalize_reception(user)?;
        } else if self.acknowledged_mode() {
            sent_packets += self.send_nak_sequence()?;
            let remote_cfg = self.remote_cfg()?;
            self.tparams.nak_counter = 0;
            self.tparams.nak_timer =
                Some(self.timer_creator.create_countdown(TimerContext::NakActivity {
                    expiry_time: remote_cfg.nak_timer_interval,
                }));
            self.set_step(TransactionStep::WaitingForMissingData);
        } else {
            let remote_cfg = self.remote_cfg()?;
            self.tparams.check_counter = 0;
            self.tparams.check_timer =
                Some(self.timer_creator.create_countdown(TimerContext::CheckLimit {
                    local_id: self.local_cfg.id,
                    remote_id: remote_cfg.entity_id,
                    entity_type: EntityType::Receiving,
                }));
            self.set_step(TransactionStep::ReceivingFileDataPdusWithCheckLimitHandling);
        }
        Ok(sent_packets)
    }

    /// Determines the fault for received data beyond the EOF file size.
    fn eof_size_fault_code(&self, eof: EofParams) -> ConditionCode {
        if self.local_cfg.eof_fault_precedence == EofFaultPrecedence::ChecksumFirst
            && self.tparams.file_created
            && matches!(self.verify_checksum(eof), Ok(Some(false)) | Err(_))
        {
            return ConditionCode::FileChecksumFailure;
        }
        ConditionCode::FileSizeError
    }

    fn reception_complete(&self) -> bool {
        self.tparams.metadata.is_some()
            && self.tparams.eof.is_some()
            && self.lost_segment_tracker.is_empty()
    }

    /// Returns [None] if the checksum type of the transaction is not supported.
    fn verify_checksum(&self, eof: EofParams) -> Result<Option<bool>, FilestoreError> {
        let (Some(metadata), Some(dest_path)) =
            (self.tparams.metadata.as_ref(), self.tparams.dest_path.as_deref())
        else {
            return Ok(Some(eof.file_checksum == 0));
        };
        let Some(checksum_type) = metadata.checksum_type else {
            return Ok(None);
        };
        // The checksum of an empty data set is 0 for all supported checksum types.
        if eof.file_size == 0 {
            return Ok(Some(eof.file_checksum == 0));
        }
        match self.vfs.checksum_verify(
            eof.file_checksum,
            dest_path,
            checksum_type,
            eof.file_size,
            &mut self.pdu_and_cksum_buffer.borrow_mut(),
        ) {
            Ok(verified) => Ok(Some(verified)),
            Err(FilestoreError::ChecksumTypeNotImplemented(checksum_type)) => {
                log::warn!("checksum type {:?} not supported", checksum_type);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Called once all file data was received. Verifies the checksum and completes the
    /// transfer.
    fn finalize_reception(&mut self, user: &mut impl CfdpUser) -> Result<u32, DestError> {
        let eof = self.tparams.eof.ok_or(DestError::NoActiveTransaction)?;
        let mut sent_packets = 0;
        let mut delivery_code = DeliveryCode::Complete;
        let verified = match self.verify_checksum(eof) {
            Ok(Some(verified)) => verified,
            Ok(None) => {
                sent_packets += self.declare_fault(user, ConditionCode::UnsupportedChecksumType)?;
                if !self.transaction_continues() {
                    return Ok(sent_packets);
                }
                true
            }
            Err(e) => {
                log::error!("checksum verification failed: {}", e);
                return self.declare_fault(user, ConditionCode::FilestoreRejection);
            }
        };
        if !verified {
            let remote_cfg = self.remote_cfg()?;
            if self.acknowledged_mode()
                && eof.file_size > 0
                && self.tparams.checksum_failures < remote_cfg.nak_timer_expiration_limit
            {
                self.tparams.checksum_failures += 1;
                log::warn!(
                    "transaction {}: checksum mismatch, requesting the whole file again",
                    self.active_id()?
                );
                self.lost_segment_tracker
                    .add_lost_segment((0, eof.file_size))?;
                sent_packets += self.send_nak_sequence()?;
                self.tparams.nak_counter = 0;
                self.tparams.nak_timer =
                    Some(self.timer_creator.create_countdown(TimerContext::NakActivity {
                        expiry_time: remote_cfg.nak_timer_interval,
                    }));
                self.set_step(TransactionStep::WaitingForMissingData);
                return Ok(sent_packets);
            }
            sent_packets += self.declare_fault(user, ConditionCode::FileChecksumFailure)?;
            if !self.transaction_continues() {
                return Ok(sent_packets);
            }
            delivery_code = DeliveryCode::Incomplete;
        }
        sent_packets += self.transfer_completion(user, delivery_code)?;
        Ok(sent_packets)
    }

    fn transfer_completion(
        &mut self,
        user: &mut impl CfdpUser,
        delivery_code: DeliveryCode,
    ) -> Result<u32, DestError> {
        let fs_responses = match self.tparams.metadata.as_ref() {
            Some(metadata)
                if delivery_code == DeliveryCode::Complete && !metadata.fs_requests.is_empty() =>
            {
                execute_filestore_requests(&self.vfs, metadata.fs_requests.iter())?
            }
            _ => Vec::new(),
        };
        self.tparams.finished_params = Some(FinishedParams {
            condition_code: ConditionCode::NoError,
            delivery_code,
            file_status: if self.tparams.file_created {
                FileStatus::Retained
            } else {
                FileStatus::Unreported
            },
            fault_location: None,
            fs_responses,
        });
        self.tparams.check_timer = None;
        self.tparams.nak_timer = None;
        let mut sent_packets = 0;
        if self.acknowledged_mode() || self.closure_requested() {
            self.send_finished_pdu()?;
            sent_packets += 1;
        }
        if self.acknowledged_mode() {
            self.start_positive_ack_procedure(false)?;
        } else {
            self.notice_of_completion(user);
            self.reset();
        }
        Ok(sent_packets)
    }

    fn handle_ack_pdu(
        &mut self,
        user: &mut impl CfdpUser,
        ack_pdu: &AckPdu,
    ) -> Result<u32, DestError> {
        if ack_pdu.directive_code_of_acked_pdu() != FileDirectiveType::FinishedPdu {
            log::warn!(
                "ACK for unexpected directive {:?}",
                ack_pdu.directive_code_of_acked_pdu()
            );
            return Ok(0);
        }
        if self.step() != TransactionStep::WaitingForFinishedAck {
            log::debug!("ignoring ACK(Finished) in step {:?}", self.step());
            return Ok(0);
        }
        self.tparams.ack_timer = None;
        self.notice_of_completion(user);
        self.reset();
        Ok(0)
    }

    fn handle_prompt_pdu(&mut self, prompt_pdu: &PromptPdu) -> Result<u32, DestError> {
        if self.tparams.cond_code.is_some()
            || self.step() == TransactionStep::WaitingForFinishedAck
        {
            return Ok(0);
        }
        match prompt_pdu.response_required() {
            PromptResponseRequired::Nak => self.send_nak_sequence(),
            PromptResponseRequired::KeepAlive => {
                self.send_keep_alive_pdu()?;
                Ok(1)
            }
        }
    }

    fn fsm_busy(&mut self, user: &mut impl CfdpUser) -> Result<u32, DestError> {
        if self
            .tparams
            .inactivity_timer
            .as_ref()
            .is_some_and(|timer| timer.has_expired())
        {
            if let Some(timer) = self.tparams.inactivity_timer.as_mut() {
                timer.reset();
            }
            return self.declare_fault(user, ConditionCode::InactivityDetected);
        }
        let mut sent_packets = match self.step() {
            TransactionStep::ReceivingFileDataPdusWithCheckLimitHandling => {
                self.check_limit_handling(user)?
            }
            TransactionStep::WaitingForMissingData => self.deferred_lost_segment_handling(user)?,
            TransactionStep::WaitingForFinishedAck => self.positive_ack_handling(user)?,
            _ => 0,
        };
        if self.state() == State::Busy
            && self.step() != TransactionStep::WaitingForFinishedAck
            && self
                .tparams
                .keep_alive_timer
                .as_ref()
                .is_some_and(|timer| timer.has_expired())
        {
            if let Some(timer) = self.tparams.keep_alive_timer.as_mut() {
                timer.reset();
            }
            self.send_keep_alive_pdu()?;
            sent_packets += 1;
        }
        Ok(sent_packets)
    }

    fn check_limit_handling(&mut self, user: &mut impl CfdpUser) -> Result<u32, DestError> {
        let Some(timer) = self.tparams.check_timer.as_mut() else {
            return Ok(0);
        };
        if !timer.has_expired() {
            return Ok(0);
        }
        timer.reset();
        if self.tparams.check_counter + 1 >= self.remote_cfg()?.check_limit {
            return self.declare_fault(user, ConditionCode::CheckLimitReached);
        }
        self.tparams.check_counter += 1;
        log::debug!(
            "check limit timer expired, counter {}",
            self.tparams.check_counter
        );
        Ok(0)
    }

    fn deferred_lost_segment_handling(
        &mut self,
        user: &mut impl CfdpUser,
    ) -> Result<u32, DestError> {
        let Some(timer) = self.tparams.nak_timer.as_mut() else {
            return Ok(0);
        };
        if !timer.has_expired() {
            return Ok(0);
        }
        timer.reset();
        if self.tparams.nak_counter + 1 >= self.remote_cfg()?.nak_timer_expiration_limit {
            return self.declare_fault(user, ConditionCode::NakLimitReached);
        }
        self.tparams.nak_counter += 1;
        log::debug!(
            "NAK timer expired, re-issuing NAK sequence ({})",
            self.tparams.nak_counter
        );
        self.send_nak_sequence()
    }

    fn positive_ack_handling(&mut self, user: &mut impl CfdpUser) -> Result<u32, DestError> {
        let Some(mut params) = self.tparams.positive_ack_params else {
            return Ok(0);
        };
        let Some(timer) = self.tparams.ack_timer.as_mut() else {
            return Ok(0);
        };
        if !timer.has_expired() {
            return Ok(0);
        }
        timer.reset();
        if params.ack_counter + 1 >= self.remote_cfg()?.positive_ack_timer_expiration_limit {
            return self.declare_fault(user, ConditionCode::PositiveAckLimitReached);
        }
        params.ack_counter += 1;
        self.tparams.positive_ack_params = Some(params);
        log::debug!(
            "positive ACK timer expired, re-sending Finished PDU ({})",
            params.ack_counter
        );
        self.send_finished_pdu()?;
        Ok(1)
    }

    fn start_positive_ack_procedure(&mut self, of_cancellation: bool) -> Result<(), DestError> {
        let remote_cfg = self.remote_cfg()?;
        self.tparams.positive_ack_params = Some(PositiveAckParams {
            ack_counter: 0,
            positive_ack_of_cancellation: of_cancellation,
        });
        self.tparams.ack_timer =
            Some(self.timer_creator.create_countdown(TimerContext::PositiveAck {
                expiry_time: remote_cfg.positive_ack_timer_interval,
            }));
        self.tparams.keep_alive_timer = None;
        self.set_step(TransactionStep::WaitingForFinishedAck);
        Ok(())
    }

    fn notice_of_cancellation(
        &mut self,
        user: &mut impl CfdpUser,
        condition_code: ConditionCode,
        fault_location: EntityIdTlv,
    ) -> Result<u32, DestError> {
        let id = self.active_id()?;
        log::info!("transaction {}: cancelled with {:?}", id, condition_code);
        self.tparams.cond_code = Some(condition_code);
        self.tparams.check_timer = None;
        self.tparams.nak_timer = None;
        self.tparams.inactivity_timer = None;
        self.state_helper.state.set(State::Busy);
        let delivery_code = match self.tparams.finished_params.as_ref() {
            Some(params) => params.delivery_code,
            None if self.reception_complete()
                && !matches!(
                    condition_code,
                    ConditionCode::FileSizeError | ConditionCode::FileChecksumFailure
                ) =>
            {
                DeliveryCode::Complete
            }
            None => DeliveryCode::Incomplete,
        };
        let mut file_status = if self.tparams.file_created {
            FileStatus::Retained
        } else {
            FileStatus::Unreported
        };
        if self.tparams.file_created && self.remote_cfg()?.disposition_on_cancellation {
            if let Some(dest_path) = self.tparams.dest_path.as_deref() {
                file_status = match self.vfs.remove_file(dest_path) {
                    Ok(()) => FileStatus::DiscardDeliberately,
                    Err(e) => {
                        log::error!("discarding {} failed: {}", dest_path, e);
                        FileStatus::DiscardedFsRejection
                    }
                };
            }
        }
        self.tparams.finished_params = Some(FinishedParams {
            condition_code,
            delivery_code,
            file_status,
            fault_location: Some(fault_location),
            fs_responses: Vec::new(),
        });
        let mut sent_packets = 0;
        if self.acknowledged_mode() || self.closure_requested() {
            self.send_finished_pdu()?;
            sent_packets += 1;
        }
        if self.acknowledged_mode() {
            self.start_positive_ack_procedure(true)?;
        } else {
            self.notice_of_completion(user);
            self.reset();
        }
        Ok(sent_packets)
    }

    fn notice_of_suspension(&mut self, user: &mut impl CfdpUser, condition_code: ConditionCode) {
        self.state_helper.state.set(State::Suspended);
        if let Some(id) = self.transaction_id() {
            log::info!("transaction {}: suspended with {:?}", id, condition_code);
            if self.local_cfg.indication_cfg.suspended {
                user.suspended_indication(&id, condition_code);
            }
        }
    }

    fn notice_of_completion(&mut self, user: &mut impl CfdpUser) {
        let Some(id) = self.transaction_id() else {
            return;
        };
        let outcome = match self.tparams.cond_code {
            Some(condition_code) => TransactionOutcome::Cancelled(condition_code),
            None => TransactionOutcome::Completed,
        };
        let finished_params = self.tparams.finished_params.clone().unwrap_or_default();
        log::info!("transaction {}: finished with {:?}", id, outcome);
        if self.local_cfg.indication_cfg.transaction_finished {
            user.transaction_finished_indication(&TransactionFinishedParams {
                id,
                condition_code: finished_params.condition_code,
                delivery_code: finished_params.delivery_code,
                file_status: finished_params.file_status,
            });
        }
        self.outcome = Some(outcome);
    }

    fn declare_fault(
        &mut self,
        user: &mut impl CfdpUser,
        condition_code: ConditionCode,
    ) -> Result<u32, DestError> {
        let id = self.active_id()?;
        let overrides = self
            .tparams
            .metadata
            .as_ref()
            .map(|md| md.fault_handler_overrides.as_slice())
            .unwrap_or_default();
        let mut fh = self
            .local_cfg
            .fault_handler
            .get_fault_handler_with_overrides(condition_code, overrides);
        if self
            .tparams
            .positive_ack_params
            .is_some_and(|params| params.positive_ack_of_cancellation)
        {
            fh = FaultHandlerCode::AbandonTransaction;
        }
        log::warn!(
            "transaction {}: fault {:?} declared, handler {:?}",
            id,
            condition_code,
            fh
        );
        let progress = self.progress();
        let mut sent_packets = 0;
        match fh {
            FaultHandlerCode::NoticeOfCancellation => {
                let fault_location = EntityIdTlv::new(self.tparams.pdu_conf.dest_id());
                sent_packets += self.notice_of_cancellation(user, condition_code, fault_location)?;
            }
            FaultHandlerCode::NoticeOfSuspension => self.notice_of_suspension(user, condition_code),
            FaultHandlerCode::IgnoreError => user.fault_indication(&id, condition_code, progress),
            FaultHandlerCode::AbandonTransaction => {
                log::warn!("transaction {}: abandoned with {:?}", id, condition_code);
                user.abandoned_indication(&id, condition_code, progress);
                self.outcome = Some(TransactionOutcome::Abandoned(condition_code));
                self.reset();
            }
        }
        self.local_cfg
            .fault_handler
            .report_fault(fh, FaultInfo::new(id, condition_code, progress));
        Ok(sent_packets)
    }

    fn resolve_dest_path(&self, dest_file_name: &str, src_file_name: Option<&str>) -> String {
        // A destination directory receives the file under its source file name.
        if self.vfs.exists(dest_file_name).unwrap_or(false)
            && self.vfs.is_dir(dest_file_name).unwrap_or(false)
        {
            if let Some(file_name) =
                src_file_name.and_then(|src| self.vfs.file_name(src).ok().flatten())
            {
                return format!("{}/{}", dest_file_name.trim_end_matches('/'), file_name);
            }
        }
        String::from(dest_file_name)
    }

    fn create_or_truncate(&self, dest_path: &str) -> Result<(), FilestoreError> {
        if self.vfs.exists(dest_path)? {
            self.vfs.truncate_file(dest_path)
        } else {
            self.vfs.create_file(dest_path)
        }
    }

    fn send_nak_sequence(&self) -> Result<u32, DestError> {
        let mut segment_requests = Vec::new();
        if self.tparams.metadata.is_none() {
            segment_requests.push((0, 0));
        }
        segment_requests.extend(self.lost_segment_tracker.iter());
        self.send_nak_pdus(segment_requests)
    }

    /// Sends the segment requests, split into as many NAK PDUs as required by the maximum
    /// packet length of the remote entity.
    fn send_nak_pdus(&self, segment_requests: Vec<SegmentRequest>) -> Result<u32, DestError> {
        let pdu_header = PduHeader::new_for_file_directive(self.tparams.pdu_conf, 0);
        let end_of_scope = self
            .tparams
            .eof
            .map(|eof| eof.file_size)
            .unwrap_or_default()
            .max(self.tparams.progress);
        if segment_requests.is_empty() {
            self.pdu_send_helper(&NakPdu::new(pdu_header, 0, end_of_scope, Vec::new())?)?;
            return Ok(1);
        }
        let max_segment_requests =
            calculate_max_segment_requests(self.remote_cfg()?.max_packet_len, &pdu_header)?
                .max(1);
        let mut sent_packets = 0;
        for chunk in segment_requests.chunks(max_segment_requests) {
            let nak_pdu = NakPdu::new(pdu_header, 0, end_of_scope, chunk.to_vec())?;
            self.pdu_send_helper(&nak_pdu)?;
            sent_packets += 1;
        }
        log::debug!(
            "sent {} NAK PDU(s) with {} segment request(s)",
            sent_packets,
            segment_requests.len()
        );
        Ok(sent_packets)
    }

    fn send_eof_ack(&self, condition_code: ConditionCode) -> Result<(), DestError> {
        let ack_pdu = AckPdu::new_for_eof_pdu(
            PduHeader::new_for_file_directive(self.tparams.pdu_conf, 0),
            condition_code,
            TransactionStatus::Active,
        );
        self.pdu_send_helper(&ack_pdu)
    }

    fn send_keep_alive_pdu(&self) -> Result<(), DestError> {
        let keep_alive_pdu = KeepAlivePdu::new(
            PduHeader::new_for_file_directive(self.tparams.pdu_conf, 0),
            self.tparams.progress,
        )?;
        self.pdu_send_helper(&keep_alive_pdu)
    }

    fn send_finished_pdu(&self) -> Result<(), DestError> {
        let params = self
            .tparams
            .finished_params
            .clone()
            .ok_or(DestError::NoActiveTransaction)?;
        let finished_pdu = FinishedPdu::new(
            PduHeader::new_for_file_directive(self.tparams.pdu_conf, 0),
            params.condition_code,
            params.delivery_code,
            params.file_status,
            params.fs_responses,
            params.fault_location,
        )?;
        self.pdu_send_helper(&finished_pdu)
    }

    fn pdu_send_helper(&self, pdu: &(impl WritablePduPacket + CfdpPdu)) -> Result<(), DestError> {
        let mut pdu_buffer_mut = self.pdu_and_cksum_buffer.borrow_mut();
        let written_len = pdu.write_to_bytes(&mut pdu_buffer_mut)?;
        if let Err(e) = self.pdu_sender.send_pdu(
            pdu.pdu_type(),
            pdu.file_directive_type(),
            &pdu_buffer_mut[0..written_len],
        ) {
            log::error!("sending {:?} PDU failed: {}", pdu.file_directive_type(), e);
            return Err(e.into());
        }
        Ok(())
    }
}
