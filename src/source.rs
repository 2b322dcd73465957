//! # CFDP Source Entity Module
//!
//! The [SourceHandler] is the primary component of this module which converts a
//! [ReadablePutRequest] into all packet data units (PDUs) which need to be sent to a remote
//! CFDP entity to perform a File Copy operation to a remote entity.
//!
//! The source entity allows freedom communication by using a user-provided [PduSender] instance
//! to send all generated PDUs. It should be noted that for regular file transfers, each
//! [SourceHandler::state_machine] call will map to one generated file data PDU. This allows
//! flow control for the user of the state machine.
//!
//! The [SourceHandler::state_machine] will generally perform the following steps after a valid
//! put request was received through the [SourceHandler::put_request] method:
//!
//! 1. Generate the Metadata PDU to be sent to a remote CFDP entity. The
//!    [crate::pdu::metadata::MetadataPdu] can be used to inspect the generated PDU.
//! 2. Generate all File Data PDUs to be sent to a remote CFDP entity if applicable (file not
//!    empty). The PDU(s) can be inspected using the [crate::pdu::file_data::FileDataPdu].
//! 3. Generate an EOF PDU to be sent to a remote CFDP entity. The PDU can be inspected using
//!    the [crate::pdu::eof::EofPdu].
//!
//! If this is an unacknowledged transfer with no transaction closure, the file transfer will be
//! done after these steps. In any other case:
//!
//! ### Unacknowledged transfer with requested closure
//!
//! 4. A Finished PDU will be awaited under the check limit timer.
//!
//! ### Acknowledged transfer
//!
//! 4. A EOF ACK packet will be awaited. The EOF PDU is re-sent each time the positive ACK timer
//!    expires.
//! 5. Lost segments requested with NAK PDUs are re-transmitted as they arrive.
//! 6. A Finished PDU will be awaited under the inactivity timer.
//! 7. A Finished PDU ACK packet will be generated to be sent to the remote CFDP entity.
use core::{cell::Cell, cell::RefCell, ops::ControlFlow};

use crate::{
    pdu::{
        ack::AckPdu,
        eof::EofPdu,
        file_data::{calculate_max_file_seg_len_for_max_packet_len_and_pdu_header, FileDataPdu},
        finished::{DeliveryCode, FileStatus, FinishedPdu},
        keep_alive::KeepAlivePdu,
        metadata::{MetadataGenericParams, MetadataPdu},
        nak::NakPdu,
        prompt::{PromptPdu, PromptResponseRequired},
        tlv::EntityIdTlv,
        CfdpPdu, ChecksumType, CommonPduConfig, ConditionCode, CrcFlag, Direction,
        FaultHandlerCode, FileDirectiveType, LargeFileFlag, PduError, PduHeader, PduType,
        SegmentMetadataFlag, SegmentationControl, TransactionStatus, TransmissionMode,
        WritablePduPacket,
    },
    seq_count::SequenceCounter,
    time::Countdown,
    util::{UnsignedByteField, UnsignedByteFieldError},
    DummyPduProvider, EntityType, FaultInfo, GenericSendError, PduProvider, PositiveAckParams,
    TimerContext, TimerCreator, TransactionOutcome,
};

use super::{
    filestore::{FilestoreError, VirtualFilestore},
    request::{PutRequestOwned, ReadablePutRequest},
    user::{CfdpUser, TransactionFinishedParams},
    LocalEntityConfig, PacketTarget, PduSender, RemoteConfigStore, RemoteEntityConfig, State,
    TransactionId, UserFaultHook,
};

/// This enumeration models the different transaction steps of the source entity handler.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransactionStep {
    Idle = 0,
    TransactionStart = 1,
    SendingMetadata = 3,
    SendingFileData = 4,
    SendingEof = 6,
    WaitingForEofAck = 7,
    WaitingForFinished = 8,
    NoticeOfCompletion = 10,
}

#[derive(Default, Debug, Copy, Clone)]
pub struct FileParams {
    pub progress: u64,
    pub segment_len: u64,
    pub metadata_only: bool,
    pub file_size: u64,
    pub empty_file: bool,
    pub checksum_type: ChecksumType,
    /// Checksum of the last sent EOF PDU, which is re-used when the EOF PDU is re-sent.
    pub eof_checksum: Option<u32>,
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

#[derive(Debug, Copy, Clone)]
pub struct FinishedParams {
    condition_code: ConditionCode,
    delivery_code: DeliveryCode,
    file_status: FileStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("can not process packet type {pdu_type:?} with directive type {directive_type:?}")]
    CantProcessPacketType {
        pdu_type: PduType,
        directive_type: Option<FileDirectiveType>,
    },
    #[error("unexpected PDU")]
    UnexpectedPdu {
        pdu_type: PduType,
        directive_type: Option<FileDirectiveType>,
    },
    #[error("no transaction active")]
    NoActiveTransaction,
    #[error("filestore error: {0}")]
    FilestoreError(#[from] FilestoreError),
    #[error("error related to PDU creation: {0}")]
    Pdu(#[from] PduError),
    #[error("issue sending PDU: {0}")]
    SendError(#[from] GenericSendError),
}

#[derive(Debug, thiserror::Error)]
pub enum PutRequestError {
    #[error("already busy with put request")]
    AlreadyBusy,
    #[error("no remote entity configuration found for {0:?}")]
    NoRemoteCfgFound(UnsignedByteField),
    #[error("source file does not exist")]
    FileDoesNotExist,
    #[error("filestore error: {0}")]
    FilestoreError(#[from] FilestoreError),
    #[error("invalid PDU configuration: {0}")]
    Pdu(#[from] PduError),
    #[error("entity ID does not fit the configured width: {0}")]
    EntityIdWidth(#[from] UnsignedByteFieldError),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AnomalyTracker {
    invalid_ack_directive_code: u8,
    invalid_segment_requests: u32,
    foreign_pdus: u32,
}

impl AnomalyTracker {
    pub fn invalid_ack_directive_code(&self) -> u8 {
        self.invalid_ack_directive_code
    }

    pub fn invalid_segment_requests(&self) -> u32 {
        self.invalid_segment_requests
    }

    pub fn foreign_pdus(&self) -> u32 {
        self.foreign_pdus
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub enum FsmContext {
    #[default]
    None,
    ResetWhenPossible,
}

#[derive(Debug)]
pub struct TransactionParams<CountdownInstance: Countdown> {
    transaction_id: Option<TransactionId>,
    put_request: Option<PutRequestOwned>,
    remote_cfg: Option<RemoteEntityConfig>,
    closure_requested: bool,
    seg_ctrl: SegmentationControl,
    /// Set once the transaction is cancelled, which also means that an EOF (cancel) PDU was sent.
    cond_code_eof: Option<ConditionCode>,
    finished_params: Option<FinishedParams>,
    // File specific transfer fields
    file_params: FileParams,
    // PDU configuration is cached so it can be re-used for all PDUs generated for file transfers.
    pdu_conf: CommonPduConfig,
    check_timer: Option<CountdownInstance>,
    positive_ack_params: Option<PositiveAckParams>,
    ack_timer: Option<CountdownInstance>,
    inactivity_timer: Option<CountdownInstance>,
    remote_progress: Option<u64>,
}

impl<CountdownInstance: Countdown> Default for TransactionParams<CountdownInstance> {
    fn default() -> Self {
        Self {
            transaction_id: Default::default(),
            put_request: Default::default(),
            remote_cfg: Default::default(),
            closure_requested: Default::default(),
            seg_ctrl: SegmentationControl::NoRecordBoundaryPreservation,
            cond_code_eof: Default::default(),
            finished_params: Default::default(),
            file_params: Default::default(),
            pdu_conf: Default::default(),
            check_timer: Default::default(),
            positive_ack_params: Default::default(),
            ack_timer: Default::default(),
            inactivity_timer: Default::default(),
            remote_progress: Default::default(),
        }
    }
}

/// This is the primary CFDP source handler. It models the CFDP source entity, which is
/// primarily responsible for handling put requests to send files to another CFDP destination
/// entity.
///
/// As such, it contains a state machine to perform all operations necessary to perform a
/// source-to-destination file transfer. This class uses the user provides [PduSender] to
/// send the CFDP PDU packets generated by the state machine.
///
/// The following core functions are the primary interface:
///
/// 1. [Self::put_request] can be used to start transactions, most notably to start
///    and perform a Copy File procedure to send a file.
/// 2. [Self::state_machine] is the primary interface to execute an
///    active file transfer. It generates the necessary CFDP PDUs for this process.
///    This method is also used to insert received packets with the appropriate destination ID
///    and target handler type into the state machine.
///
/// A put request will only be accepted if the handler is in the idle state. The
/// [crate::entity::EntityManager] creates one handler per transaction to run transactions
/// concurrently.
///
/// The handler allocates its PDU and checksum buffer at construction time. It uses the
/// [VirtualFilestore] abstraction for all file accesses.
pub struct SourceHandler<
    PduSenderInstance: PduSender,
    UserFaultHookInstance: UserFaultHook,
    Vfs: VirtualFilestore,
    RemoteConfigStoreInstance: RemoteConfigStore,
    TimerCreatorInstance: TimerCreator<Countdown = CountdownInstance>,
    CountdownInstance: Countdown,
    SequenceCounterInstance: SequenceCounter,
> {
    local_cfg: LocalEntityConfig<UserFaultHookInstance>,
    pdu_sender: PduSenderInstance,
    pdu_and_cksum_buffer: RefCell<Vec<u8>>,
    file_data_buffer: Vec<u8>,
    remote_cfg_table: RemoteConfigStoreInstance,
    vfs: Vfs,
    state_helper: StateHelper,
    transaction_params: TransactionParams<CountdownInstance>,
    timer_creator: TimerCreatorInstance,
    seq_count_provider: SequenceCounterInstance,
    outcome: Option<TransactionOutcome>,
    last_transaction: Option<(TransactionId, CommonPduConfig)>,
    anomalies: AnomalyTracker,
}

impl<
        PduSenderInstance: PduSender,
        UserFaultHookInstance: UserFaultHook,
        Vfs: VirtualFilestore,
        RemoteConfigStoreInstance: RemoteConfigStore,
        TimerCreatorInstance: TimerCreator<Countdown = CountdownInstance>,
        CountdownInstance: Countdown,
        SequenceCounterInstance: SequenceCounter,
    >
    SourceHandler<
        PduSenderInstance,
        UserFaultHookInstance,
        Vfs,
        RemoteConfigStoreInstance,
        TimerCreatorInstance,
        CountdownInstance,
        SequenceCounterInstance,
    >
{
    /// Creates a new instance of a source handler.
    ///
    /// # Arguments
    ///
    /// * `cfg` - The local entity configuration for this source handler.
    /// * `pdu_sender` - [PduSender] used to send CFDP PDUs generated by the handler.
    /// * `vfs` - [VirtualFilestore] implementation used by the handler, which decouples the CFDP
    ///   implementation from the underlying filestore/filesystem.
    /// * `pdu_and_cksum_buf_size` - The handler requires a buffer to generate PDUs and perform
    ///   checksum calculations. The user can specify the size of this buffer, so this should be
    ///   set to the maximum expected PDU size or a conservative upper bound for this size, for
    ///   example 2048 or 4096 bytes.
    /// * `remote_cfg_table` - The [RemoteEntityConfig] used to look up remote
    ///   entities and target specific configuration for file copy operations.
    /// * `timer_creator` - [TimerCreator] used by the CFDP handler to generate
    ///   timers required by various tasks.
    /// * `seq_count_provider` - The [SequenceCounter] used to generate the [TransactionId]
    ///   which contains an incrementing counter.
    pub fn new(
        cfg: LocalEntityConfig<UserFaultHookInstance>,
        pdu_sender: PduSenderInstance,
        vfs: Vfs,
        pdu_and_cksum_buf_size: usize,
        remote_cfg_table: RemoteConfigStoreInstance,
        timer_creator: TimerCreatorInstance,
        seq_count_provider: SequenceCounterInstance,
    ) -> Self {
        Self {
            local_cfg: cfg,
            remote_cfg_table,
            pdu_sender,
            pdu_and_cksum_buffer: RefCell::new(vec![0; pdu_and_cksum_buf_size]),
            file_data_buffer: vec![0; pdu_and_cksum_buf_size],
            vfs,
            state_helper: Default::default(),
            transaction_params: Default::default(),
            anomalies: Default::default(),
            timer_creator,
            seq_count_provider,
            outcome: None,
            last_transaction: None,
        }
    }

    /// Calls [Self::state_machine], without inserting a packet.
    pub fn state_machine_no_packet(
        &mut self,
        cfdp_user: &mut impl CfdpUser,
    ) -> Result<u32, SourceError> {
        self.state_machine(cfdp_user, None::<&DummyPduProvider>)
    }

    /// This is the core function to drive the source handler. It is also used to insert
    /// packets into the source handler.
    ///
    /// The state machine should either be called if a packet with the appropriate destination ID
    /// is received, or periodically in IDLE periods to perform all CFDP related tasks, for example
    /// checking for timeouts or missed file segments.
    ///
    /// The function returns the number of sent PDU packets on success.
    pub fn state_machine(
        &mut self,
        cfdp_user: &mut impl CfdpUser,
        pdu: Option<&impl PduProvider>,
    ) -> Result<u32, SourceError> {
        let mut sent_packets = 0;
        if let Some(packet) = pdu {
            sent_packets += self.insert_packet(cfdp_user, packet)?;
        }
        match self.state() {
            State::Idle => Ok(sent_packets),
            State::Busy => {
                sent_packets += self.fsm_busy(cfdp_user)?;
                Ok(sent_packets)
            }
            // No timers are evaluated and no PDUs are generated while suspended.
            State::Suspended => Ok(sent_packets),
        }
    }

    #[inline]
    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction_params.transaction_id
    }

    /// Returns the [TransmissionMode] for the active file operation.
    #[inline]
    pub fn transmission_mode(&self) -> Option<TransmissionMode> {
        self.transaction_params
            .transaction_id
            .map(|_| self.transaction_params.pdu_conf.trans_mode)
    }

    /// Get the [TransactionStep], which denotes the exact step of a pending CFDP transaction when
    /// applicable.
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

    /// Number of file data octets sent so far.
    #[inline]
    pub fn progress(&self) -> u64 {
        self.transaction_params.file_params.progress
    }

    /// Outcome of the last transaction. It is kept until the next put request is accepted.
    #[inline]
    pub fn outcome(&self) -> Option<TransactionOutcome> {
        self.outcome
    }

    #[inline]
    pub fn anomalies(&self) -> &AnomalyTracker {
        &self.anomalies
    }

    /// This function is used to pass a put request to the source handler, which is
    /// also used to start a file copy operation. As such, this function models the Put.request
    /// CFDP primitive.
    ///
    /// The handler can only process one put request at a time and returns the [TransactionId]
    /// allocated for the new transaction.
    pub fn put_request(
        &mut self,
        put_request: &impl ReadablePutRequest,
    ) -> Result<TransactionId, PutRequestError> {
        if self.state() != State::Idle {
            return Err(PutRequestError::AlreadyBusy);
        }
        let destination_id = put_request.destination_id();
        let remote_cfg = *self
            .remote_cfg_table
            .get(destination_id.value())
            .ok_or(PutRequestError::NoRemoteCfgFound(destination_id))?;
        let transmission_mode = put_request
            .trans_mode()
            .unwrap_or(remote_cfg.default_transmission_mode);
        let closure_requested = put_request
            .closure_requested()
            .unwrap_or(remote_cfg.closure_requested_by_default);
        if let Some(source_file) = put_request.source_file() {
            if !self.vfs.exists(source_file)? {
                return Err(PutRequestError::FileDoesNotExist);
            }
        }

        let seq_num_width = remote_cfg
            .seq_num_width
            .unwrap_or(SequenceCounterInstance::MAX_BIT_WIDTH / 8);
        let seq_num = UnsignedByteField::new(
            seq_num_width,
            truncate_to_width(seq_num_width, self.seq_count_provider.get_and_increment()),
        );
        // Both the source entity and destination entity ID field must have the same size.
        // We use the larger of either the Put Request destination ID or the local entity ID
        // as the size for the new entity IDs, unless the remote configuration overrides it.
        let entity_id_width = remote_cfg.entity_id_width.unwrap_or(core::cmp::max(
            self.local_cfg.id.size(),
            destination_id.size(),
        ));
        let pdu_conf = CommonPduConfig::new(
            UnsignedByteField::new_checked(entity_id_width, self.local_cfg.id.value())?,
            UnsignedByteField::new_checked(entity_id_width, destination_id.value())?,
            seq_num,
            transmission_mode,
            LargeFileFlag::Normal,
            CrcFlag::from(remote_cfg.crc_on_transmission_by_default),
            Direction::TowardsReceiver,
        )?;
        let transaction_id = TransactionId::new(pdu_conf.source_id(), seq_num);

        self.transaction_params = TransactionParams {
            transaction_id: Some(transaction_id),
            put_request: Some(PutRequestOwned::from_readable(put_request)),
            remote_cfg: Some(remote_cfg),
            closure_requested,
            seg_ctrl: put_request
                .seg_ctrl()
                .unwrap_or(SegmentationControl::NoRecordBoundaryPreservation),
            pdu_conf,
            file_params: FileParams {
                checksum_type: remote_cfg.default_crc_type,
                ..Default::default()
            },
            ..Default::default()
        };
        self.outcome = None;
        self.state_helper.state.set(State::Busy);
        log::info!(
            "put request accepted, transaction {} towards entity {} ({:?})",
            transaction_id,
            destination_id.value(),
            transmission_mode
        );
        Ok(transaction_id)
    }

    fn insert_packet(
        &mut self,
        cfdp_user: &mut impl CfdpUser,
        packet_to_insert: &impl PduProvider,
    ) -> Result<u32, SourceError> {
        if packet_to_insert.packet_target()? != PacketTarget::SourceEntity {
            return Err(SourceError::CantProcessPacketType {
                pdu_type: packet_to_insert.pdu_type(),
                directive_type: packet_to_insert.file_directive_type(),
            });
        }
        let directive_type = match packet_to_insert.file_directive_type() {
            Some(directive_type) if packet_to_insert.pdu_type() == PduType::FileDirective => {
                directive_type
            }
            // File data PDUs always target the destination entity, so this should never happen.
            _ => {
                return Err(SourceError::UnexpectedPdu {
                    pdu_type: packet_to_insert.pdu_type(),
                    directive_type: packet_to_insert.file_directive_type(),
                })
            }
        };
        let (pdu_header, _) = PduHeader::from_bytes(packet_to_insert.raw_pdu())?;
        let packet_id = TransactionId::new(
            pdu_header.common_pdu_conf().source_id(),
            pdu_header.common_pdu_conf().transaction_seq_num,
        );
        if self.state() == State::Idle {
            return self.handle_pdu_for_finished_transaction(
                packet_id,
                directive_type,
                packet_to_insert.raw_pdu(),
            );
        }
        if Some(packet_id) != self.transaction_id() {
            self.anomalies.foreign_pdus = self.anomalies.foreign_pdus.wrapping_add(1);
            log::warn!(
                "dropping {:?} PDU for transaction {}, active transaction is {:?}",
                directive_type,
                packet_id,
                self.transaction_id()
            );
            return Ok(0);
        }
        log::trace!("transaction {}: received {:?} PDU", packet_id, directive_type);
        if let Some(timer) = self.transaction_params.inactivity_timer.as_mut() {
            timer.reset();
        }

        let mut sent_packets = 0;
        match directive_type {
            FileDirectiveType::FinishedPdu => {
                let finished_pdu = FinishedPdu::from_bytes(packet_to_insert.raw_pdu())?;
                sent_packets += self.handle_finished_pdu(cfdp_user, &finished_pdu)?;
            }
            FileDirectiveType::NakPdu => {
                let nak_pdu = NakPdu::from_bytes(packet_to_insert.raw_pdu())?;
                sent_packets += self.handle_nak_pdu(cfdp_user, &nak_pdu)?;
            }
            FileDirectiveType::KeepAlivePdu => {
                let keep_alive_pdu = KeepAlivePdu::from_bytes(packet_to_insert.raw_pdu())?;
                sent_packets += self.handle_keep_alive_pdu(cfdp_user, &keep_alive_pdu)?;
            }
            FileDirectiveType::AckPdu => {
                let ack_pdu = AckPdu::from_bytes(packet_to_insert.raw_pdu())?;
                self.handle_ack_pdu(&ack_pdu)?;
            }
            FileDirectiveType::EofPdu
            | FileDirectiveType::PromptPdu
            | FileDirectiveType::MetadataPdu => {
                return Err(SourceError::CantProcessPacketType {
                    pdu_type: packet_to_insert.pdu_type(),
                    directive_type: Some(directive_type),
                });
            }
        }
        Ok(sent_packets)
    }

    /// A Finished PDU of the last transaction might be received again if the ACK(Finished) PDU
    /// was lost. It is acknowledged again, all other PDUs are absorbed.
    fn handle_pdu_for_finished_transaction(
        &mut self,
        packet_id: TransactionId,
        directive_type: FileDirectiveType,
        raw_pdu: &[u8],
    ) -> Result<u32, SourceError> {
        let last_pdu_conf = match self.last_transaction {
            Some((last_id, pdu_conf)) if last_id == packet_id => pdu_conf,
            _ => {
                log::debug!(
                    "dropping {:?} PDU for unknown transaction {}",
                    directive_type,
                    packet_id
                );
                return Ok(0);
            }
        };
        if directive_type == FileDirectiveType::FinishedPdu
            && last_pdu_conf.trans_mode == TransmissionMode::Acknowledged
        {
            let finished_pdu = FinishedPdu::from_bytes(raw_pdu)?;
            log::debug!(
                "transaction {}: re-acknowledging duplicate Finished PDU",
                packet_id
            );
            let ack_pdu = AckPdu::new_for_finished_pdu(
                PduHeader::new_for_file_directive(last_pdu_conf, 0),
                finished_pdu.condition_code(),
                TransactionStatus::Terminated,
            );
            self.pdu_send_helper(&ack_pdu)?;
            return Ok(1);
        }
        log::debug!(
            "transaction {}: absorbed {:?} PDU after completion",
            packet_id,
            directive_type
        );
        Ok(0)
    }

    /// This functions models the Cancel.request CFDP primitive and is the recommended way to
    /// cancel a transaction.
    ///
    /// This method will cause a Notice of Cancellation at this entity if a transaction is active
    /// and the passed transaction ID matches the currently active transaction ID. Please note
    /// that the state machine might still be active because a cancelled transfer might still
    /// require some packets to be sent to the remote receiver entity.
    ///
    /// If not unexpected errors occur, this method returns [true] if the transfer was cancelled
    /// properly or is already being cancelled, and [false] if there is no transaction active or
    /// the passed transaction ID and the active ID do not match.
    pub fn cancel_request(
        &mut self,
        user: &mut impl CfdpUser,
        transaction_id: &TransactionId,
    ) -> Result<bool, SourceError> {
        if !self.is_active_transaction(transaction_id) {
            return Ok(false);
        }
        if self.transaction_params.cond_code_eof.is_some() {
            log::debug!("transaction {}: already cancelled", transaction_id);
            return Ok(true);
        }
        let mut sent_packets = 0;
        let ctx = self.notice_of_cancellation_internal(
            user,
            ConditionCode::CancelRequestReceived,
            &mut sent_packets,
        )?;
        if ctx == FsmContext::ResetWhenPossible {
            self.reset();
        }
        Ok(true)
    }

    /// Models the Suspend.request primitive. Returns [false] if the transaction is not active or
    /// already suspended.
    pub fn suspend_request(
        &mut self,
        user: &mut impl CfdpUser,
        transaction_id: &TransactionId,
    ) -> bool {
        if !self.is_active_transaction(transaction_id) || self.state() != State::Busy {
            return false;
        }
        self.notice_of_suspension_internal(user, ConditionCode::SuspendRequestReceived);
        true
    }

    /// Models the Resume.request primitive. All running timers are re-armed.
    pub fn resume_request(
        &mut self,
        user: &mut impl CfdpUser,
        transaction_id: &TransactionId,
    ) -> bool {
        if !self.is_active_transaction(transaction_id) || self.state() != State::Suspended {
            return false;
        }
        for timer in [
            self.transaction_params.check_timer.as_mut(),
            self.transaction_params.ack_timer.as_mut(),
            self.transaction_params.inactivity_timer.as_mut(),
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

    /// Models the Report.request primitive.
    pub fn report_request(&self, user: &mut impl CfdpUser, transaction_id: &TransactionId) -> bool {
        if !self.is_active_transaction(transaction_id) {
            return false;
        }
        user.report_indication(transaction_id);
        true
    }

    /// Sends a Prompt PDU to the receiver, which then answers with a NAK or a Keep Alive PDU.
    /// Prompts are only supported for acknowledged transfers.
    pub fn send_prompt(
        &mut self,
        transaction_id: &TransactionId,
        response_required: PromptResponseRequired,
    ) -> Result<bool, SourceError> {
        if !self.is_active_transaction(transaction_id)
            || self.state() != State::Busy
            || self.transaction_params.pdu_conf.trans_mode != TransmissionMode::Acknowledged
        {
            return Ok(false);
        }
        let prompt_pdu = PromptPdu::new(
            PduHeader::new_for_file_directive(self.transaction_params.pdu_conf, 0),
            response_required,
        );
        self.pdu_send_helper(&prompt_pdu)?;
        Ok(true)
    }

    /// This function is public to allow completely resetting the handler, but it is explicitely
    /// discouraged to do this. CFDP has mechanism to detect issues and errors on itself.
    /// Resetting the handler might interfere with these mechanisms and lead to unexpected
    /// behaviour.
    pub fn reset(&mut self) {
        if let Some(id) = self.transaction_params.transaction_id {
            self.last_transaction = Some((id, self.transaction_params.pdu_conf));
        }
        self.state_helper = Default::default();
        self.transaction_params = Default::default();
    }

    fn is_active_transaction(&self, transaction_id: &TransactionId) -> bool {
        self.state() != State::Idle && self.transaction_id() == Some(*transaction_id)
    }

    fn active_id(&self) -> Result<TransactionId, SourceError> {
        self.transaction_params
            .transaction_id
            .ok_or(SourceError::NoActiveTransaction)
    }

    fn remote_cfg(&self) -> Result<RemoteEntityConfig, SourceError> {
        self.transaction_params
            .remote_cfg
            .ok_or(SourceError::NoActiveTransaction)
    }

    #[inline]
    fn acknowledged_mode(&self) -> bool {
        self.transaction_params.pdu_conf.trans_mode == TransmissionMode::Acknowledged
    }

    #[inline]
    fn set_step(&self, step: TransactionStep) {
        self.state_helper.step.set(step);
    }

    fn fsm_busy(&mut self, user: &mut impl CfdpUser) -> Result<u32, SourceError> {
        let mut sent_packets = 0;
        if self.step() == TransactionStep::Idle {
            self.set_step(TransactionStep::TransactionStart);
        }
        if self.step() == TransactionStep::TransactionStart {
            if let Err(e) = self.handle_transaction_start(user) {
                log::error!("transaction start failed: {}", e);
                return self.fault_and_reset_if_required(user, ConditionCode::FilestoreRejection);
            }
            self.set_step(TransactionStep::SendingMetadata);
        }
        if self.step() == TransactionStep::SendingMetadata {
            self.prepare_and_send_metadata_pdu()?;
            self.set_step(TransactionStep::SendingFileData);
            sent_packets += 1;
        }
        if self.step() == TransactionStep::SendingFileData {
            if let ControlFlow::Break(packets) = self.file_data_fsm(user)? {
                sent_packets += packets;
                // Exit for each file data PDU to allow flow control.
                return Ok(sent_packets);
            }
        }
        if self.step() == TransactionStep::SendingEof {
            sent_packets += self.eof_fsm(user)?;
        }
        if self.step() == TransactionStep::WaitingForEofAck {
            sent_packets += self.handle_positive_ack_procedures(user)?;
        }
        if self.step() == TransactionStep::WaitingForFinished {
            sent_packets += self.handle_waiting_for_finished_pdu(user)?;
        }
        if self.step() == TransactionStep::NoticeOfCompletion {
            self.notice_of_completion(user);
            self.reset();
        }
        Ok(sent_packets)
    }

    fn fault_and_reset_if_required(
        &mut self,
        user: &mut impl CfdpUser,
        condition_code: ConditionCode,
    ) -> Result<u32, SourceError> {
        let (sent_packets, ctx) = self.declare_fault(user, condition_code)?;
        if ctx == FsmContext::ResetWhenPossible {
            self.reset();
        }
        Ok(sent_packets)
    }

    fn handle_positive_ack_procedures(
        &mut self,
        user: &mut impl CfdpUser,
    ) -> Result<u32, SourceError> {
        let Some(mut positive_ack_params) = self.transaction_params.positive_ack_params else {
            return Ok(0);
        };
        let expired = self
            .transaction_params
            .ack_timer
            .as_ref()
            .is_some_and(|timer| timer.has_expired());
        if !expired {
            return Ok(0);
        }
        if let Some(timer) = self.transaction_params.ack_timer.as_mut() {
            timer.reset();
        }
        let ack_timer_exp_limit = self.remote_cfg()?.positive_ack_timer_expiration_limit;
        if positive_ack_params.ack_counter + 1 >= ack_timer_exp_limit {
            return self.fault_and_reset_if_required(user, ConditionCode::PositiveAckLimitReached);
        }
        positive_ack_params.ack_counter += 1;
        self.transaction_params.positive_ack_params = Some(positive_ack_params);
        log::debug!(
            "transaction {}: positive ACK timer expired, re-sending EOF ({} of {})",
            self.active_id()?,
            positive_ack_params.ack_counter,
            ack_timer_exp_limit
        );
        let checksum = self.transaction_params.file_params.eof_checksum.unwrap_or(0);
        self.prepare_and_send_eof_pdu(checksum)?;
        Ok(1)
    }

    fn handle_nak_pdu(
        &mut self,
        user: &mut impl CfdpUser,
        nak_pdu: &NakPdu,
    ) -> Result<u32, SourceError> {
        if self.state() != State::Busy
            || self.transaction_params.cond_code_eof.is_some()
            || matches!(
                self.step(),
                TransactionStep::Idle | TransactionStep::TransactionStart
            )
        {
            log::debug!("ignoring NAK PDU in step {:?}", self.step());
            return Ok(0);
        }
        let mut sent_packets = 0;
        let file_size = self.transaction_params.file_params.file_size;
        for &(start, end) in nak_pdu.segment_requests() {
            // Special case: Metadata PDU is re-requested.
            if start == 0 && end == 0 {
                self.prepare_and_send_metadata_pdu()?;
                sent_packets += 1;
                continue;
            }
            if end < start || start > file_size {
                self.anomalies.invalid_segment_requests =
                    self.anomalies.invalid_segment_requests.wrapping_add(1);
                log::warn!(
                    "ignoring invalid segment request ({}, {}) for file size {}",
                    start,
                    end,
                    file_size
                );
                continue;
            }
            let end = end.min(file_size);
            let mut current_offset = start;
            while current_offset < end {
                let chunk_size = core::cmp::min(
                    end - current_offset,
                    self.transaction_params.file_params.segment_len,
                );
                if let Err(e) = self.prepare_and_send_file_data_pdu(current_offset, chunk_size) {
                    return match e {
                        SourceError::FilestoreError(fs_error) => {
                            log::error!("reading file segment for retransmission failed: {}", fs_error);
                            Ok(sent_packets
                                + self.fault_and_reset_if_required(
                                    user,
                                    ConditionCode::FilestoreRejection,
                                )?)
                        }
                        other => Err(other),
                    };
                }
                sent_packets += 1;
                current_offset += chunk_size;
            }
        }
        log::debug!(
            "transaction {}: answered NAK with {} PDU(s)",
            self.active_id()?,
            sent_packets
        );
        Ok(sent_packets)
    }

    fn handle_keep_alive_pdu(
        &mut self,
        user: &mut impl CfdpUser,
        keep_alive_pdu: &KeepAlivePdu,
    ) -> Result<u32, SourceError> {
        let remote_progress = keep_alive_pdu.progress();
        self.transaction_params.remote_progress = Some(remote_progress);
        let discrepancy = self.progress().saturating_sub(remote_progress);
        log::trace!(
            "keep alive PDU: remote progress {}, discrepancy {}",
            remote_progress,
            discrepancy
        );
        if self.state() == State::Busy
            && discrepancy > self.remote_cfg()?.keep_alive_discrepancy_limit
        {
            return self.fault_and_reset_if_required(user, ConditionCode::KeepAliveLimitReached);
        }
        Ok(0)
    }

    fn handle_waiting_for_finished_pdu(
        &mut self,
        user: &mut impl CfdpUser,
    ) -> Result<u32, SourceError> {
        let (timer, condition_code) = if self.acknowledged_mode() {
            (
                self.transaction_params.inactivity_timer.as_mut(),
                ConditionCode::InactivityDetected,
            )
        } else {
            (
                self.transaction_params.check_timer.as_mut(),
                ConditionCode::CheckLimitReached,
            )
        };
        match timer {
            Some(timer) if timer.has_expired() => {
                timer.reset();
                self.fault_and_reset_if_required(user, condition_code)
            }
            _ => Ok(0),
        }
    }

    fn eof_fsm(&mut self, user: &mut impl CfdpUser) -> Result<u32, SourceError> {
        let mut sent_packets = 0;
        let checksum = match self.calculate_checksum(self.transaction_params.file_params.file_size)
        {
            Ok(checksum) => checksum,
            Err(FilestoreError::ChecksumTypeNotImplemented(checksum_type)) => {
                log::warn!("checksum type {:?} not supported", checksum_type);
                sent_packets +=
                    self.fault_and_reset_if_required(user, ConditionCode::UnsupportedChecksumType)?;
                if self.step() != TransactionStep::SendingEof || self.state() != State::Busy {
                    return Ok(sent_packets);
                }
                0
            }
            Err(e) => {
                log::error!("checksum calculation failed: {}", e);
                return self.fault_and_reset_if_required(user, ConditionCode::FilestoreRejection);
            }
        };
        self.transaction_params.file_params.eof_checksum = Some(checksum);
        self.prepare_and_send_eof_pdu(checksum)?;
        sent_packets += 1;
        let id = self.active_id()?;
        if self.local_cfg.indication_cfg.eof_sent {
            user.eof_sent_indication(&id);
        }
        if !self.acknowledged_mode() {
            if self.transaction_params.closure_requested {
                let remote_id = self.remote_cfg()?.entity_id;
                self.transaction_params.check_timer =
                    Some(self.timer_creator.create_countdown(TimerContext::CheckLimit {
                        local_id: self.local_cfg.id,
                        remote_id,
                        entity_type: EntityType::Sending,
                    }));
                self.set_step(TransactionStep::WaitingForFinished);
            } else {
                self.set_step(TransactionStep::NoticeOfCompletion);
            }
        } else {
            self.start_positive_ack_procedure(false)?;
        }
        Ok(sent_packets)
    }

    fn start_positive_ack_procedure(&mut self, of_cancellation: bool) -> Result<(), SourceError> {
        let remote_cfg = self.remote_cfg()?;
        self.set_step(TransactionStep::WaitingForEofAck);
        self.transaction_params.positive_ack_params = Some(PositiveAckParams {
            ack_counter: 0,
            positive_ack_of_cancellation: of_cancellation,
        });
        self.transaction_params.ack_timer =
            Some(self.timer_creator.create_countdown(TimerContext::PositiveAck {
                expiry_time: remote_cfg.positive_ack_timer_interval,
            }));
        Ok(())
    }

    fn handle_transaction_start(&mut self, cfdp_user: &mut impl CfdpUser) -> Result<(), SourceError> {
        let id = self.active_id()?;
        cfdp_user.transaction_indication(&id);
        let source_file = self
            .transaction_params
            .put_request
            .as_ref()
            .and_then(|req| req.source_file());
        match source_file {
            None => self.transaction_params.file_params.metadata_only = true,
            Some(source_file) => {
                let file_size = self.vfs.file_size(source_file)?;
                self.transaction_params.file_params.file_size = file_size;
                if file_size > u32::MAX as u64 {
                    self.transaction_params.pdu_conf.file_flag = LargeFileFlag::Large
                } else {
                    if file_size == 0 {
                        self.transaction_params.file_params.empty_file = true;
                    }
                    self.transaction_params.pdu_conf.file_flag = LargeFileFlag::Normal
                }
            }
        }
        let remote_cfg = self.remote_cfg()?;
        self.transaction_params.file_params.segment_len = self.calculate_max_file_seg_len(&remote_cfg);
        log::debug!(
            "transaction {}: file size {}, segment length {}",
            id,
            self.transaction_params.file_params.file_size,
            self.transaction_params.file_params.segment_len
        );
        Ok(())
    }

    fn prepare_and_send_metadata_pdu(&self) -> Result<(), SourceError> {
        let put_request = self
            .transaction_params
            .put_request
            .as_ref()
            .ok_or(SourceError::NoActiveTransaction)?;
        let metadata_params = MetadataGenericParams::new(
            self.transaction_params.closure_requested,
            self.transaction_params.file_params.checksum_type,
            self.transaction_params.file_params.file_size,
        );
        let metadata_pdu = MetadataPdu::new(
            PduHeader::new_for_file_directive(self.transaction_params.pdu_conf, 0),
            metadata_params,
            put_request.source_file().map(String::from),
            put_request.dest_file().map(String::from),
            put_request.metadata_options(),
        )?;
        self.pdu_send_helper(&metadata_pdu)
    }

    fn file_data_fsm(&mut self, user: &mut impl CfdpUser) -> Result<ControlFlow<u32>, SourceError> {
        let file_params = &self.transaction_params.file_params;
        if file_params.metadata_only {
            // Special case: Metadata Only, no EOF required without closure in Class 1.
            if !self.acknowledged_mode() && !self.transaction_params.closure_requested {
                self.set_step(TransactionStep::NoticeOfCompletion);
            } else {
                self.set_step(TransactionStep::SendingEof);
            }
            return Ok(ControlFlow::Continue(()));
        }
        if file_params.progress < file_params.file_size {
            return match self.send_progressing_file_data_pdu() {
                Ok(()) => Ok(ControlFlow::Break(1)),
                Err(SourceError::FilestoreError(e)) => {
                    log::error!("reading file segment failed: {}", e);
                    Ok(ControlFlow::Break(self.fault_and_reset_if_required(
                        user,
                        ConditionCode::FilestoreRejection,
                    )?))
                }
                Err(e) => Err(e),
            };
        }
        // EOF is still expected.
        self.set_step(TransactionStep::SendingEof);
        Ok(ControlFlow::Continue(()))
    }

    fn notice_of_completion(&mut self, cfdp_user: &mut impl CfdpUser) {
        let Some(id) = self.transaction_id() else {
            return;
        };
        let outcome = self.determine_outcome();
        // The first case happens for unacknowledged file copy operation with no closure.
        let (mut condition_code, delivery_code, file_status) =
            match self.transaction_params.finished_params {
                Some(params) => (
                    params.condition_code,
                    params.delivery_code,
                    params.file_status,
                ),
                None if self.transaction_params.cond_code_eof.is_some() => (
                    ConditionCode::NoError,
                    DeliveryCode::Incomplete,
                    FileStatus::Unreported,
                ),
                None => (
                    ConditionCode::NoError,
                    DeliveryCode::Complete,
                    FileStatus::Unreported,
                ),
            };
        if let TransactionOutcome::Cancelled(cancel_code) = outcome {
            condition_code = cancel_code;
        }
        log::info!("transaction {}: finished with {:?}", id, outcome);
        if self.local_cfg.indication_cfg.transaction_finished {
            cfdp_user.transaction_finished_indication(&TransactionFinishedParams {
                id,
                condition_code,
                delivery_code,
                file_status,
            });
        }
        self.outcome = Some(outcome);
    }

    fn determine_outcome(&self) -> TransactionOutcome {
        if let Some(cond_code) = self.transaction_params.cond_code_eof {
            if cond_code != ConditionCode::NoError {
                return TransactionOutcome::Cancelled(cond_code);
            }
        }
        if let Some(finished_params) = self.transaction_params.finished_params {
            if finished_params.condition_code != ConditionCode::NoError {
                return TransactionOutcome::Cancelled(finished_params.condition_code);
            }
        }
        TransactionOutcome::Completed
    }

    fn calculate_max_file_seg_len(&self, remote_cfg: &RemoteEntityConfig) -> u64 {
        let mut derived_max_seg_len = calculate_max_file_seg_len_for_max_packet_len_and_pdu_header(
            &PduHeader::new_for_file_directive(self.transaction_params.pdu_conf, 0),
            remote_cfg.max_packet_len,
            None,
        );
        if let Some(max_file_segment_len) = remote_cfg.max_file_segment_len {
            derived_max_seg_len = core::cmp::min(max_file_segment_len, derived_max_seg_len);
        }
        // The file data is read into an intermediate buffer.
        derived_max_seg_len.min(self.file_data_buffer.len()).max(1) as u64
    }

    fn send_progressing_file_data_pdu(&mut self) -> Result<(), SourceError> {
        let file_params = self.transaction_params.file_params;
        let read_len = file_params
            .segment_len
            .min(file_params.file_size - file_params.progress);
        self.prepare_and_send_file_data_pdu(file_params.progress, read_len)?;
        self.transaction_params.file_params.progress += read_len;
        Ok(())
    }

    fn prepare_and_send_file_data_pdu(&mut self, offset: u64, size: u64) -> Result<(), SourceError> {
        let source_file = self
            .transaction_params
            .put_request
            .as_ref()
            .and_then(|req| req.source_file())
            .ok_or(SourceError::NoActiveTransaction)?;
        let read_len = size as usize;
        self.vfs.read_data(
            source_file,
            offset,
            size,
            &mut self.file_data_buffer[0..read_len],
        )?;
        let file_data_pdu = FileDataPdu::new_no_seg_metadata(
            PduHeader::new_for_file_data(
                self.transaction_params.pdu_conf,
                0,
                SegmentMetadataFlag::NotPresent,
                self.transaction_params.seg_ctrl,
            ),
            offset,
            &self.file_data_buffer[0..read_len],
        )?;
        self.pdu_send_helper(&file_data_pdu)
    }

    fn calculate_checksum(&self, size_to_verify: u64) -> Result<u32, FilestoreError> {
        let file_params = &self.transaction_params.file_params;
        // The checksum of an empty data set is 0 for all supported checksum types.
        if file_params.metadata_only || size_to_verify == 0 {
            return Ok(0);
        }
        let source_file = self
            .transaction_params
            .put_request
            .as_ref()
            .and_then(|req| req.source_file())
            .ok_or(FilestoreError::FileDoesNotExist)?;
        self.vfs.calculate_checksum(
            source_file,
            file_params.checksum_type,
            size_to_verify,
            &mut self.pdu_and_cksum_buffer.borrow_mut(),
        )
    }

    fn prepare_and_send_eof_pdu(&self, checksum: u32) -> Result<(), SourceError> {
        let condition_code = self
            .transaction_params
            .cond_code_eof
            .unwrap_or(ConditionCode::NoError);
        let fault_location = if condition_code != ConditionCode::NoError {
            Some(EntityIdTlv::new(self.transaction_params.pdu_conf.source_id()))
        } else {
            None
        };
        let eof_pdu = EofPdu::new(
            PduHeader::new_for_file_directive(self.transaction_params.pdu_conf, 0),
            condition_code,
            checksum,
            self.transaction_params.file_params.progress,
            fault_location,
        )?;
        self.pdu_send_helper(&eof_pdu)
    }

    fn pdu_send_helper(&self, pdu: &(impl WritablePduPacket + CfdpPdu)) -> Result<(), SourceError> {
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

    fn handle_finished_pdu(
        &mut self,
        user: &mut impl CfdpUser,
        finished_pdu: &FinishedPdu,
    ) -> Result<u32, SourceError> {
        let accepted = match self.step() {
            TransactionStep::WaitingForFinished | TransactionStep::WaitingForEofAck => true,
            TransactionStep::Idle | TransactionStep::NoticeOfCompletion => false,
            // The receiver may terminate the transaction at any time with an error.
            _ => finished_pdu.condition_code() != ConditionCode::NoError,
        };
        if !accepted {
            return Err(SourceError::UnexpectedPdu {
                pdu_type: PduType::FileDirective,
                directive_type: Some(FileDirectiveType::FinishedPdu),
            });
        }
        self.transaction_params.finished_params = Some(FinishedParams {
            condition_code: finished_pdu.condition_code(),
            delivery_code: finished_pdu.delivery_code(),
            file_status: finished_pdu.file_status(),
        });
        if finished_pdu.condition_code() != ConditionCode::NoError {
            log::warn!(
                "transaction {}: receiver finished with condition code {:?}",
                self.active_id()?,
                finished_pdu.condition_code()
            );
        }
        let mut sent_packets = 0;
        if self.acknowledged_mode() {
            let ack_pdu = AckPdu::new_for_finished_pdu(
                PduHeader::new_for_file_directive(self.transaction_params.pdu_conf, 0),
                finished_pdu.condition_code(),
                TransactionStatus::Active,
            );
            self.pdu_send_helper(&ack_pdu)?;
            sent_packets += 1;
        }
        self.notice_of_completion(user);
        self.reset();
        Ok(sent_packets)
    }

    fn handle_ack_pdu(&mut self, ack_pdu: &AckPdu) -> Result<(), SourceError> {
        if ack_pdu.directive_code_of_acked_pdu() != FileDirectiveType::EofPdu {
            self.anomalies.invalid_ack_directive_code =
                self.anomalies.invalid_ack_directive_code.wrapping_add(1);
            log::warn!(
                "ACK for unexpected directive {:?}",
                ack_pdu.directive_code_of_acked_pdu()
            );
            return Ok(());
        }
        if self.step() != TransactionStep::WaitingForEofAck {
            // The ACK might have crossed with a re-sent EOF PDU.
            log::debug!("ignoring ACK(EOF) in step {:?}", self.step());
            return Ok(());
        }
        let remote_cfg = self.remote_cfg()?;
        self.transaction_params.ack_timer = None;
        if let Some(params) = self.transaction_params.positive_ack_params.as_mut() {
            params.ack_counter = 0;
        }
        self.transaction_params.inactivity_timer =
            Some(self.timer_creator.create_countdown(TimerContext::Inactivity {
                expiry_time: remote_cfg.inactivity_timeout,
            }));
        self.set_step(TransactionStep::WaitingForFinished);
        Ok(())
    }

    fn notice_of_cancellation_internal(
        &mut self,
        user: &mut impl CfdpUser,
        condition_code: ConditionCode,
        sent_packets: &mut u32,
    ) -> Result<FsmContext, SourceError> {
        let id = self.active_id()?;
        log::info!("transaction {}: cancelled with {:?}", id, condition_code);
        self.transaction_params.cond_code_eof = Some(condition_code);
        self.transaction_params.check_timer = None;
        self.transaction_params.inactivity_timer = None;
        self.state_helper.state.set(State::Busy);
        // As specified in 4.11.2.2, prepare an EOF PDU to be sent to the remote entity. Supply
        // the checksum for the file copy progress sent so far.
        let checksum = self.calculate_checksum(self.progress()).unwrap_or_else(|e| {
            log::error!("checksum calculation for EOF (cancel) failed: {}", e);
            0
        });
        self.transaction_params.file_params.eof_checksum = Some(checksum);
        self.prepare_and_send_eof_pdu(checksum)?;
        *sent_packets += 1;
        if self.local_cfg.indication_cfg.eof_sent {
            user.eof_sent_indication(&id);
        }
        if !self.acknowledged_mode() {
            // We are done.
            self.notice_of_completion(user);
            Ok(FsmContext::ResetWhenPossible)
        } else {
            self.start_positive_ack_procedure(true)?;
            Ok(FsmContext::default())
        }
    }

    fn notice_of_suspension_internal(
        &mut self,
        user: &mut impl CfdpUser,
        condition_code: ConditionCode,
    ) {
        self.state_helper.state.set(State::Suspended);
        if let Some(id) = self.transaction_id() {
            log::info!("transaction {}: suspended with {:?}", id, condition_code);
            if self.local_cfg.indication_cfg.suspended {
                user.suspended_indication(&id, condition_code);
            }
        }
    }

    fn abandon_internal(&mut self, user: &mut impl CfdpUser, condition_code: ConditionCode) {
        if let Some(id) = self.transaction_id() {
            log::warn!("transaction {}: abandoned with {:?}", id, condition_code);
            user.abandoned_indication(&id, condition_code, self.progress());
        }
        self.outcome = Some(TransactionOutcome::Abandoned(condition_code));
    }

    // Returns the number of packets sent and a FSM context structure.
    fn declare_fault(
        &mut self,
        user: &mut impl CfdpUser,
        cond: ConditionCode,
    ) -> Result<(u32, FsmContext), SourceError> {
        let id = self.active_id()?;
        let mut sent_packets = 0;
        let overrides = self
            .transaction_params
            .put_request
            .as_ref()
            .map(|req| req.fault_handler_overrides())
            .unwrap_or_default();
        let mut fh = self
            .local_cfg
            .fault_handler
            .get_fault_handler_with_overrides(cond, overrides);
        // CFDP standard 4.11.2.2.3: Any fault declared in the course of transferring
        // the EOF (cancel) PDU must result in abandonment of the transaction.
        if self
            .transaction_params
            .positive_ack_params
            .is_some_and(|params| params.positive_ack_of_cancellation)
        {
            fh = FaultHandlerCode::AbandonTransaction;
        }
        log::warn!(
            "transaction {}: fault {:?} declared, handler {:?}",
            id,
            cond,
            fh
        );
        let progress = self.progress();
        let mut ctx = FsmContext::default();
        match fh {
            FaultHandlerCode::NoticeOfCancellation => {
                ctx = self.notice_of_cancellation_internal(user, cond, &mut sent_packets)?;
            }
            FaultHandlerCode::NoticeOfSuspension => {
                self.notice_of_suspension_internal(user, cond);
            }
            FaultHandlerCode::IgnoreError => {
                user.fault_indication(&id, cond, progress);
            }
            FaultHandlerCode::AbandonTransaction => {
                self.abandon_internal(user, cond);
                ctx = FsmContext::ResetWhenPossible;
            }
        }
        self.local_cfg
            .fault_handler
            .report_fault(fh, FaultInfo::new(id, cond, progress));
        Ok((sent_packets, ctx))
    }
}

fn truncate_to_width(width: usize, value: u64) -> u64 {
    if width >= 8 {
        return value;
    }
    value & ((1_u64 << (width * 8)) - 1)
}

#[cfg(test)]
mod tests {
    use std::{fs::OpenOptions, io::Write, path::PathBuf};

    use rand::Rng;
    use tempfile::TempPath;

    use super::*;
    use crate::{
        checksum::CRC_32,
        filestore::NativeFilestore,
        pdu::tlv::{FaultHandlerOverrideTlv, MsgToUserTlv, Tlv},
        request::PutRequest,
        seq_count::SequenceCounterSimple,
        tests::{
            basic_remote_cfg_table, init_test_logger, SentPdu, TestCfdpSender, TestCfdpUser,
            TestCheckTimer, TestCheckTimerCreator, TestFaultHandler, TimerExpiryControl,
            LOCAL_ID, REMOTE_ID,
        },
        util::UnsignedByteFieldU16,
        IndicationConfig, PduRawWithInfo, RemoteConfigStoreStd,
    };

    const INVALID_ID: UnsignedByteFieldU16 = UnsignedByteFieldU16::new(5);

    fn init_full_filepaths_textfile() -> (TempPath, PathBuf) {
        (
            tempfile::NamedTempFile::new().unwrap().into_temp_path(),
            tempfile::TempPath::from_path("/tmp/test.txt").to_path_buf(),
        )
    }

    type TestSourceHandler = SourceHandler<
        TestCfdpSender,
        TestFaultHandler,
        NativeFilestore,
        RemoteConfigStoreStd,
        TestCheckTimerCreator,
        TestCheckTimer,
        SequenceCounterSimple<u16>,
    >;

    struct SourceHandlerTestbench {
        handler: TestSourceHandler,
        expiry_control: TimerExpiryControl,
        transmission_mode: TransmissionMode,
        #[allow(dead_code)]
        srcfile_handle: TempPath,
        srcfile: String,
        destfile: String,
        max_packet_len: usize,
    }

    struct TransferInfo {
        id: TransactionId,
        file_size: u64,
        closure_requested: bool,
        pdu_header: PduHeader,
    }

    #[derive(Debug, Clone, Copy)]
    struct EofParams {
        file_size: u64,
        file_checksum: u32,
        condition_code: ConditionCode,
    }

    impl EofParams {
        pub const fn new_success(file_size: u64, file_checksum: u32) -> Self {
            Self {
                file_size,
                file_checksum,
                condition_code: ConditionCode::NoError,
            }
        }
    }

    impl SourceHandlerTestbench {
        fn new(
            transmission_mode: TransmissionMode,
            crc_on_transmission_by_default: bool,
            max_packet_len: usize,
        ) -> Self {
            init_test_logger();
            let local_entity_cfg = LocalEntityConfig::new(
                LOCAL_ID.into(),
                IndicationConfig::default(),
                TestFaultHandler::default(),
            );
            let (srcfile_handle, destfile) = init_full_filepaths_textfile();
            let srcfile = String::from(srcfile_handle.to_path_buf().to_str().unwrap());
            let expiry_control = TimerExpiryControl::default();
            let sender = TestCfdpSender::default();
            Self {
                handler: SourceHandler::new(
                    local_entity_cfg,
                    sender,
                    NativeFilestore::default(),
                    1024,
                    basic_remote_cfg_table(
                        REMOTE_ID,
                        max_packet_len,
                        crc_on_transmission_by_default,
                    ),
                    TestCheckTimerCreator::new(&expiry_control),
                    SequenceCounterSimple::default(),
                ),
                transmission_mode,
                expiry_control,
                srcfile_handle,
                srcfile,
                destfile: String::from(destfile.to_str().unwrap()),
                max_packet_len,
            }
        }

        fn create_user(&self, next_expected_seq_num: u64, filesize: u64) -> TestCfdpUser {
            TestCfdpUser::new(
                next_expected_seq_num,
                self.srcfile.clone(),
                self.destfile.clone(),
                filesize,
            )
        }

        fn put_request(
            &mut self,
            put_request: &impl ReadablePutRequest,
        ) -> Result<TransactionId, PutRequestError> {
            self.handler.put_request(put_request)
        }

        fn all_fault_queues_empty(&self) -> bool {
            self.handler
                .local_cfg
                .user_fault_hook()
                .borrow()
                .all_queues_empty()
        }

        fn test_fault_handler(&self) -> &RefCell<TestFaultHandler> {
            self.handler.local_cfg.user_fault_hook()
        }

        fn pdu_queue_empty(&self) -> bool {
            self.handler.pdu_sender.queue_empty()
        }

        fn get_next_sent_pdu(&self) -> Option<SentPdu> {
            self.handler.pdu_sender.retrieve_next_pdu()
        }

        fn write_srcfile(&self, data: &[u8]) {
            let mut file = OpenOptions::new()
                .write(true)
                .open(&self.srcfile)
                .expect("opening file failed");
            file.write_all(data).expect("writing file content failed");
        }

        fn common_pdu_check_for_file_transfer(&self, pdu_header: &PduHeader, crc_flag: CrcFlag) {
            assert_eq!(
                pdu_header.seg_ctrl(),
                SegmentationControl::NoRecordBoundaryPreservation
            );
            assert_eq!(
                pdu_header.seg_metadata_flag(),
                SegmentMetadataFlag::NotPresent
            );
            assert_eq!(pdu_header.common_pdu_conf().source_id(), LOCAL_ID.into());
            assert_eq!(pdu_header.common_pdu_conf().dest_id(), REMOTE_ID.into());
            assert_eq!(pdu_header.common_pdu_conf().crc_flag, crc_flag);
            assert_eq!(
                pdu_header.common_pdu_conf().trans_mode,
                self.transmission_mode
            );
            assert_eq!(
                pdu_header.common_pdu_conf().file_flag,
                LargeFileFlag::Normal
            );
            assert_eq!(pdu_header.common_pdu_conf().transaction_seq_num.size(), 2);
        }

        fn insert_pdu(
            &mut self,
            cfdp_user: &mut TestCfdpUser,
            pdu: &impl WritablePduPacket,
        ) -> Result<u32, SourceError> {
            let pdu_vec = pdu.to_vec().unwrap();
            let packet_info = PduRawWithInfo::new(&pdu_vec).unwrap();
            self.handler.state_machine(cfdp_user, Some(&packet_info))
        }

        fn nak_for_file_segments(
            &mut self,
            cfdp_user: &mut TestCfdpUser,
            transfer_info: &TransferInfo,
            seg_reqs: &[(u64, u64)],
        ) -> u32 {
            let nak_pdu = NakPdu::new(
                transfer_info.pdu_header,
                0,
                transfer_info.file_size,
                seg_reqs.to_vec(),
            )
            .unwrap();
            self.insert_pdu(cfdp_user, &nak_pdu).unwrap()
        }

        fn generic_file_transfer(
            &mut self,
            cfdp_user: &mut TestCfdpUser,
            with_closure: bool,
            file_data: Vec<u8>,
        ) -> (TransferInfo, u32) {
            let mut digest = CRC_32.digest();
            digest.update(&file_data);
            let checksum = digest.finalize();
            cfdp_user.expected_full_src_name = self.srcfile.clone();
            cfdp_user.expected_full_dest_name = self.destfile.clone();
            cfdp_user.expected_file_size = file_data.len() as u64;
            let put_request = PutRequestOwned::new_regular_request(
                REMOTE_ID.into(),
                &self.srcfile,
                &self.destfile,
                Some(self.transmission_mode),
                Some(with_closure),
            )
            .expect("creating put request failed");
            let transaction_info = self.common_file_transfer_init_with_metadata_check(
                cfdp_user,
                put_request,
                cfdp_user.expected_file_size,
            );
            let mut current_offset = 0;
            let chunks = file_data.chunks(
                calculate_max_file_seg_len_for_max_packet_len_and_pdu_header(
                    &transaction_info.pdu_header,
                    self.max_packet_len,
                    None,
                ),
            );
            let mut fd_pdus = 0;
            for segment in chunks {
                self.check_next_file_pdu(current_offset, segment);
                self.handler.state_machine_no_packet(cfdp_user).unwrap();
                fd_pdus += 1;
                current_offset += segment.len() as u64;
            }
            self.common_eof_pdu_check(
                cfdp_user,
                transaction_info.closure_requested,
                EofParams::new_success(cfdp_user.expected_file_size, checksum),
                1,
            );
            (transaction_info, fd_pdus)
        }

        fn common_file_transfer_init_with_metadata_check(
            &mut self,
            cfdp_user: &mut TestCfdpUser,
            put_request: PutRequestOwned,
            file_size: u64,
        ) -> TransferInfo {
            assert_eq!(cfdp_user.transaction_indication_call_count, 0);
            assert_eq!(cfdp_user.eof_sent_call_count, 0);

            let transaction_id = self
                .put_request(&put_request)
                .expect("put_request call failed");
            assert_eq!(self.handler.state(), State::Busy);
            assert_eq!(self.handler.step(), TransactionStep::Idle);
            assert_eq!(self.handler.transaction_id(), Some(transaction_id));
            let sent_packets = self
                .handler
                .state_machine_no_packet(cfdp_user)
                .expect("source handler FSM failure");
            // Metadata PDU and either the first file data PDU or the EOF PDU for empty files.
            assert_eq!(sent_packets, 2);
            assert!(!self.pdu_queue_empty());
            let next_pdu = self.get_next_sent_pdu().unwrap();
            let metadata_pdu = self.metadata_check(&next_pdu, file_size);
            let closure_requested = if let Some(closure_requested) = put_request.closure_requested
            {
                assert_eq!(metadata_pdu.closure_requested(), closure_requested);
                closure_requested
            } else {
                assert!(metadata_pdu.closure_requested());
                metadata_pdu.closure_requested()
            };
            TransferInfo {
                pdu_header: *metadata_pdu.pdu_header(),
                closure_requested,
                file_size,
                id: transaction_id,
            }
        }

        fn metadata_check(&self, next_pdu: &SentPdu, file_size: u64) -> MetadataPdu {
            assert_eq!(next_pdu.pdu_type, PduType::FileDirective);
            assert_eq!(
                next_pdu.file_directive_type,
                Some(FileDirectiveType::MetadataPdu)
            );
            let metadata_pdu =
                MetadataPdu::from_bytes(&next_pdu.raw_pdu).expect("invalid metadata PDU format");
            self.common_pdu_check_for_file_transfer(metadata_pdu.pdu_header(), CrcFlag::NoCrc);
            assert_eq!(metadata_pdu.src_file_name(), Some(self.srcfile.as_str()));
            assert_eq!(metadata_pdu.dest_file_name(), Some(self.destfile.as_str()));
            assert_eq!(metadata_pdu.file_size(), file_size);
            assert_eq!(metadata_pdu.checksum_type(), Ok(ChecksumType::Crc32));
            assert_eq!(metadata_pdu.transmission_mode(), self.transmission_mode);
            assert_eq!(metadata_pdu.options(), &[]);
            metadata_pdu
        }

        fn check_next_file_pdu(&mut self, expected_offset: u64, expected_data: &[u8]) {
            let next_pdu = self.get_next_sent_pdu().unwrap();
            assert_eq!(next_pdu.pdu_type, PduType::FileData);
            assert!(next_pdu.file_directive_type.is_none());
            let fd_pdu =
                FileDataPdu::from_bytes(&next_pdu.raw_pdu).expect("reading file data PDU failed");
            assert_eq!(fd_pdu.offset(), expected_offset);
            assert_eq!(fd_pdu.file_data(), expected_data);
            assert!(fd_pdu.segment_metadata().is_none());
        }

        fn acknowledge_eof_pdu(
            &mut self,
            cfdp_user: &mut TestCfdpUser,
            transaction_info: &TransferInfo,
        ) {
            let ack_pdu = AckPdu::new(
                transaction_info.pdu_header,
                FileDirectiveType::EofPdu,
                ConditionCode::NoError,
                TransactionStatus::Active,
            )
            .expect("creating ACK PDU failed");
            self.insert_pdu(cfdp_user, &ack_pdu)
                .expect("state machine failed");
        }

        fn finish_handling(&mut self, user: &mut TestCfdpUser, transfer_info: &TransferInfo) {
            let finished_pdu = FinishedPdu::new_no_error(
                transfer_info.pdu_header,
                DeliveryCode::Complete,
                FileStatus::Retained,
            )
            .unwrap();
            let sent_packets = self
                .insert_pdu(user, &finished_pdu)
                .expect("source handler FSM failure");
            if self.transmission_mode == TransmissionMode::Acknowledged {
                assert_eq!(sent_packets, 1);
                self.common_finished_pdu_ack_check(ConditionCode::NoError);
            } else {
                assert_eq!(sent_packets, 0);
                assert!(self.pdu_queue_empty());
            }
            assert_eq!(self.handler.state(), State::Idle);
            assert_eq!(self.handler.step(), TransactionStep::Idle);
            assert_eq!(self.handler.outcome(), Some(TransactionOutcome::Completed));
            let finished_indication = user.finished_indic_queue.pop_front().unwrap();
            assert_eq!(finished_indication.id, transfer_info.id);
            assert_eq!(finished_indication.condition_code, ConditionCode::NoError);
            assert_eq!(finished_indication.delivery_code, DeliveryCode::Complete);
            assert_eq!(finished_indication.file_status, FileStatus::Retained);
        }

        fn common_finished_pdu_ack_check(&mut self, condition_code: ConditionCode) {
            let next_pdu = self.get_next_sent_pdu().unwrap();
            assert!(self.pdu_queue_empty());
            assert_eq!(next_pdu.pdu_type, PduType::FileDirective);
            assert_eq!(
                next_pdu.file_directive_type,
                Some(FileDirectiveType::AckPdu)
            );
            let ack_pdu = AckPdu::from_bytes(&next_pdu.raw_pdu).unwrap();
            self.common_pdu_check_for_file_transfer(ack_pdu.pdu_header(), CrcFlag::NoCrc);
            assert_eq!(ack_pdu.condition_code(), condition_code);
            assert_eq!(
                ack_pdu.directive_code_of_acked_pdu(),
                FileDirectiveType::FinishedPdu
            );
        }

        fn next_eof_pdu(&mut self) -> EofPdu {
            let next_pdu = self.get_next_sent_pdu().unwrap();
            assert_eq!(next_pdu.pdu_type, PduType::FileDirective);
            assert_eq!(
                next_pdu.file_directive_type,
                Some(FileDirectiveType::EofPdu)
            );
            EofPdu::from_bytes(&next_pdu.raw_pdu).expect("invalid EOF PDU format")
        }

        fn common_eof_pdu_check(
            &mut self,
            cfdp_user: &mut TestCfdpUser,
            closure_requested: bool,
            eof_params: EofParams,
            eof_sent_call_count: u32,
        ) {
            let eof_pdu = self.next_eof_pdu();
            self.common_pdu_check_for_file_transfer(eof_pdu.pdu_header(), CrcFlag::NoCrc);
            assert_eq!(eof_pdu.condition_code(), eof_params.condition_code);
            assert_eq!(eof_pdu.file_size(), eof_params.file_size);
            assert_eq!(eof_pdu.file_checksum(), eof_params.file_checksum);
            assert_eq!(eof_pdu.transaction_seq_num().value(), 0);
            if self.transmission_mode == TransmissionMode::Unacknowledged {
                if !closure_requested {
                    assert_eq!(self.handler.state(), State::Idle);
                    assert_eq!(self.handler.step(), TransactionStep::Idle);
                } else {
                    assert_eq!(self.handler.state(), State::Busy);
                    assert_eq!(self.handler.step(), TransactionStep::WaitingForFinished);
                }
            } else {
                assert_eq!(self.handler.state(), State::Busy);
                assert_eq!(self.handler.step(), TransactionStep::WaitingForEofAck);
            }

            assert_eq!(cfdp_user.transaction_indication_call_count, 1);
            assert_eq!(cfdp_user.eof_sent_call_count, eof_sent_call_count);
            assert!(self.all_fault_queues_empty());
        }

        fn common_tiny_file_transfer(
            &mut self,
            cfdp_user: &mut TestCfdpUser,
            with_closure: bool,
        ) -> (&'static str, TransferInfo) {
            let content_str = "Hello World!";
            self.write_srcfile(content_str.as_bytes());
            let (transfer_info, fd_pdus) =
                self.generic_file_transfer(cfdp_user, with_closure, content_str.as_bytes().to_vec());
            assert_eq!(fd_pdus, 1);
            (content_str, transfer_info)
        }

        /// Starts a transfer of a tiny file and stops after the file data PDU was sent.
        fn start_tiny_transfer_until_file_data(
            &mut self,
            cfdp_user: &mut TestCfdpUser,
            with_closure: bool,
        ) -> TransferInfo {
            let content_str = "Hello World!";
            self.write_srcfile(content_str.as_bytes());
            cfdp_user.expected_file_size = content_str.len() as u64;
            let put_request = PutRequestOwned::new_regular_request(
                REMOTE_ID.into(),
                &self.srcfile,
                &self.destfile,
                Some(self.transmission_mode),
                Some(with_closure),
            )
            .unwrap();
            let transfer_info = self.common_file_transfer_init_with_metadata_check(
                cfdp_user,
                put_request,
                content_str.len() as u64,
            );
            self.check_next_file_pdu(0, content_str.as_bytes());
            assert_eq!(self.handler.progress(), content_str.len() as u64);
            transfer_info
        }
    }

    #[test]
    fn test_basic() {
        let tb = SourceHandlerTestbench::new(TransmissionMode::Unacknowledged, false, 512);
        assert!(tb.handler.transmission_mode().is_none());
        assert!(tb.pdu_queue_empty());
        assert_eq!(tb.handler.state(), State::Idle);
        assert_eq!(tb.handler.step(), TransactionStep::Idle);
        assert!(tb.handler.outcome().is_none());
    }

    #[test]
    fn test_empty_file_transfer_not_acked_no_closure() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Unacknowledged, false, 512);
        let filesize = 0;
        let mut cfdp_user = tb.create_user(0, filesize);
        let put_request = PutRequestOwned::new_regular_request(
            REMOTE_ID.into(),
            &tb.srcfile,
            &tb.destfile,
            Some(TransmissionMode::Unacknowledged),
            Some(false),
        )
        .expect("creating put request failed");
        let transaction_info =
            tb.common_file_transfer_init_with_metadata_check(&mut cfdp_user, put_request, filesize);
        tb.common_eof_pdu_check(
            &mut cfdp_user,
            transaction_info.closure_requested,
            EofParams::new_success(filesize, 0),
            1,
        );
        assert_eq!(tb.handler.outcome(), Some(TransactionOutcome::Completed));
        let finished = cfdp_user.finished_indic_queue.pop_front().unwrap();
        assert_eq!(finished.condition_code, ConditionCode::NoError);
        assert_eq!(finished.file_status, FileStatus::Unreported);
    }

    #[test]
    fn test_tiny_file_transfer_not_acked_no_closure() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Unacknowledged, false, 512);
        let mut cfdp_user = tb.create_user(0, 0);
        tb.common_tiny_file_transfer(&mut cfdp_user, false);
        assert_eq!(tb.handler.outcome(), Some(TransactionOutcome::Completed));
        assert_eq!(cfdp_user.finished_indic_queue.len(), 1);
    }

    #[test]
    fn test_tiny_file_transfer_not_acked_with_closure() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Unacknowledged, false, 512);
        let mut cfdp_user = tb.create_user(0, 0);
        let (_, transfer_info) = tb.common_tiny_file_transfer(&mut cfdp_user, true);
        tb.finish_handling(&mut cfdp_user, &transfer_info)
    }

    #[test]
    fn test_two_segment_file_transfer_not_acked_no_closure() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Unacknowledged, false, 128);
        let mut cfdp_user = tb.create_user(0, 0);
        let mut rng = rand::thread_rng();
        let mut rand_data = [0u8; 140];
        rng.fill(&mut rand_data[..]);
        tb.write_srcfile(&rand_data);
        let (_, fd_pdus) = tb.generic_file_transfer(&mut cfdp_user, false, rand_data.to_vec());
        assert_eq!(fd_pdus, 2);
    }

    #[test]
    fn test_two_segment_file_transfer_not_acked_with_closure() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Unacknowledged, false, 128);
        let mut cfdp_user = tb.create_user(0, 0);
        let mut rng = rand::thread_rng();
        let mut rand_data = [0u8; 140];
        rng.fill(&mut rand_data[..]);
        tb.write_srcfile(&rand_data);
        let (transfer_info, fd_pdus) =
            tb.generic_file_transfer(&mut cfdp_user, true, rand_data.to_vec());
        assert_eq!(fd_pdus, 2);
        tb.finish_handling(&mut cfdp_user, &transfer_info)
    }

    #[test]
    fn test_tiny_file_transfer_acked() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Acknowledged, false, 512);
        let mut cfdp_user = tb.create_user(0, 0);
        let (_, transfer_info) = tb.common_tiny_file_transfer(&mut cfdp_user, false);
        tb.acknowledge_eof_pdu(&mut cfdp_user, &transfer_info);
        assert_eq!(tb.handler.step(), TransactionStep::WaitingForFinished);
        tb.finish_handling(&mut cfdp_user, &transfer_info)
    }

    #[test]
    fn test_positive_ack_procedure() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Acknowledged, false, 512);
        let mut cfdp_user = tb.create_user(0, 0);
        let (content, transfer_info) = tb.common_tiny_file_transfer(&mut cfdp_user, false);
        let eof_params = EofParams::new_success(
            transfer_info.file_size,
            CRC_32.checksum(content.as_bytes()),
        );
        tb.expiry_control.set_positive_ack_expired();
        let sent_packets = tb
            .handler
            .state_machine_no_packet(&mut cfdp_user)
            .expect("source handler FSM failure");
        assert_eq!(sent_packets, 1);
        let eof_pdu = tb.next_eof_pdu();
        assert_eq!(eof_pdu.file_checksum(), eof_params.file_checksum);
        assert_eq!(eof_pdu.file_size(), eof_params.file_size);
        // The EOF-Sent indication is only emitted once.
        assert_eq!(cfdp_user.eof_sent_call_count, 1);
        tb.acknowledge_eof_pdu(&mut cfdp_user, &transfer_info);
        tb.finish_handling(&mut cfdp_user, &transfer_info)
    }

    #[test]
    fn test_positive_ack_procedure_limit_reached() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Acknowledged, false, 512);
        let mut cfdp_user = tb.create_user(0, 0);
        let (content, transfer_info) = tb.common_tiny_file_transfer(&mut cfdp_user, false);
        tb.expiry_control.set_positive_ack_expired();
        assert_eq!(tb.handler.state_machine_no_packet(&mut cfdp_user).unwrap(), 1);
        tb.next_eof_pdu();
        tb.expiry_control.set_positive_ack_expired();
        // Limit is reached, the transaction is cancelled with an EOF (cancel) PDU.
        assert_eq!(tb.handler.state_machine_no_packet(&mut cfdp_user).unwrap(), 1);
        let eof_pdu = tb.next_eof_pdu();
        assert_eq!(
            eof_pdu.condition_code(),
            ConditionCode::PositiveAckLimitReached
        );
        assert_eq!(eof_pdu.file_size(), content.len() as u64);
        assert_eq!(
            eof_pdu.fault_location().map(|loc| loc.entity_id().value()),
            Some(LOCAL_ID.value() as u64)
        );
        assert_eq!(tb.handler.step(), TransactionStep::WaitingForEofAck);
        {
            let fault_handler = tb.test_fault_handler().borrow();
            assert_eq!(fault_handler.notice_of_cancellation_queue.len(), 1);
            let fault_info = fault_handler.notice_of_cancellation_queue[0];
            assert_eq!(fault_info.transaction_id(), transfer_info.id);
            assert_eq!(
                fault_info.condition_code(),
                ConditionCode::PositiveAckLimitReached
            );
        }
        // The EOF (cancel) PDU is not acknowledged either, which leads to abandonment.
        tb.expiry_control.set_positive_ack_expired();
        assert_eq!(tb.handler.state_machine_no_packet(&mut cfdp_user).unwrap(), 1);
        tb.next_eof_pdu();
        tb.expiry_control.set_positive_ack_expired();
        assert_eq!(tb.handler.state_machine_no_packet(&mut cfdp_user).unwrap(), 0);
        assert_eq!(tb.handler.state(), State::Idle);
        assert_eq!(
            tb.handler.outcome(),
            Some(TransactionOutcome::Abandoned(
                ConditionCode::PositiveAckLimitReached
            ))
        );
        let (id, cond, progress) = cfdp_user.abandoned_queue.pop_front().unwrap();
        assert_eq!(id, transfer_info.id);
        assert_eq!(cond, ConditionCode::PositiveAckLimitReached);
        assert_eq!(progress, content.len() as u64);
        assert_eq!(tb.test_fault_handler().borrow().abandoned_queue.len(), 1);
    }

    #[test]
    fn test_nak_retransmission() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Acknowledged, false, 128);
        let mut cfdp_user = tb.create_user(0, 0);
        let mut rng = rand::thread_rng();
        let mut rand_data = [0u8; 140];
        rng.fill(&mut rand_data[..]);
        tb.write_srcfile(&rand_data);
        let (transfer_info, _) = tb.generic_file_transfer(&mut cfdp_user, false, rand_data.to_vec());
        tb.acknowledge_eof_pdu(&mut cfdp_user, &transfer_info);
        let seg_len = calculate_max_file_seg_len_for_max_packet_len_and_pdu_header(
            &transfer_info.pdu_header,
            128,
            None,
        ) as u64;
        // Metadata re-request, a segment which needs two PDUs and a tiny segment.
        let sent_packets =
            tb.nak_for_file_segments(&mut cfdp_user, &transfer_info, &[(0, 0), (0, 140), (5, 10)]);
        assert_eq!(sent_packets, 4);
        let metadata_pdu = tb.get_next_sent_pdu().unwrap();
        tb.metadata_check(&metadata_pdu, 140);
        tb.check_next_file_pdu(0, &rand_data[0..seg_len as usize]);
        tb.check_next_file_pdu(seg_len, &rand_data[seg_len as usize..]);
        tb.check_next_file_pdu(5, &rand_data[5..10]);
        assert!(tb.pdu_queue_empty());
        tb.finish_handling(&mut cfdp_user, &transfer_info)
    }

    #[test]
    fn test_invalid_nak_requests_ignored() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Acknowledged, false, 512);
        let mut cfdp_user = tb.create_user(0, 0);
        let (content, transfer_info) = tb.common_tiny_file_transfer(&mut cfdp_user, false);
        let sent_packets = tb.nak_for_file_segments(
            &mut cfdp_user,
            &transfer_info,
            &[(8, 4), (200, 300), (6, 400)],
        );
        // Only the last request is valid, and it is clamped to the file size.
        assert_eq!(sent_packets, 1);
        tb.check_next_file_pdu(6, &content.as_bytes()[6..]);
        assert_eq!(tb.handler.anomalies().invalid_segment_requests(), 2);
        assert_eq!(tb.handler.state(), State::Busy);
    }

    #[test]
    fn test_check_limit_expiry_cancels() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Unacknowledged, false, 512);
        let mut cfdp_user = tb.create_user(0, 0);
        let (content, transfer_info) = tb.common_tiny_file_transfer(&mut cfdp_user, true);
        tb.expiry_control.set_check_limit_expired();
        let sent_packets = tb.handler.state_machine_no_packet(&mut cfdp_user).unwrap();
        assert_eq!(sent_packets, 1);
        let eof_pdu = tb.next_eof_pdu();
        assert_eq!(eof_pdu.condition_code(), ConditionCode::CheckLimitReached);
        assert_eq!(eof_pdu.file_checksum(), CRC_32.checksum(content.as_bytes()));
        assert_eq!(tb.handler.state(), State::Idle);
        assert_eq!(
            tb.handler.outcome(),
            Some(TransactionOutcome::Cancelled(ConditionCode::CheckLimitReached))
        );
        let finished = cfdp_user.finished_indic_queue.pop_front().unwrap();
        assert_eq!(finished.id, transfer_info.id);
        assert_eq!(finished.condition_code, ConditionCode::CheckLimitReached);
        assert_eq!(finished.delivery_code, DeliveryCode::Incomplete);
        let fault_handler = tb.test_fault_handler().borrow();
        assert_eq!(fault_handler.notice_of_cancellation_queue.len(), 1);
    }

    #[test]
    fn test_cancel_request_not_acked() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Unacknowledged, false, 512);
        let mut cfdp_user = tb.create_user(0, 0);
        let transfer_info = tb.start_tiny_transfer_until_file_data(&mut cfdp_user, false);
        let other_id = TransactionId::new(INVALID_ID.into(), INVALID_ID.into());
        assert!(!tb.handler.cancel_request(&mut cfdp_user, &other_id).unwrap());
        assert!(tb
            .handler
            .cancel_request(&mut cfdp_user, &transfer_info.id)
            .unwrap());
        let eof_pdu = tb.next_eof_pdu();
        assert_eq!(
            eof_pdu.condition_code(),
            ConditionCode::CancelRequestReceived
        );
        assert_eq!(eof_pdu.file_size(), 12);
        assert!(eof_pdu.fault_location().is_some());
        assert_eq!(tb.handler.state(), State::Idle);
        assert_eq!(
            tb.handler.outcome(),
            Some(TransactionOutcome::Cancelled(
                ConditionCode::CancelRequestReceived
            ))
        );
        // Cancellation requests do not invoke the fault handler.
        assert!(tb.all_fault_queues_empty());
        assert!(!tb
            .handler
            .cancel_request(&mut cfdp_user, &transfer_info.id)
            .unwrap());
    }

    #[test]
    fn test_cancel_request_acked() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Acknowledged, false, 512);
        let mut cfdp_user = tb.create_user(0, 0);
        let transfer_info = tb.start_tiny_transfer_until_file_data(&mut cfdp_user, false);
        assert!(tb
            .handler
            .cancel_request(&mut cfdp_user, &transfer_info.id)
            .unwrap());
        // Idempotent while the cancellation is in progress.
        assert!(tb
            .handler
            .cancel_request(&mut cfdp_user, &transfer_info.id)
            .unwrap());
        let eof_pdu = tb.next_eof_pdu();
        assert_eq!(
            eof_pdu.condition_code(),
            ConditionCode::CancelRequestReceived
        );
        assert!(tb.pdu_queue_empty());
        assert_eq!(tb.handler.step(), TransactionStep::WaitingForEofAck);
        tb.acknowledge_eof_pdu(&mut cfdp_user, &transfer_info);
        assert_eq!(tb.handler.step(), TransactionStep::WaitingForFinished);
        let finished_pdu = FinishedPdu::new_with_error(
            transfer_info.pdu_header,
            ConditionCode::CancelRequestReceived,
            DeliveryCode::Incomplete,
            FileStatus::DiscardDeliberately,
            EntityIdTlv::new(LOCAL_ID.into()),
        )
        .unwrap();
        assert_eq!(tb.insert_pdu(&mut cfdp_user, &finished_pdu).unwrap(), 1);
        tb.common_finished_pdu_ack_check(ConditionCode::CancelRequestReceived);
        assert_eq!(tb.handler.state(), State::Idle);
        assert_eq!(
            tb.handler.outcome(),
            Some(TransactionOutcome::Cancelled(
                ConditionCode::CancelRequestReceived
            ))
        );
        let finished = cfdp_user.finished_indic_queue.pop_front().unwrap();
        assert_eq!(finished.condition_code, ConditionCode::CancelRequestReceived);
        assert_eq!(finished.file_status, FileStatus::DiscardDeliberately);
    }

    #[test]
    fn test_finished_with_error_while_sending() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Acknowledged, false, 512);
        let mut cfdp_user = tb.create_user(0, 0);
        let transfer_info = tb.start_tiny_transfer_until_file_data(&mut cfdp_user, false);
        let finished_pdu = FinishedPdu::new_with_error(
            transfer_info.pdu_header,
            ConditionCode::FilestoreRejection,
            DeliveryCode::Incomplete,
            FileStatus::DiscardedFsRejection,
            EntityIdTlv::new(REMOTE_ID.into()),
        )
        .unwrap();
        assert_eq!(tb.insert_pdu(&mut cfdp_user, &finished_pdu).unwrap(), 1);
        tb.common_finished_pdu_ack_check(ConditionCode::FilestoreRejection);
        assert_eq!(
            tb.handler.outcome(),
            Some(TransactionOutcome::Cancelled(
                ConditionCode::FilestoreRejection
            ))
        );
    }

    #[test]
    fn test_unexpected_finished_no_error() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Acknowledged, false, 512);
        let mut cfdp_user = tb.create_user(0, 0);
        let transfer_info = tb.start_tiny_transfer_until_file_data(&mut cfdp_user, false);
        let finished_pdu = FinishedPdu::new_no_error(
            transfer_info.pdu_header,
            DeliveryCode::Complete,
            FileStatus::Retained,
        )
        .unwrap();
        assert!(matches!(
            tb.insert_pdu(&mut cfdp_user, &finished_pdu),
            Err(SourceError::UnexpectedPdu { .. })
        ));
        assert_eq!(tb.handler.state(), State::Busy);
    }

    #[test]
    fn test_duplicate_finished_is_acked_again() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Acknowledged, false, 512);
        let mut cfdp_user = tb.create_user(0, 0);
        let (_, transfer_info) = tb.common_tiny_file_transfer(&mut cfdp_user, false);
        tb.acknowledge_eof_pdu(&mut cfdp_user, &transfer_info);
        tb.finish_handling(&mut cfdp_user, &transfer_info);
        let finished_pdu = FinishedPdu::new_no_error(
            transfer_info.pdu_header,
            DeliveryCode::Complete,
            FileStatus::Retained,
        )
        .unwrap();
        assert_eq!(tb.insert_pdu(&mut cfdp_user, &finished_pdu).unwrap(), 1);
        tb.common_finished_pdu_ack_check(ConditionCode::NoError);
        assert!(cfdp_user.finished_indic_queue.is_empty());
        // Other PDUs are absorbed.
        let ack_pdu = AckPdu::new_for_eof_pdu(
            transfer_info.pdu_header,
            ConditionCode::NoError,
            TransactionStatus::Active,
        );
        assert_eq!(tb.insert_pdu(&mut cfdp_user, &ack_pdu).unwrap(), 0);
        assert!(tb.pdu_queue_empty());
    }

    #[test]
    fn test_inactivity_while_waiting_for_finished() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Acknowledged, false, 512);
        let mut cfdp_user = tb.create_user(0, 0);
        let (_, transfer_info) = tb.common_tiny_file_transfer(&mut cfdp_user, false);
        tb.acknowledge_eof_pdu(&mut cfdp_user, &transfer_info);
        tb.expiry_control.set_inactivity_expired();
        assert_eq!(tb.handler.state_machine_no_packet(&mut cfdp_user).unwrap(), 1);
        let eof_pdu = tb.next_eof_pdu();
        assert_eq!(eof_pdu.condition_code(), ConditionCode::InactivityDetected);
        assert_eq!(tb.handler.step(), TransactionStep::WaitingForEofAck);
    }

    #[test]
    fn test_keep_alive_discrepancy() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Acknowledged, false, 512);
        tb.handler
            .remote_cfg_table
            .get_mut(REMOTE_ID.value().into())
            .unwrap()
            .keep_alive_discrepancy_limit = 4;
        let mut cfdp_user = tb.create_user(0, 0);
        let (_, transfer_info) = tb.common_tiny_file_transfer(&mut cfdp_user, false);
        let keep_alive = KeepAlivePdu::new(transfer_info.pdu_header, 10).unwrap();
        assert_eq!(tb.insert_pdu(&mut cfdp_user, &keep_alive).unwrap(), 0);
        assert!(tb.all_fault_queues_empty());
        let keep_alive = KeepAlivePdu::new(transfer_info.pdu_header, 2).unwrap();
        assert_eq!(tb.insert_pdu(&mut cfdp_user, &keep_alive).unwrap(), 1);
        let eof_pdu = tb.next_eof_pdu();
        assert_eq!(
            eof_pdu.condition_code(),
            ConditionCode::KeepAliveLimitReached
        );
    }

    #[test]
    fn test_fault_handler_override_abandons() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Unacknowledged, false, 512);
        let mut cfdp_user = tb.create_user(0, 0);
        tb.write_srcfile(b"Hello World!");
        cfdp_user.expected_file_size = 12;
        let overrides = [FaultHandlerOverrideTlv::new(
            ConditionCode::CheckLimitReached,
            FaultHandlerCode::AbandonTransaction,
        )];
        let put_request = PutRequest::new_regular_request(
            REMOTE_ID.into(),
            &tb.srcfile,
            &tb.destfile,
            Some(TransmissionMode::Unacknowledged),
            Some(true),
        )
        .unwrap()
        .with_fault_handler_overrides(&overrides);
        let put_request = PutRequestOwned::from(put_request);
        let id = tb.put_request(&put_request).unwrap();
        assert_eq!(tb.handler.state_machine_no_packet(&mut cfdp_user).unwrap(), 2);
        let metadata = tb.get_next_sent_pdu().unwrap();
        let metadata_pdu = MetadataPdu::from_bytes(&metadata.raw_pdu).unwrap();
        assert_eq!(metadata_pdu.fault_handler_overrides().count(), 1);
        tb.get_next_sent_pdu().unwrap();
        assert_eq!(tb.handler.state_machine_no_packet(&mut cfdp_user).unwrap(), 1);
        tb.next_eof_pdu();
        tb.expiry_control.set_check_limit_expired();
        assert_eq!(tb.handler.state_machine_no_packet(&mut cfdp_user).unwrap(), 0);
        assert!(tb.pdu_queue_empty());
        assert_eq!(
            tb.handler.outcome(),
            Some(TransactionOutcome::Abandoned(ConditionCode::CheckLimitReached))
        );
        assert_eq!(cfdp_user.abandoned_queue.pop_front().unwrap().0, id);
    }

    #[test]
    fn test_ignored_fault_continues() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Unacknowledged, false, 512);
        tb.handler
            .local_cfg
            .fault_handler
            .set_fault_handler(ConditionCode::CheckLimitReached, FaultHandlerCode::IgnoreError);
        let mut cfdp_user = tb.create_user(0, 0);
        let (_, transfer_info) = tb.common_tiny_file_transfer(&mut cfdp_user, true);
        tb.expiry_control.set_check_limit_expired();
        assert_eq!(tb.handler.state_machine_no_packet(&mut cfdp_user).unwrap(), 0);
        assert_eq!(tb.handler.state(), State::Busy);
        let (id, cond, progress) = cfdp_user.fault_queue.pop_front().unwrap();
        assert_eq!(id, transfer_info.id);
        assert_eq!(cond, ConditionCode::CheckLimitReached);
        assert_eq!(progress, 12);
        assert_eq!(tb.test_fault_handler().borrow().ignored_queue.len(), 1);
        tb.finish_handling(&mut cfdp_user, &transfer_info);
    }

    #[test]
    fn test_suspend_and_resume() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Unacknowledged, false, 512);
        let mut cfdp_user = tb.create_user(0, 0);
        let transfer_info = tb.start_tiny_transfer_until_file_data(&mut cfdp_user, true);
        assert!(tb.handler.suspend_request(&mut cfdp_user, &transfer_info.id));
        assert!(!tb.handler.suspend_request(&mut cfdp_user, &transfer_info.id));
        assert_eq!(tb.handler.state(), State::Suspended);
        assert_eq!(
            cfdp_user.suspended_queue.pop_front().unwrap(),
            (transfer_info.id, ConditionCode::SuspendRequestReceived)
        );
        // No PDUs are generated while suspended.
        assert_eq!(tb.handler.state_machine_no_packet(&mut cfdp_user).unwrap(), 0);
        assert!(tb.pdu_queue_empty());
        assert!(tb.handler.resume_request(&mut cfdp_user, &transfer_info.id));
        assert_eq!(
            cfdp_user.resumed_queue.pop_front().unwrap(),
            (transfer_info.id, 12)
        );
        assert_eq!(tb.handler.state_machine_no_packet(&mut cfdp_user).unwrap(), 1);
        tb.next_eof_pdu();
        tb.finish_handling(&mut cfdp_user, &transfer_info);
    }

    #[test]
    fn test_notice_of_suspension_fault() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Unacknowledged, false, 512);
        tb.handler.local_cfg.fault_handler.set_fault_handler(
            ConditionCode::CheckLimitReached,
            FaultHandlerCode::NoticeOfSuspension,
        );
        let mut cfdp_user = tb.create_user(0, 0);
        let (_, transfer_info) = tb.common_tiny_file_transfer(&mut cfdp_user, true);
        tb.expiry_control.set_check_limit_expired();
        assert_eq!(tb.handler.state_machine_no_packet(&mut cfdp_user).unwrap(), 0);
        assert_eq!(tb.handler.state(), State::Suspended);
        assert_eq!(
            cfdp_user.suspended_queue.pop_front().unwrap(),
            (transfer_info.id, ConditionCode::CheckLimitReached)
        );
        assert_eq!(
            tb.test_fault_handler()
                .borrow()
                .notice_of_suspension_queue
                .len(),
            1
        );
        // Finished PDUs are still accepted while suspended.
        tb.finish_handling(&mut cfdp_user, &transfer_info);
    }

    #[test]
    fn test_metadata_only_transfer() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Unacknowledged, false, 512);
        let mut cfdp_user = tb.create_user(0, 0);
        let msgs = [MsgToUserTlv::new(b"hello receiver").unwrap()];
        let mut put_request = PutRequest::new_msgs_to_user_only(REMOTE_ID.into(), &msgs);
        put_request.closure_requested = Some(false);
        tb.put_request(&put_request).unwrap();
        assert_eq!(tb.handler.state_machine_no_packet(&mut cfdp_user).unwrap(), 1);
        let metadata = tb.get_next_sent_pdu().unwrap();
        let metadata_pdu = MetadataPdu::from_bytes(&metadata.raw_pdu).unwrap();
        assert!(metadata_pdu.src_file_name().is_none());
        assert!(metadata_pdu.dest_file_name().is_none());
        assert!(matches!(metadata_pdu.options()[0], Tlv::MsgToUser(_)));
        // No EOF PDU without closure.
        assert!(tb.pdu_queue_empty());
        assert_eq!(tb.handler.state(), State::Idle);
        assert_eq!(tb.handler.outcome(), Some(TransactionOutcome::Completed));
        assert_eq!(cfdp_user.eof_sent_call_count, 0);
    }

    #[test]
    fn test_metadata_only_transfer_with_closure() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Unacknowledged, false, 512);
        let mut cfdp_user = tb.create_user(0, 0);
        let msgs = [MsgToUserTlv::new(b"hello receiver").unwrap()];
        let mut put_request = PutRequest::new_msgs_to_user_only(REMOTE_ID.into(), &msgs);
        put_request.closure_requested = Some(true);
        tb.put_request(&put_request).unwrap();
        assert_eq!(tb.handler.state_machine_no_packet(&mut cfdp_user).unwrap(), 2);
        tb.get_next_sent_pdu().unwrap();
        let eof_pdu = tb.next_eof_pdu();
        assert_eq!(eof_pdu.file_size(), 0);
        assert_eq!(eof_pdu.file_checksum(), 0);
        assert_eq!(tb.handler.step(), TransactionStep::WaitingForFinished);
    }

    #[test]
    fn test_put_request_errors() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Unacknowledged, false, 512);
        let put_request = PutRequestOwned::new_regular_request(
            INVALID_ID.into(),
            &tb.srcfile,
            &tb.destfile,
            None,
            None,
        )
        .unwrap();
        assert!(matches!(
            tb.put_request(&put_request),
            Err(PutRequestError::NoRemoteCfgFound(id)) if id == UnsignedByteField::from(INVALID_ID)
        ));
        let put_request = PutRequestOwned::new_regular_request(
            REMOTE_ID.into(),
            "/tmp/this-file-does-not-exist-for-cfdp.txt",
            &tb.destfile,
            None,
            None,
        )
        .unwrap();
        assert!(matches!(
            tb.put_request(&put_request),
            Err(PutRequestError::FileDoesNotExist)
        ));
        let put_request = PutRequestOwned::new_regular_request(
            REMOTE_ID.into(),
            &tb.srcfile,
            &tb.destfile,
            None,
            None,
        )
        .unwrap();
        tb.put_request(&put_request).unwrap();
        assert!(matches!(
            tb.put_request(&put_request),
            Err(PutRequestError::AlreadyBusy)
        ));
    }

    #[test]
    fn test_entity_id_width_too_small() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Unacknowledged, false, 512);
        tb.handler
            .remote_cfg_table
            .get_mut(REMOTE_ID.value().into())
            .unwrap()
            .entity_id_width = Some(0);
        let put_request = PutRequestOwned::new_regular_request(
            REMOTE_ID.into(),
            &tb.srcfile,
            &tb.destfile,
            None,
            None,
        )
        .unwrap();
        assert!(matches!(
            tb.put_request(&put_request),
            Err(PutRequestError::EntityIdWidth(UnsignedByteFieldError { width: 0, .. }))
        ));
        assert_eq!(tb.handler.state(), State::Idle);
    }

    #[test]
    fn test_sequence_numbers_increment() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Unacknowledged, false, 512);
        let mut cfdp_user = tb.create_user(0, 0);
        tb.common_tiny_file_transfer(&mut cfdp_user, false);
        let put_request = PutRequestOwned::new_regular_request(
            REMOTE_ID.into(),
            &tb.srcfile,
            &tb.destfile,
            None,
            None,
        )
        .unwrap();
        let id = tb.put_request(&put_request).unwrap();
        assert_eq!(id.seq_num().value(), 1);
        assert_eq!(id.seq_num().size(), 2);
        assert!(tb.handler.outcome().is_none());
    }

    #[test]
    fn test_prompt_and_report() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Acknowledged, false, 512);
        let mut cfdp_user = tb.create_user(0, 0);
        let transfer_info = tb.start_tiny_transfer_until_file_data(&mut cfdp_user, false);
        assert!(tb
            .handler
            .send_prompt(&transfer_info.id, PromptResponseRequired::KeepAlive)
            .unwrap());
        let prompt = tb.get_next_sent_pdu().unwrap();
        assert_eq!(
            prompt.file_directive_type,
            Some(FileDirectiveType::PromptPdu)
        );
        let prompt_pdu = PromptPdu::from_bytes(&prompt.raw_pdu).unwrap();
        assert_eq!(
            prompt_pdu.response_required(),
            PromptResponseRequired::KeepAlive
        );
        assert!(tb.handler.report_request(&mut cfdp_user, &transfer_info.id));
    }

    #[test]
    fn test_pdu_for_other_transaction_dropped() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Acknowledged, false, 512);
        let mut cfdp_user = tb.create_user(0, 0);
        let (_, transfer_info) = tb.common_tiny_file_transfer(&mut cfdp_user, false);
        let mut other_conf = *transfer_info.pdu_header.common_pdu_conf();
        other_conf.transaction_seq_num = UnsignedByteFieldU16::new(7).into();
        let ack_pdu = AckPdu::new_for_eof_pdu(
            PduHeader::new_for_file_directive(other_conf, 0),
            ConditionCode::NoError,
            TransactionStatus::Active,
        );
        assert_eq!(tb.insert_pdu(&mut cfdp_user, &ack_pdu).unwrap(), 0);
        assert_eq!(tb.handler.step(), TransactionStep::WaitingForEofAck);
        assert_eq!(tb.handler.anomalies().foreign_pdus(), 1);
    }

    #[test]
    fn test_crc_on_transmission() {
        let mut tb = SourceHandlerTestbench::new(TransmissionMode::Unacknowledged, true, 512);
        let mut cfdp_user = tb.create_user(0, 12);
        tb.write_srcfile(b"Hello World!");
        let put_request = PutRequestOwned::new_regular_request(
            REMOTE_ID.into(),
            &tb.srcfile,
            &tb.destfile,
            None,
            Some(false),
        )
        .unwrap();
        tb.put_request(&put_request).unwrap();
        tb.handler.state_machine_no_packet(&mut cfdp_user).unwrap();
        let metadata = tb.get_next_sent_pdu().unwrap();
        let metadata_pdu = MetadataPdu::from_bytes(&metadata.raw_pdu).unwrap();
        assert_eq!(metadata_pdu.crc_flag(), CrcFlag::WithCrc);
    }
}
