//! Implementation of the CCSDS File Delivery Protocol (CFDP) as specified in CCSDS 727.0-B-5.
//!
//! CFDP converts files of any size into a stream of packet data units (PDU). The protocol has an
//! unacknowledged mode (Class 1) and an acknowledged mode (Class 2). Class 1 optionally supports
//! transaction closure, where the receiver confirms the transfer with a Finished PDU after
//! verifying the file checksum. Class 2 adds lost segment detection with NAK PDUs and positive
//! acknowledgement procedures, which makes it usable on lossy links with long delays.
//!
//! The crate is layered like this:
//!
//! - [pdu]: bit-exact encoding and decoding of all PDUs and their TLV fields.
//! - [source::SourceHandler] and [dest::DestinationHandler]: the sender and receiver role of a
//!   single transaction.
//! - [entity::EntityManager]: owns all transactions of a local entity, allocates sequence
//!   numbers, routes inbound PDUs and garbage-collects finished transactions.
//!
//! The handlers are decoupled from the runtime environment by a set of traits:
//! [PduSender] for outbound PDUs, [filestore::VirtualFilestore] for file access,
//! [TimerCreator] for all protocol timers and [user::CfdpUser] / [UserFaultHook] for the
//! indications to the CFDP user.
//!
//! # Logging
//!
//! The library uses the [log] facade and never installs a logger on its own.
//!
//! # Examples
//!
//! The `tests/end-to-end.rs` integration test spawns a source and a destination handler in
//! separate threads and performs a file copy operation between them. The `udp-transfer` demo
//! runs two entity managers which exchange PDUs over UDP sockets:
//!
//! ```sh
//! cargo run --example udp-transfer -- --help
//! ```
pub mod checksum;
pub mod dest;
pub mod entity;
pub mod filestore;
pub mod lost_segments;
pub mod pdu;
pub mod request;
pub mod seq_count;
pub mod source;
pub mod time;
pub mod user;
pub mod util;

use core::{cell::RefCell, fmt::Debug, hash::Hash, time::Duration};
use std::sync::{mpsc, Arc, Mutex};

use hashbrown::HashMap;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    pdu::{
        tlv::FaultHandlerOverrideTlv, ChecksumType, ConditionCode, FaultHandlerCode,
        FileDirectiveType, PduError, PduHeader, PduType, TransmissionMode,
    },
    time::{Countdown, StdCountdown},
    util::{ByteConversionError, UnsignedByteField},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EntityType {
    Sending,
    Receiving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TimerContext {
    CheckLimit {
        local_id: UnsignedByteField,
        remote_id: UnsignedByteField,
        entity_type: EntityType,
    },
    NakActivity {
        expiry_time: Duration,
    },
    PositiveAck {
        expiry_time: Duration,
    },
    KeepAlive {
        expiry_time: Duration,
    },
    Inactivity {
        expiry_time: Duration,
    },
}

/// Generic trait which allows the CFDP handlers to create all timers they need.
///
/// This allows the creation of different timers depending on context and purpose of the timer
/// and the runtime environment, for example a standard clock timer or a timer driven by a test.
///
/// The countdowns are used by these mechanisms:
///
/// ## 1. Check limit handling
///
/// Check limit handling for unacknowledged transfers as specified in 4.6.3.2 and 4.6.3.3 of the
/// CFDP standard. For the sending entity, the timer determines the expiry period for declaring a
/// check limit fault after sending an EOF PDU with requested closure. For the receiving entity,
/// the timer determines the expiry period for incrementing a check counter after an EOF PDU is
/// received for an incomplete file transfer.
///
/// ## 2. NAK activity limit
///
/// The NAK activity check specified in 4.6.4.7 of the CFDP standard. The expiration period is the
/// NAK timer interval of the remote entity configuration.
///
/// ## 3. Positive ACK procedures
///
/// The positive acknowledgement procedures specified in 4.7.1 of the CFDP standard. The
/// expiration period is the positive ACK timer interval of the remote entity configuration.
///
/// ## 4. Keep alive and inactivity
///
/// The receiving entity of an acknowledged transfer reports its progress periodically, and both
/// sides declare an inactivity fault if nothing is received for the inactivity timeout.
pub trait TimerCreator {
    type Countdown: Countdown;

    fn create_countdown(&self, timer_context: TimerContext) -> Self::Countdown;
}

/// Remote entity configuration information as specified in chapter 8.3 of the CFDP standard.
///
/// Some fields of the standard were omitted, and some fields which are not part of the standard
/// are required by this implementation.
///
/// ## Notes on Positive Acknowledgment Procedures
///
/// The `positive_ack_timer_interval` and `positive_ack_timer_expiration_limit` are used for the
/// positive acknowledgement procedures as specified in CFDP chapter 4.7. The sending entity
/// starts the timer for any PDU which requires an acknowledgment, for example the EOF PDU. Each
/// time the timer expires without the expected ACK, a counter is incremented and the PDU is sent
/// again. Once the counter reaches the `positive_ack_timer_expiration_limit`, a Positive ACK
/// Limit Reached fault is declared.
///
/// ## Notes on Deferred Lost Segment Procedures
///
/// This procedure is active after an EOF (No Error) PDU was received in acknowledged mode. After
/// issuing the NAK sequence, a timer is started. The timer is reset when missing segments or
/// missing metadata are received. If the timer expires, a new NAK sequence is issued and a
/// counter is incremented, which can lead to a NAK Limit Reached fault.
///
/// ## Fields
///
/// * `entity_id` - The ID of the remote entity.
/// * `max_packet_len` - Maximum length of all PDUs generated for that remote entity.
/// * `max_file_segment_len` - Maximum file segment length. If this field is [None], the segment
///   length is derived from `max_packet_len`. Otherwise, the smaller of both values is used.
/// * `closure_requested_by_default` - Used if the put request does not specify closure.
/// * `crc_on_transmission_by_default` - Whether PDUs to this entity carry a CRC.
/// * `default_transmission_mode` - Used if the put request does not specify the mode.
/// * `default_crc_type` - File checksum type used for all transfers to this remote entity.
/// * `check_limit` - How often the check limit timer may expire. Defaults to 2.
/// * `disposition_on_cancellation` - Whether an incomplete received file is discarded on
///   cancellation. Defaults to false.
/// * `immediate_nak_mode` - Whether a NAK is sent as soon as a file data gap is detected in
///   acknowledged mode. Defaults to true.
/// * `keep_alive_interval` - Interval in which the receiver sends keep alive PDUs in
///   acknowledged mode.
/// * `keep_alive_discrepancy_limit` - Maximum allowed difference in octets between the sender
///   progress and the progress reported by a keep alive PDU.
/// * `inactivity_timeout` - A transaction which does not receive any PDU for this duration
///   declares an Inactivity Detected fault.
/// * `entity_id_width` and `seq_num_width` - Optional width overrides in octets for entity IDs
///   and sequence numbers of transactions started towards this entity.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RemoteEntityConfig {
    pub entity_id: UnsignedByteField,
    pub max_packet_len: usize,
    pub max_file_segment_len: Option<usize>,
    pub closure_requested_by_default: bool,
    pub crc_on_transmission_by_default: bool,
    pub default_transmission_mode: TransmissionMode,
    pub default_crc_type: ChecksumType,
    pub positive_ack_timer_interval: Duration,
    pub positive_ack_timer_expiration_limit: u32,
    pub check_limit: u32,
    pub disposition_on_cancellation: bool,
    pub immediate_nak_mode: bool,
    pub nak_timer_interval: Duration,
    pub nak_timer_expiration_limit: u32,
    pub keep_alive_interval: Duration,
    pub keep_alive_discrepancy_limit: u64,
    pub inactivity_timeout: Duration,
    pub entity_id_width: Option<usize>,
    pub seq_num_width: Option<usize>,
}

impl RemoteEntityConfig {
    pub fn new_with_default_values(
        entity_id: UnsignedByteField,
        max_packet_len: usize,
        closure_requested_by_default: bool,
        crc_on_transmission_by_default: bool,
        default_transmission_mode: TransmissionMode,
        default_crc_type: ChecksumType,
    ) -> Self {
        Self {
            entity_id,
            max_file_segment_len: None,
            max_packet_len,
            closure_requested_by_default,
            crc_on_transmission_by_default,
            default_transmission_mode,
            default_crc_type,
            check_limit: 2,
            positive_ack_timer_interval: Duration::from_secs(10),
            positive_ack_timer_expiration_limit: 2,
            disposition_on_cancellation: false,
            immediate_nak_mode: true,
            nak_timer_interval: Duration::from_secs(10),
            nak_timer_expiration_limit: 2,
            keep_alive_interval: Duration::from_secs(10),
            keep_alive_discrepancy_limit: 1024 * 1024,
            inactivity_timeout: Duration::from_secs(30),
            entity_id_width: None,
            seq_num_width: None,
        }
    }
}

pub trait RemoteConfigStore {
    /// Retrieve the remote entity configuration for the given remote ID.
    fn get(&self, remote_id: u64) -> Option<&RemoteEntityConfig>;
    fn get_mut(&mut self, remote_id: u64) -> Option<&mut RemoteEntityConfig>;
    /// Add a new remote configuration. Returns [true] if the configuration was newly added and
    /// [false] if it could not be added or replaced an existing one.
    fn add_config(&mut self, cfg: &RemoteEntityConfig) -> bool;
    /// Remove a configuration. Returns [true] if the configuration was removed successfully,
    /// and [false] if no configuration exists for the given remote ID.
    fn remove_config(&mut self, remote_id: u64) -> bool;
}

/// Thin wrapper around a [HashMap] to store remote entity configurations.
#[derive(Default, Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RemoteConfigStoreStd(pub HashMap<u64, RemoteEntityConfig>);

impl RemoteConfigStore for RemoteConfigStoreStd {
    fn get(&self, remote_id: u64) -> Option<&RemoteEntityConfig> {
        self.0.get(&remote_id)
    }
    fn get_mut(&mut self, remote_id: u64) -> Option<&mut RemoteEntityConfig> {
        self.0.get_mut(&remote_id)
    }
    fn add_config(&mut self, cfg: &RemoteEntityConfig) -> bool {
        self.0.insert(cfg.entity_id.value(), *cfg).is_none()
    }
    fn remove_config(&mut self, remote_id: u64) -> bool {
        self.0.remove(&remote_id).is_some()
    }
}

/// Thin wrapper around a [Vec] to store remote entity configurations.
#[derive(Default, Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RemoteConfigList(pub Vec<RemoteEntityConfig>);

impl RemoteConfigStore for RemoteConfigList {
    fn get(&self, remote_id: u64) -> Option<&RemoteEntityConfig> {
        self.0
            .iter()
            .find(|&cfg| cfg.entity_id.value() == remote_id)
    }

    fn get_mut(&mut self, remote_id: u64) -> Option<&mut RemoteEntityConfig> {
        self.0
            .iter_mut()
            .find(|cfg| cfg.entity_id.value() == remote_id)
    }

    fn add_config(&mut self, cfg: &RemoteEntityConfig) -> bool {
        if let Some(existing) = self.get_mut(cfg.entity_id.value()) {
            *existing = *cfg;
            return false;
        }
        self.0.push(*cfg);
        true
    }

    fn remove_config(&mut self, remote_id: u64) -> bool {
        match self
            .0
            .iter()
            .position(|cfg| cfg.entity_id.value() == remote_id)
        {
            Some(idx) => {
                self.0.remove(idx);
                true
            }
            None => false,
        }
    }
}

/// A single remote entity configuration also implements the [RemoteConfigStore], but the
/// [RemoteConfigStore::add_config] and [RemoteConfigStore::remove_config] methods are no-ops
/// which always return [false].
impl RemoteConfigStore for RemoteEntityConfig {
    fn get(&self, remote_id: u64) -> Option<&RemoteEntityConfig> {
        if remote_id == self.entity_id.value() {
            return Some(self);
        }
        None
    }

    fn get_mut(&mut self, remote_id: u64) -> Option<&mut RemoteEntityConfig> {
        if remote_id == self.entity_id.value() {
            return Some(self);
        }
        None
    }

    fn add_config(&mut self, _cfg: &RemoteEntityConfig) -> bool {
        false
    }

    fn remove_config(&mut self, _remote_id: u64) -> bool {
        false
    }
}

/// Information passed to the [UserFaultHook] callbacks.
#[derive(Debug, Copy, Clone, PartialEq, Eq, derive_new::new)]
pub struct FaultInfo {
    transaction_id: TransactionId,
    condition_code: ConditionCode,
    progress: u64,
}

impl FaultInfo {
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    pub fn condition_code(&self) -> ConditionCode {
        self.condition_code
    }

    pub fn progress(&self) -> u64 {
        self.progress
    }
}

/// Callbacks which are called when a particular CFDP fault handler is invoked.
///
/// It is passed into the CFDP handlers as part of the [LocalEntityConfig] and allows custom user
/// fault handling, for example fault logging. For each fault reported to the [FaultHandler], the
/// callback matching the [FaultHandlerCode] is called.
pub trait UserFaultHook {
    fn notice_of_suspension_cb(&mut self, fault_info: FaultInfo);

    fn notice_of_cancellation_cb(&mut self, fault_info: FaultInfo);

    fn abandoned_cb(&mut self, fault_info: FaultInfo);

    fn ignore_cb(&mut self, fault_info: FaultInfo);
}

/// A fault hook shared between all transactions of an entity.
impl<Hook: UserFaultHook> UserFaultHook for Arc<Mutex<Hook>> {
    fn notice_of_suspension_cb(&mut self, fault_info: FaultInfo) {
        lock_ignore_poison(self).notice_of_suspension_cb(fault_info)
    }

    fn notice_of_cancellation_cb(&mut self, fault_info: FaultInfo) {
        lock_ignore_poison(self).notice_of_cancellation_cb(fault_info)
    }

    fn abandoned_cb(&mut self, fault_info: FaultInfo) {
        lock_ignore_poison(self).abandoned_cb(fault_info)
    }

    fn ignore_cb(&mut self, fault_info: FaultInfo) {
        lock_ignore_poison(self).ignore_cb(fault_info)
    }
}

pub(crate) fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Dummy fault hook which implements [UserFaultHook] but only provides empty implementations.
#[derive(Default, Debug, PartialEq, Eq, Copy, Clone)]
pub struct DummyFaultHook {}

impl UserFaultHook for DummyFaultHook {
    fn notice_of_suspension_cb(&mut self, _fault_info: FaultInfo) {}

    fn notice_of_cancellation_cb(&mut self, _fault_info: FaultInfo) {}

    fn abandoned_cb(&mut self, _fault_info: FaultInfo) {}

    fn ignore_cb(&mut self, _fault_info: FaultInfo) {}
}

/// Fault handling as specified in chapter 4.8 of the CFDP standard.
///
/// Each applicable [ConditionCode] is mapped to one of the four [FaultHandlerCode]s. The code
/// selects the error handling inside the CFDP handler and the [UserFaultHook] callback which is
/// dispatched.
///
/// Notes on the default settings:
///
/// - Checksum failures are ignored by default. For unacknowledged transfers, cancelling the
///   transfer immediately would interfere with the check limit mechanism specified in chapter
///   4.6.3.3.
/// - Unsupported checksum types are ignored as well. The file transfer might still have worked
///   properly.
///
/// All other faults cancel the transaction by default. The defaults can be changed with
/// [Self::set_fault_handler]. The sending entity can also override the mapping for a single
/// transaction with fault handler override TLVs.
#[derive(Debug, Clone)]
pub struct FaultHandler<UserHook: UserFaultHook> {
    handler_array: [FaultHandlerCode; 10],
    pub user_hook: RefCell<UserHook>,
}

impl<UserHook: UserFaultHook> FaultHandler<UserHook> {
    fn condition_code_to_array_index(condition_code: ConditionCode) -> Option<usize> {
        Some(match condition_code {
            ConditionCode::PositiveAckLimitReached => 0,
            ConditionCode::KeepAliveLimitReached => 1,
            ConditionCode::InvalidTransmissionMode => 2,
            ConditionCode::FilestoreRejection => 3,
            ConditionCode::FileChecksumFailure => 4,
            ConditionCode::FileSizeError => 5,
            ConditionCode::NakLimitReached => 6,
            ConditionCode::InactivityDetected => 7,
            ConditionCode::CheckLimitReached => 8,
            ConditionCode::UnsupportedChecksumType => 9,
            _ => return None,
        })
    }

    pub fn new(user_fault_hook: UserHook) -> Self {
        let mut handler_array = [FaultHandlerCode::NoticeOfCancellation; 10];
        handler_array[4] = FaultHandlerCode::IgnoreError;
        handler_array[9] = FaultHandlerCode::IgnoreError;
        Self {
            handler_array,
            user_hook: RefCell::new(user_fault_hook),
        }
    }

    /// Condition codes which can not be mapped, for example [ConditionCode::NoError], are
    /// ignored.
    pub fn set_fault_handler(
        &mut self,
        condition_code: ConditionCode,
        fault_handler: FaultHandlerCode,
    ) {
        if let Some(idx) = Self::condition_code_to_array_index(condition_code) {
            self.handler_array[idx] = fault_handler;
        }
    }

    pub fn get_fault_handler(&self, condition_code: ConditionCode) -> FaultHandlerCode {
        match Self::condition_code_to_array_index(condition_code) {
            Some(idx) => self.handler_array[idx],
            None => FaultHandlerCode::IgnoreError,
        }
    }

    /// Looks up the fault handler, giving transaction specific overrides precedence.
    pub fn get_fault_handler_with_overrides(
        &self,
        condition_code: ConditionCode,
        overrides: &[FaultHandlerOverrideTlv],
    ) -> FaultHandlerCode {
        overrides
            .iter()
            .rev()
            .find(|fh_override| fh_override.condition_code() == condition_code)
            .map(|fh_override| fh_override.handler_code())
            .unwrap_or_else(|| self.get_fault_handler(condition_code))
    }

    /// Dispatches the fault to the user hook callback which matches the passed handler code.
    pub fn report_fault(&self, fh_code: FaultHandlerCode, fault_info: FaultInfo) {
        let mut handler_mut = self.user_hook.borrow_mut();
        match fh_code {
            FaultHandlerCode::NoticeOfCancellation => {
                handler_mut.notice_of_cancellation_cb(fault_info);
            }
            FaultHandlerCode::NoticeOfSuspension => {
                handler_mut.notice_of_suspension_cb(fault_info);
            }
            FaultHandlerCode::IgnoreError => {
                handler_mut.ignore_cb(fault_info);
            }
            FaultHandlerCode::AbandonTransaction => {
                handler_mut.abandoned_cb(fault_info);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IndicationConfig {
    pub eof_sent: bool,
    pub eof_recv: bool,
    pub file_segment_recv: bool,
    pub transaction_finished: bool,
    pub suspended: bool,
    pub resumed: bool,
}

impl Default for IndicationConfig {
    fn default() -> Self {
        Self {
            eof_sent: true,
            eof_recv: true,
            file_segment_recv: true,
            transaction_finished: true,
            suspended: true,
            resumed: true,
        }
    }
}

/// Determines which fault is declared when an EOF PDU reveals both a file size and a checksum
/// problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EofFaultPrecedence {
    #[default]
    FileSizeFirst,
    ChecksumFirst,
}

/// Each CFDP entity handler has a [LocalEntityConfig]uration.
#[derive(Debug, Clone)]
pub struct LocalEntityConfig<UserHook: UserFaultHook> {
    pub id: UnsignedByteField,
    pub indication_cfg: IndicationConfig,
    pub fault_handler: FaultHandler<UserHook>,
    pub eof_fault_precedence: EofFaultPrecedence,
}

impl<UserHook: UserFaultHook> LocalEntityConfig<UserHook> {
    pub fn new(id: UnsignedByteField, indication_cfg: IndicationConfig, hook: UserHook) -> Self {
        Self {
            id,
            indication_cfg,
            fault_handler: FaultHandler::new(hook),
            eof_fault_precedence: EofFaultPrecedence::default(),
        }
    }

    pub fn user_fault_hook_mut(&mut self) -> &mut RefCell<UserHook> {
        &mut self.fault_handler.user_hook
    }

    pub fn user_fault_hook(&self) -> &RefCell<UserHook> {
        &self.fault_handler.user_hook
    }
}

/// Generic error type for sending a PDU via a message queue.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum GenericSendError {
    #[error("RX disconnected")]
    RxDisconnected,
    #[error("queue is full, fill count {0:?}")]
    QueueFull(Option<u32>),
    #[error("other send error")]
    Other,
}

pub trait PduSender {
    fn send_pdu(
        &self,
        pdu_type: PduType,
        file_directive_type: Option<FileDirectiveType>,
        raw_pdu: &[u8],
    ) -> Result<(), GenericSendError>;
}

impl PduSender for mpsc::Sender<PduOwnedWithInfo> {
    fn send_pdu(
        &self,
        pdu_type: PduType,
        file_directive_type: Option<FileDirectiveType>,
        raw_pdu: &[u8],
    ) -> Result<(), GenericSendError> {
        self.send(PduOwnedWithInfo::new(
            pdu_type,
            file_directive_type,
            raw_pdu.to_vec(),
        ))
        .map_err(|_| GenericSendError::RxDisconnected)?;
        Ok(())
    }
}

impl PduSender for mpsc::SyncSender<PduOwnedWithInfo> {
    fn send_pdu(
        &self,
        pdu_type: PduType,
        file_directive_type: Option<FileDirectiveType>,
        raw_pdu: &[u8],
    ) -> Result<(), GenericSendError> {
        self.try_send(PduOwnedWithInfo::new(
            pdu_type,
            file_directive_type,
            raw_pdu.to_vec(),
        ))
        .map_err(|e| match e {
            mpsc::TrySendError::Full(_) => GenericSendError::QueueFull(None),
            mpsc::TrySendError::Disconnected(_) => GenericSendError::RxDisconnected,
        })
    }
}

impl<Sender: PduSender> PduSender for Arc<Sender> {
    fn send_pdu(
        &self,
        pdu_type: PduType,
        file_directive_type: Option<FileDirectiveType>,
        raw_pdu: &[u8],
    ) -> Result<(), GenericSendError> {
        self.as_ref()
            .send_pdu(pdu_type, file_directive_type, raw_pdu)
    }
}

/// Timer creator for standard runtimes. All timers use the interval from the context, only the
/// check limit timer uses the configured [Self::check_limit_timeout].
#[derive(Debug, Copy, Clone)]
pub struct StdTimerCreator {
    pub check_limit_timeout: Duration,
}

impl StdTimerCreator {
    pub const fn new(check_limit_timeout: Duration) -> Self {
        Self {
            check_limit_timeout,
        }
    }
}

impl Default for StdTimerCreator {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl TimerCreator for StdTimerCreator {
    type Countdown = StdCountdown;

    fn create_countdown(&self, timer_context: TimerContext) -> Self::Countdown {
        match timer_context {
            TimerContext::CheckLimit { .. } => StdCountdown::new(self.check_limit_timeout),
            TimerContext::NakActivity { expiry_time }
            | TimerContext::PositiveAck { expiry_time }
            | TimerContext::KeepAlive { expiry_time }
            | TimerContext::Inactivity { expiry_time } => StdCountdown::new(expiry_time),
        }
    }
}

/// The CFDP transaction ID of a CFDP transaction consists of the source entity ID and the sequence
/// number of that transfer which is also determined by the CFDP source entity.
///
/// Equality and hashing only consider the numerical values, so IDs read from PDUs with
/// different field widths still match.
#[derive(Debug, Eq, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TransactionId {
    source_id: UnsignedByteField,
    seq_num: UnsignedByteField,
}

impl TransactionId {
    pub fn new(source_id: UnsignedByteField, seq_num: UnsignedByteField) -> Self {
        Self { source_id, seq_num }
    }

    pub fn source_id(&self) -> &UnsignedByteField {
        &self.source_id
    }

    pub fn seq_num(&self) -> &UnsignedByteField {
        &self.seq_num
    }
}

impl Hash for TransactionId {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.source_id.value().hash(state);
        self.seq_num.value().hash(state);
    }
}

impl PartialEq for TransactionId {
    fn eq(&self, other: &Self) -> bool {
        self.source_id.value() == other.source_id.value()
            && self.seq_num.value() == other.seq_num.value()
    }
}

impl core::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({}, {})", self.source_id.value(), self.seq_num.value())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum State {
    Idle = 0,
    Busy = 1,
    Suspended = 2,
}

/// Final result of a transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TransactionOutcome {
    Completed,
    Cancelled(ConditionCode),
    Abandoned(ConditionCode),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct PositiveAckParams {
    pub(crate) ack_counter: u32,
    pub(crate) positive_ack_of_cancellation: bool,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PacketTarget {
    SourceEntity,
    DestEntity,
}

/// Generic trait which models a raw CFDP packet data unit (PDU) block with some additional context
/// information.
pub trait PduProvider {
    fn pdu_type(&self) -> PduType;
    fn file_directive_type(&self) -> Option<FileDirectiveType>;
    fn raw_pdu(&self) -> &[u8];
    fn packet_target(&self) -> Result<PacketTarget, PduError>;
}

pub struct DummyPduProvider(());

impl PduProvider for DummyPduProvider {
    fn pdu_type(&self) -> PduType {
        PduType::FileData
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        None
    }

    fn raw_pdu(&self) -> &[u8] {
        &[]
    }

    fn packet_target(&self) -> Result<PacketTarget, PduError> {
        Ok(PacketTarget::SourceEntity)
    }
}

fn directive_code_at(raw_pdu: &[u8], idx: usize) -> Result<u8, PduError> {
    raw_pdu.get(idx).copied().ok_or(PduError::ByteConversion(
        ByteConversionError::FromSliceTooSmall {
            found: raw_pdu.len(),
            expected: idx + 1,
        },
    ))
}

/// Determines whether a PDU is handled by the sending or the receiving side of a transaction,
/// as specified in section 4.5.3 of the CFDP standard.
pub fn determine_packet_target(raw_pdu: &[u8]) -> Result<PacketTarget, PduError> {
    let (header, header_len) = PduHeader::from_bytes(raw_pdu)?;
    if header.pdu_type() == PduType::FileData {
        return Ok(PacketTarget::DestEntity);
    }
    let directive_code = directive_code_at(raw_pdu, header_len)?;
    let file_directive_type =
        FileDirectiveType::try_from(directive_code).map_err(|_| PduError::InvalidDirectiveType {
            found: directive_code,
            expected: None,
        })?;
    let packet_target = match file_directive_type {
        // Section c) of 4.5.3: These PDUs are always targeted towards the file sender.
        FileDirectiveType::NakPdu
        | FileDirectiveType::FinishedPdu
        | FileDirectiveType::KeepAlivePdu => PacketTarget::SourceEntity,
        // Section b) of 4.5.3: These PDUs are always targeted towards the file receiver.
        FileDirectiveType::MetadataPdu
        | FileDirectiveType::EofPdu
        | FileDirectiveType::PromptPdu => PacketTarget::DestEntity,
        // Section a): The recipient depends on the acknowledged PDU. ACKs of EOF PDUs go to the
        // sender, ACKs of Finished PDUs go to the receiver.
        FileDirectiveType::AckPdu => {
            let acked_code = directive_code_at(raw_pdu, header_len + 1)? >> 4;
            match FileDirectiveType::try_from(acked_code) {
                Ok(FileDirectiveType::EofPdu) => PacketTarget::SourceEntity,
                Ok(FileDirectiveType::FinishedPdu) => PacketTarget::DestEntity,
                _ => {
                    return Err(PduError::InvalidDirectiveType {
                        found: acked_code,
                        expected: Some(FileDirectiveType::EofPdu),
                    });
                }
            }
        }
    };
    Ok(packet_target)
}

/// Helper struct which contains base information about a raw PDU, which is also the
/// information needed for routing. The wrapped slice is truncated to the PDU length declared in
/// the header, so trailing padding of a transport frame is cut off.
#[derive(Debug)]
pub struct PduRawWithInfo<'raw_packet> {
    pdu_type: PduType,
    file_directive_type: Option<FileDirectiveType>,
    raw_packet: &'raw_packet [u8],
}

impl<'raw> PduRawWithInfo<'raw> {
    pub fn new(raw_packet: &'raw [u8]) -> Result<Self, PduError> {
        let (pdu_header, header_len) = PduHeader::from_bytes(raw_packet)?;
        let packet_len = pdu_header.pdu_len();
        if raw_packet.len() < packet_len {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: raw_packet.len(),
                expected: packet_len,
            }
            .into());
        }
        let raw_packet = &raw_packet[0..packet_len];
        if pdu_header.pdu_type() == PduType::FileData {
            return Ok(Self {
                pdu_type: pdu_header.pdu_type(),
                file_directive_type: None,
                raw_packet,
            });
        }
        if pdu_header.pdu_datafield_len() < 1 {
            return Err(PduError::Format("file directive PDU without directive code"));
        }
        let directive_code = directive_code_at(raw_packet, header_len)?;
        let directive = FileDirectiveType::try_from(directive_code).map_err(|_| {
            PduError::InvalidDirectiveType {
                found: directive_code,
                expected: None,
            }
        })?;
        Ok(Self {
            pdu_type: pdu_header.pdu_type(),
            file_directive_type: Some(directive),
            raw_packet,
        })
    }

    pub fn raw_packet(&self) -> &[u8] {
        self.raw_packet
    }
}

impl PduProvider for PduRawWithInfo<'_> {
    fn pdu_type(&self) -> PduType {
        self.pdu_type
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        self.file_directive_type
    }

    fn raw_pdu(&self) -> &[u8] {
        self.raw_packet
    }

    fn packet_target(&self) -> Result<PacketTarget, PduError> {
        determine_packet_target(self.raw_packet)
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PduOwnedWithInfo {
    pub pdu_type: PduType,
    pub file_directive_type: Option<FileDirectiveType>,
    pub pdu: Vec<u8>,
}

impl PduOwnedWithInfo {
    pub fn new_from_raw_packet(raw_packet: &[u8]) -> Result<Self, PduError> {
        Ok(PduRawWithInfo::new(raw_packet)?.into())
    }

    pub fn new(
        pdu_type: PduType,
        file_directive_type: Option<FileDirectiveType>,
        pdu: Vec<u8>,
    ) -> Self {
        Self {
            pdu_type,
            file_directive_type,
            pdu,
        }
    }
}

impl From<PduRawWithInfo<'_>> for PduOwnedWithInfo {
    fn from(value: PduRawWithInfo) -> Self {
        Self::new(
            value.pdu_type(),
            value.file_directive_type(),
            value.raw_packet().to_vec(),
        )
    }
}

impl PduProvider for PduOwnedWithInfo {
    fn pdu_type(&self) -> PduType {
        self.pdu_type
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        self.file_directive_type
    }

    fn raw_pdu(&self) -> &[u8] {
        &self.pdu
    }

    fn packet_target(&self) -> Result<PacketTarget, PduError> {
        determine_packet_target(&self.pdu)
    }
}
