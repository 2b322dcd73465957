//! # CFDP Entity Manager Module
//!
//! The [EntityManager] owns all transactions of one local CFDP entity. Each transaction is
//! driven by its own [SourceHandler] or [DestinationHandler], which is created on demand:
//!
//! - Sending transactions are created with [EntityManager::put_request] or
//!   [EntityManager::put_file]. Sequence numbers are allocated from one shared
//!   [SequenceCounter], so they increase monotonically across all transactions.
//! - Receiving transactions are created when the first Metadata, File Data or EOF PDU of an
//!   unknown transaction arrives through [EntityManager::insert_pdu].
//!
//! Inbound PDUs are routed by the transaction ID (source entity ID and sequence number) and by
//! the role which handles the PDU. A local entity can therefore be the sender and the receiver
//! of the same transaction ID at the same time, for example in loopback setups.
//!
//! The transaction table is protected by a mutex which is only held for lookups, insertions and
//! removals. Every transaction has its own mutex which serializes inbound PDUs, timer
//! evaluation and local requests for that transaction. Filestore accesses therefore never
//! block unrelated transactions.
//!
//! Finished transactions are kept for a configurable grace period, so re-transmitted terminal
//! PDUs are absorbed by the finished handler instead of starting a new transaction.
use core::time::Duration;
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError},
    time::Instant,
};

use hashbrown::HashMap;

use crate::{
    dest::{DestError, DestinationHandler, DEFAULT_MAX_BUFFERED_FILE_DATA},
    filestore::{FilestoreError, VirtualFilestore},
    lost_segments::LostSegmentsList,
    pdu::{FileDirectiveType, PduError, PduHeader, PduType, TransmissionMode},
    request::{FilePathTooLarge, PutRequest, ReadablePutRequest},
    seq_count::SequenceCounter,
    source::{PutRequestError, SourceError, SourceHandler},
    time::Countdown,
    user::CfdpUser,
    util::UnsignedByteField,
    DummyPduProvider, EntityType, GenericSendError, LocalEntityConfig, PacketTarget,
    PduProvider, PduSender, RemoteConfigStore, State, TimerCreator, TransactionId,
    TransactionOutcome, UserFaultHook,
};

/// Configuration of the [EntityManager].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntityConfig {
    /// Upper bound for transactions which are not finished yet.
    pub max_concurrent_transactions: usize,
    /// Finished transactions are removed after this period.
    pub gc_grace_period: Duration,
    /// Size of the PDU and checksum buffer of each handler.
    pub pdu_buffer_size: usize,
    /// File data which a receiver keeps in memory while the Metadata PDU is missing.
    pub max_buffered_file_data: usize,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transactions: 16,
            gc_grace_period: Duration::from_secs(30),
            pdu_buffer_size: 2048,
            max_buffered_file_data: DEFAULT_MAX_BUFFERED_FILE_DATA,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceFault {
    #[error("limit of {0} concurrent transactions reached")]
    TransactionLimitReached(usize),
    #[error("filestore error: {0}")]
    Filestore(#[from] FilestoreError),
    #[error("sending PDU failed: {0}")]
    Send(#[from] GenericSendError),
}

/// Error categories of the [EntityError].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The inbound PDU was dropped, the transaction state is unchanged.
    MalformedPdu,
    /// A local resource is exhausted or failed.
    ResourceFault,
    /// The request or PDU does not fit the state of the transaction.
    ProtocolFault,
}

#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    #[error("malformed PDU: {0}")]
    MalformedPdu(#[from] PduError),
    #[error("resource fault: {0}")]
    Resource(#[from] ResourceFault),
    #[error("invalid put request: {0}")]
    PutRequest(#[from] PutRequestError),
    #[error("invalid put request: {0}")]
    FilePath(#[from] FilePathTooLarge),
    #[error("source handler: {0}")]
    Source(#[from] SourceError),
    #[error("destination handler: {0}")]
    Dest(#[from] DestError),
}

impl EntityError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EntityError::MalformedPdu(_)
            | EntityError::Source(SourceError::Pdu(_))
            | EntityError::Dest(DestError::Pdu(_))
            | EntityError::Dest(DestError::TlvLv(_)) => ErrorCategory::MalformedPdu,
            EntityError::Resource(_)
            | EntityError::PutRequest(PutRequestError::FilestoreError(_))
            | EntityError::Source(SourceError::FilestoreError(_))
            | EntityError::Source(SourceError::SendError(_))
            | EntityError::Dest(DestError::FilestoreError(_))
            | EntityError::Dest(DestError::SendError(_))
            | EntityError::Dest(DestError::LostSegment(_)) => ErrorCategory::ResourceFault,
            _ => ErrorCategory::ProtocolFault,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct TransactionKey {
    id: TransactionId,
    role: EntityType,
}

type EntityDestHandler<Sender, Hook, Vfs, Remote, Timers, Timer> =
    DestinationHandler<Sender, Hook, Vfs, Remote, Timers, Timer, LostSegmentsList>;

enum TransactionHandler<
    Sender: PduSender,
    Hook: UserFaultHook,
    Vfs: VirtualFilestore,
    Remote: RemoteConfigStore,
    Timers: TimerCreator<Countdown = Timer>,
    Timer: Countdown,
    SeqCounter: SequenceCounter,
> {
    Sending(SourceHandler<Sender, Hook, Vfs, Remote, Timers, Timer, SeqCounter>),
    Receiving(EntityDestHandler<Sender, Hook, Vfs, Remote, Timers, Timer>),
}

struct TransactionSlot<
    Sender: PduSender,
    Hook: UserFaultHook,
    Vfs: VirtualFilestore,
    Remote: RemoteConfigStore,
    Timers: TimerCreator<Countdown = Timer>,
    Timer: Countdown,
    SeqCounter: SequenceCounter,
> {
    handler: TransactionHandler<Sender, Hook, Vfs, Remote, Timers, Timer, SeqCounter>,
    finished_at: Option<Instant>,
}

impl<
        Sender: PduSender,
        Hook: UserFaultHook,
        Vfs: VirtualFilestore,
        Remote: RemoteConfigStore,
        Timers: TimerCreator<Countdown = Timer>,
        Timer: Countdown,
        SeqCounter: SequenceCounter,
    > TransactionSlot<Sender, Hook, Vfs, Remote, Timers, Timer, SeqCounter>
{
    fn new(handler: TransactionHandler<Sender, Hook, Vfs, Remote, Timers, Timer, SeqCounter>) -> Self {
        Self {
            handler,
            finished_at: None,
        }
    }

    fn state_machine(
        &mut self,
        user: &mut impl CfdpUser,
        pdu: Option<&impl PduProvider>,
    ) -> Result<u32, EntityError> {
        let result = match &mut self.handler {
            TransactionHandler::Sending(handler) => handler.state_machine(user, pdu)?,
            TransactionHandler::Receiving(handler) => handler.state_machine(user, pdu)?,
        };
        self.update_finished();
        Ok(result)
    }

    fn state(&self) -> State {
        match &self.handler {
            TransactionHandler::Sending(handler) => handler.state(),
            TransactionHandler::Receiving(handler) => handler.state(),
        }
    }

    fn outcome(&self) -> Option<TransactionOutcome> {
        match &self.handler {
            TransactionHandler::Sending(handler) => handler.outcome(),
            TransactionHandler::Receiving(handler) => handler.outcome(),
        }
    }

    fn has_transaction(&self) -> bool {
        match &self.handler {
            TransactionHandler::Sending(handler) => handler.transaction_id().is_some(),
            TransactionHandler::Receiving(handler) => handler.transaction_id().is_some(),
        }
    }

    fn update_finished(&mut self) {
        if self.finished_at.is_none() && self.state() == State::Idle && self.outcome().is_some() {
            self.finished_at = Some(Instant::now());
        }
    }

    fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

type SharedSlot<Sender, Hook, Vfs, Remote, Timers, Timer, SeqCounter> =
    Arc<Mutex<TransactionSlot<Sender, Hook, Vfs, Remote, Timers, Timer, SeqCounter>>>;

/// Collaborators which are cloned into every new handler.
struct HandlerPrototype<Sender, Hook: UserFaultHook, Vfs, Remote, Timers, SeqCounter> {
    local_cfg: LocalEntityConfig<Hook>,
    pdu_sender: Sender,
    vfs: Vfs,
    remote_cfg_table: Remote,
    timer_creator: Timers,
    seq_counter: SeqCounter,
}

/// Owns and drives all transactions of a local CFDP entity.
///
/// All collaborators are cloned into the handler of each transaction. The [SequenceCounter]
/// clones must share their state, which is the case for an [Arc] around one of the atomic
/// counters of the [crate::seq_count] module. The same applies to user fault hooks which
/// collect fault reports.
///
/// All methods take `&self`, so the manager can be shared between threads. The [CfdpUser]
/// passed into a call receives the indications of the transactions processed by that call.
pub struct EntityManager<
    Sender: PduSender + Clone,
    Hook: UserFaultHook + Clone,
    Vfs: VirtualFilestore + Clone,
    Remote: RemoteConfigStore + Clone,
    Timers: TimerCreator<Countdown = Timer> + Clone,
    Timer: Countdown,
    SeqCounter: SequenceCounter + Clone,
> {
    local_id: UnsignedByteField,
    cfg: EntityConfig,
    prototype: Mutex<HandlerPrototype<Sender, Hook, Vfs, Remote, Timers, SeqCounter>>,
    transactions: Mutex<
        HashMap<TransactionKey, SharedSlot<Sender, Hook, Vfs, Remote, Timers, Timer, SeqCounter>>,
    >,
}

impl<
        Sender: PduSender + Clone,
        Hook: UserFaultHook + Clone,
        Vfs: VirtualFilestore + Clone,
        Remote: RemoteConfigStore + Clone,
        Timers: TimerCreator<Countdown = Timer> + Clone,
        Timer: Countdown,
        SeqCounter: SequenceCounter + Clone,
    > EntityManager<Sender, Hook, Vfs, Remote, Timers, Timer, SeqCounter>
{
    /// Creates a new entity manager.
    ///
    /// # Arguments
    ///
    /// * `local_cfg` - Configuration of the local entity, used by all handlers.
    /// * `cfg` - Limits and buffer sizes of the manager.
    /// * `pdu_sender` - [PduSender] used by all handlers to send PDUs.
    /// * `vfs` - [VirtualFilestore] used for all file accesses.
    /// * `remote_cfg_table` - Configurations of all known remote entities.
    /// * `timer_creator` - [TimerCreator] for all protocol timers.
    /// * `seq_counter` - Shared [SequenceCounter] for new sending transactions.
    pub fn new(
        local_cfg: LocalEntityConfig<Hook>,
        cfg: EntityConfig,
        pdu_sender: Sender,
        vfs: Vfs,
        remote_cfg_table: Remote,
        timer_creator: Timers,
        seq_counter: SeqCounter,
    ) -> Self {
        Self {
            local_id: local_cfg.id,
            cfg,
            prototype: Mutex::new(HandlerPrototype {
                local_cfg,
                pdu_sender,
                vfs,
                remote_cfg_table,
                timer_creator,
                seq_counter,
            }),
            transactions: Mutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn local_id(&self) -> UnsignedByteField {
        self.local_id
    }

    #[inline]
    pub fn config(&self) -> &EntityConfig {
        &self.cfg
    }

    /// Number of transactions which are not finished yet.
    pub fn active_transactions(&self) -> usize {
        Self::count_active(&lock(&self.transactions))
    }

    /// Number of tracked transactions, including finished transactions within their grace
    /// period.
    pub fn tracked_transactions(&self) -> usize {
        lock(&self.transactions).len()
    }

    /// Starts a new sending transaction and performs its first state machine step.
    pub fn put_request(
        &self,
        user: &mut impl CfdpUser,
        put_request: &impl ReadablePutRequest,
    ) -> Result<TransactionId, EntityError> {
        if self.active_transactions() >= self.cfg.max_concurrent_transactions {
            return Err(self.limit_reached());
        }
        let mut handler = self.new_source_handler();
        let id = handler.put_request(put_request)?;
        let slot = Arc::new(Mutex::new(TransactionSlot::new(
            TransactionHandler::Sending(handler),
        )));
        {
            let mut table = lock(&self.transactions);
            if Self::count_active(&table) >= self.cfg.max_concurrent_transactions {
                return Err(self.limit_reached());
            }
            table.insert(
                TransactionKey {
                    id,
                    role: EntityType::Sending,
                },
                slot.clone(),
            );
        }
        log::info!("put request accepted as transaction {}", id);
        lock(&slot).state_machine(user, None::<&DummyPduProvider>)?;
        Ok(id)
    }

    /// Convenience wrapper around [Self::put_request] for a regular file copy.
    pub fn put_file(
        &self,
        user: &mut impl CfdpUser,
        dest_id: UnsignedByteField,
        source_file: &str,
        dest_file: &str,
        transmission_mode: TransmissionMode,
        closure_requested: bool,
    ) -> Result<TransactionId, EntityError> {
        let put_request = PutRequest::new_regular_request(
            dest_id,
            source_file,
            dest_file,
            Some(transmission_mode),
            Some(closure_requested),
        )?;
        self.put_request(user, &put_request)
    }

    /// Routes an inbound PDU to its transaction. Returns the number of PDUs sent in response.
    ///
    /// A new receiving transaction is created for the first Metadata, File Data or EOF PDU
    /// of an unknown transaction. All other PDUs for unknown transactions are dropped.
    pub fn insert_pdu(
        &self,
        user: &mut impl CfdpUser,
        pdu: &impl PduProvider,
    ) -> Result<u32, EntityError> {
        let target = pdu.packet_target()?;
        let (pdu_header, _) = PduHeader::from_bytes(pdu.raw_pdu())?;
        let pdu_conf = pdu_header.common_pdu_conf();
        let id = TransactionId::new(pdu_conf.source_id(), pdu_conf.transaction_seq_num);
        let (role, addressed_entity) = match target {
            PacketTarget::SourceEntity => (EntityType::Sending, pdu_conf.source_id()),
            PacketTarget::DestEntity => (EntityType::Receiving, pdu_conf.dest_id()),
        };
        if addressed_entity.value() != self.local_id.value() {
            log::warn!(
                "dropping PDU of transaction {} addressed to entity {}",
                id,
                addressed_entity.value()
            );
            return Ok(0);
        }
        let key = TransactionKey { id, role };
        let mut table = lock(&self.transactions);
        if let Some(slot) = table.get(&key).cloned() {
            drop(table);
            return lock(&slot).state_machine(user, Some(pdu));
        }
        let starts_transaction = pdu.pdu_type() == PduType::FileData
            || matches!(
                pdu.file_directive_type(),
                Some(FileDirectiveType::MetadataPdu | FileDirectiveType::EofPdu)
            );
        if role == EntityType::Sending || !starts_transaction {
            log::debug!(
                "dropping {:?} PDU for unknown transaction {}",
                pdu.file_directive_type(),
                id
            );
            return Ok(0);
        }
        if Self::count_active(&table) >= self.cfg.max_concurrent_transactions {
            return Err(self.limit_reached());
        }
        let slot = Arc::new(Mutex::new(TransactionSlot::new(
            TransactionHandler::Receiving(self.new_dest_handler()),
        )));
        table.insert(key, slot.clone());
        let mut slot_guard = lock(&slot);
        drop(table);
        let result = slot_guard.state_machine(user, Some(pdu));
        if !slot_guard.has_transaction() && slot_guard.outcome().is_none() {
            drop(slot_guard);
            lock(&self.transactions).remove(&key);
        }
        result
    }

    /// Drives the timers and pending work of all transactions and removes finished
    /// transactions whose grace period elapsed. This should be called periodically.
    ///
    /// All transactions are processed even if one of them fails. The first error is returned.
    pub fn poll(&self, user: &mut impl CfdpUser) -> Result<u32, EntityError> {
        let slots: Vec<_> = lock(&self.transactions)
            .iter()
            .map(|(key, slot)| (*key, slot.clone()))
            .collect();
        let mut sent_packets = 0;
        let mut first_error = None;
        let mut expired = Vec::new();
        for (key, slot) in slots {
            let mut slot_guard = lock(&slot);
            if !slot_guard.is_finished() {
                match slot_guard.state_machine(user, None::<&DummyPduProvider>) {
                    Ok(sent) => sent_packets += sent,
                    Err(e) => {
                        log::warn!("transaction {}: {}", key.id, e);
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                }
            }
            if slot_guard
                .finished_at
                .is_some_and(|finished_at| finished_at.elapsed() >= self.cfg.gc_grace_period)
            {
                expired.push(key);
            }
        }
        if !expired.is_empty() {
            let mut table = lock(&self.transactions);
            for key in expired {
                log::debug!("removing finished transaction {} ({:?})", key.id, key.role);
                table.remove(&key);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(sent_packets),
        }
    }

    /// Models the Cancel.request primitive. Cancelling a transaction which is already being
    /// cancelled succeeds as well.
    pub fn cancel(
        &self,
        user: &mut impl CfdpUser,
        transaction_id: &TransactionId,
    ) -> Result<bool, EntityError> {
        let Some(slot) = self.find_slot(transaction_id) else {
            return Ok(false);
        };
        let mut slot_guard = lock(&slot);
        let cancelled = match &mut slot_guard.handler {
            TransactionHandler::Sending(handler) => handler.cancel_request(user, transaction_id)?,
            TransactionHandler::Receiving(handler) => {
                handler.cancel_request(user, transaction_id)?
            }
        };
        slot_guard.update_finished();
        Ok(cancelled)
    }

    pub fn suspend(&self, user: &mut impl CfdpUser, transaction_id: &TransactionId) -> bool {
        self.find_slot(transaction_id)
            .is_some_and(|slot| match &mut lock(&slot).handler {
                TransactionHandler::Sending(handler) => {
                    handler.suspend_request(user, transaction_id)
                }
                TransactionHandler::Receiving(handler) => {
                    handler.suspend_request(user, transaction_id)
                }
            })
    }

    pub fn resume(&self, user: &mut impl CfdpUser, transaction_id: &TransactionId) -> bool {
        self.find_slot(transaction_id)
            .is_some_and(|slot| match &mut lock(&slot).handler {
                TransactionHandler::Sending(handler) => {
                    handler.resume_request(user, transaction_id)
                }
                TransactionHandler::Receiving(handler) => {
                    handler.resume_request(user, transaction_id)
                }
            })
    }

    pub fn report(&self, user: &mut impl CfdpUser, transaction_id: &TransactionId) -> bool {
        self.find_slot(transaction_id)
            .is_some_and(|slot| match &lock(&slot).handler {
                TransactionHandler::Sending(handler) => {
                    handler.report_request(user, transaction_id)
                }
                TransactionHandler::Receiving(handler) => {
                    handler.report_request(user, transaction_id)
                }
            })
    }

    /// State of a tracked transaction.
    pub fn state(&self, transaction_id: &TransactionId) -> Option<State> {
        self.find_slot(transaction_id)
            .map(|slot| lock(&slot).state())
    }

    /// Outcome of a finished transaction. It is available until the transaction is removed.
    pub fn outcome(&self, transaction_id: &TransactionId) -> Option<TransactionOutcome> {
        self.find_slot(transaction_id)
            .and_then(|slot| lock(&slot).outcome())
    }

    fn find_slot(
        &self,
        transaction_id: &TransactionId,
    ) -> Option<SharedSlot<Sender, Hook, Vfs, Remote, Timers, Timer, SeqCounter>> {
        let table = lock(&self.transactions);
        [EntityType::Sending, EntityType::Receiving]
            .into_iter()
            .find_map(|role| {
                table
                    .get(&TransactionKey {
                        id: *transaction_id,
                        role,
                    })
                    .cloned()
            })
    }

    fn count_active(
        table: &HashMap<
            TransactionKey,
            SharedSlot<Sender, Hook, Vfs, Remote, Timers, Timer, SeqCounter>,
        >,
    ) -> usize {
        // Slots which are locked right now are processing a PDU and count as active.
        table
            .values()
            .filter(|slot| match slot.try_lock() {
                Ok(slot) => !slot.is_finished(),
                Err(TryLockError::Poisoned(poisoned)) => !poisoned.into_inner().is_finished(),
                Err(TryLockError::WouldBlock) => true,
            })
            .count()
    }

    fn limit_reached(&self) -> EntityError {
        log::warn!(
            "rejecting transaction, limit of {} concurrent transactions reached",
            self.cfg.max_concurrent_transactions
        );
        ResourceFault::TransactionLimitReached(self.cfg.max_concurrent_transactions).into()
    }

    fn new_source_handler(&self) -> SourceHandler<Sender, Hook, Vfs, Remote, Timers, Timer, SeqCounter> {
        let prototype = lock(&self.prototype);
        SourceHandler::new(
            prototype.local_cfg.clone(),
            prototype.pdu_sender.clone(),
            prototype.vfs.clone(),
            self.cfg.pdu_buffer_size,
            prototype.remote_cfg_table.clone(),
            prototype.timer_creator.clone(),
            prototype.seq_counter.clone(),
        )
    }

    fn new_dest_handler(&self) -> EntityDestHandler<Sender, Hook, Vfs, Remote, Timers, Timer> {
        let prototype = lock(&self.prototype);
        DestinationHandler::new(
            prototype.local_cfg.clone(),
            self.cfg.pdu_buffer_size,
            prototype.pdu_sender.clone(),
            prototype.vfs.clone(),
            prototype.remote_cfg_table.clone(),
            prototype.timer_creator.clone(),
            LostSegmentsList::default(),
        )
        .with_max_buffered_file_data(self.cfg.max_buffered_file_data)
    }
}
