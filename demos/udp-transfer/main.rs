//! Runs two CFDP entities in one process and copies a file between them over loopback UDP.
//!
//! Entity 1 sends, entity 2 receives. Every entity owns one UDP socket and one
//! [EntityManager]. PDUs produced by the manager are forwarded to the peer socket and received
//! datagrams are fed back into the manager.
use std::{
    io::{self, ErrorKind},
    net::{Ipv4Addr, SocketAddr, UdpSocket},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    thread,
    time::{Duration, Instant},
};

use cfdp::{
    entity::{EntityConfig, EntityError, EntityManager},
    filestore::NativeFilestore,
    pdu::{ChecksumType, ConditionCode, PduError, TransmissionMode},
    seq_count::SequenceCounterAtomicU16,
    time::StdCountdown,
    user::{CfdpUser, FileSegmentRecvdParams, MetadataReceivedParams, TransactionFinishedParams},
    util::UnsignedByteFieldU16,
    EntityType, FaultInfo, IndicationConfig, LocalEntityConfig, PduOwnedWithInfo,
    RemoteEntityConfig, StdTimerCreator, TransactionId, UserFaultHook,
};
use clap::Parser;
use log::{debug, error, info, warn};

const SENDER_ID: UnsignedByteFieldU16 = UnsignedByteFieldU16::new(1);
const RECEIVER_ID: UnsignedByteFieldU16 = UnsignedByteFieldU16::new(2);

const DEMO_FILE_DATA: &str = "Hello from the CFDP sender entity!";

#[derive(Debug, Copy, Clone, clap::ValueEnum)]
pub enum TransmissionModeCli {
    /// Class 1, unacknowledged.
    Nak,
    /// Class 2, acknowledged.
    Ack,
}

impl From<TransmissionModeCli> for TransmissionMode {
    fn from(value: TransmissionModeCli) -> Self {
        match value {
            TransmissionModeCli::Nak => TransmissionMode::Unacknowledged,
            TransmissionModeCli::Ack => TransmissionMode::Acknowledged,
        }
    }
}

#[derive(clap::Parser)]
#[command(about = "Copies a file between two CFDP entities over loopback UDP")]
pub struct Cli {
    /// File to send. A small temporary file is created if omitted.
    #[arg(short, long)]
    file: Option<PathBuf>,
    /// Destination path. Defaults to a file inside a temporary directory.
    #[arg(short, long)]
    dest: Option<PathBuf>,
    #[arg(short, long, value_enum, default_value = "ack")]
    mode: TransmissionModeCli,
    /// Request a Finished PDU in unacknowledged mode.
    #[arg(short, long)]
    closure_requested: bool,
    /// UDP port of the sending entity, the receiving entity uses the next port.
    #[arg(short, long, default_value_t = 5111)]
    port: u16,
    /// Maximum packet length towards the peer.
    #[arg(long, default_value_t = 256)]
    max_packet_len: usize,
    #[arg(short, long, default_value_t = 10)]
    timeout_secs: u64,
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Default, Debug, Copy, Clone)]
pub struct LoggingFaultHook {}

impl UserFaultHook for LoggingFaultHook {
    fn notice_of_suspension_cb(&mut self, fault_info: FaultInfo) {
        warn!("notice of suspension: {:?}", fault_info);
    }

    fn notice_of_cancellation_cb(&mut self, fault_info: FaultInfo) {
        warn!("notice of cancellation: {:?}", fault_info);
    }

    fn abandoned_cb(&mut self, fault_info: FaultInfo) {
        error!("transaction abandoned: {:?}", fault_info);
    }

    fn ignore_cb(&mut self, fault_info: FaultInfo) {
        info!("ignored fault: {:?}", fault_info);
    }
}

pub struct DemoUser {
    entity_type: EntityType,
    finished: Arc<AtomicBool>,
}

impl DemoUser {
    pub fn new(entity_type: EntityType, finished: Arc<AtomicBool>) -> Self {
        Self {
            entity_type,
            finished,
        }
    }
}

impl CfdpUser for DemoUser {
    fn transaction_indication(&mut self, id: &TransactionId) {
        info!("{:?}: transaction {} started", self.entity_type, id);
    }

    fn eof_sent_indication(&mut self, id: &TransactionId) {
        info!("{:?}: EOF sent for {}", self.entity_type, id);
    }

    fn transaction_finished_indication(&mut self, finished_params: &TransactionFinishedParams) {
        info!(
            "{:?}: transaction finished: {:?}",
            self.entity_type, finished_params
        );
        self.finished.store(true, Ordering::Relaxed);
    }

    fn metadata_recvd_indication(&mut self, md_recvd_params: &MetadataReceivedParams) {
        info!(
            "{:?}: metadata received: {:?}",
            self.entity_type, md_recvd_params
        );
    }

    fn file_segment_recvd_indication(&mut self, segment_recvd_params: &FileSegmentRecvdParams) {
        debug!(
            "{:?}: file segment at offset {} with {} octets",
            self.entity_type, segment_recvd_params.offset, segment_recvd_params.length
        );
    }

    fn report_indication(&mut self, id: &TransactionId) {
        info!("{:?}: report for {}", self.entity_type, id);
    }

    fn suspended_indication(&mut self, id: &TransactionId, condition_code: ConditionCode) {
        warn!(
            "{:?}: transaction {} suspended with {:?}",
            self.entity_type, id, condition_code
        );
    }

    fn resumed_indication(&mut self, id: &TransactionId, progress: u64) {
        info!(
            "{:?}: transaction {} resumed at progress {}",
            self.entity_type, id, progress
        );
    }

    fn fault_indication(
        &mut self,
        id: &TransactionId,
        condition_code: ConditionCode,
        progress: u64,
    ) {
        warn!(
            "{:?}: fault {:?} in transaction {} at progress {}",
            self.entity_type, condition_code, id, progress
        );
    }

    fn abandoned_indication(
        &mut self,
        id: &TransactionId,
        condition_code: ConditionCode,
        progress: u64,
    ) {
        error!(
            "{:?}: transaction {} abandoned with {:?} at progress {}",
            self.entity_type, id, condition_code, progress
        );
        self.finished.store(true, Ordering::Relaxed);
    }

    fn eof_recvd_indication(&mut self, id: &TransactionId) {
        info!("{:?}: EOF received for {}", self.entity_type, id);
    }
}

type DemoManager = EntityManager<
    mpsc::Sender<PduOwnedWithInfo>,
    LoggingFaultHook,
    NativeFilestore,
    RemoteEntityConfig,
    StdTimerCreator,
    StdCountdown,
    Arc<SequenceCounterAtomicU16>,
>;

#[derive(Debug, thiserror::Error)]
pub enum UdpEntityError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("pdu error: {0}")]
    Pdu(#[from] PduError),
    #[error("entity error: {0}")]
    Entity(#[from] EntityError),
}

/// One CFDP entity bound to a UDP socket.
pub struct UdpEntity {
    manager: DemoManager,
    socket: UdpSocket,
    peer_addr: SocketAddr,
    pdu_rx: mpsc::Receiver<PduOwnedWithInfo>,
    recv_buf: Vec<u8>,
}

impl UdpEntity {
    pub fn new(
        local_id: UnsignedByteFieldU16,
        remote_cfg: RemoteEntityConfig,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
    ) -> Result<Self, io::Error> {
        let (pdu_tx, pdu_rx) = mpsc::channel();
        let manager = EntityManager::new(
            LocalEntityConfig::new(
                local_id.into(),
                IndicationConfig::default(),
                LoggingFaultHook::default(),
            ),
            EntityConfig::default(),
            pdu_tx,
            NativeFilestore::default(),
            remote_cfg,
            StdTimerCreator::default(),
            Arc::new(SequenceCounterAtomicU16::default()),
        );
        let socket = UdpSocket::bind(local_addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            manager,
            socket,
            peer_addr,
            pdu_rx,
            recv_buf: vec![0; 4096],
        })
    }

    pub fn manager(&self) -> &DemoManager {
        &self.manager
    }

    /// Feeds all pending datagrams into the manager. Returns the number of received PDUs.
    pub fn receive(&mut self, user: &mut impl CfdpUser) -> Result<u32, UdpEntityError> {
        let mut received = 0;
        loop {
            let (len, from) = match self.socket.recv_from(&mut self.recv_buf) {
                Ok(res) => res,
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    return Ok(received);
                }
                Err(e) => return Err(e.into()),
            };
            let pdu = PduOwnedWithInfo::new_from_raw_packet(&self.recv_buf[..len])?;
            debug!(
                "received {:?} {:?} PDU from {}",
                pdu.pdu_type, pdu.file_directive_type, from
            );
            received += 1;
            if let Err(e) = self.manager.insert_pdu(user, &pdu) {
                warn!("PDU from {} rejected: {}", from, e);
            }
        }
    }

    /// Sends all PDUs queued by the manager to the peer.
    pub fn transmit(&self) -> u32 {
        let mut sent = 0;
        while let Ok(pdu) = self.pdu_rx.try_recv() {
            debug!(
                "sending {:?} {:?} PDU to {}",
                pdu.pdu_type, pdu.file_directive_type, self.peer_addr
            );
            match self.socket.send_to(&pdu.pdu, self.peer_addr) {
                Ok(_) => sent += 1,
                Err(e) => warn!("sending PDU failed: {}", e),
            }
        }
        sent
    }
}

fn run_entity(
    mut entity: UdpEntity,
    mut user: DemoUser,
    stop_signal: Arc<AtomicBool>,
) -> Result<(), UdpEntityError> {
    while !stop_signal.load(Ordering::Relaxed) {
        let received = entity.receive(&mut user)?;
        if let Err(e) = entity.manager().poll(&mut user) {
            warn!("polling entity failed: {}", e);
        }
        let sent = entity.transmit();
        if received == 0 && sent == 0 {
            thread::sleep(Duration::from_millis(10));
        }
    }
    Ok(())
}

fn remote_cfg(entity_id: UnsignedByteFieldU16, cli: &Cli) -> RemoteEntityConfig {
    RemoteEntityConfig::new_with_default_values(
        entity_id.into(),
        cli.max_packet_len,
        cli.closure_requested,
        false,
        cli.mode.into(),
        ChecksumType::Crc32,
    )
}

fn init_logger(level: log::LevelFilter) {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                thread::current().name().unwrap_or("main"),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .apply()
        .expect("logger initialization failed");
}

fn main() {
    let cli = Cli::parse();
    init_logger(if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    });

    let tmp_dir = tempfile::tempdir().expect("creating temp directory failed");
    let src_file = match &cli.file {
        Some(file) => file.clone(),
        None => {
            let file = tmp_dir.path().join("source.txt");
            std::fs::write(&file, DEMO_FILE_DATA).expect("writing source file failed");
            file
        }
    };
    let dest_file = cli
        .dest
        .clone()
        .unwrap_or_else(|| tmp_dir.path().join("received.txt"));

    let sender_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, cli.port));
    let receiver_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, cli.port + 1));
    let sender = UdpEntity::new(
        SENDER_ID,
        remote_cfg(RECEIVER_ID, &cli),
        sender_addr,
        receiver_addr,
    )
    .expect("creating sending entity failed");
    let receiver = UdpEntity::new(
        RECEIVER_ID,
        remote_cfg(SENDER_ID, &cli),
        receiver_addr,
        sender_addr,
    )
    .expect("creating receiving entity failed");

    let sender_finished = Arc::new(AtomicBool::new(false));
    let receiver_finished = Arc::new(AtomicBool::new(false));
    let mut sender_user = DemoUser::new(EntityType::Sending, sender_finished.clone());
    let receiver_user = DemoUser::new(EntityType::Receiving, receiver_finished.clone());

    let id = sender
        .manager()
        .put_file(
            &mut sender_user,
            RECEIVER_ID.into(),
            &src_file.to_string_lossy(),
            &dest_file.to_string_lossy(),
            cli.mode.into(),
            cli.closure_requested,
        )
        .expect("put request failed");
    info!(
        "copying {:?} to {:?} as transaction {}",
        src_file, dest_file, id
    );

    let stop_signal = Arc::new(AtomicBool::new(false));
    let stop_sender = stop_signal.clone();
    let stop_receiver = stop_signal.clone();
    let jh_sender = thread::Builder::new()
        .name("cfdp sender".to_string())
        .spawn(move || run_entity(sender, sender_user, stop_sender))
        .expect("spawning sender thread failed");
    let jh_receiver = thread::Builder::new()
        .name("cfdp receiver".to_string())
        .spawn(move || run_entity(receiver, receiver_user, stop_receiver))
        .expect("spawning receiver thread failed");

    let start = Instant::now();
    let timeout = Duration::from_secs(cli.timeout_secs);
    while !(sender_finished.load(Ordering::Relaxed) && receiver_finished.load(Ordering::Relaxed))
    {
        if start.elapsed() > timeout {
            error!("transfer did not finish within {:?}", timeout);
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }
    // Gives the sender a chance to transmit the final ACK.
    thread::sleep(Duration::from_millis(100));
    stop_signal.store(true, Ordering::Relaxed);

    for (name, jh) in [("sender", jh_sender), ("receiver", jh_receiver)] {
        match jh.join() {
            Ok(Ok(())) => (),
            Ok(Err(e)) => error!("{} entity failed: {}", name, e),
            Err(_) => error!("{} entity thread panicked", name),
        }
    }
    match std::fs::read(&dest_file) {
        Ok(data) => info!("received file has {} octets", data.len()),
        Err(e) => error!("reading received file failed: {}", e),
    }
}
