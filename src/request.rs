//! Put requests, which start a new file copy operation at the sending entity.
//!
//! [PutRequest] borrows all of its fields and is cheap to build for one-shot calls.
//! [PutRequestOwned] owns them and is what a [crate::source::SourceHandler] keeps for the
//! lifetime of a transaction.
use crate::{
    pdu::{
        tlv::{FaultHandlerOverrideTlv, FilestoreRequestTlv, FlowLabelTlv, MsgToUserTlv, Tlv},
        SegmentationControl, TransmissionMode,
    },
    util::UnsignedByteField,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[error("file path length {0} exceeds the maximum of 255")]
pub struct FilePathTooLarge(pub usize);

/// Abstraction for different put request structures which can be used by put request
/// consumers.
///
/// Options which are not set fall back to the defaults of the remote entity configuration.
pub trait ReadablePutRequest {
    fn destination_id(&self) -> UnsignedByteField;
    fn source_file(&self) -> Option<&str>;
    fn dest_file(&self) -> Option<&str>;
    fn trans_mode(&self) -> Option<TransmissionMode>;
    fn closure_requested(&self) -> Option<bool>;
    fn seg_ctrl(&self) -> Option<SegmentationControl>;

    fn msgs_to_user(&self) -> &[MsgToUserTlv];
    fn fault_handler_overrides(&self) -> &[FaultHandlerOverrideTlv];
    fn flow_label(&self) -> Option<&FlowLabelTlv>;
    fn fs_requests(&self) -> &[FilestoreRequestTlv];

    /// A request without file names only transfers its options.
    fn is_metadata_only(&self) -> bool {
        self.source_file().is_none() && self.dest_file().is_none()
    }

    /// All options in the order they are placed into the Metadata PDU.
    fn metadata_options(&self) -> Vec<Tlv> {
        let mut options: Vec<Tlv> = self
            .fs_requests()
            .iter()
            .cloned()
            .map(Tlv::FilestoreRequest)
            .collect();
        options.extend(self.msgs_to_user().iter().cloned().map(Tlv::MsgToUser));
        options.extend(
            self.fault_handler_overrides()
                .iter()
                .copied()
                .map(Tlv::FaultHandlerOverride),
        );
        if let Some(flow_label) = self.flow_label() {
            options.push(Tlv::FlowLabel(flow_label.clone()));
        }
        options
    }
}

pub fn generic_path_checks(
    source_file: Option<&str>,
    dest_file: Option<&str>,
) -> Result<(), FilePathTooLarge> {
    for path in [source_file, dest_file].into_iter().flatten() {
        if path.len() > u8::MAX as usize {
            return Err(FilePathTooLarge(path.len()));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRequest<'req> {
    pub destination_id: UnsignedByteField,
    source_file: Option<&'req str>,
    dest_file: Option<&'req str>,
    pub trans_mode: Option<TransmissionMode>,
    pub closure_requested: Option<bool>,
    pub seg_ctrl: Option<SegmentationControl>,
    pub msgs_to_user: &'req [MsgToUserTlv],
    pub fault_handler_overrides: &'req [FaultHandlerOverrideTlv],
    pub flow_label: Option<&'req FlowLabelTlv>,
    pub fs_requests: &'req [FilestoreRequestTlv],
}

impl<'req> PutRequest<'req> {
    pub fn new(
        destination_id: UnsignedByteField,
        source_file: Option<&'req str>,
        dest_file: Option<&'req str>,
        trans_mode: Option<TransmissionMode>,
        closure_requested: Option<bool>,
    ) -> Result<Self, FilePathTooLarge> {
        generic_path_checks(source_file, dest_file)?;
        Ok(Self {
            destination_id,
            source_file,
            dest_file,
            trans_mode,
            closure_requested,
            seg_ctrl: None,
            msgs_to_user: &[],
            fault_handler_overrides: &[],
            flow_label: None,
            fs_requests: &[],
        })
    }

    pub fn new_regular_request(
        dest_id: UnsignedByteField,
        source_file: &'req str,
        dest_file: &'req str,
        trans_mode: Option<TransmissionMode>,
        closure_requested: Option<bool>,
    ) -> Result<Self, FilePathTooLarge> {
        Self::new(
            dest_id,
            Some(source_file),
            Some(dest_file),
            trans_mode,
            closure_requested,
        )
    }

    pub fn new_msgs_to_user_only(
        dest_id: UnsignedByteField,
        msgs_to_user: &'req [MsgToUserTlv],
    ) -> Self {
        Self {
            destination_id: dest_id,
            source_file: None,
            dest_file: None,
            trans_mode: None,
            closure_requested: None,
            seg_ctrl: None,
            msgs_to_user,
            fault_handler_overrides: &[],
            flow_label: None,
            fs_requests: &[],
        }
    }

    pub fn with_msgs_to_user(mut self, msgs_to_user: &'req [MsgToUserTlv]) -> Self {
        self.msgs_to_user = msgs_to_user;
        self
    }

    pub fn with_fault_handler_overrides(
        mut self,
        overrides: &'req [FaultHandlerOverrideTlv],
    ) -> Self {
        self.fault_handler_overrides = overrides;
        self
    }

    pub fn with_flow_label(mut self, flow_label: &'req FlowLabelTlv) -> Self {
        self.flow_label = Some(flow_label);
        self
    }

    pub fn with_fs_requests(mut self, fs_requests: &'req [FilestoreRequestTlv]) -> Self {
        self.fs_requests = fs_requests;
        self
    }
}

impl ReadablePutRequest for PutRequest<'_> {
    fn destination_id(&self) -> UnsignedByteField {
        self.destination_id
    }

    fn source_file(&self) -> Option<&str> {
        self.source_file
    }

    fn dest_file(&self) -> Option<&str> {
        self.dest_file
    }

    fn trans_mode(&self) -> Option<TransmissionMode> {
        self.trans_mode
    }

    fn closure_requested(&self) -> Option<bool> {
        self.closure_requested
    }

    fn seg_ctrl(&self) -> Option<SegmentationControl> {
        self.seg_ctrl
    }

    fn msgs_to_user(&self) -> &[MsgToUserTlv] {
        self.msgs_to_user
    }

    fn fault_handler_overrides(&self) -> &[FaultHandlerOverrideTlv] {
        self.fault_handler_overrides
    }

    fn flow_label(&self) -> Option<&FlowLabelTlv> {
        self.flow_label
    }

    fn fs_requests(&self) -> &[FilestoreRequestTlv] {
        self.fs_requests
    }
}

/// Owned variant of [PutRequest] with no lifetimes which is also [Clone]able.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PutRequestOwned {
    pub destination_id: UnsignedByteField,
    source_file: Option<String>,
    dest_file: Option<String>,
    pub trans_mode: Option<TransmissionMode>,
    pub closure_requested: Option<bool>,
    pub seg_ctrl: Option<SegmentationControl>,
    pub msgs_to_user: Vec<MsgToUserTlv>,
    pub fault_handler_overrides: Vec<FaultHandlerOverrideTlv>,
    pub flow_label: Option<FlowLabelTlv>,
    pub fs_requests: Vec<FilestoreRequestTlv>,
}

impl PutRequestOwned {
    pub fn new_regular_request(
        dest_id: UnsignedByteField,
        source_file: &str,
        dest_file: &str,
        trans_mode: Option<TransmissionMode>,
        closure_requested: Option<bool>,
    ) -> Result<Self, FilePathTooLarge> {
        Ok(PutRequest::new_regular_request(
            dest_id,
            source_file,
            dest_file,
            trans_mode,
            closure_requested,
        )?
        .into())
    }

    pub fn new_msgs_to_user_only(dest_id: UnsignedByteField, msgs_to_user: &[MsgToUserTlv]) -> Self {
        PutRequest::new_msgs_to_user_only(dest_id, msgs_to_user).into()
    }

    /// Copies any put request implementation.
    pub fn from_readable(req: &impl ReadablePutRequest) -> Self {
        Self {
            destination_id: req.destination_id(),
            source_file: req.source_file().map(String::from),
            dest_file: req.dest_file().map(String::from),
            trans_mode: req.trans_mode(),
            closure_requested: req.closure_requested(),
            seg_ctrl: req.seg_ctrl(),
            msgs_to_user: req.msgs_to_user().to_vec(),
            fault_handler_overrides: req.fault_handler_overrides().to_vec(),
            flow_label: req.flow_label().cloned(),
            fs_requests: req.fs_requests().to_vec(),
        }
    }
}

impl From<PutRequest<'_>> for PutRequestOwned {
    fn from(req: PutRequest<'_>) -> Self {
        Self::from_readable(&req)
    }
}

impl ReadablePutRequest for PutRequestOwned {
    fn destination_id(&self) -> UnsignedByteField {
        self.destination_id
    }

    fn source_file(&self) -> Option<&str> {
        self.source_file.as_deref()
    }

    fn dest_file(&self) -> Option<&str> {
        self.dest_file.as_deref()
    }

    fn trans_mode(&self) -> Option<TransmissionMode> {
        self.trans_mode
    }

    fn closure_requested(&self) -> Option<bool> {
        self.closure_requested
    }

    fn seg_ctrl(&self) -> Option<SegmentationControl> {
        self.seg_ctrl
    }

    fn msgs_to_user(&self) -> &[MsgToUserTlv] {
        &self.msgs_to_user
    }

    fn fault_handler_overrides(&self) -> &[FaultHandlerOverrideTlv] {
        &self.fault_handler_overrides
    }

    fn flow_label(&self) -> Option<&FlowLabelTlv> {
        self.flow_label.as_ref()
    }

    fn fs_requests(&self) -> &[FilestoreRequestTlv] {
        &self.fs_requests
    }
}

#[cfg(test)]
mod tests {
    use crate::pdu::{ConditionCode, FaultHandlerCode};
    use crate::util::UnsignedByteFieldU16;

    use super::*;

    pub const DEST_ID: UnsignedByteFieldU16 = UnsignedByteFieldU16::new(5);

    fn too_long_path() -> String {
        let mut invalid_path = String::from("/tmp/");
        invalid_path += "a".repeat(u8::MAX as usize).as_str();
        invalid_path
    }

    #[test]
    fn test_put_request_basic() {
        let src_file = "/tmp/hello.txt";
        let dest_file = "/tmp/hello2.txt";
        let put_request =
            PutRequest::new(DEST_ID.into(), Some(src_file), Some(dest_file), None, None).unwrap();
        let identical_request =
            PutRequest::new_regular_request(DEST_ID.into(), src_file, dest_file, None, None)
                .unwrap();
        assert_eq!(put_request, identical_request);
        assert!(!put_request.is_metadata_only());
        assert!(put_request.metadata_options().is_empty());
    }

    #[test]
    fn test_put_request_path_checks_source_too_long() {
        let invalid_path = too_long_path();
        let error = PutRequest::new_regular_request(
            DEST_ID.into(),
            &invalid_path,
            "/tmp/hello2.txt",
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(u8::MAX as usize + 5, error.0);
    }

    #[test]
    fn test_put_request_path_checks_dest_file_too_long() {
        let invalid_path = too_long_path();
        let error = PutRequest::new_regular_request(
            DEST_ID.into(),
            "/tmp/hello2.txt",
            &invalid_path,
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(u8::MAX as usize + 5, error.0);
    }

    #[test]
    fn test_owned_put_request_path_checks() {
        let invalid_path = too_long_path();
        assert!(PutRequestOwned::new_regular_request(
            DEST_ID.into(),
            &invalid_path,
            "/tmp/hello2.txt",
            None,
            None,
        )
        .is_err());
    }

    #[test]
    fn test_msgs_to_user_only() {
        let msgs = [MsgToUserTlv::new(b"hello").unwrap()];
        let request = PutRequestOwned::new_msgs_to_user_only(DEST_ID.into(), &msgs);
        assert!(request.is_metadata_only());
        assert_eq!(request.msgs_to_user(), &msgs);
        assert!(request.source_file().is_none());
        assert!(request.dest_file().is_none());
    }

    #[test]
    fn test_metadata_option_order() {
        let msgs = [MsgToUserTlv::new(b"hello").unwrap()];
        let fs_requests = [FilestoreRequestTlv::new_create_directory("/tmp/dir").unwrap()];
        let overrides = [FaultHandlerOverrideTlv::new(
            ConditionCode::FileChecksumFailure,
            FaultHandlerCode::NoticeOfCancellation,
        )];
        let flow_label = FlowLabelTlv::new(&[1, 2]).unwrap();
        let request =
            PutRequest::new_regular_request(DEST_ID.into(), "/tmp/a", "/tmp/b", None, None)
                .unwrap()
                .with_msgs_to_user(&msgs)
                .with_flow_label(&flow_label)
                .with_fault_handler_overrides(&overrides)
                .with_fs_requests(&fs_requests);
        let options = request.metadata_options();
        assert_eq!(options.len(), 4);
        assert!(matches!(options[0], Tlv::FilestoreRequest(_)));
        assert!(matches!(options[1], Tlv::MsgToUser(_)));
        assert!(matches!(options[2], Tlv::FaultHandlerOverride(_)));
        assert!(matches!(options[3], Tlv::FlowLabel(_)));

        let owned = PutRequestOwned::from(request.clone());
        assert_eq!(owned.metadata_options(), options);
        assert_eq!(owned.fault_handler_overrides(), &overrides);
    }
}
