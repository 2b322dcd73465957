//! Filestore abstraction used by the CFDP handlers.
//!
//! All file access of the source and destination handlers goes through the [VirtualFilestore]
//! trait. [NativeFilestore] implements it on top of [std::fs]. The module also executes the
//! filestore requests which can be part of a transaction, see [execute_filestore_request].
use std::{
    fs::{self, File, OpenOptions},
    io::{BufReader, Read, Seek, SeekFrom, Write},
    path::Path,
};

use crate::{
    checksum::ChecksumCalculator,
    pdu::{
        tlv::{FilestoreActionCode, FilestoreRequestTlv, FilestoreResponseTlv, TlvLvError},
        ChecksumType,
    },
    util::ByteConversionError,
};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FilestoreError {
    #[error("file does not exist")]
    FileDoesNotExist,
    #[error("file already exists")]
    FileAlreadyExists,
    #[error("directory does not exist")]
    DirDoesNotExist,
    #[error("permission error")]
    Permission,
    #[error("is not a file")]
    IsNotFile,
    #[error("is not a directory")]
    IsNotDirectory,
    #[error("byte conversion: {0}")]
    ByteConversion(#[from] ByteConversionError),
    #[error("IO error: {0})")]
    Io(#[from] std::io::Error),
    #[error("checksum type not implemented: {0:?}")]
    ChecksumTypeNotImplemented(ChecksumType),
    #[error("utf8 error")]
    Utf8Error,
    #[error("other error")]
    Other,
}

pub trait VirtualFilestore {
    fn create_file(&self, file_path: &str) -> Result<(), FilestoreError>;

    fn remove_file(&self, file_path: &str) -> Result<(), FilestoreError>;

    /// Truncating a file means deleting all its data so the resulting file is empty.
    /// This can be more efficient than removing and re-creating a file.
    fn truncate_file(&self, file_path: &str) -> Result<(), FilestoreError>;

    /// Renames a file. The target must not exist yet.
    fn rename_file(&self, old_path: &str, new_path: &str) -> Result<(), FilestoreError>;

    /// Appends the content of `second_path` to the file at `first_path`.
    fn append_file(&self, first_path: &str, second_path: &str) -> Result<(), FilestoreError>;

    /// Replaces the content of the file at `first_path` with the content of `second_path`.
    fn replace_file(&self, first_path: &str, second_path: &str) -> Result<(), FilestoreError>;

    fn remove_dir(&self, dir_path: &str, all: bool) -> Result<(), FilestoreError>;
    fn create_dir(&self, dir_path: &str) -> Result<(), FilestoreError>;

    fn read_data(
        &self,
        file_path: &str,
        offset: u64,
        read_len: u64,
        buf: &mut [u8],
    ) -> Result<(), FilestoreError>;

    /// Writes data at the given offset. Writing beyond the current end of the file is allowed
    /// and leaves a gap which is filled by later writes.
    fn write_data(&self, file: &str, offset: u64, buf: &[u8]) -> Result<(), FilestoreError>;

    fn filename_from_full_path(path: &str) -> Option<&str>
    where
        Self: Sized;

    fn is_file(&self, path: &str) -> Result<bool, FilestoreError>;

    fn is_dir(&self, path: &str) -> Result<bool, FilestoreError> {
        Ok(!self.is_file(path)?)
    }

    fn exists(&self, path: &str) -> Result<bool, FilestoreError>;

    /// Extract the file name part of a full path.
    ///
    /// This method should behave similarly to the [std::path::Path::file_name] method.
    fn file_name<'a>(&self, full_path: &'a str) -> Result<Option<&'a str>, FilestoreError>;

    fn file_size(&self, path: &str) -> Result<u64, FilestoreError>;

    /// CFDP specific abstraction to calculate the checksum of the first `size_to_verify` octets
    /// of a file.
    ///
    /// The passed verification buffer is used to read the file in chunks. Common buffer sizes
    /// like 4096 or 8192 bytes are recommended.
    fn calculate_checksum(
        &self,
        file_path: &str,
        checksum_type: ChecksumType,
        size_to_verify: u64,
        verification_buf: &mut [u8],
    ) -> Result<u32, FilestoreError>;

    fn checksum_verify(
        &self,
        expected_checksum: u32,
        file_path: &str,
        checksum_type: ChecksumType,
        size_to_verify: u64,
        verification_buf: &mut [u8],
    ) -> Result<bool, FilestoreError> {
        Ok(
            self.calculate_checksum(file_path, checksum_type, size_to_verify, verification_buf)?
                == expected_checksum,
        )
    }
}

#[derive(Default, Debug, Copy, Clone)]
pub struct NativeFilestore {}

impl NativeFilestore {
    fn check_is_existing_file(&self, file_path: &str) -> Result<(), FilestoreError> {
        if !self.exists(file_path)? {
            return Err(FilestoreError::FileDoesNotExist);
        }
        if !self.is_file(file_path)? {
            return Err(FilestoreError::IsNotFile);
        }
        Ok(())
    }
}

impl VirtualFilestore for NativeFilestore {
    fn create_file(&self, file_path: &str) -> Result<(), FilestoreError> {
        if self.exists(file_path)? {
            return Err(FilestoreError::FileAlreadyExists);
        }
        File::create(file_path)?;
        Ok(())
    }

    fn remove_file(&self, file_path: &str) -> Result<(), FilestoreError> {
        self.check_is_existing_file(file_path)?;
        fs::remove_file(file_path)?;
        Ok(())
    }

    fn truncate_file(&self, file_path: &str) -> Result<(), FilestoreError> {
        self.check_is_existing_file(file_path)?;
        OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(file_path)?;
        Ok(())
    }

    fn rename_file(&self, old_path: &str, new_path: &str) -> Result<(), FilestoreError> {
        self.check_is_existing_file(old_path)?;
        if self.exists(new_path)? {
            return Err(FilestoreError::FileAlreadyExists);
        }
        fs::rename(old_path, new_path)?;
        Ok(())
    }

    fn append_file(&self, first_path: &str, second_path: &str) -> Result<(), FilestoreError> {
        self.check_is_existing_file(first_path)?;
        self.check_is_existing_file(second_path)?;
        let mut source = BufReader::new(File::open(second_path)?);
        let mut target = OpenOptions::new().append(true).open(first_path)?;
        std::io::copy(&mut source, &mut target)?;
        Ok(())
    }

    fn replace_file(&self, first_path: &str, second_path: &str) -> Result<(), FilestoreError> {
        self.check_is_existing_file(first_path)?;
        self.check_is_existing_file(second_path)?;
        fs::copy(second_path, first_path)?;
        Ok(())
    }

    fn create_dir(&self, dir_path: &str) -> Result<(), FilestoreError> {
        fs::create_dir(dir_path)?;
        Ok(())
    }

    fn remove_dir(&self, dir_path: &str, all: bool) -> Result<(), FilestoreError> {
        if !self.exists(dir_path)? {
            return Err(FilestoreError::DirDoesNotExist);
        }
        if !self.is_dir(dir_path)? {
            return Err(FilestoreError::IsNotDirectory);
        }
        if !all {
            fs::remove_dir(dir_path)?;
            return Ok(());
        }
        fs::remove_dir_all(dir_path)?;
        Ok(())
    }

    fn read_data(
        &self,
        file_name: &str,
        offset: u64,
        read_len: u64,
        buf: &mut [u8],
    ) -> Result<(), FilestoreError> {
        if buf.len() < read_len as usize {
            return Err(ByteConversionError::ToSliceTooSmall {
                found: buf.len(),
                expected: read_len as usize,
            }
            .into());
        }
        self.check_is_existing_file(file_name)?;
        let mut file = File::open(file_name)?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf[0..read_len as usize])?;
        Ok(())
    }

    fn write_data(&self, file: &str, offset: u64, buf: &[u8]) -> Result<(), FilestoreError> {
        self.check_is_existing_file(file)?;
        let mut file = OpenOptions::new().write(true).open(file)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn filename_from_full_path(path: &str) -> Option<&str>
    where
        Self: Sized,
    {
        Path::new(path).file_name().and_then(|name| name.to_str())
    }

    fn is_file(&self, str_path: &str) -> Result<bool, FilestoreError> {
        if !self.exists(str_path)? {
            return Err(FilestoreError::FileDoesNotExist);
        }
        Ok(Path::new(str_path).is_file())
    }

    fn exists(&self, path: &str) -> Result<bool, FilestoreError> {
        Ok(Path::new(path).exists())
    }

    fn file_name<'a>(&self, full_path: &'a str) -> Result<Option<&'a str>, FilestoreError> {
        let path = Path::new(full_path);
        path.file_name()
            .map(|s| s.to_str())
            .ok_or(FilestoreError::Utf8Error)
    }

    fn file_size(&self, str_path: &str) -> Result<u64, FilestoreError> {
        self.check_is_existing_file(str_path)?;
        Ok(Path::new(str_path).metadata()?.len())
    }

    fn calculate_checksum(
        &self,
        file_path: &str,
        checksum_type: ChecksumType,
        size_to_verify: u64,
        verification_buf: &mut [u8],
    ) -> Result<u32, FilestoreError> {
        if checksum_type == ChecksumType::NullChecksum {
            return Ok(0);
        }
        let mut calculator = ChecksumCalculator::new(checksum_type)
            .ok_or(FilestoreError::ChecksumTypeNotImplemented(checksum_type))?;
        if verification_buf.is_empty() && size_to_verify > 0 {
            return Err(ByteConversionError::ToSliceTooSmall {
                found: 0,
                expected: 1,
            }
            .into());
        }
        let mut buf_reader = BufReader::new(File::open(file_path)?);
        let mut remaining_bytes = size_to_verify;
        while remaining_bytes > 0 {
            let bytes_to_read = remaining_bytes.min(verification_buf.len() as u64) as usize;
            let bytes_read = buf_reader.read(&mut verification_buf[0..bytes_to_read])?;
            if bytes_read == 0 {
                break;
            }
            calculator.update(&verification_buf[0..bytes_read]);
            remaining_bytes -= bytes_read as u64;
        }
        Ok(calculator.finalize())
    }
}

/// Status codes of filestore responses as specified in table 5-18 of the CFDP standard.
///
/// A status of 0 always means success. The meaning of the other values depends on the action.
pub mod fs_status {
    pub const SUCCESSFUL: u8 = 0b0000;
    pub const NOT_PERFORMED: u8 = 0b1111;

    pub const CREATE_NOT_ALLOWED: u8 = 0b0001;

    pub const DELETE_FILE_DOES_NOT_EXIST: u8 = 0b0001;
    pub const DELETE_NOT_ALLOWED: u8 = 0b0010;

    pub const RENAME_OLD_FILE_DOES_NOT_EXIST: u8 = 0b0001;
    pub const RENAME_NEW_FILE_EXISTS: u8 = 0b0010;
    pub const RENAME_NOT_ALLOWED: u8 = 0b0011;

    pub const FILE_1_DOES_NOT_EXIST: u8 = 0b0001;
    pub const FILE_2_DOES_NOT_EXIST: u8 = 0b0010;
    pub const APPEND_REPLACE_NOT_ALLOWED: u8 = 0b0011;

    pub const CREATE_DIR_CANNOT_BE_CREATED: u8 = 0b0001;

    pub const REMOVE_DIR_DOES_NOT_EXIST: u8 = 0b0001;
    pub const REMOVE_DIR_NOT_ALLOWED: u8 = 0b0010;

    pub const DENY_NOT_ALLOWED: u8 = 0b0010;
}

fn exists_or_false(vfs: &impl VirtualFilestore, path: &str) -> bool {
    vfs.exists(path).unwrap_or(false)
}

fn file_action_status(
    vfs: &impl VirtualFilestore,
    request: &FilestoreRequestTlv,
    second_name: &str,
) -> u8 {
    use fs_status::*;
    let first_name = request.first_name();
    match request.action_code() {
        FilestoreActionCode::CreateFile => {
            let result = if exists_or_false(vfs, first_name) {
                vfs.truncate_file(first_name)
            } else {
                vfs.create_file(first_name)
            };
            match result {
                Ok(()) => SUCCESSFUL,
                Err(_) => CREATE_NOT_ALLOWED,
            }
        }
        FilestoreActionCode::DeleteFile => {
            if !exists_or_false(vfs, first_name) {
                return DELETE_FILE_DOES_NOT_EXIST;
            }
            match vfs.remove_file(first_name) {
                Ok(()) => SUCCESSFUL,
                Err(_) => DELETE_NOT_ALLOWED,
            }
        }
        FilestoreActionCode::RenameFile => {
            if !exists_or_false(vfs, first_name) {
                return RENAME_OLD_FILE_DOES_NOT_EXIST;
            }
            if exists_or_false(vfs, second_name) {
                return RENAME_NEW_FILE_EXISTS;
            }
            match vfs.rename_file(first_name, second_name) {
                Ok(()) => SUCCESSFUL,
                Err(_) => RENAME_NOT_ALLOWED,
            }
        }
        FilestoreActionCode::AppendFile | FilestoreActionCode::ReplaceFile => {
            if !exists_or_false(vfs, first_name) {
                return FILE_1_DOES_NOT_EXIST;
            }
            if !exists_or_false(vfs, second_name) {
                return FILE_2_DOES_NOT_EXIST;
            }
            let result = if request.action_code() == FilestoreActionCode::AppendFile {
                vfs.append_file(first_name, second_name)
            } else {
                vfs.replace_file(first_name, second_name)
            };
            match result {
                Ok(()) => SUCCESSFUL,
                Err(_) => APPEND_REPLACE_NOT_ALLOWED,
            }
        }
        FilestoreActionCode::CreateDirectory => match vfs.create_dir(first_name) {
            Ok(()) => SUCCESSFUL,
            Err(_) => CREATE_DIR_CANNOT_BE_CREATED,
        },
        FilestoreActionCode::RemoveDirectory => {
            if !exists_or_false(vfs, first_name) {
                return REMOVE_DIR_DOES_NOT_EXIST;
            }
            match vfs.remove_dir(first_name, false) {
                Ok(()) => SUCCESSFUL,
                Err(_) => REMOVE_DIR_NOT_ALLOWED,
            }
        }
        // Deny requests succeed if the object does not exist after the request.
        FilestoreActionCode::DenyFile => {
            if !exists_or_false(vfs, first_name) {
                return SUCCESSFUL;
            }
            match vfs.remove_file(first_name) {
                Ok(()) => SUCCESSFUL,
                Err(_) => DENY_NOT_ALLOWED,
            }
        }
        FilestoreActionCode::DenyDirectory => {
            if !exists_or_false(vfs, first_name) {
                return SUCCESSFUL;
            }
            match vfs.remove_dir(first_name, false) {
                Ok(()) => SUCCESSFUL,
                Err(_) => DENY_NOT_ALLOWED,
            }
        }
    }
}

/// Executes a single filestore request and builds the matching response.
pub fn execute_filestore_request(
    vfs: &impl VirtualFilestore,
    request: &FilestoreRequestTlv,
) -> Result<FilestoreResponseTlv, TlvLvError> {
    let second_name = request.second_name().unwrap_or_default();
    let status = file_action_status(vfs, request, second_name);
    if status != fs_status::SUCCESSFUL {
        log::warn!(
            "filestore request {:?} for {} failed with status {}",
            request.action_code(),
            request.first_name(),
            status
        );
    }
    FilestoreResponseTlv::new_no_filestore_message(
        request.action_code(),
        status,
        request.first_name(),
        request.second_name().map(String::from),
    )
}

/// Executes the requests in order. Once a request fails, all remaining requests are reported
/// as not performed.
pub fn execute_filestore_requests<'req>(
    vfs: &impl VirtualFilestore,
    requests: impl IntoIterator<Item = &'req FilestoreRequestTlv>,
) -> Result<Vec<FilestoreResponseTlv>, TlvLvError> {
    let mut responses = Vec::new();
    let mut failed = false;
    for request in requests {
        let response = if failed {
            FilestoreResponseTlv::new_no_filestore_message(
                request.action_code(),
                fs_status::NOT_PERFORMED,
                request.first_name(),
                request.second_name().map(String::from),
            )?
        } else {
            execute_filestore_request(vfs, request)?
        };
        if response.status_code() != fs_status::SUCCESSFUL {
            failed = true;
        }
        responses.push(response);
    }
    Ok(responses)
}
