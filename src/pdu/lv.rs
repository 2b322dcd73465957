//! Generic CFDP length-value (LV) abstraction as specified in CFDP 5.1.8.
use core::str::Utf8Error;

use crate::pdu::TlvLvError;
use crate::util::ByteConversionError;

pub const MIN_LV_LEN: usize = 1;

/// Length-value field with a maximum value length of 255 octets. File names inside the Metadata
/// PDU and all names of filestore requests and responses are encoded as LVs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Lv<'data> {
    data: &'data [u8],
}

impl<'data> Lv<'data> {
    pub fn new(data: &'data [u8]) -> Result<Self, TlvLvError> {
        if data.len() > u8::MAX as usize {
            return Err(TlvLvError::DataTooLarge(data.len()));
        }
        Ok(Self { data })
    }

    /// Creates a LV with an empty value field.
    pub fn new_empty() -> Self {
        Self { data: &[] }
    }

    pub fn new_from_str(str_slice: &'data str) -> Result<Self, TlvLvError> {
        Self::new(str_slice.as_bytes())
    }

    pub fn value(&self) -> &'data [u8] {
        self.data
    }

    pub fn len_value(&self) -> usize {
        self.data.len()
    }

    /// Full length including the length octet.
    pub fn len_full(&self) -> usize {
        self.data.len() + MIN_LV_LEN
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn value_as_str(&self) -> Result<&'data str, Utf8Error> {
        core::str::from_utf8(self.data)
    }

    pub fn write_to_bytes(&self, buf: &mut [u8]) -> Result<usize, TlvLvError> {
        if buf.len() < self.len_full() {
            return Err(ByteConversionError::ToSliceTooSmall {
                found: buf.len(),
                expected: self.len_full(),
            }
            .into());
        }
        buf[0] = self.data.len() as u8;
        buf[1..self.len_full()].copy_from_slice(self.data);
        Ok(self.len_full())
    }

    pub fn from_bytes(buf: &'data [u8]) -> Result<Self, TlvLvError> {
        if buf.len() < MIN_LV_LEN {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: buf.len(),
                expected: MIN_LV_LEN,
            }
            .into());
        }
        let value_len = buf[0] as usize;
        if buf.len() < MIN_LV_LEN + value_len {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: buf.len(),
                expected: MIN_LV_LEN + value_len,
            }
            .into());
        }
        Ok(Self {
            data: &buf[MIN_LV_LEN..MIN_LV_LEN + value_len],
        })
    }
}

/// Reads a LV and converts its value to an owned string.
pub(crate) fn read_lv_string(buf: &[u8]) -> Result<(String, usize), TlvLvError> {
    let lv = Lv::from_bytes(buf)?;
    let string = lv
        .value_as_str()
        .map_err(|_| TlvLvError::InvalidUtf8)?
        .to_string();
    Ok((string, lv.len_full()))
}
