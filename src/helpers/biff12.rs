//! Binary Interchange File Format 12 (BIFF12), the record stream of `.xlsb` parts.
//! Every record starts with a 7-bit continuation encoded type (up to 2 bytes) and size (up to 4 bytes).

use crate::error::CandidateSheetError;
use crate::helpers::string::to_f64;
use crate::helpers::string::to_u16;
use crate::helpers::string::to_u32;
use crate::helpers::string::to_usize;
use encoding_rs::UTF_16LE;
use std::borrow::Cow;
use std::io::BufRead;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Biff12Error {
    #[error("No enough data: expect '{0}' bytes, actual '{1}' bytes")]
    NoEnoughData(usize, usize),

    #[error("Record '{0}' not found")]
    RecordNotFound(u16),
}

/// Streams records into a reusable buffer; the `get_*` accessors read the current record body.
pub(crate) struct Biff12Reader<R: BufRead> {
    reader: R,
    buffer: Vec<u8>,
    size: usize,
}

impl<R: BufRead> Biff12Reader<R> {
    pub(crate) fn new(reader: R) -> Biff12Reader<R> {
        Biff12Reader {
            reader,
            buffer: vec![0; 1024],
            size: 0,
        }
    }

    fn slice(&self, at: usize, length: usize) -> Result<&[u8], CandidateSheetError> {
        match at.checked_add(length) {
            Some(end) if end <= self.size => Ok(&self.buffer[at..end]),
            _ => Err(Biff12Error::NoEnoughData(at.saturating_add(length), self.size))?,
        }
    }

    /// Reads a `XLWideString` (u32 character count then UTF-16LE data)
    /// and returns it with the offset right after it.
    pub(crate) fn get_str_and_bound(&'_ self, at: usize) -> Result<(Cow<'_, str>, usize), CandidateSheetError> {
        let chars = self.get_usize(at)?;
        let lower_bound = at + 4;
        let length = chars.checked_mul(2).ok_or(Biff12Error::NoEnoughData(usize::MAX, self.size))?;
        let bytes = self.slice(lower_bound, length)?;
        let (value, _) = UTF_16LE.decode_without_bom_handling(bytes);
        Ok((value, lower_bound + length))
    }

    pub(crate) fn get_str(&'_ self, at: usize) -> Result<Cow<'_, str>, CandidateSheetError> {
        let (data, _) = self.get_str_and_bound(at)?;
        Ok(data)
    }

    pub(crate) fn get_u8(&self, at: usize) -> Result<u8, CandidateSheetError> {
        self.slice(at, 1).map(|bytes| bytes[0])
    }

    pub(crate) fn get_usize(&self, at: usize) -> Result<usize, CandidateSheetError> {
        self.slice(at, 4).map(to_usize)
    }

    pub(crate) fn get_u16(&self, at: usize) -> Result<u16, CandidateSheetError> {
        self.slice(at, 2).map(to_u16)
    }

    pub(crate) fn get_u32(&self, at: usize) -> Result<u32, CandidateSheetError> {
        self.slice(at, 4).map(to_u32)
    }

    pub(crate) fn get_f64(&self, at: usize) -> Result<f64, CandidateSheetError> {
        self.slice(at, 8).map(to_f64)
    }

    /// Reads the 24-bit style index of a `Cell` structure.
    pub(crate) fn get_style(&self, at: usize) -> Result<usize, CandidateSheetError> {
        self.slice(at, 3).map(|bytes| to_usize(&[bytes[0], bytes[1], bytes[2], 0]))
    }

    /// Reads a 7-bit continuation integer. `None` when the stream ends before the first byte.
    fn read_7bit_continuation_integer(&mut self, limit: usize) -> Result<Option<usize>, CandidateSheetError> {
        let mut integer = 0usize;
        for index in 0..limit {
            if index == 0 && self.reader.fill_buf()?.is_empty() {
                return Ok(None);
            }
            let mut byte = [0u8; 1];
            self.reader.read_exact(&mut byte)?;
            integer |= ((byte[0] & 0x7F) as usize) << (7 * index);
            if (byte[0] & 0x80) == 0 {
                break;
            }
        }
        Ok(Some(integer))
    }

    /// Advances to the next record and returns its type, `None` at the end of the part.
    pub(crate) fn next(&mut self) -> Result<Option<u16>, CandidateSheetError> {
        Ok(self.read()?.map(|(kind, _)| kind))
    }

    /// Reads the next record body into the buffer and returns its type and size.
    pub(crate) fn read(&mut self) -> Result<Option<(u16, usize)>, CandidateSheetError> {
        let Some(kind) = self.read_7bit_continuation_integer(2)? else {
            return Ok(None);
        };
        let size = self.read_7bit_continuation_integer(4)?
            .ok_or(Biff12Error::NoEnoughData(1, 0))?;
        if size > self.buffer.len() {
            self.buffer = vec![0u8; size];
        }
        self.reader.read_exact(&mut self.buffer[..size])?;
        self.size = size;

        Ok(Some((kind as u16, size)))
    }

    /// Skips forward to the `target` record, jumping over whole `(begin, end)` blocks listed in `skips`.
    /// Returns the size of the found record.
    pub(crate) fn find_with(&mut self, target: u16, skips: &[(u16, u16)]) -> Result<usize, CandidateSheetError> {
        let mut expected = target;
        while let Some((actual, size)) = self.read()? {
            if actual == expected && expected == target {
                return Ok(size);
            } else if actual == expected {
                expected = target;
            } else if expected == target {
                if let Some((_, ending)) = skips.iter().find(|(beginning, _)| actual == *beginning) {
                    expected = *ending;
                }
            }
        }
        Err(Biff12Error::RecordNotFound(target))?
    }

    pub(crate) fn find(&mut self, target: u16) -> Result<usize, CandidateSheetError> {
        self.find_with(target, &[])
    }
}

#[macro_export]
macro_rules! match_biff12_record {
    ($reader:expr => { $($arms:tt)* }) => {
        while let Some(kind) = $reader.next()? {
            match kind {
                $($arms)*
                _ => (),
            }
        }
    };
}
