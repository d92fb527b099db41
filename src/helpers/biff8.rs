//! Binary Interchange File Format 8 (BIFF8), the record stream inside a legacy `.xls` workbook.
//! Records spill into `CONTINUE` records once they exceed 8224 bytes; the reader stitches
//! those chunks together so callers read each record as one logical stream.

use crate::error::CandidateSheetError;
use crate::helpers::string::to_f64;
use crate::helpers::string::to_u16;
use crate::helpers::string::to_u32;
use crate::helpers::string::to_u64;
use crate::helpers::string::to_usize;
use encoding_rs::Encoding;
use encoding_rs::UTF_16LE;
use thiserror::Error;

const CONTINUE: u16 = 60;

#[derive(Error, Debug)]
pub enum Biff8Error {
    #[error("Fewer than {0} bytes remaining")]
    NoEnoughDataError(usize),
}

pub(crate) struct Biff8Reader {
    /// Code page of the workbook, used for compressed (8-bit) strings when it is a single-byte one.
    pub(crate) encoding: Option<&'static Encoding>,
    buffer: Vec<u8>,
    pointer: usize,
    chunks: Vec<(usize, usize)>,
    index: usize,
    offset: usize,
}

impl Biff8Reader {
    pub(crate) fn new(data: Vec<u8>) -> Biff8Reader {
        Biff8Reader {
            encoding: None,
            buffer: data,
            pointer: 0,
            chunks: Vec::new(),
            index: 0,
            offset: 0,
        }
    }

    /// Moves to the next record and returns its type, `None` once the stream is exhausted.
    pub(crate) fn next(&mut self) -> Result<Option<u16>, CandidateSheetError> {
        if self.pointer + 4 > self.buffer.len() {
            return Ok(None);
        }

        self.index = 0;
        self.offset = 0;
        self.chunks.clear();

        let kind = self.get_u16_at(self.pointer)?;
        self.push_chunk()?;
        while self.pointer + 4 <= self.buffer.len() && self.get_u16_at(self.pointer)? == CONTINUE {
            self.push_chunk()?;
        }

        Ok(Some(kind))
    }

    /// Registers the record body at the pointer as a chunk, clamped to the stream end.
    fn push_chunk(&mut self) -> Result<(), CandidateSheetError> {
        let size = self.get_u16_at(self.pointer + 2)? as usize;
        let lower = self.pointer + 4;
        let upper = (lower + size).min(self.buffer.len());
        self.pointer = lower + size;
        self.chunks.push((lower, upper));
        Ok(())
    }

    /// Repositions the reader at an absolute stream offset, such as a sheet's `BOF`.
    pub(crate) fn goto(&mut self, pointer: usize) {
        self.pointer = pointer;
        self.chunks.clear();
    }

    fn read_extract(&mut self, length: usize) -> Result<&[u8], CandidateSheetError> {
        let (data, size) = self.read(length);
        if size == length {
            Ok(data)
        } else {
            Err(Biff8Error::NoEnoughDataError(length))?
        }
    }

    /// Reads up to `length` bytes without crossing into the next chunk.
    fn read(&mut self, length: usize) -> (&[u8], usize) {
        if let Some((lower, upper)) = self.chunks.get(self.index) {
            let (lower, upper) = (*lower, *upper);
            let source = upper.min(lower + self.offset);
            let target = upper.min(source + length);
            let size = target - source;
            if source < upper {
                if target == upper {
                    self.index += 1;
                    self.offset = 0;
                } else {
                    self.offset += size;
                }
                return (&self.buffer[source..target], size);
            }
        }
        (&[], 0)
    }

    pub(crate) fn skip(&mut self, length: usize) -> Result<(), CandidateSheetError> {
        let mut remaining = length;
        while remaining > 0 {
            let (_, size) = self.read(remaining);
            if size == 0 {
                Err(Biff8Error::NoEnoughDataError(length))?;
            }
            remaining -= size;
        }
        Ok(())
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, CandidateSheetError> {
        self.read_extract(1).map(|data| data[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, CandidateSheetError> {
        self.read_extract(2).map(to_u16)
    }

    /// Gets a u16 counted back from the end of the current record.
    pub(crate) fn get_u16_back(&self, offset: usize) -> Result<u16, CandidateSheetError> {
        let mut offset = offset;
        for (lower, upper) in self.chunks.iter().rev() {
            if *lower + offset <= *upper {
                return self.get_u16_at(*upper - offset);
            }
            offset -= *upper - *lower;
        }
        Err(Biff8Error::NoEnoughDataError(2))?
    }

    pub(crate) fn get_u16_at(&self, index: usize) -> Result<u16, CandidateSheetError> {
        if index + 2 <= self.buffer.len() {
            Ok(to_u16(&self.buffer[index..index + 2]))
        } else {
            Err(Biff8Error::NoEnoughDataError(2))?
        }
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, CandidateSheetError> {
        self.read_extract(4).map(to_u32)
    }

    pub(crate) fn read_usize(&mut self) -> Result<usize, CandidateSheetError> {
        self.read_extract(4).map(to_usize)
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, CandidateSheetError> {
        self.read_extract(8).map(to_u64)
    }

    pub(crate) fn read_f64(&mut self) -> Result<f64, CandidateSheetError> {
        self.read_extract(8).map(to_f64)
    }

    /// Reads an RK value: a 30-bit integer or the high 30 bits of a double,
    /// optionally scaled by 1/100.
    pub(crate) fn read_rk_number(&mut self) -> Result<String, CandidateSheetError> {
        let value = self.read_u32()?;
        Ok(rk_to_string(value))
    }

    /// Reads a `ShortXLUnicodeString` (8-bit character count).
    pub(crate) fn read_short_xl_unicode_string(&mut self) -> Result<String, CandidateSheetError> {
        let mut string = String::new();
        let chars = self.read_u8()? as usize;
        self.read_string_into(chars, false, &mut string)?;
        Ok(string)
    }

    /// Reads an `XLUnicodeString` (16-bit character count).
    pub(crate) fn read_xl_unicode_string(&mut self) -> Result<String, CandidateSheetError> {
        let mut string = String::new();
        let chars = self.read_u16()? as usize;
        self.read_string_into(chars, false, &mut string)?;
        Ok(string)
    }

    /// Reads an `XLUnicodeRichExtendedString`, the shared string table entry.
    /// The character data may continue in the next chunk with a fresh option byte.
    pub(crate) fn read_xl_unicode_rich_extended_string(&mut self) -> Result<String, CandidateSheetError> {
        let mut string = String::new();
        let mut expected = self.read_u16()? as usize;
        let mut actual = self.read_string_into(expected, true, &mut string)?;
        while actual < expected {
            if actual == 0 && self.index >= self.chunks.len() {
                Err(Biff8Error::NoEnoughDataError(expected))?;
            }
            expected -= actual;
            actual = self.read_string_into(expected, false, &mut string)?;
        }
        Ok(string)
    }

    fn read_string_into(&mut self, chars: usize, is_extend: bool, content: &mut String) -> Result<usize, CandidateSheetError> {
        let encoding = self.encoding;
        let flag = self.read_u8()?;
        let is_high_byte = (flag & 0x1) > 0;
        let expected = if is_high_byte { chars << 1 } else { chars };
        let rich_string_count = if is_extend && (flag & 0x8) > 0 {
            self.read_u16()? as usize
        } else {
            0
        };
        let phonetic_count = if is_extend && (flag & 0x4) > 0 {
            self.read_usize()?
        } else {
            0
        };
        let (bytes, actual) = self.read(expected);
        if is_high_byte {
            let (string, _) = UTF_16LE.decode_without_bom_handling(bytes);
            content.push_str(&string);
        } else if let Some(encoding) = encoding.filter(|encoding| encoding.is_single_byte()) {
            let (string, _) = encoding.decode_without_bom_handling(bytes);
            content.push_str(&string);
        } else {
            // Compressed strings keep only the low byte of each UTF-16 unit.
            content.extend(bytes.iter().map(|byte| *byte as char));
        }
        // rgRun
        self.skip(4 * rich_string_count)?;
        // ExtRst
        self.skip(phonetic_count)?;
        Ok(if is_high_byte { actual >> 1 } else { actual })
    }
}

pub(crate) fn rk_to_string(value: u32) -> String {
    let is_percentage = (value & 0x01) != 0;
    let is_integer = (value & 0x02) != 0;

    let mut number = if is_integer {
        ((value as i32) >> 2) as f64
    } else {
        f64::from_bits(((value & 0xFFFF_FFFC) as u64) << 32)
    };
    if is_percentage {
        number /= 100.0;
    }
    if is_integer && !is_percentage {
        (number as i64).to_string()
    } else {
        number.to_string()
    }
}

#[macro_export]
macro_rules! match_biff8_record {
    ($reader:expr => { $($arms:tt)* }) => {
        while let Some(kind) = $reader.next()? {
            match kind {
                $($arms)*
                _ => (),
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: u16, body: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend(kind.to_le_bytes());
        bytes.extend((body.len() as u16).to_le_bytes());
        bytes.extend(body);
        bytes
    }

    #[test]
    fn reads_every_record_including_the_last() {
        let mut stream = record(2057, &[0, 6]);
        stream.extend(record(10, &[]));
        let mut reader = Biff8Reader::new(stream);
        assert_eq!(reader.next().unwrap(), Some(2057));
        assert_eq!(reader.read_u16().unwrap(), 0x0600);
        assert_eq!(reader.next().unwrap(), Some(10));
        assert_eq!(reader.next().unwrap(), None);
    }

    #[test]
    fn stitches_continue_records() {
        // "Hello" split across a CONTINUE boundary, compressed on both sides.
        let mut stream = record(252, &[5, 0, 0, b'H', b'e']);
        stream.extend(record(CONTINUE, &[0, b'l', b'l', b'o']));
        let mut reader = Biff8Reader::new(stream);
        assert_eq!(reader.next().unwrap(), Some(252));
        assert_eq!(reader.read_xl_unicode_rich_extended_string().unwrap(), "Hello");
        assert_eq!(reader.next().unwrap(), None);
    }

    #[test]
    fn decodes_wide_and_short_strings() {
        let mut body = vec![2u8, 1];
        body.extend("Sí".encode_utf16().flat_map(u16::to_le_bytes));
        let mut stream = record(133, &body);
        stream.extend(record(516, &[3, 0, 0, b'a', b'b', b'c']));
        let mut reader = Biff8Reader::new(stream);
        reader.next().unwrap();
        assert_eq!(reader.read_short_xl_unicode_string().unwrap(), "Sí");
        reader.next().unwrap();
        assert_eq!(reader.read_xl_unicode_string().unwrap(), "abc");
    }

    #[test]
    fn reports_short_record() {
        let mut reader = Biff8Reader::new(record(515, &[1, 2]));
        reader.next().unwrap();
        assert!(reader.read_u32().is_err());
    }

    #[test]
    fn reads_value_from_record_end() {
        let mut reader = Biff8Reader::new(record(189, &[1, 0, 2, 0, 9, 0, 7, 0]));
        reader.next().unwrap();
        assert_eq!(reader.get_u16_back(2).unwrap(), 7);
    }

    #[test]
    fn decodes_rk_numbers() {
        assert_eq!(rk_to_string((5 << 2) | 0x02), "5");
        assert_eq!(rk_to_string(((-3i32 << 2) as u32) | 0x02), "-3");
        assert_eq!(rk_to_string((150 << 2) | 0x03), "1.5");
        let bits = (1.25f64.to_bits() >> 32) as u32;
        assert_eq!(rk_to_string(bits & 0xFFFF_FFFC), "1.25");
    }
}
