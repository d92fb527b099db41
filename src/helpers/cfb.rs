//! OLE Compound File Binary (CFB) container used by legacy `.xls` workbooks
//! and by password protected OOXML packages.

use crate::error::CandidateSheetError;
use crate::helpers::string::to_u16;
use crate::helpers::string::to_u64;
use crate::helpers::string::to_usize;
use crate::helpers::string::to_usize_iter;
use encoding_rs::UTF_16LE;
use std::collections::HashMap;
use thiserror::Error;

const MAX_REG_SECT: usize = 0xFFFFFFFB;
const HEADER_SIZE: usize = 512;
const MINI_STREAM_CUTOFF: usize = 4096;
const MINI_SECTOR_SIZE: usize = 64;

pub(crate) const SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

#[derive(Error, Debug)]
pub enum CfbError {
    #[error("The file is corrupted or has an invalid CFB structure")]
    FileFormatError,

    #[error("Invalid OLE signature (not an office document?)")]
    OleSignatureError,

    #[error("Invalid Sector size '2 ^ {1}' for major version '{0}'")]
    SectorSizeError(u16, u16),

    #[error("The number of double indirect file allocation table error: expect '{0}', actual '{1}'")]
    DoubleIndirectFileAllocationTableError(usize, usize),

    #[error("The number of file allocation table error: expect '{0}', actual '{1}'")]
    FileAllocationTableError(usize, usize),

    #[error("Empty Root directory")]
    RootDirectoryError,
}

/// In-memory compound file: directory entries by name plus both sector tables.
pub(crate) struct Cfb {
    directories: HashMap<String, Directory>,
    file_allocation_table: Vec<usize>,
    sectors: Sectors,
    mini_file_allocation_table: Vec<usize>,
    mini_sectors: Sectors,
}

impl Cfb {
    pub(crate) fn new(data: Vec<u8>) -> Result<Cfb, CandidateSheetError> {
        if data.len() < HEADER_SIZE {
            Err(CfbError::FileFormatError)?;
        }
        let header = Header::new(&data[..HEADER_SIZE])?;
        let size = header.sector_size()?;
        let sectors = Sectors { data, size, offset: size };
        let file_allocation_table = Self::load_file_allocation_table(&sectors, &header)?;
        let directories = Self::load_directories(&file_allocation_table, &sectors, header.directory_shift)?;
        let mini_file_allocation_table = Self::load_mini_file_allocation_table(&file_allocation_table, &sectors, &header)?;
        let mini_sectors = match directories.get("Root Entry") {
            Some(root) => Self::load_mini_sectors(&file_allocation_table, &sectors, root)?,
            None => Sectors { data: Vec::new(), size: MINI_SECTOR_SIZE, offset: 0 },
        };

        Ok(Cfb {
            directories,
            file_allocation_table,
            sectors,
            mini_file_allocation_table,
            mini_sectors,
        })
    }

    pub(crate) fn exists(&self, name: &str) -> bool {
        self.directories.contains_key(name)
    }

    /// Reads a whole stream, following the mini FAT for streams under 4096 bytes.
    pub(crate) fn read(&self, name: &str) -> Result<Option<Vec<u8>>, CandidateSheetError> {
        let Some(directory) = self.directories.get(name) else {
            return Ok(None);
        };
        let mut bytes = if directory.count < MINI_STREAM_CUTOFF {
            Self::read_bytes(&self.mini_file_allocation_table, &self.mini_sectors, directory.index)?
        } else {
            Self::read_bytes(&self.file_allocation_table, &self.sectors, directory.index)?
        };
        bytes.truncate(directory.count);
        Ok(Some(bytes))
    }

    fn load_file_allocation_table(sectors: &Sectors, header: &Header) -> Result<Vec<usize>, CandidateSheetError> {
        let mut double_indirect_file_allocation_table: Vec<usize> = to_usize_iter(&sectors.data[76..HEADER_SIZE]).collect();

        let mut count = 0usize;
        let mut index = header.double_indirect_file_allocation_table_shift;
        while index < MAX_REG_SECT {
            if count > header.double_indirect_file_allocation_table_count {
                Err(CfbError::FileFormatError)?;
            }
            double_indirect_file_allocation_table.extend(to_usize_iter(sectors.get(index)?));
            index = double_indirect_file_allocation_table.pop().ok_or(CfbError::FileFormatError)?;
            count += 1;
        }
        if count != header.double_indirect_file_allocation_table_count {
            Err(CfbError::DoubleIndirectFileAllocationTableError(header.double_indirect_file_allocation_table_count, count))?
        }

        let mut file_allocation_table: Vec<usize> = Vec::new();
        let mut count = 0usize;
        for index in double_indirect_file_allocation_table {
            if index < MAX_REG_SECT {
                file_allocation_table.extend(to_usize_iter(sectors.get(index)?));
                count += 1;
            }
        }
        if count != header.file_allocation_table_count {
            Err(CfbError::FileAllocationTableError(header.file_allocation_table_count, count))?
        }

        Ok(file_allocation_table)
    }

    fn load_directories(file_allocation_table: &[usize], sectors: &Sectors, index: usize) -> Result<HashMap<String, Directory>, CandidateSheetError> {
        let bytes = Self::read_bytes(file_allocation_table, sectors, index)?;
        let directories: HashMap<String, Directory> = bytes.chunks_exact(128).map(Directory::new).collect();
        if directories.is_empty() {
            Err(CfbError::RootDirectoryError)?
        }
        Ok(directories)
    }

    fn load_mini_file_allocation_table(file_allocation_table: &[usize], sectors: &Sectors, header: &Header) -> Result<Vec<usize>, CandidateSheetError> {
        Ok(if header.mini_file_allocation_table_sector_count > 0 {
            let bytes = Self::read_bytes(file_allocation_table, sectors, header.mini_file_allocation_table_sector_shift)?;
            to_usize_iter(&bytes).collect()
        } else {
            Vec::new()
        })
    }

    /// The mini stream lives in the root entry's regular sector chain.
    fn load_mini_sectors(file_allocation_table: &[usize], sectors: &Sectors, root: &Directory) -> Result<Sectors, CandidateSheetError> {
        let mut data = Self::read_bytes(file_allocation_table, sectors, root.index)?;
        data.truncate(root.count);
        Ok(Sectors { data, size: MINI_SECTOR_SIZE, offset: 0 })
    }

    fn read_bytes(file_allocation_table: &[usize], sectors: &Sectors, index: usize) -> Result<Vec<u8>, CandidateSheetError> {
        let mut content: Vec<u8> = Vec::new();
        let mut index = index;
        let mut visited = 0usize;
        while index < MAX_REG_SECT {
            // A chain longer than the table itself must contain a cycle.
            visited += 1;
            if visited > file_allocation_table.len() {
                Err(CfbError::FileFormatError)?;
            }
            content.extend_from_slice(sectors.get(index)?);
            index = *file_allocation_table.get(index).ok_or(CfbError::FileFormatError)?;
        }
        Ok(content)
    }
}

#[derive(Debug)]
struct Sectors {
    data: Vec<u8>,
    size: usize,
    /// Bytes before sector 0: the header for regular sectors, nothing for mini sectors.
    offset: usize,
}

impl Sectors {
    fn get(&self, index: usize) -> Result<&[u8], CandidateSheetError> {
        let source = index
            .checked_mul(self.size)
            .and_then(|start| start.checked_add(self.offset))
            .ok_or(CfbError::FileFormatError)?;
        if source >= self.data.len() {
            Err(CfbError::FileFormatError)?;
        }
        let target = self.data.len().min(source + self.size);
        Ok(&self.data[source..target])
    }
}

#[derive(Debug)]
struct Header {
    signature: u64,
    major_version: u16,
    sector_shift: u16,
    file_allocation_table_count: usize,
    directory_shift: usize,
    mini_file_allocation_table_sector_shift: usize,
    mini_file_allocation_table_sector_count: usize,
    double_indirect_file_allocation_table_shift: usize,
    double_indirect_file_allocation_table_count: usize,
}

impl Header {
    fn new(data: &[u8]) -> Result<Self, CandidateSheetError> {
        let header = Header {
            signature: to_u64(&data[0..8]),
            major_version: to_u16(&data[26..28]),
            sector_shift: to_u16(&data[30..32]),
            file_allocation_table_count: to_usize(&data[44..48]),
            directory_shift: to_usize(&data[48..52]),
            mini_file_allocation_table_sector_shift: to_usize(&data[60..64]),
            mini_file_allocation_table_sector_count: to_usize(&data[64..68]),
            double_indirect_file_allocation_table_shift: to_usize(&data[68..72]),
            double_indirect_file_allocation_table_count: to_usize(&data[72..76]),
        };

        if header.signature != u64::from_le_bytes(SIGNATURE) {
            Err(CfbError::OleSignatureError)?;
        }

        Ok(header)
    }

    fn sector_size(&self) -> Result<usize, CandidateSheetError> {
        match (self.major_version, self.sector_shift) {
            (3, 0x0009) => Ok(512),
            // Version 4 pads the 512 byte header with zeroes up to a full sector.
            (4, 0x000C) => Ok(4096),
            _ => Err(CfbError::SectorSizeError(self.major_version, self.sector_shift))?,
        }
    }
}

#[derive(Debug)]
struct Directory {
    index: usize,
    count: usize,
}

impl Directory {
    fn new(bytes: &[u8]) -> (String, Directory) {
        let size = (to_u16(&bytes[64..66]) as usize).min(64);
        let (name, _, _) = UTF_16LE.decode(&bytes[..size]);
        let name = match name.find('\0') {
            Some(position) => name[..position].to_owned(),
            None => name.to_string(),
        };

        let index = to_usize(&bytes[116..120]);
        let count = to_u64(&bytes[120..128]) as usize;
        (name, Directory { index, count })
    }
}
