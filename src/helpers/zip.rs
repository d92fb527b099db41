//! ZIP archive access for the `.xlsx`, `.xlsb` and `.ods` containers.

use crate::error::CandidateSheetError;
use crate::helpers::biff12::Biff12Reader;
use crate::helpers::xml::XmlReader;
use std::io::BufReader;
use std::io::Read;
use std::io::Seek;
use zip::read::ZipFile;
use zip::result::ZipError;
use zip::ZipArchive;

pub(crate) trait ZipHelper<RS: Read + Seek> {
    /// Gets an entry by name, ignoring ASCII case and backslash separators.
    fn file(&'_ mut self, name: &str) -> Result<Option<ZipFile<'_, RS>>, CandidateSheetError>;

    /// Checks whether an entry exists without opening it.
    fn contains(&self, name: &str) -> bool;

    fn xml_reader(
        &'_ mut self,
        name: &str,
    ) -> Result<Option<XmlReader<BufReader<ZipFile<'_, RS>>>>, CandidateSheetError>;

    fn biff_reader(
        &'_ mut self,
        name: &str,
    ) -> Result<Option<Biff12Reader<BufReader<ZipFile<'_, RS>>>>, CandidateSheetError>;
}

impl<RS: Read + Seek> ZipHelper<RS> for ZipArchive<RS> {
    fn file(&'_ mut self, name: &str) -> Result<Option<ZipFile<'_, RS>>, CandidateSheetError> {
        let pattern = name.replace('\\', "/");
        let path = self.file_names()
            .find(|file_name| pattern.eq_ignore_ascii_case(file_name))
            .map(|file_name| file_name.to_owned());
        match path.map(|file_name| self.by_name(&file_name)).transpose() {
            Ok(Some(file)) => Ok(Some(file)),
            Ok(None) | Err(ZipError::FileNotFound) => Ok(None),
            Err(error) => Err(error)?,
        }
    }

    fn contains(&self, name: &str) -> bool {
        let pattern = name.replace('\\', "/");
        self.file_names().any(|file_name| pattern.eq_ignore_ascii_case(file_name))
    }

    fn xml_reader(
        &'_ mut self,
        name: &str,
    ) -> Result<Option<XmlReader<BufReader<ZipFile<'_, RS>>>>, CandidateSheetError> {
        let reader = self
            .file(name)?
            .map(|file| XmlReader::new(BufReader::new(file)));
        Ok(reader)
    }

    fn biff_reader(
        &'_ mut self,
        name: &str,
    ) -> Result<Option<Biff12Reader<BufReader<ZipFile<'_, RS>>>>, CandidateSheetError> {
        let reader = self
            .file(name)?
            .map(|file| Biff12Reader::new(BufReader::new(file)));
        Ok(reader)
    }
}
