//! The candidate upload boundary: validates the submitted form, extracts the
//! spreadsheet and saves the resulting record.

use crate::candidate::StoredCandidate;
use crate::extractor::ExtractionError;
use crate::extractor::Extractor;
use crate::store::CandidateStore;
use crate::store::StoreError;
use thiserror::Error;
use tracing::error;
use tracing::info;

/// One submitted upload form.
#[derive(Clone, Debug, Default)]
pub struct UploadRequest {
    pub name: String,
    pub surname: String,
    pub excel_file: Option<Vec<u8>>,
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Name and Surname are required.")]
    MissingIdentity,

    #[error("Excel file is required.")]
    MissingFile,

    #[error("Failed to process candidate data: {0}")]
    Processing(#[source] ExtractionError),

    #[error("Failed to save candidate: {0}")]
    Store(#[source] StoreError),
}

impl UploadError {
    /// Whether the request itself was at fault (a 4xx answer), rather than the server.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, UploadError::Store(_))
    }
}

pub struct CandidateService<E, S> {
    extractor: E,
    store: S,
}

impl<E: Extractor, S: CandidateStore> CandidateService<E, S> {
    pub fn new(extractor: E, store: S) -> Self {
        Self { extractor, store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Handles one upload. Identity is checked before the file; nothing is
    /// extracted or saved unless both are present.
    pub fn upload(&self, request: UploadRequest) -> Result<StoredCandidate, UploadError> {
        if request.name.is_empty() || request.surname.is_empty() {
            return Err(UploadError::MissingIdentity);
        }
        let excel_file = match request.excel_file {
            Some(excel_file) if !excel_file.is_empty() => excel_file,
            _ => return Err(UploadError::MissingFile),
        };

        let record = self.extractor
            .extract(&request.name, &request.surname, excel_file)
            .inspect_err(|error| error!(%error, name = %request.name, surname = %request.surname, "candidate upload rejected"))
            .map_err(UploadError::Processing)?;
        let stored = self.store
            .save(record)
            .inspect_err(|error| error!(%error, "candidate could not be saved"))
            .map_err(UploadError::Store)?;
        info!(id = stored.id, "candidate uploaded");
        Ok(stored)
    }
}
