//! # Candidate Sheet
//!
//! Reads a recruiter's candidate spreadsheet and combines it with the candidate's
//! name into a stored record.
//!
//! ## Features
//!
//! - **Multi-format support**: Excel workbooks (`.xlsx`, `.xlsm`, `.xlsb`, `.xls`)
//!   and OpenDocument spreadsheets (`.ods`), detected from the file content
//! - **Pure Rust implementation**: ZIP, XML, OLE compound file and BIFF decoding
//!   without native dependencies
//! - **Fixed layout**: the first worksheet's header row names the `Seniority`,
//!   `Years of experience` and `Availability` columns, the next row holds the values
//! - **Classified failures**: unreadable files, missing data rows and missing
//!   fields are distinct [`extractor::ExtractionError`] variants
//! - **Local persistence**: records are kept in memory or in a JSON file and
//!   listed page by page
//!
//! ## Example
//!
//! ```no_run
//! use candidate_sheet::extractor::extract;
//!
//! let bytes = std::fs::read("candidate.xlsx").unwrap();
//! let record = extract("John", "Doe", bytes).unwrap();
//! println!("{} {} is {}", record.name, record.surname, record.seniority);
//! ```

pub mod candidate;
pub mod config;
pub mod error;
pub mod extractor;
pub mod spreadsheet;
pub mod store;
pub mod table;
pub mod upload;

mod helpers;
