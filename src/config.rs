//! Command line and environment configuration of the `candidate-sheet` binary.

use clap::Parser;
use clap::Subcommand;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "candidate-sheet")]
#[command(about = "Extract candidates from spreadsheets and list the stored records")]
#[command(version)]
pub struct Cli {
    /// JSON file holding the stored candidates
    #[arg(long, env = "CANDIDATE_SHEET_STORE", default_value = "candidates.json", global = true)]
    pub store: PathBuf,

    /// Candidates shown per page by `list`
    #[arg(long, env = "CANDIDATE_SHEET_PAGE_SIZE", default_value_t = 10, global = true)]
    pub page_size: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Read a candidate spreadsheet and store the combined record
    Upload {
        /// Candidate name
        #[arg(long, default_value = "")]
        name: String,

        /// Candidate surname
        #[arg(long, default_value = "")]
        surname: String,

        /// Spreadsheet (.xlsx, .xlsm, .xlsb, .xls or .ods)
        file: PathBuf,
    },

    /// Print one page of stored candidates
    List {
        /// Zero-based page index
        #[arg(long, default_value_t = 0)]
        page: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_upload() {
        let cli = Cli::try_parse_from([
            "candidate-sheet", "upload", "--name", "John", "--surname", "Doe", "cv.xlsx", "--store", "/tmp/c.json",
        ]).unwrap();
        assert_eq!(cli.store, PathBuf::from("/tmp/c.json"));
        match cli.command {
            Command::Upload { name, surname, file } => {
                assert_eq!((name.as_str(), surname.as_str()), ("John", "Doe"));
                assert_eq!(file, PathBuf::from("cv.xlsx"));
            }
            command => panic!("unexpected command {command:?}"),
        }
    }

    #[test]
    fn list_defaults_to_first_page() {
        let cli = Cli::try_parse_from(["candidate-sheet", "list"]).unwrap();
        assert!(matches!(cli.command, Command::List { page: 0 }));
        assert!(cli.page_size > 0);
    }

    #[test]
    fn upload_requires_a_file() {
        assert!(Cli::try_parse_from(["candidate-sheet", "upload", "--name", "John"]).is_err());
    }

    #[test]
    fn command_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
