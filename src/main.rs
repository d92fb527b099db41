use anyhow::Context;
use anyhow::Result;
use candidate_sheet::config::Cli;
use candidate_sheet::config::Command;
use candidate_sheet::extractor::SheetExtractor;
use candidate_sheet::store::CandidateStore;
use candidate_sheet::store::JsonFileStore;
use candidate_sheet::table;
use candidate_sheet::upload::CandidateService;
use candidate_sheet::upload::UploadRequest;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "candidate_sheet=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let service = CandidateService::new(SheetExtractor, JsonFileStore::new(&cli.store));
    match cli.command {
        Command::Upload { name, surname, file } => {
            let excel_file = std::fs::read(&file)
                .with_context(|| format!("Failed to read spreadsheet '{}'", file.display()))?;
            let stored = service.upload(UploadRequest {
                name,
                surname,
                excel_file: Some(excel_file),
            })?;
            let json = serde_json::to_string_pretty(&stored).context("Failed to serialize candidate")?;
            println!("{json}");
        }
        Command::List { page } => {
            let candidates = service.store().all()?;
            let page = table::paginate(candidates, page, cli.page_size);
            print!("{}", table::render(&page));
        }
    }
    Ok(())
}
