//! Command-line entry points.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::bank::BankMeta;
use crate::config::Settings;
use crate::credentials::CredentialStore;
use crate::llm_extract::LlmExtractor;
use crate::openrouter::OpenRouterClient;
use crate::pipeline::{self, Mode};
use crate::platform::Platform;
use crate::schema::QuestionBank;
use crate::server;

#[derive(Debug, Parser)]
#[command(name = "mocktest-platform", version, about = "Mock-test platform service and question extractor")]
pub struct Cli {
    /// Defaults to `serve`.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP service.
    Serve,

    /// Turn a PDF, text file or question sheet into question-bank JSON.
    Extract {
        input: PathBuf,
        output: PathBuf,
        #[arg(long)]
        subject: Option<String>,
        /// English title; defaults to the input file name.
        #[arg(long)]
        test_name: Option<String>,
        #[arg(long)]
        title_hi: Option<String>,
        /// Time limit in minutes; computed from the question count if absent.
        #[arg(long)]
        time: Option<u32>,
        /// Use the LLM instead of the pattern parser.
        #[arg(long)]
        ai: bool,
    },

    /// Store a question-bank JSON file as a new test.
    Import { bank: PathBuf },

    /// Reconcile the mirror store with the primary.
    Sync,
}

pub async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::from_env()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => server::serve(settings).await,
        Command::Extract {
            input,
            output,
            subject,
            test_name,
            title_hi,
            time,
            ai,
        } => {
            let meta = BankMeta {
                title_en: test_name.unwrap_or_default(),
                title_hi,
                subject: subject.unwrap_or_default(),
                time_limit_minutes: time,
                source: None,
            };
            extract(&settings, &input, &output, meta, ai).await
        }
        Command::Import { bank } => import(&settings, &bank).await,
        Command::Sync => {
            let platform = Platform::from_settings(&settings)?;
            let report = platform.sync().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

async fn extract(
    settings: &Settings,
    input: &Path,
    output: &Path,
    meta: BankMeta,
    ai: bool,
) -> Result<()> {
    let data = std::fs::read(input).with_context(|| format!("Failed to read {:?}", input))?;
    let filename = input.to_string_lossy();

    let (mode, llm) = if ai {
        let credentials = CredentialStore::open(settings.credential_path.clone())?;
        let client = match credentials.require() {
            Ok(key) => Some(OpenRouterClient::new(key)),
            Err(_) => OpenRouterClient::from_env(),
        };
        let llm = client.map(|c| LlmExtractor::new(c, settings.parser.llm_char_budget));
        (Mode::Ai, llm)
    } else {
        (Mode::Regex, None)
    };

    let extraction =
        pipeline::extract_document(&filename, &data, mode, meta, &settings.parser, llm.as_ref())
            .await?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(&extraction.bank)?;
    std::fs::write(output, json).with_context(|| format!("Failed to write {:?}", output))?;

    let bank = &extraction.bank;
    let undetected = bank.questions.iter().filter(|q| !q.answer_detected).count();
    info!("Wrote {:?}", output);
    println!(
        "{} questions, {} minutes, {} without a detected answer",
        bank.total_questions, bank.time_limit_minutes, undetected
    );
    Ok(())
}

async fn import(settings: &Settings, path: &Path) -> Result<()> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let bank: QuestionBank = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse question bank: {:?}", path))?;

    let platform = Platform::from_settings(settings)?;
    let test = platform.import_bank(bank).await?;
    println!("Imported test {} ({} questions)", test.id, test.total_questions);
    Ok(())
}
