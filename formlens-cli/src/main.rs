use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use formlens_core::pipeline::HybridPipeline;
use formlens_worker::models::Document;
use formlens_worker::settings::{DetectionArgs, StorageArgs};
use formlens_worker::{init_tracing, ProcessOptions, Processor};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Formlens - hybrid PDF form-field detection",
    long_about = "Formlens locates fillable form regions in PDF documents by fusing native \
PDF structure, raster geometry and vision-LLM detections into one prioritized field list."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the detection pipeline over an imported document
    Process {
        /// Document id (UUID)
        document_id: String,

        /// Re-process even if the document was already processed
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        debug: bool,

        #[command(flatten)]
        detection: DetectionArgs,

        #[command(flatten)]
        storage: StorageArgs,
    },

    /// Register a local PDF as a new document
    Import {
        /// Path to the PDF file
        pdf_path: PathBuf,

        /// Owning user id; a fresh one is generated when omitted
        #[arg(long)]
        user_id: Option<Uuid>,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        debug: bool,

        #[command(flatten)]
        storage: StorageArgs,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match Cli::parse().command {
        Command::Process {
            document_id,
            force,
            debug,
            detection,
            storage,
        } => {
            init_tracing(debug);
            run_process(&document_id, force, detection, storage).await
        }
        Command::Import {
            pdf_path,
            user_id,
            debug,
            storage,
        } => {
            init_tracing(debug);
            run_import(&pdf_path, user_id, storage).await
        }
    }
}

async fn run_process(
    document_id: &str,
    force: bool,
    detection: DetectionArgs,
    storage_args: StorageArgs,
) -> ExitCode {
    let store = match storage_args.open_store() {
        Ok(store) => Arc::new(store),
        Err(e) => return fail(&format!("cannot open database: {e}")),
    };
    let storage = storage_args.storage();
    let pipeline = Arc::new(HybridPipeline::new(detection.pipeline_config()));
    let processor = Processor::new(store, storage, pipeline);

    match processor.process(document_id, ProcessOptions { force }).await {
        Ok(outcome) => {
            println!("{}", serde_json::to_string_pretty(&outcome).unwrap());
            println!(
                "{} {} fields found across {} pages",
                "✓".green().bold(),
                outcome.fields_found,
                outcome.page_count
            );
            ExitCode::SUCCESS
        }
        Err(e) => fail(&format!("processing failed: {:#}", anyhow::Error::from(e))),
    }
}

async fn run_import(
    pdf_path: &PathBuf,
    user_id: Option<Uuid>,
    storage_args: StorageArgs,
) -> ExitCode {
    let store = match storage_args.open_store() {
        Ok(store) => Arc::new(store),
        Err(e) => return fail(&format!("cannot open database: {e}")),
    };
    let storage = storage_args.storage();

    let bytes = match std::fs::read(pdf_path) {
        Ok(bytes) => bytes,
        Err(e) => return fail(&format!("cannot read {}: {e}", pdf_path.display())),
    };
    let fingerprint = format!("{:x}", Sha256::digest(&bytes));

    let file_name = pdf_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("document.pdf")
        .to_string();

    let doc = Document::new_imported(
        user_id.unwrap_or_else(Uuid::new_v4),
        file_name,
        "application/pdf",
        format!("originals/{}.pdf", Uuid::new_v4()),
        Some(fingerprint),
    );

    if let Err(e) = storage
        .upload(pdf_path, &doc.storage_key_original, "application/pdf")
        .await
    {
        return fail(&format!("upload failed: {:#}", anyhow::Error::from(e)));
    }
    if let Err(e) = store.insert_document(&doc) {
        return fail(&format!("cannot record document: {:#}", anyhow::Error::from(e)));
    }

    println!(
        "{}",
        serde_json::json!({
            "document_id": doc.id.to_string(),
            "status": doc.status.as_str(),
            "storage_key_original": doc.storage_key_original,
            "hash_fingerprint": doc.hash_fingerprint,
        })
    );
    println!(
        "{} imported as document {}",
        "✓".green().bold(),
        doc.id.to_string().cyan()
    );
    ExitCode::SUCCESS
}

fn fail(message: &str) -> ExitCode {
    eprintln!("{} {message}", "✗".red().bold());
    ExitCode::from(1)
}
