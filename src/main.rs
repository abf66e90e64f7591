use std::io::Write;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

mod archive;
mod classifier;
mod config;
mod error;
mod feature_normalizer;
mod flow_extractor;
mod pipeline;
mod reporter;
mod supervisor;

use classifier::JoblibClassifier;
use config::{Args, PipelineConfig};
use error::Result;
use pipeline::{Pipeline, RunOutcome};
use supervisor::ProcessSupervisor;

const APP_NAME: &str = "ArgusIDS";

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info,argus_ids=debug"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}][{}][{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                APP_NAME,
                record.level(),
                record.args()
            )
        })
        .init();
}

fn run(config: PipelineConfig) -> Result<RunOutcome> {
    config.validate()?;

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            println!("\nCtrl+C received, shutting down...");
            cancel.store(true, Ordering::SeqCst);
        })?;
    }

    info!("Loading trained model from {}...", config.model_path.display());
    let classifier = JoblibClassifier::load(&config.model_path)?;
    info!("Model loaded successfully!");

    let supervisor = ProcessSupervisor::new(config.poll_interval, config.shutdown_command.clone(), cancel);
    let mut pipeline = Pipeline::new(config, supervisor, classifier);
    pipeline.run()
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging();

    match run(PipelineConfig::from(&args)) {
        Ok(outcome) => match outcome.capture_error {
            Some(e) if e.is_capture_error() => ExitCode::from(2),
            Some(_) => ExitCode::FAILURE,
            None => {
                info!("Classified {} of {} captured flows.", outcome.predictions.len(), outcome.flows);
                ExitCode::SUCCESS
            }
        },
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
