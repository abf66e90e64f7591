use std::io::{self, Write};
use std::time::Instant;

use chrono::Local;
use log::{error, info, warn};

use crate::archive::{archive_capture, CaptureSummary};
use crate::classifier::Classifier;
use crate::config::PipelineConfig;
use crate::error::{ArgusError, Result};
use crate::feature_normalizer::normalize;
use crate::flow_extractor::{FlowBatch, FlowExtractor};
use crate::reporter::{utc_offset, ResultReporter, ResultRow};
use crate::supervisor::{LivenessProbe, ProcessSupervisor};

#[derive(Debug, Default)]
pub struct RunOutcome {
    pub flows: usize,
    pub predictions: Vec<ResultRow>,
    pub capture_error: Option<ArgusError>,
}

/// Normalizes a capture, classifies it and reports one row per flow.
///
/// Nothing is sent to the classifier for an empty capture.
pub fn classify_batch<C, W>(batch: &FlowBatch, classifier: &C, reporter: &mut ResultReporter<W>) -> Result<Vec<ResultRow>>
where
    C: Classifier + ?Sized,
    W: Write,
{
    let features = normalize(batch);
    print_traffic("[+] Processed Traffic: ", &features.to_flow_batch());
    if features.is_empty() {
        info!("No flows captured; skipping classification.");
        return Ok(Vec::new());
    }

    let labels = classifier.predict(&features)?;
    if labels.len() != features.len() {
        return Err(ArgusError::Model(format!(
            "model returned {} labels for {} samples",
            labels.len(),
            features.len()
        )));
    }

    labels
        .iter()
        .enumerate()
        .map(|(idx, label)| reporter.report(idx + 1, label))
        .collect()
}

fn print_traffic(title: &str, batch: &FlowBatch) {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let printed = writeln!(out, "{}", title).and_then(|_| batch.write_table(&mut out));
    if let Err(e) = printed {
        warn!("Failed to print traffic table: {}", e);
    }
}

pub struct Pipeline<C: Classifier, P: LivenessProbe> {
    config: PipelineConfig,
    supervisor: ProcessSupervisor<P>,
    extractor: FlowExtractor,
    classifier: C,
}

impl<C: Classifier, P: LivenessProbe> Pipeline<C, P> {
    pub fn new(config: PipelineConfig, supervisor: ProcessSupervisor<P>, classifier: C) -> Self {
        let extractor = FlowExtractor::new(config.ra_path.clone(), config.host.clone(), config.port);
        Self {
            config,
            supervisor,
            extractor,
            classifier,
        }
    }

    /// One full run: start argus, capture, classify, and always stop argus again.
    pub fn run(&mut self) -> Result<RunOutcome> {
        let port = self.config.port;
        let (already_running, started) =
            self.supervisor
                .start(&self.config.argus_path, &self.config.interface, port)?;

        let (handle, work) = if already_running {
            match started.pid() {
                Some(pid) => warn!("The argus server is running PID = {}.", pid),
                None => warn!("An argus server is already listening on port {}.", started.port()),
            }
            (started, self.capture_and_classify())
        } else {
            // The running handle may belong to a daemon that beat ours to the port.
            match self.supervisor.wait_until_running(port, self.config.start_timeout) {
                Ok(running) => (running, self.capture_and_classify()),
                Err(e) => (started, Err(e)),
            }
        };

        if !handle.is_owned() {
            info!("argus on port {} was not started by this run; using the shutdown command.", port);
        }
        let cleanup = self
            .supervisor
            .stop(&handle)
            .and_then(|_| self.supervisor.wait_until_stopped(handle, self.config.stop_timeout));

        match (work, cleanup) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Err(e), Ok(())) => Err(e),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Err(cleanup_err)) => {
                error!("Failed to stop argus: {}", cleanup_err);
                Err(e)
            }
        }
    }

    fn capture_and_classify(&mut self) -> Result<RunOutcome> {
        let duration = self.config.duration_secs;
        println!("{}", "-".repeat(100));
        info!("[+] Getting network flow of {} in {} seconds.", self.config.interface, duration);

        let started = Instant::now();
        let batch = match self.extractor.capture(duration) {
            Ok(batch) => batch,
            Err(e) => {
                error!("{}", e);
                return Ok(RunOutcome {
                    capture_error: Some(e),
                    ..RunOutcome::default()
                });
            }
        };

        CaptureSummary::from_batch(&batch, started.elapsed()).log();
        if !batch.header().is_empty() {
            if let Err(e) = archive_capture(&self.config.capture_dir, &batch, &Local::now()) {
                warn!("Failed to archive capture: {}", e);
            }
        }

        println!("{}", "-".repeat(100));
        print_traffic(" [+] Initial Traffic: ", &batch);
        println!("{}", "-".repeat(100));

        let zone = utc_offset(self.config.utc_offset_hours)?;
        let mut reporter = ResultReporter::create(&self.config.results_path, zone)?;
        let predictions = classify_batch(&batch, &self.classifier, &mut reporter)?;
        reporter.into_inner()?;

        Ok(RunOutcome {
            flows: batch.len(),
            predictions,
            capture_error: None,
        })
    }
}
