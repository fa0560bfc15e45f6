use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use tokio::sync::watch;

use crate::browser::{BrowserSession, NoGate, OperatorGate, PlaywrightSession, StdinGate};
use crate::cli::PublishArgs;
use crate::config::{BrowserConfig, SearchConfig};
use crate::formats::{PublishOutcome, PublishReportRecord, TargetMapping, TranslatedRecord};
use crate::sites::{Destination, LocatorOverrides, PublishPlan};
use crate::store;

#[derive(Debug, Clone, Copy)]
pub enum StepAction<'a> {
    Click,
    Fill(&'a str),
}

pub async fn first_available(
    session: &mut dyn BrowserSession,
    candidates: &[String],
    action: StepAction<'_>,
    timeout: Duration,
) -> anyhow::Result<Option<usize>> {
    for (idx, locator) in candidates.iter().enumerate() {
        let matched = match action {
            StepAction::Click => session.click(locator, timeout).await?,
            StepAction::Fill(text) => session.fill(locator, text, timeout).await?,
        };
        if matched {
            tracing::debug!(locator = %locator, candidate = idx, "locator matched");
            return Ok(Some(idx));
        }
    }
    Ok(None)
}

pub struct Publisher {
    destination: Destination,
    plan: PublishPlan,
    session: Box<dyn BrowserSession>,
    candidate_timeout: Duration,
    posted: HashSet<String>,
}

impl Publisher {
    pub fn new(
        destination: Destination,
        plan: PublishPlan,
        session: Box<dyn BrowserSession>,
        candidate_timeout: Duration,
    ) -> Self {
        Self {
            destination,
            plan,
            session,
            candidate_timeout,
            posted: HashSet::new(),
        }
    }

    pub async fn login(&mut self, gate: &dyn OperatorGate, home_url: &str) -> anyhow::Result<()> {
        self.session
            .goto(home_url)
            .await
            .with_context(|| format!("open {} home page", self.destination.label()))?;
        gate.wait_until_ready(self.destination.label()).await
    }

    pub async fn publish(
        &mut self,
        record: &TranslatedRecord,
        mapping: &TargetMapping,
    ) -> PublishOutcome {
        let Some(target_url) = mapping.get(&record.subject_url) else {
            return PublishOutcome::SkippedNoMapping;
        };
        if record.comment_target.trim().is_empty() {
            return PublishOutcome::SkippedNoComment;
        }
        if self.posted.contains(&record.subject_url) {
            return PublishOutcome::SkippedDuplicate;
        }

        match self.replay(record, target_url).await {
            Ok(()) => {
                self.posted.insert(record.subject_url.clone());
                PublishOutcome::Posted
            }
            Err(err) => PublishOutcome::Failed(format!("{err:#}")),
        }
    }

    async fn replay(&mut self, record: &TranslatedRecord, target_url: &str) -> anyhow::Result<()> {
        let timeout = self.candidate_timeout;
        let session = self.session.as_mut();
        let plan = &self.plan;

        session.goto(target_url).await.context("navigate")?;

        if first_available(session, &plan.open_editor, StepAction::Click, timeout)
            .await
            .context("open editor")?
            .is_none()
        {
            tracing::debug!(target_url, "no editor link; assuming the editor is already on the page");
        }

        if let Some(rating) = self.destination.rating_scale().convert(record.rating) {
            let candidates = plan.rating_candidates(rating);
            if first_available(session, &candidates, StepAction::Click, timeout)
                .await
                .context("set rating")?
                .is_none()
            {
                tracing::warn!(
                    subject_url = %record.subject_url,
                    rating,
                    "rating control not found; posting without rating"
                );
            }
        }

        first_available(
            session,
            &plan.comment,
            StepAction::Fill(record.comment_target.trim()),
            timeout,
        )
        .await
        .context("set comment")?
        .ok_or_else(|| anyhow::anyhow!("comment field not found"))?;

        first_available(session, &plan.submit, StepAction::Click, timeout)
            .await
            .context("submit")?
            .ok_or_else(|| anyhow::anyhow!("submit button not found"))?;

        session.wait(plan.settle).await.context("settle after submit")?;
        Ok(())
    }

    pub async fn close(mut self) -> anyhow::Result<()> {
        self.session.close().await
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishSummary {
    pub posted: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl PublishSummary {
    pub fn record(&mut self, outcome: &PublishOutcome) {
        match outcome {
            PublishOutcome::Posted => self.posted += 1,
            PublishOutcome::Failed(_) => self.failed += 1,
            _ => self.skipped += 1,
        }
    }
}

pub struct ReportWriter {
    out: BufWriter<std::fs::File>,
}

impl ReportWriter {
    pub fn append(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create report dir: {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open publish report: {}", path.display()))?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    pub fn write(
        &mut self,
        destination: Destination,
        record: &TranslatedRecord,
        target_url: Option<&str>,
        outcome: &PublishOutcome,
    ) -> anyhow::Result<()> {
        let line = PublishReportRecord {
            destination: destination.label().to_owned(),
            subject_url: record.subject_url.clone(),
            target_url: target_url.map(str::to_owned),
            outcome: outcome.clone(),
            attempted_at: chrono::Utc::now().to_rfc3339(),
        };
        serde_json::to_writer(&mut self.out, &line).context("serialize report line")?;
        self.out.write_all(b"\n").context("write report newline")?;
        self.out.flush().context("flush publish report")?;
        Ok(())
    }
}

/// Raised by the first Ctrl-C of a publish run. The record in flight always
/// finishes; a second Ctrl-C exits the process.
#[derive(Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    pub fn on_ctrl_c() -> Self {
        let (tx, signal) = Self::channel();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            tracing::warn!("interrupt received; stopping after the current record (Ctrl-C again to abort)");
            let _ = tx.send(true);
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("second interrupt; aborting");
                std::process::exit(130);
            }
        });
        signal
    }

    pub fn is_raised(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once raised. Pends forever if the listener is gone.
    pub async fn raised(&mut self) {
        if self.rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Run the login gate unless a stop is raised first. `false` means stopped;
/// the interrupted session must then be dropped, not reused.
pub async fn login_or_stop(
    publisher: &mut Publisher,
    gate: &dyn OperatorGate,
    home_url: &str,
    stop: &mut StopSignal,
) -> anyhow::Result<bool> {
    if stop.is_raised() {
        return Ok(false);
    }
    tokio::select! {
        login = publisher.login(gate, home_url) => login.map(|()| true),
        () = stop.raised() => Ok(false),
    }
}

pub async fn publish_records(
    publisher: &mut Publisher,
    records: &[TranslatedRecord],
    mapping: &TargetMapping,
    stop: &StopSignal,
    report: &mut Option<ReportWriter>,
) -> anyhow::Result<PublishSummary> {
    let destination = publisher.destination;
    let mut summary = PublishSummary::default();
    let total = records.len();
    for (idx, record) in records.iter().enumerate() {
        if stop.is_raised() {
            tracing::warn!(
                destination = destination.label(),
                remaining = total - idx,
                "interrupted; stopping"
            );
            break;
        }

        let outcome = publisher.publish(record, mapping).await;
        match &outcome {
            PublishOutcome::Posted => {
                tracing::info!(subject_url = %record.subject_url, "posted");
            }
            PublishOutcome::Failed(reason) => {
                tracing::warn!(subject_url = %record.subject_url, reason = %reason, "publish failed");
            }
            skipped => {
                tracing::debug!(subject_url = %record.subject_url, outcome = ?skipped, "skipped");
            }
        }
        summary.record(&outcome);
        if let Some(report) = report.as_mut() {
            let target_url = mapping.get(&record.subject_url).map(String::as_str);
            report.write(destination, record, target_url, &outcome)?;
        }
        tracing::debug!(done = idx + 1, total, "publish: progress");
    }
    Ok(summary)
}

struct DestinationRun<'a> {
    destination: Destination,
    records: Vec<TranslatedRecord>,
    mapping: TargetMapping,
    plan: PublishPlan,
    home_url: &'a str,
}

async fn publish_destination(
    run: DestinationRun<'_>,
    browser: &BrowserConfig,
    search: &SearchConfig,
    candidate_timeout: Duration,
    stop: &mut StopSignal,
    report: &mut Option<ReportWriter>,
) -> anyhow::Result<PublishSummary> {
    let destination = run.destination;
    let profile = match destination {
        Destination::Goodreads => &browser.goodreads_profile,
        Destination::Imdb => &browser.imdb_profile,
    };
    let session = PlaywrightSession::launch(browser, profile, Some(&search.user_agent)).await?;
    let mut publisher = Publisher::new(destination, run.plan, Box::new(session), candidate_timeout);

    let gate: &dyn OperatorGate = if browser.wait_for_login {
        &StdinGate
    } else {
        &NoGate
    };
    if !login_or_stop(&mut publisher, gate, run.home_url, stop).await? {
        tracing::warn!(destination = destination.label(), "interrupted before login; dropping browser session");
        return Ok(PublishSummary::default());
    }

    let summary = publish_records(&mut publisher, &run.records, &run.mapping, stop, report).await?;

    if let Err(err) = publisher.close().await {
        tracing::warn!(error = %format!("{err:#}"), "closing browser failed");
    }
    Ok(summary)
}

pub async fn run(args: PublishArgs) -> anyhow::Result<()> {
    let browser = BrowserConfig::from_env();
    let search = SearchConfig::from_env();
    let input_dir = PathBuf::from(&args.input);
    let mappings_dir = PathBuf::from(&args.mappings);
    let candidate_timeout = Duration::from_millis(args.candidate_timeout_ms);

    let overrides: LocatorOverrides = match &args.locators {
        Some(path) => crate::sites::load_locator_overrides(Path::new(path))?,
        None => LocatorOverrides::new(),
    };
    let mut report = args
        .report
        .as_deref()
        .map(|path| ReportWriter::append(Path::new(path)))
        .transpose()?;

    let destinations = match args.only {
        Some(only) => vec![only],
        None => Destination::ALL.to_vec(),
    };

    let mut stop = StopSignal::on_ctrl_c();
    let mut attempted = false;
    for destination in destinations {
        if stop.is_raised() {
            break;
        }
        let mapping = store::read_mapping(&mappings_dir.join(destination.mapping_file()))?;
        if mapping.is_empty() {
            tracing::warn!(
                destination = destination.label(),
                "no mappings; run `resolve` first or fill the mapping file by hand"
            );
            continue;
        }
        let records: Vec<TranslatedRecord> =
            store::read_records(&input_dir.join(store::translated_file(destination.category())))?;

        let mut plan = destination.publish_plan();
        if let Some(extra) = overrides.get(&destination) {
            plan = plan.with_overrides(extra);
        }

        attempted = true;
        let summary = publish_destination(
            DestinationRun {
                destination,
                records,
                mapping,
                plan,
                home_url: destination.base_url(&search),
            },
            &browser,
            &search,
            candidate_timeout,
            &mut stop,
            &mut report,
        )
        .await
        .with_context(|| format!("publish to {}", destination.label()))?;

        tracing::info!(
            destination = destination.label(),
            posted = summary.posted,
            skipped = summary.skipped,
            failed = summary.failed,
            "publish summary"
        );
    }

    if !attempted {
        tracing::warn!("nothing to publish");
    }
    Ok(())
}
