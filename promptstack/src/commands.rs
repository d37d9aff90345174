//! Command implementations.
//!
//! Every command runs as one future on the main task. Long waits (the
//! provider, the diff thread, stdin prompts) also watch the shutdown token so
//! a signal ends the command with `Error::Cancelled`.

use std::io::Write as _;
use std::path::Path;

use anyhow::Context;
use promptstack_core::apply::{HunkOutcome, PendingDecision, SkipReason};
use promptstack_core::context::Selection;
use promptstack_core::diff::parse_unified;
use promptstack_core::provider::{Provider, ReplayProvider};
use promptstack_core::tokens::{format_token_count, BudgetLevel};
use promptstack_core::types::{ContextCandidate, Diff};
use promptstack_core::{
    ApplicationRequest, ApplyReport, Document, Error, Pipeline, PipelineConfig, Resolution,
};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio_util::sync::CancellationToken;

use crate::cli::{
    ApplyArgs, ApplyOptions, BudgetArgs, Command, ContextArgs, DiffArgs, SuggestArgs,
};
use crate::event::{log_pipeline_event, spawn_pipeline_forwarder, AppEvent, EventHandler};
use crate::library;
use crate::render::types::{DiffPayload, DiffRequest, RenderStyle};
use crate::render::worker::diff_worker_loop;

pub async fn run(
    command: Command,
    config: PipelineConfig,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    match command {
        Command::Diff(args) => diff(args, config, &cancel).await,
        Command::Apply(args) => apply(args, config, &cancel).await,
        Command::Budget(args) => budget(args, config),
        Command::Suggest(args) => suggest(args, config, &cancel).await,
    }
}

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

/// A pipeline for commands that never call the provider.
fn offline_pipeline(config: PipelineConfig) -> anyhow::Result<Pipeline> {
    Ok(Pipeline::with_provider(config, Provider::Replay(ReplayProvider::default()))?)
}

async fn diff(
    args: DiffArgs,
    config: PipelineConfig,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let request = DiffRequest {
        original_label: args.original.display().to_string(),
        modified_label: args.modified.display().to_string(),
        original: read(&args.original)?,
        modified: read(&args.modified)?,
        style: if args.words {
            RenderStyle::Words
        } else {
            RenderStyle::Unified
        },
    };

    let EventHandler {
        tx: event_tx,
        mut rx,
    } = EventHandler::new();
    let (request_tx, request_rx) = crossbeam_channel::unbounded();
    let diff_config = config.diff.clone();
    std::thread::spawn(move || diff_worker_loop(diff_config, request_rx, event_tx));
    request_tx.send(request).context("diff worker stopped")?;
    drop(request_tx);

    let payload = loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(AppEvent::DiffReady(payload)) => break payload,
                Some(_) => {}
                None => anyhow::bail!("diff worker stopped without a result"),
            },
            _ = cancel.cancelled() => return Err(Error::Cancelled.into()),
        }
    };
    let DiffPayload { diff, rendered } = *payload;
    let stats = diff.stats();
    tracing::info!(
        hunks = stats.hunks,
        added = stats.added,
        removed = stats.removed,
        "diff ready"
    );
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(rendered.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

async fn apply(
    args: ApplyArgs,
    config: PipelineConfig,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let original = read(&args.document)?;
    let change = read(&args.change)?;
    let pipeline = offline_pipeline(config)?;
    let diff = if args.patch {
        parse_unified(&change, &original)
            .with_context(|| format!("parsing {}", args.change.display()))?
    } else {
        pipeline.generate_diff(&original, &change)
    };
    apply_to_file(&pipeline, &args.document, &original, diff, &args.options, cancel).await
}

fn budget(args: BudgetArgs, config: PipelineConfig) -> anyhow::Result<()> {
    let text = read(&args.document)?;
    let pipeline = offline_pipeline(config)?;
    let tokens = pipeline.token_budget();
    println!("{}", tokens.describe(tokens.check_composition(&text)));

    let (library, history) = load_context(&args.context)?;
    let selection = pipeline.selection(&text, &library, &history, &pipeline.context_budget()?);
    print_selection(&selection);
    if selection.exceeded() {
        anyhow::bail!(Error::BudgetExceeded {
            required: selection.mandatory_tokens,
            limit: selection.limit,
        });
    }
    Ok(())
}

async fn suggest(
    args: SuggestArgs,
    config: PipelineConfig,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let text = read(&args.document)?;
    let pipeline = Pipeline::new(config).context("building the pipeline")?;

    let tokens = pipeline.token_budget();
    let status = tokens.check_composition(&text);
    match status.level {
        BudgetLevel::Blocked => anyhow::bail!(tokens.describe(status)),
        BudgetLevel::Warning => tracing::warn!("{}", tokens.describe(status)),
        BudgetLevel::Ok => {}
    }

    let (library, history) = load_context(&args.context)?;
    let budget = pipeline.context_budget()?;
    let context = pipeline.select_context(&text, &library, &history, &budget)?;
    let outcome = pipeline.request_suggestions(&context, &text, cancel).await?;
    for defect in &outcome.defects {
        tracing::warn!(
            index = defect.index,
            kind = ?defect.kind,
            detail = %defect.detail,
            "skipped part of the response"
        );
    }

    if let Some(summary) = &outcome.summary {
        println!("{summary}\n");
    }
    let mut diffs = Vec::with_capacity(outcome.suggestions.len());
    for (index, suggestion) in outcome.suggestions.iter().enumerate() {
        println!("[{index}] {}: {}", suggestion.kind.label(), suggestion.title);
        if !suggestion.summary.is_empty() {
            println!("    {}", suggestion.summary);
        }
        if !suggestion.rationale.is_empty() {
            println!("    why: {}", suggestion.rationale);
        }
        match pipeline.suggestion_diff(suggestion, &text) {
            Ok(diff) => {
                let stats = diff.stats();
                println!("    {} hunks, +{} -{}", stats.hunks, stats.added, stats.removed);
                print!("{}", diff.to_unified());
                diffs.push(Some(diff));
            }
            Err(err) => {
                println!("    no usable diff: {err}");
                diffs.push(None);
            }
        }
        println!();
    }

    let Some(choice) = args.apply else {
        return Ok(());
    };
    let diff = diffs
        .get_mut(choice)
        .with_context(|| format!("no suggestion {choice}"))?
        .take()
        .with_context(|| format!("suggestion {choice} has no usable diff"))?;
    apply_to_file(&pipeline, &args.document, &text, diff, &args.options, cancel).await
}

/// Library and history candidates named by `args`.
type LoadedContext = (Vec<ContextCandidate>, Vec<ContextCandidate>);

fn load_context(args: &ContextArgs) -> anyhow::Result<LoadedContext> {
    let library = match &args.library {
        Some(dir) => library::load_dir(dir, &args.references)?,
        None => Vec::new(),
    };
    let history = match &args.history {
        Some(dir) => library::load_dir(dir, &args.references)?,
        None => Vec::new(),
    };
    for reference in &args.references {
        if !library.iter().chain(&history).any(|c| &c.id == reference) {
            anyhow::bail!("unknown reference {reference:?}");
        }
    }
    Ok((library, history))
}

fn print_selection(selection: &Selection) {
    println!(
        "context: {} mandatory + {} supporting of {} limit",
        format_token_count(selection.mandatory_tokens),
        format_token_count(selection.supporting_tokens),
        format_token_count(selection.limit)
    );
    for item in &selection.items {
        let marker = if item.explicit { "*" } else { " " };
        println!("  {marker} {:<24} {:>6}  {:.2}", item.id, item.tokens, item.relevance);
    }
}

/// Runs `diff` against the file at `path` through the application queue.
async fn apply_to_file(
    pipeline: &Pipeline,
    path: &Path,
    original: &str,
    diff: Diff,
    options: &ApplyOptions,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    if diff.is_empty() {
        eprintln!("nothing to apply");
        return Ok(());
    }
    let document_id = pipeline.open(Document::new(original));
    let mut request = ApplicationRequest::new(document_id, diff.clone());
    if options.step {
        request = request.hunk_by_hunk();
    } else if !options.hunks.is_empty() {
        request = request.selected(options.hunks.iter().copied());
    }

    let report = drive(pipeline, request, &diff, cancel).await?;
    print_report(&report);
    let text = pipeline.close(document_id).await?.text();
    if options.write {
        std::fs::write(path, &text)
            .with_context(|| format!("writing {}", path.display()))?;
    } else {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(text.as_bytes())?;
        stdout.flush()?;
    }
    Ok(())
}

enum Next {
    Blocked(Option<PendingDecision>),
    Event(AppEvent),
    Shutdown,
}

/// Enqueues `request` and answers its decisions on stdin until it finishes.
async fn drive(
    pipeline: &Pipeline,
    request: ApplicationRequest,
    diff: &Diff,
    cancel: &CancellationToken,
) -> anyhow::Result<ApplyReport> {
    let EventHandler { tx, mut rx } = EventHandler::new();
    if let Some(events) = pipeline.subscribe() {
        spawn_pipeline_forwarder(events, tx);
    }
    let mut handle = pipeline.enqueue(request).await?;
    let mut answers = BufReader::new(tokio::io::stdin()).lines();
    let mut shutting_down = false;

    loop {
        let next = tokio::select! {
            pending = handle.blocked() => Next::Blocked(pending),
            Some(event) = rx.recv() => Next::Event(event),
            _ = cancel.cancelled(), if !shutting_down => Next::Shutdown,
        };
        match next {
            Next::Blocked(None) => break,
            Next::Blocked(Some(pending)) => {
                match ask(diff, &pending, &mut answers, cancel).await? {
                    Some(resolution) => {
                        match handle.resolve(pending.hunk_index, resolution).await {
                            Err(Error::InvalidResolution { detail, .. }) => {
                                eprintln!("not possible: {detail}")
                            }
                            other => other?,
                        }
                    }
                    None => {
                        shutting_down = true;
                        handle.cancel();
                    }
                }
            }
            Next::Event(AppEvent::Pipeline(event)) => log_pipeline_event(&event),
            Next::Event(_) => {}
            Next::Shutdown => {
                shutting_down = true;
                handle.cancel();
            }
        }
    }
    let report = handle.wait().await?;
    while let Ok(event) = rx.try_recv() {
        if let AppEvent::Pipeline(event) = event {
            log_pipeline_event(&event);
        }
    }
    Ok(report)
}

const PROMPT: &str = "apply this hunk? [y]es / [n]o / [q]uit: ";

/// Prompts for one pending hunk. `None` means stop the whole request.
async fn ask(
    diff: &Diff,
    pending: &PendingDecision,
    answers: &mut Lines<BufReader<Stdin>>,
    cancel: &CancellationToken,
) -> anyhow::Result<Option<Resolution>> {
    show_pending(diff, pending)?;
    loop {
        let line = tokio::select! {
            line = answers.next_line() => line?,
            _ = cancel.cancelled() => return Ok(None),
        };
        let Some(line) = line else {
            return Ok(None);
        };
        match line.trim() {
            "y" | "yes" => return Ok(Some(Resolution::UseDiff)),
            "n" | "no" => return Ok(Some(Resolution::UseCurrent)),
            "q" | "quit" => return Ok(None),
            _ => eprint!("{PROMPT}"),
        }
    }
}

fn show_pending(diff: &Diff, pending: &PendingDecision) -> std::io::Result<()> {
    let mut stderr = std::io::stderr().lock();
    if let Some(hunk) = diff.hunks.get(pending.hunk_index) {
        writeln!(stderr, "hunk {} {}", pending.hunk_index, hunk.header())?;
        for line in &hunk.lines {
            write!(stderr, "{}{}", line.kind.origin(), line.content)?;
            if !line.content.ends_with('\n') {
                writeln!(stderr)?;
            }
        }
    }
    if let Some(conflict) = &pending.conflict {
        writeln!(stderr, "conflict: {} ({})", conflict.kind, conflict.detail)?;
    }
    write!(stderr, "{PROMPT}")?;
    stderr.flush()
}

fn print_report(report: &ApplyReport) {
    eprintln!(
        "applied {} of {} hunks ({} -> {})",
        report.changed(),
        report.hunks.len(),
        report.hash_before.short(),
        report.hash_after.short()
    );
    for hunk in report.skipped() {
        let reason = match &hunk.outcome {
            HunkOutcome::Skipped(SkipReason::NotSelected) => "not selected".to_owned(),
            HunkOutcome::Skipped(SkipReason::KeptCurrent) => "kept current text".to_owned(),
            HunkOutcome::Skipped(SkipReason::Invalid(why)) => format!("invalid: {why}"),
            _ => continue,
        };
        eprintln!("  hunk {} skipped: {reason}", hunk.index);
    }
}
