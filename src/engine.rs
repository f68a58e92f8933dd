use anyhow::{Context, Result, bail};

use crate::cli::{GlobalArgs, OrganizeArgs, RunsArgs, RunsCommand, UndoArgs};
use crate::config::AuditConfig;
use crate::events::Event;
use crate::exit_codes::exit;
use crate::journal::RunStatus;
use crate::model;
use crate::organize::{ActionReport, Organizer};
use crate::reader::{AuditReader, EventFilter, RunExport};
use crate::reporter::{self, Reporter};
use crate::undo::{ProgressKind, UndoEngine, UndoProgress, UndoTarget};
use crate::writer::AuditWriter;

/// Resolve the audit configuration: config file first, `--log-dir` on top.
pub fn load_config(global: &GlobalArgs) -> Result<AuditConfig> {
    let mut config = match (&global.config, &global.log_dir) {
        (Some(path), _) => AuditConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        (None, Some(dir)) => AuditConfig::new(dir),
        (None, None) => bail!("no audit log directory: pass --log-dir or --config"),
    };
    if let Some(dir) = &global.log_dir {
        config.log_directory = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

pub fn organize(args: OrganizeArgs) -> Result<i32> {
    let mut reporter = Reporter::new(args.json);

    let plan = model::load_plan(&args.manifest).context("failed to load manifest")?;
    plan.validate()?;
    let plan = plan.normalize()?;
    reporter.record(Event::PlanLoaded {
        actions: plan.actions.len(),
        dry_run: args.dry_run,
    });

    let organizer = Organizer::new();
    if args.dry_run {
        let report = organizer.preview(&plan, &mut |action: &ActionReport| {
            reporter.record(Event::Action(action.clone()))
        });
        reporter.record(Event::OrganizeFinished {
            run_id: None,
            status: report.status,
            summary: report.summary,
            aborted: None,
        });
        return Ok(exit::SUCCESS);
    }

    let config = load_config(&args.global)?;
    let mut writer = AuditWriter::open(config).context("failed to open audit log")?;
    let report = organizer
        .run(&plan, &mut writer, &mut |action: &ActionReport| {
            reporter.record(Event::Action(action.clone()))
        })
        .context("failed to start run")?;
    reporter.record(Event::OrganizeFinished {
        run_id: report.run_id,
        status: report.status,
        summary: report.summary,
        aborted: report.aborted.clone(),
    });

    if report.status == RunStatus::Failed {
        return Ok(exit::RUN_FAILED);
    }
    Ok(exit::SUCCESS)
}

pub fn runs(args: RunsArgs) -> Result<i32> {
    let config = load_config(&args.global)?;
    let reader = AuditReader::from_config(&config);
    let mut reporter = Reporter::new(args.json);

    match args.command {
        RunsCommand::List => {
            for run in reader.list_runs()? {
                reporter.record(Event::Run { run });
            }
        }
        RunsCommand::Latest => {
            let run = reader.get_latest_run()?;
            reporter.record(Event::Run { run });
        }
        RunsCommand::Show { id, types } => {
            let run_id = reader.resolve_run_id(&id)?;
            let export = RunExport {
                run: reader.get_run_by_id(run_id)?,
                events: reader.filter_events(run_id, &EventFilter::types(types))?,
            };
            if args.json {
                println!("{}", serde_json::to_string_pretty(&export)?);
            } else {
                println!("{}", reporter::run_line(&export.run));
                for event in &export.events {
                    println!("  {}", reporter::event_line(event));
                }
            }
        }
        RunsCommand::Export { id, out } => {
            let run_id = reader.resolve_run_id(&id)?;
            reader
                .export_run(run_id, &out)
                .with_context(|| format!("failed to export run {}", run_id))?;
            if !args.json {
                println!("exported run {} to {}", run_id, out.display());
            }
        }
    }
    Ok(exit::SUCCESS)
}

pub fn undo(args: UndoArgs) -> Result<i32> {
    let mut reporter = Reporter::new(args.json);
    let config = load_config(&args.global)?;
    let reader = AuditReader::from_config(&config);
    let target = match &args.run {
        Some(id) => UndoTarget::Run(reader.resolve_run_id(id)?),
        None => UndoTarget::Latest,
    };
    let engine = UndoEngine::new(&reader, args.mappings);

    if args.preview {
        let preview = engine.preview_undo(target)?;
        for candidate in &preview.candidates {
            reporter.record(Event::PreviewCandidate {
                candidate: candidate.clone(),
            });
        }
        reporter.record(Event::PreviewFinished {
            target_run_id: preview.target_run_id,
            total: preview.total_events,
            will_restore: preview.will_restore_count(),
        });
        return Ok(exit::SUCCESS);
    }

    let target_run_id = engine.resolve_target(target)?.run_id;
    let mut writer = AuditWriter::open(config).context("failed to open audit log")?;
    let result = engine.undo_run(target_run_id, &mut writer, &mut |progress: &UndoProgress| {
        if progress.kind == ProgressKind::Verify && progress.current == 1 {
            reporter.record(Event::UndoStarted {
                target_run_id,
                total: progress.total,
            });
        }
        reporter.record(Event::UndoStep {
            progress: progress.clone(),
        });
    })?;

    let code = if !result.audit_complete {
        exit::RUN_FAILED
    } else if result.failed > 0 {
        exit::UNDO_PARTIAL
    } else {
        exit::SUCCESS
    };
    reporter.record(Event::UndoFinished { result });
    Ok(code)
}
