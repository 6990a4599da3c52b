use anyhow::{Result, anyhow};
use colored::*;
use std::process::ExitCode;

use stepcheck::logging::init_logging;
use stepcheck::providers::create_provider;
use stepcheck::{
    FsTaskStore, ModelId, StorePaths, TaskError, TaskId, TaskOutcome, TaskResult, ValidatorConfig,
    ValidatorService,
};

mod args;
use args::{CliArgs, USAGE};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e.to_string().red());
            ExitCode::from(2)
        }
    }
}

/// Returns whether every requested task ran to completion.
async fn run() -> Result<bool> {
    let args = CliArgs::parse()?;
    if args.help {
        println!("{USAGE}");
        return Ok(true);
    }

    let mut config = ValidatorConfig::load()?;
    init_logging(config.log_dir.as_deref())?;
    if let Some(model) = &args.model {
        config.model = ModelId::new(model.clone());
    }
    if let Some(n) = args.concurrency {
        config.concurrency = n;
    }
    if let Some(policy) = args.policy {
        config.missing_screenshot = policy;
    }
    if let Some(dir) = &args.input_dir {
        config.paths = StorePaths::rooted_at(dir);
    }

    let provider = create_provider(&config)?;
    if !args.quiet && !args.json_output {
        println!(
            "{} {} | {} | concurrency {}",
            ">>".bold(),
            "stepcheck".bold(),
            format!("{}/{}", provider.name(), provider.model()).cyan(),
            config.concurrency
        );
    }

    let store = FsTaskStore::new(config.paths.clone());
    let service = ValidatorService::new(config, provider, store);

    let outcomes: Vec<(TaskId, Result<TaskOutcome, TaskError>)> = if args.all {
        service.validate_all().await?
    } else {
        let mut outcomes = Vec::with_capacity(args.tasks.len());
        for task in &args.tasks {
            let task_id = TaskId::new(task.clone());
            let outcome = service.validate_task(&task_id).await;
            outcomes.push((task_id, outcome));
        }
        outcomes
    };

    if outcomes.is_empty() {
        return Err(anyhow!("No tasks found"));
    }

    if args.json_output {
        let reports: Vec<&TaskResult> = outcomes
            .iter()
            .filter_map(|(_, outcome)| outcome.as_ref().ok().map(|o| &o.report))
            .collect();
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for (task_id, outcome) in &outcomes {
            match outcome {
                Ok(outcome) => print_task(outcome, args.quiet),
                Err(e) => println!("{} {} {}", "✗".red().bold(), task_id, e.to_string().red()),
            }
        }
    }

    let all_ok = outcomes
        .iter()
        .all(|(_, outcome)| matches!(outcome, Ok(o) if o.report.is_complete()));
    Ok(all_ok)
}

fn print_task(outcome: &TaskOutcome, quiet: bool) {
    let report = &outcome.report;
    let marker = if report.is_complete() {
        "●".green().bold()
    } else {
        "●".yellow().bold()
    };
    println!(
        "{} {} {}/{} steps ok | {} tokens in, {} out",
        marker,
        report.task_id.to_string().bold(),
        report.successful_validations,
        report.total_steps,
        report.total_tokens_used.input_tokens,
        report.total_tokens_used.output_tokens
    );

    if quiet {
        return;
    }

    for result in report.steps.values() {
        let status = if !result.success {
            "failed".red()
        } else if result.is_changed() {
            "updated".cyan()
        } else {
            "confirmed".dimmed()
        };
        println!(
            "  {:<9} {:<8} {}",
            result.key().to_string(),
            result.mode.to_string(),
            status
        );
        if let Some(error) = &result.error {
            println!("            {}", error.dimmed());
        }
    }
    println!(
        "  {} {}",
        "→".dimmed(),
        outcome.report_path.display().to_string().dimmed()
    );
}
