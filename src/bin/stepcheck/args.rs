use anyhow::{Result, anyhow};
use std::env;

use stepcheck::MissingScreenshotPolicy;

pub const USAGE: &str = "\
Usage: stepcheck [TASK_ID...] [OPTIONS]

Options:
  --all                      Validate every task found in the input directory
  -m, --model <MODEL>        Model override
  -c, --concurrency <N>      Maximum in-flight model calls per task
  --policy <POLICY>          Missing screenshot policy: fail, text-only, accept-unverified
  --input-dir <DIR>          Input data directory
  --json                     Print the task reports as JSON
  -q, --quiet                Only print the summary
  -h, --help                 Show this help";

#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub tasks: Vec<String>,
    pub all: bool,
    pub model: Option<String>,
    pub concurrency: Option<usize>,
    pub policy: Option<MissingScreenshotPolicy>,
    pub input_dir: Option<String>,
    pub quiet: bool,
    pub json_output: bool,
    pub help: bool,
}

impl CliArgs {
    pub fn parse() -> Result<Self> {
        let args: Vec<String> = env::args().collect();
        Self::parse_from(&args[1..])
    }

    /// Parse from a slice of arguments (for testing)
    pub fn parse_from(args: &[String]) -> Result<Self> {
        let mut result = CliArgs::default();

        let mut i = 0;
        while i < args.len() {
            let arg = &args[i];

            match arg.as_str() {
                "--all" => result.all = true,
                "-m" | "--model" => {
                    result.model = Some(value(args, &mut i)?.to_string());
                }
                "-c" | "--concurrency" => {
                    let raw = value(args, &mut i)?;
                    let n: usize = raw
                        .parse()
                        .map_err(|_| anyhow!("{arg} expects a positive number, got '{raw}'"))?;
                    if n == 0 {
                        return Err(anyhow!("{arg} must be at least 1"));
                    }
                    result.concurrency = Some(n);
                }
                "--policy" => {
                    let raw = value(args, &mut i)?;
                    result.policy = Some(raw.parse().map_err(|e: String| anyhow!(e))?);
                }
                "--input-dir" => {
                    result.input_dir = Some(value(args, &mut i)?.to_string());
                }
                "-q" | "--quiet" => result.quiet = true,
                "--json" => result.json_output = true,
                "-h" | "--help" => result.help = true,
                unknown if unknown.starts_with('-') => {
                    return Err(anyhow!("Unknown argument: {unknown}"));
                }
                task => result.tasks.push(task.to_string()),
            }

            i += 1;
        }

        if !result.help && result.all == result.tasks.is_empty() {
            if result.all {
                return Err(anyhow!("--all cannot be combined with task ids"));
            }
            return Err(anyhow!("Pass at least one task id or --all"));
        }

        Ok(result)
    }
}

fn value<'a>(args: &'a [String], i: &mut usize) -> Result<&'a str> {
    let flag = &args[*i];
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("{flag} requires a value"))
}
