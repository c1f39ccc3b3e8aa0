use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

use crate::cli::Cli;
use crate::outputter::Console;

pub const PROGRAM_NAME: &str = env!("CARGO_PKG_NAME");

/// Everything a run shares: output locations, switches and the run-wide
/// credential scope. Built once from the command line and passed down by
/// reference.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub program_name: String,
    pub output_directory: PathBuf,
    pub working_directory: PathBuf,
    pub debug: bool,
    pub report: bool,
    pub generate_json_file: bool,
    pub save_response: bool,
    pub credentials: BTreeMap<String, String>,
    pub console: Console,
}

impl RunContext {
    pub fn from_cli(cli: &Cli, working_directory: PathBuf) -> Self {
        Self {
            program_name: PROGRAM_NAME.to_string(),
            output_directory: cli.output_directory.clone().unwrap_or_else(env::temp_dir),
            working_directory,
            debug: cli.debug,
            report: cli.report || cli.csv.is_some(),
            generate_json_file: cli.generate_json,
            save_response: cli.save_response,
            credentials: BTreeMap::new(),
            console: Console::new(cli.quiet),
        }
    }

    /// `<program>.<project>-<group>-<job>.<suffix>` in the output directory.
    pub fn artifact_path(&self, project: &str, group: &str, job: &str, suffix: &str) -> PathBuf {
        self.output_directory
            .join(format!("{}.{project}-{group}-{job}.{suffix}", self.program_name))
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            program_name: PROGRAM_NAME.to_string(),
            output_directory: env::temp_dir(),
            working_directory: PathBuf::from("."),
            debug: false,
            report: true,
            generate_json_file: false,
            save_response: false,
            credentials: BTreeMap::new(),
            console: Console::new(true),
        }
    }
}

#[cfg(test)]
mod test {
    use clap::Parser;

    use super::*;

    #[test]
    fn csv_implies_report() {
        let cli = Cli::parse_from(["apiquest", "-r", "--csv", "out.csv", "-o", "/var/out"]);
        let ctx = RunContext::from_cli(&cli, PathBuf::from("."));
        assert!(ctx.report);
        assert_eq!(
            ctx.artifact_path("shop", "orders", "Create", "json"),
            PathBuf::from("/var/out/apiquest.shop-orders-Create.json")
        );
    }
}
