#![allow(clippy::result_large_err)]

use std::env;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use clap::CommandFactory;
use clap::Parser;
use env_logger::Env;
use miette::Diagnostic;
use miette::IntoDiagnostic;
use miette::Result;
use thiserror::Error;

use crate::asserter::AssertionRegistry;
use crate::cli::Action;
use crate::cli::Cli;
use crate::config::RunContext;
use crate::loader::Loader;
use crate::project::Project;
use crate::report::Report;
use crate::report::ReportRow;
use crate::runner::Runner;
use crate::runner::RunnerError;
use crate::runner::Selection;

mod asserter;
mod cli;
mod config;
mod job;
mod keypath;
mod loader;
mod macros;
mod outputter;
mod parser;
mod project;
mod report;
mod runner;
mod template;
mod validator;

#[derive(Error, Debug, Diagnostic)]
pub enum ApiQuestError {
    #[error("Failed to change directory to {}", .path.display())]
    ChangeDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read the working directory")]
    WorkingDirectory(#[source] io::Error),

    #[error("No projects found in {}", .0.display())]
    #[diagnostic(help("Create a project.toml with a name and a domain, or point -C at a directory that has one"))]
    NoProjects(PathBuf),

    #[error("Invalid job pattern")]
    InvalidPattern(#[from] regex::Error),

    #[error("Failed to collect the report")]
    Runner(#[from] RunnerError),

    #[error("Failed to write the csv report to {}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    if let Some(path) = &cli.change_dir {
        env::set_current_dir(path).map_err(|source| ApiQuestError::ChangeDir {
            path: path.clone(),
            source,
        })?;
    }
    let working_directory = env::current_dir().map_err(ApiQuestError::WorkingDirectory)?;

    let mut ctx = RunContext::from_cli(&cli, working_directory.clone());
    let registry = AssertionRegistry::builtin();
    let loader = Loader::new(&registry);
    ctx.credentials = loader.run_credentials();

    let (projects, errors) = loader.load_all(Path::new("."));
    for error in errors {
        eprintln!("{:?}", miette::Report::new(error));
    }
    print_job_problems(&ctx, &projects);

    if projects.is_empty() {
        return Err(ApiQuestError::NoProjects(working_directory).into());
    }

    let selection = Selection::new(cli.project.clone(), cli.groups.clone(), &cli.jobs)
        .map_err(ApiQuestError::InvalidPattern)?;
    let runner = Runner::new(&ctx, selection);

    match cli.action() {
        Action::Help => Cli::command().print_help().into_diagnostic()?,
        Action::List => print!("{}", runner.list(&projects)),
        Action::Generate => {
            let written = runner.generate(&projects);
            ctx.console.message(&format!(
                "Wrote {written} request bodies to {}",
                ctx.output_directory.display()
            ));
        }
        Action::Run if ctx.report => {
            let (tx, rx) = flume::unbounded::<ReportRow>();
            let collector = tokio::spawn(Report::collect(rx));

            runner.run(&projects, Some(tx)).await.map_err(ApiQuestError::Runner)?;
            let report = collector.await.into_diagnostic()?;

            if cli.report {
                println!();
                print!("{report}");
            }
            if let Some(path) = &cli.csv {
                fs::write(path, report.to_csv()).map_err(|source| ApiQuestError::Csv {
                    path: path.clone(),
                    source,
                })?;
            }
        }
        Action::Run => {
            runner.run(&projects, None).await.map_err(ApiQuestError::Runner)?;
        }
    }

    Ok(())
}

fn print_job_problems(ctx: &RunContext, projects: &[Project]) {
    for project in projects {
        for group in &project.groups {
            for job in &group.jobs {
                for problem in &job.problems {
                    ctx.console
                        .warning(&format!("{}/{}: {problem}", project.name, group.name));
                }
            }
        }
    }
}
