use std::path::PathBuf;

use clap::Parser;

/// Run declarative API jobs and check their responses
#[derive(Parser, Debug, Default)]
#[command(version, about, long_about = None, after_help = MACRO_HELP)]
pub struct Cli {
    /// Change working directory to DIR before looking for projects
    #[arg(short = 'C', long = "change-dir", value_name = "DIR")]
    pub change_dir: Option<PathBuf>,

    /// Debug mode, logs requests and template lookups
    #[arg(short, long)]
    pub debug: bool,

    /// Generate the json files which are sent to the api
    #[arg(short = 'G', long = "generate-json")]
    pub generate_json: bool,

    /// Limit action to group NAME
    #[arg(short, long = "group", value_name = "NAME")]
    pub groups: Vec<String>,

    /// Limit action to jobs whose name fully matches REGEX
    #[arg(short, long = "job", value_name = "REGEX", value_delimiter = ',')]
    pub jobs: Vec<String>,

    /// List available jobs
    #[arg(short, long)]
    pub list: bool,

    /// Limit action to project NAME
    #[arg(short, long, value_name = "NAME")]
    pub project: Option<String>,

    /// Directory for generated json files and transcripts
    #[arg(short, long = "output-directory", value_name = "DIR")]
    pub output_directory: Option<PathBuf>,

    /// Run all configured jobs or all jobs passed with -j
    #[arg(short, long)]
    pub run: bool,

    /// Show a report after the run
    #[arg(long)]
    pub report: bool,

    /// Write the report as csv to FILE
    #[arg(long, value_name = "FILE")]
    pub csv: Option<PathBuf>,

    /// Only print the report
    #[arg(short, long)]
    pub quiet: bool,

    /// Save request and response of every job next to the generated json files
    #[arg(long)]
    pub save_response: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    List,
    Run,
    Generate,
    Help,
}

impl Cli {
    pub fn action(&self) -> Action {
        if self.list {
            Action::List
        } else if self.run {
            Action::Run
        } else if self.generate_json {
            Action::Generate
        } else {
            Action::Help
        }
    }
}

const MACRO_HELP: &str = "\
Available template macros:

  Variables and Responses:
    response('<job>', '<field>'[, group: '<group>']) - value from the response of a job
    var('<name>'[, default: <value>][, ignore_error: true]) - variable from the job's vars

  Date and Time:
    now()                                     - now in seconds
    yesterday()                               - yesterday in iso8601
    time([<day_shift>][, format: <format>])   - :seconds (default), :iso8601, :iso8601_utc

  Credentials:
    credential('<key>')                       - value from the credentials file
    basicauth('<user_key>', '<password_key>') - basic authorization header value

Examples:
  <%= response('Login', 'token') %>
  <%= response(var('CreateJob'), ['data', 'pdfToken']) %>
  <%= time(-365, format: :iso8601) %>";

#[cfg(test)]
mod test {
    use clap::Parser;

    use super::*;

    #[test]
    fn job_filters_split_on_commas() {
        let cli = Cli::parse_from(["apiquest", "-r", "-j", "Login,Create.*", "-j", "Cancel"]);
        assert_eq!(cli.jobs, vec!["Login", "Create.*", "Cancel"]);
        assert_eq!(cli.action(), Action::Run);
    }

    #[test]
    fn list_wins_over_run() {
        let cli = Cli::parse_from(["apiquest", "-r", "-l", "-g", "a", "-g", "b"]);
        assert_eq!(cli.action(), Action::List);
        assert_eq!(cli.groups, vec!["a", "b"]);
    }

    #[test]
    fn generate_alone() {
        let cli = Cli::parse_from(["apiquest", "-G"]);
        assert_eq!(cli.action(), Action::Generate);
        assert_eq!(Cli::parse_from(["apiquest"]).action(), Action::Help);
    }
}
