use chrono::Local;
use console::style;
use reqwest::StatusCode;

/// User facing console output. Everything is muted in quiet mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct Console {
    pub quiet: bool,
}

impl Console {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    pub fn section(&self, msg: &str) {
        if self.quiet {
            return;
        }
        let line = format!("{} | {:<54}", Local::now().format("%FT%H:%M:%S"), msg);
        println!("{}", style(line).yellow().bold());
    }

    pub fn message(&self, msg: &str) {
        if self.quiet {
            return;
        }
        println!("{} {msg}", style("▆").green());
    }

    pub fn plain(&self, msg: &str) {
        if self.quiet {
            return;
        }
        println!("{msg}");
    }

    pub fn error(&self, msg: &str) {
        if self.quiet {
            return;
        }
        eprintln!("{} {}", style("▆").red(), style(msg).red());
    }

    pub fn warning(&self, msg: &str) {
        if self.quiet {
            return;
        }
        eprintln!("{} {}", style("▆").yellow(), style(msg).yellow());
    }
}

/// Colours a status code the way the transcript shows it.
pub fn status_color(status: StatusCode) -> String {
    let code = status.as_str();
    if code == "200" {
        style(code).green().to_string()
    } else if code == "401" || code == "403" || status.is_server_error() {
        style(code).red().to_string()
    } else {
        style(code).yellow().to_string()
    }
}
