use flume::SendError;
use flume::Sender;
use regex::Regex;
use reqwest::Client;
use reqwest::Response;
use reqwest::StatusCode;
use reqwest::Version;
use reqwest::header::CONTENT_TYPE;
use reqwest::header::HeaderMap;
use serde_json::Value;
use thiserror::Error;

use crate::config::RunContext;
use crate::job::Job;
use crate::project::Group;
use crate::project::Project;
use crate::report::ReportRow;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("channel error")]
    ChannelError(#[from] SendError<ReportRow>),
}

/// Which (project, group, job) triples take part in a run.
#[derive(Debug, Default)]
pub struct Selection {
    project: Option<String>,
    groups: Vec<String>,
    jobs: Vec<Regex>,
}

impl Selection {
    /// Job patterns must match the whole job name.
    pub fn new(project: Option<String>, groups: Vec<String>, job_patterns: &[String]) -> Result<Self, regex::Error> {
        let jobs = job_patterns
            .iter()
            .map(|pattern| Regex::new(&format!("^(?:{pattern})$")))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { project, groups, jobs })
    }

    pub fn select<'a>(&self, projects: &'a [Project]) -> Vec<(&'a Project, &'a Group, &'a Job)> {
        let mut selected = vec![];

        for project in projects {
            if self.project.as_ref().is_some_and(|name| *name != project.name) {
                continue;
            }

            for group in &project.groups {
                if !self.groups.is_empty() && !self.groups.contains(&group.name) {
                    continue;
                }

                for job in &group.jobs {
                    if self.jobs.is_empty() || self.jobs.iter().any(|re| re.is_match(&job.name)) {
                        selected.push((project, group, job));
                    }
                }
            }
        }

        selected
    }
}

pub struct Runner<'a> {
    ctx: &'a RunContext,
    client: Client,
    selection: Selection,
}

impl<'a> Runner<'a> {
    pub fn new(ctx: &'a RunContext, selection: Selection) -> Self {
        Self {
            ctx,
            client: Client::new(),
            selection,
        }
    }

    /// Runs the selected jobs one after another. Later jobs may depend on
    /// responses of earlier ones, so nothing here runs concurrently.
    pub async fn run(&self, projects: &[Project], report_tx: Option<Sender<ReportRow>>) -> Result<usize, RunnerError> {
        let mut executed = 0;

        for (project, group, job) in self.selection.select(projects) {
            if !job.is_valid() {
                self.ctx
                    .console
                    .error(&format!("[{}] Skipping job with invalid configuration", job.name));
                continue;
            }

            let row = job.run(group, project, self.ctx, &self.client).await;
            executed += 1;

            if let Some(tx) = &report_tx {
                tx.send_async(row).await?;
            }
        }

        Ok(executed)
    }

    /// Writes the rendered body of every selected job without sending it.
    pub fn generate(&self, projects: &[Project]) -> usize {
        let mut written = 0;

        for (project, group, job) in self.selection.select(projects) {
            if !job.is_valid() {
                continue;
            }
            match job.generate_json_file(group, project, self.ctx) {
                Ok(Some(_)) => written += 1,
                Ok(None) => log::debug!("{} has no template, nothing to generate", job.name),
                Err(error) => self.ctx.console.error(&format!("[{}] {error}", job.name)),
            }
        }

        written
    }

    pub fn list(&self, projects: &[Project]) -> String {
        let rows: Vec<[&str; 3]> = self
            .selection
            .select(projects)
            .into_iter()
            .filter(|(_, _, job)| job.is_valid())
            .map(|(project, group, job)| [project.name.as_str(), group.name.as_str(), job.name.as_str()])
            .collect();

        let mut widths = ["project".len(), "group".len(), "job".len()];
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let line = |cells: [&str; 3]| {
            cells
                .iter()
                .zip(widths)
                .map(|(cell, width)| format!("{cell:<width$}"))
                .collect::<Vec<_>>()
                .join(" | ")
                .trim_end()
                .to_string()
        };

        let mut out = vec![line(["project", "group", "job"])];
        out.extend(rows.into_iter().map(line));
        out.join("\n")
    }
}

/// Status, headers and raw body of one exchange, plus the parsed body
/// when the job asked for it.
#[derive(Debug)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub body_json: Option<Value>,
}

impl CapturedResponse {
    pub async fn from_response(resp: Response) -> Result<Self, reqwest::Error> {
        let status = resp.status();
        let version = resp.version();
        let headers = resp.headers().clone();

        // Consume the body exactly once
        let body = resp.bytes().await?.to_vec();

        Ok(Self {
            status,
            version,
            headers,
            body,
            body_json: None,
        })
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn is_json(&self) -> bool {
        self.content_type().is_some_and(|ct| ct.contains("application/json"))
    }
}
