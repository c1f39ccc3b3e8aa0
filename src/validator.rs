use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use miette::Diagnostic;
use miette::NamedSource;
use miette::SourceSpan;
use reqwest::Method;
use thiserror::Error;

use crate::asserter::AssertionRegistry;
use crate::job::Job;
use crate::job::JobConfigError;
use crate::parser::GroupFile;
use crate::parser::JobConf;
use crate::parser::ProjectFile;
use crate::project::Group;

const DOMAIN_ENDS_WITH: &str =
    "The domain of a project can't end with a /, endpoints are appended to it as they are";

#[derive(Debug, Error, Diagnostic)]
#[error("Invalid field `{field}`: {message}")]
pub struct ValidationError {
    field: String,
    message: String,
    #[source_code]
    src: Option<NamedSource<String>>,
    #[label("invalid value here")]
    span: Option<SourceSpan>,
}

macro_rules! validation_err {
    ($field:expr, $msg:expr, $self:expr, $snippet:expr) => {
        ValidationError {
            field: $field.to_string(),
            message: $msg.to_string(),
            src: Some(NamedSource::new(
                $self.file_name.clone(),
                $self.toml_src.clone(),
            )),
            span: find_span($snippet, &$self.toml_src),
        }
    };
}

/// Name and domain of a project, checked.
#[derive(Debug, PartialEq, Eq)]
pub struct ProjectHeader {
    pub name: String,
    pub domain: String,
}

/// Turns one parsed configuration file into domain types.
pub struct Validator<'a> {
    toml_src: String,
    file_name: String,
    registry: &'a AssertionRegistry,
}

impl<'a> Validator<'a> {
    pub fn new(toml_src: &str, file_name: &str, registry: &'a AssertionRegistry) -> Self {
        Self {
            toml_src: toml_src.into(),
            file_name: file_name.into(),
            registry,
        }
    }

    pub fn validate_project(&self, project: &ProjectFile) -> Result<ProjectHeader, ValidationError> {
        let name = project
            .name
            .clone()
            .ok_or_else(|| validation_err!("name", "Name must be set", self, ""))?;

        let domain = project
            .domain
            .clone()
            .ok_or_else(|| validation_err!("domain", "Domain must be set", self, ""))?;

        if domain.ends_with('/') {
            return Err(validation_err!("domain", DOMAIN_ENDS_WITH, self, &domain));
        }

        Ok(ProjectHeader { name, domain })
    }

    pub fn validate_group(&self, group: &GroupFile, directory: &Path) -> Result<Group, ValidationError> {
        let name = group
            .name
            .clone()
            .ok_or_else(|| validation_err!("name", "Name must be set", self, ""))?;

        let jobs = match &group.jobs {
            Some(jobs) if !jobs.is_empty() => self.create_jobs(jobs, &name),
            _ => return Err(validation_err!("jobs", "Jobs must be set", self, &name)),
        };

        Ok(Group {
            name,
            directory: directory.to_path_buf(),
            jobs,
        })
    }

    /// Builds every job of a group. Broken jobs are kept, carrying their
    /// problems, so siblings still load.
    pub fn create_jobs(&self, jobs: &[JobConf], group: &str) -> Vec<Job> {
        let mut seen = BTreeSet::new();

        jobs.iter()
            .map(|conf| {
                let mut job = self.create_job(conf);
                if !seen.insert(conf.name.clone()) {
                    job.problems.push(JobConfigError::DuplicateJob {
                        job: conf.name.clone(),
                        group: group.to_string(),
                    });
                }
                job
            })
            .collect()
    }

    pub fn create_job(&self, conf: &JobConf) -> Job {
        let mut job = Job::new(conf.name.clone());

        match conf.method.as_deref().map(parse_method) {
            None => {}
            Some(Ok(method)) => job.method = method,
            Some(Err(_)) => job.problems.push(JobConfigError::InvalidMethod {
                job: conf.name.clone(),
                method: conf.method.clone().unwrap_or_default(),
            }),
        }

        match &conf.endpoint {
            Some(endpoint) => job.endpoint = endpoint.clone(),
            None => job.problems.push(JobConfigError::MissingField {
                job: conf.name.clone(),
                field: "endpoint",
            }),
        }

        if job.method != Method::GET {
            job.template = conf.template.clone();
            if job.template.is_none() {
                job.problems.push(JobConfigError::MissingField {
                    job: conf.name.clone(),
                    field: "template",
                });
            }
        }

        job.authorization = conf.authorization.clone();
        job.headers = conf.headers.clone().unwrap_or_default();
        job.vars = conf.vars.clone().unwrap_or_default();
        job.wait = conf
            .wait
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64);

        for test in conf.tests.iter().flatten() {
            match self.registry.build(test) {
                Ok(assertion) => job.tests.push(assertion),
                Err(source) => job.problems.push(JobConfigError::Test {
                    job: conf.name.clone(),
                    source,
                }),
            }
        }

        job.ignore_body = conf.ignore_body.unwrap_or(false);
        job.print_body = conf.print_body.unwrap_or(true);
        job.save_body = conf.save_body.unwrap_or(false);
        job.download_directory = conf.download_directory.clone();

        job
    }
}

fn parse_method(method: &str) -> Result<Method, String> {
    let method = Method::from_str(&method.to_uppercase()).map_err(|e| e.to_string())?;

    if !matches!(
        method,
        Method::GET
            | Method::POST
            | Method::PUT
            | Method::DELETE
            | Method::PATCH
            | Method::HEAD
            | Method::OPTIONS
    ) {
        return Err(format!("Invalid HTTP method: {}", method));
    }

    Ok(method)
}

fn find_span(needle: &str, toml_src: &str) -> Option<SourceSpan> {
    if needle.is_empty() {
        return None;
    }
    let pattern = format!("\"{}\"", needle);
    toml_src
        .find(&pattern)
        .map(|start| SourceSpan::new((start + 1).into(), needle.len()))
}
