//! The functions a template may call, bound to the job being rendered.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::DateTime;
use chrono::Local;
use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

use crate::config::RunContext;
use crate::job::Job;
use crate::keypath;
use crate::keypath::KeyPath;
use crate::project::Group;
use crate::project::Project;
use crate::template;
use crate::template::Arguments;
use crate::template::MacroHost;
use crate::template::TemplateError;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum MacroError {
    #[error("Variable {name} not found in job configuration for {job}")]
    MissingVariable { job: String, name: String },

    #[error("Credential {key} not found")]
    MissingCredential { key: String },

    #[error("No job {job} found in group {group}")]
    UnknownJob { job: String, group: String },

    #[error("No group {group} found in project {project}")]
    UnknownGroup { group: String, project: String },

    #[error("No job response found for {job}")]
    JobNotYetExecuted { job: String },

    #[error("[{job}] Variable {field} not found in job response")]
    FieldNotFound { job: String, field: String },

    #[error("Format {format} is unknown for time(). Available formats: :seconds, :iso8601, :iso8601_utc.")]
    UnknownFormat { format: String },

    #[error("Unknown macro {name}()")]
    UnknownMacro { name: String },

    #[error("Invalid argument for {name}(): {message}")]
    InvalidArgument { name: String, message: String },

    #[error("Variable {name}: {source}")]
    NestedTemplate {
        name: String,
        #[source]
        source: Box<TemplateError>,
    },
}

/// Output shapes understood by `time()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFormat {
    Seconds,
    Iso8601,
    Iso8601Utc,
}

impl TimeFormat {
    pub fn parse(token: &str) -> Result<Self, MacroError> {
        match token.trim_start_matches(':') {
            "seconds" => Ok(TimeFormat::Seconds),
            "iso8601" => Ok(TimeFormat::Iso8601),
            "iso8601_utc" => Ok(TimeFormat::Iso8601Utc),
            other => Err(MacroError::UnknownFormat {
                format: other.to_string(),
            }),
        }
    }
}

/// Macro environment for one job. Every time macro observes the same
/// instant, taken when the environment is created.
pub struct MacroEnv<'a> {
    job: &'a Job,
    group: &'a Group,
    project: &'a Project,
    ctx: &'a RunContext,
    now: DateTime<Utc>,
    nested: bool,
}

impl<'a> MacroEnv<'a> {
    pub fn new(job: &'a Job, group: &'a Group, project: &'a Project, ctx: &'a RunContext) -> Self {
        Self::with_now(job, group, project, ctx, Utc::now())
    }

    pub fn with_now(
        job: &'a Job,
        group: &'a Group,
        project: &'a Project,
        ctx: &'a RunContext,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job,
            group,
            project,
            ctx,
            now,
            nested: false,
        }
    }

    pub fn render(&self, source: &str) -> Result<String, TemplateError> {
        template::render(source, self)
    }

    pub fn var(&self, name: &str, default: Option<&Value>, ignore_error: bool) -> Result<Value, MacroError> {
        let Some(value) = self.job.vars.get(name) else {
            return match default {
                Some(default) if !default.is_null() => Ok(default.clone()),
                _ if ignore_error => Ok(Value::Null),
                _ => Err(MacroError::MissingVariable {
                    job: self.job.name.clone(),
                    name: name.to_string(),
                }),
            };
        };

        match value {
            Value::Null => {
                self.ctx.console.warning(&format!(
                    "Content of variable {name} is nil, which could lead to errors in templates."
                ));
                self.job.add_warning();
                Ok(Value::Null)
            }
            // one level of template-in-template only
            Value::String(source) if !self.nested => {
                let inner = MacroEnv {
                    nested: true,
                    ..*self
                };
                template::render(source, &inner)
                    .map(Value::String)
                    .map_err(|e| MacroError::NestedTemplate {
                        name: name.to_string(),
                        source: Box::new(e),
                    })
            }
            other => Ok(other.clone()),
        }
    }

    pub fn response(&self, job_name: &str, field: &KeyPath, group: Option<&str>) -> Result<Value, MacroError> {
        let group = match group {
            Some(name) => self.project.group(name).ok_or_else(|| MacroError::UnknownGroup {
                group: name.to_string(),
                project: self.project.name.clone(),
            })?,
            None => self.group,
        };

        let job = group.job(job_name).ok_or_else(|| MacroError::UnknownJob {
            job: job_name.to_string(),
            group: group.name.clone(),
        })?;

        let body = job.response().ok_or_else(|| MacroError::JobNotYetExecuted {
            job: job_name.to_string(),
        })?;

        keypath::extract(body, field.keys())
            .cloned()
            .ok_or_else(|| MacroError::FieldNotFound {
                job: job_name.to_string(),
                field: field.to_string(),
            })
    }

    pub fn time(&self, day_shift: i64, format: TimeFormat) -> Result<Value, MacroError> {
        let shifted = day_shift
            .checked_mul(SECONDS_PER_DAY)
            .and_then(|shift| self.now.timestamp().checked_add(shift))
            .and_then(|seconds| DateTime::<Utc>::from_timestamp(seconds, 0))
            .ok_or_else(|| MacroError::InvalidArgument {
                name: "time".into(),
                message: format!("day shift {day_shift} is out of range"),
            })?;

        Ok(match format {
            TimeFormat::Seconds => Value::from(shifted.timestamp()),
            TimeFormat::Iso8601 => Value::String(
                shifted
                    .with_timezone(&Local)
                    .format("%FT%T%:z")
                    .to_string(),
            ),
            TimeFormat::Iso8601Utc => Value::String(shifted.format("%FT%TZ").to_string()),
        })
    }

    pub fn credential(&self, key: &str) -> Result<String, MacroError> {
        self.project
            .authorization
            .get(key)
            .or_else(|| self.ctx.credentials.get(key))
            .cloned()
            .ok_or_else(|| MacroError::MissingCredential { key: key.to_string() })
    }

    pub fn basicauth(&self, username_key: &str, password_key: &str) -> Result<String, MacroError> {
        let username = self.credential(username_key)?;
        let password = self.credential(password_key)?;

        Ok(format!("Basic {}", STANDARD.encode(format!("{username}:{password}"))))
    }
}

impl MacroHost for MacroEnv<'_> {
    fn call(&self, name: &str, args: Arguments) -> Result<Value, MacroError> {
        match name {
            "var" => {
                let var_name = string_arg(name, &args, 0, "name")?;
                let ignore_error = args
                    .get(2, "ignore_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                self.var(&var_name, args.get(1, "default"), ignore_error)
            }
            "response" => {
                let job_name = string_arg(name, &args, 0, "job")?;
                let field = args
                    .get(1, "field")
                    .and_then(KeyPath::from_value)
                    .ok_or_else(|| invalid(name, "field must be a key or a list of keys"))?;
                let group = match args.get(2, "group") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(group)) => Some(group.as_str()),
                    Some(_) => return Err(invalid(name, "group must be a string")),
                };
                self.response(&job_name, &field, group)
            }
            "now" => self.time(0, TimeFormat::Seconds),
            "yesterday" => self.time(-1, TimeFormat::Iso8601),
            "time" => {
                let day_shift = match args.get(0, "day_shift") {
                    None | Some(Value::Null) => 0,
                    Some(value) => value
                        .as_i64()
                        .ok_or_else(|| invalid(name, "day_shift must be an integer"))?,
                };
                let format = match args.get(1, "format") {
                    None | Some(Value::Null) => TimeFormat::Seconds,
                    Some(Value::String(token)) => TimeFormat::parse(token)?,
                    Some(other) => {
                        return Err(MacroError::UnknownFormat {
                            format: other.to_string(),
                        });
                    }
                };
                self.time(day_shift, format)
            }
            "credential" => {
                let key = string_arg(name, &args, 0, "key")?;
                self.credential(&key).map(Value::String)
            }
            "basicauth" => {
                let username_key = string_arg(name, &args, 0, "username_key")?;
                let password_key = string_arg(name, &args, 1, "password_key")?;
                self.basicauth(&username_key, &password_key).map(Value::String)
            }
            _ => Err(MacroError::UnknownMacro { name: name.to_string() }),
        }
    }
}

fn string_arg(macro_name: &str, args: &Arguments, index: usize, arg: &str) -> Result<String, MacroError> {
    match args.get(index, arg) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(invalid(macro_name, &format!("{arg} must be a string, got {other}"))),
        None => Err(invalid(macro_name, &format!("missing argument {arg}"))),
    }
}

fn invalid(name: &str, message: &str) -> MacroError {
    MacroError::InvalidArgument {
        name: name.to_string(),
        message: message.to_string(),
    }
}
