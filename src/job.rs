//! One HTTP call and everything around it: rendering, sending, testing.

use std::collections::BTreeMap;
use std::fs;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use reqwest::Client;
use reqwest::Method;
use reqwest::header::AUTHORIZATION;
use reqwest::header::CONTENT_TYPE;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::asserter::Assertion;
use crate::asserter::AssertionError;
use crate::config::RunContext;
use crate::macros::MacroEnv;
use crate::outputter::status_color;
use crate::project::Group;
use crate::project::Project;
use crate::report::ReportRow;
use crate::runner::CapturedResponse;
use crate::template::TemplateError;

/// Problems found while loading a job. Any of them keeps the job from
/// running.
#[derive(Debug, Error)]
pub enum JobConfigError {
    #[error("{field} is missing in configuration file for job {job}")]
    MissingField { job: String, field: &'static str },

    #[error("Invalid HTTP method `{method}` for job {job}")]
    InvalidMethod { job: String, method: String },

    #[error("Job {job} is defined more than once in group {group}")]
    DuplicateJob { job: String, group: String },

    #[error("Job {job}: {source}")]
    Test {
        job: String,
        #[source]
        source: AssertionError,
    },
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Rendering {what} failed: {source}")]
    Template {
        what: String,
        #[source]
        source: TemplateError,
    },

    #[error("No template {0} found.")]
    TemplateNotFound(String),

    #[error("Invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid header {name}: {message}")]
    InvalidHeader { name: String, message: String },

    #[error("Request failed: {0}")]
    TransportFailure(#[from] reqwest::Error),

    #[error("Parsing body as json failed with: {0}")]
    MalformedResponseBody(serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A request with every template resolved.
#[derive(Debug)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<String>,
    /// Where the body was written while rendering, if it was.
    pub artifact: Option<PathBuf>,
}

struct RenderedBody {
    text: String,
    artifact: Option<PathBuf>,
}

#[derive(Debug)]
pub struct Job {
    pub name: String,
    pub method: Method,
    pub template: Option<String>,
    pub endpoint: String,
    pub authorization: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub wait: Option<Duration>,
    pub vars: BTreeMap<String, Value>,
    pub tests: Vec<Box<dyn Assertion>>,
    pub ignore_body: bool,
    pub print_body: bool,
    pub save_body: bool,
    pub download_directory: Option<PathBuf>,
    pub problems: Vec<JobConfigError>,

    exchange: OnceLock<CapturedResponse>,
    runtime: OnceLock<Duration>,
    warnings: AtomicUsize,
}

impl Job {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method: Method::POST,
            template: None,
            endpoint: String::new(),
            authorization: None,
            headers: BTreeMap::new(),
            wait: None,
            vars: BTreeMap::new(),
            tests: vec![],
            ignore_body: false,
            print_body: true,
            save_body: false,
            download_directory: None,
            problems: vec![],
            exchange: OnceLock::new(),
            runtime: OnceLock::new(),
            warnings: AtomicUsize::new(0),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.problems.is_empty()
    }

    /// Parsed json body of this job's response, once it ran.
    pub fn response(&self) -> Option<&Value> {
        self.exchange.get().and_then(|exchange| exchange.body_json.as_ref())
    }

    pub fn exchange(&self) -> Option<&CapturedResponse> {
        self.exchange.get()
    }

    pub fn runtime(&self) -> Option<Duration> {
        self.runtime.get().copied()
    }

    pub fn warnings(&self) -> usize {
        self.warnings.load(Ordering::Relaxed)
    }

    pub fn add_warning(&self) {
        self.warnings.fetch_add(1, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub fn capture_body(&self, body: Value) {
        let _ = self.exchange.set(CapturedResponse {
            status: reqwest::StatusCode::OK,
            version: reqwest::Version::HTTP_11,
            headers: HeaderMap::new(),
            body: body.to_string().into_bytes(),
            body_json: Some(body),
        });
    }

    /// Runs the whole lifecycle and returns the report row for it.
    pub async fn run(&self, group: &Group, project: &Project, ctx: &RunContext, client: &Client) -> ReportRow {
        let console = &ctx.console;

        console.plain("");
        console.section(&format!("Running {}", self.name));

        let mut transcript = if ctx.save_response {
            match self.open_transcript(group, project, ctx) {
                Ok(file) => Some(file),
                Err(error) => {
                    console.error(&format!("[{}] Cannot write transcript: {error}", self.name));
                    None
                }
            }
        } else {
            None
        };

        self.wait(ctx).await;

        let request = match self.prepare(group, project, ctx) {
            Ok(request) => request,
            Err(error) => {
                console.error(&format!("[{}] {error}", self.name));
                return self.report_row(group, project, Duration::ZERO, self.tests.len());
            }
        };

        if ctx.generate_json_file
            && request.artifact.is_none()
            && let Some(body) = &request.body
            && let Err(error) = self.write_artifact(body, group, project, ctx)
        {
            console.error(&format!("[{}] {error}", self.name));
        }

        let request_line = format!("{} {}", request.method, request.url);
        console.plain(&request_line);
        self.record(&mut transcript, &request_line, ctx);
        if ctx.debug {
            for (name, value) in &request.headers {
                console.plain(&format!("{name}: {}", value.to_str().unwrap_or("<invalid utf8>")));
            }
            if let Some(body) = &request.body {
                console.plain(body);
            }
        }

        let started = Instant::now();
        let result = self.send(client, request).await;
        let runtime = started.elapsed();
        let _ = self.runtime.set(runtime);

        match result {
            Ok(exchange) => {
                let exchange = self.inspect(exchange, ctx);
                let head = self.transcript_text(&exchange, true);
                console.plain(&self.transcript_text(&exchange, false));
                self.record(&mut transcript, &head, ctx);

                if self.save_body
                    && let Err(error) = self.save_response_body(&exchange, group, project, ctx)
                {
                    console.error(&format!("[{}] Saving body failed: {error}", self.name));
                }

                let _ = self.exchange.set(exchange);
            }
            Err(error) => console.error(&format!("[{}] {error}", self.name)),
        }

        let failed = self.run_tests(group, project, ctx);
        console.section(&format!("{:.3}", runtime.as_secs_f64()));

        self.report_row(group, project, runtime, failed)
    }

    /// Renders the body template and writes it to the output directory,
    /// without sending anything.
    pub fn generate_json_file(&self, group: &Group, project: &Project, ctx: &RunContext) -> Result<Option<PathBuf>, JobError> {
        let env = MacroEnv::new(self, group, project, ctx);
        match self.render_body(&env, group, project, ctx)? {
            Some(RenderedBody {
                artifact: Some(path), ..
            }) => Ok(Some(path)),
            Some(body) => self.write_artifact(&body.text, group, project, ctx).map(Some),
            None => Ok(None),
        }
    }

    pub fn prepare(&self, group: &Group, project: &Project, ctx: &RunContext) -> Result<PreparedRequest, JobError> {
        let env = MacroEnv::new(self, group, project, ctx);

        let endpoint = render(&env, "endpoint", &self.endpoint)?;
        let raw_url = format!("{}{}", project.domain, endpoint);
        let url = Url::parse(&raw_url).map_err(|source| JobError::InvalidUrl { url: raw_url, source })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let value = render(&env, &format!("header {name}"), value)?;
            insert_header(&mut headers, name, &value)?;
        }

        if let Some(authorization) = &self.authorization {
            // a name from the project's authorization scope, or a template
            let source = project.authorization.get(authorization).unwrap_or(authorization);
            let value = render(&env, "authorization", source)?;
            insert_header(&mut headers, AUTHORIZATION.as_str(), &value)?;
        }

        let body = if self.method == Method::GET {
            None
        } else {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            self.render_body(&env, group, project, ctx)?
        };
        let (body, artifact) = match body {
            Some(RenderedBody { text, artifact }) => (Some(text), artifact),
            None => (None, None),
        };

        Ok(PreparedRequest {
            method: self.method.clone(),
            url,
            headers,
            body,
            artifact,
        })
    }

    /// Invalid json is sent anyway, so a server's handling of broken
    /// bodies can be exercised. It is only reported as a warning, and the
    /// body is written out for inspection.
    fn render_body(&self, env: &MacroEnv<'_>, group: &Group, project: &Project, ctx: &RunContext) -> Result<Option<RenderedBody>, JobError> {
        let Some(template) = &self.template else {
            return Ok(None);
        };
        if self.method == Method::GET {
            return Ok(None);
        }

        let path = self
            .find_template(group, project)
            .ok_or_else(|| JobError::TemplateNotFound(template.clone()))?;
        let source = fs::read_to_string(&path)?;
        let body = render(env, &format!("template {template}"), &source)?;

        let mut artifact = None;
        if let Err(error) = serde_json::from_str::<Value>(&body) {
            ctx.console
                .warning(&format!("  WARNING: Parsing json failed with: {error}"));
            self.add_warning();
            match self.write_artifact(&body, group, project, ctx) {
                Ok(path) => artifact = Some(path),
                Err(error) => ctx.console.error(&format!("[{}] {error}", self.name)),
            }
        }

        Ok(Some(RenderedBody { text: body, artifact }))
    }

    pub fn find_template(&self, group: &Group, project: &Project) -> Option<PathBuf> {
        let template = self.template.as_ref()?;
        let candidates = [
            project.directory.join(&group.directory).join("templates").join(template),
            group.directory.join("templates").join(template),
            project.directory.join("templates").join(template),
            PathBuf::from("templates").join(template),
        ];

        candidates.into_iter().find(|candidate| {
            log::debug!("looking for template {}", candidate.display());
            candidate.is_file()
        })
    }

    fn write_artifact(&self, body: &str, group: &Group, project: &Project, ctx: &RunContext) -> Result<PathBuf, JobError> {
        fs::create_dir_all(&ctx.output_directory)?;
        let path = ctx.artifact_path(&project.name, &group.name, &self.name, "json");

        let shown = if path.is_absolute() {
            path.clone()
        } else {
            ctx.working_directory.join(&path)
        };
        ctx.console
            .message(&format!("Generate json for {} in {}", self.name, shown.display()));

        fs::write(&path, body)?;
        Ok(path)
    }

    async fn wait(&self, ctx: &RunContext) {
        if let Some(wait) = self.wait {
            ctx.console.message(&format!(
                "Waiting for {} seconds before sending request.",
                wait.as_secs_f64()
            ));
            tokio::time::sleep(wait).await;
        }
    }

    async fn send(&self, client: &Client, request: PreparedRequest) -> Result<CapturedResponse, JobError> {
        let mut builder = client.request(request.method, request.url).headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        Ok(CapturedResponse::from_response(response).await?)
    }

    /// Parses the body as json when the job cares about it.
    fn inspect(&self, mut exchange: CapturedResponse, ctx: &RunContext) -> CapturedResponse {
        if self.ignore_body || !exchange.is_json() {
            return exchange;
        }

        match serde_json::from_slice::<Value>(&exchange.body) {
            Ok(value) => exchange.body_json = Some(value),
            Err(error) => {
                let error = JobError::MalformedResponseBody(error);
                ctx.console.warning(&format!("  WARNING: {error}"));
                self.add_warning();
            }
        }

        exchange
    }

    fn transcript_text(&self, exchange: &CapturedResponse, plain: bool) -> String {
        let status = if plain {
            exchange.status.as_str().to_string()
        } else {
            status_color(exchange.status)
        };

        let mut lines = vec![format!("{:?} {status}", exchange.version)];
        for (name, value) in &exchange.headers {
            lines.push(format!("{name}: {}", value.to_str().unwrap_or("<invalid utf8>")));
        }
        lines.push(String::new());
        if self.print_body && exchange.is_json() {
            lines.push(String::from_utf8_lossy(&exchange.body).into_owned());
        }

        lines.join("\n")
    }

    fn save_response_body(&self, exchange: &CapturedResponse, group: &Group, project: &Project, ctx: &RunContext) -> Result<PathBuf, JobError> {
        let directory = self
            .download_directory
            .clone()
            .unwrap_or_else(|| ctx.output_directory.clone());
        fs::create_dir_all(&directory)?;

        let extension = body_extension(exchange.content_type());
        let path = directory.join(format!("{}-{}-{}.{extension}", project.name, group.name, self.name));
        fs::write(&path, &exchange.body)?;

        ctx.console.plain(&format!("Saved body to {}\n", path.display()));
        Ok(path)
    }

    /// Appends a line to the transcript. After a failed write the
    /// transcript is closed.
    fn record(&self, transcript: &mut Option<File>, text: &str, ctx: &RunContext) {
        if let Some(file) = transcript.as_mut()
            && let Err(error) = writeln!(file, "{text}")
        {
            ctx.console
                .error(&format!("[{}] Cannot write transcript: {error}", self.name));
            *transcript = None;
        }
    }

    fn open_transcript(&self, group: &Group, project: &Project, ctx: &RunContext) -> Result<File, JobError> {
        fs::create_dir_all(&ctx.output_directory)?;
        let path = ctx.artifact_path(&project.name, &group.name, &self.name, "request.txt");
        Ok(File::create(path)?)
    }

    /// Runs the configured tests in order and returns how many failed.
    fn run_tests(&self, group: &Group, project: &Project, ctx: &RunContext) -> usize {
        let console = &ctx.console;
        let env = MacroEnv::new(self, group, project, ctx);
        let mut failed = 0;

        for test in &self.tests {
            let exchange = match self.exchange.get() {
                Some(exchange) if !test.requires_parsed_body() || exchange.body_json.is_some() => exchange,
                _ => {
                    console.error("  WARNING: No json response available to test against");
                    failed += 1;
                    continue;
                }
            };

            if !test.test(exchange, &env) {
                failed += 1;
                console.error(&format!("{} failed", test.name()));
            }
        }

        failed
    }

    fn report_row(&self, group: &Group, project: &Project, runtime: Duration, failed: usize) -> ReportRow {
        ReportRow {
            project: project.name.clone(),
            group: group.name.clone(),
            job: self.name.clone(),
            runtime,
            passed: self.tests.len().saturating_sub(failed),
            failed,
            warnings: self.warnings(),
        }
    }
}

fn render(env: &MacroEnv<'_>, what: &str, source: &str) -> Result<String, JobError> {
    env.render(source).map_err(|source| JobError::Template {
        what: what.to_string(),
        source,
    })
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), JobError> {
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| JobError::InvalidHeader {
        name: name.to_string(),
        message: e.to_string(),
    })?;
    let header_value = HeaderValue::from_str(value).map_err(|e| JobError::InvalidHeader {
        name: name.to_string(),
        message: e.to_string(),
    })?;

    headers.insert(header_name, header_value);
    Ok(())
}

pub fn body_extension(content_type: Option<&str>) -> &'static str {
    match content_type {
        Some(ct) if ct.contains("json") => "json",
        Some(ct) if ct.contains("pdf") => "pdf",
        _ => "txt",
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::Path;

    use axum::Json;
    use axum::Router;
    use axum::routing::get;
    use serde_json::json;

    use super::*;
    use crate::asserter::NotEmpty;
    use crate::asserter::StatusCodeEquals;
    use crate::project::test_support::group_with;
    use crate::project::test_support::job;
    use crate::project::test_support::project_with;

    #[test]
    fn extension_follows_content_type() {
        assert_eq!(body_extension(Some("application/json; charset=utf-8")), "json");
        assert_eq!(body_extension(Some("application/pdf")), "pdf");
        assert_eq!(body_extension(Some("text/html")), "txt");
        assert_eq!(body_extension(None), "txt");
    }

    #[test]
    fn prepare_renders_endpoint_headers_and_authorization() {
        let mut j = job("Fetch");
        j.method = Method::GET;
        j.template = Some("ignored.json".into());
        j.endpoint = "/orders/<%= var('id') %>".into();
        j.vars.insert("id".into(), json!(17));
        j.headers.insert("x-trace".into(), "trace-<%= var('id') %>".into());
        j.authorization = Some("admin".into());

        let mut project = project_with(vec![group_with("g", vec![j])]);
        project.authorization.insert("admin".into(), "<%= basicauth('user', 'pass') %>".into());
        project.authorization.insert("user".into(), "root".into());
        project.authorization.insert("pass".into(), "toor".into());

        let ctx = RunContext::for_tests();
        let group = &project.groups[0];
        let request = group.jobs[0].prepare(group, &project, &ctx).unwrap();

        assert_eq!(request.url.as_str(), "http://127.0.0.1:1/orders/17");
        assert_eq!(request.headers["x-trace"], "trace-17");
        assert_eq!(request.headers[AUTHORIZATION], "Basic cm9vdDp0b29y");
        assert!(request.body.is_none());
        assert!(request.headers.get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn literal_authorization_is_rendered_as_template() {
        let mut j = job("Fetch");
        j.authorization = Some("Bearer <%= credential('token') %>".into());

        let mut project = project_with(vec![group_with("g", vec![j])]);
        project.authorization.insert("token".into(), "t0k3n".into());
        let ctx = RunContext::for_tests();
        let group = &project.groups[0];

        let request = group.jobs[0].prepare(group, &project, &ctx).unwrap();
        assert_eq!(request.headers[AUTHORIZATION], "Bearer t0k3n");
        assert_eq!(request.headers[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn endpoint_macro_failure_is_fatal() {
        let mut j = job("Fetch");
        j.endpoint = "/orders/<%= var('id') %>".into();
        let project = project_with(vec![group_with("g", vec![j])]);
        let ctx = RunContext::for_tests();
        let group = &project.groups[0];

        let err = group.jobs[0].prepare(group, &project, &ctx).unwrap_err();
        assert!(matches!(err, JobError::Template { .. }));
        assert!(err.to_string().contains("Variable id not found"));
    }

    #[test]
    fn templates_are_looked_up_in_order_and_bad_json_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let project_dir = dir.path().join("shop");
        let group_dir = project_dir.join("orders");
        fs::create_dir_all(group_dir.join("templates")).unwrap();
        fs::create_dir_all(project_dir.join("templates")).unwrap();
        fs::write(group_dir.join("templates/body.json"), "{\"id\": <%= var('id') %>,}").unwrap();
        fs::write(project_dir.join("templates/body.json"), "{}").unwrap();

        let mut j = job("Create");
        j.template = Some("body.json".into());
        j.vars.insert("id".into(), json!(5));

        let mut project = project_with(vec![group_with("orders", vec![j])]);
        project.directory = project_dir.clone();
        project.groups[0].directory = group_dir.clone();

        let mut ctx = RunContext::for_tests();
        ctx.output_directory = dir.path().join("out");
        let group = &project.groups[0];
        let job = &group.jobs[0];

        assert_eq!(job.find_template(group, &project), Some(group_dir.join("templates/body.json")));

        let request = job.prepare(group, &project, &ctx).unwrap();
        assert_eq!(request.body.as_deref(), Some("{\"id\": 5,}"));
        assert_eq!(job.warnings(), 1);

        let artifact = ctx.artifact_path("shop", "orders", "Create", "json");
        assert_eq!(request.artifact.as_ref(), Some(&artifact));
        assert_eq!(fs::read_to_string(&artifact).unwrap(), "{\"id\": 5,}");

        // generating again reuses the file written while rendering
        assert_eq!(job.generate_json_file(group, &project, &ctx).unwrap(), Some(artifact));
        assert_eq!(job.warnings(), 2);
    }

    #[test]
    fn valid_bodies_are_not_written_while_rendering() {
        let dir = tempfile::tempdir().unwrap();
        let templates = dir.path().join("g").join("templates");
        fs::create_dir_all(&templates).unwrap();
        fs::write(templates.join("body.json"), "{\"id\": 1}").unwrap();

        let mut j = job("Create");
        j.template = Some("body.json".into());
        let mut project = project_with(vec![group_with("g", vec![j])]);
        project.groups[0].directory = dir.path().join("g");

        let mut ctx = RunContext::for_tests();
        ctx.output_directory = dir.path().join("out");
        let group = &project.groups[0];

        let request = group.jobs[0].prepare(group, &project, &ctx).unwrap();
        assert_eq!(request.artifact, None);
        assert!(!ctx.artifact_path("shop", "g", "Create", "json").exists());
    }

    #[test]
    fn missing_template_is_an_error() {
        let mut j = job("Create");
        j.template = Some("does-not-exist.json".into());
        let project = project_with(vec![group_with("g", vec![j])]);
        let ctx = RunContext::for_tests();
        let group = &project.groups[0];

        assert!(matches!(
            group.jobs[0].prepare(group, &project, &ctx),
            Err(JobError::TemplateNotFound(_))
        ));
    }

    #[test]
    fn failed_transcript_write_closes_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript.txt");
        fs::write(&path, "").unwrap();
        let j = job("Order");
        let ctx = RunContext::for_tests();

        // opened read-only, so every write fails
        let mut transcript = Some(File::open(&path).unwrap());
        j.record(&mut transcript, "GET /order", &ctx);
        assert!(transcript.is_none());

        let mut transcript = Some(File::create(&path).unwrap());
        j.record(&mut transcript, "GET /order", &ctx);
        assert!(transcript.is_some());
        drop(transcript);
        assert_eq!(fs::read_to_string(&path).unwrap(), "GET /order\n");
    }

    async fn start_server() -> String {
        let app = Router::new()
            .route("/order", get(|| async { Json(json!({"id": 7})) }))
            .route(
                "/broken",
                get(|| async { ([(CONTENT_TYPE, "application/json")], "{\"id\": ") }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{addr}")
    }

    fn get_job(name: &str, endpoint: &str) -> Job {
        let mut j = job(name);
        j.method = Method::GET;
        j.endpoint = endpoint.into();
        j
    }

    fn ctx_in(dir: &Path) -> RunContext {
        let mut ctx = RunContext::for_tests();
        ctx.output_directory = dir.join("out");
        ctx
    }

    #[tokio::test]
    async fn save_body_creates_download_directory() {
        let dir = tempfile::tempdir().unwrap();
        let downloads = dir.path().join("downloads").join("orders");

        let mut j = get_job("Order", "/order");
        j.save_body = true;
        j.download_directory = Some(downloads.clone());

        let mut project = project_with(vec![group_with("g", vec![j])]);
        project.domain = start_server().await;
        let ctx = ctx_in(dir.path());
        let group = &project.groups[0];

        group.jobs[0].run(group, &project, &ctx, &Client::new()).await;

        let saved = fs::read_to_string(downloads.join("shop-g-Order.json")).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&saved).unwrap(), json!({"id": 7}));
    }

    #[tokio::test]
    async fn save_response_writes_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = project_with(vec![group_with("g", vec![get_job("Order", "/order")])]);
        let domain = start_server().await;
        project.domain = domain.clone();

        let mut ctx = ctx_in(dir.path());
        ctx.save_response = true;
        let group = &project.groups[0];

        group.jobs[0].run(group, &project, &ctx, &Client::new()).await;

        let transcript = fs::read_to_string(ctx.artifact_path("shop", "g", "Order", "request.txt")).unwrap();
        let mut lines = transcript.lines();
        assert_eq!(lines.next(), Some(format!("GET {domain}/order").as_str()));
        assert_eq!(lines.next(), Some("HTTP/1.1 200"));
        assert!(transcript.contains("content-type: application/json"));
        assert!(transcript.contains("{\"id\":7}"));
    }

    #[tokio::test]
    async fn malformed_json_response_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let mut j = get_job("Broken", "/broken");
        j.tests.push(Box::new(StatusCodeEquals::new("status", json!(200))));
        j.tests.push(Box::new(NotEmpty::new("id", "id".into())));

        let mut project = project_with(vec![group_with("g", vec![j])]);
        project.domain = start_server().await;
        let ctx = ctx_in(dir.path());
        let group = &project.groups[0];
        let job = &group.jobs[0];

        let row = job.run(group, &project, &ctx, &Client::new()).await;

        assert!(job.exchange().is_some());
        assert!(job.response().is_none());
        assert_eq!(job.warnings(), 1);
        assert_eq!((row.passed, row.failed, row.warnings), (1, 1, 1));
        assert!(job.tests[0].succeeded());
    }

    #[tokio::test]
    async fn transport_failure_leaves_response_unset() {
        let mut j = job("Down");
        j.method = Method::GET;
        j.tests.push(Box::new(crate::asserter::StatusCodeEquals::new("ok", json!(200))));
        j.tests.push(Box::new(crate::asserter::NotEmpty::new("id", "id".into())));

        let mut project = project_with(vec![group_with("g", vec![j])]);
        // nothing listens on port 1
        project.domain = "http://127.0.0.1:1".into();
        let ctx = RunContext::for_tests();
        let group = &project.groups[0];

        let row = group.jobs[0].run(group, &project, &ctx, &Client::new()).await;

        assert!(group.jobs[0].exchange().is_none());
        assert_eq!((row.passed, row.failed), (0, 2));
    }
}
