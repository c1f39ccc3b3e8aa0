use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::asserter::AssertionConf;

/// `project.toml`
#[derive(Deserialize, Debug, Clone)]
pub struct ProjectFile {
    pub name: Option<String>,
    pub domain: Option<String>,
    /// Jobs declared directly on the project end up in the `default` group.
    pub jobs: Option<Vec<JobConf>>,
}

/// `group.toml`
#[derive(Deserialize, Debug, Clone)]
pub struct GroupFile {
    pub name: Option<String>,
    pub jobs: Option<Vec<JobConf>>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct JobConf {
    pub name: String,
    pub method: Option<String>,
    pub template: Option<String>,
    pub endpoint: Option<String>,
    pub authorization: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
    /// Seconds to wait before sending.
    pub wait: Option<f64>,
    pub vars: Option<BTreeMap<String, serde_json::Value>>,
    pub tests: Option<Vec<AssertionConf>>,
    pub ignore_body: Option<bool>,
    pub print_body: Option<bool>,
    pub save_body: Option<bool>,
    pub download_directory: Option<PathBuf>,
}

/// `credentials.toml` next to a project, or the global credentials file.
///
/// Locally `[authorization]` holds the project's entries directly; the
/// global file nests them per project as `[authorization.<project>]` and
/// may carry run-wide entries under `[credentials]`.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct CredentialsFile {
    pub authorization: Option<toml::Table>,
    pub credentials: Option<BTreeMap<String, String>>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_group_with_jobs_and_tests() {
        let group: GroupFile = toml::from_str(
            r#"
            name = "orders"

            [[jobs]]
            name = "Login"
            template = "login.json"
            endpoint = "/login"
            wait = 1

            [[jobs]]
            name = "CreateOrder"
            method = "PUT"
            endpoint = "/orders/<%= var('id') %>"
            headers = { x-client = "apiquest" }
            vars = { id = 5, note = "first" }

            [[jobs.tests]]
            type = "StatusCodeEquals"
            value = 201
            "#,
        )
        .unwrap();

        let jobs = group.jobs.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].name, "Login");
        assert_eq!(jobs[0].wait, Some(1.0));
        assert_eq!(jobs[1].method.as_deref(), Some("PUT"));
        assert_eq!(jobs[1].vars.as_ref().unwrap()["id"], serde_json::json!(5));
        assert_eq!(jobs[1].headers.as_ref().unwrap()["x-client"], "apiquest");
        assert_eq!(jobs[1].tests.as_ref().unwrap()[0].kind, "StatusCodeEquals");
    }

    #[test]
    fn parses_global_credentials() {
        let creds: CredentialsFile = toml::from_str(
            r#"
            [credentials]
            api_key = "k"

            [authorization.shop]
            user = "alice"
            "#,
        )
        .unwrap();

        assert_eq!(creds.credentials.unwrap()["api_key"], "k");
        let shop = creds.authorization.unwrap();
        assert_eq!(shop["shop"]["user"].as_str(), Some("alice"));
    }
}
