//! Pluggable checks run against a job's response.
//!
//! Each `[[jobs.tests]]` entry names its kind with `type`; the
//! [`AssertionRegistry`] maps that tag to a constructor. Built in are
//! `NotEmpty`, `RegexMatch` and `StatusCodeEquals`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::keypath;
use crate::keypath::KeyPath;
use crate::macros::MacroEnv;
use crate::runner::CapturedResponse;

#[derive(Debug, Error)]
pub enum AssertionError {
    #[error("Unknown test type `{kind}`. Available types: {available}")]
    UnknownTestType { kind: String, available: String },

    #[error("Test `{test}` of type {kind} requires `{setting}`")]
    MissingSetting {
        test: String,
        kind: String,
        setting: &'static str,
    },
}

/// Declarative configuration of one test, as written in the job table.
#[derive(Deserialize, Debug, Clone)]
pub struct AssertionConf {
    #[serde(rename = "type", alias = "Type")]
    pub kind: String,
    pub name: Option<String>,
    pub key: Option<KeyPath>,
    pub value: Option<Value>,
}

impl AssertionConf {
    fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.kind.clone())
    }

    fn require_key(&self) -> Result<KeyPath, AssertionError> {
        self.key.clone().ok_or_else(|| self.missing("key"))
    }

    fn require_value(&self) -> Result<Value, AssertionError> {
        self.value.clone().ok_or_else(|| self.missing("value"))
    }

    fn missing(&self, setting: &'static str) -> AssertionError {
        AssertionError::MissingSetting {
            test: self.display_name(),
            kind: self.kind.clone(),
            setting,
        }
    }
}

pub trait Assertion: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Whether the check needs the response body parsed as json.
    fn requires_parsed_body(&self) -> bool {
        true
    }

    /// Evaluates the check and remembers the outcome.
    fn test(&self, response: &CapturedResponse, env: &MacroEnv<'_>) -> bool;

    /// Outcome of the last `test`, without evaluating again.
    fn succeeded(&self) -> bool;
}

type Constructor = fn(&AssertionConf) -> Result<Box<dyn Assertion>, AssertionError>;

pub struct AssertionRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl AssertionRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("NotEmpty", NotEmpty::build);
        registry.register("RegexMatch", RegexMatch::build);
        registry.register("Regexp", RegexMatch::build);
        registry.register("StatusCodeEquals", StatusCodeEquals::build);
        registry.register("StatusCode", StatusCodeEquals::build);
        registry
    }

    pub fn register(&mut self, kind: &str, constructor: Constructor) {
        self.constructors.insert(kind.to_string(), constructor);
    }

    pub fn build(&self, conf: &AssertionConf) -> Result<Box<dyn Assertion>, AssertionError> {
        let constructor = self.constructors.get(&conf.kind).ok_or_else(|| {
            AssertionError::UnknownTestType {
                kind: conf.kind.clone(),
                available: self.constructors.keys().cloned().collect::<Vec<_>>().join(", "),
            }
        })?;

        constructor(conf)
    }
}

/// Outcome flag shared by the built-in checks. A check that never ran
/// counts as succeeded.
#[derive(Debug, Default)]
struct Outcome(AtomicBool);

impl Outcome {
    fn record(&self, success: bool) -> bool {
        self.0.store(!success, Ordering::Relaxed);
        success
    }

    fn succeeded(&self) -> bool {
        !self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct NotEmpty {
    name: String,
    key: KeyPath,
    outcome: Outcome,
}

impl NotEmpty {
    pub fn new(name: impl Into<String>, key: KeyPath) -> Self {
        Self {
            name: name.into(),
            key,
            outcome: Outcome::default(),
        }
    }

    fn build(conf: &AssertionConf) -> Result<Box<dyn Assertion>, AssertionError> {
        Ok(Box::new(Self::new(conf.display_name(), conf.require_key()?)))
    }
}

impl Assertion for NotEmpty {
    fn name(&self) -> &str {
        &self.name
    }

    fn test(&self, response: &CapturedResponse, _env: &MacroEnv<'_>) -> bool {
        let value = response
            .body_json
            .as_ref()
            .and_then(|body| keypath::extract(body, self.key.keys()));

        let success = match value {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::Object(map)) => !map.is_empty(),
            Some(Value::Bool(_)) | Some(Value::Number(_)) => true,
        };

        self.outcome.record(success)
    }

    fn succeeded(&self) -> bool {
        self.outcome.succeeded()
    }
}

#[derive(Debug)]
pub struct RegexMatch {
    name: String,
    key: KeyPath,
    pattern: String,
    outcome: Outcome,
}

impl RegexMatch {
    pub fn new(name: impl Into<String>, key: KeyPath, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key,
            pattern: pattern.into(),
            outcome: Outcome::default(),
        }
    }

    fn build(conf: &AssertionConf) -> Result<Box<dyn Assertion>, AssertionError> {
        let pattern = match conf.require_value()? {
            Value::String(s) => s,
            other => other.to_string(),
        };
        Ok(Box::new(Self::new(conf.display_name(), conf.require_key()?, pattern)))
    }

    fn matches(&self, response: &CapturedResponse, env: &MacroEnv<'_>) -> bool {
        let value = response
            .body_json
            .as_ref()
            .and_then(|body| keypath::extract(body, self.key.keys()));

        let text = match value {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => {
                log::debug!("{}: cannot match a pattern against {other}", self.name);
                return false;
            }
        };

        let pattern = match env.render(&self.pattern) {
            Ok(pattern) => pattern,
            Err(error) => {
                log::debug!("{}: rendering pattern failed: {error}", self.name);
                return false;
            }
        };

        match Regex::new(&pattern) {
            Ok(regex) => regex.is_match(&text),
            Err(error) => {
                log::debug!("{}: invalid pattern {pattern}: {error}", self.name);
                false
            }
        }
    }
}

impl Assertion for RegexMatch {
    fn name(&self) -> &str {
        &self.name
    }

    fn test(&self, response: &CapturedResponse, env: &MacroEnv<'_>) -> bool {
        let success = self.matches(response, env);
        self.outcome.record(success)
    }

    fn succeeded(&self) -> bool {
        self.outcome.succeeded()
    }
}

#[derive(Debug)]
pub struct StatusCodeEquals {
    name: String,
    expected: Value,
    outcome: Outcome,
}

impl StatusCodeEquals {
    pub fn new(name: impl Into<String>, expected: Value) -> Self {
        Self {
            name: name.into(),
            expected,
            outcome: Outcome::default(),
        }
    }

    fn build(conf: &AssertionConf) -> Result<Box<dyn Assertion>, AssertionError> {
        Ok(Box::new(Self::new(conf.display_name(), conf.require_value()?)))
    }
}

impl Assertion for StatusCodeEquals {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires_parsed_body(&self) -> bool {
        false
    }

    fn test(&self, response: &CapturedResponse, env: &MacroEnv<'_>) -> bool {
        let expected = match &self.expected {
            Value::String(source) => match env.render(source) {
                Ok(expected) => expected,
                Err(error) => {
                    log::debug!("{}: rendering expected status failed: {error}", self.name);
                    return self.outcome.record(false);
                }
            },
            other => other.to_string(),
        };

        self.outcome.record(response.status.as_str() == expected)
    }

    fn succeeded(&self) -> bool {
        self.outcome.succeeded()
    }
}

#[cfg(test)]
mod test {
    use reqwest::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::config::RunContext;
    use crate::project::test_support::group_with;
    use crate::project::test_support::job;
    use crate::project::test_support::project_with;

    fn response(status: u16, body: Option<Value>) -> CapturedResponse {
        CapturedResponse {
            status: StatusCode::from_u16(status).unwrap(),
            version: reqwest::Version::HTTP_11,
            headers: Default::default(),
            body: vec![],
            body_json: body,
        }
    }

    /// Runs `check` with a macro env for a job carrying `vars`.
    fn with_env(vars: Vec<(&str, Value)>, check: impl FnOnce(&MacroEnv<'_>)) {
        let mut j = job("Check");
        for (name, value) in vars {
            j.vars.insert(name.to_string(), value);
        }
        let project = project_with(vec![group_with("g", vec![j])]);
        let ctx = RunContext::for_tests();
        let group = &project.groups[0];
        let env = MacroEnv::new(&group.jobs[0], group, &project, &ctx);
        check(&env);
    }

    #[test]
    fn not_empty() {
        with_env(vec![], |env| {
            let body = json!({"s": "x", "n": 0, "list": [1], "empty": "", "none": [], "null": null});
            let resp = response(200, Some(body));

            for key in ["s", "n", "list"] {
                assert!(NotEmpty::new(key, key.into()).test(&resp, env), "{key}");
            }
            for key in ["empty", "none", "null", "absent"] {
                let check = NotEmpty::new(key, key.into());
                assert!(!check.test(&resp, env), "{key}");
                assert!(!check.succeeded());
            }
        });
    }

    #[test]
    fn regex_coerces_scalars() {
        with_env(vec![], |env| {
            let resp = response(200, Some(json!({"flag": false, "count": 42, "nothing": null})));

            let check = RegexMatch::new("flag", "flag".into(), "^false$");
            assert!(check.test(&resp, env));
            assert!(check.succeeded());

            assert!(RegexMatch::new("count", "count".into(), "^4\\d$").test(&resp, env));
            assert!(RegexMatch::new("nothing", "nothing".into(), "^$").test(&resp, env));
        });
    }

    #[test]
    fn regex_renders_pattern_through_macros() {
        with_env(vec![("expected", json!("ab+c"))], |env| {
            let resp = response(200, Some(json!({"data": {"code": "xabbbcx"}})));
            let key = KeyPath::Multiple(vec![
                keypath::Key::Name("data".into()),
                keypath::Key::Name("code".into()),
            ]);
            let check = RegexMatch::new("code", key, "<%= var('expected') %>");
            assert!(check.test(&resp, env));
        });
    }

    #[test]
    fn regex_failures_do_not_panic() {
        with_env(vec![], |env| {
            let resp = response(200, Some(json!({"obj": {"a": 1}, "s": "abc"})));

            assert!(!RegexMatch::new("obj", "obj".into(), ".*").test(&resp, env));
            assert!(!RegexMatch::new("bad", "s".into(), "(").test(&resp, env));
            assert!(!RegexMatch::new("macro", "s".into(), "<%= var('nope') %>").test(&resp, env));
        });
    }

    #[test]
    fn status_code_is_exact_match() {
        with_env(vec![("status", json!("201"))], |env| {
            let ok = response(200, None);
            let unauthorized = response(401, None);

            assert!(StatusCodeEquals::new("num", json!(200)).test(&ok, env));
            assert!(StatusCodeEquals::new("str", json!("200")).test(&ok, env));
            assert!(!StatusCodeEquals::new("num", json!(200)).test(&unauthorized, env));

            let pattern = StatusCodeEquals::new("pattern", json!("40[13]"));
            assert!(!pattern.test(&unauthorized, env));
            assert!(!pattern.succeeded());

            let templated = StatusCodeEquals::new("var", json!("<%= var('status') %>"));
            assert!(templated.test(&response(201, None), env));
            assert!(!templated.requires_parsed_body());
        });
    }

    #[test]
    fn registry_builds_known_types() {
        let registry = AssertionRegistry::builtin();
        let conf: AssertionConf = toml::from_str(
            r#"
            type = "RegexMatch"
            name = "token looks right"
            key = ["data", "token"]
            value = "^[a-z]+$"
            "#,
        )
        .unwrap();

        let check = registry.build(&conf).unwrap();
        assert_eq!(check.name(), "token looks right");
        assert!(check.requires_parsed_body());
        assert!(check.succeeded());
    }

    #[test]
    fn registry_rejects_unknown_and_incomplete() {
        let registry = AssertionRegistry::builtin();

        let unknown: AssertionConf = toml::from_str(r#"type = "Contains""#).unwrap();
        assert!(matches!(
            registry.build(&unknown),
            Err(AssertionError::UnknownTestType { ref kind, .. }) if kind == "Contains"
        ));

        let incomplete: AssertionConf = toml::from_str(r#"type = "NotEmpty""#).unwrap();
        assert!(matches!(
            registry.build(&incomplete),
            Err(AssertionError::MissingSetting { setting: "key", .. })
        ));
    }

    #[test]
    fn registry_accepts_custom_types() {
        #[derive(Debug)]
        struct AlwaysFails;

        impl Assertion for AlwaysFails {
            fn name(&self) -> &str {
                "always fails"
            }
            fn test(&self, _: &CapturedResponse, _: &MacroEnv<'_>) -> bool {
                false
            }
            fn succeeded(&self) -> bool {
                false
            }
        }

        let mut registry = AssertionRegistry::empty();
        registry.register("AlwaysFails", |_| Ok(Box::new(AlwaysFails) as Box<dyn Assertion>));

        let conf: AssertionConf = toml::from_str(r#"type = "AlwaysFails""#).unwrap();
        assert_eq!(registry.build(&conf).unwrap().name(), "always fails");
    }
}
