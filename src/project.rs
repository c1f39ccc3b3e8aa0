use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::job::Job;

/// A loaded project: base domain, credential scope and its groups.
#[derive(Debug)]
pub struct Project {
    pub name: String,
    pub domain: String,
    pub directory: PathBuf,
    pub authorization: BTreeMap<String, String>,
    pub groups: Vec<Group>,
}

impl Project {
    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|group| group.name == name)
    }
}

/// Jobs in declaration order. Later jobs may read the responses of
/// earlier ones.
#[derive(Debug)]
pub struct Group {
    pub name: String,
    pub directory: PathBuf,
    pub jobs: Vec<Job>,
}

impl Group {
    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|job| job.name == name)
    }
}
