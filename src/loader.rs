//! Discovery of `project.toml` and `group.toml` files below the working
//! directory, and the credential files that go with them.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;
use walkdir::WalkDir;

use crate::asserter::AssertionRegistry;
use crate::parser::CredentialsFile;
use crate::parser::GroupFile;
use crate::parser::ProjectFile;
use crate::project::Group;
use crate::project::Project;
use crate::validator::ValidationError;
use crate::validator::Validator;

pub const PROJECT_FILE: &str = "project.toml";
pub const GROUP_FILE: &str = "group.toml";
pub const CREDENTIALS_FILE: &str = "credentials.toml";
pub const DEFAULT_GROUP: &str = "default";

#[derive(Error, Debug, Diagnostic)]
pub enum LoadError {
    #[error("Failed to read {}", .path.display())]
    FileError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {}", .path.display())]
    TomlParsing {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    ValidationError(#[from] ValidationError),

    #[error("Project `{name}` is already defined, ignoring {}", .path.display())]
    DuplicateProject { name: String, path: PathBuf },

    #[error("Group `{group}` is already defined in project `{project}`, ignoring {}", .path.display())]
    DuplicateGroup {
        group: String,
        project: String,
        path: PathBuf,
    },

    #[error("Group `default` already exists in project `{project}`, ignoring the jobs of {}", .path.display())]
    DefaultGroupShadowed { project: String, path: PathBuf },

    #[error("Failed to walk the project tree")]
    Walk(#[from] walkdir::Error),
}

pub struct Loader<'a> {
    registry: &'a AssertionRegistry,
    global_credentials: Option<PathBuf>,
}

impl<'a> Loader<'a> {
    pub fn new(registry: &'a AssertionRegistry) -> Self {
        Self {
            registry,
            global_credentials: env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(format!(".{}-credentials.toml", crate::config::PROGRAM_NAME))),
        }
    }

    pub fn with_global_credentials(mut self, path: Option<PathBuf>) -> Self {
        self.global_credentials = path;
        self
    }

    /// Loads every project below `root`. Broken projects are reported
    /// and left out; the rest still load.
    pub fn load_all(&self, root: &Path) -> (Vec<Project>, Vec<LoadError>) {
        let mut projects: Vec<Project> = Vec::new();
        let mut errors = Vec::new();

        let paths = match discover(root, PROJECT_FILE) {
            Ok(paths) => paths,
            Err(error) => return (projects, vec![error]),
        };

        for path in paths {
            match self.load_project(&path) {
                Ok((project, dropped)) if projects.iter().any(|p| p.name == project.name) => {
                    errors.extend(dropped);
                    errors.push(LoadError::DuplicateProject {
                        name: project.name,
                        path,
                    });
                }
                Ok((project, dropped)) => {
                    errors.extend(dropped);
                    projects.push(project);
                }
                Err(error) => errors.push(error),
            }
        }

        for project in &mut projects {
            project.authorization = self.project_credentials(&project.directory, &project.name);
        }

        (projects, errors)
    }

    /// Loads one project file and every group below its directory. A
    /// broken group fails the whole project; duplicate groups are dropped
    /// and returned next to the project.
    pub fn load_project(&self, path: &Path) -> Result<(Project, Vec<LoadError>), LoadError> {
        let contents = read(path)?;
        let file: ProjectFile = toml::from_str(&contents).map_err(|source| LoadError::TomlParsing {
            path: path.to_path_buf(),
            source,
        })?;

        let validator = Validator::new(&contents, &path.display().to_string(), self.registry);
        let header = validator.validate_project(&file)?;
        let directory = path.parent().map(Path::to_path_buf).unwrap_or_default();

        let mut dropped = Vec::new();
        let mut discovered: Vec<Group> = Vec::new();
        for group_path in discover(&directory, GROUP_FILE)? {
            let group = self.load_group(&group_path)?;
            if discovered.iter().any(|g| g.name == group.name) {
                dropped.push(LoadError::DuplicateGroup {
                    group: group.name,
                    project: header.name.clone(),
                    path: group_path,
                });
                continue;
            }
            discovered.push(group);
        }

        let mut groups = Vec::new();
        if let Some(jobs) = &file.jobs
            && !jobs.is_empty()
        {
            if discovered.iter().any(|g| g.name == DEFAULT_GROUP) {
                dropped.push(LoadError::DefaultGroupShadowed {
                    project: header.name.clone(),
                    path: path.to_path_buf(),
                });
            } else {
                groups.push(Group {
                    name: DEFAULT_GROUP.to_string(),
                    directory: directory.clone(),
                    jobs: validator.create_jobs(jobs, DEFAULT_GROUP),
                });
            }
        }
        groups.extend(discovered);

        log::debug!("Loaded project {} with {} groups", header.name, groups.len());

        let project = Project {
            name: header.name,
            domain: header.domain,
            directory,
            authorization: BTreeMap::new(),
            groups,
        };
        Ok((project, dropped))
    }

    fn load_group(&self, path: &Path) -> Result<Group, LoadError> {
        let contents = read(path)?;
        let file: GroupFile = toml::from_str(&contents).map_err(|source| LoadError::TomlParsing {
            path: path.to_path_buf(),
            source,
        })?;
        let directory = path.parent().map(Path::to_path_buf).unwrap_or_default();

        let group = Validator::new(&contents, &path.display().to_string(), self.registry)
            .validate_group(&file, &directory)?;
        Ok(group)
    }

    /// `[authorization]` of the credentials file next to the project,
    /// falling back to `[authorization.<project>]` of the global file.
    pub fn project_credentials(&self, directory: &Path, project: &str) -> BTreeMap<String, String> {
        let local = directory.join(CREDENTIALS_FILE);
        if local.is_file() {
            return read_credentials(&local)
                .and_then(|creds| creds.authorization)
                .map(|table| strings(&table))
                .unwrap_or_default();
        }

        let global = self
            .global_credentials
            .as_deref()
            .filter(|path| path.is_file())
            .and_then(read_credentials)
            .and_then(|creds| creds.authorization)
            .and_then(|table| table.get(project).and_then(|v| v.as_table()).map(strings));

        global.unwrap_or_else(|| {
            log::debug!("No credentials found for project {project}");
            BTreeMap::new()
        })
    }

    /// The `[credentials]` table of the global file, visible to every job.
    pub fn run_credentials(&self) -> BTreeMap<String, String> {
        self.global_credentials
            .as_deref()
            .filter(|path| path.is_file())
            .and_then(read_credentials)
            .and_then(|creds| creds.credentials)
            .unwrap_or_default()
    }
}

/// All files called `file_name` below `root`, in a stable order.
pub fn discover(root: &Path, file_name: &str) -> Result<Vec<PathBuf>, LoadError> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() && entry.file_name() == file_name {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

fn read(path: &Path) -> Result<String, LoadError> {
    fs::read_to_string(path).map_err(|source| LoadError::FileError {
        path: path.to_path_buf(),
        source,
    })
}

fn read_credentials(path: &Path) -> Option<CredentialsFile> {
    let contents = fs::read_to_string(path)
        .inspect_err(|e| log::warn!("Failed to read {}: {e}", path.display()))
        .ok()?;
    toml::from_str(&contents)
        .inspect_err(|e| log::warn!("Failed to parse {}: {e}", path.display()))
        .ok()
}

fn strings(table: &toml::Table) -> BTreeMap<String, String> {
    table
        .iter()
        .map(|(key, value)| {
            let value = value.as_str().map(String::from).unwrap_or_else(|| value.to_string());
            (key.clone(), value)
        })
        .collect()
}
