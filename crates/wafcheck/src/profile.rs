//! Test profiles and the store that loads them.
//!
//! A profile is one YAML document holding named test cases; each case is a
//! sequence of stages, and each stage pairs a request definition with the
//! outcome the engine is expected to produce.

use crate::error::SetupError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use wafcheck_engine::{ExpectedOutput, Payload};

/// Descriptive metadata of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Disabled profiles load but contribute no tests.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for ProfileMeta {
    fn default() -> Self {
        Self {
            author: None,
            name: None,
            description: None,
            enabled: true,
        }
    }
}

/// One decoded profile document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub meta: ProfileMeta,

    #[serde(default)]
    pub tests: Vec<TestCase>,
}

/// A named scenario made of one or more stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub test_title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,

    pub stages: Vec<StageEntry>,
}

impl TestCase {
    pub fn stage(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index).map(|entry| &entry.stage)
    }
}

/// List item wrapper: stages are written as `- stage: {...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEntry {
    pub stage: Stage,
}

/// One request/response exchange plus its expected outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(default)]
    pub input: StageInput,

    #[serde(default)]
    pub output: ExpectedOutput,
}

/// How to build the request of a stage.
///
/// `raw_request` wins over `encoded_request`, which wins over the structured
/// fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_addr: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Payload>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_request: Option<String>,

    /// Base64 of a complete raw request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_request: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stop_magic: bool,
}

/// A profile together with the file it came from.
#[derive(Debug, Clone)]
pub struct LoadedProfile {
    pub path: PathBuf,
    pub profile: Profile,
}

/// Every profile found under an input directory, in path order.
#[derive(Debug, Clone, Default)]
pub struct ProfileStore {
    profiles: Vec<LoadedProfile>,
}

impl ProfileStore {
    /// Recursively loads `*.yaml` and `*.yml` files under `root`.
    ///
    /// Fails on the first file that cannot be read or decoded.
    pub fn load(root: &Path) -> Result<Self, SetupError> {
        if !root.is_dir() {
            return Err(SetupError::MissingInput(root.to_path_buf()));
        }

        let mut paths = Vec::new();
        collect_profile_paths(root, &mut paths)?;
        paths.sort();

        let mut profiles = Vec::with_capacity(paths.len());
        for path in paths {
            let content = std::fs::read_to_string(&path).map_err(|source| SetupError::Read {
                path: path.clone(),
                source,
            })?;
            let profile: Profile =
                serde_yaml::from_str(&content).map_err(|e| SetupError::ProfileDecode {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
            debug!(
                "Loaded profile {} ({} tests)",
                path.display(),
                profile.tests.len()
            );
            profiles.push(LoadedProfile { path, profile });
        }

        Ok(Self { profiles })
    }

    /// Builds a store from already decoded profiles.
    pub fn from_profiles(profiles: Vec<LoadedProfile>) -> Self {
        Self { profiles }
    }

    pub fn profiles(&self) -> &[LoadedProfile] {
        &self.profiles
    }

    pub fn profile(&self, index: usize) -> Option<&LoadedProfile> {
        self.profiles.get(index)
    }

    /// Number of profile files loaded, disabled ones included.
    pub fn file_count(&self) -> usize {
        self.profiles.len()
    }

    pub fn test_case(&self, profile: usize, case: usize) -> Option<&TestCase> {
        self.profile(profile)?.profile.tests.get(case)
    }
}

fn collect_profile_paths(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), SetupError> {
    let read_err = |source| SetupError::Read {
        path: dir.to_path_buf(),
        source,
    };

    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if path.is_dir() {
            collect_profile_paths(&path, out)?;
        } else if path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == "yaml" || ext == "yml")
        {
            out.push(path);
        }
    }
    Ok(())
}
