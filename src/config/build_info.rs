use std::env;

/// Build metadata injected through the environment by the deploy pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub git_commit: String,
    pub git_branch: String,
    pub build_date: String,
    pub version: String,
}

impl BuildInfo {
    pub fn from_env() -> Self {
        let var = |name: &str| env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            git_commit: var("GIT_COMMIT").unwrap_or_else(|| "unknown".to_string()),
            git_branch: var("GIT_BRANCH").unwrap_or_else(|| "unknown".to_string()),
            build_date: var("BUILD_DATE").unwrap_or_else(|| "unknown".to_string()),
            version: var("APP_VERSION").unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
        }
    }

    /// First seven characters of the commit, or `unknown`.
    pub fn short_commit(&self) -> String {
        if self.git_commit == "unknown" {
            return self.git_commit.clone();
        }
        self.git_commit.chars().take(7).collect()
    }
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self {
            git_commit: "unknown".to_string(),
            git_branch: "unknown".to_string(),
            build_date: "unknown".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
