//! Shared handler state: the options plus a cache of opened repositories.
//! Repositories are kept per on-disk path so concurrent requests against
//! the same repository share one lock manager and one set of caches.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::http::HeaderMap;
use git_store::Repository;
use parking_lot::Mutex;

use crate::config::GitHttpOptions;
use crate::errors::GitHttpError;
use crate::repo_path::{resolve_repo_dir, validate_repo_name};

#[derive(Clone)]
pub struct GitHttp {
    options: Arc<GitHttpOptions>,
    repositories: Arc<Mutex<HashMap<PathBuf, Arc<Repository>>>>,
}

impl GitHttp {
    pub fn new(options: GitHttpOptions) -> Self {
        GitHttp {
            options: Arc::new(options),
            repositories: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn options(&self) -> &GitHttpOptions {
        &self.options
    }

    /// Resolves the route value to a repository: resolver override, built-in
    /// then custom validation of the raw name, normalization, and directory
    /// lookup under the configured root.
    pub(crate) fn resolve_repository(
        &self,
        headers: &HeaderMap,
        route: &str,
    ) -> Result<(String, Arc<Repository>), GitHttpError> {
        let route = route.strip_suffix(".git").unwrap_or(route);
        let raw = match &self.options.repository_resolver {
            Some(resolver) => resolver(headers, route).unwrap_or_else(|| route.to_string()),
            None => route.to_string(),
        };

        validate_repo_name(&raw).map_err(GitHttpError::BadRequest)?;
        if let Some(validator) = &self.options.repository_name_validator
            && !validator(&raw)
        {
            return Err(GitHttpError::BadRequest(format!(
                "repository name {raw:?} was rejected"
            )));
        }

        let name = match &self.options.repository_name_normalizer {
            Some(normalizer) => normalizer(&raw),
            None => raw,
        };

        let Some(dir) = resolve_repo_dir(&self.options.repository_root, &name) else {
            tracing::debug!("repository {name:?} not found under {}", self.options.repository_root.display());
            return Err(GitHttpError::NotFound);
        };
        let repo = self.repository(&dir)?;
        Ok((name, repo))
    }

    fn repository(&self, dir: &Path) -> Result<Arc<Repository>, GitHttpError> {
        if let Some(repo) = self.repositories.lock().get(dir).cloned() {
            return Ok(repo);
        }
        let repo = Arc::new(Repository::open(dir)?);
        let mut cache = self.repositories.lock();
        // a concurrent opener may have won; keep the first instance so every
        // request shares its lock manager
        let entry = cache
            .entry(dir.to_path_buf())
            .or_insert_with(|| repo.clone());
        Ok(entry.clone())
    }
}
