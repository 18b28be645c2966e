//! GitLab REST v4 client (blocking, `ureq`).

use super::{Applied, Forge, Mutation, Scope};
use crate::git::RemoteInfo;
use crate::models::{Discussion, Label, Milestone, Note, Noteable, RemoteResource, User};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Results per page requested from list endpoints
const PER_PAGE: u32 = 100;

/// User-Agent sent with every request
const USER_AGENT: &str = concat!("gltext/", env!("CARGO_PKG_VERSION"));

/// Client for one GitLab project.
pub struct GitLabClient {
    agent: ureq::Agent,
    /// `https://host/api/v4`
    api_base: String,
    /// URL-encoded `group/project`
    project: String,
    token: String,
}

impl GitLabClient {
    pub fn new(remote: &RemoteInfo, token: impl Into<String>) -> Self {
        Self::with_api_base(
            format!("{}/api/v4", remote.base_url()),
            &remote.project,
            token,
        )
    }

    pub fn with_api_base(api_base: impl Into<String>, project: &str, token: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(60))
            .user_agent(USER_AGENT)
            .build();
        Self {
            agent,
            api_base: api_base.into(),
            project: urlencoding::encode(project).into_owned(),
            token: token.into(),
        }
    }

    fn project_url(&self, path: &str) -> String {
        format!("{}/projects/{}/{}", self.api_base, self.project, path)
    }

    fn scope_url(&self, scope: &Scope, path: &str) -> String {
        match scope {
            Scope::Project => self.project_url(path),
            Scope::Group(group) => format!(
                "{}/groups/{}/{}",
                self.api_base,
                urlencoding::encode(group),
                path
            ),
        }
    }

    fn get_json<T: DeserializeOwned>(&self, operation: &str, url: &str) -> Result<T> {
        tracing::debug!(url, "GET");
        let response = self
            .agent
            .get(url)
            .set("PRIVATE-TOKEN", &self.token)
            .call()
            .map_err(|e| remote_error(operation, e))?;
        response
            .into_json()
            .map_err(|e| Error::remote(operation, format!("invalid response: {}", e)))
    }

    /// GET every page of a list endpoint, following `X-Next-Page`.
    fn get_all<T: DeserializeOwned>(&self, operation: &str, url: &str) -> Result<Vec<T>> {
        let separator = if url.contains('?') { '&' } else { '?' };
        let first = format!("{}{}per_page={}", url, separator, PER_PAGE);
        let mut items = Vec::new();
        let mut next = Some(first.clone());

        while let Some(page_url) = next.take() {
            tracing::debug!(url = %page_url, "GET");
            let response = self
                .agent
                .get(&page_url)
                .set("PRIVATE-TOKEN", &self.token)
                .call()
                .map_err(|e| remote_error(operation, e))?;
            next = response
                .header("X-Next-Page")
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| format!("{}&page={}", first, p));
            let mut page: Vec<T> = response
                .into_json()
                .map_err(|e| Error::remote(operation, format!("invalid response: {}", e)))?;
            items.append(&mut page);
        }
        Ok(items)
    }

    fn first_merge_request(&self, branch: &str, state: &str) -> Result<Option<RemoteResource>> {
        let url = self.project_url(&format!(
            "merge_requests?source_branch={}&state={}",
            urlencoding::encode(branch),
            state
        ));
        let found: Vec<RemoteResource> = self.get_json("find merge request", &url)?;
        Ok(found.into_iter().next())
    }
}

fn remote_error(operation: &str, err: ureq::Error) -> Error {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            Error::Remote {
                operation: operation.to_string(),
                status: Some(code),
                message: body.trim().to_string(),
            }
        }
        other => Error::remote(operation, other.to_string()),
    }
}

impl Forge for GitLabClient {
    fn get_issue(&self, iid: u64) -> Result<RemoteResource> {
        self.get_json("get issue", &self.project_url(&format!("issues/{}", iid)))
    }

    fn get_merge_request(&self, iid: u64) -> Result<RemoteResource> {
        self.get_json(
            "get merge request",
            &self.project_url(&format!("merge_requests/{}", iid)),
        )
    }

    fn find_merge_request(&self, branch: &str) -> Result<RemoteResource> {
        if let Some(mr) = self.first_merge_request(branch, "opened")? {
            return Ok(mr);
        }
        self.first_merge_request(branch, "all")?
            .ok_or_else(|| Error::NotFound(format!("merge request for branch '{}'", branch)))
    }

    fn list_threads(&self, target: Noteable) -> Result<Vec<Discussion>> {
        self.get_all(
            "list discussions",
            &self.project_url(&format!("{}/discussions", target.api_path())),
        )
    }

    fn list_users(&self, scope: &Scope) -> Result<Vec<User>> {
        let path = match scope {
            Scope::Project => "users",
            Scope::Group(_) => "members/all",
        };
        self.get_all("list users", &self.scope_url(scope, path))
    }

    fn list_milestones(&self, scope: &Scope) -> Result<Vec<Milestone>> {
        self.get_all(
            "list milestones",
            &self.scope_url(scope, "milestones?state=active"),
        )
    }

    fn list_labels(&self, scope: &Scope) -> Result<Vec<Label>> {
        self.get_all("list labels", &self.scope_url(scope, "labels"))
    }

    fn mutation_url(&self, mutation: &Mutation) -> String {
        self.project_url(&mutation.path())
    }

    fn apply(&self, mutation: &Mutation) -> Result<Applied> {
        let operation = mutation.describe();
        let url = self.mutation_url(mutation);
        tracing::debug!(method = mutation.method(), url = %url, "sending");

        let request = self
            .agent
            .request(mutation.method(), &url)
            .set("PRIVATE-TOKEN", &self.token);
        let body = mutation.body();
        let response = if body.is_null() {
            request.call()
        } else {
            request.send_json(body)
        }
        .map_err(|e| remote_error(&operation, e))?;
        let invalid = |e: std::io::Error| Error::remote(&operation, format!("invalid response: {}", e));

        match mutation {
            Mutation::CreateThread { .. } | Mutation::CreateDiffComment { .. } => {
                let discussion: Discussion = response.into_json().map_err(invalid)?;
                let note_id = discussion
                    .notes
                    .first()
                    .map(|n| n.id)
                    .ok_or_else(|| Error::remote(&operation, "created discussion has no notes"))?;
                Ok(Applied::Thread {
                    discussion_id: discussion.id,
                    note_id,
                })
            }
            Mutation::CreateComment { .. } | Mutation::UpdateComment { .. } => {
                let note: Note = response.into_json().map_err(invalid)?;
                Ok(Applied::Note { note_id: note.id })
            }
            Mutation::SetResolved { .. }
            | Mutation::UpdateResource { .. }
            | Mutation::DeleteComment { .. }
            | Mutation::MergeResource { .. } => Ok(Applied::Done),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GitLabClient {
        let remote = RemoteInfo::parse("origin", "git@gitlab.example.com:group/sub/project.git").unwrap();
        GitLabClient::new(&remote, "secret")
    }

    #[test]
    fn test_project_url_escapes_namespace() {
        assert_eq!(
            client().project_url("issues/3"),
            "https://gitlab.example.com/api/v4/projects/group%2Fsub%2Fproject/issues/3"
        );
    }

    #[test]
    fn test_group_scope_url() {
        assert_eq!(
            client().scope_url(&Scope::Group("my group".to_string()), "labels"),
            "https://gitlab.example.com/api/v4/groups/my%20group/labels"
        );
    }

    #[test]
    fn test_trace_never_contains_token() {
        let client = client();
        let mutation = Mutation::SetResolved {
            target: Noteable::MergeRequest(9),
            discussion_id: "d1".to_string(),
            resolved: false,
        };
        let trace = client.trace(&mutation);
        assert!(!trace.contains("secret"));
        assert!(trace.contains("$GITLAB_TOKEN"));
        assert!(trace.contains("/projects/group%2Fsub%2Fproject/merge_requests/9/discussions/d1"));
    }
}
