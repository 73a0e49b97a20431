//! Pull / merge request creation on github.com and gitlab.com.
//!
//! With an API token the request is created through the host's REST API and
//! the reviewer is assigned. Without one, the host's "new pull request" URL
//! is returned so the user can finish in a browser.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

const API_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "intervene";

/// What to open.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PullRequest {
    pub title: String,
    pub body: String,
    pub reviewer: String,
    pub base_branch: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forge {
    GitHub,
    GitLab,
}

impl Forge {
    fn host(self) -> &'static str {
        match self {
            Forge::GitHub => "github.com",
            Forge::GitLab => "gitlab.com",
        }
    }
}

/// A hosted repository parsed from a remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepo {
    pub forge: Forge,
    /// `owner/repo`; GitLab paths may include nested groups.
    pub path: String,
}

/// API tokens, normally read from `GITHUB_TOKEN` / `GITLAB_TOKEN`.
#[derive(Debug, Clone, Default)]
pub struct ForgeTokens {
    pub github: Option<String>,
    pub gitlab: Option<String>,
}

impl ForgeTokens {
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            github: read("GITHUB_TOKEN"),
            gitlab: read("GITLAB_TOKEN"),
        }
    }

    pub fn for_forge(&self, forge: Forge) -> Option<&str> {
        match forge {
            Forge::GitHub => self.github.as_deref(),
            Forge::GitLab => self.gitlab.as_deref(),
        }
    }
}

/// Parse an `origin` URL.
///
/// Supports:
/// - https://github.com/owner/repo.git
/// - git@github.com:owner/repo.git
/// - ssh://git@gitlab.com/group/sub/repo.git
pub fn parse_remote(url: &str) -> Option<RemoteRepo> {
    let url = url.trim();
    for forge in [Forge::GitHub, Forge::GitLab] {
        let host = forge.host();
        let rest = if let Some(rest) = url.strip_prefix(&format!("git@{host}:")) {
            rest
        } else if let Some((_, rest)) = url.split_once(&format!("{host}/")) {
            // https://host/…, https://user@host/…, ssh://git@host/…
            let scheme_ok = url.starts_with("https://")
                || url.starts_with("http://")
                || url.starts_with("ssh://");
            if !scheme_ok {
                continue;
            }
            rest
        } else {
            continue;
        };

        let path = rest.trim_end_matches('/').trim_end_matches(".git");
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() < 2 {
            return None;
        }
        if forge == Forge::GitHub && segments.len() != 2 {
            return None;
        }
        return Some(RemoteRepo {
            forge,
            path: segments.join("/"),
        });
    }
    None
}

/// Browser URL for opening a request from `head` into `base` by hand.
pub fn compare_url(remote: &RemoteRepo, head: &str, base: &str) -> String {
    match remote.forge {
        Forge::GitHub => format!(
            "https://github.com/{}/compare/{base}...{head}?expand=1",
            remote.path
        ),
        Forge::GitLab => format!(
            "https://gitlab.com/{}/-/merge_requests/new?merge_request[source_branch]={head}&merge_request[target_branch]={base}",
            remote.path
        ),
    }
}

/// Open the request for `head`, returning its URL.
pub fn submit(
    remote: &RemoteRepo,
    head: &str,
    request: &PullRequest,
    token: Option<&str>,
) -> Result<String> {
    if head.is_empty() {
        bail!("cannot open a pull request from a detached HEAD");
    }
    if head == request.base_branch {
        bail!("current branch '{head}' is the base branch");
    }
    let Some(token) = token else {
        let url = compare_url(remote, head, &request.base_branch);
        info!(url = %url, "no API token set; returning compare URL");
        return Ok(url);
    };
    match remote.forge {
        Forge::GitHub => create_github(remote, head, request, token),
        Forge::GitLab => create_gitlab(remote, head, request, token),
    }
}

fn agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(API_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
}

fn create_github(remote: &RemoteRepo, head: &str, request: &PullRequest, token: &str) -> Result<String> {
    let agent = agent();
    let url = format!("https://api.github.com/repos/{}/pulls", remote.path);
    let created: Value = agent
        .post(&url)
        .set("Accept", "application/vnd.github+json")
        .set("Authorization", &format!("Bearer {token}"))
        .set("X-GitHub-Api-Version", "2022-11-28")
        .send_json(json!({
            "title": request.title,
            "body": request.body,
            "head": head,
            "base": request.base_branch,
        }))
        .map_err(api_error)
        .context("GitHub pull request creation failed")?
        .into_json()
        .context("failed to parse GitHub response")?;

    let html_url = created["html_url"]
        .as_str()
        .context("GitHub response has no html_url")?
        .to_string();

    if let Some(number) = created["number"].as_u64() {
        let reviewers_url = format!(
            "https://api.github.com/repos/{}/pulls/{number}/requested_reviewers",
            remote.path
        );
        let assigned = agent
            .post(&reviewers_url)
            .set("Accept", "application/vnd.github+json")
            .set("Authorization", &format!("Bearer {token}"))
            .set("X-GitHub-Api-Version", "2022-11-28")
            .send_json(json!({ "reviewers": [request.reviewer] }));
        if let Err(e) = assigned {
            warn!(reviewer = %request.reviewer, error = %api_error(e), "failed to request reviewer");
        }
    }
    info!(url = %html_url, "pull request created");
    Ok(html_url)
}

fn create_gitlab(remote: &RemoteRepo, head: &str, request: &PullRequest, token: &str) -> Result<String> {
    let url = format!(
        "https://gitlab.com/api/v4/projects/{}/merge_requests",
        remote.path.replace('/', "%2F")
    );
    let description = format!("{}\n\n/assign_reviewer @{}", request.body, request.reviewer);
    let created: Value = agent()
        .post(&url)
        .set("PRIVATE-TOKEN", token)
        .send_json(json!({
            "source_branch": head,
            "target_branch": request.base_branch,
            "title": request.title,
            "description": description,
        }))
        .map_err(api_error)
        .context("GitLab merge request creation failed")?
        .into_json()
        .context("failed to parse GitLab response")?;

    let web_url = created["web_url"]
        .as_str()
        .context("GitLab response has no web_url")?
        .to_string();
    info!(url = %web_url, "merge request created");
    Ok(web_url)
}

/// Flatten a ureq error into a message carrying the API's own explanation.
fn api_error(err: ureq::Error) -> anyhow::Error {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v["message"].as_str().map(str::to_string))
                .unwrap_or_else(|| body.chars().take(200).collect());
            anyhow::anyhow!("HTTP {code}: {message}")
        }
        ureq::Error::Transport(transport) => anyhow::anyhow!("transport error: {transport}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PullRequest {
        PullRequest {
            title: "Automated changes".to_string(),
            body: "Opened by intervene".to_string(),
            reviewer: "powerauto.ai".to_string(),
            base_branch: "main".to_string(),
        }
    }

    #[test]
    fn parses_github_remote_forms() {
        let expected = Some(RemoteRepo {
            forge: Forge::GitHub,
            path: "octo/widgets".to_string(),
        });
        assert_eq!(parse_remote("https://github.com/octo/widgets.git"), expected);
        assert_eq!(parse_remote("https://github.com/octo/widgets"), expected);
        assert_eq!(parse_remote("git@github.com:octo/widgets.git"), expected);
        assert_eq!(parse_remote("ssh://git@github.com/octo/widgets.git"), expected);
        assert_eq!(parse_remote("https://token@github.com/octo/widgets.git"), expected);
    }

    #[test]
    fn parses_nested_gitlab_groups() {
        let remote = parse_remote("git@gitlab.com:group/sub/project.git").unwrap();
        assert_eq!(remote.forge, Forge::GitLab);
        assert_eq!(remote.path, "group/sub/project");

        let remote = parse_remote("https://gitlab.com/team/app").unwrap();
        assert_eq!(remote.path, "team/app");
    }

    #[test]
    fn rejects_unsupported_remotes() {
        assert_eq!(parse_remote("https://bitbucket.org/a/b.git"), None);
        assert_eq!(parse_remote("/srv/git/repo.git"), None);
        assert_eq!(parse_remote("https://github.com/only-owner"), None);
        assert_eq!(parse_remote("https://github.com/a/b/c"), None);
    }

    #[test]
    fn compare_urls_per_forge() {
        let github = RemoteRepo {
            forge: Forge::GitHub,
            path: "octo/widgets".to_string(),
        };
        assert_eq!(
            compare_url(&github, "feature", "main"),
            "https://github.com/octo/widgets/compare/main...feature?expand=1"
        );

        let gitlab = RemoteRepo {
            forge: Forge::GitLab,
            path: "team/app".to_string(),
        };
        let url = compare_url(&gitlab, "feature", "main");
        assert!(url.starts_with("https://gitlab.com/team/app/-/merge_requests/new?"));
        assert!(url.contains("source_branch]=feature"));
        assert!(url.contains("target_branch]=main"));
    }

    #[test]
    fn submit_without_token_returns_compare_url() {
        let remote = parse_remote("git@github.com:octo/widgets.git").unwrap();
        let url = submit(&remote, "feature", &request(), None).unwrap();
        assert!(url.contains("compare/main...feature"));
    }

    #[test]
    fn submit_rejects_base_branch_and_detached_head() {
        let remote = parse_remote("git@github.com:octo/widgets.git").unwrap();
        assert!(submit(&remote, "main", &request(), None).is_err());
        assert!(submit(&remote, "", &request(), None).is_err());
    }

    #[test]
    fn tokens_select_by_forge() {
        let tokens = ForgeTokens {
            github: Some("gh".to_string()),
            gitlab: None,
        };
        assert_eq!(tokens.for_forge(Forge::GitHub), Some("gh"));
        assert_eq!(tokens.for_forge(Forge::GitLab), None);
    }
}
