//! Project listing through Cloud Resource Manager v3 `projects:search`.

use anyhow::{bail, Result};
use serde::Deserialize;

use crate::models::ProjectSummary;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchProjectsResponse {
    #[serde(default)]
    projects: Vec<ProjectEntry>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectEntry {
    project_id: String,
    #[serde(default)]
    state: Option<String>,
}

/// Every active project the token can see, across all result pages.
pub async fn search_projects(
    http: &reqwest::Client,
    base_url: &str,
    access_token: &str,
) -> Result<Vec<ProjectSummary>> {
    let url = format!("{}/v3/projects:search", base_url.trim_end_matches('/'));
    let mut projects = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let mut request = http.get(&url).bearer_auth(access_token);
        if let Some(token) = &page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Resource Manager API error {}: {}", status, body_text);
        }

        let page: SearchProjectsResponse = response.json().await?;
        collect_active(&mut projects, page.projects);

        match page.next_page_token.filter(|t| !t.is_empty()) {
            Some(token) => page_token = Some(token),
            None => return Ok(projects),
        }
    }
}

fn collect_active(out: &mut Vec<ProjectSummary>, entries: Vec<ProjectEntry>) {
    out.extend(
        entries
            .into_iter()
            .filter(|p| p.state.as_deref().map_or(true, |s| s == "ACTIVE"))
            .map(|p| ProjectSummary {
                project_id: p.project_id,
            }),
    );
}
