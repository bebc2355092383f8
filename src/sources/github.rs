//! GitHub security advisories through the GraphQL API

use super::cache::{AdvisoryFeed, CachedSource};
use super::check_status;
use crate::advisory::SecurityAdvisory;
use crate::error::{AuditError, Result};
use crate::types::Severity;
use crate::version::{RangeDialect, VulnerableRangeSet};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

pub const NAME: &str = "github";

/// Environment variable holding the API token
pub const TOKEN_VARIABLE: &str = "SKJOLD_GITHUB_API_TOKEN";

const GRAPHQL_URL: &str = "https://api.github.com/graphql";
const PAGE_SIZE: u32 = 100;

const QUERY: &str = r#"
query($first: Int!, $after: String) {
    securityVulnerabilities(first: $first, after: $after, ecosystem: PIP, orderBy: {field: UPDATED_AT, direction: DESC}) {
        pageInfo {
            startCursor
            hasNextPage
            endCursor
        }
        totalCount
        edges {
            node {
                advisory {
                    ghsaId
                    publishedAt
                    references {
                        url
                    }
                    summary
                }
                firstPatchedVersion {
                    identifier
                }
                package {
                    ecosystem
                    name
                }
                severity
                updatedAt
                vulnerableVersionRange
            }
        }
    }
}
"#;

pub type GithubSource = CachedSource<GithubFeed>;

#[derive(Debug, Serialize)]
struct GraphqlRequest<'a> {
    query: &'a str,
    variables: PageVariables<'a>,
}

#[derive(Debug, Serialize)]
struct PageVariables<'a> {
    first: u32,
    after: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<ResponseData>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseData {
    security_vulnerabilities: VulnerabilityConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VulnerabilityConnection {
    page_info: PageInfo,
    #[serde(default)]
    total_count: u64,
    #[serde(default)]
    edges: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

/// One cached edge of the `securityVulnerabilities` connection
#[derive(Debug, Deserialize)]
struct Edge {
    node: VulnerabilityNode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VulnerabilityNode {
    advisory: AdvisoryNode,
    package: PackageNode,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    vulnerable_version_range: String,
    #[serde(default)]
    first_patched_version: Option<PatchedVersion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdvisoryNode {
    ghsa_id: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    references: Vec<ReferenceNode>,
}

#[derive(Debug, Deserialize)]
struct ReferenceNode {
    url: String,
}

#[derive(Debug, Deserialize)]
struct PackageNode {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PatchedVersion {
    identifier: String,
}

#[derive(Debug, Clone)]
pub struct GithubFeed {
    url: String,
    token: Option<String>,
}

impl GithubFeed {
    pub fn new(token: Option<String>) -> Self {
        Self {
            url: GRAPHQL_URL.to_string(),
            token,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    fn token(&self) -> Result<&str> {
        self.token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| AuditError::missing_credential(NAME, TOKEN_VARIABLE))
    }

    fn fetch_page(&self, client: &Client, token: &str, after: Option<&str>) -> Result<VulnerabilityConnection> {
        let request = GraphqlRequest {
            query: QUERY,
            variables: PageVariables {
                first: PAGE_SIZE,
                after,
            },
        };

        let response = client
            .post(&self.url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&request)
            .send()?;
        let body: GraphqlResponse = check_status("GitHub", response)?.json()?;

        if let Some(error) = body.errors.first() {
            return Err(AuditError::api("GitHub", error.message.clone()));
        }
        body.data
            .map(|data| data.security_vulnerabilities)
            .ok_or_else(|| AuditError::api("GitHub", "response without data"))
    }
}

impl AdvisoryFeed for GithubFeed {
    fn name(&self) -> &'static str {
        NAME
    }

    fn artifact_name(&self) -> &'static str {
        "github.cache"
    }

    fn fetch(&self, client: &Client) -> Result<Vec<u8>> {
        let token = self.token()?;

        let mut edges = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.fetch_page(client, token, cursor.as_deref())?;
            debug!(
                "Fetched {} of {} GitHub vulnerabilities",
                edges.len() + page.edges.len(),
                page.total_count
            );
            edges.extend(page.edges);

            match (page.page_info.has_next_page, page.page_info.end_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }

        Ok(serde_json::to_vec(&edges)?)
    }

    fn validate(&self, artifact: &[u8]) -> Result<()> {
        serde_json::from_slice::<Vec<Value>>(artifact)?;
        Ok(())
    }

    fn parse(&mut self, artifact: &[u8]) -> Result<Vec<SecurityAdvisory>> {
        let edges: Vec<Edge> = serde_json::from_slice(artifact)?;
        edges.into_iter().map(|edge| to_advisory(edge.node)).collect()
    }
}

fn to_advisory(node: VulnerabilityNode) -> Result<SecurityAdvisory> {
    let range = VulnerableRangeSet::parse(&node.vulnerable_version_range, RangeDialect::Npm)?;
    let references = node.advisory.references.into_iter().map(|r| r.url).collect();
    let url = format!("https://github.com/advisories/{}", node.advisory.ghsa_id);
    if let Some(patched) = &node.first_patched_version {
        debug!("{} fixed in {} {}", node.advisory.ghsa_id, node.package.name, patched.identifier);
    }

    Ok(SecurityAdvisory::builder(node.advisory.ghsa_id, NAME, node.package.name)
        .severity(node.severity.as_deref().map(Severity::from_label).unwrap_or(Severity::Unknown))
        .summary(node.advisory.summary)
        .url(url)
        .references(references)
        .range(range)
        .build())
}
