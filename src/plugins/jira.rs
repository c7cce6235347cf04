//! JIRA issue lookups for issue keys mentioned in channel chatter.

use crate::Activation;
use crate::error::{PluginError, Result};
use crate::plugins::registry::PluginContext;
use crate::plugins::{Plugin, PluginDescriptor, PluginOutcome, PluginRequest, trim_trailing_punctuation};

use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

pub const NAME: &str = "jira";
pub const PURPOSE: &str =
    "*JIRA*: I listen for jira issue keys and display information about the given issue.";

const DESCRIPTION_LIMIT: usize = 256;

static ISSUE_KEY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[A-Z]{1,7}-\d{2,6}$").expect("hardcoded issue key regex"));

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor {
        name: NAME.into(),
        activation: Activation::Passive,
        purpose: PURPOSE.into(),
    }
}

#[derive(Debug, Deserialize)]
struct Issue {
    fields: IssueFields,
}

#[derive(Debug, Deserialize)]
struct IssueFields {
    summary: Option<String>,
    description: Option<String>,
    status: Option<Named>,
    assignee: Option<Person>,
    reporter: Option<Person>,
    created: Option<String>,
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Person {
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    name: Option<String>,
}

impl Person {
    fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or("N/A")
    }
}

pub struct JiraPlugin {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
}

impl JiraPlugin {
    pub fn from_context(context: &PluginContext) -> Result<Self> {
        let settings = &context.settings.jira;
        let missing = |key: &str| PluginError::MissingConfig {
            plugin: NAME.into(),
            key: key.into(),
        };

        Ok(Self {
            http: context.http.clone(),
            base_url: settings
                .url
                .clone()
                .ok_or_else(|| missing("JIRA_URL"))?
                .trim_end_matches('/')
                .to_string(),
            user: settings.user.clone().ok_or_else(|| missing("JIRA_USER"))?,
            password: settings.password.clone().ok_or_else(|| missing("JIRA_PASSWORD"))?,
        })
    }

    async fn fetch_issue(&self, key: &str) -> Result<Issue> {
        let url = format!("{}/rest/api/2/issue/{}", self.base_url, key);
        let request_error = |source| PluginError::Request {
            plugin: NAME.into(),
            source,
        };

        let issue = self
            .http
            .get(&url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(request_error)?
            .json::<Issue>()
            .await
            .map_err(request_error)?;

        Ok(issue)
    }
}

impl Plugin for JiraPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn activation(&self) -> Activation {
        Activation::Passive
    }

    fn purpose(&self) -> &str {
        PURPOSE
    }

    async fn run(&self, request: PluginRequest<'_>) -> Result<PluginOutcome> {
        let Some(key) = find_issue_key(request.tokens) else {
            return Ok(PluginOutcome::no_match());
        };

        tracing::debug!(issue = %key, "looking up jira issue");
        let issue = self.fetch_issue(&key).await?;

        Ok(PluginOutcome::reply(render_issue(&self.base_url, &key, &issue)))
    }
}

/// First token shaped like an issue key, uppercased.
fn find_issue_key(tokens: &[String]) -> Option<String> {
    tokens
        .iter()
        .map(|token| trim_trailing_punctuation(token))
        .find(|token| ISSUE_KEY_REGEX.is_match(token))
        .map(str::to_uppercase)
}

fn render_issue(base_url: &str, key: &str, issue: &Issue) -> String {
    let fields = &issue.fields;
    let description = match fields.description.as_deref() {
        Some(text) if text.chars().count() > DESCRIPTION_LIMIT => {
            let truncated: String = text.chars().take(DESCRIPTION_LIMIT).collect();
            format!("{truncated}...")
        }
        Some(text) => text.to_string(),
        None => "N/A".into(),
    };

    format!(
        "*JIRA Issue: *{base_url}/browse/{key}\n```Summary:  {summary}\nDescription:\n{description}\n\n\
         Status:   {status}\nAssignee: {assignee}\nReporter: {reporter}\n\
         Created:  {created}\nUpdated:  {updated}```",
        summary = fields.summary.as_deref().unwrap_or("N/A"),
        status = fields.status.as_ref().map(|s| s.name.as_str()).unwrap_or("N/A"),
        assignee = fields.assignee.as_ref().map(Person::label).unwrap_or("Unassigned"),
        reporter = fields.reporter.as_ref().map(Person::label).unwrap_or("N/A"),
        created = format_timestamp(fields.created.as_deref()),
        updated = format_timestamp(fields.updated.as_deref()),
    )
}

/// JIRA timestamps look like `2016-02-23T10:11:12.000+0000`.
fn format_timestamp(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return "N/A".into();
    };

    chrono::DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| chrono::DateTime::parse_from_rfc3339(raw))
        .map(|timestamp| timestamp.format("%Y-%m-%d %I:%M %p").to_string())
        .unwrap_or_else(|_| raw.to_string())
}
