//! PagerDuty on-call queries.

use crate::Activation;
use crate::error::{PluginError, Result};
use crate::plugins::registry::PluginContext;
use crate::plugins::{Plugin, PluginDescriptor, PluginOutcome, PluginRequest};

use chrono::{DateTime, Local, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;

pub const NAME: &str = "pagerduty";
pub const PURPOSE: &str = "*PagerDuty*: Ask `Who is on call?` to see who is currently on-call, \
     `When am I on call next?` to see when your next shift starts, or tell jarvis to \
     `give me the pager` to cover the pager for the current person that is on-call.";

const ACCEPT_VERSION: &str = "application/vnd.pagerduty+json;version=2";
const NEXT_SHIFT_WINDOW_DAYS: i64 = 14;
const LOCAL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M %Z (%z from UTC)";

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor {
        name: NAME.into(),
        activation: Activation::Active,
        purpose: PURPOSE.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    WhoIsOnCall,
    NextShift,
    TakePager,
}

impl Command {
    /// Keyword patterns, in evaluation order.
    const PATTERNS: [(Command, &'static [&'static str]); 3] = [
        (Command::WhoIsOnCall, &["who", "whos", "on", "call"]),
        (Command::NextShift, &["when", "on", "i", "call", "next"]),
        (Command::TakePager, &["give", "pager", "me"]),
    ];

    /// A pattern qualifies when more than half of its words are present.
    /// Later patterns take precedence over earlier ones.
    fn detect(tokens: &[String]) -> Option<Self> {
        let words: Vec<String> = tokens
            .iter()
            .map(|t| t.to_lowercase().replace(['\'', '-'], ""))
            .collect();

        Self::PATTERNS
            .iter()
            .filter(|(_, pattern)| {
                let hits = pattern
                    .iter()
                    .filter(|keyword| words.iter().any(|w| w.as_str() == **keyword))
                    .count();
                hits * 2 > pattern.len()
            })
            .map(|(command, _)| *command)
            .last()
    }
}

#[derive(Debug, Deserialize)]
struct Reference {
    #[serde(default)]
    id: String,
    #[serde(default)]
    summary: String,
}

#[derive(Debug, Deserialize)]
struct OnCall {
    user: Reference,
    escalation_policy: Reference,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct OnCallList {
    oncalls: Vec<OnCall>,
}

#[derive(Debug, Deserialize)]
struct UserList {
    users: Vec<Reference>,
}

#[derive(Debug, Deserialize)]
struct EscalationTarget {
    id: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct EscalationRule {
    targets: Vec<EscalationTarget>,
}

#[derive(Debug, Deserialize)]
struct EscalationPolicy {
    escalation_rules: Vec<EscalationRule>,
}

#[derive(Debug, Deserialize)]
struct EscalationPolicyList {
    escalation_policies: Vec<EscalationPolicy>,
}

pub struct PagerDutyPlugin {
    http: reqwest::Client,
    api_url: String,
    headers: HeaderMap,
}

impl PagerDutyPlugin {
    pub fn from_context(context: &PluginContext) -> Result<Self> {
        let settings = &context.settings.pagerduty;
        let api_key = settings
            .api_key
            .as_deref()
            .ok_or_else(|| PluginError::MissingConfig {
                plugin: NAME.into(),
                key: "PD_API_KEY".into(),
            })?;

        let mut headers = HeaderMap::new();
        let authorization = HeaderValue::from_str(&format!("Token token={api_key}")).map_err(|_| {
            PluginError::InvalidConfig {
                plugin: NAME.into(),
                reason: "PD_API_KEY contains characters not allowed in a header".into(),
            }
        })?;
        headers.insert(AUTHORIZATION, authorization);
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_VERSION));

        Ok(Self {
            http: context.http.clone(),
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            headers,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let response = self
            .http
            .get(format!("{}/{}", self.api_url, path))
            .headers(self.headers.clone())
            .query(query)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(request_error)?;

        let body = response.json::<T>().await.map_err(request_error)?;
        Ok(body)
    }

    async fn user_id_for(&self, email: &str) -> Result<String> {
        let users: UserList = self.get("users", &[("query", email)]).await?;
        let user = users
            .users
            .into_iter()
            .next()
            .ok_or_else(|| failed(format!("no PagerDuty user matches {email}")))?;
        Ok(user.id)
    }

    async fn who_is_on_call(&self) -> Result<String> {
        let list: OnCallList = self.get("oncalls", &[("limit", "100")]).await?;

        let mut output = String::from("The following people are currently on-call:\n");
        // Entries without a start are permanent members, not part of a rotation.
        for oncall in list.oncalls.iter().filter(|oncall| oncall.start.is_some()) {
            output.push_str(&format!(
                "*{}* ({})\n",
                oncall.user.summary, oncall.escalation_policy.summary
            ));
        }
        Ok(output)
    }

    async fn next_shift(&self, email: &str) -> Result<String> {
        let user_id = self.user_id_for(email).await?;
        let now = Utc::now();
        let since = now.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let until = (now + chrono::Duration::days(NEXT_SHIFT_WINDOW_DAYS))
            .format("%Y-%m-%d")
            .to_string();

        let list: OnCallList = self
            .get(
                "oncalls",
                &[
                    ("user_ids[]", user_id.as_str()),
                    ("since", since.as_str()),
                    ("until", until.as_str()),
                    ("earliest", "false"),
                ],
            )
            .await?;

        let next = list
            .oncalls
            .iter()
            .filter_map(|oncall| oncall.start)
            .filter(|start| *start > now)
            .min();

        Ok(match next {
            Some(start) => format!("Your next on-call shift starts: {}", local_time(start)),
            None => format!(
                "You have no on-call shifts in the next {NEXT_SHIFT_WINDOW_DAYS} days."
            ),
        })
    }

    async fn take_pager(&self, email: &str) -> Result<String> {
        let user_id = self.user_id_for(email).await?;

        let policies: EscalationPolicyList = self
            .get("escalation_policies", &[("user_ids[]", user_id.as_str())])
            .await?;
        let schedule_id = policies
            .escalation_policies
            .first()
            .and_then(|policy| {
                policy
                    .escalation_rules
                    .iter()
                    .flat_map(|rule| rule.targets.iter())
                    .filter(|target| target.kind == "schedule_reference")
                    .map(|target| target.id.clone())
                    .last()
            })
            .ok_or_else(|| failed("no on-call schedule found for the requesting user"))?;

        let current: OnCallList = self
            .get("oncalls", &[("schedule_ids[]", schedule_id.as_str())])
            .await?;
        let end = current
            .oncalls
            .first()
            .and_then(|oncall| oncall.end)
            .ok_or_else(|| failed(format!("schedule {schedule_id} has no current shift")))?;

        let start = Utc::now();
        let payload = serde_json::json!({
            "override": {
                "start": start.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                "end": end.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                "user": { "id": user_id, "type": "user_reference" },
            }
        });

        self.http
            .post(format!("{}/schedules/{}/overrides", self.api_url, schedule_id))
            .headers(self.headers.clone())
            .json(&payload)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(request_error)?;

        tracing::info!(schedule = %schedule_id, user = %user_id, "scheduled pagerduty override");

        Ok(format!(
            "Scheduling you for an override: \nFrom: {}\nTo: {}",
            local_time(start),
            local_time(end)
        ))
    }
}

impl Plugin for PagerDutyPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn activation(&self) -> Activation {
        Activation::Active
    }

    fn purpose(&self) -> &str {
        PURPOSE
    }

    async fn run(&self, request: PluginRequest<'_>) -> Result<PluginOutcome> {
        let Some(command) = Command::detect(request.tokens) else {
            return Ok(PluginOutcome::no_match());
        };
        tracing::debug!(?command, user = %request.user_id, "pagerduty command");

        let output = match (command, request.contact) {
            (Command::WhoIsOnCall, _) => self.who_is_on_call().await?,
            (Command::NextShift, Some(email)) => self.next_shift(email).await?,
            (Command::TakePager, Some(email)) => self.take_pager(email).await?,
            (_, None) => "I couldn't find an email address for you, so I can't look you up in PagerDuty."
                .to_string(),
        };

        Ok(PluginOutcome::reply(output))
    }
}

fn local_time(timestamp: DateTime<Utc>) -> String {
    timestamp.with_timezone(&Local).format(LOCAL_TIME_FORMAT).to_string()
}

fn request_error(source: reqwest::Error) -> PluginError {
    PluginError::Request {
        plugin: NAME.into(),
        source,
    }
}

fn failed(reason: impl Into<String>) -> PluginError {
    PluginError::Failed {
        plugin: NAME.into(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PagerDutySettings, PluginsConfig};
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tokens(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn plugin_for(server: &MockServer) -> PagerDutyPlugin {
        let settings = PluginsConfig {
            pagerduty: PagerDutySettings {
                api_key: Some("pd-key".into()),
                api_url: server.uri(),
            },
            ..Default::default()
        };
        let context = PluginContext::new(settings, Duration::from_secs(5)).expect("context");
        PagerDutyPlugin::from_context(&context).expect("pagerduty should load")
    }

    #[test]
    fn detects_commands_by_keyword_majority() {
        assert_eq!(
            Command::detect(&tokens(&["who", "is", "on", "call"])),
            Some(Command::WhoIsOnCall)
        );
        assert_eq!(
            Command::detect(&tokens(&["Who's", "on", "call?"])),
            None,
            "punctuation is the tokenizer's job"
        );
        assert_eq!(
            Command::detect(&tokens(&["Who's", "on", "call"])),
            Some(Command::WhoIsOnCall)
        );
        assert_eq!(
            Command::detect(&tokens(&["When", "am", "I", "on", "call", "next"])),
            Some(Command::NextShift)
        );
        assert_eq!(
            Command::detect(&tokens(&["give", "me", "the", "pager"])),
            Some(Command::TakePager)
        );
        assert_eq!(Command::detect(&tokens(&["on", "call"])), None);
        assert_eq!(Command::detect(&[]), None);
    }

    #[test]
    fn later_pattern_wins_when_several_qualify() {
        // Qualifies for both "who is on call" (3/4) and "when am I on call next" (4/5).
        assert_eq!(
            Command::detect(&tokens(&["whos", "on", "call", "when", "i", "next"])),
            Some(Command::NextShift)
        );
    }

    #[test]
    fn missing_api_key_fails_to_load() {
        let context =
            PluginContext::new(PluginsConfig::default(), Duration::from_secs(1)).expect("context");
        let error = PagerDutyPlugin::from_context(&context)
            .err()
            .expect("missing key must fail");

        assert!(matches!(
            error,
            crate::Error::Plugin(PluginError::MissingConfig { ref key, .. }) if key == "PD_API_KEY"
        ));
    }

    #[tokio::test]
    async fn lists_rotating_on_call_users() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oncalls"))
            .and(query_param("limit", "100"))
            .and(header("authorization", "Token token=pd-key"))
            .and(header("accept", ACCEPT_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "oncalls": [
                    {
                        "user": { "id": "P1", "summary": "Ada" },
                        "escalation_policy": { "id": "E1", "summary": "Platform" },
                        "start": "2024-01-01T00:00:00Z",
                        "end": "2024-01-08T00:00:00Z"
                    },
                    {
                        "user": { "id": "P2", "summary": "Always Around" },
                        "escalation_policy": { "id": "E1", "summary": "Platform" },
                        "start": null,
                        "end": null
                    }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let plugin = plugin_for(&server);
        let words = tokens(&["who", "is", "on", "call"]);
        let outcome = plugin
            .run(PluginRequest {
                tokens: &words,
                user_id: "U1",
                contact: None,
            })
            .await
            .expect("run");

        assert!(outcome.matched);
        assert_eq!(
            outcome.output.as_deref(),
            Some("The following people are currently on-call:\n*Ada* (Platform)\n")
        );
    }

    #[tokio::test]
    async fn sender_commands_need_a_contact_address() {
        let server = MockServer::start().await;
        let plugin = plugin_for(&server);
        let words = tokens(&["give", "me", "the", "pager"]);

        let outcome = plugin
            .run(PluginRequest {
                tokens: &words,
                user_id: "U1",
                contact: None,
            })
            .await
            .expect("missing contact is a reply, not an error");

        assert!(outcome.matched);
        assert!(outcome.output.expect("output").contains("email address"));
    }

    #[tokio::test]
    async fn next_shift_without_upcoming_shifts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .and(query_param("query", "ada@example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "users": [{ "id": "P1", "summary": "Ada" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/oncalls"))
            .and(query_param("user_ids[]", "P1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "oncalls": []
            })))
            .mount(&server)
            .await;

        let plugin = plugin_for(&server);
        let words = tokens(&["when", "am", "i", "on", "call", "next"]);
        let outcome = plugin
            .run(PluginRequest {
                tokens: &words,
                user_id: "U1",
                contact: Some("ada@example.com"),
            })
            .await
            .expect("run");

        assert_eq!(
            outcome.output.as_deref(),
            Some("You have no on-call shifts in the next 14 days.")
        );
    }

    #[tokio::test]
    async fn next_shift_reports_the_earliest_upcoming_start() {
        let server = MockServer::start().await;
        let now = Utc::now();
        let soon = now + chrono::Duration::days(2);
        let later = now + chrono::Duration::days(9);
        let stamp = |at: DateTime<Utc>| at.format("%Y-%m-%dT%H:%M:%SZ").to_string();

        Mock::given(method("GET"))
            .and(path("/users"))
            .and(query_param("query", "ada@example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "users": [{ "id": "P1", "summary": "Ada" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/oncalls"))
            .and(query_param("user_ids[]", "P1"))
            .and(query_param("earliest", "false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "oncalls": [
                    {
                        "user": { "id": "P1", "summary": "Ada" },
                        "escalation_policy": { "id": "E1", "summary": "Platform" },
                        "start": stamp(now - chrono::Duration::days(1)),
                        "end": stamp(now + chrono::Duration::hours(1))
                    },
                    {
                        "user": { "id": "P1", "summary": "Ada" },
                        "escalation_policy": { "id": "E1", "summary": "Platform" },
                        "start": stamp(later),
                        "end": stamp(later + chrono::Duration::days(7))
                    },
                    {
                        "user": { "id": "P1", "summary": "Ada" },
                        "escalation_policy": { "id": "E2", "summary": "Data" },
                        "start": stamp(soon),
                        "end": stamp(soon + chrono::Duration::days(7))
                    }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let plugin = plugin_for(&server);
        let words = tokens(&["when", "am", "i", "on", "call", "next"]);
        let outcome = plugin
            .run(PluginRequest {
                tokens: &words,
                user_id: "U1",
                contact: Some("ada@example.com"),
            })
            .await
            .expect("run");

        let expected_start = stamp(soon)
            .parse::<DateTime<Utc>>()
            .expect("timestamp");
        assert!(outcome.matched);
        assert_eq!(
            outcome.output,
            Some(format!("Your next on-call shift starts: {}", local_time(expected_start)))
        );
    }

    #[tokio::test]
    async fn take_pager_posts_an_override_until_the_current_shift_ends() {
        let server = MockServer::start().await;
        let shift_end = "2099-01-08T09:00:00Z";

        Mock::given(method("GET"))
            .and(path("/users"))
            .and(query_param("query", "ada@example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "users": [{ "id": "P1", "summary": "Ada" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/escalation_policies"))
            .and(query_param("user_ids[]", "P1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "escalation_policies": [{
                    "escalation_rules": [
                        { "targets": [{ "id": "S0", "type": "schedule_reference" }] },
                        { "targets": [
                            { "id": "S1", "type": "schedule_reference" },
                            { "id": "P9", "type": "user_reference" }
                        ] }
                    ]
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/oncalls"))
            .and(query_param("schedule_ids[]", "S1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "oncalls": [{
                    "user": { "id": "P2", "summary": "Grace" },
                    "escalation_policy": { "id": "E1", "summary": "Platform" },
                    "start": "2099-01-01T09:00:00Z",
                    "end": shift_end
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/schedules/S1/overrides"))
            .and(header("authorization", "Token token=pd-key"))
            .and(body_partial_json(serde_json::json!({
                "override": {
                    "end": shift_end,
                    "user": { "id": "P1", "type": "user_reference" }
                }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let plugin = plugin_for(&server);
        let words = tokens(&["give", "me", "the", "pager"]);
        let outcome = plugin
            .run(PluginRequest {
                tokens: &words,
                user_id: "U1",
                contact: Some("ada@example.com"),
            })
            .await
            .expect("run");

        let end = shift_end.parse::<DateTime<Utc>>().expect("timestamp");
        let output = outcome.output.expect("output");
        assert!(outcome.matched);
        assert!(output.starts_with("Scheduling you for an override: \nFrom: "));
        assert!(output.ends_with(&format!("\nTo: {}", local_time(end))));
    }

    #[tokio::test]
    async fn unknown_user_is_a_plugin_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "users": [] })))
            .mount(&server)
            .await;

        let plugin = plugin_for(&server);
        let words = tokens(&["give", "me", "the", "pager"]);
        let result = plugin
            .run(PluginRequest {
                tokens: &words,
                user_id: "U1",
                contact: Some("nobody@example.com"),
            })
            .await;

        assert!(matches!(result, Err(crate::Error::Plugin(PluginError::Failed { .. }))));
    }
}
