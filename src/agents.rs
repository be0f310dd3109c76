//! Model-backed planner, integrator and validator, plus the web search tool
//!
//! Each collaborator is a thin prompt over an [`LlmClient`]. The search tool
//! asks the model for a query, fetches a search results page and flattens it
//! to text.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tracing::debug;

use crate::config::SearchConfig;
use crate::errors::{AppError, AppResult};
use crate::llm::LlmClient;
use crate::mime::truncate_chars;
use crate::orchestrator::{Findings, Integrator, Plan, Planner, Task, ToolInvoker, Validator};
use crate::prompts::{INTEGRATION_PROMPT, PLANNING_PROMPT, SEARCH_QUERY_PROMPT, VALIDATION_PROMPT};

/// Column width used when flattening search result pages
const PAGE_TEXT_WIDTH: usize = 120;

/// Build the planner's user turn
///
/// Prior state is included only when present, so the first pass sees the
/// email alone.
fn planning_input(
    task: &Task,
    previous_plan: Option<&Plan>,
    previous_findings: Option<&Findings>,
    feedback: Option<&str>,
) -> String {
    let mut input = format!("Email:\n{}\n", task.as_str());
    if let Some(plan) = previous_plan {
        input.push_str(&format!("\nPrevious plan:\n{}\n", plan.0));
    }
    if let Some(findings) = previous_findings {
        input.push_str(&format!(
            "\nPrevious findings (query: {}):\n{}\n",
            findings.query, findings.content
        ));
    }
    if let Some(draft) = feedback {
        input.push_str(&format!("\nPrevious draft reply (rejected):\n{draft}\n"));
    }
    input
}

pub struct LlmPlanner {
    llm: Arc<dyn LlmClient>,
}

impl LlmPlanner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(
        &self,
        task: &Task,
        previous_plan: Option<&Plan>,
        previous_findings: Option<&Findings>,
        feedback: Option<&str>,
    ) -> AppResult<Plan> {
        let input = planning_input(task, previous_plan, previous_findings, feedback);
        let plan = self.llm.complete(PLANNING_PROMPT, &input).await?;
        Ok(Plan(plan))
    }
}

pub struct LlmIntegrator {
    llm: Arc<dyn LlmClient>,
}

impl LlmIntegrator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Integrator for LlmIntegrator {
    async fn integrate(&self, task: &Task, plan: &Plan, findings: &Findings) -> AppResult<String> {
        let input = format!(
            "Email:\n{}\n\nPlan:\n{}\n\nFindings from {}:\n{}\n",
            task.as_str(),
            plan.0,
            findings.source,
            findings.content
        );
        self.llm.complete(INTEGRATION_PROMPT, &input).await
    }
}

/// Asks the model for a YES/NO verdict
pub struct LlmValidator {
    llm: Arc<dyn LlmClient>,
    verdict: Regex,
}

impl LlmValidator {
    pub fn new(llm: Arc<dyn LlmClient>) -> AppResult<Self> {
        let verdict = Regex::new(r"(?i)\b(yes|no|accept(?:ed)?|reject(?:ed)?|pass|fail)\b")
            .map_err(|e| AppError::Internal(format!("invalid verdict regex: {e}")))?;
        Ok(Self { llm, verdict })
    }

    /// First verdict word in the answer decides; anything else is a rejection
    fn parse_verdict(&self, answer: &str) -> bool {
        self.verdict
            .captures(answer)
            .and_then(|c| c.get(1))
            .map(|m| {
                let word = m.as_str().to_ascii_lowercase();
                word == "yes" || word.starts_with("accept") || word == "pass"
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl Validator for LlmValidator {
    async fn accepts(&self, candidate: &str, task: &Task) -> AppResult<bool> {
        let input = format!(
            "Original email:\n{}\n\nDraft reply:\n{}\n",
            task.as_str(),
            candidate
        );
        let answer = self.llm.complete(VALIDATION_PROMPT, &input).await?;
        Ok(self.parse_verdict(&answer))
    }
}

/// Web search tool
///
/// The model derives one query from the plan; the configured search page is
/// fetched and its text becomes the findings.
pub struct WebSearcher {
    llm: Arc<dyn LlmClient>,
    client: Client,
    config: SearchConfig,
}

impl WebSearcher {
    pub fn new(llm: Arc<dyn LlmClient>, config: SearchConfig, timeout_ms: u64) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            llm,
            client,
            config,
        })
    }

    async fn derive_query(&self, plan: &Plan, query: &Task) -> AppResult<String> {
        let input = format!("Email:\n{}\n\nPlan:\n{}\n", query.as_str(), plan.0);
        let raw = self.llm.complete(SEARCH_QUERY_PROMPT, &input).await?;
        Ok(clean_query(&raw).unwrap_or_else(|| fallback_query(query.as_str())))
    }
}

#[async_trait]
impl ToolInvoker for WebSearcher {
    async fn invoke(&self, plan: &Plan, query: &Task) -> AppResult<Findings> {
        let search_query = self.derive_query(plan, query).await?;
        let url = search_url(&self.config.url_template, &search_query);
        debug!(query = %search_query, url = %url, "running web search");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::Orchestration(format!("search request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Orchestration(format!(
                "search endpoint returned {status}"
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Orchestration(format!("search response unreadable: {e}")))?;

        Ok(Findings {
            query: search_query,
            source: url,
            content: truncate_chars(page_text(&body), self.config.max_chars),
        })
    }
}

/// First non-empty line, stripped of wrapping quotes
fn clean_query(raw: &str) -> Option<String> {
    raw.lines()
        .map(|l| l.trim().trim_matches(|c| c == '"' || c == '\''))
        .find(|l| !l.is_empty())
        .map(str::to_owned)
}

/// Use the start of the email itself when the model returns nothing usable
fn fallback_query(task: &str) -> String {
    task.split_whitespace().take(12).collect::<Vec<_>>().join(" ")
}

fn search_url(template: &str, query: &str) -> String {
    template.replace("{query}", &urlencoding::encode(query))
}

/// HTML pages are flattened to text; anything else is used as-is
fn page_text(body: &str) -> String {
    let head = body.trim_start();
    let looks_like_html = head.starts_with('<') && body.contains("</");
    if looks_like_html && let Ok(text) = html2text::from_read(body.as_bytes(), PAGE_TEXT_WIDTH) {
        return text;
    }
    body.to_owned()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::{
        LlmPlanner, LlmValidator, clean_query, fallback_query, page_text, planning_input,
        search_url,
    };
    use crate::errors::AppResult;
    use crate::llm::LlmClient;
    use crate::orchestrator::{Findings, Plan, Planner, Task, Validator};

    /// Returns a fixed answer and records the user turns it was given
    struct CannedLlm {
        answer: String,
        inputs: Mutex<Vec<String>>,
    }

    impl CannedLlm {
        fn new(answer: &str) -> Arc<Self> {
            Arc::new(Self {
                answer: answer.to_owned(),
                inputs: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn complete(&self, _system: &str, user: &str) -> AppResult<String> {
            self.inputs.lock().expect("lock").push(user.to_owned());
            Ok(self.answer.clone())
        }
    }

    #[test]
    fn first_planning_pass_sees_only_the_email() {
        let input = planning_input(&Task::new("Is the museum open Monday?"), None, None, None);
        assert!(input.contains("Is the museum open Monday?"));
        assert!(!input.contains("Previous"));
    }

    #[test]
    fn replanning_includes_prior_plan_findings_and_draft() {
        let findings = Findings {
            query: "museum hours".to_owned(),
            source: "https://search.example".to_owned(),
            content: "Closed Mondays".to_owned(),
        };
        let input = planning_input(
            &Task::new("Is the museum open Monday?"),
            Some(&Plan("1. check hours".to_owned())),
            Some(&findings),
            Some("Yes it is open."),
        );
        assert!(input.contains("Previous plan:\n1. check hours"));
        assert!(input.contains("Closed Mondays"));
        assert!(input.contains("Previous draft reply (rejected):\nYes it is open."));
    }

    #[tokio::test]
    async fn planner_passes_feedback_to_model() {
        let llm = CannedLlm::new("1. do it");
        let planner = LlmPlanner::new(llm.clone());
        let plan = planner
            .plan(&Task::new("hi"), None, None, Some("old draft"))
            .await
            .expect("plan");
        assert_eq!(plan, Plan("1. do it".to_owned()));
        let inputs = llm.inputs.lock().expect("lock");
        assert!(inputs[0].contains("old draft"));
    }

    #[tokio::test]
    async fn validator_reads_first_verdict_word() {
        for (answer, expected) in [
            ("YES", true),
            ("yes, this is fine", true),
            ("Accepted.", true),
            ("NO - it misses the date", false),
            ("Rejected", false),
            ("I am not sure", false),
        ] {
            let validator = LlmValidator::new(CannedLlm::new(answer)).expect("regex compiles");
            let verdict = validator.accepts("draft", &Task::new("q")).await.expect("verdict");
            assert_eq!(verdict, expected, "answer: {answer}");
        }
    }

    #[test]
    fn search_url_percent_encodes_query() {
        let url = search_url("https://s.example/?q={query}", "opening hours & prices");
        assert_eq!(url, "https://s.example/?q=opening%20hours%20%26%20prices");
    }

    #[test]
    fn clean_query_takes_first_line_without_quotes() {
        assert_eq!(
            clean_query("\n \"rust async traits\"\nextra").as_deref(),
            Some("rust async traits")
        );
        assert_eq!(clean_query("   \n  "), None);
    }

    #[test]
    fn fallback_query_caps_word_count() {
        let long = "one two three four five six seven eight nine ten eleven twelve thirteen";
        assert_eq!(fallback_query(long).split(' ').count(), 12);
    }

    #[test]
    fn page_text_flattens_html_and_keeps_plain_text() {
        let html = "<html><body><h1>Hours</h1><p>Open 9 to 5</p></body></html>";
        let text = page_text(html);
        assert!(text.contains("Open 9 to 5"));
        assert!(!text.contains("<p>"));

        assert_eq!(page_text("plain answer"), "plain answer");
    }
}
