//! Company research: the agent compiles a background and news report on a
//! company and files it in the research collection; reports are browsed per
//! company, newest first.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::{AgentHandle, AgentOutcome, TokenUsage, prompts};
use crate::document::Document;
use crate::errors::{ResearchError, StoreError};
use crate::events::newest_first;
use crate::query::{FilterExpression, Pattern};
use crate::store::DocumentStore;

pub const COMPANY_FIELD: &str = "Company Name";

/// Languages offered for research and for the report.
pub const LANGUAGES: &[&str] = &["English", "Traditional Chinese", "Simplified Chinese"];
pub const REGIONS: &[&str] = &["Hong Kong", "China", "United States", "India"];
pub const NEWS_SOURCES: &[&str] = &["Google News"];

/// Focus areas covered unless the search is news only.
pub const DEFAULT_FOCUSES: &[&str] = &[
    "Background",
    "Business model",
    "Management structure and key executives",
    "Main competitors and market share",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchRequest {
    pub company: String,
    pub research_languages: Vec<String>,
    pub report_language: String,
    pub news_source: String,
    pub region: String,
    /// Comma-separated extra focus areas.
    pub additional_focus: Option<String>,
    pub results_per_focus: u32,
    pub news_results: u32,
    pub news_only: bool,
    pub adverse_news: bool,
}

impl Default for ResearchRequest {
    fn default() -> Self {
        Self {
            company: String::new(),
            research_languages: vec![LANGUAGES[0].to_string()],
            report_language: LANGUAGES[0].to_string(),
            news_source: NEWS_SOURCES[0].to_string(),
            region: REGIONS[0].to_string(),
            additional_focus: None,
            results_per_focus: 5,
            news_results: 30,
            news_only: false,
            adverse_news: false,
        }
    }
}

impl ResearchRequest {
    /// Extra focus areas; news-only searches have none.
    pub fn additional_focus(&self) -> Option<&str> {
        if self.news_only {
            return None;
        }
        self.additional_focus
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
    }

    pub fn check(&self) -> Result<(), ResearchError> {
        if self.company.trim().is_empty() {
            return Err(ResearchError::MissingCompany);
        }
        if self.research_languages.is_empty() {
            return Err(ResearchError::NoLanguages);
        }
        if !(1..=100).contains(&self.news_results) {
            return Err(ResearchError::NewsCount(self.news_results));
        }
        Ok(())
    }
}

/// Result of a report request.
#[derive(Debug, Clone, Serialize)]
pub struct ResearchOutcome {
    pub timed_out: bool,
    pub message: String,
    pub token_usage: Option<TokenUsage>,
    /// Newest report on file for the company once the agent has answered.
    pub latest: Option<Document>,
}

#[derive(Clone)]
pub struct ResearchDesk {
    agent: AgentHandle,
    store: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl ResearchDesk {
    pub fn new(agent: AgentHandle, store: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        Self {
            agent,
            store,
            timeout,
        }
    }

    /// Ask the agent for a report and wait for it to be filed.
    pub async fn request(&self, req: &ResearchRequest) -> Result<ResearchOutcome, ResearchError> {
        req.check()?;
        let company = req.company.trim();
        tracing::info!(company, news_only = req.news_only, "requesting company research");
        let outcome = self
            .agent
            .ask(prompts::company_research(req), None, self.timeout)
            .await?;
        let latest = match outcome {
            AgentOutcome::Completed(_) => self.reports(company).await?.into_iter().next(),
            AgentOutcome::TimedOut => None,
        };
        Ok(ResearchOutcome {
            timed_out: matches!(outcome, AgentOutcome::TimedOut),
            message: outcome.message(),
            token_usage: outcome.record().map(|r| r.token_usage),
            latest,
        })
    }

    /// Reports whose company name contains `company`, case-insensitively.
    pub async fn reports(&self, company: &str) -> Result<Vec<Document>, StoreError> {
        let filter = FilterExpression::regex(COMPANY_FIELD, Pattern::new(company.trim()));
        let mut reports = self.store.find(&filter).await?;
        newest_first(&mut reports);
        Ok(reports)
    }

    pub async fn companies(&self) -> Result<Vec<Value>, StoreError> {
        self.store.distinct(COMPANY_FIELD).await
    }
}
