//! Keyword-driven selection of data tools for a DataLookup query.
//!
//! The planner only decides *which* tools and *which* parameters; it never
//! judges whether a parameter is well formed. That is the invoker's job, so a
//! malformed account id is still planned and then rejected visibly.

use std::sync::LazyLock;

use chrono::{Datelike, Months, NaiveDate, Utc};
use regex::Regex;

use super::{DataTool, ToolCall};

static MONTH_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4}-\d{2})\b").expect("valid month regex"));
static ACCOUNT_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]{1,4}\d{3,}$").expect("valid account regex"));
static COMPANY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bcompany[_\s]?(\d{1,3})\b").expect("valid company regex"));
static WINDOW_DAYS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{1,4})\s*days?\b").expect("valid window regex"));

const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

const INVOICE_WORDS: &[&str] = &["invoice", "payment", "billing", "paid", "overdue", "bill"];
const TICKET_WORDS: &[&str] = &["ticket", "support", "sla", "incident"];
const USAGE_WORDS: &[&str] = &["usage", "api", "storage", "quota", "email sends"];
const ACCOUNT_WORDS: &[&str] = &["account", "plan", "tier", "renewal", "csm", "subscription"];

const DEFAULT_KB_RESULTS: &str = "5";

#[derive(Clone, Debug)]
pub struct ToolPlanner {
    /// `None` resolves against the current UTC date at planning time.
    reference_date: Option<NaiveDate>,
}

impl Default for ToolPlanner {
    fn default() -> Self {
        Self::today()
    }
}

impl ToolPlanner {
    /// Month defaults and month names resolve relative to `reference_date`.
    pub fn new(reference_date: NaiveDate) -> Self {
        Self { reference_date: Some(reference_date) }
    }

    pub fn today() -> Self {
        Self { reference_date: None }
    }

    fn reference_date(&self) -> NaiveDate {
        self.reference_date.unwrap_or_else(|| Utc::now().date_naive())
    }

    pub fn plan(&self, query: &str, account_context: Option<&str>) -> Vec<ToolCall> {
        let today = self.reference_date();
        let lowered = query.to_lowercase();
        let mentions = |words: &[&str]| words.iter().any(|word| lowered.contains(word));

        let account_id = account_context
            .map(str::to_string)
            .or_else(|| extract_account_token(query));
        let company = extract_company(query);
        let month = extract_month(query, today);

        let with_account = |call: ToolCall| match &account_id {
            Some(account_id) => call.with_param("account_id", account_id.clone()),
            None => call,
        };

        let mut calls = Vec::new();

        if mentions(INVOICE_WORDS) {
            let mut call = with_account(ToolCall::new(DataTool::InvoiceStatus));
            if let Some(month) = &month {
                call = call.with_param("period", month.clone());
            }
            calls.push(call);
        }

        if mentions(TICKET_WORDS) {
            let mut call = with_account(ToolCall::new(DataTool::TicketSummary));
            if let Some(days) = WINDOW_DAYS.captures(query).and_then(|caps| caps.get(1)) {
                call = call.with_param("window_days", days.as_str());
            }
            calls.push(call);
        }

        if mentions(USAGE_WORDS) {
            let month = month.clone().unwrap_or_else(|| year_month(today));
            calls.push(with_account(ToolCall::new(DataTool::UsageReport)).with_param("month", month));
        }

        if mentions(ACCOUNT_WORDS) {
            let call = match (&account_id, &company) {
                (None, Some(company)) => {
                    ToolCall::new(DataTool::AccountLookup).with_param("company", company.clone())
                }
                _ => with_account(ToolCall::new(DataTool::AccountLookup)),
            };
            calls.push(call);
        }

        if calls.is_empty() {
            if account_id.is_some() {
                calls.push(with_account(ToolCall::new(DataTool::AccountLookup)));
            } else if let Some(company) = company {
                calls.push(ToolCall::new(DataTool::AccountLookup).with_param("company", company));
            } else if !query.trim().is_empty() {
                calls.push(
                    ToolCall::new(DataTool::KbSearch)
                        .with_param("query", query.trim())
                        .with_param("k", DEFAULT_KB_RESULTS),
                );
            }
        }

        calls
    }
}

fn year_month(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

/// `YYYY-MM` literal first, then relative phrases, then month names (most
/// recent occurrence not after `today`).
fn extract_month(query: &str, today: NaiveDate) -> Option<String> {
    if let Some(literal) = MONTH_LITERAL.captures(query).and_then(|caps| caps.get(1)) {
        return Some(literal.as_str().to_string());
    }

    let lowered = query.to_lowercase();
    if lowered.contains("last month") || lowered.contains("previous month") {
        return today.checked_sub_months(Months::new(1)).map(year_month);
    }
    if lowered.contains("this month") || lowered.contains("current month") {
        return Some(year_month(today));
    }

    // "may" is skipped: too often the modal verb.
    let words = lowered
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>();
    let month = MONTH_NAMES
        .iter()
        .filter(|name| **name != "may")
        .find_map(|name| words.contains(name).then_some(*name))?;
    let month = MONTH_NAMES.iter().position(|name| *name == month)?;
    let month = u32::try_from(month + 1).ok()?;
    let year = if month <= today.month() { today.year() } else { today.year() - 1 };
    Some(format!("{year:04}-{month:02}"))
}

fn extract_account_token(query: &str) -> Option<String> {
    query
        .split_whitespace()
        .map(|token| token.trim_matches(|ch: char| !ch.is_alphanumeric()))
        .find(|token| ACCOUNT_TOKEN.is_match(token))
        .map(str::to_string)
}

fn extract_company(query: &str) -> Option<String> {
    let number = COMPANY.captures(query)?.get(1)?.as_str().parse::<u32>().ok()?;
    Some(format!("Company_{number:03}"))
}
