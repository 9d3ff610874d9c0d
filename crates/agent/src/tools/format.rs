//! Human-readable summaries of tool payloads. These become the evidence text
//! handed to synthesis and checked by the validator.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;

use super::DataTool;

pub fn summarize(tool: DataTool, payload: &Value) -> String {
    let mut lines = vec![format!("## {}", title(tool))];
    match tool {
        DataTool::AccountLookup => {
            lines.push(format!("- Company: {}", text(payload, "company")));
            lines.push(format!(
                "- Plan: {} ({} tier)",
                text(payload, "plan"),
                text(payload, "tier")
            ));
            lines.push(format!("- Billing: {}", text(payload, "billing_cycle")));
            lines.push(format!("- CSM: {}", text(payload, "csm")));
            lines.push(format!("- Renewal: {}", text(payload, "renewal_date")));
        }
        DataTool::InvoiceStatus => {
            let summary = payload.get("summary").unwrap_or(&Value::Null);
            lines.push(format!("- Total Invoices: {}", count(payload, "invoice_count")));
            lines.push(format!("- Total Amount: {}", money(summary.get("total"))));
            lines.push(format!("- Paid: {}", money(summary.get("paid"))));
            lines.push(format!("- Overdue: {}", money(summary.get("overdue"))));
            lines.push(format!("- Pending: {}", money(summary.get("pending"))));
            for invoice in payload.get("invoices").and_then(Value::as_array).into_iter().flatten() {
                lines.push(format!(
                    "  - {} {} to {}: {} ({}, due {})",
                    text(invoice, "invoice_id"),
                    text(invoice, "period_start"),
                    text(invoice, "period_end"),
                    money(invoice.get("amount")),
                    text(invoice, "status"),
                    text(invoice, "due_on"),
                ));
            }
        }
        DataTool::TicketSummary => {
            lines.push(format!("- Total Tickets: {}", count(payload, "total_tickets")));
            lines.push(format!("- Open: {}", count(payload, "open_tickets")));
            lines.push(format!("- High Priority Open: {}", count(payload, "high_priority_open")));
            let risks = payload.get("sla_risks").and_then(Value::as_array);
            if let Some(risks) = risks.filter(|risks| !risks.is_empty()) {
                lines.push(format!("- SLA Risks: {} ticket(s)", risks.len()));
                for risk in risks {
                    lines.push(format!(
                        "  - {}: {} ({} days open)",
                        text(risk, "ticket_id"),
                        text(risk, "subject"),
                        count(risk, "days_open"),
                    ));
                }
            }
        }
        DataTool::UsageReport => {
            lines.push(format!("- Month: {}", text(payload, "month")));
            lines.push(format!("- API Calls: {}", count(payload, "api_calls")));
            lines.push(format!("- Email Sends: {}", count(payload, "email_sends")));
            lines.push(format!("- Storage: {} GB", decimal(payload.get("storage_gb"))));
            let warnings = payload.get("warnings").and_then(Value::as_array);
            if let Some(warnings) = warnings.filter(|warnings| !warnings.is_empty()) {
                lines.push("- Warnings:".to_string());
                for warning in warnings.iter().filter_map(Value::as_str) {
                    lines.push(format!("  - {warning}"));
                }
            }
        }
        DataTool::KbSearch => {
            let results = payload.get("results").and_then(Value::as_array);
            lines.push(format!("- Matches: {}", results.map(Vec::len).unwrap_or(0)));
            for result in results.into_iter().flatten() {
                lines.push(format!("  - {}: {}", text(result, "document"), text(result, "content")));
            }
        }
    }
    lines.join("\n")
}

fn title(tool: DataTool) -> String {
    tool.as_str()
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn text(payload: &Value, key: &str) -> String {
    match payload.get(key) {
        Some(Value::String(value)) => value.clone(),
        Some(Value::Null) | None => "N/A".to_string(),
        Some(other) => other.to_string(),
    }
}

fn count(payload: &Value, key: &str) -> String {
    match payload.get(key).and_then(Value::as_u64) {
        Some(value) => group_thousands(value),
        None => "0".to_string(),
    }
}

fn to_decimal(value: Option<&Value>) -> Decimal {
    match value {
        Some(Value::Number(number)) => Decimal::from_str(&number.to_string()).unwrap_or_default(),
        Some(Value::String(raw)) => Decimal::from_str(raw.trim()).unwrap_or_default(),
        _ => Decimal::ZERO,
    }
}

fn money(value: Option<&Value>) -> String {
    format!("${:.2}", to_decimal(value).round_dp(2))
}

fn decimal(value: Option<&Value>) -> String {
    format!("{:.2}", to_decimal(value).round_dp(2))
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{group_thousands, summarize};
    use crate::tools::DataTool;

    #[test]
    fn invoice_summary_lists_totals_and_lines() {
        let text = summarize(
            DataTool::InvoiceStatus,
            &json!({
                "invoice_count": 2,
                "summary": {"total": 1299.5, "paid": 99, "overdue": 1200.5, "pending": 0},
                "invoices": [
                    {"invoice_id": "INV-1", "period_start": "2025-09-01", "period_end": "2025-09-30",
                     "amount": 99.0, "status": "Paid", "due_on": "2025-10-15"}
                ]
            }),
        );
        assert!(text.starts_with("## Invoice Status"));
        assert!(text.contains("- Total Amount: $1299.50"));
        assert!(text.contains("- Overdue: $1200.50"));
        assert!(text.contains("INV-1 2025-09-01 to 2025-09-30: $99.00 (Paid, due 2025-10-15)"));
    }

    #[test]
    fn usage_summary_groups_counts_and_lists_warnings() {
        let text = summarize(
            DataTool::UsageReport,
            &json!({"month": "2025-10", "api_calls": 48210, "email_sends": 900, "storage_gb": 12.345,
                    "warnings": ["API calls at 96% of plan limit"]}),
        );
        assert!(text.contains("- API Calls: 48,210"));
        assert!(text.contains("- Storage: 12.35 GB"));
        assert!(text.contains("  - API calls at 96% of plan limit"));
    }

    #[test]
    fn missing_fields_render_as_placeholders() {
        let text = summarize(DataTool::AccountLookup, &json!({"company": "Company_001"}));
        assert!(text.contains("- Company: Company_001"));
        assert!(text.contains("- Plan: N/A (N/A tier)"));
    }

    #[test]
    fn thousands_grouping() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1_000), "1,000");
        assert_eq!(group_thousands(1_234_567), "1,234,567");
    }
}
