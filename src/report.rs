//! Report rendering: unified results as JSON, HTML, or Markdown.

use crate::error::{Error, Result};
use crate::model::result::UnifiedResult;
use crate::model::Severity;

/// Requested report format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Html,
    Markdown,
}

impl ReportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Html => "text/html; charset=utf-8",
            Self::Markdown => "text/markdown; charset=utf-8",
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "html" => Ok(Self::Html),
            "md" | "markdown" => Ok(Self::Markdown),
            other => Err(Error::invalid_input(format!("unknown report format: {other}"))),
        }
    }
}

/// Render a unified result in the requested format.
pub fn render(request_id: &str, result: &UnifiedResult, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Json => Ok(serde_json::to_string_pretty(result)?),
        ReportFormat::Markdown => Ok(render_markdown(request_id, result)),
        ReportFormat::Html => Ok(render_html(request_id, result)),
    }
}

fn severity_counts(result: &UnifiedResult) -> (usize, usize, usize) {
    let mut critical = 0;
    let mut warning = 0;
    let mut info = 0;
    for d in &result.discrepancies {
        match d.severity {
            Severity::Critical => critical += 1,
            Severity::Warning => warning += 1,
            Severity::Info => info += 1,
        }
    }
    (critical, warning, info)
}

fn render_markdown(request_id: &str, result: &UnifiedResult) -> String {
    let (critical, warning, info) = severity_counts(result);
    let mut out = String::new();

    out.push_str("# Migration Validation Report\n\n");
    out.push_str(&format!("- Request: `{request_id}`\n"));
    out.push_str(&format!("- Status: **{}**\n", result.overall_status));
    out.push_str(&format!(
        "- Fidelity score: **{:.4}**\n",
        result.fidelity_score
    ));
    out.push_str(&format!(
        "- Discrepancies: {} ({critical} critical, {warning} warning, {info} info)\n",
        result.discrepancies.len()
    ));
    out.push_str(&format!(
        "- Execution time: {:.2}s\n\n",
        result.total_execution_time_secs
    ));
    out.push_str(&format!("{}\n", result.summary));

    for stage in [&result.static_result, &result.behavioral_result]
        .into_iter()
        .flatten()
    {
        out.push_str(&format!(
            "\n## {:?} stage\n\n- Status: {}\n- Score: {:.4}\n- {}\n",
            stage.stage, stage.status, stage.fidelity_score, stage.summary
        ));
    }

    if !result.discrepancies.is_empty() {
        out.push_str("\n## Discrepancies\n\n");
        out.push_str("| Severity | Kind | Description | Recommendation |\n");
        out.push_str("|----------|------|-------------|----------------|\n");
        for d in &result.discrepancies {
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                d.severity,
                serde_json::to_value(d.kind)
                    .ok()
                    .and_then(|v| v.as_str().map(String::from))
                    .unwrap_or_default(),
                d.description.replace('|', "\\|"),
                d.recommendation.as_deref().unwrap_or("-").replace('|', "\\|"),
            ));
        }
    }

    out
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn render_html(request_id: &str, result: &UnifiedResult) -> String {
    let (critical, warning, info) = severity_counts(result);
    let mut rows = String::new();
    for d in &result.discrepancies {
        rows.push_str(&format!(
            "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            d.severity,
            d.severity,
            escape_html(&d.description),
            escape_html(d.recommendation.as_deref().unwrap_or("-")),
        ));
    }

    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">\
         <title>Migration Validation Report</title>\
         <style>\
         body {{ font-family: sans-serif; margin: 2rem; }}\
         table {{ border-collapse: collapse; width: 100%; }}\
         td, th {{ border: 1px solid #ccc; padding: 0.4rem; text-align: left; }}\
         tr.critical {{ background: #fdd; }}\
         tr.warning {{ background: #ffd; }}\
         </style></head><body>\n\
         <h1>Migration Validation Report</h1>\n\
         <p>Request <code>{}</code></p>\n\
         <p>Status: <strong>{}</strong> — fidelity <strong>{:.4}</strong></p>\n\
         <p>{} discrepancies ({critical} critical, {warning} warning, {info} info), \
         {:.2}s total</p>\n\
         <p>{}</p>\n\
         <table><tr><th>Severity</th><th>Description</th><th>Recommendation</th></tr>\n\
         {rows}</table>\n\
         </body></html>\n",
        escape_html(request_id),
        result.overall_status,
        result.fidelity_score,
        result.discrepancies.len(),
        result.total_execution_time_secs,
        escape_html(&result.summary),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::discrepancy::{Discrepancy, DiscrepancyKind};
    use crate::model::result::{OverallStatus, ResultKind};
    use chrono::Utc;

    fn result() -> UnifiedResult {
        UnifiedResult {
            overall_status: OverallStatus::ApprovedWithWarnings,
            fidelity_score: 0.5,
            summary: "two warnings".to_string(),
            discrepancies: vec![Discrepancy::between(
                DiscrepancyKind::UiTextChanged,
                Severity::Warning,
                "button text changed <Submit> -> <Save>",
                "submit_btn",
                "submit_btn",
            )],
            static_result: None,
            behavioral_result: None,
            total_execution_time_secs: 1.5,
            timestamp: Utc::now(),
            kind: ResultKind::StaticOnly,
            usage: None,
        }
    }

    #[test]
    fn test_json_report_round_trips() {
        let original = result();
        let rendered = render("req-1", &original, ReportFormat::Json).unwrap();
        let parsed: UnifiedResult = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed.overall_status, original.overall_status);
        assert_eq!(parsed.fidelity_score, original.fidelity_score);
        assert_eq!(parsed.discrepancies.len(), original.discrepancies.len());
        assert_eq!(parsed.summary, original.summary);
    }

    #[test]
    fn test_markdown_report_contents() {
        let rendered = render("req-1", &result(), ReportFormat::Markdown).unwrap();
        assert!(rendered.contains("# Migration Validation Report"));
        assert!(rendered.contains("approved-with-warnings"));
        assert!(rendered.contains("0.5000"));
        assert!(rendered.contains("button text changed"));
    }

    #[test]
    fn test_html_report_escapes() {
        let rendered = render("req-1", &result(), ReportFormat::Html).unwrap();
        assert!(rendered.contains("&lt;Submit&gt;"));
        assert!(!rendered.contains("<Submit>"));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("json".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert_eq!("md".parse::<ReportFormat>().unwrap(), ReportFormat::Markdown);
        assert_eq!("HTML".parse::<ReportFormat>().unwrap(), ReportFormat::Html);
        assert!("pdf".parse::<ReportFormat>().is_err());
    }
}
