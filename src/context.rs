//! Multi-domain context aggregation for LLM prompts
//!
//! Converts the heterogeneous per-domain workflow and approval state of
//! a session into one bounded-length text block. LLMs consume text, so
//! every structured context map is rendered through a formatter; domain
//! names select a specialized renderer when one is registered, with a
//! generic key/value dump as the fallback.
//!
//! Aggregation never mutates the session. Two calls on an unmodified
//! session produce identical output.

use crate::session::{ChatSession, Message, RunningWorkflow};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Marker appended to a context that was cut down to size
const TRUNCATION_MARKER: &str = "\n\n... [context truncated due to size limit]";

/// Characters reserved for the truncation marker and surrounding text
const TRUNCATION_HEADROOM: usize = 200;

/// Context size above which summarization kicks in (serialized chars)
const SUMMARIZE_THRESHOLD: usize = 1000;

/// Context keys retained when summarizing without a `summary` field
const SUMMARY_KEYS: [&str; 6] = [
    "intent",
    "status",
    "progress",
    "current_step",
    "summary",
    "error",
];

/// Renders a workflow context map to display text
pub type DomainFormatter = Arc<dyn Fn(&Map<String, Value>, bool) -> String + Send + Sync>;

/// Derives an auxiliary context map from a live workflow
pub type DomainExtractor = Arc<dyn Fn(&RunningWorkflow) -> Map<String, Value> + Send + Sync>;

/// Options controlling a single aggregation call
#[derive(Debug, Clone, Default)]
pub struct AggregateOptions {
    /// Only include these domains when set
    pub filter_domains: Option<Vec<String>>,
    /// Summarize large per-domain contexts
    pub summarize: bool,
    /// Attach recent messages to the result
    pub include_messages: bool,
    /// Message cap when `include_messages` is set
    pub max_messages: usize,
}

impl AggregateOptions {
    /// Options for the query path: summarized, optionally filtered to
    /// one domain, with the ten most recent messages attached
    pub fn for_query(intent_domain: Option<&str>) -> Self {
        Self {
            filter_domains: intent_domain.map(|d| vec![d.to_string()]),
            summarize: true,
            include_messages: true,
            max_messages: 10,
        }
    }
}

/// Truncation metadata attached when the context was cut
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TruncationInfo {
    /// Character count before truncation
    pub original_size: usize,
    /// Configured maximum
    pub max_size: usize,
}

/// Result of one aggregation call
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedContext {
    /// Session the context was built from, absent for invalid input
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Formatted context block for prompt inclusion
    pub formatted_context: String,
    /// True when the context was cut to fit the size limit
    pub truncated: bool,
    /// Sizes recorded when truncation happened
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncation_info: Option<TruncationInfo>,
    /// Recent messages, present when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_messages: Option<Vec<Message>>,
    /// Error description for invalid input
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AggregatedContext {
    fn invalid_session() -> Self {
        Self {
            session_id: None,
            formatted_context: "No valid session".to_string(),
            truncated: false,
            truncation_info: None,
            recent_messages: None,
            error: Some("Invalid session".to_string()),
        }
    }
}

/// Aggregates per-domain workflow/approval state into prompt text
pub struct ContextAggregator {
    max_context_size: usize,
    formatters: HashMap<String, DomainFormatter>,
    extractors: HashMap<String, DomainExtractor>,
}

impl ContextAggregator {
    /// Creates an aggregator with built-in finance and hr formatters
    pub fn new(max_context_size: usize) -> Self {
        let mut formatters: HashMap<String, DomainFormatter> = HashMap::new();
        formatters.insert(
            "finance".to_string(),
            Arc::new(|ctx, summarize| format_finance_context(ctx, summarize)),
        );
        formatters.insert(
            "hr".to_string(),
            Arc::new(|ctx, summarize| format_hr_context(ctx, summarize)),
        );

        Self {
            max_context_size,
            formatters,
            extractors: HashMap::new(),
        }
    }

    /// Registers a formatter for a domain, replacing any existing one
    pub fn register_formatter(&mut self, domain: impl Into<String>, formatter: DomainFormatter) {
        self.formatters.insert(domain.into(), formatter);
    }

    /// Registers a custom context extractor for a domain
    pub fn register_extractor(&mut self, domain: impl Into<String>, extractor: DomainExtractor) {
        self.extractors.insert(domain.into(), extractor);
    }

    /// Aggregates context from a session's workflows and approvals
    ///
    /// A missing session yields the "No valid session" error payload; a
    /// session with nothing to report yields "No active workflows".
    pub fn aggregate(
        &self,
        session: Option<&ChatSession>,
        options: &AggregateOptions,
    ) -> AggregatedContext {
        let session = match session {
            Some(session) => session,
            None => return AggregatedContext::invalid_session(),
        };

        let included = |domain: &str| match &options.filter_domains {
            Some(filter) => filter.iter().any(|d| d == domain),
            None => true,
        };

        let mut lines: Vec<String> = Vec::new();

        // Sorted iteration keeps the output deterministic
        let mut workflow_domains: Vec<&String> = session.workflows.keys().collect();
        workflow_domains.sort();
        for domain in workflow_domains {
            if !included(domain) {
                continue;
            }
            let workflow = &session.workflows[domain];

            lines.push(format!("Domain: {}", domain));
            lines.push(format!("  Workflow: {}", workflow.description));
            lines.push(format!("  Status: {}", workflow.status().as_str()));
            if workflow.progress() > 0.0 {
                lines.push(format!("  Progress: {:.1}%", workflow.progress() * 100.0));
            }
            lines.push(format!(
                "  Context: {}",
                self.format_context_map(&workflow.context, domain, options.summarize)
            ));

            if let Some(extractor) = self.extractors.get(domain) {
                let custom = extractor(workflow);
                if !custom.is_empty() {
                    lines.push(format!(
                        "  Custom Context: {}",
                        self.format_context_map(&custom, domain, options.summarize)
                    ));
                }
            }

            lines.push(String::new());
        }

        let mut approval_domains: Vec<&String> = session.pending_approvals.keys().collect();
        approval_domains.sort();
        for domain in approval_domains {
            if !included(domain) {
                continue;
            }
            let approval = &session.pending_approvals[domain];
            let header = format!("Domain: {}", domain);
            let detail_lines = [
                format!("  Pending Approval: {}", approval.description),
                format!(
                    "  Approval Details: {}",
                    format_approval_details(&approval.triage_result)
                ),
            ];

            // Attach to the existing domain section when one exists
            match lines.iter().position(|line| *line == header) {
                Some(pos) => {
                    let mut insert_at = pos + 1;
                    while insert_at < lines.len() && lines[insert_at].starts_with("  ") {
                        insert_at += 1;
                    }
                    for (offset, line) in detail_lines.into_iter().enumerate() {
                        lines.insert(insert_at + offset, line);
                    }
                }
                None => {
                    lines.push(header);
                    lines.extend(detail_lines);
                    lines.push(String::new());
                }
            }
        }

        let mut formatted = lines.join("\n").trim().to_string();
        if formatted.is_empty() {
            formatted = "No active workflows".to_string();
        }

        let recent_messages = options.include_messages.then(|| {
            let history = session.history();
            let start = history.len().saturating_sub(options.max_messages);
            history[start..].to_vec()
        });

        let mut result = AggregatedContext {
            session_id: Some(session.session_id.clone()),
            formatted_context: formatted,
            truncated: false,
            truncation_info: None,
            recent_messages,
            error: None,
        };

        let size = result.formatted_context.chars().count();
        if size > self.max_context_size {
            self.truncate(&mut result, size);
        }

        result
    }

    fn truncate(&self, result: &mut AggregatedContext, original_size: usize) {
        result.truncated = true;
        result.truncation_info = Some(TruncationInfo {
            original_size,
            max_size: self.max_context_size,
        });

        let keep = self.max_context_size.saturating_sub(TRUNCATION_HEADROOM);
        let mut content: String = result.formatted_context.chars().take(keep).collect();
        content.push_str(TRUNCATION_MARKER);
        result.formatted_context = content;
    }

    fn format_context_map(
        &self,
        context: &Map<String, Value>,
        domain: &str,
        summarize: bool,
    ) -> String {
        if context.is_empty() {
            return "No context available".to_string();
        }
        match self.formatters.get(domain) {
            Some(formatter) => formatter(context, summarize),
            None => format_default_context(context, summarize),
        }
    }
}

/// Renders a JSON value for inline display, strings unquoted
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

/// Title-cases a key for display ("current_step" -> "Current_Step")
fn title_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut at_word_start = true;
    for ch in key.chars() {
        if ch.is_alphabetic() {
            if at_word_start {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(ch);
            at_word_start = true;
        }
    }
    out
}

/// Generic key/value rendering with nested-map and list flattening
fn format_default_context(context: &Map<String, Value>, summarize: bool) -> String {
    let serialized_len = serde_json::to_string(context)
        .map(|s| s.len())
        .unwrap_or(0);

    let filtered;
    let context = if summarize && serialized_len > SUMMARIZE_THRESHOLD {
        // Prefer an explicit summary, nested state first
        if let Some(Value::Object(state)) = context.get("state") {
            if let Some(summary) = state.get("summary") {
                return format!("Summary: {}", display_value(summary));
            }
        }
        if let Some(summary) = context.get("summary") {
            return format!("Summary: {}", display_value(summary));
        }

        filtered = context
            .iter()
            .filter(|(k, _)| SUMMARY_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<Map<String, Value>>();
        &filtered
    } else {
        context
    };

    let mut lines = Vec::new();
    for (key, value) in context {
        match value {
            Value::Object(nested) => {
                lines.push(format!("{}:", title_case(key)));
                for (sub_key, sub_value) in nested {
                    lines.push(format!("  {}: {}", sub_key, display_value(sub_value)));
                }
            }
            Value::Array(items) => {
                let joined = items
                    .iter()
                    .map(display_value)
                    .collect::<Vec<_>>()
                    .join(", ");
                lines.push(format!("{}: {}", title_case(key), joined));
            }
            other => lines.push(format!("{}: {}", title_case(key), display_value(other))),
        }
    }
    lines.join("\n")
}

/// Finance-specific rendering: intent, symbol/amount, state, the rest
fn format_finance_context(context: &Map<String, Value>, _summarize: bool) -> String {
    let mut lines = Vec::new();

    if let Some(intent) = context.get("intent") {
        lines.push(format!("Intent: {}", display_value(intent)));
    }

    if let Some(Value::Object(entities)) = context.get("entities") {
        if let Some(symbol) = entities.get("symbol") {
            lines.push(format!("Symbol: {}", display_value(symbol)));
        }
        if let Some(amount) = entities.get("amount") {
            match amount.as_f64() {
                Some(n) => lines.push(format!("Amount: ${}", format_money(n))),
                None => lines.push(format!("Amount: {}", display_value(amount))),
            }
        }
    }

    if let Some(Value::Object(state)) = context.get("state") {
        if let Some(status) = state.get("status") {
            match state.get("progress") {
                Some(progress) if !progress.is_null() => lines.push(format!(
                    "Status: {} ({}% complete)",
                    display_value(status),
                    display_value(progress)
                )),
                _ => lines.push(format!("Status: {}", display_value(status))),
            }
        }
        if let Some(risk) = state.get("risk_level") {
            lines.push(format!("Risk Level: {}", display_value(risk)));
        }
    }

    for (key, value) in context {
        if matches!(key.as_str(), "intent" | "entities" | "state") {
            continue;
        }
        lines.push(format!("{}: {}", title_case(key), display_value(value)));
    }

    lines.join("\n")
}

/// HR-specific rendering: intent, employee, document tracking
fn format_hr_context(context: &Map<String, Value>, _summarize: bool) -> String {
    let mut lines = Vec::new();

    if let Some(intent) = context.get("intent") {
        lines.push(format!("Intent: {}", display_value(intent)));
    }

    if let Some(Value::Object(entities)) = context.get("entities") {
        if let Some(id) = entities.get("employee_id") {
            lines.push(format!("Employee ID: {}", display_value(id)));
        }
    }

    if let Some(Value::Object(state)) = context.get("state") {
        if let Some(status) = state.get("status") {
            lines.push(format!("Status: {}", display_value(status)));
        }
        if let Some(docs) = state.get("documents_required") {
            lines.push(format!("Documents Required: {}", display_value(docs)));
        }
        if let Some(docs) = state.get("documents_received") {
            lines.push(format!("Documents Received: {}", display_value(docs)));
        }
        if let Some(next) = state.get("next_step") {
            lines.push(format!("Next Step: {}", display_value(next)));
        }
    }

    lines.join("\n")
}

/// "Key: value; Key: value" rendering of an approval's triage result
fn format_approval_details(details: &Value) -> String {
    match details {
        Value::Object(map) if !map.is_empty() => map
            .iter()
            .map(|(key, value)| format!("{}: {}", title_case(key), display_value(value)))
            .collect::<Vec<_>>()
            .join("; "),
        _ => "No details available".to_string(),
    }
}

/// Thousands-grouped two-decimal money formatting
fn format_money(amount: f64) -> String {
    let negative = amount < 0.0;
    let formatted = format!("{:.2}", amount.abs());
    let (whole, fraction) = formatted.split_once('.').unwrap_or((&formatted, "00"));

    let digits: Vec<char> = whole.chars().collect();
    let mut grouped = String::new();
    for (i, ch) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(*ch);
    }

    let sign = if negative { "-" } else { "" };
    format!("{}{}.{}", sign, grouped, fraction)
}
