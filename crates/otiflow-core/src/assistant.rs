//! Prompts for the text generator, each with a fixed fallback.

use crate::ingest::RelationHandle;
use crate::kpi::AnomalyReport;
use crate::textgen::TextGenerator;

pub const INSIGHT_OFFLINE: &str = "AI Insight Service Offline: Missing API Key.";
pub const INSIGHT_ERROR: &str = "AI Insight Service Error: Could not generate summary.";
pub const CHAT_OFFLINE: &str = "Chatbot Service Offline: Missing API Key.";
pub const CHAT_ERROR: &str = "Sorry, I encountered an API error while processing your request.";
pub const QUERY_OFFLINE_SQL: &str = "SELECT 'AI Query Service Offline' AS status;";
pub const QUERY_ERROR_SQL: &str = "SELECT 'AI Translator Error' AS status;";

const CHAT_INSTRUCTION: &str = "You are a helpful, professional, and friendly AI assistant for a \
     Supply Chain Automation platform. Keep answers concise.";

const SALES_COLUMNS: [(&str, &str); 10] = [
    ("id", "INTEGER"),
    ("tenant_id", "INTEGER"),
    ("order_id", "TEXT"),
    ("product_id", "TEXT"),
    ("customer_id", "TEXT"),
    ("order_qty", "INTEGER"),
    ("delivery_qty", "INTEGER"),
    ("delivery_date", "TEXT (YYYY-MM-DD)"),
    ("on_time", "INTEGER (0 or 1)"),
    ("in_full", "INTEGER (0 or 1)"),
];

pub async fn summarize_anomaly(
    generator: Option<&dyn TextGenerator>,
    anomaly: &AnomalyReport,
) -> String {
    let Some(generator) = generator else {
        return INSIGHT_OFFLINE.to_string();
    };

    let data = serde_json::to_string(anomaly).unwrap_or_default();
    let prompt = format!(
        "You are an expert Supply Chain Analyst. Provide a concise, professional and urgent \
         narrative summary (max 3 sentences) of the latest supply chain anomaly. Focus on the \
         metric, the change and the potential business impact.\n\nAnomaly Data: {data}\n\n\
         Generate the summary:"
    );

    match generator.generate(&prompt).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "insight summary failed");
            INSIGHT_ERROR.to_string()
        }
    }
}

pub async fn chat_reply(generator: Option<&dyn TextGenerator>, message: &str) -> String {
    let Some(generator) = generator else {
        return CHAT_OFFLINE.to_string();
    };

    let prompt = format!("{CHAT_INSTRUCTION}\n\n{message}");
    match generator.generate(&prompt).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "chat reply failed");
            CHAT_ERROR.to_string()
        }
    }
}

/// Asks for one SELECT over `relation`. The result still has to pass the query guard.
pub async fn translate_to_sql(
    generator: Option<&dyn TextGenerator>,
    question: &str,
    relation: &RelationHandle,
) -> String {
    let Some(generator) = generator else {
        return QUERY_OFFLINE_SQL.to_string();
    };

    let schema = SALES_COLUMNS
        .iter()
        .map(|(name, ty)| format!("- {name}: {ty}"))
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = format!(
        "You are a SQL query generation model. Convert the user's request into a single, valid \
         SQLite SELECT statement that queries the table '{table}'.\n\n\
         Schema for '{table}':\n{schema}\n\n\
         Rules:\n\
         1. Only generate the SQL query itself. Do not include any other text.\n\
         2. Enclose the query in triple backticks (```sql).\n\
         3. Query no table other than '{table}'.\n\
         4. Translate relative dates to literal YYYY-MM-DD comparisons.\n\n\
         User Query: \"{question}\"",
        table = relation.name(),
    );

    match generator.generate(&prompt).await {
        Ok(text) => unfence_sql(&text),
        Err(e) => {
            tracing::warn!(error = %e, "query translation failed");
            QUERY_ERROR_SQL.to_string()
        }
    }
}

/// Strips a ```sql ... ``` wrapper if present.
#[must_use]
pub fn unfence_sql(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let rest = rest
        .strip_prefix("sql")
        .or_else(|| rest.strip_prefix("SQL"))
        .unwrap_or(rest);
    rest.trim_end().trim_end_matches("```").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kpi::{detect_anomaly, KpiSnapshot};
    use crate::textgen::CannedGenerator;

    #[test]
    fn test_unfence_sql() {
        assert_eq!(unfence_sql("```sql\nSELECT 1;\n```"), "SELECT 1;");
        assert_eq!(unfence_sql("```\nSELECT 2\n```"), "SELECT 2");
        assert_eq!(unfence_sql("  SELECT 3  "), "SELECT 3");
    }

    #[tokio::test]
    async fn test_fallbacks_without_generator() {
        let anomaly = detect_anomaly(&KpiSnapshot::default());
        assert_eq!(summarize_anomaly(None, &anomaly).await, INSIGHT_OFFLINE);
        assert_eq!(chat_reply(None, "hello").await, CHAT_OFFLINE);
        assert_eq!(
            translate_to_sql(None, "top products", &RelationHandle::for_workflow(1)).await,
            QUERY_OFFLINE_SQL
        );
    }

    #[tokio::test]
    async fn test_fallbacks_on_service_error() {
        let failing = CannedGenerator::failing();
        let anomaly = detect_anomaly(&KpiSnapshot::default());
        assert_eq!(summarize_anomaly(Some(&failing), &anomaly).await, INSIGHT_ERROR);
        assert_eq!(chat_reply(Some(&failing), "hello").await, CHAT_ERROR);
        assert_eq!(
            translate_to_sql(Some(&failing), "x", &RelationHandle::for_workflow(1)).await,
            QUERY_ERROR_SQL
        );
    }

    #[tokio::test]
    async fn test_translation_unwraps_fence() {
        let generator = CannedGenerator::new("```sql\nSELECT COUNT(*) FROM sales_wf_1;\n```");
        let relation = RelationHandle::for_workflow(1);
        let sql = translate_to_sql(Some(&generator), "how many", &relation).await;
        assert_eq!(sql, "SELECT COUNT(*) FROM sales_wf_1;");
    }
}
