use crate::error::AgentError;
use crate::llm_protocol::{
    decision_json_schema, parse_decision, system_prompt, CycleDecision, CycleInput, TranscriptItem,
};
use crate::notebook::Notebook;
use crate::store::save_notebook;
use crate::summary::summarize_csv;
use crate::util::{env_flag, is_path_within};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything one run needs, resolved up front by the caller. The loop never
/// reads the environment itself.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_base: Option<String>,
    // Optional: OpenAI project identifier, sent as a request header.
    pub openai_project: Option<String>,
    /// Directory the CSV inputs live in; summary paths may not escape it.
    pub data_dir: PathBuf,
    /// Directory generated notebooks are written to.
    pub dest_dir: PathBuf,
    /// Hard bound on reasoning cycles; the run ends without a notebook when
    /// the model never produces a final plan.
    pub max_turns: usize,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AgentResult {
    /// Path of the persisted notebook, when the run produced one.
    pub notebook_path: Option<PathBuf>,
    /// A clarifying question or the plan title, when the model supplied one.
    pub final_output: Option<String>,
    pub turns_used: usize,
}

#[tracing::instrument(skip_all, fields(user_prompt = %user_prompt))]
pub async fn agent_loop(user_prompt: &str, cfg: &AgentConfig) -> Result<AgentResult, AgentError> {
    let mut transcript: Vec<TranscriptItem> =
        vec![TranscriptItem { role: "user".into(), content: user_prompt.into() }];
    let mut last_tool_result: Option<serde_json::Value> = None;

    // CSV files visible to the model this run.
    let data_catalog = list_csv_files(&cfg.data_dir);

    for turn in 0..cfg.max_turns {
        let mut sys = system_prompt();
        if !data_catalog.is_empty() {
            sys.push_str("\nData catalog (CSV files in the data directory): ");
            sys.push_str(&data_catalog.join(", "));
            sys.push('\n');
        } else {
            sys.push_str(
                "\nNo CSV files found in the data directory; ask the user for one with more_from_user.\n",
            );
        }
        let cycle_input = CycleInput {
            system_instructions: sys,
            transcript: transcript.clone(),
            tool_context: last_tool_result.clone().unwrap_or(json!({})),
        };
        let decision = call_openai_for_decision(&cycle_input, cfg).await?;

        if env_flag("TABULA_LOG_LLM_JSON") {
            println!(
                "LLM JSON: {}",
                serde_json::to_string_pretty(&decision)
                    .map_err(|e| AgentError::Model(e.to_string()))?
            );
        }

        match decision {
            CycleDecision::SummaryCsv { args } => {
                if let Some(msg) = &args.user_message {
                    println!("{msg}");
                }
                let path = resolve_data_path(&cfg.data_dir, &args.path)?;
                let summary = summarize_csv(&path)?;
                transcript.push(TranscriptItem {
                    role: "tool".into(),
                    content: format!(
                        "summary_csv -> {} rows, {} numeric column(s) of {}",
                        summary.row_count,
                        summary.numeric.len(),
                        summary.columns.len()
                    ),
                });
                last_tool_result = Some(
                    serde_json::to_value(&summary).map_err(|e| AgentError::Model(e.to_string()))?,
                );
                continue;
            }
            CycleDecision::MoreFromUser { args } => {
                let q = args.prompt.unwrap_or_else(|| "Please clarify your goal.".into());
                println!("Tabula asks: {q}");
                return Ok(AgentResult {
                    notebook_path: None,
                    final_output: Some(q),
                    turns_used: turn + 1,
                });
            }
            CycleDecision::Final { plan } => {
                if plan.cells.is_empty() {
                    return Err(AgentError::Model("final plan contained no cells".into()));
                }
                let notebook = Notebook::from_plan(&plan);
                let path = save_notebook(&cfg.dest_dir, &notebook)?;
                println!("Saved notebook -> {}", path.display());
                return Ok(AgentResult {
                    notebook_path: Some(path),
                    final_output: plan.title,
                    turns_used: turn + 1,
                });
            }
        }
    }
    tracing::warn!(max_turns = cfg.max_turns, "model never produced a final plan");
    Ok(AgentResult { notebook_path: None, final_output: None, turns_used: cfg.max_turns })
}

fn list_csv_files(data_dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = match std::fs::read_dir(data_dir) {
        Ok(rd) => rd
            .flatten()
            .filter(|e| e.path().extension().map(|x| x == "csv").unwrap_or(false))
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect(),
        Err(_) => vec![],
    };
    files.sort();
    files
}

// The model names files relative to the data directory; anything that
// resolves outside it is rejected before any read happens.
fn resolve_data_path(data_dir: &Path, name: &str) -> Result<PathBuf, AgentError> {
    let path = data_dir.join(name);
    if !path.exists() {
        return Err(AgentError::DataAccess(format!(
            "{name} not found under {}",
            data_dir.display()
        )));
    }
    if !is_path_within(data_dir, &path) {
        return Err(AgentError::DataAccess(format!("path escapes the data directory: {name}")));
    }
    Ok(path)
}

pub async fn call_openai_for_decision(
    input: &CycleInput,
    cfg: &AgentConfig,
) -> Result<CycleDecision, AgentError> {
    let base = cfg.openai_base.clone().unwrap_or_else(|| "https://api.openai.com".into());
    let url = format!("{}/v1/responses", base.trim_end_matches('/'));
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.request_timeout_secs))
        .build()
        .map_err(|e| AgentError::Model(e.to_string()))?;

    // Build a compact prompt
    let mut prompt = String::new();
    prompt.push_str(&input.system_instructions);
    prompt.push_str("\n--- Transcript ---\n");
    for t in &input.transcript {
        prompt.push_str(&format!("[{}] {}\n", t.role, t.content));
    }
    prompt.push_str("\n--- Tool context ---\n");
    prompt.push_str(&input.tool_context.to_string());
    prompt.push_str("\n--- End ---\n");

    // Responses API with text.format.type = "json_object": the model returns a
    // single JSON object, parsed against the decision schema below.
    let body = json!({
        "model": cfg.openai_model,
        "input": [
            {"role": "system", "content": format!(
                "Return only valid JSON for the given schema. No prose. Schema: {}",
                decision_json_schema()
            )},
            {"role": "user", "content": prompt}
        ],
        "text": {
            "format": { "type": "json_object" }
        }
    });

    let mut req = client
        .post(&url)
        .header(CONTENT_TYPE, "application/json")
        .header(AUTHORIZATION, format!("Bearer {}", cfg.openai_api_key))
        .json(&body);
    if let Some(project) = &cfg.openai_project {
        req = req.header("OpenAI-Project", project);
    }

    let resp = req
        .send()
        .await
        .map_err(|e| AgentError::Model(format!("model request failed: {e}")))?;
    if !resp.status().is_success() {
        let status = resp.status();
        let txt = resp.text().await.unwrap_or_default();
        return Err(AgentError::Model(format!("model API returned {status}: {txt}")));
    }
    let v: serde_json::Value =
        resp.json().await.map_err(|e| AgentError::Model(format!("unreadable response: {e}")))?;

    parse_decision(&extract_output_text(&v))
}

// The Responses API returns an 'output' array (items with type 'message' and
// content blocks); concatenate every text segment.
fn extract_output_text(v: &serde_json::Value) -> String {
    let mut buf = String::new();
    if let Some(items) = v.get("output").and_then(|x| x.as_array()) {
        for item in items {
            if item.get("type").and_then(|x| x.as_str()) == Some("message") {
                if let Some(content) = item.get("content").and_then(|x| x.as_array()) {
                    for block in content {
                        if block.get("type").and_then(|x| x.as_str()) == Some("output_text") {
                            if let Some(text) = block.get("text").and_then(|x| x.as_str()) {
                                buf.push_str(text);
                            }
                        }
                    }
                }
            } else if item.get("type").and_then(|x| x.as_str()) == Some("output_text") {
                if let Some(text) = item.get("text").and_then(|x| x.as_str()) {
                    buf.push_str(text);
                }
            }
        }
    } else if let Some(text) = v.pointer("/output_text").and_then(|x| x.as_str()) {
        buf.push_str(text);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_rejects_missing_and_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        fs_err::create_dir_all(&data_dir).unwrap();
        fs_err::write(data_dir.join("sales.csv"), b"a\n1\n").unwrap();
        fs_err::write(dir.path().join("secret.csv"), b"a\n1\n").unwrap();

        assert!(resolve_data_path(&data_dir, "sales.csv").is_ok());
        let err = resolve_data_path(&data_dir, "absent.csv").unwrap_err();
        assert!(matches!(err, AgentError::DataAccess(_)));
        let err = resolve_data_path(&data_dir, "../secret.csv").unwrap_err();
        assert!(matches!(err, AgentError::DataAccess(_)), "got {err:?}");
    }

    #[test]
    fn catalog_lists_only_csv_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::write(dir.path().join("b.csv"), b"x\n").unwrap();
        fs_err::write(dir.path().join("a.csv"), b"x\n").unwrap();
        fs_err::write(dir.path().join("notes.txt"), b"x\n").unwrap();
        assert_eq!(list_csv_files(dir.path()), vec!["a.csv", "b.csv"]);
        assert!(list_csv_files(&dir.path().join("nope")).is_empty());
    }

    #[test]
    fn output_text_is_collected_across_blocks() {
        let v = json!({
            "output": [
                {"type": "message", "content": [
                    {"type": "output_text", "text": "{\"action\":"},
                    {"type": "output_text", "text": "\"more_from_user\",\"args\":{}}"}
                ]}
            ]
        });
        let d = parse_decision(&extract_output_text(&v)).unwrap();
        assert!(matches!(d, CycleDecision::MoreFromUser { .. }));
    }
}
