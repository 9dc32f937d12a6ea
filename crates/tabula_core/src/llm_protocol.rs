//! The decision schema the model must emit on every cycle, the system prompt,
//! and the parser that turns raw model text into a typed decision.

use crate::error::AgentError;
use crate::notebook::CellKind;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryArgs {
    /// CSV file name, resolved inside the configured data directory.
    pub path: String,
    // A short message to show the user explaining what will happen now.
    #[serde(default)]
    pub user_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoreArgs {
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellSpec {
    pub cell_type: CellKind,
    pub source: String,
}

/// The model's final answer: the ordered cell contents of the notebook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotebookPlan {
    #[serde(default)]
    pub title: Option<String>,
    pub cells: Vec<CellSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CycleDecision {
    // Summarize a CSV file; include a user_message telling the user what is
    // happening now.
    SummaryCsv { args: SummaryArgs },
    // Ask the user a question; include prompt.
    MoreFromUser { args: MoreArgs },
    // Provide the final notebook plan.
    Final { plan: NotebookPlan },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleInput {
    pub system_instructions: String,
    pub transcript: Vec<TranscriptItem>,
    pub tool_context: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptItem {
    pub role: String, // "user" | "assistant" | "tool"
    pub content: String,
}

// Canonical decision schema sent to the model. The Responses API constrains
// JSON Schema inside text.format, so this avoids oneOf and keeps a permissive
// args object covering every action.
pub fn decision_json_schema() -> serde_json::Value {
    json!({
      "name": "cycle_decision",
      "schema": {
        "type": "object",
        "additionalProperties": false,
        "properties": {
          "action": { "type": "string", "enum": ["summary_csv", "more_from_user", "final"] },
          "args": {
            "type": "object",
            "additionalProperties": false,
            "properties": {
              "path": { "type": ["string", "null"] },
              "prompt": { "type": ["string", "null"] },
              "user_message": { "type": ["string", "null"] }
            }
          },
          "plan": {
            "type": "object",
            "properties": {
              "title": { "type": ["string", "null"] },
              "cells": {
                "type": "array",
                "items": {
                  "type": "object",
                  "properties": {
                    "cell_type": { "type": "string", "enum": ["markdown", "code", "raw"] },
                    "source": { "type": "string" }
                  },
                  "required": ["cell_type", "source"]
                }
              }
            },
            "required": ["cells"]
          }
        },
        "required": ["action"]
      },
      "strict": true
    })
}

pub fn system_prompt() -> String {
    r###"
You are Tabula, a data-analysis agent that writes Jupyter notebooks. On each turn choose exactly ONE of these actions and return ONLY JSON:
- summary_csv: compute descriptive statistics for a CSV file from the data catalog. Required fields:
  {"action":"summary_csv","args":{"path":"sales.csv","user_message":"<short explanation for the user>"}}
- more_from_user: ask a concise question.
  {"action":"more_from_user","args":{"prompt":"<question>"}}
- final: provide the finished notebook plan as an ordered list of cells.
  {"action":"final","plan":{"title":"<notebook title>","cells":[
    {"cell_type":"markdown","source":"## Section heading and commentary"},
    {"cell_type":"code","source":"import pandas as pd"}
  ]}}

Rules:
- ALWAYS call summary_csv on the dataset before emitting a final plan; pick the analyses from the columns it reports.
- Return only a valid JSON object; no prose outside JSON.
- Include a user_message on summary_csv describing what will happen now.
- The system will pass the latest summary back in `tool_context`; reference only columns that actually exist there.
- Code cells must be executable Python. Read data with pd.read_csv(os.path.join('../data', file_name)).
- Alternate markdown commentary with code: every analysis gets a markdown cell explaining it, then the code cell.
- Start the notebook with one markdown title cell and one code cell importing pandas, numpy, scipy.stats and matplotlib.
- For hypothesis tests use scipy.stats with significance level 0.05 and state the conclusion against that level in a markdown cell.
- Keep the notebook to summary statistics and hypothesis tests; no model fitting.

PANDAS/SCIPY REFERENCE:

## Loading and describing
```python
import os
import pandas as pd
df = pd.read_csv(os.path.join('../data', 'file.csv'))
df.describe()
df.info()
df.isna().sum()
```

## Group comparisons
```python
df.groupby('group')['value'].agg(['count', 'mean', 'std'])
```

## Hypothesis tests
```python
from scipy import stats
t, p = stats.ttest_ind(a, b, equal_var=False)   # two-sample means
chi2, p, dof, _ = stats.chi2_contingency(table) # independence
r, p = stats.pearsonr(x, y)                     # correlation
# Compare p against 0.05 and state the conclusion in the next markdown cell.
```

## Plots
```python
import matplotlib.pyplot as plt
df['value'].hist(bins=30)
plt.show()
```
"###
    .to_string()
}

/// Parse the model's raw text into a decision. Tolerates fenced JSON and a
/// couple of simpler shapes models emit when not following the schema
/// strictly; anything else is a `Model` error.
pub fn parse_decision(raw: &str) -> Result<CycleDecision, AgentError> {
    let body = strip_fences(raw);
    let parse_err = match serde_json::from_str::<CycleDecision>(body) {
        Ok(d) => return Ok(d),
        Err(e) => e,
    };
    // Heuristic fallback: accept args fields hoisted to the top level.
    if let Ok(obj) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(action) = obj.get("action").and_then(|x| x.as_str()) {
            match action {
                "summary_csv" => {
                    if let Some(path) = obj.get("path").and_then(|x| x.as_str()) {
                        return Ok(CycleDecision::SummaryCsv {
                            args: SummaryArgs { path: path.to_string(), user_message: None },
                        });
                    }
                }
                "more_from_user" => {
                    let prompt = obj
                        .get("prompt")
                        .or_else(|| obj.get("question"))
                        .and_then(|x| x.as_str())
                        .map(|s| s.to_string());
                    return Ok(CycleDecision::MoreFromUser { args: MoreArgs { prompt } });
                }
                "final" => {
                    if let Some(cells) = obj.get("cells") {
                        let plan = serde_json::from_value(json!({
                            "title": obj.get("title"),
                            "cells": cells,
                        }));
                        if let Ok(plan) = plan {
                            return Ok(CycleDecision::Final { plan });
                        }
                    }
                }
                _ => {}
            }
        }
    }
    let mut snippet = body.to_string();
    snippet.truncate(200);
    Err(AgentError::Model(format!(
        "output does not match the decision schema: {parse_err} (raw: {snippet})"
    )))
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start_matches('\n').trim_end_matches('`').trim()
}
