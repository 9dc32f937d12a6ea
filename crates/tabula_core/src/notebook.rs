//! Typed model of the nbformat 4.5 document, plus the pure assembly and cell
//! manipulation operations the agent and the CLI work through. No I/O here;
//! persistence lives in `store`.

use crate::error::AgentError;
use crate::llm_protocol::NotebookPlan;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    Markdown,
    Code,
    Raw,
}

impl std::str::FromStr for CellKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, AgentError> {
        match s {
            "markdown" => Ok(CellKind::Markdown),
            "code" => Ok(CellKind::Code),
            "raw" => Ok(CellKind::Raw),
            other => Err(AgentError::Format(format!(
                "invalid cell type: {other}; must be code, markdown, or raw"
            ))),
        }
    }
}

/// One output of an executed code cell. Generated notebooks carry none, but
/// the model must round-trip notebooks produced by real kernels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellOutput {
    pub output_type: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evalue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<Vec<String>>,
}

/// A notebook cell. Code cells always serialize `outputs` and
/// `execution_count` (as `null` when never executed) because viewers expect
/// the keys to be present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cell_type", rename_all = "snake_case")]
pub enum Cell {
    Markdown {
        #[serde(default)]
        metadata: Map<String, Value>,
        #[serde(default, deserialize_with = "de_source")]
        source: Vec<String>,
    },
    Code {
        #[serde(default)]
        metadata: Map<String, Value>,
        #[serde(default, deserialize_with = "de_source")]
        source: Vec<String>,
        #[serde(default)]
        outputs: Vec<CellOutput>,
        #[serde(default)]
        execution_count: Option<i64>,
    },
    Raw {
        #[serde(default)]
        metadata: Map<String, Value>,
        #[serde(default, deserialize_with = "de_source")]
        source: Vec<String>,
    },
}

// nbformat allows `source` as a single string or a list of lines.
fn de_source<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SourceRepr {
        Text(String),
        Lines(Vec<String>),
    }
    Ok(match SourceRepr::deserialize(deserializer)? {
        SourceRepr::Text(s) => source_lines(&s),
        SourceRepr::Lines(lines) => lines,
    })
}

fn source_lines(text: &str) -> Vec<String> {
    text.split_inclusive('\n').map(str::to_string).collect()
}

impl Cell {
    pub fn new(kind: CellKind, text: &str) -> Cell {
        let source = source_lines(text);
        match kind {
            CellKind::Markdown => Cell::Markdown { metadata: Map::new(), source },
            CellKind::Code => Cell::Code {
                metadata: Map::new(),
                source,
                outputs: Vec::new(),
                execution_count: None,
            },
            CellKind::Raw => Cell::Raw { metadata: Map::new(), source },
        }
    }

    pub fn markdown(text: &str) -> Cell {
        Cell::new(CellKind::Markdown, text)
    }

    pub fn code(text: &str) -> Cell {
        Cell::new(CellKind::Code, text)
    }

    pub fn kind(&self) -> CellKind {
        match self {
            Cell::Markdown { .. } => CellKind::Markdown,
            Cell::Code { .. } => CellKind::Code,
            Cell::Raw { .. } => CellKind::Raw,
        }
    }

    /// Cell content joined back into a single string.
    pub fn text(&self) -> String {
        self.source().concat()
    }

    fn source(&self) -> &[String] {
        match self {
            Cell::Markdown { source, .. } | Cell::Code { source, .. } | Cell::Raw { source, .. } => {
                source
            }
        }
    }

    fn set_text(&mut self, text: &str) {
        let lines = source_lines(text);
        match self {
            Cell::Markdown { source, .. } | Cell::Code { source, .. } | Cell::Raw { source, .. } => {
                *source = lines;
            }
        }
    }

    fn into_parts(self) -> (Map<String, Value>, Vec<String>) {
        match self {
            Cell::Markdown { metadata, source }
            | Cell::Code { metadata, source, .. }
            | Cell::Raw { metadata, source } => (metadata, source),
        }
    }

    /// Rebuild this cell as `kind`, keeping metadata and source. Leaving code
    /// drops outputs and the execution count.
    fn with_kind(self, kind: CellKind) -> Cell {
        let (metadata, source) = self.into_parts();
        match kind {
            CellKind::Markdown => Cell::Markdown { metadata, source },
            CellKind::Code => Cell::Code {
                metadata,
                source,
                outputs: Vec::new(),
                execution_count: None,
            },
            CellKind::Raw => Cell::Raw { metadata, source },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotebookMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernelspec: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_info: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NotebookMetadata {
    /// Kernel and language blocks for a stock python3 kernel, which is what
    /// the generated pandas/scipy cells run under.
    pub fn python3() -> Self {
        NotebookMetadata {
            kernelspec: Some(json!({
                "display_name": "Python 3",
                "language": "python",
                "name": "python3",
            })),
            language_info: Some(json!({
                "codemirror_mode": { "name": "ipython", "version": 3 },
                "file_extension": ".py",
                "mimetype": "text/x-python",
                "name": "python",
                "nbconvert_exporter": "python",
                "pygments_lexer": "ipython3",
                "version": "3.8.0",
            })),
            title: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    #[serde(default)]
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub metadata: NotebookMetadata,
    pub nbformat: i64,
    pub nbformat_minor: i64,
}

impl Default for Notebook {
    fn default() -> Self {
        Notebook {
            cells: Vec::new(),
            metadata: NotebookMetadata::python3(),
            nbformat: 4,
            nbformat_minor: 5,
        }
    }
}

impl Notebook {
    /// Assemble a document from the model's final plan. Pure; cell order is
    /// preserved exactly.
    pub fn from_plan(plan: &NotebookPlan) -> Notebook {
        let mut nb = Notebook::default();
        nb.metadata.title = plan.title.clone();
        nb.cells = plan
            .cells
            .iter()
            .map(|spec| Cell::new(spec.cell_type, &spec.source))
            .collect();
        nb
    }

    /// One markdown cell per ATX-header section; content before the first
    /// header becomes its own cell. No headers means a single cell.
    pub fn from_markdown(text: &str) -> Notebook {
        let header = Regex::new(r"(?m)^#+\s").expect("valid regex");
        let starts: Vec<usize> = header.find_iter(text).map(|m| m.start()).collect();

        let mut nb = Notebook::default();
        if starts.is_empty() {
            if !text.trim().is_empty() {
                nb.cells.push(Cell::markdown(text.trim_end()));
            }
            return nb;
        }
        let mut sections = Vec::new();
        if !text[..starts[0]].trim().is_empty() {
            sections.push(&text[..starts[0]]);
        }
        for (i, &start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(text.len());
            sections.push(&text[start..end]);
        }
        nb.cells = sections.iter().map(|s| Cell::markdown(s.trim_end())).collect();
        nb
    }

    /// Wrap a whole file as a single-cell notebook.
    pub fn from_file(path: &Path, kind: CellKind) -> Result<Notebook, AgentError> {
        let content = fs_err::read_to_string(path)
            .map_err(|e| AgentError::DataAccess(e.to_string()))?;
        let mut nb = Notebook::default();
        nb.cells.push(Cell::new(kind, &content));
        Ok(nb)
    }

    pub fn to_json(&self) -> Result<String, AgentError> {
        serde_json::to_string_pretty(self).map_err(|e| AgentError::Format(e.to_string()))
    }

    pub fn from_json(s: &str) -> Result<Notebook, AgentError> {
        serde_json::from_str(s)
            .map_err(|e| AgentError::Format(format!("invalid notebook JSON: {e}")))
    }

    fn check_index(&self, index: usize) -> Result<(), AgentError> {
        if index >= self.cells.len() {
            return Err(AgentError::Format(format!(
                "cell index {index} is out of range; notebook has {} cells",
                self.cells.len()
            )));
        }
        Ok(())
    }

    /// Replace a cell's content, optionally retyping it.
    pub fn edit_cell(
        &mut self,
        index: usize,
        content: &str,
        kind: Option<CellKind>,
    ) -> Result<(), AgentError> {
        self.check_index(index)?;
        self.cells[index].set_text(content);
        if let Some(kind) = kind {
            let cell = self.cells.remove(index);
            self.cells.insert(index, cell.with_kind(kind));
        }
        Ok(())
    }

    pub fn insert_cell(
        &mut self,
        position: usize,
        content: &str,
        kind: CellKind,
    ) -> Result<(), AgentError> {
        if position > self.cells.len() {
            return Err(AgentError::Format(format!(
                "position {position} is out of range; valid range is 0 to {}",
                self.cells.len()
            )));
        }
        self.cells.insert(position, Cell::new(kind, content));
        Ok(())
    }

    pub fn append_cell(&mut self, content: &str, kind: CellKind) {
        self.cells.push(Cell::new(kind, content));
    }

    /// Merge the inclusive cell range into one cell carrying the first cell's
    /// type and metadata; sources are joined with a newline.
    pub fn merge_cells(&mut self, start: usize, end: usize) -> Result<(), AgentError> {
        self.check_index(start)?;
        self.check_index(end)?;
        if end < start {
            return Err(AgentError::Format(format!(
                "end index {end} is before start index {start}"
            )));
        }
        let merged_text = self.cells[start..=end]
            .iter()
            .map(Cell::text)
            .collect::<Vec<_>>()
            .join("\n");
        let kind = self.cells[start].kind();
        let (metadata, _) = self.cells[start].clone().into_parts();
        let mut merged = Cell::new(kind, &merged_text);
        match &mut merged {
            Cell::Markdown { metadata: m, .. }
            | Cell::Code { metadata: m, .. }
            | Cell::Raw { metadata: m, .. } => *m = metadata,
        }
        self.cells.splice(start..=end, [merged]);
        Ok(())
    }

    pub fn swap_cells(&mut self, a: usize, b: usize) -> Result<(), AgentError> {
        self.check_index(a)?;
        self.check_index(b)?;
        self.cells.swap(a, b);
        Ok(())
    }

    /// Source of every code cell, in order.
    pub fn extract_code(&self) -> Vec<String> {
        self.cells
            .iter()
            .filter(|c| c.kind() == CellKind::Code)
            .map(Cell::text)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_protocol::CellSpec;

    fn sample() -> Notebook {
        Notebook::from_plan(&NotebookPlan {
            title: Some("EDA".into()),
            cells: vec![
                CellSpec { cell_type: CellKind::Markdown, source: "# Overview".into() },
                CellSpec { cell_type: CellKind::Code, source: "import pandas as pd".into() },
                CellSpec { cell_type: CellKind::Code, source: "df.describe()".into() },
            ],
        })
    }

    #[test]
    fn from_plan_preserves_order_and_types() {
        let nb = sample();
        assert_eq!(nb.cells.len(), 3);
        assert_eq!(nb.cells[0].kind(), CellKind::Markdown);
        assert_eq!(nb.cells[1].kind(), CellKind::Code);
        assert_eq!(nb.cells[1].text(), "import pandas as pd");
        assert_eq!(nb.nbformat, 4);
        assert_eq!(nb.nbformat_minor, 5);
    }

    #[test]
    fn code_cells_serialize_null_execution_count() {
        let json = sample().to_json().unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        let code = &v["cells"][1];
        assert_eq!(code["cell_type"], "code");
        assert!(code["execution_count"].is_null());
        assert_eq!(code["outputs"], serde_json::json!([]));
        let md = &v["cells"][0];
        assert!(md.get("outputs").is_none());
    }

    #[test]
    fn json_round_trip_is_lossless() {
        let nb = sample();
        let back = Notebook::from_json(&nb.to_json().unwrap()).unwrap();
        assert_eq!(back, nb);
    }

    #[test]
    fn source_accepts_string_or_lines() {
        let doc = r#"{
            "cells": [
                {"cell_type": "markdown", "source": "one\ntwo"},
                {"cell_type": "markdown", "source": ["one\n", "two"]}
            ],
            "metadata": {},
            "nbformat": 4,
            "nbformat_minor": 5
        }"#;
        let nb = Notebook::from_json(doc).unwrap();
        assert_eq!(nb.cells[0].text(), "one\ntwo");
        assert_eq!(nb.cells[0], nb.cells[1]);
    }

    #[test]
    fn edit_retype_clears_execution_state() {
        let doc = r#"{
            "cells": [{"cell_type": "code", "source": "1+1",
                       "outputs": [{"output_type": "stream", "name": "stdout", "text": "2"}],
                       "execution_count": 3}],
            "metadata": {},
            "nbformat": 4,
            "nbformat_minor": 5
        }"#;
        let mut nb = Notebook::from_json(doc).unwrap();
        nb.edit_cell(0, "now prose", Some(CellKind::Markdown)).unwrap();
        assert_eq!(nb.cells[0].kind(), CellKind::Markdown);
        nb.edit_cell(0, "back = 1", Some(CellKind::Code)).unwrap();
        match &nb.cells[0] {
            Cell::Code { outputs, execution_count, .. } => {
                assert!(outputs.is_empty());
                assert_eq!(*execution_count, None);
            }
            other => panic!("expected code cell, got {other:?}"),
        }
    }

    #[test]
    fn insert_and_swap_validate_indices() {
        let mut nb = sample();
        assert!(matches!(nb.insert_cell(9, "x", CellKind::Code), Err(AgentError::Format(_))));
        assert!(matches!(nb.swap_cells(0, 9), Err(AgentError::Format(_))));
        nb.insert_cell(0, "preface", CellKind::Markdown).unwrap();
        assert_eq!(nb.cells[0].text(), "preface");
        nb.swap_cells(0, 1).unwrap();
        assert_eq!(nb.cells[1].text(), "preface");
    }

    #[test]
    fn merge_takes_first_type_and_joins_sources() {
        let mut nb = sample();
        nb.merge_cells(1, 2).unwrap();
        assert_eq!(nb.cells.len(), 2);
        assert_eq!(nb.cells[1].kind(), CellKind::Code);
        assert_eq!(nb.cells[1].text(), "import pandas as pd\ndf.describe()");
        assert!(matches!(nb.merge_cells(1, 0), Err(AgentError::Format(_))));
    }

    #[test]
    fn extract_code_skips_markdown() {
        assert_eq!(
            sample().extract_code(),
            vec!["import pandas as pd".to_string(), "df.describe()".to_string()]
        );
    }

    #[test]
    fn from_markdown_splits_on_headers() {
        let nb = Notebook::from_markdown("intro\n# First\nbody\n## Second\nmore\n");
        assert_eq!(nb.cells.len(), 3);
        assert_eq!(nb.cells[0].text(), "intro");
        assert!(nb.cells[1].text().starts_with("# First"));
        assert!(nb.cells[2].text().starts_with("## Second"));
    }

    #[test]
    fn from_markdown_without_headers_is_one_cell() {
        let nb = Notebook::from_markdown("just some prose\nacross lines\n");
        assert_eq!(nb.cells.len(), 1);
        assert_eq!(nb.cells[0].kind(), CellKind::Markdown);
    }
}
