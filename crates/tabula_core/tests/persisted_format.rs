use tabula_core::llm_protocol::{CellSpec, NotebookPlan};
use tabula_core::notebook::{CellKind, Notebook};
use tabula_core::store::{load_notebook, save_notebook};
use tabula_core::summary::summarize_csv;

// End-to-end shape of one run, minus the model: summarize a CSV, assemble the
// plan the model would emit for it, persist, and read the file back.
#[test]
fn summary_to_notebook_to_disk_and_back() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("scores.csv");
    fs_err::write(&csv_path, "group,score\na,10\na,12\nb,9\nb,14\n").unwrap();

    let summary = summarize_csv(&csv_path).unwrap();
    assert_eq!(summary.row_count, 4);
    let score = summary.numeric.iter().find(|c| c.name == "score").unwrap();
    assert!((score.mean - 11.25).abs() < 1e-12);

    let plan = NotebookPlan {
        title: Some("Score analysis".into()),
        cells: vec![
            CellSpec { cell_type: CellKind::Markdown, source: "# Score analysis".into() },
            CellSpec {
                cell_type: CellKind::Code,
                source: "import os\nimport pandas as pd\ndf = pd.read_csv(os.path.join('../data', 'scores.csv'))\ndf.describe()".into(),
            },
            CellSpec {
                cell_type: CellKind::Markdown,
                source: "## Two-sample t-test\nCompare mean scores between groups at significance level 0.05.".into(),
            },
            CellSpec {
                cell_type: CellKind::Code,
                source: "from scipy import stats\na = df[df.group == 'a'].score\nb = df[df.group == 'b'].score\nstats.ttest_ind(a, b, equal_var=False)".into(),
            },
        ],
    };

    let notebook = Notebook::from_plan(&plan);
    let dest = dir.path().join("dest");
    let path = save_notebook(&dest, &notebook).unwrap();

    let restored = load_notebook(&path).unwrap();
    assert_eq!(restored, notebook);
    assert_eq!(restored.cells.len(), 4);
    assert_eq!(restored.extract_code().len(), 2);

    // A second run in the same tick lands beside it, never over it.
    let second = save_notebook(&dest, &notebook).unwrap();
    assert_ne!(second, path);
}
