//! Annotation pipeline tests
//!
//! Index, classify, resolve and merge against real files in a temp directory.

mod helpers;

use cellscore_annotate::classifier::{Classifier, ClassifierError};
use cellscore_annotate::models::Label;
use cellscore_annotate::services::NormalizedImage;
use cellscore_annotate::{AnnotateError, LinearClassifier};
use cellscore_annotate::services::{
    AnnotationDriver, IdentityResolver, ImageNormalizer, SourceIndexer, TableCache,
};
use cellscore_annotate::tables::mat5::{CharArray, MatArray, MatFile, MatVariable, StructArray};
use cellscore_annotate::tables::{CsvTable, StructArrayTable};
use cellscore_common::config::{ActivationConfig, IdStrategy, ResizePolicy, UnclassifiedPolicy};
use helpers::{assert_close, confidence, write_file, write_image, ScriptedClassifier};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const CSV_TEMPLATE: &str = "{source}/Inference/cells.csv";
const MAT_TEMPLATE: &str = "{source}/Inference/cells.mat";

fn driver(sources: &[PathBuf], template: &str, strategy: IdStrategy) -> AnnotationDriver {
    AnnotationDriver::new(
        ImageNormalizer::new(ResizePolicy::PadCenter),
        IdentityResolver::new(sources.to_vec(), template, strategy),
        TableCache::new("fullCellDataMod"),
    )
}

fn csv_table(source: &Path) -> PathBuf {
    source.join("Inference/cells.csv")
}

// =============================================================================
// End-to-end scenarios
// =============================================================================

#[test]
fn test_three_images_one_table() {
    // Given: 2 cells and 1 fake, table with 3 rows and no confidence column
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("pos1");
    write_image(&source, "cells", "cell_1.png");
    write_image(&source, "cells", "cell_2.png");
    write_image(&source, "fakes", "cell_3.png");
    write_file(&csv_table(&source), "cell_id,area\n1,10\n2,20\n3,30\n");

    let sources = vec![source.clone()];
    let index = SourceIndexer::new(UnclassifiedPolicy::Exclude).index(&sources);
    assert_eq!(index.get(0).unwrap().label, Label::Negative);

    // When: logits [2.0, -1.0, 0.5] in ordinal order
    let mut classifier = ScriptedClassifier::new(&[2.0, -1.0, 0.5]);
    let report = driver(&sources, CSV_TEMPLATE, IdStrategy::Direct)
        .run(&index, &mut classifier)
        .unwrap();

    // Then: the fake got 0.881, the two cells got 0.269 and 0.622 in some order
    let table = CsvTable::load(&csv_table(&source)).unwrap();
    assert_close(table.number(2, "confidence").unwrap(), confidence(2.0));
    assert_close(confidence(2.0), 0.880_797);

    let mut cells = vec![
        table.number(0, "confidence").unwrap(),
        table.number(1, "confidence").unwrap(),
    ];
    cells.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_close(cells[0], confidence(-1.0));
    assert_close(cells[1], confidence(0.5));

    // Fake scored positive, one cell scored negative, one cell correct
    let stats = report.stats;
    assert_eq!(stats.processed, 3);
    assert_eq!(stats.correct, 1);
    assert_eq!(stats.false_positives, 1);
    assert_eq!(stats.false_negatives, 1);
    assert_close(stats.accuracy(), 1.0 / 3.0);
    assert_eq!(report.written, vec![csv_table(&source)]);
}

#[test]
fn test_csv_rows_not_annotated_keep_sentinel() {
    // Given: 5-row CSV without confidence, images for rows 1 and 4 only
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("pos1");
    write_image(&source, "cells", "cell_1.png");
    write_image(&source, "cells", "cell_4.png");
    let original = "cell_id,area,label\n1,10.5,a\n2,20,\"b, c\"\n3,30,d\n4,40,e\n5,50,f\n";
    write_file(&csv_table(&source), original);

    let sources = vec![source.clone()];
    let index = SourceIndexer::new(UnclassifiedPolicy::Exclude).index(&sources);
    let mut classifier = ScriptedClassifier::constant(1.0);
    driver(&sources, CSV_TEMPLATE, IdStrategy::Direct)
        .run(&index, &mut classifier)
        .unwrap();

    // Then: 3 rows keep -1, every original column is unchanged
    let before = CsvTable::from_reader(original.as_bytes()).unwrap();
    let after = CsvTable::load(&csv_table(&source)).unwrap();
    assert_eq!(after.headers(), &["cell_id", "area", "label", "confidence"]);
    for row in 0..5 {
        for field in ["cell_id", "area", "label"] {
            assert_eq!(after.value(row, field), before.value(row, field));
        }
    }
    for row in [1, 2, 4] {
        assert_eq!(after.value(row, "confidence"), Some("-1"));
    }
    assert_close(after.number(0, "confidence").unwrap(), confidence(1.0));
    assert_close(after.number(3, "confidence").unwrap(), confidence(1.0));
}

#[test]
fn test_pairing_strategy_locates_cell_id_row() {
    // Given: frame posA_3 is frame 4, so posA_3_7 pairs to (4+7)(4+7+1)/2 + 4 = 70
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("posA");
    write_image(&source, "cells", "posA_3_7.png");
    write_file(
        &source.join("Inference/frames.csv"),
        "frame_id,frame_name\n3,posA_2\n4,posA_3\n",
    );
    write_file(&csv_table(&source), "cell_id,area\n5,1\n70,2\n101,3\n");

    let sources = vec![source.clone()];
    let index = SourceIndexer::new(UnclassifiedPolicy::Exclude).index(&sources);
    let mut classifier = ScriptedClassifier::constant(3.0);
    let report = driver(&sources, CSV_TEMPLATE, IdStrategy::Pairing)
        .run(&index, &mut classifier)
        .unwrap();

    assert_eq!(report.stats.skipped, 0);
    let table = CsvTable::load(&csv_table(&source)).unwrap();
    assert_eq!(table.value(0, "confidence"), Some("-1"));
    assert_close(table.number(1, "confidence").unwrap(), confidence(3.0));
    assert_eq!(table.value(2, "confidence"), Some("-1"));
}

// =============================================================================
// Failure handling
// =============================================================================

#[test]
fn test_failed_records_are_skipped_and_counted() {
    // Given: one good image, one with no matching row, one undecodable file
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("pos1");
    write_image(&source, "cells", "cell_1.png");
    write_image(&source, "cells", "cell_9.png");
    write_file(&source.join("cells/cell_2.png"), "not an image");
    write_file(&csv_table(&source), "cell_id\n1\n2\n3\n");

    let sources = vec![source.clone()];
    let index = SourceIndexer::new(UnclassifiedPolicy::Exclude).index(&sources);
    let mut classifier = ScriptedClassifier::constant(1.0);
    let report = driver(&sources, CSV_TEMPLATE, IdStrategy::Direct)
        .run(&index, &mut classifier)
        .unwrap();

    // Then: the batch completes; the missing row still counts as classified
    assert_eq!(classifier.calls, 2);
    assert_eq!(report.stats.processed, 2);
    assert_eq!(report.stats.skipped, 2);

    let table = CsvTable::load(&csv_table(&source)).unwrap();
    assert_close(table.number(0, "confidence").unwrap(), confidence(1.0));
    assert_eq!(table.value(1, "confidence"), Some("-1"));
    assert_eq!(table.value(2, "confidence"), Some("-1"));
}

#[test]
fn test_missing_table_skips_records_and_writes_nothing() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("pos1");
    write_image(&source, "cells", "cell_1.png");

    let sources = vec![source.clone()];
    let index = SourceIndexer::new(UnclassifiedPolicy::Exclude).index(&sources);
    let mut classifier = ScriptedClassifier::constant(1.0);
    let report = driver(&sources, CSV_TEMPLATE, IdStrategy::Direct)
        .run(&index, &mut classifier)
        .unwrap();

    assert_eq!(report.stats.skipped, 1);
    assert_eq!(report.tables, 0);
    assert!(report.written.is_empty());
    assert!(!csv_table(&source).exists());
}

#[test]
fn test_image_outside_sources_is_skipped() {
    // Given: the index covers a source the resolver does not know
    let temp = TempDir::new().unwrap();
    let indexed = temp.path().join("pos1");
    let configured = temp.path().join("pos2");
    write_image(&indexed, "cells", "cell_1.png");

    let index = SourceIndexer::new(UnclassifiedPolicy::Exclude).index(&[indexed]);
    let mut classifier = ScriptedClassifier::constant(1.0);
    let report = driver(&[configured], CSV_TEMPLATE, IdStrategy::Direct)
        .run(&index, &mut classifier)
        .unwrap();

    assert_eq!(report.stats.processed, 1);
    assert_eq!(report.stats.skipped, 1);
}

/// Replaces `target` with a directory when called for the `block_on`th time
struct BlockingClassifier {
    target: PathBuf,
    block_on: usize,
    calls: usize,
}

impl Classifier for BlockingClassifier {
    fn logit(&mut self, _image: &NormalizedImage) -> Result<f32, ClassifierError> {
        self.calls += 1;
        if self.calls == self.block_on {
            std::fs::remove_file(&self.target).unwrap();
            std::fs::create_dir(&self.target).unwrap();
        }
        Ok(1.0)
    }
}

#[test]
fn test_flush_failure_fails_the_run() {
    // Given: index order pos1 fake, pos2 fake, pos2 cell; pos2's table is
    // loaded by the second image and made unwritable before the third
    let temp = TempDir::new().unwrap();
    let a = temp.path().join("pos1");
    let b = temp.path().join("pos2");
    write_image(&a, "fakes", "cell_1.png");
    write_image(&b, "fakes", "cell_1.png");
    write_image(&b, "cells", "cell_2.png");
    write_file(&csv_table(&a), "cell_id\n1\n");
    write_file(&csv_table(&b), "cell_id\n1\n2\n");

    let sources = vec![a.clone(), b.clone()];
    let index = SourceIndexer::new(UnclassifiedPolicy::Exclude).index(&sources);
    let mut classifier = BlockingClassifier {
        target: csv_table(&b),
        block_on: 3,
        calls: 0,
    };

    let result = driver(&sources, CSV_TEMPLATE, IdStrategy::Direct).run(&index, &mut classifier);

    // Then: the run fails, and pos1's table was written before the failure
    assert_eq!(classifier.calls, 3);
    assert!(matches!(result, Err(AnnotateError::Table(_))));
    let table = CsvTable::load(&csv_table(&a)).unwrap();
    assert_close(table.number(0, "confidence").unwrap(), confidence(1.0));
    assert!(csv_table(&b).is_dir());
}

// =============================================================================
// Run modes and statistics
// =============================================================================

#[test]
fn test_dry_run_leaves_tables_untouched() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("pos1");
    write_image(&source, "cells", "cell_1.png");
    write_file(&csv_table(&source), "cell_id\n1\n");

    let sources = vec![source.clone()];
    let index = SourceIndexer::new(UnclassifiedPolicy::Exclude).index(&sources);
    let mut classifier = ScriptedClassifier::constant(1.0);
    let report = driver(&sources, CSV_TEMPLATE, IdStrategy::Direct)
        .dry_run(true)
        .run(&index, &mut classifier)
        .unwrap();

    assert_eq!(report.tables, 1);
    assert!(report.written.is_empty());
    assert_eq!(report.stats.skipped, 0);
    assert_eq!(std::fs::read_to_string(csv_table(&source)).unwrap(), "cell_id\n1\n");
}

#[test]
fn test_unlabeled_images_count_in_denominator() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("pos1");
    write_image(&source, "cells", "cell_1.png");
    write_image(&source, "unclassified", "cell_2.png");
    write_file(&csv_table(&source), "cell_id\n1\n2\n");

    let sources = vec![source.clone()];
    let index = SourceIndexer::new(UnclassifiedPolicy::Unlabeled).index(&sources);
    assert_eq!(index.get(1).unwrap().label, Label::Unknown);

    let mut classifier = ScriptedClassifier::constant(1.0);
    let report = driver(&sources, CSV_TEMPLATE, IdStrategy::Direct)
        .run(&index, &mut classifier)
        .unwrap();

    let stats = report.stats;
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.labeled, 1);
    assert_eq!(stats.unlabeled, 1);
    assert_eq!(stats.correct, 1);
    assert_close(stats.accuracy(), 0.5);

    // Unlabeled images are still annotated
    let table = CsvTable::load(&csv_table(&source)).unwrap();
    assert_close(table.number(1, "confidence").unwrap(), confidence(1.0));
}

#[test]
fn test_each_source_gets_its_own_table() {
    let temp = TempDir::new().unwrap();
    let a = temp.path().join("pos1");
    let b = temp.path().join("pos2");
    write_image(&a, "cells", "cell_1.png");
    write_image(&a, "fakes", "cell_2.png");
    write_image(&b, "cells", "cell_1.png");
    write_file(&csv_table(&a), "cell_id\n1\n2\n");
    write_file(&csv_table(&b), "cell_id\n1\n");

    let sources = vec![a.clone(), b.clone()];
    let index = SourceIndexer::new(UnclassifiedPolicy::Exclude).index(&sources);
    let mut classifier = ScriptedClassifier::new(&[-2.0, 1.0, 2.0]);
    let report = driver(&sources, CSV_TEMPLATE, IdStrategy::Direct)
        .run(&index, &mut classifier)
        .unwrap();

    assert_eq!(report.tables, 2);
    assert_eq!(report.written.len(), 2);
    assert_eq!(report.stats.correct, 3);

    let a = CsvTable::load(&csv_table(&a)).unwrap();
    assert_close(a.number(1, "confidence").unwrap(), confidence(-2.0));
    let b = CsvTable::load(&csv_table(&b)).unwrap();
    assert_eq!(b.len(), 1);
}

// =============================================================================
// Struct-array tables
// =============================================================================

fn write_mat_table(path: &Path, rows: usize) {
    let records = StructArray {
        dims: vec![1, rows],
        field_names: vec!["area".into(), "name".into()],
        elements: (0..rows)
            .map(|i| {
                vec![
                    MatArray::scalar(10.0 * (i + 1) as f64),
                    MatArray::Char(CharArray::from_text(&format!("cell{}", i + 1))),
                ]
            })
            .collect(),
    };
    let file = MatFile {
        header_text: String::new(),
        variables: vec![
            MatVariable {
                name: "fullCellDataMod".into(),
                array: MatArray::Struct(records),
                global: false,
                compressed: true,
            },
            MatVariable {
                name: "pixelSize".into(),
                array: MatArray::scalar(0.65),
                global: false,
                compressed: false,
            },
        ],
    };
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    file.write(path).unwrap();
}

#[test]
fn test_struct_array_table_end_to_end() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("pos1");
    let table_path = source.join("Inference/cells.mat");
    write_image(&source, "cells", "cell_2.png");
    write_mat_table(&table_path, 3);

    let sources = vec![source.clone()];
    let index = SourceIndexer::new(UnclassifiedPolicy::Exclude).index(&sources);
    let mut classifier = ScriptedClassifier::constant(-0.5);
    let report = driver(&sources, MAT_TEMPLATE, IdStrategy::Direct)
        .run(&index, &mut classifier)
        .unwrap();
    assert_eq!(report.written, vec![table_path.clone()]);

    let table = StructArrayTable::load(&table_path, "fullCellDataMod").unwrap();
    assert_eq!(table.field_names(), vec!["area", "name", "confidence"]);
    assert_eq!(table.number(0, "confidence"), Some(-1.0));
    assert_close(table.number(1, "confidence").unwrap(), confidence(-0.5));
    assert_eq!(table.number(2, "confidence"), Some(-1.0));
    assert_eq!(table.number(1, "area"), Some(20.0));

    // Other variables and the compression flag survive the rewrite
    let file = table.file();
    assert_eq!(file.variables.len(), 2);
    assert!(file.variables[0].compressed);
    assert_eq!(file.variable("pixelSize").unwrap().array.as_f64(), Some(0.65));
}

// =============================================================================
// Configured runs
// =============================================================================

#[test]
fn test_run_from_configuration_with_linear_model() {
    // Given: a work_dir with one labeled source and a bias-only linear model
    let temp = TempDir::new().unwrap();
    let work_dir = temp.path();
    let source = work_dir.join("Labeled/pos1");
    write_image(&source, "fakes", "cell_1.png");
    write_image(&source, "cells", "cell_2.png");
    write_file(&source.join("Inference/cells_2022_07_03.csv"), "cell_id\n1\n2\n");

    let weights = vec![0.0f32; 224 * 224];
    let model = serde_json::json!({ "channels": 1, "weights": weights, "bias": 0.25 });
    write_file(&work_dir.join("models/scorer.json"), &model.to_string());

    let toml = format!(
        r#"
[activation]
work_dir = "{}"
data_sources = ["Labeled/*"]
output_format = "{{source}}/Inference/cells_{{date}}.csv"
model = "models/scorer.json"
stretch_level = 1
flag_unclassified = "exclude"
"#,
        work_dir.display()
    );
    let today = chrono::NaiveDate::from_ymd_opt(2022, 7, 3).unwrap();
    let config = ActivationConfig::from_toml_str(&toml, today).unwrap();
    assert_eq!(config.sources, vec![source.clone()]);

    // When
    let index = SourceIndexer::new(config.unclassified).index(&config.sources);
    let mut classifier = LinearClassifier::load(&config.model_path).unwrap();
    let report = AnnotationDriver::from_config(&config)
        .run(&index, &mut classifier)
        .unwrap();

    // Then: both rows carry logistic(0.25); the fake counts as a false positive
    assert_eq!(report.stats.false_positives, 1);
    assert_eq!(report.stats.correct, 1);
    let table = CsvTable::load(&source.join("Inference/cells_2022_07_03.csv")).unwrap();
    assert_close(table.number(0, "confidence").unwrap(), confidence(0.25));
    assert_close(table.number(1, "confidence").unwrap(), confidence(0.25));
}

#[test]
fn test_default_output_format_uses_mat_file() {
    // Given: no output_format, so tables go to work_dir/Inference/{date}_{models}.mat
    let temp = TempDir::new().unwrap();
    let work_dir = temp.path();
    let source = work_dir.join("Labeled/pos1");
    write_image(&source, "fakes", "cell_1.png");
    write_image(&source, "cells", "cell_2.png");
    let table_path = work_dir.join("Inference/2022_07_03_L.mat");
    write_mat_table(&table_path, 2);

    let toml = format!(
        r#"
[activation]
work_dir = "{}"
data_sources = ["Labeled/*"]
model = "models/scorer.json"
"#,
        work_dir.display()
    );
    let today = chrono::NaiveDate::from_ymd_opt(2022, 7, 3).unwrap();
    let config = ActivationConfig::from_toml_str(&toml, today).unwrap();
    assert_eq!(config.out_path, format!("{}/Inference/2022_07_03_L", work_dir.display()));

    // When
    let index = SourceIndexer::new(config.unclassified).index(&config.sources);
    let mut classifier = ScriptedClassifier::new(&[-1.0, 2.0]);
    let report = AnnotationDriver::from_config(&config)
        .run(&index, &mut classifier)
        .unwrap();

    // Then: both records land in the .mat table next to the extensionless path
    assert_eq!(report.stats.skipped, 0);
    assert_eq!(report.written, vec![table_path.clone()]);
    let table = StructArrayTable::load(&table_path, "fullCellDataMod").unwrap();
    assert_close(table.number(0, "confidence").unwrap(), confidence(-1.0));
    assert_close(table.number(1, "confidence").unwrap(), confidence(2.0));
    assert!(!work_dir.join("Inference/2022_07_03_L").exists());
}
