//! Classifier training.
//!
//! Joins the embedding table with the labels file, splits 80/20, fits the
//! classifier on the training rows, reports on the held-out rows, and saves
//! the model artifact.

use anyhow::{bail, Result};
use ndarray::Axis;

use crate::artifacts::{join_labels, read_labels, EmbeddingTable};
use crate::classifier::{LogisticRegression, ModelArtifact, TrainableClassifier};
use crate::config::Config;
use crate::embed_cmd::generate_embeddings;
use crate::metrics::ClassificationReport;
use crate::split::train_test_split;

#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub report: ClassificationReport,
    pub stratified: bool,
    pub train_rows: usize,
    pub test_rows: usize,
    pub classes: usize,
}

/// Embedding table + labels → saved classifier.
pub fn train_classifier(config: &Config) -> Result<TrainOutcome> {
    let table = EmbeddingTable::load(&config.paths.embeddings)?;
    let labels = read_labels(&config.paths.labels)?;
    let y = join_labels(&table.filenames, &labels)?;

    if y.len() < 2 {
        bail!(
            "need at least 2 labelled rows to train, found {}",
            y.len()
        );
    }

    let split = train_test_split(&y, config.training.test_ratio, config.training.seed);
    let x_train = table.embeddings.select(Axis(0), &split.train);
    let x_test = table.embeddings.select(Axis(0), &split.test);
    let y_train: Vec<String> = split.train.iter().map(|&i| y[i].clone()).collect();
    let y_test: Vec<String> = split.test.iter().map(|&i| y[i].clone()).collect();

    let mut clf = LogisticRegression::new(&config.training);
    clf.fit(x_train.view(), &y_train)?;

    let predicted = clf.predict(x_test.view());
    let report = ClassificationReport::new(&y_test, &predicted);
    let classes = clf.classes().len();

    ModelArtifact::new(clf, table.backend.clone()).save(&config.paths.model)?;
    tracing::info!(
        path = %config.paths.model.display(),
        train = split.train.len(),
        test = split.test.len(),
        stratified = split.stratified,
        "saved model"
    );

    Ok(TrainOutcome {
        report,
        stratified: split.stratified,
        train_rows: split.train.len(),
        test_rows: split.test.len(),
        classes,
    })
}

/// Corpus all the way to a saved classifier.
pub fn run_pipeline(config: &Config) -> Result<TrainOutcome> {
    generate_embeddings(config)?;
    train_classifier(config)
}

/// CLI entry point for `cfml train`.
pub async fn run_train(config: &Config) -> Result<()> {
    let owned = config.clone();
    let outcome = tokio::task::spawn_blocking(move || train_classifier(&owned)).await??;

    println!("train");
    println!(
        "  rows: {} train / {} held out ({} split)",
        outcome.train_rows,
        outcome.test_rows,
        if outcome.stratified { "stratified" } else { "random" }
    );
    println!("  classes: {}", outcome.classes);
    println!();
    print!("{}", outcome.report);
    println!();
    println!("Saved model -> {}", config.paths.model.display());
    Ok(())
}
