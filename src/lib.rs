//! # Coinfinder ML
//!
//! Text classification for a numismatic catalog.
//!
//! A JSON catalog of coin entries is flattened into records, each record is
//! rendered as a canonical text, the texts are embedded (dense transformer
//! encoder or TF-IDF), and a classifier is trained to predict a record's
//! label (its denomination). The trained model is served by a CLI and an
//! HTTP service that accept either a catalog id or free text.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌───────────┐   ┌────────────┐
//! │  Corpus  │──▶│ Canonical │──▶│ Embedding │──▶│ Classifier │
//! │  (JSON)  │   │   text    │   │  backend  │   │  training  │
//! └──────────┘   └───────────┘   └─────┬─────┘   └─────┬──────┘
//!                                      │ artifacts     │
//!                                      ▼               ▼
//!                                ┌──────────────────────────┐
//!                                │  Predictor (CLI / HTTP)  │
//!                                └──────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cfml embed --dataset ml_pipeline/dataset.json --backend lexical
//! cfml train
//! cfml predict --text "2 euro Italia"
//! cfml serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed errors |
//! | [`models`] | Core data types |
//! | [`corpus`] | Corpus loading and shape resolution |
//! | [`canonical`] | Canonical text, id and label derivation |
//! | [`embedding`] | Embedding backends and their artifacts |
//! | [`artifacts`] | Embedding table and labels file |
//! | [`split`] | Deterministic train/test split |
//! | [`classifier`] | Trainable classifier seam and logistic regression |
//! | [`metrics`] | Per-class evaluation report |
//! | [`embed_cmd`] | `embed` command |
//! | [`train`] | `train` command and full pipeline |
//! | [`predict`] | Predictor and `predict` command |
//! | [`server`] | HTTP prediction service |

pub mod artifacts;
pub mod canonical;
pub mod classifier;
pub mod config;
pub mod corpus;
pub mod embed_cmd;
pub mod embedding;
pub mod error;
pub mod metrics;
pub mod models;
pub mod predict;
pub mod server;
pub mod split;
pub mod train;
