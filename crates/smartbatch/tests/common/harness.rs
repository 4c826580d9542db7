//! Isolated environment for engine-level tests.
//!
//! Every harness owns a temp directory with an `output/` artifact root and
//! a `config/` directory for settings files. Engines built from it write
//! artifacts under `output/` and, when asked, keep jobs in `jobs.db`.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use smartbatch::db::Database;
use smartbatch::{
    Authorizer, Engine, EngineBuilder, FileArtifactStore, GenerationId, JobStatusSnapshot,
    TemplateRenderer,
};

pub struct TestHarness {
    temp_dir: TempDir,
    pub output_dir: PathBuf,
    pub config_dir: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let output_dir = temp_dir.path().join("output");
        let config_dir = temp_dir.path().join("config");
        std::fs::create_dir_all(&output_dir).expect("Failed to create output dir");
        std::fs::create_dir_all(&config_dir).expect("Failed to create config dir");

        Self {
            temp_dir,
            output_dir,
            config_dir,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn db_path(&self) -> PathBuf {
        self.temp_dir.path().join("jobs.db")
    }

    pub fn builder(&self) -> EngineBuilder {
        Engine::builder(Arc::new(FileArtifactStore::new(&self.output_dir)))
    }

    /// In-memory job store, placeholder renderer, no authorization.
    pub fn engine(&self) -> Engine {
        self.builder().build()
    }

    pub fn engine_with_renderer(&self, renderer: Arc<dyn TemplateRenderer>) -> Engine {
        self.builder().renderer(renderer).build()
    }

    pub fn engine_with_authorizer(&self, authorizer: Arc<dyn Authorizer>) -> Engine {
        self.builder().authorizer(authorizer).build()
    }

    /// Engine persisting to this harness's `jobs.db`. Several engines built
    /// this way share the same job history.
    pub fn engine_with_db(&self) -> Engine {
        let db = Database::open(&self.db_path()).expect("Failed to open test database");
        self.builder().database(db).build()
    }

    pub fn write_config_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.config_dir.join(name);
        std::fs::write(&path, content).expect("Failed to write config file");
        path
    }

    /// Reads a stored document as text.
    pub fn read_document(&self, location: &str) -> String {
        std::fs::read_to_string(self.output_dir.join(location))
            .expect("Failed to read stored document")
    }

    /// Text of document `index` of a finished job.
    pub fn document_text(&self, snapshot: &JobStatusSnapshot, index: usize) -> String {
        let artifact = snapshot
            .task(index)
            .and_then(|t| t.artifact())
            .unwrap_or_else(|| panic!("document {} has no artifact", index));
        self.read_document(&artifact.location)
    }

    pub fn job_dir(&self, id: &GenerationId) -> PathBuf {
        self.output_dir.join(id.as_str())
    }
}
