//! Trace - the recorded replay held fully in memory.
//!
//! A replay directory looks like this:
//!
//! ```text
//! replay/
//!   static.json   { "steps": 750, ...opaque metadata... }
//!   0.json        { "0": {...}, "1": {...}, ..., "4": {...} }
//!   5.json        { "5": {...}, ..., "9": {...} }
//!   ...
//! ```
//!
//! Steps are grouped into batch files named after their first step index.
//! The batch size is a property of the recording (5 by default); after
//! loading, the grouping is gone and every step is one index away.

use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// State of a single step, forwarded verbatim to viewers.
pub type StepState = Value;

/// Name of the metadata document inside a replay directory.
pub const STATIC_FILE: &str = "static.json";

/// Steps per batch file in recordings produced by the contest server.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Errors raised while loading a trace. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("Step {step} missing from {path}")]
    MissingStep { step: usize, path: PathBuf },

    #[error("Step {step} does not belong in {path}")]
    MisplacedStep { step: usize, path: PathBuf },

    #[error("Trace declares {declared} steps but contains {actual}")]
    StepCountMismatch { declared: usize, actual: usize },
}

/// Immutable description of the whole trace.
///
/// Only `steps` is interpreted; every other field is passed through to
/// viewers untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticMetadata {
    document: Value,
    total_steps: usize,
}

impl StaticMetadata {
    /// Validates a metadata document and extracts its step count.
    pub fn from_value(document: Value) -> Result<Self, LoadError> {
        let object = document
            .as_object()
            .ok_or_else(|| LoadError::InvalidMetadata("metadata is not a JSON object".into()))?;

        let declared = object
            .get("steps")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                LoadError::InvalidMetadata("`steps` must be a non-negative integer".into())
            })?;
        let total_steps = usize::try_from(declared).map_err(|_| {
            LoadError::InvalidMetadata(format!("`steps` too large: {}", declared))
        })?;

        if total_steps == 0 {
            return Err(LoadError::InvalidMetadata("trace has no steps".into()));
        }

        Ok(Self {
            document,
            total_steps,
        })
    }

    /// Declared number of steps.
    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// The full document as sent to viewers.
    pub fn as_value(&self) -> &Value {
        &self.document
    }
}

/// A fully loaded replay.
#[derive(Debug, Clone)]
pub struct Trace {
    metadata: StaticMetadata,
    steps: Vec<StepState>,
}

impl Trace {
    /// Builds a trace, rejecting step sequences that disagree with the
    /// declared step count.
    pub fn new(metadata: StaticMetadata, steps: Vec<StepState>) -> Result<Self, LoadError> {
        if steps.len() != metadata.total_steps() {
            return Err(LoadError::StepCountMismatch {
                declared: metadata.total_steps(),
                actual: steps.len(),
            });
        }
        Ok(Self { metadata, steps })
    }

    pub fn metadata(&self) -> &StaticMetadata {
        &self.metadata
    }

    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    /// Index of the terminal step.
    pub fn last_step(&self) -> usize {
        self.steps.len() - 1
    }

    /// State at `index`, or `None` past the end.
    pub fn step(&self, index: usize) -> Option<&StepState> {
        self.steps.get(index)
    }
}

/// Source of a complete trace.
pub trait TraceStore {
    fn load(&self) -> Result<Trace, LoadError>;
}

/// Loads a replay directory laid out in batch files.
#[derive(Debug, Clone)]
pub struct DirTraceStore {
    root: PathBuf,
    batch_size: usize,
}

impl DirTraceStore {
    /// Creates a store rooted at a replay directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Sets the number of steps per batch file.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_json(path: &Path) -> Result<Value, LoadError> {
        let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| LoadError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Fails if a batch file exists past the declared end of the trace.
    fn check_no_trailing_batch(&self, total_steps: usize) -> Result<(), LoadError> {
        let next_start = total_steps.div_ceil(self.batch_size) * self.batch_size;
        let path = self.root.join(format!("{}.json", next_start));
        if !path.exists() {
            return Ok(());
        }

        let actual = match Self::read_json(&path)? {
            Value::Object(group) => highest_step(&group).map_or(next_start, |h| h.max(next_start)),
            _ => next_start,
        } + 1;
        Err(LoadError::StepCountMismatch {
            declared: total_steps,
            actual,
        })
    }

    fn read_batch(&self, first_step: usize, total_steps: usize) -> Result<(PathBuf, Map<String, Value>), LoadError> {
        let path = self.root.join(format!("{}.json", first_step));
        let group = match Self::read_json(&path)? {
            Value::Object(group) => group,
            _ => {
                return Err(LoadError::InvalidMetadata(format!(
                    "{} is not a JSON object",
                    path.display()
                )))
            }
        };

        // A step beyond the declared count means the recording is longer
        // than its metadata claims; refuse rather than truncate.
        if let Some(highest) = highest_step(&group) {
            if highest >= total_steps {
                return Err(LoadError::StepCountMismatch {
                    declared: total_steps,
                    actual: highest + 1,
                });
            }
        }

        let batch = first_step..first_step + self.batch_size;
        if let Some(step) = group
            .keys()
            .filter_map(|key| key.parse::<usize>().ok())
            .find(|step| !batch.contains(step))
        {
            return Err(LoadError::MisplacedStep { step, path });
        }

        Ok((path, group))
    }
}

impl TraceStore for DirTraceStore {
    fn load(&self) -> Result<Trace, LoadError> {
        if self.batch_size == 0 {
            return Err(LoadError::InvalidMetadata("batch size must be at least 1".into()));
        }

        let metadata = StaticMetadata::from_value(Self::read_json(&self.root.join(STATIC_FILE))?)?;
        let total_steps = metadata.total_steps();

        // Not pre-sized: the declared count is untrusted until every batch is read
        let mut steps = Vec::new();
        let mut batch: Option<(PathBuf, Map<String, Value>)> = None;

        for step in 0..total_steps {
            if step % self.batch_size == 0 {
                batch = Some(self.read_batch(step, total_steps)?);
            }
            let (path, group) = batch
                .as_mut()
                .ok_or_else(|| LoadError::InvalidMetadata("no batch loaded".into()))?;
            let state = group
                .remove(&step.to_string())
                .ok_or_else(|| LoadError::MissingStep {
                    step,
                    path: path.clone(),
                })?;
            steps.push(state);
        }
        self.check_no_trailing_batch(total_steps)?;

        tracing::debug!(
            "Loaded {} steps from {} (batch size {})",
            steps.len(),
            self.root.display(),
            self.batch_size
        );

        Trace::new(metadata, steps)
    }
}

fn highest_step(group: &Map<String, Value>) -> Option<usize> {
    group
        .keys()
        .filter_map(|key| key.parse::<usize>().ok())
        .max()
}

/// Loads the replay directory at `path` with the default batch layout.
pub fn load_trace(path: impl AsRef<Path>) -> Result<Trace, LoadError> {
    DirTraceStore::new(path.as_ref()).load()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    /// Temporary replay directory, removed on drop.
    pub(crate) struct ReplayDir {
        pub path: PathBuf,
    }

    impl ReplayDir {
        pub fn new() -> Self {
            let path = std::env::temp_dir().join(format!("livecast-{}", uuid::Uuid::new_v4()));
            fs::create_dir_all(&path).unwrap();
            Self { path }
        }

        pub fn write(&self, name: &str, value: &Value) {
            fs::write(self.path.join(name), serde_json::to_string(value).unwrap()).unwrap();
        }

        /// Writes a well-formed recording with `steps` steps.
        pub fn record(steps: usize, batch_size: usize) -> Self {
            let dir = Self::new();
            dir.write(STATIC_FILE, &json!({"steps": steps, "sim": "test"}));
            for first in (0..steps).step_by(batch_size) {
                let mut group = Map::new();
                for step in first..(first + batch_size).min(steps) {
                    group.insert(step.to_string(), json!({"step": step}));
                }
                dir.write(&format!("{}.json", first), &Value::Object(group));
            }
            dir
        }
    }

    impl Drop for ReplayDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    /// In-memory trace whose step `i` is `{"step": i}`.
    pub(crate) fn sample_trace(steps: usize) -> Trace {
        let metadata = StaticMetadata::from_value(json!({"steps": steps, "teams": ["A", "B"]})).unwrap();
        let states = (0..steps).map(|i| json!({"step": i})).collect();
        Trace::new(metadata, states).unwrap()
    }

    #[test]
    fn test_load_batched_recording() {
        let dir = ReplayDir::record(12, 5);
        let trace = load_trace(&dir.path).unwrap();

        assert_eq!(trace.total_steps(), 12);
        assert_eq!(trace.last_step(), 11);
        assert_eq!(trace.metadata().as_value()["sim"], "test");
        assert_eq!(trace.step(7), Some(&json!({"step": 7})));
        assert_eq!(trace.step(12), None);
    }

    #[test]
    fn test_custom_batch_size() {
        let dir = ReplayDir::record(7, 3);
        let trace = DirTraceStore::new(&dir.path).with_batch_size(3).load().unwrap();
        assert_eq!(trace.step(6), Some(&json!({"step": 6})));
    }

    #[test]
    fn test_missing_static_file() {
        let dir = ReplayDir::new();
        assert!(matches!(load_trace(&dir.path), Err(LoadError::Io { .. })));
    }

    #[test]
    fn test_malformed_static_file() {
        let dir = ReplayDir::new();
        fs::write(dir.path.join(STATIC_FILE), "{ not json").unwrap();
        assert!(matches!(load_trace(&dir.path), Err(LoadError::Json { .. })));
    }

    #[test]
    fn test_metadata_requires_step_count() {
        assert!(matches!(
            StaticMetadata::from_value(json!({"name": "x"})),
            Err(LoadError::InvalidMetadata(_))
        ));
        assert!(matches!(
            StaticMetadata::from_value(json!({"steps": -3})),
            Err(LoadError::InvalidMetadata(_))
        ));
        assert!(matches!(
            StaticMetadata::from_value(json!({"steps": 0})),
            Err(LoadError::InvalidMetadata(_))
        ));
        assert!(matches!(
            StaticMetadata::from_value(json!([1, 2])),
            Err(LoadError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn test_missing_batch_file() {
        let dir = ReplayDir::record(10, 5);
        fs::remove_file(dir.path.join("5.json")).unwrap();
        assert!(matches!(load_trace(&dir.path), Err(LoadError::Io { .. })));
    }

    #[test]
    fn test_missing_step_in_batch() {
        let dir = ReplayDir::record(10, 5);
        dir.write("5.json", &json!({"5": {}, "6": {}, "8": {}, "9": {}}));

        match load_trace(&dir.path) {
            Err(LoadError::MissingStep { step, .. }) => assert_eq!(step, 7),
            other => panic!("expected MissingStep, got {:?}", other),
        }
    }

    #[test]
    fn test_declared_count_shorter_than_recording() {
        let dir = ReplayDir::record(10, 5);
        // Claim 8 steps while the last batch still holds 8 and 9
        dir.write(STATIC_FILE, &json!({"steps": 8}));

        match load_trace(&dir.path) {
            Err(LoadError::StepCountMismatch { declared, actual }) => {
                assert_eq!(declared, 8);
                assert_eq!(actual, 10);
            }
            other => panic!("expected StepCountMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_declared_count_on_batch_boundary_shorter_than_recording() {
        // 10.json holds steps 10 and 11 but the loader never needs it
        let dir = ReplayDir::record(12, 5);
        dir.write(STATIC_FILE, &json!({"steps": 10}));

        match load_trace(&dir.path) {
            Err(LoadError::StepCountMismatch { declared, actual }) => {
                assert_eq!(declared, 10);
                assert_eq!(actual, 12);
            }
            other => panic!("expected StepCountMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_huge_declared_count_is_an_error() {
        let dir = ReplayDir::record(3, 5);
        dir.write(STATIC_FILE, &json!({"steps": u64::MAX}));

        // Must fail on the recording itself, not by allocating for the claimed count
        assert!(matches!(
            load_trace(&dir.path),
            Err(LoadError::MissingStep { step: 3, .. }) | Err(LoadError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn test_step_in_wrong_batch_rejected() {
        let dir = ReplayDir::record(10, 5);
        dir.write("5.json", &json!({"3": {}, "5": {}, "6": {}, "7": {}, "8": {}, "9": {}}));

        match load_trace(&dir.path) {
            Err(LoadError::MisplacedStep { step, path }) => {
                assert_eq!(step, 3);
                assert!(path.ends_with("5.json"));
            }
            other => panic!("expected MisplacedStep, got {:?}", other),
        }
    }

    #[test]
    fn test_declared_count_longer_than_recording() {
        let dir = ReplayDir::record(10, 5);
        dir.write(STATIC_FILE, &json!({"steps": 12}));
        // 10.json does not exist
        assert!(matches!(load_trace(&dir.path), Err(LoadError::Io { .. })));
    }

    #[test]
    fn test_trace_new_rejects_length_mismatch() {
        let metadata = StaticMetadata::from_value(json!({"steps": 3})).unwrap();
        let err = Trace::new(metadata, vec![json!(0), json!(1)]).unwrap_err();
        assert!(matches!(err, LoadError::StepCountMismatch { declared: 3, actual: 2 }));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let dir = ReplayDir::record(3, 5);
        let result = DirTraceStore::new(&dir.path).with_batch_size(0).load();
        assert!(matches!(result, Err(LoadError::InvalidMetadata(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_loaded_length_matches_declared(steps in 1usize..40, batch in 1usize..8) {
            let dir = ReplayDir::record(steps, batch);
            let trace = DirTraceStore::new(&dir.path).with_batch_size(batch).load().unwrap();
            let last = json!({"step": steps - 1});
            prop_assert_eq!(trace.total_steps(), steps);
            prop_assert_eq!(trace.step(steps - 1), Some(&last));
        }
    }
}
