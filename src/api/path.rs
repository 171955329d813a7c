//! Purpose: Wait for a filesystem path to appear or disappear.
//! Exports: `PathCondition`, `PathWait`, `path_predicate`, `wait_for_path`, `watch_dir_for`.
//! Role: The two concrete engine uses; existence polling plus a parent-directory watch.
//! Invariants: Existence is always decided by the predicate; the watch only shortens latency.
//! Invariants: A missing or unwatchable parent directory degrades to timeout re-checks.
use std::path::{Path, PathBuf};

use crate::core::broadcast::Broadcaster;
use crate::core::error::{Error, ErrorKind};
use crate::core::event::EventWait;
use crate::core::notify::DirWatch;
use crate::core::plan::TimePlan;
use crate::core::polling::PollingWait;
use crate::core::state::{Predicate, WaitOutcome};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PathCondition {
    Exists,
    Missing,
}

impl PathCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathCondition::Exists => "exists",
            PathCondition::Missing => "missing",
        }
    }
}

/// Predicate that holds when `path` matches `condition`.
///
/// Symlinks are followed, so a dangling link counts as missing.
pub fn path_predicate(path: PathBuf, condition: PathCondition) -> impl Predicate {
    move || -> Result<bool, Error> {
        let exists = path.try_exists().map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to check path existence")
                .with_path(&path)
                .with_source(err)
        })?;
        Ok(match condition {
            PathCondition::Exists => exists,
            PathCondition::Missing => !exists,
        })
    }
}

/// Directory whose entries change when `path` is created or removed.
pub fn watch_dir_for(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => PathBuf::from("."),
        Some(parent) => parent.to_path_buf(),
        None => path.to_path_buf(),
    }
}

enum Engine {
    Event(EventWait),
    Polling(PollingWait),
}

/// A wait on one path, backed by either engine.
pub struct PathWait {
    path: PathBuf,
    condition: PathCondition,
    engine: Engine,
}

impl PathWait {
    /// Event-driven wait using a watch on the path's parent directory.
    pub fn new(path: impl Into<PathBuf>, condition: PathCondition) -> Self {
        let path = path.into();
        let engine = EventWait::new()
            .with_source(DirWatch::new(watch_dir_for(&path)))
            .with_predicate(path_predicate(path.clone(), condition));
        Self {
            path,
            condition,
            engine: Engine::Event(engine),
        }
    }

    /// Pure adaptive polling; no directory watch.
    pub fn polling(path: impl Into<PathBuf>, condition: PathCondition) -> Self {
        let path = path.into();
        let engine = PollingWait::new().with_predicate(path_predicate(path.clone(), condition));
        Self {
            path,
            condition,
            engine: Engine::Polling(engine),
        }
    }

    pub fn with_plan(self, plan: TimePlan) -> Self {
        let engine = match self.engine {
            Engine::Event(engine) => Engine::Event(engine.with_plan(plan)),
            Engine::Polling(engine) => Engine::Polling(engine.with_plan(plan)),
        };
        Self { engine, ..self }
    }

    /// Use a private broadcaster instead of the process-wide one. Ignored when polling.
    pub fn with_broadcaster(self, broadcaster: Broadcaster) -> Self {
        let engine = match self.engine {
            Engine::Event(engine) => Engine::Event(engine.with_broadcaster(broadcaster)),
            polling => polling,
        };
        Self { engine, ..self }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn condition(&self) -> PathCondition {
        self.condition
    }

    pub fn is_event_driven(&self) -> bool {
        matches!(self.engine, Engine::Event(_))
    }

    pub fn wait(&self) -> Result<(), Error> {
        self.wait_outcome().map(|_| ())
    }

    pub fn wait_outcome(&self) -> Result<WaitOutcome, Error> {
        match &self.engine {
            Engine::Event(engine) => engine.wait_outcome(),
            Engine::Polling(engine) => engine.wait_outcome(),
        }
    }

    pub fn cancel_one(&self) -> Result<(), Error> {
        match &self.engine {
            Engine::Event(engine) => engine.cancel_one(),
            Engine::Polling(engine) => engine.cancel_one(),
        }
    }

    pub fn cancel_all(&self) -> Result<(), Error> {
        match &self.engine {
            Engine::Event(engine) => engine.cancel_all(),
            Engine::Polling(engine) => engine.cancel_all(),
        }
    }

    pub fn waiting(&self) -> Result<usize, Error> {
        match &self.engine {
            Engine::Event(engine) => engine.waiting(),
            Engine::Polling(engine) => engine.waiting(),
        }
    }

    pub fn plan(&self) -> Result<TimePlan, Error> {
        match &self.engine {
            Engine::Event(engine) => engine.plan(),
            Engine::Polling(engine) => engine.plan(),
        }
    }

    pub fn set_plan(&self, plan: TimePlan) -> Result<(), Error> {
        match &self.engine {
            Engine::Event(engine) => engine.set_plan(plan),
            Engine::Polling(engine) => engine.set_plan(plan),
        }
    }
}

/// Block until `path` matches `condition`, using the event-driven engine.
pub fn wait_for_path(
    path: impl Into<PathBuf>,
    condition: PathCondition,
    plan: TimePlan,
) -> Result<WaitOutcome, Error> {
    PathWait::new(path, condition).with_plan(plan).wait_outcome()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_dir_uses_parent_or_current_dir() {
        assert_eq!(watch_dir_for(Path::new("/tmp/flag")), PathBuf::from("/tmp"));
        assert_eq!(watch_dir_for(Path::new("flag")), PathBuf::from("."));
        assert_eq!(watch_dir_for(Path::new("/")), PathBuf::from("/"));
    }

    #[test]
    fn predicate_tracks_existence() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("flag");
        let mut exists = path_predicate(path.clone(), PathCondition::Exists);
        let mut missing = path_predicate(path.clone(), PathCondition::Missing);
        assert!(!exists.check().expect("check"));
        assert!(missing.check().expect("check"));

        std::fs::write(&path, b"1").expect("write");
        assert!(exists.check().expect("check"));
        assert!(!missing.check().expect("check"));
    }

    #[test]
    fn condition_labels_are_stable() {
        assert_eq!(PathCondition::Exists.as_str(), "exists");
        assert_eq!(PathCondition::Missing.as_str(), "missing");
    }

    #[test]
    fn builders_keep_engine_kind() {
        let plan = TimePlan::from_millis(2, 20, 0.1, false).expect("plan");
        let wait = PathWait::new("flag", PathCondition::Exists)
            .with_broadcaster(Broadcaster::new())
            .with_plan(plan);
        assert!(wait.is_event_driven());
        assert_eq!(wait.plan().expect("plan"), plan);
        assert_eq!(wait.condition(), PathCondition::Exists);
        assert_eq!(wait.path(), Path::new("flag"));

        let wait = PathWait::polling("flag", PathCondition::Missing)
            .with_broadcaster(Broadcaster::new());
        assert!(!wait.is_event_driven());
    }
}
