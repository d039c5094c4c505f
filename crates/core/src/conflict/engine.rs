//! The resolution engine: applies one resolution to a set of conflicts,
//! pass after pass, until nothing more can be resolved.
//!
//! Conflicts are processed parents first. When a folder conflict is resolved
//! in a way that moves the folder, conflicts below it are deferred to the
//! next pass, which works from a fresh query so their paths are current.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::conflict::model::Conflict;
use crate::conflict::request::ResolveRequest;
use crate::errors::{CoreError, ResolveError};
use crate::models::{CommandStatus, ItemSpec};

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Where conflicts live and how a single one is resolved.
pub trait ConflictStore {
    /// Outstanding conflicts matching `filters` (all when empty), parents
    /// before children.
    fn query_conflicts(&self, filters: &[ItemSpec]) -> Result<Vec<Conflict>, CoreError>;

    /// Resolve one conflict using its `resolution` and `options`. Returns the
    /// ids of every conflict this settled, which may include related ones.
    fn resolve_conflict(&mut self, conflict: &Conflict) -> Result<Vec<i64>, ResolveError>;
}

/// Why a conflict was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The requested resolution does not apply to this kind of conflict.
    NotApplicable,
    /// A folder above it moved during this pass.
    Deferred,
}

/// Progress callbacks. All methods default to doing nothing.
pub trait ResolveObserver {
    fn conflict_resolved(&mut self, _conflict: &Conflict, _resolved_ids: &[i64]) {}
    fn conflict_failed(&mut self, _conflict: &Conflict, _message: &str) {}
    fn conflict_skipped(&mut self, _conflict: &Conflict, _reason: SkipReason) {}
    fn pass_completed(&mut self, _pass: usize, _resolved: usize) {}
}

impl ResolveObserver for () {}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ResolveFailure {
    pub conflict_id: i64,
    pub path: String,
    pub message: String,
}

/// What a resolve run did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolveSummary {
    pub passes: usize,
    /// Ids of resolved conflicts, in resolution order.
    pub resolved: Vec<i64>,
    /// Ids skipped because the resolution does not apply to them.
    pub skipped: Vec<i64>,
    /// Number of times a conflict was pushed to a later pass.
    pub deferred_total: usize,
    pub failures: Vec<ResolveFailure>,
    /// Conflicts still outstanding that did not fail outright.
    pub remaining: Vec<Conflict>,
    pub nothing_to_resolve: bool,
    pub preview: bool,
}

impl ResolveSummary {
    pub fn status(&self) -> CommandStatus {
        if self.nothing_to_resolve {
            return CommandStatus::Unknown;
        }
        CommandStatus::from_outcomes(
            self.resolved.len(),
            self.failures.len() + self.remaining.len(),
        )
    }

    fn record_failure(&mut self, conflict: &Conflict, message: String) -> bool {
        if self.failures.iter().any(|f| f.conflict_id == conflict.id) {
            return false;
        }
        self.failures.push(ResolveFailure {
            conflict_id: conflict.id,
            path: conflict.your_server_item.to_string(),
            message,
        });
        true
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct ResolutionEngine;

impl ResolutionEngine {
    /// Resolve every conflict matching `request`.
    ///
    /// Request errors are returned before the store is touched. A fatal
    /// resolution error aborts the run; recoverable ones are recorded once
    /// per conflict and the run carries on.
    pub fn run<S, O>(
        store: &mut S,
        request: &ResolveRequest,
        observer: &mut O,
    ) -> Result<ResolveSummary, CoreError>
    where
        S: ConflictStore + ?Sized,
        O: ResolveObserver + ?Sized,
    {
        request.validate()?;

        let mut summary = ResolveSummary {
            preview: request.preview,
            ..Default::default()
        };

        let mut conflicts = store.query_conflicts(&request.filters)?;
        if conflicts.is_empty() {
            info!("no conflicts to resolve");
            summary.nothing_to_resolve = true;
            return Ok(summary);
        }
        request.validate_targets(&conflicts)?;

        info!(
            count = conflicts.len(),
            resolution = %request.resolution,
            "resolving conflicts"
        );

        let mut resolved: HashSet<i64> = HashSet::new();
        let mut skipped: HashSet<i64> = HashSet::new();

        loop {
            summary.passes += 1;
            let pass = summary.passes;
            conflicts.sort_by(|a, b| {
                a.depth()
                    .cmp(&b.depth())
                    .then_with(|| a.your_server_item.cmp(&b.your_server_item))
            });

            // Folders moved during this pass; anything below them waits.
            let mut moved_folders = Vec::new();
            let mut candidates = 0usize;
            let mut resolved_this_pass = 0usize;

            for conflict in &conflicts {
                if resolved.contains(&conflict.id) {
                    continue;
                }
                if !request.resolution.applies_to(conflict) {
                    if skipped.insert(conflict.id) {
                        debug!(id = conflict.id, path = %conflict.your_server_item, "resolution does not apply");
                        summary.skipped.push(conflict.id);
                        observer.conflict_skipped(conflict, SkipReason::NotApplicable);
                    }
                    continue;
                }
                candidates += 1;

                if !request.preview && conflict.is_below_any(&moved_folders) {
                    debug!(id = conflict.id, path = %conflict.your_server_item, "deferred to next pass");
                    summary.deferred_total += 1;
                    observer.conflict_skipped(conflict, SkipReason::Deferred);
                    continue;
                }

                if let Err(e) = request.check_compatible(conflict) {
                    let message = e.to_string();
                    if summary.record_failure(conflict, message.clone()) {
                        observer.conflict_failed(conflict, &message);
                    }
                    continue;
                }

                let mut attempt = conflict.clone();
                attempt.resolution = request.resolution;
                attempt.options = request.options.clone();

                let outcome = if request.preview {
                    Ok(vec![attempt.id])
                } else {
                    store.resolve_conflict(&attempt)
                };

                match outcome {
                    Ok(mut ids) => {
                        if !ids.contains(&attempt.id) {
                            ids.push(attempt.id);
                        }
                        for id in &ids {
                            if resolved.insert(*id) {
                                resolved_this_pass += 1;
                                summary.resolved.push(*id);
                            }
                        }
                        if attempt.changes_location() {
                            moved_folders.extend(attempt.paths());
                        }
                        observer.conflict_resolved(&attempt, &ids);
                    }
                    Err(ResolveError::Fatal(e)) => {
                        warn!(id = attempt.id, path = %attempt.your_server_item, error = %e, "aborting resolve");
                        return Err(*e);
                    }
                    Err(ResolveError::Recoverable(message)) => {
                        debug!(id = attempt.id, %message, "resolution failed");
                        if summary.record_failure(&attempt, message.clone()) {
                            observer.conflict_failed(&attempt, &message);
                        }
                    }
                }
            }

            observer.pass_completed(pass, resolved_this_pass);
            debug!(pass, candidates, resolved = resolved_this_pass, "pass complete");

            if request.preview || resolved_this_pass == 0 || resolved_this_pass >= candidates {
                break;
            }

            conflicts = store.query_conflicts(&request.filters)?;
            conflicts.retain(|c| !resolved.contains(&c.id));
            if conflicts.is_empty() {
                break;
            }
        }

        if !request.preview {
            let failed: HashSet<i64> = summary.failures.iter().map(|f| f.conflict_id).collect();
            summary.remaining = store
                .query_conflicts(&request.filters)?
                .into_iter()
                .filter(|c| {
                    !resolved.contains(&c.id)
                        && !failed.contains(&c.id)
                        && request.resolution.applies_to(c)
                })
                .collect();
        }

        info!(
            passes = summary.passes,
            resolved = summary.resolved.len(),
            failed = summary.failures.len(),
            remaining = summary.remaining.len(),
            "resolve finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::conflict::model::{ConflictType, Resolution};
    use crate::errors::ToolError;
    use crate::models::{ChangeType, ItemType, RecursionType};
    use crate::paths::ServerPath;

    fn sp(s: &str) -> ServerPath {
        ServerPath::parse(s).unwrap()
    }

    enum Behaviour {
        Resolve,
        ResolveAlso(Vec<i64>),
        Recoverable,
        Fatal,
    }

    /// A store that resolves conflicts according to a script and, like a real
    /// workspace, rebases conflicts below a folder that gets renamed.
    struct ScriptedStore {
        conflicts: Vec<Conflict>,
        script: HashMap<i64, Behaviour>,
        attempts: Vec<i64>,
    }

    impl ScriptedStore {
        fn new(conflicts: Vec<Conflict>) -> Self {
            Self {
                conflicts,
                script: HashMap::new(),
                attempts: Vec::new(),
            }
        }
    }

    impl ConflictStore for ScriptedStore {
        fn query_conflicts(&self, _filters: &[ItemSpec]) -> Result<Vec<Conflict>, CoreError> {
            Ok(self.conflicts.clone())
        }

        fn resolve_conflict(&mut self, conflict: &Conflict) -> Result<Vec<i64>, ResolveError> {
            self.attempts.push(conflict.id);
            let ids = match self.script.get(&conflict.id).unwrap_or(&Behaviour::Resolve) {
                Behaviour::Resolve => vec![conflict.id],
                Behaviour::ResolveAlso(more) => {
                    let mut ids = vec![conflict.id];
                    ids.extend(more);
                    ids
                }
                Behaviour::Recoverable => return Err(ResolveError::recoverable("tool exited with code 1")),
                Behaviour::Fatal => {
                    return Err(ResolveError::Fatal(Box::new(CoreError::Tool(
                        ToolError::NotConfigured("a.txt".into()),
                    ))))
                }
            };
            if conflict.changes_location() {
                if let Some(target) = conflict.their_target().cloned() {
                    for other in &mut self.conflicts {
                        if let Some(p) = other.your_server_item.rebase(&conflict.your_server_item, &target) {
                            if other.id != conflict.id {
                                other.your_server_item = p;
                            }
                        }
                    }
                }
            }
            self.conflicts.retain(|c| !ids.contains(&c.id));
            Ok(ids)
        }
    }

    #[derive(Default)]
    struct Recorder {
        resolved: Vec<i64>,
        failed: Vec<i64>,
        skipped: Vec<(i64, SkipReason)>,
        passes: Vec<(usize, usize)>,
    }

    impl ResolveObserver for Recorder {
        fn conflict_resolved(&mut self, conflict: &Conflict, _ids: &[i64]) {
            self.resolved.push(conflict.id);
        }
        fn conflict_failed(&mut self, conflict: &Conflict, _message: &str) {
            self.failed.push(conflict.id);
        }
        fn conflict_skipped(&mut self, conflict: &Conflict, reason: SkipReason) {
            self.skipped.push((conflict.id, reason));
        }
        fn pass_completed(&mut self, pass: usize, resolved: usize) {
            self.passes.push((pass, resolved));
        }
    }

    fn content(id: i64, path: &str) -> Conflict {
        let mut c = Conflict::new(ConflictType::Content, ItemType::File, sp(path));
        c.id = id;
        c.your_change = ChangeType::EDIT;
        c.their_change = ChangeType::EDIT;
        c
    }

    fn renamed_folder(id: i64, path: &str, target: &str) -> Conflict {
        let mut c = Conflict::new(ConflictType::Namespace, ItemType::Folder, sp(path));
        c.id = id;
        c.your_change = ChangeType::EDIT;
        c.their_change = ChangeType::RENAME | ChangeType::MERGE;
        c.target_item = Some(sp(target));
        c
    }

    fn all(resolution: Resolution) -> ResolveRequest {
        ResolveRequest::new(Vec::new(), resolution)
    }

    #[test]
    fn test_folder_rename_defers_children_to_second_pass() {
        let a = renamed_folder(1, "$/P/A", "$/P/Moved");
        let b = content(2, "$/P/A/b.txt");
        let c = content(3, "$/P/c.txt");
        let mut store = ScriptedStore::new(vec![b, c, a]);
        let mut recorder = Recorder::default();

        let summary =
            ResolutionEngine::run(&mut store, &all(Resolution::AcceptMerge), &mut recorder).unwrap();

        assert_eq!(summary.passes, 2);
        assert_eq!(summary.resolved.len(), 3);
        assert_eq!(summary.deferred_total, 1);
        assert_eq!(summary.status(), CommandStatus::Success);
        // The folder goes first, the file below it waits for the second pass.
        assert_eq!(store.attempts, vec![1, 3, 2]);
        assert_eq!(recorder.passes, vec![(1, 2), (2, 1)]);
        assert!(recorder.skipped.contains(&(2, SkipReason::Deferred)));
    }

    #[test]
    fn test_empty_conflict_set_is_nothing_to_resolve() {
        let mut store = ScriptedStore::new(Vec::new());
        let summary = ResolutionEngine::run(&mut store, &all(Resolution::AcceptTheirs), &mut ()).unwrap();
        assert!(summary.nothing_to_resolve);
        assert_eq!(summary.passes, 0);
        assert_eq!(summary.status(), CommandStatus::Unknown);
        assert_eq!(summary.status().exit_code(), 0);
    }

    #[test]
    fn test_inapplicable_resolution_is_skipped_not_failed() {
        let mut store = ScriptedStore::new(vec![content(1, "$/P/a.txt")]);
        let mut recorder = Recorder::default();
        let summary =
            ResolutionEngine::run(&mut store, &all(Resolution::OverwriteLocal), &mut recorder).unwrap();
        assert_eq!(summary.skipped, vec![1]);
        assert!(summary.failures.is_empty());
        assert!(summary.remaining.is_empty());
        assert!(store.attempts.is_empty());
        assert_eq!(summary.status(), CommandStatus::Unknown);
    }

    #[test]
    fn test_recoverable_failure_reported_once() {
        let mut store = ScriptedStore::new(vec![content(1, "$/P/a.txt"), content(2, "$/P/b.txt")]);
        store.script.insert(1, Behaviour::Recoverable);
        let mut recorder = Recorder::default();
        let summary =
            ResolutionEngine::run(&mut store, &all(Resolution::AcceptMerge), &mut recorder).unwrap();

        assert_eq!(summary.resolved, vec![2]);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].conflict_id, 1);
        // The failed conflict is not reported a second time as remaining.
        assert!(summary.remaining.is_empty());
        assert_eq!(recorder.failed, vec![1]);
        assert_eq!(summary.status(), CommandStatus::PartialSuccess);
    }

    #[test]
    fn test_fatal_error_aborts_run() {
        let mut store = ScriptedStore::new(vec![content(1, "$/P/a.txt"), content(2, "$/P/b.txt")]);
        store.script.insert(1, Behaviour::Fatal);
        let err = ResolutionEngine::run(&mut store, &all(Resolution::ExternalTool), &mut ()).unwrap_err();
        assert!(matches!(err, CoreError::Tool(ToolError::NotConfigured(_))));
        assert_eq!(store.attempts, vec![1]);
    }

    #[test]
    fn test_cascade_resolves_related_conflicts() {
        let mut store = ScriptedStore::new(vec![content(1, "$/P/a.txt"), content(2, "$/P/a.txt")]);
        store.script.insert(1, Behaviour::ResolveAlso(vec![2]));
        let summary = ResolutionEngine::run(&mut store, &all(Resolution::AcceptTheirs), &mut ()).unwrap();
        assert_eq!(summary.resolved, vec![1, 2]);
        assert_eq!(store.attempts, vec![1]);
        assert_eq!(summary.passes, 1);
    }

    #[test]
    fn test_symlink_incompatibility_fails_before_attempt() {
        let mut link = content(1, "$/P/link");
        link.item_type = ItemType::Symlink;
        let mut store = ScriptedStore::new(vec![link]);
        let summary = ResolutionEngine::run(&mut store, &all(Resolution::AcceptMerge), &mut ()).unwrap();
        assert!(store.attempts.is_empty());
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.status(), CommandStatus::Failure);
    }

    #[test]
    fn test_invalid_request_never_queries() {
        let mut store = ScriptedStore::new(vec![content(1, "$/P/a.txt")]);
        let err = ResolutionEngine::run(&mut store, &all(Resolution::None), &mut ()).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
        assert!(store.attempts.is_empty());
    }

    #[test]
    fn test_new_name_with_many_conflicts_rejected() {
        let mut store = ScriptedStore::new(vec![content(1, "$/P/a.txt"), content(2, "$/P/b.txt")]);
        let mut request = all(Resolution::AcceptMerge);
        request.options.new_path = Some(sp("$/P/z.txt"));
        let err = ResolutionEngine::run(&mut store, &request, &mut ()).unwrap_err();
        assert!(err.to_string().contains("exactly one conflict"));
    }

    #[test]
    fn test_preview_does_not_resolve() {
        let mut store = ScriptedStore::new(vec![content(1, "$/P/a.txt"), content(2, "$/P/b.txt")]);
        let mut request = all(Resolution::AcceptTheirs);
        request.preview = true;
        let summary = ResolutionEngine::run(&mut store, &request, &mut ()).unwrap();
        assert_eq!(summary.resolved, vec![1, 2]);
        assert!(store.attempts.is_empty());
        assert_eq!(store.conflicts.len(), 2);
    }

    #[test]
    fn test_query_is_idempotent() {
        let store = ScriptedStore::new(vec![content(1, "$/P/a.txt"), content(2, "$/P/b.txt")]);
        let filters = vec![ItemSpec::new("$/P", RecursionType::Full)];
        assert_eq!(
            store.query_conflicts(&filters).unwrap(),
            store.query_conflicts(&filters).unwrap()
        );
    }

    #[test]
    fn test_stuck_pass_terminates() {
        let mut store = ScriptedStore::new(vec![content(1, "$/P/a.txt")]);
        store.script.insert(1, Behaviour::Recoverable);
        let summary = ResolutionEngine::run(&mut store, &all(Resolution::AcceptMerge), &mut ()).unwrap();
        assert_eq!(summary.passes, 1);
        assert_eq!(summary.status(), CommandStatus::Failure);
    }
}
