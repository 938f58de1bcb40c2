use futures::future::{BoxFuture, FutureExt, Shared};
use media_io::VideoRef;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::key::content_signature;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FolderStatus {
    Idle,
    Running,
    Paused,
    Completed,
}

#[derive(Debug, Clone)]
struct FolderState {
    signature: String,
    /// Index of the next video to visit.
    cursor: usize,
    total: usize,
    status: FolderStatus,
}

impl FolderState {
    /// Paused before its first walk got going; any signature will restart it.
    fn paused_before_start() -> Self {
        Self { signature: String::new(), cursor: 0, total: 0, status: FolderStatus::Paused }
    }
}

struct FolderTask {
    id: u64,
    stop: Arc<AtomicBool>,
    done: Shared<BoxFuture<'static, ()>>,
}

type States = Arc<Mutex<HashMap<String, FolderState>>>;
type Tasks = Arc<Mutex<HashMap<String, FolderTask>>>;

/// Drops the task entry of a walk that has ended, unless a newer walk took its place.
struct Retire {
    tasks: Tasks,
    folder_id: String,
    id: u64,
}

impl Drop for Retire {
    fn drop(&mut self) {
        let mut tasks = self.tasks.lock();
        if tasks.get(&self.folder_id).map(|t| t.id) == Some(self.id) {
            tasks.remove(&self.folder_id);
        }
    }
}

/// Background pre-warm of one folder at a time per folder id.
///
/// A walk visits videos strictly in list order, one at a time, and records a cursor after
/// each so a later `start` with the same content signature resumes where it stopped.
/// Stopping is cooperative and only observed between videos. Walks run on the runtime
/// behind `handle`, so they can be started from threads that have no runtime of their own.
pub struct FolderScheduler {
    states: States,
    tasks: Tasks,
    seq: AtomicU64,
    handle: Handle,
}

impl FolderScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { states: Default::default(), tasks: Default::default(), seq: AtomicU64::new(0), handle }
    }

    /// Begin or resume a walk. Any walk already running for `folder_id` is stopped and
    /// awaited before this one reads the cursor.
    pub fn start<F, Fut>(&self, folder_id: &str, videos: Vec<VideoRef>, width: u32, height: u32, visit: F)
    where
        F: Fn(VideoRef) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let signature = content_signature(&videos, width, height);
        let stop = Arc::new(AtomicBool::new(false));
        let mut tasks = self.tasks.lock();
        let previous = tasks.remove(folder_id).map(|t| {
            t.stop.store(true, Ordering::SeqCst);
            t.done
        });

        let id = self.seq.fetch_add(1, Ordering::Relaxed);
        let retire = Retire { tasks: self.tasks.clone(), folder_id: folder_id.to_string(), id };
        let walk = Walk { folder_id: folder_id.to_string(), signature, states: self.states.clone(), stop: stop.clone() };
        let handle = self.handle.spawn(async move {
            let _retire = retire;
            if let Some(prev) = previous {
                prev.await;
            }
            walk.run(videos, visit).await;
        });
        let done = handle.map(|_| ()).boxed().shared();
        tasks.insert(folder_id.to_string(), FolderTask { id, stop, done });
    }

    /// Stop after the current video. The cursor is kept.
    pub fn pause(&self, folder_id: &str) {
        let Some(stop) = self.tasks.lock().get(folder_id).map(|t| t.stop.clone()) else { return };
        stop.store(true, Ordering::SeqCst);
        let mut states = self.states.lock();
        match states.get_mut(folder_id) {
            Some(state) if state.status == FolderStatus::Running => {
                state.status = FolderStatus::Paused;
                info!(folder = folder_id, cursor = state.cursor, "folder thumbnails paused");
            }
            Some(_) => {}
            None => {
                states.insert(folder_id.to_string(), FolderState::paused_before_start());
                info!(folder = folder_id, "folder thumbnails paused before starting");
            }
        }
    }

    /// Stop every walk and forget every cursor.
    pub fn cancel_all(&self) {
        // handles stay registered until their walk ends so a later start still waits for it
        for task in self.tasks.lock().values() {
            task.stop.store(true, Ordering::SeqCst);
        }
        self.states.lock().clear();
    }

    pub fn status(&self, folder_id: &str) -> FolderStatus {
        self.states.lock().get(folder_id).map(|s| s.status).unwrap_or(FolderStatus::Idle)
    }

    pub fn cursor(&self, folder_id: &str) -> Option<usize> {
        self.states.lock().get(folder_id).map(|s| s.cursor)
    }

    /// Folders with a walk that has not ended yet.
    pub fn active_walks(&self) -> usize { self.tasks.lock().len() }

    /// Wait for the current walk of `folder_id`, if any, to finish or stop.
    pub async fn join(&self, folder_id: &str) {
        let done = self.tasks.lock().get(folder_id).map(|t| t.done.clone());
        if let Some(done) = done {
            done.await;
        }
    }
}

struct Walk {
    folder_id: String,
    signature: String,
    states: States,
    stop: Arc<AtomicBool>,
}

impl Walk {
    fn stopped(&self) -> bool { self.stop.load(Ordering::SeqCst) }

    /// Cursor to resume from; a signature mismatch replaces the state and starts over.
    fn begin(&self, total: usize) -> usize {
        let mut states = self.states.lock();
        let fresh = || FolderState { signature: self.signature.clone(), cursor: 0, total, status: FolderStatus::Running };
        let state = states.entry(self.folder_id.clone()).or_insert_with(fresh);
        if state.signature != self.signature {
            info!(folder = %self.folder_id, "folder contents changed, restarting thumbnails from the top");
            *state = fresh();
        }
        state.status = if state.cursor >= total { FolderStatus::Completed } else { FolderStatus::Running };
        state.cursor
    }

    fn advance(&self, next: usize) {
        if let Some(state) = self.states.lock().get_mut(&self.folder_id) {
            // cleared or replaced under us: not our cursor any more
            if state.signature == self.signature {
                state.cursor = state.cursor.max(next);
            }
        }
    }

    fn halt(&self) {
        if let Some(state) = self.states.lock().get_mut(&self.folder_id) {
            if state.signature == self.signature && state.status == FolderStatus::Running {
                state.status = FolderStatus::Paused;
            }
        }
    }

    fn finish(&self) {
        if let Some(state) = self.states.lock().get_mut(&self.folder_id) {
            if state.signature == self.signature && state.cursor >= state.total {
                state.status = FolderStatus::Completed;
            }
        }
    }

    async fn run<F, Fut>(self, videos: Vec<VideoRef>, visit: F)
    where
        F: Fn(VideoRef) -> Fut,
        Fut: Future<Output = bool>,
    {
        if self.stopped() {
            return;
        }
        let total = videos.len();
        let start_at = self.begin(total);
        info!(folder = %self.folder_id, start_at, total, "folder thumbnails started");
        let mut produced = 0usize;
        for (index, video) in videos.into_iter().enumerate().skip(start_at) {
            if self.stopped() {
                debug!(folder = %self.folder_id, index, "folder walk stopped");
                self.halt();
                return;
            }
            if visit(video).await {
                produced += 1;
            }
            self.advance(index + 1);
            tokio::task::yield_now().await;
        }
        self.finish();
        info!(folder = %self.folder_id, produced, total, "folder thumbnails completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::video;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn videos(n: usize) -> Vec<VideoRef> {
        (0..n).map(|i| video(&format!("v{i}.mp4"), 100, 1)).collect()
    }

    type Log = Arc<Mutex<Vec<String>>>;

    /// Records every visit; pauses `folder` from inside the visit of `pause_at`.
    fn recorder(sched: &Arc<FolderScheduler>, log: &Log, pause_at: Option<&'static str>) -> impl Fn(VideoRef) -> BoxFuture<'static, bool> + Send + Sync + 'static {
        let (sched, log) = (Arc::downgrade(sched), log.clone());
        move |v: VideoRef| {
            let (sched, log) = (sched.clone(), log.clone());
            async move {
                log.lock().push(v.locator.clone());
                if Some(v.locator.as_str()) == pause_at {
                    if let Some(s) = sched.upgrade() { s.pause("f"); }
                }
                true
            }.boxed()
        }
    }

    #[tokio::test]
    async fn test_walks_in_order_to_completion() {
        let sched = Arc::new(FolderScheduler::new(Handle::current()));
        let log: Log = Default::default();
        sched.start("f", videos(5), 100, 100, recorder(&sched, &log, None));
        sched.join("f").await;
        assert_eq!(*log.lock(), vec!["v0.mp4", "v1.mp4", "v2.mp4", "v3.mp4", "v4.mp4"]);
        assert_eq!(sched.status("f"), FolderStatus::Completed);
        assert_eq!(sched.cursor("f"), Some(5));
    }

    #[tokio::test]
    async fn test_pause_then_start_resumes_after_last_finished() {
        let sched = Arc::new(FolderScheduler::new(Handle::current()));
        let log: Log = Default::default();
        sched.start("f", videos(10), 100, 100, recorder(&sched, &log, Some("v3.mp4")));
        sched.join("f").await;
        assert_eq!(log.lock().len(), 4);
        assert_eq!(sched.cursor("f"), Some(4));
        assert_eq!(sched.status("f"), FolderStatus::Paused);

        log.lock().clear();
        sched.start("f", videos(10), 100, 100, recorder(&sched, &log, None));
        sched.join("f").await;
        assert_eq!(log.lock().first().map(String::as_str), Some("v4.mp4"));
        assert_eq!(log.lock().len(), 6);
        assert_eq!(sched.status("f"), FolderStatus::Completed);
    }

    #[tokio::test]
    async fn test_changed_signature_restarts_from_zero() {
        let sched = Arc::new(FolderScheduler::new(Handle::current()));
        let log: Log = Default::default();
        sched.start("f", videos(10), 100, 100, recorder(&sched, &log, Some("v3.mp4")));
        sched.join("f").await;
        assert_eq!(sched.cursor("f"), Some(4));

        // new target size
        log.lock().clear();
        sched.start("f", videos(10), 200, 200, recorder(&sched, &log, Some("v1.mp4")));
        sched.join("f").await;
        assert_eq!(*log.lock(), vec!["v0.mp4", "v1.mp4"]);

        // new list
        log.lock().clear();
        sched.start("f", videos(9), 200, 200, recorder(&sched, &log, None));
        sched.join("f").await;
        assert_eq!(log.lock().first().map(String::as_str), Some("v0.mp4"));
        assert_eq!(sched.cursor("f"), Some(9));
    }

    #[tokio::test]
    async fn test_restart_never_overlaps_walks() {
        let sched = Arc::new(FolderScheduler::new(Handle::current()));
        let active = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicBool::new(false));
        let visit = {
            let (active, overlap) = (active.clone(), overlap.clone());
            move |_v: VideoRef| {
                let (active, overlap) = (active.clone(), overlap.clone());
                async move {
                    if active.fetch_add(1, Ordering::SeqCst) > 0 { overlap.store(true, Ordering::SeqCst); }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    true
                }
            }
        };
        sched.start("f", videos(6), 100, 100, visit.clone());
        tokio::time::sleep(Duration::from_millis(7)).await;
        sched.start("f", videos(6), 100, 100, visit);
        sched.join("f").await;
        assert!(!overlap.load(Ordering::SeqCst));
        assert_eq!(sched.status("f"), FolderStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_all_forgets_cursors() {
        let sched = Arc::new(FolderScheduler::new(Handle::current()));
        let log: Log = Default::default();
        sched.start("f", videos(10), 100, 100, recorder(&sched, &log, Some("v2.mp4")));
        sched.join("f").await;
        sched.cancel_all();
        assert_eq!(sched.status("f"), FolderStatus::Idle);
        assert_eq!(sched.cursor("f"), None);

        log.lock().clear();
        sched.start("f", videos(10), 100, 100, recorder(&sched, &log, None));
        sched.join("f").await;
        assert_eq!(log.lock().len(), 10);
    }

    #[tokio::test]
    async fn test_pause_before_first_video_reports_paused() {
        let sched = Arc::new(FolderScheduler::new(Handle::current()));
        let log: Log = Default::default();
        // current-thread runtime: the walk cannot begin before this test yields
        sched.start("f", videos(10), 100, 100, recorder(&sched, &log, None));
        sched.pause("f");
        assert_eq!(sched.status("f"), FolderStatus::Paused);
        sched.join("f").await;
        assert!(log.lock().is_empty());
        assert_eq!(sched.status("f"), FolderStatus::Paused);
        assert_eq!(sched.cursor("f"), Some(0));

        sched.start("f", videos(10), 100, 100, recorder(&sched, &log, None));
        sched.join("f").await;
        assert_eq!(log.lock().len(), 10);
        assert_eq!(sched.status("f"), FolderStatus::Completed);
    }

    #[tokio::test]
    async fn test_ended_walks_are_retired() {
        let sched = Arc::new(FolderScheduler::new(Handle::current()));
        let log: Log = Default::default();
        sched.start("a", videos(3), 100, 100, recorder(&sched, &log, None));
        sched.start("b", videos(3), 100, 100, recorder(&sched, &log, None));
        assert_eq!(sched.active_walks(), 2);
        sched.join("a").await;
        sched.join("b").await;
        assert_eq!(sched.active_walks(), 0);
        // a finished folder has nothing left to pause
        sched.pause("a");
        assert_eq!(sched.status("a"), FolderStatus::Completed);
    }

    #[test]
    fn test_start_from_a_thread_outside_the_runtime() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let sched = Arc::new(FolderScheduler::new(rt.handle().clone()));
        let log: Log = Default::default();
        let (s, l) = (sched.clone(), log.clone());
        std::thread::spawn(move || {
            s.start("f", videos(4), 100, 100, recorder(&s, &l, None));
            futures::executor::block_on(s.join("f"));
        })
        .join()
        .unwrap();
        assert_eq!(log.lock().len(), 4);
        assert_eq!(sched.status("f"), FolderStatus::Completed);
    }

    #[tokio::test]
    async fn test_pause_unknown_folder_is_noop() {
        let sched = FolderScheduler::new(Handle::current());
        sched.pause("nope");
        sched.join("nope").await;
        assert_eq!(sched.status("nope"), FolderStatus::Idle);
    }
}
