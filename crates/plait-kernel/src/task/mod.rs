//! The task service: allocator, registry, and the filesystem view over
//! both.
//!
//! The service exposes `new/<kind>` (reading allocates), `<id>/` (the
//! per-task view), and `self` (the calling task's id, resolved from the
//! context). Each allocated task gets a monotonically-assigned id, three
//! duplex fd pipes, and a namespace cloned from its parent's (or fresh).

mod pipe;
mod resource;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};

use async_trait::async_trait;
use plait_types::{FileInfo, FsError, FsResult, TaskId};
use tokio::sync::RwLock;

pub use pipe::{FdFile, PIPE_CAPACITY, PipeEnd, duplex};
pub use resource::{KillHook, Task};

use crate::ctx::OpCtx;
use crate::fskit::{DirHandle, FuncFile, FuncHandle, MapFS, OpenFn, SyncBoxFuture, UnionFS};
use crate::ns::Namespace;
use crate::service::{File, FileService, ResolveStep, ServiceCaps, stat_at};

/// Starter function for a task kind. Invoked when `start` is written to
/// the task's ctl; must return promptly and push long work onto a worker
/// via [`Task::spawn`].
pub type Starter = Arc<dyn Fn(Arc<Task>) -> FsResult<()> + Send + Sync>;

/// Shared allocator state, split out so closures and tasks can hold it
/// without keeping the whole service alive.
pub(crate) struct Registry {
    kinds: StdRwLock<BTreeMap<String, Starter>>,
    tasks: RwLock<BTreeMap<u64, Arc<Task>>>,
    next_id: AtomicU64,
}

impl Registry {
    fn kind_names(&self) -> Vec<String> {
        self.kinds
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    fn starter_for(&self, kind: &str) -> Option<Starter> {
        self.kinds
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(kind)
            .cloned()
    }

    async fn alloc(self: Arc<Self>, kind: &str, parent: Option<TaskId>) -> FsResult<Arc<Task>> {
        let starter = self
            .starter_for(kind)
            .ok_or_else(|| FsError::not_exist("alloc", kind))?;

        let id = TaskId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let ctx = OpCtx::new().with_task(id);

        let parent_task = match parent {
            Some(pid) => self.tasks.read().await.get(&pid.0).cloned(),
            None => None,
        };
        let ns = match parent_task {
            Some(parent) => Arc::new(parent.ns().clone_with(ctx).await),
            None => Arc::new(Namespace::new(ctx)),
        };

        let task = Task::new(id, kind.to_string(), ns, starter, Arc::downgrade(&self));
        self.tasks.write().await.insert(id.0, Arc::clone(&task));
        tracing::info!(id = %id, kind, "allocated task");
        Ok(task)
    }

    async fn forget(&self, id: TaskId) {
        self.tasks.write().await.remove(&id.0);
    }
}

/// The task service. Bind it into a namespace (conventionally at `task`)
/// and every live task becomes a subtree.
pub struct TaskService {
    inner: Arc<Registry>,
}

impl Default for TaskService {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskService {
    pub fn new() -> Self {
        let svc = Self {
            inner: Arc::new(Registry {
                kinds: StdRwLock::new(BTreeMap::new()),
                tasks: RwLock::new(BTreeMap::new()),
                next_id: AtomicU64::new(0),
            }),
        };
        // The empty-namespace task kind is always available.
        svc.register("ns", Arc::new(|_task| Ok(())));
        svc
    }

    /// Record a starter for a task kind.
    pub fn register(&self, kind: impl Into<String>, starter: Starter) {
        let mut kinds = self.inner.kinds.write().unwrap_or_else(|e| e.into_inner());
        kinds.insert(kind.into(), starter);
    }

    /// Allocate a task directly (the filesystem route is `new/<kind>`).
    pub async fn alloc(&self, kind: &str, parent: Option<TaskId>) -> FsResult<Arc<Task>> {
        Arc::clone(&self.inner).alloc(kind, parent).await
    }

    /// Look up a live task.
    pub async fn get(&self, id: TaskId) -> Option<Arc<Task>> {
        self.inner.tasks.read().await.get(&id.0).cloned()
    }

    /// Remove a task from the registry without waiting for its exit to be
    /// read.
    pub async fn remove(&self, id: TaskId) {
        self.inner.forget(id).await;
    }

    /// Ids of every live task, ascending.
    pub async fn task_ids(&self) -> Vec<TaskId> {
        self.inner
            .tasks
            .read()
            .await
            .keys()
            .map(|id| TaskId(*id))
            .collect()
    }

    /// The `new` directory: listing shows the registered kinds; reading
    /// `new/<kind>` allocates and yields the new id.
    fn alloc_view(&self) -> Arc<dyn FileService> {
        let registry = Arc::clone(&self.inner);
        Arc::new(OpenFn::new(
            "new",
            Arc::new(move |name: String, ctx: OpCtx| {
                let registry = Arc::clone(&registry);
                Box::pin(async move {
                    if name == "." {
                        let entries = registry
                            .kind_names()
                            .into_iter()
                            .map(|k| FileInfo::file(k, 0).with_perm(0o444))
                            .collect();
                        return Ok(Box::new(DirHandle::new(
                            FileInfo::dir("new").with_perm(0o555),
                            entries,
                        )) as Box<dyn File>);
                    }
                    if registry.starter_for(&name).is_none() {
                        return Err(FsError::not_exist("open", name));
                    }
                    let parent = ctx.task();
                    let kind = name.clone();
                    let fill: SyncBoxFuture<FsResult<Vec<u8>>> = Box::pin(async move {
                        let task = registry.alloc(&kind, parent).await?;
                        Ok(format!("{}\n", task.id()).into_bytes())
                    });
                    Ok(Box::new(FuncHandle::new(
                        FileInfo::file(&name, 0).with_perm(0o444),
                        fill,
                    )) as Box<dyn File>)
                })
            }),
        ))
    }

    /// The live composition: `{new, self?}` unioned before the map of
    /// live tasks. Rebuilt per call so the task view is always current;
    /// resolution terminates inside the fresh composite.
    async fn compose(&self, ctx: &OpCtx) -> Arc<dyn FileService> {
        let mut front = MapFS::new();
        front.insert("new", self.alloc_view());
        if let Some(tid) = ctx.task() {
            front.insert(
                "self",
                Arc::new(FuncFile::fixed("self", tid.to_string())) as Arc<dyn FileService>,
            );
        }

        let mut live = MapFS::new();
        for (id, task) in self.inner.tasks.read().await.iter() {
            live.insert(id.to_string(), Arc::clone(task) as Arc<dyn FileService>);
        }

        Arc::new(UnionFS::new(vec![Arc::new(front), Arc::new(live)]))
    }
}

#[async_trait]
impl FileService for TaskService {
    fn caps(&self) -> ServiceCaps {
        ServiceCaps {
            resolver: true,
            creator: true,
            stat: true,
        }
    }

    async fn resolve(&self, name: &str, ctx: &OpCtx) -> FsResult<ResolveStep> {
        if name == "." {
            return Ok(ResolveStep::Local);
        }
        Ok(ResolveStep::Descend(
            self.compose(ctx).await,
            name.to_string(),
        ))
    }

    async fn open(&self, name: &str, ctx: &OpCtx) -> FsResult<Box<dyn File>> {
        if name == "." {
            let mut entries = vec![FileInfo::dir("new").with_perm(0o555)];
            for id in self.inner.tasks.read().await.keys() {
                entries.push(FileInfo::dir(id.to_string()));
            }
            if ctx.task().is_some() {
                entries.push(FileInfo::file("self", 0).with_perm(0o444));
            }
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            return Ok(Box::new(DirHandle::new(FileInfo::dir("."), entries)));
        }
        match self.resolve(name, ctx).await? {
            ResolveStep::Descend(fs, rname) => fs.open(&rname, ctx).await,
            ResolveStep::Local => Err(FsError::not_exist("open", name)),
        }
    }

    async fn create(&self, name: &str, ctx: &OpCtx) -> FsResult<Box<dyn File>> {
        // Task resource paths route directly: `<id>/cmd`, `<id>/ctl`, …
        if let Some((tid, sub)) = name.split_once('/')
            && let Ok(tid) = tid.parse::<u64>()
            && let Some(task) = self.inner.tasks.read().await.get(&tid).cloned()
        {
            tracing::debug!(task = tid, sub, "task create routed to resource");
            let task = task as Arc<dyn FileService>;
            if task.caps().creator {
                return task.create(sub, ctx).await;
            }
            return task.open(sub, ctx).await;
        }

        match self.resolve(name, ctx).await? {
            ResolveStep::Descend(fs, rname) => {
                if fs.caps().creator {
                    fs.create(&rname, ctx).await
                } else {
                    Err(FsError::permission("create", name))
                }
            }
            ResolveStep::Local => Err(FsError::permission("create", name)),
        }
    }

    async fn stat(&self, name: &str, ctx: &OpCtx) -> FsResult<FileInfo> {
        // Answering the root directly keeps cyclic namespace → task →
        // namespace compositions from descending forever.
        if name == "." {
            return Ok(FileInfo::dir("."));
        }
        match self.resolve(name, ctx).await? {
            ResolveStep::Descend(fs, rname) => stat_at(&fs, &rname, ctx).await,
            ResolveStep::Local => Err(FsError::not_exist("stat", name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::service::read_all;

    fn noop_starter() -> Starter {
        Arc::new(|_task| Ok(()))
    }

    #[tokio::test]
    async fn ids_are_monotonic() {
        let svc = TaskService::new();
        let a = svc.alloc("ns", None).await.unwrap();
        let b = svc.alloc("ns", None).await.unwrap();
        assert_eq!(a.id(), TaskId(1));
        assert_eq!(b.id(), TaskId(2));
    }

    #[tokio::test]
    async fn unknown_kind_is_not_exist() {
        let svc = TaskService::new();
        let err = svc.alloc("warp-drive", None).await.unwrap_err();
        assert!(err.is_not_exist());
    }

    #[tokio::test]
    async fn alloc_then_remove_restores_the_registry() {
        let svc = TaskService::new();
        let task = svc.alloc("ns", None).await.unwrap();
        assert_eq!(svc.task_ids().await, vec![task.id()]);
        svc.remove(task.id()).await;
        assert!(svc.task_ids().await.is_empty());
    }

    #[tokio::test]
    async fn reading_new_kind_allocates() {
        let svc: Arc<dyn FileService> = Arc::new(TaskService::new());
        let ctx = OpCtx::new();

        let mut f = crate::ops::open(&svc, "new/ns", &ctx).await.unwrap();
        let id = read_all(f.as_mut()).await.unwrap();
        assert_eq!(id, b"1\n");

        let names: Vec<String> = crate::ops::read_dir(&svc, ".", &ctx)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert!(names.contains(&"1".to_string()));
        assert!(names.contains(&"new".to_string()));
    }

    #[tokio::test]
    async fn opening_new_does_not_allocate() {
        let svc = Arc::new(TaskService::new());
        let fs: Arc<dyn FileService> = Arc::clone(&svc) as Arc<dyn FileService>;
        let ctx = OpCtx::new();

        let f = crate::ops::open(&fs, "new/ns", &ctx).await.unwrap();
        drop(f);
        assert!(svc.task_ids().await.is_empty(), "open alone must not alloc");
    }

    #[tokio::test]
    async fn new_listing_shows_registered_kinds() {
        let svc = TaskService::new();
        svc.register("echo", noop_starter());
        let fs: Arc<dyn FileService> = Arc::new(svc);
        let ctx = OpCtx::new();

        let names: Vec<String> = crate::ops::read_dir(&fs, "new", &ctx)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["echo", "ns"]);
    }

    #[tokio::test]
    async fn self_appears_only_with_a_task_identity() {
        let svc: Arc<dyn FileService> = Arc::new(TaskService::new());

        let anon = OpCtx::new();
        assert!(crate::ops::open(&svc, "self", &anon).await.is_err());

        let ctx = OpCtx::new().with_task(TaskId(42));
        let mut f = crate::ops::open(&svc, "self", &ctx).await.unwrap();
        assert_eq!(read_all(f.as_mut()).await.unwrap(), b"42");
    }

    #[tokio::test]
    async fn cmd_round_trips_through_create() {
        let svc = Arc::new(TaskService::new());
        let task = svc.alloc("ns", None).await.unwrap();
        let fs: Arc<dyn FileService> = Arc::clone(&svc) as Arc<dyn FileService>;
        let ctx = OpCtx::new();

        let name = format!("{}/cmd", task.id());
        let mut f = crate::ops::create(&fs, &name, &ctx).await.unwrap();
        f.write(b"hello").await.unwrap();
        f.close().await.unwrap();

        assert_eq!(task.cmd().await, "hello");
        let mut f = crate::ops::open(&fs, &name, &ctx).await.unwrap();
        assert_eq!(read_all(f.as_mut()).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn start_runs_the_starter_and_exit_reports() {
        let svc = Arc::new(TaskService::new());
        svc.register(
            "echo",
            Arc::new(|task: Arc<Task>| {
                task.spawn(async move { 0 });
                Ok(())
            }),
        );
        let task = svc.alloc("echo", None).await.unwrap();
        let fs: Arc<dyn FileService> = Arc::clone(&svc) as Arc<dyn FileService>;
        let ctx = OpCtx::new();

        let ctl = format!("{}/ctl", task.id());
        let mut f = crate::ops::create(&fs, &ctl, &ctx).await.unwrap();
        f.write(b"start\n").await.unwrap();
        f.close().await.unwrap();

        let exit = format!("{}/exit", task.id());
        let mut f = crate::ops::open(&fs, &exit, &ctx).await.unwrap();
        assert_eq!(read_all(f.as_mut()).await.unwrap(), b"0\n");

        // Reading the exit status released the task.
        assert!(svc.task_ids().await.is_empty());
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let svc = Arc::new(TaskService::new());
        let task = svc.alloc("ns", None).await.unwrap();
        task.start().unwrap();
        assert!(task.start().is_err());
    }

    #[tokio::test]
    async fn kill_fires_the_hook_and_cancels_the_token() {
        let svc = Arc::new(TaskService::new());
        let fired = Arc::new(AtomicBool::new(false));
        let observed = Arc::clone(&fired);
        svc.register(
            "worker",
            Arc::new(move |task: Arc<Task>| {
                let observed = Arc::clone(&observed);
                task.set_kill_hook(Arc::new(move |_task, sig| {
                    assert_eq!(sig, "9");
                    observed.store(true, Ordering::SeqCst);
                }));
                Ok(())
            }),
        );
        let task = svc.alloc("worker", None).await.unwrap();
        task.start().unwrap();

        let fs: Arc<dyn FileService> = Arc::clone(&svc) as Arc<dyn FileService>;
        let ctx = OpCtx::new();
        let ctl = format!("{}/ctl", task.id());
        let mut f = crate::ops::create(&fs, &ctl, &ctx).await.unwrap();
        f.write(b"kill 9\n").await.unwrap();

        assert!(fired.load(Ordering::SeqCst));
        assert!(task.kill_token().is_cancelled());
    }

    #[tokio::test]
    async fn child_namespace_is_cloned_from_parent() {
        let svc = Arc::new(TaskService::new());
        let parent = svc.alloc("ns", None).await.unwrap();

        let scratch: Arc<dyn FileService> = Arc::new(crate::fskit::MemFS::new());
        parent
            .ns()
            .bind(&scratch, ".", "scratch", plait_types::BindMode::After)
            .await
            .unwrap();

        let child = svc.alloc("ns", Some(parent.id())).await.unwrap();
        assert_eq!(child.ns().list_binds().await.len(), 1);

        // Divergence after the fork stays private.
        parent
            .ns()
            .unbind(&scratch, ".", "scratch")
            .await
            .unwrap();
        assert_eq!(child.ns().list_binds().await.len(), 1);
    }

    #[tokio::test]
    async fn fd_streams_connect_task_and_host() {
        let svc = Arc::new(TaskService::new());
        svc.register(
            "writer",
            Arc::new(|task: Arc<Task>| {
                let fd = task.fd("1").ok_or(FsError::not_exist("open", "fd/1"))?;
                task.spawn(async move {
                    let ctx = OpCtx::new();
                    let Ok(mut out) = fd.open(".", &ctx).await else {
                        return 1;
                    };
                    if out.write(b"task says hi").await.is_err() {
                        return 1;
                    }
                    0
                });
                Ok(())
            }),
        );
        let task = svc.alloc("writer", None).await.unwrap();
        task.start().unwrap();

        let host = task.host_fd("1").unwrap();
        let mut f = host.open(".", &OpCtx::new()).await.unwrap();
        let mut buf = [0u8; 32];
        let n = f.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"task says hi");
    }
}
