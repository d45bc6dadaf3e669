//! The task resource: a running (or runnable) task exposed as a file
//! service.
//!
//! Each task owns a namespace, three duplex fd pipes, and a small control
//! surface:
//!
//! ```text
//! /<id>/
//!   cmd          # writable; holds the command string
//!   ctl          # write-only verbs: bind / unbind / start / kill
//!   dir          # working-directory field
//!   exit         # read blocks until the task exits, then yields the code
//!   fd/
//!     0, 1, 2    # bidirectional streams (reads from the peer end)
//! ```
//!
//! The filesystem is built once at allocation and is identity-stable for
//! the task's lifetime.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use plait_types::{BindMode, FileInfo, FsError, FsResult, TaskId};
use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;

use super::pipe::{FdFile, PIPE_CAPACITY, duplex};
use super::{Registry, Starter};
use crate::ctx::OpCtx;
use crate::fskit::{CtlFile, CtlHandler, FieldFile, MapFS, cursor_read};
use crate::ns::Namespace;
use crate::service::{File, FileService, ResolveStep, ServiceCaps};

/// Hook invoked when `kill SIG` is written to the task's ctl. Installed by
/// starters that need teardown beyond the kill token.
pub type KillHook = Arc<dyn Fn(Arc<Task>, &str) + Send + Sync>;

/// A task: id, kind, namespace, and control surface.
pub struct Task {
    id: TaskId,
    kind: String,
    ns: Arc<Namespace>,
    cmd: Arc<RwLock<String>>,
    dir: Arc<RwLock<String>>,
    exit_tx: watch::Sender<Option<String>>,
    starter: Starter,
    started: AtomicBool,
    kill_hook: Mutex<Option<KillHook>>,
    kill: CancellationToken,
    /// Task-side pipe ends, mounted at `fd/`.
    fds: BTreeMap<String, Arc<FdFile>>,
    /// Peer ends, held for the host side of each stream.
    host_fds: BTreeMap<String, Arc<FdFile>>,
    registry: Weak<Registry>,
    self_ref: Weak<Task>,
    fs: Arc<MapFS>,
}

impl Task {
    pub(super) fn new(
        id: TaskId,
        kind: String,
        ns: Arc<Namespace>,
        starter: Starter,
        registry: Weak<Registry>,
    ) -> Arc<Task> {
        let cmd_file = Arc::new(FieldFile::new("cmd", ""));
        let dir_file = Arc::new(FieldFile::new("dir", ""));
        let (exit_tx, _) = watch::channel(None);

        let mut fds = BTreeMap::new();
        let mut host_fds = BTreeMap::new();
        for n in ["0", "1", "2"] {
            let (task_end, host_end) = duplex(PIPE_CAPACITY);
            fds.insert(n.to_string(), Arc::new(FdFile::new(n, task_end)));
            host_fds.insert(n.to_string(), Arc::new(FdFile::new(n, host_end)));
        }

        Arc::new_cyclic(|weak: &Weak<Task>| {
            let mut fd_map = MapFS::new();
            for (n, fd) in &fds {
                fd_map.insert(n.clone(), Arc::clone(fd) as Arc<dyn FileService>);
            }

            let mut root = MapFS::new();
            root.insert("cmd", Arc::clone(&cmd_file) as Arc<dyn FileService>);
            root.insert(
                "ctl",
                Arc::new(CtlFile::new("ctl", ctl_handler(weak.clone()))),
            );
            root.insert("dir", Arc::clone(&dir_file) as Arc<dyn FileService>);
            root.insert("exit", Arc::new(ExitFile { task: weak.clone() }));
            root.insert("fd", Arc::new(fd_map));

            Task {
                id,
                kind,
                ns,
                cmd: cmd_file.cell(),
                dir: dir_file.cell(),
                exit_tx,
                starter,
                started: AtomicBool::new(false),
                kill_hook: Mutex::new(None),
                kill: CancellationToken::new(),
                fds,
                host_fds,
                registry,
                self_ref: weak.clone(),
                fs: Arc::new(root),
            }
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The task's namespace. Starters expose type-specific subtrees here.
    pub fn ns(&self) -> &Arc<Namespace> {
        &self.ns
    }

    /// The command string, as written to `cmd`.
    pub async fn cmd(&self) -> String {
        self.cmd.read().await.clone()
    }

    /// The working-directory field, as written to `dir`.
    pub async fn dir(&self) -> String {
        self.dir.read().await.clone()
    }

    /// The exit string: `None` while running.
    pub fn exit(&self) -> Option<String> {
        self.exit_tx.borrow().clone()
    }

    /// Task-side fd (what the task's own code reads and writes).
    pub fn fd(&self, n: &str) -> Option<Arc<FdFile>> {
        self.fds.get(n).cloned()
    }

    /// Host-side fd (the peer of the task's stream).
    pub fn host_fd(&self, n: &str) -> Option<Arc<FdFile>> {
        self.host_fds.get(n).cloned()
    }

    /// Cancelled when `kill` is written to ctl. Worker loops select on
    /// this.
    pub fn kill_token(&self) -> &CancellationToken {
        &self.kill
    }

    /// Install the kind-specific kill hook.
    pub fn set_kill_hook(&self, hook: KillHook) {
        let mut slot = self.kill_hook.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(hook);
    }

    /// Record the exit status and wake every `exit` reader.
    pub fn set_exit(&self, code: impl Into<String>) {
        self.exit_tx.send_replace(Some(code.into()));
    }

    /// Run a worker for this task; its return value becomes the exit code.
    pub fn spawn<F>(&self, work: F)
    where
        F: Future<Output = i32> + Send + 'static,
    {
        let Some(task) = self.self_ref.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let code = work.await;
            task.set_exit(code.to_string());
        });
    }

    /// Invoke the starter. Runs on the caller's thread of execution: long
    /// work belongs in `spawn`, or the ctl write blocks.
    pub fn start(&self) -> FsResult<()> {
        let Some(this) = self.self_ref.upgrade() else {
            return Err(FsError::io("ctl", "start", "task is gone"));
        };
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(FsError::invalid("ctl", "start"));
        }
        tracing::info!(id = %self.id, kind = %self.kind, "starting task");
        (self.starter)(this)
    }

    fn deliver_kill(&self, sig: &str) {
        tracing::info!(id = %self.id, sig, "kill signal");
        let hook = self
            .kill_hook
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(hook) = hook
            && let Some(this) = self.self_ref.upgrade()
        {
            hook(this, sig);
        }
        self.kill.cancel();
    }

    /// Drop the task from the registry and tear down its pipes. Runs once
    /// the exit status has been read by a waiter.
    pub(super) async fn release(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.forget(self.id).await;
        }
        for fd in self.fds.values() {
            fd.close_pipe().await;
        }
        tracing::debug!(id = %self.id, "task released");
    }

    async fn control(&self, tokens: Vec<String>) -> FsResult<()> {
        let Some(verb) = tokens.first() else {
            return Ok(());
        };
        match verb.as_str() {
            "bind" => {
                let (Some(src), Some(dst)) = (tokens.get(1), tokens.get(2)) else {
                    return Err(FsError::invalid("ctl", "bind"));
                };
                let mode = match tokens.get(3) {
                    None => BindMode::After,
                    Some(m) => {
                        BindMode::parse(m).ok_or_else(|| FsError::invalid("ctl", m.clone()))?
                    }
                };
                let src_fs: Arc<dyn FileService> = Arc::clone(&self.ns) as Arc<dyn FileService>;
                self.ns.bind(&src_fs, src, dst, mode).await
            }
            "unbind" => {
                let (Some(src), Some(dst)) = (tokens.get(1), tokens.get(2)) else {
                    return Err(FsError::invalid("ctl", "unbind"));
                };
                let src_fs: Arc<dyn FileService> = Arc::clone(&self.ns) as Arc<dyn FileService>;
                self.ns.unbind(&src_fs, src, dst).await
            }
            "start" => self.start(),
            "kill" => {
                let sig = tokens.get(1).map(String::as_str).unwrap_or("kill");
                self.deliver_kill(sig);
                Ok(())
            }
            _ => Err(FsError::invalid("ctl", verb.clone())),
        }
    }
}

fn ctl_handler(task: Weak<Task>) -> CtlHandler {
    Arc::new(move |tokens: Vec<String>| {
        let task = task.clone();
        Box::pin(async move {
            let Some(task) = task.upgrade() else {
                return Err(FsError::io("ctl", "ctl", "task is gone"));
            };
            task.control(tokens).await
        })
    })
}

#[async_trait]
impl FileService for Task {
    fn caps(&self) -> ServiceCaps {
        ServiceCaps {
            resolver: true,
            creator: true,
            stat: true,
        }
    }

    async fn open(&self, name: &str, ctx: &OpCtx) -> FsResult<Box<dyn File>> {
        self.fs.open(name, ctx).await
    }

    async fn resolve(&self, name: &str, _ctx: &OpCtx) -> FsResult<ResolveStep> {
        Ok(ResolveStep::Descend(
            Arc::clone(&self.fs) as Arc<dyn FileService>,
            name.to_string(),
        ))
    }

    async fn create(&self, name: &str, ctx: &OpCtx) -> FsResult<Box<dyn File>> {
        self.fs.create(name, ctx).await
    }

    async fn stat(&self, name: &str, ctx: &OpCtx) -> FsResult<FileInfo> {
        if name == "." {
            return Ok(FileInfo::dir(self.id.to_string()));
        }
        self.fs.stat(name, ctx).await
    }
}

/// The `exit` file: reading blocks until the task exits, yields the exit
/// code string, and releases the task's resources.
struct ExitFile {
    task: Weak<Task>,
}

#[async_trait]
impl FileService for ExitFile {
    fn caps(&self) -> ServiceCaps {
        ServiceCaps {
            stat: true,
            ..Default::default()
        }
    }

    async fn open(&self, name: &str, ctx: &OpCtx) -> FsResult<Box<dyn File>> {
        if name != "." {
            return Err(FsError::not_exist("open", name));
        }
        let Some(task) = self.task.upgrade() else {
            return Err(FsError::io("open", "exit", "task is gone"));
        };
        Ok(Box::new(ExitHandle {
            rx: task.exit_tx.subscribe(),
            task: self.task.clone(),
            cancel: ctx.cancel_token().clone(),
            data: None,
            pos: 0,
        }))
    }

    async fn stat(&self, name: &str, _ctx: &OpCtx) -> FsResult<FileInfo> {
        if name != "." {
            return Err(FsError::not_exist("stat", name));
        }
        Ok(FileInfo::file("exit", 0).with_perm(0o444))
    }
}

struct ExitHandle {
    rx: watch::Receiver<Option<String>>,
    task: Weak<Task>,
    cancel: CancellationToken,
    data: Option<Vec<u8>>,
    pos: usize,
}

#[async_trait]
impl File for ExitHandle {
    async fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        if self.data.is_none() {
            let code = tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(FsError::cancelled("read", "exit"));
                }
                changed = self.rx.wait_for(|v| v.is_some()) => match changed {
                    Ok(value) => value.clone().unwrap_or_default(),
                    Err(_) => return Err(FsError::io("read", "exit", "task is gone")),
                },
            };
            self.data = Some(format!("{code}\n").into_bytes());
            // The exit status has been observed: release the task.
            if let Some(task) = self.task.upgrade() {
                task.release().await;
            }
        }
        let Self { data, pos, .. } = self;
        let bytes = data.as_deref().unwrap_or_default();
        Ok(cursor_read(bytes, pos, buf))
    }

    async fn stat(&self) -> FsResult<FileInfo> {
        Ok(FileInfo::file("exit", 0).with_perm(0o444))
    }
}
