//! Cross-module composition scenarios: deep routing, namespace bindings,
//! union preferences, and the full task-service chain.

use std::sync::Arc;

use plait_kernel::fskit::{MapFS, MemFS, UnionFS};
use plait_kernel::{
    BindMode, ErrKind, FileService, Namespace, OpCtx, TaskService, ops, read_all, resolve,
    same_service,
};

/// Opt-in log output while debugging: `RUST_LOG=debug cargo test`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

async fn mem_leaf(paths: &[(&str, &[u8])]) -> Arc<dyn FileService> {
    let fs = MemFS::new();
    for (name, data) in paths {
        fs.put(name, data).await;
    }
    Arc::new(fs)
}

#[tokio::test]
async fn two_level_map_descent_keeps_the_full_relative_name() {
    init_tracing();
    let leaf = mem_leaf(&[("1/data", b"dom payload")]).await;

    let mut inner = MapFS::new();
    inner.insert("dom", Arc::clone(&leaf));
    let mut outer = MapFS::new();
    outer.insert("web", Arc::new(inner));
    let outer: Arc<dyn FileService> = Arc::new(outer);

    let ctx = OpCtx::new();
    let (rfs, rname) = resolve(&outer, "web/dom/1/data", &ctx).await.unwrap();
    assert!(
        same_service(&rfs, &leaf),
        "resolution must not stop at an intermediate router"
    );
    assert_eq!(rname, "1/data", "prefix stripping lost a segment");

    // Opening through the composition equals opening the leaf directly.
    let mut via_outer = ops::open(&outer, "web/dom/1/data", &ctx).await.unwrap();
    let mut direct = leaf.open("1/data", &ctx).await.unwrap();
    assert_eq!(
        read_all(via_outer.as_mut()).await.unwrap(),
        read_all(direct.as_mut()).await.unwrap(),
    );
}

#[tokio::test]
async fn namespace_bind_of_a_resolver_leaf_reaches_the_leaf_open() {
    let leaf = mem_leaf(&[("1/data", b"serial console")]).await;
    let mut map = MapFS::new();
    map.insert("dom", Arc::clone(&leaf));
    let map: Arc<dyn FileService> = Arc::new(map);

    let ns = Namespace::new(OpCtx::new());
    ns.bind(&map, "dom/1/data", "web/vm/1/ttyS0", BindMode::After)
        .await
        .unwrap();
    let ns: Arc<dyn FileService> = Arc::new(ns);

    let ctx = OpCtx::new();
    let (rfs, rname) = resolve(&ns, "web/vm/1/ttyS0", &ctx).await.unwrap();
    assert!(same_service(&rfs, &leaf));
    assert_eq!(rname, "1/data");

    let mut f = ops::open(&ns, "web/vm/1/ttyS0", &ctx).await.unwrap();
    assert_eq!(read_all(f.as_mut()).await.unwrap(), b"serial console");
}

#[tokio::test]
async fn union_prefers_creators_for_writes_and_order_for_reads() {
    // m1 has `x` but cannot create; m2 can create.
    let m1 = MemFS::new();
    m1.put("x", b"m1's x").await;

    struct NoCreate(MemFS);

    #[async_trait::async_trait]
    impl FileService for NoCreate {
        fn caps(&self) -> plait_kernel::ServiceCaps {
            plait_kernel::ServiceCaps {
                stat: true,
                ..Default::default()
            }
        }

        async fn open(
            &self,
            name: &str,
            ctx: &OpCtx,
        ) -> plait_kernel::FsResult<Box<dyn plait_kernel::File>> {
            self.0.open(name, ctx).await
        }

        async fn stat(
            &self,
            name: &str,
            ctx: &OpCtx,
        ) -> plait_kernel::FsResult<plait_kernel::FileInfo> {
            self.0.stat(name, ctx).await
        }
    }

    let m2 = Arc::new(MemFS::new());
    let union: Arc<dyn FileService> = Arc::new(UnionFS::new(vec![
        Arc::new(NoCreate(m1)),
        Arc::clone(&m2) as Arc<dyn FileService>,
    ]));

    // Writable ctx: create lands in m2.
    let ctx = OpCtx::new();
    let mut f = ops::create(&union, "y", &ctx).await.unwrap();
    f.write(b"fresh").await.unwrap();
    f.close().await.unwrap();
    let mut check = m2.open("y", &ctx).await.unwrap();
    assert_eq!(read_all(check.as_mut()).await.unwrap(), b"fresh");

    // Read-only ctx: open finds m1's file.
    let ro = OpCtx::new().read_only();
    let mut f = ops::open(&union, "x", &ro).await.unwrap();
    assert_eq!(read_all(f.as_mut()).await.unwrap(), b"m1's x");
}

#[tokio::test]
async fn allocation_through_a_bound_task_service() {
    init_tracing();
    let svc: Arc<dyn FileService> = Arc::new(TaskService::new());

    let ns = Namespace::new(OpCtx::new());
    ns.bind(&svc, ".", "task", BindMode::After).await.unwrap();
    let ns: Arc<dyn FileService> = Arc::new(ns);
    let ctx = OpCtx::new();

    let mut f = ops::open(&ns, "task/new/ns", &ctx).await.unwrap();
    let id = read_all(f.as_mut()).await.unwrap();
    assert_eq!(id, b"1\n", "allocation yields the new id plus newline");

    let names: Vec<String> = ops::read_dir(&ns, "task", &ctx)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert!(names.contains(&"1".to_string()), "listing: {names:?}");
}

#[tokio::test]
async fn shell_redirection_reaches_the_task_cmd_file() {
    init_tracing();
    let service = Arc::new(TaskService::new());
    let task = service.alloc("ns", None).await.unwrap();
    let svc: Arc<dyn FileService> = Arc::clone(&service) as Arc<dyn FileService>;

    let ns = Namespace::new(OpCtx::new());
    ns.bind(&svc, ".", "task", BindMode::After).await.unwrap();
    let ns: Arc<dyn FileService> = Arc::new(ns);
    let ctx = OpCtx::new();

    // `echo hello > task/<id>/cmd` — create must flow namespace → map →
    // task service → union → task map without path corruption.
    let cmd_path = format!("task/{}/cmd", task.id());
    let mut f = ops::create(&ns, &cmd_path, &ctx).await.unwrap();
    f.write(b"hello").await.unwrap();
    f.close().await.unwrap();

    assert_eq!(task.cmd().await, "hello");
    let mut f = ops::open(&ns, &cmd_path, &ctx).await.unwrap();
    assert_eq!(read_all(f.as_mut()).await.unwrap(), b"hello");
}

#[tokio::test]
async fn unbound_paths_stay_not_exist_through_every_layer() {
    let svc: Arc<dyn FileService> = Arc::new(TaskService::new());
    let ns = Namespace::new(OpCtx::new());
    ns.bind(&svc, ".", "task", BindMode::After).await.unwrap();
    let ns: Arc<dyn FileService> = Arc::new(ns);
    let ctx = OpCtx::new();

    for missing in ["ghost", "task/99/cmd", "task/new/warp-drive"] {
        let err = ops::open(&ns, missing, &ctx).await.unwrap_err();
        assert_eq!(err.kind, ErrKind::NotExist, "open({missing:?}): {err}");
    }
}

#[tokio::test]
async fn readdir_is_deterministic_across_repeats() {
    let a = mem_leaf(&[("alpha", b""), ("beta", b"")]).await;
    let b = mem_leaf(&[("gamma", b"")]).await;

    let ns = Namespace::new(OpCtx::new());
    ns.bind(&a, ".", "mnt", BindMode::After).await.unwrap();
    ns.bind(&b, ".", "mnt", BindMode::After).await.unwrap();
    let ns: Arc<dyn FileService> = Arc::new(ns);
    let ctx = OpCtx::new();

    let first: Vec<String> = ops::read_dir(&ns, "mnt", &ctx)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    for _ in 0..5 {
        let again: Vec<String> = ops::read_dir(&ns, "mnt", &ctx)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(again, first);
    }
}

#[tokio::test]
async fn exit_wait_flows_through_the_namespace() {
    let service = Arc::new(TaskService::new());
    service.register(
        "quick",
        Arc::new(|task: Arc<plait_kernel::Task>| {
            task.spawn(async move { 7 });
            Ok(())
        }),
    );
    let task = service.alloc("quick", None).await.unwrap();
    let svc: Arc<dyn FileService> = Arc::clone(&service) as Arc<dyn FileService>;

    let ns = Namespace::new(OpCtx::new());
    ns.bind(&svc, ".", "task", BindMode::After).await.unwrap();
    let ns: Arc<dyn FileService> = Arc::new(ns);
    let ctx = OpCtx::new();

    let ctl = format!("task/{}/ctl", task.id());
    let mut f = ops::create(&ns, &ctl, &ctx).await.unwrap();
    f.write(b"start\n").await.unwrap();
    f.close().await.unwrap();

    let exit = format!("task/{}/exit", task.id());
    let mut f = ops::open(&ns, &exit, &ctx).await.unwrap();
    assert_eq!(read_all(f.as_mut()).await.unwrap(), b"7\n");

    // Once the exit status is read, the task is gone from the registry.
    assert!(service.task_ids().await.is_empty());
}

#[tokio::test]
async fn ctl_bind_mutates_only_the_tasks_own_namespace() {
    let service = Arc::new(TaskService::new());
    let parent = service.alloc("ns", None).await.unwrap();

    // Give the parent a data directory and a task binding.
    let data = mem_leaf(&[("motd", b"greetings")]).await;
    parent
        .ns()
        .bind(&data, ".", "data", BindMode::After)
        .await
        .unwrap();
    let svc: Arc<dyn FileService> = Arc::clone(&service) as Arc<dyn FileService>;
    parent
        .ns()
        .bind(&svc, ".", "task", BindMode::After)
        .await
        .unwrap();

    let child = service.alloc("ns", Some(parent.id())).await.unwrap();

    // Drive the child's ctl through the parent's namespace view.
    let parent_fs: Arc<dyn FileService> = Arc::clone(parent.ns()) as Arc<dyn FileService>;
    let ctx = OpCtx::new();
    let ctl = format!("task/{}/ctl", child.id());
    let mut f = ops::create(&parent_fs, &ctl, &ctx).await.unwrap();
    f.write(b"bind /data /mirror\n").await.unwrap();
    f.close().await.unwrap();

    // The child sees the new binding; the parent does not.
    let child_fs: Arc<dyn FileService> = Arc::clone(child.ns()) as Arc<dyn FileService>;
    let mut f = ops::open(&child_fs, "mirror/motd", &ctx).await.unwrap();
    assert_eq!(read_all(f.as_mut()).await.unwrap(), b"greetings");
    assert!(ops::open(&parent_fs, "mirror/motd", &ctx).await.is_err());
}
