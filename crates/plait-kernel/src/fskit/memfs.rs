//! In-memory leaf service.
//!
//! A writable leaf with implicit parent directories. Advertises Creator
//! and Stat, but not Resolver — it is a leaf, and the composites above it
//! own all routing. Content cells are shared between handles, so a
//! truncate through one handle is visible to the rest.

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use plait_types::{FileInfo, FsError, FsResult};
use tokio::sync::RwLock;

use super::node::{DirHandle, cursor_read};
use crate::ctx::OpCtx;
use crate::path;
use crate::service::{File, FileService, ServiceCaps};

#[derive(Clone)]
enum MemNode {
    File {
        data: Arc<RwLock<Vec<u8>>>,
        modified: SystemTime,
    },
    Dir {
        modified: SystemTime,
    },
}

/// In-memory file service. The root is implicit; entries are keyed by
/// their full relative name.
pub struct MemFS {
    entries: RwLock<BTreeMap<String, MemNode>>,
}

impl Default for MemFS {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFS {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Insert a file, creating parent directories. Handy for seeding.
    pub async fn put(&self, name: &str, data: &[u8]) {
        let mut entries = self.entries.write().await;
        Self::ensure_parents(&mut entries, name);
        entries.insert(
            name.to_string(),
            MemNode::File {
                data: Arc::new(RwLock::new(data.to_vec())),
                modified: SystemTime::now(),
            },
        );
    }

    fn ensure_parents(entries: &mut BTreeMap<String, MemNode>, name: &str) {
        let mut current = String::new();
        let Some((parents, _)) = name.rsplit_once('/') else {
            return;
        };
        for seg in parents.split('/') {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(seg);
            entries.entry(current.clone()).or_insert(MemNode::Dir {
                modified: SystemTime::now(),
            });
        }
    }

    fn info_for(name: &str, node: &MemNode, size: u64) -> FileInfo {
        match node {
            MemNode::File { modified, .. } => {
                let mut info = FileInfo::file(path::base(name), size);
                info.modified = Some(*modified);
                info
            }
            MemNode::Dir { modified } => {
                let mut info = FileInfo::dir(path::base(name));
                info.modified = Some(*modified);
                info
            }
        }
    }

    async fn list(&self, name: &str) -> Vec<FileInfo> {
        let entries = self.entries.read().await;
        let prefix = if name == "." {
            String::new()
        } else {
            format!("{name}/")
        };

        let mut out = Vec::new();
        for (key, node) in entries.iter() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            if rest.is_empty() || rest.contains('/') {
                continue;
            }
            let size = match node {
                MemNode::File { data, .. } => data.read().await.len() as u64,
                MemNode::Dir { .. } => 0,
            };
            out.push(Self::info_for(key, node, size));
        }
        out
    }
}

#[async_trait]
impl FileService for MemFS {
    fn caps(&self) -> ServiceCaps {
        ServiceCaps {
            creator: true,
            stat: true,
            ..Default::default()
        }
    }

    async fn open(&self, name: &str, _ctx: &OpCtx) -> FsResult<Box<dyn File>> {
        if name == "." {
            return Ok(Box::new(DirHandle::new(FileInfo::dir("."), self.list(".").await)));
        }
        let node = self.entries.read().await.get(name).cloned();
        match node {
            Some(MemNode::File { data, modified }) => Ok(Box::new(MemFile {
                name: path::base(name).to_string(),
                data,
                modified,
                pos: 0,
            })),
            Some(MemNode::Dir { modified }) => {
                let mut info = FileInfo::dir(path::base(name));
                info.modified = Some(modified);
                Ok(Box::new(DirHandle::new(info, self.list(name).await)))
            }
            None => Err(FsError::not_exist("open", name)),
        }
    }

    async fn create(&self, name: &str, _ctx: &OpCtx) -> FsResult<Box<dyn File>> {
        if name == "." {
            return Err(FsError::permission("create", name));
        }
        let mut entries = self.entries.write().await;
        let existing = entries.get(name).cloned();
        match existing {
            Some(MemNode::Dir { .. }) => Err(FsError::permission("create", name)),
            Some(MemNode::File { data, .. }) => {
                // Truncate in place so existing handles observe it.
                drop(entries);
                data.write().await.clear();
                Ok(Box::new(MemFile {
                    name: path::base(name).to_string(),
                    data,
                    modified: SystemTime::now(),
                    pos: 0,
                }))
            }
            None => {
                Self::ensure_parents(&mut entries, name);
                let data = Arc::new(RwLock::new(Vec::new()));
                entries.insert(
                    name.to_string(),
                    MemNode::File {
                        data: Arc::clone(&data),
                        modified: SystemTime::now(),
                    },
                );
                Ok(Box::new(MemFile {
                    name: path::base(name).to_string(),
                    data,
                    modified: SystemTime::now(),
                    pos: 0,
                }))
            }
        }
    }

    async fn stat(&self, name: &str, _ctx: &OpCtx) -> FsResult<FileInfo> {
        if name == "." {
            return Ok(FileInfo::dir("."));
        }
        let node = self.entries.read().await.get(name).cloned();
        match node {
            Some(node @ MemNode::File { .. }) => {
                let size = match &node {
                    MemNode::File { data, .. } => data.read().await.len() as u64,
                    MemNode::Dir { .. } => 0,
                };
                Ok(Self::info_for(name, &node, size))
            }
            Some(node @ MemNode::Dir { .. }) => Ok(Self::info_for(name, &node, 0)),
            None => Err(FsError::not_exist("stat", name)),
        }
    }
}

struct MemFile {
    name: String,
    data: Arc<RwLock<Vec<u8>>>,
    modified: SystemTime,
    pos: usize,
}

#[async_trait]
impl File for MemFile {
    async fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        let data = self.data.read().await;
        Ok(cursor_read(&data, &mut self.pos, buf))
    }

    async fn write(&mut self, data: &[u8]) -> FsResult<usize> {
        let mut cell = self.data.write().await;
        if self.pos > cell.len() {
            cell.resize(self.pos, 0);
        }
        let overlap = data.len().min(cell.len() - self.pos);
        cell[self.pos..self.pos + overlap].copy_from_slice(&data[..overlap]);
        cell.extend_from_slice(&data[overlap..]);
        self.pos += data.len();
        Ok(data.len())
    }

    async fn seek(&mut self, pos: SeekFrom) -> FsResult<u64> {
        let len = self.data.read().await.len() as i64;
        let new = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => len + n,
            SeekFrom::Current(n) => self.pos as i64 + n,
        };
        if new < 0 {
            return Err(FsError::invalid("seek", self.name.clone()));
        }
        self.pos = new as usize;
        Ok(new as u64)
    }

    async fn stat(&self) -> FsResult<FileInfo> {
        let size = self.data.read().await.len() as u64;
        let mut info = FileInfo::file(&self.name, size);
        info.modified = Some(self.modified);
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::read_all;

    #[tokio::test]
    async fn put_creates_implicit_parents() {
        let fs = MemFS::new();
        fs.put("a/b/c.txt", b"x").await;
        let ctx = OpCtx::new();

        let info = fs.stat("a", &ctx).await.unwrap();
        assert!(info.is_dir());
        let info = fs.stat("a/b", &ctx).await.unwrap();
        assert!(info.is_dir());
    }

    #[tokio::test]
    async fn listings_are_sorted_and_direct() {
        let fs = MemFS::new();
        fs.put("b.txt", b"").await;
        fs.put("a/deep.txt", b"").await;
        fs.put("c.txt", b"").await;
        let ctx = OpCtx::new();

        let mut root = fs.open(".", &ctx).await.unwrap();
        let names: Vec<String> = root
            .read_dir()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["a", "b.txt", "c.txt"]);
    }

    #[tokio::test]
    async fn create_truncates_existing_content() {
        let fs = MemFS::new();
        fs.put("x", b"old old old").await;
        let ctx = OpCtx::new();

        let mut f = fs.create("x", &ctx).await.unwrap();
        f.write(b"new").await.unwrap();
        f.close().await.unwrap();

        let mut f = fs.open("x", &ctx).await.unwrap();
        assert_eq!(read_all(f.as_mut()).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn create_on_a_directory_is_permission() {
        let fs = MemFS::new();
        fs.put("d/f", b"").await;
        let err = fs.create("d", &OpCtx::new()).await.unwrap_err();
        assert_eq!(err.kind, plait_types::ErrKind::Permission);
    }

    #[tokio::test]
    async fn write_at_cursor_overwrites_and_extends() {
        let fs = MemFS::new();
        fs.put("f", b"hello world").await;
        let ctx = OpCtx::new();

        let mut f = fs.open("f", &ctx).await.unwrap();
        f.seek(SeekFrom::Start(6)).await.unwrap();
        f.write(b"plan 9!").await.unwrap();
        f.close().await.unwrap();

        let mut f = fs.open("f", &ctx).await.unwrap();
        assert_eq!(read_all(f.as_mut()).await.unwrap(), b"hello plan 9!");
    }

    #[tokio::test]
    async fn missing_names_are_not_exist() {
        let fs = MemFS::new();
        let err = fs.open("ghost", &OpCtx::new()).await.unwrap_err();
        assert!(err.is_not_exist());
    }
}
