use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Cursor, Write};
use std::path::Path;

use log::{debug, info, warn};
use ndarray::Array2;
use ndarray_npy::{ReadNpyExt, write_npy};
use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, ImageRecord};
use crate::config::{ConfDir, SnapshotDir};
use crate::embedding::EmbeddingStore;
use crate::error::{Result, StoreError};
use crate::snapshot::Snapshot;
use crate::text_index::TextIndex;

/// 索引文件格式版本
pub const FORMAT_VERSION: u32 = 1;

/// 元数据文件，同时记录向量文件的摘要，用于检测不完整的写入
#[derive(Serialize, Deserialize)]
struct CatalogFile {
    version: u32,
    generation: u64,
    dimension: usize,
    rows: usize,
    embeddings_digest: String,
    records: Vec<ImageRecord>,
}

#[derive(Serialize, Deserialize)]
struct TextIndexFile {
    version: u32,
    generation: u64,
    index: TextIndex,
}

/// 快照目录名的前缀
const SNAPSHOT_PREFIX: &str = "snapshot-";

/// 将快照保存到配置目录
///
/// 快照先完整写入一个新目录并落盘，再替换 `CURRENT` 文件完成切换，切换是一次重命名。
/// 切换之前失败或中断时，之前保存的快照仍然可以加载；失败时会删除写了一半的文件
pub fn save(conf_dir: &ConfDir, snapshot: &Snapshot) -> Result<()> {
    fs::create_dir_all(conf_dir.path())?;

    let suffix = Alphanumeric.sample_string(&mut rand::rng(), 8).to_lowercase();
    let name = format!("{}{:08}-{}", SNAPSHOT_PREFIX, snapshot.generation, suffix);
    let staging = conf_dir.snapshot(&format!("{}.tmp", name));
    let target = conf_dir.snapshot(&name);

    let result = write_snapshot(&staging, snapshot)
        .and_then(|_| Ok(fs::rename(staging.path(), target.path())?))
        .and_then(|_| switch_current(conf_dir, &name));
    if let Err(e) = result {
        warn!("保存索引快照 #{} 失败: {}", snapshot.generation, e);
        remove_path(staging.path());
        remove_path(target.path());
        remove_path(&conf_dir.current_tmp());
        return Err(e);
    }
    remove_stale_snapshots(conf_dir, &name);

    info!(
        "已保存索引快照 #{}: {} 张图片, {} 个单词 => {}",
        snapshot.generation,
        snapshot.len(),
        snapshot.text_index.unique_terms(),
        target.path().display()
    );
    Ok(())
}

fn write_snapshot(dir: &SnapshotDir, snapshot: &Snapshot) -> Result<()> {
    fs::create_dir_all(dir.path())?;

    let embeddings_path = dir.embeddings();
    write_npy(&embeddings_path, &snapshot.embeddings.as_array())?;
    sync_file(&embeddings_path)?;
    let embeddings_digest = blake3::hash(&fs::read(&embeddings_path)?).to_hex().to_string();

    let catalog_file = CatalogFile {
        version: FORMAT_VERSION,
        generation: snapshot.generation,
        dimension: snapshot.dimension(),
        rows: snapshot.len(),
        embeddings_digest,
        records: snapshot.catalog.records().to_vec(),
    };
    write_with(&dir.metadata(), |w| Ok(serde_json::to_writer(w, &catalog_file)?))?;

    let text_file = TextIndexFile {
        version: FORMAT_VERSION,
        generation: snapshot.generation,
        index: snapshot.text_index.clone(),
    };
    write_with(&dir.text_index(), |w| Ok(bincode::serialize_into(w, &text_file)?))?;

    sync_dir(dir.path())
}

fn switch_current(conf_dir: &ConfDir, name: &str) -> Result<()> {
    let current_tmp = conf_dir.current_tmp();
    write_with(&current_tmp, |w| Ok(w.write_all(name.as_bytes())?))?;
    fs::rename(&current_tmp, conf_dir.current())?;
    // 切换已经完成，这里失败只影响落盘时机
    if let Err(e) = sync_dir(conf_dir.path()) {
        warn!("同步索引目录失败: {}", e);
    }
    Ok(())
}

/// 删除除 `keep` 以外的快照目录，包括之前中断留下的临时目录
fn remove_stale_snapshots(conf_dir: &ConfDir, keep: &str) {
    let Ok(entries) = fs::read_dir(conf_dir.path()) else {
        return;
    };
    for entry in entries.filter_map(|entry| entry.ok()) {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(SNAPSHOT_PREFIX) && name != keep {
            debug!("删除旧的索引快照: {}", name);
            remove_path(&entry.path());
        }
    }
}

fn remove_path(path: &Path) {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else if path.exists() {
        fs::remove_file(path)
    } else {
        return;
    };
    if let Err(e) = result {
        warn!("删除文件失败: {}: {}", path.display(), e);
    }
}

/// 读取 `CURRENT` 文件，返回当前快照所在的目录
pub fn current_dir(conf_dir: &ConfDir) -> Result<SnapshotDir> {
    let current = conf_dir.current();
    if !current.exists() {
        return Err(StoreError::MissingEmbeddings(current));
    }
    let name = fs::read_to_string(&current)?;
    let name = name.trim();
    let valid = name.starts_with(SNAPSHOT_PREFIX)
        && !name.ends_with(".tmp")
        && !name.contains(['/', '\\']);
    if !valid {
        return Err(StoreError::InconsistentSnapshot(format!("无效的快照目录: {:?}", name)));
    }
    Ok(conf_dir.snapshot(name))
}

/// 从配置目录加载当前快照
///
/// 没有保存过快照或向量文件不存在时返回 [`StoreError::MissingEmbeddings`]；
/// 倒排索引文件不存在时视为空索引
pub fn load(conf_dir: &ConfDir) -> Result<Snapshot> {
    let dir = current_dir(conf_dir)?;
    let embeddings_path = dir.embeddings();
    if !embeddings_path.exists() {
        return Err(StoreError::MissingEmbeddings(embeddings_path));
    }
    let metadata_path = dir.metadata();
    if !metadata_path.exists() {
        return Err(StoreError::InconsistentSnapshot(format!(
            "缺少元数据文件: {}",
            metadata_path.display()
        )));
    }

    let catalog_file: CatalogFile =
        serde_json::from_reader(BufReader::new(File::open(&metadata_path)?))?;
    check_version(catalog_file.version)?;

    let bytes = fs::read(&embeddings_path)?;
    let digest = blake3::hash(&bytes).to_hex().to_string();
    if digest != catalog_file.embeddings_digest {
        return Err(StoreError::InconsistentSnapshot("向量文件与元数据不匹配".to_owned()));
    }
    let data = Array2::<f32>::read_npy(Cursor::new(bytes))?;
    if data.nrows() != catalog_file.rows || data.ncols() != catalog_file.dimension {
        return Err(StoreError::InconsistentSnapshot(format!(
            "向量矩阵形状 {:?} 与元数据 ({}, {}) 不一致",
            data.dim(),
            catalog_file.rows,
            catalog_file.dimension
        )));
    }
    debug!("已读取向量矩阵: {:?}", data.dim());

    let catalog = Catalog::from_records(catalog_file.records)?;

    let text_index_path = dir.text_index();
    let text_index = if text_index_path.exists() {
        let text_file: TextIndexFile =
            bincode::deserialize_from(BufReader::new(File::open(&text_index_path)?))?;
        check_version(text_file.version)?;
        if text_file.generation != catalog_file.generation {
            return Err(StoreError::InconsistentSnapshot(format!(
                "倒排索引版本 #{} 与元数据 #{} 不一致",
                text_file.generation, catalog_file.generation
            )));
        }
        text_file.index
    } else {
        warn!("未找到倒排索引文件，文本搜索将没有结果");
        TextIndex::default()
    };

    let snapshot = Snapshot::new(
        catalog_file.generation,
        EmbeddingStore::from_array(data),
        catalog,
        text_index,
    )?;
    info!(
        "已加载索引快照 #{}: {} 张图片, {} 个单词",
        snapshot.generation,
        snapshot.len(),
        snapshot.text_index.unique_terms()
    );
    Ok(snapshot)
}

fn check_version(found: u32) -> Result<()> {
    if found != FORMAT_VERSION {
        return Err(StoreError::UnsupportedVersion { found, expected: FORMAT_VERSION });
    }
    Ok(())
}

fn write_with<F>(path: &Path, f: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&File>) -> Result<()>,
{
    let file = File::create(path)?;
    let mut writer = BufWriter::new(&file);
    f(&mut writer)?;
    writer.flush()?;
    drop(writer);
    file.sync_all()?;
    Ok(())
}

fn sync_file(path: &Path) -> Result<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(unix)]
fn sync_dir(path: &Path) -> Result<()> {
    sync_file(path)
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> Result<()> {
    Ok(())
}
