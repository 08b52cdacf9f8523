use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::Result;
use imfind::config::ConfDir;
use imfind::persist;
use imfind::{IMDB, IMDBBuilder, IndexItem, OcrPayload, StoreError};
use rstest::*;
use tempfile::TempDir;

const DIM: usize = 4;

fn items(prefix: &str, n: usize) -> Vec<IndexItem> {
    (0..n)
        .map(|i| {
            let mut vector = vec![0.1; DIM];
            vector[i % DIM] = 1.0 + i as f32;
            let words = vec![prefix.to_owned(), format!("img{}", i)];
            IndexItem::new(format!("/{}/{}.jpg", prefix, i), vector)
                .with_ocr(Some(OcrPayload::new(words.join(" "), words)))
                .with_byte_size(1000)
        })
        .collect()
}

#[fixture]
fn conf_dir() -> (TempDir, ConfDir) {
    let dir = TempDir::new().unwrap();
    let conf_dir = ConfDir::new(dir.path().join("index"));
    (dir, conf_dir)
}

fn open(conf_dir: &ConfDir) -> IMDB {
    IMDBBuilder::new(conf_dir.clone()).dimension(DIM).open()
}

#[rstest]
fn reopen_restores_snapshot(conf_dir: (TempDir, ConfDir)) -> Result<()> {
    let (_dir, conf_dir) = conf_dir;
    let db = open(&conf_dir);
    assert!(!db.is_indexed());
    db.rebuild(items("old", 3))?;
    db.rebuild(items("new", 5))?;
    let before = db.statistics();
    drop(db);

    let db = open(&conf_dir);
    let after = db.statistics();
    assert_eq!(before, after);
    assert_eq!(after.image_count, 5);
    assert_eq!(after.generation, 2);
    assert_eq!(db.search_by_text("img4", 10)?[0].path, "/new/4.jpg");
    assert!(db.search_by_text("old", 10)?.is_empty());
    Ok(())
}

#[rstest]
fn reopen_with_other_dimension_is_not_indexed(conf_dir: (TempDir, ConfDir)) -> Result<()> {
    let (_dir, conf_dir) = conf_dir;
    open(&conf_dir).rebuild(items("a", 2))?;

    let db = IMDBBuilder::new(conf_dir.clone()).dimension(DIM + 1).open();
    assert!(!db.is_indexed());
    assert!(matches!(db.search_by_text("a", 1), Err(StoreError::NotIndexed)));
    Ok(())
}

#[rstest]
fn corrupt_snapshot_fails_closed(conf_dir: (TempDir, ConfDir)) -> Result<()> {
    let (_dir, conf_dir) = conf_dir;
    open(&conf_dir).rebuild(items("a", 2))?;
    std::fs::write(persist::current_dir(&conf_dir)?.embeddings(), b"garbage")?;

    assert!(!open(&conf_dir).is_indexed());
    Ok(())
}

#[rstest]
fn reload_picks_up_new_snapshot(conf_dir: (TempDir, ConfDir)) -> Result<()> {
    let (_dir, conf_dir) = conf_dir;
    let reader = open(&conf_dir);
    let writer = open(&conf_dir);
    writer.rebuild(items("a", 3))?;

    assert!(!reader.is_indexed());
    reader.reload()?;
    assert_eq!(reader.statistics().image_count, 3);
    Ok(())
}

#[rstest]
fn concurrent_readers_see_whole_snapshots() -> Result<()> {
    let db = Arc::new(IMDBBuilder::in_memory().dimension(DIM).open());
    db.rebuild(items("old", 3))?;

    let done = Arc::new(AtomicBool::new(false));
    let readers = (0..4)
        .map(|_| {
            let db = db.clone();
            let done = done.clone();
            thread::spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    let old = db.search_by_text("old", 100).unwrap().len();
                    let new = db.search_by_text("new", 100).unwrap().len();
                    let snapshot = db.snapshot().unwrap();
                    assert_eq!(snapshot.embeddings().len(), snapshot.catalog().len());
                    assert!(matches!(snapshot.len(), 3 | 7));
                    // 两次查询之间可能发生切换，但不会看到半个快照
                    assert!(matches!((old, new), (3, 0) | (0, 7) | (3, 7) | (0, 0)));
                }
            })
        })
        .collect::<Vec<_>>();

    for i in 0..20 {
        if i % 2 == 0 {
            db.rebuild(items("new", 7))?;
        } else {
            db.rebuild(items("old", 3))?;
        }
    }
    done.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(db.statistics().generation, 21);
    Ok(())
}

#[rstest]
fn second_rebuild_is_rejected() -> Result<()> {
    let db = Arc::new(IMDBBuilder::in_memory().dimension(DIM).open());
    let guard = db.try_begin_rebuild()?;

    let other = {
        let db = db.clone();
        thread::spawn(move || db.rebuild(items("a", 1)))
    };
    assert!(matches!(other.join().unwrap(), Err(StoreError::RebuildInProgress)));

    let stats = guard.commit(items("b", 2))?;
    assert_eq!(stats.indexed, 2);
    assert!(!db.is_rebuilding());
    Ok(())
}

#[rstest]
fn hybrid_union_of_text_and_vector(conf_dir: (TempDir, ConfDir)) -> Result<()> {
    let (_dir, conf_dir) = conf_dir;
    let db = open(&conf_dir);
    db.rebuild(items("a", 4))?;

    // 向量命中 0 号图片，文字命中 3 号图片
    let mut query = vec![0.1; DIM];
    query[0] = 1.0;
    let results = db.hybrid_search(Some(&query), Some("img3"), None)?;
    let paths = results.iter().map(|r| r.path.as_str()).collect::<Vec<_>>();
    assert_eq!(paths, vec!["/a/0.jpg", "/a/3.jpg"]);
    assert!(results[0].visual_score.is_some());
    assert!(!results[0].text_match);
    assert!(results[1].text_match);
    Ok(())
}
