use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{info, warn};
use regex::Regex;
use walkdir::WalkDir;

use crate::config::ScanOptions;

/// 根据逗号分隔的后缀列表构建正则，忽略大小写
pub fn suffix_regex(suffix: &str) -> Result<Regex> {
    let suffixes = suffix
        .split(',')
        .map(|s| regex::escape(s.trim().trim_start_matches('.')))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();
    Ok(Regex::new(&format!("(?i)^({})$", suffixes.join("|")))?)
}

/// 扫描目录，返回去重后的图片路径，保持发现顺序
///
/// 不存在或不是目录的路径会被跳过
pub fn scan_directories<P: AsRef<Path>>(dirs: &[P], opts: &ScanOptions) -> Result<Vec<PathBuf>> {
    let re_suf = suffix_regex(&opts.suffix)?;
    let mut seen = HashSet::new();
    let mut images = vec![];

    for dir in dirs {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            warn!("目录不存在，跳过: {}", dir.display());
            continue;
        }
        info!("开始扫描目录: {}", dir.display());

        let mut walker = WalkDir::new(dir).follow_links(true).sort_by_file_name();
        if opts.no_recursive {
            walker = walker.max_depth(1);
        }
        for entry in walker.into_iter().filter_map(|entry| entry.ok()) {
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            let matched =
                path.extension().is_some_and(|ext| re_suf.is_match(&ext.to_string_lossy()));
            if !matched {
                continue;
            }
            let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
            if seen.insert(path.clone()) {
                images.push(path);
            }
        }
    }

    info!("共发现 {} 张图片", images.len());
    Ok(images)
}
