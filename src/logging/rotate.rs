use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use rayon::prelude::*;

use crate::logging;

/// 預設單檔最大大小：10 MB
const DEFAULT_MAX_SIZE: u64 = 10 * 1024 * 1024;
/// 預設保留天數：7 天
const DEFAULT_MAX_AGE_DAYS: u64 = 7;

/// 依日期與檔案大小輪轉的日誌檔
///
/// 日期改變時從 generation 0 開始，超過 `max_size` 時遞增 generation：
/// "log/2025-02-03-app.log"、"log/2025-02-03-app.1.log"、"log/2025-02-03-app.2.log"
pub struct Rotate {
    /// 檔名模式，例如 "log/%Y-%m-%d-app.log"
    fn_pattern: String,
    /// 當前基礎檔名（不含 generation）
    cur_base_fn: String,
    out_fh: Option<BufWriter<File>>,
    generation: u32,
    max_size: u64,
    current_size: u64,
    max_age: Duration,
}

impl Rotate {
    pub fn new(fn_pattern: String) -> Self {
        Self::with_options(fn_pattern, DEFAULT_MAX_SIZE, DEFAULT_MAX_AGE_DAYS)
    }

    pub fn with_options(fn_pattern: String, max_size: u64, max_age_days: u64) -> Self {
        Rotate {
            fn_pattern,
            cur_base_fn: String::new(),
            out_fh: None,
            generation: 0,
            max_size,
            current_size: 0,
            max_age: Duration::from_secs(max_age_days * 24 * 60 * 60),
        }
    }

    /// 寫入訊息，必要時先輪轉
    pub fn write_msg(&mut self, now: DateTime<Local>, msg: &[u8]) -> Result<()> {
        let base_fn = now.format(&self.fn_pattern).to_string();

        if base_fn != self.cur_base_fn || self.out_fh.is_none() {
            self.cur_base_fn = base_fn;
            self.generation = 0;
            self.open_file()?;
            self.cleanup_old_files();
        }

        if self.current_size > 0 && self.current_size + msg.len() as u64 > self.max_size {
            self.generation += 1;
            self.open_file()?;
        }

        let writer = self
            .out_fh
            .as_mut()
            .ok_or_else(|| anyhow!("log file {} is not opened", self.cur_base_fn))?;
        writer.write_all(msg)?;
        writer.flush()?;
        self.current_size += msg.len() as u64;

        Ok(())
    }

    /// 產生完整檔名（含 generation）
    fn full_fn(&self) -> PathBuf {
        let path = Path::new(&self.cur_base_fn);
        if self.generation == 0 {
            return path.to_path_buf();
        }

        let parent = path.parent().unwrap_or(Path::new(""));
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("log");
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("log");
        parent.join(format!("{}.{}.{}", stem, self.generation, ext))
    }

    fn open_file(&mut self) -> Result<()> {
        if let Some(mut old) = self.out_fh.take() {
            let _ = old.flush();
        }

        let filename = self.full_fn();
        if let Some(parent) = filename.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&filename)?;
        self.current_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.out_fh = Some(BufWriter::with_capacity(4096, file));

        Ok(())
    }

    /// 清理超過保留天數的檔案
    fn cleanup_old_files(&self) {
        let Some(dir) = Path::new(&self.cur_base_fn).parent() else {
            return;
        };
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        let Some(cut_off) = SystemTime::now().checked_sub(self.max_age) else {
            return;
        };

        let expired: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "log"))
            .filter(|path| {
                fs::metadata(path)
                    .and_then(|m| m.modified())
                    .is_ok_and(|modified| modified < cut_off)
            })
            .collect();

        expired
            .par_iter()
            .with_min_len(num_cpus::get())
            .for_each(|path| {
                if let Err(why) = fs::remove_file(path) {
                    logging::error_console(format!(
                        "couldn't remove the file({}). because {:?}",
                        path.display(),
                        why
                    ));
                }
            });
    }
}

impl Drop for Rotate {
    fn drop(&mut self) {
        if let Some(writer) = self.out_fh.as_mut() {
            let _ = writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_by_size() {
        let dir = std::env::temp_dir().join(format!("rotate_test_{}", std::process::id()));
        let pattern = format!("{}/%Y-%m-%d-test.log", dir.display());
        let mut rotate = Rotate::with_options(pattern, 16, 7);
        let now = Local::now();

        rotate.write_msg(now, b"0123456789\n").unwrap();
        rotate.write_msg(now, b"0123456789\n").unwrap();

        let base = dir.join(now.format("%Y-%m-%d-test.log").to_string());
        let second = dir.join(now.format("%Y-%m-%d-test.1.log").to_string());
        assert_eq!(fs::read_to_string(&base).unwrap(), "0123456789\n");
        assert_eq!(fs::read_to_string(&second).unwrap(), "0123456789\n");

        drop(rotate);
        let _ = fs::remove_dir_all(&dir);
    }
}
