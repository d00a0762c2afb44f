use std::collections::VecDeque;
use std::fs::create_dir_all;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;

use tracing::error;

use crate::Result;

pub fn create_parent_dir_if_not_exist(path: &Path) -> Result<()> {
    if let Some(parent_dir) = path.parent() {
        if !parent_dir.exists() {
            if let Err(e) = create_dir_all(parent_dir) {
                error!("Failed to create log directory: {:?}", e);
                return Err(e.into());
            }
        }
    }
    Ok(())
}

pub fn open_file_for_append(path: &Path) -> Result<File> {
    create_parent_dir_if_not_exist(path)?;
    let file = OpenOptions::new().append(true).create(true).open(path)?;
    Ok(file)
}

/// Returns the last `n` lines of a text file, or an empty string if it is missing.
pub fn read_tail(
    path: &Path,
    n: usize,
) -> String {
    if n == 0 {
        return String::new();
    }
    let Ok(file) = File::open(path) else {
        return String::new();
    };
    let mut tail = VecDeque::with_capacity(n);
    for line in BufReader::new(file).lines().map_while(|l| l.ok()) {
        if tail.len() == n {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}
