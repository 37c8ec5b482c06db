// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! State file I/O.

use std::path::{Path, PathBuf};

use serde::{Serialize, de::DeserializeOwned};
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncReadExt, AsyncWriteExt},
};

/// Reads a JSON file, returning `None` if it does not exist.
pub async fn read_json_if_exists<P, T>(path: P) -> std::io::Result<Option<T>>
where
    P: AsRef<Path>,
    T: DeserializeOwned,
{
    let mut buf = Vec::new();
    let mut file = match File::open(path.as_ref()).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    file.read_to_end(&mut buf).await?;
    serde_json::from_slice(&buf)
        .map(Some)
        .map_err(std::io::Error::other)
}

/// Serializes `content` as JSON and replaces the file at `path` with it.
///
/// The content is written to a sibling file first, so readers never observe a partial
/// file.
pub async fn write_json(path: impl AsRef<Path>, content: &impl Serialize) -> std::io::Result<()> {
    let path = path.as_ref();
    let buf = serde_json::to_vec_pretty(content).map_err(std::io::Error::other)?;

    let tmp_path = sibling_tmp_path(path);
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .await?;
    file.write_all(&buf).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, path).await
}

fn sibling_tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Returns a path in the system's temp directory, prefixed with the current thread name.
pub fn tmp_path<S: AsRef<str>>(name: S) -> PathBuf {
    let current_thread = std::thread::current()
        .name()
        .unwrap_or("unnamed")
        .replace("::", "_");
    std::env::temp_dir().join(format!("{current_thread}_{}", name.as_ref()))
}
