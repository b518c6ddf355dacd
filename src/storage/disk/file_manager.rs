use log::{debug, info};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::storage::block::BlockId;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::Page;

/// Files whose names start with this prefix are scratch files and are removed on startup.
const TEMP_FILE_PREFIX: &str = "temp";

/// Block-granular access to the files of one database directory.
///
/// All operations go through a single mutex, so a read, write or append is
/// atomic with respect to every other operation on any file. Handles are
/// opened lazily and cached for the lifetime of the manager.
pub struct FileManager {
    dir: PathBuf,
    block_size: usize,
    is_new: bool,
    open_files: Mutex<HashMap<String, File>>,
}

impl FileManager {
    /// Opens the database directory, creating it if it does not exist.
    pub fn new(dir: &Path, block_size: usize) -> StorageResult<Self> {
        let is_new = !dir.exists();
        if is_new {
            fs::create_dir_all(dir)?;
            info!("Created database directory {:?}", dir);
        }

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_name().to_string_lossy().starts_with(TEMP_FILE_PREFIX) {
                continue;
            }
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
            debug!("Removed leftover temporary file {:?}", path);
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            block_size,
            is_new,
            open_files: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// True if the directory was created by this manager.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Reads `block` into `page`. Fails with `BlockNotFound` if the block lies
    /// beyond the end of the file.
    pub fn read(&self, block: &BlockId, page: &mut Page) -> StorageResult<()> {
        self.check_page(page)?;

        let mut files = self.open_files.lock();
        let file = self.file(&mut files, block.file_name())?;

        let offset = self.block_offset(block)?;
        match offset.checked_add(self.block_size as u64) {
            Some(end) if end <= file.metadata()?.len() => {}
            _ => {
                return Err(StorageError::BlockNotFound {
                    block: block.clone(),
                })
            }
        }

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(page.contents_mut())?;
        Ok(())
    }

    /// Writes `page` to `block` and syncs the data to stable storage.
    /// Writing past the end of the file extends it.
    pub fn write(&self, block: &BlockId, page: &Page) -> StorageResult<()> {
        self.check_page(page)?;

        let mut files = self.open_files.lock();
        let file = self.file(&mut files, block.file_name())?;

        file.seek(SeekFrom::Start(self.block_offset(block)?))?;
        file.write_all(page.contents())?;
        file.sync_data()?;
        Ok(())
    }

    /// Extends `file_name` by one zero-filled block and returns its id.
    pub fn append(&self, file_name: &str) -> StorageResult<BlockId> {
        let mut files = self.open_files.lock();
        let file = self.file(&mut files, file_name)?;

        let number = self.block_count(file)?;
        file.set_len((number + 1) * self.block_size as u64)?;

        debug!("Appended block {} to {}", number, file_name);
        Ok(BlockId::new(file_name, number))
    }

    /// Number of whole blocks in `file_name`. A missing file is created empty.
    pub fn length(&self, file_name: &str) -> StorageResult<u64> {
        let mut files = self.open_files.lock();
        let file = self.file(&mut files, file_name)?;
        self.block_count(file)
    }

    /// Names of the regular files in the database directory, sorted.
    pub fn list_files(&self) -> StorageResult<Vec<String>> {
        let _guard = self.open_files.lock();
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn file<'a>(
        &self,
        files: &'a mut HashMap<String, File>,
        file_name: &str,
    ) -> StorageResult<&'a mut File> {
        match files.entry(file_name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let path = self.dir.join(file_name);
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&path)?;
                debug!("Opened {:?}", path);
                Ok(entry.insert(file))
            }
        }
    }

    fn block_count(&self, file: &File) -> StorageResult<u64> {
        Ok(file.metadata()?.len() / self.block_size as u64)
    }

    /// Byte offset of `block`. No file can reach a block whose offset overflows.
    fn block_offset(&self, block: &BlockId) -> StorageResult<u64> {
        block
            .number()
            .checked_mul(self.block_size as u64)
            .ok_or_else(|| StorageError::BlockNotFound {
                block: block.clone(),
            })
    }

    fn check_page(&self, page: &Page) -> StorageResult<()> {
        if page.len() != self.block_size {
            return Err(StorageError::PageSizeMismatch {
                expected: self.block_size,
                actual: page.len(),
            });
        }
        Ok(())
    }
}
