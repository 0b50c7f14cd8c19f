use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use caldera::store::Store;

/// A [`Store`] backed by a file, emulating an `EEPROM` that survives
/// restarts of the process.
///
/// A new file is filled with `0xFF`, as an erased memory.
#[derive(Debug)]
pub struct FileStore {
    file: File,
    len: usize,
}

impl FileStore {
    /// Opens the store at `path`, creating it or growing it to at least
    /// `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or grown.
    pub fn open(path: &Path, len: usize) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let current = usize::try_from(file.metadata()?.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "store file too large"))?;
        if current < len {
            debug!("Erasing {} bytes of {}", len - current, path.display());
            let _ = file.seek(SeekFrom::Start(current as u64))?;
            file.write_all(&vec![0xFF; len - current])?;
            file.sync_all()?;
        }

        Ok(Self {
            file,
            len: current.max(len),
        })
    }

    fn seek(&mut self, offset: usize, len: usize) -> io::Result<()> {
        if offset.checked_add(len).is_none_or(|end| end > self.len) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("offset {offset} is outside a store of {} bytes", self.len),
            ));
        }
        let _ = self.file.seek(SeekFrom::Start(offset as u64))?;
        Ok(())
    }
}

impl Store for FileStore {
    type Error = io::Error;

    fn len(&self) -> usize {
        self.len
    }

    fn read_byte(&mut self, offset: usize) -> io::Result<u8> {
        let mut buf = [0];
        self.read_bytes(offset, &mut buf)?;
        Ok(buf[0])
    }

    fn write_byte(&mut self, offset: usize, value: u8) -> io::Result<()> {
        self.seek(offset, 1)?;
        self.file.write_all(&[value])
    }

    fn read_bytes(&mut self, offset: usize, buf: &mut [u8]) -> io::Result<()> {
        self.seek(offset, buf.len())?;
        self.file.read_exact(buf)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use caldera::store::Store;

    use super::FileStore;

    fn path(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("caldera-{}-{name}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn test_new_store_is_erased() {
        let path = path("erased");
        let mut store = FileStore::open(&path, 64).unwrap();

        assert_eq!(store.len(), 64);
        let mut buf = [0; 64];
        store.read_bytes(0, &mut buf).unwrap();
        assert!(buf.iter().all(|byte| *byte == 0xFF));

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_bytes_survive_reopening() {
        let path = path("reopen");
        {
            let mut store = FileStore::open(&path, 32).unwrap();
            store.write_byte(3, 0x42).unwrap();
            store.update_bytes(10, &[1, 2, 3]).unwrap();
        }

        let mut store = FileStore::open(&path, 16).unwrap();
        assert_eq!(store.len(), 32);
        assert_eq!(store.read_byte(3).unwrap(), 0x42);
        let mut buf = [0; 3];
        store.read_bytes(10, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_store_grows() {
        let path = path("grow");
        {
            let mut store = FileStore::open(&path, 8).unwrap();
            store.write_byte(7, 0).unwrap();
        }

        let mut store = FileStore::open(&path, 16).unwrap();
        assert_eq!(store.len(), 16);
        assert_eq!(store.read_byte(7).unwrap(), 0);
        assert_eq!(store.read_byte(8).unwrap(), 0xFF);

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_out_of_range() {
        let path = path("range");
        let mut store = FileStore::open(&path, 8).unwrap();

        assert!(store.write_byte(8, 0).is_err());
        let mut buf = [0; 4];
        assert!(store.read_bytes(6, &mut buf).is_err());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 8);

        std::fs::remove_file(path).unwrap();
    }
}
