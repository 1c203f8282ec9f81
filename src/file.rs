//! Macintosh files in memory and on the local filesystem.
//!
//! [`MacFile`] is the two-fork file every extracted entry becomes.
//! [`FilePacker`] receives those files; [`LocalPacker`] writes them to a
//! directory using one of the [`ForkLayout`]s. [`UnPacked`] goes the other
//! way and reads a local file (plus its `.rsrc` sidecar) into a `MacFile`.

use crate::entry::{MacTime, StuffitEntry};
use crate::ExtractOptions;
use crate::SitError;
use log::debug;
use std::borrow::Cow;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// Suffix of the sidecar holding a resource fork.
pub const RSRC_SUFFIX: &str = ".rsrc";
/// Prefix of an AppleDouble sidecar.
pub const APPLE_DOUBLE_PREFIX: &str = "._";

const APPLE_DOUBLE_MAGIC: u32 = 0x0005_1607;
const APPLE_DOUBLE_VERSION: u32 = 0x0002_0000;
const ENTRY_RESOURCE_FORK: u32 = 2;
const ENTRY_FINDER_INFO: u32 = 9;

/// A classic Macintosh file: two forks plus Finder metadata.
///
/// Forks borrow from the archive when they were stored uncompressed and own
/// their bytes otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacFile<'a> {
    pub name: String,
    /// Enclosing folders, outermost first.
    pub parents: &'a [String],
    pub data: Cow<'a, [u8]>,
    pub res: Cow<'a, [u8]>,
    pub file_type: [u8; 4],
    pub creator: [u8; 4],
    pub finder_flags: u16,
    pub created: MacTime,
    pub modified: MacTime,
}

impl<'a> MacFile<'a> {
    /// A file carrying `entry`'s name and metadata, with empty forks.
    pub fn from_entry(entry: &'a StuffitEntry) -> Self {
        Self {
            name: entry.name.clone(),
            parents: &entry.parents,
            data: Cow::Borrowed(&[]),
            res: Cow::Borrowed(&[]),
            file_type: entry.file_type,
            creator: entry.creator,
            finder_flags: entry.finder_flags,
            created: entry.created,
            modified: entry.modified,
        }
    }

    /// The 32-byte Finder info record (type, creator, flags; the rest zero).
    pub fn finder_info(&self) -> [u8; 32] {
        let mut info = [0u8; 32];
        info[0..4].copy_from_slice(&self.file_type);
        info[4..8].copy_from_slice(&self.creator);
        info[8..10].copy_from_slice(&self.finder_flags.to_be_bytes());
        info
    }
}

/// Receives extracted folders and files.
///
/// Folders arrive before anything inside them. With parallel extraction
/// files arrive from several threads at once.
pub trait FilePacker: Sync {
    fn create_dir(&self, entry: &StuffitEntry) -> Result<(), SitError>;

    fn pack(&self, file: &MacFile<'_>) -> Result<(), SitError>;
}

/// How forks are laid out on the local filesystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ForkLayout {
    /// Data fork at `name`, resource fork at `name.rsrc`.
    #[default]
    Rsrc,
    /// Data fork only; resource forks are dropped.
    #[value(name = "data")]
    DataOnly,
    /// Data fork at `name`, Finder info and resource fork in `._name`.
    #[value(name = "appledouble")]
    AppleDouble,
    /// Real resource fork and Finder info (macOS); `Rsrc` elsewhere.
    Native,
}

/// Make one archive name safe to use as a single path component.
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|&c| c != '\r')
        .map(|c| match c {
            '/' | '\0' => '_',
            _ => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Build an AppleDouble (version 2) sidecar with Finder info and the
/// resource fork.
pub fn build_apple_double(finder_info: &[u8; 32], rsrc: &[u8]) -> Vec<u8> {
    let finder_offset: u32 = 26 + 2 * 12;
    let rsrc_offset = finder_offset + finder_info.len() as u32;

    let mut buf = Vec::with_capacity(rsrc_offset as usize + rsrc.len());
    buf.extend_from_slice(&APPLE_DOUBLE_MAGIC.to_be_bytes());
    buf.extend_from_slice(&APPLE_DOUBLE_VERSION.to_be_bytes());
    buf.extend_from_slice(&[0; 16]);
    buf.extend_from_slice(&2u16.to_be_bytes());

    for (id, offset, len) in [
        (ENTRY_FINDER_INFO, finder_offset, finder_info.len() as u32),
        (ENTRY_RESOURCE_FORK, rsrc_offset, rsrc.len() as u32),
    ] {
        buf.extend_from_slice(&id.to_be_bytes());
        buf.extend_from_slice(&offset.to_be_bytes());
        buf.extend_from_slice(&len.to_be_bytes());
    }

    buf.extend_from_slice(finder_info);
    buf.extend_from_slice(rsrc);
    buf
}

/// Writes extracted entries below a root directory.
#[derive(Debug, Clone)]
pub struct LocalPacker {
    root: PathBuf,
    layout: ForkLayout,
    restore_times: bool,
}

impl LocalPacker {
    pub fn new(root: impl Into<PathBuf>, layout: ForkLayout) -> Self {
        Self {
            root: root.into(),
            layout,
            restore_times: true,
        }
    }

    pub fn from_options(root: impl Into<PathBuf>, options: &ExtractOptions) -> Self {
        Self::new(root, options.layout).restore_times(options.restore_times)
    }

    /// Set file modification times from the archive (on by default).
    pub fn restore_times(mut self, restore: bool) -> Self {
        self.restore_times = restore;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path of an entry given its folders and name.
    pub fn path_for<'s>(&self, parents: impl IntoIterator<Item = &'s str>, name: &str) -> PathBuf {
        let mut path = self.root.clone();
        for component in parents {
            path.push(sanitize_component(component));
        }
        path.push(sanitize_component(name));
        path
    }

    fn write(&self, path: &Path, bytes: &[u8], modified: MacTime) -> io::Result<()> {
        fs::write(path, bytes)?;
        if self.restore_times {
            File::options()
                .write(true)
                .open(path)?
                .set_modified(modified.to_system_time())?;
        }
        Ok(())
    }

    fn write_rsrc_sidecar(&self, path: &Path, file: &MacFile<'_>) -> io::Result<()> {
        if !file.data.is_empty() || file.res.is_empty() {
            self.write(path, &file.data, file.modified)?;
        }
        if !file.res.is_empty() {
            self.write(&with_suffix(path, RSRC_SUFFIX), &file.res, file.modified)?;
        }
        Ok(())
    }

    fn write_apple_double(&self, path: &Path, file: &MacFile<'_>) -> io::Result<()> {
        self.write(path, &file.data, file.modified)?;
        let info = file.finder_info();
        if !file.res.is_empty() || info != [0u8; 32] {
            let sidecar = with_prefix(path, APPLE_DOUBLE_PREFIX);
            self.write(&sidecar, &build_apple_double(&info, &file.res), file.modified)?;
        }
        Ok(())
    }

    #[cfg(target_os = "macos")]
    fn write_native(&self, path: &Path, file: &MacFile<'_>) -> io::Result<()> {
        fs::write(path, &file.data)?;
        if !file.res.is_empty() {
            fs::write(path.join("..namedfork/rsrc"), &file.res)?;
        }
        if let Err(e) = native::set_finder_info(path, &file.finder_info()) {
            log::warn!("Cannot set Finder info on {}: {}", path.display(), e);
        }
        if self.restore_times {
            File::options()
                .write(true)
                .open(path)?
                .set_modified(file.modified.to_system_time())?;
        }
        Ok(())
    }

    #[cfg(not(target_os = "macos"))]
    fn write_native(&self, path: &Path, file: &MacFile<'_>) -> io::Result<()> {
        self.write_rsrc_sidecar(path, file)
    }
}

impl FilePacker for LocalPacker {
    fn create_dir(&self, entry: &StuffitEntry) -> Result<(), SitError> {
        let path = self.path_for(entry.parents.iter().map(String::as_str), &entry.name);
        debug!("Creating folder {}", path.display());
        fs::create_dir_all(&path)?;

        #[cfg(target_os = "macos")]
        {
            if self.layout == ForkLayout::Native && entry.finder_flags != 0 {
                let mut info = [0u8; 32];
                info[8..10].copy_from_slice(&entry.finder_flags.to_be_bytes());
                if let Err(e) = native::set_finder_info(&path, &info) {
                    log::warn!("Cannot set Finder info on {}: {}", path.display(), e);
                }
            }
        }
        Ok(())
    }

    fn pack(&self, file: &MacFile<'_>) -> Result<(), SitError> {
        let path = self.path_for(file.parents.iter().map(String::as_str), &file.name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        debug!(
            "Writing {} (data: {} bytes, rsrc: {} bytes)",
            path.display(),
            file.data.len(),
            file.res.len()
        );

        match self.layout {
            ForkLayout::Rsrc => self.write_rsrc_sidecar(&path, file)?,
            ForkLayout::DataOnly => self.write(&path, &file.data, file.modified)?,
            ForkLayout::AppleDouble => self.write_apple_double(&path, file)?,
            ForkLayout::Native => self.write_native(&path, file)?,
        }
        Ok(())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn with_prefix(path: &Path, prefix: &str) -> PathBuf {
    let mut name = std::ffi::OsString::from(prefix);
    name.push(path.file_name().unwrap_or_default());
    path.with_file_name(name)
}

#[cfg(target_os = "macos")]
mod native {
    use std::ffi::CString;
    use std::io;
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    pub(super) fn set_finder_info(path: &Path, info: &[u8; 32]) -> io::Result<()> {
        let path_c = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        // SAFETY: both strings are NUL-terminated and `info` outlives the call.
        let rc = unsafe {
            libc::setxattr(
                path_c.as_ptr(),
                c"com.apple.FinderInfo".as_ptr(),
                info.as_ptr() as *const libc::c_void,
                info.len(),
                0,
                0,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// A local file read into memory, possibly together with its `.rsrc`
/// sidecar.
#[derive(Debug, Clone)]
pub struct UnPacked {
    /// The path that was asked for.
    pub input: PathBuf,
    pub input_bytes: Vec<u8>,
    /// The matching data or resource file, when one exists.
    pub other: Option<PathBuf>,
    pub other_bytes: Vec<u8>,
    input_is_rsrc: bool,
    modified: MacTime,
}

impl UnPacked {
    /// Read `input`. `foo` picks up `foo.rsrc` as its resource fork, and
    /// `foo.rsrc` picks up `foo` as its data fork.
    pub fn read_local(input: impl AsRef<Path>) -> Result<Self, SitError> {
        let input = input.as_ref().to_path_buf();
        let input_bytes = fs::read(&input)?;

        let name = input.file_name().unwrap_or_default().to_string_lossy();
        let input_is_rsrc = name.len() > RSRC_SUFFIX.len() && name.ends_with(RSRC_SUFFIX);
        let other_path = if input_is_rsrc {
            input.with_file_name(&name[..name.len() - RSRC_SUFFIX.len()])
        } else {
            with_suffix(&input, RSRC_SUFFIX)
        };

        let (other, other_bytes) = if other_path.is_file() {
            let bytes = fs::read(&other_path)?;
            debug!("Read {} with {}", input.display(), other_path.display());
            (Some(other_path), bytes)
        } else {
            (None, Vec::new())
        };

        let data_path = match (&other, input_is_rsrc) {
            (Some(other), true) => other,
            _ => &input,
        };
        let modified = fs::metadata(data_path)?
            .modified()
            .map(MacTime::from_system_time)
            .unwrap_or_default();

        Ok(Self {
            input,
            input_bytes,
            other,
            other_bytes,
            input_is_rsrc,
            modified,
        })
    }

    /// The file's forks, borrowed from the buffers read.
    pub fn file(&self) -> MacFile<'_> {
        let (data, res) = if self.input_is_rsrc {
            (&self.other_bytes, &self.input_bytes)
        } else {
            (&self.input_bytes, &self.other_bytes)
        };

        let mut name = self
            .input
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();
        if self.input_is_rsrc {
            name.truncate(name.len() - RSRC_SUFFIX.len());
        }

        MacFile {
            name,
            data: Cow::Borrowed(data),
            res: Cow::Borrowed(res),
            created: self.modified,
            modified: self.modified,
            ..MacFile::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;

    fn sample_file(parents: &[String]) -> MacFile<'_> {
        MacFile {
            name: "Read Me".into(),
            parents,
            data: Cow::Borrowed(b"data fork"),
            res: Cow::Owned(b"resource fork".to_vec()),
            file_type: *b"TEXT",
            creator: *b"ttxt",
            finder_flags: 0x0100,
            created: MacTime(0xB000_0000),
            modified: MacTime(0xB000_0000),
        }
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("a/b"), "a_b");
        assert_eq!(sanitize_component("Icon\r"), "Icon");
        assert_eq!(sanitize_component("nul\0byte"), "nul_byte");
        assert_eq!(sanitize_component(".."), "_");
        assert_eq!(sanitize_component("."), "_");
        assert_eq!(sanitize_component(""), "_");
        assert_eq!(sanitize_component("\r"), "_");
        assert_eq!(sanitize_component("caf\u{e9}"), "caf\u{e9}");
    }

    #[test]
    fn test_path_for_stays_below_root() {
        let packer = LocalPacker::new("/out", ForkLayout::Rsrc);
        let path = packer.path_for(["..", "a/b"], "..");
        assert_eq!(path, Path::new("/out/_/a_b/_"));
    }

    #[test]
    fn test_apple_double_layout() {
        let file = sample_file(&[]);
        let ad = build_apple_double(&file.finder_info(), &file.res);
        assert_eq!(&ad[0..4], &APPLE_DOUBLE_MAGIC.to_be_bytes());
        assert_eq!(&ad[4..8], &APPLE_DOUBLE_VERSION.to_be_bytes());
        assert_eq!(&ad[24..26], &[0, 2]);
        assert_eq!(&ad[26..30], &ENTRY_FINDER_INFO.to_be_bytes());
        assert_eq!(&ad[50..54], b"TEXT");
        assert_eq!(&ad[54..58], b"ttxt");
        assert_eq!(&ad[58..60], &[0x01, 0x00]);
        let rsrc_offset = u32::from_be_bytes([ad[42], ad[43], ad[44], ad[45]]) as usize;
        assert_eq!(&ad[rsrc_offset..], b"resource fork");
    }

    #[test]
    fn test_rsrc_layout_writes_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let parents = vec!["Folder".to_string()];
        let packer = LocalPacker::new(dir.path(), ForkLayout::Rsrc);
        packer.pack(&sample_file(&parents)).unwrap();

        let base = dir.path().join("Folder");
        assert_eq!(fs::read(base.join("Read Me")).unwrap(), b"data fork");
        assert_eq!(fs::read(base.join("Read Me.rsrc")).unwrap(), b"resource fork");

        let mtime = fs::metadata(base.join("Read Me")).unwrap().modified().unwrap();
        assert_eq!(mtime, MacTime(0xB000_0000).to_system_time());
    }

    #[test]
    fn test_data_only_and_apple_double_layouts() {
        let dir = tempfile::tempdir().unwrap();
        let file = sample_file(&[]);

        let data_dir = dir.path().join("data");
        LocalPacker::new(&data_dir, ForkLayout::DataOnly)
            .restore_times(false)
            .pack(&file)
            .unwrap();
        assert!(data_dir.join("Read Me").is_file());
        assert!(!data_dir.join("Read Me.rsrc").exists());

        let ad_dir = dir.path().join("ad");
        LocalPacker::new(&ad_dir, ForkLayout::AppleDouble)
            .pack(&file)
            .unwrap();
        let sidecar = fs::read(ad_dir.join("._Read Me")).unwrap();
        assert!(sidecar.ends_with(b"resource fork"));
    }

    #[test]
    fn test_resource_only_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = sample_file(&[]);
        file.data = Cow::Borrowed(&[]);
        LocalPacker::new(dir.path(), ForkLayout::Rsrc)
            .pack(&file)
            .unwrap();
        assert!(!dir.path().join("Read Me").exists());
        assert!(dir.path().join("Read Me.rsrc").is_file());
    }

    #[test]
    fn test_create_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut entry = StuffitEntry::new(EntryKind::Folder);
        entry.name = "Inner".into();
        entry.parents = vec!["Outer".into()];
        LocalPacker::new(dir.path(), ForkLayout::Rsrc)
            .create_dir(&entry)
            .unwrap();
        assert!(dir.path().join("Outer/Inner").is_dir());
    }

    #[test]
    fn test_unpacked_pairs_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("Thing");
        fs::write(&data_path, b"DATA").unwrap();
        fs::write(dir.path().join("Thing.rsrc"), b"RSRC").unwrap();

        let from_data = UnPacked::read_local(&data_path).unwrap();
        let file = from_data.file();
        assert_eq!(file.name, "Thing");
        assert_eq!(&*file.data, b"DATA");
        assert_eq!(&*file.res, b"RSRC");

        let from_rsrc = UnPacked::read_local(dir.path().join("Thing.rsrc")).unwrap();
        assert_eq!(from_rsrc.other.as_deref(), Some(data_path.as_path()));
        let file = from_rsrc.file();
        assert_eq!(file.name, "Thing");
        assert_eq!(&*file.data, b"DATA");
        assert_eq!(&*file.res, b"RSRC");
    }

    #[test]
    fn test_unpacked_without_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alone.sit");
        fs::write(&path, b"bytes").unwrap();
        let unpacked = UnPacked::read_local(&path).unwrap();
        assert!(unpacked.other.is_none());
        assert!(unpacked.file().res.is_empty());

        assert!(matches!(
            UnPacked::read_local(dir.path().join("missing")),
            Err(SitError::Io(_))
        ));
    }
}
