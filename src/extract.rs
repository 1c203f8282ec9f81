//! Turning parsed entries into files.
//!
//! A fork that cannot be decoded never stops the archive: the problem is
//! logged, recorded in the [`ExtractReport`], and the file is written
//! without that fork. Only parse and I/O errors are fatal.

use crate::entry::{CompInfo, EntryKind, Fork, StuffitEntry};
use crate::file::{FilePacker, ForkLayout, MacFile};
use crate::methods::{self, Method};
use crate::{crc16, ForkFailure, SitError};
use log::{debug, warn};
use rayon::prelude::*;
use std::borrow::Cow;
use std::fmt;

/// Settings for one extraction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    pub layout: ForkLayout,
    /// Decode files on the rayon thread pool.
    pub parallel: bool,
    /// Set file modification times from the archive.
    pub restore_times: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            layout: ForkLayout::Rsrc,
            parallel: false,
            restore_times: true,
        }
    }
}

/// One fork that was dropped or written with a problem.
#[derive(Debug)]
pub struct ForkWarning {
    pub path: String,
    pub fork: Fork,
    pub failure: ForkFailure,
}

impl fmt::Display for ForkWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} fork of '{}' couldn't be extracted ({})",
            self.fork, self.path, self.failure
        )
    }
}

/// What an extraction produced.
#[derive(Debug, Default)]
pub struct ExtractReport {
    pub files: usize,
    pub folders: usize,
    pub warnings: Vec<ForkWarning>,
}

/// Decode one fork. A checksum mismatch still yields the bytes, along with
/// the failure to report.
pub(crate) fn decode_fork<'a>(
    archive: &'a [u8],
    info: &CompInfo,
) -> Result<(Cow<'a, [u8]>, Option<ForkFailure>), ForkFailure> {
    if !info.is_present() {
        return Ok((Cow::Borrowed(&[][..]), None));
    }

    let method = Method::from_id(info.method).ok_or(ForkFailure::Unsupported(info.method))?;
    let bytes = methods::extract(method, info, archive)?;

    if method.has_crc16() {
        let actual = crc16(&bytes);
        if actual != info.crc {
            let mismatch = ForkFailure::ChecksumMismatch {
                expected: info.crc,
                actual,
            };
            return Ok((bytes, Some(mismatch)));
        }
    }
    Ok((bytes, None))
}

/// Decode both forks of `entry` into a [`MacFile`], collecting warnings.
fn unpack_file<'a>(
    archive: &'a [u8],
    entry: &'a StuffitEntry,
    warnings: &mut Vec<ForkWarning>,
) -> MacFile<'a> {
    let mut file = MacFile::from_entry(entry);
    debug!("Extracting {} ...", entry.display_path());

    for fork in [Fork::Data, Fork::Resource] {
        let info = entry.fork(fork);
        if !info.is_present() {
            continue;
        }
        debug!("  Extracting {} fork using method {}", fork, info.method);

        let (bytes, failure) = match decode_fork(archive, info) {
            Ok(decoded) => decoded,
            Err(failure) => (Cow::Borrowed(&[][..]), Some(failure)),
        };
        if let Some(failure) = failure {
            let warning = ForkWarning {
                path: entry.display_path(),
                fork,
                failure,
            };
            warn!("{warning}");
            warnings.push(warning);
        }

        match fork {
            Fork::Data => file.data = bytes,
            Fork::Resource => file.res = bytes,
        }
    }
    file
}

fn extract_file<P: FilePacker + ?Sized>(
    archive: &[u8],
    entry: &StuffitEntry,
    packer: &P,
) -> Result<Vec<ForkWarning>, SitError> {
    let mut warnings = Vec::new();
    let file = unpack_file(archive, entry, &mut warnings);
    packer.pack(&file)?;
    Ok(warnings)
}

/// Extract `entries` (parsed from `archive`) through `packer`.
pub(crate) fn extract_entries<P: FilePacker + ?Sized>(
    archive: &[u8],
    entries: &[StuffitEntry],
    packer: &P,
    options: &ExtractOptions,
) -> Result<ExtractReport, SitError> {
    let mut report = ExtractReport::default();

    if !options.parallel {
        for entry in entries {
            match entry.kind {
                EntryKind::Folder => {
                    packer.create_dir(entry)?;
                    report.folders += 1;
                }
                EntryKind::File => {
                    report.warnings.extend(extract_file(archive, entry, packer)?);
                    report.files += 1;
                }
                EntryKind::EndFolder => {}
            }
        }
        return Ok(report);
    }

    // Folders first, in container order, so every file finds its parent.
    for entry in entries.iter().filter(|e| e.is_folder()) {
        packer.create_dir(entry)?;
        report.folders += 1;
    }

    let files: Vec<&StuffitEntry> = entries
        .iter()
        .filter(|e| e.kind == EntryKind::File)
        .collect();
    debug!("Extracting {} files in parallel", files.len());
    let warnings = files
        .par_iter()
        .map(|entry| extract_file(archive, entry, packer))
        .collect::<Result<Vec<_>, SitError>>()?;

    report.files = files.len();
    report.warnings = warnings.into_iter().flatten().collect();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        dirs: Mutex<Vec<String>>,
        files: Mutex<Vec<(String, Vec<u8>, Vec<u8>)>>,
    }

    impl FilePacker for Recorder {
        fn create_dir(&self, entry: &StuffitEntry) -> Result<(), SitError> {
            self.dirs.lock().unwrap().push(entry.display_path());
            Ok(())
        }

        fn pack(&self, file: &MacFile<'_>) -> Result<(), SitError> {
            let mut path: Vec<&str> = file.parents.iter().map(String::as_str).collect();
            path.push(&file.name);
            self.files
                .lock()
                .unwrap()
                .push((path.join("/"), file.data.to_vec(), file.res.to_vec()));
            Ok(())
        }
    }

    fn stored(offset: u64, bytes: &[u8]) -> CompInfo {
        CompInfo {
            method: 0,
            offset,
            size: bytes.len() as u32,
            comp_size: bytes.len() as u32,
            crc: crc16(bytes),
        }
    }

    fn file(name: &str, parents: &[&str], data: CompInfo, res: CompInfo) -> StuffitEntry {
        let mut e = StuffitEntry::new(EntryKind::File);
        e.name = name.into();
        e.parents = parents.iter().map(|p| p.to_string()).collect();
        e.data = data;
        e.res = res;
        e
    }

    fn folder(name: &str) -> StuffitEntry {
        let mut e = StuffitEntry::new(EntryKind::Folder);
        e.name = name.into();
        e
    }

    #[test]
    fn test_checksum_mismatch_keeps_bytes() {
        let archive = b"hello";
        let mut info = stored(0, archive);
        info.crc ^= 1;
        let (bytes, failure) = decode_fork(archive, &info).unwrap();
        assert_eq!(&*bytes, b"hello");
        assert!(matches!(
            failure,
            Some(ForkFailure::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_unsupported_method_is_a_warning() {
        let archive = b"hellojunk";
        let mut bad = stored(5, b"junk");
        bad.method = 8;
        let entries = vec![
            file("broken", &[], bad, CompInfo::default()),
            file("fine", &[], stored(0, b"hello"), CompInfo::default()),
        ];

        let packer = Recorder::default();
        let report =
            extract_entries(archive, &entries, &packer, &ExtractOptions::default()).unwrap();

        assert_eq!(report.files, 2);
        assert_eq!(report.warnings.len(), 1);
        let w = &report.warnings[0];
        assert_eq!(w.path, "broken");
        assert_eq!(w.fork, Fork::Data);
        assert!(matches!(w.failure, ForkFailure::Unsupported(8)));
        assert_eq!(
            w.to_string(),
            "data fork of 'broken' couldn't be extracted (compression method 8 not supported)"
        );

        let files = packer.files.lock().unwrap();
        assert_eq!(files[0], ("broken".to_string(), vec![], vec![]));
        assert_eq!(files[1].1, b"hello");
    }

    #[test]
    fn test_decode_error_drops_only_that_fork() {
        // Algorithm 13 with table selector 7 fails; the data fork survives.
        let archive = b"data\x70";
        let res = CompInfo {
            method: 13,
            offset: 4,
            size: 10,
            comp_size: 1,
            crc: 0,
        };
        let entries = vec![file("mixed", &[], stored(0, b"data"), res)];
        let packer = Recorder::default();
        let report =
            extract_entries(archive, &entries, &packer, &ExtractOptions::default()).unwrap();

        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].fork, Fork::Resource);
        assert!(matches!(report.warnings[0].failure, ForkFailure::Failed(_)));
        let files = packer.files.lock().unwrap();
        assert_eq!(files[0].1, b"data");
        assert!(files[0].2.is_empty());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let archive: Vec<u8> = (0..64u8).collect();
        let mut entries = vec![folder("A")];
        for i in 0..16u64 {
            let bytes = &archive[(i * 4) as usize..(i * 4 + 4) as usize];
            entries.push(file(&format!("f{i}"), &["A"], stored(i * 4, bytes), CompInfo::default()));
        }

        let sequential = Recorder::default();
        extract_entries(&archive, &entries, &sequential, &ExtractOptions::default()).unwrap();

        let parallel = Recorder::default();
        let options = ExtractOptions {
            parallel: true,
            ..ExtractOptions::default()
        };
        let report = extract_entries(&archive, &entries, &parallel, &options).unwrap();
        assert_eq!(report.folders, 1);
        assert_eq!(report.files, 16);

        let mut a = sequential.files.into_inner().unwrap();
        let mut b = parallel.files.into_inner().unwrap();
        a.sort();
        b.sort();
        assert_eq!(a, b);
        assert_eq!(*parallel.dirs.lock().unwrap(), ["A"]);
    }
}
