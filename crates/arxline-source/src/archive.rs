//! Archive classification and extraction.
//!
//! arXiv e-prints arrive under a `.tar.gz` name whatever they really are:
//! a tarball, a gzipped single `.tex`, a zip, a bare PDF, or an HTML error
//! page. The kind is decided from content signatures, never from the name.
//!
//! Order (first match wins):
//! 1. tar, plain or wrapped in gzip, bzip2 or xz, detected by a valid
//!    header checksum on the (decompressed) first block
//! 2. zip
//! 3. names ending in `.gz`: PDF copy, HTML error page, or lone gzip member
//! 4. bare `.tex` / `.bib`
//! 5. anything else is unrecognized

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use xz2::read::XzDecoder;

/// Bytes sniffed from the head of a file
const SNIFF_LEN: u64 = 512;
const TAR_BLOCK: usize = 512;
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const BZIP2_MAGIC: &[u8] = b"BZh";
const XZ_MAGIC: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";
const PDF_MAGIC: &[u8] = b"%PDF";

/// What an archive turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Tar,
    Zip,
    /// A PDF under a compressed name; kept as `<stem>.pdf`
    Pdf,
    GzipTar,
    Bzip2Tar,
    XzTar,
    /// One gzip-compressed file (usually a lone `.tex`)
    GzipSingle,
    /// Uncompressed `.tex` / `.bib`
    Bare,
}

impl std::fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Tar => "tar",
            Self::Zip => "zip",
            Self::Pdf => "pdf",
            Self::GzipTar => "tar.gz",
            Self::Bzip2Tar => "tar.bz2",
            Self::XzTar => "tar.xz",
            Self::GzipSingle => "gzip",
            Self::Bare => "bare",
        };
        f.write_str(s)
    }
}

/// Why an archive could not be extracted
#[derive(Debug)]
pub enum ExtractError {
    /// Upstream served an HTML page; it was saved to the given path
    ErrorPage(PathBuf),
    Unrecognized,
    /// Looked like a known format but failed to decode
    Corrupt(String),
    Io(io::Error),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ErrorPage(p) => write!(f, "HTML error page (saved to {})", p.display()),
            Self::Unrecognized => write!(f, "unrecognized archive format"),
            Self::Corrupt(msg) => write!(f, "corrupt archive: {msg}"),
            Self::Io(e) => write!(f, "IO: {e}"),
        }
    }
}

impl std::error::Error for ExtractError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ExtractError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Classify `archive` by content and extract it into `extract_dir`.
///
/// `extract_dir` is created if needed. On a decode or I/O failure the
/// archive itself is deleted, so a rerun downloads it afresh instead of
/// tripping over the same bytes.
pub fn extract(archive: &Path, extract_dir: &Path) -> Result<ArchiveKind, ExtractError> {
    let result = classify_and_extract(archive, extract_dir);
    match &result {
        Ok(kind) => log::debug!("Extracted {} as {kind}", archive.display()),
        Err(ExtractError::Corrupt(_) | ExtractError::Io(_)) => {
            if let Err(e) = fs::remove_file(archive) {
                if e.kind() != io::ErrorKind::NotFound {
                    log::warn!("Cannot delete corrupt {}: {e}", archive.display());
                }
            } else {
                log::info!("Deleted unusable archive {}", archive.display());
            }
        }
        Err(_) => {}
    }
    result
}

fn classify_and_extract(archive: &Path, extract_dir: &Path) -> Result<ArchiveKind, ExtractError> {
    fs::create_dir_all(extract_dir)?;
    let head = read_head(archive)?;
    let name = file_name(archive);

    if is_tar_header(&head) {
        unpack_tar(File::open(archive)?, extract_dir)?;
        return Ok(ArchiveKind::Tar);
    }
    if let Some(codec) = Codec::sniff(&head) {
        if decoded_head(archive, codec).is_some_and(|h| is_tar_header(&h)) {
            unpack_tar(codec.reader(File::open(archive)?), extract_dir)?;
            return Ok(codec.tar_kind());
        }
    }
    if head.starts_with(ZIP_MAGIC) || head.starts_with(ZIP_EMPTY_MAGIC) {
        unpack_zip(archive, extract_dir)?;
        return Ok(ArchiveKind::Zip);
    }

    if name.to_ascii_lowercase().ends_with(".gz") {
        let stem = compressed_stem(&name);
        if head.starts_with(PDF_MAGIC) {
            fs::copy(archive, extract_dir.join(format!("{stem}.pdf")))?;
            return Ok(ArchiveKind::Pdf);
        }
        if looks_like_markup(&head) {
            let artifact = extract_dir.join(format!("{name}.html"));
            fs::copy(archive, &artifact)?;
            return Err(ExtractError::ErrorPage(artifact));
        }
        if head.starts_with(GZIP_MAGIC) {
            return gunzip_single(archive, extract_dir, stem);
        }
        log::warn!("{name}: compressed suffix but no known signature");
    }

    if is_bare_source(&name) {
        fs::copy(archive, extract_dir.join(&name))?;
        return Ok(ArchiveKind::Bare);
    }
    Err(ExtractError::Unrecognized)
}

/// Decompress a gzip whose payload is not a tar into one file.
fn gunzip_single(archive: &Path, extract_dir: &Path, stem: &str) -> Result<ArchiveKind, ExtractError> {
    let tmp = extract_dir.join(format!(".{stem}.gunzip"));
    let copy_result = File::open(archive).and_then(|f| {
        let mut decoder = MultiGzDecoder::new(BufReader::new(f));
        let mut out = File::create(&tmp)?;
        io::copy(&mut decoder, &mut out)
    });
    if let Err(e) = copy_result {
        let _ = fs::remove_file(&tmp);
        return Err(ExtractError::Corrupt(format!("gzip: {e}")));
    }

    let payload_head = read_head(&tmp)?;
    if is_tar_header(&payload_head) {
        let unpacked = unpack_tar(File::open(&tmp)?, extract_dir);
        let _ = fs::remove_file(&tmp);
        unpacked?;
        return Ok(ArchiveKind::GzipTar);
    }

    let target = if payload_head.starts_with(PDF_MAGIC) {
        format!("{stem}.pdf")
    } else if is_bare_source(stem) {
        stem.to_string()
    } else {
        format!("{stem}.tex")
    };
    fs::rename(&tmp, extract_dir.join(target))?;
    Ok(ArchiveKind::GzipSingle)
}

fn unpack_tar<R: Read>(reader: R, extract_dir: &Path) -> Result<(), ExtractError> {
    let mut tar = tar::Archive::new(reader);
    tar.set_preserve_permissions(false);
    tar.set_overwrite(true);
    tar.unpack(extract_dir)
        .map_err(|e| ExtractError::Corrupt(format!("tar: {e}")))
}

fn unpack_zip(archive: &Path, extract_dir: &Path) -> Result<(), ExtractError> {
    let file = BufReader::new(File::open(archive)?);
    let mut zip =
        zip::ZipArchive::new(file).map_err(|e| ExtractError::Corrupt(format!("zip: {e}")))?;
    zip.extract(extract_dir)
        .map_err(|e| ExtractError::Corrupt(format!("zip: {e}")))
}

fn read_head(path: &Path) -> io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(SNIFF_LEN as usize);
    File::open(path)?.take(SNIFF_LEN).read_to_end(&mut head)?;
    Ok(head)
}

/// Compression layers a tarball may come wrapped in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Codec {
    Gzip,
    Bzip2,
    Xz,
}

impl Codec {
    fn sniff(head: &[u8]) -> Option<Self> {
        if head.starts_with(GZIP_MAGIC) {
            Some(Self::Gzip)
        } else if head.starts_with(BZIP2_MAGIC) {
            Some(Self::Bzip2)
        } else if head.starts_with(XZ_MAGIC) {
            Some(Self::Xz)
        } else {
            None
        }
    }

    /// Decompressing reader; concatenated members/streams are read through.
    fn reader(self, file: File) -> Box<dyn Read> {
        let file = BufReader::new(file);
        match self {
            Self::Gzip => Box::new(MultiGzDecoder::new(file)),
            Self::Bzip2 => Box::new(MultiBzDecoder::new(file)),
            Self::Xz => Box::new(XzDecoder::new_multi_decoder(file)),
        }
    }

    fn tar_kind(self) -> ArchiveKind {
        match self {
            Self::Gzip => ArchiveKind::GzipTar,
            Self::Bzip2 => ArchiveKind::Bzip2Tar,
            Self::Xz => ArchiveKind::XzTar,
        }
    }
}

/// First block of the decompressed stream, or `None` if it does not decode
fn decoded_head(path: &Path, codec: Codec) -> Option<Vec<u8>> {
    let file = File::open(path).ok()?;
    let mut head = Vec::with_capacity(TAR_BLOCK);
    codec
        .reader(file)
        .take(TAR_BLOCK as u64)
        .read_to_end(&mut head)
        .ok()?;
    Some(head)
}

/// A POSIX/GNU/v7 tar header: full block with a matching checksum field.
///
/// The checksum is the byte sum of the header with the checksum field
/// (offset 148, 8 bytes) read as spaces. Some old writers summed signed
/// bytes, so both sums are accepted.
pub fn is_tar_header(block: &[u8]) -> bool {
    if block.len() < TAR_BLOCK {
        return false;
    }
    let block = &block[..TAR_BLOCK];
    if block.iter().all(|&b| b == 0) {
        return false;
    }
    let field = &block[148..156];
    let digits: String = field
        .iter()
        .map(|&b| b as char)
        .skip_while(|c| *c == ' ')
        .take_while(|c| c.is_digit(8))
        .collect();
    let Ok(stored) = u32::from_str_radix(&digits, 8) else {
        return false;
    };

    let mut unsigned: u32 = 0;
    let mut signed: i32 = 0;
    for (i, &b) in block.iter().enumerate() {
        let b = if (148..156).contains(&i) { b' ' } else { b };
        unsigned += u32::from(b);
        signed += i32::from(b as i8);
    }
    stored == unsigned || i64::from(stored) == i64::from(signed)
}

fn looks_like_markup(head: &[u8]) -> bool {
    head.iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|&b| b == b'<')
}

fn is_bare_source(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".tex") || lower.ends_with(".bib")
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `foo.tar.gz` → `foo`, `main.tex.gz` → `main.tex`
fn compressed_stem(name: &str) -> &str {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".tar.gz") {
        &name[..name.len() - ".tar.gz".len()]
    } else if lower.ends_with(".gz") {
        &name[..name.len() - ".gz".len()]
    } else {
        name
    }
}
