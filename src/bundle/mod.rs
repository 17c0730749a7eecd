//! Bundle Packager (§4.K).
//!
//! Consumes an [`ArchiveManifest`], validates that every declared
//! intermediate is signed by its declared root (reusing the revocation
//! checker's signature-verification primitive), encodes certificates per
//! the group's `encoding`, and assembles deterministic zip/tar.gz
//! archives with an optional per-group `MANIFEST` entry and an optional
//! global SHA-256 hash catalog.

use crate::certs::Certificate;
use crate::error::{Result, Source, TetError};
use crate::revocation::verify_cert_signed_by;
use serde::{Deserialize, Deserializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Top-level bundler configuration (§3's `ArchiveManifest`). Plain
/// `serde::Deserialize` so [`ArchiveManifest::load`] can parse it from
/// either TOML (the canonical on-disk shape) or JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveManifest {
    /// Filename for the global hash catalog, if one should be written.
    #[serde(default)]
    pub hashes: Option<String>,
    /// How soon before expiry a certificate earns a warning. `None`
    /// disables expiry warnings entirely.
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub expiry: Option<Duration>,
    /// One entry per named output group, iterated in key order so runs
    /// are deterministic regardless of the manifest's own ordering.
    pub chains: BTreeMap<String, ChainGroup>,
}

fn deserialize_opt_duration<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| crate::hexutil::parse_duration(&s).map_err(serde::de::Error::custom)).transpose()
}

impl ArchiveManifest {
    /// Load a manifest from `path`, dispatching on its extension: `.json`
    /// parses as JSON, anything else (including no extension) as TOML,
    /// the canonical on-disk shape.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TetError::load(Source::Certificate, e))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str(&content).map_err(|e| TetError::decode(Source::Certificate, e))
            }
            _ => toml::from_str(&content).map_err(|e| TetError::decode(Source::Certificate, e)),
        }
    }
}

/// One named group of chains and the archives to produce from them.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainGroup {
    /// Each declared root plus the intermediates signed by it.
    pub certs: Vec<CertSet>,
    /// Which archives to produce and how to encode their entries.
    pub outputs: Outputs,
}

/// A root certificate's file path and the intermediates declared under
/// it, each to be validated against that root.
#[derive(Debug, Clone, Deserialize)]
pub struct CertSet {
    /// Path to the root certificate.
    pub root: PathBuf,
    /// Paths to the intermediates declared under this root.
    pub intermediates: Vec<PathBuf>,
}

/// The `outputs` block of a chain group.
#[derive(Debug, Clone, Deserialize)]
pub struct Outputs {
    /// Emit one bundled entry containing every certificate in the group.
    #[serde(default)]
    pub include_single: bool,
    /// Emit one entry per certificate.
    #[serde(default)]
    pub include_individual: bool,
    /// Emit a `MANIFEST` entry listing every other entry's hash.
    #[serde(default)]
    pub manifest: bool,
    /// Archive formats to produce.
    pub formats: Vec<ArchiveFormat>,
    /// Per-entity encoding.
    pub encoding: Encoding,
}

/// An archive format named in `outputs.formats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    Zip,
    #[serde(rename = "tgz")]
    TarGz,
}

/// How certificates are encoded into archive entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Pem,
    Crt,
    PemCrt,
    Der,
    Both,
}

impl Encoding {
    /// Parse the `outputs.encoding` string; any other value is a
    /// configuration error.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pem" => Ok(Encoding::Pem),
            "crt" => Ok(Encoding::Crt),
            "pemcrt" => Ok(Encoding::PemCrt),
            "der" => Ok(Encoding::Der),
            "both" => Ok(Encoding::Both),
            other => Err(TetError::decode_msg(Source::Certificate, format!("unrecognized encoding: {other}"))),
        }
    }
}

/// One file the packager wrote, used for the global hash catalog.
struct CreatedArchive {
    path: PathBuf,
    sha256_hex: String,
}

/// An in-memory archive entry: name, bytes, and the timestamp to store
/// alongside them.
struct Entry {
    name: String,
    data: Vec<u8>,
    mtime: SystemTime,
}

/// A certificate already loaded from disk, with the metadata needed to
/// compute entry timestamps and expiry warnings.
struct LoadedCert {
    cert: Certificate,
    path: PathBuf,
    mtime: SystemTime,
}

/// Package every group in `manifest`, writing archives into `out_dir`.
/// Returns the paths of every archive created.
pub fn package(manifest: &ArchiveManifest, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut created = Vec::new();

    for (group_name, group) in &manifest.chains {
        let loaded = load_and_validate_group(group)?;
        warn_on_expiry(&loaded, manifest.expiry);
        created.extend(package_group(group_name, group, &loaded, out_dir)?);
    }

    if let Some(hashes_name) = &manifest.hashes {
        write_hash_catalog(&created, out_dir, hashes_name)?;
    }

    Ok(created.into_iter().map(|c| c.path).collect())
}

fn load_and_validate_group(group: &ChainGroup) -> Result<Vec<LoadedCert>> {
    let mut loaded = Vec::new();
    for set in &group.certs {
        let root = load_cert(&set.root)?;
        let mut intermediates = Vec::with_capacity(set.intermediates.len());
        for path in &set.intermediates {
            let intermediate = load_cert(path)?;
            verify_cert_signed_by(&intermediate.cert, &root.cert).map_err(|_| {
                TetError::verify_msg(
                    Source::Certificate,
                    format!("{} is not signed by declared root {}", path.display(), set.root.display()),
                )
            })?;
            intermediates.push(intermediate);
        }
        loaded.push(root);
        loaded.extend(intermediates);
    }
    Ok(loaded)
}

fn load_cert(path: &Path) -> Result<LoadedCert> {
    let metadata = std::fs::metadata(path).map_err(|e| TetError::load(Source::Certificate, e))?;
    let mtime = metadata.modified().map_err(|e| TetError::load(Source::Certificate, e))?;
    let bytes = std::fs::read(path).map_err(|e| TetError::load(Source::Certificate, e))?;
    let ingested = crate::certs::ingest(&bytes, None)?;
    let cert = ingested.certificates.into_iter().next().ok_or(TetError::EmptyCertificate)?;
    Ok(LoadedCert { cert, path: path.to_path_buf(), mtime })
}

fn warn_on_expiry(loaded: &[LoadedCert], threshold: Option<std::time::Duration>) {
    let Some(threshold) = threshold else { return };
    let now = now_unix();
    let threshold_secs = threshold.as_secs() as i64;

    for entry in loaded {
        let Ok(parsed) = entry.cert.parsed() else { continue };
        let not_after = parsed.validity().not_after;
        let remaining_days = (not_after.timestamp() - now) / 86_400;
        let date = time::OffsetDateTime::from_unix_timestamp(not_after.timestamp())
            .map(|dt| format!("{}-{:02}-{:02}", dt.year(), dt.month() as u8, dt.day()))
            .unwrap_or_else(|_| "unknown date".to_string());

        if not_after.timestamp() < now {
            eprintln!(
                "WARNING: Certificate {} has EXPIRED (expired {} days ago)",
                entry.path.display(),
                -remaining_days
            );
        } else if not_after.timestamp() - now < threshold_secs {
            eprintln!(
                "WARNING: Certificate {} will expire in {} days (on {})",
                entry.path.display(),
                remaining_days,
                date
            );
        }
    }
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

fn package_group(
    group_name: &str,
    group: &ChainGroup,
    loaded: &[LoadedCert],
    out_dir: &Path,
) -> Result<Vec<CreatedArchive>> {
    let mut entries = Vec::new();

    if group.outputs.include_individual {
        for cert in loaded {
            let base = cert.path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_else(|| "cert".to_string());
            entries.extend(encode_individual(&base, &cert.cert, cert.mtime, group.outputs.encoding));
        }
    }

    if group.outputs.include_single {
        let max_mtime = loaded.iter().map(|c| c.mtime).max().unwrap_or_else(SystemTime::now);
        let certs: Vec<&Certificate> = loaded.iter().map(|c| &c.cert).collect();
        entries.extend(encode_bundled(group_name, &certs, max_mtime, group.outputs.encoding));
    }

    resolve_collisions(&mut entries);

    if group.outputs.manifest {
        let max_mtime = loaded.iter().map(|c| c.mtime).max().unwrap_or_else(SystemTime::now);
        entries.push(manifest_entry(&entries, max_mtime));
    }

    let mut created = Vec::new();
    for format in &group.outputs.formats {
        let (filename, bytes) = match format {
            ArchiveFormat::Zip => (format!("{group_name}.zip"), write_zip(&entries)?),
            ArchiveFormat::TarGz => (format!("{group_name}.tar.gz"), write_tar_gz(&entries)?),
        };
        let path = out_dir.join(&filename);
        std::fs::write(&path, &bytes).map_err(|e| TetError::load(Source::Certificate, e))?;
        created.push(CreatedArchive { path, sha256_hex: hex::encode(Sha256::digest(&bytes)) });
    }

    Ok(created)
}

fn encode_individual(base: &str, cert: &Certificate, mtime: SystemTime, encoding: Encoding) -> Vec<Entry> {
    let pem = cert.to_pem().into_bytes();
    match encoding {
        Encoding::Pem => vec![Entry { name: format!("{base}.pem"), data: pem, mtime }],
        Encoding::Crt => vec![Entry { name: format!("{base}.crt"), data: pem, mtime }],
        Encoding::PemCrt => vec![
            Entry { name: format!("{base}.pem"), data: pem.clone(), mtime },
            Entry { name: format!("{base}.crt"), data: pem, mtime },
        ],
        Encoding::Der => vec![Entry { name: format!("{base}.der"), data: cert.der().to_vec(), mtime }],
        Encoding::Both => vec![
            Entry { name: format!("{base}.pem"), data: pem, mtime },
            Entry { name: format!("{base}.der"), data: cert.der().to_vec(), mtime },
        ],
    }
}

fn encode_bundled(group_name: &str, certs: &[&Certificate], mtime: SystemTime, encoding: Encoding) -> Vec<Entry> {
    let pem_bundle: Vec<u8> = certs.iter().flat_map(|c| c.to_pem().into_bytes()).collect();
    let der_bundle: Vec<u8> = certs.iter().flat_map(|c| c.der().to_vec()).collect();

    match encoding {
        Encoding::Pem => vec![Entry { name: format!("{group_name}.pem"), data: pem_bundle, mtime }],
        Encoding::Crt => vec![Entry { name: format!("{group_name}.crt"), data: pem_bundle, mtime }],
        Encoding::PemCrt => vec![
            Entry { name: format!("{group_name}.pem"), data: pem_bundle.clone(), mtime },
            Entry { name: format!("{group_name}.crt"), data: pem_bundle, mtime },
        ],
        Encoding::Der => vec![Entry { name: format!("{group_name}.der"), data: der_bundle, mtime }],
        Encoding::Both => vec![
            Entry { name: format!("{group_name}.pem"), data: pem_bundle, mtime },
            Entry { name: format!("{group_name}.der"), data: der_bundle, mtime },
        ],
    }
}

/// Resolve name collisions within one archive's entry list by appending
/// `-2`, `-3`, … before the extension; the counter is per `(base, ext)`
/// pair so repeated collisions stay predictable.
fn resolve_collisions(entries: &mut [Entry]) {
    let mut seen: BTreeMap<(String, String), u32> = BTreeMap::new();
    for entry in entries.iter_mut() {
        let (base, ext) = split_ext(&entry.name);
        let key = (base.clone(), ext.clone());
        let count = seen.entry(key).or_insert(0);
        *count += 1;
        if *count > 1 {
            entry.name = if ext.is_empty() { format!("{base}-{count}") } else { format!("{base}-{count}.{ext}") };
        }
    }
}

fn split_ext(name: &str) -> (String, String) {
    match name.rsplit_once('.') {
        Some((base, ext)) => (base.to_string(), ext.to_string()),
        None => (name.to_string(), String::new()),
    }
}

fn manifest_entry(entries: &[Entry], mtime: SystemTime) -> Entry {
    let mut lines: Vec<(String, String)> =
        entries.iter().map(|e| (e.name.clone(), hex::encode(Sha256::digest(&e.data)))).collect();
    lines.sort_by(|a, b| a.0.cmp(&b.0));

    let body = lines.into_iter().map(|(name, hash)| format!("{hash}  {name}\n")).collect::<String>();
    Entry { name: "MANIFEST".to_string(), data: body.into_bytes(), mtime }
}

fn write_hash_catalog(created: &[CreatedArchive], out_dir: &Path, filename: &str) -> Result<()> {
    let mut body = String::new();
    for archive in created {
        let basename = archive.path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        body.push_str(&format!("{}  {}\n", archive.sha256_hex, basename));
    }
    std::fs::write(out_dir.join(filename), body).map_err(|e| TetError::load(Source::Certificate, e))
}

fn zip_datetime(mtime: SystemTime) -> zip::DateTime {
    let secs = mtime.duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
    time::OffsetDateTime::from_unix_timestamp(secs)
        .ok()
        .and_then(|dt| {
            zip::DateTime::from_date_and_time(
                dt.year() as u16,
                dt.month() as u8,
                dt.day(),
                dt.hour(),
                dt.minute(),
                dt.second(),
            )
            .ok()
        })
        .unwrap_or_default()
}

fn write_zip(entries: &[Entry]) -> Result<Vec<u8>> {
    use zip::write::SimpleFileOptions;

    let buf = Vec::new();
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(buf));
    for entry in entries {
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(0o644)
            .last_modified_time(zip_datetime(entry.mtime));
        writer.start_file(&entry.name, options).map_err(|e| TetError::load(Source::Certificate, e))?;
        writer.write_all(&entry.data).map_err(|e| TetError::load(Source::Certificate, e))?;
    }
    let cursor = writer.finish().map_err(|e| TetError::load(Source::Certificate, e))?;
    Ok(cursor.into_inner())
}

fn write_tar_gz(entries: &[Entry]) -> Result<Vec<u8>> {
    let gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(gz);

    let mut write_err = None;
    for entry in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(entry.data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(entry.mtime.duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0));
        header.set_cksum();
        if let Err(e) = builder.append_data(&mut header, &entry.name, entry.data.as_slice()) {
            write_err.get_or_insert(e);
        }
    }

    let gz = builder.into_inner().map_err(|e| TetError::load(Source::Certificate, combine_io_errors(write_err, e)))?;
    let bytes = gz.finish().map_err(|e| TetError::load(Source::Certificate, e))?;
    if let Some(e) = write_err {
        return Err(TetError::load(Source::Certificate, e));
    }
    Ok(bytes)
}

fn combine_io_errors(first: Option<std::io::Error>, second: std::io::Error) -> std::io::Error {
    match first {
        Some(e) => std::io::Error::new(e.kind(), format!("{e}; then while closing the archive: {second}")),
        None => second,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_parses_toml_by_default() {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        std::fs::write(
            file.path(),
            "hashes = \"SHA256SUMS\"\n\n[chains.web]\ncerts = []\n\n[chains.web.outputs]\nformats = [\"zip\"]\nencoding = \"pem\"\n",
        )
        .unwrap();
        let manifest = ArchiveManifest::load(file.path()).unwrap();
        assert_eq!(manifest.hashes, Some("SHA256SUMS".to_string()));
        assert!(manifest.chains.contains_key("web"));
    }

    #[test]
    fn load_parses_json_by_extension() {
        let file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        std::fs::write(
            file.path(),
            r#"{"chains": {"web": {"certs": [], "outputs": {"formats": ["zip"], "encoding": "pem"}}}}"#,
        )
        .unwrap();
        let manifest = ArchiveManifest::load(file.path()).unwrap();
        assert!(manifest.hashes.is_none());
        assert!(manifest.chains.contains_key("web"));
    }

    #[test]
    fn encoding_parses_known_values() {
        assert_eq!(Encoding::parse("pem").unwrap(), Encoding::Pem);
        assert_eq!(Encoding::parse("crt").unwrap(), Encoding::Crt);
        assert_eq!(Encoding::parse("pemcrt").unwrap(), Encoding::PemCrt);
        assert_eq!(Encoding::parse("der").unwrap(), Encoding::Der);
        assert_eq!(Encoding::parse("both").unwrap(), Encoding::Both);
    }

    #[test]
    fn encoding_rejects_unknown_values() {
        assert!(Encoding::parse("zip").is_err());
    }

    #[test]
    fn split_ext_handles_no_extension() {
        assert_eq!(split_ext("MANIFEST"), ("MANIFEST".to_string(), String::new()));
    }

    #[test]
    fn split_ext_handles_normal_name() {
        assert_eq!(split_ext("leaf.pem"), ("leaf".to_string(), "pem".to_string()));
    }

    #[test]
    fn collision_resolution_counts_per_base_ext_pair() {
        let mtime = SystemTime::now();
        let mut entries = vec![
            Entry { name: "leaf.pem".to_string(), data: vec![1], mtime },
            Entry { name: "leaf.pem".to_string(), data: vec![2], mtime },
            Entry { name: "leaf.der".to_string(), data: vec![3], mtime },
            Entry { name: "leaf.pem".to_string(), data: vec![4], mtime },
        ];
        resolve_collisions(&mut entries);
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["leaf.pem", "leaf-2.pem", "leaf.der", "leaf-3.pem"]);
    }

    #[test]
    fn manifest_entry_is_sorted_by_name() {
        let mtime = SystemTime::now();
        let entries = vec![
            Entry { name: "b.pem".to_string(), data: vec![1, 2, 3], mtime },
            Entry { name: "a.pem".to_string(), data: vec![4, 5, 6], mtime },
        ];
        let manifest = manifest_entry(&entries, mtime);
        let body = String::from_utf8(manifest.data).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert!(lines[0].ends_with("a.pem"));
        assert!(lines[1].ends_with("b.pem"));
    }
}
