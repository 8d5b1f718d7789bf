//! Package archives.
//!
//! Packs a working directory into a gzip tarball the way `npm pack` lays it
//! out (every entry under `package/`), and unpacks registry tarballs into a
//! slot, one entry at a time.

use super::manifest::{MANIFEST_FILE, PackageManifest};
use super::types::AddonError;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::fs;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Top-level directory used inside package tarballs.
pub const PACKAGE_PREFIX: &str = "package";

/// Patterns excluded from every local pack.
pub const DEFAULT_IGNORES: &[&str] = &[
    // Version control
    ".git",
    ".svn",
    ".hg",
    "CVS",
    // Editor and OS droppings
    ".*.swp",
    ".DS_Store",
    "._*",
    "*.orig",
    // npm internals
    ".npmrc",
    ".lock-wscript",
    ".wafpickle-*",
    "config.gypi",
    "package-lock.json",
    // Logs
    "logs",
    "*.log",
    "npm-debug.log*",
    // Runtime data
    "pids",
    "*.pid",
    "*.seed",
    // Coverage
    "lib-cov",
    "coverage",
    ".nyc_output",
    // Build tooling
    ".grunt",
    "build/Release",
    // Dependency directories
    "node_modules",
    "jspm_packages",
    ".npm",
    ".node_repl_history",
];

/// Project-level ignore files, in order of preference.
const PROJECT_IGNORE_FILES: &[&str] = &[".npmignore", ".gitignore"];

/// Files that are always packed.
const ALWAYS_INCLUDED: &[&str] = &["!/package.json"];

/// Top-level files packed even when a `files` whitelist leaves them out.
const WHITELIST_EXTRAS: &[&str] = &["!/README*", "!/LICENSE*", "!/LICENCE*", "!/CHANGELOG*"];

/// Ignore rules for packing a local package.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    matcher: Gitignore,
}

impl IgnoreRules {
    /// Builds the rules for the package at `root`.
    ///
    /// A `files` whitelist in the manifest, when present, excludes
    /// everything it does not name. [`DEFAULT_IGNORES`] come next, then
    /// `.npmignore` (or `.gitignore` if there is no `.npmignore`), then
    /// `extra`. Bundled dependencies are kept under `node_modules`.
    pub fn for_package(root: &Path, extra: &[String]) -> Result<Self, AddonError> {
        let mut builder = GitignoreBuilder::new(root);
        let manifest_path = root.join(MANIFEST_FILE);
        let manifest = if manifest_path.is_file() {
            PackageManifest::load(&manifest_path)?
        } else {
            PackageManifest::default()
        };

        let whitelist = manifest.files_whitelist();
        if let Some(ref entries) = whitelist {
            debug!("[ADDON-ARCHIVE] Packing only {:?}", entries);
            add_rule(&mut builder, "*")?;
            for entry in entries {
                add_rule(&mut builder, &format!("!{}", entry))?;
                add_rule(&mut builder, &format!("!{}/**", entry))?;
            }
        }

        for pattern in DEFAULT_IGNORES {
            add_rule(&mut builder, pattern)?;
        }

        if let Some(file) = PROJECT_IGNORE_FILES
            .iter()
            .map(|name| root.join(name))
            .find(|path| path.is_file())
        {
            debug!("[ADDON-ARCHIVE] Using ignore file {:?}", file);
            if let Some(e) = builder.add(&file) {
                warn!("[ADDON-ARCHIVE] Some patterns in {:?} were skipped: {}", file, e);
            }
        }

        for pattern in extra {
            add_rule(&mut builder, pattern)?;
        }

        let bundled = manifest.bundled_dependencies();
        if !bundled.is_empty() {
            debug!("[ADDON-ARCHIVE] Bundling {:?}", bundled);
            add_rule(&mut builder, "!/node_modules")?;
            add_rule(&mut builder, "/node_modules/*")?;
            for name in &bundled {
                add_rule(&mut builder, &format!("!/node_modules/{}", name))?;
                add_rule(&mut builder, &format!("!/node_modules/{}/**", name))?;
            }
        }

        if whitelist.is_some() {
            for pattern in WHITELIST_EXTRAS {
                add_rule(&mut builder, pattern)?;
            }
        }

        for pattern in ALWAYS_INCLUDED {
            add_rule(&mut builder, pattern)?;
        }

        let matcher = builder
            .build()
            .map_err(|e| AddonError::Config(format!("ignore rules: {}", e)))?;
        Ok(Self { matcher })
    }

    /// Returns true if `relative` should be left out of the pack.
    #[must_use]
    pub fn is_ignored(&self, relative: &Path, is_dir: bool) -> bool {
        self.matcher.matched(relative, is_dir).is_ignore()
    }
}

fn add_rule(builder: &mut GitignoreBuilder, pattern: &str) -> Result<(), AddonError> {
    builder
        .add_line(None, pattern)
        .map_err(|e| AddonError::Config(format!("ignore pattern {:?}: {}", pattern, e)))?;
    Ok(())
}

/// Counts from a pack operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackSummary {
    /// Files written to the archive.
    pub files: usize,
    /// Total size of those files.
    pub bytes: u64,
}

/// Lists the files a pack of `root` would contain, relative to `root`.
pub fn packed_files(root: &Path, rules: &IgnoreRules) -> Result<Vec<PathBuf>, AddonError> {
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            !rules.is_ignored(relative, entry.file_type().is_dir())
        });

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| AddonError::Filesystem(e.into()))?;
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            debug!("[ADDON-ARCHIVE] Skipping symlink {:?}", entry.path());
            continue;
        }
        if !file_type.is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            files.push(relative.to_path_buf());
        }
    }

    Ok(files)
}

/// Serializes the package at `root` into a gzip tarball written to `writer`.
///
/// Returns the writer once the gzip stream has been finished.
pub fn pack_local_directory<W: Write>(
    root: &Path,
    rules: &IgnoreRules,
    writer: W,
) -> Result<(W, PackSummary), AddonError> {
    let files = packed_files(root, rules)?;
    info!("[ADDON-ARCHIVE] Packing {} files from {:?}", files.len(), root);

    let mut builder = tar::Builder::new(GzEncoder::new(writer, Compression::default()));
    builder.mode(tar::HeaderMode::Deterministic);
    builder.follow_symlinks(false);

    let mut summary = PackSummary::default();
    for relative in &files {
        let source = root.join(relative);
        let name = Path::new(PACKAGE_PREFIX).join(relative);
        builder.append_path_with_name(&source, &name)?;
        summary.files += 1;
        summary.bytes += fs::metadata(&source).map(|m| m.len()).unwrap_or(0);
    }

    let writer = builder.into_inner()?.finish()?;
    debug!(
        "[ADDON-ARCHIVE] Packed {} files, {} bytes",
        summary.files, summary.bytes
    );
    Ok((writer, summary))
}

/// Unpacks a gzip tarball into `dest`.
///
/// The leading path component of every entry is stripped. Entries that
/// would escape `dest` fail the whole operation; links are skipped. On
/// error `dest` may hold a partial tree and must be discarded by the
/// caller.
pub fn unpack_archive<R: Read>(reader: R, dest: &Path, origin: &str) -> Result<usize, AddonError> {
    let failed = |e: std::io::Error| AddonError::extraction(origin, e);

    fs::create_dir_all(dest)?;
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    let mut unpacked = 0;

    for entry in archive.entries().map_err(failed)? {
        let mut entry = entry.map_err(failed)?;
        let entry_type = entry.header().entry_type();

        if entry_type.is_symlink() || entry_type.is_hard_link() {
            warn!("[ADDON-ARCHIVE] Skipping link entry in {}", origin);
            continue;
        }

        let path = entry.path().map_err(failed)?.into_owned();
        let Some(relative) = sanitize_archive_path(&path, origin)? else {
            continue;
        };
        let target = dest.join(&relative);

        if entry_type.is_dir() {
            fs::create_dir_all(&target).map_err(failed)?;
            continue;
        }
        if !entry_type.is_file() {
            debug!("[ADDON-ARCHIVE] Skipping {:?} entry {:?}", entry_type, path);
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(failed)?;
        }
        entry.unpack(&target).map_err(failed)?;
        unpacked += 1;
    }

    info!("[ADDON-ARCHIVE] Unpacked {} files from {}", unpacked, origin);
    Ok(unpacked)
}

/// Strips the package prefix and rejects components that leave the tree.
fn sanitize_archive_path(path: &Path, origin: &str) -> Result<Option<PathBuf>, AddonError> {
    let stripped: PathBuf = path.components().skip(1).collect();
    if stripped.as_os_str().is_empty() {
        return Ok(None);
    }

    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(AddonError::extraction(
                    origin,
                    format!("unsafe path in archive: {}", path.display()),
                ));
            }
        }
    }

    Ok(Some(stripped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn sample_package() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "package.json", r#"{"name": "lacona-demo"}"#);
        write(root, "extensions.js", "exports.default = []");
        write(root, "build/extensions.js", "bundle");
        write(root, "build/Release/addon.node", "binary");
        write(root, "node_modules/lodash/index.js", "");
        write(root, ".git/HEAD", "ref: refs/heads/main");
        write(root, "npm-debug.log", "");
        write(root, "src/extensions.jsx", "<literal />");
        dir
    }

    fn names(files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn test_default_rules() {
        let dir = sample_package();
        let rules = IgnoreRules::for_package(dir.path(), &[]).unwrap();
        let files = packed_files(dir.path(), &rules).unwrap();

        assert_eq!(
            names(&files),
            vec![
                "build/extensions.js",
                "extensions.js",
                "package.json",
                "src/extensions.jsx",
            ]
        );
    }

    #[test]
    fn test_npmignore_takes_precedence_over_gitignore() {
        let dir = sample_package();
        write(dir.path(), ".gitignore", "build\n");
        write(dir.path(), ".npmignore", "src\n");

        let rules = IgnoreRules::for_package(dir.path(), &[]).unwrap();
        let files = names(&packed_files(dir.path(), &rules).unwrap());

        assert!(files.contains(&"build/extensions.js".to_string()));
        assert!(!files.contains(&"src/extensions.jsx".to_string()));
    }

    #[test]
    fn test_gitignore_used_without_npmignore() {
        let dir = sample_package();
        write(dir.path(), ".gitignore", "build\n");

        let rules = IgnoreRules::for_package(dir.path(), &[]).unwrap();
        let files = names(&packed_files(dir.path(), &rules).unwrap());

        assert!(!files.iter().any(|f| f.starts_with("build/")));
        assert!(files.contains(&".gitignore".to_string()));
    }

    #[test]
    fn test_package_json_is_never_ignored() {
        let dir = sample_package();
        let rules = IgnoreRules::for_package(dir.path(), &["*.json".to_string()]).unwrap();
        let files = names(&packed_files(dir.path(), &rules).unwrap());
        assert!(files.contains(&"package.json".to_string()));
    }

    #[test]
    fn test_files_whitelist_limits_pack() {
        let dir = sample_package();
        write(
            dir.path(),
            "package.json",
            r#"{"name": "lacona-demo", "files": ["build"]}"#,
        );
        write(dir.path(), "secret-notes.txt", "do not ship");
        write(dir.path(), "README.md", "# Demo");

        let rules = IgnoreRules::for_package(dir.path(), &[]).unwrap();
        let files = names(&packed_files(dir.path(), &rules).unwrap());

        assert_eq!(
            files,
            vec!["README.md", "build/extensions.js", "package.json"]
        );
    }

    #[test]
    fn test_whitelist_glob_entries() {
        let dir = sample_package();
        write(
            dir.path(),
            "package.json",
            r#"{"name": "lacona-demo", "files": ["*.js"]}"#,
        );

        let rules = IgnoreRules::for_package(dir.path(), &[]).unwrap();
        let files = names(&packed_files(dir.path(), &rules).unwrap());

        assert_eq!(files, vec!["extensions.js", "package.json"]);
    }

    #[test]
    fn test_bundled_dependencies_are_packed() {
        let dir = sample_package();
        write(
            dir.path(),
            "package.json",
            r#"{"name": "lacona-demo", "bundleDependencies": ["lodash"]}"#,
        );
        write(dir.path(), "node_modules/left-pad/index.js", "");

        let rules = IgnoreRules::for_package(dir.path(), &[]).unwrap();
        let files = names(&packed_files(dir.path(), &rules).unwrap());

        assert!(files.contains(&"node_modules/lodash/index.js".to_string()));
        assert!(!files.iter().any(|f| f.starts_with("node_modules/left-pad")));
    }

    #[test]
    fn test_pack_then_unpack() {
        let dir = sample_package();
        let rules = IgnoreRules::for_package(dir.path(), &[]).unwrap();
        let (bytes, summary) = pack_local_directory(dir.path(), &rules, Vec::new()).unwrap();
        assert_eq!(summary.files, 4);

        let dest = TempDir::new().unwrap();
        let count = unpack_archive(Cursor::new(bytes), dest.path(), "local").unwrap();
        assert_eq!(count, 4);
        assert_eq!(
            fs::read_to_string(dest.path().join("build/extensions.js")).unwrap(),
            "bundle"
        );
        assert!(!dest.path().join("node_modules").exists());
        assert!(!dest.path().join(PACKAGE_PREFIX).exists());
    }

    fn raw_tarball(name: &str, data: &[u8]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let mut header = tar::Header::new_gnu();
        {
            let gnu = header.as_gnu_mut().unwrap();
            gnu.name[..name.len()].copy_from_slice(name.as_bytes());
        }
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, data).unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_unpack_rejects_parent_traversal() {
        let dest = TempDir::new().unwrap();
        let slot = dest.path().join("slot");
        let bytes = raw_tarball("package/../../evil.js", b"boom");

        let err = unpack_archive(Cursor::new(bytes), &slot, "evil").unwrap_err();
        assert!(matches!(err, AddonError::Extraction { .. }));
        assert!(!dest.path().join("evil.js").exists());
    }

    #[test]
    fn test_unpack_rejects_corrupt_stream() {
        let dest = TempDir::new().unwrap();
        let err = unpack_archive(Cursor::new(b"not a gzip stream".to_vec()), dest.path(), "bad")
            .unwrap_err();
        assert!(matches!(err, AddonError::Extraction { .. }));
    }

    #[test]
    fn test_unpack_rejects_truncated_stream() {
        let dir = sample_package();
        let rules = IgnoreRules::for_package(dir.path(), &[]).unwrap();
        let (bytes, _) = pack_local_directory(dir.path(), &rules, Vec::new()).unwrap();
        let truncated = bytes[..bytes.len() / 2].to_vec();

        let dest = TempDir::new().unwrap();
        let result = unpack_archive(Cursor::new(truncated), dest.path(), "short");
        assert!(matches!(result, Err(AddonError::Extraction { .. })));
    }

    #[test]
    fn test_sanitize_archive_path() {
        assert_eq!(
            sanitize_archive_path(Path::new("package/lib/a.js"), "t").unwrap(),
            Some(PathBuf::from("lib/a.js"))
        );
        assert_eq!(sanitize_archive_path(Path::new("package"), "t").unwrap(), None);
        assert!(sanitize_archive_path(Path::new("/etc/passwd"), "t").is_err());
    }
}
