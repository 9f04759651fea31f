//! Artifact installer: places verified artifacts on disk

use chrono::{DateTime, Local};
use regex::Regex;
use sdk::errors::CarrierError;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;

/// Mode of an installed plugin executable
pub const ARTIFACT_MODE: u32 = 0o750;

/// Mode of directories created for code bundles and their archives
pub const BUNDLE_DIR_MODE: u32 = 0o700;

/// Placeholder in a deploy root replaced by the record's path parameter
pub const PATH_PARAM_TOKEN: &str = "{{.trcpathparam}}";

const ARCHIVE_DIR: &str = "archive";
const WAR_SUFFIX: &str = ".war";
const STAGING_SUFFIX: &str = ".partial";

fn path_param_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_]*$").expect("Invalid path parameter pattern"))
}

/// Reject path parameters that could walk out of the deploy root
pub fn validate_path_param(param: &str) -> Result<(), CarrierError> {
    if path_param_pattern().is_match(param) {
        Ok(())
    } else {
        Err(CarrierError::InvalidPathParam(param.to_string()))
    }
}

/// Resolve the directory a code bundle is deployed into.
///
/// Joins the optional subpath onto the deploy root and substitutes the path
/// parameter placeholder. A root that contains the placeholder requires a
/// non-empty, valid parameter.
pub fn resolve_bundle_root(
    deploy_root: &str,
    deploy_subpath: Option<&str>,
    path_param: Option<&str>,
) -> Result<PathBuf, CarrierError> {
    let mut root = PathBuf::from(deploy_root);
    if let Some(subpath) = deploy_subpath.filter(|s| !s.is_empty()) {
        root.push(subpath);
    }

    let rendered = root.to_string_lossy().into_owned();
    if !rendered.contains(PATH_PARAM_TOKEN) {
        return Ok(root);
    }

    match path_param.filter(|p| !p.is_empty()) {
        Some(param) => {
            validate_path_param(param)?;
            Ok(PathBuf::from(rendered.replace(PATH_PARAM_TOKEN, param)))
        }
        None => Err(CarrierError::InvalidPathParam(
            "deploy root requires a path parameter".to_string(),
        )),
    }
}

/// Write verified bytes to `dest`.
///
/// Bytes go to a uniquely named hidden sibling file first and are renamed into
/// place, so a concurrent reader sees either the old artifact or the new one.
/// Concurrent writers to the same destination each stage their own file; the
/// last rename wins.
pub async fn place_artifact(dest: &Path, bytes: &[u8]) -> Result<(), CarrierError> {
    let file_name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CarrierError::Config(format!("Invalid deploy path: {}", dest.display())))?;

    let parent = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&parent).await?;

    let prefix = format!(".{}.", file_name);
    let target = dest.to_path_buf();
    let contents = bytes.to_vec();
    tokio::task::spawn_blocking(move || stage_and_persist(&parent, &prefix, &target, &contents))
        .await
        .map_err(|e| CarrierError::Io(std::io::Error::other(e)))??;

    info!(path = %dest.display(), size = bytes.len(), "Artifact placed");
    Ok(())
}

fn stage_and_persist(
    dir: &Path,
    prefix: &str,
    dest: &Path,
    bytes: &[u8],
) -> Result<(), CarrierError> {
    let mut staging = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(STAGING_SUFFIX)
        .tempfile_in(dir)?;
    staging.write_all(bytes)?;
    staging.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        staging
            .as_file()
            .set_permissions(std::fs::Permissions::from_mode(ARTIFACT_MODE))?;
    }

    staging.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

/// Move an exploded web archive out of the way before a new `.war` lands.
///
/// When `<bundle_root>/<name>` (the bundle name without `.war`) is an
/// existing directory it is renamed to
/// `<bundle_root>/archive/<YYYY-MM-DD_HH-MM-SS>/<name>`. A second archive in
/// the same second gets a `-1`, `-2`, ... suffix on the timestamp. Returns the
/// archive path, or `None` when there was nothing to archive.
pub async fn archive_exploded_war(
    bundle_root: &Path,
    code_bundle: &str,
    now: DateTime<Local>,
) -> Result<Option<PathBuf>, CarrierError> {
    let Some(stem) = code_bundle.strip_suffix(WAR_SUFFIX) else {
        return Ok(None);
    };

    let exploded = bundle_root.join(stem);
    match tokio::fs::metadata(&exploded).await {
        Ok(meta) if meta.is_dir() => {}
        _ => return Ok(None),
    }

    let stamp = now.format("%Y-%m-%d_%H-%M-%S").to_string();
    let archives = bundle_root.join(ARCHIVE_DIR);
    let mut archive_root = archives.join(&stamp);
    let mut attempt = 0;
    while tokio::fs::symlink_metadata(archive_root.join(stem)).await.is_ok() {
        attempt += 1;
        archive_root = archives.join(format!("{}-{}", stamp, attempt));
    }
    create_private_dir(&archive_root).await?;

    let archived = archive_root.join(stem);
    info!(
        from = %exploded.display(),
        to = %archived.display(),
        "Archiving exploded web archive"
    );
    tokio::fs::rename(&exploded, &archived).await?;

    Ok(Some(archived))
}

/// Create `path` and its parents with owner-only permissions
pub async fn create_private_dir(path: &Path) -> Result<(), CarrierError> {
    tokio::fs::create_dir_all(path).await?;
    set_mode(path, BUNDLE_DIR_MODE).await
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<(), CarrierError> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_mode(path: &Path, _mode: u32) -> Result<(), CarrierError> {
    tracing::debug!(path = %path.display(), "File modes not supported on this platform");
    Ok(())
}
