//! XWiki archive (XAR) handling

use crate::error::LoadError;
use regex::Regex;
use std::fs::File;
use std::path::Path;
use std::sync::LazyLock;

/// Import page; also the base of the import request
pub const XAR_IMPORT_URL: &str = "/import/XWiki/XWikiPreferences?";
/// Upload endpoint
pub const XAR_UPLOAD_URL: &str = "/upload/XWiki/XWikiPreferences";
/// Where the upload form redirects to
pub const XAR_REDIRECT: &str = "/import/XWiki/XWikiPreferences?editor=globaladmin&section=Import";

/// Extract the CSRF form token from the import page
#[must_use]
pub fn form_token(page: &str) -> Option<String> {
    static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"name="form_token" content="([^"]*)""#).expect("form token pattern is valid")
    });
    TOKEN_RE.captures(page).map(|caps| caps[1].to_string())
}

/// Wiki page name for an archive entry: `<dir>.<stem>`.
///
/// Returns `None` for the `package.xml` descriptor and directory entries.
#[must_use]
pub fn page_name(entry: &str) -> Option<String> {
    let (space, file) = entry.rsplit_once('/').unwrap_or(("", entry));
    let stem = match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file,
    };

    if stem.is_empty() || stem == "package" {
        return None;
    }
    Some(format!("{space}.{stem}"))
}

/// Page names of every document in the archive, in archive order.
///
/// # Errors
/// Fails if the file cannot be opened or is not a zip archive.
pub fn page_names(path: &Path) -> Result<Vec<String>, LoadError> {
    let archive_error = |source| LoadError::Archive {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(|e| LoadError::io(format!("opening {}", path.display()), e))?;
    let mut archive = zip::ZipArchive::new(file).map_err(archive_error)?;

    let mut pages = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index).map_err(archive_error)?;
        if let Some(page) = page_name(entry.name()) {
            tracing::info!("- adding file {} as {} to the list of imported files", entry.name(), page);
            pages.push(page);
        }
    }
    Ok(pages)
}

/// Query of the import request for `pages` of the uploaded `xar_name`
#[must_use]
pub fn import_query(xar_name: &str, pages: &[String]) -> String {
    let mut query = format!(
        "editor=globaladmin&section=Import&action=import&name={xar_name}&historyStrategy=replace&importAsBackup=false&ajax=1"
    );
    for page in pages {
        query.push_str(&format!("&language_{page}:=&pages={page}:"));
    }
    query
}
