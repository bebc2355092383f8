//! Reading advisory documents out of a repository zip archive

use crate::error::Result;
use std::io::{Cursor, Read};

/// Contents of every member whose name satisfies `select`, in archive order
pub(crate) fn read_members<P>(artifact: &[u8], select: P) -> Result<Vec<(String, Vec<u8>)>>
where
    P: Fn(&str) -> bool,
{
    let mut zip = zip::ZipArchive::new(Cursor::new(artifact))?;
    let mut members = Vec::new();

    for i in 0..zip.len() {
        let mut file = zip.by_index(i)?;
        if file.is_dir() || !select(file.name()) {
            continue;
        }

        let name = file.name().to_string();
        let mut content = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut content)?;
        members.push((name, content));
    }

    Ok(members)
}

/// Fail unless `artifact` opens as a zip archive
pub(crate) fn check_archive(artifact: &[u8]) -> Result<()> {
    zip::ZipArchive::new(Cursor::new(artifact))?;
    Ok(())
}

/// Build a zip archive in memory
#[cfg(test)]
pub(crate) fn build_zip(members: &[(&str, &str)]) -> Vec<u8> {
    use std::io::Write;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in members {
        writer
            .start_file(*name, zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selects_matching_members_in_order() {
        let artifact = build_zip(&[
            ("db-master/pypi/django/CVE-1.yml", "a"),
            ("db-master/npm/lodash/CVE-2.yml", "b"),
            ("db-master/pypi/flask/CVE-3.yml", "c"),
            ("db-master/pypi/README.md", "d"),
        ]);

        let members = read_members(&artifact, |name| name.contains("/pypi/") && name.ends_with(".yml")).unwrap();
        let names: Vec<&str> = members.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["db-master/pypi/django/CVE-1.yml", "db-master/pypi/flask/CVE-3.yml"]);
        assert_eq!(members[1].1, b"c");
    }

    #[test]
    fn test_corrupt_archive_is_error() {
        assert!(read_members(b"not a zip", |_| true).is_err());
    }

    #[test]
    fn test_check_archive() {
        assert!(check_archive(&build_zip(&[("db-master/README.md", "x")])).is_ok());
        assert!(matches!(
            check_archive(b"<!DOCTYPE html><html><body>Sign in</body></html>"),
            Err(crate::error::AuditError::ZipError(_))
        ));
    }
}
