// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

//! File delivery: places envelope-and-content pairs into per-user
//! sub-directories for pop-by-name fan-out, per the design's §4.6.

use std::path::Path;

use crate::modules::fileop;

/// Copies (or hard-links) `envelope_src`/`content_src` into `subdir`.
///
/// `tag` is the filename stem shared by the envelope and content files
/// (their message id) and is used only to name the copies inside `subdir`.
/// When `pop_by_name` is true the content is left where it is (`subdir`
/// holds only the envelope, resolved back through the parent spool at read
/// time); when false the content is also placed in `subdir`.
pub fn deliver_to(
    tag: &str,
    subdir: &Path,
    envelope_src: &Path,
    content_src: &Path,
    hardlink: bool,
    pop_by_name: bool,
) -> std::io::Result<()> {
    fileop::mkdir_tight(subdir)?;

    let envelope_dst = subdir.join(format!("{tag}.envelope"));
    place(envelope_src, &envelope_dst, hardlink)?;

    if !pop_by_name {
        let content_dst = subdir.join(format!("{tag}.content"));
        place(content_src, &content_dst, hardlink)?;
    }

    Ok(())
}

fn place(src: &Path, dst: &Path, hardlink: bool) -> std::io::Result<()> {
    if hardlink {
        fileop::hardlink_or_copy(src, dst)
    } else {
        fileop::copy(src, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn pop_by_name_leaves_content_in_parent() {
        let dir = tempdir().unwrap();
        let envelope_src = dir.path().join("m.envelope");
        let content_src = dir.path().join("m.content");
        std::fs::write(&envelope_src, b"envelope").unwrap();
        std::fs::write(&content_src, b"content").unwrap();

        let subdir = dir.path().join("alice");
        deliver_to("m", &subdir, &envelope_src, &content_src, false, true).unwrap();

        assert!(subdir.join("m.envelope").exists());
        assert!(!subdir.join("m.content").exists());
        assert!(content_src.exists());
    }

    #[test]
    fn non_pop_by_name_copies_both() {
        let dir = tempdir().unwrap();
        let envelope_src = dir.path().join("m.envelope");
        let content_src = dir.path().join("m.content");
        std::fs::write(&envelope_src, b"envelope").unwrap();
        std::fs::write(&content_src, b"content").unwrap();

        let subdir = dir.path().join("bob");
        deliver_to("m", &subdir, &envelope_src, &content_src, true, false).unwrap();

        assert!(subdir.join("m.envelope").exists());
        assert_eq!(std::fs::read(subdir.join("m.content")).unwrap(), b"content");
    }
}
