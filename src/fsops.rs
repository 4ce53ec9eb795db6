//! Small filesystem helpers shared by the stages.

use std::path::Path;

use tokio::fs;

/// Move `src` to `dest`, replacing any stale file already there.
///
/// Falls back to copy + remove when rename fails, so moves into an
/// external share mount on another filesystem still work.
pub(crate) async fn move_replacing(src: &Path, dest: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }
    match fs::remove_file(dest).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    match fs::rename(src, dest).await {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(src, dest).await?;
            fs::remove_file(src).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_move_replacing_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        let dest = dir.path().join("sub").join("dest.txt");
        std::fs::write(&src, b"new").unwrap();
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(&dest, b"old").unwrap();

        move_replacing(&src, &dest).await.unwrap();
        assert!(!src.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_move_replacing_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        std::fs::write(&src, b"data").unwrap();
        let dest = dir.path().join("a").join("b").join("dest.txt");

        move_replacing(&src, &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"data");
    }
}
