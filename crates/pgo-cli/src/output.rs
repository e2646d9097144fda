//! 出力ディレクトリへの書き出し
//!
//! 生成した Go ソースの保存、実行時ライブラリのコピー、`gofmt` の
//! 呼び出しを扱います。`gofmt` の失敗は警告にとどめます。

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// 実行時ライブラリのコピー先（出力ディレクトリからの相対パス）
pub const RUNTIME_DESTINATION: &str = "src/pgo";

/// Go ソースを書き出し、書いたファイルのパスを返す
pub fn write_source(output_dir: &Path, file_name: &str, source: &str) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("出力ディレクトリ {} を作成できません", output_dir.display()))?;
    let path = output_dir.join(file_name);
    fs::write(&path, source).with_context(|| format!("{} に書き込めません", path.display()))?;
    log::info!("{} を書き出しました", path.display());
    Ok(path)
}

/// `runtime_dir` 以下を `<output_dir>/src/pgo` に複製し、コピーしたファイル数を返す
pub fn copy_runtime(runtime_dir: &Path, output_dir: &Path) -> Result<usize> {
    let destination = output_dir.join(RUNTIME_DESTINATION);
    let mut copied = 0;
    for entry in WalkDir::new(runtime_dir).follow_links(true) {
        let entry = entry.with_context(|| format!("{} を走査できません", runtime_dir.display()))?;
        let relative = entry
            .path()
            .strip_prefix(runtime_dir)
            .with_context(|| format!("{} は実行時ライブラリの外にあります", entry.path().display()))?;
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).with_context(|| format!("{} を作成できません", target.display()))?;
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!("{} を {} にコピーできません", entry.path().display(), target.display())
            })?;
            copied += 1;
        }
    }
    log::debug!("実行時ライブラリ {} 件を {} にコピーしました", copied, destination.display());
    Ok(copied)
}

/// `gofmt -w` を試す。成功したら `true`
pub fn run_gofmt(path: &Path) -> bool {
    match Command::new("gofmt").arg("-w").arg(path).output() {
        Ok(output) if output.status.success() => {
            log::debug!("gofmt で {} を整形しました", path.display());
            true
        }
        Ok(output) => {
            log::warn!(
                "gofmt が失敗しました ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            false
        }
        Err(e) => {
            log::warn!("gofmt を起動できません: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_source_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("out");
        let path = write_source(&out, "main.go", "package main\n").unwrap();
        assert_eq!(path, out.join("main.go"));
        assert_eq!(fs::read_to_string(path).unwrap(), "package main\n");
    }

    #[test]
    fn test_copy_runtime_preserves_layout() {
        let runtime = tempfile::tempdir().unwrap();
        fs::create_dir_all(runtime.path().join("distsys")).unwrap();
        fs::write(runtime.path().join("go.mod"), "module pgo\n").unwrap();
        fs::write(runtime.path().join("distsys").join("resource.go"), "package distsys\n").unwrap();

        let out = tempfile::tempdir().unwrap();
        let copied = copy_runtime(runtime.path(), out.path()).unwrap();
        assert_eq!(copied, 2);
        let base = out.path().join(RUNTIME_DESTINATION);
        assert!(base.join("go.mod").is_file());
        assert_eq!(
            fs::read_to_string(base.join("distsys").join("resource.go")).unwrap(),
            "package distsys\n"
        );
    }

    #[test]
    fn test_copy_runtime_missing_directory_fails() {
        let out = tempfile::tempdir().unwrap();
        assert!(copy_runtime(&out.path().join("absent"), out.path()).is_err());
    }
}
