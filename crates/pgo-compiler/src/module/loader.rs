//! # TLA+ モジュールローダー
//!
//! `EXTENDS` で参照されたモジュールを検索パスから基底名（大文字小文字を
//! 区別）と拡張子 `.tla` で探し、解析結果を正規化パスをキーにキャッシュします。

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use crate::frontend::ast::TlaModule;
use crate::frontend::error::{CompilerError, IssueContext, IssueKind, Result, SourceLocation};
use crate::frontend::parser;

/// モジュールファイルの拡張子
pub const TLA_EXTENSION: &str = "tla";

/// ソースファイルを UTF-8 文字列として読み込む
///
/// 内容はメモリマップ経由で読み、関数を抜ける時点でマップは解放されます。
pub fn read_source(path: &Path) -> Result<String> {
    let io_error = |source| CompilerError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_error)?;
    let length = file.metadata().map_err(io_error)?.len();
    if length == 0 {
        return Ok(String::new());
    }
    // SAFETY: マップは読み取り専用で、この関数の中でのみ参照され複製後に破棄される
    let map = unsafe { Mmap::map(&file) }.map_err(io_error)?;
    match std::str::from_utf8(&map) {
        Ok(text) => Ok(text.to_string()),
        Err(_) => Err(CompilerError::Encoding {
            path: path.to_path_buf(),
        }),
    }
}

/// モジュールの読み込みとキャッシュ
#[derive(Debug, Default)]
pub struct TlaModuleLoader {
    search_path: Vec<PathBuf>,
    cache: HashMap<PathBuf, Arc<TlaModule>>,
}

impl TlaModuleLoader {
    pub fn new(search_path: Vec<PathBuf>) -> Self {
        Self {
            search_path,
            cache: HashMap::new(),
        }
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// モジュールを探して読み込む
    ///
    /// 見つからなければ `module-not-found`（確認したパスの一覧付き）を、
    /// 構文エラーがあればその診断を `issues` に記録して `None` を返します。
    pub fn load(
        &mut self,
        name: &str,
        location: &SourceLocation,
        issues: &mut IssueContext,
    ) -> Result<Option<Arc<TlaModule>>> {
        let mut paths_checked = Vec::new();
        let file_name = format!("{}.{}", name, TLA_EXTENSION);
        for directory in &self.search_path {
            let candidate = directory.join(&file_name);
            paths_checked.push(candidate.clone());
            if !candidate.is_file() {
                continue;
            }
            let canonical = candidate.canonicalize().map_err(|source| CompilerError::Io {
                path: candidate.clone(),
                source,
            })?;
            if let Some(module) = self.cache.get(&canonical) {
                log::debug!("モジュール `{}` をキャッシュから取得しました", name);
                return Ok(Some(Arc::clone(module)));
            }

            log::info!("モジュール `{}` を {} から読み込みます", name, canonical.display());
            let source = read_source(&canonical)?;
            let file = canonical.display().to_string();
            let Some(module) = parser::parse_module(&file, &source, issues)? else {
                return Ok(None);
            };
            let module = Arc::new(module);
            self.cache.insert(canonical, Arc::clone(&module));
            return Ok(Some(module));
        }
        issues.error(
            location.clone(),
            IssueKind::ModuleNotFound {
                name: name.to_string(),
                paths_checked,
            },
        );
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_read_source_rejects_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Bad.tla");
        fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();
        assert!(matches!(read_source(&path), Err(CompilerError::Encoding { .. })));
        let empty = dir.path().join("Empty.tla");
        fs::write(&empty, "").unwrap();
        assert_eq!(read_source(&empty).unwrap(), "");
    }

    #[test]
    fn test_second_load_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Small.tla"), "---- MODULE Small ----\nOne == 1\n====\n").unwrap();
        let mut loader = TlaModuleLoader::new(vec![dir.path().to_path_buf()]);
        let mut issues = IssueContext::new();
        let first = loader.load("Small", &SourceLocation::unknown(), &mut issues).unwrap().unwrap();
        let second = loader.load("Small", &SourceLocation::unknown(), &mut issues).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(issues.is_empty());
    }

    #[test]
    fn test_lists_every_candidate_checked() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let mut loader = TlaModuleLoader::new(vec![first.path().to_path_buf(), second.path().to_path_buf()]);
        let mut issues = IssueContext::new();
        assert!(loader.load("Missing", &SourceLocation::unknown(), &mut issues).unwrap().is_none());
        match &issues.issues()[0].kind {
            IssueKind::ModuleNotFound { paths_checked, .. } => {
                assert_eq!(paths_checked.len(), 2);
                assert!(paths_checked[1].ends_with("Missing.tla"));
            }
            other => panic!("module-not-found が期待されます: {:?}", other),
        }
    }

    #[test]
    fn test_empty_search_path_checks_nothing() {
        let mut loader = TlaModuleLoader::new(Vec::new());
        let mut issues = IssueContext::new();
        assert!(loader.load("Sum", &SourceLocation::unknown(), &mut issues).unwrap().is_none());
        assert_eq!(issues.issues().len(), 1);
        match &issues.issues()[0].kind {
            IssueKind::ModuleNotFound { paths_checked, .. } => assert!(paths_checked.is_empty()),
            other => panic!("module-not-found が期待されます: {:?}", other),
        }
    }

    #[test]
    fn test_loads_module_by_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("Sum.tla"),
            "---- MODULE Sum ----\nEXTENDS Integers\nSum(a, b) == a + b\n====\n",
        )
        .unwrap();
        let mut loader = TlaModuleLoader::new(vec![dir.path().to_path_buf()]);
        let mut issues = IssueContext::new();
        let module = loader.load("Sum", &SourceLocation::unknown(), &mut issues).unwrap().unwrap();
        assert_eq!(module.name.id, "Sum");
        assert_eq!(module.units.len(), 1);
        assert!(issues.is_empty(), "{}", issues.format());
    }
}
