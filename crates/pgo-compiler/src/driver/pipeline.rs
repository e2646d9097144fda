//! # コンパイルパイプライン
//!
//! 入力テキストから Go のソースまでの各パスを順に実行します。
//! 1つのパスがエラーを報告したら、その時点までの診断を持って止まります。

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::backend::codegen;
use crate::backend::go::{self, GoModule};
use crate::frontend::error::{CompilerError, Issue, IssueContext, IssueKind, Result};
use crate::frontend::parser;
use crate::frontend::semantic;
use crate::middleend::infer_atomicity;
use crate::module::{read_source, TlaModuleLoader};
use crate::typesystem::infer_types;

use super::options::CompileOptions;

/// パイプラインの段階
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilationStage {
    ParseAlgorithm,
    ParseModule,
    ConstantDefinitions,
    OptionCheck,
    MacroExpansion,
    Validation,
    Scoping,
    TypeInference,
    Atomicity,
    CodeGeneration,
}

impl fmt::Display for CompilationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompilationStage::ParseAlgorithm => "アルゴリズムの構文解析",
            CompilationStage::ParseModule => "モジュールの構文解析",
            CompilationStage::ConstantDefinitions => "定数定義の解析",
            CompilationStage::OptionCheck => "オプションの検査",
            CompilationStage::MacroExpansion => "マクロ展開",
            CompilationStage::Validation => "構造検査",
            CompilationStage::Scoping => "名前解決",
            CompilationStage::TypeInference => "型推論",
            CompilationStage::Atomicity => "原子性解析",
            CompilationStage::CodeGeneration => "コード生成",
        };
        f.write_str(name)
    }
}

/// コンパイルの結果
#[derive(Debug, Clone)]
pub struct CompileOutput {
    /// 整形前の Go ソース
    pub go_source: String,
    /// 正規化済みの Go モジュール
    pub module: GoModule,
    /// 警告（エラーがあれば結果は返らない）
    pub issues: Vec<Issue>,
}

struct Pipeline {
    issues: IssueContext,
    started: Instant,
}

impl Pipeline {
    fn new() -> Self {
        Self {
            issues: IssueContext::new(),
            started: Instant::now(),
        }
    }

    /// パスの後でエラーがないことを確かめる
    fn checkpoint(&self, stage: CompilationStage) -> Result<()> {
        if let Some(internal) = self.issues.errors().find_map(|issue| match &issue.kind {
            IssueKind::InternalCompilerError { message } => Some(message.clone()),
            _ => None,
        }) {
            return Err(CompilerError::Internal(internal));
        }
        if self.issues.has_errors() {
            log::info!("{} でエラーが見つかったため中断します", stage);
            return Err(CompilerError::Failed {
                issues: self.issues.sorted(),
            });
        }
        log::info!("{} 完了 ({:?})", stage, self.started.elapsed());
        Ok(())
    }

    /// パスが結果を返さなかったときの失敗
    fn missing(&self, stage: CompilationStage) -> CompilerError {
        if self.issues.has_errors() {
            CompilerError::Failed {
                issues: self.issues.sorted(),
            }
        } else {
            CompilerError::Internal(format!("{} が結果を返しませんでした", stage))
        }
    }
}

/// ファイルを読み込んでコンパイルする
///
/// `EXTENDS` されたモジュールは入力ファイルと同じディレクトリ、
/// 続いて `options.module_paths` の順に探します。
pub fn compile_file(path: &Path, options: &CompileOptions) -> Result<CompileOutput> {
    let source = read_source(path)?;
    let directory = path.parent().map(Path::to_path_buf).unwrap_or_default();
    compile_source(&path.display().to_string(), &source, Some(&directory), options)
}

/// ソーステキストをコンパイルする。`file` は診断に使う名前
pub fn compile_source(
    file: &str,
    source: &str,
    directory: Option<&Path>,
    options: &CompileOptions,
) -> Result<CompileOutput> {
    let mut pipeline = Pipeline::new();
    log::info!("{} のコンパイルを開始します", file);

    let algorithm = parser::parse_algorithm(file, source, &mut pipeline.issues)?;
    pipeline.checkpoint(CompilationStage::ParseAlgorithm)?;
    let algorithm = algorithm.ok_or_else(|| pipeline.missing(CompilationStage::ParseAlgorithm))?;

    let module = parser::parse_module(file, source, &mut pipeline.issues)?;
    pipeline.checkpoint(CompilationStage::ParseModule)?;
    let module = module.ok_or_else(|| pipeline.missing(CompilationStage::ParseModule))?;

    let constants = semantic::parse_constant_definitions(&options.constants, &mut pipeline.issues);
    pipeline.checkpoint(CompilationStage::ConstantDefinitions)?;

    semantic::check_options(&algorithm, &module, options, &mut pipeline.issues);
    pipeline.checkpoint(CompilationStage::OptionCheck)?;

    let algorithm = semantic::expand_macros(&algorithm, &mut pipeline.issues);
    pipeline.checkpoint(CompilationStage::MacroExpansion)?;

    semantic::validate(&algorithm, &mut pipeline.issues);
    pipeline.checkpoint(CompilationStage::Validation)?;

    let mut search_path: Vec<PathBuf> = directory.map(Path::to_path_buf).into_iter().collect();
    search_path.extend(options.module_paths.iter().cloned());
    let mut loader = TlaModuleLoader::new(search_path);
    let mut registry =
        semantic::resolve_scopes(&module, &algorithm, &mut loader, &constants, &mut pipeline.issues)?;
    pipeline.checkpoint(CompilationStage::Scoping)?;

    let types = infer_types(&algorithm, &registry, &mut pipeline.issues);
    pipeline.checkpoint(CompilationStage::TypeInference)?;

    infer_atomicity(&algorithm, &mut registry);
    log::debug!("ロックグループ {} 個", registry.lock_group_count());
    pipeline.checkpoint(CompilationStage::Atomicity)?;

    let mut go_module = codegen::generate(&algorithm, &registry, &types, options, &mut pipeline.issues);
    pipeline.checkpoint(CompilationStage::CodeGeneration)?;

    go::normalise(&mut go_module);
    let go_source = go::print_module(&go_module);
    let issues = pipeline.issues.sorted();
    let warnings = issues.iter().filter(|issue| !issue.is_error()).count();
    if warnings > 0 {
        log::warn!("{} は警告 {} 件付きでコンパイルされました", file, warnings);
    }
    Ok(CompileOutput {
        go_source,
        module: go_module,
        issues,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE: &str = r#"---- MODULE Counter ----
EXTENDS Integers
(* --algorithm Counter
variables x = 0;
begin
  l1: x := x + 1;
  l2: print x;
end algorithm *)
====
"#;

    #[test]
    fn test_single_process_compiles_to_main() {
        let output = compile_source("Counter.tla", SINGLE, None, &CompileOptions::default())
            .expect("コンパイルできるはず");
        assert!(output.go_source.starts_with("package main\n"));
        assert!(output.go_source.contains("func main() {"));
        assert!(output.go_source.contains("fmt.Println(x)"));
        assert!(output.issues.iter().all(|issue| !issue.is_error()));
    }

    #[test]
    fn test_missing_algorithm_is_a_parse_failure() {
        let source = "---- MODULE Empty ----\n====\n";
        let error = compile_source("Empty.tla", source, None, &CompileOptions::default()).unwrap_err();
        assert!(!error.issues().is_empty());
        assert!(error
            .issues()
            .iter()
            .all(|issue| matches!(issue.kind, IssueKind::Parse { .. })));
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(CompilationStage::Scoping.to_string(), "名前解決");
    }
}
