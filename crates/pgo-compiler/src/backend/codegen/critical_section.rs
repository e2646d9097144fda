//! # 臨界区間の追跡
//!
//! ラベルに入るたびに直前の区間を閉じて新しい区間を開きます。
//! 区間の状態は値として複製でき、`if` の分岐ごとに別々に追跡して
//! 合流点で突き合わせます。

use crate::backend::go::GoStatement;
use crate::frontend::error::IssueKind;

use super::{CodeGenerator, FunctionContext};

/// 開いている臨界区間
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriticalSection {
    /// ロックグループ。共有変数に触れないラベルなら `None`
    pub group: Option<usize>,
    /// やり直すときの Go のラベル
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CriticalSectionTracker {
    current: Option<CriticalSection>,
    /// 区間内で共有変数に書き込んだ
    wrote: bool,
    /// 次の文にはラベルが要る
    needs_label: bool,
}

impl CriticalSectionTracker {
    pub fn current(&self) -> Option<&CriticalSection> {
        self.current.as_ref()
    }

    pub fn wrote(&self) -> bool {
        self.wrote
    }

    pub fn mark_write(&mut self) {
        self.wrote = true;
    }

    pub fn needs_label(&self) -> bool {
        self.needs_label
    }

    /// 制御がここで途切れた（`goto` や `return` の後）
    pub fn unreachable(&mut self) {
        self.current = None;
        self.needs_label = true;
    }

    pub fn clear_needs_label(&mut self) {
        self.needs_label = false;
    }

    /// 文を出さずに区間の中にいることにする（ループを抜けた直後）
    pub fn resume(&mut self, section: Option<CriticalSection>, wrote: bool) {
        self.current = section;
        self.wrote = wrote;
        self.needs_label = false;
    }

    /// 2つの分岐の終わりが同じ区間にいるか
    pub fn compatible(&self, other: &Self) -> bool {
        self.current == other.current
    }

    pub fn merge(&mut self, other: &Self) {
        self.wrote |= other.wrote;
        self.needs_label |= other.needs_label;
    }
}

impl CodeGenerator<'_> {
    /// ラベルの区間に入る。直前の区間は閉じる
    pub(crate) fn start_section(&self, f: &mut FunctionContext, section: CriticalSection) {
        self.end_section(f);
        if let Some(group) = section.group {
            self.strategy.start_critical_section(f, group, &section.label);
        }
        f.tracker = CriticalSectionTracker {
            current: Some(section),
            wrote: false,
            needs_label: false,
        };
    }

    pub(crate) fn end_section(&self, f: &mut FunctionContext) {
        if let Some(section) = f.tracker.current.take() {
            if let Some(group) = section.group {
                self.strategy.end_critical_section(f, group, &section.label);
            }
        }
        f.tracker.wrote = false;
    }

    /// 区間を取り消してラベルへ戻る。追跡の状態は変えない
    pub(crate) fn abort_section(&self, f: &mut FunctionContext) {
        let Some(section) = f.tracker.current.clone() else {
            let exit = f.error_exit_statement();
            f.builder.add(exit);
            return;
        };
        if f.tracker.wrote && !self.strategy.rolls_back() {
            let (label, location) = f.label_source(&section.label);
            f.issues.warning(location, IssueKind::AbortWithoutRollback { label });
        }
        if let Some(group) = section.group {
            self.strategy.abort_critical_section(f, group, &section.label);
        }
        f.builder.add(GoStatement::Goto(section.label));
    }

    /// ループの戻りや呼び出しの後で、ラベルを置かずに区間を開き直す
    pub(crate) fn restore_section(&self, f: &mut FunctionContext, section: Option<CriticalSection>) {
        self.end_section(f);
        if let Some(section) = &section {
            if let Some(group) = section.group {
                self.strategy.start_critical_section(f, group, &section.label);
            }
        }
        f.tracker.current = section;
    }

    /// 区間を閉じる文だけを取り出す
    pub(crate) fn end_section_statements(&self, f: &mut FunctionContext) -> Vec<GoStatement> {
        f.builder.open();
        self.end_section(f);
        f.builder.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trackers_compare_by_current_section() {
        let mut a = CriticalSectionTracker::default();
        let b = CriticalSectionTracker::default();
        assert!(a.compatible(&b));
        a.current = Some(CriticalSection {
            group: Some(0),
            label: "l1".to_string(),
        });
        assert!(!a.compatible(&b));
        a.unreachable();
        assert!(a.compatible(&b));
        assert!(a.needs_label());
    }
}
