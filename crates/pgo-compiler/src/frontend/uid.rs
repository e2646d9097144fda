//! # 一意識別子
//!
//! ASTノードごとに払い出される識別子です。名前解決・型推論・
//! 原子性解析の結果はすべてこの識別子をキーにした表として保持されます。

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::error::SourceLocation;

static NEXT_UID: AtomicU64 = AtomicU64::new(1);

/// プロセス内で一意な識別子。等価性は同一性そのもの
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(u64);

impl Uid {
    /// 新しい識別子を払い出す
    pub fn fresh() -> Self {
        Uid(NEXT_UID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// ノードに付随するメタ情報
///
/// 構造的な比較では常に等しいとみなされるため、ASTの `PartialEq` は
/// 識別子と位置を無視した形の比較になります。
#[derive(Debug, Clone)]
pub struct Meta {
    /// ノードの識別子
    pub uid: Uid,
    /// ソース上の位置
    pub location: SourceLocation,
}

impl Meta {
    /// 新しい識別子を持つメタ情報を作成
    pub fn new(location: SourceLocation) -> Self {
        Self {
            uid: Uid::fresh(),
            location,
        }
    }

    /// 位置を持たない合成ノード用
    pub fn synthetic() -> Self {
        Self::new(SourceLocation::unknown())
    }

    /// 位置はそのままに識別子だけを取り替えた複製
    pub fn refreshed(&self) -> Self {
        Self::new(self.location.clone())
    }
}

impl PartialEq for Meta {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_uids_are_distinct() {
        let a = Uid::fresh();
        let b = Uid::fresh();
        assert_ne!(a, b);
        assert!(b.raw() > a.raw());
    }

    #[test]
    fn test_meta_equality_ignores_identity() {
        let a = Meta::synthetic();
        let b = a.refreshed();
        assert_ne!(a.uid, b.uid);
        assert_eq!(a, b);
    }
}
