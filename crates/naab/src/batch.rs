//! Parallel-batch dependency analysis for top-level polyglot blocks.
//!
//! Given a statement list, every polyglot block is extracted with the
//! variables it reads (its bound-variable list) and the single variable it
//! writes (the `let`/assignment target, if any). RAW, WAW, and WAR
//! dependencies are computed in source order, then blocks are greedily
//! partitioned into sequential groups whose members are pairwise independent
//! and may run in parallel. Two consecutive blocks separated by two or more
//! intervening statements additionally split into separate batches.

use std::str::FromStr;

use crate::{
    ast::{BinOp, Expr, Stmt},
    executor::Language,
};

#[derive(Debug, Clone, PartialEq)]
pub struct BlockSite {
    /// Index of the owning statement in the analyzed list.
    pub stmt_index: usize,
    pub language: Language,
    pub code: String,
    pub reads: Vec<String>,
    pub write: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepKind {
    /// Read-after-write: a later block reads a variable an earlier one wrote.
    Raw,
    /// Write-after-write on the same variable.
    Waw,
    /// Write-after-read: a later block overwrites a variable an earlier one
    /// still reads.
    War,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    /// Index into the site list of the earlier block.
    pub from: usize,
    /// Index into the site list of the later block.
    pub to: usize,
    pub kind: DepKind,
}

/// Pulls out every statement-level polyglot block with its data-flow facts.
pub fn extract_sites(stmts: &[Stmt]) -> Vec<BlockSite> {
    let mut sites = Vec::new();
    for (stmt_index, stmt) in stmts.iter().enumerate() {
        let (write, inline) = match stmt {
            Stmt::VarDecl {
                name,
                init: Some(init),
                ..
            } => (Some(name.clone()), inline_of(init)),
            Stmt::Expr(expr) => match expr {
                Expr::Binary {
                    op: BinOp::Assign,
                    left,
                    right,
                    ..
                } => match (&**left, inline_of(right)) {
                    (Expr::Identifier(name, _), Some(inline)) => {
                        (Some(name.clone()), Some(inline))
                    }
                    _ => (None, None),
                },
                other => (None, inline_of(other)),
            },
            _ => (None, None),
        };
        if let Some((language, code, reads)) = inline {
            sites.push(BlockSite {
                stmt_index,
                language,
                code,
                reads,
                write,
            });
        }
    }
    sites
}

fn inline_of(expr: &Expr) -> Option<(Language, String, Vec<String>)> {
    if let Expr::InlineCode {
        language,
        code,
        bound,
        ..
    } = expr
    {
        let language = Language::from_str(language).ok()?;
        Some((language, code.clone(), bound.clone()))
    } else {
        None
    }
}

/// All pairwise dependencies, ordered by source position.
pub fn dependencies(sites: &[BlockSite]) -> Vec<Dependency> {
    let mut deps = Vec::new();
    for to in 0..sites.len() {
        for from in 0..to {
            let earlier = &sites[from];
            let later = &sites[to];
            if let Some(write) = &earlier.write {
                if later.reads.contains(write) {
                    deps.push(Dependency {
                        from,
                        to,
                        kind: DepKind::Raw,
                    });
                }
                if later.write.as_ref() == Some(write) {
                    deps.push(Dependency {
                        from,
                        to,
                        kind: DepKind::Waw,
                    });
                }
            }
            if let Some(write) = &later.write {
                if earlier.reads.contains(write) {
                    deps.push(Dependency {
                        from,
                        to,
                        kind: DepKind::War,
                    });
                }
            }
        }
    }
    deps
}

/// Greedy partition into sequential groups of pairwise-independent blocks.
/// Returns site indices. Groups run in source order; members of one group
/// may run in parallel.
pub fn plan_groups(sites: &[BlockSite]) -> Vec<Vec<usize>> {
    let deps = dependencies(sites);
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for index in 0..sites.len() {
        let start_new = match groups.last() {
            None => true,
            Some(group) => {
                let last = *group.last().expect("groups are never empty");
                // A gap of two or more intervening statements splits the
                // batch even without a data dependency.
                let gap = sites[index].stmt_index - sites[last].stmt_index - 1;
                gap >= 2
                    || group.iter().any(|&member| {
                        deps.iter()
                            .any(|d| d.from == member && d.to == index)
                    })
            }
        };
        if start_new {
            groups.push(vec![index]);
        } else {
            groups
                .last_mut()
                .expect("checked non-empty above")
                .push(index);
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn sites_of(source: &str) -> Vec<BlockSite> {
        let program = parse_program(source, "batch.naab").unwrap();
        extract_sites(&program.main.unwrap())
    }

    #[test]
    fn extracts_reads_and_writes() {
        let sites = sites_of(
            "main {\n  let a = <<python 1 >>\n  let b = <<python[a] a + 1 >>\n}",
        );
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].write.as_deref(), Some("a"));
        assert!(sites[0].reads.is_empty());
        assert_eq!(sites[1].reads, vec!["a".to_owned()]);
    }

    #[test]
    fn raw_dependency_forces_sequential_groups() {
        let sites = sites_of(
            "main {\n  let a = <<python 1 >>\n  let b = <<python[a] a + 1 >>\n}",
        );
        let deps = dependencies(&sites);
        assert_eq!(deps, vec![Dependency { from: 0, to: 1, kind: DepKind::Raw }]);
        assert_eq!(plan_groups(&sites), vec![vec![0], vec![1]]);
    }

    #[test]
    fn independent_blocks_share_a_group() {
        let sites = sites_of(
            "main {\n  let a = <<python 1 >>\n  let b = <<python 2 >>\n  let c = <<python[a, b] a + b >>\n}",
        );
        assert_eq!(plan_groups(&sites), vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn waw_and_war_are_detected() {
        let sites = sites_of(
            "main {\n  let a = <<python[x] 1 >>\n  a = <<python 2 >>\n}",
        );
        let deps = dependencies(&sites);
        assert!(deps.iter().any(|d| d.kind == DepKind::Waw));
        // The second block overwrites nothing the first reads, so no WAR
        // here; build one explicitly.
        let sites = sites_of(
            "main {\n  let y = <<python[x] x >>\n  x = <<python 2 >>\n}",
        );
        let deps = dependencies(&sites);
        assert!(deps.iter().any(|d| d.kind == DepKind::War));
    }

    #[test]
    fn statement_gap_splits_batches() {
        let sites = sites_of(
            "main {\n  let a = <<python 1 >>\n  let g1 = 0\n  let g2 = 0\n  let b = <<python 2 >>\n}",
        );
        // Independent, but separated by two host statements.
        assert_eq!(plan_groups(&sites), vec![vec![0], vec![1]]);
    }
}
