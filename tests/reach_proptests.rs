use std::collections::BTreeSet;
use std::fmt::Write;

use internment::Arena;
use mmcheck::llvm::{self, ast::Gid};
use mmcheck::llvm::callgraph::CallGraph;
use mmcheck::opt::ReachIndex;
use proptest::prelude::*;

/// `calls[i]` are the callees of `@p{i}`, index `n` is the external `@ext`
fn call_graphs() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1..8usize).prop_flat_map(|n| prop::collection::vec(prop::collection::vec(0..=n, 0..4), n))
}

fn render(calls: &[Vec<usize>]) -> String {
    let n = calls.len();
    let mut s = String::from("declare void @ext()\ndeclare void @MMPtrKeyCheck(i64 mmptr*)\n@h = global i64 mmptr null\n\n");
    for (i, callees) in calls.iter().enumerate() {
        writeln!(s, "define void @p{i}() {{").unwrap();
        writeln!(s, "  call void @MMPtrKeyCheck(i64 mmptr* @h)").unwrap();
        for &c in callees {
            if c == n {
                writeln!(s, "  call void @ext()").unwrap();
            } else {
                writeln!(s, "  call void @p{c}()").unwrap();
            }
        }
        writeln!(s, "  ret void\n}}").unwrap();
    }
    s
}

// everything reachable through at least one call
fn naive_reaches(cg: &CallGraph, from: Gid) -> BTreeSet<Gid> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<Gid> = cg.callees(from).into_iter().collect();
    while let Some(g) = stack.pop() {
        if seen.insert(g) {
            stack.extend(cg.callees(g));
        }
    }
    seen
}

proptest! {
    #[test]
    fn closure_matches_naive_search(calls in call_graphs()) {
        let src = render(&calls);
        let arena = Arena::new();
        let prog = llvm::parse(&src, &arena).unwrap();
        let check = prog.tables.global("MMPtrKeyCheck").unwrap();
        let cg = CallGraph::build(&prog, |g| g == check);
        let reach = ReachIndex::build(&cg);

        for &p in cg.nodes() {
            prop_assert_eq!(reach.reaches(p), &naive_reaches(&cg, p));
            prop_assert!(!reach.reaches(p).contains(&check));
        }
    }

    #[test]
    fn closure_is_transitive_and_symmetric(calls in call_graphs()) {
        let src = render(&calls);
        let arena = Arena::new();
        let prog = llvm::parse(&src, &arena).unwrap();
        let cg = CallGraph::build(&prog, |_| false);
        let reach = ReachIndex::build(&cg);

        let all: Vec<Gid> = (0..prog.tables.globals.len() as u32).map(Gid::from).collect();
        for &a in &all {
            for &b in reach.reaches(a) {
                prop_assert!(reach.reached_by(b).contains(&a));
                for &c in reach.reaches(b) {
                    prop_assert!(reach.can_reach(a, c));
                }
            }
            for &b in reach.reached_by(a) {
                prop_assert!(reach.can_reach(b, a));
            }
        }
    }
}

#[test]
fn mutual_recursion() {
    let src = render(&[vec![1], vec![0, 2], vec![2], vec![]]);
    let arena = Arena::new();
    let prog = llvm::parse(&src, &arena).unwrap();
    let cg = CallGraph::build(&prog, |_| false);
    let reach = ReachIndex::build(&cg);
    let p = |i: usize| prog.tables.global(&format!("p{i}")).unwrap();

    assert!(reach.can_reach(p(0), p(1)) && reach.can_reach(p(1), p(0)));
    assert!(reach.can_reach(p(0), p(0)));
    assert!(reach.can_reach(p(2), p(2)));
    assert!(!reach.can_reach(p(3), p(3)));
    assert!(reach.reached_by(p(3)).is_empty());
    assert_eq!(reach.reached_by(p(2)), &[p(0), p(1), p(2)].into_iter().collect());
}
