use internment::Arena;
use mmcheck::llvm::{self, ast};
use mmcheck::llvm::callgraph::CallGraph;
use mmcheck::opt::{self, isolate, CallSite, CheckFns, Invalidation, ReachIndex};
use mmcheck::Config;
use std::fs;

fn init_logger() {
    let _ = env_logger::Builder::from_env("MMCHECK_LOG")
        .format_timestamp(None)
        .is_test(true)
        .try_init();
}

fn read(test: &str) -> String {
    fs::read_to_string(format!("tests/programs/{test}")).expect("failed to read file")
}

fn removed_in(report: &opt::Report, name: &str) -> Option<usize> {
    report.removed.iter().find(|(n, _)| n == name).map(|(_, r)| *r)
}

fn checks_in(prog: &ast::Prog, name: &str) -> usize {
    let (_, fdecl) = prog.fdecls
        .iter()
        .find(|(g, _)| prog.tables.global_name(*g) == name)
        .expect("no such function");
    fdecl.cfg.block_iter()
        .flat_map(|b| b.insns.iter())
        .filter(|(_, insn)| match insn {
            ast::Insn::Call(_, ast::Operand::Gid(g), _) => prog.tables.global_name(*g).ends_with("KeyCheck"),
            _ => false,
        })
        .count()
}

macro_rules! keycheck_test {
    ($name:ident, $tests:ident) => {
        #[test]
        fn $name() {
            init_logger();
            for &(test, expected) in $tests {
                let s = read(test);
                let arena = Arena::new();
                let mut prog = llvm::parse(&s, &arena).expect(test);
                let config = Config::default();

                let report = opt::run(&mut prog, &arena, &config);
                assert!(report.skipped.is_empty(), "skipped functions in {test}: {:?}", report.skipped);
                for &(f, removed) in expected {
                    assert_eq!(removed_in(&report, f), Some(removed), "failed on @{f} in {test}");
                }

                let again = opt::run(&mut prog, &arena, &config);
                assert!(!again.changed(), "second run changed {test}:\n{again}");
            }
        }
    };
}

keycheck_test!(straight_line, STRAIGHT_LINE_TESTS);
keycheck_test!(control_flow, CONTROL_FLOW_TESTS);
keycheck_test!(calls, CALL_TESTS);

type Expected = &'static [(&'static str, usize)];

const STRAIGHT_LINE_TESTS: &[(&str, Expected)] = &[
    ("sequential.ll", &[("main", 1)]),
    ("store.ll", &[("store_to_checked", 0), ("store_elsewhere", 1)]),
    ("array.ll", &[("f", 2)]),
    ("named.ll", &[("named_first", 1)]),
];

const CONTROL_FLOW_TESTS: &[(&str, Expected)] = &[
    ("diamond.ll", &[("both", 1), ("one", 0)]),
    ("loop.ll", &[("steady", 2), ("frees_in_body", 0)]),
];

const CALL_TESTS: &[(&str, Expected)] = &[
    ("indirect.ll", &[("f", 0)]),
    ("whitelist.ll", &[("alloc_between", 1), ("external_between", 0)]),
    ("transitive.ll", &[("deep", 0), ("local_survives", 1), ("global_clobbered", 0)]),
    ("recursion.ll", &[("even", 0), ("odd", 0)]),
    ("escape.ll", &[("passed", 0), ("stored", 0), ("stored_then_alloc", 1)]),
];

#[test]
fn first_check_is_kept() {
    init_logger();
    let s = read("sequential.ll");
    let arena = Arena::new();
    let mut prog = llvm::parse(&s, &arena).unwrap();
    opt::run(&mut prog, &arena, &Config::default());

    let entry = &prog.fdecls[0].1.cfg.entry;
    let kinds: Vec<_> = entry.insns.iter().map(|(_, i)| matches!(i, ast::Insn::Call(..))).collect();
    assert_eq!(kinds, vec![true, false, false]);
}

#[test]
fn user_names_do_not_merge_checks() {
    init_logger();
    let s = read("named.ll");
    let arena = Arena::new();
    let mut prog = llvm::parse(&s, &arena).unwrap();
    let report = opt::run(&mut prog, &arena, &Config::default());
    assert_eq!(report.total_removed(), 1);
    assert_eq!(checks_in(&prog, "named_first"), 1);

    let entry = &prog.fdecls[0].1.cfg.entry;
    assert_eq!(&*entry.insns[0].0, "_call__0");
    assert!(matches!(entry.insns[1].1, ast::Insn::Load(..)));

    let twice = "@h = global i64 mmptr null
declare void @MMPtrKeyCheck(i64 mmptr*)
define void @f() {
  %k = call void @MMPtrKeyCheck(i64 mmptr* @h)
  %k = call void @MMPtrKeyCheck(i64 mmptr* @h)
  ret void
}";
    let err = llvm::parse(twice, &arena).unwrap_err();
    assert_eq!(err.to_string(), "5:3: %k is defined more than once");
}

#[test]
fn malformed_functions_are_skipped() {
    init_logger();
    let s = read("malformed.ll");
    let arena = Arena::new();
    let mut prog = llvm::parse(&s, &arena).unwrap();
    let report = opt::run(&mut prog, &arena, &Config::default());

    let mut skipped: Vec<_> = report.skipped.iter().map(|(n, _)| n.as_str()).collect();
    skipped.sort();
    assert_eq!(skipped, vec!["bad_check", "null_store", "wrong_kind"]);
    assert_eq!(removed_in(&report, "fine"), Some(1));
    assert_eq!(checks_in(&prog, "bad_check"), 3);
    assert_eq!(checks_in(&prog, "wrong_kind"), 3);
    assert_eq!(checks_in(&prog, "null_store"), 2);
}

#[test]
fn isolated_calls_end_their_block() {
    init_logger();
    for test in ["indirect.ll", "whitelist.ll", "transitive.ll", "recursion.ll", "loop.ll"] {
        let s = read(test);
        let arena = Arena::new();
        let mut prog = llvm::parse(&s, &arena).unwrap();
        let config = Config::default();

        let checks = CheckFns::resolve(&config, &prog.tables);
        let cg = CallGraph::build(&prog, |g| checks.is_check(g));
        let reach = ReachIndex::build(&cg);
        let inv = Invalidation::classify(&prog, &cg, &reach, &config);
        let iso = isolate::run(&mut prog, &inv);

        for (gid, fdecl) in &prog.fdecls {
            for ix in 0..fdecl.cfg.len() {
                let b = fdecl.cfg.block(ix);
                let invalidating = b.insns
                    .iter()
                    .filter(|(uid, _)| inv.is_may_invalidate(&CallSite { caller: *gid, uid: *uid }))
                    .count();
                let marked = iso.is_may_invalidate(*gid, fdecl.cfg.block_id(ix));
                assert!(invalidating <= 1, "{test}: block {ix} has {invalidating} invalidating calls");
                assert_eq!(invalidating == 1, marked, "{test}: block {ix} marked wrongly");
                if marked {
                    assert_eq!(b.insns.len(), 1, "{test}: block {ix} has more than the call");
                    assert!(matches!(b.term, ast::Terminator::Br(_)), "{test}: block {ix} does not branch");
                }
            }
        }

        let splits = iso.splits;
        let again = isolate::run(&mut prog, &inv);
        assert_eq!(again.splits, 0, "{test}: isolation is not idempotent");
        let first: Vec<_> = prog.fdecls.iter().flat_map(|(g, _)| iso.blocks(*g)).collect();
        let second: Vec<_> = prog.fdecls.iter().flat_map(|(g, _)| again.blocks(*g)).collect();
        assert_eq!(first, second, "{test}: isolation found different blocks after {splits} splits");
    }
}

#[test]
fn loop_split_labels() {
    let s = read("loop.ll");
    let arena = Arena::new();
    let mut prog = llvm::parse(&s, &arena).unwrap();
    let report = opt::run(&mut prog, &arena, &Config::default());
    assert_eq!(report.splits, 2);

    let (_, fdecl) = &prog.fdecls[1];
    let labels: Vec<_> = fdecl.cfg.blocks.iter().map(|(l, _)| prog.tables.label_name(*l)).collect();
    assert_eq!(labels, vec!["loop", "loop.split0", "loop.split1", "exit"]);
}

#[test]
fn invalidating_procedures() {
    let s = read("transitive.ll");
    let arena = Arena::new();
    let prog = llvm::parse(&s, &arena).unwrap();
    let config = Config::default();
    let checks = CheckFns::resolve(&config, &prog.tables);
    let cg = CallGraph::build(&prog, |g| checks.is_check(g));
    let reach = ReachIndex::build(&cg);
    let inv = Invalidation::classify(&prog, &cg, &reach, &config);

    let mut names: Vec<_> = inv.invalidating_procedures()
        .iter()
        .map(|g| prog.tables.global_name(*g))
        .collect();
    names.sort();
    assert_eq!(names, vec!["calls_frees", "deep", "frees"]);

    let allocates = prog.tables.global("allocates").unwrap();
    assert!(!inv.is_invalidating(allocates));

    let mut callers: Vec<_> = inv.may_invalidate_sites()
        .map(|site| prog.tables.global_name(site.caller))
        .collect();
    callers.sort();
    assert_eq!(callers, vec!["calls_frees", "deep", "frees"]);
    assert!(cg.nodes().iter().all(|g| !cg.has_indirect_calls(*g)));
}

#[test]
fn indirect_calls_invalidate() {
    let s = read("indirect.ll");
    let arena = Arena::new();
    let prog = llvm::parse(&s, &arena).unwrap();
    let config = Config::default();
    let checks = CheckFns::resolve(&config, &prog.tables);
    let cg = CallGraph::build(&prog, |g| checks.is_check(g));
    let reach = ReachIndex::build(&cg);
    let inv = Invalidation::classify(&prog, &cg, &reach, &config);

    let f = prog.tables.global("f").unwrap();
    assert!(cg.has_indirect_calls(f));
    assert!(cg.callees(f).is_empty());
    assert!(inv.is_invalidating(f));
    assert_eq!(inv.may_invalidate_sites().count(), 1);
}

#[test]
fn whitelist_from_config() {
    init_logger();
    let s = read("whitelist.ll");
    let arena = Arena::new();
    let mut prog = llvm::parse(&s, &arena).unwrap();
    let config = Config::from_toml(r#"whitelist = ["mystery"]"#).unwrap();
    let report = opt::run(&mut prog, &arena, &config);
    // mm_alloc is no longer whitelisted, mystery now is
    assert_eq!(removed_in(&report, "alloc_between"), Some(0));
    assert_eq!(removed_in(&report, "external_between"), Some(1));
}

#[test]
fn checks_inserted_before_calls() {
    init_logger();
    let s = read("calls.ll");
    let arena = Arena::new();
    let mut prog = llvm::parse(&s, &arena).unwrap();
    let mut config = Config::from_toml("insert_call_checks = true").unwrap();
    config.whitelist.insert("use".to_string());

    let report = opt::run(&mut prog, &arena, &config);
    assert_eq!(report.inserted, 2);
    assert_eq!(removed_in(&report, "f"), Some(1));
    assert_eq!(checks_in(&prog, "f"), 1);

    let printed = prog.to_string();
    assert!(printed.contains("declare void @MMPtrKeyCheck(i8 mmptr*)"), "{printed}");
    assert!(printed.contains("\tcall void @MMPtrKeyCheck(i64 mmptr* @h)\n\tcall void @use(i64 mmptr %p)"), "{printed}");
}

#[test]
fn inserted_checks_kept_across_unknown_calls() {
    let s = read("calls.ll");
    let arena = Arena::new();
    let mut prog = llvm::parse(&s, &arena).unwrap();
    let config = Config::from_toml("insert_call_checks = true").unwrap();

    let report = opt::run(&mut prog, &arena, &config);
    assert_eq!(report.inserted, 2);
    assert_eq!(report.total_removed(), 0);
    assert_eq!(checks_in(&prog, "f"), 2);
}
