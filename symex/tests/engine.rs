mod common;

use common::*;
use smtio::prover::{log_assumptions, log_goals, Prover};
use smtio::term::{mk_true, BinaryOp, Constant, TermX};
use smtio::term_util::{bool_sort, ref_sort, snap_sort};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use symex::chunks::{Chunk, FieldChunk};
use symex::consolidate::consolidate;
use symex::consume::consume;
use symex::produce::produce;
use symex::results::{ErrorContext, ErrorKind, VerificationResult};
use symex::snapshots;
use symex::state::{Heap, State};
use symex::verifier::Verifier;

fn state_with_params(v: &mut Verifier, params: &[(&str, smtio::term::Sort)]) -> State {
    let mut s = State::new();
    for (name, sort) in params {
        let t = v.decider.fresh(name, sort).unwrap();
        s = s.with_store(s.store.plus(&Arc::new(name.to_string()), &t));
    }
    s
}

fn produce_into(v: &mut Verifier, s: State, assertion: &symex::ast::Expr) -> State {
    let pve = ErrorContext::new("test produce", &assertion.span);
    let snap = v.decider.fresh("$snap", &snap_sort()).unwrap();
    let captured: Rc<RefCell<Option<State>>> = Rc::new(RefCell::new(None));
    let cap = captured.clone();
    let r = produce(
        s,
        snapshots::fixed(snap),
        assertion,
        &pve,
        v,
        Rc::new(move |s2, _v| {
            *cap.borrow_mut() = Some(s2);
            VerificationResult::Success
        }),
    );
    assert!(matches!(r, VerificationResult::Success), "produce failed: {:?}", r);
    let result = captured.borrow().clone().unwrap();
    result
}

#[test]
fn produce_then_consume_leaves_the_heap_empty() {
    let (mut v, _log) = build_verifier(
        "(field f Int)
         (method m ((x Ref))
           (requires (acc (field x f) write))
           (ensures (acc (field x f) write)))",
    );
    let program = v.program.clone();
    let method = &program.methods[0];
    let s0 = state_with_params(&mut v, &[("x", ref_sort())]);

    let s1 = produce_into(&mut v, s0, &method.requires[0]);
    assert_eq!(s1.heap.len(), 1);
    match &s1.heap.chunks()[0] {
        Chunk::Field(fc) => {
            assert_eq!(&*fc.field, &"f".to_string());
            assert!(matches!(&*fc.perm, TermX::Const(Constant::FullPerm)));
        }
        other => panic!("expected a field chunk, got {:?}", other),
    }

    let pve = ErrorContext::new("test consume", &method.ensures[0].span);
    let captured: Rc<RefCell<Option<State>>> = Rc::new(RefCell::new(None));
    let cap = captured.clone();
    let r = consume(
        s1,
        &method.ensures[0],
        &pve,
        &mut v,
        Rc::new(move |s2, _snap, _v| {
            *cap.borrow_mut() = Some(s2);
            VerificationResult::Success
        }),
    );
    assert!(matches!(r, VerificationResult::Success), "consume failed: {:?}", r);
    let s2 = captured.borrow().clone().unwrap();
    assert_eq!(s2.heap.len(), 0);
}

#[test]
fn failed_consume_leaves_the_entry_heap_untouched() {
    let (mut v, _log) = build_verifier(
        "(field f Int)
         (method m ((x Ref))
           (requires (acc (field x f) (/ 1 2)))
           (ensures (acc (field x f) write)))",
    );
    let program = v.program.clone();
    let method = &program.methods[0];
    let s0 = state_with_params(&mut v, &[("x", ref_sort())]);
    let s1 = produce_into(&mut v, s0, &method.requires[0]);
    assert_eq!(s1.heap.len(), 1);

    let pve = ErrorContext::new("test consume", &method.ensures[0].span);
    let continued = Rc::new(RefCell::new(false));
    let cont = continued.clone();
    let r = consume(
        s1.clone(),
        &method.ensures[0],
        &pve,
        &mut v,
        Rc::new(move |_s, _snap, _v| {
            *cont.borrow_mut() = true;
            VerificationResult::Success
        }),
    );
    assert!(r.is_failure());
    assert_eq!(r.errors()[0].kind, ErrorKind::InsufficientPermission);
    assert!(!*continued.borrow(), "continuation must not run on failure");
    // the caller's heap is exactly what it was on entry
    assert_eq!(s1.heap.len(), 1);
    match &s1.heap.chunks()[0] {
        Chunk::Field(fc) => {
            assert!(matches!(
                &*fc.perm,
                TermX::Binary(BinaryOp::FractionPerm, _, _)
            ));
        }
        other => panic!("expected a field chunk, got {:?}", other),
    }
}

#[test]
fn trivial_assertions_bypass_the_solver() {
    let (mut v, log) = build_verifier("(field f Int)");
    let s = State::new();
    let b = v.decider.fresh("b", &bool_sort()).unwrap();
    v.decider.assume(&[b.clone()]).unwrap();

    let goals_before = log_goals(&log).len();
    let hits_before = v.decider.cache_hits;
    assert!(v.decider.assert(&s, &mk_true(), None).unwrap());
    assert!(v.decider.assert(&s, &b, None).unwrap());
    assert_eq!(log_goals(&log).len(), goals_before, "no solver call expected");
    assert_eq!(v.decider.cache_hits, hits_before + 2);
}

#[test]
fn path_condition_depth_tracks_the_solver() {
    let (mut v, _log) = build_verifier("(field f Int)");
    assert_eq!(v.decider.path_conditions().depth(), v.decider.prover().push_pop_depth());
    v.decider.push_scope().unwrap();
    v.decider.push_scope().unwrap();
    assert_eq!(v.decider.path_conditions().depth(), 2);
    assert_eq!(v.decider.prover().push_pop_depth(), 2);
    v.decider.pop_scope().unwrap();
    assert_eq!(v.decider.path_conditions().depth(), v.decider.prover().push_pop_depth());
    v.decider.pop_scope().unwrap();
    assert_eq!(v.decider.path_conditions().depth(), 0);
}

#[test]
fn consolidation_merges_matching_chunks() {
    let (mut v, log) = build_verifier("(field f Int)");
    let x = v.decider.fresh("x", &ref_sort()).unwrap();
    let half = smtio::term::mk_frac(&smtio::term::mk_int(1), &smtio::term::mk_int(2));
    let v1 = v.decider.fresh("v1", &smtio::term_util::int_sort()).unwrap();
    let v2 = v.decider.fresh("v2", &smtio::term_util::int_sort()).unwrap();
    let f = Arc::new("f".to_string());
    let heap = Heap::from_chunks(vec![
        Chunk::Field(FieldChunk {
            rcvr: x.clone(),
            field: f.clone(),
            value: v1.clone(),
            perm: half.clone(),
        }),
        Chunk::Field(FieldChunk { rcvr: x, field: f, value: v2.clone(), perm: half }),
    ]);
    let s = State::new().with_heap(heap);

    let s2 = consolidate(&s, &mut v).unwrap();
    assert_eq!(s2.heap.len(), 1);
    match &s2.heap.chunks()[0] {
        Chunk::Field(fc) => {
            assert!(matches!(&*fc.perm, TermX::Const(Constant::FullPerm)));
        }
        other => panic!("expected a field chunk, got {:?}", other),
    }
    // the merged values were equated
    let equated = log_assumptions(&log).iter().any(|t| match &**t {
        TermX::Binary(BinaryOp::Eq, a, b) => (a == &v1 && b == &v2) || (a == &v2 && b == &v1),
        _ => false,
    });
    assert!(equated, "expected the merged chunk values to be equated");
}

#[test]
fn abstract_read_permissions_carry_their_constraint() {
    let (mut v, _log) = build_verifier("(field f Int)");
    let (var, constraint) = v.decider.fresh_arp(&smtio::term::full_perm()).unwrap();
    assert!(v.decider.is_arp(&var));
    match &*constraint {
        TermX::And(parts) => {
            assert_eq!(parts.len(), 2);
            assert!(matches!(&*parts[0], TermX::Binary(BinaryOp::PermLess, _, _)));
            assert!(matches!(&*parts[1], TermX::Binary(BinaryOp::PermLess, _, _)));
        }
        other => panic!("expected a conjunction, got {:?}", other),
    }
    assert!(!v.decider.is_arp(&smtio::term::full_perm()));
}

#[test]
#[should_panic(expected = "heap-dependent")]
fn the_pure_translator_rejects_heap_expressions() {
    let program = symex::parser::parse_program_str(
        "(field f Int)
         (method m ((x Ref)) (requires (acc (field x f) write)))",
    )
    .unwrap();
    let mut translator = symex::translate::PureTranslator::new(&program);
    let acc = program.methods[0].requires[0].clone();
    translator.translate(&acc, &|_| None);
}

#[test]
fn axioms_are_translated_and_assumed() {
    let (_v, log) = build_verifier(
        "(function g (Int) Int)
         (axiom (forall ((i Int)) (<= (g i) (g i))))",
    );
    let axiom_assumed = log_assumptions(&log).iter().any(|t| match &**t {
        TermX::Quant(_, _, _, qid, _) => qid.starts_with("prog.quant"),
        _ => false,
    });
    assert!(axiom_assumed, "expected the program axiom among the assumptions");
}

#[test]
fn wand_chunks_round_trip() {
    let (mut v, _log) = build_verifier(
        "(field f Int)
         (method m ((x Ref))
           (requires (wand (acc (field x f) (/ 1 2)) (acc (field x f) write)))
           (ensures (wand (acc (field x f) (/ 1 2)) (acc (field x f) write))))",
    );
    let results = verify_all(&mut v);
    assert!(results[0].1.is_empty(), "unexpected errors: {:?}", results[0].1);
}

#[test]
fn missing_wand_chunks_are_reported() {
    let (mut v, _log) = build_verifier(
        "(field f Int)
         (method m ((x Ref))
           (ensures (wand (acc (field x f) (/ 1 2)) (acc (field x f) write))))
         (method n ((x Ref))
           (ensures (named-wand w (acc (field x f) (/ 1 2)) (acc (field x f) write))))",
    );
    let results = verify_all(&mut v);
    assert_eq!(results[0].1[0].kind, ErrorKind::MagicWandChunkNotFound);
    assert_eq!(results[1].1[0].kind, ErrorKind::NamedMagicWandChunkNotFound);
}

#[test]
fn ghost_statements_execute_in_order() {
    let (mut v, _log) = build_verifier(
        "(field f Int)
         (method m ((x Ref))
           (body
             (inhale (acc (field x f) write))
             (assert (acc (field x f) write))
             (exhale (acc (field x f) write))
             (exhale (acc (field x f) write))))",
    );
    let results = verify_all(&mut v);
    let errors = &results[0].1;
    // assert keeps the heap, the first exhale drains it, the second fails
    assert_eq!(errors.len(), 1, "expected one error, got {:?}", errors);
    assert_eq!(errors[0].kind, ErrorKind::InsufficientPermission);
    assert!(errors[0].context.contains("exhaled"));
}

#[test]
fn inhale_exhale_assertions_pick_the_right_half() {
    let (mut v, _log) = build_verifier(
        "(field f Int)
         (method ok ((x Ref))
           (requires (inhale-exhale (acc (field x f) write) true))
           (ensures (inhale-exhale true (acc (field x f) write))))
         (method bad ((x Ref))
           (requires (inhale-exhale true (acc (field x f) write)))
           (ensures (inhale-exhale true (acc (field x f) write))))",
    );
    let results = verify_all(&mut v);
    assert!(results[0].1.is_empty(), "unexpected errors: {:?}", results[0].1);
    assert_eq!(results[1].1[0].kind, ErrorKind::InsufficientPermission);
}

#[test]
fn predicate_chunks_transfer() {
    let (mut v, _log) = build_verifier(
        "(predicate P ((x Ref)))
         (method m ((x Ref))
           (requires (acc (pred P x) write))
           (ensures (acc (pred P x) (/ 1 2))))
         (method n ((x Ref))
           (requires (acc (pred P x) (/ 1 2)))
           (ensures (acc (pred P x) write)))",
    );
    let results = verify_all(&mut v);
    assert!(results[0].1.is_empty(), "unexpected errors: {:?}", results[0].1);
    assert_eq!(results[1].1[0].kind, ErrorKind::InsufficientPermission);
}

#[test]
fn pure_field_reads_need_permission() {
    let (mut v, _log) = build_verifier(
        "(field f Int)
         (method ok ((x Ref))
           (requires (acc (field x f) write))
           (ensures (= (field x f) (field x f))))
         (method bad ((x Ref))
           (ensures (= (field x f) 0)))",
    );
    let results = verify_all(&mut v);
    assert!(results[0].1.is_empty(), "unexpected errors: {:?}", results[0].1);
    assert_eq!(results[1].1[0].kind, ErrorKind::InsufficientPermission);
}

#[test]
fn exhale_ext_transfers_into_the_reserve_heap() {
    let (mut v, _log) = build_verifier(
        "(field f Int)
         (method m ((x Ref))
           (requires (wand (acc (field x f) (/ 1 2)) (acc (field x f) write))))",
    );
    let program = v.program.clone();
    let method = &program.methods[0];
    let s0 = state_with_params(&mut v, &[("x", ref_sort())]);
    let s1 = produce_into(&mut v, s0, &method.requires[0]);
    assert_eq!(s1.heap.len(), 1);

    let mut s1 = s1;
    s1.exhale_ext = true;
    s1.reserve_heaps.push(Heap::new());

    let pve = ErrorContext::new("test exhale-ext", &method.requires[0].span);
    let captured: Rc<RefCell<Option<State>>> = Rc::new(RefCell::new(None));
    let cap = captured.clone();
    let r = consume(
        s1,
        &method.requires[0],
        &pve,
        &mut v,
        Rc::new(move |s2, _snap, _v| {
            *cap.borrow_mut() = Some(s2);
            VerificationResult::Success
        }),
    );
    assert!(matches!(r, VerificationResult::Success), "consume failed: {:?}", r);
    let s2 = captured.borrow().clone().unwrap();
    assert_eq!(s2.heap.len(), 0);
    assert_eq!(s2.reserve_heaps.len(), 1);
    assert_eq!(s2.reserve_heaps[0].len(), 1);
    assert!(matches!(s2.reserve_heaps[0].chunks()[0], Chunk::MagicWand(_)));
}

#[test]
fn quantified_consume_reports_missing_permissions() {
    // consuming a quantified range out of an empty heap must fail with the
    // final must-check
    let (mut v, _log) = build_verifier_refusing(
        "(field f Int)
         (method m ((s (Set Ref)))
           (ensures (forall ((r Ref)) (implies (in r s) (acc (field r f) write)))))",
        |goal| goal_has_qid(goal, "qp.permTakenComplete"),
    );
    let results = verify_all(&mut v);
    let errors = &results[0].1;
    assert_eq!(errors.len(), 1, "expected one error, got {:?}", errors);
    assert_eq!(errors[0].kind, ErrorKind::InsufficientPermission);
}

#[test]
fn let_bindings_extend_the_store() {
    let (mut v, _log) = build_verifier(
        "(field f Int)
         (method m ((x Ref))
           (requires (let ((y x)) (acc (field y f) write)))
           (ensures (acc (field x f) write)))",
    );
    let results = verify_all(&mut v);
    assert!(results[0].1.is_empty(), "unexpected errors: {:?}", results[0].1);
}

#[test]
fn conditional_assertions_split_into_branches() {
    let (mut v, _log) = build_verifier(
        "(field f Int)
         (method m ((x Ref) (b Bool))
           (requires (ite b (acc (field x f) write) (acc (field x f) (/ 1 2))))
           (ensures (acc (field x f) (/ 1 2))))",
    );
    let results = verify_all(&mut v);
    assert!(results[0].1.is_empty(), "unexpected errors: {:?}", results[0].1);
}

#[test]
fn statistics_include_decider_counters() {
    let (mut v, _log) = build_verifier("(field f Int)");
    let stats = v.statistics().unwrap();
    assert!(stats.iter().any(|(k, _)| k == "decider-cache-hits"));
    assert!(stats.iter().any(|(k, _)| k == "decider-asserts"));
}
