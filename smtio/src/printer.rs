use crate::def::{self, mk_skolem_id};
use crate::term::{
    BinaryOp, Binders, Constant, Decl, DeclX, Quant, Sort, SortX, Term, TermX, UnaryOp,
};
use crate::util::vec_map;
use num_bigint::BigInt;
use num_traits::Signed;
use sise::{Node, Writer};

pub fn str_to_node(s: &str) -> Node {
    Node::Atom(s.to_string())
}

pub fn macro_push_node(nodes: &mut Vec<Node>, node: Node) {
    // turn a - b into a-b
    let len = nodes.len();
    if len != 0 {
        if let Node::Atom(cur) = &node {
            if let Node::Atom(prev) = &nodes[len - 1] {
                if node == "-" || prev == ":" || (prev != "-" && prev.ends_with("-")) {
                    nodes[len - 1] = Node::Atom(prev.to_owned() + cur);
                    return;
                }
            }
        }
    }
    nodes.push(node);
}

/*
examples:
  node!(my_atom)
  node!((atom1 atom2 atom-3))
  node!((atom1 (10 20 30) atom-3))
  let x = node!((10 20 30));
  node!((atom1 {x} atom-3))
There's some limited support for atoms containing hyphens, at least for atoms inside a list.
*/
#[macro_export]
macro_rules! node {
    ( - ) => { sise::Node::Atom("-".to_string()) };
    ( { $x:expr } ) => { $x };
    ( [ $x:expr ] ) => { $x.clone() };
    ( $x:literal ) => { sise::Node::Atom($x.to_string()) };
    ( ( $( $x:tt )* ) ) => {
        {
            #[allow(unused_mut)]
            let mut v = Vec::new();
            $($crate::printer::macro_push_node(&mut v, $crate::node!($x));)*
            sise::Node::List(v)
        }
    };
    ( $x:tt ) => { sise::Node::Atom(stringify!($x).to_string()) };
}
#[macro_export]
macro_rules! nodes {
   ( $( $x:tt )* ) => {
       {
           let mut v = Vec::new();
           $($crate::printer::macro_push_node(&mut v, $crate::node!($x));)*
           sise::Node::List(v)
       }
   };
}

/// Mangled sort name, usable both in declarations and in derived symbols.
pub fn sort_id(sort: &Sort) -> String {
    match &**sort {
        SortX::Bool => "Bool".to_string(),
        SortX::Int => "Int".to_string(),
        SortX::Perm => "$Perm".to_string(),
        SortX::Ref => def::REF_SORT.to_string(),
        SortX::Snap => def::SNAP_SORT.to_string(),
        SortX::Seq(t) => format!("Seq<{}>", sort_id(t)),
        SortX::Set(t) => format!("Set<{}>", sort_id(t)),
        SortX::Multiset(t) => format!("Multiset<{}>", sort_id(t)),
        SortX::FieldValueFunction(f, _) => def::fvf_sort_name(f),
        SortX::PredicateSnapFunction(p) => def::psf_sort_name(p),
    }
}

pub fn sort_to_node(sort: &Sort) -> Node {
    match &**sort {
        SortX::Bool => str_to_node("Bool"),
        SortX::Int => str_to_node("Int"),
        SortX::Perm => str_to_node("Real"),
        _ => str_to_node(&sort_id(sort)),
    }
}

fn int_to_node(i: &BigInt) -> Node {
    if i.is_negative() {
        Node::List(vec![str_to_node("-"), str_to_node(&i.magnitude().to_string())])
    } else {
        str_to_node(&i.to_string())
    }
}

fn real_to_node(t: &Term) -> Node {
    // permission-typed integer literals become Real literals
    match &**t {
        TermX::Const(Constant::Int(i)) => {
            if i.is_negative() {
                Node::List(vec![
                    str_to_node("-"),
                    str_to_node(&format!("{}.0", i.magnitude())),
                ])
            } else {
                str_to_node(&format!("{}.0", i))
            }
        }
        _ => Node::List(vec![str_to_node("to_real"), term_to_node(t)]),
    }
}

fn elem_id(sort: &Sort) -> String {
    match &**sort {
        SortX::Seq(t) | SortX::Set(t) | SortX::Multiset(t) => sort_id(t),
        _ => panic!("internal error: expected a collection sort"),
    }
}

fn coll_apply(op: &str, elem: &str, args: Vec<Node>) -> Node {
    let mut nodes: Vec<Node> = Vec::new();
    nodes.push(str_to_node(&def::collection_fun_name(op, elem)));
    nodes.extend(args);
    Node::List(nodes)
}

pub fn term_to_node(term: &Term) -> Node {
    match &**term {
        TermX::Const(c) => match c {
            Constant::Bool(b) => Node::Atom(b.to_string()),
            Constant::Int(i) => int_to_node(i),
            Constant::Null => str_to_node(def::REF_NULL),
            Constant::Unit => str_to_node(def::SNAP_UNIT),
            Constant::NoPerm => str_to_node("0.0"),
            Constant::FullPerm => str_to_node("1.0"),
            Constant::EmptySet(s) => str_to_node(&def::collection_fun_name("Set_empty", &sort_id(s))),
            Constant::EmptySeq(s) => str_to_node(&def::collection_fun_name("Seq_empty", &sort_id(s))),
            Constant::EmptyMultiset(s) => {
                str_to_node(&def::collection_fun_name("Multiset_empty", &sort_id(s)))
            }
        },
        TermX::Var(x, _) => str_to_node(x),
        TermX::App(fun, args) => {
            if args.len() == 0 {
                str_to_node(&fun.name)
            } else {
                let mut nodes: Vec<Node> = Vec::new();
                nodes.push(str_to_node(&fun.name));
                for arg in args.iter() {
                    nodes.push(term_to_node(arg));
                }
                Node::List(nodes)
            }
        }
        TermX::Unary(op, t) => match op {
            UnaryOp::Not => nodes!(not {term_to_node(t)}),
            UnaryOp::IsPositive => nodes!(< "0.0" {term_to_node(t)}),
            UnaryOp::First => {
                Node::List(vec![str_to_node(def::SNAP_FIRST), term_to_node(t)])
            }
            UnaryOp::Second => {
                Node::List(vec![str_to_node(def::SNAP_SECOND), term_to_node(t)])
            }
            UnaryOp::SetCard => coll_apply("Set_card", &elem_id(&t.sort()), vec![term_to_node(t)]),
            UnaryOp::SeqLen => {
                coll_apply("Seq_length", &elem_id(&t.sort()), vec![term_to_node(t)])
            }
            UnaryOp::MultisetCard => {
                coll_apply("Multiset_card", &elem_id(&t.sort()), vec![term_to_node(t)])
            }
            UnaryOp::SingletonSet => {
                coll_apply("Set_singleton", &sort_id(&t.sort()), vec![term_to_node(t)])
            }
            UnaryOp::SingletonSeq => {
                coll_apply("Seq_singleton", &sort_id(&t.sort()), vec![term_to_node(t)])
            }
            UnaryOp::SingletonMultiset => {
                coll_apply("Multiset_singleton", &sort_id(&t.sort()), vec![term_to_node(t)])
            }
        },
        TermX::Binary(op, lhs, rhs) => {
            let (l, r) = (term_to_node(lhs), term_to_node(rhs));
            let simple = |sop: &str, l: Node, r: Node| Node::List(vec![str_to_node(sop), l, r]);
            match op {
                BinaryOp::Implies => simple("=>", l, r),
                BinaryOp::Eq => simple("=", l, r),
                BinaryOp::Lt => simple("<", l, r),
                BinaryOp::Le => simple("<=", l, r),
                BinaryOp::Add => simple("+", l, r),
                BinaryOp::Sub => simple("-", l, r),
                BinaryOp::Mul => simple("*", l, r),
                BinaryOp::EuclideanDiv => simple("div", l, r),
                BinaryOp::EuclideanMod => simple("mod", l, r),
                BinaryOp::FractionPerm => simple("/", real_to_node(lhs), real_to_node(rhs)),
                BinaryOp::PermPlus => simple("+", l, r),
                BinaryOp::PermMinus => simple("-", l, r),
                BinaryOp::PermTimes => simple("*", l, r),
                BinaryOp::PermMin => simple(def::PERM_MIN, l, r),
                BinaryOp::PermLess => simple("<", l, r),
                BinaryOp::PermAtMost => simple("<=", l, r),
                BinaryOp::Combine => simple(def::SNAP_COMBINE, l, r),
                BinaryOp::SetAdd => coll_apply("Set_add", &elem_id(&lhs.sort()), vec![l, r]),
                BinaryOp::SetUnion => coll_apply("Set_union", &elem_id(&lhs.sort()), vec![l, r]),
                BinaryOp::SetIntersection => {
                    coll_apply("Set_intersection", &elem_id(&lhs.sort()), vec![l, r])
                }
                BinaryOp::SetDifference => {
                    coll_apply("Set_difference", &elem_id(&lhs.sort()), vec![l, r])
                }
                BinaryOp::SetIn => coll_apply("Set_in", &elem_id(&rhs.sort()), vec![l, r]),
                BinaryOp::SetSubset => {
                    coll_apply("Set_subset", &elem_id(&lhs.sort()), vec![l, r])
                }
                BinaryOp::SeqAppend => {
                    coll_apply("Seq_append", &elem_id(&lhs.sort()), vec![l, r])
                }
                BinaryOp::SeqIndex => coll_apply("Seq_index", &elem_id(&lhs.sort()), vec![l, r]),
                BinaryOp::SeqTake => coll_apply("Seq_take", &elem_id(&lhs.sort()), vec![l, r]),
                BinaryOp::SeqDrop => coll_apply("Seq_drop", &elem_id(&lhs.sort()), vec![l, r]),
                BinaryOp::MultisetUnion => {
                    coll_apply("Multiset_union", &elem_id(&lhs.sort()), vec![l, r])
                }
                BinaryOp::MultisetCount => {
                    coll_apply("Multiset_count", &elem_id(&lhs.sort()), vec![l, r])
                }
            }
        }
        TermX::And(ts) => {
            let mut nodes = vec![str_to_node("and")];
            nodes.extend(ts.iter().map(term_to_node));
            Node::List(nodes)
        }
        TermX::Or(ts) => {
            let mut nodes = vec![str_to_node("or")];
            nodes.extend(ts.iter().map(term_to_node));
            Node::List(nodes)
        }
        TermX::Ite(c, t, e) => {
            nodes!(ite {term_to_node(c)} {term_to_node(t)} {term_to_node(e)})
        }
        TermX::SeqUpdate(s, i, v) => coll_apply(
            "Seq_update",
            &elem_id(&s.sort()),
            vec![term_to_node(s), term_to_node(i), term_to_node(v)],
        ),
        TermX::Quant(quant, binders, triggers, qid, body) => {
            let s_quant = match quant {
                Quant::Forall => "forall",
                Quant::Exists => "exists",
            };
            let s_binders = binders_to_node(binders);
            let mut attributed: Vec<Node> = Vec::new();
            attributed.push(str_to_node("!"));
            attributed.push(term_to_node(body));
            for trigger in triggers.iter() {
                attributed.push(str_to_node(":pattern"));
                attributed.push(Node::List(vec_map(trigger, term_to_node)));
            }
            attributed.push(str_to_node(":qid"));
            attributed.push(str_to_node(qid));
            attributed.push(str_to_node(":skolemid"));
            attributed.push(str_to_node(&mk_skolem_id(qid)));
            Node::List(vec![str_to_node(s_quant), s_binders, Node::List(attributed)])
        }
        TermX::Let(binder, body) => {
            let binding =
                Node::List(vec![str_to_node(&binder.name), term_to_node(&binder.a)]);
            nodes!(let {Node::List(vec![binding])} {term_to_node(body)})
        }
        TermX::Lookup(f, fvf, rcvr) => Node::List(vec![
            str_to_node(&def::fvf_lookup_name(f)),
            term_to_node(fvf),
            term_to_node(rcvr),
        ]),
        TermX::Domain(f, fvf) => {
            Node::List(vec![str_to_node(&def::fvf_domain_name(f)), term_to_node(fvf)])
        }
        TermX::PredLookup(p, psf, args) => {
            let mut nodes = vec![str_to_node(&def::psf_lookup_name(p)), term_to_node(psf)];
            nodes.extend(args.iter().map(term_to_node));
            Node::List(nodes)
        }
        TermX::PredDomain(p, psf) => {
            Node::List(vec![str_to_node(&def::psf_domain_name(p)), term_to_node(psf)])
        }
        TermX::SortWrapper(sort, t) => {
            let from = sort_id(&t.sort());
            let to = sort_id(sort);
            Node::List(vec![
                str_to_node(&def::sort_wrapper_name(&from, &to)),
                term_to_node(t),
            ])
        }
    }
}

fn binders_to_node(binders: &Binders<Sort>) -> Node {
    Node::List(vec_map(binders, |b| {
        Node::List(vec![str_to_node(&b.name), sort_to_node(&b.a)])
    }))
}

pub fn decl_to_node(decl: &Decl) -> Node {
    match &**decl {
        DeclX::Sort(sort) => {
            nodes!(declare-sort {str_to_node(&sort_id(sort))} 0)
        }
        DeclX::Const(x, sort) => {
            nodes!(declare-const {str_to_node(x)} {sort_to_node(sort)})
        }
        DeclX::Fun(fun) => {
            let args = Node::List(vec_map(&fun.arg_sorts, sort_to_node));
            nodes!(declare-fun {str_to_node(&fun.name)} {args} {sort_to_node(&fun.sort)})
        }
        DeclX::DefineFun(fun, params, body) => {
            nodes!(define-fun {str_to_node(&fun.name)} {binders_to_node(params)}
                {sort_to_node(&fun.sort)} {term_to_node(body)})
        }
    }
}

pub struct NodeWriter {}

impl NodeWriter {
    pub fn new() -> Self {
        NodeWriter {}
    }

    pub fn write_node(
        &mut self,
        writer: &mut sise::SpacedStringWriter,
        node: &Node,
        break_len: usize,
        brk: bool,
    ) {
        let opts =
            sise::SpacedStringWriterNodeOptions { break_line_len: if brk { 0 } else { break_len } };
        match node {
            Node::Atom(a) => {
                writer.write_atom(a, opts).unwrap();
            }
            Node::List(l) => {
                writer.begin_list(opts).unwrap();
                let mut brk = false;
                let mut was_pattern = false;
                for n in l {
                    self.write_node(writer, n, break_len + 1, brk && !was_pattern);
                    was_pattern = false;
                    match n {
                        Node::Atom(a)
                            if a == "=>"
                                || a == "and"
                                || a == "or"
                                || a == "ite"
                                || a == "let"
                                || a == "assert"
                                || a == "!" =>
                        {
                            brk = true;
                        }
                        Node::Atom(a) if a == ":pattern" || a == ":qid" || a == ":skolemid" => {
                            was_pattern = true;
                        }
                        _ => {}
                    }
                }
                writer.end_list(()).unwrap();
            }
        }
    }

    pub fn node_to_string_indent(&mut self, indent: &String, node: &Node) -> String {
        let indentation = " ";
        let style = sise::SpacedStringWriterStyle {
            line_break: &("\n".to_string() + &indent),
            indentation,
        };
        let mut result = String::new();
        let mut string_writer = sise::SpacedStringWriter::new(style, &mut result);
        self.write_node(&mut string_writer, &node, 80, false);
        string_writer.finish(()).unwrap();
        clean_up_lines(result, indentation)
    }
}

pub fn node_to_string(node: &Node) -> String {
    NodeWriter::new().node_to_string_indent(&"".to_string(), node)
}

pub fn term_to_string(term: &Term) -> String {
    node_to_string(&term_to_node(term))
}

pub fn clean_up_lines(input: String, indentation: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let mut result: String = "".to_string();
    let mut i = 0;
    while i < lines.len() {
        let mut line = lines[i].to_owned();
        // Consolidate closing ) lines:
        if line.trim() == ")" {
            while i + 1 < lines.len() && lines[i + 1].trim() == ")" {
                line = lines[i + 1].to_string() + &indentation[1..] + line.trim();
                i += 1;
            }
        }
        result.push_str(&line);
        i += 1;
        if i < lines.len() {
            result.push_str("\n");
        }
    }
    result
}
