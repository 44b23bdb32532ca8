use crate::ast::{
    BinaryOp, Const, Expr, ExprX, Field, FieldX, Function, FunctionX, Ident, LocX, Method,
    MethodX, Param, ParamX, Params, Predicate, PredicateX, Program, ProgramX, Span, Spanned,
    Stmt, StmtX, Typ, TypX, UnaryOp,
};
use smtio::printer::node_to_string;
use sise::Node;
use std::sync::Arc;

// Following SMT-LIB syntax specification
fn is_symbol_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "~!@$%^&*_-+=<>.?/".contains(c)
}

fn is_symbol(s: &String) -> bool {
    s.len() > 0 && s.chars().all(is_symbol_char)
}

fn span_of(node: &Node) -> Span {
    Span { as_string: node_to_string(node) }
}

fn spanned(node: &Node, x: ExprX) -> Expr {
    Spanned::new(span_of(node), x)
}

pub struct Parser {}

impl Parser {
    pub fn new() -> Self {
        Parser {}
    }

    pub fn node_to_typ(&self, node: &Node) -> Result<Typ, String> {
        match node {
            Node::Atom(s) if s == "Bool" => Ok(Arc::new(TypX::Bool)),
            Node::Atom(s) if s == "Int" => Ok(Arc::new(TypX::Int)),
            Node::Atom(s) if s == "Perm" => Ok(Arc::new(TypX::Perm)),
            Node::Atom(s) if s == "Ref" => Ok(Arc::new(TypX::Ref)),
            Node::List(nodes) => match &nodes[..] {
                [Node::Atom(s), t] if s == "Set" => {
                    Ok(Arc::new(TypX::Set(self.node_to_typ(t)?)))
                }
                [Node::Atom(s), t] if s == "Seq" => {
                    Ok(Arc::new(TypX::Seq(self.node_to_typ(t)?)))
                }
                [Node::Atom(s), t] if s == "Multiset" => {
                    Ok(Arc::new(TypX::Multiset(self.node_to_typ(t)?)))
                }
                _ => Err(format!("expected type, found: {}", node_to_string(node))),
            },
            _ => Err(format!("expected type, found: {}", node_to_string(node))),
        }
    }

    fn nodes_to_params(&self, nodes: &[Node]) -> Result<Params, String> {
        let mut params: Vec<Param> = Vec::new();
        for node in nodes {
            match node {
                Node::List(parts) => match &parts[..] {
                    [Node::Atom(x), t] if is_symbol(x) => {
                        params.push(Arc::new(ParamX {
                            name: Arc::new(x.clone()),
                            typ: self.node_to_typ(t)?,
                        }));
                    }
                    _ => {
                        return Err(format!(
                            "expected parameter (x T), found: {}",
                            node_to_string(node)
                        ));
                    }
                },
                _ => {
                    return Err(format!(
                        "expected parameter (x T), found: {}",
                        node_to_string(node)
                    ));
                }
            }
        }
        Ok(Arc::new(params))
    }

    fn node_to_loc(&self, node: &Node) -> Result<crate::ast::Loc, String> {
        match node {
            Node::List(nodes) => match &nodes[..] {
                [Node::Atom(s), rcvr, Node::Atom(f)] if s == "field" && is_symbol(f) => {
                    Ok(Arc::new(LocX::Field(self.node_to_expr(rcvr)?, Arc::new(f.clone()))))
                }
                _ => match &nodes[..] {
                    [Node::Atom(s), Node::Atom(p), args @ ..] if s == "pred" && is_symbol(p) => {
                        Ok(Arc::new(LocX::Predicate(
                            Arc::new(p.clone()),
                            self.nodes_to_exprs(args)?,
                        )))
                    }
                    _ => Err(format!("expected location, found: {}", node_to_string(node))),
                },
            },
            _ => Err(format!("expected location, found: {}", node_to_string(node))),
        }
    }

    fn nodes_to_exprs(&self, nodes: &[Node]) -> Result<Arc<Vec<Expr>>, String> {
        let mut exprs: Vec<Expr> = Vec::new();
        for node in nodes {
            exprs.push(self.node_to_expr(node)?);
        }
        Ok(Arc::new(exprs))
    }

    fn fold_and(&self, node: &Node, exprs: &[Expr]) -> Expr {
        match exprs {
            [] => spanned(node, ExprX::Const(Const::Bool(true))),
            [e] => e.clone(),
            [e, rest @ ..] => {
                spanned(node, ExprX::Binary(BinaryOp::And, e.clone(), self.fold_and(node, rest)))
            }
        }
    }

    fn fold_or(&self, node: &Node, exprs: &[Expr]) -> Expr {
        match exprs {
            [] => spanned(node, ExprX::Const(Const::Bool(false))),
            [e] => e.clone(),
            [e, rest @ ..] => {
                spanned(node, ExprX::Binary(BinaryOp::Or, e.clone(), self.fold_or(node, rest)))
            }
        }
    }

    /// Classify a parsed forall: bodies containing an access predicate
    /// become quantified permission assertions.
    fn classify_forall(
        &self,
        node: &Node,
        params: Params,
        body: Expr,
    ) -> Result<Expr, String> {
        fn contains_acc(e: &Expr) -> bool {
            match &e.x {
                ExprX::Acc(..) => true,
                ExprX::Binary(_, a, b) => contains_acc(a) || contains_acc(b),
                ExprX::CondExp(a, b, c) => contains_acc(a) || contains_acc(b) || contains_acc(c),
                _ => false,
            }
        }
        match &body.x {
            ExprX::Acc(loc, perm) => Ok(spanned(
                node,
                ExprX::QuantifiedPermission(
                    params,
                    spanned(node, ExprX::Const(Const::Bool(true))),
                    loc.clone(),
                    perm.clone(),
                ),
            )),
            ExprX::Binary(BinaryOp::Implies, cond, rhs) => match &rhs.x {
                ExprX::Acc(loc, perm) => Ok(spanned(
                    node,
                    ExprX::QuantifiedPermission(
                        params,
                        cond.clone(),
                        loc.clone(),
                        perm.clone(),
                    ),
                )),
                _ if contains_acc(rhs) => Err(format!(
                    "unsupported quantified permission shape: {}",
                    node_to_string(node)
                )),
                _ => Ok(spanned(node, ExprX::Forall(params, body.clone()))),
            },
            _ if contains_acc(&body) => Err(format!(
                "unsupported quantified permission shape: {}",
                node_to_string(node)
            )),
            _ => Ok(spanned(node, ExprX::Forall(params, body))),
        }
    }

    pub fn node_to_expr(&self, node: &Node) -> Result<Expr, String> {
        match node {
            Node::Atom(s) if s == "true" => Ok(spanned(node, ExprX::Const(Const::Bool(true)))),
            Node::Atom(s) if s == "false" => {
                Ok(spanned(node, ExprX::Const(Const::Bool(false))))
            }
            Node::Atom(s) if s == "null" => Ok(spanned(node, ExprX::Const(Const::Null))),
            Node::Atom(s) if s == "write" => Ok(spanned(node, ExprX::Const(Const::FullPerm))),
            Node::Atom(s) if s == "none" => Ok(spanned(node, ExprX::Const(Const::NoPerm))),
            Node::Atom(s) if s.len() > 0 && s.chars().all(|c| c.is_ascii_digit()) => {
                Ok(spanned(node, ExprX::Const(Const::Int(Arc::new(s.clone())))))
            }
            Node::Atom(s) if is_symbol(s) => {
                Ok(spanned(node, ExprX::Var(Arc::new(s.clone()))))
            }
            Node::List(nodes) if nodes.len() > 0 => {
                match &nodes[..] {
                    [Node::Atom(s), loc] if s == "acc" => {
                        let loc = self.node_to_loc(loc)?;
                        let perm = spanned(node, ExprX::Const(Const::FullPerm));
                        return Ok(spanned(node, ExprX::Acc(loc, perm)));
                    }
                    [Node::Atom(s), loc, perm] if s == "acc" => {
                        let loc = self.node_to_loc(loc)?;
                        let perm = self.node_to_expr(perm)?;
                        return Ok(spanned(node, ExprX::Acc(loc, perm)));
                    }
                    [Node::Atom(s), Node::List(param_nodes), body] if s == "forall" => {
                        let params = self.nodes_to_params(param_nodes)?;
                        let body = self.node_to_expr(body)?;
                        return self.classify_forall(node, params, body);
                    }
                    [Node::Atom(s), Node::List(binders), body] if s == "let" => {
                        let mut result = self.node_to_expr(body)?;
                        for binder in binders.iter().rev() {
                            match binder {
                                Node::List(parts) => match &parts[..] {
                                    [Node::Atom(x), e] if is_symbol(x) => {
                                        result = spanned(
                                            node,
                                            ExprX::Let(
                                                Arc::new(x.clone()),
                                                self.node_to_expr(e)?,
                                                result,
                                            ),
                                        );
                                    }
                                    _ => {
                                        return Err(format!(
                                            "expected let binding, found: {}",
                                            node_to_string(binder)
                                        ));
                                    }
                                },
                                _ => {
                                    return Err(format!(
                                        "expected let binding, found: {}",
                                        node_to_string(binder)
                                    ));
                                }
                            }
                        }
                        return Ok(result);
                    }
                    [Node::Atom(s), rcvr, Node::Atom(f)] if s == "field" && is_symbol(f) => {
                        return Ok(spanned(
                            node,
                            ExprX::FieldAccess(self.node_to_expr(rcvr)?, Arc::new(f.clone())),
                        ));
                    }
                    [Node::Atom(s), lhs, rhs] if s == "wand" => {
                        return Ok(spanned(
                            node,
                            ExprX::MagicWand(
                                None,
                                self.node_to_expr(lhs)?,
                                self.node_to_expr(rhs)?,
                            ),
                        ));
                    }
                    [Node::Atom(s), Node::Atom(w), lhs, rhs]
                        if s == "named-wand" && is_symbol(w) =>
                    {
                        return Ok(spanned(
                            node,
                            ExprX::MagicWand(
                                Some(Arc::new(w.clone())),
                                self.node_to_expr(lhs)?,
                                self.node_to_expr(rhs)?,
                            ),
                        ));
                    }
                    [Node::Atom(s), a, b] if s == "inhale-exhale" => {
                        return Ok(spanned(
                            node,
                            ExprX::InhaleExhale(self.node_to_expr(a)?, self.node_to_expr(b)?),
                        ));
                    }
                    [Node::Atom(s), t] if s == "empty-set" => {
                        return Ok(spanned(
                            node,
                            ExprX::Const(Const::EmptySet(self.node_to_typ(t)?)),
                        ));
                    }
                    [Node::Atom(s), t] if s == "empty-seq" => {
                        return Ok(spanned(
                            node,
                            ExprX::Const(Const::EmptySeq(self.node_to_typ(t)?)),
                        ));
                    }
                    [Node::Atom(s), t] if s == "empty-multiset" => {
                        return Ok(spanned(
                            node,
                            ExprX::Const(Const::EmptyMultiset(self.node_to_typ(t)?)),
                        ));
                    }
                    [Node::Atom(s), a, b, c] if s == "seq-update" => {
                        return Ok(spanned(
                            node,
                            ExprX::SeqUpdate(
                                self.node_to_expr(a)?,
                                self.node_to_expr(b)?,
                                self.node_to_expr(c)?,
                            ),
                        ));
                    }
                    [Node::Atom(s), c, a, b] if s == "ite" => {
                        return Ok(spanned(
                            node,
                            ExprX::CondExp(
                                self.node_to_expr(c)?,
                                self.node_to_expr(a)?,
                                self.node_to_expr(b)?,
                            ),
                        ));
                    }
                    _ => {}
                }
                let args = self.nodes_to_exprs(&nodes[1..])?;
                let head = match &nodes[0] {
                    Node::Atom(s) => s.clone(),
                    _ => {
                        return Err(format!(
                            "expected expression, found: {}",
                            node_to_string(node)
                        ));
                    }
                };
                let uop = match head.as_str() {
                    "not" => Some(UnaryOp::Not),
                    "neg" => Some(UnaryOp::Neg),
                    "card" => Some(UnaryOp::SetCard),
                    "seq-len" => Some(UnaryOp::SeqLen),
                    "multiset-card" => Some(UnaryOp::MultisetCard),
                    "set-singleton" => Some(UnaryOp::SetSingleton),
                    "seq-singleton" => Some(UnaryOp::SeqSingleton),
                    "multiset-singleton" => Some(UnaryOp::MultisetSingleton),
                    _ => None,
                };
                let bop = match head.as_str() {
                    "=>" | "implies" => Some(BinaryOp::Implies),
                    "=" => Some(BinaryOp::Eq),
                    "!=" => Some(BinaryOp::Ne),
                    "<" => Some(BinaryOp::Lt),
                    "<=" => Some(BinaryOp::Le),
                    ">" => Some(BinaryOp::Gt),
                    ">=" => Some(BinaryOp::Ge),
                    "+" => Some(BinaryOp::Add),
                    "*" => Some(BinaryOp::Mul),
                    "div" => Some(BinaryOp::Div),
                    "mod" => Some(BinaryOp::Mod),
                    "/" => Some(BinaryOp::Frac),
                    "in" => Some(BinaryOp::SetIn),
                    "set-add" => Some(BinaryOp::SetAdd),
                    "union" => Some(BinaryOp::SetUnion),
                    "intersection" => Some(BinaryOp::SetIntersection),
                    "difference" => Some(BinaryOp::SetDifference),
                    "subset" => Some(BinaryOp::SetSubset),
                    "seq-append" => Some(BinaryOp::SeqAppend),
                    "seq-index" => Some(BinaryOp::SeqIndex),
                    "seq-take" => Some(BinaryOp::SeqTake),
                    "seq-drop" => Some(BinaryOp::SeqDrop),
                    "multiset-union" => Some(BinaryOp::MultisetUnion),
                    "multiset-count" => Some(BinaryOp::MultisetCount),
                    _ => None,
                };
                match (args.len(), head.as_str(), uop, bop) {
                    (_, "and", _, _) => Ok(self.fold_and(node, &args)),
                    (_, "or", _, _) => Ok(self.fold_or(node, &args)),
                    (1, "-", _, _) => {
                        Ok(spanned(node, ExprX::Unary(UnaryOp::Neg, args[0].clone())))
                    }
                    (2, "-", _, _) => Ok(spanned(
                        node,
                        ExprX::Binary(BinaryOp::Sub, args[0].clone(), args[1].clone()),
                    )),
                    (1, _, Some(op), _) => {
                        Ok(spanned(node, ExprX::Unary(op, args[0].clone())))
                    }
                    (2, _, _, Some(op)) => Ok(spanned(
                        node,
                        ExprX::Binary(op, args[0].clone(), args[1].clone()),
                    )),
                    (_, _, None, None) if is_symbol(&head) => {
                        Ok(spanned(node, ExprX::FuncApp(Arc::new(head.clone()), args)))
                    }
                    _ => Err(format!("expected expression, found: {}", node_to_string(node))),
                }
            }
            _ => Err(format!("expected expression, found: {}", node_to_string(node))),
        }
    }

    fn node_to_stmt(&self, node: &Node) -> Result<Stmt, String> {
        match node {
            Node::List(nodes) => match &nodes[..] {
                [Node::Atom(s), e] if s == "inhale" => Ok(Spanned::new(
                    span_of(node),
                    StmtX::Inhale(self.node_to_expr(e)?),
                )),
                [Node::Atom(s), e] if s == "exhale" => Ok(Spanned::new(
                    span_of(node),
                    StmtX::Exhale(self.node_to_expr(e)?),
                )),
                [Node::Atom(s), e] if s == "assert" => Ok(Spanned::new(
                    span_of(node),
                    StmtX::Assert(self.node_to_expr(e)?),
                )),
                _ => Err(format!("expected statement, found: {}", node_to_string(node))),
            },
            _ => Err(format!("expected statement, found: {}", node_to_string(node))),
        }
    }

    fn node_to_method(&self, node: &Node, nodes: &[Node]) -> Result<Method, String> {
        let (name, params) = match nodes {
            [Node::Atom(m), Node::List(param_nodes), ..] if is_symbol(m) => {
                (Arc::new(m.clone()), self.nodes_to_params(param_nodes)?)
            }
            _ => {
                return Err(format!("expected method, found: {}", node_to_string(node)));
            }
        };
        let mut requires: Vec<Expr> = Vec::new();
        let mut ensures: Vec<Expr> = Vec::new();
        let mut body: Vec<Stmt> = Vec::new();
        for clause in &nodes[2..] {
            match clause {
                Node::List(parts) => match &parts[..] {
                    [Node::Atom(s), e] if s == "requires" => {
                        requires.push(self.node_to_expr(e)?);
                    }
                    [Node::Atom(s), e] if s == "ensures" => {
                        ensures.push(self.node_to_expr(e)?);
                    }
                    [Node::Atom(s), stmts @ ..] if s == "body" => {
                        for stmt in stmts {
                            body.push(self.node_to_stmt(stmt)?);
                        }
                    }
                    _ => {
                        return Err(format!(
                            "expected method clause, found: {}",
                            node_to_string(clause)
                        ));
                    }
                },
                _ => {
                    return Err(format!(
                        "expected method clause, found: {}",
                        node_to_string(clause)
                    ));
                }
            }
        }
        Ok(Arc::new(MethodX {
            name,
            params,
            requires: Arc::new(requires),
            ensures: Arc::new(ensures),
            body: Arc::new(body),
        }))
    }

    pub fn nodes_to_program(&self, nodes: &[Node]) -> Result<Program, String> {
        let mut fields: Vec<Field> = Vec::new();
        let mut predicates: Vec<Predicate> = Vec::new();
        let mut functions: Vec<Function> = Vec::new();
        let mut axioms: Vec<Expr> = Vec::new();
        let mut methods: Vec<Method> = Vec::new();
        for node in nodes {
            match node {
                Node::List(parts) => match &parts[..] {
                    [Node::Atom(s), Node::Atom(f), t] if s == "field" && is_symbol(f) => {
                        fields.push(Arc::new(FieldX {
                            name: Arc::new(f.clone()),
                            typ: self.node_to_typ(t)?,
                        }));
                    }
                    [Node::Atom(s), Node::Atom(p), Node::List(param_nodes)]
                        if s == "predicate" && is_symbol(p) =>
                    {
                        predicates.push(Arc::new(PredicateX {
                            name: Arc::new(p.clone()),
                            params: self.nodes_to_params(param_nodes)?,
                        }));
                    }
                    [Node::Atom(s), Node::Atom(f), Node::List(typ_nodes), ret]
                        if s == "function" && is_symbol(f) =>
                    {
                        let mut typs: Vec<Typ> = Vec::new();
                        for t in typ_nodes {
                            typs.push(self.node_to_typ(t)?);
                        }
                        functions.push(Arc::new(FunctionX {
                            name: Arc::new(f.clone()),
                            typs: Arc::new(typs),
                            ret: self.node_to_typ(ret)?,
                        }));
                    }
                    [Node::Atom(s), e] if s == "axiom" => {
                        axioms.push(self.node_to_expr(e)?);
                    }
                    [Node::Atom(s), ..] if s == "method" => {
                        methods.push(self.node_to_method(node, &parts[1..])?);
                    }
                    _ => {
                        return Err(format!(
                            "expected declaration, found: {}",
                            node_to_string(node)
                        ));
                    }
                },
                _ => {
                    return Err(format!(
                        "expected declaration, found: {}",
                        node_to_string(node)
                    ));
                }
            }
        }
        Ok(Arc::new(ProgramX {
            fields: Arc::new(fields),
            predicates: Arc::new(predicates),
            functions: Arc::new(functions),
            axioms: Arc::new(axioms),
            methods: Arc::new(methods),
        }))
    }
}

/// Parse a whole file: the contents are wrapped in parentheses and read as
/// one node list.
pub fn parse_program_str(input: &str) -> Result<Program, String> {
    let mut bytes: Vec<u8> = Vec::new();
    bytes.push(b'(');
    bytes.extend_from_slice(input.as_bytes());
    bytes.push(b')');
    let mut parser = sise::Parser::new(&bytes);
    let node = sise::read_into_tree(&mut parser).map_err(|e| format!("parse error: {:?}", e))?;
    match node {
        Node::List(nodes) => Parser::new().nodes_to_program(&nodes),
        Node::Atom(_) => Err("expected a program".to_string()),
    }
}
