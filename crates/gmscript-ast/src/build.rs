//! Constructeurs d'arbres.
//!
//! Les nœuds sont créés sans ligne ; [`Node::at`] fixe la ligne d'un
//! sous-arbre entier. Les affectations composées (`a += b`) sont abaissées
//! en `a = a + b`, comme le fait le parseur.

use crate::{
    Constant, Declaration, Expression, Node, NodeFlags, NodeKind, Operator, Statement, StorageClass,
};

fn expr(e: Expression) -> Node { Node::new(NodeKind::Expression(e)) }

fn statement(s: Statement) -> Node { Node::new(NodeKind::Statement(s)) }

fn decl(d: Declaration) -> Node { Node::new(NodeKind::Declaration(d)) }

fn op(op: Operator, operands: Vec<Node>) -> Node { expr(Expression::Operation { op, operands }) }

/* ───── Expressions ───── */

/// Identifiant.
pub fn ident(name: &str) -> Node { expr(Expression::Identifier(name.to_owned())) }

/// Identifiant membre (`.name`).
pub fn member(name: &str) -> Node { ident(name).with_flags(NodeFlags::IS_MEMBER) }

/// `null`
pub fn null() -> Node { expr(Expression::Constant(Constant::Null)) }

/// Entier.
pub fn int(v: i32) -> Node { expr(Expression::Constant(Constant::Int(v))) }

/// Flottant.
pub fn float(v: f32) -> Node { expr(Expression::Constant(Constant::Float(v))) }

/// Chaîne.
pub fn string(s: &str) -> Node { expr(Expression::Constant(Constant::Str(s.to_owned()))) }

/// `this`
pub fn this() -> Node { expr(Expression::This) }

/// Opération binaire.
pub fn binary(o: Operator, left: Node, right: Node) -> Node { op(o, vec![left, right]) }

/// Opération unaire.
pub fn unary(o: Operator, operand: Node) -> Node { op(o, vec![operand]) }

/// `lhs = rhs`
pub fn assign(lhs: Node, rhs: Node) -> Node { op(Operator::Assign, vec![lhs, rhs]) }

/// `lhs o= rhs`, abaissé en `lhs = lhs o rhs`.
pub fn compound_assign(o: Operator, lhs: Node, rhs: Node) -> Node {
    assign(lhs.clone(), binary(o, lhs, rhs))
}

/// `obj.name`
pub fn dot(obj: Node, name: &str) -> Node { binary(Operator::Dot, obj, ident(name)) }

/// `obj[key]`
pub fn index(obj: Node, key: Node) -> Node { binary(Operator::Index, obj, key) }

/// `callee(args)`
pub fn call(callee: Node, args: Vec<Node>) -> Node {
    expr(Expression::Call { callee: Box::new(callee), args, receiver: None })
}

/// `obj.name(args)` : receveur et méthode issus d'une seule évaluation de `obj`.
pub fn method_call(obj: Node, name: &str, args: Vec<Node>) -> Node { call(dot(obj, name), args) }

/// `receiver:callee(args)`
pub fn call_with(receiver: Node, callee: Node, args: Vec<Node>) -> Node {
    expr(Expression::Call {
        callee: Box::new(callee),
        args,
        receiver: Some(Box::new(receiver)),
    })
}

/// `function(params) { body }`
pub fn function(params: &[&str], body: Vec<Node>) -> Node {
    expr(Expression::Function {
        params: params.iter().map(|p| param(p)).collect(),
        body: Box::new(block(body)),
    })
}

/// `{ fields }`
pub fn table(fields: Vec<Node>) -> Node { expr(Expression::Table(fields)) }

/// Champ `key = value` d'un littéral de table.
pub fn field(key: &str, value: Node) -> Node { op(Operator::AssignField, vec![ident(key), value]) }

/* ───── Instructions ───── */

/// Expression utilisée comme instruction (résultat dépilé).
pub fn stmt(e: Node) -> Node { e.with_flags(NodeFlags::POP_RESULT) }

/// `{ items }`
pub fn block(items: Vec<Node>) -> Node { statement(Statement::Compound(items)) }

/// `if (cond) then [else otherwise]`
pub fn if_(cond: Node, then: Node, otherwise: Option<Node>) -> Node {
    statement(Statement::If {
        cond: Box::new(cond),
        then: Box::new(then),
        otherwise: otherwise.map(Box::new),
    })
}

/// `while (cond) body`
pub fn while_(cond: Node, body: Node) -> Node {
    statement(Statement::While { cond: Box::new(cond), body: Box::new(body) })
}

/// `do body while (cond)`
pub fn do_while(body: Node, cond: Node) -> Node {
    statement(Statement::DoWhile { body: Box::new(body), cond: Box::new(cond) })
}

/// `for (init; cond; step) body`
pub fn for_(init: Option<Node>, cond: Option<Node>, step: Option<Node>, body: Node) -> Node {
    statement(Statement::For {
        init: init.map(Box::new),
        cond: cond.map(Box::new),
        step: step.map(Box::new),
        body: Box::new(body),
    })
}

/// `foreach (key and value in table) body`
pub fn foreach(table: Node, key: Option<&str>, value: &str, body: Node) -> Node {
    statement(Statement::Foreach {
        table: Box::new(table),
        key: key.map(str::to_owned),
        value: value.to_owned(),
        body: Box::new(body),
    })
}

/// `return [value];`
pub fn ret(value: Option<Node>) -> Node { statement(Statement::Return(value.map(Box::new))) }

/// `break;`
pub fn brk() -> Node { statement(Statement::Break) }

/// `continue;`
pub fn cont() -> Node { statement(Statement::Continue) }

/* ───── Déclarations ───── */

/// Déclaration de variable.
pub fn var(class: StorageClass, name: &str) -> Node {
    decl(Declaration::Variable { class, name: name.to_owned() })
}

/// `local name;`
pub fn local(name: &str) -> Node { var(StorageClass::Local, name) }

/// `global name;`
pub fn global(name: &str) -> Node { var(StorageClass::Global, name) }

/// `member name;`
pub fn member_decl(name: &str) -> Node { var(StorageClass::Member, name) }

/// Paramètre.
pub fn param(name: &str) -> Node { decl(Declaration::Parameter { name: name.to_owned() }) }
