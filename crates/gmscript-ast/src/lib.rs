// src/lib.rs
//! gmscript AST (Abstract Syntax Tree)
//!
//! Ce crate définit l'arbre produit par le parseur et consommé, en lecture
//! seule, par le générateur de code de `gmscript-compiler`.
//!
//! - Type somme fermé : `Declaration` / `Statement` / `Expression`
//! - Chaque nœud porte une ligne source et des drapeaux (`IS_MEMBER`, `POP_RESULT`)
//! - Le parent possède ses enfants (pas de cycles)
//! - Constructeurs pratiques dans [`build`]
//!
//! # Features
//! - `serde` : (dé)sérialisation de l'arbre (format JSON des outils)
//!
//! # Exemple
//! ```rust
//! use gmscript_ast::build::{assign, ident, int, stmt};
//!
//! let node = stmt(assign(ident("a"), int(1))).at(1);
//! assert_eq!(node.line, 1);
//! ```

#![deny(missing_docs)]

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Constructeurs d'arbres (tests, outils, parseurs embarqués).
pub mod build;

bitflags::bitflags! {
    /// Drapeaux d'un nœud.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct NodeFlags: u8 {
        /// Identifiant préfixé par `.` : membre du receveur courant.
        const IS_MEMBER  = 1 << 0;
        /// Expression utilisée comme instruction : résultat dépilé après évaluation.
        const POP_RESULT = 1 << 1;
    }
}

/// Un nœud de l'arbre
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Node {
    /// Contenu du nœud.
    pub kind: NodeKind,
    /// Ligne source (0 = inconnue).
    #[cfg_attr(feature = "serde", serde(default))]
    pub line: u32,
    /// Drapeaux.
    #[cfg_attr(feature = "serde", serde(default))]
    pub flags: NodeFlags,
}

/// Catégorie de nœud
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NodeKind {
    /// Déclaration de variable ou de paramètre.
    Declaration(Declaration),
    /// Instruction.
    Statement(Statement),
    /// Expression.
    Expression(Expression),
}

/// Classe de stockage d'une variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StorageClass {
    /// Slot de pile de la fonction courante.
    Local,
    /// Champ du receveur (`this`).
    Member,
    /// Variable globale.
    Global,
}

/// Déclarations
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Declaration {
    /// `local a;`, `member a;`, `global a;`
    Variable {
        /// Classe de stockage.
        class: StorageClass,
        /// Nom déclaré.
        name: String,
    },
    /// Paramètre d'un littéral de fonction.
    Parameter {
        /// Nom du paramètre.
        name: String,
    },
}

/// Instructions
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Statement {
    /// Séquence `{ ... }`.
    Compound(Vec<Node>),
    /// `if (cond) then else otherwise`
    If {
        /// Condition.
        cond: Box<Node>,
        /// Branche vraie.
        then: Box<Node>,
        /// Branche fausse optionnelle.
        otherwise: Option<Box<Node>>,
    },
    /// `while (cond) body`
    While {
        /// Condition évaluée avant chaque itération.
        cond: Box<Node>,
        /// Corps.
        body: Box<Node>,
    },
    /// `do body while (cond)`
    DoWhile {
        /// Corps.
        body: Box<Node>,
        /// Condition évaluée après chaque itération.
        cond: Box<Node>,
    },
    /// `for (init; cond; step) body`
    For {
        /// Initialisation.
        init: Option<Box<Node>>,
        /// Condition (absente = toujours vraie).
        cond: Option<Box<Node>>,
        /// Pas exécuté après le corps.
        step: Option<Box<Node>>,
        /// Corps.
        body: Box<Node>,
    },
    /// `foreach (key and value in table) body`
    Foreach {
        /// Table parcourue.
        table: Box<Node>,
        /// Variable clé optionnelle.
        key: Option<String>,
        /// Variable valeur.
        value: String,
        /// Corps.
        body: Box<Node>,
    },
    /// `break;`
    Break,
    /// `continue;`
    Continue,
    /// `return;` / `return expr;`
    Return(Option<Box<Node>>),
}

/// Expressions
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Expression {
    /// Opération (unaire, binaire, affectation, accès).
    Operation {
        /// Opérateur.
        op: Operator,
        /// Opérandes dans l'ordre source.
        operands: Vec<Node>,
    },
    /// Constante littérale.
    Constant(Constant),
    /// Référence à une variable.
    Identifier(String),
    /// Appel de fonction.
    Call {
        /// Expression appelée.
        callee: Box<Node>,
        /// Arguments.
        args: Vec<Node>,
        /// Receveur explicite (`obj:f()`).
        receiver: Option<Box<Node>>,
    },
    /// `this`
    This,
    /// Littéral de fonction.
    Function {
        /// Paramètres (`Declaration::Parameter`).
        params: Vec<Node>,
        /// Corps.
        body: Box<Node>,
    },
    /// Littéral de table : champs positionnels ou `AssignField[clé, valeur]`.
    Table(Vec<Node>),
}

/// Valeurs littérales
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Constant {
    /// `null`
    Null,
    /// Entier 32 bits.
    Int(i32),
    /// Flottant 32 bits.
    Float(f32),
    /// Chaîne.
    Str(String),
}

/// Opérateurs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Operator {
    /// `=`
    Assign,
    /// Champ clé/valeur d'un littéral de table.
    AssignField,
    /// `||`
    Or,
    /// `&&`
    And,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `&`
    BitAnd,
    /// `==`
    Eq,
    /// `!=`
    Neq,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Lte,
    /// `>=`
    Gte,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `+x`
    Pos,
    /// `-x`
    Neg,
    /// `~x`
    Complement,
    /// `!x`
    Not,
    /// `a[b]`
    Index,
    /// `a.b`
    Dot,
}

impl Operator {
    /// Nombre d'opérandes attendus.
    pub const fn arity(self) -> usize {
        match self {
            Self::Pos | Self::Neg | Self::Complement | Self::Not => 1,
            _ => 2,
        }
    }

    /// Représentation source.
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Assign => "=",
            Self::AssignField => ":",
            Self::Or => "||",
            Self::And => "&&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::BitAnd => "&",
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Lte => "<=",
            Self::Gte => ">=",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Add | Self::Pos => "+",
            Self::Sub | Self::Neg => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Complement => "~",
            Self::Not => "!",
            Self::Index => "[]",
            Self::Dot => ".",
        }
    }
}

impl Node {
    /// Nœud sans ligne ni drapeaux.
    pub fn new(kind: NodeKind) -> Self { Self { kind, line: 0, flags: NodeFlags::empty() } }

    /// Fixe la ligne de ce nœud et celle des descendants encore à 0.
    #[must_use]
    pub fn at(mut self, line: u32) -> Self {
        self.set_line(line);
        self
    }

    fn set_line(&mut self, line: u32) {
        if self.line == 0 {
            self.line = line;
        }
        for child in self.children_mut() {
            child.set_line(line);
        }
    }

    /// Ajoute des drapeaux.
    #[must_use]
    pub fn with_flags(mut self, flags: NodeFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Identifiant porté par le nœud, le cas échéant.
    pub fn as_identifier(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Expression(Expression::Identifier(name)) => Some(name),
            _ => None,
        }
    }

    /// Vrai pour un littéral de fonction.
    pub const fn is_function(&self) -> bool {
        matches!(self.kind, NodeKind::Expression(Expression::Function { .. }))
    }

    /// Enfants directs, dans l'ordre source.
    pub fn children(&self) -> Vec<&Node> {
        let mut out: Vec<&Node> = Vec::new();
        match &self.kind {
            NodeKind::Declaration(_) => {}
            NodeKind::Statement(s) => match s {
                Statement::Compound(items) => out.extend(items),
                Statement::If { cond, then, otherwise } => {
                    out.push(cond);
                    out.push(then);
                    out.extend(otherwise.as_deref());
                }
                Statement::While { cond, body } => out.extend([&**cond, &**body]),
                Statement::DoWhile { body, cond } => out.extend([&**body, &**cond]),
                Statement::For { init, cond, step, body } => {
                    out.extend(init.as_deref());
                    out.extend(cond.as_deref());
                    out.extend(step.as_deref());
                    out.push(body);
                }
                Statement::Foreach { table, body, .. } => out.extend([&**table, &**body]),
                Statement::Return(value) => out.extend(value.as_deref()),
                Statement::Break | Statement::Continue => {}
            },
            NodeKind::Expression(e) => match e {
                Expression::Operation { operands, .. } | Expression::Table(operands) => {
                    out.extend(operands);
                }
                Expression::Call { callee, args, receiver } => {
                    out.extend(receiver.as_deref());
                    out.push(callee);
                    out.extend(args);
                }
                Expression::Function { params, body } => {
                    out.extend(params);
                    out.push(body);
                }
                Expression::Constant(_) | Expression::Identifier(_) | Expression::This => {}
            },
        }
        out
    }

    fn children_mut(&mut self) -> Vec<&mut Node> {
        let mut out: Vec<&mut Node> = Vec::new();
        match &mut self.kind {
            NodeKind::Declaration(_) => {}
            NodeKind::Statement(s) => match s {
                Statement::Compound(items) => out.extend(items.iter_mut()),
                Statement::If { cond, then, otherwise } => {
                    out.push(cond);
                    out.push(then);
                    out.extend(otherwise.as_deref_mut());
                }
                Statement::While { cond, body } | Statement::DoWhile { body, cond } => {
                    out.push(cond);
                    out.push(body);
                }
                Statement::For { init, cond, step, body } => {
                    out.extend(init.as_deref_mut());
                    out.extend(cond.as_deref_mut());
                    out.extend(step.as_deref_mut());
                    out.push(body);
                }
                Statement::Foreach { table, body, .. } => {
                    out.push(table);
                    out.push(body);
                }
                Statement::Return(value) => out.extend(value.as_deref_mut()),
                Statement::Break | Statement::Continue => {}
            },
            NodeKind::Expression(e) => match e {
                Expression::Operation { operands, .. } | Expression::Table(operands) => {
                    out.extend(operands.iter_mut());
                }
                Expression::Call { callee, args, receiver } => {
                    out.extend(receiver.as_deref_mut());
                    out.push(callee);
                    out.extend(args.iter_mut());
                }
                Expression::Function { params, body } => {
                    out.extend(params.iter_mut());
                    out.push(body);
                }
                Expression::Constant(_) | Expression::Identifier(_) | Expression::This => {}
            },
        }
        out
    }

    /// Nombre total de nœuds du sous-arbre.
    pub fn count(&self) -> usize { 1 + self.children().iter().map(|c| c.count()).sum::<usize>() }
}

#[cfg(test)]
mod tests {
    use super::build::*;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn at_fills_unset_lines_only() {
        let inner = int(2).at(7);
        let node = stmt(assign(ident("a"), binary(Operator::Add, ident("b"), inner))).at(3);
        let lines: Vec<u32> = collect_lines(&node);
        assert_eq!(lines, vec![3, 3, 3, 3, 7]);
    }

    fn collect_lines(n: &Node) -> Vec<u32> {
        let mut out = vec![n.line];
        for c in n.children() {
            out.extend(collect_lines(c));
        }
        out
    }

    #[test]
    fn children_follow_source_order() {
        let call = method_call(ident("obj"), "f", vec![int(1), int(2)]);
        assert_eq!(call.count(), 6);
        let names: Vec<_> = call.children().iter().map(|c| c.kind.clone()).collect();
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn operator_arity() {
        assert_eq!(Operator::Neg.arity(), 1);
        assert_eq!(Operator::Dot.arity(), 2);
        assert_eq!(Operator::Shl.symbol(), "<<");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_keeps_lines_and_flags() {
        let unit = block(vec![stmt(assign(member("x"), float(1.5))).at(2), ret(Some(string("ok"))).at(3)]);
        let text = serde_json::to_string(&unit).unwrap();
        let back: Node = serde_json::from_str(&text).unwrap();
        assert_eq!(back, unit);

        let bare: Node = serde_json::from_str(r#"{"kind":{"Statement":"Break"}}"#).unwrap();
        assert_eq!((bare.line, bare.flags), (0, NodeFlags::empty()));
    }
}
