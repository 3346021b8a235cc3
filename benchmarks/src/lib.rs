//! Charges de travail partagées par les benches.

use gmscript_ast::build::*;
use gmscript_ast::{Node, Operator};
use gmscript_debugger::Event;

/// Unité synthétique : `n` fonctions avec boucles, branches et appels.
pub fn synthetic_unit(n: usize) -> Node {
    let mut items = vec![global("total")];
    for i in 0..n {
        let name = format!("f{i}");
        let body = vec![
            stmt(assign(ident("acc"), int(0))).at(2),
            for_(
                Some(stmt(assign(ident("i"), int(0)))),
                Some(binary(Operator::Lt, ident("i"), ident("n"))),
                Some(stmt(compound_assign(Operator::Add, ident("i"), int(1)))),
                block(vec![if_(
                    binary(Operator::Eq, binary(Operator::Rem, ident("i"), int(2)), int(0)),
                    stmt(compound_assign(Operator::Add, ident("acc"), ident("i"))),
                    Some(stmt(compound_assign(Operator::Sub, ident("acc"), int(1)))),
                )
                .at(4)]),
            )
            .at(3),
            ret(Some(ident("acc"))).at(6),
        ];
        items.push(stmt(assign(ident(&name), function(&["n"], body))).at(1));
        items.push(stmt(compound_assign(Operator::Add, ident("total"), call(ident(&name), vec![int(10)]))).at(8));
    }
    block(items)
}

/// Réponse type à `get-context` : une pile de `depth` frames.
pub fn context_reply(depth: u32) -> Vec<Event> {
    let mut events = vec![Event::BeginContext { thread: 1, frame: 0 }];
    for frame in 0..depth {
        events.push(Event::ContextCall {
            frame,
            function: format!("f{frame}"),
            source: 0xDEAD_BEEF,
            line: frame + 1,
            this_name: "this".into(),
            this_value: "null".into(),
            this_reference: 0,
        });
    }
    events.push(Event::ContextVariable { name: "acc".into(), value: "42".into(), reference: 0 });
    events.push(Event::EndContext);
    events
}
