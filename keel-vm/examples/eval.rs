//! Compile a few expression trees, print their disassembly, and run them.

use keel_vm::prelude::*;

fn show(label: &str, expr: Expression, slots: Vec<Slot>) {
    let program = compile(expr).expect("compilation should succeed");

    println!("=== {label} ===");
    print!("{program}");

    let mut vm = Interpreter::with_slots(program, slots);
    vm.run().expect("execution should succeed");
    println!("result: {}\n", vm.result());
}

fn main() {
    show(
        "let foo = 100 in if foo { foo + 4 } else { 0 }",
        Expression::let_in(
            vec![("foo", Expression::int(100))],
            Expression::if_else(
                Expression::var("foo"),
                Expression::add(Expression::var("foo"), Expression::int(4)),
                Expression::int(0),
            ),
        ),
        vec![],
    );

    show(
        "(fillEmpty(foo, false) && fillEmpty(2, false)) && 3",
        Expression::let_in(
            vec![("foo", Expression::int(100))],
            Expression::and(
                Expression::and(
                    Expression::fill_empty_false(Expression::var("foo")),
                    Expression::fill_empty_false(Expression::int(2)),
                ),
                Expression::int(3),
            ),
        ),
        vec![],
    );

    show(
        "nothing && 5",
        Expression::and(Expression::nothing(), Expression::int(5)),
        vec![],
    );

    let price = Slot::new(ValueCell::int(40));
    show(
        "slot(0) + 2",
        Expression::add(Expression::slot(0), Expression::int(2)),
        vec![price],
    );
}
