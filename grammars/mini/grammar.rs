//! The `mini` grammar: statements, expressions with operator precedence,
//! functions and two kinds of comments.

use canopy_generate::grammar::{
    choice, field, optional, pattern, prec, prec_left, prec_right, repeat, seq, string, sym,
    token, Rule,
};
use canopy_generate::Grammar;

/// A comma separated list of zero or more `rule`.
fn comma_separated(rule: Rule) -> Rule {
    optional(seq([rule.clone(), repeat(seq([string(","), rule]))]))
}

fn binary(precedence: i32, operators: &[&str]) -> Rule {
    prec_left(
        precedence,
        seq([
            field("left", sym("_expression")),
            field("operator", choice(operators.iter().map(|op| string(*op)))),
            field("right", sym("_expression")),
        ]),
    )
}

pub fn grammar() -> Grammar {
    Grammar::new("mini")
        .rule("source_file", repeat(sym("_statement")))
        .rule(
            "_statement",
            choice([
                sym("let_statement"),
                sym("expression_statement"),
                sym("return_statement"),
                sym("if_statement"),
                sym("while_statement"),
                sym("block"),
                sym("function_definition"),
            ]),
        )
        .rule(
            "let_statement",
            seq([
                string("let"),
                field("name", sym("identifier")),
                optional(seq([string("="), field("value", sym("_expression"))])),
                string(";"),
            ]),
        )
        .rule("expression_statement", seq([sym("_expression"), string(";")]))
        .rule(
            "return_statement",
            seq([string("return"), optional(sym("_expression")), string(";")]),
        )
        .rule(
            "if_statement",
            seq([
                string("if"),
                field("condition", sym("_expression")),
                field("consequence", sym("block")),
                optional(seq([
                    string("else"),
                    field("alternative", choice([sym("block"), sym("if_statement")])),
                ])),
            ]),
        )
        .rule(
            "while_statement",
            seq([
                string("while"),
                field("condition", sym("_expression")),
                field("body", sym("block")),
            ]),
        )
        .rule(
            "block",
            seq([string("{"), repeat(sym("_statement")), string("}")]),
        )
        .rule(
            "function_definition",
            seq([
                string("fn"),
                field("name", sym("identifier")),
                field("parameters", sym("parameter_list")),
                field("body", sym("block")),
            ]),
        )
        .rule(
            "parameter_list",
            seq([
                string("("),
                comma_separated(sym("identifier")),
                string(")"),
            ]),
        )
        .rule(
            "_expression",
            choice([
                sym("assignment_expression"),
                sym("binary_expression"),
                sym("unary_expression"),
                sym("call_expression"),
                sym("parenthesized_expression"),
                sym("identifier"),
                sym("number"),
                sym("string"),
            ]),
        )
        .rule(
            "assignment_expression",
            prec_right(
                1,
                seq([
                    field("left", sym("identifier")),
                    string("="),
                    field("right", sym("_expression")),
                ]),
            ),
        )
        .rule(
            "binary_expression",
            choice([
                binary(2, &["==", "!=", "<", ">"]),
                binary(3, &["+", "-"]),
                binary(4, &["*", "/"]),
            ]),
        )
        .rule(
            "unary_expression",
            prec(
                5,
                seq([
                    field("operator", choice([string("-"), string("!")])),
                    field("operand", sym("_expression")),
                ]),
            ),
        )
        .rule(
            "call_expression",
            prec(
                6,
                seq([
                    field("function", sym("identifier")),
                    field("arguments", sym("argument_list")),
                ]),
            ),
        )
        .rule(
            "argument_list",
            seq([
                string("("),
                comma_separated(sym("_expression")),
                string(")"),
            ]),
        )
        .rule(
            "parenthesized_expression",
            seq([string("("), sym("_expression"), string(")")]),
        )
        .rule("identifier", pattern("[a-zA-Z_][a-zA-Z0-9_]*"))
        .rule("number", pattern(r"\d+"))
        .rule("string", pattern(r#""([^"\\\n]|\\.)*""#))
        .rule("line_comment", token(seq([string("//"), pattern(".*")])))
        .externals(["block_comment"])
        .extras([pattern(r"\s"), sym("line_comment"), sym("block_comment")])
}
