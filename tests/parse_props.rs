//! Property tests for the markdown parser.

use proptest::prelude::*;

use mdapply::core::parse::{ParsedOperation, parse};

fn rel_path() -> impl Strategy<Value = String> {
    "[a-z]{1,8}(/[a-z]{1,8}){0,2}\\.(rs|ts|txt)"
}

fn body_lines() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{1,10}( [a-z]{1,10})?", 1..8)
}

proptest! {
    #[test]
    fn never_panics_and_is_deterministic(input in "\\PC{0,400}") {
        let first = parse(&input);
        let second = parse(&input);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn plain_prose_yields_nothing(input in "[a-z .,;\n]{0,300}") {
        prop_assert!(parse(&input).is_empty());
    }

    #[test]
    fn delete_directive_names_its_path(path in rel_path(), prefix in "[a-z ]{0,40}") {
        let md = format!("{prefix}\n\nDELETE {path}\n");
        let ops = parse(&md);
        prop_assert_eq!(ops, vec![ParsedOperation::Delete { file_path: path }]);
    }

    #[test]
    fn headed_fence_overwrites_with_body(path in rel_path(), lines in body_lines()) {
        let body = lines.join("\n");
        let md = format!("Here is the file:\n\n`{path}`\n```\n{body}\n```\n");
        let ops = parse(&md);
        prop_assert_eq!(ops, vec![ParsedOperation::Overwrite {
            file_path: path,
            content: body,
            is_new_file: false,
        }]);
    }

    #[test]
    fn operations_follow_document_order(a in rel_path(), b in rel_path()) {
        prop_assume!(a != b);
        let md = format!("DELETE {a}\n\n{b}\n```\nbody\n```\n\nMOVE {a} TO {b}\n");
        let ops = parse(&md);
        let paths: Vec<&str> = ops.iter().map(|o| o.primary_path()).collect();
        prop_assert_eq!(paths, vec![a.as_str(), b.as_str(), a.as_str()]);
    }
}
